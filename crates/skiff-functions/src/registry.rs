//! Function registry
//!
//! The registry is filled once at start-up and then only read. It is
//! handed to the resolver explicitly rather than living in a global.

use crate::error::{FuncError, Result};
use crate::traits::Func;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Name-indexed table of registered functions
///
/// # Example
///
/// ```ignore
/// use skiff_functions::{FuncRegistry, NoopFunc};
///
/// let registry = FuncRegistry::new();
/// registry.register(NoopFunc::new("Noop"))?;
/// assert!(registry.contains("Noop"));
/// ```
#[derive(Default)]
pub struct FuncRegistry {
    funcs: RwLock<HashMap<String, Arc<dyn Func>>>,
}

impl FuncRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function under its own name
    pub fn register<F: Func + 'static>(&self, func: F) -> Result<()> {
        self.register_arc(Arc::new(func))
    }

    /// Register a shared function
    ///
    /// Fails on an empty name or a name that is already taken. There is
    /// no way to replace or remove an entry.
    pub fn register_arc(&self, func: Arc<dyn Func>) -> Result<()> {
        let name = func.name().to_string();
        if name.is_empty() {
            return Err(FuncError::EmptyName);
        }

        let mut funcs = self.funcs.write().unwrap_or_else(PoisonError::into_inner);
        if funcs.contains_key(&name) {
            return Err(FuncError::AlreadyRegistered(name));
        }
        funcs.insert(name, func);
        Ok(())
    }

    /// Look up a function by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Func>> {
        self.funcs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Look up a function, failing with [`FuncError::NotRegistered`]
    pub fn require(&self, name: &str) -> Result<Arc<dyn Func>> {
        self.get(name)
            .ok_or_else(|| FuncError::NotRegistered(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.funcs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .funcs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.funcs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for FuncRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuncRegistry")
            .field("funcs", &self.names())
            .finish()
    }
}
