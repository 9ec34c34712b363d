//! Built-in functions
//!
//! # Available Functions
//!
//! - `Wait` - Sleep for a duration, reporting progress once a second
//! - `Output` - Copy a mapping argument into the phase output

mod output;
mod wait;

pub use output::OutputFunc;
pub use wait::WaitFunc;

use crate::error::Result;
use crate::registry::FuncRegistry;

/// Register every built-in function
pub fn register_builtins(registry: &FuncRegistry) -> Result<()> {
    registry.register(WaitFunc)?;
    registry.register(OutputFunc)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FuncError;

    #[test]
    fn test_register_builtins() {
        let registry = FuncRegistry::new();
        register_builtins(&registry).unwrap();
        assert_eq!(registry.names(), vec!["Output", "Wait"]);
    }

    #[test]
    fn test_register_builtins_twice_fails() {
        let registry = FuncRegistry::new();
        register_builtins(&registry).unwrap();
        assert!(matches!(
            register_builtins(&registry),
            Err(FuncError::AlreadyRegistered(_))
        ));
    }
}
