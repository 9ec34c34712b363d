//! Func trait definition
//!
//! A Func is the unit of work a blueprint phase names. The engine looks
//! it up by name, renders the phase arguments, and calls [`Func::exec`]
//! once per phase.

use crate::context::{FuncContext, FuncOutput};
use crate::error::{FuncError, Result};
use crate::params::TemplateParams;
use crate::progress::Progress;
use async_trait::async_trait;
use skiff_crd::ValueMap;
use std::time::Duration;

/// Core trait for registered functions
///
/// # Example
///
/// ```ignore
/// use skiff_functions::{Func, FuncContext, FuncOutput, Result, TemplateParams};
/// use skiff_crd::ValueMap;
/// use async_trait::async_trait;
///
/// struct Echo;
///
/// #[async_trait]
/// impl Func for Echo {
///     fn name(&self) -> &str {
///         "Echo"
///     }
///
///     fn required_args(&self) -> Vec<&str> {
///         vec!["message"]
///     }
///
///     async fn exec(
///         &self,
///         _ctx: &FuncContext,
///         _params: &TemplateParams,
///         args: &ValueMap,
///     ) -> Result<FuncOutput> {
///         Ok(FuncOutput::new().with_output("message", args["message"].clone()))
///     }
/// }
/// ```
#[async_trait]
pub trait Func: Send + Sync {
    /// Registration name, matched against `BlueprintPhase::func`
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Arguments that must be present after rendering
    fn required_args(&self) -> Vec<&str> {
        vec![]
    }

    /// Every argument the function understands
    ///
    /// An empty list disables the unsupported-argument check.
    fn arguments(&self) -> Vec<&str> {
        vec![]
    }

    /// Run the function
    ///
    /// Implementations should return promptly with
    /// [`FuncError::Cancelled`] once `ctx` is cancelled.
    async fn exec(
        &self,
        ctx: &FuncContext,
        params: &TemplateParams,
        args: &ValueMap,
    ) -> Result<FuncOutput>;
}

/// A function that succeeds immediately with empty output
pub struct NoopFunc {
    name: String,
}

impl NoopFunc {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Func for NoopFunc {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "A no-op function for testing"
    }

    async fn exec(
        &self,
        _ctx: &FuncContext,
        _params: &TemplateParams,
        _args: &ValueMap,
    ) -> Result<FuncOutput> {
        Ok(FuncOutput::new())
    }
}

/// A function that always fails (for testing error handling)
pub struct FailingFunc {
    name: String,
    error_message: String,
}

impl FailingFunc {
    pub fn new(name: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error_message: error_message.into(),
        }
    }
}

#[async_trait]
impl Func for FailingFunc {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "A function that always fails (for testing)"
    }

    async fn exec(
        &self,
        _ctx: &FuncContext,
        _params: &TemplateParams,
        _args: &ValueMap,
    ) -> Result<FuncOutput> {
        Err(FuncError::ExecutionFailed(self.error_message.clone()))
    }
}

/// A function that sleeps, returning early on cancellation
pub struct SleepFunc {
    name: String,
    duration: Duration,
}

impl SleepFunc {
    pub fn new(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            duration,
        }
    }
}

#[async_trait]
impl Func for SleepFunc {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "A function that sleeps for a fixed duration (for testing)"
    }

    async fn exec(
        &self,
        ctx: &FuncContext,
        _params: &TemplateParams,
        _args: &ValueMap,
    ) -> Result<FuncOutput> {
        tokio::select! {
            _ = ctx.cancelled() => Err(FuncError::Cancelled),
            _ = tokio::time::sleep(self.duration) => Ok(FuncOutput::new()),
        }
    }
}

/// Reports a fixed sequence of percentages with a pause between each
pub struct ProgressFunc {
    name: String,
    steps: Vec<u8>,
    pause: Duration,
}

impl ProgressFunc {
    pub fn new(name: impl Into<String>, steps: Vec<u8>, pause: Duration) -> Self {
        Self {
            name: name.into(),
            steps,
            pause,
        }
    }
}

#[async_trait]
impl Func for ProgressFunc {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Reports scripted progress (for testing)"
    }

    async fn exec(
        &self,
        ctx: &FuncContext,
        _params: &TemplateParams,
        _args: &ValueMap,
    ) -> Result<FuncOutput> {
        for pct in &self.steps {
            ctx.report(Progress::new(*pct, format!("{} at {}%", self.name, pct)));
            tokio::select! {
                _ = ctx.cancelled() => return Err(FuncError::Cancelled),
                _ = tokio::time::sleep(self.pause) => {}
            }
        }
        Ok(FuncOutput::new().with_output("steps", self.steps.len() as i64))
    }
}
