//! Function execution context and output types

use crate::progress::{NoopReporter, Progress, ProgressReporter};
use skiff_crd::{Value, ValueMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context provided to functions during execution
#[derive(Clone)]
pub struct FuncContext {
    /// ActionSet being executed
    action_set: String,

    /// Namespace of the ActionSet
    namespace: String,

    /// Phase being executed
    phase: String,

    /// Cancelled when the run is withdrawn, times out or the process stops
    cancel: CancellationToken,

    /// Progress reporter for sending snapshots
    progress_reporter: Arc<dyn ProgressReporter>,
}

impl FuncContext {
    /// Create a new function context
    pub fn new(
        action_set: impl Into<String>,
        namespace: impl Into<String>,
        phase: impl Into<String>,
    ) -> Self {
        Self {
            action_set: action_set.into(),
            namespace: namespace.into(),
            phase: phase.into(),
            cancel: CancellationToken::new(),
            progress_reporter: Arc::new(NoopReporter),
        }
    }

    /// Set the cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Set the progress reporter
    pub fn with_progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress_reporter = reporter;
        self
    }

    pub fn action_set(&self) -> &str {
        &self.action_set
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn phase(&self) -> &str {
        &self.phase
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the context is cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Send a progress snapshot
    pub fn report(&self, progress: Progress) {
        self.progress_reporter.report(progress);
    }
}

impl std::fmt::Debug for FuncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuncContext")
            .field("action_set", &self.action_set)
            .field("namespace", &self.namespace)
            .field("phase", &self.phase)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Output returned from a successful function call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FuncOutput {
    values: ValueMap,
}

impl FuncOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an output value
    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_map(self) -> ValueMap {
        self.values
    }
}

impl From<ValueMap> for FuncOutput {
    fn from(values: ValueMap) -> Self {
        Self { values }
    }
}
