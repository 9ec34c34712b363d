//! ActionSet controller
//!
//! The controller consumes one stream of resource events and drives each
//! ActionSet through `Pending -> Running -> {Complete | Failed}`:
//!
//! 1. **Added**: initialize the status from the referenced blueprints
//!    (Pending phases, or Failed with a message if anything cannot be
//!    resolved), flip Pending to Running, and launch one execution unit
//!    per action.
//! 2. **Updated**: once every phase of a Running set is Complete, mark
//!    the set Complete.
//! 3. **Deleted**: cancel the run.
//!
//! Execution units coordinate only through the store. Every status write
//! goes through [`reconcile::action_set`].

use crate::config::ControllerConfig;
use crate::error::{EngineError, Result};
use crate::params;
use crate::progress::{
    self, FuncWeights, PhaseWeights, ProgressTracker, UniformWeights,
};
use crate::reconcile;
use crate::resolver::{self, ResolvedAction, Resolver};
use crate::store::{ActionSetStore, EventKind, Resource, ResourceEvent};
use crate::validate;
use chrono::{DateTime, Utc};
use skiff_crd::{
    object_key, ActionSet, ActionSetStatus, ActionSpec, ActionStatus, Artifact, Blueprint,
    PhaseIndex, PhaseSlot, State,
};
use skiff_functions::{FuncContext, TemplateParams};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Everything one execution unit needs for its action
struct PreparedAction {
    action: String,
    blueprint: Blueprint,
    resolved: ResolvedAction,
    params: TemplateParams,
}

/// Shared by every unit of one run
struct RunContext {
    namespace: String,
    name: String,
    /// Cancels in-flight functions (deletion, deadline, shutdown)
    run: CancellationToken,
    /// Governs status writes, so a cancelled phase can still record its failure
    shutdown: CancellationToken,
    weights: Arc<dyn PhaseWeights>,
}

enum PhaseOutcome {
    Completed,
    Stopped,
    Withdrawn,
}

/// The ActionSet state machine
pub struct Controller {
    store: Arc<dyn ActionSetStore>,
    resolver: Resolver,
    config: ControllerConfig,
    runs: Mutex<HashMap<String, (u64, CancellationToken)>>,
    next_run: AtomicU64,
}

impl Controller {
    pub fn new(store: Arc<dyn ActionSetStore>, resolver: Resolver, config: ControllerConfig) -> Self {
        Self {
            store,
            resolver,
            config,
            runs: Mutex::new(HashMap::new()),
            next_run: AtomicU64::new(1),
        }
    }

    /// Number of runs with execution units still alive
    pub fn active_runs(&self) -> usize {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Watch the configured namespace and process events until `shutdown`
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let mut events = self.store.watch(&self.config.namespace).await?;
        info!(namespace = %self.config.namespace, "Controller watching");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event, &shutdown).await,
                    None => {
                        warn!("Event stream closed");
                        break;
                    }
                },
            }
        }

        info!("Controller stopped");
        Ok(())
    }

    /// Apply one event; failures are logged, never propagated
    pub async fn handle_event(self: &Arc<Self>, event: ResourceEvent, shutdown: &CancellationToken) {
        let result = match (event.kind, event.resource) {
            (EventKind::Added, Resource::ActionSet(set)) => self.on_added(&set, shutdown).await,
            (EventKind::Updated, Resource::ActionSet(set)) => self.on_updated(&set, shutdown).await,
            (EventKind::Deleted, Resource::ActionSet(set)) => {
                self.on_deleted(&set);
                Ok(())
            }
            (kind, Resource::Blueprint(blueprint)) => {
                info!(
                    blueprint = %blueprint.name(),
                    namespace = %blueprint.metadata.namespace(),
                    event = ?kind,
                    "Blueprint changed"
                );
                Ok(())
            }
        };

        if let Err(e) = result {
            error!(error = %e, "Failed to handle event");
        }
    }

    async fn on_added(self: &Arc<Self>, set: &ActionSet, shutdown: &CancellationToken) -> Result<()> {
        let namespace = set.namespace();
        let name = set.name();

        // The event may be stale
        let Some(current) = self.store.get_action_set(namespace, name).await? else {
            debug!(action_set = %name, "ActionSet gone before it was handled");
            return Ok(());
        };
        validate::action_set(&current)?;

        if current.status.is_none() {
            self.initialize(&current, shutdown).await?;
        }
        self.start(namespace, name, shutdown).await
    }

    async fn on_updated(self: &Arc<Self>, set: &ActionSet, shutdown: &CancellationToken) -> Result<()> {
        validate::action_set(set)?;
        let Some(status) = &set.status else {
            return Ok(());
        };

        match status.state {
            State::Pending => self.start(set.namespace(), set.name(), shutdown).await,
            State::Running if status.all_phases_complete() => {
                self.complete(set.namespace(), set.name(), shutdown).await
            }
            _ => Ok(()),
        }
    }

    fn on_deleted(&self, set: &ActionSet) {
        let key = set.metadata.key();
        let removed = self
            .runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
        if let Some((_, token)) = removed {
            info!(action_set = %key, "ActionSet deleted, cancelling run");
            token.cancel();
        }
    }

    /// Write the initial status: Pending phases per action, or Failed
    async fn initialize(&self, set: &ActionSet, shutdown: &CancellationToken) -> Result<()> {
        let now = Utc::now();
        let status = match self.build_status(set, now).await {
            Ok(actions) => {
                info!(action_set = %set.name(), actions = actions.len(), "Initialized ActionSet");
                ActionSetStatus::pending(actions)
            }
            Err(e) => {
                warn!(action_set = %set.name(), error = %e, "ActionSet failed to initialize");
                let mut status =
                    ActionSetStatus::pending(set.actions().iter().map(ActionStatus::from_spec).collect());
                status.fail(e.to_string());
                status
            }
        };

        reconcile::action_set(self.store.as_ref(), shutdown, set.namespace(), set.name(), |current| {
            if current.status.is_none() {
                current.status = Some(status.clone());
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn build_status(&self, set: &ActionSet, now: DateTime<Utc>) -> Result<Vec<ActionStatus>> {
        let mut actions = Vec::with_capacity(set.actions().len());
        for spec in set.actions() {
            let prepared = self.prepare_action(set.namespace(), spec, now).await?;
            let mut status = ActionStatus::from_spec(spec);
            status.phases = prepared
                .resolved
                .phases
                .iter()
                .map(|p| skiff_crd::Phase::pending(p.name()))
                .collect();
            status.deferred_phase = prepared
                .resolved
                .deferred
                .as_ref()
                .map(|p| skiff_crd::Phase::pending(p.name()));
            actions.push(status);
        }
        Ok(actions)
    }

    async fn load_blueprint(&self, namespace: &str, name: &str) -> Result<Blueprint> {
        if name.is_empty() {
            return Err(EngineError::BlueprintNotFound("<empty>".to_string()));
        }
        let blueprint = self
            .store
            .get_blueprint(namespace, name)
            .await?
            .ok_or_else(|| EngineError::BlueprintNotFound(name.to_string()))?;
        blueprint.validate()?;
        Ok(blueprint)
    }

    async fn prepare_action(
        &self,
        namespace: &str,
        spec: &ActionSpec,
        now: DateTime<Utc>,
    ) -> Result<PreparedAction> {
        let blueprint = self.load_blueprint(namespace, &spec.blueprint).await?;
        let params = params::fetch(self.store.as_ref(), spec, namespace, now).await?;
        let resolved = self.resolver.resolve(&blueprint, &spec.name, &params)?;
        Ok(PreparedAction {
            action: spec.name.clone(),
            blueprint,
            resolved,
            params,
        })
    }

    async fn prepare_all(&self, set: &ActionSet) -> std::result::Result<Vec<PreparedAction>, (usize, EngineError)> {
        let now = Utc::now();
        let mut prepared = Vec::with_capacity(set.actions().len());
        for (i, spec) in set.actions().iter().enumerate() {
            let action = self
                .prepare_action(set.namespace(), spec, now)
                .await
                .map_err(|e| (i, e))?;
            prepared.push(action);
        }
        Ok(prepared)
    }

    /// Flip Pending to Running and launch; only the flipping caller launches
    async fn start(self: &Arc<Self>, namespace: &str, name: &str, shutdown: &CancellationToken) -> Result<()> {
        let mut flipped = false;
        let set = reconcile::action_set(self.store.as_ref(), shutdown, namespace, name, |set| {
            flipped = false;
            if let Some(status) = set.status.as_mut() {
                if status.state == State::Pending {
                    status.state = State::Running;
                    flipped = true;
                }
            }
            Ok(())
        })
        .await?;
        if !flipped {
            return Ok(());
        }
        info!(action_set = %name, namespace = %namespace, "ActionSet running");

        let launch_timeout = self.config.launch_timeout();
        let prepared = match tokio::time::timeout(launch_timeout, self.prepare_all(&set)).await {
            Ok(Ok(prepared)) => prepared,
            Ok(Err((action, e))) => return self.fail_launch(&set, Some(action), e, shutdown).await,
            Err(_) => {
                return self
                    .fail_launch(&set, None, EngineError::Timeout(launch_timeout), shutdown)
                    .await
            }
        };

        let weights: Arc<dyn PhaseWeights> = if self.config.func_weights.is_empty() {
            Arc::new(UniformWeights)
        } else {
            let resolved: Vec<ResolvedAction> = prepared.iter().map(|p| p.resolved.clone()).collect();
            Arc::new(FuncWeights::new(&self.config.func_weights, &resolved))
        };

        let key = object_key(namespace, name);
        let run_id = self.next_run.fetch_add(1, Ordering::Relaxed);
        let run = shutdown.child_token();
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), (run_id, run.clone()));

        if let Some(deadline) = self.config.action_set_timeout() {
            let run = run.clone();
            let key = key.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = run.cancelled() => {}
                    _ = tokio::time::sleep(deadline) => {
                        warn!(action_set = %key, ?deadline, "ActionSet deadline reached, cancelling");
                        run.cancel();
                    }
                }
            });
        }

        let ctx = Arc::new(RunContext {
            namespace: namespace.to_string(),
            name: name.to_string(),
            run: run.clone(),
            shutdown: shutdown.clone(),
            weights,
        });

        let units: Vec<_> = prepared
            .into_iter()
            .enumerate()
            .map(|(i, action)| {
                let this = self.clone();
                let ctx = ctx.clone();
                tokio::spawn(async move { this.run_action(ctx, i, action).await })
            })
            .collect();

        let this = self.clone();
        tokio::spawn(async move {
            for result in futures::future::join_all(units).await {
                if let Err(e) = result {
                    error!(action_set = %key, error = %e, "Execution unit panicked");
                }
            }
            this.finish_run(&key, run_id);
            debug!(action_set = %key, "All execution units finished");
        });
        Ok(())
    }

    /// Drop the run entry and stop its deadline watchdog
    fn finish_run(&self, key: &str, run_id: u64) {
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        if runs.get(key).map(|(id, _)| *id == run_id).unwrap_or(false) {
            if let Some((_, token)) = runs.remove(key) {
                token.cancel();
            }
        }
    }

    async fn fail_launch(
        &self,
        set: &ActionSet,
        action: Option<usize>,
        err: EngineError,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        warn!(action_set = %set.name(), error = %err, "ActionSet failed to launch");
        let message = err.to_string();
        reconcile::action_set(self.store.as_ref(), shutdown, set.namespace(), set.name(), |current| {
            let Some(status) = current.status.as_mut() else {
                return Ok(());
            };
            if status.state != State::Running {
                return Ok(());
            }
            let first = action.unwrap_or(0);
            if let Some(phase) = status
                .actions
                .get_mut(first)
                .and_then(|a| a.phases.first_mut())
            {
                if phase.state == State::Pending {
                    phase.fail();
                }
            }
            status.fail(message.clone());
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn complete(&self, namespace: &str, name: &str, shutdown: &CancellationToken) -> Result<()> {
        let mut completed = false;
        reconcile::action_set(self.store.as_ref(), shutdown, namespace, name, |set| {
            completed = false;
            if let Some(status) = set.status.as_mut() {
                if status.state == State::Running && status.all_phases_complete() {
                    status.state = State::Complete;
                    progress::mark_complete(status, Utc::now());
                    completed = true;
                }
            }
            Ok(())
        })
        .await?;
        if completed {
            info!(action_set = %name, namespace = %namespace, "ActionSet complete");
        }
        Ok(())
    }

    /// One execution unit: main phases in order, then the deferred phase
    async fn run_action(&self, ctx: Arc<RunContext>, action: usize, prepared: PreparedAction) {
        let PreparedAction {
            action: action_name,
            blueprint,
            resolved,
            mut params,
        } = prepared;
        debug!(action_set = %ctx.name, action = %action_name, "Execution unit started");

        let last = resolved.phases.len().saturating_sub(1);
        for (i, phase) in resolved.phases.iter().enumerate() {
            let artifacts = (i == last).then(|| (&blueprint, action_name.as_str()));
            match self
                .run_phase(&ctx, PhaseIndex::main(action, i), phase, &mut params, artifacts)
                .await
            {
                PhaseOutcome::Completed => {}
                PhaseOutcome::Stopped => break,
                PhaseOutcome::Withdrawn => return,
            }
        }

        if let Some(deferred) = &resolved.deferred {
            let _ = self
                .run_phase(&ctx, PhaseIndex::deferred(action), deferred, &mut params, None)
                .await;
        }
        debug!(action_set = %ctx.name, action = %action_name, "Execution unit finished");
    }

    async fn run_phase(
        &self,
        ctx: &RunContext,
        index: PhaseIndex,
        phase: &resolver::Phase,
        params: &mut TemplateParams,
        artifacts: Option<(&Blueprint, &str)>,
    ) -> PhaseOutcome {
        match self.mark_running(ctx, index).await {
            Ok(true) => {}
            Ok(false) => return PhaseOutcome::Stopped,
            Err(e) if e.is_not_found() || matches!(e, EngineError::Cancelled) => {
                return PhaseOutcome::Withdrawn
            }
            Err(e) => {
                error!(action_set = %ctx.name, phase = %phase.name(), error = %e, "Could not start phase");
                return PhaseOutcome::Stopped;
            }
        }
        info!(action_set = %ctx.name, phase = %phase.name(), func = %phase.func_name(), "Phase started");

        let args = match self.bind_phase(ctx, phase, params).await {
            Ok(args) => args,
            Err(e) => {
                warn!(action_set = %ctx.name, phase = %phase.name(), error = %e, "Phase could not be prepared");
                return match self.record_failure(ctx, index, e.to_string()).await {
                    Err(e) if e.is_not_found() => PhaseOutcome::Withdrawn,
                    _ => PhaseOutcome::Stopped,
                };
            }
        };

        let tracker_token = ctx.run.child_token();
        let tracker = ProgressTracker::new(
            self.store.clone(),
            ctx.namespace.clone(),
            ctx.name.clone(),
            index,
            phase.clone(),
            ctx.weights.clone(),
        )
        .with_interval(self.config.progress_interval());
        let tracker_handle = tokio::spawn(tracker.run(tracker_token.clone()));

        let func_ctx = FuncContext::new(ctx.name.clone(), ctx.namespace.clone(), phase.name())
            .with_cancellation(ctx.run.child_token());
        let result = phase.exec(func_ctx, params, &args).await;

        tracker_token.cancel();
        if let Err(e) = tracker_handle.await {
            warn!(action_set = %ctx.name, phase = %phase.name(), error = %e, "Progress tracker panicked");
        }

        // Others may have written meanwhile
        let current = match self.store.get_action_set(&ctx.namespace, &ctx.name).await {
            Ok(Some(current)) => current,
            Ok(None) => {
                info!(action_set = %ctx.name, phase = %phase.name(), "ActionSet withdrawn");
                return PhaseOutcome::Withdrawn;
            }
            Err(e) => {
                warn!(action_set = %ctx.name, phase = %phase.name(), error = %e, "ActionSet unreadable, treating run as withdrawn");
                return PhaseOutcome::Withdrawn;
            }
        };
        if let Err(e) = validate::action_set(&current) {
            error!(action_set = %ctx.name, error = %e, "ActionSet failed validation");
            return PhaseOutcome::Stopped;
        }
        let already_failed = current.state() == Some(State::Failed);

        let write = match result {
            Ok(output) => {
                let output = output.into_map();
                params.record_phase(phase.name(), output.clone());
                let rendered = artifacts.map(|(blueprint, action)| {
                    resolver::render_output_artifacts(blueprint, action, params).map_err(|e| e.to_string())
                });
                info!(action_set = %ctx.name, phase = %phase.name(), "Phase complete");
                self.record_success(ctx, index, output, rendered).await
            }
            Err(e) => {
                warn!(action_set = %ctx.name, phase = %phase.name(), error = %e, "Phase failed");
                self.record_failure(ctx, index, e.to_string()).await.map(|_| false)
            }
        };

        match write {
            Ok(true) if !already_failed => PhaseOutcome::Completed,
            Ok(_) => PhaseOutcome::Stopped,
            Err(e) if e.is_not_found() => PhaseOutcome::Withdrawn,
            Err(e) => {
                error!(action_set = %ctx.name, phase = %phase.name(), error = %e, "Could not record phase outcome");
                PhaseOutcome::Stopped
            }
        }
    }

    /// Load the phase's Secrets and ConfigMaps into `params`, then render
    /// its arguments against everything recorded so far
    async fn bind_phase(
        &self,
        ctx: &RunContext,
        phase: &resolver::Phase,
        params: &mut TemplateParams,
    ) -> Result<skiff_crd::ValueMap> {
        let objects = phase.render_objects(params)?;
        let fetched = params::fetch_phase_objects(self.store.as_ref(), &objects, &ctx.namespace).await?;
        params.record_phase_objects(phase.name(), fetched.secrets, fetched.config_maps);
        phase.render_args(params)
    }

    /// Main phases start only in a Running set; the deferred phase also
    /// starts once the set Failed
    async fn mark_running(&self, ctx: &RunContext, index: PhaseIndex) -> Result<bool> {
        let deferred = index.slot == PhaseSlot::Deferred;
        let mut started = false;
        reconcile::action_set(self.store.as_ref(), &ctx.shutdown, &ctx.namespace, &ctx.name, |set| {
            started = false;
            let Some(status) = set.status.as_mut() else {
                return Ok(());
            };
            let allowed = match status.state {
                State::Running => true,
                State::Failed => deferred,
                _ => false,
            };
            if !allowed {
                return Ok(());
            }
            let running = status.state == State::Running;
            let Some(phase) = status.phase_mut(index) else {
                return Ok(());
            };
            if phase.state != State::Pending {
                return Ok(());
            }
            phase.start();
            let phase_name = phase.name.clone();
            if running {
                status.progress.running_phase = Some(phase_name);
            }
            started = true;
            Ok(())
        })
        .await?;
        Ok(started)
    }

    /// Returns `false` when rendering output artifacts failed the phase
    async fn record_success(
        &self,
        ctx: &RunContext,
        index: PhaseIndex,
        output: skiff_crd::ValueMap,
        artifacts: Option<std::result::Result<BTreeMap<String, Artifact>, String>>,
    ) -> Result<bool> {
        if let Some(Err(message)) = &artifacts {
            warn!(action_set = %ctx.name, error = %message, "Output artifacts failed to render");
            self.record_failure(ctx, index, format!("rendering output artifacts: {}", message))
                .await?;
            return Ok(false);
        }

        let weights = ctx.weights.clone();
        reconcile::action_set(self.store.as_ref(), &ctx.shutdown, &ctx.namespace, &ctx.name, |set| {
            let now = Utc::now();
            let Some(status) = set.status.as_mut() else {
                return Ok(());
            };
            if let Some(phase) = status.phase_mut(index) {
                if phase.state == State::Running {
                    phase.complete(output.clone(), now);
                }
            }
            if let Some(Ok(rendered)) = &artifacts {
                if let Some(action) = status.actions.get_mut(index.action) {
                    action.artifacts = rendered.clone();
                }
            }
            progress::refresh_action_progress(status, weights.as_ref(), now);
            Ok(())
        })
        .await?;
        Ok(true)
    }

    async fn record_failure(&self, ctx: &RunContext, index: PhaseIndex, message: String) -> Result<()> {
        reconcile::action_set(self.store.as_ref(), &ctx.shutdown, &ctx.namespace, &ctx.name, |set| {
            let Some(status) = set.status.as_mut() else {
                return Ok(());
            };
            if let Some(phase) = status.phase_mut(index) {
                if phase.state == State::Running {
                    phase.fail();
                }
            }
            if status.state == State::Running {
                status.fail(message.clone());
            } else if status.state == State::Failed && status.error.is_empty() {
                status.error.message = message.clone();
            }
            Ok(())
        })
        .await?;
        Ok(())
    }
}
