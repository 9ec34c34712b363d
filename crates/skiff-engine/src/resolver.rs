//! Phase resolution
//!
//! Binds a blueprint action's declared phases to registered functions.
//! Every function (the deferred phase's included) is checked up front, so
//! an unresolvable later phase is caught before the first one runs.
//! Arguments and object references stay templates until their phase is
//! about to run; only then can they see earlier phases' outputs.

use crate::error::{EngineError, Result};
use crate::render;
use skiff_crd::{Artifact, Blueprint, BlueprintAction, BlueprintPhase, ObjectReference, ValueMap};
use skiff_functions::{
    Func, FuncContext, FuncError, FuncOutput, FuncRegistry, LatestProgress, Progress,
    TemplateParams,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// A blueprint phase bound to its function
#[derive(Clone)]
pub struct Phase {
    name: String,
    func: Arc<dyn Func>,
    args: ValueMap,
    objects: BTreeMap<String, ObjectReference>,
    progress: Arc<LatestProgress>,
}

impl Phase {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn func_name(&self) -> &str {
        self.func.name()
    }

    /// Render the phase's object references against `params`
    pub fn render_objects(&self, params: &TemplateParams) -> Result<BTreeMap<String, ObjectReference>> {
        render::render_object_refs(&self.objects, params)
    }

    /// Render the phase's arguments against `params` and check them
    /// against what the function requires and supports
    pub fn render_args(&self, params: &TemplateParams) -> Result<ValueMap> {
        let args = render::render_args(&self.args, params)?;
        check_args(self.func.as_ref(), &args).map_err(|e| EngineError::function(&self.name, e))?;
        Ok(args)
    }

    /// Run the bound function with rendered `args`
    ///
    /// Progress the function reports lands in this phase's slot and is
    /// visible through [`Phase::progress`].
    pub async fn exec(
        &self,
        ctx: FuncContext,
        params: &TemplateParams,
        args: &ValueMap,
    ) -> Result<FuncOutput> {
        let ctx = ctx.with_progress_reporter(self.progress.clone());
        self.func
            .exec(&ctx, params, args)
            .await
            .map_err(|e| EngineError::function(&self.name, e))
    }

    /// Newest progress snapshot, `None` if the function never reported
    pub fn progress(&self) -> Option<Progress> {
        self.progress.latest()
    }
}

impl std::fmt::Debug for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Phase")
            .field("name", &self.name)
            .field("func", &self.func.name())
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// Bound phases of one action
#[derive(Debug, Clone)]
pub struct ResolvedAction {
    pub phases: Vec<Phase>,
    pub deferred: Option<Phase>,
}

impl ResolvedAction {
    /// Main phases followed by the deferred phase
    pub fn all_phases(&self) -> impl Iterator<Item = &Phase> {
        self.phases.iter().chain(self.deferred.iter())
    }
}

/// Turns blueprint actions into executable phases
#[derive(Debug, Clone)]
pub struct Resolver {
    registry: Arc<FuncRegistry>,
}

impl Resolver {
    pub fn new(registry: Arc<FuncRegistry>) -> Self {
        Self { registry }
    }

    /// Resolve `action` of `blueprint` against `params`
    pub fn resolve(
        &self,
        blueprint: &Blueprint,
        action: &str,
        params: &TemplateParams,
    ) -> Result<ResolvedAction> {
        let bp_action = blueprint
            .action(action)
            .ok_or_else(|| EngineError::ActionNotFound {
                blueprint: blueprint.name().to_string(),
                action: action.to_string(),
            })?;

        for phase in bp_action.all_phases() {
            if !self.registry.contains(&phase.func) {
                return Err(EngineError::function(
                    &phase.name,
                    FuncError::NotRegistered(phase.func.clone()),
                ));
            }
        }

        check_inputs(bp_action, params)?;

        let phases = bp_action
            .phases
            .iter()
            .map(|p| self.bind(p))
            .collect::<Result<Vec<_>>>()?;
        let deferred = bp_action.defer_phase.as_ref().map(|p| self.bind(p)).transpose()?;

        debug!(
            blueprint = %blueprint.name(),
            action = %action,
            phases = phases.len(),
            deferred = deferred.is_some(),
            "Resolved action"
        );
        Ok(ResolvedAction { phases, deferred })
    }

    fn bind(&self, phase: &BlueprintPhase) -> Result<Phase> {
        let func = self.registry.require(&phase.func).map_err(|e| EngineError::function(&phase.name, e))?;
        Ok(Phase {
            name: phase.name.clone(),
            func,
            args: phase.args.clone(),
            objects: phase.objects.clone(),
            progress: Arc::new(LatestProgress::new()),
        })
    }
}

fn check_inputs(action: &BlueprintAction, params: &TemplateParams) -> Result<()> {
    for name in &action.config_map_names {
        if !params.config_maps.contains_key(name) {
            return Err(EngineError::MissingInput {
                kind: "configMap",
                name: name.clone(),
            });
        }
    }
    for name in &action.secret_names {
        if !params.secrets.contains_key(name) {
            return Err(EngineError::MissingInput {
                kind: "secret",
                name: name.clone(),
            });
        }
    }
    for name in &action.input_artifact_names {
        if !params.artifacts_in.contains_key(name) {
            return Err(EngineError::MissingInput {
                kind: "artifact",
                name: name.clone(),
            });
        }
    }
    Ok(())
}

fn check_args(func: &dyn Func, args: &ValueMap) -> std::result::Result<(), FuncError> {
    for required in func.required_args() {
        if !args.contains_key(required) {
            return Err(FuncError::MissingArgument {
                func: func.name().to_string(),
                arg: required.to_string(),
            });
        }
    }

    let supported = func.arguments();
    if !supported.is_empty() {
        if let Some(extra) = args.keys().find(|k| !supported.contains(&k.as_str())) {
            return Err(FuncError::UnsupportedArgument {
                func: func.name().to_string(),
                arg: extra.clone(),
            });
        }
    }
    Ok(())
}

/// Render the output artifacts `action` declares
///
/// `params` should carry every completed phase's output.
pub fn render_output_artifacts(
    blueprint: &Blueprint,
    action: &str,
    params: &TemplateParams,
) -> Result<BTreeMap<String, Artifact>> {
    match blueprint.action(action) {
        Some(bp_action) => render::render_artifacts(&bp_action.output_artifacts, params),
        None => Err(EngineError::ActionNotFound {
            blueprint: blueprint.name().to_string(),
            action: action.to_string(),
        }),
    }
}
