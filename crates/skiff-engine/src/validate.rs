//! ActionSet invariant checks
//!
//! Every function here is pure. A violation aborts the enclosing
//! operation; nothing is ever repaired.

use crate::error::{EngineError, Result};
use skiff_crd::{ActionSet, ActionSetStatus, ActionSpec, ActionStatus, ObjectReference, State};

/// Validate spec and status of an ActionSet
pub fn action_set(action_set: &ActionSet) -> Result<()> {
    let namespace = action_set.namespace();
    for (i, spec) in action_set.actions().iter().enumerate() {
        action_spec(spec, namespace).map_err(|e| prefix(format!("spec.actions[{}]", i), e))?;
    }

    if let Some(status) = &action_set.status {
        if status.actions.len() != action_set.actions().len() {
            return Err(EngineError::Invariant(format!(
                "status has {} actions but spec has {}",
                status.actions.len(),
                action_set.actions().len()
            )));
        }
        action_set_status(status)?;
    }
    Ok(())
}

/// Validate one requested action against the ActionSet namespace
pub fn action_spec(spec: &ActionSpec, namespace: &str) -> Result<()> {
    object_reference(&spec.object, "object")?;

    for (name, reference) in &spec.config_maps {
        same_namespace(reference, namespace, "configMap", name)?;
    }
    for (name, reference) in &spec.secrets {
        same_namespace(reference, namespace, "secret", name)?;
    }
    Ok(())
}

fn same_namespace(
    reference: &ObjectReference,
    namespace: &str,
    kind: &str,
    name: &str,
) -> Result<()> {
    if reference.namespace.is_empty() || reference.namespace == namespace {
        return Ok(());
    }
    Err(EngineError::Invariant(format!(
        "{} '{}' is in namespace '{}', expected '{}'",
        kind, name, reference.namespace, namespace
    )))
}

/// A reference must name an object and carry a kind or resource
pub fn object_reference(reference: &ObjectReference, field: &str) -> Result<()> {
    if reference.name.is_empty() {
        return Err(EngineError::Invariant(format!("{}.name is empty", field)));
    }
    if reference.kind.is_empty() && reference.resource.is_empty() {
        return Err(EngineError::Invariant(format!(
            "{} needs a kind or resource",
            field
        )));
    }
    Ok(())
}

/// Validate the execution record
pub fn action_set_status(status: &ActionSetStatus) -> Result<()> {
    for action in &status.actions {
        action_status(action)?;
        deferred_phase(action, status.state)?;
    }

    let any_failed = status.any_phase_failed();
    match status.state {
        State::Pending => {
            if let Some(p) = status.phases().find(|p| p.state != State::Pending) {
                return Err(EngineError::Invariant(format!(
                    "actionset is pending but phase '{}' is {}",
                    p.name, p.state
                )));
            }
        }
        State::Running => {
            if any_failed {
                return Err(EngineError::Invariant(
                    "actionset is running but a phase failed".to_string(),
                ));
            }
        }
        State::Complete => {
            if let Some(p) = status.phases().find(|p| p.state != State::Complete) {
                return Err(EngineError::Invariant(format!(
                    "actionset is complete but phase '{}' is {}",
                    p.name, p.state
                )));
            }
        }
        State::Failed => {
            if !any_failed && status.error.is_empty() {
                return Err(EngineError::Invariant(
                    "actionset failed without a failed phase or error message".to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// Phases run strictly in order
pub fn action_status(action: &ActionStatus) -> Result<()> {
    let mut unfinished: Option<&str> = None;
    for phase in &action.phases {
        if let Some(blocker) = unfinished {
            if phase.state != State::Pending {
                return Err(EngineError::Invariant(format!(
                    "action '{}': phase '{}' is {} before '{}' completed",
                    action.name, phase.name, phase.state, blocker
                )));
            }
        } else if phase.state != State::Complete {
            unfinished = Some(&phase.name);
        }
    }
    Ok(())
}

/// The deferred phase starts only once the main phases stopped: all of
/// them Complete, or the run Failed. No main phase may still be Running.
fn deferred_phase(action: &ActionStatus, set_state: State) -> Result<()> {
    let Some(deferred) = &action.deferred_phase else {
        return Ok(());
    };
    if deferred.state == State::Pending {
        return Ok(());
    }

    let main_running = action.phases.iter().any(|p| p.state == State::Running);
    let main_done = action.phases.iter().all(|p| p.state == State::Complete);
    if main_running || !(main_done || set_state == State::Failed) {
        return Err(EngineError::Invariant(format!(
            "action '{}': deferred phase '{}' is {} while main phases are unfinished",
            action.name, deferred.name, deferred.state
        )));
    }
    Ok(())
}

/// Check the set-level state change between two copies of an ActionSet
///
/// A first status may start anywhere; after that the state only moves
/// forward along `Pending -> Running -> {Complete | Failed}`.
pub fn transition(before: &ActionSet, after: &ActionSet) -> Result<()> {
    match (before.state(), after.state()) {
        (None, _) => Ok(()),
        (Some(from), None) => Err(EngineError::Invariant(format!("status removed from {} actionset", from))),
        (Some(from), Some(to)) if from == to || from.can_transition_to(to) => Ok(()),
        (Some(from), Some(to)) => Err(EngineError::Invariant(format!(
            "actionset cannot move from {} to {}",
            from, to
        ))),
    }
}

fn prefix(field: String, err: EngineError) -> EngineError {
    match err {
        EngineError::Invariant(msg) => EngineError::Invariant(format!("{}: {}", field, msg)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_crd::Phase;

    fn deployment() -> ObjectReference {
        ObjectReference::new("Deployment", "web", "apps")
    }

    fn action_with(states: &[State]) -> ActionStatus {
        ActionStatus {
            name: "backup".to_string(),
            object: deployment(),
            blueprint: "bp".to_string(),
            phases: states
                .iter()
                .enumerate()
                .map(|(i, s)| Phase {
                    state: *s,
                    ..Phase::pending(format!("p{}", i))
                })
                .collect(),
            ..Default::default()
        }
    }

    fn set_with(state: State, actions: Vec<ActionStatus>) -> ActionSet {
        let mut set = ActionSet::new("as", "apps");
        for _ in &actions {
            set = set.with_action(ActionSpec::new("backup", "bp", deployment()));
        }
        set.status = Some(ActionSetStatus {
            state,
            actions,
            ..Default::default()
        });
        set
    }

    #[test]
    fn test_valid_without_status() {
        let set = ActionSet::new("as", "apps").with_action(ActionSpec::new("backup", "bp", deployment()));
        assert!(action_set(&set).is_ok());
    }

    #[test]
    fn test_action_count_mismatch() {
        let mut set = set_with(State::Pending, vec![action_with(&[State::Pending])]);
        set.spec.as_mut().unwrap().actions.clear();
        assert!(matches!(action_set(&set), Err(EngineError::Invariant(_))));
    }

    #[test]
    fn test_cross_namespace_secret_rejected() {
        let spec = ActionSpec::new("backup", "bp", deployment())
            .with_secret("creds", ObjectReference::new("Secret", "creds", "kube-system"));
        let err = action_spec(&spec, "apps").unwrap_err();
        assert!(err.to_string().contains("kube-system"));

        let spec = ActionSpec::new("backup", "bp", deployment())
            .with_config_map("cfg", ObjectReference::new("ConfigMap", "cfg", ""))
            .with_secret("creds", ObjectReference::new("Secret", "creds", "apps"));
        assert!(action_spec(&spec, "apps").is_ok());
    }

    #[test]
    fn test_object_reference_requires_name_and_kind() {
        assert!(object_reference(&ObjectReference::new("Deployment", "", "apps"), "object").is_err());
        assert!(object_reference(&ObjectReference::new("", "web", "apps"), "object").is_err());
        let by_resource = ObjectReference::new("", "web", "apps").with_resource("apps", "v1", "deployments");
        assert!(object_reference(&by_resource, "object").is_ok());
    }

    #[test]
    fn test_phase_ordering() {
        use State::*;
        assert!(action_status(&action_with(&[Complete, Running, Pending])).is_ok());
        assert!(action_status(&action_with(&[Complete, Failed, Pending])).is_ok());
        assert!(action_status(&action_with(&[Running, Running])).is_err());
        assert!(action_status(&action_with(&[Pending, Complete])).is_err());
        assert!(action_status(&action_with(&[Failed, Complete])).is_err());
    }

    #[test]
    fn test_deferred_phase_waits() {
        let mut action = action_with(&[State::Running]);
        action.deferred_phase = Some(Phase {
            state: State::Running,
            ..Phase::pending("cleanup")
        });
        assert!(deferred_phase(&action, State::Running).is_err());

        action.phases[0].state = State::Complete;
        assert!(deferred_phase(&action, State::Running).is_ok());
    }

    #[test]
    fn test_deferred_phase_after_failure() {
        // Run failed elsewhere; this action's second phase never started
        let mut action = action_with(&[State::Complete, State::Pending]);
        action.deferred_phase = Some(Phase {
            state: State::Running,
            ..Phase::pending("cleanup")
        });
        assert!(deferred_phase(&action, State::Running).is_err());
        assert!(deferred_phase(&action, State::Failed).is_ok());
    }

    #[test]
    fn test_state_consistency() {
        use State::*;
        assert!(action_set(&set_with(Pending, vec![action_with(&[Pending, Pending])])).is_ok());
        assert!(action_set(&set_with(Pending, vec![action_with(&[Running, Pending])])).is_err());
        assert!(action_set(&set_with(Running, vec![action_with(&[Complete, Running])])).is_ok());
        assert!(action_set(&set_with(Running, vec![action_with(&[Failed])])).is_err());
        assert!(action_set(&set_with(Complete, vec![action_with(&[Complete, Complete])])).is_ok());
        assert!(action_set(&set_with(Complete, vec![action_with(&[Complete, Running])])).is_err());
        assert!(action_set(&set_with(Failed, vec![action_with(&[Complete, Failed])])).is_ok());
        assert!(action_set(&set_with(Failed, vec![action_with(&[Complete, Pending])])).is_err());
    }

    #[test]
    fn test_failed_with_message_needs_no_phase() {
        let mut set = set_with(State::Failed, vec![ActionStatus::default()]);
        assert!(action_set(&set).is_err());

        set.status.as_mut().unwrap().error.message = "blueprint not found: bp".to_string();
        assert!(action_set(&set).is_ok());
    }

    #[test]
    fn test_empty_set_complete() {
        let mut set = ActionSet::new("empty", "apps");
        set.status = Some(ActionSetStatus {
            state: State::Complete,
            ..Default::default()
        });
        assert!(action_set(&set).is_ok());
    }

    #[test]
    fn test_validation_is_idempotent() {
        let set = set_with(State::Running, vec![action_with(&[State::Complete, State::Pending])]);
        let first = action_set(&set).is_ok();
        let second = action_set(&set).is_ok();
        assert_eq!(first, second);
    }

    #[test]
    fn test_transition_moves_forward_only() {
        let pending = set_with(State::Pending, vec![action_with(&[State::Pending])]);
        let running = set_with(State::Running, vec![action_with(&[State::Running])]);
        let complete = set_with(State::Complete, vec![action_with(&[State::Complete])]);

        assert!(transition(&ActionSet::new("as", "apps"), &complete).is_ok());
        assert!(transition(&pending, &running).is_ok());
        assert!(transition(&running, &running).is_ok());
        assert!(transition(&running, &complete).is_ok());

        let err = transition(&complete, &running).unwrap_err();
        assert_eq!(err.to_string(), "invariant violated: actionset cannot move from complete to running");
        assert!(transition(&pending, &complete).is_err());
    }
}
