//! ActionSet resource types
//!
//! An ActionSet is both the request (spec) and the execution record
//! (status) of one workflow run. The spec is written by whoever submits
//! the run; after creation only the controller mutates the object.

use crate::{ObjectMeta, TypeMeta, ValueMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// ActionSet resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionSet {
    /// Type metadata (apiVersion, kind)
    #[serde(flatten)]
    pub type_meta: TypeMeta,

    /// Object metadata (name, namespace, resourceVersion, ...)
    pub metadata: ObjectMeta,

    /// Requested actions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<ActionSetSpec>,

    /// Execution record (set by the controller)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ActionSetStatus>,
}

impl ActionSet {
    /// Create an ActionSet with an empty action list
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            type_meta: TypeMeta::action_set(),
            metadata: ObjectMeta::new(name, namespace),
            spec: Some(ActionSetSpec::default()),
            status: None,
        }
    }

    /// Append a requested action
    pub fn with_action(mut self, action: ActionSpec) -> Self {
        self.spec.get_or_insert_with(ActionSetSpec::default).actions.push(action);
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace()
    }

    /// Requested actions, empty when the spec is missing
    pub fn actions(&self) -> &[ActionSpec] {
        self.spec.as_ref().map(|s| s.actions.as_slice()).unwrap_or(&[])
    }

    /// Current state, `None` before initialization
    pub fn state(&self) -> Option<State> {
        self.status.as_ref().map(|s| s.state)
    }

    /// Whether the run reached Complete or Failed
    pub fn is_terminal(&self) -> bool {
        self.state().map(|s| s.is_terminal()).unwrap_or(false)
    }
}

/// ActionSet specification
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionSetSpec {
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
}

/// Reference to another cluster object
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// API version (e.g., "v1", "apps/v1")
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,

    /// API group, empty for the core group
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,

    /// Plural resource name (e.g., "deployments")
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

impl ObjectReference {
    /// Create a reference by kind, name and namespace
    pub fn new(kind: impl Into<String>, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Set group, version and plural resource
    pub fn with_resource(
        mut self,
        group: impl Into<String>,
        version: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        self.group = group.into();
        self.api_version = version.into();
        self.resource = resource.into();
        self
    }

    /// Namespace of the reference, or `fallback` when it carries none
    pub fn namespace_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        if self.namespace.is_empty() {
            fallback
        } else {
            &self.namespace
        }
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.kind.is_empty() { &self.resource } else { &self.kind };
        if self.namespace.is_empty() {
            write!(f, "{} {}", kind, self.name)
        } else {
            write!(f, "{} {}/{}", kind, self.namespace, self.name)
        }
    }
}

/// One requested action within a run
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionSpec {
    /// Blueprint action to run
    pub name: String,

    /// Object the action runs against
    #[serde(default)]
    pub object: ObjectReference,

    /// Blueprint providing the action
    #[serde(default)]
    pub blueprint: String,

    /// Input artifacts
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub artifacts: BTreeMap<String, Artifact>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config_maps: BTreeMap<String, ObjectReference>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secrets: BTreeMap<String, ObjectReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<ObjectReference>,

    /// Free-form options exposed to templates
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

impl ActionSpec {
    pub fn new(name: impl Into<String>, blueprint: impl Into<String>, object: ObjectReference) -> Self {
        Self {
            name: name.into(),
            object,
            blueprint: blueprint.into(),
            ..Default::default()
        }
    }

    pub fn with_artifact(mut self, name: impl Into<String>, artifact: Artifact) -> Self {
        self.artifacts.insert(name.into(), artifact);
        self
    }

    pub fn with_config_map(mut self, name: impl Into<String>, reference: ObjectReference) -> Self {
        self.config_maps.insert(name.into(), reference);
        self
    }

    pub fn with_secret(mut self, name: impl Into<String>, reference: ObjectReference) -> Self {
        self.secrets.insert(name.into(), reference);
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Artifact produced or consumed by an action
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub key_value: BTreeMap<String, String>,

    /// Snapshot identifier for snapshot-style artifacts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
}

impl Artifact {
    pub fn key_value(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut key_value = BTreeMap::new();
        key_value.insert(key.into(), value.into());
        Self {
            key_value,
            snapshot: None,
        }
    }
}

/// Lifecycle state shared by ActionSets and phases
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum State {
    #[default]
    Pending,
    Running,
    Failed,
    Complete,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Pending => "pending",
            State::Running => "running",
            State::Failed => "failed",
            State::Complete => "complete",
        }
    }

    /// Complete and Failed are terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Complete | State::Failed)
    }

    /// Whether moving from `self` to `next` follows Pending -> Running -> terminal
    pub fn can_transition_to(&self, next: State) -> bool {
        matches!(
            (self, next),
            (State::Pending, State::Running)
                | (State::Pending, State::Failed)
                | (State::Running, State::Complete)
                | (State::Running, State::Failed)
        )
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ActionSet execution record
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionSetStatus {
    #[serde(default)]
    pub state: State,

    /// One entry per requested action, in spec order
    #[serde(default)]
    pub actions: Vec<ActionStatus>,

    #[serde(default)]
    pub progress: ActionProgress,

    #[serde(default, skip_serializing_if = "ErrorStatus::is_empty")]
    pub error: ErrorStatus,
}

impl ActionSetStatus {
    /// Pending status over the given action records
    pub fn pending(actions: Vec<ActionStatus>) -> Self {
        Self {
            state: State::Pending,
            actions,
            ..Default::default()
        }
    }

    /// Mark the run Failed with a message
    pub fn fail(&mut self, message: impl Into<String>) {
        self.state = State::Failed;
        self.error.message = message.into();
        self.progress.running_phase = None;
    }

    /// Every phase of every action, deferred phases included
    pub fn phases(&self) -> impl Iterator<Item = &Phase> {
        self.actions.iter().flat_map(|a| a.all_phases())
    }

    /// Whether every phase (deferred included) is Complete
    pub fn all_phases_complete(&self) -> bool {
        self.phases().all(|p| p.state == State::Complete)
    }

    pub fn any_phase_failed(&self) -> bool {
        self.phases().any(|p| p.state == State::Failed)
    }

    /// Look up a phase by position
    pub fn phase(&self, at: PhaseIndex) -> Option<&Phase> {
        self.actions.get(at.action).and_then(|a| a.phase(at.slot))
    }

    pub fn phase_mut(&mut self, at: PhaseIndex) -> Option<&mut Phase> {
        self.actions.get_mut(at.action).and_then(|a| a.phase_mut(at.slot))
    }
}

/// Error reported on a failed run
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorStatus {
    #[serde(default)]
    pub message: String,
}

impl ErrorStatus {
    pub fn is_empty(&self) -> bool {
        self.message.is_empty()
    }
}

/// Aggregate progress of a run
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionProgress {
    /// Phase most recently started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_phase: Option<String>,

    /// Overall completion percentage, empty until a phase reports
    #[serde(default)]
    pub percent_completed: String,

    #[serde(default)]
    pub uploaded_bytes: u64,

    #[serde(default)]
    pub downloaded_bytes: u64,

    #[serde(default)]
    pub estimated_upload_bytes: u64,

    #[serde(default)]
    pub estimated_download_bytes: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

/// Execution record of one requested action
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionStatus {
    pub name: String,

    #[serde(default)]
    pub object: ObjectReference,

    #[serde(default)]
    pub blueprint: String,

    #[serde(default)]
    pub phases: Vec<Phase>,

    /// Always-run phase, executed after the main phases stop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deferred_phase: Option<Phase>,

    /// Rendered output artifacts
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub artifacts: BTreeMap<String, Artifact>,
}

impl ActionStatus {
    /// Record for an action taken from its spec, with no phases yet
    pub fn from_spec(spec: &ActionSpec) -> Self {
        Self {
            name: spec.name.clone(),
            object: spec.object.clone(),
            blueprint: spec.blueprint.clone(),
            ..Default::default()
        }
    }

    /// Main phases followed by the deferred phase
    pub fn all_phases(&self) -> impl Iterator<Item = &Phase> {
        self.phases.iter().chain(self.deferred_phase.iter())
    }

    pub fn phase(&self, slot: PhaseSlot) -> Option<&Phase> {
        match slot {
            PhaseSlot::Main(i) => self.phases.get(i),
            PhaseSlot::Deferred => self.deferred_phase.as_ref(),
        }
    }

    pub fn phase_mut(&mut self, slot: PhaseSlot) -> Option<&mut Phase> {
        match slot {
            PhaseSlot::Main(i) => self.phases.get_mut(i),
            PhaseSlot::Deferred => self.deferred_phase.as_mut(),
        }
    }
}

/// Position of a phase inside one action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseSlot {
    Main(usize),
    Deferred,
}

/// Position of a phase inside an ActionSet status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhaseIndex {
    pub action: usize,
    pub slot: PhaseSlot,
}

impl PhaseIndex {
    pub fn main(action: usize, phase: usize) -> Self {
        Self {
            action,
            slot: PhaseSlot::Main(phase),
        }
    }

    pub fn deferred(action: usize) -> Self {
        Self {
            action,
            slot: PhaseSlot::Deferred,
        }
    }
}

/// Execution record of one blueprint phase
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    pub name: String,

    #[serde(default)]
    pub state: State,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub output: ValueMap,

    #[serde(default)]
    pub progress: PhaseProgress,
}

impl Phase {
    /// Create a pending phase record
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Mark the phase as running
    pub fn start(&mut self) {
        self.state = State::Running;
    }

    /// Mark the phase complete with its output; progress snaps to 100
    pub fn complete(&mut self, output: ValueMap, now: DateTime<Utc>) {
        self.state = State::Complete;
        self.output = output;
        if self.progress.progress_percent != "100" {
            self.progress.progress_percent = "100".to_string();
            self.progress.last_transition_time = Some(now);
        }
    }

    /// Mark the phase as failed
    pub fn fail(&mut self) {
        self.state = State::Failed;
    }
}

/// Transfer telemetry for one phase
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PhaseProgress {
    #[serde(default)]
    pub progress_percent: String,

    #[serde(default)]
    pub uploaded_bytes: u64,

    #[serde(default)]
    pub downloaded_bytes: u64,

    #[serde(default)]
    pub estimated_upload_bytes: u64,

    #[serde(default)]
    pub estimated_download_bytes: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl PhaseProgress {
    /// Parsed percentage, `None` if never reported
    pub fn percent(&self) -> Option<f64> {
        self.progress_percent.parse::<f64>().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    fn deployment() -> ObjectReference {
        ObjectReference::new("Deployment", "web", "apps")
    }

    #[test]
    fn test_action_set_new() {
        let set = ActionSet::new("backup-1", "apps")
            .with_action(ActionSpec::new("backup", "web-blueprint", deployment()));

        assert_eq!(set.name(), "backup-1");
        assert_eq!(set.namespace(), "apps");
        assert_eq!(set.actions().len(), 1);
        assert_eq!(set.type_meta.kind, "ActionSet");
        assert!(set.state().is_none());
        assert!(!set.is_terminal());
    }

    #[test]
    fn test_state_transitions() {
        assert!(State::Pending.can_transition_to(State::Running));
        assert!(State::Running.can_transition_to(State::Complete));
        assert!(State::Running.can_transition_to(State::Failed));
        assert!(!State::Complete.can_transition_to(State::Running));
        assert!(!State::Pending.can_transition_to(State::Complete));
        assert!(State::Failed.is_terminal());
        assert!(!State::Running.is_terminal());
    }

    #[test]
    fn test_phase_lifecycle() {
        let mut phase = Phase::pending("copy");
        assert_eq!(phase.state, State::Pending);
        assert!(phase.progress.percent().is_none());

        phase.start();
        assert_eq!(phase.state, State::Running);

        let mut output = ValueMap::new();
        output.insert("path".to_string(), Value::from("/data"));
        let now = Utc::now();
        phase.complete(output, now);

        assert_eq!(phase.state, State::Complete);
        assert_eq!(phase.progress.percent(), Some(100.0));
        assert_eq!(phase.progress.last_transition_time, Some(now));
        assert_eq!(phase.output["path"], Value::from("/data"));
    }

    #[test]
    fn test_status_phase_navigation() {
        let mut status = ActionSetStatus::pending(vec![ActionStatus {
            name: "backup".to_string(),
            phases: vec![Phase::pending("one"), Phase::pending("two")],
            deferred_phase: Some(Phase::pending("cleanup")),
            ..Default::default()
        }]);

        assert_eq!(status.phases().count(), 3);
        assert_eq!(status.phase(PhaseIndex::main(0, 1)).map(|p| p.name.as_str()), Some("two"));
        assert_eq!(
            status.phase(PhaseIndex::deferred(0)).map(|p| p.name.as_str()),
            Some("cleanup")
        );
        assert!(status.phase(PhaseIndex::main(1, 0)).is_none());

        if let Some(phase) = status.phase_mut(PhaseIndex::main(0, 0)) {
            phase.fail();
        }
        assert!(status.any_phase_failed());
        assert!(!status.all_phases_complete());
    }

    #[test]
    fn test_status_fail_sets_message() {
        let mut status = ActionSetStatus::pending(Vec::new());
        status.progress.running_phase = Some("copy".to_string());
        status.fail("blueprint not found: web");
        assert_eq!(status.state, State::Failed);
        assert_eq!(status.error.message, "blueprint not found: web");
        assert!(status.progress.running_phase.is_none());
    }

    #[test]
    fn test_action_set_wire_format() {
        let json = r#"{
            "apiVersion": "cr.skiff.dev/v1alpha1",
            "kind": "ActionSet",
            "metadata": {"name": "backup-1", "namespace": "apps", "resourceVersion": "7"},
            "spec": {"actions": [{
                "name": "backup",
                "blueprint": "web-blueprint",
                "object": {"kind": "Deployment", "name": "web", "namespace": "apps"},
                "configMaps": {"location": {"name": "s3-config", "namespace": "apps"}},
                "options": {"mode": "full"}
            }]},
            "status": {"state": "running", "actions": [{
                "name": "backup",
                "phases": [{"name": "copy", "state": "complete", "output": {"size": 10}}]
            }]}
        }"#;

        let set: ActionSet = serde_json::from_str(json).unwrap();
        assert_eq!(set.metadata.resource_version.as_deref(), Some("7"));
        assert_eq!(set.actions()[0].config_maps["location"].name, "s3-config");
        assert_eq!(set.state(), Some(State::Running));
        let status = set.status.as_ref().unwrap();
        assert_eq!(status.actions[0].phases[0].output["size"], Value::Integer(10));

        let back = serde_json::to_value(&set).unwrap();
        assert_eq!(back["status"]["state"], "running");
        assert_eq!(back["spec"]["actions"][0]["options"]["mode"], "full");
        assert!(back["status"].get("error").is_none());
    }

    #[test]
    fn test_object_reference_display() {
        assert_eq!(deployment().to_string(), "Deployment apps/web");
        let cluster_scoped = ObjectReference::new("Namespace", "apps", "");
        assert_eq!(cluster_scoped.to_string(), "Namespace apps");
        assert_eq!(cluster_scoped.namespace_or("default"), "default");
    }
}
