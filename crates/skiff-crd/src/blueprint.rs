//! Blueprint resource types
//!
//! Blueprints declare named actions, each an ordered list of phases bound
//! to registered functions by name. Blueprints are read-only to the engine.

use crate::{Artifact, CrdError, ObjectMeta, ObjectReference, Result, TypeMeta, ValueMap};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Blueprint resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blueprint {
    /// Type metadata (apiVersion, kind)
    #[serde(flatten)]
    pub type_meta: TypeMeta,

    pub metadata: ObjectMeta,

    /// Actions by name
    #[serde(default)]
    pub actions: BTreeMap<String, BlueprintAction>,
}

impl Blueprint {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            type_meta: TypeMeta::blueprint(),
            metadata: ObjectMeta::new(name, namespace),
            actions: BTreeMap::new(),
        }
    }

    /// Add an action under `name`
    pub fn with_action(mut self, name: impl Into<String>, mut action: BlueprintAction) -> Self {
        let name = name.into();
        if action.name.is_empty() {
            action.name = name.clone();
        }
        self.actions.insert(name, action);
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn action(&self, name: &str) -> Option<&BlueprintAction> {
        self.actions.get(name)
    }

    /// Validate the blueprint
    pub fn validate(&self) -> Result<()> {
        if self.metadata.name.is_empty() {
            return Err(CrdError::MissingField("metadata.name".to_string()));
        }

        for (name, action) in &self.actions {
            action.validate().map_err(|e| CrdError::InvalidFieldValue {
                field: format!("actions.{}", name),
                message: e.to_string(),
            })?;
        }

        Ok(())
    }
}

/// One named action of a blueprint
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlueprintAction {
    #[serde(default)]
    pub name: String,

    /// Kind of object the action targets
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    /// ConfigMaps the ActionSpec must supply
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_map_names: Vec<String>,

    /// Secrets the ActionSpec must supply
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secret_names: Vec<String>,

    /// Input artifacts the ActionSpec must supply
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_artifact_names: Vec<String>,

    /// Artifact templates rendered once the action's phases complete
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub output_artifacts: BTreeMap<String, Artifact>,

    #[serde(default)]
    pub phases: Vec<BlueprintPhase>,

    /// Phase that always runs after the others stop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defer_phase: Option<BlueprintPhase>,
}

impl BlueprintAction {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn with_phase(mut self, phase: BlueprintPhase) -> Self {
        self.phases.push(phase);
        self
    }

    pub fn with_defer_phase(mut self, phase: BlueprintPhase) -> Self {
        self.defer_phase = Some(phase);
        self
    }

    pub fn with_output_artifact(mut self, name: impl Into<String>, artifact: Artifact) -> Self {
        self.output_artifacts.insert(name.into(), artifact);
        self
    }

    /// Main phases followed by the deferred phase
    pub fn all_phases(&self) -> impl Iterator<Item = &BlueprintPhase> {
        self.phases.iter().chain(self.defer_phase.iter())
    }

    /// Validate phases: non-empty, named, bound to a function, unique names
    pub fn validate(&self) -> Result<()> {
        if self.phases.is_empty() {
            return Err(CrdError::MissingField("phases".to_string()));
        }

        let mut seen = HashSet::new();
        for (i, phase) in self.all_phases().enumerate() {
            let field = if i < self.phases.len() {
                format!("phases[{}]", i)
            } else {
                "deferPhase".to_string()
            };

            if phase.name.is_empty() {
                return Err(CrdError::MissingField(format!("{}.name", field)));
            }
            if phase.func.is_empty() {
                return Err(CrdError::MissingField(format!("{}.func", field)));
            }
            if !seen.insert(phase.name.as_str()) {
                return Err(CrdError::InvalidFieldValue {
                    field,
                    message: format!("duplicate phase name '{}'", phase.name),
                });
            }
        }

        Ok(())
    }
}

/// One declarative step
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlueprintPhase {
    /// Registered function to invoke
    pub func: String,

    pub name: String,

    /// Extra objects the phase needs, rendered like arguments
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub objects: BTreeMap<String, ObjectReference>,

    /// Argument templates
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: ValueMap,
}

impl BlueprintPhase {
    pub fn new(name: impl Into<String>, func: impl Into<String>) -> Self {
        Self {
            func: func.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<crate::Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    pub fn with_object(mut self, key: impl Into<String>, reference: ObjectReference) -> Self {
        self.objects.insert(key.into(), reference);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    fn backup_action() -> BlueprintAction {
        BlueprintAction::new("Deployment")
            .with_phase(BlueprintPhase::new("snapshot", "Snapshot").with_arg("path", "/data"))
            .with_phase(BlueprintPhase::new("upload", "Upload"))
            .with_defer_phase(BlueprintPhase::new("cleanup", "Cleanup"))
    }

    #[test]
    fn test_blueprint_new() {
        let bp = Blueprint::new("web-blueprint", "apps").with_action("backup", backup_action());

        assert_eq!(bp.name(), "web-blueprint");
        assert_eq!(bp.type_meta.kind, "Blueprint");
        let action = bp.action("backup").unwrap();
        assert_eq!(action.name, "backup");
        assert_eq!(action.all_phases().count(), 3);
        assert!(bp.action("restore").is_none());
        assert!(bp.validate().is_ok());
    }

    #[test]
    fn test_blueprint_validation() {
        let bp = Blueprint::new("", "apps");
        assert!(matches!(bp.validate(), Err(CrdError::MissingField(_))));

        let bp = Blueprint::new("bp", "apps").with_action("empty", BlueprintAction::new("Deployment"));
        assert!(matches!(bp.validate(), Err(CrdError::InvalidFieldValue { .. })));

        let action = BlueprintAction::new("Deployment").with_phase(BlueprintPhase::new("one", ""));
        assert!(matches!(action.validate(), Err(CrdError::MissingField(f)) if f == "phases[0].func"));
    }

    #[test]
    fn test_duplicate_phase_names_rejected() {
        let action = BlueprintAction::new("Deployment")
            .with_phase(BlueprintPhase::new("copy", "Copy"))
            .with_defer_phase(BlueprintPhase::new("copy", "Cleanup"));

        let err = action.validate().unwrap_err();
        assert!(err.to_string().contains("deferPhase"));
        assert!(err.to_string().contains("duplicate phase name 'copy'"));
    }

    #[test]
    fn test_blueprint_yaml_shape() {
        let json = r#"{
            "apiVersion": "cr.skiff.dev/v1alpha1",
            "kind": "Blueprint",
            "metadata": {"name": "web-blueprint", "namespace": "apps"},
            "actions": {"backup": {
                "kind": "Deployment",
                "secretNames": ["creds"],
                "outputArtifacts": {"cloud": {"keyValue": {"path": "{{ Phases.upload.Output.path }}"}}},
                "phases": [{"func": "Upload", "name": "upload",
                            "args": {"retries": 3, "targets": ["a", "b"]}}]
            }}
        }"#;

        let bp: Blueprint = serde_json::from_str(json).unwrap();
        let action = bp.action("backup").unwrap();
        assert_eq!(action.secret_names, vec!["creds".to_string()]);
        assert_eq!(action.phases[0].args["retries"], Value::Integer(3));
        assert!(action.output_artifacts["cloud"].key_value["path"].contains("Phases.upload"));
        assert!(action.defer_phase.is_none());
    }
}
