//! Template parameters handed to argument rendering and to functions

use serde::{Deserialize, Serialize};
use skiff_crd::{Artifact, Value, ValueMap};
use std::collections::BTreeMap;

/// Values available to blueprint templates
///
/// Keys are PascalCase on the template side, e.g.
/// `{{ Object.metadata.name }}` or `{{ Phases.upload.Output.path }}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateParams {
    /// Introspected target object
    pub object: Value,

    /// ConfigMap data by the name the ActionSpec gave it
    pub config_maps: BTreeMap<String, BTreeMap<String, String>>,

    /// Decoded Secret data by the name the ActionSpec gave it
    pub secrets: BTreeMap<String, BTreeMap<String, String>>,

    pub artifacts_in: BTreeMap<String, Artifact>,

    pub options: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Value>,

    /// Render time, RFC 3339 UTC
    pub time: String,

    /// Per-phase objects and outputs of phases completed so far
    pub phases: BTreeMap<String, PhaseParams>,
}

impl TemplateParams {
    /// Record a completed phase's output for later templates
    pub fn record_phase(&mut self, name: impl Into<String>, output: ValueMap) {
        self.phases.entry(name.into()).or_default().output = output;
    }

    /// Attach the Secrets and ConfigMaps a phase references, keyed by the
    /// name the phase gave them
    pub fn record_phase_objects(
        &mut self,
        name: impl Into<String>,
        secrets: BTreeMap<String, BTreeMap<String, String>>,
        config_maps: BTreeMap<String, BTreeMap<String, String>>,
    ) {
        let phase = self.phases.entry(name.into()).or_default();
        phase.secrets = secrets;
        phase.config_maps = config_maps;
    }
}

/// Per-phase template values
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct PhaseParams {
    #[serde(default)]
    pub output: ValueMap,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secrets: BTreeMap<String, BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config_maps: BTreeMap<String, BTreeMap<String, String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_keys_are_pascal_case() {
        let mut params = TemplateParams {
            time: "2026-01-01T00:00:00Z".to_string(),
            ..Default::default()
        };
        let mut output = ValueMap::new();
        output.insert("path".to_string(), Value::from("/snap/1"));
        params.record_phase("upload", output);

        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["Time"], "2026-01-01T00:00:00Z");
        assert_eq!(json["Phases"]["upload"]["Output"]["path"], "/snap/1");
        assert!(json.get("Profile").is_none());
    }

    #[test]
    fn test_phase_objects_survive_output() {
        let mut params = TemplateParams::default();
        let mut creds = BTreeMap::new();
        creds.insert("password".to_string(), "hunter2".to_string());
        let mut secrets = BTreeMap::new();
        secrets.insert("creds".to_string(), creds);
        params.record_phase_objects("upload", secrets, BTreeMap::new());

        let mut output = ValueMap::new();
        output.insert("path".to_string(), Value::from("/snap/1"));
        params.record_phase("upload", output);

        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["Phases"]["upload"]["Secrets"]["creds"]["password"], "hunter2");
        assert_eq!(json["Phases"]["upload"]["Output"]["path"], "/snap/1");
        assert!(json["Phases"]["upload"].get("ConfigMaps").is_none());
    }
}
