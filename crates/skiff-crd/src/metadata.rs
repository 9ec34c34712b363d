//! Common metadata types for resources

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Namespace used when an object carries none
pub const DEFAULT_NAMESPACE: &str = "default";

/// Kubernetes-style object metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Resource name (required)
    #[serde(default)]
    pub name: String,

    /// Namespace (optional, defaults to "default")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Unique identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uuid>,

    /// Resource version used for compare-and-swap writes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

impl ObjectMeta {
    /// Create metadata with a name and namespace
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    /// Namespace, falling back to [`DEFAULT_NAMESPACE`]
    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }

    /// `namespace/name` key used for in-process bookkeeping
    pub fn key(&self) -> String {
        object_key(self.namespace(), &self.name)
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Build the `namespace/name` key for an object
pub fn object_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// Type metadata for resource objects
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypeMeta {
    /// API version (e.g., "cr.skiff.dev/v1alpha1")
    pub api_version: String,

    /// Kind (e.g., "ActionSet", "Blueprint")
    pub kind: String,
}

impl TypeMeta {
    /// Type metadata for ActionSet
    pub fn action_set() -> Self {
        Self {
            api_version: crate::API_VERSION.to_string(),
            kind: "ActionSet".to_string(),
        }
    }

    /// Type metadata for Blueprint
    pub fn blueprint() -> Self {
        Self {
            api_version: crate::API_VERSION.to_string(),
            kind: "Blueprint".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_meta_new() {
        let meta = ObjectMeta::new("backup-1", "apps");
        assert_eq!(meta.name, "backup-1");
        assert_eq!(meta.namespace(), "apps");
        assert_eq!(meta.key(), "apps/backup-1");
        assert!(meta.resource_version.is_none());
    }

    #[test]
    fn test_object_meta_default_namespace() {
        let meta = ObjectMeta {
            name: "orphan".to_string(),
            ..Default::default()
        };
        assert_eq!(meta.namespace(), DEFAULT_NAMESPACE);
        assert_eq!(meta.key(), "default/orphan");
    }

    #[test]
    fn test_type_meta_kinds() {
        assert_eq!(TypeMeta::action_set().kind, "ActionSet");
        assert_eq!(TypeMeta::blueprint().kind, "Blueprint");
        assert_eq!(TypeMeta::blueprint().api_version, "cr.skiff.dev/v1alpha1");
    }

    #[test]
    fn test_object_meta_wire_names() {
        let mut meta = ObjectMeta::new("backup-1", "apps").with_label("team", "storage");
        meta.resource_version = Some("42".to_string());

        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["resourceVersion"], "42");
        assert_eq!(json["labels"]["team"], "storage");
        assert!(json.get("annotations").is_none());
    }
}
