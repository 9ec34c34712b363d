//! Template parameter collection
//!
//! Gathers everything an action's templates may reference: the target
//! object, ConfigMaps and Secrets named by the ActionSpec, input artifacts,
//! options, the profile object and the render time. Phases add their own
//! Secrets and ConfigMaps right before they run.

use crate::error::{EngineError, Result};
use crate::store::ActionSetStore;
use chrono::{DateTime, SecondsFormat, Utc};
use skiff_crd::{ActionSpec, ObjectReference, Value};
use skiff_functions::TemplateParams;
use std::collections::BTreeMap;
use tracing::debug;

/// Fetch the parameters for one action of an ActionSet in `namespace`
///
/// A missing object, ConfigMap, Secret or profile is an error.
pub async fn fetch(
    store: &dyn ActionSetStore,
    spec: &ActionSpec,
    namespace: &str,
    now: DateTime<Utc>,
) -> Result<TemplateParams> {
    let object = fetch_object(store, &spec.object, namespace).await?;

    let mut config_maps = BTreeMap::new();
    for (name, reference) in &spec.config_maps {
        let ns = reference.namespace_or(namespace);
        let data = store
            .get_config_map(ns, &reference.name)
            .await?
            .ok_or_else(|| EngineError::ObjectNotFound(format!("ConfigMap {}/{}", ns, reference.name)))?;
        config_maps.insert(name.clone(), data);
    }

    let mut secrets = BTreeMap::new();
    for (name, reference) in &spec.secrets {
        let ns = reference.namespace_or(namespace);
        let data = store
            .get_secret(ns, &reference.name)
            .await?
            .ok_or_else(|| EngineError::ObjectNotFound(format!("Secret {}/{}", ns, reference.name)))?;
        secrets.insert(name.clone(), data);
    }

    let profile = match &spec.profile {
        Some(reference) => Some(fetch_object(store, reference, namespace).await?),
        None => None,
    };

    debug!(
        action = %spec.name,
        object = %spec.object,
        config_maps = config_maps.len(),
        secrets = secrets.len(),
        "Collected template parameters"
    );

    Ok(TemplateParams {
        object,
        config_maps,
        secrets,
        artifacts_in: spec.artifacts.clone(),
        options: spec.options.clone(),
        profile,
        time: format_time(now),
        phases: BTreeMap::new(),
    })
}

/// Data of the Secrets and ConfigMaps among a phase's rendered objects
#[derive(Debug, Default)]
pub struct PhaseObjects {
    pub secrets: BTreeMap<String, BTreeMap<String, String>>,
    pub config_maps: BTreeMap<String, BTreeMap<String, String>>,
}

/// Fetch the Secrets and ConfigMaps a phase references
///
/// Other kinds are left to the function. A referenced Secret or ConfigMap
/// that does not exist is an error.
pub async fn fetch_phase_objects(
    store: &dyn ActionSetStore,
    objects: &BTreeMap<String, ObjectReference>,
    namespace: &str,
) -> Result<PhaseObjects> {
    let mut fetched = PhaseObjects::default();
    for (name, reference) in objects {
        let ns = reference.namespace_or(namespace);
        match reference.kind.as_str() {
            "Secret" => {
                let data = store
                    .get_secret(ns, &reference.name)
                    .await?
                    .ok_or_else(|| EngineError::ObjectNotFound(format!("Secret {}/{}", ns, reference.name)))?;
                fetched.secrets.insert(name.clone(), data);
            }
            "ConfigMap" => {
                let data = store
                    .get_config_map(ns, &reference.name)
                    .await?
                    .ok_or_else(|| EngineError::ObjectNotFound(format!("ConfigMap {}/{}", ns, reference.name)))?;
                fetched.config_maps.insert(name.clone(), data);
            }
            _ => {}
        }
    }
    Ok(fetched)
}

async fn fetch_object(
    store: &dyn ActionSetStore,
    reference: &ObjectReference,
    namespace: &str,
) -> Result<Value> {
    let mut reference = reference.clone();
    if reference.namespace.is_empty() && !is_cluster_scoped(&reference.kind) {
        reference.namespace = namespace.to_string();
    }
    store
        .get_object(&reference)
        .await?
        .map(Value::from)
        .ok_or_else(|| EngineError::ObjectNotFound(reference.to_string()))
}

fn is_cluster_scoped(kind: &str) -> bool {
    matches!(
        kind,
        "Namespace" | "Node" | "PersistentVolume" | "StorageClass" | "ClusterRole" | "ClusterRoleBinding"
    )
}

/// RFC 3339 UTC with nanosecond precision
pub fn format_time(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Nanos, true)
}
