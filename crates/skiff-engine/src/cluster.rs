//! Cluster-backed store
//!
//! ActionSets and Blueprints are custom resources in the
//! `cr.skiff.dev/v1alpha1` group, accessed through `Api<DynamicObject>` and
//! converted with serde. Writes use `replace`, so the API server enforces
//! the resource version and answers stale writes with 409.

use crate::error::{EngineError, Result};
use crate::store::{ActionSetStore, EventKind, Resource, ResourceEvent};
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{Api, DeleteParams, PostParams};
use kube::core::{ApiResource, DynamicObject, GroupVersion};
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use skiff_crd::{object_key, ActionSet, Blueprint, ObjectReference, API_GROUP, VERSION};
use std::collections::{BTreeMap, HashSet};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

fn crd_resource(kind: &str, plural: &str) -> ApiResource {
    ApiResource {
        group: API_GROUP.to_string(),
        version: VERSION.to_string(),
        api_version: skiff_crd::API_VERSION.to_string(),
        kind: kind.to_string(),
        plural: plural.to_string(),
    }
}

/// Group of the built-in kinds a reference may name without a version
fn builtin_group(kind: &str) -> &'static str {
    match kind {
        "Deployment" | "StatefulSet" | "DaemonSet" | "ReplicaSet" => "apps",
        "Job" | "CronJob" => "batch",
        _ => "",
    }
}

/// Resource for an arbitrary reference
///
/// A bare version such as `v1` pairs with the reference's group. With no
/// version at all, well-known workload kinds map to their group at `v1`
/// and everything else to the core group. The plural falls back to the
/// lowercased kind plus `s`.
fn reference_resource(reference: &ObjectReference) -> ApiResource {
    let group = if reference.group.is_empty() {
        builtin_group(&reference.kind)
    } else {
        reference.group.as_str()
    };
    let gv = if reference.api_version.contains('/') {
        reference
            .api_version
            .parse::<GroupVersion>()
            .unwrap_or_else(|_| GroupVersion::gv(group, "v1"))
    } else if reference.api_version.is_empty() {
        GroupVersion::gv(group, "v1")
    } else {
        GroupVersion::gv(group, &reference.api_version)
    };
    let plural = if reference.resource.is_empty() {
        format!("{}s", reference.kind.to_lowercase())
    } else {
        reference.resource.clone()
    };
    ApiResource {
        api_version: gv.api_version(),
        group: gv.group,
        version: gv.version,
        kind: reference.kind.clone(),
        plural,
    }
}

fn to_dynamic<T: Serialize>(value: &T) -> Result<DynamicObject> {
    Ok(serde_json::from_value(serde_json::to_value(value)?)?)
}

fn from_dynamic<T: DeserializeOwned>(object: DynamicObject) -> Result<T> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

fn is_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == code)
}

/// Store backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    action_sets: ApiResource,
    blueprints: ApiResource,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            action_sets: crd_resource("ActionSet", "actionsets"),
            blueprints: crd_resource("Blueprint", "blueprints"),
        }
    }

    fn action_set_api(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.action_sets)
    }

    fn blueprint_api(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.blueprints)
    }

    /// Forward one resource type's watch stream until the receiver is dropped
    fn spawn_watch<F>(&self, api: Api<DynamicObject>, tx: mpsc::UnboundedSender<ResourceEvent>, wrap: F)
    where
        F: Fn(DynamicObject) -> Result<Resource> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut seen: HashSet<String> = HashSet::new();
            let mut stream = watcher(api, watcher::Config::default()).default_backoff().boxed();

            while let Some(event) = stream.next().await {
                let (kind, object) = match event {
                    Ok(watcher::Event::Apply(obj)) | Ok(watcher::Event::InitApply(obj)) => {
                        let key = object_key(
                            obj.metadata.namespace.as_deref().unwrap_or_default(),
                            obj.metadata.name.as_deref().unwrap_or_default(),
                        );
                        let kind = if seen.insert(key) {
                            EventKind::Added
                        } else {
                            EventKind::Updated
                        };
                        (kind, obj)
                    }
                    Ok(watcher::Event::Delete(obj)) => {
                        let key = object_key(
                            obj.metadata.namespace.as_deref().unwrap_or_default(),
                            obj.metadata.name.as_deref().unwrap_or_default(),
                        );
                        seen.remove(&key);
                        (EventKind::Deleted, obj)
                    }
                    Ok(watcher::Event::Init) | Ok(watcher::Event::InitDone) => continue,
                    Err(e) => {
                        warn!(error = %e, "Watch error, retrying");
                        continue;
                    }
                };

                let resource = match wrap(object) {
                    Ok(resource) => resource,
                    Err(e) => {
                        warn!(error = %e, "Skipping undecodable resource");
                        continue;
                    }
                };
                if tx.send(ResourceEvent::new(kind, resource)).is_err() {
                    debug!("Watch receiver dropped");
                    break;
                }
            }
        });
    }
}

#[async_trait]
impl ActionSetStore for KubeStore {
    async fn get_action_set(&self, namespace: &str, name: &str) -> Result<Option<ActionSet>> {
        match self.action_set_api(namespace).get_opt(name).await? {
            Some(object) => Ok(Some(from_dynamic(object)?)),
            None => Ok(None),
        }
    }

    async fn create_action_set(&self, action_set: &ActionSet) -> Result<ActionSet> {
        let object = to_dynamic(action_set)?;
        match self
            .action_set_api(action_set.namespace())
            .create(&PostParams::default(), &object)
            .await
        {
            Ok(created) => from_dynamic(created),
            Err(e) if is_status(&e, 409) => Err(EngineError::AlreadyExists(action_set.metadata.key())),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_action_set(&self, action_set: &ActionSet) -> Result<ActionSet> {
        let object = to_dynamic(action_set)?;
        match self
            .action_set_api(action_set.namespace())
            .replace(action_set.name(), &PostParams::default(), &object)
            .await
        {
            Ok(replaced) => from_dynamic(replaced),
            Err(e) if is_status(&e, 404) => Err(EngineError::NotFound(action_set.metadata.key())),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_action_set(&self, namespace: &str, name: &str) -> Result<()> {
        match self
            .action_set_api(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Err(EngineError::NotFound(object_key(namespace, name))),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_blueprint(&self, namespace: &str, name: &str) -> Result<Option<Blueprint>> {
        match self.blueprint_api(namespace).get_opt(name).await? {
            Some(object) => Ok(Some(from_dynamic(object)?)),
            None => Ok(None),
        }
    }

    async fn put_blueprint(&self, blueprint: &Blueprint) -> Result<Blueprint> {
        let api = self.blueprint_api(blueprint.metadata.namespace());
        let mut object = to_dynamic(blueprint)?;
        match api.get_opt(blueprint.name()).await? {
            Some(existing) => {
                object.metadata.resource_version = existing.metadata.resource_version;
                from_dynamic(api.replace(blueprint.name(), &PostParams::default(), &object).await?)
            }
            None => {
                object.metadata.resource_version = None;
                from_dynamic(api.create(&PostParams::default(), &object).await?)
            }
        }
    }

    async fn get_object(&self, reference: &ObjectReference) -> Result<Option<serde_json::Value>> {
        let resource = reference_resource(reference);
        // No namespace means a cluster-scoped kind such as Namespace
        let api: Api<DynamicObject> = if reference.namespace.is_empty() {
            Api::all_with(self.client.clone(), &resource)
        } else {
            Api::namespaced_with(self.client.clone(), &reference.namespace, &resource)
        };
        match api.get_opt(&reference.name).await? {
            Some(object) => Ok(Some(serde_json::to_value(object)?)),
            None => Ok(None),
        }
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api
            .get_opt(name)
            .await?
            .map(|cm| cm.data.unwrap_or_default()))
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?.map(|secret| {
            let mut data: BTreeMap<String, String> = secret
                .data
                .unwrap_or_default()
                .into_iter()
                .map(|(k, v)| (k, String::from_utf8_lossy(&v.0).into_owned()))
                .collect();
            data.extend(secret.string_data.unwrap_or_default());
            data
        }))
    }

    async fn watch(&self, namespace: &str) -> Result<mpsc::UnboundedReceiver<ResourceEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.spawn_watch(self.action_set_api(namespace), tx.clone(), |object| {
            Ok(Resource::ActionSet(from_dynamic(object)?))
        });
        self.spawn_watch(self.blueprint_api(namespace), tx, |object| {
            Ok(Resource::Blueprint(from_dynamic(object)?))
        });
        info!(namespace = %namespace, "Watching ActionSets and Blueprints");
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_resource_core() {
        let resource = reference_resource(&ObjectReference::new("Pod", "web-0", "apps"));
        assert_eq!(resource.group, "");
        assert_eq!(resource.version, "v1");
        assert_eq!(resource.api_version, "v1");
        assert_eq!(resource.plural, "pods");
    }

    #[test]
    fn test_reference_resource_grouped() {
        let mut reference = ObjectReference::new("Deployment", "web", "apps");
        reference.api_version = "apps/v1".to_string();
        let resource = reference_resource(&reference);
        assert_eq!(resource.group, "apps");
        assert_eq!(resource.version, "v1");
        assert_eq!(resource.api_version, "apps/v1");
        assert_eq!(resource.plural, "deployments");
    }

    #[test]
    fn test_reference_resource_group_with_bare_version() {
        let reference = ObjectReference::new("Deployment", "web", "apps").with_resource("apps", "v1", "deployments");
        let resource = reference_resource(&reference);
        assert_eq!(resource.group, "apps");
        assert_eq!(resource.version, "v1");
        assert_eq!(resource.api_version, "apps/v1");
        assert_eq!(resource.plural, "deployments");
    }

    #[test]
    fn test_reference_resource_kind_only_workloads() {
        for kind in ["Deployment", "StatefulSet", "DaemonSet", "ReplicaSet"] {
            let resource = reference_resource(&ObjectReference::new(kind, "web", "apps"));
            assert_eq!(resource.group, "apps", "{}", kind);
            assert_eq!(resource.api_version, "apps/v1", "{}", kind);
        }
        let resource = reference_resource(&ObjectReference::new("Deployment", "web", "apps"));
        assert_eq!(resource.plural, "deployments");

        let job = reference_resource(&ObjectReference::new("Job", "nightly", "apps"));
        assert_eq!(job.api_version, "batch/v1");
    }

    #[test]
    fn test_reference_resource_cluster_scoped() {
        let resource = reference_resource(&ObjectReference::new("Namespace", "apps", ""));
        assert_eq!(resource.api_version, "v1");
        assert_eq!(resource.plural, "namespaces");
    }

    #[test]
    fn test_reference_resource_explicit_plural() {
        let mut reference = ObjectReference::new("", "data", "apps");
        reference.resource = "persistentvolumeclaims".to_string();
        assert_eq!(reference_resource(&reference).plural, "persistentvolumeclaims");
    }

    #[test]
    fn test_dynamic_conversion() {
        let set = ActionSet::new("backup-1", "apps");
        let object = to_dynamic(&set).unwrap();
        assert_eq!(object.metadata.name.as_deref(), Some("backup-1"));
        assert_eq!(object.metadata.namespace.as_deref(), Some("apps"));

        let back: ActionSet = from_dynamic(object).unwrap();
        assert_eq!(back, set);
    }
}
