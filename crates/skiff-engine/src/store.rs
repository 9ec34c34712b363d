//! Resource storage trait
//!
//! The engine reads and writes ActionSets and Blueprints only through
//! [`ActionSetStore`]. [`KubeStore`](crate::cluster::KubeStore) backs it with
//! the cluster API; [`MemoryStore`] backs it in process for tests.

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use skiff_crd::{object_key, ActionSet, Blueprint, ObjectReference};
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};
use tokio::sync::mpsc;

/// Kind of change a watch observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Added,
    Updated,
    Deleted,
}

/// Resource carried by a watch event
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    ActionSet(ActionSet),
    Blueprint(Blueprint),
}

impl Resource {
    pub fn namespace(&self) -> &str {
        match self {
            Resource::ActionSet(a) => a.namespace(),
            Resource::Blueprint(b) => b.metadata.namespace(),
        }
    }
}

/// One watch notification
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceEvent {
    pub kind: EventKind,
    pub resource: Resource,
}

impl ResourceEvent {
    pub fn new(kind: EventKind, resource: Resource) -> Self {
        Self { kind, resource }
    }
}

/// Trait for ActionSet and Blueprint persistence
///
/// `update_action_set` is a compare-and-swap: it must fail with
/// [`EngineError::Conflict`] when the stored resource version differs
/// from the one carried by the argument.
#[async_trait]
pub trait ActionSetStore: Send + Sync {
    /// Get an ActionSet by namespace and name
    async fn get_action_set(&self, namespace: &str, name: &str) -> Result<Option<ActionSet>>;

    /// Create an ActionSet, returning the stored copy
    async fn create_action_set(&self, action_set: &ActionSet) -> Result<ActionSet>;

    /// Replace an ActionSet if its resource version still matches
    async fn update_action_set(&self, action_set: &ActionSet) -> Result<ActionSet>;

    /// Delete an ActionSet
    async fn delete_action_set(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_blueprint(&self, namespace: &str, name: &str) -> Result<Option<Blueprint>>;

    /// Create or replace a Blueprint
    async fn put_blueprint(&self, blueprint: &Blueprint) -> Result<Blueprint>;

    /// Fetch an arbitrary object as JSON, `None` if it does not exist
    async fn get_object(&self, reference: &ObjectReference) -> Result<Option<serde_json::Value>>;

    /// ConfigMap data
    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>>;

    /// Decoded Secret data
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>>;

    /// Stream of changes to ActionSets and Blueprints in a namespace
    async fn watch(&self, namespace: &str) -> Result<mpsc::UnboundedReceiver<ResourceEvent>>;
}

/// In-memory store for testing
///
/// Keeps a monotonically increasing resource version and rejects stale
/// updates the same way the API server does.
#[derive(Debug, Default)]
pub struct MemoryStore {
    action_sets: RwLock<HashMap<String, ActionSet>>,
    blueprints: RwLock<HashMap<String, Blueprint>>,
    objects: RwLock<HashMap<String, serde_json::Value>>,
    config_maps: RwLock<HashMap<String, BTreeMap<String, String>>>,
    secrets: RwLock<HashMap<String, BTreeMap<String, String>>>,
    watchers: RwLock<Vec<(String, mpsc::UnboundedSender<ResourceEvent>)>>,
    version: RwLock<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object readable through [`ActionSetStore::get_object`]
    pub fn put_object(&self, reference: &ObjectReference, object: serde_json::Value) {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(reference_key(reference), object);
    }

    pub fn put_config_map(&self, namespace: &str, name: &str, data: BTreeMap<String, String>) {
        self.config_maps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(object_key(namespace, name), data);
    }

    pub fn put_secret(&self, namespace: &str, name: &str, data: BTreeMap<String, String>) {
        self.secrets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(object_key(namespace, name), data);
    }

    /// Number of open watch streams
    pub fn watcher_count(&self) -> usize {
        self.watchers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .count()
    }

    fn next_version(&self) -> String {
        let mut version = self.version.write().unwrap_or_else(PoisonError::into_inner);
        *version += 1;
        version.to_string()
    }

    fn notify(&self, kind: EventKind, resource: Resource) {
        let mut watchers = self.watchers.write().unwrap_or_else(PoisonError::into_inner);
        let namespace = resource.namespace().to_string();
        // Drop watchers whose receiver went away
        watchers.retain(|(ns, tx)| {
            if *ns != namespace {
                return !tx.is_closed();
            }
            tx.send(ResourceEvent::new(kind, resource.clone())).is_ok()
        });
    }
}

fn reference_key(reference: &ObjectReference) -> String {
    let kind = if reference.kind.is_empty() {
        &reference.resource
    } else {
        &reference.kind
    };
    format!(
        "{}/{}",
        kind.to_lowercase(),
        object_key(reference.namespace_or(skiff_crd::DEFAULT_NAMESPACE), &reference.name)
    )
}

#[async_trait]
impl ActionSetStore for MemoryStore {
    async fn get_action_set(&self, namespace: &str, name: &str) -> Result<Option<ActionSet>> {
        Ok(self
            .action_sets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&object_key(namespace, name))
            .cloned())
    }

    async fn create_action_set(&self, action_set: &ActionSet) -> Result<ActionSet> {
        let key = action_set.metadata.key();
        let stored = {
            let mut sets = self.action_sets.write().unwrap_or_else(PoisonError::into_inner);
            if sets.contains_key(&key) {
                return Err(EngineError::AlreadyExists(key));
            }
            let mut stored = action_set.clone();
            stored.metadata.resource_version = Some(self.next_version());
            stored.metadata.uid.get_or_insert_with(uuid::Uuid::new_v4);
            stored.metadata.creation_timestamp.get_or_insert_with(chrono::Utc::now);
            sets.insert(key, stored.clone());
            stored
        };
        self.notify(EventKind::Added, Resource::ActionSet(stored.clone()));
        Ok(stored)
    }

    async fn update_action_set(&self, action_set: &ActionSet) -> Result<ActionSet> {
        let key = action_set.metadata.key();
        let stored = {
            let mut sets = self.action_sets.write().unwrap_or_else(PoisonError::into_inner);
            let current = sets
                .get(&key)
                .ok_or_else(|| EngineError::NotFound(key.clone()))?;
            if current.metadata.resource_version != action_set.metadata.resource_version {
                return Err(EngineError::Conflict(key));
            }
            let mut stored = action_set.clone();
            stored.metadata.resource_version = Some(self.next_version());
            sets.insert(key, stored.clone());
            stored
        };
        self.notify(EventKind::Updated, Resource::ActionSet(stored.clone()));
        Ok(stored)
    }

    async fn delete_action_set(&self, namespace: &str, name: &str) -> Result<()> {
        let removed = self
            .action_sets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&object_key(namespace, name));
        match removed {
            Some(set) => {
                self.notify(EventKind::Deleted, Resource::ActionSet(set));
                Ok(())
            }
            None => Err(EngineError::NotFound(object_key(namespace, name))),
        }
    }

    async fn get_blueprint(&self, namespace: &str, name: &str) -> Result<Option<Blueprint>> {
        Ok(self
            .blueprints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&object_key(namespace, name))
            .cloned())
    }

    async fn put_blueprint(&self, blueprint: &Blueprint) -> Result<Blueprint> {
        let mut stored = blueprint.clone();
        stored.metadata.resource_version = Some(self.next_version());
        let existed = self
            .blueprints
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(stored.metadata.key(), stored.clone())
            .is_some();
        let kind = if existed { EventKind::Updated } else { EventKind::Added };
        self.notify(kind, Resource::Blueprint(stored.clone()));
        Ok(stored)
    }

    async fn get_object(&self, reference: &ObjectReference) -> Result<Option<serde_json::Value>> {
        Ok(self
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&reference_key(reference))
            .cloned())
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        Ok(self
            .config_maps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&object_key(namespace, name))
            .cloned())
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        Ok(self
            .secrets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&object_key(namespace, name))
            .cloned())
    }

    async fn watch(&self, namespace: &str) -> Result<mpsc::UnboundedReceiver<ResourceEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.watchers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((namespace.to_string(), tx));
        Ok(rx)
    }
}
