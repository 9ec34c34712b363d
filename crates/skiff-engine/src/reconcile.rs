//! Optimistic-concurrency updates
//!
//! [`action_set`] is the only way the engine mutates an ActionSet after
//! creation. It fetches, validates, mutates, validates again (the state
//! may only move forward), and writes with a compare-and-swap, retrying from scratch whenever the write loses
//! a race.

use crate::error::{EngineError, Result};
use crate::store::ActionSetStore;
use crate::validate;
use skiff_crd::{object_key, ActionSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Apply `mutate` to the latest copy of an ActionSet and persist it
///
/// Conflicts are retried without limit until `cancel` fires. Returns the
/// stored object. When `mutate` leaves the object unchanged nothing is
/// written and the fetched copy is returned.
pub async fn action_set<F>(
    store: &dyn ActionSetStore,
    cancel: &CancellationToken,
    namespace: &str,
    name: &str,
    mut mutate: F,
) -> Result<ActionSet>
where
    F: FnMut(&mut ActionSet) -> Result<()> + Send,
{
    let key = object_key(namespace, name);
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        attempt += 1;

        let current = store
            .get_action_set(namespace, name)
            .await?
            .ok_or_else(|| EngineError::NotFound(key.clone()))?;
        validate::action_set(&current).map_err(|e| {
            error!(action_set = %key, error = %e, "Stored ActionSet failed validation");
            e
        })?;

        let mut next = current.clone();
        mutate(&mut next)?;
        if next == current {
            return Ok(current);
        }
        validate::action_set(&next)?;
        validate::transition(&current, &next)?;

        match store.update_action_set(&next).await {
            Ok(stored) => {
                if attempt > 1 {
                    debug!(action_set = %key, attempt, "Update applied after conflicts");
                }
                return Ok(stored);
            }
            Err(EngineError::Conflict(_)) => {
                debug!(action_set = %key, attempt, "Update conflicted, retrying");
                tokio::task::yield_now().await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use skiff_crd::{ActionSetStatus, ActionSpec, ObjectReference, State};
    use std::sync::Arc;

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        let set = ActionSet::new("backup-1", "apps").with_action(ActionSpec::new(
            "backup",
            "bp",
            ObjectReference::new("Deployment", "web", "apps"),
        ));
        store.create_action_set(&set).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_reconcile_applies_mutation() {
        let store = seeded().await;
        let cancel = CancellationToken::new();

        let stored = action_set(&store, &cancel, "apps", "backup-1", |set| {
            set.metadata.labels.insert("team".to_string(), "db".to_string());
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(stored.metadata.labels.get("team").map(String::as_str), Some("db"));
        assert_eq!(stored.metadata.resource_version.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_reconcile_skips_noop_write() {
        let store = seeded().await;
        let cancel = CancellationToken::new();

        let stored = action_set(&store, &cancel, "apps", "backup-1", |_| Ok(())).await.unwrap();
        assert_eq!(stored.metadata.resource_version.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_reconcile_not_found() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let err = action_set(&store, &cancel, "apps", "missing", |_| Ok(()))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_reconcile_rejects_invalid_result() {
        let store = seeded().await;
        let cancel = CancellationToken::new();

        // Status with no action records breaks the length invariant
        let err = action_set(&store, &cancel, "apps", "backup-1", |set| {
            set.status = Some(ActionSetStatus::pending(vec![]));
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::Invariant(_)));

        let current = store.get_action_set("apps", "backup-1").await.unwrap().unwrap();
        assert!(current.status.is_none());
    }

    #[tokio::test]
    async fn test_reconcile_rejects_backward_transition() {
        let store = seeded().await;
        let cancel = CancellationToken::new();
        action_set(&store, &cancel, "apps", "backup-1", |set| {
            let mut status =
                ActionSetStatus::pending(set.actions().iter().map(skiff_crd::ActionStatus::from_spec).collect());
            status.fail("blueprint not found: bp");
            set.status = Some(status);
            Ok(())
        })
        .await
        .unwrap();

        let err = action_set(&store, &cancel, "apps", "backup-1", |set| {
            if let Some(status) = set.status.as_mut() {
                status.state = State::Pending;
                status.error.message.clear();
            }
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("cannot move from failed to pending"));
    }

    #[tokio::test]
    async fn test_reconcile_propagates_mutation_error() {
        let store = seeded().await;
        let cancel = CancellationToken::new();
        let err = action_set(&store, &cancel, "apps", "backup-1", |_| {
            Err(EngineError::Invariant("refused".to_string()))
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("refused"));
    }

    #[tokio::test]
    async fn test_reconcile_cancelled() {
        let store = seeded().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = action_set(&store, &cancel, "apps", "backup-1", |_| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reconciles_converge() {
        let store = Arc::new(seeded().await);
        let cancel = CancellationToken::new();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    action_set(store.as_ref(), &cancel, "apps", "backup-1", move |set| {
                        set.metadata
                            .annotations
                            .insert(format!("writer-{}", i), i.to_string());
                        Ok(())
                    })
                    .await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let current = store.get_action_set("apps", "backup-1").await.unwrap().unwrap();
        assert_eq!(current.metadata.annotations.len(), 8);
        assert_eq!(current.state(), None::<State>);
    }
}
