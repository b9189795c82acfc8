//! In-memory implementation of the entity store.
//!
//! Suitable for development and testing. Production deployments back the
//! [`EntityStore`] trait with a persistent engine.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rudder_types::{validate, EntityKind, StoredEntity};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Result, StoreError};
use crate::filter::Filter;
use crate::store::EntityStore;

/// In-memory entity store keyed by `organization/kind/name`.
pub struct InMemoryEntityStore {
    entities: DashMap<String, StoredEntity>,
    // Global revision counter, monotonically increasing across all entities,
    // mirroring a kv store's write index.
    revision: AtomicU64,
}

fn build_key(organization_id: &str, kind: EntityKind, name: &str) -> String {
    format!("{organization_id}/{kind}/{name}")
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self {
            entities: DashMap::new(),
            revision: AtomicU64::new(1),
        }
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for InMemoryEntityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn add(&self, entity: &mut StoredEntity) -> Result<u64> {
        validate::entity_name(entity.name())?;

        let key = build_key(&entity.base().organization_id, entity.kind(), entity.name());
        if self.entities.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: entity.kind(),
                name: entity.name().to_string(),
                organization: entity.base().organization_id.clone(),
            });
        }

        let revision = self.next_revision();
        let now = Utc::now();
        {
            let base = entity.base_mut();
            if base.id.is_empty() {
                base.id = uuid::Uuid::new_v4().to_string();
            }
            base.created_time = now;
            base.modified_time = now;
            base.revision = revision;
        }
        self.entities.insert(key, entity.clone());
        Ok(revision)
    }

    async fn update(&self, last_revision: u64, entity: &mut StoredEntity) -> Result<u64> {
        let key = build_key(&entity.base().organization_id, entity.kind(), entity.name());

        let mut stored = self.entities.get_mut(&key).ok_or_else(|| StoreError::NotFound {
            kind: entity.kind(),
            name: entity.name().to_string(),
            organization: entity.base().organization_id.clone(),
        })?;

        let stored_revision = stored.base().revision;
        if stored_revision != last_revision {
            return Err(StoreError::RevisionConflict {
                name: entity.name().to_string(),
                supplied: last_revision,
                stored: stored_revision,
            });
        }

        let revision = self.next_revision();
        {
            let base = entity.base_mut();
            base.revision = revision;
            base.modified_time = Utc::now();
        }
        *stored = entity.clone();
        Ok(revision)
    }

    async fn get(
        &self,
        organization_id: &str,
        kind: EntityKind,
        name: &str,
    ) -> Result<Option<StoredEntity>> {
        let key = build_key(organization_id, kind, name);
        Ok(self.entities.get(&key).map(|e| e.clone()))
    }

    async fn list(
        &self,
        organization_id: &str,
        kind: EntityKind,
        filter: &Filter,
    ) -> Result<Vec<StoredEntity>> {
        Ok(self
            .entities
            .iter()
            .filter(|e| {
                e.kind() == kind
                    && e.base().organization_id == organization_id
                    && filter.matches(e.value())
            })
            .map(|e| e.value().clone())
            .collect())
    }

    async fn list_global(&self, kind: EntityKind, filter: &Filter) -> Result<Vec<StoredEntity>> {
        Ok(self
            .entities
            .iter()
            .filter(|e| e.kind() == kind && filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect())
    }

    async fn delete(&self, organization_id: &str, kind: EntityKind, name: &str) -> Result<()> {
        let key = build_key(organization_id, kind, name);
        if self.entities.remove(&key).is_none() {
            return Err(StoreError::NotFound {
                kind,
                name: name.to_string(),
                organization: organization_id.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rudder_types::{BaseEntity, Status, Subscription};

    fn subscription(name: &str) -> StoredEntity {
        let mut base = BaseEntity::new("org1", name);
        base.status = Status::Creating;
        StoredEntity::from(Subscription {
            base,
            event_type: "test.topic".to_string(),
            source_type: "test".to_string(),
            function: "fn1".to_string(),
            secrets: vec![],
        })
    }

    #[tokio::test]
    async fn add_assigns_id_and_revision() {
        let store = InMemoryEntityStore::new();
        let mut sub = subscription("sub1");

        let revision = store.add(&mut sub).await.unwrap();
        assert!(revision > 0);
        assert!(!sub.base().id.is_empty());
        assert_eq!(sub.base().revision, revision);
    }

    #[tokio::test]
    async fn add_rejects_duplicate_name() {
        let store = InMemoryEntityStore::new();
        store.add(&mut subscription("sub1")).await.unwrap();

        let err = store.add(&mut subscription("sub1")).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn add_rejects_invalid_name() {
        let store = InMemoryEntityStore::new();
        assert!(store.add(&mut subscription("bad name")).await.is_err());
    }

    #[tokio::test]
    async fn stale_revision_is_rejected() {
        let store = InMemoryEntityStore::new();
        let mut sub = subscription("sub1");
        let first = store.add(&mut sub).await.unwrap();

        // Writer A advances the revision.
        let mut copy_a = sub.clone();
        store.update(first, &mut copy_a).await.unwrap();

        // Writer B still holds the old revision and must lose.
        let mut copy_b = sub.clone();
        copy_b.base_mut().status = Status::Ready;
        let err = store.update(first, &mut copy_b).await.unwrap_err();
        assert!(matches!(err, StoreError::RevisionConflict { .. }));

        // The stale write did not overwrite the newer one.
        let stored = store
            .get("org1", EntityKind::Subscription, "sub1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.base().revision, copy_a.base().revision);
        assert_eq!(stored.status(), Status::Creating);
    }

    #[tokio::test]
    async fn update_with_error_records_reason_chain() {
        let store = InMemoryEntityStore::new();
        let mut sub = subscription("sub1");
        store.add(&mut sub).await.unwrap();

        store
            .update_with_error(&mut sub, Some("unable to subscribe"))
            .await;

        let stored = store
            .get("org1", EntityKind::Subscription, "sub1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status(), Status::Error);
        assert_eq!(stored.base().reason, vec!["unable to subscribe".to_string()]);
    }

    #[tokio::test]
    async fn update_with_error_persists_success_state() {
        let store = InMemoryEntityStore::new();
        let mut sub = subscription("sub1");
        let before = store.add(&mut sub).await.unwrap();

        sub.base_mut().status = Status::Ready;
        store.update_with_error(&mut sub, None).await;

        let stored = store
            .get("org1", EntityKind::Subscription, "sub1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status(), Status::Ready);
        assert!(stored.base().revision > before);
    }

    #[tokio::test]
    async fn list_is_scoped_and_filtered() {
        let store = InMemoryEntityStore::new();
        store.add(&mut subscription("sub1")).await.unwrap();
        store.add(&mut subscription("sub2")).await.unwrap();

        let mut other_org = subscription("sub3");
        other_org.base_mut().organization_id = "org2".to_string();
        store.add(&mut other_org).await.unwrap();

        let listed = store
            .list("org1", EntityKind::Subscription, &Filter::everything())
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);

        let global = store
            .list_global(EntityKind::Subscription, &Filter::everything())
            .await
            .unwrap();
        assert_eq!(global.len(), 3);
    }

    #[tokio::test]
    async fn delete_removes_the_record() {
        let store = InMemoryEntityStore::new();
        store.add(&mut subscription("sub1")).await.unwrap();

        store
            .delete("org1", EntityKind::Subscription, "sub1")
            .await
            .unwrap();
        assert!(store
            .get("org1", EntityKind::Subscription, "sub1")
            .await
            .unwrap()
            .is_none());

        let err = store
            .delete("org1", EntityKind::Subscription, "sub1")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
