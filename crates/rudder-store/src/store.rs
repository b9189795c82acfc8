//! The `EntityStore` trait.

use async_trait::async_trait;
use rudder_types::{EntityKind, Status, StoredEntity};
use tracing::warn;

use crate::error::Result;
use crate::filter::Filter;

/// Typed key/value store for control-plane entities.
///
/// Entities are exclusively owned by the store; callers re-fetch or receive a
/// fresh copy before mutating status. Updates are compare-and-swap on the
/// entity revision: a writer that read revision N must supply N, and loses to
/// any concurrent writer that already advanced it.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Adds a new entity, assigning its id, timestamps and initial revision
    /// in place. Fails on a duplicate name within organization + kind.
    async fn add(&self, entity: &mut StoredEntity) -> Result<u64>;

    /// CAS update: `last_revision` must match the stored revision. On success
    /// the entity's revision and modified time are advanced in place and the
    /// new revision returned.
    async fn update(&self, last_revision: u64, entity: &mut StoredEntity) -> Result<u64>;

    async fn get(
        &self,
        organization_id: &str,
        kind: EntityKind,
        name: &str,
    ) -> Result<Option<StoredEntity>>;

    /// Lists entities of one kind within an organization, filtered.
    async fn list(
        &self,
        organization_id: &str,
        kind: EntityKind,
        filter: &Filter,
    ) -> Result<Vec<StoredEntity>>;

    /// Lists entities of one kind across all organizations.
    async fn list_global(&self, kind: EntityKind, filter: &Filter) -> Result<Vec<StoredEntity>>;

    /// Hard-deletes a single entity.
    async fn delete(&self, organization_id: &str, kind: EntityKind, name: &str) -> Result<()>;

    /// Writes the entity back whatever the handler outcome was, recording the
    /// error on the entity when one is given. A failed write-back (typically
    /// a lost revision race) is logged, not surfaced; the next resync pass
    /// re-drives the entity.
    async fn update_with_error(&self, entity: &mut StoredEntity, error: Option<&str>) {
        if let Some(message) = error {
            let base = entity.base_mut();
            base.status = Status::Error;
            base.reason.push(message.to_string());
        }
        let revision = entity.base().revision;
        if let Err(err) = self.update(revision, entity).await {
            warn!(
                entity = %entity.name(),
                error = %err,
                "unable to write back entity state"
            );
        }
    }
}
