//! The per-kind `EntityHandler` contract and the default resync listing.

use async_trait::async_trait;
use rudder_store::{EntityStore, Filter, FilterCond};
use rudder_types::{EntityKind, Status, StoredEntity};
use std::sync::Arc;
use std::time::Duration;

/// Errors surfaced by entity handlers. They are recorded on the entity and
/// logged; they never take down the worker pool.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for handler operations.
pub type HandlerResult<T = ()> = std::result::Result<T, HandlerError>;

/// Entity operations of a generic controller, implemented once per kind.
#[async_trait]
pub trait EntityHandler: Send + Sync {
    /// Entity kind this handler reconciles; used to filter the change stream.
    fn kind(&self) -> EntityKind;

    /// Drives a new entity to its desired state. Must be idempotent: running
    /// twice for the same entity content must not create duplicate external
    /// resources. Writes the entity back (success or error state) before
    /// returning.
    async fn add(&self, entity: StoredEntity) -> HandlerResult;

    async fn update(&self, entity: StoredEntity) -> HandlerResult;

    /// Tears down the external resource, then hard-deletes the store record.
    /// If teardown fails the record stays so the next resync retries;
    /// deletion is never silently lost.
    async fn delete(&self, entity: StoredEntity) -> HandlerResult;

    /// Periodic full-listing pass scoped to one organization. Returns the
    /// entities that still need to be driven.
    async fn sync(
        &self,
        organization_id: &str,
        resync_period: Duration,
    ) -> HandlerResult<Vec<StoredEntity>>;

    /// Terminal error-state hook. Logs only; reserved for future alerting.
    async fn on_error(&self, entity: StoredEntity) -> HandlerResult;
}

/// Resync filter matching entities modified before the resync window that are
/// still in a non-terminal status (including `Error`, so failed entities are
/// retried every period).
pub fn default_sync_filter(resync_period: Duration) -> Filter {
    let cutoff = chrono::Utc::now()
        - chrono::Duration::from_std(resync_period).unwrap_or_else(|_| chrono::Duration::zero());
    Filter::everything()
        .add(FilterCond::ModifiedBefore(cutoff))
        .add(FilterCond::StatusIn(vec![
            Status::Creating,
            Status::Updating,
            Status::Deleting,
            Status::Missing,
            Status::Error,
        ]))
}

/// Standard `sync` implementation: list entities of one kind that still need
/// processing. Handlers with different drift criteria supply their own filter.
pub async fn default_sync(
    store: &Arc<dyn EntityStore>,
    kind: EntityKind,
    organization_id: &str,
    resync_period: Duration,
    filter: Option<Filter>,
) -> HandlerResult<Vec<StoredEntity>> {
    let filter = filter.unwrap_or_else(|| default_sync_filter(resync_period));
    Ok(store.list(organization_id, kind, &filter).await?)
}
