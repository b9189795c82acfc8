//! Entity handlers dispatching driver and driver-type reconciliation.

use async_trait::async_trait;
use rudder_controller::{default_sync, EntityHandler, HandlerResult};
use rudder_store::{EntityStore, Filter, FilterCond};
use rudder_types::{BaseEntity, Driver, DriverType, EntityKind, Status, StoredEntity};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::backend::DriverBackend;
use crate::error::BackendError;

/// Records a failed backend call on the entity: the stable reason token
/// first, then the full message.
fn record_backend_error(base: &mut BaseEntity, err: &BackendError) {
    debug!(entity = %base.name, error = %err, "putting driver into error state");
    base.status = Status::Error;
    base.reason.push(err.reason().to_string());
    base.reason.push(err.to_string());
}

/// Reconciles `Driver` entities against the configured backend.
pub struct DriverEntityHandler {
    store: Arc<dyn EntityStore>,
    backend: Arc<dyn DriverBackend>,
}

impl DriverEntityHandler {
    pub fn new(store: Arc<dyn EntityStore>, backend: Arc<dyn DriverBackend>) -> Self {
        Self { store, backend }
    }

    async fn drive(&self, driver: &mut Driver) -> Result<(), BackendError> {
        self.backend.deploy(driver).await?;
        if driver.expose {
            info!(driver = %driver.base.name, "exposing event driver");
            self.backend.expose(driver).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl EntityHandler for DriverEntityHandler {
    fn kind(&self) -> EntityKind {
        EntityKind::Driver
    }

    async fn add(&self, entity: StoredEntity) -> HandlerResult {
        let mut driver = Driver::try_from(entity)?;
        let outcome = self.drive(&mut driver).await;

        // The entity is written back on both paths.
        match outcome {
            Ok(()) => {
                driver.base.status = Status::Ready;
                driver.base.reason.clear();
                let driver_type = driver.driver_type.clone();
                let mut entity = StoredEntity::from(driver);
                self.store.update_with_error(&mut entity, None).await;
                info!(driver = %entity.name(), driver_type = %driver_type, "event driver deployed");
                Ok(())
            }
            Err(err) => {
                record_backend_error(&mut driver.base, &err);
                let mut entity = StoredEntity::from(driver);
                self.store.update_with_error(&mut entity, None).await;
                Err(format!("error deploying driver: {err}").into())
            }
        }
    }

    async fn update(&self, entity: StoredEntity) -> HandlerResult {
        let mut driver = Driver::try_from(entity)?;
        match self.backend.update(&mut driver).await {
            Ok(()) => {
                driver.base.status = Status::Ready;
                driver.base.reason.clear();
                let mut entity = StoredEntity::from(driver);
                self.store.update_with_error(&mut entity, None).await;
                debug!(driver = %entity.name(), "event driver updated");
                Ok(())
            }
            Err(err) => {
                record_backend_error(&mut driver.base, &err);
                let mut entity = StoredEntity::from(driver);
                self.store.update_with_error(&mut entity, None).await;
                Err(format!("error updating driver: {err}").into())
            }
        }
    }

    async fn delete(&self, entity: StoredEntity) -> HandlerResult {
        let driver = Driver::try_from(entity)?;

        match self.backend.delete(&driver).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                debug!(driver = %driver.base.name, "backend workload already gone");
            }
            // Leave the store record untouched; the next resync retries
            // teardown, so deletion is never silently lost.
            Err(err) => return Err(format!("error deleting driver: {err}").into()),
        }

        self.store
            .delete(
                &driver.base.organization_id,
                EntityKind::Driver,
                &driver.base.name,
            )
            .await?;
        info!(driver = %driver.base.name, "driver deleted from the backend and the entity store");
        Ok(())
    }

    async fn sync(
        &self,
        organization_id: &str,
        resync_period: Duration,
    ) -> HandlerResult<Vec<StoredEntity>> {
        // Drivers resync regardless of status, so READY workloads that
        // drifted on the backend are re-driven too.
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(resync_period)
                .unwrap_or_else(|_| chrono::Duration::zero());
        let filter = Filter::everything().add(FilterCond::ModifiedBefore(cutoff));
        default_sync(
            &self.store,
            EntityKind::Driver,
            organization_id,
            resync_period,
            Some(filter),
        )
        .await
    }

    async fn on_error(&self, entity: StoredEntity) -> HandlerResult {
        let base = entity.base();
        if base.reason.is_empty() {
            warn!(driver = %base.name, "driver in error state without a reason");
        } else {
            error!(driver = %base.name, reasons = ?base.reason, "driver in error state");
        }
        Ok(())
    }
}

/// Reconciles `DriverType` entities. Types own no external resource; the
/// handler only settles store state.
pub struct DriverTypeEntityHandler {
    store: Arc<dyn EntityStore>,
}

impl DriverTypeEntityHandler {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EntityHandler for DriverTypeEntityHandler {
    fn kind(&self) -> EntityKind {
        EntityKind::DriverType
    }

    async fn add(&self, entity: StoredEntity) -> HandlerResult {
        let mut driver_type = DriverType::try_from(entity)?;
        driver_type.base.status = Status::Ready;
        let mut entity = StoredEntity::from(driver_type);
        self.store.update_with_error(&mut entity, None).await;
        Ok(())
    }

    async fn update(&self, entity: StoredEntity) -> HandlerResult {
        self.add(entity).await
    }

    async fn delete(&self, entity: StoredEntity) -> HandlerResult {
        let driver_type = DriverType::try_from(entity)?;
        self.store
            .delete(
                &driver_type.base.organization_id,
                EntityKind::DriverType,
                &driver_type.base.name,
            )
            .await?;
        info!(driver_type = %driver_type.base.name, "driver type deleted");
        Ok(())
    }

    async fn sync(
        &self,
        organization_id: &str,
        resync_period: Duration,
    ) -> HandlerResult<Vec<StoredEntity>> {
        default_sync(
            &self.store,
            EntityKind::DriverType,
            organization_id,
            resync_period,
            None,
        )
        .await
    }

    async fn on_error(&self, entity: StoredEntity) -> HandlerResult {
        error!(driver_type = %entity.name(), reasons = ?entity.base().reason, "driver type in error state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerBackend;
    use crate::memory::{InMemoryContainerEngine, StaticSecretReader};
    use rudder_store::InMemoryEntityStore;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Backend failing every call, for error-path tests.
    struct FailingBackend {
        not_found_on_delete: AtomicBool,
    }

    impl FailingBackend {
        fn new() -> Self {
            Self {
                not_found_on_delete: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl DriverBackend for FailingBackend {
        async fn deploy(&self, driver: &mut Driver) -> Result<(), BackendError> {
            Err(BackendError::DeploymentNotAvailable {
                name: driver.base.name.clone(),
                detail: "no available replicas".to_string(),
            })
        }

        async fn update(&self, driver: &mut Driver) -> Result<(), BackendError> {
            self.deploy(driver).await
        }

        async fn delete(&self, driver: &Driver) -> Result<(), BackendError> {
            if self.not_found_on_delete.load(Ordering::SeqCst) {
                Err(BackendError::ObjectNotFound {
                    name: driver.base.name.clone(),
                })
            } else {
                Err(BackendError::Other("api unreachable".to_string()))
            }
        }

        async fn expose(&self, _driver: &mut Driver) -> Result<(), BackendError> {
            Ok(())
        }
    }

    fn driver_entity() -> StoredEntity {
        let mut base = BaseEntity::new("org1", "d1");
        base.status = Status::Creating;
        StoredEntity::from(Driver {
            base,
            driver_type: "vcenter".to_string(),
            config: BTreeMap::from([("vcenterurl".to_string(), "vc.example.com".to_string())]),
            secrets: vec![],
            image: "rudder/driver:latest".to_string(),
            expose: false,
            url: None,
        })
    }

    fn container_backend(engine: Arc<InMemoryContainerEngine>) -> Arc<dyn DriverBackend> {
        Arc::new(ContainerBackend::new(
            engine,
            Arc::new(StaticSecretReader::new(BTreeMap::new())),
        ))
    }

    async fn seeded(store: &InMemoryEntityStore) -> StoredEntity {
        let mut entity = driver_entity();
        store.add(&mut entity).await.unwrap();
        entity
    }

    #[tokio::test]
    async fn add_deploys_and_flips_status_to_ready() {
        let store = Arc::new(InMemoryEntityStore::new());
        let engine = Arc::new(InMemoryContainerEngine::new());
        let handler =
            DriverEntityHandler::new(store.clone(), container_backend(engine.clone()));

        let entity = seeded(&store).await;
        handler.add(entity).await.unwrap();

        let stored = store
            .get("org1", EntityKind::Driver, "d1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status(), Status::Ready);
        assert_eq!(engine.containers().len(), 1);
    }

    #[tokio::test]
    async fn add_twice_creates_one_workload() {
        let store = Arc::new(InMemoryEntityStore::new());
        let engine = Arc::new(InMemoryContainerEngine::new());
        let handler =
            DriverEntityHandler::new(store.clone(), container_backend(engine.clone()));

        let entity = seeded(&store).await;
        handler.add(entity).await.unwrap();

        let stored = store
            .get("org1", EntityKind::Driver, "d1")
            .await
            .unwrap()
            .unwrap();
        handler.add(stored).await.unwrap();

        assert_eq!(engine.containers().len(), 1);
    }

    #[tokio::test]
    async fn add_failure_records_error_state() {
        let store = Arc::new(InMemoryEntityStore::new());
        let handler = DriverEntityHandler::new(store.clone(), Arc::new(FailingBackend::new()));

        let entity = seeded(&store).await;
        assert!(handler.add(entity).await.is_err());

        let stored = store
            .get("org1", EntityKind::Driver, "d1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status(), Status::Error);
        assert_eq!(stored.base().reason[0], "DeploymentNotAvailable");
        assert!(stored.base().reason[1].contains("no available replicas"));
    }

    #[tokio::test]
    async fn failed_teardown_keeps_the_record() {
        let store = Arc::new(InMemoryEntityStore::new());
        let handler = DriverEntityHandler::new(store.clone(), Arc::new(FailingBackend::new()));

        let mut entity = seeded(&store).await;
        entity.base_mut().status = Status::Deleting;
        let revision = entity.base().revision;
        store
            .update(revision, &mut entity)
            .await
            .unwrap();

        assert!(handler.delete(entity).await.is_err());

        let stored = store
            .get("org1", EntityKind::Driver, "d1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status(), Status::Deleting);
    }

    #[tokio::test]
    async fn missing_backend_object_completes_the_delete() {
        let store = Arc::new(InMemoryEntityStore::new());
        let backend = Arc::new(FailingBackend::new());
        backend.not_found_on_delete.store(true, Ordering::SeqCst);
        let handler = DriverEntityHandler::new(store.clone(), backend);

        let entity = seeded(&store).await;
        handler.delete(entity).await.unwrap();

        assert!(store
            .get("org1", EntityKind::Driver, "d1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn successful_delete_removes_workload_and_record() {
        let store = Arc::new(InMemoryEntityStore::new());
        let engine = Arc::new(InMemoryContainerEngine::new());
        let handler =
            DriverEntityHandler::new(store.clone(), container_backend(engine.clone()));

        let entity = seeded(&store).await;
        handler.add(entity).await.unwrap();

        let stored = store
            .get("org1", EntityKind::Driver, "d1")
            .await
            .unwrap()
            .unwrap();
        handler.delete(stored).await.unwrap();

        assert!(engine.containers().is_empty());
        assert!(store
            .get("org1", EntityKind::Driver, "d1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn driver_type_add_settles_to_ready() {
        let store = Arc::new(InMemoryEntityStore::new());
        let handler = DriverTypeEntityHandler::new(store.clone());

        let mut base = BaseEntity::new("org1", "timer");
        base.status = Status::Creating;
        let mut entity = StoredEntity::from(DriverType {
            base,
            image: "rudder/timer:latest".to_string(),
            built_in: false,
            config: BTreeMap::new(),
        });
        store.add(&mut entity).await.unwrap();

        handler.add(entity).await.unwrap();

        let stored = store
            .get("org1", EntityKind::DriverType, "timer")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status(), Status::Ready);
    }
}
