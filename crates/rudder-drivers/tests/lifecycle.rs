//! Driver lifecycle: service -> controller -> backend -> store.

use rudder_controller::{Controller, Options};
use rudder_drivers::{
    ContainerBackend, DriverEntityHandler, DriverService, DriverServiceConfig,
    DriverTypeEntityHandler, InMemoryContainerEngine, StaticSecretReader,
};
use rudder_store::{EntityStore, InMemoryEntityStore};
use rudder_types::{BaseEntity, Driver, EntityKind, Status};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

async fn wait_for<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached within the deadline");
}

struct Harness {
    store: Arc<InMemoryEntityStore>,
    engine: Arc<InMemoryContainerEngine>,
    service: DriverService,
    controller: Arc<Controller>,
}

async fn harness() -> Harness {
    let store = Arc::new(InMemoryEntityStore::new());
    let engine = Arc::new(InMemoryContainerEngine::new());
    let secrets = Arc::new(StaticSecretReader::new(BTreeMap::new()));
    let backend = Arc::new(ContainerBackend::new(engine.clone(), secrets.clone()));

    let mut controller = Controller::new(Options {
        organization_id: "org1".to_string(),
        resync_period: Duration::from_secs(3600),
        workers: 8,
    });
    let store_dyn: Arc<dyn EntityStore> = store.clone();
    controller.add_entity_handler(Arc::new(DriverEntityHandler::new(
        store_dyn.clone(),
        backend,
    )));
    controller.add_entity_handler(Arc::new(DriverTypeEntityHandler::new(store_dyn.clone())));
    let controller = Arc::new(controller);
    controller.clone().start().await;

    let service = DriverService::new(
        store_dyn,
        secrets,
        controller.watcher(),
        DriverServiceConfig {
            organization_id: "org1".to_string(),
            driver_image: "rudder/event-driver:latest".to_string(),
        },
    );

    Harness {
        store,
        engine,
        service,
        controller,
    }
}

fn vcenter_driver(name: &str) -> Driver {
    Driver {
        base: BaseEntity::new("org1", name),
        driver_type: "vcenter".to_string(),
        config: BTreeMap::from([("vcenterurl".to_string(), "vc.example.com".to_string())]),
        secrets: vec![],
        image: String::new(),
        expose: false,
        url: None,
    }
}

#[tokio::test]
async fn driver_reaches_ready_and_is_torn_down_on_delete() {
    let h = harness().await;

    let created = h.service.create(vcenter_driver("d1")).await.unwrap();
    assert_eq!(created.base.status, Status::Creating);

    // The watcher fast path drives the driver to READY.
    wait_for(|| async {
        matches!(
            h.store.get("org1", EntityKind::Driver, "d1").await.unwrap(),
            Some(entity) if entity.status() == Status::Ready
        )
    })
    .await;
    assert_eq!(h.engine.containers().len(), 1);

    let deleted = h.service.delete("d1").await.unwrap();
    assert_eq!(deleted.base.status, Status::Deleting);

    // Backend teardown confirmed, then the record is removed for good.
    wait_for(|| async {
        h.store
            .get("org1", EntityKind::Driver, "d1")
            .await
            .unwrap()
            .is_none()
    })
    .await;
    assert!(h.engine.containers().is_empty());

    h.controller.shutdown();
}

#[tokio::test]
async fn invalid_driver_never_reaches_the_backend() {
    let h = harness().await;

    let err = h
        .service
        .create({
            let mut d = vcenter_driver("d2");
            d.config.clear();
            d
        })
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.engine.containers().is_empty());
    assert!(h
        .store
        .get("org1", EntityKind::Driver, "d2")
        .await
        .unwrap()
        .is_none());

    h.controller.shutdown();
}
