//! Subscription lifecycle: service -> controller -> manager -> transport,
//! plus cold-start rehydration from the store.

use async_trait::async_trait;
use rudder_controller::{Controller, Options};
use rudder_store::{EntityStore, InMemoryEntityStore};
use rudder_subscriptions::{
    DefaultManager, FunctionRunner, Manager, RunnerError, SubscriptionEntityHandler,
    SubscriptionService,
};
use rudder_transport::{EventTransport, InMemoryTransport};
use rudder_types::{BaseEntity, CloudEvent, EntityKind, FunctionRun, Status, Subscription};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct RecordingRunner {
    runs: Mutex<Vec<FunctionRun>>,
}

impl RecordingRunner {
    fn runs(&self) -> Vec<FunctionRun> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl FunctionRunner for RecordingRunner {
    async fn run_function(
        &self,
        _organization_id: &str,
        run: FunctionRun,
    ) -> Result<FunctionRun, RunnerError> {
        self.runs.lock().unwrap().push(run.clone());
        Ok(run)
    }
}

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
    transport: Arc<InMemoryTransport>,
    runner: Arc<RecordingRunner>,
    manager: Arc<DefaultManager>,
    service: SubscriptionService,
    controller: Arc<Controller>,
}

async fn harness() -> Harness {
    let store = Arc::new(InMemoryEntityStore::new());
    let transport = Arc::new(InMemoryTransport::new());
    let runner = Arc::new(RecordingRunner::default());
    let manager = Arc::new(DefaultManager::new(transport.clone(), runner.clone()));

    let mut controller = Controller::new(Options {
        organization_id: "org1".to_string(),
        resync_period: Duration::from_secs(3600),
        workers: 8,
    });
    let store_dyn: Arc<dyn EntityStore> = store.clone();
    controller.add_entity_handler(Arc::new(SubscriptionEntityHandler::new(
        store_dyn.clone(),
        manager.clone(),
    )));
    let controller = Arc::new(controller);
    controller.clone().start().await;

    let service = SubscriptionService::new(store_dyn, controller.watcher(), "org1");

    Harness {
        store,
        transport,
        runner,
        manager,
        service,
        controller,
    }
}

fn subscription(name: &str, topic: &str) -> Subscription {
    Subscription {
        base: BaseEntity::new("org1", name),
        event_type: topic.to_string(),
        source_type: "test".to_string(),
        function: "fn1".to_string(),
        secrets: vec![],
    }
}

#[tokio::test]
async fn published_event_invokes_the_function_once() {
    let h = harness().await;

    h.service
        .create(subscription("sub1", "test.topic"))
        .await
        .unwrap();

    wait_for(|| async {
        matches!(
            h.store
                .get("org1", EntityKind::Subscription, "sub1")
                .await
                .unwrap(),
            Some(entity) if entity.status() == Status::Ready
        )
    })
    .await;

    let mut event = CloudEvent::with_defaults("test.topic");
    event.content_type = Some("application/json".to_string());
    event.data = "{\"vm\":\"vm-42\"}".to_string();
    h.transport
        .publish(&event, "test.topic", "org1")
        .await
        .unwrap();

    wait_for(|| async { h.runner.runs().len() == 1 }).await;
    let runs = h.runner.runs();
    assert_eq!(runs[0].function_name, "fn1");
    assert_eq!(runs[0].input["vm"], "vm-42");

    h.controller.shutdown();
}

#[tokio::test]
async fn deleted_subscription_stops_receiving_events() {
    let h = harness().await;

    h.service
        .create(subscription("sub1", "test.topic"))
        .await
        .unwrap();
    wait_for(|| async { h.manager.active_count().await == 1 }).await;

    h.service.delete("sub1").await.unwrap();
    wait_for(|| async {
        h.store
            .get("org1", EntityKind::Subscription, "sub1")
            .await
            .unwrap()
            .is_none()
    })
    .await;
    wait_for(|| async { h.manager.active_count().await == 0 }).await;

    let event = CloudEvent::with_defaults("test.topic");
    h.transport
        .publish(&event, "test.topic", "org1")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.runner.runs().is_empty());

    h.controller.shutdown();
}

#[tokio::test]
async fn cold_start_rehydrates_persisted_subscriptions() {
    let h = harness().await;

    for i in 0..3 {
        h.service
            .create(subscription(&format!("sub{i}"), &format!("topic.{i}")))
            .await
            .unwrap();
    }
    wait_for(|| async { h.manager.active_count().await == 3 }).await;
    h.controller.shutdown();

    // A fresh process: empty in-memory table, same persisted entities.
    let transport = Arc::new(InMemoryTransport::new());
    let runner = Arc::new(RecordingRunner::default());
    let restarted = DefaultManager::new(transport.clone(), runner);
    assert_eq!(restarted.active_count().await, 0);

    let persisted = h.service.list_active().await.unwrap();
    restarted.run(&persisted).await.unwrap();
    assert_eq!(restarted.active_count().await, 3);
}
