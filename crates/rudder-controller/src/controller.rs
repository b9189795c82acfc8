//! Controller runtime: watch queue, worker pool, periodic resync.

use rand::Rng;
use rudder_types::{EntityKind, Status, StoredEntity};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::handler::EntityHandler;

/// Default worker pool size.
pub const DEFAULT_WORKERS: usize = 100;

const DEFAULT_RESYNC: Duration = Duration::from_secs(60);
const WATCH_QUEUE_CAPACITY: usize = 1024;

/// Controller configuration, constructed once at startup.
#[derive(Debug, Clone)]
pub struct Options {
    /// Organization the resync passes are scoped to.
    pub organization_id: String,

    /// Period of the full-listing resync; also the system's retry interval.
    pub resync_period: Duration,

    /// Worker pool size bounding concurrent entity processing.
    pub workers: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            organization_id: "default".to_string(),
            resync_period: DEFAULT_RESYNC,
            workers: DEFAULT_WORKERS,
        }
    }
}

/// An entity queued for reconciliation.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub entity: StoredEntity,
}

/// Notification sink handed to API handlers: pushes a just-written entity
/// into the reconciliation queue for fast (non-resync-latency) processing.
#[derive(Clone)]
pub struct Watcher {
    tx: mpsc::Sender<WatchEvent>,
}

impl Watcher {
    /// Stand-alone watcher over a fresh queue, for tests and tooling that
    /// inspect notifications without running a controller.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<WatchEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn on_action(&self, entity: StoredEntity) {
        // The queued event outlives the API request that produced it, so it
        // carries its own entity copy rather than borrowing request state.
        if let Err(err) = self.tx.try_send(WatchEvent { entity }) {
            warn!(error = %err, "watch queue unavailable, skipping entity notification");
        }
    }
}

/// Generic reconciliation controller: a fixed-size worker pool consuming a
/// change queue fed by watcher notifications and periodic resync passes.
pub struct Controller {
    options: Options,
    handlers: HashMap<EntityKind, Arc<dyn EntityHandler>>,
    watch_tx: mpsc::Sender<WatchEvent>,
    watch_rx: Mutex<Option<mpsc::Receiver<WatchEvent>>>,
    workers: Arc<Semaphore>,
    shutdown_tx: watch::Sender<bool>,
}

impl Controller {
    pub fn new(options: Options) -> Self {
        let workers = options.workers.max(1);
        let (watch_tx, watch_rx) = mpsc::channel(WATCH_QUEUE_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            options,
            handlers: HashMap::new(),
            watch_tx,
            watch_rx: Mutex::new(Some(watch_rx)),
            workers: Arc::new(Semaphore::new(workers)),
            shutdown_tx,
        }
    }

    /// Registers the handler for its entity kind. Call before `start`; the
    /// last registration for a kind wins.
    pub fn add_entity_handler(&mut self, handler: Arc<dyn EntityHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn watcher(&self) -> Watcher {
        Watcher {
            tx: self.watch_tx.clone(),
        }
    }

    /// Runs one blocking sync pass so startup requests observe reconciled
    /// state, then spawns the control loop.
    pub async fn start(self: Arc<Self>) {
        sync_once(&self).await;

        let mut rx = match self.watch_rx.lock().await.take() {
            Some(rx) => rx,
            None => {
                warn!("controller already started");
                return;
            }
        };

        let controller = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut next_sync = Instant::now() + controller.jittered_period();
            loop {
                tokio::select! {
                    maybe = rx.recv() => match maybe {
                        Some(event) => dispatch(&controller, event.entity).await,
                        None => break,
                    },
                    _ = tokio::time::sleep_until(next_sync) => {
                        debug!("periodic resync pass");
                        sync_once(&controller).await;
                        next_sync = Instant::now() + controller.jittered_period();
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            info!("controller loop stopped");
        });
    }

    /// Stops the control loop. In-flight workers finish their current item.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Resync period plus up to 10% uniform jitter, so many organizations do
    /// not resync in lockstep.
    fn jittered_period(&self) -> Duration {
        let period = self.options.resync_period;
        let jitter_ceiling = (period.as_millis() / 10) as u64;
        if jitter_ceiling == 0 {
            return period;
        }
        period + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ceiling))
    }

    async fn process_item(&self, entity: StoredEntity) {
        let kind = entity.kind();
        let name = entity.name().to_string();
        let status = entity.status();
        debug!(entity = %name, %kind, %status, "processing item");

        let handler = match self.handlers.get(&kind) {
            Some(handler) => handler,
            None => {
                error!(%kind, entity = %name, "no entity handler registered for kind");
                return;
            }
        };

        let result = if entity.base().delete {
            handler.delete(entity).await
        } else {
            match status {
                Status::Error => handler.on_error(entity).await,
                Status::Initialized | Status::Creating | Status::Missing => {
                    handler.add(entity).await
                }
                Status::Updating | Status::Ready => handler.update(entity).await,
                Status::Deleting => handler.delete(entity).await,
            }
        };

        if let Err(err) = result {
            error!(entity = %name, %kind, error = %err, "entity reconciliation failed");
        }
    }
}

/// One full resync pass over every registered handler.
async fn sync_once(controller: &Arc<Controller>) {
    for handler in controller.handlers.values() {
        let entities = match handler
            .sync(
                &controller.options.organization_id,
                controller.options.resync_period,
            )
            .await
        {
            Ok(entities) => entities,
            Err(err) => {
                error!(kind = %handler.kind(), error = %err, "sync listing failed");
                continue;
            }
        };
        for entity in entities {
            debug!(entity = %entity.name(), status = %entity.status(), "sync: processing entity");
            dispatch(controller, entity).await;
        }
    }
}

/// Hands one entity to a worker, waiting for a free slot first.
async fn dispatch(controller: &Arc<Controller>, entity: StoredEntity) {
    let permit = match controller.workers.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return,
    };
    let controller = controller.clone();
    tokio::spawn(async move {
        let _permit = permit;
        controller.process_item(entity).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerResult, EntityHandler};
    use async_trait::async_trait;
    use rudder_types::{BaseEntity, Subscription};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingHandler {
        added: AtomicUsize,
        updated: AtomicUsize,
        deleted: AtomicUsize,
        errored: AtomicUsize,
        synced: AtomicUsize,
    }

    #[async_trait]
    impl EntityHandler for RecordingHandler {
        fn kind(&self) -> EntityKind {
            EntityKind::Subscription
        }

        async fn add(&self, _entity: StoredEntity) -> HandlerResult {
            self.added.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn update(&self, _entity: StoredEntity) -> HandlerResult {
            self.updated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn delete(&self, _entity: StoredEntity) -> HandlerResult {
            self.deleted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn sync(
            &self,
            _organization_id: &str,
            _resync_period: Duration,
        ) -> HandlerResult<Vec<StoredEntity>> {
            self.synced.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        }

        async fn on_error(&self, _entity: StoredEntity) -> HandlerResult {
            self.errored.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn subscription(status: Status, delete: bool) -> StoredEntity {
        let mut base = BaseEntity::new("org1", "sub1");
        base.status = status;
        base.delete = delete;
        StoredEntity::from(Subscription {
            base,
            event_type: "test.topic".to_string(),
            source_type: "test".to_string(),
            function: "fn1".to_string(),
            secrets: vec![],
        })
    }

    async fn controller_with(handler: Arc<RecordingHandler>) -> Arc<Controller> {
        let mut controller = Controller::new(Options {
            organization_id: "org1".to_string(),
            resync_period: Duration::from_secs(3600),
            workers: 4,
        });
        controller.add_entity_handler(handler);
        Arc::new(controller)
    }

    #[tokio::test]
    async fn dispatches_by_status() {
        let handler = Arc::new(RecordingHandler::default());
        let controller = controller_with(handler.clone()).await;

        controller.process_item(subscription(Status::Creating, false)).await;
        controller.process_item(subscription(Status::Initialized, false)).await;
        controller.process_item(subscription(Status::Missing, false)).await;
        controller.process_item(subscription(Status::Ready, false)).await;
        controller.process_item(subscription(Status::Updating, false)).await;
        controller.process_item(subscription(Status::Deleting, false)).await;
        controller.process_item(subscription(Status::Error, false)).await;

        assert_eq!(handler.added.load(Ordering::SeqCst), 3);
        assert_eq!(handler.updated.load(Ordering::SeqCst), 2);
        assert_eq!(handler.deleted.load(Ordering::SeqCst), 1);
        assert_eq!(handler.errored.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delete_flag_overrides_status() {
        let handler = Arc::new(RecordingHandler::default());
        let controller = controller_with(handler.clone()).await;

        controller.process_item(subscription(Status::Ready, true)).await;

        assert_eq!(handler.deleted.load(Ordering::SeqCst), 1);
        assert_eq!(handler.updated.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn watcher_feeds_the_worker_pool() {
        let handler = Arc::new(RecordingHandler::default());
        let controller = controller_with(handler.clone()).await;

        controller.clone().start().await;
        // Initial blocking sync ran before the loop spawned.
        assert_eq!(handler.synced.load(Ordering::SeqCst), 1);

        let watcher = controller.watcher();
        watcher.on_action(subscription(Status::Creating, false));
        watcher.on_action(subscription(Status::Ready, false));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handler.added.load(Ordering::SeqCst), 1);
        assert_eq!(handler.updated.load(Ordering::SeqCst), 1);

        controller.shutdown();
    }

    #[tokio::test]
    async fn jitter_stays_within_ten_percent() {
        let controller = controller_with(Arc::new(RecordingHandler::default())).await;
        let period = Duration::from_secs(3600);
        for _ in 0..32 {
            let jittered = controller.jittered_period();
            assert!(jittered >= period);
            assert!(jittered <= period + Duration::from_secs(360));
        }
    }
}
