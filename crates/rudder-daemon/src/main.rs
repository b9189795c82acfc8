//! rudderd - background reconciliation daemon.
//!
//! Wires the entity store, the event transport, the driver backend and the
//! subscription manager into the reconciliation controller, rehydrates live
//! subscriptions from the store, and runs until interrupted.

use anyhow::{bail, Context};
use clap::Parser;
use rudder_controller::{Controller, Options};
use rudder_drivers::{
    ClusterBackend, ClusterConfig, ContainerBackend, DriverBackend, DriverEntityHandler,
    DriverTypeEntityHandler, InMemoryClusterClient, InMemoryContainerEngine, SecretReader,
    StaticSecretReader,
};
use rudder_store::{EntityStore, Filter, InMemoryEntityStore};
use rudder_subscriptions::{
    DefaultManager, Manager, NoopFunctionRunner, SubscriptionEntityHandler,
};
use rudder_transport::{EventTransport, InMemoryTransport, TransportKind};
use rudder_types::{EntityKind, Status, Subscription};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;

use crate::config::{DaemonConfig, DriverBackendKind};

/// rudder daemon CLI.
#[derive(Parser)]
#[command(name = "rudderd")]
#[command(about = "rudder - event control plane reconciliation daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "RUDDER_CONFIG")]
    config: Option<String>,

    /// Organization to reconcile
    #[arg(short, long, env = "RUDDER_ORGANIZATION")]
    organization: Option<String>,

    /// Transport kind (kafka|rabbitmq|memory)
    #[arg(short, long, env = "RUDDER_TRANSPORT")]
    transport: Option<String>,

    /// Log level
    #[arg(long, env = "RUDDER_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "RUDDER_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.clone().into());

    if cli.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let mut config = DaemonConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(organization) = cli.organization {
        config.organization_id = organization;
    }
    if let Some(transport) = cli.transport {
        config.transport.kind = transport
            .parse()
            .map_err(|err: String| anyhow::anyhow!(err))?;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        organization = %config.organization_id,
        transport = %config.transport.kind,
        "rudderd starting"
    );

    let store: Arc<dyn EntityStore> = Arc::new(InMemoryEntityStore::new());

    let transport: Arc<dyn EventTransport> = match config.transport.kind {
        TransportKind::Memory => Arc::new(InMemoryTransport::new()),
        other => {
            // The broker wire clients are external to this build.
            bail!("transport {other} requires an external broker client build");
        }
    };

    let secrets: Arc<dyn SecretReader> = Arc::new(StaticSecretReader::new(Default::default()));

    let backend: Arc<dyn DriverBackend> = match config.drivers.backend {
        DriverBackendKind::Container => Arc::new(ContainerBackend::new(
            Arc::new(InMemoryContainerEngine::new()),
            secrets.clone(),
        )),
        DriverBackendKind::Cluster => Arc::new(ClusterBackend::new(
            Arc::new(InMemoryClusterClient::new()),
            secrets.clone(),
            ClusterConfig {
                namespace: config.drivers.namespace.clone(),
                driver_image: config.drivers.driver_image.clone(),
                sidecar_image: config.drivers.sidecar_image.clone(),
                transport_kind: config.transport.kind.to_string(),
                rabbitmq_url: config.transport.rabbitmq_url.clone(),
                kafka_brokers: config.transport.kafka_brokers.clone(),
                tracer_url: config.drivers.tracer_url.clone(),
                ingress_host: config.drivers.ingress_host.clone(),
            },
        )),
    };

    let manager = Arc::new(DefaultManager::new(
        transport.clone(),
        Arc::new(NoopFunctionRunner),
    ));

    let mut controller = Controller::new(Options {
        organization_id: config.organization_id.clone(),
        resync_period: Duration::from_secs(config.controller.resync_period_secs),
        workers: config.controller.workers,
    });
    controller.add_entity_handler(Arc::new(DriverEntityHandler::new(
        store.clone(),
        backend.clone(),
    )));
    controller.add_entity_handler(Arc::new(DriverTypeEntityHandler::new(store.clone())));
    controller.add_entity_handler(Arc::new(SubscriptionEntityHandler::new(
        store.clone(),
        manager.clone(),
    )));
    let controller = Arc::new(controller);

    // Cold-start recovery: the active-subscription table is process-local, so
    // it is rebuilt from the persisted entities before anything else runs.
    let persisted = store
        .list(
            &config.organization_id,
            EntityKind::Subscription,
            &Filter::everything(),
        )
        .await
        .context("listing persisted subscriptions")?;
    let live: Vec<Subscription> = persisted
        .into_iter()
        .filter(|e| !e.base().delete && e.status() != Status::Deleting)
        .filter_map(|e| Subscription::try_from(e).ok())
        .collect();
    manager
        .run(&live)
        .await
        .context("rehydrating subscriptions")?;

    controller.clone().start().await;
    info!("rudderd started");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");

    controller.shutdown();
    manager.shutdown().await;
    transport.close().await;

    Ok(())
}
