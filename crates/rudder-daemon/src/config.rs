//! Configuration for rudderd.

use rudder_transport::TransportKind;
use serde::{Deserialize, Serialize};

/// Main daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Organization this process reconciles.
    #[serde(default = "default_organization")]
    pub organization_id: String,

    #[serde(default)]
    pub controller: ControllerConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub drivers: DriversConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            organization_id: default_organization(),
            controller: ControllerConfig::default(),
            transport: TransportConfig::default(),
            drivers: DriversConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Reconciliation controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Resync period in seconds; doubles as the retry interval.
    #[serde(default = "default_resync_period")]
    pub resync_period_secs: u64,

    /// Worker pool size.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            resync_period_secs: default_resync_period(),
            workers: default_workers(),
        }
    }
}

/// Event transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_transport_kind")]
    pub kind: TransportKind,

    #[serde(default)]
    pub kafka_brokers: Vec<String>,

    #[serde(default)]
    pub rabbitmq_url: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: default_transport_kind(),
            kafka_brokers: Vec::new(),
            rabbitmq_url: String::new(),
        }
    }
}

/// Which backend deploys driver workloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverBackendKind {
    Container,
    Cluster,
}

/// Driver workload configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriversConfig {
    #[serde(default = "default_backend_kind")]
    pub backend: DriverBackendKind,

    /// Cluster namespace driver workloads land in.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Shared image for built-in drivers.
    #[serde(default = "default_driver_image")]
    pub driver_image: String,

    /// Transport sidecar image.
    #[serde(default = "default_sidecar_image")]
    pub sidecar_image: String,

    /// Hostname exposed drivers are routed under.
    #[serde(default)]
    pub ingress_host: String,

    #[serde(default)]
    pub tracer_url: String,
}

impl Default for DriversConfig {
    fn default() -> Self {
        Self {
            backend: default_backend_kind(),
            namespace: default_namespace(),
            driver_image: default_driver_image(),
            sidecar_image: default_sidecar_image(),
            ingress_host: String::new(),
            tracer_url: String::new(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_organization() -> String {
    "default".to_string()
}

fn default_resync_period() -> u64 {
    60
}

fn default_workers() -> usize {
    100
}

fn default_transport_kind() -> TransportKind {
    TransportKind::Memory
}

fn default_backend_kind() -> DriverBackendKind {
    DriverBackendKind::Container
}

fn default_namespace() -> String {
    "rudder".to_string()
}

fn default_driver_image() -> String {
    "rudder/event-driver:latest".to_string()
}

fn default_sidecar_image() -> String {
    "rudder/event-sidecar:latest".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Loads configuration: defaults, then an optional file, then `RUDDER_*`
    /// environment variables.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("RUDDER")
                .separator("_")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_knobs() {
        let config = DaemonConfig::default();
        assert_eq!(config.controller.resync_period_secs, 60);
        assert_eq!(config.controller.workers, 100);
        assert_eq!(config.transport.kind, TransportKind::Memory);
        assert_eq!(config.drivers.backend, DriverBackendKind::Container);
        assert_eq!(config.drivers.namespace, "rudder");
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let config = DaemonConfig::load(None).unwrap();
        assert_eq!(config.organization_id, "default");
        assert_eq!(config.logging.level, "info");
    }
}
