//! The `DriverBackend` trait and helpers shared by both backends.

use async_trait::async_trait;
use rudder_types::Driver;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::builtin;
use crate::error::BackendError;

/// Label marking every resource this control plane manages.
pub const APP_LABEL_KEY: &str = "app";
pub const APP_LABEL_VALUE: &str = "event-driver";

/// Label carrying the owning driver entity id.
pub const DRIVER_ID_LABEL: &str = "rudder-eventdriver-id";

pub(crate) const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Deploys, updates and deletes the workload producing events for a driver
/// entity. Implementations must be update-safe: re-applying a deployment for
/// an unchanged driver is not an error.
#[async_trait]
pub trait DriverBackend: Send + Sync {
    async fn deploy(&self, driver: &mut Driver) -> Result<(), BackendError>;

    async fn update(&self, driver: &mut Driver) -> Result<(), BackendError>;

    async fn delete(&self, driver: &Driver) -> Result<(), BackendError>;

    /// Provisions an externally reachable ingress for the workload and
    /// records the URL on the driver.
    async fn expose(&self, driver: &mut Driver) -> Result<(), BackendError>;
}

/// Deterministic workload name, so delete and update can locate the managed
/// resource without extra bookkeeping.
pub fn workload_name(driver: &Driver) -> String {
    format!("event-driver-{}-{}", driver.driver_type, driver.base.name)
}

/// Environment variable set from resolved secret key/values: keys upper-cased
/// with `-` mapped to `_`.
pub fn build_env(input: &BTreeMap<String, String>) -> Vec<(String, String)> {
    input
        .iter()
        .map(|(key, value)| (key.to_uppercase().replace('-', "_"), value.clone()))
        .collect()
}

/// CLI argument list from a config map: `--key=value`, or `--key` alone for
/// an empty value.
pub fn build_args(input: &BTreeMap<String, String>) -> Vec<String> {
    input
        .iter()
        .map(|(key, value)| {
            if value.is_empty() {
                format!("--{key}")
            } else {
                format!("--{key}={value}")
            }
        })
        .collect()
}

/// Arguments for the driver container. Built-in drivers run the shared image
/// and receive their type as the leading argument.
pub fn driver_args(driver: &Driver) -> Vec<String> {
    let config_args = build_args(&driver.config);
    if builtin::is_built_in(&driver.driver_type) {
        let mut args = vec![driver.driver_type.clone()];
        args.extend(config_args);
        args
    } else {
        config_args
    }
}

/// Retries `op` with a short fixed delay until it succeeds or the deadline
/// elapses, returning the last error.
pub(crate) async fn backoff<T, F, Fut>(deadline: Duration, mut op: F) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let started = Instant::now();
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if started.elapsed() >= deadline {
                    return Err(err);
                }
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rudder_types::BaseEntity;

    fn driver(driver_type: &str) -> Driver {
        Driver {
            base: BaseEntity::new("org1", "d1"),
            driver_type: driver_type.to_string(),
            config: BTreeMap::from([
                ("vcenterurl".to_string(), "vc.example.com".to_string()),
                ("insecure".to_string(), String::new()),
            ]),
            secrets: vec![],
            image: "image:latest".to_string(),
            expose: false,
            url: None,
        }
    }

    #[test]
    fn workload_name_is_deterministic() {
        assert_eq!(workload_name(&driver("vcenter")), "event-driver-vcenter-d1");
    }

    #[test]
    fn env_uppercases_and_replaces_dashes() {
        let input = BTreeMap::from([("api-key".to_string(), "s3cret".to_string())]);
        assert_eq!(
            build_env(&input),
            vec![("API_KEY".to_string(), "s3cret".to_string())]
        );
    }

    #[test]
    fn args_handle_empty_values() {
        let args = build_args(&driver("vcenter").config);
        assert!(args.contains(&"--vcenterurl=vc.example.com".to_string()));
        assert!(args.contains(&"--insecure".to_string()));
    }

    #[test]
    fn built_in_driver_args_lead_with_type() {
        let args = driver_args(&driver("vcenter"));
        assert_eq!(args[0], "vcenter");
        assert_eq!(args.len(), 3);

        let custom = driver_args(&driver("my-custom"));
        assert_eq!(custom.len(), 2);
        assert!(custom[0].starts_with("--"));
    }
}
