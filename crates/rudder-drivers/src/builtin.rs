//! Built-in driver catalog.
//!
//! Built-in driver types are hard-coded, run the shared driver image, and
//! declare the config keys they require. Required keys must be present in the
//! driver config or in a resolved secret before deployment is attempted;
//! custom driver types bypass this check entirely.

use once_cell::sync::Lazy;
use rudder_types::Driver;
use std::collections::BTreeMap;
use thiserror::Error;

static BUILT_IN_DRIVERS: Lazy<BTreeMap<&'static str, &'static [&'static str]>> =
    Lazy::new(|| BTreeMap::from([("vcenter", &["vcenterurl"][..])]));

pub fn is_built_in(driver_type: &str) -> bool {
    BUILT_IN_DRIVERS.contains_key(driver_type)
}

/// Config keys a built-in driver type requires, or `None` for custom types.
pub fn required_config(driver_type: &str) -> Option<&'static [&'static str]> {
    BUILT_IN_DRIVERS.get(driver_type).copied()
}

/// Names of all built-in driver types.
pub fn built_in_names() -> impl Iterator<Item = &'static str> {
    BUILT_IN_DRIVERS.keys().copied()
}

/// A built-in driver is missing a required configuration value.
#[derive(Debug, Clone, Error)]
#[error("no configuration value {key:?} in config or secrets for driver type {driver_type}")]
pub struct MissingConfig {
    pub driver_type: String,
    pub key: String,
}

/// Checks the built-in required-config table against the driver config plus
/// its resolved secrets. Custom driver types always pass.
pub fn validate_config(
    driver: &Driver,
    secrets: &BTreeMap<String, String>,
) -> Result<(), MissingConfig> {
    let Some(required) = required_config(&driver.driver_type) else {
        return Ok(());
    };
    for key in required {
        if driver.config.contains_key(*key) || secrets.contains_key(*key) {
            continue;
        }
        return Err(MissingConfig {
            driver_type: driver.driver_type.clone(),
            key: (*key).to_string(),
        });
    }
    Ok(())
}
