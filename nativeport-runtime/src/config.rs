//! Startup properties for the allocation tracker
//!
//! Design: read once from the process environment (or installed explicitly
//! with [`init`] before first use) and frozen afterwards. Each property has a
//! legacy spelling and a current spelling; when both are set the current
//! spelling wins.

use crate::error::{Error, Result};
use crate::memory::{parse_bytes, total_physical_bytes};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::{debug, error};

static CONFIG: OnceCell<RuntimeConfig> = OnceCell::new();

/// (legacy, current) environment variable names
const NO_POINTER_GC: (&str, &str) = ("NATIVEPORT_NOPOINTERGC", "NATIVEPORT_NO_POINTER_GC");
const MAX_BYTES: (&str, &str) = ("NATIVEPORT_MAXBYTES", "NATIVEPORT_MAX_BYTES");
const MAX_PHYSICAL_BYTES: (&str, &str) = (
    "NATIVEPORT_MAXPHYSICALBYTES",
    "NATIVEPORT_MAX_PHYSICAL_BYTES",
);
const MAX_RETRIES: (&str, &str) = ("NATIVEPORT_MAXRETRIES", "NATIVEPORT_MAX_RETRIES");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Disable background reclamation; dropping a handle frees it inline
    pub no_pointer_gc: bool,
    /// Ceiling on tracked native bytes, 0 disables the check
    pub max_bytes: usize,
    /// Ceiling on the resident set, 0 disables the check
    pub max_physical_bytes: usize,
    /// Admission retries before reporting out of memory
    pub max_retries: u32,
    /// Wait between admission retries
    pub retry_delay: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let max_bytes = total_physical_bytes().map(|total| total / 4).unwrap_or(0);
        Self {
            no_pointer_gc: false,
            max_bytes,
            max_physical_bytes: max_bytes.saturating_mul(2),
            max_retries: 10,
            retry_delay: Duration::from_millis(100),
        }
    }
}

impl RuntimeConfig {
    /// Limits that never refuse anything, handy for embedding and tests
    pub fn unlimited() -> Self {
        Self {
            max_bytes: 0,
            max_physical_bytes: 0,
            ..Self::default()
        }
    }

    /// Create config from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from any key lookup (environment, property file, test map)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let read = |names: (&str, &str)| -> Option<(String, String)> {
            let (legacy, current) = names;
            lookup(current)
                .map(|v| (current.to_string(), v))
                .or_else(|| lookup(legacy).map(|v| (legacy.to_string(), v)))
        };

        if let Some((_, value)) = read(NO_POINTER_GC) {
            let value = value.trim().to_ascii_lowercase();
            config.no_pointer_gc = matches!(value.as_str(), "" | "t" | "true" | "1");
        }

        let max_memory = total_physical_bytes().unwrap_or(0);
        if let Some((key, value)) = read(MAX_BYTES) {
            config.max_bytes = parse_bytes(&value, max_memory)
                .map_err(|_| Error::InvalidConfig { key, value })?;
            config.max_physical_bytes = config.max_bytes.saturating_mul(2);
        }
        if let Some((key, value)) = read(MAX_PHYSICAL_BYTES) {
            config.max_physical_bytes = parse_bytes(&value, max_memory)
                .map_err(|_| Error::InvalidConfig { key, value })?;
        }
        if let Some((key, value)) = read(MAX_RETRIES) {
            config.max_retries = value
                .trim()
                .parse()
                .map_err(|_| Error::InvalidConfig { key, value })?;
        }

        Ok(config)
    }
}

/// Install the configuration explicitly.
///
/// Fails if a configuration was already installed or read lazily.
pub fn init(config: RuntimeConfig) -> core::result::Result<(), RuntimeConfig> {
    CONFIG.set(config)
}

/// The frozen process configuration
pub fn get() -> &'static RuntimeConfig {
    CONFIG.get_or_init(|| match RuntimeConfig::from_env() {
        Ok(config) => {
            debug!(
                target: "nativeport::config",
                no_pointer_gc = config.no_pointer_gc,
                max_bytes = config.max_bytes,
                max_physical_bytes = config.max_physical_bytes,
                max_retries = config.max_retries,
                "runtime configuration loaded"
            );
            config
        }
        Err(err) => {
            error!(target: "nativeport::config", error = %err, "falling back to default limits");
            RuntimeConfig::default()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_value_disables_pointer_gc() {
        let config = RuntimeConfig::from_lookup(lookup(&[("NATIVEPORT_NOPOINTERGC", "")])).unwrap();
        assert!(config.no_pointer_gc);

        let config =
            RuntimeConfig::from_lookup(lookup(&[("NATIVEPORT_NO_POINTER_GC", "false")])).unwrap();
        assert!(!config.no_pointer_gc);
    }

    #[test]
    fn current_spelling_wins() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("NATIVEPORT_MAXBYTES", "1m"),
            ("NATIVEPORT_MAX_BYTES", "2m"),
            ("NATIVEPORT_MAXRETRIES", "3"),
            ("NATIVEPORT_MAX_RETRIES", "4"),
        ]))
        .unwrap();
        assert_eq!(config.max_bytes, 2 * 1024 * 1024);
        assert_eq!(config.max_physical_bytes, 4 * 1024 * 1024);
        assert_eq!(config.max_retries, 4);
    }

    #[test]
    fn physical_ceiling_can_be_set_independently() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("NATIVEPORT_MAX_BYTES", "1g"),
            ("NATIVEPORT_MAX_PHYSICAL_BYTES", "0"),
        ]))
        .unwrap();
        assert_eq!(config.max_bytes, 1 << 30);
        assert_eq!(config.max_physical_bytes, 0);
    }

    #[test]
    fn malformed_values_name_the_key() {
        let err = RuntimeConfig::from_lookup(lookup(&[("NATIVEPORT_MAX_RETRIES", "many")]))
            .unwrap_err();
        assert_eq!(
            err,
            Error::InvalidConfig {
                key: "NATIVEPORT_MAX_RETRIES".into(),
                value: "many".into()
            }
        );
    }
}
