//! # Mediator Configuration Module
//!
//! Runtime tuning for the two channels and their consumer threads, loaded from
//! environment variables or from a configuration file.
//!
//! ## Environment Variables
//!
//! - `BRRTM_REQUEST_CAPACITY`: slots in the request channel (default: 1024)
//! - `BRRTM_EVENT_CAPACITY`: slots in the event channel (default: 1024)
//! - `BRRTM_DISPATCH_TIMEOUT_MS`: how long `dispatch_blocking` waits (default: 1000)
//! - `BRRTM_STACK_SIZE`: consumer thread stack size, decimal or `0x` hex (default: 0x20000)
//! - `BRRTM_THREAD_PREFIX`: consumer thread name prefix (default: `brrtm`)
//!
//! Capacities must be powers of two: the slot index is `sequence & (capacity - 1)`.
//!
//! ## Example
//!
//! ```bash
//! export BRRTM_REQUEST_CAPACITY=4096
//! export BRRTM_DISPATCH_TIMEOUT_MS=250
//! ```
//!
//! ```yaml
//! # mediator.yaml
//! request_capacity: 4096
//! dispatch_timeout_ms: 250
//! ```

use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::channel::DEFAULT_CAPACITY;
use crate::error::MediatorError;

/// Default wait for `dispatch_blocking`.
pub const DEFAULT_DISPATCH_TIMEOUT_MS: u64 = 1000;

/// Default consumer thread stack (128 KB). Handlers run on this stack.
pub const DEFAULT_STACK_SIZE: usize = 0x20000;

/// Configuration for a [`crate::Mediator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediatorConfig {
    /// Slots in the request channel (power of two)
    pub request_capacity: usize,
    /// Slots in the event channel (power of two)
    pub event_capacity: usize,
    /// How long `dispatch_blocking` waits for a result
    pub dispatch_timeout_ms: u64,
    /// Stack size of each consumer thread in bytes
    pub stack_size: usize,
    /// Consumer threads are named `{prefix}-requests` and `{prefix}-events`
    pub thread_name_prefix: String,
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            request_capacity: DEFAULT_CAPACITY,
            event_capacity: DEFAULT_CAPACITY,
            dispatch_timeout_ms: DEFAULT_DISPATCH_TIMEOUT_MS,
            stack_size: DEFAULT_STACK_SIZE,
            thread_name_prefix: "brrtm".to_string(),
        }
    }
}

/// Parse a size that may be written as decimal or `0x` hex.
fn parse_size(value: &str) -> Option<usize> {
    let value = value.trim();
    if let Some(hex) = value.strip_prefix("0x") {
        usize::from_str_radix(hex, 16).ok()
    } else {
        value.parse().ok()
    }
}

impl MediatorConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparseable variables keep their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            request_capacity: env::var("BRRTM_REQUEST_CAPACITY")
                .ok()
                .and_then(|s| parse_size(&s))
                .unwrap_or(defaults.request_capacity),
            event_capacity: env::var("BRRTM_EVENT_CAPACITY")
                .ok()
                .and_then(|s| parse_size(&s))
                .unwrap_or(defaults.event_capacity),
            dispatch_timeout_ms: env::var("BRRTM_DISPATCH_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.dispatch_timeout_ms),
            stack_size: env::var("BRRTM_STACK_SIZE")
                .ok()
                .and_then(|s| parse_size(&s))
                .unwrap_or(defaults.stack_size),
            thread_name_prefix: env::var("BRRTM_THREAD_PREFIX")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.thread_name_prefix),
        }
    }

    /// Load configuration from a `.yaml`/`.yml`, `.toml` or `.json` file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, has an unknown extension, or does not parse.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read mediator config {}", path.display()))?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let config: Self = match extension.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .with_context(|| format!("invalid YAML in {}", path.display()))?,
            "toml" => toml::from_str(&content)
                .with_context(|| format!("invalid TOML in {}", path.display()))?,
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("invalid JSON in {}", path.display()))?,
            other => anyhow::bail!(
                "unsupported config extension '{}' for {}",
                other,
                path.display()
            ),
        };
        Ok(config)
    }

    /// The `dispatch_blocking` timeout as a `Duration`.
    #[must_use]
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    /// Set the `dispatch_blocking` timeout.
    #[must_use]
    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set both channel capacities.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.request_capacity = capacity;
        self.event_capacity = capacity;
        self
    }

    /// Check the values before any thread is started.
    ///
    /// # Errors
    ///
    /// [`MediatorError::InvalidConfig`] for a capacity that is zero or not a
    /// power of two, or a zero timeout.
    pub fn validate(&self) -> Result<(), MediatorError> {
        for (name, capacity) in [
            ("request_capacity", self.request_capacity),
            ("event_capacity", self.event_capacity),
        ] {
            if capacity == 0 || !capacity.is_power_of_two() {
                return Err(MediatorError::InvalidConfig(format!(
                    "{name} must be a non-zero power of two, got {capacity}"
                )));
            }
        }
        if self.dispatch_timeout_ms == 0 {
            return Err(MediatorError::InvalidConfig(
                "dispatch_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    // Tests touching process env vars run one at a time
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clean_env_vars() {
        for var in [
            "BRRTM_REQUEST_CAPACITY",
            "BRRTM_EVENT_CAPACITY",
            "BRRTM_DISPATCH_TIMEOUT_MS",
            "BRRTM_STACK_SIZE",
            "BRRTM_THREAD_PREFIX",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_defaults() {
        let config = MediatorConfig::default();
        assert_eq!(config.request_capacity, 1024);
        assert_eq!(config.event_capacity, 1024);
        assert_eq!(config.dispatch_timeout(), Duration::from_millis(1000));
        assert_eq!(config.stack_size, 0x20000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_env_parses_hex_and_falls_back() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clean_env_vars();
        env::set_var("BRRTM_REQUEST_CAPACITY", "0x800");
        env::set_var("BRRTM_EVENT_CAPACITY", "not-a-number");
        env::set_var("BRRTM_DISPATCH_TIMEOUT_MS", "250");
        env::set_var("BRRTM_STACK_SIZE", "65536");

        let config = MediatorConfig::from_env();
        assert_eq!(config.request_capacity, 2048);
        assert_eq!(config.event_capacity, 1024);
        assert_eq!(config.dispatch_timeout_ms, 250);
        assert_eq!(config.stack_size, 65536);
        assert_eq!(config.thread_name_prefix, "brrtm");
        clean_env_vars();
    }

    #[test]
    fn test_validate_rejects_bad_capacity_and_timeout() {
        let config = MediatorConfig::default().with_capacity(1000);
        assert!(matches!(
            config.validate(),
            Err(MediatorError::InvalidConfig(msg)) if msg.contains("request_capacity")
        ));

        let config = MediatorConfig::default().with_dispatch_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_yaml_file_with_partial_fields() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "request_capacity: 64\ndispatch_timeout_ms: 50").unwrap();

        let config = MediatorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.request_capacity, 64);
        assert_eq!(config.event_capacity, 1024);
        assert_eq!(config.dispatch_timeout_ms, 50);
    }

    #[test]
    fn test_from_toml_and_json_files() {
        let mut toml_file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(toml_file, "event_capacity = 16\nthread_name_prefix = \"orders\"").unwrap();
        let config = MediatorConfig::from_file(toml_file.path()).unwrap();
        assert_eq!(config.event_capacity, 16);
        assert_eq!(config.thread_name_prefix, "orders");

        let mut json_file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(json_file, r#"{{"stack_size": 4096}}"#).unwrap();
        let config = MediatorConfig::from_file(json_file.path()).unwrap();
        assert_eq!(config.stack_size, 4096);
    }

    #[test]
    fn test_unknown_extension_is_an_error() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        let err = MediatorConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("unsupported config extension"));
    }
}
