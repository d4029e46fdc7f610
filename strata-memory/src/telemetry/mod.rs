//! Tracing Initialization
//!
//! `TigerStyle`: Hosts opt in to log output. The library only emits `tracing`
//! events; installing a subscriber is the caller's decision and never panics.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use strata_memory::telemetry::{init_tracing, TelemetryConfig};
//!
//! // Initialize with defaults (reads from env vars)
//! init_tracing(TelemetryConfig::default()).expect("tracing init");
//!
//! // Or configure explicitly
//! let config = TelemetryConfig::builder()
//!     .service_name("recall-worker")
//!     .filter("strata_memory=debug")
//!     .json(true)
//!     .build();
//! # let _ = config;
//! ```
//!
//! ## Environment Variables
//!
//! - `STRATA_LOG` - Filter directives, falling back to `RUST_LOG` (default: "info")
//! - `STRATA_SERVICE_NAME` - Service name (default: "strata-memory")
//! - `STRATA_LOG_FORMAT` - `json` for JSON lines, anything else for text

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Service name when `STRATA_SERVICE_NAME` is unset.
pub const TELEMETRY_SERVICE_NAME_DEFAULT: &str = "strata-memory";

/// Filter when neither `STRATA_LOG` nor `RUST_LOG` is set.
pub const TELEMETRY_FILTER_DEFAULT: &str = "info";

/// Telemetry configuration errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Telemetry initialization failed
    #[error("telemetry initialization failed: {reason}")]
    InitFailed {
        /// The reason for the failure
        reason: String,
    },

    /// Filter directives did not parse
    #[error("invalid filter {filter:?}: {reason}")]
    InvalidFilter {
        /// The rejected directives
        filter: String,
        /// Parser message
        reason: String,
    },

    /// Service name is empty
    #[error("service name cannot be empty")]
    EmptyServiceName,
}

/// Result type for telemetry operations
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Configuration for the tracing subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name recorded on the startup event
    pub service_name: String,

    /// `EnvFilter` directives, e.g. `"info,strata_memory=debug"`
    pub filter: String,

    /// Emit JSON lines instead of human-readable text
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl TelemetryConfig {
    /// Create a new builder for `TelemetryConfig`
    #[must_use]
    pub fn builder() -> TelemetryConfigBuilder {
        TelemetryConfigBuilder::default()
    }

    /// Build a config from an arbitrary variable source.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let service_name = lookup("STRATA_SERVICE_NAME")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| TELEMETRY_SERVICE_NAME_DEFAULT.to_string());
        let filter = lookup("STRATA_LOG")
            .or_else(|| lookup("RUST_LOG"))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| TELEMETRY_FILTER_DEFAULT.to_string());
        let json = lookup("STRATA_LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json"));

        Self {
            service_name,
            filter,
            json,
        }
    }

    /// Validate the configuration and parse its filter.
    fn env_filter(&self) -> Result<EnvFilter> {
        if self.service_name.is_empty() {
            return Err(TelemetryError::EmptyServiceName);
        }

        EnvFilter::try_new(&self.filter).map_err(|e| TelemetryError::InvalidFilter {
            filter: self.filter.clone(),
            reason: e.to_string(),
        })
    }
}

/// Builder for `TelemetryConfig`
#[derive(Debug, Default)]
pub struct TelemetryConfigBuilder {
    service_name: Option<String>,
    filter: Option<String>,
    json: Option<bool>,
}

impl TelemetryConfigBuilder {
    /// Set the service name
    #[must_use]
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Set the filter directives
    #[must_use]
    pub fn filter(mut self, directives: impl Into<String>) -> Self {
        self.filter = Some(directives.into());
        self
    }

    /// Choose JSON output
    #[must_use]
    pub fn json(mut self, json: bool) -> Self {
        self.json = Some(json);
        self
    }

    /// Build the `TelemetryConfig`
    #[must_use]
    pub fn build(self) -> TelemetryConfig {
        let default = TelemetryConfig::default();
        TelemetryConfig {
            service_name: self.service_name.unwrap_or(default.service_name),
            filter: self.filter.unwrap_or(default.filter),
            json: self.json.unwrap_or(default.json),
        }
    }
}

/// Install a global fmt subscriber for the process.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidFilter` if the directives do not parse,
/// `TelemetryError::EmptyServiceName` for an empty name, and
/// `TelemetryError::InitFailed` if a global subscriber is already installed.
pub fn init_tracing(config: TelemetryConfig) -> Result<()> {
    let filter = config.env_filter()?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| TelemetryError::InitFailed {
        reason: e.to_string(),
    })?;

    tracing::info!(
        service_name = %config.service_name,
        filter = %config.filter,
        json = config.json,
        "tracing initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v).to_string())
        }
    }

    #[test]
    fn test_telemetry_config_defaults() {
        let config = TelemetryConfig::from_lookup(lookup(&[]));
        assert_eq!(config.service_name, TELEMETRY_SERVICE_NAME_DEFAULT);
        assert_eq!(config.filter, TELEMETRY_FILTER_DEFAULT);
        assert!(!config.json);
    }

    #[test]
    fn test_strata_log_wins_over_rust_log() {
        let config = TelemetryConfig::from_lookup(lookup(&[
            ("STRATA_LOG", "strata_memory=trace"),
            ("RUST_LOG", "warn"),
            ("STRATA_SERVICE_NAME", "recall-worker"),
            ("STRATA_LOG_FORMAT", "JSON"),
        ]));
        assert_eq!(config.filter, "strata_memory=trace");
        assert_eq!(config.service_name, "recall-worker");
        assert!(config.json);

        let config = TelemetryConfig::from_lookup(lookup(&[("RUST_LOG", "warn")]));
        assert_eq!(config.filter, "warn");
    }

    #[test]
    fn test_telemetry_config_builder() {
        let config = TelemetryConfig::builder()
            .service_name("test-service")
            .filter("debug")
            .json(true)
            .build();

        assert_eq!(config.service_name, "test-service");
        assert_eq!(config.filter, "debug");
        assert!(config.json);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = TelemetryConfig::builder()
            .filter("strata_memory=loudest")
            .build();
        assert!(matches!(
            config.env_filter(),
            Err(TelemetryError::InvalidFilter { .. })
        ));

        let config = TelemetryConfig::builder().service_name("").build();
        assert!(matches!(
            config.env_filter(),
            Err(TelemetryError::EmptyServiceName)
        ));
    }

    #[test]
    fn test_double_init_reports_error() {
        let config = TelemetryConfig::builder().filter("warn").build();
        // Another test binary thread may have won the first install.
        let _ = init_tracing(config.clone());

        let second = init_tracing(config);
        assert!(matches!(second, Err(TelemetryError::InitFailed { .. })));
    }
}
