//! Router configuration.
//!
//! A [`FanoutConfig`] names the router (its component id) and lists the
//! destinations to fan out to. Configs are plain JSON and are validated
//! before any destination is built, so a bad reload never reaches a live
//! router.
//!
//! # Example
//!
//! ```rust
//! use fanout::config::FanoutConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FanoutConfig::from_json(r#"{
//!     "component_id": "prometheus.scrape.default",
//!     "destinations": [
//!         { "name": "local", "kind": "memory" },
//!         { "name": "capped", "kind": "memory", "limit": 10000 }
//!     ]
//! }"#)?;
//!
//! let built = config.build_destinations()?;
//! assert_eq!(built.destinations.len(), 2);
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::destination::Appendable;
use crate::error::{ConfigError, Result};
use crate::memory::MemoryDestination;
use crate::router::FanoutRouter;
use crate::series::SeriesRegistry;

/// Configuration of one router and its destinations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanoutConfig {
    /// Diagnostic identifier of the router.
    pub component_id: String,

    /// Destinations, in fan-out order.
    #[serde(default)]
    pub destinations: Vec<DestinationConfig>,
}

/// Configuration of one destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Unique name within the router.
    pub name: String,

    /// Backend and its settings.
    #[serde(flatten)]
    pub kind: DestinationKind,
}

/// Supported destination backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DestinationKind {
    /// In-process buffer.
    Memory {
        /// Optional sample limit.
        #[serde(default)]
        limit: Option<usize>,
    },

    /// Prometheus remote-write endpoint.
    RemoteWrite {
        /// Endpoint URL.
        endpoint: String,
        /// HTTP timeout.
        #[serde(default = "default_timeout", with = "duration_ms")]
        timeout: Duration,
        /// Retries after the first attempt.
        #[serde(default = "default_max_retries")]
        max_retries: u32,
        /// Initial retry backoff.
        #[serde(default = "default_retry_backoff", with = "duration_ms")]
        retry_backoff: Duration,
        /// Extra HTTP headers.
        #[serde(default)]
        headers: BTreeMap<String, String>,
        /// Labels merged into every series.
        #[serde(default)]
        external_labels: BTreeMap<String, String>,
    },
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff() -> Duration {
    Duration::from_millis(100)
}

/// Durations are written as integer milliseconds, e.g. `"timeout": 5000`.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Destinations built from a config.
pub struct BuiltDestinations {
    /// All destinations, in config order.
    pub destinations: Vec<Arc<dyn Appendable>>,
    /// The memory destinations by name, for inspection.
    pub memory: BTreeMap<String, MemoryDestination>,
}

impl FanoutConfig {
    /// Parses and validates a config from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON and any validation
    /// error from [`validate`](Self::validate).
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse { source: e })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses, and validates a config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, plus any
    /// error from [`from_json`](Self::from_json).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_json(&json)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if:
    /// - The component id is empty
    /// - A destination name is empty or repeated
    /// - A remote-write endpoint is empty
    pub fn validate(&self) -> Result<()> {
        if self.component_id.trim().is_empty() {
            return Err(ConfigError::EmptyComponentId.into());
        }

        let mut seen = HashSet::new();
        for (index, dest) in self.destinations.iter().enumerate() {
            if dest.name.trim().is_empty() {
                return Err(ConfigError::EmptyDestinationName { index }.into());
            }
            if !seen.insert(dest.name.as_str()) {
                return Err(ConfigError::DuplicateDestination {
                    name: dest.name.clone(),
                }
                .into());
            }
            if let DestinationKind::RemoteWrite { endpoint, .. } = &dest.kind
                && endpoint.trim().is_empty()
            {
                return Err(ConfigError::InvalidDestination {
                    name: dest.name.clone(),
                    reason: "endpoint must not be empty".to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Instantiates every destination, in config order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FeatureDisabled`] for a remote-write destination
    /// when the `prometheus-remote-write` feature is off, or the client
    /// creation error when it is on.
    pub fn build_destinations(&self) -> Result<BuiltDestinations> {
        let mut built = BuiltDestinations {
            destinations: Vec::with_capacity(self.destinations.len()),
            memory: BTreeMap::new(),
        };

        for dest in &self.destinations {
            let appendable: Arc<dyn Appendable> = match &dest.kind {
                DestinationKind::Memory { limit } => {
                    let mut memory = MemoryDestination::new(&dest.name);
                    if let Some(limit) = limit {
                        memory = memory.with_limit(*limit);
                    }
                    built.memory.insert(dest.name.clone(), memory.clone());
                    Arc::new(memory)
                }
                DestinationKind::RemoteWrite { .. } => remote_write(dest)?,
            };
            built.destinations.push(appendable);
        }

        Ok(built)
    }

    /// Builds a router over this config's destinations.
    ///
    /// # Errors
    ///
    /// Returns any error from [`build_destinations`](Self::build_destinations).
    pub fn build_router(&self, registry: Arc<SeriesRegistry>) -> Result<(FanoutRouter, BuiltDestinations)> {
        let built = self.build_destinations()?;
        let router = FanoutRouter::with_registry(
            built.destinations.iter().cloned(),
            self.component_id.clone(),
            registry,
        );
        Ok((router, built))
    }
}

#[cfg(feature = "prometheus-remote-write")]
fn remote_write(dest: &DestinationConfig) -> Result<Arc<dyn Appendable>> {
    use crate::remote_write::{RemoteWriteConfig, RemoteWriteDestination};

    let DestinationKind::RemoteWrite {
        endpoint,
        timeout,
        max_retries,
        retry_backoff,
        headers,
        external_labels,
    } = &dest.kind
    else {
        return Err(ConfigError::InvalidDestination {
            name: dest.name.clone(),
            reason: "not a remote_write destination".to_string(),
        }
        .into());
    };

    let mut config = RemoteWriteConfig::new(endpoint.clone())
        .with_timeout(*timeout)
        .with_max_retries(*max_retries)
        .with_retry_backoff(*retry_backoff);
    for (name, value) in headers {
        config = config.with_header(name.clone(), value.clone());
    }
    for (name, value) in external_labels {
        config = config.with_external_label(name.clone(), value.clone());
    }

    Ok(Arc::new(RemoteWriteDestination::new(dest.name.clone(), config)?))
}

#[cfg(not(feature = "prometheus-remote-write"))]
fn remote_write(dest: &DestinationConfig) -> Result<Arc<dyn Appendable>> {
    Err(ConfigError::FeatureDisabled {
        name: dest.name.clone(),
        feature: "prometheus-remote-write",
    }
    .into())
}
