//! Metric metadata, exemplars, and scrape targets.
//!
//! These types appear on the [`Appender`](crate::destination::Appender)
//! contract and in the [`AppendContext`](crate::destination::AppendContext)
//! handed to destinations. The fan-out itself never writes exemplars or
//! metadata; destinations that accept them do so on their own.

use serde::{Deserialize, Serialize};

use crate::labels::LabelSet;

/// The type of a metric family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// Type not known.
    #[default]
    Unknown,
    /// Monotonic counter.
    Counter,
    /// Point-in-time value.
    Gauge,
    /// Bucketed histogram.
    Histogram,
    /// Quantile summary.
    Summary,
}

/// Descriptive metadata for one series.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Metric type.
    pub metric_type: MetricType,
    /// Unit, e.g. `seconds`.
    pub unit: String,
    /// Help text.
    pub help: String,
}

/// Metadata for a metric family as reported by a scrape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricMetadata {
    /// Metric family name.
    pub metric: String,
    /// Family metadata.
    #[serde(flatten)]
    pub metadata: Metadata,
}

/// A sample exemplar: an example event (usually a trace) attached to a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exemplar {
    /// Exemplar labels, e.g. `trace_id`.
    pub labels: LabelSet,
    /// Observed value.
    pub value: f64,
    /// Timestamp in milliseconds since epoch, if known.
    pub timestamp_ms: Option<i64>,
}

/// Read access to per-target metric metadata.
///
/// Some destinations expect to find a metadata store on the append context.
pub trait MetricMetadataStore: Send + Sync {
    /// Returns metadata for one metric family.
    fn get_metadata(&self, family: &str) -> Option<MetricMetadata>;

    /// Returns metadata for all known families.
    fn list_metadata(&self) -> Vec<MetricMetadata>;

    /// Approximate size in bytes of the stored metadata.
    fn size_metadata(&self) -> usize;

    /// Number of stored metadata entries.
    fn length_metadata(&self) -> usize;
}

/// Metadata store that knows nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetadataStore;

impl MetricMetadataStore for NoopMetadataStore {
    fn get_metadata(&self, _family: &str) -> Option<MetricMetadata> {
        None
    }

    fn list_metadata(&self) -> Vec<MetricMetadata> {
        Vec::new()
    }

    fn size_metadata(&self) -> usize {
        0
    }

    fn length_metadata(&self) -> usize {
        0
    }
}

/// The scrape target a batch of samples came from.
///
/// The router injects an empty placeholder when the caller supplies none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeTarget {
    /// Target labels (e.g. `job`, `instance`).
    pub labels: LabelSet,
    /// Scrape URL, if any.
    pub url: Option<String>,
}

impl ScrapeTarget {
    /// Returns `true` for the empty placeholder.
    pub fn is_placeholder(&self) -> bool {
        self.labels.is_empty() && self.url.is_none()
    }
}
