//! Prometheus remote-write destination.
//!
//! [`RemoteWriteDestination`] stages appended samples per transaction and, on
//! commit, pushes them to a remote-write endpoint as a snappy-compressed
//! protobuf `WriteRequest`. Retries with exponential backoff happen here, in
//! the destination; the fan-out never retries.
//!
//! This module is only available when the `prometheus-remote-write` feature
//! is enabled.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fanout::destination::{AppendContext, Appendable, Appender};
//! use fanout::labels::LabelSet;
//! use fanout::remote_write::{RemoteWriteConfig, RemoteWriteDestination};
//! use fanout::router::FanoutRouter;
//! use fanout::series::SeriesRef;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RemoteWriteConfig::new("http://localhost:9090/api/v1/write")
//!     .with_external_label("cluster", "eu-1");
//! let remote: Arc<dyn Appendable> = Arc::new(RemoteWriteDestination::new("prom", config)?);
//! let router = FanoutRouter::new(vec![remote], "prometheus.remote_write.default");
//!
//! let mut app = router.appender(&AppendContext::new());
//! app.append(SeriesRef::UNSET, &LabelSet::from([("__name__", "up")]), 1_700_000_000_000, 1.0)?;
//! app.commit()?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use prost::Message;
use tracing::{debug, warn};

use crate::destination::{AppendContext, AppendResult, Appendable, Appender, CancellationFlag};
use crate::error::RemoteWriteError;
use crate::labels::LabelSet;
use crate::series::SeriesRef;

/// Prometheus remote-write protobuf types.
///
/// Hand-written types matching `prometheus/prompb/remote.proto`.
/// Using prost derives avoids the need for protoc and proto file management.
pub mod proto {
    /// A write request containing one or more time series.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct WriteRequest {
        /// The time series to write.
        #[prost(message, repeated, tag = "1")]
        pub timeseries: Vec<TimeSeries>,
    }

    /// A single time series with labels and samples.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct TimeSeries {
        /// Metric labels identifying the series.
        #[prost(message, repeated, tag = "1")]
        pub labels: Vec<Label>,
        /// Data samples for this series.
        #[prost(message, repeated, tag = "2")]
        pub samples: Vec<Sample>,
    }

    /// A key-value label pair.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Label {
        /// Label name.
        #[prost(string, tag = "1")]
        pub name: String,
        /// Label value.
        #[prost(string, tag = "2")]
        pub value: String,
    }

    /// A single data sample (value + timestamp).
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Sample {
        /// The sample value.
        #[prost(double, tag = "1")]
        pub value: f64,
        /// Timestamp in milliseconds since epoch.
        #[prost(int64, tag = "2")]
        pub timestamp: i64,
    }
}

/// Configuration for a Prometheus remote-write endpoint.
#[derive(Debug, Clone)]
pub struct RemoteWriteConfig {
    /// Remote write endpoint URL (e.g., `http://localhost:9090/api/v1/write`).
    pub endpoint: String,
    /// HTTP timeout for write requests.
    pub timeout: Duration,
    /// Maximum number of retry attempts on failure.
    pub max_retries: u32,
    /// Initial backoff duration between retries (doubles each attempt).
    pub retry_backoff: Duration,
    /// Optional HTTP headers (e.g., for authentication).
    pub headers: Vec<(String, String)>,
    /// Labels merged into every series. Series labels win on conflict.
    pub external_labels: Vec<(String, String)>,
}

impl RemoteWriteConfig {
    /// Creates a new config with sensible defaults.
    ///
    /// Defaults: 30s timeout, 3 retries, 100ms initial backoff.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff: Duration::from_millis(100),
            headers: Vec::new(),
            external_labels: Vec::new(),
        }
    }

    /// Adds an HTTP header (e.g., for authentication tokens).
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds an external label.
    #[must_use]
    pub fn with_external_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.external_labels.push((name.into(), value.into()));
        self
    }

    /// Sets the HTTP timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the maximum number of retries.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the initial retry backoff.
    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}

/// Destination that pushes each committed transaction to a remote-write
/// endpoint.
#[derive(Debug, Clone)]
pub struct RemoteWriteDestination {
    name: String,
    config: RemoteWriteConfig,
    client: reqwest::blocking::Client,
}

impl RemoteWriteDestination {
    /// Creates the destination and its HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteWriteError::ClientCreate`] if the client cannot be built.
    pub fn new(name: impl Into<String>, config: RemoteWriteConfig) -> Result<Self, RemoteWriteError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RemoteWriteError::ClientCreate { source: e })?;
        Ok(Self {
            name: name.into(),
            config,
            client,
        })
    }

    /// Destination name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Endpoint configuration.
    pub fn config(&self) -> &RemoteWriteConfig {
        &self.config
    }
}

impl Appendable for RemoteWriteDestination {
    fn appender(&self, ctx: &AppendContext) -> Box<dyn Appender> {
        Box::new(RemoteWriteAppender {
            destination: self.clone(),
            cancellation: ctx.cancellation().clone(),
            pending: BTreeMap::new(),
        })
    }
}

/// Staged samples of one series.
#[derive(Debug)]
struct PendingSeries {
    labels: LabelSet,
    samples: Vec<proto::Sample>,
}

struct RemoteWriteAppender {
    destination: RemoteWriteDestination,
    cancellation: CancellationFlag,
    pending: BTreeMap<SeriesRef, PendingSeries>,
}

impl Appender for RemoteWriteAppender {
    fn append(
        &mut self,
        series_ref: SeriesRef,
        labels: &LabelSet,
        timestamp_ms: i64,
        value: f64,
    ) -> AppendResult<SeriesRef> {
        self.pending
            .entry(series_ref)
            .or_insert_with(|| PendingSeries {
                labels: labels.clone(),
                samples: Vec::new(),
            })
            .samples
            .push(proto::Sample {
                value,
                timestamp: timestamp_ms,
            });
        Ok(series_ref)
    }

    fn commit(&mut self) -> AppendResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let pending = std::mem::take(&mut self.pending);
        let series = pending.len();
        let body = encode(pending.into_values(), &self.destination.config.external_labels)?;
        send_with_retry(
            &self.destination.client,
            &self.destination.config,
            &self.cancellation,
            &body,
        )?;

        debug!(
            destination = %self.destination.name,
            series,
            bytes = body.len(),
            "remote write batch sent"
        );
        Ok(())
    }

    fn rollback(&mut self) -> AppendResult<()> {
        self.pending.clear();
        Ok(())
    }
}

/// Encodes staged series as a snappy-compressed `WriteRequest`.
fn encode(
    series: impl IntoIterator<Item = PendingSeries>,
    external_labels: &[(String, String)],
) -> Result<Vec<u8>, RemoteWriteError> {
    let request = build_write_request(series, external_labels);
    let proto_bytes = serialize_write_request(&request)?;
    compress_snappy(&proto_bytes)
}

/// Converts staged series to a Prometheus `WriteRequest`.
fn build_write_request(
    series: impl IntoIterator<Item = PendingSeries>,
    external_labels: &[(String, String)],
) -> proto::WriteRequest {
    let timeseries = series
        .into_iter()
        .map(|s| proto::TimeSeries {
            labels: build_labels(&s.labels, external_labels),
            samples: s.samples,
        })
        .collect();

    proto::WriteRequest { timeseries }
}

/// Builds Prometheus labels from the series labels and external labels.
///
/// The result is sorted by name as the remote-write protocol requires.
fn build_labels(labels: &LabelSet, external_labels: &[(String, String)]) -> Vec<proto::Label> {
    labels
        .merged(external_labels)
        .iter()
        .map(|(name, value)| proto::Label {
            name: name.to_string(),
            value: value.to_string(),
        })
        .collect()
}

/// Serializes a `WriteRequest` to protobuf bytes.
fn serialize_write_request(request: &proto::WriteRequest) -> Result<Vec<u8>, RemoteWriteError> {
    let mut buf = Vec::with_capacity(request.encoded_len());
    request
        .encode(&mut buf)
        .map_err(|e| RemoteWriteError::Serialization { source: e })?;
    Ok(buf)
}

/// Compresses bytes using Snappy (required by the Prometheus remote-write protocol).
fn compress_snappy(data: &[u8]) -> Result<Vec<u8>, RemoteWriteError> {
    let mut encoder = snap::raw::Encoder::new();
    encoder
        .compress_vec(data)
        .map_err(|e| RemoteWriteError::Compression { source: e })
}

/// Sends compressed protobuf to the endpoint with exponential backoff retry.
///
/// Stops retrying once `cancellation` is set.
fn send_with_retry(
    client: &reqwest::blocking::Client,
    config: &RemoteWriteConfig,
    cancellation: &CancellationFlag,
    body: &[u8],
) -> Result<(), RemoteWriteError> {
    let mut backoff = config.retry_backoff;
    let mut attempt = 0;

    loop {
        let mut request = client
            .post(&config.endpoint)
            .header("Content-Encoding", "snappy")
            .header("Content-Type", "application/x-protobuf")
            .header("X-Prometheus-Remote-Write-Version", "0.1.0");

        for (name, value) in &config.headers {
            request = request.header(name, value);
        }

        let error = match request.body(body.to_vec()).send() {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            Ok(resp) => {
                let status = resp.status().as_u16();
                let body = resp.text().unwrap_or_default();
                RemoteWriteError::HttpStatus {
                    endpoint: config.endpoint.clone(),
                    status,
                    body,
                }
            }
            Err(e) => RemoteWriteError::RequestFailed {
                endpoint: config.endpoint.clone(),
                source: e,
            },
        };

        if attempt >= config.max_retries || cancellation.is_cancelled() {
            return Err(error);
        }

        warn!(
            endpoint = %config.endpoint,
            attempt,
            "remote write failed, retrying in {backoff:?}: {error}"
        );
        std::thread::sleep(backoff);
        backoff *= 2;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppendError;

    fn pending(labels: LabelSet, points: &[(i64, f64)]) -> PendingSeries {
        PendingSeries {
            labels,
            samples: points
                .iter()
                .map(|&(timestamp, value)| proto::Sample { value, timestamp })
                .collect(),
        }
    }

    #[test]
    fn test_build_labels() {
        let labels = LabelSet::from([("__name__", "cpu_usage"), ("host", "web1"), ("dc", "us-east")]);

        let result = build_labels(&labels, &[]);

        // Should be sorted alphabetically
        assert_eq!(result.len(), 3);
        assert_eq!(result[0].name, "__name__");
        assert_eq!(result[0].value, "cpu_usage");
        assert_eq!(result[1].name, "dc");
        assert_eq!(result[1].value, "us-east");
        assert_eq!(result[2].name, "host");
        assert_eq!(result[2].value, "web1");
    }

    #[test]
    fn test_build_labels_with_external() {
        let labels = LabelSet::from([("__name__", "cpu_usage"), ("host", "web1")]);
        let external = vec![
            ("instance".to_string(), "vmm_1".to_string()),
            ("host".to_string(), "ignored".to_string()),
        ];

        let result = build_labels(&labels, &external);

        // Should be sorted: __name__, host, instance
        assert_eq!(result.len(), 3);
        assert_eq!(result[1].name, "host");
        assert_eq!(result[1].value, "web1");
        assert_eq!(result[2].name, "instance");
        assert_eq!(result[2].value, "vmm_1");
    }

    #[test]
    fn test_build_write_request_empty() {
        let request = build_write_request(Vec::new(), &[]);
        assert!(request.timeseries.is_empty());
    }

    #[test]
    fn test_build_write_request_with_data() {
        let series = vec![pending(
            LabelSet::from([("__name__", "cpu"), ("host", "web1")]),
            &[(1_700_000_000_000, 85.5), (1_700_000_001_000, 90.0)],
        )];

        let request = build_write_request(series, &[]);

        assert_eq!(request.timeseries.len(), 1);
        let ts = &request.timeseries[0];
        assert_eq!(ts.labels.len(), 2);
        assert_eq!(ts.labels[0].name, "__name__");
        assert_eq!(ts.labels[0].value, "cpu");
        assert_eq!(ts.samples.len(), 2);
        assert_eq!(ts.samples[0].value, 85.5);
        assert_eq!(ts.samples[1].timestamp, 1_700_000_001_000);
    }

    #[test]
    fn test_encode_produces_valid_bytes() {
        let series = vec![pending(
            LabelSet::from([("__name__", "metric_a"), ("id", "1")]),
            &[(1_700_000_000_000, 99.9)],
        )];

        let bytes = encode(series, &[]).unwrap();
        assert!(!bytes.is_empty());

        // Verify decompression and decoding
        let mut decoder = snap::raw::Decoder::new();
        let decompressed = decoder.decompress_vec(&bytes).unwrap();
        let request = proto::WriteRequest::decode(decompressed.as_slice()).unwrap();

        assert_eq!(request.timeseries.len(), 1);
        assert_eq!(request.timeseries[0].samples[0].value, 99.9);
    }

    #[test]
    fn test_appender_groups_samples_by_ref() {
        let dest = RemoteWriteDestination::new("prom", RemoteWriteConfig::new("http://127.0.0.1:1/write")).unwrap();
        let mut app = RemoteWriteAppender {
            destination: dest,
            cancellation: CancellationFlag::new(),
            pending: BTreeMap::new(),
        };
        let cpu = LabelSet::from([("__name__", "cpu")]);
        let mem = LabelSet::from([("__name__", "mem")]);

        app.append(SeriesRef::new(1), &cpu, 1, 1.0).unwrap();
        app.append(SeriesRef::new(2), &mem, 1, 2.0).unwrap();
        app.append(SeriesRef::new(1), &cpu, 2, 3.0).unwrap();

        assert_eq!(app.pending.len(), 2);
        assert_eq!(app.pending[&SeriesRef::new(1)].samples.len(), 2);

        app.rollback().unwrap();
        assert!(app.pending.is_empty());
    }

    #[test]
    fn test_empty_commit_sends_nothing() {
        // Nothing listens on port 1; a request would fail.
        let dest = RemoteWriteDestination::new("prom", RemoteWriteConfig::new("http://127.0.0.1:1/write")).unwrap();
        let mut app = dest.appender(&AppendContext::new());
        assert!(app.commit().is_ok());
    }

    #[test]
    fn test_commit_to_unreachable_endpoint_fails() {
        let config = RemoteWriteConfig::new("http://127.0.0.1:1/write")
            .with_timeout(Duration::from_millis(500))
            .with_max_retries(0);
        let dest = RemoteWriteDestination::new("prom", config).unwrap();
        let mut app = dest.appender(&AppendContext::new());

        app.append(SeriesRef::new(1), &LabelSet::from([("__name__", "up")]), 1, 1.0)
            .unwrap();
        let err = app.commit().unwrap_err();
        assert!(matches!(
            err,
            AppendError::RemoteWrite(RemoteWriteError::RequestFailed { .. })
        ));
    }

    #[test]
    fn test_cancelled_commit_skips_retries() {
        let config = RemoteWriteConfig::new("http://127.0.0.1:1/write")
            .with_timeout(Duration::from_millis(500))
            .with_max_retries(5)
            .with_retry_backoff(Duration::from_secs(10));
        let dest = RemoteWriteDestination::new("prom", config).unwrap();
        let cancellation = CancellationFlag::new();
        cancellation.cancel();
        let mut app = dest.appender(&AppendContext::new().with_cancellation(cancellation));

        app.append(SeriesRef::new(1), &LabelSet::from([("__name__", "up")]), 1, 1.0)
            .unwrap();
        let start = std::time::Instant::now();
        let err = app.commit().unwrap_err();

        // One backoff alone would take 10s.
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(matches!(
            err,
            AppendError::RemoteWrite(RemoteWriteError::RequestFailed { .. })
        ));
    }

    #[test]
    fn test_config_builder() {
        let config = RemoteWriteConfig::new("http://example.com/write")
            .with_header("Authorization", "Bearer token123")
            .with_external_label("cluster", "eu-1")
            .with_timeout(Duration::from_secs(10))
            .with_max_retries(5)
            .with_retry_backoff(Duration::from_millis(10));

        assert_eq!(config.endpoint, "http://example.com/write");
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_backoff, Duration::from_millis(10));
        assert_eq!(config.headers.len(), 1);
        assert_eq!(config.headers[0].0, "Authorization");
        assert_eq!(config.headers[0].1, "Bearer token123");
        assert_eq!(config.external_labels, vec![("cluster".to_string(), "eu-1".to_string())]);
    }
}
