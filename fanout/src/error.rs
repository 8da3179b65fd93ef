//! Error types for the fanout appender.
//!
//! Write-path operations return [`AppendError`]. When a fan-out touches
//! several destinations, every per-destination failure is collected by an
//! [`ErrorAggregator`] into a single [`MultiError`], so no failure is
//! summarized away.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::appender::TransactionState;
use crate::series::SeriesRef;

/// The main error type for fanout operations outside the append path.
#[derive(Error, Debug)]
pub enum FanoutError {
    /// Error returned by an appender.
    #[error("append error: {0}")]
    Append(#[from] AppendError),

    /// Error loading or validating configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Error during remote write operations.
    #[cfg(feature = "prometheus-remote-write")]
    #[error("remote write error: {0}")]
    RemoteWrite(#[from] RemoteWriteError),
}

/// Errors returned by [`Appender`](crate::destination::Appender) operations.
#[derive(Error, Debug)]
pub enum AppendError {
    /// A destination rejected the operation.
    #[error("{message}")]
    Destination {
        /// The destination's own description of the failure.
        message: String,
    },

    /// The operation is not supported by this appender.
    #[error("{operation} not supported")]
    Unsupported {
        /// Name of the rejected operation.
        operation: &'static str,
    },

    /// The transaction already reached a terminal state.
    #[error("transaction already {state}")]
    TransactionClosed {
        /// The terminal state the transaction is in.
        state: TransactionState,
    },

    /// One or more destinations failed during a single fan-out operation.
    #[error(transparent)]
    Multi(#[from] MultiError),

    /// A remote-write destination failed to deliver its batch.
    #[cfg(feature = "prometheus-remote-write")]
    #[error(transparent)]
    RemoteWrite(#[from] RemoteWriteError),
}

impl AppendError {
    /// Creates a [`AppendError::Destination`] from any message.
    pub fn destination(message: impl Into<String>) -> Self {
        Self::Destination {
            message: message.into(),
        }
    }

    /// Returns the aggregate if this is a fan-out failure.
    pub fn as_multi(&self) -> Option<&MultiError> {
        match self {
            Self::Multi(multi) => Some(multi),
            _ => None,
        }
    }
}

/// Composite error preserving every per-destination failure of one
/// operation, in destination order.
///
/// The rendered message concatenates all contributing messages, so operators
/// can see which destinations failed from the text alone.
#[derive(Debug)]
pub struct MultiError {
    errors: Vec<AppendError>,
    series_ref: Option<SeriesRef>,
}

impl MultiError {
    /// The individual errors, in accumulation order.
    pub fn errors(&self) -> &[AppendError] {
        &self.errors
    }

    /// Consumes the aggregate, returning the individual errors.
    pub fn into_errors(self) -> Vec<AppendError> {
        self.errors
    }

    /// Number of individual errors. Always at least one.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Always `false`; an aggregate is only built from at least one error.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// The series ref that was resolved for the failing append.
    ///
    /// `None` for commit and rollback aggregates.
    pub fn series_ref(&self) -> Option<SeriesRef> {
        self.series_ref
    }

    /// Iterates over the individual errors.
    pub fn iter(&self) -> std::slice::Iter<'_, AppendError> {
        self.errors.iter()
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.len() {
            1 => write!(f, "1 error occurred: ")?,
            n => write!(f, "{n} errors occurred: ")?,
        }
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors
            .first()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl<'a> IntoIterator for &'a MultiError {
    type Item = &'a AppendError;
    type IntoIter = std::slice::Iter<'a, AppendError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.iter()
    }
}

/// Accumulates per-destination errors while iterating children.
///
/// Nested aggregates (for example from a router used as another router's
/// destination) are flattened so the final list stays one level deep.
///
/// # Example
///
/// ```rust
/// use fanout::error::{AppendError, ErrorAggregator};
///
/// let mut errs = ErrorAggregator::new();
/// assert!(errs.finish().is_ok());
///
/// let mut errs = ErrorAggregator::new();
/// errs.push(AppendError::destination("disk full"));
/// let err = errs.finish().unwrap_err();
/// assert_eq!(err.as_multi().unwrap().errors()[0].to_string(), "disk full");
/// ```
#[derive(Debug, Default)]
pub struct ErrorAggregator {
    errors: Vec<AppendError>,
}

impl ErrorAggregator {
    /// Creates an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one error.
    pub fn push(&mut self, err: AppendError) {
        match err {
            AppendError::Multi(multi) => self.errors.extend(multi.errors),
            other => self.errors.push(other),
        }
    }

    /// Records the error of `result`, if any.
    pub fn record<T>(&mut self, result: std::result::Result<T, AppendError>) {
        if let Err(err) = result {
            self.push(err);
        }
    }

    /// Number of errors recorded so far.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Returns `true` if nothing failed.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Finishes aggregation. `Ok(())` if no error was recorded.
    ///
    /// # Errors
    ///
    /// Returns [`AppendError::Multi`] holding every recorded error.
    pub fn finish(self) -> std::result::Result<(), AppendError> {
        self.finish_inner(None)
    }

    /// Like [`finish`](Self::finish), attaching the ref resolved for an append.
    ///
    /// # Errors
    ///
    /// Returns [`AppendError::Multi`] holding every recorded error.
    pub fn finish_append(self, series_ref: SeriesRef) -> std::result::Result<SeriesRef, AppendError> {
        self.finish_inner(Some(series_ref)).map(|()| series_ref)
    }

    fn finish_inner(self, series_ref: Option<SeriesRef>) -> std::result::Result<(), AppendError> {
        if self.errors.is_empty() {
            return Ok(());
        }
        Err(AppendError::Multi(MultiError {
            errors: self.errors,
            series_ref,
        }))
    }
}

/// Errors that can occur when loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config '{}': {source}", path.display())]
    Read {
        /// The config file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for the expected shape.
    #[error("failed to parse config: {source}")]
    Parse {
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The component id is empty.
    #[error("component_id must not be empty")]
    EmptyComponentId,

    /// A destination has an empty name.
    #[error("destination {index} has an empty name")]
    EmptyDestinationName {
        /// Position of the destination in the list.
        index: usize,
    },

    /// Two destinations share a name.
    #[error("duplicate destination name '{name}'")]
    DuplicateDestination {
        /// The repeated name.
        name: String,
    },

    /// A destination setting is invalid.
    #[error("invalid destination '{name}': {reason}")]
    InvalidDestination {
        /// The destination name.
        name: String,
        /// Why it is invalid.
        reason: String,
    },

    /// The destination kind needs a cargo feature that is not enabled.
    #[error("destination '{name}' requires the '{feature}' feature")]
    FeatureDisabled {
        /// The destination name.
        name: String,
        /// The missing feature.
        feature: &'static str,
    },
}

/// Errors that can occur during Prometheus remote-write operations.
#[cfg(feature = "prometheus-remote-write")]
#[derive(Error, Debug)]
pub enum RemoteWriteError {
    /// Failed to serialize `WriteRequest` to protobuf.
    #[error("failed to serialize write request: {source}")]
    Serialization {
        /// The protobuf encoding error.
        #[source]
        source: prost::EncodeError,
    },

    /// Failed to compress data with Snappy.
    #[error("failed to compress data: {source}")]
    Compression {
        /// The snappy compression error.
        #[source]
        source: snap::Error,
    },

    /// Failed to create HTTP client.
    #[error("failed to create HTTP client: {source}")]
    ClientCreate {
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// HTTP request failed after retries.
    #[error("remote write to '{endpoint}' failed: {source}")]
    RequestFailed {
        /// The endpoint that was called.
        endpoint: String,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// Server returned non-2xx status after retries.
    #[error("remote write to '{endpoint}' returned status {status}: {body}")]
    HttpStatus {
        /// The endpoint that was called.
        endpoint: String,
        /// The HTTP status code.
        status: u16,
        /// The response body text.
        body: String,
    },
}

/// Type alias for `Result<T, FanoutError>`.
pub type Result<T> = std::result::Result<T, FanoutError>;
