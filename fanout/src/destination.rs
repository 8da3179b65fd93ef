//! The destination contract.
//!
//! A destination is anything that can open an [`Appender`]: a local queue,
//! a remote-write client, another router. The router holds destinations as
//! `Arc<dyn Appendable>` and never depends on a concrete backend.
//!
//! # Contract
//!
//! - [`Appendable::appender`] opens a fresh, single-use appender.
//! - [`Appender::append`] stages one sample; [`Appender::commit`] or
//!   [`Appender::rollback`] ends the cycle.
//! - [`Appender::append_exemplar`] and [`Appender::update_metadata`] default
//!   to [`AppendError::Unsupported`]; destinations opt in by overriding them.
//!
//! Destinations must be safe for concurrent use: several transactions may be
//! open against the same destination at once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::AppendError;
use crate::labels::LabelSet;
use crate::metadata::{Exemplar, Metadata, MetricMetadataStore, ScrapeTarget};
use crate::series::SeriesRef;

/// Result type for appender operations.
pub type AppendResult<T> = std::result::Result<T, AppendError>;

/// A storage destination that can open appenders.
pub trait Appendable: Send + Sync {
    /// Opens a new appender for one write cycle.
    fn appender(&self, ctx: &AppendContext) -> Box<dyn Appender>;
}

/// One write cycle against a single destination.
pub trait Appender: Send {
    /// Stages one sample for `series_ref` / `labels`.
    ///
    /// Returns the ref the destination associates with the series.
    ///
    /// # Errors
    ///
    /// Returns an error if the destination rejects the sample.
    fn append(
        &mut self,
        series_ref: SeriesRef,
        labels: &LabelSet,
        timestamp_ms: i64,
        value: f64,
    ) -> AppendResult<SeriesRef>;

    /// Makes all staged samples durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the destination could not persist the batch.
    fn commit(&mut self) -> AppendResult<()>;

    /// Discards all staged samples.
    ///
    /// # Errors
    ///
    /// Returns an error if the destination could not discard the batch.
    fn rollback(&mut self) -> AppendResult<()>;

    /// Attaches an exemplar to a series.
    ///
    /// # Errors
    ///
    /// Returns [`AppendError::Unsupported`] unless overridden.
    fn append_exemplar(
        &mut self,
        _series_ref: SeriesRef,
        _labels: &LabelSet,
        _exemplar: &Exemplar,
    ) -> AppendResult<SeriesRef> {
        Err(AppendError::Unsupported {
            operation: "append_exemplar",
        })
    }

    /// Updates the metadata of a series.
    ///
    /// # Errors
    ///
    /// Returns [`AppendError::Unsupported`] unless overridden.
    fn update_metadata(
        &mut self,
        _series_ref: SeriesRef,
        _labels: &LabelSet,
        _metadata: &Metadata,
    ) -> AppendResult<SeriesRef> {
        Err(AppendError::Unsupported {
            operation: "update_metadata",
        })
    }
}

/// Cooperative cancellation flag shared between a caller and destinations.
///
/// The fan-out passes it through untouched; destinations may check it.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Creates a flag in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns `true` once [`cancel`](Self::cancel) was called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Context handed to [`Appendable::appender`].
///
/// Carries the scrape target and metadata store some destinations expect,
/// plus a cancellation flag. [`AppendContext::with_defaults`] fills in an
/// empty target and a [`NoopMetadataStore`](crate::metadata::NoopMetadataStore)
/// where the caller supplied none.
#[derive(Clone, Default)]
pub struct AppendContext {
    target: Option<Arc<ScrapeTarget>>,
    metadata: Option<Arc<dyn MetricMetadataStore>>,
    cancellation: CancellationFlag,
}

impl AppendContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the scrape target.
    #[must_use]
    pub fn with_target(mut self, target: ScrapeTarget) -> Self {
        self.target = Some(Arc::new(target));
        self
    }

    /// Sets the metadata store.
    #[must_use]
    pub fn with_metadata_store(mut self, store: Arc<dyn MetricMetadataStore>) -> Self {
        self.metadata = Some(store);
        self
    }

    /// Sets the cancellation flag.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: CancellationFlag) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Returns a copy where a missing target or metadata store is replaced by
    /// an empty placeholder. Values the caller set are kept.
    #[must_use]
    pub fn with_defaults(&self) -> Self {
        let mut ctx = self.clone();
        if ctx.target.is_none() {
            ctx.target = Some(Arc::new(ScrapeTarget::default()));
        }
        if ctx.metadata.is_none() {
            ctx.metadata = Some(Arc::new(crate::metadata::NoopMetadataStore));
        }
        ctx
    }

    /// The scrape target, if set.
    pub fn target(&self) -> Option<&ScrapeTarget> {
        self.target.as_deref()
    }

    /// The metadata store, if set.
    pub fn metadata_store(&self) -> Option<&dyn MetricMetadataStore> {
        self.metadata.as_deref()
    }

    /// The cancellation flag.
    pub fn cancellation(&self) -> &CancellationFlag {
        &self.cancellation
    }
}

impl std::fmt::Debug for AppendContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppendContext")
            .field("target", &self.target)
            .field("metadata", &self.metadata.as_ref().map(|m| m.length_metadata()))
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}
