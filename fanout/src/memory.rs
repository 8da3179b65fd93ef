//! In-process destination.
//!
//! [`MemoryDestination`] stages samples per appender and publishes them to a
//! shared buffer on commit. Rolled-back samples are discarded. It accepts
//! exemplars and metadata, unlike the fan-out itself, and can be given a
//! sample limit after which appends are rejected. The limit counts committed
//! samples plus samples staged by every open appender, so concurrent
//! transactions can never commit past it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::destination::{AppendContext, AppendResult, Appendable, Appender};
use crate::error::AppendError;
use crate::labels::LabelSet;
use crate::metadata::{Exemplar, Metadata};
use crate::series::SeriesRef;

/// One committed sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Ref the sample was appended under.
    pub series_ref: SeriesRef,
    /// Series labels.
    pub labels: LabelSet,
    /// Timestamp in milliseconds since epoch.
    pub timestamp_ms: i64,
    /// Sample value.
    pub value: f64,
}

/// Commit and rollback counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Successful commits.
    pub commits: u64,
    /// Rollbacks.
    pub rollbacks: u64,
    /// Appends rejected because the limit was reached.
    pub rejected: u64,
}

#[derive(Debug, Default)]
struct Shared {
    samples: Mutex<Vec<Sample>>,
    exemplars: Mutex<HashMap<SeriesRef, Vec<Exemplar>>>,
    metadata: Mutex<HashMap<SeriesRef, Metadata>>,
    /// Committed samples plus samples staged by open appenders.
    reserved: AtomicUsize,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    rejected: AtomicU64,
}

/// Destination that keeps committed samples in memory.
#[derive(Debug, Clone)]
pub struct MemoryDestination {
    name: Arc<str>,
    limit: Option<usize>,
    shared: Arc<Shared>,
}

impl MemoryDestination {
    /// Creates an unbounded destination.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into()),
            limit: None,
            shared: Arc::default(),
        }
    }

    /// Rejects appends once `limit` samples are committed or staged by any
    /// open appender.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Destination name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of all committed samples, in commit order.
    pub fn samples(&self) -> Vec<Sample> {
        self.shared.samples.lock().clone()
    }

    /// Number of committed samples.
    pub fn len(&self) -> usize {
        self.shared.samples.lock().len()
    }

    /// Returns `true` if nothing was committed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Committed exemplars for a series.
    pub fn exemplars(&self, series_ref: SeriesRef) -> Vec<Exemplar> {
        self.shared
            .exemplars
            .lock()
            .get(&series_ref)
            .cloned()
            .unwrap_or_default()
    }

    /// Committed metadata for a series.
    pub fn metadata(&self, series_ref: SeriesRef) -> Option<Metadata> {
        self.shared.metadata.lock().get(&series_ref).cloned()
    }

    /// Commit and rollback counters.
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            commits: self.shared.commits.load(Ordering::Relaxed),
            rollbacks: self.shared.rollbacks.load(Ordering::Relaxed),
            rejected: self.shared.rejected.load(Ordering::Relaxed),
        }
    }
}

impl Appendable for MemoryDestination {
    fn appender(&self, _ctx: &AppendContext) -> Box<dyn Appender> {
        Box::new(MemoryAppender {
            destination: self.clone(),
            samples: Vec::new(),
            exemplars: Vec::new(),
            metadata: Vec::new(),
        })
    }
}

struct MemoryAppender {
    destination: MemoryDestination,
    samples: Vec<Sample>,
    exemplars: Vec<(SeriesRef, Exemplar)>,
    metadata: Vec<(SeriesRef, Metadata)>,
}

impl MemoryAppender {
    /// Discards staged data and returns its reservation.
    fn clear(&mut self) {
        self.destination
            .shared
            .reserved
            .fetch_sub(self.samples.len(), Ordering::AcqRel);
        self.samples.clear();
        self.exemplars.clear();
        self.metadata.clear();
    }
}

impl Drop for MemoryAppender {
    fn drop(&mut self) {
        self.clear();
    }
}

impl Appender for MemoryAppender {
    fn append(
        &mut self,
        series_ref: SeriesRef,
        labels: &LabelSet,
        timestamp_ms: i64,
        value: f64,
    ) -> AppendResult<SeriesRef> {
        let shared = &self.destination.shared;
        match self.destination.limit {
            Some(limit) => {
                let reserved = shared.reserved.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n < limit).then_some(n + 1)
                });
                if reserved.is_err() {
                    shared.rejected.fetch_add(1, Ordering::Relaxed);
                    return Err(AppendError::destination(format!(
                        "destination '{}' is full ({limit} samples)",
                        self.destination.name
                    )));
                }
            }
            None => {
                shared.reserved.fetch_add(1, Ordering::AcqRel);
            }
        }

        self.samples.push(Sample {
            series_ref,
            labels: labels.clone(),
            timestamp_ms,
            value,
        });
        Ok(series_ref)
    }

    fn commit(&mut self) -> AppendResult<()> {
        let shared = &self.destination.shared;
        shared.samples.lock().append(&mut self.samples);
        {
            let mut exemplars = shared.exemplars.lock();
            for (series_ref, exemplar) in self.exemplars.drain(..) {
                exemplars.entry(series_ref).or_default().push(exemplar);
            }
        }
        shared.metadata.lock().extend(self.metadata.drain(..));
        shared.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn rollback(&mut self) -> AppendResult<()> {
        self.clear();
        self.destination.shared.rollbacks.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn append_exemplar(
        &mut self,
        series_ref: SeriesRef,
        _labels: &LabelSet,
        exemplar: &Exemplar,
    ) -> AppendResult<SeriesRef> {
        self.exemplars.push((series_ref, exemplar.clone()));
        Ok(series_ref)
    }

    fn update_metadata(
        &mut self,
        series_ref: SeriesRef,
        _labels: &LabelSet,
        metadata: &Metadata,
    ) -> AppendResult<SeriesRef> {
        self.metadata.push((series_ref, metadata.clone()));
        Ok(series_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetricType;

    fn labels() -> LabelSet {
        LabelSet::from([("job", "x")])
    }

    #[test]
    fn test_commit_publishes_samples() {
        let dest = MemoryDestination::new("local");
        let mut app = dest.appender(&AppendContext::new());

        app.append(SeriesRef::new(1), &labels(), 1000, 3.5).unwrap();
        app.append(SeriesRef::new(1), &labels(), 2000, 2.5).unwrap();
        assert!(dest.is_empty());

        app.commit().unwrap();
        let samples = dest.samples();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].timestamp_ms, 1000);
        assert_eq!(samples[1].value, 2.5);
        assert_eq!(dest.stats().commits, 1);
    }

    #[test]
    fn test_rollback_discards_samples() {
        let dest = MemoryDestination::new("local");
        let mut app = dest.appender(&AppendContext::new());

        app.append(SeriesRef::new(1), &labels(), 1000, 1.0).unwrap();
        app.rollback().unwrap();

        assert!(dest.is_empty());
        assert_eq!(dest.stats(), MemoryStats { commits: 0, rollbacks: 1, rejected: 0 });
    }

    #[test]
    fn test_limit_rejects_appends() {
        let dest = MemoryDestination::new("small").with_limit(1);
        let mut app = dest.appender(&AppendContext::new());

        app.append(SeriesRef::new(1), &labels(), 1, 1.0).unwrap();
        let err = app.append(SeriesRef::new(1), &labels(), 2, 2.0).unwrap_err();
        assert_eq!(err.to_string(), "destination 'small' is full (1 samples)");

        app.commit().unwrap();
        assert_eq!(dest.len(), 1);
        assert_eq!(dest.stats().rejected, 1);
    }

    #[test]
    fn test_limit_holds_across_open_appenders() {
        let dest = MemoryDestination::new("small").with_limit(1);
        let mut first = dest.appender(&AppendContext::new());
        let mut second = dest.appender(&AppendContext::new());

        first.append(SeriesRef::new(1), &labels(), 1, 1.0).unwrap();
        assert!(second.append(SeriesRef::new(1), &labels(), 2, 2.0).is_err());

        first.commit().unwrap();
        second.commit().unwrap();
        assert_eq!(dest.len(), 1);
        assert_eq!(dest.stats().rejected, 1);
    }

    #[test]
    fn test_rollback_and_drop_release_capacity() {
        let dest = MemoryDestination::new("small").with_limit(1);

        let mut rolled_back = dest.appender(&AppendContext::new());
        rolled_back.append(SeriesRef::new(1), &labels(), 1, 1.0).unwrap();
        rolled_back.rollback().unwrap();

        {
            let mut abandoned = dest.appender(&AppendContext::new());
            abandoned.append(SeriesRef::new(1), &labels(), 2, 1.0).unwrap();
        }

        let mut app = dest.appender(&AppendContext::new());
        app.append(SeriesRef::new(1), &labels(), 3, 1.0).unwrap();
        app.commit().unwrap();
        assert_eq!(dest.len(), 1);
        assert_eq!(dest.stats().rejected, 0);
    }

    #[test]
    fn test_exemplars_and_metadata_on_commit() {
        let dest = MemoryDestination::new("local");
        let mut app = dest.appender(&AppendContext::new());
        let exemplar = Exemplar {
            labels: LabelSet::from([("trace_id", "abc")]),
            value: 0.5,
            timestamp_ms: Some(1000),
        };
        let meta = Metadata {
            metric_type: MetricType::Counter,
            unit: "requests".to_string(),
            help: "Total requests".to_string(),
        };

        app.append_exemplar(SeriesRef::new(5), &labels(), &exemplar).unwrap();
        app.update_metadata(SeriesRef::new(5), &labels(), &meta).unwrap();
        assert!(dest.exemplars(SeriesRef::new(5)).is_empty());

        app.commit().unwrap();
        assert_eq!(dest.exemplars(SeriesRef::new(5)), vec![exemplar]);
        assert_eq!(dest.metadata(SeriesRef::new(5)), Some(meta));
    }

    #[test]
    fn test_clones_share_storage() {
        let dest = MemoryDestination::new("local");
        let other = dest.clone();

        let mut app = dest.appender(&AppendContext::new());
        app.append(SeriesRef::new(1), &labels(), 1, 1.0).unwrap();
        app.commit().unwrap();

        assert_eq!(other.len(), 1);
        assert_eq!(other.name(), "local");
    }
}
