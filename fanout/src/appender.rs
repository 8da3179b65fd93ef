//! The fan-out transaction.
//!
//! A [`FanoutAppender`] is opened by
//! [`FanoutRouter::appender`](crate::router::FanoutRouter::appender) and holds
//! one child appender per destination that was configured at that moment.
//! Every operation is forwarded to every child, in order, and each child's
//! failure is collected rather than short-circuiting the rest.
//!
//! # Semantics
//!
//! Delivery is independent per destination. A sample that one destination
//! rejects is still delivered to its siblings, and a failed commit on one
//! destination does not undo the commits of the others. Callers get every
//! individual failure back through [`MultiError`](crate::error::MultiError).
//!
//! # State Machine
//!
//! ```text
//! Open ──commit()──▶ Committed
//!   │
//!   └──rollback()──▶ RolledBack
//! ```
//!
//! Both end states are terminal. Any append, commit, or rollback after that
//! is rejected with [`AppendError::TransactionClosed`] without touching the
//! children.

use std::fmt;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::destination::{AppendResult, Appender};
use crate::error::{AppendError, ErrorAggregator};
use crate::labels::LabelSet;
use crate::metadata::{Exemplar, Metadata};
use crate::series::{SeriesRef, SeriesRegistry};

/// Lifecycle state of a [`FanoutAppender`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Accepting appends.
    Open,
    /// `commit()` was called.
    Committed,
    /// `rollback()` was called.
    RolledBack,
}

impl TransactionState {
    /// Returns `true` for `Committed` and `RolledBack`.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Open)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
        })
    }
}

/// One write cycle spanning every destination of a router snapshot.
pub struct FanoutAppender {
    children: Vec<Box<dyn Appender>>,
    registry: Arc<SeriesRegistry>,
    component_id: Arc<str>,
    state: TransactionState,
}

impl FanoutAppender {
    pub(crate) fn new(
        children: Vec<Box<dyn Appender>>,
        registry: Arc<SeriesRegistry>,
        component_id: Arc<str>,
    ) -> Self {
        Self {
            children,
            registry,
            component_id,
            state: TransactionState::Open,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Number of child appenders (destinations) in this transaction.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Returns `true` if the transaction has no destinations.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// The owning router's component id.
    pub fn component_id(&self) -> &str {
        &self.component_id
    }

    fn ensure_open(&self) -> AppendResult<()> {
        if self.state.is_terminal() {
            return Err(AppendError::TransactionClosed { state: self.state });
        }
        Ok(())
    }

    /// Runs `op` against every child and moves to `next`.
    fn finish(
        &mut self,
        next: TransactionState,
        op: impl Fn(&mut dyn Appender) -> AppendResult<()>,
    ) -> AppendResult<()> {
        self.ensure_open()?;
        self.state = next;

        let mut errs = ErrorAggregator::new();
        for child in &mut self.children {
            errs.record(op(child.as_mut()));
        }
        if !errs.is_empty() {
            trace!(
                component_id = %self.component_id,
                state = %next,
                failed = errs.len(),
                destinations = self.children.len(),
                "fan-out finished with destination errors"
            );
        }
        errs.finish()
    }
}

impl Appender for FanoutAppender {
    fn append(
        &mut self,
        series_ref: SeriesRef,
        labels: &LabelSet,
        timestamp_ms: i64,
        value: f64,
    ) -> AppendResult<SeriesRef> {
        self.ensure_open()?;

        let series_ref = if series_ref.is_unset() {
            self.registry.get_or_assign(labels)
        } else {
            series_ref
        };

        let mut errs = ErrorAggregator::new();
        for child in &mut self.children {
            errs.record(child.append(series_ref, labels, timestamp_ms, value));
        }
        errs.finish_append(series_ref)
    }

    fn commit(&mut self) -> AppendResult<()> {
        self.finish(TransactionState::Committed, |child| child.commit())
    }

    fn rollback(&mut self) -> AppendResult<()> {
        self.finish(TransactionState::RolledBack, |child| child.rollback())
    }

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

impl Drop for FanoutAppender {
    fn drop(&mut self) {
        // A child panicking in rollback during unwinding would abort.
        if self.state.is_terminal() || std::thread::panicking() {
            return;
        }
        warn!(
            component_id = %self.component_id,
            destinations = self.children.len(),
            "fan-out appender dropped while open, rolling back"
        );
        if let Err(e) = self.rollback() {
            warn!(component_id = %self.component_id, "rollback on drop failed: {e}");
        }
    }
}

impl fmt::Debug for FanoutAppender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanoutAppender")
            .field("component_id", &self.component_id)
            .field("destinations", &self.children.len())
            .field("state", &self.state)
            .finish()
    }
}
