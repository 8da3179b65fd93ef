//! # fanout
//!
//! Telemetry fan-out appender.
//!
//! fanout takes one logical stream of metric sample writes and replicates it,
//! with a consistent series identity, to a set of independent storage
//! destinations that can be swapped at runtime without disturbing writes
//! already in flight.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - One process-wide series registry: the same label set always gets the
//!   same [`SeriesRef`], and every destination sees that ref
//! - Sharded registry, so first-time registrations of unrelated series don't
//!   contend
//! - Hot reconfiguration: the destination list is an immutable snapshot
//!   replaced atomically
//! - Independent per-destination delivery: one failing destination never
//!   stops the others, and every failure is reported
//! - No background threads, no internal retries
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use fanout::{AppendContext, Appendable, Appender, FanoutRouter, LabelSet, SeriesRef};
//! use fanout::memory::MemoryDestination;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let primary = Arc::new(MemoryDestination::new("primary"));
//! let replica = Arc::new(MemoryDestination::new("replica"));
//!
//! let router = FanoutRouter::new(
//!     vec![primary.clone() as Arc<dyn Appendable>, replica.clone()],
//!     "prometheus.scrape.default",
//! );
//!
//! // One transaction per write batch
//! let mut app = router.appender(&AppendContext::new());
//! let labels = LabelSet::from([("__name__", "up"), ("job", "api")]);
//! let series = app.append(SeriesRef::UNSET, &labels, 1_700_000_000_000, 1.0)?;
//! app.append(series, &labels, 1_700_000_015_000, 1.0)?;
//! app.commit()?;
//!
//! assert_eq!(primary.len(), 2);
//! assert_eq!(replica.len(), 2);
//!
//! // Swap destinations; new transactions only see the new list
//! router.update_destinations(vec![primary.clone() as Arc<dyn Appendable>]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`FanoutRouter`]: Owns the destination snapshot; opens transactions
//! - [`FanoutAppender`]: One write cycle across every destination
//! - [`SeriesRegistry`]: Label set to [`SeriesRef`] mapping
//! - [`ErrorAggregator`] / [`MultiError`]: Per-destination error collection
//! - [`Appendable`] / [`Appender`]: The destination contract
//!
//! ## Modules
//!
//! - [`router`]: Destination snapshot and transaction factory
//! - [`appender`]: The fan-out transaction
//! - [`series`]: Series identity registry
//! - [`labels`]: Canonical label sets
//! - [`destination`]: Destination traits and append context
//! - [`metadata`]: Exemplars, metadata, scrape targets
//! - [`memory`]: In-process destination
//! - `remote_write`: Prometheus remote-write destination (feature `prometheus-remote-write`)
//! - [`config`]: JSON router configuration
//! - [`error`]: Error types

pub mod appender;
pub mod config;
pub mod destination;
pub mod error;
pub mod labels;
pub mod memory;
pub mod metadata;
#[cfg(feature = "prometheus-remote-write")]
pub mod remote_write;
pub mod router;
pub mod series;

// Re-export primary API types at crate root for convenience.
pub use appender::{FanoutAppender, TransactionState};
pub use config::FanoutConfig;
pub use destination::{AppendContext, AppendResult, Appendable, Appender, CancellationFlag};
pub use error::{AppendError, ErrorAggregator, FanoutError, MultiError, Result};
pub use labels::LabelSet;
pub use router::FanoutRouter;
pub use series::{SeriesRef, SeriesRegistry};
