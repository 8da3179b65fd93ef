//! Process-wide series identity registry.
//!
//! This module maps canonical label sets to stable integer references. Every
//! transaction opened by a [`FanoutRouter`](crate::router::FanoutRouter)
//! resolves unset refs here, so all destinations see the same
//! [`SeriesRef`] for the same series.
//!
//! # Overview
//!
//! - [`SeriesRef`] - Opaque, `Copy` identifier bound to one label set
//! - [`SeriesRegistry`] - Concurrent label set to ref map
//!
//! # Registration Flow
//!
//! 1. Caller passes a [`LabelSet`] (already canonical by construction)
//! 2. The registry locks only the shard owning that label set
//! 3. If the label set is present, its existing ref is returned
//! 4. Otherwise the next ref is taken from an atomic counter and inserted
//!
//! Refs are never renumbered, reused, or evicted. The registry grows with the
//! number of distinct series ever seen.
//!
//! # Example
//!
//! ```rust
//! use fanout::labels::LabelSet;
//! use fanout::series::{SeriesRef, SeriesRegistry};
//!
//! let registry = SeriesRegistry::new();
//! let cpu = registry.get_or_assign(&LabelSet::from([("__name__", "cpu"), ("host", "web1")]));
//!
//! assert_ne!(cpu, SeriesRef::UNSET);
//! assert_eq!(registry.get(&LabelSet::from([("host", "web1"), ("__name__", "cpu")])), Some(cpu));
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::labels::LabelSet;

static GLOBAL_REGISTRY: LazyLock<Arc<SeriesRegistry>> =
    LazyLock::new(|| Arc::new(SeriesRegistry::new()));

/// Opaque identifier for a registered time series.
///
/// The ref is `Copy` and cheap to pass on the hot path. [`SeriesRef::UNSET`]
/// is the sentinel meaning "not resolved yet"; the registry never hands it
/// out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesRef(u64);

impl SeriesRef {
    /// Sentinel for a ref that has not been resolved.
    pub const UNSET: SeriesRef = SeriesRef(0);

    /// Wraps a raw ref value, e.g. one cached by a caller.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns `true` for the unset sentinel.
    pub const fn is_unset(self) -> bool {
        self.0 == Self::UNSET.0
    }
}

impl fmt::Display for SeriesRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SeriesRef {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Concurrent registry mapping canonical label sets to [`SeriesRef`]s.
///
/// # Thread Safety
///
/// All methods take `&self` and may be called from any number of threads.
/// The forward map is sharded by the hash of the label set, so first-time
/// registration of one series only serializes against series that land on
/// the same shard. A ref is assigned while the owning shard is write-locked,
/// so concurrent first-time callers for the same label set all observe the
/// same ref.
pub struct SeriesRegistry {
    /// Canonical label set to ref.
    refs: DashMap<LabelSet, SeriesRef>,
    /// Next ref to hand out. Starts above [`SeriesRef::UNSET`].
    next_ref: AtomicU64,
}

impl SeriesRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            refs: DashMap::new(),
            next_ref: AtomicU64::new(SeriesRef::UNSET.0 + 1),
        }
    }

    /// Returns the process-wide registry shared by routers that are not
    /// given their own.
    pub fn global() -> Arc<SeriesRegistry> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    /// Returns the ref for `labels`, assigning the next one if unseen.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use fanout::labels::LabelSet;
    /// # use fanout::series::SeriesRegistry;
    /// let registry = SeriesRegistry::new();
    /// let a = registry.get_or_assign(&LabelSet::from([("job", "a")]));
    /// let b = registry.get_or_assign(&LabelSet::from([("job", "b")]));
    ///
    /// assert!(b > a);
    /// assert_eq!(registry.get_or_assign(&LabelSet::from([("job", "a")])), a);
    /// ```
    pub fn get_or_assign(&self, labels: &LabelSet) -> SeriesRef {
        // Read path first: after warm-up nearly every lookup hits.
        if let Some(existing) = self.refs.get(labels) {
            return *existing;
        }

        *self
            .refs
            .entry(labels.clone())
            .or_insert_with(|| SeriesRef(self.next_ref.fetch_add(1, Ordering::Relaxed)))
    }

    /// Looks up the ref for `labels` without assigning one.
    pub fn get(&self, labels: &LabelSet) -> Option<SeriesRef> {
        self.refs.get(labels).map(|r| *r)
    }

    /// Number of distinct series registered.
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    /// Returns `true` if nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

impl Default for SeriesRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SeriesRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeriesRegistry")
            .field("series", &self.refs.len())
            .field("next_ref", &self.next_ref.load(Ordering::Relaxed))
            .finish()
    }
}
