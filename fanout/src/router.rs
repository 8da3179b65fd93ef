//! The fan-out router.
//!
//! A [`FanoutRouter`] owns the current ordered list of destinations and opens
//! [`FanoutAppender`] transactions against it. The list is published as an
//! immutable snapshot and replaced wholesale by
//! [`FanoutRouter::update_destinations`]; transactions keep the snapshot they
//! were opened with, so reconfiguration never changes an in-flight write.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use fanout::destination::{AppendContext, Appendable, Appender};
//! use fanout::labels::LabelSet;
//! use fanout::memory::MemoryDestination;
//! use fanout::router::FanoutRouter;
//! use fanout::series::SeriesRef;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let local = Arc::new(MemoryDestination::new("local"));
//! let router = FanoutRouter::new(vec![local.clone() as Arc<dyn Appendable>], "prometheus.scrape.default");
//!
//! let mut app = router.appender(&AppendContext::new());
//! app.append(SeriesRef::UNSET, &LabelSet::from([("job", "api")]), 1_700_000_000_000, 1.0)?;
//! app.commit()?;
//!
//! assert_eq!(local.samples().len(), 1);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::appender::FanoutAppender;
use crate::destination::{AppendContext, Appendable, Appender};
use crate::series::SeriesRegistry;

/// Immutable, shareable list of destinations.
pub type Destinations = Arc<[Arc<dyn Appendable>]>;

/// Replicates appends to a hot-swappable set of destinations.
///
/// # Thread Safety
///
/// `FanoutRouter` is `Send + Sync`. Opening transactions takes a read lock
/// only long enough to clone the snapshot pointer; replacing the list takes
/// the write lock only for the pointer swap.
pub struct FanoutRouter {
    /// Current destination snapshot.
    destinations: RwLock<Destinations>,
    /// Diagnostic label. Never used for routing.
    component_id: Arc<str>,
    /// Registry resolving unset refs for every transaction.
    registry: Arc<SeriesRegistry>,
}

impl FanoutRouter {
    /// Creates a router backed by the process-wide [`SeriesRegistry`].
    pub fn new<I>(destinations: I, component_id: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Appendable>>,
    {
        Self::with_registry(destinations, component_id, SeriesRegistry::global())
    }

    /// Creates a router backed by the given registry.
    pub fn with_registry<I>(
        destinations: I,
        component_id: impl Into<String>,
        registry: Arc<SeriesRegistry>,
    ) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Appendable>>,
    {
        let component_id: Arc<str> = Arc::from(component_id.into());
        let destinations: Destinations = destinations.into_iter().collect();
        debug!(
            component_id = %component_id,
            destinations = destinations.len(),
            "fan-out router created"
        );
        Self {
            destinations: RwLock::new(destinations),
            component_id,
            registry,
        }
    }

    /// Atomically replaces the destination list.
    ///
    /// Transactions already open keep their old snapshot; transactions
    /// opened afterwards use the new list exclusively.
    pub fn update_destinations<I>(&self, destinations: I)
    where
        I: IntoIterator<Item = Arc<dyn Appendable>>,
    {
        // Build the new list before taking the lock.
        let destinations: Destinations = destinations.into_iter().collect();
        let count = destinations.len();
        let previous = std::mem::replace(&mut *self.destinations.write(), destinations);

        debug!(
            component_id = %self.component_id,
            previous = previous.len(),
            destinations = count,
            "fan-out destinations updated"
        );
    }

    /// Opens a transaction against the current destinations.
    ///
    /// A missing scrape target or metadata store on `ctx` is replaced by an
    /// empty placeholder before it reaches the destinations.
    pub fn appender(&self, ctx: &AppendContext) -> FanoutAppender {
        let destinations = self.destinations();
        let ctx = ctx.with_defaults();

        trace!(
            component_id = %self.component_id,
            destinations = destinations.len(),
            "opening fan-out transaction"
        );
        let children = destinations.iter().map(|d| d.appender(&ctx)).collect();
        FanoutAppender::new(children, Arc::clone(&self.registry), Arc::clone(&self.component_id))
    }

    /// Returns the current destination snapshot.
    pub fn destinations(&self) -> Destinations {
        Arc::clone(&self.destinations.read())
    }

    /// The diagnostic component id.
    pub fn component_id(&self) -> &str {
        &self.component_id
    }

    /// The registry used to resolve unset refs.
    pub fn registry(&self) -> &Arc<SeriesRegistry> {
        &self.registry
    }
}

// A router is itself a destination, so routers can be chained.
impl Appendable for FanoutRouter {
    fn appender(&self, ctx: &AppendContext) -> Box<dyn Appender> {
        Box::new(FanoutRouter::appender(self, ctx))
    }
}

impl fmt::Debug for FanoutRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanoutRouter")
            .field("component_id", &self.component_id)
            .field("destinations", &self.destinations.read().len())
            .field("registry", &self.registry)
            .finish()
    }
}
