//! Integration tests for fan-out transactions across several destinations.

#![allow(clippy::approx_constant)]

use std::sync::Arc;

use fanout::destination::{AppendContext, AppendResult, Appendable, Appender};
use fanout::error::AppendError;
use fanout::labels::LabelSet;
use fanout::memory::MemoryDestination;
use fanout::metadata::{Exemplar, Metadata};
use fanout::router::FanoutRouter;
use fanout::series::{SeriesRef, SeriesRegistry};
use parking_lot::Mutex;

/// Calls observed by a [`Scripted`] destination.
#[derive(Debug, Clone, PartialEq)]
enum Call {
    Open,
    Append(SeriesRef, LabelSet, i64, f64),
    Commit,
    Rollback,
    Exemplar,
    Metadata,
}

/// Destination that records every call and fails with a fixed message.
#[derive(Clone, Default)]
struct Scripted {
    calls: Arc<Mutex<Vec<Call>>>,
    fail_with: Option<&'static str>,
}

impl Scripted {
    fn ok() -> Self {
        Self::default()
    }

    fn failing(message: &'static str) -> Self {
        Self {
            calls: Arc::default(),
            fail_with: Some(message),
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

struct ScriptedAppender(Scripted);

impl ScriptedAppender {
    fn record(&self, call: Call) -> AppendResult<()> {
        self.0.calls.lock().push(call);
        match self.0.fail_with {
            Some(message) => Err(AppendError::destination(message)),
            None => Ok(()),
        }
    }
}

impl Appender for ScriptedAppender {
    fn append(&mut self, r: SeriesRef, l: &LabelSet, t: i64, v: f64) -> AppendResult<SeriesRef> {
        self.record(Call::Append(r, l.clone(), t, v)).map(|()| r)
    }

    fn commit(&mut self) -> AppendResult<()> {
        self.record(Call::Commit)
    }

    fn rollback(&mut self) -> AppendResult<()> {
        self.record(Call::Rollback)
    }

    fn append_exemplar(&mut self, r: SeriesRef, _: &LabelSet, _: &Exemplar) -> AppendResult<SeriesRef> {
        self.record(Call::Exemplar).map(|()| r)
    }

    fn update_metadata(&mut self, r: SeriesRef, _: &LabelSet, _: &Metadata) -> AppendResult<SeriesRef> {
        self.record(Call::Metadata).map(|()| r)
    }
}

impl Appendable for Scripted {
    fn appender(&self, _ctx: &AppendContext) -> Box<dyn Appender> {
        self.calls.lock().push(Call::Open);
        Box::new(ScriptedAppender(self.clone()))
    }
}

fn router(destinations: Vec<Arc<dyn Appendable>>) -> FanoutRouter {
    FanoutRouter::with_registry(destinations, "integration", Arc::new(SeriesRegistry::new()))
}

fn job_x() -> LabelSet {
    LabelSet::from([("job", "x")])
}

#[test]
fn test_partial_failure_delivers_to_healthy_destination() {
    let a = Scripted::ok();
    let b = Scripted::failing("disk full");
    let router = router(vec![Arc::new(a.clone()) as Arc<dyn Appendable>, Arc::new(b.clone())]);

    let mut app = router.appender(&AppendContext::new());
    let err = app.append(SeriesRef::UNSET, &job_x(), 1000, 3.14).unwrap_err();

    let multi = err.as_multi().expect("aggregate error");
    assert_eq!(multi.len(), 1);
    assert_eq!(multi.errors()[0].to_string(), "disk full");

    let series_ref = multi.series_ref().expect("resolved ref");
    assert_eq!(series_ref, router.registry().get_or_assign(&job_x()));
    assert_eq!(
        a.calls(),
        vec![Call::Open, Call::Append(series_ref, job_x(), 1000, 3.14)]
    );
    // B was attempted too.
    assert_eq!(b.calls().len(), 2);

    // A's write survives B's failure.
    assert!(app.commit().is_err());
    assert_eq!(a.calls().last(), Some(&Call::Commit));
}

#[test]
fn test_same_ref_forwarded_to_every_destination() {
    let a = Arc::new(MemoryDestination::new("a"));
    let b = Arc::new(MemoryDestination::new("b"));
    let router = router(vec![a.clone() as Arc<dyn Appendable>, b.clone()]);

    let mut app = router.appender(&AppendContext::new());
    let labels = LabelSet::from([("__name__", "up"), ("instance", "web1")]);
    let r1 = app.append(SeriesRef::UNSET, &labels, 1, 1.0).unwrap();
    let r2 = app.append(SeriesRef::UNSET, &labels, 2, 1.0).unwrap();
    app.commit().unwrap();

    assert_eq!(r1, r2);
    for dest in [&a, &b] {
        let samples = dest.samples();
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| s.series_ref == r1));
    }
}

#[test]
fn test_aggregation_order_matches_destination_order() {
    let router = router(vec![
        Arc::new(Scripted::failing("Ea")) as Arc<dyn Appendable>,
        Arc::new(Scripted::failing("Eb")),
        Arc::new(Scripted::failing("Ec")),
    ]);

    let mut app = router.appender(&AppendContext::new());
    let err = app.append(SeriesRef::UNSET, &job_x(), 1, 1.0).unwrap_err();
    let messages: Vec<String> = err.as_multi().unwrap().iter().map(ToString::to_string).collect();
    assert_eq!(messages, ["Ea", "Eb", "Ec"]);
    assert_eq!(err.to_string(), "3 errors occurred: Ea; Eb; Ec");

    let err = app.rollback().unwrap_err();
    let messages: Vec<String> = err.as_multi().unwrap().iter().map(ToString::to_string).collect();
    assert_eq!(messages, ["Ea", "Eb", "Ec"]);
}

#[test]
fn test_commit_with_zero_destinations_succeeds() {
    let router = router(Vec::new());
    let mut app = router.appender(&AppendContext::new());

    let series_ref = app.append(SeriesRef::UNSET, &job_x(), 1, 1.0).unwrap();
    assert!(!series_ref.is_unset());
    assert!(app.commit().is_ok());
}

#[test]
fn test_exemplar_and_metadata_never_reach_destinations() {
    let a = Scripted::ok();
    let router = router(vec![Arc::new(a.clone()) as Arc<dyn Appendable>]);
    let mut app = router.appender(&AppendContext::new());

    let exemplar = Exemplar {
        labels: LabelSet::from([("trace_id", "4bf92f3577b34da6")]),
        value: 0.25,
        timestamp_ms: Some(1000),
    };
    assert!(matches!(
        app.append_exemplar(SeriesRef::new(1), &job_x(), &exemplar),
        Err(AppendError::Unsupported { operation: "append_exemplar" })
    ));
    assert!(matches!(
        app.update_metadata(SeriesRef::new(1), &job_x(), &Metadata::default()),
        Err(AppendError::Unsupported { operation: "update_metadata" })
    ));

    app.commit().unwrap();
    assert_eq!(a.calls(), vec![Call::Open, Call::Commit]);
}

#[test]
fn test_terminal_transaction_rejects_calls() {
    let a = Scripted::ok();
    let router = router(vec![Arc::new(a.clone()) as Arc<dyn Appendable>]);
    let mut app = router.appender(&AppendContext::new());
    app.commit().unwrap();

    assert!(matches!(
        app.append(SeriesRef::UNSET, &job_x(), 1, 1.0),
        Err(AppendError::TransactionClosed { .. })
    ));
    assert!(matches!(app.commit(), Err(AppendError::TransactionClosed { .. })));
    assert!(matches!(app.rollback(), Err(AppendError::TransactionClosed { .. })));
    assert_eq!(a.calls(), vec![Call::Open, Call::Commit]);
}

#[test]
fn test_nested_routers_flatten_errors() {
    let registry = Arc::new(SeriesRegistry::new());
    let inner = Arc::new(FanoutRouter::with_registry(
        vec![
            Arc::new(Scripted::failing("inner a")) as Arc<dyn Appendable>,
            Arc::new(Scripted::failing("inner b")),
        ],
        "inner",
        Arc::clone(&registry),
    ));
    let outer = FanoutRouter::with_registry(
        vec![Arc::new(Scripted::failing("outer")) as Arc<dyn Appendable>, inner],
        "outer",
        Arc::clone(&registry),
    );

    let mut app = outer.appender(&AppendContext::new());
    let err = app.append(SeriesRef::UNSET, &job_x(), 1, 1.0).unwrap_err();
    let messages: Vec<String> = err.as_multi().unwrap().iter().map(ToString::to_string).collect();
    assert_eq!(messages, ["outer", "inner a", "inner b"]);
    app.rollback().unwrap_err();
}

#[test]
fn test_rollback_discards_everywhere() {
    let a = Arc::new(MemoryDestination::new("a"));
    let b = Arc::new(MemoryDestination::new("b"));
    let router = router(vec![a.clone() as Arc<dyn Appendable>, b.clone()]);

    let mut app = router.appender(&AppendContext::new());
    app.append(SeriesRef::UNSET, &job_x(), 1, 1.0).unwrap();
    app.rollback().unwrap();

    assert!(a.is_empty());
    assert!(b.is_empty());
    assert_eq!(a.stats().rollbacks, 1);
    assert_eq!(b.stats().rollbacks, 1);
}
