#![forbid(unsafe_code)]

//! End-to-end tests for the undo engine.
//!
//! Validates:
//! - History caps on repeatable and undoable sequences
//! - Undo/redo availability for a unit that is both undoable and repeatable
//! - Parallel fan-out runs every child exactly once
//! - Sequential rollback of undoable composites
//! - Composites performed and undone through the service
//! - Independent contexts driven from several threads
//!
//! Run:
//!   cargo test -p rewind-runtime --test e2e_undo_service

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rewind_runtime::undo::{
    ChildUnits, CompositeUndoableUnit, CompositeUnit, ContextId, ExecutionMode, MemoryLogSink,
    UndoService, Unit, UnitError, UnitKind, UnitResult,
};

// ============================================================================
// Test unit
// ============================================================================

/// Unit that counts executions and undos.
///
/// `net` goes up on every execute and down on every undo, so it tracks the
/// externally visible effect of the unit.
#[derive(Default)]
struct CountingUnit {
    description: String,
    undoable: bool,
    repeatable: bool,
    fail_execute: bool,
    fail_undo: bool,
    executed: AtomicUsize,
    undone: AtomicUsize,
    net: AtomicI64,
    modes: Mutex<Vec<ExecutionMode>>,
    last: Mutex<Option<String>>,
    journal: Option<Arc<Mutex<Vec<String>>>>,
}

impl CountingUnit {
    fn new(description: &str) -> Self {
        Self {
            description: description.to_string(),
            ..Self::default()
        }
    }

    fn undoable(mut self) -> Self {
        self.undoable = true;
        self
    }

    fn repeatable(mut self) -> Self {
        self.repeatable = true;
        self
    }

    fn failing(mut self) -> Self {
        self.fail_execute = true;
        self
    }

    fn failing_undo(mut self) -> Self {
        self.fail_undo = true;
        self
    }

    fn journaled(mut self, journal: &Arc<Mutex<Vec<String>>>) -> Self {
        self.journal = Some(Arc::clone(journal));
        self
    }

    fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }

    fn undone(&self) -> usize {
        self.undone.load(Ordering::SeqCst)
    }

    fn net(&self) -> i64 {
        self.net.load(Ordering::SeqCst)
    }

    fn modes(&self) -> Vec<ExecutionMode> {
        self.modes.lock().unwrap().clone()
    }

    fn note(&self, entry: String) {
        if let Some(journal) = &self.journal {
            journal.lock().unwrap().push(entry);
        }
    }
}

impl Unit<String> for CountingUnit {
    fn description(&self) -> &str {
        &self.description
    }

    fn is_undoable(&self) -> bool {
        self.undoable
    }

    fn is_repeatable(&self) -> bool {
        self.repeatable
    }

    fn execute(&self, argument: String, mode: ExecutionMode) -> UnitResult {
        self.executed.fetch_add(1, Ordering::SeqCst);
        self.modes.lock().unwrap().push(mode);
        self.note(format!("exec:{}", self.description));
        if self.fail_execute {
            return Err(UnitError::failed(format!("{} failed", self.description)));
        }
        self.net.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(argument);
        Ok(())
    }

    fn undo(&self) -> UnitResult {
        if !self.undoable {
            return Err(UnitError::NotUndoable {
                description: self.description.clone(),
            });
        }
        self.undone.fetch_add(1, Ordering::SeqCst);
        self.note(format!("undo:{}", self.description));
        if self.fail_undo {
            return Err(UnitError::failed(format!("{} undo failed", self.description)));
        }
        self.net.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn last_argument(&self) -> Option<String> {
        self.last.lock().unwrap().clone()
    }
}

fn arg(s: &str) -> String {
    s.to_string()
}

// ============================================================================
// History caps
// ============================================================================

#[test]
fn capped_context_holds_at_most_two_entries_per_sequence() {
    let service: UndoService = UndoService::new();
    service.set_maximum_undo_count(2, "key");

    let plain = Arc::new(CountingUnit::new("plain").repeatable());
    for _ in 0..5 {
        service.perform(&plain, arg("x"), "key").unwrap();
    }
    assert_eq!(service.unit_count(UnitKind::Repeatable, "key"), 2);
    assert_eq!(service.unit_count(UnitKind::Undoable, "key"), 0);

    let reversible = Arc::new(CountingUnit::new("reversible").undoable().repeatable());
    for _ in 0..5 {
        service.perform(&reversible, arg("y"), "key").unwrap();
    }
    assert_eq!(service.unit_count(UnitKind::Repeatable, "key"), 2);
    assert_eq!(service.unit_count(UnitKind::Undoable, "key"), 2);
    assert_eq!(plain.executed(), 5);
    assert_eq!(reversible.executed(), 5);
}

#[test]
fn lowering_the_cap_trims_existing_history() {
    let service: UndoService = UndoService::new();
    let unit = Arc::new(CountingUnit::new("u").undoable().repeatable());
    for _ in 0..6 {
        service.perform(&unit, arg("a"), "k").unwrap();
    }
    assert_eq!(service.unit_count(UnitKind::Undoable, "k"), 6);

    service.set_maximum_undo_count(3, "k");
    assert_eq!(service.unit_count(UnitKind::Undoable, "k"), 3);
    assert_eq!(service.unit_count(UnitKind::Repeatable, "k"), 3);

    for _ in 0..3 {
        assert_eq!(service.undo("k"), Ok(true));
    }
    assert_eq!(service.undo("k"), Ok(false));
    assert_eq!(unit.net(), 3);
}

// ============================================================================
// Undo / redo / repeat
// ============================================================================

#[test]
fn undo_then_redo_of_undoable_repeatable_unit() {
    let service: UndoService = UndoService::new();
    let u1 = Arc::new(CountingUnit::new("u1").undoable().repeatable());

    service.perform(&u1, arg("1"), "k").unwrap();
    assert_eq!(u1.net(), 1);

    assert_eq!(service.undo("k"), Ok(true));
    assert_eq!(u1.net(), 0);
    assert!(!service.can_undo("k"));
    assert!(service.can_redo("k"));
    assert!(!service.can_repeat("k"));

    assert_eq!(service.redo("k"), Ok(true));
    assert_eq!(u1.net(), 1);
    assert!(service.can_undo("k"));
    assert!(!service.can_redo("k"));
    assert!(service.can_repeat("k"));

    assert_eq!(
        u1.modes(),
        vec![ExecutionMode::FirstTime, ExecutionMode::Redo]
    );
    assert_eq!(u1.last_argument(), Some(arg("1")));
}

#[test]
fn round_trip_executes_twice_and_undoes_once() {
    let service: UndoService = UndoService::new();
    let unit = Arc::new(CountingUnit::new("u").undoable());

    service.perform(&unit, arg("a"), ContextId::Global).unwrap();
    service.undo(ContextId::Global).unwrap();
    service.redo(ContextId::Global).unwrap();

    assert_eq!(unit.executed(), 2);
    assert_eq!(unit.undone(), 1);
    assert_eq!(unit.net(), 1);
}

#[test]
fn repeat_reruns_latest_repeatable_in_repeat_mode() {
    let service: UndoService = UndoService::new();
    let first = Arc::new(CountingUnit::new("first").repeatable());
    let second = Arc::new(CountingUnit::new("second").undoable().repeatable());

    service.perform(&first, arg("a"), "k").unwrap();
    service.perform(&second, arg("b"), "k").unwrap();
    assert_eq!(service.repeat("k"), Ok(true));

    assert_eq!(first.executed(), 1);
    assert_eq!(
        second.modes(),
        vec![ExecutionMode::FirstTime, ExecutionMode::Repeat]
    );
    assert_eq!(service.unit_count(UnitKind::Undoable, "k"), 1);
    assert!(!service.can_redo("k"));
}

#[test]
fn non_undoable_perform_purges_undo_history() {
    let service: UndoService = UndoService::new();
    let reversible = Arc::new(CountingUnit::new("r").undoable());
    let plain = Arc::new(CountingUnit::new("p"));

    service.perform(&reversible, arg("1"), "k").unwrap();
    service.perform(&reversible, arg("2"), "k").unwrap();
    service.undo("k").unwrap();
    assert!(service.can_undo("k"));
    assert!(service.can_redo("k"));

    service.perform(&plain, arg("3"), "k").unwrap();
    assert!(!service.can_undo("k"));
    assert!(!service.can_redo("k"));
    assert!(!service.can_repeat("k"));
}

#[test]
fn failed_perform_is_not_recorded() {
    let service: UndoService = UndoService::new();
    let broken = Arc::new(CountingUnit::new("broken").undoable().repeatable().failing());

    let err = service.perform(&broken, arg("x"), "k").unwrap_err();
    assert_eq!(err, UnitError::failed("broken failed"));
    assert!(!service.can_undo("k"));
    assert!(!service.can_repeat("k"));
    assert_eq!(broken.last_argument(), None);
}

#[test]
fn contexts_are_independent() {
    let service: UndoService = UndoService::new();
    let unit = Arc::new(CountingUnit::new("u").undoable().repeatable());

    service.perform(&unit, arg("a"), "left").unwrap();
    service.perform(&unit, arg("b"), ContextId::Global).unwrap();
    service.undo("left").unwrap();

    assert!(!service.can_undo("left"));
    assert!(service.can_redo("left"));
    assert!(service.can_undo(ContextId::Global));
    assert!(!service.can_redo(ContextId::Global));
    assert!(!service.can_undo("right"));
    assert_eq!(service.context_count(), 3);
}

#[test]
fn descriptions_are_listed_most_recent_first() {
    let service: UndoService = UndoService::new();
    let a = Arc::new(CountingUnit::new("Insert row").undoable());
    let b = Arc::new(CountingUnit::new("Rename sheet").undoable());
    let c = Arc::new(CountingUnit::new("Delete column").undoable());

    service.perform(&a, arg("1"), "k").unwrap();
    service.perform(&b, arg("2"), "k").unwrap();
    service.perform(&c, arg("3"), "k").unwrap();
    service.undo("k").unwrap();

    assert_eq!(
        service.undo_descriptions(10, "k"),
        vec!["Rename sheet", "Insert row"]
    );
    assert_eq!(service.undo_descriptions(1, "k"), vec!["Rename sheet"]);
    assert_eq!(service.redo_descriptions(10, "k"), vec!["Delete column"]);
}

// ============================================================================
// Composites
// ============================================================================

#[test]
fn hundred_child_parallel_composite_runs_each_child_once() {
    let units: Vec<Arc<CountingUnit>> = (0..100)
        .map(|i| Arc::new(CountingUnit::new(&format!("child-{i}"))))
        .collect();
    let children = units
        .iter()
        .fold(ChildUnits::new(), |set, unit| set.with(unit, arg("c")));
    let composite = Arc::new(CompositeUnit::new("fan", children, true));

    let service: UndoService = UndoService::new();
    service.perform(&composite, arg("whole"), ContextId::Global).unwrap();

    assert!(units.iter().all(|u| u.executed() == 1));
    assert_eq!(composite.last_argument(), Some(arg("whole")));
}

#[test]
fn sequential_undoable_composite_rolls_back_on_failure() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let c1 = Arc::new(CountingUnit::new("c1").undoable().journaled(&journal));
    let c2 = Arc::new(CountingUnit::new("c2").undoable().failing().journaled(&journal));
    let c3 = Arc::new(CountingUnit::new("c3").undoable().journaled(&journal));
    let children = ChildUnits::new()
        .with(&c1, arg("1"))
        .with(&c2, arg("2"))
        .with(&c3, arg("3"));
    let composite = Arc::new(CompositeUndoableUnit::new("batch", children, false));

    let service: UndoService = UndoService::new();
    let err = service.perform(&composite, arg("b"), "k").unwrap_err();

    assert_eq!(err, UnitError::failed("c2 failed"));
    assert_eq!(
        *journal.lock().unwrap(),
        vec!["exec:c1", "exec:c2", "undo:c1"]
    );
    assert_eq!(c1.net(), 0);
    assert_eq!(c3.executed(), 0);
    assert!(!service.can_undo("k"));
}

#[test]
fn parallel_undoable_composite_with_one_failure() {
    let units: Vec<Arc<CountingUnit>> = (0..8)
        .map(|i| {
            let unit = CountingUnit::new(&format!("c{i}")).undoable();
            Arc::new(if i == 5 { unit.failing() } else { unit })
        })
        .collect();
    let children = units
        .iter()
        .fold(ChildUnits::new(), |set, unit| set.with(unit, arg("x")));
    let composite = Arc::new(CompositeUndoableUnit::new("fan", children, true));

    let service: UndoService = UndoService::new();
    let err = service.perform(&composite, arg("x"), "k").unwrap_err();

    assert!(err.is_aggregate());
    assert_eq!(err.failures(), &[UnitError::failed("c5 failed")]);
    for (i, unit) in units.iter().enumerate() {
        assert_eq!(unit.executed(), 1, "child {i} ran once");
        assert_eq!(unit.net(), 0, "child {i} left no effect");
    }
    assert_eq!(units[5].undone(), 0);
    assert!(!service.can_undo("k"));
}

#[test]
fn rollback_failures_are_logged_not_raised() {
    let sink = MemoryLogSink::new();
    let stuck = Arc::new(CountingUnit::new("stuck").undoable().failing_undo());
    let broken = Arc::new(CountingUnit::new("broken").undoable().failing());
    let children = ChildUnits::new()
        .with(&stuck, arg("1"))
        .with(&broken, arg("2"));
    let composite = Arc::new(
        CompositeUndoableUnit::new("batch", children, false).with_log_sink(Arc::new(sink.clone())),
    );

    let service: UndoService = UndoService::new();
    let err = service.perform(&composite, arg("b"), "k").unwrap_err();

    assert_eq!(err, UnitError::failed("broken failed"));
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].message.contains("stuck"));
    assert_eq!(records[0].error, Some(UnitError::failed("stuck undo failed")));
}

#[test]
fn undoable_composite_through_service() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let a = Arc::new(CountingUnit::new("a").undoable().repeatable().journaled(&journal));
    let b = Arc::new(CountingUnit::new("b").undoable().repeatable().journaled(&journal));
    let children = ChildUnits::new().with(&a, arg("1")).with(&b, arg("2"));
    let composite = Arc::new(CompositeUndoableUnit::new("pair", children, false));
    assert!(composite.is_repeatable());

    let service: UndoService = UndoService::new();
    service.perform(&composite, arg("p"), "k").unwrap();
    assert!(service.can_repeat("k"));
    service.undo("k").unwrap();
    service.redo("k").unwrap();

    assert_eq!(
        *journal.lock().unwrap(),
        vec!["exec:a", "exec:b", "undo:a", "undo:b", "exec:a", "exec:b"]
    );
    assert_eq!(a.modes().last(), Some(&ExecutionMode::Redo));
    assert_eq!(a.last_argument(), Some(arg("1")));
    assert_eq!(composite.last_argument(), Some(arg("p")));
}

#[test]
fn non_undoable_composite_cannot_be_undone() {
    let a = Arc::new(CountingUnit::new("a").undoable());
    let composite = Arc::new(CompositeUnit::new(
        "plain",
        ChildUnits::new().with(&a, arg("1")),
        false,
    ));

    let service: UndoService = UndoService::new();
    service.perform(&composite, arg("p"), "k").unwrap();
    assert!(!service.can_undo("k"));
    assert!(!service.can_repeat("k"));
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn independent_contexts_from_many_threads() {
    let service: UndoService<usize> = UndoService::new();
    let units: Vec<Arc<CountingUnit>> = (0..8)
        .map(|i| Arc::new(CountingUnit::new(&format!("t{i}")).undoable().repeatable()))
        .collect();

    std::thread::scope(|s| {
        for (ctx, unit) in units.iter().enumerate() {
            let service = &service;
            s.spawn(move || {
                for step in 0..50 {
                    service.perform(unit, format!("{step}"), ctx).unwrap();
                }
                for _ in 0..20 {
                    assert_eq!(service.undo(ctx), Ok(true));
                }
                service.repeat(ctx).unwrap();
            });
        }
    });

    for (ctx, unit) in units.iter().enumerate() {
        assert_eq!(service.unit_count(UnitKind::Undoable, ctx), 30);
        assert_eq!(service.unit_count(UnitKind::Redoable, ctx), 20);
        assert_eq!(unit.net(), 31);
    }
    assert_eq!(service.context_count(), 8);
}

#[test]
fn shared_context_serializes_callers() {
    let service: UndoService = UndoService::new();
    let unit = Arc::new(CountingUnit::new("shared").undoable());

    std::thread::scope(|s| {
        for _ in 0..4 {
            let service = &service;
            let unit = &unit;
            s.spawn(move || {
                for _ in 0..25 {
                    service.perform(unit, arg("x"), "shared").unwrap();
                }
            });
        }
    });

    assert_eq!(service.unit_count(UnitKind::Undoable, "shared"), 100);
    assert_eq!(unit.executed(), 100);
}
