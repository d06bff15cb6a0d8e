#![forbid(unsafe_code)]

//! Composite units: a fixed group of child units executed together.
//!
//! Children are registered in a [`ChildUnits`] collection together with the
//! argument each one runs with. A composite executes its children either
//! sequentially, in registration order, or in parallel with one scoped worker
//! per child.
//!
//! # Execution Policy
//!
//! ```text
//!                 sequential                      parallel
//!   CompositeUnit          stop at first failure   run all, join, aggregate
//!   CompositeUndoableUnit  stop, roll back          run all, join, roll back
//!                          performed children      succeeded children,
//!                                                  aggregate
//! ```
//!
//! Rollback is best effort: a child whose undo fails is reported to the
//! composite's [`LogSink`] and the rollback carries on with the remaining
//! children. Rollback failures are never raised.
//!
//! # Invariants
//!
//! - Every child of a parallel composite runs exactly once per execution,
//!   regardless of sibling failures
//! - A composite is repeatable iff it has children and all of them are
//! - The composite's own argument only reaches its own hooks, never children

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ScopedJoinHandle};

use super::log::{LOG_TARGET, LogSink, default_sink};
use super::unit::{
    ArgumentSlot, BoundUnit, ExecuteFn, ExecutionMode, UndoFn, Unit, UnitError, UnitHandle,
    UnitResult,
};

// ============================================================================
// Child registry
// ============================================================================

/// Ordered mapping from child unit to the argument it runs with.
///
/// Each unit instance appears at most once. Adding a unit that is already
/// registered replaces its argument and keeps its original position.
#[derive(Default)]
pub struct ChildUnits {
    entries: Vec<Box<dyn UnitHandle>>,
}

impl fmt::Debug for ChildUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|c| c.description()))
            .finish()
    }
}

impl ChildUnits {
    /// Create an empty child set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `unit` to run with `argument`.
    pub fn add<C, U>(&mut self, unit: &Arc<U>, argument: C)
    where
        C: Clone + Send + Sync + 'static,
        U: Unit<C> + ?Sized + 'static,
    {
        let bound: Box<dyn UnitHandle> =
            Box::new(BoundUnit::<C, U>::with_argument(Arc::clone(unit), argument));
        let key = bound.unit_key();
        match self.entries.iter_mut().find(|c| c.unit_key() == key) {
            Some(existing) => *existing = bound,
            None => self.entries.push(bound),
        }
    }

    /// Builder form of [`ChildUnits::add`].
    #[must_use]
    pub fn with<C, U>(mut self, unit: &Arc<U>, argument: C) -> Self
    where
        C: Clone + Send + Sync + 'static,
        U: Unit<C> + ?Sized + 'static,
    {
        self.add(unit, argument);
        self
    }

    /// Number of registered children.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether no child is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Children in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &(dyn UnitHandle + 'static)> {
        self.entries.iter().map(Box::as_ref)
    }

    /// Descriptions of the children in registration order.
    pub fn descriptions(&self) -> Vec<&str> {
        self.iter().map(UnitHandle::description).collect()
    }

    fn all_repeatable(&self) -> bool {
        !self.entries.is_empty() && self.entries.iter().all(|c| c.is_repeatable())
    }
}

// ============================================================================
// Fan-out
// ============================================================================

/// Run `op` on every child concurrently and wait for all of them.
///
/// Results come back in registration order. A worker that panics is
/// reported as [`UnitError::Panicked`] for its child. A child whose worker
/// thread could not be spawned runs on the calling thread instead.
fn fan_out<F>(children: &ChildUnits, op: F) -> Vec<UnitResult>
where
    F: Fn(&dyn UnitHandle) -> UnitResult + Sync,
{
    let op = &op;
    std::thread::scope(|s| {
        let workers: Vec<_> = children
            .iter()
            .map(|child| {
                thread::Builder::new()
                    .spawn_scoped(s, move || op(child))
                    .map_err(|err| {
                        tracing::debug!(
                            target: LOG_TARGET,
                            unit = %child.description(),
                            error = %err,
                            "worker spawn failed, running child inline"
                        );
                    })
                    .ok()
            })
            .collect();

        workers
            .into_iter()
            .zip(children.iter())
            .map(|(worker, child)| settle(worker, child, op))
            .collect()
    })
}

/// Result of one fanned-out child: joined from its worker, or run inline
/// when no worker exists.
fn settle<F>(
    worker: Option<ScopedJoinHandle<'_, UnitResult>>,
    child: &dyn UnitHandle,
    op: &F,
) -> UnitResult
where
    F: Fn(&dyn UnitHandle) -> UnitResult,
{
    match worker {
        Some(worker) => worker
            .join()
            .unwrap_or_else(|payload| Err(panicked(child, payload.as_ref()))),
        None => guarded(child, op),
    }
}

/// Run `op` on `child`, turning a panic into [`UnitError::Panicked`].
fn guarded<F>(child: &dyn UnitHandle, op: F) -> UnitResult
where
    F: FnOnce(&dyn UnitHandle) -> UnitResult,
{
    panic::catch_unwind(AssertUnwindSafe(|| op(child)))
        .unwrap_or_else(|payload| Err(panicked(child, payload.as_ref())))
}

fn panicked(child: &dyn UnitHandle, payload: &(dyn Any + Send)) -> UnitError {
    UnitError::Panicked {
        description: child.description().to_string(),
        message: panic_message(payload),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn aggregate(description: &str, errors: Vec<UnitError>) -> UnitError {
    UnitError::Aggregate {
        description: description.to_string(),
        errors,
    }
}

// ============================================================================
// CompositeUnit
// ============================================================================

/// A composite without undo capability.
///
/// A sequential failure stops execution and leaves already executed
/// children as they are.
pub struct CompositeUnit<T> {
    description: String,
    children: ChildUnits,
    parallel: bool,
    repeatable: bool,
    hook: Option<ExecuteFn<T>>,
    last_argument: ArgumentSlot<T>,
}

impl<T> fmt::Debug for CompositeUnit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeUnit")
            .field("description", &self.description)
            .field("children", &self.children)
            .field("parallel", &self.parallel)
            .field("repeatable", &self.repeatable)
            .finish()
    }
}

impl<T: Clone> CompositeUnit<T> {
    /// Create a composite over `children`.
    pub fn new(description: impl Into<String>, children: ChildUnits, parallel: bool) -> Self {
        let repeatable = children.all_repeatable();
        Self {
            description: description.into(),
            children,
            parallel,
            repeatable,
            hook: None,
            last_argument: ArgumentSlot::new(),
        }
    }

    /// Run `hook` with the composite's own argument after every child
    /// succeeded.
    #[must_use]
    pub fn with_execute_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(T, ExecutionMode) -> UnitResult + Send + Sync + 'static,
    {
        self.hook = Some(Box::new(hook));
        self
    }

    /// The registered children.
    #[must_use]
    pub fn children(&self) -> &ChildUnits {
        &self.children
    }

    /// Whether children run concurrently.
    #[must_use]
    pub fn is_parallel(&self) -> bool {
        self.parallel
    }
}

impl<T: Clone + Send> Unit<T> for CompositeUnit<T> {
    fn description(&self) -> &str {
        &self.description
    }

    fn is_repeatable(&self) -> bool {
        self.repeatable
    }

    fn execute(&self, argument: T, mode: ExecutionMode) -> UnitResult {
        if self.parallel {
            let errors: Vec<UnitError> = fan_out(&self.children, |child| child.run(mode))
                .into_iter()
                .filter_map(Result::err)
                .collect();
            if !errors.is_empty() {
                return Err(aggregate(&self.description, errors));
            }
        } else {
            for child in self.children.iter() {
                guarded(child, |c| c.run(mode))?;
            }
        }

        if let Some(hook) = &self.hook {
            hook(argument.clone(), mode)?;
        }
        self.last_argument.record(argument);
        Ok(())
    }

    fn last_argument(&self) -> Option<T> {
        self.last_argument.get()
    }

    fn debug_name(&self) -> &'static str {
        "CompositeUnit"
    }
}

// ============================================================================
// CompositeUndoableUnit
// ============================================================================

/// A composite that rolls back its children on partial failure and can be
/// undone as a whole.
pub struct CompositeUndoableUnit<T> {
    description: String,
    children: ChildUnits,
    parallel: bool,
    repeatable: bool,
    execute_hook: Option<ExecuteFn<T>>,
    undo_hook: Option<UndoFn<T>>,
    log: Arc<dyn LogSink>,
    last_argument: ArgumentSlot<T>,
}

impl<T> fmt::Debug for CompositeUndoableUnit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeUndoableUnit")
            .field("description", &self.description)
            .field("children", &self.children)
            .field("parallel", &self.parallel)
            .field("repeatable", &self.repeatable)
            .finish()
    }
}

impl<T: Clone> CompositeUndoableUnit<T> {
    /// Create an undoable composite over `children`.
    pub fn new(description: impl Into<String>, children: ChildUnits, parallel: bool) -> Self {
        let repeatable = children.all_repeatable();
        Self {
            description: description.into(),
            children,
            parallel,
            repeatable,
            execute_hook: None,
            undo_hook: None,
            log: default_sink(),
            last_argument: ArgumentSlot::new(),
        }
    }

    /// Run `hook` with the composite's own argument after every child
    /// succeeded. A failing hook rolls back all children.
    #[must_use]
    pub fn with_execute_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(T, ExecutionMode) -> UnitResult + Send + Sync + 'static,
    {
        self.execute_hook = Some(Box::new(hook));
        self
    }

    /// Run `hook` with the last argument after the children were undone.
    #[must_use]
    pub fn with_undo_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(T) -> UnitResult + Send + Sync + 'static,
    {
        self.undo_hook = Some(Box::new(hook));
        self
    }

    /// Report suppressed rollback failures to `sink`.
    #[must_use]
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log = sink;
        self
    }

    /// The registered children.
    #[must_use]
    pub fn children(&self) -> &ChildUnits {
        &self.children
    }

    /// Whether children run concurrently.
    #[must_use]
    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// Undo `child`, logging instead of raising a failure.
    fn undo_quietly(&self, child: &dyn UnitHandle) {
        if let Err(err) = guarded(child, |c| c.undo()) {
            self.log.log(
                &format!(
                    "failed to undo '{}' while rolling back '{}'",
                    child.description(),
                    self.description
                ),
                Some(&err),
            );
        }
    }

    fn roll_back<'a>(&self, performed: impl IntoIterator<Item = &'a (dyn UnitHandle + 'static)>) {
        for child in performed {
            self.undo_quietly(child);
        }
    }

    fn execute_sequential(&self, mode: ExecutionMode) -> UnitResult {
        let mut performed = Vec::with_capacity(self.children.len());
        for child in self.children.iter() {
            if let Err(err) = guarded(child, |c| c.run(mode)) {
                self.roll_back(performed);
                return Err(err);
            }
            performed.push(child);
        }
        Ok(())
    }

    fn execute_parallel(&self, mode: ExecutionMode) -> UnitResult {
        let results = fan_out(&self.children, |child| child.run(mode));

        let mut succeeded = Vec::with_capacity(results.len());
        let mut errors = Vec::new();
        for (child, result) in self.children.iter().zip(results) {
            match result {
                Ok(()) => succeeded.push(child),
                Err(err) => errors.push(err),
            }
        }

        if errors.is_empty() {
            return Ok(());
        }
        self.roll_back(succeeded);
        Err(aggregate(&self.description, errors))
    }
}

impl<T: Clone + Send> Unit<T> for CompositeUndoableUnit<T> {
    fn description(&self) -> &str {
        &self.description
    }

    fn is_undoable(&self) -> bool {
        true
    }

    fn is_repeatable(&self) -> bool {
        self.repeatable
    }

    fn execute(&self, argument: T, mode: ExecutionMode) -> UnitResult {
        if self.parallel {
            self.execute_parallel(mode)?;
        } else {
            self.execute_sequential(mode)?;
        }

        if let Some(hook) = &self.execute_hook
            && let Err(err) = hook(argument.clone(), mode)
        {
            self.roll_back(self.children.iter());
            return Err(err);
        }
        self.last_argument.record(argument);
        Ok(())
    }

    fn undo(&self) -> UnitResult {
        let argument = self
            .last_argument
            .get()
            .ok_or_else(|| UnitError::NotPerformed {
                description: self.description.clone(),
            })?;

        if self.parallel {
            let results = fan_out(&self.children, |child| child.undo());
            for (child, result) in self.children.iter().zip(results) {
                if let Err(err) = result {
                    self.log.log(
                        &format!(
                            "failed to undo '{}' while undoing '{}'",
                            child.description(),
                            self.description
                        ),
                        Some(&err),
                    );
                }
            }
        } else {
            self.roll_back(self.children.iter());
        }

        match &self.undo_hook {
            Some(hook) => hook(argument),
            None => Ok(()),
        }
    }

    fn last_argument(&self) -> Option<T> {
        self.last_argument.get()
    }

    fn debug_name(&self) -> &'static str {
        "CompositeUndoableUnit"
    }
}

// ============================================================================
// Tests
// ============================================================================
