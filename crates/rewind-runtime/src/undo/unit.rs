#![forbid(unsafe_code)]

//! Unit contract and the leaf unit implementations.
//!
//! A *unit* is one reversible or repeatable application action. Every unit
//! implements [`Unit<T>`], where `T` is the argument the action is performed
//! with. The engine keeps units behind [`Arc`] so that the caller and the
//! history can both refer to the same instance.
//!
//! # Invariants
//!
//! - `execute()` records its argument as the unit's last argument, but only
//!   when the execute behavior succeeded
//! - `undo()` always works from the last recorded argument
//! - `undo()` on a unit that is not undoable is a contract violation and
//!   returns [`UnitError::NotUndoable`]
//!
//! # Failure Modes
//!
//! - **Behavior failure**: the bound closure returns an error
//!   - Propagated unmodified to the caller
//! - **Replay before perform**: redo/repeat/undo with no recorded argument
//!   - Reported as [`UnitError::NotPerformed`]

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Why a unit's execute behavior is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(rename_all = "snake_case"))]
pub enum ExecutionMode {
    /// A fresh action performed through the engine.
    #[default]
    FirstTime,
    /// Replayed after having been undone.
    Redo,
    /// Re-executed with the same argument as a repeat.
    Repeat,
}

impl ExecutionMode {
    /// Stable lowercase name, used in log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FirstTime => "first_time",
            Self::Redo => "redo",
            Self::Repeat => "repeat",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of executing or undoing a unit.
pub type UnitResult = Result<(), UnitError>;

/// Errors raised by units and by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitError {
    /// The unit's own behavior failed.
    Failed(String),
    /// `undo()` was called on a unit without an inverse operation.
    NotUndoable {
        /// Description of the offending unit.
        description: String,
    },
    /// The unit was asked to replay or undo before it ever executed.
    NotPerformed {
        /// Description of the offending unit.
        description: String,
    },
    /// A parallel worker running the unit panicked.
    Panicked {
        /// Description of the unit whose worker panicked.
        description: String,
        /// Panic payload, if it was a string.
        message: String,
    },
    /// One or more children of a parallel composite failed.
    Aggregate {
        /// Description of the composite.
        description: String,
        /// Every child failure, in child registration order.
        errors: Vec<UnitError>,
    },
}

impl UnitError {
    /// Create a generic behavior failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Check whether this error bundles several child failures.
    #[must_use]
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Self::Aggregate { .. })
    }

    /// The individual failures carried by this error.
    ///
    /// For an aggregate this is the bundled child errors, otherwise it is
    /// the error itself.
    #[must_use]
    pub fn failures(&self) -> &[UnitError] {
        match self {
            Self::Aggregate { errors, .. } => errors,
            other => std::slice::from_ref(other),
        }
    }
}

impl fmt::Display for UnitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(msg) => write!(f, "{msg}"),
            Self::NotUndoable { description } => {
                write!(f, "unit '{description}' is not undoable")
            }
            Self::NotPerformed { description } => {
                write!(f, "unit '{description}' has not been performed")
            }
            Self::Panicked {
                description,
                message,
            } => write!(f, "unit '{description}' panicked: {message}"),
            Self::Aggregate {
                description,
                errors,
            } => {
                write!(f, "{} child unit(s) of '{description}' failed", errors.len())?;
                for (i, err) in errors.iter().enumerate() {
                    let sep = if i == 0 { ": " } else { "; " };
                    write!(f, "{sep}{err}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for UnitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Aggregate { errors, .. } => errors
                .first()
                .map(|e| e as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

/// Callback type for a unit's execute behavior.
pub type ExecuteFn<T> = Box<dyn Fn(T, ExecutionMode) -> UnitResult + Send + Sync>;
/// Callback type for a unit's undo behavior. Receives the last argument.
pub type UndoFn<T> = Box<dyn Fn(T) -> UnitResult + Send + Sync>;

/// A single reversible or repeatable operation.
///
/// Implement this directly for units with custom state, or use
/// [`SimpleUnit`] / [`UndoableUnit`] to bind closures.
pub trait Unit<T>: Send + Sync {
    /// User-facing label, e.g. "Delete row".
    fn description(&self) -> &str;

    /// Whether an inverse operation exists.
    fn is_undoable(&self) -> bool {
        false
    }

    /// Whether re-executing with the same argument is meaningful.
    fn is_repeatable(&self) -> bool {
        false
    }

    /// Run the execute behavior once and record `argument` on success.
    fn execute(&self, argument: T, mode: ExecutionMode) -> UnitResult;

    /// Run the inverse behavior with the last recorded argument.
    fn undo(&self) -> UnitResult {
        Err(UnitError::NotUndoable {
            description: self.description().to_string(),
        })
    }

    /// The argument of the most recent successful execution.
    fn last_argument(&self) -> Option<T>;

    /// Debug name of the unit type.
    fn debug_name(&self) -> &'static str {
        "Unit"
    }
}

/// Interior slot holding a unit's last argument.
pub(crate) struct ArgumentSlot<T> {
    value: Mutex<Option<T>>,
}

impl<T: Clone> ArgumentSlot<T> {
    pub(crate) fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }

    pub(crate) fn record(&self, argument: T) {
        *self.lock() = Some(argument);
    }

    pub(crate) fn get(&self) -> Option<T> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.value.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A unit that only executes.
pub struct SimpleUnit<T> {
    description: String,
    repeatable: bool,
    execute: ExecuteFn<T>,
    last_argument: ArgumentSlot<T>,
}

impl<T> fmt::Debug for SimpleUnit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleUnit")
            .field("description", &self.description)
            .field("repeatable", &self.repeatable)
            .finish()
    }
}

impl<T: Clone> SimpleUnit<T> {
    /// Create a unit bound to an execute behavior.
    pub fn new<F>(description: impl Into<String>, execute: F) -> Self
    where
        F: Fn(T, ExecutionMode) -> UnitResult + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            repeatable: false,
            execute: Box::new(execute),
            last_argument: ArgumentSlot::new(),
        }
    }

    /// Mark the unit as repeatable.
    #[must_use]
    pub fn with_repeatable(mut self, repeatable: bool) -> Self {
        self.repeatable = repeatable;
        self
    }
}

impl<T: Clone + Send> Unit<T> for SimpleUnit<T> {
    fn description(&self) -> &str {
        &self.description
    }

    fn is_repeatable(&self) -> bool {
        self.repeatable
    }

    fn execute(&self, argument: T, mode: ExecutionMode) -> UnitResult {
        (self.execute)(argument.clone(), mode)?;
        self.last_argument.record(argument);
        Ok(())
    }

    fn last_argument(&self) -> Option<T> {
        self.last_argument.get()
    }

    fn debug_name(&self) -> &'static str {
        "SimpleUnit"
    }
}

/// A unit with both an execute and an undo behavior.
pub struct UndoableUnit<T> {
    description: String,
    repeatable: bool,
    execute: ExecuteFn<T>,
    undo: UndoFn<T>,
    last_argument: ArgumentSlot<T>,
}

impl<T> fmt::Debug for UndoableUnit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UndoableUnit")
            .field("description", &self.description)
            .field("repeatable", &self.repeatable)
            .finish()
    }
}

impl<T: Clone> UndoableUnit<T> {
    /// Create a unit bound to an execute and an undo behavior.
    pub fn new<E, U>(description: impl Into<String>, execute: E, undo: U) -> Self
    where
        E: Fn(T, ExecutionMode) -> UnitResult + Send + Sync + 'static,
        U: Fn(T) -> UnitResult + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            repeatable: false,
            execute: Box::new(execute),
            undo: Box::new(undo),
            last_argument: ArgumentSlot::new(),
        }
    }

    /// Mark the unit as repeatable.
    #[must_use]
    pub fn with_repeatable(mut self, repeatable: bool) -> Self {
        self.repeatable = repeatable;
        self
    }
}

impl<T: Clone + Send> Unit<T> for UndoableUnit<T> {
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
        (self.execute)(argument.clone(), mode)?;
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
        (self.undo)(argument)
    }

    fn last_argument(&self) -> Option<T> {
        self.last_argument.get()
    }

    fn debug_name(&self) -> &'static str {
        "UndoableUnit"
    }
}

// ============================================================================
// Type-erased handles
// ============================================================================

/// Object-safe view of a unit with its argument already bound.
///
/// History sequences and composite children hold units of different
/// argument types, so they store `dyn UnitHandle` instead of `dyn Unit<T>`.
pub trait UnitHandle: Send + Sync {
    /// User-facing label of the underlying unit.
    fn description(&self) -> &str;

    /// Whether the underlying unit is undoable.
    fn is_undoable(&self) -> bool;

    /// Whether the underlying unit is repeatable.
    fn is_repeatable(&self) -> bool;

    /// Execute the underlying unit with the bound argument.
    fn run(&self, mode: ExecutionMode) -> UnitResult;

    /// Undo the underlying unit.
    fn undo(&self) -> UnitResult;

    /// Address of the underlying unit, used for identity checks.
    fn unit_key(&self) -> usize;
}

impl fmt::Debug for dyn UnitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitHandle")
            .field("description", &self.description())
            .field("undoable", &self.is_undoable())
            .field("repeatable", &self.is_repeatable())
            .finish()
    }
}

/// A unit paired with the argument it runs with.
///
/// A handle built with [`BoundUnit::with_argument`] always runs with that
/// argument (composite children). A handle built with
/// [`BoundUnit::replaying`] runs with the unit's last argument (history
/// entries).
pub struct BoundUnit<T, U: ?Sized> {
    unit: Arc<U>,
    argument: Option<T>,
}

impl<T, U> BoundUnit<T, U>
where
    U: Unit<T> + ?Sized,
{
    /// Bind a fixed argument.
    pub fn with_argument(unit: Arc<U>, argument: T) -> Self {
        Self {
            unit,
            argument: Some(argument),
        }
    }

    /// Replay whatever the unit last executed with.
    pub fn replaying(unit: Arc<U>) -> Self {
        Self {
            unit,
            argument: None,
        }
    }

    /// The underlying unit.
    #[must_use]
    pub fn unit(&self) -> &Arc<U> {
        &self.unit
    }
}

impl<T, U> UnitHandle for BoundUnit<T, U>
where
    T: Clone + Send + Sync,
    U: Unit<T> + ?Sized,
{
    fn description(&self) -> &str {
        self.unit.description()
    }

    fn is_undoable(&self) -> bool {
        self.unit.is_undoable()
    }

    fn is_repeatable(&self) -> bool {
        self.unit.is_repeatable()
    }

    fn run(&self, mode: ExecutionMode) -> UnitResult {
        let argument = match &self.argument {
            Some(argument) => argument.clone(),
            None => self
                .unit
                .last_argument()
                .ok_or_else(|| UnitError::NotPerformed {
                    description: self.unit.description().to_string(),
                })?,
        };
        self.unit.execute(argument, mode)
    }

    fn undo(&self) -> UnitResult {
        self.unit.undo()
    }

    fn unit_key(&self) -> usize {
        Arc::as_ptr(&self.unit).cast::<()>() as usize
    }
}

// ============================================================================
// Tests
// ============================================================================
