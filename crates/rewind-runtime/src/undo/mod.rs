#![forbid(unsafe_code)]

//! Undo, redo and repeat for composable units of work.
//!
//! A *unit* is a named action that runs with an argument. Some units can be
//! reversed, some can be re-run with the argument they last ran with, and
//! composite units group children that run together.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                          UndoService<K>                           │
//! │                                                                   │
//! │   perform(unit, arg, ctx)                                         │
//! │        │                                                          │
//! │        ▼                                                          │
//! │   ┌─────────────┐   ┌──────────────────────────────────────────┐  │
//! │   │ Unit<T>     │   │ HistoryStore: ContextId<K> ─► UndoContext │  │
//! │   │  execute()  │   │                                          │  │
//! │   │  undo()     │   │  ┌──────────┐ undo() ┌──────────┐        │  │
//! │   └─────────────┘   │  │ undo     │ ─────► │ redo     │        │  │
//! │                     │  │ [u1..uN] │ ◄───── │ [..]     │        │  │
//! │                     │  └──────────┘ redo() └──────────┘        │  │
//! │                     │  ┌──────────────────┐                    │  │
//! │                     │  │ repeatable [..]  │ ◄─ repeat()        │  │
//! │                     │  └──────────────────┘                    │  │
//! │                     └──────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use rewind_runtime::undo::{ContextId, ExecutionMode, UndoService, UndoableUnit};
//!
//! let unit = Arc::new(UndoableUnit::new(
//!     "Insert row",
//!     |row: usize, _mode: ExecutionMode| table.insert(row),
//!     |row: usize| table.remove(row),
//! ));
//!
//! let service: UndoService = UndoService::new();
//! service.perform(&unit, 3, ContextId::Global)?;
//! service.undo(ContextId::Global)?;
//! service.redo("sheet-2")?; // nothing to redo there: Ok(false)
//! ```
//!
//! # Module Structure
//!
//! - [`unit`]: the `Unit` contract plus closure-backed units
//! - [`composite`]: sequential and parallel groups of child units
//! - [`history`]: bounded per-context undo/redo/repeat sequences
//! - [`service`]: the engine that ties units to history
//! - [`log`]: where suppressed rollback failures go
//!
//! # Design Notes
//!
//! ## Units Store Their Last Argument
//!
//! History entries do not copy arguments. Undo, redo and repeat replay the
//! argument the unit recorded on its last successful execution, so a unit
//! shared between contexts always replays its most recent argument.
//!
//! ## Concurrency
//!
//! Operations on different contexts run in parallel. Operations on one
//! context are serialized for their whole duration, including the unit's own
//! execute or undo. A unit must not call back into the service for the same
//! context it is running in.

pub mod composite;
pub mod history;
pub mod log;
pub mod service;
pub mod unit;

// Re-export commonly used types
pub use composite::{ChildUnits, CompositeUndoableUnit, CompositeUnit};
pub use history::{ContextId, HistoryConfig, HistoryStore, UndoContext, UnitKind};
pub use log::{LOG_TARGET, LogRecord, LogSink, MemoryLogSink, TracingLogSink, default_sink};
pub use service::UndoService;
pub use unit::{
    BoundUnit, ExecuteFn, ExecutionMode, SimpleUnit, UndoFn, UndoableUnit, Unit, UnitError,
    UnitHandle, UnitResult,
};
