#![forbid(unsafe_code)]

//! Rewind Runtime
//!
//! A reversible-operation engine. Hosts describe their actions as units,
//! run them through an [`UndoService`], and get undo, redo and repeat per
//! independent context.
//!
//! # Key Components
//!
//! - [`Unit`] - Contract for a named action that runs with an argument
//! - [`SimpleUnit`] / [`UndoableUnit`] - Closure-backed units
//! - [`CompositeUnit`] / [`CompositeUndoableUnit`] - Groups of child units,
//!   run sequentially or in parallel
//! - [`UndoService`] - Per-context undo, redo and repeat history
//! - [`UndoConfig`] - History caps as data, loadable from TOML or JSON with
//!   the `config` feature
//!
//! # Logging
//! Engine events are emitted through `tracing` under the `rewind.undo`
//! target. Failures suppressed during rollback are logged at `WARN`; history
//! transitions are logged at `DEBUG` and evictions at `TRACE`.

pub mod config;
pub mod undo;

pub use config::{UndoConfig, UndoConfigError};
pub use undo::{
    ChildUnits, CompositeUndoableUnit, CompositeUnit, ContextId, ExecutionMode, HistoryConfig,
    LogSink, MemoryLogSink, SimpleUnit, UndoService, UndoableUnit, Unit, UnitError, UnitKind,
    UnitResult,
};
