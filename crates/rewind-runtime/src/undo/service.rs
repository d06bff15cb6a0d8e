#![forbid(unsafe_code)]

//! The undo engine.
//!
//! [`UndoService`] performs units and records them in per-context history so
//! they can later be undone, redone or repeated.
//!
//! # State Machine
//!
//! ```text
//!                  perform                undo
//!   NotPerformed ──────────► Performed ─────────► Undone
//!                                ▲                  │
//!                                └──────────────────┘
//!                                       redo
//! ```
//!
//! Repeat re-executes the latest repeatable unit without moving anything
//! between the undo and redo sequences.
//!
//! # Invariants
//!
//! 1. A unit whose execution failed never enters any sequence
//! 2. Performing any unit clears the context's redo sequence
//! 3. Performing a unit that is not undoable clears the undo sequence
//! 4. Undo moves the unit's latest repeatable entry out of the repeatable
//!    sequence; redo puts it back
//!
//! # Concurrency
//!
//! Each call locks the target context for its whole body, including the
//! unit's own execute or undo. Calls on different contexts run
//! independently. A unit must not call back into the service on the same
//! context from inside its own execute or undo; that call would wait on the
//! lock its caller holds.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use crate::config::UndoConfig;

use super::history::{
    ContextId, Entry, HistoryConfig, HistoryStore, UndoContext, UnitKind, lock_context,
};
use super::log::LOG_TARGET;
use super::unit::{BoundUnit, ExecutionMode, Unit, UnitError, UnitResult};

/// Engine that performs units and tracks their history per context.
pub struct UndoService<K = String> {
    store: HistoryStore<K>,
}

impl<K> fmt::Debug for UndoService<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UndoService")
            .field("store", &self.store)
            .finish()
    }
}

impl<K> Default for UndoService<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> UndoService<K> {
    /// Create a service whose contexts start unbounded.
    #[must_use]
    pub fn new() -> Self {
        Self::with_history_config(HistoryConfig::default())
    }

    /// Create a service whose contexts start from `config`.
    #[must_use]
    pub fn with_history_config(config: HistoryConfig) -> Self {
        Self {
            store: HistoryStore::new(config),
        }
    }

    /// Configuration applied to newly created contexts.
    #[must_use]
    pub fn history_config(&self) -> &HistoryConfig {
        self.store.config()
    }

    /// Number of contexts touched so far.
    #[must_use]
    pub fn context_count(&self) -> usize {
        self.store.len()
    }
}

impl UndoService<String> {
    /// Create a service from a loaded [`UndoConfig`].
    ///
    /// Per-context caps from the config are applied up front.
    #[must_use]
    pub fn with_config(config: &UndoConfig) -> Self {
        let service = Self::with_history_config(config.to_history_config());
        for (key, max_count) in &config.contexts {
            service.set_maximum_undo_count(*max_count, key.as_str());
        }
        service
    }
}

impl<K> UndoService<K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    // ========================================================================
    // Core Operations
    // ========================================================================

    /// Execute `unit` for the first time and record it.
    ///
    /// On failure the error is returned and history is left untouched.
    pub fn perform<T, U>(
        &self,
        unit: &Arc<U>,
        argument: T,
        context: impl Into<ContextId<K>>,
    ) -> UnitResult
    where
        T: Clone + Send + Sync + 'static,
        U: Unit<T> + ?Sized + 'static,
    {
        let id = context.into();
        let slot = self.store.context(id.clone());
        let mut history = lock_context(&slot);

        if let Err(err) = unit.execute(argument, ExecutionMode::FirstTime) {
            trace_failure(&id, unit.description(), "perform", &err);
            return Err(err);
        }

        let entry: Entry = Arc::new(BoundUnit::<T, U>::replaying(Arc::clone(unit)));
        if entry.is_undoable() {
            history.push_undo(Arc::clone(&entry));
        } else {
            history.clear_undo();
        }
        history.clear_redo();
        if entry.is_repeatable() {
            history.push_repeatable(Arc::clone(&entry));
        }

        trace_step(&id, &entry, ExecutionMode::FirstTime, "performed unit");
        Ok(())
    }

    /// Undo the most recent undoable unit.
    ///
    /// Returns `Ok(false)` if there was nothing to undo. If the unit's undo
    /// fails, the unit has already left the undo sequence and does not
    /// enter the redo sequence.
    pub fn undo(&self, context: impl Into<ContextId<K>>) -> Result<bool, UnitError> {
        let id = context.into();
        let slot = self.store.context(id.clone());
        let mut history = lock_context(&slot);

        let Some(entry) = history.pop_undo() else {
            return Ok(false);
        };
        if let Err(err) = entry.undo() {
            trace_failure(&id, entry.description(), "undo", &err);
            return Err(err);
        }

        history.remove_repeatable(&entry);
        tracing::debug!(
            target: LOG_TARGET,
            context = ?id,
            unit = %entry.description(),
            "undid unit"
        );
        history.push_redo(entry);
        Ok(true)
    }

    /// Re-execute the most recently undone unit with its last argument.
    ///
    /// Returns `Ok(false)` if there was nothing to redo. A failed redo
    /// leaves the unit out of both the undo and the redo sequence.
    pub fn redo(&self, context: impl Into<ContextId<K>>) -> Result<bool, UnitError> {
        let id = context.into();
        let slot = self.store.context(id.clone());
        let mut history = lock_context(&slot);

        let Some(entry) = history.pop_redo() else {
            return Ok(false);
        };
        if let Err(err) = entry.run(ExecutionMode::Redo) {
            trace_failure(&id, entry.description(), "redo", &err);
            return Err(err);
        }

        if entry.is_repeatable() {
            history.push_repeatable(Arc::clone(&entry));
        }
        trace_step(&id, &entry, ExecutionMode::Redo, "redid unit");
        history.push_undo(entry);
        Ok(true)
    }

    /// Re-execute the most recent repeatable unit with its last argument.
    ///
    /// Returns `Ok(false)` if there was nothing to repeat. The undo and redo
    /// sequences are never touched.
    pub fn repeat(&self, context: impl Into<ContextId<K>>) -> Result<bool, UnitError> {
        let id = context.into();
        let slot = self.store.context(id.clone());
        let mut history = lock_context(&slot);

        let Some(entry) = history.last_repeatable() else {
            return Ok(false);
        };
        if let Err(err) = entry.run(ExecutionMode::Repeat) {
            trace_failure(&id, entry.description(), "repeat", &err);
            return Err(err);
        }

        trace_step(&id, &entry, ExecutionMode::Repeat, "repeated unit");
        history.push_repeatable(entry);
        Ok(true)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Check if undo is available.
    pub fn can_undo(&self, context: impl Into<ContextId<K>>) -> bool {
        self.with_context(context, |history| history.can_undo())
    }

    /// Check if redo is available.
    pub fn can_redo(&self, context: impl Into<ContextId<K>>) -> bool {
        self.with_context(context, |history| history.can_redo())
    }

    /// Check if repeat is available.
    pub fn can_repeat(&self, context: impl Into<ContextId<K>>) -> bool {
        self.with_context(context, |history| history.can_repeat())
    }

    /// Point-in-time copy of the repeatable sequence, oldest first.
    pub fn repeatable_units(&self, context: impl Into<ContextId<K>>) -> Vec<Entry> {
        self.with_context(context, |history| history.repeatable_units())
    }

    /// Number of entries in the given sequence.
    pub fn unit_count(&self, kind: UnitKind, context: impl Into<ContextId<K>>) -> usize {
        self.with_context(context, |history| history.count(kind))
    }

    /// Descriptions of undoable units, most recent first.
    pub fn undo_descriptions(
        &self,
        limit: usize,
        context: impl Into<ContextId<K>>,
    ) -> Vec<String> {
        self.descriptions(UnitKind::Undoable, limit, context)
    }

    /// Descriptions of redoable units, most recent first.
    pub fn redo_descriptions(
        &self,
        limit: usize,
        context: impl Into<ContextId<K>>,
    ) -> Vec<String> {
        self.descriptions(UnitKind::Redoable, limit, context)
    }

    /// The cap currently applied to the context's sequences.
    pub fn maximum_undo_count(&self, context: impl Into<ContextId<K>>) -> usize {
        self.with_context(context, |history| history.max_count())
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Change the cap of one context. Existing sequences are trimmed to it
    /// immediately.
    pub fn set_maximum_undo_count(&self, max_count: usize, context: impl Into<ContextId<K>>) {
        self.with_context(context, |history| history.set_max_count(max_count));
    }

    /// Drop every entry of one context.
    pub fn clear(&self, context: impl Into<ContextId<K>>) {
        self.with_context(context, |history| history.clear());
    }

    fn descriptions(
        &self,
        kind: UnitKind,
        limit: usize,
        context: impl Into<ContextId<K>>,
    ) -> Vec<String> {
        self.with_context(context, |history| {
            history
                .descriptions(kind, limit)
                .into_iter()
                .map(str::to_string)
                .collect()
        })
    }

    fn with_context<R>(
        &self,
        context: impl Into<ContextId<K>>,
        f: impl FnOnce(&mut UndoContext) -> R,
    ) -> R {
        let slot = self.store.context(context.into());
        let mut history = lock_context(&slot);
        f(&mut history)
    }
}

fn trace_step<K: fmt::Debug>(id: &ContextId<K>, entry: &Entry, mode: ExecutionMode, msg: &str) {
    tracing::debug!(
        target: LOG_TARGET,
        context = ?id,
        unit = %entry.description(),
        mode = %mode,
        "{msg}"
    );
}

fn trace_failure<K: fmt::Debug>(id: &ContextId<K>, unit: &str, operation: &str, err: &UnitError) {
    tracing::debug!(
        target: LOG_TARGET,
        context = ?id,
        unit = %unit,
        operation = %operation,
        error = %err,
        "unit failed"
    );
}

// ============================================================================
// Tests
// ============================================================================
