#![forbid(unsafe_code)]

//! Per-context bounded history for undo, redo and repeat.
//!
//! Every context owns three sequences, each ordered most-recent-last:
//!
//! ```text
//! perform(u3)            undo()                 perform(u4)
//! ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐
//! │ undo:   [u1 u2 u3]│   │ undo:   [u1 u2]  │   │ undo:   [u1 u2 u4]│
//! │ redo:   []        │   │ redo:   [u3]     │   │ redo:   []        │
//! │ repeat: [u1 u3]   │   │ repeat: [u1]     │   │ repeat: [u1 u4]   │
//! └──────────────────┘   └──────────────────┘   └──────────────────┘
//! ```
//!
//! # Invariants
//!
//! 1. No sequence ever holds more than `max_count` entries; inserting past
//!    the cap evicts the oldest entry of that sequence
//! 2. Lowering `max_count` trims every sequence immediately
//! 3. Contexts are created on first touch and live as long as the store
//!
//! # Memory Model
//!
//! Sequences are `VecDeque`s so eviction from the front is O(1). Entries are
//! shared [`UnitHandle`]s; a unit is released once no sequence refers to it.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use super::log::LOG_TARGET;
use super::unit::UnitHandle;

/// Configuration for a context's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
pub struct HistoryConfig {
    /// Maximum number of entries per sequence.
    pub max_count: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl HistoryConfig {
    /// Create a configuration with the given cap.
    #[must_use]
    pub fn new(max_count: usize) -> Self {
        Self { max_count }
    }

    /// Create a configuration without a practical cap.
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            max_count: usize::MAX,
        }
    }

    /// Set the cap.
    #[must_use]
    pub fn with_max_count(mut self, max_count: usize) -> Self {
        self.max_count = max_count;
        self
    }
}

/// Which history sequence to inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(rename_all = "snake_case"))]
pub enum UnitKind {
    /// Units that can be undone.
    Undoable,
    /// Units that can be redone.
    Redoable,
    /// Units that can be repeated.
    Repeatable,
}

/// Identifier of an independent history domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ContextId<K> {
    /// The context shared by every caller that passes no key.
    #[default]
    Global,
    /// A context identified by a caller-chosen key.
    Keyed(K),
}

impl<K> ContextId<K> {
    /// Create a keyed context identifier.
    pub fn keyed(key: K) -> Self {
        Self::Keyed(key)
    }

    /// Map `None` to the global context.
    pub fn from_option(key: Option<K>) -> Self {
        key.map_or(Self::Global, Self::Keyed)
    }

    /// Check whether this is the global context.
    #[must_use]
    pub fn is_global(&self) -> bool {
        matches!(self, Self::Global)
    }

    /// The key, if this is a keyed context.
    #[must_use]
    pub fn key(&self) -> Option<&K> {
        match self {
            Self::Global => None,
            Self::Keyed(key) => Some(key),
        }
    }
}

impl<K> From<K> for ContextId<K> {
    fn from(key: K) -> Self {
        Self::Keyed(key)
    }
}

impl From<&str> for ContextId<String> {
    fn from(key: &str) -> Self {
        Self::Keyed(key.to_string())
    }
}

impl<K: fmt::Display> fmt::Display for ContextId<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("<global>"),
            Self::Keyed(key) => write!(f, "{key}"),
        }
    }
}

/// Shared handle to a history entry.
pub type Entry = Arc<dyn UnitHandle>;

/// The three bounded sequences of one context.
pub struct UndoContext {
    /// Units available for undo (newest at back).
    undo: VecDeque<Entry>,
    /// Units available for redo (newest at back).
    redo: VecDeque<Entry>,
    /// Units available for repeat (newest at back).
    repeatable: VecDeque<Entry>,
    /// Cap applied to every sequence.
    max_count: usize,
}

impl fmt::Debug for UndoContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UndoContext")
            .field("undo_depth", &self.undo.len())
            .field("redo_depth", &self.redo.len())
            .field("repeatable_depth", &self.repeatable.len())
            .field("max_count", &self.max_count)
            .finish()
    }
}

impl Default for UndoContext {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}

impl UndoContext {
    /// Create an empty context.
    #[must_use]
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: VecDeque::new(),
            repeatable: VecDeque::new(),
            max_count: config.max_count,
        }
    }

    // ========================================================================
    // Core Operations
    // ========================================================================

    /// Push onto the undo sequence, evicting the oldest entry past the cap.
    pub fn push_undo(&mut self, unit: Entry) {
        push_bounded(&mut self.undo, unit, self.max_count, UnitKind::Undoable);
    }

    /// Push onto the redo sequence, evicting the oldest entry past the cap.
    pub fn push_redo(&mut self, unit: Entry) {
        push_bounded(&mut self.redo, unit, self.max_count, UnitKind::Redoable);
    }

    /// Push onto the repeatable sequence, evicting the oldest entry past the cap.
    pub fn push_repeatable(&mut self, unit: Entry) {
        push_bounded(
            &mut self.repeatable,
            unit,
            self.max_count,
            UnitKind::Repeatable,
        );
    }

    /// Remove and return the most recent undo entry.
    pub fn pop_undo(&mut self) -> Option<Entry> {
        self.undo.pop_back()
    }

    /// Remove and return the most recent redo entry.
    pub fn pop_redo(&mut self) -> Option<Entry> {
        self.redo.pop_back()
    }

    /// The most recently performed repeatable entry.
    #[must_use]
    pub fn last_repeatable(&self) -> Option<Entry> {
        self.repeatable.back().cloned()
    }

    /// Remove the most recent repeatable occurrence of `unit`.
    ///
    /// Returns `true` if an entry was removed.
    pub fn remove_repeatable(&mut self, unit: &Entry) -> bool {
        match self.repeatable.iter().rposition(|e| Arc::ptr_eq(e, unit)) {
            Some(index) => self.repeatable.remove(index).is_some(),
            None => false,
        }
    }

    /// Check if undo is available.
    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    /// Check if redo is available.
    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// Check if repeat is available.
    #[must_use]
    pub fn can_repeat(&self) -> bool {
        !self.repeatable.is_empty()
    }

    // ========================================================================
    // Info
    // ========================================================================

    /// Number of entries in the given sequence.
    #[must_use]
    pub fn count(&self, kind: UnitKind) -> usize {
        self.sequence(kind).len()
    }

    /// The cap applied to every sequence.
    #[must_use]
    pub fn max_count(&self) -> usize {
        self.max_count
    }

    /// Point-in-time copy of the repeatable sequence, oldest first.
    #[must_use]
    pub fn repeatable_units(&self) -> Vec<Entry> {
        self.repeatable.iter().cloned().collect()
    }

    /// Descriptions of entries in the given sequence (most recent first).
    pub fn descriptions(&self, kind: UnitKind, limit: usize) -> Vec<&str> {
        self.sequence(kind)
            .iter()
            .rev()
            .take(limit)
            .map(|e| e.description())
            .collect()
    }

    /// Description of the next unit to undo.
    #[must_use]
    pub fn next_undo_description(&self) -> Option<&str> {
        self.undo.back().map(|e| e.description())
    }

    /// Description of the next unit to redo.
    #[must_use]
    pub fn next_redo_description(&self) -> Option<&str> {
        self.redo.back().map(|e| e.description())
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Change the cap, trimming every sequence down to it right away.
    pub fn set_max_count(&mut self, max_count: usize) {
        self.max_count = max_count;
        trim(&mut self.undo, max_count, UnitKind::Undoable);
        trim(&mut self.redo, max_count, UnitKind::Redoable);
        trim(&mut self.repeatable, max_count, UnitKind::Repeatable);
    }

    /// Clear only the undo sequence.
    pub fn clear_undo(&mut self) {
        self.undo.clear();
    }

    /// Clear only the redo sequence.
    pub fn clear_redo(&mut self) {
        self.redo.clear();
    }

    /// Clear all three sequences.
    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
        self.repeatable.clear();
    }

    fn sequence(&self, kind: UnitKind) -> &VecDeque<Entry> {
        match kind {
            UnitKind::Undoable => &self.undo,
            UnitKind::Redoable => &self.redo,
            UnitKind::Repeatable => &self.repeatable,
        }
    }
}

fn push_bounded(sequence: &mut VecDeque<Entry>, unit: Entry, max_count: usize, kind: UnitKind) {
    sequence.push_back(unit);
    trim(sequence, max_count, kind);
}

fn trim(sequence: &mut VecDeque<Entry>, max_count: usize, kind: UnitKind) {
    while sequence.len() > max_count {
        if let Some(evicted) = sequence.pop_front() {
            tracing::trace!(
                target: LOG_TARGET,
                kind = ?kind,
                unit = %evicted.description(),
                "evicted oldest history entry"
            );
        }
    }
}

/// Lazily populated map of contexts.
///
/// The map itself is only locked long enough to look up or create a
/// context; callers then lock the context they got back. Operations on
/// different contexts never wait on each other.
pub struct HistoryStore<K> {
    config: HistoryConfig,
    contexts: Mutex<HashMap<ContextId<K>, Arc<Mutex<UndoContext>>>>,
}

impl<K> fmt::Debug for HistoryStore<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryStore")
            .field("config", &self.config)
            .field("contexts", &self.lock_map().len())
            .finish()
    }
}

impl<K> Default for HistoryStore<K> {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}

impl<K> HistoryStore<K> {
    /// Create an empty store. New contexts start from `config`.
    #[must_use]
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            config,
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// Configuration applied to newly created contexts.
    #[must_use]
    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Number of contexts created so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_map().len()
    }

    /// Check whether no context has been touched yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_map().is_empty()
    }

    fn lock_map(&self) -> MutexGuard<'_, HashMap<ContextId<K>, Arc<Mutex<UndoContext>>>> {
        self.contexts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<K: Eq + Hash> HistoryStore<K> {
    /// Get the context for `id`, creating it on first touch.
    pub fn context(&self, id: ContextId<K>) -> Arc<Mutex<UndoContext>> {
        let mut contexts = self.lock_map();
        Arc::clone(
            contexts
                .entry(id)
                .or_insert_with(|| Arc::new(Mutex::new(UndoContext::new(self.config)))),
        )
    }
}

/// Lock a context, recovering from poisoning.
pub fn lock_context(context: &Mutex<UndoContext>) -> MutexGuard<'_, UndoContext> {
    context.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// Tests
// ============================================================================
