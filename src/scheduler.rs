//! Scheduler context: how deferred computations get executed
//!
//! Every cube carries a stack of scheduler overrides. The top of the stack
//! is the strategy merged into each materialization request; an empty stack
//! means the implicit synchronous default. Scoped overrides are pushed
//! through an RAII guard whose drop removes exactly its own entry, so scope
//! exit always restores whatever was current immediately before the scope
//! began, including a permanent override installed earlier, never a
//! hard-coded baseline. Permanent overrides are pushed with no guard and
//! persist until replaced.

use crate::chunked::execute::BlockExecutor;
use crate::errors::{Result, RuCubeError};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Execution strategy for resolving a deferred computation.
///
/// Either a named built-in strategy or an externally managed executor
/// passed through unchanged.
#[derive(Clone)]
pub enum SchedulerStrategy {
    /// Single-threaded, in-order execution (the default).
    Synchronous,
    /// The shared Rayon thread pool.
    Threads,
    /// A dedicated worker pool, sized by the `num_workers` option.
    Processes,
    /// An externally supplied execution backend.
    External(Arc<dyn BlockExecutor>),
}

impl SchedulerStrategy {
    /// The strategy name merged into materialization kwargs.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Synchronous => "synchronous",
            Self::Threads => "threads",
            Self::Processes => "processes",
            Self::External(executor) => executor.name(),
        }
    }

    /// Parse a named strategy, validating against the known set.
    ///
    /// # Errors
    ///
    /// Returns [`RuCubeError::UnknownScheduler`] for anything outside the
    /// known names. External executors are not named; they are passed as
    /// values.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "synchronous" => Ok(Self::Synchronous),
            "threads" => Ok(Self::Threads),
            "processes" => Ok(Self::Processes),
            other => Err(RuCubeError::UnknownScheduler {
                name: other.to_string(),
            }),
        }
    }
}

impl fmt::Debug for SchedulerStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Synchronous => write!(f, "Synchronous"),
            Self::Threads => write!(f, "Threads"),
            Self::Processes => write!(f, "Processes"),
            Self::External(executor) => write!(f, "External({})", executor.name()),
        }
    }
}

/// A strategy plus its open, strategy-defined options map.
#[derive(Debug, Clone)]
pub struct SchedulerSpec {
    pub strategy: SchedulerStrategy,
    pub options: HashMap<String, JsonValue>,
}

impl SchedulerSpec {
    /// The implicit default: synchronous with no options.
    #[must_use]
    pub fn synchronous() -> Self {
        Self {
            strategy: SchedulerStrategy::Synchronous,
            options: HashMap::new(),
        }
    }

    /// The shared thread pool strategy.
    #[must_use]
    pub fn threads() -> Self {
        Self {
            strategy: SchedulerStrategy::Threads,
            options: HashMap::new(),
        }
    }

    /// A dedicated worker pool with `num_workers` workers.
    #[must_use]
    pub fn processes(num_workers: usize) -> Self {
        let mut options = HashMap::new();
        options.insert("num_workers".to_string(), JsonValue::from(num_workers));
        Self {
            strategy: SchedulerStrategy::Processes,
            options,
        }
    }

    /// An externally supplied executor, passed through unchanged.
    #[must_use]
    pub fn external(executor: Arc<dyn BlockExecutor>) -> Self {
        Self {
            strategy: SchedulerStrategy::External(executor),
            options: HashMap::new(),
        }
    }

    /// Attach an arbitrary option. Options are strategy-defined and passed
    /// through opaquely; only `num_workers` is interpreted by the built-in
    /// `processes` strategy.
    #[must_use]
    pub fn with_option(mut self, key: &str, value: JsonValue) -> Self {
        self.options.insert(key.to_string(), value);
        self
    }

    /// The merged keyword view handed to materialization:
    /// `{"scheduler": <name>, ...options}`.
    #[must_use]
    pub fn kwargs(&self) -> HashMap<String, JsonValue> {
        let mut kwargs = self.options.clone();
        kwargs.insert(
            "scheduler".to_string(),
            JsonValue::from(self.strategy.name()),
        );
        kwargs
    }
}

struct StackEntry {
    id: u64,
    spec: SchedulerSpec,
}

/// The per-cube scheduler override stack.
pub struct SchedulerContext {
    stack: Mutex<Vec<StackEntry>>,
    next_id: AtomicU64,
}

impl Default for SchedulerContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerContext {
    /// An empty context: `current()` reports the synchronous default.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stack: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Push a scoped override. The returned guard removes exactly this
    /// entry when dropped, also under error unwinding.
    #[must_use]
    pub fn push(&self, spec: SchedulerSpec) -> SchedulerGuard<'_> {
        let id = self.push_entry(spec);
        SchedulerGuard { context: self, id }
    }

    /// Push a permanent override: current until replaced by a later push.
    pub fn push_permanent(&self, spec: SchedulerSpec) {
        self.push_entry(spec);
    }

    /// The current strategy and options: top of the stack, or the implicit
    /// synchronous default when no override is active.
    #[must_use]
    pub fn current(&self) -> SchedulerSpec {
        let stack = self.stack.lock().expect("scheduler stack poisoned");
        stack
            .last()
            .map_or_else(SchedulerSpec::synchronous, |entry| entry.spec.clone())
    }

    fn push_entry(&self, spec: SchedulerSpec) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut stack = self.stack.lock().expect("scheduler stack poisoned");
        stack.push(StackEntry { id, spec });
        id
    }

    fn remove(&self, id: u64) {
        let mut stack = self.stack.lock().expect("scheduler stack poisoned");
        if let Some(pos) = stack.iter().rposition(|entry| entry.id == id) {
            stack.remove(pos);
        }
    }
}

impl fmt::Debug for SchedulerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stack = self.stack.lock().expect("scheduler stack poisoned");
        f.debug_struct("SchedulerContext")
            .field("depth", &stack.len())
            .field("current", &stack.last().map(|e| e.spec.strategy.name()))
            .finish()
    }
}

/// RAII token for a scoped scheduler override.
///
/// Dropping the guard removes its entry from the stack, restoring whatever
/// was current immediately before the push.
#[must_use = "dropping the guard immediately would end the scheduler scope"]
pub struct SchedulerGuard<'a> {
    context: &'a SchedulerContext,
    id: u64,
}

impl Drop for SchedulerGuard<'_> {
    fn drop(&mut self) {
        self.context.remove(self.id);
    }
}

impl fmt::Debug for SchedulerGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerGuard").field("id", &self.id).finish()
    }
}
