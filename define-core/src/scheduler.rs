//! Flush scheduling.
//!
//! A listener arms at most one flush per tick. Schedulers decide what a
//! tick is: [`ManualScheduler`] is an explicit single-writer queue drained
//! by [`ManualScheduler::run_tick`], [`TokioScheduler`] yields once on the
//! tokio runtime before flushing.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::{lock, DefineError, DefineResult};

/// A deferred flush.
pub type FlushTask = Box<dyn FnOnce() -> DefineResult<()> + Send>;

/// Runs flush tasks after the current tick.
pub trait Scheduler: Send + Sync {
    /// Enqueue `task` to run once control yields.
    fn schedule(&self, task: FlushTask);
}

/// Explicit tick queue.
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<VecDeque<FlushTask>>,
}

impl ManualScheduler {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting for the next tick.
    #[must_use]
    pub fn pending(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Run every task queued before this call.
    ///
    /// Tasks scheduled while the tick runs wait for the next one. Every task
    /// runs even if an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns the first flush error of the tick.
    pub fn run_tick(&self) -> DefineResult<usize> {
        let tasks: Vec<FlushTask> = lock(&self.queue).drain(..).collect();
        let count = tasks.len();
        let mut first_error = None;
        for task in tasks {
            if let Err(e) = task() {
                tracing::warn!("flush failed: {e}");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(count), Err)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, task: FlushTask) {
        lock(&self.queue).push_back(task);
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Flushes on a tokio runtime after one cooperative yield.
///
/// Tick coalescing is exact on a current-thread runtime, where mutations
/// made before the task yields are all visible to the flush.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
    errors: Option<mpsc::UnboundedSender<DefineError>>,
}

impl TokioScheduler {
    /// Schedule onto the given runtime.
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            errors: None,
        }
    }

    /// Schedule onto the runtime of the calling task, if any.
    #[must_use]
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    /// Forward flush failures to the returned receiver.
    #[must_use]
    pub fn with_error_channel(mut self) -> (Self, mpsc::UnboundedReceiver<DefineError>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.errors = Some(tx);
        (self, rx)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, task: FlushTask) {
        let errors = self.errors.clone();
        self.handle.spawn(async move {
            tokio::task::yield_now().await;
            if let Err(e) = task() {
                tracing::error!("flush failed: {e}");
                if let Some(errors) = errors {
                    if errors.send(e).is_err() {
                        tracing::trace!("flush error receiver dropped");
                    }
                }
            }
        });
    }
}
