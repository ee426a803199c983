//! Registry of in-flight cancellable operations that can be aborted in bulk.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::CancelError;
use crate::process::TerminalProcess;

pub type TaskId = u64;

/// An operation that can be told to stop.
pub trait CancellableTask: Send + Sync {
    /// Signal abort. Must tolerate being called after the task already
    /// stopped.
    fn abort(&self) -> Result<(), CancelError>;

    /// Terminate the task's live stream early. `None` when the task has none.
    fn terminate_stream(&self) -> Option<Result<(), CancelError>> {
        None
    }

    fn describe(&self) -> String {
        "task".to_string()
    }
}

/// Stock task: a cancellation token, plus the abort handle of a live stream
/// when there is one.
#[derive(Debug, Clone)]
pub struct TokenTask {
    token: CancellationToken,
    stream: Option<AbortHandle>,
    label: String,
}

impl TokenTask {
    pub fn new(label: impl Into<String>, token: CancellationToken) -> Self {
        Self {
            token,
            stream: None,
            label: label.into(),
        }
    }

    pub fn with_stream(mut self, stream: AbortHandle) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl CancellableTask for TokenTask {
    fn abort(&self) -> Result<(), CancelError> {
        self.token.cancel();
        Ok(())
    }

    fn terminate_stream(&self) -> Option<Result<(), CancelError>> {
        self.stream.as_ref().map(|stream| {
            stream.abort();
            Ok(())
        })
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

impl CancellableTask for TerminalProcess {
    /// Aborting a process that already finished is not an error.
    fn abort(&self) -> Result<(), CancelError> {
        TerminalProcess::abort(self);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("process {} `{}`", self.id(), self.command())
    }
}

/// What a `cancel_all` pass did.
#[derive(Debug, Default)]
pub struct CancelReport {
    /// Tasks whose abort was invoked.
    pub notified: usize,
    /// Per-task failures, keyed by task id. Never stop the pass.
    pub failures: Vec<(TaskId, CancelError)>,
}

impl CancelReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Explicitly constructed registry of cancellable tasks. Clones share the
/// same task set.
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    tasks: Arc<Mutex<BTreeMap<TaskId, Arc<dyn CancellableTask>>>>,
    next_id: Arc<AtomicU64>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<TaskId, Arc<dyn CancellableTask>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, task: Arc<dyn CancellableTask>) -> TaskId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            event = "termexec.cancel.task_registered",
            task_id = id,
            task = %task.describe(),
        );
        self.lock().insert(id, task);
        id
    }

    /// Remove a task. Returns false when it was not registered, e.g. because
    /// a `cancel_all` already took it.
    pub fn unregister(&self, id: TaskId) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Abort every registered task, terminate live streams, and empty the
    /// registry. A task that fails or panics does not stop the others.
    pub fn cancel_all(&self) -> CancelReport {
        let tasks = std::mem::take(&mut *self.lock());
        let mut report = CancelReport::default();
        if tasks.is_empty() {
            return report;
        }

        info!(event = "termexec.cancel.cancel_all_started", count = tasks.len());
        for (id, task) in tasks {
            report.notified += 1;
            match catch_unwind(AssertUnwindSafe(|| task.abort())) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => report.failures.push((id, e)),
                Err(_) => report.failures.push((id, CancelError::Panicked)),
            }
            match catch_unwind(AssertUnwindSafe(|| task.terminate_stream())) {
                Ok(None) | Ok(Some(Ok(()))) => {}
                Ok(Some(Err(e))) => report.failures.push((id, e)),
                Err(_) => report.failures.push((id, CancelError::Panicked)),
            }
        }

        for (id, e) in &report.failures {
            warn!(event = "termexec.cancel.task_failed", task_id = id, error = %e);
        }
        info!(
            event = "termexec.cancel.cancel_all_completed",
            notified = report.notified,
            failed = report.failures.len(),
        );
        report
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl std::fmt::Debug for CancellationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationRegistry")
            .field("tasks", &self.len())
            .finish()
    }
}
