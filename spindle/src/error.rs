use crate::task::Id;
use std::fmt;
use std::sync::Arc;

/// Outcome signals surfaced by every suspension point and by the blocking
/// entry point.
///
/// End-of-stream on a [`Channel`](crate::Channel) is *not* an error: `recv`
/// reports it as `Ok(None)`.
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// The current task, or the task being awaited, was cancelled before it
    /// completed.
    #[error("task was cancelled")]
    Cancelled,

    /// A value was sent to a channel after it was closed.
    #[error("channel is closed")]
    ChannelClosed,

    /// The awaited task failed. Every observer receives the same failure.
    #[error(transparent)]
    Failed(#[from] TaskFailure),

    #[error("not running inside a spindle runtime")]
    NoRuntime,

    #[error("a spindle runtime is already active on this thread")]
    RuntimeActive,

    /// The driver ran out of ready tasks and pending timers before the root
    /// task finished.
    #[error("runtime stalled: {suspended} task(s) suspended with nothing left to wake them")]
    Stalled { suspended: usize },
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub fn is_channel_closed(&self) -> bool {
        matches!(self, Error::ChannelClosed)
    }

    pub fn as_failure(&self) -> Option<&TaskFailure> {
        match self {
            Error::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Returns true if an error escaping a task body means the task was cancelled
/// rather than failed, e.g. the body propagated `Error::Cancelled` with `?`.
pub(crate) fn is_cancellation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<Error>().is_some_and(Error::is_cancelled)
}

/// The failure captured from a task body.
///
/// Cloning is cheap and every clone shares the same underlying error, see
/// [`TaskFailure::ptr_eq`].
#[derive(Clone)]
pub struct TaskFailure {
    task_id: Id,
    source: Arc<anyhow::Error>,
}

impl TaskFailure {
    pub(crate) fn new(task_id: Id, source: anyhow::Error) -> Self {
        Self {
            task_id,
            source: Arc::new(source),
        }
    }

    /// Id of the task whose body failed.
    pub fn task_id(&self) -> Id {
        self.task_id
    }

    pub fn error(&self) -> &anyhow::Error {
        &self.source
    }

    /// Returns true if both values were captured from the same failure.
    pub fn ptr_eq(&self, other: &TaskFailure) -> bool {
        Arc::ptr_eq(&self.source, &other.source)
    }

    /// Recovers the body's own error when no other observer holds it, so the
    /// caller of `block_on` can downcast it.
    pub(crate) fn into_anyhow(self) -> anyhow::Error {
        let task_id = self.task_id;
        match Arc::try_unwrap(self.source) {
            Ok(err) => err,
            Err(source) => anyhow::Error::new(TaskFailure { task_id, source }),
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {} failed: {:#}", self.task_id, self.source)
    }
}

impl fmt::Debug for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFailure")
            .field("task_id", &self.task_id)
            .field("source", &self.source)
            .finish()
    }
}

impl std::error::Error for TaskFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let source: &(dyn std::error::Error + 'static) = (*self.source).as_ref();
        Some(source)
    }
}
