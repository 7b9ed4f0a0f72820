use crate::error::TaskFailure;
use std::fmt;

/// Lifecycle of a task.
///
/// Every task starts `Pending`, alternates between `Running` and `Suspended`
/// while its body makes progress, and reaches exactly one terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Launched but not yet polled.
    Pending,

    /// Currently being polled by the scheduler.
    Running,

    /// Waiting at a suspension point, or waiting for its children after the
    /// body returned.
    Suspended,

    Completed,

    Failed,

    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Suspended => "suspended",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        };

        f.write_str(name)
    }
}

/// How a task body ended, decided when the body returns and applied once all
/// of the task's children are terminal.
#[derive(Debug, Clone)]
pub(crate) enum Termination {
    Completed,
    Failed(TaskFailure),
    Cancelled,
}

impl Termination {
    pub(crate) fn state(&self) -> TaskState {
        match self {
            Termination::Completed => TaskState::Completed,
            Termination::Failed(_) => TaskState::Failed,
            Termination::Cancelled => TaskState::Cancelled,
        }
    }
}

/// Result of consulting the cancellation flag at a suspension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Checkpoint {
    /// No cancellation requested, carry on.
    Proceed,

    /// Cancellation requested and not yet reported to the body: the
    /// suspension point returns `Err(Error::Cancelled)`.
    Interrupt,

    /// The body already saw the cancellation and tried to suspend again. The
    /// suspension point returns `Pending` without registering a waker and the
    /// scheduler drops the body.
    Park,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::pending(TaskState::Pending, false)]
    #[case::running(TaskState::Running, false)]
    #[case::suspended(TaskState::Suspended, false)]
    #[case::completed(TaskState::Completed, true)]
    #[case::failed(TaskState::Failed, true)]
    #[case::cancelled(TaskState::Cancelled, true)]
    fn test_terminal_states(#[case] state: TaskState, #[case] terminal: bool) {
        assert_eq!(state.is_terminal(), terminal);
        assert_eq!(state.is_active(), !terminal);
    }
}
