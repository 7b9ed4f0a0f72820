use crate::runtime::ReadyQueue;
use crate::task::Id;
use std::sync::Arc;
use std::task::{Wake, Waker};

/// Waker of a single task: waking it pushes the task id onto the ready queue
/// of the runtime that launched it.
///
/// Only the id and the queue are captured, so wakers may be cloned, stored by
/// foreign futures or sent to other threads without keeping the task alive.
struct TaskWaker {
    id: Id,
    ready: Arc<ReadyQueue>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if self.ready.push(self.id) {
            tracing::trace!(task.id = %self.id, "wake");
        }
    }
}

pub(crate) fn task_waker(id: Id, ready: Arc<ReadyQueue>) -> Waker {
    Waker::from(Arc::new(TaskWaker { id, ready }))
}
