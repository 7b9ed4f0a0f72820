use crate::context;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies a task. Unique across every runtime of the process, and
/// increasing in launch order.
///
/// Inside a task use [`task::id()`](crate::task::id()), from a handle use
/// [`Job::id()`](crate::task::Job::id()).
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct Id(NonZeroU64);

/// Id of the task being polled.
///
/// # Panics
///
/// Outside of a task. See [`try_id`] for the fallible version.
#[track_caller]
pub fn id() -> Id {
    try_id().unwrap_or_else(|| panic!("task::id() called outside of a task"))
}

/// Id of the task being polled, `None` outside of a task.
pub fn try_id() -> Option<Id> {
    context::current_task_id()
}

impl Id {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);

        // u64 does not wrap in practice.
        match NonZeroU64::new(NEXT.fetch_add(1, Ordering::Relaxed)) {
            Some(id) => Id(id),
            None => panic!("task ids exhausted"),
        }
    }

    pub fn as_u64(&self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
