use crate::task::Id;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashSet, VecDeque};
use std::time::Instant;

/// FIFO of runnable task ids.
///
/// This is the only piece of runtime state shared across threads: wakers may
/// fire from anywhere, so the queue sits behind a mutex and the driver parks on
/// the condition variable while waiting for the next deadline.
#[derive(Debug, Default)]
pub(crate) struct ReadyQueue {
    inner: Mutex<Inner>,
    unparked: Condvar,
}

#[derive(Debug, Default)]
struct Inner {
    queue: VecDeque<Id>,

    // A task is queued at most once at a time.
    queued: HashSet<Id>,
}

impl ReadyQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns false if the task was already queued.
    pub(crate) fn push(&self, id: Id) -> bool {
        let mut inner = self.inner.lock();
        if !inner.queued.insert(id) {
            return false;
        }

        inner.queue.push_back(id);
        drop(inner);

        self.unparked.notify_one();
        true
    }

    pub(crate) fn pop(&self) -> Option<Id> {
        let mut inner = self.inner.lock();
        let id = inner.queue.pop_front()?;
        inner.queued.remove(&id);
        Some(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Blocks the calling thread until a task is queued or `deadline` passes.
    /// Returns true if a task is ready.
    pub(crate) fn park_until(&self, deadline: Instant) -> bool {
        let mut inner = self.inner.lock();

        while inner.queue.is_empty() {
            if self.unparked.wait_until(&mut inner, deadline).timed_out() {
                break;
            }
        }

        !inner.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    assert_impl_all!(ReadyQueue: Send, Sync);

    #[test]
    fn test_fifo_order() {
        let queue = ReadyQueue::new();
        let ids = (0..4).map(|_| Id::next()).collect::<Vec<_>>();

        for id in &ids {
            assert!(queue.push(*id));
        }
        assert!(!queue.push(ids[0]));

        let popped = std::iter::from_fn(|| queue.pop()).collect::<Vec<_>>();
        assert_eq!(popped, ids);
    }

    #[test]
    fn test_park_times_out() {
        let queue = ReadyQueue::new();
        let start = Instant::now();

        assert!(!queue.park_until(start + Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_park_unparked_by_other_thread() {
        let queue = Arc::new(ReadyQueue::new());
        let id = Id::next();

        let remote = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            remote.push(id);
        });

        assert!(queue.park_until(Instant::now() + Duration::from_secs(10)));
        assert_eq!(queue.pop(), Some(id));
        assert!(handle.join().is_ok());
    }
}
