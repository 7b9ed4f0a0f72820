use crate::context;
use crate::error::Error;
use crate::task::Checkpoint;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Suspends the current task once, letting every task that is already ready
/// run before it resumes.
///
/// The task goes to the back of the ready queue. Yielding is a suspension
/// point, so it also observes cancellation.
pub fn yield_now() -> YieldNow {
    YieldNow::new()
}

#[derive(Debug, Default, Clone, Copy)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct YieldNow {
    yielded: bool,
}

impl YieldNow {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Future for YieldNow {
    type Output = Result<(), Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match context::checkpoint() {
            Checkpoint::Proceed => {}
            Checkpoint::Interrupt => return Poll::Ready(Err(Error::Cancelled)),
            Checkpoint::Park => return Poll::Pending,
        }

        if std::mem::replace(&mut self.yielded, true) {
            return Poll::Ready(Ok(()));
        }

        // Requeued behind everything already ready.
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate as spindle;
    use crate::Scope;
    use anyhow::Result;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[spindle::test]
    async fn test_yield_lets_ready_tasks_run(scope: Scope) -> Result<()> {
        let log = Rc::new(RefCell::new(Vec::new()));

        for i in 0..3 {
            let log = Rc::clone(&log);
            scope.launch(move |_| async move {
                log.borrow_mut().push(i);
                Ok::<_, Error>(())
            });
        }

        assert!(log.borrow().is_empty());
        yield_now().await?;
        assert_eq!(*log.borrow(), [0, 1, 2]);
        Ok(())
    }

    #[spindle::test]
    async fn test_yield_polls_task_again(scope: Scope) -> Result<()> {
        let job = scope.launch(|_| async {
            for _ in 0..3 {
                yield_now().await?;
            }
            Ok::<_, Error>(())
        });
        job.join().await?;

        let polls = scope
            .with_scheduler(|s| {
                s.tracker
                    .poll_order()
                    .into_iter()
                    .filter(|id| *id == job.id())
                    .count()
            })
            .unwrap_or_default();

        // Initial poll plus one per yield.
        assert_eq!(polls, 4);
        Ok(())
    }
}
