use crate::context;
use crate::error::{Error, TaskFailure};
use crate::runtime::Dispatcher;
use crate::task::header::Header;
use crate::task::state::{Checkpoint, TaskState};
use crate::task::Id;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// A cancellable handle to a launched task.
///
/// Handles are cheap to clone and all clones observe the same task. Dropping
/// every handle does not cancel the task: it keeps running under its scope.
#[derive(Clone)]
pub struct Job {
    header: Rc<Header>,
}

impl Job {
    pub(crate) fn new(header: Rc<Header>) -> Self {
        Self { header }
    }

    pub(crate) fn header(&self) -> &Rc<Header> {
        &self.header
    }

    pub fn id(&self) -> Id {
        self.header.id
    }

    pub fn name(&self) -> Option<&str> {
        self.header.name.as_deref()
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.header.dispatcher
    }

    pub fn status(&self) -> TaskState {
        self.header.state()
    }

    pub fn is_active(&self) -> bool {
        self.status().is_active()
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn is_cancelled(&self) -> bool {
        self.status() == TaskState::Cancelled
    }

    /// The failure captured from the body, if the task failed.
    pub fn failure(&self) -> Option<TaskFailure> {
        self.header.failure()
    }

    /// Requests cooperative cancellation of the task and of every job launched
    /// in its scope.
    ///
    /// The task observes the request at its next suspension point, which
    /// returns [`Error::Cancelled`]. A task that has not been polled yet never
    /// runs. Cancelling a finished job is a no-op.
    pub fn cancel(&self) {
        self.header.cancel();
    }

    /// Waits for the task to reach a terminal state.
    ///
    /// Resolves to `Ok(())` if it completed, [`Error::Failed`] if its body
    /// failed and [`Error::Cancelled`] if it was cancelled.
    pub fn join(&self) -> Join {
        Join { job: self.clone() }
    }

    pub(crate) fn outcome(&self) -> Option<Result<(), Error>> {
        self.header.outcome()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.header.id)
            .field("name", &self.header.name)
            .field("status", &self.header.state())
            .finish()
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.header, &other.header)
    }
}

impl Eq for Job {}

/// Future returned by [`Job::join`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
#[derive(Debug)]
pub struct Join {
    job: Job,
}

impl Future for Join {
    type Output = Result<(), Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match context::checkpoint() {
            Checkpoint::Proceed => {}
            Checkpoint::Interrupt => return Poll::Ready(Err(Error::Cancelled)),
            Checkpoint::Park => return Poll::Pending,
        }

        if let Some(outcome) = self.job.outcome() {
            return Poll::Ready(outcome);
        }

        self.job.header.register_join_waker(cx.waker());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate as spindle;
    use crate::time::sleep;
    use anyhow::{Result, anyhow};
    use static_assertions::{assert_impl_all, assert_not_impl_any};
    use std::cell::Cell;
    use std::time::Duration;

    assert_impl_all!(Job: Clone, fmt::Debug, Eq);
    assert_not_impl_any!(Job: Send, Sync);

    #[spindle::test]
    async fn test_join_completed(scope: spindle::Scope) -> Result<()> {
        let job = scope.launch(|_| async {
            sleep(Duration::from_millis(10)).await?;
            Ok::<_, Error>(())
        });

        assert_eq!(job.status(), TaskState::Pending);
        job.join().await?;
        assert_eq!(job.status(), TaskState::Completed);
        assert!(job.failure().is_none());
        Ok(())
    }

    #[spindle::test]
    async fn test_join_failed_job(scope: spindle::Scope) -> Result<()> {
        let job = scope.launch(|_| async { Err::<(), _>(anyhow!("boom")) });

        let err = job.join().await.unwrap_err();
        let failure = job.failure().expect("failure recorded");

        assert_eq!(job.status(), TaskState::Failed);
        assert!(err.as_failure().is_some_and(|f| f.ptr_eq(&failure)));
        assert_eq!(failure.task_id(), job.id());
        Ok(())
    }

    #[spindle::test]
    async fn test_cancel_before_first_poll(scope: spindle::Scope) -> Result<()> {
        let ran = Rc::new(Cell::new(false));

        let flag = Rc::clone(&ran);
        let job = scope.launch(move |_| async move {
            flag.set(true);
            Ok::<_, Error>(())
        });
        job.cancel();

        assert!(matches!(job.join().await, Err(Error::Cancelled)));
        assert!(job.is_cancelled());
        assert!(!ran.get());
        Ok(())
    }

    #[spindle::test]
    async fn test_cancel_terminal_job_is_noop(scope: spindle::Scope) -> Result<()> {
        let job = scope.launch(|_| async { Ok::<_, Error>(()) });
        job.join().await?;

        job.cancel();
        job.cancel();
        assert_eq!(job.status(), TaskState::Completed);
        Ok(())
    }

    #[spindle::test]
    async fn test_job_metadata(scope: spindle::Scope) -> Result<()> {
        let job = scope
            .builder()
            .name("worker")
            .dispatcher(Dispatcher::Io)
            .launch(|_| async { Ok::<_, Error>(()) });

        assert_eq!(job.name(), Some("worker"));
        assert_eq!(job.dispatcher(), Dispatcher::Io);
        assert_eq!(job, job.clone());
        assert!(job.is_active());

        job.join().await?;
        assert!(job.is_finished());
        Ok(())
    }
}
