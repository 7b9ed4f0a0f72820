use crate::context;
use crate::error::Error;
use crate::task::state::{Checkpoint, TaskState};
use crate::task::{Id, Job};
use std::cell::OnceCell;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// A [`Job`] that produces a value.
///
/// The task writes its value exactly once, when its body returns. Every await
/// afterwards observes the same outcome: a clone of the memoized value, the
/// same [`TaskFailure`](crate::TaskFailure) or [`Error::Cancelled`]. The body
/// never runs twice.
pub struct Deferred<T> {
    job: Job,
    value: Rc<OnceCell<T>>,
}

impl<T> Deferred<T> {
    pub(crate) fn new(job: Job, value: Rc<OnceCell<T>>) -> Self {
        Self { job, value }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn id(&self) -> Id {
        self.job.id()
    }

    pub fn status(&self) -> TaskState {
        self.job.status()
    }

    pub fn is_finished(&self) -> bool {
        self.job.is_finished()
    }

    pub fn cancel(&self) {
        self.job.cancel();
    }

    /// Takes the value out of a finished task. Used by the blocking entry
    /// point, which holds the only handle on the root task.
    pub(crate) fn into_outcome(self) -> Option<Result<T, Error>> {
        match self.job.outcome()? {
            Ok(()) => {
                let value = Rc::try_unwrap(self.value).ok()?.into_inner()?;
                Some(Ok(value))
            }
            Err(Error::Failed(observed)) => {
                // Leave the caller holding the only reference to the error.
                drop(observed);
                let failure = self.job.header().take_failure()?;
                Some(Err(Error::Failed(failure)))
            }
            Err(err) => Some(Err(err)),
        }
    }
}

impl<T: Clone> Deferred<T> {
    /// Suspends until the task is terminal and returns its outcome.
    pub fn wait(&self) -> Await<T> {
        Await {
            deferred: self.clone(),
        }
    }

    /// Non-suspending peek at the memoized outcome, `None` while the task is
    /// active.
    pub fn try_outcome(&self) -> Option<Result<T, Error>> {
        let outcome = self.job.outcome()?;
        Some(outcome.and_then(|()| self.value.get().cloned().ok_or(Error::Cancelled)))
    }
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            job: self.job.clone(),
            value: Rc::clone(&self.value),
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("job", &self.job)
            .field("ready", &self.value.get().is_some())
            .finish()
    }
}

impl<T: Clone> IntoFuture for Deferred<T> {
    type Output = Result<T, Error>;
    type IntoFuture = Await<T>;

    fn into_future(self) -> Self::IntoFuture {
        Await { deferred: self }
    }
}

impl<T: Clone> IntoFuture for &Deferred<T> {
    type Output = Result<T, Error>;
    type IntoFuture = Await<T>;

    fn into_future(self) -> Self::IntoFuture {
        self.wait()
    }
}

/// Future returned by [`Deferred::wait`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
#[derive(Debug)]
pub struct Await<T> {
    deferred: Deferred<T>,
}

impl<T: Clone> Future for Await<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match context::checkpoint() {
            Checkpoint::Proceed => {}
            Checkpoint::Interrupt => return Poll::Ready(Err(Error::Cancelled)),
            Checkpoint::Park => return Poll::Pending,
        }

        if let Some(outcome) = self.deferred.try_outcome() {
            return Poll::Ready(outcome);
        }

        self.deferred.job.header().register_join_waker(cx.waker());
        Poll::Pending
    }
}
