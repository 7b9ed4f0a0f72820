use crate::context;
use crate::error::Error;
use crate::runtime::scheduler::{Scheduler, TaskFuture};
use crate::runtime::{Dispatcher, LaunchBuilder};
use crate::task::header::new_header;
use crate::task::{Deferred, Header, Id, Job, Termination, task_waker};
use futures::task::noop_waker;
use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

/// Structured-concurrency container handed to every task body.
///
/// A scope tracks the jobs launched into it until they are terminal and is
/// *complete* once none is left. The task owning a scope does not finish
/// before its scope is complete, so `block_on` only returns once the whole
/// tree is done.
///
/// Cloning is cheap: clones refer to the same scope.
#[derive(Clone)]
pub struct Scope {
    inner: Rc<ScopeInner>,
}

pub(crate) struct ScopeInner {
    scheduler: Weak<Scheduler>,

    /// Task whose body received this scope. Empty for the runtime's outermost
    /// scope.
    owner: Weak<Header>,

    /// Active children. Ids grow monotonically, so key order is launch order.
    children: RefCell<BTreeMap<Id, Job>>,

    cancelled: Cell<bool>,

    /// Set once the owning task is terminal.
    closed: Cell<bool>,

    dispatcher: Dispatcher,
}

impl Scope {
    pub(crate) fn new(scheduler: Weak<Scheduler>, owner: Weak<Header>, dispatcher: Dispatcher) -> Scope {
        Scope {
            inner: Rc::new(ScopeInner {
                scheduler,
                owner,
                children: RefCell::new(BTreeMap::new()),
                cancelled: Cell::new(false),
                closed: Cell::new(false),
                dispatcher,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<ScopeInner>) -> Scope {
        Scope { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ScopeInner> {
        Rc::downgrade(&self.inner)
    }

    /// Scope of a task launched into `self`.
    pub(crate) fn child_scope(&self, owner: Weak<Header>, dispatcher: Dispatcher) -> Scope {
        Scope::new(self.inner.scheduler.clone(), owner, dispatcher)
    }

    pub(crate) fn owner(&self) -> Option<Rc<Header>> {
        self.inner.owner.upgrade()
    }

    /// Scope of the task currently being polled, i.e. the one its body
    /// received.
    ///
    /// # Errors
    ///
    /// [`Error::NoRuntime`] when called outside of a task.
    pub fn current() -> Result<Scope, Error> {
        context::current_task()
            .map(|header| header.scope().clone())
            .ok_or(Error::NoRuntime)
    }

    /// Dispatcher used by jobs launched without an explicit one.
    pub fn dispatcher(&self) -> Dispatcher {
        self.inner.dispatcher
    }

    /// Id of the task this scope belongs to.
    pub fn task_id(&self) -> Option<Id> {
        self.owner().map(|owner| owner.id)
    }

    /// Launches a fire-and-forget task into this scope.
    ///
    /// The body receives the new task's own scope. It starts running once the
    /// current task reaches a suspension point.
    pub fn launch<F, Fut, E>(&self, body: F) -> Job
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result<(), E>> + 'static,
        E: Into<anyhow::Error> + 'static,
    {
        self.builder().launch(body)
    }

    /// Launches a task producing a value into this scope.
    pub fn async_<T, F, Fut, E>(&self, body: F) -> Deferred<T>
    where
        T: 'static,
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result<T, E>> + 'static,
        E: Into<anyhow::Error> + 'static,
    {
        self.builder().async_(body)
    }

    pub fn builder(&self) -> LaunchBuilder<'_> {
        LaunchBuilder::new(self)
    }

    /// Cancels every job currently tracked, depth-first. Jobs launched into a
    /// cancelled scope are cancelled before they run.
    pub fn cancel(&self) {
        if !self.inner.cancelled.replace(true) {
            tracing::debug!(
                scope.task = ?self.task_id(),
                children = self.active_children(),
                "scope cancelled"
            );
        }

        for job in self.children() {
            job.cancel();
        }
    }

    /// True once cancelled and every child is terminal.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.get() && self.is_complete()
    }

    /// True once every job launched into this scope is terminal.
    pub fn is_complete(&self) -> bool {
        self.inner.children.borrow().is_empty()
    }

    pub fn active_children(&self) -> usize {
        self.inner.children.borrow().len()
    }

    /// Active children in launch order.
    pub fn children(&self) -> Vec<Job> {
        self.inner.children.borrow().values().cloned().collect()
    }

    pub(crate) fn close(&self) {
        self.inner.closed.set(true);
    }

    pub(crate) fn release_child(&self, id: Id) {
        self.inner.children.borrow_mut().remove(&id);
    }

    pub(crate) fn spawn_task<M>(&self, name: Option<Cow<'static, str>>, dispatcher: Dispatcher, make: M) -> Job
    where
        M: FnOnce(Scope) -> TaskFuture,
    {
        let id = Id::next();
        let scheduler = self.inner.scheduler.upgrade();

        let waker = match &scheduler {
            Some(scheduler) => task_waker(id, scheduler.ready_queue().clone()),
            None => noop_waker(),
        };

        let header = new_header(id, name, dispatcher, waker, self);
        let job = Job::new(Rc::clone(&header));

        let Some(scheduler) = scheduler else {
            tracing::warn!(task.id = %id, "launch after the runtime shut down");
            header.set_terminal(Termination::Cancelled);
            return job;
        };

        if self.inner.cancelled.get() || self.inner.closed.get() {
            tracing::debug!(task.id = %id, "launch into a cancelled or finished scope");
            header.set_terminal(Termination::Cancelled);
            return job;
        }

        tracing::debug!(
            task.id = %id,
            task.name = ?header.name,
            %dispatcher,
            parent = ?self.task_id(),
            "launch"
        );

        self.inner.children.borrow_mut().insert(id, job.clone());
        let future = make(header.scope().clone());
        scheduler.register(header, future);

        job
    }

    #[cfg(test)]
    pub(crate) fn with_scheduler<R>(&self, f: impl FnOnce(&Scheduler) -> R) -> Option<R> {
        self.inner.scheduler.upgrade().map(|scheduler| f(&scheduler))
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("task_id", &self.task_id())
            .field("dispatcher", &self.inner.dispatcher)
            .field("cancelled", &self.inner.cancelled.get())
            .field("children", &self.active_children())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate as spindle;
    use crate::task::TaskState;
    use crate::time::sleep;
    use anyhow::Result;
    use std::time::Duration;

    #[spindle::test]
    async fn test_children_in_launch_order(scope: Scope) -> Result<()> {
        let jobs = (0..4)
            .map(|i| {
                scope.launch(move |_| async move {
                    sleep(Duration::from_millis(10 * (i + 1))).await?;
                    Ok::<_, Error>(())
                })
            })
            .collect::<Vec<_>>();

        assert_eq!(scope.children(), jobs);
        assert_eq!(scope.active_children(), 4);
        assert!(!scope.is_complete());

        jobs[0].join().await?;
        assert_eq!(scope.children(), jobs[1..]);
        Ok(())
    }

    #[spindle::test]
    async fn test_cancel_scope_cancels_tree(scope: Scope) -> Result<()> {
        let inner = Rc::new(RefCell::new(None));

        let slot = Rc::clone(&inner);
        let parent = scope.async_(move |scope| async move {
            let grandchild = scope.launch(|_| async {
                sleep(Duration::from_secs(60)).await?;
                Ok::<_, Error>(())
            });
            *slot.borrow_mut() = Some(grandchild);
            sleep(Duration::from_secs(60)).await?;
            Ok::<_, Error>(())
        });

        sleep(Duration::from_millis(1)).await?;
        scope.cancel();
        assert!(!scope.is_cancelled());

        assert!(matches!(parent.wait().await, Err(Error::Cancelled)));
        let grandchild = inner.borrow_mut().take().expect("grandchild launched");
        assert_eq!(grandchild.status(), TaskState::Cancelled);
        assert!(scope.is_cancelled());
        Ok(())
    }

    #[spindle::test]
    async fn test_current_scope_is_task_scope(scope: Scope) -> Result<()> {
        assert_eq!(Scope::current()?.task_id(), scope.task_id());

        let child = scope.async_(|scope| async move {
            Ok::<_, Error>(Scope::current()?.task_id() == scope.task_id())
        });
        assert!(child.await?);
        Ok(())
    }

    #[test]
    fn test_current_scope_outside_runtime() {
        assert!(matches!(Scope::current(), Err(Error::NoRuntime)));
    }

    #[spindle::test]
    async fn test_launch_into_cancelled_scope(scope: Scope) -> Result<()> {
        let ran = Rc::new(Cell::new(false));

        let nested = scope.async_(|scope| async move {
            Ok::<_, Error>(scope)
        });
        let nested = nested.wait().await?;
        nested.cancel();

        let flag = Rc::clone(&ran);
        let job = nested.launch(move |_| async move {
            flag.set(true);
            Ok::<_, Error>(())
        });

        assert!(job.is_cancelled());
        assert!(matches!(job.join().await, Err(Error::Cancelled)));
        assert!(!ran.get());
        Ok(())
    }
}
