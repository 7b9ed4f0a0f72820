//! Configuring and launching tasks into a [`Scope`].
//!
//! [`Scope::launch`] and [`Scope::async_`] cover the common case. The
//! [`LaunchBuilder`] returned by [`Scope::builder`] lets you name the task and
//! pick its [`Dispatcher`].
use crate::runtime::Scope;
use crate::task::{Deferred, Job};
use std::borrow::Cow;
use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;

/// Execution-context kind a task runs on.
///
/// All kinds share the single cooperative thread of the runtime; the kind only
/// changes *when* a new task first runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Dispatcher {
    /// Queued at the back of the ready queue.
    #[default]
    Default,

    /// Same queue as `Default`. The tag is kept on the job and in logs to mark
    /// work that talks to the outside world.
    Io,

    /// Polled immediately inside `launch`, in the caller's frame, up to its
    /// first suspension point. Scheduled normally afterwards.
    Unconfined,
}

impl fmt::Display for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dispatcher::Default => "default",
            Dispatcher::Io => "io",
            Dispatcher::Unconfined => "unconfined",
        };

        f.write_str(name)
    }
}

/// A builder for configuring and launching a new task.
///
/// Created by calling [`Scope::builder`].
///
/// # Example
///
/// ```no_run
/// use spindle::{Dispatcher, Error};
///
/// spindle::run_blocking(|scope| async move {
///     let job = scope
///         .builder()
///         .name("fetch")
///         .dispatcher(Dispatcher::Io)
///         .launch(|_| async { Ok::<_, Error>(()) });
///
///     job.join().await?;
///     Ok::<_, Error>(())
/// })
/// .unwrap();
/// ```
#[must_use = "a LaunchBuilder does nothing until `launch` or `async_` is called"]
pub struct LaunchBuilder<'a> {
    scope: &'a Scope,

    name: Option<Cow<'static, str>>,

    /// Inherited from the scope when unset.
    dispatcher: Option<Dispatcher>,
}

impl<'a> LaunchBuilder<'a> {
    pub(crate) fn new(scope: &'a Scope) -> Self {
        Self {
            scope,
            name: None,
            dispatcher: None,
        }
    }

    /// Name recorded on the job and in logs.
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Launches a fire-and-forget task. Its failure is recorded on the
    /// returned [`Job`] and does not affect siblings or the scope.
    pub fn launch<F, Fut, E>(self, body: F) -> Job
    where
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result<(), E>> + 'static,
        E: Into<anyhow::Error> + 'static,
    {
        let dispatcher = self.dispatcher.unwrap_or(self.scope.dispatcher());

        self.scope.spawn_task(self.name, dispatcher, move |scope| {
            let fut = body(scope);
            Box::pin(async move { fut.await.map_err(Into::<anyhow::Error>::into) })
        })
    }

    /// Launches a task producing a value, observable through the returned
    /// [`Deferred`]. The task starts eagerly, like [`launch`](Self::launch).
    pub fn async_<T, F, Fut, E>(self, body: F) -> Deferred<T>
    where
        T: 'static,
        F: FnOnce(Scope) -> Fut,
        Fut: Future<Output = Result<T, E>> + 'static,
        E: Into<anyhow::Error> + 'static,
    {
        let dispatcher = self.dispatcher.unwrap_or(self.scope.dispatcher());
        let value = Rc::new(OnceCell::new());

        let slot = Rc::clone(&value);
        let job = self.scope.spawn_task(self.name, dispatcher, move |scope| {
            let fut = body(scope);
            Box::pin(async move {
                let value = fut.await.map_err(Into::<anyhow::Error>::into)?;
                // Only the task itself writes its value, once.
                let _ = slot.set(value);
                Ok::<_, anyhow::Error>(())
            })
        });

        Deferred::new(job, value)
    }
}

impl fmt::Debug for LaunchBuilder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchBuilder")
            .field("name", &self.name)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate as spindle;
    use crate::Error;
    use crate::time::sleep;
    use crate::utils::scheduler::Call;
    use anyhow::Result;
    use std::cell::RefCell;
    use std::time::Duration;

    fn launched(scope: &Scope) -> Vec<Call> {
        scope
            .with_scheduler(|s| s.tracker.launches())
            .unwrap_or_default()
    }

    #[spindle::test]
    async fn test_dispatcher_inherited_from_scope(scope: Scope) -> Result<()> {
        let io = scope.builder().dispatcher(Dispatcher::Io).async_(|scope| async move {
            let nested = scope.launch(|_| async { Ok::<_, Error>(()) });
            Ok::<_, Error>(nested.dispatcher())
        });

        assert_eq!(io.wait().await?, Dispatcher::Io);
        assert_eq!(scope.launch(|_| async { Ok::<_, Error>(()) }).dispatcher(), Dispatcher::Default);

        let calls = launched(&scope);
        assert!(calls.contains(&Call::Launch {
            id: io.id(),
            dispatcher: Dispatcher::Io
        }));
        Ok(())
    }

    #[spindle::test]
    async fn test_unconfined_runs_until_first_suspension(scope: Scope) -> Result<()> {
        let log = Rc::new(RefCell::new(Vec::new()));

        let events = Rc::clone(&log);
        let job = scope
            .builder()
            .dispatcher(Dispatcher::Unconfined)
            .launch(move |_| async move {
                events.borrow_mut().push("child: before sleep");
                sleep(Duration::from_millis(1)).await?;
                events.borrow_mut().push("child: after sleep");
                Ok::<_, Error>(())
            });

        log.borrow_mut().push("parent: after launch");
        job.join().await?;

        assert_eq!(
            *log.borrow(),
            ["child: before sleep", "parent: after launch", "child: after sleep"]
        );
        Ok(())
    }

    #[spindle::test]
    async fn test_default_dispatcher_runs_later(scope: Scope) -> Result<()> {
        let log = Rc::new(RefCell::new(Vec::new()));

        let events = Rc::clone(&log);
        let job = scope.builder().name("deferred-start").launch(move |_| async move {
            events.borrow_mut().push("child");
            Ok::<_, Error>(())
        });

        log.borrow_mut().push("parent");
        job.join().await?;

        assert_eq!(*log.borrow(), ["parent", "child"]);
        assert_eq!(job.name(), Some("deferred-start"));
        Ok(())
    }
}
