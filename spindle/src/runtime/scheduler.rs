use crate::context;
use crate::error::{Error, TaskFailure};
use crate::runtime::ticker::{Ticker, TickerData, TickerEvents};
use crate::runtime::timer::{Clock, TimerKey, Timers};
use crate::runtime::{Dispatcher, ReadyQueue, RuntimeConfig};
use crate::task::{Header, Id, TaskState, Termination};
use crate::utils::scheduler::Call;
#[cfg(test)]
use crate::utils::scheduler::Tracker;
use anyhow::anyhow;
use futures::future::LocalBoxFuture;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

/// Type-erased task body. Bodies of `async_` tasks write their value into the
/// deferred's cell before resolving.
pub(crate) type TaskFuture = LocalBoxFuture<'static, anyhow::Result<()>>;

struct Slot {
    header: Rc<Header>,

    // `None` while the task is being polled.
    future: Option<TaskFuture>,
}

/// Single-threaded cooperative scheduler: owns every live task body, the
/// ready queue, the timers and the clock.
///
/// Scopes and sleepers only hold weak references to it, so it is dropped as
/// soon as `block_on` returns.
pub(crate) struct Scheduler {
    pub(crate) cfg: RuntimeConfig,

    /// Tasks whose body has not returned yet.
    tasks: RefCell<HashMap<Id, Slot>>,

    ready: Arc<ReadyQueue>,

    timers: RefCell<Timers>,

    clock: Clock,

    ticker: RefCell<Ticker>,

    policy: RefCell<EventLoopConfig>,

    #[cfg(test)]
    pub(crate) tracker: Tracker,
}

impl Scheduler {
    pub(crate) fn new(cfg: &RuntimeConfig) -> Rc<Self> {
        Rc::new(Self {
            cfg: cfg.clone(),
            tasks: RefCell::new(HashMap::new()),
            ready: Arc::new(ReadyQueue::new()),
            timers: RefCell::new(Timers::default()),
            clock: Clock::new(cfg.clock),
            ticker: RefCell::new(Ticker::new()),
            policy: RefCell::new(EventLoopConfig::from(cfg)),

            #[cfg(test)]
            tracker: Tracker::default(),
        })
    }

    // Journaled for tests only.
    #[inline(always)]
    fn track(&self, call: Call) {
        #[cfg(test)]
        self.tracker.record(call);
        #[cfg(not(test))]
        let _ = call;
    }

    pub(crate) fn ready_queue(&self) -> &Arc<ReadyQueue> {
        &self.ready
    }

    pub(crate) fn now(&self) -> Duration {
        self.clock.now()
    }

    pub(crate) fn add_timer(&self, deadline: Duration, waker: Waker) -> TimerKey {
        tracing::trace!(?deadline, "timer registered");
        self.timers.borrow_mut().insert(deadline, waker)
    }

    pub(crate) fn update_timer(&self, key: TimerKey, waker: &Waker) -> bool {
        self.timers.borrow_mut().update(key, waker)
    }

    pub(crate) fn remove_timer(&self, key: TimerKey) {
        self.timers.borrow_mut().remove(key);
    }

    /// Takes ownership of a freshly launched task body. Unconfined tasks are
    /// polled right away, in the caller's frame.
    pub(crate) fn register(&self, header: Rc<Header>, future: TaskFuture) {
        let id = header.id;
        let dispatcher = header.dispatcher;

        self.track(Call::Launch { id, dispatcher });
        self.tasks.borrow_mut().insert(
            id,
            Slot {
                header: Rc::clone(&header),
                future: Some(future),
            },
        );

        match dispatcher {
            Dispatcher::Unconfined => self.run_task(id),
            Dispatcher::Default | Dispatcher::Io => header.wake(),
        }
    }

    /// Drives tasks until `root` is terminal.
    pub(crate) fn drive(&self, root: &Header) -> Result<(), Error> {
        loop {
            while let Some(id) = self.ready.pop() {
                self.run_task(id);

                let events = self.tick();
                if events.contains(TickerEvents::FIRE_TIMERS) {
                    self.fire_timers();
                }
                if events.contains(TickerEvents::REPORT) {
                    self.report();
                }
            }

            if root.state().is_terminal() {
                return Ok(());
            }

            let next_deadline = self.timers.borrow().next_deadline();
            match (next_deadline, &self.clock) {
                (Some(deadline), Clock::Virtual(_)) => {
                    self.clock.advance_to(deadline);
                }
                (Some(deadline), Clock::Wall(_)) => {
                    self.ready.park_until(self.clock.instant_at(deadline));
                }
                (None, Clock::Virtual(_)) => return Err(self.stalled(root)),
                (None, Clock::Wall(_)) => {
                    let until = Instant::now() + self.cfg.stall_timeout;
                    if !self.ready.park_until(until) {
                        return Err(self.stalled(root));
                    }
                }
            }

            self.fire_timers();
        }
    }

    /// Drops every remaining body after the driver gave up on `root` and
    /// finishes the whole tree as cancelled, tasks waiting on children
    /// included.
    pub(crate) fn shutdown(&self, root: &Header) {
        root.cancel();

        let mut slots = self
            .tasks
            .borrow_mut()
            .drain()
            .map(|(_, slot)| slot)
            .collect::<Vec<_>>();

        // Children are launched after their parent: finishing them first lets
        // waiting owners complete through `complete`.
        slots.sort_by_key(|slot| std::cmp::Reverse(slot.header.id));

        let headers = slots
            .into_iter()
            .map(|Slot { header, future }| {
                drop(future);
                header
            })
            .collect::<Vec<_>>();

        for header in headers {
            tracing::debug!(task.id = %header.id, "task dropped on shutdown");
            self.complete(&header, Termination::Cancelled);
        }
    }

    fn tick(&self) -> TickerEvents {
        let timers = self.timers.borrow();
        let mut policy = self.policy.borrow_mut();
        self.ticker.borrow_mut().tick(&*timers, &mut *policy)
    }

    fn fire_timers(&self) {
        let now = self.clock.now();
        let expired = self.timers.borrow_mut().take_expired(now);

        if !expired.is_empty() {
            tracing::trace!(?now, count = expired.len(), "timers fired");
        }

        for waker in expired {
            waker.wake();
        }
    }

    fn report(&self) {
        tracing::debug!(
            tasks = self.tasks.borrow().len(),
            ready = self.ready.len(),
            timers = self.timers.borrow().len(),
            clock = ?self.clock.kind(),
            now = ?self.clock.now(),
            "scheduler report"
        );
    }

    fn stalled(&self, root: &Header) -> Error {
        let suspended = active_in_tree(root);
        tracing::warn!(suspended, "no runnable task and no pending timer");
        Error::Stalled { suspended }
    }

    fn take_future(&self, id: Id) -> Option<(Rc<Header>, TaskFuture)> {
        let mut tasks = self.tasks.borrow_mut();
        let slot = tasks.get_mut(&id)?;
        let future = slot.future.take()?;
        Some((Rc::clone(&slot.header), future))
    }

    fn restore_future(&self, id: Id, future: TaskFuture) {
        if let Some(slot) = self.tasks.borrow_mut().get_mut(&id) {
            slot.future = Some(future);
        }
    }

    /// Polls a task once. Stale ids (finished tasks, or a task already on the
    /// stack) are ignored.
    fn run_task(&self, id: Id) {
        let Some((header, mut future)) = self.take_future(id) else {
            return;
        };

        if header.state() == TaskState::Pending && header.is_cancel_requested() {
            drop(future);
            self.finish_body(&header, Termination::Cancelled);
            return;
        }

        header.set_state(TaskState::Running);
        self.track(Call::Poll { id });
        tracing::trace!(task.id = %id, "poll");

        let polled = {
            let _guard = context::enter_task(&header);
            let mut cx = Context::from_waker(header.waker());
            panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)))
        };

        match polled {
            // Suspending after a cancellation request ends the task.
            Ok(Poll::Pending) if header.is_cancel_requested() => {
                drop(future);
                self.finish_body(&header, Termination::Cancelled);
            }
            Ok(Poll::Pending) => {
                header.set_state(TaskState::Suspended);
                self.restore_future(id, future);
            }
            Ok(Poll::Ready(result)) => {
                drop(future);
                let termination = header.termination_for(result);
                self.finish_body(&header, termination);
            }
            Err(payload) => {
                drop(future);
                let message = panic_message(payload.as_ref());
                tracing::warn!(task.id = %id, panic = %message, "task panicked");

                let failure = TaskFailure::new(id, anyhow!("task panicked: {message}"));
                self.finish_body(&header, Termination::Failed(failure));
            }
        }
    }

    /// The body is gone. Finalize now, or once the last child is terminal.
    fn finish_body(&self, header: &Rc<Header>, termination: Termination) {
        self.tasks.borrow_mut().remove(&header.id);

        if !matches!(termination, Termination::Completed) {
            header.scope().cancel();
        }

        if header.scope().is_complete() {
            self.complete(header, termination);
        } else {
            tracing::trace!(
                task.id = %header.id,
                children = header.scope().active_children(),
                "body returned, waiting for children"
            );
            header.park(termination);
        }
    }

    fn complete(&self, header: &Rc<Header>, termination: Termination) {
        header.scope().close();
        header.set_terminal(termination);

        let state = header.state();
        tracing::debug!(task.id = %header.id, task.name = ?header.name, %state, "task terminated");
        self.track(Call::Terminate { id: header.id, state });

        let Some(parent) = header.parent_scope() else {
            return;
        };

        parent.release_child(header.id);
        if parent.is_complete()
            && let Some(owner) = parent.owner()
            && let Some(parked) = owner.take_parked()
        {
            self.complete(&owner, parked);
        }
    }
}

/// Non-terminal tasks in the tree under `header`, counting tasks whose body
/// returned but which still wait for children.
fn active_in_tree(header: &Header) -> usize {
    let own = usize::from(header.state().is_active());
    own + header
        .scope()
        .children()
        .iter()
        .map(|job| active_in_tree(job.header()))
        .sum::<usize>()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        String::from("<non-string panic payload>")
    }
}

#[derive(Debug, Clone)]
struct EventLoopConfig {
    // Policies
    timer_interval: u32,

    report_interval: u32,

    // Data
    has_timers: bool,
}

impl EventLoopConfig {
    #[inline(always)]
    fn should_fire_timers(&self, tick: u32) -> bool {
        self.has_timers && tick.is_multiple_of(self.timer_interval)
    }

    #[inline(always)]
    fn should_report(&self, tick: u32) -> bool {
        tick.is_multiple_of(self.report_interval)
    }
}

impl From<&RuntimeConfig> for EventLoopConfig {
    fn from(from: &RuntimeConfig) -> EventLoopConfig {
        EventLoopConfig {
            timer_interval: from.timer_interval,
            report_interval: from.report_interval,
            has_timers: false,
        }
    }
}

impl TickerData for EventLoopConfig {
    type Context = Timers;

    #[inline(always)]
    fn update_and_check(&mut self, timers: &Timers, tick: u32) -> TickerEvents {
        // (1) Update data
        self.has_timers = !timers.is_empty();

        // (2) Check policies
        let mut events = TickerEvents::empty();

        if self.should_fire_timers(tick) {
            events.insert(TickerEvents::FIRE_TIMERS);
        }

        if self.should_report(tick) {
            events.insert(TickerEvents::REPORT);
        }

        events
    }
}
