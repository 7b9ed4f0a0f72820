use crate::error::{Error, TaskFailure, is_cancellation};
use crate::runtime::{Dispatcher, Scope, ScopeInner};
use crate::task::Id;
use crate::task::state::{Checkpoint, TaskState, Termination};
use smallvec::SmallVec;
use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::task::Waker;

/// Per-task bookkeeping shared by the scheduler, every [`Job`] handle and the
/// task's own child scope.
///
/// The body future is *not* stored here, the scheduler owns it. The header
/// owns the task's child [`Scope`] and refers to its parent scope weakly, so
/// the task tree never forms an ownership cycle.
///
/// [`Job`]: crate::task::Job
pub(crate) struct Header {
    pub(crate) id: Id,

    pub(crate) name: Option<Cow<'static, str>>,

    pub(crate) dispatcher: Dispatcher,

    state: Cell<TaskState>,

    cancel_requested: Cell<bool>,

    /// The body has been told about the cancellation once already.
    cancel_observed: Cell<bool>,

    /// Set when the body returned while children were still active.
    parked: RefCell<Option<Termination>>,

    failure: RefCell<Option<TaskFailure>>,

    join_waiters: RefCell<SmallVec<[Waker; 2]>>,

    /// Pushes this task onto the scheduler's ready queue.
    waker: Waker,

    /// Scope handed to the body; every job the body launches lives here.
    scope: Scope,

    parent: Weak<ScopeInner>,
}

impl Header {
    pub(crate) fn new(
        id: Id,
        name: Option<Cow<'static, str>>,
        dispatcher: Dispatcher,
        waker: Waker,
        scope: Scope,
        parent: Weak<ScopeInner>,
    ) -> Header {
        Header {
            id,
            name,
            dispatcher,
            state: Cell::new(TaskState::Pending),
            cancel_requested: Cell::new(false),
            cancel_observed: Cell::new(false),
            parked: RefCell::new(None),
            failure: RefCell::new(None),
            join_waiters: RefCell::new(SmallVec::new()),
            waker,
            scope,
            parent,
        }
    }

    pub(crate) fn state(&self) -> TaskState {
        self.state.get()
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        debug_assert!(self.state.get().is_active(), "terminal state is final");
        self.state.set(state);
    }

    pub(crate) fn waker(&self) -> &Waker {
        &self.waker
    }

    pub(crate) fn wake(&self) {
        self.waker.wake_by_ref();
    }

    pub(crate) fn scope(&self) -> &Scope {
        &self.scope
    }

    pub(crate) fn parent_scope(&self) -> Option<Scope> {
        self.parent.upgrade().map(Scope::from_inner)
    }

    pub(crate) fn failure(&self) -> Option<TaskFailure> {
        self.failure.borrow().clone()
    }

    pub(crate) fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.get()
    }

    /// Requests cooperative cancellation of this task and, depth-first, of
    /// everything launched in its scope. No-op once terminal.
    pub(crate) fn cancel(&self) {
        if self.state().is_terminal() || self.cancel_requested.replace(true) {
            return;
        }

        tracing::debug!(task.id = %self.id, state = %self.state(), "cancel requested");
        self.scope.cancel();

        // A running task observes the flag at its next suspension point.
        if self.state() != TaskState::Running {
            self.wake();
        }
    }

    /// Consulted by every suspension point before it does anything else.
    pub(crate) fn checkpoint(&self) -> Checkpoint {
        if !self.cancel_requested.get() {
            Checkpoint::Proceed
        } else if !self.cancel_observed.replace(true) {
            Checkpoint::Interrupt
        } else {
            Checkpoint::Park
        }
    }

    /// Maps the value a body returned to the way the task ends. Once
    /// cancellation was requested the result is discarded.
    pub(crate) fn termination_for(&self, result: anyhow::Result<()>) -> Termination {
        if self.cancel_requested.get() {
            return Termination::Cancelled;
        }

        match result {
            Ok(()) => Termination::Completed,
            Err(err) if is_cancellation(&err) => Termination::Cancelled,
            Err(err) => Termination::Failed(TaskFailure::new(self.id, err)),
        }
    }

    pub(crate) fn park(&self, termination: Termination) {
        self.state.set(TaskState::Suspended);
        *self.parked.borrow_mut() = Some(termination);
    }

    pub(crate) fn take_parked(&self) -> Option<Termination> {
        self.parked.borrow_mut().take()
    }

    /// Moves the task to its terminal state and wakes everything joining it.
    pub(crate) fn set_terminal(&self, termination: Termination) {
        if self.state().is_terminal() {
            return;
        }

        // Cancellation that arrived while waiting for children wins over a
        // clean completion, never over a failure.
        let termination = match termination {
            Termination::Completed if self.cancel_requested.get() => Termination::Cancelled,
            other => other,
        };

        self.state.set(termination.state());
        if let Termination::Failed(failure) = termination {
            *self.failure.borrow_mut() = Some(failure);
        }

        let waiters = self.join_waiters.take();
        for waker in waiters {
            waker.wake();
        }
    }

    /// `None` while the task is active.
    pub(crate) fn outcome(&self) -> Option<Result<(), Error>> {
        match self.state() {
            TaskState::Completed => Some(Ok(())),
            TaskState::Cancelled => Some(Err(Error::Cancelled)),
            TaskState::Failed => Some(Err(match self.failure() {
                Some(failure) => Error::Failed(failure),
                None => Error::Cancelled,
            })),
            _ => None,
        }
    }

    /// Moves the failure out, leaving the task failed. Only for the last
    /// observer of a task.
    pub(crate) fn take_failure(&self) -> Option<TaskFailure> {
        self.failure.borrow_mut().take()
    }

    pub(crate) fn register_join_waker(&self, waker: &Waker) {
        let mut waiters = self.join_waiters.borrow_mut();
        if !waiters.iter().any(|w| w.will_wake(waker)) {
            waiters.push(waker.clone());
        }
    }
}

impl std::fmt::Debug for Header {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Header")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("dispatcher", &self.dispatcher)
            .field("state", &self.state.get())
            .field("cancel_requested", &self.cancel_requested.get())
            .finish_non_exhaustive()
    }
}

/// Creates the header of a new task whose child scope points back at it.
pub(crate) fn new_header(
    id: Id,
    name: Option<Cow<'static, str>>,
    dispatcher: Dispatcher,
    waker: Waker,
    parent: &Scope,
) -> Rc<Header> {
    Rc::new_cyclic(|me| {
        let scope = parent.child_scope(me.clone(), dispatcher);
        Header::new(id, name, dispatcher, waker, scope, parent.downgrade())
    })
}
