use crate::error::Error;
use crate::runtime::Scheduler;
use crate::task::{Checkpoint, Header, Id};
use crate::utils::ScopeGuard;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::thread_local;

/// Per-thread view of the runtime driving this thread, and of the task it is
/// currently polling.
struct Context {
    scheduler: Weak<Scheduler>,
    current: Option<Rc<Header>>,
}

thread_local! {
    // One runtime may drive a thread at a time.
    static IS_RUNTIME_ACTIVE: Cell<bool> = const { Cell::new(false) };

    static CONTEXT: RefCell<Context> = const {
        RefCell::new(Context {
            scheduler: Weak::new(),
            current: None,
        })
    };
}

/// Claims this thread for a runtime until the returned guard is dropped.
pub(crate) fn try_enter_runtime() -> Result<ScopeGuard<impl FnOnce()>, Error> {
    IS_RUNTIME_ACTIVE.with(|is_active| {
        if is_active.replace(true) {
            return Err(Error::RuntimeActive);
        }

        Ok(ScopeGuard::new(|| {
            IS_RUNTIME_ACTIVE.with(|is_active| is_active.set(false));
        }))
    })
}

/// Makes `scheduler` the one `launch`, `sleep` and friends talk to, until the
/// returned guard is dropped.
pub(crate) fn enter_scheduler(scheduler: &Rc<Scheduler>) -> ScopeGuard<impl FnOnce()> {
    let prev = CONTEXT.with(|ctx| {
        std::mem::replace(&mut ctx.borrow_mut().scheduler, Rc::downgrade(scheduler))
    });

    ScopeGuard::new(move || {
        CONTEXT.with(|ctx| ctx.borrow_mut().scheduler = prev);
    })
}

/// Marks `header` as the task being polled. Nested polls (unconfined launches)
/// restore the outer task on drop.
pub(crate) fn enter_task(header: &Rc<Header>) -> ScopeGuard<impl FnOnce()> {
    let prev = CONTEXT.with(|ctx| ctx.borrow_mut().current.replace(Rc::clone(header)));

    ScopeGuard::new(move || {
        // Drop the previous header outside of the borrow.
        let _current = CONTEXT.with(|ctx| std::mem::replace(&mut ctx.borrow_mut().current, prev));
    })
}

pub(crate) fn current_scheduler() -> Option<Rc<Scheduler>> {
    CONTEXT.with(|ctx| ctx.borrow().scheduler.upgrade())
}

pub(crate) fn current_task() -> Option<Rc<Header>> {
    CONTEXT.with(|ctx| ctx.borrow().current.clone())
}

pub(crate) fn current_task_id() -> Option<Id> {
    CONTEXT.with(|ctx| ctx.borrow().current.as_ref().map(|header| header.id))
}

/// Consults the cancellation flag of the task being polled. Futures polled
/// outside of a spindle task always proceed.
pub(crate) fn checkpoint() -> Checkpoint {
    current_task().map_or(Checkpoint::Proceed, |header| header.checkpoint())
}
