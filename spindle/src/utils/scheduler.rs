#![cfg_attr(not(test), allow(dead_code))]

use crate::runtime::Dispatcher;
use crate::task::{Id, TaskState};
use std::cell::RefCell;

/// One scheduler action, as seen by [`Tracker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Launch { id: Id, dispatcher: Dispatcher },
    Poll { id: Id },
    Terminate { id: Id, state: TaskState },
}

/// Journal of scheduler actions in the order they happened. Only filled in
/// test builds, where assertions run against the real event loop.
#[derive(Debug, Default)]
pub(crate) struct Tracker {
    journal: RefCell<Vec<Call>>,
}

impl Tracker {
    pub(crate) fn record(&self, call: Call) {
        self.journal.borrow_mut().push(call);
    }

    #[cfg(test)]
    pub(crate) fn launches(&self) -> Vec<Call> {
        self.journal
            .borrow()
            .iter()
            .filter(|call| matches!(call, Call::Launch { .. }))
            .cloned()
            .collect()
    }

    /// Ids of every polled task, in poll order.
    #[cfg(test)]
    pub(crate) fn poll_order(&self) -> Vec<Id> {
        self.journal
            .borrow()
            .iter()
            .filter_map(|call| match call {
                Call::Poll { id } => Some(*id),
                _ => None,
            })
            .collect()
    }
}
