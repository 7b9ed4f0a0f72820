use std::collections::VecDeque;
use std::task::Waker;

/// Position of a suspended operation in a [`Waiters`] queue.
pub(crate) type Ticket = u64;

/// FIFO of tasks suspended on one side of a channel.
///
/// Operations take a ticket the first time they suspend and may only proceed
/// once they are at the head of the queue, so racing senders (or receivers)
/// are served in arrival order.
#[derive(Debug, Default)]
pub(crate) struct Waiters {
    queue: VecDeque<(Ticket, Waker)>,
    next_ticket: Ticket,
}

impl Waiters {
    /// True if the holder of `ticket` may proceed: it heads the queue, or
    /// holds no ticket and nobody is waiting.
    pub(crate) fn is_turn(&self, ticket: Option<Ticket>) -> bool {
        match (ticket, self.queue.front()) {
            (_, None) => true,
            (Some(ticket), Some((head, _))) => ticket == *head,
            (None, Some(_)) => false,
        }
    }

    /// Enqueues the caller, or refreshes its waker if it already waits.
    pub(crate) fn register(&mut self, ticket: &mut Option<Ticket>, waker: &Waker) {
        if let Some(ticket) = *ticket
            && let Some((_, current)) = self.queue.iter_mut().find(|(t, _)| *t == ticket)
        {
            if !current.will_wake(waker) {
                current.clone_from(waker);
            }
            return;
        }

        let next = self.next_ticket;
        self.next_ticket += 1;
        self.queue.push_back((next, waker.clone()));
        *ticket = Some(next);
    }

    /// Leaves the queue. Returns true if the caller was at its head.
    pub(crate) fn remove(&mut self, ticket: &mut Option<Ticket>) -> bool {
        let Some(ticket) = ticket.take() else {
            return false;
        };

        match self.queue.iter().position(|(t, _)| *t == ticket) {
            Some(pos) => {
                self.queue.remove(pos);
                pos == 0
            }
            None => false,
        }
    }

    pub(crate) fn wake_first(&self) {
        if let Some((_, waker)) = self.queue.front() {
            waker.wake_by_ref();
        }
    }

    /// Wakes every waiter, in queue order. Used when the channel closes.
    pub(crate) fn wake_all(&self) {
        for (_, waker) in &self.queue {
            waker.wake_by_ref();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::noop_waker;

    #[test]
    fn test_turns_follow_arrival_order() {
        let mut waiters = Waiters::default();
        let waker = noop_waker();

        let (mut first, mut second) = (None, None);
        assert!(waiters.is_turn(None));

        waiters.register(&mut first, &waker);
        waiters.register(&mut second, &waker);
        assert_eq!(waiters.len(), 2);

        assert!(!waiters.is_turn(None));
        assert!(waiters.is_turn(first));
        assert!(!waiters.is_turn(second));

        // Registering again keeps the place in line.
        waiters.register(&mut first, &waker);
        assert_eq!(waiters.len(), 2);

        assert!(waiters.remove(&mut first));
        assert!(first.is_none());
        assert!(waiters.is_turn(second));
    }

    #[test]
    fn test_remove_behind_head() {
        let mut waiters = Waiters::default();
        let waker = noop_waker();

        let (mut first, mut second) = (None, None);
        waiters.register(&mut first, &waker);
        waiters.register(&mut second, &waker);

        assert!(!waiters.remove(&mut second));
        assert!(!waiters.remove(&mut second));
        assert!(waiters.is_turn(first));
    }
}
