use std::cell::Cell;
use std::collections::BTreeMap;
use std::task::Waker;
use std::time::{Duration, Instant};

/// Which notion of time drives `sleep`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockKind {
    /// Logical time that jumps straight to the next deadline whenever no task
    /// is ready. Runs are deterministic and never block the thread.
    Virtual,

    /// Real elapsed time. The driver parks the thread until the next deadline.
    #[default]
    Wall,
}

/// Time source of a scheduler, measured as the offset since the runtime
/// started.
#[derive(Debug)]
pub(crate) enum Clock {
    Virtual(Cell<Duration>),
    Wall(Instant),
}

impl Clock {
    pub(crate) fn new(kind: ClockKind) -> Self {
        match kind {
            ClockKind::Virtual => Clock::Virtual(Cell::new(Duration::ZERO)),
            ClockKind::Wall => Clock::Wall(Instant::now()),
        }
    }

    pub(crate) fn kind(&self) -> ClockKind {
        match self {
            Clock::Virtual(_) => ClockKind::Virtual,
            Clock::Wall(_) => ClockKind::Wall,
        }
    }

    pub(crate) fn now(&self) -> Duration {
        match self {
            Clock::Virtual(now) => now.get(),
            Clock::Wall(start) => start.elapsed(),
        }
    }

    /// Moves virtual time forward. Wall time moves on its own.
    pub(crate) fn advance_to(&self, deadline: Duration) {
        if let Clock::Virtual(now) = self
            && deadline > now.get()
        {
            now.set(deadline);
        }
    }

    /// Converts a deadline to an instant the driver can park until.
    pub(crate) fn instant_at(&self, deadline: Duration) -> Instant {
        match self {
            Clock::Wall(start) => *start + deadline,
            Clock::Virtual(now) => Instant::now() + deadline.saturating_sub(now.get()),
        }
    }
}

/// Handle on a registered timer. Ordering matches firing order: earliest
/// deadline first, registration order among equal deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct TimerKey {
    deadline: Duration,
    seq: u64,
}

impl TimerKey {
    pub(crate) fn deadline(&self) -> Duration {
        self.deadline
    }
}

/// Wait queue of sleeping tasks keyed by deadline.
#[derive(Debug, Default)]
pub(crate) struct Timers {
    entries: BTreeMap<TimerKey, Waker>,
    next_seq: u64,
}

impl Timers {
    pub(crate) fn insert(&mut self, deadline: Duration, waker: Waker) -> TimerKey {
        let key = TimerKey {
            deadline,
            seq: self.next_seq,
        };

        self.next_seq += 1;
        self.entries.insert(key, waker);
        key
    }

    /// Refreshes the waker of a pending timer. Returns false once the timer
    /// has fired or was removed.
    pub(crate) fn update(&mut self, key: TimerKey, waker: &Waker) -> bool {
        match self.entries.get_mut(&key) {
            Some(current) => {
                if !current.will_wake(waker) {
                    current.clone_from(waker);
                }
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove(&mut self, key: TimerKey) -> bool {
        self.entries.remove(&key).is_some()
    }

    pub(crate) fn next_deadline(&self) -> Option<Duration> {
        self.entries.first_key_value().map(|(key, _)| key.deadline)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every timer due at `now`, in firing order. The caller wakes
    /// them once the timer borrow is released.
    pub(crate) fn take_expired(&mut self, now: Duration) -> Vec<Waker> {
        let mut expired = Vec::new();

        while let Some(entry) = self.entries.first_entry() {
            if entry.key().deadline > now {
                break;
            }
            expired.push(entry.remove());
        }

        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::noop_waker;
    use rstest::rstest;

    #[test]
    fn test_virtual_clock_only_moves_forward() {
        let clock = Clock::new(ClockKind::Virtual);
        assert_eq!(clock.now(), Duration::ZERO);

        clock.advance_to(Duration::from_millis(50));
        clock.advance_to(Duration::from_millis(20));
        assert_eq!(clock.now(), Duration::from_millis(50));
        assert_eq!(clock.kind(), ClockKind::Virtual);
    }

    #[test]
    fn test_wall_clock_ignores_advance() {
        let clock = Clock::new(ClockKind::Wall);
        clock.advance_to(Duration::from_secs(3600));
        assert!(clock.now() < Duration::from_secs(3600));
    }

    #[rstest]
    #[case::in_order(&[10, 20, 30], 20, 2)]
    #[case::out_of_order(&[30, 10, 20], 15, 1)]
    #[case::equal_deadlines(&[10, 10, 10], 10, 3)]
    #[case::none_due(&[10, 20], 5, 0)]
    fn test_take_expired(#[case] deadlines: &[u64], #[case] now: u64, #[case] expected: usize) {
        let mut timers = Timers::default();
        for ms in deadlines {
            timers.insert(Duration::from_millis(*ms), noop_waker());
        }

        let fired = timers.take_expired(Duration::from_millis(now));
        assert_eq!(fired.len(), expected);
        assert_eq!(timers.len(), deadlines.len() - expected);
    }

    #[test]
    fn test_equal_deadlines_keep_registration_order() {
        let mut timers = Timers::default();
        let first = timers.insert(Duration::from_millis(5), noop_waker());
        let second = timers.insert(Duration::from_millis(5), noop_waker());

        assert!(first < second);
        assert_eq!(first.deadline(), second.deadline());
    }

    #[test]
    fn test_removed_timer_no_longer_pending() {
        let mut timers = Timers::default();
        let early = timers.insert(Duration::from_millis(5), noop_waker());
        timers.insert(Duration::from_millis(50), noop_waker());

        assert_eq!(timers.next_deadline(), Some(Duration::from_millis(5)));
        assert!(timers.remove(early));
        assert!(!timers.remove(early));
        assert!(!timers.update(early, &noop_waker()));
        assert_eq!(timers.next_deadline(), Some(Duration::from_millis(50)));
    }
}
