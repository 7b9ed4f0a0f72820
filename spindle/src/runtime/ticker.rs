use bitflags::bitflags;

/// Counts task polls. Each tick asks a [`TickerData`] which periodic chores
/// the event loop owes.
#[derive(Debug, Default)]
pub(crate) struct Ticker {
    polls: u32,
}

impl Ticker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn tick<T: TickerData>(&mut self, ctx: &T::Context, data: &mut T) -> TickerEvents {
        self.polls = self.polls.wrapping_add(1);
        data.update_and_check(ctx, self.polls)
    }
}

/// Policy side of the ticker: refreshes its view of the scheduler from `ctx`,
/// then says what is due at `tick`.
pub(crate) trait TickerData {
    type Context;

    fn update_and_check(&mut self, ctx: &Self::Context, tick: u32) -> TickerEvents;
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct TickerEvents: u8 {
        /// Expired timers get fired even though ready tasks are waiting.
        const FIRE_TIMERS = 1;

        /// Scheduler summary goes to the debug log.
        const REPORT = 1 << 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Every {
        timers: u32,
        report: u32,
    }

    impl TickerData for Every {
        type Context = ();

        fn update_and_check(&mut self, _: &(), tick: u32) -> TickerEvents {
            let mut events = TickerEvents::empty();
            events.set(TickerEvents::FIRE_TIMERS, tick.is_multiple_of(self.timers));
            events.set(TickerEvents::REPORT, tick.is_multiple_of(self.report));
            events
        }
    }

    #[test]
    fn test_events_follow_their_interval() {
        let mut ticker = Ticker::new();
        let mut every = Every { timers: 3, report: 4 };

        let events = (0..12).map(|_| ticker.tick(&(), &mut every)).collect::<Vec<_>>();

        let count = |flag| events.iter().filter(|e| e.contains(flag)).count();
        assert_eq!(count(TickerEvents::FIRE_TIMERS), 4);
        assert_eq!(count(TickerEvents::REPORT), 3);
        assert!(events[11].contains(TickerEvents::FIRE_TIMERS | TickerEvents::REPORT));
    }
}
