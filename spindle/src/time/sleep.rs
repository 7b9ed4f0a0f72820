use crate::context;
use crate::error::Error;
use crate::runtime::Scheduler;
use crate::runtime::timer::TimerKey;
use crate::task::Checkpoint;
use std::fmt;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

/// Suspends the current task for `duration` of runtime clock time.
///
/// This is the basic suspension point. Like every suspension point it first
/// checks for cancellation: a cancelled task gets [`Error::Cancelled`] instead
/// of sleeping. A zero duration does not suspend but still checks.
///
/// # Example
///
/// ```no_run
/// use spindle::time::sleep;
/// use std::time::Duration;
///
/// spindle::run_blocking(|_| async {
///     sleep(Duration::from_millis(100)).await?;
///     Ok::<_, spindle::Error>(())
/// })
/// .unwrap();
/// ```
pub fn sleep(duration: Duration) -> Sleep {
    Sleep::new(duration)
}

/// Future returned by [`sleep`].
///
/// The deadline is taken on first poll. Dropping a pending `Sleep` removes
/// its timer.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Sleep {
    duration: Duration,

    // Set on first poll.
    timer: Option<TimerKey>,

    scheduler: Weak<Scheduler>,
}

impl Sleep {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            timer: None,
            scheduler: Weak::new(),
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Absolute deadline on the runtime clock, once polled.
    pub fn deadline(&self) -> Option<Duration> {
        self.timer.map(|key| key.deadline())
    }
}

impl Future for Sleep {
    type Output = Result<(), Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match context::checkpoint() {
            Checkpoint::Proceed => {}
            Checkpoint::Interrupt => return Poll::Ready(Err(Error::Cancelled)),
            Checkpoint::Park => return Poll::Pending,
        }

        let Some(key) = self.timer else {
            let Some(scheduler) = context::current_scheduler() else {
                return Poll::Ready(Err(Error::NoRuntime));
            };

            if self.duration.is_zero() {
                return Poll::Ready(Ok(()));
            }

            let deadline = scheduler.now().saturating_add(self.duration);
            self.timer = Some(scheduler.add_timer(deadline, cx.waker().clone()));
            self.scheduler = Rc::downgrade(&scheduler);
            return Poll::Pending;
        };

        let Some(scheduler) = self.scheduler.upgrade() else {
            return Poll::Ready(Err(Error::NoRuntime));
        };

        // Fired timers are removed from the scheduler, so a failed update
        // means the deadline has passed.
        if scheduler.now() >= key.deadline() || !scheduler.update_timer(key, cx.waker()) {
            scheduler.remove_timer(key);
            self.timer = None;
            self.duration = Duration::ZERO;
            return Poll::Ready(Ok(()));
        }

        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(key) = self.timer.take()
            && let Some(scheduler) = self.scheduler.upgrade()
        {
            scheduler.remove_timer(key);
        }
    }
}

impl fmt::Debug for Sleep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sleep")
            .field("duration", &self.duration)
            .field("deadline", &self.deadline())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate as spindle;
    use crate::Scope;
    use crate::runtime::Builder;
    use crate::time;
    use anyhow::Result;
    use rstest::rstest;
    use std::cell::Cell;
    use std::time::Instant;

    #[rstest]
    #[case::one_ms(Duration::from_millis(1))]
    #[case::one_sec(Duration::from_secs(1))]
    #[case::one_hour(Duration::from_secs(3600))]
    #[spindle::test]
    async fn test_virtual_sleep_is_exact(#[case] duration: Duration) -> Result<()> {
        let start = time::now()?;
        sleep(duration).await?;
        assert_eq!(time::now()? - start, duration);
        Ok(())
    }

    #[rstest]
    #[case::one_hundred(Duration::from_micros(100))]
    #[case::two_ms(Duration::from_millis(2))]
    #[spindle::test(clock = "wall")]
    async fn test_wall_sleep_duration_is_accurate(#[case] duration: Duration) -> Result<()> {
        let start = Instant::now();
        sleep(duration).await?;
        let elapsed = start.elapsed();

        // The sleep should last for *at least* the specified duration.
        assert!(
            elapsed >= duration,
            "Sleep was shorter than expected. Elapsed: {elapsed:?}, Expected: >= {duration:?}"
        );

        // Generous margin against loaded CI machines.
        let upper_bound = duration + Duration::from_millis(50);
        assert!(
            elapsed < upper_bound,
            "Sleep was much longer than expected. Elapsed: {elapsed:?}, Expected: < {upper_bound:?}"
        );
        Ok(())
    }

    #[spindle::test]
    async fn test_zero_sleep_does_not_suspend() -> Result<()> {
        let start = time::now()?;
        sleep(Duration::ZERO).await?;
        assert_eq!(time::now()?, start);
        Ok(())
    }

    #[test]
    fn test_sleep_outside_runtime() {
        let res = futures::executor::block_on(sleep(Duration::from_millis(1)));
        assert!(matches!(res, Err(Error::NoRuntime)));
    }

    #[spindle::test]
    async fn test_sleepers_wake_in_deadline_order(scope: Scope) -> Result<()> {
        let order = Rc::new(std::cell::RefCell::new(Vec::new()));

        for (label, ms) in [("slow", 30), ("fast", 10), ("mid", 20)] {
            let order = Rc::clone(&order);
            scope.launch(move |_| async move {
                sleep(Duration::from_millis(ms)).await?;
                order.borrow_mut().push(label);
                Ok::<_, Error>(())
            });
        }

        sleep(Duration::from_millis(50)).await?;
        assert_eq!(*order.borrow(), ["fast", "mid", "slow"]);
        Ok(())
    }

    #[test]
    fn test_cancelled_sleeper_releases_timer() -> Result<()> {
        let rt = Builder::new_virtual().try_build()?;
        let woke = Rc::new(Cell::new(false));

        let flag = Rc::clone(&woke);
        let elapsed = rt.block_on(move |scope| async move {
            let job = scope.launch(move |_| async move {
                sleep(Duration::from_secs(3600)).await?;
                flag.set(true);
                Ok::<_, Error>(())
            });

            sleep(Duration::from_millis(5)).await?;
            job.cancel();
            assert!(matches!(job.join().await, Err(Error::Cancelled)));
            time::now()
        })?;

        // The hour-long timer was dropped with the task and never advanced
        // the clock.
        assert_eq!(elapsed, Duration::from_millis(5));
        assert!(!woke.get());
        Ok(())
    }
}
