use crate::context;
use pin_project::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;

/// Wraps `future` so that it also reports how much runtime clock time it took,
/// measured from its first poll.
///
/// ```no_run
/// use spindle::time::{sleep, timed};
/// use std::time::Duration;
///
/// spindle::run_blocking(|_| async {
///     let (res, elapsed) = timed(sleep(Duration::from_millis(20))).await;
///     res?;
///     println!("took {elapsed:?}");
///     Ok::<_, spindle::Error>(())
/// })
/// .unwrap();
/// ```
pub fn timed<F: Future>(future: F) -> Timed<F> {
    Timed {
        inner: future,
        started: None,
    }
}

#[pin_project]
#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Timed<F> {
    #[pin]
    inner: F,

    started: Option<Duration>,
}

impl<F: Future> Future for Timed<F> {
    type Output = (F::Output, Duration);

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        // Outside of a runtime there is no clock and the measure is zero.
        let now = || context::current_scheduler().map_or(Duration::ZERO, |s| s.now());
        let started = *this.started.get_or_insert_with(now);

        let output = ready!(this.inner.poll(cx));
        Poll::Ready((output, now().saturating_sub(started)))
    }
}
