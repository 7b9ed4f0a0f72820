//! Cold asynchronous streams.
//!
//! A [`Flow`] describes how to produce values rather than holding them. Each
//! [`collect`](Flow::collect) runs the producer again from the start, inside
//! the collecting task, and hands every emitted value to the collector before
//! the producer resumes.
//!
//! ```no_run
//! use spindle::{Error, flow, time::sleep};
//! use std::time::Duration;
//!
//! spindle::run_blocking(|_| async {
//!     let numbers = flow(|emitter| async move {
//!         for i in 1..=3 {
//!             sleep(Duration::from_millis(100)).await?;
//!             emitter.emit(i).await?;
//!         }
//!         Ok::<_, Error>(())
//!     });
//!
//!     numbers.collect(|n| println!("{n}")).await?;
//!     Ok::<_, anyhow::Error>(())
//! })
//! .unwrap();
//! ```
use crate::context;
use crate::error::Error;
use crate::task::Checkpoint;
use futures::future::LocalBoxFuture;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::future::poll_fn;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

type Producer<T> = dyn Fn(Emitter<T>) -> LocalBoxFuture<'static, anyhow::Result<()>>;

/// Creates a cold flow from `producer`.
pub fn flow<T, F, Fut, E>(producer: F) -> Flow<T>
where
    T: 'static,
    F: Fn(Emitter<T>) -> Fut + 'static,
    Fut: Future<Output = Result<(), E>> + 'static,
    E: Into<anyhow::Error> + 'static,
{
    Flow {
        producer: Rc::new(move |emitter| -> LocalBoxFuture<'static, anyhow::Result<()>> {
            let fut = producer(emitter);
            Box::pin(async move { fut.await.map_err(Into::<anyhow::Error>::into) })
        }),
    }
}

/// A cold stream of `T`, see [`flow`].
///
/// Cloning is cheap and clones share the producer.
pub struct Flow<T> {
    producer: Rc<Producer<T>>,
}

impl<T: 'static> Flow<T> {
    /// Runs the producer to completion, passing each value to `sink` as it is
    /// emitted.
    ///
    /// # Errors
    ///
    /// Whatever the producer returns, including [`Error::Cancelled`] when the
    /// collecting task is cancelled at an `emit`.
    pub fn collect<F: FnMut(T)>(&self, sink: F) -> Collect<T, F> {
        let slot = Rc::new(RefCell::new(VecDeque::new()));
        let producer = (self.producer)(Emitter {
            slot: Rc::clone(&slot),
        });

        Collect {
            producer,
            slot,
            sink,
        }
    }

    /// Collects every value into a `Vec`.
    pub async fn to_vec(&self) -> anyhow::Result<Vec<T>> {
        let mut values = Vec::new();
        self.collect(|value| values.push(value)).await?;
        Ok(values)
    }

    /// Returns a flow emitting `f(value)` for every value of `self`.
    pub fn map<U, F>(&self, f: F) -> Flow<U>
    where
        U: 'static,
        F: Fn(T) -> U + 'static,
    {
        let upstream = self.clone();
        let f = Rc::new(f);

        flow(move |emitter: Emitter<U>| {
            let upstream = upstream.clone();
            let f = Rc::clone(&f);
            async move { upstream.collect(|value| emitter.push(f(value))).await }
        })
    }
}

impl<T> Clone for Flow<T> {
    fn clone(&self) -> Self {
        Self {
            producer: Rc::clone(&self.producer),
        }
    }
}

impl<T> fmt::Debug for Flow<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow").finish_non_exhaustive()
    }
}

/// Handed to the producer of a [`Flow`] to emit values to the collector.
pub struct Emitter<T> {
    slot: Rc<RefCell<VecDeque<T>>>,
}

impl<T> Emitter<T> {
    /// Delivers `value` to the collector and resumes once it was handled.
    ///
    /// Emitting is a suspension point: a cancelled collector gets
    /// [`Error::Cancelled`] and `value` is dropped.
    pub async fn emit(&self, value: T) -> Result<(), Error> {
        match context::checkpoint() {
            Checkpoint::Proceed => {}
            Checkpoint::Interrupt => return Err(Error::Cancelled),
            Checkpoint::Park => return poll_fn(|_| Poll::Pending).await,
        }

        self.push(value);

        // Give the collector a turn before going on.
        let mut yielded = false;
        poll_fn(|cx| {
            if yielded {
                return Poll::Ready(Ok(()));
            }
            yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        })
        .await
    }

    fn push(&self, value: T) {
        self.slot.borrow_mut().push_back(value);
    }
}

impl<T> fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("pending", &self.slot.borrow().len())
            .finish()
    }
}

/// Future returned by [`Flow::collect`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Collect<T, F> {
    producer: LocalBoxFuture<'static, anyhow::Result<()>>,
    slot: Rc<RefCell<VecDeque<T>>>,
    sink: F,
}

// Neither the sink nor the values are pinned.
impl<T, F> Unpin for Collect<T, F> {}

impl<T, F: FnMut(T)> Future for Collect<T, F> {
    type Output = anyhow::Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        loop {
            let res = this.producer.as_mut().poll(cx);

            let mut delivered = 0;
            loop {
                // Release the borrow before calling into the sink.
                let Some(value) = this.slot.borrow_mut().pop_front() else {
                    break;
                };
                (this.sink)(value);
                delivered += 1;
            }

            match res {
                Poll::Ready(res) => return Poll::Ready(res),
                // The producer only paused to hand values over.
                Poll::Pending if delivered > 0 => continue,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<T, F> fmt::Debug for Collect<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collect")
            .field("pending", &self.slot.borrow().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate as spindle;
    use crate::Scope;
    use crate::time::{self, sleep};
    use anyhow::{Result, anyhow};
    use std::cell::Cell;
    use std::time::Duration;

    fn numbers(runs: Rc<Cell<u32>>) -> Flow<u32> {
        flow(move |emitter| {
            let runs = Rc::clone(&runs);
            async move {
                runs.set(runs.get() + 1);
                for i in 1..=3 {
                    sleep(Duration::from_millis(100)).await?;
                    emitter.emit(i).await?;
                }
                Ok::<_, Error>(())
            }
        })
    }

    #[spindle::test]
    async fn test_flow_is_cold() -> Result<()> {
        let runs = Rc::new(Cell::new(0));
        let flow = numbers(Rc::clone(&runs));
        assert_eq!(runs.get(), 0);

        assert_eq!(flow.to_vec().await?, [1, 2, 3]);
        assert_eq!(flow.to_vec().await?, [1, 2, 3]);
        assert_eq!(runs.get(), 2);
        Ok(())
    }

    #[spindle::test]
    async fn test_values_handled_as_emitted() -> Result<()> {
        let flow = numbers(Rc::new(Cell::new(0)));

        let mut seen = Vec::new();
        flow.collect(|n| seen.push((n, time::now().unwrap_or_default())))
            .await?;

        assert_eq!(
            seen,
            [
                (1, Duration::from_millis(100)),
                (2, Duration::from_millis(200)),
                (3, Duration::from_millis(300)),
            ]
        );
        Ok(())
    }

    #[spindle::test]
    async fn test_map() -> Result<()> {
        let squares = numbers(Rc::new(Cell::new(0))).map(|n| n * n);
        let labels = squares.map(|n| format!("#{n}"));

        assert_eq!(squares.to_vec().await?, [1, 4, 9]);
        assert_eq!(labels.to_vec().await?, ["#1", "#4", "#9"]);
        Ok(())
    }

    #[spindle::test]
    async fn test_producer_error_propagates() -> Result<()> {
        let failing = flow(|emitter| async move {
            emitter.emit(1).await?;
            Err::<(), _>(anyhow!("producer broke"))
        });

        let mut seen = Vec::new();
        let err = failing.collect(|n| seen.push(n)).await.unwrap_err();

        assert_eq!(err.to_string(), "producer broke");
        assert_eq!(seen, [1]);
        Ok(())
    }

    #[spindle::test]
    async fn test_cancel_collector_stops_producer(scope: Scope) -> Result<()> {
        let seen = Rc::new(RefCell::new(Vec::new()));

        let sink = Rc::clone(&seen);
        let collector = scope.launch(move |_| async move {
            numbers(Rc::new(Cell::new(0)))
                .collect(|n| sink.borrow_mut().push(n))
                .await
        });

        sleep(Duration::from_millis(250)).await?;
        collector.cancel();

        assert!(matches!(collector.join().await, Err(Error::Cancelled)));
        assert_eq!(*seen.borrow(), [1, 2]);
        Ok(())
    }
}
