//! FIFO channels between tasks.
//!
//! A [`Channel`] is a queue plus a closed flag. Sending and receiving are
//! suspension points: a receiver suspends while the queue is empty and the
//! channel open, a sender on a bounded channel suspends while the queue is
//! full. Closing lets receivers drain what is buffered, after which `recv`
//! returns `Ok(None)`.
//!
//! # Example
//!
//! ```no_run
//! use spindle::{Channel, Error};
//!
//! spindle::run_blocking(|scope| async move {
//!     let channel = Channel::unbounded();
//!
//!     let tx = channel.clone();
//!     scope.launch(move |_| async move {
//!         for i in 0..3 {
//!             tx.send(format!("Message {i}")).await?;
//!         }
//!         tx.close();
//!         Ok::<_, Error>(())
//!     });
//!
//!     while let Some(message) = channel.recv().await? {
//!         println!("{message}");
//!     }
//!     Ok::<_, Error>(())
//! })
//! .unwrap();
//! ```
use crate::context;
use crate::error::Error;
use crate::task::Checkpoint;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

mod stream;
pub use stream::ChannelStream;

mod waiters;
use waiters::{Ticket, Waiters};

/// Multi-producer, multi-consumer FIFO channel for tasks of one runtime.
///
/// Cloning is cheap: clones are handles on the same channel.
pub struct Channel<T> {
    shared: Rc<RefCell<Shared<T>>>,
}

struct Shared<T> {
    buffer: VecDeque<T>,

    // `None` for unbounded channels.
    capacity: Option<usize>,

    closed: bool,

    senders: Waiters,

    receivers: Waiters,
}

impl<T> Shared<T> {
    fn has_room(&self) -> bool {
        self.capacity.is_none_or(|cap| self.buffer.len() < cap)
    }
}

impl<T> Channel<T> {
    fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            shared: Rc::new(RefCell::new(Shared {
                buffer: VecDeque::new(),
                capacity,
                closed: false,
                senders: Waiters::default(),
                receivers: Waiters::default(),
            })),
        }
    }

    /// Creates a channel whose senders never suspend on capacity.
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    /// Creates a channel buffering at most `capacity` values. Senders suspend
    /// while it is full.
    #[track_caller]
    pub fn bounded(capacity: usize) -> Self {
        assert!(capacity > 0, "channel capacity must be greater than 0");
        Self::with_capacity(Some(capacity))
    }

    /// Enqueues `value`, suspending while a bounded channel is full.
    ///
    /// Fails with [`Error::ChannelClosed`] once the channel is closed, even
    /// with room in the buffer, and with [`Error::Cancelled`] if the task is
    /// cancelled. In both cases `value` is dropped.
    pub fn send(&self, value: T) -> SendFuture<T> {
        SendFuture {
            channel: self.clone(),
            value: Some(value),
            ticket: None,
        }
    }

    /// Takes the next value in FIFO order, suspending while the channel is
    /// empty and open. Returns `Ok(None)` once it is closed and drained.
    pub fn recv(&self) -> RecvFuture<T> {
        RecvFuture {
            channel: self.clone(),
            ticket: None,
        }
    }

    /// Closes the channel. Values already buffered remain receivable; every
    /// suspended sender fails and every suspended receiver re-checks.
    ///
    /// Returns false if the channel was already closed.
    pub fn close(&self) -> bool {
        let mut shared = self.shared.borrow_mut();
        if shared.closed {
            return false;
        }

        shared.closed = true;
        tracing::trace!(
            buffered = shared.buffer.len(),
            senders = shared.senders.len(),
            receivers = shared.receivers.len(),
            "channel closed"
        );

        shared.senders.wake_all();
        shared.receivers.wake_all();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.shared.borrow().closed
    }

    /// Number of buffered values.
    pub fn len(&self) -> usize {
        self.shared.borrow().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.borrow().buffer.is_empty()
    }

    /// Buffer limit, `None` for unbounded channels.
    pub fn capacity(&self) -> Option<usize> {
        self.shared.borrow().capacity
    }

    /// Consumes the channel as a [`Stream`](futures::Stream) that ends once
    /// it is closed and drained.
    pub fn stream(&self) -> ChannelStream<T> {
        ChannelStream::new(self.clone())
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.shared.borrow();
        f.debug_struct("Channel")
            .field("len", &shared.buffer.len())
            .field("capacity", &shared.capacity)
            .field("closed", &shared.closed)
            .finish()
    }
}

/// Future returned by [`Channel::send`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct SendFuture<T> {
    channel: Channel<T>,
    value: Option<T>,
    ticket: Option<Ticket>,
}

// The value is moved out, never pinned.
impl<T> Unpin for SendFuture<T> {}

impl<T> Future for SendFuture<T> {
    type Output = Result<(), Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        match context::checkpoint() {
            Checkpoint::Proceed => {}
            Checkpoint::Interrupt => return Poll::Ready(Err(Error::Cancelled)),
            Checkpoint::Park => return Poll::Pending,
        }

        let mut shared = this.channel.shared.borrow_mut();

        if shared.closed {
            shared.senders.remove(&mut this.ticket);
            this.value = None;
            return Poll::Ready(Err(Error::ChannelClosed));
        }

        if shared.has_room() && shared.senders.is_turn(this.ticket) {
            let Some(value) = this.value.take() else {
                return Poll::Ready(Ok(()));
            };

            shared.senders.remove(&mut this.ticket);
            shared.buffer.push_back(value);
            shared.receivers.wake_first();

            if shared.has_room() {
                shared.senders.wake_first();
            }
            return Poll::Ready(Ok(()));
        }

        shared.senders.register(&mut this.ticket, cx.waker());
        Poll::Pending
    }
}

impl<T> Drop for SendFuture<T> {
    fn drop(&mut self) {
        if self.ticket.is_none() {
            return;
        }

        let mut shared = self.channel.shared.borrow_mut();
        if shared.senders.remove(&mut self.ticket) && shared.has_room() {
            shared.senders.wake_first();
        }
    }
}

impl<T> fmt::Debug for SendFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendFuture")
            .field("sent", &self.value.is_none())
            .field("ticket", &self.ticket)
            .finish()
    }
}

/// Future returned by [`Channel::recv`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct RecvFuture<T> {
    channel: Channel<T>,
    ticket: Option<Ticket>,
}

impl<T> Unpin for RecvFuture<T> {}

impl<T> Future for RecvFuture<T> {
    type Output = Result<Option<T>, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        match context::checkpoint() {
            Checkpoint::Proceed => {}
            Checkpoint::Interrupt => return Poll::Ready(Err(Error::Cancelled)),
            Checkpoint::Park => return Poll::Pending,
        }

        let mut shared = this.channel.shared.borrow_mut();

        // Closed and drained: everyone sees the end of the stream.
        if shared.closed && shared.buffer.is_empty() {
            shared.receivers.remove(&mut this.ticket);
            return Poll::Ready(Ok(None));
        }

        if shared.receivers.is_turn(this.ticket)
            && let Some(value) = shared.buffer.pop_front()
        {
            shared.receivers.remove(&mut this.ticket);
            shared.senders.wake_first();

            if !shared.buffer.is_empty() || shared.closed {
                shared.receivers.wake_first();
            }
            return Poll::Ready(Ok(Some(value)));
        }

        shared.receivers.register(&mut this.ticket, cx.waker());
        Poll::Pending
    }
}

impl<T> Drop for RecvFuture<T> {
    fn drop(&mut self) {
        if self.ticket.is_none() {
            return;
        }

        // Pass the turn on if a value or end-of-stream was waiting for us.
        let mut shared = self.channel.shared.borrow_mut();
        if shared.receivers.remove(&mut self.ticket) && (!shared.buffer.is_empty() || shared.closed) {
            shared.receivers.wake_first();
        }
    }
}

impl<T> fmt::Debug for RecvFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecvFuture")
            .field("ticket", &self.ticket)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate as spindle;
    use crate::Scope;
    use crate::time::{self, sleep};
    use anyhow::Result;
    use rstest::rstest;
    use static_assertions::assert_not_impl_any;
    use std::time::Duration;

    assert_not_impl_any!(Channel<u32>: Send, Sync);

    #[rstest]
    #[case::empty(0)]
    #[case::partial(2)]
    #[case::full(4)]
    #[spindle::test]
    async fn test_send_on_closed_channel_fails(#[case] buffered: usize) -> Result<()> {
        let channel = Channel::bounded(4);
        for i in 0..buffered {
            channel.send(i).await?;
        }

        assert!(channel.close());
        assert!(!channel.close());

        assert!(matches!(channel.send(99).await, Err(Error::ChannelClosed)));
        assert_eq!(channel.len(), buffered);
        Ok(())
    }

    #[rstest]
    #[case::unbounded(None)]
    #[case::bounded(Some(8))]
    #[spindle::test]
    async fn test_drain_before_close(#[case] capacity: Option<usize>) -> Result<()> {
        let channel = capacity.map_or_else(Channel::unbounded, Channel::bounded);
        for i in 0..5 {
            channel.send(i).await?;
        }
        channel.close();

        let mut received = Vec::new();
        while let Some(value) = channel.recv().await? {
            received.push(value);
        }

        assert_eq!(received, [0, 1, 2, 3, 4]);
        // End of stream is sticky.
        assert_eq!(channel.recv().await?, None);
        Ok(())
    }

    #[spindle::test]
    async fn test_messages_received_in_order(scope: Scope) -> Result<()> {
        let channel = Channel::unbounded();

        let tx = channel.clone();
        scope.launch(move |_| async move {
            for i in 0..3 {
                tx.send(format!("Message {i}")).await?;
                sleep(Duration::from_millis(10)).await?;
            }
            tx.close();
            Ok::<_, Error>(())
        });

        let mut received = Vec::new();
        while let Some(message) = channel.recv().await? {
            received.push(message);
        }

        assert_eq!(received, ["Message 0", "Message 1", "Message 2"]);
        Ok(())
    }

    #[spindle::test]
    async fn test_bounded_send_suspends_while_full(scope: Scope) -> Result<()> {
        let channel = Channel::bounded(1);

        let tx = channel.clone();
        let producer = scope.async_(move |_| async move {
            let mut sent_at = Vec::new();
            for i in 0..3 {
                tx.send(i).await?;
                sent_at.push(time::now()?);
            }
            tx.close();
            Ok::<_, Error>(sent_at)
        });

        let mut received = Vec::new();
        while let Some(value) = channel.recv().await? {
            received.push(value);
            sleep(Duration::from_millis(10)).await?;
        }

        assert_eq!(received, [0, 1, 2]);
        assert_eq!(
            producer.await?,
            [Duration::ZERO, Duration::ZERO, Duration::from_millis(10)]
        );
        Ok(())
    }

    #[spindle::test]
    async fn test_racing_receivers_served_in_arrival_order(scope: Scope) -> Result<()> {
        let channel = Channel::unbounded();

        let receivers = (0..3)
            .map(|_| {
                let rx = channel.clone();
                scope.async_(move |_| async move { rx.recv().await })
            })
            .collect::<Vec<_>>();

        // Let every receiver suspend before anything is sent.
        sleep(Duration::from_millis(1)).await?;
        for value in ["a", "b", "c"] {
            channel.send(value).await?;
        }

        for (receiver, expected) in receivers.iter().zip(["a", "b", "c"]) {
            assert_eq!(receiver.wait().await?, Some(expected));
        }
        Ok(())
    }

    #[spindle::test]
    async fn test_close_wakes_suspended_sides(scope: Scope) -> Result<()> {
        let channel = Channel::<u32>::bounded(1);
        channel.send(1).await?;

        let tx = channel.clone();
        let sender = scope.async_(move |_| async move { Ok::<_, Error>(tx.send(2).await) });

        let empty = Channel::<u32>::unbounded();
        let rx = empty.clone();
        let receiver = scope.async_(move |_| async move { rx.recv().await });

        sleep(Duration::from_millis(1)).await?;
        channel.close();
        empty.close();

        assert!(matches!(sender.await?, Err(Error::ChannelClosed)));
        assert_eq!(receiver.await?, None);
        assert_eq!(channel.recv().await?, Some(1));
        Ok(())
    }

    #[spindle::test]
    async fn test_cancelled_receiver_passes_turn(scope: Scope) -> Result<()> {
        let channel = Channel::unbounded();

        let rx = channel.clone();
        let first = scope.launch(move |_| async move {
            rx.recv().await?;
            Ok::<_, Error>(())
        });

        let rx = channel.clone();
        let second = scope.async_(move |_| async move { rx.recv().await });

        sleep(Duration::from_millis(1)).await?;
        first.cancel();
        channel.send(7).await?;

        assert!(matches!(first.join().await, Err(Error::Cancelled)));
        assert_eq!(second.await?, Some(7));
        Ok(())
    }
}
