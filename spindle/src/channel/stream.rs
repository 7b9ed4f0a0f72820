use crate::channel::{Channel, RecvFuture};
use crate::error::Error;
use futures::Stream;
use futures::stream::FusedStream;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

/// [`Stream`] over the values of a [`Channel`], created by
/// [`Channel::stream`].
///
/// Yields every value exactly once in FIFO order and ends when the channel is
/// closed and drained. An error (cancellation of the consuming task) is
/// yielded once and ends the stream.
#[must_use = "streams do nothing unless polled"]
pub struct ChannelStream<T> {
    channel: Channel<T>,

    // Pending receive, kept across polls to hold our place in line.
    recv: Option<RecvFuture<T>>,

    done: bool,
}

impl<T> ChannelStream<T> {
    pub(crate) fn new(channel: Channel<T>) -> Self {
        Self {
            channel,
            recv: None,
            done: false,
        }
    }
}

impl<T> Unpin for ChannelStream<T> {}

impl<T> Stream for ChannelStream<T> {
    type Item = Result<T, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.done {
            return Poll::Ready(None);
        }

        let recv = this.recv.get_or_insert_with(|| this.channel.recv());
        let res = ready!(Pin::new(recv).poll(cx));
        this.recv = None;

        match res {
            Ok(Some(value)) => Poll::Ready(Some(Ok(value))),
            Ok(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Err(err) => {
                this.done = true;
                Poll::Ready(Some(Err(err)))
            }
        }
    }
}

impl<T> FusedStream for ChannelStream<T> {
    fn is_terminated(&self) -> bool {
        self.done
    }
}

impl<T> fmt::Debug for ChannelStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelStream")
            .field("channel", &self.channel)
            .field("done", &self.done)
            .finish()
    }
}
