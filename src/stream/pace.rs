//! Stream pacing utilities

use futures::{Stream, ready};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Interval, interval};

/// Extension trait to add pacing to any Stream
pub trait PaceExt: Stream {
    /// Pace the stream to emit at most once per interval
    ///
    /// Unlike a throttle, items are never dropped - one item is buffered
    /// and emission waits for the next tick. Audio blocks arriving in a
    /// burst therefore play out at the real-time rate.
    fn pace(self, duration: Duration) -> Pace<Self>
    where
        Self: Sized,
    {
        Pace::new(self, duration)
    }
}

impl<T: Stream> PaceExt for T {}

pin_project! {
    /// A stream combinator that spaces emissions one interval apart
    pub struct Pace<S: Stream> {
        #[pin]
        stream: S,
        interval: Interval,
        pending: Option<S::Item>,
    }
}

impl<S: Stream> Pace<S> {
    /// Create a new paced stream
    pub fn new(stream: S, duration: Duration) -> Self {
        let mut interval = interval(duration);
        // Set missed tick behavior to delay (don't burst)
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        Self { stream, interval, pending: None }
    }
}

impl<S: Stream> Stream for Pace<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        // Buffer one item ahead of the tick
        if this.pending.is_none() {
            match this.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => *this.pending = Some(item),
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => {}
            }
        }

        if this.pending.is_some() {
            ready!(this.interval.poll_tick(cx));
            return Poll::Ready(this.pending.take());
        }
        Poll::Pending
    }
}
