use std::future::Future;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use futures::Stream;
use tokio::time::Sleep;

use crate::Result;

/// Leading and trailing throttle.
///
/// The first value of a quiet period passes through at once and opens a
/// window of length `window`. Values arriving inside the window collapse into
/// the latest one, which is emitted when the window closes and opens the next
/// window. A pending value is flushed when the upstream completes. Errors pass
/// through immediately and end the stream.
pub fn throttle<S, T>(
    upstream: S,
    window: Duration,
) -> Throttle<S, T>
where
    S: Stream<Item = Result<T>> + Unpin,
{
    Throttle {
        upstream,
        window,
        timer: None,
        pending: None,
        terminated: false,
    }
}

pub struct Throttle<S, T> {
    upstream: S,
    window: Duration,
    timer: Option<Pin<Box<Sleep>>>,
    pending: Option<T>,
    terminated: bool,
}

impl<S, T> Throttle<S, T> {
    fn open_window(&mut self) {
        self.timer = Some(Box::pin(tokio::time::sleep(self.window)));
    }

    fn terminate(&mut self) {
        self.terminated = true;
        self.timer = None;
        self.pending = None;
    }
}

impl<S, T> Stream for Throttle<S, T>
where
    S: Stream<Item = Result<T>> + Unpin,
    T: Unpin,
{
    type Item = Result<T>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.terminated {
            return Poll::Ready(None);
        }

        loop {
            match Pin::new(&mut this.upstream).poll_next(cx) {
                Poll::Ready(Some(Ok(value))) => {
                    if this.timer.is_none() {
                        this.open_window();
                        return Poll::Ready(Some(Ok(value)));
                    }
                    this.pending = Some(value);
                    continue;
                }
                Poll::Ready(Some(Err(e))) => {
                    this.terminate();
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    let trailing = this.pending.take();
                    this.terminate();
                    return Poll::Ready(trailing.map(Ok));
                }
                Poll::Pending => {}
            }

            let Some(timer) = this.timer.as_mut() else {
                return Poll::Pending;
            };
            if timer.as_mut().poll(cx).is_pending() {
                return Poll::Pending;
            }
            this.timer = None;
            if let Some(value) = this.pending.take() {
                this.open_window();
                return Poll::Ready(Some(Ok(value)));
            }
        }
    }
}
