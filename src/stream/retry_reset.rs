use std::future::Future;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use futures::ready;
use futures::stream::BoxStream;
use futures::Stream;
use tokio::time::Sleep;
use tracing::debug;
use tracing::warn;

use super::Source;
use crate::Error;
use crate::Result;

/// Resubscribes to `source` after each retryable error, forgiving up to
/// `forgive` consecutive failures.
///
/// The failure counter resets on every successful value, so a flaky source
/// that keeps making progress is retried forever. A negative `forgive`
/// retries without limit. Once a failure exceeds the limit, the stream yields
/// [`Error::RetriesExhausted`] carrying the last failure and ends. Errors that
/// are not [retryable](Error::is_retryable) are yielded as they are and end
/// the stream at once.
///
/// Dropping the stream cancels a pending retry timer.
pub fn retry_reset<T>(
    source: Source<T>,
    forgive: i64,
    delay: Duration,
) -> RetryReset<T> {
    let upstream = source();
    RetryReset {
        source,
        forgive,
        delay,
        failures: 0,
        phase: Phase::Active(upstream),
    }
}

pub struct RetryReset<T> {
    source: Source<T>,
    forgive: i64,
    delay: Duration,
    failures: usize,
    phase: Phase<T>,
}

enum Phase<T> {
    Active(BoxStream<'static, Result<T>>),
    Waiting(Pin<Box<Sleep>>),
    Done,
}

impl<T> RetryReset<T> {
    fn forgives(&self) -> bool {
        self.forgive < 0 || self.failures as i64 <= self.forgive
    }
}

impl<T> Stream for RetryReset<T> {
    type Item = Result<T>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match &mut this.phase {
                Phase::Active(upstream) => match ready!(upstream.as_mut().poll_next(cx)) {
                    Some(Ok(value)) => {
                        this.failures = 0;
                        return Poll::Ready(Some(Ok(value)));
                    }
                    Some(Err(e)) if !e.is_retryable() => {
                        debug!(error = %e, "Source failed with a non-retryable error");
                        this.phase = Phase::Done;
                        return Poll::Ready(Some(Err(e)));
                    }
                    Some(Err(e)) => {
                        this.failures += 1;
                        if this.forgives() {
                            debug!(
                                failures = this.failures,
                                delay_ms = this.delay.as_millis() as u64,
                                error = %e,
                                "Source failed; scheduling resubscription"
                            );
                            this.phase = Phase::Waiting(Box::pin(tokio::time::sleep(this.delay)));
                        } else {
                            warn!(failures = this.failures, error = %e, "Giving up on source");
                            this.phase = Phase::Done;
                            return Poll::Ready(Some(Err(Error::RetriesExhausted {
                                attempts: this.failures,
                                source: Box::new(e),
                            })));
                        }
                    }
                    None => {
                        this.phase = Phase::Done;
                        return Poll::Ready(None);
                    }
                },
                Phase::Waiting(timer) => {
                    ready!(timer.as_mut().poll(cx));
                    this.phase = Phase::Active((this.source)());
                }
                Phase::Done => return Poll::Ready(None),
            }
        }
    }
}
