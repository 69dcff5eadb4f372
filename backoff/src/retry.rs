use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use pin_project::pin_project;
use tokio::time::{Instant, Sleep, sleep_until};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::{Condition, Operation};

/// Why a [`Retry`] gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The operation failed with an error the condition would not retry, or the backoff ran out.
    /// Carries the last error.
    Failed(E),
    /// The cancellation token fired before the operation succeeded.
    Cancelled,
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Failed(e) => write!(f, "retry failed: {e}"),
            RetryError::Cancelled => write!(f, "retry cancelled"),
        }
    }
}

impl<E: std::error::Error> std::error::Error for RetryError<E> {}

/// A retry is either running the [`Operation`] or cooling off between runs. Cancellation is
/// checked on every poll, in both states, so a cancelled retry never starts another run:
/// ```no_rust
///                          (Ok) -> [Return(Ok)]*
///      (op)  --(Ready)--  /
///                         \                  (Non-retryable) -> [Return(Failed)]*
///                          (Err) ----------- /
///                                            \                 (None) -> [Return(Failed)]*
///                                             (Retryable) --- /
///                                                             \
///                                                              (Sleep) --(Ready)--> [START(op)]
///
///   (cancelled) at any poll -> [Return(Cancelled)]*
/// ```
#[pin_project(project = RetryStateProj)]
enum RetryState<O>
where
    O: Operation,
{
    Running(#[pin] O::Future),
    Sleeping(#[pin] Sleep),
}

/// Retry retries an operation based on the backoff strategy until it succeeds, fails for good,
/// or is cancelled.
#[pin_project]
pub struct Retry<I, O, C>
where
    O: Operation,
{
    #[pin]
    retry_state: RetryState<O>,
    #[pin]
    cancelled: WaitForCancellationFutureOwned,
    backoff: I,
    operation: O,
    condition: C,
}

impl<I, O, C> Retry<I, O, C>
where
    I: Iterator<Item = Duration>,
    O: Operation,
    C: Condition<O::Error>,
{
    /// Starts the first run immediately. The returned future is never cancelled unless
    /// [`Retry::with_cancellation`] attaches a token.
    pub fn new<II: IntoIterator<IntoIter = I, Item = I::Item>>(
        backoff: II,
        mut operation: O,
        condition: C,
    ) -> Self {
        Self {
            retry_state: RetryState::Running(operation.run()),
            cancelled: CancellationToken::new().cancelled_owned(),
            backoff: backoff.into_iter(),
            condition,
            operation,
        }
    }

    /// Abandons the retry with [`RetryError::Cancelled`] once `token` is cancelled, even in the
    /// middle of a run or a cool-off.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancelled = token.cancelled_owned();
        self
    }

    /// cools off before the next retry by doing a sleep on period determined by the backoff
    fn cool_off(mut self: Pin<&mut Self>, err: O::Error) -> Result<(), O::Error> {
        match self.as_mut().project().backoff.next() {
            // ran out of backoff, return the same error
            None => Err(err),
            Some(duration) => {
                let till = sleep_until(Instant::now() + duration);
                self.as_mut()
                    .project()
                    .retry_state
                    .set(RetryState::Sleeping(till));
                Ok(())
            }
        }
    }

    /// reattempts to run the [`Operation`] again.
    fn reattempt(mut self: Pin<&mut Self>) {
        let future = {
            let this = self.as_mut().project();
            this.operation.run()
        };
        self.as_mut()
            .project()
            .retry_state
            .set(RetryState::Running(future));
    }
}

impl<I, O, C> Future for Retry<I, O, C>
where
    I: Iterator<Item = Duration>,
    O: Operation,
    C: Condition<O::Error>,
{
    type Output = Result<O::Item, RetryError<O::Error>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.as_mut().project().cancelled.poll(cx).is_ready() {
            return Poll::Ready(Err(RetryError::Cancelled));
        }

        match self.as_mut().project().retry_state.project() {
            RetryStateProj::Running(op) => match op.poll(cx) {
                Poll::Ready(Ok(item)) => Poll::Ready(Ok(item)),
                Poll::Ready(Err(e)) => {
                    if !self.as_mut().project().condition.can_retry(&e) {
                        return Poll::Ready(Err(RetryError::Failed(e)));
                    }
                    match self.as_mut().cool_off(e) {
                        Ok(_) => self.as_mut().poll(cx),
                        Err(e) => Poll::Ready(Err(RetryError::Failed(e))),
                    }
                }
                Poll::Pending => Poll::Pending,
            },
            RetryStateProj::Sleeping(sleep) => match sleep.poll(cx) {
                Poll::Ready(_) => {
                    self.as_mut().reattempt();
                    self.poll(cx)
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}
