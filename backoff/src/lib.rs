//! Retries an async [`Operation`] on a backoff schedule until it succeeds, hits an error the
//! [`Condition`] rejects, runs out of backoff, or the attached cancellation token fires.

use std::future::Future;

/// Retry future and its error type.
pub mod retry;

/// Backoff schedules, expressed as iterators of [`std::time::Duration`].
pub mod strategy;

/// An operation that can be started any number of times, each run producing a fresh future.
pub trait Operation {
    type Future: Future<Output = Result<Self::Item, Self::Error>>;
    type Item;
    type Error;

    fn run(&mut self) -> Self::Future;
}

impl<I, E, T, F> Operation for F
where
    T: Future<Output = Result<I, E>>,
    F: FnMut() -> T,
{
    type Future = T;
    type Item = I;
    type Error = E;

    fn run(&mut self) -> Self::Future {
        self()
    }
}

/// Decides whether a failed run should be retried.
pub trait Condition<E> {
    fn can_retry(&mut self, error: &E) -> bool;
}

impl<E, F> Condition<E> for F
where
    F: FnMut(&E) -> bool,
{
    fn can_retry(&mut self, error: &E) -> bool {
        self(error)
    }
}
