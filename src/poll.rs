//! Generic wait-until-terminal polling primitive.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use crate::progress::Progress;

/// Outcome of a single poll observation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PollStep<T> {
    /// The resource reached a terminal state; stop polling.
    Complete(T),
    /// Not there yet; report `note` with elapsed time and poll again.
    Wait {
        /// Status line describing what is being waited on.
        note: String,
    },
}

/// Repeatedly observes a resource until it reaches a terminal state.
///
/// The poller itself never times out: callers that need a deadline wrap
/// [`Poller::run`] in [`tokio::time::timeout`], and cancellation takes
/// effect at the sleep boundary when the future is dropped.
pub struct Poller<'a> {
    interval: Duration,
    progress: &'a dyn Progress,
}

impl<'a> Poller<'a> {
    /// Creates a poller that sleeps `interval` between observations.
    #[must_use]
    pub fn new(interval: Duration, progress: &'a dyn Progress) -> Self {
        Self { interval, progress }
    }

    /// Runs `observe` until it yields [`PollStep::Complete`] or an error.
    ///
    /// An error from `observe` ends the loop immediately: a failed describe
    /// call is a failure, not a "not yet ready" signal.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by `observe`.
    pub async fn run<T, E, F, Fut>(&self, mut observe: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<PollStep<T>, E>>,
    {
        let mut elapsed = Duration::ZERO;
        loop {
            match observe().await? {
                PollStep::Complete(value) => return Ok(value),
                PollStep::Wait { note } => {
                    self.progress
                        .say(&format!("{note} (elapsed: {}s)", elapsed.as_secs()));
                    sleep(self.interval).await;
                    elapsed += self.interval;
                }
            }
        }
    }
}
