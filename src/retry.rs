//! Retry logic with exponential backoff
//!
//! Every fetch moves through an explicit attempt lifecycle:
//!
//! ```text
//! Pending -> Attempting(1) -> Attempting(2) -> ... -> Succeeded | Failed
//! ```
//!
//! A transient failure moves `Attempting(n)` to `Attempting(n + 1)` after a backoff delay,
//! as long as `n < max_attempts`. A permanent failure, or a transient failure on the last
//! attempt, moves straight to `Failed`. Delays grow by `backoff_multiplier`, are capped at
//! `max_delay`, and can be jittered so parallel workers do not retry in lockstep.

use crate::config::RetryConfig;
use crate::error::FetchError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, rate limiting, connection reset, 5xx) should return `true`.
/// Permanent failures (access denied, not found, local storage failure) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

/// Position of one task in its attempt lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptState {
    /// Not attempted yet
    Pending,
    /// Attempt `n` (1-based) is in flight
    Attempting(u32),
    /// An attempt succeeded
    Succeeded {
        /// Attempts used, including the successful one
        attempts: u32,
    },
    /// No further attempts will be made
    Failed {
        /// Attempts used
        attempts: u32,
    },
}

impl AttemptState {
    /// Whether the lifecycle has ended
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptState::Succeeded { .. } | AttemptState::Failed { .. }
        )
    }

    /// Attempts started so far
    pub fn attempts(&self) -> u32 {
        match *self {
            AttemptState::Pending => 0,
            AttemptState::Attempting(n) => n,
            AttemptState::Succeeded { attempts } | AttemptState::Failed { attempts } => attempts,
        }
    }

    /// Transition taken when the current attempt fails
    ///
    /// Returns the next state: another attempt if the failure is retryable and the
    /// budget allows it, `Failed` otherwise.
    pub fn on_failure(self, retryable: bool, max_attempts: u32) -> AttemptState {
        let attempts = self.attempts();
        if retryable && attempts < max_attempts {
            AttemptState::Attempting(attempts + 1)
        } else {
            AttemptState::Failed { attempts }
        }
    }

    /// Transition taken when the current attempt succeeds
    pub fn on_success(self) -> AttemptState {
        AttemptState::Succeeded {
            attempts: self.attempts(),
        }
    }
}

/// Result of driving an operation through the attempt lifecycle
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// Final value or the last error
    pub result: Result<T, E>,
    /// Terminal state reached
    pub state: AttemptState,
}

/// Execute an async operation with exponential backoff retry logic
///
/// `config.max_attempts` bounds the total number of calls to `operation`, including
/// the first. Only errors for which [`IsRetryable::is_retryable`] returns true are retried.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut state = AttemptState::Pending;
    let mut delay = config.initial_delay.min(config.max_delay);

    loop {
        state = match state {
            AttemptState::Pending => AttemptState::Attempting(1),
            other => other,
        };
        let attempt = state.attempts();

        match operation(attempt).await {
            Ok(value) => {
                let state = state.on_success();
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "operation succeeded after retry");
                }
                return RetryOutcome {
                    result: Ok(value),
                    state,
                };
            }
            Err(e) => {
                let retryable = e.is_retryable();
                match state.on_failure(retryable, max_attempts) {
                    next @ AttemptState::Attempting(_) => {
                        let wait = if config.jitter {
                            add_jitter(delay, config.max_delay)
                        } else {
                            delay
                        };

                        tracing::warn!(
                            error = %e,
                            attempt,
                            max_attempts,
                            delay_ms = wait.as_millis() as u64,
                            "operation failed, retrying"
                        );

                        tokio::time::sleep(wait).await;
                        delay = next_delay(delay, config);
                        state = next;
                    }
                    terminal => {
                        if retryable {
                            tracing::warn!(
                                error = %e,
                                attempts = attempt,
                                "operation failed after all attempts"
                            );
                        } else {
                            tracing::debug!(error = %e, "operation failed with non-retryable error");
                        }
                        return RetryOutcome {
                            result: Err(e),
                            state: terminal,
                        };
                    }
                }
            }
        }
    }
}

/// Delay before the attempt following one that waited `current`
///
/// Never shrinks and never exceeds `max_delay`, whatever the multiplier.
fn next_delay(current: Duration, config: &RetryConfig) -> Duration {
    scale(current, config.backoff_multiplier, config.max_delay).max(current.min(config.max_delay))
}

/// Add random jitter to a delay
///
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the
/// actual delay lies between `delay` and `2 * delay`, capped at `max_delay`.
fn add_jitter(delay: Duration, max_delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    scale(delay, 1.0 + jitter_factor, max_delay).max(delay.min(max_delay))
}

/// `delay * factor`, saturating at `max_delay`; a negative or NaN factor gives zero
fn scale(delay: Duration, factor: f64, max_delay: Duration) -> Duration {
    match Duration::try_from_secs_f64(delay.as_secs_f64() * factor) {
        Ok(scaled) => scaled.min(max_delay),
        Err(_) if factor > 0.0 => max_delay,
        Err(_) => Duration::ZERO,
    }
}
