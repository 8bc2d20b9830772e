//! Polling with exponential backoff until a produced value is accepted.
//!
//! [`Retry::run`] calls a producer, hands its output to an [`Acceptance`]
//! check and sleeps between attempts. Producer errors are split by
//! [`Transient`]: transient ones mean "not there yet" and are retried, anything
//! else ends the loop immediately.

use std::fmt;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

/// Classifies errors that may go away by waiting
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// How long to keep polling
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timeout {
    /// Poll until accepted or a fatal error occurs
    Unbounded,
    After(Duration),
}

impl Timeout {
    /// Interpret a timeout in seconds, where `0` means no timeout
    pub fn from_secs_f64(secs: f64) -> Result<Self, InvalidTimeout> {
        if secs.is_nan() || secs < 0.0 {
            return Err(InvalidTimeout(secs));
        }
        if secs == 0.0 {
            return Ok(Timeout::Unbounded);
        }
        // Anything too large for a Duration never expires anyway
        Ok(Duration::try_from_secs_f64(secs).map_or(Timeout::Unbounded, Timeout::After))
    }

    fn deadline(self, start: Instant) -> Option<Instant> {
        match self {
            Timeout::Unbounded => None,
            Timeout::After(duration) => start.checked_add(duration),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, thiserror::Error)]
#[error("timeout must be a non-negative number of seconds, got {0}")]
pub struct InvalidTimeout(pub f64);

/// Backoff schedule and overall deadline
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub timeout: Timeout,
    /// Sleep after the first failed attempt is `base_delay * 2`
    pub base_delay: Duration,
    /// Upper bound for a single sleep, if any
    pub max_delay: Option<Duration>,
}

impl RetryPolicy {
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(50);

    pub fn new(timeout: Timeout) -> Self {
        Self {
            timeout,
            base_delay: Self::DEFAULT_BASE_DELAY,
            max_delay: None,
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Sleep before the attempt following backoff step `exponent` (1-based)
    pub fn delay_for(&self, exponent: u32) -> Duration {
        let delay = 2u32
            .checked_pow(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Timeout::Unbounded)
    }
}

/// Why a produced value was not accepted
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejection {
    reason: String,
}

impl Rejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Decides whether a produced value ends the polling loop
pub trait Acceptance<T> {
    fn check(&mut self, value: &T) -> Result<(), Rejection>;
}

/// Accepts values for which the closure returns `true`
pub struct Predicate<F>(pub F);

impl<T, F> Acceptance<T> for Predicate<F>
where
    F: FnMut(&T) -> bool,
{
    fn check(&mut self, value: &T) -> Result<(), Rejection> {
        if (self.0)(value) {
            Ok(())
        } else {
            Err(Rejection::new("predicate returned false"))
        }
    }
}

/// Accepts values for which the closure returns `Ok`; the error becomes the
/// rejection reason
pub struct Assertion<F, E> {
    check: F,
    _error: PhantomData<fn() -> E>,
}

impl<F, E> Assertion<F, E> {
    pub fn new(check: F) -> Self {
        Self {
            check,
            _error: PhantomData,
        }
    }
}

impl<T, F, E> Acceptance<T> for Assertion<F, E>
where
    F: FnMut(&T) -> Result<(), E>,
    E: fmt::Display,
{
    fn check(&mut self, value: &T) -> Result<(), Rejection> {
        (self.check)(value).map_err(|err| Rejection::new(err.to_string()))
    }
}

/// Progress notifications from a polling loop
pub enum RetryEvent<'a> {
    Attempt {
        attempt: u32,
        elapsed: Duration,
    },
    Rejected {
        attempt: u32,
        rejection: &'a Rejection,
    },
    Transient {
        attempt: u32,
        error: &'a dyn fmt::Display,
    },
    Backoff {
        attempt: u32,
        delay: Duration,
    },
    Accepted {
        attempt: u32,
        elapsed: Duration,
    },
    TimedOut {
        attempts: u32,
        rejections: u32,
        transient_errors: u32,
        elapsed: Duration,
    },
}

pub trait RetryObserver {
    fn on_event(&mut self, event: RetryEvent<'_>);
}

impl<F> RetryObserver for F
where
    F: FnMut(RetryEvent<'_>),
{
    fn on_event(&mut self, event: RetryEvent<'_>) {
        self(event)
    }
}

/// Reports polling progress as `tracing` events
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl RetryObserver for TracingObserver {
    fn on_event(&mut self, event: RetryEvent<'_>) {
        match event {
            RetryEvent::Attempt { attempt, elapsed } => {
                tracing::debug!(attempt, ?elapsed, "polling");
            }
            RetryEvent::Rejected { attempt, rejection } => {
                tracing::debug!(attempt, %rejection, "value not accepted yet");
            }
            RetryEvent::Transient { attempt, error } => {
                tracing::debug!(attempt, %error, "data not ready yet");
            }
            RetryEvent::Backoff { attempt, delay } => {
                tracing::debug!(attempt, ?delay, "backing off");
            }
            RetryEvent::Accepted { attempt, elapsed } => {
                tracing::info!(attempt, ?elapsed, "accepted");
            }
            RetryEvent::TimedOut {
                attempts,
                rejections,
                transient_errors,
                elapsed,
            } => {
                tracing::info!(attempts, rejections, transient_errors, ?elapsed, "timed out");
            }
        }
    }
}

/// Polling loop configured with a [`RetryPolicy`] and a [`RetryObserver`]
pub struct Retry<O = TracingObserver> {
    policy: RetryPolicy,
    observer: O,
}

impl Retry<TracingObserver> {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_observer(policy, TracingObserver)
    }
}

impl<O: RetryObserver> Retry<O> {
    pub fn with_observer(policy: RetryPolicy, observer: O) -> Self {
        Self { policy, observer }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Poll `produce` until `accept` passes, the timeout elapses or `produce`
    /// fails with a non-transient error.
    ///
    /// Returns `Ok(true)` on acceptance and `Ok(false)` on timeout. The first
    /// attempt always runs, even with a zero-length deadline.
    pub fn run<T, E, P, A>(&mut self, mut produce: P, mut accept: A) -> Result<bool, E>
    where
        P: FnMut() -> Result<T, E>,
        A: Acceptance<T>,
        E: Transient + fmt::Display,
    {
        let start = Instant::now();
        let deadline = self.policy.timeout.deadline(start);
        let mut attempts = 0u32;
        let mut rejections = 0u32;
        let mut transient_errors = 0u32;
        let mut exponent = 1u32;

        loop {
            if attempts > 0 && deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                self.observer.on_event(RetryEvent::TimedOut {
                    attempts,
                    rejections,
                    transient_errors,
                    elapsed: start.elapsed(),
                });
                return Ok(false);
            }

            attempts += 1;
            self.observer.on_event(RetryEvent::Attempt {
                attempt: attempts,
                elapsed: start.elapsed(),
            });

            match produce() {
                Ok(value) => match accept.check(&value) {
                    Ok(()) => {
                        self.observer.on_event(RetryEvent::Accepted {
                            attempt: attempts,
                            elapsed: start.elapsed(),
                        });
                        return Ok(true);
                    }
                    Err(rejection) => {
                        rejections += 1;
                        self.observer.on_event(RetryEvent::Rejected {
                            attempt: attempts,
                            rejection: &rejection,
                        });
                    }
                },
                Err(err) if err.is_transient() => {
                    transient_errors += 1;
                    self.observer.on_event(RetryEvent::Transient {
                        attempt: attempts,
                        error: &err,
                    });
                }
                Err(err) => return Err(err),
            }

            let mut delay = self.policy.delay_for(exponent);
            exponent = exponent.saturating_add(1);
            if let Some(deadline) = deadline {
                delay = delay.min(deadline.saturating_duration_since(Instant::now()));
            }
            self.observer.on_event(RetryEvent::Backoff {
                attempt: attempts,
                delay,
            });
            std::thread::sleep(delay);
        }
    }

    /// [`run`](Self::run) with a boolean predicate
    pub fn until<T, E, P, F>(&mut self, produce: P, predicate: F) -> Result<bool, E>
    where
        P: FnMut() -> Result<T, E>,
        F: FnMut(&T) -> bool,
        E: Transient + fmt::Display,
    {
        self.run(produce, Predicate(predicate))
    }

    /// [`run`](Self::run) with an assertion whose error explains the rejection
    pub fn until_asserted<T, E, P, F, R>(&mut self, produce: P, assertion: F) -> Result<bool, E>
    where
        P: FnMut() -> Result<T, E>,
        F: FnMut(&T) -> Result<(), R>,
        R: fmt::Display,
        E: Transient + fmt::Display,
    {
        self.run(produce, Assertion::new(assertion))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("timeout must be a non-negative number of seconds, got {0}")]
    InvalidTimeout(f64),
    #[error("{0}")]
    Fatal(E),
}

impl<E> From<InvalidTimeout> for RetryError<E> {
    fn from(err: InvalidTimeout) -> Self {
        RetryError::InvalidTimeout(err.0)
    }
}

/// Poll `produce` until `predicate` holds or `timeout_secs` elapse (`0`
/// polls forever). Returns whether the predicate was satisfied.
pub fn retry_until<T, E, P, F>(produce: P, predicate: F, timeout_secs: f64) -> Result<bool, RetryError<E>>
where
    P: FnMut() -> Result<T, E>,
    F: FnMut(&T) -> bool,
    E: Transient + fmt::Display,
{
    let policy = RetryPolicy::new(Timeout::from_secs_f64(timeout_secs)?);
    Retry::new(policy).until(produce, predicate).map_err(RetryError::Fatal)
}

/// Like [`retry_until`], with an assertion that explains each rejection
pub fn retry_until_asserted<T, E, P, F, R>(
    produce: P,
    assertion: F,
    timeout_secs: f64,
) -> Result<bool, RetryError<E>>
where
    P: FnMut() -> Result<T, E>,
    F: FnMut(&T) -> Result<(), R>,
    R: fmt::Display,
    E: Transient + fmt::Display,
{
    let policy = RetryPolicy::new(Timeout::from_secs_f64(timeout_secs)?);
    Retry::new(policy)
        .until_asserted(produce, assertion)
        .map_err(RetryError::Fatal)
}
