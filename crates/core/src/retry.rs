#![forbid(unsafe_code)]

use std::time::Duration;

/// Bounded retry budget shared by "is the existing backend live?" (one attempt) and
/// "wait for the backend we just spawned" (many attempts).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    interval: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

    /// `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    pub fn single() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS, Self::DEFAULT_INTERVAL)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    Succeeded { value: T, attempts: u32 },
    Exhausted { attempts: u32 },
}

impl<T> RetryOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Succeeded { attempts, .. } | Self::Exhausted { attempts } => *attempts,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Succeeded { value, .. } => Some(value),
            Self::Exhausted { .. } => None,
        }
    }
}

/// Runs `attempt` up to `policy.max_attempts()` times and stops at the first `Some`.
///
/// `sleep` is called between attempts only, never after the final one, so a single-attempt
/// policy returns without any delay.
pub fn retry_until<T, A, S>(policy: RetryPolicy, mut sleep: S, mut attempt: A) -> RetryOutcome<T>
where
    A: FnMut(u32) -> Option<T>,
    S: FnMut(Duration),
{
    for n in 1..=policy.max_attempts {
        if let Some(value) = attempt(n) {
            return RetryOutcome::Succeeded { value, attempts: n };
        }
        if n < policy.max_attempts {
            sleep(policy.interval);
        }
    }
    RetryOutcome::Exhausted {
        attempts: policy.max_attempts,
    }
}
