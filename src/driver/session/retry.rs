// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::result::Result as StdResult;
use std::thread::sleep;
use std::time::{Duration, Instant};

use log::warn;
use rand::Rng;
use thiserror::Error;

use crate::driver::config::{
    DEFAULT_MAX_RETRY_TIME, DEFAULT_RETRY_DELAY_INITIAL, DEFAULT_RETRY_DELAY_MAX,
    DEFAULT_RETRY_DELAY_MULTIPLIER,
};
use crate::error_::{DriverError, Result};

// imports for docs
#[allow(unused)]
use crate::driver::session::TransactionBuilder;

/// Specifies how to retry work.
///
/// The driver uses this trait in [`TransactionBuilder::run_with_retry()`].
/// A default implementation is provided through [`ExponentialBackoff`].
pub trait RetryPolicy {
    type Error;

    fn execute<R>(&self, work: impl FnMut() -> Result<R>) -> StdResult<R, Self::Error>;
}

/// [`RetryPolicy`] that retries work with exponential backoff.
///
/// The pause between attempts starts at the initial delay and is multiplied
/// by the configured factor after every failure (clamped at the maximum
/// delay), with a random jitter applied on top. The policy gives up when the
/// total time since the end of the first attempt exceeds the maximum retry
/// time.
///
/// The policy will return [`RetryError::DriverError`] if the work function
/// returns a non-retryable error and [`RetryError::Timeout`] when the
/// maximum retry time is exceeded.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_retry_time: Duration,
    factor: f64,
    max_delay: Duration,
    jitter: f64,
}

impl Default for ExponentialBackoff {
    #[inline]
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_RETRY_DELAY_INITIAL,
            max_retry_time: DEFAULT_MAX_RETRY_TIME,
            factor: DEFAULT_RETRY_DELAY_MULTIPLIER,
            max_delay: DEFAULT_RETRY_DELAY_MAX,
            jitter: 0.2,
        }
    }
}

impl ExponentialBackoff {
    /// Create a new exponential backoff policy with default settings.
    ///
    /// Same as [`ExponentialBackoff::default()`].
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Change for how long the policy will retry, before giving up.
    #[inline]
    pub fn with_max_retry_time(self, max_retry_time: Duration) -> Self {
        Self {
            max_retry_time,
            ..self
        }
    }

    pub(crate) fn with_delays(
        self,
        initial_delay: Duration,
        factor: f64,
        max_delay: Duration,
    ) -> Self {
        Self {
            initial_delay,
            factor,
            max_delay,
            ..self
        }
    }

    fn delays(&self) -> DelaySequence {
        assert!(self.jitter >= 0.0);
        assert!(self.jitter < 1.0);
        assert!(self.initial_delay > Duration::ZERO);
        DelaySequence {
            next_delay: self.initial_delay.as_secs_f64(),
            factor: self.factor,
            max_delay: self.max_delay.as_secs_f64(),
            jitter: self.jitter,
        }
    }
}

/// The growing, jittered pauses between attempts.
struct DelaySequence {
    next_delay: f64,
    factor: f64,
    max_delay: f64,
    jitter: f64,
}

impl DelaySequence {
    fn next(&mut self) -> Duration {
        let jitter = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        let delay = self.next_delay * jitter;
        self.next_delay = (self.next_delay * self.factor).min(self.max_delay);
        Duration::try_from_secs_f64(delay).unwrap_or(Duration::MAX)
    }
}

impl RetryPolicy for &ExponentialBackoff {
    type Error = RetryError;

    fn execute<R>(&self, mut work: impl FnMut() -> Result<R>) -> StdResult<R, Self::Error> {
        let mut delays = self.delays();
        let mut give_up_at: Option<Instant> = None;
        let mut errors: Vec<DriverError> = Vec::new();
        loop {
            let err = match work() {
                Err(err) if err.is_retryable() => err,
                outcome => return outcome.map_err(Into::into),
            };
            errors.push(err);
            // the clock starts ticking when the first attempt fails
            let give_up_at = *give_up_at.get_or_insert_with(|| Instant::now() + self.max_retry_time);
            if Instant::now() >= give_up_at {
                return Err(TimeoutError { errors }.into());
            }
            let delay = delays.next();
            warn!(
                "transaction failed and will be retried in {:.4} seconds: {}",
                delay.as_secs_f64(),
                errors.last().expect("just pushed an error")
            );
            sleep(delay);
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    type Error = <&'static ExponentialBackoff as RetryPolicy>::Error;

    fn execute<R>(&self, work: impl FnMut() -> Result<R>) -> StdResult<R, Self::Error> {
        (&self).execute(work)
    }
}

/// Error type that can be returned by [`RetryPolicy::execute()`] to indicate
/// whether the work failed with a non-retryable error or a timeout occurred
/// while retrying.
#[derive(Error, Debug)]
pub enum RetryError {
    /// The work failed with a non-retryable driver error.
    #[error("non-retryable error occurred: {0}")]
    DriverError(#[from] DriverError),
    /// A timeout occurred while retrying.
    #[error("{0}")]
    Timeout(#[from] TimeoutError),
}

/// Used to indicate that a retry loop timed out.
///
/// All errors encountered during the retry loop are collected and can be
/// accessed through [`TimeoutError::errors`].
#[derive(Error, Debug)]
#[error("timeout occurred while retrying; last error: {}", .errors.last().unwrap())]
pub struct TimeoutError {
    /// Errors encountered during the retry loop.
    pub errors: Vec<DriverError>,
}

impl From<TimeoutError> for Vec<DriverError> {
    fn from(value: TimeoutError) -> Self {
        value.errors
    }
}

impl From<RetryError> for DriverError {
    fn from(value: RetryError) -> Self {
        match value {
            RetryError::DriverError(err) => err,
            RetryError::Timeout(mut err) => err
                .errors
                .pop()
                .expect("timeout errors always contain at least one error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retryable_error() -> DriverError {
        DriverError::disconnect("synthetic transport failure")
    }

    fn non_retryable_error() -> DriverError {
        DriverError::invalid_argument("synthetic usage error")
    }

    fn quick_policy() -> ExponentialBackoff {
        ExponentialBackoff::new()
            .with_max_retry_time(Duration::from_millis(50))
            .with_delays(Duration::from_millis(1), 2.0, Duration::from_millis(2))
    }

    #[test]
    fn returns_first_success() {
        let mut count = 0;
        let res: StdResult<i32, _> = quick_policy().execute(|| {
            count += 1;
            Ok(42)
        });
        assert_eq!(res.unwrap(), 42);
        assert_eq!(count, 1);
    }

    #[test]
    fn retries_retryable_errors() {
        let mut count = 0;
        let res = quick_policy().execute(|| {
            count += 1;
            if count < 3 {
                Err(retryable_error())
            } else {
                Ok(count)
            }
        });
        assert_eq!(res.unwrap(), 3);
    }

    #[test]
    fn does_not_retry_non_retryable_errors() {
        let mut count = 0;
        let res: StdResult<(), _> = quick_policy().execute(|| {
            count += 1;
            Err(non_retryable_error())
        });
        assert!(matches!(res, Err(RetryError::DriverError(_))));
        assert_eq!(count, 1);
    }

    #[test]
    fn gives_up_after_max_retry_time() {
        let res: StdResult<(), _> = quick_policy().execute(|| Err(retryable_error()));
        let Err(RetryError::Timeout(timeout)) = res else {
            panic!("expected timeout error");
        };
        assert!(timeout.errors.len() > 1);
    }

    #[test]
    fn delays_grow_but_stay_clamped() {
        let mut delays = quick_policy().delays();
        let first = delays.next();
        assert!(first <= Duration::from_millis(2));
        for _ in 0..10 {
            delays.next();
        }
        // 0.2 jitter on top of the 2ms clamp
        assert!(delays.next() <= Duration::from_micros(2400));
    }
}
