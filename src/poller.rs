use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::FetchError;

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(300);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 40;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Found { value: T, attempts: u32 },
    NotFound { attempts: u32 },
}

impl<T> PollOutcome<T> {
    pub fn into_result(self) -> Result<T, FetchError> {
        match self {
            PollOutcome::Found { value, .. } => Ok(value),
            PollOutcome::NotFound { attempts } => Err(FetchError::PollTimeout { attempts }),
        }
    }
}

/// Retries an extraction at a fixed interval, at most `max_attempts` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poller {
    interval: Duration,
    max_attempts: u32,
}

impl Default for Poller {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl Poller {
    /// `max_attempts` is clamped to at least one so the poll always ends.
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Errors from a single attempt count as a miss.
    pub fn poll<T, F>(&self, mut extract: F) -> PollOutcome<T>
    where
        F: FnMut() -> Result<Option<T>, FetchError>,
    {
        let mut attempts = 0;
        loop {
            thread::sleep(self.interval);
            attempts += 1;
            match extract() {
                Ok(Some(value)) => {
                    debug!(attempts, "poll succeeded");
                    return PollOutcome::Found { value, attempts };
                }
                Ok(None) => {}
                Err(err) => warn!(attempt = attempts, error = %err, "poll attempt failed"),
            }
            if attempts >= self.max_attempts {
                return PollOutcome::NotFound { attempts };
            }
        }
    }
}
