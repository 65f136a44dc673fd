//! Backoff policy for retries within a firing
//!
//! The delay before attempt `n + 1` is derived from the number of the attempt
//! that just failed. Exponential backoff doubles from the base delay
//! (`base * 2^(n-1)`), linear backoff grows by the base delay each attempt.
//! An optional ceiling caps either kind.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How the delay grows between consecutive failed attempts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// `base * 2^(n-1)`
    #[default]
    Exponential,
    /// `base * n`
    Linear,
}

impl fmt::Display for BackoffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffKind::Exponential => write!(f, "exponential"),
            BackoffKind::Linear => write!(f, "linear"),
        }
    }
}

impl FromStr for BackoffKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exponential" => Ok(BackoffKind::Exponential),
            "linear" => Ok(BackoffKind::Linear),
            other => Err(format!("unknown backoff kind '{}'", other)),
        }
    }
}

/// Backoff policy attached to a sync task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Growth kind
    pub kind: BackoffKind,
    /// Delay after the first failed attempt
    pub base_delay: Duration,
    /// Optional ceiling; `None` relies on the attempt cap alone
    pub max_delay: Option<Duration>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential(Duration::from_secs(10))
    }
}

impl BackoffPolicy {
    /// Exponential backoff with no ceiling
    pub fn exponential(base_delay: Duration) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            base_delay,
            max_delay: None,
        }
    }

    /// Linear backoff with no ceiling
    pub fn linear(base_delay: Duration) -> Self {
        Self {
            kind: BackoffKind::Linear,
            base_delay,
            max_delay: None,
        }
    }

    /// Cap every computed delay at `max_delay`
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Delay to wait after attempt `failed_attempt` (1-based) failed
    ///
    /// Arithmetic saturates instead of overflowing; the result is then capped
    /// at `max_delay` when one is set.
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let n = failed_attempt.max(1);

        let factor = match self.kind {
            BackoffKind::Exponential => 2u32.checked_pow(n - 1),
            BackoffKind::Linear => Some(n),
        };

        let delay = factor
            .and_then(|f| self.base_delay.checked_mul(f))
            .unwrap_or(Duration::MAX);

        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}
