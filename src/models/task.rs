//! Sync task definition

use std::time::Duration;

use crate::sync::retry::BackoffPolicy;

/// Name of the periodic toolkit sync task
pub const DEFAULT_TASK_NAME: &str = "toolkit_periodic_sync";

/// Shortest period the host platform allows between periodic firings
pub const MIN_PERIODIC_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Default number of failed attempts tolerated per firing
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Preconditions that must hold before an attempt may start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Constraints {
    /// Require network connectivity
    pub requires_network: bool,
}

impl Constraints {
    /// No preconditions
    pub fn none() -> Self {
        Self {
            requires_network: false,
        }
    }

    /// Require a connected network
    pub fn network_connected() -> Self {
        Self {
            requires_network: true,
        }
    }
}

/// A logical unit of recurring sync work
///
/// Only one task with a given `name` may be scheduled at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTask {
    /// Stable identifier used for deduplication
    pub name: String,

    /// Minimum period between scheduled firing starts
    pub interval: Duration,

    /// Preconditions checked before each attempt
    pub constraints: Constraints,

    /// Delay growth between failed attempts
    pub backoff: BackoffPolicy,

    /// Failed attempts tolerated within one firing
    pub max_attempts_per_cycle: u32,
}

impl SyncTask {
    /// Create a task with the platform defaults
    ///
    /// 15 minute interval, network required, exponential backoff from 10s and
    /// three attempts per firing.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interval: MIN_PERIODIC_INTERVAL,
            constraints: Constraints::network_connected(),
            backoff: BackoffPolicy::default(),
            max_attempts_per_cycle: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Set the firing interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the preconditions
    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Set the backoff policy
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the attempt budget per firing (at least one)
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts_per_cycle = max_attempts.max(1);
        self
    }

    /// Raise the interval to `floor` if it is shorter
    ///
    /// Returns true when the interval was changed.
    pub fn clamp_interval(&mut self, floor: Duration) -> bool {
        if self.interval < floor {
            self.interval = floor;
            true
        } else {
            false
        }
    }

    /// JSON view used by the control API
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "interval_secs": self.interval.as_secs(),
            "requires_network": self.constraints.requires_network,
            "backoff": {
                "kind": self.backoff.kind,
                "base_delay_ms": self.backoff.base_delay.as_millis() as u64,
                "max_delay_ms": self.backoff.max_delay.map(|d| d.as_millis() as u64),
            },
            "max_attempts_per_cycle": self.max_attempts_per_cycle,
        })
    }
}

impl Default for SyncTask {
    fn default() -> Self {
        Self::new(DEFAULT_TASK_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::retry::BackoffKind;

    #[test]
    fn test_default_task_matches_platform_defaults() {
        let task = SyncTask::default();

        assert_eq!(task.name, DEFAULT_TASK_NAME);
        assert_eq!(task.interval, Duration::from_secs(900));
        assert!(task.constraints.requires_network);
        assert_eq!(task.backoff.kind, BackoffKind::Exponential);
        assert_eq!(task.backoff.base_delay, Duration::from_secs(10));
        assert_eq!(task.max_attempts_per_cycle, 3);
    }

    #[test]
    fn test_builder_methods() {
        let task = SyncTask::new("custom")
            .with_interval(Duration::from_secs(3600))
            .with_constraints(Constraints::none())
            .with_backoff(BackoffPolicy::linear(Duration::from_secs(5)))
            .with_max_attempts(5);

        assert_eq!(task.name, "custom");
        assert_eq!(task.interval, Duration::from_secs(3600));
        assert!(!task.constraints.requires_network);
        assert_eq!(task.backoff.kind, BackoffKind::Linear);
        assert_eq!(task.max_attempts_per_cycle, 5);
    }

    #[test]
    fn test_max_attempts_at_least_one() {
        let task = SyncTask::new("t").with_max_attempts(0);
        assert_eq!(task.max_attempts_per_cycle, 1);
    }

    #[test]
    fn test_clamp_interval_to_floor() {
        let mut task = SyncTask::new("t").with_interval(Duration::from_secs(60));
        assert!(task.clamp_interval(MIN_PERIODIC_INTERVAL));
        assert_eq!(task.interval, MIN_PERIODIC_INTERVAL);

        // Already above the floor
        assert!(!task.clamp_interval(Duration::from_secs(60)));
        assert_eq!(task.interval, MIN_PERIODIC_INTERVAL);
    }

    #[test]
    fn test_to_json() {
        let task = SyncTask::default();
        let json = task.to_json();

        assert_eq!(json["name"], DEFAULT_TASK_NAME);
        assert_eq!(json["interval_secs"], 900);
        assert_eq!(json["requires_network"], true);
        assert_eq!(json["backoff"]["kind"], "exponential");
        assert_eq!(json["backoff"]["base_delay_ms"], 10_000);
        assert!(json["backoff"]["max_delay_ms"].is_null());
        assert_eq!(json["max_attempts_per_cycle"], 3);
    }
}
