//! Background worker configuration.

use std::time::Duration;

#[cfg(feature = "config")]
use serde::Deserialize;

#[cfg(feature = "config")]
use crate::error::{DiError, DiResult};

/// Default interval between master scans.
pub const DEFAULT_SCHEDULE_PERIOD: Duration = Duration::from_secs(60 * 60);

/// Settings of a [`BackgroundWorkerInjector`](super::BackgroundWorkerInjector).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Post-injector name.
    pub name: String,
    /// Post-injector priority, lower runs first.
    pub priority: i32,
    /// Interval between master scans. Task timers are only armed for
    /// occurrences inside the current scan window.
    pub schedule_period: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            name: "background".to_string(),
            priority: 0,
            schedule_period: DEFAULT_SCHEDULE_PERIOD,
        }
    }
}

#[cfg(feature = "config")]
#[derive(Deserialize)]
#[serde(default)]
struct RawWorkerOptions {
    name: String,
    priority: i32,
    schedule_period_secs: u64,
}

#[cfg(feature = "config")]
impl Default for RawWorkerOptions {
    fn default() -> Self {
        let defaults = WorkerOptions::default();
        Self {
            name: defaults.name,
            priority: defaults.priority,
            schedule_period_secs: defaults.schedule_period.as_secs(),
        }
    }
}

#[cfg(feature = "config")]
impl WorkerOptions {
    /// Reads options from JSON. Missing fields keep their defaults.
    ///
    /// ```
    /// use reinject::WorkerOptions;
    /// use std::time::Duration;
    ///
    /// let options = WorkerOptions::from_json(r#"{ "schedule_period_secs": 600 }"#).unwrap();
    /// assert_eq!(options.schedule_period, Duration::from_secs(600));
    /// assert_eq!(options.name, "background");
    /// ```
    pub fn from_json(json: &str) -> DiResult<Self> {
        let raw: RawWorkerOptions = serde_json::from_str(json)
            .map_err(|e| DiError::InvalidArgument(format!("worker options: {}", e)))?;
        if raw.schedule_period_secs == 0 {
            return Err(DiError::InvalidArgument(
                "worker options: schedule_period_secs must be positive".to_string(),
            ));
        }
        Ok(Self {
            name: raw.name,
            priority: raw.priority,
            schedule_period: Duration::from_secs(raw.schedule_period_secs),
        })
    }
}

#[cfg(all(test, feature = "config"))]
mod tests {
    use super::*;

    #[test]
    fn zero_period_is_rejected() {
        assert!(WorkerOptions::from_json(r#"{ "schedule_period_secs": 0 }"#).is_err());
    }

    #[test]
    fn all_fields_are_read() {
        let options =
            WorkerOptions::from_json(r#"{ "name": "jobs", "priority": -3, "schedule_period_secs": 30 }"#)
                .unwrap();
        assert_eq!(options.name, "jobs");
        assert_eq!(options.priority, -3);
        assert_eq!(options.schedule_period, Duration::from_secs(30));
    }
}
