use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Delay policy applied to a task that was picked but not acknowledged.
///
/// Pick-task calls [`FailureSettings::next_delay`] with the attempt number the claim
/// produces (1 for the first pick) and schedules the row that far into the future, so an
/// abandoned task becomes eligible again without any coordinator.
pub trait FailureSettings: Send + Sync + fmt::Debug {
    fn next_delay(&self, attempt: u32) -> Duration;
}

/// Growth of the retry delay across attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailRetryType {
    /// interval * 2^(attempt - 1)
    GeometricBackoff,
    /// interval * (1 + 2 * (attempt - 1))
    ArithmeticBackoff,
    /// interval
    LinearBackoff,
}

/// Built-in [`FailureSettings`] implementation.
///
/// ```rust
/// use dbqueue::settings::{FailRetryType, FailureSettings, FailureSettingsPolicy};
/// use std::time::Duration;
///
/// let policy = FailureSettingsPolicy::new(FailRetryType::GeometricBackoff, Duration::from_secs(10));
/// assert_eq!(policy.next_delay(1), Duration::from_secs(10));
/// assert_eq!(policy.next_delay(3), Duration::from_secs(40));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSettingsPolicy {
    pub retry_type: FailRetryType,
    #[serde(rename = "retry_interval_seconds", with = "duration_secs")]
    pub retry_interval: Duration,
}

impl FailureSettingsPolicy {
    pub fn new(retry_type: FailRetryType, retry_interval: Duration) -> Self {
        Self {
            retry_type,
            retry_interval,
        }
    }
}

impl Default for FailureSettingsPolicy {
    fn default() -> Self {
        Self::new(FailRetryType::GeometricBackoff, Duration::from_secs(60))
    }
}

impl FailureSettings for FailureSettingsPolicy {
    fn next_delay(&self, attempt: u32) -> Duration {
        let step = attempt.max(1) - 1;
        let factor: u32 = match self.retry_type {
            FailRetryType::GeometricBackoff => 2u32.checked_pow(step).unwrap_or(u32::MAX),
            FailRetryType::ArithmeticBackoff => step.saturating_mul(2).saturating_add(1),
            FailRetryType::LinearBackoff => 1,
        };
        self.retry_interval.saturating_mul(factor)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
