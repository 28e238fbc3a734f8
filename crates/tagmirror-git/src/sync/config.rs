//! Scheduler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Settings shared by every mirror's sync cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Number of workers performing clones and fetches.
    pub workers: usize,

    /// Capacity of the queue feeding the workers.
    pub queue_capacity: usize,

    /// Delay between clone attempts for repositories without a refresh
    /// interval that are not cloned yet.
    #[serde(with = "seconds")]
    pub retry_interval: Duration,

    #[serde(with = "seconds")]
    pub clone_timeout: Duration,

    #[serde(with = "seconds")]
    pub fetch_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
            retry_interval: Duration::from_secs(60),
            clone_timeout: Duration::from_secs(300),
            fetch_timeout: Duration::from_secs(60),
        }
    }
}

impl SyncConfig {
    /// Rejects settings that would stall the workers or retry without
    /// pause.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason| Err(ConfigError::InvalidSyncSetting { field, reason });

        if self.workers == 0 {
            return invalid("workers", "must be at least 1");
        }
        if self.queue_capacity == 0 {
            return invalid("queue_capacity", "must be at least 1");
        }

        for (field, value) in [
            ("retry_interval", self.retry_interval),
            ("clone_timeout", self.clone_timeout),
            ("fetch_timeout", self.fetch_timeout),
        ] {
            if value.is_zero() {
                return invalid(field, "must be greater than zero");
            }
        }

        Ok(())
    }
}

mod seconds {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_config_default() {
        let config = SyncConfig::default();
        assert_eq!(config.workers, 4);
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.retry_interval, Duration::from_secs(60));
        assert_eq!(config.clone_timeout, Duration::from_secs(300));
        assert_eq!(config.fetch_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_sync_config_partial_deserialize() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"workers": 2, "fetch_timeout": 15}"#).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.fetch_timeout, Duration::from_secs(15));
        assert_eq!(config.clone_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_validate() {
        assert!(SyncConfig::default().validate().is_ok());

        let zero_retry: SyncConfig = serde_json::from_str(r#"{"retry_interval": 0}"#).unwrap();
        assert!(matches!(
            zero_retry.validate(),
            Err(ConfigError::InvalidSyncSetting {
                field: "retry_interval",
                ..
            })
        ));

        let zero_workers = SyncConfig {
            workers: 0,
            ..SyncConfig::default()
        };
        assert!(zero_workers.validate().is_err());

        let zero_fetch = SyncConfig {
            fetch_timeout: Duration::ZERO,
            ..SyncConfig::default()
        };
        let err = zero_fetch.validate().unwrap_err();
        assert_eq!(err.to_string(), "sync.fetch_timeout must be greater than zero");
    }
}
