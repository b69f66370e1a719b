//! Sync engine tunables.
//!
//! `SyncSettings` is shared by the library handles and the CLI. Values come
//! from serde defaults, an optional JSON file owned by the caller, and
//! `FIELDWATCH_*` environment variables, in that order of precedence.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const ENV_PREFIX: &str = "FIELDWATCH_";

/// Tunables for the sync engine, the recognition processor and the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    /// Entries claimed per drain round
    pub batch_size: usize,
    /// Concurrent gateway calls per round (across distinct entities)
    pub max_concurrency: usize,
    /// Retry budget stamped on new mutation entries
    pub max_retries: u32,
    /// First retry delay; doubles per spent retry
    pub base_retry_delay_ms: u64,
    /// Upper bound for the exponential part of the retry delay
    pub max_retry_delay_ms: u64,
    /// Random extra delay added to each retry, up to this value
    pub retry_jitter_ms: u64,
    /// Periodic drain interval while online
    pub sync_interval_secs: u64,
    /// Random extra delay added to each periodic wake, up to this value
    pub interval_jitter_ms: u64,
    /// `processing` rows older than this are considered abandoned
    pub stale_processing_secs: u64,
    /// Upper bound on claim rounds within one drain cycle
    pub max_rounds_per_cycle: usize,
    /// Total submissions allowed for a recognition job before manual retry
    pub recognition_max_attempts: u32,
    /// Connectivity probe interval
    pub probe_interval_secs: u64,
    /// Timeout for one gateway or probe request
    pub request_timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: 20,
            max_concurrency: 4,
            max_retries: 5,
            base_retry_delay_ms: 2_000,
            max_retry_delay_ms: 300_000,
            retry_jitter_ms: 1_000,
            sync_interval_secs: 20,
            interval_jitter_ms: 2_000,
            stale_processing_secs: 300,
            max_rounds_per_cycle: 50,
            recognition_max_attempts: 3,
            probe_interval_secs: 15,
            request_timeout_secs: 30,
        }
    }
}

impl SyncSettings {
    /// Defaults overlaid with process environment overrides
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();
        settings.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Overlay `FIELDWATCH_*` values provided by `lookup`.
    ///
    /// Keys are the upper-cased field names, e.g. `FIELDWATCH_BATCH_SIZE`.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        let read = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        override_value(&mut self.batch_size, "BATCH_SIZE", read("BATCH_SIZE"))?;
        override_value(
            &mut self.max_concurrency,
            "MAX_CONCURRENCY",
            read("MAX_CONCURRENCY"),
        )?;
        override_value(&mut self.max_retries, "MAX_RETRIES", read("MAX_RETRIES"))?;
        override_value(
            &mut self.base_retry_delay_ms,
            "BASE_RETRY_DELAY_MS",
            read("BASE_RETRY_DELAY_MS"),
        )?;
        override_value(
            &mut self.max_retry_delay_ms,
            "MAX_RETRY_DELAY_MS",
            read("MAX_RETRY_DELAY_MS"),
        )?;
        override_value(
            &mut self.retry_jitter_ms,
            "RETRY_JITTER_MS",
            read("RETRY_JITTER_MS"),
        )?;
        override_value(
            &mut self.sync_interval_secs,
            "SYNC_INTERVAL_SECS",
            read("SYNC_INTERVAL_SECS"),
        )?;
        override_value(
            &mut self.interval_jitter_ms,
            "INTERVAL_JITTER_MS",
            read("INTERVAL_JITTER_MS"),
        )?;
        override_value(
            &mut self.stale_processing_secs,
            "STALE_PROCESSING_SECS",
            read("STALE_PROCESSING_SECS"),
        )?;
        override_value(
            &mut self.max_rounds_per_cycle,
            "MAX_ROUNDS_PER_CYCLE",
            read("MAX_ROUNDS_PER_CYCLE"),
        )?;
        override_value(
            &mut self.recognition_max_attempts,
            "RECOGNITION_MAX_ATTEMPTS",
            read("RECOGNITION_MAX_ATTEMPTS"),
        )?;
        override_value(
            &mut self.probe_interval_secs,
            "PROBE_INTERVAL_SECS",
            read("PROBE_INTERVAL_SECS"),
        )?;
        override_value(
            &mut self.request_timeout_secs,
            "REQUEST_TIMEOUT_SECS",
            read("REQUEST_TIMEOUT_SECS"),
        )?;

        self.validate()
    }

    /// Reject combinations the engines cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        if self.max_concurrency == 0 {
            return Err(Error::Config("max_concurrency must be at least 1".into()));
        }
        if self.max_retries == 0 {
            return Err(Error::Config("max_retries must be at least 1".into()));
        }
        if self.max_rounds_per_cycle == 0 {
            return Err(Error::Config("max_rounds_per_cycle must be at least 1".into()));
        }
        if self.recognition_max_attempts == 0 {
            return Err(Error::Config(
                "recognition_max_attempts must be at least 1".into(),
            ));
        }
        if self.max_retry_delay_ms < self.base_retry_delay_ms {
            return Err(Error::Config(format!(
                "max_retry_delay_ms ({}) must not be below base_retry_delay_ms ({})",
                self.max_retry_delay_ms, self.base_retry_delay_ms
            )));
        }
        if self.sync_interval_secs == 0 {
            return Err(Error::Config("sync_interval_secs must be at least 1".into()));
        }
        if self.probe_interval_secs == 0 {
            return Err(Error::Config("probe_interval_secs must be at least 1".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config("request_timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    pub const fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub const fn interval_jitter(&self) -> Duration {
        Duration::from_millis(self.interval_jitter_ms)
    }

    pub const fn stale_processing_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_processing_secs)
    }

    pub const fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn override_value<T: std::str::FromStr>(
    slot: &mut T,
    name: &str,
    raw: Option<String>,
) -> Result<()> {
    let Some(raw) = raw else {
        return Ok(());
    };
    *slot = raw
        .parse()
        .map_err(|_| Error::Config(format!("{ENV_PREFIX}{name} has invalid value '{raw}'")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let settings = SyncSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.batch_size, 20);
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.sync_interval(), Duration::from_secs(20));
        assert_eq!(settings.recognition_max_attempts, 3);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let settings: SyncSettings =
            serde_json::from_str(r#"{"batch_size": 5, "max_retries": 3}"#).unwrap();
        assert_eq!(settings.batch_size, 5);
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.max_concurrency, SyncSettings::default().max_concurrency);
    }

    #[test]
    fn unknown_json_fields_are_rejected() {
        let result = serde_json::from_str::<SyncSettings>(r#"{"batchsize": 5}"#);
        assert!(result.is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut settings = SyncSettings::default();
        settings
            .apply_env_overrides(lookup(&[
                ("FIELDWATCH_BATCH_SIZE", " 7 "),
                ("FIELDWATCH_SYNC_INTERVAL_SECS", "60"),
                ("FIELDWATCH_MAX_RETRIES", ""),
            ]))
            .unwrap();

        assert_eq!(settings.batch_size, 7);
        assert_eq!(settings.sync_interval_secs, 60);
        assert_eq!(settings.max_retries, 5);
    }

    #[test]
    fn env_override_with_garbage_fails() {
        let mut settings = SyncSettings::default();
        let err = settings
            .apply_env_overrides(lookup(&[("FIELDWATCH_MAX_RETRIES", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("FIELDWATCH_MAX_RETRIES"));
    }

    #[test]
    fn validation_rejects_inverted_delays() {
        let settings = SyncSettings {
            base_retry_delay_ms: 10_000,
            max_retry_delay_ms: 1_000,
            ..SyncSettings::default()
        };
        assert!(matches!(settings.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn validation_rejects_zero_probe_interval_and_timeout() {
        let settings = SyncSettings {
            probe_interval_secs: 0,
            ..SyncSettings::default()
        };
        assert!(matches!(settings.validate(), Err(Error::Config(_))));

        let settings = SyncSettings {
            request_timeout_secs: 0,
            ..SyncSettings::default()
        };
        assert!(matches!(settings.validate(), Err(Error::Config(_))));

        let mut settings = SyncSettings::default();
        let err = settings
            .apply_env_overrides(lookup(&[("FIELDWATCH_PROBE_INTERVAL_SECS", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("probe_interval_secs"));
    }

    #[test]
    fn validation_rejects_zero_batch() {
        let settings = SyncSettings {
            batch_size: 0,
            ..SyncSettings::default()
        };
        assert!(settings.validate().is_err());
    }
}
