//! Runtime configuration for save synchronization.
//!
//! Provides a `SyncConfig` passed explicitly into every component at
//! construction. Values come from defaults or from `SAVESYNC_*` environment
//! variables through [`SyncConfig::from_env`].

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::logger::Importance;
use crate::models::UpdateCategory;
use crate::util::{is_http_url, normalize_text_option, split_list};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for crate::Error {
    fn from(error: ConfigError) -> Self {
        Self::Config(error.to_string())
    }
}

/// Exponential backoff used for failed deliveries and overdue confirmations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before the given attempt: `min(base * 2^(attempt - 1), max)`.
    ///
    /// Attempt zero has no delay.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        let factor = 1_u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
    }

    pub fn delay_millis(&self, attempt: u32) -> i64 {
        duration_millis(self.delay(attempt))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(1_000), Duration::from_millis(60_000))
    }
}

/// Configuration shared by the cadence manager, tracker, coordinator and logger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Cadence period; slots are drawn from `[1, period_secs]`
    pub cadence_period: Duration,
    /// Half-width of the acceptance window around a slot center
    pub cadence_tolerance: Duration,
    /// How long a submission may stay unconfirmed before it is re-sent
    pub confirmation_timeout: Duration,
    pub backoff: BackoffPolicy,
    /// An active batch is sealed once it holds this many instructions
    pub max_instructions_per_batch: usize,
    pub slim_max_instructions: usize,
    pub medium_max_instructions: usize,
    pub log_min_importance: Importance,
    pub log_capacity: usize,
    /// Update categories resolved with the built-in `additive` archetype
    pub additive_categories: Vec<UpdateCategory>,
    /// Endpoint for the HTTP submission transport
    pub submission_endpoint: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cadence_period: Duration::from_secs(12),
            cadence_tolerance: Duration::from_secs(4),
            confirmation_timeout: Duration::from_secs(30),
            backoff: BackoffPolicy::default(),
            max_instructions_per_batch: 32,
            slim_max_instructions: 4,
            medium_max_instructions: 16,
            log_min_importance: Importance::Low,
            log_capacity: 256,
            additive_categories: Vec::new(),
            submission_endpoint: None,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let period_secs = parse_in_range(
            &lookup,
            "SAVESYNC_CADENCE_PERIOD_SECS",
            defaults.cadence_period.as_secs(),
            2,
            3_600,
        )?;
        let tolerance_secs = parse_in_range(
            &lookup,
            "SAVESYNC_CADENCE_TOLERANCE_SECS",
            defaults.cadence_tolerance.as_secs(),
            0,
            3_600,
        )?;
        if tolerance_secs >= period_secs {
            return Err(ConfigError::Invalid(
                "SAVESYNC_CADENCE_TOLERANCE_SECS must be smaller than SAVESYNC_CADENCE_PERIOD_SECS"
                    .to_string(),
            ));
        }

        let timeout_secs = parse_in_range(
            &lookup,
            "SAVESYNC_CONFIRMATION_TIMEOUT_SECS",
            defaults.confirmation_timeout.as_secs(),
            1,
            3_600,
        )?;
        let retry_base_ms = parse_in_range(
            &lookup,
            "SAVESYNC_RETRY_BASE_MS",
            whole_millis(defaults.backoff.base),
            10,
            600_000,
        )?;
        let retry_max_ms = parse_in_range(
            &lookup,
            "SAVESYNC_RETRY_MAX_MS",
            whole_millis(defaults.backoff.max),
            10,
            3_600_000,
        )?;
        if retry_max_ms < retry_base_ms {
            return Err(ConfigError::Invalid(
                "SAVESYNC_RETRY_MAX_MS must be >= SAVESYNC_RETRY_BASE_MS".to_string(),
            ));
        }

        let max_instructions = parse_in_range(
            &lookup,
            "SAVESYNC_MAX_INSTRUCTIONS_PER_BATCH",
            as_u64(defaults.max_instructions_per_batch),
            1,
            10_000,
        )?;
        let slim_max = parse_in_range(
            &lookup,
            "SAVESYNC_SLIM_MAX_INSTRUCTIONS",
            as_u64(defaults.slim_max_instructions),
            1,
            10_000,
        )?;
        let medium_max = parse_in_range(
            &lookup,
            "SAVESYNC_MEDIUM_MAX_INSTRUCTIONS",
            as_u64(defaults.medium_max_instructions),
            1,
            10_000,
        )?;
        if medium_max < slim_max {
            return Err(ConfigError::Invalid(
                "SAVESYNC_MEDIUM_MAX_INSTRUCTIONS must be >= SAVESYNC_SLIM_MAX_INSTRUCTIONS"
                    .to_string(),
            ));
        }

        let log_min_importance = match optional_trimmed(&lookup, "SAVESYNC_LOG_MIN_IMPORTANCE") {
            Some(raw) => raw.parse::<Importance>().map_err(|_| {
                ConfigError::Invalid(
                    "SAVESYNC_LOG_MIN_IMPORTANCE must be one of low, normal, high, critical"
                        .to_string(),
                )
            })?,
            None => defaults.log_min_importance,
        };
        let log_capacity = parse_in_range(
            &lookup,
            "SAVESYNC_LOG_CAPACITY",
            as_u64(defaults.log_capacity),
            1,
            100_000,
        )?;

        let additive_categories = optional_trimmed(&lookup, "SAVESYNC_ADDITIVE_CATEGORIES")
            .map(|raw| split_list(&raw).into_iter().map(UpdateCategory::new).collect())
            .unwrap_or(defaults.additive_categories);

        let submission_endpoint = optional_trimmed(&lookup, "SAVESYNC_SUBMISSION_ENDPOINT");
        if let Some(endpoint) = &submission_endpoint {
            if !is_http_url(endpoint) {
                return Err(ConfigError::Invalid(
                    "SAVESYNC_SUBMISSION_ENDPOINT must start with http:// or https://"
                        .to_string(),
                ));
            }
        }

        Ok(Self {
            cadence_period: Duration::from_secs(period_secs),
            cadence_tolerance: Duration::from_secs(tolerance_secs),
            confirmation_timeout: Duration::from_secs(timeout_secs),
            backoff: BackoffPolicy::new(
                Duration::from_millis(retry_base_ms),
                Duration::from_millis(retry_max_ms),
            ),
            max_instructions_per_batch: usize::try_from(max_instructions).unwrap_or(usize::MAX),
            slim_max_instructions: usize::try_from(slim_max).unwrap_or(usize::MAX),
            medium_max_instructions: usize::try_from(medium_max).unwrap_or(usize::MAX),
            log_min_importance,
            log_capacity: usize::try_from(log_capacity).unwrap_or(usize::MAX),
            additive_categories,
            submission_endpoint,
        })
    }

    /// Number of cadence slots; slots are numbered `1..=slot_count()`.
    pub fn slot_count(&self) -> u32 {
        u32::try_from(self.cadence_period.as_secs()).unwrap_or(u32::MAX)
    }
}

/// Convert a duration to whole milliseconds, saturating at `i64::MAX`.
pub fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn whole_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn as_u64(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

fn parse_in_range(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
    min: u64,
    max: u64,
) -> Result<u64, ConfigError> {
    let Some(raw) = optional_trimmed(lookup, name) else {
        return Ok(default);
    };
    let value = raw
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(format!("{name} must be an integer in [{min}, {max}]")))?;
    if !(min..=max).contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{min}, {max}]"
        )));
    }
    Ok(value)
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    normalize_text_option(lookup(name))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<SyncConfig, ConfigError> {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        SyncConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn empty_environment_yields_defaults() {
        assert_eq!(config_from(&[]).unwrap(), SyncConfig::default());
    }

    #[test]
    fn partial_overrides_keep_remaining_defaults() {
        let config = config_from(&[
            ("SAVESYNC_CADENCE_PERIOD_SECS", "30"),
            ("SAVESYNC_LOG_CAPACITY", "64"),
        ])
        .unwrap();
        assert_eq!(
            config,
            SyncConfig {
                cadence_period: Duration::from_secs(30),
                log_capacity: 64,
                ..SyncConfig::default()
            }
        );
    }

    #[test]
    fn tolerance_must_be_smaller_than_period() {
        let err = config_from(&[
            ("SAVESYNC_CADENCE_PERIOD_SECS", "10"),
            ("SAVESYNC_CADENCE_TOLERANCE_SECS", "10"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("SAVESYNC_CADENCE_TOLERANCE_SECS"));
    }

    #[test]
    fn rejects_non_numeric_values() {
        let err = config_from(&[("SAVESYNC_RETRY_BASE_MS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("must be an integer"));
    }

    #[test]
    fn rejects_retry_max_below_base() {
        let err = config_from(&[
            ("SAVESYNC_RETRY_BASE_MS", "5000"),
            ("SAVESYNC_RETRY_MAX_MS", "1000"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("SAVESYNC_RETRY_MAX_MS"));
    }

    #[test]
    fn parses_additive_categories_and_endpoint() {
        let config = config_from(&[
            ("SAVESYNC_ADDITIVE_CATEGORIES", " coins, ,xp "),
            ("SAVESYNC_SUBMISSION_ENDPOINT", "https://saves.example.com/v1/progress"),
            ("SAVESYNC_LOG_MIN_IMPORTANCE", "high"),
        ])
        .unwrap();
        assert_eq!(
            config.additive_categories,
            vec![UpdateCategory::new("coins"), UpdateCategory::new("xp")]
        );
        assert_eq!(
            config.submission_endpoint.as_deref(),
            Some("https://saves.example.com/v1/progress")
        );
        assert_eq!(config.log_min_importance, Importance::High);
    }

    #[test]
    fn rejects_endpoint_without_scheme() {
        let err =
            config_from(&[("SAVESYNC_SUBMISSION_ENDPOINT", "saves.example.com")]).unwrap_err();
        assert!(err.to_string().contains("http:// or https://"));
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = BackoffPolicy::new(Duration::from_millis(500), Duration::from_millis(3_000));
        assert_eq!(policy.delay(0), Duration::ZERO);
        assert_eq!(policy.delay(1), Duration::from_millis(500));
        assert_eq!(policy.delay(2), Duration::from_millis(1_000));
        assert_eq!(policy.delay(3), Duration::from_millis(2_000));
        assert_eq!(policy.delay(4), Duration::from_millis(3_000));
        assert_eq!(policy.delay(200), Duration::from_millis(3_000));
    }
}
