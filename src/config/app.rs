//! Process configuration read from the environment (and `.env`).

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::functional::validation_engine::ValidationConfig;

pub const DEFAULT_DATABASE_URL: &str = "dfe_documents.db";
pub const DEFAULT_POOL_SIZE: u32 = 8;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_BATCH_CHUNK_SIZE: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
    pub busy_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            pool_size: DEFAULT_POOL_SIZE,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// Payloads prepared per rayon chunk in a batch.
    pub batch_chunk_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_chunk_size: DEFAULT_BATCH_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub validation: ValidationConfig,
    pub ingest: IngestConfig,
}

fn parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    check: impl Fn(&T) -> Result<(), String>,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let invalid = |reason: String| ConfigError::Invalid {
        key,
        value: raw.clone(),
        reason,
    };
    let value = raw
        .trim()
        .parse::<T>()
        .map_err(|err| invalid(err.to_string()))?;
    check(&value).map_err(invalid)?;
    Ok(Some(value))
}

fn positive<T: PartialOrd + Default>(value: &T) -> Result<(), String> {
    if *value > T::default() {
        Ok(())
    } else {
        Err("must be greater than zero".to_string())
    }
}

fn non_negative(value: &Decimal) -> Result<(), String> {
    if value.is_sign_negative() {
        Err("must not be negative".to_string())
    } else {
        Ok(())
    }
}

impl AppConfig {
    /// Loads `.env` when present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Unset keys keep
    /// their defaults; set but unparsable keys are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AppConfig::default();

        if let Some(url) = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()) {
            config.database.url = url.trim().to_string();
        }
        if let Some(size) = parsed::<u32>(&lookup, "DATABASE_POOL_SIZE", positive)? {
            config.database.pool_size = size;
        }
        if let Some(ms) = parsed::<u64>(&lookup, "DATABASE_BUSY_TIMEOUT_MS", |_| Ok(()))? {
            config.database.busy_timeout = Duration::from_millis(ms);
        }

        if let Some(tolerance) =
            parsed::<Decimal>(&lookup, "VALIDATION_AMOUNT_TOLERANCE", non_negative)?
        {
            config.validation.amount_tolerance = tolerance;
        }
        if let Some(secs) = parsed::<i64>(&lookup, "VALIDATION_MAX_CLOCK_SKEW_SECS", |secs| {
            if *secs < 0 {
                Err("must not be negative".to_string())
            } else {
                Ok(())
            }
        })? {
            config.validation.max_clock_skew = chrono::Duration::seconds(secs);
        }
        if let Some(threshold) =
            parsed::<Decimal>(&lookup, "VALIDATION_HIGH_VALUE_THRESHOLD", non_negative)?
        {
            config.validation.high_value_threshold = threshold;
        }
        if let Some(max) = parsed::<usize>(&lookup, "VALIDATION_MAX_ISSUES", positive)? {
            config.validation.max_issues = Some(max);
        }

        if let Some(chunk) = parsed::<usize>(&lookup, "INGEST_BATCH_CHUNK_SIZE", positive)? {
            config.ingest.batch_chunk_size = chunk;
        }

        Ok(config)
    }
}
