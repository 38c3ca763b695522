use std::env;

use course_core::model::{ParsePolicyError, TotalLessonsPolicy};
use thiserror::Error;

pub const MAX_ATTEMPTS_ENV: &str = "COURSE_LEDGER_MAX_ATTEMPTS";
pub const TOTALS_POLICY_ENV: &str = "COURSE_TOTALS_POLICY";

const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("max attempts must be a positive integer, got {0:?}")]
    InvalidMaxAttempts(String),
    #[error(transparent)]
    Policy(#[from] ParsePolicyError),
}

/// Tuning for the progress ledger's write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerConfig {
    max_attempts: u32,
    totals_policy: TotalLessonsPolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            totals_policy: TotalLessonsPolicy::Snapshot,
        }
    }
}

impl LedgerConfig {
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidMaxAttempts` if `max_attempts` is zero.
    pub fn new(max_attempts: u32, totals_policy: TotalLessonsPolicy) -> Result<Self, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(max_attempts.to_string()));
        }
        Ok(Self {
            max_attempts,
            totals_policy,
        })
    }

    /// Read `COURSE_LEDGER_MAX_ATTEMPTS` and `COURSE_TOTALS_POLICY`, falling
    /// back to defaults for unset variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`LedgerConfig::from_env`] with an injectable variable source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a value is present but malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup(MAX_ATTEMPTS_ENV) {
            let attempts = raw
                .trim()
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidMaxAttempts(raw.clone()))?;
            config = Self::new(attempts, config.totals_policy)
                .map_err(|_| ConfigError::InvalidMaxAttempts(raw))?;
        }
        if let Some(raw) = lookup(TOTALS_POLICY_ENV) {
            config.totals_policy = raw.parse()?;
        }

        Ok(config)
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn totals_policy(&self) -> TotalLessonsPolicy {
        self.totals_policy
    }

    #[must_use]
    pub fn with_totals_policy(mut self, policy: TotalLessonsPolicy) -> Self {
        self.totals_policy = policy;
        self
    }
}
