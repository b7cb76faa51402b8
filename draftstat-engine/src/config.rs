//! Engine configuration with serde defaults and validation.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::constants::{
    DEFAULT_ADMIN_TOKEN, DEFAULT_MAX_RETRIES, DEFAULT_PICKS_PER_ROUND, DEFAULT_RETRY_DELAY_MS,
    DEFAULT_RETRY_MULTIPLIER, DEFAULT_RNG_SEED, DEFAULT_ROTATION_INTERVAL_SECS, DEFAULT_ROUNDS,
    DEFAULT_SENTINEL_CLASS_CODE, DRAFT_ROUNDS,
};

/// Errors raised when configuration invariants are violated.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be at least {min} (got {value})")]
    MinViolation {
        field: &'static str,
        min: u64,
        value: u64,
    },
    #[error("draft rounds must be between 1 and {max} (got {value})")]
    RoundsOutOfRange { max: u32, value: u32 },
    #[error("admin token must not be empty")]
    EmptyAdminToken,
    #[error("failed to parse engine config: {0}")]
    Parse(String),
}

/// Shape of one player's draft, used to normalize pick totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftShape {
    #[serde(default = "DraftShape::default_rounds")]
    pub rounds: u32,
    #[serde(default = "DraftShape::default_picks_per_round")]
    pub picks_per_round: u32,
}

impl DraftShape {
    const fn default_rounds() -> u32 {
        DEFAULT_ROUNDS
    }

    const fn default_picks_per_round() -> u32 {
        DEFAULT_PICKS_PER_ROUND
    }

    /// Cards one player drafts in a full match.
    #[must_use]
    pub const fn picks_per_match(self) -> u64 {
        self.rounds as u64 * self.picks_per_round as u64
    }

    /// Sum of diagonal coexistence increments one player contributes per match.
    ///
    /// The coexistence cross product increments each distinct pick's diagonal
    /// once, so a player with `n` distinct picks adds `n` to the diagonal
    /// total. Dividing a diagonal sum by this value counts matches. Assumes
    /// every player completes the full draft without repeats.
    #[must_use]
    pub const fn pick_multiplicity(self) -> u64 {
        self.picks_per_match()
    }
}

impl Default for DraftShape {
    fn default() -> Self {
        Self {
            rounds: Self::default_rounds(),
            picks_per_round: Self::default_picks_per_round(),
        }
    }
}

/// Capped exponential backoff applied to optimistic-concurrency conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "RetryPolicy::default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "RetryPolicy::default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "RetryPolicy::default_multiplier")]
    pub multiplier: u32,
}

impl RetryPolicy {
    const fn default_max_retries() -> u32 {
        DEFAULT_MAX_RETRIES
    }

    const fn default_initial_delay_ms() -> u64 {
        DEFAULT_RETRY_DELAY_MS
    }

    const fn default_multiplier() -> u32 {
        DEFAULT_RETRY_MULTIPLIER
    }

    /// A policy that retries without sleeping; used by tests and tools.
    #[must_use]
    pub const fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay_ms: 0,
            multiplier: 1,
        }
    }

    /// Delay before the given retry (1-based): 2s, 4s, 8s with the defaults.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        let factor = u64::from(self.multiplier).saturating_pow(exponent);
        Duration::from_millis(self.initial_delay_ms.saturating_mul(factor))
    }

    /// Total attempts including the first one.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: Self::default_max_retries(),
            initial_delay_ms: Self::default_initial_delay_ms(),
            multiplier: Self::default_multiplier(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub draft: DraftShape,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "EngineConfig::default_rotation_interval_secs")]
    pub rotation_interval_secs: u64,
    #[serde(default = "EngineConfig::default_sentinel_class_code")]
    pub sentinel_class_code: i32,
    #[serde(default = "EngineConfig::default_rng_seed")]
    pub rng_seed: u64,
    #[serde(default = "EngineConfig::default_admin_token")]
    pub admin_token: String,
    #[serde(default)]
    pub upgrade_weighting: bool,
}

impl EngineConfig {
    const fn default_rotation_interval_secs() -> u64 {
        DEFAULT_ROTATION_INTERVAL_SECS
    }

    const fn default_sentinel_class_code() -> i32 {
        DEFAULT_SENTINEL_CLASS_CODE
    }

    const fn default_rng_seed() -> u64 {
        DEFAULT_RNG_SEED
    }

    fn default_admin_token() -> String {
        DEFAULT_ADMIN_TOKEN.to_string()
    }

    /// Parse and validate a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or violates an invariant.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let cfg: Self =
            serde_json::from_str(json).map_err(|err| ConfigError::Parse(err.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check configuration invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let max_rounds = u32::try_from(DRAFT_ROUNDS).unwrap_or(u32::MAX);
        if self.draft.rounds == 0 || self.draft.rounds > max_rounds {
            return Err(ConfigError::RoundsOutOfRange {
                max: max_rounds,
                value: self.draft.rounds,
            });
        }
        if self.draft.picks_per_round == 0 {
            return Err(ConfigError::MinViolation {
                field: "draft.picks_per_round",
                min: 1,
                value: 0,
            });
        }
        if self.retry.multiplier == 0 {
            return Err(ConfigError::MinViolation {
                field: "retry.multiplier",
                min: 1,
                value: 0,
            });
        }
        if self.rotation_interval_secs == 0 {
            return Err(ConfigError::MinViolation {
                field: "rotation_interval_secs",
                min: 1,
                value: 0,
            });
        }
        if self.admin_token.trim().is_empty() {
            return Err(ConfigError::EmptyAdminToken);
        }
        Ok(())
    }

    #[must_use]
    pub const fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.rotation_interval_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            draft: DraftShape::default(),
            retry: RetryPolicy::default(),
            rotation_interval_secs: Self::default_rotation_interval_secs(),
            sentinel_class_code: Self::default_sentinel_class_code(),
            rng_seed: Self::default_rng_seed(),
            admin_token: Self::default_admin_token(),
            upgrade_weighting: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let cfg = EngineConfig::from_json("{}").unwrap();
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.draft.pick_multiplicity(), 9);
        assert_eq!(cfg.sentinel_class_code, 100);
        assert_eq!(cfg.rotation_interval(), Duration::from_secs(3600));
    }

    #[test]
    fn retry_delays_double() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(RetryPolicy::immediate(3).delay_for(3), Duration::ZERO);
    }

    #[test]
    fn validation_rejects_bad_shapes() {
        let err = EngineConfig::from_json(r#"{"draft":{"rounds":4}}"#).unwrap_err();
        assert_eq!(err, ConfigError::RoundsOutOfRange { max: 3, value: 4 });

        let err = EngineConfig::from_json(r#"{"retry":{"multiplier":0}}"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MinViolation {
                field: "retry.multiplier",
                ..
            }
        ));

        let err = EngineConfig::from_json(r#"{"admin_token":"  "}"#).unwrap_err();
        assert_eq!(err, ConfigError::EmptyAdminToken);

        assert!(matches!(
            EngineConfig::from_json("not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn custom_shape_changes_multiplicity() {
        let cfg =
            EngineConfig::from_json(r#"{"draft":{"rounds":3,"picks_per_round":2}}"#).unwrap();
        assert_eq!(cfg.draft.picks_per_match(), 6);
        assert_eq!(cfg.draft.pick_multiplicity(), 6);
    }
}
