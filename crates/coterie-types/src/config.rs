//! Exchange engine configuration with sensible defaults.
//!
//! All operational parameters of the exchange are centralized here.
//! Every value has a documented default; services override only what
//! they need (typically the message storage period).

use serde::{Deserialize, Serialize};

use crate::{CoterieError, Result};

/// Configuration of one exchange engine instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Tick interval of the engine worker, in milliseconds.
    pub tick_interval_ms: u64,

    /// Default storage period for messages, in seconds. Messages older
    /// than this are evicted by cleanup unless flagged KEEP; a group
    /// may override the period in its meta.
    pub message_store_period_secs: i64,

    /// Wall-clock timeout for a pending group publication, in seconds.
    /// Entries older than this are failed.
    pub pending_sign_timeout_secs: i64,

    /// Maximum signing attempts for a pending message publication.
    pub max_sign_attempts: u32,

    /// Maximum validation attempts for a received group or message.
    pub max_validate_attempts: u32,

    /// Interval between message cleanup sweeps, in seconds.
    pub msg_cleanup_period_secs: i64,

    /// Interval between store integrity checks, in seconds.
    pub integrity_check_period_secs: i64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            message_store_period_secs: 60 * 60 * 24 * 30,
            pending_sign_timeout_secs: 10,
            max_sign_attempts: 5,
            max_validate_attempts: 5,
            msg_cleanup_period_secs: 60 * 5,
            integrity_check_period_secs: 60 * 30,
        }
    }
}

impl ExchangeConfig {
    /// Validates all configuration values.
    ///
    /// Returns an error if any value is outside its acceptable range.
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(CoterieError::Config {
                reason: "tick_interval_ms must be greater than 0".into(),
            });
        }

        if self.message_store_period_secs <= 0 {
            return Err(CoterieError::Config {
                reason: "message_store_period_secs must be greater than 0".into(),
            });
        }

        if self.pending_sign_timeout_secs <= 0 {
            return Err(CoterieError::Config {
                reason: "pending_sign_timeout_secs must be greater than 0".into(),
            });
        }

        if self.max_sign_attempts == 0 || self.max_validate_attempts == 0 {
            return Err(CoterieError::Config {
                reason: "retry attempt caps must be greater than 0".into(),
            });
        }

        if self.msg_cleanup_period_secs <= 0 || self.integrity_check_period_secs <= 0 {
            return Err(CoterieError::Config {
                reason: "housekeeping periods must be greater than 0".into(),
            });
        }

        Ok(())
    }
}
