//! Process configuration.
//!
//! The configuration is resolved once at process start (the binary
//! reads the environment) and passed explicitly; components never
//! read the environment themselves.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Preset;

/// Default CRF for the HEVC encode.
pub const DEFAULT_ENCODE_CRF: u8 = 24;

/// Default audio bitrate passed to the encoder.
pub const DEFAULT_AUDIO_BITRATE: &str = "128k";

/// Default per-process concurrency of the I/O worker pool.
pub const DEFAULT_IO_WORKER_CONCURRENCY: usize = 50;

/// Default root for per-job workspaces.
pub const DEFAULT_CACHE_DIR: &str = "/var/cache/jobs";

/// Minimum interval between edits of a job's status message.
pub const STATUS_EDIT_INTERVAL: Duration = Duration::from_secs(5);

/// Branding values used when a user has no settings of their own.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandingDefaults {
    /// Default brand tag for standardized filenames.
    pub brand_name: String,
    /// Default website link for captions.
    pub website: String,
}

impl Default for BrandingDefaults {
    fn default() -> Self {
        Self {
            brand_name: "MyEnc".to_string(),
            website: "t.me/YourChannel".to_string(),
        }
    }
}

/// Typed configuration for the whole process.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Chat platform bot token.
    pub bot_token: String,
    /// Users allowed to submit jobs.
    pub admin_user_ids: Vec<i64>,
    /// Path of the SQLite database file.
    pub database_path: PathBuf,
    /// Root directory for per-job workspaces.
    pub cache_dir: PathBuf,
    /// Preset used when a request does not carry one.
    pub encode_preset_default: Preset,
    /// Constant rate factor for the video encode (0-51).
    pub encode_crf: u8,
    /// Audio bitrate, e.g. "128k".
    pub audio_bitrate: String,
    /// CPU worker slots; one encoder subprocess per slot.
    pub cpu_worker_slots: usize,
    /// Concurrent jobs per I/O worker process.
    pub io_worker_concurrency: usize,
    /// Branding defaults resolved into user settings at read time.
    pub branding: BrandingDefaults,
    /// Base delay for transient-failure backoff (doubles per attempt).
    pub retry_base_delay: Duration,
    /// Maximum attempts per stage for transient failures.
    pub retry_max_attempts: u32,
}

impl Config {
    /// Default CPU worker slots for a host: OS cores minus one, floor 1.
    #[must_use]
    pub const fn default_cpu_slots(cores: usize) -> usize {
        if cores > 1 { cores - 1 } else { 1 }
    }

    /// Validate the resolved configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bot_token.trim().is_empty() {
            return Err(ConfigError::Missing("bot token"));
        }
        if self.admin_user_ids.is_empty() {
            return Err(ConfigError::Missing("admin user ids"));
        }
        if self.encode_crf > 51 {
            return Err(ConfigError::Invalid {
                field: "ENCODE_CRF",
                reason: format!("{} is out of range 0-51", self.encode_crf),
            });
        }
        if self.cpu_worker_slots == 0 {
            return Err(ConfigError::Invalid {
                field: "CPU_WORKER_SLOTS",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.io_worker_concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "IO_WORKER_CONCURRENCY",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration resolution or validation failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required value was not provided.
    #[error("missing required configuration: {0}")]
    Missing(&'static str),

    /// A provided value is out of range or unparseable.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// The environment variable at fault.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            bot_token: "123:abc".to_string(),
            admin_user_ids: vec![42],
            database_path: PathBuf::from("/tmp/revenc.db"),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            encode_preset_default: Preset::Slow,
            encode_crf: DEFAULT_ENCODE_CRF,
            audio_bitrate: DEFAULT_AUDIO_BITRATE.to_string(),
            cpu_worker_slots: 3,
            io_worker_concurrency: DEFAULT_IO_WORKER_CONCURRENCY,
            branding: BrandingDefaults::default(),
            retry_base_delay: Duration::from_secs(60),
            retry_max_attempts: 3,
        }
    }

    #[test]
    fn cpu_slot_default_floors_at_one() {
        assert_eq!(Config::default_cpu_slots(1), 1);
        assert_eq!(Config::default_cpu_slots(2), 1);
        assert_eq!(Config::default_cpu_slots(8), 7);
    }

    #[test]
    fn validation_catches_bad_values() {
        assert!(valid_config().validate().is_ok());

        let mut no_token = valid_config();
        no_token.bot_token = String::new();
        assert!(matches!(
            no_token.validate(),
            Err(ConfigError::Missing("bot token"))
        ));

        let mut bad_crf = valid_config();
        bad_crf.encode_crf = 60;
        assert!(bad_crf.validate().is_err());

        let mut zero_slots = valid_config();
        zero_slots.cpu_worker_slots = 0;
        assert!(zero_slots.validate().is_err());
    }
}
