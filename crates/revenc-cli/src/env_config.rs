//! Environment resolution into the typed `Config`.
//!
//! The only place in the process that reads the environment; the
//! resolved record is passed explicitly everywhere else.

use std::path::PathBuf;
use std::time::Duration;

use revenc_core::config::{
    BrandingDefaults, Config, ConfigError, DEFAULT_AUDIO_BITRATE, DEFAULT_CACHE_DIR,
    DEFAULT_ENCODE_CRF, DEFAULT_IO_WORKER_CONCURRENCY,
};
use revenc_core::domain::Preset;

/// Resolve the full configuration from the environment.
pub fn resolve() -> Result<Config, ConfigError> {
    let bot_token = std::env::var("BOT_TOKEN").unwrap_or_default();

    let admin_user_ids = std::env::var("ADMIN_USER_IDS")
        .unwrap_or_default()
        .split(',')
        .filter_map(|id| {
            let id = id.trim();
            if id.is_empty() { None } else { Some(id.parse()) }
        })
        .collect::<Result<Vec<i64>, _>>()
        .map_err(|e| ConfigError::Invalid {
            field: "ADMIN_USER_IDS",
            reason: e.to_string(),
        })?;

    let encode_preset_default = match std::env::var("ENCODE_PRESET_DEFAULT") {
        Ok(value) => Preset::parse(&value).ok_or_else(|| ConfigError::Invalid {
            field: "ENCODE_PRESET_DEFAULT",
            reason: format!("unknown preset: {value}"),
        })?,
        Err(_) => Preset::Slow,
    };

    let config = Config {
        bot_token,
        admin_user_ids,
        database_path: path_var("DATABASE_PATH", "/var/lib/revenc/revenc.db"),
        cache_dir: path_var("CACHE_DIR", DEFAULT_CACHE_DIR),
        encode_preset_default,
        encode_crf: parse_var("ENCODE_CRF", DEFAULT_ENCODE_CRF)?,
        audio_bitrate: std::env::var("AUDIO_BITRATE")
            .unwrap_or_else(|_| DEFAULT_AUDIO_BITRATE.to_string()),
        cpu_worker_slots: parse_var(
            "CPU_WORKER_SLOTS",
            Config::default_cpu_slots(num_cpus::get()),
        )?,
        io_worker_concurrency: parse_var("IO_WORKER_CONCURRENCY", DEFAULT_IO_WORKER_CONCURRENCY)?,
        branding: BrandingDefaults {
            brand_name: std::env::var("BRANDING_TEXT")
                .unwrap_or_else(|_| BrandingDefaults::default().brand_name),
            website: std::env::var("BRANDING_WEBSITE")
                .unwrap_or_else(|_| BrandingDefaults::default().website),
        },
        retry_base_delay: Duration::from_secs(60),
        retry_max_attempts: 3,
    };

    config.validate()?;
    Ok(config)
}

fn path_var(name: &str, default: &str) -> PathBuf {
    std::env::var(name).map_or_else(|_| PathBuf::from(default), PathBuf::from)
}

fn parse_var<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            field: name,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
