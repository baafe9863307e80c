//! Environment-driven configuration (spec §6's "environment/config knobs
//! the core consumes"). Every knob has a typed default matching the spec
//! text; `from_env` only overrides a field when the variable is present
//! and parses, logging a warning and keeping the default otherwise.

use std::time::Duration;

pub const SESSION_KEY_ROTATION_HOURS: i64 = 24;
pub const MAX_MESSAGES_PER_CHAIN: u32 = 1000;
pub const MAX_SKIPPED_KEYS_PER_CHAIN: usize = 1000;
pub const ONE_TIME_PREKEY_POOL_SIZE: usize = 100;
pub const SIGNED_PREKEY_ROTATION_DAYS: i64 = 7;
pub const EPOCH_KEY_RETENTION_COUNT: usize = 10;
pub const DEFAULT_SESSION_STORE_PATH: &str = "sonet-sessions.db";

#[derive(Debug, Clone)]
pub struct SonetConfig {
    pub session_key_rotation_hours: i64,
    pub max_messages_per_chain: u32,
    pub max_skipped_keys_per_chain: usize,
    pub one_time_prekey_pool_size: usize,
    pub signed_prekey_rotation_days: i64,
    pub epoch_key_retention_count: usize,
    pub session_store_path: String,
}

impl Default for SonetConfig {
    fn default() -> Self {
        Self {
            session_key_rotation_hours: SESSION_KEY_ROTATION_HOURS,
            max_messages_per_chain: MAX_MESSAGES_PER_CHAIN,
            max_skipped_keys_per_chain: MAX_SKIPPED_KEYS_PER_CHAIN,
            one_time_prekey_pool_size: ONE_TIME_PREKEY_POOL_SIZE,
            signed_prekey_rotation_days: SIGNED_PREKEY_ROTATION_DAYS,
            epoch_key_retention_count: EPOCH_KEY_RETENTION_COUNT,
            session_store_path: DEFAULT_SESSION_STORE_PATH.to_string(),
        }
    }
}

impl SonetConfig {
    /// Overlay environment variables onto [`SonetConfig::default`]. A
    /// variable that's present but fails to parse is logged and the
    /// default for that field is kept, rather than failing startup over a
    /// single malformed knob.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.session_key_rotation_hours = env_i64("SESSION_KEY_ROTATION_HOURS", config.session_key_rotation_hours);
        config.max_messages_per_chain = env_u32("MAX_MESSAGES_PER_CHAIN", config.max_messages_per_chain);
        config.max_skipped_keys_per_chain =
            env_usize("MAX_SKIPPED_KEYS_PER_CHAIN", config.max_skipped_keys_per_chain);
        config.one_time_prekey_pool_size = env_usize("ONE_TIME_PREKEY_POOL_SIZE", config.one_time_prekey_pool_size);
        config.signed_prekey_rotation_days =
            env_i64("SIGNED_PREKEY_ROTATION_DAYS", config.signed_prekey_rotation_days);
        config.epoch_key_retention_count =
            env_usize("EPOCH_KEY_RETENTION_COUNT", config.epoch_key_retention_count);
        if let Ok(path) = std::env::var("SESSION_STORE_PATH") {
            config.session_store_path = path;
        }
        config
    }

    pub fn session_key_rotation(&self) -> Duration {
        Duration::from_secs(self.session_key_rotation_hours.max(0) as u64 * 3600)
    }
}

fn env_i64(name: &str, default: i64) -> i64 {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(name, raw, "could not parse env override; keeping default");
            default
        }),
        Err(_) => default,
    }
}

fn env_u32(name: &str, default: u32) -> u32 {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(name, raw, "could not parse env override; keeping default");
            default
        }),
        Err(_) => default,
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(name, raw, "could not parse env override; keeping default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_knobs() {
        let config = SonetConfig::default();
        assert_eq!(config.session_key_rotation_hours, 24);
        assert_eq!(config.max_messages_per_chain, 1000);
        assert_eq!(config.max_skipped_keys_per_chain, 1000);
        assert_eq!(config.one_time_prekey_pool_size, 100);
        assert_eq!(config.signed_prekey_rotation_days, 7);
        assert_eq!(config.epoch_key_retention_count, 10);
    }
}
