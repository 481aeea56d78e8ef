//! Engine configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the engine runs with zero
//! configuration; embedders override per deployment.

use quartier_shared::constants::{
    DEFAULT_MESSAGE_PAGE_SIZE, MAX_MESSAGE_LEN, TYPING_IDLE_CLEAR_MILLIS,
    TYPING_REBROADCAST_MILLIS, TYPING_TTL_MILLIS,
};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Age past which a stored typing flag counts as not-typing.
    /// Env: `QUARTIER_TYPING_TTL_MS`
    /// Default: `10000`
    pub typing_ttl_millis: i64,

    /// Minimum interval between repeated typing=true writes in a burst.
    /// Env: `QUARTIER_TYPING_REBROADCAST_MS`
    /// Default: `2000`
    pub typing_rebroadcast_millis: i64,

    /// Keystroke idle time before typing=false is written automatically.
    /// Env: `QUARTIER_TYPING_IDLE_CLEAR_MS`
    /// Default: `2000`
    pub typing_idle_clear_millis: i64,

    /// Message page size when the caller passes no limit.
    /// Env: `QUARTIER_MESSAGE_PAGE_SIZE`
    /// Default: `50`
    pub message_page_size: usize,

    /// Maximum accepted text message length in bytes.
    /// Env: `QUARTIER_MAX_MESSAGE_LEN`
    /// Default: `16384`
    pub max_message_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            typing_ttl_millis: TYPING_TTL_MILLIS,
            typing_rebroadcast_millis: TYPING_REBROADCAST_MILLIS,
            typing_idle_clear_millis: TYPING_IDLE_CLEAR_MILLIS,
            message_page_size: DEFAULT_MESSAGE_PAGE_SIZE,
            max_message_len: MAX_MESSAGE_LEN,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        read_env("QUARTIER_TYPING_TTL_MS", &mut config.typing_ttl_millis);
        read_env(
            "QUARTIER_TYPING_REBROADCAST_MS",
            &mut config.typing_rebroadcast_millis,
        );
        read_env(
            "QUARTIER_TYPING_IDLE_CLEAR_MS",
            &mut config.typing_idle_clear_millis,
        );
        read_env("QUARTIER_MESSAGE_PAGE_SIZE", &mut config.message_page_size);
        read_env("QUARTIER_MAX_MESSAGE_LEN", &mut config.max_message_len);

        config
    }
}

fn read_env<T: std::str::FromStr>(var: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(var) {
        match raw.parse() {
            Ok(value) => *target = value,
            Err(_) => {
                tracing::warn!(var, value = %raw, "invalid value, using default");
            }
        }
    }
}
