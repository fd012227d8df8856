//! Environment variable helpers
//!
//! Used by `ChannelConfig::from_env()` and the command-line tools. The
//! channel itself never reads the environment.
//!
//! ```ignore
//! use achat_core::env::{env_get_bool, env_get_str};
//!
//! let addr: String = env_get_str("ACHAT_ADDR", "127.0.0.1:4000");
//! let nonblock = env_get_bool("ACHAT_NONBLOCK", false);
//! ```

use std::str::FromStr;

/// Boolean flag: "1", "true", "yes", "on" (any case) are true,
/// "0", "false", "no", "off" are false, anything else yields `default`
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// `Some(T)` when `key` is set and parses
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Raw string value or `default`
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
