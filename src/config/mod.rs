//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::util::rate_limit::INPUT_RATE_LIMIT;
use crate::util::time::{TICKS_1S, TICKS_3S};

/// Room name clients join when they do not ask for one
pub const DEFAULT_ROOM_NAME: &str = "cr";

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit logs as JSON lines instead of human-readable text
    pub log_json: bool,
    /// Allowed client origins for CORS (comma-separated, `*` for any)
    pub client_origin: String,
    /// Room joined when the client omits one
    pub default_room: String,
    /// Round length in seconds
    pub round_duration_secs: u64,
    /// Max websocket messages per second per connection
    pub input_rate_limit: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:5001".to_string())
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_json: env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")),
            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),
            default_room: env::var("ROOM_NAME").unwrap_or_else(|_| DEFAULT_ROOM_NAME.to_string()),
            round_duration_secs: parse_var("ROUND_DURATION_SECS", 180)?,
            input_rate_limit: parse_var("INPUT_RATE_LIMIT", INPUT_RATE_LIMIT)?,
        })
    }

    /// Per-match timing derived from this configuration
    pub fn match_config(&self) -> MatchConfig {
        MatchConfig {
            round_ticks: self.round_duration_secs * TICKS_1S,
            ..MatchConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 5001)),
            log_level: "info".to_string(),
            log_json: false,
            client_origin: "*".to_string(),
            default_room: DEFAULT_ROOM_NAME.to_string(),
            round_duration_secs: 180,
            input_rate_limit: INPUT_RATE_LIMIT,
        }
    }
}

/// Tick budgets for one match
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatchConfig {
    /// Countdown between the room filling up and play starting
    pub start_delay_ticks: u64,
    /// Length of the playing phase
    pub round_ticks: u64,
    /// How long the result stays up before connections close
    pub done_delay_ticks: u64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            start_delay_ticks: TICKS_3S,
            round_ticks: 180 * TICKS_1S,
            done_delay_ticks: TICKS_3S,
        }
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_config_from_round_duration() {
        let config = Config {
            round_duration_secs: 60,
            ..Config::default()
        };
        let match_config = config.match_config();
        assert_eq!(match_config.round_ticks, 1200);
        assert_eq!(match_config.start_delay_ticks, 60);
    }
}
