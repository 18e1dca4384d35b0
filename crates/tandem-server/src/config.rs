//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the server starts with zero configuration
//! for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Socket address for the HTTP + WebSocket server.
    /// Env: `TANDEM_ADDR`
    /// Default: `0.0.0.0:3000`
    pub addr: SocketAddr,

    /// SQLite database file path.
    /// Env: `TANDEM_DB_PATH`
    /// Default: `tandem.db`
    pub db_path: PathBuf,

    /// HMAC secret for JWT verification.
    /// Env: `TANDEM_JWT_SECRET`
    /// Default: dev-only placeholder.
    pub jwt_secret: String,

    /// Time-to-live for cached credential verifications.
    /// Env: `TANDEM_TOKEN_CACHE_TTL_SECS`
    /// Default: 300 seconds.
    pub token_cache_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: ([0, 0, 0, 0], 3000).into(),
            db_path: PathBuf::from("tandem.db"),
            jwt_secret: "dev-secret-change-me".to_string(),
            token_cache_ttl: Duration::from_secs(300),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("TANDEM_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid TANDEM_ADDR, using default"),
            }
        }

        if let Ok(path) = std::env::var("TANDEM_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }

        if let Ok(secret) = std::env::var("TANDEM_JWT_SECRET") {
            if !secret.is_empty() {
                config.jwt_secret = secret;
            }
        }

        if let Ok(val) = std::env::var("TANDEM_TOKEN_CACHE_TTL_SECS") {
            match val.parse::<u64>() {
                Ok(secs) => config.token_cache_ttl = Duration::from_secs(secs),
                Err(_) => {
                    tracing::warn!(value = %val, "Invalid TANDEM_TOKEN_CACHE_TTL_SECS, using default")
                }
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.addr, ([0, 0, 0, 0], 3000).into());
        assert_eq!(config.db_path, PathBuf::from("tandem.db"));
        assert_eq!(config.token_cache_ttl, Duration::from_secs(300));
    }
}
