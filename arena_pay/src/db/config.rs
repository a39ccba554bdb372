//! Database configuration module.

use std::env;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub database_url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Connection timeout in seconds
    pub connection_timeout_secs: u64,

    /// Idle connection timeout in seconds
    pub idle_timeout_secs: u64,

    /// Maximum connection lifetime in seconds
    pub max_lifetime_secs: u64,
}

impl DatabaseConfig {
    /// Create configuration from environment variables
    ///
    /// Expected environment variables:
    /// - `DATABASE_URL`: PostgreSQL connection string
    /// - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 20)
    /// - `DB_MIN_CONNECTIONS`: Minimum pool size (default: 2)
    /// - `DB_CONNECTION_TIMEOUT_SECS`: Connection timeout in seconds (default: 10)
    /// - `DB_IDLE_TIMEOUT_SECS`: Idle timeout in seconds (default: 600)
    /// - `DB_MAX_LIFETIME_SECS`: Max lifetime in seconds (default: 1800)
    ///
    /// Returns `None` when `DATABASE_URL` is not set, which callers treat as
    /// "run on the in-memory stores".
    pub fn from_env() -> Option<Self> {
        let database_url = env::var("DATABASE_URL").ok()?;
        Some(Self::with_url(database_url))
    }

    /// Pool settings from the environment around an explicit URL
    pub fn with_url(database_url: String) -> Self {
        Self {
            database_url,
            max_connections: parse_env_or("DB_MAX_CONNECTIONS", 20),
            min_connections: parse_env_or("DB_MIN_CONNECTIONS", 2),
            connection_timeout_secs: parse_env_or("DB_CONNECTION_TIMEOUT_SECS", 10),
            idle_timeout_secs: parse_env_or("DB_IDLE_TIMEOUT_SECS", 600),
            max_lifetime_secs: parse_env_or("DB_MAX_LIFETIME_SECS", 1800),
        }
    }

    /// Default configuration for local development
    pub fn development() -> Self {
        Self {
            database_url: "postgres://postgres@localhost/arena_pay".to_string(),
            max_connections: 20,
            min_connections: 2,
            connection_timeout_secs: 10,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::development()
    }
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
