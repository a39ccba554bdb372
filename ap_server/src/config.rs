//! Server configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use arena_pay::db::DatabaseConfig;
use arena_pay::EngineConfig;
use std::net::SocketAddr;

const DEFAULT_BIND: &str = "127.0.0.1:8080";

/// Complete server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind: SocketAddr,
    /// Database configuration; `None` runs on the in-memory stores
    pub database: Option<DatabaseConfig>,
    pub security: SecurityConfig,
    /// Prometheus listener address
    pub metrics_bind: Option<SocketAddr>,
    pub engine: EngineConfig,
}

/// Security-related configuration
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// JWT verification secret (required)
    pub jwt_secret: String,
    /// Shared secret for callback signatures; checks are off when absent
    pub callback_secret: Option<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `bind_override` - Optional bind address override (from CLI args)
    /// * `database_url_override` - Optional database URL override (from CLI args)
    ///
    /// # Errors
    ///
    /// Returns error if required variables are missing or invalid
    pub fn from_env(
        bind_override: Option<SocketAddr>,
        database_url_override: Option<String>,
    ) -> Result<Self, ConfigError> {
        let bind = match bind_override {
            Some(bind) => bind,
            None => parse_addr("SERVER_BIND")?.unwrap_or_else(default_bind),
        };

        let database = database_url_override
            .map(DatabaseConfig::with_url)
            .or_else(DatabaseConfig::from_env);

        // Security configuration (REQUIRED)
        let jwt_secret = std::env::var("JWT_SECRET").map_err(|_| ConfigError::MissingRequired {
            var: "JWT_SECRET".to_string(),
            hint: "Generate with: openssl rand -hex 32".to_string(),
        })?;
        let callback_secret = std::env::var("CALLBACK_SECRET")
            .ok()
            .filter(|s| !s.is_empty());

        let engine = EngineConfig::from_env().map_err(|e| ConfigError::Invalid {
            var: "engine".to_string(),
            reason: e.to_string(),
        })?;

        Ok(ServerConfig {
            bind,
            database,
            security: SecurityConfig {
                jwt_secret,
                callback_secret,
            },
            metrics_bind: parse_addr("METRICS_BIND")?,
            engine,
        })
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.security.jwt_secret.len() < 32 {
            return Err(ConfigError::Invalid {
                var: "JWT_SECRET".to_string(),
                reason: "Must be at least 32 characters (128-bit security)".to_string(),
            });
        }

        if let Some(secret) = &self.security.callback_secret
            && secret.len() < 16
        {
            return Err(ConfigError::Invalid {
                var: "CALLBACK_SECRET".to_string(),
                reason: "Must be at least 16 characters".to_string(),
            });
        }

        if self.metrics_bind == Some(self.bind) {
            return Err(ConfigError::Invalid {
                var: "METRICS_BIND".to_string(),
                reason: format!("Must differ from the server address ({})", self.bind),
            });
        }

        self.engine.validate().map_err(|e| ConfigError::Invalid {
            var: "engine".to_string(),
            reason: e.to_string(),
        })
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Parse an optional socket address variable
fn parse_addr(key: &str) -> Result<Option<SocketAddr>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                var: key.to_string(),
                reason: format!("'{raw}' is not an IP:PORT address (e.g. {DEFAULT_BIND})"),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ServerConfig {
        ServerConfig {
            bind: "127.0.0.1:8080".parse().unwrap(),
            database: None,
            security: SecurityConfig {
                jwt_secret: "a".repeat(32),
                callback_secret: None,
            },
            metrics_bind: None,
            engine: EngineConfig::default(),
        }
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingRequired {
            var: "JWT_SECRET".to_string(),
            hint: "Use openssl".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("JWT_SECRET"));
        assert!(msg.contains("Use openssl"));
    }

    #[test]
    fn test_valid_config_passes() {
        config().validate().unwrap();
    }

    #[test]
    fn test_short_jwt_secret_rejected() {
        let mut config = config();
        config.security.jwt_secret = "short".to_string();
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::Invalid { var, .. } if var == "JWT_SECRET"
        ));
    }

    #[test]
    fn test_short_callback_secret_rejected() {
        let mut config = config();
        config.security.callback_secret = Some("tiny".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_metrics_port_must_differ() {
        let mut config = config();
        config.metrics_bind = Some(config.bind);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_bind_matches_documented() {
        assert_eq!(default_bind().to_string(), DEFAULT_BIND);
    }
}
