use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins, comma separated
    pub cors_origins: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Path of the collaboration websocket endpoint
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// HS256 secret used to verify signed user tokens
    pub auth_jwt_secret: Option<String>,

    /// Fixed token accepted without verification (development only)
    pub auth_dev_token: Option<String>,

    /// Database URL
    pub db_url: Option<String>,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Period of the dirty-document snapshot sweep
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,

    /// Minimum spacing between update-triggered snapshots of one session
    #[serde(default = "default_snapshot_min_interval_secs")]
    pub snapshot_min_interval_secs: u64,

    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,

    /// Sessions idle for longer than this are archived
    #[serde(default = "default_session_archive_days")]
    pub session_archive_days: i64,

    /// Collaboration events older than this are purged
    #[serde(default = "default_event_retention_days")]
    pub event_retention_days: i64,

    /// Document type used when a join does not name one
    #[serde(default = "default_document_type")]
    pub default_document_type: String,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        // Load from environment variables using envy
        let config = match envy::from_env::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("❌ Failed to load configuration: {}", e);
                return Err(ConfigError::EnvError(e));
            }
        };
        config.validate()?;
        info!("✅ Configuration loaded successfully");
        Ok(config)
    }

    /// Reject combinations that must never reach a running server
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.is_production() && self.auth_dev_token.is_some() {
            return Err(ConfigError::Invalid(
                "AUTH_DEV_TOKEN must not be set in production".to_string(),
            ));
        }
        if !self.ws_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "WS_PATH '{}' must start with '/'",
                self.ws_path
            )));
        }
        if self.heartbeat_interval_secs == 0 || self.snapshot_interval_secs == 0 || self.maintenance_interval_secs == 0 {
            return Err(ConfigError::Invalid("Supervisor intervals must be greater than zero".to_string()));
        }
        Ok(())
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "prod" || self.environment.to_lowercase() == "production"
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }

    pub fn snapshot_min_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_min_interval_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    /// Parsed CORS origins, `None` when every origin is allowed
    pub fn cors_origin_list(&self) -> Option<Vec<String>> {
        self.cors_origins.as_ref().map(|origins| {
            origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            cors_origins: None,
            ws_path: default_ws_path(),
            auth_jwt_secret: None,
            auth_dev_token: None,
            db_url: None,
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            snapshot_interval_secs: default_snapshot_interval_secs(),
            snapshot_min_interval_secs: default_snapshot_min_interval_secs(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
            session_archive_days: default_session_archive_days(),
            event_retention_days: default_event_retention_days(),
            default_document_type: default_document_type(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    EnvError(envy::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EnvError(e) => write!(f, "Environment variable error: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_snapshot_interval_secs() -> u64 {
    60
}

fn default_snapshot_min_interval_secs() -> u64 {
    10
}

fn default_maintenance_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_session_archive_days() -> i64 {
    30
}

fn default_event_retention_days() -> i64 {
    90
}

fn default_document_type() -> String {
    "field_notes".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server_address(), "0.0.0.0:3000");
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.session_archive_days, 30);
        assert_eq!(config.event_retention_days, 90);
    }

    #[test]
    fn dev_token_is_refused_in_production() {
        let config = Config {
            environment: "production".to_string(),
            auth_dev_token: Some("dev".to_string()),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn cors_origins_are_split_and_trimmed() {
        let config = Config {
            cors_origins: Some("https://a.example, https://b.example,".to_string()),
            ..Config::default()
        };
        assert_eq!(
            config.cors_origin_list(),
            Some(vec!["https://a.example".to_string(), "https://b.example".to_string()])
        );
    }
}
