// Configuration for the identity session client
// Resolved once at startup: defaults, then an optional TOML file, then environment

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::auth::SessionManagerConfig;

pub const ENV_PREFIX: &str = "IDENTITY_SESSION_";
pub const DEFAULT_CONFIG_FILE: &str = "identity-session.toml";

/// Internet Identity canister id on mainnet and in default local deployments
const DEFAULT_II_CANISTER_ID: &str = "rdmx6-jaaaa-aaaaa-aaadq-cai";

const MIN_TIME_TO_LIVE_SECS: u64 = 60;
const MAX_TIME_TO_LIVE_SECS: u64 = 30 * 86400;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] figment::Error),

    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidConfig { key: String, reason: String },
}

/// Deployment the identity provider lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Ic,
    #[default]
    Local,
    Testnet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: Network,

    /// Explicit provider URL, overrides the network-derived one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_provider: Option<Url>,

    pub internet_identity_canister_id: String,

    /// Maximum delegation lifetime requested at login
    pub max_time_to_live_secs: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub derivation_origin: Option<String>,

    /// Replica the request channel talks to
    pub replica_url: String,

    pub request_timeout_secs: u64,

    pub session_store_path: PathBuf,

    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: Network::default(),
            identity_provider: None,
            internet_identity_canister_id: DEFAULT_II_CANISTER_ID.to_string(),
            max_time_to_live_secs: 86400, // 1 day
            derivation_origin: None,
            replica_url: "http://localhost:4943".to_string(),
            request_timeout_secs: 30,
            session_store_path: PathBuf::from(".identity-session/session.json"),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Layered configuration sources
    pub fn figment(path: Option<&Path>) -> Figment {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate; an explicitly given file must exist
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::MissingConfig(format!(
                    "config file {}",
                    path.display()
                )));
            }
        }

        let config: Config = Self::figment(path).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_TIME_TO_LIVE_SECS..=MAX_TIME_TO_LIVE_SECS).contains(&self.max_time_to_live_secs) {
            return Err(ConfigError::InvalidConfig {
                key: "max_time_to_live_secs".to_string(),
                reason: format!(
                    "must be between {} and {} seconds",
                    MIN_TIME_TO_LIVE_SECS, MAX_TIME_TO_LIVE_SECS
                ),
            });
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig {
                key: "request_timeout_secs".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        if self.session_store_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidConfig {
                key: "session_store_path".to_string(),
                reason: "cannot be empty".to_string(),
            });
        }

        self.replica_url()?;
        self.identity_provider_url()?;
        Ok(())
    }

    pub fn replica_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.replica_url).map_err(|e| ConfigError::InvalidConfig {
            key: "replica_url".to_string(),
            reason: e.to_string(),
        })
    }

    /// Provider URL for the configured deployment
    pub fn identity_provider_url(&self) -> Result<Url, ConfigError> {
        if let Some(url) = &self.identity_provider {
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(ConfigError::InvalidConfig {
                    key: "identity_provider".to_string(),
                    reason: "must start with http:// or https://".to_string(),
                });
            }
            return Ok(url.clone());
        }

        let canister_id = self.internet_identity_canister_id.trim();
        if canister_id.is_empty() {
            return Err(ConfigError::MissingConfig(
                "internet_identity_canister_id".to_string(),
            ));
        }

        let raw = match self.network {
            Network::Ic => format!("https://{}.ic0.app", canister_id),
            Network::Local => format!("http://{}.localhost:4943", canister_id),
            Network::Testnet => format!("https://{}.dfinity.network", canister_id),
        };

        Url::parse(&raw).map_err(|e| ConfigError::InvalidConfig {
            key: "internet_identity_canister_id".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn max_time_to_live(&self) -> Duration {
        Duration::from_secs(self.max_time_to_live_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn session_manager_config(&self) -> Result<SessionManagerConfig, ConfigError> {
        Ok(SessionManagerConfig {
            identity_provider: self.identity_provider_url()?,
            max_time_to_live: self.max_time_to_live(),
            derivation_origin: self.derivation_origin.clone(),
        })
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_time_to_live(), Duration::from_secs(86400));
    }

    #[test]
    fn test_provider_url_per_network() {
        let mut config = Config::default();
        assert_eq!(
            config.identity_provider_url().unwrap().as_str(),
            "http://rdmx6-jaaaa-aaaaa-aaadq-cai.localhost:4943/"
        );

        config.network = Network::Ic;
        assert_eq!(
            config.identity_provider_url().unwrap().as_str(),
            "https://rdmx6-jaaaa-aaaaa-aaadq-cai.ic0.app/"
        );

        config.network = Network::Testnet;
        assert_eq!(
            config.identity_provider_url().unwrap().as_str(),
            "https://rdmx6-jaaaa-aaaaa-aaadq-cai.dfinity.network/"
        );
    }

    #[test]
    fn test_explicit_provider_wins() {
        let config = Config {
            network: Network::Ic,
            identity_provider: Some(Url::parse("https://provider.example").unwrap()),
            ..Default::default()
        };
        assert_eq!(
            config.identity_provider_url().unwrap().as_str(),
            "https://provider.example/"
        );
    }

    #[test]
    fn test_non_http_provider_rejected() {
        let config = Config {
            identity_provider: Some(Url::parse("ftp://provider.example").unwrap()),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_time_to_live_bounds() {
        let mut config = Config {
            max_time_to_live_secs: 30,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.max_time_to_live_secs = 31 * 86400;
        assert!(config.validate().is_err());

        config.max_time_to_live_secs = 8 * 3600;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_replica_url() {
        let config = Config {
            replica_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_missing_canister_id() {
        let config = Config {
            internet_identity_canister_id: "  ".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.identity_provider_url(),
            Err(ConfigError::MissingConfig(_))
        ));
    }

    #[test]
    fn test_file_and_env_layers() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                network = "ic"
                max_time_to_live_secs = 3600

                [logging]
                format = "json"
                "#,
            )?;
            jail.set_env("IDENTITY_SESSION_MAX_TIME_TO_LIVE_SECS", "7200");
            jail.set_env("IDENTITY_SESSION_LOGGING__LEVEL", "debug");

            let config = Config::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config.network, Network::Ic);
            assert_eq!(config.max_time_to_live_secs, 7200);
            assert_eq!(config.logging.format, LogFormat::Json);
            assert_eq!(config.logging.level, "debug");
            assert_eq!(config.request_timeout_secs, 30);
            Ok(())
        });
    }

    #[test]
    fn test_explicit_missing_file() {
        let result = Config::load(Some(Path::new("/definitely/not/here.toml")));
        assert!(matches!(result, Err(ConfigError::MissingConfig(_))));
    }
}
