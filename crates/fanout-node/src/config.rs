//! Node configuration types.

use crate::observability::LogFormat;
use fanout_core::HubConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid YAML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Configuration for the fan-out node.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node identifier. Overrides `fanout.node_id` when set.
    pub node_id: Option<String>,
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Hub tunables.
    pub fanout: HubConfig,
    /// Channel authorization.
    pub auth: AuthConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address for HTTP, WebSocket and SSE.
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Channel authorization settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Require signatures for `private-` and `presence-` topics.
    pub enabled: bool,
    /// Public application key, prefixed to signatures.
    pub app_key: String,
    /// Shared signing secret.
    pub app_secret: String,
}

impl NodeConfig {
    /// Load and validate a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check limits and secrets.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fanout = &self.fanout;
        let limits = [
            ("fanout.max_clients", fanout.max_clients as u64),
            ("fanout.max_payload_bytes", fanout.max_payload_bytes as u64),
            (
                "fanout.max_subscriptions_per_client",
                fanout.max_subscriptions_per_client as u64,
            ),
            ("fanout.heartbeat_interval_ms", fanout.heartbeat_interval_ms),
            ("fanout.write_timeout_ms", fanout.write_timeout_ms),
            ("fanout.client_buffer", fanout.client_buffer as u64),
        ];
        if let Some((name, _)) = limits.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{} must be greater than 0", name)));
        }

        if self.node_id.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigError::Invalid("node_id must not be empty".to_string()));
        }

        if self.auth.enabled {
            if self.auth.app_key.is_empty() {
                return Err(ConfigError::Invalid(
                    "auth.app_key is required when auth is enabled".to_string(),
                ));
            }
            if self.auth.app_secret.is_empty() {
                return Err(ConfigError::Invalid(
                    "auth.app_secret is required when auth is enabled".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Hub configuration with the node ID applied.
    pub fn hub_config(&self) -> HubConfig {
        let mut config = self.fanout.clone();
        if let Some(node_id) = &self.node_id {
            config.node_id = node_id.clone();
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.listen_addr.port(), 8080);
        assert!(!config.auth.enabled);
    }

    #[test]
    fn test_partial_yaml() {
        let config = NodeConfig::from_yaml(
            r#"
node_id: node-1
server:
  listen_addr: "0.0.0.0:9000"
logging:
  format: json
fanout:
  max_clients: 50
"#,
        )
        .unwrap();

        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.fanout.max_clients, 50);
        assert_eq!(config.fanout.max_payload_bytes, 10 * 1024);
        assert_eq!(config.hub_config().node_id, "node-1");
    }

    #[test]
    fn test_zero_limit_rejected() {
        let result = NodeConfig::from_yaml("fanout:\n  max_payload_bytes: 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("max_payload_bytes")));
    }

    #[test]
    fn test_auth_requires_secret() {
        let result = NodeConfig::from_yaml("auth:\n  enabled: true\n  app_key: key\n");
        assert!(matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("app_secret")));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "auth:\n  enabled: true\n  app_key: key\n  app_secret: secret").unwrap();

        let config = NodeConfig::load(file.path()).unwrap();
        assert!(config.auth.enabled);
        assert_eq!(config.auth.app_secret, "secret");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = NodeConfig::load(dir.path().join("missing.yaml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
