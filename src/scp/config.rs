//! SCP transfer configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Settings shared by every transfer of an [`crate::ScpClient`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScpConfig {
    /// Path of the `scp` binary on the remote host
    #[serde(default = "default_remote_binary")]
    pub remote_binary: String,

    /// Per-transfer timeout in seconds, used when a call carries no deadline
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_remote_binary() -> String {
    "/usr/bin/scp".to_string()
}

fn default_timeout() -> u64 {
    60
}

impl Default for ScpConfig {
    fn default() -> Self {
        Self {
            remote_binary: default_remote_binary(),
            timeout_secs: default_timeout(),
        }
    }
}

impl ScpConfig {
    pub fn with_remote_binary(mut self, remote_binary: impl Into<String>) -> Self {
        self.remote_binary = remote_binary.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: ScpConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json_str(&content)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.remote_binary.trim().is_empty() {
            return Err(ConfigError::Invalid("remote_binary must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = ScpConfig::from_json_str(r#"{"timeout_secs": 5}"#).unwrap();
        assert_eq!(config.remote_binary, "/usr/bin/scp");
        assert_eq!(config.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_rejects_empty_binary() {
        assert!(matches!(
            ScpConfig::from_json_str(r#"{"remote_binary": " "}"#),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("scp.json");
        std::fs::write(&path, r#"{"remote_binary": "/opt/bin/scp"}"#).unwrap();

        let config = ScpConfig::from_json_file(&path).await.unwrap();
        assert_eq!(config.remote_binary, "/opt/bin/scp");
        assert_eq!(config.timeout_secs, 60);
    }
}
