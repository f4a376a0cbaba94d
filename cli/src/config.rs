// Configuration management for the swarmnet CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/swarmnet/config.json
// - Linux: ~/.config/swarmnet/config.json
// - Windows: %APPDATA%\swarmnet\config.json

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use swarmnet_core::NetworkConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Mailbox key used by `poll` and as the default sender identity
    pub user_public_key: Option<String>,

    /// Storage path for the snode caches
    pub storage_path: Option<String>,

    /// Network settings handed to the core
    pub network: NetworkConfig,
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("swarmnet");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("swarmnet");

        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        Ok(data_dir)
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        let config_file = Self::config_file()?;

        if config_file.exists() {
            let contents =
                std::fs::read_to_string(&config_file).context("Failed to read config file")?;
            Self::from_json(&contents)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    fn from_json(contents: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(contents).context("Failed to parse config file")?;
        config.network.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_file = Self::config_file()?;
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_file, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Resolved storage location, falling back to the data directory
    pub fn resolved_storage_path(&self) -> Result<String> {
        match &self.storage_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("snodes").to_string_lossy().to_string()),
        }
    }

    pub fn add_seed_node(&mut self, url: String) -> Result<()> {
        if !self.network.seed_nodes.contains(&url) {
            self.network.seed_nodes.push(url);
            self.save()?;
        }
        Ok(())
    }

    pub fn remove_seed_node(&mut self, url: &str) -> Result<()> {
        self.network.seed_nodes.retain(|n| n != url);
        self.network.validate()?;
        self.save()?;
        Ok(())
    }

    /// Set a config value without saving
    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let network = &mut self.network;
        match key {
            "user_public_key" => {
                self.user_public_key = (!value.is_empty()).then(|| value.to_string());
            }
            "storage_path" => {
                self.storage_path = (!value.is_empty()).then(|| value.to_string());
            }
            "use_onion_requests" => {
                network.use_onion_requests = value.parse().context("Invalid boolean value")?;
            }
            "path_size" => network.path_size = value.parse().context("Invalid number")?,
            "path_count" => network.path_count = value.parse().context("Invalid number")?,
            "max_retry_count" => {
                network.max_retry_count = value.parse().context("Invalid number")?;
            }
            "retry_interval_ms" => {
                network.retry_interval_ms = value.parse().context("Invalid number")?;
            }
            "request_timeout_secs" => {
                network.request_timeout_secs = value.parse().context("Invalid number")?;
            }
            "poll_interval_ms" => {
                network.poll_interval_ms = value.parse().context("Invalid number")?;
            }
            "failure_threshold" => {
                network.failure_threshold = value.parse().context("Invalid number")?;
            }
            "minimum_snode_version" => network.minimum_snode_version = value.to_string(),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        network.validate()?;
        Ok(())
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.apply(key, value)?;
        self.save()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.list()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        let n = &self.network;
        vec![
            (
                "user_public_key".to_string(),
                self.user_public_key.clone().unwrap_or_else(|| "(unset)".to_string()),
            ),
            (
                "storage_path".to_string(),
                self.storage_path.clone().unwrap_or_else(|| "(auto)".to_string()),
            ),
            ("use_onion_requests".to_string(), n.use_onion_requests.to_string()),
            ("path_size".to_string(), n.path_size.to_string()),
            ("path_count".to_string(), n.path_count.to_string()),
            ("max_retry_count".to_string(), n.max_retry_count.to_string()),
            ("retry_interval_ms".to_string(), n.retry_interval_ms.to_string()),
            ("request_timeout_secs".to_string(), n.request_timeout_secs.to_string()),
            ("poll_interval_ms".to_string(), n.poll_interval_ms.to_string()),
            ("failure_threshold".to_string(), n.failure_threshold.to_string()),
            ("minimum_snode_version".to_string(), n.minimum_snode_version.clone()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.user_public_key.is_none());
        assert!(config.network.use_onion_requests);
        assert_eq!(config.get("path_count").as_deref(), Some("2"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = Config::from_json(r#"{"user_public_key": "05abc"}"#).unwrap();
        assert_eq!(config.user_public_key.as_deref(), Some("05abc"));
        assert_eq!(config.network.path_size, 3);
    }

    #[test]
    fn test_apply_rejects_invalid_values() {
        let mut config = Config::default();
        assert!(config.apply("path_count", "0").is_err());
        assert!(config.apply("path_size", "three").is_err());
        assert!(config.apply("listen_port", "1").is_err());
        config.apply("use_onion_requests", "false").unwrap();
        assert!(!config.network.use_onion_requests);
    }
}
