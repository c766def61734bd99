// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading and saving link, BlobDB and PutBytes settings.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const APP_DIR: &str = "pebble-link";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for the item store.
    #[serde(skip)]
    pub data_dir: PathBuf,

    /// PPoG transport settings.
    pub link: LinkConfig,

    /// BlobDB sync settings.
    pub blobdb: BlobDbConfig,

    /// PutBytes transfer settings.
    pub putbytes: PutBytesConfig,
}

/// PPoG transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// MTU assumed before the link renegotiates it.
    pub initial_mtu: usize,

    /// Window we would like to send with. Capped at 25.
    pub desired_tx_window: u8,

    /// Window we are willing to receive with. Capped at 25.
    pub desired_rx_window: u8,

    /// Fall back to sending the reset ourselves when the peer stays quiet.
    pub reversed_ppog: bool,

    pub passive_reset_timeout_ms: u64,
    pub active_reset_timeout_ms: u64,
    pub retransmit_timeout_ms: u64,

    /// Resends allowed per frame before the connection fails.
    pub max_retries: u32,

    /// Log every frame at debug level.
    pub verbose_logging: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            initial_mtu: 23,
            desired_tx_window: 25,
            desired_rx_window: 25,
            reversed_ppog: false,
            passive_reset_timeout_ms: 12_000,
            active_reset_timeout_ms: 5_000,
            retransmit_timeout_ms: 10_000,
            max_retries: 2,
            verbose_logging: false,
        }
    }
}

impl LinkConfig {
    pub fn passive_reset_timeout(&self) -> Duration {
        Duration::from_millis(self.passive_reset_timeout_ms)
    }

    pub fn active_reset_timeout(&self) -> Duration {
        Duration::from_millis(self.active_reset_timeout_ms)
    }

    pub fn retransmit_timeout(&self) -> Duration {
        Duration::from_millis(self.retransmit_timeout_ms)
    }
}

/// BlobDB sync settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobDbConfig {
    /// How long to wait for the watch to answer a command.
    pub response_timeout_ms: u64,
}

impl Default for BlobDbConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 5_000,
        }
    }
}

impl BlobDbConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

/// PutBytes transfer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PutBytesConfig {
    /// How long to wait for each ack.
    pub response_timeout_ms: u64,

    /// Bytes per Put request.
    pub chunk_size: usize,
}

impl Default for PutBytesConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 20_000,
            chunk_size: 2_000,
        }
    }
}

impl PutBytesConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

impl Config {
    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        let config_dir = config_dir();
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml_str(&content)?
        } else {
            let config = Self::default();
            let content = toml::to_string_pretty(&config)?;
            std::fs::write(&config_path, content)?;
            config
        };

        config.data_dir = data_dir();
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Save configuration to file.
    pub fn save(&self) -> Result<()> {
        let config_dir = config_dir();
        std::fs::create_dir_all(&config_dir)?;

        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_dir.join("config.toml"), content)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.link.initial_mtu, 23);
        assert_eq!(config.link.max_retries, 2);
        assert_eq!(config.link.passive_reset_timeout(), Duration::from_secs(12));
        assert_eq!(config.blobdb.response_timeout(), Duration::from_secs(5));
        assert_eq!(config.putbytes.response_timeout(), Duration::from_secs(20));
        assert_eq!(config.putbytes.chunk_size, 2000);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [link]
            reversed_ppog = true
            desired_rx_window = 19
            "#,
        )
        .unwrap();
        assert!(config.link.reversed_ppog);
        assert_eq!(config.link.desired_rx_window, 19);
        assert_eq!(config.link.desired_tx_window, 25);
        assert_eq!(config.putbytes.chunk_size, 2000);
    }

    #[test]
    fn test_round_trips_through_toml() {
        let mut config = Config::default();
        config.link.verbose_logging = true;
        config.blobdb.response_timeout_ms = 1234;

        let text = toml::to_string_pretty(&config).unwrap();
        let parsed = Config::from_toml_str(&text).unwrap();
        assert!(parsed.link.verbose_logging);
        assert_eq!(parsed.blobdb.response_timeout_ms, 1234);
    }
}
