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
//! Handles loading and saving application settings.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Transport settings.
    pub transport: TransportConfig,

    /// Chat service behavior.
    pub service: ServiceConfig,
}

/// Which transport backs the chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Rfcomm,
    Tcp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,

    /// Device name advertised over Bluetooth.
    pub device_name: String,

    /// RFCOMM channel to listen and dial on.
    pub rfcomm_channel: u8,

    /// Address the TCP transport listens on.
    pub tcp_listen: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: if cfg!(feature = "rfcomm") {
                TransportKind::Rfcomm
            } else {
                TransportKind::Tcp
            },
            device_name: "BluetoothChat".to_string(),
            rfcomm_channel: 1,
            tcp_listen: "127.0.0.1:7700".to_string(),
        }
    }
}

/// Behavior of the chat service state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Go back to listening when a session ends instead of idling.
    pub resume_listen_on_disconnect: bool,

    /// Outbound queue capacity per session. 0 means unbounded.
    pub max_outbound_queue: usize,

    /// Upper bound on a single dial attempt.
    pub connect_timeout_ms: u64,

    /// Keep listening after transient accept errors.
    pub retry_transient_accept: bool,

    /// Pause before accepting again after a transient error.
    pub accept_retry_delay_ms: u64,

    /// Size of the session read buffer.
    pub read_buffer_size: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            resume_listen_on_disconnect: false,
            max_outbound_queue: 0,
            connect_timeout_ms: 12_000,
            retry_transient_accept: true,
            accept_retry_delay_ms: 1_000,
            read_buffer_size: 1024,
        }
    }
}

impl ServiceConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn accept_retry_delay(&self) -> Duration {
        Duration::from_millis(self.accept_retry_delay_ms)
    }
}

impl Config {
    /// Default location of the configuration file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bluetooth-chat")
            .join("config.toml")
    }

    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load configuration from `path`, writing defaults there if it is missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_creates_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[service]\nresume_listen_on_disconnect = true\nmax_outbound_queue = 8\n\n[transport]\nkind = \"tcp\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert!(config.service.resume_listen_on_disconnect);
        assert_eq!(config.service.max_outbound_queue, 8);
        assert_eq!(config.service.read_buffer_size, 1024);
        assert_eq!(config.transport.kind, TransportKind::Tcp);
        assert_eq!(config.transport.rfcomm_channel, 1);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.service.connect_timeout_ms = 500;
        config.transport.device_name = "Desk".to_string();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.service.connect_timeout(), Duration::from_millis(500));
    }
}
