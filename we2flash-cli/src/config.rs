//! Configuration file support for we2flash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (WE2FLASH_*)
//! 3. Local config file (./we2flash.toml)
//! 4. Global config file (~/.config/we2flash/config.toml)
//!
//! `--config PATH` replaces both files.

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use we2flash::{ModelDescriptor, XmodemVariant};

/// Local configuration file name.
pub const LOCAL_CONFIG: &str = "we2flash.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Himax serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub serial: Option<String>,
    /// ESP32 companion serial port.
    pub companion: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Flash session settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashSettings {
    /// Transfer protocol (`xmodem` or `xmodem1k`).
    pub protocol: Option<XmodemVariant>,
    /// Hold the companion in reset while flashing.
    pub reset_hold: Option<bool>,
    /// Seconds to wait for the bootloader menu.
    pub handshake_timeout: Option<u64>,
    /// Seconds to wait for each reboot prompt.
    pub reboot_prompt_timeout: Option<u64>,
    /// XMODEM attempts per block.
    pub retries: Option<u32>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Flash configuration.
    #[serde(default)]
    pub flash: FlashSettings,
    /// Model catalog, in flashing order.
    #[serde(default)]
    pub models: Vec<ModelDescriptor>,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "we2flash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    ///
    /// Models with the same id are replaced in place, new ones are appended.
    fn merge(&mut self, other: Self) {
        // Connection config
        if other.connection.serial.is_some() {
            self.connection.serial = other.connection.serial;
        }
        if other.connection.companion.is_some() {
            self.connection.companion = other.connection.companion;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }

        // Flash config
        if other.flash.protocol.is_some() {
            self.flash.protocol = other.flash.protocol;
        }
        if other.flash.reset_hold.is_some() {
            self.flash.reset_hold = other.flash.reset_hold;
        }
        if other.flash.handshake_timeout.is_some() {
            self.flash.handshake_timeout = other.flash.handshake_timeout;
        }
        if other.flash.reboot_prompt_timeout.is_some() {
            self.flash.reboot_prompt_timeout = other.flash.reboot_prompt_timeout;
        }
        if other.flash.retries.is_some() {
            self.flash.retries = other.flash.retries;
        }

        for model in other.models {
            match self.models.iter_mut().find(|m| m.id == model.id) {
                Some(existing) => *existing = model,
                None => self.models.push(model),
            }
        }
    }
}
