//! Configuration management for the argonone-fand daemon.
//!
//! Handles loading, parsing, and validation of the YAML configuration file
//! that describes the hardware wiring, the power-cut strategy, the host
//! actions and the fan settings.

use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLock},
};

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::{
    drivers::{
        argon_one::protocol::FAN_ADDRESS,
        sysfs_gpio::{DEFAULT_BUTTON_PIN, DEFAULT_GPIO_ROOT},
    },
    error::FanError,
    settings::{RawSettings, SettingsProvider},
    temperature_sensors::thermal_zone::DEFAULT_THERMAL_ZONE,
};

/// Main configuration structure for the argonone-fand daemon.
///
/// # Example
///
/// ```yaml
/// version: 1
///
/// hardware:
///   i2c_bus: 1
///   fan_address: 0x1a
///   button_pin: 4
///
/// power_cut:
///   strategy: direct
///
/// settings:
///   checkinterval: 10
///   numberofchecks: 3
///   useconstantfanpower: false
///   constantfanpower: 50
///   fanpowermin: 0
///   fanpower30: 20
///   fanpower40: 20
///   fanpower45: 20
///   fanpower50: 50
///   fanpower55: 50
///   fanpower60: 50
///   fanpower65: 50
///   fanpower70: 80
///   fanpower75: 80
///   fanpower80: 100
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Configuration version for compatibility checking.
    pub version: u8,

    #[serde(default)]
    pub hardware: HardwareCfg,

    #[serde(default)]
    pub power_cut: PowerCutCfg,

    #[serde(default)]
    pub host_actions: HostActionsCfg,

    /// Flat fan settings, read again on every reload.
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            hardware: HardwareCfg::default(),
            power_cut: PowerCutCfg::default(),
            host_actions: HostActionsCfg::default(),
            settings: BTreeMap::new(),
        }
    }
}

/// Where the fan controller, the button and the temperature live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareCfg {
    #[serde(default = "defaults::i2c_bus")]
    pub i2c_bus: u8,

    #[serde(default = "defaults::fan_address")]
    pub fan_address: u16,

    /// BCM number of the button pin.
    #[serde(default = "defaults::button_pin")]
    pub button_pin: u32,

    #[serde(default = "defaults::gpio_root")]
    pub gpio_root: PathBuf,

    /// Pseudo-file with the CPU temperature in millidegrees.
    #[serde(default = "defaults::temperature_path")]
    pub temperature_path: PathBuf,
}

impl Default for HardwareCfg {
    fn default() -> Self {
        Self {
            i2c_bus: defaults::i2c_bus(),
            fan_address: defaults::fan_address(),
            button_pin: defaults::button_pin(),
            gpio_root: defaults::gpio_root(),
            temperature_path: defaults::temperature_path(),
        }
    }
}

/// How the power cut is armed when the host powers off.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum PowerCutCfg {
    /// The daemon writes the arming byte itself while stopping.
    #[default]
    Direct,
    /// A runtime-enabled systemd unit writes it after the daemon exits.
    Service {
        unit_path: PathBuf,
        #[serde(default = "defaults::i2cset_path")]
        i2cset_path: PathBuf,
    },
}

/// Command lines run for button-triggered host actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostActionsCfg {
    #[serde(default = "defaults::restart_command")]
    pub restart_command: Vec<String>,

    #[serde(default = "defaults::shutdown_command")]
    pub shutdown_command: Vec<String>,
}

impl Default for HostActionsCfg {
    fn default() -> Self {
        Self {
            restart_command: defaults::restart_command(),
            shutdown_command: defaults::shutdown_command(),
        }
    }
}

impl Config {
    /// Checks the parts of the configuration serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            anyhow::bail!("Unsupported config version {}", self.version);
        }
        if self.hardware.fan_address > 0x7f {
            anyhow::bail!(
                "Fan address 0x{:x} is not a 7-bit I2C address",
                self.hardware.fan_address
            );
        }
        if self.host_actions.restart_command.is_empty() {
            anyhow::bail!("host_actions.restart_command must not be empty");
        }
        if self.host_actions.shutdown_command.is_empty() {
            anyhow::bail!("host_actions.shutdown_command must not be empty");
        }
        Ok(())
    }

    /// Converts the `settings` section to the flat string store.
    pub fn raw_settings(&self) -> std::result::Result<RawSettings, FanError> {
        let mut raw = RawSettings::new();
        for (key, value) in &self.settings {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                Value::Null => {
                    warn!("Ignoring empty setting '{key}'");
                    continue;
                }
                _ => {
                    return Err(FanError::Config(format!(
                        "setting '{key}' must be a scalar value"
                    )));
                }
            };
            raw.insert(key.as_str(), value);
        }
        Ok(raw)
    }
}

mod defaults {
    use super::*;

    pub fn i2c_bus() -> u8 {
        1
    }

    pub fn fan_address() -> u16 {
        FAN_ADDRESS
    }

    pub fn button_pin() -> u32 {
        DEFAULT_BUTTON_PIN
    }

    pub fn gpio_root() -> PathBuf {
        PathBuf::from(DEFAULT_GPIO_ROOT)
    }

    pub fn temperature_path() -> PathBuf {
        PathBuf::from(DEFAULT_THERMAL_ZONE)
    }

    pub fn i2cset_path() -> PathBuf {
        PathBuf::from("/usr/sbin/i2cset")
    }

    pub fn restart_command() -> Vec<String> {
        vec!["systemctl".into(), "reboot".into()]
    }

    pub fn shutdown_command() -> Vec<String> {
        vec!["systemctl".into(), "poweroff".into()]
    }
}

fn locate_config() -> Result<PathBuf> {
    if let Ok(env_path) = env::var("ARGONONE_FAND_CONFIG") {
        return Ok(PathBuf::from(env_path));
    }

    if let Some(mut cfg_dir) = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|h| Path::new(&h).join(".config")))
    {
        cfg_dir.push("argonone-fand/config.yml");
        if cfg_dir.exists() {
            return Ok(cfg_dir);
        }
    }

    let etc = Path::new("/etc/argonone-fand/config.yml");
    if etc.exists() {
        return Ok(etc.to_path_buf());
    }

    anyhow::bail!("Configuration file not found in any standard location")
}

/// Configuration manager that owns the config data and its file.
///
/// Doubles as the [`SettingsProvider`] of the controller: every fetch reads
/// the file again, so a reload sees what is on disk right now.
///
/// # Example
///
/// ```no_run
/// use argonone_fand::config::ConfigManager;
/// use std::path::PathBuf;
///
/// # fn example() -> anyhow::Result<()> {
/// // Load from specific path
/// let config_manager = ConfigManager::load(Some(PathBuf::from("config.yml")))?;
///
/// // Load from standard locations
/// let config_manager = ConfigManager::load(None)?;
///
/// let pin = config_manager.get().hardware.button_pin;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: Arc<RwLock<Config>>,
    path: PathBuf,
}

impl ConfigManager {
    pub fn new(config: Config, path: PathBuf) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            path,
        }
    }

    /// Loads configuration from file or standard locations.
    ///
    /// Searches for configuration in the following order:
    /// 1. Provided path parameter
    /// 2. ARGONONE_FAND_CONFIG environment variable
    /// 3. XDG_CONFIG_HOME/argonone-fand/config.yml or ~/.config/argonone-fand/config.yml
    /// 4. /etc/argonone-fand/config.yml
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => locate_config().context("No configuration file found")?,
        };

        info!("Loading config from: {}", config_path.display());
        let config = Self::load_config_from_path(&config_path)?;

        Ok(Self::new(config, config_path))
    }

    /// Snapshot of the current configuration.
    pub fn get(&self) -> Config {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reloads configuration from the same file.
    ///
    /// The stored configuration is only replaced when the new one is valid.
    pub fn reload(&self) -> Result<Config> {
        info!("Reloading config from: {}", self.path.display());
        let new_config = Self::load_config_from_path(&self.path)?;

        *self.config.write().unwrap_or_else(PoisonError::into_inner) = new_config.clone();
        Ok(new_config)
    }

    fn load_config_from_path(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML in: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Configuration validation failed for: {}", path.display()))?;

        Ok(config)
    }
}

impl SettingsProvider for ConfigManager {
    fn fetch(&self) -> std::result::Result<RawSettings, FanError> {
        self.reload()
            .map_err(|e| FanError::Config(format!("{e:#}")))?
            .raw_settings()
    }
}
