//! Configuration management

use anyhow::Result;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::lookup::{DeviceTypeCode, HubTypeCode};

/// Environment variable prefix (PUB_PORT, PUB_BRIDGE__SUBSCRIBER_BUFFER, ...)
const ENV_PREFIX: &str = "PUB";

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Start hub discovery as soon as the service is up
    #[serde(default = "default_scan_on_start")]
    pub scan_on_start: bool,

    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub simulator: SimulatorConfig,
}

fn default_port() -> u16 {
    3000
}

fn default_scan_on_start() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Outbound buffer per sensor subscriber; readings beyond it are dropped
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

fn default_subscriber_buffer() -> usize {
    32
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SimulatorConfig {
    #[serde(default)]
    pub hubs: Vec<SimulatedHubConfig>,
}

/// A hub the simulated driver will advertise
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatedHubConfig {
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub hub_type: HubTypeCode,
    /// Port id -> attached device type code
    #[serde(default)]
    pub ports: HashMap<String, DeviceTypeCode>,
    #[serde(default = "default_battery_level")]
    pub battery_level: u8,
    #[serde(default = "default_rssi")]
    pub rssi: i16,
    #[serde(default)]
    pub current: f32,
}

impl Default for SimulatedHubConfig {
    fn default() -> Self {
        Self {
            uuid: String::new(),
            name: String::new(),
            hub_type: HubTypeCode::UNKNOWN,
            ports: HashMap::new(),
            battery_level: default_battery_level(),
            rssi: default_rssi(),
            current: 0.0,
        }
    }
}

fn default_battery_level() -> u8 {
    100
}

fn default_rssi() -> i16 {
    -60
}

/// Get config directory (PUB_CONFIG_DIR, XDG_CONFIG_HOME or platform default)
pub fn get_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PUB_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library/Application Support/poweredup-bridge");
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join("poweredup-bridge");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".config/poweredup-bridge");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("poweredup-bridge");
        }
    }

    PathBuf::from(".")
}

pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir();

    let mut builder = ::config::Config::builder()
        .set_default("port", default_port() as i64)?
        // config.toml / config.json / ... in the config dir, if present
        .add_source(
            ::config::File::with_name(&config_dir.join("config").to_string_lossy()).required(false),
        )
        .add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

    // Port precedence: PUB_PORT > PORT > config file > default
    if let Ok(port) = std::env::var("PUB_PORT") {
        if let Ok(port_num) = port.parse::<u16>() {
            builder = builder.set_override("port", port_num as i64)?;
        }
    } else if let Ok(port) = std::env::var("PORT") {
        if let Ok(port_num) = port.parse::<u16>() {
            builder = builder.set_override("port", port_num as i64)?;
        }
    }

    let config = builder.build()?;

    Ok(config.try_deserialize()?)
}
