use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_SERVER_PORT: u16 = 80;
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 1024;
pub const MIN_REQUEST_BYTES: usize = 64;
pub const MAX_REQUEST_BYTES: usize = 16 * 1024;
pub const DEFAULT_MAX_RETRIES: u32 = 10;
pub const DEFAULT_OUTPUT_PIN: i32 = 23;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub max_request_bytes: usize,
    #[serde(default)]
    // None waits on a silent client forever.
    pub read_timeout_ms: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_SERVER_PORT,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            read_timeout_ms: None,
        }
    }
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputConfig {
    pub gpio_pin: i32,
    #[serde(default = "default_active_high")]
    pub active_high: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            gpio_pin: DEFAULT_OUTPUT_PIN,
            active_high: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SwitchConfig {
    pub network: NetworkConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl SwitchConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(raw)?;
        config.sanitize();
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn sanitize(&mut self) {
        self.network.sanitize();
        self.server.sanitize();
        self.output.sanitize();
    }
}

impl NetworkConfig {
    pub fn has_station_credentials(&self) -> bool {
        !self.wifi_ssid.trim().is_empty()
    }

    pub fn sanitize(&mut self) {
        self.wifi_ssid = self.wifi_ssid.trim().to_string();
        self.max_retries = self.max_retries.min(DEFAULT_MAX_RETRIES * 10);
    }
}

impl ServerConfig {
    pub fn sanitize(&mut self) {
        if self.port == 0 {
            self.port = DEFAULT_SERVER_PORT;
        }

        self.max_request_bytes = self
            .max_request_bytes
            .clamp(MIN_REQUEST_BYTES, MAX_REQUEST_BYTES);

        if self.read_timeout_ms == Some(0) {
            self.read_timeout_ms = None;
        }
    }
}

impl OutputConfig {
    pub fn sanitize(&mut self) {
        if self.gpio_pin < 0 {
            self.gpio_pin = DEFAULT_OUTPUT_PIN;
        }
    }
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_active_high() -> bool {
    true
}
