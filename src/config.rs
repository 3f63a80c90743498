use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::device::DeviceId;
use crate::error::AppError;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    pub unix_socket: Option<String>,
    pub host: Option<String>,
    pub path: String,
    pub timeout: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GpioConfig {
    #[serde(default = "default_chip")]
    pub chip: String,
    /// Number of lines exposed by the simulated backend (BCM 0..=27 by default).
    #[serde(default = "default_lines")]
    pub lines: u32,
    /// Lines the simulated backend refuses to hand out.
    #[serde(default)]
    pub reserved: Vec<u32>,
    #[serde(default = "default_write_history_capacity")]
    pub write_history_capacity: usize,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            chip: default_chip(),
            lines: default_lines(),
            reserved: Vec::new(),
            write_history_capacity: default_write_history_capacity(),
        }
    }
}

fn default_chip() -> String {
    "/dev/gpiochip0".to_string()
}

fn default_lines() -> u32 {
    28
}

fn default_write_history_capacity() -> usize {
    256
}

fn default_broadcast_capacity() -> usize {
    64
}

/// One configured output as written by the operator.
///
/// Everything except `id` and `icon` stays loosely typed here so that
/// [`Registry::load`](crate::registry::Registry::load) can report every bad
/// value at once instead of stopping at the first parse failure. Pins may be
/// written as numbers or numeric strings.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DeviceConfig {
    #[serde(default)]
    pub id: Option<DeviceId>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub pin: Value,
    #[serde(default, alias = "active_mode")]
    pub polarity: String,
    #[serde(default)]
    pub default_state: String,
}

impl DeviceConfig {
    /// The configured pin as an integer, if it is one.
    pub fn pin_number(&self) -> Option<i64> {
        match &self.pin {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub http: HttpConfig,
    #[serde(default)]
    pub gpio: GpioConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        serde_json::from_str(&contents)
            .map_err(|e| AppError::Config(format!("Invalid config json: {e}")))
    }
}
