use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::io::mqtt::MqttConfig;
use crate::io::serial::{ResyncPolicy, SerialConfig, DEFAULT_MAX_BUFFER_LEN};
use crate::io::IoError;

const CONFIG_DIR_NAME: &str = "serial-bridge";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct BridgeSettings {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub sink: SinkSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EngineSettings {
    /// Pending bytes allowed before a forced resync
    #[serde(default = "default_max_buffer_len")]
    pub max_buffer_len: usize,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_resync_backoff_us")]
    pub resync_backoff_us: u64,
    /// Single-byte reads per resync before giving up (None = wait forever)
    #[serde(default)]
    pub resync_max_attempts: Option<u64>,
    /// Sleep between polls that found no data (0 = spin)
    #[serde(default = "default_poll_interval_us")]
    pub poll_interval_us: u64,
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64, // 0 = disabled
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Mqtt,
    Stdout,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SinkSettings {
    #[serde(default)]
    pub kind: SinkKind,
    /// Messages buffered between the engine thread and the publisher
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub mqtt: MqttConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct LoggingSettings {
    /// Directory for timestamped log files (None = stderr only)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_max_buffer_len() -> usize {
    DEFAULT_MAX_BUFFER_LEN
}
fn default_settle_delay_ms() -> u64 {
    1
}
fn default_resync_backoff_us() -> u64 {
    1
}
fn default_poll_interval_us() -> u64 {
    500
}
fn default_stats_interval_secs() -> u64 {
    60
}
fn default_channel_capacity() -> usize {
    1024
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            max_buffer_len: default_max_buffer_len(),
            settle_delay_ms: default_settle_delay_ms(),
            resync_backoff_us: default_resync_backoff_us(),
            resync_max_attempts: None,
            poll_interval_us: default_poll_interval_us(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

impl Default for SinkSettings {
    fn default() -> Self {
        SinkSettings {
            kind: SinkKind::Mqtt,
            channel_capacity: default_channel_capacity(),
            mqtt: MqttConfig::default(),
        }
    }
}

impl EngineSettings {
    pub fn resync_policy(&self) -> ResyncPolicy {
        ResyncPolicy {
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            backoff: Duration::from_micros(self.resync_backoff_us),
            max_attempts: self.resync_max_attempts,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }
}

impl BridgeSettings {
    /// `<config_dir>/serial-bridge/config.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load settings from `path`, or from the default path when it exists,
    /// or fall back to built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, IoError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(p) => p,
                None => return Ok(BridgeSettings::default()),
            },
        };

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            IoError::configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, IoError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn validate(&self) -> Result<(), IoError> {
        if self.serial.port.trim().is_empty() {
            return Err(IoError::configuration("serial port must not be empty"));
        }
        if self.serial.baud_rate == 0 {
            return Err(IoError::configuration("baud rate must be greater than zero"));
        }
        if self.engine.max_buffer_len == 0 {
            return Err(IoError::configuration("max_buffer_len must be greater than zero"));
        }
        if self.engine.resync_max_attempts == Some(0) {
            return Err(IoError::configuration(
                "resync_max_attempts must be at least 1 (omit it to wait forever)",
            ));
        }
        if self.sink.channel_capacity == 0 {
            return Err(IoError::configuration("channel_capacity must be greater than zero"));
        }
        crate::io::serial::utils::port_builder(&self.serial)?;
        if self.sink.kind == SinkKind::Mqtt {
            self.sink.mqtt.validate()?;
        }
        Ok(())
    }
}
