//! Bench configuration.
//!
//! Every field has a default matching the bench as it is wired in the lab, so an empty
//! (or absent) YAML file is a valid configuration.

use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::register::{self, ByteOrder, CodecError, DataType, RegisterSpace, WordOrder};

/// Top level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sensor: SensorConfig,
    pub flow: FlowConfig,
    pub smu: SmuConfig,
    pub output: OutputConfig,
}

/// How to reach and decode the CH2O sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Host name or IP address of the sensor.
    pub host: String,
    /// Modbus/TCP port.
    pub port: u16,
    pub unit_id: u8,
    /// Register holding the concentration. Either a zero based offset or the
    /// conventional `3xxxx`/`4xxxx` form.
    pub register_address: u16,
    pub register_space: RegisterSpace,
    pub data_type: DataType,
    pub byte_order: ByteOrder,
    pub word_order: WordOrder,
    /// Integer readings are divided by this value. `0` disables scaling.
    pub scale: f64,
    /// Bound on connect, read and write calls.
    pub timeout_ms: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.70".to_string(),
            port: 502,
            unit_id: 1,
            register_address: 30001,
            register_space: RegisterSpace::Input,
            data_type: DataType::Float32,
            byte_order: ByteOrder::Big,
            word_order: WordOrder::Little,
            scale: 1.0,
            timeout_ms: 5000,
        }
    }
}

impl SensorConfig {
    /// Check the decode settings against a blank register block so that a bad
    /// configuration fails at startup instead of on every tick.
    pub fn validate(&self) -> Result<(), CodecError> {
        let blank = vec![0u16; self.data_type.register_count()];
        register::decode(
            &blank,
            self.data_type,
            self.byte_order,
            self.word_order,
            self.scale,
        )?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// One mass-flow controller on the shared serial line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Unit letter the controller answers to.
    pub id: char,
    /// Flow at a command value of 65535, in SLPM.
    #[serde(default = "default_full_scale")]
    pub full_scale: f64,
}

fn default_full_scale() -> f64 {
    511.99
}

/// Serial line and convergence settings for the mass-flow controllers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Serial port name. No port means the controllers are not driven.
    pub port: Option<String>,
    pub baud_rate: u32,
    pub timeout_ms: u64,
    /// Accepted distance between target and reported setpoint.
    pub tolerance: f64,
    /// Maximum write/poll cycles per setpoint change.
    pub max_iterations: u32,
    /// Maximum time spent converging on one setpoint.
    pub max_convergence_ms: u32,
    pub channels: Vec<ChannelConfig>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 19200,
            timeout_ms: 1000,
            tolerance: 0.005,
            max_iterations: 50,
            max_convergence_ms: 10_000,
            channels: ['A', 'B', 'C']
                .into_iter()
                .map(|id| ChannelConfig {
                    id,
                    full_scale: default_full_scale(),
                })
                .collect(),
        }
    }
}

/// Serial line and bias settings for the source-measure unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmuConfig {
    pub port: Option<String>,
    pub baud_rate: u32,
    pub timeout_ms: u64,
    /// Current compliance limit in amps.
    pub compliance_current_a: f64,
    /// Source voltage level in volts.
    pub source_voltage_v: f64,
}

impl Default for SmuConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 19200,
            timeout_ms: 1000,
            compliance_current_a: 0.01,
            source_voltage_v: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory receiving the timestamped CSV file.
    pub directory: PathBuf,
    pub file_prefix: String,
    /// Pause between ticks. `0` runs ticks back to back.
    pub tick_interval_ms: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            file_prefix: "CH2O".to_string(),
            tick_interval_ms: 0,
        }
    }
}

impl Config {
    /// Load configuration from a file. A missing file is created with the defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(
                "Configuration file not found at {:?}, creating default",
                path
            );
            let default_config = Self::default();
            default_config.save_to_file(path)?;
            return Ok(default_config);
        }

        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;
        let config: Config = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML configuration from {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml =
            serde_yml::to_string(self).context("Failed to serialize configuration to YAML")?;

        let mut file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create config file at {:?}", path.as_ref()))?;
        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;
        Ok(())
    }

    /// Rules serde cannot express.
    pub fn validate(&self) -> Result<()> {
        self.sensor
            .validate()
            .context("Invalid sensor decode settings")?;

        let flow = &self.flow;
        anyhow::ensure!(flow.tolerance > 0.0, "flow.tolerance must be positive");
        anyhow::ensure!(
            flow.max_iterations > 0,
            "flow.max_iterations must be at least 1"
        );
        for (index, channel) in flow.channels.iter().enumerate() {
            anyhow::ensure!(
                channel.id.is_ascii_uppercase(),
                "channel id {:?} must be an upper case letter",
                channel.id
            );
            anyhow::ensure!(
                channel.full_scale > 0.0,
                "channel {} full scale must be positive",
                channel.id
            );
            anyhow::ensure!(
                !flow.channels[..index].iter().any(|c| c.id == channel.id),
                "channel {} is configured twice",
                channel.id
            );
        }
        Ok(())
    }
}
