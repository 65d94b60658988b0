//! Harness configuration.
//!
//! Every field has a built-in default matching a stock vehicle image, so an empty (or
//! absent) config file is valid. Values are layered: defaults, then the TOML file,
//! then command-line overrides applied by the binary.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub link: LinkConfig,
    pub shell: ShellConfig,
    pub params: ParamsConfig,
    pub host: HostConfig,
    pub limits: LimitsConfig,
    pub run: RunConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Local UDP endpoint the autopilot (or router) sends to.
    pub bind: SocketAddr,
    /// Fixed FCU endpoint; when absent the first sender seen becomes the peer.
    pub remote: Option<SocketAddr>,
    pub system_id: u8,
    pub component_id: u8,
    pub target_system: u8,
    pub target_component: u8,
    pub heartbeat_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 14540)),
            remote: None,
            system_id: 255,
            component_id: 1,
            target_system: 1,
            target_component: 1,
            heartbeat_timeout_ms: 3000,
        }
    }
}

impl LinkConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Console prompt that terminates every command's output.
    pub prompt: String,
    pub command_timeout_ms: u64,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            prompt: "nsh>".to_string(),
            command_timeout_ms: 3000,
        }
    }
}

impl ShellConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParamsConfig {
    pub timeout_ms: u64,
}

impl Default for ParamsConfig {
    fn default() -> Self {
        Self { timeout_ms: 1000 }
    }
}

impl ParamsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub version_file: PathBuf,
    pub service_unit: String,
    pub max_boot_seconds: f64,
    pub max_cpu_percent: f64,
    pub cpu_whitelist: Vec<String>,
    /// Marker expected in the FCU firmware version string.
    pub firmware_tag: String,
    pub vpe_publisher: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            version_file: PathBuf::from("/etc/clever_version"),
            service_unit: "clever.service".to_string(),
            max_boot_seconds: 15.0,
            max_cpu_percent: 30.0,
            cpu_whitelist: vec!["nodelet".to_string()],
            firmware_tag: "clever".to_string(),
            vpe_publisher: "vpe_publisher".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_tilt_deg: f64,
    pub max_linear_velocity: f64,
    pub max_angular_velocity: f64,
    pub max_position_mismatch: f64,
    pub max_yaw_mismatch_deg: f64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_tilt_deg: 2.0,
            max_linear_velocity: 0.1,
            max_angular_velocity: 0.1,
            max_position_mismatch: 0.5,
            max_yaw_mismatch_deg: 8.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Probes to run exclusively; empty means all.
    pub only: Vec<String>,
    pub skip: Vec<String>,
    /// Hard cap on a single probe's run time.
    pub probe_deadline_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            only: Vec::new(),
            skip: Vec::new(),
            probe_deadline_ms: 60_000,
        }
    }
}

impl RunConfig {
    pub fn probe_deadline(&self) -> Duration {
        Duration::from_millis(self.probe_deadline_ms)
    }
}

impl HarnessConfig {
    pub fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text, path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shell.prompt.is_empty() {
            return Err(ConfigError::Invalid {
                key: "shell.prompt",
                reason: "must not be empty".to_string(),
            });
        }
        if self.shell.command_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "shell.command_timeout_ms",
                reason: "must be positive".to_string(),
            });
        }
        if self.run.probe_deadline_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "run.probe_deadline_ms",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}
