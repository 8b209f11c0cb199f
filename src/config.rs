//! Robot configuration loaded from a TOML file
//!
//! Every field has a default, so an empty file is a valid configuration.
//!
//! ```toml
//! name = "bert"
//! height_cm = 83
//! birth_date = "2019-01-01"
//!
//! [dispatch]
//! cadence_ms = 1000
//! weight = 0.5
//!
//! [channels]
//! command = "0.0.0.0:11046"
//! terminal = "127.0.0.1:11047"
//!
//! [[timers]]
//! metric = "CYCLECOUNT"
//! interval_ms = 60000
//! ```

use crate::error::ConfigError;
use bert_shared::timing;
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    /// Name reported by the NAME metric
    pub name: String,
    /// Height reported by the HEIGHT metric
    pub height_cm: u32,
    /// Epoch of the AGE metric
    pub birth_date: NaiveDate,
    pub dispatch: DispatchConfig,
    pub channels: ChannelConfig,
    pub system: SystemConfig,
    /// Internal requests injected periodically
    pub timers: Vec<TimerConfig>,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            name: "bert".into(),
            height_cm: 83,
            birth_date: NaiveDate::from_ymd_opt(2019, 1, 1).unwrap_or_default(),
            dispatch: DispatchConfig::default(),
            channels: ChannelConfig::default(),
            system: SystemConfig::default(),
            timers: Vec::new(),
        }
    }
}

/// Dispatch loop tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Target loop period
    pub cadence_ms: u64,
    /// EWMA smoothing factor, in [0, 1)
    pub weight: f64,
    /// Re-arm interval of the timer queue's idle sentinel
    pub idle_delay_ms: u64,
    /// Capacity of the request hand-off channel
    pub queue_capacity: usize,
    /// Longest the dispatcher waits for the motor subsystem to answer
    pub motor_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            cadence_ms: timing::DEFAULT_CADENCE_MS,
            weight: timing::DEFAULT_EWMA_WEIGHT,
            idle_delay_ms: timing::IDLE_DELAY_MS,
            queue_capacity: timing::REQUEST_QUEUE_CAPACITY,
            motor_timeout_ms: timing::MOTOR_TIMEOUT_MS,
        }
    }
}

impl DispatchConfig {
    pub fn cadence(&self) -> Duration {
        Duration::from_millis(self.cadence_ms)
    }

    pub fn motor_timeout(&self) -> Duration {
        Duration::from_millis(self.motor_timeout_ms)
    }
}

/// Bind addresses of the external channels; omit one to disable it
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub command: Option<String>,
    pub terminal: Option<String>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command: Some("0.0.0.0:11046".into()),
            terminal: Some("127.0.0.1:11047".into()),
        }
    }
}

/// Interaction with the host operating system
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Program and arguments run on SHUTDOWN
    pub power_off_command: Vec<String>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            power_off_command: vec!["sudo".into(), "poweroff".into()],
        }
    }
}

/// A metric request fired periodically by the timer queue
#[derive(Debug, Clone, Deserialize)]
pub struct TimerConfig {
    pub metric: String,
    pub interval_ms: u64,
    #[serde(default)]
    pub delay_ms: u64,
}

impl RobotConfig {
    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        content.parse()
    }

    /// Reject values the dispatcher cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "name",
                reason: "must not be empty".into(),
            });
        }
        if self.dispatch.cadence_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "dispatch.cadence_ms",
                reason: "must be positive".into(),
            });
        }
        if !(0.0..1.0).contains(&self.dispatch.weight) {
            return Err(ConfigError::Invalid {
                field: "dispatch.weight",
                reason: format!("{} is outside [0, 1)", self.dispatch.weight),
            });
        }
        if self.dispatch.idle_delay_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "dispatch.idle_delay_ms",
                reason: "must be positive".into(),
            });
        }
        if self.dispatch.motor_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "dispatch.motor_timeout_ms",
                reason: "must be positive".into(),
            });
        }
        if self.dispatch.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "dispatch.queue_capacity",
                reason: "must be positive".into(),
            });
        }
        if self.timers.len() > self.dispatch.queue_capacity {
            return Err(ConfigError::Invalid {
                field: "timers",
                reason: format!(
                    "{} timers exceed dispatch.queue_capacity ({})",
                    self.timers.len(),
                    self.dispatch.queue_capacity
                ),
            });
        }
        if let Some(timer) = self.timers.iter().find(|t| t.interval_ms == 0) {
            return Err(ConfigError::Invalid {
                field: "timers.interval_ms",
                reason: format!("timer for {} must repeat", timer.metric),
            });
        }
        Ok(())
    }
}

impl std::str::FromStr for RobotConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: RobotConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}
