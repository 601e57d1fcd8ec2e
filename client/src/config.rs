use serde::{Deserialize, Serialize};
use std::{path::Path, str::FromStr, time::Duration};
use thiserror::Error;
use tracing::Level;

/// On-disk configuration (YAML). Every field has a default.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,

    pub credential_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub dial_timeout_secs: u64,
    pub init_timeout_secs: u64,

    pub heartbeat_interval_secs: u64,
    pub degraded_after_missed: u32,
    pub max_missed_heartbeats: u32,

    pub disconnect_grace_secs: u64,
    pub background_timeout_secs: u64,
    pub reconnect_initial_backoff_ms: u64,
    pub reconnect_max_backoff_ms: u64,

    pub max_in_flight: usize,
    pub history_depth: usize,
    pub autoplay_delay_ms: u64,

    pub mailbox_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            credential_timeout_secs: 15,
            connect_timeout_secs: 15,
            dial_timeout_secs: 5,
            init_timeout_secs: 10,
            heartbeat_interval_secs: 2,
            degraded_after_missed: 2,
            max_missed_heartbeats: 5,
            disconnect_grace_secs: 60,
            background_timeout_secs: 120,
            reconnect_initial_backoff_ms: 500,
            reconnect_max_backoff_ms: 5_000,
            max_in_flight: 10,
            history_depth: 20,
            autoplay_delay_ms: 300,
            mailbox_size: 256,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("could not parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: u64 },
    #[error("degraded_after_missed ({degraded}) must be below max_missed_heartbeats ({max})")]
    HeartbeatThresholds { degraded: u32, max: u32 },
    #[error("reconnect_max_backoff_ms ({max}) must be >= reconnect_initial_backoff_ms ({initial})")]
    Backoff { initial: u64, max: u64 },
}

/// Timeouts and thresholds that drive the session state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub credential_timeout: Duration,
    pub connect_timeout: Duration,
    pub dial_timeout: Duration,
    pub init_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub degraded_after_missed: u32,
    pub max_missed_heartbeats: u32,
    pub disconnect_grace: Duration,
    pub background_timeout: Duration,
    pub reconnect_initial_backoff: Duration,
    pub reconnect_max_backoff: Duration,
    pub mailbox_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Config::default().session()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WagerConfig {
    /// Maximum number of admitted but not yet settled wagers.
    pub max_in_flight: usize,
    pub history_depth: usize,
}

impl Default for WagerConfig {
    fn default() -> Self {
        Config::default().wager()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AutoplayConfig {
    pub delay: Duration,
}

impl Default for AutoplayConfig {
    fn default() -> Self {
        Config::default().autoplay()
    }
}

/// Validated form of [Config].
#[derive(Clone, Debug)]
pub struct Settings {
    pub log_level: Level,
    pub session: SessionConfig,
    pub wager: WagerConfig,
    pub autoplay: AutoplayConfig,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn validate(self) -> Result<Settings, ConfigError> {
        let log_level =
            Level::from_str(&self.log_level).map_err(|_| ConfigError::InvalidLogLevel {
                value: self.log_level.clone(),
            })?;

        for (field, value) in [
            ("credential_timeout_secs", self.credential_timeout_secs),
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("dial_timeout_secs", self.dial_timeout_secs),
            ("init_timeout_secs", self.init_timeout_secs),
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
            ("disconnect_grace_secs", self.disconnect_grace_secs),
            ("background_timeout_secs", self.background_timeout_secs),
            ("reconnect_initial_backoff_ms", self.reconnect_initial_backoff_ms),
            ("max_in_flight", self.max_in_flight as u64),
            ("mailbox_size", self.mailbox_size as u64),
            ("degraded_after_missed", self.degraded_after_missed as u64),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidNonZero { field, value });
            }
        }
        if self.degraded_after_missed >= self.max_missed_heartbeats {
            return Err(ConfigError::HeartbeatThresholds {
                degraded: self.degraded_after_missed,
                max: self.max_missed_heartbeats,
            });
        }
        if self.reconnect_max_backoff_ms < self.reconnect_initial_backoff_ms {
            return Err(ConfigError::Backoff {
                initial: self.reconnect_initial_backoff_ms,
                max: self.reconnect_max_backoff_ms,
            });
        }

        Ok(Settings {
            log_level,
            session: self.session(),
            wager: self.wager(),
            autoplay: self.autoplay(),
        })
    }

    fn session(&self) -> SessionConfig {
        SessionConfig {
            credential_timeout: Duration::from_secs(self.credential_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            dial_timeout: Duration::from_secs(self.dial_timeout_secs),
            init_timeout: Duration::from_secs(self.init_timeout_secs),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            degraded_after_missed: self.degraded_after_missed,
            max_missed_heartbeats: self.max_missed_heartbeats,
            disconnect_grace: Duration::from_secs(self.disconnect_grace_secs),
            background_timeout: Duration::from_secs(self.background_timeout_secs),
            reconnect_initial_backoff: Duration::from_millis(self.reconnect_initial_backoff_ms),
            reconnect_max_backoff: Duration::from_millis(self.reconnect_max_backoff_ms),
            mailbox_size: self.mailbox_size,
        }
    }

    fn wager(&self) -> WagerConfig {
        WagerConfig {
            max_in_flight: self.max_in_flight,
            history_depth: self.history_depth,
        }
    }

    fn autoplay(&self) -> AutoplayConfig {
        AutoplayConfig {
            delay: Duration::from_millis(self.autoplay_delay_ms),
        }
    }
}
