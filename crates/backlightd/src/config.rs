//! Configuration file parsing and structures.
//!
//! backlightd reads an optional TOML file. Every key has a default matching the
//! dashboard controller, so an empty file (or none at all) is a valid setup.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Deserializer;
use tracing_subscriber::filter::LevelFilter;

use crate::engine::BrightnessLevel;
use crate::engine::ControlSettings;
use crate::engine::LevelConfig;
use crate::engine::LevelTable;
use crate::engine::TableError;

/// Top-level configuration structure
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub logging: LoggingConfig,
    pub store: StoreConfig,
    pub backlight: BacklightConfig,
    pub levels: LevelsConfig,
}

#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: LogLevel,

    /// Per-target levels, e.g. `"backlightd::engine" = "debug"`
    pub overrides: HashMap<String, LogLevel>,
}

/// Shared key-value store connection
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Redis URL
    pub url: String,

    /// Upper bound for one adjustment cycle, store round trips included
    #[serde(deserialize_with = "deserialize_duration")]
    pub cycle_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://192.168.7.1:6379".to_string(),
            cycle_timeout: Duration::from_secs(5),
        }
    }
}

/// Hardware backlight and polling behaviour
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BacklightConfig {
    /// File holding the raw brightness value
    pub path: PathBuf,

    /// Time between two adjustment cycles
    #[serde(deserialize_with = "deserialize_duration")]
    pub polling_interval: Duration,

    /// Minimum brightness change before the store is updated again
    pub hysteresis_threshold: u64,
}

impl Default for BacklightConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/sys/class/backlight/backlight/brightness"),
            polling_interval: Duration::from_secs(1),
            hysteresis_threshold: 512,
        }
    }
}

/// Overrides for a single level. Keys left out keep the level's default.
#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LevelOverride {
    pub brightness: Option<i64>,
    pub threshold_up: Option<i64>,
    pub threshold_down: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LevelsConfig {
    pub very_low: LevelOverride,
    pub low: LevelOverride,
    pub mid: LevelOverride,
    pub high: LevelOverride,
    pub very_high: LevelOverride,
}

impl LevelsConfig {
    fn get(&self, level: BrightnessLevel) -> &LevelOverride {
        match level {
            BrightnessLevel::VeryLow => &self.very_low,
            BrightnessLevel::Low => &self.low,
            BrightnessLevel::Mid => &self.mid,
            BrightnessLevel::High => &self.high,
            BrightnessLevel::VeryHigh => &self.very_high,
        }
    }

    /// Merge the overrides over the defaults and validate the result.
    pub fn to_table(&self) -> Result<LevelTable, TableError> {
        let levels = BrightnessLevel::ALL.map(|level| {
            let default = default_level(level);
            let overrides = self.get(level);
            LevelConfig {
                brightness: overrides.brightness.unwrap_or(default.brightness),
                threshold_up: overrides.threshold_up.or(default.threshold_up),
                threshold_down: overrides.threshold_down.or(default.threshold_down),
            }
        });
        LevelTable::new(levels)
    }
}

/// Level table of the dashboard controller's panel.
pub fn default_level(level: BrightnessLevel) -> LevelConfig {
    let (brightness, threshold_down, threshold_up) = match level {
        BrightnessLevel::VeryLow => (9350, None, Some(8)),
        BrightnessLevel::Low => (9500, Some(5), Some(18)),
        BrightnessLevel::Mid => (9700, Some(15), Some(40)),
        BrightnessLevel::High => (9950, Some(35), Some(80)),
        BrightnessLevel::VeryHigh => (10240, Some(70), None),
    };
    LevelConfig {
        brightness,
        threshold_up,
        threshold_down,
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Load from `path` if given, otherwise use the defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Build the validated level table
    pub fn level_table(&self) -> Result<LevelTable, ConfigError> {
        Ok(self.levels.to_table()?)
    }

    /// Build the validated control loop settings
    pub fn control_settings(&self) -> Result<ControlSettings, ConfigError> {
        if self.backlight.polling_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("backlight.polling_interval"));
        }
        if self.store.cycle_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("store.cycle_timeout"));
        }

        Ok(ControlSettings {
            polling_interval: self.backlight.polling_interval,
            cycle_timeout: self.store.cycle_timeout,
            hysteresis_threshold: self.backlight.hysteresis_threshold,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid level table: {0}")]
    Table(#[from] TableError),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid duration {0:?}: expected a whole number followed by ms, s, m or h")]
pub struct InvalidDuration(String);

/// Parse durations such as `250ms`, `1s`, `5m` or `1h`.
pub fn parse_duration(input: &str) -> Result<Duration, InvalidDuration> {
    let invalid = || InvalidDuration(input.to_string());

    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    let value: u64 = digits.parse().map_err(|_| invalid())?;

    let seconds = |factor: u64| value.checked_mul(factor).map(Duration::from_secs);
    match unit {
        "ms" => Some(Duration::from_millis(value)),
        "s" => Some(Duration::from_secs(value)),
        "m" => seconds(60),
        "h" => seconds(3600),
        _ => None,
    }
    .ok_or_else(invalid)
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}
