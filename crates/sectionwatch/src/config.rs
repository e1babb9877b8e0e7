//! Configuration management for sectionwatch.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::coordinator::ScrollBehavior;
use crate::error::{Error, Result};
use crate::navigation::ProgressMode;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default configuration directory name.
const CONFIG_DIR_NAME: &str = "sectionwatch";

/// Environment variable prefix.
const ENV_PREFIX: &str = "SECTIONWATCH_";

/// Upper bound for the settling and suppression windows.
const MAX_WINDOW_MS: u64 = 10_000;

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `SECTIONWATCH_`, `__` between
///    section and key, e.g. `SECTIONWATCH_AGGREGATOR__SETTLE_MS`)
/// 2. TOML config file at `~/.config/sectionwatch/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Debounce configuration.
    pub aggregator: AggregatorConfig,
    /// Programmatic navigation configuration.
    pub navigation: NavigationConfig,
    /// Visibility source configuration.
    pub observer: ObserverConfig,
    /// Progress indicator configuration.
    pub progress: ProgressConfig,
    /// Location fragment configuration.
    pub route: RouteConfig,
}

/// Debounce-related configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Quiet period before a burst of visibility events settles.
    pub settle_ms: u64,
}

/// Navigation-related configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    /// How long resolver output is ignored after a programmatic scroll.
    pub suppress_ms: u64,
    /// Animate programmatic scrolls.
    pub smooth_scroll: bool,
}

/// Visibility source configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    /// Interval between layout measurements of the polling source.
    pub poll_interval_ms: u64,
    /// Intersection ratios at which a change is reported.
    pub thresholds: Vec<f64>,
    /// Capacity of the command and signal channels.
    pub channel_capacity: usize,
}

/// Progress indicator configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// How progress is measured.
    pub mode: ProgressMode,
}

/// Location fragment configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    /// Mirror the active section into the location fragment.
    pub sync_fragment: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self { settle_ms: 120 }
    }
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            suppress_ms: 150,
            smooth_scroll: true,
        }
    }
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            thresholds: vec![0.0, 0.25, 0.5, 0.75, 1.0],
            channel_capacity: 256,
        }
    }
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            sync_fragment: true,
        }
    }
}

/// Check a settling or suppression window against the allowed maximum.
///
/// # Errors
///
/// Returns [`Error::ConfigValidation`] if `ms` exceeds the maximum.
pub fn validate_window(name: &str, ms: u64) -> Result<()> {
    if ms > MAX_WINDOW_MS {
        return Err(Error::ConfigValidation {
            message: format!("{name} ({ms}) cannot exceed {MAX_WINDOW_MS}"),
        });
    }
    Ok(())
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails, or the
    /// loaded values do not validate.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        validate_window("settle_ms", self.aggregator.settle_ms)?;
        validate_window("suppress_ms", self.navigation.suppress_ms)?;

        if self.observer.poll_interval_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "poll_interval_ms must be greater than 0".to_string(),
            });
        }

        if self.observer.thresholds.is_empty() {
            return Err(Error::ConfigValidation {
                message: "thresholds must not be empty".to_string(),
            });
        }

        if let Some(bad) = self
            .observer
            .thresholds
            .iter()
            .find(|t| !(0.0..=1.0).contains(*t))
        {
            return Err(Error::ConfigValidation {
                message: format!("threshold {bad} is outside [0, 1]"),
            });
        }

        if self.observer.channel_capacity == 0 {
            return Err(Error::ConfigValidation {
                message: "channel_capacity must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Get the scroll behavior for programmatic navigation.
    #[must_use]
    pub fn scroll_behavior(&self) -> ScrollBehavior {
        if self.navigation.smooth_scroll {
            ScrollBehavior::Smooth
        } else {
            ScrollBehavior::Instant
        }
    }

    /// Get the poll interval as a Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.observer.poll_interval_ms)
    }
}
