//! Configuration file support for doseplan.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/doseplan/config.toml`.

use crate::adherence::MAX_PERIOD_DAYS;
use crate::schedule::{MAX_GRACE_MINUTES, MAX_PROJECTION_COUNT};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub profile: ProfileConfig,

    #[serde(default)]
    pub dosing: DosingConfig,

    #[serde(default)]
    pub report: ReportConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Whose doses this installation tracks
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default = "default_user_id")]
    pub user_id: String,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
        }
    }
}

/// Dose logging parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DosingConfig {
    /// Minutes past the due time before an intake is recorded as late
    #[serde(default = "default_late_tolerance_minutes")]
    pub late_tolerance_minutes: i64,

    /// Minutes past the due time before a pending dose is swept to missed
    #[serde(default = "default_missed_after_minutes")]
    pub missed_after_minutes: i64,

    #[serde(default = "default_reminder_offset_minutes")]
    pub default_reminder_offset_minutes: u32,
}

impl Default for DosingConfig {
    fn default() -> Self {
        Self {
            late_tolerance_minutes: default_late_tolerance_minutes(),
            missed_after_minutes: default_missed_after_minutes(),
            default_reminder_offset_minutes: default_reminder_offset_minutes(),
        }
    }
}

/// Projection and adherence report parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_projection_count")]
    pub projection_count: usize,

    #[serde(default = "default_period_days")]
    pub period_days: u32,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            projection_count: default_projection_count(),
            period_days: default_period_days(),
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".local/share"))
            .unwrap_or_else(|| PathBuf::from("."))
    });
    base.join("doseplan")
}

fn default_user_id() -> String {
    "default".into()
}

fn default_late_tolerance_minutes() -> i64 {
    crate::schedule::DEFAULT_LATE_TOLERANCE_MINUTES
}

fn default_missed_after_minutes() -> i64 {
    60
}

fn default_reminder_offset_minutes() -> u32 {
    crate::types::DEFAULT_REMINDER_OFFSET_MINUTES
}

fn default_projection_count() -> usize {
    crate::schedule::DEFAULT_PROJECTION_COUNT
}

fn default_period_days() -> u32 {
    crate::adherence::DEFAULT_PERIOD_DAYS
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Reject values the engines cannot work with
    pub fn validate(&self) -> Result<()> {
        let report = &self.report;
        if report.period_days == 0 || report.period_days > MAX_PERIOD_DAYS {
            return Err(Error::Config(format!(
                "report.period_days must be between 1 and {}",
                MAX_PERIOD_DAYS
            )));
        }
        if report.projection_count == 0 || report.projection_count > MAX_PROJECTION_COUNT {
            return Err(Error::Config(format!(
                "report.projection_count must be between 1 and {}",
                MAX_PROJECTION_COUNT
            )));
        }

        let grace = 0..=MAX_GRACE_MINUTES;
        if !grace.contains(&self.dosing.late_tolerance_minutes)
            || !grace.contains(&self.dosing.missed_after_minutes)
        {
            return Err(Error::Config(format!(
                "dosing tolerances must be between 0 and {} minutes",
                MAX_GRACE_MINUTES
            )));
        }
        if self.profile.user_id.trim().is_empty() {
            return Err(Error::Config("profile.user_id must not be empty".into()));
        }
        Ok(())
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(|home| PathBuf::from(home).join(".config"))
                .unwrap_or_else(|| PathBuf::from("."))
        });
        base.join("doseplan").join("config.toml")
    }

    /// Path of the treatment plan document
    pub fn plan_path(data_dir: &Path) -> PathBuf {
        data_dir.join("plan.json")
    }

    /// Path of the append-only dose log
    pub fn dose_log_path(data_dir: &Path) -> PathBuf {
        data_dir.join("doses.jsonl")
    }

    /// Save the current configuration to the default path
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path();
        self.save_to(&config_path)
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}
