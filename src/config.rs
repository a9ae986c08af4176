//! Run settings, loaded from an optional TOML file.
//!
//! Every key has a default, so an empty file (or no file) is a valid configuration:
//!
//! ```toml
//! gap_threshold_days = 20
//! window_days = 30
//! open_discharge = "9999-12-31"
//! ```
use crate::episode::GroupConfig;
use chrono::NaiveDate;
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

pub const DEFAULT_GAP_THRESHOLD_DAYS: i64 = 20;
pub const DEFAULT_WINDOW_DAYS: u32 = 30;

/// Discharge date given to inpatient-like visits that have none: still admitted, end unknown.
pub fn default_open_discharge() -> NaiveDate {
    NaiveDate::from_ymd_opt(9999, 12, 31).unwrap()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Largest gap (in days) between an episode's end and the next admission that still
    /// continues the episode.
    pub gap_threshold_days: i64,
    /// Length of the trailing window used for occupancy counts.
    pub window_days: u32,
    pub open_discharge: NaiveDate,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            gap_threshold_days: DEFAULT_GAP_THRESHOLD_DAYS,
            window_days: DEFAULT_WINDOW_DAYS,
            open_discharge: default_open_discharge(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        fn inner(path: &Path) -> Result<Config> {
            let text = fs::read_to_string(path)?;
            Config::from_toml(&text)
        }
        let path = path.as_ref();
        inner(path).with_context(|| format!("loading config from \"{}\"", path.display()))
    }

    /// Use the file if given, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(Error::from)
    }

    pub fn group_config(&self) -> GroupConfig {
        GroupConfig {
            gap_threshold_days: self.gap_threshold_days,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_file_is_default() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
    }

    #[test]
    fn partial_file() {
        let config = Config::from_toml("gap_threshold_days = 7\nopen_discharge = \"2099-12-31\"\n")
            .unwrap();
        assert_eq!(config.gap_threshold_days, 7);
        assert_eq!(config.window_days, DEFAULT_WINDOW_DAYS);
        assert_eq!(config.open_discharge, NaiveDate::from_ymd_opt(2099, 12, 31).unwrap());
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(Config::from_toml("gap = 3").is_err());
        // the region is fixed by the city correction table
        assert!(Config::from_toml("region_of_interest = \"VI\"").is_err());
    }
}
