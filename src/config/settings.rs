//! Application settings loaded from `config.toml`.
//!
//! Every section is optional; missing sections and fields fall back to the
//! production defaults so an empty file is a valid configuration.

use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Points conversion constants
    pub points: PointsSettings,
    /// Carbon factor reference data for transport modes
    pub transport_modes: Vec<TransportModeConfig>,
    /// Leaderboard reward cadence and amounts
    pub rewards: RewardSettings,
    /// Ledger tuning
    pub ledger: LedgerSettings,
    /// Achievement badges unlocked by cumulative carbon saved
    pub badges: Vec<BadgeConfig>,
}

/// Points conversion constants
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PointsSettings {
    /// Carbon emitted by a car per km, in grams; the baseline savings are measured against
    pub car_carbon_factor: f64,
    /// Points awarded per gram of carbon saved
    pub points_per_gram: i64,
}

impl Default for PointsSettings {
    fn default() -> Self {
        Self {
            car_carbon_factor: 100.0,
            points_per_gram: 10,
        }
    }
}

/// Carbon factor of one transport mode
#[derive(Debug, Clone, Deserialize)]
pub struct TransportModeConfig {
    /// Mode identifier as reported by the detector (e.g. `"bike"`)
    pub mode: String,
    /// Grams of carbon emitted per km
    pub carbon_factor: f64,
}

/// Leaderboard reward cadence and amounts
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RewardSettings {
    /// Number of ranked users rewarded per period
    pub top_n: u64,
    /// Points per rank step for the daily board
    pub daily_multiplier: i64,
    /// Points per rank step for the monthly board
    pub monthly_multiplier: i64,
    /// Minutes after midnight the daily job fires
    pub daily_offset_minutes: u32,
    /// Minutes after midnight on the first of the month the monthly job fires
    pub monthly_offset_minutes: u32,
    /// Minutes after which a run still marked running is treated as abandoned
    /// and may be taken over
    pub stale_run_minutes: u32,
}

impl Default for RewardSettings {
    fn default() -> Self {
        Self {
            top_n: 10,
            daily_multiplier: 10,
            monthly_multiplier: 100,
            daily_offset_minutes: 5,
            monthly_offset_minutes: 10,
            stale_run_minutes: 60,
        }
    }
}

/// Ledger tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    /// How often a conflicting balance update is retried before giving up
    pub max_conflict_retries: u32,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            max_conflict_retries: 3,
        }
    }
}

/// An achievement badge unlocked by cumulative carbon saved
#[derive(Debug, Clone, Deserialize)]
pub struct BadgeConfig {
    /// Stable badge identifier
    pub badge_id: String,
    /// Display name
    pub name: String,
    /// Cumulative grams of carbon saved required to unlock
    pub carbon_threshold: f64,
}

impl Settings {
    /// Checks cross-field constraints serde cannot express.
    ///
    /// # Errors
    /// Returns `Error::Config` when a constant is out of range or a transport
    /// mode is listed twice.
    pub fn validate(&self) -> Result<()> {
        if self.points.points_per_gram <= 0 {
            return Err(Error::Config {
                message: "points.points_per_gram must be positive".to_string(),
            });
        }
        if !self.points.car_carbon_factor.is_finite() || self.points.car_carbon_factor < 0.0 {
            return Err(Error::Config {
                message: "points.car_carbon_factor must be a non-negative number".to_string(),
            });
        }
        if self.rewards.top_n == 0 {
            return Err(Error::Config {
                message: "rewards.top_n must be at least 1".to_string(),
            });
        }
        if self.rewards.stale_run_minutes == 0 {
            return Err(Error::Config {
                message: "rewards.stale_run_minutes must be at least 1".to_string(),
            });
        }

        let mut seen = std::collections::HashSet::new();
        for mode in &self.transport_modes {
            if !seen.insert(mode.mode.as_str()) {
                return Err(Error::Config {
                    message: format!("transport mode '{}' is defined twice", mode.mode),
                });
            }
        }
        Ok(())
    }
}

/// Loads settings from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - A value fails [`Settings::validate`]
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let path_ref = path.as_ref();
    tracing::debug!("Attempting to load settings from: {:?}", path_ref);
    let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
        message: format!("Failed to read config file {}: {e}", path_ref.display()),
    })?;
    parse_settings(&contents)
}

/// Parses settings from TOML text.
///
/// # Errors
/// Returns `Error::Config` when the text is not valid TOML or fails validation.
pub fn parse_settings(contents: &str) -> Result<Settings> {
    let settings: Settings = toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })?;
    settings.validate()?;
    Ok(settings)
}

/// Loads settings from the path in `ECOPOINTS_CONFIG`, or `./config.toml`.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed.
pub fn load_default_settings() -> Result<Settings> {
    let path = std::env::var("ECOPOINTS_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    load_settings(path)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;

    #[test]
    fn test_parse_full_settings() {
        let toml_str = r#"
            [points]
            car_carbon_factor = 120.0
            points_per_gram = 5

            [[transport_modes]]
            mode = "bike"
            carbon_factor = 0.0

            [[transport_modes]]
            mode = "bus"
            carbon_factor = 30.0

            [rewards]
            top_n = 5
            daily_multiplier = 20

            [ledger]
            max_conflict_retries = 7

            [[badges]]
            badge_id = "b1"
            name = "Seedling"
            carbon_threshold = 500.0
        "#;

        let settings = parse_settings(toml_str).unwrap();
        assert_eq!(settings.points.car_carbon_factor, 120.0);
        assert_eq!(settings.points.points_per_gram, 5);
        assert_eq!(settings.transport_modes.len(), 2);
        assert_eq!(settings.transport_modes[1].mode, "bus");
        assert_eq!(settings.rewards.top_n, 5);
        assert_eq!(settings.rewards.daily_multiplier, 20);
        // unspecified fields keep their defaults
        assert_eq!(settings.rewards.monthly_multiplier, 100);
        assert_eq!(settings.ledger.max_conflict_retries, 7);
        assert_eq!(settings.badges[0].name, "Seedling");
    }

    #[test]
    fn test_empty_settings_use_defaults() {
        let settings = parse_settings("").unwrap();
        assert_eq!(settings.points.car_carbon_factor, 100.0);
        assert_eq!(settings.points.points_per_gram, 10);
        assert_eq!(settings.rewards.top_n, 10);
        assert_eq!(settings.rewards.daily_multiplier, 10);
        assert_eq!(settings.rewards.monthly_multiplier, 100);
        assert_eq!(settings.ledger.max_conflict_retries, 3);
        assert!(settings.transport_modes.is_empty());
    }

    #[test]
    fn test_duplicate_transport_mode_rejected() {
        let toml_str = r#"
            [[transport_modes]]
            mode = "bike"
            carbon_factor = 0.0

            [[transport_modes]]
            mode = "bike"
            carbon_factor = 1.0
        "#;

        let result = parse_settings(toml_str);
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_zero_top_n_rejected() {
        let result = parse_settings("[rewards]\ntop_n = 0\n");
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_zero_stale_run_minutes_rejected() {
        let result = parse_settings("[rewards]\nstale_run_minutes = 0\n");
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_load_settings_missing_file() {
        let result = load_settings("/nonexistent/ecopoints/config.toml");
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_bundled_config_parses() {
        let settings = parse_settings(include_str!("../../config.toml")).unwrap();
        assert_eq!(settings.transport_modes.len(), 5);
        assert_eq!(settings.rewards.top_n, 10);
        assert_eq!(settings.rewards.stale_run_minutes, 60);
        assert_eq!(settings.badges.len(), 3);
    }
}
