//! Points conversion - carbon factors and the trip point formula.
//!
//! Trip points are the carbon saved against driving the same distance, scaled by
//! a fixed number of points per gram. Carbon factors come from the transport-mode
//! reference data behind the [`CarbonFactors`] trait.

use crate::{
    config::settings::{PointsSettings, TransportModeConfig},
    errors::{Error, Result},
};
use std::collections::HashMap;

/// Lookup of grams of carbon emitted per km for a transport mode.
pub trait CarbonFactors: Send + Sync {
    /// Carbon factor of `mode`, or `None` when the mode is unknown.
    fn carbon_factor(&self, mode: &str) -> Option<f64>;
}

/// Transport-mode reference data loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct TransportModeTable {
    factors: HashMap<String, f64>,
}

impl TransportModeTable {
    /// Builds the table from the `[[transport_modes]]` config entries.
    #[must_use]
    pub fn from_config(modes: &[TransportModeConfig]) -> Self {
        Self {
            factors: modes
                .iter()
                .map(|m| (m.mode.clone(), m.carbon_factor))
                .collect(),
        }
    }
}

impl CarbonFactors for TransportModeTable {
    fn carbon_factor(&self, mode: &str) -> Option<f64> {
        self.factors.get(mode.trim()).copied()
    }
}

/// Grams of carbon saved by travelling `distance_km` with `mode` instead of a car.
///
/// Modes at least as dirty as a car save nothing; the result is never negative.
///
/// # Errors
/// * `Error::UnknownTransportMode` - `mode` has no carbon factor
/// * `Error::InvalidInput` - `distance_km` is negative or not finite
pub fn carbon_saved_grams(
    factors: &dyn CarbonFactors,
    settings: &PointsSettings,
    mode: &str,
    distance_km: f64,
) -> Result<f64> {
    if !distance_km.is_finite() || distance_km < 0.0 {
        return Err(Error::InvalidInput {
            message: format!("distance must be a non-negative number, got {distance_km}"),
        });
    }

    let factor = factors
        .carbon_factor(mode)
        .ok_or_else(|| Error::UnknownTransportMode {
            mode: mode.to_string(),
        })?;

    let saving_per_km = (settings.car_carbon_factor - factor).max(0.0);
    Ok(saving_per_km * distance_km)
}

/// Points earned for a trip: `(car factor - mode factor) * distance * points per gram`,
/// truncated to whole points and clamped at zero.
///
/// # Errors
/// Same as [`carbon_saved_grams`].
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn calculate_points(
    factors: &dyn CarbonFactors,
    settings: &PointsSettings,
    mode: &str,
    distance_km: f64,
) -> Result<i64> {
    let grams = carbon_saved_grams(factors, settings, mode, distance_km)?;
    let points = (grams * settings.points_per_gram as f64).trunc();
    if points >= i64::MAX as f64 {
        return Err(Error::InvalidInput {
            message: format!("distance {distance_km}km overflows the points range"),
        });
    }
    Ok(points as i64)
}

/// Ledger description of a trip: `"<start> -> <end> (<distance>km)"`.
#[must_use]
pub fn format_trip_description(
    start_place: Option<&str>,
    end_place: Option<&str>,
    distance_km: f64,
) -> String {
    let start = start_place.filter(|s| !s.is_empty()).unwrap_or("Unknown Start");
    let end = end_place
        .filter(|s| !s.is_empty())
        .unwrap_or("Unknown Destination");
    format!("{start} -> {end} ({distance_km:.1}km)")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;

    fn table() -> TransportModeTable {
        TransportModeTable::from_config(&[
            TransportModeConfig {
                mode: "bike".to_string(),
                carbon_factor: 0.0,
            },
            TransportModeConfig {
                mode: "bus".to_string(),
                carbon_factor: 30.0,
            },
            TransportModeConfig {
                mode: "car".to_string(),
                carbon_factor: 100.0,
            },
            TransportModeConfig {
                mode: "plane".to_string(),
                carbon_factor: 250.0,
            },
        ])
    }

    #[test]
    fn test_bike_two_km() {
        let settings = PointsSettings::default();
        let points = calculate_points(&table(), &settings, "bike", 2.0).unwrap();
        // (100 - 0) * 2 * 10
        assert_eq!(points, 2000);
    }

    #[test]
    fn test_bus_fractional_distance_truncates() {
        let settings = PointsSettings::default();
        // (100 - 30) * 1.25 = 87.5g -> 875 points
        assert_eq!(calculate_points(&table(), &settings, "bus", 1.25).unwrap(), 875);
        // (100 - 30) * 0.0333 = 2.331g -> 23.31 -> 23
        assert_eq!(calculate_points(&table(), &settings, "bus", 0.0333).unwrap(), 23);
    }

    #[test]
    fn test_car_and_dirtier_modes_earn_nothing() {
        let settings = PointsSettings::default();
        assert_eq!(calculate_points(&table(), &settings, "car", 10.0).unwrap(), 0);
        assert_eq!(calculate_points(&table(), &settings, "plane", 10.0).unwrap(), 0);
    }

    #[test]
    fn test_unknown_mode() {
        let settings = PointsSettings::default();
        let result = calculate_points(&table(), &settings, "teleport", 1.0);
        assert!(matches!(
            result,
            Err(Error::UnknownTransportMode { mode }) if mode == "teleport"
        ));
    }

    #[test]
    fn test_invalid_distance() {
        let settings = PointsSettings::default();
        assert!(calculate_points(&table(), &settings, "bike", -1.0).is_err());
        assert!(calculate_points(&table(), &settings, "bike", f64::NAN).is_err());
        assert!(calculate_points(&table(), &settings, "bike", f64::INFINITY).is_err());
    }

    #[test]
    fn test_custom_scaling() {
        let settings = PointsSettings {
            car_carbon_factor: 120.0,
            points_per_gram: 1,
        };
        assert_eq!(calculate_points(&table(), &settings, "bus", 2.0).unwrap(), 180);
    }

    #[test]
    fn test_format_trip_description() {
        assert_eq!(
            format_trip_description(Some("Library"), Some("Gym"), 2.46),
            "Library -> Gym (2.5km)"
        );
        assert_eq!(
            format_trip_description(None, Some(""), 1.0),
            "Unknown Start -> Unknown Destination (1.0km)"
        );
    }
}
