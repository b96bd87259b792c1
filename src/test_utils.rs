//! Shared test utilities for the points ledger and trip lifecycle.
//!
//! This module provides common helper functions for setting up test databases
//! and creating accounts, trips and settlement rules with sensible defaults.

use crate::{
    config::settings::{BadgeConfig, PointsSettings, TransportModeConfig},
    core::{
        badge::CarbonThresholdBadges,
        ledger::{self, Adjustment, AdjustmentSource},
        points::TransportModeTable,
        trip::{self, CompleteTripRequest, TransportSegment, TripLocation, TripRules},
    },
    entities::{self, AccountModel, PointsLogModel, TripModel, TripStatus},
    errors::Result,
};
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Opens a zero-balance account whose nickname is the user id.
pub async fn setup_account(db: &DatabaseConnection, user_id: &str) -> Result<AccountModel> {
    ledger::open_account(db, user_id, user_id).await
}

/// Sets up a complete test environment with one account.
/// Returns (db, account) for common test scenarios.
pub async fn setup_with_account(user_id: &str) -> Result<(DatabaseConnection, AccountModel)> {
    let db = setup_test_db().await?;
    let account = setup_account(&db, user_id).await?;
    Ok((db, account))
}

/// Credits `points` to `user_id` as a task reward.
pub async fn credit(db: &DatabaseConnection, user_id: &str, points: i64) -> Result<PointsLogModel> {
    ledger::adjust_points(
        db,
        &Adjustment::new(user_id, points, AdjustmentSource::Task, "Test credit"),
        3,
    )
    .await
}

/// Settlement rules over a fixed mode table.
///
/// # Defaults
/// * modes: walk 0, bike 0, subway 20, bus 30, car 100 (g/km)
/// * points: car factor 100, 10 points per gram
/// * badges: `seedling` at 100g, `tree` at 5000g
pub struct TestRules {
    modes: TransportModeTable,
    badges: CarbonThresholdBadges,
    points: PointsSettings,
}

impl TestRules {
    /// Builds the default rules.
    pub fn new() -> Self {
        let modes = [("walk", 0.0), ("bike", 0.0), ("subway", 20.0), ("bus", 30.0), ("car", 100.0)]
            .into_iter()
            .map(|(mode, carbon_factor)| TransportModeConfig {
                mode: mode.to_string(),
                carbon_factor,
            })
            .collect::<Vec<_>>();
        let badges = [("seedling", "Seedling", 100.0), ("tree", "Tree", 5000.0)]
            .into_iter()
            .map(|(badge_id, name, carbon_threshold)| BadgeConfig {
                badge_id: badge_id.to_string(),
                name: name.to_string(),
                carbon_threshold,
            })
            .collect::<Vec<_>>();

        Self {
            modes: TransportModeTable::from_config(&modes),
            badges: CarbonThresholdBadges::new(&badges),
            points: PointsSettings::default(),
        }
    }

    /// Borrows the rules for `trip::complete_trip`.
    pub fn rules(&self) -> TripRules<'_> {
        TripRules {
            factors: &self.modes,
            points: &self.points,
            badges: &self.badges,
            max_conflict_retries: 3,
        }
    }
}

/// Starts a trip at a fixed campus location.
pub async fn start_test_trip(db: &DatabaseConnection, user_id: &str) -> Result<TripModel> {
    trip::start_trip(db, user_id, TripLocation::at(103.77, 1.29)).await
}

/// A green single-leg bike completion.
///
/// # Arguments
/// * `distance` - Trip distance in km
/// * `carbon_saved` - Reported grams saved
pub fn bike_request(distance: f64, carbon_saved: f64) -> CompleteTripRequest {
    CompleteTripRequest {
        end: TripLocation::at(103.78, 1.30),
        distance,
        transport_modes: vec![TransportSegment {
            mode: "bike".to_string(),
            sub_distance: distance,
            sub_duration: 10,
        }],
        polyline_points: Vec::new(),
        detected_mode: "bike".to_string(),
        ml_confidence: Some(0.9),
        is_green_trip: true,
        carbon_saved,
    }
}

/// Inserts a trip row directly, bypassing the lifecycle, for leaderboard tests.
///
/// # Arguments
/// * `status` - Stored status; only non-tracking trips release the tracking slot
/// * `is_green` - Green flag
/// * `carbon_saved` - Grams saved
/// * `start_time` - When the trip started
pub async fn insert_trip(
    db: &DatabaseConnection,
    user_id: &str,
    status: TripStatus,
    is_green: bool,
    carbon_saved: f64,
    start_time: DateTime<Utc>,
) -> Result<TripModel> {
    let tracking_user_id = (status == TripStatus::Tracking).then(|| user_id.to_string());
    let trip = entities::trip::ActiveModel {
        id: Set(uuid::Uuid::new_v4().to_string()),
        user_id: Set(user_id.to_string()),
        tracking_user_id: Set(tracking_user_id),
        start_lng: Set(103.77),
        start_lat: Set(1.29),
        start_address: Set(None),
        start_place_name: Set(None),
        start_campus_zone: Set(None),
        end_lng: Set(None),
        end_lat: Set(None),
        end_address: Set(None),
        end_place_name: Set(None),
        end_campus_zone: Set(None),
        transport_modes: Set(entities::trip::TransportSegments::default()),
        polyline_points: Set(entities::trip::Polyline::default()),
        distance: Set(1.0),
        detected_mode: Set(Some("bike".to_string())),
        ml_confidence: Set(None),
        is_green_trip: Set(is_green),
        carbon_saved: Set(carbon_saved),
        carbon_status: Set(status),
        points_gained: Set(0),
        start_time: Set(start_time),
        end_time: Set(None),
        created_at: Set(start_time),
    };
    Ok(trip.insert(db).await?)
}
