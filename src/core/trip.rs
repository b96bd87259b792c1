//! Trip lifecycle business logic - the per-user trip state machine.
//!
//! A trip starts in `tracking` and ends in exactly one of `completed` or
//! `canceled`. Completion computes the point award and settles it through the
//! ledger in the same database transaction as the state change, so a trip is
//! never `completed` without its ledger entry. Every transition is a conditional
//! update on `carbon_status = 'tracking'`; whichever request loses a race sees an
//! [`Error::InvalidTripState`].

use crate::{
    config::settings::PointsSettings,
    core::{
        badge::{BadgeUnlocker, UnlockedBadge},
        ledger::{self, Adjustment, AdjustmentSource},
        points::{CarbonFactors, calculate_points, format_trip_description},
    },
    entities::{PointsLogModel, Trip, TripModel, TripStatus, trip},
    errors::{Error, Result},
};
use sea_orm::{QueryOrder, Set, SqlErr, TransactionTrait, prelude::*};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

pub use crate::entities::trip::{GeoPoint, Polyline, TransportSegment, TransportSegments};

/// A trip endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripLocation {
    /// Longitude
    pub lng: f64,
    /// Latitude
    pub lat: f64,
    /// Street address
    pub address: Option<String>,
    /// Place name shown in descriptions
    pub place_name: Option<String>,
    /// Campus zone
    pub campus_zone: Option<String>,
}

impl TripLocation {
    /// A location with coordinates only.
    #[must_use]
    pub const fn at(lng: f64, lat: f64) -> Self {
        Self {
            lng,
            lat,
            address: None,
            place_name: None,
            campus_zone: None,
        }
    }

    /// Sets the place name.
    #[must_use]
    pub fn named(mut self, place_name: impl Into<String>) -> Self {
        self.place_name = Some(place_name.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if !(-180.0..=180.0).contains(&self.lng) || !(-90.0..=90.0).contains(&self.lat) {
            return Err(Error::InvalidInput {
                message: format!("coordinates out of range: ({}, {})", self.lng, self.lat),
            });
        }
        Ok(())
    }
}

/// Data reported when a trip ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteTripRequest {
    /// Where the trip ended
    pub end: TripLocation,
    /// Total distance in km
    pub distance: f64,
    /// Ordered transport legs
    pub transport_modes: Vec<TransportSegment>,
    /// Recorded route
    pub polyline_points: Vec<GeoPoint>,
    /// Mode reported by the detector; decides the point award
    pub detected_mode: String,
    /// Detector confidence in `[0, 1]`
    pub ml_confidence: Option<f64>,
    /// Whether the trip counts as low-carbon
    pub is_green_trip: bool,
    /// Carbon saved against driving, in grams
    pub carbon_saved: f64,
}

impl CompleteTripRequest {
    fn validate(&self) -> Result<()> {
        self.end.validate()?;
        if !self.distance.is_finite() || self.distance < 0.0 {
            return Err(Error::InvalidInput {
                message: format!("distance must be a non-negative number, got {}", self.distance),
            });
        }
        if !self.carbon_saved.is_finite() || self.carbon_saved < 0.0 {
            return Err(Error::InvalidInput {
                message: format!(
                    "carbon saved must be a non-negative number, got {}",
                    self.carbon_saved
                ),
            });
        }
        if let Some(confidence) = self.ml_confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(Error::InvalidInput {
                    message: format!("ml confidence must be within [0, 1], got {confidence}"),
                });
            }
        }
        if self.detected_mode.trim().is_empty() {
            return Err(Error::InvalidInput {
                message: "detected mode cannot be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Collaborators and constants used to settle a trip
#[derive(Clone, Copy)]
pub struct TripRules<'a> {
    /// Transport-mode reference data
    pub factors: &'a dyn CarbonFactors,
    /// Points formula constants
    pub points: &'a PointsSettings,
    /// Badge service notified after completion
    pub badges: &'a dyn BadgeUnlocker,
    /// Retries for conflicting balance updates
    pub max_conflict_retries: u32,
}

/// Outcome of a successful completion
#[derive(Debug, Clone)]
pub struct CompletedTrip {
    /// The trip in its `completed` state
    pub trip: TripModel,
    /// The settlement entry; `None` when the trip earned no points
    pub ledger_entry: Option<PointsLogModel>,
    /// Badges unlocked by this trip's carbon savings
    pub unlocked_badges: Vec<UnlockedBadge>,
}

/// Starts tracking a new trip for `user_id`.
///
/// # Errors
/// * `Error::AccountNotFound` - the user has no account
/// * `Error::TripAlreadyTracking` - the user already has a trip in progress
#[instrument(skip(db, start))]
pub async fn start_trip(
    db: &DatabaseConnection,
    user_id: &str,
    start: TripLocation,
) -> Result<TripModel> {
    start.validate()?;

    if ledger::get_account(db, user_id).await?.is_none() {
        return Err(Error::AccountNotFound {
            user_id: user_id.to_string(),
        });
    }

    if let Some(current) = get_current_trip(db, user_id).await? {
        return Err(Error::TripAlreadyTracking {
            user_id: user_id.to_string(),
            trip_id: current.id,
        });
    }

    let now = chrono::Utc::now();
    let trip = trip::ActiveModel {
        id: Set(uuid::Uuid::new_v4().to_string()),
        user_id: Set(user_id.to_string()),
        tracking_user_id: Set(Some(user_id.to_string())),
        start_lng: Set(start.lng),
        start_lat: Set(start.lat),
        start_address: Set(start.address),
        start_place_name: Set(start.place_name),
        start_campus_zone: Set(start.campus_zone),
        end_lng: Set(None),
        end_lat: Set(None),
        end_address: Set(None),
        end_place_name: Set(None),
        end_campus_zone: Set(None),
        transport_modes: Set(TransportSegments::default()),
        polyline_points: Set(Polyline::default()),
        distance: Set(0.0),
        detected_mode: Set(None),
        ml_confidence: Set(None),
        is_green_trip: Set(false),
        carbon_saved: Set(0.0),
        carbon_status: Set(TripStatus::Tracking),
        points_gained: Set(0),
        start_time: Set(now),
        end_time: Set(None),
        created_at: Set(now),
    };

    match trip.insert(db).await {
        Ok(model) => {
            info!("Started trip {} for {}", model.id, user_id);
            Ok(model)
        }
        // Lost a race against a concurrent start for the same user
        Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
            let trip_id = get_current_trip(db, user_id)
                .await?
                .map(|t| t.id)
                .unwrap_or_default();
            Err(Error::TripAlreadyTracking {
                user_id: user_id.to_string(),
                trip_id,
            })
        }
        Err(e) => Err(e.into()),
    }
}

/// Completes a tracking trip and credits its points.
///
/// The state change, the ledger entry and the account's carbon total are written
/// in one transaction. Badge unlocking runs after the commit and never fails the
/// completion.
///
/// # Errors
/// * `Error::TripNotFound` - no such trip for this user
/// * `Error::InvalidTripState` - the trip is not `tracking`
/// * `Error::UnknownTransportMode` / `Error::InvalidInput` - bad request data
/// * `Error::AccountNotFound` - the owner's account disappeared; the trip stays `tracking`
#[instrument(skip(db, rules, request), fields(mode = %request.detected_mode, distance = request.distance))]
pub async fn complete_trip(
    db: &DatabaseConnection,
    rules: TripRules<'_>,
    user_id: &str,
    trip_id: &str,
    request: &CompleteTripRequest,
) -> Result<CompletedTrip> {
    request.validate()?;
    let points = calculate_points(
        rules.factors,
        rules.points,
        &request.detected_mode,
        request.distance,
    )?;

    let (trip, ledger_entry, carbon_totals) =
        ledger::retry_on_conflict(rules.max_conflict_retries, move || async move {
            let txn = db.begin().await?;

            let current = find_owned_trip(&txn, user_id, trip_id).await?;
            ensure_tracking(&current)?;

            let description = format_trip_description(
                current.start_place_name.as_deref(),
                request.end.place_name.as_deref(),
                request.distance,
            );

            let completion = trip::ActiveModel {
                tracking_user_id: Set(None),
                end_lng: Set(Some(request.end.lng)),
                end_lat: Set(Some(request.end.lat)),
                end_address: Set(request.end.address.clone()),
                end_place_name: Set(request.end.place_name.clone()),
                end_campus_zone: Set(request.end.campus_zone.clone()),
                transport_modes: Set(TransportSegments(request.transport_modes.clone())),
                polyline_points: Set(Polyline(request.polyline_points.clone())),
                distance: Set(request.distance),
                detected_mode: Set(Some(request.detected_mode.clone())),
                ml_confidence: Set(request.ml_confidence),
                is_green_trip: Set(request.is_green_trip),
                carbon_saved: Set(request.carbon_saved),
                carbon_status: Set(TripStatus::Completed),
                points_gained: Set(points),
                end_time: Set(Some(chrono::Utc::now())),
                ..Default::default()
            };

            let updated = Trip::update_many()
                .set(completion)
                .filter(trip::Column::Id.eq(trip_id))
                .filter(trip::Column::CarbonStatus.eq(TripStatus::Tracking))
                .exec(&txn)
                .await?;
            if updated.rows_affected == 0 {
                let latest = find_owned_trip(&txn, user_id, trip_id).await?;
                return Err(Error::InvalidTripState {
                    trip_id: trip_id.to_string(),
                    status: latest.carbon_status.to_string(),
                });
            }

            let ledger_entry = if points > 0 {
                let adjustment =
                    Adjustment::new(user_id, points, AdjustmentSource::Trip, description)
                        .related_to(trip_id);
                Some(ledger::apply_adjustment(&txn, &adjustment).await?)
            } else {
                None
            };

            let carbon_totals =
                ledger::add_carbon_saved(&txn, user_id, request.carbon_saved).await?;
            let trip = find_owned_trip(&txn, user_id, trip_id).await?;

            txn.commit().await?;
            Ok::<_, Error>((trip, ledger_entry, carbon_totals))
        })
        .await?;

    info!(
        "Completed trip {} for {}: {} points, {}g carbon saved",
        trip.id, user_id, trip.points_gained, trip.carbon_saved
    );

    let (previous_total, new_total) = carbon_totals;
    let unlocked_badges = match rules
        .badges
        .check_and_unlock_carbon_badges(user_id, previous_total, new_total)
    {
        Ok(badges) => badges,
        Err(e) => {
            warn!("Badge check failed for {} after trip {}: {}", user_id, trip.id, e);
            Vec::new()
        }
    };

    Ok(CompletedTrip {
        trip,
        ledger_entry,
        unlocked_badges,
    })
}

/// Cancels a tracking trip. Cancelled trips never touch the ledger.
///
/// # Errors
/// * `Error::TripNotFound` - no such trip for this user
/// * `Error::InvalidTripState` - the trip is not `tracking`
#[instrument(skip(db))]
pub async fn cancel_trip(db: &DatabaseConnection, user_id: &str, trip_id: &str) -> Result<TripModel> {
    let cancellation = trip::ActiveModel {
        tracking_user_id: Set(None),
        carbon_status: Set(TripStatus::Canceled),
        end_time: Set(Some(chrono::Utc::now())),
        ..Default::default()
    };

    let updated = Trip::update_many()
        .set(cancellation)
        .filter(trip::Column::Id.eq(trip_id))
        .filter(trip::Column::UserId.eq(user_id))
        .filter(trip::Column::CarbonStatus.eq(TripStatus::Tracking))
        .exec(db)
        .await?;

    let trip = find_owned_trip(db, user_id, trip_id).await?;
    if updated.rows_affected == 0 {
        return Err(Error::InvalidTripState {
            trip_id: trip_id.to_string(),
            status: trip.carbon_status.to_string(),
        });
    }

    info!("Canceled trip {} for {}", trip_id, user_id);
    Ok(trip)
}

/// The trip `user_id` is currently tracking, if any.
pub async fn get_current_trip(db: &DatabaseConnection, user_id: &str) -> Result<Option<TripModel>> {
    Trip::find()
        .filter(trip::Column::TrackingUserId.eq(user_id))
        .one(db)
        .await
        .map_err(Into::into)
}

/// One trip of `user_id`. Trips of other users are reported as not found.
pub async fn get_trip_by_id(
    db: &DatabaseConnection,
    user_id: &str,
    trip_id: &str,
) -> Result<TripModel> {
    find_owned_trip(db, user_id, trip_id).await
}

/// All trips of `user_id`, newest first.
pub async fn get_user_trips(db: &DatabaseConnection, user_id: &str) -> Result<Vec<TripModel>> {
    Trip::find()
        .filter(trip::Column::UserId.eq(user_id))
        .order_by_desc(trip::Column::CreatedAt)
        .order_by_desc(trip::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Every trip, newest first.
pub async fn get_all_trips(db: &DatabaseConnection) -> Result<Vec<TripModel>> {
    Trip::find()
        .order_by_desc(trip::Column::CreatedAt)
        .order_by_desc(trip::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

async fn find_owned_trip<C>(conn: &C, user_id: &str, trip_id: &str) -> Result<TripModel>
where
    C: ConnectionTrait,
{
    Trip::find_by_id(trip_id.to_string())
        .one(conn)
        .await?
        .filter(|t| t.user_id == user_id)
        .ok_or_else(|| Error::TripNotFound {
            trip_id: trip_id.to_string(),
        })
}

fn ensure_tracking(trip: &TripModel) -> Result<()> {
    if trip.carbon_status == TripStatus::Tracking {
        Ok(())
    } else {
        Err(Error::InvalidTripState {
            trip_id: trip.id.clone(),
            status: trip.carbon_status.to_string(),
        })
    }
}
