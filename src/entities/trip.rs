//! Trip entity - One recorded journey and its settlement state.
//!
//! A trip is created in `tracking`, then moves exactly once to `completed` or
//! `canceled`. `tracking_user_id` mirrors `user_id` while the trip is in progress
//! and is cleared on the terminal transition; its unique index is what limits a
//! user to a single tracking trip at the storage level.

use sea_orm::FromJsonQueryResult;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Settlement state of a trip
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum TripStatus {
    /// Trip in progress
    #[sea_orm(string_value = "tracking")]
    Tracking,
    /// Trip finished and settled
    #[sea_orm(string_value = "completed")]
    Completed,
    /// Trip abandoned, never settled
    #[sea_orm(string_value = "canceled")]
    Canceled,
}

impl TripStatus {
    /// Lowercase status name as stored.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tracking => "tracking",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for TripStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single leg of a trip travelled with one transport mode
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransportSegment {
    /// Transport mode of this leg (e.g. `"bike"`)
    pub mode: String,
    /// Distance of this leg in km
    pub sub_distance: f64,
    /// Duration of this leg in minutes
    pub sub_duration: i64,
}

/// Ordered transport legs, stored as a JSON column
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct TransportSegments(pub Vec<TransportSegment>);

/// A longitude/latitude pair
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Longitude
    pub lng: f64,
    /// Latitude
    pub lat: f64,
}

/// Recorded route, stored as a JSON column
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct Polyline(pub Vec<GeoPoint>);

/// Trip database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "trips")]
pub struct Model {
    /// UUID of the trip
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Owner of the trip
    #[sea_orm(indexed)]
    pub user_id: String,
    /// Set to `user_id` while tracking, `NULL` afterwards
    #[sea_orm(unique)]
    pub tracking_user_id: Option<String>,
    /// Start longitude
    pub start_lng: f64,
    /// Start latitude
    pub start_lat: f64,
    /// Start street address
    pub start_address: Option<String>,
    /// Start place name
    pub start_place_name: Option<String>,
    /// Start campus zone
    pub start_campus_zone: Option<String>,
    /// End longitude
    pub end_lng: Option<f64>,
    /// End latitude
    pub end_lat: Option<f64>,
    /// End street address
    pub end_address: Option<String>,
    /// End place name
    pub end_place_name: Option<String>,
    /// End campus zone
    pub end_campus_zone: Option<String>,
    /// Ordered transport legs
    pub transport_modes: TransportSegments,
    /// Recorded route
    pub polyline_points: Polyline,
    /// Total distance in km
    pub distance: f64,
    /// Transport mode reported by the detector
    pub detected_mode: Option<String>,
    /// Detector confidence in `[0, 1]`
    pub ml_confidence: Option<f64>,
    /// Whether the trip counts as low-carbon
    pub is_green_trip: bool,
    /// Carbon saved against driving, in grams
    pub carbon_saved: f64,
    /// Settlement state
    pub carbon_status: TripStatus,
    /// Points credited at completion
    pub points_gained: i64,
    /// When tracking started
    pub start_time: DateTimeUtc,
    /// When the trip reached a terminal state
    pub end_time: Option<DateTimeUtc>,
    /// When the row was created
    pub created_at: DateTimeUtc,
}

/// `Trip` has no foreign keys; `user_id` refers to `accounts.user_id` by value
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
