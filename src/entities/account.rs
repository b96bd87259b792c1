//! Account entity - Holds the points balance of a single user.
//!
//! `current_points`, `total_points` and `total_carbon` belong to the ledger and are
//! only ever changed through `core::ledger`. `version` is bumped on every balance
//! change and guards the conditional update against lost writes.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Account database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "accounts")]
pub struct Model {
    /// Business user id (e.g. `"user001"`)
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: String,
    /// Display name used on leaderboards
    pub nickname: String,
    /// Spendable balance
    pub current_points: i64,
    /// Lifetime earned points, never decreases
    pub total_points: i64,
    /// Cumulative carbon saved by completed trips, in grams
    pub total_carbon: f64,
    /// Optimistic concurrency token
    pub version: i64,
    /// When the account was opened
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Account and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One account has many ledger entries
    #[sea_orm(has_many = "super::points_log::Entity")]
    PointsLogs,
}

impl Related<super::points_log::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PointsLogs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
