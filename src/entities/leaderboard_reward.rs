//! Leaderboard reward entity - One payout to one user for one period.
//!
//! Written by the reward distributor in the same database transaction as the
//! matching ledger credit. Unique on `(reward_type, period_key, user_id)`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Cadence of a leaderboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "UPPERCASE")]
pub enum RewardType {
    /// One calendar day
    #[sea_orm(string_value = "DAILY")]
    Daily,
    /// One calendar month
    #[sea_orm(string_value = "MONTHLY")]
    Monthly,
}

impl RewardType {
    /// Uppercase name as stored.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "DAILY",
            Self::Monthly => "MONTHLY",
        }
    }
}

impl std::fmt::Display for RewardType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Leaderboard reward database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "leaderboard_rewards")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Leaderboard cadence
    pub reward_type: RewardType,
    /// `YYYY-MM-DD` for daily, `YYYY-MM` for monthly
    pub period_key: String,
    /// Rewarded user
    pub user_id: String,
    /// 1-based rank within the period
    pub rank: i32,
    /// Points credited
    pub points_awarded: i64,
    /// Carbon saved that earned the rank, in grams
    pub carbon_saved: f64,
    /// When the credit was applied
    pub distributed_at: DateTimeUtc,
}

/// `LeaderboardReward` has no navigable relationships
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
