//! Reward run entity - The idempotency guard of a distribution run.
//!
//! A row is inserted before any ledger credit; the unique index on
//! `(reward_type, period_key)` makes that insert the lock that decides which
//! worker distributes a period. The row is deleted again only when the run
//! aborts before crediting anyone.

use super::leaderboard_reward::RewardType;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Progress of a distribution run
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Guard acquired, credits in progress
    #[sea_orm(string_value = "running")]
    Running,
    /// Every ranked user was processed
    #[sea_orm(string_value = "completed")]
    Completed,
}

/// Reward run database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "leaderboard_reward_runs")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Leaderboard cadence
    pub reward_type: RewardType,
    /// Period being distributed
    pub period_key: String,
    /// Run progress
    pub status: RunStatus,
    /// Users credited successfully
    pub rewarded_count: i32,
    /// Users whose credit failed and was skipped
    pub skipped_count: i32,
    /// When the guard was acquired
    pub started_at: DateTimeUtc,
    /// When the run finished
    pub finished_at: Option<DateTimeUtc>,
}

/// `RewardRun` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
