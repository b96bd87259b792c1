//! Points log entity - The append-only ledger stored in `user_points_logs`.
//!
//! Rows are inserted exactly once per accepted balance change and never updated
//! or deleted. `points` is stored as a magnitude; `change_type` carries the sign.
//! Admin adjustments carry the operator, reason and approval status in the
//! `admin_*` columns, which are `NULL` for every other source.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Direction of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Points added to the balance
    #[sea_orm(string_value = "gain")]
    Gain,
    /// Points removed from the balance
    #[sea_orm(string_value = "deduct")]
    Deduct,
    /// Points spent on a redemption
    #[sea_orm(string_value = "redeem")]
    Redeem,
}

/// What caused a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum PointsSource {
    /// Settlement of a completed trip
    #[sea_orm(string_value = "trip")]
    Trip,
    /// Task or challenge completion
    #[sea_orm(string_value = "task")]
    Task,
    /// Shop redemption or its refund
    #[sea_orm(string_value = "redeem")]
    Redeem,
    /// Manual operator adjustment
    #[sea_orm(string_value = "admin")]
    Admin,
    /// Leaderboard reward payout
    #[sea_orm(string_value = "leaderboard")]
    Leaderboard,
}

/// Approval state of an operator adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    /// Awaiting a second operator
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Approved
    #[sea_orm(string_value = "approved")]
    Approved,
    /// Rejected
    #[sea_orm(string_value = "rejected")]
    Rejected,
}

/// Ledger entry database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_points_logs")]
pub struct Model {
    /// Monotonic entry id, also the replay order
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owner of the balance that changed
    #[sea_orm(indexed)]
    pub user_id: String,
    /// Direction of the change
    pub change_type: ChangeType,
    /// Magnitude of the change, always positive
    pub points: i64,
    /// What caused the change
    pub source: PointsSource,
    /// Human-readable description
    pub description: String,
    /// Trip, order or badge id the entry refers to
    pub related_id: Option<String>,
    /// `current_points` immediately after this entry was applied
    pub balance_after: i64,
    /// Operator who made an admin adjustment
    pub admin_operator_id: Option<String>,
    /// Reason given for an admin adjustment
    pub admin_reason: Option<String>,
    /// Approval state of an admin adjustment
    pub admin_approval_status: Option<ApprovalStatus>,
    /// When the entry was appended
    pub created_at: DateTimeUtc,
}

impl Model {
    /// Signed balance delta this entry applied.
    #[must_use]
    pub const fn signed_delta(&self) -> i64 {
        match self.change_type {
            ChangeType::Gain => self.points,
            ChangeType::Deduct | ChangeType::Redeem => -self.points,
        }
    }
}

/// Defines relationships between a ledger entry and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each entry belongs to one account
    #[sea_orm(
        belongs_to = "super::account::Entity",
        from = "Column::UserId",
        to = "super::account::Column::UserId"
    )]
    Account,
}

impl Related<super::account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Account.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
