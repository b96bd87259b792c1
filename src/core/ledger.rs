//! Points ledger business logic - balances and their append-only audit trail.
//!
//! Every balance change goes through [`apply_adjustment`], which moves the
//! account balance with a single conditional `UPDATE` and appends one
//! `user_points_logs` row carrying the resulting balance. The update is guarded by
//! the account's `version` column, so a concurrent change to the same account
//! between the read and the write is detected as a [`Error::ConcurrencyConflict`]
//! instead of being lost. Both writes happen inside one database transaction.

use crate::{
    entities::{Account, AccountModel, ChangeType, PointsLog, account, points_log},
    entities::{ApprovalStatus, PointsLogModel, PointsSource},
    errors::{Error, Result},
};
use sea_orm::sea_query::Expr;
use sea_orm::{QueryOrder, Set, SqlErr, TransactionTrait, prelude::*};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{debug, info, instrument, warn};

/// Operator details attached to a manual adjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminAction {
    /// Operator who made the adjustment
    pub operator_id: String,
    /// Why the adjustment was made
    pub reason: String,
    /// Approval state of the adjustment
    pub approval_status: ApprovalStatus,
}

/// What caused an adjustment. Admin adjustments carry their operator details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdjustmentSource {
    /// Settlement of a completed trip
    Trip,
    /// Task or challenge completion
    Task,
    /// Shop redemption (negative) or its refund (positive)
    Redeem,
    /// Leaderboard reward payout
    Leaderboard,
    /// Manual operator adjustment
    Admin(AdminAction),
}

impl AdjustmentSource {
    /// Stored source column value.
    #[must_use]
    pub const fn kind(&self) -> PointsSource {
        match self {
            Self::Trip => PointsSource::Trip,
            Self::Task => PointsSource::Task,
            Self::Redeem => PointsSource::Redeem,
            Self::Leaderboard => PointsSource::Leaderboard,
            Self::Admin(_) => PointsSource::Admin,
        }
    }

    /// Whether positive amounts from this source count towards lifetime points.
    /// Redemption refunds only restore spendable points.
    const fn is_earning(&self) -> bool {
        !matches!(self, Self::Redeem)
    }

    const fn admin_action(&self) -> Option<&AdminAction> {
        match self {
            Self::Admin(action) => Some(action),
            _ => None,
        }
    }
}

/// A requested balance change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adjustment {
    /// Account to change
    pub user_id: String,
    /// Signed amount; positive adds points, negative removes them
    pub points: i64,
    /// What caused the change
    pub source: AdjustmentSource,
    /// Human-readable description stored on the entry
    pub description: String,
    /// Trip, order or badge id the change refers to
    pub related_id: Option<String>,
}

impl Adjustment {
    /// Creates an adjustment without a related id.
    pub fn new(
        user_id: impl Into<String>,
        points: i64,
        source: AdjustmentSource,
        description: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            points,
            source,
            description: description.into(),
            related_id: None,
        }
    }

    /// Links the adjustment to a trip, order or badge.
    #[must_use]
    pub fn related_to(mut self, related_id: impl Into<String>) -> Self {
        self.related_id = Some(related_id.into());
        self
    }

    const fn change_type(&self) -> ChangeType {
        if self.points > 0 {
            ChangeType::Gain
        } else if matches!(self.source, AdjustmentSource::Redeem) {
            ChangeType::Redeem
        } else {
            ChangeType::Deduct
        }
    }

    fn validate(&self) -> Result<()> {
        if self.points == 0 || self.points == i64::MIN {
            return Err(Error::InvalidAmount {
                amount: self.points,
            });
        }
        if self.user_id.trim().is_empty() {
            return Err(Error::InvalidInput {
                message: "user id cannot be empty".to_string(),
            });
        }
        if let Some(action) = self.source.admin_action() {
            if action.operator_id.trim().is_empty() {
                return Err(Error::InvalidInput {
                    message: "admin adjustments need an operator id".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Spendable and lifetime points of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentPoints {
    /// Account owner
    pub user_id: String,
    /// Spendable balance
    pub current_points: i64,
    /// Lifetime earned points
    pub total_points: i64,
}

impl From<AccountModel> for CurrentPoints {
    fn from(account: AccountModel) -> Self {
        Self {
            user_id: account.user_id,
            current_points: account.current_points,
            total_points: account.total_points,
        }
    }
}

/// Trip settlement totals taken from the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripStats {
    /// Number of settled trips
    pub total_trips: u64,
    /// Points credited by those trips
    pub total_points: i64,
}

/// Result of replaying an account's ledger against its stored balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerAudit {
    /// Account that was audited
    pub user_id: String,
    /// Number of entries replayed
    pub entries: usize,
    /// Sum of all signed deltas starting from zero
    pub replayed_balance: i64,
    /// Balance stored on the account
    pub current_points: i64,
    /// First entry whose `balance_after` does not follow from its predecessor
    pub first_inconsistent_entry: Option<i64>,
}

impl LedgerAudit {
    /// Whether the chain is unbroken and ends at the stored balance.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.first_inconsistent_entry.is_none() && self.replayed_balance == self.current_points
    }
}

/// Opens a zero-balance account for `user_id`.
#[instrument(skip(db))]
pub async fn open_account(
    db: &DatabaseConnection,
    user_id: &str,
    nickname: &str,
) -> Result<AccountModel> {
    if user_id.trim().is_empty() {
        return Err(Error::InvalidInput {
            message: "user id cannot be empty".to_string(),
        });
    }

    if get_account(db, user_id).await?.is_some() {
        return Err(Error::AccountExists {
            user_id: user_id.to_string(),
        });
    }

    let account = account::ActiveModel {
        user_id: Set(user_id.to_string()),
        nickname: Set(nickname.to_string()),
        current_points: Set(0),
        total_points: Set(0),
        total_carbon: Set(0.0),
        version: Set(0),
        created_at: Set(chrono::Utc::now()),
    };

    match account.insert(db).await {
        Ok(model) => {
            info!("Opened account for {}", user_id);
            Ok(model)
        }
        Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
            Err(Error::AccountExists {
                user_id: user_id.to_string(),
            })
        }
        Err(e) => Err(e.into()),
    }
}

/// Finds the account of `user_id`.
pub async fn get_account<C>(db: &C, user_id: &str) -> Result<Option<AccountModel>>
where
    C: ConnectionTrait,
{
    Account::find_by_id(user_id.to_string())
        .one(db)
        .await
        .map_err(Into::into)
}

async fn require_account<C>(db: &C, user_id: &str) -> Result<AccountModel>
where
    C: ConnectionTrait,
{
    get_account(db, user_id)
        .await?
        .ok_or_else(|| Error::AccountNotFound {
            user_id: user_id.to_string(),
        })
}

/// Applies one adjustment inside the caller's transaction.
///
/// Reads the account, moves the balance with a version-guarded atomic update and
/// appends the ledger entry. Callers must commit `conn` for the change to
/// persist, and should retry the whole transaction on
/// [`Error::ConcurrencyConflict`].
///
/// # Errors
/// * `Error::InvalidAmount` - `points` is zero
/// * `Error::AccountNotFound` - no account for the user
/// * `Error::InsufficientPoints` - a deduction would go below zero
/// * `Error::ConcurrencyConflict` - the account changed since it was read
pub async fn apply_adjustment<C>(conn: &C, adjustment: &Adjustment) -> Result<PointsLogModel>
where
    C: ConnectionTrait,
{
    adjustment.validate()?;

    let account = require_account(conn, &adjustment.user_id).await?;
    apply_to_account(conn, &account, adjustment).await
}

/// Moves the balance of `account` as read by the caller and appends the entry.
/// The update only lands while the stored version still matches `account`.
async fn apply_to_account<C>(
    conn: &C,
    account: &AccountModel,
    adjustment: &Adjustment,
) -> Result<PointsLogModel>
where
    C: ConnectionTrait,
{
    let new_balance = account
        .current_points
        .checked_add(adjustment.points)
        .ok_or(Error::InvalidAmount {
            amount: adjustment.points,
        })?;

    if adjustment.points < 0 && new_balance < 0 {
        return Err(Error::InsufficientPoints {
            current: account.current_points,
            required: -adjustment.points,
        });
    }

    let lifetime_gain = if adjustment.points > 0 && adjustment.source.is_earning() {
        adjustment.points
    } else {
        0
    };

    // current_points = current_points + delta, only if nobody else moved the balance
    let updated = Account::update_many()
        .col_expr(
            account::Column::CurrentPoints,
            Expr::col(account::Column::CurrentPoints).add(adjustment.points),
        )
        .col_expr(
            account::Column::TotalPoints,
            Expr::col(account::Column::TotalPoints).add(lifetime_gain),
        )
        .col_expr(
            account::Column::Version,
            Expr::col(account::Column::Version).add(1),
        )
        .filter(account::Column::UserId.eq(adjustment.user_id.as_str()))
        .filter(account::Column::Version.eq(account.version))
        .exec(conn)
        .await?;

    if updated.rows_affected == 0 {
        return Err(Error::ConcurrencyConflict {
            resource: format!("account {}", adjustment.user_id),
        });
    }

    let admin = adjustment.source.admin_action();
    let entry = points_log::ActiveModel {
        user_id: Set(adjustment.user_id.clone()),
        change_type: Set(adjustment.change_type()),
        points: Set(adjustment.points.abs()),
        source: Set(adjustment.source.kind()),
        description: Set(adjustment.description.clone()),
        related_id: Set(adjustment.related_id.clone()),
        balance_after: Set(new_balance),
        admin_operator_id: Set(admin.map(|a| a.operator_id.clone())),
        admin_reason: Set(admin.map(|a| a.reason.clone())),
        admin_approval_status: Set(admin.map(|a| a.approval_status)),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    debug!(
        "Ledger entry {} for {}: {:?} {} ({:?}), balance {} -> {}",
        entry.id,
        entry.user_id,
        entry.change_type,
        entry.points,
        entry.source,
        account.current_points,
        new_balance
    );

    Ok(entry)
}

/// Adds carbon saved by a completed trip to the account's running total.
///
/// Returns the total before and after the change.
pub async fn add_carbon_saved<C>(conn: &C, user_id: &str, grams: f64) -> Result<(f64, f64)>
where
    C: ConnectionTrait,
{
    let account = require_account(conn, user_id).await?;
    if grams <= 0.0 {
        return Ok((account.total_carbon, account.total_carbon));
    }

    Account::update_many()
        .col_expr(
            account::Column::TotalCarbon,
            Expr::col(account::Column::TotalCarbon).add(grams),
        )
        .filter(account::Column::UserId.eq(user_id))
        .exec(conn)
        .await?;

    let after = require_account(conn, user_id).await?.total_carbon;
    Ok((account.total_carbon, after))
}

/// Runs `op` again while it fails with [`Error::ConcurrencyConflict`], at most
/// `max_retries` extra times. A conflict that survives every retry is reported as
/// `Error::System`.
pub async fn retry_on_conflict<T, F, Fut>(max_retries: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(Error::ConcurrencyConflict { resource }) => {
                if attempt >= max_retries {
                    return Err(Error::System {
                        message: format!(
                            "conflicting updates on {resource} persisted after {max_retries} retries"
                        ),
                    });
                }
                attempt += 1;
                warn!(
                    "Concurrent update on {}, retrying ({}/{})",
                    resource, attempt, max_retries
                );
                tokio::task::yield_now().await;
            }
            other => return other,
        }
    }
}

/// Applies an adjustment in its own transaction and returns the new ledger entry.
///
/// The balance update and the entry append commit together or not at all.
/// Conflicting concurrent changes to the same account are retried up to
/// `max_conflict_retries` times.
#[instrument(skip(db, adjustment), fields(user_id = %adjustment.user_id, points = adjustment.points))]
pub async fn adjust_points(
    db: &DatabaseConnection,
    adjustment: &Adjustment,
    max_conflict_retries: u32,
) -> Result<PointsLogModel> {
    adjustment.validate()?;

    let entry = retry_on_conflict(max_conflict_retries, move || async move {
        let txn = db.begin().await?;
        let entry = apply_adjustment(&txn, adjustment).await?;
        txn.commit().await?;
        Ok::<_, Error>(entry)
    })
    .await?;

    info!(
        "Adjusted {} by {} points ({:?}), balance now {}",
        entry.user_id, adjustment.points, entry.source, entry.balance_after
    );
    Ok(entry)
}

/// Spends `points` on an order. Always a deduction, whatever the sign of `points`.
pub async fn redeem_points(
    db: &DatabaseConnection,
    user_id: &str,
    order_id: &str,
    points: i64,
    max_conflict_retries: u32,
) -> Result<PointsLogModel> {
    let adjustment = Adjustment::new(
        user_id,
        -points.saturating_abs(),
        AdjustmentSource::Redeem,
        format!("Redemption for order: {order_id}"),
    )
    .related_to(order_id);
    adjust_points(db, &adjustment, max_conflict_retries).await
}

/// Spendable and lifetime points of `user_id`.
pub async fn get_current_points(db: &DatabaseConnection, user_id: &str) -> Result<CurrentPoints> {
    require_account(db, user_id).await.map(Into::into)
}

/// Balances of every account, ordered by user id.
pub async fn get_all_user_points(db: &DatabaseConnection) -> Result<Vec<CurrentPoints>> {
    Ok(Account::find()
        .order_by_asc(account::Column::UserId)
        .all(db)
        .await?
        .into_iter()
        .map(Into::into)
        .collect())
}

/// Ledger entries of `user_id`, newest first.
pub async fn get_points_history(
    db: &DatabaseConnection,
    user_id: &str,
) -> Result<Vec<PointsLogModel>> {
    PointsLog::find()
        .filter(points_log::Column::UserId.eq(user_id))
        .order_by_desc(points_log::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Every ledger entry, newest first.
pub async fn get_all_points_history(db: &DatabaseConnection) -> Result<Vec<PointsLogModel>> {
    PointsLog::find()
        .order_by_desc(points_log::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Trip settlement totals for one user, or for everyone when `user_id` is `None`.
pub async fn get_trip_stats(db: &DatabaseConnection, user_id: Option<&str>) -> Result<TripStats> {
    let mut query = PointsLog::find()
        .filter(points_log::Column::Source.eq(PointsSource::Trip))
        .filter(points_log::Column::ChangeType.eq(ChangeType::Gain));
    if let Some(user_id) = user_id {
        query = query.filter(points_log::Column::UserId.eq(user_id));
    }

    let entries = query.all(db).await?;
    Ok(TripStats {
        total_trips: entries.len() as u64,
        total_points: entries.iter().map(|e| e.points).sum(),
    })
}

/// Replays the ledger of `user_id` in creation order and compares it with the
/// stored balance.
pub async fn audit_account(db: &DatabaseConnection, user_id: &str) -> Result<LedgerAudit> {
    let account = require_account(db, user_id).await?;
    let entries = PointsLog::find()
        .filter(points_log::Column::UserId.eq(user_id))
        .order_by_asc(points_log::Column::Id)
        .all(db)
        .await?;

    let mut balance = 0_i64;
    let mut first_inconsistent_entry = None;
    for entry in &entries {
        balance += entry.signed_delta();
        if first_inconsistent_entry.is_none() && entry.balance_after != balance {
            first_inconsistent_entry = Some(entry.id);
        }
    }

    Ok(LedgerAudit {
        user_id: user_id.to_string(),
        entries: entries.len(),
        replayed_balance: balance,
        current_points: account.current_points,
        first_inconsistent_entry,
    })
}
