//! Leaderboard reward distribution.
//!
//! Pays out the top of each daily and monthly leaderboard exactly once per
//! period. A run first claims the period by inserting its `leaderboard_reward_runs`
//! row; the unique `(reward_type, period_key)` index turns that insert into the
//! lock, so a second run for the same period stops before touching any balance.
//!
//! Each winner is credited in its own transaction together with its
//! `leaderboard_rewards` record. A failed credit is logged and skipped and does
//! not undo the credits already made; the run is still marked completed.
//!
//! A run that dies mid-period leaves its claim `running`. Once the claim is
//! older than `stale_run_minutes` the next run takes it over and pays only the
//! winners that have no reward record yet.

use crate::{
    config::settings::RewardSettings,
    core::{
        leaderboard::{LeaderboardEntry, get_rewards_for_period, get_top_users},
        ledger::{self, Adjustment, AdjustmentSource},
        period::Period,
    },
    entities::{
        LeaderboardRewardModel, RewardRun, RewardRunModel, RewardType, RunStatus,
        leaderboard_reward, reward_run,
    },
    errors::{Error, Result},
};
use chrono::{DateTime, TimeDelta, Utc};
use sea_orm::{Set, SqlErr, TransactionTrait, prelude::*};
use tracing::{error, info, instrument, warn};

/// A ranked user who could not be credited
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedUser {
    /// Rank on the board
    pub rank: u64,
    /// The user
    pub user_id: String,
    /// Why the credit failed
    pub reason: String,
}

/// What one distribution run did
#[derive(Debug, Clone)]
pub struct DistributionReport {
    /// Leaderboard cadence
    pub reward_type: RewardType,
    /// Distributed period
    pub period_key: String,
    /// Rewards of the period, best rank first, including any paid by an
    /// interrupted earlier run
    pub rewarded: Vec<LeaderboardRewardModel>,
    /// Users whose credit failed
    pub skipped: Vec<SkippedUser>,
}

impl DistributionReport {
    /// Total points paid out by the run.
    #[must_use]
    pub fn total_points(&self) -> i64 {
        self.rewarded.iter().map(|r| r.points_awarded).sum()
    }
}

/// Result of asking for a period to be distributed
#[derive(Debug, Clone)]
pub enum DistributionOutcome {
    /// This call distributed the period
    Distributed(DistributionReport),
    /// Another run already claimed the period; nothing was changed
    AlreadyDistributed {
        /// Leaderboard cadence
        reward_type: RewardType,
        /// The claimed period
        period_key: String,
    },
}

/// Points for finishing at `rank` (1-based) on a board paying the top `top_n`:
/// `(top_n + 1 - rank) * multiplier`, or zero outside the paid ranks.
#[must_use]
pub fn reward_points(rank: u64, top_n: u64, multiplier: i64) -> i64 {
    if rank == 0 || rank > top_n {
        return 0;
    }
    i64::try_from(top_n + 1 - rank)
        .unwrap_or(i64::MAX)
        .saturating_mul(multiplier)
}

/// Multiplier configured for a cadence.
#[must_use]
pub const fn multiplier_for(settings: &RewardSettings, reward_type: RewardType) -> i64 {
    match reward_type {
        RewardType::Daily => settings.daily_multiplier,
        RewardType::Monthly => settings.monthly_multiplier,
    }
}

/// Rewards yesterday's daily leaderboard (UTC, relative to `now`).
pub async fn distribute_daily_rewards(
    db: &DatabaseConnection,
    settings: &RewardSettings,
    max_conflict_retries: u32,
    now: DateTime<Utc>,
) -> Result<DistributionOutcome> {
    distribute_previous_period(db, settings, max_conflict_retries, RewardType::Daily, now).await
}

/// Rewards last month's leaderboard (UTC, relative to `now`).
pub async fn distribute_monthly_rewards(
    db: &DatabaseConnection,
    settings: &RewardSettings,
    max_conflict_retries: u32,
    now: DateTime<Utc>,
) -> Result<DistributionOutcome> {
    distribute_previous_period(db, settings, max_conflict_retries, RewardType::Monthly, now).await
}

/// Rewards the period of `reward_type` that ended most recently before `now`.
pub async fn distribute_previous_period(
    db: &DatabaseConnection,
    settings: &RewardSettings,
    max_conflict_retries: u32,
    reward_type: RewardType,
    now: DateTime<Utc>,
) -> Result<DistributionOutcome> {
    let period = Period::previous(reward_type, now)?;
    distribute_rewards(db, settings, max_conflict_retries, &period).await
}

/// Distributes the rewards of one period, at most once.
///
/// # Returns
/// * `DistributionOutcome::Distributed` - this call claimed and paid the period
/// * `DistributionOutcome::AlreadyDistributed` - the period was claimed earlier
///
/// # Errors
/// Fails only when the period cannot be claimed or ranked. A failure to rank
/// releases the claim so a later run can retry.
#[instrument(skip(db, settings), fields(reward_type = %period.reward_type, period_key = %period.key))]
pub async fn distribute_rewards(
    db: &DatabaseConnection,
    settings: &RewardSettings,
    max_conflict_retries: u32,
    period: &Period,
) -> Result<DistributionOutcome> {
    let stale_after = TimeDelta::minutes(i64::from(settings.stale_run_minutes));
    let run = match acquire_guard(db, period, stale_after).await {
        Ok(run) => run,
        Err(Error::AlreadyDistributed {
            reward_type: _,
            period_key,
        }) => {
            info!("Rewards for {} {} already distributed", period.reward_type, period_key);
            return Ok(DistributionOutcome::AlreadyDistributed {
                reward_type: period.reward_type,
                period_key,
            });
        }
        Err(e) => return Err(e),
    };

    let (ranked, already_paid) = match rank_unpaid(db, period, settings.top_n).await {
        Ok(board) => board,
        Err(e) => {
            if let Err(release_err) = release_guard(db, run.id).await {
                error!(
                    "Failed to release reward guard {} for {} {}: {}",
                    run.id, period.reward_type, period.key, release_err
                );
            }
            return Err(e);
        }
    };

    let multiplier = multiplier_for(settings, period.reward_type);
    let mut rewarded = Vec::new();
    let mut skipped = Vec::new();

    for (index, entry) in ranked.iter().enumerate() {
        let rank = index as u64 + 1;
        if let Some(record) = already_paid.iter().find(|r| r.user_id == entry.user_id) {
            rewarded.push(record.clone());
            continue;
        }
        let points = reward_points(rank, settings.top_n, multiplier);
        if points <= 0 {
            continue;
        }

        match credit_winner(db, period, rank, entry, points, max_conflict_retries).await {
            Ok(record) => rewarded.push(record),
            Err(e) => {
                warn!(
                    "Skipping {} reward for {} (rank {}): {}",
                    period.key, entry.user_id, rank, e
                );
                skipped.push(SkippedUser {
                    rank,
                    user_id: entry.user_id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    finish_guard(db, run.id, rewarded.len(), skipped.len()).await?;

    let report = DistributionReport {
        reward_type: period.reward_type,
        period_key: period.key.clone(),
        rewarded,
        skipped,
    };
    info!(
        "Distributed {} {} rewards: {} users, {} points, {} skipped",
        report.reward_type,
        report.period_key,
        report.rewarded.len(),
        report.total_points(),
        report.skipped.len()
    );
    Ok(DistributionOutcome::Distributed(report))
}

/// The guard row of a period, if a run ever claimed it.
pub async fn get_reward_run(
    db: &DatabaseConnection,
    reward_type: RewardType,
    period_key: &str,
) -> Result<Option<RewardRunModel>> {
    RewardRun::find()
        .filter(reward_run::Column::RewardType.eq(reward_type))
        .filter(reward_run::Column::PeriodKey.eq(period_key))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Ranks the period and loads the rewards an earlier, interrupted run already paid.
async fn rank_unpaid(
    db: &DatabaseConnection,
    period: &Period,
    top_n: u64,
) -> Result<(Vec<LeaderboardEntry>, Vec<LeaderboardRewardModel>)> {
    let ranked = get_top_users(db, period.start, period.end, top_n).await?;
    let paid = get_rewards_for_period(db, period.reward_type, &period.key).await?;
    Ok((ranked, paid))
}

/// Claims a period by inserting its guard row, or by taking over a claim left
/// `running` for longer than `stale_after`.
///
/// # Errors
/// Returns `Error::AlreadyDistributed` when the period was claimed before and
/// that claim is completed or still fresh.
async fn acquire_guard(
    db: &DatabaseConnection,
    period: &Period,
    stale_after: TimeDelta,
) -> Result<RewardRunModel> {
    let run = reward_run::ActiveModel {
        reward_type: Set(period.reward_type),
        period_key: Set(period.key.clone()),
        status: Set(RunStatus::Running),
        rewarded_count: Set(0),
        skipped_count: Set(0),
        started_at: Set(Utc::now()),
        finished_at: Set(None),
        ..Default::default()
    };

    match run.insert(db).await {
        Ok(model) => Ok(model),
        Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
            match take_over_stale_guard(db, period, stale_after).await? {
                Some(run) => Ok(run),
                None => Err(Error::AlreadyDistributed {
                    reward_type: period.reward_type.to_string(),
                    period_key: period.key.clone(),
                }),
            }
        }
        Err(e) => Err(e.into()),
    }
}

/// Restarts the clock on a `running` claim older than `stale_after`.
/// Only one caller can win the takeover.
async fn take_over_stale_guard(
    db: &DatabaseConnection,
    period: &Period,
    stale_after: TimeDelta,
) -> Result<Option<RewardRunModel>> {
    let Some(existing) = get_reward_run(db, period.reward_type, &period.key).await? else {
        return Ok(None);
    };
    let now = Utc::now();
    let cutoff = now - stale_after;
    if existing.status != RunStatus::Running || existing.started_at >= cutoff {
        return Ok(None);
    }

    let claimed = RewardRun::update_many()
        .set(reward_run::ActiveModel {
            started_at: Set(now),
            ..Default::default()
        })
        .filter(reward_run::Column::Id.eq(existing.id))
        .filter(reward_run::Column::Status.eq(RunStatus::Running))
        .filter(reward_run::Column::StartedAt.lt(cutoff))
        .exec(db)
        .await?;
    if claimed.rows_affected == 0 {
        return Ok(None);
    }

    warn!(
        "Taking over {} {} reward run {} left running since {}",
        period.reward_type, period.key, existing.id, existing.started_at
    );
    Ok(Some(RewardRunModel {
        started_at: now,
        ..existing
    }))
}

async fn release_guard(db: &DatabaseConnection, run_id: i64) -> Result<()> {
    RewardRun::delete_by_id(run_id).exec(db).await?;
    Ok(())
}

async fn finish_guard(
    db: &DatabaseConnection,
    run_id: i64,
    rewarded: usize,
    skipped: usize,
) -> Result<()> {
    let finished = reward_run::ActiveModel {
        status: Set(RunStatus::Completed),
        rewarded_count: Set(i32::try_from(rewarded).unwrap_or(i32::MAX)),
        skipped_count: Set(i32::try_from(skipped).unwrap_or(i32::MAX)),
        finished_at: Set(Some(Utc::now())),
        ..Default::default()
    };
    RewardRun::update_many()
        .set(finished)
        .filter(reward_run::Column::Id.eq(run_id))
        .exec(db)
        .await?;
    Ok(())
}

/// Credits one winner and records the reward in a single transaction.
async fn credit_winner(
    db: &DatabaseConnection,
    period: &Period,
    rank: u64,
    entry: &LeaderboardEntry,
    points: i64,
    max_conflict_retries: u32,
) -> Result<LeaderboardRewardModel> {
    let adjustment = Adjustment::new(
        entry.user_id.as_str(),
        points,
        AdjustmentSource::Leaderboard,
        format!(
            "Leaderboard {} Rank #{} reward ({})",
            period.reward_type, rank, period.key
        ),
    )
    .related_to(period.key.as_str());
    let adjustment = &adjustment;

    ledger::retry_on_conflict(max_conflict_retries, move || async move {
        let txn = db.begin().await?;
        ledger::apply_adjustment(&txn, adjustment).await?;

        let record = leaderboard_reward::ActiveModel {
            reward_type: Set(period.reward_type),
            period_key: Set(period.key.clone()),
            user_id: Set(entry.user_id.clone()),
            rank: Set(i32::try_from(rank).unwrap_or(i32::MAX)),
            points_awarded: Set(points),
            carbon_saved: Set(entry.total_carbon_saved),
            distributed_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        Ok::<_, Error>(record)
    })
    .await
}
