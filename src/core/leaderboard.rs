//! Leaderboard aggregation business logic.
//!
//! Rankings are built from settled green trips only: a trip counts when it is
//! `completed`, flagged `is_green_trip`, and started inside the period window.
//! Ordering is fully deterministic: total carbon saved descending, ties broken
//! by ascending user id.

use crate::{
    core::period::Period,
    entities::{
        Account, LeaderboardReward, LeaderboardRewardModel, RewardType, Trip, TripStatus,
        account, leaderboard_reward, trip,
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{FromQueryResult, QueryOrder, QuerySelect, prelude::*};
use serde::Serialize;
use std::collections::HashMap;

/// One user's aggregate for a window
#[derive(Debug, Clone, PartialEq, FromQueryResult, Serialize)]
pub struct LeaderboardEntry {
    /// Ranked user
    pub user_id: String,
    /// Sum of carbon saved by the user's settled green trips, in grams
    pub total_carbon_saved: f64,
}

/// One row of a rankings page
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedUser {
    /// 1-based position on the full board
    pub rank: u64,
    /// Ranked user
    pub user_id: String,
    /// Display name, when the user still has an account
    pub nickname: Option<String>,
    /// Carbon saved in the period, in grams
    pub total_carbon_saved: f64,
    /// Points already paid out for this rank, if the period was distributed
    pub points_awarded: Option<i64>,
}

/// A page of the leaderboard for one period
#[derive(Debug, Clone, Serialize)]
pub struct RankingsPage {
    /// Leaderboard cadence
    pub reward_type: RewardType,
    /// Period shown
    pub period_key: String,
    /// 1-based page number
    pub page: u64,
    /// Requested page size
    pub size: u64,
    /// Number of ranked users in the period
    pub total_users: u64,
    /// Carbon saved by all ranked users together, in grams
    pub total_carbon_saved: f64,
    /// Rewards already paid out for the period
    pub rewards_distributed: u64,
    /// The rows of this page
    pub rankings: Vec<RankedUser>,
}

/// Aggregates carbon saved per user over `[start, end)` and returns the best
/// `limit` users. A `limit` of zero returns every ranked user.
///
/// # Arguments
/// * `db` - Database connection or transaction
/// * `start` - Inclusive start of the window
/// * `end` - Exclusive end of the window
/// * `limit` - Maximum number of users to return
pub async fn get_top_users<C>(
    db: &C,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    limit: u64,
) -> Result<Vec<LeaderboardEntry>>
where
    C: ConnectionTrait,
{
    let mut entries = Trip::find()
        .select_only()
        .column(trip::Column::UserId)
        .column_as(trip::Column::CarbonSaved.sum(), "total_carbon_saved")
        .filter(trip::Column::CarbonStatus.eq(TripStatus::Completed))
        .filter(trip::Column::IsGreenTrip.eq(true))
        .filter(trip::Column::StartTime.gte(start))
        .filter(trip::Column::StartTime.lt(end))
        .group_by(trip::Column::UserId)
        .into_model::<LeaderboardEntry>()
        .all(db)
        .await?;

    sort_entries(&mut entries);
    if limit > 0 {
        entries.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
    }
    Ok(entries)
}

/// Sorts by carbon saved descending, then user id ascending.
pub fn sort_entries(entries: &mut [LeaderboardEntry]) {
    entries.sort_by(|a, b| {
        b.total_carbon_saved
            .total_cmp(&a.total_carbon_saved)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
}

/// Returns one page of the leaderboard of a period.
///
/// # Arguments
/// * `db` - Database connection
/// * `reward_type` - Daily or monthly board
/// * `period_key` - `YYYY-MM-DD` or `YYYY-MM`, matching `reward_type`
/// * `page` - 1-based page number
/// * `size` - Rows per page
///
/// # Errors
/// Returns `Error::InvalidInput` for a zero page or size, or a malformed key.
pub async fn get_rankings(
    db: &DatabaseConnection,
    reward_type: RewardType,
    period_key: &str,
    page: u64,
    size: u64,
) -> Result<RankingsPage> {
    if page == 0 || size == 0 {
        return Err(Error::InvalidInput {
            message: format!("page and size must be at least 1, got page {page} size {size}"),
        });
    }
    let period = Period::parse(reward_type, period_key)?;

    let board = get_top_users(db, period.start, period.end, 0).await?;
    let rewards = get_rewards_for_period(db, reward_type, &period.key).await?;
    let awarded: HashMap<&str, i64> = rewards
        .iter()
        .map(|r| (r.user_id.as_str(), r.points_awarded))
        .collect();

    let total_users = board.len() as u64;
    let total_carbon_saved = board.iter().map(|e| e.total_carbon_saved).sum();

    let offset = usize::try_from((page - 1).saturating_mul(size)).unwrap_or(usize::MAX);
    let take = usize::try_from(size).unwrap_or(usize::MAX);
    let window: Vec<(u64, &LeaderboardEntry)> = board
        .iter()
        .enumerate()
        .skip(offset)
        .take(take)
        .map(|(i, e)| (i as u64 + 1, e))
        .collect();

    let user_ids: Vec<&str> = window.iter().map(|(_, e)| e.user_id.as_str()).collect();
    let nicknames: HashMap<String, String> = if user_ids.is_empty() {
        HashMap::new()
    } else {
        Account::find()
            .filter(account::Column::UserId.is_in(user_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|a| (a.user_id, a.nickname))
            .collect()
    };

    let rankings = window
        .into_iter()
        .map(|(rank, entry)| RankedUser {
            rank,
            user_id: entry.user_id.clone(),
            nickname: nicknames.get(&entry.user_id).cloned(),
            total_carbon_saved: entry.total_carbon_saved,
            points_awarded: awarded.get(entry.user_id.as_str()).copied(),
        })
        .collect();

    Ok(RankingsPage {
        reward_type,
        period_key: period.key,
        page,
        size,
        total_users,
        total_carbon_saved,
        rewards_distributed: rewards.len() as u64,
        rankings,
    })
}

/// Rewards paid out for a period, best rank first.
pub async fn get_rewards_for_period<C>(
    db: &C,
    reward_type: RewardType,
    period_key: &str,
) -> Result<Vec<LeaderboardRewardModel>>
where
    C: ConnectionTrait,
{
    LeaderboardReward::find()
        .filter(leaderboard_reward::Column::RewardType.eq(reward_type))
        .filter(leaderboard_reward::Column::PeriodKey.eq(period_key))
        .order_by_asc(leaderboard_reward::Column::Rank)
        .all(db)
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::test_utils::*;
    use chrono::TimeZone;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_rankings_validation() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();

        let result = get_rankings(&db, RewardType::Daily, "2024-03-10", 0, 10).await;
        assert!(matches!(result, Err(Error::InvalidInput { .. })));

        let result = get_rankings(&db, RewardType::Daily, "2024-03-10", 1, 0).await;
        assert!(matches!(result, Err(Error::InvalidInput { .. })));

        let result = get_rankings(&db, RewardType::Monthly, "2024-13", 1, 10).await;
        assert!(matches!(result, Err(Error::InvalidInput { .. })));
    }

    #[test]
    fn test_sort_breaks_ties_by_user_id() {
        let mut entries = vec![
            LeaderboardEntry {
                user_id: "carol".to_string(),
                total_carbon_saved: 50.0,
            },
            LeaderboardEntry {
                user_id: "bob".to_string(),
                total_carbon_saved: 80.0,
            },
            LeaderboardEntry {
                user_id: "alice".to_string(),
                total_carbon_saved: 50.0,
            },
        ];
        sort_entries(&mut entries);
        let ids: Vec<_> = entries.iter().map(|e| e.user_id.as_str()).collect();
        assert_eq!(ids, vec!["bob", "alice", "carol"]);
    }

    #[tokio::test]
    async fn test_top_users_sums_settled_green_trips() -> Result<()> {
        let db = setup_test_db().await?;
        insert_trip(&db, "alice", TripStatus::Completed, true, 100.0, at(10, 8)).await?;
        insert_trip(&db, "alice", TripStatus::Completed, true, 50.0, at(10, 18)).await?;
        insert_trip(&db, "bob", TripStatus::Completed, true, 120.0, at(10, 9)).await?;
        // Not counted: not green, canceled, still tracking
        insert_trip(&db, "bob", TripStatus::Completed, false, 500.0, at(10, 10)).await?;
        insert_trip(&db, "carol", TripStatus::Canceled, true, 900.0, at(10, 11)).await?;
        insert_trip(&db, "dave", TripStatus::Tracking, true, 900.0, at(10, 12)).await?;

        let top = get_top_users(&db, at(10, 0), at(11, 0), 10).await?;
        assert_eq!(
            top,
            vec![
                LeaderboardEntry {
                    user_id: "alice".to_string(),
                    total_carbon_saved: 150.0,
                },
                LeaderboardEntry {
                    user_id: "bob".to_string(),
                    total_carbon_saved: 120.0,
                },
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_top_users_window_is_half_open() -> Result<()> {
        let db = setup_test_db().await?;
        insert_trip(&db, "alice", TripStatus::Completed, true, 10.0, at(10, 0)).await?;
        insert_trip(&db, "bob", TripStatus::Completed, true, 20.0, at(11, 0)).await?;
        insert_trip(&db, "carol", TripStatus::Completed, true, 30.0, at(9, 23)).await?;

        let top = get_top_users(&db, at(10, 0), at(11, 0), 10).await?;
        let ids: Vec<_> = top.iter().map(|e| e.user_id.as_str()).collect();
        assert_eq!(ids, vec!["alice"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_top_users_ties_and_limit() -> Result<()> {
        let db = setup_test_db().await?;
        for user in ["dave", "bob", "carol", "alice"] {
            insert_trip(&db, user, TripStatus::Completed, true, 40.0, at(10, 8)).await?;
        }

        let top = get_top_users(&db, at(10, 0), at(11, 0), 3).await?;
        let ids: Vec<_> = top.iter().map(|e| e.user_id.as_str()).collect();
        assert_eq!(ids, vec!["alice", "bob", "carol"]);

        let all = get_top_users(&db, at(10, 0), at(11, 0), 0).await?;
        assert_eq!(all.len(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_top_users_empty_window() -> Result<()> {
        let db = setup_test_db().await?;
        let top = get_top_users(&db, at(10, 0), at(11, 0), 10).await?;
        assert!(top.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_rankings_page() -> Result<()> {
        let db = setup_test_db().await?;
        setup_account(&db, "alice").await?;
        setup_account(&db, "bob").await?;
        insert_trip(&db, "alice", TripStatus::Completed, true, 300.0, at(10, 8)).await?;
        insert_trip(&db, "bob", TripStatus::Completed, true, 200.0, at(10, 8)).await?;
        // No account any more
        insert_trip(&db, "carol", TripStatus::Completed, true, 100.0, at(10, 8)).await?;

        let page = get_rankings(&db, RewardType::Daily, "2024-03-10", 1, 2).await?;
        assert_eq!(page.total_users, 3);
        assert_eq!(page.total_carbon_saved, 600.0);
        assert_eq!(page.rewards_distributed, 0);
        assert_eq!(page.rankings.len(), 2);
        assert_eq!(page.rankings[0].rank, 1);
        assert_eq!(page.rankings[0].nickname.as_deref(), Some("alice"));
        assert!(page.rankings[0].points_awarded.is_none());

        let page = get_rankings(&db, RewardType::Daily, "2024-03-10", 2, 2).await?;
        assert_eq!(page.rankings.len(), 1);
        assert_eq!(page.rankings[0].rank, 3);
        assert_eq!(page.rankings[0].user_id, "carol");
        assert!(page.rankings[0].nickname.is_none());

        let page = get_rankings(&db, RewardType::Daily, "2024-03-10", 3, 2).await?;
        assert!(page.rankings.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_monthly_rankings_cover_whole_month() -> Result<()> {
        let db = setup_test_db().await?;
        insert_trip(&db, "alice", TripStatus::Completed, true, 10.0, at(1, 0)).await?;
        insert_trip(&db, "alice", TripStatus::Completed, true, 10.0, at(31, 23)).await?;
        insert_trip(
            &db,
            "alice",
            TripStatus::Completed,
            true,
            10.0,
            Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
        )
        .await?;

        let page = get_rankings(&db, RewardType::Monthly, "2024-03", 1, 10).await?;
        assert_eq!(page.rankings.len(), 1);
        assert_eq!(page.rankings[0].total_carbon_saved, 20.0);
        Ok(())
    }
}
