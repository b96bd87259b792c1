//! Background reward jobs.
//!
//! One task per cadence. The daily job fires at 00:00 UTC plus the configured
//! offset and rewards the previous day; the monthly job fires on the first of
//! each month and rewards the previous month. A task runs its job to the end
//! before computing the next fire time, so a job never overlaps with itself.
//! Repeated runs for a period are harmless: the distributor claims each period
//! once.

use crate::{
    config::settings::RewardSettings,
    core::{
        period::{midnight, Period},
        rewards::{self, DistributionOutcome},
    },
    entities::RewardType,
    errors::{Error, Result},
};
use chrono::{DateTime, Datelike, Months, NaiveDate, TimeDelta, Utc};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{error, info};

/// Handle to the running reward jobs.
pub struct SchedulerHandle {
    cancel: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Signal the jobs to stop after any run in progress.
    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }

    /// Stops the jobs and waits for them to exit.
    pub async fn shutdown(self) {
        self.stop();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Reward job ended abnormally: {}", e);
            }
        }
    }
}

/// Next daily fire time strictly after `now`.
///
/// # Errors
/// Returns `Error::System` when the date is out of chrono's range.
pub fn next_daily_fire(now: DateTime<Utc>, offset_minutes: u32) -> Result<DateTime<Utc>> {
    let offset = TimeDelta::minutes(i64::from(offset_minutes));
    let today = midnight(now.date_naive()) + offset;
    if today > now {
        return Ok(today);
    }
    today
        .checked_add_signed(TimeDelta::days(1))
        .ok_or_else(|| out_of_range(now))
}

/// Next monthly fire time strictly after `now`.
///
/// # Errors
/// Returns `Error::System` when the date is out of chrono's range.
pub fn next_monthly_fire(now: DateTime<Utc>, offset_minutes: u32) -> Result<DateTime<Utc>> {
    let offset = TimeDelta::minutes(i64::from(offset_minutes));
    let first = NaiveDate::from_ymd_opt(now.year(), now.month(), 1).ok_or_else(|| out_of_range(now))?;
    let this_month = midnight(first) + offset;
    if this_month > now {
        return Ok(this_month);
    }
    let next = first
        .checked_add_months(Months::new(1))
        .ok_or_else(|| out_of_range(now))?;
    Ok(midnight(next) + offset)
}

/// Next fire time of the job for `reward_type`.
pub fn next_fire(
    reward_type: RewardType,
    settings: &RewardSettings,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    let offset = offset_minutes(reward_type, settings);
    match reward_type {
        RewardType::Daily => next_daily_fire(now, offset),
        RewardType::Monthly => next_monthly_fire(now, offset),
    }
}

/// Whether the fire time of the period containing `now` has passed.
///
/// Until then the previous period is left to the regular schedule.
pub fn catch_up_due(
    reward_type: RewardType,
    settings: &RewardSettings,
    now: DateTime<Utc>,
) -> Result<bool> {
    let period = Period::current(reward_type, now)?;
    let offset = TimeDelta::minutes(i64::from(offset_minutes(reward_type, settings)));
    Ok(now >= period.start + offset)
}

fn offset_minutes(reward_type: RewardType, settings: &RewardSettings) -> u32 {
    match reward_type {
        RewardType::Daily => settings.daily_offset_minutes,
        RewardType::Monthly => settings.monthly_offset_minutes,
    }
}

/// Spawns the daily and monthly reward jobs.
///
/// With `catch_up` set, each job first distributes its most recently ended
/// period, covering fire times missed while the process was down. The
/// catch-up run is skipped until the current period's fire time has passed;
/// the regular schedule covers it then.
pub fn spawn_reward_jobs(
    db: Arc<DatabaseConnection>,
    settings: RewardSettings,
    max_conflict_retries: u32,
    catch_up: bool,
) -> SchedulerHandle {
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let tasks = [RewardType::Daily, RewardType::Monthly]
        .into_iter()
        .map(|reward_type| {
            let job = RewardJob {
                db: Arc::clone(&db),
                settings: settings.clone(),
                max_conflict_retries,
                reward_type,
            };
            tokio::spawn(job.run(catch_up, cancel_rx.clone()))
        })
        .collect();

    SchedulerHandle {
        cancel: cancel_tx,
        tasks,
    }
}

struct RewardJob {
    db: Arc<DatabaseConnection>,
    settings: RewardSettings,
    max_conflict_retries: u32,
    reward_type: RewardType,
}

impl RewardJob {
    async fn run(self, catch_up: bool, mut cancel_rx: watch::Receiver<bool>) {
        info!("{} reward job started", self.reward_type);

        if catch_up {
            let now = Utc::now();
            match catch_up_due(self.reward_type, &self.settings, now) {
                Ok(true) => self.fire(now).await,
                Ok(false) => info!("{} catch-up run not yet due", self.reward_type),
                Err(e) => error!("{} reward job cannot catch up: {}", self.reward_type, e),
            }
        }

        loop {
            let now = Utc::now();
            let next = match next_fire(self.reward_type, &self.settings, now) {
                Ok(next) => next,
                Err(e) => {
                    error!("{} reward job cannot schedule: {}", self.reward_type, e);
                    break;
                }
            };
            let wait = (next - now).to_std().unwrap_or_default();
            info!("Next {} reward run at {}", self.reward_type, next);

            tokio::select! {
                () = tokio::time::sleep(wait) => {
                    self.fire(Utc::now()).await;
                }
                changed = cancel_rx.changed() => {
                    if changed.is_err() || *cancel_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!("{} reward job stopped", self.reward_type);
    }

    async fn fire(&self, now: DateTime<Utc>) {
        let outcome = rewards::distribute_previous_period(
            &self.db,
            &self.settings,
            self.max_conflict_retries,
            self.reward_type,
            now,
        )
        .await;

        match outcome {
            Ok(DistributionOutcome::Distributed(report)) => info!(
                "{} rewards for {} done: {} rewarded, {} skipped",
                report.reward_type,
                report.period_key,
                report.rewarded.len(),
                report.skipped.len()
            ),
            Ok(DistributionOutcome::AlreadyDistributed {
                reward_type,
                period_key,
            }) => info!("{} rewards for {} were already distributed", reward_type, period_key),
            Err(e) => error!("{} reward run failed: {}", self.reward_type, e),
        }
    }
}

fn out_of_range(now: DateTime<Utc>) -> Error {
    Error::System {
        message: format!("cannot schedule past {now}"),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::rewards::get_reward_run;
    use crate::entities::{RunStatus, TripStatus};
    use crate::test_utils::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_next_daily_fire() {
        assert_eq!(
            next_daily_fire(utc(2024, 3, 10, 0, 0), 5).unwrap(),
            utc(2024, 3, 10, 0, 5)
        );
        assert_eq!(
            next_daily_fire(utc(2024, 3, 10, 0, 5), 5).unwrap(),
            utc(2024, 3, 11, 0, 5)
        );
        assert_eq!(
            next_daily_fire(utc(2024, 12, 31, 13, 0), 5).unwrap(),
            utc(2025, 1, 1, 0, 5)
        );
    }

    #[test]
    fn test_next_monthly_fire() {
        assert_eq!(
            next_monthly_fire(utc(2024, 3, 1, 0, 3), 10).unwrap(),
            utc(2024, 3, 1, 0, 10)
        );
        assert_eq!(
            next_monthly_fire(utc(2024, 3, 1, 0, 10), 10).unwrap(),
            utc(2024, 4, 1, 0, 10)
        );
        assert_eq!(
            next_monthly_fire(utc(2024, 12, 15, 8, 0), 10).unwrap(),
            utc(2025, 1, 1, 0, 10)
        );
    }

    #[test]
    fn test_next_fire_uses_configured_offsets() {
        let settings = RewardSettings {
            daily_offset_minutes: 30,
            monthly_offset_minutes: 90,
            ..RewardSettings::default()
        };
        let now = utc(2024, 2, 29, 12, 0);
        assert_eq!(
            next_fire(RewardType::Daily, &settings, now).unwrap(),
            utc(2024, 3, 1, 0, 30)
        );
        assert_eq!(
            next_fire(RewardType::Monthly, &settings, now).unwrap(),
            utc(2024, 3, 1, 1, 30)
        );
    }

    #[test]
    fn test_catch_up_waits_for_daily_offset() {
        let settings = RewardSettings::default();
        assert!(!catch_up_due(RewardType::Daily, &settings, utc(2024, 3, 10, 0, 1)).unwrap());
        assert!(catch_up_due(RewardType::Daily, &settings, utc(2024, 3, 10, 0, 5)).unwrap());
        assert!(catch_up_due(RewardType::Daily, &settings, utc(2024, 3, 10, 23, 59)).unwrap());
    }

    #[test]
    fn test_catch_up_waits_for_monthly_offset() {
        let settings = RewardSettings::default();
        assert!(!catch_up_due(RewardType::Monthly, &settings, utc(2024, 3, 1, 0, 6)).unwrap());
        assert!(catch_up_due(RewardType::Monthly, &settings, utc(2024, 3, 1, 0, 10)).unwrap());
        assert!(catch_up_due(RewardType::Monthly, &settings, utc(2024, 3, 2, 0, 0)).unwrap());
    }

    #[tokio::test]
    async fn test_catch_up_before_offset_distributes_nothing() -> Result<()> {
        let db = Arc::new(setup_test_db().await?);
        let settings = RewardSettings {
            daily_offset_minutes: 24 * 60,
            ..RewardSettings::default()
        };
        let handle = spawn_reward_jobs(Arc::clone(&db), settings, 3, true);
        handle.shutdown().await;

        let key = Period::previous_day(Utc::now())?.key;
        assert!(get_reward_run(&db, RewardType::Daily, &key).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_catch_up_then_shutdown() -> Result<()> {
        let db = setup_test_db().await?;
        setup_account(&db, "alice").await?;
        let yesterday = Utc::now() - TimeDelta::days(1);
        insert_trip(&db, "alice", TripStatus::Completed, true, 100.0, yesterday).await?;

        let settings = RewardSettings {
            daily_offset_minutes: 0,
            monthly_offset_minutes: 0,
            ..RewardSettings::default()
        };
        let db = Arc::new(db);
        let handle = spawn_reward_jobs(Arc::clone(&db), settings, 3, true);
        handle.shutdown().await;

        let daily_key = yesterday.format("%Y-%m-%d").to_string();
        let run = get_reward_run(&db, RewardType::Daily, &daily_key).await?.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.rewarded_count, 1);

        let monthly = Period::previous_month(Utc::now())?;
        assert!(
            get_reward_run(&db, RewardType::Monthly, &monthly.key)
                .await?
                .is_some()
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_shutdown_without_catch_up() -> Result<()> {
        let db = Arc::new(setup_test_db().await?);
        let handle = spawn_reward_jobs(Arc::clone(&db), RewardSettings::default(), 3, false);
        handle.shutdown().await;

        let key = Period::previous_day(Utc::now())?.key;
        assert!(get_reward_run(&db, RewardType::Daily, &key).await?.is_none());
        Ok(())
    }
}
