//! Database configuration module.
//!
//! Handles the `SQLite` connection and table creation using `SeaORM`. Tables are
//! generated from the entity definitions with `Schema::create_table_from_entity`,
//! so the schema always matches the Rust structs. Composite indexes that the
//! entity attributes cannot express (including the uniqueness constraints the
//! reward distributor relies on) are created explicitly.

use crate::entities::{
    Account, LeaderboardReward, LeaderboardRewardColumn, PointsLog, PointsLogColumn, RewardRun,
    RewardRunColumn, Trip, TripColumn,
};
use crate::errors::Result;
use sea_orm::sea_query::{Index, IndexCreateStatement};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema};
use tracing::debug;

const DEFAULT_DATABASE_URL: &str = "sqlite://data/ecopoints.sqlite?mode=rwc";

/// Gets the database URL from the `DATABASE_URL` environment variable or returns
/// the default `SQLite` path.
#[must_use]
pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

/// Establishes a connection to the database named by `DATABASE_URL`.
///
/// Falls back to a local `SQLite` file if no environment variable is set.
pub async fn create_connection() -> Result<DatabaseConnection> {
    let database_url = get_database_url();
    ensure_sqlite_dir(&database_url)?;
    debug!("Connecting to {}", database_url);
    Database::connect(&database_url).await.map_err(Into::into)
}

/// Creates the parent directory of a file-backed `SQLite` URL.
fn ensure_sqlite_dir(database_url: &str) -> Result<()> {
    let Some(rest) = database_url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    let path = rest.split('?').next().unwrap_or_default();
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Creates all tables and indexes if they do not exist yet.
///
/// Safe to call on every start-up.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    create_entity_table(db, &schema, Account).await?;
    create_entity_table(db, &schema, Trip).await?;
    create_entity_table(db, &schema, PointsLog).await?;
    create_entity_table(db, &schema, LeaderboardReward).await?;
    create_entity_table(db, &schema, RewardRun).await?;

    for index in composite_indexes() {
        db.execute(builder.build(&index)).await?;
    }

    Ok(())
}

async fn create_entity_table<E>(db: &DatabaseConnection, schema: &Schema, entity: E) -> Result<()>
where
    E: EntityTrait,
{
    let builder = db.get_database_backend();
    let table = schema.create_table_from_entity(entity).if_not_exists().to_owned();
    db.execute(builder.build(&table)).await?;

    // Single-column indexes declared with #[sea_orm(indexed)]
    for mut index in schema.create_index_from_entity(E::default()) {
        index.if_not_exists();
        db.execute(builder.build(&index)).await?;
    }
    Ok(())
}

fn composite_indexes() -> Vec<IndexCreateStatement> {
    vec![
        // One guard row per distribution run
        Index::create()
            .name("uq_reward_runs_type_period")
            .table(RewardRun)
            .col(RewardRunColumn::RewardType)
            .col(RewardRunColumn::PeriodKey)
            .unique()
            .if_not_exists()
            .to_owned(),
        // One payout per user per run
        Index::create()
            .name("uq_leaderboard_rewards_type_period_user")
            .table(LeaderboardReward)
            .col(LeaderboardRewardColumn::RewardType)
            .col(LeaderboardRewardColumn::PeriodKey)
            .col(LeaderboardRewardColumn::UserId)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_points_logs_user_created")
            .table(PointsLog)
            .col(PointsLogColumn::UserId)
            .col(PointsLogColumn::CreatedAt)
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_trips_status_start")
            .table(Trip)
            .col(TripColumn::CarbonStatus)
            .col(TripColumn::StartTime)
            .if_not_exists()
            .to_owned(),
    ]
}
