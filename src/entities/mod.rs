//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod account;
pub mod leaderboard_reward;
pub mod points_log;
pub mod reward_run;
pub mod trip;

// Re-export specific types to avoid conflicts
pub use account::{Column as AccountColumn, Entity as Account, Model as AccountModel};
pub use leaderboard_reward::{
    Column as LeaderboardRewardColumn, Entity as LeaderboardReward,
    Model as LeaderboardRewardModel, RewardType,
};
pub use points_log::{
    ApprovalStatus, ChangeType, Column as PointsLogColumn, Entity as PointsLog,
    Model as PointsLogModel, PointsSource,
};
pub use reward_run::{Column as RewardRunColumn, Entity as RewardRun, Model as RewardRunModel, RunStatus};
pub use trip::{Column as TripColumn, Entity as Trip, Model as TripModel, TripStatus};
