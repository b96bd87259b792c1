//! Core business logic - framework-agnostic ledger, trip and reward operations.

pub mod badge;
pub mod leaderboard;
pub mod ledger;
pub mod period;
pub mod points;
pub mod rewards;
pub mod trip;
