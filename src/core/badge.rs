//! Carbon achievement badges.
//!
//! Badge storage and display live outside this crate. The core only decides,
//! after a trip completes, which achievement thresholds the user's cumulative
//! carbon total has just crossed, and hands them to a [`BadgeUnlocker`].

use crate::{config::settings::BadgeConfig, errors::Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// A badge unlocked by a trip completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlockedBadge {
    /// Stable badge identifier
    pub badge_id: String,
    /// Display name
    pub name: String,
    /// Carbon total that unlocked it, in grams
    pub carbon_threshold: f64,
}

/// Badge service invoked after every successful trip completion.
pub trait BadgeUnlocker: Send + Sync {
    /// Unlocks every achievement badge whose threshold lies in
    /// `(previous_total, new_total]` and returns them.
    fn check_and_unlock_carbon_badges(
        &self,
        user_id: &str,
        previous_total: f64,
        new_total: f64,
    ) -> Result<Vec<UnlockedBadge>>;
}

/// Unlocker backed by the `[[badges]]` thresholds from configuration.
#[derive(Debug, Clone, Default)]
pub struct CarbonThresholdBadges {
    badges: Vec<BadgeConfig>,
}

impl CarbonThresholdBadges {
    /// Builds the unlocker; badges are kept in ascending threshold order.
    #[must_use]
    pub fn new(badges: &[BadgeConfig]) -> Self {
        let mut badges = badges.to_vec();
        badges.sort_by(|a, b| a.carbon_threshold.total_cmp(&b.carbon_threshold));
        Self { badges }
    }
}

impl BadgeUnlocker for CarbonThresholdBadges {
    fn check_and_unlock_carbon_badges(
        &self,
        user_id: &str,
        previous_total: f64,
        new_total: f64,
    ) -> Result<Vec<UnlockedBadge>> {
        let unlocked: Vec<UnlockedBadge> = self
            .badges
            .iter()
            .filter(|b| b.carbon_threshold > previous_total && b.carbon_threshold <= new_total)
            .map(|b| UnlockedBadge {
                badge_id: b.badge_id.clone(),
                name: b.name.clone(),
                carbon_threshold: b.carbon_threshold,
            })
            .collect();

        for badge in &unlocked {
            info!(
                "User {} unlocked badge {} ({}g carbon saved)",
                user_id, badge.name, badge.carbon_threshold
            );
        }
        Ok(unlocked)
    }
}
