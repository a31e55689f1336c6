//! Division table and the leveling engine.
//!
//! Progression is driven by a cumulative `level_unit` score, roughly
//! proportional to cumulative message-text length. The division table maps
//! contiguous level ranges onto tiers with their own per-level unit cost and
//! per-level egg reward; [`predict_level`] and [`predict_division`] are the
//! deterministic, monotonic mappings between the three quantities.

use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::currency::CurrencyLedger;
use crate::profile::ProfileRegistry;
use crate::types::UserId;

// ---------------------------------------------------------------------------
// Division table
// ---------------------------------------------------------------------------

/// A named tier grouping a contiguous range of levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Division {
    /// Levels 0–9.
    Dirt,
    /// Levels 10–29.
    Wood,
    /// Levels 30–49.
    Stone,
    /// Levels 50–74.
    Iron,
    /// Levels 75–99.
    Gold,
    /// Levels 100–199.
    Diamond,
    /// Levels 200–299.
    Legend,
    /// Levels 300 and beyond — the unbounded top tier.
    God,
}

impl Division {
    /// All divisions, lowest first. Ranges are contiguous and
    /// non-overlapping, covering every level from 0 up.
    pub const ALL: [Division; 8] = [
        Division::Dirt,
        Division::Wood,
        Division::Stone,
        Division::Iron,
        Division::Gold,
        Division::Diamond,
        Division::Legend,
        Division::God,
    ];

    /// User-facing tier name.
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Dirt => "Dirt Division",
            Self::Wood => "Wood Division",
            Self::Stone => "Stone Division",
            Self::Iron => "Iron Division",
            Self::Gold => "Gold Division",
            Self::Diamond => "Diamond Division",
            Self::Legend => "Legend Division",
            Self::God => "God Division",
        }
    }

    /// Level-unit cost of one level inside this division.
    #[must_use]
    pub fn unit_cost(self) -> u64 {
        match self {
            Self::Dirt => 400,
            Self::Wood => 1_000,
            Self::Stone => 2_400,
            Self::Iron => 6_000,
            Self::Gold => 18_000,
            Self::Diamond => 60_000,
            Self::Legend => 200_000,
            Self::God => 500_000,
        }
    }

    /// Lowest level of the division.
    #[must_use]
    pub fn min_level(self) -> u32 {
        match self {
            Self::Dirt => 0,
            Self::Wood => 10,
            Self::Stone => 30,
            Self::Iron => 50,
            Self::Gold => 75,
            Self::Diamond => 100,
            Self::Legend => 200,
            Self::God => 300,
        }
    }

    /// Highest level of the division (inclusive).
    #[must_use]
    pub fn max_level(self) -> u32 {
        match self {
            Self::Dirt => 9,
            Self::Wood => 29,
            Self::Stone => 49,
            Self::Iron => 74,
            Self::Gold => 99,
            Self::Diamond => 199,
            Self::Legend => 299,
            Self::God => u32::MAX,
        }
    }

    /// Eggs granted per level gained while in this division.
    #[must_use]
    pub fn reward_eggs(self) -> u64 {
        match self {
            Self::Dirt => 20,
            Self::Wood => 75,
            Self::Stone => 225,
            Self::Iron => 700,
            Self::Gold => 2_200,
            Self::Diamond => 7_000,
            Self::Legend => 40_000,
            Self::God => 100_000,
        }
    }

    /// Total unit cost of the whole division, or `None` for the unbounded
    /// top tier.
    #[must_use]
    pub fn span_cost(self) -> Option<u64> {
        if self.max_level() == u32::MAX {
            return None;
        }
        Some(u64::from(self.max_level() - self.min_level() + 1) * self.unit_cost())
    }
}

/// The division whose inclusive level range contains `level`.
///
/// Total by construction: the top tier is unbounded, so every level
/// matches exactly one division.
#[must_use]
pub fn predict_division(level: u32) -> Division {
    for division in Division::ALL {
        if level >= division.min_level() && level <= division.max_level() {
            return division;
        }
    }
    // The God range ends at u32::MAX; the loop cannot fall through.
    Division::God
}

/// The level reached by an accumulated `level_unit` score.
///
/// Walks the divisions in order, accumulating each division's total unit
/// cost until the running sum reaches `level_unit` (or the unbounded top
/// tier); inside the matched division the remainder buys whole levels at
/// that division's unit cost, counted from the division's minimum level.
/// Monotonic non-decreasing and piecewise linear in `level_unit`.
#[must_use]
pub fn predict_level(level_unit: u64) -> u32 {
    let mut consumed = 0u64;
    for division in Division::ALL {
        let matched = match division.span_cost() {
            Some(cost) if level_unit > consumed + cost => {
                consumed += cost;
                false
            }
            _ => true,
        };
        if matched {
            let remainder = level_unit - consumed;
            let offset = remainder / division.unit_cost();
            let offset = u32::try_from(offset).unwrap_or(u32::MAX);
            return division.min_level().saturating_add(offset);
        }
    }
    // Unreachable: the God division always matches.
    u32::MAX
}

// ---------------------------------------------------------------------------
// LevelingEngine
// ---------------------------------------------------------------------------

/// Notification emitted when a message advances a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LevelEvent {
    /// The user leveled up within their division.
    LevelUp {
        /// Who advanced.
        user: UserId,
        /// The level reached.
        level: u32,
        /// Eggs granted for the advance.
        eggs_awarded: u64,
    },
    /// The user advanced into a different division.
    DivisionChange {
        /// Who advanced.
        user: UserId,
        /// The level reached.
        level: u32,
        /// The division entered.
        division: Division,
        /// Eggs granted for the advance.
        eggs_awarded: u64,
    },
}

/// Accumulates message-driven progression and grants level-up rewards.
pub struct LevelingEngine {
    profiles: Arc<ProfileRegistry>,
    currency: Arc<CurrencyLedger>,
}

impl std::fmt::Debug for LevelingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LevelingEngine").finish_non_exhaustive()
    }
}

impl LevelingEngine {
    /// Build the engine over shared profile and currency stores.
    #[must_use]
    pub fn new(profiles: Arc<ProfileRegistry>, currency: Arc<CurrencyLedger>) -> Self {
        Self { profiles, currency }
    }

    /// Accept a message of `text_len` characters from `user`.
    ///
    /// The user's `level_unit` grows by `text_len` and the derived
    /// `(level, division)` pair is written back unconditionally. When the
    /// level rose and `award` is set, eggs are granted and a notification is
    /// returned — [`LevelEvent::DivisionChange`] if the division also
    /// changed, [`LevelEvent::LevelUp`] otherwise. A zero-length message
    /// contributes nothing but still runs the level check.
    ///
    /// The whole read-modify-write holds the user's profile lock, so two
    /// concurrent messages from the same user both land in the final score.
    pub fn accept_message(&self, user: UserId, text_len: usize, award: bool) -> Option<LevelEvent> {
        self.accept_message_with(user, text_len, award, &mut rand::thread_rng())
    }

    /// [`LevelingEngine::accept_message`] with a caller-supplied RNG.
    pub fn accept_message_with<R: Rng>(
        &self,
        user: UserId,
        text_len: usize,
        award: bool,
        rng: &mut R,
    ) -> Option<LevelEvent> {
        let entry = self.profiles.get_or_create(user);
        let mut profile = entry.lock();

        let new_unit = profile.level_unit.saturating_add(text_len as u64);
        let level = predict_level(new_unit);
        let division = predict_division(level);

        let mut event = None;
        if level > profile.level && award {
            let gained = u64::from(level - profile.level);
            let eggs_awarded = scale_award(division.reward_eggs() * gained, rng);
            self.currency.add_eggs(user, eggs_awarded);
            debug!(
                %user,
                from = profile.level,
                to = level,
                eggs = eggs_awarded,
                "level advanced"
            );
            event = Some(if division == profile.division {
                LevelEvent::LevelUp {
                    user,
                    level,
                    eggs_awarded,
                }
            } else {
                LevelEvent::DivisionChange {
                    user,
                    level,
                    division,
                    eggs_awarded,
                }
            });
        }

        profile.level_unit = new_unit;
        profile.level = level;
        profile.division = division;
        event
    }

    /// Users ranked by `level_unit`, highest first.
    #[must_use]
    pub fn leaderboard(&self) -> Vec<(UserId, u64)> {
        self.leaderboard_filtered(|_| true)
    }

    /// [`LevelingEngine::leaderboard`] restricted to users matching
    /// `include` (e.g. membership in one guild).
    pub fn leaderboard_filtered(&self, include: impl Fn(UserId) -> bool) -> Vec<(UserId, u64)> {
        let mut entries: Vec<(UserId, u64)> = self
            .profiles
            .snapshot()
            .into_iter()
            .filter(|p| include(p.user))
            .map(|p| (p.user, p.level_unit))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries
    }
}

/// Scale a base award by a uniform multiplier in tenths between ×0.5 and
/// ×1.5, truncating toward zero.
fn scale_award<R: Rng>(base: u64, rng: &mut R) -> u64 {
    let tenths = rng.gen_range(5..16u64);
    base * tenths / 10
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
