//! The per-user durable record.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::math::{FinAmount, Fixed};
use crate::state::activity::{ActivityKind, Platform};
use crate::state::referral::RpTier;
use crate::state::xp;
use crate::utils::day_number;

/// Opaque globally unique user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-UTC-day counters, reset lazily on first touch of a new day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCounters {
    /// UTC day number the counters belong to.
    pub day: i64,

    /// $FIN accrued to this user today across all sources.
    pub mined_today: FinAmount,

    /// Rewarded events per activity kind today.
    pub events_by_kind: [u32; 11],
}

impl DailyCounters {
    /// Roll to `day` if the stored counters belong to an earlier one.
    pub fn roll(&mut self, day: i64) {
        if self.day != day {
            *self = DailyCounters {
                day,
                ..DailyCounters::default()
            };
        }
    }

    pub fn count_for(&self, kind: ActivityKind) -> u32 {
        self.events_by_kind[kind.index()]
    }

    pub fn record(&mut self, kind: ActivityKind) {
        self.events_by_kind[kind.index()] += 1;
    }
}

/// Seven-day ring of activity counts and platform usage, for the activity
/// bonus inputs (recent event count, distinct platforms).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityWindow {
    /// UTC day number of slot 0.
    pub anchor_day: i64,

    /// Events per day, slot 0 = anchor day, slot 6 = six days earlier.
    pub counts: [u32; 7],

    /// Platform bitmask per day.
    pub platforms: [u8; 7],
}

impl ActivityWindow {
    pub fn record(&mut self, day: i64, platform: Platform) {
        self.shift_to(day);
        self.counts[0] = self.counts[0].saturating_add(1);
        self.platforms[0] |= platform.bit();
    }

    fn shift_to(&mut self, day: i64) {
        if day <= self.anchor_day {
            return;
        }
        let shift = (day - self.anchor_day).min(7) as usize;
        self.counts.rotate_right(shift);
        self.platforms.rotate_right(shift);
        for i in 0..shift {
            self.counts[i] = 0;
            self.platforms[i] = 0;
        }
        self.anchor_day = day;
    }

    pub fn total_events(&self) -> u64 {
        self.counts.iter().map(|&c| c as u64).sum()
    }

    pub fn distinct_platforms(&self) -> u64 {
        self.platforms
            .iter()
            .fold(0u8, |acc, &mask| acc | mask)
            .count_ones() as u64
    }
}

/// Flat durable user record. Created on first registration; mutated only by
/// the orchestrator under the per-user lease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,

    /// Optimistic-concurrency version; bumped on every store write.
    pub version: u64,

    pub kyc_verified: bool,

    pub created_at: DateTime<Utc>,

    /// On-platform $FIN balance, the whale-regression input.
    pub holdings: FinAmount,

    /// Staked $FIN driving the staking bonus tier.
    pub staked: FinAmount,

    /// Lifetime $FIN credited through mining and referral fan-out.
    pub total_earned: FinAmount,

    pub xp_total: u64,

    /// Always the unique level whose XP range contains `xp_total`.
    pub xp_level: u16,

    pub rp_total: u64,

    /// Always the unique tier whose RP range contains `rp_total`.
    pub rp_tier: RpTier,

    /// Consecutive days with at least one rewarded event.
    pub streak_days: u32,

    pub last_activity_at: DateTime<Utc>,

    /// Latest anti-bot assessment, clamped to [0.1, 1.0].
    pub human_score: Fixed,

    /// Rolling content quality (EMA), clamped to [0.5, 2.0].
    pub quality_score_recent: Fixed,

    pub banned: bool,

    pub suspension_reason: Option<String>,

    /// Deterministic code other users register with.
    pub referral_code: String,

    pub daily: DailyCounters,

    pub recent: ActivityWindow,

    /// Bitmask of already granted network-milestone bonuses.
    pub rp_milestones_granted: u8,
}

impl User {
    pub fn register(id: UserId, kyc_verified: bool, now: DateTime<Utc>) -> Self {
        let referral_code = crate::utils::generate_referral_code(&id);
        User {
            id,
            version: 0,
            kyc_verified,
            created_at: now,
            holdings: FinAmount::ZERO,
            staked: FinAmount::ZERO,
            total_earned: FinAmount::ZERO,
            xp_total: 0,
            xp_level: 1,
            rp_total: 0,
            rp_tier: RpTier::Explorer,
            streak_days: 0,
            last_activity_at: now,
            human_score: Fixed::ONE,
            quality_score_recent: Fixed::ONE,
            banned: false,
            suspension_reason: None,
            referral_code,
            daily: DailyCounters::default(),
            recent: ActivityWindow::default(),
            rp_milestones_granted: 0,
        }
    }

    /// Staking bonus from the staked balance, within [1.0, 2.0].
    pub fn staking_bonus(&self) -> Fixed {
        let staked_fin = self.staked.whole_fin();
        let tier = STAKING_TIER_THRESHOLDS_FIN
            .iter()
            .filter(|&&threshold| staked_fin >= threshold)
            .count();
        Fixed::from_percent(STAKING_TIER_MULTIPLIERS_PERCENT[tier])
    }

    /// Activity bonus inputs per the rolling window and quality EMA,
    /// within [1.0, 2.0].
    pub fn activity_bonus(&self) -> Fixed {
        let events = Fixed::from_ratio(
            self.recent.total_events().min(ACTIVITY_BONUS_EVENT_TARGET),
            ACTIVITY_BONUS_EVENT_TARGET,
        )
        .unwrap_or(Fixed::ZERO);
        let platforms = Fixed::from_ratio(
            self.recent
                .distinct_platforms()
                .min(ACTIVITY_BONUS_PLATFORM_TARGET),
            ACTIVITY_BONUS_PLATFORM_TARGET,
        )
        .unwrap_or(Fixed::ZERO);
        let quality = self.quality_score_recent.clamp(
            Fixed::from_percent(QUALITY_SCORE_MIN_PERCENT),
            Fixed::from_percent(QUALITY_SCORE_MAX_PERCENT),
        );

        let product = events
            .checked_mul(platforms)
            .and_then(|p| p.checked_mul(quality))
            .unwrap_or(Fixed::ZERO);
        Fixed::ONE
            .checked_add(product)
            .unwrap_or(Fixed::ONE)
            .min(Fixed::from_percent(ACTIVITY_BONUS_CAP_PERCENT))
    }

    /// Roll daily counters to the event's UTC day and update the streak.
    /// Returns true when this is the first rewarded event of the day.
    pub fn touch_day(&mut self, now: DateTime<Utc>) -> bool {
        let today = day_number(now);
        let previous_day = self.daily.day;
        if previous_day == today {
            return false;
        }
        self.daily.roll(today);
        if previous_day == today - 1 {
            self.streak_days = self.streak_days.saturating_add(1);
        } else {
            self.streak_days = 1;
        }
        true
    }

    pub fn xp_mining_multiplier(&self) -> Fixed {
        xp::mining_multiplier(self.xp_level)
    }

    /// Remaining daily allowance against a phase cap.
    pub fn remaining_daily_allowance(&self, cap: FinAmount, now: DateTime<Utc>) -> FinAmount {
        if self.daily.day != day_number(now) {
            return cap;
        }
        cap.saturating_sub(self.daily.mined_today)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn staking_bonus_tiers() {
        let mut user = User::register(UserId::new("u"), true, at(1));
        assert_eq!(user.staking_bonus(), Fixed::from_percent(100));

        user.staked = FinAmount::from_fin(100).unwrap();
        assert_eq!(user.staking_bonus(), Fixed::from_percent(120));
        user.staked = FinAmount::from_fin(999).unwrap();
        assert_eq!(user.staking_bonus(), Fixed::from_percent(135));
        user.staked = FinAmount::from_fin(5_000).unwrap();
        assert_eq!(user.staking_bonus(), Fixed::from_percent(175));
        user.staked = FinAmount::from_fin(10_000).unwrap();
        assert_eq!(user.staking_bonus(), Fixed::from_percent(200));
    }

    #[test]
    fn streak_increments_only_on_consecutive_days() {
        let mut user = User::register(UserId::new("u"), true, at(1));
        assert!(user.touch_day(at(1)));
        assert_eq!(user.streak_days, 1);

        // Same day again: no change.
        assert!(!user.touch_day(at(1)));
        assert_eq!(user.streak_days, 1);

        assert!(user.touch_day(at(2)));
        assert_eq!(user.streak_days, 2);

        // A gap resets to one.
        assert!(user.touch_day(at(5)));
        assert_eq!(user.streak_days, 1);
    }

    #[test]
    fn activity_window_tracks_distinct_platforms() {
        let mut user = User::register(UserId::new("u"), true, at(1));
        let day = day_number(at(1));
        user.recent.record(day, Platform::TikTok);
        user.recent.record(day, Platform::TikTok);
        user.recent.record(day + 1, Platform::Instagram);
        assert_eq!(user.recent.total_events(), 3);
        assert_eq!(user.recent.distinct_platforms(), 2);

        // Eight days later everything has aged out.
        user.recent.record(day + 9, Platform::X);
        assert_eq!(user.recent.total_events(), 1);
        assert_eq!(user.recent.distinct_platforms(), 1);
    }

    #[test]
    fn neutral_activity_bonus_for_a_new_user() {
        let user = User::register(UserId::new("u"), true, at(1));
        assert_eq!(user.activity_bonus(), Fixed::ONE);
    }

    #[test]
    fn activity_bonus_caps_at_two() {
        let mut user = User::register(UserId::new("u"), true, at(1));
        let day = day_number(at(1));
        for _ in 0..100 {
            user.recent.record(day, Platform::TikTok);
            user.recent.record(day, Platform::Instagram);
            user.recent.record(day, Platform::YouTube);
            user.recent.record(day, Platform::X);
            user.recent.record(day, Platform::Facebook);
        }
        user.quality_score_recent = Fixed::from_percent(200);
        assert_eq!(user.activity_bonus(), Fixed::from_percent(200));
    }

    #[test]
    fn daily_allowance_resets_on_a_new_day() {
        let mut user = User::register(UserId::new("u"), true, at(1));
        user.touch_day(at(1));
        user.daily.mined_today = FinAmount::from_fin(3).unwrap();
        let cap = FinAmount::from_fin_ratio(48, 10).unwrap();

        let left = user.remaining_daily_allowance(cap, at(1));
        assert_eq!(left, FinAmount::from_fin_ratio(18, 10).unwrap());

        // Next day the full cap is available again.
        assert_eq!(user.remaining_daily_allowance(cap, at(2)), cap);
    }
}
