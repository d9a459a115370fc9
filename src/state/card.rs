//! Special-card catalog and active effects.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::*;
use crate::math::Fixed;
use crate::state::user::UserId;

/// Effect category a card belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CardCategory {
    MiningBoost,
    XpAccelerator,
    ReferralPower,
    ProfileBadge,
}

/// Card types recognized by the effect engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CardKind {
    DoubleMining,
    TripleMining,
    MiningFrenzy,
    EternalMiner,
    XpDouble,
    XpMagnet,
    LevelRush,
    StreakSaver,
    ReferralBoost,
    FinizenBadge,
}

/// Static parameters of a card kind.
pub struct CardSpec {
    pub category: CardCategory,
    /// Effect multiplier in percent-points.
    pub multiplier_percent: u64,
    /// 0 = permanent.
    pub duration_hours: u32,
    pub stackable: bool,
    pub max_stack: u8,
    pub single_use: bool,
    pub cooldown_hours: u32,
}

impl CardKind {
    pub fn spec(&self) -> CardSpec {
        match self {
            CardKind::DoubleMining => CardSpec {
                category: CardCategory::MiningBoost,
                multiplier_percent: 200,
                duration_hours: 24,
                stackable: false,
                max_stack: 1,
                single_use: true,
                cooldown_hours: 24,
            },
            CardKind::TripleMining => CardSpec {
                category: CardCategory::MiningBoost,
                multiplier_percent: 300,
                duration_hours: 12,
                stackable: false,
                max_stack: 1,
                single_use: true,
                cooldown_hours: 12,
            },
            CardKind::MiningFrenzy => CardSpec {
                category: CardCategory::MiningBoost,
                multiplier_percent: 600,
                duration_hours: 4,
                stackable: false,
                max_stack: 1,
                single_use: true,
                cooldown_hours: 48,
            },
            CardKind::EternalMiner => CardSpec {
                category: CardCategory::MiningBoost,
                multiplier_percent: 150,
                duration_hours: 720,
                stackable: false,
                max_stack: 1,
                single_use: false,
                cooldown_hours: 0,
            },
            CardKind::XpDouble => CardSpec {
                category: CardCategory::XpAccelerator,
                multiplier_percent: 200,
                duration_hours: 24,
                stackable: false,
                max_stack: 1,
                single_use: true,
                cooldown_hours: 24,
            },
            CardKind::XpMagnet => CardSpec {
                category: CardCategory::XpAccelerator,
                multiplier_percent: 400,
                duration_hours: 48,
                stackable: false,
                max_stack: 1,
                single_use: true,
                cooldown_hours: 0,
            },
            CardKind::LevelRush => CardSpec {
                category: CardCategory::XpAccelerator,
                multiplier_percent: 100,
                duration_hours: 0,
                stackable: true,
                max_stack: 3,
                single_use: true,
                cooldown_hours: 0,
            },
            CardKind::StreakSaver => CardSpec {
                category: CardCategory::XpAccelerator,
                multiplier_percent: 100,
                duration_hours: 0,
                stackable: false,
                max_stack: 1,
                single_use: true,
                cooldown_hours: 0,
            },
            CardKind::ReferralBoost => CardSpec {
                category: CardCategory::ReferralPower,
                multiplier_percent: 150,
                duration_hours: 168,
                stackable: false,
                max_stack: 1,
                single_use: true,
                cooldown_hours: 168,
            },
            CardKind::FinizenBadge => CardSpec {
                category: CardCategory::ProfileBadge,
                multiplier_percent: 105,
                duration_hours: 0,
                stackable: false,
                max_stack: 1,
                single_use: false,
                cooldown_hours: 0,
            },
        }
    }

    /// Instant XP granted on activation (Level Rush only).
    pub fn instant_xp(&self) -> u64 {
        match self {
            CardKind::LevelRush => 500,
            _ => 0,
        }
    }
}

/// A card instance sitting in a user's inventory, not yet activated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnedCard {
    pub card_id: Uuid,
    pub owner: UserId,
    pub kind: CardKind,
}

/// An activated card effect. Destroyed on expiry, on consumption or on burn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NftCardEffect {
    pub user_id: UserId,
    pub card_id: Uuid,
    pub kind: CardKind,
    pub category: CardCategory,
    pub multiplier: Fixed,
    /// 0 = permanent.
    pub duration_hours: u32,
    pub stackable: bool,
    pub max_stack: u8,
    pub activated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub single_use: bool,
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl NftCardEffect {
    pub fn activate(owned: &OwnedCard, now: DateTime<Utc>) -> Self {
        let spec = owned.kind.spec();
        let expires_at = (spec.duration_hours > 0)
            .then(|| now + Duration::hours(spec.duration_hours as i64));
        let cooldown_until = (spec.cooldown_hours > 0)
            .then(|| now + Duration::hours(spec.cooldown_hours as i64));
        NftCardEffect {
            user_id: owned.owner.clone(),
            card_id: owned.card_id,
            kind: owned.kind,
            category: spec.category,
            multiplier: Fixed::from_percent(spec.multiplier_percent),
            duration_hours: spec.duration_hours,
            stackable: spec.stackable,
            max_stack: spec.max_stack,
            activated_at: now,
            expires_at,
            single_use: spec.single_use,
            cooldown_until,
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expiry) => now < expiry,
            None => true,
        }
    }
}

/// Active-boost slots allowed at an XP level.
pub fn max_active_boosts(level: u16) -> usize {
    if level >= 100 {
        MAX_BOOSTS_LEVEL_100
    } else if level >= 50 {
        MAX_BOOSTS_LEVEL_50
    } else if level >= 25 {
        MAX_BOOSTS_LEVEL_25
    } else if level >= 10 {
        MAX_BOOSTS_LEVEL_10
    } else {
        MAX_BOOSTS_DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn activation_stamps_expiry_and_cooldown() {
        let owned = OwnedCard {
            card_id: Uuid::from_u128(1),
            owner: UserId::new("u"),
            kind: CardKind::DoubleMining,
        };
        let effect = NftCardEffect::activate(&owned, now());
        assert_eq!(effect.expires_at, Some(now() + Duration::hours(24)));
        assert_eq!(effect.cooldown_until, Some(now() + Duration::hours(24)));
        assert!(effect.single_use);
        assert!(effect.is_live(now() + Duration::hours(23)));
        assert!(!effect.is_live(now() + Duration::hours(24)));
    }

    #[test]
    fn permanent_cards_never_expire() {
        let owned = OwnedCard {
            card_id: Uuid::from_u128(2),
            owner: UserId::new("u"),
            kind: CardKind::FinizenBadge,
        };
        let effect = NftCardEffect::activate(&owned, now());
        assert_eq!(effect.expires_at, None);
        assert!(effect.is_live(now() + Duration::days(3_650)));
    }

    #[test]
    fn boost_slots_follow_level() {
        assert_eq!(max_active_boosts(1), 1);
        assert_eq!(max_active_boosts(10), 2);
        assert_eq!(max_active_boosts(25), 3);
        assert_eq!(max_active_boosts(50), 4);
        assert_eq!(max_active_boosts(99), 4);
        assert_eq!(max_active_boosts(100), 5);
    }

    #[test]
    fn cooldown_table_matches_card_kinds() {
        assert_eq!(CardKind::DoubleMining.spec().cooldown_hours, 24);
        assert_eq!(CardKind::TripleMining.spec().cooldown_hours, 12);
        assert_eq!(CardKind::MiningFrenzy.spec().cooldown_hours, 48);
        assert_eq!(CardKind::XpDouble.spec().cooldown_hours, 24);
        assert_eq!(CardKind::ReferralBoost.spec().cooldown_hours, 168);
        assert_eq!(CardKind::LevelRush.spec().cooldown_hours, 0);
        assert_eq!(CardKind::StreakSaver.spec().cooldown_hours, 0);
    }
}
