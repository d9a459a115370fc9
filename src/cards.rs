//! Special-card activation, stacking, synergy and expiry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::adapters::{Clock, UserStateStore};
use crate::constants::*;
use crate::errors::EngineError;
use crate::math::Fixed;
use crate::state::card::{max_active_boosts, CardCategory, NftCardEffect, OwnedCard};
use crate::state::rewards::Intent;
use crate::state::user::{User, UserId};

/// Combined active-card multipliers by concern.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CardBonuses {
    pub mining: Fixed,
    pub xp: Fixed,
    pub rp: Fixed,
}

impl CardBonuses {
    pub const NEUTRAL: CardBonuses = CardBonuses {
        mining: Fixed::ONE,
        xp: Fixed::ONE,
        rp: Fixed::ONE,
    };
}

/// Result of a card activation.
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    pub effect: NftCardEffect,
    /// Present for single-use cards; the cleanup burn.
    pub burn_intent: Option<Intent>,
    /// Instant XP granted on activation (Level Rush).
    pub instant_xp: u64,
}

/// Bonus product at an instant: per-category product of live multipliers,
/// scaled by the synergy bonus, capped at 20x.
pub fn active_bonuses(effects: &[NftCardEffect], now: DateTime<Utc>) -> CardBonuses {
    let live: Vec<&NftCardEffect> = effects.iter().filter(|e| e.is_live(now)).collect();
    if live.is_empty() {
        return CardBonuses::NEUTRAL;
    }

    let product_for = |category: CardCategory| {
        live.iter()
            .filter(|e| e.category == category)
            .fold(Fixed::ONE, |acc, e| {
                acc.checked_mul(e.multiplier).unwrap_or(acc)
            })
    };

    let mut mining = product_for(CardCategory::MiningBoost);
    // Badges are small permanent mining perks.
    mining = mining
        .checked_mul(product_for(CardCategory::ProfileBadge))
        .unwrap_or(mining);
    let mut xp = product_for(CardCategory::XpAccelerator);
    let mut rp = product_for(CardCategory::ReferralPower);

    if live.len() >= 2 {
        let mut synergy = Fixed::ONE
            .checked_add(Fixed::from_percent(
                SYNERGY_PER_CARD_PERCENT * live.len() as u64,
            ))
            .unwrap_or(Fixed::ONE);
        let all_boost_categories = [
            CardCategory::MiningBoost,
            CardCategory::XpAccelerator,
            CardCategory::ReferralPower,
        ]
        .iter()
        .all(|c| live.iter().any(|e| e.category == *c));
        if all_boost_categories {
            synergy = synergy
                .checked_add(Fixed::from_percent(SYNERGY_ALL_CATEGORIES_PERCENT))
                .unwrap_or(synergy);
        }
        // Synergy scales only the categories that have a live card.
        let has = |category: CardCategory| live.iter().any(|e| e.category == category);
        if has(CardCategory::MiningBoost) || has(CardCategory::ProfileBadge) {
            mining = mining.checked_mul(synergy).unwrap_or(mining);
        }
        if has(CardCategory::XpAccelerator) {
            xp = xp.checked_mul(synergy).unwrap_or(xp);
        }
        if has(CardCategory::ReferralPower) {
            rp = rp.checked_mul(synergy).unwrap_or(rp);
        }
    }

    let cap = Fixed::from_percent(CARD_BONUS_CAP_PERCENT);
    CardBonuses {
        mining: mining.min(cap),
        xp: xp.min(cap),
        rp: rp.min(cap),
    }
}

pub struct CardEffectEngine {
    store: Arc<dyn UserStateStore>,
    clock: Arc<dyn Clock>,
}

impl CardEffectEngine {
    pub fn new(store: Arc<dyn UserStateStore>, clock: Arc<dyn Clock>) -> Self {
        CardEffectEngine { store, clock }
    }

    /// Drop expired effects for a user and return the live set.
    pub async fn sweep_expired(&self, id: &UserId) -> Result<Vec<NftCardEffect>, EngineError> {
        let now = self.clock.now();
        let effects = self.store.active_effects(id).await?;
        let mut live = Vec::with_capacity(effects.len());
        for effect in effects {
            if effect.is_live(now) {
                live.push(effect);
            } else {
                self.store.remove_effect(id, effect.card_id).await?;
            }
        }
        Ok(live)
    }

    /// Current combined bonuses for a user.
    pub async fn bonuses_for(&self, id: &UserId) -> Result<CardBonuses, EngineError> {
        let live = self.sweep_expired(id).await?;
        Ok(active_bonuses(&live, self.clock.now()))
    }

    /// Activate an owned card, enforcing ownership, slot caps, stacking
    /// rules and per-kind cooldowns.
    pub async fn activate(&self, user: &User, card_id: Uuid) -> Result<Activation, EngineError> {
        let now = self.clock.now();

        let owned = self
            .store
            .owned_cards(&user.id)
            .await?
            .into_iter()
            .find(|c| c.card_id == card_id)
            .ok_or(EngineError::CardNotOwned)?;
        let spec = owned.kind.spec();

        if let Some(until) = self.store.card_cooldown(&user.id, owned.kind).await? {
            if now < until {
                return Err(EngineError::CardCooldownActive);
            }
        }

        let live = self.sweep_expired(&user.id).await?;
        // Badges and neutral utility cards do not occupy boost slots.
        let occupies_slot = |category: CardCategory, multiplier: Fixed| {
            category != CardCategory::ProfileBadge && multiplier > Fixed::ONE
        };
        let boost_count = live
            .iter()
            .filter(|e| occupies_slot(e.category, e.multiplier))
            .count();
        if occupies_slot(spec.category, Fixed::from_percent(spec.multiplier_percent))
            && boost_count >= max_active_boosts(user.xp_level)
        {
            return Err(EngineError::CardCapExceeded);
        }

        let same_kind = live.iter().filter(|e| e.kind == owned.kind).count();
        let same_category = live.iter().any(|e| e.category == spec.category);
        if !spec.stackable && same_category {
            return Err(EngineError::CardIncompatible);
        }
        if spec.stackable && same_kind >= spec.max_stack as usize {
            return Err(EngineError::CardCapExceeded);
        }

        let effect = NftCardEffect::activate(&owned, now);
        // Instant cards apply at activation and leave no lasting effect.
        let instantaneous = spec.single_use && spec.duration_hours == 0 && owned.kind.instant_xp() > 0;
        if !instantaneous {
            self.store.put_effect(&effect).await?;
        }
        if let Some(until) = effect.cooldown_until {
            self.store
                .set_card_cooldown(&user.id, owned.kind, until)
                .await?;
        }

        let burn_intent = if spec.single_use {
            self.store.remove_owned_card(&user.id, card_id).await?;
            Some(Intent::CardBurn {
                user_id: user.id.clone(),
                card_id,
            })
        } else {
            None
        };

        log::info!("card {:?} activated for {}", owned.kind, user.id);
        Ok(Activation {
            effect,
            burn_intent,
            instant_xp: owned.kind.instant_xp(),
        })
    }

    /// Grant a card into a user's inventory (mint/purchase path).
    pub async fn grant(&self, card: OwnedCard) -> Result<(), EngineError> {
        self.store.add_owned_card(card).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MemoryStore, MockClock};
    use crate::state::card::CardKind;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn owned(kind: CardKind, id: u128) -> OwnedCard {
        OwnedCard {
            card_id: Uuid::from_u128(id),
            owner: UserId::new("u"),
            kind,
        }
    }

    fn effect(kind: CardKind, now: DateTime<Utc>) -> NftCardEffect {
        NftCardEffect::activate(&owned(kind, rand_id(kind)), now)
    }

    fn rand_id(kind: CardKind) -> u128 {
        kind as u128 + 100
    }

    #[test]
    fn single_card_has_no_synergy() {
        let now = MockClock::fixed().now();
        let effects = vec![effect(CardKind::DoubleMining, now)];
        let bonuses = active_bonuses(&effects, now);
        assert_eq!(bonuses.mining, Fixed::from_percent(200));
        assert_eq!(bonuses.xp, Fixed::ONE);
    }

    #[test]
    fn two_cards_earn_the_count_synergy() {
        let now = MockClock::fixed().now();
        let effects = vec![
            effect(CardKind::DoubleMining, now),
            effect(CardKind::XpDouble, now),
        ];
        let bonuses = active_bonuses(&effects, now);
        // Mining 2.0 x synergy 1.2; XP 2.0 x 1.2.
        assert_eq!(bonuses.mining, Fixed::from_percent(240));
        assert_eq!(bonuses.xp, Fixed::from_percent(240));
    }

    #[test]
    fn all_three_categories_add_the_extra_synergy() {
        let now = MockClock::fixed().now();
        let effects = vec![
            effect(CardKind::DoubleMining, now),
            effect(CardKind::XpDouble, now),
            effect(CardKind::ReferralBoost, now),
        ];
        let bonuses = active_bonuses(&effects, now);
        // Synergy: 1 + 0.3 + 0.3 = 1.6.
        assert_eq!(bonuses.mining, Fixed::from_percent(320));
        assert_eq!(bonuses.rp, Fixed::from_percent(240));
    }

    #[test]
    fn expired_cards_do_not_count() {
        let now = MockClock::fixed().now();
        let effects = vec![effect(CardKind::MiningFrenzy, now)];
        let later = now + Duration::hours(5);
        assert_eq!(active_bonuses(&effects, later), CardBonuses::NEUTRAL);
    }

    #[test]
    fn bonus_product_caps_at_twenty() {
        let now = MockClock::fixed().now();
        // An implausible pile of boosts still cannot exceed the cap.
        let mut effects = Vec::new();
        for i in 0..6 {
            let mut e = effect(CardKind::MiningFrenzy, now);
            e.card_id = Uuid::from_u128(i);
            effects.push(e);
        }
        let bonuses = active_bonuses(&effects, now);
        assert_eq!(bonuses.mining, Fixed::from_int(20));
    }

    async fn engine_with_user() -> (CardEffectEngine, User, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(MockClock::fixed());
        let user = User::register(UserId::new("u"), true, clock.now());
        store.insert_user(user.clone()).await.unwrap();
        (
            CardEffectEngine::new(store.clone(), clock),
            user,
            store,
        )
    }

    #[tokio::test]
    async fn level_eight_user_gets_one_boost_slot() {
        let (engine, mut user, _store) = engine_with_user().await;
        user.xp_level = 8;

        engine.grant(owned(CardKind::DoubleMining, 1)).await.unwrap();
        engine.grant(owned(CardKind::XpDouble, 2)).await.unwrap();

        let first = engine.activate(&user, Uuid::from_u128(1)).await.unwrap();
        assert!(first.burn_intent.is_some());

        // Second boost while the first is live: the slot cap rejects it.
        let second = engine.activate(&user, Uuid::from_u128(2)).await;
        assert!(matches!(second, Err(EngineError::CardCapExceeded)));
    }

    #[tokio::test]
    async fn same_category_non_stackable_is_incompatible() {
        let (engine, mut user, _store) = engine_with_user().await;
        user.xp_level = 120; // plenty of slots

        engine.grant(owned(CardKind::DoubleMining, 1)).await.unwrap();
        engine.grant(owned(CardKind::TripleMining, 2)).await.unwrap();

        engine.activate(&user, Uuid::from_u128(1)).await.unwrap();
        let second = engine.activate(&user, Uuid::from_u128(2)).await;
        assert!(matches!(second, Err(EngineError::CardIncompatible)));
    }

    #[tokio::test]
    async fn cooldown_blocks_reactivation_of_the_kind() {
        let (engine, mut user, _store) = engine_with_user().await;
        user.xp_level = 120;

        engine.grant(owned(CardKind::DoubleMining, 1)).await.unwrap();
        engine.grant(owned(CardKind::DoubleMining, 2)).await.unwrap();

        engine.activate(&user, Uuid::from_u128(1)).await.unwrap();
        let again = engine.activate(&user, Uuid::from_u128(2)).await;
        assert!(matches!(again, Err(EngineError::CardCooldownActive)));
    }

    #[tokio::test]
    async fn unowned_cards_are_rejected() {
        let (engine, user, _store) = engine_with_user().await;
        let result = engine.activate(&user, Uuid::from_u128(9)).await;
        assert!(matches!(result, Err(EngineError::CardNotOwned)));
    }

    #[tokio::test]
    async fn level_rush_grants_instant_xp() {
        let (engine, mut user, _store) = engine_with_user().await;
        user.xp_level = 120;
        engine.grant(owned(CardKind::LevelRush, 1)).await.unwrap();
        let activation = engine.activate(&user, Uuid::from_u128(1)).await.unwrap();
        assert_eq!(activation.instant_xp, 500);
        assert!(activation.burn_intent.is_some());
    }
}
