//! The integrated reward formula.
//!
//! Pure functions from user snapshot, event, scores, phase constants and
//! card bonuses to mining rate, XP and RP. Every factor is clamped to its
//! declared range before entering a product; the factor breakdown records
//! exactly what was applied.

use crate::constants::*;
use crate::errors::EngineError;
use crate::math::{FinAmount, Fixed};
use crate::oracle::PhaseConstants;
use crate::state::activity::{ActivityKind, Platform};
use crate::state::rewards::{FactorBreakdown, OutcomeNote};
use crate::state::user::User;
use crate::state::xp;

/// Inputs for a mining-rate computation.
pub struct RateInputs<'a> {
    pub user: &'a User,
    pub phase: &'a PhaseConstants,
    /// Content quality for the triggering event, [0.5, 2.0].
    pub quality: Fixed,
    /// Human probability, [0.1, 1.0].
    pub human: Fixed,
    pub active_l1_referrals: u32,
    /// Combined active mining-card bonus, [1.0, 20.0].
    pub card_mining_bonus: Fixed,
}

/// Inputs for a full per-event computation.
pub struct EventInputs<'a> {
    pub rate: RateInputs<'a>,
    pub kind: ActivityKind,
    pub platform: Platform,
    /// Combined active XP-card bonus.
    pub card_xp_bonus: Fixed,
    /// Combined active referral-card bonus.
    pub card_rp_bonus: Fixed,
    /// Events of this kind already rewarded today.
    pub events_today_of_kind: u32,
    /// Aggregate suspicion, [0, 1]; zero skips the penalty stage.
    pub suspicious_score: Fixed,
}

/// Result of a per-event computation.
#[derive(Debug, Clone, PartialEq)]
pub struct RewardComputation {
    /// New session rate (capped at daily_cap / 24, penalties applied).
    pub rate_per_hour: FinAmount,
    pub xp_gained: u64,
    pub rp_credit_delta: i64,
    pub factors: FactorBreakdown,
    pub notes: Vec<OutcomeNote>,
}

/// Progressive difficulty penalties for suspicious users.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PenaltySet {
    pub mining: Fixed,
    pub xp: Fixed,
    pub rp: Fixed,
}

impl PenaltySet {
    pub const NONE: PenaltySet = PenaltySet {
        mining: Fixed::ZERO,
        xp: Fixed::ZERO,
        rp: Fixed::ZERO,
    };
}

/// difficulty = 1 + total_earned / 1000 + suspicion x 2, then each penalty
/// is difficulty scaled and capped.
pub fn penalties(total_earned: FinAmount, suspicious_score: Fixed) -> PenaltySet {
    if suspicious_score.is_zero() {
        return PenaltySet::NONE;
    }
    let earned_term = Fixed::from_ratio(
        total_earned.whole_fin(),
        DIFFICULTY_EARNINGS_DIVISOR_FIN,
    )
    .unwrap_or(Fixed::ZERO);
    let suspicion_term = suspicious_score
        .checked_mul(Fixed::from_int(DIFFICULTY_SUSPICION_MULTIPLIER))
        .unwrap_or(suspicious_score);
    let difficulty = Fixed::ONE
        .checked_add(earned_term)
        .and_then(|d| d.checked_add(suspicion_term))
        .unwrap_or(Fixed::ONE);

    let scaled = |step_percent: u64, cap_percent: u64| {
        difficulty
            .checked_mul(Fixed::from_percent(step_percent))
            .unwrap_or(Fixed::ZERO)
            .min(Fixed::from_percent(cap_percent))
    };

    PenaltySet {
        mining: scaled(MINING_PENALTY_STEP_PERCENT, MINING_PENALTY_CAP_PERCENT),
        xp: scaled(XP_PENALTY_STEP_PERCENT, XP_PENALTY_CAP_PERCENT),
        rp: scaled(RP_PENALTY_STEP_PERCENT, RP_PENALTY_CAP_PERCENT),
    }
}

/// Referral bonus: 1 + 0.1 x active L1 referrals, capped at 3.5x.
pub fn referral_bonus(active_l1: u32) -> Fixed {
    Fixed::ONE
        .checked_add(Fixed::from_percent(
            REFERRAL_BONUS_PER_ACTIVE_PERCENT * active_l1 as u64,
        ))
        .unwrap_or(Fixed::ONE)
        .min(Fixed::from_percent(REFERRAL_BONUS_CAP_PERCENT))
}

/// Whale regression: e^(-0.001 x holdings-in-FIN).
pub fn whale_regression(holdings: FinAmount) -> Fixed {
    let arg = Fixed::from_ratio(
        WHALE_REGRESSION_COEFF_NUM * holdings.whole_fin(),
        WHALE_REGRESSION_COEFF_DEN,
    )
    .unwrap_or(Fixed::ZERO);
    Fixed::exp_neg(arg)
}

/// The mining-rate product with every factor pre-clamped. Returns the
/// breakdown and the rate after the hourly ceiling, before penalties.
pub fn mining_rate(inputs: &RateInputs<'_>) -> Result<(FinAmount, FactorBreakdown), EngineError> {
    let user = inputs.user;
    let phase = inputs.phase;

    let finizen = phase.finizen.clamp(Fixed::ONE, Fixed::from_int(2));
    let referral = referral_bonus(inputs.active_l1_referrals);
    let security = if user.kyc_verified {
        Fixed::from_percent(KYC_SECURITY_BONUS_PERCENT)
    } else {
        Fixed::from_percent(NON_KYC_PENALTY_PERCENT)
    };
    let xp_multiplier = user
        .xp_mining_multiplier()
        .clamp(Fixed::ONE, Fixed::from_int(5));
    let rp_multiplier = user
        .rp_tier
        .mining_multiplier()
        .clamp(Fixed::ONE, Fixed::from_int(3));
    let quality = inputs.quality.clamp(
        Fixed::from_percent(QUALITY_SCORE_MIN_PERCENT),
        Fixed::from_percent(QUALITY_SCORE_MAX_PERCENT),
    );
    let activity = user
        .activity_bonus()
        .clamp(Fixed::ONE, Fixed::from_percent(ACTIVITY_BONUS_CAP_PERCENT));
    let staking = user
        .staking_bonus()
        .clamp(Fixed::ONE, Fixed::from_int(2));
    let cards = inputs
        .card_mining_bonus
        .clamp(Fixed::ONE, Fixed::from_percent(CARD_BONUS_CAP_PERCENT));
    let regression = whale_regression(user.holdings).clamp(Fixed::ZERO, Fixed::ONE);
    let human = inputs.human.clamp(
        Fixed::from_percent(HUMAN_SCORE_MIN_PERCENT),
        Fixed::from_percent(HUMAN_SCORE_MAX_PERCENT),
    );
    let human_squared = human.checked_mul(human)?;

    let mut product = finizen;
    for factor in [
        referral,
        security,
        xp_multiplier,
        rp_multiplier,
        quality,
        activity,
        staking,
        cards,
        regression,
        human_squared,
    ] {
        product = product.checked_mul(factor)?;
    }

    let raw_rate = phase.base_rate_per_hour.mul_fixed(product)?;
    let hourly_ceiling = phase.daily_cap.mul_fixed(Fixed::from_ratio(1, 24)?)?;
    let rate = raw_rate.min(hourly_ceiling);

    let factors = FactorBreakdown {
        base_rate_per_hour: phase.base_rate_per_hour.to_fixed(),
        finizen,
        referral_bonus: referral,
        security_bonus: security,
        xp_level_multiplier: xp_multiplier,
        rp_tier_multiplier: rp_multiplier,
        quality_score: quality,
        activity_bonus: activity,
        staking_bonus: staking,
        card_bonus: cards,
        whale_regression: regression,
        human_probability: human,
        final_rate_per_hour: rate.to_fixed(),
        ..FactorBreakdown::default()
    };

    Ok((rate, factors))
}

/// XP for an event:
/// floor(base x platform x quality x streak x e^(-0.01 x level)), zero once
/// the kind's daily limit is reached.
fn xp_for_event(
    inputs: &EventInputs<'_>,
    factors: &mut FactorBreakdown,
) -> Result<(u64, Option<OutcomeNote>), EngineError> {
    if let Some(limit) = inputs.kind.daily_limit() {
        if inputs.events_today_of_kind >= limit {
            return Ok((0, Some(OutcomeNote::DailyCapReached)));
        }
    }

    let platform = Fixed::from_percent(inputs.platform.xp_multiplier_percent());
    let streak = xp::streak_bonus(inputs.rate.user.streak_days);
    let decay = xp::level_decay(inputs.rate.user.xp_level);
    let quality = factors.quality_score;
    let card_bonus = inputs.card_xp_bonus.max(Fixed::ONE);

    factors.platform_multiplier = platform;
    factors.streak_bonus = streak;
    factors.level_decay = decay;

    let product = Fixed::from_int(inputs.kind.base_xp())
        .checked_mul(platform)?
        .checked_mul(quality)?
        .checked_mul(streak)?
        .checked_mul(decay)?
        .checked_mul(card_bonus)?;

    Ok(((product.raw() / crate::math::FIXED_SCALE) as u64, None))
}

/// RP credited to the acting user:
/// base_rp x quality x (1 + tier_index x 0.2), card-boosted.
fn rp_for_event(inputs: &EventInputs<'_>, quality: Fixed) -> Result<u64, EngineError> {
    let network_bonus = inputs.rate.user.rp_tier.network_quality_bonus();
    let card_bonus = inputs.card_rp_bonus.max(Fixed::ONE);
    let product = Fixed::from_int(inputs.kind.base_rp())
        .checked_mul(quality)?
        .checked_mul(network_bonus)?
        .checked_mul(card_bonus)?;
    Ok(((product.raw() + crate::math::FIXED_SCALE / 2) / crate::math::FIXED_SCALE) as u64)
}

/// Full per-event computation: rate, XP, RP and penalties.
pub fn compute_event(inputs: &EventInputs<'_>) -> Result<RewardComputation, EngineError> {
    let (rate, mut factors) = mining_rate(&inputs.rate)?;
    let mut notes = Vec::new();

    let (mut xp_gained, xp_note) = xp_for_event(inputs, &mut factors)?;
    notes.extend(xp_note);
    let mut rp_gained = rp_for_event(inputs, factors.quality_score)?;

    let penalty_set = penalties(inputs.rate.user.total_earned, inputs.suspicious_score);
    let mut rate = rate;
    if penalty_set != PenaltySet::NONE {
        notes.push(OutcomeNote::PenaltyApplied);
        rate = rate.mul_fixed(Fixed::ONE.saturating_sub(penalty_set.mining))?;
        xp_gained = (Fixed::from_int(xp_gained)
            .checked_mul(Fixed::ONE.saturating_sub(penalty_set.xp))?
            .raw()
            / crate::math::FIXED_SCALE) as u64;
        rp_gained = (Fixed::from_int(rp_gained)
            .checked_mul(Fixed::ONE.saturating_sub(penalty_set.rp))?
            .raw()
            / crate::math::FIXED_SCALE) as u64;
        factors.mining_penalty = penalty_set.mining;
        factors.xp_penalty = penalty_set.xp;
        factors.rp_penalty = penalty_set.rp;
        factors.final_rate_per_hour = rate.to_fixed();
    }

    Ok(RewardComputation {
        rate_per_hour: rate,
        xp_gained,
        rp_credit_delta: rp_gained as i64,
        factors,
        notes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{Clock, MockClock};
    use crate::oracle::{finizen_multiplier, MiningPhase};
    use crate::state::referral::RpTier;
    use crate::state::user::UserId;
    use pretty_assertions::assert_eq;

    fn phase_constants(total_users: u64) -> PhaseConstants {
        let phase = MiningPhase::for_users(total_users);
        PhaseConstants {
            phase,
            total_users,
            base_rate_per_hour: FinAmount::from_units(phase.base_rate_units_per_hour()).unwrap(),
            daily_cap: FinAmount::from_units(phase.daily_cap_units()).unwrap(),
            finizen: finizen_multiplier(phase, total_users),
            phase_progress: Fixed::ZERO,
        }
    }

    fn new_user() -> User {
        let mut user = User::register(UserId::new("u"), true, MockClock::fixed().now());
        user.streak_days = 1;
        user
    }

    fn rate_inputs<'a>(user: &'a User, phase: &'a PhaseConstants) -> RateInputs<'a> {
        RateInputs {
            user,
            phase,
            quality: Fixed::ONE,
            human: Fixed::ONE,
            active_l1_referrals: 0,
            card_mining_bonus: Fixed::ONE,
        }
    }

    #[test]
    fn fresh_finizen_user_post_vector() {
        // 50k users, no holdings, KYC, level 1, no cards, no stake:
        // 0.1 x 1.95 x 1.0 x 1.2 = 0.234 FIN/hr before the hourly ceiling.
        let phase = phase_constants(50_000);
        let user = new_user();
        let inputs = EventInputs {
            rate: rate_inputs(&user, &phase),
            kind: ActivityKind::Post,
            platform: Platform::TikTok,
            card_xp_bonus: Fixed::ONE,
            card_rp_bonus: Fixed::ONE,
            events_today_of_kind: 0,
            suspicious_score: Fixed::ZERO,
        };
        let result = compute_event(&inputs).unwrap();

        // The factor product reproduces the formula value...
        let product = result
            .factors
            .finizen
            .checked_mul(result.factors.security_bonus)
            .unwrap();
        let formula_rate = phase.base_rate_per_hour.mul_fixed(product).unwrap();
        assert_eq!(formula_rate, FinAmount::from_fin_ratio(234, 1_000).unwrap());

        // ...and the session rate respects the hourly ceiling (4.8 / 24).
        assert_eq!(
            result.rate_per_hour,
            FinAmount::from_fin_ratio(2, 10).unwrap()
        );

        // XP: floor(50 x 1.3 x 1.0 x 1.0 x e^-0.01) = 64.
        assert_eq!(result.xp_gained, 64);
        assert!(result.notes.is_empty());
    }

    #[test]
    fn whale_regression_crushes_the_rate() {
        // 500k users, 10k FIN holdings, 25 active L1, level 35, Influencer.
        let phase = phase_constants(500_000);
        let mut user = new_user();
        user.holdings = FinAmount::from_fin(10_000).unwrap();
        user.xp_total = 10_500;
        user.xp_level = crate::state::xp::level_for_xp(10_500);
        assert_eq!(user.xp_level, 35);
        user.rp_total = 6_000;
        user.rp_tier = RpTier::Influencer;

        let mut inputs = rate_inputs(&user, &phase);
        inputs.active_l1_referrals = 25;
        let (rate, factors) = mining_rate(&inputs).unwrap();

        // Referral bonus capped at 3.5 even with 25 actives.
        assert_eq!(factors.referral_bonus, Fixed::from_ratio(35, 10).unwrap());
        // e^-10 regression.
        assert!(factors.whale_regression < Fixed::from_ratio(5, 100_000).unwrap());
        // The product collapses to dust: under 0.0001 FIN/hr.
        assert!(rate < FinAmount::from_fin_ratio(1, 10_000).unwrap());
        assert!(rate > FinAmount::ZERO);
    }

    #[test]
    fn rate_is_monotone_in_human_probability() {
        let phase = phase_constants(50_000);
        let user = new_user();
        let mut previous = FinAmount::ZERO;
        for percent in [10u64, 30, 50, 70, 90, 100] {
            let mut inputs = rate_inputs(&user, &phase);
            inputs.human = Fixed::from_percent(percent);
            let (rate, _) = mining_rate(&inputs).unwrap();
            assert!(rate > previous, "rate not increasing at human={percent}%");
            previous = rate;
        }
    }

    #[test]
    fn rate_strictly_decreases_as_holdings_grow() {
        let phase = phase_constants(500_000);
        let mut previous = FinAmount::from_fin(1).unwrap();
        for holdings_fin in [0u64, 100, 1_000, 3_000, 6_000] {
            let mut user = new_user();
            // Stay under the hourly ceiling so the clamp cannot mask the decrease.
            user.kyc_verified = false;
            user.holdings = FinAmount::from_fin(holdings_fin).unwrap();
            let (rate, _) = mining_rate(&rate_inputs(&user, &phase)).unwrap();
            assert!(rate < previous, "no decrease at {holdings_fin} FIN");
            previous = rate;
        }
    }

    #[test]
    fn daily_limit_zeroes_xp_with_a_note() {
        let phase = phase_constants(50_000);
        let user = new_user();
        let inputs = EventInputs {
            rate: rate_inputs(&user, &phase),
            kind: ActivityKind::Like,
            platform: Platform::FinovaApp,
            card_xp_bonus: Fixed::ONE,
            card_rp_bonus: Fixed::ONE,
            events_today_of_kind: 200,
            suspicious_score: Fixed::ZERO,
        };
        let result = compute_event(&inputs).unwrap();
        assert_eq!(result.xp_gained, 0);
        assert!(result.notes.contains(&OutcomeNote::DailyCapReached));
    }

    #[test]
    fn penalties_shave_all_three_rewards() {
        let phase = phase_constants(50_000);
        let mut user = new_user();
        user.total_earned = FinAmount::from_fin(2_000).unwrap();

        let clean = EventInputs {
            rate: rate_inputs(&user, &phase),
            kind: ActivityKind::Post,
            platform: Platform::TikTok,
            card_xp_bonus: Fixed::ONE,
            card_rp_bonus: Fixed::ONE,
            events_today_of_kind: 0,
            suspicious_score: Fixed::ZERO,
        };
        let baseline = compute_event(&clean).unwrap();

        let flagged = EventInputs {
            suspicious_score: Fixed::from_percent(50),
            ..clean
        };
        let penalized = compute_event(&flagged).unwrap();

        // difficulty = 1 + 2 + 1 = 4: mining 0.4, xp 0.2, rp 0.32.
        assert_eq!(penalized.factors.mining_penalty, Fixed::from_percent(40));
        assert_eq!(penalized.factors.xp_penalty, Fixed::from_percent(20));
        assert_eq!(penalized.factors.rp_penalty, Fixed::from_percent(32));
        assert!(penalized.rate_per_hour < baseline.rate_per_hour);
        assert!(penalized.xp_gained < baseline.xp_gained);
        assert!(penalized.rp_credit_delta < baseline.rp_credit_delta);
        assert!(penalized.notes.contains(&OutcomeNote::PenaltyApplied));
    }

    #[test]
    fn penalty_caps_hold_for_extreme_inputs() {
        let set = penalties(
            FinAmount::from_fin(1_000_000).unwrap(),
            Fixed::ONE,
        );
        assert_eq!(set.mining, Fixed::from_percent(95));
        assert_eq!(set.xp, Fixed::from_percent(90));
        assert_eq!(set.rp, Fixed::from_percent(92));
    }

    #[test]
    fn every_factor_stays_in_declared_bounds() {
        let phase = phase_constants(10);
        let mut user = new_user();
        user.staked = FinAmount::from_fin(50_000).unwrap();
        user.xp_total = 500_000;
        user.xp_level = 200;
        user.rp_tier = RpTier::Ambassador;
        user.quality_score_recent = Fixed::from_percent(200);

        let mut inputs = rate_inputs(&user, &phase);
        inputs.quality = Fixed::from_percent(900);
        inputs.human = Fixed::from_percent(300);
        inputs.active_l1_referrals = 1_000;
        inputs.card_mining_bonus = Fixed::from_int(100);

        let (_, f) = mining_rate(&inputs).unwrap();
        assert!(f.finizen >= Fixed::ONE && f.finizen <= Fixed::from_int(2));
        assert!(f.referral_bonus <= Fixed::from_ratio(35, 10).unwrap());
        assert!(f.quality_score <= Fixed::from_int(2));
        assert!(f.xp_level_multiplier <= Fixed::from_int(5));
        assert!(f.rp_tier_multiplier <= Fixed::from_int(3));
        assert!(f.activity_bonus <= Fixed::from_int(2));
        assert!(f.staking_bonus <= Fixed::from_int(2));
        assert!(f.card_bonus <= Fixed::from_int(20));
        assert!(f.human_probability <= Fixed::ONE);
        assert!(f.whale_regression <= Fixed::ONE);
    }
}
