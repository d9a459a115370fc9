//! Reward outcomes, side-effect intents, and the append-only audit log.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::EngineEvent;
use crate::math::{FinAmount, Fixed};
use crate::state::user::UserId;

/// Idempotency key carried on every emitted intent: the user plus their
/// monotonic log sequence. Downstream delivery is at-least-once; the key
/// makes the effect exactly-once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub user_id: UserId,
    pub seq: u64,
}

/// Side effect emitted by the engine for an external adapter to execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Intent {
    Mint {
        user_id: UserId,
        amount: FinAmount,
        /// Origin tag, e.g. `claim:<session>` or `referral:claim:<id>:L2`.
        provenance: String,
    },
    CardBurn {
        user_id: UserId,
        card_id: Uuid,
    },
    Notification {
        user_id: UserId,
        event: EngineEvent,
    },
}

/// Every multiplier that entered a reward computation. Written to the audit
/// log so any rate can be reproduced after the fact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactorBreakdown {
    pub base_rate_per_hour: Fixed,
    pub finizen: Fixed,
    pub referral_bonus: Fixed,
    pub security_bonus: Fixed,
    pub xp_level_multiplier: Fixed,
    pub rp_tier_multiplier: Fixed,
    pub quality_score: Fixed,
    pub activity_bonus: Fixed,
    pub staking_bonus: Fixed,
    pub card_bonus: Fixed,
    pub whale_regression: Fixed,
    pub human_probability: Fixed,
    pub mining_penalty: Fixed,
    pub xp_penalty: Fixed,
    pub rp_penalty: Fixed,
    pub platform_multiplier: Fixed,
    pub streak_bonus: Fixed,
    pub level_decay: Fixed,
    pub final_rate_per_hour: Fixed,
}

impl FactorBreakdown {
    /// Stable-keyed map with 64-bit fixed-point values (8 fractional
    /// digits), the representation the event log stores.
    pub fn to_map(&self) -> BTreeMap<String, u64> {
        let mut map = BTreeMap::new();
        let mut put = |name: &str, value: Fixed| {
            map.insert(name.to_string(), value.to_fixed64());
        };
        put("base_rate_per_hour", self.base_rate_per_hour);
        put("finizen", self.finizen);
        put("referral_bonus", self.referral_bonus);
        put("security_bonus", self.security_bonus);
        put("xp_level_multiplier", self.xp_level_multiplier);
        put("rp_tier_multiplier", self.rp_tier_multiplier);
        put("quality_score", self.quality_score);
        put("activity_bonus", self.activity_bonus);
        put("staking_bonus", self.staking_bonus);
        put("card_bonus", self.card_bonus);
        put("whale_regression", self.whale_regression);
        put("human_probability", self.human_probability);
        put("mining_penalty", self.mining_penalty);
        put("xp_penalty", self.xp_penalty);
        put("rp_penalty", self.rp_penalty);
        put("platform_multiplier", self.platform_multiplier);
        put("streak_bonus", self.streak_bonus);
        put("level_decay", self.level_decay);
        put("final_rate_per_hour", self.final_rate_per_hour);
        map
    }
}

/// Flags attached to an outcome without failing the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeNote {
    /// The activity kind hit its per-day XP limit; the event yielded 0 XP.
    DailyCapReached,
    /// The quality scorer was unavailable; the neutral score was used.
    DegradedQuality,
    /// Suspicious findings applied a progressive penalty.
    PenaltyApplied,
}

/// Result of processing one activity event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardOutcome {
    pub user_id: UserId,
    /// The caller's `client_event_id`, echoing the idempotency scope.
    pub event_ref: String,
    pub xp_gained: u64,
    pub rp_credit_delta: i64,
    pub fin_accrued: FinAmount,
    pub factors: FactorBreakdown,
    pub notes: Vec<OutcomeNote>,
    pub intents: Vec<Intent>,
}

/// Record kinds in the per-user reward log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogKind {
    Activity,
    SessionStarted,
    Accrual,
    Claim,
    ReferralCredit,
    Suspension,
    SessionClosed,
    CardActivation,
    Registration,
    KycVerified,
}

/// One append-only audit record. The field set is fixed; encoding is the
/// store's choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogRecord {
    /// Monotonic per-user sequence, assigned by the log on append.
    pub seq: u64,
    /// Milliseconds since the Unix epoch.
    pub ts: u64,
    pub kind: LogKind,
    /// Signed micro-unit delta to the user's $FIN.
    pub fin_delta: i64,
    pub xp_delta: i64,
    pub rp_delta: i64,
    pub factors: BTreeMap<String, u64>,
    pub provenance: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn factor_map_has_stable_keys() {
        let breakdown = FactorBreakdown {
            finizen: Fixed::from_percent(195),
            final_rate_per_hour: Fixed::from_ratio(234, 1_000).unwrap(),
            ..FactorBreakdown::default()
        };

        let map = breakdown.to_map();
        assert_eq!(map["finizen"], 195_000_000);
        assert_eq!(map["final_rate_per_hour"], 23_400_000);
        assert_eq!(map.len(), 19);
    }

    #[test]
    fn outcome_round_trips_through_serde() {
        let outcome = RewardOutcome {
            user_id: UserId::new("u"),
            event_ref: "evt-1".into(),
            xp_gained: 64,
            rp_credit_delta: 5,
            fin_accrued: FinAmount::ZERO,
            factors: FactorBreakdown::default(),
            notes: vec![OutcomeNote::DegradedQuality],
            intents: vec![],
        };
        let json = serde_json::to_string(&outcome).unwrap();
        let back: RewardOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(back, outcome);
    }
}
