//! User-visible engine events, delivered as notification intents.

use serde::{Deserialize, Serialize};

use crate::math::FinAmount;
use crate::state::card::CardKind;
use crate::state::referral::RpTier;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineEvent {
    LevelUp {
        from: u16,
        to: u16,
    },
    TierChange {
        from: RpTier,
        to: RpTier,
    },
    SessionSuspended {
        reason: String,
    },
    SessionClosed {
        reason: String,
    },
    MiningClaimed {
        amount: FinAmount,
    },
    DailyCapReached,
    ReferralRegistered {
        referee: String,
    },
    ReferralCredit {
        amount: FinAmount,
        level: u8,
    },
    CardActivated {
        kind: CardKind,
    },
    MilestoneReached {
        active_referrals: u32,
        bonus_rp: u64,
    },
}
