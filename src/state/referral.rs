//! Referral network records and the RP tier table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::math::Fixed;
use crate::state::user::UserId;

/// RP tier with its commissions and network allowances.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum RpTier {
    #[default]
    Explorer,
    Connector,
    Influencer,
    Leader,
    Ambassador,
}

impl RpTier {
    pub const ALL: [RpTier; 5] = [
        RpTier::Explorer,
        RpTier::Connector,
        RpTier::Influencer,
        RpTier::Leader,
        RpTier::Ambassador,
    ];

    /// The unique tier whose RP range contains `rp_total`.
    pub fn for_rp(rp_total: u64) -> RpTier {
        match rp_total {
            _ if rp_total >= AMBASSADOR_RP_MIN => RpTier::Ambassador,
            _ if rp_total >= LEADER_RP_MIN => RpTier::Leader,
            _ if rp_total >= INFLUENCER_RP_MIN => RpTier::Influencer,
            _ if rp_total >= CONNECTOR_RP_MIN => RpTier::Connector,
            _ => RpTier::Explorer,
        }
    }

    pub fn index(&self) -> u64 {
        match self {
            RpTier::Explorer => 0,
            RpTier::Connector => 1,
            RpTier::Influencer => 2,
            RpTier::Leader => 3,
            RpTier::Ambassador => 4,
        }
    }

    /// Mining multiplier contribution, within [1.0, 3.0].
    pub fn mining_multiplier(&self) -> Fixed {
        match self {
            RpTier::Explorer => Fixed::from_percent(100),
            RpTier::Connector => Fixed::from_percent(120),
            RpTier::Influencer => Fixed::from_percent(150),
            RpTier::Leader => Fixed::from_percent(200),
            RpTier::Ambassador => Fixed::from_percent(300),
        }
    }

    /// Reward share in percent for a referral level (1..=3) at this tier.
    pub fn share_percent(&self, level: u8) -> u64 {
        match (self, level) {
            (RpTier::Explorer, 1) => 10,
            (RpTier::Connector, 1) => 15,
            (RpTier::Connector, 2) => 5,
            (RpTier::Influencer, 1) => 20,
            (RpTier::Influencer, 2) => 8,
            (RpTier::Influencer, 3) => 3,
            (RpTier::Leader, 1) => 25,
            (RpTier::Leader, 2) => 10,
            (RpTier::Leader, 3) => 5,
            (RpTier::Ambassador, 1) => 30,
            (RpTier::Ambassador, 2) => 15,
            (RpTier::Ambassador, 3) => 8,
            _ => 0,
        }
    }

    /// Direct referral allowance; `None` is unbounded.
    pub fn network_cap(&self) -> Option<u32> {
        match self {
            RpTier::Explorer => Some(10),
            RpTier::Connector => Some(25),
            RpTier::Influencer => Some(50),
            RpTier::Leader => Some(100),
            RpTier::Ambassador => None,
        }
    }

    /// Network quality bonus on RP earnings: 1 + tier_index x 0.2.
    pub fn network_quality_bonus(&self) -> Fixed {
        Fixed::ONE
            .checked_add(Fixed::from_percent(
                NETWORK_QUALITY_BONUS_STEP_PERCENT * self.index(),
            ))
            .unwrap_or(Fixed::ONE)
    }
}

/// Activity classification of a referee within someone's network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefereeStatus {
    Active,
    Inactive,
    Churned,
}

impl RefereeStatus {
    /// Classify by days since the referee's last activity.
    pub fn from_idle_days(days: i64) -> RefereeStatus {
        if days <= REFERRAL_INACTIVE_AFTER_DAYS {
            RefereeStatus::Active
        } else if days <= REFERRAL_CHURNED_AFTER_DAYS {
            RefereeStatus::Inactive
        } else {
            RefereeStatus::Churned
        }
    }
}

/// Directed referral edge. Per referee there is at most one inbound edge and
/// the edge set stays acyclic; both are enforced at insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferralEdge {
    pub referrer_id: UserId,
    pub referee_id: UserId,
    pub created_at: DateTime<Utc>,
    pub referee_active: bool,
}

/// Cached view of a user's referral subtree, refreshed lazily when stale or
/// eagerly on edge insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferralNetworkSnapshot {
    pub user_id: UserId,
    pub l1_count: u32,
    pub l1_active: u32,
    pub l2_count: u32,
    pub l2_active: u32,
    pub l3_count: u32,
    pub l3_active: u32,
    /// Level-weighted active ratio in [0, 1].
    pub quality_score: Fixed,
    pub tier: RpTier,
    /// Derived network value per the RP regression formula.
    pub rp_value: Fixed,
    pub last_refreshed_at: DateTime<Utc>,
}

impl ReferralNetworkSnapshot {
    pub fn empty(user_id: UserId, tier: RpTier, at: DateTime<Utc>) -> Self {
        ReferralNetworkSnapshot {
            user_id,
            l1_count: 0,
            l1_active: 0,
            l2_count: 0,
            l2_active: 0,
            l3_count: 0,
            l3_active: 0,
            quality_score: Fixed::ZERO,
            tier,
            rp_value: Fixed::ZERO,
            last_refreshed_at: at,
        }
    }

    pub fn total_network_size(&self) -> u64 {
        self.l1_count as u64 + self.l2_count as u64 + self.l3_count as u64
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.last_refreshed_at)
            .num_seconds()
            > SNAPSHOT_STALE_AFTER_SECS
    }

    /// Level-weighted network quality: active over total with L1/L2/L3
    /// weighted 1.0 / 0.3 / 0.1.
    pub fn compute_quality(
        l1: (u32, u32),
        l2: (u32, u32),
        l3: (u32, u32),
    ) -> Fixed {
        let weight = |count: u32, percent: u64| count as u64 * percent;
        let active = weight(l1.1, NETWORK_QUALITY_L1_WEIGHT_PERCENT)
            + weight(l2.1, NETWORK_QUALITY_L2_WEIGHT_PERCENT)
            + weight(l3.1, NETWORK_QUALITY_L3_WEIGHT_PERCENT);
        let total = weight(l1.0, NETWORK_QUALITY_L1_WEIGHT_PERCENT)
            + weight(l2.0, NETWORK_QUALITY_L2_WEIGHT_PERCENT)
            + weight(l3.0, NETWORK_QUALITY_L3_WEIGHT_PERCENT);
        if total == 0 {
            return Fixed::ZERO;
        }
        Fixed::from_ratio(active, total).unwrap_or(Fixed::ZERO)
    }
}

/// Derived RP network value:
/// `(direct + L2 x 0.3 + L3 x 0.1) x (1 + tier x 0.2) x e^(-0.0001 x size x quality)`.
pub fn rp_network_value(
    direct_rp: u64,
    l2_rp: u64,
    l3_rp: u64,
    tier: RpTier,
    network_size: u64,
    network_quality: Fixed,
) -> Fixed {
    let weighted = Fixed::from_int(direct_rp)
        .checked_add(
            Fixed::from_int(l2_rp)
                .checked_mul(Fixed::from_percent(NETWORK_QUALITY_L2_WEIGHT_PERCENT))
                .unwrap_or(Fixed::ZERO),
        )
        .and_then(|v| {
            v.checked_add(
                Fixed::from_int(l3_rp)
                    .checked_mul(Fixed::from_percent(NETWORK_QUALITY_L3_WEIGHT_PERCENT))
                    .unwrap_or(Fixed::ZERO),
            )
        })
        .unwrap_or(Fixed::ZERO);

    let regression_arg = Fixed::from_ratio(
        NETWORK_REGRESSION_COEFF_NUM * network_size,
        NETWORK_REGRESSION_COEFF_DEN,
    )
    .unwrap_or(Fixed::ZERO)
    .checked_mul(network_quality)
    .unwrap_or(Fixed::ZERO);

    weighted
        .checked_mul(tier.network_quality_bonus())
        .and_then(|v| v.checked_mul(Fixed::exp_neg(regression_arg)))
        .unwrap_or(Fixed::ZERO)
}
