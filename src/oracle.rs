//! Mining phase derivation and the cached network oracle.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::adapters::{Clock, PhaseOracle};
use crate::constants::*;
use crate::errors::EngineError;
use crate::math::{FinAmount, Fixed};

/// Network growth phase, determined by total registered users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MiningPhase {
    Finizen,
    Growth,
    Maturity,
    Stability,
}

impl MiningPhase {
    pub fn for_users(total_users: u64) -> MiningPhase {
        if total_users < PHASE_FINIZEN_USER_BOUND {
            MiningPhase::Finizen
        } else if total_users < PHASE_GROWTH_USER_BOUND {
            MiningPhase::Growth
        } else if total_users < PHASE_MATURITY_USER_BOUND {
            MiningPhase::Maturity
        } else {
            MiningPhase::Stability
        }
    }

    pub fn base_rate_units_per_hour(&self) -> u64 {
        match self {
            MiningPhase::Finizen => PHASE_FINIZEN_BASE_RATE,
            MiningPhase::Growth => PHASE_GROWTH_BASE_RATE,
            MiningPhase::Maturity => PHASE_MATURITY_BASE_RATE,
            MiningPhase::Stability => PHASE_STABILITY_BASE_RATE,
        }
    }

    pub fn daily_cap_units(&self) -> u64 {
        match self {
            MiningPhase::Finizen => PHASE_FINIZEN_DAILY_CAP,
            MiningPhase::Growth => PHASE_GROWTH_DAILY_CAP,
            MiningPhase::Maturity => PHASE_MATURITY_DAILY_CAP,
            MiningPhase::Stability => PHASE_STABILITY_DAILY_CAP,
        }
    }

    /// Upper user bound of this phase; `None` for the terminal phase.
    pub fn upper_bound(&self) -> Option<u64> {
        match self {
            MiningPhase::Finizen => Some(PHASE_FINIZEN_USER_BOUND),
            MiningPhase::Growth => Some(PHASE_GROWTH_USER_BOUND),
            MiningPhase::Maturity => Some(PHASE_MATURITY_USER_BOUND),
            MiningPhase::Stability => None,
        }
    }
}

/// Finizen bonus: max(1.0, 2.0 - users / 1,000,000); pinned to 1.0 in the
/// terminal phase.
pub fn finizen_multiplier(phase: MiningPhase, total_users: u64) -> Fixed {
    if phase == MiningPhase::Stability {
        return Fixed::ONE;
    }
    let ceiling = Fixed::from_percent(FINIZEN_BONUS_CEILING_PERCENT);
    let dilution = Fixed::from_ratio(total_users, FINIZEN_DIVISOR).unwrap_or(Fixed::ZERO);
    ceiling.saturating_sub(dilution).max(Fixed::ONE)
}

/// Phase constants observed by one logical transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseConstants {
    pub phase: MiningPhase,
    pub total_users: u64,
    pub base_rate_per_hour: FinAmount,
    pub daily_cap: FinAmount,
    pub finizen: Fixed,
    /// Progress through the current phase's user range, in [0, 1].
    pub phase_progress: Fixed,
}

struct CacheSlot {
    fetched_at: chrono::DateTime<chrono::Utc>,
    constants: PhaseConstants,
}

/// Read-through cache over the [`PhaseOracle`] adapter.
///
/// Reads are served from cache for up to 60 seconds. The observed user
/// count never decreases, so the derived base rate never rises.
pub struct CachedPhaseOracle {
    oracle: Arc<dyn PhaseOracle>,
    clock: Arc<dyn Clock>,
    cache: Mutex<Option<CacheSlot>>,
}

impl CachedPhaseOracle {
    pub fn new(oracle: Arc<dyn PhaseOracle>, clock: Arc<dyn Clock>) -> Self {
        CachedPhaseOracle {
            oracle,
            clock,
            cache: Mutex::new(None),
        }
    }

    pub async fn get(&self) -> Result<PhaseConstants, EngineError> {
        let now = self.clock.now();
        let mut floor_users = 0u64;
        {
            let cache = self.cache.lock();
            if let Some(slot) = cache.as_ref() {
                if now.signed_duration_since(slot.fetched_at).num_seconds()
                    < PHASE_ORACLE_CACHE_SECS
                {
                    return Ok(slot.constants.clone());
                }
                floor_users = slot.constants.total_users;
            }
        }

        let reported = self.oracle.total_users().await?;
        // Monotone: a lagging replica cannot roll the network backwards.
        let total_users = reported.max(floor_users);
        let constants = derive_constants(total_users);
        *self.cache.lock() = Some(CacheSlot {
            fetched_at: now,
            constants: constants.clone(),
        });
        Ok(constants)
    }
}

fn derive_constants(total_users: u64) -> PhaseConstants {
    let phase = MiningPhase::for_users(total_users);
    let phase_progress = match phase.upper_bound() {
        Some(bound) => Fixed::from_ratio(total_users.min(bound), bound).unwrap_or(Fixed::ZERO),
        None => Fixed::ONE,
    };
    PhaseConstants {
        phase,
        total_users,
        base_rate_per_hour: FinAmount::from_units(phase.base_rate_units_per_hour())
            .unwrap_or(FinAmount::ZERO),
        daily_cap: FinAmount::from_units(phase.daily_cap_units()).unwrap_or(FinAmount::ZERO),
        finizen: finizen_multiplier(phase, total_users),
        phase_progress,
    }
}
