//! The $FIN token amount type.

use std::fmt;
use std::iter::Sum;

use num_traits::{CheckedAdd, CheckedSub, Zero};
use serde::{Deserialize, Serialize};

use super::{div_round_half_even, Fixed, FIXED_SCALE};
use crate::errors::EngineError;

/// Micro-units per whole $FIN token (8 fractional digits).
pub const UNITS_PER_FIN: u64 = 100_000_000;

/// Hard supply bound: 100 billion $FIN, in micro-units.
pub const TOTAL_SUPPLY_UNITS: u64 = 100_000_000_000 * UNITS_PER_FIN;

/// A non-negative $FIN amount in micro-units.
///
/// Every amount in the engine stays within `[0, TOTAL_SUPPLY_UNITS]`;
/// checked arithmetic enforces the bound.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FinAmount(u64);

impl FinAmount {
    pub const ZERO: FinAmount = FinAmount(0);

    /// From raw micro-units. Amounts beyond the supply bound are rejected.
    pub fn from_units(units: u64) -> Result<Self, EngineError> {
        if units > TOTAL_SUPPLY_UNITS {
            return Err(EngineError::SupplyExceeded);
        }
        Ok(FinAmount(units))
    }

    /// From whole $FIN.
    pub fn from_fin(fin: u64) -> Result<Self, EngineError> {
        let units = fin
            .checked_mul(UNITS_PER_FIN)
            .ok_or(EngineError::ArithmeticOverflow)?;
        Self::from_units(units)
    }

    /// From a fractional $FIN value expressed as `numerator / denominator`.
    pub fn from_fin_ratio(numerator: u64, denominator: u64) -> Result<Self, EngineError> {
        if denominator == 0 {
            return Err(EngineError::InvalidParameter("zero denominator".into()));
        }
        let units = div_round_half_even(
            numerator as u128 * UNITS_PER_FIN as u128,
            denominator as u128,
        );
        u64::try_from(units)
            .map_err(|_| EngineError::ArithmeticOverflow)
            .and_then(Self::from_units)
    }

    pub fn as_units(&self) -> u64 {
        self.0
    }

    /// Whole-$FIN view, truncating fractional units. Display/stats only.
    pub fn whole_fin(&self) -> u64 {
        self.0 / UNITS_PER_FIN
    }

    /// The amount as a multiplier-domain fixed-point value (in $FIN).
    pub fn to_fixed(&self) -> Fixed {
        Fixed::from_raw(self.0 as u128 * FIXED_SCALE / UNITS_PER_FIN as u128)
    }

    pub fn checked_add(&self, other: FinAmount) -> Result<FinAmount, EngineError> {
        let units = self
            .0
            .checked_add(other.0)
            .ok_or(EngineError::ArithmeticOverflow)?;
        Self::from_units(units)
    }

    pub fn checked_sub(&self, other: FinAmount) -> Result<FinAmount, EngineError> {
        self.0
            .checked_sub(other.0)
            .map(FinAmount)
            .ok_or(EngineError::ArithmeticOverflow)
    }

    pub fn saturating_sub(&self, other: FinAmount) -> FinAmount {
        FinAmount(self.0.saturating_sub(other.0))
    }

    /// Scale the amount by a bounded multiplier, banker's rounding back to
    /// micro-units.
    pub fn mul_fixed(&self, m: Fixed) -> Result<FinAmount, EngineError> {
        let product = (self.0 as u128)
            .checked_mul(m.raw())
            .ok_or(EngineError::ArithmeticOverflow)?;
        let units = div_round_half_even(product, FIXED_SCALE);
        u64::try_from(units)
            .map_err(|_| EngineError::ArithmeticOverflow)
            .and_then(Self::from_units)
    }

    pub fn min(self, other: FinAmount) -> FinAmount {
        FinAmount(self.0.min(other.0))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for FinAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:08} FIN",
            self.0 / UNITS_PER_FIN,
            self.0 % UNITS_PER_FIN
        )
    }
}

impl Zero for FinAmount {
    fn zero() -> Self {
        FinAmount::ZERO
    }

    fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl std::ops::Add for FinAmount {
    type Output = FinAmount;

    /// Panics on overflow; engine code paths use [`FinAmount::checked_add`].
    fn add(self, rhs: FinAmount) -> FinAmount {
        FinAmount(self.0 + rhs.0)
    }
}

impl CheckedAdd for FinAmount {
    fn checked_add(&self, other: &FinAmount) -> Option<FinAmount> {
        FinAmount::checked_add(self, *other).ok()
    }
}

impl std::ops::Sub for FinAmount {
    type Output = FinAmount;

    fn sub(self, rhs: FinAmount) -> FinAmount {
        FinAmount(self.0 - rhs.0)
    }
}

impl CheckedSub for FinAmount {
    fn checked_sub(&self, other: &FinAmount) -> Option<FinAmount> {
        FinAmount::checked_sub(self, *other).ok()
    }
}

impl Sum for FinAmount {
    fn sum<I: Iterator<Item = FinAmount>>(iter: I) -> FinAmount {
        iter.fold(FinAmount::ZERO, |acc, x| acc + x)
    }
}
