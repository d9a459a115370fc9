//! 128-bit fixed-point multipliers.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::div_round_half_even;
use crate::errors::EngineError;

/// Fixed-point scale: 16 fractional digits.
pub const FIXED_SCALE: u128 = 10_000_000_000_000_000;

/// Taylor terms used by [`Fixed::exp_neg`].
const EXP_TAYLOR_TERMS: u32 = 12;

/// Beyond this argument e^(-x) is below half an ulp of the scale.
const EXP_NEG_FLOOR_ARG: u128 = 40 * FIXED_SCALE;

/// A non-negative fixed-point multiplier with 16 fractional digits.
///
/// Negative values are unrepresentable; every factor that enters a reward
/// product is clamped to its declared range first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Fixed(u128);

impl Fixed {
    pub const ZERO: Fixed = Fixed(0);
    pub const ONE: Fixed = Fixed(FIXED_SCALE);

    pub const fn from_raw(raw: u128) -> Fixed {
        Fixed(raw)
    }

    pub const fn raw(&self) -> u128 {
        self.0
    }

    pub fn from_int(value: u64) -> Fixed {
        Fixed(value as u128 * FIXED_SCALE)
    }

    /// `numerator / denominator` as a fixed-point value.
    pub fn from_ratio(numerator: u64, denominator: u64) -> Result<Fixed, EngineError> {
        if denominator == 0 {
            return Err(EngineError::InvalidParameter("zero denominator".into()));
        }
        Ok(Fixed(div_round_half_even(
            numerator as u128 * FIXED_SCALE,
            denominator as u128,
        )))
    }

    /// Percent-points shorthand: `from_percent(130)` is 1.3x.
    pub fn from_percent(percent: u64) -> Fixed {
        Fixed(percent as u128 * FIXED_SCALE / 100)
    }

    /// Lossy construction from a heuristic score. Negative inputs clamp to
    /// zero; reserved for non-monetary signal math.
    pub fn from_f64_lossy(value: f64) -> Fixed {
        if !value.is_finite() || value <= 0.0 {
            return Fixed::ZERO;
        }
        Fixed((value * FIXED_SCALE as f64).round() as u128)
    }

    /// Lossy view for logs and heuristic comparisons.
    pub fn to_f64_lossy(&self) -> f64 {
        self.0 as f64 / FIXED_SCALE as f64
    }

    /// Audit-log encoding: 64-bit fixed point with 8 fractional digits.
    pub fn to_fixed64(&self) -> u64 {
        u64::try_from(self.0 / 100_000_000).unwrap_or(u64::MAX)
    }

    pub fn checked_mul(&self, other: Fixed) -> Result<Fixed, EngineError> {
        let product = self
            .0
            .checked_mul(other.0)
            .ok_or(EngineError::ArithmeticOverflow)?;
        Ok(Fixed(div_round_half_even(product, FIXED_SCALE)))
    }

    pub fn checked_add(&self, other: Fixed) -> Result<Fixed, EngineError> {
        self.0
            .checked_add(other.0)
            .map(Fixed)
            .ok_or(EngineError::ArithmeticOverflow)
    }

    pub fn saturating_sub(&self, other: Fixed) -> Fixed {
        Fixed(self.0.saturating_sub(other.0))
    }

    pub fn checked_div(&self, other: Fixed) -> Result<Fixed, EngineError> {
        if other.0 == 0 {
            return Err(EngineError::InvalidParameter("division by zero".into()));
        }
        let scaled = self
            .0
            .checked_mul(FIXED_SCALE)
            .ok_or(EngineError::ArithmeticOverflow)?;
        Ok(Fixed(div_round_half_even(scaled, other.0)))
    }

    pub fn clamp(&self, lo: Fixed, hi: Fixed) -> Fixed {
        Fixed(self.0.clamp(lo.0, hi.0))
    }

    pub fn min(self, other: Fixed) -> Fixed {
        Fixed(self.0.min(other.0))
    }

    pub fn max(self, other: Fixed) -> Fixed {
        Fixed(self.0.max(other.0))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// e^(-x), monotone non-increasing in `x`.
    ///
    /// The argument is range-reduced by repeated halving into `[0, 1)`, the
    /// truncated Taylor series is evaluated there, and the result is squared
    /// back up. Arguments past the representable floor return zero.
    pub fn exp_neg(x: Fixed) -> Fixed {
        if x.0 == 0 {
            return Fixed::ONE;
        }
        if x.0 >= EXP_NEG_FLOOR_ARG {
            return Fixed::ZERO;
        }

        let mut reduced = x.0;
        let mut halvings = 0u32;
        while reduced >= FIXED_SCALE {
            reduced /= 2;
            halvings += 1;
        }

        let mut result = exp_neg_taylor(reduced);
        for _ in 0..halvings {
            result = div_round_half_even(result * result, FIXED_SCALE);
        }
        Fixed(result)
    }
}

/// Truncated Taylor series for e^(-x) with `x` in `[0, 1)`.
fn exp_neg_taylor(x: u128) -> u128 {
    let x = x as i128;
    let scale = FIXED_SCALE as i128;
    let mut term = scale;
    let mut sum = scale;
    for n in 1..=EXP_TAYLOR_TERMS as i128 {
        term = -term * x / scale / n;
        sum += term;
    }
    sum.max(0) as u128
}

/// `x * clamp(m, lo, hi)` - every factor is forced into its declared range
/// before it enters a product.
pub fn mul_clamped(x: Fixed, m: Fixed, lo: Fixed, hi: Fixed) -> Result<Fixed, EngineError> {
    x.checked_mul(m.clamp(lo, hi))
}

impl fmt::Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:016}",
            self.0 / FIXED_SCALE,
            self.0 % FIXED_SCALE
        )
    }
}
