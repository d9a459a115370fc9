//! XP level bands and progression math.
//!
//! Level is the unique point the user's total XP maps to: bands span fixed
//! XP ranges and levels are linear within a band. The mining multiplier
//! interpolates between a band's endpoints the same way.

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::errors::EngineError;
use crate::math::{FinAmount, Fixed};

/// Badge band for an XP level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum XpBand {
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
    Mythic,
}

struct BandSpec {
    band: XpBand,
    level_min: u16,
    level_max: u16,
    xp_min: u64,
    /// Inclusive; `u64::MAX` for the open-ended top band.
    xp_max: u64,
    mult_min_percent: u64,
    mult_max_percent: u64,
    /// Daily $FIN cap range for the band, micro-units.
    cap_min_units: u64,
    cap_max_units: u64,
}

const BANDS: [BandSpec; 6] = [
    BandSpec {
        band: XpBand::Bronze,
        level_min: 1,
        level_max: 10,
        xp_min: 0,
        xp_max: 999,
        mult_min_percent: 100,
        mult_max_percent: 120,
        cap_min_units: 50_000_000,
        cap_max_units: 200_000_000,
    },
    BandSpec {
        band: XpBand::Silver,
        level_min: 11,
        level_max: 25,
        xp_min: 1_000,
        xp_max: 4_999,
        mult_min_percent: 130,
        mult_max_percent: 180,
        cap_min_units: 200_000_000,
        cap_max_units: 400_000_000,
    },
    BandSpec {
        band: XpBand::Gold,
        level_min: 26,
        level_max: 50,
        xp_min: 5_000,
        xp_max: 19_999,
        mult_min_percent: 190,
        mult_max_percent: 250,
        cap_min_units: 400_000_000,
        cap_max_units: 600_000_000,
    },
    BandSpec {
        band: XpBand::Platinum,
        level_min: 51,
        level_max: 75,
        xp_min: 20_000,
        xp_max: 49_999,
        mult_min_percent: 260,
        mult_max_percent: 320,
        cap_min_units: 600_000_000,
        cap_max_units: 800_000_000,
    },
    BandSpec {
        band: XpBand::Diamond,
        level_min: 76,
        level_max: 100,
        xp_min: 50_000,
        xp_max: 99_999,
        mult_min_percent: 330,
        mult_max_percent: 400,
        cap_min_units: 800_000_000,
        cap_max_units: 1_000_000_000,
    },
    BandSpec {
        band: XpBand::Mythic,
        level_min: 101,
        level_max: MAX_XP_LEVEL,
        xp_min: 100_000,
        xp_max: u64::MAX,
        mult_min_percent: 410,
        mult_max_percent: 500,
        cap_min_units: 1_000_000_000,
        cap_max_units: 1_500_000_000,
    },
];

fn band_spec_for_xp(xp_total: u64) -> &'static BandSpec {
    BANDS
        .iter()
        .find(|b| xp_total >= b.xp_min && xp_total <= b.xp_max)
        .expect("band table covers all of u64")
}

fn band_spec_for_level(level: u16) -> &'static BandSpec {
    let level = level.clamp(1, MAX_XP_LEVEL);
    BANDS
        .iter()
        .find(|b| level >= b.level_min && level <= b.level_max)
        .expect("band table covers all levels")
}

/// The unique level whose XP range contains `xp_total`.
pub fn level_for_xp(xp_total: u64) -> u16 {
    let spec = band_spec_for_xp(xp_total);
    if spec.band == XpBand::Mythic {
        let above = (xp_total - spec.xp_min) / MYTHIC_XP_PER_LEVEL;
        return (spec.level_min as u64 + above).min(MAX_XP_LEVEL as u64) as u16;
    }
    let levels = (spec.level_max - spec.level_min) as u64 + 1;
    let span = spec.xp_max - spec.xp_min + 1;
    let offset = (xp_total - spec.xp_min) * levels / span;
    spec.level_min + offset as u16
}

pub fn band_for_level(level: u16) -> XpBand {
    band_spec_for_level(level).band
}

/// Mining multiplier for an XP level, interpolated linearly between the
/// level's band endpoints. Always within [1.0, 5.0].
pub fn mining_multiplier(level: u16) -> Fixed {
    let spec = band_spec_for_level(level);
    let level = level.clamp(spec.level_min, spec.level_max);
    let lo = Fixed::from_percent(spec.mult_min_percent);
    if spec.level_max == spec.level_min {
        return lo;
    }
    let rise = spec.mult_max_percent - spec.mult_min_percent;
    let run = (spec.level_max - spec.level_min) as u64;
    let step = Fixed::from_ratio(rise * (level - spec.level_min) as u64, run * 100)
        .unwrap_or(Fixed::ZERO);
    lo.checked_add(step).unwrap_or(lo)
}

/// The band's daily $FIN cap at a level, interpolated like the multiplier.
/// Informational: accrual enforcement uses the phase cap.
pub fn band_daily_cap(level: u16) -> FinAmount {
    let spec = band_spec_for_level(level);
    let level = level.clamp(spec.level_min, spec.level_max);
    if spec.level_max == spec.level_min {
        return FinAmount::from_units(spec.cap_min_units).unwrap_or(FinAmount::ZERO);
    }
    let rise = (spec.cap_max_units - spec.cap_min_units) as u128;
    let run = (spec.level_max - spec.level_min) as u128;
    let units =
        spec.cap_min_units as u128 + rise * (level - spec.level_min) as u128 / run;
    FinAmount::from_units(units as u64).unwrap_or(FinAmount::ZERO)
}

/// Streak bonus: day one is neutral, +0.1x per further consecutive day,
/// with a 3.0x ceiling.
pub fn streak_bonus(streak_days: u32) -> Fixed {
    let extra_days = streak_days.saturating_sub(1) as u64;
    let bonus = Fixed::ONE
        .checked_add(Fixed::from_percent(STREAK_BONUS_STEP_PERCENT * extra_days))
        .unwrap_or(Fixed::ONE);
    bonus.min(Fixed::from_percent(STREAK_BONUS_CAP_PERCENT))
}

/// Progression decay on XP gains: e^(-0.01 x level).
pub fn level_decay(level: u16) -> Fixed {
    let arg = Fixed::from_ratio(
        LEVEL_DECAY_COEFF_NUM * level as u64,
        LEVEL_DECAY_COEFF_DEN,
    )
    .unwrap_or(Fixed::ZERO);
    Fixed::exp_neg(arg)
}

/// Recompute the stored level after an XP credit.
pub fn apply_xp_credit(xp_total: &mut u64, xp_level: &mut u16, gained: u64) -> Result<bool, EngineError> {
    *xp_total = xp_total
        .checked_add(gained)
        .ok_or(EngineError::ArithmeticOverflow)?;
    let new_level = level_for_xp(*xp_total);
    let changed = new_level != *xp_level;
    *xp_level = new_level;
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn levels_are_linear_within_bands() {
        assert_eq!(level_for_xp(0), 1);
        assert_eq!(level_for_xp(99), 1);
        assert_eq!(level_for_xp(100), 2);
        assert_eq!(level_for_xp(999), 10);
        assert_eq!(level_for_xp(1_000), 11);
        assert_eq!(level_for_xp(4_999), 25);
        assert_eq!(level_for_xp(5_000), 26);
        assert_eq!(level_for_xp(19_999), 50);
        assert_eq!(level_for_xp(20_000), 51);
        assert_eq!(level_for_xp(50_000), 76);
        assert_eq!(level_for_xp(99_999), 100);
        assert_eq!(level_for_xp(100_000), 101);
        assert_eq!(level_for_xp(10_000_000), 200);
    }

    #[test]
    fn every_level_maps_back_to_its_own_band() {
        for xp in [0u64, 500, 1_000, 3_000, 7_500, 25_000, 60_000, 150_000] {
            let level = level_for_xp(xp);
            let spec = band_spec_for_level(level);
            assert!(
                xp >= spec.xp_min && xp <= spec.xp_max,
                "xp {xp} landed at level {level} outside its band"
            );
        }
    }

    #[test]
    fn mining_multiplier_interpolates_band_endpoints() {
        assert_eq!(mining_multiplier(1), Fixed::from_percent(100));
        assert_eq!(mining_multiplier(10), Fixed::from_percent(120));
        assert_eq!(mining_multiplier(11), Fixed::from_percent(130));
        // Level 35 sits 9/24 through Gold: 1.9 + 0.375 x 0.6 = 2.125
        assert_eq!(mining_multiplier(35), Fixed::from_ratio(2_125, 1_000).unwrap());
        assert_eq!(mining_multiplier(200), Fixed::from_percent(500));
    }

    #[test]
    fn multiplier_is_monotone_in_level() {
        let mut prev = Fixed::ZERO;
        for level in 1..=MAX_XP_LEVEL {
            let m = mining_multiplier(level);
            assert!(m >= prev, "multiplier dropped at level {level}");
            assert!(m >= Fixed::ONE && m <= Fixed::from_int(5));
            prev = m;
        }
    }

    #[test]
    fn streak_bonus_neutral_on_day_one_capped_at_three() {
        assert_eq!(streak_bonus(0), Fixed::ONE);
        assert_eq!(streak_bonus(1), Fixed::ONE);
        assert_eq!(streak_bonus(2), Fixed::from_percent(110));
        assert_eq!(streak_bonus(21), Fixed::from_percent(300));
        assert_eq!(streak_bonus(400), Fixed::from_percent(300));
    }

    #[test]
    fn level_decay_shrinks_with_level() {
        assert!(level_decay(1) > level_decay(50));
        assert!(level_decay(50) > level_decay(200));
        // e^-0.01 = 0.99005
        let d1 = level_decay(1).to_f64_lossy();
        assert!((d1 - 0.990_05).abs() < 1e-4);
    }

    #[test]
    fn xp_credit_reports_level_changes() {
        let mut xp = 90u64;
        let mut level = 1u16;
        assert!(apply_xp_credit(&mut xp, &mut level, 20).unwrap());
        assert_eq!(level, 2);
        assert!(!apply_xp_credit(&mut xp, &mut level, 5).unwrap());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn level_is_always_in_range_and_monotone(xp in 0u64..10_000_000, step in 1u64..10_000) {
                let level = level_for_xp(xp);
                prop_assert!((1..=MAX_XP_LEVEL).contains(&level));
                prop_assert!(level_for_xp(xp + step) >= level);
            }

            #[test]
            fn level_band_contains_its_xp(xp in 0u64..1_000_000) {
                let level = level_for_xp(xp);
                let spec = band_spec_for_level(level);
                prop_assert!(xp >= spec.xp_min && xp <= spec.xp_max);
            }

            #[test]
            fn multiplier_stays_in_declared_bounds(level in 1u16..=MAX_XP_LEVEL) {
                let m = mining_multiplier(level);
                prop_assert!(m >= Fixed::ONE);
                prop_assert!(m <= Fixed::from_int(5));
            }
        }
    }
}
