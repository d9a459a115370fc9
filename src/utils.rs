//! Utility helpers shared across the engine.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::constants::QUALITY_EMA_ALPHA_PERCENT;
use crate::math::Fixed;
use crate::state::user::UserId;

/// Alphabet for referral codes: no 0/O or 1/I lookalikes.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 8;

/// Generates the user's referral code.
///
/// Deterministic per user id: the first bytes of a SHA-256 digest, mapped
/// onto a human-safe alphabet.
pub fn generate_referral_code(user_id: &UserId) -> String {
    let digest = Sha256::digest(user_id.as_str().as_bytes());
    let code: String = digest
        .iter()
        .take(CODE_LENGTH)
        .map(|b| CODE_ALPHABET[*b as usize % CODE_ALPHABET.len()] as char)
        .collect();
    format!("FIN-{code}")
}

/// UTC day number (days since the Unix epoch). All daily caps and streaks
/// run on UTC day boundaries.
pub fn day_number(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(86_400)
}

/// Exponential moving average with the engine's smoothing factor:
/// `alpha x observation + (1 - alpha) x previous`.
pub fn quality_ema(previous: Fixed, observation: Fixed) -> Fixed {
    let alpha = Fixed::from_percent(QUALITY_EMA_ALPHA_PERCENT);
    let one_minus = Fixed::ONE.saturating_sub(alpha);
    let new_part = observation.checked_mul(alpha).unwrap_or(observation);
    let old_part = previous.checked_mul(one_minus).unwrap_or(previous);
    new_part.checked_add(old_part).unwrap_or(observation)
}

/// Exponential backoff with jitter: `base x 2^attempt + jitter`, jitter in
/// `[0, base)` from the seeded random source.
pub fn backoff_delay_ms(base_ms: u64, attempt: u32, jitter_source: u64) -> u64 {
    let exp = base_ms.saturating_mul(1u64 << attempt.min(8));
    exp.saturating_add(jitter_source % base_ms.max(1))
}
