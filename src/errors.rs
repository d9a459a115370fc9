//! Error types for the Finova reward engine.

use thiserror::Error;

/// Coarse classification of an [`EngineError`], driving the retry and
/// degradation policy of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input; surfaced to the caller, never retried.
    Validation,
    /// Optimistic-concurrency conflict; retried with jittered backoff.
    Conflict,
    /// Anti-bot rejection; surfaced with a reason code, never retried.
    AntiBot,
    /// A dependency exceeded its time budget; degrade to neutral values.
    Timeout,
    /// A dependency is down; abort and re-enqueue, or park in the outbox.
    Unavailable,
    /// An internal invariant was broken; halt the user's processing.
    Invariant,
    /// An engine-enforced rate limit fired.
    RateLimit,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid amount specified. Amount must be greater than zero.")]
    InvalidAmount,

    #[error("Invalid parameter: {0}.")]
    InvalidParameter(String),

    #[error("The user does not exist.")]
    UnknownUser,

    #[error("The user account is banned.")]
    UserBanned,

    #[error("Mining session is already active.")]
    MiningAlreadyActive,

    #[error("Mining session is not currently active.")]
    MiningNotActive,

    #[error("There are no rewards to claim at this time.")]
    NoRewardsToClaim,

    #[error("The mining session is suspended.")]
    SessionSuspended,

    #[error("A cooldown is active; the operation cannot start yet.")]
    CooldownActive,

    #[error("The referral code is not valid.")]
    InvalidReferralCode,

    #[error("A user cannot refer themselves.")]
    SelfReferral,

    #[error("The user has already been referred.")]
    AlreadyReferred,

    #[error("The referral would create a cycle in the network.")]
    CircularReferral,

    #[error("The referrer's network is at its tier capacity.")]
    NetworkCapExceeded,

    #[error("The card is not owned by this user.")]
    CardNotOwned,

    #[error("The card type is still cooling down for this user.")]
    CardCooldownActive,

    #[error("The active-boost limit for this user's level has been reached.")]
    CardCapExceeded,

    #[error("The card cannot be combined with the currently active effects.")]
    CardIncompatible,

    #[error("Suspicious activity detected: {reason}.")]
    SuspiciousActivity { reason: String },

    #[error("Rate limit exceeded for {operation}.")]
    RateLimited { operation: &'static str },

    #[error("Concurrent update conflict; retries exhausted.")]
    ConcurrencyConflict,

    #[error("Dependency '{dependency}' exceeded its time budget.")]
    DependencyTimeout { dependency: &'static str },

    #[error("Dependency '{dependency}' is unavailable.")]
    DependencyUnavailable {
        dependency: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("Invariant violation: {0}.")]
    InvariantViolation(String),

    #[error("Arithmetic overflow in reward calculation.")]
    ArithmeticOverflow,

    #[error("Token amount exceeds the total supply bound.")]
    SupplyExceeded,
}

impl EngineError {
    /// Stable machine-readable code for the caller-facing surface.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidAmount => "INVALID_AMOUNT",
            EngineError::InvalidParameter(_) => "INVALID_PARAMETER",
            EngineError::UnknownUser => "UNKNOWN_USER",
            EngineError::UserBanned => "USER_BANNED",
            EngineError::MiningAlreadyActive => "ALREADY_ACTIVE",
            EngineError::MiningNotActive => "NO_SESSION",
            EngineError::NoRewardsToClaim => "EMPTY",
            EngineError::SessionSuspended => "SUSPENDED",
            EngineError::CooldownActive => "COOLDOWN",
            EngineError::InvalidReferralCode => "INVALID_CODE",
            EngineError::SelfReferral => "SELF_REFERRAL",
            EngineError::AlreadyReferred => "ALREADY_REFERRED",
            EngineError::CircularReferral => "CYCLE",
            EngineError::NetworkCapExceeded => "NETWORK_CAP",
            EngineError::CardNotOwned => "NOT_OWNED",
            EngineError::CardCooldownActive => "COOLDOWN_ACTIVE",
            EngineError::CardCapExceeded => "CAP_EXCEEDED",
            EngineError::CardIncompatible => "INCOMPATIBLE",
            EngineError::SuspiciousActivity { .. } => "SUSPICIOUS",
            EngineError::RateLimited { .. } => "RATE_LIMITED",
            EngineError::ConcurrencyConflict => "CONFLICT",
            EngineError::DependencyTimeout { .. } => "DEPENDENCY_TIMEOUT",
            EngineError::DependencyUnavailable { .. } => "DEPENDENCY_UNAVAILABLE",
            EngineError::InvariantViolation(_) => "INVARIANT_VIOLATION",
            EngineError::ArithmeticOverflow => "OVERFLOW",
            EngineError::SupplyExceeded => "SUPPLY_EXCEEDED",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::InvalidAmount
            | EngineError::InvalidParameter(_)
            | EngineError::UnknownUser
            | EngineError::UserBanned
            | EngineError::MiningAlreadyActive
            | EngineError::MiningNotActive
            | EngineError::NoRewardsToClaim
            | EngineError::SessionSuspended
            | EngineError::CooldownActive
            | EngineError::InvalidReferralCode
            | EngineError::SelfReferral
            | EngineError::AlreadyReferred
            | EngineError::CircularReferral
            | EngineError::NetworkCapExceeded
            | EngineError::CardNotOwned
            | EngineError::CardCooldownActive
            | EngineError::CardCapExceeded
            | EngineError::CardIncompatible => ErrorClass::Validation,
            EngineError::SuspiciousActivity { .. } => ErrorClass::AntiBot,
            EngineError::RateLimited { .. } => ErrorClass::RateLimit,
            EngineError::ConcurrencyConflict => ErrorClass::Conflict,
            EngineError::DependencyTimeout { .. } => ErrorClass::Timeout,
            EngineError::DependencyUnavailable { .. } => ErrorClass::Unavailable,
            EngineError::InvariantViolation(_)
            | EngineError::ArithmeticOverflow
            | EngineError::SupplyExceeded => ErrorClass::Invariant,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(EngineError::MiningAlreadyActive.code(), "ALREADY_ACTIVE");
        assert_eq!(EngineError::ConcurrencyConflict.code(), "CONFLICT");
        assert_eq!(
            EngineError::RateLimited { operation: "claim" }.code(),
            "RATE_LIMITED"
        );
    }

    #[test]
    fn classes_follow_the_retry_policy() {
        assert_eq!(
            EngineError::ConcurrencyConflict.class(),
            ErrorClass::Conflict
        );
        assert_eq!(
            EngineError::DependencyTimeout {
                dependency: "quality-scorer"
            }
            .class(),
            ErrorClass::Timeout
        );
        assert_eq!(EngineError::CircularReferral.class(), ErrorClass::Validation);
        assert_eq!(
            EngineError::InvariantViolation("daily cap".into()).class(),
            ErrorClass::Invariant
        );
    }
}
