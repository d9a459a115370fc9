//! Mining session lifecycle.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::*;
use crate::errors::EngineError;
use crate::math::{FinAmount, Fixed};
use crate::state::user::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Active,
    Suspended,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    Claimed,
    Timeout,
    ManualStop,
    AntiBot,
    AdminClose,
}

impl CloseReason {
    /// Cooldown imposed before a new session may start.
    pub fn cooldown_secs(&self) -> i64 {
        match self {
            CloseReason::AntiBot => ANTI_BOT_CLOSE_COOLDOWN_SECS,
            _ => 0,
        }
    }
}

/// A user's mining session. At most one Active session exists per user;
/// lifetime is bounded at 24 hours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiningSession {
    pub user_id: UserId,
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub last_accrual_at: DateTime<Utc>,
    pub current_rate_per_hour: FinAmount,
    pub accrued_unclaimed: FinAmount,
    pub human_score_at_start: Fixed,
    pub status: SessionStatus,
    pub close_reason: Option<CloseReason>,
    /// Set on suspension; drives the one-hour auto-close.
    pub suspended_at: Option<DateTime<Utc>>,
    /// Earliest start time for the user's next session.
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl MiningSession {
    pub fn start(
        user_id: UserId,
        session_id: Uuid,
        rate_per_hour: FinAmount,
        human_score: Fixed,
        now: DateTime<Utc>,
    ) -> Self {
        MiningSession {
            user_id,
            session_id,
            started_at: now,
            last_accrual_at: now,
            current_rate_per_hour: rate_per_hour,
            accrued_unclaimed: FinAmount::ZERO,
            human_score_at_start: human_score,
            status: SessionStatus::Active,
            close_reason: None,
            suspended_at: None,
            cooldown_until: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Whole minutes elapsed since the last accrual.
    pub fn minutes_since_accrual(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.last_accrual_at).num_minutes()
    }

    /// True once the session has lived out its 24 hours.
    pub fn past_lifetime(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.started_at)
            >= Duration::hours(SESSION_MAX_HOURS)
    }

    pub fn suspend(&mut self, now: DateTime<Utc>) -> Result<(), EngineError> {
        if self.status != SessionStatus::Active {
            return Err(EngineError::MiningNotActive);
        }
        self.status = SessionStatus::Suspended;
        self.suspended_at = Some(now);
        Ok(())
    }

    pub fn close(&mut self, reason: CloseReason, now: DateTime<Utc>) -> Result<(), EngineError> {
        match self.status {
            SessionStatus::Closed => return Err(EngineError::MiningNotActive),
            SessionStatus::Suspended => {
                // Suspended sessions only leave through an anti-bot or
                // administrative close.
                if !matches!(reason, CloseReason::AntiBot | CloseReason::AdminClose) {
                    return Err(EngineError::SessionSuspended);
                }
            }
            SessionStatus::Active => {}
        }
        self.status = SessionStatus::Closed;
        self.close_reason = Some(reason);
        let cooldown = reason.cooldown_secs();
        if cooldown > 0 {
            self.cooldown_until = Some(now + Duration::seconds(cooldown));
        }
        Ok(())
    }

    /// True when a suspended session has sat for its grace hour.
    pub fn suspended_past_grace(&self, now: DateTime<Utc>) -> bool {
        match (self.status, self.suspended_at) {
            (SessionStatus::Suspended, Some(at)) => {
                now.signed_duration_since(at).num_seconds() >= SUSPENDED_AUTO_CLOSE_SECS
            }
            _ => false,
        }
    }

    /// Whether a new session may start at `now`, given this (closed) one.
    pub fn blocks_restart(&self, now: DateTime<Utc>) -> bool {
        match self.cooldown_until {
            Some(until) => now < until,
            None => false,
        }
    }
}
