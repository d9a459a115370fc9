//! Mining session lifecycle and the continuous-accrual scheduler.

use std::sync::Arc;

use uuid::Uuid;

use crate::adapters::{
    update_user_with_retry, Clock, OutboxEmitter, RandomSource, RewardEventLog, UserStateStore,
};
use crate::antibot::AntiBotScorer;
use crate::calculator::{self, RateInputs};
use crate::cards::CardEffectEngine;
use crate::constants::*;
use crate::errors::EngineError;
use crate::events::EngineEvent;
use crate::math::{FinAmount, Fixed};
use crate::oracle::CachedPhaseOracle;
use crate::referral::ReferralNetworkManager;
use crate::state::mining::{CloseReason, MiningSession, SessionStatus};
use crate::state::rewards::{EventLogRecord, IdempotencyKey, Intent, LogKind};
use crate::state::user::UserId;
use crate::utils::day_number;

/// Result of a successful claim.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimResult {
    pub amount: FinAmount,
    pub intents: Vec<Intent>,
}

/// Result of stopping a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopResult {
    pub total_earned: FinAmount,
    pub duration_s: u64,
}

/// Summary of one accrual tick over all open sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickSummary {
    pub accrued_sessions: usize,
    pub suspended: usize,
    pub closed: usize,
}

pub struct SessionManager {
    store: Arc<dyn UserStateStore>,
    event_log: Arc<dyn RewardEventLog>,
    emitter: Arc<OutboxEmitter>,
    oracle: Arc<CachedPhaseOracle>,
    antibot: Arc<AntiBotScorer>,
    cards: Arc<CardEffectEngine>,
    referral: Arc<ReferralNetworkManager>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
}

impl SessionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn UserStateStore>,
        event_log: Arc<dyn RewardEventLog>,
        emitter: Arc<OutboxEmitter>,
        oracle: Arc<CachedPhaseOracle>,
        antibot: Arc<AntiBotScorer>,
        cards: Arc<CardEffectEngine>,
        referral: Arc<ReferralNetworkManager>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        SessionManager {
            store,
            event_log,
            emitter,
            oracle,
            antibot,
            cards,
            referral,
            clock,
            random,
        }
    }

    /// Start a session. There is at most one Active session per user; a
    /// cooldown from a previous anti-bot close must have lapsed; the user
    /// must pass the anti-bot gate.
    pub async fn start(&self, user_id: &UserId) -> Result<MiningSession, EngineError> {
        let now = self.clock.now();
        let user = self.store.get_user(user_id).await?;
        if user.banned {
            return Err(EngineError::UserBanned);
        }

        if let Some(existing) = self.store.get_session(user_id).await? {
            match existing.status {
                SessionStatus::Active => return Err(EngineError::MiningAlreadyActive),
                SessionStatus::Suspended => return Err(EngineError::SessionSuspended),
                SessionStatus::Closed => {
                    if existing.blocks_restart(now) {
                        return Err(EngineError::CooldownActive);
                    }
                }
            }
        }

        let snapshot = self.referral.snapshot_for(user_id).await?;
        let assessment = self
            .antibot
            .evaluate(&user, Some(&snapshot), None)
            .await?;
        if assessment.blocks_session_start() {
            return Err(EngineError::SuspiciousActivity {
                reason: "session start blocked by behavioral score".into(),
            });
        }

        let phase = self.oracle.get().await?;
        let bonuses = self.cards.bonuses_for(user_id).await?;
        let (rate, _) = calculator::mining_rate(&RateInputs {
            user: &user,
            phase: &phase,
            quality: user.quality_score_recent,
            human: assessment.score,
            active_l1_referrals: snapshot.l1_active,
            card_mining_bonus: bonuses.mining,
        })?;

        let session_id = Uuid::from_u128(
            ((self.random.next_u64() as u128) << 64) | self.random.next_u64() as u128,
        );
        let session = MiningSession::start(
            user_id.clone(),
            session_id,
            rate,
            assessment.score,
            now,
        );
        self.store.put_session(&session).await?;
        self.event_log
            .append(
                user_id,
                EventLogRecord {
                    seq: 0,
                    ts: now.timestamp_millis() as u64,
                    kind: LogKind::SessionStarted,
                    fin_delta: 0,
                    xp_delta: 0,
                    rp_delta: 0,
                    factors: Default::default(),
                    provenance: format!("session:{session_id}"),
                },
            )
            .await?;

        log::info!("mining session {session_id} started for {user_id} at {rate}/h");
        Ok(session)
    }

    /// One scheduler pass over every open session, in batches.
    pub async fn run_accrual_tick(&self) -> Result<TickSummary, EngineError> {
        let mut summary = TickSummary::default();
        let open = self.store.open_sessions().await?;
        for batch in open.chunks(ACCRUAL_BATCH_SIZE) {
            for user_id in batch {
                match self.tick_one(user_id, &mut summary).await {
                    Ok(()) => {}
                    Err(err) => {
                        // One bad session must not stall the sweep.
                        log::error!("accrual tick failed for {user_id}: {err}");
                    }
                }
            }
        }
        Ok(summary)
    }

    async fn tick_one(
        &self,
        user_id: &UserId,
        summary: &mut TickSummary,
    ) -> Result<(), EngineError> {
        let now = self.clock.now();
        let mut session = match self.store.get_session(user_id).await? {
            Some(session) => session,
            None => return Ok(()),
        };

        if session.status == SessionStatus::Suspended {
            if session.suspended_past_grace(now) {
                session.close(CloseReason::AntiBot, now)?;
                self.store.put_session(&session).await?;
                self.log_session_closed(&session, "suspension grace expired").await?;
                summary.closed += 1;
            }
            return Ok(());
        }
        if session.status != SessionStatus::Active {
            return Ok(());
        }

        // Re-check the human probability before crediting anything.
        let user = self.store.get_user(user_id).await?;
        let snapshot = self.referral.snapshot_for(user_id).await?;
        let assessment = self.antibot.evaluate(&user, Some(&snapshot), None).await?;
        if assessment.blocks_accrual() {
            session.suspend(now)?;
            self.store.put_session(&session).await?;
            let seq = self
                .event_log
                .append(
                    user_id,
                    EventLogRecord {
                        seq: 0,
                        ts: now.timestamp_millis() as u64,
                        kind: LogKind::Suspension,
                        fin_delta: 0,
                        xp_delta: 0,
                        rp_delta: 0,
                        factors: Default::default(),
                        provenance: format!("session:{}", session.session_id),
                    },
                )
                .await?;
            self.emitter
                .emit(
                    Intent::Notification {
                        user_id: user_id.clone(),
                        event: EngineEvent::SessionSuspended {
                            reason: "behavioral score below accrual threshold".into(),
                        },
                    },
                    IdempotencyKey {
                        user_id: user_id.clone(),
                        seq,
                    },
                )
                .await;
            summary.suspended += 1;
            return Ok(());
        }

        let elapsed_minutes = session.minutes_since_accrual(now);
        if elapsed_minutes >= 1 {
            let phase = self.oracle.get().await?;
            let gross = session
                .current_rate_per_hour
                .mul_fixed(Fixed::from_ratio(elapsed_minutes as u64, 60)?)?;
            let allowed = user.remaining_daily_allowance(phase.daily_cap, now);
            let increment = gross.min(allowed);

            session.last_accrual_at = now;
            if !increment.is_zero() {
                session.accrued_unclaimed = session.accrued_unclaimed.checked_add(increment)?;
                let today = day_number(now);
                update_user_with_retry(self.store.as_ref(), self.random.as_ref(), user_id, |u| {
                    u.daily.roll(today);
                    u.daily.mined_today = u.daily.mined_today.checked_add(increment)?;
                    u.total_earned = u.total_earned.checked_add(increment)?;
                    Ok(())
                })
                .await?;
                self.event_log
                    .append(
                        user_id,
                        EventLogRecord {
                            seq: 0,
                            ts: now.timestamp_millis() as u64,
                            kind: LogKind::Accrual,
                            fin_delta: increment.as_units() as i64,
                            xp_delta: 0,
                            rp_delta: 0,
                            factors: Default::default(),
                            provenance: format!("session:{}", session.session_id),
                        },
                    )
                    .await?;
                summary.accrued_sessions += 1;
            }
            self.store.put_session(&session).await?;
        }

        if session.past_lifetime(now) {
            session.close(CloseReason::Timeout, now)?;
            self.store.put_session(&session).await?;
            self.log_session_closed(&session, "24h lifetime reached").await?;
            summary.closed += 1;
        }
        Ok(())
    }

    /// Claim accrued rewards: zero the balance, mint to the wallet, fan the
    /// claim out to L1-L3 referrers.
    pub async fn claim(&self, user_id: &UserId) -> Result<ClaimResult, EngineError> {
        let now = self.clock.now();
        let mut session = self
            .store
            .get_session(user_id)
            .await?
            .ok_or(EngineError::MiningNotActive)?;
        if session.status == SessionStatus::Suspended {
            return Err(EngineError::SessionSuspended);
        }
        let amount = session.accrued_unclaimed;
        if amount.is_zero() {
            return Err(EngineError::NoRewardsToClaim);
        }

        session.accrued_unclaimed = FinAmount::ZERO;
        if session.status == SessionStatus::Active {
            session.close(CloseReason::Claimed, now)?;
        }
        self.store.put_session(&session).await?;

        update_user_with_retry(self.store.as_ref(), self.random.as_ref(), user_id, |u| {
            u.holdings = u.holdings.checked_add(amount)?;
            Ok(())
        })
        .await?;

        let claim_id = session.session_id.to_string();
        let seq = self
            .event_log
            .append(
                user_id,
                EventLogRecord {
                    seq: 0,
                    ts: now.timestamp_millis() as u64,
                    kind: LogKind::Claim,
                    fin_delta: amount.as_units() as i64,
                    xp_delta: 0,
                    rp_delta: 0,
                    factors: Default::default(),
                    provenance: format!("claim:{claim_id}"),
                },
            )
            .await?;

        // The claimer's mint goes out first; fan-out credits follow tagged
        // with the same claim id.
        let mint = Intent::Mint {
            user_id: user_id.clone(),
            amount,
            provenance: format!("claim:{claim_id}"),
        };
        self.emitter
            .emit(
                mint.clone(),
                IdempotencyKey {
                    user_id: user_id.clone(),
                    seq,
                },
            )
            .await;
        self.emitter
            .emit(
                Intent::Notification {
                    user_id: user_id.clone(),
                    event: EngineEvent::MiningClaimed { amount },
                },
                IdempotencyKey {
                    user_id: user_id.clone(),
                    seq,
                },
            )
            .await;

        let mut intents = vec![mint];
        let (_, fan_out_intents) = self
            .referral
            .fan_out_claim(user_id, amount, &claim_id)
            .await?;
        intents.extend(fan_out_intents);

        log::info!("{user_id} claimed {amount}");
        Ok(ClaimResult { amount, intents })
    }

    /// Stop an active session. Accrued rewards stay claimable.
    pub async fn stop(&self, user_id: &UserId) -> Result<StopResult, EngineError> {
        let now = self.clock.now();
        let mut session = self
            .store
            .get_session(user_id)
            .await?
            .ok_or(EngineError::MiningNotActive)?;
        if session.status != SessionStatus::Active {
            return Err(EngineError::MiningNotActive);
        }
        session.close(CloseReason::ManualStop, now)?;
        self.store.put_session(&session).await?;
        self.log_session_closed(&session, "manual stop").await?;

        Ok(StopResult {
            total_earned: session.accrued_unclaimed,
            duration_s: now
                .signed_duration_since(session.started_at)
                .num_seconds()
                .max(0) as u64,
        })
    }

    /// Suspend a user's active session from the outside (a Critical
    /// finding during event processing).
    pub async fn suspend_if_active(
        &self,
        user_id: &UserId,
        reason: &str,
    ) -> Result<bool, EngineError> {
        let now = self.clock.now();
        let Some(mut session) = self.store.get_session(user_id).await? else {
            return Ok(false);
        };
        if session.status != SessionStatus::Active {
            return Ok(false);
        }
        session.suspend(now)?;
        self.store.put_session(&session).await?;
        let seq = self
            .event_log
            .append(
                user_id,
                EventLogRecord {
                    seq: 0,
                    ts: now.timestamp_millis() as u64,
                    kind: LogKind::Suspension,
                    fin_delta: 0,
                    xp_delta: 0,
                    rp_delta: 0,
                    factors: Default::default(),
                    provenance: reason.to_string(),
                },
            )
            .await?;
        self.emitter
            .emit(
                Intent::Notification {
                    user_id: user_id.clone(),
                    event: EngineEvent::SessionSuspended {
                        reason: reason.to_string(),
                    },
                },
                IdempotencyKey {
                    user_id: user_id.clone(),
                    seq,
                },
            )
            .await;
        Ok(true)
    }

    /// Update the stored rate for the next tick, if a session is active.
    pub async fn reprice(&self, user_id: &UserId, rate: FinAmount) -> Result<(), EngineError> {
        if let Some(mut session) = self.store.get_session(user_id).await? {
            if session.status == SessionStatus::Active {
                session.current_rate_per_hour = rate;
                self.store.put_session(&session).await?;
            }
        }
        Ok(())
    }

    async fn log_session_closed(
        &self,
        session: &MiningSession,
        detail: &str,
    ) -> Result<(), EngineError> {
        let now = self.clock.now();
        let seq = self
            .event_log
            .append(
                &session.user_id,
                EventLogRecord {
                    seq: 0,
                    ts: now.timestamp_millis() as u64,
                    kind: LogKind::SessionClosed,
                    fin_delta: 0,
                    xp_delta: 0,
                    rp_delta: 0,
                    factors: Default::default(),
                    provenance: format!("session:{}:{detail}", session.session_id),
                },
            )
            .await?;
        self.emitter
            .emit(
                Intent::Notification {
                    user_id: session.user_id.clone(),
                    event: EngineEvent::SessionClosed {
                        reason: detail.to_string(),
                    },
                },
                IdempotencyKey {
                    user_id: session.user_id.clone(),
                    seq,
                },
            )
            .await;
        Ok(())
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager").finish_non_exhaustive()
    }
}
