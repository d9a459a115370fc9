//! The reward orchestrator: one entry point per external operation.
//!
//! Each operation runs under the caller's per-user lease, reads through the
//! adapters, applies the reward model, and commits the user mutation as one
//! optimistic store write. Anti-bot and quality calls are bounded by their
//! time budgets and degrade to neutral values; only the state store can
//! abort an operation.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::adapters::{
    update_user_with_retry, AntiBotSignals, Clock, IntentEmitter, OutboxEmitter, PhaseOracle,
    QualityScorer, RandomSource, RewardEventLog, UserStateStore,
};
use crate::antibot::{AntiBotScorer, HumanAssessment, Severity, SweepFlag};
use crate::calculator::{self, EventInputs, RateInputs};
use crate::cards::{Activation, CardEffectEngine};
use crate::constants::*;
use crate::errors::EngineError;
use crate::events::EngineEvent;
use crate::math::{FinAmount, Fixed};
use crate::oracle::{CachedPhaseOracle, MiningPhase};
use crate::quality::QualityGate;
use crate::referral::{ReferralApplied, ReferralNetworkManager};
use crate::session::{ClaimResult, SessionManager, StopResult, TickSummary};
use crate::state::activity::ActivityEvent;
use crate::state::card::CardKind;
use crate::state::mining::{MiningSession, SessionStatus};
use crate::state::referral::RpTier;
use crate::state::rewards::{
    EventLogRecord, IdempotencyKey, Intent, LogKind, OutcomeNote, RewardOutcome,
};
use crate::state::user::{User, UserId};
use crate::state::xp::{self, XpBand};
use crate::utils::{day_number, quality_ema};

/// Everything the engine needs from the outside world.
pub struct EngineDeps {
    pub store: Arc<dyn UserStateStore>,
    pub event_log: Arc<dyn RewardEventLog>,
    pub oracle: Arc<dyn PhaseOracle>,
    pub quality_scorer: Arc<dyn QualityScorer>,
    pub signals: Arc<dyn AntiBotSignals>,
    pub emitter: Arc<dyn IntentEmitter>,
    pub clock: Arc<dyn Clock>,
    pub random: Arc<dyn RandomSource>,
}

/// Mining status answer for `query_rate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateStatus {
    pub current_rate_per_hour: FinAmount,
    pub daily_cap: FinAmount,
    pub today_earned: FinAmount,
    pub phase: MiningPhase,
}

/// Aggregate user view for `query_stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStatsDto {
    pub user_id: UserId,
    pub xp_total: u64,
    pub xp_level: u16,
    pub xp_band: XpBand,
    pub mining_multiplier: Fixed,
    /// The band's informational daily $FIN cap at this level.
    pub band_daily_cap: FinAmount,
    pub rp_total: u64,
    pub rp_tier: RpTier,
    pub streak_days: u32,
    pub holdings: FinAmount,
    pub staked: FinAmount,
    pub total_earned: FinAmount,
    pub human_score: Fixed,
    pub quality_score_recent: Fixed,
    pub referral_code: String,
    pub session_status: Option<SessionStatus>,
    pub l1_count: u32,
    pub l1_active: u32,
    pub l2_count: u32,
    pub l3_count: u32,
    pub network_quality: Fixed,
}

struct RateLimiter {
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<(UserId, &'static str), VecDeque<DateTime<Utc>>>>,
}

impl RateLimiter {
    fn new(clock: Arc<dyn Clock>) -> Self {
        RateLimiter {
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn check(
        &self,
        user_id: &UserId,
        operation: &'static str,
        window_secs: i64,
        max: usize,
    ) -> Result<(), EngineError> {
        let now = self.clock.now();
        let mut windows = self.windows.lock();
        let window = windows
            .entry((user_id.clone(), operation))
            .or_default();
        while let Some(front) = window.front() {
            if now.signed_duration_since(*front).num_seconds() >= window_secs {
                window.pop_front();
            } else {
                break;
            }
        }
        if window.len() >= max {
            return Err(EngineError::RateLimited { operation });
        }
        window.push_back(now);
        Ok(())
    }
}

pub struct RewardEngine {
    store: Arc<dyn UserStateStore>,
    event_log: Arc<dyn RewardEventLog>,
    emitter: Arc<OutboxEmitter>,
    oracle: Arc<CachedPhaseOracle>,
    quality: QualityGate,
    antibot: Arc<AntiBotScorer>,
    cards: Arc<CardEffectEngine>,
    referral: Arc<ReferralNetworkManager>,
    sessions: SessionManager,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    limiter: RateLimiter,
    leases: Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
}

impl RewardEngine {
    pub fn new(deps: EngineDeps) -> Self {
        let emitter = Arc::new(OutboxEmitter::new(deps.emitter));
        let oracle = Arc::new(CachedPhaseOracle::new(deps.oracle, deps.clock.clone()));
        let antibot = Arc::new(AntiBotScorer::new(deps.signals));
        let cards = Arc::new(CardEffectEngine::new(
            deps.store.clone(),
            deps.clock.clone(),
        ));
        let referral = Arc::new(ReferralNetworkManager::new(
            deps.store.clone(),
            deps.event_log.clone(),
            emitter.clone(),
            deps.clock.clone(),
            deps.random.clone(),
        ));
        let sessions = SessionManager::new(
            deps.store.clone(),
            deps.event_log.clone(),
            emitter.clone(),
            oracle.clone(),
            antibot.clone(),
            cards.clone(),
            referral.clone(),
            deps.clock.clone(),
            deps.random.clone(),
        );
        RewardEngine {
            store: deps.store,
            event_log: deps.event_log,
            emitter,
            oracle,
            quality: QualityGate::new(deps.quality_scorer, deps.clock.clone()),
            antibot,
            cards,
            referral,
            sessions,
            clock: deps.clock.clone(),
            random: deps.random,
            limiter: RateLimiter::new(deps.clock),
            leases: Mutex::new(HashMap::new()),
        }
    }

    fn lease(&self, user_id: &UserId) -> Arc<tokio::sync::Mutex<()>> {
        self.leases
            .lock()
            .entry(user_id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Create a user record. First registration wins; the record is only
    /// mutated by the orchestrator afterwards.
    pub async fn register_user(
        &self,
        user_id: UserId,
        kyc_verified: bool,
    ) -> Result<User, EngineError> {
        let now = self.clock.now();
        let user = User::register(user_id.clone(), kyc_verified, now);
        self.store.insert_user(user.clone()).await?;
        self.event_log
            .append(
                &user_id,
                EventLogRecord {
                    seq: 0,
                    ts: now.timestamp_millis() as u64,
                    kind: LogKind::Registration,
                    fin_delta: 0,
                    xp_delta: 0,
                    rp_delta: 0,
                    factors: Default::default(),
                    provenance: "registration".into(),
                },
            )
            .await?;
        log::info!("registered {user_id} (kyc: {kyc_verified})");
        Ok(user)
    }

    /// Mark a user KYC-verified once the provider confirms.
    ///
    /// Idempotent: a repeated call changes nothing and credits nobody. The
    /// security bonus flips on the next rate computation; the user's
    /// referrer earns the one-time KYC RP grant.
    pub async fn complete_kyc(&self, user_id: &UserId) -> Result<User, EngineError> {
        let lease = self.lease(user_id);
        let _guard = lease.lock().await;
        let now = self.clock.now();
        let user = self.store.get_user(user_id).await?;
        if user.banned {
            return Err(EngineError::UserBanned);
        }
        if user.kyc_verified {
            return Ok(user);
        }

        let updated = update_user_with_retry(
            self.store.as_ref(),
            self.random.as_ref(),
            user_id,
            |u| {
                u.kyc_verified = true;
                Ok(())
            },
        )
        .await?;

        self.event_log
            .append(
                user_id,
                EventLogRecord {
                    seq: 0,
                    ts: now.timestamp_millis() as u64,
                    kind: LogKind::KycVerified,
                    fin_delta: 0,
                    xp_delta: 0,
                    rp_delta: 0,
                    factors: Default::default(),
                    provenance: "kyc:verified".into(),
                },
            )
            .await?;

        self.referral.on_referee_kyc(user_id).await?;

        log::info!("{user_id} completed KYC verification");
        Ok(updated)
    }

    /// Process one activity event. Idempotent on
    /// `(user_id, client_event_id)`: replays return the recorded outcome
    /// and emit nothing.
    pub async fn process_activity(
        &self,
        event: ActivityEvent,
    ) -> Result<RewardOutcome, EngineError> {
        let user_id = event.user_id.clone();
        let lease = self.lease(&user_id);
        let _guard = lease.lock().await;

        if let Some(existing) = self
            .store
            .get_outcome(&user_id, &event.client_event_id)
            .await?
        {
            log::debug!("replayed outcome for {user_id}/{}", event.client_event_id);
            return Ok(existing);
        }

        tokio::time::timeout(
            Duration::from_millis(EVENT_HANDLER_BUDGET_MS),
            self.process_activity_inner(event),
        )
        .await
        .map_err(|_| EngineError::DependencyTimeout {
            dependency: "event-handler",
        })?
    }

    async fn process_activity_inner(
        &self,
        event: ActivityEvent,
    ) -> Result<RewardOutcome, EngineError> {
        let user_id = event.user_id.clone();
        let now = self.clock.now();
        let user = self.store.get_user(&user_id).await?;
        if user.banned {
            return Err(EngineError::UserBanned);
        }

        let snapshot = self.referral.snapshot_for(&user_id).await?;
        let assessment = self.assess_with_budget(&user, &event, &snapshot).await;

        let mut notes = Vec::new();
        if assessment.has_critical() {
            self.sessions
                .suspend_if_active(&user_id, "critical behavioral finding")
                .await?;
        }

        let quality = if !assessment.has_critical()
            && assessment.score >= Fixed::from_percent(HUMAN_SCORE_SESSION_START_MIN_PERCENT)
        {
            let verdict = self
                .quality
                .score(event.content_ref.as_deref(), event.platform)
                .await;
            if verdict.degraded {
                notes.push(OutcomeNote::DegradedQuality);
            }
            verdict.score
        } else {
            notes.push(OutcomeNote::DegradedQuality);
            Fixed::from_percent(50)
        };

        let phase = self.oracle.get().await?;
        let bonuses = self.cards.bonuses_for(&user_id).await?;
        let suspicious = if assessment.has_at_least(Severity::Medium) {
            assessment.suspicious_score()
        } else {
            Fixed::ZERO
        };

        let today = day_number(now);
        let events_today_of_kind = if user.daily.day == today {
            user.daily.count_for(event.kind)
        } else {
            0
        };

        let computation = calculator::compute_event(&EventInputs {
            rate: RateInputs {
                user: &user,
                phase: &phase,
                quality,
                human: assessment.score,
                active_l1_referrals: snapshot.l1_active,
                card_mining_bonus: bonuses.mining,
            },
            kind: event.kind,
            platform: event.platform,
            card_xp_bonus: bonuses.xp,
            card_rp_bonus: bonuses.rp,
            events_today_of_kind,
            suspicious_score: suspicious,
        })?;
        notes.extend(computation.notes.iter().copied());

        // The new rate takes effect from the next accrual tick.
        self.sessions
            .reprice(&user_id, computation.rate_per_hour)
            .await?;

        // A streak saver absorbs one missed day.
        let previous_streak = user.streak_days;
        let gap_breaks_streak = user.daily.day != 0 && today > user.daily.day + 1;
        let mut streak_saver: Option<Uuid> = None;
        if gap_breaks_streak && previous_streak > 0 {
            streak_saver = self
                .cards
                .sweep_expired(&user_id)
                .await?
                .iter()
                .find(|e| e.kind == CardKind::StreakSaver)
                .map(|e| e.card_id);
            if let Some(card_id) = streak_saver {
                self.store.remove_effect(&user_id, card_id).await?;
            }
        }

        let mut level_change: Option<(u16, u16)> = None;
        let mut tier_change: Option<(RpTier, RpTier)> = None;
        let updated = update_user_with_retry(
            self.store.as_ref(),
            self.random.as_ref(),
            &user_id,
            |u| {
                let level_before = u.xp_level;
                let tier_before = u.rp_tier;

                u.touch_day(now);
                if streak_saver.is_some() {
                    u.streak_days = previous_streak.saturating_add(1);
                }
                u.daily.record(event.kind);
                u.recent.record(today, event.platform);

                xp::apply_xp_credit(&mut u.xp_total, &mut u.xp_level, computation.xp_gained)?;
                if computation.rp_credit_delta >= 0 {
                    u.rp_total = u.rp_total.saturating_add(computation.rp_credit_delta as u64);
                } else {
                    u.rp_total = u
                        .rp_total
                        .saturating_sub(computation.rp_credit_delta.unsigned_abs());
                }
                u.rp_tier = RpTier::for_rp(u.rp_total);

                u.last_activity_at = now;
                u.human_score = assessment.score;
                u.quality_score_recent = quality_ema(u.quality_score_recent, quality);

                level_change = (u.xp_level != level_before).then_some((level_before, u.xp_level));
                tier_change = (u.rp_tier != tier_before).then_some((tier_before, u.rp_tier));
                Ok(())
            },
        )
        .await?;

        if computation.rp_credit_delta > 0 {
            self.referral
                .fan_out_rp(&user_id, computation.rp_credit_delta as u64)
                .await?;
        }

        let seq = self
            .event_log
            .append(
                &user_id,
                EventLogRecord {
                    seq: 0,
                    ts: now.timestamp_millis() as u64,
                    kind: LogKind::Activity,
                    fin_delta: 0,
                    xp_delta: computation.xp_gained as i64,
                    rp_delta: computation.rp_credit_delta,
                    factors: computation.factors.to_map(),
                    provenance: format!("activity:{}", event.client_event_id),
                },
            )
            .await?;

        let mut intents = Vec::new();
        if let Some((from, to)) = level_change {
            intents.push(Intent::Notification {
                user_id: user_id.clone(),
                event: EngineEvent::LevelUp { from, to },
            });
        }
        if let Some((from, to)) = tier_change {
            intents.push(Intent::Notification {
                user_id: user_id.clone(),
                event: EngineEvent::TierChange { from, to },
            });
        }
        if notes.contains(&OutcomeNote::DailyCapReached) {
            intents.push(Intent::Notification {
                user_id: user_id.clone(),
                event: EngineEvent::DailyCapReached,
            });
        }
        for intent in &intents {
            self.emitter
                .emit(
                    intent.clone(),
                    IdempotencyKey {
                        user_id: user_id.clone(),
                        seq,
                    },
                )
                .await;
        }

        let outcome = RewardOutcome {
            user_id: user_id.clone(),
            event_ref: event.client_event_id.clone(),
            xp_gained: computation.xp_gained,
            rp_credit_delta: computation.rp_credit_delta,
            fin_accrued: FinAmount::ZERO,
            factors: computation.factors,
            notes,
            intents,
        };
        self.store.put_outcome(&outcome).await?;

        log::debug!(
            "{user_id}: +{}xp +{}rp, level {}, rate {}",
            outcome.xp_gained,
            outcome.rp_credit_delta,
            updated.xp_level,
            computation.rate_per_hour
        );
        Ok(outcome)
    }

    async fn assess_with_budget(
        &self,
        user: &User,
        event: &ActivityEvent,
        snapshot: &crate::state::referral::ReferralNetworkSnapshot,
    ) -> HumanAssessment {
        match tokio::time::timeout(
            Duration::from_millis(ANTI_BOT_BUDGET_MS),
            self.antibot.evaluate(user, Some(snapshot), Some(event)),
        )
        .await
        {
            Ok(Ok(assessment)) => assessment,
            Ok(Err(err)) => {
                log::warn!("anti-bot scoring failed for {}: {err}", user.id);
                HumanAssessment::neutral()
            }
            Err(_) => {
                log::warn!(
                    "anti-bot scoring exceeded its {ANTI_BOT_BUDGET_MS}ms budget for {}",
                    user.id
                );
                HumanAssessment::neutral()
            }
        }
    }

    pub async fn start_mining(&self, user_id: &UserId) -> Result<MiningSession, EngineError> {
        let lease = self.lease(user_id);
        let _guard = lease.lock().await;
        self.limiter
            .check(user_id, "start_mining", RATE_LIMIT_START_SESSION_SECS, 1)?;
        self.sessions.start(user_id).await
    }

    pub async fn claim_mining(&self, user_id: &UserId) -> Result<ClaimResult, EngineError> {
        let lease = self.lease(user_id);
        let _guard = lease.lock().await;
        self.limiter
            .check(user_id, "claim_mining", RATE_LIMIT_CLAIM_SECS, 1)?;
        self.sessions.claim(user_id).await
    }

    pub async fn stop_mining(&self, user_id: &UserId) -> Result<StopResult, EngineError> {
        let lease = self.lease(user_id);
        let _guard = lease.lock().await;
        self.sessions.stop(user_id).await
    }

    /// Activate an owned special card.
    pub async fn activate_card(
        &self,
        user_id: &UserId,
        card_id: Uuid,
    ) -> Result<Activation, EngineError> {
        let lease = self.lease(user_id);
        let _guard = lease.lock().await;
        self.limiter.check(
            user_id,
            "activate_card",
            RATE_LIMIT_CARD_WINDOW_SECS,
            RATE_LIMIT_CARD_MAX,
        )?;
        let now = self.clock.now();
        let user = self.store.get_user(user_id).await?;
        if user.banned {
            return Err(EngineError::UserBanned);
        }

        let activation = self.cards.activate(&user, card_id).await?;

        if activation.instant_xp > 0 {
            update_user_with_retry(self.store.as_ref(), self.random.as_ref(), user_id, |u| {
                xp::apply_xp_credit(&mut u.xp_total, &mut u.xp_level, activation.instant_xp)?;
                Ok(())
            })
            .await?;
        }

        let seq = self
            .event_log
            .append(
                user_id,
                EventLogRecord {
                    seq: 0,
                    ts: now.timestamp_millis() as u64,
                    kind: LogKind::CardActivation,
                    fin_delta: 0,
                    xp_delta: activation.instant_xp as i64,
                    rp_delta: 0,
                    factors: Default::default(),
                    provenance: format!("card:{card_id}"),
                },
            )
            .await?;
        if let Some(burn) = &activation.burn_intent {
            self.emitter
                .emit(
                    burn.clone(),
                    IdempotencyKey {
                        user_id: user_id.clone(),
                        seq,
                    },
                )
                .await;
        }
        self.emitter
            .emit(
                Intent::Notification {
                    user_id: user_id.clone(),
                    event: EngineEvent::CardActivated {
                        kind: activation.effect.kind,
                    },
                },
                IdempotencyKey {
                    user_id: user_id.clone(),
                    seq,
                },
            )
            .await;

        Ok(activation)
    }

    /// Register a referral relationship through a code.
    pub async fn apply_referral(
        &self,
        new_user_id: &UserId,
        referrer_code: &str,
    ) -> Result<ReferralApplied, EngineError> {
        let lease = self.lease(new_user_id);
        let _guard = lease.lock().await;
        self.limiter.check(
            new_user_id,
            "apply_referral",
            RATE_LIMIT_REFERRAL_WINDOW_SECS,
            RATE_LIMIT_REFERRAL_MAX,
        )?;

        let user = self.store.get_user(new_user_id).await?;
        if user.banned {
            return Err(EngineError::UserBanned);
        }
        let assessment = self
            .antibot
            .evaluate(&user, None, None)
            .await
            .unwrap_or_else(|_| HumanAssessment::neutral());
        if assessment.blocks_session_start() {
            return Err(EngineError::SuspiciousActivity {
                reason: "referral application blocked by behavioral score".into(),
            });
        }

        self.referral.apply_referral(new_user_id, referrer_code).await
    }

    pub async fn query_rate(&self, user_id: &UserId) -> Result<RateStatus, EngineError> {
        let now = self.clock.now();
        let user = self.store.get_user(user_id).await?;
        let phase = self.oracle.get().await?;
        let session = self.store.get_session(user_id).await?;
        let current_rate_per_hour = session
            .filter(|s| s.status == SessionStatus::Active)
            .map(|s| s.current_rate_per_hour)
            .unwrap_or(FinAmount::ZERO);
        let today_earned = if user.daily.day == day_number(now) {
            user.daily.mined_today
        } else {
            FinAmount::ZERO
        };
        Ok(RateStatus {
            current_rate_per_hour,
            daily_cap: phase.daily_cap,
            today_earned,
            phase: phase.phase,
        })
    }

    pub async fn query_stats(&self, user_id: &UserId) -> Result<UserStatsDto, EngineError> {
        let user = self.store.get_user(user_id).await?;
        let snapshot = self.referral.snapshot_for(user_id).await?;
        let session = self.store.get_session(user_id).await?;
        Ok(UserStatsDto {
            user_id: user.id.clone(),
            xp_total: user.xp_total,
            xp_level: user.xp_level,
            xp_band: xp::band_for_level(user.xp_level),
            mining_multiplier: xp::mining_multiplier(user.xp_level),
            band_daily_cap: xp::band_daily_cap(user.xp_level),
            rp_total: user.rp_total,
            rp_tier: user.rp_tier,
            streak_days: user.streak_days,
            holdings: user.holdings,
            staked: user.staked,
            total_earned: user.total_earned,
            human_score: user.human_score,
            quality_score_recent: user.quality_score_recent,
            referral_code: user.referral_code.clone(),
            session_status: session.map(|s| s.status),
            l1_count: snapshot.l1_count,
            l1_active: snapshot.l1_active,
            l2_count: snapshot.l2_count,
            l3_count: snapshot.l3_count,
            network_quality: snapshot.quality_score,
        })
    }

    /// One scheduler pass of the accrual loop.
    pub async fn run_accrual_tick(&self) -> Result<TickSummary, EngineError> {
        self.sessions.run_accrual_tick().await
    }

    /// Network-wide anti-bot sweep: suspend the active sessions of every
    /// member of a flagged IP or device group.
    pub async fn run_network_sweep(&self) -> Result<Vec<SweepFlag>, EngineError> {
        let flags = self.antibot.network_sweep().await?;
        for flag in &flags {
            match self
                .sessions
                .suspend_if_active(&flag.user_id, "flagged by network sweep")
                .await
            {
                Ok(true) => log::warn!(
                    "suspended {} ({}, group {} of {})",
                    flag.user_id,
                    flag.group_key,
                    flag.group_size,
                    match flag.kind {
                        crate::antibot::FindingKind::DeviceFarm => "device farm",
                        _ => "shared address",
                    }
                ),
                Ok(false) => {}
                Err(err) => log::error!("sweep suspension failed for {}: {err}", flag.user_id),
            }
        }
        Ok(flags)
    }

    /// Re-deliver parked intents.
    pub async fn flush_outbox(&self) -> usize {
        self.emitter.flush().await
    }

    /// Grant a card into a user's inventory (the NFT purchase path ends
    /// here once custody is confirmed on-chain).
    pub async fn grant_card(
        &self,
        user_id: &UserId,
        card_id: Uuid,
        kind: CardKind,
    ) -> Result<(), EngineError> {
        self.cards
            .grant(crate::state::card::OwnedCard {
                card_id,
                owner: user_id.clone(),
                kind,
            })
            .await
    }
}
