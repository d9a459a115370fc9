//! Referral graph maintenance, snapshots, and L1-L3 credit fan-out.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::adapters::{
    update_user_with_retry, Clock, OutboxEmitter, RandomSource, RewardEventLog, UserStateStore,
};
use crate::constants::*;
use crate::errors::EngineError;
use crate::events::EngineEvent;
use crate::math::{FinAmount, Fixed};
use crate::state::referral::{
    rp_network_value, RefereeStatus, ReferralEdge, ReferralNetworkSnapshot, RpTier,
};
use crate::state::rewards::{EventLogRecord, IdempotencyKey, Intent, LogKind};
use crate::state::user::{User, UserId};

/// Result of applying a referral code.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferralApplied {
    pub referrer_id: UserId,
    /// RP granted to the new user for joining through a code.
    pub initial_bonus: u64,
}

/// Outcome of one fan-out credit.
#[derive(Debug, Clone, PartialEq)]
pub struct FanOutCredit {
    pub referrer_id: UserId,
    pub level: u8,
    pub amount: FinAmount,
}

pub struct ReferralNetworkManager {
    store: Arc<dyn UserStateStore>,
    event_log: Arc<dyn RewardEventLog>,
    emitter: Arc<OutboxEmitter>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
}

impl ReferralNetworkManager {
    pub fn new(
        store: Arc<dyn UserStateStore>,
        event_log: Arc<dyn RewardEventLog>,
        emitter: Arc<OutboxEmitter>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        ReferralNetworkManager {
            store,
            event_log,
            emitter,
            clock,
            random,
        }
    }

    /// Register `new_user_id` under the owner of `referrer_code`.
    ///
    /// Enforces one inbound edge per referee, acyclicity, and the
    /// referrer's tier network cap; grants the sign-up RP on both sides and
    /// refreshes both snapshots eagerly.
    pub async fn apply_referral(
        &self,
        new_user_id: &UserId,
        referrer_code: &str,
    ) -> Result<ReferralApplied, EngineError> {
        let now = self.clock.now();
        let referrer_id = self
            .store
            .lookup_referral_code(referrer_code)
            .await?
            .ok_or(EngineError::InvalidReferralCode)?;
        if referrer_id == *new_user_id {
            return Err(EngineError::SelfReferral);
        }

        // Both ends must exist.
        let referrer = self.store.get_user(&referrer_id).await?;
        let _referee = self.store.get_user(new_user_id).await?;

        if self.store.referrer_of(new_user_id).await?.is_some() {
            return Err(EngineError::AlreadyReferred);
        }

        // Walk up from the referrer: if the new user appears among its
        // ancestors, the edge would close a cycle.
        let mut current = referrer_id.clone();
        let mut hops = 0u32;
        while let Some(edge) = self.store.referrer_of(&current).await? {
            if edge.referrer_id == *new_user_id {
                return Err(EngineError::CircularReferral);
            }
            current = edge.referrer_id;
            hops += 1;
            if hops > 10_000 {
                return Err(EngineError::InvariantViolation(
                    "referral ancestry does not terminate".into(),
                ));
            }
        }

        if let Some(cap) = referrer.rp_tier.network_cap() {
            let snapshot = self.snapshot_for(&referrer_id).await?;
            if snapshot.l1_count >= cap {
                return Err(EngineError::NetworkCapExceeded);
            }
        }

        self.store
            .insert_edge(ReferralEdge {
                referrer_id: referrer_id.clone(),
                referee_id: new_user_id.clone(),
                created_at: now,
                referee_active: true,
            })
            .await?;

        // Sign-up RP on both sides.
        self.credit_rp(&referrer_id, RP_SIGNUP_BONUS, "referral:signup")
            .await?;
        self.credit_rp(new_user_id, RP_SIGNUP_BONUS, "referral:signup")
            .await?;

        self.refresh_snapshot(&referrer_id).await?;
        self.refresh_snapshot(new_user_id).await?;

        let seq = self
            .event_log
            .append(
                &referrer_id,
                EventLogRecord {
                    seq: 0,
                    ts: now.timestamp_millis() as u64,
                    kind: LogKind::ReferralCredit,
                    fin_delta: 0,
                    xp_delta: 0,
                    rp_delta: RP_SIGNUP_BONUS as i64,
                    factors: Default::default(),
                    provenance: format!("referral:signup:{new_user_id}"),
                },
            )
            .await?;
        self.emitter
            .emit(
                Intent::Notification {
                    user_id: referrer_id.clone(),
                    event: EngineEvent::ReferralRegistered {
                        referee: new_user_id.to_string(),
                    },
                },
                IdempotencyKey {
                    user_id: referrer_id.clone(),
                    seq,
                },
            )
            .await;

        log::info!("{new_user_id} joined under {referrer_id}");
        Ok(ReferralApplied {
            referrer_id,
            initial_bonus: RP_SIGNUP_BONUS,
        })
    }

    /// RP grant to the referrer when a referee completes KYC verification.
    /// The caller guards against repeated completion; a referee without a
    /// referrer credits nobody.
    pub async fn on_referee_kyc(&self, referee: &UserId) -> Result<(), EngineError> {
        let now = self.clock.now();
        let Some(edge) = self.store.referrer_of(referee).await? else {
            return Ok(());
        };
        let referrer = self.store.get_user(&edge.referrer_id).await?;
        if referrer.banned {
            return Ok(());
        }

        self.credit_rp(&edge.referrer_id, RP_KYC_BONUS, "referral:kyc")
            .await?;
        self.event_log
            .append(
                &edge.referrer_id,
                EventLogRecord {
                    seq: 0,
                    ts: now.timestamp_millis() as u64,
                    kind: LogKind::ReferralCredit,
                    fin_delta: 0,
                    xp_delta: 0,
                    rp_delta: RP_KYC_BONUS as i64,
                    factors: Default::default(),
                    provenance: format!("referral:kyc:{referee}"),
                },
            )
            .await?;

        log::info!("{referee} completed KYC, credited {}", edge.referrer_id);
        Ok(())
    }

    /// $FIN fan-out for a claim: walk up to three levels, paying each
    /// eligible referrer their own tier's share of the claimed amount.
    /// Inactive (30 days) and banned referrers are skipped, not blocking.
    pub async fn fan_out_claim(
        &self,
        claimer: &UserId,
        amount: FinAmount,
        claim_id: &str,
    ) -> Result<(Vec<FanOutCredit>, Vec<Intent>), EngineError> {
        let now = self.clock.now();
        let mut credits = Vec::new();
        let mut intents = Vec::new();

        let mut current = claimer.clone();
        for level in 1..=REFERRAL_MAX_DEPTH {
            let edge = match self.store.referrer_of(&current).await? {
                Some(edge) => edge,
                None => break,
            };
            let referrer_id = edge.referrer_id.clone();
            let referrer = self.store.get_user(&referrer_id).await?;
            current = referrer_id.clone();

            if referrer.banned || !is_recently_active(&referrer, now) {
                log::debug!("skipping {referrer_id} at L{level}: ineligible");
                continue;
            }

            let share = referrer.rp_tier.share_percent(level);
            if share == 0 {
                continue;
            }
            let credit = amount.mul_fixed(Fixed::from_percent(share))?;
            if credit.is_zero() {
                continue;
            }

            update_user_with_retry(self.store.as_ref(), self.random.as_ref(), &referrer_id, |u| {
                u.holdings = u.holdings.checked_add(credit)?;
                u.total_earned = u.total_earned.checked_add(credit)?;
                Ok(())
            })
            .await?;

            let provenance = format!("referral:claim:{claim_id}:L{level}");
            let seq = self
                .event_log
                .append(
                    &referrer_id,
                    EventLogRecord {
                        seq: 0,
                        ts: now.timestamp_millis() as u64,
                        kind: LogKind::ReferralCredit,
                        fin_delta: credit.as_units() as i64,
                        xp_delta: 0,
                        rp_delta: 0,
                        factors: Default::default(),
                        provenance: provenance.clone(),
                    },
                )
                .await?;

            let mint = Intent::Mint {
                user_id: referrer_id.clone(),
                amount: credit,
                provenance,
            };
            self.emitter
                .emit(
                    mint.clone(),
                    IdempotencyKey {
                        user_id: referrer_id.clone(),
                        seq,
                    },
                )
                .await;
            self.emitter
                .emit(
                    Intent::Notification {
                        user_id: referrer_id.clone(),
                        event: EngineEvent::ReferralCredit {
                            amount: credit,
                            level,
                        },
                    },
                    IdempotencyKey {
                        user_id: referrer_id.clone(),
                        seq,
                    },
                )
                .await;

            intents.push(mint);
            credits.push(FanOutCredit {
                referrer_id,
                level,
                amount: credit,
            });
        }

        Ok((credits, intents))
    }

    /// RP fan-out for an acting user's RP delta, same share table.
    pub async fn fan_out_rp(
        &self,
        acting_user: &UserId,
        rp_delta: u64,
    ) -> Result<(), EngineError> {
        if rp_delta == 0 {
            return Ok(());
        }
        let now = self.clock.now();
        let mut current = acting_user.clone();
        for level in 1..=REFERRAL_MAX_DEPTH {
            let edge = match self.store.referrer_of(&current).await? {
                Some(edge) => edge,
                None => break,
            };
            let referrer_id = edge.referrer_id.clone();
            let referrer = self.store.get_user(&referrer_id).await?;
            current = referrer_id.clone();

            if referrer.banned || !is_recently_active(&referrer, now) {
                continue;
            }
            let share = referrer.rp_tier.share_percent(level);
            let credit = rp_delta * share / 100;
            if credit == 0 {
                continue;
            }
            self.credit_rp(&referrer_id, credit, "referral:rp").await?;
            self.event_log
                .append(
                    &referrer_id,
                    EventLogRecord {
                        seq: 0,
                        ts: now.timestamp_millis() as u64,
                        kind: LogKind::ReferralCredit,
                        fin_delta: 0,
                        xp_delta: 0,
                        rp_delta: credit as i64,
                        factors: Default::default(),
                        provenance: format!("referral:rp:{acting_user}:L{level}"),
                    },
                )
                .await?;
        }
        Ok(())
    }

    /// Snapshot for a user, refreshed when stale.
    pub async fn snapshot_for(
        &self,
        user_id: &UserId,
    ) -> Result<ReferralNetworkSnapshot, EngineError> {
        let now = self.clock.now();
        if let Some(snapshot) = self.store.get_snapshot(user_id).await? {
            if !snapshot.is_stale(now) {
                return Ok(snapshot);
            }
        }
        self.refresh_snapshot(user_id).await
    }

    /// Recompute a user's snapshot from the live graph: per-level counts and
    /// activity, the weighted quality score, and the derived RP value.
    pub async fn refresh_snapshot(
        &self,
        user_id: &UserId,
    ) -> Result<ReferralNetworkSnapshot, EngineError> {
        let now = self.clock.now();
        let user = self.store.get_user(user_id).await?;

        let mut visited: HashSet<UserId> = HashSet::new();
        visited.insert(user_id.clone());

        let mut frontier = vec![user_id.clone()];
        let mut counts = [(0u32, 0u32); 3];
        let mut rp_sums = [0u64; 3];

        for level in 0..REFERRAL_MAX_DEPTH as usize {
            let mut next = Vec::new();
            for node in &frontier {
                for mut edge in self.store.children_of(node).await? {
                    if !visited.insert(edge.referee_id.clone()) {
                        continue;
                    }
                    let referee = self.store.get_user(&edge.referee_id).await?;
                    let idle_days = now
                        .signed_duration_since(referee.last_activity_at)
                        .num_days();
                    let active = RefereeStatus::from_idle_days(idle_days) == RefereeStatus::Active
                        && !referee.banned;
                    if edge.referee_active != active {
                        edge.referee_active = active;
                        self.store.put_edge(edge.clone()).await?;
                    }
                    counts[level].0 += 1;
                    if active {
                        counts[level].1 += 1;
                    }
                    rp_sums[level] += referee.rp_total;
                    next.push(edge.referee_id);
                }
            }
            frontier = next;
            if frontier.is_empty() {
                break;
            }
        }

        let quality =
            ReferralNetworkSnapshot::compute_quality(counts[0], counts[1], counts[2]);
        let network_size =
            counts[0].0 as u64 + counts[1].0 as u64 + counts[2].0 as u64;
        let rp_value = rp_network_value(
            rp_sums[0],
            rp_sums[1],
            rp_sums[2],
            user.rp_tier,
            network_size,
            quality,
        );

        let snapshot = ReferralNetworkSnapshot {
            user_id: user_id.clone(),
            l1_count: counts[0].0,
            l1_active: counts[0].1,
            l2_count: counts[1].0,
            l2_active: counts[1].1,
            l3_count: counts[2].0,
            l3_active: counts[2].1,
            quality_score: quality,
            tier: user.rp_tier,
            rp_value,
            last_refreshed_at: now,
        };
        self.store.put_snapshot(&snapshot).await?;

        self.grant_milestones(&user, snapshot.l1_active).await?;

        Ok(snapshot)
    }

    /// One-time RP grants when active direct referrals cross a milestone.
    async fn grant_milestones(&self, user: &User, l1_active: u32) -> Result<(), EngineError> {
        let now = self.clock.now();
        for (slot, (&threshold, &bonus)) in RP_MILESTONE_THRESHOLDS
            .iter()
            .zip(RP_MILESTONE_BONUSES.iter())
            .enumerate()
        {
            let bit = 1u8 << slot;
            if l1_active < threshold || user.rp_milestones_granted & bit != 0 {
                continue;
            }
            update_user_with_retry(self.store.as_ref(), self.random.as_ref(), &user.id, |u| {
                if u.rp_milestones_granted & bit != 0 {
                    return Ok(());
                }
                u.rp_milestones_granted |= bit;
                u.rp_total = u.rp_total.saturating_add(bonus);
                u.rp_tier = RpTier::for_rp(u.rp_total);
                Ok(())
            })
            .await?;

            let seq = self
                .event_log
                .append(
                    &user.id,
                    EventLogRecord {
                        seq: 0,
                        ts: now.timestamp_millis() as u64,
                        kind: LogKind::ReferralCredit,
                        fin_delta: 0,
                        xp_delta: 0,
                        rp_delta: bonus as i64,
                        factors: Default::default(),
                        provenance: format!("referral:milestone:{threshold}"),
                    },
                )
                .await?;
            self.emitter
                .emit(
                    Intent::Notification {
                        user_id: user.id.clone(),
                        event: EngineEvent::MilestoneReached {
                            active_referrals: threshold,
                            bonus_rp: bonus,
                        },
                    },
                    IdempotencyKey {
                        user_id: user.id.clone(),
                        seq,
                    },
                )
                .await;
            log::info!("{} reached the {threshold}-active milestone", user.id);
        }
        Ok(())
    }

    async fn credit_rp(
        &self,
        user_id: &UserId,
        amount: u64,
        _source: &str,
    ) -> Result<(), EngineError> {
        update_user_with_retry(self.store.as_ref(), self.random.as_ref(), user_id, |u| {
            u.rp_total = u.rp_total.saturating_add(amount);
            u.rp_tier = RpTier::for_rp(u.rp_total);
            Ok(())
        })
        .await?;
        Ok(())
    }
}

fn is_recently_active(user: &User, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(user.last_activity_at).num_days()
        <= REFERRAL_INACTIVE_AFTER_DAYS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{
        MemoryEventLog, MemoryStore, MockClock, RecordingEmitter, SeededRandom,
    };
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    struct Fixture {
        manager: ReferralNetworkManager,
        store: Arc<MemoryStore>,
        emitter: Arc<RecordingEmitter>,
        clock: Arc<MockClock>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let event_log = Arc::new(MemoryEventLog::new());
        let recording = Arc::new(RecordingEmitter::new());
        let emitter = Arc::new(OutboxEmitter::new(recording.clone()));
        let clock = Arc::new(MockClock::fixed());
        let random = Arc::new(SeededRandom::from_seed(7));
        Fixture {
            manager: ReferralNetworkManager::new(
                store.clone(),
                event_log,
                emitter,
                clock.clone(),
                random,
            ),
            store,
            emitter: recording,
            clock,
        }
    }

    async fn add_user(fixture: &Fixture, id: &str) -> User {
        let user = User::register(UserId::new(id), true, fixture.clock.now());
        fixture.store.insert_user(user.clone()).await.unwrap();
        user
    }

    async fn link(fixture: &Fixture, referrer: &str, referee: &str) {
        let code = fixture
            .store
            .get_user(&UserId::new(referrer))
            .await
            .unwrap()
            .referral_code;
        fixture
            .manager
            .apply_referral(&UserId::new(referee), &code)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn apply_referral_grants_signup_bonuses() {
        let f = fixture().await;
        let referrer = add_user(&f, "r").await;
        add_user(&f, "e").await;

        let applied = f
            .manager
            .apply_referral(&UserId::new("e"), &referrer.referral_code)
            .await
            .unwrap();
        assert_eq!(applied.referrer_id, UserId::new("r"));
        assert_eq!(applied.initial_bonus, RP_SIGNUP_BONUS);

        let r = f.store.get_user(&UserId::new("r")).await.unwrap();
        let e = f.store.get_user(&UserId::new("e")).await.unwrap();
        assert_eq!(r.rp_total, RP_SIGNUP_BONUS);
        assert_eq!(e.rp_total, RP_SIGNUP_BONUS);
    }

    #[tokio::test]
    async fn self_and_duplicate_referrals_are_rejected() {
        let f = fixture().await;
        let referrer = add_user(&f, "r").await;
        add_user(&f, "e").await;

        assert!(matches!(
            f.manager
                .apply_referral(&UserId::new("r"), &referrer.referral_code)
                .await,
            Err(EngineError::SelfReferral)
        ));

        link(&f, "r", "e").await;
        assert!(matches!(
            f.manager
                .apply_referral(&UserId::new("e"), &referrer.referral_code)
                .await,
            Err(EngineError::AlreadyReferred)
        ));
    }

    #[tokio::test]
    async fn cycles_are_rejected() {
        let f = fixture().await;
        add_user(&f, "a").await;
        add_user(&f, "b").await;
        add_user(&f, "c").await;
        link(&f, "a", "b").await;
        link(&f, "b", "c").await;

        // c -> a would close a cycle a -> b -> c -> a.
        let code_c = f.store.get_user(&UserId::new("c")).await.unwrap().referral_code;
        assert!(matches!(
            f.manager.apply_referral(&UserId::new("a"), &code_c).await,
            Err(EngineError::CircularReferral)
        ));
    }

    #[tokio::test]
    async fn explorer_cap_limits_direct_referrals() {
        let f = fixture().await;
        add_user(&f, "r").await;
        for i in 0..10 {
            add_user(&f, &format!("e{i}")).await;
            link(&f, "r", &format!("e{i}")).await;
        }
        // Signup RP has not crossed the Connector threshold: 10 is the cap.
        add_user(&f, "overflow").await;
        let code = f.store.get_user(&UserId::new("r")).await.unwrap().referral_code;
        assert!(matches!(
            f.manager
                .apply_referral(&UserId::new("overflow"), &code)
                .await,
            Err(EngineError::NetworkCapExceeded)
        ));
    }

    #[tokio::test]
    async fn claim_fan_out_pays_each_tier_its_share() {
        let f = fixture().await;
        add_user(&f, "r2").await;
        add_user(&f, "r1").await;
        add_user(&f, "u").await;
        link(&f, "r2", "r1").await;
        link(&f, "r1", "u").await;

        // R1 Connector, R2 Influencer.
        update_user_with_retry(
            f.store.as_ref(),
            &SeededRandom::from_seed(1),
            &UserId::new("r1"),
            |u| {
                u.rp_total = 2_000;
                u.rp_tier = RpTier::for_rp(u.rp_total);
                Ok(())
            },
        )
        .await
        .unwrap();
        update_user_with_retry(
            f.store.as_ref(),
            &SeededRandom::from_seed(2),
            &UserId::new("r2"),
            |u| {
                u.rp_total = 6_000;
                u.rp_tier = RpTier::for_rp(u.rp_total);
                Ok(())
            },
        )
        .await
        .unwrap();

        let one_fin = FinAmount::from_fin(1).unwrap();
        let (credits, intents) = f
            .manager
            .fan_out_claim(&UserId::new("u"), one_fin, "claim-1")
            .await
            .unwrap();

        assert_eq!(credits.len(), 2);
        // L1 at Connector: 15%.
        assert_eq!(credits[0].referrer_id, UserId::new("r1"));
        assert_eq!(credits[0].amount, FinAmount::from_fin_ratio(15, 100).unwrap());
        // L2 at Influencer: 8%.
        assert_eq!(credits[1].referrer_id, UserId::new("r2"));
        assert_eq!(credits[1].amount, FinAmount::from_fin_ratio(8, 100).unwrap());

        // Mint intents carry the claim id in their provenance.
        assert!(intents.iter().all(|intent| matches!(
            intent,
            Intent::Mint { provenance, .. } if provenance.contains("claim-1")
        )));

        let r1 = f.store.get_user(&UserId::new("r1")).await.unwrap();
        assert_eq!(r1.holdings, FinAmount::from_fin_ratio(15, 100).unwrap());
    }

    #[tokio::test]
    async fn inactive_referrers_are_skipped_without_blocking_deeper_levels() {
        let f = fixture().await;
        add_user(&f, "r2").await;
        add_user(&f, "r1").await;
        add_user(&f, "u").await;
        link(&f, "r2", "r1").await;
        link(&f, "r1", "u").await;

        // R1 goes dark for two months.
        update_user_with_retry(
            f.store.as_ref(),
            &SeededRandom::from_seed(3),
            &UserId::new("r1"),
            |u| {
                u.last_activity_at = u.last_activity_at - Duration::days(60);
                Ok(())
            },
        )
        .await
        .unwrap();
        // R2 needs an L2 share: Connector or better.
        update_user_with_retry(
            f.store.as_ref(),
            &SeededRandom::from_seed(4),
            &UserId::new("r2"),
            |u| {
                u.rp_total = 2_000;
                u.rp_tier = RpTier::for_rp(u.rp_total);
                Ok(())
            },
        )
        .await
        .unwrap();

        let (credits, _) = f
            .manager
            .fan_out_claim(&UserId::new("u"), FinAmount::from_fin(1).unwrap(), "c")
            .await
            .unwrap();
        assert_eq!(credits.len(), 1);
        assert_eq!(credits[0].referrer_id, UserId::new("r2"));
        assert_eq!(credits[0].level, 2);
    }

    #[tokio::test]
    async fn snapshot_counts_levels_and_activity() {
        let f = fixture().await;
        add_user(&f, "root").await;
        add_user(&f, "a").await;
        add_user(&f, "b").await;
        add_user(&f, "c").await;
        link(&f, "root", "a").await;
        link(&f, "a", "b").await;
        link(&f, "b", "c").await;

        let snapshot = f
            .manager
            .refresh_snapshot(&UserId::new("root"))
            .await
            .unwrap();
        assert_eq!(snapshot.l1_count, 1);
        assert_eq!(snapshot.l2_count, 1);
        assert_eq!(snapshot.l3_count, 1);
        assert_eq!(snapshot.quality_score, Fixed::ONE);
        assert_eq!(snapshot.total_network_size(), 3);
    }

    #[tokio::test]
    async fn stale_snapshots_refresh_lazily() {
        let f = fixture().await;
        add_user(&f, "root").await;
        add_user(&f, "a").await;
        link(&f, "root", "a").await;

        let first = f.manager.snapshot_for(&UserId::new("root")).await.unwrap();
        assert_eq!(first.l1_count, 1);

        // A new edge appears without an eager refresh of root.
        add_user(&f, "b").await;
        let edge = ReferralEdge {
            referrer_id: UserId::new("root"),
            referee_id: UserId::new("b"),
            created_at: f.clock.now(),
            referee_active: true,
        };
        f.store.insert_edge(edge).await.unwrap();

        // Within the staleness bound the cached view is served.
        let cached = f.manager.snapshot_for(&UserId::new("root")).await.unwrap();
        assert_eq!(cached.l1_count, 1);

        // Past fifteen minutes the read refreshes.
        f.clock.advance(Duration::minutes(16));
        let fresh = f.manager.snapshot_for(&UserId::new("root")).await.unwrap();
        assert_eq!(fresh.l1_count, 2);
    }

    #[tokio::test]
    async fn milestones_grant_once() {
        let f = fixture().await;
        add_user(&f, "root").await;
        for i in 0..10 {
            add_user(&f, &format!("m{i}")).await;
        }
        // Push root past Explorer so the cap does not interfere.
        update_user_with_retry(
            f.store.as_ref(),
            &SeededRandom::from_seed(5),
            &UserId::new("root"),
            |u| {
                u.rp_total = 2_000;
                u.rp_tier = RpTier::for_rp(u.rp_total);
                Ok(())
            },
        )
        .await
        .unwrap();
        for i in 0..10 {
            link(&f, "root", &format!("m{i}")).await;
        }

        let root = f.store.get_user(&UserId::new("root")).await.unwrap();
        // 2000 start + 10 signups x 50 + 500 milestone.
        assert_eq!(root.rp_total, 2_000 + 500 + 500);
        assert_ne!(root.rp_milestones_granted & 1, 0);

        // Another refresh does not grant again.
        f.manager.refresh_snapshot(&UserId::new("root")).await.unwrap();
        let root_after = f.store.get_user(&UserId::new("root")).await.unwrap();
        assert_eq!(root_after.rp_total, root.rp_total);

        let milestone_notes = f
            .emitter
            .emitted()
            .iter()
            .filter(|(intent, _)| {
                matches!(
                    intent,
                    Intent::Notification {
                        event: EngineEvent::MilestoneReached { .. },
                        ..
                    }
                )
            })
            .count();
        assert_eq!(milestone_notes, 1);
    }

    #[tokio::test]
    async fn kyc_completion_credits_the_referrer() {
        let f = fixture().await;
        add_user(&f, "r").await;
        add_user(&f, "e").await;
        link(&f, "r", "e").await;

        f.manager.on_referee_kyc(&UserId::new("e")).await.unwrap();
        let r = f.store.get_user(&UserId::new("r")).await.unwrap();
        assert_eq!(r.rp_total, RP_SIGNUP_BONUS + RP_KYC_BONUS);

        // A referee without a referrer credits nobody.
        add_user(&f, "orphan").await;
        f.manager
            .on_referee_kyc(&UserId::new("orphan"))
            .await
            .unwrap();
        let orphan = f.store.get_user(&UserId::new("orphan")).await.unwrap();
        assert_eq!(orphan.rp_total, 0);
    }

    #[tokio::test]
    async fn rp_fan_out_uses_the_share_table() {
        let f = fixture().await;
        add_user(&f, "r1").await;
        add_user(&f, "u").await;
        link(&f, "r1", "u").await;
        update_user_with_retry(
            f.store.as_ref(),
            &SeededRandom::from_seed(6),
            &UserId::new("r1"),
            |u| {
                u.rp_total = 2_000;
                u.rp_tier = RpTier::for_rp(u.rp_total);
                Ok(())
            },
        )
        .await
        .unwrap();

        f.manager.fan_out_rp(&UserId::new("u"), 100).await.unwrap();
        let r1 = f.store.get_user(&UserId::new("r1")).await.unwrap();
        // 2000 + 15% of 100.
        assert_eq!(r1.rp_total, 2_015);
    }
}
