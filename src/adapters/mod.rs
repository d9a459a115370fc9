//! Adapter contracts the engine depends on.
//!
//! Every side effect outside the engine's own types goes through one of
//! these traits: durable state, the append-only reward log, the network
//! oracle, the content-quality model, raw anti-bot signals, the intent
//! sink, time, and randomness. Implementations may back them with any
//! storage or transport; the engine assumes linearizable per-user reads and
//! writes from the state store and nothing stronger.

mod memory;

pub use memory::{
    FixedQualityScorer, MemoryEventLog, MemorySignals, MemoryStore, MockClock, RecordingEmitter,
    SeededRandom, StaticPhaseOracle, SystemClock,
};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::constants::{RETRY_BACKOFF_BASE_MS, STORE_CONFLICT_RETRIES};
use crate::errors::EngineError;
use crate::state::card::{CardKind, NftCardEffect, OwnedCard};
use crate::state::mining::MiningSession;
use crate::state::referral::{ReferralEdge, ReferralNetworkSnapshot};
use crate::state::rewards::{EventLogRecord, IdempotencyKey, Intent, RewardOutcome};
use crate::state::user::{User, UserId};
use crate::utils::backoff_delay_ms;

/// Durable per-user state. Writes to the `User` record are guarded by the
/// `version` field: a write whose version does not match the stored record
/// fails with [`EngineError::ConcurrencyConflict`].
#[async_trait]
pub trait UserStateStore: Send + Sync {
    async fn get_user(&self, id: &UserId) -> Result<User, EngineError>;

    /// Insert a new user; fails if the id is taken.
    async fn insert_user(&self, user: User) -> Result<(), EngineError>;

    /// Compare-and-swap on `user.version`; returns the stored record with
    /// its bumped version on success.
    async fn try_update_user(&self, user: &User) -> Result<User, EngineError>;

    async fn user_count(&self) -> Result<u64, EngineError>;

    async fn lookup_referral_code(&self, code: &str) -> Result<Option<UserId>, EngineError>;

    async fn get_session(&self, id: &UserId) -> Result<Option<MiningSession>, EngineError>;

    async fn put_session(&self, session: &MiningSession) -> Result<(), EngineError>;

    /// Users with an Active or Suspended session, for the accrual scheduler.
    async fn open_sessions(&self) -> Result<Vec<UserId>, EngineError>;

    /// The inbound edge of a referee, if any.
    async fn referrer_of(&self, referee: &UserId) -> Result<Option<ReferralEdge>, EngineError>;

    async fn children_of(&self, referrer: &UserId) -> Result<Vec<ReferralEdge>, EngineError>;

    /// Insert a referral edge; fails with `AlreadyReferred` when the
    /// referee has an inbound edge. Cycle checks happen above this call.
    async fn insert_edge(&self, edge: ReferralEdge) -> Result<(), EngineError>;

    async fn put_edge(&self, edge: ReferralEdge) -> Result<(), EngineError>;

    async fn get_snapshot(
        &self,
        id: &UserId,
    ) -> Result<Option<ReferralNetworkSnapshot>, EngineError>;

    async fn put_snapshot(&self, snapshot: &ReferralNetworkSnapshot) -> Result<(), EngineError>;

    async fn owned_cards(&self, id: &UserId) -> Result<Vec<OwnedCard>, EngineError>;

    async fn add_owned_card(&self, card: OwnedCard) -> Result<(), EngineError>;

    async fn remove_owned_card(&self, id: &UserId, card_id: Uuid) -> Result<(), EngineError>;

    async fn active_effects(&self, id: &UserId) -> Result<Vec<NftCardEffect>, EngineError>;

    async fn put_effect(&self, effect: &NftCardEffect) -> Result<(), EngineError>;

    async fn remove_effect(&self, id: &UserId, card_id: Uuid) -> Result<(), EngineError>;

    /// Per-user, per-kind activation cooldown.
    async fn card_cooldown(
        &self,
        id: &UserId,
        kind: CardKind,
    ) -> Result<Option<DateTime<Utc>>, EngineError>;

    async fn set_card_cooldown(
        &self,
        id: &UserId,
        kind: CardKind,
        until: DateTime<Utc>,
    ) -> Result<(), EngineError>;

    /// Recorded outcome for an already processed `(user, client_event_id)`.
    async fn get_outcome(
        &self,
        id: &UserId,
        client_event_id: &str,
    ) -> Result<Option<RewardOutcome>, EngineError>;

    async fn put_outcome(&self, outcome: &RewardOutcome) -> Result<(), EngineError>;
}

/// Append-only reward log, partitioned by user, with a per-user monotonic
/// sequence.
#[async_trait]
pub trait RewardEventLog: Send + Sync {
    /// Appends and returns the assigned sequence number.
    async fn append(&self, id: &UserId, record: EventLogRecord) -> Result<u64, EngineError>;

    async fn read_all(&self, id: &UserId) -> Result<Vec<EventLogRecord>, EngineError>;
}

/// Source of the one piece of global state the engine reads: the total
/// registered user count.
#[async_trait]
pub trait PhaseOracle: Send + Sync {
    async fn total_users(&self) -> Result<u64, EngineError>;
}

/// External content-quality model. Deterministic for the same input within
/// a five-minute window; side-effect free. Failures are absorbed by the
/// engine, not surfaced to the caller.
#[async_trait]
pub trait QualityScorer: Send + Sync {
    async fn score(
        &self,
        content_ref: &str,
        platform: crate::state::activity::Platform,
    ) -> Result<crate::math::Fixed, anyhow::Error>;
}

/// Raw behavioral signals feeding the anti-bot scorer. Counters are sharded
/// with a 24h TTL upstream; eventual consistency is acceptable.
#[async_trait]
pub trait AntiBotSignals: Send + Sync {
    /// Milliseconds between the user's recent consecutive events, newest
    /// last.
    async fn recent_event_intervals_ms(&self, id: &UserId) -> Result<Vec<u64>, anyhow::Error>;

    /// Rolling similarity of the user's biometric hashes, in [0, 1];
    /// `None` when no biometric history exists.
    async fn biometric_similarity(&self, id: &UserId) -> Result<Option<f64>, anyhow::Error>;

    /// Distinct accounts seen on each of the user's devices.
    async fn device_share_counts(&self, id: &UserId) -> Result<Vec<u32>, anyhow::Error>;

    /// Largest account group among the user's recent source IPs.
    async fn ip_share_count(&self, id: &UserId) -> Result<u32, anyhow::Error>;

    /// Activity counts per UTC hour over the trailing window.
    async fn activity_hour_histogram(&self, id: &UserId) -> Result<[u32; 24], anyhow::Error>;

    /// How many times this content hash has been seen network-wide.
    async fn content_duplicate_count(&self, content_hash: &str) -> Result<u32, anyhow::Error>;

    /// IP groups above the sweep threshold: (group key, member accounts).
    async fn ip_groups(&self) -> Result<Vec<(String, Vec<UserId>)>, anyhow::Error>;

    /// Device-hash groups above the sweep threshold.
    async fn device_groups(&self) -> Result<Vec<(String, Vec<UserId>)>, anyhow::Error>;
}

/// Sink for engine side effects. Delivery must be at-least-once; the
/// idempotency key makes the downstream effect exactly-once.
#[async_trait]
pub trait IntentEmitter: Send + Sync {
    async fn emit(&self, intent: &Intent, key: &IdempotencyKey) -> Result<(), anyhow::Error>;
}

/// Time source; swapped for a mock in tests so replays are deterministic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Randomness; seeded in tests so replays are deterministic.
pub trait RandomSource: Send + Sync {
    fn next_u64(&self) -> u64;
}

/// Emitter wrapper that parks undeliverable intents in an outbox instead of
/// failing the surrounding transaction. `flush` re-delivers; the idempotency
/// keys make redelivery safe.
pub struct OutboxEmitter {
    inner: Arc<dyn IntentEmitter>,
    outbox: parking_lot::Mutex<Vec<(Intent, IdempotencyKey)>>,
}

impl OutboxEmitter {
    pub fn new(inner: Arc<dyn IntentEmitter>) -> Self {
        OutboxEmitter {
            inner,
            outbox: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub async fn emit(&self, intent: Intent, key: IdempotencyKey) {
        if let Err(err) = self.inner.emit(&intent, &key).await {
            log::warn!(
                "intent emitter unavailable, parking {:?} for {}: {err:#}",
                std::mem::discriminant(&intent),
                key.user_id
            );
            self.outbox.lock().push((intent, key));
        }
    }

    /// Retry everything in the outbox; whatever still fails stays parked.
    pub async fn flush(&self) -> usize {
        let parked: Vec<_> = std::mem::take(&mut *self.outbox.lock());
        let mut delivered = 0;
        for (intent, key) in parked {
            match self.inner.emit(&intent, &key).await {
                Ok(()) => delivered += 1,
                Err(_) => self.outbox.lock().push((intent, key)),
            }
        }
        delivered
    }

    pub fn pending(&self) -> usize {
        self.outbox.lock().len()
    }
}

/// Read-modify-write with optimistic-concurrency retries and jittered
/// backoff, the canonical write path for user records.
pub async fn update_user_with_retry<F>(
    store: &dyn UserStateStore,
    random: &dyn RandomSource,
    id: &UserId,
    mut mutate: F,
) -> Result<User, EngineError>
where
    F: FnMut(&mut User) -> Result<(), EngineError> + Send,
{
    let mut attempt = 0u32;
    loop {
        let mut user = store.get_user(id).await?;
        mutate(&mut user)?;
        match store.try_update_user(&user).await {
            Ok(stored) => return Ok(stored),
            Err(EngineError::ConcurrencyConflict) if attempt < STORE_CONFLICT_RETRIES => {
                let delay = backoff_delay_ms(RETRY_BACKOFF_BASE_MS, attempt, random.next_u64());
                log::debug!("version conflict for {id}, retry {attempt} in {delay}ms");
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
