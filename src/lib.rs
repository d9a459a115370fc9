//! # Finova Network Integrated Reward Engine
//!
//! The deterministic core of the Finova social-fi platform. For every user
//! action on an integrated social platform the engine decides how much XP is
//! earned, how the user's referral network is credited with RP, at what rate
//! the user mines $FIN, and whether the action looks like a legitimate human
//! contribution.
//!
//! The engine owns:
//! - the fixed-precision numeric model ([`math`]) and the integrated reward
//!   formula ([`calculator`]),
//! - per-user mining sessions with continuous accrual ([`session`]),
//! - the referral graph with L1-L3 credit fan-out ([`referral`]),
//! - special-card activation, stacking and expiry ([`cards`]),
//! - behavioral scoring and suspension ([`antibot`]),
//! - the per-event orchestrator ([`engine`]).
//!
//! Everything with a side effect outside the engine's own state - persistence,
//! content quality models, biometric and device signals, on-chain minting,
//! notifications - is consumed through the adapter traits in [`adapters`].
//! On-chain effects leave the engine as [`state::rewards::Intent`] values; a
//! blockchain adapter executes them with at-least-once delivery keyed by
//! `(user_id, seq)`.
//!
//! ## Concurrency model
//!
//! There is no global lock. All mutations of a user or their mining session
//! are serialized per user: a logical lease held by the orchestrator, backed
//! by optimistic version checks in the state store (retried with jittered
//! backoff on conflict). Calls into adapters are the only suspension points;
//! the calculator and numeric kernel are synchronous.

pub mod adapters;
pub mod antibot;
pub mod calculator;
pub mod cards;
pub mod constants;
pub mod engine;
pub mod errors;
pub mod events;
pub mod math;
pub mod oracle;
pub mod quality;
pub mod referral;
pub mod session;
pub mod state;
pub mod utils;

pub use engine::RewardEngine;
pub use errors::{EngineError, ErrorClass};
pub use math::{FinAmount, Fixed};
pub use state::user::{User, UserId};
