//! Tunable constants of the Finova reward engine.
//!
//! Multiplier tables are expressed in percent-points (100 = 1.0x) and turned
//! into fixed-point values at the use site; token amounts are micro-$FIN
//! (10^8 units per $FIN).

// ======================
// MINING PHASES
// ======================

/// Base mining rates per phase (micro-FIN per hour).
pub const PHASE_FINIZEN_BASE_RATE: u64 = 10_000_000; // 0.1 FIN
pub const PHASE_GROWTH_BASE_RATE: u64 = 5_000_000; // 0.05 FIN
pub const PHASE_MATURITY_BASE_RATE: u64 = 2_500_000; // 0.025 FIN
pub const PHASE_STABILITY_BASE_RATE: u64 = 1_000_000; // 0.01 FIN

/// Phase population thresholds (total registered users).
pub const PHASE_FINIZEN_USER_BOUND: u64 = 100_000;
pub const PHASE_GROWTH_USER_BOUND: u64 = 1_000_000;
pub const PHASE_MATURITY_USER_BOUND: u64 = 10_000_000;

/// Daily mining caps per phase (micro-FIN per user per UTC day).
pub const PHASE_FINIZEN_DAILY_CAP: u64 = 480_000_000; // 4.8 FIN
pub const PHASE_GROWTH_DAILY_CAP: u64 = 180_000_000; // 1.8 FIN
pub const PHASE_MATURITY_DAILY_CAP: u64 = 72_000_000; // 0.72 FIN
pub const PHASE_STABILITY_DAILY_CAP: u64 = 24_000_000; // 0.24 FIN

/// Finizen bonus: max(1.0, 2.0 - users / FINIZEN_DIVISOR).
pub const FINIZEN_BONUS_CEILING_PERCENT: u64 = 200;
pub const FINIZEN_DIVISOR: u64 = 1_000_000;

/// Oracle read cache lifetime.
pub const PHASE_ORACLE_CACHE_SECS: i64 = 60;

// ======================
// MINING FORMULA
// ======================

/// Referral bonus: +0.1x per active direct referral, capped at 3.5x.
pub const REFERRAL_BONUS_PER_ACTIVE_PERCENT: u64 = 10;
pub const REFERRAL_BONUS_CAP_PERCENT: u64 = 350;

/// Security bonus: 1.2x with KYC, 0.8x without.
pub const KYC_SECURITY_BONUS_PERCENT: u64 = 120;
pub const NON_KYC_PENALTY_PERCENT: u64 = 80;

/// Whale regression coefficient: rate scales by e^(-0.001 x holdings-in-FIN).
pub const WHALE_REGRESSION_COEFF_NUM: u64 = 1;
pub const WHALE_REGRESSION_COEFF_DEN: u64 = 1_000;

/// Activity bonus inputs and cap.
pub const ACTIVITY_BONUS_EVENT_TARGET: u64 = 50; // 7-day activity count for full credit
pub const ACTIVITY_BONUS_PLATFORM_TARGET: u64 = 5; // distinct platforms for full credit
pub const ACTIVITY_BONUS_CAP_PERCENT: u64 = 200;

/// Quality score bounds (content-quality model output).
pub const QUALITY_SCORE_MIN_PERCENT: u64 = 50;
pub const QUALITY_SCORE_MAX_PERCENT: u64 = 200;
pub const QUALITY_SCORE_NEUTRAL_PERCENT: u64 = 100;

/// Special-card bonus hard cap.
pub const CARD_BONUS_CAP_PERCENT: u64 = 2_000; // 20.0x

/// Human probability bounds; applied squared to the mining rate.
pub const HUMAN_SCORE_MIN_PERCENT: u64 = 10;
pub const HUMAN_SCORE_MAX_PERCENT: u64 = 100;

// ======================
// XP SYSTEM
// ======================

/// Base XP per activity kind.
pub const XP_POST: u64 = 50;
pub const XP_PHOTO: u64 = 75;
pub const XP_VIDEO: u64 = 150;
pub const XP_STORY: u64 = 25;
pub const XP_COMMENT: u64 = 25;
pub const XP_LIKE: u64 = 5;
pub const XP_SHARE: u64 = 15;
pub const XP_FOLLOW: u64 = 20;
pub const XP_LOGIN: u64 = 10;
pub const XP_QUEST: u64 = 100;
pub const XP_VIRAL_MILESTONE: u64 = 1_000;

/// Daily activity limits per kind (0 = uncapped).
pub const DAILY_POST_LIMIT: u32 = 0;
pub const DAILY_PHOTO_LIMIT: u32 = 20;
pub const DAILY_VIDEO_LIMIT: u32 = 10;
pub const DAILY_STORY_LIMIT: u32 = 50;
pub const DAILY_COMMENT_LIMIT: u32 = 100;
pub const DAILY_LIKE_LIMIT: u32 = 200;
pub const DAILY_SHARE_LIMIT: u32 = 50;
pub const DAILY_FOLLOW_LIMIT: u32 = 25;
pub const DAILY_LOGIN_LIMIT: u32 = 1;
pub const DAILY_QUEST_LIMIT: u32 = 3;
pub const DAILY_VIRAL_LIMIT: u32 = 0;

/// Platform multipliers (percent-points).
pub const PLATFORM_TIKTOK_MULTIPLIER: u64 = 130;
pub const PLATFORM_YOUTUBE_MULTIPLIER: u64 = 140;
pub const PLATFORM_INSTAGRAM_MULTIPLIER: u64 = 120;
pub const PLATFORM_X_MULTIPLIER: u64 = 120;
pub const PLATFORM_FACEBOOK_MULTIPLIER: u64 = 110;
pub const PLATFORM_DEFAULT_MULTIPLIER: u64 = 100;

/// Streak bonus: +0.1x per consecutive day after the first, 3.0x ceiling.
pub const STREAK_BONUS_STEP_PERCENT: u64 = 10;
pub const STREAK_BONUS_CAP_PERCENT: u64 = 300;

/// Level progression decay: XP gains scale by e^(-0.01 x level).
pub const LEVEL_DECAY_COEFF_NUM: u64 = 1;
pub const LEVEL_DECAY_COEFF_DEN: u64 = 100;

/// Highest reachable level.
pub const MAX_XP_LEVEL: u16 = 200;

/// XP each Mythic level spans (the band is open-ended above).
pub const MYTHIC_XP_PER_LEVEL: u64 = 10_000;

// ======================
// RP SYSTEM
// ======================

/// RP tier thresholds.
pub const CONNECTOR_RP_MIN: u64 = 1_000;
pub const INFLUENCER_RP_MIN: u64 = 5_000;
pub const LEADER_RP_MIN: u64 = 15_000;
pub const AMBASSADOR_RP_MIN: u64 = 50_000;

/// One-time RP grants.
pub const RP_SIGNUP_BONUS: u64 = 50;
pub const RP_KYC_BONUS: u64 = 100;

/// One-time network milestone grants (active direct referrals).
pub const RP_MILESTONE_THRESHOLDS: [u32; 4] = [10, 25, 50, 100];
pub const RP_MILESTONE_BONUSES: [u64; 4] = [500, 1_500, 5_000, 15_000];

/// Network quality bonus on RP earnings: 1 + tier_index x 0.2.
pub const NETWORK_QUALITY_BONUS_STEP_PERCENT: u64 = 20;

/// Network regression on the derived RP value:
/// e^(-0.0001 x network_size x network_quality).
pub const NETWORK_REGRESSION_COEFF_NUM: u64 = 1;
pub const NETWORK_REGRESSION_COEFF_DEN: u64 = 10_000;

/// Referee activity horizon: no activity for this long marks a referral
/// inactive and excluded from fan-out; churn follows later.
pub const REFERRAL_INACTIVE_AFTER_DAYS: i64 = 30;
pub const REFERRAL_CHURNED_AFTER_DAYS: i64 = 90;

/// Snapshot freshness bound for lazily refreshed network snapshots.
pub const SNAPSHOT_STALE_AFTER_SECS: i64 = 15 * 60;

/// Referral traversal depth for all reward purposes.
pub const REFERRAL_MAX_DEPTH: u8 = 3;

/// Level weights for the network quality score.
pub const NETWORK_QUALITY_L1_WEIGHT_PERCENT: u64 = 100;
pub const NETWORK_QUALITY_L2_WEIGHT_PERCENT: u64 = 30;
pub const NETWORK_QUALITY_L3_WEIGHT_PERCENT: u64 = 10;

// ======================
// STAKING
// ======================

/// Staking tier thresholds (whole FIN) and mining bonuses (percent-points).
pub const STAKING_TIER_THRESHOLDS_FIN: [u64; 5] = [100, 500, 1_000, 5_000, 10_000];
pub const STAKING_TIER_MULTIPLIERS_PERCENT: [u64; 6] = [100, 120, 135, 150, 175, 200];

// ======================
// ANTI-BOT
// ======================

/// Human probability factor weights (basis points, sum = 10000).
pub const WEIGHT_BIOMETRIC: u64 = 2_500;
pub const WEIGHT_BEHAVIORAL: u64 = 2_000;
pub const WEIGHT_SOCIAL_GRAPH: u64 = 1_500;
pub const WEIGHT_DEVICE: u64 = 1_500;
pub const WEIGHT_TEMPORAL: u64 = 1_500;
pub const WEIGHT_CONTENT: u64 = 1_000;

/// Session gating thresholds on the human probability score.
pub const HUMAN_SCORE_SESSION_START_MIN_PERCENT: u64 = 30;
pub const HUMAN_SCORE_ACCRUAL_MIN_PERCENT: u64 = 50;

/// Click intervals under this look scripted (milliseconds).
pub const SUSPICIOUS_CLICK_INTERVAL_MS: u64 = 100;

/// Network sweep thresholds: distinct accounts sharing one counter.
pub const SWEEP_IP_GROUP_THRESHOLD: u32 = 20;
pub const SWEEP_DEVICE_GROUP_THRESHOLD: u32 = 5;

/// Progressive difficulty penalties.
pub const DIFFICULTY_EARNINGS_DIVISOR_FIN: u64 = 1_000;
pub const DIFFICULTY_SUSPICION_MULTIPLIER: u64 = 2;
pub const MINING_PENALTY_STEP_PERCENT: u64 = 10; // difficulty x 0.1
pub const MINING_PENALTY_CAP_PERCENT: u64 = 95;
pub const XP_PENALTY_STEP_PERCENT: u64 = 5; // difficulty x 0.05
pub const XP_PENALTY_CAP_PERCENT: u64 = 90;
pub const RP_PENALTY_STEP_PERCENT: u64 = 8; // difficulty x 0.08
pub const RP_PENALTY_CAP_PERCENT: u64 = 92;

// ======================
// MINING SESSIONS
// ======================

/// Hard session lifetime; reaching it closes the session.
pub const SESSION_MAX_HOURS: i64 = 24;

/// Accrual scheduler batch size.
pub const ACCRUAL_BATCH_SIZE: usize = 50;

/// Suspended sessions close automatically after this long.
pub const SUSPENDED_AUTO_CLOSE_SECS: i64 = 3_600;

/// Cooldown before restarting after an anti-bot close.
pub const ANTI_BOT_CLOSE_COOLDOWN_SECS: i64 = 3_600;

// ======================
// SPECIAL CARDS
// ======================

/// Synergy: 1 + 0.1 x active-card count, +0.3 when all three boost
/// categories are live; the combined card product is capped separately.
pub const SYNERGY_PER_CARD_PERCENT: u64 = 10;
pub const SYNERGY_ALL_CATEGORIES_PERCENT: u64 = 30;

/// Active-boost slots by XP level.
pub const MAX_BOOSTS_LEVEL_100: usize = 5;
pub const MAX_BOOSTS_LEVEL_50: usize = 4;
pub const MAX_BOOSTS_LEVEL_25: usize = 3;
pub const MAX_BOOSTS_LEVEL_10: usize = 2;
pub const MAX_BOOSTS_DEFAULT: usize = 1;

// ======================
// ORCHESTRATOR BUDGETS & LIMITS
// ======================

/// Wall-clock budgets (milliseconds).
pub const EVENT_HANDLER_BUDGET_MS: u64 = 2_000;
pub const QUALITY_SCORER_BUDGET_MS: u64 = 200;
pub const ANTI_BOT_BUDGET_MS: u64 = 300;
pub const STATE_STORE_BUDGET_MS: u64 = 100;
pub const ACCRUAL_TICK_BUDGET_MS: u64 = 50;

/// Optimistic concurrency retries and backoff base.
pub const STORE_CONFLICT_RETRIES: u32 = 5;
pub const DEPENDENCY_RETRIES: u32 = 3;
pub const RETRY_BACKOFF_BASE_MS: u64 = 25;

/// Quality scorer result pinning window (deterministic reuse).
pub const QUALITY_PIN_WINDOW_SECS: i64 = 5 * 60;

/// Smoothing factor for the rolling quality score (EMA alpha, percent).
pub const QUALITY_EMA_ALPHA_PERCENT: u64 = 30;

/// Engine-enforced per-user rate limits.
pub const RATE_LIMIT_START_SESSION_SECS: i64 = 60;
pub const RATE_LIMIT_CLAIM_SECS: i64 = 10;
pub const RATE_LIMIT_CARD_WINDOW_SECS: i64 = 5 * 60;
pub const RATE_LIMIT_CARD_MAX: usize = 10;
pub const RATE_LIMIT_REFERRAL_WINDOW_SECS: i64 = 3_600;
pub const RATE_LIMIT_REFERRAL_MAX: usize = 5;
