//! Inbound social-platform activity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::state::user::UserId;

/// Integrated social platform an activity originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Instagram,
    TikTok,
    YouTube,
    Facebook,
    X,
    FinovaApp,
}

impl Platform {
    /// XP multiplier in percent-points.
    pub fn xp_multiplier_percent(&self) -> u64 {
        match self {
            Platform::TikTok => PLATFORM_TIKTOK_MULTIPLIER,
            Platform::YouTube => PLATFORM_YOUTUBE_MULTIPLIER,
            Platform::Instagram => PLATFORM_INSTAGRAM_MULTIPLIER,
            Platform::X => PLATFORM_X_MULTIPLIER,
            Platform::Facebook => PLATFORM_FACEBOOK_MULTIPLIER,
            Platform::FinovaApp => PLATFORM_DEFAULT_MULTIPLIER,
        }
    }

    /// Stable bit for the distinct-platform tracking window.
    pub fn bit(&self) -> u8 {
        match self {
            Platform::Instagram => 1 << 0,
            Platform::TikTok => 1 << 1,
            Platform::YouTube => 1 << 2,
            Platform::Facebook => 1 << 3,
            Platform::X => 1 << 4,
            Platform::FinovaApp => 1 << 5,
        }
    }
}

/// Kind of user action being rewarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityKind {
    Post,
    Photo,
    Video,
    Story,
    Comment,
    Like,
    Share,
    Follow,
    Login,
    QuestComplete,
    ViralMilestone,
}

impl ActivityKind {
    pub const ALL: [ActivityKind; 11] = [
        ActivityKind::Post,
        ActivityKind::Photo,
        ActivityKind::Video,
        ActivityKind::Story,
        ActivityKind::Comment,
        ActivityKind::Like,
        ActivityKind::Share,
        ActivityKind::Follow,
        ActivityKind::Login,
        ActivityKind::QuestComplete,
        ActivityKind::ViralMilestone,
    ];

    pub fn base_xp(&self) -> u64 {
        match self {
            ActivityKind::Post => XP_POST,
            ActivityKind::Photo => XP_PHOTO,
            ActivityKind::Video => XP_VIDEO,
            ActivityKind::Story => XP_STORY,
            ActivityKind::Comment => XP_COMMENT,
            ActivityKind::Like => XP_LIKE,
            ActivityKind::Share => XP_SHARE,
            ActivityKind::Follow => XP_FOLLOW,
            ActivityKind::Login => XP_LOGIN,
            ActivityKind::QuestComplete => XP_QUEST,
            ActivityKind::ViralMilestone => XP_VIRAL_MILESTONE,
        }
    }

    /// Base RP credited to the acting user, one tenth of the XP weight.
    pub fn base_rp(&self) -> u64 {
        (self.base_xp() + 5) / 10
    }

    /// Daily limit for XP purposes; `None` is uncapped.
    pub fn daily_limit(&self) -> Option<u32> {
        let limit = match self {
            ActivityKind::Post => DAILY_POST_LIMIT,
            ActivityKind::Photo => DAILY_PHOTO_LIMIT,
            ActivityKind::Video => DAILY_VIDEO_LIMIT,
            ActivityKind::Story => DAILY_STORY_LIMIT,
            ActivityKind::Comment => DAILY_COMMENT_LIMIT,
            ActivityKind::Like => DAILY_LIKE_LIMIT,
            ActivityKind::Share => DAILY_SHARE_LIMIT,
            ActivityKind::Follow => DAILY_FOLLOW_LIMIT,
            ActivityKind::Login => DAILY_LOGIN_LIMIT,
            ActivityKind::QuestComplete => DAILY_QUEST_LIMIT,
            ActivityKind::ViralMilestone => DAILY_VIRAL_LIMIT,
        };
        (limit > 0).then_some(limit)
    }

    /// Index into per-kind daily counters.
    pub fn index(&self) -> usize {
        Self::ALL.iter().position(|k| k == self).unwrap_or(0)
    }
}

/// A single observed user action, as delivered by the ingestion layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub user_id: UserId,

    /// Caller-chosen id; the engine is idempotent on `(user_id, client_event_id)`.
    pub client_event_id: String,

    pub platform: Platform,

    pub kind: ActivityKind,

    /// Reference to the content for quality scoring, if any.
    pub content_ref: Option<String>,

    /// Raw content sample for spam heuristics, if the platform provides one.
    pub content_text: Option<String>,

    pub observed_at: DateTime<Utc>,

    /// Opaque client attestation; verified upstream, carried for audit.
    pub client_signature: String,

    /// Device fingerprint hash reported with the event.
    pub device_hash: Option<String>,
}
