//! Behavioral scoring: human probability and suspicious-activity findings.
//!
//! Six weighted factors produce a score in [0.1, 1.0]. A Critical finding
//! or a score under 0.3 blocks session start outright; accrual re-checks
//! against 0.5; Medium findings feed the progressive penalty instead.

use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::adapters::AntiBotSignals;
use crate::constants::*;
use crate::errors::EngineError;
use crate::math::Fixed;
use crate::state::activity::ActivityEvent;
use crate::state::referral::ReferralNetworkSnapshot;
use crate::state::user::{User, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FindingKind {
    ClickSpeed,
    SessionPattern,
    NetworkAbuse,
    ContentSpam,
    DeviceFarm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Contribution to the aggregate suspicion score.
    fn weight(&self) -> Fixed {
        match self {
            Severity::Low => Fixed::from_percent(25),
            Severity::Medium => Fixed::from_percent(50),
            Severity::High => Fixed::from_percent(75),
            Severity::Critical => Fixed::ONE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspiciousFinding {
    pub kind: FindingKind,
    pub severity: Severity,
    /// Confidence in [0, 1].
    pub confidence: Fixed,
}

/// Per-factor scores in [0, 1], kept for the audit trail.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FactorScores {
    pub biometric: f64,
    pub behavioral: f64,
    pub social: f64,
    pub device: f64,
    pub temporal: f64,
    pub content: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HumanAssessment {
    /// Weighted human probability, clamped to [0.1, 1.0].
    pub score: Fixed,
    pub findings: Vec<SuspiciousFinding>,
    pub factors: FactorScores,
}

impl HumanAssessment {
    /// Fallback when the signal source is unreachable within budget.
    pub fn neutral() -> Self {
        HumanAssessment {
            score: Fixed::from_percent(50),
            findings: Vec::new(),
            factors: FactorScores {
                biometric: 0.5,
                behavioral: 0.5,
                social: 0.5,
                device: 0.5,
                temporal: 0.5,
                content: 0.5,
            },
        }
    }

    pub fn has_critical(&self) -> bool {
        self.findings
            .iter()
            .any(|f| f.severity == Severity::Critical)
    }

    pub fn has_at_least(&self, severity: Severity) -> bool {
        self.findings.iter().any(|f| f.severity >= severity)
    }

    /// Aggregate suspicion in [0, 1]: severity weight x confidence, summed.
    pub fn suspicious_score(&self) -> Fixed {
        let mut total = Fixed::ZERO;
        for finding in &self.findings {
            let contribution = finding
                .severity
                .weight()
                .checked_mul(finding.confidence)
                .unwrap_or(Fixed::ZERO);
            total = total.checked_add(contribution).unwrap_or(total);
        }
        total.min(Fixed::ONE)
    }

    pub fn blocks_session_start(&self) -> bool {
        self.has_critical()
            || self.score < Fixed::from_percent(HUMAN_SCORE_SESSION_START_MIN_PERCENT)
    }

    pub fn blocks_accrual(&self) -> bool {
        self.score < Fixed::from_percent(HUMAN_SCORE_ACCRUAL_MIN_PERCENT)
    }
}

/// A member of a flagged address or device group from the network sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepFlag {
    pub user_id: UserId,
    pub kind: FindingKind,
    pub group_key: String,
    pub group_size: u32,
}

pub struct AntiBotScorer {
    signals: Arc<dyn AntiBotSignals>,
    spam_patterns: Vec<Regex>,
}

impl AntiBotScorer {
    pub fn new(signals: Arc<dyn AntiBotSignals>) -> Self {
        let spam_patterns = [
            r"(?i)\b(buy|sell)\s+followers\b",
            r"(?i)\bfollow\s+me\s+back\b",
            r"(?i)\b(free|airdrop)\s+(crypto|token|nft)s?\b",
            r"(?i)\bclick\s+(the\s+)?link\b",
            r"(.)\1{9,}",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect();
        AntiBotScorer {
            signals,
            spam_patterns,
        }
    }

    /// Score a user, optionally in the context of one event. Signal-source
    /// failures neutralize the affected factor rather than failing the
    /// event.
    pub async fn evaluate(
        &self,
        user: &User,
        snapshot: Option<&ReferralNetworkSnapshot>,
        event: Option<&ActivityEvent>,
    ) -> Result<HumanAssessment, EngineError> {
        let mut findings = Vec::new();

        let biometric = match self.signals.biometric_similarity(&user.id).await {
            Ok(similarity) => biometric_score(similarity),
            Err(err) => {
                log::warn!("biometric signal unavailable for {}: {err:#}", user.id);
                0.5
            }
        };

        let behavioral = match self.signals.recent_event_intervals_ms(&user.id).await {
            Ok(intervals) => {
                let (score, finding) = behavioral_score(&intervals);
                findings.extend(finding);
                score
            }
            Err(err) => {
                log::warn!("behavioral signal unavailable for {}: {err:#}", user.id);
                0.5
            }
        };

        let social = social_score(snapshot);

        let device = {
            let shares = self
                .signals
                .device_share_counts(&user.id)
                .await
                .unwrap_or_else(|_| vec![1]);
            let ip_share = self.signals.ip_share_count(&user.id).await.unwrap_or(1);
            let (score, device_findings) = device_score(&shares, ip_share);
            findings.extend(device_findings);
            score
        };

        let temporal = match self.signals.activity_hour_histogram(&user.id).await {
            Ok(histogram) => {
                let (score, finding) = temporal_score(&histogram);
                findings.extend(finding);
                score
            }
            Err(err) => {
                log::warn!("temporal signal unavailable for {}: {err:#}", user.id);
                0.5
            }
        };

        let content = match event {
            Some(event) => {
                let duplicates = match content_hash(event) {
                    Some(hash) => self
                        .signals
                        .content_duplicate_count(&hash)
                        .await
                        .unwrap_or(0),
                    None => 0,
                };
                let (score, finding) = self.content_score(event, duplicates);
                findings.extend(finding);
                score
            }
            None => 0.6,
        };

        let factors = FactorScores {
            biometric,
            behavioral,
            social,
            device,
            temporal,
            content,
        };

        let weighted = biometric * WEIGHT_BIOMETRIC as f64
            + behavioral * WEIGHT_BEHAVIORAL as f64
            + social * WEIGHT_SOCIAL_GRAPH as f64
            + device * WEIGHT_DEVICE as f64
            + temporal * WEIGHT_TEMPORAL as f64
            + content * WEIGHT_CONTENT as f64;
        let score = Fixed::from_f64_lossy(weighted / 10_000.0).clamp(
            Fixed::from_percent(HUMAN_SCORE_MIN_PERCENT),
            Fixed::from_percent(HUMAN_SCORE_MAX_PERCENT),
        );

        Ok(HumanAssessment {
            score,
            findings,
            factors,
        })
    }

    fn content_score(
        &self,
        event: &ActivityEvent,
        duplicates: u32,
    ) -> (f64, Option<SuspiciousFinding>) {
        let text = match &event.content_text {
            Some(text) => text,
            None => return (0.6, None),
        };

        let mut score: f64 = 1.0;
        let mut worst: Option<SuspiciousFinding> = None;

        if duplicates > 0 {
            score = 1.0 / (1.0 + duplicates as f64);
            if duplicates >= 3 {
                worst = Some(SuspiciousFinding {
                    kind: FindingKind::ContentSpam,
                    severity: if duplicates >= 10 {
                        Severity::High
                    } else {
                        Severity::Medium
                    },
                    confidence: Fixed::from_ratio(duplicates.min(20) as u64, 20).unwrap_or(Fixed::ONE),
                });
            }
        }

        if self.spam_patterns.iter().any(|p| p.is_match(text)) {
            score *= 0.3;
            worst = Some(SuspiciousFinding {
                kind: FindingKind::ContentSpam,
                severity: Severity::High,
                confidence: Fixed::from_percent(90),
            });
        }

        if text.chars().count() < 10 {
            score *= 0.7;
        }

        (score.clamp(0.05, 1.0), worst)
    }

    /// Network-wide sweep: flag every member of an address or device group
    /// above the farm thresholds.
    pub async fn network_sweep(&self) -> Result<Vec<SweepFlag>, EngineError> {
        let mut flags = Vec::new();

        let ip_groups = self.signals.ip_groups().await.map_err(|source| {
            EngineError::DependencyUnavailable {
                dependency: "anti-bot-signals",
                source,
            }
        })?;
        for (key, members) in ip_groups {
            if members.len() as u32 > SWEEP_IP_GROUP_THRESHOLD {
                for user_id in &members {
                    flags.push(SweepFlag {
                        user_id: user_id.clone(),
                        kind: FindingKind::NetworkAbuse,
                        group_key: key.clone(),
                        group_size: members.len() as u32,
                    });
                }
            }
        }

        let device_groups = self.signals.device_groups().await.map_err(|source| {
            EngineError::DependencyUnavailable {
                dependency: "anti-bot-signals",
                source,
            }
        })?;
        for (key, members) in device_groups {
            if members.len() as u32 > SWEEP_DEVICE_GROUP_THRESHOLD {
                for user_id in &members {
                    flags.push(SweepFlag {
                        user_id: user_id.clone(),
                        kind: FindingKind::DeviceFarm,
                        group_key: key.clone(),
                        group_size: members.len() as u32,
                    });
                }
            }
        }

        Ok(flags)
    }
}

/// Hash of the event's content for network-wide dedup.
pub fn content_hash(event: &ActivityEvent) -> Option<String> {
    let text = event.content_text.as_deref()?;
    Some(blake3::hash(text.as_bytes()).to_hex().to_string())
}

fn biometric_score(similarity: Option<f64>) -> f64 {
    match similarity {
        Some(s) => s.clamp(0.0, 1.0),
        None => 0.5,
    }
}

/// Click-interval analysis: humans are irregular; scripts are fast and flat.
fn behavioral_score(intervals_ms: &[u64]) -> (f64, Option<SuspiciousFinding>) {
    if intervals_ms.len() < 3 {
        return (0.6, None);
    }

    let n = intervals_ms.len() as f64;
    let mean = intervals_ms.iter().map(|&v| v as f64).sum::<f64>() / n;
    if mean <= 0.0 {
        return (0.1, Some(critical_click_speed()));
    }
    let variance = intervals_ms
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let cv = variance.sqrt() / mean;

    // Coefficient of variation near zero means machine-regular timing.
    let mut score = cv.min(1.2) / 1.2;

    let finding = if mean < SUSPICIOUS_CLICK_INTERVAL_MS as f64 {
        score *= 0.3;
        Some(if mean < SUSPICIOUS_CLICK_INTERVAL_MS as f64 / 3.0 {
            critical_click_speed()
        } else {
            SuspiciousFinding {
                kind: FindingKind::ClickSpeed,
                severity: Severity::High,
                confidence: Fixed::from_percent(80),
            }
        })
    } else if cv < 0.05 {
        score = score.min(0.2);
        Some(SuspiciousFinding {
            kind: FindingKind::SessionPattern,
            severity: Severity::Medium,
            confidence: Fixed::from_percent(70),
        })
    } else {
        None
    };

    (score.clamp(0.0, 1.0), finding)
}

fn critical_click_speed() -> SuspiciousFinding {
    SuspiciousFinding {
        kind: FindingKind::ClickSpeed,
        severity: Severity::Critical,
        confidence: Fixed::from_percent(95),
    }
}

/// Social graph authenticity from the referral snapshot: a live, diverse
/// subtree reads as human; no network reads as unknown.
fn social_score(snapshot: Option<&ReferralNetworkSnapshot>) -> f64 {
    match snapshot {
        Some(snapshot) if snapshot.total_network_size() > 0 => {
            0.3 + 0.7 * snapshot.quality_score.to_f64_lossy().clamp(0.0, 1.0)
        }
        _ => 0.5,
    }
}

/// Device-sharing analysis; fan-out across many accounts reads as a farm.
fn device_score(share_counts: &[u32], ip_share: u32) -> (f64, Vec<SuspiciousFinding>) {
    let mut findings = Vec::new();
    let worst_share = share_counts.iter().copied().max().unwrap_or(1).max(1);

    let mut score = (1.0 / worst_share as f64).max(0.1);
    if worst_share > SWEEP_DEVICE_GROUP_THRESHOLD {
        findings.push(SuspiciousFinding {
            kind: FindingKind::DeviceFarm,
            severity: if worst_share > SWEEP_DEVICE_GROUP_THRESHOLD * 2 {
                Severity::Critical
            } else {
                Severity::High
            },
            confidence: Fixed::from_percent(85),
        });
        score = score.min(0.15);
    }

    if ip_share > SWEEP_IP_GROUP_THRESHOLD {
        findings.push(SuspiciousFinding {
            kind: FindingKind::NetworkAbuse,
            severity: Severity::Medium,
            confidence: Fixed::from_percent(60),
        });
        score *= 0.6;
    }

    (score.clamp(0.0, 1.0), findings)
}

/// Circadian analysis: humans rest; round-the-clock flat activity does not.
fn temporal_score(histogram: &[u32; 24]) -> (f64, Option<SuspiciousFinding>) {
    let total: u64 = histogram.iter().map(|&h| h as u64).sum();
    if total == 0 {
        return (0.5, None);
    }

    let quiet_hours = histogram.iter().filter(|&&h| h == 0).count();
    let max = histogram.iter().copied().max().unwrap_or(0) as f64;
    let min_nonzero = histogram
        .iter()
        .copied()
        .filter(|&h| h > 0)
        .min()
        .unwrap_or(0) as f64;
    let flatness = if max > 0.0 { min_nonzero / max } else { 0.0 };

    let rest = (quiet_hours.min(8) as f64) / 8.0;
    let variability = 1.0 - flatness;
    let score = 0.7 * rest + 0.3 * variability;

    let finding = if quiet_hours == 0 {
        Some(SuspiciousFinding {
            kind: FindingKind::SessionPattern,
            severity: if flatness > 0.8 {
                Severity::High
            } else {
                Severity::Medium
            },
            confidence: Fixed::from_percent(75),
        })
    } else {
        None
    };

    (score.clamp(0.0, 1.0), finding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MemorySignals, MockClock};
    use crate::adapters::Clock;
    use crate::state::activity::{ActivityKind, Platform};

    fn user() -> User {
        User::register(UserId::new("u"), true, MockClock::fixed().now())
    }

    fn event(text: Option<&str>) -> ActivityEvent {
        ActivityEvent {
            user_id: UserId::new("u"),
            client_event_id: "e1".into(),
            platform: Platform::TikTok,
            kind: ActivityKind::Post,
            content_ref: Some("post-1".into()),
            content_text: text.map(|t| t.to_string()),
            observed_at: MockClock::fixed().now(),
            client_signature: "sig".into(),
            device_hash: None,
        }
    }

    #[test]
    fn regular_fast_clicks_are_critical() {
        let (score, finding) = behavioral_score(&[20, 21, 20, 19, 20, 21]);
        assert!(score < 0.1);
        assert_eq!(finding.unwrap().severity, Severity::Critical);
    }

    #[test]
    fn irregular_human_timing_scores_high() {
        let (score, finding) = behavioral_score(&[800, 2_500, 1_100, 9_000, 400, 3_200]);
        assert!(score > 0.7, "got {score}");
        assert!(finding.is_none());
    }

    #[test]
    fn flat_timing_at_human_speed_is_a_session_pattern() {
        let (score, finding) = behavioral_score(&[1_000, 1_000, 1_001, 999, 1_000, 1_000]);
        assert!(score <= 0.2);
        assert_eq!(finding.unwrap().kind, FindingKind::SessionPattern);
    }

    #[test]
    fn device_farms_are_flagged() {
        let (score, findings) = device_score(&[1, 2, 12], 1);
        assert!(score < 0.2);
        assert_eq!(findings[0].kind, FindingKind::DeviceFarm);
        assert_eq!(findings[0].severity, Severity::Critical);

        let (clean_score, clean_findings) = device_score(&[1], 1);
        assert_eq!(clean_score, 1.0);
        assert!(clean_findings.is_empty());
    }

    #[test]
    fn round_the_clock_activity_is_suspicious() {
        let flat = [10u32; 24];
        let (score, finding) = temporal_score(&flat);
        assert!(score < 0.3);
        assert_eq!(finding.unwrap().severity, Severity::High);

        let mut human = [0u32; 24];
        for hour in 8..23 {
            human[hour] = 3 + (hour % 5) as u32;
        }
        let (human_score, human_finding) = temporal_score(&human);
        assert!(human_score > 0.7);
        assert!(human_finding.is_none());
    }

    #[tokio::test]
    async fn weighted_score_lands_in_bounds() {
        let signals = Arc::new(MemorySignals::new());
        let id = UserId::new("u");
        signals.set_biometric(&id, Some(0.9));
        signals.set_intervals(&id, vec![800, 2_500, 1_100, 9_000, 400, 3_200]);
        let mut histogram = [0u32; 24];
        for hour in 9..22 {
            histogram[hour] = 2 + (hour % 3) as u32;
        }
        signals.set_hour_histogram(&id, histogram);

        let scorer = AntiBotScorer::new(signals);
        let assessment = scorer.evaluate(&user(), None, None).await.unwrap();
        assert!(assessment.score >= Fixed::from_percent(10));
        assert!(assessment.score <= Fixed::ONE);
        assert!(!assessment.blocks_session_start());
    }

    #[tokio::test]
    async fn spam_content_is_flagged() {
        let signals = Arc::new(MemorySignals::new());
        let scorer = AntiBotScorer::new(signals);
        let spam = event(Some("FREE crypto airdrop!! click the link now"));
        let assessment = scorer.evaluate(&user(), None, Some(&spam)).await.unwrap();
        assert!(assessment
            .findings
            .iter()
            .any(|f| f.kind == FindingKind::ContentSpam && f.severity == Severity::High));
    }

    #[tokio::test]
    async fn duplicated_content_raises_suspicion() {
        let signals = Arc::new(MemorySignals::new());
        let copied = event(Some("the same text again and again"));
        let hash = content_hash(&copied).unwrap();
        signals.set_content_duplicates(&hash, 12);

        let scorer = AntiBotScorer::new(signals);
        let assessment = scorer.evaluate(&user(), None, Some(&copied)).await.unwrap();
        let finding = assessment
            .findings
            .iter()
            .find(|f| f.kind == FindingKind::ContentSpam)
            .unwrap();
        assert_eq!(finding.severity, Severity::High);
    }

    #[tokio::test]
    async fn sweep_flags_whole_groups() {
        let signals = Arc::new(MemorySignals::new());
        let big_group: Vec<UserId> = (0..25).map(|i| UserId::new(format!("ip-{i}"))).collect();
        signals.set_ip_groups(vec![
            ("10.0.0.1".into(), big_group.clone()),
            ("10.0.0.2".into(), vec![UserId::new("solo")]),
        ]);
        signals.set_device_groups(vec![(
            "device-A".into(),
            (0..6).map(|i| UserId::new(format!("dev-{i}"))).collect(),
        )]);

        let scorer = AntiBotScorer::new(signals);
        let flags = scorer.network_sweep().await.unwrap();
        let ip_flags: Vec<_> = flags
            .iter()
            .filter(|f| f.kind == FindingKind::NetworkAbuse)
            .collect();
        let device_flags: Vec<_> = flags
            .iter()
            .filter(|f| f.kind == FindingKind::DeviceFarm)
            .collect();
        assert_eq!(ip_flags.len(), 25);
        assert_eq!(device_flags.len(), 6);
        assert!(!flags.iter().any(|f| f.user_id == UserId::new("solo")));
    }

    #[test]
    fn suspicion_aggregates_severity_and_confidence() {
        let assessment = HumanAssessment {
            score: Fixed::from_percent(70),
            findings: vec![
                SuspiciousFinding {
                    kind: FindingKind::ClickSpeed,
                    severity: Severity::Medium,
                    confidence: Fixed::ONE,
                },
                SuspiciousFinding {
                    kind: FindingKind::ContentSpam,
                    severity: Severity::Low,
                    confidence: Fixed::from_percent(50),
                },
            ],
            factors: FactorScores::default(),
        };
        // 0.5 x 1.0 + 0.25 x 0.5 = 0.625
        assert_eq!(assessment.suspicious_score(), Fixed::from_ratio(625, 1_000).unwrap());
        assert!(!assessment.has_critical());
    }
}
