//! Gate over the external content-quality model.
//!
//! The model's verdict is clamped to [0.5, 2.0]. A slow or failing model
//! never fails the event: after the 200ms budget and the retry allowance
//! the gate hands back the neutral score and marks the outcome degraded.
//! Scores are pinned per content reference for five minutes so identical
//! inputs stay deterministic inside the window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::adapters::{Clock, QualityScorer};
use crate::constants::*;
use crate::math::Fixed;
use crate::state::activity::Platform;

/// Outcome of a quality lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityVerdict {
    pub score: Fixed,
    /// True when the neutral fallback was used.
    pub degraded: bool,
}

struct PinnedScore {
    score: Fixed,
    pinned_at: DateTime<Utc>,
}

pub struct QualityGate {
    scorer: Arc<dyn QualityScorer>,
    clock: Arc<dyn Clock>,
    pins: Mutex<HashMap<(String, Platform), PinnedScore>>,
}

impl QualityGate {
    pub fn new(scorer: Arc<dyn QualityScorer>, clock: Arc<dyn Clock>) -> Self {
        QualityGate {
            scorer,
            clock,
            pins: Mutex::new(HashMap::new()),
        }
    }

    pub fn neutral() -> Fixed {
        Fixed::from_percent(QUALITY_SCORE_NEUTRAL_PERCENT)
    }

    fn clamp(score: Fixed) -> Fixed {
        score.clamp(
            Fixed::from_percent(QUALITY_SCORE_MIN_PERCENT),
            Fixed::from_percent(QUALITY_SCORE_MAX_PERCENT),
        )
    }

    /// Score a piece of content, degrading to neutral on failure.
    pub async fn score(&self, content_ref: Option<&str>, platform: Platform) -> QualityVerdict {
        let content_ref = match content_ref {
            Some(reference) => reference,
            None => {
                return QualityVerdict {
                    score: Self::neutral(),
                    degraded: false,
                }
            }
        };

        let now = self.clock.now();
        let key = (content_ref.to_string(), platform);
        if let Some(pinned) = self.pins.lock().get(&key) {
            if now
                .signed_duration_since(pinned.pinned_at)
                .num_seconds()
                < QUALITY_PIN_WINDOW_SECS
            {
                return QualityVerdict {
                    score: pinned.score,
                    degraded: false,
                };
            }
        }

        for attempt in 0..DEPENDENCY_RETRIES {
            let call = self.scorer.score(content_ref, platform);
            match tokio::time::timeout(Duration::from_millis(QUALITY_SCORER_BUDGET_MS), call).await
            {
                Ok(Ok(raw)) => {
                    let score = Self::clamp(raw);
                    self.pins.lock().insert(
                        key,
                        PinnedScore {
                            score,
                            pinned_at: now,
                        },
                    );
                    return QualityVerdict {
                        score,
                        degraded: false,
                    };
                }
                Ok(Err(err)) => {
                    log::warn!("quality scorer failed (attempt {attempt}): {err:#}");
                }
                Err(_) => {
                    log::warn!("quality scorer exceeded its {QUALITY_SCORER_BUDGET_MS}ms budget");
                }
            }
        }

        log::warn!("quality scoring degraded to neutral for {content_ref}");
        QualityVerdict {
            score: Self::neutral(),
            degraded: true,
        }
    }
}
