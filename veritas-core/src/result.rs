//! Scoring results and degradation status
//!
//! A degraded result is still a result: it carries a best-effort score plus
//! the machine-readable reasons explaining which dependencies were missing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Category, FeatureVector, Label, Modality, ScoreSource, SubScore, FEATURE_VERSION};

/// Why a result is degraded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DegradationReason {
    /// No classifier file found or it failed to load
    ModelUnavailable,
    /// Vision service missing, unreachable or unparseable
    VisionUnavailable,
    /// URL content could not be retrieved
    ExtractionFailed,
    /// Caller deadline expired during network I/O
    DeadlineExceeded,
}

impl DegradationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ModelUnavailable => "model-unavailable",
            Self::VisionUnavailable => "vision-unavailable",
            Self::ExtractionFailed => "extraction-failed",
            Self::DeadlineExceeded => "deadline-exceeded",
        }
    }
}

impl std::fmt::Display for DegradationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall outcome of a scoring run
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "reasons", rename_all = "snake_case")]
pub enum Status {
    #[default]
    Ok,
    Degraded(Vec<DegradationReason>),
}

impl Status {
    /// Add a reason; reasons accumulate and are never duplicated
    pub fn degrade(&mut self, reason: DegradationReason) {
        match self {
            Self::Ok => *self = Self::Degraded(vec![reason]),
            Self::Degraded(reasons) => {
                if !reasons.contains(&reason) {
                    reasons.push(reason);
                }
            }
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }

    pub fn reasons(&self) -> &[DegradationReason] {
        match self {
            Self::Ok => &[],
            Self::Degraded(reasons) => reasons,
        }
    }

    pub fn has(&self, reason: DegradationReason) -> bool {
        self.reasons().contains(&reason)
    }
}

/// Externally visible output of the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringResult {
    pub request_id: Uuid,
    pub scored_at: DateTime<Utc>,
    pub modality: Modality,
    /// Fused score and label
    pub combined: SubScore,
    /// Per-modality scores that fed the fusion
    pub sub_scores: Vec<SubScore>,
    pub rationale: String,
    /// Features used for the text score; absent for image-only requests
    pub features: Option<FeatureVector>,
    pub feature_version: u32,
    pub status: Status,
    pub keywords: Vec<String>,
    pub category: Category,
    pub text_preview: String,
    pub has_media: bool,
    /// Free-form answer from the vision service, when one was obtained
    pub vision_rationale: Option<String>,
    /// Plain-language explanation of the verdict from the LLM service
    pub explanation: Option<String>,
}

impl ScoringResult {
    pub fn new(modality: Modality, combined: SubScore, features: Option<FeatureVector>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            scored_at: Utc::now(),
            modality,
            combined,
            sub_scores: Vec::new(),
            rationale: String::new(),
            features,
            feature_version: FEATURE_VERSION,
            status: Status::Ok,
            keywords: Vec::new(),
            category: Category::Other,
            text_preview: String::new(),
            has_media: false,
            vision_rationale: None,
            explanation: None,
        }
    }

    pub fn score(&self) -> f64 {
        self.combined.score
    }

    pub fn label(&self) -> Label {
        self.combined.level
    }

    pub fn sub_score(&self, source: ScoreSource) -> Option<&SubScore> {
        self.sub_scores.iter().find(|s| s.source == source)
    }

    /// One-line summary for persistence collaborators
    pub fn summary(&self) -> String {
        let mut line = format!(
            "[{}] credibility {} ({:.2})",
            self.modality,
            self.label(),
            self.score()
        );
        if self.status.is_degraded() {
            let reasons: Vec<_> = self.status.reasons().iter().map(|r| r.as_str()).collect();
            line.push_str(&format!(" degraded: {}", reasons.join(", ")));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degradations_compose() {
        let mut status = Status::Ok;
        status.degrade(DegradationReason::ModelUnavailable);
        status.degrade(DegradationReason::VisionUnavailable);
        status.degrade(DegradationReason::ModelUnavailable);

        assert!(status.is_degraded());
        assert_eq!(
            status.reasons(),
            &[DegradationReason::ModelUnavailable, DegradationReason::VisionUnavailable]
        );
    }

    #[test]
    fn test_status_serialization() {
        let mut status = Status::Ok;
        status.degrade(DegradationReason::VisionUnavailable);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "degraded");
        assert_eq!(json["reasons"][0], "vision-unavailable");
    }

    #[test]
    fn test_summary_line() {
        let mut result = ScoringResult::new(
            Modality::Text,
            SubScore::new(ScoreSource::Combined, 0.65),
            Some(FeatureVector::neutral()),
        );
        assert_eq!(result.summary(), "[text] credibility high (0.65)");

        result.status.degrade(DegradationReason::ModelUnavailable);
        assert!(result.summary().ends_with("degraded: model-unavailable"));
    }

    #[test]
    fn test_image_result_has_no_features() {
        let result = ScoringResult::new(
            Modality::Image,
            SubScore::new(ScoreSource::Combined, 0.5),
            None,
        );
        let json = serde_json::to_value(&result).unwrap();
        assert!(json["features"].is_null());
        assert!(json["explanation"].is_null());
    }
}
