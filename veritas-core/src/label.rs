//! Credibility labels and sub-scores
//!
//! Every component that turns a score into a label goes through
//! [`Label::from_score`], so the threshold table lives in exactly one place.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Lower bounds for each label, highest first
const THRESHOLDS: &[(f64, Label)] = &[
    (0.8, Label::VeryHigh),
    (0.6, Label::High),
    (0.4, Label::Medium),
    (0.2, Label::Low),
];

/// Discrete credibility level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
    /// Missing or invalid score. Not ordered against the other labels.
    Unknown,
}

impl Label {
    /// Map a score in [0, 1] to its label.
    ///
    /// Non-finite or out-of-range scores are `Unknown`, never `VeryLow`.
    pub fn from_score(score: f64) -> Self {
        if !score.is_finite() || !(0.0..=1.0).contains(&score) {
            return Self::Unknown;
        }
        THRESHOLDS
            .iter()
            .find(|(bound, _)| score >= *bound)
            .map(|(_, label)| *label)
            .unwrap_or(Self::VeryLow)
    }

    fn rank(&self) -> Option<u8> {
        match self {
            Self::VeryLow => Some(0),
            Self::Low => Some(1),
            Self::Medium => Some(2),
            Self::High => Some(3),
            Self::VeryHigh => Some(4),
            Self::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        self.rank().is_some()
    }

    /// Display color used by front ends
    pub fn color(&self) -> &'static str {
        match self {
            Self::VeryHigh | Self::High => "green",
            Self::Medium => "yellow",
            Self::Low | Self::VeryLow => "red",
            Self::Unknown => "gray",
        }
    }

    /// Fixed rationale sentence for this label
    pub fn rationale(&self) -> &'static str {
        match self {
            Self::VeryHigh => "Content is clear and comes from a stable source; credibility is very high.",
            Self::High => "Neutral tone with identifiable sourcing; credibility is fairly high.",
            Self::Medium => "Credibility is moderate; cross-check with other sources before relying on it.",
            Self::Low => "Contains exaggerated or emotional language; verify carefully.",
            Self::VeryLow => "Likely misleading or bait content; do not trust or forward it.",
            Self::Unknown => "Credibility cannot be determined at the moment.",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VeryLow => "very low",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::VeryHigh => "very high",
            Self::Unknown => "unknown",
        }
    }
}

impl PartialOrd for Label {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.rank(), other.rank()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            (None, None) => Some(Ordering::Equal),
            _ => None,
        }
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which path produced a score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    Text,
    Vision,
    Combined,
}

/// A score with its label
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubScore {
    pub source: ScoreSource,
    pub score: f64,
    pub level: Label,
}

impl SubScore {
    /// Build a sub-score; the label comes from the full-precision score
    pub fn new(source: ScoreSource, score: f64) -> Self {
        Self {
            source,
            score,
            level: Label::from_score(score),
        }
    }
}
