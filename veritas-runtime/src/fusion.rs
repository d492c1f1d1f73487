//! Score fusion, heuristic fallback and rationale text

use veritas_core::{
    round4, DegradationReason, FeatureVector, Label, Modality, Status, NEUTRAL_SCORE,
};

/// Text score used when no classifier is loaded.
///
/// Rates the content on a 1-5 scale from domain trust, penalized by
/// hyperbole and emotive density, then maps it back to [0, 1].
pub fn heuristic_score(features: &FeatureVector) -> f64 {
    let penalty = 2.5 * (features.hyperbole_density + features.emotive_density);
    let rating = (features.domain_trust * 5.0 - penalty).clamp(1.0, 5.0);
    round4((rating / 5.0 + 0.1).min(1.0))
}

/// Combine per-modality scores.
///
/// Both present: arithmetic mean rounded to 4 digits. One present: that
/// score unchanged. Neither: neutral.
pub fn fuse(text: Option<f64>, vision: Option<f64>) -> f64 {
    match (text, vision) {
        (Some(t), Some(v)) => round4((t + v) / 2.0),
        (Some(t), None) => t,
        (None, Some(v)) => v,
        (None, None) => NEUTRAL_SCORE,
    }
}

const IMAGE_UNASSESSED: &str =
    "Cannot assess image: the vision service is unavailable, so a neutral score was used.";
const MIXED_IMAGE_UNASSESSED: &str =
    "The image could not be assessed; the score reflects the text only.";
const VISION_CONSULTED: &str = "The attached image was reviewed by the vision service.";
const MODEL_MISSING: &str =
    "No trained classifier is available; the text score is a heuristic estimate.";
const EXTRACTION_FAILED: &str =
    "The page could not be retrieved; the score is based on the link alone.";
const DEADLINE_HIT: &str = "The deadline expired before every check finished.";

/// Fixed-template rationale for a result
pub fn compose_rationale(label: Label, modality: Modality, status: &Status) -> String {
    let mut lines = vec![label.rationale()];

    if modality.uses_vision() {
        lines.push(match (status.has(DegradationReason::VisionUnavailable), modality) {
            (true, Modality::Image) => IMAGE_UNASSESSED,
            (true, _) => MIXED_IMAGE_UNASSESSED,
            (false, _) => VISION_CONSULTED,
        });
    }

    for reason in status.reasons() {
        match reason {
            DegradationReason::ModelUnavailable => lines.push(MODEL_MISSING),
            DegradationReason::ExtractionFailed => lines.push(EXTRACTION_FAILED),
            DegradationReason::DeadlineExceeded => lines.push(DEADLINE_HIT),
            DegradationReason::VisionUnavailable => {}
        }
    }

    lines.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_fusion_is_exact() {
        assert_eq!(fuse(Some(0.6), Some(0.4)), 0.5);
        assert_eq!(fuse(Some(0.4), Some(0.6)), 0.5);
        assert_eq!(fuse(Some(0.12345), Some(0.5)), 0.3117);
    }

    #[test]
    fn test_fusion_single_and_empty() {
        assert_eq!(fuse(Some(0.7), None), 0.7);
        assert_eq!(fuse(None, Some(0.3)), 0.3);
        assert_eq!(fuse(None, None), NEUTRAL_SCORE);
    }

    #[test]
    fn test_heuristic_score() {
        let neutral = FeatureVector::neutral();
        let calm = FeatureVector {
            domain_trust: 1.0,
            hyperbole_density: 0.0,
            emotive_density: 0.0,
            ..neutral
        };
        assert_eq!(heuristic_score(&calm), 1.0);

        let loud = FeatureVector {
            domain_trust: 0.5,
            hyperbole_density: 1.0,
            emotive_density: 1.0,
            ..neutral
        };
        // Rating floors at 1
        assert_eq!(heuristic_score(&loud), 0.3);
    }

    #[test]
    fn test_heuristic_is_monotonic_in_hyperbole() {
        let base = FeatureVector {
            domain_trust: 0.8,
            hyperbole_density: 0.0,
            emotive_density: 0.0,
            ..FeatureVector::neutral()
        };
        let mut previous = heuristic_score(&base);
        for step in 1..=10 {
            let features = FeatureVector {
                hyperbole_density: step as f64 / 10.0,
                ..base
            };
            let score = heuristic_score(&features);
            assert!(score <= previous);
            previous = score;
        }
    }

    #[test]
    fn test_rationale_lines() {
        let mut status = Status::Ok;
        status.degrade(DegradationReason::VisionUnavailable);
        status.degrade(DegradationReason::ModelUnavailable);

        let image = compose_rationale(Label::Medium, Modality::Image, &status);
        assert!(image.starts_with(Label::Medium.rationale()));
        assert!(image.contains("Cannot assess image"));

        let mixed = compose_rationale(Label::High, Modality::Mixed, &status);
        assert!(mixed.contains("text only"));
        assert!(mixed.contains("heuristic estimate"));

        let text = compose_rationale(Label::High, Modality::Text, &Status::Ok);
        assert_eq!(text, Label::High.rationale());
    }
}
