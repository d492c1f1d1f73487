//! Article feature annotations
//!
//! Eight 0..1 sub-scores plus a short verdict, obtained from the LLM service
//! or simulated from lexical heuristics when no service is configured.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;
use veritas_core::{round4, DomainTrustTable, EMOTIVE_MARKERS, HYPERBOLE_MARKERS, NEUTRAL_SCORE};

static WORD_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").unwrap());

static YEAR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:19|20)\d{2}\b").unwrap());

static SCHOLARLY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:doi|pubmed|arxiv)\b").unwrap());

static DEEP_LINK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s/]+/\S*\d").unwrap());

static AD_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)buy now|subscribe|discount|promo code|購買|優惠|限時|廣告|贊助|聯盟").unwrap()
});

/// Who produced an annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationSource {
    Service,
    #[default]
    Simulated,
}

/// Sub-feature scores for one article
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureAnnotation {
    pub source_entity_score: f64,
    pub domain_score: f64,
    pub title_body_consistency: f64,
    pub evidence_quality: f64,
    pub ad_promo_intensity: f64,
    pub hyperbole_score: f64,
    pub emotive_clickbait_density: f64,
    pub title_body_embedding_cosine: f64,
    #[serde(default)]
    pub short_judgement: String,
    #[serde(default)]
    pub source: AnnotationSource,
}

impl FeatureAnnotation {
    /// Parse a service reply; tolerates prose or code fences around the JSON
    pub fn from_response(response: &str, max_judgement_chars: usize) -> Option<Self> {
        let start = response.find('{')?;
        let end = response.rfind('}')?;
        if end < start {
            return None;
        }

        let mut annotation: Self = serde_json::from_str(&response[start..=end]).ok()?;
        annotation.clamp_scores();
        annotation.short_judgement = annotation
            .short_judgement
            .trim()
            .chars()
            .take(max_judgement_chars)
            .collect();
        annotation.source = AnnotationSource::Service;
        Some(annotation)
    }

    /// Heuristic annotation from domain trust and lexical cues
    pub fn simulate(title: &str, content: &str, url: &str, trust: &DomainTrustTable) -> Self {
        let domain_score = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| trust.score(h)))
            .unwrap_or(NEUTRAL_SCORE);

        let overlap = token_overlap(title, content);
        let emotive = emotive_density(content);
        let evidence = evidence_score(content);
        let ad = if AD_REGEX.is_match(content) { 0.7 } else { 0.0 };
        let consistency = (overlap * 1.2).min(1.0);

        let short_judgement = if domain_score >= 0.8 && evidence >= 0.6 {
            "highly credible"
        } else if emotive > 0.6 || ad >= 0.7 {
            "suspicious or promotional"
        } else if consistency < 0.4 {
            "title does not match body"
        } else {
            "moderately credible"
        };

        Self {
            source_entity_score: round4(domain_score),
            domain_score: round4(domain_score),
            title_body_consistency: round4(consistency),
            evidence_quality: round4(evidence),
            ad_promo_intensity: ad,
            hyperbole_score: round4((emotive * 0.8).min(1.0)),
            emotive_clickbait_density: round4(emotive),
            title_body_embedding_cosine: round4(overlap.min(1.0)),
            short_judgement: short_judgement.to_string(),
            source: AnnotationSource::Simulated,
        }
    }

    /// Scores in a fixed order, paired with their names
    pub fn scores(&self) -> [(&'static str, f64); 8] {
        [
            ("source_entity_score", self.source_entity_score),
            ("domain_score", self.domain_score),
            ("title_body_consistency", self.title_body_consistency),
            ("evidence_quality", self.evidence_quality),
            ("ad_promo_intensity", self.ad_promo_intensity),
            ("hyperbole_score", self.hyperbole_score),
            ("emotive_clickbait_density", self.emotive_clickbait_density),
            ("title_body_embedding_cosine", self.title_body_embedding_cosine),
        ]
    }

    fn clamp_scores(&mut self) {
        for value in [
            &mut self.source_entity_score,
            &mut self.domain_score,
            &mut self.title_body_consistency,
            &mut self.evidence_quality,
            &mut self.ad_promo_intensity,
            &mut self.hyperbole_score,
            &mut self.emotive_clickbait_density,
            &mut self.title_body_embedding_cosine,
        ] {
            *value = if value.is_finite() {
                value.clamp(0.0, 1.0)
            } else {
                NEUTRAL_SCORE
            };
        }
    }
}

/// Share of title words that also appear in the body
fn token_overlap(title: &str, content: &str) -> f64 {
    let words = |text: &str| -> HashSet<String> {
        WORD_REGEX
            .find_iter(&text.to_lowercase())
            .map(|m| m.as_str().to_string())
            .collect()
    };
    let title_words = words(title);
    if title_words.is_empty() {
        return 0.0;
    }
    let body_words = words(content);
    title_words.intersection(&body_words).count() as f64 / title_words.len() as f64
}

/// Emotive and hyperbolic markers per 100 characters, capped at 1
fn emotive_density(content: &str) -> f64 {
    let lowered = content.to_lowercase();
    let count: usize = HYPERBOLE_MARKERS
        .iter()
        .chain(EMOTIVE_MARKERS.iter())
        .map(|m| lowered.matches(m).count())
        .sum();
    let per_hundred = content.chars().count().max(1) as f64 / 100.0;
    (count as f64 / per_hundred).min(1.0)
}

fn evidence_score(content: &str) -> f64 {
    let mut score: f64 = 0.0;
    if YEAR_REGEX.is_match(content) {
        score += 0.3;
    }
    if SCHOLARLY_REGEX.is_match(content) {
        score += 0.5;
    }
    if DEEP_LINK_REGEX.is_match(content) {
        score += 0.2;
    }
    score.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fenced_response() {
        let response = r#"Here is the result:
```json
{"source_entity_score": 0.9, "domain_score": 0.95, "title_body_consistency": 0.8,
 "evidence_quality": 1.4, "ad_promo_intensity": 0.0, "hyperbole_score": 0.1,
 "emotive_clickbait_density": -0.2, "title_body_embedding_cosine": 0.7,
 "short_judgement": "reliable wire report with sourced figures"}
```"#;
        let annotation = FeatureAnnotation::from_response(response, 30).unwrap();
        assert_eq!(annotation.source, AnnotationSource::Service);
        assert_eq!(annotation.evidence_quality, 1.0);
        assert_eq!(annotation.emotive_clickbait_density, 0.0);
        assert_eq!(annotation.short_judgement.chars().count(), 30);
    }

    #[test]
    fn test_parse_rejects_missing_scores() {
        assert!(FeatureAnnotation::from_response("no json here", 30).is_none());
        assert!(FeatureAnnotation::from_response(r#"{"domain_score": 0.5}"#, 30).is_none());
    }

    #[test]
    fn test_simulate_trusted_source() {
        let trust = DomainTrustTable::default();
        let annotation = FeatureAnnotation::simulate(
            "Central bank raises rates",
            "The central bank raises rates by 0.25 points in 2024, according to data \
             published at https://www.cna.com.tw/news/20240321.",
            "https://www.cna.com.tw/news/aipl/202403210001.aspx",
            &trust,
        );
        assert_eq!(annotation.source, AnnotationSource::Simulated);
        assert_eq!(annotation.domain_score, 1.0);
        assert!((annotation.evidence_quality - 0.5).abs() < 1e-9);
        assert!(annotation.title_body_consistency > 0.9);
        assert_eq!(annotation.short_judgement, "moderately credible");
    }

    #[test]
    fn test_simulate_promotional_content() {
        let trust = DomainTrustTable::default();
        let annotation = FeatureAnnotation::simulate(
            "Miracle cure",
            "Buy now! Limited discount on the miracle cure, shocking results.",
            "https://bogus-news.xyz/deal",
            &trust,
        );
        assert_eq!(annotation.ad_promo_intensity, 0.7);
        assert!(annotation.domain_score < 0.3);
        assert_eq!(annotation.short_judgement, "suspicious or promotional");
    }

    #[test]
    fn test_scores_are_bounded() {
        let trust = DomainTrustTable::default();
        let annotation = FeatureAnnotation::simulate("", "震驚！爆料！", "not a url", &trust);
        for (name, value) in annotation.scores() {
            assert!((0.0..=1.0).contains(&value), "{} out of range: {}", name, value);
        }
        assert_eq!(annotation.domain_score, NEUTRAL_SCORE);
        assert_eq!(annotation.title_body_embedding_cosine, 0.0);
    }
}
