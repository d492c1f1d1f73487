//! Text feature engineering
//!
//! Converts raw text into the fixed-order vector consumed by the classifier:
//!
//! | slot | feature |
//! |------|---------|
//! | 0 | domain trust (0..1) |
//! | 1 | length adequacy (1.0 above 50 tokens, else 0.5) |
//! | 2 | hyperbole marker density |
//! | 3 | emotive marker density |
//! | 4 | URL presence flag |
//! | 5 | semantic strength proxy |
//! | 6 | length ratio (tokens / 200, capped) |
//! | 7 | confidence placeholder (deterministic, 0.3..0.9) |
//!
//! The order is part of the contract with the trained model. Changing it
//! requires bumping [`FEATURE_VERSION`] and retraining.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::{round4, DomainTrustTable, NEUTRAL_SCORE};

/// Version of the slot layout below
pub const FEATURE_VERSION: u32 = 1;

/// Number of slots in a feature vector
pub const FEATURE_COUNT: usize = 8;

/// Slot names, in vector order
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "domain_trust",
    "length_adequacy",
    "hyperbole_density",
    "emotive_density",
    "url_presence",
    "semantic_strength",
    "length_ratio",
    "confidence_placeholder",
];

/// Default hyperbolic markers
pub const HYPERBOLE_MARKERS: &[&str] = &[
    "驚人", "爆料", "震撼", "絕對", "真相", "曝光", "震驚", "離譜", "不可思議",
    "大爆發", "獨家", "瘋傳", "秘密", "shocking", "unbelievable", "exposed",
];

/// Default emotive markers
pub const EMOTIVE_MARKERS: &[&str] = &[
    "氣炸", "哭了", "怒了", "慘了", "超扯", "崩潰", "怒吼", "小心", "馬上看",
    "急轉直下", "outrage", "must share",
];

const LONG_TEXT_TOKENS: usize = 50;
const FULL_LENGTH_TOKENS: f64 = 200.0;

static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s<>"']+"#).unwrap()
});

/// Fixed-order numeric encoding of a text
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub domain_trust: f64,
    pub length_adequacy: f64,
    pub hyperbole_density: f64,
    pub emotive_density: f64,
    pub url_presence: f64,
    pub semantic_strength: f64,
    pub length_ratio: f64,
    pub confidence_placeholder: f64,
}

impl FeatureVector {
    /// Vector of neutral defaults for degenerate input
    pub fn neutral() -> Self {
        Self::from_array([NEUTRAL_SCORE; FEATURE_COUNT])
    }

    pub fn from_array(values: [f64; FEATURE_COUNT]) -> Self {
        Self {
            domain_trust: values[0],
            length_adequacy: values[1],
            hyperbole_density: values[2],
            emotive_density: values[3],
            url_presence: values[4],
            semantic_strength: values[5],
            length_ratio: values[6],
            confidence_placeholder: values[7],
        }
    }

    /// Values in slot order
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.domain_trust,
            self.length_adequacy,
            self.hyperbole_density,
            self.emotive_density,
            self.url_presence,
            self.semantic_strength,
            self.length_ratio,
            self.confidence_placeholder,
        ]
    }

    pub fn len(&self) -> usize {
        FEATURE_COUNT
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Slot name and value pairs, for audit output
    pub fn named(&self) -> Vec<(&'static str, f64)> {
        FEATURE_NAMES.iter().copied().zip(self.to_array()).collect()
    }
}

/// Builds feature vectors from text
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    trust: DomainTrustTable,
    hyperbole: Vec<String>,
    emotive: Vec<String>,
}

impl Default for FeatureBuilder {
    fn default() -> Self {
        Self::new(DomainTrustTable::default())
    }
}

impl FeatureBuilder {
    pub fn new(trust: DomainTrustTable) -> Self {
        Self {
            trust,
            hyperbole: HYPERBOLE_MARKERS.iter().map(|s| s.to_string()).collect(),
            emotive: EMOTIVE_MARKERS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_hyperbole_markers(mut self, markers: &[&str]) -> Self {
        self.hyperbole = markers.iter().map(|s| s.to_lowercase()).collect();
        self
    }

    pub fn with_emotive_markers(mut self, markers: &[&str]) -> Self {
        self.emotive = markers.iter().map(|s| s.to_lowercase()).collect();
        self
    }

    pub fn trust_table(&self) -> &DomainTrustTable {
        &self.trust
    }

    /// Build the vector for `text`.
    ///
    /// `domain` is the page domain when the text came from a fetched URL;
    /// otherwise the first URL inside the text supplies it. Blank text yields
    /// neutral defaults.
    pub fn build(&self, text: &str, domain: Option<&str>) -> FeatureVector {
        let text = text.trim();
        let domain = domain
            .map(str::to_string)
            .or_else(|| first_url_domain(text));
        let domain_trust = domain
            .as_deref()
            .map(|d| self.trust.score(d))
            .unwrap_or(NEUTRAL_SCORE);

        if text.is_empty() {
            return FeatureVector {
                domain_trust: round4(domain_trust),
                ..FeatureVector::neutral()
            };
        }

        let lowered = text.to_lowercase();
        let char_len = text.chars().count();
        let tokens = count_tokens(text);

        FeatureVector {
            domain_trust: round4(domain_trust),
            length_adequacy: if tokens > LONG_TEXT_TOKENS { 1.0 } else { 0.5 },
            hyperbole_density: marker_density(&lowered, &self.hyperbole, char_len),
            emotive_density: marker_density(&lowered, &self.emotive, char_len),
            url_presence: if URL_REGEX.is_match(text) { 1.0 } else { 0.0 },
            semantic_strength: semantic_strength(text),
            length_ratio: round4((tokens as f64 / FULL_LENGTH_TOKENS).min(1.0)),
            confidence_placeholder: confidence_placeholder(text),
        }
    }
}

/// Host of the first http(s) URL in the text
pub fn first_url_domain(text: &str) -> Option<String> {
    let m = URL_REGEX.find(text)?;
    url::Url::parse(m.as_str())
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

/// Count tokens: every CJK character is one token, and every run of other
/// alphanumerics is one token.
pub fn count_tokens(text: &str) -> usize {
    let mut count = 0;
    let mut in_word = false;
    for c in text.chars() {
        if is_cjk(c) {
            count += 1;
            in_word = false;
        } else if c.is_alphanumeric() {
            if !in_word {
                count += 1;
                in_word = true;
            }
        } else {
            in_word = false;
        }
    }
    count
}

pub(crate) fn is_cjk(c: char) -> bool {
    matches!(
        c as u32,
        0x3040..=0x30FF | 0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xAC00..=0xD7AF | 0xF900..=0xFAFF
    )
}

/// Marker occurrences per 100 characters (raw count for short text), capped at 1
fn marker_density(lowered: &str, markers: &[String], char_len: usize) -> f64 {
    let count: usize = markers
        .iter()
        .filter(|m| !m.is_empty())
        .map(|m| lowered.matches(m.as_str()).count())
        .sum();
    let density = if char_len > 100 {
        count as f64 / (char_len as f64 / 100.0)
    } else {
        count as f64
    };
    round4(density.min(1.0))
}

/// Character diversity scaled by a length saturation curve.
///
/// A cheap stand-in for an embedding signal; no model download.
fn semantic_strength(text: &str) -> f64 {
    let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    if chars.is_empty() {
        return 0.0;
    }
    let distinct = chars.iter().collect::<HashSet<_>>().len();
    let diversity = distinct as f64 / chars.len() as f64;
    let saturation = 1.0 - (-(chars.len() as f64) / 100.0).exp();
    round4((diversity * saturation).clamp(0.0, 1.0))
}

/// Stable pseudo-noise in [0.3, 0.9] keyed by the text digest
fn confidence_placeholder(text: &str) -> f64 {
    let digest = Sha256::digest(text.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    let unit = u64::from_be_bytes(head) as f64 / u64::MAX as f64;
    round4(0.3 + 0.6 * unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health_text(marker_count: usize) -> String {
        let mut text = String::from("健康檢查結果顯示，多數受檢者的血壓與血糖數值都在正常範圍內，醫師建議民眾維持規律運動與均衡飲食。");
        for _ in 0..marker_count {
            text.push_str("震撼消息！");
        }
        text.push_str("衛生單位表示將持續追蹤後續數據，並於下個月公布完整報告。");
        text
    }

    #[test]
    fn test_hyperbole_density_scenario() {
        let builder = FeatureBuilder::default().with_hyperbole_markers(&["震撼"]);
        let with_markers = builder.build(&health_text(6), None);
        let without = builder.build(&health_text(0), None);

        assert!(with_markers.hyperbole_density > without.hyperbole_density);
        assert_eq!(without.hyperbole_density, 0.0);
    }

    #[test]
    fn test_empty_text_is_neutral() {
        let builder = FeatureBuilder::default();
        assert_eq!(builder.build("", None), FeatureVector::neutral());
        assert_eq!(builder.build("   \n", None), FeatureVector::neutral());

        let with_domain = builder.build("", Some("cna.com.tw"));
        assert_eq!(with_domain.domain_trust, 1.0);
    }

    #[test]
    fn test_domain_from_embedded_url() {
        let builder = FeatureBuilder::default();
        let features = builder.build("看這篇 https://www.cna.com.tw/news/aipl/1.aspx 報導", None);
        assert_eq!(features.url_presence, 1.0);
        assert_eq!(features.domain_trust, 1.0);

        let plain = builder.build("no link here", None);
        assert_eq!(plain.url_presence, 0.0);
        assert_eq!(plain.domain_trust, 0.5);
    }

    #[test]
    fn test_explicit_domain_wins() {
        let builder = FeatureBuilder::default();
        let features = builder.build("https://cna.com.tw/x", Some("bogus-news.xyz"));
        assert_eq!(features.domain_trust, 0.2);
    }

    #[test]
    fn test_deterministic_and_bounded() {
        let builder = FeatureBuilder::default();
        let text = health_text(2);
        let a = builder.build(&text, None);
        let b = builder.build(&text, None);
        assert_eq!(a, b);
        assert!((0.3..=0.9).contains(&a.confidence_placeholder));
        for value in a.to_array() {
            assert!((0.0..=1.0).contains(&value));
        }
    }

    #[test]
    fn test_count_tokens() {
        assert_eq!(count_tokens("hello world"), 2);
        assert_eq!(count_tokens("健康檢查"), 4);
        assert_eq!(count_tokens("AI 健康 2024!"), 4);
        assert_eq!(count_tokens(""), 0);
    }

    #[test]
    fn test_length_features() {
        let builder = FeatureBuilder::default();
        let short = builder.build("short text", None);
        assert_eq!(short.length_adequacy, 0.5);
        assert_eq!(short.length_ratio, 0.01);

        let long = "word ".repeat(300);
        let features = builder.build(&long, None);
        assert_eq!(features.length_adequacy, 1.0);
        assert_eq!(features.length_ratio, 1.0);
    }

    #[test]
    fn test_array_slot_order() {
        let v = FeatureVector::from_array([0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7]);
        assert_eq!(v.to_array(), [0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7]);
        assert_eq!(v.hyperbole_density, 0.2);
        assert_eq!(v.named()[2].0, "hyperbole_density");
    }
}
