//! Presentation helpers: keywords, topic category and previews

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::features::is_cjk;

/// Coarse topic bucket for a text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Politics,
    Entertainment,
    Society,
    Other,
}

const POLITICS_TERMS: &[&str] = &["選舉", "政府", "政策", "總統", "立法院", "election", "government"];
const ENTERTAINMENT_TERMS: &[&str] = &["影劇", "偶像", "電影", "藝人", "演唱會", "celebrity", "movie"];
const SOCIETY_TERMS: &[&str] = &["詐騙", "疫情", "健康", "醫療", "犯罪", "scam", "health"];

impl Category {
    /// First bucket whose terms appear in the text
    pub fn guess(text: &str) -> Self {
        let lowered = text.to_lowercase();
        let hit = |terms: &[&str]| terms.iter().any(|t| lowered.contains(t));
        if hit(POLITICS_TERMS) {
            Self::Politics
        } else if hit(ENTERTAINMENT_TERMS) {
            Self::Entertainment
        } else if hit(SOCIETY_TERMS) {
            Self::Society
        } else {
            Self::Other
        }
    }
}

/// Most frequent terms, ties broken by first appearance.
///
/// Latin words of two or more characters count as terms; CJK runs are split
/// into overlapping bigrams.
pub fn extract_keywords(text: &str, top_k: usize) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    let mut freq: HashMap<String, usize> = HashMap::new();
    let mut record = |term: String| {
        let count = freq.entry(term.clone()).or_insert(0);
        if *count == 0 {
            order.push(term);
        }
        *count += 1;
    };

    let mut word = String::new();
    let mut cjk_run: Vec<char> = Vec::new();
    for c in text.chars().chain(std::iter::once(' ')) {
        if is_cjk(c) {
            cjk_run.push(c);
        } else {
            for pair in cjk_run.windows(2) {
                record(pair.iter().collect());
            }
            cjk_run.clear();
        }

        if c.is_alphanumeric() && !is_cjk(c) {
            word.extend(c.to_lowercase());
        } else {
            if word.chars().count() > 1 && !word.chars().all(|ch| ch.is_ascii_digit()) {
                record(std::mem::take(&mut word));
            }
            word.clear();
        }
    }

    let mut ranked: Vec<(usize, String)> = order.into_iter().enumerate().collect();
    ranked.sort_by(|(ia, a), (ib, b)| freq[b].cmp(&freq[a]).then(ia.cmp(ib)));
    ranked.into_iter().take(top_k).map(|(_, term)| term).collect()
}

/// First `max_chars` characters of the text
pub fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
