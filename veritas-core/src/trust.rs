//! Domain trust priors
//!
//! Provides a curated table of news and social domains with a 0.0 - 5.0
//! trust rating. Ratings are normalized to 0.0 - 1.0 before they reach the
//! feature vector.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Upper bound of the raw rating scale
pub const MAX_TRUST_RATING: f64 = 5.0;

/// Rating used for domains that are not in the table
pub const DEFAULT_TRUST_RATING: f64 = 2.5;

/// A curated domain rating
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainTrust {
    /// Registrable domain without `www.`
    pub domain: &'static str,
    /// Rating on the 0.0 - 5.0 scale
    pub rating: f64,
}

/// Built-in domain ratings
pub static DEFAULT_DOMAIN_TRUST: &[DomainTrust] = &[
    DomainTrust { domain: "cna.com.tw", rating: 5.0 },
    DomainTrust { domain: "udn.com", rating: 4.8 },
    DomainTrust { domain: "ltn.com.tw", rating: 4.5 },
    DomainTrust { domain: "ettoday.net", rating: 4.2 },
    DomainTrust { domain: "businesstoday.com.tw", rating: 3.8 },
    DomainTrust { domain: "setn.com", rating: 3.5 },
    DomainTrust { domain: "facebook.com", rating: 2.5 },
    DomainTrust { domain: "ptt.cc", rating: 2.0 },
    DomainTrust { domain: "bogus-news.xyz", rating: 1.0 },
];

/// Lookup table from domain to trust rating
#[derive(Debug, Clone)]
pub struct DomainTrustTable {
    ratings: HashMap<String, f64>,
}

impl Default for DomainTrustTable {
    fn default() -> Self {
        Self {
            ratings: DEFAULT_DOMAIN_TRUST
                .iter()
                .map(|d| (d.domain.to_string(), d.rating))
                .collect(),
        }
    }
}

impl DomainTrustTable {
    /// An empty table; every lookup falls back to the default rating
    pub fn empty() -> Self {
        Self {
            ratings: HashMap::new(),
        }
    }

    /// Add or replace a rating, clamped to the 0.0 - 5.0 scale
    pub fn with_entry(mut self, domain: &str, rating: f64) -> Self {
        self.ratings
            .insert(normalize_domain(domain), rating.clamp(0.0, MAX_TRUST_RATING));
        self
    }

    /// Raw rating for a domain, if it or a parent domain is known.
    ///
    /// `news.ltn.com.tw` resolves through `ltn.com.tw`.
    pub fn rating(&self, domain: &str) -> Option<f64> {
        let normalized = normalize_domain(domain);
        let mut candidate = normalized.as_str();
        loop {
            if let Some(rating) = self.ratings.get(candidate) {
                return Some(*rating);
            }
            match candidate.split_once('.') {
                Some((_, parent)) if parent.contains('.') => candidate = parent,
                _ => return None,
            }
        }
    }

    /// Normalized trust in [0, 1]; unknown domains score 0.5
    pub fn score(&self, domain: &str) -> f64 {
        self.rating(domain).unwrap_or(DEFAULT_TRUST_RATING) / MAX_TRUST_RATING
    }

    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }
}

/// Lowercase, strip port and a leading `www.`
pub fn normalize_domain(domain: &str) -> String {
    let d = domain.trim().trim_end_matches('.').to_lowercase();
    let d = d.split(':').next().unwrap_or_default();
    d.strip_prefix("www.").unwrap_or(d).to_string()
}
