//! Veritas Core - Scoring types and text features for credibility analysis
//!
//! This crate provides the foundational primitives:
//! - Requests, modalities and the shared label table
//! - Scoring results with tagged degradation status
//! - Static domain trust priors
//! - Fixed-order feature vectors built from raw text

pub mod request;
pub mod label;
pub mod result;
pub mod trust;
pub mod features;
pub mod insight;

pub use request::*;
pub use label::*;
pub use result::*;
pub use trust::*;
pub use features::*;
pub use insight::*;

/// Neutral score used whenever a signal is missing
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Round a score to the fixed 4-digit precision used for fusion and output
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
