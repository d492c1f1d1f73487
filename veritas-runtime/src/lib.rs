//! Veritas Runtime
//!
//! The credibility scoring pipeline: modality resolution, extraction,
//! classification, optional vision scoring, fusion and staged degradation.

pub mod config;
pub mod fusion;
pub mod pipeline;

pub use config::*;
pub use fusion::*;
pub use pipeline::*;
