//! Veritas Fetch Layer
//!
//! Provides page retrieval for URL scoring:
//! - reqwest client with user-agent rotation and optional proxy
//! - Retry with linear backoff on transient failures
//! - Main-content extraction and boilerplate stripping

pub mod client;
pub mod extractor;

pub use client::*;
pub use extractor::*;
