//! Veritas Scorers
//!
//! Scoring components behind the pipeline:
//! - **Classifier**: lazily loaded tree model over the feature vector
//! - **Annotator**: LLM judge for images, text-plus-image posts and article features
//! - **Backends**: Gemini, OpenAI-compatible and Anthropic clients
//!
//! ## Prompts
//!
//! Annotator prompts are TOML files in `prompts/`, embedded at build time.
//! See [`prompts::PromptRegistry`] for loading overrides.

pub mod annotation;
pub mod annotator;
pub mod backend;
pub mod classifier;
pub mod gbdt;
pub mod prompts;

pub use annotation::*;
pub use annotator::*;
pub use backend::*;
pub use classifier::*;
pub use gbdt::*;
pub use prompts::*;
