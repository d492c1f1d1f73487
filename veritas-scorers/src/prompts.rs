//! Prompt templates for the multimodal annotator
//!
//! Prompts are TOML documents embedded at build time; a directory of
//! overrides can be loaded instead for tuning without a rebuild.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

pub const IMAGE_AUTHENTICITY: &str = "image_authenticity";
pub const COMBINED_ASSESSMENT: &str = "combined_assessment";
pub const FEATURE_ANNOTATION: &str = "feature_annotation";
pub const RESULT_EXPLANATION: &str = "result_explanation";

/// A prompt definition loaded from TOML
#[derive(Debug, Clone, Deserialize)]
pub struct PromptSpec {
    pub prompt: PromptMetadata,
    pub template: TemplateConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptMetadata {
    pub id: String,
    pub name: String,
    /// "vision" prompts are sent with an image, "text" prompts without
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateConfig {
    /// Default question; `{name}` placeholders are filled at render time
    pub question: String,
    /// Fixed trailer telling the model how to answer
    pub instruction: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            max_chars: default_max_chars(),
        }
    }
}

fn default_format() -> String {
    "score".to_string()
}

fn default_max_chars() -> usize {
    30
}

impl PromptSpec {
    /// Render the default question followed by the instruction
    pub fn render(&self, vars: &[(&str, &str)]) -> String {
        self.render_with(&self.template.question, vars)
    }

    /// Render a caller-supplied question followed by the instruction
    pub fn render_with(&self, question: &str, vars: &[(&str, &str)]) -> String {
        let mut body = question.trim().to_string();
        for (key, value) in vars {
            body = body.replace(&format!("{{{}}}", key), value);
        }
        format!("{}\n\n{}", body, self.template.instruction.trim())
    }
}

/// Registry of loaded prompts
#[derive(Debug, Default, Clone)]
pub struct PromptRegistry {
    prompts: HashMap<String, PromptSpec>,
}

impl PromptRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the prompts compiled into the binary
    pub fn load_embedded() -> Self {
        let mut registry = Self::new();

        let embedded = [
            include_str!("../prompts/image_authenticity.toml"),
            include_str!("../prompts/combined_assessment.toml"),
            include_str!("../prompts/feature_annotation.toml"),
            include_str!("../prompts/result_explanation.toml"),
        ];

        for toml_str in embedded {
            match toml::from_str::<PromptSpec>(toml_str) {
                Ok(spec) if spec.prompt.enabled => registry.register(spec),
                Ok(_) => {}
                Err(e) => warn!("Skipping embedded prompt: {}", e),
            }
        }

        registry
    }

    /// Load embedded prompts, then override them with any TOML in `dir`
    pub fn load_from_dir<P: AsRef<Path>>(dir: P) -> std::io::Result<Self> {
        let mut registry = Self::load_embedded();

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();

            if path.extension().is_some_and(|ext| ext == "toml") {
                let content = std::fs::read_to_string(&path)?;
                match toml::from_str::<PromptSpec>(&content) {
                    Ok(spec) if spec.prompt.enabled => registry.register(spec),
                    Ok(_) => {}
                    Err(e) => warn!("Skipping prompt {}: {}", path.display(), e),
                }
            }
        }

        Ok(registry)
    }

    /// Register a prompt, replacing any with the same id
    pub fn register(&mut self, spec: PromptSpec) {
        self.prompts.insert(spec.prompt.id.clone(), spec);
    }

    pub fn get(&self, id: &str) -> Option<&PromptSpec> {
        self.prompts.get(id)
    }

    /// All prompt IDs, sorted
    pub fn list_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.prompts.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}
