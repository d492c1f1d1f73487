//! Scoring requests and input modality detection

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::LazyLock;

static URL_PREFIX_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://\S+").unwrap());

/// Reference to an image submitted for scoring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageRef {
    /// Image stored on the local filesystem
    Path(PathBuf),
    /// Image already held in memory
    Bytes {
        data: Vec<u8>,
        mime_type: String,
    },
}

impl ImageRef {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    pub fn bytes(data: Vec<u8>, mime_type: &str) -> Self {
        Self::Bytes {
            data,
            mime_type: mime_type.to_string(),
        }
    }

    /// Short description for logs (never includes image bytes)
    pub fn describe(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Bytes { data, mime_type } => format!("<{} bytes {}>", data.len(), mime_type),
        }
    }
}

/// Immutable input to the scoring pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringRequest {
    /// Free text, possibly a bare URL
    pub text: Option<String>,
    /// Optional image to assess
    pub image: Option<ImageRef>,
}

impl ScoringRequest {
    pub fn new(text: Option<String>, image: Option<ImageRef>) -> Self {
        Self { text, image }
    }

    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            image: None,
        }
    }

    pub fn image(image: ImageRef) -> Self {
        Self {
            text: None,
            image: Some(image),
        }
    }

    pub fn with_image(mut self, image: ImageRef) -> Self {
        self.image = Some(image);
        self
    }

    /// Trimmed text, `None` when absent or blank
    pub fn trimmed_text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// A request needs non-blank text or an image
    pub fn is_empty(&self) -> bool {
        self.trimmed_text().is_none() && self.image.is_none()
    }
}

/// Kind of content driving which scoring path executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Url,
    Image,
    Mixed,
}

impl Modality {
    /// Classify a request.
    ///
    /// URL detection wins over mixed mode: a link with a caption is still a
    /// page to fetch.
    pub fn detect(request: &ScoringRequest) -> Self {
        let text = request.trimmed_text();
        match (text, request.image.is_some()) {
            (Some(t), _) if is_url(t) => Self::Url,
            (Some(_), true) => Self::Mixed,
            (None, true) => Self::Image,
            _ => Self::Text,
        }
    }

    /// Whether this modality asks the vision annotator
    pub fn uses_vision(&self) -> bool {
        matches!(self, Self::Image | Self::Mixed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Url => "url",
            Self::Image => "image",
            Self::Mixed => "mixed",
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True when the text starts with an http(s) URL
pub fn is_url(text: &str) -> bool {
    URL_PREFIX_REGEX.is_match(text.trim())
}
