//! Multimodal annotator
//!
//! Asks an LLM backend to judge images, text-plus-image posts and article
//! features. Each call is a single bounded request with no retry; callers
//! treat any error as "vision unavailable" rather than a low score.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use veritas_core::{ImageRef, NEUTRAL_SCORE};

use crate::annotation::FeatureAnnotation;
use crate::backend::{LlmError, PromptPart, SharedBackend};
use crate::prompts::{
    PromptRegistry, PromptSpec, COMBINED_ASSESSMENT, FEATURE_ANNOTATION, IMAGE_AUTHENTICITY,
    RESULT_EXPLANATION,
};

static SCORE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[01](?:\.\d+)?\b").unwrap());

static LABELED_SCORE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:score|credibility|confidence|分數|可信度)\D{0,12}?\b([01](?:\.\d+)?)\b")
        .unwrap()
});

/// Scale descriptions such as "from 0 to 1", "0-1", "/1" or "out of 1"
static SCALE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:from\s+)?\b0(?:\.0+)?\s*(?:to|-|–|~|and|到)\s*1(?:\.0+)?\b|(?:/|out of)\s*1(?:\.0+)?\b")
        .unwrap()
});

/// Article text sent for feature annotation is cut to this many characters
const MAX_ANNOTATION_CHARS: usize = 4000;

/// Annotator errors
#[derive(Debug, Error)]
pub enum AnnotatorError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Annotator timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cannot read image {0}: {1}")]
    Image(String, String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Prompt not registered: {0}")]
    MissingPrompt(String),
}

/// Score and free-form answer from the vision service
#[derive(Debug, Clone, PartialEq)]
pub struct VisionVerdict {
    pub score: f64,
    pub rationale: String,
}

impl VisionVerdict {
    fn from_answer(answer: String) -> Self {
        Self {
            score: parse_score(&answer),
            rationale: answer,
        }
    }
}

/// Score in [0, 1] stated in `text`, rounded to two decimals; 0.5 when none
/// is present.
///
/// Scale descriptions are ignored. A number labelled as the score wins;
/// otherwise the last bare number in range is taken.
pub fn parse_score(text: &str) -> f64 {
    let text = SCALE_REGEX.replace_all(text, " ");
    let in_range = |v: &f64| (0.0..=1.0).contains(v);

    let labeled = LABELED_SCORE_REGEX
        .captures_iter(&text)
        .filter_map(|c| c.get(1)?.as_str().parse::<f64>().ok())
        .filter(in_range)
        .last();

    labeled
        .or_else(|| {
            SCORE_REGEX
                .find_iter(&text)
                .filter_map(|m| m.as_str().parse::<f64>().ok())
                .filter(in_range)
                .last()
        })
        .map(|v| (v * 100.0).round() / 100.0)
        .unwrap_or(NEUTRAL_SCORE)
}

/// MIME type inferred from a file extension; unknown types are sent as JPEG
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        Some("heic") => "image/heic",
        _ => "image/jpeg",
    }
}

/// Read an image into a prompt part
pub async fn load_image(image: &ImageRef) -> Result<PromptPart, AnnotatorError> {
    let (data, mime_type) = match image {
        ImageRef::Path(path) => {
            let data = tokio::fs::read(path)
                .await
                .map_err(|e| AnnotatorError::Image(image.describe(), e.to_string()))?;
            (data, mime_for_path(path).to_string())
        }
        ImageRef::Bytes { data, mime_type } => (data.clone(), mime_type.clone()),
    };

    if data.is_empty() {
        return Err(AnnotatorError::Image(
            image.describe(),
            "image is empty".to_string(),
        ));
    }

    Ok(PromptPart::Image { data, mime_type })
}

/// LLM-backed judge for images and article features
pub struct MultimodalAnnotator {
    backend: SharedBackend,
    prompts: PromptRegistry,
    timeout: Duration,
}

impl MultimodalAnnotator {
    pub fn new(backend: SharedBackend) -> Self {
        Self {
            backend,
            prompts: PromptRegistry::load_embedded(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_prompts(mut self, prompts: PromptRegistry) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    fn prompt(&self, id: &str) -> Result<&PromptSpec, AnnotatorError> {
        self.prompts
            .get(id)
            .ok_or_else(|| AnnotatorError::MissingPrompt(id.to_string()))
    }

    async fn ask(&self, parts: Vec<PromptPart>) -> Result<String, AnnotatorError> {
        debug!(
            "Querying {} with {} prompt parts",
            self.backend.model_name(),
            parts.len()
        );
        match tokio::time::timeout(self.timeout, self.backend.generate(&parts)).await {
            Ok(answer) => Ok(answer?),
            Err(_) => Err(AnnotatorError::Timeout(self.timeout)),
        }
    }

    /// Judge an image alone; an empty `prompt` uses the default question
    pub async fn score_image(
        &self,
        prompt: &str,
        image: &ImageRef,
    ) -> Result<VisionVerdict, AnnotatorError> {
        let spec = self.prompt(IMAGE_AUTHENTICITY)?;
        let question = if prompt.trim().is_empty() {
            spec.render(&[])
        } else {
            spec.render_with(prompt, &[])
        };
        let image = load_image(image).await?;

        let answer = self.ask(vec![PromptPart::Text(question), image]).await?;
        let verdict = VisionVerdict::from_answer(answer);
        debug!("Image verdict {:.2}", verdict.score);
        Ok(verdict)
    }

    /// Judge text and image together
    pub async fn score_combined(
        &self,
        prompt: &str,
        text: &str,
        image: &ImageRef,
    ) -> Result<VisionVerdict, AnnotatorError> {
        let spec = self.prompt(COMBINED_ASSESSMENT)?;
        let question = if prompt.trim().is_empty() {
            spec.render(&[("text", text)])
        } else {
            spec.render_with(&format!("{}\n\nText:\n{}", prompt.trim(), text), &[])
        };
        let image = load_image(image).await?;

        let answer = self.ask(vec![PromptPart::Text(question), image]).await?;
        let verdict = VisionVerdict::from_answer(answer);
        debug!("Combined verdict {:.2}", verdict.score);
        Ok(verdict)
    }

    /// Ask for the eight article sub-features as JSON
    pub async fn annotate(
        &self,
        title: &str,
        content: &str,
        url: &str,
    ) -> Result<FeatureAnnotation, AnnotatorError> {
        let spec = self.prompt(FEATURE_ANNOTATION)?;
        let content: String = content.chars().take(MAX_ANNOTATION_CHARS).collect();
        let question = spec.render(&[("content", content.as_str()), ("url", url), ("title", title)]);

        let answer = self.ask(vec![PromptPart::Text(question)]).await?;
        let annotation = FeatureAnnotation::from_response(&answer, spec.output.max_chars)
            .ok_or_else(|| AnnotatorError::Malformed(preview(&answer)))?;
        debug!("Annotated {}: {}", url, annotation.short_judgement);
        Ok(annotation)
    }

    /// Explain a finished verdict for a general reader
    pub async fn explain(
        &self,
        modality: &str,
        level: &str,
        score: f64,
        summary: &str,
    ) -> Result<String, AnnotatorError> {
        let spec = self.prompt(RESULT_EXPLANATION)?;
        let score = format!("{:.3}", score);
        let question = spec.render(&[
            ("modality", modality),
            ("level", level),
            ("score", score.as_str()),
            ("summary", summary),
        ]);

        let answer = self.ask(vec![PromptPart::Text(question)]).await?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(AnnotatorError::Malformed("empty explanation".to_string()));
        }
        Ok(answer.chars().take(spec.output.max_chars).collect())
    }
}

fn preview(answer: &str) -> String {
    answer.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::AnnotationSource;
    use crate::backend::LlmBackend;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct ScriptedBackend {
        reply: Result<String, String>,
        delay: Duration,
        calls: AtomicUsize,
        last_parts: Mutex<Vec<PromptPart>>,
    }

    impl ScriptedBackend {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                last_parts: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err("connection refused".to_string()),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                last_parts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmBackend for ScriptedBackend {
        async fn generate(&self, parts: &[PromptPart]) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_parts.lock().unwrap() = parts.to_vec();
            tokio::time::sleep(self.delay).await;
            self.reply.clone().map_err(LlmError::Api)
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn png() -> ImageRef {
        ImageRef::bytes(vec![0x89, 0x50, 0x4e, 0x47], "image/png")
    }

    #[test]
    fn test_parse_score() {
        assert_eq!(parse_score("The photo looks genuine.\nScore: 0.85"), 0.85);
        assert_eq!(parse_score("Score: 0.857."), 0.86);
        assert_eq!(parse_score("1. Lighting is odd.\n2. Edges blur.\nScore: 0.3"), 0.3);
        assert_eq!(parse_score("Taken in 2021, overall 1"), 1.0);
        assert_eq!(parse_score("I cannot tell."), 0.5);
        assert_eq!(parse_score(""), 0.5);
    }

    #[test]
    fn test_parse_score_ignores_scale() {
        assert_eq!(parse_score("Score: 0.3 (on a scale from 0 to 1)"), 0.3);
        assert_eq!(parse_score("Overall credibility: 0.8/1"), 0.8);
        assert_eq!(parse_score("Rated 0.7 out of 1."), 0.7);
        assert_eq!(parse_score("可信度分數：0.2（0 到 1）"), 0.2);
    }

    #[test]
    fn test_parse_score_prefers_labelled_number() {
        assert_eq!(parse_score("Score: 0.35. Confidence in lighting cues is 1"), 0.35);
        assert_eq!(parse_score("Step 1 checks edges. 0.6"), 0.6);
    }

    #[test]
    fn test_mime_for_path() {
        assert_eq!(mime_for_path(Path::new("a/photo.PNG")), "image/png");
        assert_eq!(mime_for_path(Path::new("a/photo.webp")), "image/webp");
        assert_eq!(mime_for_path(Path::new("a/photo")), "image/jpeg");
    }

    #[tokio::test]
    async fn test_score_image_sends_question_and_image() {
        let backend = ScriptedBackend::replying("No signs of editing. Score: 0.8");
        let annotator = MultimodalAnnotator::new(backend.clone());

        let verdict = annotator.score_image("", &png()).await.unwrap();
        assert_eq!(verdict.score, 0.8);
        assert!(verdict.rationale.contains("No signs of editing"));

        let parts = backend.last_parts.lock().unwrap().clone();
        assert_eq!(parts.len(), 2);
        assert!(matches!(&parts[0], PromptPart::Text(t) if t.contains("between 0 and 1")));
        assert!(matches!(&parts[1], PromptPart::Image { mime_type, .. } if mime_type == "image/png"));
    }

    #[tokio::test]
    async fn test_score_combined_includes_text() {
        let backend = ScriptedBackend::replying("Consistent. 0.6");
        let annotator = MultimodalAnnotator::new(backend.clone());

        let verdict = annotator
            .score_combined("", "Typhoon floods the harbour", &png())
            .await
            .unwrap();
        assert_eq!(verdict.score, 0.6);

        let parts = backend.last_parts.lock().unwrap().clone();
        assert!(matches!(&parts[0], PromptPart::Text(t) if t.contains("Typhoon floods the harbour")));
    }

    #[tokio::test]
    async fn test_service_failure_is_error() {
        let backend = ScriptedBackend::failing();
        let annotator = MultimodalAnnotator::new(backend.clone());

        let err = annotator.score_image("", &png()).await.unwrap_err();
        assert!(matches!(err, AnnotatorError::Llm(_)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreadable_image_skips_service() {
        let backend = ScriptedBackend::replying("0.9");
        let annotator = MultimodalAnnotator::new(backend.clone());

        let missing = ImageRef::path("/nonexistent/photo.jpg");
        let err = annotator.score_image("", &missing).await.unwrap_err();
        assert!(matches!(err, AnnotatorError::Image(_, _)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeout_bounds_call() {
        let backend = Arc::new(ScriptedBackend {
            reply: Ok("0.9".to_string()),
            delay: Duration::from_secs(5),
            calls: AtomicUsize::new(0),
            last_parts: Mutex::new(Vec::new()),
        });
        let annotator =
            MultimodalAnnotator::new(backend).with_timeout(Duration::from_millis(20));

        let err = annotator.score_image("", &png()).await.unwrap_err();
        assert!(matches!(err, AnnotatorError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_annotate_parses_json() {
        let backend = ScriptedBackend::replying(
            r#"{"source_entity_score": 0.9, "domain_score": 0.9, "title_body_consistency": 0.8,
                "evidence_quality": 0.7, "ad_promo_intensity": 0.1, "hyperbole_score": 0.2,
                "emotive_clickbait_density": 0.1, "title_body_embedding_cosine": 0.75,
                "short_judgement": "credible"}"#,
        );
        let annotator = MultimodalAnnotator::new(backend);

        let annotation = annotator
            .annotate("Title", "Body text", "https://udn.com/news/1")
            .await
            .unwrap();
        assert_eq!(annotation.source, AnnotationSource::Service);
        assert_eq!(annotation.short_judgement, "credible");
    }

    #[tokio::test]
    async fn test_explain_fills_prompt() {
        let backend = ScriptedBackend::replying("  The source is reputable and cites officials.\n");
        let annotator = MultimodalAnnotator::new(backend.clone());

        let explanation = annotator
            .explain("text", "high", 0.72, "Credibility is high.")
            .await
            .unwrap();
        assert_eq!(explanation, "The source is reputable and cites officials.");

        let parts = backend.last_parts.lock().unwrap().clone();
        assert_eq!(parts.len(), 1);
        assert!(matches!(&parts[0], PromptPart::Text(t)
            if t.contains("Credibility level: high") && t.contains("Score: 0.720")));
    }

    #[tokio::test]
    async fn test_explain_rejects_blank_reply() {
        let backend = ScriptedBackend::replying("   ");
        let annotator = MultimodalAnnotator::new(backend);

        let err = annotator.explain("image", "medium", 0.5, "").await.unwrap_err();
        assert!(matches!(err, AnnotatorError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_annotate_malformed() {
        let backend = ScriptedBackend::replying("I'd rather not say.");
        let annotator = MultimodalAnnotator::new(backend);

        let err = annotator
            .annotate("Title", "Body", "https://udn.com/news/1")
            .await
            .unwrap_err();
        assert!(matches!(err, AnnotatorError::Malformed(_)));
    }
}
