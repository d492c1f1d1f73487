//! Scoring Pipeline
//!
//! Drives one request through the scoring stages:
//! - Modality is resolved once and matched exhaustively afterwards
//! - Text scoring falls back to a heuristic when no classifier is loaded
//! - Vision scoring is optional and never required for a result
//! - Every missing dependency adds a degradation reason instead of failing

use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use veritas_core::{
    extract_keywords, preview, Category, DegradationReason, FeatureBuilder, FeatureVector,
    ImageRef, Modality, ScoreSource, ScoringRequest, ScoringResult, Status, SubScore,
    NEUTRAL_SCORE,
};
use veritas_fetch::{
    ContentExtractor, ExtractedDocument, ExtractionOutcome, FetchError, ReqwestFetcher,
};
use veritas_scorers::{
    Classifier, ClassifierError, FeatureAnnotation, MultimodalAnnotator, VisionVerdict,
};

use crate::config::PipelineConfig;
use crate::fusion::{compose_rationale, fuse, heuristic_score};

/// Prefix of the stand-in text scored when a URL cannot be retrieved
pub const EXTRACTION_FAILED_PREFIX: &str = "could not retrieve page content";

/// Pipeline errors; everything else degrades
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Request has neither text nor image")]
    EmptyRequest,

    #[error("Internal inconsistency: {0}")]
    Inconsistency(String),

    #[error("Pipeline setup failed: {0}")]
    Setup(#[from] FetchError),
}

/// Stages a scoring run passes through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    ModalityResolved,
    TextScored,
    VisionScored,
    Fused,
    Labeled,
    Done,
}

#[derive(Default)]
struct Trace(Vec<Stage>);

impl Trace {
    fn enter(&mut self, stage: Stage) {
        debug!("Pipeline stage: {:?}", stage);
        self.0.push(stage);
    }
}

struct TextScore {
    score: f64,
    features: FeatureVector,
    degraded: Option<DegradationReason>,
}

/// Text to score for a URL request
struct UrlText {
    text: String,
    domain: Option<String>,
    reasons: Vec<DegradationReason>,
}

#[derive(Default)]
struct VisionOutcome {
    verdict: Option<VisionVerdict>,
    reasons: Vec<DegradationReason>,
    /// An annotator was configured and asked
    attempted: bool,
}

impl VisionOutcome {
    fn failed(attempted: bool, reasons: Vec<DegradationReason>) -> Self {
        Self {
            verdict: None,
            reasons,
            attempted,
        }
    }
}

/// Page content paired with its feature annotation
#[derive(Debug, Clone)]
pub struct UrlAnnotation {
    pub document: ExtractedDocument,
    pub annotation: FeatureAnnotation,
}

/// Credibility scoring pipeline
pub struct Pipeline {
    extractor: ContentExtractor,
    features: FeatureBuilder,
    classifier: Arc<Classifier>,
    annotator: Option<Arc<MultimodalAnnotator>>,
    config: PipelineConfig,
}

impl Pipeline {
    /// Pipeline with a reqwest fetcher and a classifier from the configured locator
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let fetcher = ReqwestFetcher::shared(&config.fetch)?;
        let extractor = ContentExtractor::new(fetcher, config.fetch.clone());
        let classifier = Arc::new(Classifier::new(config.model_locator.clone()));
        Ok(Self::from_parts(extractor, classifier, config))
    }

    /// Pipeline from pre-built components. The classifier model is loaded
    /// here so the first request does not pay for it.
    pub fn from_parts(
        extractor: ContentExtractor,
        classifier: Arc<Classifier>,
        config: PipelineConfig,
    ) -> Self {
        if !classifier.preload() {
            info!("Text scores will use the heuristic fallback");
        }
        Self {
            extractor,
            features: FeatureBuilder::new(config.trust.clone()),
            classifier,
            annotator: None,
            config,
        }
    }

    /// Enable vision scoring and feature annotation
    pub fn with_annotator(mut self, annotator: MultimodalAnnotator) -> Self {
        info!("Vision annotator enabled ({})", annotator.model_name());
        self.annotator = Some(Arc::new(
            annotator.with_timeout(self.config.annotator_timeout),
        ));
        self
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn has_annotator(&self) -> bool {
        self.annotator.is_some()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Score a request under the configured deadline
    pub async fn score(&self, request: ScoringRequest) -> Result<ScoringResult, PipelineError> {
        self.score_within(request, self.config.deadline).await
    }

    /// Score a request; network I/O that outlives `deadline` is abandoned
    /// and the result degrades
    pub async fn score_within(
        &self,
        request: ScoringRequest,
        deadline: Option<Duration>,
    ) -> Result<ScoringResult, PipelineError> {
        self.score_traced(&request, deadline)
            .await
            .map(|(result, _)| result)
    }

    /// Score several requests concurrently, preserving input order
    pub async fn score_many(
        &self,
        requests: Vec<ScoringRequest>,
    ) -> Vec<Result<ScoringResult, PipelineError>> {
        stream::iter(requests)
            .map(|request| self.score(request))
            .buffered(self.config.max_concurrent.max(1))
            .collect()
            .await
    }

    /// Score a request and report the stages it passed through
    pub async fn score_traced(
        &self,
        request: &ScoringRequest,
        deadline: Option<Duration>,
    ) -> Result<(ScoringResult, Vec<Stage>), PipelineError> {
        if request.is_empty() {
            warn!("Rejecting request with neither text nor image");
            return Err(PipelineError::EmptyRequest);
        }

        let deadline = deadline.map(|d| Instant::now() + d);
        let mut trace = Trace::default();
        trace.enter(Stage::Start);

        let modality = Modality::detect(request);
        trace.enter(Stage::ModalityResolved);
        debug!("Resolved modality {}", modality);

        let mut status = Status::Ok;
        let text = request.trimmed_text().unwrap_or_default();

        let (text_score, vision, scored_text) = match (modality, request.image.as_ref()) {
            (Modality::Text, _) => {
                let scored = self.score_text(text, None)?;
                (Some(scored), VisionOutcome::default(), text.to_string())
            }
            (Modality::Url, _) => {
                let input = self.resolve_url(text, deadline).await;
                for reason in &input.reasons {
                    status.degrade(*reason);
                }
                let scored = self.score_text(&input.text, input.domain.as_deref())?;
                (Some(scored), VisionOutcome::default(), input.text)
            }
            (Modality::Image, Some(image)) => {
                let vision = self.score_vision(None, image, deadline).await;
                (None, vision, String::new())
            }
            (Modality::Mixed, Some(image)) => {
                let (scored, vision) = tokio::join!(
                    async { self.score_text(text, None) },
                    self.score_vision(Some(text), image, deadline)
                );
                (Some(scored?), vision, text.to_string())
            }
            (Modality::Image | Modality::Mixed, None) => {
                error!("{} request carries no image", modality);
                return Err(PipelineError::Inconsistency(format!(
                    "{} request without an image",
                    modality
                )));
            }
        };

        if let Some(reason) = text_score.as_ref().and_then(|s| s.degraded) {
            status.degrade(reason);
        }
        // Image requests pass through with no text sub-score
        trace.enter(Stage::TextScored);
        if vision.attempted {
            trace.enter(Stage::VisionScored);
        }
        for reason in &vision.reasons {
            status.degrade(*reason);
        }

        let text_value = text_score.as_ref().map(|s| s.score);
        let vision_value = vision.verdict.as_ref().map(|v| v.score);
        let combined_value = match modality {
            Modality::Text | Modality::Url => text_value.unwrap_or(NEUTRAL_SCORE),
            Modality::Image => vision_value.unwrap_or(NEUTRAL_SCORE),
            Modality::Mixed => fuse(text_value, vision_value),
        };
        trace.enter(Stage::Fused);

        let combined = SubScore::new(ScoreSource::Combined, combined_value);
        trace.enter(Stage::Labeled);

        let features = text_score.as_ref().map(|s| s.features);
        let mut result = ScoringResult::new(modality, combined, features);
        if let Some(value) = text_value {
            result.sub_scores.push(SubScore::new(ScoreSource::Text, value));
        }
        if let Some(value) = vision_value {
            result.sub_scores.push(SubScore::new(ScoreSource::Vision, value));
        }
        result.sub_scores.push(combined);
        result.rationale = compose_rationale(combined.level, modality, &status);
        result.status = status;
        result.keywords = extract_keywords(&scored_text, self.config.keyword_count);
        result.category = Category::guess(&scored_text);
        result.text_preview = preview(&scored_text, self.config.preview_chars);
        result.has_media = request.image.is_some();
        result.vision_rationale = vision.verdict.map(|v| v.rationale);
        if self.config.explain {
            result.explanation = self.explain(&result, deadline).await;
        }
        trace.enter(Stage::Done);

        if result.status.is_degraded() {
            warn!("{}", result.summary());
        } else {
            info!("{}", result.summary());
        }

        Ok((result, trace.0))
    }

    /// Fetch a page and annotate its features; simulated when the service
    /// is missing, fails or the page could not be retrieved
    pub async fn annotate_url(&self, url: &str) -> UrlAnnotation {
        let document = self.extractor.fetch(url).await;
        self.annotate_document(document).await
    }

    /// Annotate several pages concurrently, preserving input order
    pub async fn annotate_urls(&self, urls: &[&str]) -> Vec<UrlAnnotation> {
        let limit = self.config.max_concurrent.max(1);
        let documents = self.extractor.fetch_many(urls, limit).await;
        stream::iter(documents)
            .map(|document| self.annotate_document(document))
            .buffered(limit)
            .collect()
            .await
    }

    async fn annotate_document(&self, document: ExtractedDocument) -> UrlAnnotation {
        let url = document.url.clone();
        if document.truncated {
            debug!("Annotating truncated content of {}", url);
        }

        let service = match (&self.annotator, document.is_success()) {
            (Some(annotator), true) => {
                match annotator
                    .annotate(document.title_or_default(), &document.text, &url)
                    .await
                {
                    Ok(annotation) => Some(annotation),
                    Err(e) => {
                        warn!("Annotation service failed for {}: {}", url, e);
                        None
                    }
                }
            }
            _ => None,
        };

        let annotation = service.unwrap_or_else(|| {
            debug!("Simulating annotation for {}", url);
            FeatureAnnotation::simulate(
                document.title_or_default(),
                &document.text,
                &url,
                self.features.trust_table(),
            )
        });

        UrlAnnotation {
            document,
            annotation,
        }
    }

    fn score_text(&self, text: &str, domain: Option<&str>) -> Result<TextScore, PipelineError> {
        let features = self.features.build(text, domain);
        debug!("Features: {:?}", features.named());

        match self.classifier.predict(&features) {
            Ok(score) => Ok(TextScore {
                score,
                features,
                degraded: None,
            }),
            Err(ClassifierError::FeatureMismatch { expected, actual }) => {
                error!(
                    "Classifier expects {} features but the builder produces {}",
                    expected, actual
                );
                Err(PipelineError::Inconsistency(format!(
                    "classifier expects {} features, builder produces {}",
                    expected, actual
                )))
            }
            Err(e) => {
                debug!("Classifier unavailable ({}); using heuristic score", e);
                Ok(TextScore {
                    score: heuristic_score(&features),
                    features,
                    degraded: Some(DegradationReason::ModelUnavailable),
                })
            }
        }
    }

    async fn resolve_url(&self, text: &str, deadline: Option<Instant>) -> UrlText {
        let url = text.split_whitespace().next().unwrap_or(text);

        let reasons = match within(deadline, self.extractor.fetch(url)).await {
            Some(document) if document.is_success() => {
                return UrlText {
                    text: document.text,
                    domain: Some(document.domain).filter(|d| !d.is_empty()),
                    reasons: Vec::new(),
                };
            }
            Some(document) => {
                if let ExtractionOutcome::Failed(reason) = &document.outcome {
                    warn!("Extraction failed for {}: {}", url, reason);
                }
                vec![DegradationReason::ExtractionFailed]
            }
            None => {
                warn!("Deadline expired while fetching {}", url);
                vec![
                    DegradationReason::ExtractionFailed,
                    DegradationReason::DeadlineExceeded,
                ]
            }
        };

        // The domain is recovered from the URL inside the stand-in text
        UrlText {
            text: format!("{}: {}", EXTRACTION_FAILED_PREFIX, text),
            domain: None,
            reasons,
        }
    }

    /// Plain-language explanation of a finished result; absent on any failure
    async fn explain(&self, result: &ScoringResult, deadline: Option<Instant>) -> Option<String> {
        let annotator = self.annotator.as_ref()?;
        let modality = result.modality.to_string();
        let level = result.label().to_string();
        let call = annotator.explain(&modality, &level, result.score(), &result.rationale);

        match within(deadline, call).await {
            Some(Ok(explanation)) => Some(explanation),
            Some(Err(e)) => {
                warn!("No explanation for {}: {}", result.request_id, e);
                None
            }
            None => {
                warn!("Deadline expired before explaining {}", result.request_id);
                None
            }
        }
    }

    async fn score_vision(
        &self,
        text: Option<&str>,
        image: &ImageRef,
        deadline: Option<Instant>,
    ) -> VisionOutcome {
        let Some(annotator) = &self.annotator else {
            debug!("No vision annotator configured");
            return VisionOutcome::failed(false, vec![DegradationReason::VisionUnavailable]);
        };

        let prompt = self.config.vision_prompt.as_str();
        let call = async {
            match text {
                Some(text) => annotator.score_combined(prompt, text, image).await,
                None => annotator.score_image(prompt, image).await,
            }
        };

        match within(deadline, call).await {
            Some(Ok(verdict)) => VisionOutcome {
                verdict: Some(verdict),
                reasons: Vec::new(),
                attempted: true,
            },
            Some(Err(e)) => {
                warn!("Vision unavailable for {}: {}", image.describe(), e);
                VisionOutcome::failed(true, vec![DegradationReason::VisionUnavailable])
            }
            None => {
                warn!("Deadline expired while scoring {}", image.describe());
                VisionOutcome::failed(
                    true,
                    vec![
                        DegradationReason::VisionUnavailable,
                        DegradationReason::DeadlineExceeded,
                    ],
                )
            }
        }
    }
}

/// Run `future` to completion, or until `deadline` passes
async fn within<F: Future>(deadline: Option<Instant>, future: F) -> Option<F::Output> {
    match deadline {
        Some(at) => tokio::time::timeout_at(at, future).await.ok(),
        None => Some(future.await),
    }
}
