//! Classifier adapter
//!
//! Locates a trained tree model on disk, loads it lazily exactly once and
//! maps feature vectors to a score in [0, 1].

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{debug, info, warn};
use veritas_core::{FeatureVector, FEATURE_COUNT};

use crate::gbdt::{LightGbmLoader, ModelLoader, TreeModel};

/// Environment variable naming an explicit model file
pub const MODEL_PATH_ENV: &str = "VERITAS_MODEL_PATH";

/// Model files searched, in order, relative to the base directory
pub const DEFAULT_MODEL_CANDIDATES: &[&str] = &[
    "model/credibility_lgbm.txt",
    "models/credibility_lgbm.txt",
    "model_auth_level/auth_level_lgbm.txt",
    "model_auth_level/lightgbm_model.txt",
];

/// Classifier errors
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("No classifier model available")]
    Unavailable,

    #[error("Model expects {expected} features, vector has {actual}")]
    FeatureMismatch { expected: usize, actual: usize },

    #[error("Model produced invalid output: {0}")]
    InvalidOutput(String),
}

/// Ordered list of places a model file may live
#[derive(Debug, Clone)]
pub struct ModelLocator {
    override_path: Option<PathBuf>,
    candidates: Vec<PathBuf>,
    base_dir: Option<PathBuf>,
}

impl Default for ModelLocator {
    fn default() -> Self {
        Self {
            override_path: None,
            candidates: DEFAULT_MODEL_CANDIDATES.iter().map(PathBuf::from).collect(),
            base_dir: None,
        }
    }
}

impl ModelLocator {
    /// Default candidates, with `VERITAS_MODEL_PATH` checked first when set
    pub fn from_env() -> Self {
        let locator = Self::default();
        match std::env::var(MODEL_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => locator.with_override(path.trim()),
            _ => locator,
        }
    }

    /// A locator that never finds anything
    pub fn none() -> Self {
        Self {
            override_path: None,
            candidates: Vec::new(),
            base_dir: None,
        }
    }

    pub fn with_override(mut self, path: impl Into<PathBuf>) -> Self {
        self.override_path = Some(path.into());
        self
    }

    pub fn with_candidates<P: Into<PathBuf>>(mut self, candidates: impl IntoIterator<Item = P>) -> Self {
        self.candidates = candidates.into_iter().map(Into::into).collect();
        self
    }

    /// Resolve relative candidates against `dir` instead of the working directory
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Every path that will be tried, in order
    pub fn search_paths(&self) -> Vec<PathBuf> {
        self.override_path
            .iter()
            .chain(self.candidates.iter())
            .map(|p| match &self.base_dir {
                Some(base) if p.is_relative() => base.join(p),
                _ => p.clone(),
            })
            .collect()
    }

    /// First existing model file
    pub fn resolve(&self) -> Option<PathBuf> {
        self.search_paths().into_iter().find(|p| p.is_file())
    }
}

struct LoadedModel {
    path: Option<PathBuf>,
    model: Arc<dyn TreeModel>,
}

/// Lazily loaded credibility classifier
pub struct Classifier {
    locator: ModelLocator,
    loader: Arc<dyn ModelLoader>,
    model: OnceLock<Option<LoadedModel>>,
}

impl Classifier {
    /// Classifier that reads LightGBM text models found by `locator`
    pub fn new(locator: ModelLocator) -> Self {
        Self::with_loader(locator, Arc::new(LightGbmLoader))
    }

    pub fn with_loader(locator: ModelLocator, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            locator,
            loader,
            model: OnceLock::new(),
        }
    }

    /// Classifier around an already loaded model
    pub fn with_model(model: Arc<dyn TreeModel>) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(Some(LoadedModel { path: None, model }));
        Self {
            locator: ModelLocator::none(),
            loader: Arc::new(LightGbmLoader),
            model: cell,
        }
    }

    /// Classifier with no model; every prediction is `Unavailable`
    pub fn unavailable() -> Self {
        Self::new(ModelLocator::none())
    }

    pub fn locator(&self) -> &ModelLocator {
        &self.locator
    }

    fn loaded(&self) -> Option<&LoadedModel> {
        self.model.get_or_init(|| self.load()).as_ref()
    }

    fn load(&self) -> Option<LoadedModel> {
        let Some(path) = self.locator.resolve() else {
            info!("No classifier model found; text scores will use the heuristic");
            return None;
        };

        match self.loader.load(&path) {
            Ok(model) => {
                info!("Loaded classifier model from {}", path.display());
                Some(LoadedModel {
                    path: Some(path),
                    model: Arc::from(model),
                })
            }
            Err(e) => {
                warn!("Failed to load classifier model {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Whether a model is loaded; triggers the one-time load
    pub fn is_available(&self) -> bool {
        self.loaded().is_some()
    }

    /// Run the one-time load now instead of on the first prediction
    pub fn preload(&self) -> bool {
        let available = self.is_available();
        debug!("Classifier preloaded (available: {})", available);
        available
    }

    /// Whether the one-time load has already run, successful or not
    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }

    /// Path of the loaded model, when it came from disk
    pub fn model_path(&self) -> Option<&Path> {
        self.loaded().and_then(|m| m.path.as_deref())
    }

    /// Score a feature vector
    pub fn predict(&self, features: &FeatureVector) -> Result<f64, ClassifierError> {
        let loaded = self.loaded().ok_or(ClassifierError::Unavailable)?;

        let expected = loaded.model.num_features();
        if expected != FEATURE_COUNT {
            return Err(ClassifierError::FeatureMismatch {
                expected,
                actual: FEATURE_COUNT,
            });
        }

        let output = loaded.model.predict(&features.to_array());
        let score = reduce_output(&output)?;
        debug!("Classifier output {:?} -> {:.4}", output, score);
        Ok(score)
    }
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("locator", &self.locator)
            .field("loaded", &self.model.get().map(|m| m.is_some()))
            .finish()
    }
}

/// Collapse model output to one score; class probabilities become the
/// expected class position scaled to [0, 1]
fn reduce_output(output: &[f64]) -> Result<f64, ClassifierError> {
    if output.iter().any(|v| !v.is_finite()) {
        return Err(ClassifierError::InvalidOutput(format!("{:?}", output)));
    }

    let score = match output.len() {
        0 => return Err(ClassifierError::InvalidOutput("empty output".to_string())),
        1 => output[0],
        k => {
            let last = (k - 1) as f64;
            output
                .iter()
                .enumerate()
                .map(|(i, p)| p * i as f64 / last)
                .sum()
        }
    };

    Ok(score.clamp(0.0, 1.0))
}
