//! Pipeline configuration

use std::time::Duration;
use tracing::warn;
use veritas_core::DomainTrustTable;
use veritas_fetch::FetchConfig;
use veritas_scorers::ModelLocator;

pub const FETCH_TIMEOUT_ENV: &str = "VERITAS_FETCH_TIMEOUT_SECS";
pub const DEADLINE_ENV: &str = "VERITAS_DEADLINE_SECS";

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Page retrieval settings
    pub fetch: FetchConfig,
    /// Where to look for the classifier model
    pub model_locator: ModelLocator,
    /// Domain trust priors
    pub trust: DomainTrustTable,
    /// Overall deadline for network I/O per request (None = unbounded)
    pub deadline: Option<Duration>,
    /// Upper bound for a single annotator call
    pub annotator_timeout: Duration,
    /// Custom question for the vision service; empty uses the built-in prompt
    pub vision_prompt: String,
    /// Number of keywords reported per result
    pub keyword_count: usize,
    /// Characters kept in the text preview
    pub preview_chars: usize,
    /// Concurrent requests for batch scoring
    pub max_concurrent: usize,
    /// Ask the LLM service to explain each verdict
    pub explain: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch: FetchConfig::default(),
            model_locator: ModelLocator::default(),
            trust: DomainTrustTable::default(),
            deadline: None,
            annotator_timeout: Duration::from_secs(30),
            vision_prompt: String::new(),
            keyword_count: 5,
            preview_chars: 120,
            max_concurrent: 4,
            explain: false,
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `VERITAS_MODEL_PATH`, `VERITAS_FETCH_TIMEOUT_SECS`
    /// and `VERITAS_DEADLINE_SECS`. Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self {
            model_locator: ModelLocator::from_env(),
            ..Self::default()
        };

        if let Some(secs) = env_secs(FETCH_TIMEOUT_ENV) {
            config.fetch = config.fetch.with_timeout(secs.max(1));
        }
        if let Some(secs) = env_secs(DEADLINE_ENV) {
            config.deadline = (secs > 0).then(|| Duration::from_secs(secs));
        }

        config
    }

    pub fn with_fetch(mut self, fetch: FetchConfig) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn with_model_locator(mut self, locator: ModelLocator) -> Self {
        self.model_locator = locator;
        self
    }

    pub fn with_trust_table(mut self, trust: DomainTrustTable) -> Self {
        self.trust = trust;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_annotator_timeout(mut self, timeout: Duration) -> Self {
        self.annotator_timeout = timeout;
        self
    }

    pub fn with_vision_prompt(mut self, prompt: &str) -> Self {
        self.vision_prompt = prompt.to_string();
        self
    }

    pub fn with_explanation(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }
}

fn env_secs(name: &str) -> Option<u64> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse() {
        Ok(secs) => Some(secs),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a number of seconds", name, value);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert!(config.deadline.is_none());
        assert_eq!(config.keyword_count, 5);
        assert_eq!(config.preview_chars, 120);
        assert_eq!(config.fetch.max_attempts, 3);
        assert!(!config.explain);
    }

    #[test]
    fn test_builders() {
        let config = PipelineConfig::default()
            .with_deadline(Duration::from_secs(5))
            .with_vision_prompt("Is this real?")
            .with_trust_table(DomainTrustTable::empty().with_entry("example.org", 4.0));
        assert_eq!(config.deadline, Some(Duration::from_secs(5)));
        assert_eq!(config.vision_prompt, "Is this real?");
        assert_eq!(config.trust.len(), 1);
    }

    #[test]
    fn test_from_env() {
        // Only this test touches these variables
        std::env::set_var(FETCH_TIMEOUT_ENV, "4");
        std::env::set_var(DEADLINE_ENV, "not-a-number");
        let config = PipelineConfig::from_env();
        assert_eq!(config.fetch.timeout_secs, 4);
        assert!(config.deadline.is_none());

        std::env::set_var(DEADLINE_ENV, "12");
        let config = PipelineConfig::from_env();
        assert_eq!(config.deadline, Some(Duration::from_secs(12)));

        std::env::remove_var(FETCH_TIMEOUT_ENV);
        std::env::remove_var(DEADLINE_ENV);
    }
}
