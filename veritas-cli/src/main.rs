//! Veritas CLI
//!
//! Content credibility scoring for text, links and images.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{warn, Level};
use tracing_subscriber::FmtSubscriber;

use veritas_core::{ImageRef, ScoringRequest, ScoringResult};
use veritas_runtime::{Pipeline, PipelineConfig};
use veritas_scorers::{
    create_anthropic_backend, create_backend, create_gemini_backend, AnthropicConfig, Classifier,
    GeminiConfig, ModelLocator, MultimodalAnnotator, OpenAIBackendConfig, PromptRegistry,
    SharedBackend,
};

#[derive(Parser)]
#[command(name = "veritas")]
#[command(author, version, about = "Veritas: content credibility scoring", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (0-3)
    #[arg(short, long, default_value = "1")]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Score text, a link, an image or text with an image
    Score {
        /// Text or URL to score
        #[arg(short, long)]
        text: Option<String>,

        /// Image file to score
        #[arg(short, long)]
        image: Option<PathBuf>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,

        /// Save the JSON result (default name: score_<timestamp>.json)
        #[arg(long)]
        save: bool,

        #[command(flatten)]
        pipeline: PipelineArgs,

        #[command(flatten)]
        llm: LlmArgs,
    },

    /// Score every non-empty line of a file
    Batch {
        /// File with one text or URL per line
        #[arg(short, long)]
        input: PathBuf,

        /// Requests scored concurrently
        #[arg(long, default_value = "4")]
        concurrency: usize,

        #[command(flatten)]
        pipeline: PipelineArgs,

        #[command(flatten)]
        llm: LlmArgs,
    },

    /// Annotate the credibility features of one or more articles
    Annotate {
        /// Article URL; repeat for several articles
        #[arg(short, long, required = true)]
        url: Vec<String>,

        /// Print the annotation as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        pipeline: PipelineArgs,

        #[command(flatten)]
        llm: LlmArgs,
    },

    /// Report model discovery and service credentials
    Status {
        #[command(flatten)]
        pipeline: PipelineArgs,

        #[command(flatten)]
        llm: LlmArgs,
    },
}

#[derive(Args)]
struct PipelineArgs {
    /// Classifier model file (or set VERITAS_MODEL_PATH env var)
    #[arg(long, env = "VERITAS_MODEL_PATH")]
    model_path: Option<PathBuf>,

    /// Deadline for network I/O per request, in seconds
    #[arg(long)]
    deadline: Option<u64>,

    /// Ask the LLM service to explain each verdict
    #[arg(long)]
    explain: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Provider {
    Gemini,
    Openai,
    Anthropic,
}

impl Provider {
    fn default_model(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini-2.0-flash",
            Self::Openai => "gpt-4o-mini",
            Self::Anthropic => "claude-sonnet-4-20250514",
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Gemini => "Gemini",
            Self::Openai => "OpenAI",
            Self::Anthropic => "Anthropic",
        }
    }
}

#[derive(Args)]
struct LlmArgs {
    /// Vision and annotation service
    #[arg(long, value_enum, default_value = "gemini")]
    provider: Provider,

    /// Model to use (defaults per provider)
    #[arg(short, long)]
    model: Option<String>,

    /// Gemini API key (or set GEMINI_API_KEY env var)
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_key: Option<String>,

    /// OpenAI API key (or set OPENAI_API_KEY env var)
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_key: Option<String>,

    /// Anthropic API key (or set ANTHROPIC_API_KEY env var)
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    anthropic_key: Option<String>,

    /// Directory of prompt overrides (TOML)
    #[arg(long)]
    prompt_dir: Option<PathBuf>,

    /// Never call the vision service
    #[arg(long)]
    no_vision: bool,
}

impl LlmArgs {
    fn model(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }

    fn key(&self) -> Option<&str> {
        let key = match self.provider {
            Provider::Gemini => &self.gemini_key,
            Provider::Openai => &self.openai_key,
            Provider::Anthropic => &self.anthropic_key,
        };
        key.as_deref().filter(|k| !k.trim().is_empty())
    }

    fn backend(&self) -> Result<Option<SharedBackend>> {
        if self.no_vision {
            return Ok(None);
        }
        let Some(key) = self.key() else {
            warn!(
                "No {} API key; vision scoring and annotation are unavailable",
                self.provider.name()
            );
            return Ok(None);
        };

        let model = self.model();
        let backend = match self.provider {
            Provider::Gemini => create_gemini_backend(GeminiConfig::new(key, &model))?,
            Provider::Openai => create_backend(OpenAIBackendConfig::openai(key, &model))?,
            Provider::Anthropic => create_anthropic_backend(AnthropicConfig::new(key, &model))?,
        };
        Ok(Some(backend))
    }

    fn annotator(&self) -> Result<Option<MultimodalAnnotator>> {
        let Some(backend) = self.backend()? else {
            return Ok(None);
        };
        let mut annotator = MultimodalAnnotator::new(backend);
        if let Some(dir) = &self.prompt_dir {
            annotator = annotator.with_prompts(PromptRegistry::load_from_dir(dir)?);
        }
        Ok(Some(annotator))
    }
}

impl PipelineArgs {
    fn config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::from_env();
        if let Some(path) = &self.model_path {
            config = config.with_model_locator(ModelLocator::default().with_override(path));
        }
        if let Some(secs) = self.deadline {
            config = config.with_deadline(Duration::from_secs(secs));
        }
        config.with_explanation(self.explain)
    }
}

fn build_pipeline(config: PipelineConfig, llm: &LlmArgs) -> Result<Pipeline> {
    let pipeline = Pipeline::new(config)?;
    Ok(match llm.annotator()? {
        Some(annotator) => pipeline.with_annotator(annotator),
        None => pipeline,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = match cli.verbose {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    match cli.command {
        Commands::Score {
            text,
            image,
            json,
            save,
            pipeline,
            llm,
        } => {
            run_score(text, image, json, save, &pipeline, &llm).await?;
        }
        Commands::Batch {
            input,
            concurrency,
            pipeline,
            llm,
        } => {
            run_batch(&input, concurrency, &pipeline, &llm).await?;
        }
        Commands::Annotate {
            url,
            json,
            pipeline,
            llm,
        } => {
            run_annotate(&url, json, &pipeline, &llm).await?;
        }
        Commands::Status { pipeline, llm } => {
            check_status(&pipeline, &llm);
        }
    }

    Ok(())
}

async fn run_score(
    text: Option<String>,
    image: Option<PathBuf>,
    json: bool,
    save: bool,
    pipeline_args: &PipelineArgs,
    llm: &LlmArgs,
) -> Result<()> {
    let request = ScoringRequest::new(text, image.map(ImageRef::Path));
    if request.is_empty() {
        anyhow::bail!("Nothing to score. Pass --text and/or --image");
    }

    let pipeline = build_pipeline(pipeline_args.config(), llm)?;
    let result = pipeline.score(request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    if save {
        let timestamp = chrono::Utc::now().format("%Y-%m-%d_%H-%M-%S");
        let output_path = PathBuf::from(format!("score_{}.json", timestamp));
        fs::write(&output_path, serde_json::to_string_pretty(&result)?)?;
        println!("📄 Result saved to: {}", output_path.display());
    }

    Ok(())
}

async fn run_batch(
    input: &Path,
    concurrency: usize,
    pipeline_args: &PipelineArgs,
    llm: &LlmArgs,
) -> Result<()> {
    let content = fs::read_to_string(input)?;
    let requests: Vec<ScoringRequest> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ScoringRequest::text)
        .collect();

    let mut config = pipeline_args.config();
    config.max_concurrent = concurrency.max(1);
    let pipeline = build_pipeline(config, llm)?;

    // One JSON object per line
    for result in pipeline.score_many(requests).await {
        match result {
            Ok(result) => println!("{}", serde_json::to_string(&result)?),
            Err(e) => println!("{}", serde_json::json!({ "error": e.to_string() })),
        }
    }

    Ok(())
}

async fn run_annotate(
    urls: &[String],
    json: bool,
    pipeline_args: &PipelineArgs,
    llm: &LlmArgs,
) -> Result<()> {
    let pipeline = build_pipeline(pipeline_args.config(), llm)?;
    let urls: Vec<&str> = urls.iter().map(String::as_str).collect();
    let annotated = pipeline.annotate_urls(&urls).await;

    if json {
        let values: Vec<_> = annotated
            .iter()
            .map(|a| {
                serde_json::json!({
                    "url": a.document.url,
                    "title": a.document.title_or_default(),
                    "domain": a.document.domain,
                    "extracted": a.document.is_success(),
                    "truncated": a.document.truncated,
                    "annotation": a.annotation,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&values)?);
        return Ok(());
    }

    for (i, a) in annotated.iter().enumerate() {
        if i > 0 {
            println!("\n{}", "─".repeat(40));
        }
        println!("📰 {}", a.document.title_or_default());
        println!("🌐 {}", a.document.url);
        if !a.document.is_success() {
            println!("⚠️  Page could not be retrieved; features are estimated from the link");
        } else if a.document.truncated {
            println!("✂️  Content was truncated before annotation");
        }
        println!();
        for (name, value) in a.annotation.scores() {
            println!("   {:<28} {:.2}", name, value);
        }
        println!("\n🧾 {} ({:?})", a.annotation.short_judgement, a.annotation.source);
    }

    Ok(())
}

fn print_result(result: &ScoringResult) {
    println!(
        "🔎 Credibility: {} ({:.4}) [{}]",
        result.label(),
        result.score(),
        result.label().color()
    );
    println!("📡 Modality: {}", result.modality);
    for sub in &result.sub_scores {
        println!("   {:?}: {:.4} ({})", sub.source, sub.score, sub.level);
    }
    if result.status.is_degraded() {
        let reasons: Vec<_> = result.status.reasons().iter().map(|r| r.as_str()).collect();
        println!("⚠️  Degraded: {}", reasons.join(", "));
    }
    println!("\n{}", result.rationale);
    if let Some(vision) = &result.vision_rationale {
        println!("\n🖼️  {}", vision);
    }
    if let Some(explanation) = &result.explanation {
        println!("\n💡 {}", explanation);
    }
    if !result.keywords.is_empty() {
        println!("\n🏷️  {} | {:?}", result.keywords.join(", "), result.category);
    }
}

fn check_status(pipeline_args: &PipelineArgs, llm: &LlmArgs) {
    let config = pipeline_args.config();

    println!("🔎 Classifier model search paths:");
    for path in config.model_locator.search_paths() {
        let mark = if path.is_file() { "✅" } else { "  " };
        println!("   {} {}", mark, path.display());
    }

    let classifier = Classifier::new(config.model_locator.clone());
    match classifier.model_path() {
        Some(path) => println!("✅ Model loaded from {}", path.display()),
        None => println!("⚠️  No usable model; text scores will use the heuristic fallback"),
    }

    println!("\n🔑 Vision service credentials:");
    for (name, present) in [
        ("GEMINI_API_KEY", llm.gemini_key.is_some()),
        ("OPENAI_API_KEY", llm.openai_key.is_some()),
        ("ANTHROPIC_API_KEY", llm.anthropic_key.is_some()),
    ] {
        println!("   {} {}", if present { "✅" } else { "❌" }, name);
    }
    match llm.key() {
        Some(_) if !llm.no_vision => {
            println!("✅ Using {} ({})", llm.provider.name(), llm.model())
        }
        _ => println!("⚠️  Vision scoring unavailable; image results will be neutral"),
    }

    let prompts = match &llm.prompt_dir {
        Some(dir) => PromptRegistry::load_from_dir(dir).unwrap_or_else(|e| {
            println!("\n⚠️  Cannot read prompt overrides in {}: {}", dir.display(), e);
            PromptRegistry::load_embedded()
        }),
        None => PromptRegistry::load_embedded(),
    };
    println!("\n📝 Prompts:");
    for id in prompts.list_ids() {
        if let Some(spec) = prompts.get(id) {
            println!("   {:<22} {:<7} {}", id, spec.prompt.kind, spec.prompt.name);
        }
    }

    match config.deadline {
        Some(deadline) => println!("\n⏱️  Deadline: {}s", deadline.as_secs()),
        None => println!("\n⏱️  Deadline: none"),
    }
}
