//! Article extraction
//!
//! Fetches a page with retry and backoff, picks the main content region and
//! strips boilerplate. Failures never escape as errors: they come back as an
//! [`ExtractionOutcome::Failed`] document so callers can degrade.

use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::{FetchConfig, FetchError, SharedFetcher};

/// Content region selectors, tried in order
const CONTENT_SELECTORS: &[&str] = &[
    "article",
    r#"div[itemprop="articleBody"]"#,
    "div.article-content",
    "div.article-content__editor",
    "div#story_body_content",
    "div.story",
    "section.article-body",
    "div.entry-content",
    "div#main-content",
];

/// Elements whose text starts on a new line
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "dd", "div", "dl", "dt", "figcaption",
    "figure", "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "li", "main", "nav",
    "ol", "p", "pre", "section", "table", "td", "th", "tr", "ul",
];

/// Paragraphs at or below this length are skipped in the fallback pass
const MIN_PARAGRAPH_CHARS: usize = 10;

/// Title used when the page has none
pub const UNTITLED: &str = "untitled";

static REGION_SELECTORS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    CONTENT_SELECTORS
        .iter()
        .map(|s| Selector::parse(s).unwrap())
        .collect()
});

static TITLE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());

static PARAGRAPH_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p").unwrap());

static BOILERPLATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)\(C\)\s*版權所有|All rights reserved|分享給好友|點擊下載|繼續閱讀|相關新聞.*$")
        .unwrap()
});

/// Whether extraction produced usable text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    Success,
    Failed(String),
}

/// Cleaned page content
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    /// Requested URL
    pub url: String,
    /// Page title (if found)
    pub title: Option<String>,
    /// Host of the requested URL, empty when it could not be parsed
    pub domain: String,
    /// Cleaned body text
    pub text: String,
    /// Whether content was truncated
    pub truncated: bool,
    pub outcome: ExtractionOutcome,
}

impl ExtractedDocument {
    fn failed(url: &str, domain: String, reason: String) -> Self {
        Self {
            url: url.to_string(),
            title: None,
            domain,
            text: String::new(),
            truncated: false,
            outcome: ExtractionOutcome::Failed(reason),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == ExtractionOutcome::Success
    }

    /// Title, or a placeholder when the page had none
    pub fn title_or_default(&self) -> &str {
        self.title.as_deref().unwrap_or(UNTITLED)
    }
}

/// Fetches URLs and extracts their main text
#[derive(Clone)]
pub struct ContentExtractor {
    fetcher: SharedFetcher,
    config: FetchConfig,
}

impl ContentExtractor {
    pub fn new(fetcher: SharedFetcher, config: FetchConfig) -> Self {
        Self { fetcher, config }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch and clean a URL.
    ///
    /// Transient failures are retried up to `max_attempts` times, waiting
    /// `backoff_base * attempt` between tries.
    pub async fn fetch(&self, url: &str) -> ExtractedDocument {
        let domain = match url::Url::parse(url) {
            Ok(parsed) => parsed.host_str().unwrap_or_default().to_string(),
            Err(e) => {
                warn!("Rejecting {}: {}", url, e);
                let err = FetchError::InvalidUrl(url.to_string());
                return ExtractedDocument::failed(url, String::new(), err.to_string());
            }
        };

        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!("Fetching {} (attempt {}/{})", url, attempt, max_attempts);

            match self.fetcher.get(url).await {
                Ok(page) => return self.build_document(url, domain, &page.body),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    debug!("Attempt {} for {} failed: {}", attempt, url, e);
                    tokio::time::sleep(self.config.backoff_base * attempt).await;
                }
                Err(e) if e.is_retryable() => {
                    warn!("Giving up on {} after {} attempts: {}", url, attempt, e);
                    let reason = format!("max retries ({}) exceeded: {}", max_attempts, e);
                    return ExtractedDocument::failed(url, domain, reason);
                }
                Err(e) => {
                    warn!("Fetch of {} failed: {}", url, e);
                    return ExtractedDocument::failed(url, domain, e.to_string());
                }
            }
        }
    }

    /// Fetch several URLs concurrently, preserving input order
    pub async fn fetch_many(&self, urls: &[&str], max_concurrent: usize) -> Vec<ExtractedDocument> {
        use futures::stream::{self, StreamExt};

        stream::iter(urls.iter().map(|u| u.to_string()))
            .map(|url| async move { self.fetch(&url).await })
            .buffered(max_concurrent.max(1))
            .collect()
            .await
    }

    fn build_document(&self, url: &str, domain: String, html: &str) -> ExtractedDocument {
        let (title, text) = extract_content(html, self.config.min_region_chars);
        if text.is_empty() {
            warn!("No readable text at {}", url);
            return ExtractedDocument::failed(url, domain, "page has no readable text".to_string());
        }

        let (text, truncated) = truncate_chars(text, self.config.max_content_chars);
        debug!("Extracted {} chars from {}", text.chars().count(), url);

        ExtractedDocument {
            url: url.to_string(),
            title,
            domain,
            text,
            truncated,
            outcome: ExtractionOutcome::Success,
        }
    }
}

/// Extract title and cleaned main text from HTML.
///
/// The first content region longer than `min_region_chars` wins; otherwise
/// every paragraph longer than 10 characters is kept.
pub fn extract_content(html: &str, min_region_chars: usize) -> (Option<String>, String) {
    let document = Html::parse_document(html);

    let title = document
        .select(&TITLE_SELECTOR)
        .next()
        .map(|el| normalize_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let region = REGION_SELECTORS.iter().find_map(|selector| {
        document
            .select(selector)
            .next()
            .map(element_text)
            .filter(|text| text.chars().count() > min_region_chars)
    });

    let raw = region.unwrap_or_else(|| {
        document
            .select(&PARAGRAPH_SELECTOR)
            .map(element_text)
            .filter(|p| p.chars().count() > MIN_PARAGRAPH_CHARS)
            .collect::<Vec<_>>()
            .join("\n")
    });

    (title, strip_noise(&raw))
}

/// Visible text of an element, skipping script/style/noscript subtrees.
///
/// Inline markup stays on its line; each block element and `<br>` starts a
/// new one.
fn element_text(element: ElementRef<'_>) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut current_block = None;

    for node_ref in element.descendants() {
        let text_node = match node_ref.value() {
            Node::Element(el) if el.name() == "br" => {
                current_block = None;
                continue;
            }
            Node::Text(text_node) => text_node,
            _ => continue,
        };

        let mut block = None;
        let mut excluded = false;
        for ancestor in node_ref.ancestors() {
            let Some(el) = ancestor.value().as_element() else {
                continue;
            };
            if matches!(el.name(), "script" | "style" | "noscript") {
                excluded = true;
                break;
            }
            let is_root = ancestor.id() == element.id();
            if block.is_none() && (is_root || BLOCK_TAGS.contains(&el.name())) {
                block = Some(ancestor.id());
            }
            if is_root {
                break;
            }
        }
        if excluded {
            continue;
        }

        let flat: String = text_node
            .chars()
            .map(|c| if c.is_whitespace() { ' ' } else { c })
            .collect();
        if block != current_block {
            if flat.trim().is_empty() {
                continue;
            }
            lines.push(String::new());
            current_block = block;
        }
        if let Some(line) = lines.last_mut() {
            line.push_str(&flat);
        }
    }

    normalize_whitespace(&lines.join("\n"))
}

/// Remove boilerplate phrases and collapse redundant whitespace
pub fn strip_noise(text: &str) -> String {
    let stripped = BOILERPLATE_REGEX.replace_all(text, "");
    normalize_whitespace(&stripped)
}

/// Collapse runs of spaces within lines and drop empty lines
fn normalize_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate_chars(text: String, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => (text[..cut].to_string(), true),
        None => (text, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FetchedPage, HttpFetch, ReqwestFetcher};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ARTICLE_HTML: &str = r#"
        <html>
        <head><title> 衛福部公布健康檢查結果 </title></head>
        <body>
            <nav>首頁 | 政治 | 社會</nav>
            <article>
                <script>var tracking = 1;</script>
                <p>衛生福利部今天公布年度健康檢查結果，多數受檢者的血壓與血糖數值都在正常範圍內。</p>
                <p>醫師建議民眾維持規律運動與均衡飲食，並定期回診追蹤。   分享給好友</p>
                <p>報告指出，年輕族群的睡眠不足問題仍然值得關注，相關單位將持續宣導。</p>
                <p>相關新聞：其他報導連結</p>
            </article>
            <footer>All rights reserved</footer>
        </body>
        </html>
    "#;

    /// Fetcher replaying scripted responses and counting calls
    struct ScriptedFetcher {
        responses: Mutex<VecDeque<Result<String, FetchError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn new(responses: Vec<Result<String, FetchError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl HttpFetch for ScriptedFetcher {
        async fn get(&self, url: &str) -> Result<FetchedPage, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.responses.lock().unwrap().pop_front();
            match next {
                Some(Ok(body)) => Ok(FetchedPage {
                    url: url.to_string(),
                    body,
                }),
                Some(Err(e)) => Err(e),
                None => Err(FetchError::Timeout(1)),
            }
        }
    }

    fn fast_config() -> FetchConfig {
        FetchConfig::default().with_backoff(Duration::ZERO)
    }

    #[test]
    fn test_extract_article_region() {
        let (title, text) = extract_content(ARTICLE_HTML, 50);

        assert_eq!(title.as_deref(), Some("衛福部公布健康檢查結果"));
        assert!(text.contains("健康檢查結果"));
        assert!(!text.contains("tracking"));
        assert!(!text.contains("首頁"));
        assert!(!text.contains("分享給好友"));
        assert!(!text.contains("其他報導連結"));
    }

    #[test]
    fn test_inline_markup_stays_on_line() {
        let html = r#"
            <html><body><article>
                <h2>Budget <em>approved</em></h2>
                <p>Officials said <a href="/report">the report</a> was <b>final</b>.</p>
                <p>Spending rises<br>next year.</p>
            </article></body></html>
        "#;
        let (_, text) = extract_content(html, 10);

        assert_eq!(
            text,
            "Budget approved\nOfficials said the report was final.\nSpending rises\nnext year."
        );
    }

    #[test]
    fn test_paragraph_fallback() {
        let html = r#"
            <html><body>
                <div class="layout">
                    <p>短句</p>
                    <p>This paragraph is long enough to be kept by the fallback.</p>
                    <p>Another sufficiently long paragraph of body text here.</p>
                </div>
            </body></html>
        "#;
        let (title, text) = extract_content(html, 100);

        assert_eq!(title, None);
        assert!(!text.contains("短句"));
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn test_short_region_falls_through() {
        let html = r#"
            <html><body>
                <article>tiny</article>
                <p>Paragraph text that is definitely longer than ten characters.</p>
            </body></html>
        "#;
        let (_, text) = extract_content(html, 100);
        assert_eq!(text, "Paragraph text that is definitely longer than ten characters.");
    }

    #[test]
    fn test_strip_noise() {
        let input = "  Body   text (C) 版權所有 \n\n\n 繼續閱讀 more\twords  ";
        assert_eq!(strip_noise(input), "Body text\nmore words");
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let first = extract_content(ARTICLE_HTML, 50);
        let second = extract_content(ARTICLE_HTML, 50);
        assert_eq!(first.1.as_bytes(), second.1.as_bytes());
    }

    #[test]
    fn test_truncate_chars() {
        let (text, truncated) = truncate_chars("健康檢查".to_string(), 2);
        assert_eq!(text, "健康");
        assert!(truncated);

        let (text, truncated) = truncate_chars("ok".to_string(), 5);
        assert_eq!(text, "ok");
        assert!(!truncated);
    }

    #[tokio::test]
    async fn test_three_network_failures_yield_failed() {
        let fetcher = ScriptedFetcher::new(vec![
            Err(FetchError::Timeout(10)),
            Err(FetchError::Timeout(10)),
            Err(FetchError::Timeout(10)),
        ]);
        let extractor = ContentExtractor::new(fetcher.clone(), fast_config());

        let doc = extractor.fetch("https://news.example.com/a").await;

        assert!(matches!(doc.outcome, ExtractionOutcome::Failed(_)));
        assert_eq!(doc.domain, "news.example.com");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_status_stops_early() {
        let fetcher = ScriptedFetcher::new(vec![Err(FetchError::Status(404))]);
        let extractor = ContentExtractor::new(fetcher.clone(), fast_config());

        let doc = extractor.fetch("https://example.com/missing").await;

        assert_eq!(doc.outcome, ExtractionOutcome::Failed("HTTP status 404".to_string()));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let fetcher = ScriptedFetcher::new(vec![
            Err(FetchError::Status(503)),
            Ok(ARTICLE_HTML.to_string()),
        ]);
        let extractor = ContentExtractor::new(fetcher.clone(), fast_config());

        let doc = extractor.fetch("https://www.cna.com.tw/news/1").await;

        assert!(doc.is_success());
        assert_eq!(doc.domain, "www.cna.com.tw");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalid_url_fails_without_fetching() {
        let fetcher = ScriptedFetcher::new(vec![]);
        let extractor = ContentExtractor::new(fetcher.clone(), fast_config());

        let doc = extractor.fetch("not a url").await;

        assert!(!doc.is_success());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fetch_many_preserves_order() {
        let fetcher = ScriptedFetcher::new(vec![
            Ok(ARTICLE_HTML.to_string()),
            Ok(ARTICLE_HTML.to_string()),
        ]);
        let extractor = ContentExtractor::new(fetcher, fast_config());

        let docs = extractor
            .fetch_many(&["https://a.example.com/", "https://b.example.com/"], 1)
            .await;

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].domain, "a.example.com");
        assert_eq!(docs[1].domain, "b.example.com");
    }

    #[tokio::test]
    async fn test_reqwest_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let config = fast_config();
        let fetcher = Arc::new(ReqwestFetcher::new(&config).unwrap());
        let extractor = ContentExtractor::new(fetcher, config);

        let doc = extractor.fetch(&format!("{}/flaky", server.uri())).await;
        assert!(!doc.is_success());
    }

    #[tokio::test]
    async fn test_reqwest_same_page_same_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_string(ARTICLE_HTML),
            )
            .mount(&server)
            .await;

        let config = fast_config();
        let fetcher = Arc::new(ReqwestFetcher::new(&config).unwrap());
        let extractor = ContentExtractor::new(fetcher, config);
        let url = format!("{}/article", server.uri());

        let first = extractor.fetch(&url).await;
        let second = extractor.fetch(&url).await;
        assert!(first.is_success());
        assert_eq!(first.text.as_bytes(), second.text.as_bytes());
    }
}
