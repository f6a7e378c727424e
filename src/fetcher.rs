//! Page fetching: remote scraping service first, local extraction as fallback.
//!
//! The remote call goes through the retry policy (timeouts and connection
//! errors are transient; HTTP error statuses are not). Any persistent remote
//! failure degrades to a local fetch-and-parse pass so the pipeline can still
//! produce a result. The fetcher never raises past its own boundary; callers
//! always receive a tagged [`ScrapeResult`].

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::Config;
use crate::retry::RetryPolicy;

/// Desktop user-agent presented to target sites.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";

/// Service-side render timeout, milliseconds.
const SERVICE_TIMEOUT_MS: u64 = 60_000;

/// Timeout for the local direct fetch.
const LOCAL_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Tags the scraping service is asked to drop.
const DEFAULT_EXCLUDE_TAGS: [&str; 5] = ["nav", "footer", "aside", "script", "style"];

/// Subtrees the local extractor skips entirely.
const STRIP_TAGS: [&str; 8] = [
    "script", "style", "nav", "footer", "header", "iframe", "aside", "noscript",
];

/// Class tokens that mark advertising chrome.
const AD_TERMS: [&str; 7] = [
    "ad",
    "ads",
    "advertisement",
    "banner",
    "promo",
    "sidebar",
    "tracking",
];

/// Images at or below this square size are assumed to be tracking pixels.
const MIN_IMAGE_DIMENSION: u32 = 50;

lazy_static! {
    static ref RE_CONTENT_HINT: Regex = Regex::new(r"(?i)content|main|article").unwrap();
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("scrape service returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("failed to decode service response (HTTP {0})")]
    Decode(u16),
    #[error("scrape service reported failure: {0}")]
    Service(String),
    #[error("scrape service reported success but no data payload")]
    MissingData,
    #[error("invalid URL: {0}")]
    BadUrl(#[from] url::ParseError),
}

impl FetchError {
    /// Timeouts and connection errors are worth retrying; anything the
    /// service actually answered is not.
    fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }
}

/// Requested output flavour from the scraping service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Markdown,
    Html,
}

/// Fully-enumerated scrape request. Immutable per call.
#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    pub url: String,
    pub formats: Vec<OutputFormat>,
    pub only_main_content: bool,
    pub remove_base64_images: bool,
    pub exclude_tags: Vec<String>,
    pub include_tags: Vec<String>,
    /// Extra render wait on the service side, milliseconds.
    pub wait_for: Option<u64>,
    /// Request the mobile viewport rendering.
    pub mobile: Option<bool>,
    /// Run cookie-consent automation before scraping.
    pub bypass_cookies: bool,
}

impl ScrapeRequest {
    /// Defaults matching the pipeline's needs: both formats, main content
    /// only, navigation chrome excluded.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            formats: vec![OutputFormat::Markdown, OutputFormat::Html],
            only_main_content: true,
            remove_base64_images: true,
            exclude_tags: DEFAULT_EXCLUDE_TAGS.iter().map(|t| t.to_string()).collect(),
            include_tags: Vec::new(),
            wait_for: None,
            mobile: None,
            bypass_cookies: false,
        }
    }
}

/// Headers forwarded by the service to the target site.
#[derive(Debug, Serialize)]
struct TargetHeaders {
    #[serde(rename = "User-Agent")]
    user_agent: &'static str,
    #[serde(rename = "Cookie", skip_serializing_if = "Option::is_none")]
    cookie: Option<String>,
}

/// Wire shape of the `POST /scrape` body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScrapeRequestBody<'a> {
    url: &'a str,
    formats: &'a [OutputFormat],
    only_main_content: bool,
    remove_base64_images: bool,
    headers: TargetHeaders,
    exclude_tags: &'a [String],
    include_tags: &'a [String],
    timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    wait_for: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mobile: Option<bool>,
}

/// Page metadata returned by a scrape.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScrapeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Successful scrape payload.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScrapeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default)]
    pub metadata: ScrapeMetadata,
}

/// Tagged outcome of a scrape.
#[derive(Debug, Clone)]
pub enum ScrapeResult {
    Success(ScrapeData),
    Failure {
        error: String,
        details: Option<serde_json::Value>,
    },
}

#[derive(Debug, Deserialize)]
struct ServiceResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<ScrapeData>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    details: Option<serde_json::Value>,
}

/// Client for the remote scraping service with a local degraded fallback.
pub struct Fetcher {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            policy: RetryPolicy::default(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        Self::new(
            config.scrape.base_url.clone(),
            config.api.firecrawl_key.clone(),
            Duration::from_secs(config.scrape.timeout_secs),
        )
    }

    /// Scrape a page, degrading to the local extractor when the remote
    /// service is unavailable or unhappy.
    pub async fn scrape(
        &self,
        request: &ScrapeRequest,
        cookie_header: Option<String>,
    ) -> ScrapeResult {
        if let Err(err) = Url::parse(&request.url) {
            return ScrapeResult::Failure {
                error: format!("invalid URL {}: {}", request.url, err),
                details: None,
            };
        }

        if let Some(api_key) = self.api_key.clone() {
            match self
                .policy
                .run(
                    || self.scrape_remote(request, &api_key, cookie_header.clone()),
                    FetchError::is_transient,
                )
                .await
            {
                Ok(data) => {
                    tracing::info!(url = %request.url, "remote scrape succeeded");
                    return ScrapeResult::Success(data);
                }
                Err(err) => {
                    tracing::warn!(url = %request.url, error = %err, "remote scrape failed, using local fallback");
                }
            }
        } else {
            tracing::warn!(url = %request.url, "no scrape service key configured, using local fallback");
        }

        ScrapeResult::Success(self.scrape_local(&request.url).await)
    }

    async fn scrape_remote(
        &self,
        request: &ScrapeRequest,
        api_key: &str,
        cookie_header: Option<String>,
    ) -> Result<ScrapeData, FetchError> {
        let body = ScrapeRequestBody {
            url: &request.url,
            formats: &request.formats,
            only_main_content: request.only_main_content,
            remove_base64_images: request.remove_base64_images,
            headers: TargetHeaders {
                user_agent: DEFAULT_USER_AGENT,
                cookie: cookie_header,
            },
            exclude_tags: &request.exclude_tags,
            include_tags: &request.include_tags,
            timeout: SERVICE_TIMEOUT_MS,
            wait_for: request.wait_for,
            mobile: request.mobile,
        };

        let response = self
            .client
            .post(format!("{}/scrape", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let raw = response.text().await?;

        let parsed: ServiceResponse = match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(_) => {
                // An error status with an unreadable body is still an error
                // status; report it as such.
                if !status.is_success() {
                    return Err(FetchError::Status {
                        status: status.as_u16(),
                        message: truncate(&raw, 200),
                    });
                }
                return Err(FetchError::Decode(status.as_u16()));
            }
        };

        if !status.is_success() {
            let message = parsed
                .error
                .unwrap_or_else(|| truncate(&raw, 200));
            return Err(FetchError::Status {
                status: status.as_u16(),
                message,
            });
        }

        if !parsed.success {
            let mut message = parsed
                .error
                .unwrap_or_else(|| format!("unknown API error (HTTP {})", status.as_u16()));
            if let Some(details) = parsed.details {
                message = format!("{}: {}", message, details);
            }
            return Err(FetchError::Service(message));
        }

        parsed.data.ok_or(FetchError::MissingData)
    }

    /// Best-effort direct fetch and parse. Always returns a payload; on total
    /// failure the markdown carries the error message instead.
    async fn scrape_local(&self, url: &str) -> ScrapeData {
        tracing::info!(url, "running local fallback scrape");
        match self.fetch_local_html(url).await {
            Ok(html) => {
                let base = Url::parse(url).ok();
                extract_local_page(&html, base.as_ref())
            }
            Err(err) => {
                tracing::error!(url, error = %err, "local fallback fetch failed");
                ScrapeData {
                    markdown: Some(format!("Unable to retrieve content: {}", err)),
                    html: None,
                    metadata: ScrapeMetadata {
                        title: Some("Content unavailable".to_string()),
                        extra: Default::default(),
                    },
                }
            }
        }
    }

    async fn fetch_local_html(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .timeout(LOCAL_FETCH_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                message: "direct fetch failed".to_string(),
            });
        }
        Ok(response.text().await?)
    }
}

fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

/// Parse fetched HTML into a best-effort `{title, html, markdown}` payload.
fn extract_local_page(html: &str, base: Option<&Url>) -> ScrapeData {
    let document = Html::parse_document(html);

    let title = extract_title(&document);
    let container = find_main_container(&document);

    let mut markdown = String::new();
    if let Some(container) = container {
        render_markdown(container, base, &mut markdown);
    }
    let markdown = markdown.trim().to_string();

    ScrapeData {
        markdown: Some(markdown),
        html: container.map(|c| c.html()),
        metadata: ScrapeMetadata {
            title,
            extra: Default::default(),
        },
    }
}

/// Page title from `<title>`, falling back to the first `<h1>`.
fn extract_title(document: &Html) -> Option<String> {
    for selector_str in ["title", "h1"] {
        let selector = Selector::parse(selector_str).unwrap();
        if let Some(element) = document.select(&selector).next() {
            let title: String = element.text().collect();
            let title = title.trim();
            if !title.is_empty() {
                return Some(title.to_string());
            }
        }
    }
    None
}

/// Main-content container priority: `<main>`, `<article>`, an element whose
/// id or class hints at content, then the document body.
fn find_main_container(document: &Html) -> Option<ElementRef<'_>> {
    for selector_str in ["main", "article"] {
        let selector = Selector::parse(selector_str).unwrap();
        if let Some(element) = document.select(&selector).next() {
            return Some(element);
        }
    }

    let hinted = Selector::parse("[id], [class]").unwrap();
    for element in document.select(&hinted) {
        let value = element.value();
        let id_hit = value.attr("id").is_some_and(|id| RE_CONTENT_HINT.is_match(id));
        let class_hit = value
            .attr("class")
            .is_some_and(|class| RE_CONTENT_HINT.is_match(class));
        if id_hit || class_hit {
            return Some(element);
        }
    }

    let body = Selector::parse("body").unwrap();
    document.select(&body).next()
}

fn is_stripped(name: &str) -> bool {
    STRIP_TAGS.contains(&name)
}

/// Class-token match against the ad-related term list.
fn is_ad_element(element: &scraper::node::Element) -> bool {
    element.attr("class").is_some_and(|class| {
        class.split_whitespace().any(|token| {
            let token = token.to_ascii_lowercase();
            AD_TERMS.iter().any(|term| {
                token == *term
                    || token.starts_with(&format!("{}-", term))
                    || token.ends_with(&format!("-{}", term))
            })
        })
    })
}

/// Synthesize simplified markdown from the DOM, skipping stripped and
/// ad-classed subtrees (ancestor matches prune the whole subtree).
fn render_markdown(element: ElementRef<'_>, base: Option<&Url>, out: &mut String) {
    let value = element.value();
    let name = value.name();

    if is_stripped(name) || is_ad_element(value) {
        return;
    }

    match name {
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level = name[1..].parse::<usize>().unwrap_or(1);
            let text = collapse_ws(&inline_text(element));
            if !text.is_empty() {
                push_block(out, &format!("{} {}", "#".repeat(level), text));
            }
        }
        "p" => {
            let text = collapse_ws(&inline_text(element));
            if !text.is_empty() {
                push_block(out, &text);
            }
        }
        "li" => {
            let text = collapse_ws(&inline_text(element));
            if !text.is_empty() {
                push_block(out, &format!("- {}", text));
            }
            // Nested lists render as further items.
            for child in element.children().filter_map(ElementRef::wrap) {
                if matches!(child.value().name(), "ul" | "ol") {
                    render_markdown(child, base, out);
                }
            }
        }
        "img" => {
            if let Some(image) = image_markdown(element, base) {
                push_block(out, &image);
            }
        }
        _ => {
            for child in element.children().filter_map(ElementRef::wrap) {
                render_markdown(child, base, out);
            }
        }
    }
}

/// `![alt](src)` for meaningful images only: alt text present, not a tracking
/// pixel, relative src rewritten against the page URL.
fn image_markdown(element: ElementRef<'_>, base: Option<&Url>) -> Option<String> {
    let value = element.value();
    let src = value.attr("src")?;
    let alt = value.attr("alt").map(str::trim).unwrap_or_default();
    if alt.is_empty() {
        return None;
    }

    let width = value.attr("width").and_then(|w| w.parse::<u32>().ok());
    let height = value.attr("height").and_then(|h| h.parse::<u32>().ok());
    if let (Some(width), Some(height)) = (width, height) {
        if width <= MIN_IMAGE_DIMENSION && height <= MIN_IMAGE_DIMENSION {
            return None;
        }
    }

    let resolved = match base {
        Some(base) => base.join(src).map(String::from).unwrap_or_else(|_| src.to_string()),
        None => src.to_string(),
    };
    Some(format!("![{}]({})", alt, resolved))
}

/// Text of an element excluding nested block containers and stripped tags.
fn inline_text(element: ElementRef<'_>) -> String {
    let mut text = String::new();
    for node in element.children() {
        if let Some(child) = ElementRef::wrap(node) {
            let name = child.value().name();
            if is_stripped(name)
                || is_ad_element(child.value())
                || matches!(name, "ul" | "ol" | "div" | "p" | "table" | "section" | "img")
            {
                continue;
            }
            text.push_str(&inline_text(child));
        } else if let Some(fragment) = node.value().as_text() {
            text.push_str(fragment);
        }
    }
    text
}

fn collapse_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn push_block(out: &mut String, block: &str) {
    if !out.is_empty() {
        out.push_str("\n\n");
    }
    out.push_str(block);
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::net::SocketAddr;

    const PAGE: &str = r#"
<html>
  <head><title>Fixture Page</title></head>
  <body>
    <nav><a href="/home">Home</a></nav>
    <main>
      <h1>Fixture Page</h1>
      <p>First paragraph with enough words to matter.</p>
      <img src="/images/hero.png" alt="Hero shot" width="800" height="600">
      <img src="/pixel.gif" alt="pixel" width="1" height="1">
      <div class="ad-banner"><img src="/ads/spot.png" alt="Buy now"></div>
      <ul><li>alpha</li><li>beta</li></ul>
      <p></p>
    </main>
    <footer>Footer junk</footer>
  </body>
</html>
"#;

    #[test]
    fn local_extraction_synthesizes_markdown() {
        let base = Url::parse("https://example.com/article").unwrap();
        let data = extract_local_page(PAGE, Some(&base));

        assert_eq!(data.metadata.title.as_deref(), Some("Fixture Page"));
        let markdown = data.markdown.unwrap();
        assert!(markdown.contains("# Fixture Page"));
        assert!(markdown.contains("First paragraph with enough words to matter."));
        assert!(markdown.contains("![Hero shot](https://example.com/images/hero.png)"));
        assert!(markdown.contains("- alpha"));
        assert!(markdown.contains("- beta"));
        // Tracking pixel and ad-classed image are dropped.
        assert!(!markdown.contains("pixel.gif"));
        assert!(!markdown.contains("Buy now"));
        assert!(!markdown.contains("Footer junk"));
        assert!(!markdown.contains("Home"));
    }

    #[test]
    fn container_priority_falls_back_to_content_class() {
        let html = r#"<html><body>
            <div class="wrapper"><div class="article-content"><p>Body text here.</p></div></div>
        </body></html>"#;
        let data = extract_local_page(html, None);
        assert!(data.markdown.unwrap().contains("Body text here."));
    }

    #[test]
    fn request_body_serializes_camel_case() {
        let request = ScrapeRequest::for_url("https://example.com");
        let body = ScrapeRequestBody {
            url: &request.url,
            formats: &request.formats,
            only_main_content: request.only_main_content,
            remove_base64_images: request.remove_base64_images,
            headers: TargetHeaders {
                user_agent: DEFAULT_USER_AGENT,
                cookie: None,
            },
            exclude_tags: &request.exclude_tags,
            include_tags: &request.include_tags,
            timeout: SERVICE_TIMEOUT_MS,
            wait_for: request.wait_for,
            mobile: request.mobile,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["onlyMainContent"], serde_json::json!(true));
        assert_eq!(value["formats"], serde_json::json!(["markdown", "html"]));
        assert_eq!(
            value["excludeTags"],
            serde_json::json!(["nav", "footer", "aside", "script", "style"])
        );
        assert_eq!(value["headers"]["User-Agent"], serde_json::json!(DEFAULT_USER_AGENT));
        assert!(value.get("waitFor").is_none());
    }

    async fn spawn_server(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn remote_success_returns_service_payload() {
        let router = Router::new().route(
            "/scrape",
            post(|| async {
                Json(serde_json::json!({
                    "success": true,
                    "data": {
                        "markdown": "# Remote",
                        "metadata": { "title": "Remote Title" }
                    }
                }))
            }),
        );
        let addr = spawn_server(router).await;

        let fetcher = Fetcher::new(
            format!("http://{}", addr),
            Some("test-key".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();

        let request = ScrapeRequest::for_url("https://example.com/article");
        match fetcher.scrape(&request, None).await {
            ScrapeResult::Success(data) => {
                assert_eq!(data.markdown.as_deref(), Some("# Remote"));
                assert_eq!(data.metadata.title.as_deref(), Some("Remote Title"));
            }
            ScrapeResult::Failure { error, .. } => panic!("unexpected failure: {error}"),
        }
    }

    #[tokio::test]
    async fn remote_server_error_triggers_local_fallback() {
        let router = Router::new().route(
            "/scrape",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let addr = spawn_server(router).await;

        let fetcher = Fetcher::new(
            format!("http://{}", addr),
            Some("test-key".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();

        // The target page is unreachable too; the fallback must still return
        // a placeholder payload instead of raising.
        let request = ScrapeRequest::for_url("http://127.0.0.1:9/unreachable");
        match fetcher.scrape(&request, None).await {
            ScrapeResult::Success(data) => {
                assert!(data.metadata.title.is_some());
                let markdown = data.markdown.unwrap();
                assert!(markdown.contains("Unable to retrieve content"));
            }
            ScrapeResult::Failure { error, .. } => panic!("unexpected failure: {error}"),
        }
    }

    #[tokio::test]
    async fn invalid_url_is_a_tagged_failure() {
        let fetcher = Fetcher::new("http://localhost:1", None, Duration::from_secs(1)).unwrap();
        let request = ScrapeRequest::for_url("not a url");
        match fetcher.scrape(&request, None).await {
            ScrapeResult::Failure { error, .. } => assert!(error.contains("invalid URL")),
            ScrapeResult::Success(_) => panic!("expected failure"),
        }
    }
}
