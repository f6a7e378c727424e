//! End-to-end page processing: consent, fetch, normalize, summarize.
//!
//! The processor never returns an error to the caller; every outcome is one
//! of the two response envelopes so the HTTP layer can serialise it directly.

use serde::Serialize;
use std::sync::Arc;

use crate::config::Config;
use crate::consent::ConsentAutomator;
use crate::fetcher::{FetchError, Fetcher, ScrapeData, ScrapeRequest, ScrapeResult};
use crate::normalize::{normalize, CleanedContent, CleaningLevel, RawFormat};
use crate::summarize::Summarizer;

/// Clean whichever raw representation a scrape produced, preferring markdown
/// over HTML. `None` when the payload holds no content at all.
pub fn clean_scraped(data: &ScrapeData, level: CleaningLevel) -> Option<CleanedContent> {
    let (raw, format) = match (&data.markdown, &data.html) {
        (Some(markdown), _) if !markdown.trim().is_empty() => {
            (markdown.as_str(), RawFormat::Markdown)
        }
        (_, Some(html)) if !html.trim().is_empty() => (html.as_str(), RawFormat::Html),
        _ => return None,
    };
    Some(normalize(raw, format, level))
}

/// Successful processing envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSummary {
    pub success: bool,
    pub url: String,
    pub title: String,
    pub summary: String,
    pub key_points: Vec<String>,
    pub word_count: usize,
    pub reading_time: u32,
    /// The cleaned text the summary was produced from.
    pub content: String,
}

/// Failure envelope; carries only the error message.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineFailure {
    pub success: bool,
    pub error: String,
}

/// Terminal outcome of one processing run.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PipelineResult {
    Success(PageSummary),
    Failure(PipelineFailure),
}

impl PipelineResult {
    pub fn failure(error: impl Into<String>) -> Self {
        PipelineResult::Failure(PipelineFailure {
            success: false,
            error: error.into(),
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PipelineResult::Success(_))
    }
}

/// Orchestrates the full webpage-to-summary pipeline.
pub struct PageProcessor {
    fetcher: Fetcher,
    summarizer: Summarizer,
    consent: Arc<ConsentAutomator>,
    cleaning: CleaningLevel,
}

impl PageProcessor {
    pub fn new(
        fetcher: Fetcher,
        summarizer: Summarizer,
        consent: Arc<ConsentAutomator>,
        cleaning: CleaningLevel,
    ) -> Self {
        Self {
            fetcher,
            summarizer,
            consent,
            cleaning,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        Ok(Self::new(
            Fetcher::from_config(config)?,
            Summarizer::from_config(config),
            Arc::new(ConsentAutomator::new()),
            config.summarizer.cleaning,
        ))
    }

    /// Process a URL with default scrape options.
    pub async fn process(&self, url: &str) -> PipelineResult {
        self.process_request(&ScrapeRequest::for_url(url)).await
    }

    pub async fn process_request(&self, request: &ScrapeRequest) -> PipelineResult {
        tracing::info!(url = %request.url, "processing page");

        let cookie_header = if request.bypass_cookies {
            self.collect_cookies(&request.url).await
        } else {
            None
        };

        let data = match self.fetcher.scrape(request, cookie_header).await {
            ScrapeResult::Success(data) => data,
            ScrapeResult::Failure { error, .. } => {
                tracing::warn!(url = %request.url, error, "scrape failed");
                return PipelineResult::failure(error);
            }
        };

        self.summarize_scraped(&request.url, data).await
    }

    /// Consent automation is best-effort; failure to harvest cookies never
    /// blocks the scrape itself.
    async fn collect_cookies(&self, url: &str) -> Option<String> {
        match self.consent.accept_cookies(url).await {
            Ok(session) if !session.is_empty() => Some(session.header_value()),
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(url, error = %err, "cookie consent automation failed");
                None
            }
        }
    }

    async fn summarize_scraped(&self, url: &str, data: ScrapeData) -> PipelineResult {
        let cleaned = match clean_scraped(&data, self.cleaning) {
            Some(cleaned) if !cleaned.is_empty() => cleaned,
            Some(_) => {
                return PipelineResult::failure(format!(
                    "content empty after cleaning for {}",
                    url
                ))
            }
            None => return PipelineResult::failure(format!("no content retrieved for {}", url)),
        };

        let title = data
            .metadata
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| url.to_string());

        match self.summarizer.summarize(&cleaned.text, Some(&title)).await {
            Ok(result) => PipelineResult::Success(PageSummary {
                success: true,
                url: url.to_string(),
                title,
                summary: result.summary,
                key_points: result.key_points,
                word_count: result.word_count,
                reading_time: result.reading_time,
                content: cleaned.text,
            }),
            Err(err) => {
                tracing::error!(url, error = %err, "summarization failed");
                PipelineResult::failure(format!("summarization failed: {}", err))
            }
        }
    }

    /// Release the shared browser, if consent automation ever launched one.
    pub async fn shutdown(&self) {
        self.consent.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::ScrapeMetadata;
    use std::time::Duration;

    fn test_processor() -> PageProcessor {
        // The fetcher is never exercised by these tests; the port is a stub.
        let fetcher =
            Fetcher::new("http://127.0.0.1:1", None, Duration::from_secs(1)).unwrap();
        PageProcessor::new(
            fetcher,
            Summarizer::new(None),
            Arc::new(ConsentAutomator::new()),
            CleaningLevel::Standard,
        )
    }

    fn article_markdown() -> String {
        let mut body = String::from("# Glacier Retreat\n\n");
        body.push_str("![Aerial view](https://example.com/aerial.jpg)\n\n");
        for i in 0..20 {
            body.push_str(&format!(
                "Survey {} recorded measurable ice loss across the [monitored](https://example.com/m/{}) basins during the spring melt season. ",
                i, i
            ));
            body.push_str("Researchers compared the readings against the long-term archive and found the trend accelerating.\n\n");
        }
        body.push_str("![Chart](https://example.com/chart.png)\n\n");
        body.push_str("Field teams plan [another campaign](https://example.com/next) for the coming year.\n");
        body
    }

    #[tokio::test]
    async fn scraped_markdown_flows_through_to_a_summary() {
        let processor = test_processor();
        let data = ScrapeData {
            markdown: Some(article_markdown()),
            html: None,
            metadata: ScrapeMetadata {
                title: Some("Glacier Retreat".to_string()),
                extra: Default::default(),
            },
        };

        let result = processor
            .summarize_scraped("https://example.com/article", data)
            .await;

        let summary = match result {
            PipelineResult::Success(summary) => summary,
            PipelineResult::Failure(failure) => panic!("unexpected failure: {}", failure.error),
        };

        assert!(summary.success);
        assert_eq!(summary.title, "Glacier Retreat");
        assert_eq!(summary.url, "https://example.com/article");
        assert!(!summary.summary.is_empty());
        // Extractive path yields no key points.
        assert!(summary.key_points.is_empty());
        // Image syntax and link targets must not leak into the cleaned text.
        assert!(!summary.content.contains("!["));
        assert!(!summary.content.contains("https://example.com/m/"));
        assert!(summary.content.contains("monitored"));

        assert_eq!(
            summary.word_count,
            summary.summary.split_whitespace().count()
        );
        assert_eq!(
            summary.reading_time,
            (summary.word_count as f64 / 230.0).round() as u32
        );
    }

    #[test]
    fn cleaning_prefers_markdown_over_html() {
        let data = ScrapeData {
            markdown: Some("# From Markdown\n\nBody text.".to_string()),
            html: Some("<h1>From HTML</h1>".to_string()),
            metadata: ScrapeMetadata::default(),
        };
        let cleaned = clean_scraped(&data, CleaningLevel::Standard).unwrap();
        assert!(cleaned.text.contains("From Markdown"));
        assert!(!cleaned.text.contains("From HTML"));

        let html_only = ScrapeData {
            markdown: Some("   ".to_string()),
            html: Some("<h1>From HTML</h1>".to_string()),
            metadata: ScrapeMetadata::default(),
        };
        let cleaned = clean_scraped(&html_only, CleaningLevel::Standard).unwrap();
        assert!(cleaned.text.contains("From HTML"));

        assert!(clean_scraped(&ScrapeData::default(), CleaningLevel::Standard).is_none());
    }

    #[tokio::test]
    async fn missing_content_is_a_failure_envelope() {
        let processor = test_processor();
        let data = ScrapeData::default();
        let result = processor.summarize_scraped("https://example.com", data).await;
        match result {
            PipelineResult::Failure(failure) => {
                assert!(!failure.success);
                assert!(failure.error.contains("no content retrieved"));
            }
            PipelineResult::Success(_) => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn untitled_pages_fall_back_to_the_url() {
        let processor = test_processor();
        let data = ScrapeData {
            markdown: Some("A single useful paragraph about the topic at hand.".to_string()),
            html: None,
            metadata: ScrapeMetadata::default(),
        };
        let result = processor.summarize_scraped("https://example.com/x", data).await;
        match result {
            PipelineResult::Success(summary) => {
                assert_eq!(summary.title, "https://example.com/x")
            }
            PipelineResult::Failure(failure) => panic!("unexpected failure: {}", failure.error),
        }
    }

    #[test]
    fn envelopes_serialize_with_camel_case_keys() {
        let success = PipelineResult::Success(PageSummary {
            success: true,
            url: "https://example.com".to_string(),
            title: "T".to_string(),
            summary: "S".to_string(),
            key_points: vec!["k".to_string()],
            word_count: 1,
            reading_time: 0,
            content: "C".to_string(),
        });
        let value = serde_json::to_value(&success).unwrap();
        assert_eq!(value["success"], serde_json::json!(true));
        assert_eq!(value["keyPoints"], serde_json::json!(["k"]));
        assert_eq!(value["wordCount"], serde_json::json!(1));
        assert_eq!(value["readingTime"], serde_json::json!(0));

        let failure = PipelineResult::failure("boom");
        let value = serde_json::to_value(&failure).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"success": false, "error": "boom"})
        );
    }
}
