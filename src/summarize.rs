//! Summarisation: generative model when a credential is configured,
//! graph-based extractive ranking otherwise.
//!
//! The generative path speaks a strict output protocol: markdown sections, a
//! literal `---KEYPOINTS---` separator line, then bulleted key points. A
//! response without the separator degrades to an empty key-point list rather
//! than failing.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::config::Config;
use crate::retry::RetryPolicy;

/// Input ceiling before prompting; longer content is truncated.
const MAX_INPUT_CHARS: usize = 30_000;
/// Marker appended when input was truncated.
const TRUNCATION_MARKER: &str = "...";
/// Literal line separating prose summary from key points.
pub const KEYPOINTS_SEPARATOR: &str = "---KEYPOINTS---";
/// Average adult reading speed used for the estimate.
const WORDS_PER_MINUTE: f64 = 230.0;

/// Extractive fallback parameters.
const TARGET_SENTENCES: usize = 5;
const PAGERANK_DAMPING: f64 = 0.85;
const PAGERANK_ITERATIONS: usize = 100;
const PAGERANK_EPSILON: f64 = 1e-6;

const STOP_WORDS: [&str; 42] = [
    "a", "an", "the", "and", "or", "but", "if", "then", "than", "so", "of", "to", "in", "on",
    "for", "with", "at", "by", "from", "as", "is", "are", "was", "were", "be", "been", "being",
    "it", "its", "this", "that", "these", "those", "he", "she", "they", "we", "you", "i", "not",
    "no", "do",
];

#[derive(Error, Debug)]
pub enum SummarizeError {
    #[error("model request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("model returned HTTP {status}: {message}")]
    Provider { status: u16, message: String },
    #[error("model response contained no text")]
    EmptyResponse,
}

impl SummarizeError {
    /// Deadline-exceeded, unavailable and resource-exhausted signals are
    /// transient; everything else is fatal.
    fn is_transient(&self) -> bool {
        match self {
            SummarizeError::Transport(err) => err.is_timeout() || err.is_connect(),
            SummarizeError::Provider { status, .. } => matches!(status, 429 | 503 | 504),
            SummarizeError::EmptyResponse => false,
        }
    }
}

/// Summary produced for one page. Immutable once built.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryResult {
    /// Markdown-formatted prose summary.
    pub summary: String,
    /// Ordered key takeaways; empty on the extractive path.
    pub key_points: Vec<String>,
    /// Whitespace-token count of the summary text.
    pub word_count: usize,
    /// Estimated reading time in minutes.
    pub reading_time: u32,
}

impl SummaryResult {
    fn new(summary: String, key_points: Vec<String>) -> Self {
        let word_count = summary.split_whitespace().count();
        let reading_time = (word_count as f64 / WORDS_PER_MINUTE).round() as u32;
        Self {
            summary,
            key_points,
            word_count,
            reading_time,
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

/// Minimal client for the generative-language REST API. Single-turn
/// prompt-in/text-out, no streaming.
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    generation: GenerationConfig,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, max_output_tokens: u32) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            generation: GenerationConfig {
                temperature: 0.2,
                top_p: 0.95,
                top_k: 40,
                max_output_tokens,
            },
        }
    }

    /// Point the client at a different endpoint (used by tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn generate(&self, prompt: &str) -> Result<String, SummarizeError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let body = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config: self.generation.clone(),
        };

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<serde_json::Value>(&raw)
                .ok()
                .and_then(|v| {
                    v.pointer("/error/message")
                        .and_then(|m| m.as_str())
                        .map(String::from)
                })
                .unwrap_or_else(|| raw.chars().take(200).collect());
            return Err(SummarizeError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateResponse = response.json().await?;
        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(SummarizeError::EmptyResponse);
        }
        Ok(text)
    }
}

/// Produces summaries, preferring the generative model and falling back to
/// extractive ranking when no credential is configured.
pub struct Summarizer {
    client: Option<GeminiClient>,
    policy: RetryPolicy,
}

impl Summarizer {
    pub fn new(client: Option<GeminiClient>) -> Self {
        Self {
            client,
            policy: RetryPolicy::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let client = config.api.gemini_key.as_ref().map(|key| {
            GeminiClient::new(
                key.clone(),
                config.summarizer.model.clone(),
                config.summarizer.max_output_tokens,
            )
        });
        Self::new(client)
    }

    pub async fn summarize(
        &self,
        text: &str,
        title: Option<&str>,
    ) -> Result<SummaryResult, SummarizeError> {
        let content = truncate_input(text);

        match &self.client {
            Some(client) => {
                let prompt = build_prompt(&content, title);
                tracing::info!(chars = content.len(), "requesting generative summary");
                let raw = self
                    .policy
                    .run(|| client.generate(&prompt), SummarizeError::is_transient)
                    .await?;
                let (summary, key_points) = parse_summary_response(&raw);
                Ok(SummaryResult::new(summary, key_points))
            }
            None => {
                tracing::info!(chars = content.len(), "no model credential, using extractive fallback");
                let summary = extractive_summary(&content);
                Ok(SummaryResult::new(summary, Vec::new()))
            }
        }
    }
}

fn truncate_input(text: &str) -> String {
    if text.chars().count() <= MAX_INPUT_CHARS {
        return text.to_string();
    }
    tracing::info!(
        chars = text.chars().count(),
        limit = MAX_INPUT_CHARS,
        "truncating summarizer input"
    );
    let mut truncated: String = text.chars().take(MAX_INPUT_CHARS).collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

fn build_prompt(content: &str, title: Option<&str>) -> String {
    let title_clause = title
        .filter(|t| !t.trim().is_empty())
        .map(|t| format!(" titled \"{}\"", t))
        .unwrap_or_default();

    format!(
        r#"You are an AI assistant that creates high-quality, comprehensive summaries of web pages.

Here is the content from a webpage{title_clause}:

{content}

Please respond with exactly this structure:

1. A well-structured summary of the content in 2 to 4 markdown sections, each introduced by a level-2 heading (##). Highlight the main points, key information, and conclusions.

2. A line containing only the literal text {KEYPOINTS_SEPARATOR}

3. After that line, 3 to 5 bullet points with the most important takeaways. Each bullet point must be concise and start with "*" or "-".
"#
    )
}

/// Split a model response on the separator protocol.
///
/// Missing separator is a format-contract violation, not an error: the whole
/// response becomes the summary and the key-point list is empty.
pub fn parse_summary_response(raw: &str) -> (String, Vec<String>) {
    match raw.split_once(KEYPOINTS_SEPARATOR) {
        Some((summary, rest)) => {
            let key_points = rest
                .lines()
                .filter_map(|line| {
                    let trimmed = line.trim();
                    let stripped = trimmed
                        .strip_prefix('*')
                        .or_else(|| trimmed.strip_prefix('-'))?;
                    let point = stripped.trim();
                    (!point.is_empty()).then(|| point.to_string())
                })
                .collect();
            (summary.trim().to_string(), key_points)
        }
        None => {
            tracing::warn!("model response missing key-points separator");
            (raw.trim().to_string(), Vec::new())
        }
    }
}

/// Sentence tokenizer: break after `.`/`!`/`?` followed by whitespace.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut at_boundary = false;

    for ch in text.chars() {
        if at_boundary && ch.is_whitespace() {
            let sentence = current.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            current.clear();
            at_boundary = false;
            continue;
        }
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            at_boundary = true;
        } else if !ch.is_whitespace() {
            at_boundary = false;
        }
    }
    let sentence = current.trim();
    if !sentence.is_empty() {
        sentences.push(sentence.to_string());
    }
    sentences
}

fn word_frequencies(sentence: &str) -> HashMap<String, f64> {
    let mut freqs = HashMap::new();
    for word in sentence
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let word = word.to_lowercase();
        if STOP_WORDS.contains(&word.as_str()) {
            continue;
        }
        *freqs.entry(word).or_insert(0.0) += 1.0;
    }
    freqs
}

fn cosine_similarity(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    let dot: f64 = a
        .iter()
        .filter_map(|(word, weight)| b.get(word).map(|other| weight * other))
        .sum();
    let norm_a: f64 = a.values().map(|w| w * w).sum::<f64>().sqrt();
    let norm_b: f64 = b.values().map(|w| w * w).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// PageRank-style centrality over the sentence-similarity graph.
fn rank_sentences(similarity: &[Vec<f64>]) -> Vec<f64> {
    let n = similarity.len();
    let uniform = 1.0 / n as f64;
    let mut scores = vec![uniform; n];
    let row_sums: Vec<f64> = similarity.iter().map(|row| row.iter().sum()).collect();

    for _ in 0..PAGERANK_ITERATIONS {
        let mut next = vec![(1.0 - PAGERANK_DAMPING) * uniform; n];
        for j in 0..n {
            if row_sums[j] == 0.0 {
                continue;
            }
            for i in 0..n {
                if similarity[j][i] > 0.0 {
                    next[i] += PAGERANK_DAMPING * scores[j] * similarity[j][i] / row_sums[j];
                }
            }
        }
        let delta: f64 = scores
            .iter()
            .zip(&next)
            .map(|(old, new)| (old - new).abs())
            .sum();
        scores = next;
        if delta < PAGERANK_EPSILON {
            break;
        }
    }
    scores
}

/// Pick the top-ranked sentences and restore their source order.
fn select_sentences(sentences: &[String], target: usize) -> Vec<String> {
    if sentences.len() <= target {
        return sentences.to_vec();
    }

    let frequencies: Vec<_> = sentences.iter().map(|s| word_frequencies(s)).collect();
    let n = sentences.len();
    let mut similarity = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..n {
            if i != j {
                similarity[i][j] = cosine_similarity(&frequencies[i], &frequencies[j]);
            }
        }
    }

    let scores = rank_sentences(&similarity);
    let mut ranked: Vec<usize> = (0..n).collect();
    ranked.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap_or(std::cmp::Ordering::Equal));

    let mut selected: Vec<usize> = ranked.into_iter().take(target).collect();
    selected.sort_unstable();
    selected.into_iter().map(|i| sentences[i].clone()).collect()
}

/// Extractive summary: the most central sentences, in source order.
fn extractive_summary(text: &str) -> String {
    let sentences = split_sentences(text);
    if sentences.is_empty() {
        return String::new();
    }
    select_sentences(&sentences, TARGET_SENTENCES).join(" ")
}
