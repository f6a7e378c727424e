//! # Pagelens
//!
//! A webpage-to-summary pipeline serving a browser extension.
//!
//! ## Features
//!
//! - **Resilient Fetching**: Remote scraping service with retries, degrading to a local extractor
//! - **Consent Automation**: Headless-browser cookie-banner handling with cookie replay
//! - **Dual Summarisation**: Generative model when configured, extractive ranking otherwise

pub mod config;
pub mod consent;
pub mod fetcher;
pub mod normalize;
pub mod pipeline;
pub mod retry;
pub mod server;
pub mod summarize;

pub use config::Config;
pub use pipeline::{PageProcessor, PipelineResult};
