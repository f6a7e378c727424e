//! Pagelens CLI - webpage summarisation service
//!
//! The application logic is contained in lib.rs, and this file is responsible
//! for parsing arguments and handling top-level errors.

use clap::{Parser, Subcommand};
use pagelens::fetcher::{Fetcher, ScrapeRequest, ScrapeResult};
use pagelens::pipeline::clean_scraped;
use pagelens::{server, Config, PageProcessor, PipelineResult};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pagelens")]
#[command(author, version, about = "Webpage summarisation service for the browser extension", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API server (the default)
    Serve,
    /// Process a single URL and print the result
    Process {
        /// URL to process
        url: String,
        /// Show the cleaned text instead of the summary
        #[arg(long)]
        raw: bool,
        /// Run cookie-consent automation before scraping
        #[arg(long)]
        bypass_cookies: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        None | Some(Commands::Serve) => server::serve(config).await?,
        Some(Commands::Process {
            url,
            raw,
            bypass_cookies,
        }) => {
            if raw {
                // Full fetch and clean, skipping only summarisation, so the
                // output matches what the summarize path would see.
                let fetcher = Fetcher::from_config(&config)?;
                let request = ScrapeRequest::for_url(&url);
                let data = match fetcher.scrape(&request, None).await {
                    ScrapeResult::Success(data) => data,
                    ScrapeResult::Failure { error, .. } => {
                        eprintln!("Processing failed: {}", error);
                        std::process::exit(1);
                    }
                };
                match clean_scraped(&data, config.summarizer.cleaning) {
                    Some(cleaned) if !cleaned.is_empty() => println!("{}", cleaned.text),
                    _ => {
                        eprintln!("Processing failed: no content retrieved for {}", url);
                        std::process::exit(1);
                    }
                }
            } else {
                let processor = PageProcessor::from_config(&config)?;
                let mut request = ScrapeRequest::for_url(&url);
                request.bypass_cookies = bypass_cookies;
                let result = processor.process_request(&request).await;

                match &result {
                    PipelineResult::Success(summary) => {
                        println!("=== {} ===\n", summary.title);
                        println!("{}\n", summary.summary);
                        if !summary.key_points.is_empty() {
                            println!("Key Points:");
                            for point in &summary.key_points {
                                println!("  - {}", point);
                            }
                            println!();
                        }
                        println!(
                            "{} words, about {} min read",
                            summary.word_count, summary.reading_time
                        );
                    }
                    PipelineResult::Failure(failure) => {
                        eprintln!("Processing failed: {}", failure.error);
                        std::process::exit(1);
                    }
                }

                processor.shutdown().await;
            }
        }
    }

    Ok(())
}
