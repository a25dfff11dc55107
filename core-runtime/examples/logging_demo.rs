//! Logging system demonstration
//!
//! Run with:
//! ```bash
//! # Compact format (default)
//! cargo run --example logging_demo
//!
//! # JSON format
//! cargo run --example logging_demo -- json
//!
//! # With custom filter
//! cargo run --example logging_demo -- pretty "core_runtime=trace"
//! ```

use core_runtime::logging::{init_logging, LogFormat, LogLevel, LoggingConfig};
use std::env;
use tracing::{debug, info, instrument, span, trace, warn, Level};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    let format = match args.get(1).map(String::as_str) {
        Some("json") => LogFormat::Json,
        Some("pretty") => LogFormat::Pretty,
        _ => LogFormat::Compact,
    };

    let mut config = LoggingConfig::default()
        .with_format(format)
        .with_level(LogLevel::Trace);
    if let Some(filter) = args.get(2) {
        config = config.with_filter(filter.clone());
    }

    init_logging(config).expect("Failed to initialize logging");

    info!(format = ?format, "Logging initialized");

    demo_structured_logging();
    demo_spans().await;

    info!("Demo complete");
}

fn demo_structured_logging() {
    let span = span!(Level::INFO, "structured_logging");
    let _enter = span.enter();

    trace!("This is a TRACE level log");
    debug!("This is a DEBUG level log");
    warn!("This is a WARN level log");

    info!(
        run_id = "run-42",
        upserted = 150,
        deleted = 3,
        "Resync pass summary"
    );
}

async fn demo_spans() {
    let span = span!(Level::INFO, "resync_pass", kind = "repository");
    let _enter = span.enter();

    info!("Starting resync pass");
    fetch_pages(3).await;
    info!(entities = 150, "Resync pass completed");
}

#[instrument]
async fn fetch_pages(pages: u32) {
    for page in 0..pages {
        trace!(page, "Fetched page");
        tokio::time::sleep(tokio::time::Duration::from_millis(5)).await;
    }
    debug!(pages, "Pagination finished");
}
