// ██╗███╗   ██╗███████╗██╗██████╗ ███████╗██████╗
// ██║████╗  ██║██╔════╝██║██╔══██╗██╔════╝██╔══██╗
// ██║██╔██╗ ██║███████╗██║██║  ██║█████╗  ██████╔╝
// ██║██║╚██╗██║╚════██║██║██║  ██║██╔══╝  ██╔══██╗
// ██║██║ ╚████║███████║██║██████╔╝███████╗██║  ██║
// ╚═╝╚═╝  ╚═══╝╚══════╝╚═╝╚═════╝ ╚══════╝╚═╝  ╚═╝
//
// W A T C H
//
// Polls the SEC ownership pages for a handful of tickers and prints every
// scraped report as one JSON line on stdout. Logs go to stderr.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use insider_watch::{
    CikResolver, Config, Endpoints, HttpPageFetcher, ScrapeFailure, ScrapeManager, ScrapedReport,
    WorkTracker,
};

fn print_banner() {
    let banner = r#"
    ╔══════════════════════════════════════════════════════╗
    ║                                                      ║
    ║              I N S I D E R   W A T C H               ║
    ║                                                      ║
    ║   Source:     SEC EDGAR ownership disclosures        ║
    ║   Output:     one JSON report per ticker per tick    ║
    ║   Resilience: retry with backoff + circuit breaker   ║
    ║                                                      ║
    ╚══════════════════════════════════════════════════════╝
    "#;
    eprintln!("{}", banner);
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    print_banner();

    let config = Config::from_env();
    info!(
        base_url = config.base_url.as_str(),
        tickers = ?config.tickers,
        poll_interval_secs = config.poll_interval.as_secs(),
        "✅ Configuration loaded"
    );

    let fetcher = Arc::new(HttpPageFetcher::new(&config).context("failed to build HTTP client")?);
    let endpoints = Endpoints::from_config(&config);
    let listing_url = endpoints
        .ticker_listing_url()
        .context("ticker listing URL is invalid")?;

    // Build the ticker directory once, up front. If the SEC is unreachable
    // right now the loops will try again on their first tick.
    let resolver = CikResolver::new(listing_url);
    match resolver.preload(fetcher.as_ref()).await {
        Ok(directory) => info!(tickers = directory.len(), "✅ Ticker directory loaded"),
        Err(e) => warn!(error = %e, "Ticker directory unavailable, deferring to first tick"),
    }

    let (report_tx, mut report_rx) = mpsc::channel::<ScrapedReport>(config.report_buffer);
    let (failure_tx, mut failure_rx) = mpsc::unbounded_channel::<ScrapeFailure>();

    let manager = ScrapeManager::new(
        &config,
        fetcher.clone(),
        resolver,
        report_tx,
        Some(failure_tx),
    );
    let tracker = WorkTracker::new();

    // ═══════════════════════════════════════════
    // CONSUMERS
    // ═══════════════════════════════════════════
    let consumer_handle = tokio::spawn(async move {
        while let Some(report) = report_rx.recv().await {
            info!("📄 {}", report);
            match serde_json::to_string(&report) {
                Ok(line) => println!("{line}"),
                Err(e) => error!(ticker = report.ticker.as_str(), error = %e, "Failed to serialize report"),
            }
        }
    });

    let failure_handle = tokio::spawn(async move {
        while let Some(failure) = failure_rx.recv().await {
            error!(
                ticker = failure.ticker.as_str(),
                attempts = failure.attempts,
                error = failure.error.as_str(),
                "❌ Ticker dropped from monitoring"
            );
        }
    });

    // ═══════════════════════════════════════════
    // TICKERS
    // ═══════════════════════════════════════════
    for ticker in &config.tickers {
        match manager.add_ticker(ticker.clone(), &tracker) {
            Ok(()) => info!(ticker = ticker.as_str(), "📡 Monitoring"),
            Err(e) => warn!(ticker = ticker.as_str(), error = %e, "Not monitoring"),
        }
    }

    info!(
        tickers = manager.managed_tickers().len(),
        "🟢 Insider watch running, press Ctrl+C to stop"
    );

    if let Err(err) = signal::ctrl_c().await {
        error!(error = %err, "Signal listener error");
    }
    warn!("🛑 Shutdown signal received");

    manager.cancel_all();
    if !tracker.wait_timeout(Duration::from_secs(10)).await {
        warn!(
            outstanding = tracker.outstanding(),
            "Some scraping loops did not stop in time"
        );
    }

    match serde_json::to_string(&manager.metrics()) {
        Ok(snapshot) => info!(metrics = snapshot.as_str(), "📊 Final metrics"),
        Err(e) => warn!(error = %e, "Failed to serialize metrics"),
    }

    // The manager holds the last report and failure senders; dropping it lets
    // the consumers drain and finish.
    drop(manager);
    let _ = tokio::time::timeout(Duration::from_secs(2), async {
        let _ = tokio::join!(consumer_handle, failure_handle);
    })
    .await;

    info!("💤 Insider watch offline");
    Ok(())
}
