// =============================================================================
// scrape_manager.rs - ONE LOOP PER TICKER, AND A REGISTRY TO FIND THEM
// =============================================================================
//
// The manager owns a registry of monitored tickers. Adding a ticker spawns a
// tokio task that wakes up on a fixed interval and runs the pipeline:
//
//   resolve CIK ──► fetch disclosure page ──► parse table ──► emit report
//
// Each loop has its own watch channel for cancellation. Every await point in
// a tick (the fetch, the backoff sleep, the hand-off to the report stream)
// races against that channel, so a cancelled ticker stops promptly and never
// emits a report after it has seen the signal.
//
// The report stream is a bounded mpsc channel shared by all loops. A full
// stream stalls the loop that is trying to emit; nothing is ever dropped.
//
// Each loop owns its own circuit breaker, so one ticker's failures never
// slow down its siblings. An open breaker makes the next retry wait out the
// cooldown.
//
// Fetch failures are retried with backoff. When a loop finally gives up it
// removes its own registry entry and, unless running in silent mode, tells
// the failure sink so the caller can react.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::config::{Config, FailureMode};
use crate::error::ScrapeError;
use crate::metrics::{MetricsSnapshot, ScrapeMetrics};
use crate::models::{Cik, ScrapeFailure, ScrapedReport, Ticker};
use crate::retry::RetryConfig;
use crate::scrapers::cik_directory::CikResolver;
use crate::scrapers::fetcher::{Endpoints, PageSource};
use crate::scrapers::transaction_table::TransactionTableParser;
use crate::tracker::{WorkTracker, WorkUnit};

struct ManagedEntry {
    cancel: watch::Sender<bool>,
    /// Owned by the loop; kept here so callers can inspect it.
    breaker: Arc<CircuitBreaker>,
    /// Distinguishes this entry from a later one for the same ticker.
    generation: u64,
}

/// Handle to the scraping loops. Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct ScrapeManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    poll_interval: Duration,
    failure_mode: FailureMode,
    retry: RetryConfig,
    parser: TransactionTableParser,
    endpoints: Endpoints,
    resolver: CikResolver,
    source: Arc<dyn PageSource>,
    reports: mpsc::Sender<ScrapedReport>,
    failures: Option<mpsc::UnboundedSender<ScrapeFailure>>,
    registry: Mutex<HashMap<Ticker, ManagedEntry>>,
    next_generation: AtomicU64,
    breaker_failure_threshold: u32,
    breaker_reset_timeout: Duration,
    breaker_success_threshold: u32,
    metrics: ScrapeMetrics,
}

/// Why a loop stopped.
enum LoopExit {
    Cancelled,
    StreamClosed,
    Failed { error: ScrapeError, attempts: u32 },
}

struct FetchedPage {
    cik: Cik,
    url: Url,
    body: String,
}

impl ScrapeManager {
    /// # Arguments
    /// * `config` - Poll interval, row filter, retry policy, failure mode and
    ///   circuit breaker thresholds.
    /// * `source` - Where pages come from. Shared by every loop.
    /// * `resolver` - The ticker to CIK directory, built (or to be built)
    ///   once by the caller.
    /// * `reports` - Bounded stream every loop emits onto.
    /// * `failures` - Optional sink told about loops that gave up.
    pub fn new(
        config: &Config,
        source: Arc<dyn PageSource>,
        resolver: CikResolver,
        reports: mpsc::Sender<ScrapedReport>,
        failures: Option<mpsc::UnboundedSender<ScrapeFailure>>,
    ) -> Self {
        let inner = ManagerInner {
            poll_interval: config.poll_interval,
            failure_mode: config.failure_mode,
            retry: config.effective_retry(),
            parser: TransactionTableParser::new(config.row_filter.clone()),
            endpoints: Endpoints::from_config(config),
            resolver,
            source,
            reports,
            failures,
            registry: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            breaker_failure_threshold: config.circuit_breaker_failure_threshold,
            breaker_reset_timeout: config.circuit_breaker_reset_timeout,
            breaker_success_threshold: config.circuit_breaker_success_threshold,
            metrics: ScrapeMetrics::new(),
        };

        info!(
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            row_filter = %config.row_filter,
            failure_mode = ?config.failure_mode,
            "Scrape manager ready"
        );

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Start monitoring `ticker`.
    ///
    /// Takes one unit of work out on `tracker`; it is released when the
    /// ticker's loop exits. Must be called from inside a tokio runtime.
    pub fn add_ticker(
        &self,
        ticker: impl Into<Ticker>,
        tracker: &WorkTracker,
    ) -> Result<(), ScrapeError> {
        let ticker = ticker.into();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let (generation, breaker) = {
            let mut registry = self.inner.registry.lock();
            if registry.contains_key(&ticker) {
                return Err(ScrapeError::AlreadyManaged(ticker));
            }
            let breaker = Arc::new(CircuitBreaker::new(
                ticker.as_str(),
                self.inner.breaker_failure_threshold,
                self.inner.breaker_reset_timeout,
                self.inner.breaker_success_threshold,
            ));
            let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
            registry.insert(
                ticker.clone(),
                ManagedEntry {
                    cancel: cancel_tx,
                    breaker: Arc::clone(&breaker),
                    generation,
                },
            );
            (generation, breaker)
        };

        let unit = tracker.begin();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.run_loop(ticker, generation, cancel_rx, breaker, unit).await;
        });

        Ok(())
    }

    /// Stop monitoring `ticker`. The loop notices asynchronously.
    pub fn cancel_scraping(&self, ticker: &str) -> Result<(), ScrapeError> {
        let entry = self
            .inner
            .registry
            .lock()
            .remove(ticker)
            .ok_or_else(|| ScrapeError::NotManaged(ticker.to_string()))?;

        let _ = entry.cancel.send(true);
        info!(ticker = ticker, "Scraping cancelled");
        Ok(())
    }

    /// Stop every loop and empty the registry. Safe to call repeatedly.
    pub fn cancel_all(&self) {
        let drained: Vec<(Ticker, ManagedEntry)> = self.inner.registry.lock().drain().collect();
        if drained.is_empty() {
            debug!("Cancel all: nothing to cancel");
            return;
        }

        for (ticker, entry) in &drained {
            let _ = entry.cancel.send(true);
            debug!(ticker = ticker.as_str(), "Cancellation signalled");
        }
        info!(count = drained.len(), "All scraping cancelled");
    }

    /// Currently registered tickers, sorted.
    pub fn managed_tickers(&self) -> Vec<Ticker> {
        let mut tickers: Vec<Ticker> = self.inner.registry.lock().keys().cloned().collect();
        tickers.sort();
        tickers
    }

    pub fn is_managed(&self, ticker: &str) -> bool {
        self.inner.registry.lock().contains_key(ticker)
    }

    /// State of `ticker`'s breaker, if the ticker is managed.
    pub fn circuit_state(&self, ticker: &str) -> Option<CircuitState> {
        self.inner
            .registry
            .lock()
            .get(ticker)
            .map(|entry| entry.breaker.state())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }
}

/// Resolves once the loop has been told to stop, or its sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|stop| *stop).await;
}

// =============================================================================
// The scheduling loop
// =============================================================================

impl ManagerInner {
    async fn run_loop(
        &self,
        ticker: Ticker,
        generation: u64,
        mut cancel: watch::Receiver<bool>,
        breaker: Arc<CircuitBreaker>,
        _unit: WorkUnit,
    ) {
        let period = self.poll_interval.max(Duration::from_millis(1));
        let mut ticks = interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(ticker = ticker.as_str(), generation = generation, "Scraping loop started");

        let exit = loop {
            tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => break LoopExit::Cancelled,
                _ = ticks.tick() => {}
            }

            if let Some(exit) = self.tick(&ticker, &breaker, &mut cancel).await {
                break exit;
            }
        };

        match exit {
            LoopExit::Cancelled => {
                self.metrics.increment_loops_cancelled();
                info!(ticker = ticker.as_str(), "Scraping loop stopped");
            }
            LoopExit::StreamClosed => {
                self.forget(&ticker, generation);
                warn!(ticker = ticker.as_str(), "Report stream closed, scraping loop stopped");
            }
            LoopExit::Failed { error, attempts } => {
                self.forget(&ticker, generation);
                self.metrics.increment_loops_failed();

                match self.failure_mode {
                    FailureMode::Silent => {
                        warn!(ticker = ticker.as_str(), error = %error, "Scraping loop stopped");
                    }
                    FailureMode::Report => {
                        error!(
                            ticker = ticker.as_str(),
                            attempts = attempts,
                            error = %error,
                            "Giving up on ticker"
                        );
                        if let Some(failures) = &self.failures {
                            let _ = failures.send(ScrapeFailure {
                                ticker: ticker.clone(),
                                error: error.to_string(),
                                attempts,
                                failed_at: Utc::now(),
                            });
                        }
                    }
                }
            }
        }
    }

    /// One fetch, parse and emit cycle. `Some` ends the loop.
    async fn tick(
        &self,
        ticker: &str,
        breaker: &CircuitBreaker,
        cancel: &mut watch::Receiver<bool>,
    ) -> Option<LoopExit> {
        self.metrics.increment_scrapes();

        let page = match self.fetch_with_retry(ticker, breaker, cancel).await {
            Ok(page) => page,
            Err(exit) => return Some(exit),
        };

        let (mut report, stats) = self.parser.parse_with_stats(&page.body, ticker);
        report.cik = Some(page.cik);
        report.source_url = Some(page.url.to_string());

        let transactions = report.transactions.len();
        let issues = report.issues.len();
        debug!(ticker = ticker, transactions = transactions, issues = issues, "Emitting report");

        tokio::select! {
            biased;
            _ = cancelled(cancel) => return Some(LoopExit::Cancelled),
            sent = self.reports.send(report) => {
                if sent.is_err() {
                    return Some(LoopExit::StreamClosed);
                }
            }
        }

        self.metrics
            .record_report(transactions, stats.rows_filtered, issues);
        None
    }

    async fn fetch_with_retry(
        &self,
        ticker: &str,
        breaker: &CircuitBreaker,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<FetchedPage, LoopExit> {
        let mut failed_attempts = 0u32;

        loop {
            if let Some(wait) = breaker.cooldown_remaining() {
                self.metrics.increment_breaker_cooldowns();
                info!(
                    ticker = ticker,
                    wait_ms = wait.as_millis() as u64,
                    "Circuit breaker open, waiting before a trial request"
                );
                tokio::select! {
                    biased;
                    _ = cancelled(cancel) => return Err(LoopExit::Cancelled),
                    _ = sleep(wait) => {}
                }
            }
            if !breaker.allow_request() {
                continue;
            }

            let attempt = tokio::select! {
                biased;
                _ = cancelled(cancel) => return Err(LoopExit::Cancelled),
                result = self.fetch_disclosure(ticker) => result,
            };

            let error = match attempt {
                Ok(page) => {
                    breaker.record_success();
                    return Ok(page);
                }
                Err(error) => error,
            };

            failed_attempts += 1;
            if matches!(error, ScrapeError::Fetch(_)) {
                self.metrics.increment_fetch_failures();
                breaker.record_failure();
            }

            if !error.is_retryable() || !self.retry.allows_retry(failed_attempts) {
                return Err(LoopExit::Failed {
                    error,
                    attempts: failed_attempts,
                });
            }

            let delay = self.retry.delay_for_attempt(failed_attempts - 1);
            self.metrics.increment_retries();
            warn!(
                ticker = ticker,
                attempt = failed_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Scrape failed, backing off"
            );

            tokio::select! {
                biased;
                _ = cancelled(cancel) => return Err(LoopExit::Cancelled),
                _ = sleep(delay) => {}
            }
        }
    }

    async fn fetch_disclosure(&self, ticker: &str) -> Result<FetchedPage, ScrapeError> {
        let cik = self.resolver.resolve(ticker, self.source.as_ref()).await?;
        let url = self.endpoints.disclosure_url(&cik)?;
        let body = self.source.fetch(&url).await?;
        Ok(FetchedPage { cik, url, body })
    }

    /// Drop the registry entry for `ticker` if it still belongs to this loop.
    fn forget(&self, ticker: &str, generation: u64) {
        let mut registry = self.registry.lock();
        if registry
            .get(ticker)
            .is_some_and(|entry| entry.generation == generation)
        {
            registry.remove(ticker);
        }
    }
}
