// =============================================================================
// config.rs - ALL THE KNOBS
// =============================================================================
//
// Every tunable lives here and can be overridden with an INSIDER_WATCH_*
// environment variable (or a .env file). Anything missing or unparseable
// quietly falls back to its default.
// =============================================================================

use std::env;
use std::time::Duration;

use tracing::warn;

use crate::retry::RetryConfig;
use crate::scrapers::transaction_table::RowFilter;

/// What a scheduling loop does once a fetch keeps failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Retry with backoff, then stop the loop and tell the failure sink.
    Report,
    /// Stop at the first failure and tell nobody.
    Silent,
}

impl FailureMode {
    fn from_env_value(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "silent" => FailureMode::Silent,
            "report" => FailureMode::Report,
            other => {
                warn!(value = other, "Unknown failure mode, falling back to 'report'");
                FailureMode::Report
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // DATA SOURCE
    // =========================================================================
    /// Scheme and host every request is built from.
    pub base_url: String,

    /// Path of the bulk `<ticker>\t<cik>` listing.
    pub ticker_listing_path: String,

    /// Path template for the per-issuer ownership page. `{cik}` is replaced
    /// with the URL-encoded identifier.
    pub disclosure_path_template: String,

    /// The SEC throttles anonymous clients, so identify ourselves.
    pub user_agent: String,

    pub http_timeout: Duration,

    // =========================================================================
    // SCHEDULING
    // =========================================================================
    /// Time between scrapes of the same ticker.
    pub poll_interval: Duration,

    /// Capacity of the bounded report stream. A full stream stalls producers.
    pub report_buffer: usize,

    pub row_filter: RowFilter,

    pub failure_mode: FailureMode,

    pub retry: RetryConfig,

    // =========================================================================
    // CIRCUIT BREAKER
    // =========================================================================
    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_reset_timeout: Duration,
    pub circuit_breaker_success_threshold: u32,

    // =========================================================================
    // BINARY ONLY
    // =========================================================================
    /// Tickers the binary starts monitoring on launch.
    pub tickers: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "https://www.sec.gov".to_string(),
            ticker_listing_path: "/include/ticker.txt".to_string(),
            disclosure_path_template:
                "/cgi-bin/own-disp?action=getissuer&CIK={cik}&type=&dateb=&owner=include&start=1"
                    .to_string(),
            user_agent: "InsiderWatch/0.1 (insider-watch@example.com)".to_string(),
            http_timeout: Duration::from_secs(20),
            poll_interval: Duration::from_secs(5),
            report_buffer: 5,
            row_filter: RowFilter::All,
            failure_mode: FailureMode::Report,
            retry: RetryConfig::exponential(4, Duration::from_millis(500), Duration::from_secs(30)),
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_reset_timeout: Duration::from_secs(60),
            circuit_breaker_success_threshold: 2,
            tickers: vec!["aapl".to_string(), "tsla".to_string(), "ge".to_string()],
        }
    }
}

impl Config {
    /// Load configuration from the environment, on top of [`Config::default`].
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let defaults = Config::default();

        let row_filter = match env::var("INSIDER_WATCH_ROW_FILTER") {
            Ok(raw) => raw.parse().unwrap_or_else(|err| {
                warn!(value = raw.as_str(), error = %err, "Invalid row filter, accepting all rows");
                RowFilter::All
            }),
            Err(_) => defaults.row_filter.clone(),
        };

        let failure_mode = env::var("INSIDER_WATCH_FAILURE_MODE")
            .map(|raw| FailureMode::from_env_value(&raw))
            .unwrap_or(defaults.failure_mode);

        let retry = RetryConfig::exponential(
            env_parse("INSIDER_WATCH_RETRY_MAX", 4),
            Duration::from_millis(env_parse("INSIDER_WATCH_RETRY_BASE_MS", 500)),
            Duration::from_millis(env_parse("INSIDER_WATCH_RETRY_MAX_MS", 30_000)),
        );

        let tickers = env::var("INSIDER_WATCH_TICKERS")
            .map(|raw| parse_ticker_list(&raw))
            .unwrap_or(defaults.tickers);

        Config {
            base_url: env_or_default("INSIDER_WATCH_BASE_URL", &defaults.base_url),
            ticker_listing_path: env_or_default(
                "INSIDER_WATCH_TICKER_LISTING_PATH",
                &defaults.ticker_listing_path,
            ),
            disclosure_path_template: env_or_default(
                "INSIDER_WATCH_DISCLOSURE_PATH",
                &defaults.disclosure_path_template,
            ),
            user_agent: env_or_default("INSIDER_WATCH_USER_AGENT", &defaults.user_agent),
            http_timeout: Duration::from_secs(env_parse("INSIDER_WATCH_HTTP_TIMEOUT_SECS", 20)),
            poll_interval: Duration::from_secs(env_parse("INSIDER_WATCH_POLL_SECS", 5)),
            report_buffer: env_parse("INSIDER_WATCH_REPORT_BUFFER", 5usize).max(1),
            row_filter,
            failure_mode,
            retry,
            circuit_breaker_failure_threshold: env_parse("INSIDER_WATCH_CB_FAILURE_THRESHOLD", 5),
            circuit_breaker_reset_timeout: Duration::from_secs(env_parse(
                "INSIDER_WATCH_CB_RESET_TIMEOUT_SECS",
                60,
            )),
            circuit_breaker_success_threshold: env_parse("INSIDER_WATCH_CB_SUCCESS_THRESHOLD", 2),
            tickers,
        }
    }

    /// Retry policy the loops actually apply; silent mode never retries.
    pub fn effective_retry(&self) -> RetryConfig {
        match self.failure_mode {
            FailureMode::Report => self.retry.clone(),
            FailureMode::Silent => RetryConfig::no_retry(),
        }
    }
}

fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_ticker_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
