// =============================================================================
// INSIDER WATCH
// =============================================================================
//
// Keeps an eye on the SEC's insider ownership pages. Give the manager a
// ticker and it polls that issuer's transaction table on a fixed interval,
// turning each page into a `ScrapedReport` on a bounded channel you drain.
// =============================================================================

pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod retry;
pub mod scrape_manager;
pub mod scrapers;
pub mod tracker;

pub use config::{Config, FailureMode};
pub use error::{FetchError, ScrapeError, TemplateError};
pub use models::{
    Cik, InsiderTransaction, ParseIssue, ScrapeFailure, ScrapedReport, Ticker, TransactionField,
    TransactionType,
};
pub use scrape_manager::ScrapeManager;
pub use scrapers::cik_directory::{CikDirectory, CikResolver};
pub use scrapers::fetcher::{Endpoints, HttpPageFetcher, PageSource, UrlTemplate};
pub use scrapers::transaction_table::{RowFilter, TransactionTableParser};
pub use tracker::{WorkTracker, WorkUnit};
