// =============================================================================
// cik_directory.rs - TICKER IN, CIK OUT
// =============================================================================
//
// EDGAR's ownership pages are keyed by CIK, not by ticker. The SEC publishes
// the full mapping as one tab-separated text file:
//
//   aapl	320193
//   msft	789019
//   ...
//
// We download it once per process, build a read-only map, and every scraping
// loop shares that same map. The build goes through a OnceCell so loops that
// race to be first wait on a single download instead of each starting one.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::ScrapeError;
use crate::models::Cik;
use crate::scrapers::fetcher::PageSource;

/// Immutable ticker → CIK map. Tickers are matched case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CikDirectory {
    entries: HashMap<String, Cik>,
}

impl CikDirectory {
    /// Parse a `<ticker>\t<cik>` listing. Lines without a tab, or with an
    /// empty side, are skipped. A ticker listed twice keeps its last CIK.
    pub fn parse(listing: &str) -> Self {
        let mut entries = HashMap::new();
        let mut skipped = 0usize;

        for line in listing.lines() {
            let line = line.trim_end_matches('\r');
            match line.rsplit_once('\t') {
                Some((ticker, cik)) if !ticker.trim().is_empty() && !cik.trim().is_empty() => {
                    entries.insert(ticker.trim().to_ascii_lowercase(), cik.trim().to_string());
                }
                _ => {
                    if !line.trim().is_empty() {
                        skipped += 1;
                    }
                }
            }
        }

        if skipped > 0 {
            debug!(skipped = skipped, "Skipped malformed ticker listing lines");
        }

        Self { entries }
    }

    pub fn resolve(&self, ticker: &str) -> Result<&str, ScrapeError> {
        self.entries
            .get(&ticker.trim().to_ascii_lowercase())
            .map(String::as_str)
            .ok_or_else(|| ScrapeError::Resolution(ticker.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Shared, lazily built [`CikDirectory`].
///
/// Clone it freely; clones share the same cell. The composition root should
/// call [`CikResolver::preload`] once at startup. Loops that get there first
/// anyway end up waiting on the same build.
#[derive(Debug, Clone)]
pub struct CikResolver {
    listing_url: Url,
    directory: Arc<OnceCell<CikDirectory>>,
}

impl CikResolver {
    pub fn new(listing_url: Url) -> Self {
        Self {
            listing_url,
            directory: Arc::new(OnceCell::new()),
        }
    }

    /// A resolver whose directory is already built.
    pub fn from_directory(listing_url: Url, directory: CikDirectory) -> Self {
        Self {
            listing_url,
            directory: Arc::new(OnceCell::new_with(Some(directory))),
        }
    }

    /// Build the directory if nobody has yet. A failed download leaves the
    /// cell empty so the next caller tries again.
    pub async fn preload(&self, source: &dyn PageSource) -> Result<&CikDirectory, ScrapeError> {
        self.directory
            .get_or_try_init(|| async {
                info!(url = %self.listing_url, "Loading ticker to CIK directory");
                let listing = source.fetch(&self.listing_url).await.map_err(|e| {
                    warn!(error = %e, "Failed to load ticker listing");
                    ScrapeError::Fetch(e)
                })?;
                let directory = CikDirectory::parse(&listing);
                info!(tickers = directory.len(), "Ticker to CIK directory ready");
                Ok::<_, ScrapeError>(directory)
            })
            .await
    }

    pub async fn resolve(&self, ticker: &str, source: &dyn PageSource) -> Result<Cik, ScrapeError> {
        let directory = self.preload(source).await?;
        directory.resolve(ticker).map(str::to_string)
    }

    pub fn is_loaded(&self) -> bool {
        self.directory.initialized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListing {
        body: Result<String, FetchError>,
        calls: AtomicUsize,
    }

    impl PageSource for CountingListing {
        fn fetch<'a>(&'a self, _url: &'a Url) -> BoxFuture<'a, Result<String, FetchError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let body = self.body.clone();
            Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                body
            })
        }
    }

    fn listing_url() -> Url {
        Url::parse("https://www.sec.gov/include/ticker.txt").unwrap()
    }

    #[test]
    fn test_resolves_listed_ticker() {
        let directory = CikDirectory::parse("AAPL\t0000320193\nmsft\t789019\n");
        assert_eq!(directory.resolve("AAPL").unwrap(), "0000320193");
        assert_eq!(directory.resolve("aapl").unwrap(), "0000320193");
        assert_eq!(directory.resolve("MSFT").unwrap(), "789019");
    }

    #[test]
    fn test_unknown_ticker_is_a_resolution_error() {
        let directory = CikDirectory::parse("AAPL\t0000320193\n");
        assert_eq!(
            directory.resolve("ZZZZ"),
            Err(ScrapeError::Resolution("ZZZZ".to_string()))
        );
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let directory = CikDirectory::parse("no tab here\n\t123\nge\t\n\ntsla\t1318605\r\n");
        assert_eq!(directory.len(), 1);
        assert_eq!(directory.resolve("tsla").unwrap(), "1318605");
    }

    #[tokio::test]
    async fn test_concurrent_resolvers_share_one_download() {
        let source = Arc::new(CountingListing {
            body: Ok("aapl\t320193\nge\t40545\n".to_string()),
            calls: AtomicUsize::new(0),
        });
        let resolver = CikResolver::new(listing_url());

        let mut handles = Vec::new();
        for ticker in ["aapl", "ge", "aapl", "ge"] {
            let resolver = resolver.clone();
            let source = Arc::clone(&source);
            handles.push(tokio::spawn(async move {
                resolver.resolve(ticker, &*source).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(resolver.is_loaded());
    }

    #[tokio::test]
    async fn test_failed_download_is_retried_on_next_call() {
        let source = CountingListing {
            body: Err(FetchError::Status {
                url: listing_url().to_string(),
                status: 503,
            }),
            calls: AtomicUsize::new(0),
        };
        let resolver = CikResolver::new(listing_url());

        assert!(matches!(
            resolver.resolve("aapl", &source).await,
            Err(ScrapeError::Fetch(_))
        ));
        assert!(!resolver.is_loaded());
        let _ = resolver.resolve("aapl", &source).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_prebuilt_directory_skips_download() {
        let source = CountingListing {
            body: Ok(String::new()),
            calls: AtomicUsize::new(0),
        };
        let resolver =
            CikResolver::from_directory(listing_url(), CikDirectory::parse("aapl\t320193\n"));
        assert_eq!(resolver.resolve("AAPL", &source).await.unwrap(), "320193");
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }
}
