// =============================================================================
// scrapers/mod.rs - THE FETCH AND PARSE PIPELINE
// =============================================================================
//
// Everything that touches the SEC lives under here. One ticker's trip
// through the pipeline goes:
//
//   ticker ──► cik_directory ──► fetcher ──► transaction_table ──► report
//
// None of these modules schedule anything. The per-ticker loops in
// `scrape_manager` decide when to run the pipeline and what to do when it
// fails.
// =============================================================================

pub mod cik_directory;
pub mod fetcher;
pub mod transaction_table;
