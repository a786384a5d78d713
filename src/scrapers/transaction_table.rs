// =============================================================================
// transaction_table.rs - FROM HTML SOUP TO INSIDER TRANSACTIONS
// =============================================================================
//
// The ownership page carries one table with id "transaction-report". Its
// header row names the columns and every following row is one filing line:
//
//   A/D | Date       | Deemed | Reporting Owner | Form | Type | D/I | Transacted | Owned | ...
//   D   | 2023-01-05 |        | Jane Doe        | 4    | S-Sale | D | 100        | 900   | ...
//
// Columns are located by header name once per page. A page without a header
// row falls back to the classic positions (0, 1, 3, 7, 8). Every cell that
// can't be read becomes `None` on the transaction and a `ParseIssue` on the
// report, so a bad cell never turns into a plausible-looking zero.
// =============================================================================

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::NaiveDate;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use crate::models::{
    InsiderTransaction, ParseIssue, ScrapedReport, TransactionField, TransactionType,
};

pub const TRANSACTION_TABLE_ID: &str = "transaction-report";

const DATE_FORMAT: &str = "%Y-%m-%d";

static TABLE: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"table[id="transaction-report"]"#).expect("static selector is valid")
});
static ROW: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tr").expect("static selector is valid"));
static DATA_CELL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td").expect("static selector is valid"));
static HEADER_CELL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("th").expect("static selector is valid"));

const FIELDS: [TransactionField; 5] = [
    TransactionField::TransactionType,
    TransactionField::TransactionDate,
    TransactionField::InsiderName,
    TransactionField::SharesTransacted,
    TransactionField::SharesOwned,
];

// =============================================================================
// Row filter
// =============================================================================

/// Which transaction types make it into a report.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RowFilter {
    /// Keep every row.
    #[default]
    All,
    /// Keep only rows whose type is in the set.
    Only(BTreeSet<TransactionType>),
}

impl RowFilter {
    pub fn only(types: impl IntoIterator<Item = TransactionType>) -> Self {
        RowFilter::Only(types.into_iter().collect())
    }

    pub fn accepts(&self, transaction_type: TransactionType) -> bool {
        match self {
            RowFilter::All => true,
            RowFilter::Only(types) => types.contains(&transaction_type),
        }
    }
}

/// `ALL`, or a comma-separated list such as `DISPOSITION,SELL`.
impl FromStr for RowFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
            return Ok(RowFilter::All);
        }

        let types = trimmed
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::parse::<TransactionType>)
            .collect::<Result<BTreeSet<_>, _>>()?;

        if types.is_empty() {
            return Err(format!("no transaction types in '{trimmed}'"));
        }
        Ok(RowFilter::Only(types))
    }
}

impl fmt::Display for RowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowFilter::All => write!(f, "ALL"),
            RowFilter::Only(types) => {
                let names: Vec<String> = types.iter().map(ToString::to_string).collect();
                write!(f, "{}", names.join(","))
            }
        }
    }
}

// =============================================================================
// Column layout
// =============================================================================

/// Where each field lives in a data row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColumnLayout {
    transaction_type: Option<usize>,
    transaction_date: Option<usize>,
    insider_name: Option<usize>,
    shares_transacted: Option<usize>,
    shares_owned: Option<usize>,
}

impl ColumnLayout {
    const FIXED: ColumnLayout = ColumnLayout {
        transaction_type: Some(0),
        transaction_date: Some(1),
        insider_name: Some(3),
        shares_transacted: Some(7),
        shares_owned: Some(8),
    };

    const EMPTY: ColumnLayout = ColumnLayout {
        transaction_type: None,
        transaction_date: None,
        insider_name: None,
        shares_transacted: None,
        shares_owned: None,
    };

    fn column(&self, field: TransactionField) -> Option<usize> {
        match field {
            TransactionField::TransactionType => self.transaction_type,
            TransactionField::TransactionDate => self.transaction_date,
            TransactionField::InsiderName => self.insider_name,
            TransactionField::SharesTransacted => self.shares_transacted,
            TransactionField::SharesOwned => self.shares_owned,
        }
    }

    fn slot(&mut self, field: TransactionField) -> &mut Option<usize> {
        match field {
            TransactionField::TransactionType => &mut self.transaction_type,
            TransactionField::TransactionDate => &mut self.transaction_date,
            TransactionField::InsiderName => &mut self.insider_name,
            TransactionField::SharesTransacted => &mut self.shares_transacted,
            TransactionField::SharesOwned => &mut self.shares_owned,
        }
    }

    fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    /// Map header labels to fields. The first header matching a field wins.
    fn from_headers<'a>(headers: impl IntoIterator<Item = &'a str>) -> Self {
        let mut layout = Self::EMPTY;
        for (index, header) in headers.into_iter().enumerate() {
            if let Some(field) = field_for_header(header) {
                let slot = layout.slot(field);
                if slot.is_none() {
                    *slot = Some(index);
                }
            }
        }
        layout
    }
}

fn field_for_header(header: &str) -> Option<TransactionField> {
    let label = normalize_whitespace(header).to_ascii_lowercase();
    if label.contains("acqui") || label.contains("disposition") {
        Some(TransactionField::TransactionType)
    } else if label.contains("transaction date") {
        Some(TransactionField::TransactionDate)
    } else if label.contains("reporting owner") || label.contains("insider") {
        Some(TransactionField::InsiderName)
    } else if label.contains("transacted") {
        Some(TransactionField::SharesTransacted)
    } else if label.contains("owned") {
        Some(TransactionField::SharesOwned)
    } else {
        None
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Header labels are compared after collapsing whitespace.
fn header_text(cell: &ElementRef<'_>) -> String {
    normalize_whitespace(&raw_text(cell))
}

/// Data cells keep their text as printed. Each field trims what it needs.
fn raw_text(cell: &ElementRef<'_>) -> String {
    cell.text().collect()
}

// =============================================================================
// Parser
// =============================================================================

/// Per-page numbers the manager feeds into its metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStats {
    /// Rows with at least one data cell.
    pub rows_seen: usize,
    /// Valid rows dropped by the row filter.
    pub rows_filtered: usize,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionTableParser {
    filter: RowFilter,
}

impl TransactionTableParser {
    pub fn new(filter: RowFilter) -> Self {
        Self { filter }
    }

    pub fn filter(&self) -> &RowFilter {
        &self.filter
    }

    pub fn parse(&self, html: &str, ticker: &str) -> ScrapedReport {
        self.parse_with_stats(html, ticker).0
    }

    /// Parse one disclosure page into a report for `ticker`.
    ///
    /// The report is always produced. A page without the transaction table
    /// yields an empty report carrying [`ParseIssue::TableNotFound`].
    pub fn parse_with_stats(&self, html: &str, ticker: &str) -> (ScrapedReport, TableStats) {
        let document = Html::parse_document(html);
        let mut report = ScrapedReport::new(ticker);
        let mut stats = TableStats::default();

        let Some(table) = document.select(&TABLE).next() else {
            warn!(ticker = ticker, table_id = TRANSACTION_TABLE_ID, "Transaction table not found");
            report.issues.push(ParseIssue::TableNotFound);
            return (report, stats);
        };

        let mut layout = None;
        let mut data_rows: Vec<Vec<String>> = Vec::new();

        for row in table.select(&ROW) {
            let cells: Vec<String> = row.select(&DATA_CELL).map(|c| raw_text(&c)).collect();
            if !cells.is_empty() {
                data_rows.push(cells);
                continue;
            }
            if layout.is_none() {
                let headers: Vec<String> = row.select(&HEADER_CELL).map(|c| header_text(&c)).collect();
                if !headers.is_empty() {
                    layout = Some(ColumnLayout::from_headers(headers.iter().map(String::as_str)));
                }
            }
        }

        let layout = match layout {
            Some(found) if found.is_empty() => {
                debug!(ticker = ticker, "No recognised headers, using the fixed column layout");
                ColumnLayout::FIXED
            }
            Some(found) => {
                for field in FIELDS {
                    if found.column(field).is_none() {
                        warn!(ticker = ticker, field = %field, "Expected column missing from transaction table");
                        report.issues.push(ParseIssue::MissingColumn { field });
                    }
                }
                found
            }
            None => ColumnLayout::FIXED,
        };

        for (row_index, cells) in data_rows.iter().enumerate() {
            stats.rows_seen += 1;

            let mut row_issues = Vec::new();
            let transaction = read_row(cells, row_index, &layout, &mut row_issues);

            if !self.filter.accepts(transaction.transaction_type) {
                stats.rows_filtered += 1;
                continue;
            }

            report.transactions.push(transaction);
            report.issues.extend(row_issues);
        }

        debug!(
            ticker = ticker,
            rows = stats.rows_seen,
            accepted = report.transactions.len(),
            filtered = stats.rows_filtered,
            issues = report.issues.len(),
            "Transaction table parsed"
        );

        (report, stats)
    }
}

/// Pull the cell for `field` out of a row. `None` means the column is not
/// present in the layout at all; that is already reported once per page.
fn cell<'r>(
    cells: &'r [String],
    row: usize,
    field: TransactionField,
    layout: &ColumnLayout,
    issues: &mut Vec<ParseIssue>,
) -> Option<&'r str> {
    let index = layout.column(field)?;
    match cells.get(index) {
        Some(text) => Some(text.as_str()),
        None => {
            issues.push(ParseIssue::MissingCell { row, field });
            None
        }
    }
}

fn read_row(
    cells: &[String],
    row: usize,
    layout: &ColumnLayout,
    issues: &mut Vec<ParseIssue>,
) -> InsiderTransaction {
    let mut transaction = InsiderTransaction::default();

    if let Some(code) = cell(cells, row, TransactionField::TransactionType, layout, issues) {
        transaction.transaction_type = TransactionType::from_code(code);
    }

    if let Some(raw) = cell(cells, row, TransactionField::TransactionDate, layout, issues) {
        match NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT) {
            Ok(date) => transaction.transaction_date = Some(date),
            Err(_) => issues.push(ParseIssue::UnparseableCell {
                row,
                field: TransactionField::TransactionDate,
                raw: raw.to_string(),
            }),
        }
    }

    if let Some(name) = cell(cells, row, TransactionField::InsiderName, layout, issues) {
        transaction.insider_name = name.to_string();
    }

    for field in [TransactionField::SharesTransacted, TransactionField::SharesOwned] {
        let Some(raw) = cell(cells, row, field, layout, issues) else {
            continue;
        };
        match parse_share_count(raw) {
            Some(value) => match field {
                TransactionField::SharesTransacted => transaction.shares_transacted = Some(value),
                _ => transaction.shares_owned = Some(value),
            },
            None => issues.push(ParseIssue::UnparseableCell {
                row,
                field,
                raw: raw.to_string(),
            }),
        }
    }

    transaction
}

/// Share counts are printed like `1,250` or `1250.0000`.
fn parse_share_count(raw: &str) -> Option<f64> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    cleaned.parse::<f64>().ok().filter(|value| value.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(header: Option<&str>, rows: &[&str]) -> String {
        let mut html = String::from(r#"<html><body><table id="transaction-report"><tbody>"#);
        if let Some(header) = header {
            html.push_str(header);
        }
        for row in rows {
            html.push_str(row);
        }
        html.push_str("</tbody></table></body></html>");
        html
    }

    fn row(cells: &[&str]) -> String {
        let tds: String = cells.iter().map(|c| format!("<td>{c}</td>")).collect();
        format!("<tr>{tds}</tr>")
    }

    const SEC_HEADER: &str = "<tr><th>Acquistion or Disposition</th><th>Transaction Date</th>\
        <th>Deemed Execution Date</th><th>Reporting Owner</th><th>Form</th>\
        <th>Transaction Type</th><th>Direct or Indirect Ownership</th>\
        <th>Number of Securities Transacted</th><th>Number of Securities Owned</th>\
        <th>Line Number</th><th>Owner CIK</th><th>Security Name</th></tr>";

    fn fixture_rows() -> Vec<String> {
        vec![
            row(&["D", "2023-01-05", "", "Jane Doe", "4", "S-Sale", "D", "100", "900"]),
            row(&["S", "2023-01-06", "", "John Roe", "4", "S-Sale", "D", "50", "850"]),
        ]
    }

    #[test]
    fn test_disposition_filter_keeps_only_matching_rows() {
        let rows = fixture_rows();
        let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
        let html = table(None, &refs);
        let parser = TransactionTableParser::new(RowFilter::only([TransactionType::Disposition]));

        let (report, stats) = parser.parse_with_stats(&html, "aapl");

        assert_eq!(report.ticker, "aapl");
        assert_eq!(report.transactions.len(), 1);
        let tx = &report.transactions[0];
        assert_eq!(tx.transaction_type, TransactionType::Disposition);
        assert_eq!(tx.transaction_date, NaiveDate::from_ymd_opt(2023, 1, 5));
        assert_eq!(tx.insider_name, "Jane Doe");
        assert_eq!(tx.shares_transacted, Some(100.0));
        assert_eq!(tx.shares_owned, Some(900.0));
        assert!(report.is_clean());
        assert_eq!(stats.rows_seen, 2);
        assert_eq!(stats.rows_filtered, 1);
    }

    #[test]
    fn test_all_filter_keeps_source_order() {
        let rows = fixture_rows();
        let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
        let html = table(Some(SEC_HEADER), &refs);

        let report = TransactionTableParser::default().parse(&html, "aapl");

        let names: Vec<&str> = report
            .transactions
            .iter()
            .map(|t| t.insider_name.as_str())
            .collect();
        assert_eq!(names, vec!["Jane Doe", "John Roe"]);
        assert_eq!(report.transactions[1].transaction_type, TransactionType::Sell);
        assert!(report.is_clean());
    }

    #[test]
    fn test_unparseable_shares_become_none_with_issue() {
        let bad = row(&["P", "2023-02-01", "", "Jane Doe", "4", "P-Purchase", "D", "abc", " 1,250 "]);
        let html = table(None, &[bad.as_str()]);

        let report = TransactionTableParser::default().parse(&html, "tsla");

        let tx = &report.transactions[0];
        assert_eq!(tx.transaction_type, TransactionType::Buy);
        assert_eq!(tx.shares_transacted, None);
        assert_eq!(tx.shares_owned, Some(1250.0));
        assert_eq!(
            report.issues,
            vec![ParseIssue::UnparseableCell {
                row: 0,
                field: TransactionField::SharesTransacted,
                raw: "abc".to_string(),
            }]
        );
    }

    #[test]
    fn test_bad_date_only_loses_the_date() {
        let bad = row(&["A", "01/05/2023", "", "Jane Doe", "4", "A-Award", "D", "10", "20"]);
        let html = table(None, &[bad.as_str()]);

        let report = TransactionTableParser::default().parse(&html, "ge");

        let tx = &report.transactions[0];
        assert_eq!(tx.transaction_type, TransactionType::Award);
        assert_eq!(tx.transaction_date, None);
        assert_eq!(tx.shares_transacted, Some(10.0));
        assert!(matches!(
            report.issues[0],
            ParseIssue::UnparseableCell {
                field: TransactionField::TransactionDate,
                ..
            }
        ));
    }

    #[test]
    fn test_reordered_headers_are_followed() {
        let header = "<tr><th>Reporting Owner</th><th>Number of Securities Owned</th>\
            <th>Transaction Date</th><th>Number of Securities Transacted</th>\
            <th>Acquistion or Disposition</th></tr>";
        let data = row(&["Jane Doe", "900", "2023-01-05", "100", "D"]);
        let html = table(Some(header), &[data.as_str()]);

        let report = TransactionTableParser::default().parse(&html, "aapl");

        let tx = &report.transactions[0];
        assert_eq!(tx.insider_name, "Jane Doe");
        assert_eq!(tx.transaction_type, TransactionType::Disposition);
        assert_eq!(tx.shares_transacted, Some(100.0));
        assert_eq!(tx.shares_owned, Some(900.0));
        assert!(report.is_clean());
    }

    #[test]
    fn test_missing_column_is_reported_not_shifted() {
        let header = "<tr><th>Acquistion or Disposition</th><th>Transaction Date</th>\
            <th>Reporting Owner</th><th>Number of Securities Owned</th></tr>";
        let data = row(&["D", "2023-01-05", "Jane Doe", "900"]);
        let html = table(Some(header), &[data.as_str()]);

        let report = TransactionTableParser::default().parse(&html, "aapl");

        let tx = &report.transactions[0];
        assert_eq!(tx.shares_transacted, None);
        assert_eq!(tx.shares_owned, Some(900.0));
        assert_eq!(
            report.issues,
            vec![ParseIssue::MissingColumn {
                field: TransactionField::SharesTransacted
            }]
        );
    }

    #[test]
    fn test_short_row_reports_missing_cells() {
        let short = row(&["S", "2023-01-06"]);
        let html = table(None, &[short.as_str()]);

        let report = TransactionTableParser::default().parse(&html, "aapl");

        assert_eq!(report.transactions.len(), 1);
        assert_eq!(report.transactions[0].transaction_type, TransactionType::Sell);
        assert!(report.issues.contains(&ParseIssue::MissingCell {
            row: 0,
            field: TransactionField::InsiderName
        }));
        assert_eq!(report.issues.len(), 3);
    }

    #[test]
    fn test_insider_name_is_kept_as_printed() {
        let data = row(&["D", " 2023-01-05 ", "", "  DOE JANE\n  A ", "4", "S-Sale", "D", " 100 ", "900"]);
        let html = table(None, &[data.as_str()]);

        let report = TransactionTableParser::default().parse(&html, "aapl");

        let tx = &report.transactions[0];
        assert_eq!(tx.insider_name, "  DOE JANE\n  A ");
        assert_eq!(tx.transaction_date, NaiveDate::from_ymd_opt(2023, 1, 5));
        assert_eq!(tx.shares_transacted, Some(100.0));
        assert!(report.is_clean());
    }

    #[test]
    fn test_missing_table_yields_empty_report() {
        let html = "<html><body><table id=\"something-else\"></table></body></html>";
        let report = TransactionTableParser::default().parse(html, "aapl");
        assert!(report.transactions.is_empty());
        assert_eq!(report.issues, vec![ParseIssue::TableNotFound]);
    }

    #[test]
    fn test_rows_without_cells_are_skipped() {
        let html = table(Some(SEC_HEADER), &["<tr></tr>"]);
        let (report, stats) = TransactionTableParser::default().parse_with_stats(&html, "aapl");
        assert!(report.transactions.is_empty());
        assert_eq!(stats.rows_seen, 0);
    }

    #[test]
    fn test_row_filter_parsing() {
        assert_eq!("ALL".parse::<RowFilter>().unwrap(), RowFilter::All);
        assert_eq!("".parse::<RowFilter>().unwrap(), RowFilter::All);
        assert_eq!(
            "disposition, sell".parse::<RowFilter>().unwrap(),
            RowFilter::only([TransactionType::Disposition, TransactionType::Sell])
        );
        assert!("DISPOSITION,BOGUS".parse::<RowFilter>().is_err());
        assert!(",".parse::<RowFilter>().is_err());
    }
}
