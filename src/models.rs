// =============================================================================
// models.rs - WHAT AN INSIDER TRADE LOOKS LIKE ONCE WE'RE DONE WITH IT
// =============================================================================
//
// The SEC hands us a table of loosely formatted strings. These structs are
// what's left after we've decided what each cell meant, plus an honest
// account of the cells we couldn't make sense of.
// =============================================================================

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Caller-provided stock symbol. Opaque to us, unique in the registry.
pub type Ticker = String;

/// SEC Central Index Key, as listed in the bulk ticker file.
pub type Cik = String;

/// The kind of transaction an insider reported.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Buy,
    Sell,
    Disposition,
    Award,
    /// Any code we don't recognise. Kept rather than guessed.
    Unknown,
}

impl TransactionType {
    /// Map the single-letter code from the first column of the table.
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "D" => TransactionType::Disposition,
            "S" => TransactionType::Sell,
            "P" => TransactionType::Buy,
            "A" => TransactionType::Award,
            _ => TransactionType::Unknown,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Buy => write!(f, "BUY"),
            TransactionType::Sell => write!(f, "SELL"),
            TransactionType::Disposition => write!(f, "DISPOSITION"),
            TransactionType::Award => write!(f, "AWARD"),
            TransactionType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(TransactionType::Buy),
            "SELL" => Ok(TransactionType::Sell),
            "DISPOSITION" => Ok(TransactionType::Disposition),
            "AWARD" => Ok(TransactionType::Award),
            "UNKNOWN" => Ok(TransactionType::Unknown),
            other => Err(format!("unknown transaction type '{other}'")),
        }
    }
}

/// One disclosed insider event.
///
/// Fields the source cell didn't support are `None` instead of zero, and the
/// owning report records a [`ParseIssue`] explaining why.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InsiderTransaction {
    pub transaction_type: TransactionType,
    pub transaction_date: Option<NaiveDate>,
    pub insider_name: String,
    pub shares_transacted: Option<f64>,
    pub shares_owned: Option<f64>,
}

impl Default for InsiderTransaction {
    fn default() -> Self {
        Self {
            transaction_type: TransactionType::Unknown,
            transaction_date: None,
            insider_name: String::new(),
            shares_transacted: None,
            shares_owned: None,
        }
    }
}

/// The table columns we extract.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionField {
    TransactionType,
    TransactionDate,
    InsiderName,
    SharesTransacted,
    SharesOwned,
}

impl fmt::Display for TransactionField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionField::TransactionType => write!(f, "transaction_type"),
            TransactionField::TransactionDate => write!(f, "transaction_date"),
            TransactionField::InsiderName => write!(f, "insider_name"),
            TransactionField::SharesTransacted => write!(f, "shares_transacted"),
            TransactionField::SharesOwned => write!(f, "shares_owned"),
        }
    }
}

/// Data-quality notes attached to a report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseIssue {
    /// The page had no transaction table at all.
    TableNotFound,
    /// The header row exists but doesn't name one of the columns we need.
    MissingColumn { field: TransactionField },
    /// An accepted row is too short to contain the column.
    MissingCell { row: usize, field: TransactionField },
    /// The cell exists but its text isn't a valid value for the field.
    UnparseableCell {
        row: usize,
        field: TransactionField,
        raw: String,
    },
}

/// One ticker's scrape outcome for one tick of its scheduling loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScrapedReport {
    pub id: String,
    pub ticker: Ticker,
    pub cik: Option<Cik>,
    pub source_url: Option<String>,
    pub extracted_at: DateTime<Utc>,
    /// In source row order.
    pub transactions: Vec<InsiderTransaction>,
    pub issues: Vec<ParseIssue>,
}

impl ScrapedReport {
    pub fn new(ticker: impl Into<Ticker>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ticker: ticker.into(),
            cik: None,
            source_url: None,
            extracted_at: Utc::now(),
            transactions: Vec::new(),
            issues: Vec::new(),
        }
    }

    /// `true` when every cell of every accepted row parsed cleanly.
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

impl fmt::Display for ScrapedReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} (CIK {}): {} transactions, {} issues",
            self.id,
            self.ticker,
            self.cik.as_deref().unwrap_or("?"),
            self.transactions.len(),
            self.issues.len()
        )
    }
}

/// Sent to the failure sink when a ticker's loop gives up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScrapeFailure {
    pub ticker: Ticker,
    pub error: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_codes() {
        assert_eq!(TransactionType::from_code("D"), TransactionType::Disposition);
        assert_eq!(TransactionType::from_code("S"), TransactionType::Sell);
        assert_eq!(TransactionType::from_code("P"), TransactionType::Buy);
        assert_eq!(TransactionType::from_code(" A "), TransactionType::Award);
        assert_eq!(TransactionType::from_code("M"), TransactionType::Unknown);
        assert_eq!(TransactionType::from_code(""), TransactionType::Unknown);
    }

    #[test]
    fn test_transaction_type_names_parse_case_insensitively() {
        assert_eq!("disposition".parse::<TransactionType>(), Ok(TransactionType::Disposition));
        assert_eq!("BUY".parse::<TransactionType>(), Ok(TransactionType::Buy));
        assert!("HODL".parse::<TransactionType>().is_err());
    }

    #[test]
    fn test_report_serializes_issue_kinds() {
        let mut report = ScrapedReport::new("aapl");
        report.issues.push(ParseIssue::UnparseableCell {
            row: 2,
            field: TransactionField::SharesTransacted,
            raw: "abc".to_string(),
        });
        let json = serde_json::to_value(&report).expect("report serializes");
        assert_eq!(json["ticker"], "aapl");
        assert_eq!(json["issues"][0]["kind"], "unparseable_cell");
        assert_eq!(json["issues"][0]["field"], "shares_transacted");
        assert!(!report.is_clean());
    }
}
