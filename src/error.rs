// =============================================================================
// error.rs - EVERYTHING THAT CAN GO WRONG BETWEEN US AND THE SEC
// =============================================================================
//
// Registry misuse comes back to the caller synchronously. Everything else
// happens inside a scheduling loop, where it either costs us one tick or
// ends the loop for good.
// =============================================================================

use thiserror::Error;

/// Top-level error for the scraping core.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScrapeError {
    #[error("ticker '{0}' is already managed")]
    AlreadyManaged(String),

    #[error("ticker '{0}' is not managed")]
    NotManaged(String),

    #[error("failed to resolve CIK for ticker '{0}'")]
    Resolution(String),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl ScrapeError {
    /// Only network-level trouble is worth another attempt. A ticker missing
    /// from the directory or a broken URL template will fail the same way
    /// every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScrapeError::Fetch(err) => err.is_retryable(),
            _ => false,
        }
    }
}

/// Failures while rendering a request URL from its template.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown placeholder '{{{name}}}' in URL template")]
    UnknownPlaceholder { name: String },

    #[error("unterminated placeholder starting at byte {position} in URL template")]
    Unterminated { position: usize },

    #[error("URL template is missing required placeholder '{{{name}}}'")]
    MissingPlaceholder { name: String },

    #[error("rendered URL '{url}' is invalid: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Failures while retrieving a page from the data source.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("failed to read response body from {url}: {reason}")]
    Body { url: String, reason: String },
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport { .. } | FetchError::Body { .. } => true,
            FetchError::Status { status, .. } => {
                matches!(status, 408 | 429) || (500..=599).contains(status)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_retryability() {
        let status = |status| FetchError::Status {
            url: "https://www.sec.gov/x".to_string(),
            status,
        };
        assert!(status(429).is_retryable());
        assert!(status(503).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!status(403).is_retryable());
    }

    #[test]
    fn test_only_fetch_errors_are_retryable() {
        let transport = ScrapeError::Fetch(FetchError::Transport {
            url: "https://www.sec.gov".to_string(),
            reason: "connection reset".to_string(),
        });
        assert!(transport.is_retryable());
        assert!(!ScrapeError::Resolution("zzzz".to_string()).is_retryable());
        assert!(!ScrapeError::Template(TemplateError::MissingPlaceholder {
            name: "cik".to_string()
        })
        .is_retryable());
    }

    #[test]
    fn test_template_error_message_keeps_braces() {
        let err = TemplateError::UnknownPlaceholder {
            name: "ticker".to_string(),
        };
        assert_eq!(err.to_string(), "unknown placeholder '{ticker}' in URL template");
    }
}
