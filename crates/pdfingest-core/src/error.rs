use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structural failures that prevent building a usable page tree.
///
/// Cloneable so that every caller waiting on a shared computation can
/// receive the same outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    #[error("Broken cross-reference index: {0}")]
    BrokenCrossReference(String),

    #[error("Encrypted documents are not supported: {0}")]
    UnsupportedEncryption(String),

    #[error("Truncated stream: {0}")]
    TruncatedStream(String),

    #[error("Cyclic object reference: {0}")]
    CyclicObjectReference(String),
}

impl ParseError {
    /// Stable machine-readable kind, for the web shell's error mapping
    pub fn kind(&self) -> &'static str {
        match self {
            ParseError::MalformedHeader(_) => "MALFORMED_HEADER",
            ParseError::BrokenCrossReference(_) => "BROKEN_CROSS_REFERENCE",
            ParseError::UnsupportedEncryption(_) => "UNSUPPORTED_ENCRYPTION",
            ParseError::TruncatedStream(_) => "TRUNCATED_STREAM",
            ParseError::CyclicObjectReference(_) => "CYCLIC_OBJECT_REFERENCE",
        }
    }
}

/// Non-fatal, page-local problems attached to an extraction result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExtractionDiagnostic {
    PageUnreadable { reason: String },
}

impl ExtractionDiagnostic {
    pub fn page_unreadable(reason: impl Into<String>) -> Self {
        ExtractionDiagnostic::PageUnreadable {
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Extraction failed: {0}")]
    ComputationFailed(#[source] ParseError),

    #[error("Shared computation was abandoned before producing a result")]
    Abandoned,
}

/// Error returned by the extraction service facade
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Cache(CacheError),
}

impl IngestError {
    pub fn parse_error(&self) -> Option<&ParseError> {
        match self {
            IngestError::Parse(e) => Some(e),
            IngestError::Cache(_) => None,
        }
    }
}

impl From<CacheError> for IngestError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::ComputationFailed(parse) => IngestError::Parse(parse),
            other => IngestError::Cache(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_computation_failure_unwraps_to_parse_error() {
        let err: IngestError =
            CacheError::ComputationFailed(ParseError::MalformedHeader("empty".into())).into();
        assert_eq!(err.parse_error().map(|e| e.kind()), Some("MALFORMED_HEADER"));
    }

    #[test]
    fn test_abandoned_stays_cache_error() {
        let err: IngestError = CacheError::Abandoned.into();
        assert!(err.parse_error().is_none());
        assert!(err.to_string().contains("abandoned"));
    }

    #[test]
    fn test_diagnostic_serializes_with_tag() {
        let diag = ExtractionDiagnostic::page_unreadable("bad stream");
        let json = serde_json::to_string(&diag).unwrap();
        assert_eq!(json, r#"{"type":"PageUnreadable","reason":"bad stream"}"#);
    }
}
