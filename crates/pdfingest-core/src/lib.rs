//! PDF ingestion core
//!
//! Parses uploaded PDF bytes, recovers text, metadata and per-page
//! summaries, and caches results by content fingerprint.
//!
//! - [`RawDocument`] / [`Fingerprint`]: the byte source and its cache key
//! - [`parser::parse`]: tolerant structural parser with linear-scan recovery
//! - [`Extractor`]: text lines, metadata, page summaries and diagnostics
//! - [`ResultCache`]: LRU of results with single-flight computation
//! - [`ExtractionService`]: the facade tying them together
//!
//! ```no_run
//! use pdfingest_core::{ExtractionService, IngestConfig};
//!
//! let service = ExtractionService::new(IngestConfig::default());
//! let bytes = std::fs::read("report.pdf").unwrap();
//! let result = service.extract(&bytes).unwrap();
//! for page in &result.pages {
//!     println!("{}: {}", page.page_number, page.text());
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod extract;
pub mod parser;
pub mod service;
pub mod source;

pub use cache::{CacheConfig, CacheStats, ResultCache};
pub use config::IngestConfig;
pub use error::{CacheError, ExtractionDiagnostic, IngestError, ParseError};
pub use extract::{ExtractionOptions, ExtractionResult, Extractor, PageEntry};
pub use parser::{parse, ParsedDocument, ParserOptions};
pub use service::ExtractionService;
pub use source::{Fingerprint, RawDocument};

/// Parse PDF bytes and return the number of page slots
pub fn get_page_count(bytes: &[u8]) -> Result<usize, ParseError> {
    let doc = parse(bytes, &ParserOptions::default())?;
    Ok(doc.pages().len())
}

/// Parse and extract without caching
pub fn extract_uncached(bytes: &[u8], config: &IngestConfig) -> Result<ExtractionResult, ParseError> {
    let doc = parse(bytes, &config.parser)?;
    Ok(Extractor::new(config.extraction.clone()).extract(&doc, &Fingerprint::of(bytes)))
}
