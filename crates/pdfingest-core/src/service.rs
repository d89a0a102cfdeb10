//! Extraction service facade
//!
//! The single entry point the web shell calls: fingerprint the bytes, then
//! let the cache decide whether to parse and extract or to reuse a result.

use std::sync::Arc;

use tracing::{info, info_span, warn};

use crate::cache::{CacheStats, ResultCache};
use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::extract::{ExtractionResult, Extractor};
use crate::parser::{self, ParserOptions};
use crate::source::{Fingerprint, RawDocument};

/// Thread-safe extraction service; share it behind an `Arc` or by reference
pub struct ExtractionService {
    parser_options: ParserOptions,
    extractor: Extractor,
    cache: ResultCache,
}

impl Default for ExtractionService {
    fn default() -> Self {
        Self::new(IngestConfig::default())
    }
}

impl ExtractionService {
    pub fn new(config: IngestConfig) -> Self {
        Self {
            parser_options: config.parser,
            extractor: Extractor::new(config.extraction),
            cache: ResultCache::new(config.cache),
        }
    }

    /// Extract text, metadata and page summaries from PDF bytes
    pub fn extract(&self, bytes: &[u8]) -> Result<Arc<ExtractionResult>, IngestError> {
        self.extract_document(&RawDocument::new(bytes))
    }

    /// Extract from a pre-built source, reusing its fingerprint
    pub fn extract_document(&self, document: &RawDocument) -> Result<Arc<ExtractionResult>, IngestError> {
        let fingerprint = document.fingerprint();
        let span = info_span!(
            "extract",
            fingerprint = %fingerprint.short(),
            content_id = document.content_id().unwrap_or("-"),
            bytes = document.len()
        );
        let _enter = span.enter();

        let outcome = self.cache.get_or_compute(fingerprint, || {
            info!("Parsing document");
            let doc = parser::parse(document.bytes(), &self.parser_options)?;
            Ok(self.extractor.extract(&doc, &fingerprint))
        });

        match outcome {
            Ok(result) => {
                info!(
                    pages = result.pages.len(),
                    unreadable = result.unreadable_pages().len(),
                    recovered = result.recovered,
                    "Extraction ready"
                );
                Ok(result)
            }
            Err(e) => {
                let err = IngestError::from(e);
                warn!(error = %err, "Extraction failed");
                Err(err)
            }
        }
    }

    /// Drop a cached result so the next request recomputes it
    pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        self.cache.invalidate(fingerprint)
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_service_is_send_and_sync() {
        assert_send_sync::<ExtractionService>();
        assert_send_sync::<Arc<ExtractionResult>>();
    }

    #[test]
    fn test_empty_input_is_malformed_header() {
        let service = ExtractionService::default();
        let err = service.extract(b"").unwrap_err();
        assert_eq!(err.parse_error().map(|e| e.kind()), Some("MALFORMED_HEADER"));
        assert!(service.cache().is_empty());
    }
}
