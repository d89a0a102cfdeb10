//! Content extractor
//!
//! Walks a [`ParsedDocument`] page by page and produces an
//! [`ExtractionResult`]: text lines, metadata and per-page summaries.
//! Extraction never fails outright; a page that cannot be read yields an
//! empty entry with a `PageUnreadable` diagnostic.

mod cmap;
mod content;
mod encoding;
mod fonts;
mod metadata;
mod page;
mod text;
mod types;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::parser::ParsedDocument;
use crate::source::Fingerprint;

pub use encoding::decode_text_string;
pub use types::{analyze_text_quality, ExtractionResult, PageEntry, TextQuality};

use page::{extract_page, FontCache};

/// Extraction tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionOptions {
    /// Horizontal gap between runs, in font sizes, above which a space is
    /// inserted
    pub adjacency_threshold: f64,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            adjacency_threshold: 0.15,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Extractor {
    options: ExtractionOptions,
}

impl Extractor {
    pub fn new(options: ExtractionOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ExtractionOptions {
        &self.options
    }

    pub fn extract(&self, doc: &ParsedDocument<'_>, fingerprint: &Fingerprint) -> ExtractionResult {
        let mut fonts = FontCache::new();
        let pages: Vec<PageEntry> = doc
            .pages()
            .iter()
            .enumerate()
            .map(|(index, node)| extract_page(doc, node, index + 1, &mut fonts, self.options.adjacency_threshold))
            .collect();

        let metadata = metadata::extract_metadata(doc);

        let mut result = ExtractionResult {
            fingerprint: fingerprint.to_hex(),
            pages,
            metadata,
            declared_page_count: doc.declared_page_count(),
            recovered: doc.is_recovered(),
            warnings: Vec::new(),
        };

        let text = result.text();
        if !text.trim().is_empty() {
            let quality = analyze_text_quality(&text);
            if !quality.is_valid {
                warn!(fingerprint = %fingerprint.short(), details = %quality.details, "Poor text quality");
                result.warnings.push(format!("text quality: {}", quality.details));
            }
        }
        // Collected last so notes raised while walking pages are included
        result.warnings.extend(doc.warnings());

        debug!(
            pages = result.pages.len(),
            unreadable = result.unreadable_pages().len(),
            fonts = fonts.len(),
            "Extraction finished"
        );
        result
    }
}
