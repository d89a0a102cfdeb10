//! Extraction result types and text quality analysis

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ExtractionDiagnostic;

/// Pages scanned to decide whether a document carries any text
const SCANNED_PROBE_PAGES: usize = 4;

/// One page of an extraction result
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageEntry {
    /// 1-based
    pub page_number: usize,
    pub lines: Vec<String>,
    pub width: f64,
    pub height: f64,
    pub rotation: i64,
    pub image_count: usize,
    pub char_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<ExtractionDiagnostic>,
}

impl PageEntry {
    /// Lines joined with newlines
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn is_unreadable(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| matches!(d, ExtractionDiagnostic::PageUnreadable { .. }))
    }
}

/// Complete extraction result, shared read-only once produced
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Lowercase hex SHA-256 of the source bytes
    pub fingerprint: String,
    pub pages: Vec<PageEntry>,
    pub metadata: BTreeMap<String, String>,
    pub declared_page_count: usize,
    /// Whether the cross-reference index was rebuilt by a linear scan
    pub recovered: bool,
    pub warnings: Vec<String>,
}

impl ExtractionResult {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page_texts(&self) -> Vec<String> {
        self.pages.iter().map(PageEntry::text).collect()
    }

    /// All page texts separated by blank lines
    pub fn text(&self) -> String {
        self.page_texts().join("\n\n")
    }

    /// 1-based numbers of pages carrying a `PageUnreadable` diagnostic
    pub fn unreadable_pages(&self) -> Vec<usize> {
        self.pages
            .iter()
            .filter(|p| p.is_unreadable())
            .map(|p| p.page_number)
            .collect()
    }

    /// Pages exist, but none of the first few carries text
    pub fn is_scanned(&self) -> bool {
        !self.pages.is_empty()
            && self
                .pages
                .iter()
                .take(SCANNED_PROBE_PAGES)
                .all(|p| p.char_count == 0)
    }

    /// Page most likely to hold a figure rather than prose.
    ///
    /// Pages after the first are scored on images and text length; the
    /// first page is assumed to be a cover. Scanned documents have no text
    /// to score and yield `None`.
    pub fn likely_figure_page(&self) -> Option<usize> {
        match self.pages.len() {
            0 => return None,
            1 => return Some(1),
            _ => {}
        }
        if self.is_scanned() {
            return None;
        }

        let mut best_page = 2;
        let mut best_score = -1i64;
        for page in self.pages.iter().skip(1) {
            let mut score = 0i64;
            if page.image_count > 0 {
                score += 100;
            }
            if page.char_count < 50 {
                score += 50;
            } else if page.char_count < 200 {
                score += 20;
            } else if page.char_count > 500 {
                score -= 30;
            }
            if score > best_score {
                best_score = score;
                best_page = page.page_number;
            }
        }
        Some(best_page)
    }

    /// Bytes of extracted text, the cache's size measure
    pub fn text_bytes(&self) -> usize {
        self.pages
            .iter()
            .flat_map(|p| p.lines.iter())
            .map(String::len)
            .sum()
    }
}

/// Result of text quality analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextQuality {
    pub is_valid: bool,
    pub garbage_ratio: f64,
    pub encoding_issues_detected: bool,
    pub private_use_area_ratio: f64,
    pub details: String,
}

/// Analyze text for quality issues
pub fn analyze_text_quality(text: &str) -> TextQuality {
    let total_chars = text.chars().count();
    if total_chars == 0 {
        return TextQuality {
            is_valid: false,
            garbage_ratio: 1.0,
            encoding_issues_detected: false,
            private_use_area_ratio: 0.0,
            details: "No characters".to_string(),
        };
    }

    let mut replacement_chars = 0;
    let mut private_use_chars = 0;
    let mut control_chars = 0;

    for c in text.chars() {
        match c {
            '\u{FFFD}' => replacement_chars += 1,
            '\u{E000}'..='\u{F8FF}' => private_use_chars += 1,
            '\u{0000}'..='\u{001F}' if c != '\n' && c != '\r' && c != '\t' => {
                control_chars += 1;
            }
            _ => {}
        }
    }

    let garbage_count = replacement_chars + private_use_chars + control_chars;
    let garbage_ratio = garbage_count as f64 / total_chars as f64;
    let pua_ratio = private_use_chars as f64 / total_chars as f64;

    const GARBAGE_THRESHOLD: f64 = 0.15;
    const PUA_THRESHOLD: f64 = 0.10;

    if garbage_ratio > GARBAGE_THRESHOLD {
        return TextQuality {
            is_valid: false,
            garbage_ratio,
            encoding_issues_detected: true,
            private_use_area_ratio: pua_ratio,
            details: format!(
                "High garbage ratio: {:.1}% (replacement: {}, PUA: {}, control: {})",
                garbage_ratio * 100.0,
                replacement_chars,
                private_use_chars,
                control_chars
            ),
        };
    }

    if pua_ratio > PUA_THRESHOLD {
        return TextQuality {
            is_valid: false,
            garbage_ratio,
            encoding_issues_detected: true,
            private_use_area_ratio: pua_ratio,
            details: format!(
                "High Private Use Area ratio: {:.1}% - likely encoding failure",
                pua_ratio * 100.0
            ),
        };
    }

    TextQuality {
        is_valid: true,
        garbage_ratio,
        encoding_issues_detected: false,
        private_use_area_ratio: pua_ratio,
        details: format!("Valid output: {:.2}% garbage", garbage_ratio * 100.0),
    }
}
