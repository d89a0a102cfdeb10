//! Font handling for text extraction: code splitting, Unicode mapping and
//! glyph widths

use std::collections::HashMap;

use tracing::debug;

use super::cmap::ToUnicode;
use super::encoding::{decode_utf16be, glyph_name_to_char, win_ansi_char};
use crate::parser::{Dictionary, Object, ParsedDocument};

/// Width used when a font gives none, in thousandths of text space
const DEFAULT_GLYPH_WIDTH: f64 = 500.0;

/// Largest `/W` range expanded into the width table
const MAX_WIDTH_RANGE: u32 = 1 << 16;

/// One shown glyph
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Glyph {
    pub text: String,
    /// Advance in thousandths of text space
    pub width: f64,
    /// Single-byte code 32, which also receives word spacing
    pub is_space: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct Font {
    composite: bool,
    first_char: u32,
    widths: Vec<f64>,
    cid_widths: HashMap<u32, f64>,
    default_width: f64,
    differences: HashMap<u8, char>,
    to_unicode: Option<ToUnicode>,
}

impl Default for Font {
    /// Stand-in for a missing or unreadable font resource
    fn default() -> Self {
        Self {
            composite: false,
            first_char: 0,
            widths: Vec::new(),
            cid_widths: HashMap::new(),
            default_width: DEFAULT_GLYPH_WIDTH,
            differences: HashMap::new(),
            to_unicode: None,
        }
    }
}

impl Font {
    pub fn load(doc: &ParsedDocument<'_>, dict: &Dictionary) -> Self {
        let mut font = Font::default();

        font.to_unicode = doc
            .dict_get(dict, "ToUnicode")
            .and_then(Object::as_stream)
            .and_then(|stream| match doc.decode_stream(stream) {
                Ok(data) => Some(ToUnicode::parse(&data)),
                Err(e) => {
                    debug!(error = %e, "Ignoring undecodable ToUnicode stream");
                    None
                }
            });

        if dict.get_name("Subtype") == Some("Type0") {
            font.composite = true;
            font.default_width = 1000.0;
            let descendant = doc
                .dict_get(dict, "DescendantFonts")
                .and_then(Object::as_array)
                .and_then(|fonts| fonts.first())
                .map(|first| doc.resolve(first))
                .and_then(Object::as_dict);
            if let Some(descendant) = descendant {
                if let Some(dw) = doc.dict_get(descendant, "DW").and_then(Object::as_f64) {
                    font.default_width = dw;
                }
                if let Some(w) = doc.dict_get(descendant, "W").and_then(Object::as_array) {
                    font.cid_widths = parse_cid_widths(doc, w);
                }
            }
            return font;
        }

        font.first_char = doc
            .dict_get(dict, "FirstChar")
            .and_then(Object::as_i64)
            .map(|n| n.clamp(0, 255) as u32)
            .unwrap_or(0);
        if let Some(widths) = doc.dict_get(dict, "Widths").and_then(Object::as_array) {
            font.widths = widths
                .iter()
                .map(|w| doc.resolve(w).as_f64().unwrap_or(0.0))
                .collect();
        }
        if let Some(missing) = doc
            .dict_get(dict, "FontDescriptor")
            .and_then(Object::as_dict)
            .and_then(|fd| doc.dict_get(fd, "MissingWidth"))
            .and_then(Object::as_f64)
            .filter(|w| *w > 0.0)
        {
            font.default_width = missing;
        }

        if let Some(encoding) = doc.dict_get(dict, "Encoding").and_then(Object::as_dict) {
            if let Some(differences) = doc.dict_get(encoding, "Differences").and_then(Object::as_array) {
                font.differences = parse_differences(differences);
            }
        }

        font
    }

    /// Split a shown string into glyphs
    pub fn decode(&self, bytes: &[u8]) -> Vec<Glyph> {
        if self.to_unicode.is_none() && !self.composite {
            if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
                return decode_utf16be(rest)
                    .chars()
                    .map(|c| Glyph {
                        text: c.to_string(),
                        width: self.default_width,
                        is_space: c == ' ',
                    })
                    .collect();
            }
        }

        let mut glyphs = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            let rest = &bytes[i..];
            let len = self.code_len(rest).min(rest.len()).max(1);
            let code = rest[..len]
                .iter()
                .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
            i += len;

            glyphs.push(Glyph {
                text: self.unicode(len, code),
                width: self.width(code),
                is_space: len == 1 && code == 32,
            });
        }
        glyphs
    }

    fn code_len(&self, bytes: &[u8]) -> usize {
        if !self.composite {
            return 1;
        }
        self.to_unicode
            .as_ref()
            .and_then(|cmap| cmap.code_len(bytes))
            .unwrap_or(2)
    }

    fn unicode(&self, len: usize, code: u32) -> String {
        if let Some(text) = self.to_unicode.as_ref().and_then(|cmap| cmap.lookup(len, code)) {
            return text;
        }
        if self.composite || len != 1 {
            return '\u{FFFD}'.to_string();
        }
        let byte = code as u8;
        self.differences
            .get(&byte)
            .copied()
            .unwrap_or_else(|| win_ansi_char(byte))
            .to_string()
    }

    fn width(&self, code: u32) -> f64 {
        if self.composite {
            return self.cid_widths.get(&code).copied().unwrap_or(self.default_width);
        }
        code.checked_sub(self.first_char)
            .and_then(|index| self.widths.get(index as usize))
            .copied()
            .filter(|w| *w > 0.0)
            .unwrap_or(self.default_width)
    }
}

/// `/Differences [code /name /name ... code /name ...]`
fn parse_differences(items: &[Object]) -> HashMap<u8, char> {
    let mut map = HashMap::new();
    let mut code: Option<u32> = None;
    for item in items {
        match item {
            Object::Integer(n) => code = u32::try_from(*n).ok(),
            Object::Name(name) => {
                if let Some(c) = code {
                    if let (Ok(byte), Some(ch)) = (u8::try_from(c), glyph_name_to_char(name)) {
                        map.insert(byte, ch);
                    }
                    code = c.checked_add(1);
                }
            }
            _ => {}
        }
    }
    map
}

/// `/W [c [w1 w2 ...] c_first c_last w ...]`
fn parse_cid_widths(doc: &ParsedDocument<'_>, items: &[Object]) -> HashMap<u32, f64> {
    let mut widths = HashMap::new();
    let values: Vec<&Object> = items.iter().map(|o| doc.resolve(o)).collect();
    let mut i = 0;

    while i < values.len() {
        let Some(first) = values[i].as_i64().and_then(|n| u32::try_from(n).ok()) else {
            break;
        };
        match values.get(i + 1) {
            Some(Object::Array(list)) => {
                for (offset, w) in list.iter().enumerate() {
                    if let Some(w) = doc.resolve(w).as_f64() {
                        widths.insert(first.saturating_add(offset as u32), w);
                    }
                }
                i += 2;
            }
            Some(last) => {
                let (Some(last), Some(w)) = (
                    last.as_i64().and_then(|n| u32::try_from(n).ok()),
                    values.get(i + 2).and_then(|w| w.as_f64()),
                ) else {
                    break;
                };
                let last = last.min(first.saturating_add(MAX_WIDTH_RANGE));
                for cid in first..=last {
                    widths.insert(cid, w);
                }
                i += 3;
            }
            None => break,
        }
    }

    widths
}
