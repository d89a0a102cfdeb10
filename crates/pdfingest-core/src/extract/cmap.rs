//! `/ToUnicode` CMap parsing (codespace ranges, bfchar, bfrange)

use std::collections::HashMap;

use super::encoding::decode_utf16be;
use crate::parser::{Lexer, Object, Token};

#[derive(Debug, Clone)]
struct CodespaceRange {
    low: Vec<u8>,
    high: Vec<u8>,
}

impl CodespaceRange {
    fn matches(&self, bytes: &[u8]) -> bool {
        bytes.len() == self.low.len()
            && bytes
                .iter()
                .zip(self.low.iter().zip(&self.high))
                .all(|(b, (lo, hi))| lo <= b && b <= hi)
    }
}

#[derive(Debug, Clone)]
enum RangeTarget {
    /// Destination of the first code; later codes increment the last unit
    Base(Vec<u16>),
    /// One destination per code
    List(Vec<String>),
}

#[derive(Debug, Clone)]
struct BfRange {
    len: usize,
    low: u32,
    high: u32,
    target: RangeTarget,
}

/// A parsed ToUnicode mapping
#[derive(Debug, Clone, Default)]
pub(crate) struct ToUnicode {
    codespace: Vec<CodespaceRange>,
    chars: HashMap<(usize, u32), String>,
    ranges: Vec<BfRange>,
}

fn code_of(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b))
}

fn utf16_units(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            [single] => u16::from(*single),
            _ => 0,
        })
        .collect()
}

impl ToUnicode {
    pub fn parse(data: &[u8]) -> Self {
        let mut cmap = ToUnicode::default();
        let mut lexer = Lexer::new(data, 0);
        let mut operands: Vec<Object> = Vec::new();

        loop {
            let offset = lexer.pos();
            let token = match lexer.next_token() {
                Ok(Some(token)) => token,
                Ok(None) | Err(_) => break,
            };
            match token {
                Token::Keyword(b"endcodespacerange") => {
                    for pair in operands.chunks(2) {
                        if let [Object::String(low), Object::String(high)] = pair {
                            if !low.is_empty() && low.len() == high.len() && low.len() <= 4 {
                                cmap.codespace.push(CodespaceRange {
                                    low: low.clone(),
                                    high: high.clone(),
                                });
                            }
                        }
                    }
                    operands.clear();
                }
                Token::Keyword(b"endbfchar") => {
                    for pair in operands.chunks(2) {
                        if let [Object::String(src), Object::String(dst)] = pair {
                            if !src.is_empty() && src.len() <= 4 {
                                cmap.chars
                                    .insert((src.len(), code_of(src)), decode_utf16be(dst));
                            }
                        }
                    }
                    operands.clear();
                }
                Token::Keyword(b"endbfrange") => {
                    for triple in operands.chunks(3) {
                        cmap.push_range(triple);
                    }
                    operands.clear();
                }
                Token::Keyword(_) => operands.clear(),
                token => match lexer.object_from_token(token, offset, 0) {
                    Ok(obj) => operands.push(obj),
                    Err(_) => operands.clear(),
                },
            }
        }

        cmap
    }

    fn push_range(&mut self, triple: &[Object]) {
        let [Object::String(low), Object::String(high), target] = triple else {
            return;
        };
        if low.is_empty() || low.len() > 4 || low.len() != high.len() {
            return;
        }
        let (low_code, high_code) = (code_of(low), code_of(high));
        if low_code > high_code {
            return;
        }

        let target = match target {
            Object::String(dst) => RangeTarget::Base(utf16_units(dst)),
            Object::Array(items) => RangeTarget::List(
                items
                    .iter()
                    .map(|item| item.as_bytes().map(decode_utf16be).unwrap_or_default())
                    .collect(),
            ),
            _ => return,
        };

        self.ranges.push(BfRange {
            len: low.len(),
            low: low_code,
            high: high_code,
            target,
        });
    }

    pub fn has_codespace(&self) -> bool {
        !self.codespace.is_empty()
    }

    /// Byte length of the code starting at `bytes`, per the codespace ranges
    pub fn code_len(&self, bytes: &[u8]) -> Option<usize> {
        (1..=bytes.len().min(4)).find(|&len| {
            let candidate = &bytes[..len];
            self.codespace.iter().any(|range| range.matches(candidate))
        })
    }

    /// Most common code length among mappings, used without codespace
    pub fn dominant_len(&self) -> usize {
        let two_byte = self.chars.keys().filter(|(len, _)| *len == 2).count()
            + self.ranges.iter().filter(|r| r.len == 2).count();
        let one_byte = self.chars.keys().filter(|(len, _)| *len == 1).count()
            + self.ranges.iter().filter(|r| r.len == 1).count();
        if two_byte > one_byte {
            2
        } else {
            1
        }
    }

    pub fn lookup(&self, len: usize, code: u32) -> Option<String> {
        if let Some(s) = self.chars.get(&(len, code)) {
            return Some(s.clone());
        }
        let range = self
            .ranges
            .iter()
            .rev()
            .find(|r| r.len == len && r.low <= code && code <= r.high)?;
        let delta = code - range.low;
        match &range.target {
            RangeTarget::Base(units) => {
                let mut units = units.clone();
                let last = units.last_mut()?;
                *last = last.wrapping_add(delta as u16);
                Some(char::decode_utf16(units).map(|c| c.unwrap_or('\u{FFFD}')).collect())
            }
            RangeTarget::List(items) => items.get(delta as usize).cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &[u8] = b"/CIDInit /ProcSet findresource begin
12 dict begin
begincmap
/CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def
/CMapName /Adobe-Identity-UCS def
1 begincodespacerange
<0000> <FFFF>
endcodespacerange
2 beginbfchar
<0003> <0020>
<0011> <00660069>
endbfchar
2 beginbfrange
<0024> <0026> <0041>
<0030> <0031> [<0078> <D83DDE00>]
endbfrange
endcmap
CMapName currentdict /CMap defineresource pop
end
end";

    #[test]
    fn test_bfchar_and_ligature() {
        let cmap = ToUnicode::parse(SAMPLE);
        assert_eq!(cmap.lookup(2, 0x0003).as_deref(), Some(" "));
        assert_eq!(cmap.lookup(2, 0x0011).as_deref(), Some("fi"));
    }

    #[test]
    fn test_bfrange_increment_and_array() {
        let cmap = ToUnicode::parse(SAMPLE);
        assert_eq!(cmap.lookup(2, 0x0025).as_deref(), Some("B"));
        assert_eq!(cmap.lookup(2, 0x0026).as_deref(), Some("C"));
        assert_eq!(cmap.lookup(2, 0x0031).as_deref(), Some("😀"));
        assert_eq!(cmap.lookup(2, 0x0027), None);
    }

    #[test]
    fn test_codespace_lengths() {
        let cmap = ToUnicode::parse(SAMPLE);
        assert!(cmap.has_codespace());
        assert_eq!(cmap.code_len(&[0x00, 0x24, 0x00]), Some(2));
        assert_eq!(cmap.code_len(&[0x00]), None);
        assert_eq!(cmap.dominant_len(), 2);
    }

    #[test]
    fn test_garbage_does_not_panic() {
        let cmap = ToUnicode::parse(b"begincmap <00 endbfchar ] >> (unterminated");
        assert!(!cmap.has_codespace());
    }
}
