//! Cross-reference index: classic `xref` tables and cross-reference
//! streams, following `/Prev` chains from `startxref`.
//!
//! ```text
//! xref
//! 0 4
//! 0000000000 65535 f
//! 0000000015 00000 n
//! ...
//! trailer
//! << /Root 1 0 R /Size 4 >>
//! startxref
//! OFFSET
//! %%EOF
//! ```

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use super::filters::{apply_filters, filter_chain};
use super::lexer::{parse_indirect_object, rfind_pattern, Lexer, Token};
use super::object::{Dictionary, Object};

/// Where an object lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum XrefEntry {
    Free,
    InFile { offset: usize, generation: u16 },
    InStream { stream: u32, index: u32 },
}

/// Merged index from all sections reachable from `startxref`
#[derive(Debug, Default)]
pub(crate) struct XrefIndex {
    pub entries: BTreeMap<u32, XrefEntry>,
    pub trailer: Dictionary,
    /// Non-fatal problems met while reading older sections
    pub notes: Vec<String>,
}

/// Upper bound on sections followed through `/Prev`
const MAX_SECTIONS: usize = 512;

/// Find startxref offset from end of file
pub(crate) fn find_startxref(bytes: &[u8]) -> Option<usize> {
    let search_start = bytes.len().saturating_sub(1024);
    let tail = &bytes[search_start..];
    let pos = rfind_pattern(tail, b"startxref")?;

    let mut lexer = Lexer::new(bytes, search_start + pos + b"startxref".len());
    match lexer.next_token() {
        Ok(Some(Token::Integer(offset))) if offset >= 0 => usize::try_from(offset).ok(),
        _ => None,
    }
}

/// Object number and generation if an `N G obj` header starts at `offset`
pub(crate) fn object_header_at(bytes: &[u8], offset: usize) -> Option<(u32, u16)> {
    if offset >= bytes.len() {
        return None;
    }
    let mut lexer = Lexer::new(bytes, offset);
    match (lexer.next_token(), lexer.next_token(), lexer.next_token()) {
        (
            Ok(Some(Token::Integer(num))),
            Ok(Some(Token::Integer(gen))),
            Ok(Some(Token::Keyword(b"obj"))),
        ) if (0..=i64::from(u32::MAX)).contains(&num) && (0..=i64::from(u16::MAX)).contains(&gen) => {
            Some((num as u32, gen as u16))
        }
        _ => None,
    }
}

/// Read the index starting at `startxref`.
///
/// An error means the newest section is unusable; damage in older
/// sections only ends the chain early and is recorded in `notes`.
pub(crate) fn read_index(bytes: &[u8], header_offset: usize) -> Result<XrefIndex, String> {
    let start = find_startxref(bytes).ok_or_else(|| "startxref not found".to_string())?;

    let mut index = XrefIndex::default();
    let mut visited = HashSet::new();
    let mut next = Some(start);

    while let Some(offset) = next.take() {
        if !visited.insert(offset) {
            index.notes.push(format!("cross-reference /Prev chain loops at offset {}", offset));
            break;
        }
        if visited.len() > MAX_SECTIONS {
            index.notes.push("cross-reference chain too long".to_string());
            break;
        }

        let section = match read_section_at(bytes, offset, header_offset) {
            Ok(section) => section,
            Err(e) if visited.len() == 1 => return Err(e),
            Err(e) => {
                debug!(offset, error = %e, "Stopping at damaged older xref section");
                index.notes.push(format!("older cross-reference section unreadable: {}", e));
                break;
            }
        };

        // Newest entry wins, so older sections only fill gaps
        for (num, entry) in section.entries {
            index.entries.entry(num).or_insert(entry);
        }
        for (key, value) in section.trailer.iter() {
            if key != "Prev" && key != "XRefStm" && !index.trailer.contains_key(key) {
                index.trailer.insert(key.clone(), value.clone());
            }
        }

        next = section
            .trailer
            .get("Prev")
            .and_then(Object::as_i64)
            .filter(|&p| p >= 0)
            .map(|p| p as usize);
    }

    if index.entries.is_empty() {
        return Err("cross-reference index is empty".to_string());
    }
    Ok(index)
}

struct Section {
    entries: BTreeMap<u32, XrefEntry>,
    trailer: Dictionary,
}

fn read_section_at(bytes: &[u8], offset: usize, header_offset: usize) -> Result<Section, String> {
    match read_section(bytes, offset) {
        Ok(section) => Ok(section),
        // Offsets written relative to the header when junk precedes it
        Err(_) if header_offset > 0 => read_section(bytes, offset + header_offset),
        Err(e) => Err(e),
    }
}

fn read_section(bytes: &[u8], offset: usize) -> Result<Section, String> {
    if offset >= bytes.len() {
        return Err(format!("xref offset {} beyond end of file", offset));
    }

    let mut lexer = Lexer::new(bytes, offset);
    if lexer.eat_keyword(b"xref") {
        let mut section = parse_xref_table(&mut lexer)?;

        // Hybrid file: the stream supplements entries the table marks free
        if let Some(stm_offset) = section
            .trailer
            .get("XRefStm")
            .and_then(Object::as_i64)
            .filter(|&o| o >= 0)
        {
            match parse_xref_stream(bytes, stm_offset as usize) {
                Ok(stm) => {
                    for (num, entry) in stm.entries {
                        match section.entries.get(&num) {
                            None | Some(XrefEntry::Free) => {
                                section.entries.insert(num, entry);
                            }
                            Some(_) => {}
                        }
                    }
                }
                Err(e) => debug!(error = %e, "Ignoring unreadable /XRefStm"),
            }
        }
        return Ok(section);
    }

    parse_xref_stream(bytes, offset)
}

/// Parse table subsections up to and including the trailer
fn parse_xref_table(lexer: &mut Lexer<'_>) -> Result<Section, String> {
    let mut entries = BTreeMap::new();

    loop {
        let save = lexer.pos();
        match lexer.next_token() {
            Ok(Some(Token::Keyword(b"trailer"))) => break,
            Ok(Some(Token::Integer(start))) => {
                let count = match lexer.next_token() {
                    Ok(Some(Token::Integer(count))) if count >= 0 => count,
                    _ => return Err(format!("bad xref subsection header at offset {}", save)),
                };
                if start < 0 || start > i64::from(u32::MAX) {
                    return Err(format!("bad xref subsection start at offset {}", save));
                }
                for i in 0..count {
                    let entry_offset = lexer.pos();
                    let (field1, field2, kind) =
                        match (lexer.next_token(), lexer.next_token(), lexer.next_token()) {
                            (
                                Ok(Some(Token::Integer(a))),
                                Ok(Some(Token::Integer(b))),
                                Ok(Some(Token::Keyword(k))),
                            ) => (a, b, k),
                            _ => return Err(format!("bad xref entry at offset {}", entry_offset)),
                        };
                    let Some(num) = start.checked_add(i).and_then(|n| u32::try_from(n).ok()) else {
                        break;
                    };
                    let entry = match kind {
                        b"n" if field1 > 0 => XrefEntry::InFile {
                            offset: field1 as usize,
                            generation: field2.clamp(0, i64::from(u16::MAX)) as u16,
                        },
                        b"n" | b"f" => XrefEntry::Free,
                        _ => return Err(format!("bad xref entry type at offset {}", entry_offset)),
                    };
                    // Within one table the first entry for a number is kept
                    entries.entry(num).or_insert(entry);
                }
            }
            _ => return Err(format!("expected xref subsection or trailer at offset {}", save)),
        }
    }

    match lexer.parse_object() {
        Ok(Object::Dictionary(trailer)) => Ok(Section { entries, trailer }),
        Ok(other) => Err(format!("trailer is a {}", other.type_name())),
        Err(e) => Err(format!("unreadable trailer: {}", e)),
    }
}

/// Parse a cross-reference stream object at `offset`
fn parse_xref_stream(bytes: &[u8], offset: usize) -> Result<Section, String> {
    let parsed = parse_indirect_object(bytes, offset, &mut |_| None)
        .map_err(|e| format!("no xref at offset {}: {}", offset, e))?;
    let Object::Stream(stream) = parsed.object else {
        return Err(format!("object at offset {} is not a stream", offset));
    };
    if !stream.dict.has_type("XRef") {
        return Err(format!("stream at offset {} is not /Type /XRef", offset));
    }

    let chain = filter_chain(&stream.dict, |o| o);
    let data = apply_filters(&stream.data, &chain).map_err(|e| format!("xref stream: {}", e))?;

    let widths: Vec<usize> = stream
        .dict
        .get("W")
        .and_then(Object::as_array)
        .map(|w| {
            w.iter()
                .map(|x| x.as_i64().unwrap_or(0).clamp(0, 8) as usize)
                .collect()
        })
        .unwrap_or_default();
    if widths.len() != 3 {
        return Err("xref stream /W must have three entries".to_string());
    }
    let row_len: usize = widths.iter().sum();
    if row_len == 0 {
        return Err("xref stream /W is all zero".to_string());
    }

    let size = stream.dict.get("Size").and_then(Object::as_i64).unwrap_or(0);
    let ranges: Vec<(i64, i64)> = match stream.dict.get("Index").and_then(Object::as_array) {
        Some(items) => items
            .chunks(2)
            .filter_map(|pair| match pair {
                [a, b] => Some((a.as_i64()?, b.as_i64()?)),
                _ => None,
            })
            .collect(),
        None => vec![(0, size)],
    };

    let mut entries = BTreeMap::new();
    let mut rows = data.chunks_exact(row_len);
    'ranges: for (start, count) in ranges {
        for i in 0..count.max(0) {
            let Some(row) = rows.next() else {
                break 'ranges;
            };
            let Some(num) = start.checked_add(i).and_then(|n| u32::try_from(n).ok()) else {
                continue;
            };

            let (f1, rest) = row.split_at(widths[0]);
            let (f2, f3) = rest.split_at(widths[1]);
            let kind = if widths[0] == 0 { 1 } else { be_uint(f1) };
            let entry = match kind {
                0 => XrefEntry::Free,
                1 => XrefEntry::InFile {
                    offset: be_uint(f2) as usize,
                    generation: be_uint(f3).min(u64::from(u16::MAX)) as u16,
                },
                2 => XrefEntry::InStream {
                    stream: be_uint(f2).min(u64::from(u32::MAX)) as u32,
                    index: be_uint(f3).min(u64::from(u32::MAX)) as u32,
                },
                // Unknown types are treated as null references
                _ => continue,
            };
            entries.entry(num).or_insert(entry);
        }
    }

    Ok(Section {
        entries,
        trailer: stream.dict,
    })
}

fn be_uint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}
