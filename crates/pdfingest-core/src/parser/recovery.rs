//! Linear scan rebuilding the cross-reference index when the primary one
//! is missing or damaged.

use std::collections::BTreeMap;

use tracing::debug;

use super::lexer::{find_pattern, is_regular, is_whitespace, Lexer};
use super::object::{Dictionary, Object};
use super::xref::XrefEntry;

#[derive(Debug, Default)]
pub(crate) struct Recovered {
    pub entries: BTreeMap<u32, XrefEntry>,
    /// Trailer keys collected from every `trailer` dictionary and XRef
    /// stream dictionary, later ones overriding earlier ones
    pub trailer: Dictionary,
}

/// Scan the whole buffer for `N G obj` headers and trailers
pub(crate) fn scan(bytes: &[u8]) -> Recovered {
    let mut recovered = Recovered::default();
    // (offset, object number) in file order
    let mut headers: Vec<(usize, u32)> = Vec::new();

    let mut from = 0;
    while let Some(rel) = find_pattern(&bytes[from..], b"obj") {
        let pos = from + rel;
        from = pos + 3;

        // Reject "endobj", "objects" and similar
        if bytes.get(pos + 3).is_some_and(|&b| is_regular(b)) {
            continue;
        }
        if let Some((start, num, gen)) = header_before(bytes, pos) {
            // Last definition wins
            recovered.entries.insert(
                num,
                XrefEntry::InFile {
                    offset: start,
                    generation: gen,
                },
            );
            headers.push((start, num));
        }
    }

    let mut from = 0;
    while let Some(rel) = find_pattern(&bytes[from..], b"trailer") {
        let pos = from + rel;
        from = pos + 7;
        let mut lexer = Lexer::new(bytes, pos + 7);
        if let Ok(Object::Dictionary(dict)) = lexer.parse_object() {
            merge_trailer(&mut recovered.trailer, &dict);
        }
    }

    // Cross-reference stream dictionaries double as trailers
    let mut from = 0;
    while let Some(rel) = find_pattern(&bytes[from..], b"/XRef") {
        let pos = from + rel;
        from = pos + 5;
        if bytes.get(pos + 5).is_some_and(|&b| is_regular(b)) {
            continue;
        }
        let owner = match headers.binary_search_by(|(offset, _)| offset.cmp(&pos)) {
            Ok(i) => Some(i),
            Err(0) => None,
            Err(i) => Some(i - 1),
        };
        if let Some(&(offset, _)) = owner.and_then(|i| headers.get(i)) {
            if let Some(dict) = dict_of_object_at(bytes, offset) {
                if dict.has_type("XRef") {
                    merge_trailer(&mut recovered.trailer, &dict);
                }
            }
        }
    }

    debug!(
        objects = recovered.entries.len(),
        has_root = recovered.trailer.contains_key("Root"),
        "Linear scan finished"
    );
    recovered
}

fn merge_trailer(target: &mut Dictionary, source: &Dictionary) {
    for key in ["Root", "Info", "Encrypt", "ID"] {
        if let Some(value) = source.get(key) {
            target.insert(key, value.clone());
        }
    }
}

/// Walk back from `obj` over `N G ` to the start of the header
fn header_before(bytes: &[u8], obj_pos: usize) -> Option<(usize, u32, u16)> {
    let mut i = obj_pos;

    let skip_ws = |mut i: usize| {
        while i > 0 && is_whitespace(bytes[i - 1]) {
            i -= 1;
        }
        i
    };
    let digits = |end: usize| {
        let mut start = end;
        while start > 0 && bytes[start - 1].is_ascii_digit() {
            start -= 1;
        }
        start
    };

    let gen_end = skip_ws(i);
    if gen_end == i {
        return None;
    }
    let gen_start = digits(gen_end);
    if gen_start == gen_end {
        return None;
    }
    i = gen_start;

    let num_end = skip_ws(i);
    if num_end == i {
        return None;
    }
    let num_start = digits(num_end);
    if num_start == num_end {
        return None;
    }
    if num_start > 0 && is_regular(bytes[num_start - 1]) {
        return None;
    }

    let num = std::str::from_utf8(&bytes[num_start..num_end]).ok()?.parse().ok()?;
    let gen = std::str::from_utf8(&bytes[gen_start..gen_end]).ok()?.parse().ok()?;
    Some((num_start, num, gen))
}

/// Dictionary of the object at `offset` without reading its stream
fn dict_of_object_at(bytes: &[u8], offset: usize) -> Option<Dictionary> {
    let mut lexer = Lexer::new(bytes, offset);
    lexer.next_token().ok()??;
    lexer.next_token().ok()??;
    lexer.expect_keyword(b"obj").ok()?;
    match lexer.parse_object().ok()? {
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}
