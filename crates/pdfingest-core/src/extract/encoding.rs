//! Single-byte encodings and glyph names

/// WinAnsiEncoding differs from Latin-1 only in 0x80..=0x9F
#[rustfmt::skip]
const WIN_ANSI_80_9F: [Option<char>; 32] = [
    Some('\u{20AC}'), None, Some('\u{201A}'), Some('\u{0192}'),
    Some('\u{201E}'), Some('\u{2026}'), Some('\u{2020}'), Some('\u{2021}'),
    Some('\u{02C6}'), Some('\u{2030}'), Some('\u{0160}'), Some('\u{2039}'),
    Some('\u{0152}'), None, Some('\u{017D}'), None,
    None, Some('\u{2018}'), Some('\u{2019}'), Some('\u{201C}'),
    Some('\u{201D}'), Some('\u{2022}'), Some('\u{2013}'), Some('\u{2014}'),
    Some('\u{02DC}'), Some('\u{2122}'), Some('\u{0161}'), Some('\u{203A}'),
    Some('\u{0153}'), None, Some('\u{017E}'), Some('\u{0178}'),
];

/// PDFDocEncoding 0x18..=0x1F
const PDF_DOC_18_1F: [char; 8] = [
    '\u{02D8}', '\u{02C7}', '\u{02C6}', '\u{02D9}', '\u{02DD}', '\u{02DB}', '\u{02DA}', '\u{02DC}',
];

/// PDFDocEncoding 0x80..=0xA0
#[rustfmt::skip]
const PDF_DOC_80_A0: [Option<char>; 33] = [
    Some('\u{2022}'), Some('\u{2020}'), Some('\u{2021}'), Some('\u{2026}'),
    Some('\u{2014}'), Some('\u{2013}'), Some('\u{0192}'), Some('\u{2044}'),
    Some('\u{2039}'), Some('\u{203A}'), Some('\u{2212}'), Some('\u{2030}'),
    Some('\u{201E}'), Some('\u{201C}'), Some('\u{201D}'), Some('\u{2018}'),
    Some('\u{2019}'), Some('\u{201A}'), Some('\u{2122}'), Some('\u{FB01}'),
    Some('\u{FB02}'), Some('\u{0141}'), Some('\u{0152}'), Some('\u{0160}'),
    Some('\u{0178}'), Some('\u{017D}'), Some('\u{0131}'), Some('\u{0142}'),
    Some('\u{0153}'), Some('\u{0161}'), Some('\u{017E}'), None,
    Some('\u{20AC}'),
];

/// Character for a byte under WinAnsiEncoding, falling back to Latin-1
pub(crate) fn win_ansi_char(code: u8) -> char {
    match code {
        0x80..=0x9F => WIN_ANSI_80_9F[usize::from(code - 0x80)].unwrap_or(char::from(code)),
        _ => char::from(code),
    }
}

fn pdf_doc_char(code: u8) -> char {
    match code {
        0x18..=0x1F => PDF_DOC_18_1F[usize::from(code - 0x18)],
        0x80..=0xA0 => PDF_DOC_80_A0[usize::from(code - 0x80)].unwrap_or('\u{FFFD}'),
        _ => char::from(code),
    }
}

/// Decode a text string (document info values, outline titles):
/// UTF-16BE or UTF-8 when a byte order mark says so, PDFDocEncoding
/// otherwise.
pub fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return decode_utf16be(rest);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    bytes.iter().map(|&b| pdf_doc_char(b)).collect()
}

/// Decode UTF-16BE, replacing unpaired surrogates and a dangling odd byte
pub(crate) fn decode_utf16be(bytes: &[u8]) -> String {
    let units = bytes
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            _ => 0xFFFD,
        });
    char::decode_utf16(units)
        .map(|c| c.unwrap_or('\u{FFFD}'))
        .collect()
}

#[rustfmt::skip]
const GLYPH_NAMES: &[(&str, char)] = &[
    ("space", ' '), ("exclam", '!'), ("quotedbl", '"'), ("numbersign", '#'),
    ("dollar", '$'), ("percent", '%'), ("ampersand", '&'), ("quotesingle", '\''),
    ("parenleft", '('), ("parenright", ')'), ("asterisk", '*'), ("plus", '+'),
    ("comma", ','), ("hyphen", '-'), ("period", '.'), ("slash", '/'),
    ("zero", '0'), ("one", '1'), ("two", '2'), ("three", '3'), ("four", '4'),
    ("five", '5'), ("six", '6'), ("seven", '7'), ("eight", '8'), ("nine", '9'),
    ("colon", ':'), ("semicolon", ';'), ("less", '<'), ("equal", '='),
    ("greater", '>'), ("question", '?'), ("at", '@'), ("bracketleft", '['),
    ("backslash", '\\'), ("bracketright", ']'), ("asciicircum", '^'),
    ("underscore", '_'), ("grave", '`'), ("braceleft", '{'), ("bar", '|'),
    ("braceright", '}'), ("asciitilde", '~'),
    ("quoteleft", '\u{2018}'), ("quoteright", '\u{2019}'),
    ("quotedblleft", '\u{201C}'), ("quotedblright", '\u{201D}'),
    ("quotesinglbase", '\u{201A}'), ("quotedblbase", '\u{201E}'),
    ("bullet", '\u{2022}'), ("endash", '\u{2013}'), ("emdash", '\u{2014}'),
    ("ellipsis", '\u{2026}'), ("dagger", '\u{2020}'), ("daggerdbl", '\u{2021}'),
    ("trademark", '\u{2122}'), ("copyright", '\u{00A9}'), ("registered", '\u{00AE}'),
    ("degree", '\u{00B0}'), ("section", '\u{00A7}'), ("paragraph", '\u{00B6}'),
    ("minus", '\u{2212}'), ("multiply", '\u{00D7}'), ("divide", '\u{00F7}'),
    ("plusminus", '\u{00B1}'), ("periodcentered", '\u{00B7}'), ("nbspace", '\u{00A0}'),
    ("sterling", '\u{00A3}'), ("yen", '\u{00A5}'), ("Euro", '\u{20AC}'), ("cent", '\u{00A2}'),
    ("fi", '\u{FB01}'), ("fl", '\u{FB02}'), ("ff", '\u{FB00}'), ("ffi", '\u{FB03}'),
    ("ffl", '\u{FB04}'), ("dotlessi", '\u{0131}'), ("germandbls", '\u{00DF}'),
    ("ae", '\u{00E6}'), ("AE", '\u{00C6}'), ("oe", '\u{0153}'), ("OE", '\u{0152}'),
    ("oslash", '\u{00F8}'), ("Oslash", '\u{00D8}'), ("aring", '\u{00E5}'), ("Aring", '\u{00C5}'),
    ("ccedilla", '\u{00E7}'), ("Ccedilla", '\u{00C7}'), ("ntilde", '\u{00F1}'), ("Ntilde", '\u{00D1}'),
    ("agrave", '\u{00E0}'), ("aacute", '\u{00E1}'), ("acircumflex", '\u{00E2}'),
    ("atilde", '\u{00E3}'), ("adieresis", '\u{00E4}'),
    ("egrave", '\u{00E8}'), ("eacute", '\u{00E9}'), ("ecircumflex", '\u{00EA}'),
    ("edieresis", '\u{00EB}'),
    ("igrave", '\u{00EC}'), ("iacute", '\u{00ED}'), ("icircumflex", '\u{00EE}'),
    ("idieresis", '\u{00EF}'),
    ("ograve", '\u{00F2}'), ("oacute", '\u{00F3}'), ("ocircumflex", '\u{00F4}'),
    ("otilde", '\u{00F5}'), ("odieresis", '\u{00F6}'),
    ("ugrave", '\u{00F9}'), ("uacute", '\u{00FA}'), ("ucircumflex", '\u{00FB}'),
    ("udieresis", '\u{00FC}'), ("yacute", '\u{00FD}'), ("ydieresis", '\u{00FF}'),
    ("Agrave", '\u{00C0}'), ("Aacute", '\u{00C1}'), ("Acircumflex", '\u{00C2}'),
    ("Atilde", '\u{00C3}'), ("Adieresis", '\u{00C4}'),
    ("Egrave", '\u{00C8}'), ("Eacute", '\u{00C9}'), ("Ecircumflex", '\u{00CA}'),
    ("Edieresis", '\u{00CB}'),
    ("Igrave", '\u{00CC}'), ("Iacute", '\u{00CD}'), ("Icircumflex", '\u{00CE}'),
    ("Idieresis", '\u{00CF}'),
    ("Ograve", '\u{00D2}'), ("Oacute", '\u{00D3}'), ("Ocircumflex", '\u{00D4}'),
    ("Otilde", '\u{00D5}'), ("Odieresis", '\u{00D6}'),
    ("Ugrave", '\u{00D9}'), ("Uacute", '\u{00DA}'), ("Ucircumflex", '\u{00DB}'),
    ("Udieresis", '\u{00DC}'), ("Yacute", '\u{00DD}'), ("Ydieresis", '\u{0178}'),
    ("scaron", '\u{0161}'), ("Scaron", '\u{0160}'), ("zcaron", '\u{017E}'), ("Zcaron", '\u{017D}'),
    ("lslash", '\u{0142}'), ("Lslash", '\u{0141}'),
];

/// Unicode for a glyph name: single letters, the common named glyphs and
/// `uniXXXX` / `uXXXX` forms
pub(crate) fn glyph_name_to_char(name: &str) -> Option<char> {
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_ascii_alphabetic() {
            return Some(c);
        }
    }

    if let Some(&(_, c)) = GLYPH_NAMES.iter().find(|(n, _)| *n == name) {
        return Some(c);
    }

    let hex = name
        .strip_prefix("uni")
        .filter(|h| h.len() == 4)
        .or_else(|| name.strip_prefix('u').filter(|h| (4..=6).contains(&h.len())))?;
    u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_win_ansi_high_block() {
        assert_eq!(win_ansi_char(0x93), '\u{201C}');
        assert_eq!(win_ansi_char(0x80), '\u{20AC}');
        assert_eq!(win_ansi_char(0xE9), 'é');
        assert_eq!(win_ansi_char(b'A'), 'A');
    }

    #[test]
    fn test_text_string_encodings() {
        assert_eq!(decode_text_string(b"\xFE\xFF\x00H\x00i"), "Hi");
        assert_eq!(decode_text_string(b"\xEF\xBB\xBFcaf\xC3\xA9"), "café");
        assert_eq!(decode_text_string(b"\x8Dquoted\x8E"), "\u{201C}quoted\u{201D}");
        assert_eq!(decode_text_string(b"plain"), "plain");
    }

    #[test]
    fn test_unpaired_surrogate_is_replaced() {
        assert_eq!(decode_utf16be(&[0xD8, 0x00, 0x00, 0x41]), "\u{FFFD}A");
    }

    #[test]
    fn test_glyph_names() {
        assert_eq!(glyph_name_to_char("a"), Some('a'));
        assert_eq!(glyph_name_to_char("eacute"), Some('é'));
        assert_eq!(glyph_name_to_char("uni20AC"), Some('€'));
        assert_eq!(glyph_name_to_char("u1F600"), Some('😀'));
        assert_eq!(glyph_name_to_char("g123"), None);
    }
}
