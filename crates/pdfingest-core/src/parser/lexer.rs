//! Byte-level tokenizer and object parser
//!
//! Shared by the document parser (indirect objects, trailers, object
//! streams) and the content extractor (operator sequences, CMaps).

use thiserror::Error;

use super::object::{Dictionary, ObjRef, Object, Stream};

/// Arrays and dictionaries nested deeper than this are rejected
pub(crate) const MAX_NESTING: usize = 128;

#[derive(Error, Debug, Clone, PartialEq)]
pub(crate) enum SyntaxError {
    #[error("unexpected end of data at offset {0}")]
    UnexpectedEof(usize),

    #[error("unexpected {found} at offset {offset}")]
    Unexpected { offset: usize, found: String },

    #[error("nesting deeper than {MAX_NESTING} levels at offset {0}")]
    TooDeep(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token<'a> {
    Integer(i64),
    Real(f64),
    String(Vec<u8>),
    Name(String),
    ArrayStart,
    ArrayEnd,
    DictStart,
    DictEnd,
    Keyword(&'a [u8]),
}

#[inline]
pub(crate) fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\n' | b'\r' | b'\t' | b'\x0c' | b'\0')
}

#[inline]
pub(crate) fn is_delimiter(b: u8) -> bool {
    matches!(
        b,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

#[inline]
pub(crate) fn is_regular(b: u8) -> bool {
    !is_whitespace(b) && !is_delimiter(b)
}

/// Find pattern in bytes
pub(crate) fn find_pattern(bytes: &[u8], pattern: &[u8]) -> Option<usize> {
    if pattern.is_empty() || bytes.len() < pattern.len() {
        return None;
    }
    bytes
        .windows(pattern.len())
        .position(|window| window == pattern)
}

/// Find the last occurrence of pattern in bytes
pub(crate) fn rfind_pattern(bytes: &[u8], pattern: &[u8]) -> Option<usize> {
    if pattern.is_empty() || bytes.len() < pattern.len() {
        return None;
    }
    bytes
        .windows(pattern.len())
        .rposition(|window| window == pattern)
}

pub(crate) struct Lexer<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(bytes: &'a [u8], pos: usize) -> Self {
        Self {
            bytes,
            pos: pos.min(bytes.len()),
        }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos.min(self.bytes.len());
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn at_end(&mut self) -> bool {
        self.skip_whitespace();
        self.pos >= self.bytes.len()
    }

    /// Skip whitespace and `%` comments
    pub fn skip_whitespace(&mut self) {
        while self.pos < self.bytes.len() {
            let b = self.bytes[self.pos];
            if is_whitespace(b) {
                self.pos += 1;
            } else if b == b'%' {
                while self.pos < self.bytes.len()
                    && self.bytes[self.pos] != b'\n'
                    && self.bytes[self.pos] != b'\r'
                {
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    /// Next token, or `None` at end of data
    pub fn next_token(&mut self) -> Result<Option<Token<'a>>, SyntaxError> {
        self.skip_whitespace();
        let Some(&b) = self.bytes.get(self.pos) else {
            return Ok(None);
        };

        let token = match b {
            b'[' => {
                self.pos += 1;
                Token::ArrayStart
            }
            b']' => {
                self.pos += 1;
                Token::ArrayEnd
            }
            b'<' if self.bytes.get(self.pos + 1) == Some(&b'<') => {
                self.pos += 2;
                Token::DictStart
            }
            b'>' if self.bytes.get(self.pos + 1) == Some(&b'>') => {
                self.pos += 2;
                Token::DictEnd
            }
            b'<' => Token::String(self.read_hex_string()?),
            b'(' => Token::String(self.read_literal_string()?),
            b'/' => Token::Name(self.read_name()),
            b'{' | b'}' | b')' | b'>' => {
                // PostScript braces and stray closers are single-byte keywords
                let start = self.pos;
                self.pos += 1;
                Token::Keyword(&self.bytes[start..self.pos])
            }
            b'+' | b'-' | b'.' | b'0'..=b'9' => self.read_number(),
            _ => {
                let start = self.pos;
                while self.pos < self.bytes.len() && is_regular(self.bytes[self.pos]) {
                    self.pos += 1;
                }
                Token::Keyword(&self.bytes[start..self.pos])
            }
        };

        Ok(Some(token))
    }

    fn read_number(&mut self) -> Token<'a> {
        let start = self.pos;
        while self.pos < self.bytes.len()
            && matches!(self.bytes[self.pos], b'+' | b'-' | b'.' | b'0'..=b'9')
        {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap_or("0");

        if !text.contains('.') {
            if let Ok(n) = text.parse::<i64>() {
                return Token::Integer(n);
            }
        }

        // Malformed numbers such as "--5" or "1.2.3" are read leniently
        let cleaned: String = {
            let mut seen_dot = false;
            text.chars()
                .enumerate()
                .filter(|&(i, c)| match c {
                    '+' | '-' => i == 0,
                    '.' if !seen_dot => {
                        seen_dot = true;
                        true
                    }
                    '.' => false,
                    _ => true,
                })
                .map(|(_, c)| c)
                .collect()
        };
        Token::Real(cleaned.parse::<f64>().unwrap_or(0.0))
    }

    fn read_name(&mut self) -> String {
        // Skip '/'
        self.pos += 1;
        let mut out = Vec::new();
        while self.pos < self.bytes.len() && is_regular(self.bytes[self.pos]) {
            let b = self.bytes[self.pos];
            if b == b'#' {
                let hi = self.bytes.get(self.pos + 1).copied().and_then(hex_value);
                let lo = self.bytes.get(self.pos + 2).copied().and_then(hex_value);
                if let (Some(hi), Some(lo)) = (hi, lo) {
                    out.push(hi << 4 | lo);
                    self.pos += 3;
                    continue;
                }
            }
            out.push(b);
            self.pos += 1;
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    fn read_hex_string(&mut self) -> Result<Vec<u8>, SyntaxError> {
        // Skip '<'
        self.pos += 1;
        let mut out = Vec::new();
        let mut pending: Option<u8> = None;

        while self.pos < self.bytes.len() {
            let b = self.bytes[self.pos];
            self.pos += 1;
            if b == b'>' {
                if let Some(hi) = pending {
                    out.push(hi << 4);
                }
                return Ok(out);
            }
            if let Some(v) = hex_value(b) {
                match pending.take() {
                    Some(hi) => out.push(hi << 4 | v),
                    None => pending = Some(v),
                }
            }
        }

        Err(SyntaxError::UnexpectedEof(self.pos))
    }

    fn read_literal_string(&mut self) -> Result<Vec<u8>, SyntaxError> {
        // Skip '('
        self.pos += 1;
        let mut out = Vec::new();
        let mut depth = 1usize;

        while self.pos < self.bytes.len() {
            let b = self.bytes[self.pos];
            self.pos += 1;
            match b {
                b'\\' => {
                    let Some(&e) = self.bytes.get(self.pos) else {
                        break;
                    };
                    self.pos += 1;
                    match e {
                        b'n' => out.push(b'\n'),
                        b'r' => out.push(b'\r'),
                        b't' => out.push(b'\t'),
                        b'b' => out.push(0x08),
                        b'f' => out.push(0x0c),
                        b'\r' => {
                            // Line continuation
                            if self.bytes.get(self.pos) == Some(&b'\n') {
                                self.pos += 1;
                            }
                        }
                        b'\n' => {}
                        b'0'..=b'7' => {
                            let mut value = u32::from(e - b'0');
                            for _ in 0..2 {
                                match self.bytes.get(self.pos) {
                                    Some(&d @ b'0'..=b'7') => {
                                        value = value * 8 + u32::from(d - b'0');
                                        self.pos += 1;
                                    }
                                    _ => break,
                                }
                            }
                            out.push((value & 0xff) as u8);
                        }
                        other => out.push(other),
                    }
                }
                b'(' => {
                    depth += 1;
                    out.push(b);
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(out);
                    }
                    out.push(b);
                }
                b'\r' => {
                    out.push(b'\n');
                    if self.bytes.get(self.pos) == Some(&b'\n') {
                        self.pos += 1;
                    }
                }
                _ => out.push(b),
            }
        }

        Err(SyntaxError::UnexpectedEof(self.pos))
    }

    /// Parse one direct object. `N G R` sequences become references.
    pub fn parse_object(&mut self) -> Result<Object, SyntaxError> {
        self.parse_object_at_depth(0)
    }

    fn parse_object_at_depth(&mut self, depth: usize) -> Result<Object, SyntaxError> {
        let offset = self.pos;
        let token = self
            .next_token()?
            .ok_or(SyntaxError::UnexpectedEof(self.pos))?;
        self.object_from_token(token, offset, depth)
    }

    pub(crate) fn object_from_token(
        &mut self,
        token: Token<'a>,
        offset: usize,
        depth: usize,
    ) -> Result<Object, SyntaxError> {
        if depth > MAX_NESTING {
            return Err(SyntaxError::TooDeep(offset));
        }

        match token {
            Token::Integer(n) => Ok(self.try_reference(n).unwrap_or(Object::Integer(n))),
            Token::Real(f) => Ok(Object::Real(f)),
            Token::String(bytes) => Ok(Object::String(bytes)),
            Token::Name(name) => Ok(Object::Name(name)),
            Token::ArrayStart => {
                let mut items = Vec::new();
                loop {
                    let item_offset = self.pos;
                    match self.next_token()? {
                        None => return Err(SyntaxError::UnexpectedEof(self.pos)),
                        Some(Token::ArrayEnd) => return Ok(Object::Array(items)),
                        Some(token) => {
                            items.push(self.object_from_token(token, item_offset, depth + 1)?)
                        }
                    }
                }
            }
            Token::DictStart => Ok(Object::Dictionary(self.parse_dict_body(depth)?)),
            Token::Keyword(b"true") => Ok(Object::Boolean(true)),
            Token::Keyword(b"false") => Ok(Object::Boolean(false)),
            Token::Keyword(b"null") => Ok(Object::Null),
            Token::ArrayEnd | Token::DictEnd | Token::Keyword(_) => Err(SyntaxError::Unexpected {
                offset,
                found: describe(&token),
            }),
        }
    }

    /// Body of a dictionary after `<<`
    fn parse_dict_body(&mut self, depth: usize) -> Result<Dictionary, SyntaxError> {
        let mut dict = Dictionary::new();
        loop {
            let offset = self.pos;
            match self.next_token()? {
                None => return Err(SyntaxError::UnexpectedEof(self.pos)),
                Some(Token::DictEnd) => return Ok(dict),
                Some(Token::Name(key)) => {
                    let value_offset = self.pos;
                    match self.next_token()? {
                        None => return Err(SyntaxError::UnexpectedEof(self.pos)),
                        // A key directly followed by `>>` has no value
                        Some(Token::DictEnd) => {
                            dict.insert(key, Object::Null);
                            return Ok(dict);
                        }
                        Some(token) => {
                            let value = self.object_from_token(token, value_offset, depth + 1)?;
                            dict.insert(key, value);
                        }
                    }
                }
                Some(token) => {
                    return Err(SyntaxError::Unexpected {
                        offset,
                        found: describe(&token),
                    })
                }
            }
        }
    }

    /// After an integer, look ahead for `G R`
    fn try_reference(&mut self, num: i64) -> Option<Object> {
        if !(0..=i64::from(u32::MAX)).contains(&num) {
            return None;
        }
        let save = self.pos;
        let result = match (self.next_token(), self.next_token()) {
            (Ok(Some(Token::Integer(gen))), Ok(Some(Token::Keyword(b"R"))))
                if (0..=i64::from(u16::MAX)).contains(&gen) =>
            {
                Some(Object::Reference(ObjRef(num as u32, gen as u16)))
            }
            _ => None,
        };
        if result.is_none() {
            self.pos = save;
        }
        result
    }

    /// Expect a specific keyword as the next token
    pub fn expect_keyword(&mut self, keyword: &[u8]) -> Result<(), SyntaxError> {
        let offset = self.pos;
        match self.next_token()? {
            Some(Token::Keyword(k)) if k == keyword => Ok(()),
            Some(token) => Err(SyntaxError::Unexpected {
                offset,
                found: describe(&token),
            }),
            None => Err(SyntaxError::UnexpectedEof(offset)),
        }
    }

    /// Consume the keyword if it is next; otherwise leave the position alone
    pub fn eat_keyword(&mut self, keyword: &[u8]) -> bool {
        let save = self.pos;
        match self.next_token() {
            Ok(Some(Token::Keyword(k))) if k == keyword => true,
            _ => {
                self.pos = save;
                false
            }
        }
    }
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

fn describe(token: &Token<'_>) -> String {
    match token {
        Token::Keyword(k) => format!("keyword '{}'", String::from_utf8_lossy(k)),
        Token::ArrayEnd => "']'".to_string(),
        Token::DictEnd => "'>>'".to_string(),
        other => format!("{:?}", other),
    }
}

/// Result of parsing `N G obj ... endobj` at an offset
#[derive(Debug)]
pub(crate) struct IndirectObject {
    pub id: ObjRef,
    pub object: Object,
}

/// Parse the indirect object starting at `offset`.
///
/// `resolve_length` is consulted when a stream's `/Length` is an indirect
/// reference. A wrong or missing length is recovered by searching for
/// `endstream`; a stream without one is returned marked truncated.
pub(crate) fn parse_indirect_object(
    bytes: &[u8],
    offset: usize,
    resolve_length: &mut dyn FnMut(ObjRef) -> Option<i64>,
) -> Result<IndirectObject, SyntaxError> {
    let mut lexer = Lexer::new(bytes, offset);

    let header_offset = lexer.pos();
    let (num, gen) = match (lexer.next_token()?, lexer.next_token()?) {
        (Some(Token::Integer(num)), Some(Token::Integer(gen)))
            if (0..=i64::from(u32::MAX)).contains(&num)
                && (0..=i64::from(u16::MAX)).contains(&gen) =>
        {
            (num as u32, gen as u16)
        }
        _ => {
            return Err(SyntaxError::Unexpected {
                offset: header_offset,
                found: "missing object header".to_string(),
            })
        }
    };
    lexer.expect_keyword(b"obj")?;

    let object = lexer.parse_object()?;
    let id = ObjRef(num, gen);

    if !lexer.eat_keyword(b"stream") {
        lexer.eat_keyword(b"endobj");
        return Ok(IndirectObject { id, object });
    }

    let Object::Dictionary(dict) = object else {
        return Err(SyntaxError::Unexpected {
            offset: lexer.pos(),
            found: "stream without dictionary".to_string(),
        });
    };

    // Stream data starts after a single EOL marker
    let mut data_start = lexer.pos();
    if bytes.get(data_start) == Some(&b'\r') {
        data_start += 1;
    }
    if bytes.get(data_start) == Some(&b'\n') {
        data_start += 1;
    }

    let declared_len = match dict.get("Length") {
        Some(Object::Integer(n)) => Some(*n),
        Some(Object::Reference(r)) => resolve_length(*r),
        _ => None,
    }
    .filter(|&n| n >= 0)
    .map(|n| n as usize);

    let (data, truncated) = read_stream_data(bytes, data_start, declared_len, &mut lexer);
    lexer.eat_keyword(b"endobj");

    Ok(IndirectObject {
        id,
        object: Object::Stream(Stream {
            dict,
            data,
            truncated,
        }),
    })
}

fn read_stream_data(
    bytes: &[u8],
    data_start: usize,
    declared_len: Option<usize>,
    lexer: &mut Lexer<'_>,
) -> (Vec<u8>, bool) {
    // Trust /Length only when `endstream` follows it
    if let Some(end) = declared_len.and_then(|len| data_start.checked_add(len)) {
        if end <= bytes.len() {
            lexer.set_pos(end);
            if lexer.eat_keyword(b"endstream") {
                return (bytes[data_start..end].to_vec(), false);
            }
        }
    }

    let search_from = data_start.min(bytes.len());
    if let Some(rel) = find_pattern(&bytes[search_from..], b"endstream") {
        let marker = search_from + rel;
        let mut end = marker;
        if end > data_start && bytes[end - 1] == b'\n' {
            end -= 1;
        }
        if end > data_start && bytes[end - 1] == b'\r' {
            end -= 1;
        }
        lexer.set_pos(marker + b"endstream".len());
        return (bytes[data_start..end].to_vec(), false);
    }

    let end = declared_len
        .and_then(|len| data_start.checked_add(len))
        .unwrap_or(bytes.len())
        .min(bytes.len());
    lexer.set_pos(bytes.len());
    (bytes[search_from..end.max(search_from)].to_vec(), true)
}
