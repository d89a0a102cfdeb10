//! Compressed object streams (`/Type /ObjStm`)

use super::lexer::{Lexer, SyntaxError, Token};
use super::object::{Dictionary, Object};

/// A decoded object stream with its header parsed
#[derive(Debug)]
pub(crate) struct ObjectStream {
    data: Vec<u8>,
    first: usize,
    /// (object number, offset relative to `first`)
    slots: Vec<(u32, usize)>,
    truncated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SlotError {
    /// Object not listed, or listed beyond the end of the data
    Missing,
    Truncated,
    Malformed(String),
}

impl ObjectStream {
    /// Parse the header of already-decoded stream data
    pub fn new(dict: &Dictionary, data: Vec<u8>, truncated: bool) -> Self {
        let count = dict.get("N").and_then(Object::as_i64).unwrap_or(0).max(0) as usize;
        let first = dict
            .get("First")
            .and_then(Object::as_i64)
            .unwrap_or(0)
            .max(0) as usize;

        let header_end = first.min(data.len());
        let mut lexer = Lexer::new(&data[..header_end], 0);
        // Each slot needs at least four header bytes
        let mut slots = Vec::with_capacity(count.min(header_end / 4 + 1));
        for _ in 0..count {
            match (lexer.next_token(), lexer.next_token()) {
                (Ok(Some(Token::Integer(num))), Ok(Some(Token::Integer(off))))
                    if num >= 0 && num <= i64::from(u32::MAX) && off >= 0 =>
                {
                    slots.push((num as u32, off as usize));
                }
                _ => break,
            }
        }

        Self {
            data,
            first,
            slots,
            truncated,
        }
    }

    pub fn object_numbers(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .map(|(index, &(num, _))| (num, index as u32))
    }

    /// Parse the object stored at `index`, which should be object `num`
    pub fn get(&self, index: u32, num: u32) -> Result<Object, SlotError> {
        let slot = match self.slots.get(index as usize) {
            Some(&(n, off)) if n == num => Some(off),
            // Index disagrees with header: look the number up instead
            _ => self.slots.iter().find(|(n, _)| *n == num).map(|&(_, off)| off),
        };

        let Some(offset) = slot else {
            return Err(if self.truncated {
                SlotError::Truncated
            } else {
                SlotError::Missing
            });
        };

        let start = self.first.saturating_add(offset);
        if start >= self.data.len() {
            return Err(if self.truncated {
                SlotError::Truncated
            } else {
                SlotError::Missing
            });
        }

        let mut lexer = Lexer::new(&self.data, start);
        match lexer.parse_object() {
            Ok(object) => Ok(object),
            Err(SyntaxError::UnexpectedEof(_)) => Err(SlotError::Truncated),
            Err(e) => Err(SlotError::Malformed(e.to_string())),
        }
    }
}
