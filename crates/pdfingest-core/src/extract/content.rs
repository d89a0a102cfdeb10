//! Content stream tokenizer: operands followed by an operator keyword

use crate::parser::{find_pattern, is_whitespace, Lexer, Object, SyntaxError, Token};

/// Operands accumulated before an operator are capped; anything beyond
/// is garbage
const MAX_OPERANDS: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Operation {
    pub operator: String,
    pub operands: Vec<Object>,
}

impl Operation {
    pub fn number(&self, index: usize) -> Option<f64> {
        self.operands.get(index).and_then(Object::as_f64)
    }

    /// The last `N` operands as numbers
    pub fn numbers<const N: usize>(&self) -> Option<[f64; N]> {
        if self.operands.len() < N {
            return None;
        }
        let start = self.operands.len() - N;
        let mut out = [0.0; N];
        for (slot, operand) in out.iter_mut().zip(&self.operands[start..]) {
            *slot = operand.as_f64()?;
        }
        Some(out)
    }
}

/// Operations in `data`, in order.
///
/// Malformed operands are dropped and tokenizing resumes after them, so a
/// damaged stream still yields what precedes and follows the damage. The
/// returned flag is false when the data ended inside a token.
pub(crate) fn parse_operations(data: &[u8]) -> (Vec<Operation>, bool) {
    let mut lexer = Lexer::new(data, 0);
    let mut operations = Vec::new();
    let mut operands: Vec<Object> = Vec::new();

    loop {
        let offset = lexer.pos();
        let token = match lexer.next_token() {
            Ok(Some(token)) => token,
            Ok(None) => return (operations, true),
            Err(SyntaxError::UnexpectedEof(_)) => return (operations, false),
            Err(_) => {
                operands.clear();
                lexer.set_pos(offset + 1);
                continue;
            }
        };

        match token {
            Token::Keyword(b"BI") => {
                operands.clear();
                if !skip_inline_image(&mut lexer) {
                    return (operations, false);
                }
            }
            Token::Keyword(b"true") => operands.push(Object::Boolean(true)),
            Token::Keyword(b"false") => operands.push(Object::Boolean(false)),
            Token::Keyword(b"null") => operands.push(Object::Null),
            Token::Keyword(keyword) => {
                operations.push(Operation {
                    operator: String::from_utf8_lossy(keyword).into_owned(),
                    operands: std::mem::take(&mut operands),
                });
            }
            Token::ArrayEnd | Token::DictEnd => operands.clear(),
            token => match lexer.object_from_token(token, offset, 0) {
                Ok(object) => {
                    if operands.len() < MAX_OPERANDS {
                        operands.push(object);
                    }
                }
                Err(SyntaxError::UnexpectedEof(_)) => return (operations, false),
                Err(_) => operands.clear(),
            },
        }
    }
}

/// Skip `BI <dict pairs> ID <binary> EI`. False if the data ends first.
fn skip_inline_image(lexer: &mut Lexer<'_>) -> bool {
    loop {
        match lexer.next_token() {
            Ok(Some(Token::Keyword(b"ID"))) => break,
            Ok(Some(_)) => {}
            Ok(None) | Err(SyntaxError::UnexpectedEof(_)) => return false,
            Err(_) => lexer.set_pos(lexer.pos() + 1),
        }
    }

    let bytes = lexer.bytes();
    // One whitespace byte separates ID from the data
    let mut from = lexer.pos() + 1;
    while let Some(rel) = bytes.get(from..).and_then(|rest| find_pattern(rest, b"EI")) {
        let pos = from + rel;
        let before = pos == 0 || is_whitespace(bytes[pos - 1]);
        let after = bytes.get(pos + 2).map_or(true, |&b| is_whitespace(b));
        if before && after {
            lexer.set_pos(pos + 2);
            return true;
        }
        from = pos + 2;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn operators(data: &[u8]) -> Vec<String> {
        parse_operations(data).0.into_iter().map(|op| op.operator).collect()
    }

    #[test]
    fn test_operands_attach_to_operator() {
        let (ops, complete) = parse_operations(b"BT /F1 12 Tf 72 700 Td (Hello) Tj ET");
        assert!(complete);
        assert_eq!(ops.len(), 5);
        assert_eq!(ops[1].operator, "Tf");
        assert_eq!(
            ops[1].operands,
            vec![Object::Name("F1".into()), Object::Integer(12)]
        );
        assert_eq!(ops[2].numbers::<2>(), Some([72.0, 700.0]));
        assert_eq!(ops[3].operands, vec![Object::String(b"Hello".to_vec())]);
    }

    #[test]
    fn test_tj_array_operand() {
        let (ops, _) = parse_operations(b"[(A) -250 (B)] TJ");
        assert_eq!(ops[0].operator, "TJ");
        let Some(Object::Array(items)) = ops[0].operands.first() else {
            panic!("expected array operand");
        };
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn test_inline_image_is_skipped() {
        let data = b"q BI /W 2 /H 2 /BPC 8 /CS /G ID \x00EI\xffAB EI Q BT (x) Tj ET";
        assert_eq!(operators(data), vec!["q", "Q", "BT", "Tj", "ET"]);
    }

    #[test]
    fn test_unterminated_string_reports_incomplete() {
        let (ops, complete) = parse_operations(b"BT (Hello) Tj (unterminated");
        assert!(!complete);
        assert_eq!(ops.len(), 2);
    }

    #[test]
    fn test_stray_closers_are_dropped() {
        assert_eq!(operators(b"] >> 1 0 0 1 0 0 cm"), vec!["cm"]);
    }
}
