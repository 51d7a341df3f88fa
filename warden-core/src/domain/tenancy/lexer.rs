// warden-core/src/domain/tenancy/lexer.rs
//
// Dialect-agnostic SQL tokenizer used by the tenant guard.
// Tokens borrow their text from the input, so literals are never re-encoded.
// Constructs that engines disagree on (backslash escapes, dollar quoting,
// '#' comments, executable comments) are rejected instead of interpreted.

use crate::domain::error::GuardError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Word,
    QuotedIdent,
    StringLit,
    Number,
    Placeholder,
    LParen,
    RParen,
    Comma,
    Semicolon,
    Dot,
    Operator,
    Punct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    /// Byte offset of the first character in the source.
    pub start: usize,
    /// Byte offset one past the last character.
    pub end: usize,
}

impl<'a> Token<'a> {
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }

    pub fn is_any_keyword(&self, keywords: &[&str]) -> bool {
        keywords.iter().any(|k| self.is_keyword(k))
    }

    pub fn is_op(&self, op: &str) -> bool {
        self.kind == TokenKind::Operator && self.text == op
    }

    pub fn is_identifier(&self) -> bool {
        matches!(self.kind, TokenKind::Word | TokenKind::QuotedIdent)
    }

    /// Comparable identifier value: unquoted words fold to lowercase,
    /// delimited identifiers keep their exact spelling.
    pub fn ident_key(&self) -> Option<String> {
        match self.kind {
            TokenKind::Word => Some(self.text.to_ascii_lowercase()),
            TokenKind::QuotedIdent => {
                let quote = &self.text[..1];
                let inner = &self.text[1..self.text.len() - 1];
                Some(inner.replace(&format!("{quote}{quote}"), quote))
            }
            _ => None,
        }
    }

    /// Value of a single-quoted string literal.
    pub fn string_value(&self) -> Option<String> {
        if self.kind != TokenKind::StringLit {
            return None;
        }
        Some(self.text[1..self.text.len() - 1].replace("''", "'"))
    }
}

const MULTI_CHAR_OPERATORS: [&str; 15] = [
    "->>", "!~*", "<=", ">=", "<>", "!=", "||", "->", "=>", "<<", ">>", "&&", "!~", "~*", "::",
];

fn unparseable(reason: impl Into<String>) -> GuardError {
    GuardError::UnparseableStructure(reason.into())
}

fn is_operator_byte(b: u8) -> bool {
    matches!(
        b,
        b'=' | b'<' | b'>' | b'!' | b'+' | b'-' | b'*' | b'/' | b'%' | b'|' | b'&' | b'^' | b'~'
    )
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

fn is_ident_continue(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphanumeric()
}

pub fn tokenize(sql: &str) -> Result<Vec<Token<'_>>, GuardError> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let start = i;

        let kind = match b {
            b' ' | b'\t' | b'\n' | b'\r' | 0x0c => {
                i += 1;
                continue;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = skip_line_comment(bytes, i);
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_block_comment(sql, i)?;
                continue;
            }
            b'#' => return Err(unparseable("'#' is a comment in some dialects and an operator in others")),
            b'\'' => {
                i = scan_delimited(bytes, i, b'\'')?;
                if sql[start..i].contains('\\') {
                    return Err(unparseable(
                        "backslashes inside string literals are dialect-dependent",
                    ));
                }
                TokenKind::StringLit
            }
            b'"' | b'`' => {
                i = scan_delimited(bytes, i, b)?;
                TokenKind::QuotedIdent
            }
            b'(' => {
                i += 1;
                TokenKind::LParen
            }
            b')' => {
                i += 1;
                TokenKind::RParen
            }
            b',' => {
                i += 1;
                TokenKind::Comma
            }
            b';' => {
                i += 1;
                TokenKind::Semicolon
            }
            b'.' if bytes.get(i + 1).is_some_and(u8::is_ascii_digit) => {
                i = scan_number(bytes, i);
                TokenKind::Number
            }
            b'.' => {
                i += 1;
                TokenKind::Dot
            }
            b'0'..=b'9' => {
                i = scan_number(bytes, i);
                TokenKind::Number
            }
            b'$' => {
                if !bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
                    return Err(unparseable("dollar-quoted strings are not supported"));
                }
                i += 1;
                while bytes.get(i).is_some_and(u8::is_ascii_digit) {
                    i += 1;
                }
                TokenKind::Placeholder
            }
            b'?' => {
                i += 1;
                TokenKind::Placeholder
            }
            b':' if bytes.get(i + 1) == Some(&b':') => {
                i += 2;
                TokenKind::Operator
            }
            b':' | b'@' if next_char_is_ident_start(sql, i + 1) => {
                i = scan_word(sql, i + 1);
                TokenKind::Placeholder
            }
            b':' | b'@' => {
                i += 1;
                TokenKind::Operator
            }
            b'[' | b']' | b'{' | b'}' => {
                i += 1;
                TokenKind::Punct
            }
            _ if is_operator_byte(b) => {
                let rest = &sql[i..];
                let len = MULTI_CHAR_OPERATORS
                    .iter()
                    .find(|op| rest.starts_with(**op))
                    .map_or(1, |op| op.len());
                i += len;
                TokenKind::Operator
            }
            _ => {
                let c = sql[i..].chars().next().unwrap_or('\0');
                if !is_ident_start(c) {
                    return Err(unparseable(format!(
                        "unexpected character '{}' at offset {}",
                        c.escape_debug(),
                        i
                    )));
                }
                i = scan_word(sql, i);
                if bytes.get(i) == Some(&b'\'') && sql[start..i].eq_ignore_ascii_case("e") {
                    return Err(unparseable("escape-string literals (E'...') are not supported"));
                }
                TokenKind::Word
            }
        };

        tokens.push(Token {
            kind,
            text: &sql[start..i],
            start,
            end: i,
        });
    }

    Ok(tokens)
}

fn next_char_is_ident_start(sql: &str, at: usize) -> bool {
    sql.get(at..)
        .and_then(|rest| rest.chars().next())
        .is_some_and(is_ident_start)
}

fn scan_word(sql: &str, from: usize) -> usize {
    sql[from..]
        .char_indices()
        .find(|(_, c)| !is_ident_continue(*c))
        .map_or(sql.len(), |(offset, _)| from + offset)
}

fn scan_number(bytes: &[u8], from: usize) -> usize {
    let mut i = from;
    while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
        i += 1;
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            i = j;
        }
    }
    // hex literals and type suffixes stay glued to the number
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
    }
    i
}

/// Returns the offset one past the closing delimiter. A doubled delimiter
/// is an escaped delimiter.
fn scan_delimited(bytes: &[u8], from: usize, delimiter: u8) -> Result<usize, GuardError> {
    let mut i = from + 1;
    loop {
        match bytes[i..].iter().position(|b| *b == delimiter) {
            None => return Err(unparseable("unterminated quoted literal")),
            Some(offset) => {
                let close = i + offset;
                if bytes.get(close + 1) == Some(&delimiter) {
                    i = close + 2;
                } else {
                    return Ok(close + 1);
                }
            }
        }
    }
}

fn skip_line_comment(bytes: &[u8], from: usize) -> usize {
    bytes[from..]
        .iter()
        .position(|b| *b == b'\n')
        .map_or(bytes.len(), |offset| from + offset + 1)
}

fn skip_block_comment(sql: &str, from: usize) -> Result<usize, GuardError> {
    let body_start = from + 2;
    let close = sql[body_start..]
        .find("*/")
        .ok_or_else(|| unparseable("unterminated block comment"))?;
    let body = &sql[body_start..body_start + close];
    if body.starts_with('!') {
        return Err(unparseable("executable comments (/*! ... */) are not supported"));
    }
    if body.contains("/*") {
        return Err(unparseable("nested block comments are dialect-dependent"));
    }
    Ok(body_start + close + 2)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn kinds(sql: &str) -> Result<Vec<(TokenKind, String)>> {
        Ok(tokenize(sql)?
            .into_iter()
            .map(|t| (t.kind, t.text.to_string()))
            .collect())
    }

    #[test]
    fn test_basic_select() -> Result<()> {
        let tokens = kinds("SELECT a, b FROM t WHERE x >= 10")?;
        assert_eq!(tokens[0], (TokenKind::Word, "SELECT".into()));
        assert_eq!(tokens[2], (TokenKind::Comma, ",".into()));
        assert!(tokens.contains(&(TokenKind::Operator, ">=".into())));
        assert_eq!(tokens.last().unwrap(), &(TokenKind::Number, "10".into()));
        Ok(())
    }

    #[test]
    fn test_literals_keep_their_source_text() -> Result<()> {
        let tokens = tokenize("SELECT 'O''Brien', \"Weird \"\"Col\"\"\" FROM t")?;
        assert_eq!(tokens[1].text, "'O''Brien'");
        assert_eq!(tokens[1].string_value().as_deref(), Some("O'Brien"));
        assert_eq!(tokens[3].ident_key().as_deref(), Some("Weird \"Col\""));
        Ok(())
    }

    #[test]
    fn test_comments_are_skipped() -> Result<()> {
        let tokens = kinds("SELECT 1 -- trailing\n/* block */ FROM t")?;
        let words: Vec<_> = tokens.iter().map(|(_, t)| t.as_str()).collect();
        assert_eq!(words, vec!["SELECT", "1", "FROM", "t"]);
        Ok(())
    }

    #[test]
    fn test_keywords_inside_literals_are_not_words() -> Result<()> {
        let tokens = tokenize("SELECT 'DROP TABLE x' AS note")?;
        assert!(!tokens.iter().any(|t| t.is_keyword("DROP")));
        Ok(())
    }

    #[test]
    fn test_placeholders() -> Result<()> {
        let tokens = kinds("WHERE a = $1 AND b = ? AND c = :tenant AND d::text = @p")?;
        let placeholders: Vec<_> = tokens
            .iter()
            .filter(|(k, _)| *k == TokenKind::Placeholder)
            .map(|(_, t)| t.as_str())
            .collect();
        assert_eq!(placeholders, vec!["$1", "?", ":tenant", "@p"]);
        assert!(tokens.contains(&(TokenKind::Operator, "::".into())));
        Ok(())
    }

    #[test]
    fn test_dialect_ambiguous_constructs_are_rejected() {
        for sql in [
            "SELECT 'it\\'s' FROM t",
            "SELECT E'x' FROM t",
            "SELECT $$body$$",
            "SELECT 1 # comment",
            "SELECT /*! 1 */ 2",
            "SELECT /* a /* b */ */ 1",
            "SELECT 'open",
            "SELECT /* open",
        ] {
            assert!(
                matches!(tokenize(sql), Err(GuardError::UnparseableStructure(_))),
                "expected rejection for {sql}"
            );
        }
    }

    #[test]
    fn test_numbers_and_unicode_identifiers() -> Result<()> {
        let tokens = kinds("SELECT 1.5e-3, .5, 0x1F, données FROM t")?;
        assert_eq!(tokens[1], (TokenKind::Number, "1.5e-3".into()));
        assert_eq!(tokens[3], (TokenKind::Number, ".5".into()));
        assert_eq!(tokens[5], (TokenKind::Number, "0x1F".into()));
        assert_eq!(tokens[7], (TokenKind::Word, "données".into()));
        Ok(())
    }
}
