//! Tokenizer for filter expressions.

use super::FilterError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    /// A lone `.`
    Dot,
    /// `.name` with no space after the dot.
    Field(String),
    Ident(String),
    Str(String),
    /// String with `\(expr)` interpolations.
    Template(Vec<Segment>),
    Num(serde_json::Number),
    LBracket,
    RBracket,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Pipe,
    Comma,
    Colon,
    Semicolon,
    Question,
    Minus,
    Alt,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Eof,
}

/// Token with the byte offset where it starts.
pub(crate) type Spanned = (Token, usize);

/// Piece of an interpolated string. Code tokens end with their own `Eof`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Segment {
    Text(String),
    Code(Vec<Spanned>),
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_ident_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

fn error(offset: usize, message: impl Into<String>) -> FilterError {
    FilterError::Parse { offset, message: message.into() }
}

pub(crate) fn tokenize(src: &str) -> Result<Vec<Spanned>, FilterError> {
    tokenize_range(src, 0, src.len())
}

/// Tokenize `src[from..to]`, keeping offsets relative to all of `src`.
fn tokenize_range(src: &str, from: usize, to: usize) -> Result<Vec<Spanned>, FilterError> {
    let bytes = &src.as_bytes()[..to];
    let mut tokens = Vec::new();
    let mut i = from;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let next = bytes.get(i + 1).copied();
        let token = match c {
            b'.' if next.is_some_and(is_ident_start) => {
                i += 1;
                let name_start = i;
                while i < bytes.len() && is_ident_char(bytes[i]) {
                    i += 1;
                }
                tokens.push((Token::Field(src[name_start..i].to_string()), start));
                continue;
            }
            b'.' if next == Some(b'.') => return Err(error(start, "recursive descent `..` is not supported")),
            b'.' => Token::Dot,
            b'[' => Token::LBracket,
            b']' => Token::RBracket,
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b'{' => Token::LBrace,
            b'}' => Token::RBrace,
            b'|' => Token::Pipe,
            b',' => Token::Comma,
            b':' => Token::Colon,
            b';' => Token::Semicolon,
            b'?' => Token::Question,
            b'-' => Token::Minus,
            b'/' if next == Some(b'/') => {
                i += 2;
                tokens.push((Token::Alt, start));
                continue;
            }
            b'=' if next == Some(b'=') => {
                i += 2;
                tokens.push((Token::Eq, start));
                continue;
            }
            b'!' if next == Some(b'=') => {
                i += 2;
                tokens.push((Token::Ne, start));
                continue;
            }
            b'<' | b'>' => {
                let or_equal = next == Some(b'=');
                i += if or_equal { 2 } else { 1 };
                let token = match (c, or_equal) {
                    (b'<', false) => Token::Lt,
                    (b'<', true) => Token::Le,
                    (_, false) => Token::Gt,
                    (_, true) => Token::Ge,
                };
                tokens.push((token, start));
                continue;
            }
            b'"' => {
                let (token, end) = string(src, start, to)?;
                i = end;
                tokens.push((token, start));
                continue;
            }
            c if c.is_ascii_digit() => {
                i = number_end(bytes, i);
                let number: serde_json::Number = src[start..i]
                    .parse()
                    .map_err(|_| error(start, format!("invalid number {:?}", &src[start..i])))?;
                tokens.push((Token::Num(number), start));
                continue;
            }
            c if is_ident_start(c) => {
                while i < bytes.len() && is_ident_char(bytes[i]) {
                    i += 1;
                }
                tokens.push((Token::Ident(src[start..i].to_string()), start));
                continue;
            }
            _ => {
                let ch = src[start..].chars().next().unwrap_or('?');
                return Err(error(start, format!("unexpected character {ch:?}")));
            }
        };
        i += 1;
        tokens.push((token, start));
    }

    tokens.push((Token::Eof, to));
    Ok(tokens)
}

/// Lex the string literal opening at `start`. Returns the token and the
/// index one past its closing quote.
fn string(src: &str, start: usize, to: usize) -> Result<(Token, usize), FilterError> {
    let bytes = &src.as_bytes()[..to];
    let mut segments = Vec::new();
    let mut chunk = start + 1;
    let mut i = chunk;
    loop {
        match bytes.get(i) {
            None => return Err(error(start, "unterminated string")),
            Some(b'"') => {
                segments.push(Segment::Text(decode_chunk(src, chunk, i)?));
                i += 1;
                break;
            }
            Some(b'\\') if bytes.get(i + 1) == Some(&b'(') => {
                segments.push(Segment::Text(decode_chunk(src, chunk, i)?));
                let code = i + 2;
                let close = interpolation_end(src, code, to)?;
                segments.push(Segment::Code(tokenize_range(src, code, close)?));
                i = close + 1;
                chunk = i;
            }
            Some(b'\\') => i += 2,
            Some(_) => i += 1,
        }
    }

    segments.retain(|s| !matches!(s, Segment::Text(t) if t.is_empty()));
    let token = match segments.as_slice() {
        [] => Token::Str(String::new()),
        [Segment::Text(text)] => Token::Str(text.clone()),
        _ => Token::Template(segments),
    };
    Ok((token, i))
}

/// Decode the escapes of the literal text in `src[from..to]`.
fn decode_chunk(src: &str, from: usize, to: usize) -> Result<String, FilterError> {
    serde_json::from_str(&format!("\"{}\"", &src[from..to]))
        .map_err(|e| error(from, format!("invalid string literal: {e}")))
}

/// Index of the `)` closing an interpolation whose code starts at `from`.
fn interpolation_end(src: &str, from: usize, to: usize) -> Result<usize, FilterError> {
    let bytes = &src.as_bytes()[..to];
    let mut depth = 0usize;
    let mut i = from;
    while let Some(&c) = bytes.get(i) {
        match c {
            b'"' => {
                i = string(src, i, to)?.1;
                continue;
            }
            b'(' => depth += 1,
            b')' if depth == 0 => return Ok(i),
            b')' => depth -= 1,
            _ => {}
        }
        i += 1;
    }
    Err(error(from - 2, "unterminated interpolation"))
}

fn number_end(bytes: &[u8], start: usize) -> usize {
    let mut i = start;
    let digits = |i: &mut usize| {
        while *i < bytes.len() && bytes[*i].is_ascii_digit() {
            *i += 1;
        }
    };
    digits(&mut i);
    if bytes.get(i) == Some(&b'.') && bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
        i += 1;
        digits(&mut i);
    }
    if matches!(bytes.get(i), Some(b'e' | b'E')) {
        let mut j = i + 1;
        if matches!(bytes.get(j), Some(b'+' | b'-')) {
            j += 1;
        }
        if bytes.get(j).is_some_and(u8::is_ascii_digit) {
            i = j;
            digits(&mut i);
        }
    }
    i
}
