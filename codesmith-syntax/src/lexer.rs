//! # Lexer
//!
//! Turns Python source text into a flat token stream with NEWLINE / INDENT /
//! DEDENT tokens for block structure. Blank and comment-only lines produce
//! no tokens, newlines inside brackets are ignored, and a backslash at end of
//! line joins physical lines.

use crate::token::{Keyword, Span, Token, TokenKind, OPERATORS};
use codesmith_error::{Error, Result};

const TAB_SIZE: usize = 8;

pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
    line_start: usize,
    indents: Vec<usize>,
    paren_depth: usize,
    at_line_start: bool,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            line: 1,
            line_start: 0,
            indents: vec![0],
            paren_depth: 0,
            at_line_start: true,
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Token>> {
        if self.src.starts_with('\u{feff}') {
            self.pos = '\u{feff}'.len_utf8();
            self.line_start = self.pos;
        }
        while self.pos < self.src.len() {
            if self.at_line_start && self.paren_depth == 0 {
                self.at_line_start = false;
                if self.handle_indentation()? {
                    continue;
                }
            }

            let c = match self.peek() {
                Some(c) => c,
                None => break,
            };

            match c {
                ' ' | '\t' | '\x0c' => {
                    self.pos += 1;
                }
                '#' => self.skip_comment(),
                '\r' | '\n' => {
                    let start = self.pos;
                    self.consume_newline();
                    if self.paren_depth == 0 {
                        self.push_newline(start);
                        self.at_line_start = true;
                    }
                }
                '\\' => self.line_continuation()?,
                c if c.is_ascii_digit() => self.number()?,
                '.' if self.peek_at(1).map_or(false, |c| c.is_ascii_digit()) => self.number()?,
                '"' | '\'' => self.string(self.pos, "")?,
                c if is_ident_start(c) => self.name_or_prefixed_string()?,
                _ => self.operator()?,
            }
        }

        if self.paren_depth > 0 {
            return Err(self.error("unexpected EOF: unclosed bracket", self.pos));
        }

        let end = self.src.len();
        if !matches!(
            self.tokens.last().map(|t| &t.kind),
            None | Some(TokenKind::Newline) | Some(TokenKind::Dedent)
        ) {
            self.push(TokenKind::Newline, end, end);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(TokenKind::Dedent, end, end);
        }
        self.push(TokenKind::EndMarker, end, end);
        Ok(self.tokens)
    }

    // =========================================================================
    // Cursor helpers
    // =========================================================================

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn consume_newline(&mut self) {
        if self.src[self.pos..].starts_with("\r\n") {
            self.pos += 2;
        } else {
            self.pos += 1;
        }
        self.line += 1;
        self.line_start = self.pos;
    }

    fn error(&self, message: impl Into<String>, offset: usize) -> Error {
        Error::parse_failed(message, self.line, offset.saturating_sub(self.line_start))
            .with_operation("lexer::tokenize")
    }

    fn push(&mut self, kind: TokenKind, start: usize, end: usize) {
        let column = start.saturating_sub(self.line_start);
        self.tokens.push(Token {
            kind,
            span: Span { start, end, line: self.line, column },
        });
    }

    fn push_newline(&mut self, start: usize) {
        // The newline token belongs to the line it terminates.
        let span = Span {
            start,
            end: start,
            line: self.line - 1,
            column: 0,
        };
        if !matches!(
            self.tokens.last().map(|t| &t.kind),
            None | Some(TokenKind::Newline) | Some(TokenKind::Indent) | Some(TokenKind::Dedent)
        ) {
            self.tokens.push(Token { kind: TokenKind::Newline, span });
        }
    }

    // =========================================================================
    // Layout
    // =========================================================================

    /// Measure leading whitespace of a logical line. Returns true when the
    /// whole line was blank or a comment and has been consumed.
    fn handle_indentation(&mut self) -> Result<bool> {
        let mut width = 0;
        while let Some(c) = self.peek() {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / TAB_SIZE + 1) * TAB_SIZE,
                '\x0c' => width = 0,
                _ => break,
            }
            self.pos += 1;
        }

        match self.peek() {
            None => return Ok(true),
            Some('#') => {
                self.skip_comment();
                if self.peek().is_some() {
                    self.consume_newline();
                }
                self.at_line_start = true;
                return Ok(true);
            }
            Some('\r') | Some('\n') => {
                self.consume_newline();
                self.at_line_start = true;
                return Ok(true);
            }
            _ => {}
        }

        let current = *self.indents.last().unwrap_or(&0);
        if width > current {
            self.indents.push(width);
            self.push(TokenKind::Indent, self.pos, self.pos);
        } else if width < current {
            while width < *self.indents.last().unwrap_or(&0) {
                self.indents.pop();
                self.push(TokenKind::Dedent, self.pos, self.pos);
            }
            if width != *self.indents.last().unwrap_or(&0) {
                return Err(self.error(
                    "unindent does not match any outer indentation level",
                    self.pos,
                ));
            }
        }
        Ok(false)
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' || c == '\r' {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn line_continuation(&mut self) -> Result<()> {
        let start = self.pos;
        self.pos += 1;
        match self.peek() {
            Some('\n') | Some('\r') => {
                self.consume_newline();
                Ok(())
            }
            _ => Err(self.error("unexpected character after line continuation character", start)),
        }
    }

    // =========================================================================
    // Names, numbers, operators
    // =========================================================================

    fn name_or_prefixed_string(&mut self) -> Result<()> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if is_ident_continue(c) {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        let ident = &self.src[start..self.pos];

        if matches!(self.peek(), Some('"') | Some('\'')) && is_string_prefix(ident) {
            let prefix = ident.to_ascii_lowercase();
            return self.string(start, &prefix);
        }

        let kind = match Keyword::from_ident(ident) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Name(ident.to_string()),
        };
        self.push(kind, start, self.pos);
        Ok(())
    }

    fn number(&mut self) -> Result<()> {
        let start = self.pos;
        let rest = &self.src[start..];
        let bytes = rest.as_bytes();

        if bytes.len() > 1 && bytes[0] == b'0' && matches!(bytes[1], b'x' | b'X' | b'o' | b'O' | b'b' | b'B') {
            let radix_ok: fn(u8) -> bool = match bytes[1] {
                b'x' | b'X' => |b| b.is_ascii_hexdigit() || b == b'_',
                b'o' | b'O' => |b| (b'0'..=b'7').contains(&b) || b == b'_',
                _ => |b| b == b'0' || b == b'1' || b == b'_',
            };
            let mut len = 2;
            while len < bytes.len() && radix_ok(bytes[len]) {
                len += 1;
            }
            if len == 2 || !valid_underscores(&rest[..len], true) {
                return Err(self.error("invalid number literal", start));
            }
            self.pos += len;
            self.check_number_end(start)?;
            self.push(TokenKind::Int(rest[..len].to_string()), start, self.pos);
            return Ok(());
        }

        let mut len = 0;
        let mut is_float = false;
        let digits = |len: &mut usize| {
            while *len < bytes.len() && (bytes[*len].is_ascii_digit() || bytes[*len] == b'_') {
                *len += 1;
            }
        };
        digits(&mut len);
        if len < bytes.len() && bytes[len] == b'.' {
            is_float = true;
            len += 1;
            digits(&mut len);
        }
        if len < bytes.len() && matches!(bytes[len], b'e' | b'E') {
            let mut exponent_end = len + 1;
            if exponent_end < bytes.len() && matches!(bytes[exponent_end], b'+' | b'-') {
                exponent_end += 1;
            }
            if exponent_end < bytes.len() && bytes[exponent_end].is_ascii_digit() {
                is_float = true;
                len = exponent_end;
                digits(&mut len);
            }
        }
        let imaginary = len < bytes.len() && matches!(bytes[len], b'j' | b'J');
        if imaginary {
            len += 1;
        }

        let text = rest[..len].to_string();
        if !valid_underscores(&text, false) {
            return Err(self.error("invalid decimal literal", start));
        }
        if !is_float && !imaginary && text.starts_with('0') && text.bytes().any(|b| (b'1'..=b'9').contains(&b)) {
            return Err(self.error(
                "leading zeros in decimal integer literals are not permitted; use an 0o prefix for octal integers",
                start,
            ));
        }
        self.pos += len;
        self.check_number_end(start)?;
        let kind = if imaginary {
            TokenKind::Imaginary(text)
        } else if is_float {
            TokenKind::Float(text)
        } else {
            TokenKind::Int(text)
        };
        self.push(kind, start, self.pos);
        Ok(())
    }

    fn check_number_end(&self, start: usize) -> Result<()> {
        match self.peek() {
            Some(c) if is_ident_continue(c) => Err(self.error("invalid number literal", start)),
            _ => Ok(()),
        }
    }

    fn operator(&mut self) -> Result<()> {
        let start = self.pos;
        let rest = &self.src[start..];
        let op = OPERATORS
            .iter()
            .find(|op| rest.starts_with(**op))
            .copied()
            .ok_or_else(|| {
                let c = rest.chars().next().unwrap_or('?');
                self.error(format!("invalid character '{}'", c), start)
            })?;

        match op {
            "(" | "[" | "{" => self.paren_depth += 1,
            ")" | "]" | "}" => {
                if self.paren_depth == 0 {
                    return Err(self.error(format!("unmatched '{}'", op), start));
                }
                self.paren_depth -= 1;
            }
            _ => {}
        }

        self.pos += op.len();
        self.push(TokenKind::Op(op), start, self.pos);
        Ok(())
    }

    // =========================================================================
    // Strings
    // =========================================================================

    fn string(&mut self, start: usize, prefix: &str) -> Result<()> {
        let start_line = self.line;
        let start_line_start = self.line_start;
        let templated = prefix.contains('f') || prefix.contains('t');
        let raw = prefix.contains('r');
        let (body_start, body_end) = self.literal(templated, raw).map_err(|msg| {
            Error::parse_failed(msg, start_line, start - start_line_start).with_operation("lexer::tokenize")
        })?;

        let body = &self.src[body_start..body_end];
        let kind = if templated {
            TokenKind::FString(self.src[start..self.pos].to_string())
        } else if prefix.contains('b') {
            let bytes = if raw {
                if !body.is_ascii() {
                    return Err(self.error("bytes can only contain ASCII literal characters", start));
                }
                body.as_bytes().to_vec()
            } else {
                decode_bytes(body).map_err(|msg| self.error(msg, start))?
            };
            TokenKind::Bytes(bytes)
        } else if raw {
            TokenKind::Str(body.to_string())
        } else {
            TokenKind::Str(decode_str(body).map_err(|msg| self.error(msg, start))?)
        };

        let column = start - start_line_start;
        self.tokens.push(Token {
            kind,
            span: Span { start, end: self.pos, line: start_line, column },
        });
        Ok(())
    }

    /// Scan a quoted literal from its opening quote and return the body range.
    ///
    /// In f- and t-strings every `{` must be matched by a `}` outside of
    /// `{{`/`}}` escapes. Strings nested in a replacement field may reuse the
    /// outer quote character.
    fn literal(&mut self, templated: bool, raw: bool) -> std::result::Result<(usize, usize), &'static str> {
        let quote = self.bump().unwrap_or('"');
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.pos += 2;
        }
        let unterminated = if triple {
            "unterminated triple-quoted string literal"
        } else {
            "unterminated string literal"
        };
        let body_start = self.pos;
        let mut fields: Vec<Field> = Vec::new();

        loop {
            let c = match self.peek() {
                Some(c) => c,
                None if fields.is_empty() => return Err(unterminated),
                None => return Err(EXPECTING_BRACE),
            };
            if fields.last().map_or(false, |f| !f.in_spec) {
                self.field_char(c, &mut fields)?;
                continue;
            }
            match c {
                '\\' => {
                    self.pos += 1;
                    match self.peek() {
                        Some('\r') | Some('\n') => self.consume_newline(),
                        Some('N') if templated && !raw && self.peek_at(1) == Some('{') => {
                            self.pos += 1;
                            while let Some(c) = self.peek() {
                                if c == quote || c == '\n' || c == '\r' {
                                    break;
                                }
                                self.pos += c.len_utf8();
                                if c == '}' {
                                    break;
                                }
                            }
                        }
                        Some(next) => self.pos += next.len_utf8(),
                        None => {}
                    }
                }
                '\r' | '\n' if !triple => {
                    return Err(if fields.is_empty() { unterminated } else { EXPECTING_BRACE });
                }
                '\r' | '\n' => self.consume_newline(),
                c if c == quote && (!triple || (self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote))) => {
                    if !fields.is_empty() {
                        return Err(EXPECTING_BRACE);
                    }
                    let end = self.pos;
                    self.pos += if triple { 3 } else { 1 };
                    return Ok((body_start, end));
                }
                '{' if templated => {
                    if fields.is_empty() && self.peek_at(1) == Some('{') {
                        self.pos += 2;
                    } else {
                        self.pos += 1;
                        fields.push(Field::default());
                    }
                }
                '}' if templated => {
                    if fields.pop().is_some() {
                        self.pos += 1;
                    } else if self.peek_at(1) == Some('}') {
                        self.pos += 2;
                    } else {
                        return Err("f-string: single '}' is not allowed");
                    }
                }
                c => self.pos += c.len_utf8(),
            }
        }
    }

    /// One step through the expression part of the innermost replacement field.
    fn field_char(&mut self, c: char, fields: &mut Vec<Field>) -> std::result::Result<(), &'static str> {
        let field = match fields.last_mut() {
            Some(field) => field,
            None => return Ok(()),
        };
        match c {
            '(' | '[' | '{' => {
                field.brackets += 1;
                field.has_expression = true;
                self.pos += 1;
            }
            ')' | ']' | '}' if field.brackets > 0 => {
                field.brackets -= 1;
                self.pos += 1;
            }
            ')' | ']' => return Err("f-string: unmatched closing bracket"),
            '!' if self.peek_at(1) == Some('=') => {
                field.has_expression = true;
                self.pos += 2;
            }
            '}' | ':' | '!' if field.brackets == 0 => {
                if !field.has_expression {
                    return Err("f-string: valid expression required before '}'");
                }
                self.pos += 1;
                if c == ':' {
                    field.in_spec = true;
                } else if c == '}' {
                    fields.pop();
                }
            }
            '\'' | '"' => {
                field.has_expression = true;
                self.literal(false, false).map_err(|_| EXPECTING_BRACE)?;
            }
            c if is_ident_start(c) => {
                field.has_expression = true;
                let start = self.pos;
                while let Some(c) = self.peek() {
                    if !is_ident_continue(c) {
                        break;
                    }
                    self.pos += c.len_utf8();
                }
                let prefix = self.src[start..self.pos].to_ascii_lowercase();
                if matches!(self.peek(), Some('"') | Some('\'')) && is_string_prefix(&prefix) {
                    let templated = prefix.contains('f') || prefix.contains('t');
                    self.literal(templated, prefix.contains('r')).map_err(|_| EXPECTING_BRACE)?;
                }
            }
            '\r' | '\n' => self.consume_newline(),
            '#' => self.skip_comment(),
            '\\' => {
                self.pos += 1;
                match self.peek() {
                    Some('\r') | Some('\n') => self.consume_newline(),
                    Some(next) => self.pos += next.len_utf8(),
                    None => {}
                }
            }
            ' ' | '\t' | '\x0c' => self.pos += 1,
            c => {
                field.has_expression = true;
                self.pos += c.len_utf8();
            }
        }
        Ok(())
    }
}

const EXPECTING_BRACE: &str = "f-string: expecting '}'";

/// An open replacement field inside an f-string.
#[derive(Default)]
struct Field {
    brackets: usize,
    in_spec: bool,
    has_expression: bool,
}

/// Underscores may only sit between two digits, or right after a radix prefix.
fn valid_underscores(text: &str, radix: bool) -> bool {
    let bytes = text.as_bytes();
    let digit = |b: u8| if radix { b.is_ascii_hexdigit() } else { b.is_ascii_digit() };
    bytes.iter().enumerate().filter(|(_, b)| **b == b'_').all(|(i, _)| {
        let before = (radix && i == 2) || (i > 0 && digit(bytes[i - 1]));
        let after = bytes.get(i + 1).map_or(false, |b| digit(*b));
        before && after
    })
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

fn is_ident_continue(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

fn is_string_prefix(ident: &str) -> bool {
    matches!(
        ident.to_ascii_lowercase().as_str(),
        "r" | "u" | "b" | "f" | "br" | "rb" | "fr" | "rf" | "t" | "tr" | "rt"
    )
}

/// Escape sequence decoding shared by str and bytes literals.
enum Escaped {
    Char(char),
    Byte(u8),
    Nothing,
}

fn decode_escape(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    bytes: bool,
) -> std::result::Result<Escaped, String> {
    let c = match chars.next() {
        Some(c) => c,
        None => return Ok(Escaped::Char('\\')),
    };
    let simple = match c {
        '\n' => return Ok(Escaped::Nothing),
        '\r' => {
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            return Ok(Escaped::Nothing);
        }
        '\\' => '\\',
        '\'' => '\'',
        '"' => '"',
        'a' => '\x07',
        'b' => '\x08',
        'f' => '\x0c',
        'n' => '\n',
        'r' => '\r',
        't' => '\t',
        'v' => '\x0b',
        '0'..='7' => {
            let mut value = c.to_digit(8).unwrap_or(0);
            for _ in 0..2 {
                match chars.peek().and_then(|d| d.to_digit(8)) {
                    Some(d) => {
                        value = value * 8 + d;
                        chars.next();
                    }
                    None => break,
                }
            }
            if bytes {
                return Ok(Escaped::Byte((value & 0xff) as u8));
            }
            return char::from_u32(value)
                .map(Escaped::Char)
                .ok_or_else(|| "invalid octal escape".to_string());
        }
        'x' => {
            let value = read_hex(chars, 2).ok_or("truncated \\xXX escape")?;
            if bytes {
                return Ok(Escaped::Byte(value as u8));
            }
            return char::from_u32(value)
                .map(Escaped::Char)
                .ok_or_else(|| "invalid \\x escape".to_string());
        }
        'u' | 'U' if !bytes => {
            let width = if c == 'u' { 4 } else { 8 };
            let value = read_hex(chars, width).ok_or("truncated unicode escape")?;
            return char::from_u32(value)
                .map(Escaped::Char)
                .ok_or_else(|| "illegal Unicode character".to_string());
        }
        'N' if !bytes => {
            if chars.next() != Some('{') {
                return Err("malformed \\N character escape".to_string());
            }
            let mut name = String::new();
            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(c) => name.push(c),
                    None => return Err("malformed \\N character escape".to_string()),
                }
            }
            return unicode_names2::character(&name)
                .map(Escaped::Char)
                .ok_or_else(|| format!("unknown Unicode character name '{}'", name));
        }
        // Callers filter with is_known_escape first.
        other => other,
    };
    Ok(Escaped::Char(simple))
}

fn read_hex(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, width: usize) -> Option<u32> {
    let mut value = 0u32;
    for _ in 0..width {
        let d = chars.peek()?.to_digit(16)?;
        chars.next();
        value = value * 16 + d;
    }
    Some(value)
}

fn decode_str(body: &str) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let known = chars.peek().map_or(false, |n| is_known_escape(*n, false));
        if !known {
            out.push('\\');
            continue;
        }
        match decode_escape(&mut chars, false)? {
            Escaped::Char(ch) => out.push(ch),
            Escaped::Byte(b) => out.push(b as char),
            Escaped::Nothing => {}
        }
    }
    Ok(out)
}

fn decode_bytes(body: &str) -> std::result::Result<Vec<u8>, String> {
    if !body.is_ascii() {
        return Err("bytes can only contain ASCII literal characters".to_string());
    }
    let mut out = Vec::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c as u8);
            continue;
        }
        let known = chars.peek().map_or(false, |n| is_known_escape(*n, true));
        if !known {
            out.push(b'\\');
            continue;
        }
        match decode_escape(&mut chars, true)? {
            Escaped::Char(ch) => out.push(ch as u8),
            Escaped::Byte(b) => out.push(b),
            Escaped::Nothing => {}
        }
    }
    Ok(out)
}

fn is_known_escape(c: char, bytes: bool) -> bool {
    match c {
        '\n' | '\r' | '\\' | '\'' | '"' | 'a' | 'b' | 'f' | 'n' | 'r' | 't' | 'v' | 'x' => true,
        '0'..='7' => true,
        'u' | 'U' | 'N' => !bytes,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_simple_statement() {
        assert_eq!(
            kinds("x = 1\n"),
            vec![
                TokenKind::Name("x".into()),
                TokenKind::Op("="),
                TokenKind::Int("1".into()),
                TokenKind::Newline,
                TokenKind::EndMarker,
            ]
        );
    }

    #[test]
    fn test_indent_dedent() {
        let toks = kinds("if x:\n    y\nz");
        assert_eq!(
            toks,
            vec![
                TokenKind::Keyword(Keyword::If),
                TokenKind::Name("x".into()),
                TokenKind::Op(":"),
                TokenKind::Newline,
                TokenKind::Indent,
                TokenKind::Name("y".into()),
                TokenKind::Newline,
                TokenKind::Dedent,
                TokenKind::Name("z".into()),
                TokenKind::Newline,
                TokenKind::EndMarker,
            ]
        );
    }

    #[test]
    fn test_blank_and_comment_lines_are_skipped() {
        let toks = kinds("a\n\n   # note\n\nb  # trailing\n");
        assert_eq!(
            toks,
            vec![
                TokenKind::Name("a".into()),
                TokenKind::Newline,
                TokenKind::Name("b".into()),
                TokenKind::Newline,
                TokenKind::EndMarker,
            ]
        );
    }

    #[test]
    fn test_brackets_join_lines() {
        let toks = kinds("f(1,\n  2)\n");
        assert!(!toks[..toks.len() - 2].contains(&TokenKind::Newline));
        assert!(!toks.contains(&TokenKind::Indent));
    }

    #[test]
    fn test_backslash_continuation() {
        let toks = kinds("x = 1 + \\\n    2\n");
        assert_eq!(toks.iter().filter(|k| **k == TokenKind::Newline).count(), 1);
        assert!(!toks.contains(&TokenKind::Indent));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("0x1F")[0], TokenKind::Int("0x1F".into()));
        assert_eq!(kinds("1_000")[0], TokenKind::Int("1_000".into()));
        assert_eq!(kinds("3.14")[0], TokenKind::Float("3.14".into()));
        assert_eq!(kinds(".5")[0], TokenKind::Float(".5".into()));
        assert_eq!(kinds("1e10")[0], TokenKind::Float("1e10".into()));
        assert_eq!(kinds("2j")[0], TokenKind::Imaginary("2j".into()));
        assert!(tokenize("12abc").is_err());
    }

    #[test]
    fn test_leading_zeros() {
        assert_eq!(kinds("0")[0], TokenKind::Int("0".into()));
        assert_eq!(kinds("00")[0], TokenKind::Int("00".into()));
        assert_eq!(kinds("0_0")[0], TokenKind::Int("0_0".into()));
        assert_eq!(kinds("0.9")[0], TokenKind::Float("0.9".into()));
        assert_eq!(kinds("09.5")[0], TokenKind::Float("09.5".into()));
        assert_eq!(kinds("09j")[0], TokenKind::Imaginary("09j".into()));

        let err = tokenize("x = 09\n").unwrap_err();
        assert!(err.message().contains("leading zeros"));
        assert_eq!(err.context_value("column"), Some("4"));
        assert!(tokenize("0777").is_err());
    }

    #[test]
    fn test_misplaced_underscores() {
        assert!(tokenize("1__0").is_err());
        assert!(tokenize("1_").is_err());
        assert!(tokenize("1_.5").is_err());
        assert!(tokenize("0x_ff").is_ok());
        assert!(tokenize("0x_").is_err());
    }

    #[test]
    fn test_strings() {
        assert_eq!(kinds("'a\\nb'")[0], TokenKind::Str("a\nb".into()));
        assert_eq!(kinds("r'a\\nb'")[0], TokenKind::Str("a\\nb".into()));
        assert_eq!(kinds("b'\\x41'")[0], TokenKind::Bytes(vec![0x41]));
        assert_eq!(kinds("'\\d'")[0], TokenKind::Str("\\d".into()));
        assert_eq!(kinds("\"\"\"a\nb\"\"\"")[0], TokenKind::Str("a\nb".into()));
        assert_eq!(kinds("f'{x}'")[0], TokenKind::FString("f'{x}'".into()));
        assert_eq!(kinds("t'{x}'")[0], TokenKind::FString("t'{x}'".into()));
    }

    #[test]
    fn test_named_unicode_escape() {
        assert_eq!(kinds("'\\N{BULLET} a'")[0], TokenKind::Str("\u{2022} a".into()));
        assert_eq!(kinds("r'\\N{BULLET}'")[0], TokenKind::Str("\\N{BULLET}".into()));
        assert!(tokenize("'\\N{NOT A REAL NAME}'").is_err());
        assert!(tokenize("'\\N{BULLET'").is_err());
        // not an escape in bytes literals
        assert_eq!(kinds("b'\\N'")[0], TokenKind::Bytes(b"\\N".to_vec()));
    }

    #[test]
    fn test_byte_order_mark_is_skipped() {
        let toks = tokenize("\u{feff}x = 1\n").unwrap();
        assert_eq!(toks[0].kind, TokenKind::Name("x".into()));
        assert_eq!(toks[0].span.column, 0);
        assert!(tokenize("x = \u{feff}1\n").is_err());
    }

    #[test]
    fn test_fstring_fields() {
        for src in [
            "f'{x!r:>{width}}'",
            "f'{{literal}}'",
            "f'{d[\"key\"]}'",
            "f\"{x[\"a\"]}\"",
            "f'{f'{x}'}'",
            "f'{a != b}'",
            "f'{s[1:2]}'",
            "f'\\N{BULLET} {x}'",
            "f'''{\n  x\n}'''",
        ] {
            let toks = kinds(src);
            assert_eq!(toks[0], TokenKind::FString(src.to_string()), "{}", src);
            assert_eq!(toks.len(), 3, "{}", src);
        }
    }

    #[test]
    fn test_fstring_brace_errors() {
        let err = tokenize("x = f'{'").unwrap_err();
        assert!(err.message().contains("expecting '}'"), "{}", err);
        assert_eq!(err.context_value("column"), Some("4"));

        assert!(tokenize("f'}'").unwrap_err().message().contains("single '}'"));
        assert!(tokenize("f'{}'").unwrap_err().message().contains("valid expression required"));
        assert!(tokenize("f'{x'").is_err());
        assert!(tokenize("f'{x)}'").is_err());
        assert!(tokenize("f'{x:{y}'").is_err());
        assert_eq!(kinds("'{'")[0], TokenKind::Str("{".into()));
    }

    #[test]
    fn test_string_span_covers_prefix() {
        let toks = tokenize("x = rb'ab'").unwrap();
        assert_eq!(toks[2].span.start, 4);
        assert_eq!(toks[2].span.end, 10);
    }

    #[test]
    fn test_positions() {
        let toks = tokenize("a = 1\nbb = 2\n").unwrap();
        let bb = &toks[4];
        assert_eq!(bb.kind, TokenKind::Name("bb".into()));
        assert_eq!(bb.span.line, 2);
        assert_eq!(bb.span.column, 0);
    }

    #[test]
    fn test_errors() {
        assert!(tokenize("x = 'abc").is_err());
        assert!(tokenize("f(1").is_err());
        assert!(tokenize("x = 1)").is_err());
        assert!(tokenize("x = $").is_err());
        let err = tokenize("if x:\n        a\n    b\n").unwrap_err();
        assert!(err.message().contains("unindent"));
    }
}
