//! Token types produced by the lexer

use std::fmt;

/// Byte range plus human position of a token.
///
/// `line` is 1-based, `column` is the 0-based byte offset within the line,
/// matching the positions Python tooling reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    False,
    None,
    True,
    And,
    As,
    Assert,
    Async,
    Await,
    Break,
    Class,
    Continue,
    Def,
    Del,
    Elif,
    Else,
    Except,
    Finally,
    For,
    From,
    Global,
    If,
    Import,
    In,
    Is,
    Lambda,
    Nonlocal,
    Not,
    Or,
    Pass,
    Raise,
    Return,
    Try,
    While,
    With,
    Yield,
}

impl Keyword {
    pub fn from_ident(ident: &str) -> Option<Keyword> {
        let kw = match ident {
            "False" => Keyword::False,
            "None" => Keyword::None,
            "True" => Keyword::True,
            "and" => Keyword::And,
            "as" => Keyword::As,
            "assert" => Keyword::Assert,
            "async" => Keyword::Async,
            "await" => Keyword::Await,
            "break" => Keyword::Break,
            "class" => Keyword::Class,
            "continue" => Keyword::Continue,
            "def" => Keyword::Def,
            "del" => Keyword::Del,
            "elif" => Keyword::Elif,
            "else" => Keyword::Else,
            "except" => Keyword::Except,
            "finally" => Keyword::Finally,
            "for" => Keyword::For,
            "from" => Keyword::From,
            "global" => Keyword::Global,
            "if" => Keyword::If,
            "import" => Keyword::Import,
            "in" => Keyword::In,
            "is" => Keyword::Is,
            "lambda" => Keyword::Lambda,
            "nonlocal" => Keyword::Nonlocal,
            "not" => Keyword::Not,
            "or" => Keyword::Or,
            "pass" => Keyword::Pass,
            "raise" => Keyword::Raise,
            "return" => Keyword::Return,
            "try" => Keyword::Try,
            "while" => Keyword::While,
            "with" => Keyword::With,
            "yield" => Keyword::Yield,
            _ => return None,
        };
        Some(kw)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Keyword::False => "False",
            Keyword::None => "None",
            Keyword::True => "True",
            Keyword::And => "and",
            Keyword::As => "as",
            Keyword::Assert => "assert",
            Keyword::Async => "async",
            Keyword::Await => "await",
            Keyword::Break => "break",
            Keyword::Class => "class",
            Keyword::Continue => "continue",
            Keyword::Def => "def",
            Keyword::Del => "del",
            Keyword::Elif => "elif",
            Keyword::Else => "else",
            Keyword::Except => "except",
            Keyword::Finally => "finally",
            Keyword::For => "for",
            Keyword::From => "from",
            Keyword::Global => "global",
            Keyword::If => "if",
            Keyword::Import => "import",
            Keyword::In => "in",
            Keyword::Is => "is",
            Keyword::Lambda => "lambda",
            Keyword::Nonlocal => "nonlocal",
            Keyword::Not => "not",
            Keyword::Or => "or",
            Keyword::Pass => "pass",
            Keyword::Raise => "raise",
            Keyword::Return => "return",
            Keyword::Try => "try",
            Keyword::While => "while",
            Keyword::With => "with",
            Keyword::Yield => "yield",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Name(String),
    Keyword(Keyword),
    /// Integer literal, source text kept verbatim
    Int(String),
    Float(String),
    Imaginary(String),
    /// Decoded string literal
    Str(String),
    Bytes(Vec<u8>),
    /// f-string, kept as raw source text (prefix and quotes included)
    FString(String),
    /// Operator or delimiter
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    EndMarker,
}

impl TokenKind {
    pub fn is_op(&self, op: &str) -> bool {
        matches!(self, TokenKind::Op(o) if *o == op)
    }

    pub fn is_keyword(&self, kw: Keyword) -> bool {
        matches!(self, TokenKind::Keyword(k) if *k == kw)
    }

    pub fn is_string_like(&self) -> bool {
        matches!(self, TokenKind::Str(_) | TokenKind::Bytes(_) | TokenKind::FString(_))
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Name(n) => write!(f, "name '{}'", n),
            TokenKind::Keyword(k) => write!(f, "keyword '{}'", k.as_str()),
            TokenKind::Int(t) | TokenKind::Float(t) | TokenKind::Imaginary(t) => {
                write!(f, "number '{}'", t)
            }
            TokenKind::Str(_) | TokenKind::Bytes(_) | TokenKind::FString(_) => {
                write!(f, "string literal")
            }
            TokenKind::Op(op) => write!(f, "'{}'", op),
            TokenKind::Newline => write!(f, "end of line"),
            TokenKind::Indent => write!(f, "indent"),
            TokenKind::Dedent => write!(f, "dedent"),
            TokenKind::EndMarker => write!(f, "end of input"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// Operators and delimiters, longest first so the lexer can match greedily.
pub(crate) const OPERATORS: &[&str] = &[
    "**=", "//=", ">>=", "<<=", "...", "->", ":=", "+=", "-=", "*=", "/=", "%=", "&=", "|=",
    "^=", "@=", "**", "//", "<<", ">>", "<=", ">=", "==", "!=", "+", "-", "*", "/", "%", "@",
    "&", "|", "^", "~", "<", ">", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";", "=",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_roundtrip() {
        for word in ["def", "lambda", "None", "nonlocal", "yield"] {
            let kw = Keyword::from_ident(word).unwrap();
            assert_eq!(kw.as_str(), word);
        }
        assert_eq!(Keyword::from_ident("match"), None);
        assert_eq!(Keyword::from_ident("print"), None);
    }

    #[test]
    fn test_operators_longest_first() {
        for (i, op) in OPERATORS.iter().enumerate() {
            for later in &OPERATORS[i + 1..] {
                assert!(
                    !later.starts_with(op) || later.len() <= op.len(),
                    "{} must come before {}",
                    later,
                    op
                );
            }
        }
    }
}
