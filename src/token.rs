//! Token types and source location tracking for the Ant scanner.
//!
//! Tokens are tiny `Copy` values: a [`TokenKind`] plus a [`Span`] pointing
//! back into the source text.  The lexeme itself is never copied; the
//! compiler slices it out of the source on demand with [`Span::slice`].

use std::fmt;

// ─────────────────────────────────────────────────────────────────────────────
// Source location
// ─────────────────────────────────────────────────────────────────────────────

/// A half-open byte range `[start, end)` within the source string, together
/// with 1-indexed line and column numbers of `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// Byte offset of the first character (inclusive).
    pub start: usize,
    /// Byte offset one past the last character (exclusive).
    pub end: usize,
    /// 1-indexed source line of `start`.
    pub line: u32,
    /// 1-indexed source column of `start` (in chars, not bytes).
    pub col: u32,
}

impl Span {
    #[inline]
    pub fn new(start: usize, end: usize, line: u32, col: u32) -> Self {
        Self {
            start,
            end,
            line,
            col,
        }
    }

    /// Return the length in bytes of the spanned region.
    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Borrow the spanned text out of `src`.
    ///
    /// Returns an empty string if the span does not fall on valid boundaries
    /// of `src` (for example when a span is applied to the wrong source).
    #[inline]
    pub fn slice<'src>(&self, src: &'src str) -> &'src str {
        src.get(self.start..self.end).unwrap_or("")
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Token
// ─────────────────────────────────────────────────────────────────────────────

/// A single lexical token produced by the [`Lexer`](crate::lexer::Lexer).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    #[inline]
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// A zero-width placeholder used before the first token is scanned.
    pub fn synthetic() -> Self {
        Self::new(TokenKind::Eof, Span::new(0, 0, 1, 1))
    }

    #[inline]
    pub fn is_eof(&self) -> bool {
        self.kind == TokenKind::Eof
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.kind, self.span)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TokenKind
// ─────────────────────────────────────────────────────────────────────────────

/// The complete set of token kinds in the Ant language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // ── Punctuation ───────────────────────────────────────────────────────────
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    Comma,
    Dot,
    Minus,
    Plus,
    Semicolon,
    Slash,
    Star,

    // ── One or two character operators ────────────────────────────────────────
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,

    // ── Literals ──────────────────────────────────────────────────────────────
    Identifier,
    /// A string literal; the span includes both quotes.
    String,
    Number,

    // ── Keywords ──────────────────────────────────────────────────────────────
    And,
    /// Reserved, no grammar yet.
    Class,
    Else,
    False,
    For,
    Fn,
    If,
    Nil,
    Or,
    Print,
    Return,
    /// Reserved, no grammar yet.
    Super,
    /// Reserved, no grammar yet.
    This,
    True,
    Let,
    While,

    // ── Synthetic ─────────────────────────────────────────────────────────────
    /// A scanner diagnostic.  The span covers the offending text.
    Error(&'static str),
    /// End of input.  Returned forever once the source is exhausted.
    Eof,
}

impl TokenKind {
    /// Keywords that begin a statement; the compiler resynchronises on them.
    pub fn starts_statement(self) -> bool {
        matches!(
            self,
            TokenKind::Class
                | TokenKind::Fn
                | TokenKind::Let
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenKind::LeftParen => "(",
            TokenKind::RightParen => ")",
            TokenKind::LeftBrace => "{",
            TokenKind::RightBrace => "}",
            TokenKind::Comma => ",",
            TokenKind::Dot => ".",
            TokenKind::Minus => "-",
            TokenKind::Plus => "+",
            TokenKind::Semicolon => ";",
            TokenKind::Slash => "/",
            TokenKind::Star => "*",
            TokenKind::Bang => "!",
            TokenKind::BangEqual => "!=",
            TokenKind::Equal => "=",
            TokenKind::EqualEqual => "==",
            TokenKind::Greater => ">",
            TokenKind::GreaterEqual => ">=",
            TokenKind::Less => "<",
            TokenKind::LessEqual => "<=",
            TokenKind::Identifier => "identifier",
            TokenKind::String => "string",
            TokenKind::Number => "number",
            TokenKind::And => "and",
            TokenKind::Class => "class",
            TokenKind::Else => "else",
            TokenKind::False => "false",
            TokenKind::For => "for",
            TokenKind::Fn => "fn",
            TokenKind::If => "if",
            TokenKind::Nil => "nil",
            TokenKind::Or => "or",
            TokenKind::Print => "print",
            TokenKind::Return => "return",
            TokenKind::Super => "super",
            TokenKind::This => "this",
            TokenKind::True => "true",
            TokenKind::Let => "let",
            TokenKind::While => "while",
            TokenKind::Error(msg) => msg,
            TokenKind::Eof => "<eof>",
        };
        f.write_str(s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Keyword lookup
// ─────────────────────────────────────────────────────────────────────────────

/// Classify `s` as a keyword, or return `None` for a plain identifier.
pub fn keyword(s: &str) -> Option<TokenKind> {
    match s {
        "and" => Some(TokenKind::And),
        "class" => Some(TokenKind::Class),
        "else" => Some(TokenKind::Else),
        "false" => Some(TokenKind::False),
        "for" => Some(TokenKind::For),
        "fn" => Some(TokenKind::Fn),
        "if" => Some(TokenKind::If),
        "nil" => Some(TokenKind::Nil),
        "or" => Some(TokenKind::Or),
        "print" => Some(TokenKind::Print),
        "return" => Some(TokenKind::Return),
        "super" => Some(TokenKind::Super),
        "this" => Some(TokenKind::This),
        "true" => Some(TokenKind::True),
        "let" => Some(TokenKind::Let),
        "while" => Some(TokenKind::While),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_slice() {
        let src = "let answer = 42;";
        let span = Span::new(4, 10, 1, 5);
        assert_eq!(span.slice(src), "answer");
        assert_eq!(span.len(), 6);
        assert!(!span.is_empty());
    }

    #[test]
    fn test_span_slice_out_of_range() {
        let span = Span::new(10, 20, 1, 1);
        assert_eq!(span.slice("short"), "");
    }

    #[test]
    fn test_keyword_lookup() {
        assert_eq!(keyword("fn"), Some(TokenKind::Fn));
        assert_eq!(keyword("let"), Some(TokenKind::Let));
        assert_eq!(keyword("nil"), Some(TokenKind::Nil));
        assert_eq!(keyword("function"), None);
        assert_eq!(keyword("Let"), None);
    }

    #[test]
    fn test_statement_starters() {
        assert!(TokenKind::Print.starts_statement());
        assert!(TokenKind::Fn.starts_statement());
        assert!(!TokenKind::Identifier.starts_statement());
        assert!(!TokenKind::Semicolon.starts_statement());
    }

    #[test]
    fn test_display() {
        assert_eq!(TokenKind::BangEqual.to_string(), "!=");
        assert_eq!(TokenKind::Error("Unexpected character.").to_string(), "Unexpected character.");
    }
}
