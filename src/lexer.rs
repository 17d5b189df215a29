//! Hand-rolled, on-demand scanner for the Ant language.
//!
//! The compiler pulls tokens one at a time with [`Lexer::next_token`]; no
//! token vector is ever materialised on the compile path.  [`lex`] collects
//! the full stream for tests and diagnostics.
//!
//! # Lexical rules
//!
//! - Whitespace (` `, `\t`, `\r`, `\n`) is skipped; `\n` advances the line.
//! - `#` starts a comment that runs to the end of the line.
//! - Numbers are decimal digits with an optional `.digits` fraction.  A
//!   trailing `.` with no digit after it is left for the next token.
//! - Strings are double-quoted, have no escapes, and may span lines.
//!
//! # Error handling
//!
//! Problems are reported in-band as [`TokenKind::Error`] tokens so the
//! compiler can record them alongside its own diagnostics and keep going.

use crate::token::{keyword, Span, Token, TokenKind};

// ─────────────────────────────────────────────────────────────────────────────
// Lexer struct
// ─────────────────────────────────────────────────────────────────────────────

/// The Ant lexical scanner.
pub struct Lexer<'src> {
    /// The full source text being scanned.
    src: &'src str,
    /// Iterator over `(byte_offset, char)` pairs.
    chars: std::str::CharIndices<'src>,
    /// The current character and its byte offset, or `None` at EOF.
    current: Option<(usize, char)>,
    /// One character of lookahead past `current`.
    peeked: Option<(usize, char)>,
    /// Current source line (1-indexed).
    line: u32,
    /// Current source column in characters (1-indexed).
    col: u32,
    /// Byte offset just past the most recently consumed character.
    pos: usize,
}

impl<'src> Lexer<'src> {
    /// Create a new lexer for the given source text.
    pub fn new(src: &'src str) -> Self {
        let mut chars = src.char_indices();
        let current = chars.next();
        let peeked = chars.next();
        Self {
            src,
            chars,
            current,
            peeked,
            line: 1,
            col: 1,
            pos: 0,
        }
    }

    /// Scan and return the next token.
    ///
    /// Once the input is exhausted every further call returns an
    /// [`TokenKind::Eof`] token positioned at the end of the source.
    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace_and_comments();

        let start_pos = self.current.map(|(o, _)| o).unwrap_or(self.src.len());
        let start_line = self.line;
        let start_col = self.col;

        let Some(ch) = self.advance() else {
            return Token::new(
                TokenKind::Eof,
                Span::new(start_pos, start_pos, start_line, start_col),
            );
        };

        let kind = match ch {
            '(' => TokenKind::LeftParen,
            ')' => TokenKind::RightParen,
            '{' => TokenKind::LeftBrace,
            '}' => TokenKind::RightBrace,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            '-' => TokenKind::Minus,
            '+' => TokenKind::Plus,
            ';' => TokenKind::Semicolon,
            '/' => TokenKind::Slash,
            '*' => TokenKind::Star,

            '!' => self.pick('=', TokenKind::BangEqual, TokenKind::Bang),
            '=' => self.pick('=', TokenKind::EqualEqual, TokenKind::Equal),
            '<' => self.pick('=', TokenKind::LessEqual, TokenKind::Less),
            '>' => self.pick('=', TokenKind::GreaterEqual, TokenKind::Greater),

            '"' => self.lex_string(),
            c if c.is_ascii_digit() => self.lex_number(),
            c if is_ident_start(c) => self.lex_identifier(start_pos),

            _ => TokenKind::Error("Unexpected character."),
        };

        Token::new(kind, self.make_span(start_pos, start_line, start_col))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internal scanning helpers
    // ─────────────────────────────────────────────────────────────────────────

    #[inline]
    fn peek(&self) -> Option<char> {
        self.current.map(|(_, c)| c)
    }

    #[inline]
    fn peek2(&self) -> Option<char> {
        self.peeked.map(|(_, c)| c)
    }

    /// Consume the current character, updating line/column and `pos`.
    fn advance(&mut self) -> Option<char> {
        let result = self.current;
        self.current = self.peeked;
        self.peeked = self.chars.next();

        let (offset, ch) = result?;
        self.pos = offset + ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    /// Consume the current character only if it equals `expected`.
    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Two-character operator helper: `matched` if the next char is `next`.
    fn pick(&mut self, next: char, matched: TokenKind, single: TokenKind) -> TokenKind {
        if self.eat(next) { matched } else { single }
    }

    #[inline]
    fn make_span(&self, start_pos: usize, start_line: u32, start_col: u32) -> Span {
        Span::new(start_pos, self.pos, start_line, start_col)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\r' | '\n') => {
                    self.advance();
                }
                Some('#') => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    /// Opening quote already consumed.
    fn lex_string(&mut self) -> TokenKind {
        while let Some(c) = self.peek() {
            if c == '"' {
                self.advance();
                return TokenKind::String;
            }
            self.advance();
        }
        TokenKind::Error("Unterminated string.")
    }

    /// First digit already consumed.
    fn lex_number(&mut self) -> TokenKind {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        if self.peek() == Some('.') && self.peek2().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        TokenKind::Number
    }

    fn lex_identifier(&mut self, start_pos: usize) -> TokenKind {
        while self.peek().is_some_and(is_ident_continue) {
            self.advance();
        }
        let text = &self.src[start_pos..self.pos];
        keyword(text).unwrap_or(TokenKind::Identifier)
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    /// Yields tokens up to, but not including, the end-of-file sentinel.
    fn next(&mut self) -> Option<Token> {
        let tok = self.next_token();
        (!tok.is_eof()).then_some(tok)
    }
}

#[inline]
fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

#[inline]
fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

// ─────────────────────────────────────────────────────────────────────────────
// Convenience entry point
// ─────────────────────────────────────────────────────────────────────────────

/// Scan `src` to completion.  The result always ends with an `Eof` token.
pub fn lex(src: &str) -> Vec<Token> {
    let mut lexer = Lexer::new(src);
    let mut tokens: Vec<Token> = lexer.by_ref().collect();
    tokens.push(lexer.next_token());
    tokens
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
