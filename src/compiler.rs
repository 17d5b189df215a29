//! Single-pass compiler from Ant source to bytecode.
//!
//! There is no syntax tree: statements are parsed by recursive descent,
//! expressions by a Pratt parser, and every production emits bytecode into
//! the chunk of the function being compiled as soon as it is recognised.
//!
//! # Scope model
//!
//! Nested function declarations push a [`FunctionState`] onto an explicit
//! stack; the innermost function is the last element.  Each state tracks the
//! locals that mirror the VM's stack window for that function and the
//! upvalue descriptors the finished closure needs.
//!
//! Identifiers resolve, in order, to a local slot of the current function,
//! an upvalue threaded through every enclosing function down from the one
//! that owns the variable, or an index in the shared [`Globals`] table.
//! Globals are never checked here; reading an unassigned one fails at run
//! time.
//!
//! # Errors
//!
//! The first error puts the parser in panic mode, which suppresses further
//! reports until it resynchronises at a statement boundary.  All errors are
//! returned together and no function is produced.

use std::fmt;

use crate::bytecode::{ChunkError, OpCode, UpvalueDesc, disassemble};
use crate::gc::{Heap, ObjRef};
use crate::globals::Globals;
use crate::lexer::Lexer;
use crate::token::{Token, TokenKind};
use crate::value::{Function, Object, Value};

/// Most parameters (and call arguments) a function can take.
pub const MAX_PARAMS: usize = 255;
/// Most upvalues a single function can capture.
pub const MAX_UPVALUES: usize = 256;
/// Most locals (including slot 0) live at once in one function.
pub const MAX_LOCALS: usize = 1 << 16;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Where in the source a [`CompileError`] points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorLocation {
    /// At a specific lexeme.
    Lexeme(String),
    /// At end of input.
    End,
    /// Scanner errors carry their own description.
    Scanner,
}

/// A compile-time error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub message: String,
    pub line: u32,
    pub location: ErrorLocation,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[line {}] Error", self.line)?;
        match &self.location {
            ErrorLocation::Lexeme(lexeme) => write!(f, " at '{lexeme}'")?,
            ErrorLocation::End => f.write_str(" at end")?,
            ErrorLocation::Scanner => {}
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for CompileError {}

/// Every error reported while compiling one source text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n"))]
pub struct CompileErrors(pub Vec<CompileError>);

impl CompileErrors {
    pub fn iter(&self) -> std::slice::Iter<'_, CompileError> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Precedence and parse rules
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! - +
    Call,       // ()
    Primary,
}

impl Precedence {
    fn next(self) -> Self {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call | Primary => Primary,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Prefix {
    Grouping,
    Unary,
    Number,
    String,
    Literal,
    Variable,
}

#[derive(Debug, Clone, Copy)]
enum Infix {
    Binary,
    Call,
    And,
    Or,
}

struct ParseRule {
    prefix: Option<Prefix>,
    infix: Option<Infix>,
    precedence: Precedence,
}

fn rule(kind: TokenKind) -> ParseRule {
    use TokenKind as T;
    let (prefix, infix, precedence) = match kind {
        T::LeftParen => (Some(Prefix::Grouping), Some(Infix::Call), Precedence::Call),
        T::Minus => (Some(Prefix::Unary), Some(Infix::Binary), Precedence::Term),
        T::Plus => (Some(Prefix::Unary), Some(Infix::Binary), Precedence::Term),
        T::Slash | T::Star => (None, Some(Infix::Binary), Precedence::Factor),
        T::Bang => (Some(Prefix::Unary), None, Precedence::None),
        T::BangEqual | T::EqualEqual => (None, Some(Infix::Binary), Precedence::Equality),
        T::Greater | T::GreaterEqual | T::Less | T::LessEqual => {
            (None, Some(Infix::Binary), Precedence::Comparison)
        }
        T::Identifier => (Some(Prefix::Variable), None, Precedence::None),
        T::String => (Some(Prefix::String), None, Precedence::None),
        T::Number => (Some(Prefix::Number), None, Precedence::None),
        T::And => (None, Some(Infix::And), Precedence::And),
        T::Or => (None, Some(Infix::Or), Precedence::Or),
        T::False | T::True | T::Nil => (Some(Prefix::Literal), None, Precedence::None),
        _ => (None, None, Precedence::None),
    };
    ParseRule {
        prefix,
        infix,
        precedence,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-function compile state
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
}

#[derive(Debug, Clone)]
struct Local<'src> {
    name: &'src str,
    /// `None` while the initializer is being compiled.
    depth: Option<u32>,
    /// Set once a nested function captures this slot.
    is_captured: bool,
}

struct FunctionState<'src> {
    function: Function,
    kind: FunctionKind,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: u32,
}

impl<'src> FunctionState<'src> {
    fn new(kind: FunctionKind, name: Option<&str>) -> Self {
        // Slot 0 holds the callee itself.
        let slot_zero = Local {
            name: "",
            depth: Some(0),
            is_captured: false,
        };
        Self {
            function: Function {
                name: name.map(str::to_string),
                ..Function::default()
            },
            kind,
            locals: vec![slot_zero],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Compiler
// ─────────────────────────────────────────────────────────────────────────────

/// Compile `source` into a top-level script function allocated in `heap`.
///
/// String literals are interned into `heap` and global names are registered
/// in `globals`, so a REPL can compile line after line against one VM.
pub fn compile(source: &str, heap: &mut Heap, globals: &mut Globals) -> Result<ObjRef, CompileErrors> {
    let mut compiler = Compiler::new(source, heap, globals);
    compiler.advance();
    while !compiler.match_token(TokenKind::Eof) {
        compiler.declaration();
    }
    let (function, _) = compiler.end_function();
    if compiler.errors.is_empty() {
        tracing::debug!(script = %function, "compiled");
        Ok(function)
    } else {
        tracing::debug!(errors = compiler.errors.len(), "compilation failed");
        Err(CompileErrors(compiler.errors))
    }
}

struct Compiler<'src, 'vm> {
    lexer: Lexer<'src>,
    source: &'src str,
    current: Token,
    previous: Token,
    panic_mode: bool,
    errors: Vec<CompileError>,
    /// Functions being compiled, innermost last.  Never empty.
    frames: Vec<FunctionState<'src>>,
    heap: &'vm mut Heap,
    globals: &'vm mut Globals,
}

impl<'src, 'vm> Compiler<'src, 'vm> {
    fn new(source: &'src str, heap: &'vm mut Heap, globals: &'vm mut Globals) -> Self {
        Self {
            lexer: Lexer::new(source),
            source,
            current: Token::synthetic(),
            previous: Token::synthetic(),
            panic_mode: false,
            errors: Vec::new(),
            frames: vec![FunctionState::new(FunctionKind::Script, None)],
            heap,
            globals,
        }
    }

    // ── Error helpers ────────────────────────────────────────────────────────

    fn error_at(&mut self, token: Token, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        let location = match token.kind {
            TokenKind::Eof => ErrorLocation::End,
            TokenKind::Error(_) => ErrorLocation::Scanner,
            _ => ErrorLocation::Lexeme(token.span.slice(self.source).to_string()),
        };
        self.errors.push(CompileError {
            message: message.to_string(),
            line: token.span.line,
            location,
        });
    }

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    /// Skip tokens until a likely statement boundary.
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon || self.current.kind.starts_statement() {
                return;
            }
            self.advance();
        }
    }

    // ── Token stream ─────────────────────────────────────────────────────────

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.lexer.next_token();
            match self.current.kind {
                TokenKind::Error(message) => self.error_at_current(message),
                _ => break,
            }
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    #[inline]
    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn lexeme(&self, token: Token) -> &'src str {
        token.span.slice(self.source)
    }

    // ── Frame helpers ────────────────────────────────────────────────────────

    fn frame(&self) -> &FunctionState<'src> {
        self.frames.last().expect("compiler frame stack is never empty")
    }

    fn frame_mut(&mut self) -> &mut FunctionState<'src> {
        self.frames.last_mut().expect("compiler frame stack is never empty")
    }

    fn code_len(&self) -> usize {
        self.frame().function.chunk.code.len()
    }

    // ── Emit helpers ─────────────────────────────────────────────────────────

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.span.line;
        self.frame_mut().function.chunk.write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_ops(&mut self, a: OpCode, b: OpCode) {
        self.emit_op(a);
        self.emit_op(b);
    }

    /// Emit an index-carrying instruction in its short or long form.
    fn emit_indexed(&mut self, op: OpCode, index: usize) {
        let line = self.previous.span.line;
        let result = self.frame_mut().function.chunk.write_indexed(op, index, line);
        if let Err(ChunkError::OperandTooLarge(_)) = result {
            let message = match op {
                OpCode::GetGlobal | OpCode::SetGlobal | OpCode::DefineGlobal => {
                    "Too many global variables."
                }
                OpCode::GetLocal | OpCode::SetLocal => "Too many local variables in function.",
                OpCode::GetUpvalue | OpCode::SetUpvalue => "Too many closure variables in function.",
                _ => "Too many constants in one chunk.",
            };
            self.error(message);
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let idx = self.frame_mut().function.chunk.add_constant(value);
        self.emit_indexed(OpCode::Constant, idx);
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        let line = self.previous.span.line;
        self.frame_mut().function.chunk.write_jump(op, line)
    }

    fn patch_jump(&mut self, offset: usize) {
        if self.frame_mut().function.chunk.patch_jump(offset).is_err() {
            self.error("Too much code to jump over.");
        }
    }

    fn emit_loop(&mut self, loop_start: usize) {
        let line = self.previous.span.line;
        if self.frame_mut().function.chunk.write_loop(loop_start, line).is_err() {
            self.error("Loop body too large.");
        }
    }

    /// Implicit `return nil`.
    fn emit_return(&mut self) {
        self.emit_ops(OpCode::Nil, OpCode::Return);
    }

    /// Finish the innermost function, move it onto the heap, and return its
    /// handle together with the upvalue descriptors its closure needs.
    fn end_function(&mut self) -> (ObjRef, Vec<UpvalueDesc>) {
        self.emit_return();
        let state = self.frames.pop().expect("compiler frame stack is never empty");
        let mut function = state.function;
        function.upvalue_count = state.upvalues.len();

        if self.errors.is_empty() && tracing::enabled!(tracing::Level::DEBUG) {
            let name = function.name.as_deref().unwrap_or("<script>");
            tracing::debug!(
                "\n{}",
                disassemble(&function.chunk, name, &*self.heap, &*self.globals)
            );
        }

        let handle = self.heap.alloc(Object::Function(function));
        (handle, state.upvalues)
    }

    // ── Scope management ─────────────────────────────────────────────────────

    fn begin_scope(&mut self) {
        self.frame_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.frame_mut().scope_depth -= 1;
        let depth = self.frame().scope_depth;

        while let Some(local) = self.frame().locals.last() {
            if local.depth.is_some_and(|d| d <= depth) {
                break;
            }
            let op = if local.is_captured {
                OpCode::CloseUpvalue
            } else {
                OpCode::Pop
            };
            self.emit_op(op);
            self.frame_mut().locals.pop();
        }
    }

    // ── Variable declaration ─────────────────────────────────────────────────

    fn add_local(&mut self, name: &'src str) {
        if self.frame().locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.frame_mut().locals.push(Local {
            name,
            depth: None,
            is_captured: false,
        });
    }

    /// Record the variable named by the previous token as a local of the
    /// current scope.  No-op at global scope.
    fn declare_variable(&mut self) {
        let frame = self.frame();
        if frame.scope_depth == 0 {
            return;
        }
        let name = self.lexeme(self.previous);
        let duplicate = frame
            .locals
            .iter()
            .rev()
            .take_while(|l| l.depth.is_none_or(|d| d >= frame.scope_depth))
            .any(|l| l.name == name);
        if duplicate {
            self.error("Variable with this name already declared in this scope.");
        }
        self.add_local(name);
    }

    /// Consume an identifier and declare it.  Returns the global index when
    /// at global scope.
    fn parse_variable(&mut self, message: &str) -> Option<usize> {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.frame().scope_depth > 0 {
            return None;
        }
        let name = self.lexeme(self.previous);
        Some(self.globals.resolve(name))
    }

    fn mark_initialized(&mut self) {
        let frame = self.frame_mut();
        if frame.scope_depth == 0 {
            return;
        }
        let depth = frame.scope_depth;
        if let Some(local) = frame.locals.last_mut() {
            local.depth = Some(depth);
        }
    }

    fn define_variable(&mut self, global: Option<usize>) {
        match global {
            Some(idx) => self.emit_indexed(OpCode::DefineGlobal, idx),
            None => self.mark_initialized(),
        }
    }

    // ── Variable resolution ──────────────────────────────────────────────────

    fn resolve_local(&mut self, frame_idx: usize, name: &str) -> Option<usize> {
        let (slot, initialized) = self.frames[frame_idx]
            .locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, l)| l.name == name)
            .map(|(i, l)| (i, l.depth.is_some()))?;
        if !initialized {
            self.error("Cannot read local variable in its own initializer.");
        }
        Some(slot)
    }

    /// Resolve `name` as an upvalue of `frames[frame_idx]`, threading
    /// descriptors through every function between it and the owner.
    fn resolve_upvalue(&mut self, frame_idx: usize, name: &str) -> Option<usize> {
        if frame_idx == 0 {
            return None;
        }
        if let Some(slot) = self.resolve_local(frame_idx - 1, name) {
            self.frames[frame_idx - 1].locals[slot].is_captured = true;
            return Some(self.add_upvalue(frame_idx, slot, true));
        }
        let upvalue = self.resolve_upvalue(frame_idx - 1, name)?;
        Some(self.add_upvalue(frame_idx, upvalue, false))
    }

    fn add_upvalue(&mut self, frame_idx: usize, index: usize, is_local: bool) -> usize {
        let Ok(index) = u8::try_from(index) else {
            self.error("Cannot capture a local variable beyond slot 255.");
            return 0;
        };
        let desc = UpvalueDesc { is_local, index };
        let upvalues = &self.frames[frame_idx].upvalues;
        if let Some(existing) = upvalues.iter().position(|u| *u == desc) {
            return existing;
        }
        if upvalues.len() >= MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return 0;
        }
        self.frames[frame_idx].upvalues.push(desc);
        self.frames[frame_idx].upvalues.len() - 1
    }

    fn named_variable(&mut self, name: &'src str, can_assign: bool) {
        let top = self.frames.len() - 1;
        let (get, set, idx) = if let Some(slot) = self.resolve_local(top, name) {
            (OpCode::GetLocal, OpCode::SetLocal, slot)
        } else if let Some(upvalue) = self.resolve_upvalue(top, name) {
            (OpCode::GetUpvalue, OpCode::SetUpvalue, upvalue)
        } else {
            (OpCode::GetGlobal, OpCode::SetGlobal, self.globals.resolve(name))
        };

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_indexed(set, idx);
        } else {
            self.emit_indexed(get, idx);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Declarations
    // ─────────────────────────────────────────────────────────────────────────

    fn declaration(&mut self) {
        if self.match_token(TokenKind::Fn) {
            self.fn_declaration();
        } else if self.match_token(TokenKind::Let) {
            self.let_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn fn_declaration(&mut self) {
        let global = self.parse_variable("Expected function name.");
        // Initialized before the body so the function can call itself.
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    fn let_declaration(&mut self) {
        let global = self.parse_variable("Expected variable name.");
        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(
            TokenKind::Semicolon,
            "Expected ';' after variable declaration.",
        );
        self.define_variable(global);
    }

    /// Compile a parameter list and body, then emit the closure instruction
    /// into the enclosing function.
    fn function(&mut self, kind: FunctionKind) {
        let name = self.lexeme(self.previous);
        self.frames.push(FunctionState::new(kind, Some(name)));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expected '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            let mut arity = 0usize;
            loop {
                arity += 1;
                if arity > MAX_PARAMS {
                    self.error_at_current("Cannot have more than 255 parameters.");
                }
                self.frame_mut().function.arity = arity.min(MAX_PARAMS) as u8;
                let param = self.parse_variable("Expected parameter name.");
                self.define_variable(param);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expected ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expected '{' before function body.");
        self.block();

        let (function, upvalues) = self.end_function();
        let idx = self
            .frame_mut()
            .function
            .chunk
            .add_constant(Value::Obj(function));
        self.emit_indexed(OpCode::Closure, idx);
        for upvalue in upvalues {
            self.emit_byte(u8::from(upvalue.is_local));
            self.emit_byte(upvalue.index);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Statements
    // ─────────────────────────────────────────────────────────────────────────

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expected '}' after block.");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expected ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expected ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expected '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expected ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        let else_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);
        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.code_len();
        self.consume(TokenKind::LeftParen, "Expected '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expected ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expected '(' after 'for'.");
        if self.match_token(TokenKind::Semicolon) {
            // no initializer
        } else if self.match_token(TokenKind::Let) {
            self.let_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.code_len();
        let mut exit_jump = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expected ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_token(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.code_len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expected ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }
        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.frame().kind == FunctionKind::Script {
            self.error("Cannot return from top-level code.");
        }
        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expected ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Expressions
    // ─────────────────────────────────────────────────────────────────────────

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = rule(self.previous.kind).prefix else {
            self.error("Expected expression.");
            return;
        };
        let can_assign = precedence <= Precedence::Assignment;
        self.prefix(prefix, can_assign);

        while precedence <= rule(self.current.kind).precedence {
            self.advance();
            if let Some(infix) = rule(self.previous.kind).infix {
                self.infix(infix);
            }
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn prefix(&mut self, prefix: Prefix, can_assign: bool) {
        match prefix {
            Prefix::Grouping => self.grouping(),
            Prefix::Unary => self.unary(),
            Prefix::Number => self.number(),
            Prefix::String => self.string(),
            Prefix::Literal => self.literal(),
            Prefix::Variable => {
                let name = self.lexeme(self.previous);
                self.named_variable(name, can_assign);
            }
        }
    }

    fn infix(&mut self, infix: Infix) {
        match infix {
            Infix::Binary => self.binary(),
            Infix::Call => self.call(),
            Infix::And => self.and(),
            Infix::Or => self.or(),
        }
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expected ')' after expression.");
    }

    fn number(&mut self) {
        match self.lexeme(self.previous).parse::<f64>() {
            Ok(n) => self.emit_constant(Value::Number(n)),
            Err(_) => self.error("Invalid number literal."),
        }
    }

    fn string(&mut self) {
        let lexeme = self.lexeme(self.previous);
        let content = lexeme
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(lexeme);
        let handle = self.heap.intern(content);
        self.emit_constant(Value::Obj(handle));
    }

    fn literal(&mut self) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::True => self.emit_op(OpCode::True),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            _ => {}
        }
    }

    fn unary(&mut self) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Plus => self.emit_op(OpCode::Positive),
            TokenKind::Bang => self.emit_op(OpCode::Not),
            _ => {}
        }
    }

    fn binary(&mut self) {
        let operator = self.previous.kind;
        self.parse_precedence(rule(operator).precedence.next());
        match operator {
            TokenKind::BangEqual => self.emit_ops(OpCode::Equal, OpCode::Not),
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => self.emit_ops(OpCode::Less, OpCode::Not),
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => self.emit_ops(OpCode::Greater, OpCode::Not),
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            _ => {}
        }
    }

    fn call(&mut self) {
        let arg_count = self.argument_list();
        self.emit_op(OpCode::Call);
        self.emit_byte(arg_count);
    }

    fn argument_list(&mut self) -> u8 {
        let mut count = 0usize;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count == MAX_PARAMS {
                    self.error("Cannot have more than 255 arguments.");
                }
                count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expected ')' after arguments.");
        count.min(MAX_PARAMS) as u8
    }

    fn and(&mut self) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or(&mut self) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
