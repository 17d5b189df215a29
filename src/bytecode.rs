//! Bytecode representation for the Ant virtual machine.
//!
//! A compiled Ant function owns a [`Chunk`]: a flat `Vec<u8>` of encoded
//! instructions, a constant pool of [`Value`]s, and a [`Lines`] table that
//! maps instruction offsets back to source lines for stack traces.
//!
//! # Encoding
//!
//! Each instruction is one [`OpCode`] byte followed by 0–3 operand bytes.
//! Multi-byte operands are little-endian.
//!
//! | Operand          | Width   | Used by                                         |
//! |------------------|---------|-------------------------------------------------|
//! | short index      | 1 byte  | constants, locals, upvalues, globals, closures  |
//! | long index       | 3 bytes | the `*Long` twin of each short-index opcode     |
//! | argument count   | 1 byte  | `Call`                                          |
//! | relative offset  | 2 bytes | `Jump`, `JumpIfFalse` (forward), `Loop` (back)  |
//!
//! `Closure`/`ClosureLong` are additionally followed by one
//! `(is_local, index)` byte pair per upvalue the function captures.

use std::fmt::Write as _;

use crate::gc::Heap;
use crate::globals::Globals;
use crate::value::Value;

/// Largest index encodable in a short (one byte) operand, plus one.
pub const SHORT_OPERAND_LIMIT: usize = 1 << 8;
/// Largest index encodable in a long (three byte) operand, plus one.
pub const LONG_OPERAND_LIMIT: usize = 1 << 24;

// ─────────────────────────────────────────────────────────────────────────────
// OpCode
// ─────────────────────────────────────────────────────────────────────────────

/// Every instruction the Ant VM can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    // ── Constants / literals ─────────────────────────────────────────────────
    /// Push a constant.  Operand: u8 pool index.
    Constant = 0x01,
    /// Push a constant.  Operand: u24 pool index.
    ConstantLong = 0x02,
    Nil = 0x03,
    True = 0x04,
    False = 0x05,

    // ── Stack manipulation ────────────────────────────────────────────────────
    /// Discard the top stack value.
    Pop = 0x10,

    // ── Local variables ───────────────────────────────────────────────────────
    /// Push the local at the given frame slot.
    GetLocal = 0x20,
    GetLocalLong = 0x21,
    /// Store the top of stack into a frame slot (the value stays on the stack).
    SetLocal = 0x22,
    SetLocalLong = 0x23,

    // ── Upvalues ──────────────────────────────────────────────────────────────
    /// Push the value an upvalue of the running closure refers to.
    GetUpvalue = 0x24,
    GetUpvalueLong = 0x25,
    /// Store the top of stack through an upvalue (the value stays on the stack).
    SetUpvalue = 0x26,
    SetUpvalueLong = 0x27,
    /// Close any open upvalue aliasing the top stack slot, then pop it.
    CloseUpvalue = 0x28,

    // ── Globals ───────────────────────────────────────────────────────────────
    /// Push a global.  Operand: global table index.
    GetGlobal = 0x30,
    GetGlobalLong = 0x31,
    /// Assign an already-defined global (the value stays on the stack).
    SetGlobal = 0x32,
    SetGlobalLong = 0x33,
    /// Pop the top of stack into a global, defining it.
    DefineGlobal = 0x34,
    DefineGlobalLong = 0x35,

    // ── Comparison ────────────────────────────────────────────────────────────
    Equal = 0x40,
    Greater = 0x41,
    Less = 0x42,

    // ── Arithmetic ────────────────────────────────────────────────────────────
    /// Number addition or string concatenation.
    Add = 0x50,
    Subtract = 0x51,
    Multiply = 0x52,
    Divide = 0x53,
    /// Boolean NOT of the operand's truthiness.
    Not = 0x54,
    /// Arithmetic negation.
    Negate = 0x55,
    /// Unary `+`: checks that the operand is a number.
    Positive = 0x56,

    // ── Statements ────────────────────────────────────────────────────────────
    /// Pop and print the top of stack followed by a newline.
    Print = 0x60,

    // ── Control flow ──────────────────────────────────────────────────────────
    /// Unconditional forward jump.  Operand: u16 distance.
    Jump = 0x70,
    /// Forward jump if the top of stack is falsey (does not pop).
    JumpIfFalse = 0x71,
    /// Unconditional backward jump.  Operand: u16 distance.
    Loop = 0x72,

    // ── Calls and closures ────────────────────────────────────────────────────
    /// Call the value below the arguments.  Operand: u8 argument count.
    Call = 0x80,
    /// Wrap a function constant in a closure.  Operand: u8 pool index, then
    /// the upvalue byte pairs.
    Closure = 0x81,
    ClosureLong = 0x82,
    /// Return the top of stack from the current function.
    Return = 0x83,
}

impl OpCode {
    /// The 24-bit twin of a short-index opcode, if it has one.
    pub fn long_form(self) -> Option<OpCode> {
        use OpCode::*;
        Some(match self {
            Constant => ConstantLong,
            GetLocal => GetLocalLong,
            SetLocal => SetLocalLong,
            GetUpvalue => GetUpvalueLong,
            SetUpvalue => SetUpvalueLong,
            GetGlobal => GetGlobalLong,
            SetGlobal => SetGlobalLong,
            DefineGlobal => DefineGlobalLong,
            Closure => ClosureLong,
            _ => return None,
        })
    }

    /// `true` for the opcodes carrying a 24-bit index operand.
    pub fn is_long(self) -> bool {
        use OpCode::*;
        matches!(
            self,
            ConstantLong
                | GetLocalLong
                | SetLocalLong
                | GetUpvalueLong
                | SetUpvalueLong
                | GetGlobalLong
                | SetGlobalLong
                | DefineGlobalLong
                | ClosureLong
        )
    }

    /// Upper-case mnemonic used by the disassembler.
    pub fn mnemonic(self) -> &'static str {
        use OpCode::*;
        match self {
            Constant => "CONSTANT",
            ConstantLong => "CONSTANT_LONG",
            Nil => "NIL",
            True => "TRUE",
            False => "FALSE",
            Pop => "POP",
            GetLocal => "GET_LOCAL",
            GetLocalLong => "GET_LOCAL_LONG",
            SetLocal => "SET_LOCAL",
            SetLocalLong => "SET_LOCAL_LONG",
            GetUpvalue => "GET_UPVALUE",
            GetUpvalueLong => "GET_UPVALUE_LONG",
            SetUpvalue => "SET_UPVALUE",
            SetUpvalueLong => "SET_UPVALUE_LONG",
            CloseUpvalue => "CLOSE_UPVALUE",
            GetGlobal => "GET_GLOBAL",
            GetGlobalLong => "GET_GLOBAL_LONG",
            SetGlobal => "SET_GLOBAL",
            SetGlobalLong => "SET_GLOBAL_LONG",
            DefineGlobal => "DEFINE_GLOBAL",
            DefineGlobalLong => "DEFINE_GLOBAL_LONG",
            Equal => "EQUAL",
            Greater => "GREATER",
            Less => "LESS",
            Add => "ADD",
            Subtract => "SUBTRACT",
            Multiply => "MULTIPLY",
            Divide => "DIVIDE",
            Not => "NOT",
            Negate => "NEGATE",
            Positive => "POSITIVE",
            Print => "PRINT",
            Jump => "JUMP",
            JumpIfFalse => "JUMP_IF_FALSE",
            Loop => "LOOP",
            Call => "CALL",
            Closure => "CLOSURE",
            ClosureLong => "CLOSURE_LONG",
            Return => "RETURN",
        }
    }
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        use OpCode::*;
        Ok(match byte {
            0x01 => Constant,
            0x02 => ConstantLong,
            0x03 => Nil,
            0x04 => True,
            0x05 => False,
            0x10 => Pop,
            0x20 => GetLocal,
            0x21 => GetLocalLong,
            0x22 => SetLocal,
            0x23 => SetLocalLong,
            0x24 => GetUpvalue,
            0x25 => GetUpvalueLong,
            0x26 => SetUpvalue,
            0x27 => SetUpvalueLong,
            0x28 => CloseUpvalue,
            0x30 => GetGlobal,
            0x31 => GetGlobalLong,
            0x32 => SetGlobal,
            0x33 => SetGlobalLong,
            0x34 => DefineGlobal,
            0x35 => DefineGlobalLong,
            0x40 => Equal,
            0x41 => Greater,
            0x42 => Less,
            0x50 => Add,
            0x51 => Subtract,
            0x52 => Multiply,
            0x53 => Divide,
            0x54 => Not,
            0x55 => Negate,
            0x56 => Positive,
            0x60 => Print,
            0x70 => Jump,
            0x71 => JumpIfFalse,
            0x72 => Loop,
            0x80 => Call,
            0x81 => Closure,
            0x82 => ClosureLong,
            0x83 => Return,
            other => return Err(other),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Upvalue descriptor
// ─────────────────────────────────────────────────────────────────────────────

/// How a closure obtains one of its upvalues when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpvalueDesc {
    /// `true`: capture a local slot of the enclosing frame.
    /// `false`: share an upvalue of the enclosing closure.
    pub is_local: bool,
    /// Slot index (`is_local`) or the enclosing closure's upvalue index.
    pub index: u8,
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// An encoding limit was exceeded while emitting into a [`Chunk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    #[error("operand index {0} does not fit in 24 bits")]
    OperandTooLarge(usize),
    #[error("jump distance {0} does not fit in 16 bits")]
    JumpTooLarge(usize),
    #[error("loop distance {0} does not fit in 16 bits")]
    LoopTooLarge(usize),
}

// ─────────────────────────────────────────────────────────────────────────────
// Line table
// ─────────────────────────────────────────────────────────────────────────────

/// A run of consecutive bytes, `[start, end)`, emitted for one source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
    pub line: u32,
}

/// Run-length encoded offset → line mapping.
///
/// Bytes are appended in order, so the ranges are sorted and contiguous.
#[derive(Debug, Clone, Default)]
pub struct Lines {
    ranges: Vec<LineRange>,
}

impl Lines {
    /// Record that the byte at `offset` came from `line`.
    ///
    /// `offset` must be one past the previously recorded byte.
    pub fn push(&mut self, offset: usize, line: u32) {
        if let Some(last) = self.ranges.last_mut() {
            if last.line == line && last.end == offset {
                last.end += 1;
                return;
            }
        }
        self.ranges.push(LineRange {
            start: offset,
            end: offset + 1,
            line,
        });
    }

    /// Source line of the byte at `offset`, if it was recorded.
    pub fn line_at(&self, offset: usize) -> Option<u32> {
        let idx = self.ranges.partition_point(|r| r.end <= offset);
        self.ranges
            .get(idx)
            .filter(|r| r.start <= offset)
            .map(|r| r.line)
    }

    pub fn ranges(&self) -> &[LineRange] {
        &self.ranges
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Chunk
// ─────────────────────────────────────────────────────────────────────────────

/// Bytecode, constants, and line mapping for one compiled function.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    /// Raw instruction bytes.
    pub code: Vec<u8>,
    /// Constant pool, in insertion order.
    pub constants: Vec<Value>,
    /// Source line ranges for `code`.
    pub lines: Lines,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Emission helpers ─────────────────────────────────────────────────────

    /// Append one raw byte (opcode or operand).
    #[inline]
    pub fn write(&mut self, byte: u8, line: u32) {
        self.lines.push(self.code.len(), line);
        self.code.push(byte);
    }

    #[inline]
    pub fn write_op(&mut self, op: OpCode, line: u32) {
        self.write(op as u8, line);
    }

    /// Emit `op` with an index operand, choosing the 8-bit form when the
    /// index fits a byte and the 24-bit long form otherwise.
    ///
    /// `op` must be a short-form opcode that has a long twin.
    pub fn write_indexed(&mut self, op: OpCode, index: usize, line: u32) -> Result<(), ChunkError> {
        if index < SHORT_OPERAND_LIMIT {
            self.write_op(op, line);
            self.write(index as u8, line);
            return Ok(());
        }
        if index >= LONG_OPERAND_LIMIT {
            return Err(ChunkError::OperandTooLarge(index));
        }
        let long = op.long_form().unwrap_or(op);
        self.write_op(long, line);
        let [b0, b1, b2, _] = (index as u32).to_le_bytes();
        self.write(b0, line);
        self.write(b1, line);
        self.write(b2, line);
        Ok(())
    }

    // ── Constant pool ────────────────────────────────────────────────────────

    /// Append a constant and return its index.  No deduplication.
    pub fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    // ── Jump patching ────────────────────────────────────────────────────────

    /// Emit a forward jump with a `0xFFFF` placeholder operand.
    /// Returns the offset of the operand so it can be patched later.
    pub fn write_jump(&mut self, op: OpCode, line: u32) -> usize {
        self.write_op(op, line);
        let patch_offset = self.code.len();
        self.write(0xFF, line);
        self.write(0xFF, line);
        patch_offset
    }

    /// Point the jump whose operand lives at `patch_offset` to the current end
    /// of the code.
    pub fn patch_jump(&mut self, patch_offset: usize) -> Result<(), ChunkError> {
        let distance = self.code.len() - patch_offset - 2;
        let distance16 = u16::try_from(distance).map_err(|_| ChunkError::JumpTooLarge(distance))?;
        let [lo, hi] = distance16.to_le_bytes();
        self.code[patch_offset] = lo;
        self.code[patch_offset + 1] = hi;
        Ok(())
    }

    /// Emit a backward jump to `loop_start`.
    pub fn write_loop(&mut self, loop_start: usize, line: u32) -> Result<(), ChunkError> {
        self.write_op(OpCode::Loop, line);
        let distance = self.code.len() - loop_start + 2;
        let distance16 = u16::try_from(distance).map_err(|_| ChunkError::LoopTooLarge(distance))?;
        let [lo, hi] = distance16.to_le_bytes();
        self.write(lo, line);
        self.write(hi, line);
        Ok(())
    }

    // ── Utilities ────────────────────────────────────────────────────────────

    /// Read a little-endian u16 at `offset`.
    #[inline]
    pub fn read_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.code[offset], self.code[offset + 1]])
    }

    /// Read a little-endian 24-bit value at `offset`.
    #[inline]
    pub fn read_u24(&self, offset: usize) -> usize {
        u32::from_le_bytes([
            self.code[offset],
            self.code[offset + 1],
            self.code[offset + 2],
            0,
        ]) as usize
    }

    /// Source line for the byte at `offset` (0 if unknown).
    #[inline]
    pub fn line_at(&self, offset: usize) -> u32 {
        self.lines.line_at(offset).unwrap_or(0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Disassembler
// ─────────────────────────────────────────────────────────────────────────────

/// Disassemble `chunk` to a human-readable listing.
///
/// `heap` resolves constant objects and `globals` supplies global names.
/// Debugging aid only; never on the execution path.
pub fn disassemble(chunk: &Chunk, name: &str, heap: &Heap, globals: &Globals) -> String {
    let mut out = format!("== {name} ==\n");
    let mut offset = 0usize;
    while offset < chunk.code.len() {
        let line = chunk.line_at(offset);
        let same_line = offset > 0 && chunk.line_at(offset - 1) == line;
        let (text, size) = disassemble_instruction(chunk, offset, heap, globals);
        if same_line {
            let _ = writeln!(out, "{offset:04}    | {text}");
        } else {
            let _ = writeln!(out, "{offset:04} {line:4} {text}");
        }
        offset += size;
    }
    out
}

/// Disassemble the instruction at `offset`.  Returns `(text, bytes_consumed)`.
pub fn disassemble_instruction(
    chunk: &Chunk,
    offset: usize,
    heap: &Heap,
    globals: &Globals,
) -> (String, usize) {
    let byte = chunk.code[offset];
    let op = match OpCode::try_from(byte) {
        Ok(op) => op,
        Err(_) => return (format!("UNKNOWN {byte:#04x}"), 1),
    };
    let name = op.mnemonic();

    let read_index = |at: usize| -> (usize, usize) {
        if op.is_long() {
            (chunk.read_u24(at), 3)
        } else {
            (chunk.code[at] as usize, 1)
        }
    };

    match op {
        OpCode::Constant | OpCode::ConstantLong => {
            let (idx, width) = read_index(offset + 1);
            let shown = render_constant(chunk, idx, heap);
            (format!("{name:<18} {idx:4} '{shown}'"), 1 + width)
        }

        OpCode::GetLocal
        | OpCode::GetLocalLong
        | OpCode::SetLocal
        | OpCode::SetLocalLong
        | OpCode::GetUpvalue
        | OpCode::GetUpvalueLong
        | OpCode::SetUpvalue
        | OpCode::SetUpvalueLong => {
            let (idx, width) = read_index(offset + 1);
            (format!("{name:<18} {idx:4}"), 1 + width)
        }

        OpCode::GetGlobal
        | OpCode::GetGlobalLong
        | OpCode::SetGlobal
        | OpCode::SetGlobalLong
        | OpCode::DefineGlobal
        | OpCode::DefineGlobalLong => {
            let (idx, width) = read_index(offset + 1);
            let global = globals.name(idx).unwrap_or("?");
            (format!("{name:<18} {idx:4} '{global}'"), 1 + width)
        }

        OpCode::Call => {
            let argc = chunk.code[offset + 1];
            (format!("{name:<18} {argc:4}"), 2)
        }

        OpCode::Jump | OpCode::JumpIfFalse => {
            let distance = chunk.read_u16(offset + 1) as usize;
            let target = offset + 3 + distance;
            (format!("{name:<18} {offset:4} -> {target}"), 3)
        }
        OpCode::Loop => {
            let distance = chunk.read_u16(offset + 1) as usize;
            let target = (offset + 3).saturating_sub(distance);
            (format!("{name:<18} {offset:4} -> {target}"), 3)
        }

        OpCode::Closure | OpCode::ClosureLong => {
            let (idx, width) = read_index(offset + 1);
            let mut text = format!("{name:<18} {idx:4} {}", render_constant(chunk, idx, heap));
            let upvalue_count = chunk
                .constants
                .get(idx)
                .and_then(|v| v.as_obj())
                .and_then(|r| heap.as_function(r))
                .map_or(0, |f| f.upvalue_count);
            let mut cursor = offset + 1 + width;
            for _ in 0..upvalue_count {
                let is_local = chunk.code[cursor] != 0;
                let index = chunk.code[cursor + 1];
                let kind = if is_local { "local" } else { "upvalue" };
                let _ = write!(text, "\n{cursor:04}    |                     {kind} {index}");
                cursor += 2;
            }
            (text, cursor - offset)
        }

        _ => (name.to_string(), 1),
    }
}

fn render_constant(chunk: &Chunk, idx: usize, heap: &Heap) -> String {
    chunk
        .constants
        .get(idx)
        .map(|v| v.display(heap).to_string())
        .unwrap_or_else(|| "<oob>".to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
