//! The Ant virtual machine.
//!
//! The VM is a stack-based interpreter over [`Chunk`] bytecode.  One
//! [`Vm`] owns everything a program touches: the object [`Heap`], the
//! [`Globals`] table, the operand stack, the call frames, and the list of
//! open upvalues.  Several VMs can live side by side.
//!
//! # Execution model
//!
//! - The operand stack is shared by every active call.  A frame's `base` is
//!   the stack index of the callee itself (local slot 0); arguments follow
//!   it, so a call never copies its arguments.
//! - The running frame is held in a local while the dispatch loop runs;
//!   suspended callers live in `frames`.
//! - Open upvalues are kept ordered by stack slot, highest last, so closing
//!   everything at or above a slot pops from the end.
//!
//! # Errors
//!
//! A runtime error captures a stack trace, then the stack, frames, and open
//! upvalues are reset.  Globals and the heap survive, so the same VM keeps
//! working (this is what the REPL relies on).

use std::fmt;
use std::io::{self, Write};

use crate::builtins;
use crate::bytecode::{Chunk, OpCode, disassemble_instruction};
use crate::compiler::{CompileErrors, compile};
use crate::gc::{Heap, ObjRef};
use crate::globals::Globals;
use crate::value::{Closure, Function, Native, NativeFn, Object, Upvalue, Value};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Tunables for one [`Vm`].
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Maximum number of simultaneously active calls, script included.
    pub frames_max: usize,
    /// Heap size in bytes that triggers the first collection.
    pub gc_threshold: usize,
    /// Collect before every instruction.
    pub gc_stress: bool,
    /// Emit a `trace!` event with the stack and instruction per step.
    pub trace_execution: bool,
}

impl VmConfig {
    pub const DEFAULT_FRAMES_MAX: usize = 64;

    pub fn with_frames_max(mut self, frames_max: usize) -> Self {
        self.frames_max = frames_max.max(1);
        self
    }

    pub fn with_gc_threshold(mut self, bytes: usize) -> Self {
        self.gc_threshold = bytes;
        self
    }

    pub fn with_gc_stress(mut self, stress: bool) -> Self {
        self.gc_stress = stress;
        self
    }

    pub fn with_trace_execution(mut self, trace: bool) -> Self {
        self.trace_execution = trace;
        self
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            frames_max: Self::DEFAULT_FRAMES_MAX,
            gc_threshold: Heap::INITIAL_THRESHOLD,
            gc_stress: false,
            trace_execution: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// One line of a runtime stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub line: u32,
    /// `None` for the top-level script.
    pub function: Option<String>,
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.function {
            Some(name) => write!(f, "[line {}] in {name}()", self.line),
            None => write!(f, "[line {}] in script", self.line),
        }
    }
}

/// A runtime error raised by the VM, with the call stack at the fault,
/// innermost frame first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub message: String,
    pub trace: Vec<TraceEntry>,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        for entry in &self.trace {
            write!(f, "\n{entry}")?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

/// Why [`Vm::interpret`] failed.
#[derive(Debug, thiserror::Error)]
pub enum InterpretError {
    #[error(transparent)]
    Compile(#[from] CompileErrors),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

type VmResult<T> = Result<T, RuntimeError>;

// ─────────────────────────────────────────────────────────────────────────────
// CallFrame
// ─────────────────────────────────────────────────────────────────────────────

/// One active call.
#[derive(Debug, Clone, Copy)]
struct CallFrame {
    closure: ObjRef,
    /// The closure's function, cached to skip one lookup per byte.
    function: ObjRef,
    /// Offset of the next byte to execute.
    ip: usize,
    /// Stack index of local slot 0.
    base: usize,
}

enum Callee {
    Closure(ObjRef),
    Native(NativeFn),
    NotCallable,
}

// ─────────────────────────────────────────────────────────────────────────────
// Vm
// ─────────────────────────────────────────────────────────────────────────────

/// The Ant virtual machine.  `print` output goes to `W`.
pub struct Vm<W: Write = io::Stdout> {
    heap: Heap,
    globals: Globals,
    stack: Vec<Value>,
    /// Suspended callers, outermost first.  The running frame is not here
    /// while [`Vm::run`] executes.
    frames: Vec<CallFrame>,
    /// Open upvalues ordered by stack slot, highest last.
    open_upvalues: Vec<ObjRef>,
    config: VmConfig,
    out: W,
}

impl Vm<io::Stdout> {
    /// A VM printing to standard output with default settings.
    pub fn new() -> Self {
        Self::with_output(io::stdout())
    }
}

impl Default for Vm<io::Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write> Vm<W> {
    pub fn with_output(out: W) -> Self {
        Self::with_config(VmConfig::default(), out)
    }

    /// Create a VM with explicit settings.  Builtins are registered before
    /// this returns.
    pub fn with_config(config: VmConfig, out: W) -> Self {
        let mut heap = Heap::with_threshold(config.gc_threshold);
        heap.set_stress(config.gc_stress);
        let mut vm = Vm {
            heap,
            globals: Globals::new(),
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(config.frames_max),
            open_upvalues: Vec::new(),
            config,
            out,
        };
        builtins::register_all(&mut vm);
        vm
    }

    /// Expose a Rust function as the global `name`.
    pub fn register_native(&mut self, name: &str, func: NativeFn) {
        let native = self.heap.alloc(Object::Native(Native {
            name: name.to_string(),
            func,
        }));
        self.globals.define(name, Value::Obj(native));
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    /// Current value of the global `name`, if defined.
    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.globals.get_by_name(name)
    }

    /// Number of values on the operand stack.  Zero between runs.
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn into_output(self) -> W {
        self.out
    }

    // ── Entry point ──────────────────────────────────────────────────────────

    /// Compile and run `source`.
    ///
    /// Globals and heap objects persist across calls, so successive calls
    /// behave like successive REPL lines.
    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        let function = compile(source, &mut self.heap, &mut self.globals)?;
        let closure = self.heap.alloc(Object::Closure(Closure {
            function,
            upvalues: Vec::new(),
        }));
        self.stack.push(Value::Obj(closure));
        self.frames.push(CallFrame {
            closure,
            function,
            ip: 0,
            base: 0,
        });

        if let Err(err) = self.run() {
            tracing::debug!(message = %err.message, depth = err.trace.len(), "runtime error");
            self.reset();
            return Err(err.into());
        }
        Ok(())
    }

    /// Run a collection now, rooted at everything the VM can reach.
    /// Returns the number of objects freed.
    pub fn collect_garbage(&mut self) -> usize {
        self.collect(None)
    }

    /// Unwind after a fault.  Open upvalues are closed first so closures
    /// that escaped into globals keep the values they captured.
    fn reset(&mut self) {
        self.close_upvalues(0);
        self.stack.clear();
        self.frames.clear();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Dispatch loop
    // ─────────────────────────────────────────────────────────────────────────

    fn run(&mut self) -> VmResult<()> {
        let Some(mut frame) = self.frames.pop() else {
            return Ok(());
        };

        loop {
            if self.heap.should_collect() {
                self.collect(Some(&frame));
            }
            if self.config.trace_execution {
                self.trace_instruction(&frame);
            }

            let byte = self.read_byte(&mut frame);
            let op = match OpCode::try_from(byte) {
                Ok(op) => op,
                Err(b) => return Err(self.error(&frame, format!("unknown opcode {b:#04x}"))),
            };

            match op {
                // ── Constants ────────────────────────────────────────────────
                OpCode::Constant | OpCode::ConstantLong => {
                    let idx = self.read_index(&mut frame, op.is_long());
                    let value = self.chunk(&frame).constants[idx];
                    self.push(value);
                }
                OpCode::Nil => self.push(Value::Nil),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),

                // ── Stack ────────────────────────────────────────────────────
                OpCode::Pop => {
                    self.pop();
                }

                // ── Locals ───────────────────────────────────────────────────
                OpCode::GetLocal | OpCode::GetLocalLong => {
                    let slot = self.read_index(&mut frame, op.is_long());
                    let value = self.stack[frame.base + slot];
                    self.push(value);
                }
                OpCode::SetLocal | OpCode::SetLocalLong => {
                    let slot = self.read_index(&mut frame, op.is_long());
                    let value = self.peek(0);
                    self.stack[frame.base + slot] = value;
                }

                // ── Upvalues ─────────────────────────────────────────────────
                OpCode::GetUpvalue | OpCode::GetUpvalueLong => {
                    let idx = self.read_index(&mut frame, op.is_long());
                    let cell = self.closure(&frame).upvalues[idx];
                    let value = match self.upvalue(cell) {
                        Upvalue::Open(slot) => self.stack[slot],
                        Upvalue::Closed(value) => value,
                    };
                    self.push(value);
                }
                OpCode::SetUpvalue | OpCode::SetUpvalueLong => {
                    let idx = self.read_index(&mut frame, op.is_long());
                    let cell = self.closure(&frame).upvalues[idx];
                    let value = self.peek(0);
                    match self.upvalue(cell) {
                        Upvalue::Open(slot) => self.stack[slot] = value,
                        Upvalue::Closed(_) => self.set_upvalue(cell, Upvalue::Closed(value)),
                    }
                }
                OpCode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }

                // ── Globals ──────────────────────────────────────────────────
                OpCode::GetGlobal | OpCode::GetGlobalLong => {
                    let idx = self.read_index(&mut frame, op.is_long());
                    let value = self.globals.get(idx);
                    if value.is_undefined() {
                        return Err(self.undefined_variable(&frame, idx));
                    }
                    self.push(value);
                }
                OpCode::SetGlobal | OpCode::SetGlobalLong => {
                    let idx = self.read_index(&mut frame, op.is_long());
                    if self.globals.get(idx).is_undefined() {
                        return Err(self.undefined_variable(&frame, idx));
                    }
                    let value = self.peek(0);
                    self.globals.set(idx, value);
                }
                OpCode::DefineGlobal | OpCode::DefineGlobalLong => {
                    let idx = self.read_index(&mut frame, op.is_long());
                    let value = self.pop();
                    self.globals.set(idx, value);
                }

                // ── Comparison ───────────────────────────────────────────────
                OpCode::Equal => {
                    let (a, b) = self.pop2();
                    self.push(Value::Bool(a == b));
                }
                OpCode::Greater => self.binary_number(&frame, |a, b| Value::Bool(a > b))?,
                OpCode::Less => self.binary_number(&frame, |a, b| Value::Bool(a < b))?,

                // ── Arithmetic ───────────────────────────────────────────────
                OpCode::Add => self.add(&frame)?,
                OpCode::Subtract => self.binary_number(&frame, |a, b| Value::Number(a - b))?,
                OpCode::Multiply => self.binary_number(&frame, |a, b| Value::Number(a * b))?,
                OpCode::Divide => self.binary_number(&frame, |a, b| Value::Number(a / b))?,
                OpCode::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsey()));
                }
                OpCode::Negate => {
                    let Some(n) = self.peek(0).as_number() else {
                        return Err(self.error(&frame, "Operand must be a number."));
                    };
                    self.pop();
                    self.push(Value::Number(-n));
                }
                OpCode::Positive => {
                    if self.peek(0).as_number().is_none() {
                        return Err(self.error(&frame, "Operand must be a number."));
                    }
                }

                // ── Statements ───────────────────────────────────────────────
                OpCode::Print => {
                    let value = self.pop();
                    if let Err(e) = writeln!(self.out, "{}", value.display(&self.heap)) {
                        return Err(self.error(&frame, format!("failed to write output: {e}")));
                    }
                }

                // ── Control flow ─────────────────────────────────────────────
                OpCode::Jump => {
                    let offset = self.read_u16(&mut frame);
                    frame.ip += offset;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16(&mut frame);
                    if self.peek(0).is_falsey() {
                        frame.ip += offset;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16(&mut frame);
                    frame.ip -= offset;
                }

                // ── Calls and closures ───────────────────────────────────────
                OpCode::Call => {
                    let arg_count = self.read_byte(&mut frame) as usize;
                    self.call_value(&mut frame, arg_count)?;
                }
                OpCode::Closure | OpCode::ClosureLong => {
                    let idx = self.read_index(&mut frame, op.is_long());
                    let function = match self.chunk(&frame).constants[idx] {
                        Value::Obj(r) => r,
                        other => {
                            let kind = other.type_name(&self.heap);
                            return Err(self.error(&frame, format!("cannot close over a {kind}")));
                        }
                    };
                    let upvalue_count = self.function(function).upvalue_count;
                    let mut upvalues = Vec::with_capacity(upvalue_count);
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte(&mut frame) != 0;
                        let index = self.read_byte(&mut frame) as usize;
                        let cell = if is_local {
                            self.capture_upvalue(frame.base + index)
                        } else {
                            self.closure(&frame).upvalues[index]
                        };
                        upvalues.push(cell);
                    }
                    let closure = self
                        .heap
                        .alloc(Object::Closure(Closure { function, upvalues }));
                    self.push(Value::Obj(closure));
                }
                OpCode::Return => {
                    let result = self.pop();
                    self.close_upvalues(frame.base);
                    self.stack.truncate(frame.base);
                    match self.frames.pop() {
                        Some(caller) => {
                            self.push(result);
                            frame = caller;
                        }
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Call dispatch
    // ─────────────────────────────────────────────────────────────────────────

    fn call_value(&mut self, frame: &mut CallFrame, arg_count: usize) -> VmResult<()> {
        let callee_slot = self.stack.len() - 1 - arg_count;
        let callee = match self.stack[callee_slot] {
            Value::Obj(r) => match self.heap.get(r) {
                Object::Closure(_) => Callee::Closure(r),
                Object::Native(native) => Callee::Native(native.func),
                _ => Callee::NotCallable,
            },
            _ => Callee::NotCallable,
        };

        match callee {
            Callee::Closure(closure) => {
                let function = self.closure_function(closure);
                let arity = self.function(function).arity as usize;
                if arg_count != arity {
                    return Err(self.error(
                        frame,
                        format!("expected {arity} arguments but got {arg_count}"),
                    ));
                }
                if self.frames.len() + 1 >= self.config.frames_max {
                    return Err(self.error(frame, "reached maximum call stack depth"));
                }
                self.frames.push(*frame);
                *frame = CallFrame {
                    closure,
                    function,
                    ip: 0,
                    base: callee_slot,
                };
                Ok(())
            }
            Callee::Native(func) => {
                let result = match func(&self.stack[callee_slot + 1..]) {
                    Ok(value) => value,
                    Err(message) => return Err(self.error(frame, message)),
                };
                self.stack.truncate(callee_slot);
                self.push(result);
                Ok(())
            }
            Callee::NotCallable => Err(self.error(frame, "Can only call functions and closures.")),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Upvalues
    // ─────────────────────────────────────────────────────────────────────────

    /// Return the open upvalue aliasing `slot`, creating it if needed.
    fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        let mut insert_at = self.open_upvalues.len();
        for (i, &cell) in self.open_upvalues.iter().enumerate().rev() {
            match self.upvalue(cell).open_slot() {
                Some(open) if open == slot => return cell,
                Some(open) if open < slot => break,
                _ => insert_at = i,
            }
        }
        let cell = self.heap.alloc(Object::Upvalue(Upvalue::Open(slot)));
        self.open_upvalues.insert(insert_at, cell);
        cell
    }

    /// Close every open upvalue aliasing `from_slot` or any slot above it.
    fn close_upvalues(&mut self, from_slot: usize) {
        while let Some(&cell) = self.open_upvalues.last() {
            match self.upvalue(cell) {
                Upvalue::Open(slot) if slot < from_slot => break,
                Upvalue::Open(slot) => {
                    let value = self.stack[slot];
                    self.set_upvalue(cell, Upvalue::Closed(value));
                }
                Upvalue::Closed(_) => {}
            }
            self.open_upvalues.pop();
        }
    }

    fn upvalue(&self, cell: ObjRef) -> Upvalue {
        match self.heap.get(cell) {
            Object::Upvalue(u) => *u,
            other => unreachable!("expected an upvalue, found a {}", other.type_name()),
        }
    }

    fn set_upvalue(&mut self, cell: ObjRef, state: Upvalue) {
        if let Object::Upvalue(u) = self.heap.get_mut(cell) {
            *u = state;
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Frame access
    // ─────────────────────────────────────────────────────────────────────────

    fn function(&self, function: ObjRef) -> &Function {
        match self.heap.get(function) {
            Object::Function(f) => f,
            other => unreachable!("expected a function, found a {}", other.type_name()),
        }
    }

    fn closure(&self, frame: &CallFrame) -> &Closure {
        match self.heap.get(frame.closure) {
            Object::Closure(c) => c,
            other => unreachable!("expected a closure, found a {}", other.type_name()),
        }
    }

    fn closure_function(&self, closure: ObjRef) -> ObjRef {
        match self.heap.get(closure) {
            Object::Closure(c) => c.function,
            other => unreachable!("expected a closure, found a {}", other.type_name()),
        }
    }

    #[inline]
    fn chunk(&self, frame: &CallFrame) -> &Chunk {
        &self.function(frame.function).chunk
    }

    #[inline]
    fn read_byte(&self, frame: &mut CallFrame) -> u8 {
        let byte = self.chunk(frame).code[frame.ip];
        frame.ip += 1;
        byte
    }

    #[inline]
    fn read_u16(&self, frame: &mut CallFrame) -> usize {
        let value = self.chunk(frame).read_u16(frame.ip);
        frame.ip += 2;
        value as usize
    }

    /// Read a one-byte or three-byte index operand.
    #[inline]
    fn read_index(&self, frame: &mut CallFrame, long: bool) -> usize {
        if long {
            let value = self.chunk(frame).read_u24(frame.ip);
            frame.ip += 3;
            value
        } else {
            self.read_byte(frame) as usize
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stack helpers
    // ─────────────────────────────────────────────────────────────────────────

    #[inline]
    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline]
    fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow")
    }

    #[inline]
    fn pop2(&mut self) -> (Value, Value) {
        let b = self.pop();
        let a = self.pop();
        (a, b)
    }

    #[inline]
    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Arithmetic helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn binary_number(&mut self, frame: &CallFrame, op: impl Fn(f64, f64) -> Value) -> VmResult<()> {
        match (self.peek(1), self.peek(0)) {
            (Value::Number(a), Value::Number(b)) => {
                self.pop2();
                self.push(op(a, b));
                Ok(())
            }
            _ => Err(self.error(frame, "Operands must be numbers.")),
        }
    }

    /// `+`: numeric addition, or concatenation when both sides are strings.
    fn add(&mut self, frame: &CallFrame) -> VmResult<()> {
        let (a, b) = (self.peek(1), self.peek(0));
        if let (Value::Number(x), Value::Number(y)) = (a, b) {
            self.pop2();
            self.push(Value::Number(x + y));
            return Ok(());
        }
        let joined = match (a, b) {
            (Value::Obj(x), Value::Obj(y)) => match (self.heap.as_str(x), self.heap.as_str(y)) {
                (Some(x), Some(y)) => Some([x, y].concat()),
                _ => None,
            },
            _ => None,
        };
        let Some(joined) = joined else {
            return Err(self.error(frame, "Operands must be two numbers or two strings."));
        };
        let handle = self.heap.intern_owned(joined);
        self.pop2();
        self.push(Value::Obj(handle));
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Garbage collection
    // ─────────────────────────────────────────────────────────────────────────

    fn collect(&mut self, running: Option<&CallFrame>) -> usize {
        let stack = &self.stack;
        let globals = &self.globals;
        let open = &self.open_upvalues;
        let frames = &self.frames;
        self.heap.collect(|gray| {
            gray.extend(stack.iter().filter_map(|v| v.as_obj()));
            gray.extend(globals.roots());
            gray.extend(open.iter().copied());
            gray.extend(frames.iter().map(|f| f.closure));
            gray.extend(running.map(|f| f.closure));
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Diagnostics
    // ─────────────────────────────────────────────────────────────────────────

    fn trace_instruction(&self, frame: &CallFrame) {
        let stack: String = self
            .stack
            .iter()
            .map(|v| format!("[ {} ]", v.display(&self.heap)))
            .collect();
        let (text, _) =
            disassemble_instruction(self.chunk(frame), frame.ip, &self.heap, &self.globals);
        tracing::trace!("          {stack}\n{:04} {text}", frame.ip);
    }

    fn undefined_variable(&self, frame: &CallFrame, idx: usize) -> RuntimeError {
        let name = self.globals.name(idx).unwrap_or("?");
        self.error(frame, format!("Undefined variable '{name}'."))
    }

    /// Build a runtime error whose trace starts at `running` and walks out
    /// through every suspended caller.
    fn error(&self, running: &CallFrame, message: impl Into<String>) -> RuntimeError {
        let trace = std::iter::once(running)
            .chain(self.frames.iter().rev())
            .map(|frame| {
                let function = self.function(frame.function);
                TraceEntry {
                    line: function.chunk.line_at(frame.ip.saturating_sub(1)),
                    function: function.name.clone(),
                }
            })
            .collect();
        RuntimeError {
            message: message.into(),
            trace,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn run(src: &str) -> String {
        let mut vm = Vm::with_output(Vec::new());
        vm.interpret(src).expect("interpret failed");
        String::from_utf8(vm.into_output()).unwrap()
    }

    fn run_err(src: &str) -> RuntimeError {
        let mut vm = Vm::with_output(Vec::new());
        match vm.interpret(src) {
            Err(InterpretError::Runtime(e)) => e,
            other => panic!("expected a runtime error, got {other:?}"),
        }
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(run("print 1 + 2 * 3;"), "7\n");
        assert_eq!(run("print (1 + 2) * 3;"), "9\n");
        assert_eq!(run("print 10 / 4;"), "2.5\n");
        assert_eq!(run("print -(3 - 5);"), "2\n");
        assert_eq!(run("print +4;"), "4\n");
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(run("print 1 < 2; print 2 <= 2; print 3 > 4; print 3 >= 4;"), "true\ntrue\nfalse\nfalse\n");
        assert_eq!(run("print 1 == 1; print 1 != 1; print nil == false;"), "true\nfalse\nfalse\n");
        assert_eq!(run("print !nil; print !0;"), "true\nfalse\n");
    }

    #[test]
    fn test_logical_operators() {
        assert_eq!(run("print nil or 2; print 1 and 2; print false and 1;"), "2\n2\nfalse\n");
    }

    #[test]
    fn test_globals_and_locals() {
        assert_eq!(run("let x = 1; { let x = x + 1; print x; } print x;"), "2\n1\n");
        assert_eq!(run("let a; print a; a = 3; print a;"), "nil\n3\n");
    }

    #[test]
    fn test_control_flow() {
        assert_eq!(run("if (1 > 2) print 1; else print 2;"), "2\n");
        assert_eq!(run("let i = 0; while (i < 3) { print i; i = i + 1; }"), "0\n1\n2\n");
        assert_eq!(run("for (let i = 0; i < 3; i = i + 1) print i;"), "0\n1\n2\n");
    }

    #[test]
    fn test_closure_counter() {
        let src = "fn make(n) { fn inc() { n = n + 1; return n; } return inc; } \
                   let c = make(0); print c(); print c();";
        assert_eq!(run(src), "1\n2\n");
    }

    #[test]
    fn test_string_concat_interns() {
        let mut vm = Vm::with_output(Vec::new());
        vm.interpret("let a = \"a\" + \"b\"; let b = \"a\" + \"b\"; print a; print a == b;")
            .unwrap();
        let out = String::from_utf8(vm.output().clone()).unwrap();
        assert_eq!(out, "ab\ntrue\n");
        assert_eq!(vm.get_global("a"), vm.get_global("b"));
    }

    #[test]
    fn test_type_errors() {
        assert_eq!(
            run_err("print 1 + \"a\";").message,
            "Operands must be two numbers or two strings."
        );
        assert_eq!(run_err("print -\"a\";").message, "Operand must be a number.");
        assert_eq!(run_err("print 1 < nil;").message, "Operands must be numbers.");
        assert_eq!(run_err("let x = 1; x();").message, "Can only call functions and closures.");
    }

    #[test]
    fn test_undefined_global() {
        let err = run_err("print missing;");
        assert_eq!(err.message, "Undefined variable 'missing'.");
        assert_eq!(err.trace, vec![TraceEntry { line: 1, function: None }]);
        assert_eq!(run_err("missing = 1;").message, "Undefined variable 'missing'.");
    }

    #[test]
    fn test_arity_error_trace() {
        let err = run_err("fn f(a) {}\nfn g() {\n  f();\n}\ng();");
        assert_eq!(err.message, "expected 1 arguments but got 0");
        assert_eq!(
            err.to_string(),
            "expected 1 arguments but got 0\n[line 3] in g()\n[line 5] in script"
        );
    }

    #[test]
    fn test_stack_overflow_is_recoverable() {
        let mut vm = Vm::with_config(VmConfig::default().with_frames_max(16), Vec::new());
        match vm.interpret("fn f() { f(); } f();") {
            Err(InterpretError::Runtime(e)) => {
                assert_eq!(e.message, "reached maximum call stack depth");
                assert_eq!(e.trace.len(), 16);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(vm.stack_depth(), 0);
        vm.interpret("print 1;").unwrap();
        assert_eq!(vm.output(), b"1\n");
    }

    #[test]
    fn test_fault_closes_open_upvalues() {
        let mut vm = Vm::with_output(Vec::new());
        let src = "let g; fn f() { let x = \"kept\"; fn r() { return x; } g = r; nil(); } f();";
        assert!(matches!(vm.interpret(src), Err(InterpretError::Runtime(_))));
        assert!(vm.open_upvalues.is_empty());

        let Some(Value::Obj(closure)) = vm.get_global("g") else {
            panic!("g should hold a closure");
        };
        let Object::Closure(c) = vm.heap.get(closure) else {
            panic!("g should hold a closure");
        };
        let Object::Upvalue(Upvalue::Closed(Value::Obj(s))) = vm.heap.get(c.upvalues[0]) else {
            panic!("captured variable should be closed");
        };
        assert_eq!(vm.heap.as_str(*s), Some("kept"));
    }

    #[test]
    fn test_native_call() {
        let mut vm = Vm::with_output(Vec::new());
        vm.register_native("double", |args| match args {
            [Value::Number(n)] => Ok(Value::Number(n * 2.0)),
            _ => Err("double expects one number".to_string()),
        });
        vm.interpret("print double(21);").unwrap();
        assert_eq!(vm.output(), b"42\n");
        match vm.interpret("double(nil);") {
            Err(InterpretError::Runtime(e)) => assert_eq!(e.message, "double expects one number"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_gc_stress_keeps_live_objects() {
        let config = VmConfig::default().with_gc_stress(true);
        let mut vm = Vm::with_config(config, Vec::new());
        let src = "fn make(s) { fn get() { return s; } return get; } \
                   let g = make(\"x\" + \"y\"); \
                   let i = 0; while (i < 20) { let tmp = \"t\" + \"u\"; i = i + 1; } \
                   print g();";
        vm.interpret(src).unwrap();
        assert_eq!(vm.output(), b"xy\n");
        assert!(vm.heap().cycles > 0);
    }

    #[test]
    fn test_collect_frees_unreachable_strings() {
        let mut vm = Vm::with_output(Vec::new());
        vm.interpret("let keep = \"a\" + \"b\"; { let drop = \"c\" + \"d\"; }").unwrap();
        let before = vm.heap().live_objects();
        let freed = vm.collect_garbage();
        assert!(freed > 0);
        assert_eq!(vm.heap().live_objects(), before - freed);
        vm.interpret("print keep;").unwrap();
        assert_eq!(vm.output(), b"ab\n");
    }
}
