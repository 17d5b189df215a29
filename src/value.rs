//! Runtime values for the Ant VM.
//!
//! [`Value`] is a small `Copy` tagged union.  Scalars are stored inline;
//! everything else is an [`ObjRef`] handle into the [`Heap`].
//!
//! # Object variants
//!
//! | Variant             | Payload        | Notes                                   |
//! |---------------------|----------------|-----------------------------------------|
//! | `Object::String`    | `Box<str>`     | Immutable, always interned              |
//! | `Object::Function`  | [`Function`]   | Compiled once, immutable afterwards     |
//! | `Object::Closure`   | [`Closure`]    | Function + captured upvalue handles     |
//! | `Object::Native`    | [`Native`]     | Rust function callable from scripts     |
//! | `Object::Upvalue`   | [`Upvalue`]    | Open stack-slot alias or closed copy    |

use std::fmt;

use crate::bytecode::Chunk;
use crate::gc::{GcTrace, Heap, ObjRef};

// ─────────────────────────────────────────────────────────────────────────────
// Value
// ─────────────────────────────────────────────────────────────────────────────

/// A runtime value in the Ant VM.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Bool(bool),
    /// 64-bit IEEE-754 number; the language has no separate integer type.
    Number(f64),
    Nil,
    /// Marks a global slot that has never been assigned.  Never produced by
    /// user code.
    Undefined,
    /// A heap object.  Equality is handle identity.
    Obj(ObjRef),
}

impl Value {
    /// `nil` and `false` are falsey; every other value is truthy.
    #[inline]
    pub fn is_falsey(self) -> bool {
        matches!(self, Value::Nil | Value::Bool(false))
    }

    #[inline]
    pub fn as_number(self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    #[inline]
    pub fn as_obj(self) -> Option<ObjRef> {
        match self {
            Value::Obj(r) => Some(r),
            _ => None,
        }
    }

    #[inline]
    pub fn is_undefined(self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Human-readable type name, for diagnostics.
    pub fn type_name(self, heap: &Heap) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Nil => "nil",
            Value::Undefined => "undefined",
            Value::Obj(r) => heap.get(r).type_name(),
        }
    }

    /// Borrow `heap` to render this value.
    pub fn display(self, heap: &Heap) -> ValueDisplay<'_> {
        ValueDisplay { value: self, heap }
    }
}

impl GcTrace for Value {
    fn trace(&self, gray: &mut Vec<ObjRef>) {
        if let Value::Obj(r) = self {
            gray.push(*r);
        }
    }
}

/// [`fmt::Display`] adapter returned by [`Value::display`].
pub struct ValueDisplay<'a> {
    value: Value,
    heap: &'a Heap,
}

impl fmt::Display for ValueDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => f.write_str(&format_number(n)),
            Value::Nil => f.write_str("nil"),
            Value::Undefined => f.write_str("Undefined"),
            Value::Obj(r) => fmt_object(self.heap, r, f),
        }
    }
}

fn fmt_object(heap: &Heap, r: ObjRef, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match heap.get(r) {
        Object::String(s) => f.write_str(s),
        Object::Function(func) => write!(f, "{func}"),
        Object::Closure(closure) => match heap.as_function(closure.function) {
            Some(func) => write!(f, "{func}"),
            None => f.write_str("<closure>"),
        },
        Object::Native(_) => f.write_str("<native fn>"),
        Object::Upvalue(_) => f.write_str("upvalue"),
    }
}

/// Format a number the way C's `%g` does: six significant digits, trailing
/// zeros trimmed, scientific notation outside `1e-4 ..= 1e6`.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if n == 0.0 {
        return if n.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    const PRECISION: i32 = 6;
    // Rounding to six significant digits decides the exponent.
    let sci = format!("{:.*e}", (PRECISION - 1) as usize, n);
    let (mantissa, exp) = sci.split_once('e').unwrap_or((&sci, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);

    if exp < -4 || exp >= PRECISION {
        let mantissa = trim_fraction(mantissa);
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exp.abs())
    } else {
        let decimals = (PRECISION - 1 - exp).max(0) as usize;
        trim_fraction(&format!("{n:.decimals$}")).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Heap objects
// ─────────────────────────────────────────────────────────────────────────────

/// Everything that can live in the [`Heap`].
#[derive(Debug)]
pub enum Object {
    String(Box<str>),
    Function(Function),
    Closure(Closure),
    Native(Native),
    Upvalue(Upvalue),
}

impl Object {
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::String(_) => "string",
            Object::Function(_) => "function",
            Object::Closure(_) => "function",
            Object::Native(_) => "native function",
            Object::Upvalue(_) => "upvalue",
        }
    }
}

impl GcTrace for Object {
    fn trace(&self, gray: &mut Vec<ObjRef>) {
        match self {
            Object::String(_) | Object::Native(_) => {}
            Object::Function(f) => f.trace(gray),
            Object::Closure(c) => c.trace(gray),
            Object::Upvalue(u) => u.trace(gray),
        }
    }

    fn heap_size(&self) -> usize {
        match self {
            Object::String(s) => s.len(),
            Object::Function(f) => f.heap_size(),
            Object::Closure(c) => c.heap_size(),
            Object::Native(n) => n.name.len(),
            Object::Upvalue(_) => 0,
        }
    }
}

// ── Function ──────────────────────────────────────────────────────────────────

/// A compiled function.  The top-level script is a function with no name.
#[derive(Debug, Default)]
pub struct Function {
    pub arity: u8,
    pub upvalue_count: usize,
    pub chunk: Chunk,
    pub name: Option<String>,
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "<fn {name}>"),
            None => f.write_str("<script>"),
        }
    }
}

impl GcTrace for Function {
    fn trace(&self, gray: &mut Vec<ObjRef>) {
        for constant in &self.chunk.constants {
            constant.trace(gray);
        }
    }

    fn heap_size(&self) -> usize {
        self.chunk.code.len()
            + self.chunk.constants.len() * std::mem::size_of::<Value>()
            + self.chunk.lines.ranges().len() * std::mem::size_of::<crate::bytecode::LineRange>()
    }
}

// ── Closure ───────────────────────────────────────────────────────────────────

/// One runtime instantiation of a function literal.
#[derive(Debug)]
pub struct Closure {
    /// Handle to the shared [`Function`].
    pub function: ObjRef,
    /// Handles to [`Upvalue`] objects, one per captured variable.
    pub upvalues: Vec<ObjRef>,
}

impl GcTrace for Closure {
    fn trace(&self, gray: &mut Vec<ObjRef>) {
        gray.push(self.function);
        gray.extend(self.upvalues.iter().copied());
    }

    fn heap_size(&self) -> usize {
        self.upvalues.len() * std::mem::size_of::<ObjRef>()
    }
}

// ── Upvalue ───────────────────────────────────────────────────────────────────

/// A captured variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Upvalue {
    /// Still lives on the operand stack at this absolute slot.
    Open(usize),
    /// Owns its value; the originating frame is gone.
    Closed(Value),
}

impl Upvalue {
    /// The stack slot this upvalue aliases, while open.
    pub fn open_slot(self) -> Option<usize> {
        match self {
            Upvalue::Open(slot) => Some(slot),
            Upvalue::Closed(_) => None,
        }
    }
}

impl GcTrace for Upvalue {
    fn trace(&self, gray: &mut Vec<ObjRef>) {
        if let Upvalue::Closed(v) = self {
            v.trace(gray);
        }
    }
}

// ── Native ────────────────────────────────────────────────────────────────────

/// Signature of a Rust function callable from Ant code.
///
/// The slice holds exactly the call's arguments.  An `Err` becomes a runtime
/// error with the returned message.
pub type NativeFn = fn(args: &[Value]) -> Result<Value, String>;

/// A native function object.
pub struct Native {
    pub name: String,
    pub func: NativeFn,
}

impl fmt::Debug for Native {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Native({})", self.name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
