//! Native (Rust) functions installed into every [`Vm`].
//!
//! Each native is a plain Rust function with the signature
//! `fn(&[Value]) -> Result<Value, String>`; an `Err` becomes a runtime error
//! carrying the returned message.
//!
//! | Name    | Arguments | Result |
//! |---------|-----------|--------|
//! | `clock` | none      | seconds elapsed since the process started, as a number |

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use crate::value::Value;
use crate::vm::Vm;

/// Register every builtin as a global of the same name.
pub fn register_all<W: Write>(vm: &mut Vm<W>) {
    // ── Time ──────────────────────────────────────────────────────────────────
    vm.register_native("clock", clock);
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn expect_args(name: &str, args: &[Value], n: usize) -> Result<(), String> {
    if args.len() != n {
        Err(format!(
            "{name} expects {n} argument{}, got {}",
            if n == 1 { "" } else { "s" },
            args.len()
        ))
    } else {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Time
// ─────────────────────────────────────────────────────────────────────────────

fn process_start() -> Instant {
    static START: OnceLock<Instant> = OnceLock::new();
    *START.get_or_init(Instant::now)
}

fn clock(args: &[Value]) -> Result<Value, String> {
    expect_args("clock", args, 0)?;
    Ok(Value::Number(process_start().elapsed().as_secs_f64()))
}
