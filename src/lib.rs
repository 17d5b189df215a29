//! The Ant scripting language: a single-pass bytecode compiler and a
//! stack-based virtual machine with closures.
//!
//! The pipeline is:
//!
//! 1. **Lexer** (`lexer`): lazily scans source text into [`token::Token`]s.
//! 2. **Compiler** (`compiler`): a Pratt parser that emits bytecode directly,
//!    with no syntax tree in between.
//! 3. **Bytecode** (`bytecode`): `OpCode` definitions, `Chunk`, and the
//!    disassembler.
//! 4. **Values** (`value`): the `Value` enum and heap `Object` variants.
//! 5. **GC** (`gc`): handle-arena heap with mark-and-sweep collection.
//! 6. **Globals** (`globals`): the name-to-index table shared by compiler and VM.
//! 7. **Builtins** (`builtins`): native functions such as `clock`.
//! 8. **VM** (`vm`): the interpreter that executes closures.
//!
//! # Entry point
//!
//! ```rust,no_run
//! let mut vm = ant::vm::Vm::new();
//! vm.interpret("print 1 + 2;").unwrap();
//! ```

// ─────────────────────────────────────────────────────────────────────────────
// Modules
// ─────────────────────────────────────────────────────────────────────────────

pub mod builtins;
pub mod bytecode;
pub mod compiler;
pub mod gc;
pub mod globals;
pub mod lexer;
pub mod token;
pub mod value;
pub mod vm;

// ─────────────────────────────────────────────────────────────────────────────
// Unified error type
// ─────────────────────────────────────────────────────────────────────────────

use crate::compiler::CompileErrors;
use crate::vm::{InterpretError, RuntimeError, Vm, VmConfig};

/// Every way running an Ant program can fail.
#[derive(Debug, thiserror::Error)]
pub enum AntError {
    /// The source did not compile.  Holds every error found in the pass.
    #[error("{0}")]
    Compile(CompileErrors),

    /// Execution stopped with a runtime error.
    #[error("{0}")]
    Runtime(RuntimeError),

    /// Reading a script or writing output failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AntError {
    /// Conventional process exit status (sysexits) for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            AntError::Compile(_) => 65,
            AntError::Runtime(_) => 70,
            AntError::Io(_) => 74,
        }
    }
}

impl From<InterpretError> for AntError {
    fn from(err: InterpretError) -> Self {
        match err {
            InterpretError::Compile(e) => AntError::Compile(e),
            InterpretError::Runtime(e) => AntError::Runtime(e),
        }
    }
}

/// Shorthand result type for Ant operations.
pub type AntResult<T> = Result<T, AntError>;

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Compile and run `src` in a fresh VM that prints to stdout.
pub fn run_source(src: &str, config: VmConfig) -> AntResult<()> {
    let mut vm = Vm::with_config(config, std::io::stdout());
    vm.interpret(src)?;
    Ok(())
}

/// Read `path` and run it in a fresh VM that prints to stdout.
pub fn run_file(path: impl AsRef<std::path::Path>, config: VmConfig) -> AntResult<()> {
    let src = std::fs::read_to_string(path)?;
    run_source(&src, config)
}

/// Compile and run `src` in a fresh VM, returning what it printed.
pub fn run_captured(src: &str) -> AntResult<String> {
    let mut vm = Vm::with_output(Vec::new());
    vm.interpret(src)?;
    Ok(String::from_utf8_lossy(&vm.into_output()).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_captured() {
        assert_eq!(run_captured("print \"hi\";").unwrap(), "hi\n");
    }

    #[test]
    fn test_exit_codes() {
        let compile = run_captured("print 1 + ;").unwrap_err();
        assert!(matches!(compile, AntError::Compile(_)));
        assert_eq!(compile.exit_code(), 65);

        let runtime = run_captured("print -nil;").unwrap_err();
        assert!(matches!(runtime, AntError::Runtime(_)));
        assert_eq!(runtime.exit_code(), 70);

        let io = run_file("/definitely/not/here.ant", VmConfig::default()).unwrap_err();
        assert_eq!(io.exit_code(), 74);
    }
}
