//! Property-based tests for the bytecode encoding.
//!
//! - Every emitted byte maps back to the line it was written with, both for
//!   hand-built chunks and for compiled programs.
//! - Index operands pick the narrowest encoding and decode to the same index.

use ant::bytecode::{Chunk, ChunkError, LONG_OPERAND_LIMIT, OpCode, SHORT_OPERAND_LIMIT};
use ant::compiler::compile;
use ant::gc::Heap;
use ant::globals::Globals;
use proptest::prelude::*;

// =============================================================================
// Strategies
// =============================================================================

/// Runs of (line, byte count), mimicking statements spread over lines.
fn arb_line_runs() -> impl Strategy<Value = Vec<(u32, usize)>> {
    prop::collection::vec((1u32..10_000, 1usize..20), 1..50)
}

/// Blank lines to leave before each `print` statement.
fn arb_statement_gaps() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0usize..4, 1..40)
}

fn arb_indexed_op() -> impl Strategy<Value = OpCode> {
    prop_oneof![
        Just(OpCode::Constant),
        Just(OpCode::GetLocal),
        Just(OpCode::SetLocal),
        Just(OpCode::GetUpvalue),
        Just(OpCode::SetUpvalue),
        Just(OpCode::GetGlobal),
        Just(OpCode::SetGlobal),
        Just(OpCode::DefineGlobal),
        Just(OpCode::Closure),
    ]
}

// =============================================================================
// Line table
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// line_at returns the line each byte was written with.
    #[test]
    fn test_line_table_round_trip(runs in arb_line_runs()) {
        let mut chunk = Chunk::new();
        let mut expected = Vec::new();
        for (line, count) in &runs {
            for _ in 0..*count {
                chunk.write(0, *line);
                expected.push(*line);
            }
        }
        for (offset, line) in expected.iter().enumerate() {
            prop_assert_eq!(chunk.lines.line_at(offset), Some(*line));
        }
        prop_assert_eq!(chunk.lines.line_at(expected.len()), None);
    }

    /// Adjacent bytes on the same line share one range.
    #[test]
    fn test_line_table_is_run_length_encoded(runs in arb_line_runs()) {
        let mut chunk = Chunk::new();
        for (line, count) in &runs {
            for _ in 0..*count {
                chunk.write(0, *line);
            }
        }
        let mut distinct_runs = runs.iter().map(|(line, _)| *line).collect::<Vec<_>>();
        distinct_runs.dedup();
        prop_assert_eq!(chunk.lines.ranges().len(), distinct_runs.len());
    }

    /// Each `print N;` compiles to CONSTANT, N, PRINT on the statement's line.
    #[test]
    fn test_compiled_program_line_round_trip(gaps in arb_statement_gaps()) {
        let mut source = String::new();
        let mut statement_lines = Vec::new();
        let mut line = 1u32;
        for (i, gap) in gaps.iter().enumerate() {
            for _ in 0..*gap {
                source.push('\n');
                line += 1;
            }
            source.push_str(&format!("print {i};\n"));
            statement_lines.push(line);
            line += 1;
        }

        let mut heap = Heap::new();
        let mut globals = Globals::new();
        let script = compile(&source, &mut heap, &mut globals).unwrap();
        let chunk = &heap.as_function(script).unwrap().chunk;

        for (i, expected) in statement_lines.iter().enumerate() {
            let start = i * 3;
            prop_assert_eq!(OpCode::try_from(chunk.code[start]), Ok(OpCode::Constant));
            prop_assert_eq!(OpCode::try_from(chunk.code[start + 2]), Ok(OpCode::Print));
            for offset in start..start + 3 {
                prop_assert_eq!(chunk.line_at(offset), *expected);
            }
        }
        let last = *statement_lines.last().unwrap();
        for offset in statement_lines.len() * 3..chunk.code.len() {
            prop_assert!(chunk.line_at(offset) >= last);
        }
    }
}

// =============================================================================
// Operand widths
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    /// Indices below 256 use the short form, the rest the 24-bit form.
    #[test]
    fn test_operand_width_selection(op in arb_indexed_op(), index in 0usize..LONG_OPERAND_LIMIT) {
        let mut chunk = Chunk::new();
        chunk.write_indexed(op, index, 1).unwrap();

        let emitted = OpCode::try_from(chunk.code[0]).unwrap();
        if index < SHORT_OPERAND_LIMIT {
            prop_assert_eq!(emitted, op);
            prop_assert_eq!(chunk.code.len(), 2);
            prop_assert_eq!(chunk.code[1] as usize, index);
        } else {
            prop_assert!(emitted.is_long());
            prop_assert_eq!(Some(emitted), op.long_form());
            prop_assert_eq!(chunk.code.len(), 4);
            prop_assert_eq!(chunk.read_u24(1), index);
        }
    }

    /// Indices that need more than 24 bits are rejected without emitting.
    #[test]
    fn test_operand_too_large(op in arb_indexed_op(), index in LONG_OPERAND_LIMIT..usize::MAX / 2) {
        let mut chunk = Chunk::new();
        let err = chunk.write_indexed(op, index, 1).unwrap_err();
        prop_assert!(matches!(err, ChunkError::OperandTooLarge(i) if i == index));
        prop_assert!(chunk.code.is_empty());
    }
}
