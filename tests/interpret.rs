//! End-to-end programs driven through a [`Vm`] that prints into a buffer.

use ant::value::Value;
use ant::vm::{InterpretError, RuntimeError, Vm, VmConfig};

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn vm() -> Vm<Vec<u8>> {
    Vm::with_output(Vec::new())
}

fn output(vm: &Vm<Vec<u8>>) -> String {
    String::from_utf8_lossy(vm.output()).into_owned()
}

fn run(src: &str) -> String {
    let mut vm = vm();
    if let Err(e) = vm.interpret(src) {
        panic!("program failed: {e}\n--- source ---\n{src}");
    }
    output(&vm)
}

fn runtime_error(vm: &mut Vm<Vec<u8>>, src: &str) -> RuntimeError {
    match vm.interpret(src) {
        Err(InterpretError::Runtime(e)) => e,
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Expressions and statements
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_number_formatting() {
    assert_eq!(run("print 1 / 3;"), "0.333333\n");
    assert_eq!(run("print 1000000;"), "1e+06\n");
    assert_eq!(run("print 0.1 + 0.2;"), "0.3\n");
    assert_eq!(run("print -0.5;"), "-0.5\n");
}

#[test]
fn test_block_shadowing() {
    assert_eq!(run("let a = 1; { let a = 2; print a; }"), "2\n");
}

#[test]
fn test_while_and_for_loops() {
    let src = "let sum = 0;\n\
               for (let i = 1; i <= 10; i = i + 1) sum = sum + i;\n\
               print sum;\n\
               let n = 3;\n\
               while (n > 0) { print n; n = n - 1; }";
    assert_eq!(run(src), "55\n3\n2\n1\n");
}

#[test]
fn test_for_without_clauses() {
    // Only an error can leave this loop.
    let src = "let i = 0; for (;;) { i = i + 1; if (i >= 3) stop(); }";
    let mut vm = vm();
    let err = runtime_error(&mut vm, src);
    assert_eq!(err.message, "Undefined variable 'stop'.");
    assert_eq!(vm.get_global("i"), Some(Value::Number(3.0)));
}

#[test]
fn test_short_circuit_skips_side_effects() {
    let src = "let hits = 0;\n\
               fn hit() { hits = hits + 1; return true; }\n\
               false and hit();\n\
               true or hit();\n\
               print hits;";
    assert_eq!(run(src), "0\n");
}

#[test]
fn test_strings() {
    assert_eq!(run("print \"foo\" + \"bar\";"), "foobar\n");
    assert_eq!(run("print \"a\" == \"a\"; print \"a\" == \"b\";"), "true\nfalse\n");
    assert_eq!(run("print \"multi\nline\";"), "multi\nline\n");
}

#[test]
fn test_concatenated_strings_are_interned() {
    let mut vm = vm();
    vm.interpret("let a = \"ab\"; let b = \"a\" + \"b\";").unwrap();
    let (Some(Value::Obj(a)), Some(Value::Obj(b))) = (vm.get_global("a"), vm.get_global("b")) else {
        panic!("expected two string objects");
    };
    assert_eq!(a, b);
    assert_eq!(vm.heap().as_str(a), Some("ab"));
}

#[test]
fn test_print_functions() {
    assert_eq!(run("fn f() {} print f;"), "<fn f>\n");
    assert_eq!(run("print clock;"), "<native fn>\n");
}

// ─────────────────────────────────────────────────────────────────────────────
// Functions and closures
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_bare_return_yields_nil() {
    assert_eq!(run("fn f() { return; } print f();"), "nil\n");
    assert_eq!(run("fn g() {} print g();"), "nil\n");
}

#[test]
fn test_recursion() {
    let src = "fn fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); }\n\
               print fib(15);";
    assert_eq!(run(src), "610\n");
}

#[test]
fn test_counter_closure() {
    let src = "fn make() { let c = 0; fn inc() { c = c + 1; return c; } return inc; }\n\
               let f = make();\n\
               print f();\n\
               print f();";
    assert_eq!(run(src), "1\n2\n");
}

#[test]
fn test_independent_closures() {
    let src = "fn make() { let c = 0; fn inc() { c = c + 1; return c; } return inc; }\n\
               let a = make(); let b = make();\n\
               a(); a();\n\
               print a(); print b();";
    assert_eq!(run(src), "3\n1\n");
}

#[test]
fn test_closures_share_a_variable() {
    let src = "let setter; let getter;\n\
               {\n\
                 let x = 1;\n\
                 fn set(v) { x = v; }\n\
                 fn get() { return x; }\n\
                 setter = set; getter = get;\n\
               }\n\
               setter(5);\n\
               print getter();";
    assert_eq!(run(src), "5\n");
}

#[test]
fn test_captured_parameter_survives_return() {
    let src = "fn adder(n) { fn add(x) { return x + n; } return add; }\n\
               let add2 = adder(2);\n\
               let add10 = adder(10);\n\
               print add2(1);\n\
               print add10(1);";
    assert_eq!(run(src), "3\n11\n");
}

#[test]
fn test_nested_upvalue_chain() {
    let src = "fn outer() {\n\
                 let x = \"outer\";\n\
                 fn middle() { fn inner() { return x; } return inner; }\n\
                 return middle;\n\
               }\n\
               print outer()()();";
    assert_eq!(run(src), "outer\n");
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_compile_error_runs_nothing() {
    let mut vm = vm();
    match vm.interpret("print 1;\nprint 1 + ;") {
        Err(InterpretError::Compile(errors)) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors.to_string(), "[line 2] Error at ';': Expected expression.");
        }
        other => panic!("expected a compile error, got {other:?}"),
    }
    assert_eq!(output(&vm), "");
}

#[test]
fn test_compile_errors_are_collected() {
    let mut vm = vm();
    let Err(InterpretError::Compile(errors)) = vm.interpret("print 1 +;\nlet = 2;\nreturn 3;") else {
        panic!("expected compile errors");
    };
    let lines: Vec<u32> = errors.iter().map(|e| e.line).collect();
    assert_eq!(lines, vec![1, 2, 3]);
    assert_eq!(errors.iter().last().map(|e| e.message.as_str()), Some("Cannot return from top-level code."));
}

#[test]
fn test_mixed_add_is_runtime_error() {
    let mut vm = vm();
    let err = runtime_error(&mut vm, "print 1 + \"a\";");
    assert_eq!(err.message, "Operands must be two numbers or two strings.");
    assert_eq!(err.to_string(), "Operands must be two numbers or two strings.\n[line 1] in script");
}

#[test]
fn test_arity_error_names_the_calling_function() {
    let mut vm = vm();
    let err = runtime_error(&mut vm, "fn two(a, b) {}\nfn caller() {\n  two(1);\n}\ncaller();");
    assert_eq!(err.message, "expected 2 arguments but got 1");
    let names: Vec<Option<&str>> = err.trace.iter().map(|t| t.function.as_deref()).collect();
    assert_eq!(names, vec![Some("caller"), None]);
    assert_eq!(err.trace[0].line, 3);
}

#[test]
fn test_frame_overflow_then_reuse() {
    let mut vm = vm();
    let err = runtime_error(&mut vm, "fn down(n) { return down(n + 1); } down(0);");
    assert_eq!(err.message, "reached maximum call stack depth");
    assert_eq!(err.trace.len(), VmConfig::DEFAULT_FRAMES_MAX);
    assert_eq!(vm.stack_depth(), 0);

    vm.interpret("print \"still alive\";").unwrap();
    assert_eq!(output(&vm), "still alive\n");
}

#[test]
fn test_globals_persist_across_interpret_calls() {
    let mut vm = vm();
    vm.interpret("let total = 40;").unwrap();
    let _ = runtime_error(&mut vm, "total = total + 2; nil();");
    vm.interpret("print total;").unwrap();
    assert_eq!(output(&vm), "42\n");
}

const ESCAPE_THEN_FAULT: &str = "let h = nil;\n\
                                 fn make() { let x = 41; fn g() { return x; } h = g; nil(); }\n\
                                 make();";

#[test]
fn test_escaped_closure_survives_fault() {
    let mut vm = vm();
    let err = runtime_error(&mut vm, ESCAPE_THEN_FAULT);
    assert_eq!(err.message, "Can only call functions and closures.");

    vm.interpret("print h();").unwrap();
    assert_eq!(output(&vm), "41\n");
}

#[test]
fn test_escaped_closure_ignores_reused_slots() {
    let mut vm = vm();
    let _ = runtime_error(&mut vm, ESCAPE_THEN_FAULT);

    // `a` lands in the stack slot `x` occupied during the failed run.
    vm.interpret("fn k(a, b) { return h(); } print k(7, 8);").unwrap();
    assert_eq!(output(&vm), "41\n");
}

#[test]
fn test_escaped_closure_keeps_writing_after_fault() {
    let mut vm = vm();
    let src = "let bump; let read;\n\
               fn make() {\n\
                 let n = 0;\n\
                 fn b() { n = n + 1; }\n\
                 fn r() { return n; }\n\
                 bump = b; read = r;\n\
                 bump();\n\
                 -nil;\n\
               }\n\
               make();";
    let err = runtime_error(&mut vm, src);
    assert_eq!(err.message, "Operand must be a number.");

    vm.interpret("bump(); bump(); print read();").unwrap();
    assert_eq!(output(&vm), "3\n");
}

#[test]
fn test_undefined_variable_inside_function() {
    let mut vm = vm();
    let err = runtime_error(&mut vm, "fn f() {\n  return nope;\n}\nf();");
    assert_eq!(err.to_string(), "Undefined variable 'nope'.\n[line 2] in f()\n[line 4] in script");
}

#[test]
fn test_calling_non_callable() {
    let mut vm = vm();
    assert_eq!(runtime_error(&mut vm, "\"str\"();").message, "Can only call functions and closures.");
}

// ─────────────────────────────────────────────────────────────────────────────
// Wide operands
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_many_constants() {
    let src: String = (0..300).map(|i| format!("print {i};\n")).collect();
    let expected: String = (0..300).map(|i| format!("{i}\n")).collect();
    assert_eq!(run(&src), expected);
}

#[test]
fn test_many_globals() {
    let mut src: String = (0..300).map(|i| format!("let g{i} = {i};\n")).collect();
    src.push_str("g299 = g299 + g1; print g299;");
    assert_eq!(run(&src), "300\n");
}

#[test]
fn test_many_locals() {
    let mut src = String::from("{\n");
    for i in 0..300 {
        src.push_str(&format!("let l{i} = {i};\n"));
    }
    src.push_str("l299 = l299 + l2; print l299;\n}");
    assert_eq!(run(&src), "301\n");
}

// ─────────────────────────────────────────────────────────────────────────────
// Garbage collection
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_gc_stress_program() {
    let config = VmConfig::default().with_gc_stress(true);
    let mut vm = Vm::with_config(config, Vec::new());
    let src = "fn make(prefix) {\n\
                 let count = 0;\n\
                 fn next() { count = count + 1; return prefix + \"!\"; }\n\
                 return next;\n\
               }\n\
               let f = make(\"go\");\n\
               let s = \"\";\n\
               for (let i = 0; i < 10; i = i + 1) { s = s + \"x\"; f(); }\n\
               print f();\n\
               print s;";
    vm.interpret(src).unwrap();
    assert_eq!(output(&vm), "go!\nxxxxxxxxxx\n");
    assert!(vm.heap().cycles > 0);
}

#[test]
fn test_small_threshold_collects_garbage() {
    let config = VmConfig::default().with_gc_threshold(4096);
    let mut vm = Vm::with_config(config, Vec::new());
    let src = "let keep = \"\";\n\
               for (let i = 0; i < 200; i = i + 1) { let junk = \"junk\" + \"data\"; keep = keep + \"k\"; }\n\
               print keep == keep;";
    vm.interpret(src).unwrap();
    assert_eq!(output(&vm), "true\n");
    assert!(vm.heap().cycles > 0);
}
