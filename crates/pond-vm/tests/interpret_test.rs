mod common;

use common::{run, run_err, test_vm};
use pond_core::PondError;

// === End-to-end scenarios ===

#[test]
fn test_arithmetic_precedence_end_to_end() {
    assert_eq!(run("print(1+2*3);"), "7\n");
}

#[test]
fn test_block_shadowing_end_to_end() {
    assert_eq!(run("var a=1; { var a=2; print(a); } print(a);"), "2\n1\n");
}

#[test]
fn test_closure_counter_end_to_end() {
    let source = "fn make(){ var x=0; fn inc(){ x = x+1; return x; } return inc; } \
                  const f = make(); print(f()); print(f()); print(f());";
    assert_eq!(run(source), "1\n2\n3\n");
}

#[test]
fn test_string_coercion_end_to_end() {
    assert_eq!(run("const s = \"ab\"; print(s + 1);"), "ab1\n");
}

#[test]
fn test_undefined_variable_is_a_runtime_error() {
    let e = run_err("print(undefined_x);");
    assert!(e.to_string().contains("Undefined variable 'undefined_x'"));
    assert_eq!(e.exit_code(), 70);
}

#[test]
fn test_self_referential_initialiser_is_a_compile_error() {
    let e = run_err("{ var a = a; }");
    assert!(matches!(e, PondError::Compile(_)));
    assert!(e
        .to_string()
        .contains("Local variable referenced before definition"));
    assert_eq!(e.exit_code(), 65);
}

// === Language behaviour ===

#[test]
fn test_accumulator_program() {
    let source = r#"
        # sum of squares below a threshold
        fn square(n) { return n * n; }
        var total = 0;
        var i = 1;
        while square(i) < 50 {
            total = total + square(i);
            i = i + 1;
        }
        print(total);
    "#;
    // 1 + 4 + 9 + 16 + 25 + 36 + 49
    assert_eq!(run(source), "140\n");
}

#[test]
fn test_countdown_program() {
    let source = r#"
        fn countdown(n) {
            while n > 0 {
                print(n);
                n = n - 1;
            }
            return "liftoff";
        }
        print(countdown(3));
    "#;
    assert_eq!(run(source), "3\n2\n1\nliftoff\n");
}

#[test]
fn test_higher_order_functions() {
    let source = r#"
        fn twice(f, x) { return f(f(x)); }
        fn inc(n) { return n + 1; }
        print(twice(inc, 5));
    "#;
    assert_eq!(run(source), "7\n");
}

#[test]
fn test_anonymous_functions() {
    let source = "const double = fn(x) { return x * 2; }; print(double(21));";
    assert_eq!(run(source), "42\n");
}

#[test]
fn test_anonymous_function_display_name() {
    assert_eq!(run("print(fn(){});"), "<fn (anon)>\n");
}

#[test]
fn test_functions_as_list_elements() {
    let source = r#"
        fn a() { return "a"; }
        fn b() { return "b"; }
        var fns = [a, b];
        print(fns[0]() + fns[1]());
    "#;
    assert_eq!(run(source), "ab\n");
}

#[test]
fn test_nested_closures_capture_through_levels() {
    let source = r#"
        fn outer() {
            var x = "x";
            fn middle() {
                fn inner() { return x; }
                return inner;
            }
            return middle;
        }
        print(outer()()());
    "#;
    assert_eq!(run(source), "x\n");
}

#[test]
fn test_upvalue_retains_final_value_after_scope_exit() {
    let source = r#"
        fn make() {
            var x = 1;
            fn get() { return x; }
            x = 2;
            x = 3;
            return get;
        }
        const g = make();
        print(g());
    "#;
    assert_eq!(run(source), "3\n");
}

#[test]
fn test_blocks_as_expressions() {
    assert_eq!(run("var x = { 1; 2; 40 + 2 }; print(x);"), "42\n");
}

#[test]
fn test_if_expression_chain() {
    let source = r#"
        fn sign(n) {
            return if n < 0 { 0-1 } elif n == 0 { 0 } else { 1 };
        }
        print(sign(0-9)); print(sign(0)); print(sign(9));
    "#;
    assert_eq!(run(source), "-1\n0\n1\n");
}

#[test]
fn test_while_with_early_return() {
    let source = r#"
        fn find(limit) {
            var i = 0;
            while true {
                if i * i > limit { return i; }
                i = i + 1;
            }
        }
        print(find(50));
    "#;
    assert_eq!(run(source), "8\n");
}

#[test]
fn test_type_reflection_end_to_end() {
    let source = r#"
        print(type(1) == float);
        print(type("s") == string);
        print(type(true) == bool);
        print(type([1]) == object);
        print(type(float) == typeid);
    "#;
    assert_eq!(run(source), "true\ntrue\ntrue\ntrue\ntrue\n");
}

#[test]
fn test_comments_are_ignored() {
    assert_eq!(run("# a comment\nprint(1); # trailing\n# done"), "1\n");
}

// === Globals policy ===

#[test]
fn test_global_var_redeclaration_is_forbidden() {
    let e = run_err("var x = 1; var x = 2;");
    assert!(e.to_string().contains("Redeclaration of variable 'x'."));
}

#[test]
fn test_const_global_cannot_be_reassigned() {
    let e = run_err("const x = 1; x = 2;");
    assert!(e.to_string().contains("Cannot redefine const variable 'x'."));
}

#[test]
fn test_var_global_can_be_reassigned() {
    assert_eq!(run("var x = 1; x = 2; print(x);"), "2\n");
}

#[test]
fn test_assignment_is_an_expression() {
    assert_eq!(run("var x = 1; var y = 0; y = x = 5; print(x + y);"), "10\n");
}

// === Interning ===

#[test]
fn test_equal_strings_are_identical() {
    assert_eq!(run("print(\"pond\" == \"po\" + \"nd\");"), "true\n");
}

#[test]
fn test_distinct_strings_differ() {
    assert_eq!(run("print(\"pond\" == \"pund\");"), "false\n");
}

// === REPL-style session (one VM, several lines) ===

#[test]
fn test_session_accumulates_state() {
    let (mut vm, out) = test_vm();
    vm.interpret("var total = 0;").unwrap();
    vm.interpret("fn add(n) { total = total + n; }").unwrap();
    vm.interpret("add(40); add(2);").unwrap();
    vm.interpret("print(total);").unwrap();
    assert_eq!(out.contents(), "42\n");
}

#[test]
fn test_session_survives_errors() {
    let (mut vm, out) = test_vm();
    vm.interpret("var x = 10;").unwrap();
    assert!(vm.interpret("x + nil;").is_err());
    assert!(vm.interpret("var y = ;").is_err());
    vm.interpret("print(x);").unwrap();
    assert_eq!(out.contents(), "10\n");
}

// === Diagnostics format ===

#[test]
fn test_compile_diagnostic_format() {
    let e = run_err("var 1 = 2;");
    let text = e.to_string();
    assert!(
        text.contains("1: Error at '1': Expected variable name."),
        "got: {text}"
    );
}

#[test]
fn test_compile_diagnostic_at_end() {
    let e = run_err("print(1");
    let text = e.to_string();
    assert!(text.contains("at end"), "got: {text}");
}

#[test]
fn test_runtime_diagnostic_format() {
    let e = run_err("\n\nnil + 1;");
    assert_eq!(
        e.to_string(),
        "Invalid operands for +\n[line 3] in script"
    );
}

#[test]
fn test_many_numbers_print_like_the_source() {
    assert_eq!(
        run("print(100); print(0.25); print(1.5); print(0 - 0.5);"),
        "100\n0.25\n1.5\n-0.5\n"
    );
}
