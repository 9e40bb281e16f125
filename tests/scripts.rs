//! End-to-end tests: compile and evaluate whole programs,
//! then check what they printed.

use std::{
    cell::RefCell,
    io::{self, Write},
    rc::Rc,
};

use calx::{compile, make_state_with_output, Source};

/// A print sink the test can read back after the state is
/// done with it.
#[derive(Clone, Default)]
struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs a program, returning `(stdout, succeeded)`.
fn run(source: &str) -> (String, bool) {
    let buf = SharedBuf::default();
    let mut state = make_state_with_output(Box::new(buf.clone()));

    let source = Source::new(source, "(test)");
    let ok = match compile(&mut state, source) {
        Ok(func) => state.eval(func).is_some(),
        Err(_) => false,
    };

    let out = String::from_utf8_lossy(&buf.0.borrow()).into_owned();
    (out, ok)
}

fn output(source: &str) -> String {
    let (out, ok) = run(source);
    assert!(ok, "program failed: {}", source);
    out
}

#[test]
fn arithmetic_prints() {
    assert_eq!(output("print 1 + 2;"), "3\n");
    assert_eq!(output("2 * 3 + 4;"), "10\n");
    assert_eq!(output("2 + 3 * 4;"), "14\n");
    assert_eq!(output("2 ** 3 ** 2;"), "512\n");
    assert_eq!(output("(2 ** 3) ** 2;"), "64\n");
    assert_eq!(output("7 // 2; 7 % 2;"), "3\n1\n");
    assert_eq!(output("-2.5 * -4;"), "10\n");
}

#[test]
fn division_honors_scale() {
    assert_eq!(
        output("Scale(40); print 1/3;"),
        ".3333333333333333333333333333333333333333\n"
    );
    assert_eq!(output("Scale(2); 10 / 4;"), "2.5\n");
    assert_eq!(output("Scale(0); 7 / 2;"), "3\n");
    assert_eq!(output("Scale(20); Scale();"), "20\n");
}

#[test]
fn recursive_function() {
    assert_eq!(
        output("fun f(n){ if(n<2){ return n; } return f(n-1) + f(n-2); } print f(10);"),
        "55\n"
    );
}

#[test]
fn dict_iteration_preserves_entries() {
    let out = output(
        r#"d := {"a": 1}; d["b"] = 2;
           for(k := NextKey(d, nil); k != nil; k = NextKey(d, k)) { print k ~ "=" ~ d[k]; }"#,
    );
    assert_eq!(out, "a=1\nb=2\n");
}

#[test]
fn weakref_dies_with_target() {
    let out = output(
        "x := [1,2,3]; w := Wref(x); print Wvalue(w) != nil; x = nil; print Wvalue(w) == nil;",
    );
    assert_eq!(out, "true\ntrue\n");
}

#[test]
fn division_by_zero_fails() {
    let (out, ok) = run("print 1/0;");
    assert!(!ok);
    assert_eq!(out, "");
}

#[test]
fn locals_and_globals() {
    assert_eq!(output("x := 1; x = x + 1; x;"), "2\n");
    assert_eq!(output("g = 5; fun f() { return g * 2; } f();"), "10\n");

    let (_, ok) = run("print undefined_thing;");
    assert!(!ok);
}

#[test]
fn compound_assignments() {
    assert_eq!(output("x := 10; x += 5; x -= 3; x *= 2; x;"), "24\n");
    assert_eq!(output("x := 17; x //= 5; x;"), "3\n");
    assert_eq!(output("s := \"a\"; s ~= \"b\"; s ~= 1; s;"), "ab1\n");
    assert_eq!(output("l := [1]; l[0] += 41; l[0];"), "42\n");
    assert_eq!(output("d := {\"n\": 1}; d.n **= 10; d[\"n\"];"), "1\n");
}

#[test]
fn while_loop_with_break_continue() {
    let out = output(
        "i := 0; total := 0;
         while (true) {
             i += 1;
             if (i > 10) { break; }
             if (i % 2 == 0) { continue; }
             total += i;
         }
         total;",
    );
    assert_eq!(out, "25\n");
}

#[test]
fn for_loop_runs_post_after_body() {
    assert_eq!(output("for (i := 0; i < 3; i += 1) { print i; }"), "0\n1\n2\n");
    // continue still runs the post-expression
    assert_eq!(
        output("for (i := 0; i < 5; i += 1) { if (i % 2 == 0) { continue; } print i; }"),
        "1\n3\n"
    );
}

#[test]
fn nested_for_break() {
    let out = output(
        "for (i := 0; i < 3; i += 1) {
             for (j := 0; j < 3; j += 1) {
                 if (j > i) { break; }
                 print i ~ \",\" ~ j;
             }
         }",
    );
    assert_eq!(out, "0,0\n1,0\n1,1\n2,0\n2,1\n2,2\n");
}

#[test]
fn lists_and_indexing() {
    assert_eq!(output("l := [10, 20, 30]; l[1]; @l;"), "20\n3\n");
    assert_eq!(output("l := []; l[0] = 1; l[1] = 2; l;"), "[1, 2]\n");
    assert_eq!(output("l := [1]; l[99];"), "");
    assert_eq!(output("Pop([7, 8]);"), "8\n");

    let (_, ok) = run("l := [1]; l[5] = 0;");
    assert!(!ok);
}

#[test]
fn strings_and_escapes() {
    assert_eq!(output(r#""hello"[1];"#), "e\n");
    assert_eq!(output(r#"@"hello";"#), "5\n");
    assert_eq!(output(r#""a\tb\x21";"#), "a\tb!\n");
    assert_eq!(output(r#"Ord("A"); Chr(66);"#), "65\nB\n");
    assert_eq!(output(r#""abc" < "abd";"#), "true\n");
}

#[test]
fn dicts() {
    assert_eq!(output(r#"d := {"x": 1, "y": 2}; d.x + d.y;"#), "3\n");
    assert_eq!(output(r#"d := {}; d.k = 5; @d;"#), "1\n");
    assert_eq!(output(r#"d := {"k": 1}; RemoveKey(d, "k"); @d;"#), "0\n");
    assert_eq!(output(r#"d := {"k": 1}; d["missing"];"#), "");
    assert_eq!(output(r#"{"a": 1, "b": [2]};"#), "{\"a\": 1, \"b\": [2]}\n");

    let (_, ok) = run("d := {1: 2};");
    assert!(!ok);
}

#[test]
fn logic_operators() {
    assert_eq!(output("true && 5;"), "5\n");
    assert_eq!(output("nil || 7;"), "7\n");
    assert_eq!(output("false || nil;"), "");
    assert_eq!(output("!nil; !3;"), "true\nfalse\n");
}

#[test]
fn bitwise_on_u32() {
    assert_eq!(output("12 & 10; 12 | 10; 12 ^ 10;"), "8\n14\n6\n");
    assert_eq!(output("1 << 4; 256 >> 4;"), "16\n16\n");
}

#[test]
fn comparisons() {
    assert_eq!(output("1 < 2; 2 <= 2; 3 > 4; 0 >= 0;"), "true\ntrue\nfalse\ntrue\n");
    assert_eq!(output("1 == 1.0; 1 != 2;"), "true\ntrue\n");
    assert_eq!(output("[1] == [1];"), "false\n");
    assert_eq!(output("l := [1]; m := l; l == m;"), "true\n");
}

#[test]
fn scatter_and_gather() {
    assert_eq!(
        output("fun sum3(a, b, c) { return a + b + c; } args := [1, 2, 3]; sum3(args...);"),
        "6\n"
    );
    assert_eq!(
        output("fun count(first, rest...) { return @rest; } count(1, 2, 3, 4);"),
        "3\n"
    );
    assert_eq!(
        output("fun pack(xs...) { return xs; } pack(1, 2);"),
        "[1, 2]\n"
    );

    let (_, ok) = run("fun f(a, b) { } f(1);");
    assert!(!ok);
    let (_, ok) = run("fun g(a, rest...) { } g();");
    assert!(!ok);
}

#[test]
fn functions_are_values() {
    assert_eq!(
        output("fun twice(f, x) { return f(f(x)); } fun inc(n) { return n + 1; } twice(inc, 5);"),
        "7\n"
    );
    assert_eq!(output("fun f() { } Kind(f);"), "function\n");

    let (_, ok) = run("x := 5; x(1);");
    assert!(!ok);
}

#[test]
fn base_conversion_builtins() {
    assert_eq!(output("Encode(255, 16);"), "FF\n");
    assert_eq!(output("Encode(10.5, 16, 4);"), "A.8\n");
    assert_eq!(output("Decode(\"ff\", 16);"), "255\n");
    assert_eq!(output("Decode(\"A.8\", 16);"), "10.5\n");
    assert_eq!(output("Decode(Encode(1234.3125, 8, 10), 8);"), "1234.3125\n");

    let (_, ok) = run("Decode(\"zz\", 10);");
    assert!(!ok);
    let (_, ok) = run("Encode(1, 99);");
    assert!(!ok);
}

#[test]
fn numeric_builtins() {
    assert_eq!(output("trunc(2.7); floor(-2.5); ceil(2.1); round(2.5); frac(2.75);"),
        "2\n-3\n3\n3\n.75\n");
    assert_eq!(output("NumDigits(123.45, \"i\"); NumDigits(123.45, \"f\"); NumDigits(123.45, \"+\");"),
        "3\n2\n5\n");
    assert_eq!(output("UpScale(1.5, 3); DownScale(1.5, 3);"), "1500\n.0015\n");
    assert_eq!(output("ToNumber(\"12.5\");"), "12.5\n");
}

#[test]
fn prelude_is_available() {
    assert_eq!(output("Abs(-3); Max(2, 7); Min(2, 7); Sign(-9);"), "3\n7\n2\n-1\n");
}

#[test]
fn apostrophe_separators() {
    assert_eq!(output("1'000'000 + 1;"), "1000001\n");
}

#[test]
fn nil_is_suppressed() {
    assert_eq!(output("nil;"), "");
    assert_eq!(output("fun f() { } f();"), "");
}

#[test]
fn load_string_compiles_and_runs() {
    assert_eq!(output("f := LoadString(\"41 + 1;\"); f();"), "42\n");
}

#[test]
fn blocky_braces_vs_dict_literals() {
    // a `{` primed by a blocky keyword is a block, an
    // unprimed one is a dict literal, even across newlines
    assert_eq!(output("if (true) {\n \"k\";\n}"), "k\n");
    assert_eq!(output("d := {\n\"k\": 1\n}; d.k;"), "1\n");
}

#[test]
fn multiline_programs_use_asi() {
    let out = output("a := 1\nb := 2\na + b\n");
    assert_eq!(out, "3\n");
}

#[test]
fn deep_precision_arithmetic() {
    // 1/7 truncated at 50 digits, times 7: 10^50 mod 7 is
    // 2, so the tail digit is an 8.
    assert_eq!(
        output("Scale(50); x := 1 / 7; x * 7;"),
        ".99999999999999999999999999999999999999999999999998\n"
    );
    assert_eq!(output("2 ** 128;"), "340282366920938463463374607431768211456\n");
    assert_eq!(
        output("Scale(30); print 355 / 113;"),
        "3.141592920353982300884955752212\n"
    );
}

#[test]
fn scale_does_not_round_half() {
    // truncation toward zero, never rounding
    assert_eq!(output("Scale(2); 2 / 3;"), ".66\n");
    assert_eq!(output("Scale(2); -2 / 3;"), "-.66\n");
}
