//! End-to-end runs through the public library API: source text in, token
//! listings or program output out.

use std::io::Cursor;

use indoc::indoc;

use rill::interpreter::{Interpreter, InterpreterError};
use rill::{bytecode, lexer, parser};

fn interpret(source: &str, input: &str) -> Result<String, InterpreterError> {
    let tokens = lexer::lex(source);
    assert!(!lexer::has_errors(&tokens), "lex errors in {source:?}");
    let program = parser::parse_tokens(tokens).expect("parse failed");
    let mut out = Vec::new();
    let mut input = Cursor::new(input.as_bytes().to_vec());
    Interpreter::new(&mut out, &mut input).run(&program)?;
    Ok(String::from_utf8(out).expect("program output is utf-8"))
}

#[test]
fn arithmetic_scenario() {
    assert_eq!(interpret("print(1 + 2 * 3);", ""), Ok("7\n".to_string()));
}

#[test]
fn string_coercion_scenario() {
    let source = indoc! {r#"
        x = "n=";
        y = 42;
        print(x + y);
    "#};
    assert_eq!(interpret(source, ""), Ok("n=42\n".to_string()));
}

#[test]
fn closure_counter_scenario() {
    let source = indoc! {"
        counter = fun() {
            n = 0;
            return fun() {
                n = n + 1;
                return n;
            };
        };
        c = counter();
        print(c());
        print(c());
        print(c());
    "};
    assert_eq!(interpret(source, ""), Ok("1\n2\n3\n".to_string()));
}

#[test]
fn record_scenario() {
    let source = indoc! {"
        r = {a: 1; b: 2;};
        r.c = r.a + r.b;
        print(r);
    "};
    assert_eq!(interpret(source, ""), Ok("{ a:1 b:2 c:3 }\n".to_string()));
}

#[test]
fn while_sum_scenario() {
    let source = indoc! {"
        n = 10;
        s = 0;
        i = 1;
        while (i <= n) {
            s = s + i;
            i = i + 1;
        }
        print(s);
    "};
    assert_eq!(interpret(source, ""), Ok("55\n".to_string()));
}

#[test]
fn division_by_zero_scenario() {
    assert_eq!(
        interpret("print(1 / 0);", ""),
        Err(InterpreterError::IllegalArithmetic)
    );
}

#[test]
fn echo_program_reads_stdin() {
    let source = indoc! {r#"
        name = input();
        print("hello " + name);
    "#};
    assert_eq!(interpret(source, "world\n"), Ok("hello world\n".to_string()));
}

#[test]
fn fibonacci_program() {
    let source = indoc! {"
        fib = fun(n) {
            if (n < 2) {
                return n;
            }
            return fib(n - 1) + fib(n - 2);
        };
        print(fib(15));
    "};
    assert_eq!(interpret(source, ""), Ok("610\n".to_string()));
}

#[test]
fn mutual_recursion_through_globals() {
    let source = indoc! {"
        even = fun(n) {
            if (n == 0) { return true; }
            return odd(n - 1);
        };
        odd = fun(n) {
            if (n == 0) { return false; }
            return even(n - 1);
        };
        print(even(10));
        print(odd(7));
    "};
    assert_eq!(interpret(source, ""), Ok("true\ntrue\n".to_string()));
}

#[test]
fn records_as_linked_list() {
    let source = indoc! {r#"
        cons = fun(head, tail) {
            return {head: head; tail: tail;};
        };
        sum = fun(list) {
            total = 0;
            while (!(list == None)) {
                total = total + list.head;
                list = list.tail;
            }
            return total;
        };
        print(sum(cons(1, cons(2, cons(3, None)))));
    "#};
    assert_eq!(interpret(source, ""), Ok("6\n".to_string()));
}

#[test]
fn scan_lists_tokens_with_line_numbers() {
    let source = indoc! {r#"
        x = 42;
        if (true) {
            print("hi");
        }
    "#};
    let tokens = lexer::lex(source);
    let mut out = Vec::new();
    lexer::write_tokens(&tokens, &mut out).expect("write failed");
    assert_eq!(
        String::from_utf8(out).expect("scan output is utf-8"),
        indoc! {r#"
            1 IDENTIFIER x
            1 =
            1 INTLITERAL 42
            1 ;
            2 if
            2 (
            2 BOOLEANLITERAL true
            2 )
            2 {
            3 IDENTIFIER print
            3 (
            3 STRINGLITERAL "hi"
            3 )
            3 ;
            4 }
        "#}
    );
}

#[test]
fn scan_suppresses_error_tokens() {
    let tokens = lexer::lex("x = 05;\ny = 1;");
    assert!(lexer::has_errors(&tokens));
    let mut out = Vec::new();
    lexer::write_tokens(&tokens, &mut out).expect("write failed");
    let listing = String::from_utf8(out).expect("scan output is utf-8");
    assert!(!listing.contains("05"));
    assert!(listing.contains("2 IDENTIFIER y"));
}

#[test]
fn lexical_errors_stop_the_pipeline_before_parsing() {
    let tokens = lexer::lex("x = \"broken;\n");
    assert!(lexer::has_errors(&tokens));
}

#[test]
fn bytecode_parses_and_reprints() {
    let source = indoc! {r#"
        function {
            functions = [],
            constants = ["hello world", None],
            parameter_count = 0,
            local_vars = [],
            local_ref_vars = [],
            free_vars = [],
            names = [print],
            instructions = [
                load_global 0
                load_const 0
                call 1
                load_const 1
                return
            ]
        }
    "#};
    let function = bytecode::parse(source).expect("bytecode parse failed");
    let mut out = Vec::new();
    bytecode::prettyprint(&function, &mut out).expect("prettyprint failed");
    let printed = String::from_utf8(out).expect("bytecode output is utf-8");
    assert!(printed.starts_with("function\n{\n"));
    assert!(printed.contains("constants = [\"hello world\", None],"));
    assert!(printed.contains("\t\tcall\t1\n"));
    // Re-emitting is stable.
    assert_eq!(bytecode::parse(&printed).expect("reparse failed"), function);
}
