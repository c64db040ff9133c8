use std::{cell::RefCell, rc::Rc};

use dws::{
    CollectStringPrint, ErrorKind, ExternalVar, ExternalVars, NoLimitTracker, Object, RunConfig, Runner,
};
use pretty_assertions::assert_eq;

fn run(src: &str) -> String {
    let runner = Runner::new(src.to_owned(), "test.pas").unwrap();
    let mut print = CollectStringPrint::new();
    runner.run(NoLimitTracker::new(), &mut print).unwrap();
    print.into_output()
}

fn run_err(src: &str) -> dws::Exception {
    let runner = Runner::new(src.to_owned(), "test.pas").unwrap();
    let mut print = CollectStringPrint::new();
    runner.run(NoLimitTracker::new(), &mut print).unwrap_err()
}

#[test]
fn runner_is_reusable() {
    let runner = Runner::new("PrintLn('again');".to_owned(), "test.pas").unwrap();
    for _ in 0..3 {
        let mut print = CollectStringPrint::new();
        runner.run(NoLimitTracker::new(), &mut print).unwrap();
        assert_eq!(print.output(), "again\n");
    }
}

#[test]
fn dump_and_load_round_trip() {
    let runner = Runner::new("PrintLn(6 * 7);".to_owned(), "test.pas").unwrap();
    let bytes = runner.dump().unwrap();
    let restored = Runner::load(&bytes).unwrap();
    assert_eq!(restored.code(), "PrintLn(6 * 7);");
    let mut print = CollectStringPrint::new();
    restored.run(NoLimitTracker::new(), &mut print).unwrap();
    assert_eq!(print.output(), "42\n");
}

#[test]
fn syntax_errors_carry_location_and_script_name() {
    let err = Runner::new("var x := ;".to_owned(), "bad.pas").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Syntax);
    assert_eq!(err.script(), "bad.pas");
    assert_eq!(err.loc().line, 1);
}

#[test]
fn recursion_limit_is_a_fatal_error() {
    let err = run_err(
        "function Boom: Integer;\n\
         begin\n\
           Result := Boom();\n\
         end;\n\
         Boom();",
    );
    assert_eq!(err.kind(), ErrorKind::Fatal);
    assert!(err.message().contains("recursion depth"));
}

#[test]
fn external_variables_use_host_callbacks() {
    let runner = Runner::new(
        "var external host_value: Integer;\n\
         PrintLn(host_value);\n\
         host_value := 99;\n\
         PrintLn(host_value);"
            .to_owned(),
        "test.pas",
    )
    .unwrap();
    let store = Rc::new(RefCell::new(7i64));
    let read_store = Rc::clone(&store);
    let write_store = Rc::clone(&store);
    let mut externals = ExternalVars::new();
    externals.insert(
        "Host_Value",
        ExternalVar {
            read: Some(Box::new(move || Object::Int(*read_store.borrow()))),
            write: Some(Box::new(move |value| {
                if let Object::Int(v) = value {
                    *write_store.borrow_mut() = v;
                }
            })),
        },
    );
    let mut print = CollectStringPrint::new();
    runner
        .run_with_config(&RunConfig::default(), &mut externals, NoLimitTracker::new(), &mut print)
        .unwrap();
    assert_eq!(print.output(), "7\n99\n");
    assert_eq!(*store.borrow(), 99);
}

#[test]
fn external_variable_without_accessor_raises() {
    let out = run(
        "var external missing: Integer;\n\
         try\n\
           PrintLn(missing);\n\
         except\n\
           on E: EExternalError do PrintLn('no accessor');\n\
         end;",
    );
    assert_eq!(out, "no accessor\n");
}

#[test]
fn seed_override_makes_runs_deterministic() {
    let runner = Runner::new(
        "PrintLn(RandomInt(1000000));\nPrintLn(RandomInt(1000000));".to_owned(),
        "test.pas",
    )
    .unwrap();
    let config = RunConfig { random_seed: Some(7) };
    let mut first = CollectStringPrint::new();
    runner
        .run_with_config(&config, &mut ExternalVars::new(), NoLimitTracker::new(), &mut first)
        .unwrap();
    let mut second = CollectStringPrint::new();
    runner
        .run_with_config(&config, &mut ExternalVars::new(), NoLimitTracker::new(), &mut second)
        .unwrap();
    assert_eq!(first.output(), second.output());
}

#[test]
fn value_arguments_evaluate_exactly_once() {
    let out = run(
        "var calls := 0;\n\
         function Next: Integer;\n\
         begin\n\
           calls := calls + 1;\n\
           Result := calls;\n\
         end;\n\
         function UseValue(x: Integer): Integer;\n\
         begin\n\
           Result := x + x;\n\
         end;\n\
         PrintLn(UseValue(Next()));\n\
         PrintLn(calls);",
    );
    assert_eq!(out, "2\n1\n");
}

#[test]
fn lazy_arguments_evaluate_on_each_read() {
    let out = run(
        "var calls := 0;\n\
         function Next: Integer;\n\
         begin\n\
           calls := calls + 1;\n\
           Result := calls;\n\
         end;\n\
         function ReadTwice(lazy x: Integer): Integer;\n\
         begin\n\
           Result := x + x;\n\
         end;\n\
         function ReadNever(lazy x: Integer): Integer;\n\
         begin\n\
           Result := 0;\n\
         end;\n\
         PrintLn(ReadTwice(Next()));\n\
         PrintLn(calls);\n\
         PrintLn(ReadNever(Next()));\n\
         PrintLn(calls);",
    );
    // Two reads -> two evaluations (1 + 2); an unread lazy argument never
    // evaluates at all.
    assert_eq!(out, "3\n2\n0\n2\n");
}

#[test]
fn var_and_out_parameters_write_through() {
    let out = run(
        "procedure Bump(var x: Integer);\n\
         begin\n\
           x := x + 1;\n\
         end;\n\
         procedure Split(total: Integer; out half: Integer; out rest: Integer);\n\
         begin\n\
           half := total div 2;\n\
           rest := total - half;\n\
         end;\n\
         var n := 5;\n\
         Bump(n);\n\
         Bump(n);\n\
         PrintLn(n);\n\
         var a := 0;\n\
         var b := 0;\n\
         Split(9, a, b);\n\
         PrintLn(a);\n\
         PrintLn(b);",
    );
    assert_eq!(out, "7\n4\n5\n");
}

#[test]
fn var_parameters_reach_array_elements_and_fields() {
    let out = run(
        "procedure Bump(var x: Integer);\n\
         begin\n\
           x := x + 1;\n\
         end;\n\
         var a: array of Integer;\n\
         Add(a, 10);\n\
         Bump(a[0]);\n\
         PrintLn(a[0]);\n\
         type TBox = class\n\
           FValue: Integer;\n\
         end;\n\
         var box := TBox.Create;\n\
         Bump(box.FValue);\n\
         PrintLn(box.FValue);",
    );
    assert_eq!(out, "11\n1\n");
}

#[test]
fn const_parameters_are_read_only() {
    let out = run(
        "function Double(const x: Integer): Integer;\n\
         begin\n\
           Result := x * 2;\n\
         end;\n\
         PrintLn(Double(21));",
    );
    assert_eq!(out, "42\n");
}

#[test]
fn default_parameters_and_overloads() {
    let out = run(
        "function Greet(name: String; punct: String = '!'): String;\n\
         begin\n\
           Result := 'hi ' + name + punct;\n\
         end;\n\
         PrintLn(Greet('bob'));\n\
         PrintLn(Greet('bob', '?'));\n\
         function Area(w: Integer): Integer; overload;\n\
         begin\n\
           Result := w * w;\n\
         end;\n\
         function Area(w, h: Integer): Integer; overload;\n\
         begin\n\
           Result := w * h;\n\
         end;\n\
         PrintLn(Area(3));\n\
         PrintLn(Area(3, 4));",
    );
    assert_eq!(out, "hi bob!\nhi bob?\n9\n12\n");
}

#[test]
fn uncaught_errors_capture_stack_frames() {
    let err = run_err(
        "procedure Inner;\n\
         begin\n\
           raise Exception.Create('deep');\n\
         end;\n\
         procedure Outer;\n\
         begin\n\
           Inner();\n\
         end;\n\
         Outer();",
    );
    let frames: Vec<&str> = err.frames().iter().map(|f| f.function.as_str()).collect();
    assert_eq!(frames, vec!["Inner", "Outer"]);
}
