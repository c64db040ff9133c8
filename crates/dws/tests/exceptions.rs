use dws::{CollectStringPrint, ErrorKind, NoLimitTracker, Runner};
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
fn try_finally_with_raise_and_outer_handler() {
    let out = run(
        "var x := 0;\n\
         try\n\
           try\n\
             x := 1;\n\
             raise Exception.Create('boom');\n\
           finally\n\
             x := x + 10;\n\
           end;\n\
         except\n\
           on E: Exception do\n\
             x := x + 100;\n\
         end;\n\
         PrintLn(x);",
    );
    assert_eq!(out, "111\n");
}

#[test]
fn handlers_match_most_specific_first_as_written() {
    let out = run(
        "try\n\
           raise EZeroDivide.Create('oops');\n\
         except\n\
           on E: EZeroDivide do PrintLn('specific: ' + E.Message);\n\
           on E: Exception do PrintLn('general');\n\
         end;\n\
         try\n\
           raise EConvertError.Create('nope');\n\
         except\n\
           on E: EZeroDivide do PrintLn('wrong');\n\
           on E: Exception do PrintLn('general: ' + E.Message);\n\
         end;",
    );
    assert_eq!(out, "specific: oops\ngeneral: nope\n");
}

#[test]
fn bare_except_catches_everything() {
    let out = run(
        "try\n\
           raise Exception.Create('any');\n\
         except\n\
           PrintLn('caught');\n\
         end;",
    );
    assert_eq!(out, "caught\n");
}

#[test]
fn bare_raise_re_raises_current_exception() {
    let out = run(
        "try\n\
           try\n\
             raise Exception.Create('original');\n\
           except\n\
             on E: Exception do\n\
             begin\n\
               PrintLn('inner');\n\
               raise;\n\
             end;\n\
           end;\n\
         except\n\
           on E: Exception do PrintLn('outer: ' + E.Message);\n\
         end;",
    );
    assert_eq!(out, "inner\nouter: original\n");
}

#[test]
fn finally_runs_on_every_exit_path() {
    let out = run(
        "function WithExit: Integer;\n\
         begin\n\
           try\n\
             Result := 1;\n\
             exit;\n\
             Result := 2;\n\
           finally\n\
             PrintLn('finally');\n\
           end;\n\
         end;\n\
         PrintLn(WithExit());\n\
         for var i := 1 to 2 do\n\
         begin\n\
           try\n\
             if i = 1 then continue;\n\
             break;\n\
           finally\n\
             PrintLn('loop finally');\n\
           end;\n\
         end;",
    );
    assert_eq!(out, "finally\n1\nloop finally\nloop finally\n");
}

#[test]
fn nested_try_reenters_handler_state() {
    let out = run(
        "try\n\
           try\n\
             raise Exception.Create('inner');\n\
           except\n\
             on E: Exception do PrintLn('first: ' + E.Message);\n\
           end;\n\
           raise Exception.Create('second');\n\
         except\n\
           on E: Exception do PrintLn('second: ' + E.Message);\n\
         end;",
    );
    assert_eq!(out, "first: inner\nsecond: second\n");
}

#[test]
fn uncaught_exception_reaches_the_host() {
    let err = run_err("raise Exception.Create('escaped');");
    assert_eq!(err.kind(), ErrorKind::Runtime);
    assert_eq!(err.class_name(), "Exception");
    assert_eq!(err.message(), "uncaught exception: escaped");
    assert_eq!(err.script(), "test.pas");
    assert_eq!(err.loc().line, 1);
}

#[test]
fn division_by_zero_is_catchable() {
    let out = run(
        "var zero := 0;\n\
         try\n\
           PrintLn(1 div zero);\n\
         except\n\
           on E: EZeroDivide do PrintLn(E.Message);\n\
         end;\n\
         try\n\
           PrintLn(1 / zero);\n\
         except\n\
           on E: EZeroDivide do PrintLn('float too');\n\
         end;",
    );
    assert_eq!(out, "Division by zero\nfloat too\n");
}

#[test]
fn custom_exception_classes_participate_in_matching() {
    let out = run(
        "type EAppError = class (Exception)\n\
         end;\n\
         try\n\
           raise EAppError.Create('app');\n\
         except\n\
           on E: EAppError do PrintLn('app handler: ' + E.Message);\n\
         end;\n\
         try\n\
           raise EAppError.Create('up');\n\
         except\n\
           on E: Exception do PrintLn('base handler: ' + E.Message);\n\
         end;",
    );
    assert_eq!(out, "app handler: app\nbase handler: up\n");
}

#[test]
fn subrange_violation_raises() {
    let out = run(
        "type TDigit = 0..9;\n\
         var d: TDigit;\n\
         d := 5;\n\
         PrintLn(d);\n\
         try\n\
           d := 12;\n\
         except\n\
           on E: ERangeError do PrintLn('range');\n\
         end;\n\
         PrintLn(d);",
    );
    assert_eq!(out, "5\nrange\n5\n");
}

#[test]
fn exceptions_propagate_out_of_calls() {
    let out = run(
        "procedure Boom;\n\
         begin\n\
           raise Exception.Create('deep');\n\
         end;\n\
         procedure Middle;\n\
         begin\n\
           Boom();\n\
         end;\n\
         try\n\
           Middle();\n\
         except\n\
           on E: Exception do PrintLn('surfaced: ' + E.Message);\n\
         end;",
    );
    assert_eq!(out, "surfaced: deep\n");
}

#[test]
fn finally_exception_replaces_in_flight_exception() {
    let err = run_err(
        "try\n\
           raise Exception.Create('first');\n\
         finally\n\
           raise Exception.Create('second');\n\
         end;",
    );
    assert_eq!(err.message(), "uncaught exception: second");
}
