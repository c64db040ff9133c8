use dws::{CollectStringPrint, NoLimitTracker, Runner};
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
fn postcondition_with_old_never_fires_for_correct_code() {
    let out = run(
        "function Increment(x: Integer): Integer;\n\
         begin\n\
           Result := x + 1;\n\
         ensure\n\
           Result = old x + 1;\n\
         end;\n\
         PrintLn(Increment(5));\n\
         PrintLn(Increment(0));\n\
         PrintLn(Increment(-1));",
    );
    assert_eq!(out, "6\n1\n0\n");
}

#[test]
fn buggy_postcondition_fires() {
    let err = run_err(
        "function Increment(x: Integer): Integer;\n\
         begin\n\
           Result := x + 2;\n\
         ensure\n\
           Result = old x + 1;\n\
         end;\n\
         Increment(5);",
    );
    assert_eq!(err.class_name(), "EContractFailed");
    assert!(err.message().contains("Post-condition failed in Increment"));
}

#[test]
fn precondition_failure_names_the_function() {
    let err = run_err(
        "function Half(x: Integer): Integer;\n\
         require\n\
           x mod 2 = 0 : 'x must be even';\n\
         begin\n\
           Result := x div 2;\n\
         end;\n\
         Half(3);",
    );
    assert_eq!(err.class_name(), "EContractFailed");
    assert!(err.message().contains("Pre-condition failed in Half"));
    assert!(err.message().contains("x must be even"));
}

#[test]
fn precondition_passes_on_valid_input() {
    let out = run(
        "function Half(x: Integer): Integer;\n\
         require\n\
           x mod 2 = 0;\n\
         begin\n\
           Result := x div 2;\n\
         end;\n\
         PrintLn(Half(8));",
    );
    assert_eq!(out, "4\n");
}

#[test]
fn contract_failures_are_catchable() {
    let out = run(
        "function Strict(x: Integer): Integer;\n\
         require\n\
           x > 0;\n\
         begin\n\
           Result := x;\n\
         end;\n\
         try\n\
           Strict(-5);\n\
         except\n\
           on E: EContractFailed do PrintLn('contract: ' + E.Message);\n\
         end;",
    );
    assert_eq!(out, "contract: Pre-condition failed in Strict\n");
}

#[test]
fn nested_calls_capture_old_per_frame() {
    let out = run(
        "function Inc1(x: Integer): Integer;\n\
         begin\n\
           if x < 3 then\n\
             Inc1(x + 1);\n\
           Result := x + 1;\n\
         ensure\n\
           Result = old x + 1;\n\
         end;\n\
         PrintLn(Inc1(1));",
    );
    // Each recursive frame checks its own captured `old x`.
    assert_eq!(out, "2\n");
}

#[test]
fn ensure_sees_final_result_after_exit() {
    let out = run(
        "function PickFive(flag: Boolean): Integer;\n\
         begin\n\
           if flag then\n\
             exit(5);\n\
           Result := 5;\n\
         ensure\n\
           Result = 5;\n\
         end;\n\
         PrintLn(PickFive(True));\n\
         PrintLn(PickFive(False));",
    );
    assert_eq!(out, "5\n5\n");
}
