use dws::{CollectStringPrint, NoLimitTracker, Runner};
use pretty_assertions::assert_eq;

fn run(src: &str) -> String {
    let runner = Runner::new(src.to_owned(), "test.pas").unwrap();
    let mut print = CollectStringPrint::new();
    runner.run(NoLimitTracker::new(), &mut print).unwrap();
    print.into_output()
}

#[test]
fn closures_capture_by_reference() {
    let out = run(
        "var x := 1;\n\
         var f := lambda () => x;\n\
         x := 42;\n\
         PrintLn(f());\n\
         var bump := lambda () begin x := x + 1; end;\n\
         bump();\n\
         PrintLn(x);",
    );
    // Updates in the enclosing scope are visible to later calls, and
    // mutations inside the lambda are visible outside.
    assert_eq!(out, "42\n43\n");
}

#[test]
fn lambdas_against_the_same_scope_share_captures() {
    let out = run(
        "var counter := 0;\n\
         var inc := lambda () begin counter := counter + 1; end;\n\
         var get := lambda () => counter;\n\
         inc();\n\
         inc();\n\
         PrintLn(get());",
    );
    assert_eq!(out, "2\n");
}

#[test]
fn captured_scope_outlives_the_creating_frame() {
    let out = run(
        "function MakeCounter: Variant;\n\
         begin\n\
           var n := 0;\n\
           Result := lambda () begin n := n + 1; Result := n; end;\n\
         end;\n\
         var c := MakeCounter();\n\
         PrintLn(c());\n\
         PrintLn(c());\n\
         PrintLn(c());",
    );
    assert_eq!(out, "1\n2\n3\n");
}

#[test]
fn higher_order_pipeline() {
    let out = run(
        "var numbers: array of Integer;\n\
         for var i := 1 to 5 do\n\
           Add(numbers, i);\n\
         var doubled := Map(numbers, lambda (x: Integer) => x * 2);\n\
         PrintLn(doubled);\n\
         var big := Filter(doubled, lambda (x: Integer) => x > 4);\n\
         PrintLn(big);\n\
         var total := Reduce(big, lambda (acc, x: Integer) => acc + x, 0);\n\
         PrintLn(total);",
    );
    assert_eq!(out, "[2, 4, 6, 8, 10]\n[6, 8, 10]\n24\n");
}

#[test]
fn for_each_visits_in_order() {
    let out = run(
        "var a: array of Integer;\n\
         Add(a, 3);\n\
         Add(a, 1);\n\
         Add(a, 2);\n\
         ForEach(a, lambda (x: Integer) begin PrintLn(x); end);",
    );
    assert_eq!(out, "3\n1\n2\n");
}

#[test]
fn sort_with_comparator_is_in_place() {
    let out = run(
        "var a: array of Integer;\n\
         Add(a, 3);\n\
         Add(a, 1);\n\
         Add(a, 2);\n\
         Sort(a);\n\
         PrintLn(a);\n\
         Sort(a, lambda (x, y: Integer) => y - x);\n\
         PrintLn(a);",
    );
    assert_eq!(out, "[1, 2, 3]\n[3, 2, 1]\n");
}

#[test]
fn function_pointers_to_named_functions() {
    let out = run(
        "function Triple(x: Integer): Integer;\n\
         begin\n\
           Result := x * 3;\n\
         end;\n\
         var f := @Triple;\n\
         PrintLn(f(4));\n\
         var a: array of Integer;\n\
         Add(a, 1);\n\
         Add(a, 2);\n\
         PrintLn(Map(a, @Triple));",
    );
    assert_eq!(out, "12\n[3, 6]\n");
}

#[test]
fn bound_method_pointers_keep_their_receiver() {
    let out = run(
        "type TAccum = class\n\
           FTotal: Integer;\n\
           procedure Feed(n: Integer);\n\
           begin\n\
             FTotal := FTotal + n;\n\
           end;\n\
         end;\n\
         var acc := TAccum.Create;\n\
         var feed := @acc.Feed;\n\
         feed(5);\n\
         feed(7);\n\
         PrintLn(acc.FTotal);",
    );
    assert_eq!(out, "12\n");
}

#[test]
fn bound_method_pointers_dispatch_virtually() {
    let out = run(
        "type TBase = class\n\
           function Tag: String; virtual;\n\
           begin\n\
             Result := 'base';\n\
           end;\n\
         end;\n\
         type TSub = class (TBase)\n\
           function Tag: String; override;\n\
           begin\n\
             Result := 'sub';\n\
           end;\n\
         end;\n\
         var obj: TBase := TSub.Create;\n\
         var tag := @obj.Tag;\n\
         PrintLn(tag());",
    );
    assert_eq!(out, "sub\n");
}

#[test]
fn lambda_parameters_shadow_captures() {
    let out = run(
        "var x := 10;\n\
         var f := lambda (x: Integer) => x * 2;\n\
         PrintLn(f(3));\n\
         PrintLn(x);",
    );
    assert_eq!(out, "6\n10\n");
}
