use dws::{CollectStringPrint, NoLimitTracker, Runner};
use pretty_assertions::assert_eq;

fn run(src: &str) -> String {
    let runner = Runner::new(src.to_owned(), "test.pas").unwrap();
    let mut print = CollectStringPrint::new();
    runner.run(NoLimitTracker::new(), &mut print).unwrap();
    print.into_output()
}

#[test]
fn if_then_else() {
    let out = run(
        "var x := 5;\n\
         if x > 3 then PrintLn('big') else PrintLn('small');\n\
         if x > 10 then PrintLn('huge') else PrintLn('modest');",
    );
    assert_eq!(out, "big\nmodest\n");
}

#[test]
fn inline_if_expression() {
    let out = run(
        "var x := 5;\n\
         PrintLn(if x > 3 then 'big' else 'small');\n\
         var y: Integer := if x > 10 then 7;\n\
         PrintLn(y);",
    );
    // A missing else yields the zero value of the declared type.
    assert_eq!(out, "big\n0\n");
}

#[test]
fn case_with_ranges_and_else() {
    let out = run(
        "for var i := 1 to 7 do\n\
           case i of\n\
             1: PrintLn('one');\n\
             2, 3: PrintLn('few');\n\
             4..6: PrintLn('some');\n\
           else\n\
             PrintLn('many');\n\
           end;",
    );
    assert_eq!(out, "one\nfew\nfew\nsome\nsome\nsome\nmany\n");
}

#[test]
fn while_and_repeat_loops() {
    let out = run(
        "var n := 0;\n\
         while n < 3 do\n\
           n := n + 1;\n\
         PrintLn(n);\n\
         repeat\n\
           n := n - 1;\n\
         until n = 0;\n\
         PrintLn(n);",
    );
    assert_eq!(out, "3\n0\n");
}

#[test]
fn for_downto() {
    let out = run("for var i := 3 downto 1 do Print(IntToStr(i));\nPrintLn('');");
    assert_eq!(out, "321\n");
}

#[test]
fn break_and_continue() {
    let out = run(
        "for var i := 1 to 10 do\n\
         begin\n\
           if i = 3 then continue;\n\
           if i = 5 then break;\n\
           PrintLn(i);\n\
         end;",
    );
    assert_eq!(out, "1\n2\n4\n");
}

#[test]
fn exit_terminates_the_call() {
    let out = run(
        "function FirstEven(limit: Integer): Integer;\n\
         begin\n\
           for var i := 1 to limit do\n\
             if i mod 2 = 0 then\n\
               exit(i);\n\
           Result := -1;\n\
         end;\n\
         PrintLn(FirstEven(9));\n\
         PrintLn(FirstEven(1));",
    );
    assert_eq!(out, "2\n-1\n");
}

#[test]
fn for_in_over_string_and_enum() {
    let out = run(
        "for var c in 'abc' do Print(c);\n\
         PrintLn('');\n\
         type TColor = (Red, Green, Blue);\n\
         for var c in TColor do PrintLn(c);",
    );
    assert_eq!(out, "abc\nRed\nGreen\nBlue\n");
}

#[test]
fn for_in_over_array() {
    let out = run(
        "var a: array of Integer;\n\
         Add(a, 5);\n\
         Add(a, 6);\n\
         var sum := 0;\n\
         for var x in a do\n\
           sum := sum + x;\n\
         PrintLn(sum);",
    );
    assert_eq!(out, "11\n");
}

#[test]
fn enum_loop_bounds() {
    let out = run(
        "type TColor = (Red, Green, Blue);\n\
         for var c := Low(TColor) to High(TColor) do\n\
           Print(IntToStr(Ord(c)));\n\
         PrintLn('');",
    );
    assert_eq!(out, "012\n");
}

#[test]
fn short_circuit_evaluation() {
    let out = run(
        "var calls := 0;\n\
         function Probe: Boolean;\n\
         begin\n\
           calls := calls + 1;\n\
           Result := True;\n\
         end;\n\
         if False and Probe() then PrintLn('no');\n\
         PrintLn(calls);\n\
         if True or Probe() then PrintLn('yes');\n\
         PrintLn(calls);\n\
         if True and Probe() then PrintLn('ran');\n\
         PrintLn(calls);",
    );
    assert_eq!(out, "0\nyes\n0\nran\n1\n");
}

#[test]
fn coalesce_picks_first_truthy() {
    let out = run(
        "PrintLn(0 ?? 5);\n\
         PrintLn(3 ?? 5);\n\
         PrintLn('' ?? 'fallback');\n\
         var v: Variant;\n\
         PrintLn(v ?? 'unset');",
    );
    assert_eq!(out, "5\n3\nfallback\nunset\n");
}

#[test]
fn with_statement_over_record() {
    let out = run(
        "type TPt = record\n\
           X, Y: Integer;\n\
         end;\n\
         var p: TPt;\n\
         with p do\n\
         begin\n\
           X := 3;\n\
           Y := 4;\n\
         end;\n\
         PrintLn(p.X + p.Y);",
    );
    assert_eq!(out, "7\n");
}

#[test]
fn record_assignment_copies_fields() {
    let out = run(
        "type TPt = record\n\
           X, Y: Integer;\n\
         end;\n\
         var p: TPt;\n\
         p.X := 1;\n\
         var q := p;\n\
         q.X := 99;\n\
         PrintLn(p.X);\n\
         PrintLn(q.X);\n\
         PrintLn(p = q);\n\
         q.X := 1;\n\
         PrintLn(p = q);",
    );
    // Records compare structurally and copy on assignment.
    assert_eq!(out, "1\n99\nFalse\nTrue\n");
}

#[test]
fn record_literal_with_type_context() {
    let out = run(
        "type TPt = record\n\
           X, Y: Integer;\n\
         end;\n\
         var p: TPt := (X: 2; Y: 3);\n\
         PrintLn(p.X * p.Y);",
    );
    assert_eq!(out, "6\n");
}

#[test]
fn compound_assignment() {
    let out = run(
        "var x := 10;\n\
         x += 5;\n\
         x -= 3;\n\
         x *= 2;\n\
         PrintLn(x);\n\
         var s := 'ab';\n\
         s += 'cd';\n\
         PrintLn(s);",
    );
    assert_eq!(out, "24\nabcd\n");
}
