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
fn println_display_forms() {
    let out = run(
        "PrintLn(42);\n\
         PrintLn(-7);\n\
         PrintLn(True);\n\
         PrintLn(False);\n\
         PrintLn(1.5);\n\
         PrintLn(2.0);\n\
         PrintLn('text');\n\
         PrintLn(nil);",
    );
    assert_eq!(out, "42\n-7\nTrue\nFalse\n1.5\n2\ntext\nnil\n");
}

#[test]
fn string_builtins() {
    let out = run(
        "PrintLn(UpperCase('abc'));\n\
         PrintLn(LowerCase('ABC'));\n\
         PrintLn(Trim('  pad  '));\n\
         PrintLn(Pos('lo', 'hello'));\n\
         PrintLn(Pos('zz', 'hello'));\n\
         PrintLn(Copy('hello', 2, 3));\n\
         PrintLn(StringReplace('a-b-c', '-', '+'));\n\
         PrintLn(StringOfChar('x', 4));\n\
         PrintLn(Length('hello'));",
    );
    assert_eq!(out, "ABC\nabc\npad\n4\n0\nell\na+b+c\nxxxx\n5\n");
}

#[test]
fn string_indexing_is_one_based() {
    let out = run(
        "var s := 'abc';\n\
         PrintLn(s[1]);\n\
         PrintLn(s[3]);\n\
         try\n\
           PrintLn(s[0]);\n\
         except\n\
           on E: EIndexOutOfRange do PrintLn('oob');\n\
         end;",
    );
    assert_eq!(out, "a\nc\noob\n");
}

#[test]
fn substring_membership() {
    let out = run(
        "PrintLn('bc' in 'abcd');\n\
         PrintLn('xy' in 'abcd');\n\
         PrintLn('' in 'abcd');",
    );
    // The empty substring is never contained.
    assert_eq!(out, "True\nFalse\nFalse\n");
}

#[test]
fn conversions() {
    let out = run(
        "PrintLn(IntToStr(42) + '!');\n\
         PrintLn(StrToInt('17') + 1);\n\
         PrintLn(FloatToStr(2.5));\n\
         PrintLn(StrToFloat('0.5') * 2);\n\
         PrintLn(BoolToStr(1 = 1));",
    );
    assert_eq!(out, "42!\n18\n2.5\n1\nTrue\n");
}

#[test]
fn str_to_int_failure_raises_convert_error() {
    let err = run_err("StrToInt('abc');");
    assert_eq!(err.class_name(), "EConvertError");
}

#[test]
fn format_subset() {
    let out = run(
        "PrintLn(Format('%d items, %s', [3, 'ok']));\n\
         PrintLn(Format('%x', [255]));\n\
         PrintLn(Format('%.3f', [1.5]));\n\
         PrintLn(Format('100%%', [0]));",
    );
    assert_eq!(out, "3 items, ok\nff\n1.500\n100%\n");
}

#[test]
fn math_builtins() {
    let out = run(
        "PrintLn(Abs(-5));\n\
         PrintLn(Abs(-1.5));\n\
         PrintLn(Min(3, 7));\n\
         PrintLn(Max(3, 7));\n\
         PrintLn(Sqrt(9.0));\n\
         PrintLn(Sqr(4));\n\
         PrintLn(Trunc(3.9));\n\
         PrintLn(Round(3.5));\n\
         PrintLn(Floor(3.9));\n\
         PrintLn(Ceil(3.1));\n\
         PrintLn(Power(2.0, 10.0));",
    );
    assert_eq!(out, "5\n1.5\n3\n7\n3\n16\n3\n4\n3\n4\n1024\n");
}

#[test]
fn ordinal_builtins() {
    let out = run(
        "type TColor = (Red, Green, Blue);\n\
         PrintLn(Ord(Green));\n\
         PrintLn(Ord(True));\n\
         PrintLn(Ord('A'));\n\
         PrintLn(Chr(66));\n\
         PrintLn(Succ(1));\n\
         PrintLn(Pred(Blue));\n\
         var n := 5;\n\
         Inc(n);\n\
         Inc(n, 3);\n\
         Dec(n);\n\
         PrintLn(n);",
    );
    assert_eq!(out, "1\n1\n65\nB\n2\nGreen\n8\n");
}

#[test]
fn assert_builtin() {
    let out = run(
        "Assert(1 + 1 = 2);\n\
         PrintLn('fine');",
    );
    assert_eq!(out, "fine\n");
    let err = run_err("Assert(False, 'broken invariant');");
    assert_eq!(err.class_name(), "EAssertionFailed");
    assert!(err.message().contains("broken invariant"));
}

#[test]
fn assigned_builtin() {
    let out = run(
        "var o: TObject;\n\
         PrintLn(Assigned(o));\n\
         o := TObject.Create;\n\
         PrintLn(Assigned(o));\n\
         var v: Variant;\n\
         PrintLn(Assigned(v));",
    );
    assert_eq!(out, "False\nTrue\nFalse\n");
}

#[test]
fn seeded_random_is_deterministic() {
    let src = "RandomSeed(99);\n\
               PrintLn(RandomInt(1000));\n\
               PrintLn(RandomInt(1000));";
    let first = run(src);
    let second = run(src);
    assert_eq!(first, second);
}
