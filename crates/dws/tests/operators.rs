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
fn arithmetic_and_pascal_precedence() {
    let out = run(
        "PrintLn(1 + 2 * 3);\n\
         PrintLn((1 + 2) * 3);\n\
         PrintLn(10 - 2 - 3);\n\
         PrintLn(2 * 3 + 4 * 5);",
    );
    assert_eq!(out, "7\n9\n5\n26\n");
}

#[test]
fn integer_division_and_modulo() {
    let out = run(
        "PrintLn(7 div 2);\n\
         PrintLn(-7 div 2);\n\
         PrintLn(7 mod 3);\n\
         PrintLn(7 / 2);",
    );
    assert_eq!(out, "3\n-3\n1\n3.5\n");
}

#[test]
fn shifts() {
    let out = run(
        "PrintLn(1 shl 4);\n\
         PrintLn(16 shr 2);\n\
         PrintLn((-8) sar 1);\n\
         PrintLn((-1) shr 60);",
    );
    assert_eq!(out, "16\n4\n-4\n15\n");
}

#[test]
fn bitwise_and_logical_operators() {
    let out = run(
        "PrintLn(12 and 10);\n\
         PrintLn(12 or 3);\n\
         PrintLn(12 xor 10);\n\
         PrintLn(not 0);\n\
         PrintLn(True and False);\n\
         PrintLn(True xor True);\n\
         PrintLn(not False);",
    );
    assert_eq!(out, "8\n15\n6\n-1\nFalse\nFalse\nTrue\n");
}

#[test]
fn comparisons() {
    let out = run(
        "PrintLn(2 < 3);\n\
         PrintLn('abc' < 'abd');\n\
         PrintLn('a' = 'a');\n\
         PrintLn(2 <> 2);\n\
         PrintLn(3.5 >= 3);\n\
         type TColor = (Red, Green, Blue);\n\
         PrintLn(Red < Blue);",
    );
    assert_eq!(out, "True\nTrue\nTrue\nFalse\nTrue\nTrue\n");
}

#[test]
fn string_concatenation() {
    let out = run("PrintLn('foo' + 'bar' + '!');");
    assert_eq!(out, "foobar!\n");
}

#[test]
fn operator_overload_on_a_class() {
    let out = run(
        "type TVec = class\n\
           X, Y: Integer;\n\
           constructor Create(ax, ay: Integer);\n\
         end;\n\
         constructor TVec.Create(ax, ay: Integer);\n\
         begin\n\
           X := ax;\n\
           Y := ay;\n\
         end;\n\
         function AddVec(a, b: TVec): TVec;\n\
         begin\n\
           Result := TVec.Create(a.X + b.X, a.Y + b.Y);\n\
         end;\n\
         operator + (TVec, TVec): TVec uses AddVec;\n\
         var v := TVec.Create(1, 2) + TVec.Create(3, 4);\n\
         PrintLn(v.X);\n\
         PrintLn(v.Y);",
    );
    assert_eq!(out, "4\n6\n");
}

#[test]
fn incompatible_operands_raise() {
    let err = run_err("var x := 1 + True;");
    assert!(err.message().contains("uncaught exception"));
}

#[test]
fn object_identity_equality() {
    let out = run(
        "type TFoo = class end;\n\
         var a := TFoo.Create;\n\
         var b := TFoo.Create;\n\
         var c := a;\n\
         PrintLn(a = b);\n\
         PrintLn(a = c);\n\
         PrintLn(a = nil);\n\
         PrintLn(nil = nil);",
    );
    assert_eq!(out, "False\nTrue\nFalse\nTrue\n");
}

#[test]
fn membership_in_arrays() {
    let out = run(
        "PrintLn(3 in [1, 2, 3]);\n\
         PrintLn(9 in [1, 2, 3]);",
    );
    assert_eq!(out, "True\nFalse\n");
}
