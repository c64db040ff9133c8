use dws::{CollectStringPrint, NoLimitTracker, Object, Runner};
use pretty_assertions::assert_eq;

fn run(src: &str) -> String {
    let runner = Runner::new(src.to_owned(), "test.pas").unwrap();
    let mut print = CollectStringPrint::new();
    runner.run(NoLimitTracker::new(), &mut print).unwrap();
    print.into_output()
}

fn run_value(src: &str) -> Object {
    let runner = Runner::new(src.to_owned(), "test.pas").unwrap();
    let mut print = CollectStringPrint::new();
    runner.run(NoLimitTracker::new(), &mut print).unwrap()
}

#[test]
fn unassigned_equals_zero_empty_and_false() {
    let out = run(
        "var v: Variant;\n\
         PrintLn(v = 0);\n\
         PrintLn(v = '');\n\
         PrintLn(v = False);\n\
         v := 1;\n\
         PrintLn(v = 0);",
    );
    assert_eq!(out, "True\nTrue\nTrue\nFalse\n");
}

#[test]
fn variants_unbox_for_arithmetic_and_comparison() {
    let out = run(
        "var v: Variant := 5;\n\
         PrintLn(v + 2);\n\
         PrintLn(v * 2);\n\
         PrintLn(v = 5);\n\
         PrintLn(v > 3);\n\
         v := 'ab';\n\
         PrintLn(v + 'cd');",
    );
    assert_eq!(out, "7\n10\nTrue\nTrue\nabcd\n");
}

#[test]
fn variant_introspection() {
    let out = run(
        "var v: Variant;\n\
         PrintLn(VarIsNull(v));\n\
         PrintLn(VarType(v));\n\
         v := 3.5;\n\
         PrintLn(VarIsNull(v));\n\
         PrintLn(VarType(v));\n\
         v := 'text';\n\
         PrintLn(VarType(v));",
    );
    assert_eq!(out, "True\nUnassigned\nFalse\nFloat\nString\n");
}

#[test]
fn variant_as_converts_the_inner_value() {
    let out = run(
        "var v: Variant := '42';\n\
         PrintLn((v as Integer) + 1);\n\
         v := 7;\n\
         PrintLn(v as String);\n\
         v := 2.9;\n\
         PrintLn(v as Integer);",
    );
    assert_eq!(out, "43\n7\n2\n");
}

#[test]
fn invalid_variant_conversion_raises() {
    let out = run(
        "var v: Variant := 'not a number';\n\
         try\n\
           PrintLn(v as Integer);\n\
         except\n\
           on E: EConvertError do PrintLn('convert error');\n\
         end;",
    );
    assert_eq!(out, "convert error\n");
}

#[test]
fn variant_boxing_on_assignment() {
    let out = run(
        "var v: Variant;\n\
         v := 10;\n\
         var w: Variant := v;\n\
         w := w + 1;\n\
         PrintLn(v);\n\
         PrintLn(w);",
    );
    assert_eq!(out, "10\n11\n");
}

#[test]
fn program_result_is_the_last_expression() {
    assert_eq!(run_value("1 + 2;"), Object::Int(3));
    assert_eq!(run_value("'hi';"), Object::String("hi".to_owned()));
    assert_eq!(run_value("var x := 5; x * 2;"), Object::Int(10));
    assert_eq!(run_value("var x := 5;"), Object::Nil);
}

#[test]
fn integer_float_promotion() {
    let out = run(
        "PrintLn(1 + 2.5);\n\
         PrintLn(7 / 2);\n\
         PrintLn(7 div 2);\n\
         PrintLn(2 = 2.0);\n\
         var f: Float := 3;\n\
         PrintLn(f);",
    );
    assert_eq!(out, "3.5\n3.5\n3\nTrue\n3\n");
}
