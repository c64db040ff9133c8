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
fn static_array_sum() {
    let out = run(
        "var arr: array[1..5] of Integer;\n\
         for var i := 1 to 5 do\n\
           arr[i] := i * 10;\n\
         var sum := 0;\n\
         for var i := Low(arr) to High(arr) do\n\
           sum := sum + arr[i];\n\
         PrintLn(sum);",
    );
    assert_eq!(out, "150\n");
}

#[test]
fn static_array_bounds() {
    let out = run(
        "var arr: array[1..5] of Integer;\n\
         PrintLn(Low(arr));\n\
         PrintLn(High(arr));\n\
         PrintLn(Length(arr));",
    );
    assert_eq!(out, "1\n5\n5\n");
}

#[test]
fn static_array_index_out_of_bounds_is_catchable() {
    let out = run(
        "var arr: array[1..5] of Integer;\n\
         try\n\
           arr[0] := 1;\n\
         except\n\
           on E: EIndexOutOfRange do PrintLn('caught');\n\
         end;",
    );
    assert_eq!(out, "caught\n");
}

#[test]
fn dynamic_array_growth() {
    let out = run(
        "var a: array of Integer;\n\
         PrintLn(Length(a));\n\
         PrintLn(High(a));\n\
         Add(a, 1);\n\
         Add(a, 2);\n\
         Add(a, 3);\n\
         PrintLn(Length(a));\n\
         PrintLn(Low(a));\n\
         PrintLn(High(a));",
    );
    // Empty dynamic arrays report High = -1.
    assert_eq!(out, "0\n-1\n3\n0\n2\n");
}

#[test]
fn copy_detaches_while_assignment_shares() {
    let out = run(
        "var a1: array of Integer;\n\
         Add(a1, 1);\n\
         Add(a1, 2);\n\
         Add(a1, 3);\n\
         var a2 := Copy(a1);\n\
         a2[0] := 99;\n\
         PrintLn(a1[0]);\n\
         PrintLn(a2[0]);\n\
         var shared := a1;\n\
         shared[0] := 42;\n\
         PrintLn(a1[0]);",
    );
    assert_eq!(out, "1\n99\n42\n");
}

#[test]
fn writing_past_the_end_fails() {
    let err = run_err(
        "var a: array of Integer;\n\
         Add(a, 1);\n\
         a[1] := 2;",
    );
    assert_eq!(err.class_name(), "EIndexOutOfRange");
}

#[test]
fn set_length_zero_extends_and_truncates() {
    let out = run(
        "var a: array of Integer;\n\
         Add(a, 7);\n\
         SetLength(a, 3);\n\
         PrintLn(a);\n\
         SetLength(a, 1);\n\
         PrintLn(a);",
    );
    assert_eq!(out, "[7, 0, 0]\n[7]\n");
}

#[test]
fn delete_index_of_contains_reverse() {
    let out = run(
        "var a: array of Integer;\n\
         Add(a, 10);\n\
         Add(a, 20);\n\
         Add(a, 30);\n\
         Add(a, 20);\n\
         PrintLn(IndexOf(a, 20));\n\
         PrintLn(IndexOf(a, 20, 2));\n\
         PrintLn(Contains(a, 30));\n\
         PrintLn(Contains(a, 99));\n\
         Delete(a, 1);\n\
         PrintLn(a);\n\
         Reverse(a);\n\
         PrintLn(a);",
    );
    assert_eq!(out, "1\n3\nTrue\nFalse\n[10, 30, 20]\n[20, 30, 10]\n");
}

#[test]
fn array_concat() {
    let out = run(
        "var a: array of Integer;\n\
         Add(a, 1);\n\
         var b: array of Integer;\n\
         Add(b, 2);\n\
         Add(b, 3);\n\
         PrintLn(a + b);",
    );
    assert_eq!(out, "[1, 2, 3]\n");
}

#[test]
fn new_multidimensional_array() {
    let out = run(
        "var m := new Integer[2, 3];\n\
         m[0, 0] := 5;\n\
         m[1, 2] := 7;\n\
         PrintLn(m[0][0]);\n\
         PrintLn(m[1][2]);\n\
         PrintLn(m[0][1]);\n\
         PrintLn(Length(m));\n\
         PrintLn(Length(m[0]));",
    );
    assert_eq!(out, "5\n7\n0\n2\n3\n");
}

#[test]
fn new_array_invalid_dimension() {
    let out = run(
        "try\n\
           var m := new Integer[-1];\n\
         except\n\
           on E: ERangeError do PrintLn('bad dims');\n\
         end;",
    );
    assert_eq!(out, "bad dims\n");
}

#[test]
fn method_call_sugar_on_arrays() {
    let out = run(
        "var a: array of Integer;\n\
         a.Add(5);\n\
         a.Add(6);\n\
         PrintLn(a.Length);\n\
         a.Reverse;\n\
         PrintLn(a);",
    );
    assert_eq!(out, "2\n[6, 5]\n");
}

fn even_odd_program(count: usize) -> String {
    let names: Vec<String> = (0..count).map(|i| format!("E{i:04}")).collect();
    let evens: Vec<&str> = names.iter().step_by(2).map(String::as_str).collect();
    let odds: Vec<&str> = names.iter().skip(1).step_by(2).map(String::as_str).collect();
    format!(
        "type TBig = ({all});\n\
         type TBigSet = set of TBig;\n\
         var a: TBigSet := [{evens}];\n\
         var b: TBigSet := [{odds}];\n\
         PrintLn(Length(a + b));\n\
         PrintLn(Length(a * b));\n\
         PrintLn((a - b) = a);\n\
         PrintLn(E0004 in a);\n\
         PrintLn(E0005 in a);",
        all = names.join(", "),
        evens = evens.join(", "),
        odds = odds.join(", "),
    )
}

#[test]
fn set_operations_on_64_value_enum() {
    // 64 values fit the bitmask representation.
    let out = run(&even_odd_program(64));
    assert_eq!(out, "64\n0\nTrue\nTrue\nFalse\n");
}

#[test]
fn set_operations_on_large_enum_match_bitmask_behavior() {
    // 80 values force the hashed representation; behavior is identical.
    let out = run(&even_odd_program(80));
    assert_eq!(out, "80\n0\nTrue\nTrue\nFalse\n");
}

#[test]
fn set_literals_ranges_and_include_exclude() {
    let out = run(
        "type TColor = (Red, Orange, Yellow, Green, Blue);\n\
         type TColors = set of TColor;\n\
         var warm: TColors := [Red..Yellow];\n\
         PrintLn(warm);\n\
         Include(warm, Blue);\n\
         PrintLn(Blue in warm);\n\
         Exclude(warm, Red);\n\
         PrintLn(Red in warm);",
    );
    assert_eq!(out, "[Red, Orange, Yellow]\nTrue\nFalse\n");
}

#[test]
fn set_assignment_copies() {
    let out = run(
        "type TColor = (Red, Green, Blue);\n\
         type TColors = set of TColor;\n\
         var a: TColors := [Red];\n\
         var b: TColors := a;\n\
         Include(b, Blue);\n\
         PrintLn(Blue in a);\n\
         PrintLn(Blue in b);",
    );
    assert_eq!(out, "False\nTrue\n");
}

#[test]
fn for_in_over_set_uses_declared_order() {
    let out = run(
        "type TColor = (Red, Green, Blue);\n\
         type TColors = set of TColor;\n\
         var s: TColors := [Blue, Red];\n\
         for var c in s do PrintLn(c);",
    );
    assert_eq!(out, "Red\nBlue\n");
}
