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

const DISPATCH_CHAIN: &str = "type TBase = class\n\
     function GetValue: Integer; virtual;\n\
   end;\n\
   type TMiddle = class (TBase)\n\
     function GetValue: Integer; override;\n\
   end;\n\
   type TLeaf = class (TMiddle)\n\
     function GetValue: Integer; override;\n\
   end;\n\
   function TBase.GetValue: Integer;\n\
   begin\n\
     Result := 1;\n\
   end;\n\
   function TMiddle.GetValue: Integer;\n\
   begin\n\
     Result := 2;\n\
   end;\n\
   function TLeaf.GetValue: Integer;\n\
   begin\n\
     Result := 3;\n\
   end;\n";

#[test]
fn virtual_dispatch_uses_runtime_class() {
    let out = run(&format!(
        "{DISPATCH_CHAIN}\
         var obj: TBase := TLeaf.Create;\n\
         PrintLn(obj.GetValue);\n\
         var mid: TBase := TMiddle.Create;\n\
         PrintLn(mid.GetValue);"
    ));
    assert_eq!(out, "3\n2\n");
}

#[test]
fn reintroduce_is_not_polymorphic() {
    let out = run(
        "type TB = class\n\
           function M: Integer; virtual;\n\
         end;\n\
         type TC = class (TB)\n\
           function M: Integer; reintroduce;\n\
         end;\n\
         function TB.M: Integer;\n\
         begin\n\
           Result := 1;\n\
         end;\n\
         function TC.M: Integer;\n\
         begin\n\
           Result := 2;\n\
         end;\n\
         var b: TB := TC.Create;\n\
         PrintLn(b.M);\n\
         var c: TC := TC.Create;\n\
         PrintLn(c.M);",
    );
    // Through a TB-typed reference the base implementation runs; only the
    // TC-typed reference sees the reintroduced method.
    assert_eq!(out, "1\n2\n");
}

#[test]
fn inherited_calls_parent_implementation() {
    let out = run(
        "type TBase = class\n\
           function Describe: String; virtual;\n\
         end;\n\
         type TChild = class (TBase)\n\
           function Describe: String; override;\n\
         end;\n\
         function TBase.Describe: String;\n\
         begin\n\
           Result := 'base';\n\
         end;\n\
         function TChild.Describe: String;\n\
         begin\n\
           Result := inherited Describe() + '+child';\n\
         end;\n\
         var c := TChild.Create;\n\
         PrintLn(c.Describe);",
    );
    assert_eq!(out, "base+child\n");
}

#[test]
fn fields_are_zero_initialized_and_settable() {
    let out = run(
        "type TPoint = class\n\
           FX, FY: Integer;\n\
           FName: String;\n\
           function Sum: Integer;\n\
         end;\n\
         function TPoint.Sum: Integer;\n\
         begin\n\
           Result := FX + FY;\n\
         end;\n\
         var p := TPoint.Create;\n\
         PrintLn(p.FX);\n\
         PrintLn(p.FName = '');\n\
         p.FX := 3;\n\
         p.FY := 4;\n\
         PrintLn(p.Sum);",
    );
    assert_eq!(out, "0\nTrue\n7\n");
}

#[test]
fn constructor_with_arguments() {
    let out = run(
        "type TGreeter = class\n\
           FName: String;\n\
           constructor Create(name: String);\n\
           function Greet: String;\n\
         end;\n\
         constructor TGreeter.Create(name: String);\n\
         begin\n\
           FName := name;\n\
         end;\n\
         function TGreeter.Greet: String;\n\
         begin\n\
           Result := 'hello ' + FName;\n\
         end;\n\
         var g := TGreeter.Create('world');\n\
         PrintLn(g.Greet);\n\
         var h := new TGreeter('again');\n\
         PrintLn(h.Greet);",
    );
    assert_eq!(out, "hello world\nhello again\n");
}

#[test]
fn class_vars_are_shared_and_reachable_through_typed_nil() {
    let out = run(
        "type TCounter = class\n\
           class var Count: Integer;\n\
           class const Limit = 10;\n\
         end;\n\
         TCounter.Count := 5;\n\
         var a := TCounter.Create;\n\
         var b := TCounter.Create;\n\
         a.Count := a.Count + 1;\n\
         PrintLn(b.Count);\n\
         PrintLn(TCounter.Limit);\n\
         var n: TCounter;\n\
         PrintLn(n.Count);",
    );
    // The typed-nil receiver still reaches class storage.
    assert_eq!(out, "6\n10\n6\n");
}

#[test]
fn class_methods_and_metaclass_values() {
    let out = run(
        "type TAnimal = class\n\
           class function Speak: String; virtual;\n\
           begin\n\
             Result := 'generic';\n\
           end;\n\
         end;\n\
         type TDog = class (TAnimal)\n\
           class function Speak: String; override;\n\
           begin\n\
             Result := 'woof';\n\
           end;\n\
         end;\n\
         PrintLn(TAnimal.Speak);\n\
         PrintLn(TDog.Speak);\n\
         var cls: class of TAnimal := TDog;\n\
         PrintLn(cls.Speak);\n\
         PrintLn(cls.ClassName);\n\
         var pet: TAnimal := cls.Create;\n\
         PrintLn(pet.Speak);",
    );
    assert_eq!(out, "generic\nwoof\nwoof\nTDog\nwoof\n");
}

#[test]
fn properties_with_field_and_method_specifiers() {
    let out = run(
        "type TBox = class\n\
           FValue: Integer;\n\
           procedure SetValue(v: Integer);\n\
           property Value: Integer read FValue write SetValue;\n\
         end;\n\
         procedure TBox.SetValue(v: Integer);\n\
         begin\n\
           FValue := v * 2;\n\
         end;\n\
         var b := TBox.Create;\n\
         b.Value := 21;\n\
         PrintLn(b.Value);",
    );
    assert_eq!(out, "42\n");
}

#[test]
fn default_property_routes_subscripts() {
    let out = run(
        "type TList = class\n\
           FItems: array of Integer;\n\
           constructor Create;\n\
           function GetItem(i: Integer): Integer;\n\
           procedure SetItem(i: Integer; v: Integer);\n\
           property Items[i: Integer]: Integer read GetItem write SetItem; default;\n\
         end;\n\
         constructor TList.Create;\n\
         begin\n\
           SetLength(FItems, 3);\n\
         end;\n\
         function TList.GetItem(i: Integer): Integer;\n\
         begin\n\
           Result := FItems[i];\n\
         end;\n\
         procedure TList.SetItem(i: Integer; v: Integer);\n\
         begin\n\
           FItems[i] := v;\n\
         end;\n\
         var l := TList.Create;\n\
         l[0] := 5;\n\
         l[2] := 9;\n\
         PrintLn(l[0]);\n\
         PrintLn(l[1]);\n\
         PrintLn(l[2]);",
    );
    assert_eq!(out, "5\n0\n9\n");
}

#[test]
fn interfaces_wrap_and_dispatch() {
    let out = run(
        "type IGreeter = interface\n\
           function Greet: String;\n\
         end;\n\
         type TPerson = class (TObject, IGreeter)\n\
           function Greet: String;\n\
         end;\n\
         function TPerson.Greet: String;\n\
         begin\n\
           Result := 'hi';\n\
         end;\n\
         var p := TPerson.Create;\n\
         var g: IGreeter := p;\n\
         PrintLn(g.Greet);\n\
         PrintLn(p is IGreeter);\n\
         PrintLn(TPerson implements IGreeter);\n\
         var back := g as TPerson;\n\
         PrintLn(back.Greet);",
    );
    assert_eq!(out, "hi\nTrue\nTrue\nhi\n");
}

#[test]
fn is_and_as_on_classes() {
    let out = run(&format!(
        "{DISPATCH_CHAIN}\
         var obj: TBase := TMiddle.Create;\n\
         PrintLn(obj is TMiddle);\n\
         PrintLn(obj is TLeaf);\n\
         PrintLn(nil is TBase);\n\
         var m := obj as TMiddle;\n\
         PrintLn(m.GetValue);\n\
         try\n\
           var l := obj as TLeaf;\n\
         except\n\
           on E: EInvalidCast do PrintLn('bad cast');\n\
         end;"
    ));
    assert_eq!(out, "True\nFalse\nFalse\n2\nbad cast\n");
}

#[test]
fn rtti_descriptors_are_consistent() {
    let out = run(
        "type TFoo = class end;\n\
         type TBar = class end;\n\
         var a := TFoo.Create;\n\
         var b := TFoo.Create;\n\
         var c := TBar.Create;\n\
         PrintLn(TypeOf(a) = TypeOf(b));\n\
         PrintLn(TypeOf(a) = TypeOf(c));\n\
         PrintLn(a.ClassName);\n\
         PrintLn(a.ClassType.ClassName);\n\
         PrintLn(TypeOf(a));",
    );
    assert_eq!(out, "True\nFalse\nTFoo\nTFoo\nTFoo\n");
}

#[test]
fn abstract_classes_cannot_be_instantiated() {
    let err = run_err(
        "type TShape = abstract class\n\
           function Area: Float; virtual; abstract;\n\
         end;\n\
         var s := TShape.Create;",
    );
    assert!(err.message().contains("abstract class"));
}

#[test]
fn partial_classes_merge_before_vmt_rebuild() {
    let out = run(
        "type TThing = class\n\
           function A: Integer;\n\
           begin\n\
             Result := 1;\n\
           end;\n\
         end;\n\
         type TThing = partial class\n\
           function B: Integer;\n\
           begin\n\
             Result := A + 1;\n\
           end;\n\
         end;\n\
         var t := TThing.Create;\n\
         PrintLn(t.A);\n\
         PrintLn(t.B);",
    );
    assert_eq!(out, "1\n2\n");
}

#[test]
fn nested_classes() {
    let out = run(
        "type TOuter = class\n\
           type TInner = class\n\
             function Val: Integer;\n\
             begin\n\
               Result := 7;\n\
             end;\n\
           end;\n\
         end;\n\
         var i := TOuter.TInner.Create;\n\
         PrintLn(i.Val);",
    );
    assert_eq!(out, "7\n");
}

#[test]
fn with_statement_resolves_members_first() {
    let out = run(
        "type TPoint = class\n\
           FX, FY: Integer;\n\
         end;\n\
         var p := TPoint.Create;\n\
         var FX := 99;\n\
         with p do\n\
         begin\n\
           FX := 3;\n\
           FY := 4;\n\
         end;\n\
         PrintLn(p.FX);\n\
         PrintLn(p.FY);\n\
         PrintLn(FX);",
    );
    // Member names of the with-object resolve before enclosing scopes.
    assert_eq!(out, "3\n4\n99\n");
}
