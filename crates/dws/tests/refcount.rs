use dws::{CollectStringPrint, NoLimitTracker, Runner};
use pretty_assertions::assert_eq;

fn run(src: &str) -> String {
    let runner = Runner::new(src.to_owned(), "test.pas").unwrap();
    let mut print = CollectStringPrint::new();
    runner.run(NoLimitTracker::new(), &mut print).unwrap();
    print.into_output()
}

const NOISY: &str = "type TNoisy = class\n\
     FName: String;\n\
     constructor Create(name: String);\n\
     destructor Destroy; override;\n\
   end;\n\
   constructor TNoisy.Create(name: String);\n\
   begin\n\
     FName := name;\n\
   end;\n\
   destructor TNoisy.Destroy;\n\
   begin\n\
     PrintLn('destroying ' + FName);\n\
   end;\n";

#[test]
fn destructor_runs_once_when_overwritten_with_nil() {
    let out = run(&format!(
        "{NOISY}\
         var a := TNoisy.Create('a');\n\
         PrintLn('before');\n\
         a := nil;\n\
         PrintLn('after');"
    ));
    assert_eq!(out, "before\ndestroying a\nafter\n");
}

#[test]
fn overwriting_with_another_instance_destroys_the_old_one() {
    let out = run(&format!(
        "{NOISY}\
         var a := TNoisy.Create('first');\n\
         a := TNoisy.Create('second');\n\
         PrintLn('swapped');"
    ));
    assert_eq!(out, "destroying first\nswapped\ndestroying second\n");
}

#[test]
fn unreferenced_objects_never_run_their_destructor() {
    let out = run(&format!(
        "{NOISY}\
         TNoisy.Create('temp');\n\
         PrintLn('done');"
    ));
    assert_eq!(out, "done\n");
}

#[test]
fn scope_exit_releases_locals() {
    let out = run(&format!(
        "{NOISY}\
         procedure Scoped;\n\
         begin\n\
           var n := TNoisy.Create('scoped');\n\
           PrintLn('inside');\n\
         end;\n\
         Scoped();\n\
         PrintLn('outside');"
    ));
    assert_eq!(out, "inside\ndestroying scoped\noutside\n");
}

#[test]
fn two_references_need_two_releases() {
    let out = run(&format!(
        "{NOISY}\
         var a := TNoisy.Create('shared');\n\
         var b := a;\n\
         a := nil;\n\
         PrintLn('one left');\n\
         b := nil;\n\
         PrintLn('gone');"
    ));
    assert_eq!(out, "one left\ndestroying shared\ngone\n");
}

#[test]
fn explicit_destroy_twice_raises() {
    let out = run(&format!(
        "{NOISY}\
         var o := TNoisy.Create('x');\n\
         o.Destroy;\n\
         try\n\
           o.Destroy;\n\
         except\n\
           on E: EObjectDestroyed do PrintLn('caught: ' + E.Message);\n\
         end;\n\
         o := nil;\n\
         PrintLn('end');"
    ));
    assert_eq!(
        out,
        "destroying x\ncaught: Object already destroyed\nend\n"
    );
}

#[test]
fn free_destroys_and_free_on_nil_is_a_noop() {
    let out = run(&format!(
        "{NOISY}\
         var o := TNoisy.Create('freed');\n\
         o.Free;\n\
         var n: TNoisy;\n\
         n.Free;\n\
         PrintLn('ok');"
    ));
    assert_eq!(out, "destroying freed\nok\n");
}

#[test]
fn releasing_an_interface_releases_the_object() {
    let out = run(&format!(
        "type IThing = interface\n\
         end;\n\
         {}\n\
         type TThing = class (TNoisy, IThing)\n\
         end;\n\
         var i: IThing := TThing.Create('wrapped');\n\
         PrintLn('held');\n\
         i := nil;\n\
         PrintLn('released');",
        NOISY
    ));
    assert_eq!(out, "held\ndestroying wrapped\nreleased\n");
}

#[test]
fn function_results_transfer_ownership_to_the_caller() {
    let out = run(&format!(
        "{NOISY}\
         function Make(name: String): TNoisy;\n\
         begin\n\
           Result := TNoisy.Create(name);\n\
         end;\n\
         var o := Make('made');\n\
         PrintLn('have it');\n\
         o := nil;\n\
         PrintLn('done');"
    ));
    assert_eq!(out, "have it\ndestroying made\ndone\n");
}

#[test]
fn fields_are_released_when_the_owner_is_destroyed() {
    let out = run(&format!(
        "{NOISY}\
         type THolder = class\n\
           FInner: TNoisy;\n\
         end;\n\
         var h := THolder.Create;\n\
         h.FInner := TNoisy.Create('inner');\n\
         PrintLn('holding');\n\
         h := nil;\n\
         PrintLn('dropped');"
    ));
    assert_eq!(out, "holding\ndestroying inner\ndropped\n");
}

#[test]
fn globals_are_released_at_program_end() {
    let out = run(&format!(
        "{NOISY}\
         var keeper := TNoisy.Create('global');\n\
         PrintLn('running');"
    ));
    // The global scope is torn down when the program finishes.
    assert_eq!(out, "running\ndestroying global\n");
}

#[test]
fn destructor_body_releases_do_not_recurse() {
    let out = run(&format!(
        "{NOISY}\
         type TSelfish = class (TNoisy)\n\
           FMe: TSelfish;\n\
           destructor Destroy; override;\n\
         end;\n\
         destructor TSelfish.Destroy;\n\
         begin\n\
           PrintLn('selfish going');\n\
           inherited;\n\
         end;\n\
         var s := TSelfish.Create('loop');\n\
         s.FMe := s;\n\
         s.FMe := nil;\n\
         s := nil;\n\
         PrintLn('survived');"
    ));
    assert_eq!(out, "selfish going\ndestroying loop\nsurvived\n");
}
