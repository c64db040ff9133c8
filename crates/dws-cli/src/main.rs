//! Command-line driver: run a script file and report the result.

use std::process::ExitCode;

use dws::{NoLimitTracker, Object, Runner, StdPrint};

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("usage: dws <script.pas>");
        return ExitCode::FAILURE;
    };
    let code = match std::fs::read_to_string(&path) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error reading {path}: {err}");
            return ExitCode::FAILURE;
        }
    };
    let runner = match Runner::new(code, &path) {
        Ok(runner) => runner,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    let mut print = StdPrint;
    match runner.run(NoLimitTracker::new(), &mut print) {
        Ok(Object::Nil | Object::Unassigned) => ExitCode::SUCCESS,
        Ok(result) => {
            drop(print);
            println!("=> {result:?}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            drop(print);
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
