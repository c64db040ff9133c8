//! Numeric builtins.

use crate::{
    exception_public::CodeLoc,
    exception_private::RunResult,
    eval::Interp,
    intern::StaticSymbols,
    io::PrintWriter,
    resource::ResourceTracker,
    value::{Number, Value},
};

use super::{Builtin, check_argc};

pub(super) fn unary<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    builtin: Builtin,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 1, 1, "math function", pos)?;
    let v = args.pop().expect("checked arity");
    let n = v.as_number();
    let msg = format!("expected a number, got {}", interp.describe(&v));
    interp.discard(v)?;
    let Some(n) = n else {
        return Err(interp.raise(StaticSymbols::EScriptError, msg, pos));
    };
    Ok(match builtin {
        Builtin::Abs => match n {
            Number::Int(v) => Value::Int(v.wrapping_abs()),
            Number::Float(v) => Value::Float(v.abs()),
        },
        Builtin::Sqr => match n {
            Number::Int(v) => Value::Int(v.wrapping_mul(v)),
            Number::Float(v) => Value::Float(v * v),
        },
        Builtin::Sqrt => Value::Float(n.as_f64().sqrt()),
        Builtin::Trunc => Value::Int(n.as_f64().trunc() as i64),
        Builtin::Round => Value::Int(n.as_f64().round() as i64),
        Builtin::Floor => Value::Int(n.as_f64().floor() as i64),
        Builtin::Ceil => Value::Int(n.as_f64().ceil() as i64),
        Builtin::Exp => Value::Float(n.as_f64().exp()),
        Builtin::Ln => Value::Float(n.as_f64().ln()),
        Builtin::Sin => Value::Float(n.as_f64().sin()),
        Builtin::Cos => Value::Float(n.as_f64().cos()),
        _ => Value::Float(n.as_f64().tan()),
    })
}

pub(super) fn binary<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    builtin: Builtin,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 2, 2, "math function", pos)?;
    let bv = args.pop().expect("checked arity");
    let av = args.pop().expect("checked arity");
    let a = av.as_number();
    let b = bv.as_number();
    let msg = format!(
        "expected numbers, got {} and {}",
        interp.describe(&av),
        interp.describe(&bv)
    );
    interp.discard(av)?;
    interp.discard(bv)?;
    let (Some(a), Some(b)) = (a, b) else {
        return Err(interp.raise(StaticSymbols::EScriptError, msg, pos));
    };
    Ok(match builtin {
        Builtin::Min => match (a, b) {
            (Number::Int(x), Number::Int(y)) => Value::Int(x.min(y)),
            _ => Value::Float(a.as_f64().min(b.as_f64())),
        },
        Builtin::Max => match (a, b) {
            (Number::Int(x), Number::Int(y)) => Value::Int(x.max(y)),
            _ => Value::Float(a.as_f64().max(b.as_f64())),
        },
        _ => Value::Float(a.as_f64().powf(b.as_f64())),
    })
}

pub(super) fn pi<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 0, 0, "Pi", pos)?;
    Ok(Value::Float(std::f64::consts::PI))
}
