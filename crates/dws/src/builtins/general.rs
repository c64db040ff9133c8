//! Output, assertions, RTTI, variant introspection, ordinals, and the RNG.

use rand::{Rng, SeedableRng};

use crate::{
    exception_public::CodeLoc,
    exception_private::{RunError, RunResult},
    eval::Interp,
    heap::HeapData,
    intern::StaticSymbols,
    io::PrintWriter,
    resource::ResourceTracker,
    value::Value,
};

use super::check_argc;

/// `Print` / `PrintLn`: the display form of each argument, then a newline
/// for `PrintLn`.
pub(super) fn print<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    args: Vec<Value>,
    newline: bool,
    pos: CodeLoc,
) -> RunResult<Value> {
    for arg in args {
        let text = interp.display(&arg);
        interp.discard(arg)?;
        interp
            .print
            .stdout_write(text.into())
            .map_err(|e| RunError::fatal(e.message().to_owned(), pos))?;
    }
    if newline {
        interp
            .print
            .stdout_push('\n')
            .map_err(|e| RunError::fatal(e.message().to_owned(), pos))?;
    }
    Ok(Value::Unassigned)
}

pub(super) fn assert<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 1, 2, "Assert", pos)?;
    let msg = if args.len() == 2 { args.pop() } else { None };
    let cond = args.pop().expect("checked arity");
    let ok = cond.is_truthy(&interp.heap);
    interp.discard(cond)?;
    let detail = match msg {
        Some(m) => {
            let text = interp.display(&m);
            interp.discard(m)?;
            format!(": {text}")
        }
        None => String::new(),
    };
    if ok {
        Ok(Value::Unassigned)
    } else {
        Err(interp.raise(StaticSymbols::EAssertionFailed, format!("Assertion failed{detail}"), pos))
    }
}

pub(super) fn assigned<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 1, 1, "Assigned", pos)?;
    let v = args.pop().expect("checked arity");
    let assigned = !matches!(v, Value::Nil { .. } | Value::Unassigned);
    interp.discard(v)?;
    Ok(Value::Bool(assigned))
}

/// `TypeOf(v)`: the RTTI descriptor of the value's runtime type. Two values
/// of the same runtime class yield the identical descriptor.
pub(super) fn type_of<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 1, 1, "TypeOf", pos)?;
    let v = args.pop().expect("checked arity");
    let typ = interp.infer_type_of(&v);
    interp.discard(v)?;
    Ok(Value::TypeInfo(typ))
}

pub(super) fn var_is_null<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 1, 1, "VarIsNull", pos)?;
    let v = args.pop().expect("checked arity");
    let is_null = matches!(v, Value::Unassigned);
    interp.discard(v)?;
    Ok(Value::Bool(is_null))
}

/// `VarType(v)`: the name of a Variant's actual type.
pub(super) fn var_type<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 1, 1, "VarType", pos)?;
    let v = args.pop().expect("checked arity");
    let name = match &v {
        Value::Unassigned => "Unassigned".to_owned(),
        Value::Nil { .. } => "Nil".to_owned(),
        other => {
            let typ = interp.infer_type_of(other);
            interp.typereg.type_name(typ, interp.interns, &interp.classes)
        }
    };
    interp.discard(v)?;
    let id = interp.alloc(HeapData::Str(name), pos)?;
    Ok(Value::Ref(id))
}

pub(super) fn ord<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 1, 1, "Ord", pos)?;
    let v = args.pop().expect("checked arity");
    let ordinal = match &v {
        Value::Enum { ordinal, .. } => Some(*ordinal),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Ref(id) => match interp.heap.get(*id) {
            HeapData::Str(s) if s.chars().count() == 1 => s.chars().next().map(|c| i64::from(u32::from(c))),
            _ => None,
        },
        other => other.as_int(),
    };
    let msg = format!("Ord is not applicable to {}", interp.describe(&v));
    interp.discard(v)?;
    match ordinal {
        Some(o) => Ok(Value::Int(o)),
        None => Err(interp.raise(StaticSymbols::EScriptError, msg, pos)),
    }
}

pub(super) fn chr<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 1, 1, "Chr", pos)?;
    let v = args.pop().expect("checked arity");
    let code = v.as_int();
    interp.discard(v)?;
    let c = code
        .and_then(|n| u32::try_from(n).ok())
        .and_then(char::from_u32)
        .ok_or_else(|| interp.raise(StaticSymbols::EConvertError, "Invalid character code", pos))?;
    let id = interp.alloc(HeapData::Str(c.to_string()), pos)?;
    Ok(Value::Ref(id))
}

/// `Succ` / `Pred` on ordinal values.
pub(super) fn succ_pred<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    delta: i64,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 1, 1, "Succ/Pred", pos)?;
    let v = args.pop().expect("checked arity");
    let result = match &v {
        Value::Enum { typ, ordinal } => Some(Value::Enum {
            typ: *typ,
            ordinal: ordinal + delta,
        }),
        other => other.as_int().map(|n| Value::Int(n + delta)),
    };
    let msg = format!("Succ/Pred is not applicable to {}", interp.describe(&v));
    interp.discard(v)?;
    result.ok_or_else(|| interp.raise(StaticSymbols::EScriptError, msg, pos))
}

pub(super) fn random<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 0, 0, "Random", pos)?;
    Ok(Value::Float(interp.rng.r#gen::<f64>()))
}

pub(super) fn random_int<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 1, 1, "RandomInt", pos)?;
    let v = args.pop().expect("checked arity");
    let n = v.as_int();
    interp.discard(v)?;
    match n {
        Some(n) if n > 0 => Ok(Value::Int(interp.rng.gen_range(0..n))),
        _ => Err(interp.raise(StaticSymbols::ERangeError, "RandomInt range must be positive", pos)),
    }
}

pub(super) fn random_seed<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 1, 1, "RandomSeed", pos)?;
    let v = args.pop().expect("checked arity");
    let n = v.as_int().unwrap_or(0);
    interp.discard(v)?;
    interp.rng = rand_chacha::ChaCha8Rng::seed_from_u64(n as u64);
    Ok(Value::Unassigned)
}
