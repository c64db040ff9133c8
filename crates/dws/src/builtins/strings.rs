//! String builtins and string/number conversion.

use crate::{
    exception_public::CodeLoc,
    exception_private::RunResult,
    eval::Interp,
    heap::HeapData,
    intern::StaticSymbols,
    io::PrintWriter,
    resource::ResourceTracker,
    value::{Value, format_float},
};

use super::{Builtin, check_argc};

fn take_string<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    v: Value,
    name: &str,
    pos: CodeLoc,
) -> RunResult<String> {
    let text = match &v {
        Value::Ref(id) => match interp.heap.get(*id) {
            HeapData::Str(s) => Some(s.clone()),
            _ => None,
        },
        Value::Unassigned => Some(String::new()),
        _ => None,
    };
    let msg = format!("{name} expects a string, got {}", interp.describe(&v));
    interp.discard(v)?;
    text.ok_or_else(|| interp.raise(StaticSymbols::EScriptError, msg, pos))
}

/// `UpperCase` / `LowerCase` / `Trim`.
pub(super) fn transform<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    builtin: Builtin,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 1, 1, "string transform", pos)?;
    let v = args.pop().expect("checked arity");
    let text = take_string(interp, v, "string transform", pos)?;
    let out = match builtin {
        Builtin::UpperCase => text.to_uppercase(),
        Builtin::LowerCase => text.to_lowercase(),
        _ => text.trim().to_owned(),
    };
    let id = interp.alloc(HeapData::Str(out), pos)?;
    Ok(Value::Ref(id))
}

/// `Pos(sub, s)`: 1-based position of the first occurrence, 0 when absent.
pub(super) fn pos<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 2, 2, "Pos", pos)?;
    let hay = args.pop().expect("checked arity");
    let needle = args.pop().expect("checked arity");
    let needle = take_string(interp, needle, "Pos", pos)?;
    let hay = take_string(interp, hay, "Pos", pos)?;
    if needle.is_empty() {
        return Ok(Value::Int(0));
    }
    let found = match hay.find(&needle) {
        // Byte offset converts to a 1-based character position.
        Some(byte_offset) => hay[..byte_offset].chars().count() as i64 + 1,
        None => 0,
    };
    Ok(Value::Int(found))
}

/// `StringReplace(s, old, new)`: replaces every occurrence.
pub(super) fn string_replace<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 3, 3, "StringReplace", pos)?;
    let new = args.pop().expect("checked arity");
    let old = args.pop().expect("checked arity");
    let s = args.pop().expect("checked arity");
    let s = take_string(interp, s, "StringReplace", pos)?;
    let old = take_string(interp, old, "StringReplace", pos)?;
    let new = take_string(interp, new, "StringReplace", pos)?;
    let out = if old.is_empty() { s } else { s.replace(&old, &new) };
    let id = interp.alloc(HeapData::Str(out), pos)?;
    Ok(Value::Ref(id))
}

pub(super) fn string_of_char<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 2, 2, "StringOfChar", pos)?;
    let countv = args.pop().expect("checked arity");
    let chv = args.pop().expect("checked arity");
    let count = countv.as_int();
    interp.discard(countv)?;
    let ch = take_string(interp, chv, "StringOfChar", pos)?;
    let Some(count) = count.and_then(|n| usize::try_from(n).ok()) else {
        return Err(interp.raise(StaticSymbols::ERangeError, "Invalid repeat count", pos));
    };
    let Some(c) = ch.chars().next() else {
        return Err(interp.raise(StaticSymbols::EScriptError, "StringOfChar expects a character", pos));
    };
    let out: String = std::iter::repeat_n(c, count).collect();
    let id = interp.alloc(HeapData::Str(out), pos)?;
    Ok(Value::Ref(id))
}

pub(super) fn int_to_str<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 1, 1, "IntToStr", pos)?;
    let v = args.pop().expect("checked arity");
    let n = v.as_int();
    let msg = format!("IntToStr expects an integer, got {}", interp.describe(&v));
    interp.discard(v)?;
    let Some(n) = n else {
        return Err(interp.raise(StaticSymbols::EConvertError, msg, pos));
    };
    let id = interp.alloc(HeapData::Str(n.to_string()), pos)?;
    Ok(Value::Ref(id))
}

pub(super) fn str_to_int<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 1, 1, "StrToInt", pos)?;
    let v = args.pop().expect("checked arity");
    let text = take_string(interp, v, "StrToInt", pos)?;
    match text.trim().parse::<i64>() {
        Ok(n) => Ok(Value::Int(n)),
        Err(_) => Err(interp.raise(
            StaticSymbols::EConvertError,
            format!("'{text}' is not a valid integer value"),
            pos,
        )),
    }
}

pub(super) fn float_to_str<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 1, 1, "FloatToStr", pos)?;
    let v = args.pop().expect("checked arity");
    let n = v.as_number();
    let msg = format!("FloatToStr expects a number, got {}", interp.describe(&v));
    interp.discard(v)?;
    let Some(n) = n else {
        return Err(interp.raise(StaticSymbols::EConvertError, msg, pos));
    };
    let id = interp.alloc(HeapData::Str(format_float(n.as_f64())), pos)?;
    Ok(Value::Ref(id))
}

pub(super) fn str_to_float<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 1, 1, "StrToFloat", pos)?;
    let v = args.pop().expect("checked arity");
    let text = take_string(interp, v, "StrToFloat", pos)?;
    match text.trim().parse::<f64>() {
        Ok(n) => Ok(Value::Float(n)),
        Err(_) => Err(interp.raise(
            StaticSymbols::EConvertError,
            format!("'{text}' is not a valid floating point value"),
            pos,
        )),
    }
}

pub(super) fn bool_to_str<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 1, 1, "BoolToStr", pos)?;
    let v = args.pop().expect("checked arity");
    let b = v.as_bool();
    let msg = format!("BoolToStr expects a boolean, got {}", interp.describe(&v));
    interp.discard(v)?;
    let Some(b) = b else {
        return Err(interp.raise(StaticSymbols::EConvertError, msg, pos));
    };
    let id = interp.alloc(HeapData::Str(if b { "True" } else { "False" }.to_owned()), pos)?;
    Ok(Value::Ref(id))
}

/// `Format(fmt, [args])`: a minimal `%` formatter supporting `%s`, `%d`,
/// `%x`, `%f` (with optional precision), `%g`, and `%%`.
pub(super) fn format<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 2, 2, "Format", pos)?;
    let list = args.pop().expect("checked arity");
    let fmtv = args.pop().expect("checked arity");
    let fmt = take_string(interp, fmtv, "Format", pos)?;
    let items: Vec<Value> = match &list {
        Value::Ref(id) => match interp.heap.get(*id) {
            HeapData::Array(arr) => arr.values.iter().map(crate::eval::shallow).collect(),
            _ => {
                let msg = format!("Format expects an array of arguments, got {}", interp.describe(&list));
                interp.discard(list)?;
                return Err(interp.raise(StaticSymbols::EScriptError, msg, pos));
            }
        },
        _ => {
            let msg = format!("Format expects an array of arguments, got {}", interp.describe(&list));
            interp.discard(list)?;
            return Err(interp.raise(StaticSymbols::EScriptError, msg, pos));
        }
    };
    let mut out = String::with_capacity(fmt.len());
    let mut chars = fmt.chars().peekable();
    let mut next_arg = 0usize;
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }
        // Optional `.N` precision for %f.
        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while chars.peek().is_some_and(char::is_ascii_digit) {
                digits.push(chars.next().expect("peeked"));
            }
            precision = digits.parse::<usize>().ok();
        }
        let Some(spec) = chars.next() else {
            interp.discard(list)?;
            return Err(interp.raise(StaticSymbols::EConvertError, "Malformed format string", pos));
        };
        let Some(arg) = items.get(next_arg) else {
            interp.discard(list)?;
            return Err(interp.raise(StaticSymbols::EConvertError, "Not enough format arguments", pos));
        };
        next_arg += 1;
        match spec.to_ascii_lowercase() {
            'd' => match arg.as_int() {
                Some(n) => out.push_str(&n.to_string()),
                None => out.push_str(&interp.display(arg)),
            },
            'x' => match arg.as_int() {
                Some(n) => out.push_str(&std::format!("{n:x}")),
                None => out.push_str(&interp.display(arg)),
            },
            'f' => match arg.as_number() {
                Some(n) => {
                    let digits = precision.unwrap_or(2);
                    out.push_str(&std::format!("{:.*}", digits, n.as_f64()));
                }
                None => out.push_str(&interp.display(arg)),
            },
            'g' => match arg.as_number() {
                Some(n) => out.push_str(&format_float(n.as_f64())),
                None => out.push_str(&interp.display(arg)),
            },
            's' => out.push_str(&interp.display(arg)),
            other => {
                interp.discard(list)?;
                return Err(interp.raise(
                    StaticSymbols::EConvertError,
                    std::format!("Unknown format specifier '%{other}'"),
                    pos,
                ));
            }
        }
    }
    interp.discard(list)?;
    let id = interp.alloc(HeapData::Str(out), pos)?;
    Ok(Value::Ref(id))
}
