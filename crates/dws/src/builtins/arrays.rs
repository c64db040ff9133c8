//! Array, set, and higher-order builtins.
//!
//! Dynamic arrays are reference-shared; the mutating builtins work in place
//! on the heap data. `Copy` performs the deep duplication that plain
//! assignment deliberately does not.

use crate::{
    exception_public::CodeLoc,
    exception_private::{RunError, RunResult},
    eval::{Interp, shallow},
    heap::{HeapData, HeapId},
    intern::StaticSymbols,
    io::PrintWriter,
    resource::ResourceTracker,
    typereg::{TypeId, TypeKind},
    types::ArrayObj,
    value::{Value, values_cmp, values_equal},
};

use super::check_argc;

fn as_array_id<T: ResourceTracker, P: PrintWriter>(interp: &Interp<'_, T, P>, v: &Value) -> Option<HeapId> {
    match v {
        Value::Ref(id) if matches!(interp.heap.get(*id), HeapData::Array(_)) => Some(*id),
        _ => None,
    }
}

pub(super) fn length<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 1, 1, "Length", pos)?;
    let v = args.pop().expect("checked arity");
    let len = match &v {
        Value::Ref(id) => match interp.heap.get(*id) {
            HeapData::Array(arr) => Some(arr.len() as i64),
            HeapData::Str(s) => Some(s.chars().count() as i64),
            HeapData::Set(set) => Some(set.len() as i64),
            _ => None,
        },
        _ => None,
    };
    let msg = format!("Length is not applicable to {}", interp.describe(&v));
    interp.discard(v)?;
    len.map(Value::Int)
        .ok_or_else(|| interp.raise(StaticSymbols::EScriptError, msg, pos))
}

pub(super) fn low<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 1, 1, "Low", pos)?;
    let v = args.pop().expect("checked arity");
    let result = match &v {
        Value::Ref(id) => match interp.heap.get(*id) {
            HeapData::Array(arr) => Some(Value::Int(arr.low())),
            HeapData::Str(_) => Some(Value::Int(1)),
            _ => None,
        },
        Value::TypeInfo(typ) => match interp.typereg.kind(*typ) {
            TypeKind::Enum(e) => e.values.first().map(|(_, o)| Value::Enum {
                typ: *typ,
                ordinal: *o,
            }),
            TypeKind::Subrange { lo, .. } => Some(Value::Int(*lo)),
            _ => None,
        },
        _ => None,
    };
    let msg = format!("Low is not applicable to {}", interp.describe(&v));
    interp.discard(v)?;
    result.ok_or_else(|| interp.raise(StaticSymbols::EScriptError, msg, pos))
}

pub(super) fn high<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 1, 1, "High", pos)?;
    let v = args.pop().expect("checked arity");
    let result = match &v {
        Value::Ref(id) => match interp.heap.get(*id) {
            HeapData::Array(arr) => Some(Value::Int(arr.high())),
            HeapData::Str(s) => Some(Value::Int(s.chars().count() as i64)),
            _ => None,
        },
        Value::TypeInfo(typ) => match interp.typereg.kind(*typ) {
            TypeKind::Enum(e) => e.values.last().map(|(_, o)| Value::Enum {
                typ: *typ,
                ordinal: *o,
            }),
            TypeKind::Subrange { hi, .. } => Some(Value::Int(*hi)),
            _ => None,
        },
        _ => None,
    };
    let msg = format!("High is not applicable to {}", interp.describe(&v));
    interp.discard(v)?;
    result.ok_or_else(|| interp.raise(StaticSymbols::EScriptError, msg, pos))
}

/// `SetLength(arr, n)`: zero-extends the tail on growth, truncates (and
/// releases) on shrink. Static arrays cannot be resized.
pub(super) fn set_length<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 2, 2, "SetLength", pos)?;
    let n = args.pop().expect("checked arity");
    let arrv = args.pop().expect("checked arity");
    let new_len = n.as_int();
    interp.discard(n)?;
    let Some(new_len) = new_len.and_then(|n| usize::try_from(n).ok()) else {
        interp.discard(arrv)?;
        return Err(interp.raise(StaticSymbols::ERangeError, "Invalid array length", pos));
    };
    let Some(id) = as_array_id(interp, &arrv) else {
        let msg = format!("SetLength is not applicable to {}", interp.describe(&arrv));
        interp.discard(arrv)?;
        return Err(interp.raise(StaticSymbols::EScriptError, msg, pos));
    };
    let (elem, is_static, current) = {
        let HeapData::Array(arr) = interp.heap.get(id) else {
            unreachable!()
        };
        (arr.elem, arr.is_static(), arr.len())
    };
    if is_static {
        interp.discard(arrv)?;
        return Err(interp.raise(StaticSymbols::EScriptError, "Cannot resize a static array", pos));
    }
    if new_len > current {
        for _ in current..new_len {
            let zero = interp
                .typereg
                .default_value(elem, &mut interp.heap)
                .map_err(|e| RunError::from_resource(e, pos))?;
            let HeapData::Array(arr) = interp.heap.get_mut(id) else {
                unreachable!()
            };
            arr.values.push(zero);
        }
    } else if new_len < current {
        let removed: Vec<Value> = {
            let HeapData::Array(arr) = interp.heap.get_mut(id) else {
                unreachable!()
            };
            arr.values.drain(new_len..).collect()
        };
        for v in removed {
            interp.release_owned_value(v)?;
        }
    }
    interp.discard(arrv)?;
    Ok(Value::Unassigned)
}

/// `Add(arr, v, ...)`: appends each value, coerced to the element type.
pub(super) fn add<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    if args.len() < 2 {
        for v in args {
            interp.discard(v)?;
        }
        return Err(RunError::fatal("Add expects an array and at least one value", pos));
    }
    let rest = args.split_off(1);
    let arrv = args.pop().expect("split left one");
    let Some(id) = as_array_id(interp, &arrv) else {
        let msg = format!("Add is not applicable to {}", interp.describe(&arrv));
        interp.discard(arrv)?;
        for v in rest {
            interp.discard(v)?;
        }
        return Err(interp.raise(StaticSymbols::EScriptError, msg, pos));
    };
    let (elem, is_static) = {
        let HeapData::Array(arr) = interp.heap.get(id) else {
            unreachable!()
        };
        (arr.elem, arr.is_static())
    };
    if is_static {
        interp.discard(arrv)?;
        for v in rest {
            interp.discard(v)?;
        }
        return Err(interp.raise(StaticSymbols::EScriptError, "Cannot grow a static array", pos));
    }
    for v in rest {
        let v = interp.coerce_value(v, elem, pos)?;
        let v = interp.retain_for_store(v);
        let HeapData::Array(arr) = interp.heap.get_mut(id) else {
            unreachable!()
        };
        arr.values.push(v);
    }
    interp.discard(arrv)?;
    Ok(Value::Unassigned)
}

/// `Delete(arr, index [, count])`.
pub(super) fn delete<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 2, 3, "Delete", pos)?;
    let count = if args.len() == 3 {
        let c = args.pop().expect("checked arity");
        let n = c.as_int();
        interp.discard(c)?;
        n.unwrap_or(1)
    } else {
        1
    };
    let index = args.pop().expect("checked arity");
    let arrv = args.pop().expect("checked arity");
    let i = index.as_int();
    interp.discard(index)?;
    let Some(id) = as_array_id(interp, &arrv) else {
        let msg = format!("Delete is not applicable to {}", interp.describe(&arrv));
        interp.discard(arrv)?;
        return Err(interp.raise(StaticSymbols::EScriptError, msg, pos));
    };
    let result = (|| {
        let HeapData::Array(arr) = interp.heap.get(id) else {
            unreachable!()
        };
        let Some(i) = i.and_then(|i| arr.offset_of(i)) else {
            return Err((i.unwrap_or(-1), arr.low(), arr.high()));
        };
        let count = usize::try_from(count.max(0)).expect("non-negative").min(arr.len() - i);
        Ok((i, count))
    })();
    match result {
        Ok((i, count)) => {
            let removed: Vec<Value> = {
                let HeapData::Array(arr) = interp.heap.get_mut(id) else {
                    unreachable!()
                };
                arr.values.drain(i..i + count).collect()
            };
            for v in removed {
                interp.release_owned_value(v)?;
            }
            interp.discard(arrv)?;
            Ok(Value::Unassigned)
        }
        Err((i, low, high)) => {
            interp.discard(arrv)?;
            Err(interp.raise(
                StaticSymbols::EIndexOutOfRange,
                format!("Array index {i} out of bounds [{low}..{high}]"),
                pos,
            ))
        }
    }
}

/// `Copy(arr)` deep-copies an array; `Copy(str, start, len)` takes a
/// 1-based substring.
pub(super) fn copy<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 1, 3, "Copy", pos)?;
    if args.len() == 1 {
        let v = args.pop().expect("checked arity");
        let result = deep_copy_value(interp, &v, pos);
        interp.discard(v)?;
        return result;
    }
    // Substring form.
    check_argc(&args, 3, 3, "Copy", pos)?;
    let lenv = args.pop().expect("checked arity");
    let startv = args.pop().expect("checked arity");
    let sv = args.pop().expect("checked arity");
    let len = lenv.as_int();
    let start = startv.as_int();
    interp.discard(lenv)?;
    interp.discard(startv)?;
    let text = match &sv {
        Value::Ref(id) => match interp.heap.get(*id) {
            HeapData::Str(s) => Some(s.clone()),
            _ => None,
        },
        _ => None,
    };
    interp.discard(sv)?;
    let (Some(text), Some(start), Some(len)) = (text, start, len) else {
        return Err(interp.raise(StaticSymbols::EScriptError, "Copy expects a string, start, and length", pos));
    };
    let skip = usize::try_from((start - 1).max(0)).expect("non-negative");
    let take = usize::try_from(len.max(0)).expect("non-negative");
    let out: String = text.chars().skip(skip).take(take).collect();
    let id = interp.alloc(HeapData::Str(out), pos)?;
    Ok(Value::Ref(id))
}

/// Recursive deep copy: arrays copy their elements (and nested arrays),
/// records copy their fields, everything else copies its reference.
pub(super) fn deep_copy_value<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    v: &Value,
    pos: CodeLoc,
) -> RunResult<Value> {
    match v {
        Value::Ref(id) => {
            let id = *id;
            match interp.heap.get(id) {
                HeapData::Array(arr) => {
                    let elem = arr.elem;
                    let bounds = arr.bounds;
                    let items: Vec<Value> = arr.values.iter().map(shallow).collect();
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        let copied = deep_copy_value(interp, &item, pos)?;
                        values.push(interp.retain_for_store(copied));
                    }
                    let copy = ArrayObj {
                        elem,
                        values,
                        bounds,
                    };
                    let cid = interp.alloc(HeapData::Array(copy), pos)?;
                    Ok(Value::Ref(cid))
                }
                HeapData::Record(rec) => {
                    let typ = rec.typ;
                    interp.copy_record(id, typ, pos)
                }
                HeapData::Set(set) => {
                    let copy = set.clone();
                    let cid = interp.alloc(HeapData::Set(copy), pos)?;
                    Ok(Value::Ref(cid))
                }
                _ => Ok(interp.recount(shallow(v))),
            }
        }
        _ => Ok(interp.recount(shallow(v))),
    }
}

/// `IndexOf(arr, v [, start])`: first matching index or -1.
pub(super) fn index_of<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 2, 3, "IndexOf", pos)?;
    let start = if args.len() == 3 {
        let s = args.pop().expect("checked arity");
        let n = s.as_int();
        interp.discard(s)?;
        n.unwrap_or(0)
    } else {
        0
    };
    let needle = args.pop().expect("checked arity");
    let arrv = args.pop().expect("checked arity");
    let Some(id) = as_array_id(interp, &arrv) else {
        let msg = format!("IndexOf is not applicable to {}", interp.describe(&arrv));
        interp.discard(arrv)?;
        interp.discard(needle)?;
        return Err(interp.raise(StaticSymbols::EScriptError, msg, pos));
    };
    let found = {
        let HeapData::Array(arr) = interp.heap.get(id) else {
            unreachable!()
        };
        let low = arr.low();
        let begin = usize::try_from((start - low).max(0)).expect("non-negative");
        let mut found = -1i64;
        for (offset, item) in arr.values.iter().enumerate().skip(begin) {
            if values_equal(&needle, item, &interp.heap) == Some(true) {
                found = low + offset as i64;
                break;
            }
        }
        found
    };
    interp.discard(needle)?;
    interp.discard(arrv)?;
    Ok(Value::Int(found))
}

pub(super) fn contains<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    let index = index_of(interp, args, pos)?;
    let found = index.as_int().unwrap_or(-1) >= 0;
    Ok(Value::Bool(found))
}

pub(super) fn reverse<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 1, 1, "Reverse", pos)?;
    let arrv = args.pop().expect("checked arity");
    let Some(id) = as_array_id(interp, &arrv) else {
        let msg = format!("Reverse is not applicable to {}", interp.describe(&arrv));
        interp.discard(arrv)?;
        return Err(interp.raise(StaticSymbols::EScriptError, msg, pos));
    };
    let HeapData::Array(arr) = interp.heap.get_mut(id) else {
        unreachable!()
    };
    arr.values.reverse();
    interp.discard(arrv)?;
    Ok(Value::Unassigned)
}

/// `Sort(arr [, comparator])`: in-place. The comparator takes two elements
/// and returns an integer; negative means first-before-second, zero equal.
pub(super) fn sort<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 1, 2, "Sort", pos)?;
    let cmp = if args.len() == 2 { args.pop() } else { None };
    let arrv = args.pop().expect("checked arity");
    let Some(id) = as_array_id(interp, &arrv) else {
        let msg = format!("Sort is not applicable to {}", interp.describe(&arrv));
        interp.discard(arrv)?;
        if let Some(c) = cmp {
            interp.discard(c)?;
        }
        return Err(interp.raise(StaticSymbols::EScriptError, msg, pos));
    };
    let len = {
        let HeapData::Array(arr) = interp.heap.get(id) else {
            unreachable!()
        };
        arr.len()
    };
    // Insertion sort driven by the (possibly script-level) comparator; swaps
    // happen directly in the heap data.
    for i in 1..len {
        let mut j = i;
        while j > 0 {
            let ordered = {
                let HeapData::Array(arr) = interp.heap.get(id) else {
                    unreachable!()
                };
                let a = shallow(&arr.values[j - 1]);
                let b = shallow(&arr.values[j]);
                match &cmp {
                    None => values_cmp(&a, &b, &interp.heap).is_none_or(|o| o.is_le()),
                    Some(c) => {
                        let a = interp.recount(a);
                        let b = interp.recount(b);
                        let cmpv = interp.call_callable(&shallow(c), vec![a, b], pos)?;
                        let n = cmpv.as_int().unwrap_or(0);
                        interp.discard(cmpv)?;
                        n <= 0
                    }
                }
            };
            if ordered {
                break;
            }
            let HeapData::Array(arr) = interp.heap.get_mut(id) else {
                unreachable!()
            };
            arr.values.swap(j - 1, j);
            j -= 1;
        }
    }
    if let Some(c) = cmp {
        interp.discard(c)?;
    }
    interp.discard(arrv)?;
    Ok(Value::Unassigned)
}

/// `Map(arr, f)`: a new array of the callback results.
pub(super) fn map<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 2, 2, "Map", pos)?;
    let f = args.pop().expect("checked arity");
    let arrv = args.pop().expect("checked arity");
    let Some(id) = as_array_id(interp, &arrv) else {
        let msg = format!("Map is not applicable to {}", interp.describe(&arrv));
        interp.discard(arrv)?;
        interp.discard(f)?;
        return Err(interp.raise(StaticSymbols::EScriptError, msg, pos));
    };
    let len = {
        let HeapData::Array(arr) = interp.heap.get(id) else {
            unreachable!()
        };
        arr.len()
    };
    let mut results = Vec::with_capacity(len);
    for offset in 0..len {
        let item = {
            let HeapData::Array(arr) = interp.heap.get(id) else {
                unreachable!()
            };
            if offset >= arr.len() {
                break;
            }
            shallow(&arr.values[offset])
        };
        let item = interp.recount(item);
        let mapped = interp.call_callable(&shallow(&f), vec![item], pos)?;
        results.push(interp.retain_for_store(mapped));
    }
    interp.discard(f)?;
    interp.discard(arrv)?;
    let out = interp.alloc(HeapData::Array(ArrayObj::dynamic(TypeId::VARIANT, results)), pos)?;
    Ok(Value::Ref(out))
}

/// `Filter(arr, pred)`: a new array of the elements the predicate accepts.
pub(super) fn filter<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 2, 2, "Filter", pos)?;
    let f = args.pop().expect("checked arity");
    let arrv = args.pop().expect("checked arity");
    let Some(id) = as_array_id(interp, &arrv) else {
        let msg = format!("Filter is not applicable to {}", interp.describe(&arrv));
        interp.discard(arrv)?;
        interp.discard(f)?;
        return Err(interp.raise(StaticSymbols::EScriptError, msg, pos));
    };
    let (elem, len) = {
        let HeapData::Array(arr) = interp.heap.get(id) else {
            unreachable!()
        };
        (arr.elem, arr.len())
    };
    let mut kept = Vec::new();
    for offset in 0..len {
        let item = {
            let HeapData::Array(arr) = interp.heap.get(id) else {
                unreachable!()
            };
            if offset >= arr.len() {
                break;
            }
            shallow(&arr.values[offset])
        };
        let probe = interp.recount(shallow(&item));
        let verdict = interp.call_callable(&shallow(&f), vec![probe], pos)?;
        let keep = verdict.is_truthy(&interp.heap);
        interp.discard(verdict)?;
        if keep {
            let copy = interp.recount(item);
            kept.push(interp.retain_for_store(copy));
        }
    }
    interp.discard(f)?;
    interp.discard(arrv)?;
    let out = interp.alloc(HeapData::Array(ArrayObj::dynamic(elem, kept)), pos)?;
    Ok(Value::Ref(out))
}

/// `Reduce(arr, f, init)`: left fold.
pub(super) fn reduce<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 3, 3, "Reduce", pos)?;
    let init = args.pop().expect("checked arity");
    let f = args.pop().expect("checked arity");
    let arrv = args.pop().expect("checked arity");
    let Some(id) = as_array_id(interp, &arrv) else {
        let msg = format!("Reduce is not applicable to {}", interp.describe(&arrv));
        interp.discard(arrv)?;
        interp.discard(f)?;
        interp.discard(init)?;
        return Err(interp.raise(StaticSymbols::EScriptError, msg, pos));
    };
    let len = {
        let HeapData::Array(arr) = interp.heap.get(id) else {
            unreachable!()
        };
        arr.len()
    };
    let mut acc = init;
    for offset in 0..len {
        let item = {
            let HeapData::Array(arr) = interp.heap.get(id) else {
                unreachable!()
            };
            if offset >= arr.len() {
                break;
            }
            shallow(&arr.values[offset])
        };
        let item = interp.recount(item);
        acc = interp.call_callable(&shallow(&f), vec![acc, item], pos)?;
    }
    interp.discard(f)?;
    interp.discard(arrv)?;
    Ok(acc)
}

/// `ForEach(arr, f)`.
pub(super) fn for_each<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 2, 2, "ForEach", pos)?;
    let f = args.pop().expect("checked arity");
    let arrv = args.pop().expect("checked arity");
    let Some(id) = as_array_id(interp, &arrv) else {
        let msg = format!("ForEach is not applicable to {}", interp.describe(&arrv));
        interp.discard(arrv)?;
        interp.discard(f)?;
        return Err(interp.raise(StaticSymbols::EScriptError, msg, pos));
    };
    let mut offset = 0usize;
    loop {
        let item = {
            let HeapData::Array(arr) = interp.heap.get(id) else {
                unreachable!()
            };
            if offset >= arr.len() {
                break;
            }
            shallow(&arr.values[offset])
        };
        let item = interp.recount(item);
        let result = interp.call_callable(&shallow(&f), vec![item], pos)?;
        interp.discard(result)?;
        offset += 1;
    }
    interp.discard(f)?;
    interp.discard(arrv)?;
    Ok(Value::Unassigned)
}

/// `Include(set, e)` / `Exclude(set, e)` mutate the set in place.
pub(super) fn include_exclude<T: ResourceTracker, P: PrintWriter>(
    interp: &mut Interp<'_, T, P>,
    mut args: Vec<Value>,
    include: bool,
    pos: CodeLoc,
) -> RunResult<Value> {
    check_argc(&args, 2, 2, "Include/Exclude", pos)?;
    let elemv = args.pop().expect("checked arity");
    let setv = args.pop().expect("checked arity");
    let ordinal = match &elemv {
        Value::Enum { ordinal, .. } => Some(*ordinal),
        other => other.as_int(),
    };
    interp.discard(elemv)?;
    let result = match (&setv, ordinal) {
        (Value::Ref(id), Some(o)) if matches!(interp.heap.get(*id), HeapData::Set(_)) => {
            let HeapData::Set(set) = interp.heap.get_mut(*id) else {
                unreachable!()
            };
            if include {
                set.insert(o);
            } else {
                set.remove(o);
            }
            Ok(Value::Unassigned)
        }
        _ => {
            let msg = format!("Include/Exclude is not applicable to {}", interp.describe(&setv));
            Err(interp.raise(StaticSymbols::EScriptError, msg, pos))
        }
    };
    interp.discard(setv)?;
    result
}
