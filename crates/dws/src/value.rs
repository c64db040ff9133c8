//! The runtime value model.
//!
//! `Value` is a tagged union with immediate variants stored inline and
//! compound data referenced through the heap arena. `Clone` is intentionally
//! not derived: duplication goes through the evaluator's counted-copy helper
//! and values are given up via [`Value::drop_with_heap`] /
//! [`Value::release_with_heap`], so reference counts stay correct on every
//! path.
//!
//! A Variant-typed location stores its inner value directly; `Unassigned`
//! marks a Variant that was never assigned and compares equal to `0`, `''`,
//! and `False`.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::{
    class::{ClassId, InterfaceId},
    heap::{Heap, HeapData, HeapId, ReleaseQueue},
    resource::ResourceTracker,
    typereg::TypeId,
};

/// A runtime value.
///
/// NOTE: keep this small; it is copied constantly.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum Value {
    /// Uninitialised Variant.
    Unassigned,
    /// `nil`; the class hint enables class-member access on typed-nil
    /// receivers.
    Nil { class: Option<ClassId> },
    Int(i64),
    Float(f64),
    Bool(bool),
    /// An enum value: its type and ordinal.
    Enum { typ: TypeId, ordinal: i64 },
    /// A bounded integer; the bounds live on the type.
    Subrange { typ: TypeId, value: i64 },
    /// A metaclass value (`TFoo` used as a value).
    ClassRef(ClassId),
    /// An interface wrapper holding a counted reference to its object.
    Interface { iface: InterfaceId, obj: HeapId },
    /// RTTI descriptor; equality is identity of the descriptor.
    TypeInfo(TypeId),
    /// Heap-allocated data: string, array, set, record, object, function
    /// pointer.
    Ref(HeapId),
}

impl Value {
    /// The heap id this value references, if any (including the object inside
    /// an interface wrapper).
    pub fn ref_id(&self) -> Option<HeapId> {
        match self {
            Self::Ref(id) => Some(*id),
            Self::Interface { obj, .. } => Some(*obj),
            _ => None,
        }
    }

    /// Copies an immediate value; panics on heap references.
    ///
    /// Use for values statically known not to touch the heap.
    pub fn clone_immediate(&self) -> Self {
        match self {
            Self::Unassigned => Self::Unassigned,
            Self::Nil { class } => Self::Nil { class: *class },
            Self::Int(v) => Self::Int(*v),
            Self::Float(v) => Self::Float(*v),
            Self::Bool(v) => Self::Bool(*v),
            Self::Enum { typ, ordinal } => Self::Enum {
                typ: *typ,
                ordinal: *ordinal,
            },
            Self::Subrange { typ, value } => Self::Subrange {
                typ: *typ,
                value: *value,
            },
            Self::ClassRef(c) => Self::ClassRef(*c),
            Self::TypeInfo(t) => Self::TypeInfo(*t),
            Self::Interface { .. } | Self::Ref(_) => {
                panic!("clone_immediate on heap value; use a counted copy")
            }
        }
    }

    /// Drops a *temporary* value.
    ///
    /// Plain object references are uncounted in temporaries, so they are a
    /// no-op here; interface wrappers release their object reference into
    /// `queue` for the evaluator to process (the release may run a
    /// destructor).
    pub fn drop_with_heap(self, heap: &mut Heap<impl ResourceTracker>, queue: &mut ReleaseQueue) {
        match self {
            Self::Ref(id) => {
                if !heap.is_object(id) {
                    heap.dec_ref(id, queue);
                }
            }
            Self::Interface { obj, .. } => queue.objects.push(obj),
            _ => {}
        }
    }

    /// Releases an *owned* value (a binding, field, or element slot that was
    /// stored through the assignment protocol). Unlike [`Self::drop_with_heap`],
    /// object references count here.
    pub fn release_with_heap(self, heap: &mut Heap<impl ResourceTracker>, queue: &mut ReleaseQueue) {
        match self {
            Self::Ref(id) => {
                if heap.is_object(id) {
                    queue.objects.push(id);
                } else {
                    heap.dec_ref(id, queue);
                }
            }
            Self::Interface { obj, .. } => queue.objects.push(obj),
            _ => {}
        }
    }

    /// Truthiness for `??` and condition contexts that accept non-booleans:
    /// non-zero numbers, non-empty strings, `True`, non-nil references, and
    /// non-empty arrays/sets are truthy.
    pub fn is_truthy(&self, heap: &Heap<impl ResourceTracker>) -> bool {
        match self {
            Self::Unassigned | Self::Nil { .. } => false,
            Self::Int(v) => *v != 0,
            Self::Float(v) => *v != 0.0,
            Self::Bool(v) => *v,
            Self::Enum { .. } | Self::ClassRef(_) | Self::TypeInfo(_) => true,
            Self::Subrange { value, .. } => *value != 0,
            Self::Interface { .. } => true,
            Self::Ref(id) => match heap.get(*id) {
                HeapData::Str(s) => !s.is_empty(),
                HeapData::Array(arr) => arr.len() != 0,
                HeapData::Set(set) => !set.is_empty(),
                HeapData::Record(_) | HeapData::Object(_) | HeapData::FuncPtr(_) => true,
            },
        }
    }

    /// The numeric view of this value, unwrapping subranges, for arithmetic
    /// promotion. Booleans are not numbers.
    pub fn as_number(&self) -> Option<Number> {
        match self {
            Self::Int(v) => Some(Number::Int(*v)),
            Self::Float(v) => Some(Number::Float(*v)),
            Self::Subrange { value, .. } => Some(Number::Int(*value)),
            Self::Unassigned => Some(Number::Int(0)),
            _ => None,
        }
    }

    /// The integer view, unwrapping subranges. `Unassigned` reads as 0.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Subrange { value, .. } => Some(*value),
            Self::Unassigned => Some(0),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            Self::Unassigned => Some(false),
            _ => None,
        }
    }
}

/// A number after promotion: either integer or float.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
        }
    }
}

/// Structural equality between runtime values.
///
/// Returns `None` when the operands belong to different semantic categories
/// (the caller reports a type error). Numeric comparison promotes, strings
/// compare lexicographically, sets by contents, records structurally,
/// objects/interfaces/metaclasses/RTTI by identity. `Unassigned` equals `0`,
/// `''`, and `False`.
pub(crate) fn values_equal(a: &Value, b: &Value, heap: &Heap<impl ResourceTracker>) -> Option<bool> {
    // Identity fast path also covers object and record self-comparison.
    if let (Value::Ref(id1), Value::Ref(id2)) = (a, b)
        && id1 == id2
    {
        return Some(true);
    }
    match (a, b) {
        (Value::Bool(_) | Value::Unassigned, Value::Bool(_) | Value::Unassigned)
            if a.as_bool().is_some() && b.as_bool().is_some() =>
        {
            Some(a.as_bool() == b.as_bool())
        }
        (Value::Nil { .. }, Value::Nil { .. }) => Some(true),
        (Value::Nil { .. }, Value::Ref(id)) | (Value::Ref(id), Value::Nil { .. })
            if matches!(heap.get(*id), HeapData::Object(_) | HeapData::FuncPtr(_)) =>
        {
            Some(false)
        }
        (Value::Nil { .. }, Value::Interface { .. }) | (Value::Interface { .. }, Value::Nil { .. }) => Some(false),
        (Value::Nil { .. }, Value::ClassRef(_)) | (Value::ClassRef(_), Value::Nil { .. }) => Some(false),
        (Value::Enum { typ: t1, ordinal: o1 }, Value::Enum { typ: t2, ordinal: o2 }) => {
            if t1 == t2 {
                Some(o1 == o2)
            } else {
                None
            }
        }
        (Value::ClassRef(c1), Value::ClassRef(c2)) => Some(c1 == c2),
        (Value::TypeInfo(t1), Value::TypeInfo(t2)) => Some(t1 == t2),
        (Value::Interface { obj: o1, .. }, Value::Interface { obj: o2, .. }) => Some(o1 == o2),
        (Value::Interface { obj, .. }, Value::Ref(id)) | (Value::Ref(id), Value::Interface { obj, .. })
            if matches!(heap.get(*id), HeapData::Object(_)) =>
        {
            Some(obj == id)
        }
        (Value::Ref(id1), Value::Ref(id2)) => match (heap.get(*id1), heap.get(*id2)) {
            (HeapData::Str(s1), HeapData::Str(s2)) => Some(s1 == s2),
            (HeapData::Set(s1), HeapData::Set(s2)) => Some(s1.set_eq(s2)),
            (HeapData::Array(a1), HeapData::Array(a2)) => {
                if a1.len() != a2.len() {
                    return Some(false);
                }
                for (v1, v2) in a1.values.iter().zip(&a2.values) {
                    match values_equal(v1, v2, heap) {
                        Some(true) => {}
                        Some(false) => return Some(false),
                        None => return None,
                    }
                }
                Some(true)
            }
            (HeapData::Record(r1), HeapData::Record(r2)) => {
                if r1.fields.len() != r2.fields.len() {
                    return Some(false);
                }
                for (name, v1) in &r1.fields {
                    let Some(v2) = r2.fields.get(name) else {
                        return Some(false);
                    };
                    match values_equal(v1, v2, heap) {
                        Some(true) => {}
                        Some(false) => return Some(false),
                        None => return None,
                    }
                }
                Some(true)
            }
            (HeapData::Object(_), HeapData::Object(_)) | (HeapData::FuncPtr(_), HeapData::FuncPtr(_)) => {
                Some(id1 == id2)
            }
            _ => None,
        },
        // Unassigned equals the empty string.
        (Value::Unassigned, Value::Ref(id)) | (Value::Ref(id), Value::Unassigned) => match heap.get(*id) {
            HeapData::Str(s) => Some(s.is_empty()),
            _ => None,
        },
        _ => {
            // Numeric comparison with promotion (covers Int, Float, Subrange,
            // and Unassigned-as-zero).
            match (a.as_number(), b.as_number()) {
                (Some(n1), Some(n2)) => Some(match (n1, n2) {
                    (Number::Int(i1), Number::Int(i2)) => i1 == i2,
                    _ => n1.as_f64() == n2.as_f64(),
                }),
                _ => None,
            }
        }
    }
}

/// Ordering between runtime values for `<`, `<=`, `>`, `>=`.
///
/// Legal for numbers (with promotion), strings, enums of the same type, and
/// subranges; `None` otherwise.
pub(crate) fn values_cmp(a: &Value, b: &Value, heap: &Heap<impl ResourceTracker>) -> Option<Ordering> {
    if let (Some(n1), Some(n2)) = (a.as_number(), b.as_number()) {
        return match (n1, n2) {
            (Number::Int(i1), Number::Int(i2)) => Some(i1.cmp(&i2)),
            _ => n1.as_f64().partial_cmp(&n2.as_f64()),
        };
    }
    match (a, b) {
        (Value::Ref(id1), Value::Ref(id2)) => match (heap.get(*id1), heap.get(*id2)) {
            (HeapData::Str(s1), HeapData::Str(s2)) => Some(s1.cmp(s2)),
            _ => None,
        },
        (Value::Enum { typ: t1, ordinal: o1 }, Value::Enum { typ: t2, ordinal: o2 }) if t1 == t2 => Some(o1.cmp(o2)),
        (Value::Bool(b1), Value::Bool(b2)) => Some(b1.cmp(b2)),
        _ => None,
    }
}

/// Formats a float the way the language displays it: integral values drop
/// the fraction, everything else uses the shortest round-trip form.
pub(crate) fn format_float(v: f64) -> String {
    if v.is_nan() {
        return "NAN".to_owned();
    }
    if v.is_infinite() {
        return if v > 0.0 { "INF".to_owned() } else { "-INF".to_owned() };
    }
    if v == v.trunc() && v.abs() < 1e15 {
        // Integral values print without a fractional part.
        return format!("{}", v as i64);
    }
    let mut buffer = ryu::Buffer::new();
    buffer.format(v).to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NoLimitTracker;

    #[test]
    fn unassigned_equals_zero_empty_false() {
        let mut heap: Heap<NoLimitTracker> = Heap::new(NoLimitTracker::new());
        assert_eq!(values_equal(&Value::Unassigned, &Value::Int(0), &heap), Some(true));
        assert_eq!(values_equal(&Value::Unassigned, &Value::Bool(false), &heap), Some(true));
        let s = heap.allocate(HeapData::Str(String::new())).unwrap();
        assert_eq!(values_equal(&Value::Unassigned, &Value::Ref(s), &heap), Some(true));
        assert_eq!(values_equal(&Value::Unassigned, &Value::Int(1), &heap), Some(false));
    }

    #[test]
    fn numeric_promotion_in_equality() {
        let heap: Heap<NoLimitTracker> = Heap::new(NoLimitTracker::new());
        assert_eq!(values_equal(&Value::Int(2), &Value::Float(2.0), &heap), Some(true));
        assert_eq!(values_cmp(&Value::Int(1), &Value::Float(1.5), &heap), Some(Ordering::Less));
    }

    #[test]
    fn float_formatting() {
        assert_eq!(format_float(2.0), "2");
        assert_eq!(format_float(1.5), "1.5");
        assert_eq!(format_float(-0.25), "-0.25");
    }
}
