//! The public value-exchange type.
//!
//! `Object` is the host-facing form of a script value: it owns all its data
//! and needs no heap to inspect. Values flow out of the interpreter as
//! `Object` (program results, external-variable writes) and in as `Object`
//! (external-variable reads).

use serde::{Deserialize, Serialize};

use crate::{
    exception_public::CodeLoc,
    exception_private::{RunError, RunResult},
    eval::Interp,
    heap::HeapData,
    io::PrintWriter,
    resource::ResourceTracker,
    typereg::{TypeId, TypeKind},
    types::ArrayObj,
    value::Value,
};

/// A script value that can cross the host boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Object {
    /// `nil` (and the result of programs that produce no value).
    Nil,
    /// An uninitialised Variant.
    Unassigned,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Array contents in element order.
    Array(Vec<Object>),
    /// Record fields in declaration order.
    Record(Vec<(String, Object)>),
    /// Set members as enum value names (or ordinal strings).
    Set(Vec<String>),
    /// An enum value with its type and value names.
    Enum {
        type_name: String,
        value_name: String,
        ordinal: i64,
    },
    /// Fallback for values with no direct mapping (objects, function
    /// pointers, class references); holds the display form.
    Repr(String),
}

impl TryFrom<&Object> for i64 {
    type Error = String;

    fn try_from(obj: &Object) -> Result<i64, String> {
        match obj {
            Object::Int(v) => Ok(*v),
            other => Err(format!("expected Int, got {other:?}")),
        }
    }
}

impl TryFrom<&Object> for f64 {
    type Error = String;

    fn try_from(obj: &Object) -> Result<f64, String> {
        match obj {
            Object::Float(v) => Ok(*v),
            Object::Int(v) => Ok(*v as f64),
            other => Err(format!("expected Float, got {other:?}")),
        }
    }
}

impl TryFrom<&Object> for String {
    type Error = String;

    fn try_from(obj: &Object) -> Result<String, String> {
        match obj {
            Object::String(v) => Ok(v.clone()),
            other => Err(format!("expected String, got {other:?}")),
        }
    }
}

impl TryFrom<&Object> for bool {
    type Error = String;

    fn try_from(obj: &Object) -> Result<bool, String> {
        match obj {
            Object::Bool(v) => Ok(*v),
            other => Err(format!("expected Bool, got {other:?}")),
        }
    }
}

impl<'a, T: ResourceTracker, P: PrintWriter> Interp<'a, T, P> {
    /// Converts a runtime value into its host-facing form.
    pub fn object_from_value(&self, value: &Value) -> Object {
        match value {
            Value::Unassigned => Object::Unassigned,
            Value::Nil { .. } => Object::Nil,
            Value::Int(v) => Object::Int(*v),
            Value::Float(v) => Object::Float(*v),
            Value::Bool(v) => Object::Bool(*v),
            Value::Subrange { value, .. } => Object::Int(*value),
            Value::Enum { typ, ordinal } => match self.typereg.kind(*typ) {
                TypeKind::Enum(e) => Object::Enum {
                    type_name: self.interns.get(e.name).to_owned(),
                    value_name: e
                        .name_of(*ordinal)
                        .map(|n| self.interns.get(n).to_owned())
                        .unwrap_or_else(|| ordinal.to_string()),
                    ordinal: *ordinal,
                },
                _ => Object::Int(*ordinal),
            },
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Str(s) => Object::String(s.clone()),
                HeapData::Array(arr) => Object::Array(arr.values.iter().map(|v| self.object_from_value(v)).collect()),
                HeapData::Record(rec) => Object::Record(
                    rec.fields
                        .iter()
                        .map(|(name, v)| (self.interns.get(*name).to_owned(), self.object_from_value(v)))
                        .collect(),
                ),
                HeapData::Set(set) => {
                    let names = set
                        .iter_sorted()
                        .into_iter()
                        .map(|ordinal| match self.typereg.kind(set.elem) {
                            TypeKind::Enum(e) => e
                                .name_of(ordinal)
                                .map(|n| self.interns.get(n).to_owned())
                                .unwrap_or_else(|| ordinal.to_string()),
                            _ => ordinal.to_string(),
                        })
                        .collect();
                    Object::Set(names)
                }
                HeapData::Object(_) | HeapData::FuncPtr(_) => Object::Repr(self.display(value)),
            },
            other => Object::Repr(self.display(other)),
        }
    }

    /// Converts a host value into a runtime value. Supported inputs are the
    /// scalar kinds plus arrays of supported inputs.
    pub fn value_from_object(&mut self, obj: &Object, pos: CodeLoc) -> RunResult<Value> {
        Ok(match obj {
            Object::Nil => Value::Nil { class: None },
            Object::Unassigned => Value::Unassigned,
            Object::Bool(v) => Value::Bool(*v),
            Object::Int(v) => Value::Int(*v),
            Object::Float(v) => Value::Float(*v),
            Object::String(s) => {
                let id = self.alloc(HeapData::Str(s.clone()), pos)?;
                Value::Ref(id)
            }
            Object::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    let v = self.value_from_object(item, pos)?;
                    values.push(self.retain_for_store(v));
                }
                let id = self.alloc(HeapData::Array(ArrayObj::dynamic(TypeId::VARIANT, values)), pos)?;
                Value::Ref(id)
            }
            other => {
                return Err(RunError::fatal(
                    format!("unsupported external value {other:?}"),
                    pos,
                ));
            }
        })
    }
}
