//! Object instances.
//!
//! Instances have reference semantics. The heap slot's reference count is the
//! object's visible count: it starts at zero on construction and moves only on
//! assignment into variables, fields, parameters, and interface wrappers.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{class::ClassId, intern::Symbol, value::Value};

/// An object instance: runtime class, fields, and destruction state.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Instance {
    pub class: ClassId,
    pub fields: IndexMap<Symbol, Value>,
    /// Set once the destructor has run; a second explicit `Destroy` raises.
    pub destroyed: bool,
    /// Guards against re-entrant destruction while the destructor body runs.
    pub destroy_depth: u32,
}

impl Instance {
    pub fn new(class: ClassId, fields: IndexMap<Symbol, Value>) -> Self {
        Self {
            class,
            fields,
            destroyed: false,
            destroy_depth: 0,
        }
    }
}
