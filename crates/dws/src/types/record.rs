//! Record payloads. Records have value semantics: assignment and argument
//! passing copy every field.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{intern::Symbol, typereg::TypeId, value::Value};

/// A record value: its declared type and fields in declaration order.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct RecordObj {
    pub typ: TypeId,
    pub fields: IndexMap<Symbol, Value>,
}

impl RecordObj {
    pub fn new(typ: TypeId, fields: IndexMap<Symbol, Value>) -> Self {
        Self { typ, fields }
    }

    pub fn get(&self, name: Symbol) -> Option<&Value> {
        self.fields.get(&name)
    }

    pub fn get_mut(&mut self, name: Symbol) -> Option<&mut Value> {
        self.fields.get_mut(&name)
    }
}
