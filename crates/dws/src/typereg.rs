//! The type registry.
//!
//! Holds builtin primitives, nominal declarations (enums, records, subranges,
//! named arrays and sets, classes, interfaces), and memoized anonymous shapes
//! (`array of T`, `array[lo..hi] of T`, `set of E`). Answers assignability
//! queries and constructs zero values for declared types.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::{
    class::{ClassId, ClassReg, InterfaceId},
    heap::{Heap, HeapData},
    intern::{Interns, Symbol},
    resource::{ResourceError, ResourceTracker},
    types::{ArrayObj, RecordObj, SetObj},
    value::Value,
};

/// Index of a type in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub(crate) struct TypeId(u32);

impl TypeId {
    pub const INTEGER: Self = Self(0);
    pub const FLOAT: Self = Self(1);
    pub const STRING: Self = Self(2);
    pub const BOOLEAN: Self = Self(3);
    pub const VARIANT: Self = Self(4);
    pub const FUNCPTR: Self = Self(5);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// An enum type: declared values in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct EnumType {
    pub name: Symbol,
    /// `(value name, ordinal)` pairs in declaration order.
    pub values: Vec<(Symbol, i64)>,
}

impl EnumType {
    pub fn ordinal_of(&self, name: Symbol) -> Option<i64> {
        self.values.iter().find(|(n, _)| *n == name).map(|(_, o)| *o)
    }

    pub fn name_of(&self, ordinal: i64) -> Option<Symbol> {
        self.values.iter().find(|(_, o)| *o == ordinal).map(|(n, _)| *n)
    }

    /// Effective cardinality for set storage selection: the bitmask is usable
    /// only when every ordinal fits in a 64-bit mask.
    pub fn set_cardinality(&self) -> usize {
        let max_ord = self.values.iter().map(|(_, o)| *o).max().unwrap_or(-1);
        if max_ord < 0 || max_ord >= 64 || self.values.iter().any(|(_, o)| *o < 0) {
            usize::MAX
        } else {
            usize::try_from(max_ord + 1).expect("checked range")
        }
    }
}

/// The shape of a registered type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum TypeKind {
    Integer,
    Float,
    String,
    Boolean,
    Variant,
    Enum(EnumType),
    /// Bounded integer. `name` is `None` for anonymous `lo..hi` shapes.
    Subrange {
        name: Option<Symbol>,
        lo: i64,
        hi: i64,
    },
    /// `bounds` is `Some((low, high))` for static arrays.
    Array {
        elem: TypeId,
        bounds: Option<(i64, i64)>,
    },
    /// `set of E` where `elem` is an enum type.
    Set { elem: TypeId },
    Record {
        name: Option<Symbol>,
        fields: Vec<(Symbol, TypeId)>,
    },
    Class(ClassId),
    Interface(InterfaceId),
    /// `class of TFoo` — metaclass type.
    ClassOf(ClassId),
    /// Function pointer; parameter signatures are validated upstream.
    FuncPtr,
}

/// The registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TypeRegistry {
    kinds: Vec<TypeKind>,
    by_name: AHashMap<Symbol, TypeId>,
    /// Enum value names, resolvable as bare identifiers.
    enum_consts: AHashMap<Symbol, (TypeId, i64)>,
    array_memo: AHashMap<(TypeId, Option<(i64, i64)>), TypeId>,
    set_memo: AHashMap<TypeId, TypeId>,
    subrange_memo: AHashMap<(i64, i64), TypeId>,
    classof_memo: AHashMap<ClassId, TypeId>,
}

impl TypeRegistry {
    /// Creates a registry with the builtin primitives registered.
    pub fn new(interns: &mut Interns) -> Self {
        let mut reg = Self {
            kinds: Vec::with_capacity(16),
            by_name: AHashMap::new(),
            enum_consts: AHashMap::new(),
            array_memo: AHashMap::new(),
            set_memo: AHashMap::new(),
            subrange_memo: AHashMap::new(),
            classof_memo: AHashMap::new(),
        };
        // Order must match the TypeId associated constants.
        for (name, kind) in [
            ("Integer", TypeKind::Integer),
            ("Float", TypeKind::Float),
            ("String", TypeKind::String),
            ("Boolean", TypeKind::Boolean),
            ("Variant", TypeKind::Variant),
        ] {
            let sym = interns.intern(name);
            let id = reg.push(kind);
            reg.by_name.insert(sym, id);
        }
        // The anonymous function-pointer type; never looked up by name.
        let fp = reg.push(TypeKind::FuncPtr);
        debug_assert_eq!(fp, TypeId::FUNCPTR);
        reg
    }

    fn push(&mut self, kind: TypeKind) -> TypeId {
        let id = TypeId(u32::try_from(self.kinds.len()).expect("type table overflow"));
        self.kinds.push(kind);
        id
    }

    pub fn kind(&self, id: TypeId) -> &TypeKind {
        &self.kinds[id.index()]
    }

    pub fn lookup(&self, name: Symbol) -> Option<TypeId> {
        self.by_name.get(&name).copied()
    }

    /// Registers a nominal type. Later registrations shadow earlier ones,
    /// which partial-class re-opening relies on.
    pub fn register_named(&mut self, name: Symbol, kind: TypeKind) -> TypeId {
        let id = self.push(kind);
        self.by_name.insert(name, id);
        id
    }

    /// Registers an enum's value names for bare-identifier resolution.
    pub fn register_enum_consts(&mut self, typ: TypeId) {
        let TypeKind::Enum(e) = self.kind(typ).clone() else {
            return;
        };
        for (name, ordinal) in e.values {
            self.enum_consts.insert(name, (typ, ordinal));
        }
    }

    pub fn enum_const(&self, name: Symbol) -> Option<(TypeId, i64)> {
        self.enum_consts.get(&name).copied()
    }

    /// Memoized anonymous `array of T` / `array[lo..hi] of T`.
    pub fn intern_array(&mut self, elem: TypeId, bounds: Option<(i64, i64)>) -> TypeId {
        if let Some(&id) = self.array_memo.get(&(elem, bounds)) {
            return id;
        }
        let id = self.push(TypeKind::Array { elem, bounds });
        self.array_memo.insert((elem, bounds), id);
        id
    }

    /// Memoized anonymous `set of E`.
    pub fn intern_set(&mut self, elem: TypeId) -> TypeId {
        if let Some(&id) = self.set_memo.get(&elem) {
            return id;
        }
        let id = self.push(TypeKind::Set { elem });
        self.set_memo.insert(elem, id);
        id
    }

    /// Memoized anonymous `lo..hi` subrange.
    pub fn intern_subrange(&mut self, lo: i64, hi: i64) -> TypeId {
        if let Some(&id) = self.subrange_memo.get(&(lo, hi)) {
            return id;
        }
        let id = self.push(TypeKind::Subrange { name: None, lo, hi });
        self.subrange_memo.insert((lo, hi), id);
        id
    }

    /// Memoized `class of TFoo` metaclass type.
    pub fn intern_classof(&mut self, class: ClassId) -> TypeId {
        if let Some(&id) = self.classof_memo.get(&class) {
            return id;
        }
        let id = self.push(TypeKind::ClassOf(class));
        self.classof_memo.insert(class, id);
        id
    }

    /// Registers `name` as another spelling of an existing type.
    pub fn register_alias(&mut self, name: Symbol, id: TypeId) {
        self.by_name.insert(name, id);
    }

    /// Registers an anonymous record shape (for record literals).
    pub fn intern_record(&mut self, fields: Vec<(Symbol, TypeId)>) -> TypeId {
        self.push(TypeKind::Record { name: None, fields })
    }

    /// Whether a value of `source` may be assigned to a site of type
    /// `target` (with runtime checks such as subrange bounds applied at the
    /// assignment itself).
    pub fn is_assignable(&self, source: TypeId, target: TypeId, classes: &ClassReg) -> bool {
        if source == target {
            return true;
        }
        match (self.kind(source), self.kind(target)) {
            // Variant boxes anything and unboxes dynamically.
            (_, TypeKind::Variant) | (TypeKind::Variant, _) => true,
            (TypeKind::Integer, TypeKind::Float) => true,
            (TypeKind::Subrange { .. }, TypeKind::Integer | TypeKind::Float) => true,
            (TypeKind::Integer, TypeKind::Subrange { .. }) => true,
            (TypeKind::Subrange { .. }, TypeKind::Subrange { .. }) => true,
            (TypeKind::Class(src), TypeKind::Class(dst)) => classes.is_ancestor(*dst, *src),
            (TypeKind::Class(src), TypeKind::Interface(dst)) => classes.class_implements(*src, *dst),
            (TypeKind::Interface(src), TypeKind::Interface(dst)) => classes.iface_extends(*src, *dst),
            (TypeKind::ClassOf(src), TypeKind::ClassOf(dst)) => classes.is_ancestor(*dst, *src),
            (
                TypeKind::Array {
                    elem: e1,
                    bounds: b1,
                },
                TypeKind::Array {
                    elem: e2,
                    bounds: b2,
                },
            ) => e1 == e2 && (b1 == b2 || b2.is_none()),
            (TypeKind::Set { elem: e1 }, TypeKind::Set { elem: e2 }) => e1 == e2,
            (TypeKind::FuncPtr, TypeKind::FuncPtr) => true,
            _ => false,
        }
    }

    /// Constructs the zero value of a type.
    ///
    /// Compound zero values allocate fresh heap data: callers must never
    /// share one zero value across several bindings.
    pub fn default_value(
        &self,
        typ: TypeId,
        heap: &mut Heap<impl ResourceTracker>,
    ) -> Result<Value, ResourceError> {
        Ok(match self.kind(typ) {
            TypeKind::Integer => Value::Int(0),
            TypeKind::Float => Value::Float(0.0),
            TypeKind::Boolean => Value::Bool(false),
            TypeKind::Variant => Value::Unassigned,
            TypeKind::String => Value::Ref(heap.allocate(HeapData::Str(String::new()))?),
            TypeKind::Enum(e) => Value::Enum {
                typ,
                ordinal: e.values.first().map_or(0, |(_, o)| *o),
            },
            TypeKind::Subrange { lo, .. } => Value::Subrange { typ, value: *lo },
            TypeKind::Array { elem, bounds } => {
                let elem = *elem;
                let arr = match *bounds {
                    None => ArrayObj::dynamic(elem, Vec::new()),
                    Some((lo, hi)) => {
                        let len = usize::try_from((hi - lo + 1).max(0)).expect("checked bounds");
                        let mut values = Vec::with_capacity(len);
                        for _ in 0..len {
                            values.push(self.default_value(elem, heap)?);
                        }
                        ArrayObj::fixed(elem, lo, hi, values)
                    }
                };
                Value::Ref(heap.allocate(HeapData::Array(arr))?)
            }
            TypeKind::Set { elem } => {
                let cardinality = self.set_storage_cardinality(*elem);
                Value::Ref(heap.allocate(HeapData::Set(SetObj::empty(*elem, cardinality)))?)
            }
            TypeKind::Record { fields, .. } => {
                let fields = fields.clone();
                let mut map = indexmap::IndexMap::with_capacity(fields.len());
                for (name, field_type) in fields {
                    map.insert(name, self.default_value(field_type, heap)?);
                }
                Value::Ref(heap.allocate(HeapData::Record(RecordObj::new(typ, map)))?)
            }
            TypeKind::Class(cid) | TypeKind::ClassOf(cid) => Value::Nil { class: Some(*cid) },
            TypeKind::Interface(_) | TypeKind::FuncPtr => Value::Nil { class: None },
        })
    }

    /// Storage-selection cardinality for `set of elem`.
    pub fn set_storage_cardinality(&self, elem: TypeId) -> usize {
        match self.kind(elem) {
            TypeKind::Enum(e) => e.set_cardinality(),
            TypeKind::Subrange { lo, hi, .. } => {
                if *lo >= 0 && *hi < 64 {
                    usize::try_from(hi + 1).expect("checked range")
                } else {
                    usize::MAX
                }
            }
            _ => usize::MAX,
        }
    }

    /// Human-readable type name for diagnostics.
    pub fn type_name(&self, typ: TypeId, interns: &Interns, classes: &ClassReg) -> String {
        match self.kind(typ) {
            TypeKind::Integer => "Integer".to_owned(),
            TypeKind::Float => "Float".to_owned(),
            TypeKind::String => "String".to_owned(),
            TypeKind::Boolean => "Boolean".to_owned(),
            TypeKind::Variant => "Variant".to_owned(),
            TypeKind::Enum(e) => interns.get(e.name).to_owned(),
            TypeKind::Subrange { name, lo, hi } => match name {
                Some(n) => interns.get(*n).to_owned(),
                None => format!("{lo}..{hi}"),
            },
            TypeKind::Array { elem, bounds } => match bounds {
                None => format!("array of {}", self.type_name(*elem, interns, classes)),
                Some((lo, hi)) => {
                    format!("array[{lo}..{hi}] of {}", self.type_name(*elem, interns, classes))
                }
            },
            TypeKind::Set { elem } => format!("set of {}", self.type_name(*elem, interns, classes)),
            TypeKind::Record { name, .. } => match name {
                Some(n) => interns.get(*n).to_owned(),
                None => "record".to_owned(),
            },
            TypeKind::Class(cid) => interns.get(classes.class(*cid).name).to_owned(),
            TypeKind::Interface(iid) => interns.get(classes.interface(*iid).name).to_owned(),
            TypeKind::ClassOf(cid) => format!("class of {}", interns.get(classes.class(*cid).name)),
            TypeKind::FuncPtr => "function pointer".to_owned(),
        }
    }

    /// The declared static type of a runtime value, used for operator
    /// overload lookup and diagnostics.
    pub fn type_of_value(&self, value: &Value, heap: &Heap<impl ResourceTracker>) -> Option<TypeId> {
        Some(match value {
            Value::Int(_) => TypeId::INTEGER,
            Value::Float(_) => TypeId::FLOAT,
            Value::Bool(_) => TypeId::BOOLEAN,
            Value::Unassigned => TypeId::VARIANT,
            Value::Enum { typ, .. } | Value::Subrange { typ, .. } => *typ,
            Value::TypeInfo(_) => return None,
            Value::ClassRef(_) | Value::Nil { .. } | Value::Interface { .. } => return None,
            Value::Ref(id) => match heap.get(*id) {
                HeapData::Str(_) => TypeId::STRING,
                HeapData::Array(arr) => {
                    // Anonymous shapes are memoized, so equal shapes share ids.
                    self.array_memo.get(&(arr.elem, arr.bounds)).copied()?
                }
                HeapData::Set(set) => self.set_memo.get(&set.elem).copied()?,
                HeapData::Record(rec) => rec.typ,
                HeapData::Object(_) | HeapData::FuncPtr(_) => return None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NoLimitTracker;

    #[test]
    fn inline_shapes_are_memoized() {
        let mut interns = Interns::new();
        let mut reg = TypeRegistry::new(&mut interns);
        let a = reg.intern_array(TypeId::INTEGER, None);
        let b = reg.intern_array(TypeId::INTEGER, None);
        assert_eq!(a, b);
        let c = reg.intern_array(TypeId::INTEGER, Some((1, 5)));
        assert_ne!(a, c);
        assert_eq!(reg.intern_subrange(0, 9), reg.intern_subrange(0, 9));
    }

    #[test]
    fn default_values_are_zero() {
        let mut interns = Interns::new();
        let reg = TypeRegistry::new(&mut interns);
        let mut heap = Heap::new(NoLimitTracker::new());
        assert!(matches!(reg.default_value(TypeId::INTEGER, &mut heap).unwrap(), Value::Int(0)));
        assert!(matches!(
            reg.default_value(TypeId::VARIANT, &mut heap).unwrap(),
            Value::Unassigned
        ));
        let s = reg.default_value(TypeId::STRING, &mut heap).unwrap();
        let Value::Ref(id) = s else { panic!("expected heap string") };
        assert!(matches!(heap.get(id), HeapData::Str(s) if s.is_empty()));
    }

    #[test]
    fn static_array_default_has_full_length() {
        let mut interns = Interns::new();
        let mut reg = TypeRegistry::new(&mut interns);
        let mut heap = Heap::new(NoLimitTracker::new());
        let arr_type = reg.intern_array(TypeId::INTEGER, Some((1, 5)));
        let v = reg.default_value(arr_type, &mut heap).unwrap();
        let Value::Ref(id) = v else { panic!("expected array") };
        let HeapData::Array(arr) = heap.get(id) else {
            panic!("expected array data")
        };
        assert_eq!(arr.len(), 5);
        assert_eq!(arr.low(), 1);
        assert_eq!(arr.high(), 5);
    }

    #[test]
    fn subrange_assignability() {
        let mut interns = Interns::new();
        let mut reg = TypeRegistry::new(&mut interns);
        let classes = ClassReg::empty();
        let digit = reg.intern_subrange(0, 9);
        assert!(reg.is_assignable(TypeId::INTEGER, digit, &classes));
        assert!(reg.is_assignable(digit, TypeId::INTEGER, &classes));
        assert!(reg.is_assignable(digit, TypeId::FLOAT, &classes));
        assert!(!reg.is_assignable(TypeId::STRING, TypeId::INTEGER, &classes));
    }
}
