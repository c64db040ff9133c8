//! Class and interface runtime metadata.
//!
//! The registry owns per-class field tables, method/constructor tables
//! (overloads keyed by normalized name), the virtual method table, shared
//! class-variable storage, pre-evaluated class constants, properties, and
//! operator overloads. All lookups walk the parent chain; name comparisons
//! are symbol comparisons (already case-normalized by the interner).
//!
//! The VMT is keyed by `(name, arity)` — full parameter-type matching of
//! overrides is the semantic analyzer's job, and the coarse key is what the
//! dispatch semantics observably depend on.

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    expressions::{BinaryOp, FunctionDef, FunctionId, VirtualMode},
    intern::{StaticSymbols, Symbol},
    typereg::TypeId,
    value::Value,
};

/// Index of a class in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub(crate) struct ClassId(u32);

impl ClassId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of an interface in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub(crate) struct InterfaceId(u32);

impl InterfaceId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A method bound to the class that declared it.
///
/// `arity` is the declared parameter count; `min_arity` subtracts trailing
/// parameters that carry default values. `in_vmt` records whether the
/// declaration participates in virtual dispatch (`virtual`/`override`);
/// `reintroduce` and plain methods resolve statically.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MethodEntry {
    pub fid: FunctionId,
    pub owner: ClassId,
    pub arity: u8,
    pub min_arity: u8,
    pub in_vmt: bool,
}

/// One virtual-method-table slot.
#[derive(Debug, Clone, Copy)]
pub(crate) struct VmtSlot {
    /// The class that introduced the slot (`virtual`); stays fixed across
    /// overrides.
    pub introduced: ClassId,
    /// The class providing the currently effective implementation.
    pub impl_class: ClassId,
    pub fid: FunctionId,
}

/// A property: read/write specifiers name a field or a method.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PropertyMeta {
    pub name: Symbol,
    pub typ: TypeId,
    pub read: Option<Symbol>,
    pub write: Option<Symbol>,
    pub is_default: bool,
    /// Indexed property (`Items[i: Integer]`).
    pub has_params: bool,
}

/// An operator overload binding.
///
/// `self_arg` is set when the target is an instance method: it names the
/// operand index bound as `Self` at the call.
#[derive(Debug, Clone)]
pub(crate) struct OperatorBinding {
    pub op: BinaryOp,
    pub operands: Vec<TypeId>,
    pub fid: FunctionId,
    pub self_arg: Option<usize>,
}

/// Metadata for one class.
#[derive(Debug)]
pub(crate) struct ClassMeta {
    pub name: Symbol,
    pub parent: Option<ClassId>,
    pub interfaces: Vec<InterfaceId>,
    /// The `TypeKind::Class` entry for this class.
    pub typ: TypeId,
    /// Instance fields in declaration order.
    pub fields: IndexMap<Symbol, TypeId>,
    /// Instance methods (including the destructor), overloads per name.
    pub methods: AHashMap<Symbol, Vec<MethodEntry>>,
    pub class_methods: AHashMap<Symbol, Vec<MethodEntry>>,
    pub constructors: AHashMap<Symbol, Vec<MethodEntry>>,
    pub vmt: AHashMap<(Symbol, u8), VmtSlot>,
    /// Shared storage: declared type plus current value.
    pub class_vars: IndexMap<Symbol, (TypeId, Value)>,
    /// Pre-evaluated at registration.
    pub class_consts: IndexMap<Symbol, Value>,
    pub properties: AHashMap<Symbol, PropertyMeta>,
    pub default_property: Option<Symbol>,
    pub operators: Vec<OperatorBinding>,
    pub nested: AHashMap<Symbol, ClassId>,
    pub is_abstract: bool,
    pub is_external: bool,
}

impl ClassMeta {
    /// Creates an empty class shell; the registration pass fills the tables
    /// and rebuilds the VMT afterwards.
    pub fn shell(name: Symbol, parent: Option<ClassId>, typ: TypeId) -> Self {
        Self {
            name,
            parent,
            interfaces: Vec::new(),
            typ,
            fields: IndexMap::new(),
            methods: AHashMap::new(),
            class_methods: AHashMap::new(),
            constructors: AHashMap::new(),
            vmt: AHashMap::new(),
            class_vars: IndexMap::new(),
            class_consts: IndexMap::new(),
            properties: AHashMap::new(),
            default_property: None,
            operators: Vec::new(),
            nested: AHashMap::new(),
            is_abstract: false,
            is_external: false,
        }
    }
}

/// Metadata for one interface.
#[derive(Debug)]
pub(crate) struct InterfaceMeta {
    pub name: Symbol,
    pub parent: Option<InterfaceId>,
    pub typ: TypeId,
    /// Declared method signatures: name and arity.
    pub methods: Vec<(Symbol, u8)>,
    pub properties: Vec<Symbol>,
}

/// The class and interface registry.
#[derive(Debug)]
pub(crate) struct ClassReg {
    classes: Vec<ClassMeta>,
    interfaces: Vec<InterfaceMeta>,
    by_name: AHashMap<Symbol, ClassId>,
    iface_by_name: AHashMap<Symbol, InterfaceId>,
    /// Operator overloads whose first operand is not a class.
    pub global_operators: Vec<OperatorBinding>,
    /// The builtin `Exception` base class, once registered.
    exception_base: Option<ClassId>,
}

impl ClassReg {
    pub fn empty() -> Self {
        Self {
            classes: Vec::new(),
            interfaces: Vec::new(),
            by_name: AHashMap::new(),
            iface_by_name: AHashMap::new(),
            global_operators: Vec::new(),
            exception_base: None,
        }
    }

    pub fn class(&self, id: ClassId) -> &ClassMeta {
        &self.classes[id.index()]
    }

    pub fn class_mut(&mut self, id: ClassId) -> &mut ClassMeta {
        &mut self.classes[id.index()]
    }

    pub fn interface(&self, id: InterfaceId) -> &InterfaceMeta {
        &self.interfaces[id.index()]
    }

    pub fn interface_mut(&mut self, id: InterfaceId) -> &mut InterfaceMeta {
        &mut self.interfaces[id.index()]
    }

    /// Drains every owned value out of class-variable and class-constant
    /// storage for end-of-run release.
    pub fn drain_values(&mut self) -> Vec<Value> {
        let mut out = Vec::new();
        for class in &mut self.classes {
            for (_, (_, value)) in class.class_vars.drain(..) {
                out.push(value);
            }
            for (_, value) in class.class_consts.drain(..) {
                out.push(value);
            }
        }
        out
    }

    pub fn lookup_class(&self, name: Symbol) -> Option<ClassId> {
        self.by_name.get(&name).copied()
    }

    pub fn lookup_interface(&self, name: Symbol) -> Option<InterfaceId> {
        self.iface_by_name.get(&name).copied()
    }

    pub fn exception_base(&self) -> Option<ClassId> {
        self.exception_base
    }

    pub fn set_exception_base(&mut self, id: ClassId) {
        self.exception_base = Some(id);
    }

    /// Adds a new class shell. Fields, methods, and the VMT are filled in by
    /// the registration pass; partial classes merge into the existing shell
    /// instead.
    pub fn add_class(&mut self, meta: ClassMeta) -> ClassId {
        let id = ClassId(u32::try_from(self.classes.len()).expect("class table overflow"));
        self.by_name.insert(meta.name, id);
        self.classes.push(meta);
        id
    }

    pub fn add_interface(&mut self, meta: InterfaceMeta) -> InterfaceId {
        let id = InterfaceId(u32::try_from(self.interfaces.len()).expect("interface table overflow"));
        self.iface_by_name.insert(meta.name, id);
        self.interfaces.push(meta);
        id
    }

    /// Rebuilds a class's VMT: inherit the parent's slots, then apply this
    /// class's methods according to their directives. `reintroduce` leaves
    /// the inherited slot untouched.
    pub fn build_vmt(&mut self, id: ClassId, functions: &[FunctionDef]) {
        let mut vmt = match self.classes[id.index()].parent {
            Some(parent) => self.classes[parent.index()].vmt.clone(),
            None => AHashMap::new(),
        };
        let meta = &self.classes[id.index()];
        let mut own: Vec<MethodEntry> = Vec::new();
        for entries in meta.methods.values().chain(meta.class_methods.values()).chain(meta.constructors.values()) {
            own.extend(entries.iter().filter(|e| e.owner == id).copied());
        }
        for entry in own {
            let def = &functions[entry.fid.index()];
            let key = (def.name.name, u8::try_from(def.arity()).unwrap_or(u8::MAX));
            match def.virtual_mode {
                VirtualMode::Virtual => {
                    vmt.insert(
                        key,
                        VmtSlot {
                            introduced: id,
                            impl_class: id,
                            fid: entry.fid,
                        },
                    );
                }
                VirtualMode::Override => {
                    if let Some(slot) = vmt.get_mut(&key) {
                        slot.impl_class = id;
                        slot.fid = entry.fid;
                    } else {
                        // Override without an inherited slot behaves as a new
                        // virtual introduction.
                        vmt.insert(
                            key,
                            VmtSlot {
                                introduced: id,
                                impl_class: id,
                                fid: entry.fid,
                            },
                        );
                    }
                }
                VirtualMode::Reintroduce | VirtualMode::None => {}
            }
        }
        self.classes[id.index()].vmt = vmt;
    }

    /// Walks the parent chain from `class`, yielding each class id.
    pub fn ancestry(&self, class: ClassId) -> Ancestry<'_> {
        Ancestry {
            reg: self,
            next: Some(class),
        }
    }

    /// Whether `ancestor` is `descendant` or one of its ancestors.
    pub fn is_ancestor(&self, ancestor: ClassId, descendant: ClassId) -> bool {
        self.ancestry(descendant).any(|c| c == ancestor)
    }

    /// Whether `class` (or an ancestor) declares `iface` (or an interface
    /// that extends it). Only explicit declaration counts.
    pub fn class_implements(&self, class: ClassId, iface: InterfaceId) -> bool {
        self.ancestry(class)
            .any(|c| self.classes[c.index()].interfaces.iter().any(|&i| self.iface_extends(i, iface)))
    }

    /// Whether interface `src` is `dst` or inherits from it.
    pub fn iface_extends(&self, src: InterfaceId, dst: InterfaceId) -> bool {
        let mut current = Some(src);
        while let Some(i) = current {
            if i == dst {
                return true;
            }
            current = self.interfaces[i.index()].parent;
        }
        false
    }

    /// Instance-method dispatch.
    ///
    /// Resolution starts from the *static* class of the receiver expression
    /// (its declared type, or the runtime class when unknown). A method
    /// found there that sits in the VMT is called through the VMT of the
    /// receiver's runtime class; a `reintroduce`d or plain method is called
    /// directly. This keeps reintroduced methods invisible through
    /// base-typed references. Overloads within a name resolve by argument
    /// count.
    pub fn dispatch_instance(
        &self,
        static_class: ClassId,
        runtime_class: ClassId,
        name: Symbol,
        argc: usize,
    ) -> Option<MethodEntry> {
        let entry = self
            .find_static(static_class, name, argc, |meta| &meta.methods)
            .or_else(|| self.find_static(runtime_class, name, argc, |meta| &meta.methods))?;
        if entry.in_vmt {
            let key = (name, u8::try_from(argc).unwrap_or(u8::MAX));
            if let Some(slot) = self.classes[runtime_class.index()].vmt.get(&key) {
                return Some(MethodEntry {
                    fid: slot.fid,
                    owner: slot.impl_class,
                    arity: key.1,
                    min_arity: key.1,
                    in_vmt: true,
                });
            }
        }
        Some(entry)
    }

    /// Class-method dispatch; virtual class methods go through the VMT of
    /// the concrete class.
    pub fn dispatch_class_method(&self, class: ClassId, name: Symbol, argc: usize) -> Option<MethodEntry> {
        let key = (name, u8::try_from(argc).unwrap_or(u8::MAX));
        if let Some(slot) = self.classes[class.index()].vmt.get(&key)
            && self
                .find_static(class, name, argc, |meta| &meta.class_methods)
                .is_some()
        {
            return Some(MethodEntry {
                fid: slot.fid,
                owner: slot.impl_class,
                arity: key.1,
                min_arity: key.1,
                in_vmt: true,
            });
        }
        self.find_static(class, name, argc, |meta| &meta.class_methods)
    }

    /// Constructor lookup; virtual constructors dispatch through the VMT
    /// (metaclass-polymorphic `Create`).
    pub fn lookup_constructor(&self, class: ClassId, name: Symbol, argc: usize) -> Option<MethodEntry> {
        let key = (name, u8::try_from(argc).unwrap_or(u8::MAX));
        if let Some(slot) = self.classes[class.index()].vmt.get(&key)
            && self
                .find_static(class, name, argc, |meta| &meta.constructors)
                .is_some()
        {
            return Some(MethodEntry {
                fid: slot.fid,
                owner: slot.impl_class,
                arity: key.1,
                min_arity: key.1,
                in_vmt: true,
            });
        }
        self.find_static(class, name, argc, |meta| &meta.constructors)
    }

    /// Finds a method in the given table, walking the parent chain. Within a
    /// class, an exact arity match wins; a sole candidate is taken regardless
    /// of stated arity so default parameters can fill the gap.
    fn find_static(
        &self,
        class: ClassId,
        name: Symbol,
        argc: usize,
        table: impl Fn(&ClassMeta) -> &AHashMap<Symbol, Vec<MethodEntry>>,
    ) -> Option<MethodEntry> {
        for c in self.ancestry(class) {
            let meta = &self.classes[c.index()];
            if let Some(entries) = table(meta).get(&name) {
                if let Some(e) = entries.iter().find(|e| usize::from(e.arity) == argc) {
                    return Some(*e);
                }
                if let Some(e) = entries
                    .iter()
                    .find(|e| usize::from(e.min_arity) <= argc && argc <= usize::from(e.arity))
                {
                    return Some(*e);
                }
                // A name found in a class hides the parent's overloads.
                return Some(entries[0]);
            }
        }
        None
    }

    /// Finds a method by name at any arity (used by `@obj.Method` and
    /// zero-argument member resolution).
    pub fn find_method_any(&self, class: ClassId, name: Symbol) -> Option<MethodEntry> {
        for c in self.ancestry(class) {
            if let Some(entries) = self.classes[c.index()].methods.get(&name) {
                return entries.first().copied();
            }
        }
        None
    }

    /// Finds a class method by name at any arity.
    pub fn find_class_method_any(&self, class: ClassId, name: Symbol) -> Option<MethodEntry> {
        for c in self.ancestry(class) {
            if let Some(entries) = self.classes[c.index()].class_methods.get(&name) {
                return entries.first().copied();
            }
        }
        None
    }

    /// Finds a method statically from `class` (skipping the VMT), for
    /// `inherited` dispatch. Searches instance methods, class methods, and
    /// constructors.
    pub fn lookup_static_method(&self, class: ClassId, name: Symbol, argc: usize) -> Option<MethodEntry> {
        self.find_static(class, name, argc, |meta| &meta.methods)
            .or_else(|| self.find_static(class, name, argc, |meta| &meta.class_methods))
            .or_else(|| self.find_static(class, name, argc, |meta| &meta.constructors))
    }

    /// Whether an interface (or one of its parents) declares `name`.
    pub fn iface_declares(&self, iface: InterfaceId, name: Symbol) -> bool {
        let mut current = Some(iface);
        while let Some(i) = current {
            let meta = &self.interfaces[i.index()];
            if meta.methods.iter().any(|(n, _)| *n == name) || meta.properties.contains(&name) {
                return true;
            }
            current = meta.parent;
        }
        false
    }

    /// Field type lookup along the parent chain.
    pub fn field_type(&self, class: ClassId, name: Symbol) -> Option<TypeId> {
        self.ancestry(class)
            .find_map(|c| self.classes[c.index()].fields.get(&name).copied())
    }

    /// All fields of a class including inherited ones, parents first.
    pub fn all_fields(&self, class: ClassId) -> Vec<(Symbol, TypeId)> {
        let chain: Vec<ClassId> = self.ancestry(class).collect();
        let mut fields = Vec::new();
        for c in chain.into_iter().rev() {
            for (name, typ) in &self.classes[c.index()].fields {
                fields.push((*name, *typ));
            }
        }
        fields
    }

    /// Class-variable lookup along the parent chain, returning the owning
    /// class.
    pub fn find_class_var(&self, class: ClassId, name: Symbol) -> Option<ClassId> {
        self.ancestry(class)
            .find(|c| self.classes[c.index()].class_vars.contains_key(&name))
    }

    pub fn class_const(&self, class: ClassId, name: Symbol) -> Option<&Value> {
        self.ancestry(class)
            .find_map(|c| self.classes[c.index()].class_consts.get(&name))
    }

    pub fn find_property(&self, class: ClassId, name: Symbol) -> Option<PropertyMeta> {
        self.ancestry(class)
            .find_map(|c| self.classes[c.index()].properties.get(&name).copied())
    }

    pub fn default_property(&self, class: ClassId) -> Option<PropertyMeta> {
        self.ancestry(class).find_map(|c| {
            let meta = &self.classes[c.index()];
            meta.default_property.and_then(|p| meta.properties.get(&p).copied())
        })
    }

    /// Operator overload lookup: the class chain of the first class-typed
    /// operand first, then global operators.
    pub fn lookup_operator(
        &self,
        class: Option<ClassId>,
        op: BinaryOp,
        operand_types: &[TypeId],
    ) -> Option<&OperatorBinding> {
        if let Some(class) = class {
            for c in self.ancestry(class) {
                for binding in &self.classes[c.index()].operators {
                    if binding.op == op && binding.operands == operand_types {
                        return Some(binding);
                    }
                }
            }
        }
        self.global_operators
            .iter()
            .find(|b| b.op == op && b.operands == operand_types)
    }

    /// Whether `class` inherits from the builtin `Exception` class.
    pub fn is_exception_class(&self, class: ClassId) -> bool {
        self.exception_base.is_some_and(|base| self.is_ancestor(base, class))
    }

    /// Resolves a builtin exception class by its static symbol.
    pub fn builtin_exception(&self, sym: StaticSymbols) -> ClassId {
        self.lookup_class(Symbol::from(sym))
            .expect("builtin exception classes are registered at startup")
    }
}

/// Iterator over a class and its ancestors.
pub(crate) struct Ancestry<'a> {
    reg: &'a ClassReg,
    next: Option<ClassId>,
}

impl Iterator for Ancestry<'_> {
    type Item = ClassId;

    fn next(&mut self) -> Option<ClassId> {
        let current = self.next?;
        self.next = self.reg.classes[current.index()].parent;
        Some(current)
    }
}
