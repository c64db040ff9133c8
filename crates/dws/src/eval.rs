//! The expression evaluator.
//!
//! `Interp` owns all runtime state: the heap, the scope arena, the type and
//! class registries, the builtin table, the output sink, and the RNG. Each
//! AST expression kind has a single evaluation rule producing a [`Value`] or
//! a [`RunError`]. Evaluation is strictly left-to-right everywhere, including
//! argument lists and short-circuit operators.
//!
//! Reference-count discipline: every evaluated value is a *temporary* the
//! caller must either store (through the assignment protocol, which retains
//! object references) or give back via [`Interp::discard`]. Dropping a value
//! on the floor leaks heap data.

use ahash::AHashMap;
use rand_chacha::ChaCha8Rng;

use crate::{
    builtins::Builtin,
    class::{ClassId, ClassReg, MethodEntry},
    exception_public::CodeLoc,
    exception_private::{RunError, RunResult},
    expressions::{BinaryOp, BracketElem, Expr, ExprLoc, Identifier, Program, UnaryOp},
    heap::{Heap, HeapData, HeapId, ReleaseQueue},
    intern::{Interns, StaticSymbols, Symbol},
    io::PrintWriter,
    namespace::{Binding, PlaceRef, ScopeId, Scopes},
    resource::ResourceTracker,
    run::ExternalVars,
    typereg::{TypeId, TypeKind, TypeRegistry},
    types::{ArrayObj, FuncPtrObj, FuncTarget, RecordObj, SetObj},
    value::{Number, Value, format_float, values_cmp, values_equal},
};

/// The tree-walking evaluator.
pub(crate) struct Interp<'a, T: ResourceTracker, P: PrintWriter> {
    pub program: &'a Program,
    pub interns: &'a mut Interns,
    pub heap: Heap<T>,
    pub scopes: Scopes,
    pub typereg: TypeRegistry,
    pub classes: ClassReg,
    pub print: &'a mut P,
    /// Free functions by name (overloads share an entry).
    pub func_table: AHashMap<Symbol, Vec<crate::expressions::FunctionId>>,
    pub builtin_table: AHashMap<Symbol, Builtin>,
    pub externals: &'a mut ExternalVars,
    pub rng: ChaCha8Rng,
    /// Exceptions currently being handled, innermost last. Entries own a
    /// reference to the exception object.
    pub handler_stack: Vec<Value>,
    /// Call stack captured when the most recent exception was raised, for
    /// uncaught-error reports (frames are unwound before the error reaches
    /// the host).
    pub raise_frames: Vec<(Symbol, CodeLoc)>,
}

impl<'a, T: ResourceTracker, P: PrintWriter> Interp<'a, T, P> {
    // ------------------------------------------------------------------
    // Errors and reference management
    // ------------------------------------------------------------------

    /// Allocates heap data, converting resource exhaustion into a fatal
    /// error at `pos`.
    pub fn alloc(&mut self, data: HeapData, pos: CodeLoc) -> RunResult<HeapId> {
        self.heap.allocate(data).map_err(|e| RunError::from_resource(e, pos))
    }

    /// Builds a runtime exception: an instance of the named builtin
    /// exception class with its `Message` field set. The returned error owns
    /// one reference to the object.
    pub fn raise(&mut self, sym: StaticSymbols, msg: impl Into<String>, pos: CodeLoc) -> RunError {
        let class = self.classes.builtin_exception(sym);
        self.raise_frames = self.scopes.capture_frames();
        match self.make_exception(class, msg.into(), pos) {
            Ok(value) => RunError::Raise { value, pos },
            Err(fatal) => fatal,
        }
    }

    /// Allocates an exception object with one owned reference.
    pub fn make_exception(&mut self, class: ClassId, msg: String, pos: CodeLoc) -> RunResult<Value> {
        let msg_id = self.alloc(HeapData::Str(msg), pos)?;
        let mut fields = indexmap::IndexMap::new();
        fields.insert(Symbol::from(StaticSymbols::Message), Value::Ref(msg_id));
        let obj = self.alloc(
            HeapData::Object(crate::types::Instance::new(class, fields)),
            pos,
        )?;
        self.heap.inc_ref(obj); // the error owns this reference
        Ok(Value::Ref(obj))
    }

    /// The class name and message text of an exception object.
    pub fn exception_text(&self, value: &Value) -> (String, String) {
        let Some(id) = value.ref_id() else {
            return ("Exception".to_owned(), self.display(value));
        };
        let HeapData::Object(inst) = self.heap.get(id) else {
            return ("Exception".to_owned(), self.display(value));
        };
        let class_name = self.interns.get(self.classes.class(inst.class).name).to_owned();
        let msg = inst
            .fields
            .get(&Symbol::from(StaticSymbols::Message))
            .map(|v| self.display(v))
            .unwrap_or_default();
        (class_name, msg)
    }

    /// Drains deferred releases: object reference drops (which may run
    /// destructors) and captured scope chains.
    pub fn drain(&mut self, mut queue: ReleaseQueue) -> RunResult<()> {
        loop {
            if let Some(obj) = queue.objects.pop() {
                self.release_object_ref(obj, &mut queue)?;
                continue;
            }
            if let Some(scope) = queue.scopes.pop() {
                self.scopes.release(scope, &mut self.heap, &mut queue, None);
                continue;
            }
            return Ok(());
        }
    }

    /// Drops one reference to an object; at zero the destructor runs and the
    /// slot is reclaimed.
    fn release_object_ref(&mut self, id: HeapId, queue: &mut ReleaseQueue) -> RunResult<()> {
        if self.heap.dec_object_ref(id) > 0 {
            return Ok(());
        }
        let HeapData::Object(inst) = self.heap.get(id) else {
            unreachable!("release_object_ref on non-object");
        };
        if inst.destroy_depth > 0 {
            // The destructor for this instance is already running; it will
            // finish the teardown.
            return Ok(());
        }
        if inst.destroyed {
            self.heap.free_object(id);
            return Ok(());
        }
        self.run_destructor(id, queue)
    }

    /// Discards a temporary value, draining any deferred releases.
    pub fn discard(&mut self, value: Value) -> RunResult<()> {
        let mut queue = ReleaseQueue::new();
        value.drop_with_heap(&mut self.heap, &mut queue);
        self.drain(queue)
    }

    /// Releases an owned value (binding slot, field, element).
    pub fn release_owned_value(&mut self, value: Value) -> RunResult<()> {
        let mut queue = ReleaseQueue::new();
        value.release_with_heap(&mut self.heap, &mut queue);
        self.drain(queue)
    }

    /// Converts a temporary into an owned value for storage: object
    /// references gain a count; everything else already owns its reference.
    pub fn retain_for_store(&mut self, value: Value) -> Value {
        if let Value::Ref(id) = &value
            && self.heap.is_object(*id)
        {
            self.heap.inc_ref(*id);
        }
        value
    }

    /// Converts an owned value back into a temporary (ownership transfer out
    /// of a frame): drops the object count without triggering destruction.
    pub fn owned_to_temp(&mut self, value: Value) -> Value {
        if let Value::Ref(id) = &value
            && self.heap.is_object(*id)
        {
            self.heap.dec_object_ref(*id);
        }
        value
    }

    // ------------------------------------------------------------------
    // Display
    // ------------------------------------------------------------------

    /// The display form of a value, as printed by `PrintLn`.
    pub fn display(&self, value: &Value) -> String {
        match value {
            Value::Unassigned => String::new(),
            Value::Nil { .. } => "nil".to_owned(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => format_float(*v),
            Value::Bool(true) => "True".to_owned(),
            Value::Bool(false) => "False".to_owned(),
            Value::Enum { typ, ordinal } => match self.typereg.kind(*typ) {
                TypeKind::Enum(e) => match e.name_of(*ordinal) {
                    Some(name) => self.interns.get(name).to_owned(),
                    None => ordinal.to_string(),
                },
                _ => ordinal.to_string(),
            },
            Value::Subrange { value, .. } => value.to_string(),
            Value::ClassRef(cid) => self.interns.get(self.classes.class(*cid).name).to_owned(),
            Value::Interface { obj, .. } => self.display(&Value::Ref(*obj)),
            Value::TypeInfo(typ) => self.typereg.type_name(*typ, self.interns, &self.classes),
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Str(s) => s.clone(),
                HeapData::Array(arr) => {
                    let mut out = String::from("[");
                    for (i, v) in arr.values.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        out.push_str(&self.display(v));
                    }
                    out.push(']');
                    out
                }
                HeapData::Set(set) => {
                    let mut out = String::from("[");
                    for (i, ordinal) in set.iter_sorted().into_iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        let shown = match self.typereg.kind(set.elem) {
                            TypeKind::Enum(e) => e
                                .name_of(ordinal)
                                .map(|n| self.interns.get(n).to_owned())
                                .unwrap_or_else(|| ordinal.to_string()),
                            _ => ordinal.to_string(),
                        };
                        out.push_str(&shown);
                    }
                    out.push(']');
                    out
                }
                HeapData::Record(rec) => {
                    let mut out = String::from("(");
                    for (i, (name, v)) in rec.fields.iter().enumerate() {
                        if i > 0 {
                            out.push_str("; ");
                        }
                        out.push_str(self.interns.get(*name));
                        out.push_str(": ");
                        out.push_str(&self.display(v));
                    }
                    out.push(')');
                    out
                }
                HeapData::Object(inst) => self.interns.get(self.classes.class(inst.class).name).to_owned(),
                HeapData::FuncPtr(_) => "<function>".to_owned(),
            },
        }
    }

    /// A short type description of a value for error messages.
    pub fn describe(&self, value: &Value) -> &'static str {
        match value {
            Value::Unassigned => "Unassigned",
            Value::Nil { .. } => "nil",
            Value::Int(_) => "Integer",
            Value::Float(_) => "Float",
            Value::Bool(_) => "Boolean",
            Value::Enum { .. } => "enum",
            Value::Subrange { .. } => "subrange",
            Value::ClassRef(_) => "class reference",
            Value::Interface { .. } => "interface",
            Value::TypeInfo(_) => "type",
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Str(_) => "String",
                HeapData::Array(_) => "array",
                HeapData::Set(_) => "set",
                HeapData::Record(_) => "record",
                HeapData::Object(_) => "object",
                HeapData::FuncPtr(_) => "function pointer",
            },
        }
    }

    /// The runtime class of an object or interface value.
    pub fn value_class(&self, value: &Value) -> Option<ClassId> {
        match value {
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Object(inst) => Some(inst.class),
                _ => None,
            },
            Value::Interface { obj, .. } => match self.heap.get(*obj) {
                HeapData::Object(inst) => Some(inst.class),
                _ => None,
            },
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Expression dispatch
    // ------------------------------------------------------------------

    pub fn eval(&mut self, e: &ExprLoc) -> RunResult<Value> {
        self.eval_hint(e, None)
    }

    /// Evaluates an expression with an optional type context for anonymous
    /// literals.
    pub fn eval_hint(&mut self, e: &ExprLoc, hint: Option<TypeId>) -> RunResult<Value> {
        let pos = e.pos;
        match &e.expr {
            Expr::IntLit(v) => Ok(Value::Int(*v)),
            Expr::FloatLit(v) => Ok(Value::Float(*v)),
            Expr::BoolLit(v) => Ok(Value::Bool(*v)),
            Expr::StrLit(s) => {
                let id = self.alloc(HeapData::Str(s.clone()), pos)?;
                Ok(Value::Ref(id))
            }
            Expr::NilLit => Ok(Value::Nil { class: None }),
            Expr::BracketLit(elems) => self.eval_bracket_literal(elems, hint, pos),
            Expr::RecordLit(fields) => self.eval_record_literal(fields, hint, pos),
            Expr::Name(id) => self.eval_name(id),
            Expr::Member { object, name } => {
                let static_class = self.static_class_hint(object);
                let objv = self.eval(object)?;
                let result = self.eval_member(&objv, name, pos, static_class);
                self.discard(objv)?;
                result
            }
            Expr::Index { object, indexes } => {
                let objv = self.eval(object)?;
                let result = self.eval_index(&objv, indexes, pos);
                self.discard(objv)?;
                result
            }
            Expr::Call { callee, args } => self.eval_call(callee, args, pos),
            Expr::Unary { op, operand } => {
                let v = self.eval(operand)?;
                self.eval_unary(*op, v, pos)
            }
            Expr::Binary { left, op, right } => self.eval_binary(*op, left, right, pos),
            Expr::IfExpr {
                cond,
                then_branch,
                else_branch,
            } => {
                let c = self.eval(cond)?;
                let taken = c.is_truthy(&self.heap);
                self.discard(c)?;
                if taken {
                    self.eval_hint(then_branch, hint)
                } else if let Some(else_branch) = else_branch {
                    self.eval_hint(else_branch, hint)
                } else {
                    // No else branch: the zero value of the expression's
                    // declared type, or Unassigned without a context.
                    match hint {
                        Some(typ) => self
                            .typereg
                            .default_value(typ, &mut self.heap)
                            .map_err(|err| RunError::from_resource(err, pos)),
                        None => Ok(Value::Unassigned),
                    }
                }
            }
            Expr::Is { object, target } => {
                let objv = self.eval(object)?;
                let result = self.eval_is(&objv, target, pos);
                self.discard(objv)?;
                result
            }
            Expr::As { object, target } => {
                let objv = self.eval(object)?;
                self.eval_as(objv, target, pos)
            }
            Expr::Implements { object, target } => {
                let objv = self.eval(object)?;
                let result = self.eval_implements(&objv, target, pos);
                self.discard(objv)?;
                result
            }
            Expr::NewObject { class_name, args } => self.eval_new_object(class_name, args, pos),
            Expr::NewArray { elem_type, dims } => self.eval_new_array(elem_type, dims, pos),
            Expr::AddressOf { target } => self.eval_address_of(target, pos),
            Expr::Lambda(fid) => {
                let env = self.scopes.current();
                self.scopes.retain(env);
                let id = self.alloc(
                    HeapData::FuncPtr(FuncPtrObj {
                        target: FuncTarget::Lambda(*fid),
                        bound_self: None,
                        env: Some(env),
                    }),
                    pos,
                )?;
                Ok(Value::Ref(id))
            }
            Expr::Inherited { name, args } => self.eval_inherited(name.as_ref(), args, pos),
            Expr::OldValue(index) => {
                let Some(frame_scope) = self.scopes.current_frame() else {
                    return Err(RunError::fatal("'old' outside of a call frame", pos));
                };
                let frame = self.scopes.scope(frame_scope).frame.as_ref().expect("frame scope");
                let value = frame
                    .old_values
                    .get(*index as usize)
                    .expect("old capture index out of range");
                let copy = match value {
                    Value::Ref(id) => Value::Ref(*id),
                    Value::Interface { iface, obj } => Value::Interface {
                        iface: *iface,
                        obj: *obj,
                    },
                    other => other.clone_immediate(),
                };
                // Re-count the copy we just made.
                Ok(match copy {
                    Value::Ref(id) if !self.heap.is_object(id) => {
                        self.heap.inc_ref(id);
                        Value::Ref(id)
                    }
                    Value::Interface { iface, obj } => {
                        self.heap.inc_ref(obj);
                        Value::Interface { iface, obj }
                    }
                    other => other,
                })
            }
        }
    }

    // ------------------------------------------------------------------
    // Name resolution
    // ------------------------------------------------------------------

    /// Resolves a bare identifier.
    ///
    /// Order: innermost scopes outward (with `with`-object members and the
    /// enclosing method's `Self` members checked at their scope level), then
    /// enum constants, class and type names, and finally parameterless
    /// function or builtin calls.
    pub fn eval_name(&mut self, id: &Identifier) -> RunResult<Value> {
        let name = id.name;
        let pos = id.pos;
        let chain: Vec<ScopeId> = self.scopes.chain(self.scopes.current()).collect();
        for sid in chain {
            if self.scopes.scope(sid).has(name) {
                return self.read_binding_at(sid, name, pos);
            }
            if let Some(withv) = self.scopes.scope(sid).with_object.as_ref().map(shallow)
                && let Some(v) = self.try_member_read(&withv, name, pos, None)?
            {
                return Ok(v);
            }
            if self.scopes.scope(sid).frame.is_some()
                && let Some(v) = self.try_self_member(sid, name, pos)?
            {
                return Ok(v);
            }
        }
        if let Some((typ, ordinal)) = self.typereg.enum_const(name) {
            return Ok(Value::Enum { typ, ordinal });
        }
        if let Some(cid) = self.classes.lookup_class(name) {
            return Ok(Value::ClassRef(cid));
        }
        if let Some(tid) = self.typereg.lookup(name) {
            return Ok(Value::TypeInfo(tid));
        }
        if let Some(iid) = self.classes.lookup_interface(name) {
            return Ok(Value::TypeInfo(self.classes.interface(iid).typ));
        }
        if self.func_table.contains_key(&name) {
            // A bare function name is a parameterless call.
            return self.call_named_function(name, &[], pos);
        }
        if let Some(&builtin) = self.builtin_table.get(&name) {
            return self.call_builtin_with_exprs(builtin, &[], pos);
        }
        Err(RunError::fatal(
            format!("unknown name '{}'", self.interns.get(name)),
            pos,
        ))
    }

    /// Reads a binding found at `scope`, following `var`-parameter handles
    /// and evaluating `lazy` thunks.
    pub fn read_binding_at(&mut self, scope: ScopeId, name: Symbol, pos: CodeLoc) -> RunResult<Value> {
        enum Found {
            Plain(Value),
            Place(PlaceRef),
            Thunk(ExprLoc, ScopeId),
            External,
        }
        let found = match self.scopes.scope(scope).binding(name) {
            Some(Binding::Value { value, .. }) => Found::Plain(shallow(value)),
            Some(Binding::VarParam { place, .. }) => Found::Place(*place),
            Some(Binding::Lazy { expr, scope }) => Found::Thunk(expr.clone(), *scope),
            Some(Binding::External) => Found::External,
            None => {
                return Err(RunError::fatal(
                    format!("unbound name '{}'", self.interns.get(name)),
                    pos,
                ));
            }
        };
        match found {
            Found::Plain(v) => Ok(self.recount(v)),
            Found::Place(place) => self.read_place(place, pos),
            Found::Thunk(expr, caller_scope) => {
                // Lazy parameters evaluate on every read, in the caller's
                // scope chain.
                self.scopes.enter_at(caller_scope);
                let result = self.eval(&expr);
                self.scopes.leave_at();
                result
            }
            Found::External => self.read_external(name, pos),
        }
    }

    /// Adds a reference for a shallow copy produced from a stored value.
    pub fn recount(&mut self, value: Value) -> Value {
        match value {
            Value::Ref(id) => {
                if !self.heap.is_object(id) {
                    self.heap.inc_ref(id);
                }
                Value::Ref(id)
            }
            Value::Interface { iface, obj } => {
                self.heap.inc_ref(obj);
                Value::Interface { iface, obj }
            }
            other => other,
        }
    }

    fn read_external(&mut self, name: Symbol, pos: CodeLoc) -> RunResult<Value> {
        let key = self.interns.norm(name).to_owned();
        let Some(obj) = self.externals.read(&key) else {
            return Err(self.raise(
                StaticSymbols::EExternalError,
                format!("Unsupported external variable access: {}", self.interns.get(name)),
                pos,
            ));
        };
        self.value_from_object(&obj, pos)
    }

    pub fn write_external(&mut self, name: Symbol, value: Value, pos: CodeLoc) -> RunResult<()> {
        let obj = self.object_from_value(&value);
        self.discard(value)?;
        if self.externals.write(&self.interns.norm(name).to_owned(), obj) {
            Ok(())
        } else {
            Err(self.raise(
                StaticSymbols::EExternalError,
                format!("Unsupported external variable assignment: {}", self.interns.get(name)),
                pos,
            ))
        }
    }

    /// Resolves a bare name against the enclosing method's receiver: fields,
    /// properties, methods, class variables, constants, and class methods of
    /// the defining class.
    fn try_self_member(&mut self, frame_scope: ScopeId, name: Symbol, pos: CodeLoc) -> RunResult<Option<Value>> {
        let Some(defining) = self
            .scopes
            .scope(frame_scope)
            .frame
            .as_ref()
            .and_then(|f| f.defining_class)
        else {
            return Ok(None);
        };
        let self_sym = Symbol::from(StaticSymbols::SelfName);
        if self.scopes.scope(frame_scope).has(self_sym) {
            let selfv = match self.scopes.scope(frame_scope).binding(self_sym) {
                Some(Binding::Value { value, .. }) => shallow(value),
                _ => return Ok(None),
            };
            return self.try_member_read(&selfv, name, pos, Some(defining));
        }
        // Class methods have no Self object; resolve against the class.
        self.try_member_read(&Value::ClassRef(defining), name, pos, None)
    }

    // ------------------------------------------------------------------
    // Places (assignable locations)
    // ------------------------------------------------------------------

    /// Resolves an expression to an assignable place for `var`/`out`
    /// parameters.
    pub fn resolve_place(&mut self, e: &ExprLoc) -> RunResult<(PlaceRef, TypeId)> {
        let pos = e.pos;
        match &e.expr {
            Expr::Name(id) => {
                let chain: Vec<ScopeId> = self.scopes.chain(self.scopes.current()).collect();
                for sid in chain {
                    match self.scopes.scope(sid).binding(id.name) {
                        Some(Binding::Value { typ, constant, .. }) => {
                            if *constant {
                                return Err(RunError::fatal(
                                    format!("cannot pass constant '{}' as var parameter", self.interns.get(id.name)),
                                    pos,
                                ));
                            }
                            return Ok((
                                PlaceRef::Binding {
                                    scope: sid,
                                    name: id.name,
                                },
                                *typ,
                            ));
                        }
                        Some(Binding::VarParam { place, typ }) => return Ok((*place, *typ)),
                        Some(Binding::Lazy { .. } | Binding::External) => {
                            return Err(RunError::fatal(
                                format!("'{}' is not an assignable place", self.interns.get(id.name)),
                                pos,
                            ));
                        }
                        None => {}
                    }
                    // Fields of Self are assignable places.
                    if self.scopes.scope(sid).frame.is_some()
                        && let Some((obj, class)) = self.current_self_object(sid)
                        && self.classes.field_type(class, id.name).is_some()
                    {
                        let typ = self.classes.field_type(class, id.name).expect("checked");
                        return Ok((PlaceRef::Field { obj, name: id.name }, typ));
                    }
                }
                Err(RunError::fatal(
                    format!("'{}' is not an assignable place", self.interns.get(id.name)),
                    pos,
                ))
            }
            Expr::Member { object, name } => {
                let objv = self.eval(object)?;
                let result = (|this: &mut Self| match &objv {
                    Value::Ref(id) => match this.heap.get(*id) {
                        HeapData::Object(inst) => {
                            let class = inst.class;
                            match this.classes.field_type(class, name.name) {
                                Some(typ) => Ok((
                                    PlaceRef::Field {
                                        obj: *id,
                                        name: name.name,
                                    },
                                    typ,
                                )),
                                None => match this.classes.find_class_var(class, name.name) {
                                    Some(owner) => {
                                        let typ = this.classes.class(owner).class_vars[&name.name].0;
                                        Ok((
                                            PlaceRef::ClassVar {
                                                class: owner,
                                                name: name.name,
                                            },
                                            typ,
                                        ))
                                    }
                                    None => Err(RunError::fatal("member is not an assignable place", pos)),
                                },
                            }
                        }
                        HeapData::Record(rec) => {
                            let typ = this.record_field_type(rec.typ, name.name).unwrap_or(TypeId::VARIANT);
                            Ok((
                                PlaceRef::RecordField {
                                    rec: *id,
                                    name: name.name,
                                },
                                typ,
                            ))
                        }
                        _ => Err(RunError::fatal("expression is not an assignable place", pos)),
                    },
                    Value::ClassRef(cid) => match this.classes.find_class_var(*cid, name.name) {
                        Some(owner) => {
                            let typ = this.classes.class(owner).class_vars[&name.name].0;
                            Ok((
                                PlaceRef::ClassVar {
                                    class: owner,
                                    name: name.name,
                                },
                                typ,
                            ))
                        }
                        None => Err(RunError::fatal("member is not an assignable place", pos)),
                    },
                    _ => Err(RunError::fatal("expression is not an assignable place", pos)),
                })(self);
                self.discard(objv)?;
                result
            }
            Expr::Index { object, indexes } => {
                let objv = self.eval(object)?;
                if indexes.len() != 1 {
                    self.discard(objv)?;
                    return Err(RunError::fatal("multi-dimensional index is not an assignable place", pos));
                }
                let index = self.eval(&indexes[0])?;
                let result = match (&objv, index.as_int()) {
                    (Value::Ref(id), Some(i)) if matches!(self.heap.get(*id), HeapData::Array(_)) => {
                        let HeapData::Array(arr) = self.heap.get(*id) else {
                            unreachable!()
                        };
                        let elem = arr.elem;
                        Ok((PlaceRef::Element { arr: *id, index: i }, elem))
                    }
                    _ => Err(RunError::fatal("expression is not an assignable place", pos)),
                };
                self.discard(index)?;
                self.discard(objv)?;
                result
            }
            _ => Err(RunError::fatal("expression is not an assignable place", pos)),
        }
    }

    /// The receiver object and defining class of the frame at `scope`.
    fn current_self_object(&self, frame_scope: ScopeId) -> Option<(HeapId, ClassId)> {
        let frame = self.scopes.scope(frame_scope).frame.as_ref()?;
        let class = frame.defining_class?;
        let self_sym = Symbol::from(StaticSymbols::SelfName);
        match self.scopes.scope(frame_scope).binding(self_sym) {
            Some(Binding::Value {
                value: Value::Ref(id), ..
            }) => Some((*id, class)),
            _ => None,
        }
    }

    /// The statically declared class of a receiver expression, when its
    /// declared type is cheaply known (used for reintroduce-aware dispatch).
    pub fn static_class_hint(&mut self, e: &ExprLoc) -> Option<ClassId> {
        let typ = self.assign_target_hint(e)?;
        match self.typereg.kind(typ) {
            TypeKind::Class(cid) => Some(*cid),
            _ => None,
        }
    }

    fn record_field_type(&self, rec_typ: TypeId, name: Symbol) -> Option<TypeId> {
        match self.typereg.kind(rec_typ) {
            TypeKind::Record { fields, .. } => fields.iter().find(|(n, _)| *n == name).map(|(_, t)| *t),
            _ => None,
        }
    }

    /// Reads through a place reference.
    pub fn read_place(&mut self, place: PlaceRef, pos: CodeLoc) -> RunResult<Value> {
        match place {
            PlaceRef::Binding { scope, name } => self.read_binding_at(scope, name, pos),
            PlaceRef::Field { obj, name } => {
                let v = {
                    let HeapData::Object(inst) = self.heap.get(obj) else {
                        return Err(RunError::fatal("field access on non-object", pos));
                    };
                    if inst.destroyed {
                        return Err(self.raise(StaticSymbols::EObjectDestroyed, "Object already destroyed", pos));
                    }
                    inst.fields.get(&name).map(shallow)
                };
                match v {
                    Some(v) => Ok(self.recount(v)),
                    None => Err(RunError::fatal("unknown field", pos)),
                }
            }
            PlaceRef::Element { arr, index } => {
                let v = {
                    let HeapData::Array(a) = self.heap.get(arr) else {
                        return Err(RunError::fatal("index into non-array", pos));
                    };
                    a.offset_of(index).map(|off| shallow(&a.values[off]))
                };
                match v {
                    Some(v) => Ok(self.recount(v)),
                    None => Err(self.raise(
                        StaticSymbols::EIndexOutOfRange,
                        format!("Array index {index} out of bounds"),
                        pos,
                    )),
                }
            }
            PlaceRef::RecordField { rec, name } => {
                let v = {
                    let HeapData::Record(r) = self.heap.get(rec) else {
                        return Err(RunError::fatal("field access on non-record", pos));
                    };
                    r.get(name).map(shallow)
                };
                match v {
                    Some(v) => Ok(self.recount(v)),
                    None => Err(RunError::fatal("unknown record field", pos)),
                }
            }
            PlaceRef::ClassVar { class, name } => {
                let v = self.classes.class(class).class_vars.get(&name).map(|(_, v)| shallow(v));
                match v {
                    Some(v) => Ok(self.recount(v)),
                    None => Err(RunError::fatal("unknown class variable", pos)),
                }
            }
        }
    }

    /// Writes a value through a place reference, with coercion to the
    /// place's declared type and the reference-count update protocol.
    pub fn write_place(&mut self, place: PlaceRef, typ: TypeId, value: Value, pos: CodeLoc) -> RunResult<()> {
        match place {
            PlaceRef::Binding { scope, name } => self.assign_binding(scope, name, value, pos),
            PlaceRef::Field { obj, name } => {
                let value = self.coerce_value(value, typ, pos)?;
                let value = self.retain_for_store(value);
                let old = {
                    let HeapData::Object(inst) = self.heap.get_mut(obj) else {
                        return Err(RunError::fatal("field access on non-object", pos));
                    };
                    match inst.fields.get_mut(&name) {
                        Some(slot) => std::mem::replace(slot, value),
                        None => return Err(RunError::fatal("unknown field", pos)),
                    }
                };
                self.release_owned_value(old)
            }
            PlaceRef::Element { arr, index } => {
                let value = self.coerce_value(value, typ, pos)?;
                let value = self.retain_for_store(value);
                let old = {
                    let HeapData::Array(a) = self.heap.get_mut(arr) else {
                        return Err(RunError::fatal("index into non-array", pos));
                    };
                    match a.offset_of(index) {
                        Some(off) => std::mem::replace(&mut a.values[off], value),
                        None => {
                            let msg = format!("Array index {index} out of bounds");
                            let mut queue = ReleaseQueue::new();
                            value.release_with_heap(&mut self.heap, &mut queue);
                            self.drain(queue)?;
                            return Err(self.raise(StaticSymbols::EIndexOutOfRange, msg, pos));
                        }
                    }
                };
                self.release_owned_value(old)
            }
            PlaceRef::RecordField { rec, name } => {
                let value = self.coerce_value(value, typ, pos)?;
                let value = self.retain_for_store(value);
                let old = {
                    let HeapData::Record(r) = self.heap.get_mut(rec) else {
                        return Err(RunError::fatal("field access on non-record", pos));
                    };
                    match r.get_mut(name) {
                        Some(slot) => std::mem::replace(slot, value),
                        None => return Err(RunError::fatal("unknown record field", pos)),
                    }
                };
                self.release_owned_value(old)
            }
            PlaceRef::ClassVar { class, name } => {
                let value = self.coerce_value(value, typ, pos)?;
                let value = self.retain_for_store(value);
                let old = {
                    match self.classes.class_mut(class).class_vars.get_mut(&name) {
                        Some((_, slot)) => std::mem::replace(slot, value),
                        None => return Err(RunError::fatal("unknown class variable", pos)),
                    }
                };
                self.release_owned_value(old)
            }
        }
    }

    /// Assigns to a named binding: coercion, subrange validation, Variant
    /// boxing, and the object reference-count protocol (release old,
    /// retain new).
    pub fn assign_binding(&mut self, scope: ScopeId, name: Symbol, value: Value, pos: CodeLoc) -> RunResult<()> {
        enum Kind {
            Plain { typ: TypeId, constant: bool },
            Place { place: PlaceRef, typ: TypeId },
            External,
            NotAssignable,
        }
        let kind = match self.scopes.scope(scope).binding(name) {
            Some(Binding::Value { typ, constant, .. }) => Kind::Plain {
                typ: *typ,
                constant: *constant,
            },
            Some(Binding::VarParam { place, typ }) => Kind::Place {
                place: *place,
                typ: *typ,
            },
            Some(Binding::External) => Kind::External,
            Some(Binding::Lazy { .. }) | None => Kind::NotAssignable,
        };
        match kind {
            Kind::Plain { typ, constant } => {
                if constant {
                    self.discard(value)?;
                    return Err(RunError::fatal(
                        format!("cannot assign to constant '{}'", self.interns.get(name)),
                        pos,
                    ));
                }
                let value = self.coerce_value(value, typ, pos)?;
                let value = self.retain_for_store(value);
                let old = match self.scopes.scope_mut(scope).binding_mut(name) {
                    Some(Binding::Value { value: slot, .. }) => std::mem::replace(slot, value),
                    _ => unreachable!("binding kind checked above"),
                };
                self.release_owned_value(old)
            }
            Kind::Place { place, typ } => self.write_place(place, typ, value, pos),
            Kind::External => self.write_external(name, value, pos),
            Kind::NotAssignable => {
                self.discard(value)?;
                Err(RunError::fatal(
                    format!("'{}' is not assignable", self.interns.get(name)),
                    pos,
                ))
            }
        }
    }

    // ------------------------------------------------------------------
    // Coercion
    // ------------------------------------------------------------------

    /// Applies the implicit conversions permitted by a declared target type:
    /// integer→float promotion, subrange bounds checks, Variant boxing,
    /// class upcasts, interface wrapping, and the value-copy semantics of
    /// records and sets. Consumes `value`; the result is a temporary.
    pub fn coerce_value(&mut self, value: Value, target: TypeId, pos: CodeLoc) -> RunResult<Value> {
        match self.typereg.kind(target).clone() {
            // A Variant site stores the inner value directly.
            TypeKind::Variant => Ok(value),
            TypeKind::Integer => match value.as_int() {
                Some(v) => {
                    self.discard(value)?;
                    Ok(Value::Int(v))
                }
                None => self.type_mismatch(value, target, pos),
            },
            TypeKind::Float => match value.as_number() {
                Some(n) => {
                    self.discard(value)?;
                    Ok(Value::Float(n.as_f64()))
                }
                None => self.type_mismatch(value, target, pos),
            },
            TypeKind::Boolean => match value.as_bool() {
                Some(v) => {
                    self.discard(value)?;
                    Ok(Value::Bool(v))
                }
                None => self.type_mismatch(value, target, pos),
            },
            TypeKind::String => match &value {
                Value::Ref(id) if matches!(self.heap.get(*id), HeapData::Str(_)) => Ok(value),
                Value::Unassigned => {
                    let id = self.alloc(HeapData::Str(String::new()), pos)?;
                    Ok(Value::Ref(id))
                }
                _ => self.type_mismatch(value, target, pos),
            },
            TypeKind::Subrange { lo, hi, .. } => match value.as_int() {
                Some(v) => {
                    self.discard(value)?;
                    if v < lo || v > hi {
                        return Err(self.raise(
                            StaticSymbols::ERangeError,
                            format!("Range check error: {v} not in {lo}..{hi}"),
                            pos,
                        ));
                    }
                    Ok(Value::Subrange { typ: target, value: v })
                }
                None => self.type_mismatch(value, target, pos),
            },
            TypeKind::Enum(_) => match &value {
                Value::Enum { typ, .. } if *typ == target => Ok(value),
                Value::Int(v) => Ok(Value::Enum {
                    typ: target,
                    ordinal: *v,
                }),
                _ => self.type_mismatch(value, target, pos),
            },
            TypeKind::Class(cid) => match &value {
                Value::Nil { .. } => Ok(Value::Nil { class: Some(cid) }),
                Value::Ref(id) if self.heap.is_object(*id) => {
                    let class = self.value_class(&value).expect("object");
                    if self.classes.is_ancestor(cid, class) {
                        Ok(value)
                    } else {
                        let msg = format!(
                            "Cannot assign {} to {}",
                            self.interns.get(self.classes.class(class).name),
                            self.interns.get(self.classes.class(cid).name)
                        );
                        self.discard(value)?;
                        Err(self.raise(StaticSymbols::EInvalidCast, msg, pos))
                    }
                }
                Value::Interface { obj, .. } => {
                    let class = self.value_class(&value).expect("interface wraps object");
                    if self.classes.is_ancestor(cid, class) {
                        let obj = *obj;
                        // The interface's count transfers to nothing: the
                        // result is a temporary object reference.
                        let result = Value::Ref(obj);
                        self.heap.dec_object_ref(obj);
                        Ok(result)
                    } else {
                        self.discard(value)?;
                        Err(self.raise(StaticSymbols::EInvalidCast, "Invalid interface to class cast", pos))
                    }
                }
                _ => self.type_mismatch(value, target, pos),
            },
            TypeKind::Interface(iid) => match &value {
                Value::Nil { .. } => Ok(Value::Nil { class: None }),
                Value::Interface { iface, obj } => {
                    if self.classes.iface_extends(*iface, iid) {
                        Ok(value)
                    } else {
                        self.discard(value)?;
                        Err(self.raise(StaticSymbols::EInvalidCast, "Incompatible interfaces", pos))
                    }
                }
                Value::Ref(id) if self.heap.is_object(*id) => {
                    let class = self.value_class(&value).expect("object");
                    if self.classes.class_implements(class, iid) {
                        let obj = *id;
                        self.heap.inc_ref(obj);
                        Ok(Value::Interface { iface: iid, obj })
                    } else {
                        let msg = format!(
                            "{} does not implement {}",
                            self.interns.get(self.classes.class(class).name),
                            self.interns.get(self.classes.interface(iid).name)
                        );
                        self.discard(value)?;
                        Err(self.raise(StaticSymbols::EInvalidCast, msg, pos))
                    }
                }
                _ => self.type_mismatch(value, target, pos),
            },
            TypeKind::ClassOf(cid) => match &value {
                Value::Nil { .. } => Ok(Value::Nil { class: Some(cid) }),
                Value::ClassRef(c) if self.classes.is_ancestor(cid, *c) => Ok(value),
                _ => self.type_mismatch(value, target, pos),
            },
            TypeKind::Array { .. } => match &value {
                Value::Ref(id) if matches!(self.heap.get(*id), HeapData::Array(_)) => Ok(value),
                _ => self.type_mismatch(value, target, pos),
            },
            TypeKind::Set { elem } => match &value {
                Value::Ref(id) if matches!(self.heap.get(*id), HeapData::Set(_)) => {
                    // Sets have value semantics: storing copies the storage.
                    let HeapData::Set(set) = self.heap.get(*id) else {
                        unreachable!()
                    };
                    let mut copy = set.clone();
                    copy.elem = elem;
                    let copy_id = self.alloc(HeapData::Set(copy), pos)?;
                    self.discard(value)?;
                    Ok(Value::Ref(copy_id))
                }
                _ => self.type_mismatch(value, target, pos),
            },
            TypeKind::Record { .. } => match &value {
                Value::Ref(id) if matches!(self.heap.get(*id), HeapData::Record(_)) => {
                    // Records have value semantics: storing copies every field.
                    let copy = self.copy_record(*id, target, pos)?;
                    self.discard(value)?;
                    Ok(copy)
                }
                _ => self.type_mismatch(value, target, pos),
            },
            TypeKind::FuncPtr => match &value {
                Value::Nil { .. } => Ok(value),
                Value::Ref(id) if matches!(self.heap.get(*id), HeapData::FuncPtr(_)) => Ok(value),
                _ => self.type_mismatch(value, target, pos),
            },
        }
    }

    fn type_mismatch(&mut self, value: Value, target: TypeId, pos: CodeLoc) -> RunResult<Value> {
        let msg = format!(
            "Cannot assign {} to {}",
            self.describe(&value),
            self.typereg.type_name(target, self.interns, &self.classes)
        );
        self.discard(value)?;
        Err(self.raise(StaticSymbols::EInvalidCast, msg, pos))
    }

    /// Deep-copies a record (field-by-field, retaining object references).
    pub fn copy_record(&mut self, id: HeapId, typ: TypeId, pos: CodeLoc) -> RunResult<Value> {
        let shallow_fields: Vec<(Symbol, Value)> = {
            let HeapData::Record(rec) = self.heap.get(id) else {
                return Err(RunError::fatal("copy of non-record", pos));
            };
            rec.fields.iter().map(|(n, v)| (*n, shallow(v))).collect()
        };
        let mut fields = indexmap::IndexMap::with_capacity(shallow_fields.len());
        for (name, v) in shallow_fields {
            let v = self.recount(v);
            let v = self.retain_for_store(v);
            fields.insert(name, v);
        }
        let copy = self.alloc(HeapData::Record(RecordObj::new(typ, fields)), pos)?;
        Ok(Value::Ref(copy))
    }

    // ------------------------------------------------------------------
    // Member access
    // ------------------------------------------------------------------

    /// Member read; unknown members are an error here.
    pub fn eval_member(
        &mut self,
        objv: &Value,
        name: &Identifier,
        pos: CodeLoc,
        static_class: Option<ClassId>,
    ) -> RunResult<Value> {
        match self.try_member_read(objv, name.name, pos, static_class)? {
            Some(v) => Ok(v),
            None => Err(RunError::fatal(
                format!(
                    "unknown member '{}' on {}",
                    self.interns.get(name.name),
                    self.describe(objv)
                ),
                pos,
            )),
        }
    }

    /// Attempts to read a member; `Ok(None)` means the name does not exist
    /// on this value (callers fall through to other resolution rules).
    /// Parameterless methods are invoked.
    pub fn try_member_read(
        &mut self,
        objv: &Value,
        name: Symbol,
        pos: CodeLoc,
        static_class: Option<ClassId>,
    ) -> RunResult<Option<Value>> {
        let class_name_sym = Symbol::from(StaticSymbols::ClassName);
        let class_type_sym = Symbol::from(StaticSymbols::ClassType);
        let free_sym = Symbol::from(StaticSymbols::Free);
        let destroy_sym = Symbol::from(StaticSymbols::Destroy);
        match objv {
            Value::Ref(id) => {
                let id = *id;
                match self.heap.get(id) {
                    HeapData::Object(inst) => {
                        if inst.destroyed {
                            return Err(self.raise(StaticSymbols::EObjectDestroyed, "Object already destroyed", pos));
                        }
                        let class = inst.class;
                        if let Some(v) = inst.fields.get(&name).map(shallow) {
                            return Ok(Some(self.recount(v)));
                        }
                        if let Some(prop) = self.classes.find_property(class, name) {
                            return self.property_get(objv, class, prop, &[], pos).map(Some);
                        }
                        if name == class_name_sym {
                            let text = self.interns.get(self.classes.class(class).name).to_owned();
                            let sid = self.alloc(HeapData::Str(text), pos)?;
                            return Ok(Some(Value::Ref(sid)));
                        }
                        if name == class_type_sym {
                            return Ok(Some(Value::ClassRef(class)));
                        }
                        if name == free_sym || name == destroy_sym {
                            self.destroy_explicit(id, pos)?;
                            return Ok(Some(Value::Unassigned));
                        }
                        let static_from = static_class.unwrap_or(class);
                        if self.classes.dispatch_instance(static_from, class, name, 0).is_some()
                            || self.classes.dispatch_class_method(class, name, 0).is_some()
                        {
                            return self.call_member(objv, name, &[], pos, static_class).map(Some);
                        }
                        if let Some(owner) = self.classes.find_class_var(class, name) {
                            let v = shallow(&self.classes.class(owner).class_vars[&name].1);
                            return Ok(Some(self.recount(v)));
                        }
                        if let Some(v) = self.classes.class_const(class, name).map(shallow) {
                            return Ok(Some(self.recount(v)));
                        }
                        // A method that exists only at other arities still
                        // resolves; the call machinery reports arity errors.
                        if self.classes.find_method_any(class, name).is_some() {
                            return self.call_member(objv, name, &[], pos, static_class).map(Some);
                        }
                        Ok(None)
                    }
                    HeapData::Record(rec) => {
                        let v = rec.get(name).map(shallow);
                        Ok(v.map(|v| self.recount(v)))
                    }
                    HeapData::Array(_) | HeapData::Str(_) | HeapData::Set(_) => {
                        // Method-call sugar on primitives routes to builtins:
                        // `a.Length`, `s.Length`, `a.Reverse`, ...
                        if let Some(&builtin) = self.builtin_table.get(&name)
                            && builtin.is_member_sugar()
                        {
                            let recv = self.recount(shallow(objv));
                            return crate::builtins::dispatch(self, builtin, vec![recv], pos).map(Some);
                        }
                        Ok(None)
                    }
                    HeapData::FuncPtr(_) => Ok(None),
                }
            }
            Value::ClassRef(cid) => {
                let cid = *cid;
                if name == class_name_sym {
                    let text = self.interns.get(self.classes.class(cid).name).to_owned();
                    let sid = self.alloc(HeapData::Str(text), pos)?;
                    return Ok(Some(Value::Ref(sid)));
                }
                if let Some(owner) = self.classes.find_class_var(cid, name) {
                    let v = shallow(&self.classes.class(owner).class_vars[&name].1);
                    return Ok(Some(self.recount(v)));
                }
                if let Some(v) = self.classes.class_const(cid, name).map(shallow) {
                    return Ok(Some(self.recount(v)));
                }
                if let Some(&nested) = self.classes.class(cid).nested.get(&name) {
                    return Ok(Some(Value::ClassRef(nested)));
                }
                if self.classes.dispatch_class_method(cid, name, 0).is_some()
                    || self.classes.lookup_constructor(cid, name, 0).is_some()
                    || name == Symbol::from(StaticSymbols::Create)
                {
                    return self.call_member(objv, name, &[], pos, None).map(Some);
                }
                Ok(None)
            }
            Value::Nil { class: Some(cid) } => {
                // Class members remain reachable through typed nil.
                let cid = *cid;
                if let Some(owner) = self.classes.find_class_var(cid, name) {
                    let v = shallow(&self.classes.class(owner).class_vars[&name].1);
                    return Ok(Some(self.recount(v)));
                }
                if let Some(v) = self.classes.class_const(cid, name).map(shallow) {
                    return Ok(Some(self.recount(v)));
                }
                if self.classes.dispatch_class_method(cid, name, 0).is_some() {
                    return self.call_member(&Value::ClassRef(cid), name, &[], pos, None).map(Some);
                }
                if name == free_sym {
                    // Free on nil is a no-op.
                    return Ok(Some(Value::Unassigned));
                }
                Err(self.raise(
                    StaticSymbols::EScriptError,
                    "Attempt to access a nil object",
                    pos,
                ))
            }
            Value::Nil { class: None } => {
                if name == free_sym {
                    return Ok(Some(Value::Unassigned));
                }
                Err(self.raise(
                    StaticSymbols::EScriptError,
                    "Attempt to access a nil object",
                    pos,
                ))
            }
            Value::Interface { iface, obj } => {
                let (iface, obj) = (*iface, *obj);
                let objv = Value::Ref(obj);
                if self.classes.iface_declares(iface, name) {
                    return self.try_member_read(&objv, name, pos, None);
                }
                if name == class_name_sym || name == class_type_sym {
                    return self.try_member_read(&objv, name, pos, None);
                }
                Ok(None)
            }
            Value::TypeInfo(typ) => {
                // Scoped enum access: `TColor.Red`.
                if let TypeKind::Enum(e) = self.typereg.kind(*typ)
                    && let Some(ordinal) = e.ordinal_of(name)
                {
                    return Ok(Some(Value::Enum { typ: *typ, ordinal }));
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Reads a property through its `read` specifier: a field name or a
    /// getter method.
    pub fn property_get(
        &mut self,
        objv: &Value,
        class: ClassId,
        prop: crate::class::PropertyMeta,
        index_args: &[Value],
        pos: CodeLoc,
    ) -> RunResult<Value> {
        let Some(read) = prop.read else {
            return Err(RunError::fatal(
                format!("property '{}' is write-only", self.interns.get(prop.name)),
                pos,
            ));
        };
        // Field specifier.
        if index_args.is_empty()
            && let Value::Ref(id) = objv
            && let HeapData::Object(inst) = self.heap.get(*id)
            && let Some(v) = inst.fields.get(&read).map(shallow)
        {
            return Ok(self.recount(v));
        }
        // Method specifier (instance or class method).
        let argc = index_args.len();
        if let Some(entry) = self.classes.dispatch_instance(class, class, read, argc) {
            let args: Vec<Value> = index_args.iter().map(|v| self.recount(shallow(v))).collect();
            return self.call_method_values(objv, entry, args, pos);
        }
        if let Some(entry) = self.classes.dispatch_class_method(class, read, argc) {
            let args: Vec<Value> = index_args.iter().map(|v| self.recount(shallow(v))).collect();
            return self.call_class_method_values(class, entry, args, pos);
        }
        Err(RunError::fatal(
            format!("unresolved property read specifier '{}'", self.interns.get(read)),
            pos,
        ))
    }

    /// Writes a property through its `write` specifier.
    pub fn property_set(
        &mut self,
        objv: &Value,
        class: ClassId,
        prop: crate::class::PropertyMeta,
        index_args: Vec<Value>,
        value: Value,
        pos: CodeLoc,
    ) -> RunResult<()> {
        let Some(write) = prop.write else {
            self.discard(value)?;
            return Err(RunError::fatal(
                format!("property '{}' is read-only", self.interns.get(prop.name)),
                pos,
            ));
        };
        // Field specifier.
        if index_args.is_empty()
            && let Value::Ref(id) = objv
            && self.heap.is_object(*id)
            && self.classes.field_type(class, write).is_some()
        {
            let typ = self.classes.field_type(class, write).expect("checked");
            return self.write_place(PlaceRef::Field { obj: *id, name: write }, typ, value, pos);
        }
        // Setter method: index args plus the new value.
        let argc = index_args.len() + 1;
        let mut args = index_args;
        args.push(value);
        if let Some(entry) = self.classes.dispatch_instance(class, class, write, argc) {
            let result = self.call_method_values(objv, entry, args, pos)?;
            return self.discard(result);
        }
        if let Some(entry) = self.classes.dispatch_class_method(class, write, argc) {
            let result = self.call_class_method_values(class, entry, args, pos)?;
            return self.discard(result);
        }
        Err(RunError::fatal(
            format!("unresolved property write specifier '{}'", self.interns.get(write)),
            pos,
        ))
    }

    // ------------------------------------------------------------------
    // Indexing
    // ------------------------------------------------------------------

    /// Index access: arrays (bounds-checked), strings (1-based), and default
    /// properties on objects.
    pub fn eval_index(&mut self, objv: &Value, indexes: &[ExprLoc], pos: CodeLoc) -> RunResult<Value> {
        match objv {
            Value::Ref(id) => {
                let id = *id;
                match self.heap.get(id) {
                    HeapData::Array(_) => {
                        // Multi-dimensional access drills through nested arrays.
                        let mut current = self.recount(shallow(objv));
                        for index_expr in indexes {
                            let index = self.eval(index_expr)?;
                            let next = self.index_array_once(&current, &index, index_expr.pos);
                            self.discard(index)?;
                            self.discard(current)?;
                            current = next?;
                        }
                        Ok(current)
                    }
                    HeapData::Str(_) => {
                        if indexes.len() != 1 {
                            return Err(RunError::fatal("strings take a single index", pos));
                        }
                        let index = self.eval(&indexes[0])?;
                        let i = index.as_int();
                        self.discard(index)?;
                        let Some(i) = i else {
                            return Err(self.raise(StaticSymbols::EIndexOutOfRange, "String index must be an integer", pos));
                        };
                        let HeapData::Str(s) = self.heap.get(id) else {
                            unreachable!()
                        };
                        // 1-based character indexing.
                        let ch = usize::try_from(i - 1)
                            .ok()
                            .and_then(|offset| s.chars().nth(offset));
                        match ch {
                            Some(c) => {
                                let sid = self.alloc(HeapData::Str(c.to_string()), pos)?;
                                Ok(Value::Ref(sid))
                            }
                            None => Err(self.raise(
                                StaticSymbols::EIndexOutOfRange,
                                format!("String index {i} out of bounds"),
                                pos,
                            )),
                        }
                    }
                    HeapData::Object(inst) => {
                        let class = inst.class;
                        let Some(prop) = self.classes.default_property(class) else {
                            return Err(self.raise(
                                StaticSymbols::EScriptError,
                                "Object has no default property",
                                pos,
                            ));
                        };
                        let mut index_args = Vec::with_capacity(indexes.len());
                        for e in indexes {
                            index_args.push(self.eval(e)?);
                        }
                        let result = self.property_get(objv, class, prop, &index_args, pos);
                        for v in index_args {
                            self.discard(v)?;
                        }
                        result
                    }
                    _ => Err(RunError::fatal(
                        format!("{} cannot be indexed", self.describe(objv)),
                        pos,
                    )),
                }
            }
            _ => Err(RunError::fatal(
                format!("{} cannot be indexed", self.describe(objv)),
                pos,
            )),
        }
    }

    fn index_array_once(&mut self, arrv: &Value, index: &Value, pos: CodeLoc) -> RunResult<Value> {
        let Value::Ref(id) = arrv else {
            return Err(RunError::fatal("index into non-array", pos));
        };
        let HeapData::Array(arr) = self.heap.get(*id) else {
            return Err(RunError::fatal("index into non-array", pos));
        };
        let Some(i) = index.as_int() else {
            return Err(self.raise(StaticSymbols::EIndexOutOfRange, "Array index must be an integer", pos));
        };
        match arr.offset_of(i) {
            Some(offset) => {
                let v = shallow(&arr.values[offset]);
                Ok(self.recount(v))
            }
            None => {
                let (low, high) = (arr.low(), arr.high());
                Err(self.raise(
                    StaticSymbols::EIndexOutOfRange,
                    format!("Array index {i} out of bounds [{low}..{high}]"),
                    pos,
                ))
            }
        }
    }

    // ------------------------------------------------------------------
    // is / as / implements
    // ------------------------------------------------------------------

    fn eval_is(&mut self, objv: &Value, target: &Identifier, pos: CodeLoc) -> RunResult<Value> {
        // nil is never `is`.
        if matches!(objv, Value::Nil { .. }) {
            return Ok(Value::Bool(false));
        }
        if let Some(cid) = self.classes.lookup_class(target.name) {
            let result = self
                .value_class(objv)
                .is_some_and(|class| self.classes.is_ancestor(cid, class));
            return Ok(Value::Bool(result));
        }
        if let Some(iid) = self.classes.lookup_interface(target.name) {
            let result = match objv {
                Value::Interface { iface, .. } => self.classes.iface_extends(*iface, iid),
                _ => self
                    .value_class(objv)
                    .is_some_and(|class| self.classes.class_implements(class, iid)),
            };
            return Ok(Value::Bool(result));
        }
        Err(RunError::fatal(
            format!("unknown type '{}' in 'is'", self.interns.get(target.name)),
            pos,
        ))
    }

    /// Checked downcast. Consumes `objv`.
    fn eval_as(&mut self, objv: Value, target: &Identifier, pos: CodeLoc) -> RunResult<Value> {
        if let Some(cid) = self.classes.lookup_class(target.name) {
            match &objv {
                Value::Nil { .. } => return Ok(Value::Nil { class: Some(cid) }),
                Value::Ref(id) if self.heap.is_object(*id) => {
                    let class = self.value_class(&objv).expect("object");
                    if self.classes.is_ancestor(cid, class) {
                        return Ok(objv);
                    }
                    let msg = format!(
                        "Cannot cast {} to {}",
                        self.interns.get(self.classes.class(class).name),
                        self.interns.get(self.classes.class(cid).name)
                    );
                    self.discard(objv)?;
                    return Err(self.raise(StaticSymbols::EInvalidCast, msg, pos));
                }
                Value::Interface { obj, .. } => {
                    let class = self.value_class(&objv).expect("interface wraps object");
                    if self.classes.is_ancestor(cid, class) {
                        let obj = *obj;
                        let result = Value::Ref(obj);
                        self.heap.dec_object_ref(obj);
                        return Ok(result);
                    }
                    self.discard(objv)?;
                    return Err(self.raise(StaticSymbols::EInvalidCast, "Invalid interface to class cast", pos));
                }
                _ => {}
            }
        }
        if let Some(iid) = self.classes.lookup_interface(target.name) {
            let target_typ = self.classes.interface(iid).typ;
            return self.coerce_value(objv, target_typ, pos);
        }
        if let Some(tid) = self.typereg.lookup(target.name) {
            // Variant `as T` extracts and converts the inner value.
            return self.variant_convert(objv, tid, pos);
        }
        self.discard(objv)?;
        Err(RunError::fatal(
            format!("unknown type '{}' in 'as'", self.interns.get(target.name)),
            pos,
        ))
    }

    /// Variant conversion for `as`: numeric conversions and string parsing.
    fn variant_convert(&mut self, value: Value, target: TypeId, pos: CodeLoc) -> RunResult<Value> {
        match self.typereg.kind(target) {
            TypeKind::Integer => match &value {
                Value::Float(f) => {
                    let f = *f;
                    self.discard(value)?;
                    Ok(Value::Int(f.trunc() as i64))
                }
                Value::Ref(id) if matches!(self.heap.get(*id), HeapData::Str(_)) => {
                    let HeapData::Str(s) = self.heap.get(*id) else {
                        unreachable!()
                    };
                    let parsed = s.trim().parse::<i64>();
                    let text = s.clone();
                    self.discard(value)?;
                    match parsed {
                        Ok(v) => Ok(Value::Int(v)),
                        Err(_) => Err(self.raise(
                            StaticSymbols::EConvertError,
                            format!("'{text}' is not a valid integer value"),
                            pos,
                        )),
                    }
                }
                _ => self.coerce_value(value, target, pos),
            },
            TypeKind::Float => match &value {
                Value::Ref(id) if matches!(self.heap.get(*id), HeapData::Str(_)) => {
                    let HeapData::Str(s) = self.heap.get(*id) else {
                        unreachable!()
                    };
                    let parsed = s.trim().parse::<f64>();
                    let text = s.clone();
                    self.discard(value)?;
                    match parsed {
                        Ok(v) => Ok(Value::Float(v)),
                        Err(_) => Err(self.raise(
                            StaticSymbols::EConvertError,
                            format!("'{text}' is not a valid floating point value"),
                            pos,
                        )),
                    }
                }
                _ => self.coerce_value(value, target, pos),
            },
            TypeKind::String => {
                let text = self.display(&value);
                self.discard(value)?;
                let sid = self.alloc(HeapData::Str(text), pos)?;
                Ok(Value::Ref(sid))
            }
            _ => self.coerce_value(value, target, pos),
        }
    }

    fn eval_implements(&mut self, objv: &Value, target: &Identifier, pos: CodeLoc) -> RunResult<Value> {
        let Some(iid) = self.classes.lookup_interface(target.name) else {
            return Err(RunError::fatal(
                format!("unknown interface '{}'", self.interns.get(target.name)),
                pos,
            ));
        };
        let class = match objv {
            Value::ClassRef(cid) => Some(*cid),
            _ => self.value_class(objv),
        };
        Ok(Value::Bool(
            class.is_some_and(|c| self.classes.class_implements(c, iid)),
        ))
    }

    // ------------------------------------------------------------------
    // new
    // ------------------------------------------------------------------

    fn eval_new_object(&mut self, class_name: &Identifier, args: &[ExprLoc], pos: CodeLoc) -> RunResult<Value> {
        let Some(cid) = self.classes.lookup_class(class_name.name) else {
            return Err(RunError::fatal(
                format!("unknown class '{}'", self.interns.get(class_name.name)),
                pos,
            ));
        };
        self.construct_object(cid, Symbol::from(StaticSymbols::Create), args, pos)
    }

    fn eval_new_array(&mut self, elem_type: &Identifier, dims: &[ExprLoc], pos: CodeLoc) -> RunResult<Value> {
        let Some(elem) = self.typereg.lookup(elem_type.name) else {
            return Err(RunError::fatal(
                format!("unknown type '{}'", self.interns.get(elem_type.name)),
                pos,
            ));
        };
        let mut lens = Vec::with_capacity(dims.len());
        for dim in dims {
            let v = self.eval(dim)?;
            let n = v.as_int();
            let is_int = matches!(v, Value::Int(_) | Value::Subrange { .. });
            self.discard(v)?;
            let Some(n) = n.filter(|_| is_int) else {
                return Err(self.raise(
                    StaticSymbols::ERangeError,
                    "Array dimension must be an integer",
                    dim.pos,
                ));
            };
            if n < 0 {
                return Err(self.raise(
                    StaticSymbols::ERangeError,
                    format!("Invalid array dimension {n}"),
                    dim.pos,
                ));
            }
            lens.push(usize::try_from(n).expect("checked non-negative"));
        }
        self.build_array_dims(elem, &lens, pos)
    }

    fn build_array_dims(&mut self, elem: TypeId, lens: &[usize], pos: CodeLoc) -> RunResult<Value> {
        let (&len, rest) = lens.split_first().expect("at least one dimension");
        // The element type of this level: nested arrays for inner dimensions.
        let elem_here = if rest.is_empty() {
            elem
        } else {
            let mut inner = elem;
            for _ in 0..rest.len() - 1 {
                inner = self.typereg.intern_array(inner, None);
            }
            self.typereg.intern_array(inner, None)
        };
        let mut values = Vec::with_capacity(len);
        for _ in 0..len {
            let v = if rest.is_empty() {
                self.typereg
                    .default_value(elem, &mut self.heap)
                    .map_err(|e| RunError::from_resource(e, pos))?
            } else {
                let inner = self.build_array_dims(elem, rest, pos)?;
                self.retain_for_store(inner)
            };
            values.push(v);
        }
        let id = self.alloc(HeapData::Array(ArrayObj::dynamic(elem_here, values)), pos)?;
        Ok(Value::Ref(id))
    }

    // ------------------------------------------------------------------
    // Address-of
    // ------------------------------------------------------------------

    fn eval_address_of(&mut self, target: &ExprLoc, pos: CodeLoc) -> RunResult<Value> {
        match &target.expr {
            Expr::Name(id) => {
                // A binding already holding a function pointer is copied.
                let chain: Vec<ScopeId> = self.scopes.chain(self.scopes.current()).collect();
                for sid in chain {
                    if self.scopes.scope(sid).has(id.name) {
                        let v = self.read_binding_at(sid, id.name, pos)?;
                        if let Value::Ref(vid) = &v
                            && matches!(self.heap.get(*vid), HeapData::FuncPtr(_))
                        {
                            return Ok(v);
                        }
                        self.discard(v)?;
                        return Err(RunError::fatal("'@' requires a function", pos));
                    }
                    if self.scopes.scope(sid).frame.is_some()
                        && let Some((obj, class)) = self.current_self_object(sid)
                        && let Some(entry) = self.classes.find_method_any(class, id.name)
                    {
                        return self.make_method_pointer(obj, entry, id.name, pos);
                    }
                }
                if let Some(fids) = self.func_table.get(&id.name) {
                    let fid = fids[0];
                    let ptr = self.alloc(
                        HeapData::FuncPtr(FuncPtrObj {
                            target: FuncTarget::Function(fid),
                            bound_self: None,
                            env: None,
                        }),
                        pos,
                    )?;
                    return Ok(Value::Ref(ptr));
                }
                Err(RunError::fatal(
                    format!("unknown function '{}'", self.interns.get(id.name)),
                    pos,
                ))
            }
            Expr::Member { object, name } => {
                let objv = self.eval(object)?;
                let result = match &objv {
                    Value::Ref(id) if self.heap.is_object(*id) => {
                        let class = self.value_class(&objv).expect("object");
                        match self.classes.find_method_any(class, name.name) {
                            Some(entry) => self.make_method_pointer(*id, entry, name.name, pos),
                            None => Err(RunError::fatal(
                                format!("unknown method '{}'", self.interns.get(name.name)),
                                pos,
                            )),
                        }
                    }
                    Value::ClassRef(cid) => match self.classes.find_class_method_any(*cid, name.name) {
                        Some(entry) => {
                            let ptr = self.alloc(
                                HeapData::FuncPtr(FuncPtrObj {
                                    target: FuncTarget::Method {
                                        class: *cid,
                                        name: name.name,
                                        arity: entry.arity,
                                        fid: entry.fid,
                                    },
                                    bound_self: None,
                                    env: None,
                                }),
                                pos,
                            )?;
                            Ok(Value::Ref(ptr))
                        }
                        None => Err(RunError::fatal(
                            format!("unknown class method '{}'", self.interns.get(name.name)),
                            pos,
                        )),
                    },
                    _ => Err(RunError::fatal("'@' requires a method", pos)),
                };
                self.discard(objv)?;
                result
            }
            _ => Err(RunError::fatal("'@' requires a function or method", pos)),
        }
    }

    /// Builds a bound-method pointer; holds a counted reference to the
    /// receiver for the pointer's lifetime.
    fn make_method_pointer(&mut self, obj: HeapId, entry: MethodEntry, name: Symbol, pos: CodeLoc) -> RunResult<Value> {
        self.heap.inc_ref(obj);
        let class = self.value_class(&Value::Ref(obj)).expect("object");
        let ptr = self.alloc(
            HeapData::FuncPtr(FuncPtrObj {
                target: FuncTarget::Method {
                    class,
                    name,
                    arity: entry.arity,
                    fid: entry.fid,
                },
                bound_self: Some(obj),
                env: None,
            }),
            pos,
        )?;
        Ok(Value::Ref(ptr))
    }

    // ------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------

    fn eval_unary(&mut self, op: UnaryOp, operand: Value, pos: CodeLoc) -> RunResult<Value> {
        let result = match op {
            UnaryOp::Plus => match operand.as_number() {
                Some(_) => return Ok(operand),
                None => None,
            },
            UnaryOp::Minus => match operand.as_number() {
                Some(Number::Int(v)) => Some(Value::Int(v.wrapping_neg())),
                Some(Number::Float(v)) => Some(Value::Float(-v)),
                None => None,
            },
            UnaryOp::Not => match &operand {
                Value::Bool(b) => Some(Value::Bool(!b)),
                Value::Unassigned => Some(Value::Bool(true)),
                _ => operand.as_int().map(|v| Value::Int(!v)),
            },
        };
        match result {
            Some(v) => {
                self.discard(operand)?;
                Ok(v)
            }
            None => {
                let msg = format!("invalid operand to unary operator: {}", self.describe(&operand));
                self.discard(operand)?;
                Err(self.raise(StaticSymbols::EScriptError, msg, pos))
            }
        }
    }

    /// Binary operator evaluation, with short-circuiting for boolean
    /// `and`/`or` and for `??`.
    fn eval_binary(&mut self, op: BinaryOp, left: &ExprLoc, right: &ExprLoc, pos: CodeLoc) -> RunResult<Value> {
        match op {
            BinaryOp::And | BinaryOp::Or => {
                let lv = self.eval(left)?;
                if let Some(lb) = lv.as_bool() {
                    self.discard(lv)?;
                    // Short-circuit: the right operand is not evaluated when
                    // the left decides the result.
                    if (op == BinaryOp::And && !lb) || (op == BinaryOp::Or && lb) {
                        return Ok(Value::Bool(lb));
                    }
                    let rv = self.eval(right)?;
                    let rb = rv.as_bool();
                    let msg = format!("invalid operand to '{}': {}", op.symbol(), self.describe(&rv));
                    self.discard(rv)?;
                    return match rb {
                        Some(rb) => Ok(Value::Bool(rb)),
                        None => Err(self.raise(StaticSymbols::EScriptError, msg, pos)),
                    };
                }
                // Integer bitwise form.
                let rv = self.eval(right)?;
                let result = self.binary_values(op, &lv, &rv, pos);
                self.discard(lv)?;
                self.discard(rv)?;
                result
            }
            BinaryOp::Coalesce => {
                let lv = self.eval(left)?;
                if lv.is_truthy(&self.heap) {
                    return Ok(lv);
                }
                self.discard(lv)?;
                self.eval(right)
            }
            _ => {
                let lv = self.eval(left)?;
                let rv = self.eval(right)?;
                let result = self.binary_values(op, &lv, &rv, pos);
                self.discard(lv)?;
                self.discard(rv)?;
                result
            }
        }
    }

    /// Non-short-circuit binary operator core. Operands are borrowed; the
    /// result is always a fresh value.
    pub fn binary_values(&mut self, op: BinaryOp, lv: &Value, rv: &Value, pos: CodeLoc) -> RunResult<Value> {
        use BinaryOp::{Add, And, Eq, FDiv, Ge, Gt, In, IntDiv, Le, Lt, Mod, Mul, Ne, Or, Sar, Shl, Shr, Sub, Xor};
        match op {
            Add => {
                if let (Some(a), Some(b)) = (lv.as_number(), rv.as_number()) {
                    return Ok(match (a, b) {
                        (Number::Int(a), Number::Int(b)) => Value::Int(a.wrapping_add(b)),
                        _ => Value::Float(a.as_f64() + b.as_f64()),
                    });
                }
                if let (Value::Ref(a), Value::Ref(b)) = (lv, rv) {
                    match (self.heap.get(*a), self.heap.get(*b)) {
                        (HeapData::Str(s1), HeapData::Str(s2)) => {
                            let mut out = String::with_capacity(s1.len() + s2.len());
                            out.push_str(s1);
                            out.push_str(s2);
                            let id = self.alloc(HeapData::Str(out), pos)?;
                            return Ok(Value::Ref(id));
                        }
                        (HeapData::Set(s1), HeapData::Set(s2)) => {
                            let out = s1.union(s2);
                            let id = self.alloc(HeapData::Set(out), pos)?;
                            return Ok(Value::Ref(id));
                        }
                        (HeapData::Array(a1), HeapData::Array(a2)) => {
                            let elem = a1.elem;
                            let combined: Vec<Value> =
                                a1.values.iter().chain(&a2.values).map(shallow).collect();
                            let values: Vec<Value> = combined
                                .into_iter()
                                .map(|v| {
                                    let v = self.recount(v);
                                    self.retain_for_store(v)
                                })
                                .collect();
                            let id = self.alloc(HeapData::Array(ArrayObj::dynamic(elem, values)), pos)?;
                            return Ok(Value::Ref(id));
                        }
                        _ => {}
                    }
                }
                self.binary_fallback(op, lv, rv, pos)
            }
            Sub => {
                if let (Some(a), Some(b)) = (lv.as_number(), rv.as_number()) {
                    return Ok(match (a, b) {
                        (Number::Int(a), Number::Int(b)) => Value::Int(a.wrapping_sub(b)),
                        _ => Value::Float(a.as_f64() - b.as_f64()),
                    });
                }
                if let Some(out) = self.set_op(lv, rv, SetObj::difference) {
                    let id = self.alloc(HeapData::Set(out), pos)?;
                    return Ok(Value::Ref(id));
                }
                self.binary_fallback(op, lv, rv, pos)
            }
            Mul => {
                if let (Some(a), Some(b)) = (lv.as_number(), rv.as_number()) {
                    return Ok(match (a, b) {
                        (Number::Int(a), Number::Int(b)) => Value::Int(a.wrapping_mul(b)),
                        _ => Value::Float(a.as_f64() * b.as_f64()),
                    });
                }
                if let Some(out) = self.set_op(lv, rv, SetObj::intersection) {
                    let id = self.alloc(HeapData::Set(out), pos)?;
                    return Ok(Value::Ref(id));
                }
                self.binary_fallback(op, lv, rv, pos)
            }
            FDiv => match (lv.as_number(), rv.as_number()) {
                (Some(a), Some(b)) => {
                    if b.as_f64() == 0.0 {
                        Err(self.raise(StaticSymbols::EZeroDivide, "Division by zero", pos))
                    } else {
                        Ok(Value::Float(a.as_f64() / b.as_f64()))
                    }
                }
                _ => self.binary_fallback(op, lv, rv, pos),
            },
            IntDiv | Mod => match (lv.as_int(), rv.as_int()) {
                (Some(a), Some(b)) => {
                    if b == 0 {
                        Err(self.raise(StaticSymbols::EZeroDivide, "Division by zero", pos))
                    } else if op == IntDiv {
                        Ok(Value::Int(a.wrapping_div(b)))
                    } else {
                        Ok(Value::Int(a.wrapping_rem(b)))
                    }
                }
                _ => self.binary_fallback(op, lv, rv, pos),
            },
            Shl | Shr | Sar => match (lv.as_int(), rv.as_int()) {
                (Some(a), Some(b)) => {
                    let shift = u32::try_from(b & 63).expect("masked shift");
                    Ok(Value::Int(match op {
                        Shl => a.wrapping_shl(shift),
                        // `shr` is a logical shift; `sar` keeps the sign.
                        Shr => ((a as u64) >> shift) as i64,
                        _ => a.wrapping_shr(shift),
                    }))
                }
                _ => self.binary_fallback(op, lv, rv, pos),
            },
            And | Or | Xor => match (lv.as_int(), rv.as_int()) {
                (Some(a), Some(b)) => Ok(Value::Int(match op {
                    And => a & b,
                    Or => a | b,
                    _ => a ^ b,
                })),
                _ => match (lv.as_bool(), rv.as_bool()) {
                    (Some(a), Some(b)) => Ok(Value::Bool(match op {
                        And => a && b,
                        Or => a || b,
                        _ => a != b,
                    })),
                    _ => self.binary_fallback(op, lv, rv, pos),
                },
            },
            Eq | Ne => match values_equal(lv, rv, &self.heap) {
                Some(eq) => Ok(Value::Bool(if op == Eq { eq } else { !eq })),
                None => self.binary_fallback(op, lv, rv, pos),
            },
            Lt | Le | Gt | Ge => match values_cmp(lv, rv, &self.heap) {
                Some(ordering) => Ok(Value::Bool(match op {
                    Lt => ordering.is_lt(),
                    Le => ordering.is_le(),
                    Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                })),
                None => self.binary_fallback(op, lv, rv, pos),
            },
            In => self.eval_in(lv, rv, pos),
            BinaryOp::Coalesce => unreachable!("coalesce short-circuits in eval_binary"),
        }
    }

    fn set_op(&self, lv: &Value, rv: &Value, op: impl FnOnce(&SetObj, &SetObj) -> SetObj) -> Option<SetObj> {
        if let (Value::Ref(a), Value::Ref(b)) = (lv, rv)
            && let (HeapData::Set(s1), HeapData::Set(s2)) = (self.heap.get(*a), self.heap.get(*b))
        {
            return Some(op(s1, s2));
        }
        None
    }

    /// Membership: element in set, substring in string, element in array.
    fn eval_in(&mut self, lv: &Value, rv: &Value, pos: CodeLoc) -> RunResult<Value> {
        if let Value::Ref(id) = rv {
            match self.heap.get(*id) {
                HeapData::Set(set) => {
                    let ordinal = match lv {
                        Value::Enum { ordinal, .. } => Some(*ordinal),
                        _ => lv.as_int(),
                    };
                    return match ordinal {
                        Some(o) => Ok(Value::Bool(set.contains(o))),
                        None => self.binary_fallback(BinaryOp::In, lv, rv, pos),
                    };
                }
                HeapData::Str(s) => {
                    if let Value::Ref(sub_id) = lv
                        && let HeapData::Str(sub) = self.heap.get(*sub_id)
                    {
                        // The empty substring is not contained in anything.
                        let contained = !sub.is_empty() && s.contains(sub.as_str());
                        return Ok(Value::Bool(contained));
                    }
                }
                HeapData::Array(arr) => {
                    for v in &arr.values {
                        if values_equal(lv, v, &self.heap) == Some(true) {
                            return Ok(Value::Bool(true));
                        }
                    }
                    return Ok(Value::Bool(false));
                }
                _ => {}
            }
        }
        self.binary_fallback(BinaryOp::In, lv, rv, pos)
    }

    /// Operator-overload lookup when primitive rules do not apply.
    fn binary_fallback(&mut self, op: BinaryOp, lv: &Value, rv: &Value, pos: CodeLoc) -> RunResult<Value> {
        let lt = self.operand_type(lv);
        let rt = self.operand_type(rv);
        if let (Some(lt), Some(rt)) = (lt, rt) {
            let class = self.value_class(lv);
            if let Some(binding) = self.classes.lookup_operator(class, op, &[lt, rt]).cloned() {
                let args = vec![self.recount(shallow(lv)), self.recount(shallow(rv))];
                return self.call_operator(&binding, args, pos);
            }
        }
        let msg = format!(
            "invalid operands to '{}': {} and {}",
            op.symbol(),
            self.describe(lv),
            self.describe(rv)
        );
        Err(self.raise(StaticSymbols::EScriptError, msg, pos))
    }

    /// The type id of an operand for operator-overload matching.
    fn operand_type(&self, v: &Value) -> Option<TypeId> {
        if let Some(class) = self.value_class(v) {
            return Some(self.classes.class(class).typ);
        }
        self.typereg.type_of_value(v, &self.heap)
    }

    // ------------------------------------------------------------------
    // Literals
    // ------------------------------------------------------------------

    /// `[...]` literal: a set or an array depending on the type context.
    fn eval_bracket_literal(
        &mut self,
        elems: &[BracketElem],
        hint: Option<TypeId>,
        pos: CodeLoc,
    ) -> RunResult<Value> {
        let hint_kind = hint.map(|h| self.typereg.kind(h).clone());
        match hint_kind {
            Some(TypeKind::Set { elem }) => self.build_set_literal(elems, elem, pos),
            Some(TypeKind::Array { elem, bounds }) => self.build_array_literal(elems, elem, bounds, pos),
            _ => {
                // No context: a literal whose first element names an enum
                // value is a set; everything else is an array. The check is
                // syntactic so elements are still evaluated exactly once.
                if elems.is_empty() {
                    return Err(self.raise(
                        StaticSymbols::EScriptError,
                        "Empty literal requires a type context",
                        pos,
                    ));
                }
                let first_expr = match &elems[0] {
                    BracketElem::Single(e) | BracketElem::Range(e, _) => e,
                };
                if let Expr::Name(id) = &first_expr.expr
                    && self.scopes.resolve(self.scopes.current(), id.name).is_none()
                    && let Some((elem, _)) = self.typereg.enum_const(id.name)
                {
                    return self.build_set_literal(elems, elem, pos);
                }
                // Inferred arrays carry Variant elements so mixed literals
                // (e.g. Format argument lists) stay legal.
                self.build_array_literal(elems, TypeId::VARIANT, None, pos)
            }
        }
    }

    fn build_set_literal(&mut self, elems: &[BracketElem], elem: TypeId, pos: CodeLoc) -> RunResult<Value> {
        let cardinality = self.typereg.set_storage_cardinality(elem);
        let mut set = SetObj::empty(elem, cardinality);
        for e in elems {
            match e {
                BracketElem::Single(x) => {
                    let o = self.set_element_ordinal(x, elem)?;
                    set.insert(o);
                }
                BracketElem::Range(lo, hi) => {
                    let lo = self.set_element_ordinal(lo, elem)?;
                    let hi = self.set_element_ordinal(hi, elem)?;
                    for o in lo..=hi {
                        set.insert(o);
                    }
                }
            }
        }
        let id = self.alloc(HeapData::Set(set), pos)?;
        Ok(Value::Ref(id))
    }

    fn set_element_ordinal(&mut self, e: &ExprLoc, elem: TypeId) -> RunResult<i64> {
        let v = self.eval(e)?;
        let ordinal = match &v {
            Value::Enum { typ, ordinal } if *typ == elem => Some(*ordinal),
            Value::Enum { ordinal, .. } => Some(*ordinal),
            _ => v.as_int(),
        };
        let msg = format!("{} is not a valid set element", self.describe(&v));
        self.discard(v)?;
        ordinal.ok_or_else(|| self.raise(StaticSymbols::EScriptError, msg, e.pos))
    }

    fn build_array_literal(
        &mut self,
        elems: &[BracketElem],
        elem: TypeId,
        bounds: Option<(i64, i64)>,
        pos: CodeLoc,
    ) -> RunResult<Value> {
        let mut values = Vec::with_capacity(elems.len());
        for e in elems {
            match e {
                BracketElem::Single(x) => {
                    let v = self.eval_hint(x, Some(elem))?;
                    let v = self.coerce_value(v, elem, x.pos)?;
                    let v = self.retain_for_store(v);
                    values.push(v);
                }
                BracketElem::Range(lo, _) => {
                    for v in values {
                        self.release_owned_value(v)?;
                    }
                    return Err(self.raise(
                        StaticSymbols::EScriptError,
                        "Ranges are only allowed in set literals",
                        lo.pos,
                    ));
                }
            }
        }
        let arr = match bounds {
            None => ArrayObj::dynamic(elem, values),
            Some((lo, hi)) => {
                let expected = usize::try_from((hi - lo + 1).max(0)).expect("checked bounds");
                if values.len() != expected {
                    let got = values.len();
                    for v in values {
                        self.release_owned_value(v)?;
                    }
                    return Err(self.raise(
                        StaticSymbols::ERangeError,
                        format!("Array literal has {got} elements, expected {expected}"),
                        pos,
                    ));
                }
                ArrayObj::fixed(elem, lo, hi, values)
            }
        };
        let id = self.alloc(HeapData::Array(arr), pos)?;
        Ok(Value::Ref(id))
    }

    /// `(field: value; ...)` literal; requires a record type context.
    fn eval_record_literal(
        &mut self,
        fields: &[(Identifier, ExprLoc)],
        hint: Option<TypeId>,
        pos: CodeLoc,
    ) -> RunResult<Value> {
        let Some(hint) = hint.filter(|h| matches!(self.typereg.kind(*h), TypeKind::Record { .. })) else {
            return Err(self.raise(
                StaticSymbols::EScriptError,
                "Record literal requires a type context",
                pos,
            ));
        };
        // Start from the zero record, then overwrite the named fields.
        let base = self
            .typereg
            .default_value(hint, &mut self.heap)
            .map_err(|e| RunError::from_resource(e, pos))?;
        let Value::Ref(rec_id) = &base else {
            return Err(RunError::fatal("record default is not heap data", pos));
        };
        let rec_id = *rec_id;
        for (name, expr) in fields {
            let field_typ = self.record_field_type(hint, name.name).unwrap_or(TypeId::VARIANT);
            let v = self.eval_hint(expr, Some(field_typ))?;
            self.write_place(
                PlaceRef::RecordField {
                    rec: rec_id,
                    name: name.name,
                },
                field_typ,
                v,
                expr.pos,
            )?;
        }
        Ok(base)
    }
}

/// Copies a value's bits without touching reference counts.
///
/// Callers pair this with [`Interp::recount`] (to make a true copy) or use it
/// transiently while the owner is known to stay alive.
pub(crate) fn shallow(value: &Value) -> Value {
    match value {
        Value::Ref(id) => Value::Ref(*id),
        Value::Interface { iface, obj } => Value::Interface {
            iface: *iface,
            obj: *obj,
        },
        other => other.clone_immediate(),
    }
}
