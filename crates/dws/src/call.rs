//! Call machinery: argument preparation, dispatch, constructors,
//! destructors, contracts, and lambda invocation.
//!
//! Arguments are evaluated exactly once, left to right, in the caller's
//! scope, before the callee frame is pushed. Parameter modes change what is
//! bound: plain and `const` parameters bind the evaluated value, `var`/`out`
//! bind a place handle, `lazy` binds the unevaluated expression plus the
//! caller scope (re-evaluated on every read).

use smallvec::SmallVec;

use crate::{
    class::{ClassId, MethodEntry, OperatorBinding},
    exception_public::CodeLoc,
    exception_private::{RunError, RunResult},
    eval::{Interp, shallow},
    expressions::{Expr, ExprLoc, FuncKind, FunctionDef, FunctionId, Identifier, ParamMode},
    heap::{HeapData, HeapId, ReleaseQueue},
    intern::{StaticSymbols, Symbol},
    io::PrintWriter,
    namespace::{Binding, FrameInfo, PlaceRef, ScopeId, GLOBAL_SCOPE},
    resource::ResourceTracker,
    typereg::TypeId,
    types::{FuncTarget, Instance},
    value::Value,
};

/// An argument after caller-side preparation.
pub(crate) enum PreparedArg {
    Value(Value),
    Place(PlaceRef),
    Thunk(ExprLoc, ScopeId),
}

/// Prepared argument list; most calls take at most a handful of arguments,
/// so the common case stays off the heap.
pub(crate) type PreparedArgs = SmallVec<[PreparedArg; 4]>;

/// The receiver context of a call.
pub(crate) enum SelfCtx {
    None,
    /// Instance call: the receiver (a transient object reference kept alive
    /// by the caller) and the class whose method body runs.
    Instance { obj: Value, defining: ClassId },
    /// Class-method call.
    Class { class: ClassId, defining: ClassId },
}

impl<'a, T: ResourceTracker, P: PrintWriter> Interp<'a, T, P> {
    // ------------------------------------------------------------------
    // Call expression dispatch
    // ------------------------------------------------------------------

    /// Evaluates `callee(args)`.
    pub fn eval_call(&mut self, callee: &ExprLoc, args: &[ExprLoc], pos: CodeLoc) -> RunResult<Value> {
        match &callee.expr {
            Expr::Name(id) => self.call_named(id, args, pos),
            Expr::Member { object, name } => {
                let static_class = self.static_class_hint(object);
                let objv = self.eval(object)?;
                let result = self.call_member(&objv, name.name, args, pos, static_class);
                self.discard(objv)?;
                result
            }
            Expr::Inherited {
                name,
                args: inherited_args,
            } if inherited_args.is_empty() => self.eval_inherited(name.as_ref(), args, pos),
            _ => {
                let callable = self.eval(callee)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    match self.eval(arg) {
                        Ok(v) => values.push(v),
                        Err(e) => {
                            for v in values {
                                self.discard(v)?;
                            }
                            self.discard(callable)?;
                            return Err(e);
                        }
                    }
                }
                let result = self.call_callable(&callable, values, pos);
                self.discard(callable)?;
                result
            }
        }
    }

    /// Calls a bare name: local callable bindings, `with` members, `Self`
    /// members, free functions, then builtins.
    fn call_named(&mut self, id: &Identifier, args: &[ExprLoc], pos: CodeLoc) -> RunResult<Value> {
        let name = id.name;
        let chain: Vec<ScopeId> = self.scopes.chain(self.scopes.current()).collect();
        for sid in chain {
            if self.scopes.scope(sid).has(name) {
                let callable = self.read_binding_at(sid, name, pos)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    match self.eval(arg) {
                        Ok(v) => values.push(v),
                        Err(e) => {
                            for v in values {
                                self.discard(v)?;
                            }
                            self.discard(callable)?;
                            return Err(e);
                        }
                    }
                }
                let result = self.call_callable(&callable, values, pos);
                self.discard(callable)?;
                return result;
            }
            if let Some(withv) = self.scopes.scope(sid).with_object.as_ref().map(shallow)
                && self.with_member_callable(&withv, name)
            {
                return self.call_member(&withv, name, args, pos, None);
            }
            if self.scopes.scope(sid).frame.is_some()
                && let Some((receiver, defining)) = self.self_receiver_for(sid, name)
            {
                return self.call_member(&receiver, name, args, pos, Some(defining));
            }
        }
        if self.func_table.contains_key(&name) {
            return self.call_named_function(name, args, pos);
        }
        if let Some(&builtin) = self.builtin_table.get(&name) {
            return self.call_builtin_with_exprs(builtin, args, pos);
        }
        Err(RunError::fatal(
            format!("unknown function '{}'", self.interns.get(name)),
            pos,
        ))
    }

    /// Whether a `with` object exposes `name` as a callable member.
    fn with_member_callable(&self, withv: &Value, name: Symbol) -> bool {
        match self.value_class(withv) {
            Some(class) => {
                self.classes.find_method_any(class, name).is_some()
                    || self.classes.find_class_method_any(class, name).is_some()
                    || self.classes.find_property(class, name).is_some()
                    || self.classes.field_type(class, name).is_some()
            }
            None => false,
        }
    }

    /// The receiver for a bare method call inside a method frame, if the
    /// name resolves to a member of the defining class.
    fn self_receiver_for(&self, frame_scope: ScopeId, name: Symbol) -> Option<(Value, ClassId)> {
        let frame = self.scopes.scope(frame_scope).frame.as_ref()?;
        let defining = frame.defining_class?;
        let has_member = self.classes.find_method_any(defining, name).is_some()
            || self.classes.find_class_method_any(defining, name).is_some()
            || self.classes.lookup_constructor(defining, name, 0).is_some();
        if !has_member {
            return None;
        }
        let self_sym = Symbol::from(StaticSymbols::SelfName);
        let receiver = match self.scopes.scope(frame_scope).binding(self_sym) {
            Some(Binding::Value { value, .. }) => shallow(value),
            _ => Value::ClassRef(defining),
        };
        Some((receiver, defining))
    }

    /// Calls a free function by name, resolving overloads by argument count.
    pub fn call_named_function(&mut self, name: Symbol, args: &[ExprLoc], pos: CodeLoc) -> RunResult<Value> {
        let Some(fid) = self.select_overload(name, args.len()) else {
            return Err(RunError::fatal(
                format!(
                    "no overload of '{}' takes {} arguments",
                    self.interns.get(name),
                    args.len()
                ),
                pos,
            ));
        };
        let prepared = self.prepare_args(fid, args, pos)?;
        self.call_function(fid, prepared, SelfCtx::None, GLOBAL_SCOPE, pos)
    }

    /// Picks the overload whose declared arity matches (exactly, or through
    /// trailing default parameters).
    fn select_overload(&self, name: Symbol, argc: usize) -> Option<FunctionId> {
        let program = self.program;
        let candidates = self.func_table.get(&name)?;
        if let Some(&fid) = candidates.iter().find(|&&fid| program.function(fid).arity() == argc) {
            return Some(fid);
        }
        candidates
            .iter()
            .find(|&&fid| {
                let def = program.function(fid);
                min_arity(def) <= argc && argc <= def.arity()
            })
            .or(candidates.first())
            .copied()
    }

    /// Calls a member with arguments on any receiver kind.
    pub fn call_member(
        &mut self,
        objv: &Value,
        name: Symbol,
        args: &[ExprLoc],
        pos: CodeLoc,
        static_class: Option<ClassId>,
    ) -> RunResult<Value> {
        let argc = args.len();
        let free_sym = Symbol::from(StaticSymbols::Free);
        let destroy_sym = Symbol::from(StaticSymbols::Destroy);
        match objv {
            Value::Ref(id) if self.heap.is_object(*id) => {
                let id = *id;
                let HeapData::Object(inst) = self.heap.get(id) else {
                    unreachable!()
                };
                if inst.destroyed {
                    return Err(self.raise(StaticSymbols::EObjectDestroyed, "Object already destroyed", pos));
                }
                let class = inst.class;
                if argc == 0 && (name == free_sym || name == destroy_sym) {
                    self.destroy_explicit(id, pos)?;
                    return Ok(Value::Unassigned);
                }
                let static_from = static_class.unwrap_or(class);
                if let Some(entry) = self.classes.dispatch_instance(static_from, class, name, argc) {
                    let prepared = self.prepare_args(entry.fid, args, pos)?;
                    return self.call_function(
                        entry.fid,
                        prepared,
                        SelfCtx::Instance {
                            obj: shallow(objv),
                            defining: entry.owner,
                        },
                        GLOBAL_SCOPE,
                        pos,
                    );
                }
                if let Some(entry) = self.classes.dispatch_class_method(class, name, argc) {
                    let prepared = self.prepare_args(entry.fid, args, pos)?;
                    return self.call_function(
                        entry.fid,
                        prepared,
                        SelfCtx::Class {
                            class,
                            defining: entry.owner,
                        },
                        GLOBAL_SCOPE,
                        pos,
                    );
                }
                // A property holding a function pointer can be called.
                if let Some(prop) = self.classes.find_property(class, name) {
                    let callable = self.property_get(objv, class, prop, &[], pos)?;
                    let mut values = Vec::with_capacity(argc);
                    for arg in args {
                        values.push(self.eval(arg)?);
                    }
                    let result = self.call_callable(&callable, values, pos);
                    self.discard(callable)?;
                    return result;
                }
                // A field holding a function pointer likewise.
                if self.classes.field_type(class, name).is_some() {
                    let callable = self.eval_member(objv, &Identifier { name, pos }, pos, None)?;
                    let mut values = Vec::with_capacity(argc);
                    for arg in args {
                        values.push(self.eval(arg)?);
                    }
                    let result = self.call_callable(&callable, values, pos);
                    self.discard(callable)?;
                    return result;
                }
                Err(self.raise(
                    StaticSymbols::EScriptError,
                    format!(
                        "Unknown method '{}' on class {}",
                        self.interns.get(name),
                        self.interns.get(self.classes.class(class).name)
                    ),
                    pos,
                ))
            }
            Value::ClassRef(cid) => self.call_class_member(*cid, name, args, pos),
            Value::Nil { class: Some(cid) } => {
                let cid = *cid;
                if self.classes.dispatch_class_method(cid, name, argc).is_some()
                    || self.classes.lookup_constructor(cid, name, argc).is_some()
                    || name == Symbol::from(StaticSymbols::Create)
                {
                    return self.call_class_member(cid, name, args, pos);
                }
                Err(self.raise(StaticSymbols::EScriptError, "Attempt to access a nil object", pos))
            }
            Value::Nil { class: None } => {
                if argc == 0 && name == free_sym {
                    return Ok(Value::Unassigned);
                }
                Err(self.raise(StaticSymbols::EScriptError, "Attempt to access a nil object", pos))
            }
            Value::Interface { iface, obj } => {
                let (iface, obj) = (*iface, *obj);
                if self.classes.iface_declares(iface, name) {
                    return self.call_member(&Value::Ref(obj), name, args, pos, None);
                }
                Err(self.raise(
                    StaticSymbols::EScriptError,
                    format!(
                        "'{}' is not declared in interface {}",
                        self.interns.get(name),
                        self.interns.get(self.classes.interface(iface).name)
                    ),
                    pos,
                ))
            }
            Value::Ref(_) => {
                // Method-call sugar on arrays, strings, and sets routes to
                // the builtin of the same name with the receiver first.
                if let Some(&builtin) = self.builtin_table.get(&name) {
                    let mut values = Vec::with_capacity(argc + 1);
                    values.push(self.recount(shallow(objv)));
                    for arg in args {
                        values.push(self.eval(arg)?);
                    }
                    return crate::builtins::dispatch(self, builtin, values, pos);
                }
                Err(RunError::fatal(
                    format!("unknown member '{}' on {}", self.interns.get(name), self.describe(objv)),
                    pos,
                ))
            }
            _ => Err(RunError::fatal(
                format!("unknown member '{}' on {}", self.interns.get(name), self.describe(objv)),
                pos,
            )),
        }
    }

    /// Calls a class member on a metaclass: constructors, then class
    /// methods.
    fn call_class_member(&mut self, cid: ClassId, name: Symbol, args: &[ExprLoc], pos: CodeLoc) -> RunResult<Value> {
        let argc = args.len();
        if self.classes.lookup_constructor(cid, name, argc).is_some()
            || name == Symbol::from(StaticSymbols::Create)
        {
            return self.construct_object(cid, name, args, pos);
        }
        if let Some(entry) = self.classes.dispatch_class_method(cid, name, argc) {
            let prepared = self.prepare_args(entry.fid, args, pos)?;
            return self.call_function(
                entry.fid,
                prepared,
                SelfCtx::Class {
                    class: cid,
                    defining: entry.owner,
                },
                GLOBAL_SCOPE,
                pos,
            );
        }
        Err(self.raise(
            StaticSymbols::EScriptError,
            format!(
                "Unknown class method '{}' on {}",
                self.interns.get(name),
                self.interns.get(self.classes.class(cid).name)
            ),
            pos,
        ))
    }

    /// `inherited` / `inherited Name(args)`: static dispatch to the parent
    /// class implementation, keeping the current receiver.
    pub fn eval_inherited(
        &mut self,
        name: Option<&Identifier>,
        args: &[ExprLoc],
        pos: CodeLoc,
    ) -> RunResult<Value> {
        let Some(frame_scope) = self.scopes.current_frame() else {
            return Err(RunError::fatal("'inherited' outside of a method", pos));
        };
        let frame = self.scopes.scope(frame_scope).frame.as_ref().expect("frame scope");
        let (func_name, defining) = (frame.func_name, frame.defining_class);
        let Some(defining) = defining else {
            return Err(RunError::fatal("'inherited' outside of a method", pos));
        };
        let Some(parent) = self.classes.class(defining).parent else {
            // No parent implementation: `inherited;` is a no-op, matching
            // the root class's empty virtual methods.
            return Ok(Value::Unassigned);
        };
        let mname = name.map_or(func_name, |n| n.name);
        let Some(entry) = self.classes.lookup_static_method(parent, mname, args.len()) else {
            if name.is_none() {
                return Ok(Value::Unassigned);
            }
            return Err(RunError::fatal(
                format!("no inherited method '{}'", self.interns.get(mname)),
                pos,
            ));
        };
        let self_sym = Symbol::from(StaticSymbols::SelfName);
        let self_ctx = match self.scopes.scope(frame_scope).binding(self_sym) {
            Some(Binding::Value { value, .. }) => SelfCtx::Instance {
                obj: shallow(value),
                defining: entry.owner,
            },
            _ => SelfCtx::Class {
                class: parent,
                defining: entry.owner,
            },
        };
        let prepared = self.prepare_args(entry.fid, args, pos)?;
        self.call_function(entry.fid, prepared, self_ctx, GLOBAL_SCOPE, pos)
    }

    // ------------------------------------------------------------------
    // Argument preparation
    // ------------------------------------------------------------------

    /// Evaluates a call's arguments against the callee's parameter modes.
    /// Each argument is evaluated exactly once, left to right.
    pub fn prepare_args(&mut self, fid: FunctionId, args: &[ExprLoc], pos: CodeLoc) -> RunResult<PreparedArgs> {
        let program = self.program;
        let def = program.function(fid);
        if args.len() > def.params.len() {
            return Err(RunError::fatal(
                format!(
                    "too many arguments for '{}': expected at most {}, got {}",
                    self.interns.get(def.name.name),
                    def.params.len(),
                    args.len()
                ),
                pos,
            ));
        }
        let mut prepared = PreparedArgs::new();
        let mut failed = None;
        for (param, arg) in def.params.iter().zip(args) {
            let one = match param.mode {
                ParamMode::Var | ParamMode::Out => self.resolve_place(arg).map(|(place, _)| PreparedArg::Place(place)),
                ParamMode::Lazy => Ok(PreparedArg::Thunk(arg.clone(), self.scopes.current())),
                ParamMode::Value | ParamMode::Const => {
                    let hint = match &param.typ {
                        Some(te) => self.resolve_type_expr(te, arg.pos).ok(),
                        None => None,
                    };
                    self.eval_hint(arg, hint).map(PreparedArg::Value)
                }
            };
            match one {
                Ok(p) => prepared.push(p),
                Err(e) => {
                    failed = Some(e);
                    break;
                }
            }
        }
        if let Some(e) = failed {
            for p in prepared {
                if let PreparedArg::Value(v) = p {
                    self.discard(v)?;
                }
            }
            return Err(e);
        }
        Ok(prepared)
    }

    // ------------------------------------------------------------------
    // The call core
    // ------------------------------------------------------------------

    /// Runs a function body in a fresh frame. `parent_env` is the lexical
    /// parent of the new scope: global for named functions and methods, the
    /// captured chain for lambdas.
    pub fn call_function(
        &mut self,
        fid: FunctionId,
        mut prepared: PreparedArgs,
        self_ctx: SelfCtx,
        parent_env: ScopeId,
        call_pos: CodeLoc,
    ) -> RunResult<Value> {
        let program = self.program;
        let def = program.function(fid);
        // Fill trailing defaults (evaluated in the caller's scope).
        while prepared.len() < def.params.len() {
            let param = &def.params[prepared.len()];
            match &param.default {
                Some(d) => {
                    let hint = match &param.typ {
                        Some(te) => self.resolve_type_expr(te, d.pos).ok(),
                        None => None,
                    };
                    let v = self.eval_hint(d, hint)?;
                    prepared.push(PreparedArg::Value(v));
                }
                None => {
                    for p in prepared {
                        if let PreparedArg::Value(v) = p {
                            self.discard(v)?;
                        }
                    }
                    return Err(RunError::fatal(
                        format!(
                            "not enough arguments for '{}'",
                            self.interns.get(def.name.name)
                        ),
                        call_pos,
                    ));
                }
            }
        }
        if def.is_abstract {
            for p in prepared {
                if let PreparedArg::Value(v) = p {
                    self.discard(v)?;
                }
            }
            return Err(self.raise(
                StaticSymbols::EScriptError,
                format!("Abstract method '{}' called", self.interns.get(def.name.name)),
                call_pos,
            ));
        }
        let defining = match &self_ctx {
            SelfCtx::Instance { defining, .. } | SelfCtx::Class { defining, .. } => Some(*defining),
            SelfCtx::None => None,
        };
        let frame = FrameInfo {
            func_name: def.name.name,
            call_pos,
            defining_class: defining,
            old_values: Vec::new(),
        };
        let scope = self
            .scopes
            .push(parent_env, Some(frame), self.heap.tracker())
            .map_err(|e| RunError::from_resource(e, call_pos))?;
        let outcome = self.run_frame(fid, prepared, self_ctx, scope, call_pos);
        // Take the result out of the frame before teardown.
        let result = if outcome.is_ok() {
            let result_sym = Symbol::from(StaticSymbols::Result);
            match self.scopes.scope_mut(scope).binding_mut(result_sym) {
                Some(Binding::Value { value, .. }) => Some(std::mem::replace(value, Value::Unassigned)),
                _ => Some(Value::Unassigned),
            }
        } else {
            None
        };
        let mut queue = ReleaseQueue::new();
        self.scopes.pop(&mut self.heap, &mut queue, None);
        let drain_result = self.drain(queue);
        match (outcome, result) {
            (Err(e), _) => Err(e),
            (Ok(()), Some(result)) => {
                drain_result?;
                // Ownership transfers out: the caller receives a temporary.
                Ok(self.owned_to_temp(result))
            }
            (Ok(()), None) => {
                drain_result?;
                Ok(Value::Unassigned)
            }
        }
    }

    /// Everything that happens inside the pushed frame: bindings, contracts,
    /// body, postconditions.
    fn run_frame(
        &mut self,
        fid: FunctionId,
        prepared: PreparedArgs,
        self_ctx: SelfCtx,
        scope: ScopeId,
        call_pos: CodeLoc,
    ) -> RunResult<()> {
        let program = self.program;
        let def = program.function(fid);
        // Bind the receiver.
        match self_ctx {
            SelfCtx::Instance { obj, defining: _ } => {
                let class = self.value_class(&obj).expect("instance receiver");
                let typ = self.classes.class(class).typ;
                let obj = self.retain_for_store(obj);
                self.scopes.scope_mut(scope).define(
                    Symbol::from(StaticSymbols::SelfName),
                    Binding::Value {
                        value: obj,
                        typ,
                        constant: true,
                    },
                );
            }
            SelfCtx::Class { class, .. } => {
                let typ = self.typereg.intern_classof(class);
                self.scopes.scope_mut(scope).define(
                    Symbol::from(StaticSymbols::SelfName),
                    Binding::Value {
                        value: Value::ClassRef(class),
                        typ,
                        constant: true,
                    },
                );
            }
            SelfCtx::None => {}
        }
        // Bind parameters.
        for (param, arg) in def.params.iter().zip(prepared) {
            let typ = match &param.typ {
                Some(te) => self.resolve_type_expr(te, param.name.pos)?,
                None => TypeId::VARIANT,
            };
            let binding = match arg {
                PreparedArg::Value(v) => {
                    let v = self.coerce_value(v, typ, call_pos)?;
                    let v = self.retain_for_store(v);
                    Binding::Value {
                        value: v,
                        typ,
                        constant: param.mode == ParamMode::Const,
                    }
                }
                PreparedArg::Place(place) => Binding::VarParam { place, typ },
                PreparedArg::Thunk(expr, caller_scope) => {
                    self.scopes.retain(caller_scope);
                    Binding::Lazy {
                        expr,
                        scope: caller_scope,
                    }
                }
            };
            self.scopes.scope_mut(scope).define(param.name.name, binding);
        }
        // Bind Result.
        let result_sym = Symbol::from(StaticSymbols::Result);
        match def.kind {
            FuncKind::Constructor => {
                let self_sym = Symbol::from(StaticSymbols::SelfName);
                let (selfv, typ) = match self.scopes.scope(scope).binding(self_sym) {
                    Some(Binding::Value { value, typ, .. }) => (shallow(value), *typ),
                    _ => (Value::Unassigned, TypeId::VARIANT),
                };
                let selfv = self.retain_for_store(selfv);
                self.scopes.scope_mut(scope).define(
                    result_sym,
                    Binding::Value {
                        value: selfv,
                        typ,
                        constant: false,
                    },
                );
            }
            _ => {
                let result_type = match &def.result_type {
                    Some(te) => self.resolve_type_expr(te, def.name.pos)?,
                    None => TypeId::VARIANT,
                };
                let zero = self
                    .typereg
                    .default_value(result_type, &mut self.heap)
                    .map_err(|e| RunError::from_resource(e, call_pos))?;
                self.scopes.scope_mut(scope).define(
                    result_sym,
                    Binding::Value {
                        value: zero,
                        typ: result_type,
                        constant: false,
                    },
                );
            }
        }
        // Preconditions run before the body and bind no new names.
        for clause in &def.require {
            let v = self.eval(&clause.test)?;
            let ok = v.is_truthy(&self.heap);
            self.discard(v)?;
            if !ok {
                let detail = match &clause.msg {
                    Some(m) => {
                        let mv = self.eval(m)?;
                        let text = self.display(&mv);
                        self.discard(mv)?;
                        format!(": {text}")
                    }
                    None => String::new(),
                };
                return Err(self.raise(
                    StaticSymbols::EContractFailed,
                    format!("Pre-condition failed in {}{detail}", self.interns.get(def.name.name)),
                    clause.pos,
                ));
            }
        }
        // Capture `old` values for the postconditions.
        if !def.old_captures.is_empty() {
            let mut olds = Vec::with_capacity(def.old_captures.len());
            for e in &def.old_captures {
                olds.push(self.eval(e)?);
            }
            if let Some(frame) = self.scopes.scope_mut(scope).frame.as_mut() {
                frame.old_values = olds;
            }
        }
        // Body. An Exit signal terminates the call normally.
        self.exec_block(&def.body)?;
        // Postconditions may reference Result and `old` captures.
        for clause in &def.ensure {
            let v = self.eval(&clause.test)?;
            let ok = v.is_truthy(&self.heap);
            self.discard(v)?;
            if !ok {
                let detail = match &clause.msg {
                    Some(m) => {
                        let mv = self.eval(m)?;
                        let text = self.display(&mv);
                        self.discard(mv)?;
                        format!(": {text}")
                    }
                    None => String::new(),
                };
                return Err(self.raise(
                    StaticSymbols::EContractFailed,
                    format!("Post-condition failed in {}{detail}", self.interns.get(def.name.name)),
                    clause.pos,
                ));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Callable values
    // ------------------------------------------------------------------

    /// Invokes a function-pointer or lambda value with plain value
    /// arguments. Bound methods re-dispatch through the VMT of the
    /// receiver's runtime class.
    pub fn call_callable(&mut self, callable: &Value, args: Vec<Value>, pos: CodeLoc) -> RunResult<Value> {
        let Value::Ref(id) = callable else {
            let msg = format!("{} is not callable", self.describe(callable));
            for v in args {
                self.discard(v)?;
            }
            return Err(self.raise(StaticSymbols::EScriptError, msg, pos));
        };
        let (target, bound_self, env) = match self.heap.get(*id) {
            HeapData::FuncPtr(fp) => (fp.target, fp.bound_self, fp.env),
            _ => {
                let msg = format!("{} is not callable", self.describe(callable));
                for v in args {
                    self.discard(v)?;
                }
                return Err(self.raise(StaticSymbols::EScriptError, msg, pos));
            }
        };
        let prepared: PreparedArgs = args.into_iter().map(PreparedArg::Value).collect();
        match target {
            FuncTarget::Function(fid) => self.call_function(fid, prepared, SelfCtx::None, GLOBAL_SCOPE, pos),
            FuncTarget::Lambda(fid) => {
                let parent = env.unwrap_or(GLOBAL_SCOPE);
                self.call_function(fid, prepared, SelfCtx::None, parent, pos)
            }
            FuncTarget::Method { class, name, fid, .. } => match bound_self {
                Some(obj) => {
                    let runtime_class = self.value_class(&Value::Ref(obj)).unwrap_or(class);
                    let entry = self
                        .classes
                        .dispatch_instance(runtime_class, runtime_class, name, prepared.len())
                        .unwrap_or(MethodEntry {
                            fid,
                            owner: class,
                            arity: 0,
                            min_arity: 0,
                            in_vmt: false,
                        });
                    self.call_function(
                        entry.fid,
                        prepared,
                        SelfCtx::Instance {
                            obj: Value::Ref(obj),
                            defining: entry.owner,
                        },
                        GLOBAL_SCOPE,
                        pos,
                    )
                }
                None => {
                    let entry = self
                        .classes
                        .dispatch_class_method(class, name, prepared.len())
                        .unwrap_or(MethodEntry {
                            fid,
                            owner: class,
                            arity: 0,
                            min_arity: 0,
                            in_vmt: false,
                        });
                    self.call_function(
                        entry.fid,
                        prepared,
                        SelfCtx::Class {
                            class,
                            defining: entry.owner,
                        },
                        GLOBAL_SCOPE,
                        pos,
                    )
                }
            },
        }
    }

    /// Calls a method with pre-evaluated value arguments.
    pub fn call_method_values(
        &mut self,
        objv: &Value,
        entry: MethodEntry,
        args: Vec<Value>,
        pos: CodeLoc,
    ) -> RunResult<Value> {
        let prepared: PreparedArgs = args.into_iter().map(PreparedArg::Value).collect();
        self.call_function(
            entry.fid,
            prepared,
            SelfCtx::Instance {
                obj: shallow(objv),
                defining: entry.owner,
            },
            GLOBAL_SCOPE,
            pos,
        )
    }

    /// Calls a class method with pre-evaluated value arguments.
    pub fn call_class_method_values(
        &mut self,
        class: ClassId,
        entry: MethodEntry,
        args: Vec<Value>,
        pos: CodeLoc,
    ) -> RunResult<Value> {
        let prepared: PreparedArgs = args.into_iter().map(PreparedArg::Value).collect();
        self.call_function(
            entry.fid,
            prepared,
            SelfCtx::Class {
                class,
                defining: entry.owner,
            },
            GLOBAL_SCOPE,
            pos,
        )
    }

    /// Invokes an operator-overload binding with its operand values.
    pub fn call_operator(&mut self, binding: &OperatorBinding, mut args: Vec<Value>, pos: CodeLoc) -> RunResult<Value> {
        match binding.self_arg {
            None => {
                let prepared: PreparedArgs = args.into_iter().map(PreparedArg::Value).collect();
                self.call_function(binding.fid, prepared, SelfCtx::None, GLOBAL_SCOPE, pos)
            }
            Some(index) => {
                let receiver = args.remove(index);
                let Some(defining) = self.value_class(&receiver) else {
                    self.discard(receiver)?;
                    for v in args {
                        self.discard(v)?;
                    }
                    return Err(RunError::fatal("operator receiver is not an object", pos));
                };
                let prepared: PreparedArgs = args.into_iter().map(PreparedArg::Value).collect();
                let result = self.call_function(
                    binding.fid,
                    prepared,
                    SelfCtx::Instance {
                        obj: shallow(&receiver),
                        defining,
                    },
                    GLOBAL_SCOPE,
                    pos,
                );
                self.discard(receiver)?;
                result
            }
        }
    }

    // ------------------------------------------------------------------
    // Construction and destruction
    // ------------------------------------------------------------------

    /// Allocates and constructs an instance of `cid`.
    ///
    /// Fields are zero-initialized from the field tables; the constructor
    /// body (when one exists) runs with `Self` and `Result` bound to the new
    /// object. New objects start with a reference count of zero.
    pub fn construct_object(
        &mut self,
        cid: ClassId,
        ctor_name: Symbol,
        args: &[ExprLoc],
        pos: CodeLoc,
    ) -> RunResult<Value> {
        let meta = self.classes.class(cid);
        if meta.is_abstract {
            let msg = format!(
                "Trying to create an instance of abstract class {}",
                self.interns.get(meta.name)
            );
            return Err(self.raise(StaticSymbols::EScriptError, msg, pos));
        }
        if meta.is_external {
            let msg = format!("Cannot instantiate external class {}", self.interns.get(meta.name));
            return Err(self.raise(StaticSymbols::EScriptError, msg, pos));
        }
        let ctor = self.classes.lookup_constructor(cid, ctor_name, args.len());
        // Prepare arguments before allocating, so argument errors do not
        // leave a half-built object behind.
        let prepared = match ctor {
            Some(entry) => Some(self.prepare_args(entry.fid, args, pos)?),
            None => None,
        };
        let field_list = self.classes.all_fields(cid);
        let mut fields = indexmap::IndexMap::with_capacity(field_list.len());
        for (name, typ) in field_list {
            let zero = self
                .typereg
                .default_value(typ, &mut self.heap)
                .map_err(|e| RunError::from_resource(e, pos))?;
            fields.insert(name, zero);
        }
        let obj = self.alloc(HeapData::Object(Instance::new(cid, fields)), pos)?;
        match (ctor, prepared) {
            (Some(entry), Some(prepared)) => self.call_function(
                entry.fid,
                prepared,
                SelfCtx::Instance {
                    obj: Value::Ref(obj),
                    defining: entry.owner,
                },
                GLOBAL_SCOPE,
                pos,
            ),
            _ => {
                // No declared constructor: the root default constructor, plus
                // the implicit message constructor of exception classes.
                if args.is_empty() {
                    return Ok(Value::Ref(obj));
                }
                if args.len() == 1 && self.classes.is_exception_class(cid) {
                    let msg = self.eval(&args[0])?;
                    let msg = self.coerce_value(msg, TypeId::STRING, pos)?;
                    let msg = self.retain_for_store(msg);
                    let HeapData::Object(inst) = self.heap.get_mut(obj) else {
                        unreachable!()
                    };
                    let old = inst
                        .fields
                        .insert(Symbol::from(StaticSymbols::Message), msg)
                        .unwrap_or(Value::Unassigned);
                    self.release_owned_value(old)?;
                    return Ok(Value::Ref(obj));
                }
                let msg = format!(
                    "Unknown constructor '{}' on {}",
                    self.interns.get(ctor_name),
                    self.interns.get(self.classes.class(cid).name)
                );
                Err(self.raise(StaticSymbols::EScriptError, msg, pos))
            }
        }
    }

    /// Explicit `obj.Destroy` / `obj.Free`.
    pub fn destroy_explicit(&mut self, id: HeapId, pos: CodeLoc) -> RunResult<()> {
        let HeapData::Object(inst) = self.heap.get(id) else {
            return Err(RunError::fatal("destroy of non-object", pos));
        };
        if inst.destroyed {
            return Err(self.raise(StaticSymbols::EObjectDestroyed, "Object already destroyed", pos));
        }
        if inst.destroy_depth > 0 {
            return Ok(());
        }
        self.destroy_core(id, pos)?;
        if self.heap.refs(id) == 0 {
            self.heap.free_object(id);
        }
        Ok(())
    }

    /// Implicit destruction when the reference count reaches zero.
    pub fn run_destructor(&mut self, id: HeapId, _queue: &mut ReleaseQueue) -> RunResult<()> {
        self.destroy_core(id, CodeLoc::default())?;
        if self.heap.refs(id) == 0 {
            self.heap.free_object(id);
        }
        Ok(())
    }

    /// Runs the destructor once and releases the instance's fields.
    ///
    /// The destroy-depth counter keeps releases performed *by* the
    /// destructor body from re-entering destruction of the same instance.
    fn destroy_core(&mut self, id: HeapId, pos: CodeLoc) -> RunResult<()> {
        let class = {
            let HeapData::Object(inst) = self.heap.get_mut(id) else {
                return Err(RunError::fatal("destroy of non-object", pos));
            };
            inst.destroy_depth += 1;
            inst.class
        };
        let destroy_sym = Symbol::from(StaticSymbols::Destroy);
        let body_result = match self.classes.dispatch_instance(class, class, destroy_sym, 0) {
            Some(entry) => self
                .call_function(
                    entry.fid,
                    PreparedArgs::new(),
                    SelfCtx::Instance {
                        obj: Value::Ref(id),
                        defining: entry.owner,
                    },
                    GLOBAL_SCOPE,
                    pos,
                )
                .and_then(|v| self.discard(v)),
            None => Ok(()),
        };
        // The object is destroyed exactly once, even if its destructor
        // raised; fields are released either way.
        let fields: Vec<Value> = {
            let HeapData::Object(inst) = self.heap.get_mut(id) else {
                unreachable!()
            };
            inst.destroy_depth -= 1;
            inst.destroyed = true;
            inst.fields.drain(..).map(|(_, v)| v).collect()
        };
        let mut queue = ReleaseQueue::new();
        for v in fields {
            v.release_with_heap(&mut self.heap, &mut queue);
        }
        let drain_result = self.drain(queue);
        body_result?;
        drain_result
    }

    // ------------------------------------------------------------------
    // Builtins
    // ------------------------------------------------------------------

    /// Evaluates builtin arguments and dispatches. `Inc`/`Dec` are handled
    /// here because they need their first argument as a place.
    pub fn call_builtin_with_exprs(
        &mut self,
        builtin: crate::builtins::Builtin,
        args: &[ExprLoc],
        pos: CodeLoc,
    ) -> RunResult<Value> {
        use crate::builtins::Builtin;
        if matches!(builtin, Builtin::Inc | Builtin::Dec) {
            if args.is_empty() || args.len() > 2 {
                return Err(RunError::fatal("Inc/Dec take one or two arguments", pos));
            }
            let (place, typ) = self.resolve_place(&args[0])?;
            let delta = match args.get(1) {
                Some(d) => {
                    let v = self.eval(d)?;
                    let n = v.as_int();
                    self.discard(v)?;
                    n.ok_or_else(|| RunError::fatal("Inc/Dec step must be an integer", d.pos))?
                }
                None => 1,
            };
            let current = self.read_place(place, pos)?;
            let Some(n) = current.as_int() else {
                let msg = format!("Inc/Dec on {}", self.describe(&current));
                self.discard(current)?;
                return Err(self.raise(StaticSymbols::EScriptError, msg, pos));
            };
            self.discard(current)?;
            let next = if matches!(builtin, Builtin::Inc) {
                n.wrapping_add(delta)
            } else {
                n.wrapping_sub(delta)
            };
            self.write_place(place, typ, Value::Int(next), pos)?;
            return Ok(Value::Unassigned);
        }
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            match self.eval(arg) {
                Ok(v) => values.push(v),
                Err(e) => {
                    for v in values {
                        self.discard(v)?;
                    }
                    return Err(e);
                }
            }
        }
        crate::builtins::dispatch(self, builtin, values, pos)
    }
}

/// Declared arity minus trailing defaulted parameters.
fn min_arity(def: &FunctionDef) -> usize {
    let mut required = def.params.len();
    while required > 0 && def.params[required - 1].default.is_some() {
        required -= 1;
    }
    required
}
