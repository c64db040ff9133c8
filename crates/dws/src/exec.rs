//! The statement executor and the declaration-registration pre-pass.
//!
//! Statements execute sequentially; `break`/`continue`/`exit` propagate as
//! [`Flow`] signals, structured exceptions as [`RunError::Raise`]. The
//! registration pass walks the parsed declaration list before the main block
//! runs: types first (in declaration order), then classes with their VMTs,
//! operators, and the free-function table.

use crate::{
    class::{ClassId, ClassMeta, InterfaceMeta, MethodEntry, OperatorBinding, PropertyMeta},
    exception_public::CodeLoc,
    exception_private::{RunError, RunResult},
    eval::{Interp, shallow},
    expressions::{
        BracketElem, ClassDecl, Decl, Expr, ExprLoc, FuncKind, FunctionDef, Identifier, OnClause, Stmt, StmtLoc,
        TypeExpr, VirtualMode,
    },
    heap::{HeapData, ReleaseQueue},
    intern::{StaticSymbols, Symbol},
    io::PrintWriter,
    namespace::{Binding, PlaceRef, ScopeId},
    resource::ResourceTracker,
    typereg::{EnumType, TypeId, TypeKind},
    value::{Value, values_cmp, values_equal},
};

/// Control-flow signal produced by statement execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Normal,
    Break,
    Continue,
    /// Terminates the current call (or the program at top level).
    Exit,
}

impl<'a, T: ResourceTracker, P: PrintWriter> Interp<'a, T, P> {
    // ------------------------------------------------------------------
    // Statement execution
    // ------------------------------------------------------------------

    /// Executes statements in order, stopping on any non-normal signal.
    pub fn exec_block(&mut self, stmts: &[StmtLoc]) -> RunResult<Flow> {
        for stmt in stmts {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    pub fn exec_stmt(&mut self, stmt: &StmtLoc) -> RunResult<Flow> {
        let pos = stmt.pos;
        match &stmt.stmt {
            Stmt::VarDecl {
                names,
                typ,
                init,
                external,
            } => {
                self.exec_var_decl(names, typ.as_ref(), init.as_ref(), *external, pos)?;
                Ok(Flow::Normal)
            }
            Stmt::ConstDecl { name, typ, value } => {
                let declared = match typ {
                    Some(te) => Some(self.resolve_type_expr(te, pos)?),
                    None => None,
                };
                let v = self.eval_hint(value, declared)?;
                let typ = match declared {
                    Some(t) => t,
                    None => self.infer_type_of(&v),
                };
                let v = self.coerce_value(v, typ, pos)?;
                let v = self.retain_for_store(v);
                let current = self.scopes.current();
                self.scopes.scope_mut(current).define(
                    name.name,
                    Binding::Value {
                        value: v,
                        typ,
                        constant: true,
                    },
                );
                Ok(Flow::Normal)
            }
            Stmt::Assign { target, op, value } => {
                let v = match op {
                    None => {
                        let hint = self.assign_target_hint(target);
                        self.eval_hint(value, hint)?
                    }
                    Some(op) => {
                        let current = self.eval(target)?;
                        let rhs = self.eval(value)?;
                        let combined = self.binary_values(*op, &current, &rhs, pos);
                        self.discard(current)?;
                        self.discard(rhs)?;
                        combined?
                    }
                };
                self.assign_to(target, v, pos)?;
                Ok(Flow::Normal)
            }
            Stmt::Expr(e) => {
                let v = self.eval(e)?;
                self.discard(v)?;
                Ok(Flow::Normal)
            }
            Stmt::Block(stmts) => self.exec_block(stmts),
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let c = self.eval(cond)?;
                let taken = c.is_truthy(&self.heap);
                self.discard(c)?;
                if taken {
                    self.exec_stmt(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.exec_stmt(else_branch)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::Case {
                selector,
                arms,
                else_branch,
            } => self.exec_case(selector, arms, else_branch.as_deref(), pos),
            Stmt::While { cond, body } => {
                loop {
                    let c = self.eval(cond)?;
                    let go = c.is_truthy(&self.heap);
                    self.discard(c)?;
                    if !go {
                        return Ok(Flow::Normal);
                    }
                    match self.exec_stmt(body)? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Exit => return Ok(Flow::Exit),
                    }
                }
            }
            Stmt::Repeat { body, until } => {
                loop {
                    match self.exec_block(body)? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Exit => return Ok(Flow::Exit),
                    }
                    let c = self.eval(until)?;
                    let done = c.is_truthy(&self.heap);
                    self.discard(c)?;
                    if done {
                        return Ok(Flow::Normal);
                    }
                }
            }
            Stmt::ForTo {
                var,
                declare_var,
                from,
                to,
                downto,
                body,
            } => self.exec_for_to(var, *declare_var, from, to, *downto, body, pos),
            Stmt::ForIn {
                var,
                declare_var,
                iterable,
                body,
            } => self.exec_for_in(var, *declare_var, iterable, body, pos),
            Stmt::With { object, body } => {
                let objv = self.eval(object)?;
                let scope = self
                    .scopes
                    .push(self.scopes.current(), None, self.heap.tracker())
                    .map_err(|e| RunError::from_resource(e, pos))?;
                self.scopes.scope_mut(scope).with_object = Some(objv);
                let flow = self.exec_stmt(body);
                let mut queue = ReleaseQueue::new();
                self.scopes.pop(&mut self.heap, &mut queue, None);
                self.drain(queue)?;
                flow
            }
            Stmt::Exit { value } => {
                if let Some(value) = value {
                    let v = self.eval(value)?;
                    if let Some(frame_scope) = self.scopes.current_frame() {
                        let result_sym = Symbol::from(StaticSymbols::Result);
                        self.assign_binding(frame_scope, result_sym, v, pos)?;
                    } else {
                        self.discard(v)?;
                    }
                }
                Ok(Flow::Exit)
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Raise { value } => Err(self.exec_raise(value.as_ref(), pos)?),
            Stmt::Try {
                body,
                handlers,
                catch_all,
                finally,
            } => self.exec_try(body, handlers, catch_all.as_deref(), finally.as_deref()),
        }
    }

    fn exec_var_decl(
        &mut self,
        names: &[Identifier],
        typ: Option<&TypeExpr>,
        init: Option<&ExprLoc>,
        external: bool,
        pos: CodeLoc,
    ) -> RunResult<()> {
        let current = self.scopes.current();
        if external {
            // External variables bind to host storage and are never
            // zero-initialized.
            for name in names {
                self.scopes.scope_mut(current).define(name.name, Binding::External);
            }
            return Ok(());
        }
        let declared = match typ {
            Some(te) => Some(self.resolve_type_expr(te, pos)?),
            None => None,
        };
        if let (Some(init), [name]) = (init, names) {
            let v = self.eval_hint(init, declared)?;
            let typ = match declared {
                Some(t) => t,
                None => self.infer_type_of(&v),
            };
            let v = self.coerce_value(v, typ, pos)?;
            let v = self.retain_for_store(v);
            self.scopes.scope_mut(current).define(
                name.name,
                Binding::Value {
                    value: v,
                    typ,
                    constant: false,
                },
            );
            return Ok(());
        }
        let Some(typ) = declared else {
            return Err(RunError::fatal("variable declaration needs a type", pos));
        };
        // One fresh zero value per name; mutable zero values are never
        // shared between bindings.
        for name in names {
            let zero = self
                .typereg
                .default_value(typ, &mut self.heap)
                .map_err(|e| RunError::from_resource(e, pos))?;
            self.scopes.scope_mut(current).define(
                name.name,
                Binding::Value {
                    value: zero,
                    typ,
                    constant: false,
                },
            );
        }
        Ok(())
    }

    /// The declared type of an assignment target, used as the literal type
    /// context for the right-hand side.
    pub fn assign_target_hint(&mut self, target: &ExprLoc) -> Option<TypeId> {
        match &target.expr {
            Expr::Name(id) => {
                let chain: Vec<ScopeId> = self.scopes.chain(self.scopes.current()).collect();
                for sid in chain {
                    match self.scopes.scope(sid).binding(id.name) {
                        Some(Binding::Value { typ, .. } | Binding::VarParam { typ, .. }) => return Some(*typ),
                        Some(_) => return None,
                        None => {}
                    }
                    if self.scopes.scope(sid).frame.is_some()
                        && let Some(frame) = self.scopes.scope(sid).frame.as_ref()
                        && let Some(class) = frame.defining_class
                        && let Some(typ) = self.classes.field_type(class, id.name)
                    {
                        return Some(typ);
                    }
                }
                None
            }
            Expr::Member { object, name } => {
                // Only cheap, effect-free receivers are probed for a hint.
                if let Expr::Name(obj_name) = &object.expr {
                    let chain: Vec<ScopeId> = self.scopes.chain(self.scopes.current()).collect();
                    for sid in chain {
                        if let Some(Binding::Value { typ, .. }) = self.scopes.scope(sid).binding(obj_name.name) {
                            let typ = *typ;
                            if let TypeKind::Class(cid) = self.typereg.kind(typ) {
                                return self.classes.field_type(*cid, name.name);
                            }
                            if let TypeKind::Record { fields, .. } = self.typereg.kind(typ) {
                                return fields.iter().find(|(n, _)| *n == name.name).map(|(_, t)| *t);
                            }
                            return None;
                        }
                    }
                }
                None
            }
            _ => None,
        }
    }

    /// Assigns an evaluated value to a target expression.
    pub fn assign_to(&mut self, target: &ExprLoc, value: Value, pos: CodeLoc) -> RunResult<()> {
        match &target.expr {
            Expr::Name(id) => self.assign_name(id, value, pos),
            Expr::Member { object, name } => {
                let objv = self.eval(object)?;
                let result = self.assign_member(&objv, name.name, value, pos);
                self.discard(objv)?;
                result
            }
            Expr::Index { object, indexes } => {
                let objv = self.eval(object)?;
                let result = self.assign_index(&objv, indexes, value, pos);
                self.discard(objv)?;
                result
            }
            _ => {
                self.discard(value)?;
                Err(RunError::fatal("target is not assignable", pos))
            }
        }
    }

    fn assign_name(&mut self, id: &Identifier, value: Value, pos: CodeLoc) -> RunResult<()> {
        let chain: Vec<ScopeId> = self.scopes.chain(self.scopes.current()).collect();
        for sid in chain {
            if self.scopes.scope(sid).has(id.name) {
                return self.assign_binding(sid, id.name, value, pos);
            }
            if let Some(withv) = self.scopes.scope(sid).with_object.as_ref().map(shallow)
                && self.member_assignable(&withv, id.name)
            {
                return self.assign_member(&withv, id.name, value, pos);
            }
            if self.scopes.scope(sid).frame.is_some()
                && let Some(frame) = self.scopes.scope(sid).frame.as_ref()
                && let Some(defining) = frame.defining_class
            {
                let self_sym = Symbol::from(StaticSymbols::SelfName);
                let selfv = match self.scopes.scope(sid).binding(self_sym) {
                    Some(Binding::Value { value, .. }) => shallow(value),
                    _ => Value::ClassRef(defining),
                };
                if self.member_assignable(&selfv, id.name) {
                    return self.assign_member(&selfv, id.name, value, pos);
                }
            }
        }
        self.discard(value)?;
        Err(RunError::fatal(
            format!("assignment to unknown name '{}'", self.interns.get(id.name)),
            pos,
        ))
    }

    fn member_assignable(&self, objv: &Value, name: Symbol) -> bool {
        match objv {
            Value::ClassRef(cid) => self.classes.find_class_var(*cid, name).is_some(),
            Value::Ref(id) if matches!(self.heap.get(*id), HeapData::Record(_)) => {
                let HeapData::Record(rec) = self.heap.get(*id) else {
                    unreachable!()
                };
                rec.get(name).is_some()
            }
            _ => match self.value_class(objv) {
                Some(class) => {
                    self.classes.field_type(class, name).is_some()
                        || self.classes.find_property(class, name).is_some()
                        || self.classes.find_class_var(class, name).is_some()
                }
                None => false,
            },
        }
    }

    /// Assigns to `object.name`: fields, properties (through their write
    /// specifier), class variables, and record fields.
    pub fn assign_member(&mut self, objv: &Value, name: Symbol, value: Value, pos: CodeLoc) -> RunResult<()> {
        match objv {
            Value::Ref(id) => {
                let id = *id;
                match self.heap.get(id) {
                    HeapData::Object(inst) => {
                        if inst.destroyed {
                            self.discard(value)?;
                            return Err(self.raise(StaticSymbols::EObjectDestroyed, "Object already destroyed", pos));
                        }
                        let class = inst.class;
                        if let Some(typ) = self.classes.field_type(class, name) {
                            return self.write_place(PlaceRef::Field { obj: id, name }, typ, value, pos);
                        }
                        if let Some(prop) = self.classes.find_property(class, name) {
                            return self.property_set(objv, class, prop, Vec::new(), value, pos);
                        }
                        if let Some(owner) = self.classes.find_class_var(class, name) {
                            let typ = self.classes.class(owner).class_vars[&name].0;
                            return self.write_place(PlaceRef::ClassVar { class: owner, name }, typ, value, pos);
                        }
                        self.discard(value)?;
                        Err(RunError::fatal(
                            format!("unknown field '{}'", self.interns.get(name)),
                            pos,
                        ))
                    }
                    HeapData::Record(rec) => {
                        let typ = rec.typ;
                        let field_typ = match self.typereg.kind(typ) {
                            TypeKind::Record { fields, .. } => {
                                fields.iter().find(|(n, _)| *n == name).map(|(_, t)| *t)
                            }
                            _ => None,
                        };
                        let field_typ = field_typ.unwrap_or(TypeId::VARIANT);
                        self.write_place(PlaceRef::RecordField { rec: id, name }, field_typ, value, pos)
                    }
                    _ => {
                        self.discard(value)?;
                        Err(RunError::fatal(
                            format!("{} has no assignable members", self.describe(objv)),
                            pos,
                        ))
                    }
                }
            }
            Value::ClassRef(cid) | Value::Nil { class: Some(cid) } => {
                let cid = *cid;
                if let Some(owner) = self.classes.find_class_var(cid, name) {
                    let typ = self.classes.class(owner).class_vars[&name].0;
                    return self.write_place(PlaceRef::ClassVar { class: owner, name }, typ, value, pos);
                }
                self.discard(value)?;
                Err(RunError::fatal(
                    format!("unknown class variable '{}'", self.interns.get(name)),
                    pos,
                ))
            }
            Value::Interface { obj, .. } => {
                let obj = *obj;
                self.assign_member(&Value::Ref(obj), name, value, pos)
            }
            _ => {
                self.discard(value)?;
                Err(RunError::fatal(
                    format!("{} has no assignable members", self.describe(objv)),
                    pos,
                ))
            }
        }
    }

    /// Assigns to `object[indexes]`: array elements or the default property.
    fn assign_index(&mut self, objv: &Value, indexes: &[ExprLoc], value: Value, pos: CodeLoc) -> RunResult<()> {
        match objv {
            Value::Ref(id) => {
                let id = *id;
                match self.heap.get(id) {
                    HeapData::Array(_) => {
                        // Drill through all but the last dimension.
                        let mut current = self.recount(shallow(objv));
                        for index_expr in &indexes[..indexes.len() - 1] {
                            let index = self.eval(index_expr)?;
                            let next = self.index_into(&current, &index, index_expr.pos);
                            self.discard(index)?;
                            self.discard(current)?;
                            current = next?;
                        }
                        let last = &indexes[indexes.len() - 1];
                        let index = self.eval(last)?;
                        let i = index.as_int();
                        self.discard(index)?;
                        let Some(i) = i else {
                            self.discard(current)?;
                            self.discard(value)?;
                            return Err(self.raise(
                                StaticSymbols::EIndexOutOfRange,
                                "Array index must be an integer",
                                last.pos,
                            ));
                        };
                        let result = match &current {
                            Value::Ref(arr_id) if matches!(self.heap.get(*arr_id), HeapData::Array(_)) => {
                                let HeapData::Array(arr) = self.heap.get(*arr_id) else {
                                    unreachable!()
                                };
                                let elem = arr.elem;
                                self.write_place(PlaceRef::Element { arr: *arr_id, index: i }, elem, value, pos)
                            }
                            _ => {
                                self.discard(value)?;
                                Err(RunError::fatal("index into non-array", pos))
                            }
                        };
                        self.discard(current)?;
                        result
                    }
                    HeapData::Object(inst) => {
                        let class = inst.class;
                        let Some(prop) = self.classes.default_property(class) else {
                            self.discard(value)?;
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
                        self.property_set(objv, class, prop, index_args, value, pos)
                    }
                    _ => {
                        self.discard(value)?;
                        Err(RunError::fatal(
                            format!("{} cannot be index-assigned", self.describe(objv)),
                            pos,
                        ))
                    }
                }
            }
            _ => {
                self.discard(value)?;
                Err(RunError::fatal(
                    format!("{} cannot be index-assigned", self.describe(objv)),
                    pos,
                ))
            }
        }
    }

    fn index_into(&mut self, arrv: &Value, index: &Value, pos: CodeLoc) -> RunResult<Value> {
        let Some(i) = index.as_int() else {
            return Err(self.raise(StaticSymbols::EIndexOutOfRange, "Array index must be an integer", pos));
        };
        let Value::Ref(id) = arrv else {
            return Err(RunError::fatal("index into non-array", pos));
        };
        let HeapData::Array(arr) = self.heap.get(*id) else {
            return Err(RunError::fatal("index into non-array", pos));
        };
        match arr.offset_of(i) {
            Some(offset) => {
                let v = shallow(&arr.values[offset]);
                Ok(self.recount(v))
            }
            None => Err(self.raise(
                StaticSymbols::EIndexOutOfRange,
                format!("Array index {i} out of bounds"),
                pos,
            )),
        }
    }

    // ------------------------------------------------------------------
    // Control flow details
    // ------------------------------------------------------------------

    fn exec_case(
        &mut self,
        selector: &ExprLoc,
        arms: &[crate::expressions::CaseArm],
        else_branch: Option<&[StmtLoc]>,
        _pos: CodeLoc,
    ) -> RunResult<Flow> {
        let sel = self.eval(selector)?;
        for arm in arms {
            for label in &arm.labels {
                let matched = match label {
                    BracketElem::Single(e) => {
                        let v = self.eval(e)?;
                        let m = values_equal(&sel, &v, &self.heap) == Some(true);
                        self.discard(v)?;
                        m
                    }
                    BracketElem::Range(lo, hi) => {
                        let lov = self.eval(lo)?;
                        let hiv = self.eval(hi)?;
                        let m = values_cmp(&lov, &sel, &self.heap).is_some_and(|o| o.is_le())
                            && values_cmp(&sel, &hiv, &self.heap).is_some_and(|o| o.is_le());
                        self.discard(lov)?;
                        self.discard(hiv)?;
                        m
                    }
                };
                if matched {
                    self.discard(sel)?;
                    return self.exec_stmt(&arm.body);
                }
            }
        }
        self.discard(sel)?;
        match else_branch {
            Some(stmts) => self.exec_block(stmts),
            None => Ok(Flow::Normal),
        }
    }

    fn exec_for_to(
        &mut self,
        var: &Identifier,
        declare_var: bool,
        from: &ExprLoc,
        to: &ExprLoc,
        downto: bool,
        body: &StmtLoc,
        pos: CodeLoc,
    ) -> RunResult<Flow> {
        let fromv = self.eval(from)?;
        let tov = self.eval(to)?;
        // Enum-typed loops iterate ordinals and rebuild enum values.
        let enum_typ = match &fromv {
            Value::Enum { typ, .. } => Some(*typ),
            _ => None,
        };
        let start = match &fromv {
            Value::Enum { ordinal, .. } => Some(*ordinal),
            other => other.as_int(),
        };
        let stop = match &tov {
            Value::Enum { ordinal, .. } => Some(*ordinal),
            other => other.as_int(),
        };
        self.discard(fromv)?;
        self.discard(tov)?;
        let (Some(start), Some(stop)) = (start, stop) else {
            return Err(RunError::fatal("for-loop bounds must be ordinal values", pos));
        };
        let loop_scope = if declare_var {
            let scope = self
                .scopes
                .push(self.scopes.current(), None, self.heap.tracker())
                .map_err(|e| RunError::from_resource(e, pos))?;
            let typ = match enum_typ {
                Some(t) => t,
                None => TypeId::INTEGER,
            };
            self.scopes.scope_mut(scope).define(
                var.name,
                Binding::Value {
                    value: Value::Int(0),
                    typ,
                    constant: false,
                },
            );
            Some(scope)
        } else {
            None
        };
        let mut flow = Flow::Normal;
        let mut i = start;
        loop {
            if (downto && i < stop) || (!downto && i > stop) {
                break;
            }
            let loop_value = match enum_typ {
                Some(typ) => Value::Enum { typ, ordinal: i },
                None => Value::Int(i),
            };
            let assign_result = self.assign_loop_var(var, loop_value, pos);
            if let Err(e) = assign_result {
                self.cleanup_loop_scope(loop_scope)?;
                return Err(e);
            }
            match self.exec_stmt(body) {
                Ok(Flow::Normal | Flow::Continue) => {}
                Ok(Flow::Break) => break,
                Ok(Flow::Exit) => {
                    flow = Flow::Exit;
                    break;
                }
                Err(e) => {
                    self.cleanup_loop_scope(loop_scope)?;
                    return Err(e);
                }
            }
            if downto {
                if i == stop {
                    break;
                }
                i -= 1;
            } else {
                if i == stop {
                    break;
                }
                i += 1;
            }
        }
        self.cleanup_loop_scope(loop_scope)?;
        Ok(flow)
    }

    fn exec_for_in(
        &mut self,
        var: &Identifier,
        declare_var: bool,
        iterable: &ExprLoc,
        body: &StmtLoc,
        pos: CodeLoc,
    ) -> RunResult<Flow> {
        let iterv = self.eval(iterable)?;
        // Build the iteration plan up front; arrays re-read length each step.
        enum Plan {
            ArrayByIndex(crate::heap::HeapId),
            Items(Vec<Value>),
        }
        let (plan, var_typ) = match &iterv {
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Array(arr) => (Plan::ArrayByIndex(*id), arr.elem),
                HeapData::Str(s) => {
                    let chars: Vec<String> = s.chars().map(|c| c.to_string()).collect();
                    let mut items = Vec::with_capacity(chars.len());
                    for c in chars {
                        let sid = self.alloc(HeapData::Str(c), pos)?;
                        items.push(Value::Ref(sid));
                    }
                    (Plan::Items(items), TypeId::STRING)
                }
                HeapData::Set(set) => {
                    let elem = set.elem;
                    // Sets iterate in the element enum's declared order.
                    let items = match self.typereg.kind(elem) {
                        TypeKind::Enum(e) => e
                            .values
                            .iter()
                            .filter(|(_, o)| set.contains(*o))
                            .map(|(_, o)| Value::Enum { typ: elem, ordinal: *o })
                            .collect(),
                        _ => set.iter_sorted().into_iter().map(Value::Int).collect(),
                    };
                    (Plan::Items(items), elem)
                }
                _ => {
                    let msg = format!("{} is not iterable", self.describe(&iterv));
                    self.discard(iterv)?;
                    return Err(self.raise(StaticSymbols::EScriptError, msg, pos));
                }
            },
            Value::TypeInfo(typ) => match self.typereg.kind(*typ) {
                TypeKind::Enum(e) => {
                    let typ = *typ;
                    let items = e
                        .values
                        .iter()
                        .map(|(_, o)| Value::Enum { typ, ordinal: *o })
                        .collect();
                    (Plan::Items(items), typ)
                }
                _ => {
                    let msg = format!("{} is not iterable", self.describe(&iterv));
                    self.discard(iterv)?;
                    return Err(self.raise(StaticSymbols::EScriptError, msg, pos));
                }
            },
            _ => {
                let msg = format!("{} is not iterable", self.describe(&iterv));
                self.discard(iterv)?;
                return Err(self.raise(StaticSymbols::EScriptError, msg, pos));
            }
        };
        let loop_scope = if declare_var {
            let scope = self
                .scopes
                .push(self.scopes.current(), None, self.heap.tracker())
                .map_err(|e| RunError::from_resource(e, pos))?;
            self.scopes.scope_mut(scope).define(
                var.name,
                Binding::Value {
                    value: Value::Unassigned,
                    typ: var_typ,
                    constant: false,
                },
            );
            Some(scope)
        } else {
            None
        };
        let mut flow = Flow::Normal;
        let run = |this: &mut Self, flow: &mut Flow| -> RunResult<()> {
            match plan {
                Plan::ArrayByIndex(arr_id) => {
                    let mut offset = 0usize;
                    loop {
                        let item = {
                            let HeapData::Array(arr) = this.heap.get(arr_id) else {
                                break;
                            };
                            if offset >= arr.len() {
                                break;
                            }
                            shallow(&arr.values[offset])
                        };
                        let item = this.recount(item);
                        this.assign_loop_var(var, item, pos)?;
                        match this.exec_stmt(body)? {
                            Flow::Normal | Flow::Continue => {}
                            Flow::Break => break,
                            Flow::Exit => {
                                *flow = Flow::Exit;
                                break;
                            }
                        }
                        offset += 1;
                    }
                    Ok(())
                }
                Plan::Items(items) => {
                    let mut iter = items.into_iter();
                    loop {
                        let Some(item) = iter.next() else { break };
                        this.assign_loop_var(var, item, pos)?;
                        match this.exec_stmt(body)? {
                            Flow::Normal | Flow::Continue => {}
                            Flow::Break => break,
                            Flow::Exit => {
                                *flow = Flow::Exit;
                                break;
                            }
                        }
                    }
                    // Unconsumed items still hold references.
                    for item in iter {
                        this.discard(item)?;
                    }
                    Ok(())
                }
            }
        };
        let result = run(self, &mut flow);
        self.cleanup_loop_scope(loop_scope)?;
        self.discard(iterv)?;
        result?;
        Ok(flow)
    }

    fn assign_loop_var(&mut self, var: &Identifier, value: Value, pos: CodeLoc) -> RunResult<()> {
        let chain: Vec<ScopeId> = self.scopes.chain(self.scopes.current()).collect();
        for sid in chain {
            if self.scopes.scope(sid).has(var.name) {
                return self.assign_binding(sid, var.name, value, pos);
            }
        }
        self.discard(value)?;
        Err(RunError::fatal(
            format!("unknown loop variable '{}'", self.interns.get(var.name)),
            pos,
        ))
    }

    fn cleanup_loop_scope(&mut self, scope: Option<ScopeId>) -> RunResult<()> {
        if scope.is_some() {
            let mut queue = ReleaseQueue::new();
            self.scopes.pop(&mut self.heap, &mut queue, None);
            self.drain(queue)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Exceptions
    // ------------------------------------------------------------------

    /// Builds the error for a `raise` statement. Bare `raise` re-raises the
    /// exception currently being handled.
    fn exec_raise(&mut self, value: Option<&ExprLoc>, pos: CodeLoc) -> RunResult<RunError> {
        match value {
            Some(e) => {
                let v = self.eval(e)?;
                if self.value_class(&v).is_none() {
                    let msg = format!("can only raise exception objects, got {}", self.describe(&v));
                    self.discard(v)?;
                    return Ok(self.raise(StaticSymbols::EScriptError, msg, pos));
                }
                let v = self.retain_for_store(v);
                self.raise_frames = self.scopes.capture_frames();
                Ok(RunError::Raise { value: v, pos })
            }
            None => match self.handler_stack.last().map(shallow) {
                Some(v) => {
                    let v = self.retain_for_store(v);
                    Ok(RunError::Raise { value: v, pos })
                }
                None => Ok(self.raise(
                    StaticSymbols::EScriptError,
                    "No exception to re-raise",
                    pos,
                )),
            },
        }
    }

    fn exec_try(
        &mut self,
        body: &[StmtLoc],
        handlers: &[OnClause],
        catch_all: Option<&[StmtLoc]>,
        finally: Option<&[StmtLoc]>,
    ) -> RunResult<Flow> {
        let outcome = self.exec_block(body);
        let outcome = match outcome {
            Err(RunError::Raise { value, pos: raise_pos }) if !handlers.is_empty() || catch_all.is_some() => {
                self.handle_exception(value, raise_pos, handlers, catch_all)
            }
            other => other,
        };
        // The finally block runs on every exit path. It must not swallow an
        // in-flight exception unless it raises its own.
        if let Some(finally) = finally {
            let finally_result = self.exec_block(finally);
            match finally_result {
                Ok(Flow::Normal) => outcome,
                Ok(flow) => {
                    // A control-flow signal from the finally block overrides
                    // the protected block's outcome.
                    if let Err(RunError::Raise { value, .. }) = outcome {
                        self.release_owned_value(value)?;
                    }
                    Ok(flow)
                }
                Err(e) => {
                    if let Err(RunError::Raise { value, .. }) = outcome {
                        self.release_owned_value(value)?;
                    }
                    Err(e)
                }
            }
        } else {
            outcome
        }
    }

    /// Matches a raised exception against handler clauses, most specific
    /// first as written. A bare `except` (or trailing `else`) catches
    /// everything.
    fn handle_exception(
        &mut self,
        value: Value,
        raise_pos: CodeLoc,
        handlers: &[OnClause],
        catch_all: Option<&[StmtLoc]>,
    ) -> RunResult<Flow> {
        let class = self.value_class(&value);
        for clause in handlers {
            let Some(handler_class) = self.classes.lookup_class(clause.class_name.name) else {
                self.release_owned_value(value)?;
                return Err(RunError::fatal(
                    format!("unknown exception class '{}'", self.interns.get(clause.class_name.name)),
                    clause.class_name.pos,
                ));
            };
            let matches = class.is_some_and(|c| self.classes.is_ancestor(handler_class, c));
            if !matches {
                continue;
            }
            let scope = self
                .scopes
                .push(self.scopes.current(), None, self.heap.tracker())
                .map_err(|e| RunError::from_resource(e, raise_pos))?;
            if let Some(var) = &clause.var {
                let bound = self.retain_for_store(shallow(&value));
                let typ = self.classes.class(handler_class).typ;
                self.scopes.scope_mut(scope).define(
                    var.name,
                    Binding::Value {
                        value: bound,
                        typ,
                        constant: false,
                    },
                );
            }
            let stack_copy = self.retain_for_store(shallow(&value));
            self.handler_stack.push(stack_copy);
            // The error's own reference is no longer needed: the handler
            // stack (and any `on E:` binding) keeps the object alive.
            self.release_owned_value(value)?;
            let result = self.exec_stmt(&clause.body);
            let handled = self.handler_stack.pop().expect("handler stack balanced");
            self.release_owned_value(handled)?;
            let mut queue = ReleaseQueue::new();
            self.scopes.pop(&mut self.heap, &mut queue, None);
            self.drain(queue)?;
            return result;
        }
        if let Some(body) = catch_all {
            let stack_copy = self.retain_for_store(shallow(&value));
            self.handler_stack.push(stack_copy);
            self.release_owned_value(value)?;
            let result = self.exec_block(body);
            let handled = self.handler_stack.pop().expect("handler stack balanced");
            self.release_owned_value(handled)?;
            return result;
        }
        Err(RunError::Raise {
            value,
            pos: raise_pos,
        })
    }

    // ------------------------------------------------------------------
    // Declaration registration
    // ------------------------------------------------------------------

    /// Registers every hoisted declaration: types in declaration order, then
    /// operator overloads. Class constants are evaluated here.
    pub fn register_decls(&mut self) -> RunResult<()> {
        let program = self.program;
        for decl in &program.decls {
            match decl {
                Decl::Function(fid) => {
                    let name = program.function(*fid).name.name;
                    self.func_table.entry(name).or_default().push(*fid);
                }
                _ => {}
            }
        }
        for decl in &program.decls {
            match decl {
                Decl::Enum(decl) => {
                    let mut values = Vec::with_capacity(decl.values.len());
                    let mut next_ordinal = 0i64;
                    for (name, explicit) in &decl.values {
                        let ordinal = match explicit {
                            Some(e) => {
                                let v = self.eval(e)?;
                                let n = v.as_int();
                                self.discard(v)?;
                                n.ok_or_else(|| RunError::fatal("enum ordinal must be an integer", e.pos))?
                            }
                            None => next_ordinal,
                        };
                        next_ordinal = ordinal + 1;
                        values.push((name.name, ordinal));
                    }
                    let typ = self.typereg.register_named(
                        decl.name.name,
                        TypeKind::Enum(EnumType {
                            name: decl.name.name,
                            values,
                        }),
                    );
                    self.typereg.register_enum_consts(typ);
                }
                Decl::Record(decl) => {
                    let mut fields = Vec::new();
                    for field in &decl.fields {
                        let typ = self.resolve_type_expr(&field.typ, decl.name.pos)?;
                        for name in &field.names {
                            fields.push((name.name, typ));
                        }
                    }
                    self.typereg.register_named(
                        decl.name.name,
                        TypeKind::Record {
                            name: Some(decl.name.name),
                            fields,
                        },
                    );
                }
                Decl::Alias { name, ty } => {
                    let id = self.resolve_type_expr(ty, name.pos)?;
                    self.typereg.register_alias(name.name, id);
                }
                Decl::Interface(decl) => {
                    let parent = match &decl.parent {
                        Some(p) => Some(self.classes.lookup_interface(p.name).ok_or_else(|| {
                            RunError::fatal(
                                format!("unknown parent interface '{}'", self.interns.get(p.name)),
                                p.pos,
                            )
                        })?),
                        None => None,
                    };
                    let methods = decl
                        .methods
                        .iter()
                        .map(|m| (m.name.name, u8::try_from(m.params.len()).unwrap_or(u8::MAX)))
                        .collect();
                    let properties = decl.properties.iter().map(|p| p.name.name).collect();
                    let iid = self.classes.add_interface(InterfaceMeta {
                        name: decl.name.name,
                        parent,
                        typ: TypeId::VARIANT, // patched right below
                        methods,
                        properties,
                    });
                    let typ = self.typereg.register_named(decl.name.name, TypeKind::Interface(iid));
                    self.classes.interface_mut(iid).typ = typ;
                }
                Decl::Class(decl) => {
                    self.register_class(decl)?;
                }
                Decl::Operator(_) | Decl::Function(_) => {}
            }
        }
        // Operators last: their operand types and target functions must
        // already exist.
        for decl in &program.decls {
            let Decl::Operator(op_decl) = decl else { continue };
            let mut operands = Vec::with_capacity(op_decl.operands.len());
            for te in &op_decl.operands {
                operands.push(self.resolve_type_expr(te, op_decl.pos)?);
            }
            let binding = if let Some(fids) = self.func_table.get(&op_decl.uses.name) {
                OperatorBinding {
                    op: op_decl.op,
                    operands: operands.clone(),
                    fid: fids[0],
                    self_arg: None,
                }
            } else if let Some(TypeKind::Class(cid)) = operands.first().map(|t| self.typereg.kind(*t).clone())
                && let Some(entry) = self.classes.find_method_any(cid, op_decl.uses.name)
            {
                OperatorBinding {
                    op: op_decl.op,
                    operands: operands.clone(),
                    fid: entry.fid,
                    self_arg: Some(0),
                }
            } else {
                return Err(RunError::fatal(
                    format!("unknown operator function '{}'", self.interns.get(op_decl.uses.name)),
                    op_decl.pos,
                ));
            };
            match operands.first().map(|t| self.typereg.kind(*t).clone()) {
                Some(TypeKind::Class(cid)) => self.classes.class_mut(cid).operators.push(binding),
                _ => self.classes.global_operators.push(binding),
            }
        }
        Ok(())
    }

    /// Registers one class declaration; partial declarations merge into the
    /// existing metadata record before the VMT is rebuilt.
    fn register_class(&mut self, decl: &ClassDecl) -> RunResult<ClassId> {
        let program = self.program;
        let pos = decl.name.pos;
        let existing = self.classes.lookup_class(decl.name.name);
        let cid = match existing {
            Some(cid) if decl.is_partial => cid,
            Some(_) => {
                return Err(RunError::fatal(
                    format!("duplicate class '{}'", self.interns.get(decl.name.name)),
                    pos,
                ));
            }
            None => {
                let parent = match &decl.parent {
                    Some(p) => Some(self.classes.lookup_class(p.name).ok_or_else(|| {
                        RunError::fatal(format!("unknown parent class '{}'", self.interns.get(p.name)), p.pos)
                    })?),
                    // Classes without an explicit parent inherit the root.
                    None => self.classes.lookup_class(self.interns.lookup("TObject").expect("root registered")),
                };
                let cid = self.classes.add_class(ClassMeta::shell(decl.name.name, parent, TypeId::VARIANT));
                let typ = self.typereg.register_named(decl.name.name, TypeKind::Class(cid));
                self.classes.class_mut(cid).typ = typ;
                cid
            }
        };
        {
            let meta = self.classes.class_mut(cid);
            meta.is_abstract |= decl.is_abstract;
            meta.is_external |= decl.is_external;
        }
        for iface in &decl.interfaces {
            let iid = self.classes.lookup_interface(iface.name).ok_or_else(|| {
                RunError::fatal(format!("unknown interface '{}'", self.interns.get(iface.name)), iface.pos)
            })?;
            self.classes.class_mut(cid).interfaces.push(iid);
        }
        for field in &decl.fields {
            let typ = self.resolve_type_expr(&field.typ, pos)?;
            for name in &field.names {
                self.classes.class_mut(cid).fields.insert(name.name, typ);
            }
        }
        for field in &decl.class_vars {
            let typ = self.resolve_type_expr(&field.typ, pos)?;
            for name in &field.names {
                let zero = self
                    .typereg
                    .default_value(typ, &mut self.heap)
                    .map_err(|e| RunError::from_resource(e, pos))?;
                self.classes.class_mut(cid).class_vars.insert(name.name, (typ, zero));
            }
        }
        for (name, expr) in &decl.class_consts {
            let v = self.eval(expr)?;
            let v = self.retain_for_store(v);
            self.classes.class_mut(cid).class_consts.insert(name.name, v);
        }
        for &fid in &decl.methods {
            let def = program.function(fid);
            let entry = MethodEntry {
                fid,
                owner: cid,
                arity: u8::try_from(def.arity()).unwrap_or(u8::MAX),
                min_arity: u8::try_from(required_arity(def)).unwrap_or(u8::MAX),
                in_vmt: matches!(def.virtual_mode, VirtualMode::Virtual | VirtualMode::Override),
            };
            let meta = self.classes.class_mut(cid);
            let table = match def.kind {
                FuncKind::Constructor => &mut meta.constructors,
                _ if def.is_class_method => &mut meta.class_methods,
                _ => &mut meta.methods,
            };
            table.entry(def.name.name).or_default().push(entry);
        }
        for prop in &decl.properties {
            let typ = self.resolve_type_expr(&prop.typ, pos)?;
            let meta_prop = PropertyMeta {
                name: prop.name.name,
                typ,
                read: prop.read.map(|i| i.name),
                write: prop.write.map(|i| i.name),
                is_default: prop.is_default,
                has_params: !prop.params.is_empty(),
            };
            let meta = self.classes.class_mut(cid);
            meta.properties.insert(prop.name.name, meta_prop);
            if prop.is_default {
                meta.default_property = Some(prop.name.name);
            }
        }
        for nested in &decl.nested {
            let nested_id = self.register_class(nested)?;
            self.classes.class_mut(cid).nested.insert(nested.name.name, nested_id);
        }
        self.classes.build_vmt(cid, &program.functions);
        Ok(cid)
    }

    // ------------------------------------------------------------------
    // Type expression resolution
    // ------------------------------------------------------------------

    /// Resolves a written type expression against the registry; anonymous
    /// shapes are memoized.
    pub fn resolve_type_expr(&mut self, te: &TypeExpr, pos: CodeLoc) -> RunResult<TypeId> {
        match te {
            TypeExpr::Named(id) => self.typereg.lookup(id.name).ok_or_else(|| {
                RunError::fatal(format!("unknown type '{}'", self.interns.get(id.name)), id.pos)
            }),
            TypeExpr::Array { elem, bounds } => {
                let elem = self.resolve_type_expr(elem, pos)?;
                let bounds = match bounds {
                    None => None,
                    Some((lo, hi)) => {
                        let lo = self.const_int(lo, "array bound")?;
                        let hi = self.const_int(hi, "array bound")?;
                        if hi < lo - 1 {
                            return Err(RunError::fatal(format!("invalid array bounds {lo}..{hi}"), pos));
                        }
                        Some((lo, hi))
                    }
                };
                Ok(self.typereg.intern_array(elem, bounds))
            }
            TypeExpr::SetOf(id) => {
                let elem = self.typereg.lookup(id.name).ok_or_else(|| {
                    RunError::fatal(format!("unknown type '{}'", self.interns.get(id.name)), id.pos)
                })?;
                if !matches!(self.typereg.kind(elem), TypeKind::Enum(_) | TypeKind::Subrange { .. }) {
                    return Err(RunError::fatal("sets require an enum element type", id.pos));
                }
                Ok(self.typereg.intern_set(elem))
            }
            TypeExpr::Subrange { lo, hi } => {
                let lo = self.const_int(lo, "subrange bound")?;
                let hi = self.const_int(hi, "subrange bound")?;
                if hi < lo {
                    return Err(RunError::fatal(format!("invalid subrange {lo}..{hi}"), pos));
                }
                Ok(self.typereg.intern_subrange(lo, hi))
            }
            TypeExpr::ClassOf(id) => {
                let cid = self.classes.lookup_class(id.name).ok_or_else(|| {
                    RunError::fatal(format!("unknown class '{}'", self.interns.get(id.name)), id.pos)
                })?;
                Ok(self.typereg.intern_classof(cid))
            }
            TypeExpr::FuncPtr { .. } => Ok(TypeId::FUNCPTR),
        }
    }

    fn const_int(&mut self, e: &ExprLoc, what: &str) -> RunResult<i64> {
        let v = self.eval(e)?;
        let n = v.as_int();
        self.discard(v)?;
        n.ok_or_else(|| RunError::fatal(format!("{what} must be a constant integer"), e.pos))
    }

    /// Infers the declared type of an inferred (`var x := ...`) binding from
    /// its initial value.
    pub fn infer_type_of(&mut self, value: &Value) -> TypeId {
        if let Some(class) = self.value_class(value) {
            return self.classes.class(class).typ;
        }
        match value {
            Value::ClassRef(cid) => self.typereg.intern_classof(*cid),
            Value::Interface { iface, .. } => self.classes.interface(*iface).typ,
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::FuncPtr(_) => TypeId::FUNCPTR,
                _ => self
                    .typereg
                    .type_of_value(value, &self.heap)
                    .unwrap_or(TypeId::VARIANT),
            },
            _ => self
                .typereg
                .type_of_value(value, &self.heap)
                .unwrap_or(TypeId::VARIANT),
        }
    }

    // ------------------------------------------------------------------
    // Program entry
    // ------------------------------------------------------------------

    /// Executes the main statement list. The value of the last top-level
    /// expression statement becomes the program result.
    pub fn run_main(&mut self) -> RunResult<Option<Value>> {
        let program = self.program;
        let mut last: Option<Value> = None;
        for stmt in &program.stmts {
            if let Stmt::Expr(e) = &stmt.stmt {
                let v = self.eval(e)?;
                if let Some(prev) = last.take() {
                    self.discard(prev)?;
                }
                last = Some(v);
            } else {
                match self.exec_stmt(stmt)? {
                    Flow::Normal => {}
                    Flow::Exit => break,
                    Flow::Break | Flow::Continue => {
                        return Err(RunError::fatal("break/continue outside of a loop", stmt.pos));
                    }
                }
            }
        }
        Ok(last)
    }

    /// Releases global state at the end of a run: the global scope (firing
    /// destructors for objects held by globals), class variables and
    /// constants, and any leftover handler-stack entries.
    pub fn teardown(&mut self) -> RunResult<()> {
        let mut queue = ReleaseQueue::new();
        self.scopes
            .release(crate::namespace::GLOBAL_SCOPE, &mut self.heap, &mut queue, None);
        self.drain(queue)?;
        let values = self.classes.drain_values();
        for v in values {
            self.release_owned_value(v)?;
        }
        while let Some(v) = self.handler_stack.pop() {
            self.release_owned_value(v)?;
        }
        Ok(())
    }
}

/// Declared arity minus trailing defaulted parameters.
fn required_arity(def: &FunctionDef) -> usize {
    let mut required = def.params.len();
    while required > 0 && def.params[required - 1].default.is_some() {
        required -= 1;
    }
    required
}
