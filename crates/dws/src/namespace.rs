//! The environment: a heap of scopes forming parent-linked chains.
//!
//! Every function or method call pushes one scope for parameters and locals;
//! `for var`, `with`, and exception handlers push lightweight scopes. A
//! scope's parent is its *lexical* link: global for free functions and
//! methods, the captured creation scope for lambdas — so lookup never sees
//! the caller's locals.
//!
//! Scopes are reference counted: a child holds its parent chain alive, and a
//! lambda holds its captured chain alive after the creating frame returned.
//! When a scope's count reaches zero its bindings are visited in declaration
//! order and released; object references found there are deferred to the
//! evaluator (destructors may need to run).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    class::ClassId,
    exception_public::CodeLoc,
    expressions::ExprLoc,
    heap::{Heap, HeapId, ReleaseQueue},
    intern::Symbol,
    resource::{ResourceError, ResourceTracker},
    typereg::TypeId,
    value::Value,
};

/// Index of a scope in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) struct ScopeId(u32);

impl ScopeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The global (program-level) scope.
pub(crate) const GLOBAL_SCOPE: ScopeId = ScopeId(0);

/// An assignable place referenced by a `var`/`out` parameter.
#[derive(Debug, Clone, Copy)]
pub(crate) enum PlaceRef {
    /// A binding in some live scope.
    Binding { scope: ScopeId, name: Symbol },
    /// An object field.
    Field { obj: HeapId, name: Symbol },
    /// An array element; the source index is re-validated on each access.
    Element { arr: HeapId, index: i64 },
    /// A record field.
    RecordField { rec: HeapId, name: Symbol },
    /// Shared class-variable storage.
    ClassVar { class: ClassId, name: Symbol },
}

/// One name binding in a scope.
#[derive(Debug)]
pub(crate) enum Binding {
    /// An owned value with its declared type.
    Value {
        value: Value,
        typ: TypeId,
        constant: bool,
    },
    /// A `var`/`out` parameter: reads and writes flow through the place.
    VarParam { place: PlaceRef, typ: TypeId },
    /// A `lazy` parameter: the argument expression plus the scope to
    /// evaluate it in, re-evaluated on every read.
    Lazy { expr: ExprLoc, scope: ScopeId },
    /// A declared external variable; reads/writes go through host callbacks.
    External,
}

/// Per-call bookkeeping attached to a function scope.
#[derive(Debug)]
pub(crate) struct FrameInfo {
    pub func_name: Symbol,
    pub call_pos: CodeLoc,
    /// The class whose method body is executing (for `inherited` dispatch).
    pub defining_class: Option<ClassId>,
    /// `old <expr>` values captured at entry for the frame's ensure clauses.
    pub old_values: Vec<Value>,
}

/// One scope.
#[derive(Debug)]
pub(crate) struct Scope {
    pub parent: Option<ScopeId>,
    bindings: IndexMap<Symbol, Binding>,
    refs: u32,
    pub frame: Option<FrameInfo>,
    /// Set on `with` scopes: member names of this value resolve first.
    pub with_object: Option<Value>,
}

impl Scope {
    pub fn binding(&self, name: Symbol) -> Option<&Binding> {
        self.bindings.get(&name)
    }

    pub fn binding_mut(&mut self, name: Symbol) -> Option<&mut Binding> {
        self.bindings.get_mut(&name)
    }

    pub fn define(&mut self, name: Symbol, binding: Binding) {
        self.bindings.insert(name, binding);
    }

    pub fn has(&self, name: Symbol) -> bool {
        self.bindings.contains_key(&name)
    }

    /// Visits every binding in this scope only, in declaration order.
    pub fn range(&self, mut f: impl FnMut(Symbol, &Binding)) {
        for (name, binding) in &self.bindings {
            f(*name, binding);
        }
    }
}

/// The scope arena plus the active-scope stack.
#[derive(Debug)]
pub(crate) struct Scopes {
    slots: Vec<Option<Scope>>,
    free: Vec<ScopeId>,
    /// Active scopes, innermost last. The global scope is entry zero.
    stack: Vec<ScopeId>,
    /// Number of call frames on the stack (for recursion limiting).
    frames: usize,
}

impl Scopes {
    pub fn new() -> Self {
        let global = Scope {
            parent: None,
            bindings: IndexMap::new(),
            refs: 1,
            frame: None,
            with_object: None,
        };
        Self {
            slots: vec![Some(global)],
            free: Vec::new(),
            stack: vec![GLOBAL_SCOPE],
            frames: 0,
        }
    }

    pub fn current(&self) -> ScopeId {
        *self.stack.last().expect("scope stack never empty")
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        self.slots[id.index()].as_ref().expect("access to freed scope")
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        self.slots[id.index()].as_mut().expect("access to freed scope")
    }

    /// Current call depth (number of function frames).
    pub fn frame_depth(&self) -> usize {
        self.frames
    }

    /// Keeps a scope chain alive (closure capture).
    pub fn retain(&mut self, id: ScopeId) {
        let scope = self.slots[id.index()].as_mut().expect("retain of freed scope");
        scope.refs += 1;
    }

    /// Pushes a new scope whose lexical parent is `parent`. Function frames
    /// pass `Some(frame)` and count against the recursion limit.
    pub fn push(
        &mut self,
        parent: ScopeId,
        frame: Option<FrameInfo>,
        tracker: &impl ResourceTracker,
    ) -> Result<ScopeId, ResourceError> {
        if frame.is_some() {
            tracker.check_recursion_depth(self.frames)?;
            self.frames += 1;
        }
        self.retain(parent);
        let scope = Scope {
            parent: Some(parent),
            bindings: IndexMap::new(),
            refs: 1,
            frame,
            with_object: None,
        };
        let id = if let Some(id) = self.free.pop() {
            self.slots[id.index()] = Some(scope);
            id
        } else {
            let id = ScopeId(u32::try_from(self.slots.len()).expect("scope arena overflow"));
            self.slots.push(Some(scope));
            id
        };
        self.stack.push(id);
        Ok(id)
    }

    /// Pops the current scope and releases it.
    ///
    /// `exempt` names an object whose count must survive the pop (the value
    /// being returned out of the frame); its reference is dropped without
    /// triggering destruction, transferring ownership to the caller.
    pub fn pop(&mut self, heap: &mut Heap<impl ResourceTracker>, queue: &mut ReleaseQueue, exempt: Option<HeapId>) {
        let id = self.stack.pop().expect("scope stack underflow");
        debug_assert!(!self.stack.is_empty(), "global scope must not be popped");
        if self.scope(id).frame.is_some() {
            self.frames -= 1;
        }
        self.release(id, heap, queue, exempt);
    }

    /// Releases one reference to a scope chain, tearing down dead scopes.
    pub fn release(
        &mut self,
        id: ScopeId,
        heap: &mut Heap<impl ResourceTracker>,
        queue: &mut ReleaseQueue,
        exempt: Option<HeapId>,
    ) {
        let mut work = vec![id];
        while let Some(id) = work.pop() {
            let scope = self.slots[id.index()].as_mut().expect("release of freed scope");
            debug_assert!(scope.refs > 0, "scope refcount underflow");
            scope.refs -= 1;
            if scope.refs > 0 {
                continue;
            }
            let scope = self.slots[id.index()].take().expect("checked above");
            self.free.push(id);
            for (_, binding) in scope.bindings {
                match binding {
                    Binding::Value { value, .. } => {
                        if let (Some(ex), Some(vid)) = (exempt, value.ref_id())
                            && vid == ex
                            && heap.is_object(vid)
                            && matches!(value, Value::Ref(_))
                        {
                            // Ownership transfers out of the frame: drop the
                            // count without destruction.
                            heap.dec_object_ref(vid);
                            continue;
                        }
                        value.release_with_heap(heap, queue);
                    }
                    Binding::Lazy { scope: lazy_scope, .. } => work.push(lazy_scope),
                    Binding::VarParam { .. } | Binding::External => {}
                }
            }
            if let Some(frame) = scope.frame {
                for value in frame.old_values {
                    value.drop_with_heap(heap, queue);
                }
            }
            if let Some(with_object) = scope.with_object {
                with_object.drop_with_heap(heap, queue);
            }
            if let Some(parent) = scope.parent {
                work.push(parent);
            }
        }
    }

    /// Temporarily makes `id` the current scope without touching reference
    /// counts or frame accounting (lazy-parameter evaluation runs in the
    /// caller's chain).
    pub fn enter_at(&mut self, id: ScopeId) {
        self.stack.push(id);
    }

    /// Undoes [`Self::enter_at`].
    pub fn leave_at(&mut self) {
        self.stack.pop().expect("scope stack underflow");
        debug_assert!(!self.stack.is_empty());
    }

    /// Walks the chain starting at `from`, yielding scope ids outward.
    pub fn chain(&self, from: ScopeId) -> Chain<'_> {
        Chain {
            scopes: self,
            next: Some(from),
        }
    }

    /// Finds the innermost scope in the chain that binds `name`.
    pub fn resolve(&self, from: ScopeId, name: Symbol) -> Option<ScopeId> {
        self.chain(from).find(|&id| self.scope(id).has(name))
    }

    /// Captured stack frames for error reports, innermost first.
    pub fn capture_frames(&self) -> Vec<(Symbol, CodeLoc)> {
        self.stack
            .iter()
            .rev()
            .filter_map(|&id| {
                self.scope(id)
                    .frame
                    .as_ref()
                    .map(|f| (f.func_name, f.call_pos))
            })
            .collect()
    }

    /// Innermost frame scope (the current function), if any.
    pub fn current_frame(&self) -> Option<ScopeId> {
        self.stack
            .iter()
            .rev()
            .copied()
            .find(|&id| self.scope(id).frame.is_some())
    }
}

/// Iterator over a scope chain.
pub(crate) struct Chain<'a> {
    scopes: &'a Scopes,
    next: Option<ScopeId>,
}

impl Iterator for Chain<'_> {
    type Item = ScopeId;

    fn next(&mut self) -> Option<ScopeId> {
        let current = self.next?;
        self.next = self.scopes.scope(current).parent;
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NoLimitTracker;

    #[test]
    fn define_and_resolve_through_chain() {
        let mut scopes = Scopes::new();
        let mut heap = Heap::new(NoLimitTracker::new());
        let mut queue = ReleaseQueue::new();
        let tracker = NoLimitTracker::new();
        let x = Symbol::from(crate::intern::StaticSymbols::Result);
        scopes.scope_mut(GLOBAL_SCOPE).define(
            x,
            Binding::Value {
                value: Value::Int(1),
                typ: TypeId::INTEGER,
                constant: false,
            },
        );
        let inner = scopes.push(GLOBAL_SCOPE, None, &tracker).unwrap();
        assert_eq!(scopes.resolve(inner, x), Some(GLOBAL_SCOPE));
        // Shadowing binds in the inner scope.
        scopes.scope_mut(inner).define(
            x,
            Binding::Value {
                value: Value::Int(2),
                typ: TypeId::INTEGER,
                constant: false,
            },
        );
        assert_eq!(scopes.resolve(inner, x), Some(inner));
        scopes.pop(&mut heap, &mut queue, None);
        assert_eq!(scopes.resolve(scopes.current(), x), Some(GLOBAL_SCOPE));
    }

    #[test]
    fn captured_scope_survives_pop() {
        let mut scopes = Scopes::new();
        let mut heap = Heap::new(NoLimitTracker::new());
        let mut queue = ReleaseQueue::new();
        let tracker = NoLimitTracker::new();
        let inner = scopes.push(GLOBAL_SCOPE, None, &tracker).unwrap();
        scopes.retain(inner); // a lambda captured the chain
        scopes.pop(&mut heap, &mut queue, None);
        // Still accessible through the captured reference.
        assert!(scopes.scope(inner).parent.is_some());
        scopes.release(inner, &mut heap, &mut queue, None);
    }

    #[test]
    fn frame_depth_counts_only_frames() {
        let mut scopes = Scopes::new();
        let tracker = NoLimitTracker::new();
        assert_eq!(scopes.frame_depth(), 0);
        scopes
            .push(
                GLOBAL_SCOPE,
                Some(FrameInfo {
                    func_name: Symbol::from(crate::intern::StaticSymbols::Main),
                    call_pos: CodeLoc::default(),
                    defining_class: None,
                    old_values: Vec::new(),
                }),
                &tracker,
            )
            .unwrap();
        assert_eq!(scopes.frame_depth(), 1);
        scopes.push(scopes.current(), None, &tracker).unwrap();
        assert_eq!(scopes.frame_depth(), 1);
    }
}
