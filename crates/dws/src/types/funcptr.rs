//! Function pointer payloads: named functions, bound methods, and lambdas.

use serde::{Deserialize, Serialize};

use crate::{class::ClassId, expressions::FunctionId, heap::HeapId, intern::Symbol, namespace::ScopeId};

/// What a function pointer calls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub(crate) enum FuncTarget {
    /// A free function.
    Function(FunctionId),
    /// A method; dispatch re-checks the VMT against the receiver's runtime
    /// class at call time, so `@obj.Method` stays polymorphic.
    Method {
        class: ClassId,
        name: Symbol,
        arity: u8,
        fid: FunctionId,
    },
    /// A lambda; the captured scope chain lives in [`FuncPtrObj::env`].
    Lambda(FunctionId),
}

/// A function pointer value.
///
/// Holds a counted reference to the bound receiver (for `@obj.Method`) and a
/// strong reference to the captured scope chain (for lambdas). Both are
/// released when the pointer is freed.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct FuncPtrObj {
    pub target: FuncTarget,
    pub bound_self: Option<HeapId>,
    pub env: Option<ScopeId>,
}
