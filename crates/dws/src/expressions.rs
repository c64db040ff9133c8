//! AST node types produced by the parser and consumed by the evaluator.
//!
//! Every node carries the source position of its first token so runtime
//! errors can point back into the script. Identifiers are interned
//! case-insensitively (see `intern`), so name equality is symbol equality.

use serde::{Deserialize, Serialize};

use crate::{exception_public::CodeLoc, intern::Symbol};

/// Index of a function body in the program's function table.
///
/// Free functions, methods, and lambda bodies all live in the same table;
/// class metadata and `Expr::Lambda` nodes reference them by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) struct FunctionId(pub u32);

impl FunctionId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// An identifier with its source position.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub(crate) struct Identifier {
    pub name: Symbol,
    pub pos: CodeLoc,
}

/// An expression together with its source position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ExprLoc {
    pub expr: Expr,
    pub pos: CodeLoc,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum UnaryOp {
    Plus,
    Minus,
    /// Logical on booleans, bitwise on integers.
    Not,
}

/// Binary operators.
///
/// `And`, `Or` short-circuit on booleans and act bitwise on integers.
/// `Coalesce` (`??`) short-circuits on truthiness of the left operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    /// `/` — always floating-point division.
    FDiv,
    /// `div` — integer division.
    IntDiv,
    /// `mod`.
    Mod,
    Shl,
    Shr,
    /// Arithmetic right shift.
    Sar,
    And,
    Or,
    Xor,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Membership: element in set, substring in string, element in array.
    In,
    /// `??` — left if truthy, else right.
    Coalesce,
}

impl BinaryOp {
    /// Operator spelling for diagnostics and the operator-overload registry.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::FDiv => "/",
            Self::IntDiv => "div",
            Self::Mod => "mod",
            Self::Shl => "shl",
            Self::Shr => "shr",
            Self::Sar => "sar",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::In => "in",
            Self::Coalesce => "??",
        }
    }
}

/// One element of a `[...]` literal: a single value or an inclusive range.
///
/// Whether the literal denotes an array or a set is decided by the type
/// context at evaluation time; ranges are only legal in set context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum BracketElem {
    Single(ExprLoc),
    Range(ExprLoc, ExprLoc),
}

/// An expression node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Expr {
    IntLit(i64),
    FloatLit(f64),
    StrLit(String),
    BoolLit(bool),
    NilLit,
    /// `[a, b, lo..hi]` — array or set literal depending on type context.
    BracketLit(Vec<BracketElem>),
    /// `(field: value; ...)` — anonymous record literal; requires a record
    /// type context.
    RecordLit(Vec<(Identifier, ExprLoc)>),
    /// A bare name: variable, constant, enum value, class reference,
    /// parameterless function call, or builtin.
    Name(Identifier),
    /// `object.name` — field, property, method, class member, or
    /// pseudo-member (`ClassName`, `ClassType`, `Free`).
    Member {
        object: Box<ExprLoc>,
        name: Identifier,
    },
    /// `object[i, j, ...]` — array/string indexing or default-property access.
    Index {
        object: Box<ExprLoc>,
        indexes: Vec<ExprLoc>,
    },
    /// `callee(args)` where callee is a name, member access, or arbitrary
    /// expression yielding a function pointer.
    Call {
        callee: Box<ExprLoc>,
        args: Vec<ExprLoc>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<ExprLoc>,
    },
    Binary {
        left: Box<ExprLoc>,
        op: BinaryOp,
        right: Box<ExprLoc>,
    },
    /// `if cond then a else b` expression. A missing `else` yields the zero
    /// value of the `then` branch's type.
    IfExpr {
        cond: Box<ExprLoc>,
        then_branch: Box<ExprLoc>,
        else_branch: Option<Box<ExprLoc>>,
    },
    /// `expr is TClass` / `expr is IIntf`.
    Is {
        object: Box<ExprLoc>,
        target: Identifier,
    },
    /// `expr as TClass` — checked downcast; `variant as T` converts.
    As {
        object: Box<ExprLoc>,
        target: Identifier,
    },
    /// `cls implements IIntf`.
    Implements {
        object: Box<ExprLoc>,
        target: Identifier,
    },
    /// `new TClass(args)`.
    NewObject {
        class_name: Identifier,
        args: Vec<ExprLoc>,
    },
    /// `new T[n1, n2, ...]` — multi-dimensional dynamic array allocation.
    NewArray {
        elem_type: Identifier,
        dims: Vec<ExprLoc>,
    },
    /// `@f` or `@obj.Method` — function pointer construction.
    AddressOf { target: Box<ExprLoc> },
    /// Lambda expression; the body lives in the function table.
    Lambda(FunctionId),
    /// `inherited` / `inherited Name(args)` inside a method body.
    Inherited {
        name: Option<Identifier>,
        args: Vec<ExprLoc>,
    },
    /// `old <expr>` inside an `ensure` clause; the index selects the value
    /// captured at function entry (see `FunctionDef::old_captures`).
    OldValue(u32),
}

/// Parameter passing modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub(crate) enum ParamMode {
    /// Evaluate and copy (records are field-copied).
    #[default]
    Value,
    /// Evaluated once, bound read-only.
    Const,
    /// The argument must be an assignable place; reads and writes flow through.
    Var,
    /// Like `var` but the pre-call value is never read.
    Out,
    /// The argument expression is bound unevaluated and evaluated on each read.
    Lazy,
}

/// A declared parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ParamDecl {
    pub name: Identifier,
    pub typ: Option<TypeExpr>,
    pub mode: ParamMode,
    pub default: Option<ExprLoc>,
}

/// A type expression as written in source.
///
/// Resolved against the type registry during declaration registration;
/// anonymous shapes (`array of T`, `set of E`, subranges) are memoized there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum TypeExpr {
    /// A named type: builtin primitive, class, interface, enum, alias, ...
    Named(Identifier),
    /// `array of T` (dynamic) or `array[lo..hi] of T` (static).
    Array {
        elem: Box<TypeExpr>,
        bounds: Option<(Box<ExprLoc>, Box<ExprLoc>)>,
    },
    /// `set of EnumName`.
    SetOf(Identifier),
    /// `lo..hi` integer subrange.
    Subrange { lo: Box<ExprLoc>, hi: Box<ExprLoc> },
    /// `class of TFoo` — metaclass type.
    ClassOf(Identifier),
    /// `function(params): T` / `procedure(params)` — function pointer type.
    FuncPtr {
        params: Vec<ParamDecl>,
        result: Option<Box<TypeExpr>>,
    },
}

/// Function kinds; decides the implicit frame bindings (`Result`, `Self`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub(crate) enum FuncKind {
    #[default]
    Function,
    Procedure,
    Constructor,
    Destructor,
    /// Lambda body; captures the creation scope chain.
    Lambda,
}

/// Virtual dispatch directives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub(crate) enum VirtualMode {
    /// Plain (static) method: never enters the VMT.
    #[default]
    None,
    /// Introduces a new VMT slot.
    Virtual,
    /// Updates the implementation of an inherited slot.
    Override,
    /// Shadows an inherited virtual without updating its slot.
    Reintroduce,
}

/// A `require`/`ensure` clause: condition plus optional message expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ContractClause {
    pub test: ExprLoc,
    pub msg: Option<ExprLoc>,
    pub pos: CodeLoc,
}

/// A function, procedure, method, constructor, destructor, or lambda body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct FunctionDef {
    pub name: Identifier,
    pub kind: FuncKind,
    pub params: Vec<ParamDecl>,
    pub result_type: Option<TypeExpr>,
    pub body: Vec<StmtLoc>,
    pub require: Vec<ContractClause>,
    pub ensure: Vec<ContractClause>,
    /// `old <expr>` sub-expressions appearing in `ensure` clauses, captured at
    /// entry per call frame. Populated by the parser.
    pub old_captures: Vec<ExprLoc>,
    pub overload: bool,
    pub virtual_mode: VirtualMode,
    pub is_abstract: bool,
    pub is_class_method: bool,
}

impl FunctionDef {
    /// Number of declared parameters (the VMT keys on this).
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// A field declaration inside a class or record: `a, b: T;`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct FieldDecl {
    pub names: Vec<Identifier>,
    pub typ: TypeExpr,
}

/// A property declaration.
///
/// `read`/`write` specifiers name either a field or a method; `default`
/// marks the property used for `obj[...]` subscripting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PropertyDecl {
    pub name: Identifier,
    pub params: Vec<ParamDecl>,
    pub typ: TypeExpr,
    pub read: Option<Identifier>,
    pub write: Option<Identifier>,
    pub is_default: bool,
}

/// A class declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ClassDecl {
    pub name: Identifier,
    pub parent: Option<Identifier>,
    pub interfaces: Vec<Identifier>,
    pub is_abstract: bool,
    pub is_external: bool,
    pub is_partial: bool,
    pub fields: Vec<FieldDecl>,
    pub class_vars: Vec<FieldDecl>,
    pub class_consts: Vec<(Identifier, ExprLoc)>,
    pub methods: Vec<FunctionId>,
    pub properties: Vec<PropertyDecl>,
    pub nested: Vec<ClassDecl>,
}

/// A method signature inside an interface declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct MethodSig {
    pub name: Identifier,
    pub params: Vec<ParamDecl>,
    pub result_type: Option<TypeExpr>,
}

/// An interface declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct InterfaceDecl {
    pub name: Identifier,
    pub parent: Option<Identifier>,
    pub methods: Vec<MethodSig>,
    pub properties: Vec<PropertyDecl>,
}

/// An enum declaration: `(A, B = 4, C)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct EnumDecl {
    pub name: Identifier,
    pub values: Vec<(Identifier, Option<ExprLoc>)>,
}

/// A record declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RecordDecl {
    pub name: Identifier,
    pub fields: Vec<FieldDecl>,
}

/// An operator-overload declaration:
/// `operator + (TLeft, TRight): TResult uses FuncName;`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct OperatorDecl {
    pub op: BinaryOp,
    pub operands: Vec<TypeExpr>,
    pub result: Option<TypeExpr>,
    pub uses: Identifier,
    pub pos: CodeLoc,
}

/// A type-level declaration hoisted by the registration pre-pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Decl {
    Class(ClassDecl),
    Interface(InterfaceDecl),
    Record(RecordDecl),
    Enum(EnumDecl),
    /// `type TName = <type expression>;`
    Alias { name: Identifier, ty: TypeExpr },
    Operator(OperatorDecl),
    /// A free function/procedure (body in the function table).
    Function(FunctionId),
}

/// One arm of a `case` statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CaseArm {
    pub labels: Vec<BracketElem>,
    pub body: StmtLoc,
}

/// An `on E: EClass do` handler clause.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct OnClause {
    pub var: Option<Identifier>,
    pub class_name: Identifier,
    pub body: StmtLoc,
}

/// A statement together with its source position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StmtLoc {
    pub stmt: Stmt,
    pub pos: CodeLoc,
}

/// A statement node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Stmt {
    /// `var a, b: T = init;` — one fresh zero value per name when no
    /// initializer is given.
    VarDecl {
        names: Vec<Identifier>,
        typ: Option<TypeExpr>,
        init: Option<ExprLoc>,
        /// `var external x: T;` — reads/writes go through host callbacks.
        external: bool,
    },
    /// `const name = value;`
    ConstDecl {
        name: Identifier,
        typ: Option<TypeExpr>,
        value: ExprLoc,
    },
    /// `target := value` or compound (`+=` carries `Some(Add)`).
    Assign {
        target: ExprLoc,
        op: Option<BinaryOp>,
        value: ExprLoc,
    },
    /// An expression evaluated for its effects; at top level its value
    /// becomes the program result.
    Expr(ExprLoc),
    Block(Vec<StmtLoc>),
    If {
        cond: ExprLoc,
        then_branch: Box<StmtLoc>,
        else_branch: Option<Box<StmtLoc>>,
    },
    Case {
        selector: ExprLoc,
        arms: Vec<CaseArm>,
        else_branch: Option<Vec<StmtLoc>>,
    },
    While {
        cond: ExprLoc,
        body: Box<StmtLoc>,
    },
    Repeat {
        body: Vec<StmtLoc>,
        until: ExprLoc,
    },
    /// `for i := a to b do` / `for var i := a downto b do`.
    ForTo {
        var: Identifier,
        declare_var: bool,
        from: ExprLoc,
        to: ExprLoc,
        downto: bool,
        body: Box<StmtLoc>,
    },
    /// `for x in iterable do` — arrays, strings, sets, and enum type names.
    ForIn {
        var: Identifier,
        declare_var: bool,
        iterable: ExprLoc,
        body: Box<StmtLoc>,
    },
    /// `with expr do` — member names of the value resolve first.
    With {
        object: ExprLoc,
        body: Box<StmtLoc>,
    },
    /// `exit` / `exit(value)`.
    Exit { value: Option<ExprLoc> },
    Break,
    Continue,
    /// `raise expr` / bare `raise` (re-raise inside a handler).
    Raise { value: Option<ExprLoc> },
    Try {
        body: Vec<StmtLoc>,
        handlers: Vec<OnClause>,
        /// Bare `except ...` body (or the `else` branch after `on` clauses).
        catch_all: Option<Vec<StmtLoc>>,
        finally: Option<Vec<StmtLoc>>,
    },
}

/// A parsed program: main statements, the declaration list, and all function
/// bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Program {
    pub stmts: Vec<StmtLoc>,
    pub decls: Vec<Decl>,
    pub functions: Vec<FunctionDef>,
}

impl Program {
    pub fn function(&self, id: FunctionId) -> &FunctionDef {
        &self.functions[id.index()]
    }
}
