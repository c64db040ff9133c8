//! Recursive-descent parser producing the AST in `expressions`.
//!
//! The parser interns every identifier case-insensitively and hoists all
//! type/function declarations into the program's declaration list; the
//! registration pre-pass in `exec` consumes that list before the main
//! statements run. Classic Pascal precedence applies: relational operators
//! bind loosest, `and`/`shl`-family bind at the multiplicative level and
//! `or`/`xor` at the additive level.

use std::fmt;

use crate::{
    exception_public::{CodeLoc, ErrorKind, Exception},
    expressions::{
        BinaryOp, BracketElem, CaseArm, ClassDecl, ContractClause, Decl, EnumDecl, Expr, ExprLoc, FieldDecl, FuncKind,
        FunctionDef, FunctionId, Identifier, InterfaceDecl, MethodSig, OnClause, OperatorDecl, ParamDecl, ParamMode,
        Program, PropertyDecl, RecordDecl, Stmt, StmtLoc, TypeExpr, UnaryOp, VirtualMode,
    },
    intern::Interns,
    lexer::{Token, TokenKind, tokenize},
};

/// Maximum nesting depth for expressions and statements during parsing.
///
/// Prevents stack overflow from deeply nested structures like `((((x))))`.
pub(crate) const MAX_NESTING_DEPTH: u16 = 200;

/// A parse error with its source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParseError {
    pub message: String,
    pub pos: CodeLoc,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.message, self.pos)
    }
}

impl ParseError {
    /// Converts this error into the public exception type.
    pub fn into_exception(self, script: &str) -> Exception {
        Exception::new(ErrorKind::Syntax, String::new(), self.message, script.to_owned(), self.pos)
    }
}

/// Result of parsing: the program and the interner holding all names.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub(crate) struct Parsed {
    pub program: Program,
    pub interns: Interns,
}

/// Parses a script into a program.
pub(crate) fn parse(source: &str) -> Result<Parsed, ParseError> {
    let tokens = tokenize(source).map_err(|e| ParseError {
        message: e.message,
        pos: e.pos,
    })?;
    let mut parser = Parser {
        tokens,
        idx: 0,
        interns: Interns::new(),
        functions: Vec::new(),
        decls: Vec::new(),
        pending_impls: Vec::new(),
        old_captures: None,
        depth: 0,
    };
    let stmts = parser.parse_stmt_list(&[TokenKind::Eof])?;
    parser.expect(&TokenKind::Eof)?;
    parser.link_method_impls()?;
    Ok(Parsed {
        program: Program {
            stmts,
            decls: parser.decls,
            functions: parser.functions,
        },
        interns: parser.interns,
    })
}

/// A method implementation parsed at top level (`function TFoo.Bar ...`),
/// waiting to be linked to its in-class declaration.
struct PendingImpl {
    class_name: Identifier,
    method_name: Identifier,
    arity: usize,
    def: FunctionDef,
}

struct Parser {
    tokens: Vec<Token>,
    idx: usize,
    interns: Interns,
    functions: Vec<FunctionDef>,
    decls: Vec<Decl>,
    pending_impls: Vec<PendingImpl>,
    /// Set while parsing `ensure` clauses: collected `old` capture expressions.
    old_captures: Option<Vec<ExprLoc>>,
    depth: u16,
}

impl Parser {
    fn peek(&self) -> &TokenKind {
        &self.tokens[self.idx].kind
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        let idx = (self.idx + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn pos(&self) -> CodeLoc {
        self.tokens[self.idx].pos
    }

    fn bump(&mut self) -> TokenKind {
        let kind = self.tokens[self.idx].kind.clone();
        if self.idx < self.tokens.len() - 1 {
            self.idx += 1;
        }
        kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == kind {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<(), ParseError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.error(format!(
                "expected {}, found {}",
                kind.describe(),
                self.peek().describe()
            )))
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            pos: self.pos(),
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(self.error("expression nesting too deep"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn ident(&mut self) -> Result<Identifier, ParseError> {
        let pos = self.pos();
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.bump();
                Ok(Identifier {
                    name: self.interns.intern(&name),
                    pos,
                })
            }
            // Contextual keywords that double as plain identifiers.
            TokenKind::KwRead => {
                self.bump();
                Ok(Identifier {
                    name: self.interns.intern("Read"),
                    pos,
                })
            }
            TokenKind::KwWrite => {
                self.bump();
                Ok(Identifier {
                    name: self.interns.intern("Write"),
                    pos,
                })
            }
            other => Err(self.error(format!("expected identifier, found {}", other.describe()))),
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// Parses statements separated by `;` until one of `terminators` is seen.
    fn parse_stmt_list(&mut self, terminators: &[TokenKind]) -> Result<Vec<StmtLoc>, ParseError> {
        let mut stmts = Vec::new();
        loop {
            while self.eat(&TokenKind::Semicolon) {}
            if terminators.contains(self.peek()) {
                return Ok(stmts);
            }
            if let Some(stmt) = self.parse_stmt()? {
                stmts.push(stmt);
            }
            while self.eat(&TokenKind::Semicolon) {}
            if terminators.contains(self.peek()) {
                return Ok(stmts);
            }
            // A statement not followed by a separator must be the last one.
            if !matches!(self.peek(), TokenKind::Eof) && !terminators.contains(self.peek()) {
                // `end`, `else`, `until`, ... are legal without a preceding `;`
                // only when they terminate the list, which was handled above.
                return Err(self.error(format!("expected ';', found {}", self.peek().describe())));
            }
        }
    }

    /// Parses a single statement. Declarations are hoisted into the
    /// declaration list and produce no statement.
    fn parse_stmt(&mut self) -> Result<Option<StmtLoc>, ParseError> {
        self.enter()?;
        let result = self.parse_stmt_inner();
        self.leave();
        result
    }

    fn parse_stmt_inner(&mut self) -> Result<Option<StmtLoc>, ParseError> {
        let pos = self.pos();
        let stmt = match self.peek().clone() {
            TokenKind::KwVar => {
                self.bump();
                self.parse_var_decl()?
            }
            TokenKind::KwConst => {
                self.bump();
                self.parse_const_decl()?
            }
            TokenKind::KwType => {
                self.bump();
                self.parse_type_decl()?;
                return Ok(None);
            }
            TokenKind::KwOperator => {
                self.bump();
                self.parse_operator_decl(pos)?;
                return Ok(None);
            }
            TokenKind::KwFunction | TokenKind::KwProcedure | TokenKind::KwConstructor | TokenKind::KwDestructor => {
                self.parse_function_decl(false)?;
                return Ok(None);
            }
            TokenKind::KwBegin => {
                self.bump();
                let body = self.parse_stmt_list(&[TokenKind::KwEnd])?;
                self.expect(&TokenKind::KwEnd)?;
                Stmt::Block(body)
            }
            TokenKind::KwIf => {
                self.bump();
                self.parse_if()?
            }
            TokenKind::KwCase => {
                self.bump();
                self.parse_case()?
            }
            TokenKind::KwWhile => {
                self.bump();
                let cond = self.parse_expr()?;
                self.expect(&TokenKind::KwDo)?;
                let body = self.parse_substmt()?;
                Stmt::While {
                    cond,
                    body: Box::new(body),
                }
            }
            TokenKind::KwRepeat => {
                self.bump();
                let body = self.parse_stmt_list(&[TokenKind::KwUntil])?;
                self.expect(&TokenKind::KwUntil)?;
                let until = self.parse_expr()?;
                Stmt::Repeat { body, until }
            }
            TokenKind::KwFor => {
                self.bump();
                self.parse_for()?
            }
            TokenKind::KwWith => {
                self.bump();
                let object = self.parse_expr()?;
                self.expect(&TokenKind::KwDo)?;
                let body = self.parse_substmt()?;
                Stmt::With {
                    object,
                    body: Box::new(body),
                }
            }
            TokenKind::KwTry => {
                self.bump();
                self.parse_try()?
            }
            TokenKind::KwRaise => {
                self.bump();
                let value = if self.at_stmt_end() {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                Stmt::Raise { value }
            }
            TokenKind::KwExit => {
                self.bump();
                let value = if self.eat(&TokenKind::LParen) {
                    let v = self.parse_expr()?;
                    self.expect(&TokenKind::RParen)?;
                    Some(v)
                } else {
                    None
                };
                Stmt::Exit { value }
            }
            TokenKind::KwBreak => {
                self.bump();
                Stmt::Break
            }
            TokenKind::KwContinue => {
                self.bump();
                Stmt::Continue
            }
            _ => self.parse_assign_or_expr()?,
        };
        Ok(Some(StmtLoc { stmt, pos }))
    }

    fn at_stmt_end(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Semicolon
                | TokenKind::KwEnd
                | TokenKind::KwElse
                | TokenKind::KwUntil
                | TokenKind::KwExcept
                | TokenKind::KwFinally
                | TokenKind::Eof
        )
    }

    /// A nested statement position (`then`, `do`, `else` bodies).
    fn parse_substmt(&mut self) -> Result<StmtLoc, ParseError> {
        let pos = self.pos();
        match self.parse_stmt()? {
            Some(stmt) => Ok(stmt),
            // A declaration in substatement position has no runtime effect;
            // represent it as an empty block.
            None => Ok(StmtLoc {
                stmt: Stmt::Block(Vec::new()),
                pos,
            }),
        }
    }

    fn parse_var_decl(&mut self) -> Result<Stmt, ParseError> {
        let external = self.eat(&TokenKind::KwExternal);
        let mut names = vec![self.ident()?];
        while self.eat(&TokenKind::Comma) {
            names.push(self.ident()?);
        }
        let typ = if self.eat(&TokenKind::Colon) {
            Some(self.parse_type_expr()?)
        } else {
            None
        };
        let init = if self.eat(&TokenKind::Assign) || self.eat(&TokenKind::Eq) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        if typ.is_none() && init.is_none() {
            return Err(self.error("variable declaration needs a type or an initializer"));
        }
        Ok(Stmt::VarDecl {
            names,
            typ,
            init,
            external,
        })
    }

    fn parse_const_decl(&mut self) -> Result<Stmt, ParseError> {
        let name = self.ident()?;
        let typ = if self.eat(&TokenKind::Colon) {
            Some(self.parse_type_expr()?)
        } else {
            None
        };
        self.expect(&TokenKind::Eq)?;
        let value = self.parse_expr()?;
        Ok(Stmt::ConstDecl { name, typ, value })
    }

    fn parse_assign_or_expr(&mut self) -> Result<Stmt, ParseError> {
        let target = self.parse_expr()?;
        let op = match self.peek() {
            TokenKind::Assign => None,
            TokenKind::PlusAssign => Some(BinaryOp::Add),
            TokenKind::MinusAssign => Some(BinaryOp::Sub),
            TokenKind::StarAssign => Some(BinaryOp::Mul),
            TokenKind::SlashAssign => Some(BinaryOp::FDiv),
            _ => return Ok(Stmt::Expr(target)),
        };
        self.bump();
        let value = self.parse_expr()?;
        Ok(Stmt::Assign { target, op, value })
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::KwThen)?;
        let then_branch = self.parse_substmt()?;
        let else_branch = if self.eat(&TokenKind::KwElse) {
            Some(Box::new(self.parse_substmt()?))
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_branch: Box::new(then_branch),
            else_branch,
        })
    }

    fn parse_case(&mut self) -> Result<Stmt, ParseError> {
        let selector = self.parse_expr()?;
        self.expect(&TokenKind::KwOf)?;
        let mut arms = Vec::new();
        let mut else_branch = None;
        loop {
            if self.eat(&TokenKind::KwEnd) {
                break;
            }
            if self.eat(&TokenKind::KwElse) {
                else_branch = Some(self.parse_stmt_list(&[TokenKind::KwEnd])?);
                self.expect(&TokenKind::KwEnd)?;
                break;
            }
            let mut labels = vec![self.parse_case_label()?];
            while self.eat(&TokenKind::Comma) {
                labels.push(self.parse_case_label()?);
            }
            self.expect(&TokenKind::Colon)?;
            let body = self.parse_substmt()?;
            arms.push(CaseArm { labels, body });
            while self.eat(&TokenKind::Semicolon) {}
        }
        Ok(Stmt::Case {
            selector,
            arms,
            else_branch,
        })
    }

    fn parse_case_label(&mut self) -> Result<BracketElem, ParseError> {
        let lo = self.parse_expr()?;
        if self.eat(&TokenKind::DotDot) {
            let hi = self.parse_expr()?;
            Ok(BracketElem::Range(lo, hi))
        } else {
            Ok(BracketElem::Single(lo))
        }
    }

    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        let declare_var = self.eat(&TokenKind::KwVar);
        let var = self.ident()?;
        if self.eat(&TokenKind::KwIn) {
            let iterable = self.parse_expr()?;
            self.expect(&TokenKind::KwDo)?;
            let body = self.parse_substmt()?;
            return Ok(Stmt::ForIn {
                var,
                declare_var,
                iterable,
                body: Box::new(body),
            });
        }
        self.expect(&TokenKind::Assign)?;
        let from = self.parse_expr()?;
        let downto = match self.bump() {
            TokenKind::KwTo => false,
            TokenKind::KwDownto => true,
            other => {
                return Err(self.error(format!("expected 'to' or 'downto', found {}", other.describe())));
            }
        };
        let to = self.parse_expr()?;
        self.expect(&TokenKind::KwDo)?;
        let body = self.parse_substmt()?;
        Ok(Stmt::ForTo {
            var,
            declare_var,
            from,
            to,
            downto,
            body: Box::new(body),
        })
    }

    fn parse_try(&mut self) -> Result<Stmt, ParseError> {
        let body = self.parse_stmt_list(&[TokenKind::KwExcept, TokenKind::KwFinally])?;
        let mut handlers = Vec::new();
        let mut catch_all = None;
        let mut finally = None;
        if self.eat(&TokenKind::KwExcept) {
            if matches!(self.peek(), TokenKind::KwOn) {
                while self.eat(&TokenKind::KwOn) {
                    let first = self.ident()?;
                    let (var, class_name) = if self.eat(&TokenKind::Colon) {
                        (Some(first), self.ident()?)
                    } else {
                        (None, first)
                    };
                    self.expect(&TokenKind::KwDo)?;
                    let handler_body = self.parse_substmt()?;
                    handlers.push(OnClause {
                        var,
                        class_name,
                        body: handler_body,
                    });
                    while self.eat(&TokenKind::Semicolon) {}
                }
                if self.eat(&TokenKind::KwElse) {
                    catch_all = Some(self.parse_stmt_list(&[TokenKind::KwEnd])?);
                }
            } else {
                catch_all = Some(self.parse_stmt_list(&[TokenKind::KwEnd])?);
            }
            self.expect(&TokenKind::KwEnd)?;
        } else {
            self.expect(&TokenKind::KwFinally)?;
            finally = Some(self.parse_stmt_list(&[TokenKind::KwEnd])?);
            self.expect(&TokenKind::KwEnd)?;
        }
        Ok(Stmt::Try {
            body,
            handlers,
            catch_all,
            finally,
        })
    }

    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------

    fn parse_type_decl(&mut self) -> Result<(), ParseError> {
        let name = self.ident()?;
        self.expect(&TokenKind::Eq)?;
        let mut is_partial = false;
        let mut is_abstract = false;
        let mut is_external = false;
        loop {
            match self.peek() {
                TokenKind::KwPartial => {
                    is_partial = true;
                    self.bump();
                }
                TokenKind::KwAbstract => {
                    is_abstract = true;
                    self.bump();
                }
                TokenKind::KwExternal => {
                    is_external = true;
                    self.bump();
                }
                _ => break,
            }
        }
        match self.peek().clone() {
            TokenKind::KwClass => {
                self.bump();
                // `class of TFoo` is a metaclass alias, not a class decl.
                if self.eat(&TokenKind::KwOf) {
                    let of = self.ident()?;
                    self.decls.push(Decl::Alias {
                        name,
                        ty: TypeExpr::ClassOf(of),
                    });
                    return Ok(());
                }
                let decl = self.parse_class_body(name, is_partial, is_abstract, is_external)?;
                self.decls.push(Decl::Class(decl));
            }
            TokenKind::KwInterface => {
                self.bump();
                let decl = self.parse_interface_body(name)?;
                self.decls.push(Decl::Interface(decl));
            }
            TokenKind::KwRecord => {
                self.bump();
                let fields = self.parse_field_list(&[TokenKind::KwEnd])?;
                self.expect(&TokenKind::KwEnd)?;
                self.decls.push(Decl::Record(RecordDecl { name, fields }));
            }
            TokenKind::LParen => {
                self.bump();
                let mut values = Vec::new();
                loop {
                    let value_name = self.ident()?;
                    let ordinal = if self.eat(&TokenKind::Eq) {
                        Some(self.parse_expr()?)
                    } else {
                        None
                    };
                    values.push((value_name, ordinal));
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RParen)?;
                self.decls.push(Decl::Enum(EnumDecl { name, values }));
            }
            _ => {
                let ty = self.parse_type_expr()?;
                self.decls.push(Decl::Alias { name, ty });
            }
        }
        Ok(())
    }

    fn parse_class_body(
        &mut self,
        name: Identifier,
        is_partial: bool,
        is_abstract: bool,
        is_external: bool,
    ) -> Result<ClassDecl, ParseError> {
        let mut parent = None;
        let mut interfaces = Vec::new();
        if self.eat(&TokenKind::LParen) {
            parent = Some(self.ident()?);
            while self.eat(&TokenKind::Comma) {
                interfaces.push(self.ident()?);
            }
            self.expect(&TokenKind::RParen)?;
        }
        let mut decl = ClassDecl {
            name,
            parent,
            interfaces,
            is_abstract,
            is_external,
            is_partial,
            fields: Vec::new(),
            class_vars: Vec::new(),
            class_consts: Vec::new(),
            methods: Vec::new(),
            properties: Vec::new(),
            nested: Vec::new(),
        };
        loop {
            match self.peek().clone() {
                TokenKind::KwEnd => {
                    self.bump();
                    break;
                }
                TokenKind::Semicolon => {
                    self.bump();
                }
                TokenKind::KwClass => {
                    // `class var`, `class const`, `class function/procedure`
                    match self.peek_at(1).clone() {
                        TokenKind::KwVar => {
                            self.bump();
                            self.bump();
                            let field = self.parse_single_field()?;
                            decl.class_vars.push(field);
                        }
                        TokenKind::KwConst => {
                            self.bump();
                            self.bump();
                            let const_name = self.ident()?;
                            self.expect(&TokenKind::Eq)?;
                            let value = self.parse_expr()?;
                            decl.class_consts.push((const_name, value));
                        }
                        TokenKind::KwFunction | TokenKind::KwProcedure => {
                            self.bump();
                            let fid = self.parse_method(true)?;
                            decl.methods.push(fid);
                        }
                        other => {
                            return Err(self.error(format!(
                                "expected 'var', 'const', 'function' or 'procedure' after 'class', found {}",
                                other.describe()
                            )));
                        }
                    }
                }
                TokenKind::KwVar => {
                    self.bump();
                    let field = self.parse_single_field()?;
                    decl.fields.push(field);
                }
                TokenKind::KwConst => {
                    self.bump();
                    let const_name = self.ident()?;
                    self.expect(&TokenKind::Eq)?;
                    let value = self.parse_expr()?;
                    decl.class_consts.push((const_name, value));
                }
                TokenKind::KwFunction | TokenKind::KwProcedure | TokenKind::KwConstructor | TokenKind::KwDestructor => {
                    let fid = self.parse_method(false)?;
                    decl.methods.push(fid);
                }
                TokenKind::KwProperty => {
                    self.bump();
                    let prop = self.parse_property()?;
                    decl.properties.push(prop);
                }
                TokenKind::KwType => {
                    self.bump();
                    let nested_name = self.ident()?;
                    self.expect(&TokenKind::Eq)?;
                    self.expect(&TokenKind::KwClass)?;
                    let nested = self.parse_class_body(nested_name, false, false, false)?;
                    decl.nested.push(nested);
                }
                TokenKind::Ident(_) => {
                    let field = self.parse_single_field()?;
                    decl.fields.push(field);
                }
                other => {
                    return Err(self.error(format!("unexpected {} in class body", other.describe())));
                }
            }
        }
        Ok(decl)
    }

    fn parse_single_field(&mut self) -> Result<FieldDecl, ParseError> {
        let mut names = vec![self.ident()?];
        while self.eat(&TokenKind::Comma) {
            names.push(self.ident()?);
        }
        self.expect(&TokenKind::Colon)?;
        let typ = self.parse_type_expr()?;
        Ok(FieldDecl { names, typ })
    }

    fn parse_field_list(&mut self, terminators: &[TokenKind]) -> Result<Vec<FieldDecl>, ParseError> {
        let mut fields = Vec::new();
        loop {
            while self.eat(&TokenKind::Semicolon) {}
            if terminators.contains(self.peek()) {
                return Ok(fields);
            }
            fields.push(self.parse_single_field()?);
        }
    }

    fn parse_interface_body(&mut self, name: Identifier) -> Result<InterfaceDecl, ParseError> {
        let mut parent = None;
        if self.eat(&TokenKind::LParen) {
            parent = Some(self.ident()?);
            self.expect(&TokenKind::RParen)?;
        }
        let mut methods = Vec::new();
        let mut properties = Vec::new();
        loop {
            match self.peek().clone() {
                TokenKind::KwEnd => {
                    self.bump();
                    break;
                }
                TokenKind::Semicolon => {
                    self.bump();
                }
                TokenKind::KwFunction | TokenKind::KwProcedure => {
                    let is_function = matches!(self.bump(), TokenKind::KwFunction);
                    let method_name = self.ident()?;
                    let params = self.parse_params()?;
                    let result_type = if is_function {
                        self.expect(&TokenKind::Colon)?;
                        Some(self.parse_type_expr()?)
                    } else {
                        None
                    };
                    methods.push(MethodSig {
                        name: method_name,
                        params,
                        result_type,
                    });
                }
                TokenKind::KwProperty => {
                    self.bump();
                    properties.push(self.parse_property()?);
                }
                other => {
                    return Err(self.error(format!("unexpected {} in interface body", other.describe())));
                }
            }
        }
        Ok(InterfaceDecl {
            name,
            parent,
            methods,
            properties,
        })
    }

    fn parse_property(&mut self) -> Result<PropertyDecl, ParseError> {
        let name = self.ident()?;
        let params = if self.eat(&TokenKind::LBracket) {
            let params = self.parse_param_group_list(&TokenKind::RBracket)?;
            self.expect(&TokenKind::RBracket)?;
            params
        } else {
            Vec::new()
        };
        self.expect(&TokenKind::Colon)?;
        let typ = self.parse_type_expr()?;
        let mut read = None;
        let mut write = None;
        if self.eat(&TokenKind::KwRead) {
            read = Some(self.ident()?);
        }
        if self.eat(&TokenKind::KwWrite) {
            write = Some(self.ident()?);
        }
        let mut is_default = false;
        if matches!(self.peek(), TokenKind::Semicolon) && matches!(self.peek_at(1), TokenKind::KwDefault) {
            self.bump();
            self.bump();
            is_default = true;
        } else if self.eat(&TokenKind::KwDefault) {
            is_default = true;
        }
        Ok(PropertyDecl {
            name,
            params,
            typ,
            read,
            write,
            is_default,
        })
    }

    fn parse_operator_decl(&mut self, pos: CodeLoc) -> Result<(), ParseError> {
        let op = match self.bump() {
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Minus => BinaryOp::Sub,
            TokenKind::Star => BinaryOp::Mul,
            TokenKind::Slash => BinaryOp::FDiv,
            TokenKind::Eq => BinaryOp::Eq,
            TokenKind::Ne => BinaryOp::Ne,
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::Le => BinaryOp::Le,
            TokenKind::Gt => BinaryOp::Gt,
            TokenKind::Ge => BinaryOp::Ge,
            TokenKind::KwIn => BinaryOp::In,
            other => {
                return Err(self.error(format!("operator '{}' cannot be overloaded", other.describe())));
            }
        };
        self.expect(&TokenKind::LParen)?;
        let mut operands = vec![self.parse_type_expr()?];
        while self.eat(&TokenKind::Comma) {
            operands.push(self.parse_type_expr()?);
        }
        self.expect(&TokenKind::RParen)?;
        let result = if self.eat(&TokenKind::Colon) {
            Some(self.parse_type_expr()?)
        } else {
            None
        };
        self.expect(&TokenKind::KwUses)?;
        let uses = self.ident()?;
        self.decls.push(Decl::Operator(OperatorDecl {
            op,
            operands,
            result,
            uses,
            pos,
        }));
        Ok(())
    }

    /// Parses a free function, a method implementation (`TFoo.Bar`), or an
    /// in-class method declaration when `in_class` paths call through
    /// `parse_method`.
    fn parse_function_decl(&mut self, class_method: bool) -> Result<FunctionId, ParseError> {
        let kind = match self.bump() {
            TokenKind::KwFunction => FuncKind::Function,
            TokenKind::KwProcedure => FuncKind::Procedure,
            TokenKind::KwConstructor => FuncKind::Constructor,
            TokenKind::KwDestructor => FuncKind::Destructor,
            other => return Err(self.error(format!("expected function declaration, found {}", other.describe()))),
        };
        let first = self.ident()?;
        if self.eat(&TokenKind::Dot) {
            // Qualified method implementation: function TFoo.Bar(...)
            let method_name = self.ident()?;
            let def = self.parse_function_tail(method_name, kind, class_method, true)?;
            self.pending_impls.push(PendingImpl {
                class_name: first,
                method_name,
                arity: def.params.len(),
                def,
            });
            // Placeholder id; pending impls never enter the function table
            // themselves, their bodies are moved into the declared slot.
            return Ok(FunctionId(u32::MAX));
        }
        let def = self.parse_function_tail(first, kind, class_method, true)?;
        let fid = self.push_function(def);
        self.decls.push(Decl::Function(fid));
        Ok(fid)
    }

    /// Parses a method declaration inside a class body. The body may be
    /// inline or supplied later by a qualified implementation.
    fn parse_method(&mut self, class_method: bool) -> Result<FunctionId, ParseError> {
        let kind = match self.bump() {
            TokenKind::KwFunction => FuncKind::Function,
            TokenKind::KwProcedure => FuncKind::Procedure,
            TokenKind::KwConstructor => FuncKind::Constructor,
            TokenKind::KwDestructor => FuncKind::Destructor,
            other => return Err(self.error(format!("expected method declaration, found {}", other.describe()))),
        };
        let name = self.ident()?;
        let def = self.parse_function_tail(name, kind, class_method, false)?;
        Ok(self.push_function(def))
    }

    /// Parses everything after a function name: parameters, result type,
    /// directives, and (optionally) contracts and body.
    fn parse_function_tail(
        &mut self,
        name: Identifier,
        kind: FuncKind,
        is_class_method: bool,
        body_required: bool,
    ) -> Result<FunctionDef, ParseError> {
        let params = self.parse_params()?;
        let result_type = if matches!(kind, FuncKind::Function) {
            self.expect(&TokenKind::Colon)?;
            Some(self.parse_type_expr()?)
        } else {
            None
        };
        let mut def = FunctionDef {
            name,
            kind,
            params,
            result_type,
            body: Vec::new(),
            require: Vec::new(),
            ensure: Vec::new(),
            old_captures: Vec::new(),
            overload: false,
            virtual_mode: VirtualMode::None,
            is_abstract: false,
            is_class_method,
        };
        // Directives, each terminated by `;`.
        loop {
            while self.eat(&TokenKind::Semicolon) {}
            match self.peek() {
                TokenKind::KwVirtual => {
                    self.bump();
                    def.virtual_mode = VirtualMode::Virtual;
                }
                TokenKind::KwOverride => {
                    self.bump();
                    def.virtual_mode = VirtualMode::Override;
                }
                TokenKind::KwReintroduce => {
                    self.bump();
                    def.virtual_mode = VirtualMode::Reintroduce;
                }
                TokenKind::KwOverload => {
                    self.bump();
                    def.overload = true;
                }
                TokenKind::KwAbstract => {
                    self.bump();
                    def.is_abstract = true;
                }
                _ => break,
            }
        }
        if def.is_abstract {
            return Ok(def);
        }
        if matches!(self.peek(), TokenKind::KwRequire | TokenKind::KwBegin) {
            self.parse_function_body(&mut def)?;
        } else if body_required {
            return Err(self.error(format!(
                "expected function body, found {}",
                self.peek().describe()
            )));
        }
        Ok(def)
    }

    fn parse_function_body(&mut self, def: &mut FunctionDef) -> Result<(), ParseError> {
        if self.eat(&TokenKind::KwRequire) {
            def.require = self.parse_contract_clauses(&[TokenKind::KwBegin])?;
        }
        self.expect(&TokenKind::KwBegin)?;
        def.body = self.parse_stmt_list(&[TokenKind::KwEnd, TokenKind::KwEnsure])?;
        if self.eat(&TokenKind::KwEnsure) {
            let saved = self.old_captures.replace(Vec::new());
            let clauses = self.parse_contract_clauses(&[TokenKind::KwEnd])?;
            def.ensure = clauses;
            def.old_captures = self.old_captures.take().unwrap_or_default();
            self.old_captures = saved;
        }
        self.expect(&TokenKind::KwEnd)?;
        Ok(())
    }

    fn parse_contract_clauses(&mut self, terminators: &[TokenKind]) -> Result<Vec<ContractClause>, ParseError> {
        let mut clauses = Vec::new();
        loop {
            while self.eat(&TokenKind::Semicolon) {}
            if terminators.contains(self.peek()) {
                return Ok(clauses);
            }
            let pos = self.pos();
            let test = self.parse_expr()?;
            let msg = if self.eat(&TokenKind::Colon) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            clauses.push(ContractClause { test, msg, pos });
        }
    }

    fn parse_params(&mut self) -> Result<Vec<ParamDecl>, ParseError> {
        if !self.eat(&TokenKind::LParen) {
            return Ok(Vec::new());
        }
        let params = self.parse_param_group_list(&TokenKind::RParen)?;
        self.expect(&TokenKind::RParen)?;
        Ok(params)
    }

    /// Parses `;`-separated parameter groups up to (not including) `close`.
    fn parse_param_group_list(&mut self, close: &TokenKind) -> Result<Vec<ParamDecl>, ParseError> {
        let mut params = Vec::new();
        if self.peek() == close {
            return Ok(params);
        }
        loop {
            let mode = match self.peek() {
                TokenKind::KwVar => {
                    self.bump();
                    ParamMode::Var
                }
                TokenKind::KwConst => {
                    self.bump();
                    ParamMode::Const
                }
                TokenKind::KwOut => {
                    self.bump();
                    ParamMode::Out
                }
                TokenKind::KwLazy => {
                    self.bump();
                    ParamMode::Lazy
                }
                _ => ParamMode::Value,
            };
            let mut names = vec![self.ident()?];
            while self.eat(&TokenKind::Comma) {
                names.push(self.ident()?);
            }
            let typ = if self.eat(&TokenKind::Colon) {
                Some(self.parse_type_expr()?)
            } else {
                None
            };
            let default = if self.eat(&TokenKind::Eq) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            for name in names {
                params.push(ParamDecl {
                    name,
                    typ: typ.clone(),
                    mode,
                    default: default.clone(),
                });
            }
            if !self.eat(&TokenKind::Semicolon) {
                break;
            }
        }
        Ok(params)
    }

    fn push_function(&mut self, def: FunctionDef) -> FunctionId {
        let fid = FunctionId(u32::try_from(self.functions.len()).expect("function table overflow"));
        self.functions.push(def);
        fid
    }

    /// Attaches qualified method implementations to their in-class
    /// declarations, matching by class name, method name, and arity.
    fn link_method_impls(&mut self) -> Result<(), ParseError> {
        let impls = std::mem::take(&mut self.pending_impls);
        for pending in impls {
            let mut target = None;
            for decl in &self.decls {
                let Decl::Class(class) = decl else { continue };
                if class.name.name != pending.class_name.name {
                    continue;
                }
                for &fid in &class.methods {
                    let def = &self.functions[fid.index()];
                    if def.name.name == pending.method_name.name
                        && def.params.len() == pending.arity
                        && def.body.is_empty()
                        && !def.is_abstract
                    {
                        target = Some(fid);
                        break;
                    }
                }
                if target.is_some() {
                    break;
                }
            }
            let Some(fid) = target else {
                return Err(ParseError {
                    message: format!(
                        "no matching declaration for method implementation '{}'",
                        self.interns.get(pending.method_name.name)
                    ),
                    pos: pending.method_name.pos,
                });
            };
            let slot = &mut self.functions[fid.index()];
            slot.body = pending.def.body;
            slot.require = pending.def.require;
            slot.ensure = pending.def.ensure;
            slot.old_captures = pending.def.old_captures;
            if !pending.def.params.is_empty() {
                slot.params = pending.def.params;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Type expressions
    // ------------------------------------------------------------------

    fn parse_type_expr(&mut self) -> Result<TypeExpr, ParseError> {
        match self.peek().clone() {
            TokenKind::KwArray => {
                self.bump();
                let bounds = if self.eat(&TokenKind::LBracket) {
                    let lo = self.parse_expr()?;
                    self.expect(&TokenKind::DotDot)?;
                    let hi = self.parse_expr()?;
                    self.expect(&TokenKind::RBracket)?;
                    Some((Box::new(lo), Box::new(hi)))
                } else {
                    None
                };
                self.expect(&TokenKind::KwOf)?;
                let elem = self.parse_type_expr()?;
                Ok(TypeExpr::Array {
                    elem: Box::new(elem),
                    bounds,
                })
            }
            TokenKind::KwSet => {
                self.bump();
                self.expect(&TokenKind::KwOf)?;
                Ok(TypeExpr::SetOf(self.ident()?))
            }
            TokenKind::KwClass => {
                self.bump();
                self.expect(&TokenKind::KwOf)?;
                Ok(TypeExpr::ClassOf(self.ident()?))
            }
            TokenKind::KwFunction | TokenKind::KwProcedure => {
                let is_function = matches!(self.bump(), TokenKind::KwFunction);
                let params = self.parse_params()?;
                let result = if is_function {
                    self.expect(&TokenKind::Colon)?;
                    Some(Box::new(self.parse_type_expr()?))
                } else {
                    None
                };
                Ok(TypeExpr::FuncPtr { params, result })
            }
            TokenKind::IntLit(_) | TokenKind::Minus => {
                // Subrange type: `lo..hi`.
                let lo = self.parse_expr()?;
                self.expect(&TokenKind::DotDot)?;
                let hi = self.parse_expr()?;
                Ok(TypeExpr::Subrange {
                    lo: Box::new(lo),
                    hi: Box::new(hi),
                })
            }
            TokenKind::Ident(_) => {
                let name = self.ident()?;
                // A named constant may begin a subrange (`CMin..CMax`).
                if self.eat(&TokenKind::DotDot) {
                    let lo = ExprLoc {
                        expr: Expr::Name(name),
                        pos: name.pos,
                    };
                    let hi = self.parse_expr()?;
                    return Ok(TypeExpr::Subrange {
                        lo: Box::new(lo),
                        hi: Box::new(hi),
                    });
                }
                Ok(TypeExpr::Named(name))
            }
            other => Err(self.error(format!("expected type, found {}", other.describe()))),
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn parse_expr(&mut self) -> Result<ExprLoc, ParseError> {
        self.enter()?;
        let result = self.parse_coalesce();
        self.leave();
        result
    }

    /// `??` binds loosest and associates to the right.
    fn parse_coalesce(&mut self) -> Result<ExprLoc, ParseError> {
        let left = self.parse_relational()?;
        if self.eat(&TokenKind::Coalesce) {
            let right = self.parse_coalesce()?;
            let pos = left.pos;
            return Ok(ExprLoc {
                expr: Expr::Binary {
                    left: Box::new(left),
                    op: BinaryOp::Coalesce,
                    right: Box::new(right),
                },
                pos,
            });
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<ExprLoc, ParseError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                TokenKind::Eq => BinaryOp::Eq,
                TokenKind::Ne => BinaryOp::Ne,
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Le => BinaryOp::Le,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Ge => BinaryOp::Ge,
                TokenKind::KwIn => BinaryOp::In,
                TokenKind::KwIs => {
                    self.bump();
                    let target = self.ident()?;
                    let pos = left.pos;
                    left = ExprLoc {
                        expr: Expr::Is {
                            object: Box::new(left),
                            target,
                        },
                        pos,
                    };
                    continue;
                }
                TokenKind::KwAs => {
                    self.bump();
                    let target = self.ident()?;
                    let pos = left.pos;
                    left = ExprLoc {
                        expr: Expr::As {
                            object: Box::new(left),
                            target,
                        },
                        pos,
                    };
                    continue;
                }
                TokenKind::KwImplements => {
                    self.bump();
                    let target = self.ident()?;
                    let pos = left.pos;
                    left = ExprLoc {
                        expr: Expr::Implements {
                            object: Box::new(left),
                            target,
                        },
                        pos,
                    };
                    continue;
                }
                _ => return Ok(left),
            };
            self.bump();
            let right = self.parse_additive()?;
            let pos = left.pos;
            left = ExprLoc {
                expr: Expr::Binary {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
                pos,
            };
        }
    }

    fn parse_additive(&mut self) -> Result<ExprLoc, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                TokenKind::KwOr => BinaryOp::Or,
                TokenKind::KwXor => BinaryOp::Xor,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.parse_multiplicative()?;
            let pos = left.pos;
            left = ExprLoc {
                expr: Expr::Binary {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
                pos,
            };
        }
    }

    fn parse_multiplicative(&mut self) -> Result<ExprLoc, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::FDiv,
                TokenKind::KwDiv => BinaryOp::IntDiv,
                TokenKind::KwMod => BinaryOp::Mod,
                TokenKind::KwAnd => BinaryOp::And,
                TokenKind::KwShl => BinaryOp::Shl,
                TokenKind::KwShr => BinaryOp::Shr,
                TokenKind::KwSar => BinaryOp::Sar,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.parse_unary()?;
            let pos = left.pos;
            left = ExprLoc {
                expr: Expr::Binary {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
                pos,
            };
        }
    }

    fn parse_unary(&mut self) -> Result<ExprLoc, ParseError> {
        self.enter()?;
        let result = self.parse_unary_inner();
        self.leave();
        result
    }

    fn parse_unary_inner(&mut self) -> Result<ExprLoc, ParseError> {
        let pos = self.pos();
        let expr = match self.peek() {
            TokenKind::Minus => {
                self.bump();
                let operand = self.parse_unary()?;
                Expr::Unary {
                    op: UnaryOp::Minus,
                    operand: Box::new(operand),
                }
            }
            TokenKind::Plus => {
                self.bump();
                let operand = self.parse_unary()?;
                Expr::Unary {
                    op: UnaryOp::Plus,
                    operand: Box::new(operand),
                }
            }
            TokenKind::KwNot => {
                self.bump();
                let operand = self.parse_unary()?;
                Expr::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                }
            }
            TokenKind::At => {
                self.bump();
                let target = self.parse_unary()?;
                Expr::AddressOf {
                    target: Box::new(target),
                }
            }
            TokenKind::KwOld => {
                self.bump();
                let captured = self.parse_unary()?;
                let Some(captures) = self.old_captures.as_mut() else {
                    return Err(ParseError {
                        message: "'old' is only allowed in ensure clauses".to_owned(),
                        pos,
                    });
                };
                let index = u32::try_from(captures.len()).expect("old capture overflow");
                captures.push(captured);
                Expr::OldValue(index)
            }
            _ => return self.parse_postfix(),
        };
        Ok(ExprLoc { expr, pos })
    }

    fn parse_postfix(&mut self) -> Result<ExprLoc, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                TokenKind::Dot => {
                    self.bump();
                    let name = self.ident()?;
                    let pos = expr.pos;
                    expr = ExprLoc {
                        expr: Expr::Member {
                            object: Box::new(expr),
                            name,
                        },
                        pos,
                    };
                }
                TokenKind::LBracket => {
                    self.bump();
                    let mut indexes = vec![self.parse_expr()?];
                    while self.eat(&TokenKind::Comma) {
                        indexes.push(self.parse_expr()?);
                    }
                    self.expect(&TokenKind::RBracket)?;
                    let pos = expr.pos;
                    expr = ExprLoc {
                        expr: Expr::Index {
                            object: Box::new(expr),
                            indexes,
                        },
                        pos,
                    };
                }
                TokenKind::LParen => {
                    self.bump();
                    let mut args = Vec::new();
                    if !self.eat(&TokenKind::RParen) {
                        args.push(self.parse_expr()?);
                        while self.eat(&TokenKind::Comma) {
                            args.push(self.parse_expr()?);
                        }
                        self.expect(&TokenKind::RParen)?;
                    }
                    let pos = expr.pos;
                    expr = ExprLoc {
                        expr: Expr::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        pos,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<ExprLoc, ParseError> {
        let pos = self.pos();
        let expr = match self.peek().clone() {
            TokenKind::IntLit(v) => {
                self.bump();
                Expr::IntLit(v)
            }
            TokenKind::FloatLit(v) => {
                self.bump();
                Expr::FloatLit(v)
            }
            TokenKind::StrLit(s) => {
                self.bump();
                Expr::StrLit(s)
            }
            TokenKind::KwTrue => {
                self.bump();
                Expr::BoolLit(true)
            }
            TokenKind::KwFalse => {
                self.bump();
                Expr::BoolLit(false)
            }
            TokenKind::KwNil => {
                self.bump();
                Expr::NilLit
            }
            TokenKind::Ident(_) | TokenKind::KwRead | TokenKind::KwWrite => {
                let name = self.ident()?;
                Expr::Name(name)
            }
            TokenKind::KwIf => {
                self.bump();
                let cond = self.parse_expr()?;
                self.expect(&TokenKind::KwThen)?;
                let then_branch = self.parse_expr()?;
                let else_branch = if self.eat(&TokenKind::KwElse) {
                    Some(Box::new(self.parse_expr()?))
                } else {
                    None
                };
                Expr::IfExpr {
                    cond: Box::new(cond),
                    then_branch: Box::new(then_branch),
                    else_branch,
                }
            }
            TokenKind::KwNew => {
                self.bump();
                let class_name = self.ident()?;
                if self.eat(&TokenKind::LBracket) {
                    let mut dims = vec![self.parse_expr()?];
                    while self.eat(&TokenKind::Comma) {
                        dims.push(self.parse_expr()?);
                    }
                    self.expect(&TokenKind::RBracket)?;
                    Expr::NewArray {
                        elem_type: class_name,
                        dims,
                    }
                } else {
                    let mut args = Vec::new();
                    if self.eat(&TokenKind::LParen) && !self.eat(&TokenKind::RParen) {
                        args.push(self.parse_expr()?);
                        while self.eat(&TokenKind::Comma) {
                            args.push(self.parse_expr()?);
                        }
                        self.expect(&TokenKind::RParen)?;
                    }
                    Expr::NewObject { class_name, args }
                }
            }
            TokenKind::KwInherited => {
                self.bump();
                let name = if let TokenKind::Ident(_) = self.peek() {
                    Some(self.ident()?)
                } else {
                    None
                };
                let mut args = Vec::new();
                if name.is_some() && self.eat(&TokenKind::LParen) && !self.eat(&TokenKind::RParen) {
                    args.push(self.parse_expr()?);
                    while self.eat(&TokenKind::Comma) {
                        args.push(self.parse_expr()?);
                    }
                    self.expect(&TokenKind::RParen)?;
                }
                Expr::Inherited { name, args }
            }
            TokenKind::KwLambda => {
                self.bump();
                return self.parse_lambda(pos);
            }
            TokenKind::LParen => {
                self.bump();
                // `(name: expr; ...)` is an anonymous record literal.
                if matches!(self.peek(), TokenKind::Ident(_)) && matches!(self.peek_at(1), TokenKind::Colon) {
                    let mut fields = Vec::new();
                    loop {
                        let field_name = self.ident()?;
                        self.expect(&TokenKind::Colon)?;
                        let value = self.parse_expr()?;
                        fields.push((field_name, value));
                        if !self.eat(&TokenKind::Semicolon) {
                            break;
                        }
                        if matches!(self.peek(), TokenKind::RParen) {
                            break;
                        }
                    }
                    self.expect(&TokenKind::RParen)?;
                    Expr::RecordLit(fields)
                } else {
                    let inner = self.parse_expr()?;
                    self.expect(&TokenKind::RParen)?;
                    return Ok(ExprLoc { expr: inner.expr, pos });
                }
            }
            TokenKind::LBracket => {
                self.bump();
                let mut elems = Vec::new();
                if !self.eat(&TokenKind::RBracket) {
                    loop {
                        let first = self.parse_expr()?;
                        if self.eat(&TokenKind::DotDot) {
                            let hi = self.parse_expr()?;
                            elems.push(BracketElem::Range(first, hi));
                        } else {
                            elems.push(BracketElem::Single(first));
                        }
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(&TokenKind::RBracket)?;
                }
                Expr::BracketLit(elems)
            }
            other => {
                return Err(self.error(format!("expected expression, found {}", other.describe())));
            }
        };
        Ok(ExprLoc { expr, pos })
    }

    fn parse_lambda(&mut self, pos: CodeLoc) -> Result<ExprLoc, ParseError> {
        let params = self.parse_params()?;
        let result_type = if self.eat(&TokenKind::Colon) {
            Some(self.parse_type_expr()?)
        } else {
            None
        };
        let mut def = FunctionDef {
            name: Identifier {
                name: self.interns.intern("<lambda>"),
                pos,
            },
            kind: FuncKind::Lambda,
            params,
            result_type,
            body: Vec::new(),
            require: Vec::new(),
            ensure: Vec::new(),
            old_captures: Vec::new(),
            overload: false,
            virtual_mode: VirtualMode::None,
            is_abstract: false,
            is_class_method: false,
        };
        if self.eat(&TokenKind::Arrow) {
            // Expression body desugars to `Result := expr`.
            let body_expr = self.parse_expr()?;
            let body_pos = body_expr.pos;
            def.body = vec![StmtLoc {
                stmt: Stmt::Assign {
                    target: ExprLoc {
                        expr: Expr::Name(Identifier {
                            name: self.interns.intern("Result"),
                            pos: body_pos,
                        }),
                        pos: body_pos,
                    },
                    op: None,
                    value: body_expr,
                },
                pos: body_pos,
            }];
        } else {
            self.expect(&TokenKind::KwBegin)?;
            def.body = self.parse_stmt_list(&[TokenKind::KwEnd])?;
            self.expect(&TokenKind::KwEnd)?;
        }
        let fid = self.push_function(def);
        Ok(ExprLoc {
            expr: Expr::Lambda(fid),
            pos,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Parsed {
        parse(src).expect("parse failed")
    }

    #[test]
    fn parses_var_and_assignment() {
        let parsed = parse_ok("var x: Integer; x := 1 + 2 * 3;");
        assert_eq!(parsed.program.stmts.len(), 2);
    }

    #[test]
    fn pascal_precedence() {
        // `1 + 2 * 3` parses as `1 + (2 * 3)`; `a and b or c` as `(a and b) or c`.
        let parsed = parse_ok("var r := 1 + 2 * 3;");
        let Stmt::VarDecl { init: Some(init), .. } = &parsed.program.stmts[0].stmt else {
            panic!("expected var decl");
        };
        let Expr::Binary { op, .. } = &init.expr else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Add);
    }

    #[test]
    fn parses_class_with_methods() {
        let parsed = parse_ok(
            "type TPoint = class\n\
             FX, FY: Integer;\n\
             function Sum: Integer; begin Result := FX + FY; end;\n\
             end;",
        );
        assert_eq!(parsed.program.decls.len(), 1);
        let Decl::Class(class) = &parsed.program.decls[0] else {
            panic!("expected class decl");
        };
        assert_eq!(class.fields.len(), 1);
        assert_eq!(class.fields[0].names.len(), 2);
        assert_eq!(class.methods.len(), 1);
    }

    #[test]
    fn qualified_method_implementation_links() {
        let parsed = parse_ok(
            "type TFoo = class\n\
             function Bar(x: Integer): Integer; virtual;\n\
             end;\n\
             function TFoo.Bar(x: Integer): Integer;\n\
             begin\n\
               Result := x;\n\
             end;",
        );
        let Decl::Class(class) = &parsed.program.decls[0] else {
            panic!("expected class decl");
        };
        let def = &parsed.program.functions[class.methods[0].index()];
        assert_eq!(def.virtual_mode, VirtualMode::Virtual);
        assert!(!def.body.is_empty());
    }

    #[test]
    fn parses_contracts_with_old() {
        let parsed = parse_ok(
            "function Inc2(x: Integer): Integer;\n\
             require\n\
               x >= 0;\n\
             begin\n\
               Result := x + 1;\n\
             ensure\n\
               Result = old x + 1;\n\
             end;",
        );
        let Decl::Function(fid) = parsed.program.decls[0] else {
            panic!("expected function");
        };
        let def = &parsed.program.functions[fid.index()];
        assert_eq!(def.require.len(), 1);
        assert_eq!(def.ensure.len(), 1);
        assert_eq!(def.old_captures.len(), 1);
    }

    #[test]
    fn parses_try_except_finally() {
        let parsed = parse_ok(
            "try\n\
               x := 1;\n\
             except\n\
               on E: Exception do PrintLn(E.Message);\n\
             end;\n\
             try\n\
               y := 2;\n\
             finally\n\
               z := 3;\n\
             end;",
        );
        assert_eq!(parsed.program.stmts.len(), 2);
    }

    #[test]
    fn parses_lambda_forms() {
        let parsed = parse_ok("var f := lambda (x: Integer) => x * 2; var g := lambda (a, b: Integer) begin Result := a + b; end;");
        assert_eq!(parsed.program.functions.len(), 2);
    }

    #[test]
    fn old_outside_ensure_is_an_error() {
        assert!(parse("var x := old y;").is_err());
    }

    #[test]
    fn missing_semicolon_is_an_error() {
        assert!(parse("x := 1 y := 2").is_err());
    }

    #[test]
    fn parses_set_and_subrange_types() {
        let parsed = parse_ok(
            "type TColor = (Red, Green, Blue);\n\
             type TColors = set of TColor;\n\
             type TDigit = 0..9;\n\
             var c: TColors := [Red, Blue];",
        );
        assert_eq!(parsed.program.decls.len(), 3);
    }
}
