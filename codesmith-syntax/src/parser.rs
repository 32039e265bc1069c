//! # Parser
//!
//! Recursive-descent parser from tokens to [`Module`]. The grammar follows
//! Python's own precedence chain:
//!
//! ```text
//! test        := lambda | or_test ['if' or_test 'else' test]
//! or_test     := and_test ('or' and_test)*
//! and_test    := not_test ('and' not_test)*
//! not_test    := 'not' not_test | comparison
//! comparison  := bitor (comp_op bitor)*
//! bitor       := bitxor ('|' bitxor)*   ... down to factor / power
//! power       := ['await'] primary ['**' factor]
//! primary     := atom ( '(' args ')' | '[' slices ']' | '.' NAME )*
//! ```
//!
//! `match`, `case`, `type` and `_` are soft keywords: they are ordinary
//! names except where the statement forms that use them apply.

use crate::ast::*;
use crate::lexer::tokenize;
use crate::token::{Keyword as Kw, Span, Token, TokenKind};
use codesmith_error::{Error, Result};
use tracing::trace;

/// Parse a whole module.
pub fn parse_module(source: &str) -> Result<Module> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens);
    let module = parser.module()?;
    trace!(statements = module.body.len(), "parsed module");
    Ok(module)
}

/// Parse a single expression (surrounding whitespace allowed).
pub fn parse_expression(source: &str) -> Result<Expr> {
    let tokens = tokenize(source.trim())?;
    let mut parser = Parser::new(tokens);
    let expr = parser.star_expressions()?;
    parser.eat_newline();
    if !parser.at(&TokenKind::EndMarker) {
        return Err(parser.unexpected());
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    // =========================================================================
    // Token cursor
    // =========================================================================

    fn peek(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn peek_nth(&self, n: usize) -> &TokenKind {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[(self.pos + n).min(last)].kind
    }

    fn kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn span(&self) -> Span {
        self.peek().span
    }

    fn loc(&self) -> Location {
        let span = self.span();
        Location { line: span.line, column: span.column }
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.kind() == kind
    }

    fn at_op(&self, op: &str) -> bool {
        self.kind().is_op(op)
    }

    fn at_kw(&self, kw: Kw) -> bool {
        self.kind().is_keyword(kw)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: Kw) -> bool {
        if self.at_kw(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_newline(&mut self) -> bool {
        if self.at(&TokenKind::Newline) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}', found {}", op, self.kind())))
        }
    }

    fn expect_kw(&mut self, kw: Kw) -> Result<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}', found {}", kw.as_str(), self.kind())))
        }
    }

    fn expect_name(&mut self) -> Result<String> {
        match self.kind() {
            TokenKind::Name(name) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            other => Err(self.error(format!("expected a name, found {}", other))),
        }
    }

    fn expect_newline(&mut self) -> Result<()> {
        if self.eat_newline() || self.at(&TokenKind::EndMarker) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn at_soft_keyword(&self, word: &str) -> bool {
        matches!(self.kind(), TokenKind::Name(name) if name == word)
    }

    fn error(&self, message: impl Into<String>) -> Error {
        let span = self.span();
        Error::parse_failed(message, span.line, span.column).with_operation("parser::parse")
    }

    fn unexpected(&self) -> Error {
        match self.kind() {
            TokenKind::Indent => self.error("unexpected indent"),
            TokenKind::EndMarker => self.error("unexpected EOF while parsing"),
            _ => self.error("invalid syntax"),
        }
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn module(&mut self) -> Result<Module> {
        let mut body = Vec::new();
        while !self.at(&TokenKind::EndMarker) {
            if self.eat_newline() {
                continue;
            }
            body.extend(self.statement()?);
        }
        Ok(Module { body })
    }

    fn statement(&mut self) -> Result<Vec<Stmt>> {
        let stmt = match self.kind() {
            TokenKind::Op("@") => self.decorated()?,
            TokenKind::Keyword(Kw::If) => self.if_stmt()?,
            TokenKind::Keyword(Kw::While) => self.while_stmt()?,
            TokenKind::Keyword(Kw::For) => self.for_stmt(false)?,
            TokenKind::Keyword(Kw::Try) => self.try_stmt()?,
            TokenKind::Keyword(Kw::With) => self.with_stmt(false)?,
            TokenKind::Keyword(Kw::Def) => self.funcdef(Vec::new(), false)?,
            TokenKind::Keyword(Kw::Class) => self.classdef(Vec::new())?,
            TokenKind::Keyword(Kw::Async) => self.async_stmt(Vec::new())?,
            _ if self.at_soft_keyword("match") => match self.match_stmt()? {
                Some(stmt) => stmt,
                None => return self.simple_statements(),
            },
            TokenKind::Indent => return Err(self.error("unexpected indent")),
            _ => return self.simple_statements(),
        };
        Ok(vec![stmt])
    }

    fn simple_statements(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = vec![self.simple_statement()?];
        while self.eat_op(";") {
            if self.at(&TokenKind::Newline) || self.at(&TokenKind::EndMarker) {
                break;
            }
            stmts.push(self.simple_statement()?);
        }
        self.expect_newline()?;
        Ok(stmts)
    }

    fn block(&mut self) -> Result<Vec<Stmt>> {
        self.expect_op(":")?;
        if !self.eat_newline() {
            return self.simple_statements();
        }
        if !matches!(self.kind(), TokenKind::Indent) {
            return Err(self.error("expected an indented block"));
        }
        self.pos += 1;
        let mut body = Vec::new();
        while !matches!(self.kind(), TokenKind::Dedent | TokenKind::EndMarker) {
            body.extend(self.statement()?);
        }
        if matches!(self.kind(), TokenKind::Dedent) {
            self.pos += 1;
        }
        Ok(body)
    }

    fn simple_statement(&mut self) -> Result<Stmt> {
        let loc = self.loc();
        let kind = match self.kind().clone() {
            TokenKind::Keyword(Kw::Pass) => {
                self.pos += 1;
                StmtKind::Pass
            }
            TokenKind::Keyword(Kw::Break) => {
                self.pos += 1;
                StmtKind::Break
            }
            TokenKind::Keyword(Kw::Continue) => {
                self.pos += 1;
                StmtKind::Continue
            }
            TokenKind::Keyword(Kw::Return) => {
                self.pos += 1;
                let value = if self.at_statement_end() {
                    None
                } else {
                    Some(self.star_expressions()?)
                };
                StmtKind::Return(value)
            }
            TokenKind::Keyword(Kw::Raise) => {
                self.pos += 1;
                let (exc, cause) = if self.at_statement_end() {
                    (None, None)
                } else {
                    let exc = self.test()?;
                    let cause = if self.eat_kw(Kw::From) { Some(self.test()?) } else { None };
                    (Some(exc), cause)
                };
                StmtKind::Raise { exc, cause }
            }
            TokenKind::Keyword(Kw::Global) => {
                self.pos += 1;
                StmtKind::Global(self.name_list()?)
            }
            TokenKind::Keyword(Kw::Nonlocal) => {
                self.pos += 1;
                StmtKind::Nonlocal(self.name_list()?)
            }
            TokenKind::Keyword(Kw::Del) => {
                self.pos += 1;
                let mut targets = vec![self.bitor()?];
                while self.eat_op(",") {
                    if self.at_statement_end() {
                        break;
                    }
                    targets.push(self.bitor()?);
                }
                for target in &targets {
                    self.check_target(target, "delete")?;
                }
                StmtKind::Delete(targets)
            }
            TokenKind::Keyword(Kw::Assert) => {
                self.pos += 1;
                let test = self.test()?;
                let msg = if self.eat_op(",") { Some(self.test()?) } else { None };
                StmtKind::Assert { test, msg }
            }
            TokenKind::Keyword(Kw::Import) => {
                self.pos += 1;
                StmtKind::Import(self.dotted_as_names()?)
            }
            TokenKind::Keyword(Kw::From) => self.import_from()?,
            TokenKind::Name(name)
                if name == "type"
                    && matches!(self.peek_nth(1), TokenKind::Name(_))
                    && (self.peek_nth(2).is_op("=") || self.peek_nth(2).is_op("[")) =>
            {
                self.type_alias()?
            }
            _ => self.expression_statement()?,
        };
        Ok(Stmt::new(kind, loc))
    }

    fn at_statement_end(&self) -> bool {
        matches!(self.kind(), TokenKind::Newline | TokenKind::EndMarker) || self.at_op(";")
    }

    fn expression_statement(&mut self) -> Result<StmtKind> {
        let parenthesized = self.at_op("(");
        let first = if self.at_kw(Kw::Yield) {
            self.yield_expr()?
        } else {
            self.star_expressions()?
        };

        if self.at_op("=") {
            let mut targets = vec![first];
            let mut value;
            loop {
                self.expect_op("=")?;
                value = if self.at_kw(Kw::Yield) {
                    self.yield_expr()?
                } else {
                    self.star_expressions()?
                };
                if !self.at_op("=") {
                    break;
                }
                targets.push(value);
            }
            for target in &targets {
                self.check_target(target, "assign to")?;
            }
            return Ok(StmtKind::Assign { targets, value });
        }

        if let TokenKind::Op(op) = self.kind() {
            if let Some(binop) = BinOp::from_augmented(op) {
                if !matches!(first, Expr::Name(_) | Expr::Attribute { .. } | Expr::Subscript { .. }) {
                    return Err(self.error("illegal expression for augmented assignment"));
                }
                self.pos += 1;
                let value = if self.at_kw(Kw::Yield) {
                    self.yield_expr()?
                } else {
                    self.star_expressions()?
                };
                return Ok(StmtKind::AugAssign { target: first, op: binop, value });
            }
        }

        if self.at_op(":") {
            if !matches!(first, Expr::Name(_) | Expr::Attribute { .. } | Expr::Subscript { .. }) {
                return Err(self.error("illegal target for annotation"));
            }
            self.pos += 1;
            let annotation = self.test()?;
            let value = if self.eat_op("=") {
                Some(if self.at_kw(Kw::Yield) {
                    self.yield_expr()?
                } else {
                    self.star_expressions()?
                })
            } else {
                None
            };
            let simple = matches!(first, Expr::Name(_)) && !parenthesized;
            return Ok(StmtKind::AnnAssign { target: first, annotation, value, simple });
        }

        Ok(StmtKind::Expr(first))
    }

    fn check_target(&self, target: &Expr, verb: &str) -> Result<()> {
        match target {
            Expr::Name(_) | Expr::Attribute { .. } | Expr::Subscript { .. } => Ok(()),
            Expr::Tuple(elts) | Expr::List(elts) => {
                for elt in elts {
                    match elt {
                        Expr::Starred(inner) if verb != "delete" => self.check_target(inner, verb)?,
                        other => self.check_target(other, verb)?,
                    }
                }
                Ok(())
            }
            _ => Err(self.error(format!("cannot {} expression", verb))),
        }
    }

    fn name_list(&mut self) -> Result<Vec<String>> {
        let mut names = vec![self.expect_name()?];
        while self.eat_op(",") {
            names.push(self.expect_name()?);
        }
        Ok(names)
    }

    fn dotted_name(&mut self) -> Result<String> {
        let mut name = self.expect_name()?;
        while self.eat_op(".") {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn dotted_as_names(&mut self) -> Result<Vec<Alias>> {
        let mut names = Vec::new();
        loop {
            let name = self.dotted_name()?;
            let asname = if self.eat_kw(Kw::As) { Some(self.expect_name()?) } else { None };
            names.push(Alias { name, asname });
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(names)
    }

    fn import_from(&mut self) -> Result<StmtKind> {
        self.expect_kw(Kw::From)?;
        let mut level = 0;
        loop {
            if self.eat_op(".") {
                level += 1;
            } else if self.eat_op("...") {
                level += 3;
            } else {
                break;
            }
        }
        let module = if self.at_kw(Kw::Import) {
            if level == 0 {
                return Err(self.error("expected a module name"));
            }
            None
        } else {
            Some(self.dotted_name()?)
        };
        self.expect_kw(Kw::Import)?;

        if self.eat_op("*") {
            let names = vec![Alias { name: "*".to_string(), asname: None }];
            return Ok(StmtKind::ImportFrom { module, names, level });
        }

        let parenthesized = self.eat_op("(");
        let mut names = Vec::new();
        loop {
            if parenthesized && self.at_op(")") {
                break;
            }
            let name = self.expect_name()?;
            let asname = if self.eat_kw(Kw::As) { Some(self.expect_name()?) } else { None };
            names.push(Alias { name, asname });
            if !self.eat_op(",") {
                break;
            }
            if !parenthesized && self.at_statement_end() {
                return Err(self.error("trailing comma not allowed without surrounding parentheses"));
            }
        }
        if parenthesized {
            self.expect_op(")")?;
        }
        if names.is_empty() {
            return Err(self.error("expected at least one name to import"));
        }
        Ok(StmtKind::ImportFrom { module, names, level })
    }

    fn decorated(&mut self) -> Result<Stmt> {
        let mut decorators = Vec::new();
        while self.eat_op("@") {
            decorators.push(self.named_expr_test()?);
            self.expect_newline()?;
        }
        match self.kind() {
            TokenKind::Keyword(Kw::Def) => self.funcdef(decorators, false),
            TokenKind::Keyword(Kw::Class) => self.classdef(decorators),
            TokenKind::Keyword(Kw::Async) => self.async_stmt(decorators),
            _ => Err(self.error("expected 'def' or 'class' after decorator")),
        }
    }

    fn async_stmt(&mut self, decorators: Vec<Expr>) -> Result<Stmt> {
        let loc = self.loc();
        self.expect_kw(Kw::Async)?;
        let mut stmt = match self.kind() {
            TokenKind::Keyword(Kw::Def) => self.funcdef(decorators, true)?,
            TokenKind::Keyword(Kw::For) if decorators.is_empty() => self.for_stmt(true)?,
            TokenKind::Keyword(Kw::With) if decorators.is_empty() => self.with_stmt(true)?,
            _ => return Err(self.error("expected 'def', 'for' or 'with' after 'async'")),
        };
        stmt.loc = loc;
        Ok(stmt)
    }

    fn funcdef(&mut self, decorators: Vec<Expr>, is_async: bool) -> Result<Stmt> {
        let loc = self.loc();
        self.expect_kw(Kw::Def)?;
        let name = self.expect_name()?;
        let type_params = self.type_params()?;
        self.expect_op("(")?;
        let params = self.parameters(")", true)?;
        self.expect_op(")")?;
        let returns = if self.eat_op("->") { Some(self.test()?) } else { None };
        let body = self.block()?;
        Ok(Stmt::new(
            StmtKind::FunctionDef { is_async, name, type_params, params, returns, decorators, body },
            loc,
        ))
    }

    fn classdef(&mut self, decorators: Vec<Expr>) -> Result<Stmt> {
        let loc = self.loc();
        self.expect_kw(Kw::Class)?;
        let name = self.expect_name()?;
        let type_params = self.type_params()?;
        let (bases, keywords) = if self.eat_op("(") {
            self.call_arguments()?
        } else {
            (Vec::new(), Vec::new())
        };
        let body = self.block()?;
        Ok(Stmt::new(StmtKind::ClassDef { name, type_params, bases, keywords, decorators, body }, loc))
    }

    /// Optional `[T, *Ts, **P]` list after a function, class or alias name.
    fn type_params(&mut self) -> Result<Vec<TypeParam>> {
        if !self.eat_op("[") {
            return Ok(Vec::new());
        }
        let mut params = Vec::new();
        let mut seen_default = false;
        while !self.at_op("]") {
            let param = if self.eat_op("**") {
                let name = self.expect_name()?;
                let default = if self.eat_op("=") { Some(self.test()?) } else { None };
                TypeParam::ParamSpec { name, default }
            } else if self.eat_op("*") {
                let name = self.expect_name()?;
                let default = if self.eat_op("=") { Some(self.star_or_test()?) } else { None };
                TypeParam::TypeVarTuple { name, default }
            } else {
                let name = self.expect_name()?;
                let bound = if self.eat_op(":") { Some(self.test()?) } else { None };
                let default = if self.eat_op("=") { Some(self.test()?) } else { None };
                TypeParam::TypeVar { name, bound, default }
            };
            let has_default = match &param {
                TypeParam::TypeVar { default, .. }
                | TypeParam::ParamSpec { default, .. }
                | TypeParam::TypeVarTuple { default, .. } => default.is_some(),
            };
            if has_default {
                seen_default = true;
            } else if seen_default {
                return Err(self.error("non-default type parameter follows default type parameter"));
            }
            params.push(param);
            if !self.eat_op(",") {
                break;
            }
        }
        if params.is_empty() {
            return Err(self.error("type parameter list cannot be empty"));
        }
        self.expect_op("]")?;
        Ok(params)
    }

    fn type_alias(&mut self) -> Result<StmtKind> {
        // soft keyword `type`
        self.pos += 1;
        let name = self.expect_name()?;
        let type_params = self.type_params()?;
        self.expect_op("=")?;
        let value = self.test()?;
        Ok(StmtKind::TypeAlias { name, type_params, value })
    }

    /// Parameter list up to (not including) `close`. Lambdas pass
    /// `annotations = false`.
    fn parameters(&mut self, close: &str, annotations: bool) -> Result<Parameters> {
        let mut params = Parameters::default();
        let mut seen_star = false;
        let mut seen_default = false;

        while !self.at_op(close) {
            if self.eat_op("/") {
                if seen_star || !params.posonly.is_empty() || params.args.is_empty() {
                    return Err(self.error("invalid '/' in parameter list"));
                }
                params.posonly = std::mem::take(&mut params.args);
            } else if self.eat_op("**") {
                params.kwarg = Some(self.param(annotations, false)?);
                self.eat_op(",");
                if !self.at_op(close) {
                    return Err(self.error("parameter after '**' parameter"));
                }
                break;
            } else if self.eat_op("*") {
                if seen_star {
                    return Err(self.error("'*' argument may appear only once"));
                }
                seen_star = true;
                if !(self.at_op(",") || self.at_op(close)) {
                    params.vararg = Some(self.param(annotations, false)?);
                }
            } else {
                let param = self.param(annotations, true)?;
                if seen_star {
                    params.kwonly.push(param);
                } else {
                    if param.default.is_some() {
                        seen_default = true;
                    } else if seen_default {
                        return Err(self.error("non-default argument follows default argument"));
                    }
                    params.args.push(param);
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        if seen_star && params.vararg.is_none() && params.kwonly.is_empty() {
            return Err(self.error("named arguments must follow bare *"));
        }
        Ok(params)
    }

    fn param(&mut self, annotations: bool, allow_default: bool) -> Result<Param> {
        let name = self.expect_name()?;
        let annotation = if annotations && self.eat_op(":") { Some(self.test()?) } else { None };
        let default = if allow_default && self.eat_op("=") { Some(self.test()?) } else { None };
        Ok(Param { name, annotation, default })
    }

    fn if_stmt(&mut self) -> Result<Stmt> {
        let loc = self.loc();
        // `if` or `elif`
        self.pos += 1;
        let test = self.named_expr_test()?;
        let body = self.block()?;
        let orelse = if self.at_kw(Kw::Elif) {
            vec![self.if_stmt()?]
        } else if self.eat_kw(Kw::Else) {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(Stmt::new(StmtKind::If { test, body, orelse }, loc))
    }

    fn while_stmt(&mut self) -> Result<Stmt> {
        let loc = self.loc();
        self.expect_kw(Kw::While)?;
        let test = self.named_expr_test()?;
        let body = self.block()?;
        let orelse = if self.eat_kw(Kw::Else) { self.block()? } else { Vec::new() };
        Ok(Stmt::new(StmtKind::While { test, body, orelse }, loc))
    }

    fn for_stmt(&mut self, is_async: bool) -> Result<Stmt> {
        let loc = self.loc();
        self.expect_kw(Kw::For)?;
        let target = self.target_list()?;
        self.expect_kw(Kw::In)?;
        let iter = self.star_expressions()?;
        let body = self.block()?;
        let orelse = if self.eat_kw(Kw::Else) { self.block()? } else { Vec::new() };
        Ok(Stmt::new(StmtKind::For { is_async, target, iter, body, orelse }, loc))
    }

    fn try_stmt(&mut self) -> Result<Stmt> {
        let loc = self.loc();
        self.expect_kw(Kw::Try)?;
        let body = self.block()?;
        let mut handlers = Vec::new();
        let mut is_star = false;
        while self.at_kw(Kw::Except) {
            let handler_loc = self.loc();
            self.pos += 1;
            let star = self.eat_op("*");
            if !handlers.is_empty() && star != is_star {
                return Err(self.error("cannot have both 'except' and 'except*' on the same 'try'"));
            }
            is_star = star;
            let (type_, name) = if self.at_op(":") {
                if star {
                    return Err(self.error("expected one or more exception types"));
                }
                (None, None)
            } else {
                let first = self.test()?;
                let type_ = if self.at_op(",") {
                    let mut elts = vec![first];
                    while self.eat_op(",") {
                        elts.push(self.test()?);
                    }
                    if self.at_kw(Kw::As) {
                        return Err(self.error("multiple exception types must be parenthesized when using 'as'"));
                    }
                    Expr::Tuple(elts)
                } else {
                    first
                };
                let name = if self.eat_kw(Kw::As) { Some(self.expect_name()?) } else { None };
                (Some(type_), name)
            };
            let body = self.block()?;
            handlers.push(ExceptHandler { type_, name, body, loc: handler_loc });
        }
        let orelse = if !handlers.is_empty() && self.eat_kw(Kw::Else) {
            self.block()?
        } else {
            Vec::new()
        };
        let finalbody = if self.eat_kw(Kw::Finally) { self.block()? } else { Vec::new() };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.error("expected 'except' or 'finally' block"));
        }
        Ok(Stmt::new(StmtKind::Try { body, handlers, orelse, finalbody, is_star }, loc))
    }

    fn with_stmt(&mut self, is_async: bool) -> Result<Stmt> {
        let loc = self.loc();
        self.expect_kw(Kw::With)?;
        let items = match self.parenthesized_with_items() {
            Some(items) => items,
            None => {
                let mut items = vec![self.with_item()?];
                while self.eat_op(",") {
                    items.push(self.with_item()?);
                }
                items
            }
        };
        let body = self.block()?;
        Ok(Stmt::new(StmtKind::With { is_async, items, body }, loc))
    }

    /// `with (a as b, c as d):`. Returns `None` with the cursor restored when
    /// the parentheses turn out to belong to the first expression.
    fn parenthesized_with_items(&mut self) -> Option<Vec<WithItem>> {
        if !self.at_op("(") {
            return None;
        }
        let start = self.pos;
        self.pos += 1;
        let mut items = Vec::new();
        let closed = loop {
            match self.with_item() {
                Ok(item) => items.push(item),
                Err(_) => break false,
            }
            if !self.eat_op(",") || self.at_op(")") {
                break self.eat_op(")");
            }
        };
        if closed && self.at_op(":") {
            return Some(items);
        }
        self.pos = start;
        None
    }

    fn with_item(&mut self) -> Result<WithItem> {
        let context_expr = self.test()?;
        let optional_vars = if self.eat_kw(Kw::As) {
            let target = self.star_target()?;
            self.check_target(&target, "assign to")?;
            Some(target)
        } else {
            None
        };
        Ok(WithItem { context_expr, optional_vars })
    }

    // =========================================================================
    // Pattern matching
    // =========================================================================

    /// Tries `match subject:` followed by an indented `case` block. Returns
    /// `None` with the cursor restored when the line is something else, such
    /// as a call to a function named `match`.
    fn match_stmt(&mut self) -> Result<Option<Stmt>> {
        let start = self.pos;
        let loc = self.loc();
        self.pos += 1;
        let subject = match self.match_subject() {
            Ok(subject)
                if self.at_op(":")
                    && *self.peek_nth(1) == TokenKind::Newline
                    && *self.peek_nth(2) == TokenKind::Indent
                    && matches!(self.peek_nth(3), TokenKind::Name(name) if name == "case") =>
            {
                subject
            }
            _ => {
                self.pos = start;
                return Ok(None);
            }
        };
        // ':' NEWLINE INDENT
        self.pos += 3;
        let mut cases = Vec::new();
        while self.at_soft_keyword("case") {
            cases.push(self.match_case()?);
        }
        match self.kind() {
            TokenKind::Dedent => self.pos += 1,
            TokenKind::EndMarker => {}
            _ => return Err(self.error("expected 'case' block")),
        }
        trace!(cases = cases.len(), "parsed match statement");
        Ok(Some(Stmt::new(StmtKind::Match { subject, cases }, loc)))
    }

    fn match_subject(&mut self) -> Result<Expr> {
        let first = self.star_or_named()?;
        if !self.at_op(",") {
            if matches!(first, Expr::Starred(_)) {
                return Err(self.error("can't use starred expression here"));
            }
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat_op(",") {
            if self.at_op(":") {
                break;
            }
            elts.push(self.star_or_named()?);
        }
        Ok(Expr::Tuple(elts))
    }

    fn match_case(&mut self) -> Result<MatchCase> {
        let loc = self.loc();
        // soft keyword `case`
        self.pos += 1;
        let pattern = self.open_sequence_pattern()?;
        let guard = if self.eat_kw(Kw::If) { Some(self.named_expr_test()?) } else { None };
        let body = self.block()?;
        Ok(MatchCase { pattern, guard, body, loc })
    }

    /// Top-level case pattern, where `a, *b` needs no brackets.
    fn open_sequence_pattern(&mut self) -> Result<Pattern> {
        let first = self.maybe_star_pattern()?;
        if !self.at_op(",") {
            if matches!(first, Pattern::Star(_)) {
                return Err(self.error("star pattern must be inside a sequence pattern"));
            }
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op(":") || self.at_kw(Kw::If) {
                break;
            }
            items.push(self.maybe_star_pattern()?);
        }
        Ok(Pattern::Sequence(items))
    }

    fn maybe_star_pattern(&mut self) -> Result<Pattern> {
        if self.eat_op("*") {
            let name = self.expect_name()?;
            return Ok(Pattern::Star(Some(name).filter(|n| n != "_")));
        }
        self.pattern()
    }

    fn pattern(&mut self) -> Result<Pattern> {
        let first = self.closed_pattern()?;
        let pattern = if self.at_op("|") {
            let mut alternatives = vec![first];
            while self.eat_op("|") {
                alternatives.push(self.closed_pattern()?);
            }
            Pattern::Or(alternatives)
        } else {
            first
        };
        if !self.eat_kw(Kw::As) {
            return Ok(pattern);
        }
        let name = self.expect_name()?;
        if name == "_" {
            return Err(self.error("cannot use '_' as a target"));
        }
        Ok(Pattern::As { pattern: Some(Box::new(pattern)), name: Some(name) })
    }

    fn closed_pattern(&mut self) -> Result<Pattern> {
        match self.kind().clone() {
            TokenKind::Keyword(Kw::None) => {
                self.pos += 1;
                Ok(Pattern::Singleton(Constant::None))
            }
            TokenKind::Keyword(Kw::True) => {
                self.pos += 1;
                Ok(Pattern::Singleton(Constant::Bool(true)))
            }
            TokenKind::Keyword(Kw::False) => {
                self.pos += 1;
                Ok(Pattern::Singleton(Constant::Bool(false)))
            }
            TokenKind::Name(name) => {
                if !self.peek_nth(1).is_op(".") && !self.peek_nth(1).is_op("(") {
                    self.pos += 1;
                    return Ok(Pattern::As { pattern: None, name: Some(name).filter(|n| n != "_") });
                }
                let cls = self.dotted_value()?;
                if self.eat_op("(") {
                    return self.class_pattern(cls);
                }
                Ok(Pattern::Value(cls))
            }
            TokenKind::Op("(") => {
                self.pos += 1;
                if self.eat_op(")") {
                    return Ok(Pattern::Sequence(Vec::new()));
                }
                let first = self.maybe_star_pattern()?;
                if self.eat_op(")") {
                    if matches!(first, Pattern::Star(_)) {
                        return Err(self.error("star pattern must be inside a sequence pattern"));
                    }
                    return Ok(first);
                }
                self.expect_op(",")?;
                let mut items = vec![first];
                items.extend(self.pattern_items(")")?);
                Ok(Pattern::Sequence(items))
            }
            TokenKind::Op("[") => {
                self.pos += 1;
                Ok(Pattern::Sequence(self.pattern_items("]")?))
            }
            TokenKind::Op("{") => self.mapping_pattern(),
            _ => Ok(Pattern::Value(self.literal_pattern()?)),
        }
    }

    /// Comma-separated patterns up to and including `close`.
    fn pattern_items(&mut self, close: &str) -> Result<Vec<Pattern>> {
        let mut items = Vec::new();
        while !self.at_op(close) {
            items.push(self.maybe_star_pattern()?);
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(close)?;
        Ok(items)
    }

    /// `name` or `a.b.c` as used by value and class patterns.
    fn dotted_value(&mut self) -> Result<Expr> {
        let mut expr = Expr::Name(self.expect_name()?);
        while self.eat_op(".") {
            let attr = self.expect_name()?;
            expr = Expr::Attribute { value: Box::new(expr), attr };
        }
        Ok(expr)
    }

    /// Strings, or signed numbers with an optional `+ 2j` / `- 2j` part.
    fn literal_pattern(&mut self) -> Result<Expr> {
        if self.kind().is_string_like() {
            let value = self.strings()?;
            if matches!(value, Expr::FString(_)) {
                return Err(self.error("patterns may only match literals and attribute lookups"));
            }
            return Ok(value);
        }
        let negative = self.eat_op("-");
        if !matches!(self.kind(), TokenKind::Int(_) | TokenKind::Float(_) | TokenKind::Imaginary(_)) {
            return Err(self.error("invalid pattern"));
        }
        let number = self.atom()?;
        let real = if negative {
            Expr::UnaryOp { op: UnaryOp::USub, operand: Box::new(number) }
        } else {
            number
        };
        let op = match self.kind() {
            TokenKind::Op("+") => BinOp::Add,
            TokenKind::Op("-") => BinOp::Sub,
            _ => return Ok(real),
        };
        self.pos += 1;
        if !matches!(self.kind(), TokenKind::Imaginary(_)) {
            return Err(self.error("imaginary number required in complex literal"));
        }
        let imaginary = self.atom()?;
        Ok(Expr::BinOp { left: Box::new(real), op, right: Box::new(imaginary) })
    }

    fn class_pattern(&mut self, cls: Expr) -> Result<Pattern> {
        let mut patterns = Vec::new();
        let mut kwd_attrs = Vec::new();
        let mut kwd_patterns = Vec::new();
        while !self.at_op(")") {
            if matches!(self.kind(), TokenKind::Name(_)) && self.peek_nth(1).is_op("=") {
                kwd_attrs.push(self.expect_name()?);
                self.pos += 1;
                kwd_patterns.push(self.pattern()?);
            } else {
                if !kwd_attrs.is_empty() {
                    return Err(self.error("positional patterns follow keyword patterns"));
                }
                patterns.push(self.pattern()?);
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok(Pattern::Class { cls, patterns, kwd_attrs, kwd_patterns })
    }

    fn mapping_pattern(&mut self) -> Result<Pattern> {
        self.expect_op("{")?;
        let mut keys = Vec::new();
        let mut patterns = Vec::new();
        let mut rest = None;
        while !self.at_op("}") {
            if self.eat_op("**") {
                rest = Some(self.expect_name()?);
                self.eat_op(",");
                break;
            }
            let key = match self.kind() {
                TokenKind::Keyword(Kw::None) | TokenKind::Keyword(Kw::True) | TokenKind::Keyword(Kw::False) => {
                    self.atom()?
                }
                TokenKind::Name(_) => {
                    let key = self.dotted_value()?;
                    if matches!(key, Expr::Name(_)) {
                        return Err(self.error("mapping pattern keys may only match literals and attribute lookups"));
                    }
                    key
                }
                _ => self.literal_pattern()?,
            };
            self.expect_op(":")?;
            keys.push(key);
            patterns.push(self.pattern()?);
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op("}")?;
        Ok(Pattern::Mapping { keys, patterns, rest })
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    /// Comma-separated `for` / comprehension target; a tuple when commas appear.
    fn target_list(&mut self) -> Result<Expr> {
        let first = self.star_target()?;
        if !self.at_op(",") {
            self.check_target(&first, "assign to")?;
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat_op(",") {
            if self.at_kw(Kw::In) {
                break;
            }
            elts.push(self.star_target()?);
        }
        let target = Expr::Tuple(elts);
        self.check_target(&target, "assign to")?;
        Ok(target)
    }

    fn star_target(&mut self) -> Result<Expr> {
        if self.eat_op("*") {
            return Ok(Expr::Starred(Box::new(self.bitor()?)));
        }
        self.bitor()
    }

    /// Expression list as found on the right of `=` or after `return`;
    /// commas build a tuple.
    fn star_expressions(&mut self) -> Result<Expr> {
        let first = self.star_or_test()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat_op(",") {
            if !self.starts_expression() {
                break;
            }
            elts.push(self.star_or_test()?);
        }
        Ok(Expr::Tuple(elts))
    }

    fn star_or_test(&mut self) -> Result<Expr> {
        if self.eat_op("*") {
            return Ok(Expr::Starred(Box::new(self.bitor()?)));
        }
        self.test()
    }

    fn star_or_named(&mut self) -> Result<Expr> {
        if self.eat_op("*") {
            return Ok(Expr::Starred(Box::new(self.bitor()?)));
        }
        self.named_expr_test()
    }

    fn starts_expression(&self) -> bool {
        match self.kind() {
            TokenKind::Name(_)
            | TokenKind::Int(_)
            | TokenKind::Float(_)
            | TokenKind::Imaginary(_)
            | TokenKind::Str(_)
            | TokenKind::Bytes(_)
            | TokenKind::FString(_) => true,
            TokenKind::Keyword(kw) => matches!(
                kw,
                Kw::None | Kw::True | Kw::False | Kw::Not | Kw::Lambda | Kw::Await
            ),
            TokenKind::Op(op) => matches!(*op, "(" | "[" | "{" | "-" | "+" | "~" | "*" | "..."),
            _ => false,
        }
    }

    fn named_expr_test(&mut self) -> Result<Expr> {
        let expr = self.test()?;
        if self.at_op(":=") {
            if !matches!(expr, Expr::Name(_)) {
                return Err(self.error("cannot use assignment expressions with this target"));
            }
            self.pos += 1;
            let value = self.test()?;
            return Ok(Expr::NamedExpr { target: Box::new(expr), value: Box::new(value) });
        }
        Ok(expr)
    }

    fn test(&mut self) -> Result<Expr> {
        if self.at_kw(Kw::Lambda) {
            return self.lambda();
        }
        let body = self.or_test()?;
        if self.at_kw(Kw::If) {
            self.pos += 1;
            let test = self.or_test()?;
            self.expect_kw(Kw::Else)?;
            let orelse = self.test()?;
            return Ok(Expr::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            });
        }
        Ok(body)
    }

    fn lambda(&mut self) -> Result<Expr> {
        self.expect_kw(Kw::Lambda)?;
        let params = self.parameters(":", false)?;
        self.expect_op(":")?;
        let body = self.test()?;
        Ok(Expr::Lambda { params: Box::new(params), body: Box::new(body) })
    }

    fn or_test(&mut self) -> Result<Expr> {
        let first = self.and_test()?;
        if !self.at_kw(Kw::Or) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_kw(Kw::Or) {
            values.push(self.and_test()?);
        }
        Ok(Expr::BoolOp { op: BoolOp::Or, values })
    }

    fn and_test(&mut self) -> Result<Expr> {
        let first = self.not_test()?;
        if !self.at_kw(Kw::And) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_kw(Kw::And) {
            values.push(self.not_test()?);
        }
        Ok(Expr::BoolOp { op: BoolOp::And, values })
    }

    fn not_test(&mut self) -> Result<Expr> {
        if self.eat_kw(Kw::Not) {
            let operand = self.not_test()?;
            return Ok(Expr::UnaryOp { op: UnaryOp::Not, operand: Box::new(operand) });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr> {
        let left = self.bitor()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        while let Some(op) = self.comparison_op() {
            ops.push(op);
            comparators.push(self.bitor()?);
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(Expr::Compare { left: Box::new(left), ops, comparators })
    }

    fn comparison_op(&mut self) -> Option<CmpOp> {
        let (op, width) = match self.kind() {
            TokenKind::Op("==") => (CmpOp::Eq, 1),
            TokenKind::Op("!=") => (CmpOp::NotEq, 1),
            TokenKind::Op("<") => (CmpOp::Lt, 1),
            TokenKind::Op("<=") => (CmpOp::LtE, 1),
            TokenKind::Op(">") => (CmpOp::Gt, 1),
            TokenKind::Op(">=") => (CmpOp::GtE, 1),
            TokenKind::Keyword(Kw::In) => (CmpOp::In, 1),
            TokenKind::Keyword(Kw::Not) if self.peek_nth(1).is_keyword(Kw::In) => (CmpOp::NotIn, 2),
            TokenKind::Keyword(Kw::Is) if self.peek_nth(1).is_keyword(Kw::Not) => (CmpOp::IsNot, 2),
            TokenKind::Keyword(Kw::Is) => (CmpOp::Is, 1),
            _ => return None,
        };
        self.pos += width;
        Some(op)
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expr>,
        table: &[(&str, BinOp)],
    ) -> Result<Expr> {
        let mut left = next(self)?;
        'outer: loop {
            for (tok, op) in table {
                if self.at_op(tok) {
                    self.pos += 1;
                    let right = next(self)?;
                    left = Expr::BinOp { left: Box::new(left), op: *op, right: Box::new(right) };
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn bitor(&mut self) -> Result<Expr> {
        self.binary_level(Self::bitxor, &[("|", BinOp::BitOr)])
    }

    fn bitxor(&mut self) -> Result<Expr> {
        self.binary_level(Self::bitand, &[("^", BinOp::BitXor)])
    }

    fn bitand(&mut self) -> Result<Expr> {
        self.binary_level(Self::shift, &[("&", BinOp::BitAnd)])
    }

    fn shift(&mut self) -> Result<Expr> {
        self.binary_level(Self::arith, &[("<<", BinOp::LShift), (">>", BinOp::RShift)])
    }

    fn arith(&mut self) -> Result<Expr> {
        self.binary_level(Self::term, &[("+", BinOp::Add), ("-", BinOp::Sub)])
    }

    fn term(&mut self) -> Result<Expr> {
        self.binary_level(
            Self::factor,
            &[
                ("*", BinOp::Mult),
                ("/", BinOp::Div),
                ("//", BinOp::FloorDiv),
                ("%", BinOp::Mod),
                ("@", BinOp::MatMult),
            ],
        )
    }

    fn factor(&mut self) -> Result<Expr> {
        let op = match self.kind() {
            TokenKind::Op("+") => UnaryOp::UAdd,
            TokenKind::Op("-") => UnaryOp::USub,
            TokenKind::Op("~") => UnaryOp::Invert,
            _ => return self.power(),
        };
        self.pos += 1;
        let operand = self.factor()?;
        Ok(Expr::UnaryOp { op, operand: Box::new(operand) })
    }

    fn power(&mut self) -> Result<Expr> {
        let base = if self.eat_kw(Kw::Await) {
            Expr::Await(Box::new(self.primary()?))
        } else {
            self.primary()?
        };
        if self.eat_op("**") {
            let exponent = self.factor()?;
            return Ok(Expr::BinOp { left: Box::new(base), op: BinOp::Pow, right: Box::new(exponent) });
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op("(") {
                let (args, keywords) = self.call_arguments()?;
                expr = Expr::Call { func: Box::new(expr), args, keywords };
            } else if self.eat_op("[") {
                let slice = self.slices()?;
                self.expect_op("]")?;
                expr = Expr::Subscript { value: Box::new(expr), slice: Box::new(slice) };
            } else if self.eat_op(".") {
                let attr = self.expect_name()?;
                expr = Expr::Attribute { value: Box::new(expr), attr };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Arguments after an opening `(`, consuming the closing `)`.
    fn call_arguments(&mut self) -> Result<(Vec<Expr>, Vec<Keyword>)> {
        let mut args = Vec::new();
        let mut keywords: Vec<Keyword> = Vec::new();
        while !self.at_op(")") {
            if self.eat_op("*") {
                if keywords.iter().any(|k| k.arg.is_none()) {
                    return Err(self.error("iterable argument unpacking follows keyword argument unpacking"));
                }
                args.push(Expr::Starred(Box::new(self.test()?)));
            } else if self.eat_op("**") {
                keywords.push(Keyword { arg: None, value: self.test()? });
            } else if matches!(self.kind(), TokenKind::Name(_)) && self.peek_nth(1).is_op("=") {
                let arg = self.expect_name()?;
                self.pos += 1;
                keywords.push(Keyword { arg: Some(arg), value: self.test()? });
            } else {
                let value = self.named_expr_test()?;
                if self.at_kw(Kw::For) || self.at_kw(Kw::Async) {
                    let generators = self.comprehension_clauses()?;
                    args.push(Expr::GeneratorExp { elt: Box::new(value), generators });
                } else {
                    if keywords.iter().any(|k| k.arg.is_none()) {
                        return Err(self.error("positional argument follows keyword argument unpacking"));
                    }
                    if keywords.iter().any(|k| k.arg.is_some()) {
                        return Err(self.error("positional argument follows keyword argument"));
                    }
                    args.push(value);
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok((args, keywords))
    }

    fn slices(&mut self) -> Result<Expr> {
        let first = self.slice_item()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat_op(",") {
            if self.at_op("]") {
                break;
            }
            elts.push(self.slice_item()?);
        }
        Ok(Expr::Tuple(elts))
    }

    fn slice_item(&mut self) -> Result<Expr> {
        let lower = if self.at_op(":") { None } else { Some(self.star_or_named()?) };
        if !self.eat_op(":") {
            return lower.ok_or_else(|| self.error("invalid syntax"));
        }
        let upper = if self.at_op(":") || self.at_op(",") || self.at_op("]") {
            None
        } else {
            Some(Box::new(self.test()?))
        };
        let step = if self.eat_op(":") {
            if self.at_op(",") || self.at_op("]") { None } else { Some(Box::new(self.test()?)) }
        } else {
            None
        };
        Ok(Expr::Slice { lower: lower.map(Box::new), upper, step })
    }

    fn comprehension_clauses(&mut self) -> Result<Vec<Comprehension>> {
        let mut generators = Vec::new();
        loop {
            let is_async = if self.at_kw(Kw::Async) && self.peek_nth(1).is_keyword(Kw::For) {
                self.pos += 1;
                true
            } else {
                false
            };
            if !self.eat_kw(Kw::For) {
                break;
            }
            let target = self.target_list()?;
            self.expect_kw(Kw::In)?;
            let iter = self.or_test()?;
            let mut ifs = Vec::new();
            while self.eat_kw(Kw::If) {
                ifs.push(self.or_test()?);
            }
            generators.push(Comprehension { target, iter, ifs, is_async });
        }
        if generators.is_empty() {
            return Err(self.error("expected 'for'"));
        }
        Ok(generators)
    }

    fn at_comprehension(&self) -> bool {
        self.at_kw(Kw::For) || (self.at_kw(Kw::Async) && self.peek_nth(1).is_keyword(Kw::For))
    }

    fn yield_expr(&mut self) -> Result<Expr> {
        self.expect_kw(Kw::Yield)?;
        if self.eat_kw(Kw::From) {
            return Ok(Expr::YieldFrom(Box::new(self.test()?)));
        }
        if self.starts_expression() {
            return Ok(Expr::Yield(Some(Box::new(self.star_expressions()?))));
        }
        Ok(Expr::Yield(None))
    }

    fn atom(&mut self) -> Result<Expr> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Name(name) => {
                self.pos += 1;
                Ok(Expr::Name(name))
            }
            TokenKind::Keyword(Kw::None) => {
                self.pos += 1;
                Ok(Expr::Constant(Constant::None))
            }
            TokenKind::Keyword(Kw::True) => {
                self.pos += 1;
                Ok(Expr::Constant(Constant::Bool(true)))
            }
            TokenKind::Keyword(Kw::False) => {
                self.pos += 1;
                Ok(Expr::Constant(Constant::Bool(false)))
            }
            TokenKind::Int(text) => {
                self.pos += 1;
                Ok(Expr::Constant(Constant::Int(text)))
            }
            TokenKind::Float(text) => {
                self.pos += 1;
                Ok(Expr::Constant(Constant::Float(text)))
            }
            TokenKind::Imaginary(text) => {
                self.pos += 1;
                Ok(Expr::Constant(Constant::Complex(text)))
            }
            TokenKind::Str(_) | TokenKind::Bytes(_) | TokenKind::FString(_) => self.strings(),
            TokenKind::Op("...") => {
                self.pos += 1;
                Ok(Expr::Constant(Constant::Ellipsis))
            }
            TokenKind::Op("(") => self.paren_atom(),
            TokenKind::Op("[") => self.list_atom(),
            TokenKind::Op("{") => self.brace_atom(),
            _ => Err(self.unexpected()),
        }
    }

    /// Adjacent string literals concatenate. Any f-string piece makes the
    /// whole literal an opaque f-string.
    fn strings(&mut self) -> Result<Expr> {
        let mut parts = Vec::new();
        while self.kind().is_string_like() {
            parts.push(self.advance());
        }

        let any_bytes = parts.iter().any(|t| matches!(t.kind, TokenKind::Bytes(_)));
        let all_bytes = parts.iter().all(|t| matches!(t.kind, TokenKind::Bytes(_)));
        if any_bytes && !all_bytes {
            let span = parts[0].span;
            return Err(Error::parse_failed("cannot mix bytes and nonbytes literals", span.line, span.column)
                .with_operation("parser::parse"));
        }

        if parts.iter().any(|t| matches!(t.kind, TokenKind::FString(_))) {
            let raw: Vec<String> = parts
                .into_iter()
                .map(|t| match t.kind {
                    TokenKind::FString(raw) => raw,
                    TokenKind::Str(s) => crate::unparse::repr_str(&s),
                    _ => String::new(),
                })
                .collect();
            return Ok(Expr::FString(raw.join(" ")));
        }

        if all_bytes {
            let mut bytes = Vec::new();
            for part in parts {
                if let TokenKind::Bytes(b) = part.kind {
                    bytes.extend(b);
                }
            }
            return Ok(Expr::Constant(Constant::Bytes(bytes)));
        }

        let mut text = String::new();
        for part in parts {
            if let TokenKind::Str(s) = part.kind {
                text.push_str(&s);
            }
        }
        Ok(Expr::Constant(Constant::Str(text)))
    }

    fn paren_atom(&mut self) -> Result<Expr> {
        self.expect_op("(")?;
        if self.eat_op(")") {
            return Ok(Expr::Tuple(Vec::new()));
        }
        if self.at_kw(Kw::Yield) {
            let expr = self.yield_expr()?;
            self.expect_op(")")?;
            return Ok(expr);
        }
        let first = self.star_or_named()?;
        if self.at_comprehension() {
            let generators = self.comprehension_clauses()?;
            self.expect_op(")")?;
            return Ok(Expr::GeneratorExp { elt: Box::new(first), generators });
        }
        if !self.at_op(",") {
            self.expect_op(")")?;
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat_op(",") {
            if self.at_op(")") {
                break;
            }
            elts.push(self.star_or_named()?);
        }
        self.expect_op(")")?;
        Ok(Expr::Tuple(elts))
    }

    fn list_atom(&mut self) -> Result<Expr> {
        self.expect_op("[")?;
        if self.eat_op("]") {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.star_or_named()?;
        if self.at_comprehension() {
            let generators = self.comprehension_clauses()?;
            self.expect_op("]")?;
            return Ok(Expr::ListComp { elt: Box::new(first), generators });
        }
        let mut elts = vec![first];
        while self.eat_op(",") {
            if self.at_op("]") {
                break;
            }
            elts.push(self.star_or_named()?);
        }
        self.expect_op("]")?;
        Ok(Expr::List(elts))
    }

    fn brace_atom(&mut self) -> Result<Expr> {
        self.expect_op("{")?;
        if self.eat_op("}") {
            return Ok(Expr::Dict { keys: Vec::new(), values: Vec::new() });
        }

        if self.at_op("**") {
            return self.dict_rest(None);
        }

        let first = self.star_or_named()?;
        if self.eat_op(":") {
            let value = self.test()?;
            if self.at_comprehension() {
                let generators = self.comprehension_clauses()?;
                self.expect_op("}")?;
                return Ok(Expr::DictComp {
                    key: Box::new(first),
                    value: Box::new(value),
                    generators,
                });
            }
            return self.dict_rest(Some((first, value)));
        }

        if self.at_comprehension() {
            let generators = self.comprehension_clauses()?;
            self.expect_op("}")?;
            return Ok(Expr::SetComp { elt: Box::new(first), generators });
        }
        let mut elts = vec![first];
        while self.eat_op(",") {
            if self.at_op("}") {
                break;
            }
            elts.push(self.star_or_named()?);
        }
        self.expect_op("}")?;
        Ok(Expr::Set(elts))
    }

    fn dict_rest(&mut self, first: Option<(Expr, Expr)>) -> Result<Expr> {
        let mut keys = Vec::new();
        let mut values = Vec::new();
        let mut need_entry = first.is_none();
        if let Some((key, value)) = first {
            keys.push(Some(key));
            values.push(value);
        }
        loop {
            if !need_entry {
                if !self.eat_op(",") || self.at_op("}") {
                    break;
                }
            }
            need_entry = false;
            if self.eat_op("**") {
                keys.push(None);
                values.push(self.bitor()?);
            } else {
                let key = self.test()?;
                self.expect_op(":")?;
                keys.push(Some(key));
                values.push(self.test()?);
            }
        }
        self.expect_op("}")?;
        Ok(Expr::Dict { keys, values })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Vec<Stmt> {
        parse_module(src).unwrap().body
    }

    fn expr(src: &str) -> Expr {
        parse_expression(src).unwrap()
    }

    #[test]
    fn test_empty_module() {
        assert!(parse("").is_empty());
        assert!(parse("\n\n# only a comment\n").is_empty());
    }

    #[test]
    fn test_assignment_forms() {
        let body = parse("a = b = 1\nx, *y = t\nn += 1\nv: int = 3\n");
        assert_eq!(body.len(), 4);
        match &body[0].kind {
            StmtKind::Assign { targets, .. } => assert_eq!(targets.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        match &body[1].kind {
            StmtKind::Assign { targets, .. } => {
                assert!(matches!(&targets[0], Expr::Tuple(elts) if matches!(elts[1], Expr::Starred(_))))
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(body[2].kind, StmtKind::AugAssign { op: BinOp::Add, .. }));
        assert!(matches!(body[3].kind, StmtKind::AnnAssign { simple: true, .. }));
    }

    #[test]
    fn test_statement_locations() {
        let body = parse("x = 1\n\ndef f():\n    return x\n");
        assert_eq!(body[0].loc, Location { line: 1, column: 0 });
        assert_eq!(body[1].loc, Location { line: 3, column: 0 });
        match &body[1].kind {
            StmtKind::FunctionDef { body, .. } => {
                assert_eq!(body[0].loc, Location { line: 4, column: 4 })
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_precedence() {
        match expr("1 + 2 * 3") {
            Expr::BinOp { op: BinOp::Add, right, .. } => {
                assert!(matches!(*right, Expr::BinOp { op: BinOp::Mult, .. }))
            }
            other => panic!("unexpected {:?}", other),
        }
        match expr("-2 ** 2") {
            Expr::UnaryOp { op: UnaryOp::USub, operand } => {
                assert!(matches!(*operand, Expr::BinOp { op: BinOp::Pow, .. }))
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(expr("not a and b"), Expr::BoolOp { op: BoolOp::And, .. }));
    }

    #[test]
    fn test_comparisons() {
        match expr("a not in b is not c < d") {
            Expr::Compare { ops, comparators, .. } => {
                assert_eq!(ops, vec![CmpOp::NotIn, CmpOp::IsNot, CmpOp::Lt]);
                assert_eq!(comparators.len(), 3);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_comprehensions_and_displays() {
        assert!(matches!(expr("[x for x in y if x]"), Expr::ListComp { .. }));
        assert!(matches!(expr("{x for x in y}"), Expr::SetComp { .. }));
        assert!(matches!(expr("{k: v for k, v in y}"), Expr::DictComp { .. }));
        assert!(matches!(expr("(x for x in y)"), Expr::GeneratorExp { .. }));
        assert!(matches!(expr("{1, 2}"), Expr::Set(_)));
        assert!(matches!(expr("{**a, 'b': 1}"), Expr::Dict { .. }));
        assert!(matches!(expr("{}"), Expr::Dict { .. }));
        assert!(matches!(expr("()"), Expr::Tuple(ref e) if e.is_empty()));
        assert!(matches!(expr("(1,)"), Expr::Tuple(ref e) if e.len() == 1));
        match expr("sum(x for x in y)") {
            Expr::Call { args, .. } => assert!(matches!(args[0], Expr::GeneratorExp { .. })),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_calls_and_slices() {
        match expr("f(a, *b, c=1, **d)") {
            Expr::Call { args, keywords, .. } => {
                assert_eq!(args.len(), 2);
                assert_eq!(keywords.len(), 2);
                assert_eq!(keywords[1].arg, None);
            }
            other => panic!("unexpected {:?}", other),
        }
        match expr("a[1:2, ::3]") {
            Expr::Subscript { slice, .. } => assert!(matches!(*slice, Expr::Tuple(_))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_implicit_concatenation() {
        assert_eq!(expr("'a' 'b'"), Expr::str("ab"));
        assert!(matches!(expr("'a' f'{b}'"), Expr::FString(_)));
        assert!(parse_expression("b'a' 'b'").is_err());
    }

    #[test]
    fn test_compound_statements() {
        let src = "\
@decorator
async def f(a, /, b=1, *args, c, **kw) -> int:
    async with open(p) as fh, lock:
        pass
    async for x in xs:
        continue
    try:
        pass
    except ValueError as e:
        raise RuntimeError() from e
    except:
        pass
    else:
        pass
    finally:
        pass
    while x:
        break
    else:
        pass

class C(Base, metaclass=M):
    x = 1
";
        let body = parse(src);
        assert_eq!(body.len(), 2);
        match &body[0].kind {
            StmtKind::FunctionDef { is_async, params, decorators, body, returns, .. } => {
                assert!(*is_async);
                assert_eq!(decorators.len(), 1);
                assert!(returns.is_some());
                assert_eq!(params.posonly.len(), 1);
                assert_eq!(params.args.len(), 1);
                assert_eq!(params.kwonly.len(), 1);
                assert!(params.vararg.is_some() && params.kwarg.is_some());
                assert_eq!(body.len(), 4);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(&body[1].kind, StmtKind::ClassDef { bases, keywords, .. } if bases.len() == 1 && keywords.len() == 1));
    }

    #[test]
    fn test_elif_nests() {
        let body = parse("if a:\n    pass\nelif b:\n    pass\nelse:\n    pass\n");
        match &body[0].kind {
            StmtKind::If { orelse, .. } => {
                assert_eq!(orelse.len(), 1);
                assert!(matches!(&orelse[0].kind, StmtKind::If { orelse, .. } if orelse.len() == 1));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_imports() {
        let body = parse("import os.path as p, sys\nfrom .. import (a, b as c,)\nfrom x import *\n");
        assert!(matches!(&body[0].kind, StmtKind::Import(names) if names.len() == 2));
        assert!(matches!(&body[1].kind, StmtKind::ImportFrom { module: None, level: 2, names } if names.len() == 2));
        assert!(matches!(&body[2].kind, StmtKind::ImportFrom { level: 0, .. }));
    }

    #[test]
    fn test_semicolons_and_inline_blocks() {
        let body = parse("a = 1; b = 2\nif a: b = 3; c = 4\n");
        assert_eq!(body.len(), 3);
        assert!(matches!(&body[2].kind, StmtKind::If { body, .. } if body.len() == 2));
    }

    #[test]
    fn test_lambda_and_walrus() {
        assert!(matches!(expr("lambda x, y=2: x + y"), Expr::Lambda { .. }));
        assert!(matches!(expr("(n := 10)"), Expr::NamedExpr { .. }));
        assert!(matches!(expr("a if b else c"), Expr::IfExp { .. }));
    }

    #[test]
    fn test_modern_syntax_parses_and_reparses() {
        for src in [
            "match x:\n    case 1:\n        pass\n",
            "try:\n    pass\nexcept* E:\n    pass\n",
            "type X = int\n",
            "def f[T](x: T) -> T: return x\n",
            "x = '\\N{BULLET}' + 'a'\n",
            "\u{feff}x = 1\n",
            "class Stack[T, *Ts, **P]:\n    pass\n",
            "with (open(a) as f, open(b) as g):\n    pass\n",
            "try:\n    pass\nexcept A, B:\n    pass\n",
            "x = f'{d[\"k\"]:>{width}}'\n",
        ] {
            let module = parse_module(src).unwrap_or_else(|e| panic!("{:?}: {}", src, e));
            let out = crate::unparse(&module);
            let again = parse_module(&out).unwrap_or_else(|e| panic!("{:?} -> {:?}: {}", src, out, e));
            assert_eq!(crate::unparse(&again), out);
        }
    }

    #[test]
    fn test_match_statement() {
        let src = "\
match point:
    case Point(x=0, y=0):
        pass
    case [x, *rest] if x > 0:
        pass
    case {'k': v, **others}:
        pass
    case 1 | 2 as n:
        pass
    case -1 + 2j:
        pass
    case _:
        pass
";
        let body = parse(src);
        let StmtKind::Match { subject, cases } = &body[0].kind else {
            panic!("unexpected {:?}", body[0].kind);
        };
        assert_eq!(*subject, Expr::name("point"));
        assert_eq!(cases.len(), 6);
        assert!(matches!(&cases[0].pattern, Pattern::Class { kwd_attrs, .. } if kwd_attrs == &["x", "y"]));
        assert!(matches!(&cases[1].pattern, Pattern::Sequence(items) if items[1] == Pattern::Star(Some("rest".into()))));
        assert!(cases[1].guard.is_some());
        assert!(matches!(&cases[2].pattern, Pattern::Mapping { rest: Some(rest), .. } if rest == "others"));
        assert!(matches!(&cases[3].pattern, Pattern::As { pattern: Some(inner), .. } if matches!(**inner, Pattern::Or(_))));
        assert!(matches!(&cases[4].pattern, Pattern::Value(Expr::BinOp { op: BinOp::Add, .. })));
        assert_eq!(cases[5].pattern, Pattern::wildcard());
        assert_eq!(cases[5].loc, Location { line: 12, column: 4 });
    }

    #[test]
    fn test_soft_keywords_stay_names() {
        let body = parse("match = 1\nmatch(x)\nmatch.group()\ntype = str\ntype(x)\ncase = _ = 2\n");
        assert_eq!(body.len(), 6);
        assert!(matches!(&body[0].kind, StmtKind::Assign { targets, .. } if targets[0] == Expr::name("match")));
        assert!(matches!(&body[1].kind, StmtKind::Expr(call) if call.is_call_to("match")));
        assert!(matches!(&body[3].kind, StmtKind::Assign { .. }));
        assert!(matches!(&body[4].kind, StmtKind::Expr(call) if call.is_call_to("type")));
    }

    #[test]
    fn test_type_parameters() {
        let body = parse("def f[T: int, *Ts, **P = [int]](x: T) -> T:\n    pass\ntype Pair[K, V = K] = tuple[K, V]\n");
        match &body[0].kind {
            StmtKind::FunctionDef { type_params, .. } => {
                let names: Vec<_> = type_params.iter().map(|p| p.name()).collect();
                assert_eq!(names, ["T", "Ts", "P"]);
                assert!(matches!(&type_params[0], TypeParam::TypeVar { bound: Some(_), default: None, .. }));
                assert!(matches!(&type_params[2], TypeParam::ParamSpec { default: Some(_), .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(&body[1].kind, StmtKind::TypeAlias { name, type_params, .. } if name == "Pair" && type_params.len() == 2));
    }

    #[test]
    fn test_except_forms() {
        let body = parse("try:\n    pass\nexcept* (A, B) as eg:\n    pass\nexcept* C:\n    pass\n");
        assert!(matches!(&body[0].kind, StmtKind::Try { is_star: true, handlers, .. } if handlers.len() == 2));
        let body = parse("try:\n    pass\nexcept A, B:\n    pass\n");
        match &body[0].kind {
            StmtKind::Try { is_star: false, handlers, .. } => {
                assert!(matches!(&handlers[0].type_, Some(Expr::Tuple(elts)) if elts.len() == 2))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parenthesized_with_items() {
        let body = parse("with (a as b, c as d,):\n    pass\nwith (a, b) as c:\n    pass\nwith (yield):\n    pass\n");
        assert!(matches!(&body[0].kind, StmtKind::With { items, .. } if items.len() == 2));
        match &body[1].kind {
            StmtKind::With { items, .. } => {
                assert_eq!(items.len(), 1);
                assert!(matches!(items[0].context_expr, Expr::Tuple(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(&body[2].kind, StmtKind::With { items, .. } if matches!(items[0].context_expr, Expr::Yield(None))));
    }

    #[test]
    fn test_syntax_errors() {
        for bad in [
            "def f(:\n    pass",
            "x = = 1",
            "1 = x",
            "f() += 1",
            "if x\n    pass",
            "if x:\npass",
            "  x = 1",
            "try:\n    pass\n",
            "match x:\n    case *a:\n        pass\n",
            "match x:\n    case a as _:\n        pass\n",
            "match x:\n    case f'{y}':\n        pass\n",
            "match x:\n    case {k: 1}:\n        pass\n",
            "match x:\n    case P(a=1, b):\n        pass\n",
            "match x:\n    case 1:\n        pass\n    y = 2\n",
            "try:\n    pass\nexcept* E:\n    pass\nexcept F:\n    pass\n",
            "try:\n    pass\nexcept*:\n    pass\n",
            "try:\n    pass\nexcept A, B as e:\n    pass\n",
            "def f[]():\n    pass",
            "def f[T = int, U]():\n    pass",
            "def f(*, **kw):\n    pass",
            "f(**k, a)",
            "f(**k, *a)",
        ] {
            let err = parse_module(bad).unwrap_err();
            assert_eq!(err.kind(), codesmith_error::ErrorKind::ParseFailed, "{}", bad);
            assert!(err.context_value("line").is_some());
        }
    }
}
