//! # Unparser
//!
//! Serializes an AST back to source text in canonical form: four-space
//! indentation, a blank line before every non-leading `def`/`class`, minimal
//! parentheses derived from operator precedence, and Python `repr` style
//! string literals. Comments and original layout are not preserved.
//!
//! Output never ends with a newline.

use crate::ast::*;

/// Serialize a whole module.
pub fn unparse(module: &Module) -> String {
    let mut u = Unparser::default();
    u.body_with_docstring(&module.body);
    u.out
}

/// Serialize a single expression at statement-level precedence.
pub fn unparse_expr(expr: &Expr) -> String {
    let mut u = Unparser::default();
    u.expr(expr, Prec::Test);
    u.out
}

/// Binding strength of an expression context. A node is parenthesized when
/// its context demands a tighter binding than the node provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    NamedExpr,
    Tuple,
    Yield,
    Test,
    Or,
    And,
    Not,
    Cmp,
    /// Also the `|` level.
    Expr,
    BXor,
    BAnd,
    Shift,
    Arith,
    Term,
    Factor,
    Power,
    Await,
    Atom,
}

impl Prec {
    const BOR: Prec = Prec::Expr;

    fn next(self) -> Prec {
        match self {
            Prec::NamedExpr => Prec::Tuple,
            Prec::Tuple => Prec::Yield,
            Prec::Yield => Prec::Test,
            Prec::Test => Prec::Or,
            Prec::Or => Prec::And,
            Prec::And => Prec::Not,
            Prec::Not => Prec::Cmp,
            Prec::Cmp => Prec::Expr,
            Prec::Expr => Prec::BXor,
            Prec::BXor => Prec::BAnd,
            Prec::BAnd => Prec::Shift,
            Prec::Shift => Prec::Arith,
            Prec::Arith => Prec::Term,
            Prec::Term => Prec::Factor,
            Prec::Factor => Prec::Power,
            Prec::Power => Prec::Await,
            Prec::Await | Prec::Atom => Prec::Atom,
        }
    }

    fn of_binop(op: BinOp) -> Prec {
        match op {
            BinOp::Add | BinOp::Sub => Prec::Arith,
            BinOp::Mult | BinOp::MatMult | BinOp::Div | BinOp::Mod | BinOp::FloorDiv => Prec::Term,
            BinOp::LShift | BinOp::RShift => Prec::Shift,
            BinOp::BitOr => Prec::BOR,
            BinOp::BitXor => Prec::BXor,
            BinOp::BitAnd => Prec::BAnd,
            BinOp::Pow => Prec::Power,
        }
    }
}

#[derive(Default)]
struct Unparser {
    out: String,
    indent: usize,
}

impl Unparser {
    fn write(&mut self, text: &str) {
        self.out.push_str(text);
    }

    fn maybe_newline(&mut self) {
        if !self.out.is_empty() {
            self.out.push('\n');
        }
    }

    fn fill(&mut self, text: &str) {
        self.maybe_newline();
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
    }

    fn open_if(&mut self, cond: bool, open: &str) {
        if cond {
            self.write(open);
        }
    }

    fn block(&mut self, body: &[Stmt]) {
        self.write(":");
        self.indent += 1;
        for stmt in body {
            self.stmt(stmt);
        }
        self.indent -= 1;
    }

    /// Block of a `def` or `class`, whose leading string is a docstring.
    fn definition_block(&mut self, body: &[Stmt]) {
        self.write(":");
        self.indent += 1;
        self.body_with_docstring(body);
        self.indent -= 1;
    }

    fn body_with_docstring(&mut self, body: &[Stmt]) {
        let mut stmts = body.iter();
        if let Some(Stmt { kind: StmtKind::Expr(Expr::Constant(Constant::Str(doc))), .. }) = body.first() {
            self.docstring(doc);
            stmts.next();
        }
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn docstring(&mut self, doc: &str) {
        self.fill("");
        let escaped: String = doc
            .chars()
            .map(|c| match c {
                '\n' | '\t' => c.to_string(),
                '\\' => "\\\\".to_string(),
                c if !is_printable(c) => escape_nonprintable(c),
                c => c.to_string(),
            })
            .collect();

        let mut quotes: Vec<&str> = ["\"\"\"", "'''"]
            .into_iter()
            .filter(|q| !escaped.contains(q))
            .collect();
        if quotes.is_empty() {
            self.write(&repr_str(doc));
            return;
        }
        let mut escaped = escaped;
        if let Some(last) = escaped.chars().last() {
            // Prefer a quote style that differs from the final character.
            quotes.sort_by_key(|q| q.starts_with(last));
            if quotes[0].starts_with(last) {
                escaped.pop();
                escaped.push('\\');
                escaped.push(last);
            }
        }
        let quote = quotes[0];
        self.write(quote);
        self.write(&escaped);
        self.write(quote);
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::FunctionDef { is_async, name, type_params, params, returns, decorators, body } => {
                self.maybe_newline();
                for decorator in decorators {
                    self.fill("@");
                    self.expr(decorator, Prec::Test);
                }
                self.fill(if *is_async { "async def " } else { "def " });
                self.write(name);
                self.type_params(type_params);
                self.write("(");
                self.parameters(params);
                self.write(")");
                if let Some(returns) = returns {
                    self.write(" -> ");
                    self.expr(returns, Prec::Test);
                }
                self.definition_block(body);
            }
            StmtKind::ClassDef { name, type_params, bases, keywords, decorators, body } => {
                self.maybe_newline();
                for decorator in decorators {
                    self.fill("@");
                    self.expr(decorator, Prec::Test);
                }
                self.fill("class ");
                self.write(name);
                self.type_params(type_params);
                let has_args = !bases.is_empty() || !keywords.is_empty();
                self.open_if(has_args, "(");
                let mut first = true;
                for base in bases {
                    self.comma(&mut first);
                    self.expr(base, Prec::Test);
                }
                for keyword in keywords {
                    self.comma(&mut first);
                    self.keyword(keyword);
                }
                self.open_if(has_args, ")");
                self.definition_block(body);
            }
            StmtKind::Return(value) => {
                self.fill("return");
                if let Some(value) = value {
                    self.write(" ");
                    self.expr(value, Prec::Test);
                }
            }
            StmtKind::Delete(targets) => {
                self.fill("del ");
                self.expr_list(targets, Prec::Test);
            }
            StmtKind::Assign { targets, value } => {
                self.fill("");
                for target in targets {
                    self.expr(target, Prec::Tuple);
                    self.write(" = ");
                }
                self.expr(value, Prec::Test);
            }
            StmtKind::AugAssign { target, op, value } => {
                self.fill("");
                self.expr(target, Prec::Test);
                self.write(" ");
                self.write(op.as_str());
                self.write("= ");
                self.expr(value, Prec::Test);
            }
            StmtKind::AnnAssign { target, annotation, value, simple } => {
                self.fill("");
                let parens = !*simple && matches!(target, Expr::Name(_));
                self.open_if(parens, "(");
                self.expr(target, Prec::Test);
                self.open_if(parens, ")");
                self.write(": ");
                self.expr(annotation, Prec::Test);
                if let Some(value) = value {
                    self.write(" = ");
                    self.expr(value, Prec::Test);
                }
            }
            StmtKind::For { is_async, target, iter, body, orelse } => {
                self.fill(if *is_async { "async for " } else { "for " });
                self.expr(target, Prec::Tuple);
                self.write(" in ");
                self.expr(iter, Prec::Test);
                self.block(body);
                if !orelse.is_empty() {
                    self.fill("else");
                    self.block(orelse);
                }
            }
            StmtKind::While { test, body, orelse } => {
                self.fill("while ");
                self.expr(test, Prec::Test);
                self.block(body);
                if !orelse.is_empty() {
                    self.fill("else");
                    self.block(orelse);
                }
            }
            StmtKind::If { test, body, orelse } => {
                self.fill("if ");
                self.expr(test, Prec::Test);
                self.block(body);
                let mut orelse = orelse;
                // Collapse nested ifs into elif chains.
                while let [Stmt { kind: StmtKind::If { test, body, orelse: inner }, .. }] = orelse.as_slice() {
                    self.fill("elif ");
                    self.expr(test, Prec::Test);
                    self.block(body);
                    orelse = inner;
                }
                if !orelse.is_empty() {
                    self.fill("else");
                    self.block(orelse);
                }
            }
            StmtKind::With { is_async, items, body } => {
                self.fill(if *is_async { "async with " } else { "with " });
                let mut first = true;
                for item in items {
                    self.comma(&mut first);
                    self.expr(&item.context_expr, Prec::Test);
                    if let Some(vars) = &item.optional_vars {
                        self.write(" as ");
                        self.expr(vars, Prec::Test);
                    }
                }
                self.block(body);
            }
            StmtKind::Raise { exc, cause } => {
                self.fill("raise");
                if let Some(exc) = exc {
                    self.write(" ");
                    self.expr(exc, Prec::Test);
                }
                if let Some(cause) = cause {
                    self.write(" from ");
                    self.expr(cause, Prec::Test);
                }
            }
            StmtKind::Try { body, handlers, orelse, finalbody, is_star } => {
                self.fill("try");
                self.block(body);
                for handler in handlers {
                    self.fill(if *is_star { "except*" } else { "except" });
                    if let Some(type_) = &handler.type_ {
                        self.write(" ");
                        self.expr(type_, Prec::Test);
                    }
                    if let Some(name) = &handler.name {
                        self.write(" as ");
                        self.write(name);
                    }
                    self.block(&handler.body);
                }
                if !orelse.is_empty() {
                    self.fill("else");
                    self.block(orelse);
                }
                if !finalbody.is_empty() {
                    self.fill("finally");
                    self.block(finalbody);
                }
            }
            StmtKind::Match { subject, cases } => {
                self.fill("match ");
                self.expr(subject, Prec::Tuple);
                self.write(":");
                self.indent += 1;
                for case in cases {
                    self.fill("case ");
                    self.pattern(&case.pattern, false);
                    if let Some(guard) = &case.guard {
                        self.write(" if ");
                        self.expr(guard, Prec::Test);
                    }
                    self.block(&case.body);
                }
                self.indent -= 1;
            }
            StmtKind::TypeAlias { name, type_params, value } => {
                self.fill("type ");
                self.write(name);
                self.type_params(type_params);
                self.write(" = ");
                self.expr(value, Prec::Test);
            }
            StmtKind::Assert { test, msg } => {
                self.fill("assert ");
                self.expr(test, Prec::Test);
                if let Some(msg) = msg {
                    self.write(", ");
                    self.expr(msg, Prec::Test);
                }
            }
            StmtKind::Import(names) => {
                self.fill("import ");
                self.aliases(names);
            }
            StmtKind::ImportFrom { module, names, level } => {
                self.fill("from ");
                self.write(&".".repeat(*level));
                if let Some(module) = module {
                    self.write(module);
                }
                self.write(" import ");
                self.aliases(names);
            }
            StmtKind::Global(names) => {
                self.fill("global ");
                self.write(&names.join(", "));
            }
            StmtKind::Nonlocal(names) => {
                self.fill("nonlocal ");
                self.write(&names.join(", "));
            }
            StmtKind::Expr(value) => {
                self.fill("");
                self.expr(value, Prec::Yield);
            }
            StmtKind::Pass => self.fill("pass"),
            StmtKind::Break => self.fill("break"),
            StmtKind::Continue => self.fill("continue"),
        }
    }

    fn comma(&mut self, first: &mut bool) {
        if *first {
            *first = false;
        } else {
            self.write(", ");
        }
    }

    fn aliases(&mut self, names: &[Alias]) {
        let mut first = true;
        for alias in names {
            self.comma(&mut first);
            self.write(&alias.name);
            if let Some(asname) = &alias.asname {
                self.write(" as ");
                self.write(asname);
            }
        }
    }

    fn parameters(&mut self, params: &Parameters) {
        let mut first = true;
        for (index, param) in params.posonly.iter().chain(&params.args).enumerate() {
            self.comma(&mut first);
            self.param(param);
            if let Some(default) = &param.default {
                self.write("=");
                self.expr(default, Prec::Test);
            }
            if !params.posonly.is_empty() && index + 1 == params.posonly.len() {
                self.write(", /");
            }
        }
        if params.vararg.is_some() || !params.kwonly.is_empty() {
            self.comma(&mut first);
            self.write("*");
            if let Some(vararg) = &params.vararg {
                self.param(vararg);
            }
        }
        for param in &params.kwonly {
            self.write(", ");
            self.param(param);
            if let Some(default) = &param.default {
                self.write("=");
                self.expr(default, Prec::Test);
            }
        }
        if let Some(kwarg) = &params.kwarg {
            self.comma(&mut first);
            self.write("**");
            self.param(kwarg);
        }
    }

    fn param(&mut self, param: &Param) {
        self.write(&param.name);
        if let Some(annotation) = &param.annotation {
            self.write(": ");
            self.expr(annotation, Prec::Test);
        }
    }

    fn type_params(&mut self, params: &[TypeParam]) {
        if params.is_empty() {
            return;
        }
        self.write("[");
        let mut first = true;
        for param in params {
            self.comma(&mut first);
            let default = match param {
                TypeParam::TypeVar { name, bound, default } => {
                    self.write(name);
                    if let Some(bound) = bound {
                        self.write(": ");
                        self.expr(bound, Prec::Test);
                    }
                    default
                }
                TypeParam::ParamSpec { name, default } => {
                    self.write("**");
                    self.write(name);
                    default
                }
                TypeParam::TypeVarTuple { name, default } => {
                    self.write("*");
                    self.write(name);
                    default
                }
            };
            if let Some(default) = default {
                self.write(" = ");
                self.expr(default, Prec::Test);
            }
        }
        self.write("]");
    }

    /// `closed` is set for alternatives of an or-pattern, where `as` and `|`
    /// need parentheses.
    fn pattern(&mut self, pattern: &Pattern, closed: bool) {
        match pattern {
            Pattern::Value(value) => self.expr(value, Prec::BOR.next()),
            Pattern::Singleton(constant) => self.constant(constant),
            Pattern::Sequence(items) => {
                self.write("[");
                let mut first = true;
                for item in items {
                    self.comma(&mut first);
                    self.pattern(item, false);
                }
                self.write("]");
            }
            Pattern::Mapping { keys, patterns, rest } => {
                self.write("{");
                let mut first = true;
                for (key, pattern) in keys.iter().zip(patterns) {
                    self.comma(&mut first);
                    self.expr(key, Prec::BOR.next());
                    self.write(": ");
                    self.pattern(pattern, false);
                }
                if let Some(rest) = rest {
                    self.comma(&mut first);
                    self.write("**");
                    self.write(rest);
                }
                self.write("}");
            }
            Pattern::Class { cls, patterns, kwd_attrs, kwd_patterns } => {
                self.expr(cls, Prec::Atom);
                self.write("(");
                let mut first = true;
                for pattern in patterns {
                    self.comma(&mut first);
                    self.pattern(pattern, false);
                }
                for (attr, pattern) in kwd_attrs.iter().zip(kwd_patterns) {
                    self.comma(&mut first);
                    self.write(attr);
                    self.write("=");
                    self.pattern(pattern, false);
                }
                self.write(")");
            }
            Pattern::Star(name) => {
                self.write("*");
                self.write(name.as_deref().unwrap_or("_"));
            }
            Pattern::As { pattern: None, name } => self.write(name.as_deref().unwrap_or("_")),
            Pattern::As { pattern: Some(inner), name } => {
                let nested = matches!(**inner, Pattern::As { pattern: Some(_), .. });
                self.open_if(closed, "(");
                self.open_if(nested, "(");
                self.pattern(inner, false);
                self.open_if(nested, ")");
                self.write(" as ");
                self.write(name.as_deref().unwrap_or("_"));
                self.open_if(closed, ")");
            }
            Pattern::Or(alternatives) => {
                self.open_if(closed, "(");
                for (index, alternative) in alternatives.iter().enumerate() {
                    if index > 0 {
                        self.write(" | ");
                    }
                    self.pattern(alternative, true);
                }
                self.open_if(closed, ")");
            }
        }
    }

    fn keyword(&mut self, keyword: &Keyword) {
        match &keyword.arg {
            Some(arg) => {
                self.write(arg);
                self.write("=");
            }
            None => self.write("**"),
        }
        self.expr(&keyword.value, Prec::Test);
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn expr_list(&mut self, exprs: &[Expr], prec: Prec) {
        let mut first = true;
        for expr in exprs {
            self.comma(&mut first);
            self.expr(expr, prec);
        }
    }

    /// Tuple-style items: a single element keeps its trailing comma.
    fn items_view(&mut self, exprs: &[Expr]) {
        if let [only] = exprs {
            self.expr(only, Prec::Test);
            self.write(",");
        } else {
            self.expr_list(exprs, Prec::Test);
        }
    }

    fn require_parens(&mut self, own: Prec, context: Prec, f: impl FnOnce(&mut Self)) {
        let parens = context > own;
        self.open_if(parens, "(");
        f(self);
        self.open_if(parens, ")");
    }

    fn expr(&mut self, expr: &Expr, context: Prec) {
        match expr {
            Expr::BoolOp { op, values } => {
                let own = match op {
                    BoolOp::And => Prec::And,
                    BoolOp::Or => Prec::Or,
                };
                let sep = match op {
                    BoolOp::And => " and ",
                    BoolOp::Or => " or ",
                };
                self.require_parens(own, context, |u| {
                    let mut first = true;
                    for value in values {
                        if first {
                            first = false;
                        } else {
                            u.write(sep);
                        }
                        u.expr(value, own.next());
                    }
                });
            }
            Expr::NamedExpr { target, value } => {
                self.require_parens(Prec::NamedExpr, context, |u| {
                    u.expr(target, Prec::Atom);
                    u.write(" := ");
                    u.expr(value, Prec::Atom);
                });
            }
            Expr::BinOp { left, op, right } => {
                let own = Prec::of_binop(*op);
                let (left_prec, right_prec) = if *op == BinOp::Pow {
                    (own.next(), own)
                } else {
                    (own, own.next())
                };
                self.require_parens(own, context, |u| {
                    u.expr(left, left_prec);
                    u.write(" ");
                    u.write(op.as_str());
                    u.write(" ");
                    u.expr(right, right_prec);
                });
            }
            Expr::UnaryOp { op, operand } => {
                let own = match op {
                    UnaryOp::Not => Prec::Not,
                    _ => Prec::Factor,
                };
                self.require_parens(own, context, |u| {
                    u.write(op.as_str());
                    if own != Prec::Factor {
                        u.write(" ");
                    }
                    u.expr(operand, own);
                });
            }
            Expr::Lambda { params, body } => {
                self.require_parens(Prec::Test, context, |u| {
                    u.write("lambda");
                    if !params.is_empty() {
                        u.write(" ");
                        u.parameters(params);
                    }
                    u.write(": ");
                    u.expr(body, Prec::Test);
                });
            }
            Expr::IfExp { test, body, orelse } => {
                self.require_parens(Prec::Test, context, |u| {
                    u.expr(body, Prec::Test.next());
                    u.write(" if ");
                    u.expr(test, Prec::Test.next());
                    u.write(" else ");
                    u.expr(orelse, Prec::Test);
                });
            }
            Expr::Dict { keys, values } => {
                self.write("{");
                let mut first = true;
                for (key, value) in keys.iter().zip(values) {
                    self.comma(&mut first);
                    match key {
                        Some(key) => {
                            self.expr(key, Prec::Test);
                            self.write(": ");
                            self.expr(value, Prec::Test);
                        }
                        None => {
                            self.write("**");
                            self.expr(value, Prec::Expr);
                        }
                    }
                }
                self.write("}");
            }
            Expr::Set(elts) => {
                if elts.is_empty() {
                    self.write("{*()}");
                } else {
                    self.write("{");
                    self.expr_list(elts, Prec::Test);
                    self.write("}");
                }
            }
            Expr::ListComp { elt, generators } => {
                self.write("[");
                self.expr(elt, Prec::Test);
                self.generators(generators);
                self.write("]");
            }
            Expr::SetComp { elt, generators } => {
                self.write("{");
                self.expr(elt, Prec::Test);
                self.generators(generators);
                self.write("}");
            }
            Expr::DictComp { key, value, generators } => {
                self.write("{");
                self.expr(key, Prec::Test);
                self.write(": ");
                self.expr(value, Prec::Test);
                self.generators(generators);
                self.write("}");
            }
            Expr::GeneratorExp { elt, generators } => {
                self.write("(");
                self.expr(elt, Prec::Test);
                self.generators(generators);
                self.write(")");
            }
            Expr::Await(value) => {
                self.require_parens(Prec::Await, context, |u| {
                    u.write("await ");
                    u.expr(value, Prec::Atom);
                });
            }
            Expr::Yield(value) => {
                self.require_parens(Prec::Yield, context, |u| {
                    u.write("yield");
                    if let Some(value) = value {
                        u.write(" ");
                        u.expr(value, Prec::Test);
                    }
                });
            }
            Expr::YieldFrom(value) => {
                self.require_parens(Prec::Yield, context, |u| {
                    u.write("yield from ");
                    u.expr(value, Prec::Test);
                });
            }
            Expr::Compare { left, ops, comparators } => {
                self.require_parens(Prec::Cmp, context, |u| {
                    u.expr(left, Prec::Cmp.next());
                    for (op, comparator) in ops.iter().zip(comparators) {
                        u.write(" ");
                        u.write(op.as_str());
                        u.write(" ");
                        u.expr(comparator, Prec::Cmp.next());
                    }
                });
            }
            Expr::Call { func, args, keywords } => {
                self.expr(func, Prec::Atom);
                self.write("(");
                let mut first = true;
                for arg in args {
                    self.comma(&mut first);
                    self.expr(arg, Prec::Test);
                }
                for keyword in keywords {
                    self.comma(&mut first);
                    self.keyword(keyword);
                }
                self.write(")");
            }
            Expr::FString(raw) => self.write(raw),
            Expr::Constant(constant) => self.constant(constant),
            Expr::Attribute { value, attr } => {
                self.expr(value, Prec::Atom);
                // `1.real` would lex as a float.
                if matches!(**value, Expr::Constant(Constant::Int(_))) {
                    self.write(" ");
                }
                self.write(".");
                self.write(attr);
            }
            Expr::Subscript { value, slice } => {
                self.expr(value, Prec::Atom);
                self.write("[");
                match &**slice {
                    Expr::Tuple(elts) if !elts.is_empty() => self.items_view(elts),
                    other => self.expr(other, Prec::Test),
                }
                self.write("]");
            }
            Expr::Starred(value) => {
                self.write("*");
                self.expr(value, Prec::Expr);
            }
            Expr::Name(id) => self.write(id),
            Expr::List(elts) => {
                self.write("[");
                self.expr_list(elts, Prec::Test);
                self.write("]");
            }
            Expr::Tuple(elts) => {
                let parens = elts.is_empty() || context > Prec::Tuple;
                self.open_if(parens, "(");
                self.items_view(elts);
                self.open_if(parens, ")");
            }
            Expr::Slice { lower, upper, step } => {
                if let Some(lower) = lower {
                    self.expr(lower, Prec::Test);
                }
                self.write(":");
                if let Some(upper) = upper {
                    self.expr(upper, Prec::Test);
                }
                if let Some(step) = step {
                    self.write(":");
                    self.expr(step, Prec::Test);
                }
            }
        }
    }

    fn generators(&mut self, generators: &[Comprehension]) {
        for comp in generators {
            self.write(if comp.is_async { " async for " } else { " for " });
            self.expr(&comp.target, Prec::Tuple);
            self.write(" in ");
            self.expr(&comp.iter, Prec::Test.next());
            for cond in &comp.ifs {
                self.write(" if ");
                self.expr(cond, Prec::Test.next());
            }
        }
    }

    fn constant(&mut self, constant: &Constant) {
        match constant {
            Constant::None => self.write("None"),
            Constant::Bool(true) => self.write("True"),
            Constant::Bool(false) => self.write("False"),
            Constant::Str(s) => self.write(&repr_str(s)),
            Constant::Bytes(b) => self.write(&repr_bytes(b)),
            Constant::Int(text) | Constant::Float(text) | Constant::Complex(text) => self.write(text),
            Constant::Ellipsis => self.write("..."),
        }
    }
}

// =============================================================================
// Literal repr
// =============================================================================

/// Python `repr()` of a str: single quotes unless the text contains a single
/// quote and no double quote.
pub fn repr_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if !is_printable(c) => out.push_str(&escape_nonprintable(c)),
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Python `repr()` of a bytes object.
pub fn repr_bytes(bytes: &[u8]) -> String {
    let quote = if bytes.contains(&b'\'') && !bytes.contains(&b'"') { b'"' } else { b'\'' };
    let mut out = String::with_capacity(bytes.len() + 3);
    out.push('b');
    out.push(quote as char);
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b if b == quote => {
                out.push('\\');
                out.push(b as char);
            }
            0x20..=0x7e => out.push(b as char),
            b => out.push_str(&format!("\\x{:02x}", b)),
        }
    }
    out.push(quote as char);
    out
}

fn is_printable(c: char) -> bool {
    !(c.is_control() || matches!(c, '\u{2028}' | '\u{2029}' | '\u{ad}'))
}

fn escape_nonprintable(c: char) -> String {
    let code = c as u32;
    if code < 0x100 {
        format!("\\x{:02x}", code)
    } else if code < 0x10000 {
        format!("\\u{:04x}", code)
    } else {
        format!("\\U{:08x}", code)
    }
}
