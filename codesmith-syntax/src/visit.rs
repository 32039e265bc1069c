//! Read-only AST visitor
//!
//! Implement [`Visitor`] overriding only the methods you need, and call the
//! matching `walk_*` function from an override to keep recursing. Omitting
//! the walk call prunes traversal at that node.

use crate::ast::*;

pub trait Visitor: Sized {
    fn visit_module(&mut self, module: &Module) {
        walk_module(self, module);
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }

    fn visit_parameters(&mut self, params: &Parameters) {
        walk_parameters(self, params);
    }

    fn visit_comprehension(&mut self, comp: &Comprehension) {
        walk_comprehension(self, comp);
    }

    fn visit_except_handler(&mut self, handler: &ExceptHandler) {
        walk_except_handler(self, handler);
    }

    fn visit_match_case(&mut self, case: &MatchCase) {
        walk_match_case(self, case);
    }

    fn visit_pattern(&mut self, pattern: &Pattern) {
        walk_pattern(self, pattern);
    }
}

pub fn walk_module<V: Visitor>(v: &mut V, module: &Module) {
    walk_body(v, &module.body);
}

pub fn walk_body<V: Visitor>(v: &mut V, body: &[Stmt]) {
    for stmt in body {
        v.visit_stmt(stmt);
    }
}

pub fn walk_stmt<V: Visitor>(v: &mut V, stmt: &Stmt) {
    match &stmt.kind {
        StmtKind::FunctionDef { type_params, params, returns, decorators, body, .. } => {
            for decorator in decorators {
                v.visit_expr(decorator);
            }
            walk_type_params(v, type_params);
            v.visit_parameters(params);
            if let Some(returns) = returns {
                v.visit_expr(returns);
            }
            walk_body(v, body);
        }
        StmtKind::ClassDef { type_params, bases, keywords, decorators, body, .. } => {
            for decorator in decorators {
                v.visit_expr(decorator);
            }
            walk_type_params(v, type_params);
            for base in bases {
                v.visit_expr(base);
            }
            for keyword in keywords {
                v.visit_expr(&keyword.value);
            }
            walk_body(v, body);
        }
        StmtKind::Return(value) => {
            if let Some(value) = value {
                v.visit_expr(value);
            }
        }
        StmtKind::Delete(targets) => {
            for target in targets {
                v.visit_expr(target);
            }
        }
        StmtKind::Assign { targets, value } => {
            for target in targets {
                v.visit_expr(target);
            }
            v.visit_expr(value);
        }
        StmtKind::AugAssign { target, value, .. } => {
            v.visit_expr(target);
            v.visit_expr(value);
        }
        StmtKind::AnnAssign { target, annotation, value, .. } => {
            v.visit_expr(target);
            v.visit_expr(annotation);
            if let Some(value) = value {
                v.visit_expr(value);
            }
        }
        StmtKind::For { target, iter, body, orelse, .. } => {
            v.visit_expr(target);
            v.visit_expr(iter);
            walk_body(v, body);
            walk_body(v, orelse);
        }
        StmtKind::While { test, body, orelse } | StmtKind::If { test, body, orelse } => {
            v.visit_expr(test);
            walk_body(v, body);
            walk_body(v, orelse);
        }
        StmtKind::With { items, body, .. } => {
            for item in items {
                v.visit_expr(&item.context_expr);
                if let Some(vars) = &item.optional_vars {
                    v.visit_expr(vars);
                }
            }
            walk_body(v, body);
        }
        StmtKind::Raise { exc, cause } => {
            if let Some(exc) = exc {
                v.visit_expr(exc);
            }
            if let Some(cause) = cause {
                v.visit_expr(cause);
            }
        }
        StmtKind::Try { body, handlers, orelse, finalbody, .. } => {
            walk_body(v, body);
            for handler in handlers {
                v.visit_except_handler(handler);
            }
            walk_body(v, orelse);
            walk_body(v, finalbody);
        }
        StmtKind::Match { subject, cases } => {
            v.visit_expr(subject);
            for case in cases {
                v.visit_match_case(case);
            }
        }
        StmtKind::TypeAlias { type_params, value, .. } => {
            walk_type_params(v, type_params);
            v.visit_expr(value);
        }
        StmtKind::Assert { test, msg } => {
            v.visit_expr(test);
            if let Some(msg) = msg {
                v.visit_expr(msg);
            }
        }
        StmtKind::Expr(value) => v.visit_expr(value),
        StmtKind::Import(_)
        | StmtKind::ImportFrom { .. }
        | StmtKind::Global(_)
        | StmtKind::Nonlocal(_)
        | StmtKind::Pass
        | StmtKind::Break
        | StmtKind::Continue => {}
    }
}

pub fn walk_expr<V: Visitor>(v: &mut V, expr: &Expr) {
    match expr {
        Expr::BoolOp { values, .. } => {
            for value in values {
                v.visit_expr(value);
            }
        }
        Expr::NamedExpr { target, value } => {
            v.visit_expr(target);
            v.visit_expr(value);
        }
        Expr::BinOp { left, right, .. } => {
            v.visit_expr(left);
            v.visit_expr(right);
        }
        Expr::UnaryOp { operand, .. } => v.visit_expr(operand),
        Expr::Lambda { params, body } => {
            v.visit_parameters(params);
            v.visit_expr(body);
        }
        Expr::IfExp { test, body, orelse } => {
            v.visit_expr(test);
            v.visit_expr(body);
            v.visit_expr(orelse);
        }
        Expr::Dict { keys, values } => {
            for (key, value) in keys.iter().zip(values) {
                if let Some(key) = key {
                    v.visit_expr(key);
                }
                v.visit_expr(value);
            }
        }
        Expr::Set(elts) | Expr::List(elts) | Expr::Tuple(elts) => {
            for elt in elts {
                v.visit_expr(elt);
            }
        }
        Expr::ListComp { elt, generators }
        | Expr::SetComp { elt, generators }
        | Expr::GeneratorExp { elt, generators } => {
            for comp in generators {
                v.visit_comprehension(comp);
            }
            v.visit_expr(elt);
        }
        Expr::DictComp { key, value, generators } => {
            for comp in generators {
                v.visit_comprehension(comp);
            }
            v.visit_expr(key);
            v.visit_expr(value);
        }
        Expr::Await(value) | Expr::YieldFrom(value) | Expr::Starred(value) => v.visit_expr(value),
        Expr::Yield(value) => {
            if let Some(value) = value {
                v.visit_expr(value);
            }
        }
        Expr::Compare { left, comparators, .. } => {
            v.visit_expr(left);
            for comparator in comparators {
                v.visit_expr(comparator);
            }
        }
        Expr::Call { func, args, keywords } => {
            v.visit_expr(func);
            for arg in args {
                v.visit_expr(arg);
            }
            for keyword in keywords {
                v.visit_expr(&keyword.value);
            }
        }
        Expr::Attribute { value, .. } => v.visit_expr(value),
        Expr::Subscript { value, slice } => {
            v.visit_expr(value);
            v.visit_expr(slice);
        }
        Expr::Slice { lower, upper, step } => {
            for part in [lower, upper, step].into_iter().flatten() {
                v.visit_expr(part);
            }
        }
        Expr::FString(_) | Expr::Constant(_) | Expr::Name(_) => {}
    }
}

pub fn walk_parameters<V: Visitor>(v: &mut V, params: &Parameters) {
    for param in params.iter() {
        if let Some(annotation) = &param.annotation {
            v.visit_expr(annotation);
        }
        if let Some(default) = &param.default {
            v.visit_expr(default);
        }
    }
}

pub fn walk_comprehension<V: Visitor>(v: &mut V, comp: &Comprehension) {
    v.visit_expr(&comp.iter);
    v.visit_expr(&comp.target);
    for cond in &comp.ifs {
        v.visit_expr(cond);
    }
}

pub fn walk_except_handler<V: Visitor>(v: &mut V, handler: &ExceptHandler) {
    if let Some(type_) = &handler.type_ {
        v.visit_expr(type_);
    }
    walk_body(v, &handler.body);
}

pub fn walk_type_params<V: Visitor>(v: &mut V, params: &[TypeParam]) {
    for param in params {
        match param {
            TypeParam::TypeVar { bound, default, .. } => {
                for part in [bound, default].into_iter().flatten() {
                    v.visit_expr(part);
                }
            }
            TypeParam::ParamSpec { default, .. } | TypeParam::TypeVarTuple { default, .. } => {
                if let Some(default) = default {
                    v.visit_expr(default);
                }
            }
        }
    }
}

pub fn walk_match_case<V: Visitor>(v: &mut V, case: &MatchCase) {
    v.visit_pattern(&case.pattern);
    if let Some(guard) = &case.guard {
        v.visit_expr(guard);
    }
    walk_body(v, &case.body);
}

/// Visits the expressions a pattern evaluates: values, mapping keys and
/// class names. Capture names are not expressions.
pub fn walk_pattern<V: Visitor>(v: &mut V, pattern: &Pattern) {
    match pattern {
        Pattern::Value(value) => v.visit_expr(value),
        Pattern::Singleton(_) | Pattern::Star(_) => {}
        Pattern::Sequence(items) | Pattern::Or(items) => {
            for item in items {
                v.visit_pattern(item);
            }
        }
        Pattern::Mapping { keys, patterns, .. } => {
            for (key, pattern) in keys.iter().zip(patterns) {
                v.visit_expr(key);
                v.visit_pattern(pattern);
            }
        }
        Pattern::Class { cls, patterns, kwd_patterns, .. } => {
            v.visit_expr(cls);
            for pattern in patterns.iter().chain(kwd_patterns) {
                v.visit_pattern(pattern);
            }
        }
        Pattern::As { pattern, .. } => {
            if let Some(pattern) = pattern {
                v.visit_pattern(pattern);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_module;

    #[derive(Default)]
    struct NameCollector {
        names: Vec<String>,
    }

    impl Visitor for NameCollector {
        fn visit_expr(&mut self, expr: &Expr) {
            if let Expr::Name(id) = expr {
                self.names.push(id.clone());
            }
            walk_expr(self, expr);
        }
    }

    #[test]
    fn test_collects_names_in_order() {
        let module = parse_module("def f(a=b):\n    return c + d[e]\n").unwrap();
        let mut collector = NameCollector::default();
        collector.visit_module(&module);
        assert_eq!(collector.names, ["b", "c", "d", "e"]);
    }

    #[test]
    fn test_walks_match_and_type_params() {
        let src = "\
def f[T: Bound](x):
    match x:
        case Point(x=Origin.X) if guard:
            return body
type A[U = Default] = Value
";
        let module = parse_module(src).unwrap();
        let mut collector = NameCollector::default();
        collector.visit_module(&module);
        assert_eq!(collector.names, ["Bound", "x", "Point", "Origin", "guard", "body", "Default", "Value"]);
    }

    #[test]
    fn test_pruning() {
        struct TopLevelOnly(usize);
        impl Visitor for TopLevelOnly {
            fn visit_stmt(&mut self, _stmt: &Stmt) {
                self.0 += 1;
            }
        }
        let module = parse_module("if x:\n    y = 1\n    z = 2\nw = 3\n").unwrap();
        let mut counter = TopLevelOnly(0);
        counter.visit_module(&module);
        assert_eq!(counter.0, 2);
    }
}
