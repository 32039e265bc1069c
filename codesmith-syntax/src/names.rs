//! Name binding and use analysis over statement lists

use crate::ast::*;
use crate::visit::{walk_expr, walk_pattern, walk_stmt, walk_type_params, Visitor};
use std::collections::{HashMap, HashSet};

/// Which names a run of statements reads and which it binds.
///
/// Nested function and class bodies are included, so a name read only by a
/// closure still counts as read.
#[derive(Debug, Default, Clone)]
pub struct NameUsage {
    pub loaded: HashSet<String>,
    /// Bound names in first-binding order, without duplicates
    pub stored: Vec<String>,
    /// Names declared `global` or `nonlocal`
    pub declared: HashSet<String>,
    /// Location of the statement that first binds each stored name
    pub binding_sites: HashMap<String, Location>,
    scope_only: bool,
    nested: usize,
    current: Location,
}

impl NameUsage {
    pub fn of_stmts(stmts: &[Stmt]) -> Self {
        let mut usage = NameUsage::default();
        for stmt in stmts {
            usage.visit_stmt(stmt);
        }
        usage
    }

    /// Like [`NameUsage::of_stmts`], but names bound inside nested function
    /// and class bodies or by comprehension targets are not counted as
    /// stored. Loads from nested scopes still count.
    pub fn of_scope(stmts: &[Stmt]) -> Self {
        let mut usage = NameUsage {
            scope_only: true,
            ..NameUsage::default()
        };
        for stmt in stmts {
            usage.visit_stmt(stmt);
        }
        usage
    }

    pub fn of_expr(expr: &Expr) -> Self {
        let mut usage = NameUsage::default();
        usage.visit_expr(expr);
        usage
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.contains(name)
    }

    pub fn is_stored(&self, name: &str) -> bool {
        self.stored.iter().any(|n| n == name)
    }

    pub fn binding_site(&self, name: &str) -> Option<Location> {
        self.binding_sites.get(name).copied()
    }

    fn store(&mut self, name: &str) {
        if self.scope_only && self.nested > 0 {
            return;
        }
        if !self.is_stored(name) {
            self.stored.push(name.to_string());
            self.binding_sites.insert(name.to_string(), self.current);
        }
    }

    fn in_nested_scope<F: FnOnce(&mut Self)>(&mut self, f: F) {
        self.nested += 1;
        f(self);
        self.nested -= 1;
    }

    fn store_target(&mut self, target: &Expr) {
        match target {
            Expr::Name(id) => self.store(id),
            Expr::Tuple(elts) | Expr::List(elts) => {
                for elt in elts {
                    self.store_target(elt);
                }
            }
            Expr::Starred(inner) => self.store_target(inner),
            other => self.visit_expr(other),
        }
    }
}

impl Visitor for NameUsage {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        let enclosing = std::mem::replace(&mut self.current, stmt.loc);
        self.visit_stmt_kind(stmt);
        self.current = enclosing;
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Name(id) => {
                self.loaded.insert(id.clone());
            }
            Expr::NamedExpr { target, value } => {
                self.visit_expr(value);
                self.store_target(target);
            }
            _ => walk_expr(self, expr),
        }
    }

    fn visit_comprehension(&mut self, comp: &Comprehension) {
        self.visit_expr(&comp.iter);
        self.in_nested_scope(|usage| usage.store_target(&comp.target));
        for cond in &comp.ifs {
            self.visit_expr(cond);
        }
    }

    fn visit_except_handler(&mut self, handler: &ExceptHandler) {
        if let Some(type_) = &handler.type_ {
            self.visit_expr(type_);
        }
        if let Some(name) = &handler.name {
            let enclosing = std::mem::replace(&mut self.current, handler.loc);
            self.store(name);
            self.current = enclosing;
        }
        for s in &handler.body {
            self.visit_stmt(s);
        }
    }

    fn visit_match_case(&mut self, case: &MatchCase) {
        walk_pattern(self, &case.pattern);
        let enclosing = std::mem::replace(&mut self.current, case.loc);
        for name in case.pattern.bound_names() {
            self.store(name);
        }
        self.current = enclosing;
        if let Some(guard) = &case.guard {
            self.visit_expr(guard);
        }
        for s in &case.body {
            self.visit_stmt(s);
        }
    }
}

impl NameUsage {
    fn visit_stmt_kind(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::FunctionDef { name, .. } | StmtKind::ClassDef { name, .. } => {
                self.store(name);
                self.in_nested_scope(|usage| walk_stmt(usage, stmt));
            }
            StmtKind::Assign { targets, value } => {
                self.visit_expr(value);
                for target in targets {
                    self.store_target(target);
                }
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.visit_expr(value);
                self.visit_expr(target);
                self.store_target(target);
            }
            StmtKind::AnnAssign { target, annotation, value, .. } => {
                self.visit_expr(annotation);
                if let Some(value) = value {
                    self.visit_expr(value);
                    self.store_target(target);
                } else if !matches!(target, Expr::Name(_)) {
                    self.visit_expr(target);
                }
            }
            StmtKind::For { target, iter, body, orelse, .. } => {
                self.visit_expr(iter);
                self.store_target(target);
                for s in body.iter().chain(orelse) {
                    self.visit_stmt(s);
                }
            }
            StmtKind::With { items, body, .. } => {
                for item in items {
                    self.visit_expr(&item.context_expr);
                    if let Some(vars) = &item.optional_vars {
                        self.store_target(vars);
                    }
                }
                for s in body {
                    self.visit_stmt(s);
                }
            }
            StmtKind::Import(names) | StmtKind::ImportFrom { names, .. } => {
                for alias in names {
                    if alias.name != "*" {
                        self.store(alias.bound_name());
                    }
                }
            }
            StmtKind::TypeAlias { name, type_params, value } => {
                self.store(name);
                self.in_nested_scope(|usage| {
                    walk_type_params(usage, type_params);
                    usage.visit_expr(value);
                });
            }
            StmtKind::Global(names) | StmtKind::Nonlocal(names) => {
                self.declared.extend(names.iter().cloned());
            }
            _ => walk_stmt(self, stmt),
        }
    }
}

/// Names bound by a function's parameter list, in declaration order.
pub fn parameter_names(params: &Parameters) -> Vec<String> {
    params.iter().map(|p| p.name.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_module;

    fn usage(src: &str) -> NameUsage {
        NameUsage::of_stmts(&parse_module(src).unwrap().body)
    }

    #[test]
    fn test_assignments_and_loads() {
        let u = usage("a = b + 1\nc, *d = e\nf.g = h\n");
        assert_eq!(u.stored, ["a", "c", "d"]);
        for name in ["b", "e", "f", "h"] {
            assert!(u.is_loaded(name), "{}", name);
        }
        assert!(!u.is_loaded("a"));
    }

    #[test]
    fn test_augmented_assignment_loads_and_stores() {
        let u = usage("total += x\n");
        assert!(u.is_loaded("total"));
        assert!(u.is_stored("total"));
    }

    #[test]
    fn test_imports_functions_and_handlers() {
        let u = usage(
            "import os.path\nfrom x import y as z\ndef f():\n    global g\n    return k\ntry:\n    pass\nexcept E as err:\n    pass\n",
        );
        assert!(u.is_stored("os"));
        assert!(u.is_stored("z"));
        assert!(u.is_stored("f"));
        assert!(u.is_stored("err"));
        assert!(u.is_loaded("k"));
        assert!(u.declared.contains("g"));
    }

    #[test]
    fn test_comprehension_and_walrus() {
        let u = usage("r = [y for x in xs if (y := x)]\n");
        assert!(u.is_loaded("xs"));
        assert!(u.is_stored("x"));
        assert!(u.is_stored("y"));
        assert!(u.is_loaded("y"));
    }

    #[test]
    fn test_scope_excludes_nested_bindings() {
        let src = "a = 1\ndef inner():\n    b = a\n    return b\nc = [d for d in range(3)]\n";
        let u = NameUsage::of_scope(&parse_module(src).unwrap().body);
        assert_eq!(u.stored, ["a", "inner", "c"]);
        assert!(u.is_loaded("a"));
        assert!(u.is_loaded("b"));
    }

    #[test]
    fn test_match_captures_and_type_aliases() {
        let src = "\
match event:
    case Click(position=(x, y)) if y > limit:
        handled = True
    case [first, *rest]:
        pass
    case {'key': Key.ENTER, **extra}:
        pass
type Alias[T] = list[T]
";
        let u = usage(src);
        assert_eq!(u.stored, ["x", "y", "handled", "first", "rest", "extra", "Alias"]);
        for name in ["event", "Click", "limit", "Key", "list", "T"] {
            assert!(u.is_loaded(name), "{}", name);
        }
        assert_eq!(u.binding_site("x").map(|l| l.line), Some(2));
        assert_eq!(u.binding_site("first"), Some(Location { line: 4, column: 4 }));
    }

    #[test]
    fn test_binding_sites() {
        let src = "x = 1\nfor i in y:\n    z = i\ntry:\n    pass\nexcept E as err:\n    pass\n";
        let u = usage(src);
        assert_eq!(u.binding_site("x"), Some(Location { line: 1, column: 0 }));
        assert_eq!(u.binding_site("i").map(|l| l.line), Some(2));
        assert_eq!(u.binding_site("z"), Some(Location { line: 3, column: 4 }));
        assert_eq!(u.binding_site("err").map(|l| l.line), Some(6));
        assert_eq!(u.binding_site("y"), None);
    }
}
