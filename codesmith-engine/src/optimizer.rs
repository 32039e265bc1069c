//! # Rewrite engine
//!
//! Pattern-matched micro-optimizations over the Python AST. The walk is a
//! single pre-order pass: each node is offered to the rule for its kind, and
//! the walk then descends into the children of whatever node the rule left in
//! place. There is no fixed-point iteration, so running the optimizer twice
//! can find more to do.
//!
//! None of the rules check that the rewrite preserves meaning. Replacing
//! `==` with `is` on strings, or a list with a set, can change behavior;
//! callers must treat the output as a suggestion.

use codesmith_error::Result;
use codesmith_syntax::ast::*;
use codesmith_syntax::{parse_module, unparse};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// One of the fixed rewrite rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rewrite {
    RangeLoopToComprehension,
    EqualityToIdentity,
    CombineStringLiterals,
    LenComprehensionToMap,
    MembershipListToSet,
    SimplifyIfReturn,
}

impl Rewrite {
    pub const ALL: [Rewrite; 6] = [
        Rewrite::RangeLoopToComprehension,
        Rewrite::EqualityToIdentity,
        Rewrite::CombineStringLiterals,
        Rewrite::LenComprehensionToMap,
        Rewrite::MembershipListToSet,
        Rewrite::SimplifyIfReturn,
    ];

    /// Human-readable log line for this rewrite.
    pub fn description(&self) -> &'static str {
        match self {
            Rewrite::RangeLoopToComprehension => "Replaced range() with list comprehension",
            Rewrite::EqualityToIdentity => "Replaced if x == 'string' with if x is 'string'",
            Rewrite::CombineStringLiterals => "Combined string literals",
            Rewrite::LenComprehensionToMap => "Replaced list comprehension with map(len, ...)",
            Rewrite::MembershipListToSet => "Replaced list with set for membership testing",
            Rewrite::SimplifyIfReturn => "Simplified if-return pattern",
        }
    }
}

impl fmt::Display for Rewrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Applied rewrites in the order the walk applied them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteLog {
    entries: Vec<Rewrite>,
}

impl RewriteLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, rewrite: Rewrite) {
        debug!(rewrite = ?rewrite, "applied rewrite");
        self.entries.push(rewrite);
    }

    pub fn entries(&self) -> &[Rewrite] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn descriptions(&self) -> Vec<String> {
        self.entries.iter().map(|r| r.description().to_string()).collect()
    }
}

/// Output of [`optimize`], serialized as the optimizer's JSON contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub original_code: String,
    pub optimized_code: String,
    pub optimizations: Vec<String>,
}

impl OptimizationResult {
    pub fn changed(&self) -> bool {
        !self.optimizations.is_empty()
    }
}

/// Parse, rewrite, and unparse `source`.
///
/// Fails only when `source` does not parse. When no rule matches, the input
/// text is returned untouched rather than reformatted.
pub fn optimize(source: &str) -> Result<OptimizationResult> {
    let module = parse_module(source).map_err(|e| e.with_operation("optimizer::optimize"))?;

    let mut log = RewriteLog::new();
    let module = rewrite_module(module, &mut log);

    let optimized_code = if log.is_empty() {
        source.to_string()
    } else {
        unparse(&module)
    };
    debug!(rewrites = log.len(), "optimization finished");

    Ok(OptimizationResult {
        original_code: source.to_string(),
        optimized_code,
        optimizations: log.descriptions(),
    })
}

/// Run the rewrite walk over a whole module.
pub fn rewrite_module(mut module: Module, log: &mut RewriteLog) -> Module {
    let mut rewriter = Rewriter { log };
    rewriter.rewrite_body(&mut module.body);
    module
}

struct Rewriter<'a> {
    log: &'a mut RewriteLog,
}

impl Rewriter<'_> {
    // =========================================================================
    // Walk
    // =========================================================================

    fn rewrite_body(&mut self, body: &mut [Stmt]) {
        for slot in body.iter_mut() {
            let stmt = std::mem::replace(slot, Stmt::new(StmtKind::Pass, slot.loc));
            *slot = self.rewrite_stmt(stmt);
        }
    }

    fn rewrite_slot(&mut self, slot: &mut Expr) {
        let expr = std::mem::replace(slot, Expr::Constant(Constant::None));
        *slot = self.rewrite_expr(expr);
    }

    fn rewrite_all(&mut self, exprs: &mut [Expr]) {
        for expr in exprs {
            self.rewrite_slot(expr);
        }
    }

    fn rewrite_stmt(&mut self, stmt: Stmt) -> Stmt {
        let Stmt { kind, loc } = stmt;
        let kind = match kind {
            StmtKind::For { is_async: false, target, iter, body, orelse } => {
                self.range_loop(target, iter, body, orelse)
            }
            StmtKind::If { test, body, orelse } => self.equality_test(test, body, orelse),
            StmtKind::FunctionDef { is_async: false, name, type_params, params, returns, decorators, body } => {
                let body = self.if_return(body);
                StmtKind::FunctionDef { is_async: false, name, type_params, params, returns, decorators, body }
            }
            other => other,
        };
        let mut stmt = Stmt { kind, loc };
        self.descend_stmt(&mut stmt);
        stmt
    }

    fn rewrite_expr(&mut self, expr: Expr) -> Expr {
        let mut expr = match expr {
            Expr::BinOp { left, op, right } => self.string_concat(left, op, right),
            Expr::ListComp { elt, generators } => self.len_comprehension(elt, generators),
            Expr::Compare { left, ops, comparators } => self.membership(left, ops, comparators),
            other => other,
        };
        self.descend_expr(&mut expr);
        expr
    }

    fn descend_stmt(&mut self, stmt: &mut Stmt) {
        match &mut stmt.kind {
            StmtKind::FunctionDef { params, returns, decorators, body, .. } => {
                self.rewrite_all(decorators);
                self.descend_parameters(params);
                if let Some(returns) = returns {
                    self.rewrite_slot(returns);
                }
                self.rewrite_body(body);
            }
            StmtKind::ClassDef { bases, keywords, decorators, body, .. } => {
                self.rewrite_all(decorators);
                self.rewrite_all(bases);
                for keyword in keywords {
                    self.rewrite_slot(&mut keyword.value);
                }
                self.rewrite_body(body);
            }
            StmtKind::Return(Some(value)) | StmtKind::Expr(value) => self.rewrite_slot(value),
            StmtKind::Return(None) => {}
            StmtKind::Delete(targets) => self.rewrite_all(targets),
            StmtKind::Assign { targets, value } => {
                self.rewrite_all(targets);
                self.rewrite_slot(value);
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.rewrite_slot(target);
                self.rewrite_slot(value);
            }
            StmtKind::AnnAssign { target, annotation, value, .. } => {
                self.rewrite_slot(target);
                self.rewrite_slot(annotation);
                if let Some(value) = value {
                    self.rewrite_slot(value);
                }
            }
            StmtKind::For { target, iter, body, orelse, .. } => {
                self.rewrite_slot(target);
                self.rewrite_slot(iter);
                self.rewrite_body(body);
                self.rewrite_body(orelse);
            }
            StmtKind::While { test, body, orelse } | StmtKind::If { test, body, orelse } => {
                self.rewrite_slot(test);
                self.rewrite_body(body);
                self.rewrite_body(orelse);
            }
            StmtKind::With { items, body, .. } => {
                for item in items {
                    self.rewrite_slot(&mut item.context_expr);
                    if let Some(vars) = &mut item.optional_vars {
                        self.rewrite_slot(vars);
                    }
                }
                self.rewrite_body(body);
            }
            StmtKind::Raise { exc, cause } => {
                for part in [exc, cause].into_iter().flatten() {
                    self.rewrite_slot(part);
                }
            }
            StmtKind::Try { body, handlers, orelse, finalbody, .. } => {
                self.rewrite_body(body);
                for handler in handlers {
                    if let Some(type_) = &mut handler.type_ {
                        self.rewrite_slot(type_);
                    }
                    self.rewrite_body(&mut handler.body);
                }
                self.rewrite_body(orelse);
                self.rewrite_body(finalbody);
            }
            StmtKind::Match { subject, cases } => {
                self.rewrite_slot(subject);
                for case in cases {
                    if let Some(guard) = &mut case.guard {
                        self.rewrite_slot(guard);
                    }
                    self.rewrite_body(&mut case.body);
                }
            }
            StmtKind::TypeAlias { value, .. } => self.rewrite_slot(value),
            StmtKind::Assert { test, msg } => {
                self.rewrite_slot(test);
                if let Some(msg) = msg {
                    self.rewrite_slot(msg);
                }
            }
            StmtKind::Import(_)
            | StmtKind::ImportFrom { .. }
            | StmtKind::Global(_)
            | StmtKind::Nonlocal(_)
            | StmtKind::Pass
            | StmtKind::Break
            | StmtKind::Continue => {}
        }
    }

    fn descend_parameters(&mut self, params: &mut Parameters) {
        let all = params
            .posonly
            .iter_mut()
            .chain(params.args.iter_mut())
            .chain(params.vararg.iter_mut())
            .chain(params.kwonly.iter_mut())
            .chain(params.kwarg.iter_mut());
        for param in all {
            if let Some(annotation) = &mut param.annotation {
                self.rewrite_slot(annotation);
            }
            if let Some(default) = &mut param.default {
                self.rewrite_slot(default);
            }
        }
    }

    fn descend_generators(&mut self, generators: &mut [Comprehension]) {
        for comp in generators {
            self.rewrite_slot(&mut comp.target);
            self.rewrite_slot(&mut comp.iter);
            self.rewrite_all(&mut comp.ifs);
        }
    }

    fn descend_expr(&mut self, expr: &mut Expr) {
        match expr {
            Expr::BoolOp { values, .. } => self.rewrite_all(values),
            Expr::NamedExpr { target, value } => {
                self.rewrite_slot(target);
                self.rewrite_slot(value);
            }
            Expr::BinOp { left, right, .. } => {
                self.rewrite_slot(left);
                self.rewrite_slot(right);
            }
            Expr::UnaryOp { operand, .. } => self.rewrite_slot(operand),
            Expr::Lambda { params, body } => {
                self.descend_parameters(params);
                self.rewrite_slot(body);
            }
            Expr::IfExp { test, body, orelse } => {
                self.rewrite_slot(test);
                self.rewrite_slot(body);
                self.rewrite_slot(orelse);
            }
            Expr::Dict { keys, values } => {
                for key in keys.iter_mut().flatten() {
                    self.rewrite_slot(key);
                }
                self.rewrite_all(values);
            }
            Expr::Set(elts) | Expr::List(elts) | Expr::Tuple(elts) => self.rewrite_all(elts),
            Expr::ListComp { elt, generators }
            | Expr::SetComp { elt, generators }
            | Expr::GeneratorExp { elt, generators } => {
                self.rewrite_slot(elt);
                self.descend_generators(generators);
            }
            Expr::DictComp { key, value, generators } => {
                self.rewrite_slot(key);
                self.rewrite_slot(value);
                self.descend_generators(generators);
            }
            Expr::Await(value) | Expr::YieldFrom(value) | Expr::Starred(value) => {
                self.rewrite_slot(value)
            }
            Expr::Yield(value) => {
                if let Some(value) = value {
                    self.rewrite_slot(value);
                }
            }
            Expr::Compare { left, comparators, .. } => {
                self.rewrite_slot(left);
                self.rewrite_all(comparators);
            }
            Expr::Call { func, args, keywords } => {
                self.rewrite_slot(func);
                self.rewrite_all(args);
                for keyword in keywords {
                    self.rewrite_slot(&mut keyword.value);
                }
            }
            Expr::Attribute { value, .. } => self.rewrite_slot(value),
            Expr::Subscript { value, slice } => {
                self.rewrite_slot(value);
                self.rewrite_slot(slice);
            }
            Expr::Slice { lower, upper, step } => {
                for part in [lower, upper, step].into_iter().flatten() {
                    self.rewrite_slot(part);
                }
            }
            Expr::FString(_) | Expr::Constant(_) | Expr::Name(_) => {}
        }
    }

    // =========================================================================
    // Rules
    // =========================================================================

    /// `for t in range(k): ...` becomes `[print(t) for t in range(k)]` when `k`
    /// is a single int, float or bool literal.
    fn range_loop(&mut self, target: Expr, iter: Expr, body: Vec<Stmt>, orelse: Vec<Stmt>) -> StmtKind {
        let matches = match (&target, &iter) {
            (Expr::Name(_), Expr::Call { func, args, .. }) => {
                func.as_name() == Some("range")
                    && matches!(
                        args.as_slice(),
                        [Expr::Constant(Constant::Int(_) | Constant::Float(_) | Constant::Bool(_))]
                    )
            }
            _ => false,
        };
        if !matches {
            return StmtKind::For { is_async: false, target, iter, body, orelse };
        }

        self.log.record(Rewrite::RangeLoopToComprehension);
        let elt = Expr::call(Expr::name("print"), vec![target.clone()]);
        StmtKind::Expr(Expr::ListComp {
            elt: Box::new(elt),
            generators: vec![Comprehension { target, iter, ifs: Vec::new(), is_async: false }],
        })
    }

    /// `if name == 'literal':` tests compare by identity instead.
    fn equality_test(&mut self, test: Expr, body: Vec<Stmt>, orelse: Vec<Stmt>) -> StmtKind {
        let test = match test {
            Expr::Compare { left, ops, comparators }
                if ops == [CmpOp::Eq]
                    && matches!(*left, Expr::Name(_))
                    && comparators.first().and_then(Expr::as_str_constant).is_some() =>
            {
                self.log.record(Rewrite::EqualityToIdentity);
                Expr::Compare { left, ops: vec![CmpOp::Is], comparators }
            }
            other => other,
        };
        StmtKind::If { test, body, orelse }
    }

    /// `'a' + 'b'` folds to `'ab'`.
    fn string_concat(&mut self, left: Box<Expr>, op: BinOp, right: Box<Expr>) -> Expr {
        if op == BinOp::Add {
            if let (Some(l), Some(r)) = (left.as_str_constant(), right.as_str_constant()) {
                self.log.record(Rewrite::CombineStringLiterals);
                return Expr::str(format!("{}{}", l, r));
            }
        }
        Expr::BinOp { left, op, right }
    }

    /// `[len(x) for x in xs]` becomes `map(len, xs)`.
    fn len_comprehension(&mut self, elt: Box<Expr>, mut generators: Vec<Comprehension>) -> Expr {
        if elt.is_call_to("len") && generators.len() == 1 && generators[0].ifs.is_empty() {
            if let Some(comp) = generators.pop() {
                self.log.record(Rewrite::LenComprehensionToMap);
                return Expr::call(Expr::name("map"), vec![Expr::name("len"), comp.iter]);
            }
        }
        Expr::ListComp { elt, generators }
    }

    /// `x in [a, b]` tests against `{a, b}`. Only the first comparison of a
    /// chain is considered.
    fn membership(&mut self, left: Box<Expr>, ops: Vec<CmpOp>, mut comparators: Vec<Expr>) -> Expr {
        if ops.first() == Some(&CmpOp::In) {
            if let Some(first) = comparators.first_mut() {
                if let Expr::List(elts) = first {
                    self.log.record(Rewrite::MembershipListToSet);
                    *first = Expr::Set(std::mem::take(elts));
                }
            }
        }
        Expr::Compare { left, ops, comparators }
    }

    /// In a function body, `if c: ...` directly followed by `return y`
    /// collapses to `return c`. The if-body and the following return value
    /// are dropped.
    fn if_return(&mut self, body: Vec<Stmt>) -> Vec<Stmt> {
        let mut out: Vec<Stmt> = Vec::with_capacity(body.len());
        for stmt in body {
            let collapsible = matches!(stmt.kind, StmtKind::Return(_))
                && matches!(
                    out.last(),
                    Some(Stmt { kind: StmtKind::If { orelse, .. }, .. }) if orelse.is_empty()
                );
            if !collapsible {
                out.push(stmt);
                continue;
            }
            if let Some(Stmt { kind: StmtKind::If { test, .. }, loc }) = out.pop() {
                self.log.record(Rewrite::SimplifyIfReturn);
                out.push(Stmt::new(StmtKind::Return(Some(test)), loc));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(src: &str) -> OptimizationResult {
        optimize(src).unwrap()
    }

    #[test]
    fn test_range_loop() {
        let result = run("for i in range(10):\n    print(i)");
        assert_eq!(result.optimizations, ["Replaced range() with list comprehension"]);
        assert_eq!(result.optimized_code, "[print(i) for i in range(10)]");
    }

    #[test]
    fn test_range_loop_discards_body() {
        let result = run("for i in range(3):\n    total += i\nelse:\n    done()");
        assert_eq!(result.optimized_code, "[print(i) for i in range(3)]");
    }

    #[test]
    fn test_range_loop_requires_single_numeric_literal() {
        for src in [
            "for i in range(n):\n    pass",
            "for i in range(0, 10):\n    pass",
            "for i, j in range(3):\n    pass",
            "for i in range('3'):\n    pass",
            "async def f():\n    async for i in range(3):\n        pass",
        ] {
            assert!(run(src).optimizations.is_empty(), "{}", src);
        }
        assert!(run("for i in range(2.5):\n    pass").changed());
        // bool is an int subtype
        let result = run("for i in range(True):\n    pass");
        assert_eq!(result.optimized_code, "[print(i) for i in range(True)]");
    }

    #[test]
    fn test_rules_reach_match_cases() {
        let result = run("match cmd:\n    case 'go' if flag == 'on':\n        msg = 'a' + 'b'");
        assert_eq!(result.optimizations, ["Combined string literals"]);
        assert_eq!(result.optimized_code, "match cmd:\n    case 'go' if flag == 'on':\n        msg = 'ab'");
    }

    #[test]
    fn test_equality_to_identity() {
        let result = run("if x == 'yes':\n    go()");
        assert_eq!(result.optimizations, ["Replaced if x == 'string' with if x is 'string'"]);
        assert_eq!(result.optimized_code, "if x is 'yes':\n    go()");

        assert!(!run("if x == 1:\n    go()").changed());
        assert!(!run("if x.y == 'a':\n    go()").changed());
        assert!(!run("if x == 'a' == y:\n    go()").changed());
        assert!(!run("while x == 'a':\n    go()").changed());
    }

    #[test]
    fn test_combine_string_literals() {
        let result = run("a = 'foo' + 'bar'");
        assert_eq!(result.optimizations, ["Combined string literals"]);
        assert_eq!(result.optimized_code, "a = 'foobar'");
        assert!(!run("a = 'foo' + b").changed());
        assert!(!run("a = b'x' + b'y'").changed());
    }

    #[test]
    fn test_len_comprehension() {
        let result = run("sizes = [len(w) for w in words]");
        assert_eq!(result.optimizations, ["Replaced list comprehension with map(len, ...)"]);
        assert_eq!(result.optimized_code, "sizes = map(len, words)");
        assert!(!run("sizes = [len(w) for w in words if w]").changed());
        assert!(!run("sizes = [len(w) for ws in groups for w in ws]").changed());
        assert!(!run("sizes = {len(w) for w in words}").changed());
    }

    #[test]
    fn test_membership_list_to_set() {
        let result = run("ok = x in [1, 2, 3]");
        assert_eq!(result.optimizations, ["Replaced list with set for membership testing"]);
        assert_eq!(result.optimized_code, "ok = x in {1, 2, 3}");
        assert_eq!(run("ok = x in []").optimized_code, "ok = x in {*()}");
        assert!(!run("ok = x not in [1]").changed());
        assert!(!run("ok = a < b in [1]").changed());
    }

    #[test]
    fn test_if_return() {
        let src = "def f(x):\n    if x > 0:\n        return True\n    return False";
        let result = run(src);
        assert_eq!(result.optimizations, ["Simplified if-return pattern"]);
        assert_eq!(result.optimized_code, "def f(x):\n    return x > 0");
    }

    #[test]
    fn test_if_return_skips_else_and_async() {
        assert!(!run("def f(x):\n    if x:\n        return 1\n    else:\n        pass\n    return 2").changed());
        assert!(!run("async def f(x):\n    if x:\n        return 1\n    return 2").changed());
    }

    #[test]
    fn test_if_return_after_collapse_continues() {
        let src = "def f(a, b):\n    if a:\n        return 1\n    return 2\n    if b:\n        return 3\n    return 4";
        let result = run(src);
        assert_eq!(result.optimizations.len(), 2);
        assert_eq!(result.optimized_code, "def f(a, b):\n    return a\n    return b");
    }

    #[test]
    fn test_rules_apply_inside_rewritten_nodes() {
        // The function rule fires first, then the walk descends into the new body.
        let src = "def f(x):\n    y = 'a' + 'b'\n    if x == 'on':\n        return 1\n    return 0";
        let result = run(src);
        assert_eq!(
            result.optimizations,
            ["Simplified if-return pattern", "Combined string literals"]
        );
        assert_eq!(result.optimized_code, "def f(x):\n    y = 'ab'\n    return x == 'on'");
    }

    #[test]
    fn test_log_follows_document_order() {
        let src = "a = 'x' + 'y'\nfor i in range(2):\n    pass\nb = k in [1]";
        let result = run(src);
        assert_eq!(
            result.optimizations,
            [
                "Combined string literals",
                "Replaced range() with list comprehension",
                "Replaced list with set for membership testing",
            ]
        );
    }

    #[test]
    fn test_no_match_returns_input_verbatim() {
        let src = "result = '' \nfor item in items:\n    result += str(item)";
        let result = run(src);
        assert!(result.optimizations.is_empty());
        assert_eq!(result.optimized_code, src);
    }

    #[test]
    fn test_parse_error() {
        let err = optimize("def broken(:\n").unwrap_err();
        assert_eq!(err.kind(), codesmith_error::ErrorKind::ParseFailed);
    }

    #[test]
    fn test_rewrite_log_and_descriptions() {
        let mut log = RewriteLog::new();
        assert!(log.is_empty());
        for rewrite in Rewrite::ALL {
            log.record(rewrite);
        }
        assert_eq!(log.len(), 6);
        assert_eq!(log.descriptions()[5], "Simplified if-return pattern");
        assert_eq!(Rewrite::CombineStringLiterals.to_string(), "Combined string literals");
    }

    #[test]
    fn test_result_serializes_to_contract() {
        let json = serde_json::to_value(run("")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"original_code": "", "optimized_code": "", "optimizations": []})
        );
    }
}
