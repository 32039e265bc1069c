//! # Static analysis
//!
//! Lint-style checks over Python source. Two backends sit behind the
//! [`Analyzer`] trait: a built-in checker over the crate's own AST and a
//! wrapper around an installed `pylint`. Both report only the error and
//! warning categories; convention and refactor messages are never produced.
//!
//! Output is normalized by [`analyze`]: a source that does not parse
//! yields a single `error` issue whose message starts with `Syntax Error: `,
//! and a clean source yields a single `info` issue, "No issues found".

use codesmith_error::{Error, ErrorKind, Result};
use codesmith_syntax::ast::*;
use codesmith_syntax::names::NameUsage;
use codesmith_syntax::visit::{walk_body, walk_except_handler, walk_stmt, Visitor};
use codesmith_syntax::{parse_module, unparse_expr};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use tracing::{debug, warn};

pub const NO_ISSUES: &str = "No issues found";
pub const SYNTAX_ERROR_PREFIX: &str = "Syntax Error: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueKind {
    Error,
    Warning,
    Info,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IssueKind::Error => "error",
            IssueKind::Warning => "warning",
            IssueKind::Info => "info",
        })
    }
}

/// One reported problem. Positions are strings in the output contract:
/// 1-based line, 0-based column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(rename = "type")]
    pub kind: IssueKind,
    pub line: String,
    pub column: String,
    pub message: String,
}

impl Issue {
    pub fn new(kind: IssueKind, line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            kind,
            line: line.to_string(),
            column: column.to_string(),
            message: message.into(),
        }
    }

    pub fn at(kind: IssueKind, loc: Location, message: impl Into<String>) -> Self {
        Self::new(kind, loc.line, loc.column, message)
    }

    pub fn no_issues() -> Self {
        Self::new(IssueKind::Info, 1, 1, NO_ISSUES)
    }

    pub fn syntax_error(line: usize, column: usize, message: impl fmt::Display) -> Self {
        Self::new(IssueKind::Error, line, column, format!("{}{}", SYNTAX_ERROR_PREFIX, message))
    }

    pub fn is_info(&self) -> bool {
        self.kind == IssueKind::Info
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at line {}, column {}: {}", self.kind, self.line, self.column, self.message)
    }
}

/// A lint backend.
///
/// `check` returns the raw issues, possibly none. An `Err` means the backend
/// itself could not run, not that the code has problems.
#[allow(async_fn_in_trait)]
pub trait Analyzer {
    fn name(&self) -> &str;

    async fn check(&self, code: &str) -> Result<Vec<Issue>>;
}

/// Run `analyzer` and apply the empty-result normalization.
pub async fn analyze<A: Analyzer>(analyzer: &A, code: &str) -> Result<Vec<Issue>> {
    let mut issues = analyzer.check(code).await?;
    debug!(analyzer = analyzer.name(), issues = issues.len(), "analysis finished");
    if issues.is_empty() {
        issues.push(Issue::no_issues());
    }
    Ok(issues)
}

// =============================================================================
// Built-in checker
// =============================================================================

/// Checks implemented over the crate's own AST.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinAnalyzer;

impl BuiltinAnalyzer {
    pub fn check_source(&self, code: &str) -> Vec<Issue> {
        let module = match parse_module(code) {
            Ok(module) => module,
            Err(e) => {
                let line = position(&e, "line");
                let column = position(&e, "column");
                return vec![Issue::syntax_error(line, column, e.message())];
            }
        };

        let mut checker = Checker::default();
        checker.check_module(&module);
        let mut issues = checker.issues;
        issues.sort_by_key(|(loc, _)| (loc.line, loc.column));
        issues.into_iter().map(|(_, issue)| issue).collect()
    }
}

fn position(e: &Error, key: &str) -> usize {
    e.context_value(key).and_then(|v| v.parse().ok()).unwrap_or(1)
}

impl Analyzer for BuiltinAnalyzer {
    fn name(&self) -> &str {
        "builtin"
    }

    async fn check(&self, code: &str) -> Result<Vec<Issue>> {
        Ok(self.check_source(code))
    }
}

#[derive(Default)]
struct Checker {
    issues: Vec<(Location, Issue)>,
    function_depth: usize,
    loop_depth: usize,
}

impl Checker {
    fn report(&mut self, kind: IssueKind, loc: Location, message: impl Into<String>) {
        self.issues.push((loc, Issue::at(kind, loc, message)));
    }

    fn warn(&mut self, loc: Location, message: impl Into<String>) {
        self.report(IssueKind::Warning, loc, message);
    }

    fn error(&mut self, loc: Location, message: impl Into<String>) {
        self.report(IssueKind::Error, loc, message);
    }

    fn check_module(&mut self, module: &Module) {
        let usage = NameUsage::of_stmts(&module.body);
        self.check_unused_imports(&module.body, &usage);
        self.check_body(&module.body);
        walk_body(self, &module.body);
    }

    /// Checks that look at a statement list as a whole.
    fn check_body(&mut self, body: &[Stmt]) {
        // W0107
        if body.len() > 1 {
            for stmt in body.iter().filter(|s| matches!(s.kind, StmtKind::Pass)) {
                self.warn(stmt.loc, "Unnecessary pass statement");
            }
        }

        // W0101: only the first statement after the jump is reported
        if let Some(i) = body.iter().position(|s| {
            matches!(
                s.kind,
                StmtKind::Return(_) | StmtKind::Raise { .. } | StmtKind::Break | StmtKind::Continue
            )
        }) {
            if let Some(next) = body.get(i + 1) {
                self.warn(next.loc, "Unreachable code");
            }
        }

        // E0102
        let mut defined: Vec<(&str, usize)> = Vec::new();
        for stmt in body {
            let (name, what, decorated) = match &stmt.kind {
                StmtKind::FunctionDef { name, decorators, .. } => (name, "function", !decorators.is_empty()),
                StmtKind::ClassDef { name, decorators, .. } => (name, "class", !decorators.is_empty()),
                _ => continue,
            };
            match defined.iter().find(|(n, _)| *n == name.as_str()) {
                Some((_, line)) if !decorated => {
                    let message = format!("{} already defined line {}", what, line);
                    self.error(stmt.loc, message);
                }
                Some(_) => {}
                None => defined.push((name.as_str(), stmt.loc.line)),
            }
        }
    }

    /// W0611 for the imports bound directly in one scope.
    fn check_unused_imports(&mut self, body: &[Stmt], usage: &NameUsage) {
        for stmt in scope_statements(body) {
            let (names, module) = match &stmt.kind {
                StmtKind::Import(names) => (names, None),
                StmtKind::ImportFrom { module, names, .. } => {
                    if module.as_deref() == Some("__future__") {
                        continue;
                    }
                    (names, Some(module.as_deref().unwrap_or(".")))
                }
                _ => continue,
            };
            for alias in names.iter().filter(|a| a.name != "*") {
                if usage.is_loaded(alias.bound_name()) || usage.declared.contains(alias.bound_name()) {
                    continue;
                }
                let message = match (module, &alias.asname) {
                    (None, None) => format!("Unused import {}", alias.name),
                    (None, Some(asname)) => format!("Unused {} imported as {}", alias.name, asname),
                    (Some(module), None) => format!("Unused {} imported from {}", alias.name, module),
                    (Some(module), Some(asname)) => {
                        format!("Unused {} imported from {} as {}", alias.name, module, asname)
                    }
                };
                self.warn(stmt.loc, message);
            }
        }
    }

    /// W0612 and W0611 for a function body.
    fn check_function_scope(&mut self, body: &[Stmt]) {
        let usage = NameUsage::of_scope(body);
        self.check_unused_imports(body, &usage);

        let imported: Vec<&str> = scope_statements(body)
            .into_iter()
            .flat_map(|stmt| match &stmt.kind {
                StmtKind::Import(names) | StmtKind::ImportFrom { names, .. } => names.as_slice(),
                _ => &[][..],
            })
            .map(Alias::bound_name)
            .collect();

        for name in &usage.stored {
            if usage.is_loaded(name)
                || usage.declared.contains(name)
                || name.starts_with('_')
                || imported.contains(&name.as_str())
            {
                continue;
            }
            if let Some(loc) = usage.binding_site(name) {
                self.warn(loc, format!("Unused variable '{}'", name));
            }
        }
    }

    /// W0102
    fn check_defaults(&mut self, params: &Parameters, loc: Location) {
        for default in params.iter().filter_map(|p| p.default.as_ref()) {
            let dangerous = match default {
                Expr::List(_) | Expr::Dict { .. } | Expr::Set(_) => true,
                Expr::ListComp { .. } | Expr::DictComp { .. } | Expr::SetComp { .. } => true,
                Expr::Call { func, args, keywords } => {
                    args.is_empty()
                        && keywords.is_empty()
                        && matches!(func.as_name(), Some("list" | "dict" | "set"))
                }
                _ => false,
            };
            if dangerous {
                let message = format!("Dangerous default value {} as argument", unparse_expr(default));
                self.warn(loc, message);
            }
        }
    }

    /// Checks on a single statement regardless of the body it sits in.
    fn check_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Return(_) if self.function_depth == 0 => {
                self.error(stmt.loc, "Return outside function");
            }
            StmtKind::Break if self.loop_depth == 0 => {
                self.error(stmt.loc, "'break' not properly in loop");
            }
            StmtKind::Continue if self.loop_depth == 0 => {
                self.error(stmt.loc, "'continue' not properly in loop");
            }
            StmtKind::Expr(value) => self.check_expression_statement(value, stmt.loc),
            _ => {}
        }
    }

    /// W0104 and W0106
    fn check_expression_statement(&mut self, value: &Expr, loc: Location) {
        match value {
            Expr::Call { .. }
            | Expr::Await(_)
            | Expr::Yield(_)
            | Expr::YieldFrom(_)
            | Expr::NamedExpr { .. }
            | Expr::FString(_)
            | Expr::Constant(Constant::Str(_) | Constant::Ellipsis) => {}
            Expr::BoolOp { .. }
            | Expr::IfExp { .. }
            | Expr::ListComp { .. }
            | Expr::SetComp { .. }
            | Expr::DictComp { .. }
            | Expr::GeneratorExp { .. } => {
                let message = format!("Expression \"{}\" is assigned to nothing", unparse_expr(value));
                self.warn(loc, message);
            }
            _ => self.warn(loc, "Statement seems to have no effect"),
        }
    }

    fn with_scope<F: FnOnce(&mut Self)>(&mut self, function_depth: usize, f: F) {
        let saved = (self.function_depth, self.loop_depth);
        self.function_depth = function_depth;
        self.loop_depth = 0;
        f(self);
        (self.function_depth, self.loop_depth) = saved;
    }
}

impl Visitor for Checker {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        self.check_stmt(stmt);
        match &stmt.kind {
            StmtKind::FunctionDef { params, body, .. } => {
                self.check_defaults(params, stmt.loc);
                self.check_function_scope(body);
                self.check_body(body);
                let depth = self.function_depth + 1;
                self.with_scope(depth, |checker| walk_stmt(checker, stmt));
            }
            StmtKind::ClassDef { body, .. } => {
                self.check_body(body);
                self.with_scope(0, |checker| walk_stmt(checker, stmt));
            }
            StmtKind::For { target, iter, body, orelse, .. } => {
                self.check_body(body);
                self.check_body(orelse);
                self.visit_expr(target);
                self.visit_expr(iter);
                self.loop_depth += 1;
                walk_body(self, body);
                self.loop_depth -= 1;
                walk_body(self, orelse);
            }
            StmtKind::While { test, body, orelse } => {
                self.check_body(body);
                self.check_body(orelse);
                self.visit_expr(test);
                self.loop_depth += 1;
                walk_body(self, body);
                self.loop_depth -= 1;
                walk_body(self, orelse);
            }
            StmtKind::If { body, orelse, .. } => {
                self.check_body(body);
                self.check_body(orelse);
                walk_stmt(self, stmt);
            }
            StmtKind::With { body, .. } => {
                self.check_body(body);
                walk_stmt(self, stmt);
            }
            StmtKind::Try { body, orelse, finalbody, .. } => {
                self.check_body(body);
                self.check_body(orelse);
                self.check_body(finalbody);
                walk_stmt(self, stmt);
            }
            StmtKind::Match { cases, .. } => {
                for case in cases {
                    self.check_body(&case.body);
                }
                walk_stmt(self, stmt);
            }
            _ => walk_stmt(self, stmt),
        }
    }

    fn visit_except_handler(&mut self, handler: &ExceptHandler) {
        if handler.type_.is_none() {
            self.warn(handler.loc, "No exception type(s) specified");
        }
        self.check_body(&handler.body);
        walk_except_handler(self, handler);
    }
}

/// Statements of one scope, descending into compound statements but not
/// into nested function or class bodies.
fn scope_statements(body: &[Stmt]) -> Vec<&Stmt> {
    let mut out = Vec::new();
    let mut stack: Vec<&[Stmt]> = vec![body];
    while let Some(stmts) = stack.pop() {
        for stmt in stmts {
            out.push(stmt);
            match &stmt.kind {
                StmtKind::For { body, orelse, .. }
                | StmtKind::While { body, orelse, .. }
                | StmtKind::If { body, orelse, .. } => {
                    stack.push(body);
                    stack.push(orelse);
                }
                StmtKind::With { body, .. } => stack.push(body),
                StmtKind::Try { body, handlers, orelse, finalbody, .. } => {
                    stack.push(body);
                    for handler in handlers {
                        stack.push(&handler.body);
                    }
                    stack.push(orelse);
                    stack.push(finalbody);
                }
                StmtKind::Match { cases, .. } => {
                    for case in cases {
                        stack.push(&case.body);
                    }
                }
                _ => {}
            }
        }
    }
    out
}

// =============================================================================
// pylint backend
// =============================================================================

/// Runs an installed `pylint` over a temporary copy of the code.
#[derive(Debug, Clone)]
pub struct PylintAnalyzer {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for PylintAnalyzer {
    fn default() -> Self {
        Self {
            program: "pylint".to_string(),
            args: vec!["--disable=C0111".to_string(), "--max-line-length=100".to_string()],
        }
    }
}

/// One entry of `pylint --output-format=json`.
#[derive(Debug, Deserialize)]
struct PylintMessage {
    #[serde(rename = "type")]
    category: String,
    line: Option<usize>,
    column: Option<usize>,
    symbol: String,
    message: String,
    #[serde(rename = "message-id")]
    message_id: String,
}

impl PylintAnalyzer {
    pub fn with_args(args: Vec<String>) -> Self {
        Self { args, ..Self::default() }
    }

    fn convert(messages: Vec<PylintMessage>) -> Vec<Issue> {
        messages
            .into_iter()
            .filter_map(|msg| {
                let line = msg.line.unwrap_or(1);
                let column = msg.column.unwrap_or(0);
                if msg.symbol == "syntax-error" || msg.message_id == "E0001" {
                    return Some(Issue::syntax_error(line, column, msg.message));
                }
                let kind = match msg.category.as_str() {
                    "error" => IssueKind::Error,
                    "warning" => IssueKind::Warning,
                    _ => return None,
                };
                let message = if msg.message.is_empty() { msg.symbol } else { msg.message };
                Some(Issue::new(kind, line, column, message))
            })
            .collect()
    }
}

impl Analyzer for PylintAnalyzer {
    fn name(&self) -> &str {
        "pylint"
    }

    async fn check(&self, code: &str) -> Result<Vec<Issue>> {
        // Removed on drop, on every exit path
        let mut file = tempfile::Builder::new()
            .prefix("codesmith-")
            .suffix(".py")
            .tempfile()?;
        file.write_all(code.as_bytes())?;
        file.flush()?;

        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg("--output-format=json")
            .arg(file.path())
            .output()
            .await
            .map_err(|e| {
                let message = if e.kind() == std::io::ErrorKind::NotFound {
                    format!("{} executable not found", self.program)
                } else {
                    format!("failed to run {}: {}", self.program, e)
                };
                Error::analyzer_failed(message)
                    .with_operation("analyzer::pylint")
                    .set_source(e)
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            // pylint exits with bit 1 (fatal) or 32 (usage error) set when it could not lint
            let fatal = output.status.code().map_or(true, |code| code & (1 | 32) != 0);
            if fatal {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(status = ?output.status, "pylint produced no report");
                return Err(Error::analyzer_failed(stderr.trim().to_string())
                    .with_operation("analyzer::pylint"));
            }
            return Ok(Vec::new());
        }

        let messages: Vec<PylintMessage> = serde_json::from_str(&stdout).map_err(|e| {
            Error::new(ErrorKind::AnalyzerFailed, format!("unreadable pylint report: {}", e))
                .with_operation("analyzer::pylint")
                .set_source(e)
        })?;
        Ok(Self::convert(messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(src: &str) -> Vec<Issue> {
        BuiltinAnalyzer.check_source(src)
    }

    fn messages(src: &str) -> Vec<String> {
        check(src).into_iter().map(|i| i.message).collect()
    }

    #[tokio::test]
    async fn test_clean_code_reports_info() {
        let issues = analyze(&BuiltinAnalyzer, "def test(): pass").await.unwrap();
        assert_eq!(issues, [Issue::new(IssueKind::Info, 1, 1, "No issues found")]);
    }

    #[tokio::test]
    async fn test_syntax_error_is_single_issue() {
        let issues = analyze(&BuiltinAnalyzer, "def broken(:\n    pass").await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::Error);
        assert!(issues[0].message.starts_with("Syntax Error: "));
        assert_eq!(issues[0].line, "1");
    }

    #[test]
    fn test_unused_imports() {
        let src = "import os\nimport sys as system\nfrom typing import List, Dict\nfrom __future__ import annotations\nprint(Dict)";
        assert_eq!(
            messages(src),
            [
                "Unused import os",
                "Unused sys imported as system",
                "Unused List imported from typing",
            ]
        );
        assert!(messages("import os\ndef f():\n    return os.sep").is_empty());
    }

    #[test]
    fn test_unused_variables() {
        let src = "def f(a):\n    b = 1\n    _c = 2\n    for i in range(a):\n        pass\n    return a";
        let issues = check(src);
        let unused: Vec<_> = issues.iter().filter(|i| i.message.starts_with("Unused variable")).collect();
        assert_eq!(unused.len(), 2);
        assert_eq!(unused[0].message, "Unused variable 'b'");
        assert_eq!((unused[0].line.as_str(), unused[0].column.as_str()), ("2", "4"));
        assert_eq!(unused[1].message, "Unused variable 'i'");

        // Read by a closure, declared global, or only bound at module level
        assert!(messages("def f():\n    x = 1\n    def g():\n        return x\n    return g").is_empty());
        assert!(messages("def f():\n    global y\n    y = 1").is_empty());
        assert!(messages("z = 1").is_empty());
    }

    #[test]
    fn test_function_level_import() {
        assert_eq!(messages("def f():\n    import json\n    return 1"), ["Unused import json"]);
    }

    #[test]
    fn test_unnecessary_pass() {
        let issues = check("def f():\n    x = 1\n    pass\n    return x");
        assert_eq!(issues, [Issue::new(IssueKind::Warning, 3, 4, "Unnecessary pass statement")]);
        assert!(check("class C:\n    pass").is_empty());
    }

    #[test]
    fn test_pointless_statements() {
        assert_eq!(
            messages("x = 1\nx\nx == 2\n'docstring-like'\n...\nprint(x)"),
            ["Statement seems to have no effect", "Statement seems to have no effect"]
        );
        assert_eq!(
            messages("[print(i) for i in range(3)]"),
            ["Expression \"[print(i) for i in range(3)]\" is assigned to nothing"]
        );
    }

    #[test]
    fn test_dangerous_default() {
        assert_eq!(
            messages("def f(a=[], b={}, c=list(), d=None):\n    return a, b, c, d"),
            [
                "Dangerous default value [] as argument",
                "Dangerous default value {} as argument",
                "Dangerous default value list() as argument",
            ]
        );
    }

    #[test]
    fn test_bare_except() {
        let src = "try:\n    risky()\nexcept:\n    handle()";
        assert_eq!(check(src), [Issue::new(IssueKind::Warning, 3, 0, "No exception type(s) specified")]);
        assert!(check("try:\n    risky()\nexcept ValueError:\n    handle()").is_empty());
    }

    #[test]
    fn test_unreachable() {
        let issues = check("def f():\n    return 1\n    print(2)\n    print(3)");
        assert_eq!(issues, [Issue::new(IssueKind::Warning, 3, 4, "Unreachable code")]);

        let src = "def f(cmd):\n    match cmd:\n        case 1:\n            return 1\n            print(2)\n        case _:\n            pass\n    return 0";
        assert_eq!(check(src), [Issue::new(IssueKind::Warning, 5, 12, "Unreachable code")]);
    }

    #[test]
    fn test_misplaced_return_and_loop_control() {
        assert_eq!(messages("return 1"), ["Return outside function"]);
        assert_eq!(messages("break"), ["'break' not properly in loop"]);
        // The else clause of a loop is outside it
        let issues = check("for x in y:\n    continue\nelse:\n    continue");
        assert_eq!(issues, [Issue::new(IssueKind::Error, 4, 4, "'continue' not properly in loop")]);
        // A function body resets the loop context
        assert_eq!(
            messages("while True:\n    def f():\n        break\n    f()"),
            ["'break' not properly in loop"]
        );
        assert_eq!(messages("def f():\n    class C:\n        return 1\n    return C"), ["Return outside function"]);
    }

    #[test]
    fn test_redefined() {
        let issues = check("def f():\n    return 1\n\ndef f():\n    return 2\n\nclass C:\n    pass\nclass C:\n    pass");
        let errors: Vec<_> = issues.iter().map(|i| (i.line.as_str(), i.message.as_str())).collect();
        assert_eq!(
            errors,
            [("4", "function already defined line 1"), ("9", "class already defined line 7")]
        );
        assert!(check("@property\ndef f():\n    return 1\n@f.setter\ndef f(v):\n    return v").is_empty());
    }

    #[test]
    fn test_issue_serialization() {
        let json = serde_json::to_value(Issue::no_issues()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "info", "line": "1", "column": "1", "message": "No issues found"})
        );
        assert_eq!(
            Issue::new(IssueKind::Warning, 2, 4, "Unused import os").to_string(),
            "warning at line 2, column 4: Unused import os"
        );
    }

    #[test]
    fn test_pylint_report_conversion() {
        let report = r#"[
            {"type": "convention", "module": "m", "obj": "", "line": 1, "column": 0, "path": "m.py",
             "symbol": "missing-module-docstring", "message": "Missing module docstring", "message-id": "C0114"},
            {"type": "warning", "module": "m", "obj": "", "line": 1, "column": 0, "path": "m.py",
             "symbol": "unused-import", "message": "Unused import os", "message-id": "W0611"},
            {"type": "error", "module": "m", "obj": "", "line": 3, "column": 4, "path": "m.py",
             "symbol": "syntax-error", "message": "invalid syntax (<unknown>, line 3)", "message-id": "E0001"}
        ]"#;
        let messages: Vec<PylintMessage> = serde_json::from_str(report).unwrap();
        let issues = PylintAnalyzer::convert(messages);
        assert_eq!(
            issues,
            [
                Issue::new(IssueKind::Warning, 1, 0, "Unused import os"),
                Issue::syntax_error(3, 4, "invalid syntax (<unknown>, line 3)"),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_pylint_executable() {
        let analyzer = PylintAnalyzer {
            program: "codesmith-no-such-pylint".to_string(),
            args: Vec::new(),
        };
        let err = analyzer.check("x = 1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AnalyzerFailed);
        assert!(err.message().contains("not found"));
    }
}
