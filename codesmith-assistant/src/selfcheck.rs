//! Built-in self-check suite behind `codesmith test`
//!
//! Exercises the optimizer contract and smoke-tests the analyzer and the
//! refactoring engine without touching the network.

use codesmith_engine::{analyze, optimize, refactor, BuiltinAnalyzer, IssueKind, RefactorParams};
use codesmith_error::{Error, ErrorKind, Result};
use codesmith_syntax::parse_module;
use std::fmt;
use tracing::debug;

/// Outcome of one check.
#[derive(Debug)]
pub struct CheckResult {
    pub name: &'static str,
    pub failure: Option<String>,
}

impl CheckResult {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.failure {
            None => write!(f, "{} ... ok", self.name),
            Some(reason) => write!(f, "{} ... FAILED: {}", self.name, reason),
        }
    }
}

/// Summary of a full run.
#[derive(Debug)]
pub struct SelfCheckReport {
    pub results: Vec<CheckResult>,
}

impl SelfCheckReport {
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }

    pub fn success(&self) -> bool {
        self.failed() == 0
    }
}

fn ensure(condition: bool, message: impl FnOnce() -> String) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(Error::unexpected(message()))
    }
}

const SAMPLES: &[&str] = &[
    "for i in range(10):\n    print(i)",
    "a = 'foo' + 'bar'\nb = x in [1, 2]\n",
    "def f(x):\n    if x == 'on':\n        return 1\n    return 0\n",
    "sizes = [len(w) for w in words]\n",
    "class C:\n    def m(self, k):\n        if k:\n            return 'a' + 'b'\n        return None\n",
];

fn optimize_empty_source() -> Result<()> {
    let result = optimize("")?;
    ensure(
        result.original_code.is_empty() && result.optimized_code.is_empty() && result.optimizations.is_empty(),
        || format!("unexpected result {:?}", result),
    )
}

fn optimize_range_loop() -> Result<()> {
    let result = optimize("for i in range(10):\n    print(i)")?;
    ensure(
        result.optimizations.iter().any(|o| o == "Replaced range() with list comprehension"),
        || format!("missing range rewrite in {:?}", result.optimizations),
    )?;
    ensure(result.optimized_code.contains(" for i in range(10)]"), || {
        format!("no comprehension in {:?}", result.optimized_code)
    })
}

fn optimize_leaves_string_building_loop() -> Result<()> {
    let result = optimize("result = '' \nfor item in items:\n    result += str(item)")?;
    ensure(
        result.optimizations.is_empty() && result.optimized_code == result.original_code,
        || format!("loop was rewritten: {:?}", result.optimizations),
    )
}

fn optimize_combines_string_literals() -> Result<()> {
    let result = optimize("a = 'foo' + 'bar'")?;
    ensure(result.optimized_code.contains("'foobar'"), || {
        format!("literals not combined: {:?}", result.optimized_code)
    })?;
    ensure(result.optimizations == ["Combined string literals"], || {
        format!("unexpected log {:?}", result.optimizations)
    })
}

fn optimize_output_parses() -> Result<()> {
    for src in SAMPLES {
        let result = optimize(src)?;
        parse_module(&result.optimized_code).map_err(|e| {
            Error::unexpected(format!("output of {:?} does not parse: {}", src, e.message()))
        })?;
    }
    Ok(())
}

fn optimize_is_not_idempotent() -> Result<()> {
    let first = optimize("x = 'a' + 'b' + 'c'")?;
    let second = optimize(&first.optimized_code)?;
    ensure(
        !second.optimizations.is_empty() && second.optimized_code != first.optimized_code,
        || "second pass found nothing to rewrite".to_string(),
    )
}

async fn analyze_clean_code() -> Result<()> {
    let issues = analyze(&BuiltinAnalyzer, "def test(): pass").await?;
    ensure(
        issues.len() == 1 && issues[0].kind == IssueKind::Info && issues[0].message == "No issues found",
        || format!("unexpected issues {:?}", issues),
    )
}

async fn analyze_reports_syntax_error() -> Result<()> {
    let issues = analyze(&BuiltinAnalyzer, "def f(:\n    pass\n").await?;
    ensure(
        issues.len() == 1 && issues[0].kind == IssueKind::Error && issues[0].message.starts_with("Syntax Error: "),
        || format!("unexpected issues {:?}", issues),
    )
}

fn refactor_rename() -> Result<()> {
    let params = RefactorParams {
        old_name: Some("fibonacci".into()),
        new_name: Some("fib_sequence".into()),
        ..RefactorParams::default()
    };
    let code = "def fibonacci(n):\n    return n if n < 2 else fibonacci(n - 1) + fibonacci(n - 2)\n";
    let renamed = refactor(code, "rename", &params)?;
    ensure(
        !renamed.contains("fibonacci") && renamed.matches("fib_sequence").count() == 3,
        || format!("rename incomplete: {:?}", renamed),
    )
}

fn refactor_rejects_unknown_type() -> Result<()> {
    match refactor("x = 1\n", "reticulate", &RefactorParams::default()) {
        Err(e) if e.kind() == ErrorKind::Unsupported => Ok(()),
        Err(e) => Err(Error::unexpected(format!("wrong error kind {:?}", e.kind()))),
        Ok(code) => Err(Error::unexpected(format!("accepted unknown type, produced {:?}", code))),
    }
}

fn record(name: &'static str, outcome: Result<()>) -> CheckResult {
    debug!(check = name, ok = outcome.is_ok(), "self-check");
    CheckResult {
        name,
        failure: outcome.err().map(|e| e.message().to_string()),
    }
}

/// Run every check, in a fixed order.
pub async fn run_self_checks() -> SelfCheckReport {
    let sync_checks: [(&'static str, fn() -> Result<()>); 8] = [
        ("optimize_empty_source", optimize_empty_source),
        ("optimize_range_loop", optimize_range_loop),
        ("optimize_leaves_string_building_loop", optimize_leaves_string_building_loop),
        ("optimize_combines_string_literals", optimize_combines_string_literals),
        ("optimize_output_parses", optimize_output_parses),
        ("optimize_is_not_idempotent", optimize_is_not_idempotent),
        ("refactor_rename", refactor_rename),
        ("refactor_rejects_unknown_type", refactor_rejects_unknown_type),
    ];

    let mut results: Vec<CheckResult> = sync_checks
        .into_iter()
        .map(|(name, check)| record(name, check()))
        .collect();
    results.push(record("analyze_clean_code", analyze_clean_code().await));
    results.push(record("analyze_reports_syntax_error", analyze_reports_syntax_error().await));

    SelfCheckReport { results }
}
