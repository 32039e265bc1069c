use codesmith_engine::{analyze, optimize, BuiltinAnalyzer, IssueKind};
use codesmith_syntax::parse_module;

const SAMPLES: &[&str] = &[
    "for i in range(10):\n    print(i)",
    "a = 'foo' + 'bar'\nb = x in [1, 2]\n",
    "def f(x):\n    if x == 'on':\n        return 1\n    return 0\n",
    "sizes = [len(w) for w in words]\nfor j in range(3):\n    pass\n",
    "class C:\n    def m(self, k):\n        if k:\n            return 'a' + 'b'\n        return None\n",
    "import os\nprint(os.getcwd())\n",
];

#[test]
fn optimized_code_parses() {
    for src in SAMPLES {
        let result = optimize(src).unwrap();
        assert!(
            parse_module(&result.optimized_code).is_ok(),
            "output of {:?} does not parse: {:?}",
            src,
            result.optimized_code
        );
        assert_eq!(result.original_code, *src);
    }
}

#[test]
fn one_log_entry_per_match() {
    let result = optimize("a = 'x' + 'y'\nb = 'z' + 'w'\nc = k in [1]\n").unwrap();
    assert_eq!(
        result.optimizations,
        [
            "Combined string literals",
            "Combined string literals",
            "Replaced list with set for membership testing",
        ]
    );
}

#[test]
fn optimizer_is_not_idempotent() {
    let first = optimize("x = 'a' + 'b' + 'c'").unwrap();
    assert_eq!(first.optimized_code, "x = 'ab' + 'c'");
    assert_eq!(first.optimizations.len(), 1);

    let second = optimize(&first.optimized_code).unwrap();
    assert_eq!(second.optimized_code, "x = 'abc'");
    assert_eq!(second.optimizations.len(), 1);
    assert_ne!(first.optimized_code, second.optimized_code);
}

#[test]
fn empty_source() {
    let result = optimize("").unwrap();
    assert_eq!(result.original_code, "");
    assert_eq!(result.optimized_code, "");
    assert!(result.optimizations.is_empty());
}

#[test]
fn range_loop() {
    let result = optimize("for i in range(10):\n    print(i)").unwrap();
    assert!(result
        .optimizations
        .iter()
        .any(|o| o == "Replaced range() with list comprehension"));
    assert!(result.optimized_code.contains(" for i in range(10)]"));
}

#[test]
fn string_building_loop_is_left_alone() {
    let src = "result = '' \nfor item in items:\n    result += str(item)";
    let result = optimize(src).unwrap();
    assert!(result.optimizations.is_empty());
    assert_eq!(result.optimized_code, result.original_code);
}

#[test]
fn string_literals_are_combined() {
    let result = optimize("a = 'foo' + 'bar'").unwrap();
    assert!(result.optimized_code.contains("'foobar'"));
    assert_eq!(result.optimizations, ["Combined string literals"]);
}

#[test]
fn clean_code_has_one_info_issue() {
    let issues = tokio_test::block_on(analyze(&BuiltinAnalyzer, "def test(): pass")).unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].kind, IssueKind::Info);
    assert_eq!(issues[0].message, "No issues found");
}
