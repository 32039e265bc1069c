//! Refactoring engine
//!
//! Every operation runs against a throwaway project directory that holds the
//! code as `module.py`. Edits are computed on the token stream and spliced
//! back into the original text, so formatting and comments outside the
//! edited spans are kept.

use codesmith_error::{Error, Result};
use codesmith_syntax::ast::{Expr, Stmt, StmtKind};
use codesmith_syntax::names::{parameter_names, NameUsage};
use codesmith_syntax::token::{Keyword, Token, TokenKind};
use codesmith_syntax::{parse_expression, parse_module, tokenize};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use tempfile::TempDir;
use tracing::{debug, info};

pub const MODULE_FILE: &str = "module.py";

const WILDCARD_PREFIX: &str = "__codesmith_wildcard_";

const ASSIGN_OPS: &[&str] = &[
    "=", "+=", "-=", "*=", "/=", "//=", "%=", "**=", "@=", "&=", "|=", "^=", ">>=", "<<=",
];

// ============================================================================
// Operations and parameters
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefactorOperation {
    Rename,
    ExtractMethod,
    MoveModule,
    Inline,
    Restructure,
    ExtractVariable,
    IntroduceParameter,
}

impl RefactorOperation {
    pub const ALL: [RefactorOperation; 7] = [
        RefactorOperation::Rename,
        RefactorOperation::ExtractMethod,
        RefactorOperation::MoveModule,
        RefactorOperation::Inline,
        RefactorOperation::Restructure,
        RefactorOperation::ExtractVariable,
        RefactorOperation::IntroduceParameter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RefactorOperation::Rename => "rename",
            RefactorOperation::ExtractMethod => "extract_method",
            RefactorOperation::MoveModule => "move_module",
            RefactorOperation::Inline => "inline",
            RefactorOperation::Restructure => "restructure",
            RefactorOperation::ExtractVariable => "extract_variable",
            RefactorOperation::IntroduceParameter => "introduce_parameter",
        }
    }
}

impl fmt::Display for RefactorOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefactorOperation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        RefactorOperation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| {
                Error::unsupported(format!("unsupported refactor type: {}", s))
                    .with_operation("refactor::refactor")
            })
    }
}

/// Operation arguments. Each operation reads only the fields it needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefactorParams {
    pub old_name: Option<String>,
    pub new_name: Option<String>,
    pub start_line: Option<usize>,
    pub end_line: Option<usize>,
    pub destination: Option<String>,
    pub line: Option<usize>,
    pub pattern: Option<String>,
    pub goal: Option<String>,
    pub start_offset: Option<usize>,
    pub end_offset: Option<usize>,
    pub offset: Option<usize>,
    pub parameter: Option<String>,
}

fn require<T: Clone>(value: &Option<T>, name: &'static str) -> Result<T> {
    value
        .clone()
        .ok_or_else(|| Error::missing_parameter(name).with_operation("refactor::refactor"))
}

// ============================================================================
// Scratch project
// ============================================================================

/// Temporary project directory holding the code under refactoring.
///
/// The directory is removed when the project is dropped, whichever way the
/// operation exits.
pub struct ScratchProject {
    dir: TempDir,
    module: PathBuf,
}

impl ScratchProject {
    pub fn create(code: &str) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("codesmith-refactor-").tempdir()?;
        let module = dir.path().join(MODULE_FILE);
        fs::write(&module, code)?;
        Ok(Self { dir, module })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn module_path(&self) -> &Path {
        &self.module
    }

    pub fn read_module(&self) -> Result<String> {
        Ok(fs::read_to_string(&self.module)?)
    }

    pub fn write_module(&self, code: &str) -> Result<()> {
        fs::write(&self.module, code)?;
        Ok(())
    }

    /// Run `edit` over the module text, write the result and read it back.
    fn edit_module(&self, edit: impl FnOnce(&str) -> Result<String>) -> Result<String> {
        let source = self.read_module()?;
        let edited = edit(&source)?;
        self.write_module(&edited)?;
        self.read_module()
    }

    /// Move the module into the package directory `destination` (relative to
    /// the project root, `/` or `.` separated). Every directory on the way
    /// gets an `__init__.py`.
    pub fn relocate_module(&mut self, destination: &str) -> Result<PathBuf> {
        let relative = PathBuf::from(destination.trim().replace('.', "/"));
        let escapes = relative.components().any(|c| !matches!(c, Component::Normal(_)));
        if relative.as_os_str().is_empty() || escapes {
            return Err(Error::invalid_argument(format!(
                "destination must be a relative package path: '{}'",
                destination
            )));
        }

        let mut package = self.root().to_path_buf();
        for component in relative.components() {
            package.push(component);
            fs::create_dir_all(&package)?;
            let init = package.join("__init__.py");
            if !init.exists() {
                fs::write(&init, "")?;
            }
        }

        let target = package.join(MODULE_FILE);
        fs::rename(&self.module, &target)?;
        debug!(from = %self.module.display(), to = %target.display(), "moved module");
        self.module = target.clone();
        Ok(target)
    }
}

// ============================================================================
// Entry point
// ============================================================================

/// Apply the refactoring named by `refactor_type` to `code`.
pub fn refactor(code: &str, refactor_type: &str, params: &RefactorParams) -> Result<String> {
    let operation: RefactorOperation = refactor_type.parse()?;
    parse_module(code).map_err(|e| e.with_operation("refactor::refactor"))?;

    let mut project = ScratchProject::create(code)?;
    debug!(%operation, root = %project.root().display(), "refactoring in scratch project");

    let result = match operation {
        RefactorOperation::Rename => {
            let old_name = require(&params.old_name, "old_name")?;
            let new_name = require(&params.new_name, "new_name")?;
            project.edit_module(|src| rename(src, &old_name, &new_name))
        }
        RefactorOperation::ExtractMethod => {
            let start_line = require(&params.start_line, "start_line")?;
            let end_line = require(&params.end_line, "end_line")?;
            let new_name = require(&params.new_name, "new_name")?;
            project.edit_module(|src| extract_method(src, start_line, end_line, &new_name))
        }
        RefactorOperation::MoveModule => {
            let destination = require(&params.destination, "destination")?;
            project
                .relocate_module(&destination)
                .and_then(|_| project.read_module())
        }
        RefactorOperation::Inline => {
            let line = require(&params.line, "line")?;
            project.edit_module(|src| inline_variable(src, line))
        }
        RefactorOperation::Restructure => {
            let pattern = require(&params.pattern, "pattern")?;
            let goal = require(&params.goal, "goal")?;
            project.edit_module(|src| restructure(src, &pattern, &goal))
        }
        RefactorOperation::ExtractVariable => {
            let start = require(&params.start_offset, "start_offset")?;
            let end = require(&params.end_offset, "end_offset")?;
            let new_name = require(&params.new_name, "new_name")?;
            project.edit_module(|src| extract_variable(src, start, end, &new_name))
        }
        RefactorOperation::IntroduceParameter => {
            let offset = require(&params.offset, "offset")?;
            let parameter = require(&params.parameter, "parameter")?;
            project.edit_module(|src| introduce_parameter(src, offset, &parameter))
        }
    };

    let refactored = result.map_err(|e| e.with_operation("refactor::refactor"))?;
    info!(%operation, "refactoring applied");
    Ok(refactored)
}

// ============================================================================
// Text edits
// ============================================================================

struct Edit {
    start: usize,
    end: usize,
    text: String,
}

impl Edit {
    fn replace(start: usize, end: usize, text: impl Into<String>) -> Self {
        Self { start, end, text: text.into() }
    }

    fn insert(at: usize, text: impl Into<String>) -> Self {
        Self::replace(at, at, text)
    }
}

/// Apply non-overlapping edits to `source`.
fn splice(source: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by_key(|e| (e.start, e.end));
    let mut out = String::with_capacity(source.len());
    let mut cursor = 0;
    for edit in edits {
        out.push_str(&source[cursor..edit.start]);
        out.push_str(&edit.text);
        cursor = edit.end;
    }
    out.push_str(&source[cursor..]);
    out
}

fn check_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c == '_' || c.is_alphabetic())
        && chars.all(|c| c == '_' || c.is_alphanumeric())
        && Keyword::from_ident(name).is_none();
    if valid {
        Ok(())
    } else {
        Err(Error::invalid_argument(format!("'{}' is not a valid identifier", name)))
    }
}

fn line_start(source: &str, pos: usize) -> usize {
    source[..pos].rfind('\n').map_or(0, |i| i + 1)
}

fn leading_whitespace(line: &str) -> &str {
    let end = line.find(|c: char| c != ' ' && c != '\t').unwrap_or(line.len());
    &line[..end]
}

// ============================================================================
// Token helpers
// ============================================================================

fn is_layout(token: &Token) -> bool {
    matches!(
        token.kind,
        TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent | TokenKind::EndMarker
    )
}

fn is_name(token: &Token, name: &str) -> bool {
    matches!(&token.kind, TokenKind::Name(n) if n == name)
}

fn starts_logical_line(tokens: &[Token], i: usize) -> bool {
    !is_layout(&tokens[i]) && (i == 0 || is_layout(&tokens[i - 1]))
}

/// Index one past the bracket that closes the one at `open`.
fn closing(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        match token.kind {
            TokenKind::Op("(" | "[" | "{") => depth += 1,
            TokenKind::Op(")" | "]" | "}") => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            TokenKind::EndMarker => return None,
            _ => {}
        }
    }
    None
}

/// Index one past the last token of the block opened by the compound
/// statement whose header starts at `header`.
fn block_end(tokens: &[Token], header: usize) -> usize {
    let mut depth = 0usize;
    let mut colon = header;
    while colon < tokens.len() {
        match tokens[colon].kind {
            TokenKind::Op("(" | "[" | "{") => depth += 1,
            TokenKind::Op(")" | "]" | "}") => depth = depth.saturating_sub(1),
            TokenKind::Op(":") if depth == 0 => break,
            _ => {}
        }
        colon += 1;
    }

    let indented = matches!(tokens.get(colon + 1), Some(t) if t.kind == TokenKind::Newline)
        && matches!(tokens.get(colon + 2), Some(t) if t.kind == TokenKind::Indent);
    if !indented {
        // Body on the header line
        return tokens
            .iter()
            .enumerate()
            .skip(colon)
            .find(|(_, t)| t.kind == TokenKind::Newline)
            .map_or(tokens.len(), |(i, _)| i + 1);
    }

    let mut level = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(colon + 2) {
        match token.kind {
            TokenKind::Indent => level += 1,
            TokenKind::Dedent => {
                level = level.saturating_sub(1);
                if level == 0 {
                    return i + 1;
                }
            }
            _ => {}
        }
    }
    tokens.len()
}

// ============================================================================
// Statement lookup
// ============================================================================

fn child_blocks(stmt: &Stmt) -> Vec<&[Stmt]> {
    match &stmt.kind {
        StmtKind::FunctionDef { body, .. }
        | StmtKind::ClassDef { body, .. }
        | StmtKind::With { body, .. } => vec![body.as_slice()],
        StmtKind::For { body, orelse, .. }
        | StmtKind::While { body, orelse, .. }
        | StmtKind::If { body, orelse, .. } => vec![body.as_slice(), orelse.as_slice()],
        StmtKind::Try { body, handlers, orelse, finalbody, .. } => {
            let mut blocks = vec![body.as_slice()];
            blocks.extend(handlers.iter().map(|h| h.body.as_slice()));
            blocks.push(orelse.as_slice());
            blocks.push(finalbody.as_slice());
            blocks
        }
        StmtKind::Match { cases, .. } => cases.iter().map(|c| c.body.as_slice()).collect(),
        _ => Vec::new(),
    }
}

/// First statement starting on `line`, with the block it belongs to.
fn statement_at(body: &[Stmt], line: usize) -> Option<(&Stmt, &[Stmt])> {
    for stmt in body {
        if stmt.loc.line == line {
            return Some((stmt, body));
        }
        if let Some(found) = child_blocks(stmt)
            .into_iter()
            .find_map(|block| statement_at(block, line))
        {
            return Some(found);
        }
    }
    None
}

struct Enclosing<'a> {
    function: &'a Stmt,
    block: &'a [Stmt],
}

/// The statement list containing a statement on `line`, together with the
/// innermost function around it. Class bodies are not function scopes.
fn find_block<'a>(body: &'a [Stmt], line: usize, function: Option<&'a Stmt>) -> Option<Enclosing<'a>> {
    if let Some(function) = function {
        if body.iter().any(|s| s.loc.line == line) {
            return Some(Enclosing { function, block: body });
        }
    }
    body.iter().find_map(|stmt| {
        let inner = match &stmt.kind {
            StmtKind::FunctionDef { .. } => Some(stmt),
            StmtKind::ClassDef { .. } => None,
            _ => function,
        };
        child_blocks(stmt)
            .into_iter()
            .find_map(|block| find_block(block, line, inner))
    })
}

/// Whether control can leave `stmts` other than by falling off the end.
fn escapes(stmts: &[Stmt], in_loop: bool) -> bool {
    stmts.iter().any(|stmt| match &stmt.kind {
        StmtKind::Return(_) => true,
        StmtKind::Break | StmtKind::Continue => !in_loop,
        StmtKind::For { body, orelse, .. } | StmtKind::While { body, orelse, .. } => {
            escapes(body, true) || escapes(orelse, in_loop)
        }
        StmtKind::If { body, orelse, .. } => escapes(body, in_loop) || escapes(orelse, in_loop),
        StmtKind::With { body, .. } => escapes(body, in_loop),
        StmtKind::Try { body, handlers, orelse, finalbody, .. } => {
            escapes(body, in_loop)
                || handlers.iter().any(|h| escapes(&h.body, in_loop))
                || escapes(orelse, in_loop)
                || escapes(finalbody, in_loop)
        }
        StmtKind::Match { cases, .. } => cases.iter().any(|c| escapes(&c.body, in_loop)),
        _ => false,
    })
}

// ============================================================================
// rename
// ============================================================================

fn rename(source: &str, old_name: &str, new_name: &str) -> Result<String> {
    check_identifier(new_name)?;
    let tokens = tokenize(source)?;
    let edits: Vec<Edit> = tokens
        .iter()
        .filter(|t| is_name(t, old_name))
        .map(|t| Edit::replace(t.span.start, t.span.end, new_name))
        .collect();
    debug!(old_name, new_name, occurrences = edits.len(), "renaming");
    Ok(splice(source, edits))
}

// ============================================================================
// extract_method
// ============================================================================

fn extract_method(source: &str, start_line: usize, end_line: usize, new_name: &str) -> Result<String> {
    check_identifier(new_name)?;
    let lines: Vec<&str> = source.split_inclusive('\n').collect();
    if start_line == 0 || start_line > end_line || end_line > lines.len() {
        return Err(Error::invalid_argument(format!(
            "invalid line range {}-{}",
            start_line, end_line
        )));
    }

    let module = parse_module(source)?;
    let enclosing = find_block(&module.body, start_line, None).ok_or_else(|| {
        Error::refactor_failed(format!(
            "no statement inside a function starts on line {}",
            start_line
        ))
    })?;
    let StmtKind::FunctionDef { params, body: function_body, .. } = &enclosing.function.kind else {
        return Err(Error::unexpected("enclosing statement is not a function"));
    };

    let block = enclosing.block;
    let first = block
        .iter()
        .position(|s| s.loc.line == start_line)
        .ok_or_else(|| Error::unexpected("selected statement vanished"))?;
    let last = block
        .iter()
        .rposition(|s| s.loc.line <= end_line)
        .unwrap_or(first);
    let selected = &block[first..=last];

    let indent = leading_whitespace(lines[start_line - 1]);
    let is_blank = |line: &&str| line.trim().is_empty() || line.trim_start().starts_with('#');
    let inside = lines[start_line - 1..end_line]
        .iter()
        .all(|line| is_blank(line) || line.starts_with(indent));
    let cuts_statement = lines[end_line..]
        .iter()
        .find(|line| !is_blank(line))
        .is_some_and(|line| leading_whitespace(line).len() > indent.len());
    if !inside || cuts_statement {
        return Err(Error::refactor_failed(format!(
            "lines {}-{} do not span whole statements",
            start_line, end_line
        )));
    }
    if escapes(selected, false) {
        return Err(Error::refactor_failed(
            "cannot extract code that returns or jumps out of its block",
        ));
    }

    // Inputs: read in the range and bound before it
    let range = NameUsage::of_scope(selected);
    let scope = NameUsage::of_scope(function_body);
    let mut inputs: Vec<String> = parameter_names(params)
        .into_iter()
        .filter(|n| range.is_loaded(n))
        .collect();
    for name in &scope.stored {
        let bound_before = scope.binding_site(name).is_some_and(|loc| loc.line < start_line);
        if bound_before && range.is_loaded(name) && !inputs.contains(name) {
            inputs.push(name.clone());
        }
    }

    // Outputs: bound in the range and read after it
    let tokens = tokenize(source)?;
    let def_index = tokens
        .iter()
        .position(|t| t.span.line == enclosing.function.loc.line && t.kind.is_keyword(Keyword::Def))
        .ok_or_else(|| Error::unexpected("function header not found"))?;
    let function_end = block_end(&tokens, def_index);
    let read_after: HashSet<&str> = tokens[def_index..function_end]
        .iter()
        .filter(|t| t.span.line > end_line)
        .filter_map(|t| match &t.kind {
            TokenKind::Name(n) => Some(n.as_str()),
            _ => None,
        })
        .collect();
    let outputs: Vec<String> = range
        .stored
        .iter()
        .filter(|n| read_after.contains(n.as_str()))
        .cloned()
        .collect();

    let mut function_text = format!("def {}({}):\n", new_name, inputs.join(", "));
    for line in &lines[start_line - 1..end_line] {
        if line.trim().is_empty() {
            function_text.push('\n');
        } else if let Some(rest) = line.strip_prefix(indent) {
            function_text.push_str("    ");
            function_text.push_str(rest);
        } else {
            function_text.push_str(line);
        }
    }
    if !function_text.ends_with('\n') {
        function_text.push('\n');
    }
    if !outputs.is_empty() {
        function_text.push_str(&format!("    return {}\n", outputs.join(", ")));
    }

    let call = format!("{}({})", new_name, inputs.join(", "));
    let call_line = if outputs.is_empty() {
        format!("{}{}\n", indent, call)
    } else {
        format!("{}{} = {}\n", indent, outputs.join(", "), call)
    };

    let range_start: usize = lines[..start_line - 1].iter().map(|l| l.len()).sum();
    let range_end: usize = range_start + lines[start_line - 1..end_line].iter().map(|l| l.len()).sum::<usize>();
    let mut edits = vec![Edit::replace(range_start, range_end, call_line)];

    // The new function goes right after the top-level statement holding the
    // original one
    let next_top_level = (function_end..tokens.len()).find(|&i| {
        let start = tokens[i].span.start;
        starts_logical_line(&tokens, i) && line_start(source, start) == start
    });
    match next_top_level {
        Some(i) => edits.push(Edit::insert(tokens[i].span.start, format!("{}\n\n", function_text))),
        None => {
            let lead = if source.ends_with('\n') || range_end == source.len() { "\n\n" } else { "\n\n\n" };
            edits.push(Edit::insert(source.len(), format!("{}{}", lead, function_text)));
        }
    }

    debug!(new_name, inputs = ?inputs, outputs = ?outputs, "extracting method");
    Ok(splice(source, edits))
}

// ============================================================================
// inline
// ============================================================================

fn inline_variable(source: &str, line: usize) -> Result<String> {
    let module = parse_module(source)?;
    let (stmt, siblings) = statement_at(&module.body, line)
        .ok_or_else(|| Error::invalid_argument(format!("no statement starts on line {}", line)))?;
    let not_single = || Error::refactor_failed(format!("line {} is not a single-name assignment", line));
    let (name, value) = match &stmt.kind {
        StmtKind::Assign { targets, value } => match targets.as_slice() {
            [Expr::Name(name)] => (name.as_str(), value),
            _ => return Err(not_single()),
        },
        _ => return Err(not_single()),
    };

    let tokens = tokenize(source)?;
    if binding_count(&tokens, name) > 1 {
        return Err(Error::refactor_failed(format!("'{}' is assigned more than once", name)));
    }

    let first = tokens
        .iter()
        .position(|t| t.span.line == line && !is_layout(t))
        .ok_or_else(|| Error::unexpected("assignment tokens not found"))?;
    let newline = (first..tokens.len())
        .find(|&i| is_layout(&tokens[i]))
        .ok_or_else(|| Error::unexpected("assignment has no end"))?;
    if tokens[first..newline].iter().any(|t| t.kind.is_op(";")) {
        return Err(Error::refactor_failed(format!(
            "line {} holds more than one statement",
            line
        )));
    }
    let eq = (first..newline)
        .find(|&i| tokens[i].kind.is_op("="))
        .ok_or_else(not_single)?;

    let value_start = tokens[eq + 1].span.start;
    let value_end = tokens[newline - 1].span.end;
    let value_text = &source[value_start..value_end];
    let enclosed = tokens[eq + 1].kind.is_op("(") && closing(&tokens, eq + 1) == Some(newline);
    let replacement = if enclosed || is_atomic(value) {
        value_text.to_string()
    } else {
        format!("({})", value_text)
    };

    let start = line_start(source, tokens[first].span.start);
    let end = source[value_end..]
        .find('\n')
        .map_or(source.len(), |i| value_end + i + 1);
    let removal = if siblings.len() == 1 {
        format!("{}pass\n", leading_whitespace(&source[start..]))
    } else {
        String::new()
    };

    let mut edits = vec![Edit::replace(start, end, removal)];
    for (i, token) in tokens.iter().enumerate().skip(newline + 1) {
        let attribute = tokens[i - 1].kind.is_op(".");
        let keyword_arg = tokens.get(i + 1).is_some_and(|t| t.kind.is_op("="));
        if is_name(token, name) && !attribute && !keyword_arg {
            edits.push(Edit::replace(token.span.start, token.span.end, replacement.clone()));
        }
    }

    debug!(name, uses = edits.len() - 1, "inlining variable");
    Ok(splice(source, edits))
}

fn is_atomic(value: &Expr) -> bool {
    matches!(
        value,
        Expr::Name(_)
            | Expr::Constant(_)
            | Expr::FString(_)
            | Expr::Call { .. }
            | Expr::Attribute { .. }
            | Expr::Subscript { .. }
            | Expr::List(_)
            | Expr::Set(_)
            | Expr::Dict { .. }
            | Expr::ListComp { .. }
            | Expr::SetComp { .. }
            | Expr::DictComp { .. }
    )
}

/// How many times `name` is bound anywhere in the token stream.
fn binding_count(tokens: &[Token], name: &str) -> usize {
    const BINDERS: [Keyword; 5] = [Keyword::For, Keyword::As, Keyword::Def, Keyword::Class, Keyword::Import];
    let mut depth = 0usize;
    let mut count = 0;
    for (i, token) in tokens.iter().enumerate() {
        match &token.kind {
            TokenKind::Op("(" | "[" | "{") => depth += 1,
            TokenKind::Op(")" | "]" | "}") => depth = depth.saturating_sub(1),
            TokenKind::Name(n) if n == name => {
                let prev = i.checked_sub(1).map(|p| &tokens[p].kind);
                if prev.is_some_and(|k| k.is_op(".")) {
                    continue;
                }
                let after_binder = prev.is_some_and(|k| BINDERS.iter().any(|&b| k.is_keyword(b)));
                let assigned = tokens.get(i + 1).is_some_and(|t| {
                    t.kind.is_op(":=") || (depth == 0 && ASSIGN_OPS.iter().any(|op| t.kind.is_op(op)))
                });
                if after_binder || assigned {
                    count += 1;
                }
            }
            _ => {}
        }
    }
    count
}

// ============================================================================
// restructure
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum PatternToken {
    Literal(TokenKind),
    Wildcard(String),
}

type Captures = Vec<(String, (usize, usize))>;

/// Replace each `${name}` in `template` with `replace(name)`.
fn expand_template(template: &str, mut replace: impl FnMut(&str) -> Result<String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| Error::invalid_argument(format!("unterminated wildcard in '{}'", template)))?;
        let name = &after[..end];
        if name.is_empty() || !name.chars().all(|c| c == '_' || c.is_alphanumeric()) {
            return Err(Error::invalid_argument(format!("invalid wildcard '${{{}}}'", name)));
        }
        out.push_str(&replace(name)?);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn compile_pattern(pattern: &str) -> Result<Vec<PatternToken>> {
    let text = expand_template(pattern, |name| Ok(format!("{}{}", WILDCARD_PREFIX, name)))?;
    let compiled: Vec<PatternToken> = tokenize(text.trim())?
        .into_iter()
        .filter(|t| !is_layout(t))
        .map(|t| match t.kind {
            TokenKind::Name(n) if n.starts_with(WILDCARD_PREFIX) => {
                PatternToken::Wildcard(n[WILDCARD_PREFIX.len()..].to_string())
            }
            kind => PatternToken::Literal(kind),
        })
        .collect();
    if compiled.is_empty() {
        return Err(Error::invalid_argument("restructure pattern is empty"));
    }
    Ok(compiled)
}

/// End indices (exclusive) of every primary expression starting at `at`:
/// an atom followed by any number of attribute, call and subscript trailers.
fn primary_ends(tokens: &[Token], at: usize) -> Vec<usize> {
    let mut ends = Vec::new();
    let Some(first) = tokens.get(at) else {
        return ends;
    };
    let mut end = match &first.kind {
        TokenKind::Name(_)
        | TokenKind::Int(_)
        | TokenKind::Float(_)
        | TokenKind::Imaginary(_)
        | TokenKind::Keyword(Keyword::True | Keyword::False | Keyword::None) => at + 1,
        kind if kind.is_string_like() => {
            let mut end = at + 1;
            while tokens.get(end).is_some_and(|t| t.kind.is_string_like()) {
                end += 1;
            }
            end
        }
        TokenKind::Op("(" | "[" | "{") => match closing(tokens, at) {
            Some(end) => end,
            None => return ends,
        },
        _ => return ends,
    };
    ends.push(end);

    loop {
        match tokens.get(end).map(|t| &t.kind) {
            Some(TokenKind::Op(".")) if matches!(tokens.get(end + 1).map(|t| &t.kind), Some(TokenKind::Name(_))) => {
                end += 2
            }
            Some(TokenKind::Op("(" | "[")) => match closing(tokens, end) {
                Some(close) => end = close,
                None => break,
            },
            _ => break,
        }
        ends.push(end);
    }
    ends
}

fn same_tokens(a: &[Token], b: &[Token]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.kind == y.kind)
}

/// Match `pattern` at token `at`. Wildcards try the longest primary first
/// and backtrack; a repeated wildcard must match the same tokens again.
fn match_at(tokens: &[Token], at: usize, pattern: &[PatternToken], captures: &mut Captures) -> Option<usize> {
    let Some((head, rest)) = pattern.split_first() else {
        return Some(at);
    };
    match head {
        PatternToken::Literal(kind) => {
            if tokens.get(at)?.kind != *kind {
                return None;
            }
            match_at(tokens, at + 1, rest, captures)
        }
        PatternToken::Wildcard(name) => {
            let bound = captures.iter().find(|(n, _)| n == name).map(|&(_, span)| span);
            for end in primary_ends(tokens, at).into_iter().rev() {
                if let Some((s, e)) = bound {
                    if !same_tokens(&tokens[s..e], &tokens[at..end]) {
                        continue;
                    }
                }
                captures.push((name.clone(), (at, end)));
                if let Some(stop) = match_at(tokens, end, rest, captures) {
                    return Some(stop);
                }
                captures.pop();
            }
            None
        }
    }
}

fn restructure(source: &str, pattern: &str, goal: &str) -> Result<String> {
    let compiled = compile_pattern(pattern)?;
    let wildcards: HashSet<&str> = compiled
        .iter()
        .filter_map(|p| match p {
            PatternToken::Wildcard(n) => Some(n.as_str()),
            PatternToken::Literal(_) => None,
        })
        .collect();
    expand_template(goal, |name| {
        if wildcards.contains(name) {
            Ok(String::new())
        } else {
            Err(Error::invalid_argument(format!(
                "wildcard '${{{}}}' in goal does not appear in the pattern",
                name
            )))
        }
    })?;

    let tokens = tokenize(source)?;
    let text = |(s, e): (usize, usize)| source[tokens[s].span.start..tokens[e - 1].span.end].to_string();
    let mut edits = Vec::new();
    let mut at = 0;
    while at < tokens.len() {
        let after_dot = at > 0 && tokens[at - 1].kind.is_op(".");
        let mut captures = Captures::new();
        match match_at(&tokens, at, &compiled, &mut captures) {
            Some(end) if end > at && !after_dot => {
                let replacement = expand_template(goal, |name| {
                    captures
                        .iter()
                        .find(|(n, _)| n == name)
                        .map(|&(_, span)| text(span))
                        .ok_or_else(|| Error::unexpected(format!("wildcard '{}' was not captured", name)))
                })?;
                edits.push(Edit::replace(tokens[at].span.start, tokens[end - 1].span.end, replacement));
                at = end;
            }
            _ => at += 1,
        }
    }

    debug!(pattern, matches = edits.len(), "restructuring");
    Ok(splice(source, edits))
}

// ============================================================================
// extract_variable
// ============================================================================

fn extract_variable(source: &str, start: usize, end: usize, new_name: &str) -> Result<String> {
    check_identifier(new_name)?;
    if start >= end || end > source.len() || !source.is_char_boundary(start) || !source.is_char_boundary(end) {
        return Err(Error::invalid_argument(format!("invalid offset range {}-{}", start, end)));
    }
    let selected = &source[start..end];
    let start = start + (selected.len() - selected.trim_start().len());
    let end = end - (selected.len() - selected.trim_end().len());
    if start >= end {
        return Err(Error::invalid_argument("selection is empty"));
    }
    let text = &source[start..end];

    let tokens = tokenize(source)?;
    let first = tokens.iter().position(|t| !is_layout(t) && t.span.start == start);
    let last = tokens.iter().position(|t| !is_layout(t) && t.span.end == end);
    let (Some(first), Some(_)) = (first, last) else {
        return Err(Error::refactor_failed("selection does not cover whole tokens"));
    };
    parse_expression(text)
        .map_err(|e| Error::refactor_failed(format!("'{}' is not an expression", text)).set_source(e))?;

    let head = (0..=first)
        .rev()
        .find(|&i| starts_logical_line(&tokens, i))
        .unwrap_or(0);
    let clause = [Keyword::Elif, Keyword::Else, Keyword::Except, Keyword::Finally];
    if clause.iter().any(|&k| tokens[head].kind.is_keyword(k)) {
        return Err(Error::refactor_failed(
            "cannot extract from an elif, else, except or finally clause",
        ));
    }

    let at = line_start(source, tokens[head].span.start);
    let indent = leading_whitespace(&source[at..]);
    let edits = vec![
        Edit::insert(at, format!("{}{} = {}\n", indent, new_name, text)),
        Edit::replace(start, end, new_name),
    ];
    debug!(new_name, expression = text, "extracting variable");
    Ok(splice(source, edits))
}

// ============================================================================
// introduce_parameter
// ============================================================================

/// Token range of the atom under the cursor. Names extend over the
/// surrounding `a.b.c` chain, stopping before a method call.
fn atom_extent(tokens: &[Token], at: usize) -> Result<(usize, usize)> {
    match &tokens[at].kind {
        TokenKind::Name(_) => {
            let is_name_at = |i: usize| matches!(tokens.get(i).map(|t| &t.kind), Some(TokenKind::Name(_)));
            let mut first = at;
            while first >= 2 && tokens[first - 1].kind.is_op(".") && is_name_at(first - 2) {
                first -= 2;
            }
            let mut last = at;
            while tokens.get(last + 1).is_some_and(|t| t.kind.is_op("."))
                && is_name_at(last + 2)
                && !tokens.get(last + 3).is_some_and(|t| t.kind.is_op("("))
            {
                last += 2;
            }
            Ok((first, last))
        }
        TokenKind::Int(_)
        | TokenKind::Float(_)
        | TokenKind::Imaginary(_)
        | TokenKind::Str(_)
        | TokenKind::Bytes(_)
        | TokenKind::FString(_)
        | TokenKind::Keyword(Keyword::True | Keyword::False | Keyword::None) => Ok((at, at)),
        kind => Err(Error::refactor_failed(format!("cannot turn {} into a parameter", kind))),
    }
}

fn introduce_parameter(source: &str, offset: usize, parameter: &str) -> Result<String> {
    check_identifier(parameter)?;
    let tokens = tokenize(source)?;
    let at = tokens
        .iter()
        .position(|t| !is_layout(t) && t.span.start <= offset && offset < t.span.end)
        .ok_or_else(|| Error::invalid_argument(format!("offset {} is not on an expression", offset)))?;
    let (first, last) = atom_extent(&tokens, at)?;

    let def_index = (0..first)
        .rev()
        .filter(|&i| tokens[i].kind.is_keyword(Keyword::Def))
        .find(|&i| block_end(&tokens, i) > last)
        .ok_or_else(|| Error::refactor_failed(format!("offset {} is not inside a function", offset)))?;
    let open = def_index + 2;
    let close = closing(&tokens, open)
        .filter(|_| tokens[open].kind.is_op("("))
        .map(|end| end - 1)
        .ok_or_else(|| Error::unexpected("function has no parameter list"))?;
    if first <= close {
        return Err(Error::refactor_failed("the selection is part of the function header"));
    }

    let module = parse_module(source)?;
    let def_line = tokens[def_index].span.line;
    let Some((function, _)) = statement_at(&module.body, def_line) else {
        return Err(Error::unexpected("function statement not found"));
    };
    let StmtKind::FunctionDef { params, .. } = &function.kind else {
        return Err(Error::unexpected("function statement not found"));
    };
    if params.kwarg.is_some() {
        return Err(Error::refactor_failed("cannot add a parameter after **kwargs"));
    }
    if parameter_names(params).iter().any(|n| n == parameter) {
        return Err(Error::invalid_argument(format!("parameter '{}' already exists", parameter)));
    }

    let atom = &source[tokens[first].span.start..tokens[last].span.end];
    let declaration = format!("{}={}", parameter, atom);
    let declaration = if close == open + 1 {
        declaration
    } else if tokens[close - 1].kind.is_op(",") {
        format!(" {}", declaration)
    } else {
        format!(", {}", declaration)
    };

    let edits = vec![
        Edit::insert(tokens[close].span.start, declaration),
        Edit::replace(tokens[first].span.start, tokens[last].span.end, parameter),
    ];
    debug!(parameter, default = atom, "introducing parameter");
    Ok(splice(source, edits))
}

#[cfg(test)]
mod tests {
    use super::*;
    use codesmith_error::ErrorKind;

    fn run(code: &str, op: &str, params: RefactorParams) -> Result<String> {
        refactor(code, op, &params)
    }

    #[test]
    fn test_operation_names() {
        for op in RefactorOperation::ALL {
            assert_eq!(op.as_str().parse::<RefactorOperation>().unwrap(), op);
        }
        let err = run("x = 1\n", "reformat", RefactorParams::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert_eq!(err.message(), "unsupported refactor type: reformat");
    }

    #[test]
    fn test_missing_parameter_and_parse_error() {
        let params = RefactorParams { old_name: Some("x".into()), ..Default::default() };
        let err = run("x = 1\n", "rename", params).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(err.message(), "missing required parameter 'new_name'");

        let err = run("def f(:\n", "rename", RefactorParams::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseFailed);
    }

    #[test]
    fn test_params_from_json() {
        let params: RefactorParams =
            serde_json::from_str(r#"{"start_line": 2, "end_line": 3, "new_name": "helper"}"#).unwrap();
        assert_eq!(params.start_line, Some(2));
        assert_eq!(params.new_name.as_deref(), Some("helper"));
        assert!(params.old_name.is_none());
    }

    #[test]
    fn test_scratch_project_is_removed() {
        let project = ScratchProject::create("x = 1\n").unwrap();
        let root = project.root().to_path_buf();
        assert!(project.module_path().exists());
        drop(project);
        assert!(!root.exists());
    }

    #[test]
    fn test_rename() {
        let code = "def total(xs):\n    # total of xs\n    return sum(xs)  # xs\n\nprint(total([1]), 'total')\n";
        let params = RefactorParams {
            old_name: Some("total".into()),
            new_name: Some("grand_total".into()),
            ..Default::default()
        };
        assert_eq!(
            run(code, "rename", params).unwrap(),
            "def grand_total(xs):\n    # total of xs\n    return sum(xs)  # xs\n\nprint(grand_total([1]), 'total')\n"
        );

        let unknown = RefactorParams {
            old_name: Some("missing".into()),
            new_name: Some("other".into()),
            ..Default::default()
        };
        assert_eq!(run(code, "rename", unknown).unwrap(), code);

        let keyword = RefactorParams {
            old_name: Some("total".into()),
            new_name: Some("class".into()),
            ..Default::default()
        };
        assert_eq!(run(code, "rename", keyword).unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    fn extract(code: &str, start: usize, end: usize) -> Result<String> {
        let params = RefactorParams {
            start_line: Some(start),
            end_line: Some(end),
            new_name: Some("compute".into()),
            ..Default::default()
        };
        run(code, "extract_method", params)
    }

    #[test]
    fn test_extract_method() {
        let code = "def main():\n    a = 1\n    b = a + 2\n    print(b)\n\n\nmain()\n";
        assert_eq!(
            extract(code, 3, 3).unwrap(),
            "def main():\n    a = 1\n    b = compute(a)\n    print(b)\n\n\ndef compute(a):\n    b = a + 2\n    return b\n\n\nmain()\n"
        );
    }

    #[test]
    fn test_extract_method_at_end_of_file() {
        let code = "def report(items):\n    for item in items:\n        print(item)\n    print('done')";
        assert_eq!(
            extract(code, 2, 3).unwrap(),
            "def report(items):\n    compute(items)\n    print('done')\n\n\ndef compute(items):\n    for item in items:\n        print(item)\n"
        );
    }

    #[test]
    fn test_extract_method_rejections() {
        let code = "def f(x):\n    if x:\n        return 1\n    return 2\n";
        assert_eq!(extract(code, 2, 3).unwrap_err().kind(), ErrorKind::RefactorFailed);
        // Half of the if statement
        assert_eq!(extract(code, 2, 2).unwrap_err().kind(), ErrorKind::RefactorFailed);
        // Not inside a function
        assert_eq!(extract("x = 1\ny = 2\n", 1, 1).unwrap_err().kind(), ErrorKind::RefactorFailed);
        assert_eq!(extract(code, 3, 9).unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_move_module() {
        let mut project = ScratchProject::create("VALUE = 1\n").unwrap();
        let target = project.relocate_module("pkg/sub").unwrap();
        assert_eq!(target, project.root().join("pkg").join("sub").join(MODULE_FILE));
        assert!(project.root().join("pkg").join("__init__.py").exists());
        assert!(project.root().join("pkg").join("sub").join("__init__.py").exists());
        assert!(!project.root().join(MODULE_FILE).exists());
        assert_eq!(project.read_module().unwrap(), "VALUE = 1\n");

        for bad in ["/abs", "../up", ""] {
            let err = project.relocate_module(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{}", bad);
        }

        let params = RefactorParams { destination: Some("lib.util".into()), ..Default::default() };
        assert_eq!(run("VALUE = 1\n", "move_module", params).unwrap(), "VALUE = 1\n");
    }

    fn inline(code: &str, line: usize) -> Result<String> {
        run(code, "inline", RefactorParams { line: Some(line), ..Default::default() })
    }

    #[test]
    fn test_inline() {
        let code = "def area(r):\n    pi = 3.14 + 0.0015\n    return pi * r * r\n";
        assert_eq!(inline(code, 2).unwrap(), "def area(r):\n    return (3.14 + 0.0015) * r * r\n");

        assert_eq!(inline("total = compute()\nprint(total)\n", 1).unwrap(), "print(compute())\n");
        assert_eq!(
            inline("if flag:\n    y = 2\nprint(y)\n", 2).unwrap(),
            "if flag:\n    pass\nprint(2)\n"
        );
    }

    #[test]
    fn test_inline_rejections() {
        let err = inline("x = 1\nx = 2\nprint(x)\n", 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RefactorFailed);
        assert_eq!(inline("a, b = 1, 2\n", 1).unwrap_err().kind(), ErrorKind::RefactorFailed);
        assert_eq!(inline("x = 1\n", 5).unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    fn restructure_with(code: &str, pattern: &str, goal: &str) -> Result<String> {
        let params = RefactorParams {
            pattern: Some(pattern.into()),
            goal: Some(goal.into()),
            ..Default::default()
        };
        run(code, "restructure", params)
    }

    #[test]
    fn test_restructure() {
        let code = "a = pow(x, 2)\nb = pow(y.z, 3)\nc = math.pow(q, 2)\nd = pow(obj.attr[0], 2)\n";
        assert_eq!(
            restructure_with(code, "pow(${base}, 2)", "${base} ** 2").unwrap(),
            "a = x ** 2\nb = pow(y.z, 3)\nc = math.pow(q, 2)\nd = obj.attr[0] ** 2\n"
        );
    }

    #[test]
    fn test_restructure_repeated_wildcard() {
        let code = "y = n + n\nz = n + m\n";
        assert_eq!(
            restructure_with(code, "${a} + ${a}", "2 * ${a}").unwrap(),
            "y = 2 * n\nz = n + m\n"
        );
        let err = restructure_with(code, "f(${a})", "g(${b})").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    fn extract_variable_at(code: &str, selection: &str, name: &str) -> Result<String> {
        let start = code.find(selection).unwrap();
        let params = RefactorParams {
            start_offset: Some(start),
            end_offset: Some(start + selection.len()),
            new_name: Some(name.into()),
            ..Default::default()
        };
        run(code, "extract_variable", params)
    }

    #[test]
    fn test_extract_variable() {
        let code = "def f(w, h):\n    return w * h + 10\n";
        assert_eq!(
            extract_variable_at(code, "w * h", "area").unwrap(),
            "def f(w, h):\n    area = w * h\n    return area + 10\n"
        );
        // Ends inside the `10` token
        let err = extract_variable_at(code, "h + 1", "part").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RefactorFailed);
        let err = extract_variable_at("if a:\n    pass\nelif b + 1:\n    pass\n", "b + 1", "c").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RefactorFailed);
    }

    fn introduce(code: &str, target: &str, parameter: &str) -> Result<String> {
        let params = RefactorParams {
            offset: Some(code.find(target).unwrap()),
            parameter: Some(parameter.into()),
            ..Default::default()
        };
        run(code, "introduce_parameter", params)
    }

    #[test]
    fn test_introduce_parameter() {
        let code = "def greet(name):\n    return 'Hello, ' + name\n";
        assert_eq!(
            introduce(code, "'Hello, '", "greeting").unwrap(),
            "def greet(name, greeting='Hello, '):\n    return greeting + name\n"
        );
        assert_eq!(
            introduce("def f():\n    return 42\n", "42", "answer").unwrap(),
            "def f(answer=42):\n    return answer\n"
        );
        assert_eq!(
            introduce("def f(a,):\n    return config.limit\n", "limit", "limit").unwrap(),
            "def f(a, limit=config.limit):\n    return limit\n"
        );
    }

    #[test]
    fn test_introduce_parameter_rejections() {
        assert_eq!(introduce("x = 42\n", "42", "p").unwrap_err().kind(), ErrorKind::RefactorFailed);
        let code = "def greet(name):\n    return 'Hi' + name\n";
        assert_eq!(introduce(code, "'Hi'", "name").unwrap_err().kind(), ErrorKind::InvalidArgument);
        let code = "def f(**kw):\n    return 1\n";
        assert_eq!(introduce(code, "1", "one").unwrap_err().kind(), ErrorKind::RefactorFailed);
    }
}
