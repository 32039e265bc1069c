//! # codesmith-syntax
//!
//! Loads Python source into a syntax tree and serializes it back.
//!
//! ```rust
//! use codesmith_syntax::{parse_module, unparse};
//!
//! let module = parse_module("x=1\nif x :\n  print( x )").unwrap();
//! assert_eq!(unparse(&module), "x = 1\nif x:\n    print(x)");
//! ```

pub mod ast;
pub mod lexer;
pub mod names;
pub mod parser;
pub mod token;
pub mod unparse;
pub mod visit;

pub use ast::{Expr, Module, Stmt, StmtKind};
pub use lexer::tokenize;
pub use parser::{parse_expression, parse_module};
pub use unparse::{unparse, unparse_expr};
