//! # Codesmith engine
//!
//! The operations behind the `codesmith` CLI.
//!
//! ## Components
//! - **Optimizer**: pattern-matched AST rewrites with a log of what fired
//! - **Analyzer**: lint issues from a built-in checker or an external pylint
//! - **Refactor**: token-level refactorings run in a scratch project
//! - **Generator**: code generation through an LLM provider (OpenAI, Anthropic)
//! - **VCS**: committing results to a git repository

pub mod analyzer;
pub mod generator;
pub mod optimizer;
pub mod provider;
pub mod refactor;
pub mod vcs;

pub use analyzer::{analyze, Analyzer, BuiltinAnalyzer, Issue, IssueKind, PylintAnalyzer};
pub use generator::{generate, generate_with_response, GenerateRequest, GeneratedCode};
pub use optimizer::{optimize, OptimizationResult, Rewrite, RewriteLog};
pub use provider::{
    AnthropicProvider, ChatMessage, CompletionRequest, CompletionResponse, LlmProvider,
    OpenAIProvider, ProviderConfig, ProviderError, ProviderType, Usage, UsageTracker,
};
pub use refactor::{refactor, RefactorOperation, RefactorParams, ScratchProject};
pub use vcs::{commit_improved_code, GitRepository};
