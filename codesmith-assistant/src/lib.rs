//! # Codesmith assistant
//!
//! Ties the engine operations to the user's configuration:
//! 1. [`SettingsManager`] loads `~/.codesmith/config.toml` (or `$CODESMITH_CONFIG`)
//! 2. [`Assistant`] picks the provider, analyzer and commit policy from it
//! 3. [`Assistant::improve`] runs generate, analyze, rename and optimize in rounds
//! 4. [`run_self_checks`] backs `codesmith test`

mod assistant;
pub mod selfcheck;
pub mod settings;

pub use assistant::{AnyProvider, Assistant, ImproveOutcome, ImproveRequest, ImproveRound};
pub use selfcheck::{run_self_checks, CheckResult, SelfCheckReport};
pub use settings::{AnalyzerBackend, Settings, SettingsManager};
