//! # Codesmith CLI
//!
//! Command-line Python coding assistant.
//!
//! Usage:
//!   codesmith generate --prompt <PROMPT> [--api-key <KEY>]
//!   codesmith analyze --code <CODE>
//!   codesmith refactor --code <CODE> --refactor-type <TYPE> [params...]
//!   codesmith optimize --code <CODE> [--commit --file-path <PATH>]
//!   codesmith improve --prompt <PROMPT> [--iterations N]
//!   codesmith test
//!   codesmith config --set <KEY> <VALUE> | --get <KEY> | --list
//!
//! Examples:
//!   codesmith optimize --code "for i in range(10):\n    print(i)"
//!   codesmith refactor --code "x = 1\nprint(x)" --refactor-type rename --old-name x --new-name y
//!   codesmith config --set model gpt-4o

use clap::{Args, Parser, Subcommand};
use codesmith_assistant::{
    run_self_checks, Assistant, ImproveRequest, ImproveRound, Settings, SettingsManager,
};
use codesmith_engine::{generate, Issue, LlmProvider, RefactorParams};
use codesmith_error::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "codesmith")]
#[command(author, version, about = "Codesmith - AI coding assistant for Python")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Debug logging on stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate code from a prompt
    Generate {
        /// Code generation prompt
        #[arg(long)]
        prompt: String,

        /// API key (defaults to the config file, then the environment)
        #[arg(long)]
        api_key: Option<String>,

        /// Existing code or notes passed as context
        #[arg(long, default_value = "")]
        context: String,

        /// Target language
        #[arg(long, default_value = "python")]
        language: String,

        /// Model override
        #[arg(long)]
        model: Option<String>,
    },
    /// Analyze code for errors and warnings
    Analyze {
        /// Code to analyze; `\n` sequences become newlines
        #[arg(long)]
        code: String,

        /// Print issues as JSON
        #[arg(long)]
        json: bool,
    },
    /// Refactor code
    Refactor {
        /// Code to refactor; `\n` sequences become newlines
        #[arg(long)]
        code: String,

        /// rename, extract_method, move_module, inline, restructure,
        /// extract_variable or introduce_parameter
        #[arg(long)]
        refactor_type: String,

        #[command(flatten)]
        params: RefactorArgs,
    },
    /// Apply rewrite rules to code
    Optimize {
        /// Code to optimize; `\n` sequences become newlines
        #[arg(long)]
        code: String,

        /// Commit the optimized code to git
        #[arg(long)]
        commit: bool,

        /// File the optimized code is written to before committing
        #[arg(long)]
        file_path: Option<PathBuf>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate, analyze, refactor and optimize code over several rounds
    Improve {
        /// Initial code generation prompt
        #[arg(long)]
        prompt: String,

        /// API key (defaults to the config file, then the environment)
        #[arg(long)]
        api_key: Option<String>,

        /// Number of improvement rounds
        #[arg(long, default_value = "3")]
        iterations: usize,

        /// Name to rename each round (with --new-name)
        #[arg(long, requires = "new_name")]
        old_name: Option<String>,

        /// Replacement name (with --old-name)
        #[arg(long, requires = "old_name")]
        new_name: Option<String>,

        /// Commit the final code to git
        #[arg(long)]
        commit: bool,

        /// File the final code is written to before committing
        #[arg(long)]
        file_path: Option<PathBuf>,
    },
    /// Run the built-in self-checks
    Test,
    /// Manage configuration
    Config {
        /// Set a configuration value
        #[arg(long, num_args = 2, value_names = ["KEY", "VALUE"])]
        set: Option<Vec<String>>,

        /// Get a configuration value
        #[arg(long, value_name = "KEY")]
        get: Option<String>,

        /// List all configuration values
        #[arg(long)]
        list: bool,
    },
}

/// Arguments read by the individual refactorings.
#[derive(Args)]
struct RefactorArgs {
    /// Name to rename (rename)
    #[arg(long)]
    old_name: Option<String>,

    /// New name (rename, extract_method, extract_variable)
    #[arg(long)]
    new_name: Option<String>,

    /// First line of the range (extract_method)
    #[arg(long)]
    start_line: Option<usize>,

    /// Last line of the range (extract_method)
    #[arg(long)]
    end_line: Option<usize>,

    /// Destination module path (move_module)
    #[arg(long)]
    destination: Option<String>,

    /// Line of the assignment to inline (inline)
    #[arg(long)]
    line: Option<usize>,

    /// Pattern with ${wildcards} (restructure)
    #[arg(long)]
    pattern: Option<String>,

    /// Replacement template (restructure)
    #[arg(long)]
    goal: Option<String>,

    /// Selection start offset (extract_variable)
    #[arg(long)]
    start_offset: Option<usize>,

    /// Selection end offset (extract_variable)
    #[arg(long)]
    end_offset: Option<usize>,

    /// Offset of the expression to turn into a parameter (introduce_parameter)
    #[arg(long)]
    offset: Option<usize>,

    /// Parameter name (introduce_parameter)
    #[arg(long)]
    parameter: Option<String>,
}

impl From<RefactorArgs> for RefactorParams {
    fn from(args: RefactorArgs) -> Self {
        Self {
            old_name: args.old_name,
            new_name: args.new_name,
            start_line: args.start_line,
            end_line: args.end_line,
            destination: args.destination,
            line: args.line,
            pattern: args.pattern,
            goal: args.goal,
            start_offset: args.start_offset,
            end_offset: args.end_offset,
            offset: args.offset,
            parameter: args.parameter,
        }
    }
}

/// Turn literal `\n` sequences typed on the command line into newlines.
fn unescape_newlines(code: &str) -> String {
    code.replace("\\n", "\n")
}

fn print_issues(issues: &[Issue]) {
    println!("\nAnalysis Results:");
    for issue in issues {
        println!("{} at line {}: {}", issue.kind, issue.line, issue.message);
    }
}

fn print_round(round: &ImproveRound, total: usize) {
    println!("\nIteration {}/{}", round.iteration, total);
    println!("\nGenerated Code:");
    println!("{}", round.generated.code);
    print_issues(&round.issues);
    if let Some(refactored) = &round.refactored {
        println!("\nRefactored Code:");
        println!("{}", refactored);
    }
    println!("\nOptimized Code:");
    println!("{}", round.code);
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| {
        Error::serialization_failed(e.to_string())
            .with_operation("cli::to_json")
            .set_source(e)
    })
}

fn current_dir() -> Result<PathBuf> {
    Ok(std::env::current_dir()?)
}

fn require_file_path(file_path: Option<&Path>) -> Result<&Path> {
    file_path.ok_or_else(|| Error::missing_parameter("file_path").with_operation("cli::commit"))
}

async fn run_generate(
    assistant: &Assistant,
    prompt: String,
    api_key: Option<&str>,
    context: String,
    language: String,
    model: Option<String>,
) -> Result<()> {
    let provider = assistant.provider(api_key)?;
    let mut request = assistant
        .generate_request(prompt)
        .with_context(context)
        .with_language(language);
    if let Some(model) = model {
        request = request.with_model(model);
    }
    let generated = generate(&provider, &request).await?;

    println!("\nGenerated Code:");
    println!("{}", generated.code);
    println!("\nExplanation:");
    println!("{}", generated.explanation);
    if !generated.suggestions.is_empty() {
        println!("\nSuggestions:");
        for suggestion in &generated.suggestions {
            println!("- {}", suggestion);
        }
    }
    Ok(())
}

async fn run_analyze(assistant: &Assistant, code: &str, json: bool) -> Result<()> {
    let issues = assistant.analyze(&unescape_newlines(code)).await?;
    if json {
        println!("{}", to_json(&issues)?);
        return Ok(());
    }
    print_issues(&issues);
    println!("\nTotal issues found: {}", issues.len());
    Ok(())
}

fn run_refactor(assistant: &Assistant, code: &str, refactor_type: &str, params: RefactorArgs) -> Result<()> {
    let refactored = assistant.refactor(&unescape_newlines(code), refactor_type, &params.into())?;
    println!("\nRefactored Code:");
    println!("{}", refactored);
    Ok(())
}

fn run_optimize(assistant: &Assistant, code: &str, commit: bool, file_path: Option<&Path>, json: bool) -> Result<()> {
    let result = assistant.optimize(&unescape_newlines(code))?;
    if json {
        println!("{}", to_json(&result)?);
    } else {
        println!("\nOriginal Code:");
        println!("{}", result.original_code);
        println!("\nOptimized Code:");
        println!("{}", result.optimized_code);
        println!("\nOptimizations applied:");
        for optimization in &result.optimizations {
            println!("- {}", optimization);
        }
    }

    if assistant.should_commit(commit) {
        let file_path = require_file_path(file_path)?;
        let message = assistant.commit_message("Optimized code", file_path);
        assistant.commit_file(&current_dir()?, file_path, &result.optimized_code, &message)?;
        println!("\nCommitted: {}", message);
    }
    Ok(())
}

async fn run_improve(
    assistant: &Assistant,
    request: ImproveRequest,
    api_key: Option<&str>,
    commit: bool,
    file_path: Option<&Path>,
) -> Result<()> {
    let provider = assistant.provider(api_key)?;
    let total = request.iterations;
    let outcome = assistant
        .improve(&provider, &request, |round| print_round(round, total))
        .await?;

    println!("\nFinal Improved Code:");
    println!("{}", outcome.final_code);
    println!(
        "\nModel calls: {} ({} tokens, {})",
        outcome.usage.calls,
        outcome.usage.total_tokens(),
        provider.default_model()
    );

    if assistant.should_commit(commit) {
        let file_path = require_file_path(file_path)?;
        let message = format!(
            "{} after {} iterations",
            assistant.commit_message("Improved code", file_path),
            total
        );
        assistant.commit_file(&current_dir()?, file_path, &outcome.final_code, &message)?;
        println!("\nCommitted: {}", message);
    }
    Ok(())
}

async fn run_tests() -> bool {
    let report = run_self_checks().await;
    for result in &report.results {
        println!("{}", result);
    }
    println!(
        "\nRan {} checks: {} passed, {} failed",
        report.results.len(),
        report.passed(),
        report.failed()
    );
    report.success()
}

fn run_config(manager: &SettingsManager, set: Option<Vec<String>>, get: Option<String>, list: bool) -> Result<()> {
    if let Some(pair) = set {
        let [key, value] = pair.as_slice() else {
            return Err(Error::invalid_argument("--set takes KEY VALUE"));
        };
        manager.update(key, value)?;
        println!("Set {} in {}", key, manager.path().display());
    }
    if let Some(key) = get {
        if let Some(value) = manager.load()?.get(&key)? {
            println!("{}", value);
        }
    }
    if list {
        for (key, value) in manager.load()?.list() {
            println!("{} = {}", key, value);
        }
    }
    Ok(())
}

/// Run one subcommand. `Ok(false)` means the self-checks failed.
async fn run(command: Commands, manager: &SettingsManager, settings: Settings) -> Result<bool> {
    let assistant = Assistant::new(settings);
    match command {
        Commands::Generate { prompt, api_key, context, language, model } => {
            run_generate(&assistant, prompt, api_key.as_deref(), context, language, model).await?
        }
        Commands::Analyze { code, json } => run_analyze(&assistant, &code, json).await?,
        Commands::Refactor { code, refactor_type, params } => {
            run_refactor(&assistant, &code, &refactor_type, params)?
        }
        Commands::Optimize { code, commit, file_path, json } => {
            run_optimize(&assistant, &code, commit, file_path.as_deref(), json)?
        }
        Commands::Improve { prompt, api_key, iterations, old_name, new_name, commit, file_path } => {
            let mut request = ImproveRequest::new(prompt, iterations);
            if let (Some(old_name), Some(new_name)) = (old_name, new_name) {
                request = request.with_rename(old_name, new_name);
            }
            run_improve(&assistant, request, api_key.as_deref(), commit, file_path.as_deref()).await?
        }
        Commands::Test => return Ok(run_tests().await),
        Commands::Config { set, get, list } => run_config(manager, set, get, list)?,
    }
    Ok(true)
}

/// The line shown to the user when a command fails.
fn failure_message(e: &Error) -> String {
    if e.is_retryable() {
        format!("An error occurred: {} (temporary, try again)", e.message())
    } else {
        format!("An error occurred: {}", e.message())
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "codesmith=debug" } else { "codesmith=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let Some(command) = cli.command else {
        eprintln!("Error: No command provided.");
        eprintln!("Usage: codesmith <COMMAND> [OPTIONS]");
        eprintln!("       codesmith --help");
        return ExitCode::SUCCESS;
    };

    let outcome = match SettingsManager::from_env() {
        Ok(manager) => match manager.load() {
            Ok(settings) => run(command, &manager, settings).await,
            // A broken file must stay fixable through `config --set`
            Err(e) if matches!(command, Commands::Config { .. }) => {
                tracing::warn!(error = %e, "ignoring unreadable settings");
                run(command, &manager, Settings::default()).await
            }
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(area = e.kind().area(), retryable = e.is_retryable(), "{:?}", e);
            eprintln!("{}", failure_message(&e));
            ExitCode::SUCCESS
        }
    }
}
