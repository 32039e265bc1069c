//! Assistant implementation - runs engine operations under the user's settings

use crate::settings::{AnalyzerBackend, Settings};
use codesmith_engine::analyzer::SYNTAX_ERROR_PREFIX;
use codesmith_engine::{
    analyze, generate_with_response, optimize, refactor, AnthropicProvider, BuiltinAnalyzer,
    CompletionRequest, CompletionResponse, GenerateRequest, GeneratedCode, Issue, LlmProvider,
    OpenAIProvider, OptimizationResult, ProviderError, ProviderType, PylintAnalyzer,
    RefactorParams, UsageTracker,
};
use codesmith_error::{ErrorKind, Result};
use std::path::Path;
use tracing::{debug, info, warn};

/// A provider chosen at runtime from [`Settings::provider`].
pub enum AnyProvider {
    OpenAI(OpenAIProvider),
    Anthropic(AnthropicProvider),
}

impl LlmProvider for AnyProvider {
    fn name(&self) -> &str {
        match self {
            Self::OpenAI(p) => p.name(),
            Self::Anthropic(p) => p.name(),
        }
    }

    fn default_model(&self) -> &str {
        match self {
            Self::OpenAI(p) => p.default_model(),
            Self::Anthropic(p) => p.default_model(),
        }
    }

    async fn complete(&self, request: CompletionRequest) -> std::result::Result<CompletionResponse, ProviderError> {
        match self {
            Self::OpenAI(p) => p.complete(request).await,
            Self::Anthropic(p) => p.complete(request).await,
        }
    }
}

/// Input to [`Assistant::improve`].
#[derive(Debug, Clone)]
pub struct ImproveRequest {
    pub prompt: String,
    pub iterations: usize,
    /// `(old_name, new_name)` applied with the rename refactoring each round
    pub rename: Option<(String, String)>,
}

impl ImproveRequest {
    pub fn new(prompt: impl Into<String>, iterations: usize) -> Self {
        Self {
            prompt: prompt.into(),
            iterations,
            rename: None,
        }
    }

    pub fn with_rename(mut self, old_name: impl Into<String>, new_name: impl Into<String>) -> Self {
        self.rename = Some((old_name.into(), new_name.into()));
        self
    }
}

/// What one improvement round produced.
#[derive(Debug, Clone)]
pub struct ImproveRound {
    /// 1-based
    pub iteration: usize,
    pub generated: GeneratedCode,
    pub issues: Vec<Issue>,
    /// Code after the rename, when one ran
    pub refactored: Option<String>,
    /// Empty when the round's code had a syntax error and optimization was skipped
    pub optimizations: Vec<String>,
    /// Code carried into the next round
    pub code: String,
}

/// Result from [`Assistant::improve`]
#[derive(Debug, Clone)]
pub struct ImproveOutcome {
    pub rounds: Vec<ImproveRound>,
    pub final_code: String,
    pub usage: UsageTracker,
}

/// Runs engine operations with the models, analyzer and commit policy from
/// [`Settings`].
#[derive(Debug, Clone, Default)]
pub struct Assistant {
    settings: Settings,
}

impl Assistant {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Build the configured provider, resolving the API key from `api_key`,
    /// the settings file, or the environment.
    pub fn provider(&self, api_key: Option<&str>) -> Result<AnyProvider> {
        let key = self.settings.resolve_api_key(api_key)?;
        let config = self.settings.provider_config(key);
        let provider = match self.settings.provider {
            ProviderType::OpenAI => AnyProvider::OpenAI(OpenAIProvider::new(config)?),
            ProviderType::Anthropic => AnyProvider::Anthropic(AnthropicProvider::new(config)?),
        };
        debug!(provider = provider.name(), model = provider.default_model(), "provider ready");
        Ok(provider)
    }

    /// A generation request carrying the configured model and sampling.
    pub fn generate_request(&self, prompt: impl Into<String>) -> GenerateRequest {
        GenerateRequest::new(prompt)
            .with_model(&self.settings.model)
            .with_sampling(self.settings.temperature, self.settings.max_tokens)
    }

    /// Analyze with the configured backend. An unusable `pylint` degrades to
    /// the built-in checker.
    pub async fn analyze(&self, code: &str) -> Result<Vec<Issue>> {
        match self.settings.analyzer {
            AnalyzerBackend::Builtin => analyze(&BuiltinAnalyzer, code).await,
            AnalyzerBackend::Pylint => {
                let pylint = PylintAnalyzer::with_args(self.settings.pylint_args.clone());
                match analyze(&pylint, code).await {
                    Err(e) if e.kind() == ErrorKind::AnalyzerFailed => {
                        warn!(error = %e, "pylint unavailable, falling back to the built-in analyzer");
                        analyze(&BuiltinAnalyzer, code).await
                    }
                    result => result,
                }
            }
        }
    }

    pub fn refactor(&self, code: &str, refactor_type: &str, params: &RefactorParams) -> Result<String> {
        refactor(code, refactor_type, params)
    }

    pub fn optimize(&self, code: &str) -> Result<OptimizationResult> {
        optimize(code)
    }

    /// Whether results should be committed: the explicit flag or the
    /// `git_auto_commit` setting.
    pub fn should_commit(&self, flag: bool) -> bool {
        flag || self.settings.git_auto_commit
    }

    /// Commit message for `action` on `file_path`, from the configured template.
    pub fn commit_message(&self, action: &str, file_path: &Path) -> String {
        self.settings.commit_message(action, &file_path.display().to_string())
    }

    /// Write `code` to `file_path` and commit it in the repository at
    /// `repo_path`.
    pub fn commit_file(&self, repo_path: &Path, file_path: &Path, code: &str, message: &str) -> Result<git2::Oid> {
        let target = if file_path.is_absolute() {
            file_path.to_path_buf()
        } else {
            repo_path.join(file_path)
        };
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, code)?;

        let oid = codesmith_engine::commit_improved_code(repo_path, &[&target], message)?;
        info!(%oid, file = %file_path.display(), message, "committed");
        Ok(oid)
    }

    /// Generate, analyze, optionally rename, and optimize, `iterations` times.
    ///
    /// Each round feeds the previous round's code back as context and appends
    /// it (plus any non-info issues) to the prompt. `on_round` sees every
    /// round as soon as it finishes.
    pub async fn improve<P: LlmProvider>(
        &self,
        provider: &P,
        request: &ImproveRequest,
        mut on_round: impl FnMut(&ImproveRound),
    ) -> Result<ImproveOutcome> {
        let mut prompt = request.prompt.clone();
        let mut code = String::new();
        let mut usage = UsageTracker::new();
        let mut rounds = Vec::with_capacity(request.iterations);

        for iteration in 1..=request.iterations {
            info!(iteration, total = request.iterations, "improvement round");
            let generate = self.generate_request(prompt.as_str()).with_context(code.as_str());
            let (generated, response) = generate_with_response(provider, &generate).await?;
            usage.track(&response.model, &response.usage);
            code = generated.code.clone();

            let issues = self.analyze(&code).await?;
            let broken = issues.iter().any(|i| i.message.starts_with(SYNTAX_ERROR_PREFIX));

            let mut refactored = None;
            let mut optimizations = Vec::new();
            if broken {
                warn!(iteration, "generated code has a syntax error, skipping refactor and optimize");
            } else {
                if let Some((old_name, new_name)) = &request.rename {
                    let params = RefactorParams {
                        old_name: Some(old_name.clone()),
                        new_name: Some(new_name.clone()),
                        ..RefactorParams::default()
                    };
                    code = refactor(&code, "rename", &params)?;
                    refactored = Some(code.clone());
                }
                let optimized = optimize(&code)?;
                optimizations = optimized.optimizations;
                code = optimized.optimized_code;
            }

            prompt.push_str("\nImprove the following code:\n");
            prompt.push_str(&code);
            for issue in issues.iter().filter(|i| !i.is_info()) {
                prompt.push_str(&format!("\n{}", issue));
            }

            let round = ImproveRound {
                iteration,
                generated,
                issues,
                refactored,
                optimizations,
                code: code.clone(),
            };
            on_round(&round);
            rounds.push(round);
        }

        debug!(calls = usage.calls, tokens = usage.total_tokens(), "improvement finished");
        Ok(ImproveOutcome {
            rounds,
            final_code: code,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codesmith_engine::generator::RESPONSE_TOOL;
    use codesmith_engine::provider::{FinishReason, ToolCall, Usage};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Replies with queued code bodies in order and records every request.
    struct ScriptedProvider {
        replies: Mutex<Vec<String>>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedProvider {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn user_message(&self, index: usize) -> String {
            let seen = self.seen.lock().unwrap();
            seen[index].messages[1].content.clone()
        }
    }

    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn default_model(&self) -> &str {
            "scripted-1"
        }

        async fn complete(&self, request: CompletionRequest) -> std::result::Result<CompletionResponse, ProviderError> {
            self.seen.lock().unwrap().push(request);
            let code = self
                .replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| ProviderError::Malformed("no more replies".into()))?;
            let arguments = serde_json::json!({ "code": code, "explanation": "done" }).to_string();
            Ok(CompletionResponse {
                id: "resp".into(),
                model: "scripted-1".into(),
                content: None,
                tool_calls: vec![ToolCall {
                    id: "call".into(),
                    name: RESPONSE_TOOL.into(),
                    arguments,
                }],
                finish_reason: FinishReason::ToolCalls,
                usage: Usage::new(10, 5),
            })
        }
    }

    #[tokio::test]
    async fn test_improve_feeds_code_back() {
        let provider = ScriptedProvider::new(&[
            "def fibonacci(n):\n    return 'a' + 'b'\n",
            "def fibonacci(n):\n    return n\n",
        ]);
        let request = ImproveRequest::new("write fib", 2).with_rename("fibonacci", "fib_sequence");
        let mut seen_rounds = Vec::new();
        let outcome = Assistant::default()
            .improve(&provider, &request, |r| seen_rounds.push(r.iteration))
            .await
            .unwrap();

        assert_eq!(seen_rounds, [1, 2]);
        let first = &outcome.rounds[0];
        assert_eq!(
            first.refactored.as_deref(),
            Some("def fib_sequence(n):\n    return 'a' + 'b'\n")
        );
        assert_eq!(first.optimizations, ["Combined string literals"]);
        assert!(first.code.contains("'ab'"));

        // Round two gets round one's code as context and in the prompt
        let second = provider.user_message(1);
        assert!(second.starts_with(&format!("Context: {}", first.code)));
        assert!(second.ends_with(&format!("Prompt: write fib\nImprove the following code:\n{}", first.code)));

        assert_eq!(outcome.final_code, "def fib_sequence(n):\n    return n\n");
        assert_eq!(outcome.usage.calls, 2);
        assert_eq!(outcome.usage.total_tokens(), 30);
    }

    #[tokio::test]
    async fn test_improve_skips_broken_code() {
        let provider = ScriptedProvider::new(&["def broken(:\n"]);
        let outcome = Assistant::default()
            .improve(&provider, &ImproveRequest::new("x", 1).with_rename("a", "b"), |_| {})
            .await
            .unwrap();

        let round = &outcome.rounds[0];
        assert!(round.refactored.is_none());
        assert!(round.optimizations.is_empty());
        assert_eq!(outcome.final_code, "def broken(:\n");
        assert!(round.issues[0].message.starts_with(SYNTAX_ERROR_PREFIX));
    }

    #[tokio::test]
    async fn test_improve_propagates_provider_errors() {
        let provider = ScriptedProvider::new(&["x = 1\n"]);
        let err = Assistant::default()
            .improve(&provider, &ImproveRequest::new("x", 2), |_| {})
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InferenceFailed);
    }

    #[tokio::test]
    async fn test_missing_pylint_falls_back() {
        let mut settings = Settings::default();
        settings.analyzer = AnalyzerBackend::Pylint;
        settings.pylint_args = vec!["--definitely-not-pylint".into()];
        let assistant = Assistant::new(settings);
        // Missing or rejecting the flag, pylint fails to lint and the built-in checker answers
        let issues = assistant.analyze("def test(): pass").await.unwrap();
        assert_eq!(issues, [Issue::no_issues()]);
    }

    #[test]
    fn test_provider_from_settings() {
        let mut settings = Settings::default();
        settings.provider = ProviderType::Anthropic;
        let assistant = Assistant::new(settings);
        let provider = assistant.provider(Some("sk-ant-test")).unwrap();
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.default_model(), "claude-sonnet-4-20250514");
    }

    #[test]
    fn test_commit_file_uses_template() {
        let dir = TempDir::new().unwrap();
        git2::Repository::init(dir.path()).unwrap();
        let assistant = Assistant::default();

        let file = Path::new("pkg/app.py");
        let message = assistant.commit_message("Optimized code", file);
        assert_eq!(message, "Optimized code in pkg/app.py");
        let oid = assistant.commit_file(dir.path(), file, "x = 1\n", &message).unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("pkg/app.py")).unwrap(), "x = 1\n");

        let repo = git2::Repository::open(dir.path()).unwrap();
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.id(), oid);
        assert_eq!(head.message(), Some("Optimized code in pkg/app.py"));
    }

    #[test]
    fn test_generate_request_uses_settings() {
        let mut settings = Settings::default();
        settings.model = "gpt-4o".into();
        settings.max_tokens = 256;
        let request = Assistant::new(settings).generate_request("hi");
        assert_eq!(request.model.as_deref(), Some("gpt-4o"));
        assert_eq!(request.max_tokens, 256);
    }
}
