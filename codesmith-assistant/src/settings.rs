//! User settings persisted as TOML
//!
//! The file lives at `$CODESMITH_CONFIG` when set, otherwise at
//! `~/.codesmith/config.toml`. A missing file means defaults.

use codesmith_engine::{ProviderConfig, ProviderType};
use codesmith_error::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

pub const CONFIG_ENV: &str = "CODESMITH_CONFIG";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_COMMIT_TEMPLATE: &str = "{action} in {file}";

/// Every key accepted by `config --set/--get`, in listing order.
pub const KEYS: &[&str] = &[
    "api_key",
    "provider",
    "base_url",
    "model",
    "max_tokens",
    "temperature",
    "timeout_secs",
    "analyzer",
    "pylint_args",
    "optimization_level",
    "git_auto_commit",
    "commit_message_template",
];

/// Which lint backend `analyze` uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerBackend {
    #[default]
    Builtin,
    Pylint,
}

impl FromStr for AnalyzerBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "builtin" => Ok(Self::Builtin),
            "pylint" => Ok(Self::Pylint),
            other => Err(Error::config_invalid(format!("unknown analyzer: {}", other))),
        }
    }
}

impl fmt::Display for AnalyzerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Builtin => "builtin",
            Self::Pylint => "pylint",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub provider: ProviderType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub analyzer: AnalyzerBackend,
    pub pylint_args: Vec<String>,
    /// 1 to 3. Recorded but not consulted by the rewrite rules.
    pub optimization_level: u8,
    pub git_auto_commit: bool,
    pub commit_message_template: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            provider: ProviderType::OpenAI,
            base_url: None,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 1000,
            temperature: 0.7,
            timeout_secs: 120,
            analyzer: AnalyzerBackend::Builtin,
            pylint_args: vec!["--disable=C0111".to_string(), "--max-line-length=100".to_string()],
            optimization_level: 2,
            git_auto_commit: false,
            commit_message_template: DEFAULT_COMMIT_TEMPLATE.to_string(),
        }
    }
}

fn invalid_value(key: &str, value: &str, expected: &str) -> Error {
    Error::config_invalid(format!("invalid value for {}: '{}' (expected {})", key, value, expected))
        .with_context("key", key)
}

fn unknown_key(key: &str) -> Error {
    Error::config_invalid(format!("unknown setting: {}", key)).with_operation("settings::lookup")
}

fn parse<T: FromStr>(key: &str, value: &str, expected: &str) -> Result<T> {
    value.trim().parse().map_err(|_| invalid_value(key, value, expected))
}

/// Show the first three and last four characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if !(1..=3).contains(&self.optimization_level) {
            return Err(invalid_value("optimization_level", &self.optimization_level.to_string(), "1, 2 or 3"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(invalid_value("temperature", &self.temperature.to_string(), "a number from 0 to 2"));
        }
        if self.max_tokens == 0 {
            return Err(invalid_value("max_tokens", "0", "a positive integer"));
        }
        if self.timeout_secs == 0 {
            return Err(invalid_value("timeout_secs", "0", "a positive integer"));
        }
        Ok(())
    }

    /// Current value of `key` as text. Unset optional keys are `None`.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let value = match key {
            "api_key" => self.api_key.clone(),
            "provider" => Some(self.provider.to_string()),
            "base_url" => self.base_url.clone(),
            "model" => Some(self.model.clone()),
            "max_tokens" => Some(self.max_tokens.to_string()),
            "temperature" => Some(self.temperature.to_string()),
            "timeout_secs" => Some(self.timeout_secs.to_string()),
            "analyzer" => Some(self.analyzer.to_string()),
            "pylint_args" => Some(self.pylint_args.join(" ")),
            "optimization_level" => Some(self.optimization_level.to_string()),
            "git_auto_commit" => Some(self.git_auto_commit.to_string()),
            "commit_message_template" => Some(self.commit_message_template.clone()),
            other => return Err(unknown_key(other)),
        };
        Ok(value)
    }

    /// Parse `value` into `key`. An empty value clears optional keys.
    ///
    /// A rejected value leaves the settings as they were.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut updated = self.clone();
        updated.assign(key, value)?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    fn assign(&mut self, key: &str, value: &str) -> Result<()> {
        let optional = |v: &str| {
            let v = v.trim();
            (!v.is_empty()).then(|| v.to_string())
        };
        match key {
            "api_key" => self.api_key = optional(value),
            "provider" => self.provider = value.trim().parse()?,
            "base_url" => self.base_url = optional(value),
            "model" => {
                self.model = optional(value).ok_or_else(|| invalid_value(key, value, "a model name"))?
            }
            "max_tokens" => self.max_tokens = parse(key, value, "a positive integer")?,
            "temperature" => self.temperature = parse(key, value, "a number from 0 to 2")?,
            "timeout_secs" => self.timeout_secs = parse(key, value, "a positive integer")?,
            "analyzer" => self.analyzer = value.trim().parse()?,
            "pylint_args" => self.pylint_args = value.split_whitespace().map(String::from).collect(),
            "optimization_level" => self.optimization_level = parse(key, value, "1, 2 or 3")?,
            "git_auto_commit" => self.git_auto_commit = parse(key, value, "true or false")?,
            "commit_message_template" => self.commit_message_template = value.to_string(),
            other => return Err(unknown_key(other)),
        }
        Ok(())
    }

    /// `(key, value)` pairs for display, with the API key masked.
    pub fn list(&self) -> Vec<(&'static str, String)> {
        KEYS.iter()
            .map(|&key| {
                let value = match key {
                    "api_key" => self.api_key.as_deref().map(mask_secret),
                    _ => self.get(key).ok().flatten(),
                };
                (key, value.unwrap_or_default())
            })
            .collect()
    }

    /// Fill the commit message template.
    pub fn commit_message(&self, action: &str, file: &str) -> String {
        self.commit_message_template
            .replace("{action}", action)
            .replace("{file}", file)
    }

    /// Resolve the API key: the explicit flag, then the settings file, then
    /// the provider's environment variable.
    pub fn resolve_api_key(&self, flag: Option<&str>) -> Result<String> {
        self.resolve_api_key_with(flag, |name| std::env::var(name).ok())
    }

    fn resolve_api_key_with(&self, flag: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Result<String> {
        let present = |key: &str| !key.trim().is_empty();
        if let Some(key) = flag.filter(|k| present(k)) {
            return Ok(key.to_string());
        }
        if let Some(key) = self.api_key.as_deref().filter(|k| present(k)) {
            return Ok(key.to_string());
        }
        let var = self.provider.api_key_env();
        env(var).filter(|k| present(k)).ok_or_else(|| {
            Error::new(
                ErrorKind::AuthenticationFailed,
                format!("no API key: pass --api-key, run `codesmith config --set api_key KEY`, or set {}", var),
            )
            .with_operation("settings::resolve_api_key")
        })
    }

    /// Provider configuration for `api_key` under these settings.
    pub fn provider_config(&self, api_key: impl Into<String>) -> ProviderConfig {
        let mut config = ProviderConfig::new(self.provider, api_key).with_timeout(self.timeout_secs);
        // The stock model name only makes sense for OpenAI
        if self.provider == ProviderType::OpenAI || self.model != DEFAULT_MODEL {
            config = config.with_model(&self.model);
        }
        if let Some(url) = &self.base_url {
            config = config.with_base_url(url);
        }
        config
    }
}

/// Loads and saves [`Settings`] at a fixed path.
#[derive(Debug, Clone)]
pub struct SettingsManager {
    path: PathBuf,
}

impl SettingsManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$CODESMITH_CONFIG`, or `~/.codesmith/config.toml`.
    pub fn from_env() -> Result<Self> {
        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
            return Ok(Self::new(path));
        }
        let home = dirs::home_dir().ok_or_else(|| {
            Error::config_invalid(format!("cannot locate the home directory; set {}", CONFIG_ENV))
        })?;
        Ok(Self::new(home.join(".codesmith").join("config.toml")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Settings> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no settings file, using defaults");
                return Ok(Settings::default());
            }
            Err(e) => return Err(Error::from(e).with_operation("settings::load")),
        };
        let settings: Settings = toml::from_str(&text).map_err(|e| {
            Error::config_invalid(format!("{}: {}", self.path.display(), e.message()))
                .with_operation("settings::load")
                .set_source(e)
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, settings: &Settings) -> Result<()> {
        settings.validate()?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(settings).map_err(|e| {
            Error::serialization_failed(e.to_string())
                .with_operation("settings::save")
                .set_source(e)
        })?;
        std::fs::write(&self.path, text)?;
        debug!(path = %self.path.display(), "saved settings");
        Ok(())
    }

    /// Load, apply `key = value`, save. Returns the updated settings.
    pub fn update(&self, key: &str, value: &str) -> Result<Settings> {
        let mut settings = self.load()?;
        settings.set(key, value)?;
        self.save(&settings)?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager() -> (TempDir, SettingsManager) {
        let dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(dir.path().join("nested").join("config.toml"));
        (dir, manager)
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let (_dir, manager) = manager();
        let settings = manager.load().unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.model, "gpt-3.5-turbo");
        assert_eq!(settings.pylint_args, ["--disable=C0111", "--max-line-length=100"]);
    }

    #[test]
    fn test_update_persists_and_creates_parents() {
        let (_dir, manager) = manager();
        manager.update("model", "gpt-4o").unwrap();
        manager.update("git_auto_commit", "true").unwrap();
        assert!(manager.path().exists());

        let loaded = manager.load().unwrap();
        assert_eq!(loaded.model, "gpt-4o");
        assert!(loaded.git_auto_commit);
        assert_eq!(loaded.get("max_tokens").unwrap().as_deref(), Some("1000"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let (_dir, manager) = manager();
        std::fs::create_dir_all(manager.path().parent().unwrap()).unwrap();
        std::fs::write(manager.path(), "provider = \"anthropic\"\nanalyzer = \"pylint\"\n").unwrap();
        let settings = manager.load().unwrap();
        assert_eq!(settings.provider, ProviderType::Anthropic);
        assert_eq!(settings.analyzer, AnalyzerBackend::Pylint);
        assert_eq!(settings.temperature, 0.7);
    }

    #[test]
    fn test_bad_file_is_config_invalid() {
        let (_dir, manager) = manager();
        std::fs::create_dir_all(manager.path().parent().unwrap()).unwrap();
        std::fs::write(manager.path(), "max_tokens = \"lots\"\n").unwrap();
        assert_eq!(manager.load().unwrap_err().kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_set_validation() {
        let mut settings = Settings::default();
        for (key, value) in [
            ("nope", "1"),
            ("max_tokens", "many"),
            ("optimization_level", "7"),
            ("provider", "cohere"),
            ("analyzer", "flake8"),
            ("git_auto_commit", "yes"),
        ] {
            let err = settings.set(key, value).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ConfigInvalid, "{} = {}", key, value);
        }

        assert_eq!(settings, Settings::default());

        settings.set("pylint_args", "--disable=W0611  --jobs=2").unwrap();
        assert_eq!(settings.pylint_args, ["--disable=W0611", "--jobs=2"]);
        settings.set("base_url", "http://localhost:8000/v1").unwrap();
        settings.set("base_url", "").unwrap();
        assert!(settings.base_url.is_none());
        assert!(settings.get("base_url").unwrap().is_none());
    }

    #[test]
    fn test_rejected_value_is_not_kept() {
        let mut settings = Settings::default();
        settings.set("optimization_level", "3").unwrap();
        let before = settings.clone();

        let err = settings.set("optimization_level", "7").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
        assert_eq!(settings, before);
        assert_eq!(settings.get("optimization_level").unwrap().as_deref(), Some("3"));

        // A later valid change is not blocked by the rejected one
        settings.set("pylint_args", "--jobs=4").unwrap();
        assert_eq!(settings.optimization_level, 3);
        assert_eq!(settings.pylint_args, ["--jobs=4"]);
    }

    #[test]
    fn test_list_masks_api_key() {
        let mut settings = Settings::default();
        settings.set("api_key", "sk-test-1234567890abcd").unwrap();
        let listed = settings.list();
        assert_eq!(listed.len(), KEYS.len());
        assert_eq!(listed[0], ("api_key", "sk-...abcd".to_string()));
        assert!(listed.iter().any(|(k, v)| *k == "model" && v == "gpt-3.5-turbo"));
        assert_eq!(mask_secret("short"), "*****");
    }

    #[test]
    fn test_api_key_resolution_order() {
        let mut settings = Settings::default();
        let env = |name: &str| (name == "OPENAI_API_KEY").then(|| "from-env".to_string());

        assert_eq!(settings.resolve_api_key_with(None, env).unwrap(), "from-env");
        settings.api_key = Some("from-file".into());
        assert_eq!(settings.resolve_api_key_with(None, env).unwrap(), "from-file");
        assert_eq!(settings.resolve_api_key_with(Some("from-flag"), env).unwrap(), "from-flag");

        settings.api_key = None;
        settings.provider = ProviderType::Anthropic;
        let err = settings.resolve_api_key_with(Some(""), env).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
        assert!(err.message().contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn test_provider_config() {
        let mut settings = Settings::default();
        let config = settings.provider_config("k");
        assert_eq!(config.model, "gpt-3.5-turbo");
        assert_eq!(config.timeout, std::time::Duration::from_secs(120));

        settings.provider = ProviderType::Anthropic;
        settings.base_url = Some("http://localhost:9000/v1".into());
        let config = settings.provider_config("k");
        assert_eq!(config.provider, ProviderType::Anthropic);
        assert_eq!(config.model, "claude-sonnet-4-20250514");
        assert_eq!(config.base_url, "http://localhost:9000/v1");

        settings.model = "claude-opus-4-1".into();
        assert_eq!(settings.provider_config("k").model, "claude-opus-4-1");
    }

    #[test]
    fn test_commit_message_template() {
        let mut settings = Settings::default();
        assert_eq!(settings.commit_message("Optimized code", "app.py"), "Optimized code in app.py");
        settings.set("commit_message_template", "[codesmith] {action}: {file}").unwrap();
        assert_eq!(settings.commit_message("Optimized code", "app.py"), "[codesmith] Optimized code: app.py");
    }
}
