use crate::{ErrorKind, ErrorStatus};
use std::fmt;

/// Error returned by every fallible codesmith operation.
///
/// Besides its [`ErrorKind`] and message, an error records the operation it
/// surfaced from (`"refactor::refactor"`), ordered key/value context such as
/// the source position of a parse failure, an [`ErrorStatus`], and the
/// wrapped lower-level error if there is one.
///
/// ```rust
/// use codesmith_error::{Error, ErrorKind};
///
/// let err = Error::parse_failed("expected ':'", 3, 9)
///     .with_operation("parser::parse_module")
///     .with_operation("optimizer::optimize");
///
/// assert_eq!(err.kind(), ErrorKind::ParseFailed);
/// assert_eq!(err.operation(), "optimizer::optimize");
/// assert_eq!(err.context_value("called"), Some("parser::parse_module"));
/// assert_eq!(err.context_value("line"), Some("3"));
/// ```
pub struct Error {
    kind: ErrorKind,
    message: String,
    status: ErrorStatus,
    operation: &'static str,
    context: Vec<(&'static str, String)>,
    source: Option<anyhow::Error>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: if kind.is_transient() { ErrorStatus::Temporary } else { ErrorStatus::Permanent },
            operation: "",
            context: Vec::new(),
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human-readable part, without kind or context.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> ErrorStatus {
        self.status
    }

    /// Innermost-last operation name; empty if none was recorded.
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn context(&self) -> &[(&'static str, String)] {
        &self.context
    }

    /// First context value recorded under `key`.
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str())
    }

    pub fn source_ref(&self) -> Option<&anyhow::Error> {
        self.source.as_ref()
    }

    pub fn is_retryable(&self) -> bool {
        self.status.is_retryable()
    }

    pub fn with_status(mut self, status: ErrorStatus) -> Self {
        self.status = status;
        self
    }

    pub fn temporary(self) -> Self {
        self.with_status(ErrorStatus::Temporary)
    }

    pub fn permanent(self) -> Self {
        self.with_status(ErrorStatus::Permanent)
    }

    /// A temporary error that kept failing becomes persistent.
    pub fn persist(mut self) -> Self {
        self.status = self.status.persist();
        self
    }

    /// Record the operation the error is passing through. An earlier
    /// operation is kept in context under `called`.
    pub fn with_operation(mut self, operation: &'static str) -> Self {
        let previous = std::mem::replace(&mut self.operation, operation);
        if !previous.is_empty() && previous != operation {
            self.context.push(("called", previous.to_string()));
        }
        self
    }

    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    /// Attach the underlying error. Set at most once.
    pub fn set_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        debug_assert!(self.source.is_none(), "error source set twice");
        self.source = Some(source.into());
        self
    }

    fn write_context(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self.context.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
        write!(f, ", context {{ {} }}", pairs.join(", "))
    }
}

/// One line: `Kind (status) at operation, context { k: v } => message`
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind, self.status)?;
        if !self.operation.is_empty() {
            write!(f, " at {}", self.operation)?;
        }
        if !self.context.is_empty() {
            self.write_context(f)?;
        }
        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }
        Ok(())
    }
}

/// Several lines, including the source chain. Used when logging failures.
impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({}) at {}: {}", self.kind, self.status, self.operation, self.message)?;
        for (key, value) in &self.context {
            writeln!(f, "    {} = {}", key, value)?;
        }
        if let Some(source) = &self.source {
            for (depth, cause) in source.chain().enumerate() {
                writeln!(f, "    caused by [{}]: {}", depth, cause)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::FileNotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            _ => ErrorKind::IoFailed,
        };
        Error::new(kind, err.to_string()).with_operation("io").set_source(err)
    }
}

// Shorthands for the kinds raised most often
impl Error {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unexpected, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, message)
    }

    /// Syntax error at a 1-based line and 0-based column.
    pub fn parse_failed(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self::new(ErrorKind::ParseFailed, message)
            .with_context("line", line.to_string())
            .with_context("column", column.to_string())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn missing_parameter(name: &'static str) -> Self {
        Self::invalid_argument(format!("missing required parameter '{}'", name)).with_context("parameter", name)
    }

    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigInvalid, message)
    }

    pub fn refactor_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RefactorFailed, message)
    }

    pub fn analyzer_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AnalyzerFailed, message)
    }

    pub fn inference_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InferenceFailed, message)
    }

    pub fn repository_invalid(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::RepositoryInvalid, reason).with_context("repo_path", path)
    }

    pub fn commit_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CommitFailed, message)
    }

    pub fn serialization_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SerializationFailed, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_follows_kind() {
        let err = Error::unsupported("unsupported refactor type: shuffle");
        assert_eq!(err.status(), ErrorStatus::Permanent);
        assert!(!err.is_retryable());

        let err = Error::new(ErrorKind::NetworkFailed, "connection reset");
        assert_eq!(err.status(), ErrorStatus::Temporary);
        assert_eq!(err.persist().status(), ErrorStatus::Persistent);
    }

    #[test]
    fn test_operation_chain_goes_to_context() {
        let err = Error::new(ErrorKind::IoFailed, "write failed")
            .with_operation("refactor::write_module")
            .with_operation("refactor::write_module")
            .with_operation("refactor::refactor")
            .with_context("module", "module.py");

        assert_eq!(err.operation(), "refactor::refactor");
        assert_eq!(
            err.context(),
            [
                ("called", "refactor::write_module".to_string()),
                ("module", "module.py".to_string()),
            ]
        );
        assert_eq!(err.context_value("missing"), None);
    }

    #[test]
    fn test_display_is_one_line() {
        let err = Error::parse_failed("invalid syntax", 1, 4).with_operation("parser::parse_module");
        assert_eq!(
            err.to_string(),
            "ParseFailed (permanent) at parser::parse_module, context { line: 1, column: 4 } => invalid syntax"
        );
        assert_eq!(Error::unexpected("boom").to_string(), "Unexpected (permanent) => boom");
    }

    #[test]
    fn test_debug_lists_causes() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = Error::commit_failed("could not write index").set_source(io);
        let debug = format!("{:?}", err);
        assert!(debug.starts_with("CommitFailed (permanent) at : could not write index"));
        assert!(debug.contains("caused by [0]: disk full"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_shorthands() {
        let err = Error::missing_parameter("new_name");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(err.message(), "missing required parameter 'new_name'");
        assert_eq!(err.context_value("parameter"), Some("new_name"));

        let err = Error::repository_invalid("/tmp/nowhere", "not a git repository");
        assert_eq!(err.kind(), ErrorKind::RepositoryInvalid);
        assert_eq!(err.context_value("repo_path"), Some("/tmp/nowhere"));
    }

    #[test]
    fn test_from_io_error() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
        assert_eq!(err.operation(), "io");

        let err: Error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(err.source_ref().is_some());
    }
}
