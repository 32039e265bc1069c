//! What went wrong, as a closed set of kinds callers can match on

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A bug or a case nothing else covers
    Unexpected,
    /// Unknown refactoring or other operation name
    Unsupported,
    /// Settings file or `config --set` value is unusable
    ConfigInvalid,
    /// Caller passed a bad or missing argument
    InvalidArgument,

    /// Python source is not syntactically valid
    ParseFailed,
    /// Valid source, but the refactoring cannot be applied to it
    RefactorFailed,
    /// The lint backend could not run at all
    AnalyzerFailed,
    SerializationFailed,

    /// The model answered, but not with usable code
    InferenceFailed,
    /// Unknown model or unreachable backend
    ProviderUnavailable,
    RateLimited,
    /// API key missing or rejected
    AuthenticationFailed,

    /// Path is not a usable git repository
    RepositoryInvalid,
    /// Staging or committing failed
    CommitFailed,

    FileNotFound,
    PermissionDenied,
    IoFailed,
    NetworkFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        use ErrorKind::*;
        match self {
            Unexpected => "Unexpected",
            Unsupported => "Unsupported",
            ConfigInvalid => "ConfigInvalid",
            InvalidArgument => "InvalidArgument",
            ParseFailed => "ParseFailed",
            RefactorFailed => "RefactorFailed",
            AnalyzerFailed => "AnalyzerFailed",
            SerializationFailed => "SerializationFailed",
            InferenceFailed => "InferenceFailed",
            ProviderUnavailable => "ProviderUnavailable",
            RateLimited => "RateLimited",
            AuthenticationFailed => "AuthenticationFailed",
            RepositoryInvalid => "RepositoryInvalid",
            CommitFailed => "CommitFailed",
            FileNotFound => "FileNotFound",
            PermissionDenied => "PermissionDenied",
            IoFailed => "IoFailed",
            NetworkFailed => "NetworkFailed",
        }
    }

    /// Which part of the tool the failure belongs to.
    pub fn area(&self) -> &'static str {
        use ErrorKind::*;
        match self {
            Unexpected | Unsupported | ConfigInvalid | InvalidArgument => "general",
            ParseFailed | RefactorFailed | AnalyzerFailed | SerializationFailed => "source",
            InferenceFailed | ProviderUnavailable | RateLimited | AuthenticationFailed => "model",
            RepositoryInvalid | CommitFailed => "git",
            FileNotFound | PermissionDenied | IoFailed | NetworkFailed => "io",
        }
    }

    /// Kinds whose errors start out [`Temporary`](crate::ErrorStatus::Temporary).
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::NetworkFailed | ErrorKind::RateLimited)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
