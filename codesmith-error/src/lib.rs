//! # codesmith-error
//!
//! The one error type shared by every codesmith crate.
//!
//! - [`ErrorKind`] says what failed, for matching
//! - [`ErrorStatus`] says whether trying again could help
//! - operation and context say where, and with which inputs
//! - the source keeps the wrapped library error without exposing its type
//!
//! ```rust
//! use codesmith_error::{Error, ErrorKind, Result};
//!
//! fn load(path: &str) -> Result<String> {
//!     std::fs::read_to_string(path)
//!         .map_err(|e| Error::from(e).with_operation("settings::load").with_context("path", path))
//! }
//!
//! let err = load("/definitely/not/here.toml").unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::FileNotFound);
//! ```
//!
//! Nothing in codesmith retries. The status is advice for embedding callers.

mod error;
mod kind;
mod status;

pub use error::Error;
pub use kind::ErrorKind;
pub use status::ErrorStatus;

pub type Result<T> = std::result::Result<T, Error>;
