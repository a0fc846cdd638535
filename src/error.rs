//! Unified error types for mdqa.
//!
//! Only structural problems travel through [`MdqError`]: a malformed suite, a
//! document that cannot be parsed, a cancelled run, or a collaborator failure
//! reported back to the engine. Problems inside a single check never surface
//! here; they are absorbed into that check's [`CheckResult`] with
//! [`Status::Error`].
//!
//! [`CheckResult`]: crate::model::CheckResult
//! [`Status::Error`]: crate::model::Status::Error

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for mdqa operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MdqError {
    /// A requested suite, check or run is absent from a store
    #[error("Entry not found: {kind} '{id}'")]
    EntryNotFound { kind: String, id: String },

    /// Structural failure fatal to a whole run
    #[error("Processing failed: {context}")]
    Process {
        context: String,
        #[source]
        source: ProcessErrorKind,
    },

    /// Failure evaluating a single check
    #[error("Evaluation failed: {context}")]
    Evaluation {
        context: String,
        #[source]
        source: EvaluationErrorKind,
    },

    /// File artifact store failure reported by a collaborator
    #[error("Filestore error: {0}")]
    Filestore(String),

    /// Search index failure reported by a collaborator
    #[error("Index error: {0}")]
    Index(String),

    /// Persistent store failure reported by a collaborator
    #[error("Store error: {0}")]
    Store(String),

    /// IO errors with context
    #[error("IO error at {path:?}: {message}")]
    Io {
        path: Option<PathBuf>,
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Specific structural failure kinds
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProcessErrorKind {
    #[error("Suite is malformed: {0}")]
    MalformedSuite(String),

    #[error("Document could not be parsed: {0}")]
    UnparsableDocument(String),

    #[error("Unknown document format - expected XML or JSON")]
    UnknownDocumentFormat,

    #[error("Document is {size} bytes, exceeding the {limit} byte limit")]
    DocumentTooLarge { size: usize, limit: usize },

    #[error("Unsupported schema version: {version} (supported: {supported})")]
    UnsupportedVersion { version: String, supported: String },

    #[error("Invalid XML structure: {0}")]
    InvalidXml(String),

    #[error("Invalid JSON structure: {0}")]
    InvalidJson(String),

    #[error("Invalid field value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error("Run was cancelled")]
    Cancelled,
}

/// Specific per-check failure kinds
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EvaluationErrorKind {
    #[error("Selector '{selector}' failed: {message}")]
    Selector { selector: String, message: String },

    #[error("Unsupported environment: {0}")]
    UnsupportedEnvironment(String),

    #[error("{0}")]
    Script(String),

    #[error("Evaluation timed out after {0} ms")]
    Timeout(u64),

    #[error("Evaluation panicked: {0}")]
    Panicked(String),
}

// ============================================================================
// Result type alias
// ============================================================================

/// Convenient Result type for mdqa operations
pub type Result<T> = std::result::Result<T, MdqError>;

// ============================================================================
// Error construction helpers
// ============================================================================

impl MdqError {
    /// Create a process error with context
    pub fn process(context: impl Into<String>, source: ProcessErrorKind) -> Self {
        Self::Process {
            context: context.into(),
            source,
        }
    }

    /// Create a process error for a malformed suite
    pub fn malformed_suite(message: impl Into<String>) -> Self {
        Self::process("validating suite", ProcessErrorKind::MalformedSuite(message.into()))
    }

    /// Create a process error for a document that failed to parse
    pub fn unparsable_document(message: impl Into<String>) -> Self {
        Self::process(
            "loading document",
            ProcessErrorKind::UnparsableDocument(message.into()),
        )
    }

    /// Create an evaluation error with context
    pub fn evaluation(context: impl Into<String>, source: EvaluationErrorKind) -> Self {
        Self::Evaluation {
            context: context.into(),
            source,
        }
    }

    /// Create an entry-not-found error
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::EntryNotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Create an IO error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        let message = format!("{source}");
        Self::Io {
            path: Some(path),
            message,
            source,
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error aborted a run before any result was produced.
    #[must_use]
    pub const fn is_process_error(&self) -> bool {
        matches!(self, Self::Process { .. })
    }
}

// ============================================================================
// Conversions from existing error types
// ============================================================================

impl From<std::io::Error> for MdqError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            path: None,
            message: format!("{err}"),
            source: err,
        }
    }
}

impl From<serde_json::Error> for MdqError {
    fn from(err: serde_json::Error) -> Self {
        Self::process(
            "JSON deserialization",
            ProcessErrorKind::InvalidJson(err.to_string()),
        )
    }
}

impl From<quick_xml::Error> for MdqError {
    fn from(err: quick_xml::Error) -> Self {
        Self::process("XML processing", ProcessErrorKind::InvalidXml(err.to_string()))
    }
}

impl From<quick_xml::DeError> for MdqError {
    fn from(err: quick_xml::DeError) -> Self {
        Self::process(
            "XML deserialization",
            ProcessErrorKind::InvalidXml(err.to_string()),
        )
    }
}

// ============================================================================
// Error context extension trait
// ============================================================================

/// Extension trait for adding context to errors.
///
/// The context string is prepended to the error's existing context, so a
/// failure deep inside suite loading reads like
/// `"loading suite.xml: parsing check 3: missing id"`.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context from a closure (only evaluated on error).
    fn with_context<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E: Into<MdqError>> ErrorContext<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        let ctx: String = context.into();
        self.map_err(|e| add_context_to_error(e.into(), &ctx))
    }

    fn with_context<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|e| {
            let ctx: String = f().into();
            add_context_to_error(e.into(), &ctx)
        })
    }
}

/// Add context to an error, chaining with any existing context.
fn add_context_to_error(err: MdqError, new_ctx: &str) -> MdqError {
    match err {
        MdqError::Process {
            context: existing,
            source,
        } => MdqError::Process {
            context: chain_context(new_ctx, &existing),
            source,
        },
        MdqError::Evaluation {
            context: existing,
            source,
        } => MdqError::Evaluation {
            context: chain_context(new_ctx, &existing),
            source,
        },
        MdqError::Io {
            path,
            message,
            source,
        } => MdqError::Io {
            path,
            message: chain_context(new_ctx, &message),
            source,
        },
        MdqError::Filestore(msg) => MdqError::Filestore(chain_context(new_ctx, &msg)),
        MdqError::Index(msg) => MdqError::Index(chain_context(new_ctx, &msg)),
        MdqError::Store(msg) => MdqError::Store(chain_context(new_ctx, &msg)),
        MdqError::Config(msg) => MdqError::Config(chain_context(new_ctx, &msg)),
        MdqError::Validation(msg) => MdqError::Validation(chain_context(new_ctx, &msg)),
        other @ MdqError::EntryNotFound { .. } => other,
    }
}

/// Chain two context strings together as "`new`: `existing`".
fn chain_context(new: &str, existing: &str) -> String {
    if existing.is_empty() {
        new.to_string()
    } else {
        format!("{new}: {existing}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MdqError::malformed_suite("suite has no checks");
        let display = err.to_string();
        assert!(display.contains("Processing failed"), "{}", display);

        let err = MdqError::not_found("suite", "suite.1.1");
        assert_eq!(err.to_string(), "Entry not found: suite 'suite.1.1'");
    }

    #[test]
    fn test_process_errors_are_distinguishable() {
        assert!(MdqError::unparsable_document("bad").is_process_error());
        assert!(!MdqError::Store("db down".into()).is_process_error());
        assert!(!MdqError::evaluation(
            "check.1",
            EvaluationErrorKind::Timeout(100)
        )
        .is_process_error());
    }

    #[test]
    fn test_context_chaining_multiple_levels() {
        fn inner() -> Result<()> {
            Err(MdqError::malformed_suite("duplicate check id"))
        }

        fn middle() -> Result<()> {
            inner().context("middle layer")
        }

        fn outer() -> Result<()> {
            middle().context("outer layer")
        }

        match outer() {
            Err(MdqError::Process { context, .. }) => {
                assert!(context.starts_with("outer layer: middle layer"), "{}", context);
                assert!(context.contains("validating suite"), "{}", context);
            }
            other => panic!("Expected Process error, got {:?}", other),
        }
    }

    #[test]
    fn test_with_context_lazy_evaluation() {
        let mut called = false;
        let ok_result: Result<i32> = Ok(42);
        let _ = ok_result.with_context(|| {
            called = true;
            "should not be called"
        });
        assert!(!called);

        let err_result: Result<i32> = Err(MdqError::validation("error"));
        let _ = err_result.with_context(|| {
            called = true;
            "should be called"
        });
        assert!(called);
    }

    #[test]
    fn test_chain_context_helper() {
        assert_eq!(chain_context("new", ""), "new");
        assert_eq!(chain_context("outer", "middle: inner"), "outer: middle: inner");
    }
}
