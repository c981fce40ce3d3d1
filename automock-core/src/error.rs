//! Structured error taxonomy shared by every component in this crate.
//!
//! One enum, one `Result` alias, collapsed to a single crate-wide type
//! since every component here shares one failure surface instead of one
//! per subsystem.

use std::path::PathBuf;

/// Every fallible operation in this crate
/// returns one of these variants; nothing here is stringly-typed.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation failed for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("permission denied performing {op} on {resource}: {cause}")]
    PermissionDenied {
        op: &'static str,
        resource: String,
        cause: String,
    },

    #[error("conflict: {reason}")]
    Conflict { reason: String },

    #[error("bundle is missing required file(s): {}", .names.join(", "))]
    MissingBundleFile { names: Vec<String> },

    #[error("scale aborted: no saved terraform.tfvars in deployment metadata")]
    MissingSavedTfvars,

    #[error("operation requires the stack to be deployed, but it is not")]
    NotDeployed,

    #[error("external tool failed at stage {stage} (exit code {exit_code:?}): {output}")]
    ExternalToolFailed {
        stage: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("transient failure: {cause}")]
    Transient { cause: String },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed json at {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            key: key.into(),
        }
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Error::Conflict {
            reason: reason.into(),
        }
    }

    /// One-line operator summary, independent of the full `Display` chain
    /// (which may include `#[source]` causes).
    pub fn operator_summary(&self) -> String {
        match self {
            Error::Validation { field, .. } => format!("invalid {field}"),
            Error::NotFound { kind, .. } => format!("{kind} not found"),
            Error::AlreadyExists { kind, .. } => format!("{kind} name already taken"),
            Error::PermissionDenied { op, .. } => format!("permission denied ({op})"),
            Error::Conflict { .. } => "operation blocked by a conflicting state".to_string(),
            Error::MissingBundleFile { .. } => "bundle is incomplete".to_string(),
            Error::MissingSavedTfvars => "no saved terraform variables to scale from".to_string(),
            Error::NotDeployed => "stack is not currently deployed".to_string(),
            Error::ExternalToolFailed { stage, .. } => format!("terraform {stage} failed"),
            Error::Transient { .. } => "transient error, retry".to_string(),
            Error::Io { .. } => "local filesystem error".to_string(),
            Error::Json { .. } => "malformed stored JSON".to_string(),
            Error::Other(_) => "unclassified error".to_string(),
        }
    }

    /// `true` if a caller may reasonably retry the same operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient { .. })
    }
}

/// Adds path context to `std::io::Error` at the call site.
pub trait IoContext<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoContext<T> for std::result::Result<T, std::io::Error> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
