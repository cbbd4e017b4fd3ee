//! Error types for schema indexing, reference resolution and validation.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while discovering or loading schema documents.
#[derive(Debug, Error)]
pub enum IndexError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot discover schemas under {root}: {source}")]
    Discovery {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Schema errors (exit code 2)
    #[error("invalid JSON in {path}: {source}")]
    InvalidJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("$id mismatch for {key}: expected {expected}, found {}", actual.as_deref().unwrap_or("nothing"))]
    IdMismatch {
        key: String,
        expected: String,
        actual: Option<String>,
    },

    #[error("schema key {key} is produced by both {} and {}", first.display(), second.display())]
    KeyCollision {
        key: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("unknown schema key: {key}")]
    UnknownKey { key: String },
}

/// Errors while resolving a `$ref`.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("unresolved $ref \"{reference}\" (from {})", from.as_deref().unwrap_or("<root>"))]
    UnresolvedRef {
        reference: String,
        from: Option<String>,
    },

    #[error("JSON pointer \"{pointer}\" not found in {document}")]
    PointerNotFound { pointer: String, document: String },

    #[error("failed to fetch {url} after {attempts} attempt(s): {message}")]
    Network {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Errors during validation.
#[derive(Debug, Error)]
pub enum ValidateError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("no schema found for \"{reference}\"")]
    NoSchema { reference: String },

    #[error("cannot compile schema {key}: {message}")]
    Compile { key: String, message: String },

    #[error("validation against {key} failed with {} error(s)", errors.len())]
    Invalid {
        key: String,
        errors: Vec<SchemaError>,
    },
}

impl From<IndexError> for ValidateError {
    fn from(err: IndexError) -> Self {
        ValidateError::Resolve(ResolveError::Index(err))
    }
}

/// Single validation error with path context.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SchemaError {
    /// JSON Pointer (RFC 6901) to the invalid part of the instance.
    pub path: String,
    /// Schema keyword that rejected the instance (e.g. `required`).
    pub keyword: String,
    /// JSON Pointer to the failing keyword within the schema.
    pub schema_path: String,
    /// Human-readable error message.
    pub message: String,
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        write!(f, "{} [{}]: {}", path, self.keyword, self.message)
    }
}

impl IndexError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            IndexError::FileNotFound { .. }
            | IndexError::ReadError { .. }
            | IndexError::Discovery { .. } => 3,
            _ => 2,
        }
    }
}

impl ResolveError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ResolveError::Network { .. } => 3,
            ResolveError::Index(e) => e.exit_code(),
            _ => 2,
        }
    }
}

impl ValidateError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ValidateError::Resolve(e) => e.exit_code(),
            ValidateError::Invalid { .. } => 1,
            _ => 2,
        }
    }
}
