//! Corpus check: every indexed schema loads, compiles and accepts its own
//! `examples`.
//!
//! Diagnostic codes:
//! - `E001` document cannot be loaded
//! - `E002` `$id` does not match the key
//! - `E003` schema does not compile
//! - `E004` an example is rejected by its schema (or `examples` is not an array)
//! - `W001` schema has no examples

use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{IndexError, ResolveError, ValidateError};
use crate::types::{json_type_name, SchemaKey};
use crate::validator::{collect_errors, SchemaRegistry};

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single finding about one schema.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    /// JSON Pointer into the schema document (e.g. `/examples/0/name`).
    pub path: String,
    pub message: String,
}

/// Outcome for one schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Ok,
    Error,
    Warning,
}

/// Result of checking a single key.
#[derive(Debug, Clone, Serialize)]
pub struct KeyReport {
    pub key: SchemaKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    pub status: KeyStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Result of checking every key in a registry.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub root: PathBuf,
    pub keys_checked: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub warnings: usize,
    pub results: Vec<KeyReport>,
}

impl CheckReport {
    /// Returns true if no key produced an error.
    pub fn is_ok(&self) -> bool {
        self.errors == 0
    }
}

/// Check every indexed key, continuing past failures.
///
/// If `strict` is true, keys with only warnings count as failed.
pub fn check_all(registry: &SchemaRegistry, strict: bool) -> CheckReport {
    let results: Vec<KeyReport> = registry
        .index()
        .keys()
        .iter()
        .map(|key| check_key(registry, key))
        .collect();

    let count = |severity: Severity| {
        results
            .iter()
            .flat_map(|r| &r.diagnostics)
            .filter(|d| d.severity == severity)
            .count()
    };
    let failed = results
        .iter()
        .filter(|r| match r.status {
            KeyStatus::Ok => false,
            KeyStatus::Warning => strict,
            KeyStatus::Error => true,
        })
        .count();

    CheckReport {
        root: registry.options().root.clone(),
        keys_checked: results.len(),
        passed: results.len() - failed,
        failed,
        errors: count(Severity::Error),
        warnings: count(Severity::Warning),
        results,
    }
}

/// Check a single key.
pub fn check_key(registry: &SchemaRegistry, key: &SchemaKey) -> KeyReport {
    debug!(%key, "checking schema");
    let mut diagnostics = Vec::new();

    match registry.index().get(key.as_str()) {
        Ok(document) => match registry.compile(key.as_str()) {
            Ok(validator) => check_examples(&validator, &document, &mut diagnostics),
            Err(e) => diagnostics.push(compile_diagnostic(&e)),
        },
        Err(e @ IndexError::IdMismatch { .. }) => {
            diagnostics.push(error("E002", "/$id", e.to_string()));
        }
        Err(e) => diagnostics.push(error("E001", "/", e.to_string())),
    }

    let status = if diagnostics.iter().any(|d| d.severity == Severity::Error) {
        KeyStatus::Error
    } else if diagnostics.is_empty() {
        KeyStatus::Ok
    } else {
        KeyStatus::Warning
    };

    KeyReport {
        key: key.clone(),
        source: registry.index().source_path(key.as_str()),
        status,
        diagnostics,
    }
}

// --- Internal implementation ---

fn check_examples(
    validator: &jsonschema::Validator,
    document: &Value,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let examples = match document.get("examples") {
        Some(Value::Array(examples)) if !examples.is_empty() => examples,
        Some(other) if !other.is_array() => {
            diagnostics.push(error(
                "E004",
                "/examples",
                format!("examples must be an array, got {}", json_type_name(other)),
            ));
            return;
        }
        _ => {
            diagnostics.push(Diagnostic {
                severity: Severity::Warning,
                code: "W001".to_string(),
                path: "/".to_string(),
                message: "schema has no examples".to_string(),
            });
            return;
        }
    };

    for (i, example) in examples.iter().enumerate() {
        for err in collect_errors(validator, example) {
            diagnostics.push(error(
                "E004",
                &format!("/examples/{}{}", i, err.path),
                format!("example {} rejected: {}", i, err),
            ));
        }
    }
}

fn compile_diagnostic(err: &ValidateError) -> Diagnostic {
    match err {
        // A referenced document can carry the bad $id.
        ValidateError::Resolve(ResolveError::Index(e @ IndexError::IdMismatch { .. })) => {
            error("E002", "/", e.to_string())
        }
        ValidateError::Resolve(ResolveError::Index(e)) => error("E001", "/", e.to_string()),
        other => error("E003", "/", other.to_string()),
    }
}

fn error(code: &str, path: &str, message: String) -> Diagnostic {
    Diagnostic {
        severity: Severity::Error,
        code: code.to_string(),
        path: path.to_string(),
        message,
    }
}
