//! Core types shared by the media-type resolver, the index and the registry.

use std::borrow::Borrow;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Site every canonical schema `$id` lives under.
pub const DEFAULT_BASE_URL: &str = "https://formats.openag.io";

/// Prefixes of the external JSON Schema meta-schemas.
pub const META_SCHEMA_PREFIXES: &[&str] = &["https://json-schema.org/", "http://json-schema.org/"];

/// Suffix carried by every canonical schema key.
pub const SCHEMA_SUFFIX: &str = ".schema.json";

/// Keywords that combine subschemas with boolean logic.
pub const BOOLEAN_OPERATORS: &[&str] = &["allOf", "anyOf", "oneOf"];

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Identifier of a schema document within the index.
///
/// Canonical keys look like `/oada/bookmarks/v1.schema.json`. Keys taken
/// from an explicit `schema=` media-type parameter are opaque and kept
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaKey(String);

impl SchemaKey {
    pub fn new(key: impl Into<String>) -> Self {
        SchemaKey(key.into())
    }

    /// Build the key for a schema source from its path relative to the
    /// discovery root (`/`-separated, with or without a leading slash).
    ///
    /// The source extension (`.schema.json`, otherwise `.json`) is replaced
    /// by `.schema.json`.
    pub fn from_source_path(relative: &str) -> Self {
        let trimmed = relative.trim_start_matches('/');
        let stem = trimmed
            .strip_suffix(SCHEMA_SUFFIX)
            .or_else(|| trimmed.strip_suffix(".json"))
            .unwrap_or(trimmed);
        SchemaKey(format!("/{}{}", stem, SCHEMA_SUFFIX))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the key has the canonical `/<path>.schema.json` shape.
    pub fn is_canonical(&self) -> bool {
        let doc = self.document_part();
        doc.starts_with('/') && doc.ends_with(SCHEMA_SUFFIX)
    }

    /// The key without any `#fragment`.
    pub fn document_part(&self) -> &str {
        match self.0.find('#') {
            Some(idx) => &self.0[..idx],
            None => &self.0,
        }
    }

    /// The `#fragment` of the key, including the `#`, if any.
    pub fn fragment(&self) -> Option<&str> {
        self.0.find('#').map(|idx| &self.0[idx..])
    }

    /// Absolute URL form of the key under `base_url`.
    ///
    /// Canonical keys are appended to the site; absolute URLs are returned
    /// as-is; any other opaque token is joined against the site root.
    pub fn to_url(&self, base_url: &str) -> String {
        if self.0.starts_with('/') {
            return format!("{}{}", base_url.trim_end_matches('/'), self.0);
        }
        if url::Url::parse(&self.0).is_ok() {
            return self.0.clone();
        }
        match url::Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
            .and_then(|base| base.join(&self.0))
        {
            Ok(joined) => joined.to_string(),
            Err(_) => self.0.clone(),
        }
    }
}

impl fmt::Display for SchemaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for SchemaKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for SchemaKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SchemaKey {
    fn from(s: &str) -> Self {
        SchemaKey(s.to_string())
    }
}

impl From<String> for SchemaKey {
    fn from(s: String) -> Self {
        SchemaKey(s)
    }
}

/// How a media type is mapped to candidate keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionMode {
    /// Only `/<domain>/<path>/v<N>.schema.json`; no version means no schema.
    #[default]
    Strict,
    /// Versioned key followed by the historical unversioned conventions.
    Legacy,
}

impl ResolutionMode {
    /// Create a mode from a legacy flag (true = Legacy, false = Strict).
    pub fn from_legacy_flag(legacy: bool) -> Self {
        if legacy {
            ResolutionMode::Legacy
        } else {
            ResolutionMode::Strict
        }
    }
}

/// Retry and timeout policy for remote fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPolicy {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Total attempts, including the first one. Never less than 1.
    pub attempts: u32,
    /// Delay before the first retry; doubled for every following retry.
    pub backoff: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

impl FetchPolicy {
    /// Delay to wait before retry number `retry` (1-based).
    pub fn delay_before(&self, retry: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
    }
}

/// Options for building a schema registry.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Directory that schema sources are discovered under.
    pub root: PathBuf,
    /// Site that canonical keys are rooted at. Stored without trailing slash.
    pub base_url: String,
    /// URL prefixes treated as external meta-schemas.
    pub meta_schema_prefixes: Vec<String>,
    /// Policy for the meta-schema fetch.
    pub fetch: FetchPolicy,
    /// When true, remote fetches are refused.
    pub offline: bool,
}

impl RegistryOptions {
    /// Options for a corpus rooted at `root`, served from the default site.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            meta_schema_prefixes: META_SCHEMA_PREFIXES.iter().map(|s| s.to_string()).collect(),
            fetch: FetchPolicy::default(),
            offline: false,
        }
    }

    /// Set the site base URL. A trailing slash is dropped.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Replace the meta-schema URL prefixes.
    pub fn meta_schema_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.meta_schema_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Set the fetch policy.
    pub fn fetch(mut self, fetch: FetchPolicy) -> Self {
        self.fetch = fetch;
        self
    }

    /// Refuse remote fetches.
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Expected `$id` of the document stored under `key`.
    pub fn id_for(&self, key: &SchemaKey) -> String {
        key.to_url(&self.base_url)
    }

    /// Key for a site-absolute URL, or `None` if the URL is off-site.
    ///
    /// Any `#fragment` is kept on the returned key.
    pub fn key_for_url(&self, url: &str) -> Option<SchemaKey> {
        let rest = url.strip_prefix(&self.base_url)?;
        rest.starts_with('/').then(|| SchemaKey::new(rest))
    }

    /// Whether `url` points at an external meta-schema.
    pub fn is_meta_schema(&self, url: &str) -> bool {
        self.meta_schema_prefixes.iter().any(|p| url.starts_with(p.as_str()))
    }
}
