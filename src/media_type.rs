//! Media-type parsing and media-type to schema-key resolution.
//!
//! OADA formats are identified by vendor media types of the shape
//! `application/vnd.<domain>.<path...>.<version>+json`. The last label is
//! the format version and every other label becomes a path segment:
//!
//! | Media type | Key |
//! |------------|-----|
//! | `application/vnd.oada.bookmarks.1+json` | `/oada/bookmarks/v1.schema.json` |
//! | `application/vnd.trellis.audit.globalgap.1+json` | `/trellis/audit/globalgap/v1.schema.json` |
//!
//! A `schema="a b c"` parameter names the schemas explicitly and bypasses
//! the grammar entirely.

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::types::{ResolutionMode, SchemaKey, DEFAULT_BASE_URL, SCHEMA_SUFFIX};

fn vendor_json_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^application/vnd\.([^.+/]+)\.([^+/]+)\+json$")
            .expect("vendor media type pattern is valid")
    })
}

/// A parsed vendor JSON media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    /// Lower-cased type without parameters.
    pub essence: String,
    /// First label after `vnd.` (e.g. `oada`).
    pub domain: String,
    /// Remaining dot-separated labels, never empty.
    pub type_segments: Vec<String>,
    /// Parameters in order of appearance; names lower-cased, values verbatim.
    pub parameters: Vec<(String, String)>,
}

impl MediaType {
    /// Parse a media type such as `application/vnd.oada.bookmarks.1+json`.
    ///
    /// Returns `None` when the input is not a vendor JSON type. That is not
    /// an error: no schema applies to such content.
    ///
    /// Matching is case-insensitive: the essence and parameter names are
    /// lower-cased. Parameter values keep their case, since `schema` values
    /// name case-sensitive paths and URLs.
    pub fn parse(input: &str) -> Option<Self> {
        let mut parts = split_parameters(input);
        let essence = parts.remove(0).trim().to_lowercase();

        let captures = vendor_json_pattern().captures(&essence)?;
        let domain = captures[1].to_string();
        let type_segments: Vec<String> = captures[2].split('.').map(str::to_string).collect();
        if type_segments.iter().any(String::is_empty) {
            return None;
        }

        let parameters = parts.iter().filter_map(|p| parse_parameter(p)).collect();

        Some(MediaType {
            essence,
            domain,
            type_segments,
            parameters,
        })
    }

    /// Value of the first parameter called `name` (case-insensitive).
    pub fn parameter(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.parameters
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Schema identifiers listed in a `schema` parameter, if any.
    pub fn schema_override(&self) -> Option<Vec<&str>> {
        let tokens: Vec<&str> = self.parameter("schema")?.split_whitespace().collect();
        (!tokens.is_empty()).then_some(tokens)
    }
}

/// Why a media type resolved to no schema key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unresolvable {
    /// Not of the form `application/vnd.<domain>.<rest>+json`.
    NotVendorJson,
    /// The last type segment is not a positive integer.
    InvalidVersion(String),
}

impl std::fmt::Display for Unresolvable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unresolvable::NotVendorJson => f.write_str("not a vendor JSON media type"),
            Unresolvable::InvalidVersion(v) => write!(f, "invalid format version \"{}\"", v),
        }
    }
}

/// A version label is valid when it is a non-zero unsigned integer.
///
/// Leading zeros are allowed (`01`) and kept verbatim in the key; `0`
/// and `00` are rejected.
pub fn is_valid_version(ver: &str) -> bool {
    !ver.is_empty() && ver.bytes().all(|b| b.is_ascii_digit()) && ver.bytes().any(|b| b != b'0')
}

/// Resolve a parsed media type to its candidate schema keys, most specific first.
pub fn resolve_keys(
    media_type: &MediaType,
    mode: ResolutionMode,
) -> Result<Vec<SchemaKey>, Unresolvable> {
    if let Some(tokens) = media_type.schema_override() {
        return Ok(tokens.into_iter().map(SchemaKey::from).collect());
    }

    let (ver, rest) = media_type
        .type_segments
        .split_last()
        .ok_or(Unresolvable::NotVendorJson)?;

    let mut prefix = format!("/{}", media_type.domain);
    for segment in rest {
        prefix.push('/');
        prefix.push_str(segment);
    }

    if !is_valid_version(ver) {
        return match mode {
            ResolutionMode::Strict => Err(Unresolvable::InvalidVersion(ver.clone())),
            ResolutionMode::Legacy => Ok(vec![SchemaKey::new(format!(
                "{}/{}{}",
                prefix, ver, SCHEMA_SUFFIX
            ))]),
        };
    }

    let mut keys = vec![SchemaKey::new(format!("{}/v{}{}", prefix, ver, SCHEMA_SUFFIX))];

    if mode == ResolutionMode::Legacy {
        let unversioned = format!("{}{}", prefix, SCHEMA_SUFFIX);
        keys.push(SchemaKey::new(unversioned.clone()));
        keys.push(SchemaKey::new(format!("{}#/$defs/v{}", unversioned, ver)));
        keys.push(SchemaKey::new(format!("{}#/definitions/v{}", unversioned, ver)));
    }

    Ok(keys)
}

/// Parse and resolve a media-type string in one step.
pub fn resolve_media_type(
    input: &str,
    mode: ResolutionMode,
) -> Result<Vec<SchemaKey>, Unresolvable> {
    let media_type = MediaType::parse(input).ok_or(Unresolvable::NotVendorJson)?;
    resolve_keys(&media_type, mode)
}

/// Schema identifiers for a media type in strict mode.
///
/// Canonical keys are returned as absolute URLs under the default site;
/// identifiers from an explicit `schema` parameter are returned verbatim.
/// Anything unresolvable yields an empty list.
pub fn media_type_to_schema(input: &str) -> Vec<String> {
    media_type_to_schema_with_base(input, DEFAULT_BASE_URL)
}

/// Like [`media_type_to_schema`], rooting canonical keys at `base_url`.
pub fn media_type_to_schema_with_base(input: &str, base_url: &str) -> Vec<String> {
    let Some(media_type) = MediaType::parse(input) else {
        debug!(media_type = input, "no schema: not a vendor JSON media type");
        return Vec::new();
    };
    if let Some(tokens) = media_type.schema_override() {
        return tokens.into_iter().map(str::to_string).collect();
    }
    match resolve_keys(&media_type, ResolutionMode::Strict) {
        Ok(keys) => keys.iter().map(|k| k.to_url(base_url)).collect(),
        Err(reason) => {
            debug!(media_type = input, %reason, "no schema");
            Vec::new()
        }
    }
}

/// Candidate keys for a media type in legacy permissive mode.
pub fn media_type_to_schema_legacy(input: &str) -> Vec<SchemaKey> {
    resolve_media_type(input, ResolutionMode::Legacy).unwrap_or_default()
}

// --- Internal implementation ---

/// Split on `;` outside of quoted strings. The first element is the type.
fn split_parameters(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for c in input.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                current.push(c);
                in_quotes = !in_quotes;
            }
            ';' if !in_quotes => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

/// Parse `name=value` or `name="quoted value"`; `None` if malformed.
fn parse_parameter(raw: &str) -> Option<(String, String)> {
    let (name, value) = raw.split_once('=')?;
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return None;
    }
    let value = value.trim();

    let value = if let Some(quoted) = value.strip_prefix('"') {
        let inner = quoted.strip_suffix('"')?;
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                out.push(chars.next()?);
            } else {
                out.push(c);
            }
        }
        out
    } else {
        value.to_string()
    };

    Some((name, value))
}
