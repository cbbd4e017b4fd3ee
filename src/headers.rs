//! HTTP header values derived from resolved schema identifiers.
//!
//! Middleware attaches these to responses: a `Link` header pointing at the
//! describing schemas and a `Content-Type` echo naming them explicitly.

use crate::media_type::MediaType;
use crate::types::SchemaKey;

/// Build a `Link` header value with one `rel="describedby"` entry per id.
///
/// Identifiers are rendered as absolute URLs under `base_url`. An
/// `existing` header value is kept in front. Returns `None` when there is
/// nothing to send.
pub fn describedby_link(ids: &[SchemaKey], base_url: &str, existing: Option<&str>) -> Option<String> {
    let mut entries: Vec<String> = existing
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| vec![s.to_string()])
        .unwrap_or_default();

    entries.extend(
        ids.iter()
            .map(|id| format!("<{}>; rel=\"describedby\"", id.to_url(base_url))),
    );

    (!entries.is_empty()).then(|| entries.join(", "))
}

/// Echo a media type with its `schema` parameter set to `ids`.
///
/// Other parameters are kept in their original order. An existing `schema`
/// parameter is replaced in place; otherwise one is appended. Without ids
/// any `schema` parameter is dropped.
pub fn content_type_echo(media_type: &MediaType, ids: &[SchemaKey]) -> String {
    let joined = ids.iter().map(SchemaKey::as_str).collect::<Vec<_>>().join(" ");
    let mut out = media_type.essence.clone();
    let mut replaced = false;
    for (name, value) in &media_type.parameters {
        if name == "schema" {
            if replaced || ids.is_empty() {
                continue;
            }
            replaced = true;
            push_parameter(&mut out, name, &joined);
        } else {
            push_parameter(&mut out, name, value);
        }
    }
    if !replaced && !ids.is_empty() {
        push_parameter(&mut out, "schema", &joined);
    }
    out
}

// --- Internal implementation ---

fn push_parameter(out: &mut String, name: &str, value: &str) {
    out.push_str("; ");
    out.push_str(name);
    out.push('=');
    out.push_str(&quote_parameter(name, value));
}

/// Quote a parameter value unless it is a plain token. `schema` is always
/// quoted.
fn quote_parameter(name: &str, value: &str) -> String {
    if name != "schema" && !value.is_empty() && value.chars().all(is_token_char) {
        return value.to_string();
    }
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c)
}
