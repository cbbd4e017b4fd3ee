//! Schema loading from files, strings and HTTP URLs.
//!
//! Also owns source discovery for the index and JSON Pointer navigation.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{IndexError, ResolveError};
use crate::types::{FetchPolicy, RegistryOptions};

/// Load a schema document from a file path.
///
/// # Errors
///
/// Returns `IndexError::FileNotFound` if the file doesn't exist,
/// or `IndexError::InvalidJson` if the file isn't valid JSON.
pub fn load_schema(path: &Path) -> Result<Value, IndexError> {
    if !path.exists() {
        return Err(IndexError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| IndexError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&content).map_err(|source| IndexError::InvalidJson {
        path: path.to_path_buf(),
        source,
    })
}

/// Load a schema from a JSON string.
pub fn load_schema_str(content: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(content)
}

/// Split a reference into its document part and `#fragment` (with the `#`).
pub fn split_fragment(reference: &str) -> (&str, Option<&str>) {
    match reference.find('#') {
        Some(idx) => (&reference[..idx], Some(&reference[idx..])),
        None => (reference, None),
    }
}

/// Navigate a JSON Pointer fragment (e.g. `#/$defs/v1` or `/properties/a`).
///
/// An empty pointer or `#` yields the whole document. Segments are
/// percent-decoded and RFC 6901 unescaped; arrays are indexed numerically.
///
/// # Errors
///
/// Returns `ResolveError::PointerNotFound` naming `document` when a segment
/// does not exist.
pub fn navigate_fragment<'a>(
    schema: &'a Value,
    fragment: &str,
    document: &str,
) -> Result<&'a Value, ResolveError> {
    let path = fragment.trim_start_matches('#');
    if path.is_empty() {
        return Ok(schema);
    }

    let not_found = || ResolveError::PointerNotFound {
        pointer: fragment.to_string(),
        document: document.to_string(),
    };

    let path = path.strip_prefix('/').ok_or_else(not_found)?;
    let mut current = schema;
    for part in path.split('/') {
        // Unescape JSON Pointer encoding (~1 = /, ~0 = ~)
        let key = percent_decode(part).replace("~1", "/").replace("~0", "~");
        current = match current {
            Value::Object(map) => map.get(&key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
        .ok_or_else(not_found)?;
    }
    Ok(current)
}

/// Collect every schema source under `root`, sorted for stable output.
///
/// Returns `(relative path with '/' separators, absolute path)` pairs.
pub fn discover_sources(root: &Path) -> Result<Vec<(String, PathBuf)>, IndexError> {
    if !root.is_dir() {
        return Err(IndexError::Discovery {
            root: root.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
        });
    }

    let mut files = Vec::new();
    collect_files_recursive(root, &mut files).map_err(|source| IndexError::Discovery {
        root: root.to_path_buf(),
        source,
    })?;
    files.sort();

    Ok(files
        .into_iter()
        .filter_map(|path| {
            let relative = path.strip_prefix(root).ok()?;
            let components: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            Some((components.join("/"), path))
        })
        .collect())
}

fn collect_files_recursive(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files_recursive(&path, files)?;
        } else if path.extension().map(|e| e == "json").unwrap_or(false) {
            files.push(path);
        }
    }
    Ok(())
}

fn percent_decode(s: &str) -> String {
    if !s.contains('%') {
        return s.to_string();
    }
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Source of remote documents (the external meta-schemas).
pub trait Fetch: Send + Sync {
    /// Fetch and parse the JSON document at `url`.
    fn fetch(&self, url: &str) -> Result<Value, ResolveError>;
}

/// Fetcher that refuses every request.
#[derive(Debug, Clone, Default)]
pub struct OfflineFetcher;

impl Fetch for OfflineFetcher {
    fn fetch(&self, url: &str) -> Result<Value, ResolveError> {
        Err(ResolveError::Network {
            url: url.to_string(),
            attempts: 0,
            message: "remote fetching is disabled".to_string(),
        })
    }
}

/// Blocking HTTP fetcher with timeout and retry.
///
/// Transport errors and 5xx responses are retried with exponential
/// backoff; other HTTP errors fail immediately.
#[cfg(feature = "remote")]
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    policy: FetchPolicy,
}

#[cfg(feature = "remote")]
impl HttpFetcher {
    pub fn new(policy: FetchPolicy) -> Self {
        Self { policy }
    }

    fn fetch_once(
        client: &reqwest::blocking::Client,
        url: &str,
    ) -> Result<Value, (bool, String)> {
        let response = client
            .get(url)
            .send()
            .map_err(|e| (true, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err((status.is_server_error(), format!("HTTP {}", status)));
        }

        response.json().map_err(|e| (false, e.to_string()))
    }
}

#[cfg(feature = "remote")]
impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Value, ResolveError> {
        let network_error = |attempts: u32, message: String| ResolveError::Network {
            url: url.to_string(),
            attempts,
            message,
        };

        let client = reqwest::blocking::Client::builder()
            .timeout(self.policy.timeout)
            .build()
            .map_err(|e| network_error(0, e.to_string()))?;

        let attempts = self.policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            tracing::debug!(url, attempt, "fetching remote schema");
            match Self::fetch_once(&client, url) {
                Ok(value) => return Ok(value),
                Err((retryable, message)) => {
                    if !retryable || attempt >= attempts {
                        tracing::warn!(url, attempt, %message, "remote schema fetch failed");
                        return Err(network_error(attempt, message));
                    }
                    tracing::debug!(url, attempt, %message, "retrying remote schema fetch");
                    std::thread::sleep(self.policy.delay_before(attempt));
                    attempt += 1;
                }
            }
        }
    }
}

/// The fetcher matching `options`: offline when requested or when the
/// `remote` feature is disabled, HTTP otherwise.
pub fn default_fetcher(options: &RegistryOptions) -> Box<dyn Fetch> {
    if options.offline {
        return Box::new(OfflineFetcher);
    }
    #[cfg(feature = "remote")]
    {
        Box::new(HttpFetcher::new(options.fetch.clone()))
    }
    #[cfg(not(feature = "remote"))]
    {
        Box::new(OfflineFetcher)
    }
}
