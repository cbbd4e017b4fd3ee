//! `$ref` resolution against the schema index.
//!
//! A reference is tried, in order, as
//!
//! 1. a site-absolute URL (`https://formats.openag.io/...`),
//! 2. a bare fragment of the referring document (`#/definitions/x`),
//! 3. an external JSON Schema meta-schema (fetched once, then cached),
//! 4. a path relative to the referring document,
//!
//! and fails with [`ResolveError::UnresolvedRef`] otherwise.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tracing::{debug, trace};
use url::Url;

use crate::error::{IndexError, ResolveError};
use crate::index::SchemaIndex;
use crate::loader::{default_fetcher, navigate_fragment, split_fragment, Fetch};
use crate::normalize::merge_schemas;
use crate::types::{RegistryOptions, SchemaKey};

/// Keywords holding instance data rather than subschemas.
const DATA_KEYWORDS: &[&str] = &["examples", "default", "enum", "const"];

/// What a `$ref` points at.
#[derive(Debug, Clone, PartialEq)]
pub enum RefTarget {
    /// A whole document from the index.
    Document { key: SchemaKey, document: Arc<Value> },
    /// A node inside an indexed document, reached by JSON Pointer.
    Subschema {
        key: SchemaKey,
        pointer: String,
        value: Value,
    },
    /// An external meta-schema, or a node inside one.
    MetaSchema { url: String, value: Value },
}

impl RefTarget {
    /// The referenced schema.
    pub fn value(&self) -> &Value {
        match self {
            RefTarget::Document { document, .. } => document,
            RefTarget::Subschema { value, .. } | RefTarget::MetaSchema { value, .. } => value,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            RefTarget::Document { document, .. } => (*document).clone(),
            RefTarget::Subschema { value, .. } | RefTarget::MetaSchema { value, .. } => value,
        }
    }
}

/// Resolves `$ref`s using the index and, for meta-schemas, the network.
pub struct RefResolver {
    options: RegistryOptions,
    index: Arc<SchemaIndex>,
    fetcher: Box<dyn Fetch>,
    remote: Mutex<HashMap<String, Arc<Value>>>,
}

impl std::fmt::Debug for RefResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefResolver")
            .field("base_url", &self.options.base_url)
            .field("meta_schema_prefixes", &self.options.meta_schema_prefixes)
            .finish_non_exhaustive()
    }
}

impl RefResolver {
    /// Resolver over `index` using the fetcher selected by `options`.
    pub fn new(index: Arc<SchemaIndex>, options: RegistryOptions) -> Self {
        let fetcher = default_fetcher(&options);
        Self::with_fetcher(index, options, fetcher)
    }

    /// Resolver with an explicit fetcher for remote documents.
    pub fn with_fetcher(
        index: Arc<SchemaIndex>,
        options: RegistryOptions,
        fetcher: Box<dyn Fetch>,
    ) -> Self {
        Self {
            options,
            index,
            fetcher,
            remote: Mutex::new(HashMap::new()),
        }
    }

    pub fn index(&self) -> &Arc<SchemaIndex> {
        &self.index
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    /// Resolve `reference` as seen from the document identified by `from`
    /// (its `$id` URL or its key).
    ///
    /// # Errors
    ///
    /// `ResolveError::UnresolvedRef` if no step matches,
    /// `ResolveError::PointerNotFound` for a dangling fragment,
    /// `ResolveError::Network` if a meta-schema cannot be fetched, and
    /// index errors (e.g. `IdMismatch`) from loading the target document.
    pub fn resolve(&self, reference: &str, from: Option<&str>) -> Result<RefTarget, ResolveError> {
        let unresolved = || ResolveError::UnresolvedRef {
            reference: reference.to_string(),
            from: from.map(str::to_string),
        };

        // 1. Site-absolute
        if let Some(key) = self.options.key_for_url(reference) {
            trace!(reference, "resolving site-absolute $ref");
            return self.resolve_key(&key).map_err(|e| unknown_as(e, unresolved));
        }

        // 2. Fragment of the referring document
        if reference.starts_with('#') {
            let document = from
                .and_then(|f| self.key_for_document(f))
                .ok_or_else(unresolved)?;
            let key = SchemaKey::new(format!("{}{}", document.document_part(), reference));
            return self.resolve_key(&key).map_err(|e| unknown_as(e, unresolved));
        }

        // 3. External meta-schema
        let (document_url, fragment) = split_fragment(reference);
        if self.options.is_meta_schema(document_url) {
            let document = self.fetch_remote(document_url)?;
            let value = navigate_fragment(&document, fragment.unwrap_or(""), document_url)?.clone();
            return Ok(RefTarget::MetaSchema {
                url: reference.to_string(),
                value,
            });
        }

        // 4. Relative to the referring document
        let joined = from
            .and_then(|f| self.document_url(f))
            .and_then(|base| base.join(reference).ok())
            .ok_or_else(unresolved)?;
        let joined = joined.as_str();
        if let Some(key) = self.options.key_for_url(joined) {
            let key = SchemaKey::new(format!(
                "{}{}",
                SchemaKey::from_source_path(key.document_part()),
                key.fragment().unwrap_or("")
            ));
            trace!(reference, %key, "resolving relative $ref");
            return self.resolve_key(&key).map_err(|e| unknown_as(e, unresolved));
        }
        if self.options.is_meta_schema(joined) {
            return self.resolve(joined, None);
        }

        // 5. Nothing matched
        Err(unresolved())
    }

    /// Resolve an index key, optionally carrying a `#fragment`.
    pub fn resolve_key(&self, key: &SchemaKey) -> Result<RefTarget, ResolveError> {
        let document_key = SchemaKey::new(key.document_part());
        let document = self.index.get(document_key.as_str())?;

        match key.fragment() {
            None | Some("#") => Ok(RefTarget::Document {
                key: document_key,
                document,
            }),
            Some(fragment) => {
                let value = navigate_fragment(&document, fragment, document_key.as_str())?.clone();
                Ok(RefTarget::Subschema {
                    key: document_key,
                    pointer: fragment.trim_start_matches('#').to_string(),
                    value,
                })
            }
        }
    }

    /// Fetch a remote document once; later calls reuse the cached copy.
    ///
    /// The cache lock is held during the fetch so concurrent callers wait
    /// for the first one instead of fetching again.
    pub fn fetch_remote(&self, url: &str) -> Result<Arc<Value>, ResolveError> {
        let mut cache = self.remote.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(document) = cache.get(url) {
            trace!(url, "remote schema cache hit");
            return Ok(Arc::clone(document));
        }
        debug!(url, "fetching remote schema");
        let document = Arc::new(self.fetcher.fetch(url)?);
        cache.insert(url.to_string(), Arc::clone(&document));
        Ok(document)
    }

    /// Copy of `document` with every resolvable `$ref` inlined.
    ///
    /// The target is merged with the referring node's other keywords, which
    /// win for annotations. Recursive references and meta-schema references
    /// are left in place.
    pub fn bundle(&self, document: &Value, from: Option<&str>) -> Result<Value, ResolveError> {
        let mut out = document.clone();
        let from = from
            .map(str::to_string)
            .or_else(|| document.get("$id").and_then(Value::as_str).map(str::to_string));
        self.bundle_inner(&mut out, from.as_deref(), &mut HashSet::new())?;
        Ok(out)
    }

    fn bundle_inner(
        &self,
        value: &mut Value,
        from: Option<&str>,
        stack: &mut HashSet<String>,
    ) -> Result<(), ResolveError> {
        match value {
            Value::Object(obj) => {
                // Own keywords first; the target is bundled separately.
                for (key, child) in obj.iter_mut() {
                    if key.as_str() != "$ref" && !DATA_KEYWORDS.contains(&key.as_str()) {
                        self.bundle_inner(child, from, stack)?;
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.bundle_inner(item, from, stack)?;
                }
                return Ok(());
            }
            _ => return Ok(()),
        }

        let Some(reference) = value.get("$ref").and_then(Value::as_str).map(str::to_string) else {
            return Ok(());
        };
        let identity = self.absolute_reference(&reference, from);
        if self.options.is_meta_schema(&identity) || stack.contains(&identity) {
            return Ok(());
        }

        let target = self.resolve(&reference, from)?;
        let target_from = match &target {
            RefTarget::Document { key, .. } | RefTarget::Subschema { key, .. } => {
                Some(key.to_url(&self.options.base_url))
            }
            RefTarget::MetaSchema { .. } => None,
        };
        let mut inlined = target.into_value();

        stack.insert(identity.clone());
        let bundled = self.bundle_inner(&mut inlined, target_from.as_deref(), stack);
        stack.remove(&identity);
        bundled?;

        // Identity keywords stay with the target document.
        if let Value::Object(target_obj) = &mut inlined {
            target_obj.remove("$id");
            target_obj.remove("$schema");
        }
        // The referring node keeps its own identity even when the merge
        // falls back to a nested allOf.
        let mut identity_keywords = Map::new();
        if let Value::Object(obj) = value {
            obj.remove("$ref");
            for keyword in ["$id", "$schema"] {
                if let Some(v) = obj.remove(keyword) {
                    identity_keywords.insert(keyword.to_string(), v);
                }
            }
        }
        // A $ref beside other keywords behaves like allOf: [siblings, target].
        let merged = merge_schemas(value, &inlined);
        *value = match merged {
            Value::Object(merged) if !identity_keywords.is_empty() => {
                identity_keywords.extend(merged);
                Value::Object(identity_keywords)
            }
            other => other,
        };
        Ok(())
    }

    /// Absolute form of `reference` as seen from `from`, for cycle checks.
    fn absolute_reference(&self, reference: &str, from: Option<&str>) -> String {
        if Url::parse(reference).is_ok() {
            return reference.to_string();
        }
        from.and_then(|f| self.document_url(f))
            .and_then(|base| base.join(reference).ok())
            .map(String::from)
            .unwrap_or_else(|| reference.to_string())
    }

    /// Index key of the document identified by `from` (URL or key).
    fn key_for_document(&self, from: &str) -> Option<SchemaKey> {
        let (document, _) = split_fragment(from);
        self.options
            .key_for_url(document)
            .or_else(|| self.index.contains(document).then(|| SchemaKey::from(document)))
    }

    /// Absolute URL of the document identified by `from` (URL or key).
    fn document_url(&self, from: &str) -> Option<Url> {
        Url::parse(from)
            .ok()
            .or_else(|| Url::parse(&SchemaKey::from(from).to_url(&self.options.base_url)).ok())
    }
}

/// Report an unknown index key as an unresolved reference.
fn unknown_as(err: ResolveError, unresolved: impl FnOnce() -> ResolveError) -> ResolveError {
    match err {
        ResolveError::Index(IndexError::UnknownKey { .. }) => unresolved(),
        other => other,
    }
}
