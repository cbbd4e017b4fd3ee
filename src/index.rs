//! Index of every schema document, keyed by [`SchemaKey`].
//!
//! The key set is discovered once; documents are loaded on first use,
//! checked against their expected `$id`, normalized, and cached for the
//! life of the index.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock, RwLock};

use serde_json::Value;
use tracing::{debug, info, trace};

use crate::error::IndexError;
use crate::loader::{discover_sources, load_schema};
use crate::normalize::Normalizer;
use crate::types::{RegistryOptions, SchemaKey};

/// Produces the raw (unnormalized) document for one key.
pub type Loader = Box<dyn Fn() -> Result<Value, IndexError> + Send + Sync>;

struct Entry {
    source: Option<PathBuf>,
    verify_id: bool,
    load: Loader,
    document: OnceLock<Arc<Value>>,
}

/// Lazily loaded, memoized schema documents.
pub struct SchemaIndex {
    base_url: String,
    normalizer: Normalizer,
    entries: RwLock<BTreeMap<SchemaKey, Arc<Entry>>>,
}

impl std::fmt::Debug for SchemaIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaIndex")
            .field("base_url", &self.base_url)
            .field("normalizer", &self.normalizer)
            .field("keys", &self.keys())
            .finish()
    }
}

impl SchemaIndex {
    /// An index without documents.
    pub fn new(options: &RegistryOptions) -> Self {
        Self {
            base_url: options.base_url.clone(),
            normalizer: Normalizer::default(),
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Discover every schema source under `options.root`.
    ///
    /// Nothing is loaded yet; each file is registered with a loader that
    /// runs on first [`get`](Self::get).
    ///
    /// # Errors
    ///
    /// Returns `IndexError::Discovery` if the root cannot be walked and
    /// `IndexError::KeyCollision` if two sources map to the same key.
    pub fn discover(options: &RegistryOptions) -> Result<Self, IndexError> {
        let index = Self::new(options);
        let mut paths: BTreeMap<SchemaKey, PathBuf> = BTreeMap::new();

        for (relative, path) in discover_sources(&options.root)? {
            let key = SchemaKey::from_source_path(&relative);
            if let Some(first) = paths.get(&key) {
                return Err(IndexError::KeyCollision {
                    key: key.to_string(),
                    first: first.clone(),
                    second: path,
                });
            }
            paths.insert(key, path);
        }

        for (key, path) in paths {
            let source = path.clone();
            index.register(
                key,
                Some(source),
                true,
                Box::new(move || load_schema(&path)),
            );
        }

        info!(
            root = %options.root.display(),
            schemas = index.len(),
            "discovered schema sources"
        );
        Ok(index)
    }

    /// Replace the normalizer applied to documents loaded from now on.
    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Site that canonical keys are rooted at.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Expected `$id` for the document stored under `key`.
    pub fn expected_id(&self, key: &SchemaKey) -> String {
        key.to_url(&self.base_url)
    }

    /// Every key in the index, sorted.
    pub fn keys(&self) -> Vec<SchemaKey> {
        self.read_entries().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_entries().is_empty()
    }

    /// Whether `key` is indexed. Does not load the document.
    pub fn contains(&self, key: &str) -> bool {
        self.read_entries().contains_key(key)
    }

    /// File the document under `key` is loaded from, if it came from disk.
    pub fn source_path(&self, key: &str) -> Option<PathBuf> {
        self.read_entries().get(key).and_then(|e| e.source.clone())
    }

    /// Whether the document under `key` has been loaded already.
    pub fn is_loaded(&self, key: &str) -> bool {
        self.read_entries()
            .get(key)
            .map(|e| e.document.get().is_some())
            .unwrap_or(false)
    }

    /// Register an in-memory document under `key`, replacing any previous
    /// entry. The document is normalized on first use; its `$id` is not
    /// checked against the key.
    pub fn insert(&self, key: SchemaKey, document: Value) {
        debug!(%key, "registering in-memory schema");
        self.register(key, None, false, Box::new(move || Ok(document.clone())));
    }

    /// Register a custom loader under `key`, replacing any previous entry.
    ///
    /// When `verify_id` is set, the loaded document must carry the
    /// canonical `$id` for `key`.
    pub fn insert_loader(&self, key: SchemaKey, verify_id: bool, load: Loader) {
        self.register(key, None, verify_id, load);
    }

    /// The normalized document stored under `key`, loading it on first use.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::UnknownKey` for keys that are not indexed, the
    /// loader's error if loading fails, and `IndexError::IdMismatch` if the
    /// document's `$id` is not the canonical one for `key`.
    pub fn get(&self, key: &str) -> Result<Arc<Value>, IndexError> {
        let entry = self
            .read_entries()
            .get(key)
            .cloned()
            .ok_or_else(|| IndexError::UnknownKey {
                key: key.to_string(),
            })?;

        if let Some(document) = entry.document.get() {
            trace!(key, "schema cache hit");
            return Ok(Arc::clone(document));
        }

        debug!(key, "loading schema");
        let raw = (entry.load)()?;
        if entry.verify_id {
            self.check_id(key, &raw)?;
        }
        let normalized = Arc::new(self.normalizer.normalize(&raw));

        // A concurrent load of the same key may have won; both are equal.
        Ok(Arc::clone(entry.document.get_or_init(|| normalized)))
    }

    /// Check that `document` carries the canonical `$id` for `key`.
    pub fn check_id(&self, key: &str, document: &Value) -> Result<(), IndexError> {
        let expected = self.expected_id(&SchemaKey::from(key));
        let actual = document.get("$id").and_then(Value::as_str);
        match actual {
            Some(id) if id.trim_end_matches('#') == expected => Ok(()),
            _ => Err(IndexError::IdMismatch {
                key: key.to_string(),
                expected,
                actual: actual.map(str::to_string),
            }),
        }
    }

    fn register(&self, key: SchemaKey, source: Option<PathBuf>, verify_id: bool, load: Loader) {
        let entry = Arc::new(Entry {
            source,
            verify_id,
            load,
            document: OnceLock::new(),
        });
        self.write_entries().insert(key, entry);
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<SchemaKey, Arc<Entry>>> {
        // Entries are only ever replaced whole, so a poisoned map is still consistent.
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_entries(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<SchemaKey, Arc<Entry>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn write(dir: &std::path::Path, rel: &str, content: &Value) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, serde_json::to_string(content).unwrap()).unwrap();
    }

    #[test]
    fn discover_maps_sources_to_keys() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "oada/link/v1.schema.json",
            &json!({"$id": "https://formats.openag.io/oada/link/v1.schema.json"}),
        );
        write(
            dir.path(),
            "oada/resource.json",
            &json!({"$id": "https://formats.openag.io/oada/resource.schema.json"}),
        );

        let index = SchemaIndex::discover(&RegistryOptions::new(dir.path())).unwrap();
        assert_eq!(
            index.keys(),
            vec![
                SchemaKey::new("/oada/link/v1.schema.json"),
                SchemaKey::new("/oada/resource.schema.json"),
            ]
        );
        assert!(index.contains("/oada/resource.schema.json"));
        assert!(!index.is_loaded("/oada/resource.schema.json"));
        assert_eq!(
            index.get("/oada/resource.schema.json").unwrap()["$id"],
            "https://formats.openag.io/oada/resource.schema.json"
        );
        assert!(index.is_loaded("/oada/resource.schema.json"));
    }

    #[test]
    fn discover_rejects_key_collisions() {
        let dir = tempdir().unwrap();
        write(dir.path(), "oada/a.json", &json!({}));
        write(dir.path(), "oada/a.schema.json", &json!({}));

        let result = SchemaIndex::discover(&RegistryOptions::new(dir.path()));
        assert!(matches!(result, Err(IndexError::KeyCollision { .. })));
    }

    #[test]
    fn id_mismatch_is_reported() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "oada/a/v1.schema.json",
            &json!({"$id": "https://formats.openag.io/oada/b/v1.schema.json"}),
        );
        write(dir.path(), "oada/c/v1.schema.json", &json!({"type": "object"}));

        let index = SchemaIndex::discover(&RegistryOptions::new(dir.path())).unwrap();
        match index.get("/oada/a/v1.schema.json") {
            Err(IndexError::IdMismatch { expected, actual, .. }) => {
                assert_eq!(expected, "https://formats.openag.io/oada/a/v1.schema.json");
                assert_eq!(
                    actual.as_deref(),
                    Some("https://formats.openag.io/oada/b/v1.schema.json")
                );
            }
            other => panic!("expected IdMismatch, got {other:?}"),
        }
        assert!(matches!(
            index.get("/oada/c/v1.schema.json"),
            Err(IndexError::IdMismatch { actual: None, .. })
        ));
    }

    #[test]
    fn unknown_key() {
        let index = SchemaIndex::new(&RegistryOptions::new("unused"));
        assert!(matches!(index.get("/nope.schema.json"), Err(IndexError::UnknownKey { .. })));
    }

    #[test]
    fn documents_are_normalized_on_load() {
        let index = SchemaIndex::new(&RegistryOptions::new("unused"));
        index.insert(
            SchemaKey::new("/x/y.schema.json"),
            json!({
                "$id": "https://formats.openag.io/x/y.schema.json",
                "properties": { "a": { "$ref": "z.schema.json" } }
            }),
        );
        let doc = index.get("/x/y.schema.json").unwrap();
        assert_eq!(doc["properties"]["a"]["$ref"], "https://formats.openag.io/x/z.schema.json");
    }

    #[test]
    fn loader_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let index = SchemaIndex::new(&RegistryOptions::new("unused"));
        index.insert_loader(
            SchemaKey::new("/x/v1.schema.json"),
            true,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"$id": "https://formats.openag.io/x/v1.schema.json"}))
            }),
        );

        let first = index.get("/x/v1.schema.json").unwrap();
        let second = index.get("/x/v1.schema.json").unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn insert_replaces_previous_document() {
        let index = SchemaIndex::new(&RegistryOptions::new("unused"));
        let key = SchemaKey::new("custom");
        index.insert(key.clone(), json!({"type": "string"}));
        assert_eq!(index.get("custom").unwrap()["type"], "string");
        index.insert(key, json!({"type": "number"}));
        assert_eq!(index.get("custom").unwrap()["type"], "number");
    }

    #[test]
    fn trailing_empty_fragment_in_id_is_accepted() {
        let index = SchemaIndex::new(&RegistryOptions::new("unused"));
        let doc = json!({"$id": "https://formats.openag.io/x/v1.schema.json#"});
        assert!(index.check_id("/x/v1.schema.json", &doc).is_ok());
    }

    #[test]
    fn custom_normalizer() {
        let index = SchemaIndex::new(&RegistryOptions::new("unused")).with_normalizer(Normalizer::empty());
        let raw = json!({
            "$id": "https://formats.openag.io/x/y.schema.json",
            "properties": { "a": { "$ref": "./z.schema.json" } }
        });
        index.insert(SchemaKey::new("/x/y.schema.json"), raw.clone());
        assert!(!index.is_loaded("/x/y.schema.json"));
        assert_eq!(*index.get("/x/y.schema.json").unwrap(), raw);
        assert!(index.is_loaded("/x/y.schema.json"));
    }
}
