//! Schema registry: compiles indexed schemas and validates payloads.
//!
//! Cross-document `$ref`s are satisfied by a [`jsonschema::Retrieve`]
//! implementation backed by the [`RefResolver`], so compilation never
//! reaches the network except for configured meta-schema prefixes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use jsonschema::{Draft, Retrieve, Uri, Validator};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::error::{IndexError, ResolveError, SchemaError, ValidateError};
use crate::index::SchemaIndex;
use crate::loader::split_fragment;
use crate::media_type::media_type_to_schema_legacy;
use crate::resolver::RefResolver;
use crate::types::{RegistryOptions, SchemaKey};

/// Indexed schemas plus a cache of their compiled validators.
pub struct SchemaRegistry {
    resolver: Arc<RefResolver>,
    draft: Draft,
    compiled: Mutex<HashMap<String, Arc<Validator>>>,
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("resolver", &self.resolver)
            .field("draft", &self.draft)
            .finish_non_exhaustive()
    }
}

impl SchemaRegistry {
    /// Discover every schema under `options.root` and register it
    /// uncompiled.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::Discovery` if the root cannot be walked and
    /// `IndexError::KeyCollision` if two sources map to one key.
    pub fn new(options: RegistryOptions) -> Result<Self, IndexError> {
        let index = Arc::new(SchemaIndex::discover(&options)?);
        Ok(Self::from_resolver(Arc::new(RefResolver::new(index, options))))
    }

    /// Registry over an existing resolver (and the index behind it).
    pub fn from_resolver(resolver: Arc<RefResolver>) -> Self {
        Self {
            resolver,
            draft: Draft::Draft201909,
            compiled: Mutex::new(HashMap::new()),
        }
    }

    /// Compile with `draft` when a schema does not say otherwise.
    pub fn with_draft(mut self, draft: Draft) -> Self {
        self.draft = draft;
        self
    }

    pub fn resolver(&self) -> &Arc<RefResolver> {
        &self.resolver
    }

    pub fn index(&self) -> &Arc<SchemaIndex> {
        self.resolver.index()
    }

    pub fn options(&self) -> &RegistryOptions {
        self.resolver.options()
    }

    /// Register (or replace) `document` under `key`.
    ///
    /// All cached compilations are dropped since other schemas may embed
    /// the replaced one.
    pub fn add_schema(&self, key: impl Into<SchemaKey>, document: Value) {
        self.resolver.index().insert(key.into(), document);
        self.compiled_cache().clear();
    }

    /// Compiled validator for a key, a site URL, or a media type.
    ///
    /// Returns `None` if nothing matches or no candidate compiles; use
    /// [`SchemaRegistry::compile`] to learn why.
    pub fn get_schema(&self, reference: &str) -> Option<Arc<Validator>> {
        self.compile(reference).ok()
    }

    /// Compile the schema named by `reference`.
    ///
    /// `reference` is tried as an indexed key (optionally with a
    /// `#fragment`), then as a site-absolute URL, and finally as a media
    /// type whose legacy candidates are tried in order until one compiles.
    ///
    /// # Errors
    ///
    /// `ValidateError::NoSchema` if no candidate is indexed; otherwise the
    /// error of the last candidate that failed to load or compile.
    pub fn compile(&self, reference: &str) -> Result<Arc<Validator>, ValidateError> {
        self.compile_reference(reference).map(|(_, validator)| validator)
    }

    /// Validate `payload` against the schema named by `reference`.
    ///
    /// # Errors
    ///
    /// `ValidateError::Invalid` with every violation if the payload does not
    /// match, or the error from [`SchemaRegistry::compile`].
    pub fn validate(&self, reference: &str, payload: &Value) -> Result<(), ValidateError> {
        let (key, validator) = self.compile_reference(reference)?;
        let errors = collect_errors(&validator, payload);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidateError::Invalid {
                key: key.to_string(),
                errors,
            })
        }
    }

    pub fn is_valid(&self, reference: &str, payload: &Value) -> bool {
        self.compile(reference)
            .map(|validator| validator.is_valid(payload))
            .unwrap_or(false)
    }

    /// The schema named by `reference` with every resolvable `$ref` inlined.
    pub fn dereference(&self, reference: &str) -> Result<Value, ValidateError> {
        let key = self
            .candidates(reference)
            .into_iter()
            .find(|key| self.index().contains(key.document_part()))
            .ok_or_else(|| ValidateError::NoSchema {
                reference: reference.to_string(),
            })?;
        let target = self.resolver.resolve_key(&key)?;
        let from = SchemaKey::new(key.document_part()).to_url(&self.options().base_url);
        Ok(self.resolver.bundle(target.value(), Some(&from))?)
    }

    /// Keys `reference` may denote, most specific first.
    pub fn candidates(&self, reference: &str) -> Vec<SchemaKey> {
        if let Some(key) = self.options().key_for_url(reference) {
            return vec![key];
        }
        let literal = SchemaKey::from(reference);
        if self.index().contains(literal.document_part()) {
            return vec![literal];
        }
        media_type_to_schema_legacy(reference)
            .into_iter()
            .map(|key| self.options().key_for_url(key.as_str()).unwrap_or(key))
            .collect()
    }

    fn compile_reference(&self, reference: &str) -> Result<(SchemaKey, Arc<Validator>), ValidateError> {
        let mut last_error = None;
        for key in self.candidates(reference) {
            if !self.index().contains(key.document_part()) {
                continue;
            }
            match self.compile_key(&key) {
                Ok(validator) => return Ok((key, validator)),
                Err(e) => {
                    debug!(%key, error = %e, "candidate schema unusable");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ValidateError::NoSchema {
            reference: reference.to_string(),
        }))
    }

    fn compile_key(&self, key: &SchemaKey) -> Result<Arc<Validator>, ValidateError> {
        if let Some(validator) = self.compiled_cache().get(key.as_str()) {
            trace!(%key, "compiled schema cache hit");
            return Ok(Arc::clone(validator));
        }

        let target = self.resolver.resolve_key(key)?;
        let mut options = jsonschema::options();
        options.with_draft(self.draft);
        options.with_retriever(IndexRetriever {
            resolver: Arc::clone(&self.resolver),
        });

        let validator = options.build(target.value()).map_err(|e| {
            warn!(%key, error = %e, "schema failed to compile");
            ValidateError::Compile {
                key: key.to_string(),
                message: e.to_string(),
            }
        })?;
        debug!(%key, "compiled schema");

        let validator = Arc::new(validator);
        self.compiled_cache()
            .insert(key.to_string(), Arc::clone(&validator));
        Ok(validator)
    }

    fn compiled_cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Validator>>> {
        self.compiled.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Every violation of `payload` against `validator`.
pub fn collect_errors(validator: &Validator, payload: &Value) -> Vec<SchemaError> {
    validator
        .iter_errors(payload)
        .map(|e| {
            let schema_path = e.schema_path.to_string();
            SchemaError {
                path: e.instance_path.to_string(),
                keyword: schema_path.rsplit('/').next().unwrap_or_default().to_string(),
                schema_path,
                message: e.to_string(),
            }
        })
        .collect()
}

// --- Internal implementation ---

/// Serves documents to `jsonschema` from the index (and meta-schema memo).
struct IndexRetriever {
    resolver: Arc<RefResolver>,
}

impl IndexRetriever {
    fn lookup(&self, uri: &str) -> Result<Value, ResolveError> {
        let (document, _) = split_fragment(uri);
        let options = self.resolver.options();
        let index = self.resolver.index();

        if let Some(key) = options.key_for_url(document) {
            // Source-style names map to keys as discovery does.
            let key = if index.contains(key.as_str()) {
                key
            } else {
                SchemaKey::from_source_path(key.as_str())
            };
            return index
                .get(key.as_str())
                .map(|doc| (*doc).clone())
                .map_err(|e| match e {
                    IndexError::UnknownKey { .. } => ResolveError::UnresolvedRef {
                        reference: uri.to_string(),
                        from: None,
                    },
                    other => other.into(),
                });
        }
        if options.is_meta_schema(document) {
            return self.resolver.fetch_remote(document).map(|doc| (*doc).clone());
        }
        if index.contains(document) {
            return Ok((*index.get(document)?).clone());
        }
        Err(ResolveError::UnresolvedRef {
            reference: uri.to_string(),
            from: None,
        })
    }
}

impl Retrieve for IndexRetriever {
    fn retrieve(&self, uri: &Uri<&str>) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        trace!(uri = uri.as_str(), "retrieving referenced schema");
        Ok(self.lookup(uri.as_str())?)
    }
}
