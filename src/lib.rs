//! OADA Formats
//!
//! Media-type to schema resolution and a registry of cross-referencing
//! JSON Schema documents for the OADA API.
//!
//! A vendor media type such as `application/vnd.oada.bookmarks.1+json` names
//! the schema key `/oada/bookmarks/v1.schema.json`, whose document lives at
//! `https://formats.openag.io/oada/bookmarks/v1.schema.json`.
//!
//! # Example
//!
//! ```
//! use oada_formats::{media_type_to_schema, media_type_to_schema_legacy};
//!
//! assert_eq!(
//!     media_type_to_schema("application/vnd.oada.bookmarks.1+json"),
//!     vec!["https://formats.openag.io/oada/bookmarks/v1.schema.json"]
//! );
//!
//! // An explicit schema parameter wins.
//! assert_eq!(
//!     media_type_to_schema(r#"application/vnd.test.not.oada+json; schema="test foo""#),
//!     vec!["test", "foo"]
//! );
//!
//! // Not a versioned vendor type.
//! assert!(media_type_to_schema("application/vnd.test.not.oada+json").is_empty());
//!
//! let legacy = media_type_to_schema_legacy("application/vnd.oada.service.jobs.1+json");
//! assert_eq!(legacy[0].as_str(), "/oada/service/jobs/v1.schema.json");
//! assert_eq!(legacy[1].as_str(), "/oada/service/jobs.schema.json");
//! ```
//!
//! # Validating against the corpus
//!
//! ```no_run
//! use oada_formats::{RegistryOptions, SchemaRegistry};
//! use serde_json::json;
//!
//! let registry = SchemaRegistry::new(RegistryOptions::new("schemas")).unwrap();
//! let ok = registry.is_valid(
//!     "application/vnd.oada.bookmarks.1+json",
//!     &json!({ "_type": "application/vnd.oada.bookmarks.1+json" }),
//! );
//! # let _ = ok;
//! ```

mod check;
mod error;
mod headers;
mod index;
mod loader;
mod media_type;
mod normalize;
mod resolver;
mod types;
mod validator;

pub use check::{check_all, check_key, CheckReport, Diagnostic, KeyReport, KeyStatus, Severity};
pub use error::{IndexError, ResolveError, SchemaError, ValidateError};
pub use headers::{content_type_echo, describedby_link};
pub use index::{Loader, SchemaIndex};
pub use loader::{
    default_fetcher, discover_sources, load_schema, load_schema_str, navigate_fragment, Fetch,
    OfflineFetcher,
};
pub use media_type::{
    is_valid_version, media_type_to_schema, media_type_to_schema_legacy,
    media_type_to_schema_with_base, resolve_keys, resolve_media_type, MediaType, Unresolvable,
};
pub use normalize::{
    absolutize, merge_all_of, merge_schemas, AbsolutizeRefs, HoistBooleanOperators, NodeKind,
    NormalizationRule, NormalizeContext, Normalizer,
};
pub use resolver::{RefResolver, RefTarget};
pub use types::{
    FetchPolicy, RegistryOptions, ResolutionMode, SchemaKey, DEFAULT_BASE_URL,
    META_SCHEMA_PREFIXES,
};
pub use validator::{collect_errors, SchemaRegistry};

#[cfg(feature = "remote")]
pub use loader::HttpFetcher;
