//! schemabind
//!
//! Compiles JSON Schema documents into typed descriptors, validates
//! values against them, manages persisted schema-backed objects and
//! generates Rust types that share the same validation rules.
//!
//! # Example
//!
//! ```
//! use schemabind::{compile_document, CompileOptions, ConstraintKind, MemoryFetcher};
//! use serde_json::json;
//!
//! let schema = json!({
//!     "type": "object",
//!     "required": ["name"],
//!     "properties": {
//!         "name": { "type": "string" },
//!         "age": { "type": "integer", "minimum": 0, "default": 0 }
//!     }
//! });
//!
//! let types = compile_document(
//!     &schema,
//!     "https://example.com/person.json",
//!     &MemoryFetcher::new(),
//!     &CompileOptions::default(),
//! )
//! .unwrap();
//!
//! let person = types.root().unwrap();
//! assert_eq!(person.fields.len(), 2);
//!
//! let err = types.check(&person.uri, &json!({ "age": -1 })).unwrap_err();
//! assert_eq!(err.violations[0].kind, ConstraintKind::Required);
//! assert_eq!(err.violations[1].to_string(), "/age: -1 is less than the minimum of 0");
//! ```
//!
//! # Pipeline
//!
//! | Stage | Entry point | Output |
//! |-------|-------------|--------|
//! | resolve | [`resolve`] | [`SchemaGraph`] (cycle-safe arena) |
//! | compile | [`compile`] | [`DescriptorSet`] |
//! | validate | [`validate`] / [`DescriptorSet::check`] | [`Violation`]s |
//! | runtime | [`ObjectInstance`], [`ObjectManager`] | live, persisted objects |
//! | generate | [`generate`], [`generate_module`] | Rust source |

mod codegen;
mod compiler;
mod document;
mod error;
mod instance;
mod linter;
mod manager;
mod resolver;
mod storage;
mod types;
mod validator;

use url::Url;

pub use codegen::{generate, generate_module, generate_module_with, generate_with, GenerateOptions};
pub use compiler::compile;
pub use document::{
    codec_for_path, is_url, load_document, source_uri, DefaultFetcher, DocumentCodec,
    DocumentFetcher, FileFetcher, JsonCodec, MemoryFetcher, YamlCodec,
};
pub use error::{
    AccessError, CompilationError, ConstraintKind, FetchError, GenerationError, LoadError,
    ParseError, PathSegment, ResolutionError, SaveError, SchemaError, SerializeError, Severity,
    StorageError, ValidationError, Violation,
};
pub use instance::{Identity, ObjectInstance};
pub use linter::{lint, lint_file, Diagnostic, FileResult, FileStatus, LintResult};
pub use manager::{BatchLoad, ManagerOptions, ObjectManager};
pub use resolver::{
    navigate_fragment, resolve, Edge, EdgeRole, NodeId, NodeKind, SchemaGraph, SchemaNode,
};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use types::{
    json_type_name, AdditionalFields, CompileOptions, CompositionRule, Constraints, DeclaredType,
    DescriptorKind, DescriptorSet, FieldDescriptor, ScalarKind, TypeDescriptor, TypeRef,
    ValueSchema,
};
pub use validator::{check_serializable, from_checked, validate, validate_value};

#[cfg(feature = "remote")]
pub use document::HttpFetcher;

/// Fetch the document at `uri`, then resolve and compile it.
///
/// # Errors
///
/// `SchemaError::Resolution` when the URI is malformed, a document cannot
/// be fetched or a `$ref` does not resolve; `SchemaError::Compilation`
/// when the resolved graph does not compile.
pub fn compile_schema(
    uri: &str,
    fetcher: &dyn DocumentFetcher,
    options: &CompileOptions,
) -> Result<DescriptorSet, SchemaError> {
    let url = Url::parse(uri).map_err(|e| ResolutionError::InvalidUri {
        uri: uri.to_string(),
        message: e.to_string(),
    })?;
    let document = fetcher
        .fetch_document(&url)
        .map_err(|source| ResolutionError::Fetch {
            uri: uri.to_string(),
            source,
        })?;
    compile_document(&document, uri, fetcher, options)
}

/// Resolve and compile an already-loaded root document.
///
/// `base_uri` identifies the document; relative `$ref`s resolve against
/// it (or against the document's own `$id`).
pub fn compile_document(
    document: &serde_json::Value,
    base_uri: &str,
    fetcher: &dyn DocumentFetcher,
    options: &CompileOptions,
) -> Result<DescriptorSet, SchemaError> {
    let graph = resolve(document, base_uri, fetcher)?;
    tracing::debug!(uri = base_uri, nodes = graph.len(), "resolved schema graph");
    Ok(compile(&graph, options)?)
}
