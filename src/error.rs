//! Error types for schema resolution, compilation, validation and persistence.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

/// Errors raised by a [`DocumentFetcher`](crate::DocumentFetcher).
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("document not found: {uri}")]
    NotFound { uri: String },

    #[error("unsupported URI scheme '{scheme}' in {uri}")]
    UnsupportedScheme { uri: String, scheme: String },

    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {uri}: {source}")]
    Network {
        uri: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("cannot parse {uri}: {source}")]
    Parse {
        uri: String,
        #[source]
        source: ParseError,
    },
}

/// Errors turning raw bytes into a generic document.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON: {source}")]
    Json {
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid YAML: {source}")]
    Yaml {
        #[source]
        source: serde_yaml::Error,
    },
}

/// Errors turning a generic document back into bytes.
#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("cannot encode JSON: {source}")]
    Json {
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot encode YAML: {source}")]
    Yaml {
        #[source]
        source: serde_yaml::Error,
    },
}

/// Errors raised by a [`Storage`](crate::Storage) backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no stored object under '{key}'")]
    NotFound { key: String },

    #[error("invalid storage key '{key}'")]
    InvalidKey { key: String },

    #[error("storage I/O failed for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors during reference resolution.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("invalid URI '{uri}': {message}")]
    InvalidUri { uri: String, message: String },

    #[error("unresolvable $ref '{reference}' in {uri}")]
    Unresolvable { uri: String, reference: String },

    #[error("$ref chain starting at {uri} never reaches a schema")]
    CircularAlias { uri: String },

    #[error("invalid schema at {uri}: {message}")]
    InvalidSchema { uri: String, message: String },

    #[error("cannot fetch document for {uri}: {source}")]
    Fetch {
        uri: String,
        #[source]
        source: FetchError,
    },
}

impl ResolutionError {
    /// URI of the node (or document) the failure was detected at.
    pub fn uri(&self) -> &str {
        match self {
            Self::InvalidUri { uri, .. }
            | Self::Unresolvable { uri, .. }
            | Self::CircularAlias { uri }
            | Self::InvalidSchema { uri, .. }
            | Self::Fetch { uri, .. } => uri,
        }
    }
}

/// Errors during type descriptor compilation.
#[derive(Debug, Error)]
pub enum CompilationError {
    #[error("unknown type '{type_name}' at {uri}")]
    UnknownType { uri: String, type_name: String },

    #[error("cyclic composition through {uri}")]
    CyclicComposition { uri: String },

    #[error("unsatisfiable constraints on '{field}' at {uri}: {message}")]
    Unsatisfiable {
        uri: String,
        field: String,
        message: String,
    },

    #[error("incompatible definitions of '{field}' at {uri}: {message}")]
    FieldConflict {
        uri: String,
        field: String,
        message: String,
    },

    #[error("ambiguous constraint merge on '{field}' at {uri}: {message}")]
    AmbiguousMerge {
        uri: String,
        field: String,
        message: String,
    },

    #[error("unsupported composition at {uri}: {message}")]
    UnsupportedComposition { uri: String, message: String },

    #[error("invalid '{keyword}' at {uri}: {message}")]
    InvalidKeyword {
        uri: String,
        keyword: String,
        message: String,
    },

    #[error("default of '{field}' at {uri} is invalid: {}", render_violations(violations))]
    InvalidDefault {
        uri: String,
        field: String,
        violations: Vec<Violation>,
    },
}

impl CompilationError {
    /// URI of the schema node that failed to compile.
    pub fn uri(&self) -> &str {
        match self {
            Self::UnknownType { uri, .. }
            | Self::CyclicComposition { uri }
            | Self::Unsatisfiable { uri, .. }
            | Self::FieldConflict { uri, .. }
            | Self::AmbiguousMerge { uri, .. }
            | Self::UnsupportedComposition { uri, .. }
            | Self::InvalidKeyword { uri, .. }
            | Self::InvalidDefault { uri, .. } => uri,
        }
    }
}

/// Either half of [`compile_schema`](crate::compile_schema).
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Compilation(#[from] CompilationError),
}

impl SchemaError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            SchemaError::Resolution(ResolutionError::Fetch { source, .. }) => match source {
                FetchError::Parse { .. } => 2,
                _ => 3,
            },
            _ => 2,
        }
    }
}

/// Severity of a reported problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// One step of a [`Violation`] path: an object field or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

impl From<&str> for PathSegment {
    fn from(name: &str) -> Self {
        PathSegment::Field(name.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

/// The constraint a [`Violation`] reports against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConstraintKind {
    Type,
    Required,
    AdditionalField,
    Minimum,
    Maximum,
    ExclusiveMinimum,
    ExclusiveMaximum,
    MultipleOf,
    MinLength,
    MaxLength,
    Pattern,
    Format,
    Enum,
    Const,
    MinItems,
    MaxItems,
    UniqueItems,
    NoAlternativeMatched,
    AmbiguousMatch,
    UnknownType,
}

/// Single constraint failure located by its path from the instance root.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub path: Vec<PathSegment>,
    pub kind: ConstraintKind,
    pub message: String,
    pub severity: Severity,
}

impl Violation {
    pub fn new(path: &[PathSegment], kind: ConstraintKind, message: impl Into<String>) -> Self {
        Self {
            path: path.to_vec(),
            kind,
            message: message.into(),
            severity: Severity::Error,
        }
    }

    /// JSON Pointer (RFC 6901) to the offending value.
    pub fn pointer(&self) -> String {
        self.path
            .iter()
            .map(|segment| match segment {
                PathSegment::Field(name) => {
                    format!("/{}", name.replace('~', "~0").replace('/', "~1"))
                }
                PathSegment::Index(i) => format!("/{}", i),
            })
            .collect()
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pointer = self.pointer();
        let at = if pointer.is_empty() { "/" } else { &pointer };
        write!(f, "{}: {}", at, self.message)
    }
}

fn render_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(Violation::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A value failed validation. Carries every violation, in engine order.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("validation failed with {} violation(s): {}", violations.len(), render_violations(violations))]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

impl ValidationError {
    /// `Ok(())` for an empty violation list, the error otherwise.
    pub fn check(violations: Vec<Violation>) -> Result<(), ValidationError> {
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { violations })
        }
    }
}

/// Misuse of the object runtime, or a write that failed validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AccessError {
    #[error("type '{type_name}' has no field '{field}'")]
    UnknownField { type_name: String, field: String },

    #[error("field '{field}' of '{type_name}' is read-only")]
    ReadOnlyField { type_name: String, field: String },

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Errors materializing an instance from storage.
///
/// Cloneable so a single failure can be handed to every caller waiting
/// on the same load.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error("cannot load {identity}: no compiled type '{type_uri}'")]
    UnknownType { identity: String, type_uri: String },

    #[error("cannot load {identity}: {source}")]
    Storage {
        identity: String,
        #[source]
        source: Arc<StorageError>,
    },

    #[error("cannot load {identity}: {source}")]
    Parse {
        identity: String,
        #[source]
        source: Arc<ParseError>,
    },

    #[error("cannot load {identity}: {source}")]
    Invalid {
        identity: String,
        #[source]
        source: ValidationError,
    },

    #[error("load of {identity} was abandoned before completing")]
    Aborted { identity: String },
}

impl LoadError {
    /// Identity the failed load was for.
    pub fn identity(&self) -> &str {
        match self {
            Self::UnknownType { identity, .. }
            | Self::Storage { identity, .. }
            | Self::Parse { identity, .. }
            | Self::Invalid { identity, .. }
            | Self::Aborted { identity } => identity,
        }
    }

    /// True when storage was reachable but the data failed validation.
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid { .. })
    }
}

/// Errors persisting an instance.
#[derive(Debug, Error)]
pub enum SaveError {
    #[error("instance of '{type_name}' has no identity to save under")]
    NoIdentity { type_name: String },

    #[error("cannot save {identity}: {source}")]
    Invalid {
        identity: String,
        #[source]
        source: ValidationError,
    },

    #[error("cannot save {identity}: {source}")]
    Serialize {
        identity: String,
        #[source]
        source: SerializeError,
    },

    #[error("cannot save {identity}: {source}")]
    Storage {
        identity: String,
        #[source]
        source: StorageError,
    },
}

/// A descriptor could not be expressed in the generated language.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("no target type for {declared} (field '{field}' of '{type_name}')")]
    Unmapped {
        type_name: String,
        field: String,
        declared: String,
    },
    #[error("types '{first}' and '{second}' both generate as '{ident}'")]
    NameCollision {
        ident: String,
        first: String,
        second: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_error_exit_codes() {
        let err = SchemaError::Resolution(ResolutionError::Fetch {
            uri: "file:///missing.json".into(),
            source: FetchError::NotFound {
                uri: "file:///missing.json".into(),
            },
        });
        assert_eq!(err.exit_code(), 3);

        let err = SchemaError::Compilation(CompilationError::CyclicComposition {
            uri: "file:///a.json".into(),
        });
        assert_eq!(err.exit_code(), 2);

        let err = SchemaError::Resolution(ResolutionError::Unresolvable {
            uri: "file:///a.json".into(),
            reference: "#/$defs/Missing".into(),
        });
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn violation_display_uses_json_pointer() {
        let v = Violation::new(
            &["buyer".into(), "emails".into(), 2.into()],
            ConstraintKind::Format,
            "\"x\" is not a valid email",
        );
        assert_eq!(v.to_string(), "/buyer/emails/2: \"x\" is not a valid email");
    }

    #[test]
    fn violation_pointer_escapes_segments() {
        let v = Violation::new(&["a/b".into(), "c~d".into()], ConstraintKind::Type, "bad");
        assert_eq!(v.pointer(), "/a~1b/c~0d");
    }

    #[test]
    fn root_violation_displays_slash() {
        let v = Violation::new(&[], ConstraintKind::Type, "expected object, got string");
        assert_eq!(v.to_string(), "/: expected object, got string");
    }

    #[test]
    fn validation_error_check() {
        assert!(ValidationError::check(vec![]).is_ok());
        let err = ValidationError::check(vec![Violation::new(
            &["age".into()],
            ConstraintKind::Required,
            "missing required field 'age'",
        )])
        .unwrap_err();
        assert_eq!(err.violations.len(), 1);
        assert!(err.to_string().starts_with("validation failed with 1 violation(s)"));
    }

    #[test]
    fn load_error_distinguishes_invalid_data() {
        let err = LoadError::Invalid {
            identity: "people/ann.json".into(),
            source: ValidationError { violations: vec![] },
        };
        assert!(err.is_invalid());
        assert_eq!(err.identity(), "people/ann.json");

        let err = LoadError::Storage {
            identity: "people/ann.json".into(),
            source: Arc::new(StorageError::NotFound {
                key: "people/ann.json".into(),
            }),
        };
        assert!(!err.is_invalid());
    }
}
