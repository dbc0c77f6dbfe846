//! Compiled type descriptors and the options that shape compilation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use regex::Regex;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::{ConstraintKind, ValidationError, Violation};

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Primitive JSON-Schema types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    String,
    Integer,
    Number,
    Boolean,
    Null,
}

impl ScalarKind {
    /// Parse a scalar `type` keyword value.
    ///
    /// Returns `None` for `object`, `array` and unknown names.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(ScalarKind::String),
            "integer" => Some(ScalarKind::Integer),
            "number" => Some(ScalarKind::Number),
            "boolean" => Some(ScalarKind::Boolean),
            "null" => Some(ScalarKind::Null),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScalarKind::String => "string",
            ScalarKind::Integer => "integer",
            ScalarKind::Number => "number",
            ScalarKind::Boolean => "boolean",
            ScalarKind::Null => "null",
        }
    }

    /// Whether `value` is an instance of this kind.
    ///
    /// Integers are numbers; floats with no fractional part are integers.
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (ScalarKind::String, Value::String(_)) => true,
            (ScalarKind::Number, Value::Number(_)) => true,
            (ScalarKind::Integer, Value::Number(n)) => {
                n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            (ScalarKind::Boolean, Value::Bool(_)) => true,
            (ScalarKind::Null, Value::Null) => true,
            _ => false,
        }
    }
}

/// Reference to another compiled descriptor, by URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TypeRef {
    pub uri: String,
    pub name: String,
}

/// Declared type of a field, array item, or composition alternative.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "of", rename_all = "camelCase")]
pub enum DeclaredType {
    Scalar(ScalarKind),
    Union(Vec<ScalarKind>),
    Nullable(Box<DeclaredType>),
    Object(TypeRef),
    Array(Box<ValueSchema>),
    Any,
}

impl DeclaredType {
    /// Short human-readable rendering, used in messages.
    pub fn describe(&self) -> String {
        match self {
            DeclaredType::Scalar(kind) => kind.name().to_string(),
            DeclaredType::Union(kinds) => kinds
                .iter()
                .map(ScalarKind::name)
                .collect::<Vec<_>>()
                .join(" | "),
            DeclaredType::Nullable(inner) => format!("{} | null", inner.describe()),
            DeclaredType::Object(r) => format!("object {}", r.name),
            DeclaredType::Array(items) => format!("array of {}", items.declared.describe()),
            DeclaredType::Any => "any".to_string(),
        }
    }
}

/// A compiled `pattern` keyword.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            source: source.to_string(),
            regex: Regex::new(source)?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, s: &str) -> bool {
        self.regex.is_match(s)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

/// A compiled `format` keyword. Checking is delegated to the `jsonschema`
/// format vocabulary; unknown formats accept every value.
#[derive(Clone)]
pub struct Format {
    name: String,
    checker: Arc<jsonschema::Validator>,
}

impl Format {
    pub fn new(name: &str) -> Result<Self, String> {
        let schema = serde_json::json!({ "format": name });
        let checker = jsonschema::options()
            .should_validate_formats(true)
            .build(&schema)
            .map_err(|e| e.to_string())?;
        Ok(Self {
            name: name.to_string(),
            checker: Arc::new(checker),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_valid(&self, value: &Value) -> bool {
        self.checker.is_valid(value)
    }
}

impl std::fmt::Debug for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Format").field(&self.name).finish()
    }
}

impl PartialEq for Format {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Serialize for Format {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name)
    }
}

/// Value-level constraints of one field, item, or alternative.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclusive_minimum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclusive_maximum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiple_of: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<Pattern>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<Format>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enumeration: Option<Vec<Value>>,
    #[serde(rename = "const", skip_serializing_if = "Option::is_none")]
    pub constant: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_items: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_items: Option<u64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub unique_items: bool,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        *self == Constraints::default()
    }
}

/// Declared type plus constraints: everything needed to check one value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueSchema {
    pub declared: DeclaredType,
    #[serde(skip_serializing_if = "Constraints::is_empty")]
    pub constraints: Constraints,
}

impl ValueSchema {
    pub fn any() -> Self {
        Self {
            declared: DeclaredType::Any,
            constraints: Constraints::default(),
        }
    }

    pub fn of(declared: DeclaredType) -> Self {
        Self {
            declared,
            constraints: Constraints::default(),
        }
    }
}

/// How object keys outside the declared fields are treated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "policy", content = "schema", rename_all = "lowercase")]
pub enum AdditionalFields {
    Forbid,
    Allow,
    Typed(Box<ValueSchema>),
}

/// Composition recorded on a descriptor.
///
/// `AllOf` is informational (constituents were flattened into the fields);
/// `OneOf`/`AnyOf` alternatives are checked at validation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CompositionRule {
    None,
    AllOf,
    OneOf,
    AnyOf,
}

/// Whether a descriptor asserts that its values are JSON objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptorKind {
    Object,
    Composite,
}

/// One field of a [`TypeDescriptor`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub name: String,
    pub schema: ValueSchema,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    pub required: bool,
    pub read_only: bool,
    /// False for fields excluded from persisted documents.
    pub serialized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Compiled, immutable shape of one schema node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeDescriptor {
    pub uri: String,
    pub name: String,
    pub kind: DescriptorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub fields: Vec<FieldDescriptor>,
    pub required: BTreeSet<String>,
    pub additional: AdditionalFields,
    pub composition: CompositionRule,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub constituents: Vec<ValueSchema>,
}

impl TypeDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Whether keys outside the declared fields may be stored.
    pub fn allows_extra(&self) -> bool {
        !matches!(self.additional, AdditionalFields::Forbid)
    }

    /// Field defaults, deep-copied into a fresh value map.
    pub fn defaults(&self) -> serde_json::Map<String, Value> {
        self.fields
            .iter()
            .filter_map(|f| f.default.clone().map(|d| (f.name.clone(), d)))
            .collect()
    }
}

/// Output of compilation: every descriptor keyed by canonical URI.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DescriptorSet {
    root: Option<String>,
    descriptors: BTreeMap<String, Arc<TypeDescriptor>>,
    aliases: BTreeMap<String, String>,
}

impl DescriptorSet {
    pub(crate) fn new(
        root: Option<String>,
        descriptors: BTreeMap<String, Arc<TypeDescriptor>>,
        aliases: BTreeMap<String, String>,
    ) -> Self {
        Self {
            root,
            descriptors,
            aliases,
        }
    }

    /// Descriptor of the root document, when it is an object type.
    pub fn root(&self) -> Option<&Arc<TypeDescriptor>> {
        self.root.as_ref().and_then(|uri| self.descriptors.get(uri))
    }

    /// Look up a descriptor by canonical URI or any alias that resolved to it.
    pub fn get(&self, uri: &str) -> Option<&Arc<TypeDescriptor>> {
        self.descriptors.get(uri).or_else(|| {
            self.aliases
                .get(uri)
                .and_then(|canonical| self.descriptors.get(canonical))
        })
    }

    /// Look up a descriptor by its (unique) name.
    pub fn by_name(&self, name: &str) -> Option<&Arc<TypeDescriptor>> {
        self.descriptors.values().find(|d| d.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<TypeDescriptor>> {
        self.descriptors.values()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Validate `value` against the descriptor at `uri`.
    ///
    /// An unknown URI is reported as a single root violation.
    pub fn check(&self, uri: &str, value: &Value) -> Result<(), ValidationError> {
        match self.get(uri) {
            Some(descriptor) => {
                ValidationError::check(crate::validator::validate(self, descriptor, value))
            }
            None => Err(ValidationError {
                violations: vec![Violation::new(
                    &[],
                    ConstraintKind::UnknownType,
                    format!("no compiled type '{}'", uri),
                )],
            }),
        }
    }
}

/// Options for compilation.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// When true, objects without `additionalProperties` reject unknown
    /// fields. Defaults to false (JSON-Schema's open content model).
    pub strict: bool,
    /// When true, fields without a `default` take the first `enum` member,
    /// and array fields that may be empty default to `[]`.
    pub implicit_defaults: bool,
    /// When true, every compiled default is validated against its field.
    pub check_defaults: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            strict: false,
            implicit_defaults: true,
            check_defaults: true,
        }
    }
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set strict mode (missing `additionalProperties` means forbid).
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn implicit_defaults(mut self, enabled: bool) -> Self {
        self.implicit_defaults = enabled;
        self
    }

    pub fn check_defaults(mut self, enabled: bool) -> Self {
        self.check_defaults = enabled;
        self
    }
}
