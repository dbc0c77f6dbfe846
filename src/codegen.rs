//! Rust source generation from compiled descriptors.
//!
//! Output is a pure function of the descriptor: fields in declaration
//! order, no timestamps, no hash-ordered iteration. Generated setters go
//! through the runtime crate's validator before committing, so generated
//! types and [`ObjectInstance`](crate::ObjectInstance) agree on what is valid.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::error::GenerationError;
use crate::types::{
    DeclaredType, DescriptorKind, DescriptorSet, FieldDescriptor, ScalarKind, TypeDescriptor,
};

/// Options for code generation.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Path of the crate generated code calls into.
    pub runtime_crate: String,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            runtime_crate: "schemabind".to_string(),
        }
    }
}

impl GenerateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runtime_crate(mut self, path: impl Into<String>) -> Self {
        self.runtime_crate = path.into();
        self
    }
}

const RUST_KEYWORDS: &[&str] = &[
    "as", "async", "await", "break", "const", "continue", "dyn", "else", "enum", "extern", "false",
    "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move", "mut", "pub", "ref",
    "return", "static", "struct", "trait", "true", "type", "unsafe", "use", "where", "while",
    "abstract", "become", "box", "do", "final", "macro", "override", "priv", "try", "typeof",
    "unsized", "virtual", "yield", "gen",
];

/// Keywords that cannot be raw identifiers.
const RESERVED: &[&str] = &["self", "Self", "super", "crate", "_"];

/// Generate the Rust source for one descriptor.
///
/// # Errors
///
/// `GenerationError::Unmapped` when a field's declared type has no Rust
/// counterpart (a bare `null` type, or a non-nullable scalar union).
pub fn generate(descriptor: &TypeDescriptor) -> Result<String, GenerationError> {
    generate_with(descriptor, &GenerateOptions::default())
}

pub fn generate_with(
    descriptor: &TypeDescriptor,
    options: &GenerateOptions,
) -> Result<String, GenerationError> {
    let mut out = Emitter::default();
    match descriptor.kind {
        DescriptorKind::Object => emit_struct(&mut out, descriptor, options)?,
        DescriptorKind::Composite => emit_newtype(&mut out, descriptor, options),
    }
    Ok(out.finish())
}

/// Generate every descriptor of a set, in URI order, as one module.
///
/// # Errors
///
/// Besides the per-type errors of [`generate`],
/// `GenerationError::NameCollision` when two descriptor names map to the
/// same Rust identifier.
pub fn generate_module(set: &DescriptorSet) -> Result<String, GenerationError> {
    generate_module_with(set, &GenerateOptions::default())
}

pub fn generate_module_with(
    set: &DescriptorSet,
    options: &GenerateOptions,
) -> Result<String, GenerationError> {
    let mut idents: HashMap<String, &str> = HashMap::new();
    for descriptor in set.iter() {
        let ident = pascal_case(&descriptor.name);
        if let Some(first) = idents.insert(ident.clone(), &descriptor.name) {
            return Err(GenerationError::NameCollision {
                ident,
                first: first.to_string(),
                second: descriptor.name.clone(),
            });
        }
    }

    let mut module = String::from("// @generated by schemabind. Do not edit by hand.\n");
    for descriptor in set.iter() {
        module.push('\n');
        module.push_str(&generate_with(descriptor, options)?);
    }
    Ok(module)
}

#[derive(Default)]
struct Emitter {
    out: String,
    indent: usize,
}

impl Emitter {
    fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if !text.is_empty() {
            for _ in 0..self.indent {
                self.out.push_str("    ");
            }
            self.out.push_str(text);
        }
        self.out.push('\n');
    }

    fn docs(&mut self, text: Option<&str>) {
        if let Some(text) = text {
            for line in text.lines() {
                self.line(format!("/// {}", line).trim_end());
            }
        }
    }

    fn open(&mut self, text: impl AsRef<str>) {
        self.line(text);
        self.indent += 1;
    }

    fn close(&mut self, text: impl AsRef<str>) {
        self.indent = self.indent.saturating_sub(1);
        self.line(text);
    }

    fn finish(self) -> String {
        self.out
    }
}

/// A field with its Rust spelling worked out.
struct FieldPlan<'a> {
    field: &'a FieldDescriptor,
    ident: String,
    /// `ident` without the `r#` prefix; used for method and constant names.
    bare: String,
    rust_type: String,
    optional: bool,
}

fn emit_struct(
    out: &mut Emitter,
    descriptor: &TypeDescriptor,
    options: &GenerateOptions,
) -> Result<(), GenerationError> {
    let type_name = pascal_case(&descriptor.name);
    let runtime = &options.runtime_crate;

    let mut used = HashSet::new();
    let mut plans = Vec::with_capacity(descriptor.fields.len());
    for field in &descriptor.fields {
        let (ident, bare) = field_ident(&field.name, &mut used);
        let (rust_type, optional) = field_type(descriptor, field)?;
        plans.push(FieldPlan {
            field,
            ident,
            bare,
            rust_type,
            optional,
        });
    }
    let extra = descriptor.allows_extra().then(|| field_ident("extra", &mut used).0);

    out.docs(descriptor.description.as_deref());
    out.line("#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]");
    out.open(format!("pub struct {} {{", type_name));
    for plan in &plans {
        out.docs(plan.field.description.as_deref());
        let mut attrs = Vec::new();
        if plan.bare != plan.field.name {
            attrs.push(format!("rename = {:?}", plan.field.name));
        }
        if plan.optional && !plan.field.required {
            attrs.push("default".to_string());
            attrs.push("skip_serializing_if = \"Option::is_none\"".to_string());
        }
        if !attrs.is_empty() {
            out.line(format!("#[serde({})]", attrs.join(", ")));
        }
        out.line(format!("{}: {},", plan.ident, plan.rust_type));
    }
    if let Some(extra) = &extra {
        out.line("#[serde(flatten)]");
        out.line(format!(
            "{}: serde_json::Map<String, serde_json::Value>,",
            extra
        ));
    }
    out.close("}");
    out.line("");

    out.open(format!("impl {} {{", type_name));
    out.line(format!(
        "pub const TYPE_URI: &'static str = {:?};",
        descriptor.uri
    ));
    for plan in &plans {
        if let Some(default) = &plan.field.default {
            out.line(default_constant(&plan.bare, &plan.field.schema.declared, default));
        }
    }
    out.line("");

    out.open(format!(
        "pub fn from_value(types: &{rt}::DescriptorSet, value: serde_json::Value) -> Result<Self, {rt}::ValidationError> {{",
        rt = runtime
    ));
    out.line(format!("{}::from_checked(types, Self::TYPE_URI, value)", runtime));
    out.close("}");

    for plan in &plans {
        out.line("");
        out.open(format!(
            "pub fn {}(&self) -> &{} {{",
            plan.ident, plan.rust_type
        ));
        out.line(format!("&self.{}", plan.ident));
        out.close("}");

        if plan.field.read_only {
            continue;
        }
        out.line("");
        out.open(format!(
            "pub fn set_{}(&mut self, types: &{rt}::DescriptorSet, value: {ty}) -> Result<(), {rt}::ValidationError> {{",
            plan.bare,
            rt = runtime,
            ty = plan.rust_type
        ));
        out.line("let mut next = self.clone();");
        out.line(format!("next.{} = value;", plan.ident));
        out.line(format!(
            "{}::check_serializable(types, Self::TYPE_URI, &next)?;",
            runtime
        ));
        out.line("*self = next;");
        out.line("Ok(())");
        out.close("}");
    }

    if let Some(extra) = &extra {
        out.line("");
        out.open(format!(
            "pub fn {}(&self) -> &serde_json::Map<String, serde_json::Value> {{",
            extra
        ));
        out.line(format!("&self.{}", extra));
        out.close("}");
    }

    out.line("");
    out.open(format!(
        "pub fn check(&self, types: &{rt}::DescriptorSet) -> Result<(), {rt}::ValidationError> {{",
        rt = runtime
    ));
    out.line(format!(
        "{}::check_serializable(types, Self::TYPE_URI, self)",
        runtime
    ));
    out.close("}");
    out.close("}");
    Ok(())
}

/// Composite descriptors (bare `oneOf`/`anyOf`) accept more than objects,
/// so they wrap the JSON value itself.
fn emit_newtype(out: &mut Emitter, descriptor: &TypeDescriptor, options: &GenerateOptions) {
    let type_name = pascal_case(&descriptor.name);
    let runtime = &options.runtime_crate;

    out.docs(descriptor.description.as_deref());
    out.line("#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]");
    out.line("#[serde(transparent)]");
    out.line(format!("pub struct {}(serde_json::Value);", type_name));
    out.line("");
    out.open(format!("impl {} {{", type_name));
    out.line(format!(
        "pub const TYPE_URI: &'static str = {:?};",
        descriptor.uri
    ));
    out.line("");
    out.open(format!(
        "pub fn from_value(types: &{rt}::DescriptorSet, value: serde_json::Value) -> Result<Self, {rt}::ValidationError> {{",
        rt = runtime
    ));
    out.line(format!("{}::from_checked(types, Self::TYPE_URI, value)", runtime));
    out.close("}");
    out.line("");
    out.open("pub fn value(&self) -> &serde_json::Value {");
    out.line("&self.0");
    out.close("}");
    out.line("");
    out.open(format!(
        "pub fn check(&self, types: &{rt}::DescriptorSet) -> Result<(), {rt}::ValidationError> {{",
        rt = runtime
    ));
    out.line("types.check(Self::TYPE_URI, &self.0)");
    out.close("}");
    out.close("}");
}

/// Rust type of a field, and whether that type is an `Option`.
///
/// Direct object references are boxed so recursive types have a size;
/// optional fields become `Option`, and a nullable optional field
/// collapses absent and `null` into `None`.
fn field_type(
    descriptor: &TypeDescriptor,
    field: &FieldDescriptor,
) -> Result<(String, bool), GenerationError> {
    let unmapped = || GenerationError::Unmapped {
        type_name: descriptor.name.clone(),
        field: field.name.clone(),
        declared: field.schema.declared.describe(),
    };
    let direct = |declared: &DeclaredType| -> Option<String> {
        match declared {
            DeclaredType::Object(r) => Some(format!("Box<{}>", pascal_case(&r.name))),
            _ => rust_type(declared),
        }
    };

    let (base, nullable) = match &field.schema.declared {
        DeclaredType::Nullable(inner) => (direct(inner.as_ref()).ok_or_else(unmapped)?, true),
        declared => (direct(declared).ok_or_else(unmapped)?, false),
    };
    if nullable || !field.required {
        Ok((format!("Option<{}>", base), true))
    } else {
        Ok((base, false))
    }
}

/// The closed mapping table. `None` means no Rust counterpart.
fn rust_type(declared: &DeclaredType) -> Option<String> {
    match declared {
        DeclaredType::Scalar(ScalarKind::String) => Some("String".to_string()),
        DeclaredType::Scalar(ScalarKind::Integer) => Some("i64".to_string()),
        DeclaredType::Scalar(ScalarKind::Number) => Some("f64".to_string()),
        DeclaredType::Scalar(ScalarKind::Boolean) => Some("bool".to_string()),
        DeclaredType::Scalar(ScalarKind::Null) => None,
        DeclaredType::Union(_) => None,
        DeclaredType::Any => Some("serde_json::Value".to_string()),
        DeclaredType::Nullable(inner) => rust_type(inner).map(|t| format!("Option<{}>", t)),
        DeclaredType::Array(items) => rust_type(&items.declared).map(|t| format!("Vec<{}>", t)),
        DeclaredType::Object(r) => Some(pascal_case(&r.name)),
    }
}

/// `<FIELD>_DEFAULT` as a literal for scalars, `<FIELD>_DEFAULT_JSON`
/// holding JSON text otherwise.
fn default_constant(bare: &str, declared: &DeclaredType, default: &Value) -> String {
    let name = bare.to_uppercase();
    let literal = match (declared, default) {
        (DeclaredType::Scalar(ScalarKind::String), Value::String(s)) => {
            Some(("&'static str", format!("{:?}", s)))
        }
        (DeclaredType::Scalar(ScalarKind::Integer), Value::Number(n)) => {
            n.as_i64().map(|i| ("i64", i.to_string()))
        }
        (DeclaredType::Scalar(ScalarKind::Number), Value::Number(n)) => {
            n.as_f64().map(|f| ("f64", float_literal(f)))
        }
        (DeclaredType::Scalar(ScalarKind::Boolean), Value::Bool(b)) => {
            Some(("bool", b.to_string()))
        }
        _ => None,
    };
    match literal {
        Some((ty, value)) => format!("pub const {}_DEFAULT: {} = {};", name, ty, value),
        None => format!(
            "pub const {}_DEFAULT_JSON: &'static str = {:?};",
            name,
            default.to_string()
        ),
    }
}

fn float_literal(f: f64) -> String {
    let text = format!("{:?}", f);
    if text.contains('.') || text.contains('e') || text.contains("inf") || text.contains("NaN") {
        text
    } else {
        format!("{}.0", text)
    }
}

/// Snake-case identifier for a JSON field name, unique within `used`.
/// Returns the identifier (possibly `r#`-prefixed) and its bare form.
fn field_ident(name: &str, used: &mut HashSet<String>) -> (String, String) {
    let mut bare = snake_case(name);
    if RESERVED.contains(&bare.as_str()) {
        bare.push('_');
    }
    let base = bare.clone();
    let mut n = 2;
    while !used.insert(bare.clone()) {
        bare = format!("{}_{}", base, n);
        n += 1;
    }
    let ident = if RUST_KEYWORDS.contains(&bare.as_str()) {
        format!("r#{}", bare)
    } else {
        bare.clone()
    };
    (ident, bare)
}

pub(crate) fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev: Option<char> = None;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if c.is_ascii_uppercase() {
                if prev.is_some_and(|p| p.is_ascii_lowercase() || p.is_ascii_digit()) {
                    out.push('_');
                }
                out.push(c.to_ascii_lowercase());
            } else {
                out.push(c);
            }
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
        prev = Some(c);
    }
    let trimmed = out.trim_end_matches('_');
    match trimmed.chars().next() {
        None => "field".to_string(),
        Some(c) if c.is_ascii_digit() => format!("_{}", trimmed),
        Some(_) => trimmed.to_string(),
    }
}

fn pascal_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for part in name.split(|c: char| !c.is_ascii_alphanumeric()) {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.extend(chars);
        }
    }
    match out.chars().next() {
        None => "Unnamed".to_string(),
        Some(c) if c.is_ascii_digit() => format!("T{}", out),
        Some(_) => out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::document::MemoryFetcher;
    use crate::resolver::resolve;
    use crate::types::CompileOptions;
    use serde_json::json;

    fn compile_doc(doc: Value) -> DescriptorSet {
        let graph = resolve(&doc, "https://example.com/person.json", &MemoryFetcher::new()).unwrap();
        compile(&graph, &CompileOptions::default()).unwrap()
    }

    #[test]
    fn generates_struct_with_guarded_setters() {
        let set = compile_doc(json!({
            "type": "object",
            "description": "A person.",
            "required": ["age"],
            "readOnly": ["id"],
            "properties": {
                "id": { "type": "string", "default": "p-1" },
                "age": { "type": "integer", "minimum": 0 },
                "displayName": { "type": "string", "default": "unknown" },
                "score": { "type": "number", "default": 1 },
                "tags": { "type": "array", "items": { "type": "string" } }
            }
        }));
        let source = generate(set.root().unwrap()).unwrap();

        assert!(source.contains("/// A person.\n"));
        assert!(source.contains("pub struct Person {"));
        assert!(source.contains("    age: i64,\n"));
        assert!(source.contains(
            "    #[serde(rename = \"displayName\", default, skip_serializing_if = \"Option::is_none\")]\n    display_name: Option<String>,"
        ));
        assert!(source.contains("    #[serde(flatten)]\n    extra: serde_json::Map<String, serde_json::Value>,"));
        assert!(source.contains("pub const TYPE_URI: &'static str = \"https://example.com/person.json\";"));
        assert!(source.contains("pub const DISPLAY_NAME_DEFAULT: &'static str = \"unknown\";"));
        assert!(source.contains("pub const SCORE_DEFAULT: f64 = 1.0;"));
        assert!(source.contains("pub const TAGS_DEFAULT_JSON: &'static str = \"[]\";"));
        assert!(source.contains("pub fn set_age(&mut self, types: &schemabind::DescriptorSet, value: i64)"));
        assert!(source.contains("schemabind::check_serializable(types, Self::TYPE_URI, &next)?;"));
        // Read-only fields get a getter but no setter.
        assert!(source.contains("pub fn id(&self) -> &Option<String>"));
        assert!(!source.contains("pub fn set_id("));
    }

    #[test]
    fn generation_is_deterministic() {
        let set = compile_doc(json!({
            "type": "object",
            "properties": {
                "b": { "type": "boolean", "default": true },
                "a": { "enum": ["x", "y"] }
            }
        }));
        let descriptor = set.root().unwrap();
        assert_eq!(generate(descriptor).unwrap(), generate(descriptor).unwrap());
        assert_eq!(generate_module(&set).unwrap(), generate_module(&set).unwrap());
    }

    #[test]
    fn self_reference_is_boxed() {
        let set = compile_doc(json!({
            "$defs": {
                "Node": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "parent": { "$ref": "#/$defs/Node" },
                        "children": { "type": "array", "items": { "$ref": "#/$defs/Node" } }
                    }
                }
            },
            "$ref": "#/$defs/Node"
        }));
        let source = generate(set.by_name("Node").unwrap()).unwrap();
        assert!(source.contains("parent: Option<Box<Node>>,"));
        assert!(source.contains("children: Option<Vec<Node>>,"));
        assert!(!source.contains("serde(flatten)"));
    }

    #[test]
    fn unions_are_unmapped() {
        let set = compile_doc(json!({
            "type": "object",
            "properties": { "id": { "type": ["string", "integer"] } }
        }));
        let err = generate(set.root().unwrap()).unwrap_err();
        match err {
            GenerationError::Unmapped { field, declared, .. } => {
                assert_eq!(field, "id");
                assert_eq!(declared, "string | integer");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn colliding_type_names_are_rejected() {
        let set = compile_doc(json!({
            "type": "object",
            "properties": {
                "a": { "$ref": "#/$defs/Thing_2" },
                "b": { "$ref": "#/$defs/Thing2" }
            },
            "$defs": {
                "Thing_2": { "type": "object", "properties": { "x": { "type": "string" } } },
                "Thing2": { "type": "object", "properties": { "y": { "type": "string" } } }
            }
        }));
        let err = generate_module(&set).unwrap_err();
        match err {
            GenerationError::NameCollision { ident, first, second } => {
                assert_eq!(ident, "Thing2");
                let mut names = vec![first, second];
                names.sort();
                assert_eq!(names, vec!["Thing2", "Thing_2"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn null_type_is_unmapped() {
        let set = compile_doc(json!({
            "type": "object",
            "properties": { "nothing": { "type": "null" } }
        }));
        assert!(generate(set.root().unwrap()).is_err());
    }

    #[test]
    fn composite_becomes_newtype() {
        let set = compile_doc(json!({
            "oneOf": [
                { "type": "object", "required": ["email"] },
                { "type": "string" }
            ]
        }));
        let source = generate(set.root().unwrap()).unwrap();
        assert!(source.contains("#[serde(transparent)]\npub struct Person(serde_json::Value);"));
        assert!(source.contains("types.check(Self::TYPE_URI, &self.0)"));
    }

    #[test]
    fn keyword_field_names() {
        let set = compile_doc(json!({
            "type": "object",
            "required": ["type"],
            "properties": {
                "type": { "type": "string" },
                "self": { "type": "string" }
            }
        }));
        let source = generate(set.root().unwrap()).unwrap();
        assert!(source.contains("    r#type: String,\n"));
        assert!(source.contains("pub fn set_type(&mut self"));
        assert!(source.contains("#[serde(rename = \"self\", default, skip_serializing_if = \"Option::is_none\")]\n    self_: Option<String>,"));
    }

    #[test]
    fn custom_runtime_crate() {
        let set = compile_doc(json!({ "type": "object", "properties": { "a": { "type": "string" } } }));
        let options = GenerateOptions::new().runtime_crate("crate::runtime");
        let source = generate_with(set.root().unwrap(), &options).unwrap();
        assert!(source.contains("crate::runtime::check_serializable"));
        assert!(!source.contains("schemabind::"));
    }

    #[test]
    fn case_conversion() {
        assert_eq!(snake_case("displayName"), "display_name");
        assert_eq!(snake_case("HTTPCode"), "httpcode");
        assert_eq!(snake_case("line-item"), "line_item");
        assert_eq!(snake_case("2fa"), "_2fa");
        assert_eq!(pascal_case("childrenItem"), "ChildrenItem");
        assert_eq!(pascal_case("Thing_2"), "Thing2");
        assert_eq!(pascal_case("billing address"), "BillingAddress");
    }
}
