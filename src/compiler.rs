//! Type Descriptor Compiler - resolved schema graph to immutable descriptors.
//!
//! `allOf`/`extends` are flattened at compile time: constituent fields come
//! first, the node's own properties last, and fields sharing a name are
//! merged most-restrictive-wins. `oneOf`/`anyOf` stay as alternatives on
//! the descriptor and are checked by the validator.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use crate::error::CompilationError;
use crate::resolver::{NodeId, NodeKind, SchemaGraph, SchemaNode};
use crate::types::{
    AdditionalFields, CompileOptions, CompositionRule, Constraints, DeclaredType, DescriptorKind,
    DescriptorSet, FieldDescriptor, Format, Pattern, ScalarKind, TypeDescriptor, TypeRef,
    ValueSchema,
};
use crate::validator;

/// Compile a resolved graph into a descriptor set.
///
/// Every object-like node (declared object, or composition that yields an
/// object or alternatives) gets one descriptor keyed by its canonical URI.
///
/// # Errors
///
/// Fails with `CompilationError` carrying the offending node URI on unknown
/// `type` names, cyclic `allOf`/`extends`, unsatisfiable merged
/// constraints, incompatible field definitions, and invalid defaults.
pub fn compile(
    graph: &SchemaGraph,
    options: &CompileOptions,
) -> Result<DescriptorSet, CompilationError> {
    for (_, node) in graph.nodes() {
        check_type_names(node)?;
    }
    check_flatten_cycles(graph)?;

    let object_like = object_like_nodes(graph);
    let names = assign_names(graph, &object_like);
    let compiler = Compiler {
        graph,
        options,
        object_like,
        names,
    };

    let mut descriptors = BTreeMap::new();
    for (id, node) in graph.nodes() {
        if compiler.object_like[id.index()] {
            let descriptor = compiler.build_descriptor(id)?;
            tracing::debug!(uri = %node.id, name = %descriptor.name, "compiled descriptor");
            descriptors.insert(node.id.clone(), Arc::new(descriptor));
        }
    }

    let root_node = graph.node(graph.root());
    let root = compiler.object_like[graph.root().index()].then(|| root_node.id.clone());

    let aliases: BTreeMap<String, String> = graph
        .aliases()
        .filter(|(uri, canonical)| uri != canonical && descriptors.contains_key(*canonical))
        .map(|(uri, canonical)| (uri.to_string(), canonical.to_string()))
        .collect();

    let set = DescriptorSet::new(root, descriptors, aliases);
    check_alternative_cycles(&set)?;
    check_reloadable(&set)?;
    if options.check_defaults {
        check_defaults(&set)?;
    }
    tracing::debug!(count = set.len(), "compiled schema graph");
    Ok(set)
}

struct Compiler<'g> {
    graph: &'g SchemaGraph,
    options: &'g CompileOptions,
    object_like: Vec<bool>,
    names: HashMap<NodeId, String>,
}

/// Field as accumulated during flattening, before required/read-only lists
/// from every constituent are known.
struct FieldDraft {
    name: String,
    schema: ValueSchema,
    default: Option<Value>,
    read_only: bool,
    description: Option<String>,
}

#[derive(Default)]
struct Shape {
    fields: Vec<FieldDraft>,
    required: BTreeSet<String>,
    read_only: BTreeSet<String>,
    not_serialized: BTreeSet<String>,
    additional: Option<AdditionalFields>,
    alternatives: Option<(CompositionRule, Vec<ValueSchema>)>,
    asserts_object: bool,
}

impl Shape {
    /// Merge `other` into `self`; later definitions win for defaults.
    fn absorb(&mut self, other: Shape, uri: &str) -> Result<(), CompilationError> {
        for field in other.fields {
            match self.fields.iter_mut().find(|f| f.name == field.name) {
                Some(existing) => {
                    existing.schema = merge_schemas(&existing.schema, &field.schema, uri, &field.name)?;
                    if field.default.is_some() {
                        existing.default = field.default;
                    }
                    existing.read_only |= field.read_only;
                    if field.description.is_some() {
                        existing.description = field.description;
                    }
                }
                None => self.fields.push(field),
            }
        }
        self.required.extend(other.required);
        self.read_only.extend(other.read_only);
        self.not_serialized.extend(other.not_serialized);

        self.additional = match (self.additional.take(), other.additional) {
            (Some(a), Some(b)) => Some(merge_additional(a, b, uri)?),
            (None, x) | (x, None) => x,
        };

        if let Some(alternatives) = other.alternatives {
            if self.alternatives.is_some() {
                return Err(CompilationError::UnsupportedComposition {
                    uri: uri.to_string(),
                    message: "more than one oneOf/anyOf group after flattening".to_string(),
                });
            }
            self.alternatives = Some(alternatives);
        }
        self.asserts_object |= other.asserts_object;
        Ok(())
    }
}

impl Compiler<'_> {
    fn build_descriptor(&self, id: NodeId) -> Result<TypeDescriptor, CompilationError> {
        let node = self.graph.node(id);
        let shape = self.flatten(id)?;
        let flattened = node.flattened();

        let (composition, constituents) = match shape.alternatives {
            Some((rule, alternatives)) => (rule, alternatives),
            None if !flattened.is_empty() => {
                let parts = flattened
                    .iter()
                    .map(|part| self.value_schema(*part, "", &mut Vec::new()))
                    .collect::<Result<Vec<_>, _>>()?;
                (CompositionRule::AllOf, parts)
            }
            None => (CompositionRule::None, Vec::new()),
        };

        let kind = if shape.asserts_object || composition == CompositionRule::AllOf {
            DescriptorKind::Object
        } else {
            DescriptorKind::Composite
        };

        // A bare alternative list would reject every key under strict mode.
        let additional = shape.additional.unwrap_or(match kind {
            DescriptorKind::Object if self.options.strict => AdditionalFields::Forbid,
            _ => AdditionalFields::Allow,
        });

        let fields = shape
            .fields
            .into_iter()
            .map(|draft| {
                let default = match draft.default {
                    Some(default) => Some(default),
                    None if self.options.implicit_defaults => implicit_default(&draft.schema),
                    None => None,
                };
                FieldDescriptor {
                    required: shape.required.contains(&draft.name),
                    read_only: draft.read_only || shape.read_only.contains(&draft.name),
                    serialized: !shape.not_serialized.contains(&draft.name),
                    name: draft.name,
                    schema: draft.schema,
                    default,
                    description: draft.description,
                }
            })
            .collect();

        Ok(TypeDescriptor {
            uri: node.id.clone(),
            name: self.name_of(id),
            kind,
            description: string_keyword(node, "description"),
            fields,
            required: shape.required,
            additional,
            composition,
            constituents,
        })
    }

    fn name_of(&self, id: NodeId) -> String {
        self.names.get(&id).cloned().unwrap_or_default()
    }

    /// Flatten `allOf`/`extends` constituents followed by the node itself.
    ///
    /// Cycles were rejected up front, so this always terminates.
    fn flatten(&self, id: NodeId) -> Result<Shape, CompilationError> {
        let node = self.graph.node(id);
        let mut shape = Shape::default();
        for part in node.flattened() {
            let part_node = self.graph.node(part);
            if matches!(part_node.kind, NodeKind::Scalar | NodeKind::Array) {
                return Err(CompilationError::UnsupportedComposition {
                    uri: node.id.clone(),
                    message: format!("object composed with non-object schema {}", part_node.id),
                });
            }
            let sub = self.flatten(part)?;
            shape.absorb(sub, &node.id)?;
        }
        let own = self.own_shape(id)?;
        shape.absorb(own, &node.id)?;
        Ok(shape)
    }

    fn own_shape(&self, id: NodeId) -> Result<Shape, CompilationError> {
        let node = self.graph.node(id);
        let mut shape = Shape {
            asserts_object: node.kind == NodeKind::Object,
            required: string_list(node, "required")?.into_iter().collect(),
            read_only: string_list(node, "readOnly")?.into_iter().collect(),
            not_serialized: string_list(node, "notSerialized")?.into_iter().collect(),
            ..Shape::default()
        };

        for (name, target) in node.properties() {
            let target_node = self.graph.node(target);
            shape.fields.push(FieldDraft {
                name: name.to_string(),
                schema: self.value_schema(target, name, &mut Vec::new())?,
                default: target_node.keyword("default").cloned(),
                read_only: target_node.keyword("readOnly") == Some(&Value::Bool(true)),
                description: string_keyword(target_node, "description"),
            });
        }

        shape.additional = match node.additional_properties() {
            Some(target) => Some(AdditionalFields::Typed(Box::new(self.value_schema(
                target,
                "additionalProperties",
                &mut Vec::new(),
            )?))),
            None => match node.keyword("additionalProperties") {
                None => None,
                Some(Value::Bool(true)) => Some(AdditionalFields::Allow),
                Some(Value::Bool(false)) => Some(AdditionalFields::Forbid),
                Some(other) => {
                    return Err(invalid_keyword(
                        node,
                        "additionalProperties",
                        format!("expected a boolean or schema, got {}", other),
                    ))
                }
            },
        };

        let one_of = node.one_of();
        let any_of = node.any_of();
        let (rule, branches) = match (one_of.is_empty(), any_of.is_empty()) {
            (false, false) => {
                return Err(CompilationError::UnsupportedComposition {
                    uri: node.id.clone(),
                    message: "oneOf and anyOf on the same schema".to_string(),
                })
            }
            (false, true) => (CompositionRule::OneOf, one_of),
            (true, false) => (CompositionRule::AnyOf, any_of),
            (true, true) => return Ok(shape),
        };

        // `{type: string, oneOf: [A, B]}` is `oneOf: [string & A, string & B]`.
        let base = match node.kind {
            NodeKind::Scalar | NodeKind::Array => {
                Some(self.plain_value_schema(id, "", &mut Vec::new())?)
            }
            _ => None,
        };
        let mut alternatives = Vec::with_capacity(branches.len());
        for branch in branches {
            let schema = self.value_schema(branch, "", &mut Vec::new())?;
            alternatives.push(match &base {
                Some(base) => merge_schemas(base, &schema, &node.id, "")?,
                None => schema,
            });
        }
        shape.alternatives = Some((rule, alternatives));
        Ok(shape)
    }

    /// Schema of a value held by a field, array item or alternative.
    ///
    /// Object-like nodes are referenced, never inlined, so fields pointing
    /// at the same node share one descriptor.
    fn value_schema(
        &self,
        id: NodeId,
        field: &str,
        stack: &mut Vec<NodeId>,
    ) -> Result<ValueSchema, CompilationError> {
        let node = self.graph.node(id);
        if self.object_like[id.index()] {
            let declared = DeclaredType::Object(TypeRef {
                uri: node.id.clone(),
                name: self.name_of(id),
            });
            return Ok(ValueSchema::of(nullable(node, declared)));
        }
        self.plain_value_schema(id, field, stack)
    }

    /// Value schema of a node ignoring its `oneOf`/`anyOf`.
    fn plain_value_schema(
        &self,
        id: NodeId,
        field: &str,
        stack: &mut Vec<NodeId>,
    ) -> Result<ValueSchema, CompilationError> {
        let node = self.graph.node(id);
        if stack.contains(&id) {
            return Err(invalid_keyword(
                node,
                "items",
                "array schema contains itself with no object in between".to_string(),
            ));
        }
        stack.push(id);

        let declared = match node.kind {
            NodeKind::Array => {
                let items = match node.items() {
                    Some(items) => self.value_schema(items, field, stack)?,
                    None => ValueSchema::any(),
                };
                nullable(node, DeclaredType::Array(Box::new(items)))
            }
            NodeKind::Scalar => scalar_type(node),
            NodeKind::Object | NodeKind::Composite | NodeKind::Any => DeclaredType::Any,
        };
        let mut schema = ValueSchema {
            declared,
            constraints: parse_constraints(node)?,
        };
        check_satisfiable(&schema.constraints, &node.id, field)?;

        for part in node.flattened() {
            let sub = self.value_schema(part, field, stack)?;
            schema = merge_schemas(&sub, &schema, &node.id, field)?;
        }

        stack.pop();
        Ok(schema)
    }
}

// --- Graph analysis ---

fn check_type_names(node: &SchemaNode) -> Result<(), CompilationError> {
    let names: Vec<&Value> = match node.keyword("type") {
        None => return Ok(()),
        Some(Value::Array(names)) => names.iter().collect(),
        Some(name) => vec![name],
    };
    for name in names {
        let known = name.as_str().is_some_and(|n| {
            n == "object" || n == "array" || ScalarKind::parse(n).is_some()
        });
        if !known {
            return Err(CompilationError::UnknownType {
                uri: node.id.clone(),
                type_name: name
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| name.to_string()),
            });
        }
    }
    Ok(())
}

/// Reject `allOf`/`extends` chains that lead back to themselves.
fn check_flatten_cycles(graph: &SchemaGraph) -> Result<(), CompilationError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Active,
        Done,
    }

    fn visit(graph: &SchemaGraph, id: NodeId, marks: &mut [Mark]) -> Result<(), CompilationError> {
        match marks[id.index()] {
            Mark::Active => {
                return Err(CompilationError::CyclicComposition {
                    uri: graph.node(id).id.clone(),
                })
            }
            Mark::Done => return Ok(()),
            Mark::New => {}
        }
        marks[id.index()] = Mark::Active;
        for part in graph.node(id).flattened() {
            visit(graph, part, marks)?;
        }
        marks[id.index()] = Mark::Done;
        Ok(())
    }

    let mut marks = vec![Mark::New; graph.len()];
    for (id, _) in graph.nodes() {
        visit(graph, id, &mut marks)?;
    }
    Ok(())
}

fn object_like_nodes(graph: &SchemaGraph) -> Vec<bool> {
    fn visit(graph: &SchemaGraph, id: NodeId, memo: &mut [Option<bool>]) -> bool {
        if let Some(known) = memo[id.index()] {
            return known;
        }
        let node = graph.node(id);
        let result = node.kind == NodeKind::Object
            || !node.one_of().is_empty()
            || !node.any_of().is_empty()
            || (matches!(node.kind, NodeKind::Composite | NodeKind::Any)
                && node.flattened().into_iter().any(|p| visit(graph, p, memo)));
        memo[id.index()] = Some(result);
        result
    }

    let mut memo = vec![None; graph.len()];
    graph
        .nodes()
        .map(|(id, _)| visit(graph, id, &mut memo))
        .collect()
}

/// Unique descriptor names: `title`, else derived from the node's location.
fn assign_names(graph: &SchemaGraph, object_like: &[bool]) -> HashMap<NodeId, String> {
    let mut used = HashSet::new();
    let mut names = HashMap::new();
    for (id, node) in graph.nodes() {
        if !object_like[id.index()] {
            continue;
        }
        let base = string_keyword(node, "title").unwrap_or_else(|| derive_name(&node.id));
        let mut name = base.clone();
        let mut n = 2;
        while !used.insert(name.clone()) {
            name = format!("{}_{}", base, n);
            n += 1;
        }
        names.insert(id, name);
    }
    names
}

/// Name from a location: the nearest property/definition name plus a
/// suffix for each items/branch step below it, else the document stem.
fn derive_name(uri: &str) -> String {
    let (document, pointer) = uri.split_once('#').unwrap_or((uri, ""));
    let segments: Vec<String> = pointer
        .split('/')
        .skip(1)
        .map(|s| s.replace("~1", "/").replace("~0", "~"))
        .collect();

    let mut suffix = Vec::new();
    let mut i = segments.len();
    while i > 0 {
        let segment = segments[i - 1].as_str();
        let parent = if i >= 2 { segments[i - 2].as_str() } else { "" };
        match parent {
            "properties" | "$defs" | "definitions" => {
                suffix.reverse();
                return format!("{}{}", segment, suffix.concat());
            }
            "allOf" | "oneOf" | "anyOf" | "extends" => {
                let n = segment.parse::<usize>().map(|n| n + 1).unwrap_or(1);
                suffix.push(format!("Variant{}", n));
                i -= 2;
                continue;
            }
            _ => {}
        }
        match segment {
            "items" => suffix.push("Item".to_string()),
            "additionalProperties" => suffix.push("Value".to_string()),
            _ => {}
        }
        i -= 1;
    }
    suffix.reverse();
    let stem = document
        .rsplit('/')
        .next()
        .and_then(|file| file.split('.').next())
        .filter(|s| !s.is_empty())
        .unwrap_or("Root");
    format!("{}{}", stem, suffix.concat())
}

/// `oneOf`/`anyOf` alternatives are validated against the same value, so a
/// descriptor reachable from itself through them would never terminate.
fn check_alternative_cycles(set: &DescriptorSet) -> Result<(), CompilationError> {
    fn object_ref(declared: &DeclaredType) -> Option<&str> {
        match declared {
            DeclaredType::Object(r) => Some(&r.uri),
            DeclaredType::Nullable(inner) => object_ref(inner),
            _ => None,
        }
    }

    fn targets(descriptor: &TypeDescriptor) -> Vec<&str> {
        match descriptor.composition {
            CompositionRule::OneOf | CompositionRule::AnyOf => descriptor
                .constituents
                .iter()
                .filter_map(|c| object_ref(&c.declared))
                .collect(),
            _ => Vec::new(),
        }
    }

    for start in set.iter() {
        let mut pending = targets(start);
        let mut seen = HashSet::new();
        while let Some(uri) = pending.pop() {
            if uri == start.uri {
                return Err(CompilationError::CyclicComposition {
                    uri: start.uri.clone(),
                });
            }
            if seen.insert(uri) {
                if let Some(next) = set.get(uri) {
                    pending.extend(targets(next));
                }
            }
        }
    }
    Ok(())
}

fn check_defaults(set: &DescriptorSet) -> Result<(), CompilationError> {
    for descriptor in set.iter() {
        for field in &descriptor.fields {
            let Some(default) = &field.default else {
                continue;
            };
            let violations = validator::validate_value(set, &field.schema, default);
            if !violations.is_empty() {
                return Err(CompilationError::InvalidDefault {
                    uri: descriptor.uri.clone(),
                    field: field.name.clone(),
                    violations,
                });
            }
        }
    }
    Ok(())
}

/// A required field left out of saved documents must come back from its
/// default, or a saved instance could never be loaded again.
fn check_reloadable(set: &DescriptorSet) -> Result<(), CompilationError> {
    for descriptor in set.iter() {
        let lost = descriptor
            .fields
            .iter()
            .find(|f| !f.serialized && f.required && f.default.is_none());
        if let Some(field) = lost {
            return Err(CompilationError::InvalidKeyword {
                uri: descriptor.uri.clone(),
                keyword: "notSerialized".to_string(),
                message: format!(
                    "required field '{}' has no default and would be missing after a reload",
                    field.name
                ),
            });
        }
    }
    Ok(())
}

// --- Keyword parsing ---

fn invalid_keyword(node: &SchemaNode, keyword: &str, message: String) -> CompilationError {
    CompilationError::InvalidKeyword {
        uri: node.id.clone(),
        keyword: keyword.to_string(),
        message,
    }
}

fn string_keyword(node: &SchemaNode, keyword: &str) -> Option<String> {
    node.keyword(keyword)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// A keyword holding a list of names; booleans (per-property `readOnly`)
/// are not lists and yield nothing.
fn string_list(node: &SchemaNode, keyword: &str) -> Result<Vec<String>, CompilationError> {
    match node.keyword(keyword) {
        None | Some(Value::Bool(_)) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    invalid_keyword(node, keyword, format!("expected field names, got {}", item))
                })
            })
            .collect(),
        Some(other) => Err(invalid_keyword(
            node,
            keyword,
            format!("expected an array of field names, got {}", other),
        )),
    }
}

fn number(node: &SchemaNode, keyword: &str) -> Result<Option<f64>, CompilationError> {
    match node.keyword(keyword) {
        None => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or_else(|| invalid_keyword(node, keyword, format!("expected a number, got {}", value))),
    }
}

fn count(node: &SchemaNode, keyword: &str) -> Result<Option<u64>, CompilationError> {
    match node.keyword(keyword) {
        None => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            invalid_keyword(
                node,
                keyword,
                format!("expected a non-negative integer, got {}", value),
            )
        }),
    }
}

fn parse_constraints(node: &SchemaNode) -> Result<Constraints, CompilationError> {
    let mut constraints = Constraints {
        minimum: number(node, "minimum")?,
        maximum: number(node, "maximum")?,
        min_length: count(node, "minLength")?,
        max_length: count(node, "maxLength")?,
        min_items: count(node, "minItems")?,
        max_items: count(node, "maxItems")?,
        constant: node.keyword("const").cloned(),
        ..Constraints::default()
    };

    // Draft-4 boolean exclusivity turns the inclusive bound exclusive.
    match node.keyword("exclusiveMinimum") {
        None | Some(Value::Bool(false)) => {}
        Some(Value::Bool(true)) => constraints.exclusive_minimum = constraints.minimum.take(),
        Some(_) => constraints.exclusive_minimum = number(node, "exclusiveMinimum")?,
    }
    match node.keyword("exclusiveMaximum") {
        None | Some(Value::Bool(false)) => {}
        Some(Value::Bool(true)) => constraints.exclusive_maximum = constraints.maximum.take(),
        Some(_) => constraints.exclusive_maximum = number(node, "exclusiveMaximum")?,
    }

    if let Some(divisor) = number(node, "multipleOf")? {
        if divisor <= 0.0 {
            return Err(invalid_keyword(
                node,
                "multipleOf",
                format!("must be positive, got {}", divisor),
            ));
        }
        constraints.multiple_of = Some(divisor);
    }

    match node.keyword("pattern") {
        None => {}
        Some(Value::String(source)) => {
            let pattern = Pattern::new(source)
                .map_err(|e| invalid_keyword(node, "pattern", e.to_string()))?;
            constraints.patterns.push(pattern);
        }
        Some(other) => {
            return Err(invalid_keyword(node, "pattern", format!("expected a string, got {}", other)))
        }
    }

    match node.keyword("format") {
        None => {}
        Some(Value::String(name)) => {
            constraints.format =
                Some(Format::new(name).map_err(|e| invalid_keyword(node, "format", e))?);
        }
        Some(other) => {
            return Err(invalid_keyword(node, "format", format!("expected a string, got {}", other)))
        }
    }

    match node.keyword("enum") {
        None => {}
        Some(Value::Array(members)) => constraints.enumeration = Some(members.clone()),
        Some(other) => {
            return Err(invalid_keyword(node, "enum", format!("expected an array, got {}", other)))
        }
    }

    match node.keyword("uniqueItems") {
        None => {}
        Some(Value::Bool(unique)) => constraints.unique_items = *unique,
        Some(other) => {
            return Err(invalid_keyword(
                node,
                "uniqueItems",
                format!("expected a boolean, got {}", other),
            ))
        }
    }

    Ok(constraints)
}

fn scalar_type(node: &SchemaNode) -> DeclaredType {
    let names: Vec<&str> = match node.keyword("type") {
        Some(Value::String(name)) => vec![name.as_str()],
        Some(Value::Array(names)) => names.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    };
    let mut kinds: Vec<ScalarKind> = Vec::new();
    for kind in names.into_iter().filter_map(ScalarKind::parse) {
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    let is_nullable = kinds.len() > 1 && kinds.contains(&ScalarKind::Null);
    if is_nullable {
        kinds.retain(|k| *k != ScalarKind::Null);
    }
    let base = match kinds.as_slice() {
        [] => DeclaredType::Any,
        [kind] => DeclaredType::Scalar(*kind),
        _ => DeclaredType::Union(kinds),
    };
    if is_nullable {
        DeclaredType::Nullable(Box::new(base))
    } else {
        base
    }
}

fn nullable(node: &SchemaNode, declared: DeclaredType) -> DeclaredType {
    if node.is_nullable() {
        DeclaredType::Nullable(Box::new(declared))
    } else {
        declared
    }
}

/// First `enum` member, or `[]` for arrays that may be empty.
fn implicit_default(schema: &ValueSchema) -> Option<Value> {
    if let Some(first) = schema.constraints.enumeration.as_ref().and_then(|e| e.first()) {
        return Some(first.clone());
    }
    match schema.declared {
        DeclaredType::Array(_) if schema.constraints.min_items.unwrap_or(0) == 0 => {
            Some(Value::Array(Vec::new()))
        }
        _ => None,
    }
}

// --- Merging ---

fn merge_schemas(
    a: &ValueSchema,
    b: &ValueSchema,
    uri: &str,
    field: &str,
) -> Result<ValueSchema, CompilationError> {
    let schema = ValueSchema {
        declared: merge_declared(&a.declared, &b.declared, uri, field)?,
        constraints: merge_constraints(&a.constraints, &b.constraints, uri, field)?,
    };
    check_satisfiable(&schema.constraints, uri, field)?;
    Ok(schema)
}

fn merge_declared(
    a: &DeclaredType,
    b: &DeclaredType,
    uri: &str,
    field: &str,
) -> Result<DeclaredType, CompilationError> {
    let conflict = || CompilationError::FieldConflict {
        uri: uri.to_string(),
        field: field.to_string(),
        message: format!("{} vs {}", a.describe(), b.describe()),
    };

    Ok(match (a, b) {
        (DeclaredType::Any, other) | (other, DeclaredType::Any) => other.clone(),
        _ if a == b => a.clone(),
        (DeclaredType::Nullable(x), DeclaredType::Nullable(y)) => {
            DeclaredType::Nullable(Box::new(merge_declared(x, y, uri, field)?))
        }
        (DeclaredType::Nullable(x), other) | (other, DeclaredType::Nullable(x)) => {
            merge_declared(x, other, uri, field)?
        }
        (DeclaredType::Array(x), DeclaredType::Array(y)) => {
            DeclaredType::Array(Box::new(merge_schemas(x, y, uri, field)?))
        }
        _ => match (scalar_kinds(a), scalar_kinds(b)) {
            (Some(x), Some(y)) => match intersect_kinds(&x, &y).as_slice() {
                [] => return Err(conflict()),
                [kind] => DeclaredType::Scalar(*kind),
                kinds => DeclaredType::Union(kinds.to_vec()),
            },
            _ => return Err(conflict()),
        },
    })
}

fn scalar_kinds(declared: &DeclaredType) -> Option<Vec<ScalarKind>> {
    match declared {
        DeclaredType::Scalar(kind) => Some(vec![*kind]),
        DeclaredType::Union(kinds) => Some(kinds.clone()),
        _ => None,
    }
}

/// Integer narrows number.
fn intersect_kinds(a: &[ScalarKind], b: &[ScalarKind]) -> Vec<ScalarKind> {
    let narrows = |k: &ScalarKind, other: &[ScalarKind]| {
        other.contains(k) || (*k == ScalarKind::Integer && other.contains(&ScalarKind::Number))
    };
    let mut out = Vec::new();
    for kind in a.iter().filter(|k| narrows(k, b)).chain(b.iter().filter(|k| narrows(k, a))) {
        if !out.contains(kind) {
            out.push(*kind);
        }
    }
    out
}

fn merge_additional(
    a: AdditionalFields,
    b: AdditionalFields,
    uri: &str,
) -> Result<AdditionalFields, CompilationError> {
    Ok(match (a, b) {
        (AdditionalFields::Forbid, _) | (_, AdditionalFields::Forbid) => AdditionalFields::Forbid,
        (AdditionalFields::Typed(x), AdditionalFields::Typed(y)) => AdditionalFields::Typed(
            Box::new(merge_schemas(&x, &y, uri, "additionalProperties")?),
        ),
        (AdditionalFields::Typed(x), AdditionalFields::Allow)
        | (AdditionalFields::Allow, AdditionalFields::Typed(x)) => AdditionalFields::Typed(x),
        (AdditionalFields::Allow, AdditionalFields::Allow) => AdditionalFields::Allow,
    })
}

fn max_opt<T: PartialOrd + Copy>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(x), Some(y)) => Some(if y > x { y } else { x }),
        (x, None) => x,
        (None, y) => y,
    }
}

fn min_opt<T: PartialOrd + Copy>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(x), Some(y)) => Some(if y < x { y } else { x }),
        (x, None) => x,
        (None, y) => y,
    }
}

fn is_multiple(value: f64, divisor: f64) -> bool {
    let quotient = value / divisor;
    (quotient - quotient.round()).abs() < 1e-9
}

fn merge_constraints(
    a: &Constraints,
    b: &Constraints,
    uri: &str,
    field: &str,
) -> Result<Constraints, CompilationError> {
    let ambiguous = |message: String| CompilationError::AmbiguousMerge {
        uri: uri.to_string(),
        field: field.to_string(),
        message,
    };
    let unsatisfiable = |message: String| CompilationError::Unsatisfiable {
        uri: uri.to_string(),
        field: field.to_string(),
        message,
    };

    let enum_against_pattern = (a.enumeration.is_some()
        && b.enumeration.is_none()
        && !b.patterns.is_empty())
        || (b.enumeration.is_some() && a.enumeration.is_none() && !a.patterns.is_empty());
    if enum_against_pattern {
        return Err(ambiguous(
            "enum on one side and pattern on the other".to_string(),
        ));
    }

    let multiple_of = match (a.multiple_of, b.multiple_of) {
        (Some(x), Some(y)) if is_multiple(x, y) => Some(x),
        (Some(x), Some(y)) if is_multiple(y, x) => Some(y),
        (Some(x), Some(y)) => {
            return Err(ambiguous(format!("multipleOf {} and {} do not nest", x, y)))
        }
        (x, None) => x,
        (None, y) => y,
    };

    let format = match (&a.format, &b.format) {
        (Some(x), Some(y)) if x != y => {
            return Err(CompilationError::FieldConflict {
                uri: uri.to_string(),
                field: field.to_string(),
                message: format!("format {} vs {}", x.name(), y.name()),
            })
        }
        (Some(x), _) | (None, Some(x)) => Some(x.clone()),
        (None, None) => None,
    };

    let enumeration = match (&a.enumeration, &b.enumeration) {
        (Some(x), Some(y)) => Some(x.iter().filter(|v| y.contains(v)).cloned().collect()),
        (Some(x), None) | (None, Some(x)) => Some(x.clone()),
        (None, None) => None,
    };

    let constant = match (&a.constant, &b.constant) {
        (Some(x), Some(y)) if x != y => {
            return Err(unsatisfiable(format!("const {} vs {}", x, y)))
        }
        (Some(x), _) | (None, Some(x)) => Some(x.clone()),
        (None, None) => None,
    };

    let mut patterns = a.patterns.clone();
    for pattern in &b.patterns {
        if !patterns.contains(pattern) {
            patterns.push(pattern.clone());
        }
    }

    Ok(Constraints {
        minimum: max_opt(a.minimum, b.minimum),
        maximum: min_opt(a.maximum, b.maximum),
        exclusive_minimum: max_opt(a.exclusive_minimum, b.exclusive_minimum),
        exclusive_maximum: min_opt(a.exclusive_maximum, b.exclusive_maximum),
        multiple_of,
        min_length: max_opt(a.min_length, b.min_length),
        max_length: min_opt(a.max_length, b.max_length),
        patterns,
        format,
        enumeration,
        constant,
        min_items: max_opt(a.min_items, b.min_items),
        max_items: min_opt(a.max_items, b.max_items),
        unique_items: a.unique_items || b.unique_items,
    })
}

fn check_satisfiable(c: &Constraints, uri: &str, field: &str) -> Result<(), CompilationError> {
    let fail = |message: String| {
        Err(CompilationError::Unsatisfiable {
            uri: uri.to_string(),
            field: field.to_string(),
            message,
        })
    };

    // (bound, exclusive)
    let lower = match (c.minimum, c.exclusive_minimum) {
        (Some(m), Some(e)) if e >= m => Some((e, true)),
        (Some(m), _) => Some((m, false)),
        (None, Some(e)) => Some((e, true)),
        (None, None) => None,
    };
    let upper = match (c.maximum, c.exclusive_maximum) {
        (Some(m), Some(e)) if e <= m => Some((e, true)),
        (Some(m), _) => Some((m, false)),
        (None, Some(e)) => Some((e, true)),
        (None, None) => None,
    };
    if let (Some((lo, lo_ex)), Some((hi, hi_ex))) = (lower, upper) {
        if lo > hi || (lo == hi && (lo_ex || hi_ex)) {
            return fail(format!("lower bound {} exceeds upper bound {}", lo, hi));
        }
    }
    if let (Some(lo), Some(hi)) = (c.min_length, c.max_length) {
        if lo > hi {
            return fail(format!("minLength {} > maxLength {}", lo, hi));
        }
    }
    if let (Some(lo), Some(hi)) = (c.min_items, c.max_items) {
        if lo > hi {
            return fail(format!("minItems {} > maxItems {}", lo, hi));
        }
    }
    if let Some(members) = &c.enumeration {
        if members.is_empty() {
            return fail("enum has no members left".to_string());
        }
        if let Some(constant) = &c.constant {
            if !members.contains(constant) {
                return fail(format!("const {} is not an enum member", constant));
            }
        }
    }
    Ok(())
}
