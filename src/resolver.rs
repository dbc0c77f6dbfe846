//! Reference resolution - turns schema documents into a `$ref`-free graph.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]; every URI that
//! resolved to a node (its location, `$id` aliases, `$anchor`s, `$ref`
//! spellings) is indexed, so URI equality is node equality within one graph.
//!
//! Self-referential schemas are handled in two phases: a node's slot is
//! reserved and indexed before its children are resolved, so a `$ref` back
//! into a node still under construction resolves to the reserved slot,
//! which is back-filled once construction completes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{Map, Value};
use url::Url;

use crate::document::DocumentFetcher;
use crate::error::ResolutionError;
use crate::types::json_type_name;

/// Keywords that only annotate a schema; a `$ref` alongside only these is a
/// plain alias of its target.
const ANNOTATION_KEYWORDS: &[&str] = &[
    "$comment",
    "$schema",
    "$id",
    "$anchor",
    "$defs",
    "definitions",
    "title",
    "description",
    "examples",
];

/// Keywords turned into graph edges (or skipped) rather than kept raw.
const STRUCTURAL_KEYWORDS: &[&str] = &[
    "$ref",
    "properties",
    "items",
    "allOf",
    "oneOf",
    "anyOf",
    "extends",
    "$defs",
    "definitions",
];

/// Index of a node in a [`SchemaGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Broad shape of a schema node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Object,
    Array,
    Scalar,
    Composite,
    Any,
}

/// Role of a child edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EdgeRole {
    Property(String),
    Items,
    AdditionalProperties,
    AllOf(usize),
    OneOf(usize),
    AnyOf(usize),
    Extends(usize),
}

/// Ordered child reference of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    pub role: EdgeRole,
    pub target: NodeId,
}

/// One resolved schema. Immutable once resolution completes.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaNode {
    pub id: String,
    pub kind: NodeKind,
    /// Raw constraint keywords (structural keywords removed).
    pub keywords: Map<String, Value>,
    pub children: Vec<Edge>,
}

impl SchemaNode {
    pub fn keyword(&self, name: &str) -> Option<&Value> {
        self.keywords.get(name)
    }

    /// Declared properties in declaration order.
    pub fn properties(&self) -> impl Iterator<Item = (&str, NodeId)> {
        self.children.iter().filter_map(|e| match &e.role {
            EdgeRole::Property(name) => Some((name.as_str(), e.target)),
            _ => None,
        })
    }

    pub fn items(&self) -> Option<NodeId> {
        self.edge(|r| matches!(r, EdgeRole::Items))
    }

    pub fn additional_properties(&self) -> Option<NodeId> {
        self.edge(|r| matches!(r, EdgeRole::AdditionalProperties))
    }

    /// `extends` targets followed by `allOf` branches: everything flattened.
    pub fn flattened(&self) -> Vec<NodeId> {
        let extends = self.edges(|r| matches!(r, EdgeRole::Extends(_)));
        let all_of = self.edges(|r| matches!(r, EdgeRole::AllOf(_)));
        extends.into_iter().chain(all_of).collect()
    }

    pub fn one_of(&self) -> Vec<NodeId> {
        self.edges(|r| matches!(r, EdgeRole::OneOf(_)))
    }

    pub fn any_of(&self) -> Vec<NodeId> {
        self.edges(|r| matches!(r, EdgeRole::AnyOf(_)))
    }

    /// Whether the node declares `null` among its types (`["object", "null"]`).
    pub fn is_nullable(&self) -> bool {
        match self.keywords.get("type") {
            Some(Value::Array(types)) => {
                types.iter().any(|t| t.as_str() == Some("null")) && types.len() > 1
            }
            _ => false,
        }
    }

    fn edge(&self, pred: impl Fn(&EdgeRole) -> bool) -> Option<NodeId> {
        self.children.iter().find(|e| pred(&e.role)).map(|e| e.target)
    }

    fn edges(&self, pred: impl Fn(&EdgeRole) -> bool) -> Vec<NodeId> {
        self.children
            .iter()
            .filter(|e| pred(&e.role))
            .map(|e| e.target)
            .collect()
    }
}

/// Resolved, reference-free schema graph.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaGraph {
    nodes: Vec<SchemaNode>,
    index: HashMap<String, NodeId>,
    root: NodeId,
    roots: Vec<NodeId>,
}

impl SchemaGraph {
    pub fn node(&self, id: NodeId) -> &SchemaNode {
        &self.nodes[id.0]
    }

    /// Look up a node by any URI that resolved to it.
    pub fn lookup(&self, uri: &str) -> Option<NodeId> {
        self.index.get(uri).copied()
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Root node followed by every `$defs`/`definitions` entry of the root
    /// document.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &SchemaNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every indexed URI with the canonical id of the node it resolved to.
    pub fn aliases(&self) -> impl Iterator<Item = (&str, &str)> {
        self.index
            .iter()
            .map(|(uri, id)| (uri.as_str(), self.nodes[id.0].id.as_str()))
    }
}

/// Resolve a root document into a schema graph.
///
/// `base_uri` is the document's retrieval URI; a top-level `$id` overrides
/// it for relative references. External documents are requested from
/// `fetcher`.
///
/// # Errors
///
/// Returns `ResolutionError` for invalid URIs, unresolvable `$ref`s,
/// `$ref` chains that never reach a schema, and fetch failures.
pub fn resolve(
    root_document: &Value,
    base_uri: &str,
    fetcher: &dyn DocumentFetcher,
) -> Result<SchemaGraph, ResolutionError> {
    let base = Url::parse(base_uri).map_err(|e| ResolutionError::InvalidUri {
        uri: base_uri.to_string(),
        message: e.to_string(),
    })?;

    let mut resolver = Resolver::new(fetcher);
    let doc_key = resolver.add_document(&base, Arc::new(root_document.clone()))?;

    let root = resolver.resolve_location(&doc_key, "")?;
    let mut roots = vec![root];
    for defs_key in ["$defs", "definitions"] {
        if let Some(defs) = root_document.get(defs_key).and_then(Value::as_object) {
            for name in defs.keys() {
                let pointer = format!("/{}/{}", defs_key, escape_pointer(name));
                let id = resolver.resolve_location(&doc_key, &pointer)?;
                if !roots.contains(&id) {
                    roots.push(id);
                }
            }
        }
    }

    resolver.finish(root, roots)
}

/// Navigate a JSON Pointer fragment (e.g., "#/$defs/foo" or "/properties/bar").
///
/// Returns `None` when any segment is missing.
pub fn navigate_fragment<'a>(document: &'a Value, fragment: &str) -> Option<&'a Value> {
    let path = fragment.trim_start_matches('#');
    if path.is_empty() {
        return Some(document);
    }
    document.pointer(path)
}

fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Canonical id of a location: document URI plus `#pointer` unless root.
fn location_id(doc_key: &str, pointer: &str) -> String {
    if pointer.is_empty() {
        doc_key.to_string()
    } else {
        format!("{}#{}", doc_key, pointer)
    }
}

fn without_fragment(uri: &Url) -> Url {
    let mut u = uri.clone();
    u.set_fragment(None);
    u
}

struct Document {
    value: Arc<Value>,
    /// Base URI in effect at the document root (its `$id`, if any).
    base: Url,
}

/// A `$id` or `$anchor` target: a location in a loaded document.
#[derive(Clone)]
struct Location {
    doc_key: String,
    pointer: String,
}

// --- Internal implementation ---

struct Resolver<'f> {
    fetcher: &'f dyn DocumentFetcher,
    documents: HashMap<String, Document>,
    /// `$id` (without fragment) and `$id#anchor` spellings to locations.
    embedded: HashMap<String, Location>,
    slots: Vec<Option<SchemaNode>>,
    index: HashMap<String, NodeId>,
    visiting: HashSet<String>,
    aliasing: HashSet<String>,
}

impl<'f> Resolver<'f> {
    fn new(fetcher: &'f dyn DocumentFetcher) -> Self {
        Self {
            fetcher,
            documents: HashMap::new(),
            embedded: HashMap::new(),
            slots: Vec::new(),
            index: HashMap::new(),
            visiting: HashSet::new(),
            aliasing: HashSet::new(),
        }
    }

    fn add_document(&mut self, uri: &Url, value: Arc<Value>) -> Result<String, ResolutionError> {
        let retrieval = without_fragment(uri);
        let doc_key = retrieval.to_string();

        let base = match value.get("$id").and_then(Value::as_str) {
            Some(id) => without_fragment(&retrieval.join(id).map_err(|e| {
                ResolutionError::InvalidUri {
                    uri: id.to_string(),
                    message: e.to_string(),
                }
            })?),
            None => retrieval.clone(),
        };

        self.scan_embedded(&doc_key, &value, "", &base)?;
        if base != retrieval {
            self.embedded.insert(
                base.to_string(),
                Location {
                    doc_key: doc_key.clone(),
                    pointer: String::new(),
                },
            );
        }
        tracing::debug!(document = %doc_key, "loaded schema document");
        self.documents.insert(doc_key.clone(), Document { value, base });
        Ok(doc_key)
    }

    /// Record every `$id`/`$anchor` below `value` so later `$ref`s can find them.
    fn scan_embedded(
        &mut self,
        doc_key: &str,
        value: &Value,
        pointer: &str,
        base: &Url,
    ) -> Result<(), ResolutionError> {
        match value {
            Value::Object(map) => {
                let mut base = base.clone();
                if !pointer.is_empty() {
                    if let Some(id) = map.get("$id").and_then(Value::as_str) {
                        let joined = base.join(id).map_err(|e| ResolutionError::InvalidUri {
                            uri: id.to_string(),
                            message: e.to_string(),
                        })?;
                        base = without_fragment(&joined);
                        self.embedded.insert(
                            base.to_string(),
                            Location {
                                doc_key: doc_key.to_string(),
                                pointer: pointer.to_string(),
                            },
                        );
                    }
                }
                if let Some(anchor) = map.get("$anchor").and_then(Value::as_str) {
                    self.embedded.insert(
                        format!("{}#{}", base, anchor),
                        Location {
                            doc_key: doc_key.to_string(),
                            pointer: pointer.to_string(),
                        },
                    );
                }
                for (key, child) in map {
                    let child_pointer = format!("{}/{}", pointer, escape_pointer(key));
                    self.scan_embedded(doc_key, child, &child_pointer, &base)?;
                }
            }
            Value::Array(arr) => {
                for (i, item) in arr.iter().enumerate() {
                    let child_pointer = format!("{}/{}", pointer, i);
                    self.scan_embedded(doc_key, item, &child_pointer, base)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Base URI in effect at `pointer`: the nearest enclosing `$id`.
    fn base_at(&self, doc_key: &str, pointer: &str) -> Result<Url, ResolutionError> {
        let doc = self.document(doc_key)?;
        let mut base = doc.base.clone();
        let mut current: &Value = &doc.value;
        for segment in pointer.split('/').skip(1) {
            let key = segment.replace("~1", "/").replace("~0", "~");
            current = match current {
                Value::Object(map) => map.get(&key),
                Value::Array(arr) => key.parse::<usize>().ok().and_then(|i| arr.get(i)),
                _ => None,
            }
            .ok_or_else(|| ResolutionError::Unresolvable {
                uri: doc_key.to_string(),
                reference: format!("#{}", pointer),
            })?;
            if let Some(id) = current.get("$id").and_then(Value::as_str) {
                if let Ok(joined) = base.join(id) {
                    base = without_fragment(&joined);
                }
            }
        }
        Ok(base)
    }

    fn document(&self, doc_key: &str) -> Result<&Document, ResolutionError> {
        self.documents
            .get(doc_key)
            .ok_or_else(|| ResolutionError::Unresolvable {
                uri: doc_key.to_string(),
                reference: doc_key.to_string(),
            })
    }

    /// Map an absolute reference URI to a document location, fetching the
    /// document when it is not loaded yet.
    fn locate(&mut self, target: &Url, from: &str) -> Result<Location, ResolutionError> {
        let fragment = target.fragment().unwrap_or("");
        let bare = without_fragment(target);
        let bare_key = bare.to_string();

        if !fragment.is_empty() && !fragment.starts_with('/') {
            // Plain-name fragment: an `$anchor`.
            let spelled = format!("{}#{}", bare_key, fragment);
            return self
                .embedded
                .get(&spelled)
                .cloned()
                .ok_or_else(|| ResolutionError::Unresolvable {
                    uri: from.to_string(),
                    reference: target.to_string(),
                });
        }

        let (doc_key, base_pointer) = if let Some(loc) = self.embedded.get(&bare_key) {
            (loc.doc_key.clone(), loc.pointer.clone())
        } else if self.documents.contains_key(&bare_key) {
            (bare_key.clone(), String::new())
        } else {
            tracing::debug!(uri = %bare_key, "fetching external schema document");
            let fetched =
                self.fetcher
                    .fetch_document(&bare)
                    .map_err(|source| ResolutionError::Fetch {
                        uri: bare_key.clone(),
                        source,
                    })?;
            let doc_key = self.add_document(&bare, Arc::new(fetched))?;
            (doc_key, String::new())
        };

        Ok(Location {
            doc_key,
            pointer: format!("{}{}", base_pointer, fragment),
        })
    }

    fn resolve_ref(&mut self, reference: &str, base: &Url, from: &str) -> Result<NodeId, ResolutionError> {
        let target = base
            .join(reference)
            .map_err(|e| ResolutionError::InvalidUri {
                uri: reference.to_string(),
                message: e.to_string(),
            })?;
        let spelled = match target.fragment() {
            Some("") | None => without_fragment(&target).to_string(),
            Some(_) => target.to_string(),
        };
        if let Some(id) = self.index.get(&spelled) {
            return Ok(*id);
        }

        let loc = self.locate(&target, from)?;
        let id = self.resolve_location(&loc.doc_key, &loc.pointer)?;
        self.index.insert(spelled, id);
        Ok(id)
    }

    fn resolve_location(&mut self, doc_key: &str, pointer: &str) -> Result<NodeId, ResolutionError> {
        let uri = location_id(doc_key, pointer);
        if let Some(id) = self.index.get(&uri) {
            if self.visiting.contains(&uri) {
                tracing::debug!(uri = %uri, "back-reference to a node under construction");
            }
            return Ok(*id);
        }

        let document = Arc::clone(&self.document(doc_key)?.value);
        let value = navigate_fragment(&document, pointer).ok_or_else(|| {
            ResolutionError::Unresolvable {
                uri: doc_key.to_string(),
                reference: format!("#{}", pointer),
            }
        })?;
        let base = self.base_at(doc_key, pointer)?;

        let map = match value {
            Value::Object(map) => map,
            Value::Bool(true) => return Ok(self.insert_node(&uri, NodeKind::Any, Map::new(), vec![])),
            other => {
                return Err(ResolutionError::InvalidSchema {
                    uri,
                    message: format!("expected a schema object, got {}", json_type_name(other)),
                })
            }
        };

        // A bare `$ref` is an alias: the location resolves to the target node.
        if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
            let is_alias = map
                .keys()
                .all(|k| k == "$ref" || ANNOTATION_KEYWORDS.contains(&k.as_str()));
            if is_alias {
                if !self.aliasing.insert(uri.clone()) {
                    return Err(ResolutionError::CircularAlias { uri });
                }
                let target = self.resolve_ref(reference, &base, &uri);
                self.aliasing.remove(&uri);
                let target = target?;
                self.index.insert(uri, target);
                return Ok(target);
            }
        }

        // Phase one: reserve and index the slot before touching children.
        let id = NodeId(self.slots.len());
        self.slots.push(None);
        self.index.insert(uri.clone(), id);
        self.visiting.insert(uri.clone());

        let built = self.build_node(&uri, doc_key, pointer, map, &base);
        self.visiting.remove(&uri);
        let (kind, keywords, children) = built?;

        // Phase two: back-fill.
        self.slots[id.0] = Some(SchemaNode {
            id: uri,
            kind,
            keywords,
            children,
        });
        Ok(id)
    }

    fn insert_node(
        &mut self,
        uri: &str,
        kind: NodeKind,
        keywords: Map<String, Value>,
        children: Vec<Edge>,
    ) -> NodeId {
        let id = NodeId(self.slots.len());
        self.slots.push(Some(SchemaNode {
            id: uri.to_string(),
            kind,
            keywords,
            children,
        }));
        self.index.insert(uri.to_string(), id);
        id
    }

    #[allow(clippy::type_complexity)]
    fn build_node(
        &mut self,
        uri: &str,
        doc_key: &str,
        pointer: &str,
        map: &Map<String, Value>,
        base: &Url,
    ) -> Result<(NodeKind, Map<String, Value>, Vec<Edge>), ResolutionError> {
        let mut children = Vec::new();

        // `$ref` with siblings behaves like `allOf: [target]` plus the siblings.
        let mut all_of_index = 0;
        if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
            let target = self.resolve_ref(reference, base, uri)?;
            children.push(Edge {
                role: EdgeRole::AllOf(all_of_index),
                target,
            });
            all_of_index += 1;
        }

        if let Some(extends) = map.get("extends") {
            let entries: Vec<&Value> = match extends {
                Value::Array(arr) => arr.iter().collect(),
                other => vec![other],
            };
            for (i, entry) in entries.into_iter().enumerate() {
                let target = match entry {
                    Value::String(reference) => self.resolve_ref(reference, base, uri)?,
                    Value::Object(_) => {
                        let child = if matches!(extends, Value::Array(_)) {
                            format!("{}/extends/{}", pointer, i)
                        } else {
                            format!("{}/extends", pointer)
                        };
                        self.resolve_location(doc_key, &child)?
                    }
                    other => {
                        return Err(ResolutionError::InvalidSchema {
                            uri: uri.to_string(),
                            message: format!(
                                "extends entries must be URIs or schemas, got {}",
                                json_type_name(other)
                            ),
                        })
                    }
                };
                children.push(Edge {
                    role: EdgeRole::Extends(i),
                    target,
                });
            }
        }

        for keyword in ["allOf", "oneOf", "anyOf"] {
            let Some(branches) = map.get(keyword) else {
                continue;
            };
            let Some(branches) = branches.as_array() else {
                return Err(ResolutionError::InvalidSchema {
                    uri: uri.to_string(),
                    message: format!("{} must be an array", keyword),
                });
            };
            for i in 0..branches.len() {
                let child = format!("{}/{}/{}", pointer, keyword, i);
                let target = self.resolve_location(doc_key, &child)?;
                let role = match keyword {
                    "allOf" => {
                        all_of_index += 1;
                        EdgeRole::AllOf(all_of_index - 1)
                    }
                    "oneOf" => EdgeRole::OneOf(i),
                    _ => EdgeRole::AnyOf(i),
                };
                children.push(Edge { role, target });
            }
        }

        if let Some(props) = map.get("properties") {
            let Some(props) = props.as_object() else {
                return Err(ResolutionError::InvalidSchema {
                    uri: uri.to_string(),
                    message: "properties must be an object".to_string(),
                });
            };
            for name in props.keys() {
                let child = format!("{}/properties/{}", pointer, escape_pointer(name));
                let target = self.resolve_location(doc_key, &child)?;
                children.push(Edge {
                    role: EdgeRole::Property(name.clone()),
                    target,
                });
            }
        }

        match map.get("items") {
            None => {}
            Some(Value::Object(_)) | Some(Value::Bool(true)) => {
                let target = self.resolve_location(doc_key, &format!("{}/items", pointer))?;
                children.push(Edge {
                    role: EdgeRole::Items,
                    target,
                });
            }
            Some(other) => {
                return Err(ResolutionError::InvalidSchema {
                    uri: uri.to_string(),
                    message: format!(
                        "items must be a single schema, got {}",
                        json_type_name(other)
                    ),
                })
            }
        }

        let mut keywords = Map::new();
        for (key, value) in map {
            if STRUCTURAL_KEYWORDS.contains(&key.as_str()) {
                continue;
            }
            if key == "additionalProperties" && value.is_object() {
                let child = format!("{}/additionalProperties", pointer);
                let target = self.resolve_location(doc_key, &child)?;
                children.push(Edge {
                    role: EdgeRole::AdditionalProperties,
                    target,
                });
                continue;
            }
            keywords.insert(key.clone(), value.clone());
        }

        let kind = classify(map, uri)?;
        Ok((kind, keywords, children))
    }

    fn finish(self, root: NodeId, roots: Vec<NodeId>) -> Result<SchemaGraph, ResolutionError> {
        let mut nodes = Vec::with_capacity(self.slots.len());
        for (i, slot) in self.slots.into_iter().enumerate() {
            let node = slot.ok_or_else(|| ResolutionError::InvalidSchema {
                uri: format!("node #{}", i),
                message: "node was never completed".to_string(),
            })?;
            nodes.push(node);
        }
        Ok(SchemaGraph {
            nodes,
            index: self.index,
            root,
            roots,
        })
    }
}

/// Decide the node kind from its `type` keyword and structure.
fn classify(map: &Map<String, Value>, uri: &str) -> Result<NodeKind, ResolutionError> {
    let declared: Vec<&str> = match map.get("type") {
        None => vec![],
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(ts)) => ts.iter().filter_map(Value::as_str).collect(),
        Some(other) => {
            return Err(ResolutionError::InvalidSchema {
                uri: uri.to_string(),
                message: format!("type must be a string or array, got {}", json_type_name(other)),
            })
        }
    };

    let has = |k: &str| map.contains_key(k);
    if declared.contains(&"object")
        || has("properties")
        || has("additionalProperties")
        || (declared.is_empty() && has("required"))
    {
        return Ok(NodeKind::Object);
    }
    if declared.contains(&"array") || has("items") {
        return Ok(NodeKind::Array);
    }
    if !declared.is_empty() {
        // Unknown type names are reported by the compiler.
        return Ok(NodeKind::Scalar);
    }
    if has("allOf") || has("oneOf") || has("anyOf") || has("extends") || has("$ref") {
        return Ok(NodeKind::Composite);
    }
    Ok(NodeKind::Any)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::MemoryFetcher;
    use serde_json::json;

    const BASE: &str = "https://example.com/schemas/root.json";

    fn resolve_doc(doc: Value) -> Result<SchemaGraph, ResolutionError> {
        resolve(&doc, BASE, &MemoryFetcher::new())
    }

    #[test]
    fn resolves_properties_in_order() {
        let graph = resolve_doc(json!({
            "type": "object",
            "properties": {
                "zeta": { "type": "string" },
                "alpha": { "type": "integer" }
            }
        }))
        .unwrap();

        let root = graph.node(graph.root());
        assert_eq!(root.kind, NodeKind::Object);
        assert_eq!(root.id, BASE);
        let names: Vec<&str> = root.properties().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);

        let (_, alpha) = root.properties().nth(1).unwrap();
        assert_eq!(graph.node(alpha).kind, NodeKind::Scalar);
        assert_eq!(
            graph.node(alpha).id,
            format!("{}#/properties/alpha", BASE)
        );
    }

    #[test]
    fn self_reference_resolves_to_same_node() {
        let graph = resolve_doc(json!({
            "$defs": {
                "Node": {
                    "type": "object",
                    "properties": {
                        "children": {
                            "type": "array",
                            "items": { "$ref": "#/$defs/Node" }
                        }
                    }
                }
            },
            "$ref": "#/$defs/Node"
        }))
        .unwrap();

        let node_id = graph.lookup(&format!("{}#/$defs/Node", BASE)).unwrap();
        // The bare-$ref root is an alias of Node.
        assert_eq!(graph.root(), node_id);
        let node = graph.node(node_id);
        let (_, children) = node.properties().next().unwrap();
        let items = graph.node(children).items().unwrap();
        assert_eq!(items, node_id);
    }

    #[test]
    fn repeated_refs_share_one_node() {
        let graph = resolve_doc(json!({
            "type": "object",
            "properties": {
                "home": { "$ref": "#/definitions/address" },
                "work": { "$ref": "#/definitions/address" }
            },
            "definitions": {
                "address": { "type": "object", "properties": { "city": { "type": "string" } } }
            }
        }))
        .unwrap();

        let root = graph.node(graph.root());
        let targets: Vec<NodeId> = root.properties().map(|(_, t)| t).collect();
        assert_eq!(targets[0], targets[1]);
        assert_eq!(graph.roots().len(), 2);
    }

    #[test]
    fn unresolvable_pointer_fails() {
        let err = resolve_doc(json!({
            "type": "object",
            "properties": { "a": { "$ref": "#/$defs/Missing" } }
        }))
        .unwrap_err();
        assert!(matches!(err, ResolutionError::Unresolvable { .. }));
    }

    #[test]
    fn circular_alias_fails() {
        let err = resolve_doc(json!({
            "$defs": {
                "A": { "$ref": "#/$defs/B" },
                "B": { "$ref": "#/$defs/A" }
            },
            "type": "object"
        }))
        .unwrap_err();
        assert!(matches!(err, ResolutionError::CircularAlias { .. }));
    }

    #[test]
    fn external_documents_are_fetched_once() {
        let fetcher = MemoryFetcher::new().with_document(
            "https://example.com/schemas/address.json",
            json!({ "type": "object", "properties": { "city": { "type": "string" } } }),
        );
        let graph = resolve(
            &json!({
                "type": "object",
                "properties": {
                    "home": { "$ref": "address.json" },
                    "work": { "$ref": "address.json#" }
                }
            }),
            BASE,
            &fetcher,
        )
        .unwrap();

        let root = graph.node(graph.root());
        let targets: Vec<NodeId> = root.properties().map(|(_, t)| t).collect();
        assert_eq!(targets[0], targets[1]);
        assert_eq!(
            graph.node(targets[0]).id,
            "https://example.com/schemas/address.json"
        );
    }

    #[test]
    fn missing_external_document_is_fetch_error() {
        let err = resolve_doc(json!({
            "type": "object",
            "properties": { "a": { "$ref": "other.json" } }
        }))
        .unwrap_err();
        assert!(matches!(err, ResolutionError::Fetch { .. }));
    }

    #[test]
    fn embedded_id_and_anchor_resolve() {
        let graph = resolve_doc(json!({
            "type": "object",
            "properties": {
                "a": { "$ref": "item.json" },
                "b": { "$ref": "#money" }
            },
            "$defs": {
                "Item": { "$id": "item.json", "type": "object" },
                "Money": { "$anchor": "money", "type": "number" }
            }
        }))
        .unwrap();

        let root = graph.node(graph.root());
        let targets: Vec<NodeId> = root.properties().map(|(_, t)| t).collect();
        assert_eq!(graph.node(targets[0]).id, format!("{}#/$defs/Item", BASE));
        assert_eq!(graph.node(targets[1]).kind, NodeKind::Scalar);
        assert_eq!(graph.lookup("https://example.com/schemas/item.json"), Some(targets[0]));
    }

    #[test]
    fn ref_with_siblings_becomes_all_of() {
        let graph = resolve_doc(json!({
            "$defs": { "Base": { "type": "object", "properties": { "id": { "type": "string" } } } },
            "$ref": "#/$defs/Base",
            "properties": { "extra": { "type": "integer" } }
        }))
        .unwrap();
        let root = graph.node(graph.root());
        assert_eq!(root.kind, NodeKind::Object);
        assert_eq!(root.flattened().len(), 1);
    }

    #[test]
    fn extends_accepts_uri_strings() {
        let graph = resolve_doc(json!({
            "definitions": { "metadata": { "type": "object", "properties": { "title": { "type": "string" } } } },
            "type": "object",
            "extends": ["#/definitions/metadata"]
        }))
        .unwrap();
        let root = graph.node(graph.root());
        let flat = root.flattened();
        assert_eq!(flat.len(), 1);
        assert_eq!(graph.node(flat[0]).id, format!("{}#/definitions/metadata", BASE));
    }

    #[test]
    fn tuple_items_are_rejected() {
        let err = resolve_doc(json!({ "type": "array", "items": [{ "type": "string" }] })).unwrap_err();
        assert!(matches!(err, ResolutionError::InvalidSchema { .. }));
    }

    #[test]
    fn resolution_is_deterministic() {
        let doc = json!({
            "type": "object",
            "properties": {
                "a": { "$ref": "#/$defs/X" },
                "b": { "oneOf": [{ "type": "string" }, { "type": "integer" }] }
            },
            "$defs": { "X": { "type": "object" } }
        });
        assert_eq!(resolve_doc(doc.clone()).unwrap(), resolve_doc(doc).unwrap());
    }

    #[test]
    fn invalid_base_uri() {
        let err = resolve(&json!({}), "not a uri", &MemoryFetcher::new()).unwrap_err();
        assert!(matches!(err, ResolutionError::InvalidUri { .. }));
    }
}
