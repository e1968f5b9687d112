//! `$ref` indexing, validation and rewriting
//!
//! All operations walk the document the same way: the root's `paths` first,
//! then `components`, then the remaining top-level keys in document order.
//! Below the root every mapping and sequence is descended uniformly, so refs
//! inside `allOf`/`oneOf`/`anyOf`, `items` or deeply nested `properties` are
//! all found. References are compared by exact string equality.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::component_map;
use crate::error::{RegistryError, Result};

/// Prefix shared by every internal component reference
pub const COMPONENTS_PREFIX: &str = "#/components/";

/// Component kinds defined by OpenAPI 3.x
pub const COMPONENT_KINDS: [&str; 10] = [
    "schemas",
    "responses",
    "parameters",
    "examples",
    "requestBodies",
    "headers",
    "securitySchemes",
    "links",
    "callbacks",
    "pathItems",
];

const ROOT_ORDER: [&str; 2] = ["paths", "components"];

/// One step in a document tree path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Location of a node in a document tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreePath(Vec<PathSegment>);

impl TreePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    fn child_key(&self, key: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Key(key.to_string()));
        Self(segments)
    }

    fn child_index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(index));
        Self(segments)
    }

    /// RFC 6901 JSON Pointer, usable with `Value::pointer`
    pub fn to_pointer(&self) -> String {
        let mut pointer = String::new();
        for segment in &self.0 {
            pointer.push('/');
            match segment {
                PathSegment::Key(key) => pointer.push_str(&key.replace('~', "~0").replace('/', "~1")),
                PathSegment::Index(i) => pointer.push_str(&i.to_string()),
            }
        }
        pointer
    }
}

/// Dotted form, e.g. `paths./items.get.parameters[0].$ref`
impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Key(key) if i == 0 => write!(f, "{}", key)?,
                PathSegment::Key(key) => write!(f, ".{}", key)?,
                PathSegment::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

/// A single use of a reference. `location` points at the `$ref` string itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceUsage {
    pub reference: String,
    pub location: TreePath,
}

/// An internal `#/components/<kind>/<name>` pointer split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentRef {
    pub kind: String,
    pub name: String,
}

impl ComponentRef {
    /// Returns `None` for external refs and for internal pointers that do not
    /// point into `components`.
    pub fn parse(reference: &str) -> Option<Self> {
        let rest = reference.strip_prefix(COMPONENTS_PREFIX)?;
        let (kind, name) = rest.split_once('/')?;
        if kind.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self {
            kind: kind.to_string(),
            name: name.replace("~1", "/").replace("~0", "~"),
        })
    }

    /// Build the canonical pointer for a component. The name is escaped per
    /// RFC 6901, so `a/b` becomes `a~1b`.
    pub fn canonical(kind: &str, name: &str) -> Result<String> {
        if kind.is_empty() || !COMPONENT_KINDS.contains(&kind) {
            return Err(RegistryError::invalid(
                "component type",
                kind,
                format!("expected one of {}", COMPONENT_KINDS.join(", ")),
            ));
        }
        if name.is_empty() {
            return Err(RegistryError::invalid("component name", name, "must not be empty"));
        }
        Ok(format!(
            "{}{}/{}",
            COMPONENTS_PREFIX,
            kind,
            name.replace('~', "~0").replace('/', "~1")
        ))
    }

    pub fn is_internal(reference: &str) -> bool {
        reference.starts_with(COMPONENTS_PREFIX)
    }

    /// Whether `doc` defines this component
    pub fn resolves_in(&self, doc: &Value) -> bool {
        component_map(doc, &self.kind).is_some_and(|defs| defs.contains_key(&self.name))
    }

    pub fn resolve<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        component_map(doc, &self.kind)?.get(&self.name)
    }
}

/// Visit every `$ref` string in document order
fn walk<'a>(doc: &'a Value, visit: &mut dyn FnMut(&'a str, &TreePath)) {
    match doc {
        Value::Object(root) => {
            let root_path = TreePath::root();
            for key in ROOT_ORDER {
                if let Some(child) = root.get(key) {
                    walk_node(key, child, &root_path, visit);
                }
            }
            for (key, child) in root.iter().filter(|(k, _)| !ROOT_ORDER.contains(&k.as_str())) {
                walk_node(key, child, &root_path, visit);
            }
        }
        other => walk_value(other, &TreePath::root(), visit),
    }
}

fn walk_node<'a>(key: &str, child: &'a Value, parent: &TreePath, visit: &mut dyn FnMut(&'a str, &TreePath)) {
    let path = parent.child_key(key);
    if key == "$ref" {
        if let Value::String(reference) = child {
            visit(reference, &path);
            return;
        }
    }
    walk_value(child, &path, visit);
}

fn walk_value<'a>(value: &'a Value, path: &TreePath, visit: &mut dyn FnMut(&'a str, &TreePath)) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                walk_node(key, child, path, visit);
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                walk_value(item, &path.child_index(i), visit);
            }
        }
        _ => {}
    }
}

/// Every reference string in a document mapped to where it is used
#[derive(Debug, Clone, Default)]
pub struct ReferenceIndex {
    entries: Vec<(String, Vec<TreePath>)>,
    positions: HashMap<String, usize>,
}

impl ReferenceIndex {
    pub fn build(doc: &Value) -> Self {
        let mut index = Self::default();
        walk(doc, &mut |reference, path| index.insert(reference, path.clone()));
        tracing::debug!(
            references = index.entries.len(),
            usages = index.total_usages(),
            "Built reference index"
        );
        index
    }

    fn insert(&mut self, reference: &str, path: TreePath) {
        match self.positions.get(reference) {
            Some(&i) => self.entries[i].1.push(path),
            None => {
                self.positions.insert(reference.to_string(), self.entries.len());
                self.entries.push((reference.to_string(), vec![path]));
            }
        }
    }

    /// Locations of one reference string, in document order
    pub fn locations(&self, reference: &str) -> &[TreePath] {
        self.positions
            .get(reference)
            .map(|&i| self.entries[i].1.as_slice())
            .unwrap_or(&[])
    }

    /// Distinct reference strings in first-seen order
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(r, _)| r.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[TreePath])> {
        self.entries.iter().map(|(r, paths)| (r.as_str(), paths.as_slice()))
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.positions.contains_key(reference)
    }

    pub fn total_usages(&self) -> usize {
        self.entries.iter().map(|(_, paths)| paths.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// All places that reference `#/components/<kind>/<name>`
pub fn find_usages(doc: &Value, kind: &str, name: &str) -> Result<Vec<ReferenceUsage>> {
    let reference = ComponentRef::canonical(kind, name)?;
    let mut usages = Vec::new();
    walk(doc, &mut |found, path| {
        if found == reference {
            usages.push(ReferenceUsage {
                reference: reference.clone(),
                location: path.clone(),
            });
        }
    });
    Ok(usages)
}

/// An internal reference with no matching component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokenReference {
    #[serde(rename = "ref")]
    pub reference: String,
    pub locations: Vec<TreePath>,
}

/// Outcome of checking every internal reference in a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceReport {
    pub valid: bool,
    pub broken: Vec<BrokenReference>,
}

/// Check that every `#/components/...` reference resolves locally.
///
/// External references are never reported.
pub fn validate_references(doc: &Value) -> ReferenceReport {
    let index = ReferenceIndex::build(doc);
    let broken: Vec<BrokenReference> = index
        .iter()
        .filter(|(reference, _)| ComponentRef::is_internal(reference))
        .filter(|(reference, _)| !ComponentRef::parse(reference).is_some_and(|c| c.resolves_in(doc)))
        .map(|(reference, locations)| BrokenReference {
            reference: reference.to_string(),
            locations: locations.to_vec(),
        })
        .collect();

    ReferenceReport {
        valid: broken.is_empty(),
        broken,
    }
}

/// Result of rewriting one reference string to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteResult {
    pub count: usize,
    pub locations: Vec<TreePath>,
}

/// Replace every `$ref` equal to `old_ref` with `new_ref`, in place.
///
/// `new_ref` is not checked for resolvability.
pub fn rewrite_references(doc: &mut Value, old_ref: &str, new_ref: &str) -> Result<RewriteResult> {
    if old_ref.is_empty() {
        return Err(RegistryError::invalid("reference", old_ref, "old reference must not be empty"));
    }
    if new_ref.is_empty() {
        return Err(RegistryError::invalid("reference", new_ref, "new reference must not be empty"));
    }

    let locations = ReferenceIndex::build(doc).locations(old_ref).to_vec();
    for location in &locations {
        match doc.pointer_mut(&location.to_pointer()) {
            Some(slot) => *slot = Value::String(new_ref.to_string()),
            None => {
                return Err(RegistryError::Corrupt {
                    path: location.to_string(),
                    reason: "indexed reference disappeared during rewrite".to_string(),
                })
            }
        }
    }

    tracing::debug!(old_ref, new_ref, count = locations.len(), "Rewrote references");
    Ok(RewriteResult {
        count: locations.len(),
        locations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "openapi": "3.0.3",
            "components": {
                "schemas": {
                    "Order": {
                        "type": "object",
                        "properties": {
                            "items": { "type": "array", "items": { "$ref": "#/components/schemas/Item" } },
                            "shipping": {
                                "allOf": [
                                    { "$ref": "#/components/schemas/Address" },
                                    { "oneOf": [{ "$ref": "#/components/schemas/Item" }] }
                                ]
                            }
                        }
                    },
                    "Item": { "type": "object" }
                }
            },
            "paths": {
                "/orders": {
                    "post": {
                        "requestBody": {
                            "content": { "application/json": { "schema": { "$ref": "#/components/schemas/Order" } } }
                        },
                        "responses": {
                            "200": { "$ref": "https://example.com/common.yaml#/Ok" }
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn test_paths_walked_before_components() {
        let index = ReferenceIndex::build(&doc());
        let refs: Vec<_> = index.references().collect();
        assert_eq!(
            refs,
            vec![
                "#/components/schemas/Order",
                "https://example.com/common.yaml#/Ok",
                "#/components/schemas/Item",
                "#/components/schemas/Address",
            ]
        );
        assert_eq!(index.total_usages(), 5);
    }

    #[test]
    fn test_find_usages_nested_combinators() {
        let doc = doc();
        let usages = find_usages(&doc, "schemas", "Item").unwrap();
        let paths: Vec<String> = usages.iter().map(|u| u.location.to_string()).collect();
        assert_eq!(
            paths,
            vec![
                "components.schemas.Order.properties.items.items.$ref",
                "components.schemas.Order.properties.shipping.allOf[1].oneOf[0].$ref",
            ]
        );
        for usage in &usages {
            assert_eq!(
                doc.pointer(&usage.location.to_pointer()).and_then(Value::as_str),
                Some("#/components/schemas/Item")
            );
        }
    }

    #[test]
    fn test_find_usages_empty_and_invalid() {
        assert!(find_usages(&doc(), "schemas", "Nothing").unwrap().is_empty());
        assert_eq!(find_usages(&doc(), "widgets", "Item").unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(find_usages(&doc(), "schemas", "").unwrap_err().kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_validate_ignores_external() {
        let report = validate_references(&doc());
        assert!(!report.valid);
        assert_eq!(report.broken.len(), 1);
        assert_eq!(report.broken[0].reference, "#/components/schemas/Address");
    }

    #[test]
    fn test_malformed_internal_pointer_is_broken() {
        let doc = json!({
            "paths": { "/a": { "get": { "responses": { "200": { "$ref": "#/components/responses" } } } } },
            "components": { "responses": {} }
        });
        let report = validate_references(&doc);
        assert_eq!(report.broken[0].reference, "#/components/responses");
    }

    #[test]
    fn test_exact_string_equality() {
        let mut doc = json!({
            "paths": {},
            "components": { "schemas": { "A": { "$ref": "#/components/schemas/Item/" } } }
        });
        let result = rewrite_references(&mut doc, "#/components/schemas/Item", "#/components/schemas/Product").unwrap();
        assert_eq!(result.count, 0);
        assert_eq!(doc["components"]["schemas"]["A"]["$ref"], "#/components/schemas/Item/");
    }

    #[test]
    fn test_escaped_pointer_segments() {
        let doc = json!({
            "paths": { "/a/{id}": { "get": { "$ref": "#/components/pathItems/x" } } },
            "components": { "schemas": { "a/b": { "type": "string" } } }
        });
        let index = ReferenceIndex::build(&doc);
        let location = &index.locations("#/components/pathItems/x")[0];
        assert_eq!(location.to_pointer(), "/paths/~1a~1{id}/get/$ref");
        assert_eq!(location.to_string(), "paths./a/{id}.get.$ref");

        let parsed = ComponentRef::parse("#/components/schemas/a~1b").unwrap();
        assert_eq!(parsed.name, "a/b");
        assert!(parsed.resolves_in(&doc));
    }

    #[test]
    fn test_usages_of_names_needing_escapes() {
        let doc = json!({
            "paths": {
                "/a": { "get": { "responses": { "200": { "$ref": "#/components/responses/a~1b" } } } },
                "/b": { "get": { "responses": { "200": { "$ref": "#/components/responses/x~0y" } } } }
            },
            "components": { "responses": { "a/b": { "description": "ok" }, "x~y": { "description": "ok" } } }
        });
        assert!(validate_references(&doc).valid);

        let usages = find_usages(&doc, "responses", "a/b").unwrap();
        assert_eq!(usages.len(), 1);
        assert_eq!(usages[0].reference, "#/components/responses/a~1b");
        assert_eq!(find_usages(&doc, "responses", "x~y").unwrap().len(), 1);
        assert_eq!(
            ComponentRef::canonical("schemas", "~/").unwrap(),
            "#/components/schemas/~0~1"
        );
    }

    #[test]
    fn test_rewrite_rejects_empty() {
        let mut doc = doc();
        assert!(rewrite_references(&mut doc, "", "#/components/schemas/X").is_err());
        assert!(rewrite_references(&mut doc, "#/components/schemas/Item", "").is_err());
    }
}
