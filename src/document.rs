//! Specification documents and the facts computed from them

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{RegistryError, Result};
use crate::references::{validate_references, ReferenceIndex};

/// HTTP methods that name operations inside a path item
pub const HTTP_METHODS: [&str; 8] = ["get", "put", "post", "delete", "options", "head", "patch", "trace"];

/// Serialization format of a stored document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpecFormat {
    #[default]
    Json,
    Yaml,
}

impl SpecFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SpecFormat::Json => "json",
            SpecFormat::Yaml => "yaml",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "json" => Some(SpecFormat::Json),
            "yaml" | "yml" => Some(SpecFormat::Yaml),
            _ => None,
        }
    }

    /// Parse document bytes; `path` is only used for error context
    pub fn parse(&self, bytes: &[u8], path: &str) -> Result<Value> {
        match self {
            SpecFormat::Json => serde_json::from_slice(bytes).map_err(|source| RegistryError::Json {
                operation: "parse",
                path: path.to_string(),
                source,
            }),
            SpecFormat::Yaml => serde_yaml::from_slice(bytes).map_err(|source| RegistryError::Yaml {
                operation: "parse",
                path: path.to_string(),
                source,
            }),
        }
    }

    pub fn render(&self, value: &Value, path: &str) -> Result<Vec<u8>> {
        match self {
            SpecFormat::Json => serde_json::to_vec_pretty(value).map_err(|source| RegistryError::Json {
                operation: "serialize",
                path: path.to_string(),
                source,
            }),
            SpecFormat::Yaml => serde_yaml::to_string(value)
                .map(String::into_bytes)
                .map_err(|source| RegistryError::Yaml {
                    operation: "serialize",
                    path: path.to_string(),
                    source,
                }),
        }
    }
}

/// A parsed specification together with the format it was stored in
#[derive(Debug, Clone, PartialEq)]
pub struct SpecDocument {
    pub content: Value,
    pub format: SpecFormat,
}

impl SpecDocument {
    pub fn new(content: Value, format: SpecFormat) -> Self {
        Self { content, format }
    }

    pub fn json(content: Value) -> Self {
        Self::new(content, SpecFormat::Json)
    }
}

/// `components.<kind>` as a mapping, if present
pub fn component_map<'a>(doc: &'a Value, kind: &str) -> Option<&'a Map<String, Value>> {
    doc.get("components")?.get(kind)?.as_object()
}

/// Every `(path, method, operation)` in the document, in document order
pub fn operations(doc: &Value) -> Vec<(&str, &'static str, &Value)> {
    let mut ops = Vec::new();
    if let Some(paths) = doc.get("paths").and_then(Value::as_object) {
        for (path, item) in paths {
            for method in HTTP_METHODS {
                if let Some(op) = item.get(method) {
                    ops.push((path.as_str(), method, op));
                }
            }
        }
    }
    ops
}

/// Counts describing a document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStats {
    pub paths: usize,
    pub endpoints: usize,
    pub schemas: usize,
    pub parameters: usize,
    pub responses: usize,
    pub security_schemes: usize,
    pub references: usize,
}

impl DocumentStats {
    pub fn compute(doc: &Value) -> Self {
        let count = |kind: &str| component_map(doc, kind).map(Map::len).unwrap_or(0);
        Self {
            paths: doc.get("paths").and_then(Value::as_object).map(Map::len).unwrap_or(0),
            endpoints: operations(doc).len(),
            schemas: count("schemas"),
            parameters: count("parameters"),
            responses: count("responses"),
            security_schemes: count("securitySchemes"),
            references: ReferenceIndex::build(doc).total_usages(),
        }
    }
}

/// Structural checks run when a version is created.
///
/// Full OpenAPI linting is done by an external tool; this only records what
/// the registry itself can see.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSnapshot {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub broken_references: usize,
}

impl ValidationSnapshot {
    pub fn compute(doc: &Value) -> Self {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if !doc.is_object() {
            errors.push("document root must be a mapping".to_string());
        }
        if doc.get("openapi").and_then(Value::as_str).is_none() {
            errors.push("missing 'openapi' version string".to_string());
        }
        match doc.get("info") {
            Some(info) => {
                for field in ["title", "version"] {
                    if info.get(field).is_none() {
                        errors.push(format!("missing 'info.{}'", field));
                    }
                }
            }
            None => errors.push("missing 'info' section".to_string()),
        }
        match doc.get("paths") {
            Some(Value::Object(paths)) if paths.is_empty() => {
                warnings.push("document defines no paths".to_string());
            }
            Some(Value::Object(_)) => {}
            Some(_) => errors.push("'paths' must be a mapping".to_string()),
            None => warnings.push("document defines no paths".to_string()),
        }

        let report = validate_references(doc);
        for broken in &report.broken {
            errors.push(format!(
                "unresolved reference {} ({} usage{})",
                broken.reference,
                broken.locations.len(),
                if broken.locations.len() == 1 { "" } else { "s" }
            ));
        }

        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
            broken_references: report.broken.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn petstore() -> Value {
        json!({
            "openapi": "3.0.3",
            "info": { "title": "Pets", "version": "1.0.0" },
            "paths": {
                "/pets": {
                    "get": { "responses": { "200": { "description": "ok" } } },
                    "post": {
                        "requestBody": {
                            "content": { "application/json": { "schema": { "$ref": "#/components/schemas/Pet" } } }
                        },
                        "responses": { "201": { "description": "created" } }
                    },
                    "parameters": []
                }
            },
            "components": {
                "schemas": { "Pet": { "type": "object" } },
                "securitySchemes": { "apiKey": { "type": "apiKey", "in": "header", "name": "X-Key" } }
            }
        })
    }

    #[test]
    fn test_stats() {
        let stats = DocumentStats::compute(&petstore());
        assert_eq!(stats.paths, 1);
        assert_eq!(stats.endpoints, 2);
        assert_eq!(stats.schemas, 1);
        assert_eq!(stats.security_schemes, 1);
        assert_eq!(stats.references, 1);
    }

    #[test]
    fn test_operations_skip_non_methods() {
        let doc = petstore();
        let ops: Vec<_> = operations(&doc).into_iter().map(|(p, m, _)| format!("{} {}", m, p)).collect();
        assert_eq!(ops, vec!["get /pets", "post /pets"]);
    }

    #[test]
    fn test_validation_snapshot() {
        let snapshot = ValidationSnapshot::compute(&petstore());
        assert!(snapshot.valid, "{:?}", snapshot.errors);

        let mut doc = petstore();
        doc["components"]["schemas"].as_object_mut().unwrap().remove("Pet");
        doc.as_object_mut().unwrap().remove("info");
        let snapshot = ValidationSnapshot::compute(&doc);
        assert!(!snapshot.valid);
        assert_eq!(snapshot.broken_references, 1);
        assert_eq!(snapshot.errors.len(), 2);
    }

    #[test]
    fn test_yaml_format_roundtrip() {
        let doc = petstore();
        let bytes = SpecFormat::Yaml.render(&doc, "mem").unwrap();
        let parsed = SpecFormat::Yaml.parse(&bytes, "mem").unwrap();
        assert_eq!(parsed, doc);
        assert_eq!(SpecFormat::from_extension("yml"), Some(SpecFormat::Yaml));
    }
}
