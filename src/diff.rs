//! Structural diffing between two specification documents
//!
//! Detects endpoint, schema and security changes and classifies each one as
//! breaking or non-breaking. Comparison is structural: two schemas that are
//! equivalent but written differently are reported as modified.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::{component_map, operations};
use crate::references::{ComponentRef, ReferenceIndex, COMPONENTS_PREFIX};

/// Upper bound on `$ref` hops followed while resolving a parameter or schema
const MAX_REF_HOPS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    #[serde(rename = "breaking")]
    Breaking,
    #[serde(rename = "non-breaking")]
    NonBreaking,
}

impl Severity {
    fn from_breaking(breaking: bool) -> Self {
        if breaking {
            Severity::Breaking
        } else {
            Severity::NonBreaking
        }
    }
}

/// Which part of the document a change belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCategory {
    Endpoint,
    Schema,
    Security,
}

/// Type of change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    EndpointAdded,
    EndpointRemoved,
    /// Operation differs in a way no finer rule describes
    OperationModified,
    ParameterAdded,
    ParameterRemoved,
    ParameterTypeChanged,
    ParameterRequiredChanged,
    ResponseAdded,
    ResponseRemoved,
    ResponseFieldAdded,
    ResponseFieldRemoved,
    SchemaAdded,
    SchemaRemoved,
    SchemaModified,
    FieldAdded,
    FieldRemoved,
    TypeChanged,
    OptionalityChanged,
    EnumValueAdded,
    EnumValueRemoved,
    SecuritySchemeAdded,
    SecuritySchemeRemoved,
    SecurityRequirementChanged,
}

/// A detected difference between two documents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub category: ChangeCategory,
    pub change_type: ChangeType,
    /// `METHOD path` for endpoints, component name for schemas and schemes,
    /// `security` for the global requirement
    pub target: String,
    /// Location inside the target, e.g. `properties.tag`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub description: String,
    pub severity: Severity,
}

impl Change {
    pub fn is_breaking(&self) -> bool {
        self.severity == Severity::Breaking
    }
}

/// Counts per category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub endpoints_added: usize,
    pub endpoints_removed: usize,
    pub endpoints_modified: usize,
    pub schemas_added: usize,
    pub schemas_removed: usize,
    pub schemas_modified: usize,
    pub security_changes: usize,
    pub breaking: usize,
    pub non_breaking: usize,
    pub total: usize,
}

/// Added/modified/deleted names recorded on a version at creation time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesSummary {
    pub endpoints_added: Vec<String>,
    pub endpoints_modified: Vec<String>,
    pub endpoints_deleted: Vec<String>,
    pub schemas_added: Vec<String>,
    pub schemas_modified: Vec<String>,
    pub schemas_deleted: Vec<String>,
    pub breaking_changes: Vec<String>,
}

impl ChangesSummary {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Result of comparing two documents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    pub breaking: Vec<Change>,
    pub non_breaking: Vec<Change>,
    pub summary: DiffSummary,
    /// Names of what was added, modified or deleted, in report order
    pub changed: ChangesSummary,
}

impl DiffResult {
    fn from_changes(changes: Vec<Change>) -> Self {
        let mut summary = DiffSummary {
            total: changes.len(),
            ..Default::default()
        };
        let mut changed = ChangesSummary::default();

        for change in &changes {
            let names = match (change.category, change.change_type) {
                (_, ChangeType::EndpointAdded) => &mut changed.endpoints_added,
                (_, ChangeType::EndpointRemoved) => &mut changed.endpoints_deleted,
                (_, ChangeType::SchemaAdded) => &mut changed.schemas_added,
                (_, ChangeType::SchemaRemoved) => &mut changed.schemas_deleted,
                (ChangeCategory::Endpoint, _) => &mut changed.endpoints_modified,
                (ChangeCategory::Schema, _) => &mut changed.schemas_modified,
                (ChangeCategory::Security, _) => {
                    summary.security_changes += 1;
                    continue;
                }
            };
            if !names.contains(&change.target) {
                names.push(change.target.clone());
            }
        }
        summary.endpoints_added = changed.endpoints_added.len();
        summary.endpoints_removed = changed.endpoints_deleted.len();
        summary.endpoints_modified = changed.endpoints_modified.len();
        summary.schemas_added = changed.schemas_added.len();
        summary.schemas_removed = changed.schemas_deleted.len();
        summary.schemas_modified = changed.schemas_modified.len();

        let (breaking, non_breaking): (Vec<_>, Vec<_>) = changes.into_iter().partition(Change::is_breaking);
        summary.breaking = breaking.len();
        summary.non_breaking = non_breaking.len();
        changed.breaking_changes = breaking.iter().map(|c| c.description.clone()).collect();

        Self {
            breaking,
            non_breaking,
            summary,
            changed,
        }
    }

    pub fn has_breaking_changes(&self) -> bool {
        !self.breaking.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.breaking.is_empty() && self.non_breaking.is_empty()
    }

    /// All changes, breaking first
    pub fn changes(&self) -> impl Iterator<Item = &Change> {
        self.breaking.iter().chain(self.non_breaking.iter())
    }

    /// The name lists stored on a version record
    pub fn changes_summary(&self) -> ChangesSummary {
        self.changed.clone()
    }
}

/// Compares documents and classifies the differences
#[derive(Debug, Clone, Default)]
pub struct DiffEngine {
    /// Strict mode - every change is breaking
    strict_mode: bool,
}

impl DiffEngine {
    pub fn new() -> Self {
        Self { strict_mode: false }
    }

    pub fn strict(mut self) -> Self {
        self.strict_mode = true;
        self
    }

    /// Compare `from` (old) against `to` (new)
    pub fn diff(&self, from: &Value, to: &Value) -> DiffResult {
        let mut changes = Vec::new();
        let mut ctx = Diff {
            from,
            to,
            changes: &mut changes,
        };
        ctx.endpoints();
        ctx.schemas();
        ctx.security();

        if self.strict_mode {
            for change in &mut changes {
                change.severity = Severity::Breaking;
            }
        }

        let result = DiffResult::from_changes(changes);
        tracing::debug!(
            breaking = result.summary.breaking,
            non_breaking = result.summary.non_breaking,
            "Computed document diff"
        );
        result
    }
}

/// Diff two documents with the default rules
pub fn diff_documents(from: &Value, to: &Value) -> DiffResult {
    DiffEngine::new().diff(from, to)
}

struct Diff<'a, 'c> {
    from: &'a Value,
    to: &'a Value,
    changes: &'c mut Vec<Change>,
}

type EndpointKey<'a> = (&'a str, &'static str);

fn endpoint_label(path: &str, method: &str) -> String {
    format!("{} {}", method.to_uppercase(), path)
}

fn endpoint_map(doc: &Value) -> BTreeMap<EndpointKey<'_>, &Value> {
    operations(doc).into_iter().map(|(path, method, op)| ((path, method), op)).collect()
}

fn path_item<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    doc.get("paths")?.get(path)
}

/// Follow internal `$ref`s until reaching a concrete node
fn resolve<'a>(doc: &'a Value, mut node: &'a Value) -> &'a Value {
    for _ in 0..MAX_REF_HOPS {
        let Some(target) = node
            .get("$ref")
            .and_then(Value::as_str)
            .and_then(ComponentRef::parse)
            .and_then(|r| r.resolve(doc))
        else {
            break;
        };
        node = target;
    }
    node
}

fn properties(schema: &Value) -> Option<&Map<String, Value>> {
    schema.get("properties").and_then(Value::as_object)
}

fn required_set(schema: &Value) -> BTreeSet<&str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// A schema's declared type (or the ref it points to) plus its format
fn type_signature(schema: &Value) -> (Option<String>, Option<String>) {
    let ty = match schema.get("$ref").and_then(Value::as_str) {
        Some(reference) => Some(reference.to_string()),
        None => schema.get("type").map(|t| match t {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }),
    };
    let format = schema.get("format").and_then(Value::as_str).map(String::from);
    (ty, format)
}

fn describe_type(signature: &(Option<String>, Option<String>)) -> String {
    match signature {
        (Some(ty), Some(format)) => format!("{} ({})", ty, format),
        (Some(ty), None) => ty.clone(),
        (None, Some(format)) => format!("({})", format),
        (None, None) => "unspecified".to_string(),
    }
}

fn join_path(base: &str, segment: &str) -> String {
    if base.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", base, segment)
    }
}

/// One security requirement alternative: scheme name to required scopes
type Requirement<'a> = BTreeMap<&'a str, BTreeSet<&'a str>>;

/// Parse a `security` array. Absent or empty means unauthenticated, which
/// is modelled as a single empty alternative.
fn requirements(security: Option<&Value>) -> Vec<Requirement<'_>> {
    let parsed: Vec<Requirement> = security
        .and_then(Value::as_array)
        .map(|alternatives| {
            alternatives
                .iter()
                .filter_map(Value::as_object)
                .map(|alt| {
                    alt.iter()
                        .map(|(scheme, scopes)| {
                            let scopes = scopes
                                .as_array()
                                .map(|s| s.iter().filter_map(Value::as_str).collect())
                                .unwrap_or_default();
                            (scheme.as_str(), scopes)
                        })
                        .collect()
                })
                .collect()
        })
        .unwrap_or_default();

    if parsed.is_empty() {
        vec![Requirement::new()]
    } else {
        parsed
    }
}

/// `narrow` asks for nothing beyond what `wide` already grants
fn satisfied_by(narrow: &Requirement, wide: &Requirement) -> bool {
    narrow
        .iter()
        .all(|(scheme, scopes)| wide.get(scheme).is_some_and(|granted| scopes.is_subset(granted)))
}

/// Breaking iff some caller that satisfied an old alternative satisfies no new one
fn requirements_tightened(old: &[Requirement], new: &[Requirement]) -> bool {
    old.iter().any(|held| !new.iter().any(|needed| satisfied_by(needed, held)))
}

fn scheme_names<'a>(doc: &'a Value) -> BTreeSet<&'a str> {
    let mut names = BTreeSet::new();
    let mut collect = |security: Option<&'a Value>| {
        for alternative in security.and_then(Value::as_array).into_iter().flatten() {
            if let Some(alt) = alternative.as_object() {
                names.extend(alt.keys().map(String::as_str));
            }
        }
    };
    collect(doc.get("security"));
    for (_, _, op) in operations(doc) {
        collect(op.get("security"));
    }
    names
}

impl<'a, 'c> Diff<'a, 'c> {
    fn push(
        &mut self,
        category: ChangeCategory,
        change_type: ChangeType,
        target: &str,
        path: Option<String>,
        breaking: bool,
        description: String,
    ) {
        self.changes.push(Change {
            category,
            change_type,
            target: target.to_string(),
            path,
            description,
            severity: Severity::from_breaking(breaking),
        });
    }

    // --- Endpoints ---

    fn endpoints(&mut self) {
        let old = endpoint_map(self.from);
        let new = endpoint_map(self.to);
        let keys: BTreeSet<EndpointKey> = old.keys().chain(new.keys()).copied().collect();

        for key in keys {
            let (path, method) = key;
            let label = endpoint_label(path, method);
            match (old.get(&key).copied(), new.get(&key).copied()) {
                (None, Some(_)) => self.push(
                    ChangeCategory::Endpoint,
                    ChangeType::EndpointAdded,
                    &label,
                    None,
                    false,
                    format!("Endpoint {} was added", label),
                ),
                (Some(_), None) => self.push(
                    ChangeCategory::Endpoint,
                    ChangeType::EndpointRemoved,
                    &label,
                    None,
                    true,
                    format!("Endpoint {} was removed", label),
                ),
                (Some(old_op), Some(new_op)) => self.operation(path, &label, old_op, new_op),
                (None, None) => {}
            }
        }
    }

    fn operation(&mut self, path: &str, label: &str, old_op: &'a Value, new_op: &'a Value) {
        let old_shared = path_item(self.from, path).and_then(|item| item.get("parameters"));
        let new_shared = path_item(self.to, path).and_then(|item| item.get("parameters"));

        // Referenced parameters and responses can change while the operation itself does not
        let before = self.changes.len();
        self.parameters(path, label, old_op, new_op);
        self.responses(label, old_op, new_op);

        if self.changes.len() == before && (old_op != new_op || old_shared != new_shared) {
            self.push(
                ChangeCategory::Endpoint,
                ChangeType::OperationModified,
                label,
                None,
                false,
                format!("Endpoint {} was modified", label),
            );
        }
    }

    /// Path-level and operation-level parameters keyed by (`in`, `name`),
    /// operation entries overriding path entries
    fn collect_parameters(doc: &'a Value, path: &str, op: &'a Value) -> BTreeMap<(String, String), &'a Value> {
        let mut params = BTreeMap::new();
        let shared = path_item(doc, path).and_then(|item| item.get("parameters"));
        for list in [shared, op.get("parameters")].into_iter().flatten() {
            for raw in list.as_array().into_iter().flatten() {
                let param = resolve(doc, raw);
                let key = match (
                    param.get("in").and_then(Value::as_str),
                    param.get("name").and_then(Value::as_str),
                ) {
                    (Some(location), Some(name)) => (location.to_string(), name.to_string()),
                    // Unresolvable refs are tracked by the ref string itself
                    _ => match raw.get("$ref").and_then(Value::as_str) {
                        Some(reference) => ("$ref".to_string(), reference.to_string()),
                        None => continue,
                    },
                };
                params.insert(key, param);
            }
        }
        params
    }

    fn parameters(&mut self, path: &str, label: &str, old_op: &'a Value, new_op: &'a Value) {
        let old = Self::collect_parameters(self.from, path, old_op);
        let new = Self::collect_parameters(self.to, path, new_op);
        let is_required = |p: &Value| {
            p.get("in").and_then(Value::as_str) == Some("path")
                || p.get("required").and_then(Value::as_bool).unwrap_or(false)
        };

        let keys: BTreeSet<&(String, String)> = old.keys().chain(new.keys()).collect();
        for key in keys {
            let (location, name) = key;
            let at = Some(format!("parameters.{}.{}", location, name));
            match (old.get(key).copied(), new.get(key).copied()) {
                (Some(old_param), None) => {
                    let required = is_required(old_param);
                    self.push(
                        ChangeCategory::Endpoint,
                        ChangeType::ParameterRemoved,
                        label,
                        at,
                        required,
                        format!(
                            "{} {} parameter '{}' was removed from {}",
                            if required { "Required" } else { "Optional" },
                            location,
                            name,
                            label
                        ),
                    );
                }
                (None, Some(new_param)) => {
                    let required = is_required(new_param);
                    self.push(
                        ChangeCategory::Endpoint,
                        ChangeType::ParameterAdded,
                        label,
                        at,
                        required,
                        format!(
                            "{} {} parameter '{}' was added to {}",
                            if required { "Required" } else { "Optional" },
                            location,
                            name,
                            label
                        ),
                    );
                }
                (Some(old_param), Some(new_param)) => {
                    let null = Value::Null;
                    let old_sig = type_signature(resolve(self.from, old_param.get("schema").unwrap_or(&null)));
                    let new_sig = type_signature(resolve(self.to, new_param.get("schema").unwrap_or(&null)));
                    if old_sig != new_sig {
                        self.push(
                            ChangeCategory::Endpoint,
                            ChangeType::ParameterTypeChanged,
                            label,
                            at.clone(),
                            true,
                            format!(
                                "Parameter '{}' ({}) of {} changed type from {} to {}",
                                name,
                                location,
                                label,
                                describe_type(&old_sig),
                                describe_type(&new_sig)
                            ),
                        );
                    }

                    match (is_required(old_param), is_required(new_param)) {
                        (false, true) => self.push(
                            ChangeCategory::Endpoint,
                            ChangeType::ParameterRequiredChanged,
                            label,
                            at,
                            true,
                            format!("Parameter '{}' ({}) of {} became required", name, location, label),
                        ),
                        (true, false) => self.push(
                            ChangeCategory::Endpoint,
                            ChangeType::ParameterRequiredChanged,
                            label,
                            at,
                            false,
                            format!("Parameter '{}' ({}) of {} became optional", name, location, label),
                        ),
                        _ => {}
                    }
                }
                (None, None) => {}
            }
        }
    }

    fn responses_of(op: &'a Value) -> BTreeMap<&'a str, &'a Value> {
        op.get("responses")
            .and_then(Value::as_object)
            .map(|responses| responses.iter().map(|(code, r)| (code.as_str(), r)).collect())
            .unwrap_or_default()
    }

    fn responses(&mut self, label: &str, old_op: &'a Value, new_op: &'a Value) {
        let old = Self::responses_of(old_op);
        let new = Self::responses_of(new_op);
        let codes: BTreeSet<&str> = old.keys().chain(new.keys()).copied().collect();

        for code in codes {
            let success = code.starts_with('2');
            let at = Some(format!("responses.{}", code));
            match (old.get(code).copied(), new.get(code).copied()) {
                (Some(_), None) => self.push(
                    ChangeCategory::Endpoint,
                    ChangeType::ResponseRemoved,
                    label,
                    at,
                    success,
                    format!("Response {} was removed from {}", code, label),
                ),
                (None, Some(_)) => self.push(
                    ChangeCategory::Endpoint,
                    ChangeType::ResponseAdded,
                    label,
                    at,
                    false,
                    format!("Response {} was added to {}", code, label),
                ),
                (Some(old_resp), Some(new_resp)) if success => {
                    self.response_fields(label, code, old_resp, new_resp);
                }
                _ => {}
            }
        }
    }

    /// Body schema of a response: JSON media type if present, otherwise the first one
    fn response_schema(doc: &'a Value, response: &'a Value) -> Option<&'a Value> {
        let response = resolve(doc, response);
        let content = response.get("content")?.as_object()?;
        let media = content
            .get("application/json")
            .or_else(|| content.values().next())?;
        let mut schema = resolve(doc, media.get("schema")?);
        if schema.get("type").and_then(Value::as_str) == Some("array") {
            if let Some(items) = schema.get("items") {
                schema = resolve(doc, items);
            }
        }
        Some(schema)
    }

    fn response_fields(&mut self, label: &str, code: &str, old_resp: &'a Value, new_resp: &'a Value) {
        let (Some(old_schema), Some(new_schema)) = (
            Self::response_schema(self.from, old_resp),
            Self::response_schema(self.to, new_resp),
        ) else {
            return;
        };
        // A dangling ref is reported once, as the removed schema
        if old_schema.get("$ref").is_some() || new_schema.get("$ref").is_some() {
            return;
        }
        let empty = Map::new();
        let old_props = properties(old_schema).unwrap_or(&empty);
        let new_props = properties(new_schema).unwrap_or(&empty);

        for field in required_set(old_schema) {
            if !new_props.contains_key(field) {
                self.push(
                    ChangeCategory::Endpoint,
                    ChangeType::ResponseFieldRemoved,
                    label,
                    Some(format!("responses.{}.{}", code, field)),
                    true,
                    format!("Required field '{}' was removed from the {} response of {}", field, code, label),
                );
            }
        }
        for field in new_props.keys().filter(|f| !old_props.contains_key(*f)) {
            self.push(
                ChangeCategory::Endpoint,
                ChangeType::ResponseFieldAdded,
                label,
                Some(format!("responses.{}.{}", code, field)),
                false,
                format!("Field '{}' was added to the {} response of {}", field, code, label),
            );
        }
    }

    // --- Schemas ---

    fn schemas(&mut self) {
        let empty = Map::new();
        let old = component_map(self.from, "schemas").unwrap_or(&empty);
        let new = component_map(self.to, "schemas").unwrap_or(&empty);
        let names: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
        let new_refs = ReferenceIndex::build(self.to);

        for name in names {
            match (old.get(name), new.get(name)) {
                (None, Some(_)) => self.push(
                    ChangeCategory::Schema,
                    ChangeType::SchemaAdded,
                    name,
                    None,
                    false,
                    format!("Schema '{}' was added", name),
                ),
                (Some(_), None) => {
                    let reference = format!("{}schemas/{}", COMPONENTS_PREFIX, name);
                    let uses = new_refs.locations(&reference).len();
                    let description = if uses > 0 {
                        format!("Schema '{}' was removed but is still referenced in {} place(s)", name, uses)
                    } else {
                        format!("Schema '{}' was removed (no remaining references)", name)
                    };
                    self.push(
                        ChangeCategory::Schema,
                        ChangeType::SchemaRemoved,
                        name,
                        None,
                        uses > 0,
                        description,
                    );
                }
                (Some(old_schema), Some(new_schema)) if old_schema != new_schema => {
                    let before = self.changes.len();
                    self.schema(name, old_schema, new_schema, "");
                    if self.changes.len() == before {
                        self.push(
                            ChangeCategory::Schema,
                            ChangeType::SchemaModified,
                            name,
                            None,
                            false,
                            format!("Schema '{}' was modified", name),
                        );
                    }
                }
                _ => {}
            }
        }
    }

    fn schema(&mut self, name: &str, old: &Value, new: &Value, path: &str) {
        let old_sig = type_signature(old);
        let new_sig = type_signature(new);
        if old_sig != new_sig {
            let subject = if path.is_empty() {
                format!("Schema '{}'", name)
            } else {
                format!("Property '{}' of schema '{}'", path, name)
            };
            self.push(
                ChangeCategory::Schema,
                ChangeType::TypeChanged,
                name,
                Some(join_path(path, "type")),
                true,
                format!(
                    "{} changed type from {} to {}",
                    subject,
                    describe_type(&old_sig),
                    describe_type(&new_sig)
                ),
            );
            return;
        }

        self.schema_properties(name, old, new, path);
        self.schema_enum(name, old, new, path);

        if let (Some(old_items), Some(new_items)) = (old.get("items"), new.get("items")) {
            if old_items != new_items {
                self.schema(name, old_items, new_items, &join_path(path, "items"));
            }
        }
    }

    fn schema_properties(&mut self, name: &str, old: &Value, new: &Value, path: &str) {
        let empty = Map::new();
        let old_props = properties(old).unwrap_or(&empty);
        let new_props = properties(new).unwrap_or(&empty);
        let old_required = required_set(old);
        let new_required = required_set(new);

        for (prop, old_prop) in old_props {
            let prop_path = join_path(path, &format!("properties.{}", prop));
            let was_required = old_required.contains(prop.as_str());
            let is_required = new_required.contains(prop.as_str());

            let Some(new_prop) = new_props.get(prop) else {
                self.push(
                    ChangeCategory::Schema,
                    ChangeType::FieldRemoved,
                    name,
                    Some(prop_path),
                    was_required,
                    format!(
                        "{} property '{}' was removed from schema '{}'",
                        if was_required { "Required" } else { "Optional" },
                        prop,
                        name
                    ),
                );
                continue;
            };

            match (was_required, is_required) {
                (true, false) => self.push(
                    ChangeCategory::Schema,
                    ChangeType::OptionalityChanged,
                    name,
                    Some(prop_path.clone()),
                    false,
                    format!("Property '{}' of schema '{}' is no longer required", prop, name),
                ),
                (false, true) => self.push(
                    ChangeCategory::Schema,
                    ChangeType::OptionalityChanged,
                    name,
                    Some(prop_path.clone()),
                    true,
                    format!("Property '{}' of schema '{}' became required", prop, name),
                ),
                _ => {}
            }

            if old_prop != new_prop {
                self.schema(name, old_prop, new_prop, &prop_path);
            }
        }

        for (prop, _) in new_props.iter().filter(|(p, _)| !old_props.contains_key(*p)) {
            let required = new_required.contains(prop.as_str());
            self.push(
                ChangeCategory::Schema,
                ChangeType::FieldAdded,
                name,
                Some(join_path(path, &format!("properties.{}", prop))),
                required,
                if required {
                    format!("Required property '{}' was added to schema '{}'", prop, name)
                } else {
                    format!("Optional property '{}' was added to schema '{}'", prop, name)
                },
            );
        }
    }

    fn schema_enum(&mut self, name: &str, old: &Value, new: &Value, path: &str) {
        let (Some(old_values), Some(new_values)) = (
            old.get("enum").and_then(Value::as_array),
            new.get("enum").and_then(Value::as_array),
        ) else {
            return;
        };
        let enum_path = Some(join_path(path, "enum"));

        for removed in old_values.iter().filter(|v| !new_values.contains(v)) {
            self.push(
                ChangeCategory::Schema,
                ChangeType::EnumValueRemoved,
                name,
                enum_path.clone(),
                true,
                format!("Enum value {} was removed from schema '{}'", removed, name),
            );
        }
        for added in new_values.iter().filter(|v| !old_values.contains(v)) {
            self.push(
                ChangeCategory::Schema,
                ChangeType::EnumValueAdded,
                name,
                enum_path.clone(),
                false,
                format!("Enum value {} was added to schema '{}'", added, name),
            );
        }
    }

    // --- Security ---

    fn security(&mut self) {
        let empty = Map::new();
        let old = component_map(self.from, "securitySchemes").unwrap_or(&empty);
        let new = component_map(self.to, "securitySchemes").unwrap_or(&empty);
        let names: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
        let still_used = scheme_names(self.to);

        for name in names {
            match (old.get(name), new.get(name)) {
                (Some(_), None) => {
                    let used = still_used.contains(name.as_str());
                    self.push(
                        ChangeCategory::Security,
                        ChangeType::SecuritySchemeRemoved,
                        name,
                        None,
                        used,
                        if used {
                            format!("Security scheme '{}' was removed but is still required", name)
                        } else {
                            format!("Security scheme '{}' was removed", name)
                        },
                    );
                }
                (None, Some(_)) => self.push(
                    ChangeCategory::Security,
                    ChangeType::SecuritySchemeAdded,
                    name,
                    None,
                    false,
                    format!("Security scheme '{}' was added", name),
                ),
                _ => {}
            }
        }

        let old_global = self.from.get("security");
        let new_global = self.to.get("security");
        if old_global != new_global {
            let tightened = requirements_tightened(&requirements(old_global), &requirements(new_global));
            self.push(
                ChangeCategory::Security,
                ChangeType::SecurityRequirementChanged,
                "security",
                None,
                tightened,
                if tightened {
                    "Global security now requires schemes or scopes that were not required before".to_string()
                } else {
                    "Global security requirements changed".to_string()
                },
            );
        }

        let old_ops = endpoint_map(self.from);
        let new_ops = endpoint_map(self.to);
        for (key, old_op) in &old_ops {
            let (path, method) = *key;
            let Some(new_op) = new_ops.get(key) else {
                continue;
            };
            let (old_sec, new_sec) = (old_op.get("security"), new_op.get("security"));
            if old_sec == new_sec {
                continue;
            }
            let label = endpoint_label(path, method);
            let tightened = requirements_tightened(
                &requirements(old_sec.or(old_global)),
                &requirements(new_sec.or(new_global)),
            );
            self.push(
                ChangeCategory::Security,
                ChangeType::SecurityRequirementChanged,
                &label,
                Some("security".to_string()),
                tightened,
                if tightened {
                    format!("{} now requires schemes or scopes that were not required before", label)
                } else {
                    format!("Security requirements of {} changed", label)
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> Value {
        json!({
            "openapi": "3.0.3",
            "info": { "title": "Widgets", "version": "1.0.0" },
            "paths": {
                "/widgets": {
                    "get": {
                        "parameters": [
                            { "name": "limit", "in": "query", "schema": { "type": "integer", "format": "int32" } }
                        ],
                        "responses": {
                            "200": {
                                "description": "ok",
                                "content": {
                                    "application/json": {
                                        "schema": { "type": "array", "items": { "$ref": "#/components/schemas/Widget" } }
                                    }
                                }
                            }
                        }
                    }
                }
            },
            "components": {
                "schemas": {
                    "Widget": {
                        "type": "object",
                        "required": ["id"],
                        "properties": {
                            "id": { "type": "string" },
                            "status": { "type": "string", "enum": ["active", "retired"] }
                        }
                    }
                }
            }
        })
    }

    fn types(changes: &[Change]) -> Vec<ChangeType> {
        changes.iter().map(|c| c.change_type).collect()
    }

    #[test]
    fn test_self_diff_is_empty() {
        let doc = base();
        let result = diff_documents(&doc, &doc);
        assert!(result.is_empty());
        assert_eq!(result.summary, DiffSummary::default());
    }

    #[test]
    fn test_new_required_parameter_is_breaking() {
        let old = base();
        let mut new = base();
        new["paths"]["/widgets"]["get"]["parameters"]
            .as_array_mut()
            .unwrap()
            .push(json!({ "name": "tenant", "in": "header", "required": true, "schema": { "type": "string" } }));

        let result = diff_documents(&old, &new);
        assert_eq!(types(&result.breaking), vec![ChangeType::ParameterAdded]);
        assert_eq!(result.breaking[0].target, "GET /widgets");
        assert_eq!(result.summary.endpoints_modified, 1);
    }

    #[test]
    fn test_parameter_type_and_optionality() {
        let mut old = base();
        old["paths"]["/widgets"]["get"]["parameters"][0]["required"] = json!(true);
        let mut new = base();
        new["paths"]["/widgets"]["get"]["parameters"][0]["schema"]["format"] = json!("int64");

        let result = diff_documents(&old, &new);
        assert_eq!(types(&result.breaking), vec![ChangeType::ParameterTypeChanged]);
        assert_eq!(types(&result.non_breaking), vec![ChangeType::ParameterRequiredChanged]);
        assert!(result.breaking[0].description.contains("integer (int32) to integer (int64)"));
    }

    #[test]
    fn test_removed_required_response_field() {
        let old = base();
        let mut new = base();
        new["paths"]["/widgets"]["get"]["responses"]["200"]["content"]["application/json"]["schema"]["items"] = json!({
            "type": "object",
            "properties": { "name": { "type": "string" } }
        });

        let result = diff_documents(&old, &new);
        assert_eq!(types(&result.breaking), vec![ChangeType::ResponseFieldRemoved]);
        assert_eq!(result.breaking[0].path.as_deref(), Some("responses.200.id"));
        assert_eq!(types(&result.non_breaking), vec![ChangeType::ResponseFieldAdded]);
    }

    #[test]
    fn test_enum_changes() {
        let old = base();
        let mut new = base();
        new["components"]["schemas"]["Widget"]["properties"]["status"]["enum"] = json!(["active", "archived"]);

        let result = diff_documents(&old, &new);
        assert_eq!(types(&result.breaking), vec![ChangeType::EnumValueRemoved]);
        assert_eq!(types(&result.non_breaking), vec![ChangeType::EnumValueAdded]);
        assert_eq!(result.breaking[0].path.as_deref(), Some("properties.status.enum"));
        assert_eq!(result.changes_summary().schemas_modified, vec!["Widget".to_string()]);
    }

    #[test]
    fn test_removed_schema_breaking_only_when_referenced() {
        let mut old = base();
        old["components"]["schemas"]["Gadget"] = json!({ "type": "object" });
        let new = base();
        let result = diff_documents(&old, &new);
        assert!(!result.has_breaking_changes());
        assert_eq!(types(&result.non_breaking), vec![ChangeType::SchemaRemoved]);

        let old = base();
        let mut new = base();
        new["components"]["schemas"].as_object_mut().unwrap().remove("Widget");
        let result = diff_documents(&old, &new);
        assert_eq!(types(&result.breaking), vec![ChangeType::SchemaRemoved]);
        assert!(result.breaking[0].description.contains("still referenced in 1 place"));
    }

    #[test]
    fn test_property_type_change_is_breaking() {
        let old = base();
        let mut new = base();
        new["components"]["schemas"]["Widget"]["properties"]["id"] = json!({ "type": "integer" });
        let result = diff_documents(&old, &new);
        assert_eq!(types(&result.breaking), vec![ChangeType::TypeChanged]);
        assert_eq!(result.breaking[0].path.as_deref(), Some("properties.id.type"));
    }

    #[test]
    fn test_security_scheme_removal() {
        let mut old = base();
        old["components"]["securitySchemes"] = json!({
            "apiKey": { "type": "apiKey", "in": "header", "name": "X-Key" },
            "legacy": { "type": "http", "scheme": "basic" }
        });
        old["security"] = json!([{ "apiKey": [] }]);

        let mut new = old.clone();
        new["components"]["securitySchemes"].as_object_mut().unwrap().remove("apiKey");
        new["components"]["securitySchemes"].as_object_mut().unwrap().remove("legacy");

        let result = diff_documents(&old, &new);
        assert_eq!(result.breaking.len(), 1);
        assert_eq!(result.breaking[0].target, "apiKey");
        assert_eq!(result.non_breaking[0].target, "legacy");
        assert_eq!(result.summary.security_changes, 2);
    }

    #[test]
    fn test_global_security_tightening() {
        let old = base();
        let mut new = base();
        new["security"] = json!([{ "oauth": ["read"] }]);
        let result = diff_documents(&old, &new);
        assert_eq!(types(&result.breaking), vec![ChangeType::SecurityRequirementChanged]);

        // Dropping a scope, or adding an alternative, loosens
        let mut old = base();
        old["security"] = json!([{ "oauth": ["read", "write"] }]);
        let mut new = base();
        new["security"] = json!([{ "oauth": ["read"] }, { "apiKey": [] }]);
        let result = diff_documents(&old, &new);
        assert!(!result.has_breaking_changes());
        assert_eq!(result.non_breaking.len(), 1);
    }

    #[test]
    fn test_operation_security_override() {
        let mut old = base();
        old["security"] = json!([{ "oauth": ["read"] }]);
        let mut new = old.clone();
        new["paths"]["/widgets"]["get"]["security"] = json!([{ "oauth": ["read", "admin"] }]);

        let result = diff_documents(&old, &new);
        let security: Vec<_> = result
            .breaking
            .iter()
            .filter(|c| c.category == ChangeCategory::Security)
            .collect();
        assert_eq!(security.len(), 1);
        assert_eq!(security[0].target, "GET /widgets");
        // The endpoint itself is also reported as modified
        assert_eq!(types(&result.non_breaking), vec![ChangeType::OperationModified]);
    }

    /// `GET /widgets` whose parameter and response are both component refs
    fn referenced() -> Value {
        let mut doc = base();
        doc["paths"]["/widgets"]["get"]["parameters"] = json!([{ "$ref": "#/components/parameters/Limit" }]);
        doc["paths"]["/widgets"]["get"]["responses"]["200"] = json!({ "$ref": "#/components/responses/WidgetList" });
        doc["components"]["parameters"] = json!({
            "Limit": { "name": "limit", "in": "query", "schema": { "type": "integer" } }
        });
        doc["components"]["responses"] = json!({
            "WidgetList": {
                "description": "ok",
                "content": {
                    "application/json": {
                        "schema": {
                            "type": "object",
                            "required": ["id"],
                            "properties": { "id": { "type": "string" }, "name": { "type": "string" } }
                        }
                    }
                }
            }
        });
        doc
    }

    #[test]
    fn test_referenced_parameter_type_change() {
        let old = referenced();
        let mut new = referenced();
        new["components"]["parameters"]["Limit"]["schema"]["type"] = json!("string");

        let result = diff_documents(&old, &new);
        assert_eq!(types(&result.breaking), vec![ChangeType::ParameterTypeChanged]);
        assert_eq!(result.breaking[0].target, "GET /widgets");
        assert_eq!(result.breaking[0].path.as_deref(), Some("parameters.query.limit"));
        assert!(result.non_breaking.is_empty());
    }

    #[test]
    fn test_referenced_response_loses_required_field() {
        let old = referenced();
        let mut new = referenced();
        let body = &mut new["components"]["responses"]["WidgetList"]["content"]["application/json"]["schema"];
        body["required"] = json!([]);
        body["properties"].as_object_mut().unwrap().remove("id");

        let result = diff_documents(&old, &new);
        assert_eq!(types(&result.breaking), vec![ChangeType::ResponseFieldRemoved]);
        assert_eq!(result.breaking[0].path.as_deref(), Some("responses.200.id"));
        assert_eq!(result.summary.endpoints_modified, 1);
    }

    #[test]
    fn test_referenced_self_diff_is_empty() {
        let doc = referenced();
        assert!(diff_documents(&doc, &doc).is_empty());
    }

    #[test]
    fn test_removed_required_parameter_is_breaking() {
        let mut old = base();
        old["paths"]["/widgets"]["get"]["parameters"]
            .as_array_mut()
            .unwrap()
            .push(json!({ "name": "tenant", "in": "header", "required": true, "schema": { "type": "string" } }));
        let new = base();

        let result = diff_documents(&old, &new);
        assert_eq!(types(&result.breaking), vec![ChangeType::ParameterRemoved]);
        assert_eq!(result.breaking[0].path.as_deref(), Some("parameters.header.tenant"));

        // The optional one is not
        let result = diff_documents(&base(), &{
            let mut doc = base();
            doc["paths"]["/widgets"]["get"]["parameters"] = json!([]);
            doc
        });
        assert!(!result.has_breaking_changes());
        assert_eq!(types(&result.non_breaking), vec![ChangeType::ParameterRemoved]);
    }

    #[test]
    fn test_removed_required_schema_property_is_breaking() {
        let old = base();
        let mut new = base();
        new["components"]["schemas"]["Widget"]["properties"]
            .as_object_mut()
            .unwrap()
            .remove("id");

        let result = diff_documents(&old, &new);
        let schema: Vec<_> = result
            .breaking
            .iter()
            .filter(|c| c.category == ChangeCategory::Schema)
            .collect();
        assert_eq!(schema.len(), 1);
        assert_eq!(schema[0].change_type, ChangeType::FieldRemoved);
        assert_eq!(schema[0].target, "Widget");
        // Visible through the list response as well
        assert!(result
            .breaking
            .iter()
            .any(|c| c.change_type == ChangeType::ResponseFieldRemoved && c.target == "GET /widgets"));
    }

    #[test]
    fn test_removed_success_response_is_breaking() {
        let mut old = base();
        old["paths"]["/widgets"]["get"]["responses"]["404"] = json!({ "description": "missing" });
        let mut new = base();
        new["paths"]["/widgets"]["get"]["responses"]
            .as_object_mut()
            .unwrap()
            .remove("200");

        let result = diff_documents(&old, &new);
        assert_eq!(types(&result.breaking), vec![ChangeType::ResponseRemoved]);
        assert_eq!(result.breaking[0].path.as_deref(), Some("responses.200"));
        assert_eq!(types(&result.non_breaking), vec![ChangeType::ResponseRemoved]);
        assert_eq!(result.non_breaking[0].path.as_deref(), Some("responses.404"));
    }

    #[test]
    fn test_security_scheme_added_is_non_breaking() {
        let old = base();
        let mut new = base();
        new["components"]["securitySchemes"] = json!({
            "apiKey": { "type": "apiKey", "in": "header", "name": "X-Key" }
        });

        let result = diff_documents(&old, &new);
        assert!(!result.has_breaking_changes());
        assert_eq!(types(&result.non_breaking), vec![ChangeType::SecuritySchemeAdded]);
        assert_eq!(result.non_breaking[0].target, "apiKey");
    }

    #[test]
    fn test_operation_security_loosening_is_non_breaking() {
        let mut old = base();
        old["security"] = json!([{ "oauth": ["read"] }]);
        old["paths"]["/widgets"]["get"]["security"] = json!([{ "oauth": ["read", "admin"] }]);
        let mut new = old.clone();
        new["paths"]["/widgets"]["get"]["security"] = json!([{ "oauth": ["read"] }, {}]);

        let result = diff_documents(&old, &new);
        assert!(!result.has_breaking_changes(), "{:?}", result.breaking);
        let security: Vec<_> = result
            .non_breaking
            .iter()
            .filter(|c| c.category == ChangeCategory::Security)
            .collect();
        assert_eq!(security.len(), 1);
        assert_eq!(security[0].target, "GET /widgets");
    }

    #[test]
    fn test_strict_mode() {
        let old = base();
        let mut new = base();
        new["components"]["schemas"]["Extra"] = json!({ "type": "string" });
        let result = DiffEngine::new().strict().diff(&old, &new);
        assert_eq!(types(&result.breaking), vec![ChangeType::SchemaAdded]);
    }

    #[test]
    fn test_ordering_endpoints_then_schemas() {
        let old = base();
        let mut new = base();
        new["paths"]["/accounts"] = json!({ "post": { "responses": {} }, "delete": { "responses": {} } });
        new["components"]["schemas"]["Account"] = json!({ "type": "object" });
        let result = diff_documents(&old, &new);
        let targets: Vec<_> = result.non_breaking.iter().map(|c| c.target.as_str()).collect();
        assert_eq!(targets, vec!["DELETE /accounts", "POST /accounts", "Account"]);
    }
}
