//! Version Registry
//!
//! Owns the lifecycle of APIs and their versions. Every piece of state lives
//! in a [`DocumentStore`]; the registry itself holds no cache, so several
//! registries over the same store see each other's writes.
//!
//! Storage layout (keys are relative to the store root):
//!
//! ```text
//! specs/{api}/metadata.json          ApiRecord
//! specs/{api}/{tag}/spec.{json,yaml} the document
//! specs/{api}/{tag}/version.json     VersionRecord
//! ```
//!
//! Mutations of an API's version list lock its metadata key. Anything that
//! writes or removes a version's files also locks its `version.json` key,
//! whatever the document format. Reads take no lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::audit::{AuditEvent, AuditRecord, AuditSink, FileAuditLog, NullAuditLog};
use crate::checksum::Checksum;
use crate::config::RegistryConfig;
use crate::diff::{ChangesSummary, DiffEngine, DiffResult};
use crate::document::{DocumentStats, SpecDocument, SpecFormat, ValidationSnapshot};
use crate::error::{RegistryError, Result};
use crate::lock::LockManager;
use crate::references::{rewrite_references, ComponentRef, RewriteResult};
use crate::store::{DocumentStore, FsStore};
use crate::version::{ApiId, ApiRecord, VersionRecord, VersionTag};

const SPECS_PREFIX: &str = "specs/";

/// Key of an API's metadata record
pub fn metadata_key(api: &ApiId) -> String {
    format!("{}{}/metadata.json", SPECS_PREFIX, api)
}

/// Key of a version's metadata record
pub fn version_key(api: &ApiId, tag: &VersionTag) -> String {
    format!("{}{}/{}/version.json", SPECS_PREFIX, api, tag.storage_key())
}

/// Key of a version's document in the given format
pub fn document_key(api: &ApiId, tag: &VersionTag, format: SpecFormat) -> String {
    format!("{}{}/{}/spec.{}", SPECS_PREFIX, api, tag.storage_key(), format.extension())
}

/// Where a new version's document comes from
#[derive(Debug, Clone)]
pub enum VersionSource {
    /// Deep copy of an existing version of the same API
    FromVersion(VersionTag),
    /// A document supplied by the caller
    Seed(SpecDocument),
}

/// Request to create a version
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub tag: VersionTag,
    pub description: String,
    pub source: VersionSource,
    pub author: Option<String>,
    pub rationale: Option<String>,
    /// Display name, used only when this creates the API
    pub api_name: Option<String>,
    /// Owner, used only when this creates the API
    pub owner: Option<String>,
    /// Stored format. Falls back to the registry's default format.
    pub format: Option<SpecFormat>,
}

impl NewVersion {
    pub fn seeded(tag: VersionTag, document: SpecDocument) -> Self {
        Self::with_source(tag, VersionSource::Seed(document))
    }

    pub fn copied_from(tag: VersionTag, source: VersionTag) -> Self {
        Self::with_source(tag, VersionSource::FromVersion(source))
    }

    fn with_source(tag: VersionTag, source: VersionSource) -> Self {
        Self {
            tag,
            description: String::new(),
            source,
            author: None,
            rationale: None,
            api_name: None,
            owner: None,
            format: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }

    pub fn api_name(mut self, name: impl Into<String>) -> Self {
        self.api_name = Some(name.into());
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn format(mut self, format: SpecFormat) -> Self {
        self.format = Some(format);
        self
    }
}

/// Fields of an [`ApiRecord`] a caller may change. `None` leaves a field as is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiMetadataUpdate {
    pub name: Option<String>,
    pub owner: Option<String>,
    pub tags: Option<Vec<String>>,
    pub description: Option<String>,
}

/// Outcome of checking a stored document against its recorded checksum
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub api_id: ApiId,
    pub version: VersionTag,
    pub expected: Checksum,
    pub actual: Checksum,
}

impl VerifyReport {
    pub fn is_intact(&self) -> bool {
        self.expected == self.actual
    }
}

/// Aggregate figures across every API in the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub apis: usize,
    pub versions: usize,
    pub endpoints: usize,
    pub schemas: usize,
    /// APIs whose current version failed validation at creation
    pub invalid_apis: usize,
    pub last_updated: Option<DateTime<Utc>>,
    /// APIs left out because their metadata could not be read
    pub skipped: Vec<String>,
}

/// Loading and saving documents of registered versions
pub trait SpecDocuments {
    fn load_document(&self, api: &ApiId, tag: &VersionTag) -> Result<SpecDocument>;

    /// Replace a version's document and refresh its checksum
    fn save_document(
        &self,
        api: &ApiId,
        tag: &VersionTag,
        document: &SpecDocument,
        actor: &str,
        rationale: Option<&str>,
    ) -> Result<VersionRecord>;
}

/// The registry context: store, locks and audit sink, passed explicitly
pub struct VersionRegistry {
    store: Arc<dyn DocumentStore>,
    locks: LockManager,
    audit: Arc<dyn AuditSink>,
    default_format: SpecFormat,
    default_actor: String,
}

impl VersionRegistry {
    pub fn new(store: Arc<dyn DocumentStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            store,
            locks: LockManager::default(),
            audit,
            default_format: SpecFormat::Json,
            default_actor: "spec-registry".to_string(),
        }
    }

    /// Open a filesystem-backed registry with default settings
    pub fn open(root: impl AsRef<std::path::Path>) -> Result<Self> {
        let root = root.as_ref();
        let store = FsStore::open(root)?;
        let audit = FileAuditLog::open(root.join("audit"))?;
        Ok(Self::new(Arc::new(store), Arc::new(audit)))
    }

    /// Build a registry from loaded configuration
    pub fn from_config(config: &RegistryConfig) -> Result<Self> {
        let store = FsStore::open(config.storage_root())?;
        let audit: Arc<dyn AuditSink> = if config.audit.enabled {
            Arc::new(FileAuditLog::open(config.audit_dir())?)
        } else {
            Arc::new(NullAuditLog)
        };

        tracing::debug!(root = %store.root().display(), audit = config.audit.enabled, "Opened registry");
        Ok(Self::new(Arc::new(store), audit)
            .with_locks(LockManager::new(config.locking.timeout(), config.locking.retries))
            .with_default_format(config.storage.default_format)
            .with_default_actor(config.defaults.actor.clone()))
    }

    pub fn with_locks(mut self, locks: LockManager) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_default_format(mut self, format: SpecFormat) -> Self {
        self.default_format = format;
        self
    }

    pub fn with_default_actor(mut self, actor: impl Into<String>) -> Self {
        self.default_actor = actor.into();
        self
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn default_format(&self) -> SpecFormat {
        self.default_format
    }

    pub fn default_actor(&self) -> &str {
        &self.default_actor
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// All API ids with a metadata record, sorted
    pub fn list_apis(&self) -> Result<Vec<ApiId>> {
        let mut apis = Vec::new();
        for key in self.store.list(SPECS_PREFIX)? {
            let Some(rest) = key.strip_prefix(SPECS_PREFIX) else {
                continue;
            };
            let Some(name) = rest.strip_suffix("/metadata.json") else {
                continue;
            };
            match ApiId::parse(name) {
                Ok(api) => apis.push(api),
                Err(e) => tracing::debug!(key = %key, error = %e, "Ignoring unrecognised metadata key"),
            }
        }
        Ok(apis)
    }

    pub fn get_api_metadata(&self, api: &ApiId) -> Result<ApiRecord> {
        self.read_api(api)?.ok_or_else(|| RegistryError::ApiNotFound {
            api: api.to_string(),
        })
    }

    /// Versions in creation order
    pub fn list_versions(&self, api: &ApiId) -> Result<Vec<VersionTag>> {
        Ok(self.get_api_metadata(api)?.versions)
    }

    pub fn get_version_metadata(&self, api: &ApiId, tag: &VersionTag) -> Result<VersionRecord> {
        let record = self.get_api_metadata(api)?;
        if !record.contains(tag) {
            return Err(RegistryError::version_not_found(api, tag));
        }
        self.read_json(&version_key(api, tag))?
            .ok_or_else(|| RegistryError::version_not_found(api, tag))
    }

    /// Structural diff between two stored versions
    pub fn calculate_diff(&self, api: &ApiId, from: &VersionTag, to: &VersionTag) -> Result<DiffResult> {
        let old = self.load_document(api, from)?;
        let new = self.load_document(api, to)?;
        let result = DiffEngine::new().diff(&old.content, &new.content);
        tracing::debug!(
            api = %api,
            from = %from,
            to = %to,
            breaking = result.breaking.len(),
            non_breaking = result.non_breaking.len(),
            "Calculated diff"
        );
        Ok(result)
    }

    /// Recompute a stored document's checksum and compare it to the recorded one
    pub fn verify_version(&self, api: &ApiId, tag: &VersionTag) -> Result<VerifyReport> {
        let record = self.get_version_metadata(api, tag)?;
        let (key, _) = self.locate_document(api, tag)?;
        let bytes = self.store.read(&key)?.ok_or_else(|| missing_document(&key))?;

        let report = VerifyReport {
            api_id: api.clone(),
            version: tag.clone(),
            actual: Checksum::from_bytes(&bytes),
            expected: record.checksum,
        };
        if !report.is_intact() {
            tracing::warn!(
                api = %api,
                version = %tag,
                expected = report.expected.short(),
                actual = report.actual.short(),
                "Checksum mismatch"
            );
        }
        Ok(report)
    }

    /// Audit records for one API, oldest first
    pub fn audit_trail(&self, api: &ApiId) -> Result<Vec<AuditRecord>> {
        self.audit.records_for(api)
    }

    /// Totals across all APIs. An API whose metadata cannot be read is logged
    /// and skipped rather than failing the whole aggregate.
    pub fn dashboard_stats(&self) -> Result<DashboardStats> {
        let mut stats = DashboardStats::default();

        for api in self.list_apis()? {
            let summary = self
                .get_api_metadata(&api)
                .and_then(|record| {
                    let current = self.get_version_metadata(&api, &record.current_version)?;
                    Ok((record, current))
                });
            let (record, current) = match summary {
                Ok(found) => found,
                Err(e) => {
                    tracing::warn!(api = %api, error = %e, "Skipping API in dashboard stats");
                    stats.skipped.push(api.to_string());
                    continue;
                }
            };

            stats.apis += 1;
            stats.versions += record.versions.len();
            stats.endpoints += current.stats.endpoints;
            stats.schemas += current.stats.schemas;
            if !current.validation.valid {
                stats.invalid_apis += 1;
            }
            stats.last_updated = stats.last_updated.max(Some(current.updated_at));
        }

        Ok(stats)
    }

    // ------------------------------------------------------------------
    // Version lifecycle
    // ------------------------------------------------------------------

    /// Create a version. The first version of an API creates the API and
    /// becomes current.
    pub fn create_version(&self, api: &ApiId, new: NewVersion) -> Result<VersionRecord> {
        let _guard = self.locks.acquire(&metadata_key(api))?;

        let existing = self.read_api(api)?;
        let tag = new.tag.clone();
        if existing.as_ref().is_some_and(|r| r.contains(&tag)) || self.store.exists(&version_key(api, &tag))? {
            return Err(RegistryError::VersionExists {
                api: api.to_string(),
                version: tag.to_string(),
            });
        }

        let (source_doc, parent) = match &new.source {
            VersionSource::FromVersion(source) => {
                if existing.is_none() {
                    return Err(RegistryError::ApiNotFound { api: api.to_string() });
                }
                let document = self.load_document(api, source)?;
                (document.clone(), Some((source.clone(), document)))
            }
            VersionSource::Seed(document) => {
                let parent = match &existing {
                    Some(record) => {
                        let current = record.current_version.clone();
                        let parent_doc = self.load_document(api, &current)?;
                        Some((current, parent_doc))
                    }
                    None => None,
                };
                (document.clone(), parent)
            }
        };
        let document = SpecDocument::new(source_doc.content, new.format.unwrap_or(self.default_format));
        require_mapping(&document.content)?;

        let changes = match &parent {
            Some((_, parent_doc)) => DiffEngine::new()
                .diff(&parent_doc.content, &document.content)
                .changes_summary(),
            None => ChangesSummary::default(),
        };

        let doc_key = document_key(api, &tag, document.format);
        let bytes = document.format.render(&document.content, &doc_key)?;
        let now = Utc::now();
        let actor = new.author.clone().unwrap_or_else(|| self.default_actor.clone());

        let record = VersionRecord {
            version: tag.clone(),
            created_at: now,
            created_by: actor.clone(),
            parent_version: parent.as_ref().map(|(p, _)| p.clone()),
            description: new.description.clone(),
            changes,
            validation: ValidationSnapshot::compute(&document.content),
            stats: DocumentStats::compute(&document.content),
            checksum: Checksum::from_bytes(&bytes),
            updated_at: now,
        };

        let mut api_record = match existing {
            Some(record) => record,
            None => ApiRecord {
                api_id: api.clone(),
                name: new.api_name.clone().unwrap_or_else(|| api.to_string()),
                created_at: now,
                current_version: tag.clone(),
                versions: Vec::new(),
                latest_stable: None,
                owner: new.owner.clone(),
                tags: Vec::new(),
                description: None,
            },
        };
        api_record.versions.push(tag.clone());
        api_record.recompute_latest_stable();

        {
            let _version_guard = self.locks.acquire(&version_key(api, &tag))?;
            self.store.write(&doc_key, &bytes)?;
            self.write_json(&version_key(api, &tag), &record)?;
        }
        // The metadata record is written last; until then the version is invisible
        self.write_json(&metadata_key(api), &api_record)?;

        tracing::info!(
            api = %api,
            version = %tag,
            parent = ?record.parent_version.as_ref().map(VersionTag::as_str),
            breaking = record.changes.breaking_changes.len(),
            "Created version"
        );

        let source = match &new.source {
            VersionSource::FromVersion(source) => json!({ "type": "copy", "from": source.as_str() }),
            VersionSource::Seed(_) => json!({ "type": "seed" }),
        };
        self.emit(
            AuditRecord::new(api, AuditEvent::VersionCreated, actor)
                .with_version(&tag)
                .with_rationale(new.rationale.as_deref())
                .with_details(json!({
                    "source": source,
                    "parent_version": record.parent_version.as_ref().map(VersionTag::as_str),
                    "checksum": record.checksum.as_str(),
                    "changes": record.changes,
                })),
        );

        Ok(record)
    }

    /// Point the API at `tag`. Setting the version that is already current
    /// changes nothing and records nothing.
    pub fn set_current_version(
        &self,
        api: &ApiId,
        tag: &VersionTag,
        actor: &str,
        rationale: Option<&str>,
    ) -> Result<ApiRecord> {
        let _guard = self.locks.acquire(&metadata_key(api))?;

        let mut record = self.get_api_metadata(api)?;
        if !record.contains(tag) {
            return Err(RegistryError::version_not_found(api, tag));
        }
        if record.is_current(tag) {
            tracing::debug!(api = %api, version = %tag, "Version already current");
            return Ok(record);
        }

        let previous = std::mem::replace(&mut record.current_version, tag.clone());
        self.write_json(&metadata_key(api), &record)?;

        tracing::info!(api = %api, from = %previous, to = %tag, "Changed current version");
        self.emit(
            AuditRecord::new(api, AuditEvent::CurrentVersionChanged, actor)
                .with_version(tag)
                .with_rationale(rationale)
                .with_details(json!({ "previous_version": previous.as_str() })),
        );

        Ok(record)
    }

    /// Remove a version. The current version and the last remaining version
    /// cannot be deleted.
    pub fn delete_version(
        &self,
        api: &ApiId,
        tag: &VersionTag,
        actor: &str,
        rationale: Option<&str>,
    ) -> Result<ApiRecord> {
        let _guard = self.locks.acquire(&metadata_key(api))?;

        let mut record = self.get_api_metadata(api)?;
        if !record.contains(tag) {
            return Err(RegistryError::version_not_found(api, tag));
        }
        let rejected = |reason: &str| RegistryError::DeleteRejected {
            api: api.to_string(),
            version: tag.to_string(),
            reason: reason.to_string(),
        };
        if record.versions.len() == 1 {
            return Err(rejected("it is the only version"));
        }
        if record.is_current(tag) {
            return Err(rejected("it is the current version"));
        }

        let _version_guard = self.locks.acquire(&version_key(api, tag))?;
        record.versions.retain(|v| v != tag);
        record.recompute_latest_stable();
        self.write_json(&metadata_key(api), &record)?;

        for format in [SpecFormat::Json, SpecFormat::Yaml] {
            self.store.delete(&document_key(api, tag, format))?;
        }
        self.store.delete(&version_key(api, tag))?;

        tracing::info!(api = %api, version = %tag, remaining = record.versions.len(), "Deleted version");
        self.emit(
            AuditRecord::new(api, AuditEvent::VersionDeleted, actor)
                .with_version(tag)
                .with_rationale(rationale)
                .with_details(json!({ "remaining_versions": record.versions.len() })),
        );

        Ok(record)
    }

    /// Change descriptive fields of an API record
    pub fn update_api_metadata(
        &self,
        api: &ApiId,
        update: ApiMetadataUpdate,
        actor: &str,
        rationale: Option<&str>,
    ) -> Result<ApiRecord> {
        if let Some(name) = &update.name {
            if name.trim().is_empty() {
                return Err(RegistryError::invalid("api name", name.as_str(), "must not be empty"));
            }
        }

        let _guard = self.locks.acquire(&metadata_key(api))?;
        let mut record = self.get_api_metadata(api)?;

        let mut changed = Vec::new();
        if let Some(name) = &update.name {
            if &record.name != name {
                record.name = name.clone();
                changed.push("name");
            }
        }
        if update.owner.is_some() && record.owner != update.owner {
            record.owner = update.owner.clone();
            changed.push("owner");
        }
        if let Some(tags) = &update.tags {
            if &record.tags != tags {
                record.tags = tags.clone();
                changed.push("tags");
            }
        }
        if update.description.is_some() && record.description != update.description {
            record.description = update.description.clone();
            changed.push("description");
        }

        if changed.is_empty() {
            return Ok(record);
        }
        self.write_json(&metadata_key(api), &record)?;

        tracing::info!(api = %api, fields = ?changed, "Updated API metadata");
        self.emit(
            AuditRecord::new(api, AuditEvent::ApiMetadataUpdated, actor)
                .with_rationale(rationale)
                .with_details(json!({ "fields": changed, "update": update })),
        );

        Ok(record)
    }

    // ------------------------------------------------------------------
    // Document edits
    // ------------------------------------------------------------------

    /// Replace every `$ref` equal to `old_ref` in a stored document.
    /// Nothing is written or recorded when no reference matches.
    pub fn rewrite_document_references(
        &self,
        api: &ApiId,
        tag: &VersionTag,
        old_ref: &str,
        new_ref: &str,
        actor: &str,
        rationale: Option<&str>,
    ) -> Result<RewriteResult> {
        let _guard = self.locks.acquire(&version_key(api, tag))?;

        let mut document = self.load_document(api, tag)?;
        let result = rewrite_references(&mut document.content, old_ref, new_ref)?;
        if result.count == 0 {
            return Ok(result);
        }
        self.persist_document(api, tag, &document)?;

        tracing::info!(api = %api, version = %tag, old_ref, new_ref, count = result.count, "Rewrote references");
        self.emit(
            AuditRecord::new(api, AuditEvent::ReferencesUpdated, actor)
                .with_version(tag)
                .with_rationale(rationale)
                .with_details(json!({
                    "old_ref": old_ref,
                    "new_ref": new_ref,
                    "count": result.count,
                    "locations": result.locations.iter().map(ToString::to_string).collect::<Vec<_>>(),
                })),
        );

        Ok(result)
    }

    /// Rename a component and repoint every reference to it, as one locked edit
    #[allow(clippy::too_many_arguments)]
    pub fn rename_component(
        &self,
        api: &ApiId,
        tag: &VersionTag,
        kind: &str,
        old_name: &str,
        new_name: &str,
        actor: &str,
        rationale: Option<&str>,
    ) -> Result<RewriteResult> {
        let old_ref = ComponentRef::canonical(kind, old_name)?;
        let new_ref = ComponentRef::canonical(kind, new_name)?;

        let _guard = self.locks.acquire(&version_key(api, tag))?;
        let mut document = self.load_document(api, tag)?;

        let definitions = document
            .content
            .get_mut("components")
            .and_then(|c| c.get_mut(kind))
            .and_then(Value::as_object_mut)
            .ok_or_else(|| RegistryError::ComponentNotFound {
                kind: kind.to_string(),
                name: old_name.to_string(),
            })?;
        if definitions.contains_key(new_name) {
            return Err(RegistryError::ComponentExists {
                kind: kind.to_string(),
                name: new_name.to_string(),
            });
        }
        let definition = definitions
            .remove(old_name)
            .ok_or_else(|| RegistryError::ComponentNotFound {
                kind: kind.to_string(),
                name: old_name.to_string(),
            })?;
        definitions.insert(new_name.to_string(), definition);

        let result = rewrite_references(&mut document.content, &old_ref, &new_ref)?;
        self.persist_document(api, tag, &document)?;

        tracing::info!(api = %api, version = %tag, kind, old_name, new_name, references = result.count, "Renamed component");
        self.emit(
            AuditRecord::new(api, AuditEvent::ComponentRenamed, actor)
                .with_version(tag)
                .with_rationale(rationale)
                .with_details(json!({
                    "kind": kind,
                    "from": old_name,
                    "to": new_name,
                    "references": result.count,
                })),
        );

        Ok(result)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn read_api(&self, api: &ApiId) -> Result<Option<ApiRecord>> {
        self.read_json(&metadata_key(api))
    }

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.read(key)? {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|source| RegistryError::Json {
                    operation: "parse",
                    path: key.to_string(),
                    source,
                }),
        }
    }

    fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| RegistryError::Json {
            operation: "serialize",
            path: key.to_string(),
            source,
        })?;
        self.store.write(key, &bytes)
    }

    /// Storage key and format of a registered version's document
    fn locate_document(&self, api: &ApiId, tag: &VersionTag) -> Result<(String, SpecFormat)> {
        let record = self.get_api_metadata(api)?;
        if !record.contains(tag) {
            return Err(RegistryError::version_not_found(api, tag));
        }
        for format in [SpecFormat::Json, SpecFormat::Yaml] {
            let key = document_key(api, tag, format);
            if self.store.exists(&key)? {
                return Ok((key, format));
            }
        }
        Err(missing_document(&format!("{}{}/{}/spec.*", SPECS_PREFIX, api, tag.storage_key())))
    }

    /// Write a document and refresh its version record, without auditing.
    /// Callers hold the version lock.
    fn persist_document(&self, api: &ApiId, tag: &VersionTag, document: &SpecDocument) -> Result<VersionRecord> {
        require_mapping(&document.content)?;

        let (old_key, old_format) = self.locate_document(api, tag)?;
        let mut record: VersionRecord = self
            .read_json(&version_key(api, tag))?
            .ok_or_else(|| RegistryError::version_not_found(api, tag))?;

        let key = document_key(api, tag, document.format);
        let bytes = document.format.render(&document.content, &key)?;
        self.store.write(&key, &bytes)?;
        if old_format != document.format {
            self.store.delete(&old_key)?;
        }

        record.checksum = Checksum::from_bytes(&bytes);
        record.updated_at = Utc::now();
        self.write_json(&version_key(api, tag), &record)?;
        Ok(record)
    }

    fn emit(&self, record: AuditRecord) {
        if let Err(e) = self.audit.append(&record) {
            tracing::error!(
                api = %record.api_id,
                event = %record.event,
                error = %e,
                "Failed to append audit record"
            );
        }
    }
}

impl SpecDocuments for VersionRegistry {
    fn load_document(&self, api: &ApiId, tag: &VersionTag) -> Result<SpecDocument> {
        let (key, format) = self.locate_document(api, tag)?;
        let bytes = self.store.read(&key)?.ok_or_else(|| missing_document(&key))?;
        let content = format.parse(&bytes, &key)?;
        Ok(SpecDocument::new(content, format))
    }

    fn save_document(
        &self,
        api: &ApiId,
        tag: &VersionTag,
        document: &SpecDocument,
        actor: &str,
        rationale: Option<&str>,
    ) -> Result<VersionRecord> {
        let _guard = self.locks.acquire(&version_key(api, tag))?;

        let record = self.persist_document(api, tag, document)?;

        tracing::info!(api = %api, version = %tag, checksum = record.checksum.short(), "Saved document");
        self.emit(
            AuditRecord::new(api, AuditEvent::DocumentSaved, actor)
                .with_version(tag)
                .with_rationale(rationale)
                .with_details(json!({
                    "format": document.format,
                    "checksum": record.checksum.as_str(),
                })),
        );

        Ok(record)
    }
}

fn require_mapping(content: &Value) -> Result<()> {
    if content.is_object() {
        Ok(())
    } else {
        Err(RegistryError::invalid(
            "document",
            describe_root(content),
            "a specification document must be a mapping",
        ))
    }
}

fn describe_root(content: &Value) -> &'static str {
    match content {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn missing_document(key: &str) -> RegistryError {
    RegistryError::Corrupt {
        path: key.to_string(),
        reason: "version is registered but its document is missing".to_string(),
    }
}
