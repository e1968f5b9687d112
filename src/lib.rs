//! API Spec Registry
//!
//! Versioned storage, structural diffing and `$ref` integrity for OpenAPI
//! specification documents.
//!
//! ## Features
//!
//! - **Version Lifecycle**: create, copy, promote and retire versions of an API
//! - **Breaking Change Detection**: endpoint, schema and security diffs classified as breaking or not
//! - **Reference Integrity**: find, validate and rewrite `$ref` pointers anywhere in a document
//! - **Checksum Validation**: SHA256 checksums detect edits made outside the registry
//! - **Audit Trail**: one append-only record per mutation
//!
//! ## Architecture
//!
//! ```text
//! <storage root>/
//! ├── specs/
//! │   └── sample-api/
//! │       ├── metadata.json
//! │       ├── v1.0.0/
//! │       │   ├── spec.json
//! │       │   └── version.json
//! │       └── v2.0.0/
//! │           ├── spec.yaml
//! │           └── version.json
//! └── audit/
//!     └── sample-api.jsonl
//! ```

pub mod audit;
pub mod checksum;
pub mod config;
pub mod diff;
pub mod document;
pub mod error;
pub mod lock;
pub mod references;
pub mod registry;
pub mod store;
pub mod version;

pub use audit::{AuditEvent, AuditRecord, AuditSink, FileAuditLog, MemoryAuditLog};
pub use checksum::Checksum;
pub use config::RegistryConfig;
pub use diff::{diff_documents, Change, ChangesSummary, DiffEngine, DiffResult, Severity};
pub use document::{SpecDocument, SpecFormat};
pub use error::{ErrorKind, RegistryError, Result};
pub use lock::{LockGuard, LockManager};
pub use references::{find_usages, rewrite_references, validate_references, ReferenceIndex, ReferenceReport};
pub use registry::{NewVersion, SpecDocuments, VersionRegistry, VersionSource};
pub use store::{DocumentStore, FsStore, MemoryStore};
pub use version::{ApiId, ApiRecord, VersionRecord, VersionTag};
