//! Error types for the spec registry

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Stable error kind reported to callers alongside the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    LockTimeout,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Validation => "validation",
            ErrorKind::LockTimeout => "lock_timeout",
            ErrorKind::Storage => "storage",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Spec registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("API not found: {api}")]
    ApiNotFound { api: String },

    #[error("Version not found: {api} {version}")]
    VersionNotFound { api: String, version: String },

    #[error("Component not found: {kind}/{name}")]
    ComponentNotFound { kind: String, name: String },

    #[error("Version already exists: {api} {version}")]
    VersionExists { api: String, version: String },

    #[error("Cannot delete {version} of {api}: {reason}")]
    DeleteRejected {
        api: String,
        version: String,
        reason: String,
    },

    #[error("Component already exists: {kind}/{name}")]
    ComponentExists { kind: String, name: String },

    #[error("Invalid {field}: '{value}' ({reason})")]
    Invalid {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Timed out acquiring lock on {path} after {waited_ms}ms")]
    LockTimeout { path: String, waited_ms: u64 },

    #[error("Storage error during {operation} on {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to {operation} JSON at {path}: {source}")]
    Json {
        operation: &'static str,
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to {operation} YAML at {path}: {source}")]
    Yaml {
        operation: &'static str,
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Stored document {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },
}

impl RegistryError {
    /// The stable kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::ApiNotFound { .. }
            | RegistryError::VersionNotFound { .. }
            | RegistryError::ComponentNotFound { .. } => ErrorKind::NotFound,
            RegistryError::VersionExists { .. }
            | RegistryError::DeleteRejected { .. }
            | RegistryError::ComponentExists { .. } => ErrorKind::Conflict,
            RegistryError::Invalid { .. } => ErrorKind::Validation,
            RegistryError::LockTimeout { .. } => ErrorKind::LockTimeout,
            RegistryError::Io { .. }
            | RegistryError::Json { .. }
            | RegistryError::Yaml { .. }
            | RegistryError::Corrupt { .. } => ErrorKind::Storage,
        }
    }

    /// Only lock contention is transient; everything else is surfaced as-is.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::LockTimeout
    }

    pub(crate) fn invalid(field: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        RegistryError::Invalid {
            field,
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RegistryError::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn version_not_found(api: impl fmt::Display, version: impl fmt::Display) -> Self {
        RegistryError::VersionNotFound {
            api: api.to_string(),
            version: version.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        let err = RegistryError::ApiNotFound { api: "pets".into() };
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!err.is_retryable());

        let err = RegistryError::LockTimeout {
            path: "specs/pets/metadata.json".into(),
            waited_ms: 5000,
        };
        assert_eq!(err.kind(), ErrorKind::LockTimeout);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("specs/pets/metadata.json"));
    }

    #[test]
    fn test_invalid_message_names_field() {
        let err = RegistryError::invalid("api id", "Bad_Id", "must be lowercase");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.to_string(), "Invalid api id: 'Bad_Id' (must be lowercase)");
    }
}
