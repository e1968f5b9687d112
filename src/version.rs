//! API identifiers, version tags and version records

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::checksum::Checksum;
use crate::diff::ChangesSummary;
use crate::document::{DocumentStats, ValidationSnapshot};
use crate::error::{RegistryError, Result};

fn api_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9-]+$").expect("valid api id regex"))
}

fn semantic_tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^v(\d+)\.(\d+)\.(\d+)$").expect("valid semantic tag regex"))
}

fn timestamp_tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^v(\d{8})-(\d{6})$").expect("valid timestamp tag regex"))
}

/// Identifier of an API in the registry (lowercase alphanumerics and hyphens)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ApiId(String);

impl ApiId {
    pub fn parse(value: &str) -> Result<Self> {
        if value.is_empty() {
            return Err(RegistryError::invalid("api id", value, "must not be empty"));
        }
        if !api_id_pattern().is_match(value) {
            return Err(RegistryError::invalid(
                "api id",
                value,
                "only lowercase letters, digits and hyphens are allowed",
            ));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApiId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ApiId {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ApiId {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ApiId> for String {
    fn from(id: ApiId) -> Self {
        id.0
    }
}

/// The two accepted spellings of a version tag
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TagForm {
    /// `v<major>.<minor>.<patch>`
    Semantic(Version),
    /// `v<YYYYMMDD>-<HHMMSS>`
    Timestamp { date: String, time: String },
}

/// A validated version tag.
///
/// Tags are ordered by creation in the registry, never by comparing them, so
/// this type deliberately does not implement `Ord`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionTag {
    raw: String,
    form: TagForm,
}

impl VersionTag {
    pub fn parse(value: &str) -> Result<Self> {
        if let Some(caps) = semantic_tag_pattern().captures(value) {
            let number = |i: usize| -> Result<u64> {
                caps[i].parse::<u64>().map_err(|e| {
                    RegistryError::invalid("version tag", value, format!("component out of range: {}", e))
                })
            };
            let version = Version::new(number(1)?, number(2)?, number(3)?);
            return Ok(Self {
                raw: value.to_string(),
                form: TagForm::Semantic(version),
            });
        }

        if let Some(caps) = timestamp_tag_pattern().captures(value) {
            return Ok(Self {
                raw: value.to_string(),
                form: TagForm::Timestamp {
                    date: caps[1].to_string(),
                    time: caps[2].to_string(),
                },
            });
        }

        Err(RegistryError::invalid(
            "version tag",
            value,
            "expected v<major>.<minor>.<patch> or v<YYYYMMDD>-<HHMMSS>",
        ))
    }

    /// A timestamp tag for the current UTC time
    pub fn timestamp_now() -> Self {
        let now = Utc::now();
        let date = now.format("%Y%m%d").to_string();
        let time = now.format("%H%M%S").to_string();
        Self {
            raw: format!("v{}-{}", date, time),
            form: TagForm::Timestamp { date, time },
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn form(&self) -> &TagForm {
        &self.form
    }

    pub fn is_semantic(&self) -> bool {
        matches!(self.form, TagForm::Semantic(_))
    }

    /// Canonical key used for storage paths.
    ///
    /// `v01.2.3` and `v1.2.3` share the key `v1.2.3`, so they cannot coexist.
    pub fn storage_key(&self) -> String {
        match &self.form {
            TagForm::Semantic(version) => format!("v{}", version),
            TagForm::Timestamp { date, time } => format!("v{}-{}", date, time),
        }
    }
}

impl PartialEq for VersionTag {
    fn eq(&self, other: &Self) -> bool {
        self.storage_key() == other.storage_key()
    }
}

impl Eq for VersionTag {}

impl std::hash::Hash for VersionTag {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.storage_key().hash(state);
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for VersionTag {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VersionTag {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<VersionTag> for String {
    fn from(tag: VersionTag) -> Self {
        tag.raw
    }
}

/// Metadata for a single stored version of an API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: VersionTag,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    /// Version this one was derived from; `None` only for an API's first version
    pub parent_version: Option<VersionTag>,
    #[serde(default)]
    pub description: String,
    /// Diff against the parent, computed once at creation
    pub changes: ChangesSummary,
    pub validation: ValidationSnapshot,
    pub stats: DocumentStats,
    /// Checksum of the document as last written through the registry
    pub checksum: Checksum,
    pub updated_at: DateTime<Utc>,
}

/// Metadata for an API and its version list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRecord {
    pub api_id: ApiId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub current_version: VersionTag,
    /// All versions in creation order
    pub versions: Vec<VersionTag>,
    #[serde(default)]
    pub latest_stable: Option<VersionTag>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ApiRecord {
    pub fn contains(&self, tag: &VersionTag) -> bool {
        self.versions.iter().any(|v| v == tag)
    }

    pub fn is_current(&self, tag: &VersionTag) -> bool {
        &self.current_version == tag
    }

    /// Most recently created semantic tag
    pub(crate) fn recompute_latest_stable(&mut self) {
        self.latest_stable = self.versions.iter().rev().find(|v| v.is_semantic()).cloned();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_api_id_validation() {
        assert!(ApiId::parse("sample-api").is_ok());
        assert!(ApiId::parse("petstore2").is_ok());

        for bad in ["", "Sample", "my_api", "a b", "api/v1"] {
            let err = ApiId::parse(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn test_semantic_tag() {
        let tag = VersionTag::parse("v1.2.3").unwrap();
        assert!(tag.is_semantic());
        assert_eq!(tag.as_str(), "v1.2.3");
        assert_eq!(tag.storage_key(), "v1.2.3");
        match tag.form() {
            TagForm::Semantic(v) => assert_eq!(v, &Version::new(1, 2, 3)),
            other => panic!("Expected semantic form, got {:?}", other),
        }
    }

    #[test]
    fn test_timestamp_tag() {
        let tag = VersionTag::parse("v20240115-093000").unwrap();
        assert!(!tag.is_semantic());
        assert_eq!(tag.storage_key(), "v20240115-093000");

        let now = VersionTag::timestamp_now();
        assert!(VersionTag::parse(now.as_str()).is_ok());
    }

    #[test]
    fn test_tag_rejects_other_forms() {
        for bad in ["1.2.3", "v1.2", "v1.2.3-beta", "v2024-0101", "latest", ""] {
            assert!(VersionTag::parse(bad).is_err(), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn test_leading_zeros_share_storage_key() {
        let a = VersionTag::parse("v01.0.0").unwrap();
        let b = VersionTag::parse("v1.0.0").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "v01.0.0");
    }

    #[test]
    fn test_serde_roundtrip_validates() {
        let tag: VersionTag = serde_json::from_str("\"v2.0.0\"").unwrap();
        assert_eq!(tag.as_str(), "v2.0.0");
        assert!(serde_json::from_str::<VersionTag>("\"two\"").is_err());
        assert!(serde_json::from_str::<ApiId>("\"Nope\"").is_err());
    }
}
