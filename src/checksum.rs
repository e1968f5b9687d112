//! Checksums for stored specification documents

use sha2::{Digest, Sha256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// SHA256 checksum of a stored document's bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Verify that stored bytes match this checksum
    pub fn verify(&self, data: &[u8]) -> bool {
        Self::from_bytes(data) == *self
    }

    /// First 12 characters, for log lines and CLI output
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(12) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_consistency() {
        let content = br#"{"openapi": "3.0.3"}"#;
        assert_eq!(Checksum::from_bytes(content), Checksum::from_bytes(content));
    }

    #[test]
    fn test_checksum_verification() {
        let checksum = Checksum::from_bytes(b"paths: {}");
        assert!(checksum.verify(b"paths: {}"));
        assert!(!checksum.verify(b"paths: []"));
        assert_eq!(checksum.short().len(), 12);
    }

    #[test]
    fn test_short_form_of_stored_checksum() {
        let stored: Checksum = serde_json::from_str("\"ééééééééééééééé\"").unwrap();
        assert_eq!(stored.short(), "éééééééééééé");

        let short: Checksum = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(short.short(), "abc");
    }
}
