//! Repository metadata documents.
//!
//! Two JSON documents describe a repository's contents:
//!
//! - `<group path>/<artifact>/metadata.json` lists available versions:
//!   `{"versions": ["1.0.0", "1.1.0"]}`
//! - `<group path>/<artifact>/<base version>/metadata.json` pins the latest
//!   build of a snapshot:
//!   `{"snapshot": {"timestamp": "20240102.030405", "build_number": 7}}`

use serde::{Deserialize, Serialize};

/// Version listing for one artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionListing {
    /// Published versions in no particular order.
    #[serde(default)]
    pub versions: Vec<String>,
}

/// Snapshot metadata for one snapshot base version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Latest timestamped build, absent for locally installed snapshots.
    #[serde(default)]
    pub snapshot: Option<SnapshotBuild>,
}

/// One timestamped snapshot build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotBuild {
    /// Build timestamp in `yyyyMMdd.HHmmss` form.
    pub timestamp: String,
    /// Monotonic build number.
    pub build_number: u64,
}

/// Parse a version listing.
///
/// # Errors
///
/// Returns the JSON error when the document is malformed.
pub fn parse_version_listing(raw: &[u8]) -> Result<VersionListing, serde_json::Error> {
    serde_json::from_slice(raw)
}

/// Parse snapshot metadata.
///
/// # Errors
///
/// Returns the JSON error when the document is malformed.
pub fn parse_snapshot_metadata(raw: &[u8]) -> Result<SnapshotMetadata, serde_json::Error> {
    serde_json::from_slice(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_listing() {
        let listing = parse_version_listing(br#"{"versions":["1.0","1.1"]}"#).expect("parse");
        assert_eq!(listing.versions, ["1.0", "1.1"]);
    }

    #[test]
    fn missing_listing_field_is_empty() {
        let listing = parse_version_listing(b"{}").expect("parse");
        assert!(listing.versions.is_empty());
    }

    #[test]
    fn parses_snapshot_build() {
        let metadata = parse_snapshot_metadata(
            br#"{"snapshot":{"timestamp":"20240102.030405","build_number":7}}"#,
        )
        .expect("parse");
        assert_eq!(
            metadata.snapshot,
            Some(SnapshotBuild {
                timestamp: "20240102.030405".to_owned(),
                build_number: 7,
            })
        );
    }

    #[test]
    fn rejects_malformed_documents() {
        assert!(parse_version_listing(b"[").is_err());
        assert!(parse_snapshot_metadata(br#"{"snapshot":{"timestamp":1}}"#).is_err());
    }
}
