//! Content fingerprints for unpacked archives.
//!
//! A fingerprint is the lowercase hex SHA-256 of the archive bytes. The
//! unpacker records it in a marker file inside each unpacked directory and
//! reuses the directory only while the fingerprint still matches.

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io;

/// Expected length of a hex-encoded SHA-256 digest.
const DIGEST_HEX_LEN: usize = 64;

/// Name of the marker file written inside every unpacked directory.
pub const MARKER_FILE: &str = ".stubrun-unpack.json";

/// Error returned when a string is not a valid SHA-256 hex digest.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid SHA-256 digest: {reason}")]
pub struct InvalidDigest {
    /// Description of the problem.
    pub reason: String,
}

/// A validated hex-encoded SHA-256 digest string.
///
/// # Examples
///
/// ```
/// use stubrun_retriever::unpack::fingerprint::Sha256Digest;
///
/// let digest = Sha256Digest::of(b"abc");
/// assert_eq!(
///     digest.as_str(),
///     "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sha256Digest(String);

impl Sha256Digest {
    /// Compute the digest of `bytes`.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(bytes)))
    }

    /// Return the digest as a hex string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Sha256Digest {
    type Error = InvalidDigest;

    fn try_from(value: &str) -> Result<Self, InvalidDigest> {
        validate_sha256(value)?;
        Ok(Self(value.to_owned()))
    }
}

impl TryFrom<String> for Sha256Digest {
    type Error = InvalidDigest;

    fn try_from(value: String) -> Result<Self, InvalidDigest> {
        validate_sha256(&value)?;
        Ok(Self(value))
    }
}

impl From<Sha256Digest> for String {
    fn from(value: Sha256Digest) -> Self {
        value.0
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn validate_sha256(value: &str) -> Result<(), InvalidDigest> {
    if value.len() != DIGEST_HEX_LEN {
        return Err(InvalidDigest {
            reason: format!(
                "expected {DIGEST_HEX_LEN} hex characters, got {}",
                value.len()
            ),
        });
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !c.is_ascii_hexdigit() || c.is_ascii_uppercase())
    {
        return Err(InvalidDigest {
            reason: format!("unexpected character '{bad}'"),
        });
    }
    Ok(())
}

/// Contents of the marker file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnpackMarker {
    /// The coordinate the directory was unpacked from.
    pub coordinate: String,
    /// Fingerprint of the archive bytes.
    pub sha256: Sha256Digest,
}

impl UnpackMarker {
    /// Read the marker in `dir`.
    ///
    /// Returns `None` when the marker is missing or unreadable, which the
    /// unpacker treats as "needs unpacking".
    #[must_use]
    pub fn read(dir: &Utf8Path) -> Option<Self> {
        let raw = std::fs::read(dir.join(MARKER_FILE)).ok()?;
        match serde_json::from_slice(&raw) {
            Ok(marker) => Some(marker),
            Err(e) => {
                log::debug!("ignoring unreadable unpack marker in {dir}: {e}");
                None
            }
        }
    }

    /// Write the marker into `dir`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the file cannot be written.
    pub fn write(&self, dir: &Utf8Path) -> io::Result<()> {
        let body = serde_json::to_vec_pretty(self).map_err(io::Error::other)?;
        std::fs::write(dir.join(MARKER_FILE), body)
    }
}
