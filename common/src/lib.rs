//! Shared domain types for stubrun: artifact coordinates, version ordering
//! and requests, and the repository and unpack directory layouts.
//!
//! # Modules
//!
//! - [`coordinate`] - Validated `group:artifact:version[:classifier]` values
//! - [`error`] - Validation errors for coordinates and version requests
//! - [`layout`] - Repository and unpack path derivation
//! - [`version`] - Version ordering and floating version requests

pub mod coordinate;
pub mod error;
pub mod layout;
pub mod version;

pub use coordinate::Coordinate;
pub use error::{CoordinateError, VersionRangeError};
pub use layout::{ARTIFACT_EXTENSION, RepoPath};
pub use version::{Version, VersionRange, VersionRequest};
