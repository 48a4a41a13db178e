//! Coordinate resolution: floating and snapshot versions to concrete ones.
//!
//! Concrete versions pass through untouched without any I/O. Floating
//! requests (`latest`, `release`, ranges) enumerate the versions visible at
//! every location the policy consults and pick the highest acceptable one.
//! Snapshot markers are pinned to the newest timestamped build advertised
//! by snapshot metadata, falling back to the literal marker.
//!
//! The resolver only reads listings and metadata; it never downloads an
//! artifact body.

use crate::credentials::{CredentialStore, credential_or_anonymous};
use crate::local::{LocalRepository, pin_build};
use crate::metadata::{SnapshotBuild, parse_snapshot_metadata, parse_version_listing};
use crate::policy::{RepositoryLocation, ResolutionPolicy, StubsMode};
use crate::transport::RepositoryTransport;
use std::collections::BTreeSet;
use stubrun_common::layout::{snapshot_metadata_path, versions_metadata_path};
use stubrun_common::version::is_snapshot_marker;
use stubrun_common::{Coordinate, CoordinateError, Version, VersionRangeError, VersionRequest};

/// Errors arising while resolving a coordinate.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    /// The version field looks like a range but is malformed.
    #[error("invalid version request in {coordinate}")]
    InvalidRange {
        /// The coordinate as requested.
        coordinate: String,
        /// The range parse failure.
        #[source]
        source: VersionRangeError,
    },

    /// No visible version satisfies the request.
    #[error("no available version of {coordinate} satisfies the request")]
    NoCandidateVersion {
        /// The coordinate as requested.
        coordinate: Coordinate,
    },

    /// A resolved version cannot be used in a coordinate.
    #[error("resolved version {version} is invalid")]
    InvalidVersion {
        /// The rejected version.
        version: String,
        /// The validation failure.
        #[source]
        source: CoordinateError,
    },
}

/// Resolves requested coordinates to concrete ones.
pub struct CoordinateResolver<'a> {
    transport: &'a dyn RepositoryTransport,
    credentials: &'a dyn CredentialStore,
}

impl<'a> CoordinateResolver<'a> {
    /// Create a resolver reading remote metadata through `transport`.
    #[must_use]
    pub fn new(
        transport: &'a dyn RepositoryTransport,
        credentials: &'a dyn CredentialStore,
    ) -> Self {
        Self {
            transport,
            credentials,
        }
    }

    /// Resolve `coordinate` under `policy`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::NoCandidateVersion`] when a floating
    /// request matches nothing, and [`ResolutionError::InvalidRange`] for
    /// malformed ranges.
    pub fn resolve(
        &self,
        coordinate: &Coordinate,
        policy: &ResolutionPolicy,
    ) -> Result<Coordinate, ResolutionError> {
        let request = VersionRequest::parse(coordinate.version()).map_err(|source| {
            ResolutionError::InvalidRange {
                coordinate: coordinate.to_string(),
                source,
            }
        })?;
        match request {
            VersionRequest::Concrete(_) => Ok(coordinate.clone()),
            VersionRequest::Snapshot(_) => Ok(self.pin_snapshot(coordinate, policy)),
            floating => self.resolve_floating(coordinate, &floating, policy),
        }
    }

    fn resolve_floating(
        &self,
        coordinate: &Coordinate,
        request: &VersionRequest,
        policy: &ResolutionPolicy,
    ) -> Result<Coordinate, ResolutionError> {
        let best = self
            .candidate_versions(coordinate, policy)
            .iter()
            .map(|raw| Version::parse(raw))
            .filter(|version| request.accepts(version))
            .max()
            .ok_or_else(|| ResolutionError::NoCandidateVersion {
                coordinate: coordinate.clone(),
            })?;
        let resolved = coordinate.with_version(best.as_str()).map_err(|source| {
            ResolutionError::InvalidVersion {
                version: best.as_str().to_owned(),
                source,
            }
        })?;
        log::debug!("resolved {coordinate} to {resolved}");
        if is_snapshot_marker(best.as_str()) {
            return Ok(self.pin_snapshot(&resolved, policy));
        }
        Ok(resolved)
    }

    fn candidate_versions(
        &self,
        coordinate: &Coordinate,
        policy: &ResolutionPolicy,
    ) -> BTreeSet<String> {
        let mut versions = BTreeSet::new();
        if policy.mode() == StubsMode::Classpath {
            for root in policy.bundle_roots() {
                versions.extend(LocalRepository::new(root).versions(coordinate));
            }
            return versions;
        }
        if policy.consults_local_cache() {
            versions.extend(LocalRepository::new(policy.cache_root()).versions(coordinate));
        }
        if policy.consults_remotes() {
            for location in policy.remote_locations() {
                versions.extend(self.remote_versions(coordinate, location));
            }
        }
        versions
    }

    fn fetch_metadata(&self, url: &str, location: &RepositoryLocation) -> Option<Vec<u8>> {
        let credential = credential_or_anonymous(self.credentials, location.server_id());
        match self.transport.get(url, credential.as_ref()) {
            Ok(body) => Some(body),
            Err(e) if e.is_not_found() => {
                log::debug!("no metadata at {url}");
                None
            }
            Err(e) => {
                log::warn!("skipping repository {location}: {e}");
                None
            }
        }
    }

    fn remote_versions(
        &self,
        coordinate: &Coordinate,
        location: &RepositoryLocation,
    ) -> Vec<String> {
        let url = versions_metadata_path(coordinate.group(), coordinate.artifact())
            .to_url(location.uri());
        let Some(body) = self.fetch_metadata(&url, location) else {
            return Vec::new();
        };
        match parse_version_listing(&body) {
            Ok(listing) => listing
                .versions
                .into_iter()
                .filter(|version| coordinate.with_version(version.as_str()).is_ok())
                .collect(),
            Err(e) => {
                log::warn!("ignoring malformed version listing at {url}: {e}");
                Vec::new()
            }
        }
    }

    fn remote_snapshot(
        &self,
        coordinate: &Coordinate,
        location: &RepositoryLocation,
    ) -> Option<SnapshotBuild> {
        let url = snapshot_metadata_path(coordinate).to_url(location.uri());
        let body = self.fetch_metadata(&url, location)?;
        match parse_snapshot_metadata(&body) {
            Ok(metadata) => metadata.snapshot,
            Err(e) => {
                log::warn!("ignoring malformed snapshot metadata at {url}: {e}");
                None
            }
        }
    }

    fn pin_snapshot(&self, coordinate: &Coordinate, policy: &ResolutionPolicy) -> Coordinate {
        if policy.mode() == StubsMode::Classpath {
            return coordinate.clone();
        }
        let cache = LocalRepository::new(policy.cache_root());
        if policy.consults_local_cache() && cache.contains(coordinate) {
            log::debug!("using locally installed snapshot {coordinate}");
            return coordinate.clone();
        }
        if policy.consults_remotes() {
            for location in policy.remote_locations() {
                let pinned = self
                    .remote_snapshot(coordinate, location)
                    .and_then(|build| pin_build(coordinate, &build));
                if let Some(pinned) = pinned {
                    log::debug!("pinned {coordinate} to {pinned} from {location}");
                    return pinned;
                }
            }
        }
        policy
            .consults_local_cache()
            .then(|| cache.pinned_snapshot(coordinate))
            .flatten()
            .unwrap_or_else(|| coordinate.clone())
    }
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod tests;
