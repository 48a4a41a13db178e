//! Artifact retrieval from the cache, bundle roots and remotes.
//!
//! Lookup order depends on the policy mode. Classpath mode reads bundle
//! roots only. Otherwise the local cache is read first when the policy
//! consults it, and in remote mode each repository is tried strictly in
//! order until one serves the artifact. A successful remote download is
//! written back to the cache through a temporary file and a rename.
//!
//! "Not found" is an ordinary outcome, not an error. Only a remote lookup in
//! which every location failed at the transport level is reported as
//! [`FetchError::AllLocationsFailed`].

use crate::cancel::CancellationToken;
use crate::credentials::{CredentialStore, credential_or_anonymous};
use crate::local::LocalRepository;
use crate::metadata::{SnapshotBuild, SnapshotMetadata};
use crate::policy::{RepositoryLocation, ResolutionPolicy, StubsMode};
use crate::transport::{DownloadError, RepositoryTransport};
use camino::Utf8Path;
use std::fmt;
use std::io::{self, Write};
use stubrun_common::Coordinate;
use stubrun_common::layout::{artifact_path, snapshot_metadata_path};
use stubrun_common::version::snapshot_build_of;
use tempfile::NamedTempFile;

/// Where fetched bytes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactSource {
    /// The local artifact cache.
    Cache,
    /// A bundled stub root.
    Bundle,
    /// A remote repository.
    Remote,
}

/// Artifact bytes and their origin.
#[derive(Clone, PartialEq, Eq)]
pub struct FetchedArtifact {
    /// The archive bytes.
    pub bytes: Vec<u8>,
    /// Where the bytes were found.
    pub source: ArtifactSource,
}

impl fmt::Debug for FetchedArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchedArtifact")
            .field("len", &self.bytes.len())
            .field("source", &self.source)
            .finish()
    }
}

/// Result of a fetch that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The artifact was found.
    Found(FetchedArtifact),
    /// No consulted location holds the artifact.
    NotFound,
}

/// One repository that could not be read.
#[derive(Debug)]
pub struct LocationFailure {
    /// The repository URI.
    pub uri: String,
    /// Why it failed.
    pub error: DownloadError,
}

/// Errors arising while fetching an artifact.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Every remote repository failed at the transport level.
    #[error("all {} repositories failed for {coordinate}: {}", failures.len(), summarize(failures))]
    AllLocationsFailed {
        /// The coordinate being fetched.
        coordinate: String,
        /// One entry per repository, in lookup order.
        failures: Vec<LocationFailure>,
    },

    /// The caller cancelled the fetch.
    #[error("fetch cancelled")]
    Cancelled,
}

fn summarize(failures: &[LocationFailure]) -> String {
    failures
        .iter()
        .map(|failure| format!("{} ({})", failure.uri, failure.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Fetches concrete coordinates according to a [`ResolutionPolicy`].
pub struct ArtifactFetcher<'a> {
    transport: &'a dyn RepositoryTransport,
    credentials: &'a dyn CredentialStore,
}

impl<'a> ArtifactFetcher<'a> {
    /// Create a fetcher downloading through `transport`.
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

    /// Fetch `coordinate` under `policy`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::AllLocationsFailed`] when every remote failed
    /// at the transport level.
    pub fn fetch(
        &self,
        coordinate: &Coordinate,
        policy: &ResolutionPolicy,
    ) -> Result<FetchOutcome, FetchError> {
        self.fetch_cancellable(coordinate, policy, &CancellationToken::new())
    }

    /// Fetch like [`ArtifactFetcher::fetch`], stopping between remotes when
    /// `cancel` fires.
    ///
    /// A request already in flight is not interrupted; it runs until it
    /// completes or hits the transport's request timeout. Its result is then
    /// discarded and nothing is written to the cache.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Cancelled`] when cancelled, otherwise as for
    /// [`ArtifactFetcher::fetch`].
    pub fn fetch_cancellable(
        &self,
        coordinate: &Coordinate,
        policy: &ResolutionPolicy,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, FetchError> {
        if policy.mode() == StubsMode::Classpath {
            return Ok(read_bundles(coordinate, policy));
        }
        let cached = policy
            .consults_local_cache()
            .then(|| read_local(&LocalRepository::new(policy.cache_root()), coordinate))
            .flatten();
        if let Some(bytes) = cached {
            log::debug!("found {coordinate} in local cache {}", policy.cache_root());
            return Ok(found(bytes, ArtifactSource::Cache));
        }
        if !policy.consults_remotes() {
            log::debug!("{coordinate} is not in the local cache and remotes are disabled");
            return Ok(FetchOutcome::NotFound);
        }
        self.fetch_remote(coordinate, policy, cancel)
    }

    fn fetch_remote(
        &self,
        coordinate: &Coordinate,
        policy: &ResolutionPolicy,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, FetchError> {
        let locations = policy.remote_locations();
        let mut failures = Vec::new();
        for location in locations {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            let downloaded = self.download(coordinate, location);
            if cancel.is_cancelled() {
                log::debug!("discarding response for {coordinate} from {location}: cancelled");
                return Err(FetchError::Cancelled);
            }
            match downloaded {
                Ok(bytes) => {
                    log::info!("downloaded {coordinate} from {location}");
                    store_in_cache(policy.cache_root(), coordinate, &bytes);
                    return Ok(found(bytes, ArtifactSource::Remote));
                }
                Err(e) if e.is_not_found() => {
                    log::debug!("{coordinate} not found at {location}");
                }
                Err(e) => {
                    log::warn!("failed to fetch {coordinate} from {location}: {e}");
                    failures.push(LocationFailure {
                        uri: location.uri().to_owned(),
                        error: e,
                    });
                }
            }
        }
        if !locations.is_empty() && failures.len() == locations.len() {
            return Err(FetchError::AllLocationsFailed {
                coordinate: coordinate.to_string(),
                failures,
            });
        }
        Ok(FetchOutcome::NotFound)
    }

    fn download(
        &self,
        coordinate: &Coordinate,
        location: &RepositoryLocation,
    ) -> Result<Vec<u8>, DownloadError> {
        let url = artifact_path(coordinate).to_url(location.uri());
        let credential = credential_or_anonymous(self.credentials, location.server_id());
        self.transport.get(&url, credential.as_ref())
    }
}

fn found(bytes: Vec<u8>, source: ArtifactSource) -> FetchOutcome {
    FetchOutcome::Found(FetchedArtifact { bytes, source })
}

fn read_local(repository: &LocalRepository<'_>, coordinate: &Coordinate) -> Option<Vec<u8>> {
    match repository.read(coordinate) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::warn!(
                "ignoring unreadable artifact {}: {e}",
                repository.artifact_file(coordinate)
            );
            None
        }
    }
}

fn read_bundles(coordinate: &Coordinate, policy: &ResolutionPolicy) -> FetchOutcome {
    policy
        .bundle_roots()
        .iter()
        .find_map(|root| read_local(&LocalRepository::new(root), coordinate))
        .map_or(FetchOutcome::NotFound, |bytes| {
            log::debug!("found {coordinate} in bundled stubs");
            found(bytes, ArtifactSource::Bundle)
        })
}

/// Write downloaded bytes into the cache. Failures only cost a re-download.
fn store_in_cache(cache_root: &Utf8Path, coordinate: &Coordinate, bytes: &[u8]) {
    let path = artifact_path(coordinate).under(cache_root);
    if let Err(e) = write_atomically(&path, bytes) {
        log::warn!("failed to cache {coordinate} at {path}: {e}");
        return;
    }
    if let Some((timestamp, build_number)) = snapshot_build_of(coordinate.version()) {
        let metadata = SnapshotMetadata {
            snapshot: Some(SnapshotBuild {
                timestamp: timestamp.to_owned(),
                build_number,
            }),
        };
        let metadata_path = snapshot_metadata_path(coordinate).under(cache_root);
        let written = serde_json::to_vec_pretty(&metadata)
            .map_err(io::Error::other)
            .and_then(|body| write_atomically(&metadata_path, &body));
        if let Err(e) = written {
            log::warn!("failed to record snapshot metadata at {metadata_path}: {e}");
        }
    }
}

fn write_atomically(path: &Utf8Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    std::fs::create_dir_all(parent)?;
    let mut file = NamedTempFile::new_in(parent)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
#[path = "fetcher_tests.rs"]
mod tests;
