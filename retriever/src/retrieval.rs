//! The stub retrieval facade.
//!
//! [`StubRetriever`] runs resolve, fetch and unpack for each requested
//! coordinate and collects one [`RetrievalResult`] per distinct coordinate.
//! Coordinates are processed in parallel; a failure for one coordinate is
//! recorded in its result and never affects the others. Only an unusable
//! settings model aborts a whole call.

use crate::cancel::CancellationToken;
use crate::credentials::{CredentialStore, SettingsCredentialStore};
use crate::dirs::{BaseDirs, DirsError, default_unpack_root};
use crate::fetcher::{ArtifactFetcher, FetchError, FetchOutcome};
use crate::policy::ResolutionPolicy;
use crate::resolver::{CoordinateResolver, ResolutionError};
use crate::settings::{SettingsError, SettingsSource};
use crate::transport::{HttpTransport, RepositoryTransport};
use crate::unpack::{ArchiveUnpacker, UnpackError, UnpackedStub};
use camino::Utf8PathBuf;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use stubrun_common::Coordinate;

/// Why one coordinate could not be retrieved.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// The version could not be resolved.
    #[error(transparent)]
    Resolution(ResolutionError),

    /// The artifact could not be fetched.
    #[error(transparent)]
    Fetch(FetchError),

    /// The artifact could not be unpacked.
    #[error(transparent)]
    Unpack(UnpackError),

    /// The caller cancelled the retrieval.
    #[error("retrieval cancelled")]
    Cancelled,
}

impl From<ResolutionError> for RetrievalError {
    fn from(err: ResolutionError) -> Self {
        Self::Resolution(err)
    }
}

impl From<FetchError> for RetrievalError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Cancelled => Self::Cancelled,
            other => Self::Fetch(other),
        }
    }
}

impl From<UnpackError> for RetrievalError {
    fn from(err: UnpackError) -> Self {
        match err {
            UnpackError::Cancelled => Self::Cancelled,
            other => Self::Unpack(other),
        }
    }
}

/// Errors that abort a whole [`StubRetriever::retrieve`] call.
#[derive(Debug, thiserror::Error)]
pub enum RetrieveError {
    /// The settings model could not be loaded.
    #[error("failed to load settings")]
    Settings(#[from] SettingsError),

    /// Default directories could not be determined.
    #[error(transparent)]
    Dirs(#[from] DirsError),
}

/// What happened to one coordinate.
#[derive(Debug)]
pub enum RetrievalOutcome {
    /// The stub was unpacked.
    Found(UnpackedStub),
    /// No consulted location holds the stub.
    NotFound,
    /// Retrieval failed.
    Error(RetrievalError),
}

impl RetrievalOutcome {
    /// Return the unpacked stub when found.
    #[must_use]
    pub fn found(&self) -> Option<&UnpackedStub> {
        match self {
            Self::Found(stub) => Some(stub),
            Self::NotFound | Self::Error(_) => None,
        }
    }

    /// Return true when no location holds the stub.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Return the failure, if any.
    #[must_use]
    pub fn error(&self) -> Option<&RetrievalError> {
        match self {
            Self::Error(err) => Some(err),
            Self::Found(_) | Self::NotFound => None,
        }
    }
}

/// The result for one requested coordinate.
#[derive(Debug)]
pub struct RetrievalResult {
    /// The coordinate as requested.
    pub coordinate: Coordinate,
    /// What happened to it.
    pub outcome: RetrievalOutcome,
}

/// Results keyed by requested coordinate, in coordinate order.
#[derive(Debug, Default)]
pub struct RetrievalReport {
    results: BTreeMap<Coordinate, RetrievalResult>,
}

impl RetrievalReport {
    /// Return the result for `coordinate`.
    #[must_use]
    pub fn get(&self, coordinate: &Coordinate) -> Option<&RetrievalResult> {
        self.results.get(coordinate)
    }

    /// Iterate over results in coordinate order.
    pub fn iter(&self) -> impl Iterator<Item = &RetrievalResult> {
        self.results.values()
    }

    /// Iterate over the stubs that were found.
    pub fn found(&self) -> impl Iterator<Item = &UnpackedStub> {
        self.iter().filter_map(|result| result.outcome.found())
    }

    /// Return the number of distinct coordinates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Return true when no coordinates were requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

impl IntoIterator for RetrievalReport {
    type Item = RetrievalResult;
    type IntoIter = std::collections::btree_map::IntoValues<Coordinate, RetrievalResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_values()
    }
}

/// Resolves, fetches and unpacks stubs.
pub struct StubRetriever {
    credentials: Arc<dyn CredentialStore>,
    transport: Arc<dyn RepositoryTransport>,
    unpacker: ArchiveUnpacker,
}

impl std::fmt::Debug for StubRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubRetriever")
            .field("unpacker", &self.unpacker)
            .finish_non_exhaustive()
    }
}

impl StubRetriever {
    /// Create a retriever using the HTTP transport and unpacking beneath
    /// `unpack_root`.
    #[must_use]
    pub fn new(credentials: Arc<dyn CredentialStore>, unpack_root: impl Into<Utf8PathBuf>) -> Self {
        Self::with_components(
            credentials,
            Arc::new(HttpTransport),
            ArchiveUnpacker::new(unpack_root),
        )
    }

    /// Create a retriever from explicit collaborators.
    #[must_use]
    pub fn with_components(
        credentials: Arc<dyn CredentialStore>,
        transport: Arc<dyn RepositoryTransport>,
        unpacker: ArchiveUnpacker,
    ) -> Self {
        Self {
            credentials,
            transport,
            unpacker,
        }
    }

    /// Create a retriever reading settings from the environment and
    /// unpacking into the platform cache directory.
    ///
    /// # Errors
    ///
    /// Returns [`RetrieveError`] when the default directories cannot be
    /// determined.
    pub fn from_environment(dirs: &dyn BaseDirs) -> Result<Self, RetrieveError> {
        let source = SettingsSource::from_env(dirs)?;
        let unpack_root = default_unpack_root(dirs)?;
        Ok(Self::new(
            Arc::new(SettingsCredentialStore::new(source)),
            unpack_root,
        ))
    }

    /// Retrieve every distinct coordinate in `coordinates`.
    ///
    /// # Errors
    ///
    /// Returns [`RetrieveError::Settings`] when the settings model cannot
    /// be loaded. Per-coordinate failures are reported in the result.
    pub fn retrieve(
        &self,
        coordinates: &[Coordinate],
        policy: &ResolutionPolicy,
    ) -> Result<RetrievalReport, RetrieveError> {
        self.retrieve_cancellable(coordinates, policy, &CancellationToken::new())
    }

    /// Retrieve every distinct coordinate in `coordinates`, stopping
    /// outstanding work once `cancel` is triggered.
    ///
    /// Each call takes its own token, so cancelling one batch leaves other
    /// and later batches untouched.
    ///
    /// # Errors
    ///
    /// Returns [`RetrieveError::Settings`] when the settings model cannot
    /// be loaded.
    pub fn retrieve_cancellable(
        &self,
        coordinates: &[Coordinate],
        policy: &ResolutionPolicy,
        cancel: &CancellationToken,
    ) -> Result<RetrievalReport, RetrieveError> {
        self.credentials.ensure_loaded()?;
        let mut unique: Vec<&Coordinate> = coordinates.iter().collect();
        unique.sort();
        unique.dedup();
        let results = unique
            .par_iter()
            .map(|coordinate| {
                let result = self.retrieve_one_cancellable(coordinate, policy, cancel);
                ((*coordinate).clone(), result)
            })
            .collect::<BTreeMap<_, _>>();
        Ok(RetrievalReport { results })
    }

    /// Retrieve a single coordinate.
    #[must_use]
    pub fn retrieve_one(
        &self,
        coordinate: &Coordinate,
        policy: &ResolutionPolicy,
    ) -> RetrievalResult {
        self.retrieve_one_cancellable(coordinate, policy, &CancellationToken::new())
    }

    fn retrieve_one_cancellable(
        &self,
        coordinate: &Coordinate,
        policy: &ResolutionPolicy,
        cancel: &CancellationToken,
    ) -> RetrievalResult {
        let outcome = match self.run(coordinate, policy, cancel) {
            Ok(Some(stub)) => RetrievalOutcome::Found(stub),
            Ok(None) => RetrievalOutcome::NotFound,
            Err(RetrievalError::Resolution(ResolutionError::NoCandidateVersion { .. })) => {
                log::debug!("no version of {coordinate} is available");
                RetrievalOutcome::NotFound
            }
            Err(e) => {
                log::warn!("failed to retrieve {coordinate}: {e}");
                RetrievalOutcome::Error(e)
            }
        };
        RetrievalResult {
            coordinate: coordinate.clone(),
            outcome,
        }
    }

    fn run(
        &self,
        coordinate: &Coordinate,
        policy: &ResolutionPolicy,
        cancel: &CancellationToken,
    ) -> Result<Option<UnpackedStub>, RetrievalError> {
        if cancel.is_cancelled() {
            return Err(RetrievalError::Cancelled);
        }
        let transport = self.transport.as_ref();
        let credentials = self.credentials.as_ref();
        let resolved = CoordinateResolver::new(transport, credentials).resolve(coordinate, policy)?;
        let fetched = ArtifactFetcher::new(transport, credentials).fetch_cancellable(
            &resolved,
            policy,
            cancel,
        )?;
        let FetchOutcome::Found(artifact) = fetched else {
            log::debug!("{resolved} was not found");
            return Ok(None);
        };
        let stub = self
            .unpacker
            .unpack_cancellable(&artifact.bytes, &resolved, cancel)?;
        Ok(Some(stub))
    }
}
