//! Stub artifact resolution, retrieval and unpacking.
//!
//! Given a set of coordinates and a [`ResolutionPolicy`], the
//! [`StubRetriever`] resolves floating and snapshot versions, fetches each
//! artifact from the local cache, bundled stub roots or remote repositories,
//! and unpacks it into a deterministic directory that later runs reuse.
//! "Not found" is reported as data; one missing stub never fails the rest.
//!
//! # Modules
//!
//! - [`cancel`] - Cooperative cancellation handle
//! - [`credentials`] - Per-server credentials resolved from settings
//! - [`dirs`] - Directory resolution abstraction for platform-specific paths
//! - [`fetcher`] - Cache, bundle and remote artifact lookup
//! - [`local`] - Read access to directories in repository layout
//! - [`messaging`] - Relay of stub messages to named destinations
//! - [`metadata`] - Repository version listings and snapshot metadata
//! - [`policy`] - Resolution modes, repository locations and policy config
//! - [`resolver`] - Floating and snapshot version resolution
//! - [`retrieval`] - The retrieval facade
//! - [`settings`] - Layered settings files and password encryption
//! - [`transport`] - HTTP and `file://` repository reads
//! - [`unpack`] - Idempotent, concurrency-safe archive unpacking
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use stubrun_common::Coordinate;
//! use stubrun_retriever::credentials::SettingsCredentialStore;
//! use stubrun_retriever::dirs::SystemBaseDirs;
//! use stubrun_retriever::policy::{PolicyConfig, ResolutionPolicy};
//! use stubrun_retriever::settings::SettingsSource;
//! use stubrun_retriever::StubRetriever;
//!
//! let dirs = SystemBaseDirs::new().expect("home directory");
//! let source = SettingsSource::from_env(&dirs).expect("settings paths");
//! let store = SettingsCredentialStore::new(source);
//! let config = PolicyConfig::from_toml(
//!     r#"
//! mode = "remote"
//! [[remotes]]
//! uri = "https://repo.example.com/stubs"
//! server_id = "my-server"
//! "#,
//! )
//! .expect("policy config");
//! let policy =
//!     ResolutionPolicy::from_config(config, store.settings().ok(), &dirs).expect("policy");
//!
//! let retriever = StubRetriever::new(Arc::new(store), "/tmp/stubs");
//! let wanted: Coordinate = "org.example:bookService:+:stubs".parse().expect("coordinate");
//! let report = retriever.retrieve(&[wanted], &policy).expect("settings load");
//! for stub in report.found() {
//!     println!("{} -> {}", stub.coordinate, stub.directory);
//! }
//! ```

pub mod cancel;
pub mod credentials;
pub mod dirs;
pub mod fetcher;
pub mod local;
pub mod messaging;
pub mod metadata;
pub mod policy;
pub mod resolver;
pub mod retrieval;
pub mod settings;
pub mod transport;
pub mod unpack;

#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;

pub use cancel::CancellationToken;
pub use credentials::{Credential, CredentialError, CredentialStore, SettingsCredentialStore};
pub use fetcher::{ArtifactFetcher, FetchError, FetchOutcome};
pub use policy::{RepositoryLocation, ResolutionPolicy, StubsMode};
pub use resolver::{CoordinateResolver, ResolutionError};
pub use retrieval::{
    RetrievalError, RetrievalOutcome, RetrievalReport, RetrievalResult, RetrieveError,
    StubRetriever,
};
pub use unpack::{ArchiveUnpacker, UnpackError, UnpackedStub};
