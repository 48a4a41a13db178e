//! Repository transport.
//!
//! Provides a trait-based abstraction for reading artifacts and metadata
//! from remote locations, enabling dependency injection for testing. The
//! production [`HttpTransport`] serves `http(s)://` URLs with `ureq` and
//! `file://` URLs from the filesystem.

use crate::credentials::Credential;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::io;
use std::sync::OnceLock;
use std::time::Duration;

/// Network timeout for repository requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on the size of a single response body.
const MAX_BODY_BYTES: u64 = 512 * 1024 * 1024;

/// Errors arising from repository reads.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// The location does not hold the requested resource (404 or 410).
    #[error("not found: {url}")]
    NotFound {
        /// The URL that was requested.
        url: String,
    },

    /// The request failed for any other reason.
    #[error("request for {url} failed: {reason}")]
    HttpError {
        /// The URL that was requested.
        url: String,
        /// A human-readable description of the failure.
        reason: String,
    },

    /// A `file://` resource could not be read.
    #[error("failed to read {url}")]
    Io {
        /// The URL that was requested.
        url: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The URL could not be interpreted.
    #[error("invalid repository URL {url}: {reason}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// Description of the problem.
        reason: String,
    },
}

impl DownloadError {
    /// Return true when the error means the resource is absent.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Reads resources from repository locations.
pub trait RepositoryTransport: Send + Sync {
    /// Fetch the body at `url`, authenticating with `credential` when one
    /// is supplied.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::NotFound`] when the resource is absent and
    /// another [`DownloadError`] for every other failure.
    fn get(&self, url: &str, credential: Option<&Credential>) -> Result<Vec<u8>, DownloadError>;
}

/// Production transport for `http`, `https` and `file` URLs.
///
/// # Examples
///
/// ```
/// use stubrun_retriever::transport::{HttpTransport, RepositoryTransport};
///
/// let transport = HttpTransport;
/// let err = transport
///     .get("file:///definitely/not/here.jar", None)
///     .expect_err("missing file");
/// assert!(err.is_not_found());
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpTransport;

impl RepositoryTransport for HttpTransport {
    fn get(&self, url: &str, credential: Option<&Credential>) -> Result<Vec<u8>, DownloadError> {
        if url.starts_with("file:") {
            return read_file_url(url);
        }
        let mut request = http_agent().get(url);
        if let Some(credential) = credential {
            request = request.header("Authorization", basic_auth(credential));
        }
        let mut response = request.call().map_err(|e| map_ureq_error(url, &e))?;
        response
            .body_mut()
            .with_config()
            .limit(MAX_BODY_BYTES)
            .read_to_vec()
            .map_err(|e| DownloadError::HttpError {
                url: url.to_owned(),
                reason: e.to_string(),
            })
    }
}

/// Shared `ureq` agent with request timeout configuration.
fn http_agent() -> &'static ureq::Agent {
    static AGENT: OnceLock<ureq::Agent> = OnceLock::new();
    AGENT.get_or_init(|| {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build();
        ureq::Agent::new_with_config(config)
    })
}

fn basic_auth(credential: &Credential) -> String {
    let token = STANDARD.encode(format!("{}:{}", credential.username(), credential.password()));
    format!("Basic {token}")
}

fn read_file_url(url: &str) -> Result<Vec<u8>, DownloadError> {
    let invalid = |reason: String| DownloadError::InvalidUrl {
        url: url.to_owned(),
        reason,
    };
    let parsed = url::Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    let path = parsed
        .to_file_path()
        .map_err(|()| invalid("not a local file path".to_owned()))?;
    std::fs::read(&path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => DownloadError::NotFound {
            url: url.to_owned(),
        },
        _ => DownloadError::Io {
            url: url.to_owned(),
            source,
        },
    })
}

/// Map a ureq error to a [`DownloadError`].
fn map_ureq_error(url: &str, err: &ureq::Error) -> DownloadError {
    match err {
        ureq::Error::StatusCode(404 | 410) => DownloadError::NotFound {
            url: url.to_owned(),
        },
        other => DownloadError::HttpError {
            url: url.to_owned(),
            reason: other.to_string(),
        },
    }
}
