//! Shared test utilities for the retriever crate.

use crate::credentials::{Credential, CredentialError, CredentialStore};
use crate::transport::{DownloadError, RepositoryTransport};
use crate::unpack::extraction::{ArchiveExtractor, ExtractionError, SniffingExtractor};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashMap;
use std::io::{self, Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use stubrun_common::Coordinate;
use stubrun_common::layout::artifact_path;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Create a temporary directory and return it with its UTF-8 path.
///
/// # Errors
///
/// Returns an I/O error when the directory cannot be created or its path
/// is not UTF-8.
pub fn utf8_temp_dir() -> io::Result<(tempfile::TempDir, Utf8PathBuf)> {
    let dir = tempfile::tempdir()?;
    let path = Utf8PathBuf::try_from(dir.path().to_path_buf())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok((dir, path))
}

/// Build a zip (jar) archive holding `entries` as `(name, contents)`.
///
/// Names are written verbatim, so traversal entries such as
/// `../escape.txt` can be produced.
///
/// # Errors
///
/// Returns an I/O error when the archive cannot be written.
pub fn zip_archive(entries: &[(&str, &[u8])]) -> io::Result<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, contents) in entries {
        writer.start_file(*name, options).map_err(io::Error::other)?;
        writer.write_all(contents)?;
    }
    Ok(writer.finish().map_err(io::Error::other)?.into_inner())
}

fn append_entries<W: Write>(
    builder: &mut tar::Builder<W>,
    entries: &[(&str, &[u8])],
) -> io::Result<()> {
    for (name, contents) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *contents)?;
    }
    Ok(())
}

/// Build a tar+gzip archive holding `entries`.
///
/// # Errors
///
/// Returns an I/O error when the archive cannot be written.
pub fn tar_gz_archive(entries: &[(&str, &[u8])]) -> io::Result<Vec<u8>> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    append_entries(&mut builder, entries)?;
    builder.into_inner()?.finish()
}

/// Build a tar+zstd archive holding `entries`.
///
/// # Errors
///
/// Returns an I/O error when the archive cannot be written.
pub fn tar_zst_archive(entries: &[(&str, &[u8])]) -> io::Result<Vec<u8>> {
    let encoder = zstd::Encoder::new(Vec::new(), 0)?;
    let mut builder = tar::Builder::new(encoder);
    append_entries(&mut builder, entries)?;
    builder.into_inner()?.finish()
}

/// Write `bytes` as the artifact for `coordinate` beneath `root`.
///
/// # Errors
///
/// Returns an I/O error when the file cannot be written.
pub fn install_artifact(
    root: &Utf8Path,
    coordinate: &Coordinate,
    bytes: &[u8],
) -> io::Result<Utf8PathBuf> {
    let path = artifact_path(coordinate).under(root);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, bytes)?;
    Ok(path)
}

#[derive(Debug, Clone)]
enum CannedResponse {
    Body(Vec<u8>),
    Failure(String),
}

/// A [`RepositoryTransport`] serving canned responses.
///
/// Unknown URLs answer "not found". Every request is recorded with the
/// user name it carried.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    responses: Mutex<HashMap<String, CannedResponse>>,
    requests: Mutex<Vec<(String, Option<String>)>>,
}

impl RecordingTransport {
    /// Create a transport with no responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` at `url`.
    pub fn serve(&self, url: impl Into<String>, body: impl Into<Vec<u8>>) {
        lock(&self.responses).insert(url.into(), CannedResponse::Body(body.into()));
    }

    /// Serve `value` as JSON at `url`.
    pub fn serve_json(&self, url: impl Into<String>, value: &serde_json::Value) {
        self.serve(url, value.to_string());
    }

    /// Fail requests for `url` with a transport error.
    pub fn fail(&self, url: impl Into<String>, reason: impl Into<String>) {
        lock(&self.responses).insert(url.into(), CannedResponse::Failure(reason.into()));
    }

    /// Return every requested URL in order.
    #[must_use]
    pub fn requests(&self) -> Vec<String> {
        lock(&self.requests).iter().map(|(url, _)| url.clone()).collect()
    }

    /// Return the user name sent with each request.
    #[must_use]
    pub fn usernames(&self) -> Vec<Option<String>> {
        lock(&self.requests).iter().map(|(_, user)| user.clone()).collect()
    }

    /// Return how many requests were made.
    #[must_use]
    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

impl RepositoryTransport for RecordingTransport {
    fn get(&self, url: &str, credential: Option<&Credential>) -> Result<Vec<u8>, DownloadError> {
        lock(&self.requests).push((
            url.to_owned(),
            credential.map(|c| c.username().to_owned()),
        ));
        match lock(&self.responses).get(url).cloned() {
            Some(CannedResponse::Body(body)) => Ok(body),
            Some(CannedResponse::Failure(reason)) => Err(DownloadError::HttpError {
                url: url.to_owned(),
                reason,
            }),
            None => Err(DownloadError::NotFound {
                url: url.to_owned(),
            }),
        }
    }
}

/// A transport that fails every request; use it to prove no network
/// access happens.
#[derive(Debug, Default)]
pub struct ForbiddenTransport {
    attempts: AtomicUsize,
}

impl ForbiddenTransport {
    /// Return how many requests were attempted.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl RepositoryTransport for ForbiddenTransport {
    fn get(&self, url: &str, _credential: Option<&Credential>) -> Result<Vec<u8>, DownloadError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(DownloadError::HttpError {
            url: url.to_owned(),
            reason: "network access is forbidden in this test".to_owned(),
        })
    }
}

/// An [`ArchiveExtractor`] that delegates to [`SniffingExtractor`] and
/// counts how often it runs.
#[derive(Debug, Default)]
pub struct CountingExtractor {
    count: AtomicUsize,
    delay: Option<Duration>,
}

impl CountingExtractor {
    /// Create a counting extractor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` inside every extraction to widen race windows.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Return how many extractions ran.
    #[must_use]
    pub fn extractions(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl ArchiveExtractor for CountingExtractor {
    fn extract(&self, bytes: &[u8], dest_dir: &Path) -> Result<Vec<String>, ExtractionError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        SniffingExtractor.extract(bytes, dest_dir)
    }
}

/// A [`CredentialStore`] with fixed entries.
#[derive(Debug, Default)]
pub struct StaticCredentialStore {
    entries: HashMap<String, Credential>,
}

impl StaticCredentialStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a credential for `server_id`.
    #[must_use]
    pub fn with(mut self, server_id: impl Into<String>, credential: Credential) -> Self {
        self.entries.insert(server_id.into(), credential);
        self
    }
}

impl CredentialStore for StaticCredentialStore {
    fn credentials_for(&self, server_id: &str) -> Result<Option<Credential>, CredentialError> {
        Ok(self.entries.get(server_id).cloned())
    }
}
