//! Deterministic, idempotent unpacking of stub archives.
//!
//! Each coordinate unpacks into `<root>/<group>/<artifact>/<base>/<leaf>`,
//! with timestamped snapshot builds one directory deeper under their base.
//! A directory whose marker records the same SHA-256 fingerprint as the
//! incoming bytes is reused. Otherwise the archive is extracted into a
//! staging sibling and swapped into place with renames, so readers only
//! ever observe a complete directory.
//!
//! Unpacks of one target are serialized by an in-process mutex and an
//! advisory lock file, so concurrent callers and concurrent processes
//! observe a single committed result.

pub mod extraction;
pub mod fingerprint;

use crate::cancel::CancellationToken;
use camino::{Utf8Path, Utf8PathBuf};
use dashmap::DashMap;
use extraction::{ArchiveExtractor, ExtractionError, SniffingExtractor};
use fingerprint::{Sha256Digest, UnpackMarker};
use std::fs::File;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use stubrun_common::Coordinate;
use stubrun_common::layout::unpack_path;

const STAGING_PREFIX: &str = ".stubrun-staging-";
const TRASH_PREFIX: &str = ".stubrun-trash-";
const CONTENT_DIR: &str = "content";

/// A stub archive unpacked on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackedStub {
    /// The concrete coordinate that was unpacked.
    pub coordinate: Coordinate,
    /// The directory holding the extracted files.
    pub directory: Utf8PathBuf,
    /// Fingerprint of the archive the directory was built from.
    pub source_digest: Sha256Digest,
}

/// Errors arising while unpacking an archive.
#[derive(Debug, thiserror::Error)]
pub enum UnpackError {
    /// An archive entry would land outside the target directory.
    #[error("archive entry escapes the unpack directory: {path}")]
    PathTraversal {
        /// The offending entry path or link target.
        path: String,
    },

    /// The archive is unreadable, empty or of an unknown format.
    #[error("corrupt archive: {reason}")]
    Corrupt {
        /// Description of the problem.
        reason: String,
    },

    /// A filesystem operation failed.
    #[error("I/O error at {path}")]
    Io {
        /// The path being operated on.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The caller cancelled the unpack before it was committed.
    #[error("unpack cancelled")]
    Cancelled,
}

impl UnpackError {
    fn io(path: &Utf8Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_owned(),
            source,
        }
    }

    fn from_extraction(err: ExtractionError, staging: &Utf8Path) -> Self {
        match err {
            ExtractionError::PathTraversal { path } => Self::PathTraversal { path },
            ExtractionError::Io(source) => Self::io(staging, source),
            ExtractionError::EmptyArchive => Self::Corrupt {
                reason: "archive contains no files".to_owned(),
            },
            ExtractionError::UnsupportedFormat => Self::Corrupt {
                reason: "unsupported archive format".to_owned(),
            },
            ExtractionError::Corrupt { reason } => Self::Corrupt { reason },
        }
    }
}

/// Releases the advisory lock file when dropped.
struct TargetLock {
    file: File,
    path: Utf8PathBuf,
}

impl TargetLock {
    fn acquire(path: Utf8PathBuf) -> Result<Self, UnpackError> {
        let file = File::create(&path).map_err(|e| UnpackError::io(&path, e))?;
        fs2::FileExt::lock_exclusive(&file).map_err(|e| UnpackError::io(&path, e))?;
        Ok(Self { file, path })
    }
}

impl Drop for TargetLock {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            log::debug!("failed to release unpack lock {}: {e}", self.path);
        }
    }
}

/// Unpacks stub archives beneath a root directory.
pub struct ArchiveUnpacker {
    root: Utf8PathBuf,
    extractor: Arc<dyn ArchiveExtractor>,
    locks: DashMap<Utf8PathBuf, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for ArchiveUnpacker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveUnpacker")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl ArchiveUnpacker {
    /// Create an unpacker writing beneath `root` with the default
    /// format-sniffing extractor.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self::with_extractor(root, Arc::new(SniffingExtractor))
    }

    /// Create an unpacker with a custom extractor.
    #[must_use]
    pub fn with_extractor(
        root: impl Into<Utf8PathBuf>,
        extractor: Arc<dyn ArchiveExtractor>,
    ) -> Self {
        Self {
            root: root.into(),
            extractor,
            locks: DashMap::new(),
        }
    }

    /// Return the unpack root.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Return the directory `coordinate` unpacks into.
    #[must_use]
    pub fn target_dir(&self, coordinate: &Coordinate) -> Utf8PathBuf {
        unpack_path(coordinate).under(&self.root)
    }

    /// Unpack `bytes` for `coordinate`, reusing a matching prior unpack.
    ///
    /// # Errors
    ///
    /// Returns [`UnpackError`] when extraction or the directory swap fails;
    /// the previous directory, if any, is left in place.
    pub fn unpack(
        &self,
        bytes: &[u8],
        coordinate: &Coordinate,
    ) -> Result<UnpackedStub, UnpackError> {
        self.unpack_cancellable(bytes, coordinate, &CancellationToken::new())
    }

    /// Unpack like [`ArchiveUnpacker::unpack`], giving up before the commit
    /// when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`UnpackError::Cancelled`] when cancelled, otherwise as for
    /// [`ArchiveUnpacker::unpack`].
    pub fn unpack_cancellable(
        &self,
        bytes: &[u8],
        coordinate: &Coordinate,
        cancel: &CancellationToken,
    ) -> Result<UnpackedStub, UnpackError> {
        let target = self.target_dir(coordinate);
        let parent = target
            .parent()
            .map(Utf8Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        std::fs::create_dir_all(&parent).map_err(|e| UnpackError::io(&parent, e))?;

        let stub = UnpackedStub {
            coordinate: coordinate.clone(),
            directory: target.clone(),
            source_digest: Sha256Digest::of(bytes),
        };

        let mutex = self.locks.entry(target.clone()).or_default().clone();
        let result = {
            let _guard = mutex.lock().unwrap_or_else(PoisonError::into_inner);
            self.unpack_locked(bytes, stub, &parent, cancel)
        };
        drop(mutex);
        self.locks.remove_if(&target, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    /// Number of targets with an unpack in progress.
    #[cfg(test)]
    fn active_locks(&self) -> usize {
        self.locks.len()
    }

    fn unpack_locked(
        &self,
        bytes: &[u8],
        stub: UnpackedStub,
        parent: &Utf8Path,
        cancel: &CancellationToken,
    ) -> Result<UnpackedStub, UnpackError> {
        let target = &stub.directory;
        let coordinate = &stub.coordinate;
        let digest = stub.source_digest.clone();
        let _file_lock = TargetLock::acquire(lock_path(target, parent))?;

        if UnpackMarker::read(target).is_some_and(|marker| marker.sha256 == digest) {
            log::debug!("reusing unpacked {coordinate} at {target}");
            return Ok(stub);
        }
        if cancel.is_cancelled() {
            return Err(UnpackError::Cancelled);
        }

        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(parent)
            .map_err(|e| UnpackError::io(parent, e))?;
        let content = utf8(staging.path())?.join(CONTENT_DIR);
        std::fs::create_dir(&content).map_err(|e| UnpackError::io(&content, e))?;
        self.extractor
            .extract(bytes, content.as_std_path())
            .map_err(|e| UnpackError::from_extraction(e, &content))?;
        UnpackMarker {
            coordinate: coordinate.to_string(),
            sha256: digest,
        }
        .write(&content)
        .map_err(|e| UnpackError::io(&content, e))?;

        if cancel.is_cancelled() {
            return Err(UnpackError::Cancelled);
        }
        swap_into_place(&content, target, parent)?;
        log::info!("unpacked {coordinate} into {target}");
        Ok(stub)
    }
}

fn lock_path(target: &Utf8Path, parent: &Utf8Path) -> Utf8PathBuf {
    let leaf = target.file_name().unwrap_or("stub");
    parent.join(format!("{leaf}.lock"))
}

fn utf8(path: &std::path::Path) -> Result<&Utf8Path, UnpackError> {
    Utf8Path::from_path(path).ok_or_else(|| UnpackError::Io {
        path: Utf8PathBuf::from(path.to_string_lossy().into_owned()),
        source: io::Error::new(io::ErrorKind::InvalidData, "path is not valid UTF-8"),
    })
}

/// Replace `target` with `content`, restoring the old directory if the
/// final rename fails.
fn swap_into_place(
    content: &Utf8Path,
    target: &Utf8Path,
    parent: &Utf8Path,
) -> Result<(), UnpackError> {
    if !target.exists() {
        return std::fs::rename(content, target).map_err(|e| UnpackError::io(target, e));
    }
    let trash = tempfile::Builder::new()
        .prefix(TRASH_PREFIX)
        .tempdir_in(parent)
        .map_err(|e| UnpackError::io(parent, e))?;
    let previous = utf8(trash.path())?.join(CONTENT_DIR);
    std::fs::rename(target, &previous).map_err(|e| UnpackError::io(target, e))?;
    if let Err(e) = std::fs::rename(content, target) {
        if let Err(restore) = std::fs::rename(&previous, target) {
            log::warn!("failed to restore previous unpack of {target}: {restore}");
        }
        return Err(UnpackError::io(target, e));
    }
    log::debug!("replaced stale unpack at {target}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{CountingExtractor, utf8_temp_dir, zip_archive};
    use extraction::MockArchiveExtractor;
    use rstest::{fixture, rstest};
    use std::time::Duration;

    struct Sandbox {
        _dir: tempfile::TempDir,
        root: Utf8PathBuf,
        extractor: Arc<CountingExtractor>,
        unpacker: ArchiveUnpacker,
    }

    #[fixture]
    fn sandbox() -> Sandbox {
        let (dir, root) = utf8_temp_dir().expect("temp dir");
        let extractor = Arc::new(CountingExtractor::new());
        let unpacker = ArchiveUnpacker::with_extractor(root.clone(), extractor.clone());
        Sandbox {
            _dir: dir,
            root,
            extractor,
            unpacker,
        }
    }

    fn coordinate(raw: &str) -> Coordinate {
        raw.parse().expect("valid coordinate")
    }

    fn stub_jar(body: &str) -> Vec<u8> {
        zip_archive(&[("mappings/get.json", body.as_bytes())]).expect("zip")
    }

    #[rstest]
    #[case::main("org.example:svc:1.0", "org.example/svc/1.0/main")]
    #[case::classified("org.example:svc:1.0:stubs", "org.example/svc/1.0/classifier-stubs")]
    #[case::snapshot_marker("org.example:svc:1.0-SNAPSHOT", "org.example/svc/1.0-SNAPSHOT/main")]
    #[case::snapshot_build(
        "org.example:svc:1.0-20240102.030405-7",
        "org.example/svc/1.0-SNAPSHOT/1.0-20240102.030405-7/main"
    )]
    fn target_is_derived_from_coordinate(
        sandbox: Sandbox,
        #[case] raw: &str,
        #[case] relative: &str,
    ) {
        assert_eq!(
            sandbox.unpacker.target_dir(&coordinate(raw)),
            sandbox.root.join(relative)
        );
    }

    #[rstest]
    fn second_unpack_reuses_directory(sandbox: Sandbox) {
        let jar = stub_jar("{}");
        let c = coordinate("org.example:svc:1.0");
        let first = sandbox.unpacker.unpack(&jar, &c).expect("first unpack");
        let second = sandbox.unpacker.unpack(&jar, &c).expect("second unpack");
        assert_eq!(first, second);
        assert_eq!(sandbox.extractor.extractions(), 1);
        assert!(first.directory.join("mappings/get.json").is_file());
    }

    #[rstest]
    fn changed_bytes_replace_directory(sandbox: Sandbox) {
        let c = coordinate("org.example:svc:1.0-SNAPSHOT");
        let first = sandbox.unpacker.unpack(&stub_jar("old"), &c).expect("first");
        let second = sandbox.unpacker.unpack(&stub_jar("new"), &c).expect("second");
        assert_eq!(first.directory, second.directory);
        assert_ne!(first.source_digest, second.source_digest);
        let body = std::fs::read_to_string(second.directory.join("mappings/get.json"))
            .expect("read stub");
        assert_eq!(body, "new");
        assert_eq!(
            UnpackMarker::read(&second.directory).map(|m| m.sha256),
            Some(second.source_digest)
        );
        assert_eq!(sandbox.extractor.extractions(), 2);
    }

    #[rstest]
    fn staging_directories_are_cleaned_up(sandbox: Sandbox) {
        let c = coordinate("org.example:svc:1.0");
        sandbox.unpacker.unpack(&stub_jar("a"), &c).expect("first");
        sandbox.unpacker.unpack(&stub_jar("b"), &c).expect("second");
        let parent = sandbox.unpacker.target_dir(&c);
        let parent = parent.parent().expect("parent");
        let leftovers: Vec<_> = std::fs::read_dir(parent)
            .expect("list parent")
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(STAGING_PREFIX) || name.starts_with(TRASH_PREFIX))
            .collect();
        assert!(leftovers.is_empty(), "leftovers: {leftovers:?}");
    }

    #[rstest]
    fn traversal_leaves_no_target(sandbox: Sandbox) {
        let jar = zip_archive(&[("../../evil.json", b"{}")]).expect("zip");
        let c = coordinate("org.example:svc:1.0");
        let err = sandbox.unpacker.unpack(&jar, &c).expect_err("traversal");
        assert!(matches!(err, UnpackError::PathTraversal { .. }));
        assert!(!sandbox.unpacker.target_dir(&c).exists());
    }

    #[rstest]
    fn failed_replacement_keeps_previous_unpack(sandbox: Sandbox) {
        let c = coordinate("org.example:svc:1.0");
        let good = sandbox.unpacker.unpack(&stub_jar("good"), &c).expect("first");
        let bad = zip_archive(&[("../evil", b"x")]).expect("zip");
        assert!(sandbox.unpacker.unpack(&bad, &c).is_err());
        assert_eq!(
            UnpackMarker::read(&good.directory).map(|m| m.sha256),
            Some(good.source_digest)
        );
    }

    #[rstest]
    fn cancelled_unpack_commits_nothing(sandbox: Sandbox) {
        let c = coordinate("org.example:svc:1.0");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = sandbox
            .unpacker
            .unpack_cancellable(&stub_jar("{}"), &c, &cancel)
            .expect_err("cancelled");
        assert!(matches!(err, UnpackError::Cancelled));
        assert!(!sandbox.unpacker.target_dir(&c).exists());
        assert_eq!(sandbox.extractor.extractions(), 0);
    }

    #[test]
    fn concurrent_callers_share_one_extraction() {
        let (_dir, root) = utf8_temp_dir().expect("temp dir");
        let extractor = Arc::new(CountingExtractor::new().with_delay(Duration::from_millis(50)));
        let unpacker = ArchiveUnpacker::with_extractor(root, extractor.clone());
        let jar = stub_jar("{}");
        let c = coordinate("org.example:svc:1.0");
        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| unpacker.unpack(&jar, &c)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("thread panicked"))
                .collect()
        });
        assert_eq!(extractor.extractions(), 1);
        assert_eq!(unpacker.active_locks(), 0);
        for result in results {
            assert!(result.expect("unpack").directory.join("mappings/get.json").is_file());
        }
    }

    #[rstest]
    fn lock_entries_are_released_after_each_unpack(sandbox: Sandbox) {
        for raw in ["org.example:a:1.0", "org.example:b:1.0", "org.example:a:1.0"] {
            sandbox.unpacker.unpack(&stub_jar("{}"), &coordinate(raw)).expect("unpack");
            assert_eq!(sandbox.unpacker.active_locks(), 0);
        }
        let bad = zip_archive(&[("../evil", b"x")]).expect("zip");
        assert!(sandbox.unpacker.unpack(&bad, &coordinate("org.example:c:1.0")).is_err());
        assert_eq!(sandbox.unpacker.active_locks(), 0);
    }

    #[test]
    fn empty_archive_is_corrupt() {
        let (_dir, root) = utf8_temp_dir().expect("temp dir");
        let mut mock = MockArchiveExtractor::new();
        mock.expect_extract()
            .times(1)
            .returning(|_, _| Err(ExtractionError::EmptyArchive));
        let unpacker = ArchiveUnpacker::with_extractor(root, Arc::new(mock));
        let c = coordinate("org.example:svc:1.0");
        let err = unpacker.unpack(b"PK\x05\x06", &c).expect_err("empty");
        assert!(matches!(err, UnpackError::Corrupt { .. }));
        assert!(!unpacker.target_dir(&c).exists());
    }
}
