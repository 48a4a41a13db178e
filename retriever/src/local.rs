//! Read access to directories in repository layout.
//!
//! Both the local cache and the bundled stub roots store artifacts in the
//! repository layout, so version listing and artifact reads share this code.

use crate::metadata::{SnapshotBuild, parse_snapshot_metadata};
use camino::{Utf8Path, Utf8PathBuf};
use std::io;
use stubrun_common::Coordinate;
use stubrun_common::layout::{artifact_dir, artifact_path, snapshot_metadata_path};
use stubrun_common::version::{is_snapshot_marker, timestamped_version};

/// A directory laid out like a repository.
#[derive(Debug, Clone, Copy)]
pub struct LocalRepository<'a> {
    root: &'a Utf8Path,
}

impl<'a> LocalRepository<'a> {
    /// Wrap `root`.
    #[must_use]
    pub fn new(root: &'a Utf8Path) -> Self {
        Self { root }
    }

    /// Return the root directory.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        self.root
    }

    /// Return where `coordinate` lives beneath the root.
    #[must_use]
    pub fn artifact_file(&self, coordinate: &Coordinate) -> Utf8PathBuf {
        artifact_path(coordinate).under(self.root)
    }

    /// Return true when the artifact file for `coordinate` exists.
    #[must_use]
    pub fn contains(&self, coordinate: &Coordinate) -> bool {
        self.artifact_file(coordinate).is_file()
    }

    /// Read the artifact bytes, or `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns the I/O error when the file exists but cannot be read.
    pub fn read(&self, coordinate: &Coordinate) -> io::Result<Option<Vec<u8>>> {
        match std::fs::read(self.artifact_file(coordinate)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Return the timestamped build recorded in the snapshot metadata for
    /// the `-SNAPSHOT` marker `coordinate`, if that build's file is present.
    #[must_use]
    pub fn pinned_snapshot(&self, coordinate: &Coordinate) -> Option<Coordinate> {
        let path = snapshot_metadata_path(coordinate).under(self.root);
        let raw = std::fs::read(path).ok()?;
        let build = parse_snapshot_metadata(&raw).ok()?.snapshot?;
        pin_build(coordinate, &build).filter(|pinned| self.contains(pinned))
    }

    /// List the versions of `coordinate`'s artifact that can be read.
    ///
    /// A version counts when its file is present, or, for a `-SNAPSHOT`
    /// directory, when its snapshot metadata pins a build whose file is
    /// present. The version field of `coordinate` is ignored; the classifier
    /// is kept so only versions carrying the requested classifier are
    /// counted.
    #[must_use]
    pub fn versions(&self, coordinate: &Coordinate) -> Vec<String> {
        let dir = artifact_dir(coordinate.group(), coordinate.artifact()).under(self.root);
        let Ok(entries) = dir.read_dir_utf8() else {
            return Vec::new();
        };
        entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_dir()))
            .filter_map(|entry| {
                let version = entry.file_name().to_owned();
                let candidate = coordinate.with_version(version.as_str()).ok()?;
                let readable = self.contains(&candidate)
                    || (is_snapshot_marker(&version) && self.pinned_snapshot(&candidate).is_some());
                readable.then_some(version)
            })
            .collect()
    }
}

/// Apply a snapshot build to the `-SNAPSHOT` marker `coordinate`.
pub(crate) fn pin_build(coordinate: &Coordinate, build: &SnapshotBuild) -> Option<Coordinate> {
    let version = timestamped_version(coordinate.version(), &build.timestamp, build.build_number);
    coordinate.with_version(version).ok()
}
