//! Repository and unpack directory layouts.
//!
//! Artifacts are stored the way Maven repositories store them:
//!
//! ```text
//! {root}/{group with '.' as '/'}/{artifact}/{base version}/{artifact}-{version}[-{classifier}].jar
//! ```
//!
//! Unpacked stubs use one leaf directory per coordinate so that a classified
//! and an unclassified artifact of the same version never share a tree:
//!
//! ```text
//! {unpack root}/{group}/{artifact}/{base version}/[{timestamped build}/]{main | classifier-<c>}
//! ```

use crate::coordinate::Coordinate;
use crate::version::{base_version, snapshot_build_of};
use camino::{Utf8Path, Utf8PathBuf};

/// File extension of packaged stub artifacts.
pub const ARTIFACT_EXTENSION: &str = "jar";

/// File name of version-listing and snapshot metadata documents.
pub const METADATA_FILE: &str = "metadata.json";

/// Unpack leaf used for coordinates without a classifier.
pub const UNCLASSIFIED_LEAF: &str = "main";

const CLASSIFIED_LEAF_PREFIX: &str = "classifier-";

/// A location relative to a repository or unpack root, kept as segments so
/// it renders correctly both as a filesystem path and as a URL path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoPath {
    segments: Vec<String>,
}

impl RepoPath {
    fn new(segments: Vec<String>) -> Self {
        Self { segments }
    }

    /// Return the path segments in order.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Return the final segment.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Render as a relative filesystem path.
    #[must_use]
    pub fn to_path(&self) -> Utf8PathBuf {
        self.segments.iter().map(String::as_str).collect()
    }

    /// Resolve beneath a filesystem root.
    #[must_use]
    pub fn under(&self, root: &Utf8Path) -> Utf8PathBuf {
        root.join(self.to_path())
    }

    /// Resolve beneath a repository base URL.
    ///
    /// # Examples
    ///
    /// ```
    /// use stubrun_common::Coordinate;
    /// use stubrun_common::layout::artifact_path;
    ///
    /// let coordinate = Coordinate::new("org.example", "svc", "1.0").expect("valid");
    /// assert_eq!(
    ///     artifact_path(&coordinate).to_url("https://repo.test/maven/"),
    ///     "https://repo.test/maven/org/example/svc/1.0/svc-1.0.jar"
    /// );
    /// ```
    #[must_use]
    pub fn to_url(&self, base: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), self.segments.join("/"))
    }
}

fn group_segments(group: &str) -> impl Iterator<Item = String> + '_ {
    group.split('.').map(str::to_owned)
}

/// Return the artifact file name for a concrete coordinate.
///
/// The classifier is appended exactly once, and an empty classifier still
/// contributes its separator so it never collides with no classifier.
#[must_use]
pub fn artifact_file_name(coordinate: &Coordinate) -> String {
    let stem = format!("{}-{}", coordinate.artifact(), coordinate.version());
    match coordinate.classifier() {
        Some(classifier) => format!("{stem}-{classifier}.{ARTIFACT_EXTENSION}"),
        None => format!("{stem}.{ARTIFACT_EXTENSION}"),
    }
}

/// Directory holding every version of an artifact.
#[must_use]
pub fn artifact_dir(group: &str, artifact: &str) -> RepoPath {
    RepoPath::new(
        group_segments(group)
            .chain(std::iter::once(artifact.to_owned()))
            .collect(),
    )
}

/// Directory holding one (base) version of an artifact.
#[must_use]
pub fn version_dir(coordinate: &Coordinate) -> RepoPath {
    let mut path = artifact_dir(coordinate.group(), coordinate.artifact());
    path.segments
        .push(base_version(coordinate.version()).into_owned());
    path
}

/// Full repository path of the artifact file.
#[must_use]
pub fn artifact_path(coordinate: &Coordinate) -> RepoPath {
    let mut path = version_dir(coordinate);
    path.segments.push(artifact_file_name(coordinate));
    path
}

/// Version-listing metadata for an artifact.
#[must_use]
pub fn versions_metadata_path(group: &str, artifact: &str) -> RepoPath {
    let mut path = artifact_dir(group, artifact);
    path.segments.push(METADATA_FILE.to_owned());
    path
}

/// Snapshot build metadata for a snapshot version.
#[must_use]
pub fn snapshot_metadata_path(coordinate: &Coordinate) -> RepoPath {
    let mut path = version_dir(coordinate);
    path.segments.push(METADATA_FILE.to_owned());
    path
}

/// Unpack directory for a coordinate, relative to the unpack root.
///
/// This is a pure function of the coordinate. Timestamped builds of one
/// snapshot are grouped beneath their base version, each in a directory
/// named after the build.
#[must_use]
pub fn unpack_path(coordinate: &Coordinate) -> RepoPath {
    let leaf = match coordinate.classifier() {
        Some(classifier) => format!("{CLASSIFIED_LEAF_PREFIX}{classifier}"),
        None => UNCLASSIFIED_LEAF.to_owned(),
    };
    let version = coordinate.version();
    let mut segments = vec![
        coordinate.group().to_owned(),
        coordinate.artifact().to_owned(),
        base_version(version).into_owned(),
    ];
    if snapshot_build_of(version).is_some() {
        segments.push(version.to_owned());
    }
    segments.push(leaf);
    RepoPath::new(segments)
}
