//! Archive extraction for stub artifacts.
//!
//! The archive format is sniffed from its magic bytes: zip (including jar),
//! gzip-compressed tar and zstd-compressed tar. Every entry path and link
//! target is validated before anything is written, guarding against
//! zip-slip style traversal.

use std::io::{self, Cursor, Read};
use std::path::{Component, Path, PathBuf};

const ZIP_LOCAL_HEADER: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_ARCHIVE: &[u8] = b"PK\x05\x06";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];
const S_IFMT: u32 = 0o170_000;
const S_IFLNK: u32 = 0o120_000;

/// Trait for extracting archives, enabling test mocking.
///
/// # Examples
///
/// ```
/// use stubrun_retriever::unpack::extraction::{
///     ArchiveExtractor, ExtractionError, SniffingExtractor,
/// };
///
/// let dest = tempfile::tempdir().expect("temp dir");
/// let result = SniffingExtractor.extract(b"not an archive", dest.path());
/// assert!(matches!(result, Err(ExtractionError::UnsupportedFormat)));
/// ```
#[cfg_attr(test, mockall::automock)]
pub trait ArchiveExtractor: Send + Sync {
    /// Extract `bytes` into `dest_dir`, which must already exist.
    ///
    /// Returns the relative paths of the extracted files.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractionError::PathTraversal`] if any entry attempts to
    /// escape the destination directory.
    /// Returns [`ExtractionError::EmptyArchive`] if no files are found.
    fn extract(&self, bytes: &[u8], dest_dir: &Path) -> Result<Vec<String>, ExtractionError>;
}

/// Errors arising from archive extraction.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    /// I/O error during extraction.
    #[error("extraction I/O error: {0}")]
    Io(#[from] io::Error),

    /// A path in the archive attempts to traverse outside the destination.
    #[error("path traversal detected: {path}")]
    PathTraversal {
        /// The offending path from the archive entry.
        path: String,
    },

    /// The archive contains no files.
    #[error("archive contains no files")]
    EmptyArchive,

    /// The bytes are not in a supported archive format.
    #[error("unsupported archive format")]
    UnsupportedFormat,

    /// The archive structure is invalid.
    #[error("corrupt archive: {reason}")]
    Corrupt {
        /// Description of the problem.
        reason: String,
    },
}

/// Supported archive formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// Zip or jar.
    Zip,
    /// Gzip-compressed tar.
    TarGz,
    /// Zstd-compressed tar.
    TarZst,
}

impl ArchiveFormat {
    /// Detect the format from leading magic bytes.
    #[must_use]
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(ZIP_LOCAL_HEADER) || bytes.starts_with(ZIP_EMPTY_ARCHIVE) {
            Some(Self::Zip)
        } else if bytes.starts_with(GZIP_MAGIC) {
            Some(Self::TarGz)
        } else if bytes.starts_with(ZSTD_MAGIC) {
            Some(Self::TarZst)
        } else {
            None
        }
    }
}

/// Default extractor dispatching on [`ArchiveFormat::sniff`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SniffingExtractor;

impl ArchiveExtractor for SniffingExtractor {
    fn extract(&self, bytes: &[u8], dest_dir: &Path) -> Result<Vec<String>, ExtractionError> {
        let extracted = match ArchiveFormat::sniff(bytes) {
            Some(ArchiveFormat::Zip) => extract_zip(bytes, dest_dir)?,
            Some(ArchiveFormat::TarGz) => {
                extract_tar(flate2::read::GzDecoder::new(bytes), dest_dir)?
            }
            Some(ArchiveFormat::TarZst) => extract_tar(zstd::Decoder::new(bytes)?, dest_dir)?,
            None => return Err(ExtractionError::UnsupportedFormat),
        };
        if extracted.is_empty() {
            return Err(ExtractionError::EmptyArchive);
        }
        Ok(extracted)
    }
}

fn corrupt(err: impl std::fmt::Display) -> ExtractionError {
    ExtractionError::Corrupt {
        reason: err.to_string(),
    }
}

fn extract_zip(bytes: &[u8], dest_dir: &Path) -> Result<Vec<String>, ExtractionError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(corrupt)?;
    let root = dest_dir.canonicalize()?;
    let mut extracted = Vec::new();
    for index in 0..archive.len() {
        let mut file = archive.by_index(index).map_err(corrupt)?;
        let entry_path = PathBuf::from(file.name());
        validate_entry_path(&entry_path)?;

        if file.is_dir() {
            create_dirs_inside(&root, dest_dir, &entry_path, &entry_path)?;
            continue;
        }
        if let Some(parent) = entry_path.parent() {
            create_dirs_inside(&root, dest_dir, parent, &entry_path)?;
        }
        let dest_path = dest_dir.join(&entry_path);
        if is_symlink(&dest_path) {
            return Err(traversal(&entry_path));
        }
        if file.unix_mode().is_some_and(|mode| mode & S_IFMT == S_IFLNK) {
            let mut target = String::new();
            file.read_to_string(&mut target)?;
            validate_link_target(&entry_path, Path::new(&target))?;
            create_symlink(Path::new(&target), &dest_path)?;
        } else {
            let mut out = std::fs::File::create(&dest_path)?;
            io::copy(&mut file, &mut out)?;
        }
        extracted.push(file.name().to_owned());
    }
    Ok(extracted)
}

/// Create each directory of `relative` beneath `dest_dir`.
///
/// Links created by earlier entries may be walked through only while they
/// resolve inside `root`, the canonical destination.
fn create_dirs_inside(
    root: &Path,
    dest_dir: &Path,
    relative: &Path,
    entry: &Path,
) -> Result<(), ExtractionError> {
    let mut current = dest_dir.to_path_buf();
    for component in relative.components() {
        current.push(component);
        match std::fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                let resolved = current.canonicalize().map_err(|_| traversal(entry))?;
                if !resolved.starts_with(root) {
                    return Err(traversal(entry));
                }
            }
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => std::fs::create_dir(&current)?,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn is_symlink(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok_and(|meta| meta.file_type().is_symlink())
}

fn extract_tar<R: Read>(reader: R, dest_dir: &Path) -> Result<Vec<String>, ExtractionError> {
    let mut archive = tar::Archive::new(reader);
    let mut extracted = Vec::new();
    for entry_result in archive.entries()? {
        let mut entry = entry_result?;
        let entry_path = entry.path()?.into_owned();
        validate_entry_path(&entry_path)?;

        let kind = entry.header().entry_type();
        if let Some(link) = entry.link_name()? {
            if kind.is_hard_link() {
                validate_entry_path(&link)?;
            } else {
                validate_link_target(&entry_path, &link)?;
            }
        }

        if !entry.unpack_in(dest_dir)? {
            return Err(traversal(&entry_path));
        }

        if !kind.is_dir() {
            extracted.push(entry_path.display().to_string());
        }
    }
    Ok(extracted)
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    log::warn!(
        "skipping symlink {} -> {}: unsupported on this platform",
        link.display(),
        target.display()
    );
    Ok(())
}

fn traversal(path: &Path) -> ExtractionError {
    ExtractionError::PathTraversal {
        path: path.display().to_string(),
    }
}

/// Validate that an entry path does not escape the destination directory
/// via `..` components or absolute paths.
pub(crate) fn validate_entry_path(path: &Path) -> Result<(), ExtractionError> {
    if path.is_absolute() || path.has_root() {
        return Err(traversal(path));
    }
    for component in path.components() {
        if matches!(component, Component::ParentDir | Component::Prefix(_)) {
            return Err(traversal(path));
        }
    }
    Ok(())
}

/// Validate that a symlink at `entry` pointing at `target` stays inside the
/// destination directory once resolved relative to the link's directory.
pub(crate) fn validate_link_target(entry: &Path, target: &Path) -> Result<(), ExtractionError> {
    if target.is_absolute() || target.has_root() {
        return Err(traversal(target));
    }
    let parent_depth = entry
        .parent()
        .map_or(0, |parent| {
            parent
                .components()
                .filter(|c| matches!(c, Component::Normal(_)))
                .count()
        });
    let mut depth = parent_depth;
    for component in target.components() {
        match component {
            Component::ParentDir => {
                depth = depth.checked_sub(1).ok_or_else(|| traversal(target))?;
            }
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return Err(traversal(target)),
        }
    }
    Ok(())
}
