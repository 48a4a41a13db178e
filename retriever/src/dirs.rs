//! Directory resolution abstraction for platform-specific paths.
//!
//! Settings, the local artifact cache and the unpack root default to
//! locations beneath the user's home and cache directories. Resolution goes
//! through [`BaseDirs`] so tests can substitute fixed directories.

use camino::Utf8PathBuf;
use std::path::PathBuf;

/// Name of the per-user configuration directory beneath the home directory.
pub const STUBRUN_HOME_DIR: &str = ".stubrun";

/// Provides the base directories used for default paths.
#[cfg_attr(test, mockall::automock)]
pub trait BaseDirs: Send + Sync {
    /// Return the user's home directory.
    fn home_dir(&self) -> Option<PathBuf>;

    /// Return the platform cache directory.
    fn cache_dir(&self) -> Option<PathBuf>;
}

/// [`BaseDirs`] backed by `directories-next`.
///
/// # Examples
///
/// ```no_run
/// use stubrun_retriever::dirs::{BaseDirs, SystemBaseDirs};
///
/// let dirs = SystemBaseDirs::new().expect("failed to initialise directories");
/// assert!(dirs.home_dir().is_some());
/// ```
#[derive(Debug, Clone)]
pub struct SystemBaseDirs {
    inner: directories_next::BaseDirs,
}

impl SystemBaseDirs {
    /// Resolve the platform directories, or `None` when no home directory
    /// can be determined.
    #[must_use]
    pub fn new() -> Option<Self> {
        directories_next::BaseDirs::new().map(|inner| Self { inner })
    }
}

impl BaseDirs for SystemBaseDirs {
    fn home_dir(&self) -> Option<PathBuf> {
        Some(self.inner.home_dir().to_path_buf())
    }

    fn cache_dir(&self) -> Option<PathBuf> {
        Some(self.inner.cache_dir().to_path_buf())
    }
}

/// Errors arising while deriving default directories.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirsError {
    /// The platform directory could not be determined.
    #[error("could not determine the {kind} directory")]
    Unavailable {
        /// Which directory was requested.
        kind: &'static str,
    },

    /// The platform directory is not valid UTF-8.
    #[error("{kind} directory is not valid UTF-8: {path}")]
    NonUtf8 {
        /// Which directory was requested.
        kind: &'static str,
        /// Lossy rendering of the offending path.
        path: String,
    },
}

fn utf8_dir(kind: &'static str, dir: Option<PathBuf>) -> Result<Utf8PathBuf, DirsError> {
    let dir = dir.ok_or(DirsError::Unavailable { kind })?;
    Utf8PathBuf::from_path_buf(dir).map_err(|path| DirsError::NonUtf8 {
        kind,
        path: path.display().to_string(),
    })
}

/// `<home>/.stubrun`
///
/// # Errors
///
/// Returns [`DirsError`] when the home directory is unknown or not UTF-8.
pub fn stubrun_home(dirs: &dyn BaseDirs) -> Result<Utf8PathBuf, DirsError> {
    Ok(utf8_dir("home", dirs.home_dir())?.join(STUBRUN_HOME_DIR))
}

/// `<home>/.stubrun/repository`
///
/// # Errors
///
/// Returns [`DirsError`] when the home directory is unknown or not UTF-8.
pub fn default_cache_root(dirs: &dyn BaseDirs) -> Result<Utf8PathBuf, DirsError> {
    Ok(stubrun_home(dirs)?.join("repository"))
}

/// `<cache>/stubrun/unpacked`
///
/// # Errors
///
/// Returns [`DirsError`] when the cache directory is unknown or not UTF-8.
pub fn default_unpack_root(dirs: &dyn BaseDirs) -> Result<Utf8PathBuf, DirsError> {
    Ok(utf8_dir("cache", dirs.cache_dir())?
        .join("stubrun")
        .join("unpacked"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_dirs(home: Option<&str>, cache: Option<&str>) -> MockBaseDirs {
        let home = home.map(PathBuf::from);
        let cache = cache.map(PathBuf::from);
        let mut dirs = MockBaseDirs::new();
        dirs.expect_home_dir().returning(move || home.clone());
        dirs.expect_cache_dir().returning(move || cache.clone());
        dirs
    }

    #[test]
    fn defaults_live_beneath_home_and_cache() {
        let dirs = mock_dirs(Some("/home/test"), Some("/home/test/.cache"));
        assert_eq!(
            default_cache_root(&dirs).expect("cache root"),
            Utf8PathBuf::from("/home/test/.stubrun/repository")
        );
        assert_eq!(
            default_unpack_root(&dirs).expect("unpack root"),
            Utf8PathBuf::from("/home/test/.cache/stubrun/unpacked")
        );
    }

    #[test]
    fn missing_home_is_reported() {
        let dirs = mock_dirs(None, None);
        let err = stubrun_home(&dirs).expect_err("home should be missing");
        assert_eq!(err, DirsError::Unavailable { kind: "home" });
    }

    #[cfg(unix)]
    #[test]
    fn rejects_non_utf8_cache_dir() {
        use std::ffi::OsString;
        use std::os::unix::ffi::OsStringExt;

        let mut dirs = MockBaseDirs::new();
        dirs.expect_cache_dir().return_once(|| {
            Some(PathBuf::from(OsString::from_vec(vec![
                b'/', b't', b'm', b'p', b'/', 0xff,
            ])))
        });

        let err = default_unpack_root(&dirs).expect_err("expected UTF-8 conversion error");
        assert!(matches!(err, DirsError::NonUtf8 { kind: "cache", .. }));
    }
}
