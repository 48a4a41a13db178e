//! Resolution policy: where to look for artifacts and in which order.
//!
//! A [`ResolutionPolicy`] is immutable once built. Build one directly with
//! [`ResolutionPolicy::builder`] or from a TOML [`PolicyConfig`]:
//!
//! ```toml
//! mode = "remote"
//! prefer_local_over_remote = true
//!
//! [[remotes]]
//! uri = "https://repo.example.com/stubs"
//! server_id = "my-server"
//! ```

use crate::dirs::{BaseDirs, DirsError, default_cache_root};
use crate::settings::SettingsModel;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::fmt;
use url::Url;

/// Where artifacts may come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StubsMode {
    /// Only the local cache is consulted.
    #[default]
    LocalOnly,
    /// The local cache (when preferred) and then each remote, in order.
    Remote,
    /// Only the bundled stub roots are consulted.
    Classpath,
}

impl fmt::Display for StubsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LocalOnly => "local_only",
            Self::Remote => "remote",
            Self::Classpath => "classpath",
        })
    }
}

/// Errors arising while building a policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    /// A repository URI is not a valid `http`, `https` or `file` URL.
    #[error("invalid repository location \"{uri}\": {reason}")]
    InvalidLocation {
        /// The rejected URI.
        uri: String,
        /// Description of the problem.
        reason: String,
    },

    /// The policy file is not valid TOML for its schema.
    #[error("invalid policy configuration: {reason}")]
    Parse {
        /// Description of the parse failure.
        reason: String,
    },

    /// No cache root was configured and no default could be derived.
    #[error("cannot derive default cache root")]
    Dirs(#[from] DirsError),
}

/// One remote repository, optionally bound to a settings server id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryLocation {
    uri: String,
    server_id: Option<String>,
}

impl RepositoryLocation {
    /// Validate and create a location.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidLocation`] unless `uri` parses as an
    /// `http`, `https` or `file` URL.
    ///
    /// # Examples
    ///
    /// ```
    /// use stubrun_retriever::policy::RepositoryLocation;
    ///
    /// let location = RepositoryLocation::new("https://repo.example.com/stubs/")
    ///     .expect("valid location")
    ///     .with_server_id("my-server");
    /// assert_eq!(location.uri(), "https://repo.example.com/stubs");
    /// assert!(RepositoryLocation::new("ftp://repo.example.com").is_err());
    /// ```
    pub fn new(uri: impl Into<String>) -> Result<Self, PolicyError> {
        let uri = uri.into();
        let parsed = Url::parse(&uri).map_err(|e| PolicyError::InvalidLocation {
            uri: uri.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https" | "file") {
            return Err(PolicyError::InvalidLocation {
                reason: format!("unsupported scheme \"{}\"", parsed.scheme()),
                uri,
            });
        }
        Ok(Self {
            uri: uri.trim_end_matches('/').to_owned(),
            server_id: None,
        })
    }

    /// Bind the location to a settings server id.
    #[must_use]
    pub fn with_server_id(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = Some(server_id.into());
        self
    }

    /// Return the base URI without a trailing slash.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Return the bound server id.
    #[must_use]
    pub fn server_id(&self) -> Option<&str> {
        self.server_id.as_deref()
    }
}

impl fmt::Display for RepositoryLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

/// An immutable resolution policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionPolicy {
    mode: StubsMode,
    cache_root: Utf8PathBuf,
    remote_locations: Vec<RepositoryLocation>,
    prefer_local_over_remote: bool,
    bundle_roots: Vec<Utf8PathBuf>,
}

impl ResolutionPolicy {
    /// Start building a policy for `mode` with the given cache root.
    #[must_use]
    pub fn builder(mode: StubsMode, cache_root: impl Into<Utf8PathBuf>) -> PolicyBuilder {
        PolicyBuilder {
            policy: Self {
                mode,
                cache_root: cache_root.into(),
                remote_locations: Vec::new(),
                prefer_local_over_remote: true,
                bundle_roots: Vec::new(),
            },
        }
    }

    /// Return the mode.
    #[must_use]
    pub fn mode(&self) -> StubsMode {
        self.mode
    }

    /// Return the local cache root.
    #[must_use]
    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    /// Return the remotes in the order they are tried.
    #[must_use]
    pub fn remote_locations(&self) -> &[RepositoryLocation] {
        &self.remote_locations
    }

    /// Return whether the local cache is tried before remotes.
    #[must_use]
    pub fn prefer_local_over_remote(&self) -> bool {
        self.prefer_local_over_remote
    }

    /// Return the bundled stub roots searched in classpath mode.
    #[must_use]
    pub fn bundle_roots(&self) -> &[Utf8PathBuf] {
        &self.bundle_roots
    }

    /// Return true when the local cache is consulted.
    #[must_use]
    pub fn consults_local_cache(&self) -> bool {
        match self.mode {
            StubsMode::LocalOnly => true,
            StubsMode::Remote => self.prefer_local_over_remote,
            StubsMode::Classpath => false,
        }
    }

    /// Return true when remote locations are consulted.
    #[must_use]
    pub fn consults_remotes(&self) -> bool {
        self.mode == StubsMode::Remote
    }

    /// Build a policy from a parsed configuration.
    ///
    /// The cache root falls back to the settings model's local repository
    /// and then to `<home>/.stubrun/repository`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] for invalid remote URIs or when the default
    /// cache root cannot be derived.
    pub fn from_config(
        config: PolicyConfig,
        settings: Option<&SettingsModel>,
        dirs: &dyn BaseDirs,
    ) -> Result<Self, PolicyError> {
        let cache_root = match config.cache_root {
            Some(root) => root,
            None => match settings.and_then(SettingsModel::local_repository) {
                Some(root) => root.to_owned(),
                None => default_cache_root(dirs)?,
            },
        };
        let mut builder = Self::builder(config.mode, cache_root)
            .prefer_local_over_remote(config.prefer_local_over_remote);
        for remote in config.remotes {
            let location = RepositoryLocation::new(remote.uri)?;
            builder = builder.remote(match remote.server_id {
                Some(id) => location.with_server_id(id),
                None => location,
            });
        }
        for root in config.bundle_roots {
            builder = builder.bundle_root(root);
        }
        Ok(builder.build())
    }
}

/// Builder for [`ResolutionPolicy`].
#[derive(Debug, Clone)]
#[must_use]
pub struct PolicyBuilder {
    policy: ResolutionPolicy,
}

impl PolicyBuilder {
    /// Append a remote location.
    pub fn remote(mut self, location: RepositoryLocation) -> Self {
        self.policy.remote_locations.push(location);
        self
    }

    /// Set whether the local cache is tried before remotes.
    pub fn prefer_local_over_remote(mut self, prefer: bool) -> Self {
        self.policy.prefer_local_over_remote = prefer;
        self
    }

    /// Append a bundled stub root.
    pub fn bundle_root(mut self, root: impl Into<Utf8PathBuf>) -> Self {
        self.policy.bundle_roots.push(root.into());
        self
    }

    /// Finish building.
    pub fn build(self) -> ResolutionPolicy {
        self.policy
    }
}

/// TOML form of a remote location.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationConfig {
    /// Base URI.
    pub uri: String,
    /// Settings server id used for credentials.
    #[serde(default)]
    pub server_id: Option<String>,
}

/// TOML form of a resolution policy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    /// Where artifacts may come from.
    pub mode: StubsMode,
    /// Explicit cache root.
    pub cache_root: Option<Utf8PathBuf>,
    /// Remotes in lookup order.
    pub remotes: Vec<LocationConfig>,
    /// Whether the cache is tried before remotes.
    pub prefer_local_over_remote: bool,
    /// Bundled stub roots for classpath mode.
    pub bundle_roots: Vec<Utf8PathBuf>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            mode: StubsMode::default(),
            cache_root: None,
            remotes: Vec::new(),
            prefer_local_over_remote: true,
            bundle_roots: Vec::new(),
        }
    }
}

impl PolicyConfig {
    /// Parse a policy configuration from TOML.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Parse`] for unknown keys or wrong types.
    pub fn from_toml(raw: &str) -> Result<Self, PolicyError> {
        toml::from_str(raw).map_err(|e| PolicyError::Parse {
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dirs::MockBaseDirs;
    use rstest::rstest;
    use std::path::PathBuf;

    fn home_dirs() -> MockBaseDirs {
        let mut dirs = MockBaseDirs::new();
        dirs.expect_home_dir()
            .returning(|| Some(PathBuf::from("/home/test")));
        dirs
    }

    #[test]
    fn builder_defaults_to_preferring_local() {
        let policy = ResolutionPolicy::builder(StubsMode::Remote, "/cache").build();
        assert!(policy.prefer_local_over_remote());
        assert!(policy.consults_local_cache());
        assert!(policy.consults_remotes());
    }

    #[rstest]
    #[case::local_only(StubsMode::LocalOnly, true, true, false)]
    #[case::remote_preferring_local(StubsMode::Remote, true, true, true)]
    #[case::remote_only(StubsMode::Remote, false, false, true)]
    #[case::classpath(StubsMode::Classpath, true, false, false)]
    fn lookup_plan_follows_mode(
        #[case] mode: StubsMode,
        #[case] prefer_local: bool,
        #[case] local: bool,
        #[case] remote: bool,
    ) {
        let policy = ResolutionPolicy::builder(mode, "/cache")
            .prefer_local_over_remote(prefer_local)
            .build();
        assert_eq!(policy.consults_local_cache(), local);
        assert_eq!(policy.consults_remotes(), remote);
    }

    #[test]
    fn parses_toml_config() {
        let config = PolicyConfig::from_toml(
            r#"
mode = "remote"
prefer_local_over_remote = false

[[remotes]]
uri = "https://repo.example.com/stubs/"
server_id = "my-server"

[[remotes]]
uri = "file:///srv/stubs"
"#,
        )
        .expect("parse config");
        let policy =
            ResolutionPolicy::from_config(config, None, &home_dirs()).expect("build policy");
        assert_eq!(policy.mode(), StubsMode::Remote);
        assert!(!policy.prefer_local_over_remote());
        let remotes = policy.remote_locations();
        assert_eq!(remotes.len(), 2);
        assert_eq!(
            remotes.first().map(RepositoryLocation::uri),
            Some("https://repo.example.com/stubs")
        );
        assert_eq!(remotes.first().and_then(RepositoryLocation::server_id), Some("my-server"));
        assert_eq!(remotes.get(1).and_then(RepositoryLocation::server_id), None);
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = PolicyConfig::from_toml("mode = \"local_only\"\nretries = 3\n")
            .expect_err("unknown key");
        assert!(matches!(err, PolicyError::Parse { .. }));
    }

    #[test]
    fn rejects_unsupported_schemes() {
        let config = PolicyConfig {
            mode: StubsMode::Remote,
            remotes: vec![LocationConfig {
                uri: "ftp://repo.example.com".to_owned(),
                server_id: None,
            }],
            ..PolicyConfig::default()
        };
        let err = ResolutionPolicy::from_config(config, None, &home_dirs())
            .expect_err("ftp is unsupported");
        assert!(matches!(err, PolicyError::InvalidLocation { .. }));
    }

    #[test]
    fn cache_root_falls_back_to_settings_then_home() {
        let settings =
            SettingsModel::from_toml("local_repository = \"/srv/repo\"").expect("settings");
        let from_settings =
            ResolutionPolicy::from_config(PolicyConfig::default(), Some(&settings), &home_dirs())
                .expect("policy");
        assert_eq!(from_settings.cache_root(), Utf8Path::new("/srv/repo"));

        let from_home = ResolutionPolicy::from_config(PolicyConfig::default(), None, &home_dirs())
            .expect("policy");
        assert_eq!(
            from_home.cache_root(),
            Utf8Path::new("/home/test/.stubrun/repository")
        );
    }

    #[test]
    fn explicit_cache_root_needs_no_home() {
        let config = PolicyConfig {
            cache_root: Some(Utf8PathBuf::from("/explicit")),
            ..PolicyConfig::default()
        };
        let dirs = MockBaseDirs::new();
        let policy = ResolutionPolicy::from_config(config, None, &dirs).expect("policy");
        assert_eq!(policy.cache_root(), Utf8Path::new("/explicit"));
    }
}
