//! Layered settings model.
//!
//! Settings come from up to two TOML files: a default (global) layer and an
//! optional override (user) layer. The override wins for every key, and
//! within one layer the first `[[servers]]` entry for an id wins.
//!
//! ```toml
//! local_repository = "/var/cache/stubs"
//!
//! [[servers]]
//! id = "my-server"
//! username = "admin"
//! password = "{base64 payload}"
//! ```
//!
//! Encrypted passwords are decrypted with the master password read from a
//! separate security file (`master = "..."`). A missing file is an empty
//! layer; an unreadable or malformed file is a [`SettingsError`]. A master
//! password that cannot be decrypted only fails lookups that need it.

pub mod cipher;

use crate::dirs::{BaseDirs, DirsError, stubrun_home};
use camino::{Utf8Path, Utf8PathBuf};
use cipher::{CipherError, MASTER_PASSPHRASE, MasterPasswordDecryptor, is_encrypted};
use serde::Deserialize;
use std::io;

/// Environment variable naming the override (user) settings file.
pub const SETTINGS_ENV: &str = "STUBRUN_SETTINGS";

/// Environment variable naming the default (global) settings file.
pub const GLOBAL_SETTINGS_ENV: &str = "STUBRUN_GLOBAL_SETTINGS";

/// Environment variable naming the master password file.
pub const SETTINGS_SECURITY_ENV: &str = "STUBRUN_SETTINGS_SECURITY";

/// Errors arising while loading settings files.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    /// A settings file exists but could not be read.
    #[error("failed to read settings file {path}: {reason}")]
    Read {
        /// The file that failed.
        path: Utf8PathBuf,
        /// Description of the I/O failure.
        reason: String,
    },

    /// A settings file is not valid TOML for its schema.
    #[error("invalid settings file {path}: {reason}")]
    Parse {
        /// The file that failed.
        path: Utf8PathBuf,
        /// Description of the parse failure.
        reason: String,
    },

    /// Default settings paths could not be derived.
    #[error("cannot derive default settings paths")]
    Dirs(#[from] DirsError),
}

/// Locations of the settings files.
///
/// Every path is optional; a configured path that does not exist is treated
/// as an empty layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsSource {
    /// Default (global) settings layer.
    pub default: Option<Utf8PathBuf>,
    /// Override (user) settings layer.
    pub user: Option<Utf8PathBuf>,
    /// Master password file.
    pub security: Option<Utf8PathBuf>,
}

impl SettingsSource {
    /// Build a source from the `STUBRUN_*` environment variables, falling
    /// back to `<home>/.stubrun/settings.toml` and
    /// `<home>/.stubrun/settings-security.toml`. The default layer has no
    /// fallback.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Dirs`] when a fallback is needed and the
    /// home directory cannot be determined.
    pub fn from_env(dirs: &dyn BaseDirs) -> Result<Self, SettingsError> {
        let user = match env_path(SETTINGS_ENV) {
            Some(path) => path,
            None => stubrun_home(dirs)?.join("settings.toml"),
        };
        let security = match env_path(SETTINGS_SECURITY_ENV) {
            Some(path) => path,
            None => stubrun_home(dirs)?.join("settings-security.toml"),
        };
        Ok(Self {
            default: env_path(GLOBAL_SETTINGS_ENV),
            user: Some(user),
            security: Some(security),
        })
    }

    /// Load both layers and the master password.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] when any configured file exists but cannot
    /// be read or parsed.
    pub fn load(&self) -> Result<LoadedSettings, SettingsError> {
        let user = load_layer(self.user.as_deref())?;
        let default = load_layer(self.default.as_deref())?;
        let decryptor = match self.security.as_deref() {
            Some(path) => load_master(path)?,
            None => MasterPasswordDecryptor::default(),
        };
        Ok(LoadedSettings {
            model: SettingsModel::layered(user, default),
            decryptor,
        })
    }
}

fn env_path(name: &str) -> Option<Utf8PathBuf> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(Utf8PathBuf::from)
}

/// One `[[servers]]` entry.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerEntry {
    /// Server identifier referenced by repository locations.
    pub id: String,
    /// User name.
    #[serde(default)]
    pub username: Option<String>,
    /// Password, plain or `{...}` encrypted.
    #[serde(default)]
    pub password: Option<String>,
}

impl std::fmt::Debug for ServerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerEntry")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SettingsLayer {
    local_repository: Option<Utf8PathBuf>,
    servers: Vec<ServerEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SecurityFile {
    master: Option<String>,
}

/// The effective settings after layering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsModel {
    local_repository: Option<Utf8PathBuf>,
    servers: Vec<ServerEntry>,
}

impl SettingsModel {
    fn layered(user: SettingsLayer, default: SettingsLayer) -> Self {
        Self {
            local_repository: user.local_repository.or(default.local_repository),
            servers: user.servers.into_iter().chain(default.servers).collect(),
        }
    }

    /// Parse a model from a single TOML document.
    ///
    /// # Errors
    ///
    /// Returns the TOML error when the document does not match the schema.
    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        let layer: SettingsLayer = toml::from_str(raw)?;
        Ok(Self::layered(layer, SettingsLayer::default()))
    }

    /// Return the configured local repository, if any.
    #[must_use]
    pub fn local_repository(&self) -> Option<&Utf8Path> {
        self.local_repository.as_deref()
    }

    /// Return the effective entry for `id`.
    #[must_use]
    pub fn server(&self, id: &str) -> Option<&ServerEntry> {
        self.servers.iter().find(|server| server.id == id)
    }
}

/// A loaded settings model together with its password decryptor.
#[derive(Debug, Clone)]
pub struct LoadedSettings {
    /// Effective settings.
    pub model: SettingsModel,
    /// Decryptor keyed by the configured master password.
    pub decryptor: MasterPasswordDecryptor,
}

fn read_optional(path: &Utf8Path) -> Result<Option<String>, SettingsError> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::debug!("settings file {path} not present; using an empty layer");
            Ok(None)
        }
        Err(e) => Err(SettingsError::Read {
            path: path.to_owned(),
            reason: e.to_string(),
        }),
    }
}

fn parse_file<T: serde::de::DeserializeOwned>(
    path: &Utf8Path,
    raw: &str,
) -> Result<T, SettingsError> {
    toml::from_str(raw).map_err(|e| SettingsError::Parse {
        path: path.to_owned(),
        reason: e.to_string(),
    })
}

fn load_layer(path: Option<&Utf8Path>) -> Result<SettingsLayer, SettingsError> {
    let Some(path) = path else {
        return Ok(SettingsLayer::default());
    };
    match read_optional(path)? {
        Some(raw) => parse_file(path, &raw),
        None => Ok(SettingsLayer::default()),
    }
}

fn load_master(path: &Utf8Path) -> Result<MasterPasswordDecryptor, SettingsError> {
    let Some(raw) = read_optional(path)? else {
        return Ok(MasterPasswordDecryptor::default());
    };
    let file: SecurityFile = parse_file(path, &raw)?;
    match file.master {
        Some(master) if is_encrypted(&master) => {
            match cipher::decrypt(&master, MASTER_PASSPHRASE) {
                Ok(plain) => Ok(MasterPasswordDecryptor::new(Some(plain))),
                Err(e) => {
                    log::warn!("cannot decrypt master password in {path}: {e}");
                    Ok(MasterPasswordDecryptor::unusable(
                        CipherError::InvalidMaster {
                            path: path.to_string(),
                        },
                    ))
                }
            }
        }
        other => Ok(MasterPasswordDecryptor::new(other)),
    }
}
