//! Repository credentials resolved from the settings model.
//!
//! [`CredentialStore`] is the seam the fetcher and resolver talk to. The
//! production [`SettingsCredentialStore`] loads the settings files at most
//! once, on first use, and memoizes every successfully resolved server id
//! for its own lifetime.

use crate::settings::cipher::{CipherError, PasswordDecryptor};
use crate::settings::{LoadedSettings, SettingsError, SettingsModel, SettingsSource};
use dashmap::DashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// A username/password pair for one repository server.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    username: String,
    password: String,
}

impl Credential {
    /// Create a credential.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Return the user name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Return the plain-text password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Errors arising while resolving credentials for a server id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    /// The settings model could not be loaded.
    #[error("settings unavailable")]
    Settings(#[from] SettingsError),

    /// The server's password could not be decrypted.
    #[error("cannot decrypt password for server {server_id}")]
    Decrypt {
        /// The server whose password failed.
        server_id: String,
        /// The decryption failure.
        #[source]
        source: CipherError,
    },
}

/// Resolves credentials for repository server identifiers.
#[cfg_attr(test, mockall::automock)]
pub trait CredentialStore: Send + Sync {
    /// Return the credential for `server_id`, or `None` for anonymous
    /// access.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] when the entry exists but cannot be
    /// turned into a credential.
    fn credentials_for(&self, server_id: &str) -> Result<Option<Credential>, CredentialError>;

    /// Load any backing settings eagerly.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] when the backing settings are unusable.
    fn ensure_loaded(&self) -> Result<(), SettingsError> {
        Ok(())
    }
}

/// Resolve credentials for an optional server id, degrading to anonymous
/// access when the lookup fails.
pub(crate) fn credential_or_anonymous(
    store: &dyn CredentialStore,
    server_id: Option<&str>,
) -> Option<Credential> {
    let server_id = server_id?;
    match store.credentials_for(server_id) {
        Ok(credential) => credential,
        Err(e) => {
            log::warn!("using anonymous access for server {server_id}: {e}");
            None
        }
    }
}

/// [`CredentialStore`] backed by layered settings files.
pub struct SettingsCredentialStore {
    source: SettingsSource,
    decryptor: Option<Arc<dyn PasswordDecryptor>>,
    loaded: OnceLock<Result<LoadedSettings, SettingsError>>,
    memo: DashMap<String, Option<Credential>>,
}

impl SettingsCredentialStore {
    /// Create a store reading `source` lazily.
    #[must_use]
    pub fn new(source: SettingsSource) -> Self {
        Self {
            source,
            decryptor: None,
            loaded: OnceLock::new(),
            memo: DashMap::new(),
        }
    }

    /// Replace the master-password decryptor.
    #[must_use]
    pub fn with_decryptor(mut self, decryptor: Arc<dyn PasswordDecryptor>) -> Self {
        self.decryptor = Some(decryptor);
        self
    }

    fn loaded(&self) -> Result<&LoadedSettings, SettingsError> {
        self.loaded
            .get_or_init(|| self.source.load())
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Return the effective settings model, loading it if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] when the settings files are unusable.
    pub fn settings(&self) -> Result<&SettingsModel, SettingsError> {
        self.loaded().map(|loaded| &loaded.model)
    }

    fn resolve(&self, server_id: &str) -> Result<Option<Credential>, CredentialError> {
        let loaded = self.loaded()?;
        let Some(entry) = loaded.model.server(server_id) else {
            log::debug!("no credentials configured for server {server_id}");
            return Ok(None);
        };
        let decryptor: &dyn PasswordDecryptor = match &self.decryptor {
            Some(custom) => custom.as_ref(),
            None => &loaded.decryptor,
        };
        let password = match entry.password.as_deref() {
            Some(raw) => decryptor
                .decrypt(raw)
                .map_err(|source| CredentialError::Decrypt {
                    server_id: server_id.to_owned(),
                    source,
                })?,
            None => String::new(),
        };
        let username = entry.username.clone().unwrap_or_default();
        Ok(Some(Credential::new(username, password)))
    }
}

impl fmt::Debug for SettingsCredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsCredentialStore")
            .field("source", &self.source)
            .field("memoized", &self.memo.len())
            .finish_non_exhaustive()
    }
}

impl CredentialStore for SettingsCredentialStore {
    fn credentials_for(&self, server_id: &str) -> Result<Option<Credential>, CredentialError> {
        if let Some(hit) = self.memo.get(server_id) {
            return Ok(hit.value().clone());
        }
        let resolved = self.resolve(server_id)?;
        self.memo.insert(server_id.to_owned(), resolved.clone());
        Ok(resolved)
    }

    fn ensure_loaded(&self) -> Result<(), SettingsError> {
        self.loaded().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::cipher;
    use camino::{Utf8Path, Utf8PathBuf};
    use rstest::{fixture, rstest};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Sandbox {
        _dir: tempfile::TempDir,
        root: Utf8PathBuf,
    }

    impl Sandbox {
        fn write(&self, name: &str, body: &str) -> Utf8PathBuf {
            let path = self.root.join(name);
            std::fs::write(&path, body).expect("write file");
            path
        }
    }

    #[fixture]
    fn sandbox() -> Sandbox {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).expect("UTF-8 path");
        Sandbox { _dir: dir, root }
    }

    fn store_with_encrypted_server(sandbox: &Sandbox) -> SettingsCredentialStore {
        let security = sandbox.write("security.toml", "master = \"master-secret\"");
        let password = cipher::encrypt("mypassword", "master-secret").expect("encrypt");
        let user = sandbox.write(
            "settings.toml",
            &format!(
                "[[servers]]\nid = \"my-server\"\nusername = \"admin\"\npassword = \"{password}\"\n"
            ),
        );
        SettingsCredentialStore::new(SettingsSource {
            default: None,
            user: Some(user),
            security: Some(security),
        })
    }

    #[rstest]
    fn decrypts_configured_server(sandbox: Sandbox) {
        let store = store_with_encrypted_server(&sandbox);
        let credential = store
            .credentials_for("my-server")
            .expect("resolve")
            .expect("credential present");
        assert_eq!(credential.username(), "admin");
        assert_eq!(credential.password(), "mypassword");
    }

    #[rstest]
    fn unknown_server_is_anonymous(sandbox: Sandbox) {
        let store = store_with_encrypted_server(&sandbox);
        assert_eq!(store.credentials_for("unknown-server").expect("resolve"), None);
    }

    #[rstest]
    fn settings_are_read_once(sandbox: Sandbox) {
        let store = store_with_encrypted_server(&sandbox);
        store.credentials_for("my-server").expect("resolve");
        std::fs::remove_file(sandbox.root.join("settings.toml")).expect("remove settings");
        let again = store.credentials_for("my-server").expect("resolve");
        assert!(again.is_some());
    }

    #[rstest]
    fn decryption_failure_is_reported_per_call(sandbox: Sandbox) {
        let password = cipher::encrypt("mypassword", "some-master").expect("encrypt");
        let user = sandbox.write(
            "settings.toml",
            &format!(
                "[[servers]]\nid = \"broken\"\npassword = \"{password}\"\n\n\
                 [[servers]]\nid = \"plain\"\nusername = \"u\"\npassword = \"p\"\n"
            ),
        );
        let store = SettingsCredentialStore::new(SettingsSource {
            user: Some(user),
            ..SettingsSource::default()
        });
        let err = store.credentials_for("broken").expect_err("no master configured");
        assert!(matches!(
            err,
            CredentialError::Decrypt { ref server_id, .. } if server_id == "broken"
        ));
        let plain = store.credentials_for("plain").expect("resolve");
        assert_eq!(plain, Some(Credential::new("u", "p")));
    }

    #[rstest]
    fn undecryptable_master_fails_only_encrypted_lookups(sandbox: Sandbox) {
        let master = cipher::encrypt("master-secret", "not-the-fixed-passphrase").expect("encrypt");
        let security = sandbox.write("security.toml", &format!("master = \"{master}\""));
        let password = cipher::encrypt("mypassword", "master-secret").expect("encrypt");
        let user = sandbox.write(
            "settings.toml",
            &format!(
                "[[servers]]\nid = \"my-server\"\npassword = \"{password}\"\n\n\
                 [[servers]]\nid = \"plain\"\nusername = \"u\"\npassword = \"p\"\n"
            ),
        );
        let store = SettingsCredentialStore::new(SettingsSource {
            default: None,
            user: Some(user),
            security: Some(security),
        });

        store.ensure_loaded().expect("settings load");
        let err = store.credentials_for("my-server").expect_err("master unusable");
        assert!(matches!(
            err,
            CredentialError::Decrypt {
                source: CipherError::InvalidMaster { .. },
                ..
            }
        ));
        assert_eq!(
            store.credentials_for("plain").expect("resolve"),
            Some(Credential::new("u", "p"))
        );
        assert_eq!(store.credentials_for("unknown-server").expect("resolve"), None);
    }

    #[rstest]
    fn malformed_settings_fail_loading(sandbox: Sandbox) {
        let user = sandbox.write("settings.toml", "[[servers]]\nid = 42\n");
        let store = SettingsCredentialStore::new(SettingsSource {
            user: Some(user),
            ..SettingsSource::default()
        });
        assert!(store.ensure_loaded().is_err());
        assert!(matches!(
            store.credentials_for("any"),
            Err(CredentialError::Settings(_))
        ));
    }

    struct CountingDecryptor(AtomicUsize);

    impl PasswordDecryptor for CountingDecryptor {
        fn decrypt(&self, value: &str) -> Result<String, CipherError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(value.to_uppercase())
        }
    }

    #[rstest]
    fn custom_decryptor_is_used_and_results_memoized(sandbox: Sandbox) {
        let user = sandbox.write(
            "settings.toml",
            "[[servers]]\nid = \"s\"\nusername = \"u\"\npassword = \"secret\"\n",
        );
        let decryptor = Arc::new(CountingDecryptor(AtomicUsize::new(0)));
        let store = SettingsCredentialStore::new(SettingsSource {
            user: Some(user),
            ..SettingsSource::default()
        })
        .with_decryptor(decryptor.clone());
        for _ in 0..3 {
            let credential = store.credentials_for("s").expect("resolve").expect("present");
            assert_eq!(credential.password(), "SECRET");
        }
        assert_eq!(decryptor.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn credential_debug_redacts_password() {
        let credential = Credential::new("admin", "hunter2");
        let rendered = format!("{credential:?}");
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn store_exposes_local_repository() {
        let store = SettingsCredentialStore::new(SettingsSource::default());
        let model = store.settings().expect("empty settings load");
        assert_eq!(model.local_repository(), None::<&Utf8Path>);
    }
}
