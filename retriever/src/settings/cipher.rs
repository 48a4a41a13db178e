//! Encrypted settings passwords.
//!
//! An encrypted value is written as `{<base64>}` where the payload is a
//! 12-byte nonce followed by a ChaCha20-Poly1305 ciphertext. The key is the
//! SHA-256 digest of a passphrase: the master password for server
//! passwords, and the fixed [`MASTER_PASSPHRASE`] for an encrypted master.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Passphrase protecting an encrypted master password.
pub const MASTER_PASSPHRASE: &str = "settings.security";

const NONCE_SIZE: usize = 12;

/// Errors arising from password encryption and decryption.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CipherError {
    /// An encrypted password was found but no master password is configured.
    #[error("encrypted password found but no master password is configured")]
    MissingMaster,

    /// The configured master password could not itself be decrypted.
    #[error("master password in {path} cannot be decrypted")]
    InvalidMaster {
        /// The security file holding the master password.
        path: String,
    },

    /// The `{...}` payload is not valid base64 or is too short.
    #[error("malformed encrypted password: {reason}")]
    Malformed {
        /// Description of the problem.
        reason: String,
    },

    /// Authentication failed, usually because of a wrong passphrase.
    #[error("password decryption failed")]
    Decrypt,

    /// Encryption failed.
    #[error("password encryption failed")]
    Encrypt,
}

/// Decrypts password values read from settings.
pub trait PasswordDecryptor: Send + Sync {
    /// Return the plain-text form of `value`.
    ///
    /// Values that are not in `{...}` form are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError`] when an encrypted value cannot be decrypted.
    fn decrypt(&self, value: &str) -> Result<String, CipherError>;
}

#[derive(Clone, Default)]
enum Master {
    #[default]
    Absent,
    Known(String),
    Unusable(CipherError),
}

/// Decryptor keyed by the settings master password.
#[derive(Clone, Default)]
pub struct MasterPasswordDecryptor {
    master: Master,
}

impl MasterPasswordDecryptor {
    /// Create a decryptor. Without a master password only plain-text values
    /// can be read.
    #[must_use]
    pub fn new(master: Option<String>) -> Self {
        Self {
            master: master.map_or(Master::Absent, Master::Known),
        }
    }

    /// Create a decryptor whose master password failed to load.
    ///
    /// Plain-text values still pass through; every encrypted value fails
    /// with `failure`.
    #[must_use]
    pub fn unusable(failure: CipherError) -> Self {
        Self {
            master: Master::Unusable(failure),
        }
    }
}

impl std::fmt::Debug for MasterPasswordDecryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let master = match &self.master {
            Master::Absent => "<absent>",
            Master::Known(_) => "<redacted>",
            Master::Unusable(_) => "<unusable>",
        };
        f.debug_struct("MasterPasswordDecryptor")
            .field("master", &master)
            .finish()
    }
}

impl PasswordDecryptor for MasterPasswordDecryptor {
    fn decrypt(&self, value: &str) -> Result<String, CipherError> {
        if !is_encrypted(value) {
            return Ok(value.to_owned());
        }
        match &self.master {
            Master::Known(master) => decrypt(value, master),
            Master::Absent => Err(CipherError::MissingMaster),
            Master::Unusable(failure) => Err(failure.clone()),
        }
    }
}

/// Return true when `value` uses the `{...}` encrypted form.
#[must_use]
pub fn is_encrypted(value: &str) -> bool {
    value.len() >= 2 && value.starts_with('{') && value.ends_with('}')
}

fn cipher_for(passphrase: &str) -> ChaCha20Poly1305 {
    let key = Sha256::digest(passphrase.as_bytes());
    ChaCha20Poly1305::new(&key)
}

/// Encrypt `plain` under `passphrase`, returning the `{...}` form.
///
/// # Errors
///
/// Returns [`CipherError::Encrypt`] if the cipher rejects the input.
///
/// # Examples
///
/// ```
/// use stubrun_retriever::settings::cipher::{decrypt, encrypt, is_encrypted};
///
/// let sealed = encrypt("mypassword", "master").expect("encrypt");
/// assert!(is_encrypted(&sealed));
/// assert_eq!(decrypt(&sealed, "master").expect("decrypt"), "mypassword");
/// ```
pub fn encrypt(plain: &str, passphrase: &str) -> Result<String, CipherError> {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce);
    let ciphertext = cipher_for(passphrase)
        .encrypt(Nonce::from_slice(&nonce), plain.as_bytes())
        .map_err(|_| CipherError::Encrypt)?;
    let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    payload.extend_from_slice(&nonce);
    payload.extend_from_slice(&ciphertext);
    Ok(format!("{{{}}}", STANDARD.encode(payload)))
}

/// Decrypt a `{...}` value under `passphrase`.
///
/// # Errors
///
/// Returns [`CipherError::Malformed`] for values that are not valid
/// encrypted payloads and [`CipherError::Decrypt`] when authentication
/// fails.
pub fn decrypt(value: &str, passphrase: &str) -> Result<String, CipherError> {
    let inner = value
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
        .ok_or_else(|| CipherError::Malformed {
            reason: "value is not wrapped in braces".to_owned(),
        })?;
    let payload = STANDARD
        .decode(inner.trim())
        .map_err(|e| CipherError::Malformed {
            reason: e.to_string(),
        })?;
    if payload.len() <= NONCE_SIZE {
        return Err(CipherError::Malformed {
            reason: format!("payload shorter than {NONCE_SIZE}-byte nonce"),
        });
    }
    let (nonce, ciphertext) = payload.split_at(NONCE_SIZE);
    let plain = cipher_for(passphrase)
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CipherError::Decrypt)?;
    String::from_utf8(plain).map_err(|e| CipherError::Malformed {
        reason: e.to_string(),
    })
}
