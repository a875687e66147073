//! At-rest protection for the stored license artifact.
//!
//! Uses XChaCha20-Poly1305 AEAD. The key is derived from a random per-user
//! secret mixed with the host identity. The secret lives in the OS keyring
//! (macOS Keychain, Windows Credential Manager, Secret Service or the kernel
//! keyring on Linux), so copying the store directory does not carry it.
//! Without a usable keyring backend it falls back to an owner-only file in
//! the store directory.

// Allow deprecated from_slice until chacha20poly1305 upgrades to generic-array 1.x
#![allow(deprecated)]

use crate::errors::LicenseResult;
use crate::LicenseError;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use keyring::Entry;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// XChaCha20-Poly1305 nonce size (24 bytes)
const NONCE_SIZE: usize = 24;

/// Envelope header so a foreign or truncated file fails fast.
const MAGIC: &[u8; 4] = b"LWP1";

/// Per-user secret file name inside the store directory.
pub const USER_SECRET_FILE: &str = ".user-secret";

const USER_SECRET_LEN: usize = 32;

/// Keyring account name under the store's service name.
pub const KEYRING_USER: &str = "store-key";

/// Where the per-user secret ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretLocation {
    /// OS keyring entry.
    Keyring,
    /// Owner-only file in the store directory.
    File,
}

/// Backend holding the per-user secret outside the store directory.
pub trait SecretVault {
    /// The stored secret; `Ok(None)` when nothing is stored yet.
    fn load(&self) -> Result<Option<Vec<u8>>, String>;

    /// Store `secret`, replacing any previous value.
    fn store(&self, secret: &[u8]) -> Result<(), String>;
}

/// [`SecretVault`] over an OS keyring entry.
pub struct KeyringVault {
    entry: Entry,
}

impl KeyringVault {
    /// Entry `service` / [`KEYRING_USER`]. `None` when no backend can be created.
    pub fn new(service: &str) -> Option<Self> {
        match Entry::new(service, KEYRING_USER) {
            Ok(entry) => Some(Self { entry }),
            Err(e) => {
                warn!(service, error = %e, "OS keyring unavailable");
                None
            }
        }
    }
}

impl SecretVault for KeyringVault {
    fn load(&self) -> Result<Option<Vec<u8>>, String> {
        match self.entry.get_secret() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.to_string()),
        }
    }

    fn store(&self, secret: &[u8]) -> Result<(), String> {
        self.entry.set_secret(secret).map_err(|e| e.to_string())
    }
}

/// Encrypts and decrypts blobs on behalf of the credential store.
pub trait SecretProtector: Send + Sync {
    /// Encrypt `plaintext` into an opaque envelope.
    fn protect(&self, plaintext: &[u8]) -> LicenseResult<Vec<u8>>;

    /// Reverse of [`SecretProtector::protect`]; fails on any tampering.
    fn unprotect(&self, envelope: &[u8]) -> LicenseResult<Vec<u8>>;
}

/// Default protector keyed by a per-user secret and the host identity.
pub struct UserKeyProtector {
    key: [u8; 32],
}

impl UserKeyProtector {
    /// Open (creating if needed) the per-user secret in the OS keyring under
    /// `service`, falling back to a file under `dir`.
    pub fn open_with_keyring(service: &str, dir: &Path) -> LicenseResult<Self> {
        let vault = KeyringVault::new(service);
        let (secret, _) =
            resolve_user_secret(vault.as_ref().map(|v| v as &dyn SecretVault), dir)?;
        Ok(Self::from_secret(&secret, &machine_identity()))
    }

    /// Open (creating if needed) the per-user secret file under `dir`.
    ///
    /// For explicitly rooted stores such as tests and portable installs; the
    /// key material then travels with the directory.
    pub fn open(dir: &Path) -> LicenseResult<Self> {
        let secret = load_or_create_user_secret(&dir.join(USER_SECRET_FILE))?;
        Ok(Self::from_secret(&secret, &machine_identity()))
    }

    /// Derive the key from explicit material.
    pub fn from_secret(secret: &[u8], machine: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"licensewarden-store-key:v1:");
        hasher.update(secret);
        hasher.update(b":");
        hasher.update(machine.as_bytes());
        Self {
            key: hasher.finalize().into(),
        }
    }

    fn cipher(&self) -> LicenseResult<XChaCha20Poly1305> {
        XChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|e| LicenseError::Encryption(format!("Failed to create cipher: {}", e)))
    }
}

impl SecretProtector for UserKeyProtector {
    fn protect(&self, plaintext: &[u8]) -> LicenseResult<Vec<u8>> {
        let cipher = self.cipher()?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| LicenseError::Encryption(format!("Encryption failed: {}", e)))?;

        let mut envelope = Vec::with_capacity(MAGIC.len() + NONCE_SIZE + ciphertext.len());
        envelope.extend_from_slice(MAGIC);
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&ciphertext);
        Ok(envelope)
    }

    fn unprotect(&self, envelope: &[u8]) -> LicenseResult<Vec<u8>> {
        let body = envelope
            .strip_prefix(MAGIC.as_slice())
            .ok_or_else(|| LicenseError::Encryption("Unrecognized envelope".to_string()))?;

        if body.len() < NONCE_SIZE {
            return Err(LicenseError::Encryption("Envelope too small".to_string()));
        }

        let (nonce_bytes, ciphertext) = body.split_at(NONCE_SIZE);
        let nonce = XNonce::from_slice(nonce_bytes);

        self.cipher()?
            .decrypt(nonce, ciphertext)
            .map_err(|e| LicenseError::Encryption(format!("Decryption failed: {}", e)))
    }
}

/// Stable identity of the host, mixed into the derived key.
pub fn machine_identity() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown-host".to_string())
}

/// Find or create the per-user secret, preferring `vault`.
///
/// A file secret left by an earlier keyring-less run is moved into the vault
/// so stored artifacts stay readable.
pub fn resolve_user_secret(
    vault: Option<&dyn SecretVault>,
    dir: &Path,
) -> LicenseResult<(Vec<u8>, SecretLocation)> {
    let file = dir.join(USER_SECRET_FILE);

    if let Some(vault) = vault {
        match vault.load() {
            Ok(Some(secret)) if secret.len() == USER_SECRET_LEN => {
                return Ok((secret, SecretLocation::Keyring));
            }
            Ok(Some(secret)) => {
                warn!(len = secret.len(), "Keyring secret malformed; using file secret");
            }
            Ok(None) => {
                let existing = fs::read(&file).ok().filter(|s| s.len() == USER_SECRET_LEN);
                let secret = existing.clone().unwrap_or_else(|| {
                    let mut fresh = vec![0u8; USER_SECRET_LEN];
                    rand::thread_rng().fill_bytes(&mut fresh);
                    fresh
                });
                match vault.store(&secret) {
                    Ok(()) => {
                        if existing.is_some() {
                            let _ = fs::remove_file(&file);
                            debug!("Moved user secret into the OS keyring");
                        }
                        return Ok((secret, SecretLocation::Keyring));
                    }
                    Err(e) => warn!(error = %e, "OS keyring rejected user secret; using file secret"),
                }
            }
            Err(e) => warn!(error = %e, "OS keyring unreadable; using file secret"),
        }
    }

    load_or_create_user_secret(&file).map(|secret| (secret, SecretLocation::File))
}

/// Read the per-user secret, creating it exclusively on first use.
///
/// Two processes racing on first use both end up reading the winner's file.
fn load_or_create_user_secret(path: &Path) -> LicenseResult<Vec<u8>> {
    for attempt in 0..3u32 {
        match fs::read(path) {
            Ok(bytes) if bytes.len() == USER_SECRET_LEN => return Ok(bytes),
            Ok(bytes) => {
                // A concurrent creator may still be writing.
                debug!(len = bytes.len(), attempt, "User secret incomplete, retrying");
                std::thread::sleep(Duration::from_millis(20 * u64::from(attempt + 1)));
                continue;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(LicenseError::Encryption(format!(
                    "Failed to read user secret: {}",
                    e
                )))
            }
        }

        match create_user_secret(path) {
            Ok(secret) => return Ok(secret),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(LicenseError::Encryption(format!(
                    "Failed to create user secret: {}",
                    e
                )))
            }
        }
    }

    warn!(path = %path.display(), "User secret unreadable");
    Err(LicenseError::Encryption("User secret unreadable".to_string()))
}

fn create_user_secret(path: &Path) -> std::io::Result<Vec<u8>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    let mut secret = vec![0u8; USER_SECRET_LEN];
    rand::thread_rng().fill_bytes(&mut secret);
    file.write_all(&secret)?;
    file.sync_all()?;
    debug!(path = %path.display(), "Created user secret");
    Ok(secret)
}

/// Path of the per-user secret for a store directory.
pub fn user_secret_path(dir: &Path) -> PathBuf {
    dir.join(USER_SECRET_FILE)
}
