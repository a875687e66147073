//! Encrypted, crash-safe persistence of the active license.
//!
//! Stores one protected artifact file plus a plaintext metadata file under
//! `$LICENSEWARDEN_HOME` or `dirs::data_dir()/<namespace>/`.
//! Writes are serialized in-process by a mutex and across processes by a
//! named lock; every write is temp file + rename.

use crate::crypto::protect::{SecretProtector, UserKeyProtector};
use crate::errors::LicenseResult;
use crate::protocol::models::SignedLicense;
use crate::store::atomic::write_atomic_with;
use crate::store::lock::NamedLock;
use crate::store::metadata::{read_metadata, write_metadata, LicenseMetadata};
use crate::LicenseError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Environment variable overriding the store directory.
pub const HOME_ENV: &str = "LICENSEWARDEN_HOME";

/// Protected artifact file name.
pub const LICENSE_FILE: &str = "license.dat";

/// Plaintext metadata file name.
pub const METADATA_FILE: &str = "license_meta.json";

const LICENSE_LOCK_FILE: &str = "license.lock";
const METADATA_LOCK_FILE: &str = "license_meta.lock";

/// Attempts made by [`CredentialStore::load_raw`] before giving up.
const LOAD_ATTEMPTS: u32 = 3;
const LOAD_BACKOFF: Duration = Duration::from_millis(50);

/// Credential store for exactly one active license.
pub struct CredentialStore {
    dir: PathBuf,
    license_path: PathBuf,
    metadata_path: PathBuf,
    protector: Box<dyn SecretProtector>,
    write_guard: Mutex<()>,
    license_lock: NamedLock,
    metadata_lock: NamedLock,
}

impl CredentialStore {
    /// Open the store for `namespace`.
    ///
    /// Uses `$LICENSEWARDEN_HOME` when set, else `dirs::data_dir()/<namespace>/`.
    pub fn open(namespace: &str) -> LicenseResult<Self> {
        let dir = match std::env::var_os(HOME_ENV) {
            Some(home) if !home.is_empty() => PathBuf::from(home),
            _ => dirs::data_dir()
                .ok_or_else(|| {
                    LicenseError::StorageIO("Could not find data directory".to_string())
                })?
                .join(namespace),
        };
        fs::create_dir_all(&dir)
            .map_err(|e| LicenseError::StorageIO(format!("Failed to create store dir: {}", e)))?;
        let protector = UserKeyProtector::open_with_keyring(namespace, &dir)?;
        Self::with_protector(dir, Box::new(protector))
    }

    /// Open a store rooted at `dir` whose per-user secret is a file in `dir`.
    pub fn with_path(dir: PathBuf) -> LicenseResult<Self> {
        fs::create_dir_all(&dir)
            .map_err(|e| LicenseError::StorageIO(format!("Failed to create store dir: {}", e)))?;
        let protector = UserKeyProtector::open(&dir)?;
        Self::with_protector(dir, Box::new(protector))
    }

    /// Open a store rooted at `dir` with a custom protector.
    pub fn with_protector(dir: PathBuf, protector: Box<dyn SecretProtector>) -> LicenseResult<Self> {
        fs::create_dir_all(&dir)
            .map_err(|e| LicenseError::StorageIO(format!("Failed to create store dir: {}", e)))?;

        Ok(Self {
            license_path: dir.join(LICENSE_FILE),
            metadata_path: dir.join(METADATA_FILE),
            license_lock: NamedLock::new(dir.join(LICENSE_LOCK_FILE)),
            metadata_lock: NamedLock::new(dir.join(METADATA_LOCK_FILE)),
            protector,
            write_guard: Mutex::new(()),
            dir,
        })
    }

    /// Store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the protected artifact file.
    pub fn license_path(&self) -> &Path {
        &self.license_path
    }

    /// Path of the plaintext metadata file.
    pub fn metadata_path(&self) -> &Path {
        &self.metadata_path
    }

    /// Persist `license` as the active artifact.
    ///
    /// If the cross-process lock cannot be acquired in time the write still
    /// happens; the atomic rename keeps the file whole either way.
    pub fn save(&self, license: &SignedLicense) -> LicenseResult<()> {
        self.save_with(license, |_| Ok(()))
    }

    fn save_with<F>(&self, license: &SignedLicense, before_commit: F) -> LicenseResult<()>
    where
        F: FnOnce(&Path) -> std::io::Result<()>,
    {
        let json = license.to_json()?;
        let envelope = self.protector.protect(json.as_bytes())?;

        {
            let _in_process = self.write_guard.lock().unwrap_or_else(|e| e.into_inner());
            let cross_process = self.license_lock.acquire();
            if cross_process.is_none() {
                warn!(
                    license_id = %license.payload.license_id,
                    "Saving license without cross-process lock"
                );
            }
            write_atomic_with(&self.license_path, &envelope, before_commit)?;
        }

        let fingerprint = license.key_fingerprint.clone();
        self.update_metadata(|metadata| metadata.key_fingerprint = Some(fingerprint));

        info!(license_id = %license.payload.license_id, "License saved");
        Ok(())
    }

    /// Load the active artifact.
    ///
    /// Absence and corruption both yield `None`. Unreadable files are retried
    /// a few times in case a concurrent writer is mid-replace.
    pub fn load_raw(&self) -> Option<SignedLicense> {
        for attempt in 1..=LOAD_ATTEMPTS {
            match self.try_load() {
                Ok(found) => return found,
                Err(e) => {
                    debug!(attempt, error = %e, "License load failed");
                    if attempt < LOAD_ATTEMPTS {
                        thread::sleep(LOAD_BACKOFF * attempt);
                    } else {
                        warn!(error = %e, "Stored license unreadable");
                    }
                }
            }
        }
        None
    }

    fn try_load(&self) -> LicenseResult<Option<SignedLicense>> {
        let envelope = match fs::read(&self.license_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(LicenseError::StorageIO(format!(
                    "Failed to read license: {}",
                    e
                )))
            }
        };

        let plaintext = self.protector.unprotect(&envelope)?;
        let json = std::str::from_utf8(&plaintext)
            .map_err(|e| LicenseError::ProtocolError(format!("Invalid UTF-8 in license: {}", e)))?;
        SignedLicense::from_json(json).map(Some)
    }

    /// Load metadata; `None` when absent or unreadable.
    pub fn load_metadata(&self) -> Option<LicenseMetadata> {
        match read_metadata(&self.metadata_path) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(error = %e, "Metadata unreadable");
                None
            }
        }
    }

    /// Read-modify-write the metadata record. Returns whether it was written.
    ///
    /// A missing or unreadable record starts from defaults.
    pub fn update_metadata(&self, update: impl FnOnce(&mut LicenseMetadata)) -> bool {
        let _in_process = self.write_guard.lock().unwrap_or_else(|e| e.into_inner());
        let _cross_process = self.metadata_lock.acquire();

        let mut metadata = self.load_metadata().unwrap_or_default();
        update(&mut metadata);

        match write_metadata(&self.metadata_path, &metadata) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Metadata write failed");
                false
            }
        }
    }

    /// Remove the artifact and metadata (uninstall).
    pub fn clear(&self) -> LicenseResult<()> {
        let _in_process = self.write_guard.lock().unwrap_or_else(|e| e.into_inner());
        for path in [&self.license_path, &self.metadata_path] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(LicenseError::StorageIO(format!(
                        "Failed to delete {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }
        info!(dir = %self.dir.display(), "Credential store cleared");
        Ok(())
    }
}
