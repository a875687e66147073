//! Authority-side license records.
//!
//! Records and the issuance idempotency map live in memory behind one lock.
//! When a path is configured, every mutation is snapshotted to JSON with an
//! atomic write. Snapshot failures are logged; memory stays authoritative.

use crate::errors::LicenseResult;
use crate::protocol::models::{LicenseRecord, SignedLicense};
use crate::store::atomic::write_atomic;
use crate::LicenseError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, error, info};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    records: BTreeMap<String, LicenseRecord>,
    /// Idempotency key -> artifact issued under it.
    #[serde(default)]
    issued: BTreeMap<String, SignedLicense>,
}

/// Store of [`LicenseRecord`]s keyed by license id.
pub struct RecordStore {
    state: RwLock<Snapshot>,
    path: Option<PathBuf>,
}

impl RecordStore {
    /// Volatile store.
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(Snapshot::default()),
            path: None,
        }
    }

    /// Store backed by a snapshot file, loading it if present.
    pub fn open(path: PathBuf) -> LicenseResult<Self> {
        let snapshot = load_snapshot(&path)?;
        info!(
            path = %path.display(),
            records = snapshot.records.len(),
            "License records loaded"
        );
        Ok(Self {
            state: RwLock::new(snapshot),
            path: Some(path),
        })
    }

    /// Look up a record.
    pub fn get(&self, license_id: &str) -> Option<LicenseRecord> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.records.get(license_id).cloned()
    }

    /// All records, ordered by license id.
    pub fn list(&self) -> Vec<LicenseRecord> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.records.values().cloned().collect()
    }

    /// Artifact previously issued under `key`.
    pub fn issued_under(&self, key: &str) -> Option<SignedLicense> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.issued.get(key).cloned()
    }

    /// Insert a freshly issued record.
    ///
    /// With an idempotency key already bound to an artifact, nothing is
    /// inserted and the earlier artifact is returned instead.
    pub fn insert_issued(
        &self,
        record: LicenseRecord,
        license: SignedLicense,
        idempotency_key: Option<&str>,
    ) -> SignedLicense {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(key) = idempotency_key {
            if let Some(existing) = state.issued.get(key) {
                debug!(idempotency_key = key, "Returning previously issued license");
                return existing.clone();
            }
            state.issued.insert(key.to_string(), license.clone());
        }
        state.records.insert(record.license_id.clone(), record);

        self.persist(&state);
        license
    }

    /// Mutate one record in place. The closure's error aborts the update
    /// without persisting.
    pub fn update<T>(
        &self,
        license_id: &str,
        mutate: impl FnOnce(&mut LicenseRecord) -> LicenseResult<T>,
    ) -> LicenseResult<T> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let record = state
            .records
            .get_mut(license_id)
            .ok_or_else(|| LicenseError::NotFound(license_id.to_string()))?;

        let value = mutate(record)?;
        self.persist(&state);
        Ok(value)
    }

    fn persist(&self, state: &Snapshot) {
        let Some(path) = &self.path else {
            return;
        };
        let result = serde_json::to_vec_pretty(state)
            .map_err(|e| LicenseError::StorageIO(format!("Failed to serialize records: {}", e)))
            .and_then(|bytes| write_atomic(path, &bytes));

        if let Err(e) = result {
            error!(path = %path.display(), error = %e, "Record snapshot failed");
        }
    }
}

fn load_snapshot(path: &Path) -> LicenseResult<Snapshot> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| LicenseError::StorageIO(format!("Corrupt records file: {}", e))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Snapshot::default()),
        Err(e) => Err(LicenseError::StorageIO(format!(
            "Failed to read records: {}",
            e
        ))),
    }
}
