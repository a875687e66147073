//! Mutable, unsigned license metadata kept next to the artifact.
//!
//! Plain JSON: timestamps and status only, nothing secret. Besides the
//! diagnostics it carries the offline standing of the tracked license: the
//! authority's last rejection and the anchor of the offline grace window.

use crate::errors::LicenseResult;
use crate::store::atomic::write_atomic;
use crate::LicenseError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Status after the authority or offline check accepted the license.
pub const STATUS_VALID: &str = "Valid";

/// Status when nothing is known yet.
pub const STATUS_UNKNOWN: &str = "Unknown";

/// Number of attempts kept in [`LicenseMetadata::validation_lineage`].
pub const MAX_LINEAGE: usize = 20;

/// Which pathway produced a validation verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationPath {
    /// Authority responded.
    Online,
    /// Authority unreachable; local cryptographic check.
    Offline,
    /// Locally synthesized evaluation license.
    Demo,
}

/// One validation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageEntry {
    /// When the attempt finished.
    pub at: DateTime<Utc>,
    /// Pathway taken.
    pub path: ValidationPath,
    /// Verdict.
    pub accepted: bool,
    /// Verdict message.
    pub message: String,
}

/// Client-local metadata record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseMetadata {
    /// Last attempt on any pathway.
    #[serde(default)]
    pub last_validation_at: Option<DateTime<Utc>>,
    /// Last time the authority answered.
    #[serde(default)]
    pub last_online_check_at: Option<DateTime<Utc>>,
    /// When the scheduler should check again.
    #[serde(default)]
    pub next_revalidation_at: Option<DateTime<Utc>>,
    /// "Valid", "Unknown" or the rejection message.
    #[serde(default = "unknown_status")]
    pub revocation_status: String,
    /// Fingerprint of the device that last validated.
    #[serde(default)]
    pub device_id: Option<String>,
    /// Fingerprint of the key that signed the stored artifact.
    #[serde(default)]
    pub key_fingerprint: Option<String>,
    /// License the offline standing below belongs to.
    #[serde(default)]
    pub license_id: Option<String>,
    /// Message of the authority's last verdict when that verdict was a
    /// rejection. Cleared by the next online acceptance.
    #[serde(default)]
    pub online_rejection: Option<String>,
    /// First offline acceptance of a license the authority never answered for.
    #[serde(default)]
    pub offline_since: Option<DateTime<Utc>>,
    /// Most recent attempts, oldest first.
    #[serde(default)]
    pub validation_lineage: Vec<LineageEntry>,
}

fn unknown_status() -> String {
    STATUS_UNKNOWN.to_string()
}

impl Default for LicenseMetadata {
    fn default() -> Self {
        Self {
            last_validation_at: None,
            last_online_check_at: None,
            next_revalidation_at: None,
            revocation_status: unknown_status(),
            device_id: None,
            key_fingerprint: None,
            license_id: None,
            online_rejection: None,
            offline_since: None,
            validation_lineage: Vec::new(),
        }
    }
}

impl LicenseMetadata {
    /// Whether the last verdict was an acceptance.
    pub fn is_valid(&self) -> bool {
        self.revocation_status == STATUS_VALID
    }

    /// Record a finished attempt and update the derived fields.
    pub fn record_attempt(
        &mut self,
        at: DateTime<Utc>,
        path: ValidationPath,
        accepted: bool,
        message: &str,
    ) {
        self.last_validation_at = Some(at);
        match path {
            ValidationPath::Online => {
                self.last_online_check_at = Some(at);
                self.online_rejection = (!accepted).then(|| message.to_string());
                self.offline_since = None;
            }
            ValidationPath::Offline => {
                if accepted && self.last_online_check_at.is_none() && self.offline_since.is_none() {
                    self.offline_since = Some(at);
                }
            }
            ValidationPath::Demo => {}
        }
        self.revocation_status = if accepted {
            STATUS_VALID.to_string()
        } else {
            message.to_string()
        };

        self.validation_lineage.push(LineageEntry {
            at,
            path,
            accepted,
            message: message.to_string(),
        });
        if self.validation_lineage.len() > MAX_LINEAGE {
            let drain_count = self.validation_lineage.len() - MAX_LINEAGE;
            self.validation_lineage.drain(..drain_count);
        }
    }

    /// Point the offline standing at `license_id`.
    ///
    /// A different license starts with a clean standing: the authority's
    /// verdicts on the previous one do not carry over.
    pub fn track_license(&mut self, license_id: &str) {
        if self.license_id.as_deref() == Some(license_id) {
            return;
        }
        self.license_id = Some(license_id.to_string());
        self.last_online_check_at = None;
        self.online_rejection = None;
        self.offline_since = None;
    }

    /// Whether `license_id` may still be accepted without the authority.
    ///
    /// # Errors
    /// - `RejectedByAuthority` - The authority's last verdict was a rejection
    /// - `OfflineGraceExceeded` - The grace window since the last answer is over
    /// - `OfflineValidationFailed` - Recorded times lie in the future
    pub fn offline_standing(
        &self,
        license_id: &str,
        grace: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<(), LicenseError> {
        if self.license_id.as_deref() != Some(license_id) {
            return Ok(());
        }
        if let Some(message) = &self.online_rejection {
            return Err(LicenseError::RejectedByAuthority(message.clone()));
        }

        let Some(anchor) = self.last_online_check_at.or(self.offline_since) else {
            return Ok(());
        };
        let age = now.signed_duration_since(anchor);
        if age < chrono::Duration::zero() {
            return Err(LicenseError::OfflineValidationFailed);
        }
        if age > grace {
            return Err(LicenseError::OfflineGraceExceeded);
        }
        Ok(())
    }

    /// Serialize the metadata to JSON.
    pub fn to_json(&self) -> LicenseResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| LicenseError::StorageIO(format!("Failed to serialize metadata: {}", e)))
    }

    /// Deserialize metadata from JSON.
    pub fn from_json(json: &str) -> LicenseResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| LicenseError::StorageIO(format!("Failed to deserialize metadata: {}", e)))
    }
}

/// Read the metadata file. `Ok(None)` when absent.
pub fn read_metadata(path: &Path) -> LicenseResult<Option<LicenseMetadata>> {
    match fs::read_to_string(path) {
        Ok(json) => LicenseMetadata::from_json(&json).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(LicenseError::StorageIO(format!(
            "Failed to read metadata: {}",
            e
        ))),
    }
}

/// Atomically write the metadata file.
pub fn write_metadata(path: &Path, metadata: &LicenseMetadata) -> LicenseResult<()> {
    write_atomic(path, metadata.to_json()?.as_bytes())
}
