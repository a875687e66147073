//! Issuing authority: issuance, online validation and record lifecycle.
//!
//! Online validation applies the same cryptographic rules as the client's
//! offline path, then enforces the mutable record (status and device cap)
//! that a signed artifact cannot enforce on its own.

use crate::authority::records::RecordStore;
use crate::clock::{Clock, SystemClock};
use crate::crypto::signing::{key_fingerprint, public_key_hex, sign};
use crate::crypto::verify::verify_with_key;
use crate::errors::LicenseResult;
use crate::policy::rules::{is_device_match, is_expired};
use crate::protocol::models::{
    IssueRequest, LicensePayload, LicenseRecord, LicenseStatus, SignedLicense, UpdateRequest,
    ValidateRequest, ValidateResponse,
};
use crate::LicenseError;
use ed25519_dalek::SigningKey;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Number of device fingerprints tracked per record.
pub const MAX_TRACKED_DEVICES: usize = 10;

/// Rejection returned for the DEMO sentinel.
pub const DEMO_ONLINE_MESSAGE: &str = "Demo licenses cannot be validated online";

/// Issuing authority.
pub struct LicenseAuthority {
    signing_key: SigningKey,
    public_key_hex: String,
    key_fingerprint: String,
    records: RecordStore,
    clock: Arc<dyn Clock>,
}

impl LicenseAuthority {
    /// Create an authority signing with `signing_key`.
    pub fn new(signing_key: SigningKey, records: RecordStore) -> Self {
        Self::with_clock(signing_key, records, Arc::new(SystemClock))
    }

    /// Create an authority with a custom clock.
    pub fn with_clock(signing_key: SigningKey, records: RecordStore, clock: Arc<dyn Clock>) -> Self {
        let verifying_key = signing_key.verifying_key();
        Self {
            public_key_hex: public_key_hex(&signing_key),
            key_fingerprint: key_fingerprint(&verifying_key),
            signing_key,
            records,
            clock,
        }
    }

    /// Hex public key clients should trust.
    pub fn public_key_hex(&self) -> &str {
        &self.public_key_hex
    }

    /// Fingerprint stamped into every issued artifact.
    pub fn key_fingerprint(&self) -> &str {
        &self.key_fingerprint
    }

    /// Issue and sign a new license.
    ///
    /// Repeating a call with the same idempotency key returns the artifact
    /// from the first call.
    ///
    /// # Errors
    /// - `InvalidRequest` - Missing user, non-admin without a future expiry,
    ///   or a zero device cap
    pub fn issue(
        &self,
        request: IssueRequest,
        idempotency_key: Option<&str>,
    ) -> LicenseResult<SignedLicense> {
        if let Some(existing) = idempotency_key.and_then(|key| self.records.issued_under(key)) {
            debug!(license_id = %existing.payload.license_id, "Idempotent issue replay");
            return Ok(existing);
        }

        let now = self.clock.now_utc();
        if request.user_id.trim().is_empty() {
            return Err(LicenseError::InvalidRequest("userId is required".to_string()));
        }

        let expires_at = if request.is_admin_key {
            None
        } else {
            match request.expires_at {
                Some(expiry) if expiry > now => Some(expiry),
                _ => {
                    return Err(LicenseError::InvalidRequest(
                        "Non-admin licenses require a future expiry".to_string(),
                    ))
                }
            }
        };

        let max_devices = request
            .max_devices
            .unwrap_or_else(|| request.tier.default_max_devices());
        if max_devices == 0 {
            return Err(LicenseError::InvalidRequest(
                "maxDevices must be at least 1".to_string(),
            ));
        }

        let payload = LicensePayload {
            license_id: new_license_id(),
            user_id: request.user_id.trim().to_string(),
            tier: request.tier,
            issued_at: now,
            expires_at,
            is_admin_key: request.is_admin_key,
            device_binding_id: request
                .device_binding_id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty()),
            allow_offline_validation: request.allow_offline,
            notes: request.notes,
        };

        let license = sign(&payload, &self.signing_key)?;
        let record = LicenseRecord {
            license_id: payload.license_id.clone(),
            user_id: payload.user_id.clone(),
            tier: payload.tier,
            status: LicenseStatus::Active,
            max_devices,
            assigned_devices: Vec::new(),
            usage_count: 0,
            developer_mode: false,
            notes: payload.notes.clone(),
        };

        let issued = self.records.insert_issued(record, license, idempotency_key);
        info!(
            license_id = %issued.payload.license_id,
            tier = %issued.payload.tier,
            "License issued"
        );
        Ok(issued)
    }

    /// Authoritative verdict on a presented artifact.
    pub fn validate(&self, request: &ValidateRequest) -> ValidateResponse {
        let license_id = &request.license.payload.license_id;
        match self.check(request) {
            Ok(()) => {
                debug!(license_id = %license_id, "Online validation accepted");
                ValidateResponse::valid()
            }
            Err(e) => {
                info!(license_id = %license_id, reason = %e, "Online validation rejected");
                ValidateResponse::invalid(e.to_string())
            }
        }
    }

    fn check(&self, request: &ValidateRequest) -> LicenseResult<()> {
        let license = &request.license;
        let payload = &license.payload;
        let device_id = request.current_device_binding.trim();

        if license.is_demo() {
            return Err(LicenseError::DemoRejected(DEMO_ONLINE_MESSAGE.to_string()));
        }
        verify_with_key(license, &self.signing_key.verifying_key())
            .map_err(|_| LicenseError::SignatureInvalid)?;

        let status = self
            .records
            .get(&payload.license_id)
            .ok_or_else(|| LicenseError::NotFound(payload.license_id.clone()))?
            .status;
        if status != LicenseStatus::Active {
            return Err(LicenseError::NotActive {
                status: status.to_string(),
            });
        }

        if is_expired(payload, self.clock.now_utc()) {
            return Err(LicenseError::Expired);
        }
        if !is_device_match(payload, device_id) {
            return Err(LicenseError::DeviceMismatch);
        }
        if device_id.is_empty() {
            return Err(LicenseError::InvalidRequest(
                "currentDeviceBinding is required".to_string(),
            ));
        }

        self.records.update(&payload.license_id, |record| {
            // Status may have flipped since the read above.
            if record.status != LicenseStatus::Active {
                return Err(LicenseError::NotActive {
                    status: record.status.to_string(),
                });
            }
            admit_device(record, device_id, payload.is_admin_key)?;
            record.usage_count += 1;
            Ok(())
        })
    }

    /// Permanently cut off a license.
    pub fn revoke(&self, license_id: &str) -> LicenseResult<LicenseRecord> {
        self.set_status(license_id, LicenseStatus::Revoked)
    }

    /// Temporarily disable a license.
    pub fn suspend(&self, license_id: &str) -> LicenseResult<LicenseRecord> {
        self.set_status(license_id, LicenseStatus::Suspended)
    }

    /// Re-enable a license.
    pub fn activate(&self, license_id: &str) -> LicenseResult<LicenseRecord> {
        self.set_status(license_id, LicenseStatus::Active)
    }

    fn set_status(&self, license_id: &str, status: LicenseStatus) -> LicenseResult<LicenseRecord> {
        let record = self.records.update(license_id, |record| {
            record.status = status;
            Ok(record.clone())
        })?;
        info!(license_id = %license_id, status = %status, "License status changed");
        Ok(record)
    }

    /// Adjust mutable record fields without re-signing.
    pub fn update(&self, license_id: &str, request: UpdateRequest) -> LicenseResult<LicenseRecord> {
        if request.max_devices == Some(0) {
            return Err(LicenseError::InvalidRequest(
                "maxDevices must be at least 1".to_string(),
            ));
        }
        let record = self.records.update(license_id, |record| {
            if let Some(max_devices) = request.max_devices {
                record.max_devices = max_devices;
            }
            if let Some(developer_mode) = request.developer_mode {
                record.developer_mode = developer_mode;
            }
            if let Some(notes) = request.notes {
                record.notes = notes;
            }
            Ok(record.clone())
        })?;
        info!(license_id = %license_id, "License record updated");
        Ok(record)
    }

    /// Reassign the record to another user.
    pub fn assign(&self, license_id: &str, user_id: &str) -> LicenseResult<LicenseRecord> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(LicenseError::InvalidRequest("userId is required".to_string()));
        }
        let record = self.records.update(license_id, |record| {
            record.user_id = user_id.to_string();
            Ok(record.clone())
        })?;
        info!(license_id = %license_id, user_id = %user_id, "License reassigned");
        Ok(record)
    }

    /// One record.
    pub fn get(&self, license_id: &str) -> LicenseResult<LicenseRecord> {
        self.records
            .get(license_id)
            .ok_or_else(|| LicenseError::NotFound(license_id.to_string()))
    }

    /// All records.
    pub fn list(&self) -> Vec<LicenseRecord> {
        self.records.list()
    }
}

/// Record `device_id` on the record, enforcing the cap for non-admin keys.
fn admit_device(record: &mut LicenseRecord, device_id: &str, is_admin: bool) -> LicenseResult<()> {
    let known = record
        .assigned_devices
        .iter()
        .any(|d| d.eq_ignore_ascii_case(device_id));
    if known {
        return Ok(());
    }

    if !is_admin && record.assigned_devices.len() >= record.max_devices as usize {
        warn!(
            license_id = %record.license_id,
            max_devices = record.max_devices,
            "Device cap reached"
        );
        return Err(LicenseError::MaxDevicesExceeded);
    }

    record.assigned_devices.push(device_id.to_string());
    if record.assigned_devices.len() > MAX_TRACKED_DEVICES {
        let excess = record.assigned_devices.len() - MAX_TRACKED_DEVICES;
        record.assigned_devices.drain(..excess);
    }
    Ok(())
}

fn new_license_id() -> String {
    format!("lic_{}", hex::encode(rand::random::<[u8; 12]>()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::crypto::signing::decode_signing_key;
    use crate::crypto::verify::verify;
    use crate::protocol::models::{Tier, DEMO_SIGNATURE};
    use chrono::{Duration, TimeZone, Utc};

    const TEST_SEED_HEX: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";

    fn authority() -> (LicenseAuthority, Arc<MockClock>) {
        let clock = Arc::new(MockClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(),
        ));
        let authority = LicenseAuthority::with_clock(
            decode_signing_key(TEST_SEED_HEX).unwrap(),
            RecordStore::in_memory(),
            clock.clone(),
        );
        (authority, clock)
    }

    fn request(tier: Tier) -> IssueRequest {
        IssueRequest {
            user_id: "user-1".to_string(),
            tier,
            expires_at: Some(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()),
            device_binding_id: None,
            allow_offline: true,
            is_admin_key: false,
            notes: String::new(),
            max_devices: None,
        }
    }

    fn validate(authority: &LicenseAuthority, license: &SignedLicense, device: &str) -> ValidateResponse {
        authority.validate(&ValidateRequest {
            license: license.clone(),
            current_device_binding: device.to_string(),
        })
    }

    #[test]
    fn test_issue_signs_and_records() {
        let (authority, _) = authority();
        let license = authority.issue(request(Tier::Pro), None).unwrap();

        assert!(verify(&license, authority.public_key_hex()));
        assert_eq!(license.key_fingerprint, authority.key_fingerprint());
        let record = authority.get(&license.payload.license_id).unwrap();
        assert_eq!(record.max_devices, 3);
        assert_eq!(record.status, LicenseStatus::Active);
    }

    #[test]
    fn test_issue_requires_future_expiry() {
        let (authority, _) = authority();
        let mut req = request(Tier::Basic);
        req.expires_at = None;
        assert!(matches!(
            authority.issue(req.clone(), None),
            Err(LicenseError::InvalidRequest(_))
        ));

        req.expires_at = Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        assert!(authority.issue(req.clone(), None).is_err());

        req.is_admin_key = true;
        let admin = authority.issue(req, None).unwrap();
        assert_eq!(admin.payload.expires_at, None);
    }

    #[test]
    fn test_issue_idempotent() {
        let (authority, _) = authority();
        let first = authority.issue(request(Tier::Pro), Some("idem-1")).unwrap();
        let second = authority.issue(request(Tier::Pro), Some("idem-1")).unwrap();
        assert_eq!(first, second);
        assert_eq!(authority.list().len(), 1);
    }

    #[test]
    fn test_validate_counts_usage() {
        let (authority, _) = authority();
        let license = authority.issue(request(Tier::Pro), None).unwrap();

        assert!(validate(&authority, &license, "DEVICE-A").is_valid);
        assert!(validate(&authority, &license, "device-a").is_valid);

        let record = authority.get(&license.payload.license_id).unwrap();
        assert_eq!(record.usage_count, 2);
        assert_eq!(record.assigned_devices, vec!["DEVICE-A".to_string()]);
    }

    #[test]
    fn test_validate_rejects_tampered() {
        let (authority, _) = authority();
        let mut license = authority.issue(request(Tier::Basic), None).unwrap();
        license.payload.tier = Tier::Enterprise;

        let response = validate(&authority, &license, "DEVICE-A");
        assert!(!response.is_valid);
        assert_eq!(response.message, "Signature verification failed");
    }

    #[test]
    fn test_validate_rejects_demo() {
        let (authority, _) = authority();
        let mut license = authority.issue(request(Tier::Basic), None).unwrap();
        license.signature = DEMO_SIGNATURE.to_string();

        let response = validate(&authority, &license, "DEVICE-A");
        assert_eq!(response, ValidateResponse::invalid(DEMO_ONLINE_MESSAGE));
    }

    #[test]
    fn test_status_flips_apply_immediately() {
        let (authority, _) = authority();
        let license = authority.issue(request(Tier::Pro), None).unwrap();
        let id = license.payload.license_id.clone();

        authority.suspend(&id).unwrap();
        assert_eq!(
            validate(&authority, &license, "DEVICE-A").message,
            "License suspended"
        );
        authority.activate(&id).unwrap();
        assert!(validate(&authority, &license, "DEVICE-A").is_valid);
        authority.revoke(&id).unwrap();
        assert_eq!(
            validate(&authority, &license, "DEVICE-A").message,
            "License revoked"
        );
    }

    #[test]
    fn test_validate_expiry_and_binding() {
        let (authority, clock) = authority();
        let mut req = request(Tier::Pro);
        req.device_binding_id = Some("DEVICE-A".to_string());
        let license = authority.issue(req, None).unwrap();

        assert_eq!(
            validate(&authority, &license, "DEVICE-B").message,
            "Device mismatch"
        );
        clock.advance(Duration::days(120));
        assert_eq!(validate(&authority, &license, "DEVICE-A").message, "Expired");
    }

    #[test]
    fn test_unknown_license_rejected() {
        let (authority, _) = authority();
        let license = authority.issue(request(Tier::Pro), None).unwrap();
        let other = LicenseAuthority::new(
            decode_signing_key(TEST_SEED_HEX).unwrap(),
            RecordStore::in_memory(),
        );
        assert!(!validate(&other, &license, "DEVICE-A").is_valid);
    }

    #[test]
    fn test_admin_skips_device_cap() {
        let (authority, _) = authority();
        let mut req = request(Tier::Admin);
        req.is_admin_key = true;
        req.max_devices = Some(1);
        let license = authority.issue(req, None).unwrap();

        for i in 0..12 {
            assert!(validate(&authority, &license, &format!("DEVICE-{}", i)).is_valid);
        }
        let record = authority.get(&license.payload.license_id).unwrap();
        assert_eq!(record.assigned_devices.len(), MAX_TRACKED_DEVICES);
        assert_eq!(record.assigned_devices[0], "DEVICE-2");
    }

    #[test]
    fn test_update_and_assign() {
        let (authority, _) = authority();
        let license = authority.issue(request(Tier::Basic), None).unwrap();
        let id = license.payload.license_id.clone();

        assert!(validate(&authority, &license, "DEVICE-A").is_valid);
        assert_eq!(
            validate(&authority, &license, "DEVICE-B").message,
            "Max devices exceeded"
        );

        let record = authority
            .update(
                &id,
                UpdateRequest {
                    max_devices: Some(2),
                    developer_mode: Some(true),
                    notes: None,
                },
            )
            .unwrap();
        assert!(record.developer_mode);
        assert!(validate(&authority, &license, "DEVICE-B").is_valid);

        let record = authority.assign(&id, "user-2").unwrap();
        assert_eq!(record.user_id, "user-2");
        assert!(matches!(
            authority.assign("missing", "user-2"),
            Err(LicenseError::NotFound(_))
        ));
    }
}
