//! Offline acceptance and tier-gated access checks.
//!
//! This module composes the signature service and the shared rules into the
//! decisions the client makes without the authority:
//! - Offline acceptance (signature, expiry, device binding)
//! - Demo acceptance (build-mode gated, device bound)
//! - Tier gating for feature access

use crate::config::BuildMode;
use crate::crypto::verify::verify;
use crate::policy::rules::{is_device_match, is_expired, is_valid_demo_code};
use crate::protocol::models::{SignedLicense, Tier, DEMO_ID_PREFIX, DEMO_SIGNATURE, DEMO_USER_ID};
use crate::LicenseError;
use chrono::{DateTime, Utc};

/// Message returned when the DEMO sentinel is seen outside evaluation builds.
pub const DEMO_DISABLED_MESSAGE: &str = "Demo licenses are disabled in this build";

/// Run the offline acceptance sequence.
///
/// Order is signature, then expiry, then device; the first failure wins.
/// Admin keys stop after the signature check.
///
/// # Returns
/// * `Err(OfflineValidationFailed)` - Signature does not verify
/// * `Err(Expired)` - Past `expires_at`
/// * `Err(DeviceMismatch)` - Bound to another device
pub fn check_offline(
    license: &SignedLicense,
    public_key_hex: &str,
    device_id: &str,
    now: DateTime<Utc>,
) -> Result<(), LicenseError> {
    if !verify(license, public_key_hex) {
        return Err(LicenseError::OfflineValidationFailed);
    }

    if license.payload.is_admin_key {
        return Ok(());
    }

    if is_expired(&license.payload, now) {
        return Err(LicenseError::Expired);
    }

    if !is_device_match(&license.payload, device_id) {
        return Err(LicenseError::DeviceMismatch);
    }

    Ok(())
}

/// Accept a DEMO-sentinel license only in evaluation builds on its own device.
///
/// The artifact must have exactly the shape `SignedLicense::demo` produces;
/// anything else carrying the sentinel was edited by hand.
pub fn check_demo(
    license: &SignedLicense,
    mode: BuildMode,
    device_id: &str,
) -> Result<(), LicenseError> {
    if !mode.allows_demo() {
        return Err(LicenseError::DemoRejected(DEMO_DISABLED_MESSAGE.to_string()));
    }

    if !is_synthesized_demo(license) {
        return Err(LicenseError::DemoRejected(FORGED_DEMO_MESSAGE.to_string()));
    }

    // No admin shortcut here: the binding itself must name this device.
    let bound_here = license
        .payload
        .device_binding_id
        .as_deref()
        .map(str::trim)
        .is_some_and(|binding| {
            !binding.is_empty() && binding.eq_ignore_ascii_case(device_id.trim())
        });
    if !bound_here {
        return Err(LicenseError::DeviceMismatch);
    }

    Ok(())
}

/// Message for a sentinel artifact whose payload is not a synthesized demo.
pub const FORGED_DEMO_MESSAGE: &str = "Invalid demo license";

fn is_synthesized_demo(license: &SignedLicense) -> bool {
    let payload = &license.payload;
    let code_ok = payload
        .license_id
        .strip_prefix(DEMO_ID_PREFIX)
        .is_some_and(|code| is_valid_demo_code(code) && code == code.to_ascii_uppercase());

    code_ok
        && license.key_fingerprint == DEMO_SIGNATURE
        && payload.tier == Tier::Pro
        && !payload.is_admin_key
        && payload.expires_at.is_none()
        && payload.user_id == DEMO_USER_ID
}

/// Check that the license tier satisfies `required`.
pub fn check_tier(license: &SignedLicense, required: Tier) -> Result<(), LicenseError> {
    if license.payload.tier < required {
        return Err(LicenseError::TierTooLow {
            required: required.to_string(),
        });
    }
    Ok(())
}

/// Combined local access check for a stored license.
pub fn check_access(
    license: &SignedLicense,
    public_key_hex: &str,
    mode: BuildMode,
    device_id: &str,
    now: DateTime<Utc>,
    required: Tier,
) -> Result<Tier, LicenseError> {
    if license.is_demo() {
        check_demo(license, mode, device_id)?;
    } else {
        check_offline(license, public_key_hex, device_id, now)?;
    }

    check_tier(license, required)?;
    Ok(license.payload.tier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::signing::{decode_signing_key, sign};
    use crate::protocol::models::LicensePayload;
    use chrono::{Duration, TimeZone};

    const TEST_SEED_HEX: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";
    const TEST_VERIFY_KEY_HEX: &str =
        "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
    }

    fn payload() -> LicensePayload {
        LicensePayload {
            license_id: "lic-1".to_string(),
            user_id: "user-1".to_string(),
            tier: Tier::Pro,
            issued_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            expires_at: Some(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()),
            is_admin_key: false,
            device_binding_id: Some("DEVICE-A".to_string()),
            allow_offline_validation: true,
            notes: String::new(),
        }
    }

    fn signed(payload: LicensePayload) -> SignedLicense {
        sign(&payload, &decode_signing_key(TEST_SEED_HEX).unwrap()).unwrap()
    }

    fn demo(binding: &str) -> SignedLicense {
        SignedLicense::demo("ABCD1234EFGH5678", binding, now())
    }

    #[test]
    fn test_check_offline_valid() {
        let license = signed(payload());
        assert!(check_offline(&license, TEST_VERIFY_KEY_HEX, "device-a", now()).is_ok());
    }

    #[test]
    fn test_check_offline_bad_signature() {
        let mut license = signed(payload());
        license.payload.notes = "edited".to_string();
        let result = check_offline(&license, TEST_VERIFY_KEY_HEX, "DEVICE-A", now());
        assert!(matches!(result, Err(LicenseError::OfflineValidationFailed)));
    }

    #[test]
    fn test_check_offline_expired() {
        let license = signed(payload());
        let later = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();
        let result = check_offline(&license, TEST_VERIFY_KEY_HEX, "DEVICE-A", later);
        assert!(matches!(result, Err(LicenseError::Expired)));
    }

    #[test]
    fn test_check_offline_device_mismatch() {
        let license = signed(payload());
        let result = check_offline(&license, TEST_VERIFY_KEY_HEX, "DEVICE-B", now());
        assert!(matches!(result, Err(LicenseError::DeviceMismatch)));
    }

    #[test]
    fn test_check_offline_admin_skips_expiry_and_device() {
        let mut p = payload();
        p.is_admin_key = true;
        p.expires_at = Some(now() - Duration::days(30));
        let license = signed(p);
        assert!(check_offline(&license, TEST_VERIFY_KEY_HEX, "DEVICE-B", now()).is_ok());
    }

    #[test]
    fn test_check_demo_evaluation_only() {
        let license = demo("DEVICE-A");
        assert!(check_demo(&license, BuildMode::Evaluation, "DEVICE-A").is_ok());
        assert!(matches!(
            check_demo(&license, BuildMode::Production, "DEVICE-A"),
            Err(LicenseError::DemoRejected(_))
        ));
    }

    #[test]
    fn test_check_demo_requires_binding() {
        let mut unbound = demo("DEVICE-A");
        unbound.payload.device_binding_id = None;
        assert!(matches!(
            check_demo(&unbound, BuildMode::Evaluation, "DEVICE-A"),
            Err(LicenseError::DeviceMismatch)
        ));
        assert!(matches!(
            check_demo(&demo("DEVICE-A"), BuildMode::Evaluation, "DEVICE-B"),
            Err(LicenseError::DeviceMismatch)
        ));
        assert!(check_demo(&demo("DEVICE-A"), BuildMode::Evaluation, "device-a").is_ok());
    }

    #[test]
    fn test_check_demo_rejects_edited_payload() {
        let edits: Vec<fn(&mut LicensePayload)> = vec![
            |p| p.tier = Tier::Admin,
            |p| p.is_admin_key = true,
            |p| p.expires_at = Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()),
            |p| p.user_id = "someone".to_string(),
            |p| p.license_id = "lic-real".to_string(),
            |p| p.license_id = "DEMO-SHORT".to_string(),
        ];
        for edit in edits {
            let mut license = demo("DEVICE-A");
            edit(&mut license.payload);
            assert!(
                matches!(
                    check_demo(&license, BuildMode::Evaluation, "DEVICE-A"),
                    Err(LicenseError::DemoRejected(ref m)) if m == FORGED_DEMO_MESSAGE
                ),
                "edited demo accepted: {:?}",
                license.payload
            );
        }
    }

    #[test]
    fn test_check_demo_admin_flag_does_not_unbind() {
        let mut license = demo("SOME-OTHER-PC");
        license.payload.tier = Tier::Admin;
        license.payload.is_admin_key = true;
        assert!(check_demo(&license, BuildMode::Evaluation, "DEVICE-A").is_err());
        assert!(check_access(
            &license,
            TEST_VERIFY_KEY_HEX,
            BuildMode::Evaluation,
            "DEVICE-A",
            now(),
            Tier::Admin
        )
        .is_err());
    }

    #[test]
    fn test_check_tier() {
        let license = signed(payload());
        assert!(check_tier(&license, Tier::Basic).is_ok());
        assert!(check_tier(&license, Tier::Pro).is_ok());
        assert!(matches!(
            check_tier(&license, Tier::Enterprise),
            Err(LicenseError::TierTooLow { required }) if required == "Enterprise"
        ));
    }

    #[test]
    fn test_check_access_combined() {
        let license = signed(payload());
        let tier = check_access(
            &license,
            TEST_VERIFY_KEY_HEX,
            BuildMode::Production,
            "DEVICE-A",
            now(),
            Tier::Basic,
        )
        .unwrap();
        assert_eq!(tier, Tier::Pro);
    }
}
