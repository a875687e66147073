//! Expiry and device-binding rules shared by client and authority.
//!
//! Both sides call these same functions so they can never disagree on
//! whether an artifact is expired or bound elsewhere.

use crate::protocol::models::LicensePayload;
use chrono::{DateTime, Utc};

/// Whether the payload has expired at `now`.
///
/// Admin keys and payloads without `expires_at` never expire.
pub fn is_expired(payload: &LicensePayload, now: DateTime<Utc>) -> bool {
    if payload.is_admin_key {
        return false;
    }
    match payload.expires_at {
        Some(expires_at) => now > expires_at,
        None => false,
    }
}

/// Whether the payload may be used on `current_device_id`.
///
/// Unbound payloads and admin keys match any device; otherwise the binding
/// must equal the device id ignoring ASCII case.
pub fn is_device_match(payload: &LicensePayload, current_device_id: &str) -> bool {
    if payload.is_admin_key {
        return true;
    }
    match payload.device_binding_id.as_deref().map(str::trim) {
        None | Some("") => true,
        Some(binding) => binding.eq_ignore_ascii_case(current_device_id.trim()),
    }
}

/// Whether `code` is a well-formed 16-character alphanumeric demo code.
pub fn is_valid_demo_code(code: &str) -> bool {
    code.len() == 16 && code.chars().all(|c| c.is_ascii_alphanumeric())
}
