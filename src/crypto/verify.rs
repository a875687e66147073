//! Ed25519 artifact verification.
//!
//! The public entry point [`verify`] never surfaces an error: a malformed
//! key, malformed signature or non-matching signature all yield `false`.
//! So does an artifact whose `key_fingerprint` names a different key than
//! the trust anchor.

use crate::crypto::canonical::canonicalize;
use crate::crypto::signing::key_fingerprint;
use crate::errors::LicenseResult;
use crate::protocol::models::SignedLicense;
use crate::LicenseError;
use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Cache for decoded verifying keys.
static KEY_CACHE: OnceCell<RwLock<HashMap<String, VerifyingKey>>> = OnceCell::new();

/// Decode a hex-encoded Ed25519 public key.
///
/// The key is cached after first decode.
pub fn decode_public_key(hex_key: &str) -> LicenseResult<VerifyingKey> {
    let cache = KEY_CACHE.get_or_init(|| RwLock::new(HashMap::new()));
    if let Ok(guard) = cache.read() {
        if let Some(key) = guard.get(hex_key) {
            return Ok(*key);
        }
    }

    let bytes = hex::decode(hex_key)
        .map_err(|e| LicenseError::KeyError(format!("Invalid public key hex: {}", e)))?;

    let key_array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| LicenseError::KeyError("Public key must be 32 bytes".to_string()))?;

    let verifying_key = VerifyingKey::from_bytes(&key_array)
        .map_err(|e| LicenseError::KeyError(format!("Invalid Ed25519 public key: {}", e)))?;

    // Best-effort insert into cache. If locking fails, still return the decoded key.
    if let Ok(mut guard) = cache.write() {
        guard.insert(hex_key.to_string(), verifying_key);
    }

    Ok(verifying_key)
}

/// Verify a base64 Ed25519 signature over a message.
pub fn verify_ed25519(
    signature_b64: &str,
    message: &[u8],
    verifying_key: &VerifyingKey,
) -> LicenseResult<()> {
    let sig_bytes = STANDARD
        .decode(signature_b64)
        .map_err(|e| LicenseError::ProtocolError(format!("Invalid signature base64: {}", e)))?;

    let sig_array: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| LicenseError::SignatureInvalid)?;

    let signature = Signature::from_bytes(&sig_array);

    verifying_key
        .verify(message, &signature)
        .map_err(|_| LicenseError::SignatureInvalid)
}

/// Verify an artifact against an already-decoded key.
pub fn verify_with_key(license: &SignedLicense, verifying_key: &VerifyingKey) -> LicenseResult<()> {
    let message = canonicalize(&license.payload)?;
    verify_ed25519(&license.signature, &message, verifying_key)
}

/// Verify an artifact's signature against a hex-encoded public key.
pub fn verify(license: &SignedLicense, public_key_hex: &str) -> bool {
    let key = match decode_public_key(public_key_hex) {
        Ok(key) => key,
        Err(e) => {
            debug!(license_id = %license.payload.license_id, error = %e, "Trust anchor unusable");
            return false;
        }
    };

    let expected = key_fingerprint(&key);
    if !license.key_fingerprint.eq_ignore_ascii_case(&expected) {
        debug!(
            license_id = %license.payload.license_id,
            presented = %license.key_fingerprint,
            expected = %expected,
            "Key fingerprint does not match trust anchor"
        );
        return false;
    }

    let result = verify_with_key(license, &key);

    match result {
        Ok(()) => true,
        Err(e) => {
            debug!(license_id = %license.payload.license_id, error = %e, "Signature rejected");
            false
        }
    }
}
