//! Ed25519 artifact signing (authority side).

use crate::crypto::canonical::canonicalize;
use crate::errors::LicenseResult;
use crate::protocol::models::{LicensePayload, SignedLicense};
use crate::LicenseError;
use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};

/// Decode a hex-encoded 32-byte Ed25519 seed.
pub fn decode_signing_key(seed_hex: &str) -> LicenseResult<SigningKey> {
    let bytes = hex::decode(seed_hex.trim())
        .map_err(|e| LicenseError::KeyError(format!("Invalid signing key hex: {}", e)))?;

    let seed: [u8; 32] = bytes
        .try_into()
        .map_err(|_| LicenseError::KeyError("Signing key must be 32 bytes".to_string()))?;

    Ok(SigningKey::from_bytes(&seed))
}

/// Generate a fresh signing key from the OS RNG.
pub fn generate_signing_key() -> SigningKey {
    SigningKey::generate(&mut rand::rngs::OsRng)
}

/// Hex-encoded public half of a signing key.
pub fn public_key_hex(signing_key: &SigningKey) -> String {
    hex::encode(signing_key.verifying_key().to_bytes())
}

/// Lowercase hex SHA-256 of the raw public-key bytes.
pub fn key_fingerprint(verifying_key: &VerifyingKey) -> String {
    hex::encode(Sha256::digest(verifying_key.to_bytes()))
}

/// Sign a payload over its canonical bytes.
pub fn sign(payload: &LicensePayload, signing_key: &SigningKey) -> LicenseResult<SignedLicense> {
    let message = canonicalize(payload)?;
    let signature = signing_key.sign(&message);

    Ok(SignedLicense {
        payload: payload.clone(),
        signature: STANDARD.encode(signature.to_bytes()),
        key_fingerprint: key_fingerprint(&signing_key.verifying_key()),
    })
}
