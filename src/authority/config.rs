//! Issuing authority configuration.

use crate::crypto::signing::decode_signing_key;
use crate::LicenseError;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Default listen address of the authority.
pub const DEFAULT_BIND: &str = "127.0.0.1:8787";

/// Configuration for the issuing authority.
///
/// Populated once at startup (from CLI args / env) and validated eagerly.
#[derive(Debug, Clone)]
pub struct AuthorityConfig {
    /// Listen address.
    pub bind: SocketAddr,

    /// Ed25519 signing seed (64 hex chars).
    pub signing_key_hex: String,

    /// Bearer token required on operator endpoints.
    pub operator_token: String,

    /// Snapshot file for license records. In-memory only when absent.
    pub records_path: Option<PathBuf>,
}

impl AuthorityConfig {
    /// Validate configuration for obvious errors.
    pub fn validate(&self) -> Result<(), LicenseError> {
        decode_signing_key(&self.signing_key_hex)
            .map_err(|e| LicenseError::ConfigError(format!("Signing key unusable: {}", e)))?;

        if self.operator_token.trim().is_empty() {
            return Err(LicenseError::ConfigError(
                "operator_token cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
