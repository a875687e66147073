//! Licensewarden error types.

use thiserror::Error;

/// Result alias used across the crate.
pub type LicenseResult<T> = Result<T, LicenseError>;

/// Errors that can occur while issuing, storing or validating licenses.
///
/// The policy variants render as the short, user-facing rejection messages
/// that the surrounding UI displays verbatim.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A public or private key could not be decoded.
    #[error("Key error: {0}")]
    KeyError(String),

    /// Artifact signature verification failed.
    #[error("Signature verification failed")]
    SignatureInvalid,

    /// Failed to encode or parse a wire or storage payload.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// HTTP transport error communicating with the authority.
    #[error("Authority transport error: {0}")]
    AuthorityTransport(String),

    /// Credential store I/O error.
    #[error("Storage I/O error: {0}")]
    StorageIO(String),

    /// At-rest encryption or decryption failed.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// No license present (absent or unreadable).
    #[error("No valid license")]
    MissingLicense,

    /// License has passed its expiry.
    #[error("Expired")]
    Expired,

    /// License is pinned to a different device.
    #[error("Device mismatch")]
    DeviceMismatch,

    /// Device cap reached on the authority record.
    #[error("Max devices exceeded")]
    MaxDevicesExceeded,

    /// Authority unreachable and license forbids offline use.
    #[error("Online validation required")]
    OnlineValidationRequired,

    /// Offline cryptographic verification failed.
    #[error("Offline validation failed")]
    OfflineValidationFailed,

    /// Too long since the authority last answered for this license.
    #[error("Offline grace period exceeded")]
    OfflineGraceExceeded,

    /// The authority's last verdict on this license was a rejection.
    ///
    /// Carries that verdict's message so it survives an offline retry.
    #[error("{0}")]
    RejectedByAuthority(String),

    /// License record is not in the Active state.
    #[error("License {status}")]
    NotActive {
        /// Lowercase status name (e.g. "revoked").
        status: String,
    },

    /// License tier is below what the feature requires.
    #[error("Tier {required} required")]
    TierTooLow {
        /// The tier the feature requires.
        required: String,
    },

    /// Demo licenses are not accepted here.
    #[error("{0}")]
    DemoRejected(String),

    /// Demo activation code is malformed.
    #[error("Invalid demo code")]
    InvalidDemoCode,

    /// No license record with the given id.
    #[error("License not found: {0}")]
    NotFound(String),

    /// Request parameters are invalid.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Caller lacks operator authorization.
    #[error("Unauthorized")]
    Unauthorized,

    /// Operation interrupted by shutdown.
    #[error("Operation cancelled")]
    Cancelled,
}

impl LicenseError {
    /// Whether this error means the authority gave no verdict at all.
    ///
    /// Only these errors may route a validation to the offline path.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            LicenseError::AuthorityTransport(_) | LicenseError::ProtocolError(_)
        )
    }
}
