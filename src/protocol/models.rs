//! License artifact structs and authority wire types.

use crate::errors::LicenseResult;
use crate::LicenseError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Signature sentinel marking a locally synthesized evaluation license.
///
/// The authority never produces it and rejects it on online validation.
pub const DEMO_SIGNATURE: &str = "DEMO";

/// License id prefix of synthesized demo licenses.
pub const DEMO_ID_PREFIX: &str = "DEMO-";

/// User id carried by synthesized demo licenses.
pub const DEMO_USER_ID: &str = "demo";

/// Ordered license tier (`Basic < Pro < Enterprise < Admin`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Entry tier.
    Basic,
    /// Professional tier.
    Pro,
    /// Enterprise tier.
    Enterprise,
    /// Internal administrative tier.
    Admin,
}

impl Tier {
    /// Default device cap for records issued at this tier.
    pub fn default_max_devices(&self) -> u32 {
        match self {
            Tier::Basic => 1,
            Tier::Pro => 3,
            Tier::Enterprise => 100,
            Tier::Admin => 500,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Basic => "Basic",
            Tier::Pro => "Pro",
            Tier::Enterprise => "Enterprise",
            Tier::Admin => "Admin",
        };
        f.write_str(name)
    }
}

/// Signed license payload. Never mutated after signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicensePayload {
    /// Unique identifier assigned at issuance.
    pub license_id: String,

    /// Owning principal.
    pub user_id: String,

    /// Entitlement tier.
    pub tier: Tier,

    /// Issuance time.
    pub issued_at: DateTime<Utc>,

    /// Expiry time. Absent means non-expiring (admin keys).
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    /// Admin keys bypass expiry and device-binding checks.
    #[serde(default)]
    pub is_admin_key: bool,

    /// Single device fingerprint this license is pinned to.
    #[serde(default)]
    pub device_binding_id: Option<String>,

    /// Whether the license may be accepted without reaching the authority.
    #[serde(default)]
    pub allow_offline_validation: bool,

    /// Free-text, non-authoritative.
    #[serde(default)]
    pub notes: String,
}

/// Payload plus detached signature and signer-key fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedLicense {
    /// The signed payload.
    pub payload: LicensePayload,

    /// Base64 Ed25519 signature over the canonical payload bytes, or
    /// [`DEMO_SIGNATURE`].
    pub signature: String,

    /// Hex SHA-256 fingerprint of the signing public key.
    pub key_fingerprint: String,
}

impl SignedLicense {
    /// Whether this is a locally synthesized evaluation license.
    pub fn is_demo(&self) -> bool {
        self.signature == DEMO_SIGNATURE
    }

    /// Synthesize an evaluation license for `code`, bound to `device_id`.
    ///
    /// Pro tier, non-expiring, offline-capable, carrying the DEMO sentinel
    /// in place of a signature.
    pub fn demo(code: &str, device_id: &str, issued_at: DateTime<Utc>) -> Self {
        Self {
            payload: LicensePayload {
                license_id: format!("{}{}", DEMO_ID_PREFIX, code.to_ascii_uppercase()),
                user_id: DEMO_USER_ID.to_string(),
                tier: Tier::Pro,
                issued_at,
                expires_at: None,
                is_admin_key: false,
                device_binding_id: Some(device_id.to_string()),
                allow_offline_validation: true,
                notes: "Evaluation license".to_string(),
            },
            signature: DEMO_SIGNATURE.to_string(),
            key_fingerprint: DEMO_SIGNATURE.to_string(),
        }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> LicenseResult<String> {
        serde_json::to_string(self)
            .map_err(|e| LicenseError::ProtocolError(format!("Failed to serialize license: {}", e)))
    }

    /// Parse a license from JSON (e.g. a pasted license string).
    pub fn from_json(json: &str) -> LicenseResult<Self> {
        serde_json::from_str(json.trim())
            .map_err(|e| LicenseError::ProtocolError(format!("Failed to parse license: {}", e)))
    }
}

/// Authority-side lifecycle state of a license record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LicenseStatus {
    /// Validations may succeed.
    Active,
    /// Temporarily disabled.
    Suspended,
    /// Permanently cut off.
    Revoked,
}

impl fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LicenseStatus::Active => "active",
            LicenseStatus::Suspended => "suspended",
            LicenseStatus::Revoked => "revoked",
        };
        f.write_str(name)
    }
}

/// Mutable authority record enforcing what the signed payload cannot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseRecord {
    /// Id of the artifact this record governs.
    pub license_id: String,
    /// Owning principal; reassignable.
    pub user_id: String,
    /// Tier at issuance.
    pub tier: Tier,
    /// Current lifecycle status.
    pub status: LicenseStatus,
    /// Device cap enforced at validation.
    pub max_devices: u32,
    /// Devices seen so far, deduplicated, oldest first.
    #[serde(default)]
    pub assigned_devices: Vec<String>,
    /// Successful online validations.
    #[serde(default)]
    pub usage_count: u64,
    /// Operator flag, not interpreted by the engine.
    #[serde(default)]
    pub developer_mode: bool,
    /// Operator notes.
    #[serde(default)]
    pub notes: String,
}

/// `POST /licenses/validate` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    /// The artifact being validated (it is its own credential).
    pub license: SignedLicense,

    /// Device fingerprint of the caller.
    #[serde(default)]
    pub current_device_binding: String,
}

/// `POST /licenses/validate` response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    /// Authoritative verdict.
    pub is_valid: bool,

    /// Human-readable reason.
    pub message: String,
}

impl ValidateResponse {
    /// Accepting verdict.
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            message: "Valid".to_string(),
        }
    }

    /// Rejecting verdict with a reason.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            message: message.into(),
        }
    }
}

/// `POST /licenses/issue` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueRequest {
    /// Owning principal.
    pub user_id: String,
    /// Entitlement tier.
    pub tier: Tier,
    /// Required for non-admin licenses; must be in the future.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Optional single-device pin.
    #[serde(default)]
    pub device_binding_id: Option<String>,
    /// Permit offline acceptance on the client.
    #[serde(default)]
    pub allow_offline: bool,
    /// Issue an admin key (no expiry, no device checks).
    #[serde(default)]
    pub is_admin_key: bool,
    /// Free text.
    #[serde(default)]
    pub notes: String,
    /// Overrides the tier default device cap.
    #[serde(default)]
    pub max_devices: Option<u32>,
}

/// `POST /licenses/update/{id}` request body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    /// New device cap.
    #[serde(default)]
    pub max_devices: Option<u32>,
    /// New developer-mode flag.
    #[serde(default)]
    pub developer_mode: Option<bool>,
    /// Replacement notes.
    #[serde(default)]
    pub notes: Option<String>,
}

/// Parse raw JSON body into an authority verdict.
pub fn parse_validate_response(body: &[u8]) -> LicenseResult<ValidateResponse> {
    serde_json::from_slice(body).map_err(|e| {
        LicenseError::ProtocolError(format!("Failed to parse validate response: {}", e))
    })
}
