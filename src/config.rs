//! Licensewarden client configuration.

use crate::crypto::verify::decode_public_key;
use crate::LicenseError;
use std::time::Duration;

/// Trust anchor compiled into the client.
///
/// Used when no server-supplied key is configured so offline verification
/// works before first contact with the authority.
pub const EMBEDDED_PUBLIC_KEY_HEX: &str =
    "e073801101ce4ed5fb7056002ccfc931bb258d6cfd6c5e9724f118a6464e8bec";

/// Build flavor of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    /// Shipping build: DEMO-sentinel licenses are never accepted.
    #[default]
    Production,
    /// Evaluation build: locally synthesized demo licenses are accepted.
    Evaluation,
}

impl BuildMode {
    /// Whether the DEMO pathway is reachable in this build.
    pub fn allows_demo(&self) -> bool {
        matches!(self, BuildMode::Evaluation)
    }
}

/// Timing of background revalidation.
#[derive(Debug, Clone)]
pub struct RevalidationPolicy {
    /// Lower bound of the jittered window after an online acceptance.
    pub accepted_min: Duration,

    /// Upper bound of the jittered window after an online acceptance.
    pub accepted_max: Duration,

    /// Re-check delay after any rejection or an unreachable authority.
    pub recheck_after_failure: Duration,

    /// Interval assumed when no next check is recorded.
    pub default_interval: Duration,

    /// Back-off when there is nothing to validate or a cycle failed.
    pub fallback_interval: Duration,

    /// How long offline acceptance stays available after the authority last
    /// answered for the license (or after the first offline acceptance of a
    /// license the authority has never seen from this device).
    pub offline_grace: Duration,
}

impl Default for RevalidationPolicy {
    fn default() -> Self {
        Self {
            accepted_min: Duration::from_secs(5 * 60 * 60),
            accepted_max: Duration::from_secs(7 * 60 * 60),
            recheck_after_failure: Duration::from_secs(15 * 60),
            default_interval: Duration::from_secs(6 * 60 * 60),
            fallback_interval: Duration::from_secs(5 * 60),
            offline_grace: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Configuration for the licensing client.
///
/// Populated once at startup and validated eagerly.
#[derive(Debug, Clone)]
pub struct LicenseConfig {
    /// Application name (used in the User-Agent).
    pub app_name: String,

    /// Base URL of the issuing authority (e.g. `https://licenses.example.com`).
    pub authority_url: String,

    /// Server-supplied Ed25519 public key (hex). Falls back to
    /// [`EMBEDDED_PUBLIC_KEY_HEX`] when absent.
    pub public_key_hex: Option<String>,

    /// Directory name under the user data dir for the credential store.
    pub storage_namespace: String,

    /// Build flavor; gates the demo pathway.
    pub mode: BuildMode,

    /// Timeout of a single online validation attempt.
    pub request_timeout: Duration,

    /// Number of online attempts before declaring the authority unreachable.
    pub online_attempts: u32,

    /// Delay before the second attempt, doubled for each later one.
    pub retry_base_delay: Duration,

    /// Background revalidation timing.
    pub revalidation: RevalidationPolicy,
}

impl LicenseConfig {
    /// Configuration with production defaults.
    pub fn new(app_name: impl Into<String>, authority_url: impl Into<String>) -> Self {
        let app_name = app_name.into();
        Self {
            storage_namespace: app_name.clone(),
            app_name,
            authority_url: authority_url.into(),
            public_key_hex: None,
            mode: BuildMode::Production,
            request_timeout: Duration::from_secs(10),
            online_attempts: 3,
            retry_base_delay: Duration::from_millis(500),
            revalidation: RevalidationPolicy::default(),
        }
    }

    /// The public key offline verification trusts.
    pub fn trust_anchor(&self) -> &str {
        self.public_key_hex
            .as_deref()
            .unwrap_or(EMBEDDED_PUBLIC_KEY_HEX)
    }

    /// Validate configuration for obvious errors.
    pub fn validate(&self) -> Result<(), LicenseError> {
        if self.app_name.is_empty() {
            return Err(LicenseError::ConfigError(
                "app_name cannot be empty".to_string(),
            ));
        }
        if self.storage_namespace.is_empty() {
            return Err(LicenseError::ConfigError(
                "storage_namespace cannot be empty".to_string(),
            ));
        }
        if self.online_attempts == 0 {
            return Err(LicenseError::ConfigError(
                "online_attempts must be at least 1".to_string(),
            ));
        }
        decode_public_key(self.trust_anchor()).map_err(|e| {
            LicenseError::ConfigError(format!("Trust anchor unusable: {}", e))
        })?;

        if self.mode == BuildMode::Production && !is_secure_url(&self.authority_url) {
            return Err(LicenseError::ConfigError(format!(
                "authority_url must use https in production (loopback excepted), got {}",
                self.authority_url
            )));
        }

        let window = &self.revalidation;
        if window.accepted_min > window.accepted_max {
            return Err(LicenseError::ConfigError(
                "revalidation window is inverted".to_string(),
            ));
        }
        if window.offline_grace.is_zero() {
            return Err(LicenseError::ConfigError(
                "offline_grace must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// https, or plain http to a loopback authority.
fn is_secure_url(url: &str) -> bool {
    url.starts_with("https://")
        || url.starts_with("http://127.0.0.1")
        || url.starts_with("http://localhost")
        || url.starts_with("http://[::1]")
}
