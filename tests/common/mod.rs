//! Shared test helpers for licensewarden integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::SigningKey;
use licensewarden::client::http::AuthorityClient;
use licensewarden::crypto::signing::{decode_signing_key, public_key_hex, sign};
use licensewarden::device::FixedDeviceIdentity;
use licensewarden::protocol::models::ValidateResponse;
use licensewarden::{
    CredentialStore, LicenseConfig, LicenseError, LicenseManager, LicensePayload, SignedLicense,
    Tier,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// RFC 8032 test vector 1 seed.
pub const TEST_SEED_HEX: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";

/// Public key of [`TEST_SEED_HEX`].
pub const TEST_PUBLIC_KEY_HEX: &str =
    "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a";

pub const DEVICE_A: &str = "DEVICE-A";

pub fn test_signing_key() -> SigningKey {
    decode_signing_key(TEST_SEED_HEX).unwrap()
}

pub fn test_public_key_hex() -> String {
    public_key_hex(&test_signing_key())
}

/// A Pro payload expiring 30 days from now, bound to [`DEVICE_A`].
pub fn payload(allow_offline: bool) -> LicensePayload {
    let now = Utc::now();
    LicensePayload {
        license_id: "lic-test".to_string(),
        user_id: "user-1".to_string(),
        tier: Tier::Pro,
        issued_at: now,
        expires_at: Some(now + Duration::days(30)),
        is_admin_key: false,
        device_binding_id: Some(DEVICE_A.to_string()),
        allow_offline_validation: allow_offline,
        notes: String::new(),
    }
}

pub fn expiring_at(expires_at: DateTime<Utc>) -> LicensePayload {
    LicensePayload {
        expires_at: Some(expires_at),
        ..payload(true)
    }
}

pub fn signed(payload: &LicensePayload) -> SignedLicense {
    sign(payload, &test_signing_key()).unwrap()
}

/// Client config trusting the test key, with fast retries.
pub fn client_config(authority_url: &str) -> LicenseConfig {
    let mut config = LicenseConfig::new("licensewarden-test", authority_url);
    config.public_key_hex = Some(TEST_PUBLIC_KEY_HEX.to_string());
    config.retry_base_delay = std::time::Duration::from_millis(5);
    config.request_timeout = std::time::Duration::from_secs(2);
    config
}

pub fn manager_with(
    dir: &TempDir,
    config: LicenseConfig,
    authority: Arc<dyn AuthorityClient>,
    device_id: &str,
) -> LicenseManager {
    let store = Arc::new(CredentialStore::with_path(dir.path().to_path_buf()).unwrap());
    LicenseManager::new(
        config,
        authority,
        Arc::new(FixedDeviceIdentity(device_id.to_string())),
        store,
    )
    .unwrap()
}

/// Authority answering every call with the same verdict.
pub struct FixedVerdict {
    pub response: ValidateResponse,
    pub calls: AtomicU32,
}

impl FixedVerdict {
    pub fn new(response: ValidateResponse) -> Arc<Self> {
        Arc::new(Self {
            response,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthorityClient for FixedVerdict {
    async fn validate(
        &self,
        _license: &SignedLicense,
        _device_id: &str,
    ) -> Result<ValidateResponse, LicenseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }
}

/// Authority that never answers; every call hangs until the caller times out.
#[derive(Default)]
pub struct HangingAuthority {
    pub calls: AtomicU32,
}

impl HangingAuthority {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthorityClient for HangingAuthority {
    async fn validate(
        &self,
        _license: &SignedLicense,
        _device_id: &str,
    ) -> Result<ValidateResponse, LicenseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// Authority whose transport always fails immediately.
#[derive(Default)]
pub struct DownAuthority {
    pub calls: AtomicU32,
}

#[async_trait]
impl AuthorityClient for DownAuthority {
    async fn validate(
        &self,
        _license: &SignedLicense,
        _device_id: &str,
    ) -> Result<ValidateResponse, LicenseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(LicenseError::AuthorityTransport("connection refused".to_string()))
    }
}

/// Authority that panics inside the engine call.
pub struct PanickingAuthority;

#[async_trait]
impl AuthorityClient for PanickingAuthority {
    async fn validate(
        &self,
        _license: &SignedLicense,
        _device_id: &str,
    ) -> Result<ValidateResponse, LicenseError> {
        panic!("authority client bug");
    }
}

/// Serve the authority router on an ephemeral loopback port.
#[cfg(feature = "authority")]
pub async fn spawn_authority(
    operator_token: &str,
) -> (String, Arc<licensewarden::authority::LicenseAuthority>) {
    use licensewarden::authority::{create_router, AppState, LicenseAuthority, RecordStore};

    let authority = Arc::new(LicenseAuthority::new(
        test_signing_key(),
        RecordStore::in_memory(),
    ));
    let app = create_router(AppState::new(authority.clone(), operator_token));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), authority)
}
