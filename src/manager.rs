//! License Manager - the validation engine and main public API.
//!
//! The `LicenseManager` reconciles the authority's verdict with local state:
//! - Online validation with bounded, cancellable retries
//! - Offline fallback gated by `allow_offline_validation`
//! - Build-mode gated demo licenses
//! - Tier-gated access checks against the stored artifact

use crate::client::http::{AuthorityClient, HttpAuthorityClient};
use crate::clock::{Clock, SystemClock};
use crate::config::LicenseConfig;
use crate::device::{DeviceIdentity, HostDeviceIdentity};
use crate::policy::access::{self, check_demo, check_offline, DEMO_DISABLED_MESSAGE};
use crate::policy::rules::is_valid_demo_code;
use crate::protocol::models::{SignedLicense, Tier, ValidateResponse};
use crate::shutdown::Shutdown;
use crate::store::metadata::{LicenseMetadata, ValidationPath, STATUS_VALID};
use crate::store::CredentialStore;
use crate::LicenseError;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of one validation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    /// Whether the license was accepted.
    pub valid: bool,

    /// Verdict message, suitable for display.
    pub message: String,

    /// Whether acceptance happened without the authority.
    pub used_offline: bool,
}

impl ValidationResult {
    fn accepted(message: impl Into<String>, used_offline: bool) -> Self {
        Self {
            valid: true,
            message: message.into(),
            used_offline,
        }
    }

    fn rejected(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
            used_offline: false,
        }
    }
}

/// Main license manager.
///
/// Create one instance per process and share it (behind `Arc`) with the
/// revalidation scheduler. All durable state lives in the credential store.
pub struct LicenseManager {
    config: LicenseConfig,
    clock: Arc<dyn Clock>,
    authority: Arc<dyn AuthorityClient>,
    device: Arc<dyn DeviceIdentity>,
    store: Arc<CredentialStore>,
    shutdown: Shutdown,
}

impl LicenseManager {
    /// Create a manager with explicit collaborators.
    ///
    /// # Errors
    /// Returns `ConfigError` if configuration validation fails.
    pub fn new(
        config: LicenseConfig,
        authority: Arc<dyn AuthorityClient>,
        device: Arc<dyn DeviceIdentity>,
        store: Arc<CredentialStore>,
    ) -> Result<Self, LicenseError> {
        config.validate()?;
        Ok(Self::assemble(config, Arc::new(SystemClock), authority, device, store))
    }

    /// Create a manager wired to the HTTP authority, the host fingerprint and
    /// the default store location.
    pub fn from_config(config: LicenseConfig) -> Result<Self, LicenseError> {
        config.validate()?;
        let authority = Arc::new(HttpAuthorityClient::new(&config)?);
        let store = Arc::new(CredentialStore::open(&config.storage_namespace)?);
        Ok(Self::assemble(
            config,
            Arc::new(SystemClock),
            authority,
            Arc::new(HostDeviceIdentity),
            store,
        ))
    }

    /// Create a manager with a custom clock (for testing).
    #[cfg(any(test, feature = "test-seams"))]
    pub fn new_with_clock(
        config: LicenseConfig,
        authority: Arc<dyn AuthorityClient>,
        device: Arc<dyn DeviceIdentity>,
        store: Arc<CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LicenseError> {
        config.validate()?;
        Ok(Self::assemble(config, clock, authority, device, store))
    }

    fn assemble(
        config: LicenseConfig,
        clock: Arc<dyn Clock>,
        authority: Arc<dyn AuthorityClient>,
        device: Arc<dyn DeviceIdentity>,
        store: Arc<CredentialStore>,
    ) -> Self {
        Self {
            config,
            clock,
            authority,
            device,
            store,
            shutdown: Shutdown::never(),
        }
    }

    /// Abort online attempts and pending store I/O when `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Validate `license` and persist it if accepted.
    ///
    /// The authority's verdict wins whenever one is received. Without a
    /// verdict the license is checked offline, and only if it allows that,
    /// the authority did not reject it last time, and the offline grace has
    /// not run out. Every outcome except cancellation is recorded in the
    /// metadata.
    pub async fn validate_and_save(&self, license: &SignedLicense) -> ValidationResult {
        let device_id = self.device.device_id();

        let outcome = if license.is_demo() {
            self.validate_demo(license, &device_id).await
        } else {
            match self.validate_online(license, &device_id).await {
                Ok(verdict) => self.apply_verdict(license, &device_id, verdict).await,
                Err(cause) if cause.is_unreachable() => {
                    self.validate_offline(license, &device_id, cause).await
                }
                Err(e) => Err(e),
            }
        };

        match outcome {
            Ok(result) => result,
            Err(LicenseError::Cancelled) => {
                info!(license_id = %license.payload.license_id, "Validation cancelled");
                ValidationResult::rejected(LicenseError::Cancelled.to_string())
            }
            Err(e) => {
                warn!(license_id = %license.payload.license_id, error = %e, "Validation failed");
                // No verdict from the authority: never touch the online standing.
                let message = e.to_string();
                match self
                    .record(license, &device_id, ValidationPath::Offline, false, &message)
                    .await
                {
                    Ok(_) => ValidationResult::rejected(message),
                    Err(cancelled) => ValidationResult::rejected(cancelled.to_string()),
                }
            }
        }
    }

    /// Synthesize and activate a demo license from a 16-character code.
    ///
    /// Only available in evaluation builds.
    pub async fn activate_demo(&self, code: &str) -> ValidationResult {
        if !self.config.mode.allows_demo() {
            warn!("Demo activation attempted in a production build");
            return ValidationResult::rejected(DEMO_DISABLED_MESSAGE);
        }
        let code = code.trim();
        if !is_valid_demo_code(code) {
            return ValidationResult::rejected(LicenseError::InvalidDemoCode.to_string());
        }

        let license = SignedLicense::demo(code, &self.device.device_id(), self.clock.now_utc());
        self.validate_and_save(&license).await
    }

    /// Re-run validation on the stored artifact. `None` when nothing is stored.
    pub async fn revalidate_stored(&self) -> Option<ValidationResult> {
        let license = self.current_license().await?;
        Some(self.validate_and_save(&license).await)
    }

    /// The stored artifact, if present and readable.
    pub async fn current_license(&self) -> Option<SignedLicense> {
        self.with_store(|store| store.load_raw()).await.ok().flatten()
    }

    /// The stored metadata, if present and readable.
    pub async fn current_metadata(&self) -> Option<LicenseMetadata> {
        self.with_store(|store| store.load_metadata()).await.ok().flatten()
    }

    /// Gate a feature on the stored license.
    ///
    /// Reads the store synchronously; call it off the async runtime or from
    /// `spawn_blocking` when latency matters.
    ///
    /// Requires a readable artifact, a last verdict of "Valid", a passing
    /// local check and `tier >= required`.
    ///
    /// # Errors
    /// - `MissingLicense` - Nothing stored, or the last verdict was a rejection
    /// - `OfflineValidationFailed` - Signature does not verify
    /// - `Expired` / `DeviceMismatch` - Local rules fail
    /// - `TierTooLow` - Tier below `required`
    pub fn check_access(&self, required: Tier) -> Result<Tier, LicenseError> {
        let license = self.store.load_raw().ok_or(LicenseError::MissingLicense)?;

        let metadata = self.store.load_metadata().unwrap_or_default();
        if !metadata.is_valid() {
            debug!(status = %metadata.revocation_status, "Last verdict was not valid");
            return Err(LicenseError::MissingLicense);
        }

        access::check_access(
            &license,
            self.config.trust_anchor(),
            self.config.mode,
            &self.device.device_id(),
            self.clock.now_utc(),
            required,
        )
    }

    /// Get the current configuration.
    pub fn config(&self) -> &LicenseConfig {
        &self.config
    }

    /// The credential store this manager persists to.
    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Time source used for expiry and scheduling.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Online attempt with bounded retries.
    ///
    /// Transport and protocol failures are retried and end up as unreachable;
    /// any other client error ends the attempt at once.
    async fn validate_online(
        &self,
        license: &SignedLicense,
        device_id: &str,
    ) -> Result<ValidateResponse, LicenseError> {
        let mut shutdown = self.shutdown.clone();
        let mut last_error =
            LicenseError::AuthorityTransport("No online attempt made".to_string());

        for attempt in 1..=self.config.online_attempts {
            if attempt > 1 {
                let delay = retry_delay(self.config.retry_base_delay, attempt);
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return Err(LicenseError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let call = tokio::time::timeout(
                self.config.request_timeout,
                self.authority.validate(license, device_id),
            );
            let outcome = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Err(LicenseError::Cancelled),
                outcome = call => outcome,
            };

            match outcome {
                Ok(Ok(verdict)) => return Ok(verdict),
                Ok(Err(e)) if e.is_unreachable() => {
                    warn!(attempt, error = %e, "Online validation attempt failed");
                    last_error = e;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    warn!(attempt, "Online validation attempt timed out");
                    last_error = LicenseError::AuthorityTransport(format!(
                        "Timed out after {:?}",
                        self.config.request_timeout
                    ));
                }
            }
        }

        Err(last_error)
    }

    async fn apply_verdict(
        &self,
        license: &SignedLicense,
        device_id: &str,
        verdict: ValidateResponse,
    ) -> Result<ValidationResult, LicenseError> {
        let license_id = &license.payload.license_id;

        if verdict.is_valid {
            self.persist(license).await?;
            let next = self
                .record(license, device_id, ValidationPath::Online, true, &verdict.message)
                .await?;
            info!(license_id = %license_id, next_check = %next, "License accepted online");
            Ok(ValidationResult::accepted(verdict.message, false))
        } else {
            self.record(license, device_id, ValidationPath::Online, false, &verdict.message)
                .await?;
            info!(license_id = %license_id, reason = %verdict.message, "License rejected online");
            Ok(ValidationResult::rejected(verdict.message))
        }
    }

    async fn validate_offline(
        &self,
        license: &SignedLicense,
        device_id: &str,
        cause: LicenseError,
    ) -> Result<ValidationResult, LicenseError> {
        let now = self.clock.now_utc();
        let license_id = &license.payload.license_id;
        warn!(license_id = %license_id, error = %cause, "Authority unreachable");

        let outcome = if license.payload.allow_offline_validation {
            let grace = to_chrono(self.config.revalidation.offline_grace);
            let standing = self
                .current_metadata()
                .await
                .map_or(Ok(()), |m| m.offline_standing(license_id, grace, now));
            standing
                .and_then(|()| check_offline(license, self.config.trust_anchor(), device_id, now))
        } else {
            Err(LicenseError::OnlineValidationRequired)
        };

        match outcome {
            Ok(()) => {
                self.persist(license).await?;
                self.record(license, device_id, ValidationPath::Offline, true, STATUS_VALID)
                    .await?;
                info!(license_id = %license_id, used_offline = true, "License accepted offline");
                Ok(ValidationResult::accepted("Valid (offline)", true))
            }
            Err(e) => {
                let message = e.to_string();
                self.record(license, device_id, ValidationPath::Offline, false, &message)
                    .await?;
                info!(license_id = %license_id, reason = %message, "License rejected offline");
                Ok(ValidationResult::rejected(message))
            }
        }
    }

    async fn validate_demo(
        &self,
        license: &SignedLicense,
        device_id: &str,
    ) -> Result<ValidationResult, LicenseError> {
        let license_id = &license.payload.license_id;

        match check_demo(license, self.config.mode, device_id) {
            Ok(()) => {
                self.persist(license).await?;
                self.record(license, device_id, ValidationPath::Demo, true, STATUS_VALID)
                    .await?;
                info!(license_id = %license_id, "Demo license accepted");
                Ok(ValidationResult::accepted("Valid (demo)", true))
            }
            Err(e) => {
                let message = e.to_string();
                self.record(license, device_id, ValidationPath::Demo, false, &message)
                    .await?;
                warn!(license_id = %license_id, reason = %message, "Demo license rejected");
                Ok(ValidationResult::rejected(message))
            }
        }
    }

    /// Save an accepted artifact. A failed write is logged, not fatal.
    async fn persist(&self, license: &SignedLicense) -> Result<(), LicenseError> {
        let artifact = license.clone();
        if let Err(e) = self.with_store(move |store| store.save(&artifact)).await? {
            warn!(
                license_id = %license.payload.license_id,
                error = %e,
                "Accepted license not persisted"
            );
        }
        Ok(())
    }

    /// Record an attempt and schedule the next check. Returns the due time.
    async fn record(
        &self,
        license: &SignedLicense,
        device_id: &str,
        path: ValidationPath,
        accepted: bool,
        message: &str,
    ) -> Result<DateTime<Utc>, LicenseError> {
        let now = self.clock.now_utc();
        let policy = &self.config.revalidation;
        let after = match (path, accepted) {
            (ValidationPath::Online, true) => self.accepted_interval(),
            (ValidationPath::Demo, true) => policy.default_interval,
            _ => policy.recheck_after_failure,
        };
        let next = now + to_chrono(after);

        let license_id = license.payload.license_id.clone();
        let device_id = device_id.to_string();
        let message = message.to_string();
        self.with_store(move |store| {
            store.update_metadata(|metadata| {
                metadata.track_license(&license_id);
                metadata.record_attempt(now, path, accepted, &message);
                metadata.device_id = Some(device_id);
                metadata.next_revalidation_at = Some(next);
            })
        })
        .await?;
        Ok(next)
    }

    /// Run blocking store I/O off the async workers, abandoning the wait on
    /// shutdown. Nothing starts once shutdown has fired; an abandoned write
    /// still completes atomically.
    async fn with_store<T, F>(&self, op: F) -> Result<T, LicenseError>
    where
        F: FnOnce(&CredentialStore) -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(LicenseError::Cancelled);
        }
        let store = Arc::clone(&self.store);
        let task = tokio::task::spawn_blocking(move || op(&store));
        let mut shutdown = self.shutdown.clone();

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(LicenseError::Cancelled),
            joined = task => joined
                .map_err(|e| LicenseError::StorageIO(format!("Store task failed: {}", e))),
        }
    }

    /// Jittered interval inside the accepted window.
    fn accepted_interval(&self) -> Duration {
        let policy = &self.config.revalidation;
        let min = policy.accepted_min.as_secs();
        let max = policy.accepted_max.as_secs().max(min);
        Duration::from_secs(rand::thread_rng().gen_range(min..=max))
    }
}

/// Delay before `attempt` (2-based): base, 2x base, 4x base, ...
fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(2).min(16);
    base.saturating_mul(1u32 << exponent)
}

/// Conversion for scheduling arithmetic; out-of-range values clamp to a year.
fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::config::BuildMode;
    use crate::crypto::signing::{decode_signing_key, sign};
    use crate::device::FixedDeviceIdentity;
    use crate::protocol::models::LicensePayload;
    use crate::store::metadata::STATUS_VALID;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    const TEST_SEED_HEX: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";
    const TEST_VERIFY_KEY_HEX: &str =
        "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a";

    /// Replays a scripted sequence of outcomes; the last one repeats.
    struct ScriptedAuthority {
        script: Mutex<Vec<Result<ValidateResponse, String>>>,
        calls: AtomicU32,
    }

    impl ScriptedAuthority {
        fn new(script: Vec<Result<ValidateResponse, String>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AuthorityClient for ScriptedAuthority {
        async fn validate(
            &self,
            _license: &SignedLicense,
            _device_id: &str,
        ) -> Result<ValidateResponse, LicenseError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            let next = if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            };
            next.map_err(LicenseError::AuthorityTransport)
        }
    }

    struct Harness {
        _dir: TempDir,
        clock: Arc<MockClock>,
        manager: LicenseManager,
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
    }

    fn harness(authority: Arc<dyn AuthorityClient>, mode: BuildMode) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(CredentialStore::with_path(dir.path().to_path_buf()).unwrap());
        let clock = Arc::new(MockClock::new(now()));

        let mut config = LicenseConfig::new("test-app", "https://licenses.example.com");
        config.public_key_hex = Some(TEST_VERIFY_KEY_HEX.to_string());
        config.retry_base_delay = Duration::from_millis(1);
        config.mode = mode;

        let manager = LicenseManager::new_with_clock(
            config,
            authority,
            Arc::new(FixedDeviceIdentity("DEVICE-A".to_string())),
            store,
            clock.clone(),
        )
        .unwrap();

        Harness {
            _dir: dir,
            clock,
            manager,
        }
    }

    fn signed(allow_offline: bool) -> SignedLicense {
        let payload = LicensePayload {
            license_id: "lic-1".to_string(),
            user_id: "user-1".to_string(),
            tier: Tier::Pro,
            issued_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            expires_at: Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()),
            is_admin_key: false,
            device_binding_id: Some("DEVICE-A".to_string()),
            allow_offline_validation: allow_offline,
            notes: String::new(),
        };
        sign(&payload, &decode_signing_key(TEST_SEED_HEX).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_online_accept_persists_and_schedules() {
        let authority = ScriptedAuthority::new(vec![Ok(ValidateResponse::valid())]);
        let h = harness(authority.clone(), BuildMode::Production);

        let result = h.manager.validate_and_save(&signed(false)).await;
        assert_eq!(result, ValidationResult::accepted("Valid", false));
        assert_eq!(authority.calls(), 1);
        assert!(h.manager.current_license().await.is_some());

        let metadata = h.manager.store().load_metadata().unwrap();
        assert_eq!(metadata.revocation_status, STATUS_VALID);
        assert_eq!(metadata.device_id.as_deref(), Some("DEVICE-A"));
        let next = metadata.next_revalidation_at.unwrap();
        assert!(next >= now() + chrono::Duration::hours(5));
        assert!(next <= now() + chrono::Duration::hours(7));
    }

    #[tokio::test]
    async fn test_online_reject_wins_over_valid_signature() {
        let authority =
            ScriptedAuthority::new(vec![Ok(ValidateResponse::invalid("License revoked"))]);
        let h = harness(authority, BuildMode::Production);

        let result = h.manager.validate_and_save(&signed(true)).await;
        assert!(!result.valid);
        assert_eq!(result.message, "License revoked");
        assert!(h.manager.current_license().await.is_none());

        let metadata = h.manager.store().load_metadata().unwrap();
        assert_eq!(metadata.revocation_status, "License revoked");
        assert_eq!(
            metadata.next_revalidation_at,
            Some(now() + chrono::Duration::minutes(15))
        );
    }

    #[tokio::test]
    async fn test_retries_until_verdict() {
        let authority = ScriptedAuthority::new(vec![
            Err("connection refused".to_string()),
            Err("connection refused".to_string()),
            Ok(ValidateResponse::valid()),
        ]);
        let h = harness(authority.clone(), BuildMode::Production);

        let result = h.manager.validate_and_save(&signed(false)).await;
        assert!(result.valid);
        assert!(!result.used_offline);
        assert_eq!(authority.calls(), 3);
    }

    #[tokio::test]
    async fn test_unreachable_with_offline_allowed() {
        let authority = ScriptedAuthority::new(vec![Err("dns failure".to_string())]);
        let h = harness(authority.clone(), BuildMode::Production);

        let result = h.manager.validate_and_save(&signed(true)).await;
        assert!(result.valid);
        assert!(result.used_offline);
        assert_eq!(authority.calls(), 3);
        assert!(h.manager.current_license().await.is_some());

        let metadata = h.manager.store().load_metadata().unwrap();
        assert_eq!(metadata.last_online_check_at, None);
        assert_eq!(
            metadata.validation_lineage.last().unwrap().path,
            ValidationPath::Offline
        );
    }

    #[tokio::test]
    async fn test_unreachable_with_offline_forbidden() {
        let authority = ScriptedAuthority::new(vec![Err("timeout".to_string())]);
        let h = harness(authority, BuildMode::Production);

        let result = h.manager.validate_and_save(&signed(false)).await;
        assert!(!result.valid);
        assert_eq!(result.message, "Online validation required");
        assert!(h.manager.current_license().await.is_none());
    }

    #[tokio::test]
    async fn test_offline_rejects_expired() {
        let authority = ScriptedAuthority::new(vec![Err("timeout".to_string())]);
        let h = harness(authority, BuildMode::Production);
        h.clock.advance(chrono::Duration::days(365));

        let result = h.manager.validate_and_save(&signed(true)).await;
        assert_eq!(result.message, "Expired");
    }

    #[tokio::test]
    async fn test_offline_refused_after_online_rejection() {
        let authority = ScriptedAuthority::new(vec![
            Ok(ValidateResponse::invalid("License revoked")),
            Err("dns failure".to_string()),
        ]);
        let h = harness(authority, BuildMode::Production);
        let license = signed(true);

        assert!(!h.manager.validate_and_save(&license).await.valid);

        let result = h.manager.validate_and_save(&license).await;
        assert_eq!(result, ValidationResult::rejected("License revoked"));
        assert!(h.manager.current_license().await.is_none());

        let metadata = h.manager.store().load_metadata().unwrap();
        assert_eq!(metadata.revocation_status, "License revoked");
        assert!(h.manager.check_access(Tier::Basic).is_err());

        h.clock.advance(chrono::Duration::days(300));
        assert!(!h.manager.validate_and_save(&license).await.valid);
    }

    #[tokio::test]
    async fn test_offline_acceptance_bounded_by_grace() {
        let authority = ScriptedAuthority::new(vec![
            Ok(ValidateResponse::valid()),
            Err("dns failure".to_string()),
        ]);
        let h = harness(authority, BuildMode::Production);
        let license = signed(true);
        assert!(h.manager.validate_and_save(&license).await.valid);

        h.clock.advance(chrono::Duration::days(6));
        let result = h.manager.validate_and_save(&license).await;
        assert_eq!(result, ValidationResult::accepted("Valid (offline)", true));

        // Offline acceptances do not extend the window.
        h.clock.advance(chrono::Duration::days(2));
        let result = h.manager.validate_and_save(&license).await;
        assert_eq!(
            result,
            ValidationResult::rejected(LicenseError::OfflineGraceExceeded.to_string())
        );
        assert!(h.manager.check_access(Tier::Basic).is_err());
    }

    #[tokio::test]
    async fn test_client_error_is_not_treated_as_unreachable() {
        struct Misconfigured;

        #[async_trait]
        impl AuthorityClient for Misconfigured {
            async fn validate(
                &self,
                _license: &SignedLicense,
                _device_id: &str,
            ) -> Result<ValidateResponse, LicenseError> {
                Err(LicenseError::ConfigError("bad client".to_string()))
            }
        }

        let h = harness(Arc::new(Misconfigured), BuildMode::Production);
        let result = h.manager.validate_and_save(&signed(true)).await;
        assert!(!result.valid);
        assert!(!result.used_offline);
        assert!(h.manager.current_license().await.is_none());
    }

    #[tokio::test]
    async fn test_demo_requires_evaluation_build() {
        let authority = ScriptedAuthority::new(vec![Ok(ValidateResponse::valid())]);
        let h = harness(authority.clone(), BuildMode::Production);

        let result = h.manager.activate_demo("ABCD1234EFGH5678").await;
        assert_eq!(result.message, DEMO_DISABLED_MESSAGE);

        let demo = SignedLicense::demo("ABCD1234EFGH5678", "DEVICE-A", now());
        let result = h.manager.validate_and_save(&demo).await;
        assert!(!result.valid);
        assert_eq!(authority.calls(), 0);
    }

    #[tokio::test]
    async fn test_demo_activation_in_evaluation_build() {
        let authority = ScriptedAuthority::new(vec![Ok(ValidateResponse::valid())]);
        let h = harness(authority.clone(), BuildMode::Evaluation);

        assert!(!h.manager.activate_demo("short").await.valid);

        let result = h.manager.activate_demo("abcd1234efgh5678").await;
        assert!(result.valid);
        assert_eq!(authority.calls(), 0);
        assert_eq!(h.manager.check_access(Tier::Pro).unwrap(), Tier::Pro);
    }

    #[tokio::test]
    async fn test_check_access_requires_valid_status() {
        let authority = ScriptedAuthority::new(vec![
            Ok(ValidateResponse::valid()),
            Ok(ValidateResponse::invalid("License suspended")),
        ]);
        let h = harness(authority, BuildMode::Production);
        assert!(matches!(
            h.manager.check_access(Tier::Basic),
            Err(LicenseError::MissingLicense)
        ));

        h.manager.validate_and_save(&signed(false)).await;
        assert_eq!(h.manager.check_access(Tier::Basic).unwrap(), Tier::Pro);
        assert!(matches!(
            h.manager.check_access(Tier::Enterprise),
            Err(LicenseError::TierTooLow { .. })
        ));

        let result = h.manager.revalidate_stored().await.unwrap();
        assert!(!result.valid);
        assert!(matches!(
            h.manager.check_access(Tier::Basic),
            Err(LicenseError::MissingLicense)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_retries() {
        let authority = ScriptedAuthority::new(vec![Err("timeout".to_string())]);
        let (handle, shutdown) = crate::shutdown::channel();
        let mut h = harness(authority, BuildMode::Production);
        h.manager = h.manager.with_shutdown(shutdown);
        handle.shutdown();

        let result = h.manager.validate_and_save(&signed(true)).await;
        assert!(!result.valid);
        assert_eq!(result.message, "Operation cancelled");
        assert!(h.manager.store().load_metadata().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_abandons_store_io() {
        let authority = ScriptedAuthority::new(vec![Ok(ValidateResponse::valid())]);
        let (handle, shutdown) = crate::shutdown::channel();
        let mut h = harness(authority.clone(), BuildMode::Evaluation);
        h.manager = h.manager.with_shutdown(shutdown);
        handle.shutdown();

        let result = h.manager.activate_demo("ABCD1234EFGH5678").await;
        assert!(!result.valid);
        assert_eq!(result.message, "Operation cancelled");
        assert_eq!(authority.calls(), 0);
        assert!(h.manager.store().load_raw().is_none());
        assert!(h.manager.store().load_metadata().is_none());
    }

    #[test]
    fn test_retry_delay_doubles() {
        let base = Duration::from_millis(500);
        assert_eq!(retry_delay(base, 2), Duration::from_millis(500));
        assert_eq!(retry_delay(base, 3), Duration::from_millis(1000));
        assert_eq!(retry_delay(base, 4), Duration::from_millis(2000));
    }

    #[test]
    fn test_config_accessor() {
        let h = harness(
            ScriptedAuthority::new(vec![Ok(ValidateResponse::valid())]),
            BuildMode::Production,
        );
        assert_eq!(h.manager.config().app_name, "test-app");
    }
}
