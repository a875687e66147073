//! # Licensewarden
//!
//! **Device-bound license issuance and offline-tolerant validation for Rust.**
//!
//! Licensewarden issues Ed25519-signed license artifacts, stores the active
//! one encrypted on disk, and reconciles the issuing authority's verdict with
//! local cryptographic checks when the authority cannot be reached.
//!
//! ## Features
//!
//! - **Ed25519 signed artifacts** over a canonical, field-order independent encoding
//! - **Authority precedence** - an online verdict always wins over the offline check
//! - **Gated offline acceptance** - only licenses that allow it, with expiry and device checks,
//!   within a bounded grace period and never after an authority rejection
//! - **Encrypted, crash-safe storage** - at-rest key in the OS keyring, atomic replace, cross-process lock
//! - **Background revalidation** - jittered re-checks that never take the host down
//! - **Issuing authority** - axum service with device caps, revocation and idempotent issuance
//!
//! ## Quickstart
//!
//! ```no_run
//! use licensewarden::{LicenseConfig, LicenseManager, RevalidationScheduler, SignedLicense, Tier};
//! use std::sync::Arc;
//!
//! # async fn run(pasted: &str) -> Result<(), licensewarden::LicenseError> {
//! let mut config = LicenseConfig::new("myapp", "https://licenses.example.com");
//! config.public_key_hex = Some("authority-public-key-hex".to_string());
//!
//! let manager = Arc::new(LicenseManager::from_config(config)?);
//! let result = manager.validate_and_save(&SignedLicense::from_json(pasted)?).await;
//! println!("{} (offline: {})", result.message, result.used_offline);
//!
//! let (shutdown_handle, shutdown) = licensewarden::shutdown::channel();
//! let scheduler = RevalidationScheduler::new(manager.clone());
//! scheduler.start(shutdown);
//!
//! if manager.check_access(Tier::Pro).is_ok() {
//!     // unlock Pro features
//! }
//! shutdown_handle.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! ## Threat Model
//!
//! Licensewarden protects against:
//! - **Forged or edited artifacts** - any change to payload or signature fails verification
//! - **Offline bypass of revocation** - a rejection from the authority sticks while offline,
//!   offline acceptance expires after the grace period, and licenses can forbid it entirely
//! - **Forged demo licenses** - only the exact demo shape, bound to this device, is accepted
//! - **Credential copying** - the store key lives in the OS keyring, not beside the artifact
//!
//! Licensewarden does **not** prevent binary patching or code modification.
//! Client-side licensing can always be bypassed by a determined attacker
//! with access to the binary.

#![warn(missing_docs)]
#![doc(html_root_url = "https://docs.rs/licensewarden/0.1.0")]

// Core modules
pub mod clock;
pub mod config;
pub mod device;
pub mod errors;
pub mod shutdown;

// Crypto layer
pub mod crypto;

// Protocol layer
pub mod protocol;

// Client layer
pub mod client;

// Storage layer
pub mod store;

// Policy layer
pub mod policy;

// Manager (main public API)
pub mod manager;
pub mod scheduler;

// Issuing authority
#[cfg(feature = "authority")]
pub mod authority;

// Re-exports for public API
pub use clock::{Clock, SystemClock};
pub use config::{BuildMode, LicenseConfig, RevalidationPolicy};
pub use errors::{LicenseError, LicenseResult};
pub use manager::{LicenseManager, ValidationResult};
pub use protocol::models::{LicensePayload, LicenseRecord, LicenseStatus, SignedLicense, Tier};
pub use scheduler::RevalidationScheduler;
pub use store::CredentialStore;

#[cfg(any(test, feature = "test-seams"))]
pub use clock::MockClock;
