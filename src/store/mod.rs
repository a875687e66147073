//! Client-side persistence: encrypted artifact, metadata and file locking.

pub mod atomic;
pub mod credential;
pub mod lock;
pub mod metadata;

pub use credential::CredentialStore;
pub use metadata::{LicenseMetadata, LineageEntry, ValidationPath};
