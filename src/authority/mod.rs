//! Issuing authority: signs licenses and serves the authoritative verdict.

pub mod config;
pub mod http;
pub mod records;
pub mod service;

pub use config::AuthorityConfig;
pub use http::{create_router, AppState};
pub use records::RecordStore;
pub use service::LicenseAuthority;
