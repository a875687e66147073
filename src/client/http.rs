//! Reqwest-based HTTP client for the issuing authority.
//!
//! Only a parsed [`ValidateResponse`] is a verdict. Everything else (send
//! failure, timeout, unexpected status, unreadable body) surfaces as an
//! error for which [`LicenseError::is_unreachable`] holds.

use crate::config::LicenseConfig;
use crate::protocol::models::{
    parse_validate_response, SignedLicense, ValidateRequest, ValidateResponse,
};
use crate::LicenseError;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use tracing::debug;

/// Authority operations the validation engine depends on.
#[async_trait]
pub trait AuthorityClient: Send + Sync {
    /// Ask the authority for a verdict on `license` presented from `device_id`.
    async fn validate(
        &self,
        license: &SignedLicense,
        device_id: &str,
    ) -> Result<ValidateResponse, LicenseError>;
}

/// Authority HTTP client.
pub struct HttpAuthorityClient {
    client: Client,
    user_agent: String,
    base_url: String,
}

impl HttpAuthorityClient {
    /// Create a new authority client from config.
    pub fn new(config: &LicenseConfig) -> Result<Self, LicenseError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| LicenseError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            user_agent: build_user_agent(config),
            base_url: config.authority_url.trim_end_matches('/').to_string(),
        })
    }

    /// Configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn validate_url(&self) -> String {
        format!("{}/licenses/validate", self.base_url)
    }
}

#[async_trait]
impl AuthorityClient for HttpAuthorityClient {
    async fn validate(
        &self,
        license: &SignedLicense,
        device_id: &str,
    ) -> Result<ValidateResponse, LicenseError> {
        let request = ValidateRequest {
            license: license.clone(),
            current_device_binding: device_id.to_string(),
        };

        let response = self
            .client
            .post(self.validate_url())
            .header(USER_AGENT, &self.user_agent)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| LicenseError::AuthorityTransport(format!("Request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| LicenseError::AuthorityTransport(format!("Failed to read body: {}", e)))?;

        debug!(status = status.as_u16(), bytes = body.len(), "Authority responded");

        if status.is_server_error() {
            return Err(LicenseError::AuthorityTransport(format!(
                "Authority returned {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(LicenseError::ProtocolError(format!(
                "Unexpected status {}",
                status
            )));
        }

        parse_validate_response(&body)
    }
}

/// Build a User-Agent string from config.
///
/// Format: `<app>/licensewarden-<version>`
pub fn build_user_agent(config: &LicenseConfig) -> String {
    format!("{}/licensewarden-{}", config.app_name, env!("CARGO_PKG_VERSION"))
}
