//! Provider descriptors and engine configuration.

use crate::error::{FlowError, FlowResult};
use crate::pkce::CodeChallengeMethod;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Field names to read identity attributes from, for providers whose
/// claims deviate from the standard OIDC names. Applied against the merged
/// claim set before the standard fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaimMapping {
    pub subject_field: Option<String>,
    pub email_field: Option<String>,
    pub name_field: Option<String>,
    pub picture_field: Option<String>,
}

/// Everything provider-specific, as data. One descriptor per provider;
/// provider-specific behavior is endpoints plus an optional
/// [`ClaimMapping`], never a subtype.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: Option<String>,
    pub jwks_uri: Option<String>,
    /// Issuer values accepted in ID tokens. Leave empty for plain-OAuth2
    /// providers that issue no ID token; any ID token such a provider does
    /// send is ignored.
    pub issuers: Vec<String>,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    /// Additional authorization-request parameters (`access_type`,
    /// `hd`, ...).
    pub auth_params: HashMap<String, String>,
    pub challenge_method: CodeChallengeMethod,
    pub claim_mapping: Option<ClaimMapping>,
}

impl ProviderConfig {
    /// Fail-fast configuration check, run at registration time.
    pub fn validate(&self) -> FlowResult<()> {
        if self.provider_id.trim().is_empty() {
            return Err(FlowError::Config("provider_id is required".to_string()));
        }
        if self.client_id.trim().is_empty() {
            return Err(FlowError::Config(format!(
                "provider '{}' has no client_id",
                self.provider_id
            )));
        }
        if self.redirect_uri.trim().is_empty() {
            return Err(FlowError::Config(format!(
                "provider '{}' has no redirect_uri",
                self.provider_id
            )));
        }
        if !self.issuers.is_empty() && self.jwks_uri.is_none() {
            return Err(FlowError::Config(format!(
                "provider '{}' expects ID tokens but has no jwks_uri",
                self.provider_id
            )));
        }
        Ok(())
    }
}

/// What to do when the token response carries an ID token that fails
/// validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdTokenPolicy {
    /// Reject the callback. The default.
    #[default]
    FailHard,
    /// Log a warning, drop the rejected assertion, and continue on the
    /// userinfo path. Compatibility mode for providers with known-broken
    /// tokens; unverified claims are never propagated.
    WarnAndContinue,
}

/// Engine-wide tunables.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub state_ttl_seconds: u64,
    pub http_timeout_seconds: u64,
    pub jwks_cache_ttl_seconds: u64,
    pub id_token_policy: IdTokenPolicy,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            state_ttl_seconds: 600,
            http_timeout_seconds: 30,
            jwks_cache_ttl_seconds: 300,
            id_token_policy: IdTokenPolicy::FailHard,
        }
    }
}

impl FlowConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state_ttl(mut self, seconds: u64) -> Self {
        self.state_ttl_seconds = seconds;
        self
    }

    pub fn with_http_timeout(mut self, seconds: u64) -> Self {
        self.http_timeout_seconds = seconds;
        self
    }

    pub fn with_jwks_cache_ttl(mut self, seconds: u64) -> Self {
        self.jwks_cache_ttl_seconds = seconds;
        self
    }

    pub fn with_id_token_policy(mut self, policy: IdTokenPolicy) -> Self {
        self.id_token_policy = policy;
        self
    }
}
