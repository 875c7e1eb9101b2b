//! Wire types exchanged with providers, plus flow inputs and outputs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Caller-supplied options for starting a flow. Merged over the provider
/// descriptor's defaults.
#[derive(Debug, Clone, Default)]
pub struct BeginOptions {
    /// Replaces the configured scopes when non-empty.
    pub scopes: Vec<String>,
    pub prompt: Option<String>,
    /// Extra query parameters appended to the authorization URL.
    pub extra_params: HashMap<String, String>,
    /// Opaque data stored on the state record and returned at callback.
    pub extra_state: Option<serde_json::Value>,
}

/// Output of `begin_flow`: the URL to redirect the user to, and the state
/// token bound to this attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationUrl {
    pub url: String,
    pub state: String,
}

/// Query parameters the provider sends back to the redirect URI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCallback {
    #[serde(default)]
    pub code: String,
    pub state: String,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Token endpoint response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: Option<u64>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub id_token: Option<String>,
}

/// Userinfo endpoint response (OpenID Connect compatible).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfoResponse {
    pub sub: String,
    pub email: Option<String>,
    pub email_verified: Option<bool>,
    pub name: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub picture: Option<String>,
    pub locale: Option<String>,
    #[serde(flatten)]
    pub additional_claims: HashMap<String, serde_json::Value>,
}
