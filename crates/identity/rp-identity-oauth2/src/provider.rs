//! Generic Authorization-Code + PKCE + OIDC provider adapter.

use crate::config::{IdTokenPolicy, ProviderConfig};
use crate::error::{FlowError, FlowResult};
use crate::jwks::{ExpectedClaims, IdClaims, IdTokenValidator};
use crate::pkce::PkcePair;
use crate::state::StateManager;
use crate::types::{
    AuthorizationCallback, AuthorizationUrl, BeginOptions, TokenResponse, UserInfoResponse,
};
use reqwest::Client;
use rp_identity_core::NormalizedIdentity;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// One provider's flow implementation, parameterized entirely by its
/// [`ProviderConfig`]. Adapters are shared across requests: each flow
/// attempt is keyed by its state token, whose single-use consumption makes
/// every completion attempt terminal.
pub struct ProviderAdapter {
    config: ProviderConfig,
    http: Client,
    states: StateManager,
    validator: Arc<IdTokenValidator>,
    id_token_policy: IdTokenPolicy,
}

impl ProviderAdapter {
    /// Fails fast on an invalid descriptor. The validator is a required
    /// argument; there is no partially-wired configuration.
    pub fn new(
        config: ProviderConfig,
        http: Client,
        states: StateManager,
        validator: Arc<IdTokenValidator>,
        id_token_policy: IdTokenPolicy,
    ) -> FlowResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            http,
            states,
            validator,
            id_token_policy,
        })
    }

    pub fn provider_id(&self) -> &str {
        &self.config.provider_id
    }

    /// Build the authorization URL and bind a fresh state/PKCE pair to it.
    /// Purely local; no network I/O.
    pub async fn begin_flow(&self, options: BeginOptions) -> FlowResult<AuthorizationUrl> {
        let mut url = url::Url::parse(&self.config.authorization_endpoint)?;

        let pkce = PkcePair::generate(self.config.challenge_method);
        let state = self
            .states
            .issue(&self.config.provider_id, &pkce.verifier, options.extra_state)
            .await?;

        let scopes = if options.scopes.is_empty() {
            &self.config.scopes
        } else {
            &options.scopes
        };

        {
            let mut params = url.query_pairs_mut();
            params.append_pair("client_id", &self.config.client_id);
            params.append_pair("redirect_uri", &self.config.redirect_uri);
            params.append_pair("response_type", "code");
            params.append_pair("scope", &scopes.join(" "));
            params.append_pair("state", &state);
            params.append_pair("code_challenge", &pkce.challenge);
            params.append_pair("code_challenge_method", pkce.method.as_str());

            if let Some(prompt) = &options.prompt {
                params.append_pair("prompt", prompt);
            }
            for (key, value) in &self.config.auth_params {
                params.append_pair(key, value);
            }
            for (key, value) in &options.extra_params {
                params.append_pair(key, value);
            }
        }

        debug!(provider = %self.config.provider_id, "generated authorization url");
        Ok(AuthorizationUrl {
            url: url.to_string(),
            state,
        })
    }

    /// Complete a callback that may carry a provider-reported error such
    /// as `access_denied`.
    pub async fn complete_callback(
        &self,
        callback: AuthorizationCallback,
    ) -> FlowResult<NormalizedIdentity> {
        if let Some(provider_error) = &callback.error {
            // Consume the state token so the attempt stays terminal.
            let _ = self.states.verify(&callback.state).await;

            let description = callback
                .error_description
                .as_deref()
                .unwrap_or("no description");
            error!(
                provider = %self.config.provider_id,
                error = provider_error,
                description,
                "provider reported callback error"
            );
            return Err(FlowError::TokenExchange(format!(
                "provider returned {provider_error}"
            )));
        }

        self.complete_flow(&callback.code, &callback.state).await
    }

    /// The full callback sequence: state verification, code exchange,
    /// ID-token validation, userinfo fallback, identity merge.
    pub async fn complete_flow(&self, code: &str, state: &str) -> FlowResult<NormalizedIdentity> {
        let record = self.states.verify(state).await?;
        if record.provider_id != self.config.provider_id {
            return Err(FlowError::InvalidState);
        }

        let tokens = self.exchange_code(code, &record.pkce_verifier).await?;

        let expected_nonce = record
            .extra
            .as_ref()
            .and_then(|extra| extra.get("nonce"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let claims = match &tokens.id_token {
            Some(id_token) if !self.config.issuers.is_empty() => {
                match self
                    .validate_id_token(id_token, expected_nonce.as_deref())
                    .await
                {
                    Ok(claims) => Some(claims),
                    Err(err @ FlowError::TokenValidation(_))
                        if self.id_token_policy == IdTokenPolicy::WarnAndContinue =>
                    {
                        warn!(
                            provider = %self.config.provider_id,
                            error = %err,
                            "id token rejected; continuing on the userinfo path (compatibility mode)"
                        );
                        None
                    }
                    Err(err) => return Err(err),
                }
            }
            Some(_) => {
                // No expected issuers configured: the token cannot be
                // validated, so it is ignored rather than trusted.
                warn!(
                    provider = %self.config.provider_id,
                    "token response carried an id token but no issuers are configured; ignoring it"
                );
                None
            }
            None => None,
        };

        let user_info = if self.needs_user_info(&claims) {
            match self.config.userinfo_endpoint.as_deref() {
                Some(endpoint) => Some(self.fetch_user_info(endpoint, &tokens.access_token).await?),
                None => None,
            }
        } else {
            None
        };

        self.merge_identity(claims, user_info)
    }

    async fn exchange_code(&self, code: &str, pkce_verifier: &str) -> FlowResult<TokenResponse> {
        let mut params = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("code", code);
        params.insert("client_id", self.config.client_id.as_str());
        params.insert("client_secret", self.config.client_secret.as_str());
        params.insert("redirect_uri", self.config.redirect_uri.as_str());
        params.insert("code_verifier", pkce_verifier);

        let response = self
            .http
            .post(&self.config.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| FlowError::from_transport(e, &self.config.token_endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // The raw body goes to operator logs only; the error carries
            // just the status.
            error!(provider = %self.config.provider_id, %status, body, "token exchange rejected");
            return Err(FlowError::TokenExchange(format!(
                "token endpoint returned {status}"
            )));
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| FlowError::TokenExchange(format!("malformed token response: {e}")))?;

        info!(provider = %self.config.provider_id, "exchanged authorization code for tokens");
        Ok(tokens)
    }

    async fn validate_id_token(
        &self,
        id_token: &str,
        nonce: Option<&str>,
    ) -> FlowResult<IdClaims> {
        let jwks_uri = self.config.jwks_uri.as_deref().ok_or_else(|| {
            FlowError::Config(format!(
                "provider '{}' has no jwks_uri",
                self.config.provider_id
            ))
        })?;

        let expected = ExpectedClaims {
            issuers: &self.config.issuers,
            audience: &self.config.client_id,
            nonce,
        };
        self.validator
            .validate(&self.config.provider_id, jwks_uri, id_token, &expected)
            .await
    }

    /// The userinfo endpoint is consulted only when the assertion is
    /// absent or did not carry enough profile claims.
    fn needs_user_info(&self, claims: &Option<IdClaims>) -> bool {
        match claims {
            None => true,
            Some(claims) => claims.email.is_none() || claims.name.is_none(),
        }
    }

    async fn fetch_user_info(
        &self,
        endpoint: &str,
        access_token: &str,
    ) -> FlowResult<UserInfoResponse> {
        let response = self
            .http
            .get(endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| FlowError::from_transport(e, endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(provider = %self.config.provider_id, %status, body, "userinfo request rejected");
            return Err(FlowError::UserInfo(format!(
                "userinfo endpoint returned {status}"
            )));
        }

        let user_info: UserInfoResponse = response
            .json()
            .await
            .map_err(|e| FlowError::UserInfo(format!("malformed userinfo response: {e}")))?;

        debug!(provider = %self.config.provider_id, subject = %user_info.sub, "retrieved userinfo");
        Ok(user_info)
    }

    /// Merge ID-token claims (authoritative) over userinfo data (fallback)
    /// into a [`NormalizedIdentity`]. A stable subject is the one required
    /// field.
    fn merge_identity(
        &self,
        claims: Option<IdClaims>,
        user_info: Option<UserInfoResponse>,
    ) -> FlowResult<NormalizedIdentity> {
        let mut merged = serde_json::Map::new();
        if let Some(info) = &user_info {
            if let Value::Object(map) = serde_json::to_value(info)? {
                merged.extend(map);
            }
        }
        if let Some(claims) = &claims {
            if let Value::Object(map) = &claims.raw {
                merged.extend(map.clone());
            }
        }
        let raw_claims = Value::Object(merged);

        let mapping = self.config.claim_mapping.as_ref();
        let mapped = |field: Option<&String>| -> Option<String> {
            field
                .and_then(|name| raw_claims.get(name))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let subject = mapped(mapping.and_then(|m| m.subject_field.as_ref()))
            .or_else(|| claims.as_ref().map(|c| c.subject.clone()))
            .or_else(|| user_info.as_ref().map(|u| u.sub.clone()))
            .filter(|subject| !subject.is_empty())
            .ok_or(FlowError::MissingSubject)?;

        let email = mapped(mapping.and_then(|m| m.email_field.as_ref()))
            .or_else(|| claims.as_ref().and_then(|c| c.email.clone()))
            .or_else(|| user_info.as_ref().and_then(|u| u.email.clone()));

        let display_name = mapped(mapping.and_then(|m| m.name_field.as_ref()))
            .or_else(|| claims.as_ref().and_then(|c| c.name.clone()))
            .or_else(|| user_info.as_ref().and_then(|u| u.name.clone()));

        let avatar_url = mapped(mapping.and_then(|m| m.picture_field.as_ref()))
            .or_else(|| claims.as_ref().and_then(|c| c.picture.clone()))
            .or_else(|| user_info.as_ref().and_then(|u| u.picture.clone()));

        Ok(NormalizedIdentity {
            provider: self.config.provider_id.clone(),
            subject,
            email,
            display_name,
            avatar_url,
            raw_claims,
        })
    }
}
