//! Named-adapter registry and top-level flow entry points.

use crate::config::{FlowConfig, ProviderConfig};
use crate::error::{FlowError, FlowResult};
use crate::jwks::IdTokenValidator;
use crate::provider::ProviderAdapter;
use crate::state::{StateManager, StateStore};
use crate::types::{AuthorizationUrl, BeginOptions};
use reqwest::Client;
use rp_identity_core::{UserRecord, UserStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Registry of named provider adapters sharing one HTTP client, one state
/// manager, and one key-set validator. The top-level entry points of the
/// engine.
pub struct FlowRegistry {
    adapters: HashMap<String, Arc<ProviderAdapter>>,
    users: Arc<dyn UserStore>,
    http: Client,
    states: StateManager,
    validator: Arc<IdTokenValidator>,
    config: FlowConfig,
}

impl FlowRegistry {
    pub fn new(
        config: FlowConfig,
        state_store: Arc<dyn StateStore>,
        users: Arc<dyn UserStore>,
    ) -> FlowResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_seconds))
            .build()
            .map_err(|e| FlowError::Config(format!("failed to build http client: {e}")))?;

        let validator = Arc::new(IdTokenValidator::new(http.clone()));
        validator.set_cache_ttl(config.jwks_cache_ttl_seconds);

        Ok(Self {
            adapters: HashMap::new(),
            users,
            states: StateManager::new(state_store, config.state_ttl_seconds),
            validator,
            http,
            config,
        })
    }

    /// Register a provider under its `provider_id`. Fails fast on an
    /// invalid descriptor.
    pub fn register(&mut self, config: ProviderConfig) -> FlowResult<()> {
        let adapter = ProviderAdapter::new(
            config,
            self.http.clone(),
            self.states.clone(),
            Arc::clone(&self.validator),
            self.config.id_token_policy,
        )?;

        info!(provider = adapter.provider_id(), "registered provider");
        self.adapters
            .insert(adapter.provider_id().to_string(), Arc::new(adapter));
        Ok(())
    }

    pub fn get(&self, name: &str) -> FlowResult<&Arc<ProviderAdapter>> {
        self.adapters
            .get(name)
            .ok_or_else(|| FlowError::ProviderNotFound(name.to_string()))
    }

    pub async fn begin(&self, name: &str, options: BeginOptions) -> FlowResult<AuthorizationUrl> {
        self.get(name)?.begin_flow(options).await
    }

    /// Complete the callback and hand the normalized identity to the user
    /// store. Errors pass through untranslated; they are logged here and
    /// nowhere swallowed.
    pub async fn complete(&self, name: &str, code: &str, state: &str) -> FlowResult<UserRecord> {
        let adapter = self.get(name)?;

        let identity = adapter.complete_flow(code, state).await.map_err(|err| {
            error!(provider = name, error = %err, "flow completion failed");
            err
        })?;

        info!(provider = name, subject = %identity.subject, "flow completed");
        let user = self.users.find_or_create_user(&identity).await?;
        Ok(user)
    }

    /// Administrative access to the shared key-set validator
    /// (`invalidate_cache`, `set_cache_ttl`).
    pub fn validator(&self) -> &Arc<IdTokenValidator> {
        &self.validator
    }

    /// Shared state manager, exposed so the host can schedule
    /// `sweep_expired` runs.
    pub fn state_manager(&self) -> &StateManager {
        &self.states
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkce::CodeChallengeMethod;
    use crate::state::InMemoryStateStore;
    use rp_identity_core::InMemoryUserStore;

    fn registry() -> FlowRegistry {
        FlowRegistry::new(
            FlowConfig::default(),
            Arc::new(InMemoryStateStore::new()),
            Arc::new(InMemoryUserStore::new()),
        )
        .unwrap()
    }

    fn provider(provider_id: &str) -> ProviderConfig {
        ProviderConfig {
            provider_id: provider_id.to_string(),
            client_id: "client-123".to_string(),
            client_secret: "secret".to_string(),
            authorization_endpoint: "https://example.com/auth".to_string(),
            token_endpoint: "https://example.com/token".to_string(),
            userinfo_endpoint: None,
            jwks_uri: None,
            issuers: Vec::new(),
            redirect_uri: "http://localhost:3000/callback".to_string(),
            scopes: vec!["openid".to_string()],
            auth_params: HashMap::new(),
            challenge_method: CodeChallengeMethod::S256,
            claim_mapping: None,
        }
    }

    #[tokio::test]
    async fn unregistered_provider_is_not_found() {
        let registry = registry();

        let result = registry.begin("nope", BeginOptions::default()).await;
        assert!(matches!(result, Err(FlowError::ProviderNotFound(_))));

        let result = registry.complete("nope", "code", "state").await;
        assert!(matches!(result, Err(FlowError::ProviderNotFound(_))));
    }

    #[tokio::test]
    async fn registered_provider_begins_a_flow() {
        let mut registry = registry();
        registry.register(provider("google")).unwrap();

        let auth = registry
            .begin("google", BeginOptions::default())
            .await
            .unwrap();
        assert!(auth.url.starts_with("https://example.com/auth?"));
        assert!(!auth.state.is_empty());
    }

    #[tokio::test]
    async fn invalid_provider_config_is_rejected_at_registration() {
        let mut registry = registry();

        let mut config = provider("broken");
        config.issuers = vec!["https://example.com".to_string()];
        config.jwks_uri = None;

        assert!(matches!(
            registry.register(config),
            Err(FlowError::Config(_))
        ));
        assert!(registry.get("broken").is_err());
    }
}
