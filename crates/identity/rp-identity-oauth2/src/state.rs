//! CSRF state-token lifecycle: issue, single-use verify, expiry sweep.

use crate::error::{FlowError, FlowResult};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// State bound to one authorization flow attempt. Owned by the
/// [`StateManager`] from issue until verification or expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateRecord {
    pub token: String,
    pub provider_id: String,
    pub pkce_verifier: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Opaque caller data carried from begin to callback.
    pub extra: Option<serde_json::Value>,
}

impl StateRecord {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Storage collaborator for state records.
///
/// `take` must be atomic: of any number of concurrent calls for the same
/// token, exactly one receives the record and the rest see `None`.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save(&self, record: StateRecord) -> FlowResult<()>;

    /// Remove and return the record in a single operation.
    async fn take(&self, token: &str) -> FlowResult<Option<StateRecord>>;

    /// Remove expired records, returning how many were dropped.
    async fn sweep_expired(&self) -> FlowResult<usize>;
}

/// In-memory implementation of [`StateStore`]. The write lock around
/// `remove` gives `take` its atomicity within a single process.
pub struct InMemoryStateStore {
    records: RwLock<HashMap<String, StateRecord>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn save(&self, record: StateRecord) -> FlowResult<()> {
        let mut records = self.records.write().await;
        records.insert(record.token.clone(), record);
        Ok(())
    }

    async fn take(&self, token: &str) -> FlowResult<Option<StateRecord>> {
        let mut records = self.records.write().await;
        Ok(records.remove(token))
    }

    async fn sweep_expired(&self) -> FlowResult<usize> {
        let mut records = self.records.write().await;
        let now = Utc::now();

        let before = records.len();
        records.retain(|_, record| now <= record.expires_at);

        Ok(before - records.len())
    }
}

/// Issues and single-use-verifies CSRF state tokens.
#[derive(Clone)]
pub struct StateManager {
    store: Arc<dyn StateStore>,
    ttl_seconds: u64,
}

impl StateManager {
    pub fn new(store: Arc<dyn StateStore>, ttl_seconds: u64) -> Self {
        Self { store, ttl_seconds }
    }

    /// Persist a new record bound to this provider and PKCE verifier and
    /// return its token: 128 bits of CSPRNG entropy, url-safe encoded.
    pub async fn issue(
        &self,
        provider_id: &str,
        pkce_verifier: &str,
        extra: Option<serde_json::Value>,
    ) -> FlowResult<String> {
        let token = generate_token();
        let created_at = Utc::now();

        let record = StateRecord {
            token: token.clone(),
            provider_id: provider_id.to_string(),
            pkce_verifier: pkce_verifier.to_string(),
            created_at,
            expires_at: created_at + Duration::seconds(self.ttl_seconds as i64),
            extra,
        };
        self.store.save(record).await?;

        debug!(provider = provider_id, "issued state token");
        Ok(token)
    }

    /// Single-use verification. The record is removed before the expiry
    /// check, so a replay fails regardless of what happens downstream of
    /// the first successful call.
    pub async fn verify(&self, token: &str) -> FlowResult<StateRecord> {
        let record = self
            .store
            .take(token)
            .await?
            .ok_or(FlowError::InvalidState)?;

        if record.is_expired() {
            return Err(FlowError::ExpiredState);
        }

        Ok(record)
    }

    /// Best-effort cleanup of expired records. Safe to run concurrently
    /// with `issue` and `verify`; anything a racing `verify` already took
    /// is simply no longer there to sweep.
    pub async fn sweep_expired(&self) -> FlowResult<usize> {
        self.store.sweep_expired().await
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(ttl_seconds: u64) -> StateManager {
        StateManager::new(Arc::new(InMemoryStateStore::new()), ttl_seconds)
    }

    #[tokio::test]
    async fn verify_succeeds_exactly_once() {
        let states = manager(600);

        let token = states.issue("google", "verifier123", None).await.unwrap();

        let record = states.verify(&token).await.unwrap();
        assert_eq!(record.provider_id, "google");
        assert_eq!(record.pkce_verifier, "verifier123");

        let replay = states.verify(&token).await;
        assert!(matches!(replay, Err(FlowError::InvalidState)));
    }

    #[tokio::test]
    async fn unknown_token_is_invalid() {
        let states = manager(600);

        let result = states.verify("no-such-token").await;
        assert!(matches!(result, Err(FlowError::InvalidState)));
    }

    #[tokio::test]
    async fn expired_token_is_rejected_and_removed() {
        let store = Arc::new(InMemoryStateStore::new());
        let states = StateManager::new(store.clone(), 600);

        let token = states.issue("google", "v", None).await.unwrap();

        // Backdate the record past its TTL.
        {
            let mut record = store.take(&token).await.unwrap().unwrap();
            record.expires_at = Utc::now() - Duration::minutes(1);
            store.save(record).await.unwrap();
        }

        let result = states.verify(&token).await;
        assert!(matches!(result, Err(FlowError::ExpiredState)));

        // The expired record was consumed by the failed verify.
        let replay = states.verify(&token).await;
        assert!(matches!(replay, Err(FlowError::InvalidState)));
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_records() {
        let store = Arc::new(InMemoryStateStore::new());
        let states = StateManager::new(store.clone(), 600);

        let live = states.issue("google", "v1", None).await.unwrap();
        let dead = states.issue("google", "v2", None).await.unwrap();

        {
            let mut record = store.take(&dead).await.unwrap().unwrap();
            record.expires_at = Utc::now() - Duration::minutes(1);
            store.save(record).await.unwrap();
        }

        assert_eq!(states.sweep_expired().await.unwrap(), 1);
        assert!(states.verify(&live).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_verify_admits_one_winner() {
        let states = manager(600);
        let token = states.issue("google", "v", None).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let states = states.clone();
            let token = token.clone();
            handles.push(tokio::spawn(
                async move { states.verify(&token).await.is_ok() },
            ));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn extra_data_round_trips() {
        let states = manager(600);

        let extra = serde_json::json!({"return_to": "/dashboard"});
        let token = states
            .issue("github", "v", Some(extra.clone()))
            .await
            .unwrap();

        let record = states.verify(&token).await.unwrap();
        assert_eq!(record.extra, Some(extra));
    }
}
