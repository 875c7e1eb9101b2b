//! Core identity types and collaborator traits.
//!
//! The flow engine in `rp-identity-oauth2` produces a [`NormalizedIdentity`]
//! after a successful callback and hands it to a [`UserStore`]. User account
//! persistence lives entirely behind that trait; the engine never owns user
//! records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend failure: {0}")]
    Backend(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Provider-agnostic identity assembled from validated ID-token claims and
/// userinfo data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedIdentity {
    pub provider: String,
    /// Stable per-provider subject identifier. Always present; the flow
    /// engine rejects provider responses without one.
    pub subject: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    /// Merged raw claims, ID-token claims taking precedence over userinfo.
    pub raw_claims: serde_json::Value,
}

/// A persisted user, as returned by the storage collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub provider: String,
    pub subject: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Storage collaborator for user accounts.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Look up the user for this (provider, subject) pair, creating one if
    /// none exists.
    async fn find_or_create_user(
        &self,
        identity: &NormalizedIdentity,
    ) -> StorageResult<UserRecord>;
}

/// In-memory implementation of [`UserStore`], used by tests and demos.
pub struct InMemoryUserStore {
    users: RwLock<HashMap<(String, String), UserRecord>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_or_create_user(
        &self,
        identity: &NormalizedIdentity,
    ) -> StorageResult<UserRecord> {
        let key = (identity.provider.clone(), identity.subject.clone());
        let mut users = self.users.write().await;

        if let Some(existing) = users.get(&key) {
            return Ok(existing.clone());
        }

        let record = UserRecord {
            id: format!("{}:{}", identity.provider, identity.subject),
            provider: identity.provider.clone(),
            subject: identity.subject.clone(),
            email: identity.email.clone(),
            display_name: identity.display_name.clone(),
            created_at: Utc::now(),
        };
        users.insert(key, record.clone());

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(subject: &str) -> NormalizedIdentity {
        NormalizedIdentity {
            provider: "google".to_string(),
            subject: subject.to_string(),
            email: Some("user@example.com".to_string()),
            display_name: Some("Test User".to_string()),
            avatar_url: None,
            raw_claims: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn find_or_create_is_idempotent() {
        let store = InMemoryUserStore::new();

        let first = store.find_or_create_user(&identity("u1")).await.unwrap();
        let second = store.find_or_create_user(&identity("u1")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
    }

    #[tokio::test]
    async fn distinct_subjects_get_distinct_users() {
        let store = InMemoryUserStore::new();

        let a = store.find_or_create_user(&identity("u1")).await.unwrap();
        let b = store.find_or_create_user(&identity("u2")).await.unwrap();

        assert_ne!(a.id, b.id);
    }
}
