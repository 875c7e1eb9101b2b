//! Provider signing-key retrieval, caching, and ID-token validation.

use crate::error::{FlowError, FlowResult, ValidationFailure};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub const DEFAULT_JWKS_CACHE_TTL_SECONDS: u64 = 300;

/// Tolerated clock skew when checking `iat`.
const IAT_SKEW_SECONDS: i64 = 60;

/// A single provider-published key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    #[serde(default)]
    pub kid: Option<String>,
    pub kty: String,
    #[serde(rename = "use", default)]
    pub key_use: Option<String>,
    #[serde(default)]
    pub alg: Option<String>,
    #[serde(default)]
    pub n: Option<String>,
    #[serde(default)]
    pub e: Option<String>,
}

/// Key-set endpoint response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

#[derive(Debug, Clone)]
struct CachedKeys {
    keys: JwkSet,
    fetched_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Validated ID-token claims. Only constructed after the signature and
/// every claim check have passed.
#[derive(Debug, Clone)]
pub struct IdClaims {
    pub issuer: String,
    pub audience: String,
    pub subject: String,
    pub expires_at: i64,
    pub issued_at: i64,
    pub nonce: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub raw: Value,
}

/// What a token must assert to be accepted.
#[derive(Debug, Clone)]
pub struct ExpectedClaims<'a> {
    pub issuers: &'a [String],
    pub audience: &'a str,
    pub nonce: Option<&'a str>,
}

/// Verifies ID-token signatures against provider-published key sets,
/// cached per provider with a TTL.
///
/// Refresh failures serve the stale cached set with a warning; `KeyFetch`
/// is returned only when nothing is cached. The cache is
/// process-local and read-mostly: fetches happen outside the lock, so
/// readers keep using the current snapshot while a refresh is in flight.
pub struct IdTokenValidator {
    http: Client,
    cache: RwLock<HashMap<String, CachedKeys>>,
    cache_ttl_seconds: AtomicU64,
}

impl IdTokenValidator {
    pub fn new(http: Client) -> Self {
        Self {
            http,
            cache: RwLock::new(HashMap::new()),
            cache_ttl_seconds: AtomicU64::new(DEFAULT_JWKS_CACHE_TTL_SECONDS),
        }
    }

    pub fn set_cache_ttl(&self, seconds: u64) {
        self.cache_ttl_seconds.store(seconds, Ordering::Relaxed);
    }

    pub async fn invalidate_cache(&self, provider_id: &str) {
        let mut cache = self.cache.write().await;
        cache.remove(provider_id);
    }

    /// Cache-first key retrieval.
    pub async fn fetch_signing_keys(
        &self,
        provider_id: &str,
        jwks_uri: &str,
    ) -> FlowResult<JwkSet> {
        if let Some(fresh) = self.cached_if_fresh(provider_id).await {
            return Ok(fresh);
        }

        match self.fetch_remote(jwks_uri).await {
            Ok(keys) => {
                self.store_keys(provider_id, keys.clone()).await;
                Ok(keys)
            }
            Err(err) => {
                let cache = self.cache.read().await;
                if let Some(stale) = cache.get(provider_id) {
                    warn!(
                        provider = provider_id,
                        fetched_at = %stale.fetched_at,
                        error = %err,
                        "serving stale signing keys after failed refresh"
                    );
                    Ok(stale.keys.clone())
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Verify the token's signature and claims against the current key
    /// set. Claim checks run in a fixed order and short-circuit on the
    /// first failure; partially-validated claims are never returned.
    pub async fn validate(
        &self,
        provider_id: &str,
        jwks_uri: &str,
        id_token: &str,
        expected: &ExpectedClaims<'_>,
    ) -> FlowResult<IdClaims> {
        let header =
            decode_header(id_token).map_err(|e| ValidationFailure::Malformed(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(ValidationFailure::UnsupportedAlgorithm(format!("{:?}", header.alg)).into());
        }

        let keys = self.fetch_signing_keys(provider_id, jwks_uri).await?;
        let jwk = match find_key(&keys, header.kid.as_deref()) {
            Some(jwk) => jwk,
            None => {
                // Key rotation: one forced refresh before giving up.
                let keys = self.refresh_keys(provider_id, jwks_uri).await?;
                find_key(&keys, header.kid.as_deref())
                    .ok_or_else(|| ValidationFailure::UnknownKeyId(header.kid.clone()))?
            }
        };
        let decoding_key = decoding_key_for(&jwk)?;

        // Signature check only; claims are checked by hand below so the
        // failure reason names the offending claim.
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        let data =
            decode::<Value>(id_token, &decoding_key, &validation).map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::InvalidSignature => ValidationFailure::BadSignature,
                _ => ValidationFailure::Malformed(e.to_string()),
            })?;

        let claims = check_claims(data.claims, expected)?;
        debug!(provider = provider_id, subject = %claims.subject, "id token validated");
        Ok(claims)
    }

    async fn cached_if_fresh(&self, provider_id: &str) -> Option<JwkSet> {
        let cache = self.cache.read().await;
        cache
            .get(provider_id)
            .filter(|cached| Utc::now() < cached.expires_at)
            .map(|cached| cached.keys.clone())
    }

    async fn store_keys(&self, provider_id: &str, keys: JwkSet) {
        let ttl = self.cache_ttl_seconds.load(Ordering::Relaxed);
        let fetched_at = Utc::now();

        let mut cache = self.cache.write().await;
        cache.insert(
            provider_id.to_string(),
            CachedKeys {
                keys,
                fetched_at,
                expires_at: fetched_at + Duration::seconds(ttl as i64),
            },
        );
    }

    /// Unconditional refetch, used when a token names an unknown kid.
    async fn refresh_keys(&self, provider_id: &str, jwks_uri: &str) -> FlowResult<JwkSet> {
        let keys = self.fetch_remote(jwks_uri).await?;
        self.store_keys(provider_id, keys.clone()).await;
        Ok(keys)
    }

    async fn fetch_remote(&self, jwks_uri: &str) -> FlowResult<JwkSet> {
        let response = self.http.get(jwks_uri).send().await.map_err(|e| {
            if e.is_timeout() {
                FlowError::NetworkTimeout(jwks_uri.to_string())
            } else {
                FlowError::KeyFetch(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FlowError::KeyFetch(format!(
                "{jwks_uri} returned {status}"
            )));
        }

        let keys: JwkSet = response
            .json()
            .await
            .map_err(|e| FlowError::KeyFetch(format!("malformed jwks body: {e}")))?;

        if keys.keys.is_empty() {
            return Err(FlowError::KeyFetch(
                "jwks document contains no keys".to_string(),
            ));
        }

        debug!(jwks_uri, count = keys.keys.len(), "fetched signing keys");
        Ok(keys)
    }
}

fn find_key(set: &JwkSet, kid: Option<&str>) -> Option<Jwk> {
    match kid {
        Some(kid) => set
            .keys
            .iter()
            .find(|key| key.kid.as_deref() == Some(kid))
            .cloned(),
        // A kid-less token is only unambiguous with a single published key.
        None if set.keys.len() == 1 => set.keys.first().cloned(),
        None => None,
    }
}

fn decoding_key_for(jwk: &Jwk) -> Result<DecodingKey, ValidationFailure> {
    if jwk.kty != "RSA" {
        return Err(ValidationFailure::UnsupportedAlgorithm(jwk.kty.clone()));
    }

    let n = jwk
        .n
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ValidationFailure::Malformed("jwk missing modulus".to_string()))?;
    let e = jwk
        .e
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ValidationFailure::Malformed("jwk missing exponent".to_string()))?;

    DecodingKey::from_rsa_components(n, e)
        .map_err(|err| ValidationFailure::Malformed(format!("invalid jwk: {err}")))
}

fn check_claims(raw: Value, expected: &ExpectedClaims<'_>) -> Result<IdClaims, ValidationFailure> {
    let issuer = str_claim(&raw, "iss").ok_or(ValidationFailure::MissingClaim("iss"))?;
    if !expected.issuers.iter().any(|candidate| candidate == &issuer) {
        return Err(ValidationFailure::IssuerMismatch(issuer));
    }

    let audience_ok = match raw.get("aud") {
        Some(Value::String(aud)) => aud == expected.audience,
        Some(Value::Array(auds)) => auds
            .iter()
            .any(|aud| aud.as_str() == Some(expected.audience)),
        _ => false,
    };
    if !audience_ok {
        let found = raw
            .get("aud")
            .map(|aud| aud.to_string())
            .unwrap_or_else(|| "<absent>".to_string());
        return Err(ValidationFailure::AudienceMismatch(found));
    }

    let now = Utc::now().timestamp();

    let expires_at = raw
        .get("exp")
        .and_then(Value::as_i64)
        .ok_or(ValidationFailure::MissingClaim("exp"))?;
    if expires_at <= now {
        return Err(ValidationFailure::Expired(expires_at));
    }

    let issued_at = raw
        .get("iat")
        .and_then(Value::as_i64)
        .ok_or(ValidationFailure::MissingClaim("iat"))?;
    if issued_at > now + IAT_SKEW_SECONDS {
        return Err(ValidationFailure::IssuedInFuture(issued_at));
    }

    if let Some(expected_nonce) = expected.nonce {
        match raw.get("nonce").and_then(Value::as_str) {
            Some(nonce) if nonce == expected_nonce => {}
            _ => return Err(ValidationFailure::NonceMismatch),
        }
    }

    let subject = str_claim(&raw, "sub")
        .filter(|sub| !sub.is_empty())
        .ok_or(ValidationFailure::MissingSubject)?;

    Ok(IdClaims {
        issuer,
        audience: expected.audience.to_string(),
        subject,
        expires_at,
        issued_at,
        nonce: str_claim(&raw, "nonce"),
        email: str_claim(&raw, "email"),
        name: str_claim(&raw, "name"),
        picture: str_claim(&raw, "picture"),
        raw,
    })
}

fn str_claim(raw: &Value, name: &str) -> Option<String> {
    raw.get(name).and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn expected() -> (Vec<String>, String) {
        (
            vec!["https://accounts.example.com".to_string()],
            "client-123".to_string(),
        )
    }

    fn valid_claims() -> Value {
        let now = Utc::now().timestamp();
        json!({
            "iss": "https://accounts.example.com",
            "aud": "client-123",
            "sub": "u1",
            "exp": now + 3600,
            "iat": now,
            "email": "a@b.com",
            "name": "Ada"
        })
    }

    #[test]
    fn accepts_valid_claims() {
        let (issuers, audience) = expected();
        let claims = check_claims(
            valid_claims(),
            &ExpectedClaims {
                issuers: &issuers,
                audience: &audience,
                nonce: None,
            },
        )
        .unwrap();

        assert_eq!(claims.subject, "u1");
        assert_eq!(claims.email, Some("a@b.com".to_string()));
    }

    #[test]
    fn rejects_wrong_issuer_before_anything_else() {
        let (issuers, audience) = expected();
        let mut raw = valid_claims();
        raw["iss"] = json!("https://evil.example.com");
        // Also break the audience; the issuer must be reported first.
        raw["aud"] = json!("someone-else");

        let result = check_claims(
            raw,
            &ExpectedClaims {
                issuers: &issuers,
                audience: &audience,
                nonce: None,
            },
        );
        assert!(matches!(result, Err(ValidationFailure::IssuerMismatch(_))));
    }

    #[test]
    fn rejects_wrong_audience() {
        let (issuers, audience) = expected();
        let mut raw = valid_claims();
        raw["aud"] = json!("someone-else");

        let result = check_claims(
            raw,
            &ExpectedClaims {
                issuers: &issuers,
                audience: &audience,
                nonce: None,
            },
        );
        assert!(matches!(
            result,
            Err(ValidationFailure::AudienceMismatch(_))
        ));
    }

    #[test]
    fn accepts_audience_array_containing_client_id() {
        let (issuers, audience) = expected();
        let mut raw = valid_claims();
        raw["aud"] = json!(["other", "client-123"]);

        assert!(
            check_claims(
                raw,
                &ExpectedClaims {
                    issuers: &issuers,
                    audience: &audience,
                    nonce: None,
                },
            )
            .is_ok()
        );
    }

    #[test]
    fn rejects_expired_token() {
        let (issuers, audience) = expected();
        let mut raw = valid_claims();
        raw["exp"] = json!(Utc::now().timestamp() - 1);

        let result = check_claims(
            raw,
            &ExpectedClaims {
                issuers: &issuers,
                audience: &audience,
                nonce: None,
            },
        );
        assert!(matches!(result, Err(ValidationFailure::Expired(_))));
    }

    #[test]
    fn tolerates_small_iat_skew_but_not_large() {
        let (issuers, audience) = expected();
        let now = Utc::now().timestamp();

        let mut raw = valid_claims();
        raw["iat"] = json!(now + 30);
        assert!(
            check_claims(
                raw,
                &ExpectedClaims {
                    issuers: &issuers,
                    audience: &audience,
                    nonce: None,
                },
            )
            .is_ok()
        );

        let mut raw = valid_claims();
        raw["iat"] = json!(now + 120);
        let result = check_claims(
            raw,
            &ExpectedClaims {
                issuers: &issuers,
                audience: &audience,
                nonce: None,
            },
        );
        assert!(matches!(result, Err(ValidationFailure::IssuedInFuture(_))));
    }

    #[test]
    fn nonce_is_checked_when_expected() {
        let (issuers, audience) = expected();
        let mut raw = valid_claims();
        raw["nonce"] = json!("n1");

        assert!(
            check_claims(
                raw.clone(),
                &ExpectedClaims {
                    issuers: &issuers,
                    audience: &audience,
                    nonce: Some("n1"),
                },
            )
            .is_ok()
        );

        let result = check_claims(
            raw,
            &ExpectedClaims {
                issuers: &issuers,
                audience: &audience,
                nonce: Some("n2"),
            },
        );
        assert!(matches!(result, Err(ValidationFailure::NonceMismatch)));
    }

    #[test]
    fn rejects_missing_or_empty_subject() {
        let (issuers, audience) = expected();

        let mut raw = valid_claims();
        raw["sub"] = json!("");
        let result = check_claims(
            raw,
            &ExpectedClaims {
                issuers: &issuers,
                audience: &audience,
                nonce: None,
            },
        );
        assert!(matches!(result, Err(ValidationFailure::MissingSubject)));
    }

    #[test]
    fn kid_lookup_requires_unambiguous_match() {
        let key = |kid: Option<&str>| Jwk {
            kid: kid.map(str::to_string),
            kty: "RSA".to_string(),
            key_use: Some("sig".to_string()),
            alg: Some("RS256".to_string()),
            n: Some("AQAB".to_string()),
            e: Some("AQAB".to_string()),
        };

        let single = JwkSet {
            keys: vec![key(Some("a"))],
        };
        assert!(find_key(&single, Some("a")).is_some());
        assert!(find_key(&single, Some("b")).is_none());
        assert!(find_key(&single, None).is_some());

        let many = JwkSet {
            keys: vec![key(Some("a")), key(Some("b"))],
        };
        assert!(find_key(&many, None).is_none());
    }
}
