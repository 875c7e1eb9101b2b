//! OAuth 2.0 Authorization Code flow engine with PKCE, CSRF state-token
//! lifecycle management, and OpenID Connect ID-token validation.
//!
//! The engine is framework-agnostic. Per provider it can (a) produce an
//! authorization URL bound to a one-time CSRF/PKCE pair and (b) on
//! callback, verify that binding, exchange the code for tokens, validate
//! any ID token against the provider's published signing keys, and return
//! a normalized identity. HTTP controllers, session cookies, and user
//! persistence live behind the collaborator traits in `rp-identity-core`.

mod config;
mod error;
mod jwks;
mod pkce;
mod provider;
mod registry;
mod state;
mod types;


pub use config::{ClaimMapping, FlowConfig, IdTokenPolicy, ProviderConfig};
pub use error::{FlowError, FlowResult, ValidationFailure};
pub use jwks::{ExpectedClaims, IdClaims, IdTokenValidator, Jwk, JwkSet};
pub use pkce::{CodeChallengeMethod, PkcePair, challenge_for};
pub use provider::ProviderAdapter;
pub use registry::FlowRegistry;
pub use state::{InMemoryStateStore, StateManager, StateRecord, StateStore};
pub use types::{
    AuthorizationCallback, AuthorizationUrl, BeginOptions, TokenResponse, UserInfoResponse,
};

// Re-export the collaborator seam for convenience.
pub use rp_identity_core::{NormalizedIdentity, UserRecord, UserStore};
