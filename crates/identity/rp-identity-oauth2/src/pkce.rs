//! PKCE verifier/challenge generation (RFC 7636).

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Code challenge transformation. `S256` is the default and the only method
/// new deployments should enable; `Plain` exists for providers that cannot
/// hash.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeChallengeMethod {
    Plain,
    #[default]
    S256,
}

impl CodeChallengeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeChallengeMethod::Plain => "plain",
            CodeChallengeMethod::S256 => "S256",
        }
    }
}

/// A verifier/challenge pair bound to a single flow attempt. The verifier
/// is never reused; it travels to the token exchange where the provider
/// recomputes the challenge.
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
    pub method: CodeChallengeMethod,
}

impl PkcePair {
    /// Generate a fresh pair. The verifier carries 512 bits of CSPRNG
    /// entropy and encodes to 86 url-safe characters, within the 43-128
    /// window RFC 7636 allows.
    pub fn generate(method: CodeChallengeMethod) -> Self {
        let verifier = generate_verifier();
        let challenge = challenge_for(&verifier, method);

        Self {
            verifier,
            challenge,
            method,
        }
    }
}

fn generate_verifier() -> String {
    let mut bytes = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Deterministic challenge for a verifier.
pub fn challenge_for(verifier: &str, method: CodeChallengeMethod) -> String {
    match method {
        CodeChallengeMethod::Plain => verifier.to_string(),
        CodeChallengeMethod::S256 => {
            let mut hasher = Sha256::new();
            hasher.update(verifier.as_bytes());
            URL_SAFE_NO_PAD.encode(hasher.finalize())
        }
    }
}
