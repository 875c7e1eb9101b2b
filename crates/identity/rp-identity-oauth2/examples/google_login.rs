//! Example showing how to set up a Google sign-in flow
//!
//! This example demonstrates:
//! 1. Describing Google as a provider (endpoints, JWKS, issuers)
//! 2. Building the flow registry with in-memory stores
//! 3. Producing the authorization URL a web app would redirect to
//! 4. Completing the callback into a normalized user record

use rp_identity_core::InMemoryUserStore;
use rp_identity_oauth2::{
    BeginOptions, CodeChallengeMethod, FlowConfig, FlowRegistry, InMemoryStateStore,
    ProviderConfig,
};
use std::collections::HashMap;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Google provider configuration
    let google = ProviderConfig {
        provider_id: "google".to_string(),
        client_id: std::env::var("GOOGLE_CLIENT_ID")
            .unwrap_or_else(|_| "your-google-client-id".to_string()),
        client_secret: std::env::var("GOOGLE_CLIENT_SECRET")
            .unwrap_or_else(|_| "your-google-client-secret".to_string()),
        authorization_endpoint: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
        token_endpoint: "https://oauth2.googleapis.com/token".to_string(),
        userinfo_endpoint: Some("https://openidconnect.googleapis.com/v1/userinfo".to_string()),
        jwks_uri: Some("https://www.googleapis.com/oauth2/v3/certs".to_string()),
        issuers: vec![
            "https://accounts.google.com".to_string(),
            "accounts.google.com".to_string(),
        ],
        redirect_uri: "http://localhost:3000/auth/google/callback".to_string(),
        scopes: vec![
            "openid".to_string(),
            "email".to_string(),
            "profile".to_string(),
        ],
        auth_params: HashMap::new(),
        challenge_method: CodeChallengeMethod::S256,
        claim_mapping: None, // standard OIDC claim names
    };

    let config = FlowConfig::new()
        .with_state_ttl(600) // 10 minutes
        .with_http_timeout(30); // 30 seconds

    let mut registry = FlowRegistry::new(
        config,
        Arc::new(InMemoryStateStore::new()),
        Arc::new(InMemoryUserStore::new()),
    )?;
    registry.register(google)?;

    println!("OAuth2 Example - Google Authentication");
    println!("=====================================");

    // Step 1: Produce the authorization redirect
    println!("\n1. Starting the authorization flow...");

    let auth = registry.begin("google", BeginOptions::default()).await?;
    println!("Authorization URL: {}", auth.url);
    println!("State: {}", auth.state);
    println!("\nIn a real application, you would:");
    println!("1. Redirect the user to the authorization URL");
    println!("2. Receive the callback with ?code=...&state=...");
    println!("3. Complete the flow to obtain the user record");

    // Simulate the callback (in a real app the code comes from Google)
    println!("\n2. Simulating the provider callback...");
    match registry
        .complete("google", "simulated_authorization_code", &auth.state)
        .await
    {
        Ok(user) => {
            println!("✅ Authentication successful!");
            println!("User ID: {}", user.id);
            println!("Subject: {}", user.subject);
            println!("Email: {:?}", user.email);
            println!("Display Name: {:?}", user.display_name);
        }
        Err(e) => {
            println!("❌ Callback failed: {}", e);
            println!(
                "Note: This is expected in the simulation as we're not using a real authorization code"
            );
        }
    }

    Ok(())
}
