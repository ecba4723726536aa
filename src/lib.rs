//! Pinauth - OAuth 2.0 authorization code client with secure token storage
//!
//! This library runs the OAuth 2.0 authorization code flow against a single
//! provider, keeps the resulting access token in secure storage and uses it
//! for authenticated reads against the provider's REST API.
//!
//! # Features
//!
//! - Authorization code flow with mandatory `state` verification
//! - Observable attempt state (`tokio::sync::watch`)
//! - Pluggable token storage: memory, file, OS keychain
//! - Bounded, non-retrying HTTP calls behind an [`http::HttpClient`] trait
//!
//! # Example
//!
//! ```no_run
//! use pinauth::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let http = Arc::new(ReqwestHttpClient::new()?);
//! let store = Arc::new(KeyringTokenStore::new("my-app"));
//! let config = OAuthConfig::pinterest("client-id", "client-secret", "https://localhost/cb");
//!
//! let client = OAuthClient::new(config, http.clone(), store.clone());
//! let url = client.begin_authorization(client.new_request()?)?;
//! println!("Open {}", url);
//!
//! // ...the provider redirects the user agent back to the app...
//! client.complete_authorization("https://localhost/cb?code=abc&state=...")?;
//! client.exchange_code_for_token().await?;
//!
//! let api = ResourceClient::new(PINTEREST_API_BASE, http, store)?;
//! println!("first board: {}", api.fetch_first_board_id().await?);
//! # Ok(())
//! # }
//! ```

pub mod callback;
pub mod error;
pub mod http;
pub mod oauth;
pub mod query;
pub mod resource;
pub mod storage;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::callback::RedirectListener;
    pub use crate::error::{ApiError, ConfigError, OAuthError, StorageError, TransportError};
    pub use crate::http::{HttpClient, ReqwestHttpClient};
    pub use crate::oauth::{AuthState, AuthorizationRequest, OAuthClient, OAuthConfig};
    pub use crate::query::extract_parameter;
    pub use crate::resource::{Board, Pin, ResourceClient, PINTEREST_API_BASE};
    pub use crate::storage::{
        AccessToken, AccountId, FileTokenStore, KeyringTokenStore, MemoryTokenStore, TokenStore,
    };
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use crate::http::mock::RecordingHttpClient;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_full_flow() {
        let http = Arc::new(
            RecordingHttpClient::new()
                .respond(Ok(json!({"access_token": "XYZ"})))
                .respond(Ok(json!({"data": [{"id": "42"}]}))),
        );
        let store = Arc::new(MemoryTokenStore::new());
        let config = OAuthConfig::pinterest("test-client", "test-secret", "https://localhost/cb");

        let client = OAuthClient::new(config, http.clone(), store.clone());
        let api = ResourceClient::new(PINTEREST_API_BASE, http.clone(), store.clone()).unwrap();

        // Nothing is fetched before a token exists.
        assert_eq!(
            api.fetch_first_board_id().await.unwrap_err(),
            ApiError::Unauthenticated
        );

        let request = client.new_request().unwrap().with_state("s1");
        client.begin_authorization(request).unwrap();
        client
            .complete_authorization("https://localhost/cb?code=ABC&state=s1")
            .unwrap();
        client.exchange_code_for_token().await.unwrap();

        assert_eq!(api.fetch_first_board_id().await.unwrap(), "42");
        assert_eq!(http.call_count(), 2);
    }
}
