//! OAuth2 access tokens for the service account
//!
//! Exchanges a self-signed RS256 assertion for a bearer token at the key's
//! `token_uri` and caches it until shortly before it expires.

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use registry_client::{basic_auth_header, RegistryAuth};
use serde::{Deserialize, Serialize};
use skyport_common::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::debug;

use crate::credentials::ServiceAccountKey;

const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: u64 = 3600;
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Anything that can hand out OAuth2 bearer tokens
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    ASSERTION_LIFETIME_SECS
}

struct CachedToken {
    token: String,
    refresh_at: Instant,
}

/// Token source backed by a service account key
pub struct TokenSource {
    key: ServiceAccountKey,
    client: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    pub fn new(key: ServiceAccountKey) -> Self {
        Self {
            key,
            client: reqwest::Client::new(),
            cached: Mutex::new(None),
        }
    }

    /// Build the signed assertion sent to the token endpoint
    fn assertion(&self) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| Error::Credential(format!("System clock before epoch: {e}")))?
            .as_secs();

        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: CLOUD_PLATFORM_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();

        let signing_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| Error::Credential(format!("Invalid service account private key: {e}")))?;

        encode(&header, &claims, &signing_key)
            .map_err(|e| Error::Credential(format!("Failed to sign token assertion: {e}")))
    }

    async fn fetch(&self) -> Result<TokenResponse> {
        let assertion = self.assertion()?;

        debug!("Requesting access token for {}", self.key.client_email);

        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| Error::Credential(format!("Failed to reach token endpoint: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Credential(format!(
                "Token exchange failed with {status}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Credential(format!("Failed to parse token response: {e}")))
    }
}

#[async_trait]
impl AccessTokenProvider for TokenSource {
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.token.clone());
            }
        }

        let response = self.fetch().await?;
        let lifetime = Duration::from_secs(response.expires_in).saturating_sub(REFRESH_MARGIN);
        *cached = Some(CachedToken {
            token: response.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });

        Ok(response.access_token)
    }
}

/// Registry access using the service account's OAuth2 token
///
/// Google registries accept the token as the password of the
/// `oauth2accesstoken` user.
pub struct GoogleRegistryAuth {
    tokens: Arc<dyn AccessTokenProvider>,
}

impl GoogleRegistryAuth {
    pub fn new(tokens: Arc<dyn AccessTokenProvider>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl RegistryAuth for GoogleRegistryAuth {
    async fn authorization(&self) -> Result<Option<String>> {
        let token = self.tokens.access_token().await?;
        Ok(Some(basic_auth_header("oauth2accesstoken", &token)))
    }
}
