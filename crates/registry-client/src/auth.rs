//! Authorization headers for registry requests

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use skyport_common::Result;

/// Supplies the `Authorization` header value for registry requests
#[async_trait]
pub trait RegistryAuth: Send + Sync {
    /// Header value to send, or `None` for anonymous access
    async fn authorization(&self) -> Result<Option<String>>;
}

/// Anonymous access (public registries)
pub struct Anonymous;

#[async_trait]
impl RegistryAuth for Anonymous {
    async fn authorization(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

/// A fixed header value, e.g. a pre-issued bearer token
pub struct StaticAuth(pub String);

#[async_trait]
impl RegistryAuth for StaticAuth {
    async fn authorization(&self) -> Result<Option<String>> {
        Ok(Some(self.0.clone()))
    }
}

/// Encode a `Basic` authorization header value
pub fn basic_auth_header(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_auth_header() {
        assert_eq!(
            basic_auth_header("oauth2accesstoken", "secret"),
            "Basic b2F1dGgyYWNjZXNzdG9rZW46c2VjcmV0"
        );
    }

    #[tokio::test]
    async fn test_anonymous_sends_nothing() {
        assert_eq!(Anonymous.authorization().await.unwrap(), None);
    }
}
