//! Client for the Cloud Run admin API (Knative surface)

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use skyport_common::Error;
use std::sync::Arc;
use thiserror::Error as ThisError;
use tracing::debug;

use crate::document::KnativeService;
use crate::iam::IamPolicy;
use crate::token::AccessTokenProvider;

/// Failure of a single platform API call, classified once at the HTTP boundary
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum RunApiError {
    #[error("resource not found")]
    NotFound,

    #[error("transient failure{}: {message}", fmt_status(.status))]
    Transient {
        status: Option<u16>,
        message: String,
    },

    #[error("request failed{}: {message}", fmt_status(.status))]
    Fatal {
        status: Option<u16>,
        message: String,
    },
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl RunApiError {
    /// Classify a non-success HTTP response
    pub fn from_status(status: StatusCode, message: String) -> Self {
        match status {
            StatusCode::NOT_FOUND => RunApiError::NotFound,
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => RunApiError::Transient {
                status: Some(status.as_u16()),
                message,
            },
            s if s.is_server_error() => RunApiError::Transient {
                status: Some(status.as_u16()),
                message,
            },
            _ => RunApiError::Fatal {
                status: Some(status.as_u16()),
                message,
            },
        }
    }

    fn from_transport(error: reqwest::Error) -> Self {
        if error.is_timeout() || error.is_connect() {
            RunApiError::Transient {
                status: None,
                message: error.to_string(),
            }
        } else {
            RunApiError::Fatal {
                status: None,
                message: error.to_string(),
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RunApiError::NotFound)
    }

    /// Convert into the crate-wide error, naming the operation that failed
    pub fn into_error(self, operation: &str) -> Error {
        let (status, message) = match self {
            RunApiError::NotFound => (Some(404), "resource not found".to_string()),
            RunApiError::Transient { status, message } | RunApiError::Fatal { status, message } => {
                (status, message)
            }
        };
        Error::RemoteApi {
            operation: operation.to_string(),
            status,
            message,
        }
    }
}

/// Operations the deployer needs on the remote service resource
#[async_trait]
pub trait RunApi: Send + Sync {
    async fn get_service(&self, name: &str) -> Result<KnativeService, RunApiError>;

    async fn create_service(&self, service: &KnativeService) -> Result<KnativeService, RunApiError>;

    /// Replace the whole service with `service`
    async fn replace_service(&self, service: &KnativeService)
        -> Result<KnativeService, RunApiError>;

    async fn delete_service(&self, name: &str) -> Result<(), RunApiError>;

    async fn get_iam_policy(&self, name: &str) -> Result<IamPolicy, RunApiError>;

    async fn set_iam_policy(&self, name: &str, policy: &IamPolicy)
        -> Result<IamPolicy, RunApiError>;
}

/// Google API error envelope
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// HTTP implementation of [`RunApi`] scoped to one project and region
pub struct HttpRunClient {
    project: String,
    region: String,
    endpoint: String,
    tokens: Arc<dyn AccessTokenProvider>,
    client: reqwest::Client,
}

impl HttpRunClient {
    /// Create a client for the region's API endpoint
    pub fn new(
        project: impl Into<String>,
        region: impl Into<String>,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> Self {
        let region = region.into();
        Self {
            endpoint: format!("https://{region}-run.googleapis.com"),
            project: project.into(),
            region,
            tokens,
            client: reqwest::Client::new(),
        }
    }

    /// Override the endpoint root
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    fn services_url(&self) -> String {
        format!(
            "{}/apis/serving.knative.dev/v1/namespaces/{}/services",
            self.endpoint, self.project
        )
    }

    fn service_url(&self, name: &str) -> String {
        format!("{}/{}", self.services_url(), name)
    }

    fn iam_url(&self, name: &str, verb: &str) -> String {
        format!(
            "{}/v1/projects/{}/locations/{}/services/{}:{}",
            self.endpoint, self.project, self.region, name, verb
        )
    }

    async fn request(&self, method: Method, url: &str) -> Result<RequestBuilder, RunApiError> {
        let token = self
            .tokens
            .access_token()
            .await
            .map_err(|e| RunApiError::Fatal {
                status: None,
                message: e.to_string(),
            })?;

        debug!("{} {}", method, url);
        Ok(self.client.request(method, url).bearer_auth(token))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RunApiError> {
        let response = request.send().await.map_err(RunApiError::from_transport)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|b| b.error.message)
            .unwrap_or_else(|_| {
                if body.is_empty() {
                    status.to_string()
                } else {
                    body
                }
            });

        Err(RunApiError::from_status(status, message))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RunApiError> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| RunApiError::Fatal {
                status: None,
                message: format!("Failed to parse response: {e}"),
            })
    }
}

#[async_trait]
impl RunApi for HttpRunClient {
    async fn get_service(&self, name: &str) -> Result<KnativeService, RunApiError> {
        let request = self.request(Method::GET, &self.service_url(name)).await?;
        self.send_json(request).await
    }

    async fn create_service(&self, service: &KnativeService) -> Result<KnativeService, RunApiError> {
        let request = self
            .request(Method::POST, &self.services_url())
            .await?
            .json(service);
        self.send_json(request).await
    }

    async fn replace_service(
        &self,
        service: &KnativeService,
    ) -> Result<KnativeService, RunApiError> {
        let request = self
            .request(Method::PUT, &self.service_url(&service.metadata.name))
            .await?
            .json(service);
        self.send_json(request).await
    }

    async fn delete_service(&self, name: &str) -> Result<(), RunApiError> {
        let request = self.request(Method::DELETE, &self.service_url(name)).await?;
        self.send(request).await?;
        Ok(())
    }

    async fn get_iam_policy(&self, name: &str) -> Result<IamPolicy, RunApiError> {
        let request = self
            .request(Method::GET, &self.iam_url(name, "getIamPolicy"))
            .await?;
        self.send_json(request).await
    }

    async fn set_iam_policy(
        &self,
        name: &str,
        policy: &IamPolicy,
    ) -> Result<IamPolicy, RunApiError> {
        let request = self
            .request(Method::POST, &self.iam_url(name, "setIamPolicy"))
            .await?
            .json(&serde_json::json!({ "policy": policy }));
        self.send_json(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(
            RunApiError::from_status(StatusCode::NOT_FOUND, String::new()),
            RunApiError::NotFound
        );
        assert!(matches!(
            RunApiError::from_status(StatusCode::SERVICE_UNAVAILABLE, String::new()),
            RunApiError::Transient { status: Some(503), .. }
        ));
        assert!(matches!(
            RunApiError::from_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            RunApiError::Transient { status: Some(429), .. }
        ));
        assert!(matches!(
            RunApiError::from_status(StatusCode::FORBIDDEN, String::new()),
            RunApiError::Fatal { status: Some(403), .. }
        ));
        assert!(matches!(
            RunApiError::from_status(StatusCode::CONFLICT, String::new()),
            RunApiError::Fatal { status: Some(409), .. }
        ));
    }

    #[test]
    fn test_into_error_keeps_status() {
        let err = RunApiError::Fatal {
            status: Some(403),
            message: "Permission denied".to_string(),
        }
        .into_error("create service");

        match err {
            Error::RemoteApi {
                operation,
                status,
                message,
            } => {
                assert_eq!(operation, "create service");
                assert_eq!(status, Some(403));
                assert_eq!(message, "Permission denied");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
