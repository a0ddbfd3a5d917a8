use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid image reference '{0}': expected host/repository:tag")]
    InvalidImageReference(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Image {image} was not available after {timeout:?}")]
    RegistryTimeout { image: String, timeout: Duration },

    #[error("Remote API error during {operation}{}: {message}", http_status(.status))]
    RemoteApi {
        operation: String,
        status: Option<u16>,
        message: String,
    },

    #[error(
        "Service {service} did not become ready after {attempts} status checks{}",
        last_error_suffix(.last_error)
    )]
    ReadinessTimeout {
        service: String,
        attempts: u32,
        /// Most recent failed status check, when the last check did not succeed
        last_error: Option<String>,
    },

    #[error("Deployment failed: {message}. Logs: {log_url}")]
    DeploymentFailed { message: String, log_url: String },

    #[error("Progress reporting error: {0}")]
    Reporting(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Short name of the deployment phase this error aborted, for user-facing summaries
    pub fn phase(&self) -> &'static str {
        match self {
            Error::Config(_) | Error::InvalidImageReference(_) => "configuration",
            Error::Credential(_) => "credential provisioning",
            Error::Registry(_) | Error::RegistryTimeout { .. } => "image availability check",
            Error::RemoteApi { .. } => "service reconciliation",
            Error::ReadinessTimeout { .. } | Error::DeploymentFailed { .. } => "readiness check",
            Error::Reporting(_) => "progress reporting",
            Error::Io(_) | Error::Json(_) | Error::Other(_) => "deployment",
        }
    }

    /// Link to remote logs, when the platform gave us enough to build one
    pub fn log_url(&self) -> Option<&str> {
        match self {
            Error::DeploymentFailed { log_url, .. } => Some(log_url),
            _ => None,
        }
    }
}

fn http_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    last_error
        .as_ref()
        .map(|e| format!(" (last status check failed: {e})"))
        .unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, Error>;
