//! Readiness polling
//!
//! Turns the platform's asynchronous rollout into a synchronous answer by
//! sampling the service's first status condition until it leaves `Unknown`.
//! The retry budget is fixed: rollouts on the platform settle quickly,
//! unlike registry propagation, whose wait is caller-configurable.

use skyport_common::{Error, Readiness, Result, ServiceStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::document::KnativeService;
use crate::run_client::{RunApi, RunApiError};

/// Status checks before giving up
pub const READINESS_ATTEMPTS: u32 = 100;

/// Pause between status checks
pub const READINESS_INTERVAL: Duration = Duration::from_millis(500);

/// Console page showing a service's logs
pub fn log_url(project: &str, region: &str, service: &str) -> String {
    format!(
        "https://console.cloud.google.com/run/detail/{region}/{service}/logs?project={project}"
    )
}

/// Interpret one sample of the remote service
pub fn observe(service: &KnativeService) -> ServiceStatus {
    let Some(state) = service.status.as_ref() else {
        return ServiceStatus::unknown();
    };

    // A status describing an older generation says nothing about this rollout
    if let (Some(generation), Some(observed)) =
        (service.metadata.generation, state.observed_generation)
    {
        if observed < generation {
            return ServiceStatus::unknown();
        }
    }

    let Some(condition) = state.conditions.first() else {
        return ServiceStatus::unknown();
    };

    if condition.status == "Unknown" {
        return ServiceStatus {
            last_transition: condition.last_transition_time,
            ..ServiceStatus::unknown()
        };
    }

    match &state.url {
        Some(url) => ServiceStatus {
            readiness: Readiness::Ready,
            url: Some(url.clone()),
            message: None,
            last_transition: condition.last_transition_time,
        },
        None => ServiceStatus {
            readiness: Readiness::Failed,
            url: None,
            message: Some(
                condition
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("{} condition is {}", condition.kind, condition.status)),
            ),
            last_transition: condition.last_transition_time,
        },
    }
}

/// Polls a service until its rollout reaches a terminal state
pub struct ReadinessPoller {
    api: Arc<dyn RunApi>,
    project: String,
    region: String,
}

impl ReadinessPoller {
    pub fn new(api: Arc<dyn RunApi>, project: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            api,
            project: project.into(),
            region: region.into(),
        }
    }

    /// Wait until `name` is ready and return its status.
    ///
    /// A failed rollout is `Error::DeploymentFailed`; a rollout still unknown
    /// after the retry budget is `Error::ReadinessTimeout`.
    pub async fn poll_until_ready(&self, name: &str) -> Result<ServiceStatus> {
        let mut last_error = None;

        for attempt in 1..=READINESS_ATTEMPTS {
            match self.api.get_service(name).await {
                Ok(service) => {
                    last_error = None;
                    let status = observe(&service);
                    match status.readiness {
                        Readiness::Ready => {
                            info!(
                                "Service {} is ready at {}",
                                name,
                                status.url.as_deref().unwrap_or_default()
                            );
                            return Ok(status);
                        }
                        Readiness::Failed => {
                            let message = status.message.unwrap_or_default();
                            warn!("Service {} failed to become ready: {}", name, message);
                            return Err(Error::DeploymentFailed {
                                message,
                                log_url: log_url(&self.project, &self.region, name),
                            });
                        }
                        Readiness::Unknown => {
                            debug!(
                                "Service {} not ready yet (check {}/{})",
                                name, attempt, READINESS_ATTEMPTS
                            );
                        }
                    }
                }
                Err(err @ RunApiError::Transient { .. }) => {
                    warn!("Status check for {} failed, retrying: {}", name, err);
                    last_error = Some(err.to_string());
                }
                Err(err) => return Err(err.into_error("get service status")),
            }

            if attempt < READINESS_ATTEMPTS {
                sleep(READINESS_INTERVAL).await;
            }
        }

        Err(Error::ReadinessTimeout {
            service: name.to_string(),
            attempts: READINESS_ATTEMPTS,
            last_error,
        })
    }
}
