//! Create-or-replace reconciliation of the remote service

use chrono::Utc;
use skyport_common::{
    canonical_service_name, AuthorizationMode, DeploymentOutcome, Error, Result, ServiceSpec,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::document::service_document;
use crate::iam::{ALL_USERS, INVOKER_ROLE};
use crate::progress::Progress;
use crate::readiness::{log_url, ReadinessPoller};
use crate::run_client::{RunApi, RunApiError};

/// Converges the remote service toward a [`ServiceSpec`]
pub struct Reconciler {
    api: Arc<dyn RunApi>,
    project: String,
    progress: Arc<Progress>,
}

impl Reconciler {
    pub fn new(api: Arc<dyn RunApi>, project: impl Into<String>, progress: Arc<Progress>) -> Self {
        Self {
            api,
            project: project.into(),
            progress,
        }
    }

    /// Create the service if absent or replace it if present, then wait for it
    pub async fn reconcile(&self, spec: &ServiceSpec) -> Result<DeploymentOutcome> {
        let name = spec.canonical_name();
        let document = service_document(&self.project, spec);

        let exists = match self.api.get_service(name).await {
            Ok(_) => true,
            Err(RunApiError::NotFound) => false,
            Err(err) => return Err(err.into_error("get service")),
        };

        // A failed update leaves the previous revision serving; it is still
        // authorized and observed before the update error is returned
        let mut update_error = None;

        if exists {
            info!("Service {} exists, replacing it", name);
            self.progress
                .report(format!("Updating service `{name}`"))
                .await;

            match self.api.replace_service(&document).await {
                Ok(_) => {
                    self.progress
                        .report(format!("Updated service `{name}`"))
                        .await;
                }
                Err(err) => {
                    let not_found = err.is_not_found();
                    let err = err.into_error("replace service");
                    error!("Failed to update service {}: {}", name, err);
                    self.progress
                        .report(format!("Failed to update service `{name}`: {err}"))
                        .await;
                    if not_found {
                        return Err(err);
                    }
                    update_error = Some(err);
                }
            }
        } else {
            info!("Service {} not found, creating it", name);
            self.progress
                .report(format!("Creating service `{name}`"))
                .await;

            if let Err(err) = self.api.create_service(&document).await {
                let err = err.into_error("create service");
                error!("Failed to create service {}: {}", name, err);
                self.progress
                    .report(format!("Failed to create service `{name}`: {err}"))
                    .await;
                return Err(err);
            }

            self.progress
                .report(format!("Created service `{name}`"))
                .await;
        }

        if let Err(err) = self.authorize(spec).await {
            match update_error {
                Some(_) => warn!("Could not update invoker policy for {}: {}", name, err),
                None => return Err(err),
            }
        }

        let poller = ReadinessPoller::new(self.api.clone(), &self.project, spec.region());
        let polled = poller.poll_until_ready(name).await;

        if let Some(err) = update_error {
            match &polled {
                Ok(status) => warn!(
                    "Service {} is still serving its previous revision at {}",
                    name,
                    status.url.as_deref().unwrap_or_default()
                ),
                Err(poll_err) => warn!("Service {} status after failed update: {}", name, poll_err),
            }
            return Err(err);
        }

        let status = polled?;
        let url = status.url.ok_or_else(|| Error::RemoteApi {
            operation: "get service status".to_string(),
            status: None,
            message: format!("service {name} reported ready without a URL"),
        })?;

        Ok(DeploymentOutcome {
            service: name.to_string(),
            url,
            log_url: log_url(&self.project, spec.region(), name),
            last_transition: status.last_transition.unwrap_or_else(Utc::now),
        })
    }

    /// Grant public invocation when `spec` is public.
    ///
    /// Only ever adds `allUsers`; restricting a previously public service
    /// requires removing the binding by hand.
    async fn authorize(&self, spec: &ServiceSpec) -> Result<()> {
        let name = spec.canonical_name();

        if spec.authorization() != AuthorizationMode::Public {
            return Ok(());
        }

        let mut policy = self
            .api
            .get_iam_policy(name)
            .await
            .map_err(|e| e.into_error("get IAM policy"))?;

        if !policy.grant(INVOKER_ROLE, ALL_USERS) {
            info!("Service {} already allows unauthenticated access", name);
            return Ok(());
        }

        self.api
            .set_iam_policy(name, &policy)
            .await
            .map_err(|e| e.into_error("set IAM policy"))?;

        info!("Granted unauthenticated access to {}", name);
        Ok(())
    }

    /// Delete the service. A service that is already gone counts as deleted.
    pub async fn delete_service(&self, name: &str) -> Result<()> {
        let name = canonical_service_name(name);

        self.progress
            .report(format!("Deleting service `{name}`"))
            .await;

        match self.api.delete_service(&name).await {
            Ok(()) => {
                info!("Deleted service {}", name);
                self.progress
                    .report(format!("Deleted service `{name}`"))
                    .await;
                Ok(())
            }
            Err(RunApiError::NotFound) => {
                info!("Service {} does not exist, nothing to delete", name);
                self.progress
                    .report(format!("Service `{name}` was already deleted"))
                    .await;
                Ok(())
            }
            Err(err) => {
                let err = err.into_error("delete service");
                error!("Failed to delete service {}: {}", name, err);
                self.progress
                    .report(format!("Failed to delete service `{name}`: {err}"))
                    .await;
                Err(err)
            }
        }
    }
}
