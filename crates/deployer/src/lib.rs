//! Cloud Run Deployer
//!
//! Deploys a container image as a serverless service once the image is
//! pullable, then waits for the rollout to become ready:
//! - `credentials` / `token`: service account key handling and OAuth2 tokens
//! - `run_client`: the platform's service and IAM API
//! - `reconciler`: create-or-replace, invocation policy, deletion
//! - `readiness`: rollout status polling
//! - `progress`: pull request comments describing each phase
//! - `config`: action inputs

pub mod config;
pub mod credentials;
pub mod document;
pub mod iam;
pub mod progress;
pub mod readiness;
pub mod reconciler;
pub mod run_client;
pub mod token;

#[cfg(test)]
mod testing;

use async_trait::async_trait;
use registry_client::{wait_for_image, Anonymous, ManifestProbe, RegistryAuth, RegistryClient};
use skyport_common::{
    ContainerMetadata, DeploymentOutcome, Error, ImageReference, Result, ServiceSpec,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::credentials::ensure_credentials_available;
use crate::progress::{GitHubReporter, LogReporter, Progress, ProgressReporter};
use crate::reconciler::Reconciler;
use crate::run_client::{HttpRunClient, RunApi};
use crate::token::{AccessTokenProvider, GoogleRegistryAuth, TokenSource};

/// Registry operations a deployment needs
#[async_trait]
pub trait ImageRegistry: ManifestProbe {
    /// Runtime defaults declared by the image; empty when unreadable
    async fn inspect(&self, image: &ImageReference) -> ContainerMetadata;
}

#[async_trait]
impl ImageRegistry for RegistryClient {
    async fn inspect(&self, image: &ImageReference) -> ContainerMetadata {
        RegistryClient::inspect(self, image).await
    }
}

/// Runs one deployment or deletion against a single project
pub struct Deployer {
    api: Arc<dyn RunApi>,
    registry: Arc<dyn ImageRegistry>,
    progress: Arc<Progress>,
    project: String,
}

impl Deployer {
    pub fn new(
        api: Arc<dyn RunApi>,
        registry: Arc<dyn ImageRegistry>,
        progress: Arc<Progress>,
        project: impl Into<String>,
    ) -> Self {
        Self {
            api,
            registry,
            progress,
            project: project.into(),
        }
    }

    fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.api.clone(), &self.project, self.progress.clone())
    }

    /// Wait for the image, then create or replace the service and wait for it.
    ///
    /// Nothing is changed remotely unless the image became available.
    pub async fn deploy(
        &self,
        spec: &ServiceSpec,
        image_timeout: Duration,
        image_interval: Duration,
    ) -> Result<DeploymentOutcome> {
        let image = spec.image();

        self.progress
            .report(format!("Waiting for image `{image}`"))
            .await;

        let available =
            match wait_for_image(self.registry.as_ref(), image, image_timeout, image_interval)
                .await
            {
                Ok(available) => available,
                Err(e) => {
                    self.progress
                        .report(format!("Could not check image `{image}`: {e}"))
                        .await;
                    return Err(e);
                }
            };

        if !available {
            self.progress
                .report(format!(
                    "Image `{image}` was not available after {}s",
                    image_timeout.as_secs()
                ))
                .await;
            return Err(Error::RegistryTimeout {
                image: image.to_string(),
                timeout: image_timeout,
            });
        }

        self.progress
            .report(format!("Image `{image}` is available"))
            .await;

        let metadata = self.registry.inspect(image).await;
        if !metadata.is_empty() {
            info!(
                "Image declares {} environment variables and {} args",
                metadata.env.len(),
                metadata.args.len()
            );
        }

        let outcome = match self
            .reconciler()
            .reconcile(&spec.with_image_defaults(&metadata))
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                let note = match e.log_url() {
                    Some(log_url) => format!(
                        "Deployment of `{}` failed: {e} ([logs]({log_url}))",
                        spec.canonical_name()
                    ),
                    None => format!("Deployment of `{}` failed: {e}", spec.canonical_name()),
                };
                self.progress.report(note).await;
                return Err(e);
            }
        };

        self.progress
            .report(format!(
                "Service `{}` is ready at {} ([logs]({}))",
                outcome.service, outcome.url, outcome.log_url
            ))
            .await;

        Ok(outcome)
    }

    /// Remove the service; a missing service is not an error
    pub async fn delete(&self, name: &str) -> Result<()> {
        self.reconciler().delete_service(name).await
    }
}

/// Registries that accept the service account's OAuth2 token
fn is_google_registry(host: &str) -> bool {
    host == "gcr.io" || host.ends_with(".gcr.io") || host.ends_with("-docker.pkg.dev")
}

/// Run the deployment described by `config`.
///
/// Returns the outcome of a deployment, or `None` after a deletion.
pub async fn run(config: &Config) -> Result<Option<DeploymentOutcome>> {
    let credentials = ensure_credentials_available(&config.service_account_key)?;

    let project = config
        .project_id
        .clone()
        .or_else(|| credentials.project_id().map(str::to_string))
        .ok_or_else(|| {
            Error::Config(
                "No project: set `project_id` or use a key that names one".to_string(),
            )
        })?;

    info!(
        "Using project {} in {} as {}",
        project, config.run_region, credentials.key.client_email
    );

    let tokens: Arc<dyn AccessTokenProvider> = Arc::new(TokenSource::new(credentials.key.clone()));
    let api = Arc::new(HttpRunClient::new(&project, &config.run_region, tokens.clone()));

    let reporter: Box<dyn ProgressReporter> = match &config.github {
        Some(github) => Box::new(GitHubReporter::new(github.clone())),
        None => Box::new(LogReporter),
    };
    let title = if config.delete_service {
        format!("Deleting Cloud Run service `{}`", config.name)
    } else {
        format!("Deploying Cloud Run service `{}`", config.name)
    };
    let progress = Arc::new(Progress::new(reporter, title));

    let registry_auth: Arc<dyn RegistryAuth> = match &config.image {
        Some(image) if is_google_registry(&image.host) => Arc::new(GoogleRegistryAuth::new(tokens)),
        Some(image) => {
            warn!("No credentials for registry {}, checking anonymously", image.host);
            Arc::new(Anonymous)
        }
        None => Arc::new(Anonymous),
    };
    let registry = Arc::new(RegistryClient::new(registry_auth));

    let deployer = Deployer::new(api, registry, progress, project);

    if config.delete_service {
        deployer.delete(&config.name).await?;
        return Ok(None);
    }

    let spec = config.service_spec()?;
    let outcome = deployer
        .deploy(
            &spec,
            config.image_check_timeout,
            config.image_check_interval,
        )
        .await?;

    Ok(Some(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{failed, ready, FakeRunApi};
    use registry_client::ManifestStatus;
    use skyport_common::EnvVar;
    use std::sync::Mutex;

    const URL: &str = "https://my-svc-xyz.a.run.app";

    /// Registry that answers from a fixed script; the last answer sticks
    struct ScriptedRegistry {
        answers: Mutex<Vec<ManifestStatus>>,
        probes: Mutex<u32>,
        metadata: ContainerMetadata,
    }

    impl ScriptedRegistry {
        fn new(answers: Vec<ManifestStatus>) -> Self {
            Self {
                answers: Mutex::new(answers),
                probes: Mutex::new(0),
                metadata: ContainerMetadata::default(),
            }
        }

        fn probes(&self) -> u32 {
            *self.probes.lock().unwrap()
        }
    }

    #[async_trait]
    impl ManifestProbe for ScriptedRegistry {
        async fn probe(&self, _image: &ImageReference) -> Result<ManifestStatus> {
            *self.probes.lock().unwrap() += 1;
            let mut answers = self.answers.lock().unwrap();
            if answers.len() > 1 {
                Ok(answers.remove(0))
            } else {
                Ok(answers[0])
            }
        }
    }

    #[async_trait]
    impl ImageRegistry for ScriptedRegistry {
        async fn inspect(&self, _image: &ImageReference) -> ContainerMetadata {
            self.metadata.clone()
        }
    }

    fn deployer(api: Arc<FakeRunApi>, registry: Arc<ScriptedRegistry>) -> Deployer {
        Deployer::new(api, registry, Arc::new(Progress::log_only("test")), "proj")
    }

    fn spec(name: &str) -> ServiceSpec {
        ServiceSpec::new(name, "us-central1", "gcr.io/p/x:v1".parse().unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_service_deploys_end_to_end() {
        let api = Arc::new(FakeRunApi::new().with_rollout(vec![Ok(ready(URL))]));
        let registry = Arc::new(ScriptedRegistry::new(vec![ManifestStatus::Exists]));

        let outcome = deployer(api.clone(), registry.clone())
            .deploy(&spec("my-svc"), Duration::from_secs(60), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(outcome.url, URL);
        assert_eq!(registry.probes(), 1);
        assert_eq!(api.count("create:"), 1);

        let submitted = api.submitted.lock().unwrap();
        assert_eq!(submitted[0].metadata.name, "my-svc");
        assert_eq!(submitted[0].spec.template.spec.containers[0].image, "gcr.io/p/x:v1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_underscored_name_is_canonical_in_remote_calls() {
        let api = Arc::new(FakeRunApi::new().with_rollout(vec![Ok(ready(URL))]));
        let registry = Arc::new(ScriptedRegistry::new(vec![ManifestStatus::Exists]));

        deployer(api.clone(), registry)
            .deploy(&spec("my_svc"), Duration::from_secs(60), Duration::from_secs(5))
            .await
            .unwrap();

        let calls = api.calls();
        assert!(calls.iter().all(|call| call.ends_with(":my-svc")), "{calls:?}");
    }

    #[tokio::test]
    async fn test_delete_of_missing_service_succeeds_without_retry() {
        let api = Arc::new(FakeRunApi::new());
        let registry = Arc::new(ScriptedRegistry::new(vec![ManifestStatus::Exists]));

        deployer(api.clone(), registry.clone())
            .delete("my-svc")
            .await
            .unwrap();

        assert_eq!(api.calls(), vec!["delete:my-svc".to_string()]);
        assert_eq!(registry.probes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_image_times_out_before_any_mutation() {
        let api = Arc::new(FakeRunApi::new());
        let registry = Arc::new(ScriptedRegistry::new(vec![ManifestStatus::NotFound]));

        let result = deployer(api.clone(), registry.clone())
            .deploy(&spec("my-svc"), Duration::from_secs(60), Duration::from_secs(30))
            .await;

        assert!(matches!(result, Err(Error::RegistryTimeout { .. })));
        assert_eq!(registry.probes(), 2);
        assert!(api.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_image_defaults_reach_the_document() {
        let api = Arc::new(FakeRunApi::new().with_rollout(vec![Ok(ready(URL))]));
        let mut registry = ScriptedRegistry::new(vec![ManifestStatus::Exists]);
        registry.metadata = ContainerMetadata {
            env: vec![EnvVar::new("PATH", "/usr/bin"), EnvVar::new("MODE", "dev")],
            args: vec!["serve".to_string()],
        };
        let spec = spec("my-svc")
            .with_env(vec![EnvVar::new("MODE", "prod")])
            .unwrap();

        deployer(api.clone(), Arc::new(registry))
            .deploy(&spec, Duration::from_secs(60), Duration::from_secs(5))
            .await
            .unwrap();

        let submitted = api.submitted.lock().unwrap();
        let container = &submitted[0].spec.template.spec.containers[0];
        assert_eq!(
            container.env,
            vec![EnvVar::new("PATH", "/usr/bin"), EnvVar::new("MODE", "prod")]
        );
        assert_eq!(container.args, vec!["serve".to_string()]);
    }

    #[derive(Default)]
    struct CommentLog {
        bodies: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ProgressReporter for Arc<CommentLog> {
        async fn post(&self, text: &str) -> Result<crate::progress::CommentHandle> {
            self.bodies.lock().unwrap().push(text.to_string());
            Ok(crate::progress::CommentHandle(1))
        }

        async fn update(&self, _handle: crate::progress::CommentHandle, text: &str) -> Result<()> {
            self.bodies.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_rollout_is_reported_with_logs() {
        let api = Arc::new(
            FakeRunApi::new().with_rollout(vec![Ok(failed("Container failed to start"))]),
        );
        let registry = Arc::new(ScriptedRegistry::new(vec![ManifestStatus::Exists]));
        let comments = Arc::new(CommentLog::default());
        let progress = Arc::new(Progress::new(Box::new(comments.clone()), "Deploying"));

        let result = Deployer::new(api, registry, progress, "proj")
            .deploy(&spec("my-svc"), Duration::from_secs(60), Duration::from_secs(5))
            .await;

        assert!(matches!(result, Err(Error::DeploymentFailed { .. })));
        let bodies = comments.bodies.lock().unwrap();
        let last = bodies.last().unwrap();
        let final_line = last.lines().last().unwrap();
        assert!(final_line.contains("Deployment of `my-svc` failed"), "{last}");
        assert!(final_line.contains("Container failed to start"), "{last}");
        assert!(
            final_line.contains(
                "https://console.cloud.google.com/run/detail/us-central1/my-svc/logs?project=proj"
            ),
            "{last}"
        );
    }

    #[test]
    fn test_google_registry_hosts() {
        assert!(is_google_registry("gcr.io"));
        assert!(is_google_registry("eu.gcr.io"));
        assert!(is_google_registry("us-central1-docker.pkg.dev"));
        assert!(!is_google_registry("ghcr.io"));
        assert!(!is_google_registry("docker.io"));
    }
}
