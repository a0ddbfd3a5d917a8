//! Desired state of a deployable service

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::{ContainerMetadata, Error, ImageReference, Result};

/// A single container environment variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Who may invoke the deployed service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationMode {
    /// Anyone on the internet may invoke the service
    Public,
    /// Invocation requires an IAM grant
    #[default]
    Restricted,
}

/// Desired state for a single service deployment
///
/// Built once from caller input. The canonical name is derived at
/// construction and every remote call uses it rather than the raw name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    name: String,
    canonical_name: String,
    region: String,
    image: ImageReference,
    service_account: Option<String>,
    vpc_connector: Option<String>,
    env: Vec<EnvVar>,
    args: Vec<String>,
    authorization: AuthorizationMode,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, region: impl Into<String>, image: ImageReference) -> Self {
        let name = name.into();
        Self {
            canonical_name: canonical_service_name(&name),
            name,
            region: region.into(),
            image,
            service_account: None,
            vpc_connector: None,
            env: Vec::new(),
            args: Vec::new(),
            authorization: AuthorizationMode::default(),
        }
    }

    pub fn with_service_account(mut self, account: Option<String>) -> Self {
        self.service_account = account;
        self
    }

    pub fn with_vpc_connector(mut self, connector: Option<String>) -> Self {
        self.vpc_connector = connector;
        self
    }

    /// Set the environment overrides. Names must be unique.
    pub fn with_env(mut self, env: Vec<EnvVar>) -> Result<Self> {
        let mut seen = HashSet::new();
        for var in &env {
            if var.name.is_empty() {
                return Err(Error::Config(
                    "environment variable names must not be empty".to_string(),
                ));
            }
            if !seen.insert(var.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate environment variable: {}",
                    var.name
                )));
            }
        }
        self.env = env;
        Ok(self)
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_authorization(mut self, authorization: AuthorizationMode) -> Self {
        self.authorization = authorization;
        self
    }

    /// Layer this spec's explicit settings over defaults declared by the image.
    ///
    /// Image variables keep their position and take the override's value when
    /// one exists; override-only variables follow in their own order. Explicit
    /// args replace the image's args entirely.
    pub fn with_image_defaults(&self, metadata: &ContainerMetadata) -> Self {
        let mut env: Vec<EnvVar> = metadata
            .env
            .iter()
            .map(|default| {
                self.env
                    .iter()
                    .find(|var| var.name == default.name)
                    .unwrap_or(default)
                    .clone()
            })
            .collect();

        for var in &self.env {
            if !env.iter().any(|existing| existing.name == var.name) {
                env.push(var.clone());
            }
        }

        let args = if self.args.is_empty() {
            metadata.args.clone()
        } else {
            self.args.clone()
        };

        Self {
            env,
            args,
            ..self.clone()
        }
    }

    /// Name as supplied by the caller
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Platform-legal name used for every remote call
    pub fn canonical_name(&self) -> &str {
        &self.canonical_name
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn image(&self) -> &ImageReference {
        &self.image
    }

    pub fn service_account(&self) -> Option<&str> {
        self.service_account.as_deref()
    }

    pub fn vpc_connector(&self) -> Option<&str> {
        self.vpc_connector.as_deref()
    }

    pub fn env(&self) -> &[EnvVar] {
        &self.env
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn authorization(&self) -> AuthorizationMode {
        self.authorization
    }
}

/// Service names may not contain underscores on the platform
pub fn canonical_service_name(name: &str) -> String {
    name.replace('_', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> ImageReference {
        "gcr.io/p/x:v1".parse().unwrap()
    }

    #[test]
    fn test_canonical_name_replaces_underscores() {
        let spec = ServiceSpec::new("my_svc", "us-central1", image());
        assert_eq!(spec.name(), "my_svc");
        assert_eq!(spec.canonical_name(), "my-svc");

        let spec = ServiceSpec::new("my-svc", "us-central1", image());
        assert_eq!(spec.canonical_name(), "my-svc");
    }

    #[test]
    fn test_duplicate_env_names_rejected() {
        let result = ServiceSpec::new("svc", "us-central1", image()).with_env(vec![
            EnvVar::new("A", "1"),
            EnvVar::new("A", "2"),
        ]);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_image_defaults_are_overridden() {
        let spec = ServiceSpec::new("svc", "us-central1", image())
            .with_env(vec![EnvVar::new("LOG_LEVEL", "debug"), EnvVar::new("NEW", "x")])
            .unwrap();
        let metadata = ContainerMetadata {
            env: vec![
                EnvVar::new("PATH", "/usr/bin"),
                EnvVar::new("LOG_LEVEL", "info"),
            ],
            args: vec!["serve".to_string()],
        };

        let merged = spec.with_image_defaults(&metadata);

        assert_eq!(
            merged.env(),
            &[
                EnvVar::new("PATH", "/usr/bin"),
                EnvVar::new("LOG_LEVEL", "debug"),
                EnvVar::new("NEW", "x"),
            ]
        );
        assert_eq!(merged.args(), &["serve".to_string()]);
        assert_eq!(merged.canonical_name(), "svc");
    }

    #[test]
    fn test_explicit_args_replace_image_args() {
        let spec = ServiceSpec::new("svc", "us-central1", image())
            .with_args(vec!["--port".to_string(), "8080".to_string()]);
        let metadata = ContainerMetadata {
            env: vec![],
            args: vec!["serve".to_string()],
        };

        let merged = spec.with_image_defaults(&metadata);
        assert_eq!(merged.args(), &["--port".to_string(), "8080".to_string()]);
    }

    #[test]
    fn test_empty_metadata_keeps_spec() {
        let spec = ServiceSpec::new("svc", "us-central1", image())
            .with_env(vec![EnvVar::new("A", "1")])
            .unwrap();
        let merged = spec.with_image_defaults(&ContainerMetadata::default());
        assert_eq!(merged, spec);
    }
}
