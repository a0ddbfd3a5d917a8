//! Configuration management for the deployer
//!
//! Inputs arrive as GitHub Actions `INPUT_*` environment variables. A `.env`
//! file is loaded first for local runs. Empty values count as unset.

use serde_json::Value;
use skyport_common::{AuthorizationMode, EnvVar, Error, ImageReference, Result, ServiceSpec};
use std::env;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::progress::GitHubContext;

const DEFAULT_IMAGE_CHECK_TIMEOUT_MINUTES: u64 = 30;
const DEFAULT_IMAGE_CHECK_INTERVAL_SECS: u64 = 5;
const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// Deployer configuration
#[derive(Clone)]
pub struct Config {
    /// Service name as given; canonicalized in `ServiceSpec`
    pub name: String,

    /// Image to deploy. Only optional when deleting.
    pub image: Option<ImageReference>,

    /// Service account key JSON, or a path to it
    pub service_account_key: String,

    /// Identity the revision runs as
    pub service_account_name: Option<String>,

    pub vpc_connector_name: Option<String>,

    pub run_region: String,

    pub allow_unauthenticated: bool,

    /// How long to wait for the image to become pullable
    pub image_check_timeout: Duration,

    /// Pause between registry checks
    pub image_check_interval: Duration,

    /// Remove the service instead of deploying it
    pub delete_service: bool,

    pub env_vars: Vec<EnvVar>,

    pub args: Vec<String>,

    /// Overrides the project named in the key
    pub project_id: Option<String>,

    /// Where to post progress comments, when running for a pull request
    pub github: Option<GitHubContext>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("name", &self.name)
            .field("image", &self.image.as_ref().map(ToString::to_string))
            .field("service_account_key", &"<redacted>")
            .field("service_account_name", &self.service_account_name)
            .field("vpc_connector_name", &self.vpc_connector_name)
            .field("run_region", &self.run_region)
            .field("allow_unauthenticated", &self.allow_unauthenticated)
            .field("image_check_timeout", &self.image_check_timeout)
            .field("image_check_interval", &self.image_check_interval)
            .field("delete_service", &self.delete_service)
            .field("env_vars", &self.env_vars.len())
            .field("args", &self.args)
            .field("project_id", &self.project_id)
            .field(
                "github",
                &self
                    .github
                    .as_ref()
                    .map(|gh| format!("{}#{}", gh.repository, gh.issue_number)),
            )
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenvy::dotenv().ok();

        Self::from_vars(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let input = |name: &str| var(&format!("INPUT_{}", name.to_uppercase()));
        let required = |name: &str| {
            input(name).ok_or_else(|| Error::Config(format!("Input `{name}` is required")))
        };

        let delete_service = parse_bool("delete_service", input("delete_service"))?;

        let image = match input("image") {
            Some(image) => Some(image.trim().parse::<ImageReference>()?),
            None if delete_service => None,
            None => return Err(Error::Config("Input `image` is required".to_string())),
        };

        let github_token = input("github_token").or_else(|| var("GITHUB_TOKEN"));
        let github = match (github_token, var("GITHUB_REPOSITORY")) {
            (Some(token), Some(repository)) => var("GITHUB_EVENT_PATH")
                .and_then(|path| issue_number(Path::new(&path)))
                .map(|issue_number| GitHubContext {
                    api_url: var("GITHUB_API_URL")
                        .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string())
                        .trim_end_matches('/')
                        .to_string(),
                    repository,
                    issue_number,
                    token,
                }),
            _ => None,
        };

        let config = Config {
            name: required("name")?.trim().to_string(),
            image,
            service_account_key: required("service_account_key")?,
            service_account_name: input("service_account_name").map(|v| v.trim().to_string()),
            vpc_connector_name: input("vpc_connector_name").map(|v| v.trim().to_string()),
            run_region: required("run_region")?.trim().to_string(),
            allow_unauthenticated: parse_bool(
                "allow_unauthenticated",
                input("allow_unauthenticated"),
            )?,
            image_check_timeout: Duration::from_secs(
                parse_u64(
                    "image_check_timeout",
                    input("image_check_timeout"),
                    DEFAULT_IMAGE_CHECK_TIMEOUT_MINUTES,
                )?
                .saturating_mul(60),
            ),
            image_check_interval: Duration::from_secs(parse_u64(
                "image_check_interval",
                input("image_check_interval"),
                DEFAULT_IMAGE_CHECK_INTERVAL_SECS,
            )?),
            delete_service,
            env_vars: input("env_vars")
                .map(|raw| parse_env_vars(&raw))
                .transpose()?
                .unwrap_or_default(),
            args: input("args").map(|raw| parse_lines(&raw)).unwrap_or_default(),
            project_id: input("project_id").map(|v| v.trim().to_string()),
            github,
        };

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.image_check_timeout.is_zero() {
            return Err(Error::Config(
                "image_check_timeout must be greater than 0".to_string(),
            ));
        }

        if self.image_check_interval.is_zero() {
            return Err(Error::Config(
                "image_check_interval must be greater than 0".to_string(),
            ));
        }

        if self.name.chars().any(char::is_whitespace) {
            return Err(Error::Config(format!(
                "Service name `{}` must not contain whitespace",
                self.name
            )));
        }

        Ok(())
    }

    pub fn authorization(&self) -> AuthorizationMode {
        if self.allow_unauthenticated {
            AuthorizationMode::Public
        } else {
            AuthorizationMode::Restricted
        }
    }

    /// Desired service state described by this configuration
    pub fn service_spec(&self) -> Result<ServiceSpec> {
        let image = self
            .image
            .clone()
            .ok_or_else(|| Error::Config("Input `image` is required".to_string()))?;

        ServiceSpec::new(&self.name, &self.run_region, image)
            .with_service_account(self.service_account_name.clone())
            .with_vpc_connector(self.vpc_connector_name.clone())
            .with_args(self.args.clone())
            .with_authorization(self.authorization())
            .with_env(self.env_vars.clone())
    }
}

fn parse_bool(name: &str, value: Option<String>) -> Result<bool> {
    match value {
        None => Ok(false),
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(Error::Config(format!(
                "Invalid {name}: `{other}` (expected true/false)"
            ))),
        },
    }
}

fn parse_u64(name: &str, value: Option<String>, default: u64) -> Result<u64> {
    match value {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid {name}: `{value}` ({e})"))),
    }
}

fn parse_lines(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse newline-separated `KEY=VALUE` pairs. Values may contain `=`.
fn parse_env_vars(raw: &str) -> Result<Vec<EnvVar>> {
    parse_lines(raw)
        .into_iter()
        .map(|line| match line.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() => {
                Ok(EnvVar::new(name.trim(), value))
            }
            _ => Err(Error::Config(format!(
                "Invalid env_vars entry `{line}` (expected KEY=VALUE)"
            ))),
        })
        .collect()
}

/// Pull request or issue number from a GitHub event payload
fn issue_number(event_path: &Path) -> Option<u64> {
    let raw = match std::fs::read(event_path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Could not read event payload {}: {}", event_path.display(), e);
            return None;
        }
    };

    let event: Value = match serde_json::from_slice(&raw) {
        Ok(event) => event,
        Err(e) => {
            warn!("Could not parse event payload: {}", e);
            return None;
        }
    };

    let number = event
        .pointer("/pull_request/number")
        .or_else(|| event.pointer("/issue/number"))
        .or_else(|| event.get("number"))
        .and_then(Value::as_u64);

    if number.is_none() {
        debug!("Event is not tied to a pull request, progress goes to the log only");
    }
    number
}
