//! Client for OCI distribution registries

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use skyport_common::{ContainerMetadata, EnvVar, Error, ImageReference, Result};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::RegistryAuth;
use crate::wait::{ManifestProbe, ManifestStatus};

/// Manifest and index media types we can read
const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
application/vnd.oci.image.index.v1+json, \
application/vnd.docker.distribution.manifest.v2+json, \
application/vnd.docker.distribution.manifest.list.v2+json";

/// Variables the platform sets itself and refuses from users
const RESERVED_ENV: &[&str] = &["PORT", "K_SERVICE", "K_REVISION", "K_CONFIGURATION"];

/// Client for interacting with a container registry
pub struct RegistryClient {
    auth: Arc<dyn RegistryAuth>,
    client: reqwest::Client,
    /// Overrides `https://{host}` (plain-HTTP registries, tests)
    base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    #[serde(default)]
    config: Option<Descriptor>,
    #[serde(default)]
    manifests: Vec<Descriptor>,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    digest: String,
    #[serde(default)]
    platform: Option<Platform>,
}

#[derive(Debug, Deserialize)]
struct Platform {
    architecture: String,
    os: String,
}

#[derive(Debug, Deserialize)]
struct ImageConfig {
    #[serde(default)]
    config: Option<ContainerConfig>,
}

#[derive(Debug, Deserialize)]
struct ContainerConfig {
    #[serde(rename = "Env", default)]
    env: Option<Vec<String>>,
    #[serde(rename = "Cmd", default)]
    cmd: Option<Vec<String>>,
}

impl RegistryClient {
    /// Create a new registry client
    pub fn new(auth: Arc<dyn RegistryAuth>) -> Self {
        Self {
            auth,
            client: reqwest::Client::new(),
            base_url: None,
        }
    }

    /// Send every request to `base_url` instead of the image's host
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    fn registry_root(&self, image: &ImageReference) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| format!("https://{}", image.host))
    }

    fn manifest_url(&self, image: &ImageReference, reference: &str) -> String {
        format!(
            "{}/v2/{}/manifests/{}",
            self.registry_root(image),
            image.repository,
            reference
        )
    }

    fn blob_url(&self, image: &ImageReference, digest: &str) -> String {
        format!(
            "{}/v2/{}/blobs/{}",
            self.registry_root(image),
            image.repository,
            digest
        )
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        Ok(match self.auth.authorization().await? {
            Some(header) => request.header(AUTHORIZATION, header),
            None => request,
        })
    }

    /// Check whether the image's manifest exists without downloading it
    pub async fn head_manifest(&self, image: &ImageReference) -> Result<ManifestStatus> {
        let url = self.manifest_url(image, &image.tag);

        debug!("Checking manifest: {}", url);

        let request = self.client.head(&url).header(ACCEPT, MANIFEST_ACCEPT);
        let response = self
            .authorized(request)
            .await?
            .send()
            .await
            .map_err(|e| Error::Registry(format!("Failed to reach registry for {image}: {e}")))?;

        match response.status() {
            status if status.is_success() => Ok(ManifestStatus::Exists),
            StatusCode::NOT_FOUND => Ok(ManifestStatus::NotFound),
            status => Err(Error::Registry(format!(
                "Unexpected status {status} checking manifest for {image}"
            ))),
        }
    }

    /// Read the runtime defaults (env, args) declared by the image.
    ///
    /// Never fails: any registry or decoding problem is logged and yields
    /// empty metadata so the deployment can continue without defaults.
    pub async fn inspect(&self, image: &ImageReference) -> ContainerMetadata {
        match self.fetch_metadata(image).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Could not read image config for {}: {}", image, e);
                ContainerMetadata::default()
            }
        }
    }

    async fn fetch_metadata(&self, image: &ImageReference) -> Result<ContainerMetadata> {
        let mut manifest: Manifest = self
            .get_json(&self.manifest_url(image, &image.tag), Some(MANIFEST_ACCEPT))
            .await?;

        // Multi-platform index: follow the linux/amd64 entry the platform runs
        if manifest.config.is_none() {
            let entry = select_platform_manifest(&manifest.manifests).ok_or_else(|| {
                Error::Registry(format!("Manifest for {image} has neither config nor entries"))
            })?;
            debug!("Resolved index for {} to {}", image, entry.digest);
            manifest = self
                .get_json(&self.manifest_url(image, &entry.digest), Some(MANIFEST_ACCEPT))
                .await?;
        }

        let config = manifest
            .config
            .ok_or_else(|| Error::Registry(format!("Manifest for {image} has no config")))?;

        let image_config: ImageConfig = self
            .get_json(&self.blob_url(image, &config.digest), None)
            .await?;

        Ok(container_metadata(image_config))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, accept: Option<&str>) -> Result<T> {
        let mut request = self.client.get(url);
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }

        let response: Response = self
            .authorized(request)
            .await?
            .send()
            .await
            .map_err(|e| Error::Registry(format!("Failed to fetch {url}: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Registry(format!(
                "Failed to fetch {}: {}",
                url,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Registry(format!("Failed to parse {url}: {e}")))
    }
}

#[async_trait]
impl ManifestProbe for RegistryClient {
    async fn probe(&self, image: &ImageReference) -> Result<ManifestStatus> {
        self.head_manifest(image).await
    }
}

fn select_platform_manifest(entries: &[Descriptor]) -> Option<&Descriptor> {
    entries
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .is_some_and(|p| p.os == "linux" && p.architecture == "amd64")
        })
        .or_else(|| entries.first())
}

fn container_metadata(image_config: ImageConfig) -> ContainerMetadata {
    let Some(config) = image_config.config else {
        return ContainerMetadata::default();
    };

    let env = config
        .env
        .unwrap_or_default()
        .into_iter()
        .filter_map(|entry| {
            let (name, value) = entry.split_once('=')?;
            if RESERVED_ENV.contains(&name) {
                debug!("Dropping reserved image variable {}", name);
                return None;
            }
            Some(EnvVar::new(name, value))
        })
        .collect();

    ContainerMetadata {
        env,
        args: config.cmd.unwrap_or_default(),
    }
}
