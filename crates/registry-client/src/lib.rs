//! Registry Client
//!
//! Talks to OCI distribution registries on behalf of the deployer:
//! - `wait`: gate a deployment on an image's manifest becoming available
//! - `client`: manifest existence checks and image config inspection
//! - `auth`: `Authorization` header providers

pub mod auth;
pub mod client;
pub mod wait;

pub use auth::{basic_auth_header, Anonymous, RegistryAuth, StaticAuth};
pub use client::RegistryClient;
pub use wait::{
    max_attempts, wait_for_image, ManifestProbe, ManifestStatus, DEFAULT_IMAGE_INTERVAL,
    DEFAULT_IMAGE_TIMEOUT,
};
