pub mod error;
pub mod image_ref;
pub mod service;
pub mod status;

pub use error::{Error, Result};
pub use image_ref::ImageReference;
pub use service::{canonical_service_name, AuthorizationMode, EnvVar, ServiceSpec};
pub use status::{ContainerMetadata, DeploymentOutcome, Readiness, ServiceStatus};
