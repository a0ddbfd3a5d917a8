//! Waiting for an image to become pullable
//!
//! Registries expose a freshly pushed image only once its manifest is
//! committed. The deployment is gated on that manifest existing: "not found"
//! is the expected answer while a build is still pushing and is retried at a
//! fixed interval, while every other answer is an error.

use async_trait::async_trait;
use skyport_common::{Error, ImageReference, Result};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

/// Default time to wait for an image to appear
pub const DEFAULT_IMAGE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default pause between manifest checks
pub const DEFAULT_IMAGE_INTERVAL: Duration = Duration::from_secs(5);

/// Answer to "does this manifest exist?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestStatus {
    Exists,
    NotFound,
}

/// Metadata-only manifest existence check
#[async_trait]
pub trait ManifestProbe: Send + Sync {
    async fn probe(&self, image: &ImageReference) -> Result<ManifestStatus>;
}

/// Number of checks that fit in `timeout` at `interval` spacing
pub fn max_attempts(timeout: Duration, interval: Duration) -> Result<u32> {
    if timeout.is_zero() {
        return Err(Error::Config(
            "image check timeout must be greater than 0".to_string(),
        ));
    }
    if interval.is_zero() {
        return Err(Error::Config(
            "image check interval must be greater than 0".to_string(),
        ));
    }

    let attempts = timeout.as_nanos() / interval.as_nanos();
    Ok(u32::try_from(attempts).unwrap_or(u32::MAX))
}

/// Poll the registry until `image` exists.
///
/// Returns `Ok(true)` once the manifest exists and `Ok(false)` when every
/// attempt reported "not found". Any other probe failure is returned
/// immediately without further attempts.
pub async fn wait_for_image<P: ManifestProbe + ?Sized>(
    probe: &P,
    image: &ImageReference,
    timeout: Duration,
    interval: Duration,
) -> Result<bool> {
    let attempts = max_attempts(timeout, interval)?;

    info!(
        "Waiting for image {} (up to {} checks, every {:?})",
        image, attempts, interval
    );

    for attempt in 1..=attempts {
        match probe.probe(image).await? {
            ManifestStatus::Exists => {
                info!("Image {} is available (check {}/{})", image, attempt, attempts);
                return Ok(true);
            }
            ManifestStatus::NotFound => {
                debug!("Image {} not found yet (check {}/{})", image, attempt, attempts);
                if attempt < attempts {
                    sleep(interval).await;
                }
            }
        }
    }

    info!("Image {} still unavailable after {} checks", image, attempts);
    Ok(false)
}
