//! Service account credential provisioning
//!
//! The deployer receives its key either as literal JSON or as a path to a key
//! file. The key is persisted to a file at most once per process so tools
//! that expect a credentials file can find it; everything inside this crate
//! receives the parsed key through an explicit [`CredentialContext`].

use serde::Deserialize;
use skyport_common::{Error, Result};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

/// Environment variable naming an already-provisioned key file
pub const AMBIENT_CREDENTIALS_VAR: &str = "GOOGLE_APPLICATION_CREDENTIALS";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Process-wide location of the provisioned key file
static CREDENTIALS_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Fields of a service account JSON key that the deployer uses
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::Credential(format!("Invalid service account key: {e}")))
    }
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .field("token_uri", &self.token_uri)
            .field("project_id", &self.project_id)
            .finish()
    }
}

/// Authentication context handed to the platform and registry clients
#[derive(Debug, Clone)]
pub struct CredentialContext {
    pub key: ServiceAccountKey,
    /// File holding the key material
    pub path: PathBuf,
}

impl CredentialContext {
    pub fn project_id(&self) -> Option<&str> {
        self.key.project_id.as_deref()
    }
}

/// Make the service account key available to this process.
///
/// `secret` is either a path to an existing key file or the key JSON itself.
/// Unless `GOOGLE_APPLICATION_CREDENTIALS` already points somewhere, the key
/// is written to a fresh temporary file. Later calls reuse the location
/// recorded by the first one.
pub fn ensure_credentials_available(secret: &str) -> Result<CredentialContext> {
    let ambient = std::env::var_os(AMBIENT_CREDENTIALS_VAR)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from);
    provision(&CREDENTIALS_PATH, ambient, secret)
}

fn provision(
    slot: &OnceLock<PathBuf>,
    ambient: Option<PathBuf>,
    secret: &str,
) -> Result<CredentialContext> {
    let bytes = read_secret(secret)?;
    let key = ServiceAccountKey::from_slice(&bytes)?;

    let path = match slot.get() {
        Some(path) => {
            debug!("Credentials already provisioned at {}", path.display());
            path.clone()
        }
        None => {
            let path = match ambient {
                Some(path) => {
                    info!("Using ambient credentials location {}", path.display());
                    path
                }
                None => persist(&bytes)?,
            };
            slot.get_or_init(|| path).clone()
        }
    };

    Ok(CredentialContext { key, path })
}

fn read_secret(secret: &str) -> Result<Vec<u8>> {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return Err(Error::Credential("service account key is empty".to_string()));
    }

    let path = Path::new(trimmed);
    if path.is_file() {
        debug!("Reading service account key from {}", path.display());
        return std::fs::read(path).map_err(|e| {
            Error::Credential(format!("Failed to read key file {}: {e}", path.display()))
        });
    }

    Ok(trimmed.as_bytes().to_vec())
}

fn persist(bytes: &[u8]) -> Result<PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix("skyport-credentials-")
        .suffix(".json")
        .tempfile()
        .map_err(|e| Error::Credential(format!("Failed to create credentials file: {e}")))?;

    file.write_all(bytes)
        .and_then(|_| file.flush())
        .map_err(|e| Error::Credential(format!("Failed to write credentials file: {e}")))?;

    let (_, path) = file
        .keep()
        .map_err(|e| Error::Credential(format!("Failed to keep credentials file: {e}")))?;

    info!("Wrote credentials to {}", path.display());
    Ok(path)
}
