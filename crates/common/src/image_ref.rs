use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// A fully qualified container image reference (`host/repository:tag`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    /// Registry host, including an optional port (e.g. `gcr.io`, `localhost:5000`)
    pub host: String,
    /// Repository path within the registry (e.g. `my-project/api`)
    pub repository: String,
    /// Image tag
    pub tag: String,
}

impl ImageReference {
    pub fn new(
        host: impl Into<String>,
        repository: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            repository: repository.into(),
            tag: tag.into(),
        }
    }
}

impl FromStr for ImageReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidImageReference(s.to_string());

        let (host, rest) = s.split_once('/').ok_or_else(invalid)?;
        // The host may carry a port, so the tag colon is searched only after it
        let (repository, tag) = rest.rsplit_once(':').ok_or_else(invalid)?;

        if host.is_empty()
            || host.contains('@')
            || host.chars().any(char::is_whitespace)
            || !is_valid_repository(repository)
            || !is_valid_tag(tag)
        {
            return Err(invalid());
        }

        Ok(Self::new(host, repository, tag))
    }
}

/// Lowercase path components of `[a-z0-9]` runs joined by `.`, `_`, `__` or `-`
fn is_valid_repository(repository: &str) -> bool {
    !repository.is_empty()
        && repository.split('/').all(|component| {
            let bytes = component.as_bytes();
            matches!(bytes.first(), Some(b'a'..=b'z' | b'0'..=b'9'))
                && matches!(bytes.last(), Some(b'a'..=b'z' | b'0'..=b'9'))
                && bytes
                    .iter()
                    .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-'))
        })
}

/// `[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}`
fn is_valid_tag(tag: &str) -> bool {
    let bytes = tag.as_bytes();
    matches!(bytes.first(), Some(b) if b.is_ascii_alphanumeric() || *b == b'_')
        && bytes.len() <= 128
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.host, self.repository, self.tag)
    }
}
