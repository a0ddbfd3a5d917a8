//! Human-readable progress notes on a pull request
//!
//! A single comment is posted when the deployment starts and edited in place
//! at every phase transition. Reporting is best-effort: failures are logged
//! and never interrupt the deployment.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;
use skyport_common::{Error, Result};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Identifies a posted comment so it can be edited later
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommentHandle(pub u64);

/// Somewhere progress notes can be posted and edited
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn post(&self, text: &str) -> Result<CommentHandle>;

    async fn update(&self, handle: CommentHandle, text: &str) -> Result<()>;
}

/// Writes notes to the log only
pub struct LogReporter;

#[async_trait]
impl ProgressReporter for LogReporter {
    async fn post(&self, text: &str) -> Result<CommentHandle> {
        info!("Progress: {}", text);
        Ok(CommentHandle(0))
    }

    async fn update(&self, _handle: CommentHandle, text: &str) -> Result<()> {
        info!("Progress: {}", text);
        Ok(())
    }
}

/// Pull request coordinates for GitHub comments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubContext {
    pub api_url: String,
    pub repository: String,
    pub issue_number: u64,
    pub token: String,
}

#[derive(Debug, Deserialize)]
struct CommentResponse {
    id: u64,
}

/// Posts notes as GitHub issue comments
pub struct GitHubReporter {
    context: GitHubContext,
    client: reqwest::Client,
}

impl GitHubReporter {
    pub fn new(context: GitHubContext) -> Self {
        Self {
            context,
            client: reqwest::Client::new(),
        }
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.context.token)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, "skyport-deployer")
    }
}

#[async_trait]
impl ProgressReporter for GitHubReporter {
    async fn post(&self, text: &str) -> Result<CommentHandle> {
        let url = format!(
            "{}/repos/{}/issues/{}/comments",
            self.context.api_url, self.context.repository, self.context.issue_number
        );

        let response = self
            .request(reqwest::Method::POST, url)
            .json(&serde_json::json!({ "body": text }))
            .send()
            .await
            .map_err(|e| Error::Reporting(format!("Failed to post comment: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Reporting(format!(
                "Posting comment returned {}",
                response.status()
            )));
        }

        let comment: CommentResponse = response
            .json()
            .await
            .map_err(|e| Error::Reporting(format!("Failed to parse comment response: {e}")))?;

        Ok(CommentHandle(comment.id))
    }

    async fn update(&self, handle: CommentHandle, text: &str) -> Result<()> {
        let url = format!(
            "{}/repos/{}/issues/comments/{}",
            self.context.api_url, self.context.repository, handle.0
        );

        let response = self
            .request(reqwest::Method::PATCH, url)
            .json(&serde_json::json!({ "body": text }))
            .send()
            .await
            .map_err(|e| Error::Reporting(format!("Failed to update comment: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Reporting(format!(
                "Updating comment returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}

#[derive(Default)]
struct ProgressState {
    handle: Option<CommentHandle>,
    lines: Vec<String>,
}

/// Accumulates phase notes into one comment
pub struct Progress {
    reporter: Box<dyn ProgressReporter>,
    title: String,
    state: Mutex<ProgressState>,
}

impl Progress {
    pub fn new(reporter: Box<dyn ProgressReporter>, title: impl Into<String>) -> Self {
        Self {
            reporter,
            title: title.into(),
            state: Mutex::new(ProgressState::default()),
        }
    }

    /// Progress that only goes to the log
    pub fn log_only(title: impl Into<String>) -> Self {
        Self::new(Box::new(LogReporter), title)
    }

    /// Append a note and publish the whole comment
    pub async fn report(&self, line: impl Into<String>) {
        let mut state = self.state.lock().await;
        state.lines.push(line.into());
        let body = self.render(&state.lines);

        let result = match state.handle {
            Some(handle) => self.reporter.update(handle, &body).await,
            None => match self.reporter.post(&body).await {
                Ok(handle) => {
                    state.handle = Some(handle);
                    Ok(())
                }
                Err(e) => Err(e),
            },
        };

        if let Err(e) = result {
            warn!("Could not publish progress: {}", e);
        }
    }

    fn render(&self, lines: &[String]) -> String {
        let mut body = format!("### {}\n", self.title);
        for line in lines {
            body.push_str("\n- ");
            body.push_str(line);
        }
        body
    }
}
