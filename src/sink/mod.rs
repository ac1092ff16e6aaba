use std::fmt;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

pub mod threads;
pub mod twitter;

/// Identifier the network assigned to a published post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostId(pub String);

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("permission denied, check the app has write access")]
    Permission,
    #[error("authentication failed, check the credentials")]
    Authentication,
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("container creation returned {status}: {body}")]
    ContainerCreate { status: StatusCode, body: String },
    #[error("container response had no id")]
    MissingCreationId,
    #[error("publish returned {status}: {body}")]
    Publish { status: StatusCode, body: String },
    #[error(transparent)]
    Unexpected(#[from] reqwest::Error),
}

impl SinkError {
    /// Short label used in log lines.
    pub fn category(&self) -> &'static str {
        match self {
            SinkError::Permission => "permission",
            SinkError::Authentication => "authentication",
            SinkError::Api { .. } => "api",
            SinkError::ContainerCreate { .. } | SinkError::MissingCreationId => "container",
            SinkError::Publish { .. } => "publish",
            SinkError::Unexpected(_) => "unexpected",
        }
    }
}

/// A social network a notification can be posted to.
#[async_trait]
pub trait PostSink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Publishes `message` as a single text post. No retries.
    async fn post(&self, message: &str) -> Result<PostId, SinkError>;
}

async fn error_body(res: reqwest::Response) -> String {
    res.text().await.unwrap_or_default()
}
