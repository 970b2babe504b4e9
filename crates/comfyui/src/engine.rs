//! The seam between request handling and the engine transport.

use std::time::Duration;

use async_trait::async_trait;
use atelier_core::graph::{JobGraph, ResultSet};

use crate::api::ComfyUIApiError;
use crate::client::EngineClient;

/// Something that can run a job graph to completion.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Submit `graph` and return its images once the job completes.
    async fn execute(&self, graph: &JobGraph) -> Result<ResultSet, EngineError>;

    /// Whether the engine is currently reachable.
    async fn is_healthy(&self) -> bool;
}

#[async_trait]
impl Engine for EngineClient {
    async fn execute(&self, graph: &JobGraph) -> Result<ResultSet, EngineError> {
        EngineClient::execute(self, graph).await
    }

    async fn is_healthy(&self) -> bool {
        EngineClient::is_healthy(self).await
    }
}

/// Transport-level failures of a job submission.
///
/// An engine that completes but produces no image is *not* an error here;
/// callers detect that on the returned [`ResultSet`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The WebSocket could not be opened.
    #[error("Engine unreachable: {0}")]
    Connection(String),

    /// The engine rejected or failed the submission request.
    #[error("Job submission failed: {0}")]
    Submit(#[from] ComfyUIApiError),

    /// The event stream ended before the job's completion event.
    #[error("Engine connection closed before job {prompt_id} completed: {reason}")]
    ConnectionClosed { prompt_id: String, reason: String },

    /// The call outlived its deadline. `prompt_id` is `None` when the
    /// deadline passed before the job was submitted.
    #[error("Job did not complete within {timeout:?}")]
    Timeout {
        prompt_id: Option<String>,
        timeout: Duration,
    },

    /// The engine reported a failure while executing the job.
    #[error("Job {prompt_id} failed during execution: {message}")]
    Execution {
        prompt_id: String,
        node_id: Option<String>,
        message: String,
    },

    /// The caller cancelled the wait.
    #[error("Job cancelled")]
    Cancelled { prompt_id: Option<String> },
}

impl EngineError {
    /// Stable short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Submit(_) => "submit",
            Self::ConnectionClosed { .. } => "connection_closed",
            Self::Timeout { .. } => "timeout",
            Self::Execution { .. } => "execution",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}
