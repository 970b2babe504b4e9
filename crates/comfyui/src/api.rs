//! The three REST calls an operation needs from the engine.
//!
//! A job graph goes in through `POST /prompt`, an abandoned job is dropped
//! with `POST /queue`, and `GET /system_stats` answers the health check.
//! Results never come back over REST; they stream on the WebSocket.

use atelier_core::graph::JobGraph;
use serde::Deserialize;

/// REST side of one ComfyUI instance. Cheap to clone.
#[derive(Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Body of a successful `POST /prompt`.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Id the engine tags every event of this job with.
    pub prompt_id: String,
    /// Queue position at submission, logged only.
    #[serde(default)]
    pub number: i32,
}

/// Errors from the REST calls.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// No usable response (refused, reset, timed out, bad JSON).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The engine answered with a non-2xx status, e.g. 400 for a graph
    /// that fails its validation.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError { status: u16, body: String },
}

impl ComfyUIApi {
    /// `client` carries the request timeout; `api_url` is the base URL,
    /// e.g. `http://host:8188`, without a trailing slash.
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self { client, api_url }
    }

    /// Queue `graph` tagged with `client_id`, so its events reach the
    /// WebSocket opened under the same id.
    pub async fn submit_workflow(
        &self,
        graph: &JobGraph,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": graph,
            "client_id": client_id,
        });
        let response = self.client.post(self.url("prompt")).json(&body).send().await?;
        Ok(success(response).await?.json().await?)
    }

    /// Drop a job we stopped waiting for. Only removes it while still
    /// queued; a job already on the GPU runs to the end.
    pub async fn cancel_execution(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        let body = serde_json::json!({ "delete": [prompt_id] });
        let response = self.client.post(self.url("queue")).json(&body).send().await?;
        success(response).await.map(drop)
    }

    /// Device and version info; any 2xx JSON answer means the engine is up.
    pub async fn system_stats(&self) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self.client.get(self.url("system_stats")).send().await?;
        Ok(success(response).await?.json().await?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.api_url)
    }
}

/// Pass 2xx responses through; turn anything else into
/// [`ComfyUIApiError::ApiError`] keeping the body for the logs.
async fn success(response: reqwest::Response) -> Result<reqwest::Response, ComfyUIApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    Err(ComfyUIApiError::ApiError {
        status: status.as_u16(),
        body,
    })
}
