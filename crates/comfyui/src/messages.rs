//! ComfyUI WebSocket message types and parsers.
//!
//! ComfyUI sends JSON text frames with the shape
//! `{"type": "<kind>", "data": {...}}`, deserialized here into
//! [`ComfyUIMessage`], and binary frames carrying image bytes behind an
//! 8-byte header, decoded by [`BinaryFrame::parse`].

use serde::Deserialize;

/// All known ComfyUI WebSocket message types.
///
/// Deserialized via the internally-tagged `"type"` field with
/// associated `"data"` content.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ComfyUIMessage {
    /// Server status broadcast (queue depth, etc.).
    #[serde(rename = "status")]
    Status(StatusData),

    /// A prompt has started executing.
    #[serde(rename = "execution_start")]
    ExecutionStart(ExecutionStartData),

    /// Some nodes were skipped because their outputs are cached.
    #[serde(rename = "execution_cached")]
    ExecutionCached(ExecutionCachedData),

    /// A specific node is currently executing (or execution finished when `node` is `None`).
    #[serde(rename = "executing")]
    Executing(ExecutingData),

    /// Progress update from a long-running node (e.g. KSampler).
    #[serde(rename = "progress")]
    Progress(ProgressData),

    /// A node has finished and produced output.
    #[serde(rename = "executed")]
    Executed(ExecutedData),

    /// Execution failed with an error.
    #[serde(rename = "execution_error")]
    ExecutionError(ErrorData),

    /// Execution was interrupted before finishing.
    #[serde(rename = "execution_interrupted")]
    ExecutionInterrupted(InterruptedData),

    /// Every node of the prompt finished without error.
    #[serde(rename = "execution_success")]
    ExecutionSuccess(ExecutionStartData),
}

impl ComfyUIMessage {
    /// The job id this message belongs to, if it carries one.
    pub fn prompt_id(&self) -> Option<&str> {
        match self {
            Self::Status(_) => None,
            Self::ExecutionStart(d) | Self::ExecutionSuccess(d) => Some(d.prompt_id.as_str()),
            Self::ExecutionCached(d) => Some(d.prompt_id.as_str()),
            Self::Executing(d) => d.prompt_id.as_deref(),
            Self::Progress(d) => d.prompt_id.as_deref(),
            Self::Executed(d) => Some(d.prompt_id.as_str()),
            Self::ExecutionError(d) => Some(d.prompt_id.as_str()),
            Self::ExecutionInterrupted(d) => Some(d.prompt_id.as_str()),
        }
    }
}

/// Queue status information.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
}

/// Current queue state.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

/// Execution queue statistics.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: i32,
}

/// Payload for `execution_start` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionStartData {
    pub prompt_id: String,
}

/// Payload for `execution_cached` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionCachedData {
    pub prompt_id: String,
    /// Node IDs whose outputs were served from cache.
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// Payload for `executing` messages.
///
/// When `node` is `None`, execution of the prompt has completed.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for `progress` messages (step-level progress within a node).
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    /// Current step number.
    pub value: i32,
    /// Total number of steps.
    pub max: i32,
    #[serde(default)]
    pub prompt_id: Option<String>,
    /// Node reporting the progress.
    #[serde(default)]
    pub node: Option<String>,
}

/// Payload for `executed` messages (node output).
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedData {
    /// The node that produced this output.
    pub node: String,
    /// Raw output value (images, filenames, etc.).
    pub output: serde_json::Value,
    pub prompt_id: String,
}

/// Payload for `execution_error` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    pub node_id: String,
    pub exception_message: String,
    pub exception_type: String,
}

/// Payload for `execution_interrupted` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct InterruptedData {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
}

/// Binary event type for an encoded image (PNG or JPEG).
pub const BINARY_EVENT_PREVIEW_IMAGE: u32 = 1;

/// Binary event type for raw, unencoded preview pixels.
pub const BINARY_EVENT_UNENCODED_PREVIEW_IMAGE: u32 = 2;

/// Image format code for JPEG payloads.
pub const BINARY_FORMAT_JPEG: u32 = 1;

/// Image format code for PNG payloads.
pub const BINARY_FORMAT_PNG: u32 = 2;

/// Length of the big-endian `(event_type, image_format)` header.
const BINARY_HEADER_LEN: usize = 8;

/// A decoded binary WebSocket frame.
///
/// The engine does not name the producing node inside the frame; it is
/// whichever node the most recent `executing` event announced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryFrame {
    pub event_type: u32,
    pub image_format: u32,
    pub data: Vec<u8>,
}

/// Error returned for binary frames too short to hold a header.
#[derive(Debug, thiserror::Error)]
#[error("Binary frame of {len} bytes is shorter than the {BINARY_HEADER_LEN}-byte header")]
pub struct BinaryFrameError {
    pub len: usize,
}

impl BinaryFrame {
    pub fn parse(bytes: &[u8]) -> Result<Self, BinaryFrameError> {
        if bytes.len() < BINARY_HEADER_LEN {
            return Err(BinaryFrameError { len: bytes.len() });
        }
        let event_type = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let image_format = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Ok(Self {
            event_type,
            image_format,
            data: bytes[BINARY_HEADER_LEN..].to_vec(),
        })
    }

    /// Whether the payload is an encoded image worth collecting.
    pub fn is_image(&self) -> bool {
        self.event_type == BINARY_EVENT_PREVIEW_IMAGE
    }
}

/// Parse a ComfyUI WebSocket text message into a typed enum.
///
/// Returns `Err` for malformed JSON or unknown `type` values.
/// Callers should log unknown types and continue.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    serde_json::from_str(text)
}
