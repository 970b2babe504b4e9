//! Receive loop for one submitted job.
//!
//! Reads frames until this job's completion event, collecting images the
//! engine streams for the graph's output nodes. Events tagged with any
//! other job id are skipped, so several clients can share one engine.

use atelier_core::graph::ResultSet;
use futures::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::client::{advance, JobState};
use crate::engine::EngineError;
use crate::messages::{parse_message, BinaryFrame, ComfyUIMessage};

/// Consume `stream` until the job `prompt_id` completes.
///
/// Binary image frames are attributed to the node most recently announced
/// by an `executing` event for this job and kept only when that node is in
/// `output_nodes`. The first `executing` event for this job moves `state`
/// to [`JobState::Running`]. The loop has no timeout of its own; callers
/// bound it.
pub async fn collect_results<S>(
    stream: &mut S,
    prompt_id: &str,
    output_nodes: &[String],
    state: &mut JobState,
) -> Result<ResultSet, EngineError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let mut results = ResultSet::new();
    let mut current_node: Option<String> = None;

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let msg = match parse_message(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::debug!(error = %e, "Skipping unrecognized ComfyUI message");
                        continue;
                    }
                };
                if msg.prompt_id() != Some(prompt_id) {
                    if let ComfyUIMessage::Status(data) = &msg {
                        tracing::trace!(
                            queue_remaining = data.status.exec_info.queue_remaining,
                            "ComfyUI queue status",
                        );
                    }
                    continue;
                }
                match msg {
                    ComfyUIMessage::Executing(data) => match data.node {
                        Some(node) => {
                            if *state != JobState::Running {
                                advance(state, JobState::Running, Some(prompt_id));
                            }
                            tracing::debug!(prompt_id, node = %node, "Executing node");
                            current_node = Some(node);
                        }
                        None => {
                            tracing::debug!(prompt_id, "Execution finished (all nodes done)");
                            return Ok(results);
                        }
                    },
                    ComfyUIMessage::Progress(data) => {
                        tracing::trace!(prompt_id, value = data.value, max = data.max, "Progress");
                    }
                    ComfyUIMessage::ExecutionError(data) => {
                        tracing::error!(
                            prompt_id,
                            node_id = %data.node_id,
                            error_type = %data.exception_type,
                            error_message = %data.exception_message,
                            "Execution error",
                        );
                        return Err(EngineError::Execution {
                            prompt_id: prompt_id.to_string(),
                            node_id: Some(data.node_id),
                            message: format!("{}: {}", data.exception_type, data.exception_message),
                        });
                    }
                    ComfyUIMessage::ExecutionInterrupted(data) => {
                        return Err(EngineError::Execution {
                            prompt_id: prompt_id.to_string(),
                            node_id: data.node_id,
                            message: "execution was interrupted".to_string(),
                        });
                    }
                    ComfyUIMessage::ExecutionCached(data) => {
                        tracing::debug!(prompt_id, cached = data.nodes.len(), "Execution used cache");
                    }
                    ComfyUIMessage::ExecutionStart(_)
                    | ComfyUIMessage::Executed(_)
                    | ComfyUIMessage::ExecutionSuccess(_)
                    | ComfyUIMessage::Status(_) => {}
                }
            }
            Ok(Message::Binary(bytes)) => match BinaryFrame::parse(&bytes) {
                Ok(frame) if frame.is_image() => match current_node.as_deref() {
                    Some(node) if output_nodes.iter().any(|n| n == node) => {
                        tracing::debug!(prompt_id, node, bytes = frame.data.len(), "Received output image");
                        results.push(node, frame.data);
                    }
                    node => {
                        tracing::trace!(prompt_id, ?node, "Discarding image from non-output node");
                    }
                },
                Ok(frame) => {
                    tracing::trace!(event_type = frame.event_type, "Ignoring non-image binary frame");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Malformed binary frame");
                }
            },
            Ok(Message::Close(frame)) => {
                return Err(EngineError::ConnectionClosed {
                    prompt_id: prompt_id.to_string(),
                    reason: format!("close frame received: {frame:?}"),
                });
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Err(e) => {
                return Err(EngineError::ConnectionClosed {
                    prompt_id: prompt_id.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    Err(EngineError::ConnectionClosed {
        prompt_id: prompt_id.to_string(),
        reason: "stream ended".to_string(),
    })
}
