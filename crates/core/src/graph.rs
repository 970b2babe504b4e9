//! Job graph data model.
//!
//! A [`JobGraph`] is the declarative computation submitted to the engine:
//! an ordered mapping from node id to [`Node`]. It serializes directly to
//! the engine's JSON "prompt" object:
//!
//! ```text
//! { "3": { "class_type": "VAEEncode",
//!          "inputs": { "pixels": ["1", 0], "vae": ["2", 2] } } }
//! ```
//!
//! The [`ResultSet`] type holds the image buffers the engine streamed back
//! for one completed job.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Node vocabulary
// ---------------------------------------------------------------------------

/// Loads an image embedded in the graph as base64 text.
pub const LOAD_IMAGE_BASE64_CLASS: &str = "ETN_LoadImageBase64";

/// Streams its input images back over the WebSocket as binary frames.
pub const SAVE_IMAGE_WEBSOCKET_CLASS: &str = "SaveImageWebsocket";

/// Node classes whose results are collected into the [`ResultSet`].
pub const OUTPUT_NODE_CLASSES: &[&str] = &[SAVE_IMAGE_WEBSOCKET_CLASS];

/// Number of output slots produced by a known node class.
///
/// Returns `None` for classes outside the vocabulary; links into those
/// nodes are only checked for presence, not slot range.
pub fn output_arity(class_type: &str) -> Option<u32> {
    let arity = match class_type {
        LOAD_IMAGE_BASE64_CLASS => 2, // IMAGE, MASK
        "CheckpointLoaderSimple" => 3, // MODEL, CLIP, VAE
        "CLIPTextEncode" => 1,
        "VAEEncode" => 1,
        "VAEDecode" => 1,
        "KSampler" => 1,
        "ImageScale" => 1,
        "EmptyLatentImage" => 1,
        "InspyrenetRembg" => 2, // IMAGE, MASK
        "ImageCompositeMasked" => 1,
        SAVE_IMAGE_WEBSOCKET_CLASS => 0,
        _ => return None,
    };
    Some(arity)
}

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// Reference to output slot `.1` of node `.0`.
///
/// Serializes as a two-element array (`["4", 0]`), which is how the engine
/// distinguishes links from literal values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLink(pub String, pub u32);

/// A single node input: either a link to another node or a literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeInput {
    Link(NodeLink),
    Literal(serde_json::Value),
}

impl NodeInput {
    pub fn link(node_id: impl Into<String>, slot: u32) -> Self {
        Self::Link(NodeLink(node_id.into(), slot))
    }

    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn as_link(&self) -> Option<&NodeLink> {
        match self {
            Self::Link(link) => Some(link),
            Self::Literal(_) => None,
        }
    }

    pub fn as_literal(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Literal(value) => Some(value),
            Self::Link(_) => None,
        }
    }
}

/// One operation in a job graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Engine operation kind (e.g. "KSampler", "VAEDecode").
    pub class_type: String,
    /// Named inputs, in declaration order.
    pub inputs: IndexMap<String, NodeInput>,
}

impl Node {
    pub fn new(class_type: impl Into<String>) -> Self {
        Self {
            class_type: class_type.into(),
            inputs: IndexMap::new(),
        }
    }

    /// Builder-style input insertion.
    pub fn with_input(mut self, name: impl Into<String>, input: NodeInput) -> Self {
        self.inputs.insert(name.into(), input);
        self
    }

    pub fn input(&self, name: &str) -> Option<&NodeInput> {
        self.inputs.get(name)
    }

    pub fn is_output(&self) -> bool {
        OUTPUT_NODE_CLASSES.contains(&self.class_type.as_str())
    }
}

/// An ordered node-id → [`Node`] mapping describing one engine job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobGraph {
    nodes: IndexMap<String, Node>,
}

impl JobGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, replacing any previous node with the same id.
    pub fn insert(&mut self, id: impl Into<String>, node: Node) {
        self.nodes.insert(id.into(), node);
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.nodes.iter().map(|(id, node)| (id.as_str(), node))
    }

    /// Ids of the nodes whose images should be collected into the result set.
    pub fn output_node_ids(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.is_output())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Check that every link references a node present in this graph and,
    /// where the referenced class is known, a slot within its output arity.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (id, node) in &self.nodes {
            for (input_name, input) in &node.inputs {
                let Some(NodeLink(target, slot)) = input.as_link() else {
                    continue;
                };
                let referenced = self.nodes.get(target).ok_or_else(|| {
                    CoreError::InvalidGraph(format!(
                        "node '{id}' input '{input_name}' references missing node '{target}'"
                    ))
                })?;
                if let Some(arity) = output_arity(&referenced.class_type) {
                    if *slot >= arity {
                        return Err(CoreError::InvalidGraph(format!(
                            "node '{id}' input '{input_name}' references slot {slot} of \
                             '{target}' ({}), which has {arity} outputs",
                            referenced.class_type
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Result set
// ---------------------------------------------------------------------------

/// Image buffers produced by one completed job, keyed by output node id.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    images: HashMap<String, Vec<Vec<u8>>>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an image buffer for `node_id`, preserving arrival order.
    pub fn push(&mut self, node_id: impl Into<String>, bytes: Vec<u8>) {
        self.images.entry(node_id.into()).or_default().push(bytes);
    }

    pub fn images(&self, node_id: &str) -> Option<&[Vec<u8>]> {
        self.images.get(node_id).map(Vec::as_slice)
    }

    /// The first non-empty buffer produced by `node_id`, if any.
    pub fn first_image(&self, node_id: &str) -> Option<&[u8]> {
        self.images
            .get(node_id)?
            .iter()
            .find(|buf| !buf.is_empty())
            .map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.images.values().all(Vec::is_empty)
    }

    /// Total number of buffers across all nodes.
    pub fn image_count(&self) -> usize {
        self.images.values().map(Vec::len).sum()
    }
}
