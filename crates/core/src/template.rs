//! Declarative job graph templates.
//!
//! A [`GraphTemplate`] is a fixed list of [`NodeSpec`]s whose inputs are
//! literals, links to other nodes, or named parameter slots. Operations
//! declare their topology once as a template and fill the slots per request
//! with [`TemplateParams`].

use std::collections::HashMap;

use crate::error::CoreError;
use crate::graph::{JobGraph, Node, NodeInput};

/// How a node input is produced when the template is instantiated.
#[derive(Debug, Clone, PartialEq)]
pub enum InputSpec {
    /// A fixed value baked into the template.
    Literal(serde_json::Value),
    /// Output slot of another node in the same template.
    Link(&'static str, u32),
    /// Filled from [`TemplateParams`] at instantiation time.
    Param(&'static str),
}

/// One node of a template.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub id: &'static str,
    pub class_type: &'static str,
    pub inputs: Vec<(&'static str, InputSpec)>,
}

impl NodeSpec {
    pub fn new(id: &'static str, class_type: &'static str) -> Self {
        Self {
            id,
            class_type,
            inputs: Vec::new(),
        }
    }

    pub fn literal(mut self, name: &'static str, value: impl Into<serde_json::Value>) -> Self {
        self.inputs.push((name, InputSpec::Literal(value.into())));
        self
    }

    pub fn link(mut self, name: &'static str, node: &'static str, slot: u32) -> Self {
        self.inputs.push((name, InputSpec::Link(node, slot)));
        self
    }

    pub fn param(mut self, name: &'static str, param: &'static str) -> Self {
        self.inputs.push((name, InputSpec::Param(param)));
        self
    }
}

/// Values for a template's parameter slots.
#[derive(Debug, Clone, Default)]
pub struct TemplateParams {
    values: HashMap<&'static str, serde_json::Value>,
}

impl TemplateParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: &'static str, value: impl Into<serde_json::Value>) -> Self {
        self.values.insert(name, value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.values.get(name)
    }
}

/// A named, fixed graph topology with parameter slots and one terminal
/// output node.
#[derive(Debug, Clone)]
pub struct GraphTemplate {
    pub name: &'static str,
    pub nodes: Vec<NodeSpec>,
    /// Id of the node whose images form the operation's result.
    pub output: &'static str,
}

impl GraphTemplate {
    /// Names of every parameter slot, in first-use order.
    pub fn param_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        for spec in &self.nodes {
            for (_, input) in &spec.inputs {
                if let InputSpec::Param(name) = input {
                    if !names.contains(name) {
                        names.push(*name);
                    }
                }
            }
        }
        names
    }

    /// Produce a concrete [`JobGraph`].
    ///
    /// Fails only on a template defect: an unfilled parameter slot, a
    /// dangling link, or a missing/non-output terminal node.
    pub fn instantiate(&self, params: &TemplateParams) -> Result<JobGraph, CoreError> {
        let mut graph = JobGraph::new();
        for spec in &self.nodes {
            let mut node = Node::new(spec.class_type);
            for (name, input) in &spec.inputs {
                let value = match input {
                    InputSpec::Literal(value) => NodeInput::Literal(value.clone()),
                    InputSpec::Link(target, slot) => NodeInput::link(*target, *slot),
                    InputSpec::Param(param) => {
                        let value = params.get(param).ok_or_else(|| {
                            CoreError::Internal(format!(
                                "template '{}' is missing parameter '{param}'",
                                self.name
                            ))
                        })?;
                        NodeInput::Literal(value.clone())
                    }
                };
                node = node.with_input(*name, value);
            }
            graph.insert(spec.id, node);
        }

        match graph.get(self.output) {
            Some(node) if node.is_output() => {}
            _ => {
                return Err(CoreError::Internal(format!(
                    "template '{}' output '{}' is not an output node",
                    self.name, self.output
                )))
            }
        }

        graph.validate().map_err(|e| {
            CoreError::Internal(format!("template '{}' is malformed: {e}", self.name))
        })?;
        Ok(graph)
    }
}
