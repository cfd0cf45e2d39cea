//! Building nodes from specs through registered constructors.

use std::collections::BTreeMap;
use std::sync::Arc;

use ferret_publish::Publishers;
use serde::{Deserialize, Serialize};

use crate::steps::{AuthGate, DEFAULT_EVENT, DEFAULT_TOKEN_FIELD, Emit, Publish, Track};
use crate::{Node, NodeSpec, PipelineError, Step, Workflow};

/// Builds a node from its spec.
pub type NodeConstructor = Arc<dyn Fn(&NodeSpec) -> Result<Node, PipelineError> + Send + Sync>;

/// A workflow as stored in a JSON file: a name and a flat list of nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub name: String,
    pub nodes: Vec<NodeSpec>,
}

/// Maps node kinds to constructors.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    constructors: BTreeMap<String, NodeConstructor>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the `auth`, `publish`, `emit` and `track` kinds.
    pub fn with_builtins(publishers: Publishers) -> Self {
        let mut registry = Self::new();

        registry.register("auth", |spec| {
            let field = spec
                .parameters
                .get("token_field")
                .map(String::as_str)
                .unwrap_or(DEFAULT_TOKEN_FIELD);
            Ok(node(spec, Step::Auth(AuthGate::new(field))))
        });

        registry.register("publish", move |spec| {
            let mut step = Publish::new(publishers.clone());
            if let Some(platform) = spec.parameters.get("platform") {
                step = step.with_platform(platform.clone());
            }
            Ok(node(spec, Step::Publish(step)))
        });

        registry.register("emit", |spec| {
            let topic = required(spec, "topic")?;
            let event = spec
                .parameters
                .get("event")
                .map(String::as_str)
                .unwrap_or(DEFAULT_EVENT);
            Ok(node(spec, Step::Emit(Emit::new(topic, event))))
        });

        registry.register("track", |spec| {
            let event = required(spec, "event")?;
            Ok(node(spec, Step::Track(Track::new(event))))
        });

        registry
    }

    /// Register a constructor for `kind`, replacing any existing one.
    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(&NodeSpec) -> Result<Node, PipelineError> + Send + Sync + 'static,
    {
        self.constructors.insert(kind.into(), Arc::new(constructor));
        self
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    pub fn build(&self, spec: &NodeSpec) -> Result<Node, PipelineError> {
        if spec.name.trim().is_empty() {
            return Err(PipelineError::Validation(format!(
                "node of kind '{}' has no name",
                spec.kind
            )));
        }
        let constructor = self.constructors.get(&spec.kind).ok_or_else(|| {
            PipelineError::Validation(format!(
                "unknown node kind '{}' for node '{}'",
                spec.kind, spec.name
            ))
        })?;
        constructor(spec)
    }

    pub fn build_workflow(&self, spec: &WorkflowSpec) -> Result<Workflow, PipelineError> {
        let nodes = spec
            .nodes
            .iter()
            .map(|node| self.build(node))
            .collect::<Result<Vec<_>, _>>()?;
        Workflow::new(spec.name.clone(), nodes)
    }

    /// Parse a workflow from JSON and build it.
    pub fn load_workflow(&self, json: &str) -> Result<Workflow, PipelineError> {
        let spec: WorkflowSpec = serde_json::from_str(json)
            .map_err(|e| PipelineError::Validation(format!("workflow JSON: {}", e)))?;
        self.build_workflow(&spec)
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("kinds", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn node(spec: &NodeSpec, step: Step) -> Node {
    Node::new(
        spec.node_type,
        spec.name.clone(),
        spec.parameters.clone(),
        step,
    )
}

fn required<'a>(spec: &'a NodeSpec, key: &str) -> Result<&'a str, PipelineError> {
    spec.parameters
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| {
            PipelineError::Validation(format!(
                "node '{}' ({}) requires parameter '{}'",
                spec.name, spec.kind, key
            ))
        })
}
