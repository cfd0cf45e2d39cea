//! Nodes and the steps they execute.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use ferret_backend::{Capabilities, Identity};
use ferret_publish::Publication;
use serde::{Deserialize, Serialize};

use crate::StepError;
use crate::steps::{AuthGate, Emit, Publish, Track};

/// Category tag of a node. Descriptive only; dispatch is by [`Step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Trigger,
    Action,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trigger => f.write_str("trigger"),
            Self::Action => f.write_str("action"),
        }
    }
}

/// Serializable description of a node, built into a [`Node`] by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub name: String,
    /// Registered constructor to build this node with.
    pub kind: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// Per-run state shared by the steps of one workflow run.
#[derive(Debug)]
pub struct RunContext {
    /// Identifier of the unit of work (the claimed item id).
    pub run_id: String,
    pub payload: serde_json::Value,
    pub capabilities: Capabilities,
    /// Set by the auth step.
    pub identity: Option<Identity>,
    /// Set by the publish step.
    pub publication: Option<Publication>,
}

impl RunContext {
    pub fn new(
        run_id: impl Into<String>,
        payload: serde_json::Value,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            payload,
            capabilities,
            identity: None,
            publication: None,
        }
    }

    /// A string field of the payload.
    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(|v| v.as_str())
    }
}

/// Behavior of a custom step.
#[async_trait]
pub trait Execute: Send + Sync {
    async fn execute(&self, ctx: &mut RunContext) -> Result<(), StepError>;
}

/// The fixed set of step kinds a node can run.
#[derive(Clone)]
pub enum Step {
    Auth(AuthGate),
    Publish(Publish),
    Emit(Emit),
    Track(Track),
    Custom(Arc<dyn Execute>),
}

impl Step {
    pub async fn execute(&self, ctx: &mut RunContext) -> Result<(), StepError> {
        match self {
            Self::Auth(step) => step.execute(ctx).await,
            Self::Publish(step) => step.execute(ctx).await,
            Self::Emit(step) => step.execute(ctx).await,
            Self::Track(step) => step.execute(ctx).await,
            Self::Custom(step) => step.execute(ctx).await,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Publish(_) => "publish",
            Self::Emit(_) => "emit",
            Self::Track(_) => "track",
            Self::Custom(_) => "custom",
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth(step) => f.debug_tuple("Auth").field(step).finish(),
            Self::Publish(step) => f.debug_tuple("Publish").field(step).finish(),
            Self::Emit(step) => f.debug_tuple("Emit").field(step).finish(),
            Self::Track(step) => f.debug_tuple("Track").field(step).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// One named step of a workflow.
#[derive(Debug, Clone)]
pub struct Node {
    node_type: NodeType,
    name: String,
    parameters: BTreeMap<String, String>,
    step: Step,
}

impl Node {
    pub fn new(
        node_type: NodeType,
        name: impl Into<String>,
        parameters: BTreeMap<String, String>,
        step: Step,
    ) -> Self {
        Self {
            node_type,
            name: name.into(),
            parameters,
            step,
        }
    }

    /// A node with no parameters.
    pub fn action(name: impl Into<String>, step: Step) -> Self {
        Self::new(NodeType::Action, name, BTreeMap::new(), step)
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    pub fn step(&self) -> &Step {
        &self.step
    }

    pub async fn execute(&self, ctx: &mut RunContext) -> Result<(), StepError> {
        self.step.execute(ctx).await
    }
}
