//! Workflows: ordered node sequences run to completion.

use std::collections::HashSet;

use ferret_backend::{Capabilities, Identity};
use ferret_publish::Publication;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{Node, PipelineError, RunContext};

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    /// Names of the nodes that ran, in order.
    pub executed: Vec<String>,
    pub identity: Option<Identity>,
    pub publication: Option<Publication>,
}

/// A named, immutable sequence of nodes.
#[derive(Debug, Clone)]
pub struct Workflow {
    name: String,
    nodes: Vec<Node>,
}

impl Workflow {
    /// Build a workflow from its complete node list.
    ///
    /// Node names must be unique within the workflow.
    pub fn new(name: impl Into<String>, nodes: Vec<Node>) -> Result<Self, PipelineError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PipelineError::Validation("workflow has no name".to_string()));
        }
        if nodes.is_empty() {
            return Err(PipelineError::Validation(format!(
                "workflow '{}' has no nodes",
                name
            )));
        }
        let mut seen = HashSet::new();
        for node in &nodes {
            if !seen.insert(node.name()) {
                return Err(PipelineError::Validation(format!(
                    "workflow '{}' has duplicate node '{}'",
                    name,
                    node.name()
                )));
            }
        }
        Ok(Self { name, nodes })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Run every node in order for one unit of work.
    ///
    /// The first failing node ends the run; later nodes do not execute and
    /// earlier side effects are not undone. With a deadline, a node that
    /// would start after it, or is still running when it passes, fails the
    /// run with `DeadlineExceeded`.
    #[tracing::instrument(skip(self, payload, capabilities, deadline), fields(workflow = %self.name))]
    pub async fn run(
        &self,
        run_id: &str,
        payload: serde_json::Value,
        capabilities: &Capabilities,
        deadline: Option<Instant>,
    ) -> Result<RunReport, PipelineError> {
        let mut ctx = RunContext::new(run_id, payload, capabilities.clone());
        let mut executed = Vec::with_capacity(self.nodes.len());

        for node in &self.nodes {
            let result = match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Err(deadline_exceeded(node));
                    }
                    tokio::time::timeout_at(deadline, node.execute(&mut ctx))
                        .await
                        .map_err(|_| deadline_exceeded(node))?
                }
                None => node.execute(&mut ctx).await,
            };

            executed.push(node.name().to_string());
            if let Err(source) = result {
                warn!(
                    node = %node.name(),
                    retryable = source.retryable,
                    error = %source,
                    "node failed, aborting run"
                );
                return Err(PipelineError::StepFailed {
                    node: node.name().to_string(),
                    source,
                });
            }
            debug!(node = %node.name(), "node completed");
        }

        Ok(RunReport {
            run_id: ctx.run_id,
            executed,
            identity: ctx.identity,
            publication: ctx.publication,
        })
    }
}

fn deadline_exceeded(node: &Node) -> PipelineError {
    warn!(node = %node.name(), "run deadline exceeded");
    PipelineError::DeadlineExceeded {
        node: node.name().to_string(),
    }
}
