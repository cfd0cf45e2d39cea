//! Node pipelines for Ferret.
//!
//! A [`Workflow`] is an ordered list of [`Node`]s, each running one [`Step`]
//! against a shared [`RunContext`]. Runs stop at the first failing node.
//! The [`Dispatcher`] runs claimed items through a workflow and records the
//! outcome with the claim engine: done, requeued with backoff, or failed.

mod claims;
mod dispatcher;
mod error;
mod node;
pub mod publish_log;
mod registry;
pub mod steps;
mod workflow;

pub use claims::{
    CLAIM_EVENT, CLAIM_SECONDS_METRIC, CLAIMED_TOTAL_METRIC, claim_and_report, claim_event,
};
pub use dispatcher::{DispatchOutcome, Dispatcher, PollSummary};
pub use error::{DispatchError, PipelineError, PublishLogError, StepError};
pub use node::{Execute, Node, NodeSpec, NodeType, RunContext, Step};
pub use publish_log::{
    DEFAULT_PUBLISH_LOG, JsonlPublishLog, PublishLog, PublishedRecord, read_published,
    restore_publications,
};
pub use registry::{NodeConstructor, NodeRegistry, WorkflowSpec};
pub use workflow::{RunReport, Workflow};
