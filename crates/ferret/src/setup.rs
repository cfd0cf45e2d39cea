//! Wiring shared by the subcommands.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Duration;
use ferret_backend::{
    BackendConfig, BoundedCache, Capabilities, LogQueue, NoopTelemetry, Telemetry, TokenAuth,
    TracingTelemetry,
};
use ferret_pipeline::{NodeRegistry, NodeSpec, NodeType, Workflow, WorkflowSpec};
use ferret_publish::Publishers;
use ferret_scheduler::{ClaimEngine, SqliteStore};
use miette::{IntoDiagnostic, Result};
use tracing::{info, warn};

pub const DEFAULT_STALE_AFTER_SECS: u64 = 900;

/// Open the item database and wrap it in a claim engine.
pub fn open_engine(
    database: &Path,
    stale_after_secs: u64,
    store_timeout_secs: u64,
) -> Result<ClaimEngine<SqliteStore>> {
    let store = SqliteStore::open(database).map_err(|e| miette::miette!("{}", e))?;
    let stale_after = i64::try_from(stale_after_secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| miette::miette!("stale-after out of range: {}", stale_after_secs))?;

    let mut engine = ClaimEngine::new(Arc::new(store)).with_stale_after(stale_after);
    if store_timeout_secs > 0 {
        engine = engine.with_store_timeout(std::time::Duration::from_secs(store_timeout_secs));
    }
    Ok(engine)
}

/// Split a `subject:sha256hex` entry.
pub fn parse_auth_hash(entry: &str) -> Result<(String, String)> {
    let (subject, hash) = entry
        .split_once(':')
        .ok_or_else(|| miette::miette!("auth hash '{}' is not subject:hash", entry))?;
    let (subject, hash) = (subject.trim(), hash.trim());
    if subject.is_empty() || hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(miette::miette!(
            "auth hash '{}' needs a subject and a 64-digit hex SHA-256",
            entry
        ));
    }
    Ok((subject.to_string(), hash.to_ascii_lowercase()))
}

/// Build the capability set.
///
/// The cache is in-process and bounded; queue messages, and telemetry when
/// enabled, go to the log.
/// `auth_hashes` are `subject:hash` entries accepted by the auth step.
pub fn capabilities(config: &BackendConfig, auth_hashes: &[String]) -> Result<Capabilities> {
    if config.queue_url.is_some() {
        warn!(
            queue_url = ?config.queue_url,
            "external queue not supported, events go to the log"
        );
    }

    let auth = TokenAuth::new(config.token_bytes);
    for entry in auth_hashes {
        let (subject, hash) = parse_auth_hash(entry)?;
        auth.insert_hash(hash, subject);
    }

    let telemetry: Arc<dyn Telemetry> = if config.telemetry_enabled {
        Arc::new(TracingTelemetry::new(config.service_name.clone()))
    } else {
        Arc::new(NoopTelemetry)
    };

    info!(
        cache_capacity = config.cache_capacity,
        cache_ttl_secs = config.cache_ttl.as_secs(),
        topic = %config.post_events_topic,
        telemetry = config.telemetry_enabled,
        callers = auth.len(),
        "backends ready"
    );

    Ok(Capabilities::new(
        Arc::new(BoundedCache::new(config.cache_capacity, config.cache_ttl)),
        Arc::new(LogQueue),
        telemetry,
        Arc::new(auth),
    ))
}

/// The workflow used when no workflow file is given: publish the post,
/// announce it on `topic`, count it. With `require_auth` the caller token
/// is checked first.
pub fn default_workflow_spec(require_auth: bool, topic: &str) -> WorkflowSpec {
    let mut nodes = Vec::new();
    if require_auth {
        nodes.push(node(NodeType::Action, "verify", "auth", &[]));
    }
    nodes.push(node(NodeType::Action, "post", "publish", &[]));
    nodes.push(node(
        NodeType::Trigger,
        "announce",
        "emit",
        &[("topic", topic), ("event", "schedule.published")],
    ));
    nodes.push(node(
        NodeType::Action,
        "count",
        "track",
        &[("event", "post.published")],
    ));

    WorkflowSpec {
        name: "publish-post".to_string(),
        nodes,
    }
}

fn node(node_type: NodeType, name: &str, kind: &str, params: &[(&str, &str)]) -> NodeSpec {
    NodeSpec {
        node_type,
        name: name.to_string(),
        kind: kind.to_string(),
        parameters: params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
    }
}

/// Load the workflow from `path`, or fall back to the default one.
pub fn load_workflow(
    path: Option<&Path>,
    publishers: Publishers,
    require_auth: bool,
    topic: &str,
) -> Result<Workflow> {
    let registry = NodeRegistry::with_builtins(publishers);
    let workflow = match path {
        Some(path) => {
            let json = std::fs::read_to_string(path).into_diagnostic()?;
            registry.load_workflow(&json)
        }
        None => registry.build_workflow(&default_workflow_spec(require_auth, topic)),
    }
    .map_err(|e| miette::miette!("{}", e))?;

    info!(
        workflow = %workflow.name(),
        nodes = workflow.nodes().len(),
        "workflow loaded"
    );
    Ok(workflow)
}
