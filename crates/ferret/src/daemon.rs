//! Daemon mode: sweep, claim and dispatch on every trigger tick.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use ferret_backend::BackendConfig;
use ferret_pipeline::{Dispatcher, JsonlPublishLog, restore_publications};
use ferret_publish::{DEFAULT_PACING_WINDOW, HttpPublisher, Pacer, PublishConfig};
use ferret_scheduler::{DueItemStore, Trigger};
use miette::Result;
use tracing::{error, info, warn};

use crate::setup;

/// Daemon settings, resolved from flags and environment.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub database: PathBuf,
    pub publish_log: PathBuf,
    pub workflow: Option<PathBuf>,
    pub require_auth: bool,
    pub auth_hashes: Vec<String>,
    pub poll_interval: Duration,
    pub window: chrono::Duration,
    pub limit: usize,
    pub stale_after_secs: u64,
    pub store_timeout_secs: u64,
    pub run_timeout: Option<Duration>,
}

/// Run until ctrl-c.
pub async fn run(config: DaemonConfig) -> Result<()> {
    let engine = setup::open_engine(
        &config.database,
        config.stale_after_secs,
        config.store_timeout_secs,
    )?;

    let backend_config = BackendConfig::from_env();
    let capabilities = setup::capabilities(&backend_config, &config.auth_hashes)?;
    restore_publications(&config.publish_log, capabilities.cache.as_ref())
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    let publish_config = PublishConfig::from_env();
    if publish_config.token.is_none() {
        warn!("no publish token configured, publishing will fail as unauthorized");
    }
    let pacer = Arc::new(Pacer::new(&publish_config.rates, DEFAULT_PACING_WINDOW));
    let publishers = HttpPublisher::new(publish_config)
        .map_err(|e| miette::miette!("{}", e))?
        .into_publishers()
        .paced(pacer);

    let workflow = setup::load_workflow(
        config.workflow.as_deref(),
        publishers,
        config.require_auth,
        &backend_config.post_events_topic,
    )?;

    let publish_log = JsonlPublishLog::new(&config.publish_log);
    let publish_log_path = publish_log.path().display().to_string();
    let mut dispatcher = Dispatcher::new(
        Arc::new(engine),
        Arc::new(workflow),
        capabilities,
        Arc::new(publish_log),
    )
    .with_claim_events(backend_config.schedule_events_topic.clone());
    if let Some(timeout) = config.run_timeout {
        dispatcher = dispatcher.with_run_timeout(timeout);
    }
    let dispatcher = Arc::new(dispatcher);

    info!(
        database = %config.database.display(),
        publish_log = %publish_log_path,
        poll_interval_secs = config.poll_interval.as_secs(),
        window_secs = config.window.num_seconds(),
        limit = config.limit,
        "daemon starting"
    );

    let window = config.window;
    let limit = config.limit;
    let retry_budget = config.poll_interval;
    let trigger = Trigger::start(config.poll_interval, move || {
        let dispatcher = Arc::clone(&dispatcher);
        async move { poll(&dispatcher, window, limit, retry_budget).await }
    })
    .map_err(|e| miette::miette!("{}", e))?;

    tokio::signal::ctrl_c().await.ok();
    info!("received shutdown signal");
    trigger.cancel().await;
    info!("daemon shut down gracefully");
    Ok(())
}

/// One poll cycle. Retryable store failures are retried with exponential
/// backoff for at most `budget`; anything left over waits for the next tick.
async fn poll<S: DueItemStore + ?Sized>(
    dispatcher: &Dispatcher<S>,
    window: chrono::Duration,
    limit: usize,
    budget: Duration,
) {
    let mut backoff = ExponentialBackoff {
        initial_interval: Duration::from_millis(500),
        max_interval: Duration::from_secs(30),
        max_elapsed_time: Some(budget),
        ..Default::default()
    };

    loop {
        match dispatcher.poll_once(window, limit).await {
            Ok(_) => return,
            Err(e) if e.is_retryable() => match backoff.next_backoff() {
                Some(wait) => {
                    warn!(
                        error = %e,
                        wait_ms = wait.as_millis() as u64,
                        "poll failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                None => {
                    error!(error = %e, "poll failed, giving up until next tick");
                    return;
                }
            },
            Err(e) => {
                error!(error = %e, "poll failed");
                return;
            }
        }
    }
}
