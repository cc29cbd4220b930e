//! The yap listener, responsible for ingesting contract event logs across
//! chains and deriving per-yapper activity clusters

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::needless_pass_by_ref_mut)]
#![deny(clippy::missing_docs_in_private_items)]

use std::{error::Error, sync::Arc};

use clap::Parser;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use yap_listener::{
    alert::{AlertManager, AlertSink, LogAlertSink, WebhookAlertSink},
    cli::Cli,
    db::client::DbClient,
    enrichment::{DynEnricher, HttpEnricher},
    lifecycle::ListenerManager,
    queue::{DynTaskQueue, ListenerQueue, mock_task_queue::MockTaskQueue, sqs::SqsTaskQueue},
    registry::ChainRegistry,
    worker::TaskWorker,
};

// --------
// | Main |
// --------

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    setup_logging();
    let cli = Cli::parse();

    let registry = ChainRegistry::from_file(&cli.chain_config_path)?;
    let db = DbClient::new(&cli.database_url).await?;
    let queue = build_queue(&cli).await;
    let alerts = Arc::new(AlertManager::new(build_alert_sink(&cli)));

    let enricher: DynEnricher = Arc::new(HttpEnricher::new(
        cli.yap_api_url.clone(),
        cli.yap_api_key.clone(),
        cli.social_api_url.clone(),
        cli.name_service_url.clone(),
    )?);

    let manager = ListenerManager::new(registry, db.clone(), queue.clone(), alerts);
    manager.initialize_from_persisted_state().await?;

    let worker = Arc::new(TaskWorker::new(
        queue,
        Arc::new(db),
        enricher,
        manager.clone(),
        cli.worker_concurrency,
    ));

    let mut tasks = JoinSet::new();
    tasks.spawn(worker.run());
    tasks.spawn(manager.clone().run_health_loop());

    tokio::select! {
        joined = tasks.join_next() => match joined {
            Some(Err(e)) => error!("error joining listener task: {e}"),
            Some(Ok(())) => warn!("listener task exited"),
            None => warn!("no listener tasks spawned"),
        },
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
    }

    manager.stop_all().await;
    Ok(())
}

// -----------
// | Helpers |
// -----------

/// Configure the logging subscriber
fn setup_logging() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::builder().with_default_directive(LevelFilter::INFO.into()).from_env_lossy(),
        )
        .with(fmt::layer().with_file(true).with_line_number(true).json().flatten_event(true))
        .init();
}

/// Build the task queue, falling back to an in-memory queue when no SQS
/// queue is configured
async fn build_queue(cli: &Cli) -> ListenerQueue {
    match &cli.sqs_queue_url {
        Some(url) => DynTaskQueue::new(SqsTaskQueue::new(cli.sqs_region.clone(), url.clone()).await),
        None => {
            warn!("no SQS queue configured, queued tasks will not survive a restart");
            DynTaskQueue::new(MockTaskQueue::default())
        },
    }
}

/// Build the alert sink, falling back to the process log when no webhook is
/// configured
fn build_alert_sink(cli: &Cli) -> Arc<dyn AlertSink> {
    match &cli.alert_webhook_url {
        Some(url) => Arc::new(WebhookAlertSink::new(url.clone())),
        None => Arc::new(LogAlertSink),
    }
}
