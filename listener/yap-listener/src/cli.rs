//! Command-line interface for the yap listener

use clap::Parser;

/// The yap listener CLI
#[rustfmt::skip]
#[derive(Parser)]
#[clap(about = "Yap listener")]
pub struct Cli {
    // ------------
    // | Database |
    // ------------

    /// The database URL
    #[clap(long, env = "DATABASE_URL")]
    pub database_url: String,

    // --------------
    // | Blockchain |
    // --------------

    /// The path to the per-chain JSON config file
    #[clap(long, env = "CHAIN_CONFIG_PATH")]
    pub chain_config_path: String,

    // -----------
    // | AWS SQS |
    // -----------

    /// The URL of the AWS SQS task queue.
    ///
    /// If not provided, an in-memory queue is used; suitable only for local
    /// development, as queued tasks do not survive a restart.
    #[clap(long, env = "SQS_QUEUE_URL")]
    pub sqs_queue_url: Option<String>,
    /// The AWS region in which the SQS queue is located
    #[clap(long, env = "SQS_REGION", default_value = "us-east-2")]
    pub sqs_region: String,

    // -------------
    // | Upstreams |
    // -------------

    /// The yap API base URL
    #[clap(long, env = "YAP_API_URL")]
    pub yap_api_url: String,
    /// The yap API key.
    ///
    /// If not provided, requests to the yap API are unauthenticated.
    #[clap(long, env = "YAP_API_KEY")]
    pub yap_api_key: Option<String>,
    /// The social graph API base URL
    #[clap(long, env = "SOCIAL_API_URL")]
    pub social_api_url: String,
    /// The name service base URL
    #[clap(long, env = "NAME_SERVICE_URL")]
    pub name_service_url: String,

    // ----------
    // | Worker |
    // ----------

    /// The number of task groups the worker processes concurrently
    #[clap(long, env = "WORKER_CONCURRENCY", default_value = "4")]
    pub worker_concurrency: usize,

    // ----------
    // | Alerts |
    // ----------

    /// The webhook URL operator alerts are posted to.
    ///
    /// If not provided, alerts are written to the log.
    #[clap(long, env = "ALERT_WEBHOOK_URL")]
    pub alert_webhook_url: Option<String>,
}
