use clap::{Args, Parser, Subcommand};
use conductor_queue::AmqpConfig;
use std::time::Duration;
use url::Url;

use crate::SchedulerConfig;

#[derive(Debug, Parser)]
#[clap(name = "conductor")]
#[clap(about = "Admits pending workers and jobs as substrate capacity allows", long_about = None)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the scheduler until interrupted or until it hits a fatal error
    Serve {
        #[clap(flatten)]
        api: ApiArgs,

        #[clap(flatten)]
        amqp: AmqpArgs,

        #[clap(flatten)]
        scheduler: SchedulerArgs,
    },

    /// Check that the broker accepts and delivers messages
    Probe {
        #[clap(flatten)]
        amqp: AmqpArgs,

        /// Seconds to wait for the probe message to come back
        #[clap(long, env = "PROBE_TIMEOUT", value_parser, default_value = "10")]
        timeout: u64,
    },
}

#[derive(Debug, Args)]
pub struct ApiArgs {
    /// Base URL of the API that owns event, project and substrate state
    #[clap(long, env = "API_ADDRESS", value_parser)]
    pub api_address: Url,

    /// Bearer token that the scheduler authenticates with
    #[clap(long, env = "API_TOKEN", value_parser, hide_env_values = true)]
    pub api_token: String,

    /// Skip TLS certificate verification when talking to the API
    #[clap(long, env = "API_IGNORE_CERT_WARNINGS")]
    pub api_ignore_cert_warnings: bool,
}

#[derive(Debug, Args)]
pub struct AmqpArgs {
    /// Address of the AMQP broker, e.g. amqp://localhost:5672
    #[clap(long, env = "AMQP_ADDRESS", value_parser)]
    pub amqp_address: String,

    #[clap(long, env = "AMQP_USERNAME", value_parser)]
    pub amqp_username: Option<String>,

    #[clap(long, env = "AMQP_PASSWORD", value_parser, hide_env_values = true)]
    pub amqp_password: Option<String>,
}

impl AmqpArgs {
    pub fn to_config(&self) -> AmqpConfig {
        AmqpConfig::new(&self.amqp_address)
            .with_credentials(self.amqp_username.clone(), self.amqp_password.clone())
    }
}

#[derive(Debug, Args)]
pub struct SchedulerArgs {
    #[clap(long, env = "MAX_CONCURRENT_WORKERS", value_parser, default_value = "1")]
    pub max_concurrent_workers: u64,

    #[clap(long, env = "MAX_CONCURRENT_JOBS", value_parser, default_value = "3")]
    pub max_concurrent_jobs: u64,

    /// Seconds between reconciliations of the project list
    #[clap(long, env = "ADD_REMOVE_PROJECT_INTERVAL", value_parser, default_value = "30")]
    pub reconcile_interval: u64,

    /// Seconds to wait for tasks to stop during shutdown
    #[clap(long, env = "SHUTDOWN_GRACE", value_parser, default_value = "3")]
    pub shutdown_grace: u64,
}

impl SchedulerArgs {
    pub fn to_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent_workers: self.max_concurrent_workers,
            max_concurrent_jobs: self.max_concurrent_jobs,
            reconcile_interval: Duration::from_secs(self.reconcile_interval),
            shutdown_grace: Duration::from_secs(self.shutdown_grace),
            ..Default::default()
        }
    }
}
