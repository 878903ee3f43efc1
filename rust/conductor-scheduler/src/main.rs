#[macro_use]
extern crate tracing;

use anyhow::Result;
use clap::Parser;
use conductor_api::Client;
use conductor_common::tracing::initialize_tracing;
use conductor_queue::AmqpQueueClient;
use conductor_scheduler::{
    cli::{Cli, Command},
    commands, SchedulerError,
};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    initialize_tracing(None);

    let args = Cli::parse();

    match args.command {
        Command::Serve {
            api,
            amqp,
            scheduler,
        } => {
            let client = Client::new(
                &api.api_address,
                &api.api_token,
                api.api_ignore_cert_warnings,
            )?;
            let queues = Arc::new(AmqpQueueClient::new(amqp.to_config())?);

            let cancel = CancellationToken::new();
            tokio::spawn(cancel_on_shutdown_signal(cancel.clone()));

            match commands::serve(scheduler.to_config(), client.into(), queues, &cancel).await {
                Err(SchedulerError::Cancelled) if cancel.is_cancelled() => (),
                result => result?,
            }
        }
        Command::Probe { amqp, timeout } => {
            let queues = AmqpQueueClient::new(amqp.to_config())?;
            let result = commands::probe(&queues, Duration::from_secs(timeout)).await;
            if let Err(error) = conductor_queue::ReaderFactory::close(&queues).await {
                debug!("Could not close the broker connection: {}", error);
            }
            result?;
            info!("Broker is healthy");
        }
    };

    Ok(())
}

async fn cancel_on_shutdown_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!("Could not listen for SIGTERM: {}", error);
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(error) = result {
                warn!("Could not listen for Ctrl-C: {}", error);
                return;
            }
        }
        _ = terminate => (),
    };

    info!("Shutdown requested");
    cancel.cancel();
}
