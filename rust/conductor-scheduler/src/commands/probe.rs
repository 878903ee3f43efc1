use anyhow::{anyhow, Result};
use conductor_queue::{ReaderFactory, WriteOptions, WriterFactory, HEALTHZ_QUEUE};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const PROBE_PAYLOAD: &str = "ping";

/// Round-trip one message through the broker's health queue: write it, read
/// a message back within `timeout` and acknowledge it.
pub async fn probe<Q>(queues: &Q, timeout: Duration) -> Result<()>
where
    Q: ReaderFactory + WriterFactory,
{
    let cancel = CancellationToken::new();

    let mut writer = queues.new_writer(HEALTHZ_QUEUE).await?;
    let written = writer
        .write(&cancel, PROBE_PAYLOAD, &WriteOptions { durable: false })
        .await;
    if let Err(error) = writer.close().await {
        debug!("Could not close probe writer: {}", error);
    }
    written?;

    let mut reader = queues.new_reader(HEALTHZ_QUEUE).await?;

    let read = tokio::time::timeout(timeout, reader.read(&cancel)).await;

    let result = match read {
        Ok(Ok(message)) => {
            debug!("Probe received {:?}", message.payload());
            message.ack().await.map_err(anyhow::Error::from)
        }
        Ok(Err(error)) => Err(error.into()),
        Err(_) => Err(anyhow!(
            "No message came back from {} within {:?}",
            HEALTHZ_QUEUE,
            timeout
        )),
    };

    if let Err(error) = reader.close().await {
        debug!("Could not close probe reader: {}", error);
    }

    result
}
