//! An in-process broker implementing [ReaderFactory] and [WriterFactory],
//! intended for tests. It keeps a per-queue record of everything written,
//! acknowledged and opened so that assertions can be made about how a
//! consumer used the queue.

use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    Mutex as AsyncMutex,
};
use tokio_util::sync::CancellationToken;

use crate::{Message, QueueError, Reader, ReaderFactory, WriteOptions, Writer, WriterFactory};

/// Everything that has happened to a single in-memory queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueRecord {
    /// Payloads written, paired with whether they were marked durable
    pub written: Vec<(String, bool)>,
    /// Payloads acknowledged by a consumer, in order
    pub acknowledged: Vec<String>,
    /// Payloads delivered to a consumer but not yet acknowledged
    pub in_flight: usize,
    pub readers_opened: usize,
    pub readers_closed: usize,
    pub writers_opened: usize,
}

struct MemoryQueue {
    tx: UnboundedSender<String>,
    rx: Arc<AsyncMutex<UnboundedReceiver<String>>>,
    pending: usize,
    failing_reads: usize,
    record: QueueRecord,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        let (tx, rx) = unbounded_channel();
        MemoryQueue {
            tx,
            rx: Arc::new(AsyncMutex::new(rx)),
            pending: 0,
            failing_reads: 0,
            record: QueueRecord::default(),
        }
    }
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, MemoryQueue>,
    refuse_links: bool,
}

#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue a message as though some other producer had written it.
    pub fn push(&self, queue_name: &str, payload: &str) {
        let mut state = self.lock();
        let queue = state.queues.entry(queue_name.to_owned()).or_default();
        queue.pending += 1;
        let _ = queue.tx.send(payload.to_owned());
    }

    /// Make the next `count` reads on `queue_name` fail.
    pub fn fail_reads(&self, queue_name: &str, count: usize) {
        let mut state = self.lock();
        state
            .queues
            .entry(queue_name.to_owned())
            .or_default()
            .failing_reads += count;
    }

    /// While set, every attempt to open a reader or writer fails.
    pub fn refuse_links(&self, refuse: bool) {
        self.lock().refuse_links = refuse;
    }

    /// Messages waiting on `queue_name` that have not been delivered yet.
    pub fn pending(&self, queue_name: &str) -> usize {
        self.lock()
            .queues
            .get(queue_name)
            .map(|queue| queue.pending)
            .unwrap_or_default()
    }

    pub fn record(&self, queue_name: &str) -> QueueRecord {
        self.lock()
            .queues
            .get(queue_name)
            .map(|queue| queue.record.clone())
            .unwrap_or_default()
    }

    fn open(&self, queue_name: &str, reading: bool) -> Result<(), QueueError> {
        let mut state = self.lock();
        if state.refuse_links {
            return Err(QueueError::Link {
                queue: queue_name.to_owned(),
                message: "links are being refused".into(),
            });
        }
        let queue = state.queues.entry(queue_name.to_owned()).or_default();
        if reading {
            queue.record.readers_opened += 1;
        } else {
            queue.record.writers_opened += 1;
        }
        Ok(())
    }

    fn receiver(&self, queue_name: &str) -> Arc<AsyncMutex<UnboundedReceiver<String>>> {
        self.lock()
            .queues
            .entry(queue_name.to_owned())
            .or_default()
            .rx
            .clone()
    }

    fn take_read_failure(&self, queue_name: &str) -> bool {
        let mut state = self.lock();
        let queue = state.queues.entry(queue_name.to_owned()).or_default();
        if queue.failing_reads > 0 {
            queue.failing_reads -= 1;
            true
        } else {
            false
        }
    }

    fn mark_delivered(&self, queue_name: &str) {
        let mut state = self.lock();
        let queue = state.queues.entry(queue_name.to_owned()).or_default();
        queue.pending = queue.pending.saturating_sub(1);
        queue.record.in_flight += 1;
    }

    fn mark_acknowledged(&self, queue_name: &str, payload: String) {
        let mut state = self.lock();
        let queue = state.queues.entry(queue_name.to_owned()).or_default();
        queue.record.in_flight = queue.record.in_flight.saturating_sub(1);
        queue.record.acknowledged.push(payload);
    }

    fn mark_reader_closed(&self, queue_name: &str) {
        let mut state = self.lock();
        let queue = state.queues.entry(queue_name.to_owned()).or_default();
        queue.record.readers_closed += 1;
    }

    fn write(&self, queue_name: &str, payload: &str, durable: bool) {
        let mut state = self.lock();
        let queue = state.queues.entry(queue_name.to_owned()).or_default();
        queue.record.written.push((payload.to_owned(), durable));
        queue.pending += 1;
        let _ = queue.tx.send(payload.to_owned());
    }
}

#[async_trait]
impl ReaderFactory for MemoryBroker {
    async fn new_reader(&self, queue_name: &str) -> Result<Box<dyn Reader>, QueueError> {
        self.open(queue_name, true)?;
        Ok(Box::new(MemoryReader {
            broker: self.clone(),
            queue: queue_name.to_owned(),
            rx: self.receiver(queue_name),
            closed: false,
        }))
    }

    async fn close(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[async_trait]
impl WriterFactory for MemoryBroker {
    async fn new_writer(&self, queue_name: &str) -> Result<Box<dyn Writer>, QueueError> {
        self.open(queue_name, false)?;
        Ok(Box::new(MemoryWriter {
            broker: self.clone(),
            queue: queue_name.to_owned(),
            closed: false,
        }))
    }

    async fn close(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

pub struct MemoryReader {
    broker: MemoryBroker,
    queue: String,
    rx: Arc<AsyncMutex<UnboundedReceiver<String>>>,
    closed: bool,
}

#[async_trait]
impl Reader for MemoryReader {
    async fn read(&mut self, cancel: &CancellationToken) -> Result<Message, QueueError> {
        if self.closed {
            return Err(QueueError::Closed("reader"));
        }

        if self.broker.take_read_failure(&self.queue) {
            return Err(QueueError::Read {
                queue: self.queue.clone(),
                message: "simulated read failure".into(),
            });
        }

        let mut rx = tokio::select! {
            _ = cancel.cancelled() => return Err(QueueError::Cancelled),
            rx = self.rx.lock() => rx,
        };

        let payload = tokio::select! {
            _ = cancel.cancelled() => return Err(QueueError::Cancelled),
            payload = rx.recv() => payload.ok_or_else(|| QueueError::Read {
                queue: self.queue.clone(),
                message: "the queue was dropped".into(),
            })?,
        };

        self.broker.mark_delivered(&self.queue);

        let broker = self.broker.clone();
        let queue = self.queue.clone();
        let acknowledged = payload.clone();

        Ok(Message::new(payload, move || async move {
            broker.mark_acknowledged(&queue, acknowledged);
            Ok(())
        }))
    }

    async fn close(&mut self) -> Result<(), QueueError> {
        if !self.closed {
            self.closed = true;
            self.broker.mark_reader_closed(&self.queue);
        }
        Ok(())
    }
}

pub struct MemoryWriter {
    broker: MemoryBroker,
    queue: String,
    closed: bool,
}

#[async_trait]
impl Writer for MemoryWriter {
    async fn write(
        &mut self,
        cancel: &CancellationToken,
        payload: &str,
        options: &WriteOptions,
    ) -> Result<(), QueueError> {
        if self.closed {
            return Err(QueueError::Closed("writer"));
        }
        if cancel.is_cancelled() {
            return Err(QueueError::Cancelled);
        }
        self.broker.write(&self.queue, payload, options.durable);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), QueueError> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::time::Duration;

    #[tokio::test]
    async fn it_delivers_written_messages_to_a_reader() -> Result<()> {
        let broker = MemoryBroker::default();
        let cancel = CancellationToken::new();

        let mut writer = broker.new_writer("healthz").await?;
        writer
            .write(&cancel, "ping", &WriteOptions { durable: true })
            .await?;

        let mut reader = broker.new_reader("healthz").await?;
        let message = reader.read(&cancel).await?;
        assert_eq!(message.payload(), "ping");
        assert_eq!(broker.record("healthz").in_flight, 1);

        message.ack().await?;

        let record = broker.record("healthz");
        assert_eq!(record.written, vec![("ping".to_string(), true)]);
        assert_eq!(record.acknowledged, vec!["ping".to_string()]);
        assert_eq!(record.in_flight, 0);
        assert_eq!(record.readers_opened, 1);
        assert_eq!(record.writers_opened, 1);
        Ok(())
    }

    #[tokio::test]
    async fn it_shares_a_queue_between_readers_without_duplicating_deliveries() -> Result<()> {
        let broker = MemoryBroker::default();
        let cancel = CancellationToken::new();
        broker.push("jobs.p", "e1:a");
        broker.push("jobs.p", "e2:b");

        let mut first = broker.new_reader("jobs.p").await?;
        let mut second = broker.new_reader("jobs.p").await?;

        let a = first.read(&cancel).await?;
        let b = second.read(&cancel).await?;
        assert_eq!(a.payload(), "e1:a");
        assert_eq!(b.payload(), "e2:b");
        assert_eq!(broker.pending("jobs.p"), 0);
        Ok(())
    }

    #[tokio::test]
    async fn it_can_simulate_failures() -> Result<()> {
        let broker = MemoryBroker::default();
        let cancel = CancellationToken::new();

        broker.refuse_links(true);
        assert!(broker.new_reader("workers.p").await.is_err());
        broker.refuse_links(false);

        broker.fail_reads("workers.p", 1);
        broker.push("workers.p", "e1");
        let mut reader = broker.new_reader("workers.p").await?;
        assert!(matches!(
            reader.read(&cancel).await,
            Err(QueueError::Read { .. })
        ));
        assert_eq!(reader.read(&cancel).await?.payload(), "e1");
        Ok(())
    }

    #[tokio::test]
    async fn it_stops_waiting_when_cancelled() -> Result<()> {
        let broker = MemoryBroker::default();
        let cancel = CancellationToken::new();
        let mut reader = broker.new_reader("workers.empty").await?;

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel();
            })
        };

        assert!(reader.read(&cancel).await.unwrap_err().is_cancelled());
        canceller.await?;
        Ok(())
    }
}
