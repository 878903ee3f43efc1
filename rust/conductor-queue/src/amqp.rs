use async_trait::async_trait;
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        ConfirmSelectOptions, QueueDeclareOptions,
    },
    publisher_confirm::Confirmation,
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer,
};
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    session::{LinkKind, SessionManager, Transport},
    Message, QueueError, Reader, ReaderFactory, WriteOptions, Writer, WriterFactory,
};

/// AMQP reply code for a normal, requested shutdown.
const REPLY_SUCCESS: u16 = 200;

/// Persistent delivery mode as defined by AMQP 0-9-1.
const DELIVERY_MODE_PERSISTENT: u8 = 2;

#[derive(Debug, Clone)]
pub struct AmqpConfig {
    pub address: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub max_connect_attempts: u32,
    pub max_connect_backoff: Duration,
}

impl AmqpConfig {
    pub fn new(address: &str) -> Self {
        AmqpConfig {
            address: address.to_owned(),
            username: None,
            password: None,
            max_connect_attempts: 10,
            max_connect_backoff: Duration::from_secs(10),
        }
    }

    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    /// The broker URI with any configured credentials folded in.
    fn uri(&self) -> Result<String, QueueError> {
        let mut url =
            Url::parse(&self.address).map_err(|error| QueueError::Address(error.to_string()))?;

        if let Some(username) = &self.username {
            url.set_username(username).map_err(|_| {
                QueueError::Address(format!("{} cannot carry a username", self.address))
            })?;
        }
        if let Some(password) = &self.password {
            url.set_password(Some(password)).map_err(|_| {
                QueueError::Address(format!("{} cannot carry a password", self.address))
            })?;
        }

        Ok(url.to_string())
    }
}

enum Link {
    Receiver(Channel, Consumer),
    Sender(Channel),
}

struct AmqpTransport {
    uri: String,
    address: String,
    link_counter: AtomicU64,
}

#[async_trait]
impl Transport for AmqpTransport {
    type Connection = Connection;
    type Session = Channel;
    type Link = Link;

    async fn dial(&self) -> anyhow::Result<Connection> {
        let connection = Connection::connect(&self.uri, ConnectionProperties::default()).await?;
        info!("Connected to AMQP broker at {}", self.address);
        Ok(connection)
    }

    async fn hang_up(&self, connection: Connection) -> anyhow::Result<()> {
        Ok(connection.close(REPLY_SUCCESS, "closing").await?)
    }

    async fn open_session(&self, connection: &Connection) -> anyhow::Result<Channel> {
        Ok(connection.create_channel().await?)
    }

    async fn attach(
        &self,
        channel: &Channel,
        queue_name: &str,
        kind: LinkKind,
    ) -> anyhow::Result<Link> {
        channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        match kind {
            LinkKind::Receive => {
                channel.basic_qos(1, BasicQosOptions::default()).await?;
                let tag = format!(
                    "conductor-{}-{}",
                    queue_name,
                    self.link_counter.fetch_add(1, Ordering::Relaxed)
                );
                let consumer = channel
                    .basic_consume(
                        queue_name,
                        &tag,
                        BasicConsumeOptions::default(),
                        FieldTable::default(),
                    )
                    .await?;
                Ok(Link::Receiver(channel.clone(), consumer))
            }
            LinkKind::Send => {
                channel
                    .confirm_select(ConfirmSelectOptions::default())
                    .await?;
                Ok(Link::Sender(channel.clone()))
            }
        }
    }

    async fn discard_session(&self, channel: Channel) {
        if let Err(error) = channel.close(REPLY_SUCCESS, "link failed").await {
            debug!("Ignoring error closing session: {}", error);
        }
    }
}

/// Reader and writer factory backed by an AMQP 0-9-1 broker.
///
/// In broker terms, each session is a channel and each link is either a
/// consumer on that channel with a prefetch of one (so that a slow consumer
/// applies back-pressure rather than hoarding deliveries) or a publisher with
/// confirms enabled.
pub struct AmqpQueueClient {
    sessions: SessionManager<AmqpTransport>,
}

impl AmqpQueueClient {
    /// Create a client; no connection is made until the first reader or
    /// writer is requested.
    pub fn new(config: AmqpConfig) -> Result<Self, QueueError> {
        let transport = AmqpTransport {
            uri: config.uri()?,
            address: config.address.clone(),
            link_counter: AtomicU64::new(0),
        };

        Ok(AmqpQueueClient {
            sessions: SessionManager::new(
                transport,
                config.max_connect_attempts,
                config.max_connect_backoff,
            ),
        })
    }
}

#[async_trait]
impl ReaderFactory for AmqpQueueClient {
    #[instrument(skip(self))]
    async fn new_reader(&self, queue_name: &str) -> Result<Box<dyn Reader>, QueueError> {
        match self.sessions.open_link(queue_name, LinkKind::Receive).await? {
            Link::Receiver(channel, consumer) => Ok(Box::new(AmqpReader {
                queue: queue_name.to_owned(),
                channel,
                consumer,
                closed: false,
            })),
            Link::Sender(_) => Err(QueueError::Link {
                queue: queue_name.to_owned(),
                message: "expected a receiving link".into(),
            }),
        }
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.sessions.close().await
    }
}

#[async_trait]
impl WriterFactory for AmqpQueueClient {
    #[instrument(skip(self))]
    async fn new_writer(&self, queue_name: &str) -> Result<Box<dyn Writer>, QueueError> {
        match self.sessions.open_link(queue_name, LinkKind::Send).await? {
            Link::Sender(channel) => Ok(Box::new(AmqpWriter {
                queue: queue_name.to_owned(),
                channel,
                closed: false,
            })),
            Link::Receiver(..) => Err(QueueError::Link {
                queue: queue_name.to_owned(),
                message: "expected a sending link".into(),
            }),
        }
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.sessions.close().await
    }
}

/// Payloads are UTF-8 text; anything else cannot name an event or a job.
fn decode_payload(queue: &str, data: Vec<u8>) -> Option<String> {
    match String::from_utf8(data) {
        Ok(payload) => Some(payload),
        Err(error) => {
            warn!("Dropping a message on {} that is not UTF-8: {}", queue, error);
            None
        }
    }
}

pub struct AmqpReader {
    queue: String,
    channel: Channel,
    consumer: Consumer,
    closed: bool,
}

#[async_trait]
impl Reader for AmqpReader {
    async fn read(&mut self, cancel: &CancellationToken) -> Result<Message, QueueError> {
        if self.closed {
            return Err(QueueError::Closed("reader"));
        }

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(QueueError::Cancelled),
                next = self.consumer.next() => next,
            };

            let Delivery { data, acker, .. } = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(error)) => {
                    return Err(QueueError::Read {
                        queue: self.queue.clone(),
                        message: error.to_string(),
                    })
                }
                None => {
                    return Err(QueueError::Read {
                        queue: self.queue.clone(),
                        message: "the delivery stream ended".into(),
                    })
                }
            };

            let Some(payload) = decode_payload(&self.queue, data) else {
                if let Err(error) = acker.ack(BasicAckOptions::default()).await {
                    warn!("Could not acknowledge dropped message: {}", error);
                }
                continue;
            };

            return Ok(Message::new(payload, move || async move {
                acker
                    .ack(BasicAckOptions::default())
                    .await
                    .map_err(|error| QueueError::Acknowledge(error.to_string()))
            }));
        }
    }

    async fn close(&mut self) -> Result<(), QueueError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.channel
            .close(REPLY_SUCCESS, "reader closed")
            .await
            .map_err(|error| QueueError::Close(format!("reader for {}: {}", self.queue, error)))
    }
}

pub struct AmqpWriter {
    queue: String,
    channel: Channel,
    closed: bool,
}

#[async_trait]
impl Writer for AmqpWriter {
    async fn write(
        &mut self,
        cancel: &CancellationToken,
        payload: &str,
        options: &WriteOptions,
    ) -> Result<(), QueueError> {
        if self.closed {
            return Err(QueueError::Closed("writer"));
        }

        let mut properties = BasicProperties::default();
        if options.durable {
            properties = properties.with_delivery_mode(DELIVERY_MODE_PERSISTENT);
        }

        let write_error = |error: lapin::Error| QueueError::Write {
            queue: self.queue.clone(),
            message: error.to_string(),
        };

        let publish = async {
            let confirm = self
                .channel
                .basic_publish(
                    "",
                    &self.queue,
                    BasicPublishOptions::default(),
                    payload.as_bytes(),
                    properties,
                )
                .await
                .map_err(write_error)?;
            confirm.await.map_err(write_error)
        };

        let confirmation = tokio::select! {
            _ = cancel.cancelled() => return Err(QueueError::Cancelled),
            confirmation = publish => confirmation?,
        };

        match confirmation {
            Confirmation::Nack(_) => Err(QueueError::Write {
                queue: self.queue.clone(),
                message: "the broker refused the message".into(),
            }),
            _ => Ok(()),
        }
    }

    async fn close(&mut self) -> Result<(), QueueError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.channel
            .close(REPLY_SUCCESS, "writer closed")
            .await
            .map_err(|error| QueueError::Close(format!("writer for {}: {}", self.queue, error)))
    }
}
