use async_trait::async_trait;
use conductor_common::{jittered_exp_backoff, manage_retries, Attempt, RetryError};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::QueueError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkKind {
    Receive,
    Send,
}

/// The broker operations a [SessionManager] sequences: dialing a shared
/// connection, opening sessions on it and attaching links to sessions.
#[async_trait]
pub(crate) trait Transport: Send + Sync {
    type Connection: Send + Sync;
    type Session: Send + Sync;
    type Link: Send;

    async fn dial(&self) -> anyhow::Result<Self::Connection>;

    async fn hang_up(&self, connection: Self::Connection) -> anyhow::Result<()>;

    async fn open_session(&self, connection: &Self::Connection) -> anyhow::Result<Self::Session>;

    async fn attach(
        &self,
        session: &Self::Session,
        queue_name: &str,
        kind: LinkKind,
    ) -> anyhow::Result<Self::Link>;

    async fn discard_session(&self, session: Self::Session);
}

/// Owns the one connection shared by every link and hands out links bound
/// to their own sessions.
///
/// A session that cannot be opened means the connection is stale, so it is
/// rebuilt before trying again. A link that cannot be attached only costs
/// its session; the connection, and every other link on it, is left alone.
pub(crate) struct SessionManager<T: Transport> {
    transport: T,
    connection: Mutex<Option<T::Connection>>,
    cancel: CancellationToken,
    max_connect_attempts: u32,
    max_backoff: Duration,
}

impl<T: Transport> SessionManager<T> {
    pub fn new(transport: T, max_connect_attempts: u32, max_backoff: Duration) -> Self {
        SessionManager {
            transport,
            connection: Mutex::new(None),
            cancel: CancellationToken::new(),
            max_connect_attempts,
            max_backoff,
        }
    }

    /// (Re)establish the connection held in `slot`, discarding any stale
    /// handle first. Callers must hold the connection lock.
    async fn connect(&self, slot: &mut Option<T::Connection>) -> Result<(), QueueError> {
        if let Some(stale) = slot.take() {
            if let Err(error) = self.transport.hang_up(stale).await {
                debug!("Ignoring error closing stale broker connection: {}", error);
            }
        }

        let transport = &self.transport;

        let connection = manage_retries(
            &self.cancel,
            "connect to broker",
            self.max_connect_attempts,
            self.max_backoff,
            move || async move {
                match transport.dial().await {
                    Ok(connection) => Attempt::Done(connection),
                    Err(error) => {
                        warn!("Broker dial failed: {}", error);
                        Attempt::Retry(Some(error))
                    }
                }
            },
        )
        .await
        .map_err(|error| match error {
            RetryError::Cancelled => QueueError::Cancelled,
            error => QueueError::Connect(error),
        })?;

        *slot = Some(connection);
        Ok(())
    }

    pub async fn open_link(
        &self,
        queue_name: &str,
        kind: LinkKind,
    ) -> Result<T::Link, QueueError> {
        let mut slot = self.connection.lock().await;
        let mut link_failures = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(QueueError::Cancelled);
            }

            let connection = match slot.as_ref() {
                Some(connection) => connection,
                None => {
                    self.connect(&mut slot).await?;
                    continue;
                }
            };

            let session = match self.transport.open_session(connection).await {
                Ok(session) => session,
                Err(error) => {
                    warn!("Could not open broker session ({}); reconnecting", error);
                    self.connect(&mut slot).await?;
                    continue;
                }
            };

            match self.transport.attach(&session, queue_name, kind).await {
                Ok(link) => return Ok(link),
                Err(error) => {
                    warn!("Could not open link to queue {}: {}", queue_name, error);
                    self.transport.discard_session(session).await;

                    link_failures = link_failures.saturating_add(1);
                    let delay = jittered_exp_backoff(link_failures, self.max_backoff);

                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(QueueError::Cancelled),
                        _ = tokio::time::sleep(delay) => (),
                    }
                }
            }
        }
    }

    /// Stop handing out links and hang up the shared connection.
    pub async fn close(&self) -> Result<(), QueueError> {
        self.cancel.cancel();

        let mut slot = self.connection.lock().await;
        match slot.take() {
            Some(connection) => self
                .transport
                .hang_up(connection)
                .await
                .map_err(|error| QueueError::Close(format!("broker connection: {error:#}"))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    /// Consume one unit of a scripted failure budget, if any remains.
    fn take_failure(budget: &AtomicUsize) -> bool {
        budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }

    /// Connections and sessions are numbered in the order they were made.
    #[derive(Default)]
    struct ScriptedTransport {
        dials: AtomicUsize,
        hang_ups: AtomicUsize,
        sessions: AtomicUsize,
        discarded: AtomicUsize,
        successful_dials: Option<usize>,
        failing_sessions: AtomicUsize,
        failing_attaches: AtomicUsize,
    }

    impl ScriptedTransport {
        fn count(counter: &AtomicUsize) -> usize {
            counter.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        type Connection = usize;
        type Session = usize;
        type Link = (usize, String);

        async fn dial(&self) -> anyhow::Result<usize> {
            let dial = self.dials.fetch_add(1, Ordering::SeqCst) + 1;
            match self.successful_dials {
                Some(limit) if dial > limit => Err(anyhow!("connection refused")),
                _ => Ok(dial),
            }
        }

        async fn hang_up(&self, _connection: usize) -> anyhow::Result<()> {
            self.hang_ups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn open_session(&self, connection: &usize) -> anyhow::Result<usize> {
            self.sessions.fetch_add(1, Ordering::SeqCst);
            if take_failure(&self.failing_sessions) {
                return Err(anyhow!("channel limit reached"));
            }
            Ok(*connection)
        }

        async fn attach(
            &self,
            session: &usize,
            queue_name: &str,
            _kind: LinkKind,
        ) -> anyhow::Result<(usize, String)> {
            if take_failure(&self.failing_attaches) {
                return Err(anyhow!("PRECONDITION_FAILED on {queue_name}"));
            }
            Ok((*session, queue_name.to_owned()))
        }

        async fn discard_session(&self, _session: usize) {
            self.discarded.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn manager(transport: ScriptedTransport) -> SessionManager<ScriptedTransport> {
        SessionManager::new(transport, 3, Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn it_shares_one_connection_between_links() {
        let sessions = manager(ScriptedTransport::default());

        let reader = sessions.open_link("workers.p", LinkKind::Receive).await.unwrap();
        let writer = sessions.open_link("jobs.p", LinkKind::Send).await.unwrap();

        assert_eq!(reader, (1, "workers.p".to_owned()));
        assert_eq!(writer, (1, "jobs.p".to_owned()));

        let transport = &sessions.transport;
        assert_eq!(ScriptedTransport::count(&transport.dials), 1);
        assert_eq!(ScriptedTransport::count(&transport.sessions), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn it_reconnects_when_a_session_cannot_be_opened() {
        let sessions = manager(ScriptedTransport {
            failing_sessions: AtomicUsize::new(1),
            ..Default::default()
        });

        let link = sessions.open_link("workers.p", LinkKind::Receive).await.unwrap();
        assert_eq!(link.0, 2);

        let transport = &sessions.transport;
        assert_eq!(ScriptedTransport::count(&transport.dials), 2);
        assert_eq!(ScriptedTransport::count(&transport.hang_ups), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn it_retries_a_link_without_disturbing_the_connection() {
        let sessions = manager(ScriptedTransport {
            failing_attaches: AtomicUsize::new(5),
            ..Default::default()
        });

        let link = sessions.open_link("jobs.p", LinkKind::Receive).await.unwrap();
        assert_eq!(link, (1, "jobs.p".to_owned()));

        let transport = &sessions.transport;
        assert_eq!(ScriptedTransport::count(&transport.dials), 1);
        assert_eq!(ScriptedTransport::count(&transport.hang_ups), 0);
        assert_eq!(ScriptedTransport::count(&transport.sessions), 6);
        assert_eq!(ScriptedTransport::count(&transport.discarded), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn it_gives_up_once_reconnecting_is_exhausted() {
        let sessions = manager(ScriptedTransport {
            successful_dials: Some(2),
            failing_sessions: AtomicUsize::new(usize::MAX),
            ..Default::default()
        });

        match sessions.open_link("workers.p", LinkKind::Receive).await {
            Err(QueueError::Connect(RetryError::Exhausted { attempts, .. })) => {
                assert_eq!(attempts, 3)
            }
            Err(other) => panic!("Unexpected error: {}", other),
            Ok(_) => panic!("Opened a link without a session"),
        }

        // Two good connections, then a full budget of refused dials
        let transport = &sessions.transport;
        assert_eq!(ScriptedTransport::count(&transport.dials), 5);
        assert_eq!(ScriptedTransport::count(&transport.sessions), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn it_reports_cancellation_once_closed() {
        let sessions = Arc::new(manager(ScriptedTransport {
            failing_attaches: AtomicUsize::new(usize::MAX),
            ..Default::default()
        }));

        let pending = {
            let sessions = sessions.clone();
            tokio::spawn(async move { sessions.open_link("jobs.p", LinkKind::Send).await })
        };

        tokio::time::sleep(Duration::from_secs(60)).await;
        sessions.close().await.unwrap();

        assert!(pending.await.unwrap().unwrap_err().is_cancelled());
        assert!(sessions
            .open_link("jobs.p", LinkKind::Send)
            .await
            .unwrap_err()
            .is_cancelled());
        assert_eq!(ScriptedTransport::count(&sessions.transport.hang_ups), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn it_reports_cancellation_when_closed_while_dialing() {
        // An unlimited connect budget only ends through cancellation
        let sessions = Arc::new(SessionManager::new(
            ScriptedTransport {
                successful_dials: Some(0),
                ..Default::default()
            },
            0,
            Duration::from_secs(10),
        ));

        let pending = {
            let sessions = sessions.clone();
            tokio::spawn(async move { sessions.open_link("workers.p", LinkKind::Receive).await })
        };

        tokio::time::sleep(Duration::from_secs(60)).await;
        sessions.close().await.unwrap();

        assert!(pending.await.unwrap().unwrap_err().is_cancelled());
    }
}
