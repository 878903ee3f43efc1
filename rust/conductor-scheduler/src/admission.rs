//! A single-slot admission gate. The [GateKeeper] side hands out one
//! [AdmissionToken] at a time and does not hand out another until the token
//! it granted has been released (or dropped). Any number of cloned [Gate]s
//! may compete for the token, but only one of them will receive it.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("Cancelled while waiting on the admission gate")]
    Cancelled,

    #[error("The other side of the admission gate has gone away")]
    Closed,
}

/// Permission to start exactly one unit. Releasing the token, or simply
/// dropping it, tells the [GateKeeper] to go looking for more capacity.
#[derive(Debug)]
pub struct AdmissionToken {
    returned: oneshot::Sender<()>,
}

impl AdmissionToken {
    pub fn release(self) {
        let _ = self.returned.send(());
    }
}

/// The granting side of an admission gate; owned by a capacity manager.
#[derive(Debug)]
pub struct GateKeeper {
    tokens: mpsc::Sender<AdmissionToken>,
}

impl GateKeeper {
    /// Offer one token and wait until whoever took it gives it back.
    pub async fn grant(&self, cancel: &CancellationToken) -> Result<(), AdmissionError> {
        let (returned, token_returned) = oneshot::channel();

        tokio::select! {
            _ = cancel.cancelled() => return Err(AdmissionError::Cancelled),
            sent = self.tokens.send(AdmissionToken { returned }) => {
                sent.map_err(|_| AdmissionError::Closed)?
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(AdmissionError::Cancelled),
            // A token that is dropped without being released has still been
            // given back
            _ = token_returned => Ok(()),
        }
    }
}

/// The acquiring side of an admission gate; shared by every consumption loop
/// in the same capacity domain.
#[derive(Debug, Clone)]
pub struct Gate {
    tokens: Arc<Mutex<mpsc::Receiver<AdmissionToken>>>,
}

impl Gate {
    pub async fn acquire(
        &self,
        cancel: &CancellationToken,
    ) -> Result<AdmissionToken, AdmissionError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(AdmissionError::Cancelled),
            token = async { self.tokens.lock().await.recv().await } => {
                token.ok_or(AdmissionError::Closed)
            }
        }
    }
}

pub fn admission_gate() -> (GateKeeper, Gate) {
    let (tokens, receiver) = mpsc::channel(1);
    (
        GateKeeper { tokens },
        Gate {
            tokens: Arc::new(Mutex::new(receiver)),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    #[tokio::test]
    async fn it_waits_for_the_token_to_come_back_before_granting_again() {
        let (keeper, gate) = admission_gate();
        let cancel = CancellationToken::new();
        let grants = Arc::new(AtomicUsize::new(0));

        let keeper_task = {
            let cancel = cancel.clone();
            let grants = grants.clone();
            tokio::spawn(async move {
                while keeper.grant(&cancel).await.is_ok() {
                    grants.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        let token = gate.acquire(&cancel).await.unwrap();

        // Nobody else may be admitted while the first token is outstanding
        let second = tokio::time::timeout(Duration::from_millis(100), gate.acquire(&cancel)).await;
        assert!(second.is_err());
        assert_eq!(grants.load(Ordering::SeqCst), 0);

        token.release();
        let token = gate.acquire(&cancel).await.unwrap();
        assert_eq!(grants.load(Ordering::SeqCst), 1);

        drop(token);
        let _token = gate.acquire(&cancel).await.unwrap();
        assert_eq!(grants.load(Ordering::SeqCst), 2);

        cancel.cancel();
        keeper_task.await.unwrap();
    }

    #[tokio::test]
    async fn it_hands_each_token_to_exactly_one_of_many_gates() {
        let (keeper, gate) = admission_gate();
        let cancel = CancellationToken::new();
        let admitted = Arc::new(AtomicUsize::new(0));

        let mut contenders = Vec::new();
        for _ in 0..3 {
            let gate = gate.clone();
            let cancel = cancel.clone();
            let admitted = admitted.clone();
            contenders.push(tokio::spawn(async move {
                if let Ok(token) = gate.acquire(&cancel).await {
                    admitted.fetch_add(1, Ordering::SeqCst);
                    // Hold the token until shutdown
                    cancel.cancelled().await;
                    token.release();
                }
            }));
        }

        let keeper_task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { keeper.grant(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(admitted.load(Ordering::SeqCst), 1);

        cancel.cancel();
        let _ = keeper_task.await.unwrap();
        for contender in contenders {
            contender.await.unwrap();
        }
    }

    #[tokio::test]
    async fn it_reports_a_vanished_keeper() {
        let (keeper, gate) = admission_gate();
        drop(keeper);
        let cancel = CancellationToken::new();
        assert_eq!(
            gate.acquire(&cancel).await.unwrap_err(),
            AdmissionError::Closed
        );
    }
}
