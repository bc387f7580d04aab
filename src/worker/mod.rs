//! Background key derivation.
//!
//! PBKDF2 over tens of thousands of iterations takes long enough to be
//! noticeable, so it runs on tokio's blocking pool behind a small queue.
//! Every request is stamped with the runner's generation counter;
//! `invalidate` bumps the counter so results of requests made before it
//! are dropped instead of applied. Only the latest request's result is
//! ever used.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::crypto::kdf::derive_key_material;
use crate::crypto::keys::{KeyMaterial, MasterPassword};
use crate::errors::{Result, SesamError};

/// State of a submitted derivation.
#[derive(Debug)]
pub enum DerivationStatus<T> {
    /// Still running.
    Pending,
    /// Finished and still current.
    Applied(T),
    /// Superseded by a later request; the result was discarded.
    Stale,
}

struct DeriveRequest {
    token: u64,
    generation: u64,
    password: MasterPassword,
    salt: Vec<u8>,
    iterations: u32,
    reply: oneshot::Sender<Result<KeyMaterial>>,
}

/// Handle to the derivation task. Cheap to clone.
#[derive(Clone)]
pub struct DerivationRunner {
    requests: mpsc::UnboundedSender<DeriveRequest>,
    generation: Arc<AtomicU64>,
    next_token: Arc<AtomicU64>,
}

impl DerivationRunner {
    /// Start the derivation task. Must be called inside a tokio runtime.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<DeriveRequest>();
        let generation = Arc::new(AtomicU64::new(0));
        let current = Arc::clone(&generation);

        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                if request.generation != current.load(Ordering::SeqCst) {
                    trace!(token = request.token, "skipping superseded derivation");
                    continue;
                }
                let DeriveRequest {
                    token,
                    password,
                    salt,
                    iterations,
                    reply,
                    ..
                } = request;

                let result = tokio::task::spawn_blocking(move || {
                    derive_key_material(password.as_bytes(), &salt, iterations)
                })
                .await
                .unwrap_or_else(|e| {
                    Err(SesamError::KeyDerivationFailed(format!(
                        "derivation task failed: {e}"
                    )))
                });

                debug!(token, ok = result.is_ok(), "derivation finished");
                // The receiver may be gone; nobody needs the result then.
                let _ = reply.send(result);
            }
        });

        Self {
            requests: tx,
            generation,
            next_token: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Discard every derivation submitted so far.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Queue a derivation and return a handle to its result.
    pub fn submit(
        &self,
        password: &MasterPassword,
        salt: &[u8],
        iterations: u32,
    ) -> Result<PendingDerivation> {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        let generation = self.generation.load(Ordering::SeqCst);
        let (reply, rx) = oneshot::channel();

        self.requests
            .send(DeriveRequest {
                token,
                generation,
                password: password.clone(),
                salt: salt.to_vec(),
                iterations,
                reply,
            })
            .map_err(|_| SesamError::KeyDerivationFailed("derivation worker stopped".into()))?;

        Ok(PendingDerivation {
            token,
            generation,
            current: Arc::clone(&self.generation),
            reply: rx,
        })
    }

    /// Submit and wait, for callers that have nothing else to do meanwhile.
    pub async fn derive_now(
        &self,
        password: &MasterPassword,
        salt: &[u8],
        iterations: u32,
    ) -> Result<KeyMaterial> {
        match self.submit(password, salt, iterations)?.wait().await? {
            DerivationStatus::Applied(material) => Ok(material),
            _ => Err(SesamError::KeyDerivationFailed(
                "derivation was superseded".into(),
            )),
        }
    }
}

/// A submitted derivation.
pub struct PendingDerivation {
    token: u64,
    generation: u64,
    current: Arc<AtomicU64>,
    reply: oneshot::Receiver<Result<KeyMaterial>>,
}

impl PendingDerivation {
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn is_stale(&self) -> bool {
        self.generation != self.current.load(Ordering::SeqCst)
    }

    /// Non-blocking check.
    pub fn poll(&mut self) -> Result<DerivationStatus<KeyMaterial>> {
        if self.is_stale() {
            return Ok(DerivationStatus::Stale);
        }
        match self.reply.try_recv() {
            Ok(result) => self.settle(result),
            Err(oneshot::error::TryRecvError::Empty) => Ok(DerivationStatus::Pending),
            Err(oneshot::error::TryRecvError::Closed) => Ok(DerivationStatus::Stale),
        }
    }

    /// Wait for the result.
    pub async fn wait(mut self) -> Result<DerivationStatus<KeyMaterial>> {
        match (&mut self.reply).await {
            Ok(result) => self.settle(result),
            Err(_) => Ok(DerivationStatus::Stale),
        }
    }

    fn settle(&self, result: Result<KeyMaterial>) -> Result<DerivationStatus<KeyMaterial>> {
        let material = result?;
        if self.is_stale() {
            trace!(token = self.token, "discarding stale derivation result");
            return Ok(DerivationStatus::Stale);
        }
        Ok(DerivationStatus::Applied(material))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf::derive_key_material;

    #[tokio::test]
    async fn derive_now_matches_direct_derivation() {
        let runner = DerivationRunner::spawn();
        let pw = MasterPassword::new("master");
        let material = runner.derive_now(&pw, b"salt", 8).await.unwrap();
        let direct = derive_key_material(b"master", b"salt", 8).unwrap();
        assert_eq!(material.key(), direct.key());
        assert_eq!(material.iv(), direct.iv());
    }

    #[tokio::test]
    async fn invalidated_request_is_stale() {
        let runner = DerivationRunner::spawn();
        let pw = MasterPassword::new("master");
        let old = runner.submit(&pw, b"salt", 8).unwrap();
        runner.invalidate();
        let fresh = runner.submit(&pw, b"salt", 8).unwrap();

        assert!(matches!(old.wait().await.unwrap(), DerivationStatus::Stale));
        assert!(matches!(
            fresh.wait().await.unwrap(),
            DerivationStatus::Applied(_)
        ));
    }

    #[tokio::test]
    async fn errors_are_reported() {
        let runner = DerivationRunner::spawn();
        let pw = MasterPassword::new("master");
        let err = runner.derive_now(&pw, b"", 8).await.unwrap_err();
        assert!(matches!(err, SesamError::KeyDerivationFailed(_)));
    }
}
