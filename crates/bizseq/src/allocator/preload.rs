//! Background segment preloading.
//!
//! [`PreloadPool`] owns a fixed set of worker tasks, each listening on its own
//! bounded [`mpsc::Receiver`]. Requests are distributed round-robin and the
//! pool supports coordinated shutdown via a shared [`CancellationToken`].
//!
//! A worker handles one key at a time: it reserves the next segment from the
//! [`Store`] (retrying a fixed number of times under one overall deadline),
//! then either fills the key's standby buffer and wakes its waiters, or
//! releases the key's preload slot and records the failure.

use crate::{Error, KeyCache, Result, Segment, Store};
use core::time::Duration;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// How long [`PreloadPool::shutdown`] waits for the workers to confirm.
pub(crate) const SHUTDOWN_ACK_TIMEOUT: Duration = Duration::from_secs(3);

/// A unit of work for a preload worker.
#[derive(Debug)]
pub(crate) enum PreloadRequest {
    /// Reserve the next segment for this key.
    Load { cache: Arc<KeyCache> },
    /// Stop the worker and acknowledge.
    Shutdown { response: oneshot::Sender<()> },
}

/// Limits a worker applies to every preload.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PreloadLimits {
    /// Overall deadline covering every attempt.
    pub deadline: Duration,
    pub attempts: u32,
}

/// Reserves the next segment for `key`, sized by the step stored on its row.
/// A key registered on the fly gets `default_step`.
pub(crate) async fn reserve_segment(
    store: &dyn Store,
    key: &str,
    default_step: u32,
) -> Result<Segment> {
    let row = store.reserve_next(key, default_step).await?;
    Segment::from_reservation(row.max_id, row.step)
        .ok_or_else(|| Error::store(key, format!("inconsistent high-water mark {}", row.max_id)))
}

async fn preload(store: &dyn Store, cache: &KeyCache, attempts: u32) -> Result<Segment> {
    let mut last_err = None;
    for _attempt in 1..=attempts {
        match reserve_segment(store, cache.key(), cache.step()).await {
            Ok(segment) => return Ok(segment),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(key = cache.key(), attempt = _attempt, "Preload attempt failed: {e}");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| Error::store(cache.key(), "no preload attempts allowed")))
}

/// Worker task that services [`PreloadRequest`]s until told to stop.
pub(crate) async fn worker_loop(
    worker_id: usize,
    mut rx: mpsc::Receiver<PreloadRequest>,
    store: Arc<dyn Store>,
    limits: PreloadLimits,
    shutdown_token: CancellationToken,
) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Preload worker {worker_id} started");

    while let Some(request) = rx.recv().await {
        match request {
            PreloadRequest::Load { cache } => {
                let result = tokio::select! {
                    biased;
                    () = shutdown_token.cancelled() => Err(Error::Shutdown),
                    res = timeout(limits.deadline, preload(store.as_ref(), &cache, limits.attempts)) => {
                        res.unwrap_or_else(|_| Err(Error::store(cache.key(), "preload deadline elapsed")))
                    }
                };

                match result {
                    Ok(segment) => {
                        let _woken = cache.fill(segment);
                        #[cfg(feature = "tracing")]
                        tracing::trace!(
                            key = cache.key(),
                            %segment,
                            woken = _woken,
                            "Preloaded segment on worker {worker_id}"
                        );
                    }
                    Err(e) => {
                        #[cfg(feature = "tracing")]
                        tracing::error!(key = cache.key(), "Preload gave up: {e}");
                        cache.abandon_preload(e);
                    }
                }
            }
            PreloadRequest::Shutdown { response } => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Preload worker {worker_id} received shutdown signal");

                if response.send(()).is_err() {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Preload worker {worker_id} failed to acknowledge shutdown");
                }
                break;
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Preload worker {worker_id} stopped");
}

/// A fixed pool of preload workers fed round-robin.
#[derive(Debug)]
pub(crate) struct PreloadPool {
    workers: Vec<mpsc::Sender<PreloadRequest>>,
    next_worker: AtomicUsize,
    shutdown_token: CancellationToken,
}

impl PreloadPool {
    /// Spawns `workers` tasks on the current runtime, each with a queue of
    /// `queue` pending requests.
    pub fn spawn(
        store: &Arc<dyn Store>,
        workers: usize,
        queue: usize,
        limits: PreloadLimits,
    ) -> Self {
        let shutdown_token = CancellationToken::new();
        let mut senders = Vec::with_capacity(workers);

        for worker_id in 0..workers {
            let (tx, rx) = mpsc::channel(queue);
            senders.push(tx);
            tokio::spawn(worker_loop(
                worker_id,
                rx,
                Arc::clone(store),
                limits,
                shutdown_token.clone(),
            ));
        }

        Self {
            workers: senders,
            next_worker: AtomicUsize::new(0),
            shutdown_token,
        }
    }

    fn next_worker_index(&self) -> usize {
        self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len()
    }

    /// Hands a preload for `cache` to the next worker without waiting.
    ///
    /// # Errors
    ///
    /// - [`Error::Shutdown`] if the pool is shutting down or the worker is gone.
    /// - [`Error::StoreUnavailable`] if the worker's queue is full.
    pub fn submit(&self, cache: Arc<KeyCache>) -> Result<()> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::Shutdown);
        }

        let worker_idx = self.next_worker_index();
        match self.workers[worker_idx].try_send(PreloadRequest::Load { cache }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(PreloadRequest::Load { cache })) => Err(Error::store(
                cache.key(),
                format!("preload worker {worker_idx} queue is full"),
            )),
            Err(_) => Err(Error::Shutdown),
        }
    }

    /// Stops every worker.
    ///
    /// Cancels the shared token so queued and in-flight preloads give up,
    /// then asks each worker to stop and waits up to
    /// [`SHUTDOWN_ACK_TIMEOUT`] for all of them to confirm.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();

        let acks = self.workers.iter().map(|worker| async move {
            let (response, ack) = oneshot::channel();
            worker.send(PreloadRequest::Shutdown { response }).await.ok()?;
            timeout(SHUTDOWN_ACK_TIMEOUT, ack).await.ok()?.ok()
        });
        let _stopped = futures::future::join_all(acks).await.into_iter().flatten().count();

        #[cfg(feature = "tracing")]
        {
            let workers = self.workers.len();
            if _stopped < workers {
                tracing::warn!(
                    "{} of {workers} preload workers did not confirm shutdown",
                    workers - _stopped
                );
            } else {
                tracing::debug!("Preload pool stopped ({workers} workers)");
            }
        }
    }
}
