//! Single-worker job queue.
//!
//! Submissions are accepted immediately and run one at a time in
//! submission order, so the translation backend never sees overlapping
//! requests. Jobs are keyed by source path while queued or running.

use crate::scanner::Source;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Reasons a submission is refused.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SubmitError {
    /// A job with the same key is queued or running
    #[error("Already queued: {0}")]
    Duplicate(PathBuf),

    /// The worker has stopped
    #[error("Queue is closed")]
    Closed,
}

/// FIFO queue with exactly one worker.
#[derive(Debug)]
pub struct WorkQueue {
    sender: UnboundedSender<Source>,
    keys: Arc<Mutex<HashSet<PathBuf>>>,
    worker: JoinHandle<()>,
}

impl WorkQueue {
    /// Starts the worker. `handler` runs once per submitted source.
    ///
    /// When `cancel` fires the worker stops picking up new jobs; jobs still
    /// waiting are dropped.
    pub fn spawn<F, Fut>(cancel: CancellationToken, handler: F) -> Self
    where
        F: Fn(Source) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Source>();
        let keys: Arc<Mutex<HashSet<PathBuf>>> = Arc::new(Mutex::new(HashSet::new()));
        let worker_keys = keys.clone();

        let worker = tokio::spawn(async move {
            loop {
                let source = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    next = receiver.recv() => match next {
                        Some(source) => source,
                        None => break,
                    },
                };
                let key = source.path.clone();
                handler(source).await;
                worker_keys.lock().remove(&key);
            }

            // Close first so no submit can slip in after the keys are cleared.
            drop(receiver);
            let dropped = {
                let mut keys = worker_keys.lock();
                let dropped = keys.len();
                keys.clear();
                dropped
            };
            if dropped > 0 {
                debug!(dropped, "worker stopped with jobs pending");
            }
        });

        Self {
            sender,
            keys,
            worker,
        }
    }

    /// Enqueues `source` unless a job with the same path is pending.
    pub fn submit(&self, source: Source) -> Result<(), SubmitError> {
        let key = source.path.clone();
        {
            let mut keys = self.keys.lock();
            if !keys.insert(key.clone()) {
                return Err(SubmitError::Duplicate(key));
            }
        }
        if self.sender.send(source).is_err() {
            self.keys.lock().remove(&key);
            return Err(SubmitError::Closed);
        }
        Ok(())
    }

    /// Whether a job for `key` is queued or running.
    pub fn contains(&self, key: &Path) -> bool {
        self.keys.lock().contains(key)
    }

    /// Number of queued or running jobs.
    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes the queue and waits for the worker to exit.
    pub async fn shutdown(self) {
        drop(self.sender);
        if let Err(e) = self.worker.await {
            debug!(error = %e, "worker task ended abnormally");
        }
    }
}
