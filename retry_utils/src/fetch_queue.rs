//! Single-consumer FIFO queue that paces every outbound call to a provider.
//!
//! Operations run strictly one at a time, in submission order, separated by
//! a minimum delay. The worker task is spawned when work arrives and exits
//! once the queue is drained.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

use crate::shutdown::Shutdown;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("fetch queue shut down before the operation ran")]
    Cancelled,
}

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<Job>,
    worker_running: bool,
}

struct Inner {
    name: String,
    inter_delay: Duration,
    shutdown: Shutdown,
    state: Mutex<QueueState>,
}

#[derive(Clone)]
pub struct FetchQueue {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for FetchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchQueue")
            .field("name", &self.inner.name)
            .field("inter_delay", &self.inner.inter_delay)
            .finish()
    }
}

impl FetchQueue {
    pub fn new(name: impl Into<String>, inter_delay: Duration) -> Self {
        Self::with_shutdown(name, inter_delay, Shutdown::never())
    }

    /// Queued operations that have not started when `shutdown` fires resolve
    /// with [`QueueError::Cancelled`].
    pub fn with_shutdown(name: impl Into<String>, inter_delay: Duration, shutdown: Shutdown) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                inter_delay,
                shutdown,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn inter_delay(&self) -> Duration {
        self.inner.inter_delay
    }

    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Enqueue `operation` and wait for its output.
    pub async fn submit<F, Fut, T>(&self, operation: F) -> Result<T, QueueError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.inner.shutdown.is_triggered() {
            return Err(QueueError::Cancelled);
        }

        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let output = operation().await;
            // the submitter may have given up waiting
            let _ = tx.send(output);
        });

        {
            let mut state = self.inner.state.lock().await;
            state.jobs.push_back(job);
            if !state.worker_running {
                state.worker_running = true;
                debug!(queue = %self.inner.name, "Starting fetch queue worker");
                tokio::spawn(Self::run_worker(self.inner.clone()));
            }
        }

        rx.await.map_err(|_| QueueError::Cancelled)
    }

    async fn run_worker(inner: Arc<Inner>) {
        loop {
            let job = {
                let mut state = inner.state.lock().await;
                match state.jobs.pop_front() {
                    Some(job) => job,
                    None => {
                        state.worker_running = false;
                        debug!(queue = %inner.name, "Fetch queue drained, worker stopping");
                        return;
                    }
                }
            };

            if inner.shutdown.is_triggered() {
                // dropping the job drops its sender, the submitter sees Cancelled
                drop(job);
                continue;
            }

            job.await;

            // pacing applies to whatever is submitted next, even after a drain
            tokio::time::sleep(inner.inter_delay).await;
        }
    }
}
