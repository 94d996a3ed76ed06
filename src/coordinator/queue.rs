use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::{CoordError, Result};

pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

type Task = Box<dyn FnOnce(InQueue) -> BoxFuture<()> + Send>;

/// Proof that the holder runs on the coordinator queue.
///
/// Only the queue worker can create one. Code that receives it may mutate
/// coordination state directly and must not enqueue and await further work,
/// which would deadlock the queue.
#[derive(Debug, Clone, Copy)]
pub struct InQueue {
    _private: (),
}

/// Handle for submitting work to the single-threaded coordinator queue.
#[derive(Clone)]
pub struct CoordinatorQueue {
    tx: mpsc::UnboundedSender<Task>,
}

impl CoordinatorQueue {
    pub fn new() -> (Self, QueueWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, QueueWorker { rx })
    }

    /// Run `action` on the queue and wait for its result.
    ///
    /// With a marker the caller is already on the queue, so the action runs
    /// inline instead of being re-enqueued.
    pub async fn run<T, F, Fut>(&self, marker: Option<InQueue>, action: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(InQueue) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if let Some(marker) = marker {
            return action(marker).await;
        }

        let (response_tx, response_rx) = oneshot::channel();
        let task: Task = Box::new(move |marker| {
            Box::pin(async move {
                let result = action(marker).await;
                let _ = response_tx.send(result);
            })
        });
        self.tx
            .send(task)
            .map_err(|_| CoordError::Internal("coordinator queue is closed".to_string()))?;
        response_rx
            .await
            .map_err(|_| CoordError::Internal("coordinator task was dropped".to_string()))?
    }

    /// Enqueue `action` without waiting for it.
    pub fn enqueue<F, Fut>(&self, action: F)
    where
        F: FnOnce(InQueue) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task: Task = Box::new(move |marker| Box::pin(action(marker)));
        if self.tx.send(task).is_err() {
            tracing::debug!("Coordinator queue is closed, dropping task");
        }
    }
}

/// Receiving end of the queue. Runs tasks one at a time.
pub struct QueueWorker {
    rx: mpsc::UnboundedReceiver<Task>,
}

impl QueueWorker {
    pub async fn run(mut self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("Coordinator queue shutting down");
                    break;
                }
                task = self.rx.recv() => {
                    let Some(task) = task else { break };
                    // each task runs in its own tokio task so a panic does not
                    // take the queue down, but it is awaited before the next one
                    let handle = tokio::spawn(task(InQueue { _private: () }));
                    if let Err(e) = handle.await {
                        tracing::error!(error = %e, "Coordinator task panicked");
                    }
                }
            }
        }
    }
}
