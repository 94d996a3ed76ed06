use tokio::sync::watch;

use crate::error::ExecutionError;
use crate::job::JobResult;

/// Final outcome of a job: `Ok` when it completed, the failure cause otherwise.
pub type JobOutcome = std::result::Result<(), ExecutionError>;

/// Write side of a job's completion future. The first outcome sticks.
#[derive(Debug)]
pub struct CompletionSignal {
    tx: watch::Sender<Option<JobOutcome>>,
}

impl CompletionSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Set the outcome and wake all waiters. Returns false if already set.
    pub fn complete(&self, outcome: JobOutcome) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(outcome);
                true
            } else {
                false
            }
        })
    }

    pub fn is_completed(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn subscribe(&self) -> JobCompletion {
        JobCompletion {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Completion future shared by everyone joining the same job.
#[derive(Debug, Clone)]
pub struct JobCompletion {
    rx: watch::Receiver<Option<JobOutcome>>,
}

impl JobCompletion {
    /// An already resolved completion, built from a persisted result.
    pub fn from_result(result: &JobResult) -> Self {
        let (_tx, rx) = watch::channel(Some(match &result.failure {
            None => Ok(()),
            Some(e) => Err(e.clone()),
        }));
        Self { rx }
    }

    /// The outcome, if the job has already finished.
    pub fn try_outcome(&self) -> Option<JobOutcome> {
        self.rx.borrow().clone()
    }

    /// Wait until the job finishes.
    ///
    /// If the coordinator drops the job without an outcome the wait
    /// resolves as cancelled.
    pub async fn wait(mut self) -> JobOutcome {
        loop {
            if let Some(outcome) = self.rx.borrow_and_update().clone() {
                return outcome;
            }
            if self.rx.changed().await.is_err() {
                return self
                    .rx
                    .borrow()
                    .clone()
                    .unwrap_or(Err(ExecutionError::Cancelled));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn waiters_see_first_outcome() {
        let signal = CompletionSignal::new();
        let first = signal.subscribe();
        let second = signal.subscribe();
        assert!(first.try_outcome().is_none());

        assert!(signal.complete(Ok(())));
        assert!(!signal.complete(Err(ExecutionError::Cancelled)));

        assert_eq!(first.wait().await, Ok(()));
        assert_eq!(second.wait().await, Ok(()));
        assert!(signal.is_completed());
    }

    #[tokio::test]
    async fn wait_resolves_after_spawned_completion() {
        let signal = CompletionSignal::new();
        let completion = signal.subscribe();
        tokio::spawn(async move {
            signal.complete(Err(ExecutionError::Failed("boom".into())));
        });
        assert_eq!(
            completion.wait().await,
            Err(ExecutionError::Failed("boom".into()))
        );
    }

    #[tokio::test]
    async fn dropped_signal_resolves_as_cancelled() {
        let signal = CompletionSignal::new();
        let completion = signal.subscribe();
        drop(signal);
        assert_eq!(completion.wait().await, Err(ExecutionError::Cancelled));
    }
}
