//! Background persistence writer
//!
//! One task owns the [`PersistenceSink`]. Sessions hold a cheap
//! [`PersistenceHandle`]: appends are fire-and-forget through a bounded queue
//! and are dropped when it is full, finalize waits for queue space and for the
//! sink's answer. Every sink call is retried with bounded exponential backoff.

use crate::config::PersistenceConfig;
use crate::domain::persistence::{CallRecord, PersistenceSink};
use crate::domain::shared::error::RelayError;
use crate::domain::shared::events::RecordedEvent;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::SessionId;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Bounded exponential backoff for sink calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl From<&PersistenceConfig> for RetryPolicy {
    fn from(config: &PersistenceConfig) -> Self {
        let initial_backoff_ms = config.initial_backoff_ms.max(1);
        let max_backoff_ms = config.max_backoff_ms.max(initial_backoff_ms);
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `failed`-th failed attempt (1-based)
    pub fn backoff_after(&self, failed: u32) -> Duration {
        let exponent = failed.saturating_sub(1).min(16);
        let backoff = self.initial_backoff.saturating_mul(1u32 << exponent);
        backoff.min(self.max_backoff)
    }

    async fn run<F, Fut>(&self, session_id: &SessionId, operation: &str, mut call: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(RelayError::PersistenceWrite {
                        session_id: *session_id,
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    let backoff = self.backoff_after(attempt);
                    debug!(
                        session_id = %session_id,
                        operation,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "Persistence call failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

enum WriteRequest {
    Append {
        session_id: SessionId,
        event: RecordedEvent,
    },
    Finalize {
        session_id: SessionId,
        record: Box<CallRecord>,
        done: oneshot::Sender<Result<()>>,
    },
    Shutdown,
}

/// Session-side handle to the writer task
#[derive(Clone)]
pub struct PersistenceHandle {
    tx: mpsc::Sender<WriteRequest>,
}

impl PersistenceHandle {
    /// Queue an event without waiting. Returns `false` if it was dropped.
    pub fn append(&self, session_id: &SessionId, event: RecordedEvent) -> bool {
        let kind = event.kind.clone();
        match self.tx.try_send(WriteRequest::Append {
            session_id: *session_id,
            event,
        }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(session_id = %session_id, kind = %kind, "Persistence queue full, event dropped");
                metrics::counter!("callrelay_persistence_dropped_total").increment(1);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(session_id = %session_id, kind = %kind, "Persistence writer stopped, event dropped");
                metrics::counter!("callrelay_persistence_dropped_total").increment(1);
                false
            }
        }
    }

    /// Store the final record and wait for the outcome
    pub async fn finalize(&self, session_id: &SessionId, record: CallRecord) -> Result<()> {
        let (done, outcome) = oneshot::channel();
        self.tx
            .send(WriteRequest::Finalize {
                session_id: *session_id,
                record: Box::new(record),
                done,
            })
            .await
            .map_err(|_| RelayError::Internal("persistence writer stopped".to_string()))?;

        outcome
            .await
            .map_err(|_| RelayError::Internal("persistence writer dropped finalize".to_string()))?
    }
}

pub struct PersistenceWriter {
    handle: PersistenceHandle,
    task: JoinHandle<()>,
}

impl PersistenceWriter {
    pub fn spawn(sink: Arc<dyn PersistenceSink>, config: &PersistenceConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let policy = RetryPolicy::from(config);
        let task = tokio::spawn(run(sink, policy, rx));

        Self {
            handle: PersistenceHandle { tx },
            task,
        }
    }

    pub fn handle(&self) -> PersistenceHandle {
        self.handle.clone()
    }

    /// Process everything queued so far, then stop the task
    pub async fn shutdown(self) {
        if self.handle.tx.send(WriteRequest::Shutdown).await.is_err() {
            debug!("Persistence writer already stopped");
        }
        if let Err(e) = self.task.await {
            error!("Persistence writer task failed: {}", e);
        }
    }
}

async fn run(
    sink: Arc<dyn PersistenceSink>,
    policy: RetryPolicy,
    mut rx: mpsc::Receiver<WriteRequest>,
) {
    info!(max_attempts = policy.max_attempts, "Persistence writer started");

    while let Some(request) = rx.recv().await {
        match request {
            WriteRequest::Append { session_id, event } => {
                let result = policy
                    .run(&session_id, "append", || sink.append(&session_id, &event))
                    .await;
                if let Err(e) = result {
                    metrics::counter!("callrelay_persistence_failures_total", "operation" => "append")
                        .increment(1);
                    warn!(session_id = %session_id, kind = %event.kind, "Data loss: {}", e);
                }
            }
            WriteRequest::Finalize {
                session_id,
                record,
                done,
            } => {
                let result = policy
                    .run(&session_id, "finalize", || sink.finalize(&session_id, &record))
                    .await;
                match &result {
                    Ok(()) => info!(
                        session_id = %session_id,
                        end_reason = ?record.end_reason,
                        turns = record.transcript.len(),
                        "Call record persisted"
                    ),
                    Err(e) => {
                        metrics::counter!("callrelay_persistence_failures_total", "operation" => "finalize")
                            .increment(1);
                        warn!(session_id = %session_id, "Data loss, call record not stored: {}", e);
                    }
                }
                let _ = done.send(result);
            }
            WriteRequest::Shutdown => break,
        }
    }

    info!("Persistence writer stopped");
}
