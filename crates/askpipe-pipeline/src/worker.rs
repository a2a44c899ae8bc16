//! Explicit worker-pool hand-off for pipeline runs.
//!
//! The collaborator web layer acknowledges a question as `PENDING`, then
//! submits its id here instead of spawning a fire-and-forget task.
//! Delivery is **at-most-once**: a job is consumed from the queue exactly
//! once, and if the process dies mid-run the question stays `PENDING` and
//! the client must submit a new question. The pool adds no per-question
//! locking; the web layer must not re-submit an id that is still
//! `PENDING`.

use crate::Pipeline;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, thiserror::Error)]
#[error("job queue is closed")]
pub struct QueueClosed;

/// Cloneable submission handle; dropping every clone drains and stops the
/// workers.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<String>,
}

impl JobQueue {
    /// Enqueue a question id for processing. Applies backpressure when the
    /// queue is full.
    pub async fn submit(&self, question_id: impl Into<String>) -> Result<(), QueueClosed> {
        self.tx
            .send(question_id.into())
            .await
            .map_err(|_| QueueClosed)
    }
}

/// Spawn `workers` pipeline consumers over a bounded queue of `capacity`
/// question ids. One run occupies one worker for its whole duration;
/// concurrent runs are always for different questions as long as the
/// submission precondition holds.
pub fn spawn(pipeline: Arc<Pipeline>, workers: usize, capacity: usize) -> JobQueue {
    let (tx, rx) = mpsc::channel::<String>(capacity.max(1));
    let rx = Arc::new(Mutex::new(rx));

    for worker in 0..workers.max(1) {
        let rx = rx.clone();
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            loop {
                let job = rx.lock().await.recv().await;
                let Some(question_id) = job else {
                    break;
                };
                match pipeline.run(&question_id).await {
                    Ok(status) => {
                        tracing::info!(worker, question_id = %question_id, status = %status, "run finished");
                    }
                    Err(e) => {
                        tracing::error!(worker, question_id = %question_id, error = %e, "run failed without a status write");
                    }
                }
            }
        });
    }

    JobQueue { tx }
}
