//! In-process job queue: an unbounded channel feeding a worker loop.
//! Delivery is at-least-once from the stages' perspective; handlers carry
//! their own idempotence guards.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{error, info, warn};
use uuid::Uuid;

use commonplace_common::{JobQueue, Stage};

use crate::orchestrator::Orchestrator;

#[derive(Debug, Clone, Copy)]
pub struct Job {
    pub stage: Stage,
    pub id: Uuid,
}

#[derive(Clone)]
pub struct TokioQueue {
    tx: UnboundedSender<Job>,
}

impl TokioQueue {
    pub fn channel() -> (Self, UnboundedReceiver<Job>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl JobQueue for TokioQueue {
    async fn enqueue(&self, stage: Stage, id: Uuid, delay: Option<Duration>) -> Result<()> {
        let job = Job { stage, id };
        match delay {
            None => self.tx.send(job).map_err(|_| anyhow::anyhow!("queue closed"))?,
            Some(delay) => {
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(job);
                });
            }
        }
        Ok(())
    }
}

/// Redeliveries of a failing job, counting the first attempt.
const MAX_DELIVERIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(30);

/// Drive the at-least-once contract: a failed stage is re-enqueued with a
/// delay up to `MAX_DELIVERIES`, then abandoned through the orchestrator so
/// the unit lands in a terminal state instead of starving its dependents.
pub async fn run_worker(
    orchestrator: Arc<Orchestrator>,
    queue: Arc<TokioQueue>,
    mut rx: UnboundedReceiver<Job>,
) {
    info!("Pipeline worker started");
    let mut failures: HashMap<(Stage, Uuid), u32> = HashMap::new();
    while let Some(job) = rx.recv().await {
        let key = (job.stage, job.id);
        match orchestrator.dispatch(job.stage, job.id).await {
            Ok(()) => {
                failures.remove(&key);
            }
            Err(e) => {
                let attempts = failures.entry(key).or_insert(0);
                *attempts += 1;
                if *attempts < MAX_DELIVERIES {
                    warn!(
                        stage = %job.stage,
                        id = %job.id,
                        attempt = *attempts,
                        error = %e,
                        "Stage failed; retrying"
                    );
                    if queue
                        .enqueue(job.stage, job.id, Some(RETRY_DELAY))
                        .await
                        .is_err()
                    {
                        break;
                    }
                } else {
                    failures.remove(&key);
                    error!(
                        stage = %job.stage,
                        id = %job.id,
                        error = %e,
                        "Stage failed on final delivery; abandoning"
                    );
                    if let Err(e) = orchestrator.abandon(job.stage, job.id, &e).await {
                        error!(stage = %job.stage, id = %job.id, error = %e, "Abandon failed");
                    }
                }
            }
        }
    }
    info!("Pipeline worker stopped");
}
