//! Stage handoff: serializing lifecycle context onto the downstream job
//! queue so a multi-step lifecycle can span independent invocations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::domain::TradeJobContext;
use crate::error::{LegworkError, Result};

/// Queue consumed by the exit-strategy checkers.
pub const EXIT_TRADING_Q_NAME: &str = "exit-trading";
/// Queue consumed by per-order stop-loss watchers.
pub const WATCHER_Q_NAME: &str = "watcher";

/// Payload delivered to the next stage: the full durable context plus
/// whatever partial results the previous stage produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagePayload {
    pub context: TradeJobContext,
    #[serde(default)]
    pub extra: Value,
}

/// Handle to an enqueued job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: Uuid,
    pub stage: String,
}

/// FIFO/delayed-job substrate the core publishes to. Delivery is
/// at-least-once; handlers are written idempotent where feasible.
#[async_trait]
pub trait StageQueue: Send + Sync {
    async fn enqueue(&self, stage: &str, payload: Value) -> Result<JobHandle>;
}

/// Serialize `context` merged with `extra` and submit it to the named stage.
///
/// Must be called at most once per terminal transition of a stage — calling
/// it twice duplicates the downstream lifecycle. A scheduling failure is
/// non-fatal to the already-completed work of the current stage, but callers
/// must log it: it silently truncates the lifecycle otherwise.
pub async fn schedule_next_stage(
    queue: &dyn StageQueue,
    context: &TradeJobContext,
    stage: &str,
    extra: Value,
) -> Result<JobHandle> {
    let payload = StagePayload {
        context: context.clone(),
        extra,
    };
    let value = serde_json::to_value(&payload)?;
    let handle = queue.enqueue(stage, value).await?;
    debug!(stage, job_id = %handle.id, trade_id = %context.trade_id, "Scheduled next lifecycle stage");
    Ok(handle)
}

/// In-memory queue for tests and dry runs.
#[derive(Default)]
pub struct MemoryQueue {
    jobs: Mutex<Vec<(String, Value)>>,
    fail: std::sync::atomic::AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent enqueue fail.
    pub fn fail_enqueues(&self) {
        self.fail.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn jobs(&self) -> Vec<(String, Value)> {
        self.jobs.lock().await.clone()
    }

    pub async fn jobs_for(&self, stage: &str) -> Vec<Value> {
        self.jobs
            .lock()
            .await
            .iter()
            .filter(|(s, _)| s == stage)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

#[async_trait]
impl StageQueue for MemoryQueue {
    async fn enqueue(&self, stage: &str, payload: Value) -> Result<JobHandle> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(LegworkError::Queue("queue unavailable".into()));
        }
        self.jobs.lock().await.push((stage.to_string(), payload));
        Ok(JobHandle {
            id: Uuid::new_v4(),
            stage: stage.to_string(),
        })
    }
}
