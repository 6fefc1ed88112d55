//! Settle-all batch execution of independent order operations.

use std::future::Future;

use futures_util::future::join_all;
use tracing::warn;

use crate::domain::OrderRecord;
use crate::error::{LegworkError, Result};

/// Aggregate result of a batch: per-operation outcomes in submission order.
///
/// A single operation's failure never cancels its siblings — in-flight broker
/// calls cannot be aborted, and the caller needs the full set of orders that
/// did succeed in order to roll them back when the batch as a whole is
/// considered broken.
#[derive(Debug)]
pub struct BatchOutcome {
    pub all_ok: bool,
    pub settled: Vec<Result<OrderRecord>>,
}

impl BatchOutcome {
    /// The orders that individually succeeded, in submission order.
    pub fn successful(&self) -> Vec<OrderRecord> {
        self.settled
            .iter()
            .filter_map(|r| r.as_ref().ok().cloned())
            .collect()
    }

    pub fn failures(&self) -> Vec<&LegworkError> {
        self.settled.iter().filter_map(|r| r.as_ref().err()).collect()
    }
}

/// Run all order operations concurrently and wait for every one to settle.
///
/// The batch is a synchronization barrier: callers proceed only once all
/// operations have settled, never on first-success or first-failure.
pub async fn attempt_broker_orders<F>(ops: Vec<F>) -> BatchOutcome
where
    F: Future<Output = Result<OrderRecord>>,
{
    let settled = join_all(ops).await;
    let all_ok = settled.iter().all(|r| r.is_ok());

    if !all_ok {
        for err in settled.iter().filter_map(|r| r.as_ref().err()) {
            warn!(error = %err, "Batch order operation failed");
        }
    }

    BatchOutcome { all_ok, settled }
}
