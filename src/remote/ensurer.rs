//! Order reconciliation: place once, then poll the broker's eventually
//! consistent ledger until the order reaches a target state.

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::broker::BrokerClient;
use crate::config::ReconcileConfig;
use crate::domain::{OrderIntent, OrderRecord, OrderStatus};
use crate::error::{LegworkError, Result};

use super::retry::{with_retry, RetryPolicy};

/// Place `intent` once and poll its history until the most recent status
/// transition matches `target`.
///
/// Placement is deliberately not retried: after a placement failure the
/// remote side may or may not hold a live order, and re-submitting
/// ambiguously risks duplicate fills. History polls are individually wrapped
/// in the retry engine; the overall budget is `config.max_polls` polls.
///
/// History is scanned most-recent-first, so a CANCELLED entry earlier in
/// history never masks a later COMPLETE. A more recent terminal status that
/// is not the target fails immediately.
pub async fn ensure_order_state(
    broker: &dyn BrokerClient,
    intent: &OrderIntent,
    target: OrderStatus,
    session: &str,
    config: &ReconcileConfig,
    retry: &RetryPolicy,
) -> Result<OrderRecord> {
    let ack = broker
        .place_order(intent, session)
        .await
        .map_err(|e| LegworkError::OrderPlacement(e.to_string()))?;

    debug!(order_id = %ack.order_id, symbol = %intent.symbol, target = %target, "Order placed, reconciling");

    for poll in 1..=config.max_polls {
        let history = with_retry(
            || broker.get_order_history(&ack.order_id, session),
            retry,
        )
        .await?;

        // Broker returns chronological order; most recent last.
        for record in history.iter().rev() {
            if record.status == target {
                return Ok(record.clone());
            }
            if record.status.is_terminal() {
                warn!(
                    order_id = %ack.order_id,
                    observed = %record.status,
                    target = %target,
                    "Order settled in a different terminal state"
                );
                return Err(LegworkError::OrderNeverReachedState {
                    order_id: ack.order_id.clone(),
                    target,
                });
            }
        }

        debug!(order_id = %ack.order_id, poll, max_polls = config.max_polls, "Target state not reached yet");
        if poll < config.max_polls {
            sleep(config.poll_delay()).await;
        }
    }

    Err(LegworkError::OrderNeverReachedState {
        order_id: ack.order_id,
        target,
    })
}
