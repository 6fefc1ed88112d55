//! Protective stop-loss placement for each filled entry leg, plus the
//! handoff to the per-order trailing watchers.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use tracing::{info, warn};

use crate::domain::{
    OrderIntent, OrderKind, OrderRecord, OrderStatus, TradeJobContext, TransactionType, Validity,
};
use crate::error::{LegworkError, Result};
use crate::queue::{schedule_next_stage, WATCHER_Q_NAME};
use crate::remote::{attempt_broker_orders, ensure_order_state};
use crate::util::round2;

use super::auto_square_off::{cancel_pending_legs, square_off_positions};
use super::Capabilities;

/// Rewrite a stop-market intent into a stop-limit one.
///
/// The limit sits `sl_limit_price_percent` of the trigger beyond it, in the
/// direction the order fills. When rounding collapses limit onto trigger the
/// limit is nudged a tick away, since the broker rejects the degenerate pair.
pub fn convert_slm_to_sll(mut intent: OrderIntent, sl_limit_price_percent: Decimal) -> OrderIntent {
    let trigger = match intent.trigger_price {
        Some(t) => t,
        None => return intent,
    };
    let offset = sl_limit_price_percent / Decimal::ONE_HUNDRED * trigger;
    let mut limit = match intent.transaction_type {
        // A buy stop fills above its trigger, a sell stop below.
        TransactionType::Buy => trigger + offset,
        TransactionType::Sell => trigger - offset,
    };
    limit = round2(limit);
    if limit == trigger {
        limit = match intent.transaction_type {
            TransactionType::Buy => trigger + dec!(0.1),
            TransactionType::Sell => trigger - dec!(0.1),
        };
    }
    intent.order_type = OrderKind::StopLimit;
    intent.price = Some(limit);
    intent
}

/// Derive the protective stop intent for one filled entry leg: the opposite
/// side, triggered `slm_percent` of the fill price into loss territory.
fn leg_exit_intent(entry: &OrderRecord, context: &TradeJobContext) -> Result<OrderIntent> {
    let average_price = entry.average_price.ok_or_else(|| {
        LegworkError::Internal(format!(
            "entry order {} has no average price",
            entry.order_id
        ))
    })?;
    let offset = context.slm_percent / Decimal::ONE_HUNDRED * average_price;
    let (side, trigger) = match entry.transaction_type {
        // Short entry loses as the premium rises.
        TransactionType::Sell => (TransactionType::Buy, average_price + offset),
        TransactionType::Buy => (TransactionType::Sell, average_price - offset),
    };
    let intent = OrderIntent {
        symbol: entry.symbol.clone(),
        exchange: entry.exchange,
        product: entry.product,
        transaction_type: side,
        quantity: entry.quantity.abs(),
        order_type: OrderKind::StopMarket,
        trigger_price: Some(round2(trigger)),
        price: None,
        validity: Validity::Day,
        tag: context.order_tag.clone(),
    };
    Ok(convert_slm_to_sll(intent, context.sl_limit_price_percent))
}

/// Place a stop-loss order for every filled entry leg and hand each live
/// stop to its own trailing watcher.
///
/// All stops are placed as one batch reconciled to TRIGGER PENDING. On a
/// partial batch with the exit rollback flag set, the stops that did go live
/// are cancelled and the underlying positions squared off, then the whole
/// stage fails as rolled back. Without the flag the partial set is kept and
/// handed off. A watcher scheduling failure never undoes a live stop; it is
/// logged and the stop stays unwatched.
pub async fn individual_leg_exit_orders(
    caps: &Capabilities,
    context: &TradeJobContext,
    entry_orders: &[OrderRecord],
) -> Result<Vec<OrderRecord>> {
    if entry_orders.is_empty() {
        return Ok(Vec::new());
    }

    let intents = entry_orders
        .iter()
        .map(|entry| leg_exit_intent(entry, context))
        .collect::<Result<Vec<_>>>()?;

    let retry = caps.retry();
    let ops = intents.iter().map(|intent| {
        ensure_order_state(
            caps.broker.as_ref(),
            intent,
            OrderStatus::TriggerPending,
            &context.session_token,
            &caps.config.reconcile,
            &retry,
        )
    });
    let outcome = attempt_broker_orders(ops.collect()).await;

    if !outcome.all_ok && context.rollback.on_broken_exit_orders {
        let placed = outcome.successful();
        warn!(
            trade_id = %context.trade_id,
            placed = placed.len(),
            failed = outcome.failures().len(),
            "Partial stop-loss batch, rolling back"
        );
        cancel_pending_legs(caps, &context.session_token, &placed).await?;
        square_off_positions(
            caps,
            &context.session_token,
            &context.order_tag,
            entry_orders,
        )
        .await?;
        return Err(LegworkError::RolledBack(
            "stop-loss batch broken, exit orders cancelled and positions squared off".into(),
        ));
    }

    let stops = outcome.successful();
    for stop in &stops {
        let extra = json!({ "pending_order": stop });
        match schedule_next_stage(caps.queue.as_ref(), context, WATCHER_Q_NAME, extra).await {
            Ok(handle) => {
                info!(order_id = %stop.order_id, job_id = %handle.id, "Stop-loss watcher scheduled");
            }
            Err(e) => {
                warn!(order_id = %stop.order_id, error = %e, "Failed to schedule stop-loss watcher, stop is live but unwatched");
            }
        }
    }
    Ok(stops)
}
