//! Flatten a trade: cancel live stop legs and close the open positions the
//! entry orders produced.

use std::collections::HashSet;

use futures_util::future::join_all;
use tracing::{debug, error, info, warn};

use crate::domain::{
    OrderIntent, OrderKind, OrderRecord, OrderStatus, TradeJobContext, Validity,
};
use crate::error::Result;
use crate::remote::{ensure_order_state, with_retry};
use crate::store::{TradePatch, UserOverride};

use super::Capabilities;

/// Cancel every still-live stop order belonging to `legs`.
///
/// Matching is by leg identity against today's TRIGGER PENDING orders, not by
/// order id, so it survives stop replacements made by the trailing watcher.
/// Each matched order is cancelled exactly once even when two legs resolve to
/// the same open order.
pub async fn cancel_pending_legs(
    caps: &Capabilities,
    session: &str,
    legs: &[OrderRecord],
) -> Result<()> {
    if legs.is_empty() {
        return Ok(());
    }
    let retry = caps.retry();
    let all_orders = with_retry(|| caps.broker.get_orders(session), &retry).await?;
    let open: Vec<&OrderRecord> = all_orders
        .iter()
        .filter(|o| o.status == OrderStatus::TriggerPending)
        .collect();

    let mut seen = HashSet::new();
    let mut to_cancel = Vec::new();
    for leg in legs {
        match open.iter().find(|o| o.matches_leg(leg)) {
            Some(order) if seen.insert(order.order_id.clone()) => to_cancel.push(*order),
            Some(_) => {}
            None => {
                debug!(symbol = %leg.symbol, "No live stop order for leg, nothing to cancel");
            }
        }
    }

    let cancels = to_cancel.iter().map(|order| {
        let retry = retry.clone();
        async move {
            with_retry(|| caps.broker.cancel_order(order, session), &retry).await?;
            info!(order_id = %order.order_id, symbol = %order.symbol, "Cancelled pending stop order");
            Ok::<(), crate::error::LegworkError>(())
        }
    });
    join_all(cancels)
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;
    Ok(())
}

/// Close the positions opened by `entry_orders` with market orders, each
/// reconciled to COMPLETE. Legs with no containing open position are skipped;
/// that makes a re-run after a partial failure idempotent.
pub async fn square_off_positions(
    caps: &Capabilities,
    session: &str,
    tag: &str,
    entry_orders: &[OrderRecord],
) -> Result<Vec<OrderRecord>> {
    if entry_orders.is_empty() {
        return Ok(Vec::new());
    }
    let retry = caps.retry();
    let positions = with_retry(|| caps.broker.get_positions(session), &retry).await?;

    let mut intents = Vec::new();
    for order in entry_orders {
        match positions.iter().find(|p| p.covers_close_of(order)) {
            Some(position) => {
                intents.push(OrderIntent {
                    symbol: position.symbol.clone(),
                    exchange: position.exchange,
                    product: position.product,
                    transaction_type: position.square_off_side(),
                    quantity: position.clamped_close_quantity(order),
                    order_type: OrderKind::Market,
                    trigger_price: None,
                    price: None,
                    validity: Validity::Day,
                    tag: tag.to_string(),
                });
            }
            None => {
                // Already flat (stop hit, or a previous square-off run got it).
                debug!(symbol = %order.symbol, "No open position covers leg, skipping square-off");
            }
        }
    }

    let ops = intents.iter().map(|intent| {
        ensure_order_state(
            caps.broker.as_ref(),
            intent,
            OrderStatus::Complete,
            session,
            &caps.config.reconcile,
            &retry,
        )
    });
    let closed = join_all(ops)
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;
    info!(count = closed.len(), tag, "Squared off positions");
    Ok(closed)
}

/// Square off with the trade's own settings: close the positions and, when
/// the trade asks for it, flag the trade aborted in the store. The store
/// patch is best-effort — the positions are already flat.
pub async fn square_off_for_trade(
    caps: &Capabilities,
    context: &TradeJobContext,
    entry_orders: &[OrderRecord],
) -> Result<Vec<OrderRecord>> {
    let closed = square_off_positions(
        caps,
        &context.session_token,
        &context.order_tag,
        entry_orders,
    )
    .await?;

    if context.on_square_off_set_aborted {
        let patch = TradePatch {
            user_override: Some(UserOverride::Abort),
            ..Default::default()
        };
        if let Err(e) = caps.store.patch(&context.trade_id, patch).await {
            warn!(trade_id = %context.trade_id, error = %e, "Failed to flag trade aborted after square-off");
        }
    }
    Ok(closed)
}

/// Full square-off entry point: optionally cancel live stop legs first, then
/// flatten. A cancellation failure is logged and does not block the
/// square-off itself.
pub async fn auto_square_off(
    caps: &Capabilities,
    context: &TradeJobContext,
    entry_orders: &[OrderRecord],
    delete_pending_orders: bool,
) -> Result<Vec<OrderRecord>> {
    if delete_pending_orders {
        if let Err(e) = cancel_pending_legs(caps, &context.session_token, entry_orders).await {
            error!(trade_id = %context.trade_id, error = %e, "Failed cancelling pending legs before square-off");
        }
    }
    square_off_for_trade(caps, context, entry_orders).await
}
