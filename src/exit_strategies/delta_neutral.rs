//! Delta-neutral exit checker: one tick of the loop that squares the trade
//! off once the straddle's net delta drifts past the configured threshold.

use chrono::Utc;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::domain::{OrderRecord, TradeJobContext};
use crate::error::{LegworkError, Result};
use crate::indicator::{OptionChainEntry, OptionSide};
use crate::queue::{schedule_next_stage, EXIT_TRADING_Q_NAME};
use crate::remote::with_retry;
use crate::store::{patch_live_delta_diff, trade_heartbeat, UserOverride};

use super::auto_square_off::square_off_for_trade;
use super::{Capabilities, StrategyOutcome};

/// Run one delta check for the trade.
///
/// Below the threshold the checker heartbeats, records the live diff, and
/// re-queues itself; at or above it the positions are squared off and the
/// lifecycle resolves. Any failure also resolves the checker: a monitoring
/// loop that cannot observe the market must stop rather than spin, and the
/// protective stop legs remain live without it.
pub async fn delta_neutral_exit(
    caps: &Capabilities,
    context: &TradeJobContext,
    leg_orders: &[OrderRecord],
    square_off_orders: &[OrderRecord],
) -> Result<StrategyOutcome> {
    match check_once(caps, context, leg_orders, square_off_orders).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            warn!(trade_id = %context.trade_id, error = %e, "Delta checker terminated on error");
            Ok(StrategyOutcome::Resolved(format!(
                "delta checker terminated: {e}"
            )))
        }
    }
}

async fn check_once(
    caps: &Capabilities,
    context: &TradeJobContext,
    leg_orders: &[OrderRecord],
    square_off_orders: &[OrderRecord],
) -> Result<StrategyOutcome> {
    if Utc::now() >= context.market_close_at {
        return Ok(StrategyOutcome::Resolved(
            "market close reached, delta checker stopped".into(),
        ));
    }

    let retry = caps.retry();

    // Heartbeat doubles as the user-override read. A store outage must not
    // kill the checker, so it degrades to a warning.
    match with_retry(|| trade_heartbeat(caps.store.as_ref(), &context.trade_id), &retry).await {
        Ok(state) if state.user_override == Some(UserOverride::Abort) => {
            return Ok(StrategyOutcome::Resolved("aborted by user override".into()));
        }
        Ok(_) => {}
        Err(e) => {
            warn!(trade_id = %context.trade_id, error = %e, "Trade heartbeat failed, continuing without override check");
        }
    }

    let delta_diff = live_delta_diff(caps, context, leg_orders).await?;

    if delta_diff < context.delta_threshold {
        debug!(
            trade_id = %context.trade_id,
            delta_diff,
            threshold = context.delta_threshold,
            "Delta diff below threshold, re-queueing"
        );
        if let Some(diff) = Decimal::from_f64(delta_diff) {
            if let Err(e) = with_retry(
                || patch_live_delta_diff(caps.store.as_ref(), &context.trade_id, diff),
                &retry,
            )
            .await
            {
                debug!(trade_id = %context.trade_id, error = %e, "Failed to record live delta diff");
            }
        }
        sleep(caps.config.exit.requeue_delay()).await;
        let extra = json!({
            "leg_orders": leg_orders,
            "square_off_orders": square_off_orders,
        });
        let handle =
            schedule_next_stage(caps.queue.as_ref(), context, EXIT_TRADING_Q_NAME, extra).await?;
        return Ok(StrategyOutcome::Continue(handle));
    }

    info!(
        trade_id = %context.trade_id,
        delta_diff,
        threshold = context.delta_threshold,
        "Delta threshold crossed, squaring off"
    );
    square_off_for_trade(caps, context, square_off_orders).await?;
    Ok(StrategyOutcome::Resolved(format!(
        "delta diff {delta_diff:.2} crossed threshold {}, trade squared off",
        context.delta_threshold
    )))
}

/// Absolute difference between the call delta and the absolute put delta of
/// the trade's legs, in delta-percent points.
async fn live_delta_diff(
    caps: &Capabilities,
    context: &TradeJobContext,
    leg_orders: &[OrderRecord],
) -> Result<f64> {
    let call_symbol = leg_symbol(leg_orders, "CE")?;
    let put_symbol = leg_symbol(leg_orders, "PE")?;

    let expiry = caps.option_chain.nearest_expiry(&context.instrument).await?;
    let chain = caps
        .option_chain
        .option_chain(&context.instrument, &expiry)
        .await?;

    let call_delta = strike_delta(&chain, OptionSide::Ce, &call_symbol)?;
    let put_delta = strike_delta(&chain, OptionSide::Pe, &put_symbol)?;

    Ok((call_delta - put_delta.abs()).abs() * 100.0)
}

fn leg_symbol(leg_orders: &[OrderRecord], kind: &str) -> Result<String> {
    leg_orders
        .iter()
        .find(|o| o.symbol.ends_with(kind))
        .map(|o| o.symbol.clone())
        .ok_or_else(|| LegworkError::Internal(format!("trade has no {kind} leg")))
}

fn strike_delta(chain: &[OptionChainEntry], side: OptionSide, symbol: &str) -> Result<f64> {
    chain
        .iter()
        .find(|entry| {
            entry.option_type == side && symbol.contains(&entry.strike_price.to_string())
        })
        .map(|entry| entry.delta)
        .ok_or_else(|| {
            LegworkError::Internal(format!("option chain has no entry matching {symbol}"))
        })
}
