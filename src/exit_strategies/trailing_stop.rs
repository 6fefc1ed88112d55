//! Trailing stop-loss watcher: one tick of the loop that ratchets a leg's
//! stop order toward the market along the supertrend line.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use tracing::{error, info, warn};

use crate::domain::{OrderIntent, OrderKind, OrderRecord, OrderStatus, TradeJobContext};
use crate::error::{LegworkError, Result};
use crate::indicator::{SupertrendQuery, TrendDirection};
use crate::queue::{schedule_next_stage, WATCHER_Q_NAME};
use crate::remote::{attempt_broker_orders, ensure_order_state, with_retry};
use crate::util::{last_open_date_since, nearest_closed_candle_time, percentage_change};

use super::auto_square_off::square_off_positions;
use super::individual_leg_exit::convert_slm_to_sll;
use super::{Capabilities, StrategyOutcome};

const CANDLE_INTERVAL: &str = "5minute";
const CANDLE_INTERVAL_MINUTES: i64 = 5;
const SUPERTREND_PERIOD: u32 = 10;
const SUPERTREND_MULTIPLIER: u32 = 3;
/// Minimum improvement over the punched trigger before a modify is worth it.
const MIN_TRAIL_PERCENT: Decimal = dec!(3);

/// Per-leg inputs of one watcher tick.
pub struct TrailingInputs<'a> {
    /// The live stop order being watched.
    pub pending_stop: &'a OrderRecord,
    /// Instrument token of the option itself, for the indicator service.
    pub option_instrument_token: &'a str,
    /// Hedge leg to square off once the stop fills.
    pub hedge_order: Option<&'a OrderRecord>,
}

/// Run one trailing check for a stop order.
///
/// Terminal stop states resolve the watcher: a cancelled stop means someone
/// else owns the exit now, a completed stop means the leg is closed (and the
/// hedge, if any, is squared off). A live stop is trailed to the supertrend
/// line when the trend is down and the improvement is worth a modification.
/// Ticks that change nothing fail with the non-terminal
/// `NoTrailingRequired`, leaving the scheduler's job in place.
pub async fn min_x_percent_or_supertrend(
    caps: &Capabilities,
    context: &TradeJobContext,
    inputs: &TrailingInputs<'_>,
) -> Result<StrategyOutcome> {
    let retry = caps.retry();
    let session = &context.session_token;

    let history = with_retry(
        || caps.broker.get_order_history(&inputs.pending_stop.order_id, session),
        &retry,
    )
    .await?;

    // Most recent status wins.
    let latest_terminal = history.iter().rev().find(|o| o.status.is_terminal());
    match latest_terminal.map(|o| &o.status) {
        Some(OrderStatus::Cancelled) | Some(OrderStatus::Rejected) => {
            return Ok(StrategyOutcome::Resolved(
                "stop order no longer live, watcher stopped".into(),
            ));
        }
        Some(OrderStatus::Complete) => {
            if let Some(hedge) = inputs.hedge_order {
                if let Err(e) = square_off_positions(
                    caps,
                    session,
                    &context.order_tag,
                    std::slice::from_ref(hedge),
                )
                .await
                {
                    warn!(symbol = %hedge.symbol, error = %e, "Failed to square off hedge after stop fill");
                }
            }
            return Ok(StrategyOutcome::Resolved(
                "stop order filled, leg closed".into(),
            ));
        }
        _ => {}
    }

    let live_stop = history
        .iter()
        .rev()
        .find(|o| o.status == OrderStatus::TriggerPending)
        .ok_or_else(|| {
            LegworkError::Internal(format!(
                "order {} has no live trigger-pending state",
                inputs.pending_stop.order_id
            ))
        })?;
    let current_trigger = live_stop.trigger_price.ok_or_else(|| {
        LegworkError::Internal(format!(
            "stop order {} carries no trigger price",
            live_stop.order_id
        ))
    })?;

    let now = Utc::now();
    let query = SupertrendQuery {
        instrument_token: inputs.option_instrument_token.to_string(),
        from_date: format!("{} 09:15:00", last_open_date_since(now).format("%Y-%m-%d")),
        to_date: nearest_closed_candle_time(now, CANDLE_INTERVAL_MINUTES)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        interval: CANDLE_INTERVAL.into(),
        period: SUPERTREND_PERIOD,
        multiplier: SUPERTREND_MULTIPLIER,
        latest_only: true,
    };
    let ticks = with_retry(|| caps.trend.supertrend(&query), &retry).await?;
    let latest = ticks.last().ok_or_else(|| {
        LegworkError::Internal("indicator returned no supertrend candles".into())
    })?;

    let supertrend = latest.value.floor();
    let cushion = (supertrend * 0.1).min(10.0);
    let new_trigger = Decimal::from((supertrend + cushion).floor() as i64);

    let improvement = percentage_change(current_trigger, new_trigger);
    let should_trail = latest.direction == TrendDirection::Down
        && new_trigger < current_trigger
        && improvement >= MIN_TRAIL_PERCENT;
    if !should_trail {
        return Err(LegworkError::NoTrailingRequired(format!(
            "supertrend {} gives trigger {} against current {} ({:.2}% move)",
            latest.value, new_trigger, current_trigger, improvement
        )));
    }

    // The stop keeps its SL-limit shape, so derive the matching limit price.
    let replacement = replacement_intent(live_stop, new_trigger, context);

    match caps
        .broker
        .modify_order(live_stop, new_trigger, replacement.price, session)
        .await
    {
        Ok(()) => {
            info!(
                order_id = %live_stop.order_id,
                from = %current_trigger,
                to = %new_trigger,
                "Stop order trailed"
            );
            Err(LegworkError::NoTrailingRequired(
                "stop trailed, watcher continues".into(),
            ))
        }
        Err(LegworkError::ModificationLimitExceeded) => {
            info!(order_id = %live_stop.order_id, "Modification limit hit, replacing stop order");
            match replace_stop(caps, context, live_stop, replacement, inputs).await {
                Ok(reason) => Ok(StrategyOutcome::Resolved(reason)),
                Err(e) => {
                    warn!(order_id = %live_stop.order_id, error = %e, "Stop replacement failed, keeping original stop");
                    Ok(StrategyOutcome::Resolved(format!(
                        "modification limit exceeded and replacement failed: {e}"
                    )))
                }
            }
        }
        Err(e) => {
            error!(order_id = %live_stop.order_id, error = %e, "Stop modification failed");
            Err(LegworkError::NoTrailingRequired(
                "modification failed, retrying on next tick".into(),
            ))
        }
    }
}

fn replacement_intent(
    live_stop: &OrderRecord,
    new_trigger: Decimal,
    context: &TradeJobContext,
) -> OrderIntent {
    let intent = OrderIntent {
        symbol: live_stop.symbol.clone(),
        exchange: live_stop.exchange,
        product: live_stop.product,
        transaction_type: live_stop.transaction_type,
        quantity: live_stop.quantity.abs(),
        order_type: OrderKind::StopMarket,
        trigger_price: Some(new_trigger),
        price: None,
        validity: live_stop.validity,
        tag: context.order_tag.clone(),
    };
    convert_slm_to_sll(intent, context.sl_limit_price_percent)
}

/// Replace an unmodifiable stop: the new stop must be confirmed live before
/// the old one is cancelled, so the leg is never unprotected. This watcher
/// then resolves in favour of a fresh one bound to the new order id.
async fn replace_stop(
    caps: &Capabilities,
    context: &TradeJobContext,
    old_stop: &OrderRecord,
    replacement: OrderIntent,
    inputs: &TrailingInputs<'_>,
) -> Result<String> {
    let retry = caps.retry();
    let session = &context.session_token;

    let outcome = attempt_broker_orders(vec![ensure_order_state(
        caps.broker.as_ref(),
        &replacement,
        OrderStatus::TriggerPending,
        session,
        &caps.config.reconcile,
        &retry,
    )])
    .await;
    let new_stop = outcome
        .successful()
        .into_iter()
        .next()
        .ok_or_else(|| LegworkError::Internal("replacement stop never went live".into()))?;

    with_retry(|| caps.broker.cancel_order(old_stop, session), &retry).await?;

    let extra = json!({
        "pending_order": new_stop,
        "option_instrument_token": inputs.option_instrument_token,
        "hedge_order": inputs.hedge_order,
    });
    let handle =
        schedule_next_stage(caps.queue.as_ref(), context, WATCHER_Q_NAME, extra).await?;
    info!(
        old_order_id = %old_stop.order_id,
        new_order_id = %new_stop.order_id,
        job_id = %handle.id,
        "Stop order replaced and new watcher scheduled"
    );
    Ok(format!(
        "stop {} replaced by {} after modification limit",
        old_stop.order_id, new_stop.order_id
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerClient, PaperBroker, RemoteCall};
    use crate::config::AppConfig;
    use crate::domain::{
        Exchange, ProductType, RollbackPolicy, TransactionType, Validity, VolatilityType,
    };
    use crate::indicator::doubles::{StaticOptionChain, StaticTrend};
    use crate::indicator::SupertrendTick;
    use crate::queue::MemoryQueue;
    use crate::store::MemoryTradeStore;
    use std::sync::Arc;

    fn fast_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.retry.delay_ms = 1;
        config.reconcile.poll_delay_ms = 1;
        config.reconcile.max_polls = 3;
        config
    }

    struct Harness {
        caps: Capabilities,
        broker: Arc<PaperBroker>,
        queue: Arc<MemoryQueue>,
        trend: Arc<StaticTrend>,
    }

    fn harness() -> Harness {
        let broker = Arc::new(PaperBroker::new());
        let queue = Arc::new(MemoryQueue::new());
        let trend = Arc::new(StaticTrend::default());
        let caps = Capabilities {
            broker: broker.clone(),
            queue: queue.clone(),
            store: Arc::new(MemoryTradeStore::new()),
            option_chain: Arc::new(StaticOptionChain {
                expiry: "24AUG".into(),
                chain: Vec::new(),
            }),
            trend: trend.clone(),
            config: fast_config(),
        };
        Harness {
            caps,
            broker,
            queue,
            trend,
        }
    }

    fn context() -> TradeJobContext {
        TradeJobContext {
            trade_id: "trade-1".into(),
            session_token: "tok".into(),
            instrument: "NIFTY".into(),
            underlying_symbol: "NIFTY 50".into(),
            nfo_symbol: "NIFTY".into(),
            exchange: Exchange::Nfo,
            product: ProductType::Mis,
            lot_size: 50,
            lots: 1,
            strike_step_size: 50,
            order_tag: "LWK1".into(),
            slm_percent: dec!(50),
            sl_limit_price_percent: dec!(1),
            delta_threshold: 30.0,
            rollback: RollbackPolicy::default(),
            on_square_off_set_aborted: false,
            market_close_at: Utc::now() + chrono::Duration::hours(4),
            max_skew_percent: dec!(10),
            threshold_skew_percent: None,
            take_trade_irrespective_skew: false,
            expires_at: Utc::now() + chrono::Duration::minutes(10),
            is_hedge_enabled: false,
            hedge_distance: 0,
            volatility: VolatilityType::Short,
        }
    }

    async fn live_stop(broker: &PaperBroker, symbol: &str, trigger: Decimal) -> OrderRecord {
        let intent = OrderIntent {
            symbol: symbol.into(),
            exchange: Exchange::Nfo,
            product: ProductType::Mis,
            transaction_type: TransactionType::Buy,
            quantity: 50,
            order_type: OrderKind::StopMarket,
            trigger_price: Some(trigger),
            price: None,
            validity: Validity::Day,
            tag: "LWK1".into(),
        };
        let ack = broker.place_order(&intent, "tok").await.unwrap();
        broker
            .get_order_history(&ack.order_id, "tok")
            .await
            .unwrap()
            .last()
            .unwrap()
            .clone()
    }

    fn down_tick(value: f64) -> SupertrendTick {
        SupertrendTick {
            value,
            direction: TrendDirection::Down,
        }
    }

    #[tokio::test]
    async fn cancelled_stop_resolves_the_watcher() {
        let h = harness();
        let stop = live_stop(&h.broker, "NIFTY24AUG24000CE", dec!(150)).await;
        h.broker.force_status(&stop.order_id, OrderStatus::Cancelled);

        let outcome = min_x_percent_or_supertrend(
            &h.caps,
            &context(),
            &TrailingInputs {
                pending_stop: &stop,
                option_instrument_token: "12345",
                hedge_order: None,
            },
        )
        .await
        .unwrap();
        assert!(matches!(outcome, StrategyOutcome::Resolved(_)));
    }

    #[tokio::test]
    async fn filled_stop_squares_off_hedge_and_resolves() {
        let h = harness();
        let stop = live_stop(&h.broker, "NIFTY24AUG24000CE", dec!(150)).await;
        h.broker.force_status(&stop.order_id, OrderStatus::Complete);

        let mut hedge = stop.clone();
        hedge.order_id = "hedge-1".into();
        hedge.symbol = "NIFTY24AUG24500CE".into();
        hedge.transaction_type = TransactionType::Buy;
        h.broker
            .set_position("NIFTY24AUG24500CE", Exchange::Nfo, ProductType::Mis, 50);

        let outcome = min_x_percent_or_supertrend(
            &h.caps,
            &context(),
            &TrailingInputs {
                pending_stop: &stop,
                option_instrument_token: "12345",
                hedge_order: Some(&hedge),
            },
        )
        .await
        .unwrap();

        assert!(matches!(outcome, StrategyOutcome::Resolved(_)));
        assert_eq!(h.broker.net_position("NIFTY24AUG24500CE"), 0);
    }

    #[tokio::test]
    async fn uptrend_never_trails() {
        let h = harness();
        let stop = live_stop(&h.broker, "NIFTY24AUG24000CE", dec!(150)).await;
        h.trend.set_ticks(vec![SupertrendTick {
            value: 100.3,
            direction: TrendDirection::Up,
        }]);

        let err = min_x_percent_or_supertrend(
            &h.caps,
            &context(),
            &TrailingInputs {
                pending_stop: &stop,
                option_instrument_token: "12345",
                hedge_order: None,
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, LegworkError::NoTrailingRequired(_)));
        assert!(!h
            .broker
            .calls()
            .iter()
            .any(|c| matches!(c, RemoteCall::Modify { .. })));
    }

    #[tokio::test]
    async fn small_improvement_is_not_worth_a_modify() {
        let h = harness();
        // supertrend 100.3 -> trigger 110; against 112 that is only ~1.8%
        let stop = live_stop(&h.broker, "NIFTY24AUG24000CE", dec!(112)).await;
        h.trend.set_ticks(vec![down_tick(100.3)]);

        let err = min_x_percent_or_supertrend(
            &h.caps,
            &context(),
            &TrailingInputs {
                pending_stop: &stop,
                option_instrument_token: "12345",
                hedge_order: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LegworkError::NoTrailingRequired(_)));
    }

    #[tokio::test]
    async fn downtrend_trails_the_trigger() {
        let h = harness();
        let stop = live_stop(&h.broker, "NIFTY24AUG24000CE", dec!(150)).await;
        // floor(100.3) = 100, cushion min(10, 10) = 10, new trigger 110
        h.trend.set_ticks(vec![down_tick(100.3)]);

        let err = min_x_percent_or_supertrend(
            &h.caps,
            &context(),
            &TrailingInputs {
                pending_stop: &stop,
                option_instrument_token: "12345",
                hedge_order: None,
            },
        )
        .await
        .unwrap_err();

        // non-terminal: the watcher keeps running against the same order
        assert!(matches!(err, LegworkError::NoTrailingRequired(_)));
        let modified = h
            .broker
            .calls()
            .into_iter()
            .find_map(|c| match c {
                RemoteCall::Modify { new_trigger, .. } => Some(new_trigger),
                _ => None,
            })
            .unwrap();
        assert_eq!(modified, dec!(110));
    }

    #[tokio::test]
    async fn modification_limit_replaces_before_cancelling() {
        let h = harness();
        let stop = live_stop(&h.broker, "NIFTY24AUG24000CE", dec!(150)).await;
        h.trend.set_ticks(vec![down_tick(100.3)]);
        h.broker.set_modification_limit_exceeded(true);

        let outcome = min_x_percent_or_supertrend(
            &h.caps,
            &context(),
            &TrailingInputs {
                pending_stop: &stop,
                option_instrument_token: "12345",
                hedge_order: None,
            },
        )
        .await
        .unwrap();

        assert!(matches!(outcome, StrategyOutcome::Resolved(_)));

        // replacement placed and live before the old stop was cancelled
        let calls = h.broker.calls();
        let place_at = calls
            .iter()
            .position(|c| matches!(c, RemoteCall::Place(i) if i.trigger_price == Some(dec!(110))))
            .unwrap();
        let cancel_at = calls
            .iter()
            .position(|c| matches!(c, RemoteCall::Cancel(id) if *id == stop.order_id))
            .unwrap();
        assert!(place_at < cancel_at);

        // a fresh watcher picks up the replacement order
        assert_eq!(h.queue.jobs_for(WATCHER_Q_NAME).await.len(), 1);
    }

    #[tokio::test]
    async fn failed_replacement_resolves_and_keeps_old_stop() {
        let h = harness();
        let stop = live_stop(&h.broker, "NIFTY24AUG24000CE", dec!(150)).await;
        h.trend.set_ticks(vec![down_tick(100.3)]);
        h.broker.set_modification_limit_exceeded(true);
        h.broker.fail_placements_for("NIFTY24AUG24000CE");

        let outcome = min_x_percent_or_supertrend(
            &h.caps,
            &context(),
            &TrailingInputs {
                pending_stop: &stop,
                option_instrument_token: "12345",
                hedge_order: None,
            },
        )
        .await
        .unwrap();

        match outcome {
            StrategyOutcome::Resolved(reason) => assert!(reason.contains("replacement failed")),
            other => panic!("expected Resolved, got {other:?}"),
        }
        // the old stop was never cancelled
        assert!(h.broker.cancelled_order_ids().is_empty());
    }
}
