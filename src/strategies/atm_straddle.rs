//! ATM short/long straddle entry: pick the at-the-money strike, wait out
//! premium skew, place hedges before the primary legs, and hand the filled
//! trade to the exit-trading stage.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde_json::json;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::domain::{
    OrderIntent, OrderKind, OrderRecord, OrderStatus, TradeJobContext, TransactionType, Validity,
    VolatilityType,
};
use crate::error::{LegworkError, Result};
use crate::exit_strategies::{square_off_positions, Capabilities};
use crate::queue::{schedule_next_stage, JobHandle, EXIT_TRADING_Q_NAME};
use crate::remote::{attempt_broker_orders, ensure_order_state, with_retry};
use crate::util::skew_percent;

/// The opened straddle, ready for the exit stages.
#[derive(Debug)]
pub struct StraddleOutcome {
    pub atm_strike: i64,
    pub call_symbol: String,
    pub put_symbol: String,
    /// The filled primary legs the exit orders protect.
    pub entry_orders: Vec<OrderRecord>,
    /// Everything that must be flattened on square-off, hedges included.
    pub square_off_orders: Vec<OrderRecord>,
    /// The scheduled exit-trading job, if the handoff succeeded.
    pub exit_job: Option<JobHandle>,
}

struct SelectedStraddle {
    atm_strike: i64,
    call_symbol: String,
    put_symbol: String,
}

fn strike_symbol(context: &TradeJobContext, expiry: &str, strike: i64, kind: &str) -> String {
    format!("{}{}{}{}", context.nfo_symbol, expiry, strike, kind)
}

/// Skew ceiling for entering right now.
///
/// With most of the entry window still ahead the full `max_skew_percent` is
/// acceptable; as the window drains the ceiling tightens linearly toward
/// `threshold_skew_percent`, so a late entry demands a cleaner straddle.
fn entry_skew_ceiling(
    context: &TradeJobContext,
    start_time: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Decimal {
    let threshold = match context.threshold_skew_percent {
        Some(t) => t,
        None => return context.max_skew_percent,
    };
    let total_ms = (context.expires_at - start_time).num_milliseconds().max(1);
    let remaining_ms = (context.expires_at - now).num_milliseconds().clamp(0, total_ms);
    let remaining = remaining_ms as f64 / total_ms as f64;
    if remaining >= 0.5 {
        return context.max_skew_percent;
    }
    let weight = remaining / 0.5;
    let max = context.max_skew_percent.to_f64().unwrap_or(0.0);
    let floor = threshold.to_f64().unwrap_or(0.0);
    let blended = (floor + (max - floor) * weight).round();
    Decimal::from_f64(blended).unwrap_or(context.max_skew_percent)
}

/// Pick the ATM strike and wait until the straddle's premium skew is
/// acceptable. The wait is bounded by the trade's entry window: once
/// `expires_at` passes, the trade is either punched regardless of skew or
/// given up, depending on `take_trade_irrespective_skew`.
async fn select_straddle(
    caps: &Capabilities,
    context: &TradeJobContext,
    start_time: DateTime<Utc>,
) -> Result<SelectedStraddle> {
    let retry = caps.retry();
    let session = &context.session_token;
    let mut attempt = 0u32;

    loop {
        let now = Utc::now();
        let underlying_ltp = with_retry(
            || {
                caps.broker.last_traded_price(
                    &context.underlying_symbol,
                    crate::domain::Exchange::Nse,
                    session,
                )
            },
            &retry,
        )
        .await?;
        let step = Decimal::from(context.strike_step_size);
        let atm_strike = (underlying_ltp / step)
            .round()
            .to_i64()
            .ok_or_else(|| {
                LegworkError::Internal(format!("bad underlying quote {underlying_ltp}"))
            })?
            * context.strike_step_size;

        let expiry = caps.option_chain.nearest_expiry(&context.instrument).await?;
        let selected = SelectedStraddle {
            atm_strike,
            call_symbol: strike_symbol(context, &expiry, atm_strike, "CE"),
            put_symbol: strike_symbol(context, &expiry, atm_strike, "PE"),
        };

        if now > context.expires_at {
            if context.take_trade_irrespective_skew {
                warn!(trade_id = %context.trade_id, "Entry window expired, punching regardless of skew");
                return Ok(selected);
            }
            return Err(LegworkError::Validation(
                "entry window expired without acceptable premium skew".into(),
            ));
        }

        let ceiling = entry_skew_ceiling(context, start_time, now);
        let call_ltp = with_retry(
            || {
                caps.broker
                    .last_traded_price(&selected.call_symbol, context.exchange, session)
            },
            &retry,
        )
        .await?;
        let put_ltp = with_retry(
            || {
                caps.broker
                    .last_traded_price(&selected.put_symbol, context.exchange, session)
            },
            &retry,
        )
        .await?;
        let skew = skew_percent(call_ltp, put_ltp);

        if skew > ceiling {
            attempt += 1;
            info!(
                trade_id = %context.trade_id,
                attempt,
                %skew,
                %ceiling,
                strike = atm_strike,
                "Premium skew too wide, waiting"
            );
            sleep(caps.config.exit.skew_recheck_delay()).await;
            continue;
        }

        info!(
            trade_id = %context.trade_id,
            %skew,
            %ceiling,
            strike = atm_strike,
            "Skew acceptable, punching straddle"
        );
        return Ok(selected);
    }
}

fn market_intent(context: &TradeJobContext, symbol: &str, side: TransactionType) -> OrderIntent {
    let quantity = match side {
        TransactionType::Buy => context.leg_quantity(),
        TransactionType::Sell => -context.leg_quantity(),
    };
    OrderIntent {
        symbol: symbol.into(),
        exchange: context.exchange,
        product: context.product,
        transaction_type: side,
        quantity,
        order_type: OrderKind::Market,
        trigger_price: None,
        price: None,
        validity: Validity::Day,
        tag: context.order_tag.clone(),
    }
}

/// Open an ATM straddle for the trade.
///
/// Hedges are bought and confirmed filled before the primary legs go out, so
/// a short straddle is never naked. Each batch is reconciled to COMPLETE;
/// when a batch breaks and its rollback flag is set, everything filled so
/// far is squared off and the strategy fails as rolled back.
pub async fn atm_straddle(
    caps: &Capabilities,
    context: &TradeJobContext,
    start_time: DateTime<Utc>,
) -> Result<StraddleOutcome> {
    let retry = caps.retry();
    let session = &context.session_token;
    let selected = select_straddle(caps, context, start_time).await?;

    let primary_side = match context.volatility {
        VolatilityType::Short => TransactionType::Sell,
        VolatilityType::Long => TransactionType::Buy,
    };
    let primary_intents = vec![
        market_intent(context, &selected.put_symbol, primary_side),
        market_intent(context, &selected.call_symbol, primary_side),
    ];

    let hedge_intents = if context.volatility == VolatilityType::Short && context.is_hedge_enabled {
        let expiry = caps.option_chain.nearest_expiry(&context.instrument).await?;
        let offset = context.hedge_distance * context.strike_step_size;
        vec![
            market_intent(
                context,
                &strike_symbol(context, &expiry, selected.atm_strike - offset, "PE"),
                TransactionType::Buy,
            ),
            market_intent(
                context,
                &strike_symbol(context, &expiry, selected.atm_strike + offset, "CE"),
                TransactionType::Buy,
            ),
        ]
    } else {
        Vec::new()
    };

    let mut basket: Vec<OrderIntent> = hedge_intents.clone();
    basket.extend(primary_intents.iter().cloned());
    let has_margin = with_retry(|| caps.broker.has_margin_for(&basket, session), &retry).await?;
    if !has_margin {
        return Err(LegworkError::Validation(
            "insufficient margin for the straddle basket".into(),
        ));
    }

    let mut square_off_orders = Vec::new();

    if !hedge_intents.is_empty() {
        let ops = hedge_intents.iter().map(|intent| {
            ensure_order_state(
                caps.broker.as_ref(),
                intent,
                OrderStatus::Complete,
                session,
                &caps.config.reconcile,
                &retry,
            )
        });
        let outcome = attempt_broker_orders(ops.collect()).await;
        square_off_orders.extend(outcome.successful());
        if !outcome.all_ok && context.rollback.on_broken_hedge_orders {
            warn!(trade_id = %context.trade_id, "Hedge batch broken, rolling back");
            square_off_positions(caps, session, &context.order_tag, &square_off_orders).await?;
            return Err(LegworkError::RolledBack(
                "hedge batch broken, filled hedges squared off".into(),
            ));
        }
    }

    let ops = primary_intents.iter().map(|intent| {
        ensure_order_state(
            caps.broker.as_ref(),
            intent,
            OrderStatus::Complete,
            session,
            &caps.config.reconcile,
            &retry,
        )
    });
    let outcome = attempt_broker_orders(ops.collect()).await;
    let entry_orders = outcome.successful();
    square_off_orders.extend(entry_orders.iter().cloned());
    if !outcome.all_ok && context.rollback.on_broken_primary_orders {
        warn!(trade_id = %context.trade_id, "Primary batch broken, rolling back the whole straddle");
        square_off_positions(caps, session, &context.order_tag, &square_off_orders).await?;
        return Err(LegworkError::RolledBack(
            "primary batch broken, straddle squared off".into(),
        ));
    }

    // Hand the live trade to the exit-trading stage. The orders are already
    // filled, so a failed handoff is logged rather than undone.
    let extra = json!({
        "leg_orders": entry_orders,
        "square_off_orders": square_off_orders,
    });
    let exit_job =
        match schedule_next_stage(caps.queue.as_ref(), context, EXIT_TRADING_Q_NAME, extra).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(trade_id = %context.trade_id, error = %e, "Failed to schedule exit-trading stage for live straddle");
                None
            }
        };

    Ok(StraddleOutcome {
        atm_strike: selected.atm_strike,
        call_symbol: selected.call_symbol,
        put_symbol: selected.put_symbol,
        entry_orders,
        square_off_orders,
        exit_job,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PaperBroker;
    use crate::config::AppConfig;
    use crate::domain::{Exchange, ProductType, RollbackPolicy};
    use crate::indicator::doubles::{StaticOptionChain, StaticTrend};
    use crate::queue::MemoryQueue;
    use crate::store::MemoryTradeStore;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn fast_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.retry.delay_ms = 1;
        config.reconcile.poll_delay_ms = 1;
        config.exit.skew_recheck_delay_ms = 1;
        config
    }

    struct Harness {
        caps: Capabilities,
        broker: Arc<PaperBroker>,
        queue: Arc<MemoryQueue>,
    }

    fn harness() -> Harness {
        let broker = Arc::new(PaperBroker::new());
        let queue = Arc::new(MemoryQueue::new());
        let caps = Capabilities {
            broker: broker.clone(),
            queue: queue.clone(),
            store: Arc::new(MemoryTradeStore::new()),
            option_chain: Arc::new(StaticOptionChain {
                expiry: "24AUG".into(),
                chain: Vec::new(),
            }),
            trend: Arc::new(StaticTrend::default()),
            config: fast_config(),
        };
        Harness { caps, broker, queue }
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

    fn quote_straddle(broker: &PaperBroker, ce: Decimal, pe: Decimal) {
        broker.set_ltp("NIFTY 50", dec!(24013));
        broker.set_ltp("NIFTY24AUG24000CE", ce);
        broker.set_ltp("NIFTY24AUG24000PE", pe);
    }

    #[test]
    fn skew_ceiling_loosens_with_time_remaining() {
        let mut context = context();
        context.threshold_skew_percent = Some(dec!(4));
        let start = Utc::now();
        context.expires_at = start + chrono::Duration::minutes(10);

        // most of the window left: full ceiling
        assert_eq!(
            entry_skew_ceiling(&context, start, start + chrono::Duration::minutes(2)),
            dec!(10)
        );
        // past the halfway point the ceiling tightens linearly
        assert_eq!(
            entry_skew_ceiling(&context, start, start + chrono::Duration::minutes(6)),
            // 40% of the window left -> 4 + 6 * 0.8 = 8.8 -> 9
            dec!(9)
        );
        // window exhausted: floor
        assert_eq!(
            entry_skew_ceiling(&context, start, start + chrono::Duration::minutes(10)),
            dec!(4)
        );
        // no floor configured: always the max
        context.threshold_skew_percent = None;
        assert_eq!(
            entry_skew_ceiling(&context, start, start + chrono::Duration::minutes(9)),
            dec!(10)
        );
    }

    #[tokio::test]
    async fn punches_short_straddle_at_atm_strike() {
        let h = harness();
        quote_straddle(&h.broker, dec!(100), dec!(105));

        let outcome = atm_straddle(&h.caps, &context(), Utc::now()).await.unwrap();

        assert_eq!(outcome.atm_strike, 24000);
        assert_eq!(outcome.call_symbol, "NIFTY24AUG24000CE");
        assert_eq!(outcome.put_symbol, "NIFTY24AUG24000PE");
        assert_eq!(outcome.entry_orders.len(), 2);
        assert!(outcome.exit_job.is_some());

        let placed = h.broker.placed_intents();
        assert_eq!(placed.len(), 2);
        assert!(placed.iter().all(|i| i.transaction_type == TransactionType::Sell));
        assert_eq!(h.broker.net_position("NIFTY24AUG24000CE"), -50);
        assert_eq!(h.broker.net_position("NIFTY24AUG24000PE"), -50);
        assert_eq!(h.queue.jobs_for(EXIT_TRADING_Q_NAME).await.len(), 1);
    }

    #[tokio::test]
    async fn hedges_fill_before_primaries() {
        let h = harness();
        quote_straddle(&h.broker, dec!(100), dec!(105));
        let mut context = context();
        context.is_hedge_enabled = true;
        context.hedge_distance = 4;

        let outcome = atm_straddle(&h.caps, &context, Utc::now()).await.unwrap();

        let placed = h.broker.placed_intents();
        assert_eq!(placed.len(), 4);
        // hedges (buys, offset strikes) come first
        assert_eq!(placed[0].symbol, "NIFTY24AUG23800PE");
        assert_eq!(placed[0].transaction_type, TransactionType::Buy);
        assert_eq!(placed[1].symbol, "NIFTY24AUG24200CE");
        assert!(placed[2..].iter().all(|i| i.transaction_type == TransactionType::Sell));

        assert_eq!(outcome.entry_orders.len(), 2);
        assert_eq!(outcome.square_off_orders.len(), 4);
    }

    #[tokio::test]
    async fn expired_window_without_override_gives_up() {
        let h = harness();
        // skew 50%, never acceptable
        quote_straddle(&h.broker, dec!(100), dec!(150));
        let mut context = context();
        context.expires_at = Utc::now() + chrono::Duration::milliseconds(30);

        let err = atm_straddle(&h.caps, &context, Utc::now()).await.unwrap_err();
        assert!(matches!(err, LegworkError::Validation(_)));
        assert!(h.broker.placed_intents().is_empty());
    }

    #[tokio::test]
    async fn expired_window_with_override_punches_anyway() {
        let h = harness();
        quote_straddle(&h.broker, dec!(100), dec!(150));
        let mut context = context();
        context.expires_at = Utc::now() - chrono::Duration::minutes(1);
        context.take_trade_irrespective_skew = true;

        let outcome = atm_straddle(&h.caps, &context, Utc::now()).await.unwrap();
        assert_eq!(outcome.entry_orders.len(), 2);
    }

    #[tokio::test]
    async fn no_margin_places_nothing() {
        let h = harness();
        quote_straddle(&h.broker, dec!(100), dec!(105));
        h.broker.set_margin_ok(false);

        let err = atm_straddle(&h.caps, &context(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, LegworkError::Validation(_)));
        assert!(h.broker.placed_intents().is_empty());
    }

    #[tokio::test]
    async fn broken_hedge_batch_rolls_back_filled_hedges() {
        let h = harness();
        quote_straddle(&h.broker, dec!(100), dec!(105));
        h.broker.fail_placements_for("NIFTY24AUG24200CE");
        let mut context = context();
        context.is_hedge_enabled = true;
        context.hedge_distance = 4;
        context.rollback.on_broken_hedge_orders = true;

        let err = atm_straddle(&h.caps, &context, Utc::now()).await.unwrap_err();
        assert!(matches!(err, LegworkError::RolledBack(_)));
        // the hedge that filled was squared off, nothing else went out
        assert_eq!(h.broker.net_position("NIFTY24AUG23800PE"), 0);
        assert_eq!(h.broker.net_position("NIFTY24AUG24000CE"), 0);
        assert!(h.queue.jobs_for(EXIT_TRADING_Q_NAME).await.is_empty());
    }

    #[tokio::test]
    async fn broken_primary_batch_flattens_the_whole_straddle() {
        let h = harness();
        quote_straddle(&h.broker, dec!(100), dec!(105));
        h.broker.fail_placements_for("NIFTY24AUG24000CE");
        let mut context = context();
        context.is_hedge_enabled = true;
        context.hedge_distance = 4;
        context.rollback.on_broken_primary_orders = true;

        let err = atm_straddle(&h.caps, &context, Utc::now()).await.unwrap_err();
        assert!(matches!(err, LegworkError::RolledBack(_)));
        assert_eq!(h.broker.net_position("NIFTY24AUG23800PE"), 0);
        assert_eq!(h.broker.net_position("NIFTY24AUG24200CE"), 0);
        assert_eq!(h.broker.net_position("NIFTY24AUG24000PE"), 0);
        assert!(h.queue.jobs_for(EXIT_TRADING_Q_NAME).await.is_empty());
    }
}
