use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::{Exchange, ProductType};

/// Whether the strategy sells volatility (short straddle/strangle) or buys it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VolatilityType {
    Short,
    Long,
}

/// Flags declaring whether a batch failure at a given stage should trigger an
/// automatic unwind of everything placed so far in that stage.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RollbackPolicy {
    #[serde(default)]
    pub on_broken_hedge_orders: bool,
    #[serde(default)]
    pub on_broken_primary_orders: bool,
    #[serde(default)]
    pub on_broken_exit_orders: bool,
}

/// The durable unit of lifecycle state, handed stage-to-stage through the
/// queue. A context handed to a later stage is a complete snapshot sufficient
/// to resume the lifecycle with no reliance on the originating stage's local
/// memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeJobContext {
    pub trade_id: String,
    pub session_token: String,

    // Instrument configuration
    pub instrument: String,
    pub underlying_symbol: String,
    pub nfo_symbol: String,
    pub exchange: Exchange,
    pub product: ProductType,
    pub lot_size: i64,
    pub lots: i64,
    pub strike_step_size: i64,

    pub order_tag: String,

    // Exit configuration
    pub slm_percent: Decimal,
    #[serde(default = "default_sl_limit_price_percent")]
    pub sl_limit_price_percent: Decimal,
    #[serde(default)]
    pub delta_threshold: f64,
    #[serde(default)]
    pub rollback: RollbackPolicy,
    #[serde(default)]
    pub on_square_off_set_aborted: bool,
    pub market_close_at: DateTime<Utc>,

    // Entry gating
    pub max_skew_percent: Decimal,
    #[serde(default)]
    pub threshold_skew_percent: Option<Decimal>,
    #[serde(default)]
    pub take_trade_irrespective_skew: bool,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub is_hedge_enabled: bool,
    #[serde(default)]
    pub hedge_distance: i64,
    pub volatility: VolatilityType,
}

fn default_sl_limit_price_percent() -> Decimal {
    Decimal::ONE
}

impl TradeJobContext {
    /// Total quantity per leg.
    pub fn leg_quantity(&self) -> i64 {
        self.lot_size * self.lots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn context_payload_round_trip() {
        let ctx = TradeJobContext {
            trade_id: "trade-1".into(),
            session_token: "tok".into(),
            instrument: "NIFTY".into(),
            underlying_symbol: "NIFTY 50".into(),
            nfo_symbol: "NIFTY".into(),
            exchange: Exchange::Nfo,
            product: ProductType::Mis,
            lot_size: 50,
            lots: 2,
            strike_step_size: 50,
            order_tag: "LWK1".into(),
            slm_percent: dec!(50),
            sl_limit_price_percent: dec!(2),
            delta_threshold: 30.0,
            rollback: RollbackPolicy {
                on_broken_exit_orders: true,
                ..Default::default()
            },
            on_square_off_set_aborted: true,
            market_close_at: Utc::now(),
            max_skew_percent: dec!(10),
            threshold_skew_percent: Some(dec!(30)),
            take_trade_irrespective_skew: false,
            expires_at: Utc::now(),
            is_hedge_enabled: true,
            hedge_distance: 4,
            volatility: VolatilityType::Short,
        };

        let json = serde_json::to_string(&ctx).unwrap();
        let back: TradeJobContext = serde_json::from_str(&json).unwrap();
        assert_eq!(back.trade_id, "trade-1");
        assert_eq!(back.leg_quantity(), 100);
        assert!(back.rollback.on_broken_exit_orders);
        assert!(!back.rollback.on_broken_hedge_orders);
        assert_eq!(back.sl_limit_price_percent, dec!(2));
    }

    #[test]
    fn sl_limit_price_percent_defaults_to_one() {
        let json = serde_json::json!({
            "trade_id": "t", "session_token": "s", "instrument": "NIFTY",
            "underlying_symbol": "NIFTY 50", "nfo_symbol": "NIFTY",
            "exchange": "NFO", "product": "MIS", "lot_size": 50, "lots": 1,
            "strike_step_size": 50, "order_tag": "X", "slm_percent": "50",
            "market_close_at": "2026-08-25T10:00:00Z",
            "max_skew_percent": "10",
            "expires_at": "2026-08-25T09:45:00Z",
            "volatility": "SHORT"
        });
        let ctx: TradeJobContext = serde_json::from_value(json).unwrap();
        assert_eq!(ctx.sl_limit_price_percent, Decimal::ONE);
        assert!(!ctx.on_square_off_set_aborted);
    }
}
