use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::{Exchange, OrderAck, OrderIntent, OrderRecord, PositionRecord};
use crate::error::Result;

/// Opaque broker capability consumed by the lifecycle core.
///
/// All calls are remote and unreliable; the core wraps reads and cancels in
/// the retry engine but never blindly retries a placement. Order history is
/// returned in chronological order — callers reverse it for recency.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn place_order(&self, intent: &OrderIntent, session: &str) -> Result<OrderAck>;

    async fn cancel_order(&self, order: &OrderRecord, session: &str) -> Result<()>;

    /// Modify the trigger (and optionally limit) price of a live order.
    /// Fails with `LegworkError::ModificationLimitExceeded` when the broker's
    /// per-order modification-count limit is hit.
    async fn modify_order(
        &self,
        order: &OrderRecord,
        new_trigger: Decimal,
        new_price: Option<Decimal>,
        session: &str,
    ) -> Result<()>;

    /// Chronological status history of a single order.
    async fn get_order_history(&self, order_id: &str, session: &str) -> Result<Vec<OrderRecord>>;

    /// All of today's orders for the session.
    async fn get_orders(&self, session: &str) -> Result<Vec<OrderRecord>>;

    /// Net open positions.
    async fn get_positions(&self, session: &str) -> Result<Vec<PositionRecord>>;

    /// Last traded price of an instrument.
    async fn last_traded_price(
        &self,
        symbol: &str,
        exchange: Exchange,
        session: &str,
    ) -> Result<Decimal>;

    /// Whether the account has margin for the whole basket.
    async fn has_margin_for(&self, intents: &[OrderIntent], session: &str) -> Result<bool>;
}
