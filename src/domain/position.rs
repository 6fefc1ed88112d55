use serde::{Deserialize, Serialize};

use super::order::{Exchange, OrderRecord, ProductType, TransactionType};

/// Net open position for a currently-held instrument. Sign convention matches
/// `OrderIntent`: negative quantity is short. Never persisted by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRecord {
    pub symbol: String,
    pub exchange: Exchange,
    pub product: ProductType,
    pub net_quantity: i64,
}

impl PositionRecord {
    /// Whether this position can absorb a square-off of `order`'s quantity.
    ///
    /// A short position must already cover at least the requested exit
    /// quantity in the short direction (`net <= -q`); a long position must
    /// hold at least that much (`net >= q`).
    pub fn covers_close_of(&self, order: &OrderRecord) -> bool {
        if self.symbol != order.symbol
            || self.exchange != order.exchange
            || self.product != order.product
        {
            return false;
        }
        let q = order.quantity.abs();
        if self.net_quantity < 0 {
            self.net_quantity <= -q
        } else {
            self.net_quantity >= q
        }
    }

    /// The requested close quantity clamped to this position's direction.
    pub fn clamped_close_quantity(&self, order: &OrderRecord) -> i64 {
        let q = order.quantity.abs();
        if self.net_quantity < 0 {
            -q
        } else {
            q
        }
    }

    /// Side of the market order that offsets this position.
    pub fn square_off_side(&self) -> TransactionType {
        if self.net_quantity < 0 {
            TransactionType::Buy
        } else {
            TransactionType::Sell
        }
    }
}
