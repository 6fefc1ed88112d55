pub mod order;
pub mod position;
pub mod trade;

pub use order::{
    Exchange, OrderAck, OrderIntent, OrderKind, OrderRecord, OrderStatus, ProductType,
    TransactionType, Validity,
};
pub use position::PositionRecord;
pub use trade::{RollbackPolicy, TradeJobContext, VolatilityType};
