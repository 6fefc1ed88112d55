use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Transaction side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Buy,
    Sell,
}

impl TransactionType {
    pub fn opposite(&self) -> Self {
        match self {
            TransactionType::Buy => TransactionType::Sell,
            TransactionType::Sell => TransactionType::Buy,
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionType::Buy => write!(f, "BUY"),
            TransactionType::Sell => write!(f, "SELL"),
        }
    }
}

/// Order kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    Market,
    Limit,
    /// Stop-loss market order (SL-M)
    StopMarket,
    /// Stop-loss limit order (SL)
    StopLimit,
}

/// Exchange segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Exchange {
    Nfo,
    Nse,
    Bse,
}

/// Product type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProductType {
    /// Intraday
    Mis,
    /// Overnight
    Nrml,
}

/// Order validity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Validity {
    Day,
    Ioc,
}

/// Order status as reported by the broker.
///
/// Brokers emit free-form strings; anything outside the known set is carried
/// verbatim in `Other` so history scans never lose information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OrderStatus {
    Pending,
    TriggerPending,
    Complete,
    Cancelled,
    Rejected,
    Other(String),
}

impl OrderStatus {
    pub fn as_str(&self) -> &str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::TriggerPending => "TRIGGER PENDING",
            OrderStatus::Complete => "COMPLETE",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Other(s) => s,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Complete | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

impl From<String> for OrderStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "PENDING" => OrderStatus::Pending,
            "TRIGGER PENDING" => OrderStatus::TriggerPending,
            "COMPLETE" => OrderStatus::Complete,
            "CANCELLED" => OrderStatus::Cancelled,
            "REJECTED" => OrderStatus::Rejected,
            _ => OrderStatus::Other(raw),
        }
    }
}

impl From<OrderStatus> for String {
    fn from(status: OrderStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The desired order, immutable once submitted.
///
/// `quantity` is signed (negative encodes short) but is always submitted to
/// the broker as an absolute value with the side carried in
/// `transaction_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub symbol: String,
    pub exchange: Exchange,
    pub product: ProductType,
    pub transaction_type: TransactionType,
    pub quantity: i64,
    pub order_type: OrderKind,
    pub trigger_price: Option<Decimal>,
    pub price: Option<Decimal>,
    pub validity: Validity,
    pub tag: String,
}

impl OrderIntent {
    /// Quantity as submitted to the broker.
    pub fn submit_quantity(&self) -> i64 {
        self.quantity.abs()
    }
}

/// Acknowledgement returned by the broker on placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
}

/// The broker's view of a submitted order — an immutable snapshot retrieved
/// via polling, carrying the fields needed to re-derive a cancel or modify
/// request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub status: OrderStatus,
    pub symbol: String,
    pub exchange: Exchange,
    pub product: ProductType,
    pub transaction_type: TransactionType,
    pub quantity: i64,
    pub order_type: OrderKind,
    pub validity: Validity,
    pub variety: String,
    pub trigger_price: Option<Decimal>,
    pub price: Option<Decimal>,
    pub average_price: Option<Decimal>,
    pub tag: String,
}

impl OrderRecord {
    /// Whether `other` refers to the same leg: same product, exchange and
    /// symbol, with matching absolute quantity. A reverse trade on the same
    /// exchange and symbol is not possible, so absolute comparison is safe.
    pub fn matches_leg(&self, other: &OrderRecord) -> bool {
        self.product == other.product
            && self.exchange == other.exchange
            && self.symbol == other.symbol
            && self.quantity.abs() == other.quantity.abs()
    }
}
