use thiserror::Error;

use crate::domain::OrderStatus;

/// Main error type for the trade lifecycle core
#[derive(Error, Debug)]
pub enum LegworkError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transient remote failure: {0}")]
    Transient(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Remote retry budget exhausted after {attempts} attempts")]
    RemoteExhausted {
        attempts: u32,
        #[source]
        source: Box<LegworkError>,
    },

    // Order lifecycle errors
    #[error("Order placement failed: {0}")]
    OrderPlacement(String),

    #[error("Order rejected by broker: {0}")]
    OrderRejected(String),

    #[error("Order {order_id} never reached state {target}")]
    OrderNeverReachedState { order_id: String, target: OrderStatus },

    #[error("Maximum allowed order modifications exceeded")]
    ModificationLimitExceeded,

    #[error("Rolled back: {0}")]
    RolledBack(String),

    /// Non-terminal signal from a polling checker: nothing to do right now,
    /// the external scheduler should re-invoke later.
    #[error("No trailing required: {0}")]
    NoTrailingRequired(String),

    // Collaborator errors
    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Trade store error: {0}")]
    Store(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for LegworkError
pub type Result<T> = std::result::Result<T, LegworkError>;

impl LegworkError {
    /// Whether the retry engine may re-attempt the failed call.
    ///
    /// Only infrastructure-level failures qualify; business rejections
    /// (rejected orders, validation, rollbacks) always surface immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            LegworkError::Transient(_) | LegworkError::RateLimited(_) => true,
            LegworkError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    /// Whether this error is the non-terminal "check again later" signal
    /// emitted by polling checkers.
    pub fn is_retry_signal(&self) -> bool {
        matches!(self, LegworkError::NoTrailingRequired(_))
    }
}
