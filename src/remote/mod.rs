pub mod batch;
pub mod ensurer;
pub mod retry;

pub use batch::{attempt_broker_orders, BatchOutcome};
pub use ensurer::ensure_order_state;
pub use retry::{with_retry, RetryPolicy};
