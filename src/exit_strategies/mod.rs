//! Exit-side state machines of the trade lifecycle.
//!
//! Each strategy is a single step of a long-running checker driven by an
//! external job scheduler: it runs once against live broker state, then
//! either terminates the lifecycle, hands off to the next stage, or asks to
//! be re-invoked on the next tick.

pub mod auto_square_off;
pub mod delta_neutral;
pub mod individual_leg_exit;
pub mod trailing_stop;

use std::sync::Arc;

use crate::broker::BrokerClient;
use crate::config::AppConfig;
use crate::indicator::{OptionChainProvider, TrendProvider};
use crate::queue::{JobHandle, StageQueue};
use crate::remote::RetryPolicy;
use crate::store::TradeStore;

pub use auto_square_off::{
    auto_square_off, cancel_pending_legs, square_off_for_trade, square_off_positions,
};
pub use delta_neutral::delta_neutral_exit;
pub use individual_leg_exit::{convert_slm_to_sll, individual_leg_exit_orders};
pub use trailing_stop::{min_x_percent_or_supertrend, TrailingInputs};

/// Shared collaborators every strategy step runs against.
pub struct Capabilities {
    pub broker: Arc<dyn BrokerClient>,
    pub queue: Arc<dyn StageQueue>,
    pub store: Arc<dyn TradeStore>,
    pub option_chain: Arc<dyn OptionChainProvider>,
    pub trend: Arc<dyn TrendProvider>,
    pub config: AppConfig,
}

impl Capabilities {
    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.config.retry)
    }
}

/// How a strategy step concluded.
///
/// A step that wants to be re-invoked unchanged signals that through a
/// non-terminal error instead (`LegworkError::NoTrailingRequired`), leaving
/// the scheduler's job in place.
#[derive(Debug)]
pub enum StrategyOutcome {
    /// The lifecycle leg is finished; the reason is recorded by the caller.
    Resolved(String),
    /// Work continues in a freshly scheduled job.
    Continue(JobHandle),
}
