//! Indicator and option-chain collaborators.

pub mod signalx;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use signalx::SignalxClient;

/// Option side of a chain entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptionSide {
    Ce,
    Pe,
}

/// One strike of an option chain with its greeks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionChainEntry {
    pub strike_price: i64,
    pub option_type: OptionSide,
    pub delta: f64,
}

/// Supertrend direction signal per candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
}

/// Supertrend value for one candle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupertrendTick {
    #[serde(rename = "ST_10_3")]
    pub value: f64,
    #[serde(rename = "STX_10_3")]
    pub direction: TrendDirection,
}

/// Query for the supertrend indicator over a candle window.
#[derive(Debug, Clone, Serialize)]
pub struct SupertrendQuery {
    pub instrument_token: String,
    pub from_date: String,
    pub to_date: String,
    pub interval: String,
    pub period: u32,
    pub multiplier: u32,
    pub latest_only: bool,
}

/// Trend indicator service.
#[async_trait]
pub trait TrendProvider: Send + Sync {
    async fn supertrend(&self, query: &SupertrendQuery) -> Result<Vec<SupertrendTick>>;
}

/// Option-chain and instrument-expiry lookups.
#[async_trait]
pub trait OptionChainProvider: Send + Sync {
    /// Chain of strikes with greeks for an instrument and expiry.
    async fn option_chain(&self, instrument: &str, expiry: &str) -> Result<Vec<OptionChainEntry>>;

    /// Expiry code of the nearest tradeable series (e.g. "24AUG").
    async fn nearest_expiry(&self, instrument: &str) -> Result<String>;
}

/// Fixed-response providers for tests and dry runs.
pub mod doubles {
    use std::sync::Mutex;

    use super::*;

    pub struct StaticOptionChain {
        pub expiry: String,
        pub chain: Vec<OptionChainEntry>,
    }

    #[async_trait]
    impl OptionChainProvider for StaticOptionChain {
        async fn option_chain(
            &self,
            _instrument: &str,
            _expiry: &str,
        ) -> Result<Vec<OptionChainEntry>> {
            Ok(self.chain.clone())
        }

        async fn nearest_expiry(&self, _instrument: &str) -> Result<String> {
            Ok(self.expiry.clone())
        }
    }

    #[derive(Default)]
    pub struct StaticTrend {
        ticks: Mutex<Vec<SupertrendTick>>,
    }

    impl StaticTrend {
        pub fn new(ticks: Vec<SupertrendTick>) -> Self {
            Self {
                ticks: Mutex::new(ticks),
            }
        }

        pub fn set_ticks(&self, ticks: Vec<SupertrendTick>) {
            *self.ticks.lock().unwrap() = ticks;
        }
    }

    #[async_trait]
    impl TrendProvider for StaticTrend {
        async fn supertrend(&self, _query: &SupertrendQuery) -> Result<Vec<SupertrendTick>> {
            Ok(self.ticks.lock().unwrap().clone())
        }
    }
}
