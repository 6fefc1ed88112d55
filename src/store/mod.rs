//! External trade state store, treated as a key-value patch service.
//!
//! The core writes heartbeats and observability fields and reads the user
//! override flag; it never owns this state.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{LegworkError, Result};

/// User-initiated override persisted on the trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserOverride {
    Abort,
}

/// Fields the core may merge into persisted trade state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_override: Option<UserOverride>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_delta_diff: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_delta_diff_set_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

/// Current persisted trade state as seen by the core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeState {
    pub user_override: Option<UserOverride>,
    pub live_delta_diff: Option<Decimal>,
    pub last_delta_diff_set_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

impl TradeState {
    fn apply(&mut self, patch: TradePatch) {
        if patch.user_override.is_some() {
            self.user_override = patch.user_override;
        }
        if patch.live_delta_diff.is_some() {
            self.live_delta_diff = patch.live_delta_diff;
        }
        if patch.last_delta_diff_set_at.is_some() {
            self.last_delta_diff_set_at = patch.last_delta_diff_set_at;
        }
        if patch.last_heartbeat_at.is_some() {
            self.last_heartbeat_at = patch.last_heartbeat_at;
        }
    }
}

/// Merge-patch store for trade state.
#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Merge `patch` into the trade's state and return the updated state.
    async fn patch(&self, trade_id: &str, patch: TradePatch) -> Result<TradeState>;

    async fn get(&self, trade_id: &str) -> Result<TradeState>;
}

/// Notify the store that a checker is alive and read back the current state
/// (including any user override set meanwhile).
pub async fn trade_heartbeat(store: &dyn TradeStore, trade_id: &str) -> Result<TradeState> {
    store
        .patch(
            trade_id,
            TradePatch {
                last_heartbeat_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await
}

/// Persist the live delta diff for UI observability.
pub async fn patch_live_delta_diff(
    store: &dyn TradeStore,
    trade_id: &str,
    delta_diff: Decimal,
) -> Result<TradeState> {
    store
        .patch(
            trade_id,
            TradePatch {
                live_delta_diff: Some(delta_diff),
                last_delta_diff_set_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await
}

/// In-memory store for tests and dry runs.
#[derive(Default)]
pub struct MemoryTradeStore {
    trades: Mutex<HashMap<String, TradeState>>,
    fail: std::sync::atomic::AtomicBool,
}

impl MemoryTradeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_patches(&self) {
        self.fail.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn set_override(&self, trade_id: &str, user_override: UserOverride) {
        self.trades
            .lock()
            .await
            .entry(trade_id.to_string())
            .or_default()
            .user_override = Some(user_override);
    }
}

#[async_trait]
impl TradeStore for MemoryTradeStore {
    async fn patch(&self, trade_id: &str, patch: TradePatch) -> Result<TradeState> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(LegworkError::Store("store unavailable".into()));
        }
        let mut trades = self.trades.lock().await;
        let state = trades.entry(trade_id.to_string()).or_default();
        state.apply(patch);
        Ok(state.clone())
    }

    async fn get(&self, trade_id: &str) -> Result<TradeState> {
        Ok(self
            .trades
            .lock()
            .await
            .get(trade_id)
            .cloned()
            .unwrap_or_default())
    }
}
