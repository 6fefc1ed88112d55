//! Scripted in-memory broker used by tests and dry runs.
//!
//! Behaves like the remote broker from the core's point of view: placements
//! return opaque order ids, state is only observable through history polls,
//! and failures can be injected per call site.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::domain::{
    Exchange, OrderAck, OrderIntent, OrderKind, OrderRecord, OrderStatus, PositionRecord,
    TransactionType,
};
use crate::error::{LegworkError, Result};

use super::traits::BrokerClient;

/// Remote call recorded for assertions.
#[derive(Debug, Clone)]
pub enum RemoteCall {
    Place(OrderIntent),
    Cancel(String),
    Modify { order_id: String, new_trigger: Decimal },
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    /// Chronological history per order id.
    histories: HashMap<String, Vec<OrderRecord>>,
    order_sequence: Vec<String>,
    /// Scripted history snapshots consumed poll-by-poll before falling back
    /// to the live history.
    scripted_polls: HashMap<String, VecDeque<Vec<OrderRecord>>>,
    positions: Vec<PositionRecord>,
    calls: Vec<RemoteCall>,
    fail_place_symbols: HashSet<String>,
    /// Remaining placement failures per symbol; later placements succeed.
    fail_place_counts: HashMap<String, u32>,
    /// Remaining transient failures per call key ("orders", "positions",
    /// "history", "ltp").
    transient_failures: HashMap<String, u32>,
    /// Symbols whose placed orders stay in their initial non-terminal state.
    stuck_symbols: HashSet<String>,
    modification_limit_exceeded: bool,
    ltp: HashMap<String, Decimal>,
    margin_ok: bool,
}

pub struct PaperBroker {
    inner: Mutex<Inner>,
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperBroker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                margin_ok: true,
                ..Default::default()
            }),
        }
    }

    pub fn set_position(&self, symbol: &str, exchange: Exchange, product: crate::domain::ProductType, net_quantity: i64) {
        let mut inner = self.inner.lock().unwrap();
        inner.positions.push(PositionRecord {
            symbol: symbol.into(),
            exchange,
            product,
            net_quantity,
        });
    }

    pub fn set_ltp(&self, symbol: &str, price: Decimal) {
        self.inner.lock().unwrap().ltp.insert(symbol.into(), price);
    }

    pub fn set_margin_ok(&self, ok: bool) {
        self.inner.lock().unwrap().margin_ok = ok;
    }

    /// Every placement for `symbol` fails with an `OrderPlacement` error.
    pub fn fail_placements_for(&self, symbol: &str) {
        self.inner.lock().unwrap().fail_place_symbols.insert(symbol.into());
    }

    /// The next `times` placements for `symbol` fail with an `OrderPlacement`
    /// error; placements after that succeed again. Lets a test break one
    /// batch while the compensating orders for the same symbol go through.
    pub fn fail_next_placements_for(&self, symbol: &str, times: u32) {
        self.inner
            .lock()
            .unwrap()
            .fail_place_counts
            .insert(symbol.into(), times);
    }

    /// The next `times` invocations of the keyed call fail transiently.
    pub fn fail_transiently(&self, key: &str, times: u32) {
        self.inner.lock().unwrap().transient_failures.insert(key.into(), times);
    }

    /// Placed orders for `symbol` never progress past their initial state.
    pub fn stick_symbol(&self, symbol: &str) {
        self.inner.lock().unwrap().stuck_symbols.insert(symbol.into());
    }

    pub fn set_modification_limit_exceeded(&self, exceeded: bool) {
        self.inner.lock().unwrap().modification_limit_exceeded = exceeded;
    }

    /// Queue explicit history snapshots returned by successive polls for an
    /// order, ahead of the live history.
    pub fn push_history_snapshot(&self, order_id: &str, snapshot: Vec<OrderRecord>) {
        self.inner
            .lock()
            .unwrap()
            .scripted_polls
            .entry(order_id.into())
            .or_default()
            .push_back(snapshot);
    }

    /// Append a status transition to an order's live history.
    pub fn force_status(&self, order_id: &str, status: OrderStatus) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(history) = inner.histories.get_mut(order_id) {
            let mut rec = history.last().expect("history never empty").clone();
            rec.status = status;
            history.push(rec);
        }
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn cancelled_order_ids(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RemoteCall::Cancel(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn placed_intents(&self) -> Vec<OrderIntent> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RemoteCall::Place(intent) => Some(intent),
                _ => None,
            })
            .collect()
    }

    pub fn net_position(&self, symbol: &str) -> i64 {
        self.inner
            .lock()
            .unwrap()
            .positions
            .iter()
            .filter(|p| p.symbol == symbol)
            .map(|p| p.net_quantity)
            .sum()
    }

    fn take_transient(inner: &mut Inner, key: &str) -> bool {
        match inner.transient_failures.get_mut(key) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }

    fn initial_status(intent: &OrderIntent, stuck: bool) -> OrderStatus {
        match intent.order_type {
            _ if stuck => OrderStatus::Pending,
            OrderKind::Market => OrderStatus::Complete,
            OrderKind::StopMarket | OrderKind::StopLimit => OrderStatus::TriggerPending,
            OrderKind::Limit => OrderStatus::Pending,
        }
    }

    fn apply_fill(inner: &mut Inner, intent: &OrderIntent) {
        let signed = match intent.transaction_type {
            TransactionType::Buy => intent.submit_quantity(),
            TransactionType::Sell => -intent.submit_quantity(),
        };
        if let Some(pos) = inner.positions.iter_mut().find(|p| {
            p.symbol == intent.symbol && p.exchange == intent.exchange && p.product == intent.product
        }) {
            pos.net_quantity += signed;
        } else {
            inner.positions.push(PositionRecord {
                symbol: intent.symbol.clone(),
                exchange: intent.exchange,
                product: intent.product,
                net_quantity: signed,
            });
        }
        inner.positions.retain(|p| p.net_quantity != 0);
    }
}

#[async_trait]
impl BrokerClient for PaperBroker {
    async fn place_order(&self, intent: &OrderIntent, _session: &str) -> Result<OrderAck> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(RemoteCall::Place(intent.clone()));

        if inner.fail_place_symbols.contains(&intent.symbol) {
            return Err(LegworkError::OrderPlacement(format!(
                "placement refused for {}",
                intent.symbol
            )));
        }
        if let Some(remaining) = inner.fail_place_counts.get_mut(&intent.symbol) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(LegworkError::OrderPlacement(format!(
                    "placement refused for {}",
                    intent.symbol
                )));
            }
        }

        inner.next_id += 1;
        let order_id = format!("paper-{}", inner.next_id);

        let stuck = inner.stuck_symbols.contains(&intent.symbol);
        let status = Self::initial_status(intent, stuck);
        let average_price = inner
            .ltp
            .get(&intent.symbol)
            .copied()
            .or(intent.price)
            .or(intent.trigger_price)
            .unwrap_or(dec!(100));

        let record = OrderRecord {
            order_id: order_id.clone(),
            status: status.clone(),
            symbol: intent.symbol.clone(),
            exchange: intent.exchange,
            product: intent.product,
            transaction_type: intent.transaction_type,
            quantity: intent.submit_quantity(),
            order_type: intent.order_type,
            validity: intent.validity,
            variety: "regular".into(),
            trigger_price: intent.trigger_price,
            price: intent.price,
            average_price: Some(average_price),
            tag: intent.tag.clone(),
        };

        if status == OrderStatus::Complete {
            Self::apply_fill(&mut inner, intent);
        }

        inner.histories.insert(order_id.clone(), vec![record]);
        inner.order_sequence.push(order_id.clone());

        Ok(OrderAck { order_id })
    }

    async fn cancel_order(&self, order: &OrderRecord, _session: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(RemoteCall::Cancel(order.order_id.clone()));
        let history = inner
            .histories
            .get_mut(&order.order_id)
            .ok_or_else(|| LegworkError::Internal(format!("unknown order {}", order.order_id)))?;
        let mut rec = history.last().expect("history never empty").clone();
        if !rec.status.is_terminal() {
            rec.status = OrderStatus::Cancelled;
            history.push(rec);
        }
        Ok(())
    }

    async fn modify_order(
        &self,
        order: &OrderRecord,
        new_trigger: Decimal,
        new_price: Option<Decimal>,
        _session: &str,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(RemoteCall::Modify {
            order_id: order.order_id.clone(),
            new_trigger,
        });
        if inner.modification_limit_exceeded {
            return Err(LegworkError::ModificationLimitExceeded);
        }
        let history = inner
            .histories
            .get_mut(&order.order_id)
            .ok_or_else(|| LegworkError::Internal(format!("unknown order {}", order.order_id)))?;
        let mut rec = history.last().expect("history never empty").clone();
        rec.trigger_price = Some(new_trigger);
        if new_price.is_some() {
            rec.price = new_price;
        }
        history.push(rec);
        Ok(())
    }

    async fn get_order_history(&self, order_id: &str, _session: &str) -> Result<Vec<OrderRecord>> {
        let mut inner = self.inner.lock().unwrap();
        if Self::take_transient(&mut inner, "history") {
            return Err(LegworkError::Transient("history fetch timed out".into()));
        }
        if let Some(polls) = inner.scripted_polls.get_mut(order_id) {
            if let Some(snapshot) = polls.pop_front() {
                return Ok(snapshot);
            }
        }
        inner
            .histories
            .get(order_id)
            .cloned()
            .ok_or_else(|| LegworkError::Internal(format!("unknown order {order_id}")))
    }

    async fn get_orders(&self, _session: &str) -> Result<Vec<OrderRecord>> {
        let mut inner = self.inner.lock().unwrap();
        if Self::take_transient(&mut inner, "orders") {
            return Err(LegworkError::Transient("orders fetch timed out".into()));
        }
        Ok(inner
            .order_sequence
            .iter()
            .filter_map(|id| inner.histories.get(id).and_then(|h| h.last()).cloned())
            .collect())
    }

    async fn get_positions(&self, _session: &str) -> Result<Vec<PositionRecord>> {
        let mut inner = self.inner.lock().unwrap();
        if Self::take_transient(&mut inner, "positions") {
            return Err(LegworkError::Transient("positions fetch timed out".into()));
        }
        Ok(inner.positions.clone())
    }

    async fn last_traded_price(
        &self,
        symbol: &str,
        _exchange: Exchange,
        _session: &str,
    ) -> Result<Decimal> {
        let mut inner = self.inner.lock().unwrap();
        if Self::take_transient(&mut inner, "ltp") {
            return Err(LegworkError::Transient("quote fetch timed out".into()));
        }
        inner
            .ltp
            .get(symbol)
            .copied()
            .ok_or_else(|| LegworkError::Internal(format!("no quote for {symbol}")))
    }

    async fn has_margin_for(&self, _intents: &[OrderIntent], _session: &str) -> Result<bool> {
        Ok(self.inner.lock().unwrap().margin_ok)
    }
}
