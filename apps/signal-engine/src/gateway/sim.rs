//! In-process paper gateway.
//!
//! Implements [`GatewayClient`] with paper-trading semantics: scripted
//! account state, immediate market fills, and synchronous event emission.
//! Used by the binary's `sim` mode and throughout the test suite; a
//! wire-level client replaces it by implementing the same port.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::broadcast;

use crate::models::{
    AccountId, Contract, OrderAction, OrderId, OrderStatus, OrderTicket, OrderType, PositionRecord,
    TAG_TOTAL_CASH,
};

use super::{GatewayClient, GatewayError, GatewayEvent};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct SummaryRow {
    tag: String,
    value: String,
    currency: String,
}

#[derive(Debug, Clone)]
struct SimOrder {
    contract: Contract,
    ticket: OrderTicket,
    status: OrderStatus,
}

#[derive(Debug, Default)]
struct SimState {
    connected: bool,
    refuse_connects: u32,
    next_order_id: i64,
    accounts: Vec<AccountId>,
    summaries: BTreeMap<String, Vec<SummaryRow>>,
    positions: BTreeMap<(String, String), PositionRecord>,
    orders: BTreeMap<OrderId, SimOrder>,
    placement_log: Vec<(OrderId, OrderTicket)>,
    fill_market_orders: bool,
    summary_cancels: u32,
}

/// Paper-trading gateway with scripted state.
pub struct SimGateway {
    event_tx: broadcast::Sender<GatewayEvent>,
    state: Mutex<SimState>,
}

impl SimGateway {
    /// Create a sim gateway managing the given accounts.
    #[must_use]
    pub fn new(accounts: &[AccountId]) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            event_tx,
            state: Mutex::new(SimState {
                next_order_id: 1,
                accounts: accounts.to_vec(),
                fill_market_orders: true,
                ..SimState::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, event: GatewayEvent) {
        // Nobody listening is fine; events are fire-and-forget.
        let _ = self.event_tx.send(event);
    }

    /// Emit a raw event onto the stream (test hook).
    pub fn emit(&self, event: GatewayEvent) {
        self.send(event);
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_next_connects(&self, n: u32) {
        self.lock().refuse_connects = n;
    }

    /// Drop the session and notify subscribers.
    pub fn emit_disconnect(&self, reason: &str) {
        self.lock().connected = false;
        self.send(GatewayEvent::Disconnected {
            reason: reason.to_string(),
        });
    }

    /// Control whether market orders fill immediately (default: true).
    pub fn set_fill_market_orders(&self, fill: bool) {
        self.lock().fill_market_orders = fill;
    }

    /// Seed an arbitrary summary row for an account.
    pub fn seed_summary(&self, account: &AccountId, tag: &str, value: &str, currency: &str) {
        let mut state = self.lock();
        let rows = state.summaries.entry(account.to_string()).or_default();
        rows.retain(|row| row.tag != tag);
        rows.push(SummaryRow {
            tag: tag.to_string(),
            value: value.to_string(),
            currency: currency.to_string(),
        });
    }

    /// Seed the account's total cash value.
    pub fn seed_cash(&self, account: &AccountId, cash: Decimal) {
        self.seed_summary(account, TAG_TOTAL_CASH, &cash.to_string(), "USD");
    }

    /// Seed a position for an account.
    pub fn seed_position(
        &self,
        account: &AccountId,
        contract: &Contract,
        quantity: Decimal,
        avg_cost: Decimal,
    ) {
        let mut state = self.lock();
        state.positions.insert(
            (account.to_string(), contract.symbol.clone()),
            PositionRecord {
                account: account.clone(),
                contract: contract.clone(),
                quantity,
                avg_cost,
            },
        );
    }

    /// Track a pre-existing order so it shows up in open-order listings.
    pub fn seed_open_order(
        &self,
        order_id: OrderId,
        contract: &Contract,
        ticket: OrderTicket,
        status: OrderStatus,
    ) {
        let mut state = self.lock();
        state.orders.insert(
            order_id,
            SimOrder {
                contract: contract.clone(),
                ticket,
                status,
            },
        );
    }

    /// Orders placed through this gateway, in placement order.
    #[must_use]
    pub fn placed_orders(&self) -> Vec<(OrderId, OrderTicket)> {
        self.lock().placement_log.clone()
    }

    /// Current status of a tracked order.
    #[must_use]
    pub fn order_status(&self, order_id: OrderId) -> Option<OrderStatus> {
        self.lock().orders.get(&order_id).map(|o| o.status)
    }

    /// Current position for (account, symbol), if any.
    #[must_use]
    pub fn position(&self, account: &AccountId, symbol: &str) -> Option<PositionRecord> {
        self.lock()
            .positions
            .get(&(account.to_string(), symbol.to_string()))
            .cloned()
    }

    /// How many times the summary subscription was cancelled.
    #[must_use]
    pub fn summary_cancel_count(&self) -> u32 {
        self.lock().summary_cancels
    }

    fn ensure_connected(&self) -> Result<(), GatewayError> {
        if self.lock().connected {
            Ok(())
        } else {
            Err(GatewayError::NotConnected)
        }
    }

    fn apply_fill(state: &mut SimState, order_id: OrderId) -> Option<GatewayEvent> {
        let order = state.orders.get_mut(&order_id)?;
        order.status = OrderStatus::Filled;
        let quantity = order.ticket.quantity;
        let signed = match order.ticket.action {
            OrderAction::Buy => quantity,
            OrderAction::Sell => -quantity,
        };
        let key = (
            order.ticket.account.to_string(),
            order.contract.symbol.clone(),
        );
        let contract = order.contract.clone();
        let account = order.ticket.account.clone();
        state
            .positions
            .entry(key)
            .and_modify(|p| p.quantity += signed)
            .or_insert_with(|| PositionRecord {
                account,
                contract,
                quantity: signed,
                avg_cost: Decimal::ZERO,
            });
        Some(GatewayEvent::OrderStatus {
            order_id,
            status: OrderStatus::Filled,
            filled: quantity,
            remaining: Decimal::ZERO,
        })
    }
}

#[async_trait]
impl GatewayClient for SimGateway {
    fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.event_tx.subscribe()
    }

    async fn connect(&self) -> Result<(), GatewayError> {
        let (next_order_id, accounts) = {
            let mut state = self.lock();
            if state.refuse_connects > 0 {
                state.refuse_connects -= 1;
                return Err(GatewayError::ConnectionRefused(
                    "simulated refusal".to_string(),
                ));
            }
            state.connected = true;
            (state.next_order_id, state.accounts.clone())
        };
        self.send(GatewayEvent::Connected);
        self.send(GatewayEvent::NextValidOrderId(OrderId::new(next_order_id)));
        self.send(GatewayEvent::ManagedAccounts(accounts));
        Ok(())
    }

    async fn request_managed_accounts(&self) -> Result<(), GatewayError> {
        self.ensure_connected()?;
        let accounts = self.lock().accounts.clone();
        self.send(GatewayEvent::ManagedAccounts(accounts));
        Ok(())
    }

    async fn request_account_summary(
        &self,
        request_id: i32,
        _group: &str,
        _tags: &str,
        account: Option<&AccountId>,
    ) -> Result<(), GatewayError> {
        self.ensure_connected()?;
        let rows: Vec<(AccountId, SummaryRow)> = {
            let state = self.lock();
            state
                .summaries
                .iter()
                .filter(|(id, _)| account.is_none_or(|a| a.as_str() == id.as_str()))
                .flat_map(|(id, rows)| {
                    let id = AccountId::new(id.clone());
                    rows.iter().map(move |row| (id.clone(), row.clone()))
                })
                .collect()
        };
        for (account, row) in rows {
            self.send(GatewayEvent::AccountSummary {
                request_id,
                account,
                tag: row.tag,
                value: row.value,
                currency: row.currency,
            });
        }
        self.send(GatewayEvent::AccountSummaryEnd { request_id });
        Ok(())
    }

    async fn cancel_account_summary(&self, _request_id: i32) -> Result<(), GatewayError> {
        self.lock().summary_cancels += 1;
        Ok(())
    }

    async fn request_positions(&self) -> Result<(), GatewayError> {
        self.ensure_connected()?;
        let positions: Vec<PositionRecord> = self.lock().positions.values().cloned().collect();
        for position in positions {
            self.send(GatewayEvent::Position(position));
        }
        self.send(GatewayEvent::PositionEnd);
        Ok(())
    }

    async fn request_open_orders(&self) -> Result<(), GatewayError> {
        self.ensure_connected()?;
        let orders: Vec<(OrderId, SimOrder)> = {
            let state = self.lock();
            state
                .orders
                .iter()
                .filter(|(_, o)| !o.status.is_cancelled())
                .map(|(id, o)| (*id, o.clone()))
                .collect()
        };
        for (order_id, order) in orders {
            self.send(GatewayEvent::OpenOrder {
                order_id,
                contract: order.contract,
                ticket: order.ticket,
                status: order.status,
            });
        }
        self.send(GatewayEvent::OpenOrderEnd);
        Ok(())
    }

    async fn place_order(
        &self,
        order_id: OrderId,
        contract: &Contract,
        ticket: &OrderTicket,
    ) -> Result<(), GatewayError> {
        self.ensure_connected()?;
        let (submitted, fill) = {
            let mut state = self.lock();
            state.orders.insert(
                order_id,
                SimOrder {
                    contract: contract.clone(),
                    ticket: ticket.clone(),
                    status: OrderStatus::Submitted,
                },
            );
            state.placement_log.push((order_id, ticket.clone()));
            state.next_order_id = state.next_order_id.max(order_id.value() + 1);
            let submitted = GatewayEvent::OrderStatus {
                order_id,
                status: OrderStatus::Submitted,
                filled: Decimal::ZERO,
                remaining: ticket.quantity,
            };
            let fill = (state.fill_market_orders && ticket.order_type == OrderType::Market)
                .then(|| Self::apply_fill(&mut state, order_id))
                .flatten();
            (submitted, fill)
        };
        self.send(submitted);
        if let Some(fill) = fill {
            self.send(fill);
        }
        Ok(())
    }

    async fn cancel_order(&self, order_id: OrderId) -> Result<(), GatewayError> {
        self.ensure_connected()?;
        let event = {
            let mut state = self.lock();
            state.orders.get_mut(&order_id).and_then(|order| {
                if order.status.is_terminal() {
                    None
                } else {
                    order.status = OrderStatus::Cancelled;
                    Some(GatewayEvent::OrderStatus {
                        order_id,
                        status: OrderStatus::Cancelled,
                        filled: Decimal::ZERO,
                        remaining: order.ticket.quantity,
                    })
                }
            })
        };
        if let Some(event) = event {
            self.send(event);
        }
        Ok(())
    }
}
