//! Broker Gateway Client port.
//!
//! Interface to the wire-level brokerage session. Commands are imperative
//! async methods; responses and notifications come back on the shared event
//! stream obtained from [`GatewayClient::subscribe`]. The wire protocol
//! itself (framing, authentication, encoding) lives behind this trait; the
//! in-tree [`SimGateway`] implementation provides paper-trading semantics
//! for local runs and tests.

mod events;
mod sim;

use async_trait::async_trait;
use tokio::sync::broadcast;

pub use events::{ConnectionErrorKind, GatewayEvent};
pub use sim::SimGateway;

use crate::models::{AccountId, Contract, OrderId, OrderTicket};

/// Fixed logical request id for account-summary subscriptions.
///
/// The protocol supports one outstanding summary subscription per request
/// id; the engine always uses this one and cancels it before reissuing.
pub const SUMMARY_REQUEST_ID: i32 = 0;

/// Account-summary tags the engine subscribes to.
pub const SUMMARY_TAGS: &str = "NetLiquidation,TotalCashValue";

/// Gateway command error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// The endpoint refused the connection.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// A command was issued without an established session.
    #[error("not connected to gateway")]
    NotConnected,

    /// The gateway rejected a command.
    #[error("gateway rejected command: {0}")]
    Rejected(String),
}

/// Port for the wire-level brokerage session.
///
/// One implementation instance owns one persistent connection. All command
/// methods are cheap to call; results arrive as [`GatewayEvent`]s.
#[async_trait]
pub trait GatewayClient: Send + Sync + 'static {
    /// Subscribe to the shared event stream.
    ///
    /// Each call returns an independent receiver positioned at the
    /// subscription point; events sent before the call are not replayed.
    fn subscribe(&self) -> broadcast::Receiver<GatewayEvent>;

    /// Establish the session. Emits `Connected`, `NextValidOrderId` and
    /// `ManagedAccounts` on success.
    async fn connect(&self) -> Result<(), GatewayError>;

    /// Request the managed-accounts list.
    async fn request_managed_accounts(&self) -> Result<(), GatewayError>;

    /// Open an account-summary subscription.
    ///
    /// Rows stream as `AccountSummary` events and terminate with
    /// `AccountSummaryEnd`. `account` scopes the request to one account;
    /// `None` covers every managed account.
    async fn request_account_summary(
        &self,
        request_id: i32,
        group: &str,
        tags: &str,
        account: Option<&AccountId>,
    ) -> Result<(), GatewayError>;

    /// Cancel an account-summary subscription.
    async fn cancel_account_summary(&self, request_id: i32) -> Result<(), GatewayError>;

    /// Request a position listing. Rows stream as `Position` events and
    /// terminate with `PositionEnd`.
    async fn request_positions(&self) -> Result<(), GatewayError>;

    /// Request an open-order listing. Rows stream as `OpenOrder` events and
    /// terminate with `OpenOrderEnd`.
    async fn request_open_orders(&self) -> Result<(), GatewayError>;

    /// Place an order under the given id.
    async fn place_order(
        &self,
        order_id: OrderId,
        contract: &Contract,
        ticket: &OrderTicket,
    ) -> Result<(), GatewayError>;

    /// Cancel a working order.
    async fn cancel_order(&self, order_id: OrderId) -> Result<(), GatewayError>;
}
