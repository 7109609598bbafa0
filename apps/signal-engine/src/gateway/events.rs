//! Events emitted on the gateway's shared stream.
//!
//! The wire protocol multiplexes every consumer onto one event stream:
//! solicited responses (account summaries, position listings, open-order
//! listings) and unsolicited notifications (order status, disconnects)
//! arrive interleaved. Consumers subscribe via
//! [`GatewayClient::subscribe`](super::GatewayClient::subscribe) and receive
//! their own isolated copy of the stream.

use rust_decimal::Decimal;

use crate::models::{AccountId, Contract, OrderId, OrderStatus, OrderTicket, PositionRecord};

/// Why a connection attempt or session failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// The gateway endpoint refused the connection.
    Refused,
    /// Any other connection-level error.
    Other,
}

/// One event from the gateway's shared stream.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// The session is established.
    Connected,
    /// The session dropped.
    Disconnected {
        /// Human-readable cause.
        reason: String,
    },
    /// A connection-level error outside an established session.
    ConnectionError {
        /// Error classification.
        kind: ConnectionErrorKind,
        /// Error details.
        message: String,
    },
    /// First usable order id, announced once per connection.
    NextValidOrderId(OrderId),
    /// Accounts the session is authorized to manage.
    ManagedAccounts(Vec<AccountId>),
    /// Unsolicited account value update.
    AccountValue {
        /// Account the value belongs to.
        account: AccountId,
        /// Tag name (e.g. `TotalCashValue`).
        tag: String,
        /// Raw reported value.
        value: String,
        /// Reporting currency.
        currency: String,
    },
    /// One row of a solicited account summary.
    AccountSummary {
        /// Logical request id the row answers.
        request_id: i32,
        /// Account the row belongs to.
        account: AccountId,
        /// Tag name.
        tag: String,
        /// Raw reported value.
        value: String,
        /// Reporting currency.
        currency: String,
    },
    /// Terminating event of an account-summary request.
    AccountSummaryEnd {
        /// Logical request id being terminated.
        request_id: i32,
    },
    /// One row of a position listing.
    Position(PositionRecord),
    /// Terminating event of a position listing.
    PositionEnd,
    /// One row of an open-order listing.
    OpenOrder {
        /// Gateway order id.
        order_id: OrderId,
        /// Instrument the order trades.
        contract: Contract,
        /// Order parameters as placed.
        ticket: OrderTicket,
        /// Current status.
        status: OrderStatus,
    },
    /// Unsolicited order status transition.
    OrderStatus {
        /// Gateway order id.
        order_id: OrderId,
        /// New status.
        status: OrderStatus,
        /// Quantity filled so far.
        filled: Decimal,
        /// Quantity still working.
        remaining: Decimal,
    },
    /// Terminating event of an open-order listing.
    OpenOrderEnd,
}
