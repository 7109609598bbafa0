//! Order identifiers, tickets and status lifecycle.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::AccountId;

/// Gateway-assigned order identifier.
///
/// The gateway announces the first valid value on connect; the session
/// increments locally for every placed order. At most one order is ever
/// placed with a given value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(i64);

impl OrderId {
    /// Wrap a raw order id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw id value.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }

    /// The id following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderAction {
    /// Buy to open or cover.
    Buy,
    /// Sell to close or short.
    Sell,
}

impl OrderAction {
    /// The opposite side (used to flatten a position).
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl fmt::Display for OrderAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    /// Market order.
    #[serde(rename = "MKT")]
    Market,
    /// Limit order.
    #[serde(rename = "LMT")]
    Limit,
}

/// Order status as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Accepted by the client, not yet transmitted.
    PendingSubmit,
    /// Cancellation requested, not yet acknowledged.
    PendingCancel,
    /// Transmitted but not yet live at the exchange.
    PreSubmitted,
    /// Live at the exchange.
    Submitted,
    /// Fully executed.
    Filled,
    /// Cancelled by request.
    Cancelled,
    /// Cancelled by the gateway itself.
    ApiCancelled,
    /// Rejected or otherwise inactive.
    Inactive,
}

impl OrderStatus {
    /// Whether the order has fully executed.
    #[must_use]
    pub const fn is_filled(self) -> bool {
        matches!(self, Self::Filled)
    }

    /// Whether the order reached a cancelled state.
    #[must_use]
    pub const fn is_cancelled(self) -> bool {
        matches!(self, Self::Cancelled | Self::ApiCancelled)
    }

    /// Whether no further status transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::ApiCancelled | Self::Inactive
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PendingSubmit => "PendingSubmit",
            Self::PendingCancel => "PendingCancel",
            Self::PreSubmitted => "PreSubmitted",
            Self::Submitted => "Submitted",
            Self::Filled => "Filled",
            Self::Cancelled => "Cancelled",
            Self::ApiCancelled => "ApiCancelled",
            Self::Inactive => "Inactive",
        };
        write!(f, "{s}")
    }
}

/// Order parameters sent with a placement command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTicket {
    /// Order side.
    pub action: OrderAction,
    /// Order type.
    pub order_type: OrderType,
    /// Quantity to trade.
    pub quantity: Decimal,
    /// Account the order trades for.
    pub account: AccountId,
    /// Transmit immediately rather than staging.
    pub transmit: bool,
}

impl OrderTicket {
    /// Create a market order ticket that transmits immediately.
    #[must_use]
    pub const fn market(action: OrderAction, quantity: Decimal, account: AccountId) -> Self {
        Self {
            action,
            order_type: OrderType::Market,
            quantity,
            account,
            transmit: true,
        }
    }
}
