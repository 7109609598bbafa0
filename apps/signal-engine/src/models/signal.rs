//! Inbound webhook signal payloads.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trade direction carried by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    /// Open a position.
    Buy,
    /// Liquidate positions.
    Sell,
}

impl FromStr for SignalAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Error for an unrecognized signal action string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown action: {0}")]
pub struct UnknownAction(pub String);

/// Raw webhook body posted by the signal source.
///
/// All fields are optional on the wire; plain price updates carry only
/// `price`, privileged alerts carry only `alert_id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Trade action (`buy` / `sell`), if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Reference price for sizing, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    /// Alert identifier, if any.
    #[serde(default, rename = "alertId", skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<String>,
}

impl WebhookPayload {
    /// Parse the action field, if present.
    ///
    /// Returns `None` when the field is absent, `Some(Err(_))` when present
    /// but unrecognized.
    #[must_use]
    pub fn parsed_action(&self) -> Option<Result<SignalAction, UnknownAction>> {
        self.action.as_deref().map(SignalAction::from_str)
    }
}
