//! Trading instrument descriptor.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Security type of a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityType {
    /// Common stock.
    #[serde(rename = "STK")]
    Stock,
    /// Equity option.
    #[serde(rename = "OPT")]
    Option,
    /// Future.
    #[serde(rename = "FUT")]
    Future,
    /// Currency pair.
    #[serde(rename = "CASH")]
    Cash,
}

impl fmt::Display for SecurityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stock => write!(f, "STK"),
            Self::Option => write!(f, "OPT"),
            Self::Future => write!(f, "FUT"),
            Self::Cash => write!(f, "CASH"),
        }
    }
}

/// Contract descriptor for the traded instrument.
///
/// One fixed contract is configured at startup; all orders reference it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    /// Ticker symbol.
    pub symbol: String,
    /// Security type.
    pub sec_type: SecurityType,
    /// Routing exchange.
    pub exchange: String,
    /// Primary listing exchange.
    pub primary_exchange: String,
    /// Trading currency.
    pub currency: String,
}

impl Contract {
    /// Create a stock contract with SMART routing.
    #[must_use]
    pub fn stock(
        symbol: impl Into<String>,
        primary_exchange: impl Into<String>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            sec_type: SecurityType::Stock,
            exchange: "SMART".to_string(),
            primary_exchange: primary_exchange.into(),
            currency: currency.into(),
        }
    }

    /// Whether this contract is a stock.
    #[must_use]
    pub const fn is_stock(&self) -> bool {
        matches!(self.sec_type, SecurityType::Stock)
    }
}

impl fmt::Display for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.symbol, self.sec_type)
    }
}
