//! Account identity and cached account-summary snapshots.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Summary tag for the account's net liquidation value.
pub const TAG_NET_LIQUIDATION: &str = "NetLiquidation";

/// Summary tag for the account's total cash value.
pub const TAG_TOTAL_CASH: &str = "TotalCashValue";

/// Brokerage account identifier (e.g. `U1234567`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Create a new account ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A single summary value with its reporting currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagValue {
    /// Reported value.
    pub value: Decimal,
    /// Reporting currency (e.g. `USD`).
    pub currency: String,
}

/// Cached account-summary snapshot for one account.
///
/// Mutated only by handlers processing account-summary and account-value
/// events; read by the order workflow engine. There is no automatic expiry:
/// readers needing freshness check [`AccountSnapshot::is_fresh`] and trigger
/// a refresh themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    values: HashMap<String, TagValue>,
    last_updated: DateTime<Utc>,
}

impl AccountSnapshot {
    /// Create an empty snapshot stamped with the current time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
            last_updated: Utc::now(),
        }
    }

    /// Store a tag value and refresh the update stamp.
    pub fn set(&mut self, tag: impl Into<String>, value: Decimal, currency: impl Into<String>) {
        self.values.insert(
            tag.into(),
            TagValue {
                value,
                currency: currency.into(),
            },
        );
        self.last_updated = Utc::now();
    }

    /// Look up a tag value.
    #[must_use]
    pub fn get(&self, tag: &str) -> Option<&TagValue> {
        self.values.get(tag)
    }

    /// The account's total cash value, if reported.
    #[must_use]
    pub fn total_cash(&self) -> Option<Decimal> {
        self.get(TAG_TOTAL_CASH).map(|tv| tv.value)
    }

    /// The account's net liquidation value, if reported.
    #[must_use]
    pub fn net_liquidation(&self) -> Option<Decimal> {
        self.get(TAG_NET_LIQUIDATION).map(|tv| tv.value)
    }

    /// When this snapshot was last written to.
    #[must_use]
    pub const fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// Whether the snapshot is within the staleness window.
    #[must_use]
    pub fn is_fresh(&self, window: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.last_updated);
        age.to_std().is_ok_and(|age| age <= window)
    }

    /// Whether the snapshot holds no values at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Default for AccountSnapshot {
    fn default() -> Self {
        Self::new()
    }
}
