//! Position records reported by the gateway.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{AccountId, Contract, OrderAction};

/// A signed position in one instrument for one account.
///
/// Produced by position-snapshot events and used transiently during
/// workflows; never persisted beyond the invocation that requested it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRecord {
    /// Owning account.
    pub account: AccountId,
    /// Instrument held.
    pub contract: Contract,
    /// Signed quantity (negative = short).
    pub quantity: Decimal,
    /// Average cost basis.
    pub avg_cost: Decimal,
}

impl PositionRecord {
    /// Whether the position is short.
    #[must_use]
    pub fn is_short(&self) -> bool {
        self.quantity < Decimal::ZERO
    }

    /// Whether there is nothing held.
    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    /// The market order side that would flatten this position, if any.
    #[must_use]
    pub fn liquidating_action(&self) -> Option<OrderAction> {
        if self.quantity > Decimal::ZERO {
            Some(OrderAction::Sell)
        } else if self.quantity < Decimal::ZERO {
            Some(OrderAction::Buy)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn position(quantity: Decimal) -> PositionRecord {
        PositionRecord {
            account: AccountId::new("U1"),
            contract: Contract::stock("TQQQ", "NASDAQ", "USD"),
            quantity,
            avg_cost: dec!(50),
        }
    }

    #[test]
    fn long_position_liquidates_with_sell() {
        assert_eq!(
            position(dec!(10)).liquidating_action(),
            Some(OrderAction::Sell)
        );
    }

    #[test]
    fn short_position_liquidates_with_buy() {
        let p = position(dec!(-5));
        assert!(p.is_short());
        assert_eq!(p.liquidating_action(), Some(OrderAction::Buy));
    }

    #[test]
    fn flat_position_needs_no_order() {
        let p = position(Decimal::ZERO);
        assert!(p.is_flat());
        assert_eq!(p.liquidating_action(), None);
    }
}
