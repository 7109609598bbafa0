//! Liquidate-all workflow.
//!
//! Accounts are processed strictly sequentially, with no concurrent order
//! placement across accounts, so listener exchanges on the shared event
//! stream never interleave.

use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::gateway::GatewayClient;
use crate::models::{AccountId, OrderTicket};

use super::{WorkflowEngine, WorkflowError};

/// Last observed (quantity, avg cost) per (account, symbol) during the
/// confirmation pass. Shared across accounts within one invocation so
/// unchanged rows are only reported once.
type ObservedPositions = HashMap<(AccountId, String), (Decimal, Decimal)>;

impl<G: GatewayClient> WorkflowEngine<G> {
    /// Liquidate every stock position in every configured account.
    ///
    /// Per account: cancel open orders, flatten each nonzero stock position
    /// with an opposite-side market order, then re-list positions purely to
    /// log residual changes. Per-account failures are logged and do not
    /// stop the remaining accounts.
    pub async fn liquidate_all(&self) {
        let mut observed = ObservedPositions::new();
        for account in &self.settings.accounts {
            tracing::info!(account = %account, "liquidating all positions");
            if let Err(e) = self.liquidate_account(account, &mut observed).await {
                tracing::error!(account = %account, error = %e, "liquidation workflow aborted");
            }
        }
    }

    async fn liquidate_account(
        &self,
        account: &AccountId,
        observed: &mut ObservedPositions,
    ) -> Result<(), WorkflowError> {
        self.cancel_open_orders(account).await?;
        tracing::info!(account = %account, "pre-liquidation cancellation pass complete");

        let positions = self.correlator.positions().await?;
        let mut placed = 0usize;
        for position in positions
            .iter()
            .filter(|p| &p.account == account && p.contract.is_stock())
        {
            // A zero position is skipped, not an error.
            let Some(action) = position.liquidating_action() else {
                tracing::info!(
                    account = %account,
                    symbol = %position.contract.symbol,
                    "zero position, nothing to liquidate"
                );
                continue;
            };

            let order_id = self.session.allocate_order_id()?;
            let quantity = position.quantity.abs();
            let ticket = OrderTicket::market(action, quantity, account.clone());
            tracing::info!(
                account = %account,
                order_id = %order_id,
                action = %action,
                quantity = %quantity,
                symbol = %position.contract.symbol,
                "placing liquidation order"
            );
            self.gateway
                .place_order(order_id, &self.settings.contract, &ticket)
                .await?;
            placed += 1;
        }

        if placed == 0 {
            // An empty listing means nothing to liquidate, not a failure.
            tracing::info!(account = %account, "no positions to liquidate");
        }

        self.log_residual_positions(account, observed).await;
        Ok(())
    }

    /// Confirmation pass: re-list positions and log rows that changed since
    /// last observed. Log-only; a failure here is reported, not retried.
    async fn log_residual_positions(&self, account: &AccountId, observed: &mut ObservedPositions) {
        let positions = match self.correlator.positions().await {
            Ok(positions) => positions,
            Err(e) => {
                tracing::warn!(account = %account, error = %e, "confirmation listing failed");
                return;
            }
        };

        for position in positions
            .iter()
            .filter(|p| self.settings.accounts.contains(&p.account) && p.contract.is_stock())
        {
            let key = (position.account.clone(), position.contract.symbol.clone());
            let row = (position.quantity, position.avg_cost);
            if observed.get(&key) != Some(&row) {
                tracing::info!(
                    account = %position.account,
                    symbol = %position.contract.symbol,
                    quantity = %position.quantity,
                    avg_cost = %position.avg_cost,
                    currency = %position.contract.currency,
                    "residual position"
                );
                observed.insert(key, row);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use crate::models::{Contract, OrderAction, OrderId, OrderStatus, OrderTicket};

    use super::super::test_support::{contract, engine_over_sim};
    use super::*;

    #[tokio::test]
    async fn flattens_long_and_short_positions() {
        let a = AccountId::new("A");
        let b = AccountId::new("B");
        let (gateway, engine) = engine_over_sim(&[a.clone(), b.clone()]).await;
        gateway.seed_position(&a, &contract(), dec!(10), dec!(50));
        gateway.seed_position(&a, &Contract::stock("SQQQ", "NASDAQ", "USD"), dec!(-5), dec!(20));
        gateway.seed_position(&b, &contract(), dec!(0), dec!(0));

        engine.liquidate_all().await;

        let placed = gateway.placed_orders();
        assert_eq!(placed.len(), 2);
        let sells: Vec<_> = placed
            .iter()
            .filter(|(_, t)| t.action == OrderAction::Sell)
            .collect();
        let buys: Vec<_> = placed
            .iter()
            .filter(|(_, t)| t.action == OrderAction::Buy)
            .collect();
        assert_eq!(sells.len(), 1);
        assert_eq!(sells[0].1.quantity, dec!(10));
        assert_eq!(sells[0].1.account, a);
        assert_eq!(buys.len(), 1);
        assert_eq!(buys[0].1.quantity, dec!(5));
        assert_eq!(buys[0].1.account, a);
    }

    #[tokio::test]
    async fn empty_book_places_nothing() {
        let a = AccountId::new("A");
        let (gateway, engine) = engine_over_sim(&[a]).await;

        engine.liquidate_all().await;

        assert!(gateway.placed_orders().is_empty());
    }

    #[tokio::test]
    async fn cancels_open_orders_before_liquidating() {
        let a = AccountId::new("A");
        let (gateway, engine) = engine_over_sim(&[a.clone()]).await;
        gateway.seed_position(&a, &contract(), dec!(10), dec!(50));
        gateway.seed_open_order(
            OrderId::new(3),
            &contract(),
            OrderTicket::market(OrderAction::Buy, dec!(2), a),
            OrderStatus::Submitted,
        );

        engine.liquidate_all().await;

        assert_eq!(
            gateway.order_status(OrderId::new(3)),
            Some(OrderStatus::Cancelled)
        );
        // The liquidation order itself was still placed.
        assert_eq!(gateway.placed_orders().len(), 1);
    }

    #[tokio::test]
    async fn non_stock_positions_are_ignored() {
        let a = AccountId::new("A");
        let (gateway, engine) = engine_over_sim(&[a.clone()]).await;
        let mut fx = Contract::stock("EUR", "IDEALPRO", "USD");
        fx.sec_type = crate::models::SecurityType::Cash;
        gateway.seed_position(&a, &fx, dec!(1000), dec!(1));

        engine.liquidate_all().await;

        assert!(gateway.placed_orders().is_empty());
    }

    #[tokio::test]
    async fn accounts_are_processed_in_order() {
        let a = AccountId::new("A");
        let b = AccountId::new("B");
        let (gateway, engine) = engine_over_sim(&[a.clone(), b.clone()]).await;
        gateway.seed_position(&a, &contract(), dec!(4), dec!(50));
        gateway.seed_position(&b, &contract(), dec!(6), dec!(50));

        engine.liquidate_all().await;

        let placed = gateway.placed_orders();
        assert_eq!(placed.len(), 2);
        assert_eq!(placed[0].1.account, a);
        assert_eq!(placed[1].1.account, b);
    }
}
