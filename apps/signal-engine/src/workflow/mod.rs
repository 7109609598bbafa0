//! Order workflow engine.
//!
//! Two workflows, each a fixed sequence of steps over the session, cache
//! and correlator:
//!
//! - **Open-position** (per account): CancelOpenOrders → CoverNegative →
//!   EnsureFreshCash → ComputeQuantity → PlaceOrder → AwaitFill.
//! - **Liquidate-all** (accounts strictly sequential): CancelOpenOrders →
//!   flatten every nonzero stock position → confirmation listing.
//!
//! A failed step aborts the whole invocation for that account: reported,
//! never partially retried. Other accounts still run.

mod liquidate;
mod open_position;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::broadcast::error::RecvError;

use crate::account::AccountCache;
use crate::correlator::{CorrelatorError, RequestCorrelator};
use crate::gateway::{GatewayClient, GatewayError, GatewayEvent};
use crate::models::{AccountId, Contract, OrderId};
use crate::session::{Session, SessionError};

pub use open_position::calculate_quantity;

/// Trading parameters for the workflow engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// The one instrument all orders reference.
    pub contract: Contract,
    /// Accounts every workflow iterates.
    pub accounts: Vec<AccountId>,
    /// Fraction of cash value deployed per entry (1.25 = 125%).
    pub leverage_factor: Decimal,
    /// Maximum age of cached account data before a refresh is forced.
    pub staleness_window: Duration,
    /// How long the one-shot fill logger waits for a fill confirmation.
    pub fill_confirm_timeout: Duration,
}

impl EngineSettings {
    /// Settings with the reference defaults for the given contract and
    /// accounts.
    #[must_use]
    pub fn new(contract: Contract, accounts: Vec<AccountId>) -> Self {
        Self {
            contract,
            accounts,
            leverage_factor: rust_decimal_macros::dec!(1.25),
            staleness_window: Duration::from_secs(60),
            fill_confirm_timeout: Duration::from_secs(300),
        }
    }
}

/// Workflow failure. Aborts the current invocation; never retried.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// A correlated request failed.
    #[error(transparent)]
    Correlator(#[from] CorrelatorError),

    /// A gateway command failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The session could not supply an order id.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Cash value still absent after a refresh.
    #[error("account {account}: cash value missing after refresh")]
    MissingCash {
        /// Affected account.
        account: AccountId,
    },

    /// The computed entry quantity is below the minimum order size.
    #[error("account {account}: computed quantity {quantity} is below 1")]
    QuantityTooSmall {
        /// Affected account.
        account: AccountId,
        /// The rejected quantity.
        quantity: u64,
    },

    /// The reference price cannot size an order.
    #[error("reference price {price} is not positive")]
    InvalidPrice {
        /// The rejected price.
        price: Decimal,
    },

    /// Cancellation acknowledgments did not all arrive in time.
    #[error("account {account}: {remaining} cancellations unacknowledged after {timeout:?}")]
    CancelTimeout {
        /// Affected account.
        account: AccountId,
        /// Orders still awaiting acknowledgment.
        remaining: usize,
        /// The acknowledgment window that elapsed.
        timeout: Duration,
    },
}

/// Executes the open-position and liquidate-all workflows.
pub struct WorkflowEngine<G> {
    gateway: Arc<G>,
    correlator: Arc<RequestCorrelator<G>>,
    cache: Arc<AccountCache<G>>,
    session: Arc<Session>,
    settings: EngineSettings,
}

impl<G: GatewayClient> WorkflowEngine<G> {
    /// Create an engine over the shared session components.
    #[must_use]
    pub fn new(
        gateway: Arc<G>,
        correlator: Arc<RequestCorrelator<G>>,
        cache: Arc<AccountCache<G>>,
        session: Arc<Session>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            gateway,
            correlator,
            cache,
            session,
            settings,
        }
    }

    /// The engine's trading parameters.
    #[must_use]
    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Cancel every open order for the account that is not already filled,
    /// then wait until each cancellation is acknowledged with a terminal
    /// status. Returns the number of orders cancelled.
    ///
    /// # Errors
    ///
    /// Fails on listing/cancel command errors or when acknowledgments do
    /// not all arrive within the correlator timeout.
    pub async fn cancel_open_orders(&self, account: &AccountId) -> Result<usize, WorkflowError> {
        let open: Vec<_> = self
            .correlator
            .open_orders()
            .await?
            .into_iter()
            .filter(|o| &o.ticket.account == account && !o.status.is_filled())
            .collect();

        if open.is_empty() {
            tracing::info!(account = %account, "no open orders to cancel");
            return Ok(0);
        }

        // Subscribe before issuing any cancel so no acknowledgment is missed.
        let mut rx = self.gateway.subscribe();
        let mut pending: HashSet<OrderId> = open.iter().map(|o| o.order_id).collect();

        for order in &open {
            tracing::info!(
                account = %account,
                order_id = %order.order_id,
                quantity = %order.ticket.quantity,
                status = %order.status,
                "cancelling open order"
            );
            self.gateway.cancel_order(order.order_id).await?;
        }

        let window = self.correlator.timeout();
        let outcome: Result<Result<(), WorkflowError>, _> =
            tokio::time::timeout(window, async {
                while !pending.is_empty() {
                    match rx.recv().await {
                        Ok(GatewayEvent::OrderStatus {
                            order_id, status, ..
                        }) if pending.contains(&order_id) && status.is_terminal() => {
                            if status.is_cancelled() {
                                tracing::info!(order_id = %order_id, "order cancelled");
                            } else {
                                // Filled (or dead) before the cancel landed;
                                // either way it is no longer open.
                                tracing::info!(
                                    order_id = %order_id,
                                    status = %status,
                                    "order reached terminal state before cancel"
                                );
                            }
                            pending.remove(&order_id);
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(missed)) => {
                            tracing::warn!(missed, "lagged while awaiting cancellations");
                        }
                        Err(RecvError::Closed) => {
                            return Err(WorkflowError::Correlator(CorrelatorError::StreamClosed));
                        }
                    }
                }
                Ok(())
            })
            .await;

        match outcome {
            Ok(Ok(())) => Ok(open.len()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(WorkflowError::CancelTimeout {
                account: account.clone(),
                remaining: pending.len(),
                timeout: window,
            }),
        }
    }
}


#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use crate::models::{OrderAction, OrderStatus, OrderTicket};

    use super::test_support::{contract, engine_over_sim};
    use super::*;

    fn account() -> AccountId {
        AccountId::new("U1")
    }

    #[tokio::test]
    async fn cancel_pass_with_no_open_orders_is_a_noop() {
        let (gateway, engine) = engine_over_sim(&[account()]).await;

        let cancelled = engine.cancel_open_orders(&account()).await.unwrap();

        assert_eq!(cancelled, 0);
        assert!(gateway.placed_orders().is_empty());
    }

    #[tokio::test]
    async fn cancels_working_orders_and_awaits_acks() {
        let (gateway, engine) = engine_over_sim(&[account()]).await;
        gateway.seed_open_order(
            OrderId::new(11),
            &contract(),
            OrderTicket::market(OrderAction::Buy, dec!(5), account()),
            OrderStatus::Submitted,
        );
        gateway.seed_open_order(
            OrderId::new(12),
            &contract(),
            OrderTicket::market(OrderAction::Buy, dec!(3), account()),
            OrderStatus::PreSubmitted,
        );

        let cancelled = engine.cancel_open_orders(&account()).await.unwrap();

        assert_eq!(cancelled, 2);
        assert_eq!(
            gateway.order_status(OrderId::new(11)),
            Some(OrderStatus::Cancelled)
        );
        assert_eq!(
            gateway.order_status(OrderId::new(12)),
            Some(OrderStatus::Cancelled)
        );
    }

    #[tokio::test]
    async fn filled_orders_are_left_alone() {
        let (gateway, engine) = engine_over_sim(&[account()]).await;
        gateway.seed_open_order(
            OrderId::new(21),
            &contract(),
            OrderTicket::market(OrderAction::Buy, dec!(5), account()),
            OrderStatus::Filled,
        );

        let cancelled = engine.cancel_open_orders(&account()).await.unwrap();

        assert_eq!(cancelled, 0);
        assert_eq!(
            gateway.order_status(OrderId::new(21)),
            Some(OrderStatus::Filled)
        );
    }

    #[tokio::test]
    async fn other_accounts_orders_are_untouched() {
        let other = AccountId::new("U2");
        let (gateway, engine) = engine_over_sim(&[account(), other.clone()]).await;
        gateway.seed_open_order(
            OrderId::new(31),
            &contract(),
            OrderTicket::market(OrderAction::Buy, dec!(5), other),
            OrderStatus::Submitted,
        );

        let cancelled = engine.cancel_open_orders(&account()).await.unwrap();

        assert_eq!(cancelled, 0);
        assert_eq!(
            gateway.order_status(OrderId::new(31)),
            Some(OrderStatus::Submitted)
        );
    }
}
