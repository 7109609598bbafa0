//! Open-position workflow.
//!
//! Per-account entry sequence expressed as an explicit state machine. Any
//! guard failure aborts the invocation with a [`WorkflowError`]; nothing is
//! retried.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::gateway::{GatewayClient, GatewayEvent};
use crate::models::{AccountId, OrderAction, OrderId, OrderTicket};

use super::{WorkflowEngine, WorkflowError};

/// Entry order quantity from cash value and reference price.
///
/// `floor(cash × leverage / price)`; zero whenever cash or price cannot
/// size an order.
#[must_use]
pub fn calculate_quantity(cash: Decimal, price: Decimal, leverage: Decimal) -> u64 {
    if cash <= Decimal::ZERO || price <= Decimal::ZERO {
        return 0;
    }
    (cash * leverage / price).floor().to_u64().unwrap_or(0)
}

/// Named states of the open-position workflow.
enum OpenPositionState {
    CancelOpenOrders,
    CoverNegative,
    EnsureFreshCash,
    ComputeQuantity { cash: Decimal },
    PlaceOrder { quantity: u64 },
    AwaitFill { order_id: OrderId, quantity: u64, rx: broadcast::Receiver<GatewayEvent> },
}

impl<G: GatewayClient> WorkflowEngine<G> {
    /// Run the open-position workflow for one account.
    ///
    /// Steps: cancel open orders, cover negative positions, ensure fresh
    /// cash, size the entry from `reference_price`, place a market BUY, and
    /// register a one-shot fill logger. Returns the placed order id.
    ///
    /// # Errors
    ///
    /// Aborts (without retry) on any step failure: command/correlation
    /// errors, missing cash after refresh, a non-positive reference price,
    /// or a computed quantity below one.
    pub async fn open_position(
        &self,
        account: &AccountId,
        reference_price: Decimal,
    ) -> Result<OrderId, WorkflowError> {
        let mut state = OpenPositionState::CancelOpenOrders;
        loop {
            state = match state {
                OpenPositionState::CancelOpenOrders => {
                    self.cancel_open_orders(account).await?;
                    tracing::info!(account = %account, "pre-entry cancellation pass complete");
                    OpenPositionState::CoverNegative
                }
                OpenPositionState::CoverNegative => {
                    self.cover_negative_positions(account).await?;
                    OpenPositionState::EnsureFreshCash
                }
                OpenPositionState::EnsureFreshCash => {
                    let cash = self.ensure_fresh_cash(account).await?;
                    OpenPositionState::ComputeQuantity { cash }
                }
                OpenPositionState::ComputeQuantity { cash } => {
                    if reference_price <= Decimal::ZERO {
                        return Err(WorkflowError::InvalidPrice {
                            price: reference_price,
                        });
                    }
                    let quantity =
                        calculate_quantity(cash, reference_price, self.settings.leverage_factor);
                    if quantity < 1 {
                        return Err(WorkflowError::QuantityTooSmall {
                            account: account.clone(),
                            quantity,
                        });
                    }
                    OpenPositionState::PlaceOrder { quantity }
                }
                OpenPositionState::PlaceOrder { quantity } => {
                    let order_id = self.session.allocate_order_id()?;
                    let ticket = OrderTicket::market(
                        OrderAction::Buy,
                        Decimal::from(quantity),
                        account.clone(),
                    );
                    // Subscribe before placing so the fill cannot be missed.
                    let rx = self.gateway.subscribe();
                    self.gateway
                        .place_order(order_id, &self.settings.contract, &ticket)
                        .await?;
                    tracing::info!(
                        account = %account,
                        order_id = %order_id,
                        quantity,
                        symbol = %self.settings.contract.symbol,
                        "entry order placed"
                    );
                    OpenPositionState::AwaitFill {
                        order_id,
                        quantity,
                        rx,
                    }
                }
                OpenPositionState::AwaitFill {
                    order_id,
                    quantity,
                    rx,
                } => {
                    self.spawn_fill_logger(order_id, quantity, rx);
                    return Ok(order_id);
                }
            };
        }
    }

    /// Run the open-position workflow for every configured account,
    /// strictly in order, refreshing the account summary before each run.
    /// Per-account failures are logged; remaining accounts still run.
    pub async fn open_all(&self, reference_price: Decimal) {
        for account in &self.settings.accounts {
            if let Err(e) = self.cache.refresh(account).await {
                tracing::error!(
                    account = %account,
                    error = %e,
                    "summary refresh failed, skipping account"
                );
                continue;
            }
            if let Err(e) = self.open_position(account, reference_price).await {
                tracing::error!(account = %account, error = %e, "open-position workflow aborted");
            }
        }
    }

    /// Run the open-position workflow for every account that holds no
    /// position in the configured instrument. Per-account invocations run
    /// concurrently; the correlator's per-kind serialization keeps their
    /// event exchanges apart.
    pub async fn open_if_flat(&self, reference_price: Decimal) {
        let runs = self.settings.accounts.iter().map(|account| async move {
            match self.has_open_position(account).await {
                Ok(true) => {
                    tracing::info!(
                        account = %account,
                        symbol = %self.settings.contract.symbol,
                        "existing position, skipping entry"
                    );
                }
                Ok(false) => {
                    if let Err(e) = self.open_position(account, reference_price).await {
                        tracing::error!(
                            account = %account,
                            error = %e,
                            "open-position workflow aborted"
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(account = %account, error = %e, "position check failed");
                }
            }
        });
        futures::future::join_all(runs).await;
    }

    /// Whether the account holds a nonzero position in the configured
    /// instrument.
    async fn has_open_position(&self, account: &AccountId) -> Result<bool, WorkflowError> {
        let positions = self.correlator.positions().await?;
        Ok(positions.iter().any(|p| {
            &p.account == account
                && p.contract.symbol == self.settings.contract.symbol
                && !p.is_flat()
        }))
    }

    /// Flatten every negative position before a new entry: one market BUY
    /// of the absolute quantity per short position.
    async fn cover_negative_positions(&self, account: &AccountId) -> Result<usize, WorkflowError> {
        let positions = self.correlator.positions().await?;
        let shorts: Vec<_> = positions
            .into_iter()
            .filter(|p| &p.account == account && p.is_short())
            .collect();

        for position in &shorts {
            let order_id = self.session.allocate_order_id()?;
            let quantity = position.quantity.abs();
            let ticket = OrderTicket::market(OrderAction::Buy, quantity, account.clone());
            self.gateway
                .place_order(order_id, &self.settings.contract, &ticket)
                .await?;
            tracing::info!(
                account = %account,
                order_id = %order_id,
                quantity = %quantity,
                symbol = %position.contract.symbol,
                "covering negative position"
            );
        }
        Ok(shorts.len())
    }

    /// Cash value for sizing, refreshed if the cached snapshot is stale or
    /// incomplete.
    async fn ensure_fresh_cash(&self, account: &AccountId) -> Result<Decimal, WorkflowError> {
        let cached = self.cache.get(account);
        let usable = cached
            .as_ref()
            .is_some_and(|s| s.total_cash().is_some() && s.is_fresh(self.settings.staleness_window));

        let snapshot = if usable {
            // Freshly checked above; fall through with the cached copy.
            cached.unwrap_or_default()
        } else {
            tracing::info!(account = %account, "account cash stale or missing, refreshing");
            self.cache.refresh(account).await?
        };

        snapshot
            .total_cash()
            .ok_or_else(|| WorkflowError::MissingCash {
                account: account.clone(),
            })
    }

    /// One-shot logger for the entry order reaching `Filled`. Logs, never
    /// retries, gives up silently after the confirmation window.
    fn spawn_fill_logger(
        &self,
        order_id: OrderId,
        quantity: u64,
        mut rx: broadcast::Receiver<GatewayEvent>,
    ) {
        let symbol = self.settings.contract.symbol.clone();
        let window = self.settings.fill_confirm_timeout;
        tokio::spawn(async move {
            let filled = tokio::time::timeout(window, async {
                loop {
                    match rx.recv().await {
                        Ok(GatewayEvent::OrderStatus {
                            order_id: id,
                            status,
                            ..
                        }) if id == order_id && status.is_filled() => break true,
                        Ok(_) => {}
                        Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => break false,
                    }
                }
            })
            .await;

            match filled {
                Ok(true) => {
                    tracing::info!(order_id = %order_id, quantity, symbol = %symbol, "entry order filled");
                }
                _ => {
                    tracing::debug!(order_id = %order_id, "no fill confirmation within window");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    use crate::models::{OrderAction, OrderStatus, OrderTicket};

    use super::super::test_support::{contract, engine_over_sim};
    use super::*;

    fn account() -> AccountId {
        AccountId::new("U1")
    }

    #[test_case(dec!(10000), dec!(66), 189; "reference sizing")]
    #[test_case(dec!(0), dec!(66), 0; "zero cash")]
    #[test_case(dec!(-50), dec!(66), 0; "negative cash")]
    #[test_case(dec!(10000), dec!(0), 0; "zero price")]
    #[test_case(dec!(10000), dec!(-1), 0; "negative price")]
    #[test_case(dec!(100), dec!(66), 1; "small account")]
    #[test_case(dec!(50), dec!(66), 0; "cash below one share")]
    fn quantity_cases(cash: Decimal, price: Decimal, expected: u64) {
        assert_eq!(calculate_quantity(cash, price, dec!(1.25)), expected);
    }

    proptest! {
        #[test]
        fn quantity_never_exceeds_leveraged_cash(
            cash in 1u64..10_000_000,
            price_cents in 1i64..1_000_000,
        ) {
            let cash = Decimal::from(cash);
            let price = Decimal::new(price_cents, 2);
            let quantity = calculate_quantity(cash, price, dec!(1.25));
            // floor() can only round down: notional never exceeds leveraged cash.
            prop_assert!(Decimal::from(quantity) * price <= cash * dec!(1.25));
        }

        #[test]
        fn quantity_is_zero_for_non_positive_inputs(
            cash in -1_000_000i64..=0,
            price_cents in 1i64..1_000_000,
        ) {
            let price = Decimal::new(price_cents, 2);
            prop_assert_eq!(calculate_quantity(Decimal::from(cash), price, dec!(1.25)), 0);
        }
    }

    #[tokio::test]
    async fn opens_position_sized_from_cash() {
        let (gateway, engine) = engine_over_sim(&[account()]).await;
        gateway.seed_cash(&account(), dec!(10000));

        let order_id = engine.open_position(&account(), dec!(66)).await.unwrap();

        let placed = gateway.placed_orders();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].0, order_id);
        assert_eq!(placed[0].1.action, OrderAction::Buy);
        assert_eq!(placed[0].1.quantity, dec!(189));
    }

    #[tokio::test]
    async fn aborts_without_cash() {
        let (gateway, engine) = engine_over_sim(&[account()]).await;

        let result = engine.open_position(&account(), dec!(66)).await;

        assert!(matches!(result, Err(WorkflowError::MissingCash { .. })));
        assert!(gateway.placed_orders().is_empty());
    }

    #[tokio::test]
    async fn aborts_on_zero_cash_quantity() {
        let (gateway, engine) = engine_over_sim(&[account()]).await;
        gateway.seed_cash(&account(), dec!(0));

        let result = engine.open_position(&account(), dec!(66)).await;

        // Zero cash parses fine but sizes to zero, aborting before placement.
        assert!(matches!(
            result,
            Err(WorkflowError::QuantityTooSmall { quantity: 0, .. })
        ));
        assert!(gateway.placed_orders().is_empty());
    }

    #[tokio::test]
    async fn aborts_on_non_positive_price() {
        let (gateway, engine) = engine_over_sim(&[account()]).await;
        gateway.seed_cash(&account(), dec!(10000));

        let result = engine.open_position(&account(), dec!(0)).await;

        assert!(matches!(result, Err(WorkflowError::InvalidPrice { .. })));
        assert!(gateway.placed_orders().is_empty());
    }

    #[tokio::test]
    async fn covers_negative_position_before_entry() {
        let (gateway, engine) = engine_over_sim(&[account()]).await;
        gateway.seed_cash(&account(), dec!(10000));
        gateway.seed_position(&account(), &contract(), dec!(-7), dec!(50));

        engine.open_position(&account(), dec!(66)).await.unwrap();

        let placed = gateway.placed_orders();
        assert_eq!(placed.len(), 2);
        // Exactly one BUY 7 cover before the entry order.
        assert_eq!(placed[0].1.action, OrderAction::Buy);
        assert_eq!(placed[0].1.quantity, dec!(7));
        assert_eq!(placed[1].1.quantity, dec!(189));
    }

    #[tokio::test]
    async fn cancels_open_orders_before_entry() {
        let (gateway, engine) = engine_over_sim(&[account()]).await;
        gateway.seed_cash(&account(), dec!(10000));
        gateway.seed_open_order(
            OrderId::new(9),
            &contract(),
            OrderTicket::market(OrderAction::Buy, dec!(4), account()),
            OrderStatus::Submitted,
        );

        engine.open_position(&account(), dec!(66)).await.unwrap();

        assert_eq!(
            gateway.order_status(OrderId::new(9)),
            Some(OrderStatus::Cancelled)
        );
    }

    #[tokio::test]
    async fn open_if_flat_skips_accounts_with_positions() {
        let flat = AccountId::new("U1");
        let held = AccountId::new("U2");
        let (gateway, engine) = engine_over_sim(&[flat.clone(), held.clone()]).await;
        gateway.seed_cash(&flat, dec!(10000));
        gateway.seed_cash(&held, dec!(10000));
        gateway.seed_position(&held, &contract(), dec!(25), dec!(60));

        engine.open_if_flat(dec!(66)).await;

        let placed = gateway.placed_orders();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].1.account, flat);
    }

    #[tokio::test]
    async fn uses_incrementing_session_order_ids() {
        let (gateway, engine) = engine_over_sim(&[account()]).await;
        gateway.seed_cash(&account(), dec!(10000));
        gateway.seed_position(&account(), &contract(), dec!(-3), dec!(50));

        engine.open_position(&account(), dec!(66)).await.unwrap();

        let placed = gateway.placed_orders();
        assert_eq!(placed.len(), 2);
        assert_eq!(placed[0].0, OrderId::new(100));
        assert_eq!(placed[1].0, OrderId::new(101));
    }
}
