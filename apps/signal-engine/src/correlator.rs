//! Request/response correlation over the shared event stream.
//!
//! The gateway protocol exposes solicited responses as free-floating events
//! on one multiplexed stream. A correlated call gives such an exchange
//! request/response shape: it takes the per-kind serialization lock,
//! subscribes a fresh receiver (a clean slate: nothing from earlier calls
//! can leak in), issues the start command, folds matching events until the
//! terminating event, and retires its receiver before delivering the
//! result. At most one logical request of a given kind is in flight at a
//! time, so concurrently triggered workflows cannot cross-deliver events.
//!
//! Every call is bounded by a timeout; a terminating event that never
//! arrives is a defined failure, not a hang.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;

use crate::gateway::{GatewayClient, GatewayError, GatewayEvent};
use crate::models::{Contract, OrderId, OrderStatus, OrderTicket, PositionRecord};

/// Kinds of correlated requests the protocol supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Open-order listing, terminated by `OpenOrderEnd`.
    OpenOrders,
    /// Position listing, terminated by `PositionEnd`.
    Positions,
    /// Account-summary refresh, terminated by `AccountSummaryEnd`.
    AccountSummary,
}

impl RequestKind {
    const COUNT: usize = 3;

    const fn index(self) -> usize {
        match self {
            Self::OpenOrders => 0,
            Self::Positions => 1,
            Self::AccountSummary => 2,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenOrders => write!(f, "open-orders"),
            Self::Positions => write!(f, "positions"),
            Self::AccountSummary => write!(f, "account-summary"),
        }
    }
}

/// Correlated request failure.
#[derive(Debug, thiserror::Error)]
pub enum CorrelatorError {
    /// The terminating event did not arrive within the timeout.
    #[error("timed out waiting for {kind} response")]
    Timeout {
        /// Request kind that timed out.
        kind: RequestKind,
    },

    /// The gateway rejected the start command.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The event stream shut down mid-request.
    #[error("gateway event stream closed")]
    StreamClosed,
}

/// One row of an open-order listing.
#[derive(Debug, Clone)]
pub struct OpenOrderSnapshot {
    /// Gateway order id.
    pub order_id: OrderId,
    /// Instrument the order trades.
    pub contract: Contract,
    /// Order parameters as placed.
    pub ticket: OrderTicket,
    /// Status at listing time.
    pub status: OrderStatus,
}

/// Correlates commands with their solicited event responses.
pub struct RequestCorrelator<G> {
    gateway: Arc<G>,
    timeout: Duration,
    locks: [Mutex<()>; RequestKind::COUNT],
}

impl<G: GatewayClient> RequestCorrelator<G> {
    /// Create a correlator with the given per-request timeout.
    #[must_use]
    pub fn new(gateway: Arc<G>, timeout: Duration) -> Self {
        Self {
            gateway,
            timeout,
            locks: [Mutex::new(()), Mutex::new(()), Mutex::new(())],
        }
    }

    /// The per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one correlated request.
    ///
    /// `start` is awaited after the serialization lock is held and the event
    /// receiver is live, so no response event can be missed. `step` folds
    /// each event into the accumulator and returns `true` on the terminating
    /// event.
    ///
    /// # Errors
    ///
    /// Fails if the start command fails, the stream closes, or the
    /// terminating event does not arrive within the timeout.
    pub async fn run<T, S, F>(
        &self,
        kind: RequestKind,
        init: T,
        start: S,
        mut step: F,
    ) -> Result<T, CorrelatorError>
    where
        T: Send,
        S: Future<Output = Result<(), GatewayError>> + Send,
        F: FnMut(GatewayEvent, &mut T) -> bool + Send,
    {
        let _guard = self.locks[kind.index()].lock().await;
        let mut rx = self.gateway.subscribe();
        start.await?;

        let mut acc = init;
        let outcome = tokio::time::timeout(self.timeout, async {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if step(event, &mut acc) {
                            break Ok(());
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, kind = %kind, "event stream lagged mid-request");
                    }
                    Err(RecvError::Closed) => break Err(CorrelatorError::StreamClosed),
                }
            }
        })
        .await;

        // Receiver and lock guard drop here: this call's subscription is
        // fully retired before the result is delivered.
        match outcome {
            Ok(Ok(())) => Ok(acc),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CorrelatorError::Timeout { kind }),
        }
    }

    /// List all positions across accounts.
    pub async fn positions(&self) -> Result<Vec<PositionRecord>, CorrelatorError> {
        self.run(
            RequestKind::Positions,
            Vec::new(),
            async { self.gateway.request_positions().await },
            |event, acc| match event {
                GatewayEvent::Position(position) => {
                    acc.push(position);
                    false
                }
                GatewayEvent::PositionEnd => true,
                _ => false,
            },
        )
        .await
    }

    /// List all open orders across accounts.
    pub async fn open_orders(&self) -> Result<Vec<OpenOrderSnapshot>, CorrelatorError> {
        self.run(
            RequestKind::OpenOrders,
            Vec::new(),
            async { self.gateway.request_open_orders().await },
            |event, acc| match event {
                GatewayEvent::OpenOrder {
                    order_id,
                    contract,
                    ticket,
                    status,
                } => {
                    acc.push(OpenOrderSnapshot {
                        order_id,
                        contract,
                        ticket,
                        status,
                    });
                    false
                }
                GatewayEvent::OpenOrderEnd => true,
                _ => false,
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use crate::gateway::SimGateway;
    use crate::models::{AccountId, OrderAction};

    use super::*;

    fn account() -> AccountId {
        AccountId::new("U1")
    }

    fn contract() -> Contract {
        Contract::stock("TQQQ", "NASDAQ", "USD")
    }

    async fn connected_sim() -> Arc<SimGateway> {
        let gateway = Arc::new(SimGateway::new(&[account()]));
        gateway.connect().await.unwrap();
        gateway
    }

    #[tokio::test]
    async fn positions_listing_terminates_on_end_event() {
        let gateway = connected_sim().await;
        gateway.seed_position(&account(), &contract(), dec!(10), dec!(50));
        let correlator = RequestCorrelator::new(Arc::clone(&gateway), Duration::from_secs(5));

        let positions = correlator.positions().await.unwrap();

        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].quantity, dec!(10));
    }

    #[tokio::test]
    async fn sequential_calls_do_not_observe_each_other() {
        let gateway = connected_sim().await;
        gateway.seed_position(&account(), &contract(), dec!(10), dec!(50));
        let correlator = RequestCorrelator::new(Arc::clone(&gateway), Duration::from_secs(5));

        let first = correlator.positions().await.unwrap();
        // The second call subscribes after the first call's events were
        // emitted; a leaked subscription would double-count rows.
        let second = correlator.positions().await.unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_same_kind_calls_serialize() {
        let gateway = connected_sim().await;
        gateway.seed_position(&account(), &contract(), dec!(7), dec!(50));
        let correlator = Arc::new(RequestCorrelator::new(
            Arc::clone(&gateway),
            Duration::from_secs(5),
        ));

        let a = Arc::clone(&correlator);
        let b = Arc::clone(&correlator);
        let (ra, rb) = tokio::join!(
            async move { a.positions().await },
            async move { b.positions().await }
        );

        assert_eq!(ra.unwrap().len(), 1);
        assert_eq!(rb.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_terminator_times_out() {
        let gateway = connected_sim().await;
        let correlator = RequestCorrelator::new(Arc::clone(&gateway), Duration::from_secs(30));

        // A start command that emits nothing: the terminating event never
        // arrives and the call must fail rather than hang.
        let result = correlator
            .run(
                RequestKind::Positions,
                (),
                async { Ok(()) },
                |event, _acc| matches!(event, GatewayEvent::PositionEnd),
            )
            .await;

        assert!(matches!(
            result,
            Err(CorrelatorError::Timeout {
                kind: RequestKind::Positions
            })
        ));
    }

    #[tokio::test]
    async fn start_command_failure_propagates() {
        let gateway = Arc::new(SimGateway::new(&[account()]));
        // Not connected: request_positions is rejected.
        let correlator = RequestCorrelator::new(Arc::clone(&gateway), Duration::from_secs(5));

        let result = correlator.positions().await;

        assert!(matches!(
            result,
            Err(CorrelatorError::Gateway(GatewayError::NotConnected))
        ));
    }

    #[tokio::test]
    async fn open_orders_listing_collects_rows() {
        let gateway = connected_sim().await;
        gateway.seed_open_order(
            OrderId::new(5),
            &contract(),
            OrderTicket::market(OrderAction::Buy, dec!(3), account()),
            OrderStatus::Submitted,
        );
        let correlator = RequestCorrelator::new(Arc::clone(&gateway), Duration::from_secs(5));

        let orders = correlator.open_orders().await.unwrap();

        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].order_id, OrderId::new(5));
        assert_eq!(orders[0].status, OrderStatus::Submitted);
    }
}
