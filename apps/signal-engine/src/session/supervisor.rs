//! Connection supervision with backoff reconnection.
//!
//! Owns connect/reconnect against the gateway for the process lifetime.
//! A disconnect or a refused connection schedules a retry after a delay
//! that starts at a base value, doubles on each consecutive failure up to a
//! cap, and resets to the base on a successful reconnect. The supervisor is
//! also the single owner of session/cache mutations driven by unsolicited
//! events: it seeds the order-id counter, records connection transitions
//! and merges account-value updates.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::account::AccountCache;
use crate::correlator::RequestCorrelator;
use crate::gateway::{ConnectionErrorKind, GatewayClient, GatewayError, GatewayEvent};

use super::{ConnectionState, Session};

/// Exponential backoff schedule for reconnect attempts.
///
/// No jitter: the delay sequence is exact (base, 2×base, … , cap) and a
/// successful connection resets it.
#[derive(Debug)]
pub struct ReconnectPolicy {
    base: Duration,
    max: Duration,
    current: Duration,
    last_logged: Option<Duration>,
}

impl ReconnectPolicy {
    /// Create a policy with the given base and cap.
    #[must_use]
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: base,
            last_logged: None,
        }
    }

    /// The delay to wait before the next attempt; doubles the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Reset the schedule after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.base;
        self.last_logged = None;
    }

    /// Whether this delay value has not been logged yet.
    ///
    /// Deduplicates reconnect logging: when the timer keeps firing at the
    /// capped delay, only the first occurrence of each distinct value is
    /// reported.
    pub fn should_log(&mut self, delay: Duration) -> bool {
        if self.last_logged == Some(delay) {
            return false;
        }
        self.last_logged = Some(delay);
        true
    }
}

/// Supervises the gateway session for the process lifetime.
pub struct ConnectionSupervisor<G> {
    gateway: Arc<G>,
    session: Arc<Session>,
    cache: Arc<AccountCache<G>>,
    correlator: Arc<RequestCorrelator<G>>,
    policy: ReconnectPolicy,
    shutdown: CancellationToken,
}

impl<G: GatewayClient> ConnectionSupervisor<G> {
    /// Create a supervisor. Call [`ConnectionSupervisor::spawn`] to start it.
    #[must_use]
    pub fn new(
        gateway: Arc<G>,
        session: Arc<Session>,
        cache: Arc<AccountCache<G>>,
        correlator: Arc<RequestCorrelator<G>>,
        policy: ReconnectPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            gateway,
            session,
            cache,
            correlator,
            policy,
            shutdown,
        }
    }

    /// Spawn the supervision task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut rx = self.gateway.subscribe();
        let mut reconnect_at: Option<Instant> = None;

        self.attempt_connect(&mut reconnect_at).await;

        loop {
            let deadline = reconnect_at.unwrap_or_else(Instant::now);
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                event = rx.recv() => match event {
                    Ok(event) => self.handle_event(event, &mut reconnect_at),
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "supervisor lagged on event stream");
                    }
                    Err(RecvError::Closed) => break,
                },
                () = tokio::time::sleep_until(deadline), if reconnect_at.is_some() => {
                    reconnect_at = None;
                    self.attempt_connect(&mut reconnect_at).await;
                }
            }
        }
        tracing::debug!("connection supervisor stopped");
    }

    async fn attempt_connect(&mut self, reconnect_at: &mut Option<Instant>) {
        self.session.set_state(ConnectionState::Connecting);
        match self.gateway.connect().await {
            // Success is recorded when the Connected event arrives.
            Ok(()) => {}
            Err(GatewayError::ConnectionRefused(message)) => {
                self.session.set_state(ConnectionState::Disconnected);
                self.schedule_reconnect(&message, reconnect_at);
            }
            Err(e) => {
                // Not a refusal: report it without touching the schedule.
                self.session.set_state(ConnectionState::Disconnected);
                tracing::error!(error = %e, "gateway connection attempt failed");
            }
        }
    }

    fn schedule_reconnect(&mut self, reason: &str, reconnect_at: &mut Option<Instant>) {
        if reconnect_at.is_some() {
            return;
        }
        let delay = self.policy.next_delay();
        if self.policy.should_log(delay) {
            tracing::error!(
                delay_secs = delay.as_secs_f64(),
                reason,
                "scheduling gateway reconnect"
            );
        }
        *reconnect_at = Some(Instant::now() + delay);
    }

    fn handle_event(&mut self, event: GatewayEvent, reconnect_at: &mut Option<Instant>) {
        match event {
            GatewayEvent::Connected => {
                self.session.set_state(ConnectionState::Connected);
                self.policy.reset();
                tracing::info!("gateway session established");
                self.spawn_startup_sync();
            }
            GatewayEvent::Disconnected { reason } => {
                self.session.set_state(ConnectionState::Disconnected);
                self.schedule_reconnect(&reason, reconnect_at);
            }
            GatewayEvent::ConnectionError { kind, message } => match kind {
                ConnectionErrorKind::Refused => self.schedule_reconnect(&message, reconnect_at),
                ConnectionErrorKind::Other => {
                    tracing::error!(message = %message, "gateway connection error");
                }
            },
            GatewayEvent::NextValidOrderId(id) => {
                self.session.seed_order_id(id);
                tracing::debug!(order_id = %id, "next valid order id");
            }
            GatewayEvent::ManagedAccounts(accounts) => {
                tracing::info!(?accounts, "managed accounts");
            }
            GatewayEvent::AccountValue {
                account,
                tag,
                value,
                currency,
            } => {
                self.cache.apply_value(&account, &tag, &value, &currency);
            }
            // Solicited rows are consumed by their correlated requests.
            _ => {}
        }
    }

    /// Initial sync after (re)connect: managed accounts, one summary pass
    /// over every account, and a position listing, all logged.
    fn spawn_startup_sync(&self) {
        let gateway = Arc::clone(&self.gateway);
        let cache = Arc::clone(&self.cache);
        let correlator = Arc::clone(&self.correlator);
        tokio::spawn(async move {
            if let Err(e) = gateway.request_managed_accounts().await {
                tracing::warn!(error = %e, "managed accounts request failed");
            }
            match cache.refresh_all().await {
                Ok(()) => {
                    for account in cache.accounts() {
                        if let Some(snapshot) = cache.get(&account) {
                            tracing::info!(
                                account = %account,
                                net_liquidation = ?snapshot.net_liquidation(),
                                total_cash = ?snapshot.total_cash(),
                                "account summary"
                            );
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "initial account summary failed"),
            }
            match correlator.positions().await {
                Ok(positions) => {
                    for position in &positions {
                        tracing::info!(
                            account = %position.account,
                            symbol = %position.contract.symbol,
                            quantity = %position.quantity,
                            avg_cost = %position.avg_cost,
                            "position"
                        );
                    }
                    tracing::info!(count = positions.len(), "position listing complete");
                }
                Err(e) => tracing::warn!(error = %e, "initial position listing failed"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut policy =
            ReconnectPolicy::new(Duration::from_millis(5000), Duration::from_millis(120_000));

        let mut delays = Vec::new();
        for _ in 0..8 {
            delays.push(policy.next_delay().as_millis());
        }

        assert_eq!(
            delays,
            vec![5000, 10000, 20000, 40000, 80000, 120_000, 120_000, 120_000]
        );
    }

    #[test]
    fn reset_returns_to_base() {
        let mut policy = ReconnectPolicy::new(Duration::from_secs(5), Duration::from_secs(120));
        let _ = policy.next_delay();
        let _ = policy.next_delay();

        policy.reset();

        assert_eq!(policy.next_delay(), Duration::from_secs(5));
    }

    #[test]
    fn logs_once_per_distinct_delay() {
        let mut policy = ReconnectPolicy::new(Duration::from_secs(5), Duration::from_secs(10));

        let d1 = policy.next_delay(); // 5s
        assert!(policy.should_log(d1));
        let d2 = policy.next_delay(); // 10s
        assert!(policy.should_log(d2));
        let d3 = policy.next_delay(); // capped at 10s
        assert!(!policy.should_log(d3));

        policy.reset();
        let d4 = policy.next_delay(); // 5s again, logged again
        assert!(policy.should_log(d4));
    }
}
