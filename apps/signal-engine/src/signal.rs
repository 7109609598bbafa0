//! Signal admission gate and price state.
//!
//! The gate is a single-flight debounce in front of the workflow engine:
//! a qualifying signal takes the lock for a fixed cool-down, and any
//! qualifying signal arriving inside that window is rejected with the
//! holder's reason. The lock debounces signal *admission*, not workflow
//! completion: it self-expires after the cool-down regardless of whether
//! the triggered workflow has finished. Non-qualifying signals (plain price
//! updates) bypass the gate entirely.

use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::time::Instant;

use crate::models::WebhookPayload;

/// Outcome of presenting a signal to the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Qualifying signal, lock acquired.
    Admitted,
    /// Qualifying signal, lock already held.
    Rejected {
        /// The reason recorded by the lock holder.
        reason: String,
    },
    /// Non-qualifying signal; the gate does not apply.
    Bypassed,
}

#[derive(Debug)]
struct SignalLock {
    until: Instant,
    reason: String,
}

/// Single-flight debounce for qualifying signals.
#[derive(Debug)]
pub struct SignalGate {
    cooldown: Duration,
    open_alert_id: Option<String>,
    liquidate_alert_id: Option<String>,
    lock: Mutex<Option<SignalLock>>,
}

impl SignalGate {
    /// Create a gate with the given cool-down and privileged alert ids.
    #[must_use]
    pub const fn new(
        cooldown: Duration,
        open_alert_id: Option<String>,
        liquidate_alert_id: Option<String>,
    ) -> Self {
        Self {
            cooldown,
            open_alert_id,
            liquidate_alert_id,
            lock: Mutex::new(None),
        }
    }

    /// Whether the payload carries the privileged open-position alert id.
    #[must_use]
    pub fn is_open_alert(&self, payload: &WebhookPayload) -> bool {
        matches_alert(self.open_alert_id.as_deref(), payload)
    }

    /// Whether the payload carries the privileged liquidate alert id.
    #[must_use]
    pub fn is_liquidate_alert(&self, payload: &WebhookPayload) -> bool {
        matches_alert(self.liquidate_alert_id.as_deref(), payload)
    }

    /// Present a signal to the gate.
    ///
    /// Qualifying signals (a buy/sell action or a privileged alert id)
    /// contend for the lock; everything else bypasses.
    pub fn admit(&self, payload: &WebhookPayload) -> Admission {
        let qualifying = matches!(payload.action.as_deref(), Some("buy" | "sell"))
            || self.is_open_alert(payload)
            || self.is_liquidate_alert(payload);
        if !qualifying {
            return Admission::Bypassed;
        }

        let mut lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        if let Some(held) = lock.as_ref() {
            if now < held.until {
                return Admission::Rejected {
                    reason: held.reason.clone(),
                };
            }
        }
        let reason = format!(
            "action: {}, alert id: {}",
            payload.action.as_deref().unwrap_or("-"),
            payload.alert_id.as_deref().unwrap_or("-"),
        );
        *lock = Some(SignalLock {
            until: now + self.cooldown,
            reason,
        });
        Admission::Admitted
    }
}

fn matches_alert(configured: Option<&str>, payload: &WebhookPayload) -> bool {
    match (configured, payload.alert_id.as_deref()) {
        (Some(configured), Some(alert_id)) => !configured.is_empty() && configured == alert_id,
        _ => false,
    }
}

#[derive(Debug)]
struct Prices {
    reference: Decimal,
    last_buy: Decimal,
}

/// Reference and last-buy price state driven by inbound signals.
///
/// Owned by the HTTP layer; the workflow engine only ever receives a price
/// as an argument.
#[derive(Debug)]
pub struct PriceState {
    inner: RwLock<Prices>,
}

impl PriceState {
    /// Markup applied to the last buy price by the privileged open alert,
    /// ensuring a marketable sizing price rather than adding leverage.
    const OPEN_ALERT_MARKUP: Decimal = dec!(1.05);

    /// Create price state seeded with a default price.
    #[must_use]
    pub const fn new(default_price: Decimal) -> Self {
        Self {
            inner: RwLock::new(Prices {
                reference: default_price,
                last_buy: default_price,
            }),
        }
    }

    /// Record a price update: both the reference price and the last buy
    /// price track the latest signal.
    pub fn update(&self, price: Decimal) {
        let mut prices = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        prices.reference = price;
        prices.last_buy = price;
    }

    /// Current reference price.
    #[must_use]
    pub fn reference(&self) -> Decimal {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .reference
    }

    /// Last buy price bumped 5% for the privileged open alert.
    #[must_use]
    pub fn marked_up_buy_price(&self) -> Decimal {
        let last_buy = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last_buy;
        last_buy * Self::OPEN_ALERT_MARKUP
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn gate() -> SignalGate {
        SignalGate::new(
            Duration::from_secs(4),
            Some("open-alert".to_string()),
            Some("liquidate-alert".to_string()),
        )
    }

    fn buy_signal() -> WebhookPayload {
        WebhookPayload {
            action: Some("buy".to_string()),
            ..WebhookPayload::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_within_cooldown_admits_at_boundary() {
        let gate = gate();

        assert_eq!(gate.admit(&buy_signal()), Admission::Admitted);
        assert!(matches!(
            gate.admit(&buy_signal()),
            Admission::Rejected { .. }
        ));

        tokio::time::advance(Duration::from_millis(3999)).await;
        assert!(matches!(
            gate.admit(&buy_signal()),
            Admission::Rejected { .. }
        ));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(gate.admit(&buy_signal()), Admission::Admitted);
    }

    #[tokio::test]
    async fn rejection_carries_holder_reason() {
        let gate = gate();
        let first = WebhookPayload {
            action: Some("sell".to_string()),
            alert_id: Some("abc".to_string()),
            ..WebhookPayload::default()
        };
        gate.admit(&first);

        let Admission::Rejected { reason } = gate.admit(&buy_signal()) else {
            panic!("expected rejection");
        };
        assert!(reason.contains("sell"));
        assert!(reason.contains("abc"));
    }

    #[tokio::test]
    async fn price_updates_bypass_the_gate() {
        let gate = gate();
        gate.admit(&buy_signal());

        let price_update = WebhookPayload {
            price: Some(dec!(70)),
            ..WebhookPayload::default()
        };
        assert_eq!(gate.admit(&price_update), Admission::Bypassed);
    }

    #[tokio::test]
    async fn privileged_alerts_qualify_without_action() {
        let gate = gate();
        let alert = WebhookPayload {
            alert_id: Some("open-alert".to_string()),
            ..WebhookPayload::default()
        };

        assert!(gate.is_open_alert(&alert));
        assert!(!gate.is_liquidate_alert(&alert));
        assert_eq!(gate.admit(&alert), Admission::Admitted);
        assert!(matches!(gate.admit(&alert), Admission::Rejected { .. }));
    }

    #[tokio::test]
    async fn unconfigured_alert_ids_never_match() {
        let gate = SignalGate::new(Duration::from_secs(4), None, None);
        let alert = WebhookPayload {
            alert_id: Some("open-alert".to_string()),
            ..WebhookPayload::default()
        };

        assert!(!gate.is_open_alert(&alert));
        assert_eq!(gate.admit(&alert), Admission::Bypassed);
    }

    #[test]
    fn price_state_tracks_updates_and_markup() {
        let prices = PriceState::new(dec!(66));
        assert_eq!(prices.reference(), dec!(66));

        prices.update(dec!(100));
        assert_eq!(prices.reference(), dec!(100));
        assert_eq!(prices.marked_up_buy_price(), dec!(105.00));
    }
}
