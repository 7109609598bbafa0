//! Account-state cache.
//!
//! Turns account-summary and account-value events into queryable,
//! freshness-stamped snapshots per account. `get` never touches the
//! network; `refresh` runs one correlated summary request scoped to a
//! single account. Staleness is evaluated lazily by readers; there is no
//! automatic expiry.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use rust_decimal::Decimal;

use crate::correlator::{CorrelatorError, RequestCorrelator, RequestKind};
use crate::gateway::{GatewayClient, GatewayEvent, SUMMARY_REQUEST_ID, SUMMARY_TAGS};
use crate::models::{AccountId, AccountSnapshot};

/// Cache of per-account summary snapshots.
pub struct AccountCache<G> {
    gateway: Arc<G>,
    correlator: Arc<RequestCorrelator<G>>,
    snapshots: RwLock<HashMap<AccountId, AccountSnapshot>>,
}

impl<G: GatewayClient> AccountCache<G> {
    /// Create an empty cache.
    #[must_use]
    pub fn new(gateway: Arc<G>, correlator: Arc<RequestCorrelator<G>>) -> Self {
        Self {
            gateway,
            correlator,
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    /// Cached snapshot for an account, without a network round trip.
    ///
    /// Callers needing freshness check [`AccountSnapshot::is_fresh`]
    /// themselves and call [`AccountCache::refresh`] when stale or absent.
    #[must_use]
    pub fn get(&self, account: &AccountId) -> Option<AccountSnapshot> {
        self.snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(account)
            .cloned()
    }

    /// Accounts with a cached snapshot.
    #[must_use]
    pub fn accounts(&self) -> Vec<AccountId> {
        self.snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Merge an unsolicited account-value update into the cache.
    pub fn apply_value(&self, account: &AccountId, tag: &str, value: &str, currency: &str) {
        self.apply_summary(account, tag, value, currency);
    }

    /// Refresh one account's snapshot via a correlated summary request.
    ///
    /// The protocol supports a single outstanding summary subscription per
    /// request id, so any prior subscription on the fixed id is cancelled
    /// before a new one is opened. Returns the refreshed snapshot, possibly
    /// empty if the gateway reported nothing for the account.
    ///
    /// # Errors
    ///
    /// Fails if the summary commands fail or the terminating event does not
    /// arrive within the correlator timeout.
    pub async fn refresh(&self, account: &AccountId) -> Result<AccountSnapshot, CorrelatorError> {
        self.refresh_scope(Some(account)).await?;
        Ok(self.get(account).unwrap_or_default())
    }

    /// Refresh every managed account (startup pass).
    ///
    /// # Errors
    ///
    /// Same failure modes as [`AccountCache::refresh`].
    pub async fn refresh_all(&self) -> Result<(), CorrelatorError> {
        self.refresh_scope(None).await
    }

    async fn refresh_scope(&self, account: Option<&AccountId>) -> Result<(), CorrelatorError> {
        self.correlator
            .run(
                RequestKind::AccountSummary,
                (),
                async {
                    self.gateway
                        .cancel_account_summary(SUMMARY_REQUEST_ID)
                        .await?;
                    self.gateway
                        .request_account_summary(SUMMARY_REQUEST_ID, "All", SUMMARY_TAGS, account)
                        .await
                },
                |event, _acc| match event {
                    GatewayEvent::AccountSummary {
                        request_id: SUMMARY_REQUEST_ID,
                        account,
                        tag,
                        value,
                        currency,
                    } => {
                        self.apply_summary(&account, &tag, &value, &currency);
                        false
                    }
                    GatewayEvent::AccountSummaryEnd {
                        request_id: SUMMARY_REQUEST_ID,
                    } => true,
                    _ => false,
                },
            )
            .await
    }

    fn apply_summary(&self, account: &AccountId, tag: &str, value: &str, currency: &str) {
        let Ok(value) = Decimal::from_str(value) else {
            tracing::warn!(account = %account, tag, value, "dropping non-numeric summary value");
            return;
        };
        let mut snapshots = self.snapshots.write().unwrap_or_else(PoisonError::into_inner);
        snapshots
            .entry(account.clone())
            .or_default()
            .set(tag, value, currency);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use rust_decimal_macros::dec;

    use crate::gateway::SimGateway;
    use crate::models::TAG_TOTAL_CASH;

    use super::*;

    fn account() -> AccountId {
        AccountId::new("U1")
    }

    async fn cache_over_sim() -> (Arc<SimGateway>, AccountCache<SimGateway>) {
        let gateway = Arc::new(SimGateway::new(&[account()]));
        gateway.connect().await.unwrap();
        let correlator = Arc::new(RequestCorrelator::new(
            Arc::clone(&gateway),
            Duration::from_secs(5),
        ));
        let cache = AccountCache::new(Arc::clone(&gateway), correlator);
        (gateway, cache)
    }

    #[tokio::test]
    async fn refresh_then_get_is_fresh() {
        let (gateway, cache) = cache_over_sim().await;
        gateway.seed_cash(&account(), dec!(10000));

        let before = Utc::now();
        let snapshot = cache.refresh(&account()).await.unwrap();

        assert_eq!(snapshot.total_cash(), Some(dec!(10000)));
        let cached = cache.get(&account()).unwrap();
        assert!(cached.last_updated() >= before);
        assert!(cached.is_fresh(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn refresh_cancels_prior_subscription_first() {
        let (gateway, cache) = cache_over_sim().await;
        gateway.seed_cash(&account(), dec!(10000));

        cache.refresh(&account()).await.unwrap();
        cache.refresh(&account()).await.unwrap();

        assert_eq!(gateway.summary_cancel_count(), 2);
    }

    #[tokio::test]
    async fn refresh_of_unknown_account_returns_empty_snapshot() {
        let (_gateway, cache) = cache_over_sim().await;

        let snapshot = cache.refresh(&account()).await.unwrap();

        assert!(snapshot.is_empty());
        assert!(cache.get(&account()).is_none());
    }

    #[tokio::test]
    async fn non_numeric_values_are_dropped() {
        let (gateway, cache) = cache_over_sim().await;
        gateway.seed_summary(&account(), TAG_TOTAL_CASH, "not-a-number", "USD");

        let snapshot = cache.refresh(&account()).await.unwrap();

        assert!(snapshot.total_cash().is_none());
    }

    #[tokio::test]
    async fn get_without_refresh_misses() {
        let (gateway, cache) = cache_over_sim().await;
        gateway.seed_cash(&account(), dec!(10000));

        assert!(cache.get(&account()).is_none());
    }

    #[tokio::test]
    async fn account_value_updates_merge_into_cache() {
        let (_gateway, cache) = cache_over_sim().await;

        cache.apply_value(&account(), TAG_TOTAL_CASH, "2500", "USD");

        let snapshot = cache.get(&account()).unwrap();
        assert_eq!(snapshot.total_cash(), Some(dec!(2500)));
    }
}
