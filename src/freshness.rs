//! Freshness Checker (§4.D) — derives per-stream staleness booleans from
//! the State Store's last-update timestamps against configurable
//! max-age thresholds.

use crate::config::FreshnessConfig;
use crate::state_store::{StateStore, StreamKind};
use crate::types::HealthSnapshot;

/// Compute the current [`HealthSnapshot`] for `symbol` from the store's
/// recorded update timestamps. A stream with no recorded update at all is
/// treated as stale — it has never been observed.
pub fn check_freshness(store: &StateStore, symbol: &str, config: &FreshnessConfig) -> HealthSnapshot {
    let ws_stale = store
        .last_update_age_ms(symbol, StreamKind::Ws)
        .map(|age| age > config.ws_max_age_ms as i64)
        .unwrap_or(true);

    let rest_stale = store
        .last_update_age_ms(symbol, StreamKind::Rest)
        .map(|age| age > config.rest_max_age_ms as i64)
        .unwrap_or(true);

    let funding_feed_stale = store
        .last_update_age_ms(symbol, StreamKind::Funding)
        .map(|age| age > config.funding_feed_max_age_ms as i64)
        .unwrap_or(true);

    HealthSnapshot {
        ws_stale,
        rest_stale,
        funding_feed_stale,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_updated_stream_is_stale() {
        let store = StateStore::new();
        let snapshot = check_freshness(&store, "BTCUSDT", &FreshnessConfig::default());
        assert!(snapshot.ws_stale);
        assert!(snapshot.rest_stale);
        assert!(snapshot.funding_feed_stale);
    }

    #[test]
    fn freshly_updated_stream_is_not_stale() {
        let store = StateStore::new();
        store.record_stream_update("BTCUSDT", StreamKind::Ws);
        store.record_stream_update("BTCUSDT", StreamKind::Rest);
        store.record_stream_update("BTCUSDT", StreamKind::Funding);
        let snapshot = check_freshness(&store, "BTCUSDT", &FreshnessConfig::default());
        assert!(!snapshot.ws_stale);
        assert!(!snapshot.rest_stale);
        assert!(!snapshot.funding_feed_stale);
    }

    #[test]
    fn stale_threshold_is_per_stream() {
        let store = StateStore::new();
        store.record_stream_update("BTCUSDT", StreamKind::Rest);
        let mut config = FreshnessConfig::default();
        config.ws_max_age_ms = 0;
        let snapshot = check_freshness(&store, "BTCUSDT", &config);
        assert!(snapshot.ws_stale);
        assert!(!snapshot.rest_stale);
    }
}
