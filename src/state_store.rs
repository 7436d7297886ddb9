//! State Store (§4.C) — the engine's single authoritative in-memory
//! snapshot of balances, positions, orders, and funding history.
//!
//! Grounded in the teacher's `AppState`: `parking_lot::RwLock` fields, a
//! monotonic version counter bumped on every mutation, and bounded
//! ring-buffer audit logs (`recent_decisions`/`recent_errors` there,
//! `transitions`/`inconsistencies` here). The dashboard-DTO-building half
//! of `AppState` (`build_snapshot` and its `Serialize` structs) has no
//! counterpart here: this crate has no HTTP surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::types::{
    Balance, DerivedPosition, Inconsistency, ManagedOrder, StateTransition, VenuePosition,
};

const MAX_RECENT_TRANSITIONS: usize = 500;
const MAX_RECENT_INCONSISTENCIES: usize = 200;

/// Authoritative in-memory state shared across the Evaluator, Reconciler,
/// and Execution Engine.
pub struct StateStore {
    version: AtomicU64,

    balances: RwLock<HashMap<String, Balance>>,
    venue_positions: RwLock<HashMap<String, VenuePosition>>,
    derived_positions: RwLock<HashMap<String, DerivedPosition>>,
    orders: RwLock<HashMap<String, ManagedOrder>>,

    transitions: RwLock<Vec<StateTransition>>,
    inconsistencies: RwLock<Vec<Inconsistency>>,

    last_ws_update_ms: RwLock<HashMap<String, i64>>,
    last_rest_update_ms: RwLock<HashMap<String, i64>>,
    last_funding_update_ms: RwLock<HashMap<String, i64>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            version: AtomicU64::new(0),
            balances: RwLock::new(HashMap::new()),
            venue_positions: RwLock::new(HashMap::new()),
            derived_positions: RwLock::new(HashMap::new()),
            orders: RwLock::new(HashMap::new()),
            transitions: RwLock::new(Vec::new()),
            inconsistencies: RwLock::new(Vec::new()),
            last_ws_update_ms: RwLock::new(HashMap::new()),
            last_rest_update_ms: RwLock::new(HashMap::new()),
            last_funding_update_ms: RwLock::new(HashMap::new()),
        }
    }

    fn bump_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    // ── Balances ─────────────────────────────────────────────────────

    pub fn set_balance(&self, asset: &str, balance: Balance) {
        self.balances.write().insert(asset.to_string(), balance);
        self.bump_version();
    }

    pub fn get_balance(&self, asset: &str) -> Option<Balance> {
        self.balances.read().get(asset).copied()
    }

    pub fn replace_all_balances(&self, balances: HashMap<String, Balance>) {
        *self.balances.write() = balances;
        self.bump_version();
    }

    // ── Positions ────────────────────────────────────────────────────

    pub fn set_venue_position(&self, symbol: &str, position: VenuePosition) {
        self.venue_positions.write().insert(symbol.to_string(), position);
        self.record_stream_update(symbol, StreamKind::Rest);
        self.bump_version();
    }

    pub fn get_venue_position(&self, symbol: &str) -> Option<VenuePosition> {
        self.venue_positions.read().get(symbol).copied()
    }

    pub fn set_derived_position(&self, symbol: &str, derived: DerivedPosition) {
        self.derived_positions.write().insert(symbol.to_string(), derived);
        self.bump_version();
    }

    pub fn get_derived_position(&self, symbol: &str) -> Option<DerivedPosition> {
        self.derived_positions.read().get(symbol).copied()
    }

    // ── Orders ───────────────────────────────────────────────────────

    pub fn upsert_order(&self, order: ManagedOrder) {
        self.orders.write().insert(order.id.clone(), order);
        self.bump_version();
    }

    pub fn get_order(&self, id: &str) -> Option<ManagedOrder> {
        self.orders.read().get(id).cloned()
    }

    pub fn orders_for_intent(&self, intent_id: &str) -> Vec<ManagedOrder> {
        self.orders
            .read()
            .values()
            .filter(|o| o.intent_id == intent_id)
            .cloned()
            .collect()
    }

    // ── Freshness bookkeeping ────────────────────────────────────────

    pub fn record_stream_update(&self, symbol: &str, kind: StreamKind) {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let map = match kind {
            StreamKind::Ws => &self.last_ws_update_ms,
            StreamKind::Rest => &self.last_rest_update_ms,
            StreamKind::Funding => &self.last_funding_update_ms,
        };
        map.write().insert(symbol.to_string(), now_ms);
    }

    pub fn last_update_age_ms(&self, symbol: &str, kind: StreamKind) -> Option<i64> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let map = match kind {
            StreamKind::Ws => &self.last_ws_update_ms,
            StreamKind::Rest => &self.last_rest_update_ms,
            StreamKind::Funding => &self.last_funding_update_ms,
        };
        map.read().get(symbol).map(|&t| now_ms - t)
    }

    // ── Audit trail ──────────────────────────────────────────────────

    pub fn push_transition(&self, transition: StateTransition) {
        let mut transitions = self.transitions.write();
        transitions.push(transition);
        while transitions.len() > MAX_RECENT_TRANSITIONS {
            transitions.remove(0);
        }
        self.bump_version();
    }

    pub fn recent_transitions(&self) -> Vec<StateTransition> {
        self.transitions.read().clone()
    }

    pub fn push_inconsistency(&self, inconsistency: Inconsistency) {
        let mut inconsistencies = self.inconsistencies.write();
        inconsistencies.push(inconsistency);
        while inconsistencies.len() > MAX_RECENT_INCONSISTENCIES {
            inconsistencies.remove(0);
        }
        self.bump_version();
    }

    pub fn recent_inconsistencies(&self) -> Vec<Inconsistency> {
        self.inconsistencies.read().clone()
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Which stream a freshness timestamp belongs to (§4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Ws,
    Rest,
    Funding,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::BaseQty;

    #[test]
    fn version_bumps_on_every_mutation() {
        let store = StateStore::new();
        let v0 = store.current_version();
        store.set_balance("USDT", Balance { free: BaseQty::ZERO, locked: BaseQty::ZERO });
        assert!(store.current_version() > v0);
    }

    #[test]
    fn freshness_age_is_none_before_first_update() {
        let store = StateStore::new();
        assert!(store.last_update_age_ms("BTCUSDT", StreamKind::Ws).is_none());
    }

    #[test]
    fn freshness_age_is_small_right_after_update() {
        let store = StateStore::new();
        store.record_stream_update("BTCUSDT", StreamKind::Ws);
        let age = store.last_update_age_ms("BTCUSDT", StreamKind::Ws).unwrap();
        assert!(age >= 0 && age < 1000);
    }

    #[test]
    fn transition_log_is_bounded() {
        let store = StateStore::new();
        for i in 0..(MAX_RECENT_TRANSITIONS + 10) {
            store.push_transition(StateTransition::new(
                "order",
                &format!("o{i}"),
                "A",
                "B",
                "Event",
                "corr",
            ));
        }
        assert_eq!(store.recent_transitions().len(), MAX_RECENT_TRANSITIONS);
    }
}
