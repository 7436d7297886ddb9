//! Hedge State Machine (§4.H) — validated transitions over
//! [`HedgeState`], one per open delta-neutral position.
//!
//! Mirrors [`crate::order_sm`]'s shape: a transition table, an
//! [`InvalidTransition`] error for anything not in it, and a
//! [`StateTransition`] audit record on every successful move.

use crate::errors::InvalidTransition;
use crate::state_store::StateStore;
use crate::types::{HedgeState, StateTransition};

/// Events that drive a hedge through entry, steady state, and exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HedgeEvent {
    StartEntry,
    PerpLegFilled,
    SpotLegFilled,
    StartExit,
    SpotLegExited,
    PerpLegExited,
    Abort,
}

/// Compute the next [`HedgeState`] for `current` under `event`, or
/// reject the transition.
pub fn next_state(current: HedgeState, event: HedgeEvent) -> Result<HedgeState, (HedgeState, HedgeEvent)> {
    use HedgeEvent::*;
    use HedgeState::*;

    match (current, event) {
        (Idle, StartEntry) => Ok(EnteringPerp),
        (EnteringPerp, PerpLegFilled) => Ok(EnteringSpot),
        (EnteringPerp, Abort) => Ok(Idle),
        (EnteringSpot, SpotLegFilled) => Ok(Active),
        (EnteringSpot, Abort) => Ok(Idle),
        (Active, StartExit) => Ok(ExitingSpot),
        (ExitingSpot, SpotLegExited) => Ok(ExitingPerp),
        (ExitingPerp, PerpLegExited) => Ok(Closed),
        _ => Err((current, event)),
    }
}

/// Apply `event` to a hedge identified by `hedge_id`, returning its new
/// state and recording a [`StateTransition`] in `store` on success.
pub fn apply_event(
    hedge_id: &str,
    current: HedgeState,
    event: HedgeEvent,
    store: &StateStore,
    correlation_id: &str,
) -> Result<HedgeState, InvalidTransition> {
    match next_state(current, event) {
        Ok(to) => {
            store.push_transition(StateTransition::new("hedge", hedge_id, current, to, event, correlation_id));
            Ok(to)
        }
        Err((from, event)) => Err(InvalidTransition::new(hedge_id, from, event, from.is_terminal())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_entry_to_exit_lifecycle_is_valid() {
        let store = StateStore::new();
        let mut state = HedgeState::Idle;
        state = apply_event("h1", state, HedgeEvent::StartEntry, &store, "c").unwrap();
        assert_eq!(state, HedgeState::EnteringPerp);
        state = apply_event("h1", state, HedgeEvent::PerpLegFilled, &store, "c").unwrap();
        assert_eq!(state, HedgeState::EnteringSpot);
        state = apply_event("h1", state, HedgeEvent::SpotLegFilled, &store, "c").unwrap();
        assert_eq!(state, HedgeState::Active);
        state = apply_event("h1", state, HedgeEvent::StartExit, &store, "c").unwrap();
        assert_eq!(state, HedgeState::ExitingSpot);
        state = apply_event("h1", state, HedgeEvent::SpotLegExited, &store, "c").unwrap();
        assert_eq!(state, HedgeState::ExitingPerp);
        state = apply_event("h1", state, HedgeEvent::PerpLegExited, &store, "c").unwrap();
        assert_eq!(state, HedgeState::Closed);
        assert_eq!(store.recent_transitions().len(), 6);
    }

    #[test]
    fn abort_is_only_reachable_while_entering() {
        let store = StateStore::new();
        for state in [HedgeState::EnteringPerp, HedgeState::EnteringSpot] {
            let result = apply_event("h", state, HedgeEvent::Abort, &store, "c").unwrap();
            assert_eq!(result, HedgeState::Idle);
        }
    }

    #[test]
    fn abort_once_active_is_rejected() {
        let store = StateStore::new();
        for state in [HedgeState::Active, HedgeState::ExitingSpot, HedgeState::ExitingPerp] {
            let err = apply_event("h", state, HedgeEvent::Abort, &store, "c").unwrap_err();
            assert!(!err.is_terminal);
        }
    }

    #[test]
    fn event_from_closed_is_rejected() {
        let store = StateStore::new();
        let err = apply_event("h1", HedgeState::Closed, HedgeEvent::StartEntry, &store, "c").unwrap_err();
        assert!(err.is_terminal);
    }

    #[test]
    fn skipping_spot_leg_entry_is_rejected() {
        let store = StateStore::new();
        let err = apply_event("h1", HedgeState::EnteringPerp, HedgeEvent::SpotLegFilled, &store, "c").unwrap_err();
        assert!(!err.is_terminal);
    }
}
