//! Order State Machine (§4.G) — validated transitions over
//! [`OrderStatus`], one per [`ManagedOrder`].
//!
//! Every transition is either in the table below or rejected with
//! [`InvalidTransition`]; no caller can push an order into an
//! inconsistent status by construction.

use crate::errors::InvalidTransition;
use crate::state_store::StateStore;
use crate::types::{ManagedOrder, OrderStatus, StateTransition};

/// Events that can move an order through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderEvent {
    Submit,
    Ack,
    PartialFill,
    Fill,
    Cancel,
    Reject,
    Timeout,
}

/// Compute the next [`OrderStatus`] for `current` under `event`, or
/// reject the transition if it is not in the table.
pub fn next_status(current: OrderStatus, event: OrderEvent) -> Result<OrderStatus, (OrderStatus, OrderEvent)> {
    use OrderEvent::*;
    use OrderStatus::*;

    match (current, event) {
        (Created, Submit) => Ok(Submitted),
        (Created, Reject) => Ok(Rejected),
        (Submitted, Ack) => Ok(Acked),
        (Submitted, Reject) => Ok(Rejected),
        (Submitted, Cancel) => Ok(Canceled),
        (Submitted, Timeout) => Ok(Canceled),
        (Acked, PartialFill) => Ok(Partial),
        (Acked, Fill) => Ok(Filled),
        (Acked, Cancel) => Ok(Canceled),
        (Acked, Reject) => Ok(Rejected),
        (Acked, Timeout) => Ok(Canceled),
        (Partial, PartialFill) => Ok(Partial),
        (Partial, Fill) => Ok(Filled),
        (Partial, Cancel) => Ok(Canceled),
        (Partial, Timeout) => Ok(Canceled),
        _ => Err((current, event)),
    }
}

/// Apply `event` to `order`, updating its status/timestamp in place and
/// recording a [`StateTransition`] in `store`. Fails with
/// [`InvalidTransition`] (carrying `terminal state` in its message when
/// the order was already done) rather than silently ignoring a bad
/// event.
pub fn apply_event(
    order: &mut ManagedOrder,
    event: OrderEvent,
    store: &StateStore,
    correlation_id: &str,
) -> Result<(), InvalidTransition> {
    let from = order.status;
    match next_status(from, event) {
        Ok(to) => {
            order.status = to;
            order.updated_at = chrono::Utc::now();
            if event == OrderEvent::Timeout {
                order.cancel_reason = Some("Timeout".to_string());
            }
            store.push_transition(StateTransition::new("order", &order.id, from, to, event, correlation_id));
            Ok(())
        }
        Err((from, event)) => Err(InvalidTransition::new(order.id.clone(), from, event, from.is_terminal())),
    }
}
