//! Event dispatch
//!
//! Walks the ancestor path of an event in capture, target and bubble
//! order. No listener table borrow is held while a listener runs, so
//! listeners may register, remove or fire further work freely.

use std::cell::RefCell;

use tracing::{trace, warn};

use super::{Event, EventTarget, Listener, ListenerId, ListenerTable, Phase};

/// Dispatch `event` through `parents` (outermost first) to its target.
///
/// `after_listener` runs after every listener invocation; the engine uses
/// it for its microtask checkpoint. Returns `true` when any listener
/// returned an error.
pub(crate) fn dispatch(
    listeners: &RefCell<ListenerTable>,
    event: &mut Event,
    parents: &[EventTarget],
    after_listener: &mut dyn FnMut(),
) -> bool {
    let event_type = event.event_type();
    let mut failed = false;
    trace!(event = event_type.name(), target = ?event.target(), "dispatching event");

    // Phase 1: Capture, outermost ancestor first
    for parent in parents {
        if event.propagation_stopped {
            break;
        }
        let snapshot = listeners.borrow().snapshot(*parent, event_type, Some(true));
        event.phase = Phase::Capturing;
        failed |= invoke(listeners, event, *parent, snapshot, after_listener);
    }

    // Phase 2: Target
    if !event.propagation_stopped {
        let target = event.target();
        let snapshot = listeners.borrow().snapshot(target, event_type, None);
        event.phase = Phase::AtTarget;
        failed |= invoke(listeners, event, target, snapshot, after_listener);
    }

    // Phase 3: Bubble, innermost ancestor first
    if event.bubbles() {
        for parent in parents.iter().rev() {
            if event.propagation_stopped {
                break;
            }
            let snapshot = listeners.borrow().snapshot(*parent, event_type, Some(false));
            event.phase = Phase::Bubbling;
            failed |= invoke(listeners, event, *parent, snapshot, after_listener);
        }
    }

    event.phase = Phase::None;
    event.current_target = None;
    failed
}

fn invoke(
    listeners: &RefCell<ListenerTable>,
    event: &mut Event,
    current: EventTarget,
    snapshot: Vec<(ListenerId, Listener)>,
    after_listener: &mut dyn FnMut(),
) -> bool {
    let mut failed = false;
    event.current_target = Some(current);
    for (id, callback) in snapshot {
        if event.immediate_propagation_stopped {
            break;
        }
        // Removed by an earlier listener of this dispatch
        if !listeners.borrow().contains(current, id) {
            continue;
        }
        if let Err(err) = callback(event) {
            warn!(
                event = event.event_type().name(),
                target = ?current,
                error = %err,
                "event listener failed"
            );
            failed = true;
        }
        after_listener();
    }
    failed
}
