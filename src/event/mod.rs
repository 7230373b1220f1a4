//! Event Module
//!
//! Completion events and the listeners that observe them.
//!
//! ## Responsibilities
//! - Describe events (type, target, phase, version numbers)
//! - Keep per-target listener lists
//! - Dispatch along a fixed ancestor path in capture/target/bubble order
//!
//! ## Propagation Path
//! ```text
//!   Connection ──capture──▶ Transaction ──capture──▶ Request (target)
//!   Connection ◀──bubble─── Transaction ◀──bubble───┘
//! ```
//!
//! Open requests and connections receive events with no ancestors.

mod dispatch;

pub(crate) use dispatch::dispatch;

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::engine::{ConnectionId, RequestId, TransactionId};

/// What a listener returns; `Err` plays the role of a thrown exception
pub type ListenerResult = std::result::Result<(), Box<dyn std::error::Error>>;

/// A registered event callback
pub type Listener = Rc<dyn Fn(&mut Event) -> ListenerResult>;

// =============================================================================
// Event Description
// =============================================================================

/// Kinds of events the engine fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Success,
    Error,
    Complete,
    Abort,
    UpgradeNeeded,
    Blocked,
    VersionChange,
}

impl EventType {
    pub fn name(&self) -> &'static str {
        match self {
            EventType::Success => "success",
            EventType::Error => "error",
            EventType::Complete => "complete",
            EventType::Abort => "abort",
            EventType::UpgradeNeeded => "upgradeneeded",
            EventType::Blocked => "blocked",
            EventType::VersionChange => "versionchange",
        }
    }
}

/// Dispatch phase an event is in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    None,
    Capturing,
    AtTarget,
    Bubbling,
}

/// Anything listeners can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTarget {
    Connection(ConnectionId),
    Transaction(TransactionId),
    Request(RequestId),
}

/// An event in flight
#[derive(Debug, Clone)]
pub struct Event {
    event_type: EventType,
    target: EventTarget,
    current_target: Option<EventTarget>,
    phase: Phase,
    bubbles: bool,
    cancelable: bool,
    default_prevented: bool,
    propagation_stopped: bool,
    immediate_propagation_stopped: bool,
    old_version: u64,
    new_version: Option<u64>,
}

impl Event {
    pub(crate) fn new(event_type: EventType, target: EventTarget, bubbles: bool, cancelable: bool) -> Self {
        Self {
            event_type,
            target,
            current_target: None,
            phase: Phase::None,
            bubbles,
            cancelable,
            default_prevented: false,
            propagation_stopped: false,
            immediate_propagation_stopped: false,
            old_version: 0,
            new_version: None,
        }
    }

    pub(crate) fn with_versions(mut self, old_version: u64, new_version: Option<u64>) -> Self {
        self.old_version = old_version;
        self.new_version = new_version;
        self
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn target(&self) -> EventTarget {
        self.target
    }

    /// Target whose listeners are currently running
    pub fn current_target(&self) -> Option<EventTarget> {
        self.current_target
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn bubbles(&self) -> bool {
        self.bubbles
    }

    pub fn cancelable(&self) -> bool {
        self.cancelable
    }

    /// Cancel the default action; ignored for non-cancelable events
    pub fn prevent_default(&mut self) {
        if self.cancelable {
            self.default_prevented = true;
        }
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }

    /// Stop after the listeners of the current target
    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    /// Stop before the next listener
    pub fn stop_immediate_propagation(&mut self) {
        self.propagation_stopped = true;
        self.immediate_propagation_stopped = true;
    }

    /// Version before the change (version events only)
    pub fn old_version(&self) -> u64 {
        self.old_version
    }

    /// Version after the change; `None` for deletions
    pub fn new_version(&self) -> Option<u64> {
        self.new_version
    }
}

// =============================================================================
// Listener Registry
// =============================================================================

/// Identifies a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    event_type: EventType,
    capture: bool,
    callback: Listener,
}

/// Listeners by target, in registration order
#[derive(Default)]
pub struct ListenerTable {
    next_id: u64,
    by_target: HashMap<EventTarget, Vec<Registration>>,
}

impl ListenerTable {
    pub(crate) fn add(
        &mut self,
        target: EventTarget,
        event_type: EventType,
        capture: bool,
        callback: Listener,
    ) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.by_target.entry(target).or_default().push(Registration {
            id,
            event_type,
            capture,
            callback,
        });
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        for registrations in self.by_target.values_mut() {
            if let Some(pos) = registrations.iter().position(|r| r.id == id) {
                registrations.remove(pos);
                return true;
            }
        }
        false
    }

    pub(crate) fn contains(&self, target: EventTarget, id: ListenerId) -> bool {
        self.by_target
            .get(&target)
            .is_some_and(|registrations| registrations.iter().any(|r| r.id == id))
    }

    /// Listeners for `event_type` on `target`; `capture` of `None` takes both
    pub(crate) fn snapshot(
        &self,
        target: EventTarget,
        event_type: EventType,
        capture: Option<bool>,
    ) -> Vec<(ListenerId, Listener)> {
        self.by_target
            .get(&target)
            .map(|registrations| {
                registrations
                    .iter()
                    .filter(|r| r.event_type == event_type)
                    .filter(|r| capture.map_or(true, |c| r.capture == c))
                    .map(|r| (r.id, Rc::clone(&r.callback)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop every listener of `target`, returning them so the caller can
    /// release them outside any borrow
    pub(crate) fn purge(&mut self, target: EventTarget) -> Vec<Listener> {
        self.by_target
            .remove(&target)
            .map(|registrations| registrations.into_iter().map(|r| r.callback).collect())
            .unwrap_or_default()
    }

    pub(crate) fn take_all(&mut self) -> Vec<Listener> {
        std::mem::take(&mut self.by_target)
            .into_values()
            .flatten()
            .map(|r| r.callback)
            .collect()
    }
}

impl fmt::Debug for ListenerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerTable")
            .field("targets", &self.by_target.len())
            .finish()
    }
}

// =============================================================================
// Event Sources
// =============================================================================

/// Listener registration shared by every handle events are fired at
pub trait EventSource {
    /// Target this handle's events are addressed to
    fn event_target(&self) -> EventTarget;

    #[doc(hidden)]
    fn listener_table(&self) -> &RefCell<ListenerTable>;

    /// Register a listener for the capture (`capture == true`) or bubble
    /// phase; listeners on the target itself run in either case
    fn add_event_listener<F>(&self, event_type: EventType, capture: bool, listener: F) -> ListenerId
    where
        F: Fn(&mut Event) -> ListenerResult + 'static,
        Self: Sized,
    {
        self.listener_table()
            .borrow_mut()
            .add(self.event_target(), event_type, capture, Rc::new(listener))
    }

    /// Register a bubble-phase listener
    fn on<F>(&self, event_type: EventType, listener: F) -> ListenerId
    where
        F: Fn(&mut Event) -> ListenerResult + 'static,
        Self: Sized,
    {
        self.add_event_listener(event_type, false, listener)
    }

    fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.listener_table().borrow_mut().remove(id)
    }
}
