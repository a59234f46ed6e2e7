//! Engine Status State Machine
//!
//! Tracks what a speaker is doing and notifies observers on every status
//! change:
//! - Live playback: Ready -> Loading -> Loaded -> Playing -> Ready
//! - Offline render: Ready -> Loading -> Loaded -> Rendering -> Ready
//! - Any fatal failure: -> Error

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;
use serde::Serialize;

/// Current activity of a speaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    /// Idle (default state)
    #[default]
    Ready,
    /// Fetching and decoding clips
    Loading,
    /// All clips for the current request are available
    Loaded,
    /// Live playback in progress
    Playing,
    /// Offline render in progress
    Rendering,
    /// The last request failed
    Error,
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineStatus::Ready => write!(f, "Ready"),
            EngineStatus::Loading => write!(f, "Loading"),
            EngineStatus::Loaded => write!(f, "Loaded"),
            EngineStatus::Playing => write!(f, "Playing"),
            EngineStatus::Rendering => write!(f, "Rendering"),
            EngineStatus::Error => write!(f, "Error"),
        }
    }
}

/// Notification delivered to observers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    Loading,
    Loaded,
    PlayingStart,
    PlayingEnd,
    RenderingStart,
    RenderingEnd,
    Error { message: String },
    /// Returned to Ready other than by finishing playback or a render
    Ready,
    VolumeChanged { volume: u32 },
}

impl EngineEvent {
    /// The event emitted when moving from `from` to `to`
    fn for_transition(from: EngineStatus, to: EngineStatus) -> EngineEvent {
        match (from, to) {
            (_, EngineStatus::Loading) => EngineEvent::Loading,
            (_, EngineStatus::Loaded) => EngineEvent::Loaded,
            (_, EngineStatus::Playing) => EngineEvent::PlayingStart,
            (_, EngineStatus::Rendering) => EngineEvent::RenderingStart,
            (EngineStatus::Playing, EngineStatus::Ready) => EngineEvent::PlayingEnd,
            (EngineStatus::Rendering, EngineStatus::Ready) => EngineEvent::RenderingEnd,
            (_, EngineStatus::Ready) => EngineEvent::Ready,
            (_, EngineStatus::Error) => EngineEvent::Error {
                message: String::new(),
            },
        }
    }
}

/// Handle returned by [`StatusMachine::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Observer callback
pub type Observer = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

/// Status holder with observer registration
///
/// Observers run on the thread that caused the change, after every internal
/// lock has been released, so they may call back into the machine.
///
/// # Example
/// ```
/// use voxline::engine::{EngineStatus, StatusMachine};
///
/// let machine = StatusMachine::new();
/// assert_eq!(machine.status(), EngineStatus::Ready);
/// assert!(machine.transition(EngineStatus::Loading));
/// assert!(!machine.transition(EngineStatus::Loading));
/// ```
pub struct StatusMachine {
    status: Mutex<EngineStatus>,
    observers: Mutex<Vec<(SubscriptionId, Observer)>>,
    next_id: AtomicU64,
    disposed: AtomicBool,
}

impl Default for StatusMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusMachine {
    pub fn new() -> Self {
        Self {
            status: Mutex::new(EngineStatus::Ready),
            observers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    /// Move to `to`, notifying observers
    ///
    /// Returns `false` (and emits nothing) when already in `to`.
    pub fn transition(&self, to: EngineStatus) -> bool {
        let from = {
            let mut status = self.status.lock();
            if *status == to {
                return false;
            }
            std::mem::replace(&mut *status, to)
        };

        debug!("[STATUS] {} -> {}", from, to);
        self.emit(&EngineEvent::for_transition(from, to));
        true
    }

    /// Move from `from` to `to` only if currently in `from`
    pub fn transition_from(&self, from: EngineStatus, to: EngineStatus) -> bool {
        {
            let mut status = self.status.lock();
            if *status != from || from == to {
                return false;
            }
            *status = to;
        }

        debug!("[STATUS] {} -> {}", from, to);
        self.emit(&EngineEvent::for_transition(from, to));
        true
    }

    /// Enter `Error`, carrying a human-readable message
    ///
    /// Always emits, even when the machine is already in `Error`.
    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        *self.status.lock() = EngineStatus::Error;
        debug!("[STATUS] -> Error: {}", message);
        self.emit(&EngineEvent::Error { message });
    }

    /// Register an observer for all future events
    pub fn subscribe(&self, observer: Observer) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.lock().push((id, observer));
        id
    }

    /// Remove an observer; returns whether it was registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Deliver an event that is not tied to a status change
    pub fn emit(&self, event: &EngineEvent) {
        if self.is_disposed() {
            return;
        }
        let observers: Vec<Observer> = self
            .observers
            .lock()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();

        for observer in observers {
            observer(event);
        }
    }

    /// Detach every observer; nothing is emitted afterwards
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.observers.lock().clear();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for StatusMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusMachine")
            .field("status", &self.status())
            .field("observers", &self.observer_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn recording(machine: &StatusMachine) -> Arc<Mutex<Vec<EngineEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        machine.subscribe(Arc::new(move |event: &EngineEvent| {
            sink.lock().push(event.clone())
        }));
        events
    }

    // ------------------------------------------------------------------------
    // Basic State Tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_default_status_is_ready() {
        let machine = StatusMachine::new();
        assert_eq!(machine.status(), EngineStatus::Ready);
        assert!(!machine.is_disposed());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(format!("{}", EngineStatus::Ready), "Ready");
        assert_eq!(format!("{}", EngineStatus::Rendering), "Rendering");
        assert_eq!(format!("{}", EngineStatus::Error), "Error");
    }

    // ------------------------------------------------------------------------
    // Transition Tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_live_flow_events() {
        let machine = StatusMachine::new();
        let events = recording(&machine);

        machine.transition(EngineStatus::Loading);
        machine.transition(EngineStatus::Loaded);
        machine.transition(EngineStatus::Playing);
        machine.transition(EngineStatus::Ready);

        assert_eq!(
            *events.lock(),
            vec![
                EngineEvent::Loading,
                EngineEvent::Loaded,
                EngineEvent::PlayingStart,
                EngineEvent::PlayingEnd,
            ]
        );
    }

    #[test]
    fn test_offline_flow_events() {
        let machine = StatusMachine::new();
        let events = recording(&machine);

        machine.transition(EngineStatus::Loading);
        machine.transition(EngineStatus::Loaded);
        machine.transition(EngineStatus::Rendering);
        machine.transition(EngineStatus::Ready);

        assert_eq!(
            *events.lock(),
            vec![
                EngineEvent::Loading,
                EngineEvent::Loaded,
                EngineEvent::RenderingStart,
                EngineEvent::RenderingEnd,
            ]
        );
    }

    #[test]
    fn test_same_status_is_noop() {
        let machine = StatusMachine::new();
        let events = recording(&machine);

        assert!(!machine.transition(EngineStatus::Ready));
        assert!(events.lock().is_empty());
    }

    #[test]
    fn test_other_return_to_ready_emits_ready() {
        let machine = StatusMachine::new();
        let events = recording(&machine);

        machine.transition(EngineStatus::Loading);
        machine.transition(EngineStatus::Ready);
        assert_eq!(events.lock().last(), Some(&EngineEvent::Ready));
    }

    #[test]
    fn test_transition_from_requires_current_status() {
        let machine = StatusMachine::new();
        assert!(!machine.transition_from(EngineStatus::Playing, EngineStatus::Ready));
        machine.transition(EngineStatus::Playing);
        assert!(machine.transition_from(EngineStatus::Playing, EngineStatus::Ready));
        assert_eq!(machine.status(), EngineStatus::Ready);
    }

    #[test]
    fn test_fail_carries_message() {
        let machine = StatusMachine::new();
        let events = recording(&machine);

        machine.fail("Couldn't load sounds: vox/zzz");
        assert_eq!(machine.status(), EngineStatus::Error);
        assert_eq!(
            *events.lock(),
            vec![EngineEvent::Error {
                message: "Couldn't load sounds: vox/zzz".to_string()
            }]
        );
    }

    // ------------------------------------------------------------------------
    // Observer Tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let machine = StatusMachine::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let id = machine.subscribe(Arc::new(move |event: &EngineEvent| {
            sink.lock().push(event.clone())
        }));

        machine.transition(EngineStatus::Loading);
        assert!(machine.unsubscribe(id));
        assert!(!machine.unsubscribe(id));
        machine.transition(EngineStatus::Loaded);

        assert_eq!(*events.lock(), vec![EngineEvent::Loading]);
    }

    #[test]
    fn test_observer_may_read_status() {
        let machine = Arc::new(StatusMachine::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (m, s) = (machine.clone(), seen.clone());
        machine.subscribe(Arc::new(move |_: &EngineEvent| s.lock().push(m.status())));

        machine.transition(EngineStatus::Loading);
        assert_eq!(*seen.lock(), vec![EngineStatus::Loading]);
    }

    #[test]
    fn test_dispose_silences_everything() {
        let machine = StatusMachine::new();
        let events = recording(&machine);

        machine.dispose();
        machine.transition(EngineStatus::Loading);
        machine.emit(&EngineEvent::VolumeChanged { volume: 10 });

        assert!(events.lock().is_empty());
        assert_eq!(machine.observer_count(), 0);
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_string(&EngineEvent::VolumeChanged { volume: 40 }).unwrap();
        assert_eq!(json, r#"{"event":"volume_changed","volume":40}"#);
    }
}
