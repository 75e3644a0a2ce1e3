//! Leg notification types and listener registry
//!
//! Players announce four kinds of change. Observers register a [`Listener`]
//! per kind through an [`Emitter`] and receive a [`Subscription`] that undoes
//! the registration when disposed (or dropped).
//!
//! Listeners carry no payload: the observer already knows which player it
//! subscribed to and reads the new value through that player's accessors.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Notification kinds emitted by every player
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LegEvent {
    /// Status changed
    StatusChanged,
    /// Current time advanced or jumped
    TimeUpdated,
    /// Duration became known or changed
    DurationChanged,
    /// Playback rate changed
    RateChanged,
}

impl LegEvent {
    /// All notification kinds, in declaration order
    pub const ALL: [LegEvent; 4] = [
        LegEvent::StatusChanged,
        LegEvent::TimeUpdated,
        LegEvent::DurationChanged,
        LegEvent::RateChanged,
    ];
}

impl std::fmt::Display for LegEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LegEvent::StatusChanged => write!(f, "status"),
            LegEvent::TimeUpdated => write!(f, "timeupdate"),
            LegEvent::DurationChanged => write!(f, "durationchange"),
            LegEvent::RateChanged => write!(f, "ratechange"),
        }
    }
}

/// Callback invoked on a notification
pub type Listener = Arc<dyn Fn() + Send + Sync>;

type Disposer = Box<dyn FnOnce() + Send>;

/// Disposer for one listener registration
///
/// `dispose()` runs the undo action at most once; later calls (and the
/// implicit call on drop) are no-ops.
#[must_use = "dropping a Subscription removes its listener"]
pub struct Subscription {
    disposer: Mutex<Option<Disposer>>,
}

impl Subscription {
    pub fn new(disposer: impl FnOnce() + Send + 'static) -> Self {
        Self {
            disposer: Mutex::new(Some(Box::new(disposer))),
        }
    }

    /// Remove the listener. Safe to call any number of times.
    pub fn dispose(&self) {
        let disposer = lock(&self.disposer).take();
        if let Some(disposer) = disposer {
            disposer();
        }
    }

    /// Whether `dispose()` still has work to do
    pub fn is_active(&self) -> bool {
        lock(&self.disposer).is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<(u64, LegEvent, Listener)>,
}

/// Listener registry used by a player to publish its notifications
///
/// Listeners are called synchronously from `emit`, after the registry lock
/// is released, so a listener may subscribe, unsubscribe or trigger further
/// emits without deadlocking.
#[derive(Clone, Default)]
pub struct Emitter {
    registry: Arc<Mutex<Registry>>,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `event`
    pub fn on(&self, event: LegEvent, listener: Listener) -> Subscription {
        let id = {
            let mut registry = lock(&self.registry);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.listeners.push((id, event, listener));
            id
        };

        let registry: Weak<Mutex<Registry>> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                lock(&registry).listeners.retain(|(lid, _, _)| *lid != id);
            }
        })
    }

    /// Invoke every listener registered for `event`
    ///
    /// Returns the number of listeners called.
    pub fn emit(&self, event: LegEvent) -> usize {
        let listeners: Vec<Listener> = lock(&self.registry)
            .listeners
            .iter()
            .filter(|(_, e, _)| *e == event)
            .map(|(_, _, l)| Arc::clone(l))
            .collect();

        for listener in &listeners {
            listener();
        }
        listeners.len()
    }

    /// Number of listeners currently registered for `event`
    pub fn listener_count(&self, event: LegEvent) -> usize {
        lock(&self.registry)
            .listeners
            .iter()
            .filter(|(_, e, _)| *e == event)
            .count()
    }

    /// Drop every registration
    pub fn clear(&self) {
        lock(&self.registry).listeners.clear();
    }
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("listeners", &lock(&self.registry).listeners.len())
            .finish()
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, Listener) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn test_emit_only_reaches_matching_event() {
        let emitter = Emitter::new();
        let (status_count, status_listener) = counter();
        let (time_count, time_listener) = counter();
        let _s = emitter.on(LegEvent::StatusChanged, status_listener);
        let _t = emitter.on(LegEvent::TimeUpdated, time_listener);

        assert_eq!(emitter.emit(LegEvent::StatusChanged), 1);
        assert_eq!(status_count.load(Ordering::SeqCst), 1);
        assert_eq!(time_count.load(Ordering::SeqCst), 0);
        assert_eq!(emitter.emit(LegEvent::RateChanged), 0);
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let emitter = Emitter::new();
        let (count, listener) = counter();
        let sub = emitter.on(LegEvent::RateChanged, listener);
        assert!(sub.is_active());

        sub.dispose();
        sub.dispose();
        assert!(!sub.is_active());
        assert_eq!(emitter.listener_count(LegEvent::RateChanged), 0);

        emitter.emit(LegEvent::RateChanged);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let emitter = Emitter::new();
        let (_, listener) = counter();
        {
            let _sub = emitter.on(LegEvent::DurationChanged, listener);
            assert_eq!(emitter.listener_count(LegEvent::DurationChanged), 1);
        }
        assert_eq!(emitter.listener_count(LegEvent::DurationChanged), 0);
    }

    #[test]
    fn test_dispose_after_emitter_dropped() {
        let emitter = Emitter::new();
        let (_, listener) = counter();
        let sub = emitter.on(LegEvent::StatusChanged, listener);
        drop(emitter);
        sub.dispose();
        assert!(!sub.is_active());
    }

    #[test]
    fn test_listener_may_emit_reentrantly() {
        let emitter = Emitter::new();
        let (time_count, time_listener) = counter();
        let _t = emitter.on(LegEvent::TimeUpdated, time_listener);

        let inner = emitter.clone();
        let _s = emitter.on(
            LegEvent::StatusChanged,
            Arc::new(move || {
                inner.emit(LegEvent::TimeUpdated);
            }),
        );

        emitter.emit(LegEvent::StatusChanged);
        assert_eq!(time_count.load(Ordering::SeqCst), 1);
    }
}
