//! Progress listener registry.
//!
//! Drivers call [`ProgressListeners::emit`] on every tick with the latest
//! [`Progress`] snapshot. Listeners run synchronously on the emitting thread
//! or task, so they must return quickly.
//!
//! A panicking listener is logged and skipped. It never takes the ticker down.

use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::motion::Progress;

// =============================================================================
// Type Aliases
// =============================================================================

/// Callback invoked with each progress snapshot.
pub type ProgressCallback = Arc<dyn Fn(&Progress) + Send + Sync>;

/// Thread-safe list of progress callbacks.
///
/// Uses `parking_lot::RwLock` so listeners can be registered from any thread
/// while the driver emits.
#[derive(Default)]
pub struct ProgressListeners {
    callbacks: RwLock<Vec<ProgressCallback>>,
}

impl ProgressListeners {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback.
    pub fn add<F>(&self, callback: F)
    where
        F: Fn(&Progress) + Send + Sync + 'static,
    {
        self.callbacks.write().push(Arc::new(callback));
    }

    /// Deliver a snapshot to every registered callback, in registration order.
    pub fn emit(&self, progress: &Progress) {
        // Clone the list so a callback may register further listeners.
        let callbacks = self.callbacks.read().clone();
        for (index, callback) in callbacks.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| callback(progress))).is_err() {
                tracing::error!(listener = index, "Progress listener panicked");
            }
        }
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.callbacks.read().len()
    }

    /// Whether no callback is registered.
    pub fn is_empty(&self) -> bool {
        self.callbacks.read().is_empty()
    }

    /// Remove every callback.
    pub fn clear(&self) {
        self.callbacks.write().clear();
    }
}

impl std::fmt::Debug for ProgressListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressListeners")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::{MotionState, ScreenStatus};
    use parking_lot::Mutex;
    use std::time::Duration;

    fn sample(position: f64) -> Progress {
        Progress {
            state: MotionState::MovingDown,
            status: ScreenStatus::Downward,
            position,
            elapsed: Duration::from_secs(1),
            target_reached: false,
        }
    }

    #[test]
    fn test_emit_reaches_all_listeners_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let listeners = ProgressListeners::new();
        for id in 0..3 {
            let seen = seen.clone();
            listeners.add(move |p: &Progress| seen.lock().push((id, p.position)));
        }
        assert_eq!(listeners.len(), 3);

        listeners.emit(&sample(0.25));
        assert_eq!(*seen.lock(), vec![(0, 0.25), (1, 0.25), (2, 0.25)]);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let count = Arc::new(Mutex::new(0));
        let listeners = ProgressListeners::new();
        listeners.add(|_: &Progress| panic!("listener bug"));
        let c = count.clone();
        listeners.add(move |_: &Progress| *c.lock() += 1);

        listeners.emit(&sample(0.5));
        listeners.emit(&sample(0.6));
        assert_eq!(*count.lock(), 2);
    }

    #[test]
    fn test_clear() {
        let listeners = ProgressListeners::new();
        listeners.add(|_: &Progress| {});
        listeners.clear();
        assert!(listeners.is_empty());
    }
}
