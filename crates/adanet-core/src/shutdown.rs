//! Priority-ordered shutdown registry.
//!
//! Every long-lived component registers a handle with a priority. When a
//! shutdown is triggered (signal, API call, or a `--duration` limit), handles
//! are stopped in descending priority order; negative priorities stop last
//! so the event loop (priority `-999`) is the final thing torn down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Priority for the component that drives the outer control loop; it must
/// observe every other component's shutdown before it stops itself.
pub const EVENT_LOOP_PRIORITY: i32 = -999;

/// A single registered component's stop flag.
#[derive(Clone)]
pub struct ShutdownHandle {
    name: Arc<str>,
    priority: i32,
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// True once this handle's shutdown has been requested.
    pub fn should_stop(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

struct Entry {
    name: Arc<str>,
    priority: i32,
    flag: Arc<AtomicBool>,
}

/// Central registry all components register with at construction time.
#[derive(Default)]
pub struct ShutdownRegistry {
    entries: Mutex<Vec<Entry>>,
}

impl ShutdownRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component under `name` with `priority`. Returns a handle
    /// the component polls from its own loop.
    pub fn register(&self, name: impl Into<Arc<str>>, priority: i32) -> ShutdownHandle {
        let name = name.into();
        let flag = Arc::new(AtomicBool::new(false));
        self.entries.lock().unwrap().push(Entry {
            name: name.clone(),
            priority,
            flag: flag.clone(),
        });
        ShutdownHandle {
            name,
            priority,
            flag,
        }
    }

    /// Trigger shutdown of every registered component, descending by
    /// priority; negative priorities are signalled last.
    pub fn shutdown_all(&self) {
        let mut entries = self.entries.lock().unwrap();
        entries.sort_by(|a, b| b.priority.cmp(&a.priority));
        for entry in entries.iter() {
            tracing::debug!(component = %entry.name, priority = entry.priority, "shutdown signalled");
            entry.flag.store(true, Ordering::Release);
        }
    }

    /// Whether every registered component has observed shutdown (useful for
    /// join-style waits in tests).
    pub fn all_stopped(&self) -> bool {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .all(|e| e.flag.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_loop_priority_is_most_negative_in_practice() {
        let registry = ShutdownRegistry::new();
        let worker = registry.register("bandwidth-worker", 10);
        let event_loop = registry.register("event-loop", EVENT_LOOP_PRIORITY);
        assert!(!worker.should_stop());
        assert!(!event_loop.should_stop());
        registry.shutdown_all();
        assert!(worker.should_stop());
        assert!(event_loop.should_stop());
    }

    #[test]
    fn shutdown_all_stops_everything() {
        let registry = ShutdownRegistry::new();
        let a = registry.register("a", 5);
        let b = registry.register("b", -1);
        registry.shutdown_all();
        assert!(a.should_stop());
        assert!(b.should_stop());
        assert!(registry.all_stopped());
    }
}
