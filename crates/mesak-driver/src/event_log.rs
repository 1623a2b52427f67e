//! Fire-and-forget event log for connection and command activity.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Destination for human readable driver events.
///
/// Implementations must not block for long; nothing in the driver depends
/// on a log call succeeding.
pub trait EventLog: Send + Sync {
    fn log(&self, event: &str);
}

/// Forwards events to `tracing` under target `mesak::command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventLog;

impl EventLog for TracingEventLog {
    fn log(&self, event: &str) {
        tracing::info!(target: "mesak::command", "{event}");
    }
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    events: Mutex<Vec<String>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventLog for MemoryEventLog {
    fn log(&self, event: &str) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.to_string());
    }
}

/// An [`EventLog`] that can be switched off at runtime.
pub struct EventLogger {
    sink: Arc<dyn EventLog>,
    enabled: AtomicBool,
}

impl EventLogger {
    pub fn new(sink: Arc<dyn EventLog>) -> Self {
        Self {
            sink,
            enabled: AtomicBool::new(true),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn log(&self, event: &str) {
        if self.is_enabled() {
            self.sink.log(event);
        }
    }
}

impl Default for EventLogger {
    fn default() -> Self {
        Self::new(Arc::new(TracingEventLog))
    }
}

impl std::fmt::Debug for EventLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLogger")
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}
