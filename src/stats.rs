use std::sync::atomic::{AtomicUsize, Ordering};

/// A simple counter that can be incremented atomically
#[derive(Debug)]
pub struct Counter {
    value: AtomicUsize,
}

impl Counter {
    /// Create a new counter with an initial value
    pub fn new(initial_value: usize) -> Self {
        Self {
            value: AtomicUsize::new(initial_value),
        }
    }

    /// Increment the counter by a specific amount
    pub fn increment(&self, amount: usize) {
        self.value.fetch_add(amount, Ordering::Relaxed);
    }

    /// Decrement the counter, saturating at zero
    pub fn decrement(&self, amount: usize) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(amount))
            });
    }

    /// Get the current value of the counter
    pub fn value(&self) -> usize {
        self.value.load(Ordering::Relaxed)
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Process-wide connection and request counters, shared by `Arc`
#[derive(Debug, Default)]
pub struct ServerStats {
    /// Connections currently open
    pub live_connections: Counter,
    pub accepted: Counter,
    /// Connections turned away with `Server Busy!`
    pub rejected: Counter,
    pub requests: Counter,
    /// Connections closed by the idle timer
    pub timeouts: Counter,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get stats as a formatted string
    pub fn format(&self) -> String {
        format!(
            "connections.live: {}\nconnections.accepted: {}\nconnections.rejected: {}\nconnections.timed_out: {}\nrequests: {}\n",
            self.live_connections.value(),
            self.accepted.value(),
            self.rejected.value(),
            self.timeouts.value(),
            self.requests.value()
        )
    }
}
