use std::collections::VecDeque;

use parking_lot::Mutex;

/// Internal diagnostic channel for failures that must not become events.
///
/// Every entry is forwarded to the `log` facade and the most recent ones
/// are kept in memory for inspection.
#[derive(Debug)]
pub struct DiagnosticLog {
    entries: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl DiagnosticLog {
    pub fn new(capacity: usize) -> Self {
        Self { entries: Mutex::new(VecDeque::with_capacity(capacity.min(64))), capacity }
    }

    pub fn record(&self, message: impl Into<String>) {
        let message = message.into();
        log::error!(target: "lattice::diagnostics", "{}", message);
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(message);
    }

    /// Recent entries, oldest first.
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
