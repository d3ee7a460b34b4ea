use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

/// Tracks recently analysed pending transaction hashes so a feed that
/// re-announces a hash does not trigger a second analysis.
#[derive(Debug)]
pub struct SeenTxs {
    entries: HashMap<String, DateTime<Utc>>,
    window: Duration,
}

impl SeenTxs {
    pub fn new(window: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            window,
        }
    }

    /// Record a hash. Returns false if it was already seen inside the window.
    pub fn insert(&mut self, hash: &str, now: DateTime<Utc>) -> bool {
        match self.entries.get(hash) {
            Some(seen_at) if now - *seen_at < self.window => false,
            _ => {
                self.entries.insert(hash.to_string(), now);
                true
            }
        }
    }

    /// Drop entries older than the window.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        self.entries.retain(|_, seen_at| *seen_at > cutoff);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
