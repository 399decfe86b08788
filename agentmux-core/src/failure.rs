//! Short-TTL negative cache for backend connection failures.
//!
//! Keyed by (fingerprint, backend).  Suppresses retry storms after a
//! backend pipe could not be opened: while an entry is unexpired the sign
//! state machine skips that backend for that fingerprint entirely.
//!
//! Only *connection* failures are cached.  A sign refusal means the
//! backend was reachable and the user may authenticate on retry, so it
//! must never create an entry.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub struct FailureCache {
    ttl: Duration,
    entries: HashMap<(String, String), Instant>,
}

impl FailureCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Record a connection failure for (fingerprint, backend).
    pub fn mark_failed(&mut self, fingerprint: &str, backend: &str) {
        let expiry = Instant::now() + self.ttl;
        self.entries
            .insert((fingerprint.to_string(), backend.to_string()), expiry);
        tracing::debug!(
            fingerprint,
            backend,
            ttl_secs = self.ttl.as_secs(),
            "cached connection failure"
        );
    }

    /// True while the recorded expiry is in the future.  Expired entries
    /// are dropped on observation.
    pub fn is_cached(&mut self, fingerprint: &str, backend: &str) -> bool {
        let key = (fingerprint.to_string(), backend.to_string());
        match self.entries.get(&key) {
            Some(expiry) if *expiry > Instant::now() => true,
            Some(_) => {
                self.entries.remove(&key);
                false
            }
            None => false,
        }
    }

    /// Remove any entry for (fingerprint, backend), e.g. after a
    /// successful sign.
    pub fn clear(&mut self, fingerprint: &str, backend: &str) {
        self.entries
            .remove(&(fingerprint.to_string(), backend.to_string()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
