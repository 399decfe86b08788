//! Core types and state for the agentmux SSH-agent multiplexer.
//!
//! Several credential managers each implement an SSH agent over the *same*
//! globally-named Windows pipe; only one process can own that pipe at a
//! time.  agentmux owns a separate pipe, merges the key sets, and switches
//! the backing agent per signing request.  This crate holds everything the
//! routing engine shares across the daemon:
//!
//! - the persisted JSON configuration ([`config`])
//! - the fingerprint→backend mapping store ([`mapping`])
//! - the short-TTL connection-failure cache ([`failure`])
//! - host-pattern hints for key ordering ([`hosthint`])
//! - the error taxonomy ([`error`])

use crate::fingerprint::fingerprint;

pub mod config;
pub mod error;
pub mod failure;
pub mod fingerprint;
pub mod hosthint;
pub mod mapping;

pub use error::{Error, Result};

/// A public key plus its human-readable comment, as exchanged by the agent
/// protocol.  The blob is opaque to the router; only its fingerprint is
/// ever inspected.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    /// OpenSSH wire-format public key blob.
    pub key_blob: Vec<u8>,
    /// UTF-8 comment attached by the owning agent.
    pub comment: String,
}

impl Identity {
    pub fn new(key_blob: Vec<u8>, comment: impl Into<String>) -> Self {
        Self {
            key_blob,
            comment: comment.into(),
        }
    }

    /// The routing fingerprint for this identity.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.key_blob)
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("fingerprint", &self.fingerprint())
            .field("blob_len", &self.key_blob.len())
            .field("comment", &self.comment)
            .finish()
    }
}

/// Immutable description of one configured backend agent.
///
/// Built from the `agents` table of the persisted configuration; sorted by
/// `priority` (lower first) wherever backends are iterated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSpec {
    /// Stable identifier used in mappings and logs (e.g. `"1password"`).
    pub name: String,
    /// Image name used for process enumeration and termination
    /// (e.g. `"bw-agent.exe"`).
    pub process_name: String,
    /// Absolute path, or a bare command resolved via `PATH`.
    pub exe_path: String,
    /// Lower sorts first in scans and fallback iteration.
    pub priority: i32,
    /// Whether this agent prompts for unlock on a *list* request rather
    /// than on sign, and steals the shared pipe when it starts.
    pub unlock_on_list: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_debug_hides_blob() {
        let id = Identity::new(vec![0xAB; 64], "work laptop");
        let debug = format!("{id:?}");
        assert!(debug.contains("work laptop"));
        assert!(debug.contains("blob_len: 64"));
        assert!(!debug.contains("key_blob"));
    }
}
