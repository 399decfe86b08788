//! Seams for the user-facing collaborators.
//!
//! The tray UI, the key-selection dialog, and peer-process inspection are
//! not part of the routing engine.  The outer shell injects
//! implementations at construction; the defaults below keep the engine
//! fully headless.

use std::time::Duration;

use agentmux_core::Identity;
use async_trait::async_trait;

/// Interactive key-selection dialog.
#[async_trait]
pub trait KeySelector: Send + Sync {
    /// Ask the user to narrow an identity listing.  `None` means the
    /// dialog is unavailable or was cancelled; the caller falls back to
    /// the unrestricted list.
    async fn select(&self, identities: &[Identity], timeout: Duration) -> Option<Vec<Identity>>;

    /// Whether a dialog could be shown at all in this environment.
    fn interactive(&self) -> bool {
        false
    }
}

/// Headless default: never interactive, never selects.
pub struct NoSelection;

#[async_trait]
impl KeySelector for NoSelection {
    async fn select(&self, _identities: &[Identity], _timeout: Duration) -> Option<Vec<Identity>> {
        None
    }
}

/// Derives an opaque connection hint (e.g. `"github.com:acme/widgets"`)
/// from the peer process, typically by inspecting its command line.
#[async_trait]
pub trait HintProvider: Send + Sync {
    async fn hint_for_pid(&self, pid: u32) -> Option<String>;
}

/// Headless default: no hints.
pub struct NoHints;

#[async_trait]
impl HintProvider for NoHints {
    async fn hint_for_pid(&self, _pid: u32) -> Option<String> {
        None
    }
}
