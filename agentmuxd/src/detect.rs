//! Process-based detection of the shared pipe's current owner.
//!
//! The OS offers no API for "who owns this named pipe", and probing the
//! pipe itself can pop an unlock dialog on a backend that prompts on
//! list.  So ownership is inferred from which backend *processes* exist:
//!
//! - An unlock-on-list backend steals the pipe whenever it starts, so if
//!   exactly one such backend is running it is assumed to own the pipe.
//! - Otherwise, if exactly one backend of any kind is running, it owns
//!   the pipe by elimination.
//! - Every other situation is ambiguous and yields `None`; the router
//!   must never pin a wrong owner.

use agentmux_core::BackendSpec;

use crate::process::ProcessControl;

/// Infer the current owner of the shared backend pipe, or `None` when the
/// heuristic does not apply.
pub async fn detect_current(
    backends: &[BackendSpec],
    process: &dyn ProcessControl,
) -> Option<String> {
    let mut running = Vec::new();
    for spec in backends {
        if process.is_running(&spec.process_name).await {
            running.push(spec);
        }
    }

    let stealers: Vec<&&BackendSpec> = running.iter().filter(|s| s.unlock_on_list).collect();
    match stealers.as_slice() {
        [only] => Some(only.name.clone()),
        [] => match running.as_slice() {
            [only] => Some(only.name.clone()),
            _ => None,
        },
        _ => None,
    }
}
