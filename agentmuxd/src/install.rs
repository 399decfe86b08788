//! Environment-variable installation collaborator.
//!
//! Pointing SSH clients at the proxy pipe (and back) is done by the
//! installer shell, not the routing engine; the CLI only needs the
//! removal half for `--uninstall` / `--reset`.

use agentmux_core::Result;
use tracing::info;

/// The variable the installer sets to point clients at the proxy pipe.
pub const AGENT_ENV_VAR: &str = "SSH_AUTH_SOCK";

/// Remove the persisted environment configuration for the current user.
pub async fn uninstall() -> Result<()> {
    #[cfg(windows)]
    {
        let status = tokio::process::Command::new("reg")
            .args([
                "delete",
                r"HKCU\Environment",
                "/v",
                AGENT_ENV_VAR,
                "/f",
            ])
            .status()
            .await
            .map_err(agentmux_core::Error::Io)?;
        if status.success() {
            info!(var = AGENT_ENV_VAR, "removed user environment variable");
        } else {
            // reg exits non-zero when the value was never set.
            info!(var = AGENT_ENV_VAR, "no user environment variable to remove");
        }
        Ok(())
    }

    #[cfg(not(windows))]
    {
        info!("nothing to uninstall on this platform");
        Ok(())
    }
}
