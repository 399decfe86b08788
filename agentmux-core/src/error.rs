//! Error taxonomy for the routing engine.
//!
//! The router itself never surfaces these to a client (every handled
//! message resolves to a well-formed protocol frame), but the variants
//! drive the sign state machine's fallback decisions.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Protocol violation on either pipe.  Closes the offending
    /// connection; never fatal to the daemon.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Could not open the backend pipe within the connect timeout.
    /// Enters the failure cache and triggers the next fallback step.
    #[error("backend not connected")]
    NotConnected,

    /// The backend was reached but answered with a failure frame.
    /// Never cached, since the user may authenticate and retry.
    #[error("backend refused to sign")]
    SignRefused,

    /// Termination or launch of a backend process failed.
    #[error("process control failure: {0}")]
    ProcessControl(String),

    /// Writing the configuration file failed.  In-memory state is still
    /// updated and the response still returned.
    #[error("failed to persist configuration: {0}")]
    Persistence(#[source] std::io::Error),

    /// Shutdown was requested while the operation was in flight.
    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
