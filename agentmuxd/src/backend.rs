//! Connector to the shared backend pipe.
//!
//! Each logical operation opens a fresh client connection; the router
//! never assumes two successive operations reach the same backend
//! process.  Connects are bounded by a 2-second timeout; a failed connect
//! surfaces as [`Error::NotConnected`] so the sign state machine can cache
//! the failure and fall back.

use std::time::Duration;

use agentmux_core::{Error, Result};
use agentmux_wire::AgentClient;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Overall timeout for opening the backend pipe.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Object-safe stream alias so mock and pipe connectors interchange.
pub trait AgentStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AgentStream for T {}

pub type BoxedClient = AgentClient<Box<dyn AgentStream>>;

/// Opens fresh connections to the shared backend pipe.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<BoxedClient>;
}

/// Prefix a bare pipe name with the local pipe namespace.
pub fn normalize_pipe_name(name: &str) -> String {
    if name.starts_with(r"\\.\pipe\") || name.starts_with(r"\\?\pipe\") {
        name.to_string()
    } else {
        format!(r"\\.\pipe\{name}")
    }
}

/// Connector for the real Windows named pipe.
pub struct PipeConnector {
    path: String,
}

impl PipeConnector {
    pub fn new(pipe_name: &str) -> Self {
        Self {
            path: normalize_pipe_name(pipe_name),
        }
    }
}

#[cfg(windows)]
#[async_trait]
impl Connector for PipeConnector {
    async fn connect(&self) -> Result<BoxedClient> {
        use tokio::net::windows::named_pipe::ClientOptions;
        use windows_sys::Win32::Foundation::ERROR_PIPE_BUSY;

        let path = self.path.clone();
        let open = async {
            loop {
                match ClientOptions::new().open(&path) {
                    Ok(pipe) => return Ok::<_, std::io::Error>(pipe),
                    // All instances busy: back off briefly and retry
                    // within the overall connect timeout.
                    Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY as i32) => {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        match tokio::time::timeout(CONNECT_TIMEOUT, open).await {
            Ok(Ok(pipe)) => {
                let stream: Box<dyn AgentStream> = Box::new(pipe);
                Ok(AgentClient::new(stream))
            }
            Ok(Err(e)) => {
                debug!(pipe = %self.path, "backend pipe connect failed: {e}");
                Err(Error::NotConnected)
            }
            Err(_) => {
                debug!(pipe = %self.path, "backend pipe connect timed out");
                Err(Error::NotConnected)
            }
        }
    }
}

#[cfg(not(windows))]
#[async_trait]
impl Connector for PipeConnector {
    async fn connect(&self) -> Result<BoxedClient> {
        debug!(pipe = %self.path, "named pipes are unavailable on this platform");
        Err(Error::NotConnected)
    }
}
