//! OpenSSH agent wire protocol for agentmux.
//!
//! Frames are length-prefixed: a 4-byte big-endian length `L`, then `L`
//! bytes whose first byte is the message type.  The proxy inspects only
//! the handful of types it routes on; everything else passes through
//! opaquely.
//!
//! [`codec`] owns framing and the payload shapes the router inspects;
//! [`client`] is the thin agent client used against a backend pipe.

pub mod client;
pub mod codec;
pub mod message;

pub use client::AgentClient;
pub use message::{Frame, MessageKind, MAX_FRAME_SIZE, MAX_IDENTITIES};
