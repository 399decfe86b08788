//! Thin agent client used against a backend pipe.
//!
//! One client wraps one freshly opened stream and performs one logical
//! operation.  The router never reuses a client across operations: an
//! external switch may have changed which process is serving the shared
//! pipe in between, so each operation gets a fresh connection.

use agentmux_core::{Identity, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::codec::{
    encode_sign_request, parse_identities_answer, parse_sign_response, read_frame, write_frame,
};
use crate::message::{Frame, MessageKind, SSH_AGENTC_REQUEST_IDENTITIES, SSH_AGENTC_SIGN_REQUEST};

pub struct AgentClient<S> {
    stream: S,
}

impl<S> AgentClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// List the identities the backend currently offers.
    ///
    /// Anything other than an identities-answer (including a closed
    /// stream) is treated as "no identities"; some backends answer a
    /// listing with failure while locked.
    pub async fn request_identities(&mut self) -> Result<Vec<Identity>> {
        let request = Frame::new(SSH_AGENTC_REQUEST_IDENTITIES, Vec::new());
        write_frame(&mut self.stream, &request).await?;

        match read_frame(&mut self.stream).await? {
            Some(frame) if frame.kind() == MessageKind::IdentitiesAnswer => {
                let identities = parse_identities_answer(&frame.payload)?;
                debug!(count = identities.len(), "backend listed identities");
                Ok(identities)
            }
            Some(frame) => {
                debug!(kind = ?frame.kind(), "non-answer response to identities request");
                Ok(Vec::new())
            }
            None => {
                debug!("backend closed the stream on identities request");
                Ok(Vec::new())
            }
        }
    }

    /// Ask the backend to sign `data` with the key identified by
    /// `key_blob`.  `Ok(None)` means the backend was reached but declined
    /// (typically: locked, awaiting user authentication).
    pub async fn sign(
        &mut self,
        key_blob: &[u8],
        data: &[u8],
        flags: u32,
    ) -> Result<Option<Vec<u8>>> {
        let request = Frame::new(
            SSH_AGENTC_SIGN_REQUEST,
            encode_sign_request(key_blob, data, flags),
        );
        write_frame(&mut self.stream, &request).await?;

        match read_frame(&mut self.stream).await? {
            Some(frame) if frame.kind() == MessageKind::SignResponse => {
                let signature = parse_sign_response(&frame.payload)?;
                debug!(signature_len = signature.len(), "backend signed");
                Ok(Some(signature))
            }
            Some(frame) => {
                debug!(kind = ?frame.kind(), "backend declined sign request");
                Ok(None)
            }
            None => {
                debug!("backend closed the stream on sign request");
                Ok(None)
            }
        }
    }

    /// Round-trip an uninterpreted frame.  `Ok(None)` when the backend
    /// closes without answering.
    pub async fn forward(&mut self, frame: &Frame) -> Result<Option<Frame>> {
        write_frame(&mut self.stream, frame).await?;
        read_frame(&mut self.stream).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_identities_answer;
    use crate::message::{SSH_AGENT_IDENTITIES_ANSWER, SSH_AGENT_SIGN_RESPONSE};
    use crate::codec::encode_sign_response;

    /// Serve exactly one scripted response frame on the far end of a
    /// duplex stream.
    fn one_shot_backend(response: Option<Frame>) -> tokio::io::DuplexStream {
        let (near, mut far) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let _request = read_frame(&mut far).await;
            if let Some(frame) = response {
                let _ = write_frame(&mut far, &frame).await;
            }
        });
        near
    }

    #[tokio::test]
    async fn request_identities_parses_answer() {
        let identities = vec![Identity::new(b"blob".to_vec(), "c")];
        let stream = one_shot_backend(Some(Frame::new(
            SSH_AGENT_IDENTITIES_ANSWER,
            encode_identities_answer(&identities),
        )));
        let mut client = AgentClient::new(stream);
        assert_eq!(client.request_identities().await.unwrap(), identities);
    }

    #[tokio::test]
    async fn request_identities_failure_yields_empty() {
        let stream = one_shot_backend(Some(Frame::failure()));
        let mut client = AgentClient::new(stream);
        assert!(client.request_identities().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn request_identities_eof_yields_empty() {
        let stream = one_shot_backend(None);
        let mut client = AgentClient::new(stream);
        assert!(client.request_identities().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sign_decodes_signature() {
        let stream = one_shot_backend(Some(Frame::new(
            SSH_AGENT_SIGN_RESPONSE,
            encode_sign_response(b"sig"),
        )));
        let mut client = AgentClient::new(stream);
        let signature = client.sign(b"kb", b"data", 0).await.unwrap();
        assert_eq!(signature.as_deref(), Some(&b"sig"[..]));
    }

    #[tokio::test]
    async fn sign_refusal_yields_none() {
        let stream = one_shot_backend(Some(Frame::failure()));
        let mut client = AgentClient::new(stream);
        assert!(client.sign(b"kb", b"data", 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn forward_round_trips_opaque_frame() {
        let stream = one_shot_backend(Some(Frame::new(42, vec![9, 9])));
        let mut client = AgentClient::new(stream);
        let response = client
            .forward(&Frame::new(41, vec![1]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.msg_type, 42);
    }
}
