//! Framing and the payload shapes the router inspects.
//!
//! A frame is a 4-byte big-endian length `L` (1 ≤ L ≤ 256 KiB) followed by
//! `L` bytes: one type byte plus payload.  Reading zero bytes at a frame
//! boundary is a clean end of stream; any other truncation, a zero
//! length, or an oversized length is a malformed frame.

use agentmux_core::{Error, Identity, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::message::{Frame, MAX_FRAME_SIZE, MAX_IDENTITIES};

/// A parsed client sign request.
#[derive(Clone, PartialEq, Eq)]
pub struct SignRequest {
    pub key_blob: Vec<u8>,
    pub data: Vec<u8>,
    pub flags: u32,
}

impl std::fmt::Debug for SignRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // data is what the client is about to sign; keep it out of logs
        f.debug_struct("SignRequest")
            .field("key_blob_len", &self.key_blob.len())
            .field("data_len", &self.data.len())
            .field("flags", &self.flags)
            .finish()
    }
}

/// Read one frame.  `Ok(None)` is a clean end of stream (zero bytes read
/// on the length prefix); every other short read is [`Error::MalformedFrame`].
pub async fn read_frame<S>(stream: &mut S) -> Result<Option<Frame>>
where
    S: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = stream.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::MalformedFrame(format!(
                "stream ended {filled} bytes into the length prefix"
            )));
        }
        filled += n;
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Err(Error::MalformedFrame("frame with declared length 0".into()));
    }
    if len > MAX_FRAME_SIZE {
        return Err(Error::MalformedFrame(format!(
            "frame of {len} bytes exceeds the {MAX_FRAME_SIZE}-byte limit"
        )));
    }

    let mut body = vec![0u8; len];
    stream
        .read_exact(&mut body)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                Error::MalformedFrame(format!("stream ended inside a {len}-byte frame"))
            }
            _ => Error::Io(e),
        })?;

    let msg_type = body[0];
    let payload = body.split_off(1);
    Ok(Some(Frame::new(msg_type, payload)))
}

/// Write one frame and flush.
pub async fn write_frame<S>(stream: &mut S, frame: &Frame) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let len = frame.payload.len() + 1;
    if len > MAX_FRAME_SIZE {
        return Err(Error::MalformedFrame(format!(
            "refusing to write a {len}-byte frame"
        )));
    }
    let mut buf = Vec::with_capacity(4 + len);
    buf.extend_from_slice(&(len as u32).to_be_bytes());
    buf.push(frame.msg_type);
    buf.extend_from_slice(&frame.payload);
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

/// Parse a sign-request payload: key blob, data, then an optional 4-byte
/// flags word (absent flags parse as 0).
pub fn parse_sign_request(payload: &[u8]) -> Result<SignRequest> {
    let mut cursor = Cursor::new(payload);
    let key_blob = cursor.read_string()?.to_vec();
    let data = cursor.read_string()?.to_vec();
    let flags = match cursor.remaining() {
        0 => 0,
        4 => cursor.read_u32()?,
        n => {
            return Err(Error::MalformedFrame(format!(
                "{n} trailing bytes after sign request data"
            )))
        }
    };
    Ok(SignRequest {
        key_blob,
        data,
        flags,
    })
}

/// Encode a client sign request.
pub fn encode_sign_request(key_blob: &[u8], data: &[u8], flags: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + key_blob.len() + data.len() + 4);
    put_string(&mut out, key_blob);
    put_string(&mut out, data);
    out.extend_from_slice(&flags.to_be_bytes());
    out
}

/// Parse an identities-answer payload: 4-byte count, then (blob, comment)
/// pairs.  A declared count over 1000 is malformed.
pub fn parse_identities_answer(payload: &[u8]) -> Result<Vec<Identity>> {
    let mut cursor = Cursor::new(payload);
    let count = cursor.read_u32()?;
    if count > MAX_IDENTITIES {
        return Err(Error::MalformedFrame(format!(
            "identities answer declares {count} keys (limit {MAX_IDENTITIES})"
        )));
    }

    let mut identities = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let blob = cursor.read_string()?.to_vec();
        let comment = String::from_utf8_lossy(cursor.read_string()?).into_owned();
        identities.push(Identity::new(blob, comment));
    }
    Ok(identities)
}

/// Encode an identities-answer payload.
pub fn encode_identities_answer(identities: &[Identity]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(identities.len() as u32).to_be_bytes());
    for identity in identities {
        put_string(&mut out, &identity.key_blob);
        put_string(&mut out, identity.comment.as_bytes());
    }
    out
}

/// Parse a sign-response payload into the inner signature bytes.
pub fn parse_sign_response(payload: &[u8]) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(payload);
    let signature = cursor.read_string()?.to_vec();
    Ok(signature)
}

/// Encode a sign-response payload.
pub fn encode_sign_response(signature: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + signature.len());
    put_string(&mut out, signature);
    out
}

fn put_string(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

/// Bounds-checked reader over a payload slice.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_u32(&mut self) -> Result<u32> {
        if self.remaining() < 4 {
            return Err(Error::MalformedFrame(
                "payload truncated inside a length word".into(),
            ));
        }
        let word = u32::from_be_bytes(
            self.buf[self.pos..self.pos + 4]
                .try_into()
                .expect("slice is exactly 4 bytes"),
        );
        self.pos += 4;
        Ok(word)
    }

    fn read_string(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u32()? as usize;
        if len > self.remaining() {
            return Err(Error::MalformedFrame(format!(
                "string of {len} bytes exceeds the {} remaining",
                self.remaining()
            )));
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{SSH_AGENTC_SIGN_REQUEST, SSH_AGENT_IDENTITIES_ANSWER};

    async fn frame_from_bytes(bytes: &[u8]) -> Result<Option<Frame>> {
        let mut slice = bytes;
        read_frame(&mut slice).await
    }

    #[tokio::test]
    async fn frame_round_trip() {
        let frame = Frame::new(SSH_AGENT_IDENTITIES_ANSWER, vec![1, 2, 3]);
        let mut buf = Vec::new();
        write_frame(&mut buf, &frame).await.unwrap();
        assert_eq!(&buf[..4], &[0, 0, 0, 4]);

        let decoded = frame_from_bytes(&buf).await.unwrap().unwrap();
        assert_eq!(decoded, frame);
    }

    #[tokio::test]
    async fn empty_stream_is_clean_eof() {
        assert!(frame_from_bytes(&[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn zero_length_is_malformed() {
        let err = frame_from_bytes(&[0, 0, 0, 0]).await.unwrap_err();
        assert!(matches!(err, Error::MalformedFrame(_)));
    }

    #[tokio::test]
    async fn oversized_length_is_malformed() {
        // 256 KiB + 1
        let err = frame_from_bytes(&[0, 4, 0, 1]).await.unwrap_err();
        assert!(matches!(err, Error::MalformedFrame(_)));
    }

    #[tokio::test]
    async fn short_length_prefix_is_malformed() {
        let err = frame_from_bytes(&[0, 0]).await.unwrap_err();
        assert!(matches!(err, Error::MalformedFrame(_)));
    }

    #[tokio::test]
    async fn truncated_payload_is_malformed() {
        let err = frame_from_bytes(&[0, 0, 0, 5, 13, 1]).await.unwrap_err();
        assert!(matches!(err, Error::MalformedFrame(_)));
    }

    #[test]
    fn sign_request_round_trip() {
        let payload = encode_sign_request(b"key-blob", b"session-data", 2);
        let parsed = parse_sign_request(&payload).unwrap();
        assert_eq!(parsed.key_blob, b"key-blob");
        assert_eq!(parsed.data, b"session-data");
        assert_eq!(parsed.flags, 2);
    }

    #[test]
    fn sign_request_without_flags_defaults_to_zero() {
        let mut payload = Vec::new();
        put_string(&mut payload, b"key-blob");
        put_string(&mut payload, b"data");
        let parsed = parse_sign_request(&payload).unwrap();
        assert_eq!(parsed.flags, 0);
    }

    #[test]
    fn sign_request_with_overlong_string_is_malformed() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&100u32.to_be_bytes());
        payload.extend_from_slice(b"short");
        assert!(matches!(
            parse_sign_request(&payload),
            Err(Error::MalformedFrame(_))
        ));
    }

    #[test]
    fn sign_request_with_odd_trailer_is_malformed() {
        let mut payload = encode_sign_request(b"kb", b"d", 0);
        payload.push(0);
        assert!(matches!(
            parse_sign_request(&payload),
            Err(Error::MalformedFrame(_))
        ));
    }

    #[test]
    fn identities_round_trip_preserves_order() {
        let identities = vec![
            Identity::new(b"blob-one".to_vec(), "first"),
            Identity::new(b"blob-two".to_vec(), "second"),
        ];
        let payload = encode_identities_answer(&identities);
        let parsed = parse_identities_answer(&payload).unwrap();
        assert_eq!(parsed, identities);
    }

    #[test]
    fn empty_identities_round_trip() {
        let payload = encode_identities_answer(&[]);
        assert!(parse_identities_answer(&payload).unwrap().is_empty());
    }

    #[test]
    fn identities_count_over_limit_is_malformed() {
        let payload = 1001u32.to_be_bytes().to_vec();
        assert!(matches!(
            parse_identities_answer(&payload),
            Err(Error::MalformedFrame(_))
        ));
    }

    #[test]
    fn identities_truncated_pair_is_malformed() {
        let mut payload = 2u32.to_be_bytes().to_vec();
        put_string(&mut payload, b"blob");
        put_string(&mut payload, b"comment");
        // second pair missing entirely
        assert!(matches!(
            parse_identities_answer(&payload),
            Err(Error::MalformedFrame(_))
        ));
    }

    #[test]
    fn sign_response_round_trip() {
        let payload = encode_sign_response(b"signature-bytes");
        assert_eq!(parse_sign_response(&payload).unwrap(), b"signature-bytes");
    }

    #[tokio::test]
    async fn sign_request_frame_end_to_end() {
        let frame = Frame::new(
            SSH_AGENTC_SIGN_REQUEST,
            encode_sign_request(b"kb", b"data", 0),
        );
        let mut buf = Vec::new();
        write_frame(&mut buf, &frame).await.unwrap();
        let decoded = frame_from_bytes(&buf).await.unwrap().unwrap();
        let parsed = parse_sign_request(&decoded.payload).unwrap();
        assert_eq!(parsed.key_blob, b"kb");
    }
}
