//! Session frame codec.
//!
//! Every frame is `[cmd u8][stream id u32][length u16]` followed by
//! `length` payload bytes, all integers big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

pub const CMD_WASTE: u8 = 0x00;
pub const CMD_SYN: u8 = 0x01;
pub const CMD_PSH: u8 = 0x02;
pub const CMD_FIN: u8 = 0x03;
pub const CMD_SETTINGS: u8 = 0x04;
pub const CMD_ALERT: u8 = 0x05;
pub const CMD_UPDATE_PADDING_SCHEME: u8 = 0x06;
pub const CMD_HEART_REQUEST: u8 = 0x08;
pub const CMD_HEART_RESPONSE: u8 = 0x09;

pub const HEADER_LEN: usize = 7;
/// Largest payload one frame can carry.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

#[derive(Debug, Clone)]
pub struct Frame {
    pub cmd: u8,
    pub sid: u32,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(cmd: u8, sid: u32) -> Self {
        Self {
            cmd,
            sid,
            payload: Bytes::new(),
        }
    }

    pub fn with_payload(cmd: u8, sid: u32, payload: Bytes) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD);
        Self { cmd, sid, payload }
    }

    /// A waste frame whose payload is `len` zero bytes.
    pub fn waste(len: usize) -> Self {
        Self::with_payload(CMD_WASTE, 0, Bytes::from(vec![0u8; len.min(MAX_PAYLOAD)]))
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(HEADER_LEN + self.payload.len());
        buf.put_u8(self.cmd);
        buf.put_u32(self.sid);
        buf.put_u16(self.payload.len() as u16);
        buf.put_slice(&self.payload);
    }

    /// Encoded size of this frame, header included.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Read one frame from the connection.
    pub async fn read_from<R>(r: &mut R) -> std::io::Result<Frame>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; HEADER_LEN];
        r.read_exact(&mut header).await?;
        let mut hdr = &header[..];
        let cmd = hdr.get_u8();
        let sid = hdr.get_u32();
        let len = hdr.get_u16() as usize;

        let mut payload = vec![0u8; len];
        if len > 0 {
            r.read_exact(&mut payload).await?;
        }
        Ok(Frame {
            cmd,
            sid,
            payload: Bytes::from(payload),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn encode_decode_round_trip() {
        let frame = Frame::with_payload(CMD_PSH, 42, Bytes::from_static(b"hello"));
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        assert_eq!(buf.len(), frame.wire_len());

        let mut cursor = std::io::Cursor::new(buf.freeze());
        let decoded = Frame::read_from(&mut cursor).await.unwrap();
        assert_eq!(decoded.cmd, CMD_PSH);
        assert_eq!(decoded.sid, 42);
        assert_eq!(&decoded.payload[..], b"hello");
    }

    #[tokio::test]
    async fn empty_payload_frame() {
        let frame = Frame::new(CMD_FIN, 7);
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN);

        let mut cursor = std::io::Cursor::new(buf.freeze());
        let decoded = Frame::read_from(&mut cursor).await.unwrap();
        assert_eq!(decoded.cmd, CMD_FIN);
        assert_eq!(decoded.sid, 7);
        assert!(decoded.payload.is_empty());
    }

    #[tokio::test]
    async fn truncated_header_is_eof() {
        let mut cursor = std::io::Cursor::new(Bytes::from_static(&[CMD_PSH, 0, 0]));
        assert!(Frame::read_from(&mut cursor).await.is_err());
    }
}
