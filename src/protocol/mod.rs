//! Wire framing shared by every service.
//!
//! A transport frame carries a *packet*: one or more concatenated messages.
//! Each message is a 24-byte envelope followed by its body:
//!
//! ```text
//! [magic: 8B] [type symbol: i64 LE] [body length: u64 LE] [body: N bytes]
//! ```
//!
//! The transport may split a packet across frames or coalesce several into
//! one, so decoding is incremental over a growing byte buffer. A magic
//! mismatch or an oversized body length desynchronizes the stream and fails
//! the connection.

pub mod io;
pub mod messages;

use crate::error::FramingError;
use crate::symbols::Symbol;
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub use messages::Message;

/// Fixed per-message magic; its absence means the stream is desynchronized.
pub const MESSAGE_MAGIC: u64 = 0xBBBB_BBBB_BBBB_BBBB;

/// Envelope size preceding every message body.
pub const MESSAGE_HEADER_LEN: usize = 24;

/// Default cap on a single message body.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// A decoded envelope whose body has not been interpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub type_symbol: Symbol,
    pub body: Bytes,
}

/// Incremental packet decoder for one connection.
///
/// Feed transport frames with [`extend`](Self::extend) and drain messages
/// with [`try_next`](Self::try_next) until it yields `None`.
pub struct PacketDecoder {
    buf: BytesMut,
    max_body: usize,
}

impl PacketDecoder {
    pub fn new(max_body: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_body,
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pulls the next complete message out of the buffer.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Errors are fatal for
    /// the connection; the buffer contents are unspecified afterwards.
    pub fn try_next(&mut self) -> Result<Option<RawMessage>, FramingError> {
        if self.buf.len() < MESSAGE_HEADER_LEN {
            return Ok(None);
        }

        let magic = u64::from_le_bytes(self.buf[0..8].try_into().unwrap());
        if magic != MESSAGE_MAGIC {
            return Err(FramingError::BadMagic { found: magic });
        }

        let type_symbol = Symbol(i64::from_le_bytes(self.buf[8..16].try_into().unwrap()));
        let body_len = u64::from_le_bytes(self.buf[16..24].try_into().unwrap());
        if body_len > self.max_body as u64 {
            return Err(FramingError::Oversized {
                len: body_len,
                max: self.max_body as u64,
            });
        }

        let total = MESSAGE_HEADER_LEN + body_len as usize;
        if self.buf.len() < total {
            return Ok(None);
        }

        self.buf.advance(MESSAGE_HEADER_LEN);
        let body = self.buf.split_to(body_len as usize).freeze();
        Ok(Some(RawMessage { type_symbol, body }))
    }
}

/// Encodes messages into a single packet ready for the transport.
pub fn encode_packet(messages: &[Message]) -> Vec<u8> {
    let mut out = BytesMut::new();
    for message in messages {
        let body = message.encode_body();
        out.put_u64_le(MESSAGE_MAGIC);
        out.put_i64_le(message.type_symbol().value());
        out.put_u64_le(body.len() as u64);
        out.put_slice(&body);
    }
    out.to_vec()
}

/// Decodes a complete packet, for tests and one-shot callers.
///
/// The live connection path uses [`PacketDecoder`] incrementally instead.
pub fn decode_packet(data: &[u8], max_body: usize) -> Result<Vec<Message>, FramingError> {
    let mut decoder = PacketDecoder::new(max_body);
    decoder.extend(data);

    let mut messages = Vec::new();
    while let Some(raw) = decoder.try_next()? {
        messages.push(Message::decode(raw)?);
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet() -> Vec<u8> {
        encode_packet(&[Message::ChannelInfoRequest, Message::TcpConnectionUnrequireEvent])
    }

    #[test]
    fn test_packet_round_trip() {
        let decoded = decode_packet(&sample_packet(), DEFAULT_MAX_MESSAGE_BYTES).unwrap();
        assert_eq!(
            decoded,
            vec![Message::ChannelInfoRequest, Message::TcpConnectionUnrequireEvent]
        );
    }

    #[test]
    fn test_decoder_handles_split_frames() {
        let bytes = sample_packet();
        let mut decoder = PacketDecoder::new(DEFAULT_MAX_MESSAGE_BYTES);

        let mut decoded = Vec::new();
        // One byte at a time: worst-case transport fragmentation.
        for b in &bytes {
            decoder.extend(std::slice::from_ref(b));
            while let Some(raw) = decoder.try_next().unwrap() {
                decoded.push(Message::decode(raw).unwrap());
            }
        }
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn test_decoder_handles_coalesced_packets() {
        let mut bytes = sample_packet();
        bytes.extend_from_slice(&sample_packet());

        let decoded = decode_packet(&bytes, DEFAULT_MAX_MESSAGE_BYTES).unwrap();
        assert_eq!(decoded.len(), 4);
    }

    #[test]
    fn test_bad_magic_fails_the_stream() {
        let mut bytes = sample_packet();
        bytes[0] = 0x00;

        let mut decoder = PacketDecoder::new(DEFAULT_MAX_MESSAGE_BYTES);
        decoder.extend(&bytes);
        assert!(matches!(
            decoder.try_next(),
            Err(FramingError::BadMagic { .. })
        ));
    }

    #[test]
    fn test_oversized_body_fails_the_stream() {
        let mut bytes = BytesMut::new();
        bytes.put_u64_le(MESSAGE_MAGIC);
        bytes.put_i64_le(1);
        bytes.put_u64_le(u64::MAX);

        let mut decoder = PacketDecoder::new(DEFAULT_MAX_MESSAGE_BYTES);
        decoder.extend(&bytes);
        assert!(matches!(
            decoder.try_next(),
            Err(FramingError::Oversized { .. })
        ));
    }

    #[test]
    fn test_envelope_size_accounting() {
        // A decoder consumes exactly 24 + body_length bytes per message.
        let bytes = sample_packet();
        let body_lens: Vec<usize> = decode_packet(&bytes, DEFAULT_MAX_MESSAGE_BYTES)
            .unwrap()
            .iter()
            .map(|m| m.encode_body().len())
            .collect();
        let expected: usize = body_lens.iter().map(|l| MESSAGE_HEADER_LEN + l).sum();
        assert_eq!(bytes.len(), expected);
    }
}
