//! Primitive readers and writers for message bodies.
//!
//! Bodies are a mix of little-endian scalars, length-prefixed UTF-8 strings
//! (u16 prefix for short fields, u32 for long ones) and u32-length-prefixed
//! JSON blobs. Every read checks the remaining length and fails with a
//! [`FramingError::Truncated`] naming the field, which is what ends up in the
//! disconnect log line.

use crate::error::FramingError;
use crate::symbols::Symbol;
use crate::xplatform::XPlatformId;
use bytes::{BufMut, BytesMut};
use serde_json::Value;
use std::net::Ipv4Addr;
use uuid::Uuid;

/// Sequential writer used by message encoders.
#[derive(Default)]
pub struct BodyWriter {
    buf: BytesMut,
}

impl BodyWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.put_u16_le(v);
    }

    pub fn put_i16(&mut self, v: i16) {
        self.buf.put_i16_le(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    pub fn put_symbol(&mut self, v: Symbol) {
        self.buf.put_i64_le(v.value());
    }

    pub fn put_uuid(&mut self, v: &Uuid) {
        self.buf.put_slice(v.as_bytes());
    }

    pub fn put_xplatform(&mut self, v: &XPlatformId) {
        self.put_u64(v.platform_code);
        self.put_u64(v.account_id);
    }

    pub fn put_ipv4(&mut self, v: &Ipv4Addr) {
        self.buf.put_slice(&v.octets());
    }

    /// Short string: u16 length prefix.
    pub fn put_str16(&mut self, v: &str) {
        debug_assert!(v.len() <= u16::MAX as usize);
        self.put_u16(v.len() as u16);
        self.buf.put_slice(v.as_bytes());
    }

    /// Long string: u32 length prefix.
    pub fn put_str32(&mut self, v: &str) {
        self.put_u32(v.len() as u32);
        self.buf.put_slice(v.as_bytes());
    }

    /// JSON blob: u32 length prefix over the serialized bytes.
    pub fn put_json(&mut self, v: &Value) {
        let bytes = serde_json::to_vec(v).expect("JSON value serialization cannot fail");
        self.put_u32(bytes.len() as u32);
        self.buf.put_slice(&bytes);
    }

    pub fn finish(self) -> BytesMut {
        self.buf
    }
}

/// Sequential reader used by message decoders.
pub struct BodyReader<'a> {
    buf: &'a [u8],
}

impl<'a> BodyReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], FramingError> {
        if self.buf.len() < n {
            return Err(FramingError::Truncated { what });
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    pub fn get_u8(&mut self, what: &'static str) -> Result<u8, FramingError> {
        Ok(self.take(1, what)?[0])
    }

    pub fn get_u16(&mut self, what: &'static str) -> Result<u16, FramingError> {
        let b = self.take(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn get_i16(&mut self, what: &'static str) -> Result<i16, FramingError> {
        let b = self.take(2, what)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    pub fn get_u32(&mut self, what: &'static str) -> Result<u32, FramingError> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_u64(&mut self, what: &'static str) -> Result<u64, FramingError> {
        let b = self.take(8, what)?;
        Ok(u64::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn get_symbol(&mut self, what: &'static str) -> Result<Symbol, FramingError> {
        let b = self.take(8, what)?;
        Ok(Symbol(i64::from_le_bytes(b.try_into().unwrap())))
    }

    pub fn get_uuid(&mut self, what: &'static str) -> Result<Uuid, FramingError> {
        let b = self.take(16, what)?;
        Ok(Uuid::from_bytes(b.try_into().unwrap()))
    }

    pub fn get_xplatform(&mut self, what: &'static str) -> Result<XPlatformId, FramingError> {
        let platform_code = self.get_u64(what)?;
        let account_id = self.get_u64(what)?;
        Ok(XPlatformId::new(platform_code, account_id))
    }

    pub fn get_ipv4(&mut self, what: &'static str) -> Result<Ipv4Addr, FramingError> {
        let b = self.take(4, what)?;
        Ok(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
    }

    pub fn get_str16(&mut self, what: &'static str) -> Result<String, FramingError> {
        let len = self.get_u16(what)? as usize;
        let bytes = self.take(len, what)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| FramingError::InvalidString { what })
    }

    pub fn get_str32(&mut self, what: &'static str) -> Result<String, FramingError> {
        let len = self.get_u32(what)? as usize;
        let bytes = self.take(len, what)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| FramingError::InvalidString { what })
    }

    pub fn get_json(&mut self, what: &'static str) -> Result<Value, FramingError> {
        let len = self.get_u32(what)? as usize;
        let bytes = self.take(len, what)?;
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }
}
