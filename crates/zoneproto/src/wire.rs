//! Cursor-based primitive reads and writes for message bodies.

use bytes::Bytes;

use crate::ProtoError;

/// Checked forward-only reader over one message body.
#[derive(Debug)]
pub struct Reader {
    p: Bytes,
    i: usize,
}

impl Reader {
    pub fn new(p: Bytes) -> Self {
        Self { p, i: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.p.len() - self.i
    }

    fn take(&mut self, n: usize) -> Result<&[u8], ProtoError> {
        let need = self.i + n;
        if self.p.len() < need {
            return Err(ProtoError::TooShort {
                need,
                got: self.p.len(),
            });
        }
        let s = &self.p[self.i..need];
        self.i = need;
        Ok(s)
    }

    pub fn u8(&mut self) -> Result<u8, ProtoError> {
        Ok(self.take(1)?[0])
    }

    pub fn bool(&mut self) -> Result<bool, ProtoError> {
        Ok(self.u8()? != 0)
    }

    pub fn u16(&mut self) -> Result<u16, ProtoError> {
        let s = self.take(2)?;
        Ok(u16::from_le_bytes([s[0], s[1]]))
    }

    pub fn i32(&mut self) -> Result<i32, ProtoError> {
        let s = self.take(4)?;
        Ok(i32::from_le_bytes([s[0], s[1], s[2], s[3]]))
    }

    pub fn u32(&mut self) -> Result<u32, ProtoError> {
        let s = self.take(4)?;
        Ok(u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
    }

    /// `u16` little-endian byte length, then that many UTF-8 bytes.
    pub fn string(&mut self) -> Result<String, ProtoError> {
        let len = self.u16()? as usize;
        let s = self.take(len)?;
        std::str::from_utf8(s)
            .map(str::to_owned)
            .map_err(|_| ProtoError::Malformed("string is not valid utf-8"))
    }

    /// The body must consume exactly the declared frame; leftovers are corrupt.
    pub fn finish(self) -> Result<(), ProtoError> {
        if self.remaining() != 0 {
            return Err(ProtoError::Malformed("trailing bytes after message body"));
        }
        Ok(())
    }
}

pub fn put_u8(b: &mut Vec<u8>, v: u8) {
    b.push(v);
}

pub fn put_bool(b: &mut Vec<u8>, v: bool) {
    b.push(v as u8);
}

pub fn put_u16(b: &mut Vec<u8>, v: u16) {
    b.extend_from_slice(&v.to_le_bytes());
}

pub fn put_i32(b: &mut Vec<u8>, v: i32) {
    b.extend_from_slice(&v.to_le_bytes());
}

pub fn put_u32(b: &mut Vec<u8>, v: u32) {
    b.extend_from_slice(&v.to_le_bytes());
}

/// Length-prefixed string. Clamped at the `u16` limit; callers carrying
/// documents that must not be cut short check the length first.
pub fn put_str(b: &mut Vec<u8>, s: &str) {
    let raw = s.as_bytes();
    let n = raw.len().min(u16::MAX as usize);
    put_u16(b, n as u16);
    b.extend_from_slice(&raw[..n]);
}
