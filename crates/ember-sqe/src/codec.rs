//! Little-endian field access over fixed-size records.

use ember_core::{DescriptorError, Result};

/// Field writer over a byte record
#[derive(Debug)]
pub struct FieldWriter<'a> {
    buf: &'a mut [u8],
}

impl<'a> FieldWriter<'a> {
    /// Wrap a record
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf }
    }

    /// Write a byte at `offset`
    #[inline]
    pub fn put_u8(&mut self, offset: usize, value: u8) {
        self.buf[offset] = value;
    }

    /// Write a u16 at `offset`
    #[inline]
    pub fn put_u16(&mut self, offset: usize, value: u16) {
        self.buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    /// Write a u32 at `offset`
    #[inline]
    pub fn put_u32(&mut self, offset: usize, value: u32) {
        self.buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Write 32-bit word `index` (word n starts at byte 4n)
    #[inline]
    pub fn put_word(&mut self, index: usize, value: u32) {
        self.put_u32(index * 4, value);
    }

    /// Copy raw bytes at `offset`
    #[inline]
    pub fn put_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.buf[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}

/// Field reader over a byte record
#[derive(Debug, Clone, Copy)]
pub struct FieldReader<'a> {
    buf: &'a [u8],
}

impl<'a> FieldReader<'a> {
    /// Wrap a record, checking it is at least `len` bytes
    pub fn new(buf: &'a [u8], len: usize) -> Result<Self> {
        if buf.len() < len {
            return Err(DescriptorError::Truncated.into());
        }
        Ok(Self { buf })
    }

    /// Read a byte
    #[inline]
    pub fn u8(&self, offset: usize) -> u8 {
        self.buf[offset]
    }

    /// Read a u16
    #[inline]
    pub fn u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.buf[offset], self.buf[offset + 1]])
    }

    /// Read a u32
    #[inline]
    pub fn u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.buf[offset],
            self.buf[offset + 1],
            self.buf[offset + 2],
            self.buf[offset + 3],
        ])
    }

    /// Read 32-bit word `index`
    #[inline]
    pub fn word(&self, index: usize) -> u32 {
        self.u32(index * 4)
    }

    /// Borrow raw bytes
    #[inline]
    pub fn bytes(&self, offset: usize, len: usize) -> &'a [u8] {
        &self.buf[offset..offset + len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_little_endian_words() {
        let mut buf = [0u8; 16];
        let mut w = FieldWriter::new(&mut buf);
        w.put_word(1, 0x1122_3344);
        w.put_u16(8, 0xABCD);
        assert_eq!(&buf[4..8], &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(&buf[8..10], &[0xCD, 0xAB]);

        let r = FieldReader::new(&buf, 16).unwrap();
        assert_eq!(r.word(1), 0x1122_3344);
        assert_eq!(r.u16(8), 0xABCD);
    }

    #[test]
    fn test_short_record_rejected() {
        let buf = [0u8; 8];
        assert!(FieldReader::new(&buf, 16).is_err());
    }
}
