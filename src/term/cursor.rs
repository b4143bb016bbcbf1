//! Byte cursors for fixed-layout term records.
//!
//! Both cursors own their position; nothing about the encoding is global. All
//! multi-byte values are big-endian. Every primitive checks bounds before
//! touching the buffer, so a failed write leaves the bytes past the cursor
//! untouched and a failed read leaves the position where it was.

use crate::error::{ReasonerError, ReasonerResult};

/// Write cursor over a caller-provided buffer.
pub struct ByteWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> ByteWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn put_bytes<const N: usize>(&mut self, bytes: [u8; N]) -> ReasonerResult<()> {
        if self.remaining() < N {
            return Err(ReasonerError::Capacity {
                what: "record byte",
                index: self.pos + N,
                limit: self.buf.len(),
            });
        }
        self.buf[self.pos..self.pos + N].copy_from_slice(&bytes);
        self.pos += N;
        Ok(())
    }

    pub fn put_u8(&mut self, value: u8) -> ReasonerResult<()> {
        self.put_bytes(value.to_be_bytes())
    }

    pub fn put_u16(&mut self, value: u16) -> ReasonerResult<()> {
        self.put_bytes(value.to_be_bytes())
    }

    pub fn put_u32(&mut self, value: u32) -> ReasonerResult<()> {
        self.put_bytes(value.to_be_bytes())
    }

    pub fn put_i32(&mut self, value: i32) -> ReasonerResult<()> {
        self.put_bytes(value.to_be_bytes())
    }

    pub fn put_f32(&mut self, value: f32) -> ReasonerResult<()> {
        self.put_bytes(value.to_be_bytes())
    }
}

/// Read cursor over a byte slice (typically a memory-mapped page).
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn get_bytes<const N: usize>(&mut self) -> ReasonerResult<[u8; N]> {
        if self.remaining() < N {
            return Err(ReasonerError::corrupt(
                self.pos,
                format!("need {} bytes, {} left", N, self.remaining()),
            ));
        }
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        Ok(bytes)
    }

    pub fn get_u8(&mut self) -> ReasonerResult<u8> {
        self.get_bytes::<1>().map(u8::from_be_bytes)
    }

    pub fn get_u16(&mut self) -> ReasonerResult<u16> {
        self.get_bytes::<2>().map(u16::from_be_bytes)
    }

    pub fn get_u32(&mut self) -> ReasonerResult<u32> {
        self.get_bytes::<4>().map(u32::from_be_bytes)
    }

    pub fn get_i32(&mut self) -> ReasonerResult<i32> {
        self.get_bytes::<4>().map(i32::from_be_bytes)
    }

    pub fn get_f32(&mut self) -> ReasonerResult<f32> {
        self.get_bytes::<4>().map(f32::from_be_bytes)
    }
}
