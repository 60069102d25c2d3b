//! A forward reading cursor over an immutable byte buffer.
//!
//! Every container format in this crate is parsed through [`ByteCursor`]. Reads
//! past the end of the buffer are reported as [`Error::BufferUnderrun`], never
//! truncated.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use bytes::Bytes;
use num_bigint::{BigInt, BigUint};
use num_traits::{One, Zero};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

/// Text encodings understood by the string readers.
///
/// `Ascii` follows the web definition of the label and decodes as windows-1252.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    Ascii,
    #[default]
    Utf8,
}

impl TextEncoding {
    fn as_encoding_rs(self) -> &'static encoding_rs::Encoding {
        match self {
            TextEncoding::Ascii => encoding_rs::WINDOWS_1252,
            TextEncoding::Utf8 => encoding_rs::UTF_8,
        }
    }

    pub fn decode(self, raw: &[u8]) -> String {
        let (s, had_errors) = self.as_encoding_rs().decode_without_bom_handling(raw);
        if had_errors {
            log::warn!("{:?} decode error, replacement characters inserted", self);
        }
        s.into_owned()
    }
}

/// Numbers with a fixed byte width.
pub trait FixedNumber: Sized + Copy {
    const WIDTH: usize;

    fn decode(buf: &[u8], endian: Endian) -> Self;
}

impl FixedNumber for u8 {
    const WIDTH: usize = 1;

    fn decode(buf: &[u8], _endian: Endian) -> Self {
        buf[0]
    }
}

impl FixedNumber for i8 {
    const WIDTH: usize = 1;

    fn decode(buf: &[u8], _endian: Endian) -> Self {
        buf[0] as i8
    }
}

macro_rules! fixed_number {
    ($($ty:ty => $read:ident),* $(,)?) => {$(
        impl FixedNumber for $ty {
            const WIDTH: usize = std::mem::size_of::<$ty>();

            fn decode(buf: &[u8], endian: Endian) -> Self {
                match endian {
                    Endian::Little => LittleEndian::$read(buf),
                    Endian::Big => BigEndian::$read(buf),
                }
            }
        }
    )*};
}

fixed_number!(
    u16 => read_u16,
    u32 => read_u32,
    u64 => read_u64,
    i16 => read_i16,
    i32 => read_i32,
    i64 => read_i64,
    f32 => read_f32,
    f64 => read_f64,
);

#[derive(Debug, Clone, Default)]
pub struct ByteCursor {
    data: Bytes,
    pos: usize,
    endian: Endian,
}

impl ByteCursor {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
            endian: Endian::Little,
        }
    }

    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// The whole underlying buffer, independent of the current position.
    pub fn buffer(&self) -> &Bytes {
        &self.data
    }

    /// Moves the pointer to an absolute position in `0..=len`.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(self.underrun_at(pos, 0));
        }
        self.pos = pos;
        Ok(())
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    fn underrun_at(&self, offset: usize, wanted: usize) -> Error {
        Error::BufferUnderrun {
            offset,
            wanted,
            len: self.data.len(),
        }
    }

    fn take(&mut self, n: usize) -> Result<&[u8]> {
        let start = self.pos;
        let end = start
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| self.underrun_at(start, n))?;
        self.pos = end;
        Ok(&self.data[start..end])
    }

    /// Zero-copy slice of the next `n` bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<Bytes> {
        let start = self.pos;
        self.take(n)?;
        Ok(self.data.slice(start..self.pos))
    }

    pub fn read_rest(&mut self) -> Bytes {
        let rest = self.data.slice(self.pos..);
        self.pos = self.data.len();
        rest
    }

    pub fn read<T: FixedNumber>(&mut self) -> Result<T> {
        let endian = self.endian;
        let buf = self.take(T::WIDTH)?;
        Ok(T::decode(buf, endian))
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.read()
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.read()
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.read()
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.read()
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.read()
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        self.read()
    }

    /// Reads an integer of arbitrary byte width.
    ///
    /// The bytes are put in most-significant-first order (reversed when the
    /// cursor is little-endian) and accumulated by shift-or. Signed values use
    /// two's complement with the sign bit at `1 << (bits - 1)`.
    pub fn read_int_n(&mut self, byte_count: usize, signed: bool) -> Result<BigInt> {
        let mut ordered = self.take(byte_count)?.to_vec();
        if self.endian == Endian::Little {
            ordered.reverse();
        }

        let mut value = BigUint::zero();
        for &b in &ordered {
            value = (value << 8usize) | BigUint::from(b);
        }
        let mut value = BigInt::from(value);

        let negative = ordered.first().is_some_and(|&msb| msb & 0x80 != 0);
        if signed && negative {
            value -= BigInt::one() << (byte_count * 8);
        }
        Ok(value)
    }

    pub fn read_text(&mut self, len: usize, encoding: TextEncoding) -> Result<String> {
        let raw = self.take(len)?;
        Ok(encoding.decode(raw))
    }

    /// Reads up to a 0x00 terminator, which is consumed but not returned.
    ///
    /// A raw zero byte never occurs inside a UTF-8 sequence, so a byte scan is
    /// enough for both encodings.
    pub fn read_null_terminated_text(&mut self, encoding: TextEncoding) -> Result<String> {
        let raw = self.read_until(0x00)?;
        Ok(encoding.decode(&raw))
    }

    /// Reads an ascii line terminated by `\n`; the newline is consumed.
    pub fn read_line(&mut self) -> Result<String> {
        let raw = self.read_until(b'\n')?;
        Ok(TextEncoding::Ascii.decode(&raw))
    }

    fn read_until(&mut self, terminator: u8) -> Result<Bytes> {
        let start = self.pos;
        let len = self.data[start..]
            .iter()
            .position(|&b| b == terminator)
            .ok_or_else(|| self.underrun_at(start, self.remaining() + 1))?;
        let raw = self.read_bytes(len)?;
        self.pos += 1;
        Ok(raw)
    }

    pub fn read_seq<T>(
        &mut self,
        count: usize,
        mut read: impl FnMut(&mut Self) -> Result<T>,
    ) -> Result<Vec<T>> {
        let mut items = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            items.push(read(self)?);
        }
        Ok(items)
    }

    /// Reads items until `keep_going` rejects the item just read.
    ///
    /// The rejected item is still part of the result.
    pub fn read_seq_while<T>(
        &mut self,
        mut read: impl FnMut(&mut Self) -> Result<T>,
        mut keep_going: impl FnMut(&T, usize) -> bool,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        loop {
            let item = read(self)?;
            let go_on = keep_going(&item, items.len());
            items.push(item);
            if !go_on {
                return Ok(items);
            }
        }
    }

    pub fn read_seq_until_end<T>(
        &mut self,
        mut read: impl FnMut(&mut Self) -> Result<T>,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        while !self.is_eof() {
            items.push(read(self)?);
        }
        Ok(items)
    }

    /// Runs `read` at `position + delta` and restores the pointer afterwards,
    /// whether or not the read succeeded.
    pub fn peek<T>(
        &mut self,
        delta: isize,
        read: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let saved = self.pos;
        let target = saved
            .checked_add_signed(delta)
            .ok_or_else(|| self.underrun_at(saved, 0))?;
        self.seek(target)?;
        let result = read(self);
        self.pos = saved;
        result
    }

    /// Consumes `magic.len()` bytes and fails with [`Error::FormatMismatch`] unless they equal `magic`.
    pub fn expect_magic(&mut self, magic: &[u8]) -> Result<()> {
        let offset = self.pos;
        let actual = self.take(magic.len())?;
        if actual != magic {
            return Err(Error::mismatch(offset, magic, actual));
        }
        Ok(())
    }

    pub fn expect_number<T>(&mut self, expected: T) -> Result<()>
    where
        T: FixedNumber + PartialEq + std::fmt::UpperHex,
    {
        let offset = self.pos;
        let actual: T = self.read()?;
        if actual != expected {
            let width = T::WIDTH * 2;
            return Err(Error::FormatMismatch {
                offset,
                expected: format!("{:0width$X}", expected),
                actual: format!("{:0width$X}", actual),
            });
        }
        Ok(())
    }

    /// Non-consuming check for `magic` at the current position.
    pub fn matches_magic(&self, magic: &[u8]) -> bool {
        self.data[self.pos..].starts_with(magic)
    }
}
