//! Byte cursor and LSB-first bit reader.
//!
//! [`ByteCursor`] handles the byte-aligned header fields of every format.
//! [`BitReader`] handles the sub-byte CSI payloads of the Intel 5300 and
//! Atheros/QCA9300 tools, which pack signed samples across byte boundaries.
//!
//! # Bit layout
//!
//! ```text
//! word 0 (LE u16)          word 1 (LE u16)
//! b0 b1 ... b15            b0 b1 ... b15
//! |-- v0 --|-- v1 --|-- v2 ...
//! ```
//!
//! Words are loaded on demand into a carry register above the bits that are
//! still unread, so a sample may straddle two words. The register is never
//! realigned to a byte boundary between samples.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};

use crate::error::{CsiError, CsiResult};

/// Byte order of multi-byte fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    /// Least significant byte first.
    #[default]
    Little,
    /// Most significant byte first.
    Big,
}

impl std::str::FromStr for Endian {
    type Err = CsiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "little" | "le" => Ok(Self::Little),
            "big" | "be" => Ok(Self::Big),
            other => Err(CsiError::invalid_config(
                "endian",
                format!("expected `little` or `big`, got `{other}`"),
            )),
        }
    }
}

/// Stateful byte-aligned reader over a borrowed slice.
///
/// `base` is the absolute offset of the slice within the capture, so that
/// errors report positions a caller can seek to.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    inner: Cursor<&'a [u8]>,
    base: usize,
}

impl<'a> ByteCursor<'a> {
    /// Create a cursor at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_base(data, 0)
    }

    /// Create a cursor whose first byte sits at absolute offset `base`.
    pub fn with_base(data: &'a [u8], base: usize) -> Self {
        Self {
            inner: Cursor::new(data),
            base,
        }
    }

    /// Current position relative to the start of the slice.
    pub fn position(&self) -> usize {
        self.inner.position() as usize
    }

    /// Current position within the whole capture.
    pub fn absolute_position(&self) -> usize {
        self.base + self.position()
    }

    /// Length of the underlying slice.
    pub fn len(&self) -> usize {
        self.inner.get_ref().len()
    }

    /// Whether the underlying slice is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.len().saturating_sub(self.position())
    }

    /// Move to `pos` (relative to the slice start).
    pub fn seek_to(&mut self, pos: usize) -> CsiResult<()> {
        if pos > self.len() {
            return Err(CsiError::truncated(
                self.base + pos,
                pos - self.len(),
                0,
            ));
        }
        self.inner.set_position(pos as u64);
        Ok(())
    }

    /// Advance by `n` bytes.
    pub fn skip(&mut self, n: usize) -> CsiResult<()> {
        self.ensure(n)?;
        let pos = self.position() + n;
        self.inner.set_position(pos as u64);
        Ok(())
    }

    /// Borrow the next `n` bytes and advance past them.
    pub fn read_bytes(&mut self, n: usize) -> CsiResult<&'a [u8]> {
        self.ensure(n)?;
        let data: &'a [u8] = self.inner.get_ref();
        let start = self.position();
        self.inner.set_position((start + n) as u64);
        Ok(&data[start..start + n])
    }

    /// Borrow everything that has not been read yet.
    pub fn rest(&mut self) -> &'a [u8] {
        let data: &'a [u8] = self.inner.get_ref();
        let start = self.position().min(data.len());
        self.inner.set_position(data.len() as u64);
        &data[start..]
    }

    /// Read a fixed-size byte array (MAC addresses and the like).
    pub fn read_array<const N: usize>(&mut self) -> CsiResult<[u8; N]> {
        let mut out = [0u8; N];
        self.read_with(N, |c| c.read_exact(&mut out))?;
        Ok(out)
    }

    /// Read one unsigned byte.
    pub fn read_u8(&mut self) -> CsiResult<u8> {
        self.read_with(1, |c| c.read_u8())
    }

    /// Read one signed byte.
    pub fn read_i8(&mut self) -> CsiResult<i8> {
        self.read_with(1, |c| c.read_i8())
    }

    /// Read an unsigned 16-bit integer.
    pub fn read_u16(&mut self, endian: Endian) -> CsiResult<u16> {
        self.read_with(2, |c| match endian {
            Endian::Little => c.read_u16::<LittleEndian>(),
            Endian::Big => c.read_u16::<BigEndian>(),
        })
    }

    /// Read a signed 16-bit integer.
    pub fn read_i16(&mut self, endian: Endian) -> CsiResult<i16> {
        self.read_with(2, |c| match endian {
            Endian::Little => c.read_i16::<LittleEndian>(),
            Endian::Big => c.read_i16::<BigEndian>(),
        })
    }

    /// Read an unsigned 32-bit integer.
    pub fn read_u32(&mut self, endian: Endian) -> CsiResult<u32> {
        self.read_with(4, |c| match endian {
            Endian::Little => c.read_u32::<LittleEndian>(),
            Endian::Big => c.read_u32::<BigEndian>(),
        })
    }

    /// Read a signed 32-bit integer.
    pub fn read_i32(&mut self, endian: Endian) -> CsiResult<i32> {
        self.read_with(4, |c| match endian {
            Endian::Little => c.read_i32::<LittleEndian>(),
            Endian::Big => c.read_i32::<BigEndian>(),
        })
    }

    /// Read an unsigned 64-bit integer.
    pub fn read_u64(&mut self, endian: Endian) -> CsiResult<u64> {
        self.read_with(8, |c| match endian {
            Endian::Little => c.read_u64::<LittleEndian>(),
            Endian::Big => c.read_u64::<BigEndian>(),
        })
    }

    /// Read an IEEE-754 single.
    pub fn read_f32(&mut self, endian: Endian) -> CsiResult<f32> {
        self.read_with(4, |c| match endian {
            Endian::Little => c.read_f32::<LittleEndian>(),
            Endian::Big => c.read_f32::<BigEndian>(),
        })
    }

    /// Read an IEEE-754 double.
    pub fn read_f64(&mut self, endian: Endian) -> CsiResult<f64> {
        self.read_with(8, |c| match endian {
            Endian::Little => c.read_f64::<LittleEndian>(),
            Endian::Big => c.read_f64::<BigEndian>(),
        })
    }

    fn ensure(&self, needed: usize) -> CsiResult<()> {
        if self.remaining() < needed {
            return Err(self.short(needed));
        }
        Ok(())
    }

    fn short(&self, needed: usize) -> CsiError {
        CsiError::truncated(self.absolute_position(), needed, self.remaining())
    }

    fn read_with<T>(
        &mut self,
        size: usize,
        read: impl FnOnce(&mut Cursor<&'a [u8]>) -> std::io::Result<T>,
    ) -> CsiResult<T> {
        self.ensure(size)?;
        read(&mut self.inner).map_err(|_| self.short(size))
    }
}

/// Two's-complement sign extension of the low `width` bits of `value`.
#[inline]
pub fn sign_extend(value: u32, width: u32) -> i32 {
    let shift = 32 - width;
    ((value << shift) as i32) >> shift
}

/// LSB-first bit reader with a 16-bit word carry register.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    next: usize,
    carry: u64,
    bits: u32,
    base: usize,
}

impl<'a> BitReader<'a> {
    /// Create a reader at bit 0 of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_base(data, 0)
    }

    /// Create a reader whose first byte sits at absolute offset `base`.
    pub fn with_base(data: &'a [u8], base: usize) -> Self {
        Self {
            data,
            next: 0,
            carry: 0,
            bits: 0,
            base,
        }
    }

    /// Number of bits consumed so far.
    pub fn bits_consumed(&self) -> usize {
        self.next * 8 - self.bits as usize
    }

    /// Read `width` bits as an unsigned value.
    pub fn read_unsigned(&mut self, width: u32) -> CsiResult<u16> {
        check_width(width)?;
        self.fill(width)?;
        let value = (self.carry & ((1u64 << width) - 1)) as u16;
        self.carry >>= width;
        self.bits -= width;
        Ok(value)
    }

    /// Read `width` bits and sign-extend at `width`.
    pub fn read_signed(&mut self, width: u32) -> CsiResult<i16> {
        let raw = self.read_unsigned(width)?;
        Ok(sign_extend(u32::from(raw), width) as i16)
    }

    /// Discard `n` bits.
    pub fn skip_bits(&mut self, n: u32) -> CsiResult<()> {
        let mut left = n;
        while left > 0 {
            let step = left.min(16);
            self.read_unsigned(step)?;
            left -= step;
        }
        Ok(())
    }

    fn fill(&mut self, width: u32) -> CsiResult<()> {
        while self.bits < width {
            let left = self.data.len() - self.next;
            match left {
                0 => {
                    let missing = (width - self.bits + 7) / 8;
                    return Err(CsiError::truncated(
                        self.base + self.next,
                        missing as usize,
                        0,
                    ));
                }
                1 => {
                    self.carry |= u64::from(self.data[self.next]) << self.bits;
                    self.next += 1;
                    self.bits += 8;
                }
                _ => {
                    let word = u16::from_le_bytes([self.data[self.next], self.data[self.next + 1]]);
                    self.carry |= u64::from(word) << self.bits;
                    self.next += 2;
                    self.bits += 16;
                }
            }
        }
        Ok(())
    }
}

fn check_width(width: u32) -> CsiResult<()> {
    if !(1..=16).contains(&width) {
        return Err(CsiError::invalid_config(
            "bit width",
            format!("{width} is outside 1..=16"),
        ));
    }
    Ok(())
}

/// LSB-first bit packer, the inverse of [`BitReader`].
///
/// Used to build synthetic captures for tests and benchmarks.
#[derive(Debug, Default, Clone)]
pub struct BitWriter {
    bytes: Vec<u8>,
    acc: u64,
    bits: u32,
}

impl BitWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the low `width` bits of `value`.
    pub fn push(&mut self, value: i32, width: u32) {
        let mask = (1u64 << width) - 1;
        self.acc |= (value as u64 & mask) << self.bits;
        self.bits += width;
        while self.bits >= 8 {
            self.bytes.push(self.acc as u8);
            self.acc >>= 8;
            self.bits -= 8;
        }
    }

    /// Flush any partial byte (zero-padded) and return the packed bytes.
    pub fn finish(mut self) -> Vec<u8> {
        if self.bits > 0 {
            self.bytes.push(self.acc as u8);
        }
        self.bytes
    }
}
