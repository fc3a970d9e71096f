/* Copyright (C) 2017 by Jacob Alexander
 *
 * This file is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This file is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this file.  If not, see <http://www.gnu.org/licenses/>.
 */

//! A positional, checked cursor over a byte buffer.
//!
//! Every packed struct decoded from device reports is read as a raw
//! little-endian byte image via [`ByteReader::read`]. All operations fail
//! with [`crate::error::Error::MalformedFrame`] if fewer bytes remain than
//! requested -- there is no panicking path through this type.

use crate::error::{truncated, Result};

/// Types that can be reconstructed from a fixed-size little-endian byte image.
///
/// Implemented for the packed wire structs in [`crate::protocol`]. Never
/// implement this for a type with padding or a non-`repr(C, packed)` layout:
/// the blanket impls below assume `size_of::<Self>()` bytes is exactly the
/// wire representation.
pub trait FromLeBytes: Sized {
    const SIZE: usize;
    fn from_le_bytes(bytes: &[u8]) -> Self;
}

pub struct ByteReader<'a> {
    data: &'a [u8],
    index: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        ByteReader { data, index: 0 }
    }

    /// How many bytes are left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.index
    }

    /// Moves the current position forward, failing if not enough bytes remain.
    pub fn skip(&mut self, size: usize) -> Result<()> {
        if size > self.remaining() {
            return Err(truncated("skip"));
        }
        self.index += size;
        Ok(())
    }

    /// Takes a chunk of bytes from the current position without copying.
    fn take(&mut self, size: usize) -> Result<&'a [u8]> {
        if size > self.remaining() {
            return Err(truncated("bytes"));
        }
        let chunk = &self.data[self.index..self.index + size];
        self.index += size;
        Ok(chunk)
    }

    /// Takes a chunk of bytes from the current position and returns a fresh
    /// reader over just that chunk, advancing past it.
    pub fn sub(&mut self, size: usize) -> Result<ByteReader<'a>> {
        Ok(ByteReader::new(self.take(size)?))
    }

    /// Reads a raw little-endian byte image of `T` and advances.
    pub fn read<T: FromLeBytes>(&mut self) -> Result<T> {
        let bytes = self.take(T::SIZE)?;
        Ok(T::from_le_bytes(bytes))
    }

    /// Remaining bytes, without consuming them.
    pub fn peek_remaining(&self) -> &'a [u8] {
        &self.data[self.index..]
    }
}

macro_rules! impl_from_le_bytes_int {
    ($($t:ty),*) => {
        $(
            impl FromLeBytes for $t {
                const SIZE: usize = std::mem::size_of::<$t>();
                fn from_le_bytes(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$t>()];
                    buf.copy_from_slice(bytes);
                    <$t>::from_le_bytes(buf)
                }
            }
        )*
    };
}

impl_from_le_bytes_int!(u8, u16, u32, u64, i8, i16, i32, i64);

macro_rules! impl_from_le_bytes_float {
    ($($t:ty),*) => {
        $(
            impl FromLeBytes for $t {
                const SIZE: usize = std::mem::size_of::<$t>();
                fn from_le_bytes(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$t>()];
                    buf.copy_from_slice(bytes);
                    <$t>::from_le_bytes(buf)
                }
            }
        )*
    };
}

impl_from_le_bytes_float!(f32, f64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_scalars_and_advances() {
        let data = [0x01, 0x00, 0x02, 0x00, 0x00, 0x00];
        let mut r = ByteReader::new(&data);
        assert_eq!(r.read::<u16>().unwrap(), 1);
        assert_eq!(r.read::<u32>().unwrap(), 2);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn truncated_read_fails() {
        let data = [0x01];
        let mut r = ByteReader::new(&data);
        assert!(r.read::<u16>().is_err());
    }

    #[test]
    fn skip_and_sub() {
        let data = [1, 2, 3, 4, 5];
        let mut r = ByteReader::new(&data);
        r.skip(2).unwrap();
        let mut sub = r.sub(2).unwrap();
        assert_eq!(sub.read::<u8>().unwrap(), 3);
        assert_eq!(sub.read::<u8>().unwrap(), 4);
        assert_eq!(r.remaining(), 1);
    }

    #[test]
    fn sub_too_large_fails() {
        let data = [1, 2, 3];
        let mut r = ByteReader::new(&data);
        assert!(r.sub(10).is_err());
    }
}
