use std::mem::size_of;

use byteorder::{ByteOrder, LittleEndian};
use glam::Vec3;
use zerocopy::{FromBytes, LayoutVerified, Unaligned};

use crate::{Error, Result};

pub fn null_terminated_prefix(bytes: &[u8]) -> &[u8] {
    bytes.splitn(2, |&b| b == 0).next().unwrap_or(bytes)
}

/// Little-endian reader over a borrowed byte buffer.
///
/// Every read advances the position by the width of the value and fails with
/// [`Error::OutOfBounds`] instead of reading past the end. Seeking past the end
/// is allowed; the next read fails.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Cursor<'a> {
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }

    pub fn skip(&mut self, count: usize) {
        self.position = self.position.saturating_add(count);
    }

    /// # Errors
    ///
    /// Returns `Err` if fewer than `len` bytes remain.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let out_of_bounds = Error::OutOfBounds {
            offset: self.position,
            len,
            size: self.bytes.len(),
        };

        let end = self.position.checked_add(len).ok_or(out_of_bounds.clone())?;
        let bytes = self.bytes.get(self.position..end).ok_or(out_of_bounds)?;

        self.position = end;
        Ok(bytes)
    }

    /// # Errors
    ///
    /// Returns `Err` if the read goes out of bounds.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    /// # Errors
    ///
    /// Returns `Err` if the read goes out of bounds.
    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(i8::from_le_bytes([self.read_u8()?]))
    }

    /// # Errors
    ///
    /// Returns `Err` if the read goes out of bounds.
    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.read_bytes(2)?))
    }

    /// # Errors
    ///
    /// Returns `Err` if the read goes out of bounds.
    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(LittleEndian::read_i16(self.read_bytes(2)?))
    }

    /// # Errors
    ///
    /// Returns `Err` if the read goes out of bounds.
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.read_bytes(4)?))
    }

    /// # Errors
    ///
    /// Returns `Err` if the read goes out of bounds.
    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.read_bytes(4)?))
    }

    /// # Errors
    ///
    /// Returns `Err` if the read goes out of bounds.
    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(LittleEndian::read_f32(self.read_bytes(4)?))
    }

    /// # Errors
    ///
    /// Returns `Err` if the read goes out of bounds.
    pub fn read_vec3(&mut self) -> Result<Vec3> {
        let mut values = [0.0; 3];
        LittleEndian::read_f32_into(self.read_bytes(12)?, &mut values);
        Ok(Vec3::from(values))
    }

    /// Reads a `len` byte string field, stopping at the first nul.
    /// The cursor always advances by `len`.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the read goes out of bounds.
    pub fn read_fixed_string(&mut self, len: usize) -> Result<String> {
        let bytes = self.read_bytes(len)?;
        Ok(String::from_utf8_lossy(null_terminated_prefix(bytes)).into_owned())
    }

    /// Reads one fixed-layout record.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the read goes out of bounds.
    pub fn read_record<T: FromBytes + Unaligned>(&mut self) -> Result<&'a T> {
        let bytes = self.read_bytes(size_of::<T>())?;
        Ok(LayoutVerified::<_, T>::new_unaligned(bytes)
            .ok_or(Error::Corrupted {
                error: "record layout mismatch",
            })?
            .into_ref())
    }

    /// Reads `count` consecutive fixed-layout records.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the read goes out of bounds.
    pub fn read_records<T: FromBytes + Unaligned>(&mut self, count: usize) -> Result<&'a [T]> {
        if count == 0 {
            return Ok(&[]);
        }

        let len = size_of::<T>().checked_mul(count).ok_or(Error::OutOfBounds {
            offset: self.position,
            len: usize::MAX,
            size: self.bytes.len(),
        })?;
        let bytes = self.read_bytes(len)?;

        Ok(LayoutVerified::<_, [T]>::new_slice_unaligned(bytes)
            .ok_or(Error::Corrupted {
                error: "record layout mismatch",
            })?
            .into_slice())
    }
}
