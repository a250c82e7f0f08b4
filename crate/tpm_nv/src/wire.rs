//! Big-endian wire primitives.
//!
//! Every multi-byte field of the TPM 2.0 wire format is big-endian and
//! structures are byte-packed. Commands are written field by field at
//! computed offsets into a buffer allocated once at its final size.

use scroll::{Pread, Pwrite, BE};

use crate::error::Error;

#[must_use]
pub const fn to_wire16(value: u16) -> [u8; 2] {
    value.to_be_bytes()
}

#[must_use]
pub const fn to_wire32(value: u32) -> [u8; 4] {
    value.to_be_bytes()
}

#[must_use]
pub const fn from_wire16(bytes: [u8; 2]) -> u16 {
    u16::from_be_bytes(bytes)
}

#[must_use]
pub const fn from_wire32(bytes: [u8; 4]) -> u32 {
    u32::from_be_bytes(bytes)
}

/// Fixed-capacity command writer.
///
/// The buffer is allocated once with the size computed by the layout sizer
/// and never grows: a write past the end is an error, and [`Writer::finish`]
/// rejects a buffer that was not filled exactly.
pub struct Writer {
    bytes: Vec<u8>,
    offset: usize,
}

impl Writer {
    #[must_use]
    pub fn with_size(size: usize) -> Self {
        Writer {
            bytes: vec![0u8; size],
            offset: 0,
        }
    }

    pub fn u8(&mut self, value: u8) -> Result<(), Error> {
        self.bytes.gwrite_with(value, &mut self.offset, BE)?;
        Ok(())
    }

    pub fn u16(&mut self, value: u16) -> Result<(), Error> {
        self.bytes.gwrite_with(value, &mut self.offset, BE)?;
        Ok(())
    }

    pub fn u32(&mut self, value: u32) -> Result<(), Error> {
        self.bytes.gwrite_with(value, &mut self.offset, BE)?;
        Ok(())
    }

    pub fn bytes(&mut self, data: &[u8]) -> Result<(), Error> {
        self.bytes.gwrite_with(data, &mut self.offset, ())?;
        Ok(())
    }

    /// Overwrite a 32-bit field already reserved at `at`.
    pub fn patch_u32(&mut self, at: usize, value: u32) -> Result<(), Error> {
        if at + 4 > self.offset {
            return Err(Error::LayoutError(format!(
                "cannot patch unwritten field at offset {at}"
            )));
        }
        self.bytes.pwrite_with(value, at, BE)?;
        Ok(())
    }

    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub fn finish(self) -> Result<Vec<u8>, Error> {
        if self.offset != self.bytes.len() {
            return Err(Error::LayoutError(format!(
                "{} bytes written into a {}-byte buffer",
                self.offset,
                self.bytes.len()
            )));
        }

        Ok(self.bytes)
    }
}

/// Bounds-checked big-endian reader over a received reply.
pub struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, offset: 0 }
    }

    #[must_use]
    pub fn at(bytes: &'a [u8], offset: usize) -> Self {
        Reader { bytes, offset }
    }

    pub fn u8(&mut self) -> Result<u8, Error> {
        let bytes = self.bytes;
        Ok(bytes.gread_with(&mut self.offset, BE)?)
    }

    pub fn u16(&mut self) -> Result<u16, Error> {
        let bytes = self.bytes;
        Ok(bytes.gread_with(&mut self.offset, BE)?)
    }

    pub fn u32(&mut self) -> Result<u32, Error> {
        let bytes = self.bytes;
        Ok(bytes.gread_with(&mut self.offset, BE)?)
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], Error> {
        let bytes = self.bytes;
        Ok(bytes.gread_with::<&'a [u8]>(&mut self.offset, len)?)
    }

    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.offset)
    }
}
