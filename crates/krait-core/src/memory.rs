//! Memory areas and their backing byte streams.

use bitflags::bitflags;

use crate::{Address, CoreError};

bitflags! {
    /// Access bits of a memory area.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Access: u8 {
        /// Area is readable.
        const READ = 0x1;
        /// Area is writable.
        const WRITE = 0x2;
        /// Area contains executable code.
        const EXEC = 0x4;
    }
}

/// A bounds-checked reader over the bytes backing a memory area.
#[derive(Debug, Clone)]
pub struct BinaryStream {
    bytes: Vec<u8>,
}

impl BinaryStream {
    /// Wraps a byte buffer.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Length of the stream in bytes.
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Returns true if the stream is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The raw bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Reads one byte at a physical offset.
    pub fn read_u8(&self, offset: u64) -> Result<u8, CoreError> {
        self.bytes
            .get(usize::try_from(offset).map_err(|_| self.out_of_bounds(offset))?)
            .copied()
            .ok_or_else(|| self.out_of_bounds(offset))
    }

    /// Reads a little-endian 16-bit value at a physical offset.
    pub fn read_u16_le(&self, offset: u64) -> Result<u16, CoreError> {
        let lo = self.read_u8(offset)?;
        let hi = self.read_u8(offset + 1)?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    fn out_of_bounds(&self, offset: u64) -> CoreError {
        CoreError::OutOfBounds {
            offset,
            len: self.len(),
        }
    }
}

/// A contiguous virtual range backed by a [`BinaryStream`].
#[derive(Debug)]
pub struct MemoryArea {
    name: String,
    virtual_base: Address,
    access: Access,
    stream: BinaryStream,
}

impl MemoryArea {
    /// Creates a memory area mapping `stream` at `virtual_base`.
    pub fn new(
        name: impl Into<String>,
        virtual_base: Address,
        access: Access,
        stream: BinaryStream,
    ) -> Self {
        Self {
            name: name.into(),
            virtual_base,
            access,
            stream,
        }
    }

    /// Area name (section name from the loader, typically).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// First mapped address.
    pub fn virtual_base(&self) -> Address {
        self.virtual_base
    }

    /// Size of the mapped range in bytes.
    pub fn size(&self) -> u64 {
        self.stream.len()
    }

    /// One past the last mapped offset.
    pub fn end_offset(&self) -> u64 {
        self.virtual_base.offset + self.size()
    }

    /// Access bits.
    pub fn access(&self) -> Access {
        self.access
    }

    /// Returns true if the area may hold code.
    pub fn is_executable(&self) -> bool {
        self.access.contains(Access::EXEC)
    }

    /// The backing stream.
    pub fn stream(&self) -> &BinaryStream {
        &self.stream
    }

    /// Returns true if `addr` falls inside this area.
    pub fn contains(&self, addr: Address) -> bool {
        addr.kind == self.virtual_base.kind
            && addr.base == self.virtual_base.base
            && addr.offset >= self.virtual_base.offset
            && addr.offset < self.end_offset()
    }

    /// Maps a virtual offset to the physical offset in the backing stream.
    pub fn translate(&self, virtual_offset: u64) -> Result<u64, CoreError> {
        if virtual_offset < self.virtual_base.offset || virtual_offset >= self.end_offset() {
            return Err(CoreError::NotMapped(Address {
                offset: virtual_offset,
                ..self.virtual_base
            }));
        }
        Ok(virtual_offset - self.virtual_base.offset)
    }
}
