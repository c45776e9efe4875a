//! Error types for krait-core.

use thiserror::Error;

use crate::Address;

/// Core error type.
#[derive(Error, Debug)]
pub enum CoreError {
    /// No memory area maps the address.
    #[error("address {0} is not mapped")]
    NotMapped(Address),

    /// A stream read ran past the end of the backing bytes.
    #[error("read at physical offset {offset:#x} is out of bounds (stream length {len:#x})")]
    OutOfBounds { offset: u64, len: u64 },

    /// A cell insertion or resize collided with an existing cell.
    #[error("a cell already occupies {0}")]
    CellOccupied(Address),

    /// A cell would spill past the end of its memory area.
    #[error("cell at {0} does not fit its memory area")]
    AreaOverflow(Address),

    /// A label name is already bound to another address.
    #[error("label name {0:?} is already in use")]
    DuplicateLabel(String),
}
