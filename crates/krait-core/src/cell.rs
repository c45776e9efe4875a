//! Cells: the decoded unit stored at an address.

use crate::{Instruction, Tag};

/// Encoding of a recognized string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StringKind {
    /// NUL-terminated 8-bit string.
    Ascii,
    /// NUL-terminated UTF-16LE string.
    Utf16,
}

/// Uninterpreted bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ValueCell {
    /// Width in bytes.
    pub width: u16,
}

/// A recognized string.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StringCell {
    /// Source encoding.
    pub kind: StringKind,
    /// Decoded text, re-encoded as UTF-8.
    pub text: String,
    /// Bytes occupied in memory, terminator included.
    pub byte_len: u16,
}

/// The unit stored at an address.
///
/// A cell occupies `len()` consecutive addresses; the document guarantees
/// no two cells overlap. Addresses without an explicit cell read as a
/// one-byte [`Cell::Value`].
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Cell {
    /// Uninterpreted bytes.
    Value(ValueCell),
    /// A decoded instruction.
    Code(Instruction),
    /// A recognized string.
    String(StringCell),
}

impl Cell {
    /// A single raw byte.
    pub fn byte() -> Self {
        Self::Value(ValueCell { width: 1 })
    }

    /// Number of consecutive addresses this cell occupies.
    pub fn len(&self) -> u64 {
        match self {
            Self::Value(v) => u64::from(v.width.max(1)),
            Self::Code(insn) => u64::from(insn.length),
            Self::String(s) => u64::from(s.byte_len),
        }
    }

    /// Cells always occupy at least one address.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns true for instruction cells.
    pub fn is_code(&self) -> bool {
        matches!(self, Self::Code(_))
    }

    /// Returns true for uninterpreted value cells.
    pub fn is_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    /// The decoded instruction, if this is a code cell.
    pub fn as_code(&self) -> Option<&Instruction> {
        match self {
            Self::Code(insn) => Some(insn),
            _ => None,
        }
    }

    /// Tag of the back-end that produced this cell; unknown for data.
    pub fn arch_tag(&self) -> Tag {
        match self {
            Self::Code(insn) => insn.arch_tag,
            _ => Tag::UNKNOWN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InsnKind;

    #[test]
    fn test_len() {
        assert_eq!(Cell::byte().len(), 1);
        assert_eq!(Cell::Value(ValueCell { width: 4 }).len(), 4);

        let insn = Instruction::new(Tag::new(*b"test"), 3, InsnKind::Plain, "nop");
        assert_eq!(Cell::Code(insn).len(), 3);

        let s = Cell::String(StringCell {
            kind: StringKind::Utf16,
            text: "Hi".into(),
            byte_len: 6,
        });
        assert_eq!(s.len(), 6);
    }

    #[test]
    fn test_zero_width_value_still_occupies_an_address() {
        assert_eq!(Cell::Value(ValueCell { width: 0 }).len(), 1);
    }

    #[test]
    fn test_arch_tag() {
        let tag = Tag::new(*b"test");
        let insn = Instruction::new(tag, 1, InsnKind::Plain, "nop");
        assert_eq!(Cell::Code(insn).arch_tag(), tag);
        assert_eq!(Cell::byte().arch_tag(), Tag::UNKNOWN);
    }
}
