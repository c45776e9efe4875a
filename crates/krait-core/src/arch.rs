//! Architecture back-end abstraction.

use thiserror::Error;

use crate::{Address, BinaryStream, Cell, CoreError, Document, Instruction, MultiCell};

/// Identifies an architecture back-end.
///
/// Tags are four-character codes chosen by the back-end. [`Tag::UNKNOWN`]
/// stands in for "whatever the default architecture is".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tag(pub [u8; 4]);

impl Tag {
    /// The unknown tag.
    pub const UNKNOWN: Tag = Tag([0; 4]);

    /// Creates a tag from a four-character code.
    pub const fn new(code: [u8; 4]) -> Self {
        Self(code)
    }

    /// Returns true if this is the unknown tag.
    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_unknown() {
            return write!(f, "<unknown>");
        }
        for &b in &self.0 {
            if b != 0 {
                write!(f, "{}", b as char)?;
            }
        }
        Ok(())
    }
}

/// Failure to decode a single instruction.
#[derive(Error, Debug)]
#[error("cannot decode instruction at physical offset {offset:#x}: {reason}")]
pub struct DecodeError {
    /// Physical offset of the first undecodable byte.
    pub offset: u64,
    /// Back-end specific reason.
    pub reason: String,
}

impl DecodeError {
    /// Creates a decode error.
    pub fn new(offset: u64, reason: impl Into<String>) -> Self {
        Self {
            offset,
            reason: reason.into(),
        }
    }
}

/// Category of a formatted text span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MarkKind {
    Mnemonic,
    Register,
    Immediate,
    Operand,
    Label,
    Keyword,
    Character,
    Comment,
}

/// A categorized span within a formatted line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Mark {
    /// Span category.
    pub kind: MarkKind,
    /// Byte offset of the span within the line.
    pub offset: u16,
    /// Span length in bytes.
    pub len: u16,
}

/// A printable line plus its ordered list of [`Mark`] spans.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FormattedLine {
    /// The rendered text.
    pub text: String,
    /// Categorized spans, in text order.
    pub marks: Vec<Mark>,
}

impl FormattedLine {
    /// Creates an empty line.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends uncategorized text.
    pub fn push_raw(&mut self, s: &str) {
        self.text.push_str(s);
    }

    /// Appends text and records a mark covering it.
    pub fn push(&mut self, kind: MarkKind, s: &str) {
        self.marks.push(Mark {
            kind,
            offset: self.text.len() as u16,
            len: s.len() as u16,
        });
        self.text.push_str(s);
    }
}

/// An architecture back-end able to decode and render one instruction.
///
/// Back-ends are registered with the analyzer, which assigns each a short
/// numeric id via [`Architecture::update_id`]; the id ends up embedded in
/// decoded cells so they can be routed back for formatting.
pub trait Architecture: Send + Sync {
    /// The back-end's tag.
    fn tag(&self) -> Tag;

    /// Human-readable name.
    fn name(&self) -> &'static str;

    /// Records the id assigned at registration time.
    fn update_id(&self, id: u8);

    /// Decodes one instruction at a physical offset in `stream`; `addr` is
    /// the virtual address of the first byte, for resolving pc-relative
    /// targets.
    fn decode(
        &self,
        stream: &BinaryStream,
        offset: u64,
        addr: Address,
    ) -> Result<Instruction, DecodeError>;

    /// Returns true if decoding is only meaningful up to an explicit
    /// control-flow terminator (no straight runs off the end of an area).
    fn basic_block_only(&self) -> bool {
        false
    }

    /// Renders a cell as a printable line.
    fn format_cell(
        &self,
        doc: &Document,
        addr: Address,
        cell: &Cell,
    ) -> Result<FormattedLine, CoreError>;

    /// Renders a multi-cell as a printable line.
    fn format_multi_cell(
        &self,
        doc: &Document,
        addr: Address,
        multi_cell: &MultiCell,
    ) -> Result<FormattedLine, CoreError>;
}
