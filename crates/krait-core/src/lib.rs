//! # krait-core
//!
//! Core abstractions for the krait binary analysis toolkit. This crate
//! defines the document model (memory areas, cells, labels, cross
//! references), architecture-agnostic instructions and operands, control
//! flow graphs, and the architecture back-end trait.

pub mod address;
pub mod arch;
pub mod cell;
pub mod cfg;
pub mod document;
pub mod error;
pub mod function;
pub mod instruction;
pub mod label;
pub mod memory;
pub mod operand;
pub mod xref;

pub use address::{Address, AddressKind};
pub use arch::{Architecture, DecodeError, FormattedLine, Mark, MarkKind, Tag};
pub use cell::{Cell, StringCell, StringKind, ValueCell};
pub use cfg::{BasicBlock, BasicBlockId, ControlFlowGraph, Edge, EdgeKind};
pub use document::Document;
pub use error::CoreError;
pub use function::{Function, MultiCell};
pub use instruction::{InsnKind, Instruction, OPERAND_NO};
pub use label::{Label, LabelKind};
pub use operand::Operand;
pub use memory::{Access, BinaryStream, MemoryArea};
pub use xref::XRefs;
