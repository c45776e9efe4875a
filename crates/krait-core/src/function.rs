//! Multi-cells: aggregates keyed by a starting address.

use crate::ControlFlowGraph;

/// A delimited function.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Function {
    byte_length: u16,
    insn_count: u16,
    cfg: ControlFlowGraph,
}

impl Function {
    /// Creates a function aggregate.
    pub fn new(byte_length: u16, insn_count: u16, cfg: ControlFlowGraph) -> Self {
        Self {
            byte_length,
            insn_count,
            cfg,
        }
    }

    /// Length of the function body in bytes.
    pub fn byte_length(&self) -> u16 {
        self.byte_length
    }

    /// Number of instructions in the body.
    pub fn insn_count(&self) -> u16 {
        self.insn_count
    }

    /// The function's control flow graph.
    pub fn cfg(&self) -> &ControlFlowGraph {
        &self.cfg
    }
}

/// An aggregate stored at a starting address.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MultiCell {
    /// A delimited function.
    Function(Function),
}

impl MultiCell {
    /// Number of consecutive addresses covered.
    pub fn len(&self) -> u64 {
        match self {
            Self::Function(f) => u64::from(f.byte_length()),
        }
    }

    /// Multi-cells always cover at least their starting address.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The function aggregate, if this is one.
    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Self::Function(f) => Some(f),
        }
    }
}
