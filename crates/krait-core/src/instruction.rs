//! Architecture-agnostic instruction representation.

use crate::operand::Operand;
use crate::Tag;

/// Maximum number of operands an instruction can carry.
pub const OPERAND_NO: usize = 4;

/// Control-flow classification of an instruction.
///
/// The classification is closed: an instruction is exactly one of these,
/// and the conditional variants pair with their unconditional forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InsnKind {
    /// No control-flow effect.
    Plain,
    /// Conditional but not a branch (predicated move and friends).
    Cond,
    /// Unconditional jump.
    Jump,
    /// Conditional jump.
    JumpCond,
    /// Call.
    Call,
    /// Conditional call.
    CallCond,
    /// Return.
    Ret,
    /// Conditional return.
    RetCond,
}

impl InsnKind {
    /// Returns true for jumps, conditional or not.
    pub fn is_jump(&self) -> bool {
        matches!(self, Self::Jump | Self::JumpCond)
    }

    /// Returns true for calls, conditional or not.
    pub fn is_call(&self) -> bool {
        matches!(self, Self::Call | Self::CallCond)
    }

    /// Returns true for returns, conditional or not.
    pub fn is_ret(&self) -> bool {
        matches!(self, Self::Ret | Self::RetCond)
    }

    /// Returns true for predicated instructions.
    pub fn is_cond(&self) -> bool {
        matches!(
            self,
            Self::Cond | Self::JumpCond | Self::CallCond | Self::RetCond
        )
    }

    /// Returns true if execution always continues at the next instruction.
    pub fn is_sequential(&self) -> bool {
        matches!(self, Self::Plain | Self::Cond)
    }
}

/// A decoded instruction.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Instruction {
    /// Tag of the back-end that decoded this instruction.
    pub arch_tag: Tag,
    /// Encoded length in bytes.
    pub length: u16,
    /// Control-flow classification.
    pub kind: InsnKind,
    /// Mnemonic string (e.g. "jmp", "call").
    pub mnemonic: String,
    /// Operand slots; unused slots are `None`.
    pub operands: [Option<Operand>; OPERAND_NO],
}

impl Instruction {
    /// Creates an instruction with no operands.
    pub fn new(arch_tag: Tag, length: u16, kind: InsnKind, mnemonic: impl Into<String>) -> Self {
        Self {
            arch_tag,
            length,
            kind,
            mnemonic: mnemonic.into(),
            operands: [None; OPERAND_NO],
        }
    }

    /// Places an operand in the first free slot.
    pub fn with_operand(mut self, op: Operand) -> Self {
        if let Some(slot) = self.operands.iter_mut().find(|s| s.is_none()) {
            *slot = Some(op);
        }
        self
    }

    /// Returns the operand at `index`, if present.
    pub fn operand(&self, index: usize) -> Option<&Operand> {
        self.operands.get(index).and_then(|o| o.as_ref())
    }

    /// Iterates over the statically known targets of all operands.
    pub fn references(&self) -> impl Iterator<Item = crate::Address> + '_ {
        self.operands
            .iter()
            .flatten()
            .filter_map(|op| op.reference())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Address;

    #[test]
    fn test_kind_predicates() {
        assert!(InsnKind::Jump.is_jump());
        assert!(InsnKind::JumpCond.is_jump());
        assert!(InsnKind::JumpCond.is_cond());
        assert!(!InsnKind::Jump.is_cond());
        assert!(InsnKind::Ret.is_ret());
        assert!(InsnKind::CallCond.is_call());
        assert!(InsnKind::Plain.is_sequential());
        assert!(InsnKind::Cond.is_sequential());
        assert!(!InsnKind::JumpCond.is_sequential());
    }

    #[test]
    fn test_operand_slots() {
        let insn = Instruction::new(Tag::new(*b"test"), 3, InsnKind::Call, "call").with_operand(
            Operand::Direct {
                target: Address::flat(0x2000),
                width: 1,
                offset: None,
            },
        );

        assert!(insn.operand(0).is_some());
        assert!(insn.operand(1).is_none());
        assert!(insn.operand(OPERAND_NO).is_none());
        assert_eq!(
            insn.references().collect::<Vec<_>>(),
            vec![Address::flat(0x2000)]
        );
    }
}
