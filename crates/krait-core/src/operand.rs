//! Instruction operand types.

use crate::Address;

/// An instruction operand.
///
/// Branch and data targets that are statically known carry a resolved
/// [`Address`]; the analyzer never re-derives targets from encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Operand {
    /// Register operand.
    Register {
        /// Back-end specific register id.
        id: u16,
    },
    /// Immediate value.
    Immediate {
        value: i64,
        /// Width of the encoded immediate in bytes.
        width: u16,
    },
    /// A statically resolved target (branch destination or absolute data
    /// reference).
    Direct {
        /// The effective target.
        target: Address,
        /// Width in bytes of the datum at the target.
        width: u16,
        /// Offset of the operand encoding within the instruction, when the
        /// back-end tracks it.
        offset: Option<u8>,
    },
    /// A memory-indirect reference (`[target]`). The slot address may be
    /// statically known even though the value fetched through it is not.
    Indirect {
        /// Address of the pointer slot, if statically known.
        target: Option<Address>,
        /// Width in bytes of the slot.
        width: u16,
        /// Offset of the operand encoding within the instruction.
        offset: Option<u8>,
    },
}

impl Operand {
    /// The effective target this operand refers to, if statically known.
    pub fn reference(&self) -> Option<Address> {
        match self {
            Self::Direct { target, .. } => Some(*target),
            Self::Indirect { target, .. } => *target,
            _ => None,
        }
    }

    /// Width in bytes of the datum at [`Operand::reference`].
    pub fn reference_length(&self) -> u16 {
        match self {
            Self::Direct { width, .. } | Self::Indirect { width, .. } => *width,
            _ => 0,
        }
    }

    /// Address of the operand's own encoding, relative to the instruction.
    pub fn location(&self, insn_addr: Address) -> Option<Address> {
        match self {
            Self::Direct {
                offset: Some(o), ..
            }
            | Self::Indirect {
                offset: Some(o), ..
            } => Some(insn_addr + u64::from(*o)),
            _ => None,
        }
    }

    /// Returns true if this operand goes through memory.
    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Indirect { .. })
    }
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Register { id } => write!(f, "r{}", id),
            Self::Immediate { value, .. } => {
                if *value < 0 {
                    write!(f, "-{:#x}", -value)
                } else {
                    write!(f, "{:#x}", value)
                }
            }
            Self::Direct { target, .. } => write!(f, "{}", target),
            Self::Indirect {
                target: Some(t), ..
            } => write!(f, "[{}]", t),
            Self::Indirect { target: None, .. } => write!(f, "[?]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference() {
        let target = Address::flat(0x2000);
        let direct = Operand::Direct {
            target,
            width: 1,
            offset: None,
        };
        assert_eq!(direct.reference(), Some(target));
        assert!(!direct.is_memory());

        let reg = Operand::Register { id: 3 };
        assert_eq!(reg.reference(), None);
    }

    #[test]
    fn test_indirect_is_memory() {
        let op = Operand::Indirect {
            target: Some(Address::flat(0x3000)),
            width: 2,
            offset: None,
        };
        assert!(op.is_memory());
        assert_eq!(op.reference(), Some(Address::flat(0x3000)));
        assert_eq!(op.reference_length(), 2);
    }

    #[test]
    fn test_location() {
        let insn = Address::flat(0x1000);
        let op = Operand::Direct {
            target: Address::flat(0x2000),
            width: 1,
            offset: Some(1),
        };
        assert_eq!(op.location(insn), Some(Address::flat(0x1001)));

        let untracked = Operand::Direct {
            target: Address::flat(0x2000),
            width: 1,
            offset: None,
        };
        assert_eq!(untracked.location(insn), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Operand::Register { id: 2 }.to_string(), "r2");
        assert_eq!(
            Operand::Immediate {
                value: -4,
                width: 1
            }
            .to_string(),
            "-0x4"
        );
        assert_eq!(
            Operand::Indirect {
                target: None,
                width: 2,
                offset: None
            }
            .to_string(),
            "[?]"
        );
    }
}
