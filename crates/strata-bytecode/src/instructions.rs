use core::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::{Literal, Opcode, Version};

/// An instruction address: the zero-based index of an instruction in a
/// linear program, which is also its output line.
pub type Address = usize;

/// A physical scratch slot.
pub type Slot = u16;

/// The machine instruction types
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum Op {
    // header
    /// Declare the target version
    Pragma(Version),
    /// Declare the constant pool
    ConstBlock(Vec<Literal>),
    // data
    /// Push a literal onto the stack
    Push(Literal),
    /// Push a constant from the pool by index
    Const(usize),
    /// Pop the top of the stack into a scratch slot
    Store(Slot),
    /// Push the contents of a scratch slot
    Load(Slot),
    /// A plain stack operation
    Basic(Opcode),
    // control flow
    /// Jump if the top of the stack is non-zero
    Branch(Address),
    /// Jump if the top of the stack is zero
    BranchZero(Address),
    /// Jump unconditionally
    Jump(Address),
    /// Call the subroutine at the address
    Call(Address),
    /// Return from a subroutine
    Retsub,
    /// End the program with the top of the stack as its result
    Return,
}

impl Op {
    /// Returns the branch target of a control-flow instruction.
    pub fn target(&self) -> Option<Address> {
        match self {
            Self::Branch(a) | Self::BranchZero(a) | Self::Jump(a) | Self::Call(a) => Some(*a),
            _ => None,
        }
    }
}

impl Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pragma(v) => write!(f, "#pragma version {v}"),
            Self::ConstBlock(lits) => {
                f.write_str("constants")?;
                for lit in lits {
                    write!(f, " {lit}")?;
                }
                Ok(())
            }
            Self::Push(lit @ Literal::Int(_)) => write!(f, "pushint {lit}"),
            Self::Push(lit @ Literal::Bytes(_)) => write!(f, "pushbytes {lit}"),
            Self::Const(i) => write!(f, "const {i}"),
            Self::Store(s) => write!(f, "store {s}"),
            Self::Load(s) => write!(f, "load {s}"),
            Self::Basic(op) => write!(f, "{op}"),
            Self::Branch(a) => write!(f, "bnz @{a}"),
            Self::BranchZero(a) => write!(f, "bz @{a}"),
            Self::Jump(a) => write!(f, "b @{a}"),
            Self::Call(a) => write!(f, "callsub @{a}"),
            Self::Retsub => f.write_str("retsub"),
            Self::Return => f.write_str("return"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let cases = [
            (Op::Pragma(Version::V4), "#pragma version 4"),
            (
                Op::ConstBlock(vec![Literal::Int(5), Literal::Bytes(b"a".to_vec())]),
                "constants 5 0x61",
            ),
            (Op::Push(Literal::Int(1)), "pushint 1"),
            (Op::Push(Literal::Bytes(vec![0xff])), "pushbytes 0xff"),
            (Op::Const(0), "const 0"),
            (Op::Store(3), "store 3"),
            (Op::Basic(Opcode::Add), "+"),
            (Op::Basic(Opcode::Txn("Sender".into())), "txn Sender"),
            (Op::Branch(7), "bnz @7"),
            (Op::Call(12), "callsub @12"),
        ];
        for (op, want) in cases {
            assert_eq!(op.to_string(), want);
        }
    }
}
