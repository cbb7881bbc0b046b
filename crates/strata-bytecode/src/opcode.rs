use core::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// The stack effect of an [`Opcode`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Signature {
    /// Values consumed from the top of the stack
    pub pops: usize,
    /// Values pushed onto the stack
    pub pushes: usize,
}

impl Signature {
    const fn new(pops: usize, pushes: usize) -> Self {
        Self { pops, pushes }
    }
}

/// A plain stack operation with no control-flow or slot operand.
///
/// Field accessors carry the field name as an immediate; their meaning
/// belongs to the host and is not interpreted here.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    /// Add two integers
    Add,
    /// Subtract two integers
    Sub,
    /// Multiply two integers
    Mul,
    /// Divide two integers
    Div,
    /// Integer remainder
    Mod,
    /// Equality
    Eq,
    /// Inequality
    Ne,
    /// Less than
    Lt,
    /// Greater than
    Gt,
    /// Less than or equal
    Le,
    /// Greater than or equal
    Ge,
    /// Logical and of two integers, evaluated eagerly
    LogicalAnd,
    /// Logical or of two integers, evaluated eagerly
    LogicalOr,
    /// Logical negation
    Not,
    /// Length of a byte string
    Len,
    /// Concatenate two byte strings
    Concat,
    /// Integer to big-endian bytes
    Itob,
    /// Big-endian bytes to integer
    Btoi,
    /// SHA-256 of a byte string
    Sha256,
    /// Discard the top of the stack
    Pop,
    /// Duplicate the top of the stack
    Dup,
    /// Log a byte string
    Log,
    /// Fail unless the top of the stack is non-zero
    Assert,
    /// Fail immediately
    Err,
    /// Read a transaction field
    Txn(String),
    /// Read a global field
    Global(String),
    /// Read a program argument
    Arg(u8),
}

impl Opcode {
    /// Returns the stack effect of this opcode.
    pub fn signature(&self) -> Signature {
        match self {
            Self::Add
            | Self::Sub
            | Self::Mul
            | Self::Div
            | Self::Mod
            | Self::Eq
            | Self::Ne
            | Self::Lt
            | Self::Gt
            | Self::Le
            | Self::Ge
            | Self::LogicalAnd
            | Self::LogicalOr
            | Self::Concat => Signature::new(2, 1),
            Self::Not | Self::Len | Self::Itob | Self::Btoi | Self::Sha256 => Signature::new(1, 1),
            Self::Pop | Self::Log | Self::Assert => Signature::new(1, 0),
            Self::Dup => Signature::new(1, 2),
            Self::Err => Signature::new(0, 0),
            Self::Txn(_) | Self::Global(_) | Self::Arg(_) => Signature::new(0, 1),
        }
    }

    /// The mnemonic of the opcode, without immediates.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::LogicalAnd => "&&",
            Self::LogicalOr => "||",
            Self::Not => "!",
            Self::Len => "len",
            Self::Concat => "concat",
            Self::Itob => "itob",
            Self::Btoi => "btoi",
            Self::Sha256 => "sha256",
            Self::Pop => "pop",
            Self::Dup => "dup",
            Self::Log => "log",
            Self::Assert => "assert",
            Self::Err => "err",
            Self::Txn(_) => "txn",
            Self::Global(_) => "global",
            Self::Arg(_) => "arg",
        }
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Txn(field) | Self::Global(field) => write!(f, "{} {field}", self.mnemonic()),
            Self::Arg(n) => write!(f, "arg {n}"),
            _ => f.write_str(self.mnemonic()),
        }
    }
}
