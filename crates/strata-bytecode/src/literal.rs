use core::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// A literal value pushed by the program or stored in the constant pool.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum Literal {
    /// An unsigned 64-bit integer
    Int(u64),
    /// A byte string
    Bytes(Vec<u8>),
}

impl Literal {
    /// Returns true if this is an integer literal.
    pub fn is_int(&self) -> bool {
        matches!(self, Self::Int(_))
    }
}

impl From<u64> for Literal {
    fn from(n: u64) -> Self {
        Self::Int(n)
    }
}

impl From<&[u8]> for Literal {
    fn from(b: &[u8]) -> Self {
        Self::Bytes(b.to_vec())
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Bytes(b) => {
                f.write_str("0x")?;
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Literal::Int(42).to_string(), "42");
        assert_eq!(Literal::from(&b"hi"[..]).to_string(), "0x6869");
        assert_eq!(Literal::Bytes(vec![]).to_string(), "0x");
    }
}
