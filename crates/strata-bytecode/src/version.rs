use core::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Identifies a target machine version.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Version {
    /// Version 1.
    V1,
    /// Version 2.
    V2,
    /// Version 3.
    V3,
    /// Version 4.
    #[default]
    V4,
}

impl Version {
    /// The newest supported version.
    pub const LATEST: Self = Self::V4;

    /// The number of physical scratch slots on the target machine.
    pub const SLOT_CAPACITY: usize = 256;

    /// Returns the numeric version.
    pub const fn number(self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
            Self::V3 => 3,
            Self::V4 => 4,
        }
    }

    /// Returns the number of physical scratch slots.
    pub const fn slot_capacity(self) -> usize {
        Self::SLOT_CAPACITY
    }

    /// Reports whether `callsub`/`retsub` exist at this version.
    pub const fn supports_subroutines(self) -> bool {
        self.number() >= 4
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Unsupported target [`Version`].
#[derive(Debug, Eq, PartialEq, thiserror::Error)]
#[error("unsupported target version {0}")]
pub struct UnsupportedVersion(pub u8);

impl TryFrom<u8> for Version {
    type Error = UnsupportedVersion;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        match n {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            3 => Ok(Self::V3),
            4 => Ok(Self::V4),
            _ => Err(UnsupportedVersion(n)),
        }
    }
}

impl From<Version> for u8 {
    fn from(v: Version) -> Self {
        v.number()
    }
}
