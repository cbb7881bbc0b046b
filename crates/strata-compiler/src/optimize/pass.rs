use std::fmt;

use serde::{Deserialize, Serialize};
use strata_bytecode::Version;

/// An optimization pass. Passes are introduced over time, and each one
/// only applies to targets that can execute its output.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pass {
    /// Replaces literal pushes with references into a constant pool.
    ConstantPooling,
    /// Shares physical slots between logical slots that are never live
    /// at the same time.
    SlotCoalescing,
    /// Removes a store that is immediately loaded back and never read
    /// again.
    StoreLoadElision,
}

impl Pass {
    /// Every pass, in the order they run.
    pub const ALL: [Self; 3] = [
        Self::ConstantPooling,
        Self::StoreLoadElision,
        Self::SlotCoalescing,
    ];

    /// The oldest target version the pass applies to.
    pub const fn min_version(self) -> Version {
        match self {
            Self::ConstantPooling => Version::V2,
            Self::SlotCoalescing => Version::V1,
            Self::StoreLoadElision => Version::V3,
        }
    }

    /// Reports whether the pass applies to `version`.
    pub fn applies_to(self, version: Version) -> bool {
        version >= self.min_version()
    }

    /// The passes that apply to `version`.
    pub fn for_version(version: Version) -> impl Iterator<Item = Self> {
        Self::ALL.into_iter().filter(move |p| p.applies_to(version))
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConstantPooling => "constant-pooling",
            Self::SlotCoalescing => "slot-coalescing",
            Self::StoreLoadElision => "store-load-elision",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_gating() {
        assert_eq!(
            Pass::for_version(Version::V1).collect::<Vec<_>>(),
            vec![Pass::SlotCoalescing]
        );
        assert_eq!(
            Pass::for_version(Version::V2).collect::<Vec<_>>(),
            vec![Pass::ConstantPooling, Pass::SlotCoalescing]
        );
        assert_eq!(Pass::for_version(Version::V4).count(), 3);
    }
}
