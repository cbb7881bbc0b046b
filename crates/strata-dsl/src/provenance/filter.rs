use std::path::Path;

use serde::{Deserialize, Serialize};

/// The set of source units whose frames count as library internals.
///
/// A frame is internal iff it has no file, or its path (with `\`
/// normalized to `/`) contains one of the unit identifiers.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct InternalUnits {
    version: u32,
    units: Vec<String>,
}

impl InternalUnits {
    /// The current revision of the default unit list.
    pub const VERSION: u32 = 1;

    /// The Strata crates.
    pub const STRATA: &'static [&'static str] = &[
        "strata-bytecode/src/",
        "strata-dsl/src/",
        "strata-compiler/src/",
    ];

    /// The Rust standard library and third-party crates.
    pub const RUNTIME: &'static [&'static str] = &[
        "/rustc/",
        "library/std/src/",
        "library/core/src/",
        "library/alloc/src/",
        "/.cargo/registry/",
        "/.cargo/git/",
    ];

    /// An empty list: every frame with a file is user code.
    pub fn none() -> Self {
        Self {
            version: Self::VERSION,
            units: Vec::new(),
        }
    }

    /// Creates a list from explicit unit identifiers.
    pub fn new<I, S>(units: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            version: Self::VERSION,
            units: units.into_iter().map(Into::into).collect(),
        }
    }

    /// Adds a unit, e.g. a directory of host helper functions.
    #[must_use]
    pub fn with(mut self, unit: impl Into<String>) -> Self {
        self.units.push(unit.into());
        self
    }

    /// The revision of the list.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// The unit identifiers.
    pub fn units(&self) -> &[String] {
        &self.units
    }

    /// Reports whether a frame in `file` belongs to an internal unit.
    pub fn is_internal(&self, file: Option<&Path>) -> bool {
        let Some(file) = file else {
            return true;
        };
        let path = file.to_string_lossy().replace('\\', "/");
        self.units.iter().any(|unit| path.contains(unit.as_str()))
    }
}

impl Default for InternalUnits {
    fn default() -> Self {
        Self::new(Self::STRATA.iter().chain(Self::RUNTIME).copied())
    }
}
