//! Construction-site provenance.
//!
//! Every node built through a [`Program`](crate::Program) records the
//! call stack that created it, from the innermost frame out to the first
//! frame of user code. A frame is user code unless it belongs to one of
//! the [`InternalUnits`].

mod capture;
mod filter;
pub mod syntax;

use std::{fmt, path::PathBuf};

use const_format::concatcp;
use tracing::debug;

pub use self::{
    filter::InternalUnits,
    syntax::{NodeRef, SyntaxNode},
};

/// The environment variable that enables provenance capture.
pub const PROVENANCE_ENV: &str = "STRATA_PROVENANCE";

/// How to turn provenance capture on.
pub const ENABLE_HINT: &str = concatcp!(
    "provenance capture is disabled; create the program with `Tracker::enabled` ",
    "or set `provenance.enabled = true` in the compiler config or export ",
    PROVENANCE_ENV,
    "=1"
);

/// Text recorded for a frame whose source file cannot be read.
pub const SOURCE_UNAVAILABLE: &str = "<source unavailable>";

/// Returned by operations that need provenance when capture is off.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{hint}")]
pub struct ProvenanceDisabled {
    /// Instructions for enabling capture.
    pub hint: &'static str,
}

impl Default for ProvenanceDisabled {
    fn default() -> Self {
        Self { hint: ENABLE_HINT }
    }
}

/// The columns of the expression a frame points at, 1-based and
/// end-exclusive. Both are equal when only the start is known.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ColumnRange {
    /// The first column.
    pub start: u32,
    /// One past the last column.
    pub end: u32,
}

/// One stack frame of a [`Provenance`].
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    file: Option<PathBuf>,
    line: u32,
    columns: ColumnRange,
    function: String,
    excerpt: String,
    node: Option<NodeRef>,
    internal: bool,
}

impl Frame {
    /// Creates a frame without consulting the file system. Used by hosts
    /// that capture positions some other way, and by tests.
    pub fn synthetic(
        file: Option<PathBuf>,
        line: u32,
        column: Option<u32>,
        function: impl Into<String>,
        internal: bool,
    ) -> Self {
        let column = column.unwrap_or(0);
        Self {
            file,
            line,
            columns: ColumnRange {
                start: column,
                end: column,
            },
            function: function.into(),
            excerpt: String::from(SOURCE_UNAVAILABLE),
            node: None,
            internal,
        }
    }

    /// Replaces the source excerpt.
    #[must_use]
    pub fn with_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.excerpt = excerpt.into();
        self
    }

    /// The source file, if the debug info names one.
    pub fn file(&self) -> Option<&std::path::Path> {
        self.file.as_deref()
    }

    /// The 1-based line, or 0 if unknown.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// The 1-based column, or 0 if unknown.
    pub fn column(&self) -> u32 {
        self.columns.start
    }

    /// The columns of the expression.
    pub fn columns(&self) -> ColumnRange {
        self.columns
    }

    /// The demangled function name.
    pub fn function(&self) -> &str {
        &self.function
    }

    /// The trimmed text of the source line, or [`SOURCE_UNAVAILABLE`].
    pub fn excerpt(&self) -> &str {
        &self.excerpt
    }

    /// The syntax node under the frame, if the source could be parsed.
    pub fn node(&self) -> Option<&NodeRef> {
        self.node.as_ref()
    }

    /// Reports whether the frame is in an internal unit.
    pub fn is_internal(&self) -> bool {
        self.internal
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}:{}", file.display(), self.line, self.columns.start)?,
            None => f.write_str("<unknown>")?,
        }
        write!(f, " in {}", self.function)
    }
}

/// The recorded construction site of a node.
///
/// Frames are ordered outermost to innermost.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Provenance {
    frames: Vec<Frame>,
}

impl Provenance {
    /// The empty provenance.
    pub const fn none() -> Self {
        Self { frames: Vec::new() }
    }

    /// Creates a provenance from frames ordered outermost to innermost.
    pub fn from_frames(frames: Vec<Frame>) -> Self {
        Self { frames }
    }

    /// The frames, outermost first.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Reports whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The innermost frame.
    pub fn innermost(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// The innermost frame of user code.
    pub fn innermost_user(&self) -> Option<&Frame> {
        self.frames.iter().rev().find(|f| !f.internal)
    }

    /// The frame a node is attributed to: the innermost user frame, or
    /// failing that the innermost frame with a file.
    pub fn attribution(&self) -> Option<&Frame> {
        self.innermost_user()
            .or_else(|| self.frames.iter().rev().find(|f| f.file.is_some()))
    }
}

/// Decides whether and how provenance is captured.
///
/// A disabled tracker records nothing and costs nothing per node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tracker {
    units: Option<InternalUnits>,
}

impl Tracker {
    /// A tracker that records nothing.
    pub const fn disabled() -> Self {
        Self { units: None }
    }

    /// A tracker that records stacks, trimmed against `units`.
    pub fn enabled(units: InternalUnits) -> Self {
        debug!(units = units.units().len(), "provenance capture enabled");
        Self { units: Some(units) }
    }

    /// Reports whether capture is on.
    pub fn is_enabled(&self) -> bool {
        self.units.is_some()
    }

    /// The internal units, when capture is on.
    pub fn units(&self) -> Option<&InternalUnits> {
        self.units.as_ref()
    }

    /// Fails with [`ProvenanceDisabled`] unless capture is on.
    pub fn require(&self) -> Result<&InternalUnits, ProvenanceDisabled> {
        self.units.as_ref().ok_or(ProvenanceDisabled { hint: ENABLE_HINT })
    }

    /// Records the current call stack.
    #[inline(never)]
    pub fn capture(&self) -> Provenance {
        match &self.units {
            None => Provenance::none(),
            Some(units) => Provenance::from_frames(capture::walk(units)),
        }
    }
}
