use std::fmt;

use buggy::Bug;
use strata_bytecode::{Opcode, Version};
use strata_dsl::{ExprId, LogicalSlot, Provenance, ProvenanceDisabled};

use crate::{ir::BlockId, lower::Arity};

/// A malformed expression tree.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum LoweringError {
    /// The arms of a two-way branch yield different numbers of values.
    #[error("`if` arms disagree: `then` yields {then}, `else` yields {otherwise}")]
    MismatchedBranchArity {
        /// What the `then` arm yields.
        then: Arity,
        /// What the `else` arm yields.
        otherwise: Arity,
    },
    /// A branch without an `else` arm yields a value.
    #[error("`if` without `else` cannot yield a value")]
    MissingElseValue,
    /// An operand yields nothing.
    #[error("expected a value")]
    ExpectedValue,
    /// A value would be left on the stack and never used.
    #[error("value is never used")]
    DiscardedValue,
    /// An operation was given the wrong number of operands.
    #[error("`{op}` takes {expected} operand(s), got {got}")]
    OperandCount {
        /// The operation.
        op: Opcode,
        /// The operands it takes.
        expected: usize,
        /// The operands supplied.
        got: usize,
    },
    /// An operation pushes more than one value.
    #[error("`{0}` yields more than one value")]
    ResultCount(Opcode),
    /// A call was given the wrong number of arguments.
    #[error("`{name}` takes {expected} argument(s), got {got}")]
    ArgumentCount {
        /// The subroutine.
        name: String,
        /// The arguments it takes.
        expected: usize,
        /// The arguments supplied.
        got: usize,
    },
    /// A call refers to a subroutine that does not exist or has no body.
    #[error("undefined subroutine `{0}`")]
    UndefinedSubroutine(String),
    /// A child refers to an expression that does not exist.
    #[error("undefined expression {0}")]
    UndefinedExpression(ExprId),
    /// A slot was not allocated by the program.
    #[error("undefined slot {0}")]
    UndefinedSlot(LogicalSlot),
    /// Code follows a `return` and can never run.
    #[error("unreachable code")]
    UnreachableCode,
    /// The program does not end with exactly one value.
    #[error("the program must yield a value")]
    ProgramArity,
    /// A `return` does not match what its subroutine yields.
    #[error("`return` does not match the subroutine's result")]
    ReturnArity,
    /// A short-circuit operator has no operands.
    #[error("`{0}` needs at least one operand")]
    EmptyOperands(&'static str),
    /// The construct needs a newer target version.
    #[error("{feature} require target version {required} or later, not {version}")]
    Unsupported {
        /// The construct.
        feature: &'static str,
        /// The oldest version that has it.
        required: Version,
        /// The version being targeted.
        version: Version,
    },
}

/// Errors that can occur during compilation.
#[derive(Debug, thiserror::Error)]
pub enum CompileErrorType {
    /// The expression tree is malformed.
    #[error(transparent)]
    Lowering(#[from] LoweringError),
    /// A block cannot be reached from its group's entry.
    #[error("block {0} is unreachable")]
    UnreachableBlock(BlockId),
    /// An operation needs provenance but capture is off.
    #[error(transparent)]
    ProvenanceDisabled(#[from] ProvenanceDisabled),
    /// No instruction carries provenance, so no map can be built.
    #[error("source map unavailable: {hint}")]
    SourceMapUnavailable {
        /// Instructions for enabling capture.
        hint: &'static str,
    },
    /// More slots are simultaneously live than the target has.
    #[error("program needs {needed} scratch slots, target version {version} has {capacity}")]
    SlotAllocationOverflow {
        /// Physical slots required.
        needed: usize,
        /// Physical slots available.
        capacity: usize,
        /// The target version.
        version: Version,
    },
    /// An internal invariant did not hold.
    #[error("bug: {0}")]
    Bug(#[from] Bug),
}

/// The user code an error is attributed to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ErrorSource {
    /// The source file.
    pub file: String,
    /// 1-based line.
    pub line: u32,
    /// 1-based column, or 0 if unknown.
    pub column: u32,
    /// The source line's text.
    pub excerpt: String,
}

/// An error produced by the compiler. May contain the source location the
/// error is attributed to.
#[derive(Debug)]
pub struct CompileError(Box<CompileErrorImpl>);

#[derive(Debug)]
struct CompileErrorImpl {
    err_type: CompileErrorType,
    source: Option<ErrorSource>,
}

impl CompileError {
    /// An error with no source location.
    pub(crate) fn new(err_type: impl Into<CompileErrorType>) -> Self {
        Self(Box::new(CompileErrorImpl {
            err_type: err_type.into(),
            source: None,
        }))
    }

    /// Creates a `CompileError` attributed to where `provenance` points.
    pub(crate) fn at(err_type: impl Into<CompileErrorType>, provenance: &Provenance) -> Self {
        let source = provenance.attribution().and_then(|frame| {
            frame.file().map(|file| ErrorSource {
                file: file.display().to_string(),
                line: frame.line(),
                column: frame.column(),
                excerpt: frame.excerpt().to_owned(),
            })
        });
        Self(Box::new(CompileErrorImpl {
            err_type: err_type.into(),
            source,
        }))
    }

    /// The type of the error.
    pub fn err_type(&self) -> &CompileErrorType {
        &self.0.err_type
    }

    /// Consumes the error, returning its type.
    pub fn into_err_type(self) -> CompileErrorType {
        self.0.err_type
    }

    /// The attributed source location, if provenance was captured.
    pub fn source_location(&self) -> Option<&ErrorSource> {
        self.0.source.as_ref()
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.source {
            Some(source) => write!(
                f,
                "{} at {}:{}:{}:\n\t{}",
                self.0.err_type, source.file, source.line, source.column, source.excerpt
            ),
            None => write!(f, "{}", self.0.err_type),
        }
    }
}

impl core::error::Error for CompileError {}

impl From<Bug> for CompileError {
    fn from(bug: Bug) -> Self {
        CompileError::new(CompileErrorType::Bug(bug))
    }
}

impl From<ProvenanceDisabled> for CompileError {
    fn from(err: ProvenanceDisabled) -> Self {
        CompileError::new(err)
    }
}
