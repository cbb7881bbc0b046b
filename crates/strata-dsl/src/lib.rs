//! Expression trees for Strata programs.
//!
//! A [`Program`] is built bottom-up through its constructor methods, and
//! each node remembers the user code that built it (see [`provenance`]).

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::panic))]

pub mod arena;
mod expr;
mod program;
pub mod provenance;

pub use expr::{Expr, ExprId, ExprKind, LogicalSlot, Subroutine, SubroutineId};
pub use program::{DefinitionError, Program};
pub use provenance::{
    ColumnRange, ENABLE_HINT, Frame, InternalUnits, NodeRef, PROVENANCE_ENV, Provenance,
    ProvenanceDisabled, SOURCE_UNAVAILABLE, SyntaxNode, Tracker,
};
