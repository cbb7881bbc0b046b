//! The Strata compiler.
//!
//! Lowers a [`Program`](strata_dsl::Program) to a [`BlockGraph`](ir::BlockGraph),
//! optimizes it, flattens it into a [`LinearProgram`] and, when the
//! program was built with provenance capture on, produces a source map
//! attributing every output line to the user code that built it.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::panic))]
#![warn(clippy::arithmetic_side_effects)]

mod compile;
pub mod config;
mod error;
pub mod ir;
mod linearize;
mod lower;
pub mod optimize;
pub mod sourcemap;

pub use compile::*;
pub use config::{Config, ConfigError};
pub use error::*;
pub use linearize::{Instruction, LinearProgram, linearize};
pub use lower::{Arity, lower};
pub use optimize::{OptimizeOptions, OptimizeReport, Pass, optimize};
pub use sourcemap::{
    Annotation, Attribution, ProgramSourceMap, SourceFileSet, SourceMapOptions, build,
};
