//! Strata bytecode
//!
//! Defines the target instruction set, the compiled program's versioning,
//! and the source map wire format shared with the wider source-map
//! ecosystem.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(clippy::arithmetic_side_effects)]

mod instructions;
mod literal;
mod opcode;
mod sourcemap;
mod version;
pub mod vlq;

pub use instructions::*;
pub use literal::*;
pub use opcode::*;
pub use sourcemap::*;
pub use version::*;
