//! Host-side DSL helpers, registered as an internal unit by the tests
//! that use them.

use strata_dsl::{ExprId, Program};

/// The source unit these helpers live in.
pub const UNIT: &str = "tests/support/helpers.rs";

#[inline(never)]
pub fn literal(p: &mut Program, value: u64) -> ExprId {
    p.int(value)
}

#[inline(never)]
pub fn wrapped(p: &mut Program, value: u64) -> ExprId {
    literal(p, value)
}

/// Builds a literal through two more layers of helpers.
#[inline(never)]
pub fn nested(p: &mut Program, value: u64) -> ExprId {
    wrapped(p, value)
}
