//! Block-level optimizations.
//!
//! Pooling and slot allocation only rewrite instructions, never the
//! shape of the graph, so the layout computed up front is the order the
//! linearizer will use.

mod constants;
mod pass;
mod slots;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use self::pass::Pass;
use crate::{error::CompileError, ir::BlockGraph};

/// Which optimizations to run.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizeOptions {
    /// Pool repeated literals.
    pub constant_pooling: bool,
    /// Share physical slots and elide redundant store/load pairs. When
    /// off, every logical slot gets a physical slot of its own.
    pub scratch_slots: bool,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            constant_pooling: true,
            scratch_slots: true,
        }
    }
}

impl OptimizeOptions {
    /// Every optimization off.
    pub const NONE: Self = Self {
        constant_pooling: false,
        scratch_slots: false,
    };
}

/// What [`optimize`] did.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OptimizeReport {
    /// The passes that ran.
    pub passes: Vec<Pass>,
    /// Distinct literals in the constant pool.
    pub pool_size: usize,
    /// Logical slots that survived elision.
    pub logical_slots: usize,
    /// Physical slots assigned.
    pub physical_slots: usize,
    /// Store/load pairs removed.
    pub elided_pairs: usize,
}

/// Optimizes `graph` in place and assigns physical slots.
///
/// Slot assignment always happens, since the linearizer only accepts
/// physical slots.
pub fn optimize(
    graph: &mut BlockGraph,
    options: &OptimizeOptions,
) -> Result<OptimizeReport, CompileError> {
    let order = graph.layout();
    let mut report = OptimizeReport::default();
    let enabled = |pass: Pass| {
        let wanted = match pass {
            Pass::ConstantPooling => options.constant_pooling,
            Pass::SlotCoalescing | Pass::StoreLoadElision => options.scratch_slots,
        };
        wanted && pass.applies_to(graph.version)
    };
    let pooling = enabled(Pass::ConstantPooling);
    let elision = enabled(Pass::StoreLoadElision);
    let coalescing = enabled(Pass::SlotCoalescing);

    if pooling {
        report.pool_size = constants::pool(graph, &order);
        report.passes.push(Pass::ConstantPooling);
    }
    if elision {
        report.elided_pairs = slots::elide(graph, &order);
        report.passes.push(Pass::StoreLoadElision);
    }
    if coalescing {
        report.passes.push(Pass::SlotCoalescing);
    }
    let alloc = slots::allocate(graph, &order, coalescing)?;
    report.logical_slots = alloc.logical;
    report.physical_slots = alloc.physical;

    debug!(
        passes = ?report.passes,
        pool = report.pool_size,
        logical = report.logical_slots,
        physical = report.physical_slots,
        elided = report.elided_pairs,
        "optimized"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use strata_bytecode::{Opcode, Version};
    use strata_dsl::{Program, Tracker};
    use test_log::test;

    use super::*;
    use crate::{ir::InstKind, lower::lower};

    fn five_plus_five_plus_five() -> (Program, strata_dsl::ExprId) {
        let mut p = Program::new(Tracker::disabled());
        let a = p.int(5);
        let b = p.int(5);
        let c = p.int(5);
        let ab = p.op(Opcode::Add, [a, b]);
        let root = p.op(Opcode::Add, [ab, c]);
        (p, root)
    }

    #[test]
    fn test_pooling_gated_by_version() {
        let (p, root) = five_plus_five_plus_five();
        let mut graph = lower(&p, root, Version::V1).unwrap();
        let report = optimize(&mut graph, &OptimizeOptions::default()).unwrap();
        assert_eq!(report.passes, vec![Pass::SlotCoalescing]);
        assert_eq!(report.pool_size, 0);

        let mut graph = lower(&p, root, Version::V2).unwrap();
        let report = optimize(&mut graph, &OptimizeOptions::default()).unwrap();
        assert_eq!(report.pool_size, 1);
        let refs = graph.blocks[graph.entry]
            .insts
            .iter()
            .filter(|i| i.kind == InstKind::PoolRef(0))
            .count();
        assert_eq!(refs, 3);
    }

    #[test]
    fn test_disabled_uses_more_slots() {
        let mut p = Program::new(Tracker::disabled());
        let mut items = Vec::new();
        for n in 0..4 {
            let s = p.new_slot();
            let v = p.int(n);
            items.push(p.store(s, v));
            let l = p.load(s);
            let l2 = p.load(s);
            let sum = p.op(Opcode::Add, [l, l2]);
            items.push(p.op(Opcode::Pop, [sum]));
        }
        items.push(p.int(1));
        let root = p.seq(items);

        let mut on = lower(&p, root, Version::V4).unwrap();
        let on = optimize(&mut on, &OptimizeOptions::default()).unwrap();
        let mut off = lower(&p, root, Version::V4).unwrap();
        let off = optimize(&mut off, &OptimizeOptions::NONE).unwrap();
        assert_eq!(on.physical_slots, 1);
        assert_eq!(off.physical_slots, 4);
        assert!(off.physical_slots >= on.physical_slots);
    }
}
