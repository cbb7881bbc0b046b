//! Constant pooling.

use indexmap::IndexSet;
use strata_bytecode::Literal;
use strata_dsl::Provenance;
use tracing::trace;

use crate::ir::{BlockGraph, BlockId, Inst, InstKind};

/// Rewrites every literal push into a pool reference. Literals are
/// numbered by first occurrence in `order`. The pool declaration is
/// inserted after the entry block's pragma with the provenance of the
/// first pooled push. Returns the pool size.
pub(super) fn pool(graph: &mut BlockGraph, order: &[BlockId]) -> usize {
    let mut pool = IndexSet::<Literal>::new();
    let mut first: Option<Provenance> = None;
    for &id in order {
        for inst in &mut graph.blocks[id].insts {
            let InstKind::Push(lit) = &inst.kind else {
                continue;
            };
            let (index, _) = pool.insert_full(lit.clone());
            if first.is_none() {
                first = Some(inst.provenance.clone());
            }
            trace!(index, "pooled literal");
            inst.kind = InstKind::PoolRef(index);
        }
    }
    let Some(provenance) = first else {
        return 0;
    };
    let literals: Vec<Literal> = pool.into_iter().collect();
    let entry = &mut graph.blocks[graph.entry].insts;
    let at = usize::from(matches!(
        entry.first().map(|i| &i.kind),
        Some(InstKind::Pragma(_))
    ));
    entry.insert(at, Inst::new(InstKind::ConstBlock(literals.clone()), provenance));
    let len = literals.len();
    graph.pool = literals;
    len
}
