//! Flattening an optimized [`BlockGraph`] into target instructions.

use std::{collections::HashMap, fmt};

use buggy::{BugExt as _, bug};
use strata_bytecode::{Address, Literal, Op, Version};
use strata_dsl::Provenance;
use tracing::debug;

use crate::{
    error::{CompileError, CompileErrorType},
    ir::{BlockGraph, BlockId, InstKind, SlotRef, Terminator},
};

/// An emitted instruction and the provenance it was emitted for.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    /// The target instruction.
    pub op: Op,
    /// The provenance of the node that produced it.
    pub provenance: Provenance,
}

/// The compiled program. Instruction `i` is output line `i`.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearProgram {
    /// The target version.
    pub version: Version,
    /// The instructions, one per output line.
    pub instructions: Vec<Instruction>,
    /// Physical scratch slots used.
    pub slot_count: usize,
    /// The constant pool, empty unless pooling ran.
    pub pool: Vec<Literal>,
}

impl LinearProgram {
    /// The number of instructions.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Reports whether there are no instructions.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Renders the program as bytecode source, one instruction per line.
    pub fn text(&self) -> String {
        self.to_string()
    }

    /// Iterates over the output lines.
    pub fn lines(&self) -> impl Iterator<Item = String> + '_ {
        self.instructions.iter().map(|i| i.op.to_string())
    }
}

impl fmt::Display for LinearProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for inst in &self.instructions {
            writeln!(f, "{}", inst.op)?;
        }
        Ok(())
    }
}

/// An instruction whose block operand is not yet an address.
enum Pending {
    Ready(Op),
    Branch(BlockId),
    BranchZero(BlockId),
    Jump(BlockId),
    Call(BlockId),
}

/// Flattens `graph` in [`BlockGraph::layout`] order.
///
/// Jumps to the next block are dropped, and a branch whose successor
/// comes next is inverted if needed so that it falls through. Every slot
/// must already be physical.
pub fn linearize(graph: &BlockGraph) -> Result<LinearProgram, CompileError> {
    let order = graph.layout();
    if order.len() != graph.blocks.len() {
        for id in graph.blocks.keys() {
            if !order.contains(&id) {
                return Err(CompileError::new(CompileErrorType::UnreachableBlock(id)));
            }
        }
    }

    let mut pending: Vec<(Pending, Provenance)> = Vec::new();
    let mut addresses: HashMap<BlockId, Address> = HashMap::new();
    for (i, &id) in order.iter().enumerate() {
        addresses.insert(id, pending.len());
        let block = &graph.blocks[id];
        for inst in &block.insts {
            let op = match &inst.kind {
                InstKind::Pragma(v) => Pending::Ready(Op::Pragma(*v)),
                InstKind::ConstBlock(lits) => Pending::Ready(Op::ConstBlock(lits.clone())),
                InstKind::Push(lit) => Pending::Ready(Op::Push(lit.clone())),
                InstKind::PoolRef(index) => Pending::Ready(Op::Const(*index)),
                InstKind::Store(SlotRef::Physical(s)) => Pending::Ready(Op::Store(*s)),
                InstKind::Load(SlotRef::Physical(s)) => Pending::Ready(Op::Load(*s)),
                InstKind::Store(SlotRef::Logical(_)) | InstKind::Load(SlotRef::Logical(_)) => {
                    bug!("logical slot survived allocation")
                }
                InstKind::Basic(op) => Pending::Ready(Op::Basic(op.clone())),
                InstKind::Call(callee) => Pending::Call(*callee),
                InstKind::Retsub => Pending::Ready(Op::Retsub),
                InstKind::Return => Pending::Ready(Op::Return),
            };
            pending.push((op, inst.provenance.clone()));
        }

        let next = order.get(i.saturating_add(1)).copied();
        let prov = &block.term_provenance;
        match block.term {
            Terminator::Exit => {}
            Terminator::Jump(target) if Some(target) == next => {}
            Terminator::Jump(target) => pending.push((Pending::Jump(target), prov.clone())),
            Terminator::Branch { then, otherwise } if Some(otherwise) == next => {
                pending.push((Pending::Branch(then), prov.clone()));
            }
            Terminator::Branch { then, otherwise } if Some(then) == next => {
                pending.push((Pending::BranchZero(otherwise), prov.clone()));
            }
            Terminator::Branch { then, otherwise } => {
                pending.push((Pending::Branch(then), prov.clone()));
                pending.push((Pending::Jump(otherwise), prov.clone()));
            }
        }
    }

    let resolve = |block: BlockId| -> Result<Address, CompileError> {
        Ok(*addresses.get(&block).assume("target block was laid out")?)
    };
    let instructions = pending
        .into_iter()
        .map(|(p, provenance)| {
            let op = match p {
                Pending::Ready(op) => op,
                Pending::Branch(b) => Op::Branch(resolve(b)?),
                Pending::BranchZero(b) => Op::BranchZero(resolve(b)?),
                Pending::Jump(b) => Op::Jump(resolve(b)?),
                Pending::Call(b) => Op::Call(resolve(b)?),
            };
            Ok(Instruction { op, provenance })
        })
        .collect::<Result<Vec<_>, CompileError>>()?;

    debug!(
        blocks = order.len(),
        instructions = instructions.len(),
        "linearized program"
    );
    Ok(LinearProgram {
        version: graph.version,
        instructions,
        slot_count: graph.physical_slots,
        pool: graph.pool.clone(),
    })
}
