//! The block graph produced by lowering and rewritten by the optimizer.
//!
//! # Text Format
//!
//! [`BlockGraph`] implements [`Display`](fmt::Display) with one line per
//! instruction, grouped by block in layout order:
//!
//! ```text
//! entry bb0, version 4
//! bb0 (main):
//!   #pragma version 4
//!   pushint 5
//!   store s0
//!   exit
//! ```
//!
//! Logical slots print as `s<n>`, physical slots as bare numbers, and pool
//! references as `const <index>`.

use std::fmt;

use indexmap::IndexSet;
use strata_bytecode::{Literal, Opcode, Slot, Version};
use strata_dsl::{
    LogicalSlot, Provenance, SubroutineId,
    arena::{Arena, Key as _},
    new_key_type,
};

new_key_type! {
    /// Identifies a [`Block`] in a [`BlockGraph`].
    pub struct BlockId;
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// A scratch slot operand.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SlotRef {
    /// Not yet allocated.
    Logical(LogicalSlot),
    /// A slot on the target machine.
    Physical(Slot),
}

impl fmt::Display for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Logical(s) => write!(f, "{s}"),
            Self::Physical(n) => write!(f, "{n}"),
        }
    }
}

/// An abstract instruction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InstKind {
    /// Declares the target version.
    Pragma(Version),
    /// Declares the constant pool.
    ConstBlock(Vec<Literal>),
    /// Pushes a literal.
    Push(Literal),
    /// Pushes a pooled literal.
    PoolRef(usize),
    /// Pops into a slot.
    Store(SlotRef),
    /// Pushes a slot's value.
    Load(SlotRef),
    /// A plain stack operation.
    Basic(Opcode),
    /// Calls the subroutine whose entry is the block.
    Call(BlockId),
    /// Returns from a subroutine.
    Retsub,
    /// Ends the program.
    Return,
}

impl fmt::Display for InstKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pragma(v) => write!(f, "#pragma version {v}"),
            Self::ConstBlock(lits) => {
                f.write_str("constants")?;
                for lit in lits {
                    write!(f, " {lit}")?;
                }
                Ok(())
            }
            Self::Push(lit @ Literal::Int(_)) => write!(f, "pushint {lit}"),
            Self::Push(lit @ Literal::Bytes(_)) => write!(f, "pushbytes {lit}"),
            Self::PoolRef(i) => write!(f, "const {i}"),
            Self::Store(s) => write!(f, "store {s}"),
            Self::Load(s) => write!(f, "load {s}"),
            Self::Basic(op) => write!(f, "{op}"),
            Self::Call(b) => write!(f, "callsub {b}"),
            Self::Retsub => f.write_str("retsub"),
            Self::Return => f.write_str("return"),
        }
    }
}

/// An instruction and the provenance of the node that emitted it.
#[derive(Clone, Debug, PartialEq)]
pub struct Inst {
    /// The operation.
    pub kind: InstKind,
    /// Where the emitting node was built.
    pub provenance: Provenance,
}

impl Inst {
    /// Creates an instruction.
    pub fn new(kind: InstKind, provenance: Provenance) -> Self {
        Self { kind, provenance }
    }
}

/// How control leaves a block.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Terminator {
    /// No successor. The block's last instruction ends execution of its
    /// group.
    Exit,
    /// Continues at the block.
    Jump(BlockId),
    /// Pops the top of the stack; continues at `then` if it is nonzero
    /// and at `otherwise` if it is zero.
    Branch {
        /// The nonzero successor.
        then: BlockId,
        /// The zero successor.
        otherwise: BlockId,
    },
}

impl Terminator {
    /// The successors, `then` before `otherwise`.
    pub fn successors(&self) -> Vec<BlockId> {
        match *self {
            Self::Exit => Vec::new(),
            Self::Jump(b) => vec![b],
            Self::Branch { then, otherwise } => vec![then, otherwise],
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exit => f.write_str("exit"),
            Self::Jump(b) => write!(f, "jump {b}"),
            Self::Branch { then, otherwise } => write!(f, "branch {then} {otherwise}"),
        }
    }
}

/// The code unit a block belongs to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Group {
    /// The main program.
    Main,
    /// A subroutine body.
    Subroutine(SubroutineId),
}

/// A basic block.
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    /// The straight-line instructions.
    pub insts: Vec<Inst>,
    /// How control leaves the block.
    pub term: Terminator,
    /// The provenance of the node that produced the terminator.
    pub term_provenance: Provenance,
    /// The owning group.
    pub group: Group,
}

impl Block {
    /// Creates an empty exit block.
    pub fn new(group: Group) -> Self {
        Self {
            insts: Vec::new(),
            term: Terminator::Exit,
            term_provenance: Provenance::none(),
            group,
        }
    }
}

/// A lowered subroutine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubroutineGroup {
    /// The DSL subroutine.
    pub id: SubroutineId,
    /// Its name.
    pub name: String,
    /// Its entry block.
    pub entry: BlockId,
}

/// A control-flow graph of basic blocks.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockGraph {
    /// Every block, main program and subroutines alike.
    pub blocks: Arena<BlockId, Block>,
    /// The main program's entry block.
    pub entry: BlockId,
    /// Subroutines in order of first reference.
    pub subroutines: Vec<SubroutineGroup>,
    /// The target version.
    pub version: Version,
    /// The constant pool, filled in by constant pooling.
    pub pool: Vec<Literal>,
    /// The number of physical slots, set by slot allocation.
    pub physical_slots: usize,
}

impl BlockGraph {
    /// Computes the block order used for linearization.
    ///
    /// The main program is laid out first by a preorder depth-first walk
    /// from the entry that visits a branch's `otherwise` edge before its
    /// `then` edge, so that the zero case falls through. Subroutine groups
    /// follow in the order their calls are first encountered. Blocks that
    /// cannot be reached are absent.
    pub fn layout(&self) -> Vec<BlockId> {
        let mut order = Vec::with_capacity(self.blocks.len());
        let mut visited = vec![false; self.blocks.len()];
        let mut roots = IndexSet::new();
        roots.insert(self.entry);
        let mut next_root = 0;
        while let Some(&root) = roots.get_index(next_root) {
            next_root = next_root.saturating_add(1);
            let mut stack = vec![root];
            while let Some(id) = stack.pop() {
                let Some(block) = self.blocks.get(id) else {
                    continue;
                };
                let Some(seen) = visited.get_mut(id.as_index()) else {
                    continue;
                };
                if *seen {
                    continue;
                }
                *seen = true;
                order.push(id);
                for inst in &block.insts {
                    if let InstKind::Call(callee) = inst.kind {
                        roots.insert(callee);
                    }
                }
                match block.term {
                    Terminator::Exit => {}
                    Terminator::Jump(next) => stack.push(next),
                    Terminator::Branch { then, otherwise } => {
                        stack.push(then);
                        stack.push(otherwise);
                    }
                }
            }
        }
        order
    }

    /// Finds the subroutine whose entry is `block`.
    pub fn subroutine_at(&self, block: BlockId) -> Option<&SubroutineGroup> {
        self.subroutines.iter().find(|s| s.entry == block)
    }
}

impl fmt::Display for BlockGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "entry {}, version {}", self.entry, self.version)?;
        for id in self.layout() {
            let block = &self.blocks[id];
            match block.group {
                Group::Main => writeln!(f, "{id} (main):")?,
                Group::Subroutine(sub) => {
                    let name = self
                        .subroutines
                        .iter()
                        .find(|s| s.id == sub)
                        .map_or("?", |s| s.name.as_str());
                    writeln!(f, "{id} (sub {name}):")?;
                }
            }
            for inst in &block.insts {
                writeln!(f, "  {}", inst.kind)?;
            }
            writeln!(f, "  {}", block.term)?;
        }
        Ok(())
    }
}
