//! Scratch-slot allocation.
//!
//! Every logical slot gets the hull of the positions where it is live in
//! the layout order, and slots whose hulls overlap never share a physical
//! slot. Liveness is computed per group over the control-flow graph, so a
//! value carried around a loop or through a branch laid out out of order
//! keeps its slot for as long as it can still be read.
//!
//! Two things are invisible to per-group liveness and are handled as
//! extra conflicts. A slot live across a call conflicts with every slot
//! the callee may touch. A slot that may be read before it is written in
//! some group carries a value between groups (or relies on the initial
//! zero), so it conflicts with every other slot.

use std::collections::HashMap;

use buggy::BugExt as _;
use indexmap::IndexMap;
use strata_bytecode::Slot;
use strata_dsl::{LogicalSlot, Provenance};
use tracing::trace;

use crate::{
    error::{CompileError, CompileErrorType},
    ir::{BlockGraph, BlockId, Group, InstKind, SlotRef},
};

/// A logical slot's first access in layout order.
struct FirstAccess {
    provenance: Provenance,
}

/// The result of slot allocation.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub(super) struct Allocation {
    pub logical: usize,
    pub physical: usize,
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct SlotSet(Vec<bool>);

impl SlotSet {
    fn new(n: usize) -> Self {
        Self(vec![false; n])
    }

    fn insert(&mut self, i: usize) {
        if let Some(bit) = self.0.get_mut(i) {
            *bit = true;
        }
    }

    fn remove(&mut self, i: usize) {
        if let Some(bit) = self.0.get_mut(i) {
            *bit = false;
        }
    }

    fn contains(&self, i: usize) -> bool {
        self.0.get(i).copied().unwrap_or(false)
    }

    /// Adds every member of `other`, reporting whether anything changed.
    fn union_with(&mut self, other: &Self) -> bool {
        let mut changed = false;
        for (bit, &add) in self.0.iter_mut().zip(&other.0) {
            if add && !*bit {
                *bit = true;
                changed = true;
            }
        }
        changed
    }

    fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(i, &bit)| bit.then_some(i))
    }
}

enum Access {
    Load(usize),
    Store(usize),
}

struct Slots {
    first: IndexMap<LogicalSlot, FirstAccess>,
}

impl Slots {
    fn collect(graph: &BlockGraph, order: &[BlockId]) -> Self {
        let mut first = IndexMap::new();
        for &id in order {
            for inst in &graph.blocks[id].insts {
                if let InstKind::Store(SlotRef::Logical(s)) | InstKind::Load(SlotRef::Logical(s)) =
                    inst.kind
                {
                    first.entry(s).or_insert_with(|| FirstAccess {
                        provenance: inst.provenance.clone(),
                    });
                }
            }
        }
        Self { first }
    }

    fn len(&self) -> usize {
        self.first.len()
    }

    fn access(&self, kind: &InstKind) -> Option<Access> {
        match *kind {
            InstKind::Load(SlotRef::Logical(s)) => self.first.get_index_of(&s).map(Access::Load),
            InstKind::Store(SlotRef::Logical(s)) => self.first.get_index_of(&s).map(Access::Store),
            _ => None,
        }
    }
}

/// Assigns physical slots to every logical slot in the blocks of `order`.
///
/// With `coalesce`, slots that are never live at the same time share a
/// physical slot. Otherwise each logical slot gets its own, numbered by
/// first access.
pub(super) fn allocate(
    graph: &mut BlockGraph,
    order: &[BlockId],
    coalesce: bool,
) -> Result<Allocation, CompileError> {
    let slots = Slots::collect(graph, order);
    let colors = if coalesce {
        color(graph, order, &slots)?
    } else {
        (0..slots.len()).collect()
    };
    let physical = colors.iter().max().map_or(0, |c| c.saturating_add(1));

    let capacity = graph.version.slot_capacity();
    if physical > capacity {
        let idx = colors
            .iter()
            .position(|&c| c >= capacity)
            .assume("some slot exceeds capacity")?;
        let (_, first) = slots.first.get_index(idx).assume("slot index in range")?;
        return Err(CompileError::at(
            CompileErrorType::SlotAllocationOverflow {
                needed: physical,
                capacity,
                version: graph.version,
            },
            &first.provenance,
        ));
    }

    for &id in order {
        for inst in &mut graph.blocks[id].insts {
            let (InstKind::Store(slot) | InstKind::Load(slot)) = &mut inst.kind else {
                continue;
            };
            let SlotRef::Logical(s) = *slot else {
                continue;
            };
            let idx = slots.first.get_index_of(&s).assume("slot was collected")?;
            let color = *colors.get(idx).assume("every slot is colored")?;
            *slot = SlotRef::Physical(Slot::try_from(color).assume("slot below capacity")?);
        }
    }
    graph.physical_slots = physical;
    Ok(Allocation {
        logical: slots.len(),
        physical,
    })
}

fn color(graph: &BlockGraph, order: &[BlockId], slots: &Slots) -> Result<Vec<usize>, CompileError> {
    let n = slots.len();

    let mut start = HashMap::new();
    let mut pos: usize = 0;
    for &id in order {
        start.insert(id, pos);
        pos = pos
            .saturating_add(graph.blocks[id].insts.len())
            .saturating_add(1);
    }

    // Upward-exposed reads and writes of each block.
    let mut gen_sets = HashMap::new();
    let mut kill_sets = HashMap::new();
    for &id in order {
        let mut gen_set = SlotSet::new(n);
        let mut kill_set = SlotSet::new(n);
        for inst in &graph.blocks[id].insts {
            match slots.access(&inst.kind) {
                Some(Access::Load(i)) if !kill_set.contains(i) => gen_set.insert(i),
                Some(Access::Store(i)) => kill_set.insert(i),
                _ => {}
            }
        }
        gen_sets.insert(id, gen_set);
        kill_sets.insert(id, kill_set);
    }

    let live_out = |live_in: &HashMap<BlockId, SlotSet>, id: BlockId| {
        let mut out = SlotSet::new(n);
        for succ in graph.blocks[id].term.successors() {
            if let Some(set) = live_in.get(&succ) {
                out.union_with(set);
            }
        }
        out
    };

    let mut live_in: HashMap<BlockId, SlotSet> =
        order.iter().map(|&id| (id, SlotSet::new(n))).collect();
    loop {
        let mut changed = false;
        for &id in order.iter().rev() {
            let mut set = live_out(&live_in, id);
            for i in kill_sets[&id].iter() {
                set.remove(i);
            }
            set.union_with(&gen_sets[&id]);
            if live_in.get(&id) != Some(&set) {
                live_in.insert(id, set);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    // A slot live on entry to a group may be read before it is written.
    let mut pinned = SlotSet::new(n);
    let entries = std::iter::once(graph.entry).chain(graph.subroutines.iter().map(|s| s.entry));
    for entry in entries {
        if let Some(set) = live_in.get(&entry) {
            pinned.union_with(set);
        }
    }

    // Slots each group touches, then closed over the call graph.
    let mut touched: HashMap<Group, SlotSet> = HashMap::new();
    let mut callees: HashMap<Group, Vec<Group>> = HashMap::new();
    let group_of = |entry: BlockId| {
        graph
            .subroutine_at(entry)
            .map(|s| Group::Subroutine(s.id))
    };
    for &id in order {
        let block = &graph.blocks[id];
        let set = touched
            .entry(block.group)
            .or_insert_with(|| SlotSet::new(n));
        for inst in &block.insts {
            match slots.access(&inst.kind) {
                Some(Access::Load(i) | Access::Store(i)) => set.insert(i),
                None => {}
            }
            if let InstKind::Call(callee) = inst.kind {
                if let Some(g) = group_of(callee) {
                    callees.entry(block.group).or_default().push(g);
                }
            }
        }
    }
    loop {
        let mut changed = false;
        for (caller, list) in &callees {
            for callee in list {
                let Some(add) = touched.get(callee).cloned() else {
                    continue;
                };
                if let Some(set) = touched.get_mut(caller) {
                    changed |= set.union_with(&add);
                }
            }
        }
        if !changed {
            break;
        }
    }

    // Walk each block backwards, growing hulls over live positions.
    let mut hulls: Vec<Option<(usize, usize)>> = vec![None; n];
    let mut across: Vec<Vec<Group>> = vec![Vec::new(); n];
    let extend = |hulls: &mut Vec<Option<(usize, usize)>>, i: usize, p: usize| {
        if let Some(h) = hulls.get_mut(i) {
            *h = Some(match *h {
                None => (p, p),
                Some((lo, hi)) => (lo.min(p), hi.max(p)),
            });
        }
    };
    for &id in order {
        let block = &graph.blocks[id];
        let base = start[&id];
        let mut live = live_out(&live_in, id);
        let mut p = base.saturating_add(block.insts.len());
        for i in live.iter() {
            extend(&mut hulls, i, p);
        }
        for inst in block.insts.iter().rev() {
            p = p.saturating_sub(1);
            if let InstKind::Call(callee) = inst.kind {
                for i in live.iter() {
                    match group_of(callee) {
                        Some(g) => across[i].push(g),
                        None => pinned.insert(i),
                    }
                }
            }
            for i in live.iter() {
                extend(&mut hulls, i, p);
            }
            match slots.access(&inst.kind) {
                Some(Access::Store(i)) => {
                    extend(&mut hulls, i, p);
                    live.remove(i);
                }
                Some(Access::Load(i)) => {
                    extend(&mut hulls, i, p);
                    live.insert(i);
                }
                None => {}
            }
        }
    }

    let conflicts = |a: usize, b: usize| -> bool {
        if pinned.contains(a) || pinned.contains(b) {
            return true;
        }
        if let (Some((alo, ahi)), Some((blo, bhi))) = (hulls[a], hulls[b]) {
            if alo <= bhi && blo <= ahi {
                return true;
            }
        }
        let reaches = |x: usize, y: usize| {
            across[x]
                .iter()
                .any(|g| touched.get(g).is_some_and(|set| set.contains(y)))
        };
        reaches(a, b) || reaches(b, a)
    };

    let mut by_start: Vec<usize> = (0..n).collect();
    by_start.sort_by_key(|&i| (hulls[i].map_or(0, |(lo, _)| lo), i));
    let mut colors: Vec<Option<usize>> = vec![None; n];
    for &i in &by_start {
        let used: Vec<usize> = by_start
            .iter()
            .filter(|&&j| j != i && conflicts(i, j))
            .filter_map(|&j| colors[j])
            .collect();
        let color = (0..).find(|c| !used.contains(c)).assume("a free color exists")?;
        trace!(slot = i, color, "assigned slot");
        colors[i] = Some(color);
    }
    colors
        .into_iter()
        .map(|c| c.assume("every slot is colored").map_err(CompileError::from))
        .collect()
}

/// Removes `store s; load s` pairs where that store and that load are the
/// only accesses to `s`. The value then stays on the stack. Returns the
/// number of pairs removed.
pub(super) fn elide(graph: &mut BlockGraph, order: &[BlockId]) -> usize {
    let mut stores: HashMap<LogicalSlot, usize> = HashMap::new();
    let mut loads: HashMap<LogicalSlot, usize> = HashMap::new();
    for (_, block) in &graph.blocks {
        for inst in &block.insts {
            match inst.kind {
                InstKind::Store(SlotRef::Logical(s)) => {
                    let n = stores.entry(s).or_default();
                    *n = n.saturating_add(1);
                }
                InstKind::Load(SlotRef::Logical(s)) => {
                    let n = loads.entry(s).or_default();
                    *n = n.saturating_add(1);
                }
                _ => {}
            }
        }
    }
    let single = |s: &LogicalSlot| stores.get(s) == Some(&1) && loads.get(s) == Some(&1);

    let mut elided: usize = 0;
    for &id in order {
        let insts = &mut graph.blocks[id].insts;
        let mut i = 0;
        while i < insts.len() {
            let next = i.saturating_add(1);
            let pair = match (insts.get(i).map(|x| &x.kind), insts.get(next).map(|x| &x.kind)) {
                (
                    Some(InstKind::Store(SlotRef::Logical(a))),
                    Some(InstKind::Load(SlotRef::Logical(b))),
                ) => a == b && single(a),
                _ => false,
            };
            if pair {
                trace!(block = %id, at = i, "elided store/load");
                insts.drain(i..=next);
                elided = elided.saturating_add(1);
            } else {
                i = next;
            }
        }
    }
    elided
}

#[cfg(test)]
mod tests {
    use strata_bytecode::{Opcode, Version};
    use strata_dsl::{Program, Tracker};

    use super::*;
    use crate::lower::lower;

    fn slots_used(graph: &BlockGraph) -> Vec<String> {
        graph
            .layout()
            .into_iter()
            .flat_map(|id| graph.blocks[id].insts.clone())
            .filter(|i| matches!(i.kind, InstKind::Store(_) | InstKind::Load(_)))
            .map(|i| i.kind.to_string())
            .collect()
    }

    #[test]
    fn test_disjoint_slots_share() {
        let mut p = Program::new(Tracker::disabled());
        let a = p.new_slot();
        let b = p.new_slot();
        let one = p.int(1);
        let sa = p.store(a, one);
        let la = p.load(a);
        let log_a = p.op(Opcode::Itob, [la]);
        let log_a = p.op(Opcode::Log, [log_a]);
        let two = p.int(2);
        let sb = p.store(b, two);
        let lb = p.load(b);
        let lb2 = p.load(b);
        let root = p.op(Opcode::Add, [lb, lb2]);
        let root = p.seq([sa, log_a, sb, root]);
        let mut graph = lower(&p, root, Version::V4).unwrap();
        let order = graph.layout();
        let alloc = allocate(&mut graph, &order, true).unwrap();
        assert_eq!(alloc, Allocation { logical: 2, physical: 1 });
        assert_eq!(
            slots_used(&graph),
            ["store 0", "load 0", "store 0", "load 0", "load 0"]
        );

        let mut graph = lower(&p, root, Version::V4).unwrap();
        let alloc = allocate(&mut graph, &order, false).unwrap();
        assert_eq!(alloc, Allocation { logical: 2, physical: 2 });
    }

    #[test]
    fn test_overlapping_slots_do_not_share() {
        let mut p = Program::new(Tracker::disabled());
        let a = p.new_slot();
        let b = p.new_slot();
        let one = p.int(1);
        let sa = p.store(a, one);
        let two = p.int(2);
        let sb = p.store(b, two);
        let la = p.load(a);
        let lb = p.load(b);
        let sum = p.op(Opcode::Add, [la, lb]);
        let root = p.seq([sa, sb, sum]);
        let mut graph = lower(&p, root, Version::V4).unwrap();
        let order = graph.layout();
        let alloc = allocate(&mut graph, &order, true).unwrap();
        assert_eq!(alloc.physical, 2);
    }

    #[test]
    fn test_loop_keeps_slot_live() {
        // i = 3; while i { t = i; i = t - 1 }; u = 7; u + i
        let mut p = Program::new(Tracker::disabled());
        let i = p.new_slot();
        let t = p.new_slot();
        let u = p.new_slot();
        let three = p.int(3);
        let init = p.store(i, three);
        let cond = p.load(i);
        let li = p.load(i);
        let st = p.store(t, li);
        let lt = p.load(t);
        let one = p.int(1);
        let dec = p.op(Opcode::Sub, [lt, one]);
        let si = p.store(i, dec);
        let body = p.seq([st, si]);
        let w = p.while_loop(cond, body);
        let seven = p.int(7);
        let su = p.store(u, seven);
        let lu = p.load(u);
        let li2 = p.load(i);
        let sum = p.op(Opcode::Add, [lu, li2]);
        let root = p.seq([init, w, su, sum]);
        let mut graph = lower(&p, root, Version::V4).unwrap();
        let order = graph.layout();
        let alloc = allocate(&mut graph, &order, true).unwrap();
        // `i` is live through the loop and until the end; `t` and `u`
        // can share.
        assert_eq!(alloc, Allocation { logical: 3, physical: 2 });
    }

    #[test]
    fn test_read_before_write_is_pinned() {
        let mut p = Program::new(Tracker::disabled());
        let a = p.new_slot();
        let b = p.new_slot();
        let la = p.load(a);
        let pop = p.op(Opcode::Pop, [la]);
        let one = p.int(1);
        let sb = p.store(b, one);
        let lb = p.load(b);
        let root = p.seq([pop, sb, lb]);
        let mut graph = lower(&p, root, Version::V4).unwrap();
        let order = graph.layout();
        let alloc = allocate(&mut graph, &order, true).unwrap();
        assert_eq!(alloc.physical, 2);
    }

    #[test]
    fn test_live_across_call() {
        let mut p = Program::new(Tracker::disabled());
        let sub = p.declare_subroutine("f", 0, true);
        let tmp = p.new_slot();
        let nine = p.int(9);
        let st = p.store(tmp, nine);
        let lt = p.load(tmp);
        let body = p.seq([st, lt]);
        p.define_subroutine(sub, body).unwrap();

        let keep = p.new_slot();
        let one = p.int(1);
        let sk = p.store(keep, one);
        let call = p.call(sub, []);
        let lk = p.load(keep);
        let sum = p.op(Opcode::Add, [call, lk]);
        let root = p.seq([sk, sum]);
        let mut graph = lower(&p, root, Version::V4).unwrap();
        let order = graph.layout();
        let alloc = allocate(&mut graph, &order, true).unwrap();
        assert_eq!(alloc.physical, 2);
    }

    #[test]
    fn test_overflow() {
        let mut p = Program::new(Tracker::disabled());
        let mut stores = Vec::new();
        let mut loads = Vec::new();
        for n in 0..257u64 {
            let s = p.new_slot();
            let v = p.int(n);
            stores.push(p.store(s, v));
            loads.push(p.load(s));
        }
        let mut items = stores;
        let mut acc = loads[0];
        for &l in &loads[1..] {
            acc = p.op(Opcode::Add, [acc, l]);
        }
        items.push(acc);
        let root = p.seq(items);
        let mut graph = lower(&p, root, Version::V4).unwrap();
        let order = graph.layout();
        let err = allocate(&mut graph, &order, true).unwrap_err();
        assert!(matches!(
            err.err_type(),
            CompileErrorType::SlotAllocationOverflow {
                needed: 257,
                capacity: 256,
                ..
            }
        ));
    }

    #[test]
    fn test_elide_adjacent_pair() {
        let mut p = Program::new(Tracker::disabled());
        let a = p.new_slot();
        let one = p.int(1);
        let sa = p.store(a, one);
        let la = p.load(a);
        let root = p.seq([sa, la]);
        let mut graph = lower(&p, root, Version::V4).unwrap();
        let order = graph.layout();
        assert_eq!(elide(&mut graph, &order), 1);
        assert!(slots_used(&graph).is_empty());

        // A second read keeps the slot.
        let b = p.new_slot();
        let sb = p.store(b, one);
        let lb = p.load(b);
        let lb2 = p.load(b);
        let sum = p.op(Opcode::Add, [lb, lb2]);
        let root = p.seq([sb, sum]);
        let mut graph = lower(&p, root, Version::V4).unwrap();
        let order = graph.layout();
        assert_eq!(elide(&mut graph, &order), 0);
    }
}
