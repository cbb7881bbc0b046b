//! Lowering from an expression tree to a [`BlockGraph`].
//!
//! Operands are emitted before their operation. Branching constructs get
//! a block per arm and a join block, so arms are only evaluated when
//! taken. Each subroutine is lowered once, the first time it is called,
//! and call sites refer to its entry block; this also handles recursion.

use std::fmt;

use buggy::BugExt as _;
use indexmap::IndexMap;
use strata_bytecode::{Literal, Opcode, Version};
use strata_dsl::{ExprId, ExprKind, Program, Provenance, SubroutineId, arena::Arena};
use tracing::{debug, trace};

use crate::{
    error::{CompileError, LoweringError},
    ir::{Block, BlockGraph, BlockId, Group, Inst, InstKind, SlotRef, SubroutineGroup, Terminator},
};

/// The number of values an expression leaves on the stack.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Arity {
    /// None.
    Void,
    /// Exactly one.
    Value,
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => f.write_str("no value"),
            Self::Value => f.write_str("a value"),
        }
    }
}

/// What happens after an expression is evaluated.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Flow {
    /// Control continues with `Arity` values pushed.
    Falls(Arity),
    /// Control never continues, because of a `return`.
    Diverges,
}

/// Lowers the expression `root` of `program` for the target `version`.
pub fn lower(program: &Program, root: ExprId, version: Version) -> Result<BlockGraph, CompileError> {
    let root_expr = program.expr(root).ok_or_else(|| {
        CompileError::new(LoweringError::UndefinedExpression(root))
    })?;

    let mut lw = Lowerer {
        program,
        version,
        blocks: Arena::new(),
        current: None,
        subroutine: None,
        queue: IndexMap::new(),
    };

    let entry = lw.new_block(Group::Main);
    lw.current = Some(entry);
    lw.emit(InstKind::Pragma(version), root_expr.provenance())?;
    match lw.lower_expr(root)? {
        Flow::Falls(Arity::Value) => {
            lw.emit(InstKind::Return, root_expr.provenance())?;
            lw.finish(Terminator::Exit, root_expr.provenance())?;
        }
        Flow::Falls(Arity::Void) => {
            return Err(CompileError::at(
                LoweringError::ProgramArity,
                root_expr.provenance(),
            ));
        }
        Flow::Diverges => {}
    }

    // Lowering a body may discover further subroutines.
    let mut next = 0;
    while let Some((&id, &sub_entry)) = lw.queue.get_index(next) {
        next = next.saturating_add(1);
        lw.lower_subroutine(id, sub_entry)?;
    }

    let subroutines = lw
        .queue
        .iter()
        .map(|(&id, &entry)| SubroutineGroup {
            id,
            name: program
                .subroutine(id)
                .map(|s| s.name().to_owned())
                .unwrap_or_default(),
            entry,
        })
        .collect::<Vec<_>>();
    debug!(
        blocks = lw.blocks.len(),
        subroutines = subroutines.len(),
        "lowered program"
    );

    Ok(BlockGraph {
        blocks: lw.blocks,
        entry,
        subroutines,
        version,
        pool: Vec::new(),
        physical_slots: 0,
    })
}

struct Lowerer<'a> {
    program: &'a Program,
    version: Version,
    blocks: Arena<BlockId, Block>,
    /// The block being appended to, or `None` after a `return`.
    current: Option<BlockId>,
    /// The subroutine being lowered, if any.
    subroutine: Option<SubroutineId>,
    /// Subroutine entry blocks in order of first reference.
    queue: IndexMap<SubroutineId, BlockId>,
}

impl<'a> Lowerer<'a> {
    fn group(&self) -> Group {
        self.subroutine.map_or(Group::Main, Group::Subroutine)
    }

    fn new_block(&mut self, group: Group) -> BlockId {
        self.blocks.insert(Block::new(group))
    }

    fn current(&self) -> Result<BlockId, CompileError> {
        Ok(self.current.assume("no current block")?)
    }

    fn emit(&mut self, kind: InstKind, provenance: &Provenance) -> Result<(), CompileError> {
        let id = self.current()?;
        trace!(block = %id, inst = %kind, "emit");
        self.blocks[id]
            .insts
            .push(Inst::new(kind, provenance.clone()));
        Ok(())
    }

    /// Ends the current block with `term`.
    fn finish(&mut self, term: Terminator, provenance: &Provenance) -> Result<(), CompileError> {
        let id = self.current()?;
        let block = &mut self.blocks[id];
        block.term = term;
        block.term_provenance = provenance.clone();
        self.current = None;
        Ok(())
    }

    fn expr(&self, id: ExprId) -> Result<&'a strata_dsl::Expr, CompileError> {
        self.program
            .expr(id)
            .ok_or_else(|| CompileError::new(LoweringError::UndefinedExpression(id)))
    }

    /// Lowers `id` and requires it to yield a value.
    fn lower_value(&mut self, id: ExprId) -> Result<Flow, CompileError> {
        let flow = self.lower_expr(id)?;
        if flow == Flow::Falls(Arity::Void) {
            return Err(CompileError::at(
                LoweringError::ExpectedValue,
                self.expr(id)?.provenance(),
            ));
        }
        Ok(flow)
    }

    /// Lowers operands left to right. Returns `Diverges` if the last one
    /// diverges; an earlier one diverging makes the rest unreachable.
    fn lower_operands(&mut self, args: &[ExprId]) -> Result<Flow, CompileError> {
        let mut flow = Flow::Falls(Arity::Void);
        for &arg in args {
            flow = self.lower_value(arg)?;
        }
        Ok(flow)
    }

    fn lower_expr(&mut self, id: ExprId) -> Result<Flow, CompileError> {
        let expr = self.expr(id)?;
        let prov = expr.provenance();
        if self.current.is_none() {
            return Err(CompileError::at(LoweringError::UnreachableCode, prov));
        }
        match expr.kind() {
            ExprKind::Int(n) => {
                self.emit(InstKind::Push(Literal::Int(*n)), prov)?;
                Ok(Flow::Falls(Arity::Value))
            }
            ExprKind::Bytes(b) => {
                self.emit(InstKind::Push(Literal::Bytes(b.clone())), prov)?;
                Ok(Flow::Falls(Arity::Value))
            }
            ExprKind::Op(op, args) => self.lower_op(op, args, prov),
            ExprKind::Seq(items) => self.lower_seq(items),
            ExprKind::If {
                cond,
                then,
                otherwise,
            } => self.lower_if(*cond, *then, *otherwise, prov),
            ExprKind::While { cond, body } => self.lower_while(*cond, *body, prov),
            ExprKind::And(items) => self.lower_short_circuit(items, true, prov),
            ExprKind::Or(items) => self.lower_short_circuit(items, false, prov),
            ExprKind::Store(slot, value) => {
                if self.program.slot_provenance(*slot).is_none() {
                    return Err(CompileError::at(LoweringError::UndefinedSlot(*slot), prov));
                }
                if self.lower_value(*value)? == Flow::Diverges {
                    return Ok(Flow::Diverges);
                }
                self.emit(InstKind::Store(SlotRef::Logical(*slot)), prov)?;
                Ok(Flow::Falls(Arity::Void))
            }
            ExprKind::Load(slot) => {
                if self.program.slot_provenance(*slot).is_none() {
                    return Err(CompileError::at(LoweringError::UndefinedSlot(*slot), prov));
                }
                self.emit(InstKind::Load(SlotRef::Logical(*slot)), prov)?;
                Ok(Flow::Falls(Arity::Value))
            }
            ExprKind::Call(sub, args) => self.lower_call(*sub, args, prov),
            ExprKind::Return(value) => self.lower_return(*value, prov),
        }
    }

    fn lower_op(
        &mut self,
        op: &Opcode,
        args: &[ExprId],
        prov: &Provenance,
    ) -> Result<Flow, CompileError> {
        let sig = op.signature();
        if args.len() != sig.pops {
            return Err(CompileError::at(
                LoweringError::OperandCount {
                    op: op.clone(),
                    expected: sig.pops,
                    got: args.len(),
                },
                prov,
            ));
        }
        let arity = match sig.pushes {
            0 => Arity::Void,
            1 => Arity::Value,
            _ => return Err(CompileError::at(LoweringError::ResultCount(op.clone()), prov)),
        };
        if self.lower_operands(args)? == Flow::Diverges {
            return Ok(Flow::Diverges);
        }
        self.emit(InstKind::Basic(op.clone()), prov)?;
        Ok(Flow::Falls(arity))
    }

    fn lower_seq(&mut self, items: &[ExprId]) -> Result<Flow, CompileError> {
        let mut flow = Flow::Falls(Arity::Void);
        for (i, &item) in items.iter().enumerate() {
            flow = self.lower_expr(item)?;
            let last = i.saturating_add(1) == items.len();
            if !last && flow == Flow::Falls(Arity::Value) {
                return Err(CompileError::at(
                    LoweringError::DiscardedValue,
                    self.expr(item)?.provenance(),
                ));
            }
        }
        Ok(flow)
    }

    fn lower_if(
        &mut self,
        cond: ExprId,
        then: ExprId,
        otherwise: Option<ExprId>,
        prov: &Provenance,
    ) -> Result<Flow, CompileError> {
        if self.lower_value(cond)? == Flow::Diverges {
            // Both arms are dead.
            return Err(CompileError::at(
                LoweringError::UnreachableCode,
                self.expr(then)?.provenance(),
            ));
        }
        let group = self.group();
        let then_block = self.new_block(group);
        let else_block = self.new_block(group);
        self.finish(
            Terminator::Branch {
                then: then_block,
                otherwise: else_block,
            },
            prov,
        )?;

        self.current = Some(then_block);
        let then_flow = self.lower_expr(then)?;
        let then_end = self.current;

        let Some(otherwise) = otherwise else {
            if then_flow == Flow::Falls(Arity::Value) {
                return Err(CompileError::at(LoweringError::MissingElseValue, prov));
            }
            // The empty `else` block is the join.
            if let Some(end) = then_end {
                self.blocks[end].term = Terminator::Jump(else_block);
                self.blocks[end].term_provenance = prov.clone();
            }
            self.current = Some(else_block);
            return Ok(Flow::Falls(Arity::Void));
        };

        self.current = Some(else_block);
        let else_flow = self.lower_expr(otherwise)?;
        let else_end = self.current;

        let arity = match (then_flow, else_flow) {
            (Flow::Diverges, Flow::Diverges) => return Ok(Flow::Diverges),
            (Flow::Falls(a), Flow::Diverges) | (Flow::Diverges, Flow::Falls(a)) => a,
            (Flow::Falls(a), Flow::Falls(b)) if a == b => a,
            (Flow::Falls(a), Flow::Falls(b)) => {
                return Err(CompileError::at(
                    LoweringError::MismatchedBranchArity {
                        then: a,
                        otherwise: b,
                    },
                    prov,
                ));
            }
        };
        let join = self.new_block(group);
        for end in [then_end, else_end].into_iter().flatten() {
            self.blocks[end].term = Terminator::Jump(join);
            self.blocks[end].term_provenance = prov.clone();
        }
        self.current = Some(join);
        Ok(Flow::Falls(arity))
    }

    fn lower_while(
        &mut self,
        cond: ExprId,
        body: ExprId,
        prov: &Provenance,
    ) -> Result<Flow, CompileError> {
        let group = self.group();
        let header = self.new_block(group);
        self.finish(Terminator::Jump(header), prov)?;
        self.current = Some(header);
        if self.lower_value(cond)? == Flow::Diverges {
            return Err(CompileError::at(
                LoweringError::UnreachableCode,
                self.expr(body)?.provenance(),
            ));
        }
        let body_block = self.new_block(group);
        let exit = self.new_block(group);
        self.finish(
            Terminator::Branch {
                then: body_block,
                otherwise: exit,
            },
            prov,
        )?;

        self.current = Some(body_block);
        match self.lower_expr(body)? {
            Flow::Falls(Arity::Void) => self.finish(Terminator::Jump(header), prov)?,
            Flow::Falls(Arity::Value) => {
                return Err(CompileError::at(
                    LoweringError::DiscardedValue,
                    self.expr(body)?.provenance(),
                ));
            }
            Flow::Diverges => {}
        }
        self.current = Some(exit);
        Ok(Flow::Falls(Arity::Void))
    }

    /// Lowers `and` (`is_and`) or `or`. Each operand but the last is
    /// duplicated and tested; when it decides the result the copy is left
    /// on the stack, otherwise it is popped and the next operand runs.
    fn lower_short_circuit(
        &mut self,
        items: &[ExprId],
        is_and: bool,
        prov: &Provenance,
    ) -> Result<Flow, CompileError> {
        let name = if is_and { "and" } else { "or" };
        let Some((&last, init)) = items.split_last() else {
            return Err(CompileError::at(LoweringError::EmptyOperands(name), prov));
        };
        if init.is_empty() {
            return self.lower_value(last);
        }
        let group = self.group();
        let join = self.new_block(group);
        for &item in init {
            if self.lower_value(item)? == Flow::Diverges {
                return Err(CompileError::at(
                    LoweringError::UnreachableCode,
                    self.expr(last)?.provenance(),
                ));
            }
            self.emit(InstKind::Basic(Opcode::Dup), prov)?;
            let next = self.new_block(group);
            let term = if is_and {
                Terminator::Branch {
                    then: next,
                    otherwise: join,
                }
            } else {
                Terminator::Branch {
                    then: join,
                    otherwise: next,
                }
            };
            self.finish(term, prov)?;
            self.current = Some(next);
            self.emit(InstKind::Basic(Opcode::Pop), prov)?;
        }
        if self.lower_value(last)? == Flow::Falls(Arity::Value) {
            self.finish(Terminator::Jump(join), prov)?;
        }
        self.current = Some(join);
        Ok(Flow::Falls(Arity::Value))
    }

    fn lower_call(
        &mut self,
        id: SubroutineId,
        args: &[ExprId],
        prov: &Provenance,
    ) -> Result<Flow, CompileError> {
        if !self.version.supports_subroutines() {
            return Err(CompileError::at(
                LoweringError::Unsupported {
                    feature: "subroutines",
                    required: Version::V4,
                    version: self.version,
                },
                prov,
            ));
        }
        let sub = self.program.subroutine(id).ok_or_else(|| {
            CompileError::at(LoweringError::UndefinedSubroutine(id.to_string()), prov)
        })?;
        if sub.body().is_none() {
            return Err(CompileError::at(
                LoweringError::UndefinedSubroutine(sub.name().to_owned()),
                prov,
            ));
        }
        if args.len() != sub.params().len() {
            return Err(CompileError::at(
                LoweringError::ArgumentCount {
                    name: sub.name().to_owned(),
                    expected: sub.params().len(),
                    got: args.len(),
                },
                prov,
            ));
        }
        if self.lower_operands(args)? == Flow::Diverges {
            return Ok(Flow::Diverges);
        }
        let entry = match self.queue.get(&id) {
            Some(&entry) => entry,
            None => {
                let entry = self.new_block(Group::Subroutine(id));
                self.queue.insert(id, entry);
                entry
            }
        };
        self.emit(InstKind::Call(entry), prov)?;
        Ok(Flow::Falls(if sub.returns_value() {
            Arity::Value
        } else {
            Arity::Void
        }))
    }

    fn lower_return(
        &mut self,
        value: Option<ExprId>,
        prov: &Provenance,
    ) -> Result<Flow, CompileError> {
        let wants_value = match self.subroutine {
            None => true,
            Some(id) => self
                .program
                .subroutine(id)
                .assume("subroutine being lowered exists")?
                .returns_value(),
        };
        if wants_value != value.is_some() {
            return Err(CompileError::at(LoweringError::ReturnArity, prov));
        }
        if let Some(value) = value {
            if self.lower_value(value)? == Flow::Diverges {
                return Ok(Flow::Diverges);
            }
        }
        let inst = if self.subroutine.is_some() {
            InstKind::Retsub
        } else {
            InstKind::Return
        };
        self.emit(inst, prov)?;
        self.finish(Terminator::Exit, prov)?;
        Ok(Flow::Diverges)
    }

    fn lower_subroutine(&mut self, id: SubroutineId, entry: BlockId) -> Result<(), CompileError> {
        let program = self.program;
        let sub = program
            .subroutine(id)
            .assume("queued subroutine exists")?;
        let body = sub.body().assume("queued subroutine has a body")?;
        debug!(name = sub.name(), "lowering subroutine");

        self.subroutine = Some(id);
        self.current = Some(entry);
        // Arguments are on the stack with the last one on top.
        for &param in sub.params().iter().rev() {
            self.emit(InstKind::Store(SlotRef::Logical(param)), sub.provenance())?;
        }
        let body_prov = self.expr(body)?.provenance();
        match self.lower_expr(body)? {
            Flow::Falls(arity) => {
                if (arity == Arity::Value) != sub.returns_value() {
                    return Err(CompileError::at(LoweringError::ReturnArity, body_prov));
                }
                self.emit(InstKind::Retsub, body_prov)?;
                self.finish(Terminator::Exit, body_prov)?;
            }
            Flow::Diverges => {}
        }
        self.subroutine = None;
        Ok(())
    }
}
