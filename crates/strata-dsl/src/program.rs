use strata_bytecode::Opcode;
use tracing::trace;

use crate::{
    arena::Arena,
    expr::{Expr, ExprId, ExprKind, LogicalSlot, Subroutine, SubroutineId},
    provenance::{Provenance, ProvenanceDisabled, Tracker},
};

/// An error defining a subroutine.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum DefinitionError {
    /// The id was not returned by [`Program::declare_subroutine`].
    #[error("unknown subroutine {0}")]
    UnknownSubroutine(SubroutineId),
    /// The subroutine already has a body.
    #[error("subroutine `{0}` is already defined")]
    AlreadyDefined(String),
    /// The body is not an expression of this program.
    #[error("unknown expression {0}")]
    UnknownExpression(ExprId),
}

/// Builds an expression tree.
///
/// Every constructor records where it was called from, as decided by the
/// program's [`Tracker`]. Children must be built before their parents, so
/// the tree is acyclic by construction.
#[derive(Clone, Debug, Default)]
pub struct Program {
    exprs: Arena<ExprId, Expr>,
    subroutines: Arena<SubroutineId, Subroutine>,
    slots: Arena<LogicalSlot, Provenance>,
    tracker: Tracker,
}

impl Program {
    /// Creates an empty program.
    pub fn new(tracker: Tracker) -> Self {
        Self {
            tracker,
            ..Self::default()
        }
    }

    /// The provenance tracker.
    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Looks up an expression.
    pub fn expr(&self, id: ExprId) -> Option<&Expr> {
        self.exprs.get(id)
    }

    /// The number of expressions built.
    pub fn expr_count(&self) -> usize {
        self.exprs.len()
    }

    /// Looks up a subroutine.
    pub fn subroutine(&self, id: SubroutineId) -> Option<&Subroutine> {
        self.subroutines.get(id)
    }

    /// Iterates over the subroutines in declaration order.
    pub fn subroutines(&self) -> impl Iterator<Item = (SubroutineId, &Subroutine)> {
        self.subroutines.iter()
    }

    /// The number of logical slots allocated.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Where a slot was allocated.
    pub fn slot_provenance(&self, slot: LogicalSlot) -> Option<&Provenance> {
        self.slots.get(slot)
    }

    /// Returns an expression's provenance, failing if capture is off.
    pub fn provenance_of(&self, id: ExprId) -> Result<Option<&Provenance>, ProvenanceDisabled> {
        self.tracker.require()?;
        Ok(self.exprs.get(id).map(Expr::provenance))
    }

    // Not inlined so that its frame sits between the caller and the walk.
    #[inline(never)]
    fn push(&mut self, kind: ExprKind) -> ExprId {
        let provenance = self.tracker.capture();
        let id = self.exprs.insert(Expr { kind, provenance });
        trace!(%id, "built expression");
        id
    }

    /// An integer constant.
    pub fn int(&mut self, value: u64) -> ExprId {
        self.push(ExprKind::Int(value))
    }

    /// A byte-string constant.
    pub fn bytes(&mut self, value: impl Into<Vec<u8>>) -> ExprId {
        self.push(ExprKind::Bytes(value.into()))
    }

    /// A basic operation.
    pub fn op(&mut self, op: Opcode, args: impl IntoIterator<Item = ExprId>) -> ExprId {
        self.push(ExprKind::Op(op, args.into_iter().collect()))
    }

    /// A sequence.
    pub fn seq(&mut self, items: impl IntoIterator<Item = ExprId>) -> ExprId {
        self.push(ExprKind::Seq(items.into_iter().collect()))
    }

    /// A branch without an else arm. `then` must yield nothing.
    pub fn if_then(&mut self, cond: ExprId, then: ExprId) -> ExprId {
        self.push(ExprKind::If {
            cond,
            then,
            otherwise: None,
        })
    }

    /// A two-way branch.
    pub fn if_else(&mut self, cond: ExprId, then: ExprId, otherwise: ExprId) -> ExprId {
        self.push(ExprKind::If {
            cond,
            then,
            otherwise: Some(otherwise),
        })
    }

    /// A loop.
    pub fn while_loop(&mut self, cond: ExprId, body: ExprId) -> ExprId {
        self.push(ExprKind::While { cond, body })
    }

    /// A short-circuit conjunction.
    pub fn and(&mut self, items: impl IntoIterator<Item = ExprId>) -> ExprId {
        self.push(ExprKind::And(items.into_iter().collect()))
    }

    /// A short-circuit disjunction.
    pub fn or(&mut self, items: impl IntoIterator<Item = ExprId>) -> ExprId {
        self.push(ExprKind::Or(items.into_iter().collect()))
    }

    /// Allocates a fresh logical slot.
    #[inline(never)]
    pub fn new_slot(&mut self) -> LogicalSlot {
        let provenance = self.tracker.capture();
        self.slots.insert(provenance)
    }

    /// Writes `value` to `slot`.
    pub fn store(&mut self, slot: LogicalSlot, value: ExprId) -> ExprId {
        self.push(ExprKind::Store(slot, value))
    }

    /// Reads `slot`.
    pub fn load(&mut self, slot: LogicalSlot) -> ExprId {
        self.push(ExprKind::Load(slot))
    }

    /// Declares a subroutine taking `params` arguments. Its body is
    /// supplied later with [`Program::define_subroutine`], so that
    /// subroutines may call each other.
    #[inline(never)]
    pub fn declare_subroutine(
        &mut self,
        name: impl Into<String>,
        params: usize,
        returns_value: bool,
    ) -> SubroutineId {
        let provenance = self.tracker.capture();
        let params = (0..params)
            .map(|_| self.slots.insert(provenance.clone()))
            .collect();
        self.subroutines.insert(Subroutine {
            name: name.into(),
            params,
            returns_value,
            body: None,
            provenance,
        })
    }

    /// The slots holding a subroutine's arguments.
    pub fn params(&self, id: SubroutineId) -> &[LogicalSlot] {
        self.subroutines
            .get(id)
            .map(Subroutine::params)
            .unwrap_or_default()
    }

    /// Gives a declared subroutine its body.
    pub fn define_subroutine(
        &mut self,
        id: SubroutineId,
        body: ExprId,
    ) -> Result<(), DefinitionError> {
        if self.exprs.get(body).is_none() {
            return Err(DefinitionError::UnknownExpression(body));
        }
        let sub = self
            .subroutines
            .get_mut(id)
            .ok_or(DefinitionError::UnknownSubroutine(id))?;
        if sub.body.is_some() {
            return Err(DefinitionError::AlreadyDefined(sub.name.clone()));
        }
        sub.body = Some(body);
        Ok(())
    }

    /// Calls a subroutine.
    pub fn call(&mut self, id: SubroutineId, args: impl IntoIterator<Item = ExprId>) -> ExprId {
        self.push(ExprKind::Call(id, args.into_iter().collect()))
    }

    /// Returns from the enclosing subroutine, or ends the program.
    pub fn ret(&mut self, value: Option<ExprId>) -> ExprId {
        self.push(ExprKind::Return(value))
    }
}
