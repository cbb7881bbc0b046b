use std::fmt;

use strata_bytecode::Opcode;

use crate::{new_key_type, provenance::Provenance};

new_key_type! {
    /// Identifies an expression in a [`Program`](crate::Program).
    pub struct ExprId;
}

new_key_type! {
    /// Identifies a subroutine in a [`Program`](crate::Program).
    pub struct SubroutineId;
}

new_key_type! {
    /// A named storage location, before it is assigned a physical slot.
    pub struct LogicalSlot;
}

impl fmt::Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

impl fmt::Display for SubroutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub{}", self.0)
    }
}

impl fmt::Display for LogicalSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// The shape of an expression.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExprKind {
    /// An integer constant.
    Int(u64),
    /// A byte-string constant.
    Bytes(Vec<u8>),
    /// A basic operation applied to its operands, first operand pushed
    /// first.
    Op(Opcode, Vec<ExprId>),
    /// Evaluates each item in order. The sequence yields what the last
    /// item yields; every other item must yield nothing.
    Seq(Vec<ExprId>),
    /// A two-way branch on a nonzero condition.
    If {
        /// Evaluated first.
        cond: ExprId,
        /// Evaluated when `cond` is nonzero.
        then: ExprId,
        /// Evaluated when `cond` is zero.
        otherwise: Option<ExprId>,
    },
    /// Repeats `body` while `cond` is nonzero. Yields nothing.
    While {
        /// Tested before every iteration.
        cond: ExprId,
        /// Must yield nothing.
        body: ExprId,
    },
    /// Short-circuit conjunction. Yields the last operand evaluated.
    And(Vec<ExprId>),
    /// Short-circuit disjunction. Yields the last operand evaluated.
    Or(Vec<ExprId>),
    /// Writes a value to a slot.
    Store(LogicalSlot, ExprId),
    /// Reads a slot.
    Load(LogicalSlot),
    /// Calls a subroutine with arguments, first argument pushed first.
    Call(SubroutineId, Vec<ExprId>),
    /// Leaves the current subroutine, or ends the program when used
    /// outside one.
    Return(Option<ExprId>),
}

/// An expression node.
#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub(crate) kind: ExprKind,
    pub(crate) provenance: Provenance,
}

impl Expr {
    /// The shape of the expression.
    pub fn kind(&self) -> &ExprKind {
        &self.kind
    }

    /// Where the expression was built.
    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// The direct children, in evaluation order.
    pub fn children(&self) -> Vec<ExprId> {
        match &self.kind {
            ExprKind::Int(_) | ExprKind::Bytes(_) | ExprKind::Load(_) => Vec::new(),
            ExprKind::Op(_, args)
            | ExprKind::Seq(args)
            | ExprKind::And(args)
            | ExprKind::Or(args)
            | ExprKind::Call(_, args) => args.clone(),
            ExprKind::If {
                cond,
                then,
                otherwise,
            } => [Some(*cond), Some(*then), *otherwise]
                .into_iter()
                .flatten()
                .collect(),
            ExprKind::While { cond, body } => vec![*cond, *body],
            ExprKind::Store(_, value) => vec![*value],
            ExprKind::Return(value) => value.iter().copied().collect(),
        }
    }
}

/// A subroutine, callable from the program or other subroutines.
#[derive(Clone, Debug, PartialEq)]
pub struct Subroutine {
    pub(crate) name: String,
    pub(crate) params: Vec<LogicalSlot>,
    pub(crate) returns_value: bool,
    pub(crate) body: Option<ExprId>,
    pub(crate) provenance: Provenance,
}

impl Subroutine {
    /// The subroutine's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The slots that receive the arguments, first argument first.
    pub fn params(&self) -> &[LogicalSlot] {
        &self.params
    }

    /// Reports whether a call yields a value.
    pub fn returns_value(&self) -> bool {
        self.returns_value
    }

    /// The body, once defined.
    pub fn body(&self) -> Option<ExprId> {
        self.body
    }

    /// Where the subroutine was declared.
    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }
}
