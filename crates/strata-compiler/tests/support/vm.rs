//! A small interpreter for compiled programs, used to check that
//! optimizations do not change behavior.

use strata_bytecode::{Literal, Op, Opcode};
use strata_compiler::LinearProgram;

const STEP_LIMIT: usize = 1_000_000;
const SLOTS: usize = 256;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Value {
    Int(u64),
    Bytes(Vec<u8>),
}

impl From<&Literal> for Value {
    fn from(lit: &Literal) -> Self {
        match lit {
            Literal::Int(n) => Self::Int(*n),
            Literal::Bytes(b) => Self::Bytes(b.clone()),
        }
    }
}

/// Everything a run can observe.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Outcome {
    pub result: Result<Value, String>,
    pub logs: Vec<Vec<u8>>,
}

struct Machine<'a> {
    program: &'a LinearProgram,
    stack: Vec<Value>,
    slots: Vec<Value>,
    pool: Vec<Value>,
    frames: Vec<usize>,
    logs: Vec<Vec<u8>>,
}

pub fn run(program: &LinearProgram) -> Outcome {
    let mut m = Machine {
        program,
        stack: Vec::new(),
        slots: vec![Value::Int(0); SLOTS],
        pool: Vec::new(),
        frames: Vec::new(),
        logs: Vec::new(),
    };
    let result = m.exec();
    Outcome {
        result,
        logs: m.logs,
    }
}

impl Machine<'_> {
    fn pop(&mut self) -> Result<Value, String> {
        self.stack.pop().ok_or_else(|| "stack underflow".to_owned())
    }

    fn pop_int(&mut self) -> Result<u64, String> {
        match self.pop()? {
            Value::Int(n) => Ok(n),
            Value::Bytes(_) => Err("expected an integer".to_owned()),
        }
    }

    fn pop_bytes(&mut self) -> Result<Vec<u8>, String> {
        match self.pop()? {
            Value::Bytes(b) => Ok(b),
            Value::Int(_) => Err("expected bytes".to_owned()),
        }
    }

    fn exec(&mut self) -> Result<Value, String> {
        let program = self.program;
        let mut pc = 0;
        for _ in 0..STEP_LIMIT {
            let inst = program
                .instructions
                .get(pc)
                .ok_or_else(|| format!("fell off the end at {pc}"))?;
            pc += 1;
            match &inst.op {
                Op::Pragma(_) => {}
                Op::ConstBlock(lits) => self.pool = lits.iter().map(Value::from).collect(),
                Op::Push(lit) => self.stack.push(lit.into()),
                Op::Const(i) => {
                    let v = self.pool.get(*i).cloned().ok_or("bad pool index")?;
                    self.stack.push(v);
                }
                Op::Store(s) => {
                    let v = self.pop()?;
                    self.slots[usize::from(*s)] = v;
                }
                Op::Load(s) => self.stack.push(self.slots[usize::from(*s)].clone()),
                Op::Basic(op) => self.basic(op)?,
                Op::Branch(a) => {
                    if self.pop_int()? != 0 {
                        pc = *a;
                    }
                }
                Op::BranchZero(a) => {
                    if self.pop_int()? == 0 {
                        pc = *a;
                    }
                }
                Op::Jump(a) => pc = *a,
                Op::Call(a) => {
                    self.frames.push(pc);
                    pc = *a;
                }
                Op::Retsub => pc = self.frames.pop().ok_or("retsub outside a call")?,
                Op::Return => return self.pop(),
            }
        }
        Err("step limit".to_owned())
    }

    fn basic(&mut self, op: &Opcode) -> Result<(), String> {
        let arith = |a: u64, b: u64, op: &Opcode| -> Option<u64> {
            match op {
                Opcode::Add => a.checked_add(b),
                Opcode::Sub => a.checked_sub(b),
                Opcode::Mul => a.checked_mul(b),
                Opcode::Div => a.checked_div(b),
                Opcode::Mod => a.checked_rem(b),
                Opcode::Eq => Some(u64::from(a == b)),
                Opcode::Ne => Some(u64::from(a != b)),
                Opcode::Lt => Some(u64::from(a < b)),
                Opcode::Gt => Some(u64::from(a > b)),
                Opcode::Le => Some(u64::from(a <= b)),
                Opcode::Ge => Some(u64::from(a >= b)),
                Opcode::LogicalAnd => Some(u64::from(a != 0 && b != 0)),
                Opcode::LogicalOr => Some(u64::from(a != 0 || b != 0)),
                _ => None,
            }
        };
        match op {
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::Eq
            | Opcode::Ne
            | Opcode::Lt
            | Opcode::Gt
            | Opcode::Le
            | Opcode::Ge
            | Opcode::LogicalAnd
            | Opcode::LogicalOr => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                let v = arith(a, b, op).ok_or_else(|| format!("`{op}` failed"))?;
                self.stack.push(Value::Int(v));
            }
            Opcode::Not => {
                let a = self.pop_int()?;
                self.stack.push(Value::Int(u64::from(a == 0)));
            }
            Opcode::Itob => {
                let a = self.pop_int()?;
                self.stack.push(Value::Bytes(a.to_be_bytes().to_vec()));
            }
            Opcode::Btoi => {
                let b = self.pop_bytes()?;
                let arr: [u8; 8] = b.try_into().map_err(|_| "btoi of wrong length")?;
                self.stack.push(Value::Int(u64::from_be_bytes(arr)));
            }
            Opcode::Len => {
                let b = self.pop_bytes()?;
                self.stack.push(Value::Int(b.len() as u64));
            }
            Opcode::Concat => {
                let b = self.pop_bytes()?;
                let mut a = self.pop_bytes()?;
                a.extend(b);
                self.stack.push(Value::Bytes(a));
            }
            Opcode::Pop => {
                self.pop()?;
            }
            Opcode::Dup => {
                let v = self.pop()?;
                self.stack.push(v.clone());
                self.stack.push(v);
            }
            Opcode::Log => {
                let b = self.pop_bytes()?;
                self.logs.push(b);
            }
            Opcode::Assert => {
                if self.pop_int()? == 0 {
                    return Err("assert failed".to_owned());
                }
            }
            Opcode::Err => return Err("err".to_owned()),
            other => return Err(format!("unsupported opcode `{other}`")),
        }
        Ok(())
    }
}
