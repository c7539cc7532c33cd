//! The per-opcode translator.
//!
//! Walks a function's code once, in order, carrying the previous
//! instruction along: `MMBIN*` blocks are resolved against it, and
//! nothing else may look backwards.

use bumpalo::Bump;

use super::{
    fallback,
    ir::{Block, Op, Routine, Test},
    labels::{self, Edge, Resolved},
    walker::Tree,
};
use crate::{
    bytecode::{Instruction, OpCode},
    error::{ErrorKind, Result, error},
    exec::{
        Operand, protection,
        ops::{extend, hash_size},
    },
    vm::meta::OrderI,
};

/// Per-function translation state.
struct Translator<'r, 'a, T: Tree> {
    proto: &'r T,
    resolved: &'r Resolved<'a>,
    /// The instruction translated just before the current one.
    prev: Option<Instruction>,
}

pub fn translate<T: Tree>(buf: &Bump, index: usize, proto: &T) -> Result<Routine> {
    let code = proto.code();
    let resolved = labels::resolve(buf, code)?;
    let mut t = Translator {
        proto,
        resolved: &resolved,
        prev: None,
    };
    let mut blocks = Vec::with_capacity(code.len());
    for (pc, &raw) in code.iter().enumerate() {
        let pc = pc as u32;
        blocks.push(t.block(pc, raw)?);
        t.prev = Some(raw);
    }
    Ok(Routine {
        index,
        name: proto.describe(),
        blocks: blocks.into_boxed_slice(),
        labels: resolved.labels.clone(),
    })
}

impl<T: Tree> Translator<'_, '_, T> {
    fn block(&self, pc: u32, raw: Instruction) -> Result<Block> {
        let Some(op) = raw.opcode() else {
            return Err(error(
                ErrorKind::Unsupported,
                format!("invalid opcode {} at pc {pc}", raw.opcode_raw()),
            ));
        };
        Ok(Block {
            pc,
            raw,
            line: self.proto.lines().get(pc as usize).copied(),
            label: self.resolved.info(pc).label,
            op: self.op(pc, op, raw)?,
            protection: protection(op),
        })
    }

    fn op(&self, pc: u32, op: OpCode, i: Instruction) -> Result<Op> {
        use OpCode as O;

        let (a, b, c, k) = (i.a(), i.b(), i.c(), i.k());
        let rk = |x: u8| self.rk(pc, x, k);
        Ok(match op {
            O::Move => Op::Move { a, b },
            O::LoadI => Op::LoadI { a, v: i.sbx() as i64 },
            O::LoadF => Op::LoadF { a, v: i.sbx() as f64 },
            O::LoadK => Op::LoadK { a, k: self.constant(pc, i.bx())?, skip: false },
            O::LoadKX => Op::LoadK { a, k: self.constant(pc, self.extra(pc)?)?, skip: true },
            O::LoadFalse => Op::LoadBool { a, v: false, skip: false },
            O::LFalseSkip => Op::LoadBool { a, v: false, skip: true },
            O::LoadTrue => Op::LoadBool { a, v: true, skip: false },
            O::LoadNil => Op::LoadNil { a, b },
            O::GetUpval => Op::GetUpval { a, b },
            O::SetUpval => Op::SetUpval { a, b },
            O::GetTabUp => Op::GetTabUp { a, b, k: self.constant(pc, c as u32)? },
            O::GetTable => Op::GetTable { a, b, c },
            O::GetI => Op::GetI { a, b, c },
            O::GetField => Op::GetField { a, b, k: self.constant(pc, c as u32)? },
            O::SetTabUp => Op::SetTabUp { a, k: self.constant(pc, b as u32)?, v: rk(c)? },
            O::SetTable => Op::SetTable { a, b, v: rk(c)? },
            O::SetI => Op::SetI { a, b, v: rk(c)? },
            O::SetField => Op::SetField { a, k: self.constant(pc, b as u32)?, v: rk(c)? },
            O::NewTable => {
                let extra = if k { self.extra(pc)? } else { 0 };
                Op::NewTable { a, hash: hash_size(b), array: extend(c, extra) }
            }
            O::Self_ => Op::Self_ { a, b, key: rk(c)? },
            _ if op.is_arith() => {
                let Some((arith, lhs, rhs)) = fallback::binary(i) else {
                    return Err(error(ErrorKind::Bytecode, format!("bad operator at pc {pc}")));
                };
                if let Operand::Const(idx) = rhs {
                    self.constant(pc, idx)?;
                }
                Op::Arith { op: arith, a, lhs, rhs }
            }
            O::MmBin | O::MmBinI | O::MmBinK => {
                let f = fallback::resolve(pc, self.prev, i)?;
                for o in [f.lhs, f.rhs] {
                    if let Operand::Const(idx) = o {
                        self.constant(pc, idx)?;
                    }
                }
                Op::Fallback(f)
            }
            O::Unm => Op::Unm { a, b },
            O::BNot => Op::BNot { a, b },
            O::Not => Op::Not { a, b },
            O::Len => Op::Len { a, b },
            O::Concat => Op::Concat { a, n: b },
            O::Close => Op::Close { a },
            O::Tbc => Op::Tbc { a },
            O::Jmp => Op::Jmp { to: self.target(pc, Edge::Jump)? },
            O::Eq => self.cond(pc, Test::Eq { a, b }, k)?,
            O::Lt => self.cond(pc, Test::Lt { a, b }, k)?,
            O::Le => self.cond(pc, Test::Le { a, b }, k)?,
            O::EqK => self.cond(pc, Test::EqK { a, k: self.constant(pc, b as u32)? }, k)?,
            O::EqI => self.cond(pc, Test::EqI { a, imm: i.sb() }, k)?,
            O::LtI => self.order_i(pc, i, OrderI::Lt)?,
            O::LeI => self.order_i(pc, i, OrderI::Le)?,
            O::GtI => self.order_i(pc, i, OrderI::Gt)?,
            O::GeI => self.order_i(pc, i, OrderI::Ge)?,
            O::Test => self.cond(pc, Test::Truthy { a }, k)?,
            O::TestSet => Op::TestSet { a, b, k, to: self.target(pc, Edge::CondJump)? },
            O::Call => Op::Call { a, b, c },
            O::TailCall => Op::TailCall { a, b, c, k },
            O::Return => Op::Return { a, b, c, k },
            O::Return0 => Op::Return0,
            O::Return1 => Op::Return1 { a },
            O::ForPrep => Op::ForPrep { a, exit: self.target(pc, Edge::Jump)? },
            O::ForLoop => Op::ForLoop { a, body: self.target(pc, Edge::Jump)? },
            O::TForPrep => Op::TForPrep { a, to: self.target(pc, Edge::Jump)? },
            O::TForCall => Op::TForCall { a, c },
            O::TForLoop => Op::TForLoop { a, body: self.target(pc, Edge::Jump)? },
            O::SetList => {
                let extra = if k { self.extra(pc)? } else { 0 };
                Op::SetList { a, b, first: extend(c, extra), skip: k }
            }
            O::Closure => {
                let index = i.bx();
                if index as usize >= self.proto.num_children() {
                    return Err(error(
                        ErrorKind::Bytecode,
                        format!("CLOSURE at pc {pc} names missing function #{index}"),
                    ));
                }
                Op::Closure { a, index }
            }
            O::VarArg => Op::VarArg { a, c },
            O::VarArgPrep => Op::VarArgPrep { a },
            O::ExtraArg => Op::ExtraArg,
            _ => {
                return Err(error(
                    ErrorKind::Unsupported,
                    format!("no translation for {} at pc {pc}", op.name()),
                ));
            }
        })
    }

    fn cond(&self, pc: u32, test: Test, k: bool) -> Result<Op> {
        Ok(Op::Cond {
            test,
            k,
            to: self.target(pc, Edge::CondJump)?,
        })
    }

    fn order_i(&self, pc: u32, i: Instruction, cmp: OrderI) -> Result<Op> {
        let test = Test::OrderI {
            a: i.a(),
            imm: i.sb(),
            is_float: i.c() != 0,
            cmp,
        };
        self.cond(pc, test, i.k())
    }

    fn target(&self, pc: u32, kind: Edge) -> Result<u32> {
        match self.resolved.cfg.target(pc, kind) {
            Some(to) => Ok(to),
            None => Err(error(
                ErrorKind::Bytecode,
                format!("no {kind:?} edge at pc {pc}"),
            )),
        }
    }

    /// The `Ax` of the `EXTRAARG` at `pc + 1`, already checked by the
    /// resolver.
    fn extra(&self, pc: u32) -> Result<u32> {
        match self.proto.code().get(pc as usize + 1) {
            Some(next) if next.opcode() == Some(OpCode::ExtraArg) => Ok(next.ax()),
            _ => Err(error(
                ErrorKind::Bytecode,
                format!("missing EXTRAARG after pc {pc}"),
            )),
        }
    }

    fn constant(&self, pc: u32, idx: u32) -> Result<u32> {
        if (idx as usize) < self.proto.num_constants() {
            Ok(idx)
        } else {
            Err(error(
                ErrorKind::Bytecode,
                format!("constant {idx} at pc {pc} is out of range"),
            ))
        }
    }

    fn rk(&self, pc: u32, x: u8, k: bool) -> Result<Operand> {
        let o = Operand::rk(x, k);
        if let Operand::Const(idx) = o {
            self.constant(pc, idx)?;
        }
        Ok(o)
    }
}
