//! Decoding of binary operators and of the `MMBIN*` instruction that
//! follows each of them.
//!
//! An arithmetic instruction whose fast path succeeds skips the next
//! instruction. When it fails, control falls through into `MMBIN`,
//! `MMBINI` or `MMBINK`, which only names the operands and the event:
//! the destination register comes from the arithmetic instruction just
//! before it. That one-instruction lookback is the whole contract.

use crate::{
    bytecode::{Instruction, OpCode},
    error::{ErrorKind, Result, error},
    exec::Operand,
    vm::{meta::Tm, number::ArithOp},
};

/// A resolved fallback: what to call, with which operands, and where
/// the result goes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fallback {
    pub dest: u8,
    pub lhs: Operand,
    pub rhs: Operand,
    pub event: Tm,
}

/// Operator and operands of an arithmetic instruction, `None` for any
/// other instruction.
pub fn binary(i: Instruction) -> Option<(ArithOp, Operand, Operand)> {
    use OpCode as O;
    let op = i.opcode()?;
    let rb = Operand::Reg(i.b());
    let imm = Operand::Int(i.sc() as i64);
    let kc = Operand::Const(i.c() as u32);
    Some(match op {
        O::AddI => (ArithOp::Add, rb, imm),
        O::ShrI => (ArithOp::Shr, rb, imm),
        // the immediate is the left operand of `SHLI`
        O::ShlI => (ArithOp::Shl, imm, rb),
        O::AddK => (ArithOp::Add, rb, kc),
        O::SubK => (ArithOp::Sub, rb, kc),
        O::MulK => (ArithOp::Mul, rb, kc),
        O::ModK => (ArithOp::Mod, rb, kc),
        O::PowK => (ArithOp::Pow, rb, kc),
        O::DivK => (ArithOp::Div, rb, kc),
        O::IDivK => (ArithOp::IDiv, rb, kc),
        O::BAndK => (ArithOp::BAnd, rb, kc),
        O::BOrK => (ArithOp::BOr, rb, kc),
        O::BXorK => (ArithOp::BXor, rb, kc),
        _ => {
            let arith = register_form(op)?;
            (arith, rb, Operand::Reg(i.c()))
        }
    })
}

fn register_form(op: OpCode) -> Option<ArithOp> {
    use OpCode as O;
    Some(match op {
        O::Add => ArithOp::Add,
        O::Sub => ArithOp::Sub,
        O::Mul => ArithOp::Mul,
        O::Mod => ArithOp::Mod,
        O::Pow => ArithOp::Pow,
        O::Div => ArithOp::Div,
        O::IDiv => ArithOp::IDiv,
        O::BAnd => ArithOp::BAnd,
        O::BOr => ArithOp::BOr,
        O::BXor => ArithOp::BXor,
        O::Shl => ArithOp::Shl,
        O::Shr => ArithOp::Shr,
        _ => return None,
    })
}

/// Resolves the `MMBIN*` instruction `mm` at `pc` against the
/// instruction before it.
pub fn resolve(pc: u32, prev: Option<Instruction>, mm: Instruction) -> Result<Fallback> {
    use OpCode as O;
    let Some(prev) = prev else {
        return Err(malformed(pc, "has no preceding instruction"));
    };
    let prev_op = prev.opcode();
    let event = match Tm::from_u8(mm.c()) {
        Some(event) if event.arith_op().is_some() => event,
        _ => return Err(malformed(pc, format!("names invalid event {}", mm.c()))),
    };
    let reg = Operand::Reg(mm.a());
    let (lhs, rhs) = match mm.opcode() {
        Some(O::MmBin) => {
            if !prev_op.is_some_and(|op| register_form(op).is_some()) {
                return Err(mismatch(pc, prev));
            }
            (reg, Operand::Reg(mm.b()))
        }
        Some(O::MmBinI) => {
            if !matches!(prev_op, Some(O::AddI | O::ShrI | O::ShlI)) {
                return Err(mismatch(pc, prev));
            }
            flip(mm.k(), reg, Operand::Int(mm.sb() as i64))
        }
        Some(O::MmBinK) => {
            if !matches!(prev_op, Some(op) if (O::AddK..=O::BXorK).contains(&op)) {
                return Err(mismatch(pc, prev));
            }
            flip(mm.k(), reg, Operand::Const(mm.b() as u32))
        }
        _ => return Err(malformed(pc, "is not a metamethod fallback")),
    };
    Ok(Fallback {
        dest: prev.a(),
        lhs,
        rhs,
        event,
    })
}

#[inline]
fn flip(flipped: bool, reg: Operand, other: Operand) -> (Operand, Operand) {
    if flipped { (other, reg) } else { (reg, other) }
}

#[cold]
fn mismatch(pc: u32, prev: Instruction) -> crate::error::Error {
    let name = prev.opcode().map_or("an invalid opcode", OpCode::name);
    malformed(pc, format!("follows {name}, not a matching arithmetic instruction"))
}

#[cold]
fn malformed(pc: u32, what: impl std::fmt::Display) -> crate::error::Error {
    error(ErrorKind::Bytecode, format!("fallback at pc {pc} {what}"))
}
