//! The interpreter: decodes one instruction at a time and runs it
//! through the shared primitives. Used for prototypes without a bound
//! routine and whenever [`Engine::Interpreted`] is selected.
//!
//! [`Engine::Interpreted`]: crate::vm::Engine::Interpreted

use super::{
    frame::{FrameCtx, Operand},
    ops::{extend, hash_size},
};
use crate::{
    aot::{self, fallback},
    bytecode::{Instruction, OpCode},
    error::{ErrorKind, Result, error},
    vm::{FrameId, Runtime, meta::OrderI},
};

pub fn execute(rt: &mut Runtime, ci: FrameId) -> Result<Option<FrameId>> {
    let mut cx = FrameCtx::enter(rt, ci)?;
    let proto = cx.lua_closure().proto.clone();
    let code = &proto.code[..];
    let mut pc = cx.entry_pc();
    loop {
        let i = fetch(code, pc)?;
        cx.fetch(pc)?;
        let Some(op) = i.opcode() else {
            return Err(error(
                ErrorKind::Unsupported,
                format!("invalid opcode {} at pc {pc}", i.opcode_raw()),
            ));
        };
        let (a, b, c, k) = (i.a(), i.b(), i.c(), i.k());
        let mut next = pc + 1;

        use OpCode as O;
        match op {
            O::Move => cx.move_(a, b),
            O::LoadI => cx.loadi(a, i.sbx() as i64),
            O::LoadF => cx.loadf(a, i.sbx() as f64),
            O::LoadK => cx.loadk(a, i.bx()),
            O::LoadKX => {
                cx.loadk(a, fetch(code, pc + 1)?.ax());
                next = pc + 2;
            }
            O::LoadFalse => cx.loadbool(a, false),
            O::LFalseSkip => {
                cx.loadbool(a, false);
                next = pc + 2;
            }
            O::LoadTrue => cx.loadbool(a, true),
            O::LoadNil => cx.loadnil(a, b),
            O::GetUpval => cx.getupval(a, b),
            O::SetUpval => cx.setupval(a, b),
            O::GetTabUp => cx.gettabup(pc, a, b, c as u32)?,
            O::GetTable => cx.gettable(pc, a, b, c)?,
            O::GetI => cx.geti(pc, a, b, c)?,
            O::GetField => cx.getfield(pc, a, b, c as u32)?,
            O::SetTabUp => cx.settabup(pc, a, b as u32, Operand::rk(c, k))?,
            O::SetTable => cx.settable(pc, a, b, Operand::rk(c, k))?,
            O::SetI => cx.seti(pc, a, b, Operand::rk(c, k))?,
            O::SetField => cx.setfield(pc, a, b as u32, Operand::rk(c, k))?,
            O::NewTable => {
                let extra = if k { fetch(code, pc + 1)?.ax() } else { 0 };
                cx.newtable(pc, a, hash_size(b), extend(c, extra));
                next = pc + 2;
            }
            O::Self_ => cx.self_(pc, a, b, Operand::rk(c, k))?,
            _ if op.is_arith() => {
                let Some((arith, lhs, rhs)) = fallback::binary(i) else {
                    return Err(error(ErrorKind::Bytecode, format!("bad operator at pc {pc}")));
                };
                if cx.arith(pc, arith, a, lhs, rhs)? {
                    next = pc + 2;
                }
            }
            O::MmBin | O::MmBinI | O::MmBinK => {
                let prev = pc.checked_sub(1).map(|p| code[p as usize]);
                let f = fallback::resolve(pc, prev, i)?;
                cx.fallback(pc, f.dest, f.lhs, f.rhs, f.event)?;
            }
            O::Unm => cx.unm(pc, a, b)?,
            O::BNot => cx.bnot(pc, a, b)?,
            O::Not => cx.not(a, b),
            O::Len => cx.len(pc, a, b)?,
            O::Concat => cx.concat(pc, a, b)?,
            O::Close => cx.close(pc, a)?,
            O::Tbc => cx.tbc(pc, a)?,
            O::Jmp => {
                cx.jump();
                next = target(code, pc, pc as i64 + 1 + i.sj() as i64)?;
            }
            O::Eq | O::Lt | O::Le | O::EqK | O::EqI | O::LtI | O::LeI | O::GtI | O::GeI | O::Test => {
                let cond = match op {
                    O::Eq => cx.eq(pc, a, b)?,
                    O::Lt => cx.lt(pc, a, b)?,
                    O::Le => cx.le(pc, a, b)?,
                    O::EqK => cx.eqk(a, b as u32),
                    O::EqI => cx.eqi(a, i.sb()),
                    O::LtI => cx.order_i(pc, a, i.sb(), c != 0, OrderI::Lt)?,
                    O::LeI => cx.order_i(pc, a, i.sb(), c != 0, OrderI::Le)?,
                    O::GtI => cx.order_i(pc, a, i.sb(), c != 0, OrderI::Gt)?,
                    O::GeI => cx.order_i(pc, a, i.sb(), c != 0, OrderI::Ge)?,
                    _ => cx.test(a),
                };
                next = if cx.cond(cond, k) {
                    next_jump(code, pc)?
                } else {
                    pc + 2
                };
            }
            O::TestSet => {
                next = if cx.testset(a, b, k) {
                    next_jump(code, pc)?
                } else {
                    pc + 2
                };
            }
            O::Call => {
                if let Some(callee) = cx.call(pc, a, b, c)? {
                    return Ok(Some(callee));
                }
            }
            O::TailCall => return cx.tailcall(pc, a, b, c, k),
            O::Return => return cx.ret(pc, a, b, c, k),
            O::Return0 => return cx.ret0(pc),
            O::Return1 => return cx.ret1(pc, a),
            O::ForLoop => {
                if cx.forloop(a) {
                    next = target(code, pc, pc as i64 + 1 - i.bx() as i64)?;
                }
            }
            O::ForPrep => {
                if cx.forprep(pc, a)? {
                    next = target(code, pc, pc as i64 + i.bx() as i64 + 2)?;
                }
            }
            O::TForPrep => {
                cx.tforprep(pc, a)?;
                next = target(code, pc, pc as i64 + 1 + i.bx() as i64)?;
            }
            O::TForCall => cx.tforcall(pc, a, c)?,
            O::TForLoop => {
                if cx.tforloop(a) {
                    next = target(code, pc, pc as i64 + 1 - i.bx() as i64)?;
                }
            }
            O::SetList => {
                let extra = if k {
                    next = pc + 2;
                    fetch(code, pc + 1)?.ax()
                } else {
                    0
                };
                cx.setlist(a, b, extend(c, extra))?;
            }
            O::Closure => cx.closure(pc, a, i.bx())?,
            O::VarArg => cx.vararg(pc, a, c)?,
            O::VarArgPrep => cx.varargprep(pc, a)?,
            O::ExtraArg => return Err(aot::stray_extraarg(pc)),
            _ => {
                return Err(error(
                    ErrorKind::Unsupported,
                    format!("no handler for {} at pc {pc}", op.name()),
                ));
            }
        }
        pc = next;
    }
}

#[inline(always)]
fn fetch(code: &[Instruction], pc: u32) -> Result<Instruction> {
    match code.get(pc as usize) {
        Some(&i) => Ok(i),
        None => Err(error(
            ErrorKind::Bytecode,
            format!("execution ran past the end of the code at pc {pc}"),
        )),
    }
}

fn target(code: &[Instruction], pc: u32, dest: i64) -> Result<u32> {
    if (0..code.len() as i64).contains(&dest) {
        Ok(dest as u32)
    } else {
        Err(error(
            ErrorKind::Bytecode,
            format!("jump at pc {pc} to {dest} leaves the function"),
        ))
    }
}

/// Destination of the `JMP` that follows the test at `pc`.
fn next_jump(code: &[Instruction], pc: u32) -> Result<u32> {
    let jmp = fetch(code, pc + 1)?;
    if jmp.opcode() != Some(OpCode::Jmp) {
        return Err(error(
            ErrorKind::Bytecode,
            format!("test at pc {pc} is not followed by a jump"),
        ));
    }
    target(code, pc + 1, pc as i64 + 2 + jmp.sj() as i64)
}
