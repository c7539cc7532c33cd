//! Runs a translated [`Routine`] in-process.
//!
//! The blocks carry everything the interpreter would decode at run
//! time, so this loop only dispatches on the prepared operation and
//! follows the resolved offsets.

use super::ir::{Op, Routine, Test};
use crate::{
    error::Result,
    exec::FrameCtx,
    vm::{FrameId, Runtime},
};

pub fn execute(rt: &mut Runtime, ci: FrameId, routine: &Routine) -> Result<Option<FrameId>> {
    let mut cx = FrameCtx::enter(rt, ci)?;
    let mut pc = cx.entry_pc();
    if !routine.labels.contains(pc) {
        return Err(super::bad_entry(routine.index, pc));
    }
    loop {
        let Some(block) = routine.block(pc) else {
            return Err(super::bad_entry(routine.index, pc));
        };
        cx.fetch(pc)?;
        let mut next = pc + 1;
        match block.op {
            Op::Move { a, b } => cx.move_(a, b),
            Op::LoadI { a, v } => cx.loadi(a, v),
            Op::LoadF { a, v } => cx.loadf(a, v),
            Op::LoadK { a, k, skip } => {
                cx.loadk(a, k);
                if skip {
                    next = pc + 2;
                }
            }
            Op::LoadBool { a, v, skip } => {
                cx.loadbool(a, v);
                if skip {
                    next = pc + 2;
                }
            }
            Op::LoadNil { a, b } => cx.loadnil(a, b),
            Op::GetUpval { a, b } => cx.getupval(a, b),
            Op::SetUpval { a, b } => cx.setupval(a, b),
            Op::GetTabUp { a, b, k } => cx.gettabup(pc, a, b, k)?,
            Op::GetTable { a, b, c } => cx.gettable(pc, a, b, c)?,
            Op::GetI { a, b, c } => cx.geti(pc, a, b, c)?,
            Op::GetField { a, b, k } => cx.getfield(pc, a, b, k)?,
            Op::SetTabUp { a, k, v } => cx.settabup(pc, a, k, v)?,
            Op::SetTable { a, b, v } => cx.settable(pc, a, b, v)?,
            Op::SetI { a, b, v } => cx.seti(pc, a, b, v)?,
            Op::SetField { a, k, v } => cx.setfield(pc, a, k, v)?,
            Op::NewTable { a, hash, array } => {
                cx.newtable(pc, a, hash, array);
                next = pc + 2;
            }
            Op::Self_ { a, b, key } => cx.self_(pc, a, b, key)?,
            Op::Arith { op, a, lhs, rhs } => {
                if cx.arith(pc, op, a, lhs, rhs)? {
                    next = pc + 2;
                }
            }
            Op::Fallback(f) => cx.fallback(pc, f.dest, f.lhs, f.rhs, f.event)?,
            Op::Unm { a, b } => cx.unm(pc, a, b)?,
            Op::BNot { a, b } => cx.bnot(pc, a, b)?,
            Op::Not { a, b } => cx.not(a, b),
            Op::Len { a, b } => cx.len(pc, a, b)?,
            Op::Concat { a, n } => cx.concat(pc, a, n)?,
            Op::Close { a } => cx.close(pc, a)?,
            Op::Tbc { a } => cx.tbc(pc, a)?,
            Op::Jmp { to } => {
                cx.jump();
                next = to;
            }
            Op::Cond { test, k, to } => {
                let cond = match test {
                    Test::Eq { a, b } => cx.eq(pc, a, b)?,
                    Test::Lt { a, b } => cx.lt(pc, a, b)?,
                    Test::Le { a, b } => cx.le(pc, a, b)?,
                    Test::EqK { a, k } => cx.eqk(a, k),
                    Test::EqI { a, imm } => cx.eqi(a, imm),
                    Test::OrderI {
                        a,
                        imm,
                        is_float,
                        cmp,
                    } => cx.order_i(pc, a, imm, is_float, cmp)?,
                    Test::Truthy { a } => cx.test(a),
                };
                next = if cx.cond(cond, k) { to } else { pc + 2 };
            }
            Op::TestSet { a, b, k, to } => {
                next = if cx.testset(a, b, k) { to } else { pc + 2 };
            }
            Op::Call { a, b, c } => {
                if let Some(callee) = cx.call(pc, a, b, c)? {
                    return Ok(Some(callee));
                }
            }
            Op::TailCall { a, b, c, k } => return cx.tailcall(pc, a, b, c, k),
            Op::Return { a, b, c, k } => return cx.ret(pc, a, b, c, k),
            Op::Return0 => return cx.ret0(pc),
            Op::Return1 { a } => return cx.ret1(pc, a),
            Op::ForPrep { a, exit } => {
                if cx.forprep(pc, a)? {
                    next = exit;
                }
            }
            Op::ForLoop { a, body } => {
                if cx.forloop(a) {
                    next = body;
                }
            }
            Op::TForPrep { a, to } => {
                cx.tforprep(pc, a)?;
                next = to;
            }
            Op::TForCall { a, c } => cx.tforcall(pc, a, c)?,
            Op::TForLoop { a, body } => {
                if cx.tforloop(a) {
                    next = body;
                }
            }
            Op::SetList { a, b, first, skip } => {
                cx.setlist(a, b, first)?;
                if skip {
                    next = pc + 2;
                }
            }
            Op::Closure { a, index } => cx.closure(pc, a, index)?,
            Op::VarArg { a, c } => cx.vararg(pc, a, c)?,
            Op::VarArgPrep { a } => cx.varargprep(pc, a)?,
            Op::ExtraArg => return Err(super::stray_extraarg(pc)),
        }
        pc = next;
    }
}
