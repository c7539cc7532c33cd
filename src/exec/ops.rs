//! Instruction semantics. Each method implements one opcode (or a
//! family sharing a shape) on a [`FrameCtx`], including its fast path
//! and the protection discipline around its slow path. The interpreter
//! and compiled routines call exactly these methods.

use super::frame::{FrameCtx, Operand};
use crate::{
    bytecode::MAXARG_C,
    error::{ErrorKind, Result, error},
    vm::{
        FrameId, Function, Value,
        call::{MULTRET, Precall},
        meta::{OrderI, Tm},
        number::{self, Arith, ArithOp, F2I},
    },
};

impl FrameCtx<'_> {
    #[inline(always)]
    pub fn move_(&mut self, a: u8, b: u8) {
        let v = self.reg(b).clone();
        self.set(a, v);
    }

    #[inline(always)]
    pub fn loadi(&mut self, a: u8, v: i64) {
        self.set(a, Value::Int(v));
    }

    #[inline(always)]
    pub fn loadf(&mut self, a: u8, v: f64) {
        self.set(a, Value::Float(v));
    }

    #[inline(always)]
    pub fn loadk(&mut self, a: u8, k: u32) {
        let v = self.k(k).clone();
        self.set(a, v);
    }

    #[inline(always)]
    pub fn loadbool(&mut self, a: u8, v: bool) {
        self.set(a, Value::Bool(v));
    }

    /// `R[a], ..., R[a+b] := nil`.
    #[inline(always)]
    pub fn loadnil(&mut self, a: u8, b: u8) {
        let ra = self.base() + a as usize;
        for slot in &mut self.rt.stack[ra..=ra + b as usize] {
            *slot = Value::Nil;
        }
    }

    #[inline(always)]
    pub fn getupval(&mut self, a: u8, b: u8) {
        let v = self.rt.get_upval(&self.lua_closure().upvals[b as usize]);
        self.set(a, v);
    }

    #[inline(always)]
    pub fn setupval(&mut self, a: u8, b: u8) {
        let v = self.reg(a).clone();
        let uv = self.lua_closure().upvals[b as usize].clone();
        self.rt.set_upval(&uv, v);
        self.rt.heap.barrier();
    }

    /// `R[a] := t[key]` with a raw fast path, then the `__index` chain.
    #[inline(always)]
    fn get(&mut self, pc: u32, a: u8, t: Value, key: Value) -> Result<()> {
        if let Value::Table(tbl) = &t {
            let v = tbl.borrow().get(&key);
            if !v.is_nil() {
                self.set(a, v);
                return Ok(());
            }
        }
        let v = self.protect(pc, |rt| rt.index(t, &key))?;
        self.set(a, v);
        Ok(())
    }

    /// `t[key] := v` with a raw fast path for existing fields.
    #[inline(always)]
    fn put(&mut self, pc: u32, t: Value, key: Value, v: Value) -> Result<()> {
        if let Value::Table(tbl) = &t {
            let mut tbl = tbl.borrow_mut();
            if !tbl.get(&key).is_nil() {
                tbl.set(&key, v)?;
                drop(tbl);
                self.rt.heap.barrier();
                return Ok(());
            }
        }
        self.protect(pc, |rt| rt.set_index(t, key, v))
    }

    pub fn gettabup(&mut self, pc: u32, a: u8, b: u8, c: u32) -> Result<()> {
        let t = self.rt.get_upval(&self.lua_closure().upvals[b as usize]);
        let key = self.k(c).clone();
        self.get(pc, a, t, key)
    }

    pub fn gettable(&mut self, pc: u32, a: u8, b: u8, c: u8) -> Result<()> {
        let (t, key) = (self.reg(b).clone(), self.reg(c).clone());
        self.get(pc, a, t, key)
    }

    pub fn geti(&mut self, pc: u32, a: u8, b: u8, c: u8) -> Result<()> {
        let t = self.reg(b).clone();
        self.get(pc, a, t, Value::Int(c as i64))
    }

    pub fn getfield(&mut self, pc: u32, a: u8, b: u8, c: u32) -> Result<()> {
        let (t, key) = (self.reg(b).clone(), self.k(c).clone());
        self.get(pc, a, t, key)
    }

    pub fn settabup(&mut self, pc: u32, a: u8, b: u32, c: Operand) -> Result<()> {
        let t = self.rt.get_upval(&self.lua_closure().upvals[a as usize]);
        let (key, v) = (self.k(b).clone(), self.operand(c));
        self.put(pc, t, key, v)
    }

    pub fn settable(&mut self, pc: u32, a: u8, b: u8, c: Operand) -> Result<()> {
        let (t, key, v) = (self.reg(a).clone(), self.reg(b).clone(), self.operand(c));
        self.put(pc, t, key, v)
    }

    pub fn seti(&mut self, pc: u32, a: u8, b: u8, c: Operand) -> Result<()> {
        let (t, v) = (self.reg(a).clone(), self.operand(c));
        self.put(pc, t, Value::Int(b as i64), v)
    }

    pub fn setfield(&mut self, pc: u32, a: u8, b: u32, c: Operand) -> Result<()> {
        let (t, key, v) = (self.reg(a).clone(), self.k(b).clone(), self.operand(c));
        self.put(pc, t, key, v)
    }

    /// `hash` is the decoded hash size hint, `array` the array size
    /// with any `EXTRAARG` already folded in.
    pub fn newtable(&mut self, pc: u32, a: u8, hash: usize, array: usize) {
        let ra = self.base() + a as usize;
        self.rt.top = ra + 1;
        let t = self.rt.new_table(array, hash);
        self.set(a, Value::Table(t));
        self.check_gc(pc, ra + 1);
    }

    /// `R[a+1] := R[b]; R[a] := R[b][key]`.
    pub fn self_(&mut self, pc: u32, a: u8, b: u8, key: Operand) -> Result<()> {
        let t = self.reg(b).clone();
        let key = self.operand(key);
        self.set(a + 1, t.clone());
        self.get(pc, a, t, key)
    }

    /// Fast path of a binary operator. Returns `false` if the operands
    /// are not numbers, in which case the following `MMBIN*`
    /// instruction runs the fallback.
    #[inline(always)]
    pub fn arith(&mut self, pc: u32, op: ArithOp, a: u8, lhs: Operand, rhs: Operand) -> Result<bool> {
        if op.may_raise() {
            self.save_state(pc);
        }
        let (x, y) = (self.operand(lhs), self.operand(rhs));
        match number::arith_fast(op, &x, &y) {
            Arith::Done(v) => {
                self.set(a, v);
                Ok(true)
            }
            Arith::NotNumbers => Ok(false),
            Arith::DivByZero => Err(self.rt.div_by_zero(op)),
        }
    }

    /// The metamethod fallback of a failed binary operator.
    pub fn fallback(&mut self, pc: u32, dest: u8, lhs: Operand, rhs: Operand, event: Tm) -> Result<()> {
        let (x, y) = (self.operand(lhs), self.operand(rhs));
        let v = self.protect(pc, |rt| rt.try_bin_tm(&x, &y, event))?;
        self.set(dest, v);
        Ok(())
    }

    pub fn unm(&mut self, pc: u32, a: u8, b: u8) -> Result<()> {
        let rb = self.reg(b).clone();
        let v = match rb {
            Value::Int(i) => Value::Int(i.wrapping_neg()),
            Value::Float(f) => Value::Float(-f),
            _ => self.protect(pc, |rt| rt.try_bin_tm(&rb, &rb, Tm::Unm))?,
        };
        self.set(a, v);
        Ok(())
    }

    pub fn bnot(&mut self, pc: u32, a: u8, b: u8) -> Result<()> {
        let rb = self.reg(b).clone();
        let v = match number::to_int_ns(&rb) {
            Some(i) => Value::Int(!i),
            None => self.protect(pc, |rt| rt.try_bin_tm(&rb, &rb, Tm::BNot))?,
        };
        self.set(a, v);
        Ok(())
    }

    #[inline(always)]
    pub fn not(&mut self, a: u8, b: u8) {
        let v = self.reg(b).is_falsy();
        self.set(a, Value::Bool(v));
    }

    pub fn len(&mut self, pc: u32, a: u8, b: u8) -> Result<()> {
        let rb = self.reg(b).clone();
        let v = self.protect(pc, |rt| rt.objlen(&rb))?;
        self.set(a, v);
        Ok(())
    }

    /// `R[a] := R[a] .. ... .. R[a+n-1]`.
    pub fn concat(&mut self, pc: u32, a: u8, n: u8) -> Result<()> {
        let ra = self.base() + a as usize;
        self.rt.top = ra + n as usize;
        self.protect_nt(pc, |rt| rt.concat(n as usize))?;
        let top = self.rt.top;
        self.check_gc(pc, top);
        Ok(())
    }

    pub fn close(&mut self, pc: u32, a: u8) -> Result<()> {
        let ra = self.base() + a as usize;
        self.protect(pc, |rt| rt.close(ra))
    }

    pub fn tbc(&mut self, pc: u32, a: u8) -> Result<()> {
        let ra = self.base() + a as usize;
        self.half_protect(pc, |rt| rt.new_tbc(ra))
    }

    /// Unconditional jump bookkeeping.
    #[inline(always)]
    pub fn jump(&mut self) {
        self.update_trap();
    }

    /// Whether a conditional jump is taken, given the test outcome and
    /// the instruction's `k` flag.
    #[inline(always)]
    pub fn cond(&mut self, cond: bool, k: bool) -> bool {
        if cond == k {
            self.update_trap();
            true
        } else {
            false
        }
    }

    pub fn eq(&mut self, pc: u32, a: u8, b: u8) -> Result<bool> {
        let (x, y) = (self.reg(a).clone(), self.reg(b).clone());
        self.protect(pc, |rt| rt.equal(&x, &y))
    }

    pub fn lt(&mut self, pc: u32, a: u8, b: u8) -> Result<bool> {
        if let Some(r) = number::num_lt(self.reg(a), self.reg(b)) {
            return Ok(r);
        }
        let (x, y) = (self.reg(a).clone(), self.reg(b).clone());
        self.protect(pc, |rt| rt.less_than(&x, &y))
    }

    pub fn le(&mut self, pc: u32, a: u8, b: u8) -> Result<bool> {
        if let Some(r) = number::num_le(self.reg(a), self.reg(b)) {
            return Ok(r);
        }
        let (x, y) = (self.reg(a).clone(), self.reg(b).clone());
        self.protect(pc, |rt| rt.less_equal(&x, &y))
    }

    #[inline(always)]
    pub fn eqk(&self, a: u8, b: u32) -> bool {
        self.reg(a).raw_eq(self.k(b))
    }

    #[inline(always)]
    pub fn eqi(&self, a: u8, imm: i32) -> bool {
        match *self.reg(a) {
            Value::Int(i) => i == imm as i64,
            Value::Float(f) => f == imm as f64,
            _ => false,
        }
    }

    /// `LTI`, `LEI`, `GTI` and `GEI`.
    pub fn order_i(&mut self, pc: u32, a: u8, imm: i32, is_float: bool, cmp: OrderI) -> Result<bool> {
        let r = match *self.reg(a) {
            Value::Int(i) => Some(compare(cmp, i.cmp(&(imm as i64)))),
            Value::Float(f) => f.partial_cmp(&(imm as f64)).map(|o| compare(cmp, o)).or(Some(false)),
            _ => None,
        };
        if let Some(r) = r {
            return Ok(r);
        }
        let x = self.reg(a).clone();
        self.protect(pc, |rt| rt.call_order_i_tm(&x, imm, is_float, cmp))
    }

    #[inline(always)]
    pub fn test(&self, a: u8) -> bool {
        !self.reg(a).is_falsy()
    }

    /// Returns whether the jump is taken; copies `R[b]` to `R[a]` if so.
    #[inline(always)]
    pub fn testset(&mut self, a: u8, b: u8, k: bool) -> bool {
        if self.reg(b).is_falsy() == k {
            return false;
        }
        let v = self.reg(b).clone();
        self.set(a, v);
        self.update_trap();
        true
    }

    /// Returns the callee's frame if it must run before this one
    /// continues, `None` if a native callee already returned.
    pub fn call(&mut self, pc: u32, a: u8, b: u8, c: u8) -> Result<Option<FrameId>> {
        let ra = self.base() + a as usize;
        if b != 0 {
            self.rt.top = ra + b as usize;
        }
        self.save_pc(pc);
        match self.rt.precall(ra, c as i32 - 1)? {
            Precall::Native => {
                self.update_trap();
                Ok(None)
            }
            Precall::Lua(callee) => Ok(Some(callee)),
        }
    }

    /// Always leaves the routine: the returned frame runs next.
    pub fn tailcall(&mut self, pc: u32, a: u8, b: u8, c: u8, k: bool) -> Result<Option<FrameId>> {
        let ci = self.ci();
        let ra = self.base() + a as usize;
        let delta = if c != 0 {
            self.rt.frame(ci).nextraargs as usize + c as usize
        } else {
            0
        };
        let narg1 = if b != 0 {
            self.rt.top = ra + b as usize;
            b as usize
        } else {
            self.rt.top - ra
        };
        self.save_pc(pc);
        if k {
            let base = self.base();
            self.rt.close_upvals(base);
        }
        let frame = self.rt.frame(ci);
        let (fresh, previous) = (frame.is_fresh(), frame.previous);
        match self.rt.pretailcall(ci, ra, narg1, delta)? {
            None => Ok(Some(ci)),
            Some(n) => {
                self.rt.frame_mut(ci).func -= delta;
                self.rt.poscall(ci, n)?;
                Ok(Self::leave(fresh, previous))
            }
        }
    }

    pub fn ret(&mut self, pc: u32, a: u8, b: u8, c: u8, k: bool) -> Result<Option<FrameId>> {
        let ci = self.ci();
        let mut ra = self.base() + a as usize;
        let n = if b != 0 {
            b as usize - 1
        } else {
            self.rt.top - ra
        };
        self.save_pc(pc);
        if k {
            let ci_top = self.rt.frame(ci).top;
            if self.rt.top < ci_top {
                self.rt.top = ci_top;
            }
            let base = self.base();
            self.rt.close(base)?;
            self.update_trap();
            let old_base = self.base();
            self.update_stack();
            ra = ra - old_base + self.base();
        }
        let frame = self.rt.frame_mut(ci);
        if c != 0 {
            frame.func -= frame.nextraargs as usize + c as usize;
        }
        let (fresh, previous) = (frame.is_fresh(), frame.previous);
        self.rt.top = ra + n;
        self.rt.poscall(ci, n)?;
        Ok(Self::leave(fresh, previous))
    }

    pub fn ret0(&mut self, pc: u32) -> Result<Option<FrameId>> {
        let ci = self.ci();
        let frame = self.rt.frame(ci);
        let (fresh, previous) = (frame.is_fresh(), frame.previous);
        if self.rt.hook_mask() != 0 {
            self.rt.top = self.base();
            self.save_pc(pc);
            self.rt.poscall(ci, 0)?;
        } else {
            let wanted = frame.nresults;
            let res = self.base() - 1;
            self.rt.frames.pop();
            self.rt.top = res;
            for _ in 0..wanted.max(0) {
                self.rt.push(Value::Nil);
            }
        }
        Ok(Self::leave(fresh, previous))
    }

    pub fn ret1(&mut self, pc: u32, a: u8) -> Result<Option<FrameId>> {
        let ci = self.ci();
        let frame = self.rt.frame(ci);
        let (fresh, previous) = (frame.is_fresh(), frame.previous);
        let ra = self.base() + a as usize;
        if self.rt.hook_mask() != 0 {
            self.rt.top = ra + 1;
            self.save_pc(pc);
            self.rt.poscall(ci, 1)?;
        } else {
            let wanted = frame.nresults;
            let res = self.base() - 1;
            self.rt.frames.pop();
            if wanted == 0 {
                self.rt.top = res;
            } else {
                self.rt.stack[res] = std::mem::take(&mut self.rt.stack[ra]);
                self.rt.top = res + 1;
                for _ in 1..wanted.max(1) {
                    self.rt.push(Value::Nil);
                }
            }
        }
        Ok(Self::leave(fresh, previous))
    }

    /// Prepares a numeric loop. Returns `true` if the loop body must
    /// be skipped entirely.
    pub fn forprep(&mut self, pc: u32, a: u8) -> Result<bool> {
        let ra = self.base() + a as usize;
        let init = self.rt.stack[ra].clone();
        let limit = self.rt.stack[ra + 1].clone();
        let step = self.rt.stack[ra + 2].clone();
        if let (Value::Int(init), Value::Int(step)) = (&init, &step) {
            let (init, step) = (*init, *step);
            if step == 0 {
                return Err(self.for_error(pc, "'for' step is zero"));
            }
            self.rt.stack[ra + 3] = Value::Int(init);
            let Some(limit) = self.for_limit(pc, init, &limit, step)? else {
                return Ok(true);
            };
            let count = if step > 0 {
                let count = (limit as u64).wrapping_sub(init as u64);
                if step != 1 { count / step as u64 } else { count }
            } else {
                let count = (init as u64).wrapping_sub(limit as u64);
                count / ((-(step + 1)) as u64 + 1)
            };
            self.rt.stack[ra + 1] = Value::Int(count as i64);
            return Ok(false);
        }
        let Some(flimit) = number::to_float(&limit) else {
            return Err(self.for_error(pc, "'for' limit must be a number"));
        };
        let Some(fstep) = number::to_float(&step) else {
            return Err(self.for_error(pc, "'for' step must be a number"));
        };
        let Some(finit) = number::to_float(&init) else {
            return Err(self.for_error(pc, "'for' initial value must be a number"));
        };
        if fstep == 0.0 {
            return Err(self.for_error(pc, "'for' step is zero"));
        }
        let skip = if fstep > 0.0 {
            flimit < finit
        } else {
            finit < flimit
        };
        if skip {
            return Ok(true);
        }
        let stack = &mut self.rt.stack;
        stack[ra] = Value::Float(finit);
        stack[ra + 1] = Value::Float(flimit);
        stack[ra + 2] = Value::Float(fstep);
        stack[ra + 3] = Value::Float(finit);
        Ok(false)
    }

    /// The integer limit of a loop, clipped to the integer range.
    /// `None` if the loop runs zero times.
    fn for_limit(&mut self, pc: u32, init: i64, limit: &Value, step: i64) -> Result<Option<i64>> {
        let mode = if step < 0 { F2I::Ceil } else { F2I::Floor };
        let limit = match number::to_int(limit, mode) {
            Some(l) => l,
            None => {
                let Some(fl) = number::to_float(limit) else {
                    return Err(self.for_error(pc, "'for' limit must be a number"));
                };
                if 0.0 < fl {
                    if step < 0 {
                        return Ok(None);
                    }
                    i64::MAX
                } else {
                    if step > 0 {
                        return Ok(None);
                    }
                    i64::MIN
                }
            }
        };
        let skip = if step > 0 { init > limit } else { init < limit };
        Ok((!skip).then_some(limit))
    }

    #[cold]
    fn for_error(&mut self, pc: u32, msg: &'static str) -> crate::error::Error {
        self.save_state(pc);
        self.rt.runtime_error(msg)
    }

    /// One loop step. Returns `true` to jump back to the body.
    #[inline(always)]
    pub fn forloop(&mut self, a: u8) -> bool {
        let ra = self.base() + a as usize;
        let stack = &mut self.rt.stack;
        let again = match (&stack[ra], &stack[ra + 1], &stack[ra + 2]) {
            (Value::Int(idx), Value::Int(count), Value::Int(step)) => {
                let (idx, count, step) = (*idx, *count as u64, *step);
                if count > 0 {
                    let idx = idx.wrapping_add(step);
                    stack[ra] = Value::Int(idx);
                    stack[ra + 1] = Value::Int((count - 1) as i64);
                    stack[ra + 3] = Value::Int(idx);
                    true
                } else {
                    false
                }
            }
            _ => float_loop(stack, ra),
        };
        self.update_trap();
        again
    }

    pub fn tforprep(&mut self, pc: u32, a: u8) -> Result<()> {
        let ra = self.base() + a as usize;
        self.half_protect(pc, |rt| rt.new_tbc(ra + 3))
    }

    /// Calls the iterator: `R[a+4], ... ,R[a+3+c] := R[a](R[a+1], R[a+2])`.
    pub fn tforcall(&mut self, pc: u32, a: u8, c: u8) -> Result<()> {
        let ra = self.base() + a as usize;
        for i in 0..3 {
            self.rt.stack[ra + 4 + i] = self.rt.stack[ra + i].clone();
        }
        self.rt.top = ra + 4 + 3;
        self.protect_nt(pc, |rt| rt.call(ra + 4, c as i32))?;
        self.update_stack();
        Ok(())
    }

    /// Returns `true` to jump back to the loop body.
    #[inline(always)]
    pub fn tforloop(&mut self, a: u8) -> bool {
        let ra = self.base() + a as usize;
        let control = self.rt.stack[ra + 4].clone();
        if control.is_nil() {
            return false;
        }
        self.rt.stack[ra + 2] = control;
        true
    }

    /// Stores `R[a+1..]` into the table at `R[a]` from index
    /// `first + 1` on; `first` has any `EXTRAARG` already folded in.
    pub fn setlist(&mut self, a: u8, b: u8, first: usize) -> Result<()> {
        let ra = self.base() + a as usize;
        let n = if b == 0 {
            self.rt.top - ra - 1
        } else {
            self.rt.top = self.rt.frame(self.ci()).top;
            b as usize
        };
        let Value::Table(t) = self.rt.stack[ra].clone() else {
            let ty = self.rt.stack[ra].type_name();
            return Err(error(
                ErrorKind::Bytecode,
                format!("SETLIST target R[{a}] is a {ty}, not a table"),
            ));
        };
        let mut t = t.borrow_mut();
        t.reserve_array(first + n);
        for i in 1..=n {
            t.set_int((first + i) as i64, self.rt.stack[ra + i].clone());
        }
        drop(t);
        self.rt.heap.barrier();
        Ok(())
    }

    pub fn closure(&mut self, pc: u32, a: u8, bx: u32) -> Result<()> {
        let p = self.proto().protos[bx as usize].clone();
        let cl = self.lua_closure().clone();
        let base = self.base();
        let ncl = self.half_protect(pc, |rt| Ok(rt.new_closure(&p, &cl, base)))?;
        self.set(a, Value::Function(Function::Lua(ncl)));
        let ra = base + a as usize;
        self.check_gc(pc, ra + 1);
        Ok(())
    }

    /// `R[a], ..., R[a+c-2] := vararg`; all of them if `c` is 0.
    pub fn vararg(&mut self, pc: u32, a: u8, c: u8) -> Result<()> {
        let ci = self.ci();
        let ra = self.base() + a as usize;
        let wanted = if c == 0 { MULTRET } else { c as i32 - 1 };
        self.protect(pc, |rt| rt.get_varargs(ci, ra, wanted))
    }

    pub fn varargprep(&mut self, pc: u32, a: u8) -> Result<()> {
        let ci = self.ci();
        let fsize = self.proto().max_stack_size as usize;
        self.protect_nt(pc, |rt| rt.adjust_varargs(ci, a as usize, fsize))?;
        if self.trap() {
            self.rt.hook_call(ci)?;
            // the next instruction counts as a new line
            self.rt.hooks.oldpc = 1;
        }
        self.update_base();
        Ok(())
    }
}

/// Decodes `NEWTABLE`'s hash size hint.
#[inline]
pub fn hash_size(b: u8) -> usize {
    if b > 0 { 1 << (b - 1) } else { 0 }
}

/// Folds an `EXTRAARG` into a `C`-sized operand.
#[inline]
pub fn extend(c: u8, extra: u32) -> usize {
    c as usize + extra as usize * (MAXARG_C as usize + 1)
}

fn compare(cmp: OrderI, o: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering;
    match cmp {
        OrderI::Lt => o == Ordering::Less,
        OrderI::Le => o != Ordering::Greater,
        OrderI::Gt => o == Ordering::Greater,
        OrderI::Ge => o != Ordering::Less,
    }
}

fn float_loop(stack: &mut [Value], ra: usize) -> bool {
    let (Value::Float(idx), Value::Float(limit), Value::Float(step)) =
        (&stack[ra], &stack[ra + 1], &stack[ra + 2])
    else {
        return false;
    };
    let idx = idx + step;
    let again = if 0.0 < *step {
        idx <= *limit
    } else {
        *limit <= idx
    };
    if again {
        stack[ra] = Value::Float(idx);
        stack[ra + 3] = Value::Float(idx);
    }
    again
}
