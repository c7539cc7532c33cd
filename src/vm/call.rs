//! Call frames and the call/return primitives: frame setup for native
//! and managed callees, result movement, tail-call frame reuse,
//! variable arguments, upvalues and to-be-closed variables.

use std::{cell::RefCell, rc::Rc};

use super::{
    FunctionProto, MAX_NATIVE_CALLS, MIN_STACK, Runtime,
    meta::Tm,
    value::{Function, LuaClosure, NativeFunction, Upval, UpvalRef, Value},
};
use crate::{error::Result, exec::trampoline};

/// `nresults` of a call that keeps every result.
pub const MULTRET: i32 = -1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameId(u32);

impl FrameId {
    #[inline]
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) mod status {
    /// Outermost frame of a trampoline driver.
    pub const FRESH: u8 = 1 << 0;
    /// Entered through a tail call.
    pub const TAIL: u8 = 1 << 1;
    /// Running a hook.
    pub const HOOKED: u8 = 1 << 2;
}

/// Per-call descriptor. Frames form a chain through `previous`.
#[derive(Clone)]
pub struct CallInfo {
    pub(crate) func: usize,
    pub(crate) top: usize,
    pub(crate) previous: Option<FrameId>,
    pub(crate) nresults: i32,
    pub(crate) status: u8,
    /// Index of the next instruction to execute.
    pub(crate) savedpc: u32,
    pub(crate) trap: bool,
    pub(crate) nextraargs: u32,
    /// `None` for native frames.
    pub(crate) closure: Option<Rc<LuaClosure>>,
}

impl CallInfo {
    pub(crate) fn base(top: usize) -> Self {
        Self {
            func: 0,
            top,
            previous: None,
            nresults: 0,
            status: 0,
            savedpc: 0,
            trap: false,
            nextraargs: 0,
            closure: None,
        }
    }

    #[inline]
    pub fn is_lua(&self) -> bool {
        self.closure.is_some()
    }

    #[inline]
    pub fn is_fresh(&self) -> bool {
        self.status & status::FRESH != 0
    }

    #[inline]
    pub fn is_tail(&self) -> bool {
        self.status & status::TAIL != 0
    }

    #[inline]
    pub fn func(&self) -> usize {
        self.func
    }

    #[inline]
    pub fn top(&self) -> usize {
        self.top
    }

    #[inline]
    pub fn savedpc(&self) -> u32 {
        self.savedpc
    }

    #[inline]
    pub fn trap(&self) -> bool {
        self.trap
    }

    #[inline]
    pub fn previous(&self) -> Option<FrameId> {
        self.previous
    }

    pub fn closure(&self) -> Option<&Rc<LuaClosure>> {
        self.closure.as_ref()
    }
}

/// Outcome of preparing a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Precall {
    /// A native callee already ran and its results are in place.
    Native,
    /// A managed callee's frame is ready; run it next.
    Lua(FrameId),
}

impl Runtime {
    fn push_frame(&mut self, mut ci: CallInfo) -> FrameId {
        ci.previous = Some(self.current());
        self.frames.push(ci);
        self.stats.max_frames = self.stats.max_frames.max(self.frames.len());
        self.current()
    }

    /// Prepares a call to the function at `func` with its arguments up
    /// to `top`. Native callees run to completion here.
    pub fn precall(&mut self, func: usize, nresults: i32) -> Result<Precall> {
        loop {
            match &self.stack[func] {
                Value::Function(Function::Native(f)) => {
                    let f = f.clone();
                    self.precall_native(func, nresults, &f)?;
                    return Ok(Precall::Native);
                }
                Value::Function(Function::Lua(cl)) => {
                    let cl = cl.clone();
                    return self.precall_lua(func, nresults, cl).map(Precall::Lua);
                }
                _ => self.try_func_tm(func)?,
            }
        }
    }

    fn precall_lua(&mut self, func: usize, nresults: i32, cl: Rc<LuaClosure>) -> Result<FrameId> {
        let p = &cl.proto;
        let fsize = p.max_stack_size as usize;
        let nfixparams = p.num_params as usize;
        let narg = self.top - func - 1;
        self.check_stack(fsize)?;
        for _ in narg..nfixparams {
            self.push(Value::Nil);
        }
        let ci = self.push_frame(CallInfo {
            func,
            top: func + 1 + fsize,
            previous: None,
            nresults,
            status: 0,
            savedpc: 0,
            trap: false,
            nextraargs: 0,
            closure: Some(cl),
        });
        Ok(ci)
    }

    fn precall_native(
        &mut self,
        func: usize,
        nresults: i32,
        f: &Rc<NativeFunction>,
    ) -> Result<usize> {
        self.check_stack(MIN_STACK)?;
        let ci = self.push_frame(CallInfo {
            func,
            top: self.top + MIN_STACK,
            nresults,
            ..CallInfo::base(0)
        });
        if self.hooks.mask & super::hook::MASK_CALL != 0 {
            self.run_hook(super::HookEvent::Call)?;
        }
        let n = (f.f)(self)?;
        debug_assert!(n <= self.top - func - 1);
        self.poscall(ci, n)?;
        Ok(n)
    }

    /// Finishes frame `ci` (the current one): its `nres` results sit
    /// just below `top` and are moved to where the caller expects them.
    pub fn poscall(&mut self, ci: FrameId, nres: usize) -> Result<()> {
        debug_assert_eq!(ci, self.current());
        if self.hooks.mask != 0 {
            self.ret_hook(ci)?;
        }
        let CallInfo { func, nresults, .. } = *self.frame(ci);
        self.move_results(func, nres, nresults);
        self.frames.pop();
        Ok(())
    }

    fn move_results(&mut self, res: usize, nres: usize, wanted: i32) {
        let first = self.top - nres;
        let wanted = if wanted == MULTRET {
            nres
        } else {
            wanted as usize
        };
        for i in 0..wanted {
            self.stack[res + i] = if i < nres {
                std::mem::take(&mut self.stack[first + i])
            } else {
                Value::Nil
            };
        }
        self.top = res + wanted;
    }

    /// Reuses frame `ci` for a call to the function at `func`, moved
    /// down by `delta` slots. Returns `Some(n)` if the callee was
    /// native and already returned `n` results, `None` if `ci` now
    /// runs the managed callee.
    pub fn pretailcall(
        &mut self,
        ci: FrameId,
        mut func: usize,
        mut narg1: usize,
        delta: usize,
    ) -> Result<Option<usize>> {
        loop {
            match &self.stack[func] {
                Value::Function(Function::Native(f)) => {
                    let f = f.clone();
                    return self.precall_native(func, MULTRET, &f).map(Some);
                }
                Value::Function(Function::Lua(cl)) => {
                    let cl = cl.clone();
                    let fsize = cl.proto.max_stack_size as usize;
                    let nfixparams = cl.proto.num_params as usize;
                    self.check_stack(fsize.saturating_sub(delta))?;
                    let dst = self.frame(ci).func - delta;
                    for i in 0..narg1 {
                        self.stack[dst + i] = std::mem::take(&mut self.stack[func + i]);
                    }
                    func = dst;
                    while narg1 <= nfixparams {
                        self.stack[func + narg1] = Value::Nil;
                        narg1 += 1;
                    }
                    let frame = self.frame_mut(ci);
                    frame.func = func;
                    frame.top = func + 1 + fsize;
                    frame.savedpc = 0;
                    frame.nextraargs = 0;
                    frame.status |= status::TAIL;
                    frame.closure = Some(cl);
                    self.top = func + narg1;
                    return Ok(None);
                }
                _ => {
                    self.try_func_tm(func)?;
                    narg1 += 1;
                }
            }
        }
    }

    /// Inserts the `__call` handler of a non-function value below its
    /// arguments.
    fn try_func_tm(&mut self, func: usize) -> Result<()> {
        let tm = self.metamethod(&self.stack[func], Tm::Call);
        if tm.is_nil() {
            return Err(self.type_error(&self.stack[func], "call"));
        }
        self.check_stack(1)?;
        let mut p = self.top;
        while p > func {
            self.stack[p] = std::mem::take(&mut self.stack[p - 1]);
            p -= 1;
        }
        self.top += 1;
        self.stack[func] = tm;
        Ok(())
    }

    /// Calls from native code: runs a managed callee in a nested
    /// trampoline driver.
    pub fn call(&mut self, func: usize, nresults: i32) -> Result<()> {
        if self.native_calls >= MAX_NATIVE_CALLS {
            return Err(self.runtime_error("C stack overflow"));
        }
        self.native_calls += 1;
        let result = match self.precall(func, nresults) {
            Ok(Precall::Native) => Ok(()),
            Ok(Precall::Lua(ci)) => {
                self.frame_mut(ci).status |= status::FRESH;
                trampoline::drive(self, ci)
            }
            Err(e) => Err(e),
        };
        self.native_calls -= 1;
        result
    }

    /// Moves the function and its fixed parameters above the actual
    /// arguments, leaving the extra arguments below the new base.
    pub fn adjust_varargs(&mut self, ci: FrameId, nfixparams: usize, fsize: usize) -> Result<()> {
        let func = self.frame(ci).func;
        let actual = self.top - func - 1;
        let nextra = actual.saturating_sub(nfixparams);
        self.frame_mut(ci).nextraargs = nextra as u32;
        self.check_stack(fsize + 1)?;
        let f = self.stack[func].clone();
        self.push(f);
        for i in 1..=nfixparams {
            let v = std::mem::take(&mut self.stack[func + i]);
            self.push(v);
        }
        let frame = self.frame_mut(ci);
        frame.func += actual + 1;
        frame.top += actual + 1;
        Ok(())
    }

    /// Copies `wanted` extra arguments to `dst` (all of them if negative).
    pub fn get_varargs(&mut self, ci: FrameId, dst: usize, wanted: i32) -> Result<()> {
        let nextra = self.frame(ci).nextraargs as usize;
        let wanted = if wanted < 0 {
            self.check_stack(nextra)?;
            self.top = dst + nextra;
            nextra
        } else {
            wanted as usize
        };
        let func = self.frame(ci).func;
        for i in 0..wanted {
            self.stack[dst + i] = if i < nextra {
                self.stack[func - nextra + i].clone()
            } else {
                Value::Nil
            };
        }
        Ok(())
    }

    pub fn new_closure(
        &mut self,
        proto: &Rc<FunctionProto>,
        enclosing: &LuaClosure,
        base: usize,
    ) -> Rc<LuaClosure> {
        let upvals = proto
            .upvalues
            .iter()
            .map(|uv| {
                if uv.in_stack {
                    self.find_upval(base + uv.index as usize)
                } else {
                    enclosing.upvals[uv.index as usize].clone()
                }
            })
            .collect::<Box<[_]>>();
        self.heap
            .alloc(std::mem::size_of::<LuaClosure>() + upvals.len() * std::mem::size_of::<UpvalRef>());
        Rc::new(LuaClosure {
            proto: proto.clone(),
            upvals,
        })
    }

    /// The open upvalue for stack slot `level`, shared by every
    /// closure capturing it.
    pub fn find_upval(&mut self, level: usize) -> UpvalRef {
        self.open_upvals
            .entry(level)
            .or_insert_with(|| Rc::new(RefCell::new(Upval::Open(level))))
            .clone()
    }

    /// Closes every open upvalue at or above `level`.
    pub fn close_upvals(&mut self, level: usize) {
        let closing = self.open_upvals.split_off(&level);
        for (slot, uv) in closing {
            let v = self.stack[slot].clone();
            *uv.borrow_mut() = Upval::Closed(v);
        }
    }

    #[inline]
    pub fn get_upval(&self, uv: &UpvalRef) -> Value {
        match &*uv.borrow() {
            Upval::Open(slot) => self.stack[*slot].clone(),
            Upval::Closed(v) => v.clone(),
        }
    }

    #[inline]
    pub fn set_upval(&mut self, uv: &UpvalRef, v: Value) {
        match &mut *uv.borrow_mut() {
            Upval::Open(slot) => self.stack[*slot] = v,
            Upval::Closed(cell) => *cell = v,
        }
    }

    /// Marks stack slot `level` as a to-be-closed variable.
    pub fn new_tbc(&mut self, level: usize) -> Result<()> {
        let v = &self.stack[level];
        if v.is_falsy() {
            return Ok(());
        }
        if self.metamethod(v, Tm::Close).is_nil() {
            return Err(self.runtime_error("variable got a non-closable value"));
        }
        self.tbc.push(level);
        Ok(())
    }

    /// Closes upvalues and calls `__close` for to-be-closed variables
    /// at or above `level`, innermost first.
    pub fn close(&mut self, level: usize) -> Result<()> {
        self.close_upvals(level);
        self.close_tbc(level, Value::Nil)
    }

    fn close_tbc(&mut self, level: usize, err: Value) -> Result<()> {
        while let Some(&slot) = self.tbc.last() {
            if slot < level {
                break;
            }
            self.tbc.pop();
            let obj = self.stack[slot].clone();
            let tm = self.metamethod(&obj, Tm::Close);
            self.call_meta(tm, &[obj, err.clone()], 0)?;
        }
        Ok(())
    }

    /// Restores the state saved before a protected host call, after
    /// it failed with `err`.
    pub(crate) fn unwind(&mut self, frames: usize, level: usize, err: &Value) -> Result<()> {
        self.frames.truncate(frames);
        self.close_upvals(level);
        let top = self.top.max(level);
        self.top = top;
        let result = self.close_tbc(level, err.clone());
        self.top = level;
        result
    }
}
