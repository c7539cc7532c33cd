use std::rc::Rc;

use crate::{
    error::{Result, runtime_error},
    vm::{FrameId, FunctionProto, LuaClosure, Runtime, Value},
};

/// A register, constant or immediate operand.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Operand {
    Reg(u8),
    Const(u32),
    Int(i64),
}

impl Operand {
    /// `RK(x)`: a constant if `k`, else a register.
    #[inline]
    pub fn rk(x: u8, k: bool) -> Self {
        if k {
            Operand::Const(x as u32)
        } else {
            Operand::Reg(x)
        }
    }
}

/// The running state of one Lua frame: the closure, a cached register
/// base and a cached trap flag.
///
/// Every protected operation goes through one of four disciplines.
/// They commit the pc (and possibly `top`) to the frame before the
/// operation, and refresh the trap flag after it:
///
/// | discipline     | commits       | refreshes trap |
/// |----------------|---------------|----------------|
/// | `protect`      | pc, top       | yes            |
/// | `protect_nt`   | pc            | yes            |
/// | `half_protect` | pc, top       | no             |
/// | `check_gc`     | pc, top=limit | yes            |
///
/// The base is only re-derived when the trap flag is set, either on
/// the next instruction fetch or explicitly through `update_stack`.
pub struct FrameCtx<'rt> {
    pub rt: &'rt mut Runtime,
    ci: FrameId,
    cl: Rc<LuaClosure>,
    base: usize,
    trap: bool,
}

impl<'rt> FrameCtx<'rt> {
    /// Starts or resumes frame `ci` at its saved pc. A frame starting
    /// at its first instruction reports its call event here, except
    /// vararg functions which report it after `VARARGPREP`.
    pub fn enter(rt: &'rt mut Runtime, ci: FrameId) -> Result<Self> {
        let frame = rt.frame(ci);
        let Some(cl) = frame.closure.clone() else {
            return Err(runtime_error("attempt to run a native frame as a routine"));
        };
        let pc = frame.savedpc;
        let mut trap = rt.hook_mask() != 0;
        if trap {
            if pc == 0 {
                if cl.proto.is_vararg {
                    trap = false;
                } else {
                    rt.hook_call(ci)?;
                }
            }
            rt.frame_mut(ci).trap = true;
        }
        let base = rt.frame(ci).func + 1;
        Ok(Self {
            rt,
            ci,
            cl,
            base,
            trap,
        })
    }

    /// The pc to continue at.
    #[inline]
    pub fn entry_pc(&self) -> u32 {
        self.rt.frame(self.ci).savedpc
    }

    #[inline]
    pub fn ci(&self) -> FrameId {
        self.ci
    }

    #[inline]
    pub fn proto(&self) -> &FunctionProto {
        &self.cl.proto
    }

    #[inline]
    pub(crate) fn lua_closure(&self) -> &Rc<LuaClosure> {
        &self.cl
    }

    #[inline]
    pub(crate) fn base(&self) -> usize {
        self.base
    }

    #[inline]
    pub fn trap(&self) -> bool {
        self.trap
    }

    /// Pre-instruction check: traces the instruction at `pc` if the
    /// trap is set.
    #[inline(always)]
    pub fn fetch(&mut self, pc: u32) -> Result<()> {
        if self.trap {
            self.trap = self.rt.trace_exec(self.ci, pc)?;
            self.update_base();
        }
        Ok(())
    }

    #[inline]
    pub fn save_pc(&mut self, pc: u32) {
        self.rt.frame_mut(self.ci).savedpc = pc + 1;
    }

    #[inline]
    pub fn save_state(&mut self, pc: u32) {
        self.save_pc(pc);
        self.rt.top = self.rt.frame(self.ci).top;
    }

    #[inline]
    pub fn update_trap(&mut self) {
        self.trap = self.rt.frame(self.ci).trap;
    }

    #[inline]
    pub fn update_base(&mut self) {
        self.base = self.rt.frame(self.ci).func + 1;
    }

    #[inline]
    pub fn update_stack(&mut self) {
        if self.trap {
            self.update_base();
        }
    }

    /// Full protection: the operation may raise, call into the runtime,
    /// grow the stack or change hooks.
    #[inline]
    pub fn protect<T>(&mut self, pc: u32, f: impl FnOnce(&mut Runtime) -> Result<T>) -> Result<T> {
        self.save_state(pc);
        let v = f(&mut *self.rt)?;
        self.update_trap();
        Ok(v)
    }

    /// Like `protect`, for operations that rely on `top` as it is.
    #[inline]
    pub fn protect_nt<T>(
        &mut self,
        pc: u32,
        f: impl FnOnce(&mut Runtime) -> Result<T>,
    ) -> Result<T> {
        self.save_pc(pc);
        let v = f(&mut *self.rt)?;
        self.update_trap();
        Ok(v)
    }

    /// For operations that may raise but never call back into code.
    #[inline]
    pub fn half_protect<T>(
        &mut self,
        pc: u32,
        f: impl FnOnce(&mut Runtime) -> Result<T>,
    ) -> Result<T> {
        self.save_state(pc);
        f(&mut *self.rt)
    }

    /// Runs a collection step if one is due, with the live part of the
    /// frame ending at `limit`.
    #[inline]
    pub fn check_gc(&mut self, pc: u32, limit: usize) {
        if self.rt.heap.should_step() {
            self.save_pc(pc);
            self.rt.top = limit;
            self.rt.heap.step();
            self.update_trap();
        }
    }

    #[inline(always)]
    pub(crate) fn reg(&self, r: u8) -> &Value {
        &self.rt.stack[self.base + r as usize]
    }

    #[inline(always)]
    pub(crate) fn set(&mut self, r: u8, v: Value) {
        self.rt.stack[self.base + r as usize] = v;
    }

    #[inline(always)]
    pub(crate) fn k(&self, idx: u32) -> &Value {
        &self.cl.proto.k[idx as usize]
    }

    #[inline(always)]
    pub(crate) fn operand(&self, o: Operand) -> Value {
        match o {
            Operand::Reg(r) => self.reg(r).clone(),
            Operand::Const(idx) => self.k(idx).clone(),
            Operand::Int(i) => Value::Int(i),
        }
    }

    /// Leaves the frame after its results were delivered: a fresh frame
    /// ends its driver, any other frame resumes its caller.
    #[inline]
    pub(crate) fn leave(fresh: bool, previous: Option<FrameId>) -> Option<FrameId> {
        if fresh { None } else { previous }
    }
}
