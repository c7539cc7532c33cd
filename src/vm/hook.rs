//! Debug hooks: call, return, line and count events.
//!
//! Setting a hook raises the trap flag of every Lua frame, so a frame
//! notices on its next instruction fetch and starts tracing.

use super::{FrameId, MIN_STACK, Runtime, call::status};
use crate::error::Result;

pub(crate) const MASK_CALL: u8 = 1 << 0;
pub(crate) const MASK_RET: u8 = 1 << 1;
pub(crate) const MASK_LINE: u8 = 1 << 2;
pub(crate) const MASK_COUNT: u8 = 1 << 3;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HookMask(u8);

impl HookMask {
    pub const CALL: HookMask = HookMask(MASK_CALL);
    pub const RET: HookMask = HookMask(MASK_RET);
    pub const LINE: HookMask = HookMask(MASK_LINE);
    pub const COUNT: HookMask = HookMask(MASK_COUNT);

    pub fn contains(self, other: HookMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for HookMask {
    type Output = HookMask;

    fn bitor(self, rhs: HookMask) -> HookMask {
        HookMask(self.0 | rhs.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookEvent {
    Call,
    TailCall,
    Return,
    Line(u32),
    Count,
}

pub type HookFn = Box<dyn FnMut(&mut Runtime, HookEvent) -> Result<()>>;

pub(crate) struct HookState {
    pub(crate) hook: Option<HookFn>,
    pub(crate) mask: u8,
    base_count: i64,
    count: i64,
    /// Cleared while a hook runs.
    allow: bool,
    /// Last traced pc, for detecting new lines and backward jumps.
    pub(crate) oldpc: u32,
}

impl Default for HookState {
    fn default() -> Self {
        Self {
            hook: None,
            mask: 0,
            base_count: 0,
            count: 0,
            allow: true,
            oldpc: 0,
        }
    }
}

impl Runtime {
    /// Installs `f` for the events in `mask`. `count` is the number of
    /// instructions between two count events.
    pub fn set_hook(
        &mut self,
        f: impl FnMut(&mut Runtime, HookEvent) -> Result<()> + 'static,
        mask: HookMask,
        count: u32,
    ) {
        let mut mask = mask.0;
        if count == 0 {
            mask &= !MASK_COUNT;
        }
        if mask == 0 {
            return self.clear_hook();
        }
        self.hooks.hook = Some(Box::new(f));
        self.hooks.mask = mask;
        self.hooks.base_count = count as i64;
        self.hooks.count = count as i64;
        for ci in &mut self.frames {
            if ci.is_lua() {
                ci.trap = true;
            }
        }
    }

    pub fn clear_hook(&mut self) {
        self.hooks.hook = None;
        self.hooks.mask = 0;
    }

    #[inline]
    pub(crate) fn hook_mask(&self) -> u8 {
        self.hooks.mask
    }

    /// Runs the hook for `event` in the current frame. The hook gets
    /// `MIN_STACK` free slots and may call back into the runtime; it is
    /// not re-entered while it runs.
    pub(crate) fn run_hook(&mut self, event: HookEvent) -> Result<()> {
        if !self.hooks.allow {
            return Ok(());
        }
        let Some(mut f) = self.hooks.hook.take() else {
            return Ok(());
        };
        let ci = self.current();
        let saved_top = self.top;
        let saved_ci_top = self.frame(ci).top;
        if self.frame(ci).is_lua() && self.top < saved_ci_top {
            self.top = saved_ci_top;
        }
        let mut result = self.check_stack(MIN_STACK);
        if result.is_ok() {
            let top = self.top;
            let frame = self.frame_mut(ci);
            frame.top = frame.top.max(top + MIN_STACK);
            frame.status |= status::HOOKED;
            self.hooks.allow = false;
            result = f(self, event);
            self.hooks.allow = true;
        }
        // a hook may replace or clear itself
        if self.hooks.hook.is_none() && self.hooks.mask != 0 {
            self.hooks.hook = Some(f);
        }
        let frame = self.frame_mut(ci);
        frame.top = saved_ci_top;
        frame.status &= !status::HOOKED;
        self.top = saved_top;
        result
    }

    /// Call event for a managed frame about to run its first instruction.
    pub(crate) fn hook_call(&mut self, ci: FrameId) -> Result<()> {
        self.hooks.oldpc = 0;
        if self.hooks.mask & MASK_CALL == 0 {
            return Ok(());
        }
        let event = if self.frame(ci).is_tail() {
            HookEvent::TailCall
        } else {
            HookEvent::Call
        };
        self.frame_mut(ci).savedpc += 1;
        let result = self.run_hook(event);
        self.frame_mut(ci).savedpc -= 1;
        result
    }

    /// Return event, then resynchronize line tracing of the caller.
    pub(crate) fn ret_hook(&mut self, ci: FrameId) -> Result<()> {
        if self.hooks.mask & MASK_RET != 0 {
            self.run_hook(HookEvent::Return)?;
        }
        if let Some(prev) = self.frame(ci).previous {
            let caller = self.frame(prev);
            if caller.is_lua() {
                self.hooks.oldpc = caller.savedpc.saturating_sub(1);
            }
        }
        Ok(())
    }

    /// Per-instruction tracing for the instruction at `pc` of frame
    /// `ci`. Returns `false` (and clears the frame's trap) when no line
    /// or count hook is active.
    pub fn trace_exec(&mut self, ci: FrameId, pc: u32) -> Result<bool> {
        let mask = self.hooks.mask;
        if mask & (MASK_LINE | MASK_COUNT) == 0 {
            self.frame_mut(ci).trap = false;
            return Ok(false);
        }
        self.frame_mut(ci).savedpc = pc + 1;
        self.hooks.count -= 1;
        let count_hook = self.hooks.count == 0 && mask & MASK_COUNT != 0;
        if count_hook {
            self.hooks.count = self.hooks.base_count;
        } else if mask & MASK_LINE == 0 {
            return Ok(true);
        }
        let Some(cl) = self.frame(ci).closure.clone() else {
            return Ok(true);
        };
        let p = &cl.proto;
        let i = p.code[pc as usize];
        let uses_top = i.opcode().is_some_and(|op| op.uses_top()) && i.b() == 0;
        if !uses_top {
            self.top = self.frame(ci).top;
        }
        if count_hook {
            self.run_hook(HookEvent::Count)?;
        }
        if mask & MASK_LINE != 0 {
            let oldpc = if (self.hooks.oldpc as usize) < p.code.len() {
                self.hooks.oldpc
            } else {
                0
            };
            let line = p.line_at(pc as usize);
            if pc <= oldpc || p.line_at(oldpc as usize) != line {
                if let Some(line) = line {
                    self.run_hook(HookEvent::Line(line))?;
                }
            }
            self.hooks.oldpc = pc;
        }
        Ok(true)
    }
}
