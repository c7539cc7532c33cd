//! The driver that runs managed frames.
//!
//! A routine never calls another managed function on the native stack.
//! It returns the frame to run next instead:
//!
//! - `Some(callee)` after setting up a call,
//! - `Some(ci)` after a tail call replaced its own frame,
//! - `Some(caller)` after returning from a frame that is not fresh,
//! - `None` after returning from the frame the driver started with.
//!
//! The driver loops until it gets `None`. Host code that needs the
//! result of a call (metamethods, iterators, `pcall`) starts a nested
//! driver through [`Runtime::call`], which marks its first frame fresh.

use super::interp;
use crate::{
    aot,
    error::{Result, runtime_error},
    vm::{Compiled, Engine, FrameId, Runtime},
};

pub fn drive(rt: &mut Runtime, start: FrameId) -> Result<()> {
    rt.drivers += 1;
    rt.stats.max_drivers = rt.stats.max_drivers.max(rt.drivers);
    let mut next = Some(start);
    let result = loop {
        let Some(ci) = next else {
            break Ok(());
        };
        match dispatch(rt, ci) {
            Ok(n) => {
                if let Some(to) = n {
                    tracing::trace!(from = %ci, %to, "hand-off");
                }
                next = n;
            }
            Err(e) => break Err(e),
        }
    };
    rt.drivers -= 1;
    result
}

/// Runs frame `ci` until it calls, tail-calls or returns.
fn dispatch(rt: &mut Runtime, ci: FrameId) -> Result<Option<FrameId>> {
    rt.stats.dispatches += 1;
    let Some(cl) = rt.frame(ci).closure.clone() else {
        return Err(runtime_error("trampoline reached a native frame"));
    };
    match (rt.engine, cl.proto.compiled()) {
        (Engine::Compiled, Some(Compiled::Native(routine))) => routine(rt, ci),
        (Engine::Compiled, Some(Compiled::Routine(routine))) => {
            let routine = routine.clone();
            aot::run::execute(rt, ci, &routine)
        }
        _ => interp::execute(rt, ci),
    }
}
