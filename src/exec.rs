//! Execution of managed frames.
//!
//! Both engines are built from the same layer: [`FrameCtx`] holds a
//! frame's cached state and offers one method per instruction (in
//! `ops`), wrapped in the protection discipline `protect` assigns to
//! it. The interpreter decodes bytecode and calls those methods;
//! compiled routines, whether translated in-process or emitted as Rust
//! source, call them directly with operands resolved ahead of time.

pub mod frame;
pub mod interp;
pub mod ops;
pub mod protect;
pub mod trampoline;

pub use frame::{FrameCtx, Operand};
pub use protect::{Protection, protection};

pub use crate::vm::{
    meta::{OrderI, Tm},
    number::ArithOp,
};
