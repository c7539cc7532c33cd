//! Translated routines.
//!
//! A [`Routine`] is one block per bytecode offset. Operands are decoded,
//! `EXTRAARG` suffixes folded in, fallbacks resolved against the
//! instruction before them and every jump replaced by the offset it
//! lands on. Both the in-process runner and the source emitter consume
//! this form.

use std::fmt;

use crate::{
    aot::{fallback::Fallback, labels::LabelSet},
    bytecode::Instruction,
    exec::{Operand, Protection},
    vm::{meta::OrderI, number::ArithOp},
};

pub struct Routine {
    /// Position in walk order.
    pub index: usize,
    /// `function <name:line>` of the source prototype.
    pub name: String,
    pub blocks: Box<[Block]>,
    pub labels: LabelSet,
}

impl Routine {
    #[inline]
    pub fn block(&self, pc: u32) -> Option<&Block> {
        self.blocks.get(pc as usize)
    }

    /// Name of the generated function.
    pub fn symbol(&self) -> String {
        format!("luaot_routine_{:02}", self.index)
    }
}

impl fmt::Debug for Routine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Routine")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("blocks", &self.blocks.len())
            .field("labels", &self.labels.offsets())
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct Block {
    pub pc: u32,
    /// The encoding this block was translated from.
    pub raw: Instruction,
    pub line: Option<u32>,
    pub label: Option<u32>,
    pub op: Op,
    pub protection: Protection,
}

/// What a conditional jump tests.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Test {
    Eq { a: u8, b: u8 },
    Lt { a: u8, b: u8 },
    Le { a: u8, b: u8 },
    EqK { a: u8, k: u32 },
    EqI { a: u8, imm: i32 },
    OrderI { a: u8, imm: i32, is_float: bool, cmp: OrderI },
    Truthy { a: u8 },
}

/// One decoded instruction. Jump operands are absolute offsets.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Op {
    Move { a: u8, b: u8 },
    LoadI { a: u8, v: i64 },
    LoadF { a: u8, v: f64 },
    /// `LOADK`, or `LOADKX` with its argument folded in (`skip`).
    LoadK { a: u8, k: u32, skip: bool },
    LoadBool { a: u8, v: bool, skip: bool },
    LoadNil { a: u8, b: u8 },
    GetUpval { a: u8, b: u8 },
    SetUpval { a: u8, b: u8 },
    GetTabUp { a: u8, b: u8, k: u32 },
    GetTable { a: u8, b: u8, c: u8 },
    GetI { a: u8, b: u8, c: u8 },
    GetField { a: u8, b: u8, k: u32 },
    SetTabUp { a: u8, k: u32, v: Operand },
    SetTable { a: u8, b: u8, v: Operand },
    SetI { a: u8, b: u8, v: Operand },
    SetField { a: u8, k: u32, v: Operand },
    NewTable { a: u8, hash: usize, array: usize },
    Self_ { a: u8, b: u8, key: Operand },
    /// Skips the next block when the fast path succeeds.
    Arith { op: ArithOp, a: u8, lhs: Operand, rhs: Operand },
    Fallback(Fallback),
    Unm { a: u8, b: u8 },
    BNot { a: u8, b: u8 },
    Not { a: u8, b: u8 },
    Len { a: u8, b: u8 },
    Concat { a: u8, n: u8 },
    Close { a: u8 },
    Tbc { a: u8 },
    Jmp { to: u32 },
    /// Goes to `to` if the test equals `k`, else skips the `JMP`.
    Cond { test: Test, k: bool, to: u32 },
    TestSet { a: u8, b: u8, k: bool, to: u32 },
    Call { a: u8, b: u8, c: u8 },
    TailCall { a: u8, b: u8, c: u8, k: bool },
    Return { a: u8, b: u8, c: u8, k: bool },
    Return0,
    Return1 { a: u8 },
    ForPrep { a: u8, exit: u32 },
    ForLoop { a: u8, body: u32 },
    TForPrep { a: u8, to: u32 },
    TForCall { a: u8, c: u8 },
    TForLoop { a: u8, body: u32 },
    SetList { a: u8, b: u8, first: usize, skip: bool },
    Closure { a: u8, index: u32 },
    VarArg { a: u8, c: u8 },
    VarArgPrep { a: u8 },
    /// Argument of the block before it; never executed.
    ExtraArg,
}

impl Op {
    /// Whether the block never continues into the next one.
    pub fn leaves(&self) -> bool {
        matches!(
            self,
            Op::Jmp { .. }
                | Op::Cond { .. }
                | Op::TestSet { .. }
                | Op::TailCall { .. }
                | Op::Return { .. }
                | Op::Return0
                | Op::Return1 { .. }
                | Op::TForPrep { .. }
                | Op::ExtraArg
                | Op::NewTable { .. }
                | Op::LoadK { skip: true, .. }
                | Op::LoadBool { skip: true, .. }
                | Op::SetList { skip: true, .. }
        )
    }
}
