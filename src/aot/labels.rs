//! Control-flow reconstruction.
//!
//! Every instruction gets its successor edges, built into an explicit
//! graph before anything is translated. Labels are the entry points the
//! translated code can be entered at: offset 0 plus the destination of
//! every edge that is not a plain fall-through.
//!
//! Jump arithmetic follows the bytecode: a displacement is relative to
//! the instruction after the jump, so `JMP sJ` at `pc` goes to
//! `pc + 1 + sJ`. A test at `pc` is always followed by a `JMP` at
//! `pc + 1`; the test either skips that jump (to `pc + 2`) or takes it,
//! which lands on `pc + 2 + sJ`.

use bumpalo::{Bump, collections::Vec};
use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;

use crate::{
    bytecode::{Instruction, OpCode},
    error::{Error, ErrorKind, Result, error},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Edge {
    /// To `pc + 1`.
    Fallthrough,
    /// An explicit displacement: `JMP`, loops and their exits.
    Jump,
    /// Over the next instruction, to `pc + 2`.
    Skip,
    /// A test taking the `JMP` that follows it.
    CondJump,
    /// Re-entry after a call to a managed function returns.
    Resume,
}

impl Edge {
    /// Whether the destination must be an entry point.
    #[inline]
    pub fn needs_label(self) -> bool {
        self != Edge::Fallthrough
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Succ {
    pub kind: Edge,
    pub to: u32,
}

/// Per-offset result of resolution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PcInfo {
    pub label: Option<u32>,
    /// If the next instruction is a `JMP`, where it goes.
    pub next_jump: Option<u32>,
    /// Whether `pc + 2` exists, so an instruction here may skip.
    pub can_skip: bool,
}

/// Control-flow graph of one function. The successor lists live in the
/// compile call's arena.
pub struct Cfg<'a> {
    succs: Vec<'a, Vec<'a, Succ>>,
}

impl<'a> Cfg<'a> {
    #[inline]
    pub fn len(&self) -> usize {
        self.succs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.succs.is_empty()
    }

    #[inline]
    pub fn successors(&self, pc: u32) -> &[Succ] {
        self.succs.get(pc as usize).map_or(&[], |s| &s[..])
    }

    /// Whether control can flow from `pc` into `pc + 1` without a label.
    #[inline]
    pub fn falls_through(&self, pc: u32) -> bool {
        self.successors(pc)
            .iter()
            .any(|s| s.kind == Edge::Fallthrough)
    }

    /// The one successor of kind `kind`.
    pub fn target(&self, pc: u32, kind: Edge) -> Option<u32> {
        self.successors(pc)
            .iter()
            .find(|s| s.kind == kind)
            .map(|s| s.to)
    }
}

/// Entry points of one function, numbered in offset order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSet {
    ids: HashMap<u32, u32, FxBuildHasher>,
    sorted: std::vec::Vec<u32>,
}

impl LabelSet {
    fn from_offsets(mut offsets: std::vec::Vec<u32>) -> Self {
        offsets.sort_unstable();
        offsets.dedup();
        let mut ids = HashMap::with_capacity_and_hasher(offsets.len(), FxBuildHasher);
        for (id, &pc) in offsets.iter().enumerate() {
            ids.insert(pc, id as u32);
        }
        Self {
            ids,
            sorted: offsets,
        }
    }

    #[inline]
    pub fn get(&self, pc: u32) -> Option<u32> {
        self.ids.get(&pc).copied()
    }

    #[inline]
    pub fn contains(&self, pc: u32) -> bool {
        self.ids.contains_key(&pc)
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    /// Labelled offsets, ascending.
    pub fn offsets(&self) -> &[u32] {
        &self.sorted
    }
}

pub struct Resolved<'a> {
    pub cfg: Cfg<'a>,
    pub labels: LabelSet,
    infos: Vec<'a, PcInfo>,
}

impl Resolved<'_> {
    #[inline]
    pub fn info(&self, pc: u32) -> PcInfo {
        self.infos.get(pc as usize).copied().unwrap_or_default()
    }
}

/// `pc + 1 + disp`, the destination of a relative jump at `pc`.
#[inline]
pub fn jump_target(pc: u32, disp: i64) -> i64 {
    pc as i64 + 1 + disp
}

/// Builds the graph and label set of `code`.
///
/// Fails with [`ErrorKind::Bytecode`] if a jump leaves the function,
/// control runs off the end, a test is not followed by a jump, or an
/// instruction lacks its `EXTRAARG` or `MMBIN*` companion, and with
/// [`ErrorKind::Unsupported`] for opcode numbers outside the table.
pub fn resolve<'a>(buf: &'a Bump, code: &[Instruction]) -> Result<Resolved<'a>> {
    if code.is_empty() {
        return Err(error(ErrorKind::Bytecode, "function has no instructions"));
    }
    let len = code.len() as u32;
    let mut succs = Vec::with_capacity_in(code.len(), buf);
    let mut offsets = vec![0];
    for pc in 0..len {
        let edges = successors(buf, code, pc)?;
        for s in edges.iter() {
            if s.to >= len {
                return Err(off_end(pc, s));
            }
            if s.kind.needs_label() {
                offsets.push(s.to);
            }
        }
        succs.push(edges);
    }
    let cfg = Cfg { succs };
    let labels = LabelSet::from_offsets(offsets);
    let mut infos = Vec::with_capacity_in(code.len(), buf);
    for pc in 0..len {
        let next_is_jump = code
            .get(pc as usize + 1)
            .is_some_and(|i| i.opcode() == Some(OpCode::Jmp));
        infos.push(PcInfo {
            label: labels.get(pc),
            next_jump: if next_is_jump {
                cfg.target(pc + 1, Edge::Jump)
            } else {
                None
            },
            can_skip: pc + 2 < len,
        });
    }
    Ok(Resolved { cfg, labels, infos })
}

fn successors<'a>(buf: &'a Bump, code: &[Instruction], pc: u32) -> Result<Vec<'a, Succ>> {
    use OpCode as O;

    let i = code[pc as usize];
    let Some(op) = i.opcode() else {
        return Err(error(
            ErrorKind::Unsupported,
            format!("invalid opcode {} at pc {pc}", i.opcode_raw()),
        ));
    };
    let mut out = Vec::with_capacity_in(2, buf);
    let mut edge = |kind, to: i64| -> Result<()> {
        let Ok(to) = u32::try_from(to) else {
            return Err(error(
                ErrorKind::Bytecode,
                format!("{} at pc {pc} jumps to {to}, before the function", op.name()),
            ));
        };
        out.push(Succ { kind, to });
        Ok(())
    };
    let next = pc as i64 + 1;
    let skip = pc as i64 + 2;

    match op {
        O::Jmp => edge(Edge::Jump, jump_target(pc, i.sj() as i64))?,
        _ if op.is_test() => {
            let jmp = companion(code, pc, op, &[O::Jmp])?;
            edge(Edge::Skip, skip)?;
            edge(Edge::CondJump, jump_target(pc + 1, jmp.sj() as i64))?;
        }
        O::LoadKX | O::NewTable => {
            companion(code, pc, op, &[O::ExtraArg])?;
            edge(Edge::Skip, skip)?;
        }
        O::SetList if i.k() => {
            companion(code, pc, op, &[O::ExtraArg])?;
            edge(Edge::Skip, skip)?;
        }
        O::LFalseSkip => edge(Edge::Skip, skip)?,
        _ if op.is_arith() => {
            companion(code, pc, op, &[O::MmBin, O::MmBinI, O::MmBinK])?;
            edge(Edge::Fallthrough, next)?;
            edge(Edge::Skip, skip)?;
        }
        O::Call => {
            edge(Edge::Fallthrough, next)?;
            edge(Edge::Resume, next)?;
        }
        O::ForLoop | O::TForLoop => {
            edge(Edge::Fallthrough, next)?;
            edge(Edge::Jump, jump_target(pc, -(i.bx() as i64)))?;
        }
        O::ForPrep => {
            edge(Edge::Fallthrough, next)?;
            edge(Edge::Jump, jump_target(pc, i.bx() as i64 + 1))?;
        }
        O::TForPrep => edge(Edge::Jump, jump_target(pc, i.bx() as i64))?,
        O::Return | O::Return0 | O::Return1 | O::TailCall | O::ExtraArg => {}
        _ => edge(Edge::Fallthrough, next)?,
    }
    Ok(out)
}

/// The instruction at `pc + 1`, which must be one of `expected`.
fn companion(code: &[Instruction], pc: u32, op: OpCode, expected: &[OpCode]) -> Result<Instruction> {
    match code.get(pc as usize + 1) {
        Some(&next) if next.opcode().is_some_and(|o| expected.contains(&o)) => Ok(next),
        Some(&next) => Err(error(
            ErrorKind::Bytecode,
            format!(
                "{} at pc {pc} is followed by {}, expected {}",
                op.name(),
                next.opcode().map_or("an invalid opcode", OpCode::name),
                expected[0].name(),
            ),
        )),
        None => Err(error(
            ErrorKind::Bytecode,
            format!("{} at pc {pc} is the last instruction", op.name()),
        )),
    }
}

#[cold]
fn off_end(pc: u32, s: &Succ) -> Error {
    let what = match s.kind {
        Edge::Fallthrough | Edge::Skip | Edge::Resume => "control runs off the end of the function",
        Edge::Jump | Edge::CondJump => "jump leaves the function",
    };
    error(
        ErrorKind::Bytecode,
        format!("{what} at pc {pc} (target {})", s.to),
    )
}
