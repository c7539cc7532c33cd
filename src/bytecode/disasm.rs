use std::fmt::{Display, Formatter, Result, Write as _};

use super::{Constant, Instruction, OpCode, Prototype};
use crate::{aot::walker, vm::meta::Tm};

/// Full listing of a prototype tree, nested functions in walk order.
pub struct Listing<'a> {
    main: &'a Prototype,
}

impl Prototype {
    pub fn listing(&self) -> Listing<'_> {
        Listing { main: self }
    }
}

impl Display for Listing<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        for (index, proto) in walker::preorder(self.main).into_iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            fmt_proto(f, index, proto)?;
        }
        Ok(())
    }
}

fn fmt_proto(f: &mut Formatter<'_>, index: usize, p: &Prototype) -> Result {
    writeln!(
        f,
        "{} #{index} ({} instructions)",
        p.describe(),
        p.code.len()
    )?;
    writeln!(
        f,
        "{}{} params, {} slots, {} upvalues, {} constants, {} functions",
        p.num_params,
        if p.is_vararg { "+" } else { "" },
        p.max_stack_size,
        p.upvalues.len(),
        p.constants.len(),
        p.protos.len(),
    )?;
    let width = num_digits(p.code.len());
    for pc in 0..p.code.len() {
        writeln!(f, "  {}", Line { proto: p, pc, width })?;
    }
    if !p.constants.is_empty() {
        writeln!(f, "constants ({}):", p.constants.len())?;
        for (i, k) in p.constants.iter().enumerate() {
            writeln!(f, "  {i:width$}  {}", ConstPreview(k))?;
        }
    }
    if !p.upvalues.is_empty() {
        writeln!(f, "upvalues ({}):", p.upvalues.len())?;
        for (i, uv) in p.upvalues.iter().enumerate() {
            let name = uv.name.as_deref().unwrap_or("?");
            let place = if uv.in_stack { "register" } else { "upvalue" };
            writeln!(f, "  {i:width$}  {name} ({place} {})", uv.index)?;
        }
    }
    Ok(())
}

fn num_digits(v: usize) -> usize {
    use core::iter::successors;

    successors(Some(v), |&n| (n >= 10).then_some(n / 10)).count()
}

/// One instruction in `pc [line] NAME operands ; note` form.
pub struct Line<'a> {
    proto: &'a Prototype,
    pc: usize,
    width: usize,
}

impl<'a> Line<'a> {
    pub fn new(proto: &'a Prototype, pc: usize) -> Self {
        Self {
            proto,
            pc,
            width: num_digits(proto.code.len()),
        }
    }
}

impl Display for Line<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        let Self { proto, pc, width } = *self;
        let i = proto.code[pc];
        let line = match proto.line_at(pc) {
            Some(line) => line.to_string(),
            None => "-".to_owned(),
        };
        write!(f, "{pc:width$} [{line}] ")?;
        let Some(op) = i.opcode() else {
            return write!(f, "<invalid opcode {}>", i.opcode_raw());
        };
        let (operands, note) = operands(proto, pc, op, i);
        if operands.is_empty() {
            f.write_str(op.name())?;
        } else {
            write!(f, "{:<10} {operands}", op.name())?;
        }
        if !note.is_empty() {
            write!(f, " ; {note}")?;
        }
        Ok(())
    }
}

struct ConstPreview<'a>(&'a Constant);

impl Display for ConstPreview<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self.0 {
            Constant::Nil => f.write_str("nil"),
            Constant::Bool(v) => write!(f, "{v}"),
            Constant::Int(v) => write!(f, "{v}"),
            Constant::Float(v) => write!(f, "{}", crate::vm::number::fmt_float(*v)),
            Constant::Str(s) => write!(f, "{s:?}"),
        }
    }
}

fn operands(p: &Prototype, pc: usize, op: OpCode, i: Instruction) -> (String, String) {
    use OpCode as O;

    let (a, b, c) = (i.a(), i.b(), i.c());
    let isk = if i.k() { "k" } else { "" };
    let kst = |idx: usize| match p.constants.get(idx) {
        Some(k) => ConstPreview(k).to_string(),
        None => format!("<bad K{idx}>"),
    };
    let upname = |idx: u8| match p.upvalues.get(idx as usize) {
        Some(uv) => uv.name.clone().unwrap_or_else(|| "?".to_owned()),
        None => format!("<bad U{idx}>"),
    };
    let rk = |c: u8| {
        if i.k() {
            kst(c as usize)
        } else {
            String::new()
        }
    };
    let event = |c: u8| match Tm::from_u8(c) {
        Some(tm) => tm.name().to_owned(),
        None => format!("<bad event {c}>"),
    };
    let target = |disp: i64| (pc as i64 + 1 + disp).to_string();

    let mut note = String::new();
    let ops = match op {
        O::Move => format!("{a} {b}"),
        O::LoadI | O::LoadF => format!("{a} {}", i.sbx()),
        O::LoadK => {
            note = kst(i.bx() as usize);
            format!("{a} {}", i.bx())
        }
        O::LoadKX => {
            if let Some(extra) = p.code.get(pc + 1) {
                note = kst(extra.ax() as usize);
            }
            format!("{a}")
        }
        O::LoadFalse | O::LFalseSkip | O::LoadTrue => format!("{a}"),
        O::LoadNil => {
            note = format!("{} out", b as u32 + 1);
            format!("{a} {b}")
        }
        O::GetUpval | O::SetUpval => {
            note = upname(b);
            format!("{a} {b}")
        }
        O::GetTabUp => {
            note = format!("{} {}", upname(b), kst(c as usize));
            format!("{a} {b} {c}")
        }
        O::GetTable | O::GetI => format!("{a} {b} {c}"),
        O::GetField => {
            note = kst(c as usize);
            format!("{a} {b} {c}")
        }
        O::SetTabUp => {
            note = format!("{} {}", upname(a), kst(b as usize));
            let v = rk(c);
            if !v.is_empty() {
                let _ = write!(note, " {v}");
            }
            format!("{a} {b} {c}{isk}")
        }
        O::SetTable | O::SetI => {
            note = rk(c);
            format!("{a} {b} {c}{isk}")
        }
        O::SetField => {
            note = kst(b as usize);
            let v = rk(c);
            if !v.is_empty() {
                let _ = write!(note, " {v}");
            }
            format!("{a} {b} {c}{isk}")
        }
        O::NewTable => format!("{a} {b} {c}{isk}"),
        O::Self_ => {
            note = rk(c);
            format!("{a} {b} {c}{isk}")
        }
        O::AddI | O::ShrI | O::ShlI => format!("{a} {b} {}", i.sc()),
        O::AddK
        | O::SubK
        | O::MulK
        | O::ModK
        | O::PowK
        | O::DivK
        | O::IDivK
        | O::BAndK
        | O::BOrK
        | O::BXorK => {
            note = kst(c as usize);
            format!("{a} {b} {c}")
        }
        O::Add
        | O::Sub
        | O::Mul
        | O::Mod
        | O::Pow
        | O::Div
        | O::IDiv
        | O::BAnd
        | O::BOr
        | O::BXor
        | O::Shl
        | O::Shr => format!("{a} {b} {c}"),
        O::MmBin => {
            note = event(c);
            format!("{a} {b} {c}")
        }
        O::MmBinI => {
            note = event(c);
            if i.k() {
                note.push_str(" flip");
            }
            format!("{a} {} {c} {}", i.sb(), i.k() as u8)
        }
        O::MmBinK => {
            note = format!("{} {}", event(c), kst(b as usize));
            if i.k() {
                note.push_str(" flip");
            }
            format!("{a} {b} {c} {}", i.k() as u8)
        }
        O::Unm | O::BNot | O::Not | O::Len => format!("{a} {b}"),
        O::Concat => format!("{a} {b}"),
        O::Close | O::Tbc => format!("{a}"),
        O::Jmp => {
            note = format!("to {}", target(i.sj() as i64));
            format!("{}", i.sj())
        }
        O::Eq | O::Lt | O::Le => format!("{a} {b} {}", i.k() as u8),
        O::EqK => {
            note = kst(b as usize);
            format!("{a} {b} {}", i.k() as u8)
        }
        O::EqI | O::LtI | O::LeI | O::GtI | O::GeI => format!("{a} {} {}", i.sb(), i.k() as u8),
        O::Test => format!("{a} {}", i.k() as u8),
        O::TestSet => format!("{a} {b} {}", i.k() as u8),
        O::Call => {
            note = format!("{} in {} out", in_count(b), out_count(c));
            format!("{a} {b} {c}")
        }
        O::TailCall => {
            note = format!("{} in", in_count(b));
            format!("{a} {b} {c}{isk}")
        }
        O::Return => {
            note = format!("{} out", in_count(b));
            format!("{a} {b} {c}{isk}")
        }
        O::Return0 => String::new(),
        O::Return1 => format!("{a}"),
        O::ForLoop | O::TForLoop => {
            note = format!("to {}", target(-(i.bx() as i64)));
            format!("{a} {}", i.bx())
        }
        O::ForPrep => {
            note = format!("exit to {}", target(i.bx() as i64 + 1));
            format!("{a} {}", i.bx())
        }
        O::TForPrep => {
            note = format!("to {}", target(i.bx() as i64));
            format!("{a} {}", i.bx())
        }
        O::TForCall => format!("{a} {c}"),
        O::SetList => format!("{a} {b} {c}{isk}"),
        O::Closure => {
            note = format!("function #{}", i.bx());
            format!("{a} {}", i.bx())
        }
        O::VarArg => {
            note = format!("{} out", out_count(c));
            format!("{a} {c}")
        }
        O::VarArgPrep => format!("{a}"),
        O::ExtraArg => format!("{}", i.ax()),
    };
    (ops, note)
}

fn in_count(b: u8) -> String {
    if b == 0 {
        "all".to_owned()
    } else {
        (b - 1).to_string()
    }
}

fn out_count(c: u8) -> String {
    if c == 0 {
        "all".to_owned()
    } else {
        (c - 1).to_string()
    }
}
