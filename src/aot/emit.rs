//! Rust source output.
//!
//! A generated file holds one function per prototype, the table of
//! those functions in walk order, the chunk they were compiled from and
//! an entry point that binds the table onto the reloaded chunk:
//!
//! ```text,ignore
//! pub fn luaot_routine_00(rt: &mut Runtime, ci: FrameId) -> Result<Option<FrameId>> { .. }
//! pub fn luaot_routine_01(rt: &mut Runtime, ci: FrameId) -> Result<Option<FrameId>> { .. }
//! pub static LUAOT_ROUTINES: &[NativeRoutine] = &[luaot_routine_00, luaot_routine_01];
//! static LUAOT_CHUNK: &[u8] = &[0x1b, 0x4c, ..];
//! pub fn luaopen_<module>(rt: &mut Runtime) -> Result<Vec<Value>> { .. }
//! ```
//!
//! Each routine is a `loop` over a `match` on the pc with one arm per
//! label. An arm runs the blocks from its label up to the next one;
//! jumps assign the pc and `continue`, returns leave the function.

use std::fmt::{self, Display, Write as _};

use super::{
    CompileOptions,
    ir::{Op, Routine, Test},
    walker,
};
use crate::{
    bytecode::{Chunk, Prototype, disasm::Line},
    error::{ErrorKind, Result, error},
    exec::Operand,
};

/// Derives the generated module's name from the output path:
/// `./foo/bar/baz.rs` is `foo_bar_baz`.
pub fn module_name(path: &str) -> Result<String> {
    let Some(stem) = path.strip_suffix(".rs") else {
        return Err(error(
            ErrorKind::Config,
            format!("output file {path:?} must end in .rs"),
        ));
    };
    let stem = stem.trim_start_matches("./");
    let mut name = String::with_capacity(stem.len());
    for ch in stem.chars() {
        match ch {
            '/' | '.' => name.push('_'),
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' => name.push(ch),
            _ => {
                return Err(error(
                    ErrorKind::Config,
                    format!("output file {path:?} contains {ch:?}, which cannot be part of a module name"),
                ));
            }
        }
    }
    match name.chars().next() {
        None => Err(error(ErrorKind::Config, format!("output file {path:?} has no name"))),
        Some(c) if c.is_ascii_digit() => Err(error(
            ErrorKind::Config,
            format!("module name {name:?} does not start with a letter or underscore"),
        )),
        Some(_) => Ok(name),
    }
}

/// Generates the source of module `module` for `chunk`, whose
/// prototypes translated to `routines` (in walk order).
pub fn emit_module(
    module: &str,
    chunk: &Chunk,
    routines: &[std::rc::Rc<Routine>],
    options: &CompileOptions,
) -> Result<String> {
    let protos = walker::preorder(&chunk.main);
    if protos.len() != routines.len() {
        return Err(error(
            ErrorKind::Config,
            format!(
                "{} routines for {} prototypes",
                routines.len(),
                protos.len()
            ),
        ));
    }
    let bytes = chunk.to_bytes()?;
    let mut out = String::new();
    write_module(&mut out, module, chunk, &protos, routines, &bytes, options)
        .map_err(|_| error(ErrorKind::Config, "failed to format generated code"))?;
    tracing::debug!(module, routines = routines.len(), bytes = out.len(), "emitted module");
    Ok(out)
}

fn write_module(
    out: &mut String,
    module: &str,
    chunk: &Chunk,
    protos: &[&Prototype],
    routines: &[std::rc::Rc<Routine>],
    bytes: &[u8],
    options: &CompileOptions,
) -> fmt::Result {
    let source = chunk.main.source.as_deref().unwrap_or("?");
    writeln!(out, "// Generated by luaot from {source:?}. Do not edit.")?;
    writeln!(out)?;
    writeln!(out, "#[allow(unused_imports)]")?;
    writeln!(out, "use luaot::{{")?;
    writeln!(out, "    error::Result,")?;
    writeln!(out, "    exec::{{ArithOp, FrameCtx, Operand, OrderI, Tm}},")?;
    writeln!(out, "    vm::{{FrameId, NativeRoutine, Runtime, Value}},")?;
    writeln!(out, "}};")?;

    for (routine, proto) in routines.iter().zip(protos) {
        writeln!(out)?;
        write_routine(out, routine, proto, options)?;
    }

    writeln!(out)?;
    writeln!(out, "pub static LUAOT_ROUTINES: &[NativeRoutine] = &[")?;
    for routine in routines {
        writeln!(out, "    {},", routine.symbol())?;
    }
    writeln!(out, "];")?;

    writeln!(out)?;
    writeln!(out, "static LUAOT_CHUNK: &[u8] = &[")?;
    for line in bytes.chunks(16) {
        out.push_str("   ");
        for b in line {
            write!(out, " 0x{b:02x},")?;
        }
        out.push('\n');
    }
    writeln!(out, "];")?;

    writeln!(out)?;
    writeln!(out, "pub fn luaopen_{module}(rt: &mut Runtime) -> Result<Vec<Value>> {{")?;
    writeln!(out, "    luaot::aot::open_bundle(rt, LUAOT_CHUNK, LUAOT_ROUTINES)")?;
    writeln!(out, "}}")?;
    Ok(())
}

const ARM: &str = "            ";
const BODY: &str = "                ";

fn write_routine(
    out: &mut String,
    routine: &Routine,
    proto: &Prototype,
    options: &CompileOptions,
) -> fmt::Result {
    writeln!(out, "// {} (#{})", routine.name, routine.index)?;
    writeln!(out, "#[allow(unused_mut, clippy::all)]")?;
    writeln!(
        out,
        "pub fn {}(rt: &mut Runtime, ci: FrameId) -> Result<Option<FrameId>> {{",
        routine.symbol()
    )?;
    writeln!(out, "    let mut cx = FrameCtx::enter(rt, ci)?;")?;
    writeln!(out, "    let mut pc = cx.entry_pc();")?;
    writeln!(out, "    loop {{")?;
    writeln!(out, "        match pc {{")?;

    let mut live = false;
    let mut open = false;
    for block in routine.blocks.iter() {
        let pc = block.pc;
        if let Some(label) = block.label {
            if open {
                if live {
                    writeln!(out, "{BODY}pc = {pc};")?;
                }
                writeln!(out, "{ARM}}}")?;
            }
            writeln!(out, "{ARM}// L{label}")?;
            writeln!(out, "{ARM}{pc} => {{")?;
            open = true;
            live = true;
        }
        if options.comments {
            write!(out, "{BODY}// {}", Line::new(proto, pc as usize))?;
            if options.protection {
                write!(out, " [{}]", block.protection.name())?;
            }
            out.push('\n');
        }
        if !live {
            if options.comments {
                writeln!(out, "{BODY}// not reached")?;
            }
            continue;
        }
        writeln!(out, "{BODY}cx.fetch({pc})?;")?;
        write_op(out, pc, &block.op)?;
        live = !block.op.leaves();
    }
    if open {
        writeln!(out, "{ARM}}}")?;
    }
    writeln!(out, "{ARM}_ => return Err(luaot::aot::bad_entry({}, pc)),", routine.index)?;
    writeln!(out, "        }}")?;
    writeln!(out, "    }}")?;
    writeln!(out, "}}")?;
    Ok(())
}

/// `Operand` as a Rust expression.
struct Expr(Operand);

impl Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Operand::Reg(r) => write!(f, "Operand::Reg({r})"),
            Operand::Const(k) => write!(f, "Operand::Const({k})"),
            Operand::Int(i) => write!(f, "Operand::Int({i})"),
        }
    }
}

fn goto(out: &mut String, to: u32) -> fmt::Result {
    writeln!(out, "{BODY}pc = {to};")?;
    writeln!(out, "{BODY}continue;")
}

fn goto_if(out: &mut String, cond: impl Display, to: u32) -> fmt::Result {
    writeln!(out, "{BODY}if {cond} {{")?;
    writeln!(out, "{BODY}    pc = {to};")?;
    writeln!(out, "{BODY}    continue;")?;
    writeln!(out, "{BODY}}}")
}

fn branch(out: &mut String, cond: impl Display, taken: u32, skipped: u32) -> fmt::Result {
    writeln!(out, "{BODY}pc = if {cond} {{ {taken} }} else {{ {skipped} }};")?;
    writeln!(out, "{BODY}continue;")
}

fn write_op(out: &mut String, pc: u32, op: &Op) -> fmt::Result {
    let skip = pc + 2;
    match *op {
        Op::Move { a, b } => writeln!(out, "{BODY}cx.move_({a}, {b});"),
        Op::LoadI { a, v } => writeln!(out, "{BODY}cx.loadi({a}, {v});"),
        Op::LoadF { a, v } => writeln!(out, "{BODY}cx.loadf({a}, {v:?});"),
        Op::LoadK { a, k, skip: s } => {
            writeln!(out, "{BODY}cx.loadk({a}, {k});")?;
            if s { goto(out, skip) } else { Ok(()) }
        }
        Op::LoadBool { a, v, skip: s } => {
            writeln!(out, "{BODY}cx.loadbool({a}, {v});")?;
            if s { goto(out, skip) } else { Ok(()) }
        }
        Op::LoadNil { a, b } => writeln!(out, "{BODY}cx.loadnil({a}, {b});"),
        Op::GetUpval { a, b } => writeln!(out, "{BODY}cx.getupval({a}, {b});"),
        Op::SetUpval { a, b } => writeln!(out, "{BODY}cx.setupval({a}, {b});"),
        Op::GetTabUp { a, b, k } => writeln!(out, "{BODY}cx.gettabup({pc}, {a}, {b}, {k})?;"),
        Op::GetTable { a, b, c } => writeln!(out, "{BODY}cx.gettable({pc}, {a}, {b}, {c})?;"),
        Op::GetI { a, b, c } => writeln!(out, "{BODY}cx.geti({pc}, {a}, {b}, {c})?;"),
        Op::GetField { a, b, k } => writeln!(out, "{BODY}cx.getfield({pc}, {a}, {b}, {k})?;"),
        Op::SetTabUp { a, k, v } => {
            writeln!(out, "{BODY}cx.settabup({pc}, {a}, {k}, {})?;", Expr(v))
        }
        Op::SetTable { a, b, v } => {
            writeln!(out, "{BODY}cx.settable({pc}, {a}, {b}, {})?;", Expr(v))
        }
        Op::SetI { a, b, v } => writeln!(out, "{BODY}cx.seti({pc}, {a}, {b}, {})?;", Expr(v)),
        Op::SetField { a, k, v } => {
            writeln!(out, "{BODY}cx.setfield({pc}, {a}, {k}, {})?;", Expr(v))
        }
        Op::NewTable { a, hash, array } => {
            writeln!(out, "{BODY}cx.newtable({pc}, {a}, {hash}, {array});")?;
            goto(out, skip)
        }
        Op::Self_ { a, b, key } => writeln!(out, "{BODY}cx.self_({pc}, {a}, {b}, {})?;", Expr(key)),
        Op::Arith { op, a, lhs, rhs } => goto_if(
            out,
            format_args!(
                "cx.arith({pc}, ArithOp::{op:?}, {a}, {}, {})?",
                Expr(lhs),
                Expr(rhs)
            ),
            skip,
        ),
        Op::Fallback(f) => writeln!(
            out,
            "{BODY}cx.fallback({pc}, {}, {}, {}, Tm::{:?})?;",
            f.dest,
            Expr(f.lhs),
            Expr(f.rhs),
            f.event
        ),
        Op::Unm { a, b } => writeln!(out, "{BODY}cx.unm({pc}, {a}, {b})?;"),
        Op::BNot { a, b } => writeln!(out, "{BODY}cx.bnot({pc}, {a}, {b})?;"),
        Op::Not { a, b } => writeln!(out, "{BODY}cx.not({a}, {b});"),
        Op::Len { a, b } => writeln!(out, "{BODY}cx.len({pc}, {a}, {b})?;"),
        Op::Concat { a, n } => writeln!(out, "{BODY}cx.concat({pc}, {a}, {n})?;"),
        Op::Close { a } => writeln!(out, "{BODY}cx.close({pc}, {a})?;"),
        Op::Tbc { a } => writeln!(out, "{BODY}cx.tbc({pc}, {a})?;"),
        Op::Jmp { to } => {
            writeln!(out, "{BODY}cx.jump();")?;
            goto(out, to)
        }
        Op::Cond { test, k, to } => {
            let eval = match test {
                Test::Eq { a, b } => format!("cx.eq({pc}, {a}, {b})?"),
                Test::Lt { a, b } => format!("cx.lt({pc}, {a}, {b})?"),
                Test::Le { a, b } => format!("cx.le({pc}, {a}, {b})?"),
                Test::EqK { a, k } => format!("cx.eqk({a}, {k})"),
                Test::EqI { a, imm } => format!("cx.eqi({a}, {imm})"),
                Test::OrderI {
                    a,
                    imm,
                    is_float,
                    cmp,
                } => format!("cx.order_i({pc}, {a}, {imm}, {is_float}, OrderI::{cmp:?})?"),
                Test::Truthy { a } => format!("cx.test({a})"),
            };
            writeln!(out, "{BODY}let cond = {eval};")?;
            branch(out, format_args!("cx.cond(cond, {k})"), to, skip)
        }
        Op::TestSet { a, b, k, to } => {
            branch(out, format_args!("cx.testset({a}, {b}, {k})"), to, skip)
        }
        Op::Call { a, b, c } => {
            writeln!(out, "{BODY}if let Some(callee) = cx.call({pc}, {a}, {b}, {c})? {{")?;
            writeln!(out, "{BODY}    return Ok(Some(callee));")?;
            writeln!(out, "{BODY}}}")
        }
        Op::TailCall { a, b, c, k } => {
            writeln!(out, "{BODY}return cx.tailcall({pc}, {a}, {b}, {c}, {k});")
        }
        Op::Return { a, b, c, k } => writeln!(out, "{BODY}return cx.ret({pc}, {a}, {b}, {c}, {k});"),
        Op::Return0 => writeln!(out, "{BODY}return cx.ret0({pc});"),
        Op::Return1 { a } => writeln!(out, "{BODY}return cx.ret1({pc}, {a});"),
        Op::ForPrep { a, exit } => goto_if(out, format_args!("cx.forprep({pc}, {a})?"), exit),
        Op::ForLoop { a, body } => goto_if(out, format_args!("cx.forloop({a})"), body),
        Op::TForPrep { a, to } => {
            writeln!(out, "{BODY}cx.tforprep({pc}, {a})?;")?;
            goto(out, to)
        }
        Op::TForCall { a, c } => writeln!(out, "{BODY}cx.tforcall({pc}, {a}, {c})?;"),
        Op::TForLoop { a, body } => goto_if(out, format_args!("cx.tforloop({a})"), body),
        Op::SetList { a, b, first, skip: s } => {
            writeln!(out, "{BODY}cx.setlist({a}, {b}, {first})?;")?;
            if s { goto(out, skip) } else { Ok(()) }
        }
        Op::Closure { a, index } => writeln!(out, "{BODY}cx.closure({pc}, {a}, {index})?;"),
        Op::VarArg { a, c } => writeln!(out, "{BODY}cx.vararg({pc}, {a}, {c})?;"),
        Op::VarArgPrep { a } => writeln!(out, "{BODY}cx.varargprep({pc}, {a})?;"),
        Op::ExtraArg => writeln!(out, "{BODY}return Err(luaot::aot::stray_extraarg({pc}));"),
    }
}
