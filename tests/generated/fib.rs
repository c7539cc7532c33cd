// Generated by luaot from "@fib.lua". Do not edit.

#[allow(unused_imports)]
use luaot::{
    error::Result,
    exec::{ArithOp, FrameCtx, Operand, OrderI, Tm},
    vm::{FrameId, NativeRoutine, Runtime, Value},
};

// main <fib.lua:0> (#0)
#[allow(unused_mut, clippy::all)]
pub fn luaot_routine_00(rt: &mut Runtime, ci: FrameId) -> Result<Option<FrameId>> {
    let mut cx = FrameCtx::enter(rt, ci)?;
    let mut pc = cx.entry_pc();
    loop {
        match pc {
            // L0
            0 => {
                cx.fetch(0)?;
                cx.varargprep(0, 0)?;
                cx.fetch(1)?;
                cx.closure(1, 0, 0)?;
                cx.fetch(2)?;
                cx.settabup(2, 0, 0, Operand::Reg(0))?;
                cx.fetch(3)?;
                cx.gettabup(3, 0, 0, 0)?;
                cx.fetch(4)?;
                cx.loadi(1, 25);
                cx.fetch(5)?;
                if let Some(callee) = cx.call(5, 0, 2, 2)? {
                    return Ok(Some(callee));
                }
                pc = 6;
            }
            // L1
            6 => {
                cx.fetch(6)?;
                cx.loadi(1, 0);
                cx.fetch(7)?;
                cx.loadi(2, 0);
                cx.fetch(8)?;
                cx.loadi(3, 10);
                cx.fetch(9)?;
                cx.loadi(4, 1);
                cx.fetch(10)?;
                cx.loadi(5, -3);
                cx.fetch(11)?;
                if cx.forprep(11, 3)? {
                    pc = 17;
                    continue;
                }
                pc = 12;
            }
            // L2
            12 => {
                cx.fetch(12)?;
                if cx.arith(12, ArithOp::Add, 1, Operand::Reg(1), Operand::Int(1))? {
                    pc = 14;
                    continue;
                }
                cx.fetch(13)?;
                cx.fallback(13, 1, Operand::Reg(1), Operand::Int(1), Tm::Add)?;
                pc = 14;
            }
            // L3
            14 => {
                cx.fetch(14)?;
                if cx.arith(14, ArithOp::Add, 2, Operand::Reg(2), Operand::Reg(6))? {
                    pc = 16;
                    continue;
                }
                cx.fetch(15)?;
                cx.fallback(15, 2, Operand::Reg(2), Operand::Reg(6), Tm::Add)?;
                pc = 16;
            }
            // L4
            16 => {
                cx.fetch(16)?;
                if cx.forloop(3) {
                    pc = 12;
                    continue;
                }
                pc = 17;
            }
            // L5
            17 => {
                cx.fetch(17)?;
                return cx.ret(17, 0, 4, 1, false);
            }
            _ => return Err(luaot::aot::bad_entry(0, pc)),
        }
    }
}

// function <fib.lua:1> (#1)
#[allow(unused_mut, clippy::all)]
pub fn luaot_routine_01(rt: &mut Runtime, ci: FrameId) -> Result<Option<FrameId>> {
    let mut cx = FrameCtx::enter(rt, ci)?;
    let mut pc = cx.entry_pc();
    loop {
        match pc {
            // L0
            0 => {
                cx.fetch(0)?;
                let cond = cx.order_i(0, 0, 2, false, OrderI::Lt)?;
                pc = if cx.cond(cond, false) { 3 } else { 2 };
                continue;
            }
            // L1
            2 => {
                cx.fetch(2)?;
                return cx.ret1(2, 0);
            }
            // L2
            3 => {
                cx.fetch(3)?;
                cx.gettabup(3, 1, 0, 0)?;
                cx.fetch(4)?;
                if cx.arith(4, ArithOp::Add, 2, Operand::Reg(0), Operand::Int(-1))? {
                    pc = 6;
                    continue;
                }
                cx.fetch(5)?;
                cx.fallback(5, 2, Operand::Reg(0), Operand::Int(1), Tm::Sub)?;
                pc = 6;
            }
            // L3
            6 => {
                cx.fetch(6)?;
                if let Some(callee) = cx.call(6, 1, 2, 2)? {
                    return Ok(Some(callee));
                }
                pc = 7;
            }
            // L4
            7 => {
                cx.fetch(7)?;
                cx.gettabup(7, 2, 0, 0)?;
                cx.fetch(8)?;
                if cx.arith(8, ArithOp::Add, 3, Operand::Reg(0), Operand::Int(-2))? {
                    pc = 10;
                    continue;
                }
                cx.fetch(9)?;
                cx.fallback(9, 3, Operand::Reg(0), Operand::Int(2), Tm::Sub)?;
                pc = 10;
            }
            // L5
            10 => {
                cx.fetch(10)?;
                if let Some(callee) = cx.call(10, 2, 2, 2)? {
                    return Ok(Some(callee));
                }
                pc = 11;
            }
            // L6
            11 => {
                cx.fetch(11)?;
                if cx.arith(11, ArithOp::Add, 1, Operand::Reg(1), Operand::Reg(2))? {
                    pc = 13;
                    continue;
                }
                cx.fetch(12)?;
                cx.fallback(12, 1, Operand::Reg(1), Operand::Reg(2), Tm::Add)?;
                pc = 13;
            }
            // L7
            13 => {
                cx.fetch(13)?;
                return cx.ret1(13, 1);
            }
            _ => return Err(luaot::aot::bad_entry(1, pc)),
        }
    }
}

pub static LUAOT_ROUTINES: &[NativeRoutine] = &[
    luaot_routine_00,
    luaot_routine_01,
];

static LUAOT_CHUNK: &[u8] = &[
    0x1b, 0x4c, 0x4f, 0x54, 0x01, 0x01, 0x08, 0x40, 0x66, 0x69, 0x62, 0x2e, 0x6c, 0x75, 0x61, 0x00,
    0x00, 0x00, 0x01, 0x07, 0x12, 0x51, 0x4f, 0x0f, 0x0b, 0x81, 0x81, 0xb0, 0x80, 0x08, 0xc4, 0x80,
    0x88, 0x10, 0x81, 0x81, 0xfe, 0xff, 0x07, 0x81, 0x82, 0xfe, 0xff, 0x07, 0x81, 0x83, 0x92, 0x80,
    0x08, 0x81, 0x84, 0x80, 0x80, 0x08, 0x81, 0x85, 0xf8, 0xff, 0x07, 0xca, 0x83, 0x08, 0x95, 0x81,
    0x84, 0x80, 0x08, 0xaf, 0x81, 0x80, 0x34, 0xa2, 0x82, 0x88, 0x30, 0xae, 0x82, 0x98, 0x30, 0xc9,
    0x83, 0x0a, 0xc6, 0x80, 0x90, 0x08, 0x01, 0x04, 0x03, 0x66, 0x69, 0x62, 0x01, 0x01, 0x04, 0x5f,
    0x45, 0x4e, 0x56, 0x01, 0x00, 0x01, 0x01, 0x08, 0x40, 0x66, 0x69, 0x62, 0x2e, 0x6c, 0x75, 0x61,
    0x01, 0x03, 0x01, 0x00, 0x04, 0x0e, 0xbe, 0x80, 0x84, 0x04, 0xb8, 0x80, 0x80, 0x80, 0x08, 0x48,
    0x8b, 0x01, 0x95, 0x82, 0x80, 0xf0, 0x07, 0xaf, 0x80, 0x80, 0x3c, 0xc4, 0x81, 0x88, 0x10, 0x8b,
    0x02, 0x95, 0x83, 0x80, 0xe8, 0x07, 0xaf, 0x80, 0x84, 0x3c, 0xc4, 0x82, 0x88, 0x10, 0xa2, 0x81,
    0x84, 0x10, 0xae, 0x81, 0x88, 0x30, 0xc8, 0x01, 0x01, 0x04, 0x03, 0x66, 0x69, 0x62, 0x01, 0x01,
    0x04, 0x5f, 0x45, 0x4e, 0x56, 0x00, 0x00, 0x00, 0x0e, 0x02, 0x02, 0x02, 0x03, 0x03, 0x03, 0x03,
    0x03, 0x03, 0x03, 0x03, 0x03, 0x03, 0x03, 0x12, 0x04, 0x04, 0x04, 0x05, 0x05, 0x05, 0x06, 0x06,
    0x07, 0x07, 0x07, 0x07, 0x07, 0x07, 0x07, 0x07, 0x07, 0x08,
];

pub fn luaopen_fib(rt: &mut Runtime) -> Result<Vec<Value>> {
    luaot::aot::open_bundle(rt, LUAOT_CHUNK, LUAOT_ROUTINES)
}
