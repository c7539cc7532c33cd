mod common;

use common::{Asm, runtime};
use luaot::{
    Chunk, Engine, ErrorKind, Result, Value,
    aot::{self, CompileOptions, Compiler},
    bytecode::asm,
    exec::FrameCtx,
    vm::{FrameId, NativeRoutine, Runtime},
};

/// `return 41`, with a routine table that returns 42 instead.
fn chunk() -> Chunk {
    let mut m = Asm::main().stack(1);
    m.op(asm::varargprep(0, 0, 0))
        .op(asm::loadi(0, 41))
        .op(asm::return_(0, 2, 1, false));
    Chunk::new(m.finish())
}

fn answer(rt: &mut Runtime, ci: FrameId) -> Result<Option<FrameId>> {
    let mut cx = FrameCtx::enter(rt, ci)?;
    let pc = cx.entry_pc();
    match pc {
        0 => {
            cx.fetch(0)?;
            cx.varargprep(0, 0)?;
            cx.fetch(1)?;
            cx.loadi(0, 42);
            cx.fetch(2)?;
            cx.ret(2, 0, 2, 1, false)
        }
        _ => Err(aot::bad_entry(0, pc)),
    }
}

const TABLE: &[NativeRoutine] = &[answer];

#[test]
fn bundle_runs_the_linked_routines() {
    let bytes = chunk().to_bytes().unwrap();
    let (mut rt, _) = runtime(Engine::Compiled);
    let values = aot::open_bundle(&mut rt, &bytes, TABLE).unwrap();
    assert_eq!(values, [Value::Int(42)]);
}

#[test]
fn interpreter_ignores_bound_routines() {
    let bytes = chunk().to_bytes().unwrap();
    let (mut rt, _) = runtime(Engine::Interpreted);
    let values = aot::open_bundle(&mut rt, &bytes, TABLE).unwrap();
    assert_eq!(values, [Value::Int(41)]);
}

#[test]
fn routine_count_must_match_the_tree() {
    let bytes = chunk().to_bytes().unwrap();
    let (mut rt, _) = runtime(Engine::Compiled);
    let e = aot::open_bundle(&mut rt, &bytes, &[answer, answer]).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Config);
    assert_eq!(e.message(), "2 routines cannot be bound to 1 prototypes");
}

#[test]
fn corrupt_bundle_is_rejected() {
    let mut bytes = chunk().to_bytes().unwrap();
    bytes[4] = 99;
    let (mut rt, _) = runtime(Engine::Compiled);
    let e = aot::open_bundle(&mut rt, &bytes, TABLE).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Chunk);
}

#[test]
fn prototypes_are_bound_once() {
    let chunk = chunk();
    let mut rt = Runtime::new();
    let proto = rt.load_proto(&chunk.main);
    let program = Compiler::new(CompileOptions::bare())
        .compile_tree(&*proto)
        .unwrap();
    aot::bind(&proto, &program).unwrap();
    assert!(aot::bind(&proto, &program).is_err());
}

#[test]
fn emitted_module_bundles_the_chunk() {
    let chunk = chunk();
    let source = Compiler::new(CompileOptions::default())
        .emit("answer", &chunk)
        .unwrap();
    assert!(source.contains("pub static LUAOT_ROUTINES: &[NativeRoutine] = &[\n    luaot_routine_00,\n];"));
    assert!(source.contains("pub fn luaopen_answer(rt: &mut Runtime) -> Result<Vec<Value>> {"));
    let header = Chunk::to_bytes(&chunk).unwrap();
    let first = format!("0x{:02x}, 0x{:02x}, 0x{:02x}", header[0], header[1], header[2]);
    assert!(source.contains(&first), "{source}");
}
