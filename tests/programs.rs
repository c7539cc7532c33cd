mod common;

use std::{cell::RefCell, rc::Rc};

use common::{Asm, ints, run, run_both, runtime};
use luaot::{
    Chunk, Engine, Value,
    bytecode::{Prototype, UpvalueDesc, asm},
    exec::Tm,
    vm::{HookEvent, HookMask},
};

const ADD: u8 = Tm::Add as u8;
const SUB: u8 = Tm::Sub as u8;

/// `function fib(n) if n < 2 then return n end return fib(n-1) + fib(n-2) end`
fn fib_proto() -> Prototype {
    let mut f = Asm::function(1, 1).stack(4);
    let name = f.str("fib");
    f.at(2)
        .test_jmp(asm::lti(0, 2, false), "rec")
        .op(asm::return1(0, 0, 0));
    f.at(3)
        .label("rec")
        .op(asm::gettabup(1, 0, name as u8))
        .op(asm::addi(2, 0, -1))
        .op(asm::mmbini(0, 1, SUB, false))
        .op(asm::call(1, 2, 2))
        .op(asm::gettabup(2, 0, name as u8))
        .op(asm::addi(3, 0, -2))
        .op(asm::mmbini(0, 2, SUB, false))
        .op(asm::call(2, 2, 2))
        .op(asm::add(1, 1, 2))
        .op(asm::mmbin(1, 2, ADD))
        .op(asm::return1(1, 0, 0));
    f.at(4).op(asm::return0(0, 0, 0));
    f.finish()
}

/// Defines the global `name` as `child`, then tail-calls it with one
/// integer argument.
fn call_global(name: &str, child: Prototype, arg: i64) -> Prototype {
    let mut m = Asm::main().stack(2);
    let k = m.str(name);
    let child = m.child(child);
    let arg = m.int(arg);
    m.op(asm::varargprep(0, 0, 0))
        .op(asm::closure(0, child))
        .op(asm::settabup(0, k as u8, 0, false))
        .op(asm::gettabup(0, 0, k as u8))
        .op(asm::loadk(1, arg))
        .op(asm::tailcall(0, 2, 1, false))
        .op(asm::return_(0, 0, 1, false));
    m.finish()
}

#[test]
fn fib_runs_under_one_driver() {
    let main = call_global("fib", fib_proto(), 20);
    let run = run_both(&main);
    assert_eq!(run.values(), &ints(&[6765])[..]);
    assert_eq!(run.stats.max_drivers, 1);
    assert!(run.stats.dispatches > 6765);
    assert_eq!(run.stats.fallbacks, 0);
}

#[test]
#[ignore = "slow"]
fn fib_35() {
    let main = call_global("fib", fib_proto(), 35);
    let run = run(&main, Engine::Compiled);
    assert_eq!(run.values(), &ints(&[9227465])[..]);
}

#[test]
fn compiled_and_interpreted_dispatch_the_same_frames() {
    let main = call_global("fib", fib_proto(), 12);
    let compiled = run(&main, Engine::Compiled);
    let interpreted = run(&main, Engine::Interpreted);
    assert_eq!(compiled.stats.dispatches, interpreted.stats.dispatches);
    assert_eq!(compiled.stats.max_frames, interpreted.stats.max_frames);
}

/// A table built with `SETLIST`, then summed with `for _, v in <iter>(t)`.
fn sum_with(iter: &str, hash: bool) -> Prototype {
    let mut m = Asm::main().stack(9);
    let iter = m.str(iter);
    let (a, b) = (m.str("a"), m.str("b"));
    m.op(asm::varargprep(0, 0, 0));
    if hash {
        m.op(asm::newtable(0, 2, 0))
            .op(asm::extraarg(0))
            .op(asm::loadi(1, 5))
            .op(asm::setfield(0, a as u8, 1, false))
            .op(asm::loadi(1, 7))
            .op(asm::setfield(0, b as u8, 1, false));
    } else {
        m.op(asm::newtable(0, 0, 3))
            .op(asm::extraarg(0))
            .op(asm::loadi(1, 10))
            .op(asm::loadi(2, 20))
            .op(asm::loadi(3, 30))
            .op(asm::setlist(0, 3, 0, false));
    }
    m.op(asm::loadi(1, 0))
        .op(asm::gettabup(2, 0, iter as u8))
        .op(asm::move_(3, 0, 0))
        .op(asm::call(2, 2, 5))
        .tforprep(2, "call")
        .label("body")
        .op(asm::add(1, 1, 7))
        .op(asm::mmbin(1, 7, ADD))
        .label("call")
        .op(asm::tforcall(2, 0, 2))
        .tforloop(2, "body")
        .op(asm::return_(1, 2, 1, false));
    m.finish()
}

#[test]
fn generic_for_over_ipairs() {
    let run = run_both(&sum_with("ipairs", false));
    assert_eq!(run.values(), &ints(&[60])[..]);
}

#[test]
fn generic_for_over_pairs() {
    let run = run_both(&sum_with("pairs", true));
    assert_eq!(run.values(), &ints(&[12])[..]);
}

#[test]
fn closures_share_captured_locals() {
    // local n = 0; return function() n = n + 1; return n end
    let mut inner = Asm::function(2, 0)
        .stack(2)
        .upvalue(UpvalueDesc::stack("n", 0));
    inner
        .at(3)
        .op(asm::getupval(0, 1, 0))
        .op(asm::addi(0, 0, 1))
        .op(asm::mmbini(0, 1, ADD, false))
        .op(asm::setupval(0, 1, 0))
        .op(asm::return1(0, 0, 0));
    let mut make = Asm::function(1, 0).stack(2);
    let inner = make.child(inner.finish());
    make.at(2)
        .op(asm::loadi(0, 0))
        .op(asm::closure(1, inner))
        .op(asm::return_(1, 2, 0, true));

    let mut m = Asm::main().stack(4);
    let make = m.child(make.finish());
    m.op(asm::varargprep(0, 0, 0))
        .op(asm::closure(0, make))
        .op(asm::move_(1, 0, 0))
        .op(asm::call(1, 1, 2))
        .op(asm::move_(2, 1, 0))
        .op(asm::call(2, 1, 1))
        .op(asm::move_(2, 1, 0))
        .op(asm::call(2, 1, 2))
        .op(asm::move_(3, 0, 0))
        .op(asm::call(3, 1, 2))
        .op(asm::call(3, 1, 2))
        .op(asm::return_(2, 3, 1, false));
    let run = run_both(&m.finish());
    assert_eq!(run.values(), &ints(&[2, 1])[..]);
}

#[test]
fn table_access() {
    let mut m = Asm::main().stack(5);
    let forty = m.int(40);
    let x = m.str("x");
    m.op(asm::varargprep(0, 0, 0))
        .op(asm::newtable(0, 0, 3))
        .op(asm::extraarg(0))
        .op(asm::loadi(1, 1))
        .op(asm::loadi(2, 2))
        .op(asm::loadi(3, 3))
        .op(asm::setlist(0, 3, 0, false))
        .op(asm::seti(0, 4, forty as u8, true))
        .op(asm::len(1, 0, 0))
        .op(asm::geti(2, 0, 4))
        .op(asm::loadk(3, x))
        .op(asm::settable(0, 3, 2, false))
        .op(asm::getfield(4, 0, x as u8))
        .op(asm::return_(1, 5, 1, false));
    let run = run_both(&m.finish());
    assert_eq!(
        run.values(),
        &[Value::Int(4), Value::Int(40), Value::str("x"), Value::Int(40)][..]
    );
}

#[test]
fn setlist_into_a_non_table() {
    let mut m = Asm::main().stack(3);
    m.op(asm::varargprep(0, 0, 0))
        .op(asm::loadi(0, 1))
        .op(asm::loadi(1, 2))
        .op(asm::setlist(0, 1, 0, false))
        .op(asm::return0(0, 0, 0));
    let run = run_both(&m.finish());
    assert!(run.result.as_ref().is_err_and(|e| e.kind() == luaot::ErrorKind::Bytecode));
    assert_eq!(
        run.error(),
        "malformed bytecode: SETLIST target R[0] is a number, not a table"
    );
}

#[test]
fn metamethods_run_through_the_fallback() {
    // function(a, b) return 100 end
    let mut add = Asm::function(2, 2).stack(3);
    add.op(asm::loadi(2, 100)).op(asm::return1(2, 0, 0));

    let mut m = Asm::main().stack(6);
    let add = m.child(add.finish());
    let (k_add, k_index) = (m.str("__add"), m.str("__index"));
    let (setmt, y) = (m.str("setmetatable"), m.str("y"));
    m.op(asm::varargprep(0, 0, 0))
        // mt = { __add = add, __index = { y = 7 } }
        .op(asm::newtable(0, 2, 0))
        .op(asm::extraarg(0))
        .op(asm::closure(1, add))
        .op(asm::setfield(0, k_add as u8, 1, false))
        .op(asm::newtable(1, 1, 0))
        .op(asm::extraarg(0))
        .op(asm::loadi(2, 7))
        .op(asm::setfield(1, y as u8, 2, false))
        .op(asm::setfield(0, k_index as u8, 1, false))
        // obj = setmetatable({}, mt)
        .op(asm::newtable(1, 0, 0))
        .op(asm::extraarg(0))
        .op(asm::gettabup(2, 0, setmt as u8))
        .op(asm::move_(3, 1, 0))
        .op(asm::move_(4, 0, 0))
        .op(asm::call(2, 3, 1))
        .op(asm::addi(2, 1, 5))
        .op(asm::mmbini(1, 5, ADD, false))
        .op(asm::addi(3, 2, 1))
        .op(asm::mmbini(2, 1, ADD, false))
        .op(asm::getfield(4, 1, y as u8))
        .op(asm::return_(2, 4, 1, false));
    let run = run_both(&m.finish());
    assert_eq!(run.values(), &ints(&[100, 101, 7])[..]);
    assert_eq!(run.stats.fallbacks, 1);
}

#[test]
fn arithmetic_on_a_non_number_names_the_line() {
    let mut m = Asm::main().stack(3);
    let s = m.str("x");
    m.op(asm::varargprep(0, 0, 0))
        .op(asm::newtable(0, 0, 0))
        .op(asm::extraarg(0));
    m.at(7)
        .op(asm::addi(1, 0, 1))
        .op(asm::mmbini(0, 1, ADD, false));
    m.at(8)
        .op(asm::loadk(2, s))
        .op(asm::return_(1, 2, 1, false));
    let run = run_both(&m.finish());
    assert_eq!(
        run.error(),
        "test.lua:7: attempt to perform arithmetic on a table value"
    );
    assert_eq!(run.stats.fallbacks, 1);
}

#[test]
fn varargs() {
    // function(a, ...) return a, select('#', ...), ... end, truncated to two
    let mut f = Asm::function(1, 1).stack(4).vararg();
    let (select, hash) = (f.str("select"), f.str("#"));
    f.op(asm::varargprep(1, 0, 0))
        .op(asm::gettabup(1, 0, select as u8))
        .op(asm::loadk(2, hash))
        .op(asm::vararg(3, 0, 0))
        .op(asm::call(1, 0, 2))
        .op(asm::vararg(2, 0, 3))
        .op(asm::return_(0, 5, 2, false));

    let mut m = Asm::main().stack(5);
    let f = m.child(f.finish());
    m.op(asm::varargprep(0, 0, 0))
        .op(asm::closure(0, f))
        .op(asm::loadi(1, 1))
        .op(asm::loadi(2, 2))
        .op(asm::loadi(3, 3))
        .op(asm::loadi(4, 4))
        .op(asm::call(0, 5, 0))
        .op(asm::return_(0, 0, 1, false));
    let run = run_both(&m.finish());
    assert_eq!(run.values(), &ints(&[1, 3, 2, 3])[..]);
}

/// `local function f(a) return a, a + 1, 7 end; return f(5)`
fn multiple_returns() -> Prototype {
    let mut f = Asm::function(1, 1).stack(3);
    f.at(2)
        .op(asm::addi(1, 0, 1))
        .op(asm::mmbini(0, 1, ADD, false))
        .op(asm::loadi(2, 7))
        .op(asm::return_(0, 4, 0, false));

    let mut m = Asm::main().stack(3);
    let f = m.child(f.finish());
    m.at(3)
        .op(asm::varargprep(0, 0, 0))
        .op(asm::closure(0, f))
        .op(asm::loadi(1, 5))
        .op(asm::call(0, 2, 0))
        .op(asm::return_(0, 0, 1, false));
    m.finish()
}

/// `local function f() return select(2, 10, 20, 30) end; return f()`
fn native_tail_call() -> Prototype {
    let mut f = Asm::function(1, 0).stack(5);
    let select = f.str("select");
    f.at(2)
        .op(asm::gettabup(0, 0, select as u8))
        .op(asm::loadi(1, 2))
        .op(asm::loadi(2, 10))
        .op(asm::loadi(3, 20))
        .op(asm::loadi(4, 30))
        .op(asm::tailcall(0, 5, 0, false))
        .op(asm::return_(0, 0, 0, false));

    let mut m = Asm::main().stack(2);
    let f = m.child(f.finish());
    m.at(3)
        .op(asm::varargprep(0, 0, 0))
        .op(asm::closure(0, f))
        .op(asm::call(0, 1, 0))
        .op(asm::return_(0, 0, 1, false));
    m.finish()
}

/// `local function f() end; f(); return 9`
fn empty_return() -> Prototype {
    let mut f = Asm::function(1, 0);
    f.op(asm::return0(0, 0, 0));

    let mut m = Asm::main();
    let f = m.child(f.finish());
    m.at(2)
        .op(asm::varargprep(0, 0, 0))
        .op(asm::closure(0, f))
        .op(asm::call(0, 1, 1))
        .op(asm::loadi(0, 9))
        .op(asm::return_(0, 2, 1, false));
    m.finish()
}

#[test]
fn generic_return_from_a_called_function() {
    let run = run_both(&multiple_returns());
    assert_eq!(run.values(), &ints(&[5, 6, 7])[..]);
    assert_eq!(run.stats.max_drivers, 1);
}

#[test]
fn tail_call_into_a_native_function() {
    let run = run_both(&native_tail_call());
    assert_eq!(run.values(), &ints(&[20, 30])[..]);
    assert_eq!(run.stats.max_drivers, 1);
}

#[test]
fn hooked_returns_leave_the_caller_running() {
    let programs = [
        multiple_returns(),
        native_tail_call(),
        empty_return(),
        call_global("fib", fib_proto(), 3),
    ];
    for main in programs {
        let interpreted = traced(&main, Engine::Interpreted);
        let compiled = traced(&main, Engine::Compiled);
        assert!(compiled.contains(&HookEvent::Return));
        assert_eq!(interpreted, compiled);
    }
    let events = traced(&native_tail_call(), Engine::Compiled);
    assert!(events.contains(&HookEvent::TailCall));
    assert_eq!(run_both(&empty_return()).values(), &ints(&[9])[..]);
}

#[test]
fn concat_and_print() {
    let mut m = Asm::main().stack(4);
    let (a, half, print) = (m.str("a"), m.float(2.5), m.str("print"));
    m.op(asm::varargprep(0, 0, 0))
        .op(asm::loadk(0, a))
        .op(asm::loadi(1, 1))
        .op(asm::loadk(2, half))
        .op(asm::concat(0, 3, 0))
        .op(asm::gettabup(1, 0, print as u8))
        .op(asm::move_(2, 0, 0))
        .op(asm::loadtrue(3))
        .op(asm::call(1, 3, 1))
        .op(asm::return_(0, 2, 1, false));
    let run = run_both(&m.finish());
    assert_eq!(run.values(), &[Value::str("a12.5")][..]);
    assert_eq!(run.output, "a12.5\ttrue\n");
}

#[test]
fn conditional_jumps() {
    let mut m = Asm::main().stack(4);
    m.op(asm::varargprep(0, 0, 0))
        .op(asm::loadi(0, 3))
        .op(asm::loadi(1, 4))
        .op(asm::loadi(2, 0))
        .test_jmp(asm::eq(0, 1, 0, false), "ne")
        .op(asm::addi(2, 2, 1))
        .op(asm::mmbini(2, 1, ADD, false))
        .label("ne")
        .test_jmp(asm::lt(0, 1, 0, false), "ge")
        .op(asm::addi(2, 2, 10))
        .op(asm::mmbini(2, 10, ADD, false))
        .label("ge")
        .test_jmp(asm::le(1, 0, 0, false), "gt")
        .op(asm::addi(2, 2, 100))
        .op(asm::mmbini(2, 100, ADD, false))
        .label("gt")
        .test_jmp(asm::gei(1, 4, false), "small")
        .op(asm::addi(2, 2, 20))
        .op(asm::mmbini(2, 20, ADD, false))
        .label("small")
        // r3 = r2 > 0
        .test_jmp(asm::gti(2, 0, true), "true")
        .op(asm::lfalseskip(3))
        .label("true")
        .op(asm::loadtrue(3))
        .op(asm::return_(2, 3, 1, false));
    let run = run_both(&m.finish());
    assert_eq!(run.values(), &[Value::Int(30), Value::Bool(true)][..]);
}

#[test]
fn testset_keeps_the_first_truthy_operand() {
    // return nil or 5
    let mut m = Asm::main().stack(3);
    m.op(asm::varargprep(0, 0, 0))
        .op(asm::loadnil(0, 0))
        .op(asm::loadi(1, 5))
        .test_jmp(asm::testset(2, 0, 0, true), "done")
        .op(asm::move_(2, 1, 0))
        .label("done")
        .op(asm::return_(2, 2, 1, false));
    let run = run_both(&m.finish());
    assert_eq!(run.values(), &ints(&[5])[..]);
}

/// Loads `chunk:5` with a nil index, then calls it under `pcall`.
fn failing_call(protected: bool) -> Prototype {
    let mut f = Asm::function(4, 0).stack(2);
    let x = f.str("x");
    f.at(5)
        .op(asm::loadnil(0, 0))
        .op(asm::getfield(1, 0, x as u8));
    f.at(6).op(asm::return1(1, 0, 0));

    let mut m = Asm::main().stack(3);
    let f = m.child(f.finish());
    let pcall = m.str("pcall");
    m.op(asm::varargprep(0, 0, 0));
    if protected {
        m.op(asm::gettabup(0, 0, pcall as u8))
            .op(asm::closure(1, f))
            .op(asm::call(0, 2, 3))
            .op(asm::return_(0, 3, 1, false));
    } else {
        m.op(asm::closure(0, f))
            .op(asm::call(0, 1, 2))
            .op(asm::return_(0, 2, 1, false));
    }
    m.finish()
}

#[test]
fn runtime_errors_carry_the_failing_line() {
    let run = run_both(&failing_call(false));
    assert_eq!(run.error(), "test.lua:5: attempt to index a nil value");
}

#[test]
fn pcall_returns_the_message() {
    let run = run_both(&failing_call(true));
    assert_eq!(
        run.values(),
        &[
            Value::Bool(false),
            Value::str("test.lua:5: attempt to index a nil value")
        ][..]
    );
}

#[test]
fn error_with_a_level() {
    let mut m = Asm::main().stack(3);
    let (error, msg) = (m.str("error"), m.str("boom"));
    m.op(asm::varargprep(0, 0, 0));
    m.at(3)
        .op(asm::gettabup(0, 0, error as u8))
        .op(asm::loadk(1, msg))
        .op(asm::call(0, 2, 1))
        .op(asm::return_(0, 1, 1, false));
    assert_eq!(run_both(&m.finish()).error(), "test.lua:3: boom");
}

/// Records every hook event with the line the frame was on.
fn traced(main: &Prototype, engine: Engine) -> Vec<HookEvent> {
    let events = Rc::new(RefCell::new(Vec::new()));
    let (mut rt, _) = runtime(engine);
    let sink = events.clone();
    rt.set_hook(
        move |_, event| {
            sink.borrow_mut().push(event);
            Ok(())
        },
        HookMask::CALL | HookMask::RET | HookMask::LINE,
        0,
    );
    rt.execute_module(&Chunk::new(main.clone())).unwrap();
    events.take()
}

#[test]
fn hooks_see_the_same_events_in_both_engines() {
    let main = call_global("fib", fib_proto(), 4);
    let interpreted = traced(&main, Engine::Interpreted);
    let compiled = traced(&main, Engine::Compiled);
    assert!(interpreted.contains(&HookEvent::TailCall));
    assert!(interpreted.contains(&HookEvent::Line(3)));
    assert_eq!(interpreted, compiled);
}

#[test]
fn count_hook_can_abort_a_loop() {
    let mut m = Asm::main().stack(2);
    m.op(asm::varargprep(0, 0, 0))
        .label("top")
        .jmp("top")
        .op(asm::return0(0, 0, 0));
    let main = m.finish();
    for engine in [Engine::Interpreted, Engine::Compiled] {
        let (mut rt, _) = runtime(engine);
        rt.set_hook(
            |rt, _| Err(rt.runtime_error("interrupted")),
            HookMask::COUNT,
            1000,
        );
        let e = rt.execute_module(&Chunk::new(main.clone())).unwrap_err();
        assert_eq!(e.to_string(), "test.lua:1: interrupted", "{engine:?}");
    }
}
